pub mod capabilities;
pub mod completions;
pub mod fetch;
pub mod index;
pub mod list;

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use vmmirror_core::{ImageBucket, SharedIndex};
use vmmirror_remote::http::HttpBackend;
use vmmirror_remote::RemoteConfig;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_REMOTE_ERROR: u8 = 3;
pub const EXIT_IMAGE_NOT_FOUND: u8 = 4;

/// Remote selection from the global command-line flags.
#[derive(Debug, Clone, Default)]
pub struct RemoteArgs {
    pub url: Option<String>,
    pub bucket: Option<String>,
    pub prefix: Option<String>,
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn highlight_capability(name: &str) -> String {
    use console::Style;
    Style::new().cyan().apply_to(name).to_string()
}

/// Resolve the remote config: `--remote` with `--bucket` builds one from
/// flags, otherwise the config file is loaded and the flags override it.
pub fn make_remote_config(args: &RemoteArgs) -> Result<RemoteConfig, String> {
    let mut config = if let Some(url) = args.url.as_deref() {
        let bucket = args
            .bucket
            .as_deref()
            .ok_or_else(|| "--remote requires --bucket".to_owned())?;
        RemoteConfig::new(url, bucket)
    } else {
        let mut config = RemoteConfig::load_default()
            .map_err(|e| format!("no --remote and no config: {e}"))?;
        if let Some(bucket) = args.bucket.as_deref() {
            bucket.clone_into(&mut config.bucket);
        }
        config
    };
    if let Some(prefix) = args.prefix.as_deref() {
        config = config.with_prefix(prefix);
    }
    debug!(
        "remote {} bucket '{}' prefix '{}'{}",
        config.url,
        config.bucket,
        config.prefix,
        if config.auth_token.is_some() {
            " (authenticated)"
        } else {
            ""
        }
    );
    Ok(config)
}

pub fn open_index(args: &RemoteArgs) -> Result<Arc<SharedIndex>, String> {
    let config = make_remote_config(args)?;
    let bucket = ImageBucket::from_config(&config);
    let backend = Arc::new(HttpBackend::new(config));
    Ok(Arc::new(SharedIndex::new(backend, bucket)))
}
