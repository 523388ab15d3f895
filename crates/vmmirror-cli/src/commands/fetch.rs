use super::{json_pretty, open_index, spin_fail, spin_ok, spinner, RemoteArgs, EXIT_SUCCESS};
use std::path::Path;
use tracing::debug;
use vmmirror_core::{FetcherConfig, ImageFetcher, Slot};

pub fn run(
    remote: &RemoteArgs,
    image: &str,
    slot_dir: &Path,
    session_root: Option<&Path>,
    json: bool,
) -> Result<u8, String> {
    let index = open_index(remote)?;
    let session_root = session_root
        .or_else(|| slot_dir.parent())
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut slot = Slot::prepare(slot_dir, session_root).map_err(|e| e.to_string())?;
    let fetcher = ImageFetcher::new(index, FetcherConfig::from_env());
    debug!(
        "slot {} caching under {}",
        slot.path.display(),
        fetcher.cache_for(&slot).root().display()
    );

    let pb = spinner(&format!("fetching {image}…"));
    let report = fetcher.fetch(image, &mut slot).map_err(|e| {
        spin_fail(&pb, "fetch failed");
        e.to_string()
    })?;
    spin_ok(&pb, "fetch complete");

    if json {
        let payload = serde_json::json!({
            "slot": slot,
            "report": report,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        let show = |p: Option<&Path>| p.map_or_else(|| "-".to_owned(), |p| p.display().to_string());
        println!("kernel:  {}", show(slot.kernel_file.as_deref()));
        println!("rootfs:  {}", show(slot.rootfs_file.as_deref()));
        println!("ssh key: {}", show(slot.ssh_config.ssh_key_path.as_deref()));
        println!(
            "fetched {} ({} downloaded, {} cached, {} bytes)",
            report.image,
            report.resources_downloaded,
            report.resources_cached,
            report.bytes_downloaded,
        );
    }
    Ok(EXIT_SUCCESS)
}
