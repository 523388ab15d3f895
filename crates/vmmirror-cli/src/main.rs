mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{RemoteArgs, EXIT_FAILURE, EXIT_IMAGE_NOT_FOUND, EXIT_REMOTE_ERROR};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "vmmirror",
    version,
    about = "Query and fetch microVM boot images from a remote image bucket"
)]
struct Cli {
    /// Remote object store URL (overrides the config file).
    #[arg(long, global = true)]
    remote: Option<String>,

    /// Bucket holding the image folders (overrides the config file).
    #[arg(long, global = true)]
    bucket: Option<String>,

    /// Folder inside the bucket under which images live.
    #[arg(long, global = true)]
    prefix: Option<String>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List every capability advertised by any image.
    Capabilities,
    /// Dump the image index: resources per image and images per capability.
    Index,
    /// List images that have every given capability.
    List {
        /// Required capability; repeat to narrow the result. `*` matches all.
        #[arg(short = 'c', long = "capability")]
        capabilities: Vec<String>,
    },
    /// Fetch an image's kernel, root filesystem and SSH key into a slot.
    Fetch {
        /// Image name (folder under the images prefix).
        image: String,
        /// Slot directory to populate; created if missing.
        #[arg(long)]
        slot: PathBuf,
        /// Session root used as cache root when OPT_LOCAL_IMAGES_PATH is unset.
        /// Defaults to the slot's parent directory.
        #[arg(long)]
        session_root: Option<PathBuf>,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("VMMIRROR_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let remote = RemoteArgs {
        url: cli.remote,
        bucket: cli.bucket,
        prefix: cli.prefix,
    };
    let json_output = cli.json;

    let result = match cli.command {
        Commands::Capabilities => commands::capabilities::run(&remote, json_output),
        Commands::Index => commands::index::run(&remote, json_output),
        Commands::List { capabilities } => {
            commands::list::run(&remote, &capabilities, json_output)
        }
        Commands::Fetch {
            image,
            slot,
            session_root,
        } => commands::fetch::run(
            &remote,
            &image,
            &slot,
            session_root.as_deref(),
            json_output,
        ),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("image not found:") {
                EXIT_IMAGE_NOT_FOUND
            } else if msg.starts_with("image index unavailable:")
                || msg.starts_with("download of")
            {
                EXIT_REMOTE_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}
