use clap::Parser;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use vmmirror_server::Store;

#[derive(Parser)]
#[command(name = "vmmirror-server", about = "Serve a directory tree as a vmmirror image bucket")]
struct Cli {
    /// Port to listen on.
    #[arg(long, default_value_t = 8321)]
    port: u16,

    /// Directory whose subdirectories are served as buckets.
    #[arg(long, default_value = "./vmmirror-data")]
    data_dir: PathBuf,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    fs::create_dir_all(&cli.data_dir).expect("failed to create data directory");

    let addr = format!("0.0.0.0:{}", cli.port);
    info!("starting vmmirror-server on {addr}");
    info!("data directory: {}", cli.data_dir.display());

    let store = Arc::new(Store::new(cli.data_dir));
    vmmirror_server::run_server(&store, &addr);
}
