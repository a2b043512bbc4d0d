use gitrecords_rs::cli;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    if let Err(e) = cli::main().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
