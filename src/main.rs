use attachment_channel::cli::{run_cli, Cli};
use clap::Parser;
use color_eyre::Result;
use dotenvy::dotenv;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    // load environment variables from .env file, if present
    dotenv().ok();

    let cli = Cli::parse();
    setup_logging(cli.verbose);

    if let Err(e) = run_cli(cli).await {
        eprintln!("attachment-channel error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Logs go to stderr so `serve` keeps stdout for responses.
fn setup_logging(verbose: bool) {
    let default = if verbose {
        "attachment_channel=debug"
    } else {
        "attachment_channel=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
