mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;
use vidgate::api;
use vidgate::config::Config;

fn init_logging(config: &vidgate::config::LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_ascii_lowercase()));

    if config.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => {
            let config = match args.config {
                Some(path) => Config::load_from_path(path)?,
                None => Config::load()?,
            };
            init_logging(&config.logging);
            api::run(config).await?;
        }
    }

    Ok(())
}
