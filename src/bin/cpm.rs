use anyhow::Result;
use clap::Parser;

use crypto_portfolio_manager::cli::{self, Cli};
use crypto_portfolio_manager::{config::Config, logging};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load_or_default();
    logging::init_tracing(&config.log_level);
    config.validate()?;

    cli::run(cli, config).await
}
