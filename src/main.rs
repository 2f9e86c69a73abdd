use anyhow::Context;
use tracing::info;

use crypto_portfolio_manager::{config::Config, dashboard, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load_or_default();
    logging::init_tracing(&config.log_level);
    config.validate().context("invalid configuration")?;

    if !config.exchange.has_credentials() {
        info!("No exchange credentials configured; serving public and on-disk data only");
    }
    info!(
        "Starting Crypto AI Portfolio Manager dashboard on http://{}",
        config.dashboard.listen_addr()
    );

    dashboard::serve(config).await.context("dashboard server failed")?;
    Ok(())
}
