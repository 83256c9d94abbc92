//! llm-relay - Main entry point.

use anyhow::Result;
use llm_relay::logging::init_logging;
use llm_relay::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );

    tracing::info!("llm-relay v{}", env!("CARGO_PKG_VERSION"));

    llm_relay::start_server(&config).await
}
