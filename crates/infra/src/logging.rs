use crate::config::AppConfig;
use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt};

/// Installs the global subscriber. `RUST_LOG` wins over the configured level
/// so a single deployment can be turned up without a config change.
pub fn init_tracing(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.trim()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let format = if config.is_production() {
        fmt()
            .with_env_filter(filter)
            .json()
            .with_target(false)
            .try_init()
            .map_err(|err| anyhow::anyhow!("tracing subscriber: {err}"))?;
        "json"
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .try_init()
            .map_err(|err| anyhow::anyhow!("tracing subscriber: {err}"))?;
        "compact"
    };

    tracing::info!(
        app_env = %config.app_env,
        data_backend = %config.data_backend,
        lock_backend = %config.lock_backend,
        format,
        "tracing initialised"
    );
    Ok(())
}
