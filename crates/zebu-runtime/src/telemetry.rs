//! Log subscriber setup

use tracing_subscriber::EnvFilter;

use zebu_core::{ZebuError, ZebuResult};

use crate::LogConfig;

/// Build the filter: `RUST_LOG` when set, the configured directives otherwise
pub fn env_filter(config: &LogConfig) -> ZebuResult<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.filter)
            .map_err(|e| ZebuError::Config(format!("log filter {:?}: {e}", config.filter))),
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(config: &LogConfig) -> ZebuResult<()> {
    let filter = env_filter(config)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| ZebuError::Config(format!("install log subscriber: {e}")))
}
