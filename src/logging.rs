use tracing_subscriber::{fmt, EnvFilter};

use crate::config::ConfigError;

/// Environment variable whose directives take precedence over the level
/// passed to [`init_logging`].
pub const LOG_ENV: &str = "PATENT_QUERY_LOG";

/// Installs a global `tracing` subscriber. `level` accepts any `EnvFilter`
/// directive (`info`, `patent_query::cursor=debug`, ...) and is overridden
/// by `PATENT_QUERY_LOG` when that is set.
pub fn init_logging(level: &str) -> Result<(), ConfigError> {
    let directives = std::env::var(LOG_ENV).unwrap_or_else(|_| level.to_owned());
    fmt()
        .with_env_filter(log_filter(&directives)?)
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .map_err(|e| ConfigError::Logging(format!("subscriber already installed: {e}")))
}

fn log_filter(directives: &str) -> Result<EnvFilter, ConfigError> {
    EnvFilter::try_new(directives)
        .map_err(|e| ConfigError::Logging(format!("invalid filter '{directives}': {e}")))
}
