//! Tracing subscriber setup

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use meshdiag_core::{DiagError, DiagResult};

use crate::LogConfig;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `config.filter`. Calling this when a subscriber
/// is already installed is not an error.
pub fn init_tracing(config: &LogConfig) -> DiagResult<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.filter).map_err(|e| DiagError::InvalidConfig {
            key: "log filter",
            reason: e.to_string(),
        })?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };

    if let Err(e) = result {
        tracing::debug!("tracing subscriber already installed: {}", e);
    }
    Ok(())
}
