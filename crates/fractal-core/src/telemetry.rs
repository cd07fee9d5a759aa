use crate::{FractalError, FractalResult};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set (e.g. `"info"`, `"fractal_orchestrator=debug"`).
    #[serde(default = "default_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `config.level`. Fails with [`FractalError::Config`]
/// if the level does not parse or a global subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> FractalResult<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| FractalError::Config(format!("logging.level '{}': {e}", config.level)))?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| FractalError::Config(format!("tracing subscriber: {e}")))
}
