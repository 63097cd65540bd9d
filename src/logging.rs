//! Structured logging setup.
//!
//! Log lines carry usernames and rejection reasons only; passwords, digests,
//! key material and session payloads are never recorded.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Single-line human readable output.
    #[default]
    Full,
    /// One JSON object per line.
    Json,
}

#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Filter directive used when `RUST_LOG` is unset, e.g. `info`.
    pub filter: Option<String>,
}

/// Installs the global subscriber. `RUST_LOG` takes precedence over
/// `config.filter`; with neither set, `warn` is used.
pub fn init_logging(config: LogConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(config.filter.as_deref().unwrap_or("warn"))?,
    };

    match config.format {
        LogFormat::Full => {
            let fmt_layer = fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .with_filter(env_filter);
            tracing_subscriber::registry().with(fmt_layer).try_init()?;
        }
        LogFormat::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(true)
                .with_writer(std::io::stderr)
                .with_filter(env_filter);
            tracing_subscriber::registry().with(fmt_layer).try_init()?;
        }
    }

    tracing::debug!(format = ?config.format, "logging initialised");
    Ok(())
}

/// Maps a `-v` count onto a filter directive, letting `fallback` (usually
/// from the config file) apply when no flag was given.
pub fn verbosity_filter(verbosity: u8, fallback: Option<&str>) -> Option<String> {
    match verbosity {
        0 => fallback.map(str::to_string),
        1 => Some("info".to_string()),
        2 => Some("debug".to_string()),
        _ => Some("trace".to_string()),
    }
}
