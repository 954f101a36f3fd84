//! Structured logging setup.
//!
//! Logs go to stderr so that command output on stdout stays machine-readable.
//! `RUST_LOG` overrides the `[logging] level` directive from the config file.

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

/// Install the global `tracing` subscriber. Safe to call more than once;
/// later calls are ignored.
pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let result = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Human => builder
            .with_ansi(atty::is(atty::Stream::Stderr))
            .try_init(),
    };

    // A subscriber installed by an embedding application wins.
    let _ = result;
}
