use tracing_subscriber::EnvFilter;

use crate::config::types::LogFormat;

/// Install the process-wide tracing subscriber.
///
/// `level` is an `EnvFilter` directive; an unparseable one falls back to
/// `info` rather than failing startup.
pub fn setup_logging(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}
