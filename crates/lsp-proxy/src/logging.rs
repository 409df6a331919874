//! `tracing-subscriber` initialization. The core crate only emits `tracing`
//! events (spec §7's ambient logging note); wiring up a subscriber is a
//! process-bootstrap concern that belongs in the binary.

use tracing_subscriber::EnvFilter;

use crate::cli::LogFormat;

pub fn init(log_level: &str, format: LogFormat) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }
}
