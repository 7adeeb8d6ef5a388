//! Tracing subscriber setup.
//!
//! Filtering comes from the `DOCFUSION_LOG` environment variable using
//! `EnvFilter` directive syntax (`DOCFUSION_LOG=docfusion=debug`). Events
//! are written to stderr so command output on stdout stays clean.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

use crate::config::LogFormat;

pub const LOG_ENV: &str = "DOCFUSION_LOG";

const DEFAULT_FILTER: &str = "warn,docfusion=info,docfusion_core=info";

static INIT: Once = Once::new();

/// Install the global subscriber. Later calls are no-ops.
pub fn init_tracing(format: LogFormat) {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr);

        let result = match format {
            LogFormat::Plain => builder.try_init(),
            LogFormat::Json => builder.json().try_init(),
        };
        if let Err(e) = result {
            eprintln!("Warning: tracing subscriber already installed: {}", e);
        }
    });
}
