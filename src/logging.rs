//! Structured logging initialization.
//!
//! Environment-aware tracing setup used by worker binaries and tests.
//! Initialization is idempotent so embedding applications and test harnesses
//! can both call it safely.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration.
///
/// `MOLDOCK_ENV=production` switches to JSON output for log aggregation;
/// everything else gets human-readable console lines. `RUST_LOG` overrides
/// the default filter.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_log_level(&environment)));

        let result = if environment == "production" {
            tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_level(true)
                        .with_filter(filter),
                )
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_level(true)
                        .with_ansi(true)
                        .with_filter(filter),
                )
                .try_init()
        };

        // A subscriber may already be installed by the embedding process;
        // that is not an error for us.
        if let Err(e) = result {
            eprintln!("moldock-core logging already initialized: {e}");
        }
    });
}

fn get_environment() -> String {
    std::env::var("MOLDOCK_ENV").unwrap_or_else(|_| "development".to_string())
}

fn default_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        "test" => "warn",
        _ => "debug",
    }
}
