use std::env;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_ENV: &str = "VMAUDIT_LOG";

fn filter_directive() -> String {
    env::var(LOG_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| "warn".to_string())
}

/// Installs the stderr subscriber. Stdout stays reserved for the summary line.
pub fn init_logging(ansi: bool) {
    let filter_layer =
        EnvFilter::try_new(filter_directive()).unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .without_time()
                .with_ansi(ansi),
        )
        .with(filter_layer)
        .try_init();
}
