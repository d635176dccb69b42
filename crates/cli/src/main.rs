use std::process::ExitCode;

use signoff_core::config::{AppConfig, LoadOptions, LogFormat};
use tracing_subscriber::EnvFilter;

/// Logs go to stderr so stdout stays a single JSON command outcome.
fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_new(&config.logging.level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match config.logging.format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn main() -> ExitCode {
    // Commands report configuration errors themselves; logging falls back to
    // defaults so that report still happens.
    let config = AppConfig::load(LoadOptions::default()).unwrap_or_default();
    init_logging(&config);

    signoff_cli::run()
}
