use color_eyre::Result;
use std::{env, fs::create_dir_all, path::PathBuf};
use tracing_appender::rolling::{self, RollingFileAppender};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const LOG_DIR: &str = ".logs";
const LOG_FILE: &str = "tg-fetch.log";

/// Install the global tracing subscriber: stdout plus a log file under `.logs/`.
///
/// The filter comes from `RUST_LOG`, then `LOG_LEVEL`, then `info`.
///
/// # Errors
///
/// Returns an error if the log directory cannot be created.
pub fn setup_logger() -> Result<()> {
    let log_dir_path = PathBuf::from(LOG_DIR);
    create_dir_all(&log_dir_path)?;

    let logfile = log_file(log_dir_path);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into())))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false));

    #[cfg(feature = "bunyan")]
    {
        use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
        registry
            .with(JsonStorageLayer)
            .with(BunyanFormattingLayer::new("tg-fetch".into(), logfile))
            .init();
    }

    #[cfg(not(feature = "bunyan"))]
    registry
        .with(fmt::layer().with_ansi(false).with_writer(logfile))
        .init();

    Ok(())
}

fn log_file(dir: PathBuf) -> RollingFileAppender {
    if cfg!(debug_assertions) {
        rolling::daily(dir, LOG_FILE)
    } else {
        rolling::never(dir, LOG_FILE)
    }
}
