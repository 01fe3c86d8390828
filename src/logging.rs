use color_eyre::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Filter variable checked before `RUST_LOG`.
const LOG_ENV: &str = "PREVIAS_LOG";

/// Log to a daily file under the data directory; the terminal belongs to the UI.
///
/// The returned guard flushes pending lines on drop and must outlive the app.
pub fn init() -> Result<WorkerGuard> {
  let dir = crate::config::data_dir()?.join("logs");
  let appender = tracing_appender::rolling::daily(&dir, "previas.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(filter())
    .with_writer(writer)
    .with_ansi(false)
    .with_target(false)
    .init();

  tracing::info!(dir = %dir.display(), "logging initialized");
  Ok(guard)
}

fn filter() -> EnvFilter {
  EnvFilter::try_from_env(LOG_ENV)
    .or_else(|_| EnvFilter::try_from_default_env())
    .unwrap_or_else(|_| EnvFilter::new("info"))
}
