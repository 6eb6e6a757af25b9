//! Tracing setup for the binary. Output goes to a daily log file so stdout
//! stays clean for command output.

use color_eyre::Result;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Filter directives are read from this variable, e.g. `STUDENTHUB_LOG=studenthub=debug`.
pub const LOG_ENV: &str = "STUDENTHUB_LOG";

const LOG_FILE_PREFIX: &str = "studenthub.log";

/// Install the global subscriber writing to `<dir>/studenthub.log.YYYY-MM-DD`.
///
/// Keep the returned guard alive for the life of the process; dropping it
/// flushes and stops the writer.
pub fn init(dir: &Path) -> Result<WorkerGuard> {
  std::fs::create_dir_all(dir)?;

  let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

  let _ = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_ansi(false)
    .with_writer(writer)
    .try_init();

  Ok(guard)
}
