//! Logging and task instrumentation.

pub mod sensitive;

pub use sensitive::Sensitive;

use std::fs;
use std::future::Future;
use std::path::Path;
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, error, info, warn, Instrument};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};
use crate::error::FederationResult;
use crate::metrics::{self, TaskOutcome};

const LOG_FILE_SUFFIX: &str = "log";

/// Installs the global subscriber for a process named `process`
///
/// `FEDX_LOG` takes precedence over the configured level. With a log directory
/// set, output goes to a daily rolling file and files older than the retention
/// period are removed first.
pub fn init_tracing(process: &str, config: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_env("FEDX_LOG")
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let writer = match &config.directory {
        Some(dir) => {
            if let Err(e) = fs::create_dir_all(dir) {
                eprintln!("Failed to create log directory {:?}: {}", dir, e);
            }
            if let Err(e) = cleanup_old_logs(dir, config.retention_days) {
                eprintln!("Failed to clean up old logs: {}", e);
            }
            let file_name = format!("{}.{}", process, LOG_FILE_SUFFIX);
            BoxMakeWriter::new(tracing_appender::rolling::daily(dir, file_name))
        }
        None => BoxMakeWriter::new(std::io::stdout),
    };
    let ansi = config.directory.is_none();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(writer)
        .with_ansi(ansi)
        .with_thread_ids(true)
        .with_span_events(FmtSpan::CLOSE);

    let installed = match config.format {
        LogFormat::Json => builder
            .json()
            .with_file(true)
            .with_line_number(true)
            .with_current_span(true)
            .with_span_list(true)
            .try_init(),
        LogFormat::Plain => builder.with_target(true).try_init(),
    };
    if let Err(e) = installed {
        eprintln!("Failed to install the tracing subscriber: {}", e);
    }

    let previous_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = panic_info.payload();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown cause".to_string());

        tracing::error!(target: "panic", location = %location, message = %message, "Process panicked");
        previous_hook(panic_info);
    }));

    info!(process, format = ?config.format, "Tracing initialized");
}

fn cleanup_old_logs(log_dir: &Path, retention_days: u64) -> std::io::Result<()> {
    let now = SystemTime::now();
    let retention = Duration::from_secs(retention_days * 24 * 60 * 60);

    for entry in fs::read_dir(log_dir)? {
        let path = entry?.path();
        let is_log = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.contains(&format!(".{}", LOG_FILE_SUFFIX)))
            .unwrap_or(false);
        if !is_log {
            continue;
        }

        let age = fs::metadata(&path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());
        if matches!(age, Some(age) if age > retention) {
            if let Err(e) = fs::remove_file(&path) {
                eprintln!("Failed to remove old log file {:?}: {}", path, e);
            }
        }
    }
    Ok(())
}

/// Runs one worker task inside a span, logging and counting its outcome
///
/// Caller-fixable errors are logged at warn level and counted as rejected;
/// everything else is an error.
pub async fn instrument_task<T, F>(
    task: &'static str,
    request_id: &str,
    node_id: &str,
    operation: F,
) -> FederationResult<T>
where
    F: Future<Output = FederationResult<T>>,
{
    let span = tracing::info_span!("task", task, request_id, node_id);
    async move {
        let started = Instant::now();
        debug!("Task started");

        let result = operation.await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let outcome = match &result {
            Ok(_) => {
                info!(elapsed_ms, "Task finished");
                TaskOutcome::Succeeded
            }
            Err(e) if e.is_user_error() => {
                warn!(kind = e.kind(), error = %e, elapsed_ms, "Task rejected");
                TaskOutcome::Rejected
            }
            Err(e) => {
                error!(kind = e.kind(), error = %e, elapsed_ms, "Task failed");
                TaskOutcome::Failed
            }
        };
        metrics::record_task(elapsed_ms, outcome);
        result
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FederationError;

    #[tokio::test]
    async fn instrumented_task_passes_result_through() {
        let before = metrics::snapshot();

        let ok = instrument_task("get_node_info", "req1", "localnode1", async { Ok(5) }).await;
        assert_eq!(ok.unwrap(), 5);

        let err: FederationResult<()> = instrument_task("create_view", "req1", "localnode1", async {
            Err(FederationError::bad_user_input("no columns"))
        })
        .await;
        assert_eq!(err.unwrap_err().kind(), "BadUserInput");

        let after = metrics::snapshot();
        assert!(after.total >= before.total + 2);
        assert!(after.rejected > before.rejected);
    }

    #[test]
    fn only_expired_log_files_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let fresh = dir.path().join("fedx-worker.log.2026-10-16");
        let other = dir.path().join("notes.txt");
        fs::write(&fresh, "x").unwrap();
        fs::write(&other, "y").unwrap();

        cleanup_old_logs(dir.path(), 14).unwrap();
        assert!(fresh.exists());
        assert!(other.exists());

        cleanup_old_logs(dir.path(), 0).unwrap();
        assert!(other.exists());
    }
}
