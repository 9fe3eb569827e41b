use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Installs the global subscriber: stdout always, plus a daily rolling
/// `<app>.log` under `log_dir` when one is given. Calling it twice only warns.
pub fn init_tracing(app: &str, log_dir: Option<&Path>) {
    let env_filter = EnvFilter::from_default_env().add_directive(Level::INFO.into());
    let fmt_stdout = tracing_subscriber::fmt::layer().with_writer(std::io::stdout);

    let fmt_file = log_dir.and_then(|log_dir| {
        if let Err(err) = fs::create_dir_all(log_dir) {
            eprintln!("failed to create log directory {log_dir:?}: {err}");
            return None;
        }
        let file_appender: RollingFileAppender =
            tracing_appender::rolling::daily(log_dir, format!("{app}.log"));
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let _ = LOG_GUARD.set(guard);
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .boxed(),
        )
    });

    let subscriber = Registry::default()
        .with(env_filter)
        .with(fmt_stdout)
        .with(fmt_file);

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::warn!("tracing already initialised");
    }
}
