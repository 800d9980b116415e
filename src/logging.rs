use std::fs;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LogSettings;
use crate::error::{AgentError, AgentResult};

/// Console plus a daily-rolling file under `settings.dir`. Keep the returned
/// guard alive for the whole process or buffered file lines are lost.
pub fn init(settings: &LogSettings) -> AgentResult<WorkerGuard> {
    fs::create_dir_all(&settings.dir).map_err(|e| {
        AgentError::Config(format!("cannot create log directory {}: {}", settings.dir.display(), e))
    })?;

    let file_appender = tracing_appender::rolling::daily(&settings.dir, &settings.file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.default_filter));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);

    // stdout carries the REPL, so console logs go to stderr
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| AgentError::Config(format!("logging already initialised: {}", e)))?;

    Ok(guard)
}
