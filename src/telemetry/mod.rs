//! 观测性初始化。

pub mod events;

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

const LOG_FILE_PREFIX: &str = "counsel-realtime.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn init_tracing() -> Result<()> {
    init_tracing_with(LogFormat::default())
}

pub fn init_tracing_with(format: LogFormat) -> Result<()> {
    let registry = Registry::default().with(env_filter());

    match format {
        LogFormat::Pretty => {
            let subscriber = registry.with(fmt::layer().with_target(false));
            tracing::subscriber::set_global_default(subscriber)
                .context("failed to set global subscriber")
        }
        LogFormat::Json => {
            let subscriber = registry.with(fmt::layer().json().with_current_span(false));
            tracing::subscriber::set_global_default(subscriber)
                .context("failed to set global subscriber")
        }
    }
}

/// 写入按天滚动的日志文件；返回的 guard 需要在进程生命周期内保持存活。
pub fn init_file_tracing(directory: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(directory)
        .with_context(|| format!("failed to create log directory: {}", directory.display()))?;

    let appender = tracing_appender::rolling::daily(directory, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let subscriber = Registry::default()
        .with(env_filter())
        .with(fmt::layer().with_ansi(false).with_writer(writer));

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set global subscriber")?;
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    // 全局 subscriber 每个进程只能安装一次，因此放在同一个用例里。
    #[test]
    fn file_tracing_creates_directory_and_rejects_second_install() {
        let root = tempdir().expect("tempdir created");
        let directory = root.path().join("logs").join("realtime");

        let guard = init_file_tracing(&directory).expect("file tracing installed");
        tracing::warn!(target: "session_manager", "file tracing smoke record");
        drop(guard);

        assert!(directory.is_dir());
        let written: Vec<_> = std::fs::read_dir(&directory)
            .expect("log directory readable")
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with(LOG_FILE_PREFIX)
            })
            .collect();
        assert_eq!(written.len(), 1);

        assert!(init_tracing_with(LogFormat::Json).is_err());
        assert!(init_tracing().is_err());
    }
}
