//! 日志系统模块
//!
//! 基于 `tracing` 提供结构化的日志记录功能。
//! 控制台输出始终开启，可选地再输出到按天滚动的日志文件。
//!
//! ```no_run
//! use dist_rhi::core::log;
//! use dist_rhi::core::config::LogLevel;
//!
//! log::init_logger(LogLevel::Info, false, None).ok();
//! tracing::info!(width = 800, height = 600, "Swapchain created");
//! ```

use std::path::Path;
use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use super::config::LogLevel;
use super::error::{DistRhiError, Result};

/// 初始化日志系统
///
/// `RUST_LOG` 环境变量存在时优先于 `level`。重复初始化返回 [`DistRhiError::Log`]。
///
/// # 参数
///
/// * `level` - 日志级别
/// * `file_output` - 是否输出到文件
/// * `log_file_path` - 日志文件路径（默认 "dist_rhi.log"）
pub fn init_logger(level: LogLevel, file_output: bool, log_file_path: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_ansi(true);

    let result = if file_output {
        let log_path = log_file_path.unwrap_or("dist_rhi.log");
        let path = Path::new(log_path);
        let directory = path.parent().unwrap_or(Path::new("."));
        let filename = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("dist_rhi.log");

        let file_appender = RollingFileAppender::new(Rotation::DAILY, directory, filename);

        let file_layer = fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .with(file_layer)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .try_init()
    };

    result.map_err(|e| DistRhiError::Log(e.to_string()))
}

/// 未设置 `RUST_LOG` 时使用的过滤器
fn default_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::default().add_directive(LevelFilter::from_level(level.into()).into())
}

/// 引擎核心日志 - Info 级别
#[macro_export]
macro_rules! engine_info {
    ($($arg:tt)*) => {
        tracing::info!(target: "dist_rhi::engine", $($arg)*)
    };
}

/// 引擎核心日志 - Warn 级别
#[macro_export]
macro_rules! engine_warn {
    ($($arg:tt)*) => {
        tracing::warn!(target: "dist_rhi::engine", $($arg)*)
    };
}

/// 引擎核心日志 - Error 级别
#[macro_export]
macro_rules! engine_error {
    ($($arg:tt)*) => {
        tracing::error!(target: "dist_rhi::engine", $($arg)*)
    };
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(Level::from(LogLevel::Info), Level::INFO);
        assert_eq!(Level::from(LogLevel::Error), Level::ERROR);
        assert_eq!(default_filter(LogLevel::Debug).max_level_hint(), Some(LevelFilter::DEBUG));
        assert_eq!(default_filter(LogLevel::Error).max_level_hint(), Some(LevelFilter::ERROR));
    }

    #[test]
    fn test_second_init_is_an_error() {
        // 其他测试可能已经初始化过，第二次必然失败
        let _ = init_logger(LogLevel::Warn, false, None);
        assert!(init_logger(LogLevel::Warn, false, None).is_err());
    }
}
