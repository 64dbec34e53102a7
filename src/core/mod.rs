//! 核心功能模块
//!
//! 与具体图形 API 无关的基础设施：日志系统、配置管理和错误处理。
//!
//! - `log`：基于 tracing 的结构化日志
//! - `config`：TOML 配置加载与命令行覆盖
//! - `error`：统一错误类型

pub mod config;
pub mod error;
pub mod log;

pub use config::{EngineConfig, GraphicsBackend};
pub use error::{DistRhiError, GraphicsError, Result};
