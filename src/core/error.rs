//! 错误处理模块
//!
//! 定义了 RHI 与帧引擎中使用的统一错误类型。
//!
//! # 约定
//!
//! - 后端 API 失败（设备、交换链、Fence、队列提交）一律以 `Err` 返回给调用方
//! - 调用约定违例（错误的命令列表类型等）使用 `debug_assert!`，
//!   录制状态错配额外返回 [`GraphicsError::InvalidState`]
//! - 描述符堆耗尽返回 [`GraphicsError::DescriptorHeapExhausted`]

use std::fmt;
use std::path::PathBuf;

use crate::rhi::DescriptorHeapType;

/// 引擎统一的 Result 类型
pub type Result<T> = std::result::Result<T, DistRhiError>;

/// dist_rhi 的错误类型
#[derive(Debug)]
pub enum DistRhiError {
    /// 配置错误
    Config(ConfigError),

    /// 图形 API 错误
    Graphics(GraphicsError),

    /// 资源（纹理文件）加载错误
    Asset(AssetError),

    /// IO 错误
    Io(std::io::Error),

    /// 日志系统错误
    Log(String),

    /// 初始化错误
    Initialization(String),

    /// 运行时错误
    Runtime(String),
}

/// 配置相关的错误
#[derive(Debug)]
pub enum ConfigError {
    /// 配置文件未找到
    FileNotFound(String),

    /// 配置文件解析失败
    ParseError(String),

    /// 配置值无效
    InvalidValue { field: String, reason: String },
}

/// 图形 API 相关的错误
#[derive(Debug)]
pub enum GraphicsError {
    /// 实例 / 适配器 / 设备创建失败
    DeviceCreation(String),

    /// 交换链错误（获取、呈现、重建）
    SwapchainError(String),

    /// 交换链与表面不再匹配，需要调用方重建交换链及依赖它的对象
    SwapchainOutOfDate,

    /// 资源创建失败
    ResourceCreation(String),

    /// 命令录制或提交失败
    CommandExecution(String),

    /// Fence 创建、等待或 signal 失败
    Synchronization(String),

    /// 描述符堆某类型已分配满
    DescriptorHeapExhausted {
        heap_type: DescriptorHeapType,
        capacity: u32,
    },

    /// 对象处于不允许该操作的状态
    InvalidState(String),

    /// 设备丢失，不可恢复
    DeviceLost(String),

    /// 当前后端或平台不支持
    Unsupported(String),
}

/// 纹理加载相关的错误
#[derive(Debug)]
pub enum AssetError {
    /// 文件不存在
    FileNotFound(PathBuf),

    /// 解码失败
    DecodeError { path: PathBuf, reason: String },

    /// 尺寸非法（宽或高为 0）
    InvalidDimensions { path: PathBuf, width: u32, height: u32 },
}

impl fmt::Display for DistRhiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistRhiError::Config(e) => write!(f, "Configuration error: {}", e),
            DistRhiError::Graphics(e) => write!(f, "Graphics error: {}", e),
            DistRhiError::Asset(e) => write!(f, "Asset error: {}", e),
            DistRhiError::Io(e) => write!(f, "IO error: {}", e),
            DistRhiError::Log(msg) => write!(f, "Log error: {}", msg),
            DistRhiError::Initialization(msg) => write!(f, "Initialization error: {}", msg),
            DistRhiError::Runtime(msg) => write!(f, "Runtime error: {}", msg),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {}", path),
            ConfigError::ParseError(msg) => write!(f, "Failed to parse config: {}", msg),
            ConfigError::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
        }
    }
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphicsError::DeviceCreation(msg) => write!(f, "Device creation failed: {}", msg),
            GraphicsError::SwapchainError(msg) => write!(f, "Swapchain error: {}", msg),
            GraphicsError::SwapchainOutOfDate => write!(f, "Swapchain is out of date for its surface"),
            GraphicsError::ResourceCreation(msg) => write!(f, "Resource creation failed: {}", msg),
            GraphicsError::CommandExecution(msg) => write!(f, "Command execution failed: {}", msg),
            GraphicsError::Synchronization(msg) => write!(f, "Synchronization failed: {}", msg),
            GraphicsError::DescriptorHeapExhausted { heap_type, capacity } => write!(
                f,
                "Descriptor heap exhausted: {} ({} descriptors)",
                heap_type.name(),
                capacity
            ),
            GraphicsError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            GraphicsError::DeviceLost(msg) => write!(f, "Device lost: {}", msg),
            GraphicsError::Unsupported(msg) => write!(f, "Unsupported: {}", msg),
        }
    }
}

impl fmt::Display for AssetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetError::FileNotFound(path) => write!(f, "Texture file not found: {}", path.display()),
            AssetError::DecodeError { path, reason } => {
                write!(f, "Failed to decode '{}': {}", path.display(), reason)
            }
            AssetError::InvalidDimensions { path, width, height } => write!(
                f,
                "Invalid texture dimensions {}x{} in '{}'",
                width,
                height,
                path.display()
            ),
        }
    }
}

impl std::error::Error for DistRhiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DistRhiError::Io(e) => Some(e),
            DistRhiError::Config(e) => Some(e),
            DistRhiError::Graphics(e) => Some(e),
            DistRhiError::Asset(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for ConfigError {}
impl std::error::Error for GraphicsError {}
impl std::error::Error for AssetError {}

impl From<std::io::Error> for DistRhiError {
    fn from(err: std::io::Error) -> Self {
        DistRhiError::Io(err)
    }
}

impl From<ConfigError> for DistRhiError {
    fn from(err: ConfigError) -> Self {
        DistRhiError::Config(err)
    }
}

impl From<GraphicsError> for DistRhiError {
    fn from(err: GraphicsError) -> Self {
        DistRhiError::Graphics(err)
    }
}

impl From<AssetError> for DistRhiError {
    fn from(err: AssetError) -> Self {
        DistRhiError::Asset(err)
    }
}

impl DistRhiError {
    /// 是否为描述符堆耗尽
    pub fn is_descriptor_exhausted(&self) -> bool {
        matches!(
            self,
            DistRhiError::Graphics(GraphicsError::DescriptorHeapExhausted { .. })
        )
    }

    /// 是否为录制 / 生命周期状态错误
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, DistRhiError::Graphics(GraphicsError::InvalidState(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formats() {
        let err: DistRhiError = GraphicsError::DescriptorHeapExhausted {
            heap_type: DescriptorHeapType::Rtv,
            capacity: 8,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Graphics error: Descriptor heap exhausted: RTV (8 descriptors)"
        );
        assert!(err.is_descriptor_exhausted());
        assert!(!err.is_invalid_state());
    }

    #[test]
    fn test_io_error_has_source() {
        let err: DistRhiError = std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
        assert!(std::error::Error::source(&err).is_some());
    }
}
