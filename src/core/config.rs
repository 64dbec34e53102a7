//! 配置管理模块
//!
//! 提供引擎配置的加载、解析和管理功能。
//! 支持从 TOML 配置文件加载，也支持命令行参数覆盖。
//!
//! # 配置文件格式 (config.toml)
//!
//! ```toml
//! [window]
//! width = 1280
//! height = 720
//! title = "DistRHI"
//!
//! [graphics]
//! backend = "software"   # software, vulkan 或 dx12
//! vsync = 0              # 呈现间隔，0 表示不等待垂直同步
//! frame_buffer_count = 3
//!
//! [descriptors]
//! cbv = 1024
//! srv = 1024
//! uav = 512
//! rtv = 64
//! dsv = 64
//! sampler = 16
//!
//! [logging]
//! level = "info"
//! file_output = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::error::{ConfigError, Result};

/// 交换链后备缓冲数量
pub const FRAME_BUFFER_COUNT: u32 = 3;
/// 默认呈现间隔（不等待垂直同步）
pub const VSYNC: u32 = 0;
/// 各类描述符默认容量
pub const CBV_DESC_COUNT: u32 = 1024;
pub const SRV_DESC_COUNT: u32 = 1024;
pub const UAV_DESC_COUNT: u32 = 512;
pub const RTV_DESC_COUNT: u32 = 64;
pub const DSV_DESC_COUNT: u32 = 64;
pub const MAX_SAMPLER_STATE: u32 = 16;

/// 引擎配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// 窗口配置
    #[serde(default)]
    pub window: WindowConfig,

    /// 图形配置
    #[serde(default)]
    pub graphics: GraphicsConfig,

    /// 描述符堆容量
    #[serde(default)]
    pub descriptors: DescriptorConfig,

    /// 软件后端参数
    #[serde(default)]
    pub software: SoftwareConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,

    /// 演示程序参数
    #[serde(default)]
    pub demo: DemoConfig,
}

/// 窗口配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    #[serde(default = "default_title")]
    pub title: String,

    #[serde(default = "default_resizable")]
    pub resizable: bool,
}

/// 图形配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphicsConfig {
    /// 图形后端选择
    #[serde(default = "default_backend")]
    pub backend: GraphicsBackend,

    /// 呈现间隔（0 = 立即呈现）
    #[serde(default = "default_vsync")]
    pub vsync: u32,

    /// 后备缓冲数量
    #[serde(default = "default_frame_buffer_count")]
    pub frame_buffer_count: u32,

    /// 是否开启 API 校验层
    #[serde(default)]
    pub debug_layer: bool,

    /// 启动时是否使用 HDR 交换链格式
    #[serde(default)]
    pub hdr: bool,

    /// 启动时是否全屏
    #[serde(default)]
    pub full_screen: bool,

    /// 交换链渲染通道的清屏颜色
    #[serde(default = "default_clear_color")]
    pub clear_color: [f32; 4],
}

/// 描述符堆容量配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptorConfig {
    #[serde(default = "default_cbv")]
    pub cbv: u32,
    #[serde(default = "default_srv")]
    pub srv: u32,
    #[serde(default = "default_uav")]
    pub uav: u32,
    #[serde(default = "default_rtv")]
    pub rtv: u32,
    #[serde(default = "default_dsv")]
    pub dsv: u32,
    #[serde(default = "default_sampler")]
    pub sampler: u32,
}

/// 软件后端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoftwareConfig {
    /// 每次提交在队列线程上的模拟延迟（微秒）
    #[serde(default)]
    pub submit_latency_us: u64,

    /// vsync 打开时模拟的刷新率
    #[serde(default = "default_refresh_rate")]
    pub refresh_rate_hz: u32,
}

/// 图形后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphicsBackend {
    /// 无窗口的 CPU 参考实现
    Software,
    /// Vulkan 后端
    Vulkan,
    /// DirectX 12 后端
    Dx12,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    #[serde(default = "default_file_output")]
    pub file_output: bool,

    #[serde(default = "default_log_file")]
    pub log_file: String,
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// 演示程序配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoConfig {
    /// 无窗口模式下渲染的帧数
    #[serde(default = "default_frame_count")]
    pub frame_count: u64,
}

// 默认值函数
fn default_width() -> u32 { 1280 }
fn default_height() -> u32 { 720 }
fn default_title() -> String { "DistRHI".to_string() }
fn default_resizable() -> bool { true }
fn default_backend() -> GraphicsBackend { GraphicsBackend::Software }
fn default_vsync() -> u32 { VSYNC }
fn default_frame_buffer_count() -> u32 { FRAME_BUFFER_COUNT }
fn default_clear_color() -> [f32; 4] { [0.1, 0.1, 0.15, 1.0] }
fn default_cbv() -> u32 { CBV_DESC_COUNT }
fn default_srv() -> u32 { SRV_DESC_COUNT }
fn default_uav() -> u32 { UAV_DESC_COUNT }
fn default_rtv() -> u32 { RTV_DESC_COUNT }
fn default_dsv() -> u32 { DSV_DESC_COUNT }
fn default_sampler() -> u32 { MAX_SAMPLER_STATE }
fn default_refresh_rate() -> u32 { 60 }
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_file_output() -> bool { false }
fn default_log_file() -> String { "dist_rhi.log".to_string() }
fn default_frame_count() -> u64 { 120 }

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            title: default_title(),
            resizable: default_resizable(),
        }
    }
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            vsync: default_vsync(),
            frame_buffer_count: default_frame_buffer_count(),
            debug_layer: false,
            hdr: false,
            full_screen: false,
            clear_color: default_clear_color(),
        }
    }
}

impl Default for DescriptorConfig {
    fn default() -> Self {
        Self {
            cbv: default_cbv(),
            srv: default_srv(),
            uav: default_uav(),
            rtv: default_rtv(),
            dsv: default_dsv(),
            sampler: default_sampler(),
        }
    }
}

impl Default for SoftwareConfig {
    fn default() -> Self {
        Self {
            submit_latency_us: 0,
            refresh_rate_hz: default_refresh_rate(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: default_file_output(),
            log_file: default_log_file(),
        }
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            frame_count: default_frame_count(),
        }
    }
}

impl EngineConfig {
    /// 从配置文件加载
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let contents = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path_str.clone()))?;

        Self::from_toml_str(&contents)
    }

    /// 从 TOML 字符串解析
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()).into())
    }

    /// 从配置文件加载，如果文件不存在或无法解析则使用默认配置
    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::from_file(path).unwrap_or_default()
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// 从命令行参数覆盖配置
    ///
    /// 支持的参数：
    /// - `--software` / `--vulkan` / `--dx12`：选择后端
    /// - `--width <value>` / `--height <value>`：窗口尺寸
    /// - `--vsync <value>`：呈现间隔
    /// - `--frames <value>`：无窗口模式渲染帧数
    /// - `--hdr`：使用 HDR 交换链
    pub fn apply_args<I>(&mut self, args: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|s| s.as_ref().to_string()).collect();

        for arg in &args {
            match arg.as_str() {
                "--software" => self.graphics.backend = GraphicsBackend::Software,
                "--vulkan" => self.graphics.backend = GraphicsBackend::Vulkan,
                "--dx12" => self.graphics.backend = GraphicsBackend::Dx12,
                "--hdr" => self.graphics.hdr = true,
                _ => {}
            }
        }

        let value_after = |flag: &str| -> Option<&String> {
            args.iter()
                .position(|a| a == flag)
                .and_then(|idx| args.get(idx + 1))
        };

        if let Some(width) = value_after("--width").and_then(|v| v.parse().ok()) {
            self.window.width = width;
        }
        if let Some(height) = value_after("--height").and_then(|v| v.parse().ok()) {
            self.window.height = height;
        }
        if let Some(vsync) = value_after("--vsync").and_then(|v| v.parse().ok()) {
            self.graphics.vsync = vsync;
        }
        if let Some(frames) = value_after("--frames").and_then(|v| v.parse().ok()) {
            self.demo.frame_count = frames;
        }
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::InvalidValue {
                field: "window.width/height".to_string(),
                reason: "Window dimensions must be greater than 0".to_string(),
            }
            .into());
        }

        if !(2..=4).contains(&self.graphics.frame_buffer_count) {
            return Err(ConfigError::InvalidValue {
                field: "graphics.frame_buffer_count".to_string(),
                reason: "Swapchain must have 2 to 4 back buffers".to_string(),
            }
            .into());
        }

        if self.graphics.vsync > 4 {
            return Err(ConfigError::InvalidValue {
                field: "graphics.vsync".to_string(),
                reason: "Present interval must be in 0..=4".to_string(),
            }
            .into());
        }

        // 每个后备缓冲需要一个内部 RT 和一个深度缓冲
        let d = &self.descriptors;
        if d.rtv < self.graphics.frame_buffer_count || d.dsv < self.graphics.frame_buffer_count {
            return Err(ConfigError::InvalidValue {
                field: "descriptors.rtv/dsv".to_string(),
                reason: format!(
                    "Need at least {} RTV and DSV descriptors for the swapchain frame buffers",
                    self.graphics.frame_buffer_count
                ),
            }
            .into());
        }

        if d.srv == 0 {
            return Err(ConfigError::InvalidValue {
                field: "descriptors.srv".to_string(),
                reason: "SRV heap must not be empty".to_string(),
            }
            .into());
        }

        Ok(())
    }
}

impl GraphicsBackend {
    /// 获取后端名称
    pub fn name(&self) -> &'static str {
        match self {
            GraphicsBackend::Software => "Software",
            GraphicsBackend::Vulkan => "Vulkan",
            GraphicsBackend::Dx12 => "DirectX 12",
        }
    }

    /// 当前构建是否包含该后端
    pub fn is_compiled_in(&self) -> bool {
        match self {
            GraphicsBackend::Software => true,
            GraphicsBackend::Vulkan => cfg!(feature = "vulkan"),
            GraphicsBackend::Dx12 => cfg!(all(windows, feature = "dx12")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.graphics.backend, GraphicsBackend::Software);
        assert_eq!(config.graphics.frame_buffer_count, FRAME_BUFFER_COUNT);
        assert_eq!(config.graphics.vsync, VSYNC);
        assert_eq!(config.descriptors.sampler, MAX_SAMPLER_STATE);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();
        config.window.width = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.graphics.frame_buffer_count = 1;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.descriptors.rtv = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [graphics]
            backend = "vulkan"
            vsync = 1

            [descriptors]
            srv = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.graphics.backend, GraphicsBackend::Vulkan);
        assert_eq!(config.graphics.vsync, 1);
        assert_eq!(config.graphics.frame_buffer_count, FRAME_BUFFER_COUNT);
        assert_eq!(config.descriptors.srv, 8);
        assert_eq!(config.descriptors.cbv, CBV_DESC_COUNT);
        assert_eq!(config.window.height, 720);
    }

    #[test]
    fn test_apply_args() {
        let mut config = EngineConfig::default();
        config.apply_args(["dist_rhi", "--dx12", "--width", "640", "--frames", "7", "--vsync", "2"]);
        assert_eq!(config.graphics.backend, GraphicsBackend::Dx12);
        assert_eq!(config.window.width, 640);
        assert_eq!(config.demo.frame_count, 7);
        assert_eq!(config.graphics.vsync, 2);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = EngineConfig::default();
        config.software.submit_latency_us = 250;
        config.save_to_file(&path).unwrap();

        let loaded = EngineConfig::from_file(&path).unwrap();
        assert_eq!(loaded.software.submit_latency_us, 250);
        assert!(EngineConfig::from_file(dir.path().join("missing.toml")).is_err());
    }
}
