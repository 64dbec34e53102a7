//! 图形后端模块
//!
//! 每个后端实现 [`crate::rhi::RhiBackend`] 的全部关联类型：
//! - software：CPU 参考实现，队列由线程模拟，始终可用
//! - vulkan：跨平台的现代图形 API（feature `vulkan`）
//! - dx12：Windows 平台的 DirectX 12（feature `dx12`）

pub mod software;
#[cfg(feature = "vulkan")]
pub mod vulkan;
#[cfg(all(windows, feature = "dx12"))]
pub mod dx12;
