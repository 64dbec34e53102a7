//! 实例、适配器与设备
//!
//! 启动顺序：`RhiInstance::create` → `search_high_performance_adapter`
//! → `RhiAdapter::create_device` → 由设备创建其余所有对象。

use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use std::sync::Arc;
use std::time::Duration;

use super::descriptor::DescriptorLimits;
use super::render_pass::RenderPassDesc;
use super::resource::{BufferDesc, ResourceViewDesc, TextureDesc, ViewResource};
use super::swapchain::SwapchainDesc;
use super::types::{CommandListType, GraphicsApi};
use super::RhiBackend;
use crate::core::error::{DistRhiError, Result};

/// 实例创建参数
#[derive(Debug, Clone)]
pub struct InstanceDesc {
    pub application_name: String,
    /// 是否开启校验层 / 调试层
    pub debug_layer: bool,
    /// 软件后端：每次提交在队列线程上额外耗费的时间
    pub simulated_submit_latency: Duration,
    /// 软件后端：垂直同步时模拟的刷新率
    pub simulated_refresh_rate_hz: u32,
}

impl Default for InstanceDesc {
    fn default() -> Self {
        Self {
            application_name: "DistRHI".to_string(),
            debug_layer: false,
            simulated_submit_latency: Duration::ZERO,
            simulated_refresh_rate_hz: 60,
        }
    }
}

/// 适配器信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    pub name: String,
    pub api: GraphicsApi,
    pub vendor_id: u32,
    pub device_id: u32,
    /// 专用显存（字节）
    pub dedicated_video_memory: u64,
    pub is_software: bool,
}

/// 交给交换链的原生窗口句柄
#[derive(Debug, Clone, Copy)]
pub struct WindowHandle {
    pub window: RawWindowHandle,
    pub display: RawDisplayHandle,
}

impl WindowHandle {
    pub fn from_window<W: HasWindowHandle + HasDisplayHandle>(window: &W) -> Result<Self> {
        let window_handle = window
            .window_handle()
            .map_err(|e| DistRhiError::Initialization(format!("window handle: {}", e)))?;
        let display_handle = window
            .display_handle()
            .map_err(|e| DistRhiError::Initialization(format!("display handle: {}", e)))?;
        Ok(Self {
            window: window_handle.as_raw(),
            display: display_handle.as_raw(),
        })
    }
}

/// 图形 API 实例
pub trait RhiInstance<B: RhiBackend>: Sized + Send {
    fn create(desc: &InstanceDesc) -> Result<Self>;

    /// 选择显存最大的独立显卡，没有时退回集成 / 软件适配器
    fn search_high_performance_adapter(&self) -> Result<B::Adapter>;
}

/// 物理适配器
pub trait RhiAdapter<B: RhiBackend>: Send {
    fn info(&self) -> &AdapterInfo;

    fn create_device(&self) -> Result<B::Device>;
}

/// 逻辑设备
pub trait RhiDevice<B: RhiBackend>: Send {
    fn create_command_queue(&self, queue_type: CommandListType) -> Result<B::CommandQueue>;

    fn create_command_list(&self, list_type: CommandListType) -> Result<B::CommandList>;

    fn create_fence(&self, initial_value: u64) -> Result<B::Fence>;

    fn create_buffer(&self, desc: &BufferDesc) -> Result<Arc<B::Buffer>>;

    fn create_texture(&self, desc: &TextureDesc) -> Result<Arc<B::Texture>>;

    /// 在 `heap` 中分配槽位并写入视图
    fn create_resource_view(
        &self,
        heap: &mut B::DescriptorHeap,
        resource: ViewResource<'_, B>,
        desc: &ResourceViewDesc,
    ) -> Result<Arc<B::ResourceView>>;

    fn create_descriptor_heap(&self, limits: &DescriptorLimits) -> Result<B::DescriptorHeap>;

    fn create_render_pass(&self, desc: &RenderPassDesc) -> Result<Arc<B::RenderPass>>;

    /// 创建帧缓冲，RTV/DSV 从 `heap` 中分配
    fn create_frame_buffer(
        &self,
        heap: &mut B::DescriptorHeap,
        render_pass: &Arc<B::RenderPass>,
        color_attachments: &[Arc<B::Texture>],
        depth_attachment: Option<&Arc<B::Texture>>,
    ) -> Result<Arc<B::FrameBuffer>>;

    /// `window` 为 `None` 时仅无窗口后端可用
    fn create_swapchain(
        &self,
        graphics_queue: &B::CommandQueue,
        window: Option<&WindowHandle>,
        desc: &SwapchainDesc,
    ) -> Result<B::Swapchain>;

    fn create_query_heap(&self, count: u32) -> Result<Arc<B::QueryHeap>>;

    /// 阻塞直到设备上所有工作完成
    fn wait_idle(&self) -> Result<()>;

    /// 显式销毁设备。之后除 drop 外不应再调用任何方法。
    fn destroy(&mut self);
}
