//! D3D12 实例、适配器与设备

use parking_lot::Mutex;
use std::ffi::c_void;
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};
use windows::core::Interface;
use windows::Win32::Graphics::Direct3D::D3D_FEATURE_LEVEL_11_0;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::*;

use crate::core::error::{GraphicsError, Result};
use crate::rhi::render_pass::attachment_extent;
use crate::rhi::resource::check_view_resource;
use crate::rhi::{
    AdapterInfo, BufferDesc, CommandListType, DescriptorLimits, Format, GraphicsApi, InstanceDesc,
    RenderPassDesc, ResourceUsage, ResourceViewDesc, ResourceViewType, RhiAdapter, RhiDescriptorHeap,
    RhiDevice, RhiInstance, RhiRenderPass, RhiTexture, SwapchainDesc, TextureDesc, ViewResource,
    WindowHandle,
};

use super::command_list::Dx12CommandList;
use super::descriptor::Dx12DescriptorHeap;
use super::render_pass::{Dx12FrameBuffer, Dx12RenderPass};
use super::resource::{Dx12Buffer, Dx12QueryHeap, Dx12ResourceView, Dx12Texture};
use super::swapchain::Dx12Swapchain;
use super::sync::{Dx12CommandQueue, Dx12Fence, NativeFence, SubmissionTimeline};
use super::{hr_error, Dx12Backend};

/// DXGI 工厂
pub struct Dx12Instance {
    factory: IDXGIFactory6,
}

unsafe impl Send for Dx12Instance {}
unsafe impl Sync for Dx12Instance {}

fn adapter_name(description: &[u16]) -> String {
    let len = description.iter().position(|&c| c == 0).unwrap_or(description.len());
    String::from_utf16_lossy(&description[..len])
}

impl RhiInstance<Dx12Backend> for Dx12Instance {
    fn create(desc: &InstanceDesc) -> Result<Self> {
        let mut flags = DXGI_CREATE_FACTORY_FLAGS::default();
        if desc.debug_layer {
            let mut debug: Option<ID3D12Debug> = None;
            match unsafe { D3D12GetDebugInterface(&mut debug) } {
                Ok(()) => {
                    if let Some(debug) = debug {
                        unsafe { debug.EnableDebugLayer() };
                        flags = DXGI_CREATE_FACTORY_DEBUG;
                        info!("D3D12 debug layer enabled");
                    }
                }
                Err(e) => warn!("Debug layer requested but unavailable: {}", e.message()),
            }
        }

        let factory: IDXGIFactory6 = unsafe { CreateDXGIFactory2(flags) }
            .map_err(hr_error(GraphicsError::DeviceCreation, "CreateDXGIFactory2"))?;
        info!(debug_layer = flags == DXGI_CREATE_FACTORY_DEBUG, "DXGI factory created");
        Ok(Self { factory })
    }

    fn search_high_performance_adapter(&self) -> Result<Dx12Adapter> {
        let mut best: Option<((bool, u64), Dx12Adapter)> = None;
        let mut index = 0;
        // 按 DXGI 的性能偏好顺序枚举，直到 DXGI_ERROR_NOT_FOUND
        while let Ok(adapter) = unsafe {
            self.factory
                .EnumAdapterByGpuPreference::<IDXGIAdapter1>(index, DXGI_GPU_PREFERENCE_HIGH_PERFORMANCE)
        } {
            index += 1;
            let desc = unsafe { adapter.GetDesc1() }
                .map_err(hr_error(GraphicsError::DeviceCreation, "IDXGIAdapter1::GetDesc1"))?;
            let name = adapter_name(&desc.Description);
            let is_software = desc.Flags & DXGI_ADAPTER_FLAG_SOFTWARE.0 as u32 != 0;

            let probe = unsafe {
                D3D12CreateDevice(
                    &adapter,
                    D3D_FEATURE_LEVEL_11_0,
                    std::ptr::null_mut::<Option<ID3D12Device>>(),
                )
            };
            if probe.is_err() {
                debug!(adapter = %name, "Skipping adapter without feature level 11_0");
                continue;
            }

            let dedicated_video_memory = desc.DedicatedVideoMemory as u64;
            debug!(
                adapter = %name,
                is_software,
                memory_mb = dedicated_video_memory / (1024 * 1024),
                "Found adapter"
            );

            let key = (!is_software, dedicated_video_memory);
            if best.as_ref().map_or(true, |(best_key, _)| key > *best_key) {
                let candidate = Dx12Adapter {
                    factory: self.factory.clone(),
                    adapter,
                    info: AdapterInfo {
                        name,
                        api: GraphicsApi::DirectX12,
                        vendor_id: desc.VendorId,
                        device_id: desc.DeviceId,
                        dedicated_video_memory,
                        is_software,
                    },
                };
                best = Some((key, candidate));
            }
        }

        let (_, adapter) = best.ok_or_else(|| {
            GraphicsError::DeviceCreation("no Direct3D 12 capable adapter found".to_string())
        })?;
        info!(
            adapter = %adapter.info.name,
            vendor_id = adapter.info.vendor_id,
            memory_mb = adapter.info.dedicated_video_memory / (1024 * 1024),
            "Selected adapter"
        );
        Ok(adapter)
    }
}

/// DXGI 适配器
pub struct Dx12Adapter {
    factory: IDXGIFactory6,
    adapter: IDXGIAdapter1,
    info: AdapterInfo,
}

unsafe impl Send for Dx12Adapter {}
unsafe impl Sync for Dx12Adapter {}

fn tearing_supported(factory: &IDXGIFactory6) -> bool {
    let mut allow: i32 = 0;
    let result = unsafe {
        factory.CheckFeatureSupport(
            DXGI_FEATURE_PRESENT_ALLOW_TEARING,
            &mut allow as *mut i32 as *mut c_void,
            std::mem::size_of::<i32>() as u32,
        )
    };
    result.is_ok() && allow != 0
}

impl RhiAdapter<Dx12Backend> for Dx12Adapter {
    fn info(&self) -> &AdapterInfo {
        &self.info
    }

    fn create_device(&self) -> Result<Dx12Device> {
        let mut device: Option<ID3D12Device> = None;
        unsafe { D3D12CreateDevice(&self.adapter, D3D_FEATURE_LEVEL_11_0, &mut device) }
            .map_err(hr_error(GraphicsError::DeviceCreation, "D3D12CreateDevice"))?;
        let device = device
            .ok_or_else(|| GraphicsError::DeviceCreation("D3D12CreateDevice returned no device".to_string()))?;
        if let Ok(object) = device.cast::<ID3D12Object>() {
            super::set_debug_name(&object, &self.info.name);
        }

        let immediate = ImmediateContext::new(&device)?;
        let timestamp_frequency = unsafe { immediate.queue.GetTimestampFrequency() }
            .map_err(hr_error(GraphicsError::DeviceCreation, "GetTimestampFrequency"))?;
        let allow_tearing = tearing_supported(&self.factory);

        info!(
            adapter = %self.info.name,
            timestamp_frequency,
            allow_tearing,
            "D3D12 device created"
        );

        Ok(Dx12Device {
            shared: Arc::new(DeviceShared {
                device,
                factory: self.factory.clone(),
                timestamp_frequency,
                allow_tearing,
                immediate: Mutex::new(immediate),
            }),
            timelines: Mutex::new(Vec::new()),
            destroyed: false,
        })
    }
}

/// 资源创建时的一次性提交（初始状态转换）
struct ImmediateContext {
    queue: ID3D12CommandQueue,
    allocator: ID3D12CommandAllocator,
    list: ID3D12GraphicsCommandList,
    fence: NativeFence,
    value: u64,
}

impl ImmediateContext {
    fn new(device: &ID3D12Device) -> Result<Self> {
        let queue: ID3D12CommandQueue = unsafe {
            device.CreateCommandQueue(&D3D12_COMMAND_QUEUE_DESC {
                Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
                ..Default::default()
            })
        }
        .map_err(hr_error(GraphicsError::DeviceCreation, "CreateCommandQueue"))?;
        let allocator: ID3D12CommandAllocator =
            unsafe { device.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT) }
                .map_err(hr_error(GraphicsError::DeviceCreation, "CreateCommandAllocator"))?;
        let list: ID3D12GraphicsCommandList =
            unsafe { device.CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, &allocator, None) }
                .map_err(hr_error(GraphicsError::DeviceCreation, "CreateCommandList"))?;
        unsafe { list.Close() }.map_err(hr_error(GraphicsError::DeviceCreation, "ID3D12GraphicsCommandList::Close"))?;
        Ok(Self {
            queue,
            allocator,
            list,
            fence: NativeFence::new(device, 0)?,
            value: 0,
        })
    }
}

/// 设备与所有子对象共享的状态
pub(crate) struct DeviceShared {
    pub(crate) device: ID3D12Device,
    pub(crate) factory: IDXGIFactory6,
    pub(crate) timestamp_frequency: u64,
    /// 是否支持 `DXGI_PRESENT_ALLOW_TEARING`
    pub(crate) allow_tearing: bool,
    immediate: Mutex<ImmediateContext>,
}

unsafe impl Send for DeviceShared {}
unsafe impl Sync for DeviceShared {}

impl DeviceShared {
    /// 录制一段命令并同步执行完毕
    pub(crate) fn immediate_submit(&self, record: impl FnOnce(&ID3D12GraphicsCommandList)) -> Result<()> {
        let mut context = self.immediate.lock();
        unsafe {
            context
                .allocator
                .Reset()
                .map_err(hr_error(GraphicsError::CommandExecution, "ID3D12CommandAllocator::Reset"))?;
            context
                .list
                .Reset(&context.allocator, None)
                .map_err(hr_error(GraphicsError::CommandExecution, "ID3D12GraphicsCommandList::Reset"))?;
        }
        record(&context.list);
        unsafe { context.list.Close() }
            .map_err(hr_error(GraphicsError::CommandExecution, "ID3D12GraphicsCommandList::Close"))?;

        let list = context
            .list
            .cast::<ID3D12CommandList>()
            .map_err(hr_error(GraphicsError::CommandExecution, "ID3D12CommandList cast"))?;
        context.value += 1;
        let value = context.value;
        unsafe {
            context.queue.ExecuteCommandLists(&[Some(list)]);
            context
                .queue
                .Signal(&context.fence.fence, value)
                .map_err(hr_error(GraphicsError::CommandExecution, "ID3D12CommandQueue::Signal"))?;
        }
        context.fence.wait(value)
    }
}

impl Drop for DeviceShared {
    fn drop(&mut self) {
        let context = self.immediate.get_mut();
        if let Err(e) = context.fence.wait(context.value) {
            error!("Immediate submission did not finish during teardown: {}", e);
        }
        debug!("D3D12 device destroyed");
    }
}

/// D3D12 设备
pub struct Dx12Device {
    shared: Arc<DeviceShared>,
    /// 已创建队列的提交计数，`wait_idle` 逐个等待
    timelines: Mutex<Vec<Weak<SubmissionTimeline>>>,
    destroyed: bool,
}

impl Dx12Device {
    fn check_alive(&self) -> Result<()> {
        if self.destroyed {
            return Err(GraphicsError::DeviceLost("D3D12 device was destroyed".to_string()).into());
        }
        Ok(())
    }

    pub fn raw(&self) -> &ID3D12Device {
        &self.shared.device
    }
}

impl RhiDevice<Dx12Backend> for Dx12Device {
    fn create_command_queue(&self, queue_type: CommandListType) -> Result<Dx12CommandQueue> {
        self.check_alive()?;
        let queue = Dx12CommandQueue::new(&self.shared.device, queue_type)?;
        let mut timelines = self.timelines.lock();
        timelines.retain(|timeline| timeline.strong_count() > 0);
        timelines.push(Arc::downgrade(queue.timeline()));
        Ok(queue)
    }

    fn create_command_list(&self, list_type: CommandListType) -> Result<Dx12CommandList> {
        self.check_alive()?;
        Dx12CommandList::new(Arc::clone(&self.shared), list_type)
    }

    fn create_fence(&self, initial_value: u64) -> Result<Dx12Fence> {
        self.check_alive()?;
        Dx12Fence::new(&self.shared.device, initial_value)
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<Arc<Dx12Buffer>> {
        self.check_alive()?;
        if desc.size == 0 {
            return Err(GraphicsError::ResourceCreation(format!("buffer '{}' has zero size", desc.name)).into());
        }
        Ok(Arc::new(Dx12Buffer::new(&self.shared, desc)?))
    }

    fn create_texture(&self, desc: &TextureDesc) -> Result<Arc<Dx12Texture>> {
        self.check_alive()?;
        if desc.width == 0 || desc.height == 0 || desc.mip_levels == 0 || desc.depth_or_array_layers == 0 {
            return Err(GraphicsError::ResourceCreation(format!(
                "texture '{}' has an empty extent {}x{}",
                desc.name, desc.width, desc.height
            ))
            .into());
        }
        if desc.format == Format::Unknown {
            return Err(GraphicsError::ResourceCreation(format!("texture '{}' has no format", desc.name)).into());
        }
        Ok(Arc::new(Dx12Texture::new(&self.shared, desc)?))
    }

    fn create_resource_view(
        &self,
        heap: &mut Dx12DescriptorHeap,
        resource: ViewResource<'_, Dx12Backend>,
        desc: &ResourceViewDesc,
    ) -> Result<Arc<Dx12ResourceView>> {
        self.check_alive()?;
        check_view_resource(&resource, desc.view_type)?;

        let id = heap.allocate(desc.view_type.heap_type())?;
        let view = Arc::new(Dx12ResourceView::new(id, resource, desc));
        heap.write(&view)?;
        Ok(view)
    }

    fn create_descriptor_heap(&self, limits: &DescriptorLimits) -> Result<Dx12DescriptorHeap> {
        self.check_alive()?;
        Dx12DescriptorHeap::new(Arc::clone(&self.shared), limits)
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> Result<Arc<Dx12RenderPass>> {
        self.check_alive()?;
        Ok(Arc::new(Dx12RenderPass::new(desc)))
    }

    fn create_frame_buffer(
        &self,
        heap: &mut Dx12DescriptorHeap,
        render_pass: &Arc<Dx12RenderPass>,
        color_attachments: &[Arc<Dx12Texture>],
        depth_attachment: Option<&Arc<Dx12Texture>>,
    ) -> Result<Arc<Dx12FrameBuffer>> {
        self.check_alive()?;
        attachment_extent(render_pass.desc(), color_attachments, depth_attachment)?;
        for texture in color_attachments {
            if !texture.desc().usage.contains(ResourceUsage::RENDER_TARGET) {
                return Err(GraphicsError::ResourceCreation(format!(
                    "{:?} view requires a render target texture, '{}' is not one",
                    ResourceViewType::RenderTarget,
                    texture.desc().name
                ))
                .into());
            }
        }
        if let Some(texture) = depth_attachment {
            if !texture.desc().usage.contains(ResourceUsage::DEPTH_STENCIL) {
                return Err(GraphicsError::ResourceCreation(format!(
                    "{:?} view requires a depth texture, '{}' is not one",
                    ResourceViewType::DepthStencil,
                    texture.desc().name
                ))
                .into());
            }
        }

        Ok(Arc::new(Dx12FrameBuffer::new(
            &self.shared,
            heap,
            render_pass,
            color_attachments,
            depth_attachment,
        )?))
    }

    fn create_swapchain(
        &self,
        graphics_queue: &Dx12CommandQueue,
        window: Option<&WindowHandle>,
        desc: &SwapchainDesc,
    ) -> Result<Dx12Swapchain> {
        self.check_alive()?;
        let window = window.ok_or_else(|| {
            GraphicsError::Unsupported("the DirectX 12 backend needs a window to create a swapchain".to_string())
        })?;
        Dx12Swapchain::new(Arc::clone(&self.shared), graphics_queue, window, desc)
    }

    fn create_query_heap(&self, count: u32) -> Result<Arc<Dx12QueryHeap>> {
        self.check_alive()?;
        Ok(Arc::new(Dx12QueryHeap::new(&self.shared, count)?))
    }

    fn wait_idle(&self) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }
        let timelines: Vec<Arc<SubmissionTimeline>> =
            self.timelines.lock().iter().filter_map(Weak::upgrade).collect();
        for timeline in timelines {
            timeline.drain()?;
        }
        Ok(())
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        if let Err(e) = self.wait_idle() {
            error!("Failed to drain the device before destruction: {}", e);
        }
        self.timelines.lock().clear();
        self.destroyed = true;
        info!(
            outstanding_refs = Arc::strong_count(&self.shared) - 1,
            "D3D12 device destroyed, native handle released with its last user"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_name_stops_at_nul() {
        let mut description = [0u16; 128];
        for (slot, c) in description.iter_mut().zip("Radeon RX".encode_utf16()) {
            *slot = c;
        }
        assert_eq!(adapter_name(&description), "Radeon RX");
        let full: Vec<u16> = "abc".encode_utf16().collect();
        assert_eq!(adapter_name(&full), "abc");
    }
}
