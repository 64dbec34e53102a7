//! 软件实例、适配器与设备
//!
//! 设备持有一个 [`DeviceShared`]，队列线程与交换链共享它来读取时钟和累计统计。

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::core::error::{GraphicsError, Result};
use crate::rhi::render_pass::attachment_extent;
use crate::rhi::{
    AdapterInfo, BufferDesc, CommandListType, DescriptorLimits, GraphicsApi, InstanceDesc,
    RenderPassDesc, ResourceUsage, ResourceViewDesc, ResourceViewType, RhiAdapter, RhiDescriptorHeap,
    RhiDevice, RhiInstance, RhiTexture, SwapchainDesc, TextureDesc, ViewResource, WindowHandle,
};

use super::command_list::SoftwareCommandList;
use super::descriptor::{SoftwareDescriptor, SoftwareDescriptorHeap};
use super::render_pass::{SoftwareFrameBuffer, SoftwareRenderPass};
use super::resource::{SoftwareBuffer, SoftwareQueryHeap, SoftwareResourceView, SoftwareTexture};
use super::swapchain::SoftwareSwapchain;
use super::sync::{QueueShared, SoftwareCommandQueue, SoftwareFence};
use super::SoftwareBackend;

/// 设备统计的一次快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStatsSnapshot {
    pub submissions: u64,
    pub draw_calls: u64,
    /// 顶点 / 索引数乘以实例数之和
    pub vertices: u64,
    pub dispatches: u64,
    pub thread_groups: u64,
    pub copies: u64,
    pub barriers: u64,
    pub render_passes: u64,
    pub presents: u64,
}

/// 队列线程累计的统计
#[derive(Debug, Default)]
pub struct DeviceStatistics {
    submissions: AtomicU64,
    draw_calls: AtomicU64,
    vertices: AtomicU64,
    dispatches: AtomicU64,
    thread_groups: AtomicU64,
    copies: AtomicU64,
    barriers: AtomicU64,
    render_passes: AtomicU64,
    presents: AtomicU64,
}

impl DeviceStatistics {
    pub(crate) fn record_submission(&self) {
        self.submissions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_draw(&self, vertices: u64) {
        self.draw_calls.fetch_add(1, Ordering::Relaxed);
        self.vertices.fetch_add(vertices, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatch(&self, groups: u64) {
        self.dispatches.fetch_add(1, Ordering::Relaxed);
        self.thread_groups.fetch_add(groups, Ordering::Relaxed);
    }

    pub(crate) fn record_copy(&self) {
        self.copies.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_barriers(&self, count: u32) {
        self.barriers.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_render_pass(&self) {
        self.render_passes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_present(&self) {
        self.presents.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DeviceStatsSnapshot {
        DeviceStatsSnapshot {
            submissions: self.submissions.load(Ordering::Relaxed),
            draw_calls: self.draw_calls.load(Ordering::Relaxed),
            vertices: self.vertices.load(Ordering::Relaxed),
            dispatches: self.dispatches.load(Ordering::Relaxed),
            thread_groups: self.thread_groups.load(Ordering::Relaxed),
            copies: self.copies.load(Ordering::Relaxed),
            barriers: self.barriers.load(Ordering::Relaxed),
            render_passes: self.render_passes.load(Ordering::Relaxed),
            presents: self.presents.load(Ordering::Relaxed),
        }
    }
}

/// 设备与队列线程共享的状态
pub(crate) struct DeviceShared {
    clock: Instant,
    pub(crate) stats: DeviceStatistics,
    pub(crate) submit_latency: Duration,
    pub(crate) refresh_rate_hz: u32,
}

impl DeviceShared {
    fn new(submit_latency: Duration, refresh_rate_hz: u32) -> Arc<Self> {
        Arc::new(Self {
            clock: Instant::now(),
            stats: DeviceStatistics::default(),
            submit_latency,
            refresh_rate_hz: refresh_rate_hz.max(1),
        })
    }

    /// 设备创建以来的纳秒数
    pub(crate) fn now_ticks(&self) -> u64 {
        self.clock.elapsed().as_nanos() as u64
    }

    #[cfg(test)]
    pub(crate) fn for_tests(submit_latency: Duration) -> Arc<Self> {
        Self::new(submit_latency, 60)
    }
}

/// 软件实例
pub struct SoftwareInstance {
    desc: InstanceDesc,
}

impl RhiInstance<SoftwareBackend> for SoftwareInstance {
    fn create(desc: &InstanceDesc) -> Result<Self> {
        if desc.debug_layer {
            debug!("Software backend validates command recording through debug assertions");
        }
        Ok(Self { desc: desc.clone() })
    }

    fn search_high_performance_adapter(&self) -> Result<SoftwareAdapter> {
        Ok(SoftwareAdapter {
            info: AdapterInfo {
                name: "DistRHI Software Rasterizer".to_string(),
                api: GraphicsApi::Software,
                vendor_id: 0,
                device_id: 0,
                dedicated_video_memory: 0,
                is_software: true,
            },
            submit_latency: self.desc.simulated_submit_latency,
            refresh_rate_hz: self.desc.simulated_refresh_rate_hz,
        })
    }
}

/// 软件适配器
pub struct SoftwareAdapter {
    info: AdapterInfo,
    submit_latency: Duration,
    refresh_rate_hz: u32,
}

impl RhiAdapter<SoftwareBackend> for SoftwareAdapter {
    fn info(&self) -> &AdapterInfo {
        &self.info
    }

    fn create_device(&self) -> Result<SoftwareDevice> {
        info!(
            adapter = %self.info.name,
            submit_latency_us = self.submit_latency.as_micros() as u64,
            "Creating software device"
        );
        Ok(SoftwareDevice {
            shared: DeviceShared::new(self.submit_latency, self.refresh_rate_hz),
            queues: Mutex::new(Vec::new()),
            destroyed: false,
        })
    }
}

/// 软件设备
pub struct SoftwareDevice {
    shared: Arc<DeviceShared>,
    queues: Mutex<Vec<Weak<QueueShared>>>,
    destroyed: bool,
}

impl SoftwareDevice {
    /// 队列线程累计的统计
    pub fn statistics(&self) -> DeviceStatsSnapshot {
        self.shared.stats.snapshot()
    }

    fn check_alive(&self) -> Result<()> {
        if self.destroyed {
            return Err(GraphicsError::DeviceLost("software device was destroyed".to_string()).into());
        }
        Ok(())
    }
}

fn view_mismatch(view_type: ResourceViewType, what: &str) -> crate::core::error::DistRhiError {
    GraphicsError::ResourceCreation(format!("{:?} view requires {}", view_type, what)).into()
}

impl RhiDevice<SoftwareBackend> for SoftwareDevice {
    fn create_command_queue(&self, queue_type: CommandListType) -> Result<SoftwareCommandQueue> {
        self.check_alive()?;
        let queue = SoftwareCommandQueue::new(queue_type, Arc::clone(&self.shared))?;
        let mut queues = self.queues.lock();
        queues.retain(|q| q.strong_count() > 0);
        queues.push(Arc::downgrade(queue.shared()));
        Ok(queue)
    }

    fn create_command_list(&self, list_type: CommandListType) -> Result<SoftwareCommandList> {
        self.check_alive()?;
        Ok(SoftwareCommandList::new(list_type, Arc::clone(&self.shared)))
    }

    fn create_fence(&self, initial_value: u64) -> Result<SoftwareFence> {
        self.check_alive()?;
        Ok(SoftwareFence::new(initial_value))
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<Arc<SoftwareBuffer>> {
        self.check_alive()?;
        if desc.size == 0 {
            return Err(GraphicsError::ResourceCreation(format!("buffer '{}' has zero size", desc.name)).into());
        }
        Ok(Arc::new(SoftwareBuffer::new(desc)))
    }

    fn create_texture(&self, desc: &TextureDesc) -> Result<Arc<SoftwareTexture>> {
        self.check_alive()?;
        if desc.width == 0 || desc.height == 0 || desc.mip_levels == 0 || desc.depth_or_array_layers == 0 {
            return Err(GraphicsError::ResourceCreation(format!(
                "texture '{}' has an empty extent {}x{}",
                desc.name, desc.width, desc.height
            ))
            .into());
        }
        if desc.format.bytes_per_pixel() == 0 {
            return Err(GraphicsError::ResourceCreation(format!("texture '{}' has no format", desc.name)).into());
        }
        Ok(Arc::new(SoftwareTexture::new(desc)))
    }

    fn create_resource_view(
        &self,
        heap: &mut SoftwareDescriptorHeap,
        resource: ViewResource<'_, SoftwareBackend>,
        desc: &ResourceViewDesc,
    ) -> Result<Arc<SoftwareResourceView>> {
        self.check_alive()?;
        let view_type = desc.view_type;
        let (descriptor, buffer, texture) = match (view_type, resource) {
            (ResourceViewType::Sampler, ViewResource::None) => (
                SoftwareDescriptor::Sampler(desc.sampler.unwrap_or_default()),
                None,
                None,
            ),
            (ResourceViewType::Sampler, _) => return Err(view_mismatch(view_type, "no resource")),
            (_, ViewResource::None) => return Err(view_mismatch(view_type, "a resource")),
            (ResourceViewType::RenderTarget | ResourceViewType::DepthStencil, ViewResource::Buffer(_)) => {
                return Err(view_mismatch(view_type, "a texture"))
            }
            (_, ViewResource::Buffer(buffer)) => (
                SoftwareDescriptor::Buffer {
                    buffer: Arc::clone(buffer),
                    view_type,
                },
                Some(Arc::clone(buffer)),
                None,
            ),
            (_, ViewResource::Texture(texture)) => {
                let required = match view_type {
                    ResourceViewType::RenderTarget => ResourceUsage::RENDER_TARGET,
                    ResourceViewType::DepthStencil => ResourceUsage::DEPTH_STENCIL,
                    ResourceViewType::UnorderedAccess => ResourceUsage::UNORDERED_ACCESS,
                    _ => ResourceUsage::empty(),
                };
                if !texture.desc().usage.contains(required) {
                    return Err(view_mismatch(view_type, "a texture created with the matching usage"));
                }
                let format = match desc.format {
                    crate::rhi::Format::Unknown => texture.format(),
                    format => format,
                };
                (
                    SoftwareDescriptor::Texture {
                        texture: Arc::clone(texture),
                        view_type,
                        format,
                    },
                    None,
                    Some(Arc::clone(texture)),
                )
            }
        };

        let id = heap.allocate(view_type.heap_type())?;
        heap.write(id, descriptor);
        Ok(Arc::new(SoftwareResourceView {
            desc: *desc,
            id,
            buffer,
            texture,
        }))
    }

    fn create_descriptor_heap(&self, limits: &DescriptorLimits) -> Result<SoftwareDescriptorHeap> {
        self.check_alive()?;
        SoftwareDescriptorHeap::new(limits)
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> Result<Arc<SoftwareRenderPass>> {
        self.check_alive()?;
        Ok(Arc::new(SoftwareRenderPass { desc: desc.clone() }))
    }

    fn create_frame_buffer(
        &self,
        heap: &mut SoftwareDescriptorHeap,
        render_pass: &Arc<SoftwareRenderPass>,
        color_attachments: &[Arc<SoftwareTexture>],
        depth_attachment: Option<&Arc<SoftwareTexture>>,
    ) -> Result<Arc<SoftwareFrameBuffer>> {
        self.check_alive()?;
        let (width, height) = attachment_extent(&render_pass.desc, color_attachments, depth_attachment)?;

        let mut rtv_ids = Vec::with_capacity(color_attachments.len());
        for texture in color_attachments {
            let view = self.create_resource_view(
                heap,
                ViewResource::Texture(texture),
                &ResourceViewDesc::new(ResourceViewType::RenderTarget),
            )?;
            rtv_ids.push(view.id);
        }
        let dsv_id = match depth_attachment {
            Some(texture) => Some(
                self.create_resource_view(
                    heap,
                    ViewResource::Texture(texture),
                    &ResourceViewDesc::new(ResourceViewType::DepthStencil),
                )?
                .id,
            ),
            None => None,
        };

        Ok(Arc::new(SoftwareFrameBuffer {
            render_pass: Arc::clone(render_pass),
            colors: color_attachments.to_vec(),
            depth: depth_attachment.cloned(),
            rtv_ids,
            dsv_id,
            width,
            height,
        }))
    }

    fn create_swapchain(
        &self,
        graphics_queue: &SoftwareCommandQueue,
        window: Option<&WindowHandle>,
        desc: &SwapchainDesc,
    ) -> Result<SoftwareSwapchain> {
        self.check_alive()?;
        if window.is_some() {
            warn!("Software swapchain ignores the window handle; images are kept off-screen");
        }
        SoftwareSwapchain::new(graphics_queue.clone(), Arc::clone(&self.shared), desc)
    }

    fn create_query_heap(&self, count: u32) -> Result<Arc<SoftwareQueryHeap>> {
        self.check_alive()?;
        Ok(Arc::new(SoftwareQueryHeap::new(count)))
    }

    fn wait_idle(&self) -> Result<()> {
        let queues: Vec<Arc<QueueShared>> = self.queues.lock().iter().filter_map(Weak::upgrade).collect();
        for queue in queues {
            queue.drain()?;
        }
        Ok(())
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        if let Err(e) = self.wait_idle() {
            warn!("wait_idle during device destruction failed: {}", e);
        }
        self.queues.lock().clear();
        self.destroyed = true;
        debug!("Software device destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rhi::{DescriptorHeapType, Format, RhiResourceView, SamplerDesc};

    fn limits() -> DescriptorLimits {
        DescriptorLimits {
            srv: 8,
            sampler: 4,
            rtv: 4,
            dsv: 4,
            ..DescriptorLimits::default()
        }
    }

    fn device() -> SoftwareDevice {
        let instance = SoftwareInstance::create(&InstanceDesc::default()).unwrap();
        instance.search_high_performance_adapter().unwrap().create_device().unwrap()
    }

    #[test]
    fn test_adapter_is_software() {
        let instance = SoftwareInstance::create(&InstanceDesc::default()).unwrap();
        let adapter = instance.search_high_performance_adapter().unwrap();
        assert!(adapter.info().is_software);
        assert_eq!(adapter.info().api, GraphicsApi::Software);
    }

    #[test]
    fn test_views_validate_resources() {
        let device = device();
        let mut heap = device.create_descriptor_heap(&limits()).unwrap();
        let texture = device
            .create_texture(&TextureDesc::new_2d(4, 4, Format::Rgba8Unorm, ResourceUsage::SHADER_RESOURCE))
            .unwrap();

        let srv = device
            .create_resource_view(&mut heap, ViewResource::Texture(&texture), &ResourceViewDesc::shader_resource())
            .unwrap();
        assert_eq!(srv.descriptor_id().heap_type, DescriptorHeapType::Srv);
        assert!(srv.texture().is_some());

        // 没有 RENDER_TARGET 用途的纹理不能创建 RTV
        assert!(device
            .create_resource_view(
                &mut heap,
                ViewResource::Texture(&texture),
                &ResourceViewDesc::new(ResourceViewType::RenderTarget)
            )
            .is_err());

        let sampler = device
            .create_resource_view(&mut heap, ViewResource::None, &ResourceViewDesc::sampler(SamplerDesc::default()))
            .unwrap();
        assert!(matches!(heap.descriptor(sampler.descriptor_id()), Some(SoftwareDescriptor::Sampler(_))));
    }

    #[test]
    fn test_frame_buffer_allocates_rtv_and_dsv() {
        let device = device();
        let mut heap = device.create_descriptor_heap(&limits()).unwrap();
        let color = device
            .create_texture(&TextureDesc::new_2d(8, 8, Format::Bgra8Unorm, ResourceUsage::RENDER_TARGET))
            .unwrap();
        let depth = device
            .create_texture(&TextureDesc::new_2d(8, 8, Format::D32Float, ResourceUsage::DEPTH_STENCIL))
            .unwrap();
        let pass = device
            .create_render_pass(&RenderPassDesc::swapchain(Format::Bgra8Unorm, Format::D32Float, [0.0; 4]))
            .unwrap();

        let fb = device
            .create_frame_buffer(&mut heap, &pass, &[color], Some(&depth))
            .unwrap();
        assert_eq!(fb.rtv_ids.len(), 1);
        assert!(fb.dsv_id.is_some());
        assert_eq!(heap.stats(DescriptorHeapType::Rtv).used, 1);
        assert_eq!(heap.stats(DescriptorHeapType::Dsv).used, 1);
    }

    #[test]
    fn test_destroyed_device_rejects_creation() {
        let mut device = device();
        let _queue = device.create_command_queue(CommandListType::Graphics).unwrap();
        device.destroy();
        device.destroy();
        assert!(device.create_fence(0).is_err());
    }
}
