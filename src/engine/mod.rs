//! 低层图形引擎
//!
//! [`LowLevelGraphicsEngine`] 拥有一套完整的 RHI 对象，并按固定协议推进每一帧：
//!
//! ```text
//! begin_draw_frame ── 打开 Graphics / Compute 列表，记录起始校准时间戳
//!        │
//!        ▼  应用录制命令（可多次 flush_gpu_commands 提前提交）
//! end_draw_frame
//!   ├─ Compute: end → execute → signal N
//!   ├─ Graphics: wait N → 内部渲染目标拷贝到后备缓冲 → end → execute → signal M
//!   ├─ present(M) → CPU wait(M) → 帧计时
//!   └─ prepare_next_image
//! ```
//!
//! 帧与帧之间不做流水：CPU 在等到本帧的 present 值之后才开始下一帧。

pub mod context;
pub mod timing;

pub use context::ResourceContext;
pub use timing::{FrameStatistics, FrameTiming};

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace};

use crate::core::config::EngineConfig;
use crate::core::error::{DistRhiError, GraphicsError, Result};
use crate::rhi::queue::ticks_to_duration;
use crate::rhi::{
    CalibrationTimestamp, ClearValue, CommandListType, DescriptorLimits, FenceValue, Format,
    HeapResetMode, InstanceDesc, RenderPassDesc, ResourceRef, ResourceState, ResourceUsage,
    RhiAdapter, RhiBackend, RhiCommandList, RhiCommandQueue, RhiDescriptorHeap, RhiDevice,
    RhiFence, RhiFrameBuffer, RhiInstance, RhiQueryHeap, RhiRenderPass, RhiSwapchain, RhiTexture, ScissorRect,
    SwapchainDesc, TextureDesc, Viewport, WindowHandle,
};

/// 帧缓冲深度格式
pub const DEPTH_FORMAT: Format = Format::D32Float;

/// 每帧的时间戳查询：帧开始、拷贝到后备缓冲之后
const TIMESTAMP_QUERY_COUNT: u32 = 2;

const GRAPHICS: usize = 0;
const COMPUTE: usize = 1;

fn invalid_state(msg: &str) -> DistRhiError {
    error!("{}", msg);
    GraphicsError::InvalidState(msg.to_string()).into()
}

fn not_running() -> DistRhiError {
    invalid_state("graphics engine is not running")
}

/// 引擎拥有的全部 RHI 对象
///
/// 字段的销毁顺序由 [`LowLevelGraphicsEngine::shut_down`] 显式控制。
struct EngineResources<B: RhiBackend> {
    instance: B::Instance,
    adapter: B::Adapter,
    device: B::Device,
    /// 按 [`CommandListType::index`] 排列
    queues: Vec<B::CommandQueue>,
    lists: Vec<B::CommandList>,
    fence: B::Fence,
    /// 最近一次 signal 的值
    fence_value: FenceValue,
    /// 当前帧开始时的 fence 值
    frame_base_value: u64,
    swapchain: B::Swapchain,
    rt_heap: B::DescriptorHeap,
    shader_heap: B::DescriptorHeap,
    render_pass: Arc<B::RenderPass>,
    frame_buffers: Vec<Arc<B::FrameBuffer>>,
    query_heap: Arc<B::QueryHeap>,
    staging: Vec<Arc<B::Buffer>>,
    clear_color: [f32; 4],
}

impl<B: RhiBackend> EngineResources<B> {
    /// 在指定队列上 signal 下一个 fence 值
    fn signal(&mut self, queue_type: CommandListType) -> Result<u64> {
        let value = self.fence_value.increment();
        self.queues[queue_type.index()].signal(&self.fence, value)?;
        trace!(queue = queue_type.name(), value, "Fence signal");
        Ok(value)
    }

    /// 等待所有队列空闲
    fn drain(&self) -> Result<()> {
        self.device.wait_idle()?;
        self.fence.wait(self.fence_value.value())
    }

    /// 获取下一张后备缓冲，并把当前值记为新一帧的起点
    ///
    /// 交换链过期时先重建交换链和帧缓冲，再获取一次。
    fn acquire(&mut self) -> Result<u32> {
        match self.try_acquire() {
            Err(DistRhiError::Graphics(GraphicsError::SwapchainOutOfDate)) => {
                crate::engine_warn!("Swapchain out of date, rebuilding render targets");
                self.drain()?;
                self.frame_buffers.clear();
                let (width, height) = (self.swapchain.desc().width, self.swapchain.desc().height);
                self.swapchain.resize(width, height)?;
                self.rebuild_render_targets()?;
                self.try_acquire()
            }
            other => other,
        }
    }

    /// 获取失败时 fence 值不前进，未 signal 的值不能留给之后的等待
    fn try_acquire(&mut self) -> Result<u32> {
        let value = self.fence_value.next().value();
        let index = self.swapchain.prepare_next_image(&self.fence, value)?;
        self.fence_value.increment();
        self.frame_base_value = value;
        Ok(index)
    }

    /// 帧缓冲当前的尺寸
    fn render_extent(&self) -> Option<(u32, u32)> {
        self.frame_buffers.first().map(|fb| (fb.width(), fb.height()))
    }

    /// 交换链尺寸或格式变化后重建渲染通道与帧缓冲
    fn rebuild_render_targets(&mut self) -> Result<()> {
        self.frame_buffers.clear();
        self.rt_heap.reset(HeapResetMode::Recreate)?;

        let format = back_buffer_format::<B>(&self.swapchain);
        if self.render_pass.desc().color_attachments[0].format != format {
            self.render_pass = self.device.create_render_pass(&RenderPassDesc::swapchain(
                format,
                DEPTH_FORMAT,
                self.clear_color,
            ))?;
        }
        self.frame_buffers = create_frame_buffers::<B>(
            &self.device,
            &mut self.rt_heap,
            &self.render_pass,
            &self.swapchain,
            self.clear_color,
        )?;
        Ok(())
    }
}

/// 后备缓冲实际使用的格式。HDR 不可用时后端会回退到 SDR 格式，
/// 帧缓冲必须跟随它，否则无法整资源拷贝。
fn back_buffer_format<B: RhiBackend>(swapchain: &B::Swapchain) -> Format {
    if swapchain.image_count() == 0 {
        return swapchain.desc().back_buffer_format();
    }
    swapchain.back_buffer(0).desc().format
}

/// 每张后备缓冲对应一个帧缓冲：与交换链同格式的颜色目标 + 深度缓冲
fn create_frame_buffers<B: RhiBackend>(
    device: &B::Device,
    heap: &mut B::DescriptorHeap,
    render_pass: &Arc<B::RenderPass>,
    swapchain: &B::Swapchain,
    clear_color: [f32; 4],
) -> Result<Vec<Arc<B::FrameBuffer>>> {
    let desc = swapchain.desc();
    let format = back_buffer_format::<B>(swapchain);
    let mut frame_buffers = Vec::with_capacity(swapchain.image_count() as usize);
    for i in 0..swapchain.image_count() {
        let color = device.create_texture(
            &TextureDesc::new_2d(
                desc.width,
                desc.height,
                format,
                ResourceUsage::RENDER_TARGET | ResourceUsage::COPY_SRC | ResourceUsage::SHADER_RESOURCE,
            )
            .with_initial_state(ResourceState::RenderTarget)
            .with_clear_value(ClearValue::Color(clear_color))
            .with_name(format!("FrameColor{}", i)),
        )?;
        let depth = device.create_texture(
            &TextureDesc::new_2d(desc.width, desc.height, DEPTH_FORMAT, ResourceUsage::DEPTH_STENCIL)
                .with_initial_state(ResourceState::DepthWrite)
                .with_clear_value(ClearValue::DEPTH_ONE)
                .with_name(format!("FrameDepth{}", i)),
        )?;
        frame_buffers.push(device.create_frame_buffer(heap, render_pass, &[color], Some(&depth))?);
    }
    Ok(frame_buffers)
}

/// 低层图形引擎
///
/// 对后端泛型化；每种命令列表类型各一个队列和一个命令列表，
/// 一个 fence 贯穿所有队列。
pub struct LowLevelGraphicsEngine<B: RhiBackend> {
    resources: Option<EngineResources<B>>,
    current_frame_index: u32,
    frame_begin: Option<CalibrationTimestamp>,
    in_frame: bool,
    frame_number: u64,
    last_frame_timing: Option<FrameTiming>,
    statistics: FrameStatistics,
    has_called_shut_down: bool,
}

impl<B: RhiBackend> LowLevelGraphicsEngine<B> {
    /// 按 Instance → Adapter → Device → Queues → CommandLists → Fence → Swapchain
    /// → DescriptorHeaps → RenderPass → FrameBuffers → QueryHeap 的顺序创建所有对象，
    /// 并获取第一张后备缓冲。
    pub fn start_up(config: &EngineConfig, window: Option<WindowHandle>) -> Result<Self> {
        config.validate()?;
        let graphics = &config.graphics;
        info!(
            api = %B::API,
            width = config.window.width,
            height = config.window.height,
            frame_buffer_count = graphics.frame_buffer_count,
            "Starting low-level graphics engine"
        );

        let instance = B::Instance::create(&InstanceDesc {
            application_name: config.window.title.clone(),
            debug_layer: graphics.debug_layer,
            simulated_submit_latency: Duration::from_micros(config.software.submit_latency_us),
            simulated_refresh_rate_hz: config.software.refresh_rate_hz,
        })?;
        let adapter = instance.search_high_performance_adapter()?;
        let adapter_info = adapter.info();
        info!(
            adapter = %adapter_info.name,
            vendor_id = adapter_info.vendor_id,
            video_memory_mb = adapter_info.dedicated_video_memory / (1024 * 1024),
            "Selected adapter"
        );
        let device = adapter.create_device()?;

        let mut queues = Vec::with_capacity(CommandListType::ALL.len());
        let mut lists = Vec::with_capacity(CommandListType::ALL.len());
        for list_type in CommandListType::ALL {
            queues.push(device.create_command_queue(list_type)?);
        }
        for list_type in CommandListType::ALL {
            lists.push(device.create_command_list(list_type)?);
        }
        let fence = device.create_fence(0)?;

        let swapchain = device.create_swapchain(
            &queues[GRAPHICS],
            window.as_ref(),
            &SwapchainDesc {
                width: config.window.width,
                height: config.window.height,
                frame_buffer_count: graphics.frame_buffer_count,
                format: SwapchainDesc::SDR_FORMAT,
                vsync: graphics.vsync,
                hdr: graphics.hdr,
                full_screen: graphics.full_screen,
            },
        )?;

        let mut rt_heap = device.create_descriptor_heap(&DescriptorLimits::render_targets(&config.descriptors))?;
        let shader_heap = device.create_descriptor_heap(&DescriptorLimits::shader_visible(&config.descriptors))?;

        let render_pass = device.create_render_pass(&RenderPassDesc::swapchain(
            back_buffer_format::<B>(&swapchain),
            DEPTH_FORMAT,
            graphics.clear_color,
        ))?;
        let frame_buffers =
            create_frame_buffers::<B>(&device, &mut rt_heap, &render_pass, &swapchain, graphics.clear_color)?;
        let query_heap = device.create_query_heap(TIMESTAMP_QUERY_COUNT)?;

        let mut resources = EngineResources {
            instance,
            adapter,
            device,
            queues,
            lists,
            fence,
            fence_value: FenceValue::default(),
            frame_base_value: 0,
            swapchain,
            rt_heap,
            shader_heap,
            render_pass,
            frame_buffers,
            query_heap,
            staging: Vec::new(),
            clear_color: graphics.clear_color,
        };
        let current_frame_index = resources.acquire()?;

        crate::engine_info!(api = %B::API, "Graphics engine started");
        Ok(Self {
            resources: Some(resources),
            current_frame_index,
            frame_begin: None,
            in_frame: false,
            frame_number: 0,
            last_frame_timing: None,
            statistics: FrameStatistics::new(),
            has_called_shut_down: false,
        })
    }

    /// 打开图形与计算命令列表，开始新的一帧
    pub fn begin_draw_frame(&mut self) -> Result<()> {
        if self.in_frame {
            return Err(invalid_state("begin_draw_frame called before end_draw_frame"));
        }
        let res = self.resources.as_mut().ok_or_else(not_running)?;
        res.lists[GRAPHICS].begin_recording(false)?;
        res.lists[COMPUTE].begin_recording(false)?;

        self.frame_begin = Some(res.queues[GRAPHICS].calibration_timestamp()?);
        res.lists[GRAPHICS].write_timestamp(&res.query_heap, 0);
        self.in_frame = true;
        Ok(())
    }

    /// 在当前帧缓冲上开始交换链渲染通道，并设置全屏视口
    pub fn begin_swapchain_render_pass(&mut self) -> Result<()> {
        if !self.in_frame {
            return Err(invalid_state("begin_swapchain_render_pass outside a frame"));
        }
        let index = self.current_frame_index as usize;
        let res = self.resources.as_mut().ok_or_else(not_running)?;
        let frame_buffer = Arc::clone(&res.frame_buffers[index]);
        let (width, height) = (frame_buffer.width(), frame_buffer.height());

        let list = &mut res.lists[GRAPHICS];
        if !list.is_recording() {
            return Err(invalid_state("graphics list is closed; flush with still_mid_frame to keep recording"));
        }
        list.begin_render_pass(&res.render_pass, &frame_buffer);
        list.set_viewport(&Viewport::full(width, height));
        list.set_scissor(&ScissorRect::full(width, height));
        Ok(())
    }

    /// 提前提交某个命令列表，返回其完成时的 fence 值
    ///
    /// `still_mid_frame` 为真时重新打开列表；若提交前处于渲染通道中，
    /// 通道以加载语义重新开始。
    pub fn flush_gpu_commands(&mut self, list_type: CommandListType, still_mid_frame: bool) -> Result<u64> {
        let res = self.resources.as_mut().ok_or_else(not_running)?;
        let i = list_type.index();

        let list = &mut res.lists[i];
        if !list.is_recording() {
            return Err(invalid_state("flush_gpu_commands on a list that is not recording"));
        }
        let was_in_render_pass = list.is_in_render_pass();
        if was_in_render_pass {
            list.end_render_pass();
        }
        list.end_recording()?;

        res.queues[i].execute(&[&res.lists[i]])?;
        let value = res.signal(list_type)?;
        if still_mid_frame {
            res.lists[i].begin_recording(was_in_render_pass)?;
        }
        trace!(queue = list_type.name(), value, still_mid_frame, "Flushed GPU commands");
        Ok(value)
    }

    /// CPU 等待 fence 达到 `value`
    pub fn wait_execution_gpu_commands(&self, value: u64) -> Result<()> {
        let res = self.resources.as_ref().ok_or_else(not_running)?;
        res.fence.wait(value)
    }

    /// 结束当前帧：提交、呈现、等待，并获取下一张后备缓冲
    pub fn end_draw_frame(&mut self) -> Result<FrameTiming> {
        if !self.in_frame {
            return Err(invalid_state("end_draw_frame without begin_draw_frame"));
        }
        let index = self.current_frame_index;
        let res = self.resources.as_mut().ok_or_else(not_running)?;

        if res.lists[COMPUTE].is_recording() {
            res.lists[COMPUTE].end_recording()?;
            res.queues[COMPUTE].execute(&[&res.lists[COMPUTE]])?;
        }
        let compute_done = res.signal(CommandListType::Compute)?;
        res.queues[GRAPHICS].wait(&res.fence, compute_done)?;

        if !res.lists[GRAPHICS].is_recording() {
            res.lists[GRAPHICS].begin_recording(false)?;
        }
        if res.lists[GRAPHICS].is_in_render_pass() {
            res.lists[GRAPHICS].end_render_pass();
        }

        let src = Arc::clone(&res.frame_buffers[index as usize].color_attachments()[0]);
        let dst = Arc::clone(res.swapchain.back_buffer(index));
        let list = &mut res.lists[GRAPHICS];
        list.copy_resource_with_barriers(
            ResourceRef::Texture(&dst),
            ResourceRef::Texture(&src),
            Some(ResourceState::Present),
        );
        list.write_timestamp(&res.query_heap, 1);
        list.end_recording()?;
        res.queues[GRAPHICS].execute(&[&res.lists[GRAPHICS]])?;

        let render_done = res.signal(CommandListType::Graphics)?;
        res.swapchain.present(&res.fence, render_done)?;
        res.fence.wait(render_done)?;

        let end = res.queues[GRAPHICS].calibration_timestamp()?;
        let begin = self.frame_begin.take().unwrap_or(end);
        let gpu_pass_time = match res.query_heap.read_timestamps(0, TIMESTAMP_QUERY_COUNT) {
            Ok(ticks) if ticks.len() == 2 => {
                ticks_to_duration(ticks[1].saturating_sub(ticks[0]), res.query_heap.timestamp_frequency())
            }
            Ok(_) => Duration::ZERO,
            Err(e) => {
                crate::engine_warn!("Failed to read timestamp queries: {}", e);
                Duration::ZERO
            }
        };

        let retired = res.staging.len();
        res.staging.clear();
        self.current_frame_index = res.acquire()?;

        let timing = FrameTiming {
            frame_number: self.frame_number,
            fence_value: render_done,
            cpu_time: end.cpu_elapsed_since(&begin),
            gpu_time: end.gpu_elapsed_since(&begin),
            gpu_pass_time,
            back_buffer_index: index,
        };
        debug!(
            frame = timing.frame_number,
            fence = render_done,
            back_buffer = index,
            cpu_us = timing.cpu_time.as_micros() as u64,
            gpu_us = timing.gpu_time.as_micros() as u64,
            retired_staging = retired,
            "Frame complete"
        );

        self.statistics.record(timing);
        self.last_frame_timing = Some(timing);
        self.frame_number += 1;
        self.in_frame = false;
        Ok(timing)
    }

    /// 窗口尺寸变化
    ///
    /// 尺寸未变时什么也不做；否则等待 GPU 空闲，重建交换链与帧缓冲，
    /// 然后获取新交换链的第一张图像。
    pub fn on_resize(&mut self, width: u32, height: u32) -> Result<()> {
        if self.in_frame {
            return Err(invalid_state("on_resize inside a frame"));
        }
        let res = self.resources.as_mut().ok_or_else(not_running)?;
        // 交换链可能已在获取时自行调整过尺寸，以帧缓冲为准
        if res.render_extent() == Some((width, height)) {
            return Ok(());
        }
        if width == 0 || height == 0 {
            debug!(width, height, "Ignoring resize to an empty extent");
            return Ok(());
        }
        let (from_width, from_height) = res.render_extent().unwrap_or_default();
        info!(from_width, from_height, width, height, "Resizing swapchain");

        res.drain()?;
        res.frame_buffers.clear();
        res.swapchain.resize(width, height)?;
        res.rebuild_render_targets()?;
        self.current_frame_index = res.acquire()?;
        res.fence.wait(res.fence_value.value())?;
        Ok(())
    }

    /// 切换 HDR 输出，后备缓冲格式随之改变
    pub fn switch_hdr_mode(&mut self, enable: bool) -> Result<()> {
        if self.in_frame {
            return Err(invalid_state("switch_hdr_mode inside a frame"));
        }
        let res = self.resources.as_mut().ok_or_else(not_running)?;
        if res.swapchain.desc().hdr == enable {
            return Ok(());
        }
        res.drain()?;
        res.frame_buffers.clear();
        res.swapchain.switch_hdr_mode(enable)?;
        res.rebuild_render_targets()?;
        self.current_frame_index = res.acquire()?;
        res.fence.wait(res.fence_value.value())?;
        info!(hdr = enable, "HDR mode switched");
        Ok(())
    }

    pub fn switch_full_screen_mode(&mut self, enable: bool) -> Result<()> {
        if self.in_frame {
            return Err(invalid_state("switch_full_screen_mode inside a frame"));
        }
        let res = self.resources.as_mut().ok_or_else(not_running)?;
        if res.swapchain.desc().full_screen == enable {
            return Ok(());
        }
        res.drain()?;
        res.swapchain.switch_full_screen_mode(enable)?;
        self.current_frame_index = res.swapchain.current_image_index();
        info!(full_screen = enable, "Full-screen mode switched");
        Ok(())
    }

    /// 等待 GPU 空闲并按创建的逆序销毁所有对象。可重复调用。
    pub fn shut_down(&mut self) -> Result<()> {
        if self.has_called_shut_down {
            return Ok(());
        }
        self.has_called_shut_down = true;
        self.in_frame = false;

        let Some(res) = self.resources.take() else {
            return Ok(());
        };
        info!(api = %B::API, frames = self.frame_number, "Shutting down graphics engine");
        let drained = res.drain();
        if let Err(e) = &drained {
            crate::engine_error!("Failed to drain GPU before shutdown: {}", e);
        }

        let EngineResources {
            instance,
            adapter,
            mut device,
            queues,
            lists,
            fence,
            swapchain,
            rt_heap,
            shader_heap,
            render_pass,
            frame_buffers,
            query_heap,
            staging,
            ..
        } = res;

        drop(swapchain);
        drop(frame_buffers);
        drop(render_pass);
        drop(query_heap);
        drop(staging);
        drop(fence);
        drop(lists);
        drop(queues);
        drop(rt_heap);
        drop(shader_heap);
        device.destroy();
        drop(device);
        drop(adapter);
        drop(instance);

        crate::engine_info!("Graphics engine shut down");
        drained
    }

    pub fn is_running(&self) -> bool {
        self.resources.is_some()
    }

    pub fn is_in_frame(&self) -> bool {
        self.in_frame
    }

    pub fn device(&self) -> Option<&B::Device> {
        self.resources.as_ref().map(|r| &r.device)
    }

    pub fn command_queue(&self, queue_type: CommandListType) -> Option<&B::CommandQueue> {
        self.resources.as_ref().map(|r| &r.queues[queue_type.index()])
    }

    pub fn command_list(&self, list_type: CommandListType) -> Option<&B::CommandList> {
        self.resources.as_ref().map(|r| &r.lists[list_type.index()])
    }

    pub fn command_list_mut(&mut self, list_type: CommandListType) -> Option<&mut B::CommandList> {
        self.resources.as_mut().map(|r| &mut r.lists[list_type.index()])
    }

    pub fn fence(&self) -> Option<&B::Fence> {
        self.resources.as_ref().map(|r| &r.fence)
    }

    /// 最近一次 signal 的 fence 值
    pub fn fence_value(&self) -> u64 {
        self.resources.as_ref().map_or(0, |r| r.fence_value.value())
    }

    /// 当前帧开始时的 fence 值，帧内的值都相对它递增
    pub fn frame_base_value(&self) -> u64 {
        self.resources.as_ref().map_or(0, |r| r.frame_base_value)
    }

    pub fn swapchain(&self) -> Option<&B::Swapchain> {
        self.resources.as_ref().map(|r| &r.swapchain)
    }

    pub fn swapchain_mut(&mut self) -> Option<&mut B::Swapchain> {
        self.resources.as_mut().map(|r| &mut r.swapchain)
    }

    pub fn current_frame_index(&self) -> u32 {
        self.current_frame_index
    }

    pub fn current_frame_buffer(&self) -> Option<&Arc<B::FrameBuffer>> {
        self.resources
            .as_ref()
            .and_then(|r| r.frame_buffers.get(self.current_frame_index as usize))
    }

    pub fn frame_buffers(&self) -> &[Arc<B::FrameBuffer>] {
        self.resources.as_ref().map_or(&[], |r| r.frame_buffers.as_slice())
    }

    pub fn render_target_heap(&self) -> Option<&B::DescriptorHeap> {
        self.resources.as_ref().map(|r| &r.rt_heap)
    }

    pub fn shader_heap(&self) -> Option<&B::DescriptorHeap> {
        self.resources.as_ref().map(|r| &r.shader_heap)
    }

    /// 借出帧内上传资源所需的对象
    ///
    /// 只能在帧内、图形列表正在录制且不在渲染通道中时调用。
    pub fn resource_context(&mut self) -> Result<ResourceContext<'_, B>> {
        if !self.in_frame {
            return Err(invalid_state("resource_context outside a frame"));
        }
        let res = self.resources.as_mut().ok_or_else(not_running)?;
        let list = &mut res.lists[GRAPHICS];
        if !list.is_recording() || list.is_in_render_pass() {
            return Err(invalid_state("resource uploads need a recording graphics list outside a render pass"));
        }
        Ok(ResourceContext::new(&res.device, list, &mut res.shader_heap, &mut res.staging))
    }

    pub fn last_frame_timing(&self) -> Option<FrameTiming> {
        self.last_frame_timing
    }

    pub fn frame_statistics(&self) -> &FrameStatistics {
        &self.statistics
    }
}

impl<B: RhiBackend> Drop for LowLevelGraphicsEngine<B> {
    fn drop(&mut self) {
        if let Err(e) = self.shut_down() {
            error!("Graphics engine shutdown failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::software::SoftwareBackend;
    use crate::rhi::GpuResource;

    fn config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.window.width = 16;
        config.window.height = 8;
        config.graphics.clear_color = [1.0, 0.0, 0.0, 1.0];
        config
    }

    fn engine() -> LowLevelGraphicsEngine<SoftwareBackend> {
        LowLevelGraphicsEngine::start_up(&config(), None).unwrap()
    }

    #[test]
    fn test_frame_protocol_state_errors() {
        let mut engine = engine();
        assert!(engine.end_draw_frame().unwrap_err().is_invalid_state());
        assert!(engine.begin_swapchain_render_pass().unwrap_err().is_invalid_state());

        engine.begin_draw_frame().unwrap();
        assert!(engine.begin_draw_frame().unwrap_err().is_invalid_state());
        assert!(engine.on_resize(32, 32).unwrap_err().is_invalid_state());
        engine.end_draw_frame().unwrap();
    }

    #[test]
    fn test_clear_reaches_back_buffer() {
        let mut engine = engine();
        let index = engine.current_frame_index();
        engine.begin_draw_frame().unwrap();
        engine.begin_swapchain_render_pass().unwrap();
        engine.end_draw_frame().unwrap();

        let back_buffer = engine.swapchain().unwrap().back_buffer(index);
        assert_eq!(back_buffer.usage_state(), ResourceState::Present);
        // Bgra8Unorm 中的纯红
        assert_eq!(back_buffer.read_pixel(3, 5), vec![0, 0, 255, 255]);
    }

    #[test]
    fn test_frame_base_value_advances() {
        let mut engine = engine();
        let first_base = engine.frame_base_value();
        engine.begin_draw_frame().unwrap();
        let timing = engine.end_draw_frame().unwrap();
        assert!(timing.fence_value > first_base);
        assert_eq!(engine.frame_base_value(), engine.fence_value());
        assert!(engine.fence().unwrap().completed_value() >= timing.fence_value);
    }

    #[test]
    fn test_flush_reopens_render_pass() {
        let mut engine = engine();
        engine.begin_draw_frame().unwrap();
        engine.begin_swapchain_render_pass().unwrap();

        let value = engine.flush_gpu_commands(CommandListType::Graphics, true).unwrap();
        let list = engine.command_list(CommandListType::Graphics).unwrap();
        assert!(list.is_recording());
        assert!(list.is_in_render_pass());

        engine.wait_execution_gpu_commands(value).unwrap();
        engine.end_draw_frame().unwrap();
    }

    #[test]
    fn test_hdr_switch_rebuilds_frame_buffers() {
        let mut engine = engine();
        engine.switch_hdr_mode(true).unwrap();
        let fb = engine.current_frame_buffer().unwrap();
        assert_eq!(fb.color_attachments()[0].format(), Format::Rgba16Float);

        engine.begin_draw_frame().unwrap();
        engine.begin_swapchain_render_pass().unwrap();
        engine.end_draw_frame().unwrap();
    }

    #[test]
    fn test_shut_down_is_idempotent() {
        let mut engine = engine();
        engine.shut_down().unwrap();
        engine.shut_down().unwrap();
        assert!(!engine.is_running());
        assert!(engine.begin_draw_frame().unwrap_err().is_invalid_state());
    }
}
