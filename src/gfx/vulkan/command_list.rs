//! Vulkan 命令列表
//!
//! 每个命令列表持有一组命令池轮流使用。重新开始录制时取下一个池，
//! 如果它上一次的提交还没完成就在 CPU 上等待，然后整体重置。
//! 这样 `flush_gpu_commands(reopen = true)` 之后立刻重新录制不会阻塞。
//!
//! 管线与绑定不在 RHI 范围内：调用方通过 [`VulkanCommandList::raw`]
//! 自行绑定管线后再录制 draw / dispatch。

use ash::vk;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::error;

use crate::core::error::{GraphicsError, Result};
use crate::rhi::command_list::debug_check_copy;
use crate::rhi::{
    CommandListState, CommandListType, GpuResource, ResourceRef, ResourceState, RhiBuffer,
    RhiCommandList, RhiQueryHeap, RhiRenderPass, RhiTexture, ScissorRect, TextureCopyLocation,
    TextureFootprint, TransitionBarrier, Viewport,
};

use super::conversion;
use super::device::DeviceShared;
use super::render_pass::{VulkanFrameBuffer, VulkanRenderPass};
use super::resource::{VulkanBuffer, VulkanQueryHeap, VulkanTexture};
use super::sync::SubmissionTimeline;
use super::{vk_error, VulkanBackend};

/// 命令池个数
const POOL_COUNT: usize = 3;

/// `vkCmdUpdateBuffer` 单次最多写入的字节数
const MAX_INLINE_UPDATE: usize = 65536;

struct PoolSlot {
    pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    /// 最近一次提交所在的队列计数
    retire: Mutex<Option<(Arc<SubmissionTimeline>, u64)>>,
}

/// Vulkan 命令列表
pub struct VulkanCommandList {
    shared: Arc<DeviceShared>,
    state: CommandListState,
    slots: Vec<PoolSlot>,
    current: usize,
    recorded: bool,
    last_render_pass: Option<(Arc<VulkanRenderPass>, Arc<VulkanFrameBuffer>)>,
}

impl VulkanCommandList {
    pub(crate) fn new(shared: Arc<DeviceShared>, list_type: CommandListType) -> Result<Self> {
        let family = shared.queue(list_type).family;
        let mut slots = Vec::with_capacity(POOL_COUNT);
        for _ in 0..POOL_COUNT {
            let pool_info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(family)
                .flags(vk::CommandPoolCreateFlags::TRANSIENT);
            let pool = unsafe { shared.device.create_command_pool(&pool_info, None) }
                .map_err(vk_error(GraphicsError::ResourceCreation, "vkCreateCommandPool"))?;
            let alloc_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            let command_buffer = match unsafe { shared.device.allocate_command_buffers(&alloc_info) } {
                Ok(buffers) => buffers[0],
                Err(e) => {
                    unsafe { shared.device.destroy_command_pool(pool, None) };
                    return Err(vk_error(GraphicsError::ResourceCreation, "vkAllocateCommandBuffers")(e));
                }
            };
            slots.push(PoolSlot {
                pool,
                command_buffer,
                retire: Mutex::new(None),
            });
        }

        Ok(Self {
            shared,
            state: CommandListState::new(list_type),
            slots,
            current: 0,
            recorded: false,
            last_render_pass: None,
        })
    }

    /// 当前录制所用的原生命令缓冲
    pub fn raw(&self) -> vk::CommandBuffer {
        self.slots[self.current].command_buffer
    }

    /// 可提交的命令缓冲；从未录制过的列表没有内容
    pub(crate) fn submittable(&self) -> Option<vk::CommandBuffer> {
        self.recorded.then(|| self.raw())
    }

    pub(crate) fn mark_submitted(&self, timeline: &Arc<SubmissionTimeline>, submission: u64) {
        *self.slots[self.current].retire.lock() = Some((Arc::clone(timeline), submission));
    }

    fn device(&self) -> &ash::Device {
        &self.shared.device
    }

    fn open_render_pass(
        &mut self,
        render_pass: &Arc<VulkanRenderPass>,
        frame_buffer: &Arc<VulkanFrameBuffer>,
        continued: bool,
    ) {
        self.state.begin_render_pass();
        let desc = render_pass.desc();
        let colors = frame_buffer.colors.iter().zip(desc.color_attachments.iter());
        let depth = frame_buffer.depth.iter().zip(desc.depth_attachment.iter());
        for (texture, attachment) in colors.chain(depth) {
            if !continued {
                debug_assert_eq!(
                    texture.usage_state(),
                    attachment.initial_state,
                    "attachment '{}' is not in the render pass initial state",
                    texture.name()
                );
            }
            texture.set_usage_state(attachment.pass_state());
        }

        let clear_values: Vec<vk::ClearValue> = desc
            .color_attachments
            .iter()
            .chain(desc.depth_attachment.iter())
            .map(|a| conversion::clear_value(a.clear_value))
            .collect();
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass.raw(continued))
            .framebuffer(frame_buffer.raw())
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D {
                    width: frame_buffer.width,
                    height: frame_buffer.height,
                },
            })
            .clear_values(&clear_values);
        unsafe {
            self.device()
                .cmd_begin_render_pass(self.raw(), &begin_info, vk::SubpassContents::INLINE)
        };
    }

    /// 非图形队列只支持一部分管线阶段，统一使用全部命令 + 全内存访问
    fn barrier_scope(&self, from: conversion::StateInfo, to: conversion::StateInfo) -> (conversion::StateInfo, conversion::StateInfo) {
        if self.state.list_type() == CommandListType::Graphics {
            return (from, to);
        }
        let widen = |info: conversion::StateInfo| conversion::StateInfo {
            layout: info.layout,
            access: vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            stage: vk::PipelineStageFlags::ALL_COMMANDS,
        };
        (widen(from), widen(to))
    }

    fn copy_textures(&mut self, dst: &Arc<VulkanTexture>, src: &Arc<VulkanTexture>) {
        let dst_layout = conversion::state_info(dst.usage_state()).layout;
        let src_layout = conversion::state_info(src.usage_state()).layout;
        let same_shape = dst.vk_format() == src.vk_format() && dst.extent() == src.extent();

        if same_shape {
            let regions: Vec<vk::ImageCopy> = (0..src.desc().mip_levels.min(dst.desc().mip_levels))
                .map(|mip| {
                    let (width, height) = src.desc().mip_extent(mip);
                    vk::ImageCopy {
                        src_subresource: src.subresource_layers(mip, 0, src.desc().depth_or_array_layers),
                        src_offset: vk::Offset3D::default(),
                        dst_subresource: dst.subresource_layers(mip, 0, src.desc().depth_or_array_layers),
                        dst_offset: vk::Offset3D::default(),
                        extent: vk::Extent3D { width, height, depth: 1 },
                    }
                })
                .collect();
            unsafe {
                self.device()
                    .cmd_copy_image(self.raw(), src.raw(), src_layout, dst.raw(), dst_layout, &regions)
            };
        } else {
            // 格式或尺寸不同（交换链回退到其它格式时）只能走 blit
            debug_assert_eq!(self.state.list_type(), CommandListType::Graphics, "blit needs a graphics list");
            let corner = |(w, h): (u32, u32)| vk::Offset3D { x: w as i32, y: h as i32, z: 1 };
            let blit = vk::ImageBlit {
                src_subresource: src.subresource_layers(0, 0, 1),
                src_offsets: [vk::Offset3D::default(), corner(src.extent())],
                dst_subresource: dst.subresource_layers(0, 0, 1),
                dst_offsets: [vk::Offset3D::default(), corner(dst.extent())],
            };
            unsafe {
                self.device().cmd_blit_image(
                    self.raw(),
                    src.raw(),
                    src_layout,
                    dst.raw(),
                    dst_layout,
                    &[blit],
                    vk::Filter::LINEAR,
                )
            };
        }
    }
}

impl RhiCommandList<VulkanBackend> for VulkanCommandList {
    fn list_type(&self) -> CommandListType {
        self.state.list_type()
    }

    fn is_recording(&self) -> bool {
        self.state.is_recording()
    }

    fn is_in_render_pass(&self) -> bool {
        self.state.is_in_render_pass()
    }

    fn begin_recording(&mut self, continue_last_render_pass: bool) -> Result<()> {
        self.state.begin()?;
        self.current = (self.current + 1) % self.slots.len();

        let slot = &self.slots[self.current];
        if let Some((timeline, submission)) = slot.retire.lock().take() {
            timeline.wait(submission)?;
        }
        unsafe {
            self.shared
                .device
                .reset_command_pool(slot.pool, vk::CommandPoolResetFlags::empty())
                .map_err(vk_error(GraphicsError::CommandExecution, "vkResetCommandPool"))?;
            let begin_info =
                vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.shared
                .device
                .begin_command_buffer(slot.command_buffer, &begin_info)
                .map_err(vk_error(GraphicsError::CommandExecution, "vkBeginCommandBuffer"))?;
        }
        self.recorded = true;

        if continue_last_render_pass {
            if let Some((render_pass, frame_buffer)) = self.last_render_pass.clone() {
                self.open_render_pass(&render_pass, &frame_buffer, true);
            }
        }
        Ok(())
    }

    fn end_recording(&mut self) -> Result<()> {
        self.state.end()?;
        unsafe { self.device().end_command_buffer(self.raw()) }
            .map_err(vk_error(GraphicsError::CommandExecution, "vkEndCommandBuffer"))
    }

    fn begin_render_pass(&mut self, render_pass: &Arc<VulkanRenderPass>, frame_buffer: &Arc<VulkanFrameBuffer>) {
        self.open_render_pass(render_pass, frame_buffer, false);
        self.last_render_pass = Some((Arc::clone(render_pass), Arc::clone(frame_buffer)));
    }

    fn end_render_pass(&mut self) {
        self.state.end_render_pass();
        unsafe { self.device().cmd_end_render_pass(self.raw()) };
        if let Some((render_pass, frame_buffer)) = &self.last_render_pass {
            let desc = render_pass.desc();
            let colors = frame_buffer.colors.iter().zip(desc.color_attachments.iter());
            let depth = frame_buffer.depth.iter().zip(desc.depth_attachment.iter());
            for (texture, attachment) in colors.chain(depth) {
                texture.set_usage_state(attachment.final_state);
            }
        }
    }

    fn set_viewport(&mut self, viewport: &Viewport) {
        self.state.require_graphics("set_viewport");
        let viewport = vk::Viewport {
            x: viewport.x,
            y: viewport.y,
            width: viewport.width,
            height: viewport.height,
            min_depth: viewport.min_depth,
            max_depth: viewport.max_depth,
        };
        unsafe { self.device().cmd_set_viewport(self.raw(), 0, &[viewport]) };
    }

    fn set_scissor(&mut self, rect: &ScissorRect) {
        self.state.require_graphics("set_scissor");
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: rect.left, y: rect.top },
            extent: vk::Extent2D {
                width: rect.width(),
                height: rect.height(),
            },
        };
        unsafe { self.device().cmd_set_scissor(self.raw(), 0, &[scissor]) };
    }

    fn draw_instanced(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        self.state.require_graphics("draw_instanced");
        debug_assert!(self.state.is_in_render_pass(), "draw outside a render pass");
        unsafe {
            self.device()
                .cmd_draw(self.raw(), vertex_count, instance_count, first_vertex, first_instance)
        };
    }

    fn draw_indexed_instanced(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) {
        self.state.require_graphics("draw_indexed_instanced");
        debug_assert!(self.state.is_in_render_pass(), "draw outside a render pass");
        unsafe {
            self.device().cmd_draw_indexed(
                self.raw(),
                index_count,
                instance_count,
                first_index,
                base_vertex,
                first_instance,
            )
        };
    }

    fn dispatch(&mut self, group_count_x: u32, group_count_y: u32, group_count_z: u32) {
        self.state.require_compute("dispatch");
        unsafe {
            self.device()
                .cmd_dispatch(self.raw(), group_count_x, group_count_y, group_count_z)
        };
    }

    fn resource_barrier(&mut self, barriers: &[TransitionBarrier<'_, VulkanBackend>]) {
        self.state.require_outside_render_pass("resource_barrier");

        let mut src_stage = vk::PipelineStageFlags::empty();
        let mut dst_stage = vk::PipelineStageFlags::empty();
        let mut buffer_barriers = Vec::new();
        let mut image_barriers = Vec::new();

        for barrier in barriers {
            let before = barrier.resource.usage_state();
            if before == barrier.after {
                continue;
            }
            let (from, to) = self.barrier_scope(
                conversion::state_info(before),
                conversion::state_info(barrier.after),
            );
            src_stage |= from.stage;
            dst_stage |= to.stage;

            match barrier.resource {
                ResourceRef::Buffer(buffer) => buffer_barriers.push(
                    vk::BufferMemoryBarrier::default()
                        .src_access_mask(from.access)
                        .dst_access_mask(to.access)
                        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .buffer(buffer.raw())
                        .offset(0)
                        .size(vk::WHOLE_SIZE),
                ),
                ResourceRef::Texture(texture) => {
                    // 交换链图像离开 Present 时内容会被整体覆盖，丢弃旧内容即可
                    let old_layout = if before == ResourceState::Present && texture.is_swapchain_image() {
                        vk::ImageLayout::UNDEFINED
                    } else {
                        from.layout
                    };
                    image_barriers.push(
                        vk::ImageMemoryBarrier::default()
                            .src_access_mask(from.access)
                            .dst_access_mask(to.access)
                            .old_layout(old_layout)
                            .new_layout(to.layout)
                            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .image(texture.raw())
                            .subresource_range(texture.full_range()),
                    );
                }
            }
            barrier.resource.as_gpu_resource().set_usage_state(barrier.after);
        }

        if buffer_barriers.is_empty() && image_barriers.is_empty() {
            return;
        }
        unsafe {
            self.device().cmd_pipeline_barrier(
                self.raw(),
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &buffer_barriers,
                &image_barriers,
            )
        };
    }

    fn copy_resource(&mut self, dst: ResourceRef<'_, VulkanBackend>, src: ResourceRef<'_, VulkanBackend>) {
        self.state.require_outside_render_pass("copy_resource");
        debug_check_copy(dst, src);
        match (dst, src) {
            (ResourceRef::Buffer(dst), ResourceRef::Buffer(src)) => {
                debug_assert_eq!(dst.desc().size, src.desc().size, "copy_resource size mismatch");
                let region = vk::BufferCopy {
                    src_offset: 0,
                    dst_offset: 0,
                    size: dst.desc().size.min(src.desc().size),
                };
                unsafe {
                    self.device()
                        .cmd_copy_buffer(self.raw(), src.raw(), dst.raw(), &[region])
                };
            }
            (ResourceRef::Texture(dst), ResourceRef::Texture(src)) => self.copy_textures(dst, src),
            _ => debug_assert!(false, "copy_resource between a buffer and a texture"),
        }
    }

    fn copy_buffer_region(
        &mut self,
        dst: &Arc<VulkanBuffer>,
        dst_offset: u64,
        src: &Arc<VulkanBuffer>,
        src_offset: u64,
        size: u64,
    ) {
        self.state.require_outside_render_pass("copy_buffer_region");
        debug_check_copy::<VulkanBackend>(ResourceRef::Buffer(dst), ResourceRef::Buffer(src));
        let region = vk::BufferCopy {
            src_offset,
            dst_offset,
            size,
        };
        unsafe {
            self.device()
                .cmd_copy_buffer(self.raw(), src.raw(), dst.raw(), &[region])
        };
    }

    fn copy_texture_region(
        &mut self,
        dst: &TextureCopyLocation<'_, VulkanBackend>,
        src: &TextureCopyLocation<'_, VulkanBackend>,
    ) {
        self.state.require_outside_render_pass("copy_texture_region");
        debug_check_copy(dst.resource(), src.resource());

        let buffer_copy = |texture: &Arc<VulkanTexture>, mip_level: u32, array_layer: u32, footprint: &TextureFootprint| {
            let (mip_width, mip_height) = texture.desc().mip_extent(mip_level);
            vk::BufferImageCopy {
                buffer_offset: footprint.offset,
                buffer_row_length: footprint.row_pitch / footprint.format.bytes_per_pixel().max(1),
                buffer_image_height: 0,
                image_subresource: texture.subresource_layers(mip_level, array_layer, 1),
                image_offset: vk::Offset3D::default(),
                image_extent: vk::Extent3D {
                    width: footprint.width.min(mip_width),
                    height: footprint.height.min(mip_height),
                    depth: 1,
                },
            }
        };

        match (dst, src) {
            (
                TextureCopyLocation::Subresource { texture, mip_level, array_layer },
                TextureCopyLocation::Footprint { buffer, footprint },
            ) => {
                let region = buffer_copy(texture, *mip_level, *array_layer, footprint);
                let layout = conversion::state_info(texture.usage_state()).layout;
                unsafe {
                    self.device()
                        .cmd_copy_buffer_to_image(self.raw(), buffer.raw(), texture.raw(), layout, &[region])
                };
            }
            (
                TextureCopyLocation::Footprint { buffer, footprint },
                TextureCopyLocation::Subresource { texture, mip_level, array_layer },
            ) => {
                let region = buffer_copy(texture, *mip_level, *array_layer, footprint);
                let layout = conversion::state_info(texture.usage_state()).layout;
                unsafe {
                    self.device()
                        .cmd_copy_image_to_buffer(self.raw(), texture.raw(), layout, buffer.raw(), &[region])
                };
            }
            (
                TextureCopyLocation::Subresource { texture: dst_tex, mip_level: dst_mip, array_layer: dst_layer },
                TextureCopyLocation::Subresource { texture: src_tex, mip_level: src_mip, array_layer: src_layer },
            ) => {
                let (sw, sh) = src.extent();
                let (dw, dh) = dst.extent();
                let region = vk::ImageCopy {
                    src_subresource: src_tex.subresource_layers(*src_mip, *src_layer, 1),
                    src_offset: vk::Offset3D::default(),
                    dst_subresource: dst_tex.subresource_layers(*dst_mip, *dst_layer, 1),
                    dst_offset: vk::Offset3D::default(),
                    extent: vk::Extent3D {
                        width: sw.min(dw),
                        height: sh.min(dh),
                        depth: 1,
                    },
                };
                unsafe {
                    self.device().cmd_copy_image(
                        self.raw(),
                        src_tex.raw(),
                        conversion::state_info(src_tex.usage_state()).layout,
                        dst_tex.raw(),
                        conversion::state_info(dst_tex.usage_state()).layout,
                        &[region],
                    )
                };
            }
            (TextureCopyLocation::Footprint { .. }, TextureCopyLocation::Footprint { .. }) => {
                debug_assert!(false, "copy_texture_region between two buffers");
            }
        }
    }

    fn update_buffer(&mut self, dst: &Arc<VulkanBuffer>, offset: u64, data: &[u32]) {
        self.state.require_outside_render_pass("update_buffer");
        debug_assert_eq!(dst.usage_state(), ResourceState::CopyDest);
        debug_assert!(offset % 4 == 0, "update_buffer offset must be 4-byte aligned");

        let mut offset = offset;
        for chunk in data.chunks(MAX_INLINE_UPDATE / 4) {
            let bytes: &[u8] = bytemuck::cast_slice(chunk);
            unsafe {
                self.device()
                    .cmd_update_buffer(self.raw(), dst.raw(), offset, bytes)
            };
            offset += bytes.len() as u64;
        }
    }

    fn write_timestamp(&mut self, query_heap: &Arc<VulkanQueryHeap>, index: u32) {
        self.state.require_outside_render_pass("write_timestamp");
        debug_assert!(index < query_heap.count(), "timestamp query {} out of range", index);
        unsafe {
            self.device().cmd_reset_query_pool(self.raw(), query_heap.raw(), index, 1);
            self.device().cmd_write_timestamp(
                self.raw(),
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                query_heap.raw(),
                index,
            );
        }
    }
}

impl Drop for VulkanCommandList {
    fn drop(&mut self) {
        for slot in &self.slots {
            if let Some((timeline, submission)) = slot.retire.lock().take() {
                if let Err(e) = timeline.wait(submission) {
                    error!("Failed to wait for a command pool before destruction: {}", e);
                }
            }
            unsafe { self.shared.device.destroy_command_pool(slot.pool, None) };
        }
    }
}
