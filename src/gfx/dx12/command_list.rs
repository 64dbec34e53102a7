//! D3D12 命令列表
//!
//! 与 Vulkan 后端一样，每个命令列表轮流使用一组命令分配器；分配器只有在
//! 它上一次的提交完成后才能 `Reset`。原生列表只有一个，每次开始录制时
//! 用下一个分配器重置。
//!
//! D3D12 没有渲染通道对象：通道开始时把附件转到通道内状态、绑定 RTV / DSV，
//! 并对 `Clear` 附件清屏；通道结束时转到结束状态。

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::error;
use windows::Win32::Foundation::RECT;
use windows::Win32::Graphics::Direct3D12::*;

use crate::core::error::{GraphicsError, Result};
use crate::rhi::command_list::debug_check_copy;
use crate::rhi::{
    ClearValue, CommandListState, CommandListType, GpuResource, LoadOp, ResourceRef, ResourceState, RhiBuffer,
    RhiCommandList, RhiQueryHeap, RhiRenderPass, RhiTexture, ScissorRect, TextureCopyLocation, TransitionBarrier,
    Viewport,
};

use super::conversion;
use super::descriptor::Dx12DescriptorHeap;
use super::device::DeviceShared;
use super::render_pass::{Dx12FrameBuffer, Dx12RenderPass};
use super::resource::{transition_barrier, uav_barrier, Dx12Buffer, Dx12QueryHeap, Dx12Texture};
use super::sync::SubmissionTimeline;
use super::{hr_error, Dx12Backend};

/// 命令分配器个数
const ALLOCATOR_COUNT: usize = 3;

struct AllocatorSlot {
    allocator: ID3D12CommandAllocator,
    /// 最近一次提交所在的队列计数
    retire: Mutex<Option<(Arc<SubmissionTimeline>, u64)>>,
}

/// D3D12 命令列表
pub struct Dx12CommandList {
    /// 分配器与列表不能比设备活得久
    _shared: Arc<DeviceShared>,
    state: CommandListState,
    list: ID3D12GraphicsCommandList2,
    slots: Vec<AllocatorSlot>,
    current: usize,
    recorded: bool,
    last_render_pass: Option<(Arc<Dx12RenderPass>, Arc<Dx12FrameBuffer>)>,
}

unsafe impl Send for Dx12CommandList {}

fn raw_resource<'a>(resource: &ResourceRef<'a, Dx12Backend>) -> &'a ID3D12Resource {
    match *resource {
        ResourceRef::Buffer(buffer) => buffer.raw(),
        ResourceRef::Texture(texture) => texture.raw(),
    }
}

/// 状态转换对应的原生屏障；状态不变时只有 UAV 之间需要写后读屏障
fn native_barrier(
    resource: &ID3D12Resource,
    before: ResourceState,
    after: ResourceState,
) -> Option<D3D12_RESOURCE_BARRIER> {
    if before == after {
        return (after == ResourceState::UnorderedAccess).then(|| uav_barrier(resource));
    }
    Some(transition_barrier(
        resource,
        conversion::resource_state(before),
        conversion::resource_state(after),
    ))
}

fn subresource_location(texture: &Dx12Texture, mip_level: u32, array_layer: u32) -> D3D12_TEXTURE_COPY_LOCATION {
    D3D12_TEXTURE_COPY_LOCATION {
        pResource: unsafe { std::mem::transmute_copy(texture.raw()) },
        Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
        Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
            SubresourceIndex: texture.desc().subresource_index(mip_level, array_layer),
        },
    }
}

/// 缓冲区一侧的布局；宽高不超过对端纹理的 mip 尺寸
fn footprint_location(
    buffer: &Dx12Buffer,
    footprint: &crate::rhi::TextureFootprint,
    mip_extent: (u32, u32),
) -> D3D12_TEXTURE_COPY_LOCATION {
    D3D12_TEXTURE_COPY_LOCATION {
        pResource: unsafe { std::mem::transmute_copy(buffer.raw()) },
        Type: D3D12_TEXTURE_COPY_TYPE_PLACED_FOOTPRINT,
        Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
            PlacedFootprint: D3D12_PLACED_SUBRESOURCE_FOOTPRINT {
                Offset: footprint.offset,
                Footprint: D3D12_SUBRESOURCE_FOOTPRINT {
                    Format: conversion::format_to_dxgi(footprint.format),
                    Width: footprint.width.min(mip_extent.0),
                    Height: footprint.height.min(mip_extent.1),
                    Depth: 1,
                    RowPitch: footprint.row_pitch,
                },
            },
        },
    }
}

impl Dx12CommandList {
    pub(crate) fn new(shared: Arc<DeviceShared>, list_type: CommandListType) -> Result<Self> {
        let native_type = conversion::command_list_type(list_type);
        let mut slots = Vec::with_capacity(ALLOCATOR_COUNT);
        for _ in 0..ALLOCATOR_COUNT {
            let allocator: ID3D12CommandAllocator = unsafe { shared.device.CreateCommandAllocator(native_type) }
                .map_err(hr_error(GraphicsError::ResourceCreation, "CreateCommandAllocator"))?;
            slots.push(AllocatorSlot {
                allocator,
                retire: Mutex::new(None),
            });
        }

        let list: ID3D12GraphicsCommandList2 = unsafe {
            shared
                .device
                .CreateCommandList(0, native_type, &slots[0].allocator, None::<&ID3D12PipelineState>)
        }
        .map_err(hr_error(GraphicsError::ResourceCreation, "CreateCommandList"))?;
        // 新建的列表处于录制状态，先关闭以匹配 Closed
        unsafe { list.Close() }.map_err(hr_error(GraphicsError::ResourceCreation, "ID3D12GraphicsCommandList::Close"))?;

        Ok(Self {
            _shared: shared,
            state: CommandListState::new(list_type),
            list,
            slots,
            current: 0,
            recorded: false,
            last_render_pass: None,
        })
    }

    /// 原生命令列表，调用方用它绑定管线与根签名
    pub fn raw(&self) -> &ID3D12GraphicsCommandList2 {
        &self.list
    }

    /// 绑定描述符堆的着色器可见部分
    pub fn set_descriptor_heaps(&mut self, heap: &Dx12DescriptorHeap) {
        self.state.record("set_descriptor_heaps");
        let heaps: Vec<Option<ID3D12DescriptorHeap>> = [heap.raw_view_heap(), heap.raw_sampler_heap()]
            .into_iter()
            .flatten()
            .map(|h| Some(h.clone()))
            .collect();
        unsafe { self.list.SetDescriptorHeaps(&heaps) };
    }

    /// 可提交的原生列表；从未录制过的列表没有内容
    pub(crate) fn submittable(&self) -> Option<&ID3D12GraphicsCommandList2> {
        self.recorded.then_some(&self.list)
    }

    pub(crate) fn mark_submitted(&self, timeline: &Arc<SubmissionTimeline>, submission: u64) {
        *self.slots[self.current].retire.lock() = Some((Arc::clone(timeline), submission));
    }

    /// 把附件从各自的当前状态转到 `target(attachment)`
    fn transition_attachments(
        &self,
        render_pass: &Dx12RenderPass,
        frame_buffer: &Dx12FrameBuffer,
        target: impl Fn(&crate::rhi::AttachmentDesc) -> ResourceState,
    ) {
        let desc = render_pass.desc();
        let colors = frame_buffer.colors.iter().zip(desc.color_attachments.iter());
        let depth = frame_buffer.depth.iter().zip(desc.depth_attachment.iter());
        let mut barriers = Vec::new();
        for (texture, attachment) in colors.chain(depth) {
            let after = target(attachment);
            let before = texture.usage_state();
            if before != after {
                barriers.extend(native_barrier(texture.raw(), before, after));
                texture.set_usage_state(after);
            }
        }
        if !barriers.is_empty() {
            unsafe { self.list.ResourceBarrier(&barriers) };
        }
    }

    fn open_render_pass(
        &mut self,
        render_pass: &Arc<Dx12RenderPass>,
        frame_buffer: &Arc<Dx12FrameBuffer>,
        continued: bool,
    ) {
        let desc = render_pass.desc();
        if !continued {
            let colors = frame_buffer.colors.iter().zip(desc.color_attachments.iter());
            let depth = frame_buffer.depth.iter().zip(desc.depth_attachment.iter());
            for (texture, attachment) in colors.chain(depth) {
                debug_assert_eq!(
                    texture.usage_state(),
                    attachment.initial_state,
                    "attachment '{}' is not in the render pass initial state",
                    texture.name()
                );
            }
        }
        self.transition_attachments(render_pass, frame_buffer, |a| a.pass_state());
        self.state.begin_render_pass();

        let rtvs = &frame_buffer.rtv_handles;
        let dsv = frame_buffer.dsv_handle.as_ref();
        unsafe {
            self.list.OMSetRenderTargets(
                rtvs.len() as u32,
                (!rtvs.is_empty()).then(|| rtvs.as_ptr()),
                false,
                dsv.map(|h| h as *const D3D12_CPU_DESCRIPTOR_HANDLE),
            )
        };
        if continued {
            return;
        }

        for (handle, attachment) in rtvs.iter().zip(desc.color_attachments.iter()) {
            if let (LoadOp::Clear, ClearValue::Color(color)) = (attachment.load_op, attachment.clear_value) {
                unsafe { self.list.ClearRenderTargetView(*handle, &color, None) };
            }
        }
        if let (Some(handle), Some(attachment)) = (dsv, desc.depth_attachment.as_ref()) {
            if let (LoadOp::Clear, ClearValue::DepthStencil { depth, stencil }) =
                (attachment.load_op, attachment.clear_value)
            {
                let flags = if attachment.format.has_stencil() {
                    D3D12_CLEAR_FLAG_DEPTH | D3D12_CLEAR_FLAG_STENCIL
                } else {
                    D3D12_CLEAR_FLAG_DEPTH
                };
                unsafe { self.list.ClearDepthStencilView(*handle, flags, depth, stencil, None) };
            }
        }
    }
}

impl RhiCommandList<Dx12Backend> for Dx12CommandList {
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
            slot.allocator
                .Reset()
                .map_err(hr_error(GraphicsError::CommandExecution, "ID3D12CommandAllocator::Reset"))?;
            self.list
                .Reset(&slot.allocator, None::<&ID3D12PipelineState>)
                .map_err(hr_error(GraphicsError::CommandExecution, "ID3D12GraphicsCommandList::Reset"))?;
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
        unsafe { self.list.Close() }
            .map_err(hr_error(GraphicsError::CommandExecution, "ID3D12GraphicsCommandList::Close"))
    }

    fn begin_render_pass(&mut self, render_pass: &Arc<Dx12RenderPass>, frame_buffer: &Arc<Dx12FrameBuffer>) {
        self.open_render_pass(render_pass, frame_buffer, false);
        self.last_render_pass = Some((Arc::clone(render_pass), Arc::clone(frame_buffer)));
    }

    fn end_render_pass(&mut self) {
        self.state.end_render_pass();
        if let Some((render_pass, frame_buffer)) = &self.last_render_pass {
            self.transition_attachments(render_pass, frame_buffer, |a| a.final_state);
        }
    }

    fn set_viewport(&mut self, viewport: &Viewport) {
        self.state.require_graphics("set_viewport");
        let viewport = D3D12_VIEWPORT {
            TopLeftX: viewport.x,
            TopLeftY: viewport.y,
            Width: viewport.width,
            Height: viewport.height,
            MinDepth: viewport.min_depth,
            MaxDepth: viewport.max_depth,
        };
        unsafe { self.list.RSSetViewports(&[viewport]) };
    }

    fn set_scissor(&mut self, rect: &ScissorRect) {
        self.state.require_graphics("set_scissor");
        let rect = RECT {
            left: rect.left,
            top: rect.top,
            right: rect.right,
            bottom: rect.bottom,
        };
        unsafe { self.list.RSSetScissorRects(&[rect]) };
    }

    fn draw_instanced(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        self.state.require_graphics("draw_instanced");
        debug_assert!(self.state.is_in_render_pass(), "draw outside a render pass");
        unsafe {
            self.list
                .DrawInstanced(vertex_count, instance_count, first_vertex, first_instance)
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
            self.list
                .DrawIndexedInstanced(index_count, instance_count, first_index, base_vertex, first_instance)
        };
    }

    fn dispatch(&mut self, group_count_x: u32, group_count_y: u32, group_count_z: u32) {
        self.state.require_compute("dispatch");
        unsafe { self.list.Dispatch(group_count_x, group_count_y, group_count_z) };
    }

    fn resource_barrier(&mut self, barriers: &[TransitionBarrier<'_, Dx12Backend>]) {
        self.state.require_outside_render_pass("resource_barrier");
        let mut native = Vec::with_capacity(barriers.len());
        for barrier in barriers {
            let before = barrier.resource.usage_state();
            native.extend(native_barrier(raw_resource(&barrier.resource), before, barrier.after));
            barrier.resource.as_gpu_resource().set_usage_state(barrier.after);
        }
        if !native.is_empty() {
            unsafe { self.list.ResourceBarrier(&native) };
        }
    }

    fn copy_resource(&mut self, dst: ResourceRef<'_, Dx12Backend>, src: ResourceRef<'_, Dx12Backend>) {
        self.state.require_outside_render_pass("copy_resource");
        debug_check_copy(dst, src);
        match (dst, src) {
            (ResourceRef::Buffer(d), ResourceRef::Buffer(s)) => {
                debug_assert_eq!(d.desc().size, s.desc().size, "copy_resource size mismatch");
                // 常量缓冲的宽度按 256 对齐，两端宽度不同时只拷贝请求的大小
                if d.width() == s.width() {
                    unsafe { self.list.CopyResource(d.raw(), s.raw()) };
                } else {
                    let size = d.desc().size.min(s.desc().size);
                    unsafe { self.list.CopyBufferRegion(d.raw(), 0, s.raw(), 0, size) };
                }
            }
            (ResourceRef::Texture(d), ResourceRef::Texture(s)) => {
                debug_assert!(
                    d.desc().format == s.desc().format && (d.width(), d.height()) == (s.width(), s.height()),
                    "copy_resource between textures of different shape: '{}' and '{}'",
                    d.name(),
                    s.name()
                );
                unsafe { self.list.CopyResource(d.raw(), s.raw()) };
            }
            _ => debug_assert!(false, "copy_resource between a buffer and a texture"),
        }
    }

    fn copy_buffer_region(
        &mut self,
        dst: &Arc<Dx12Buffer>,
        dst_offset: u64,
        src: &Arc<Dx12Buffer>,
        src_offset: u64,
        size: u64,
    ) {
        self.state.require_outside_render_pass("copy_buffer_region");
        debug_check_copy::<Dx12Backend>(ResourceRef::Buffer(dst), ResourceRef::Buffer(src));
        unsafe {
            self.list
                .CopyBufferRegion(dst.raw(), dst_offset, src.raw(), src_offset, size)
        };
    }

    fn copy_texture_region(
        &mut self,
        dst: &TextureCopyLocation<'_, Dx12Backend>,
        src: &TextureCopyLocation<'_, Dx12Backend>,
    ) {
        self.state.require_outside_render_pass("copy_texture_region");
        debug_check_copy(dst.resource(), src.resource());

        let (native_dst, native_src) = match (dst, src) {
            (
                TextureCopyLocation::Subresource { texture, mip_level, array_layer },
                TextureCopyLocation::Footprint { buffer, footprint },
            ) => (
                subresource_location(texture, *mip_level, *array_layer),
                footprint_location(buffer, footprint, texture.desc().mip_extent(*mip_level)),
            ),
            (
                TextureCopyLocation::Footprint { buffer, footprint },
                TextureCopyLocation::Subresource { texture, mip_level, array_layer },
            ) => (
                footprint_location(buffer, footprint, texture.desc().mip_extent(*mip_level)),
                subresource_location(texture, *mip_level, *array_layer),
            ),
            (
                TextureCopyLocation::Subresource { texture: dst_tex, mip_level: dst_mip, array_layer: dst_layer },
                TextureCopyLocation::Subresource { texture: src_tex, mip_level: src_mip, array_layer: src_layer },
            ) => (
                subresource_location(dst_tex, *dst_mip, *dst_layer),
                subresource_location(src_tex, *src_mip, *src_layer),
            ),
            (TextureCopyLocation::Footprint { .. }, TextureCopyLocation::Footprint { .. }) => {
                debug_assert!(false, "copy_texture_region between two buffers");
                return;
            }
        };
        unsafe { self.list.CopyTextureRegion(&native_dst, 0, 0, 0, &native_src, None) };
    }

    fn update_buffer(&mut self, dst: &Arc<Dx12Buffer>, offset: u64, data: &[u32]) {
        self.state.require_outside_render_pass("update_buffer");
        debug_assert_eq!(dst.usage_state(), ResourceState::CopyDest);
        debug_assert!(offset % 4 == 0, "update_buffer offset must be 4-byte aligned");

        let base = unsafe { dst.raw().GetGPUVirtualAddress() } + offset;
        let params: Vec<D3D12_WRITEBUFFERIMMEDIATE_PARAMETER> = data
            .iter()
            .enumerate()
            .map(|(i, value)| D3D12_WRITEBUFFERIMMEDIATE_PARAMETER {
                Dest: base + i as u64 * 4,
                Value: *value,
            })
            .collect();
        if params.is_empty() {
            return;
        }
        unsafe {
            self.list
                .WriteBufferImmediate(params.len() as u32, params.as_ptr(), None)
        };
    }

    fn write_timestamp(&mut self, query_heap: &Arc<Dx12QueryHeap>, index: u32) {
        self.state.require_outside_render_pass("write_timestamp");
        debug_assert!(index < query_heap.count(), "timestamp query {} out of range", index);
        debug_assert!(
            self.state.list_type().supports_compute(),
            "timestamps are not recorded on Copy lists"
        );
        unsafe {
            self.list
                .EndQuery(query_heap.raw(), D3D12_QUERY_TYPE_TIMESTAMP, index);
            self.list.ResolveQueryData(
                query_heap.raw(),
                D3D12_QUERY_TYPE_TIMESTAMP,
                index,
                1,
                query_heap.readback(),
                index as u64 * std::mem::size_of::<u64>() as u64,
            );
        }
    }
}

impl Drop for Dx12CommandList {
    fn drop(&mut self) {
        for slot in &self.slots {
            if let Some((timeline, submission)) = slot.retire.lock().take() {
                if let Err(e) = timeline.wait(submission) {
                    error!("Failed to wait for a command allocator before destruction: {}", e);
                }
            }
        }
    }
}
