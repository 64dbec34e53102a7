//! 软件命令列表
//!
//! 录制阶段只把命令追加到 `Vec<Command>` 并更新被跟踪的资源状态；
//! `end_recording` 把命令封存为共享的 [`RecordedCommands`]，队列线程据此回放。

use std::sync::Arc;
use tracing::error;

use crate::rhi::command_list::debug_check_copy;
use crate::core::error::Result;
use crate::rhi::{
    ClearValue, CommandListState, CommandListType, GpuResource, LoadOp, ResourceRef,
    ResourceState, RhiBuffer, RhiCommandList, RhiRenderPass, RhiTexture, ScissorRect,
    TextureCopyLocation, TextureFootprint, TransitionBarrier, Viewport,
};

use super::device::DeviceShared;
use super::render_pass::{SoftwareFrameBuffer, SoftwareRenderPass};
use super::resource::{encode_clear_value, SoftwareBuffer, SoftwareQueryHeap, SoftwareTexture};
use super::SoftwareBackend;

pub(crate) enum Command {
    Barrier {
        count: u32,
    },
    BeginRenderPass {
        frame_buffer: Arc<SoftwareFrameBuffer>,
        continued: bool,
    },
    EndRenderPass,
    SetViewport(Viewport),
    SetScissor(ScissorRect),
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
    },
    Dispatch {
        groups: [u32; 3],
    },
    CopyBuffer {
        dst: Arc<SoftwareBuffer>,
        dst_offset: u64,
        src: Arc<SoftwareBuffer>,
        src_offset: u64,
        size: u64,
    },
    CopyTexture {
        dst: Arc<SoftwareTexture>,
        src: Arc<SoftwareTexture>,
    },
    CopyBufferToTexture {
        dst: Arc<SoftwareTexture>,
        subresource: u32,
        src: Arc<SoftwareBuffer>,
        footprint: TextureFootprint,
    },
    CopyTextureToBuffer {
        dst: Arc<SoftwareBuffer>,
        footprint: TextureFootprint,
        src: Arc<SoftwareTexture>,
        subresource: u32,
    },
    CopyTextureRegion {
        dst: Arc<SoftwareTexture>,
        dst_subresource: u32,
        src: Arc<SoftwareTexture>,
        src_subresource: u32,
        width: u32,
        height: u32,
    },
    UpdateBuffer {
        dst: Arc<SoftwareBuffer>,
        offset: u64,
        data: Vec<u32>,
    },
    WriteTimestamp {
        heap: Arc<SoftwareQueryHeap>,
        index: u32,
    },
}

/// 封存后的命令序列
pub(crate) struct RecordedCommands {
    commands: Vec<Command>,
}

impl RecordedCommands {
    /// 在队列线程上执行
    pub(crate) fn replay(&self, device: &DeviceShared) {
        let stats = &device.stats;
        for command in &self.commands {
            match command {
                Command::Barrier { count } => stats.add_barriers(*count),
                Command::BeginRenderPass { frame_buffer, continued } => {
                    stats.record_render_pass();
                    if !*continued {
                        clear_attachments(frame_buffer);
                    }
                }
                Command::EndRenderPass | Command::SetViewport(_) | Command::SetScissor(_) => {}
                Command::Draw { vertex_count, instance_count } => {
                    stats.record_draw(*vertex_count as u64 * *instance_count as u64)
                }
                Command::DrawIndexed { index_count, instance_count } => {
                    stats.record_draw(*index_count as u64 * *instance_count as u64)
                }
                Command::Dispatch { groups } => {
                    stats.record_dispatch(groups.iter().map(|&g| g as u64).product())
                }
                Command::CopyBuffer { dst, dst_offset, src, src_offset, size } => {
                    stats.record_copy();
                    copy_buffer(dst, *dst_offset, src, *src_offset, *size);
                }
                Command::CopyTexture { dst, src } => {
                    stats.record_copy();
                    copy_texture(dst, src);
                }
                Command::CopyBufferToTexture { dst, subresource, src, footprint } => {
                    stats.record_copy();
                    copy_buffer_to_texture(dst, *subresource, src, footprint);
                }
                Command::CopyTextureToBuffer { dst, footprint, src, subresource } => {
                    stats.record_copy();
                    copy_texture_to_buffer(dst, footprint, src, *subresource);
                }
                Command::CopyTextureRegion {
                    dst,
                    dst_subresource,
                    src,
                    src_subresource,
                    width,
                    height,
                } => {
                    stats.record_copy();
                    copy_texture_region(dst, *dst_subresource, src, *src_subresource, *width, *height);
                }
                Command::UpdateBuffer { dst, offset, data } => {
                    let bytes: &[u8] = bytemuck::cast_slice(data);
                    let mut memory = dst.memory().write();
                    let start = *offset as usize;
                    match memory.get_mut(start..start + bytes.len()) {
                        Some(range) => range.copy_from_slice(bytes),
                        None => error!(buffer = dst_name(dst), "update_buffer out of range"),
                    }
                }
                Command::WriteTimestamp { heap, index } => heap.store(*index, device.now_ticks()),
            }
        }
    }
}

fn dst_name(buffer: &SoftwareBuffer) -> &str {
    buffer.name()
}

fn clear_attachments(frame_buffer: &SoftwareFrameBuffer) {
    let desc = &frame_buffer.render_pass.desc;
    let colors = frame_buffer.colors.iter().zip(desc.color_attachments.iter());
    let depth = frame_buffer.depth.iter().zip(desc.depth_attachment.iter());
    for (texture, attachment) in colors.chain(depth) {
        if attachment.load_op == LoadOp::Clear {
            fill_texture(texture, attachment.clear_value);
        }
    }
}

fn fill_texture(texture: &SoftwareTexture, clear: ClearValue) {
    let pixel = encode_clear_value(texture.format(), clear);
    if pixel.is_empty() {
        return;
    }
    let mut subresources = texture.subresources().write();
    for chunk in subresources[0].chunks_exact_mut(pixel.len()) {
        chunk.copy_from_slice(&pixel);
    }
}

fn copy_buffer(dst: &Arc<SoftwareBuffer>, dst_offset: u64, src: &Arc<SoftwareBuffer>, src_offset: u64, size: u64) {
    let (d, s, n) = (dst_offset as usize, src_offset as usize, size as usize);
    if Arc::ptr_eq(dst, src) {
        let mut memory = dst.memory().write();
        if s + n <= memory.len() && d + n <= memory.len() {
            memory.copy_within(s..s + n, d);
        } else {
            error!(buffer = dst_name(dst), "copy_buffer_region out of range");
        }
        return;
    }

    let src_memory = src.memory().read();
    let mut dst_memory = dst.memory().write();
    match (dst_memory.get_mut(d..d + n), src_memory.get(s..s + n)) {
        (Some(to), Some(from)) => to.copy_from_slice(from),
        _ => error!(buffer = dst_name(dst), "copy_buffer_region out of range"),
    }
}

fn copy_texture(dst: &Arc<SoftwareTexture>, src: &Arc<SoftwareTexture>) {
    if Arc::ptr_eq(dst, src) {
        return;
    }
    let src_subresources = src.subresources().read();
    let mut dst_subresources = dst.subresources().write();
    for (to, from) in dst_subresources.iter_mut().zip(src_subresources.iter()) {
        let n = to.len().min(from.len());
        to[..n].copy_from_slice(&from[..n]);
    }
}

fn copy_buffer_to_texture(
    dst: &SoftwareTexture,
    subresource: u32,
    src: &SoftwareBuffer,
    footprint: &TextureFootprint,
) {
    let bpp = dst.format().bytes_per_pixel() as usize;
    let (mip_width, mip_height) = subresource_extent(dst, subresource);
    let width = footprint.width.min(mip_width) as usize;
    let height = footprint.height.min(mip_height) as usize;
    let row = width * bpp;

    let src_memory = src.memory().read();
    let mut dst_subresources = dst.subresources().write();
    let Some(pixels) = dst_subresources.get_mut(subresource as usize) else {
        return;
    };
    for y in 0..height {
        let from = footprint.offset as usize + y * footprint.row_pitch as usize;
        let to = y * mip_width as usize * bpp;
        match src_memory.get(from..from + row) {
            Some(bytes) => pixels[to..to + row].copy_from_slice(bytes),
            None => {
                error!("texture upload reads past the end of the source buffer");
                return;
            }
        }
    }
}

fn copy_texture_to_buffer(
    dst: &SoftwareBuffer,
    footprint: &TextureFootprint,
    src: &SoftwareTexture,
    subresource: u32,
) {
    let bpp = src.format().bytes_per_pixel() as usize;
    let (mip_width, mip_height) = subresource_extent(src, subresource);
    let width = footprint.width.min(mip_width) as usize;
    let height = footprint.height.min(mip_height) as usize;
    let row = width * bpp;

    let src_subresources = src.subresources().read();
    let mut dst_memory = dst.memory().write();
    let Some(pixels) = src_subresources.get(subresource as usize) else {
        return;
    };
    for y in 0..height {
        let from = y * mip_width as usize * bpp;
        let to = footprint.offset as usize + y * footprint.row_pitch as usize;
        match dst_memory.get_mut(to..to + row) {
            Some(bytes) => bytes.copy_from_slice(&pixels[from..from + row]),
            None => {
                error!("texture readback writes past the end of the destination buffer");
                return;
            }
        }
    }
}

fn copy_texture_region(
    dst: &Arc<SoftwareTexture>,
    dst_subresource: u32,
    src: &Arc<SoftwareTexture>,
    src_subresource: u32,
    width: u32,
    height: u32,
) {
    if Arc::ptr_eq(dst, src) {
        return;
    }
    let bpp = src.format().bytes_per_pixel() as usize;
    let (src_width, _) = subresource_extent(src, src_subresource);
    let (dst_width, _) = subresource_extent(dst, dst_subresource);
    let row = width as usize * bpp;

    let src_subresources = src.subresources().read();
    let mut dst_subresources = dst.subresources().write();
    let (Some(from), Some(to)) = (
        src_subresources.get(src_subresource as usize),
        dst_subresources.get_mut(dst_subresource as usize),
    ) else {
        return;
    };
    for y in 0..height as usize {
        let s = y * src_width as usize * bpp;
        let d = y * dst_width as usize * bpp;
        to[d..d + row].copy_from_slice(&from[s..s + row]);
    }
}

fn subresource_extent(texture: &SoftwareTexture, subresource: u32) -> (u32, u32) {
    let desc = texture.desc();
    desc.mip_extent(subresource % desc.mip_levels)
}

/// 软件命令列表
pub struct SoftwareCommandList {
    state: CommandListState,
    commands: Vec<Command>,
    sealed: Option<Arc<RecordedCommands>>,
    last_render_pass: Option<(Arc<SoftwareRenderPass>, Arc<SoftwareFrameBuffer>)>,
}

impl SoftwareCommandList {
    pub(crate) fn new(list_type: CommandListType, _device: Arc<DeviceShared>) -> Self {
        Self {
            state: CommandListState::new(list_type),
            commands: Vec::new(),
            sealed: None,
            last_render_pass: None,
        }
    }

    /// 已封存的命令；仍在录制或从未录制时为 `None`
    pub(crate) fn sealed(&self) -> Option<Arc<RecordedCommands>> {
        if self.state.is_recording() {
            return None;
        }
        self.sealed.clone()
    }

    /// 本次录制的命令数
    pub fn command_count(&self) -> u32 {
        self.state.command_count()
    }

    fn open_render_pass(
        &mut self,
        render_pass: &Arc<SoftwareRenderPass>,
        frame_buffer: &Arc<SoftwareFrameBuffer>,
        continued: bool,
    ) {
        self.state.begin_render_pass();
        let desc = &render_pass.desc;
        debug_assert_eq!(frame_buffer.colors.len(), desc.color_attachments.len());

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

        self.commands.push(Command::BeginRenderPass {
            frame_buffer: Arc::clone(frame_buffer),
            continued,
        });
    }
}

impl RhiCommandList<SoftwareBackend> for SoftwareCommandList {
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
        self.commands.clear();
        self.sealed = None;

        if continue_last_render_pass {
            if let Some((render_pass, frame_buffer)) = self.last_render_pass.clone() {
                self.open_render_pass(&render_pass, &frame_buffer, true);
            }
        }
        Ok(())
    }

    fn end_recording(&mut self) -> Result<()> {
        self.state.end()?;
        self.sealed = Some(Arc::new(RecordedCommands {
            commands: std::mem::take(&mut self.commands),
        }));
        Ok(())
    }

    fn begin_render_pass(
        &mut self,
        render_pass: &Arc<SoftwareRenderPass>,
        frame_buffer: &Arc<SoftwareFrameBuffer>,
    ) {
        self.open_render_pass(render_pass, frame_buffer, false);
        self.last_render_pass = Some((Arc::clone(render_pass), Arc::clone(frame_buffer)));
    }

    fn end_render_pass(&mut self) {
        self.state.end_render_pass();
        if let Some((render_pass, frame_buffer)) = &self.last_render_pass {
            let desc = render_pass.desc();
            let colors = frame_buffer.colors.iter().zip(desc.color_attachments.iter());
            let depth = frame_buffer.depth.iter().zip(desc.depth_attachment.iter());
            for (texture, attachment) in colors.chain(depth) {
                texture.set_usage_state(attachment.final_state);
            }
        }
        self.commands.push(Command::EndRenderPass);
    }

    fn set_viewport(&mut self, viewport: &Viewport) {
        self.state.require_graphics("set_viewport");
        self.commands.push(Command::SetViewport(*viewport));
    }

    fn set_scissor(&mut self, rect: &ScissorRect) {
        self.state.require_graphics("set_scissor");
        self.commands.push(Command::SetScissor(*rect));
    }

    fn draw_instanced(&mut self, vertex_count: u32, instance_count: u32, _first_vertex: u32, _first_instance: u32) {
        self.state.require_graphics("draw_instanced");
        debug_assert!(self.state.is_in_render_pass(), "draw outside a render pass");
        self.commands.push(Command::Draw {
            vertex_count,
            instance_count,
        });
    }

    fn draw_indexed_instanced(
        &mut self,
        index_count: u32,
        instance_count: u32,
        _first_index: u32,
        _base_vertex: i32,
        _first_instance: u32,
    ) {
        self.state.require_graphics("draw_indexed_instanced");
        debug_assert!(self.state.is_in_render_pass(), "draw outside a render pass");
        self.commands.push(Command::DrawIndexed {
            index_count,
            instance_count,
        });
    }

    fn dispatch(&mut self, group_count_x: u32, group_count_y: u32, group_count_z: u32) {
        self.state.require_compute("dispatch");
        self.commands.push(Command::Dispatch {
            groups: [group_count_x, group_count_y, group_count_z],
        });
    }

    fn resource_barrier(&mut self, barriers: &[TransitionBarrier<'_, SoftwareBackend>]) {
        self.state.require_outside_render_pass("resource_barrier");
        let mut count = 0;
        for barrier in barriers {
            let resource = barrier.resource.as_gpu_resource();
            if resource.usage_state() == barrier.after {
                continue;
            }
            resource.set_usage_state(barrier.after);
            count += 1;
        }
        if count > 0 {
            self.commands.push(Command::Barrier { count });
        }
    }

    fn copy_resource(&mut self, dst: ResourceRef<'_, SoftwareBackend>, src: ResourceRef<'_, SoftwareBackend>) {
        self.state.require_outside_render_pass("copy_resource");
        debug_check_copy(dst, src);
        match (dst, src) {
            (ResourceRef::Buffer(dst), ResourceRef::Buffer(src)) => {
                debug_assert_eq!(dst.size(), src.size(), "copy_resource size mismatch");
                self.commands.push(Command::CopyBuffer {
                    dst: Arc::clone(dst),
                    dst_offset: 0,
                    src: Arc::clone(src),
                    src_offset: 0,
                    size: dst.size().min(src.size()),
                });
            }
            (ResourceRef::Texture(dst), ResourceRef::Texture(src)) => {
                debug_assert_eq!(
                    (dst.width(), dst.height(), dst.format()),
                    (src.width(), src.height(), src.format()),
                    "copy_resource between mismatched textures"
                );
                self.commands.push(Command::CopyTexture {
                    dst: Arc::clone(dst),
                    src: Arc::clone(src),
                });
            }
            _ => debug_assert!(false, "copy_resource between a buffer and a texture"),
        }
    }

    fn copy_buffer_region(
        &mut self,
        dst: &Arc<SoftwareBuffer>,
        dst_offset: u64,
        src: &Arc<SoftwareBuffer>,
        src_offset: u64,
        size: u64,
    ) {
        self.state.require_outside_render_pass("copy_buffer_region");
        debug_check_copy::<SoftwareBackend>(ResourceRef::Buffer(dst), ResourceRef::Buffer(src));
        self.commands.push(Command::CopyBuffer {
            dst: Arc::clone(dst),
            dst_offset,
            src: Arc::clone(src),
            src_offset,
            size,
        });
    }

    fn copy_texture_region(
        &mut self,
        dst: &TextureCopyLocation<'_, SoftwareBackend>,
        src: &TextureCopyLocation<'_, SoftwareBackend>,
    ) {
        self.state.require_outside_render_pass("copy_texture_region");
        debug_check_copy(dst.resource(), src.resource());

        let command = match (dst, src) {
            (
                TextureCopyLocation::Subresource { texture, mip_level, array_layer },
                TextureCopyLocation::Footprint { buffer, footprint },
            ) => Command::CopyBufferToTexture {
                dst: Arc::clone(texture),
                subresource: texture.desc().subresource_index(*mip_level, *array_layer),
                src: Arc::clone(buffer),
                footprint: *footprint,
            },
            (
                TextureCopyLocation::Footprint { buffer, footprint },
                TextureCopyLocation::Subresource { texture, mip_level, array_layer },
            ) => Command::CopyTextureToBuffer {
                dst: Arc::clone(buffer),
                footprint: *footprint,
                src: Arc::clone(texture),
                subresource: texture.desc().subresource_index(*mip_level, *array_layer),
            },
            (
                TextureCopyLocation::Subresource { texture: dst_tex, mip_level: dst_mip, array_layer: dst_layer },
                TextureCopyLocation::Subresource { texture: src_tex, mip_level: src_mip, array_layer: src_layer },
            ) => {
                let (sw, sh) = src.extent();
                let (dw, dh) = dst.extent();
                Command::CopyTextureRegion {
                    dst: Arc::clone(dst_tex),
                    dst_subresource: dst_tex.desc().subresource_index(*dst_mip, *dst_layer),
                    src: Arc::clone(src_tex),
                    src_subresource: src_tex.desc().subresource_index(*src_mip, *src_layer),
                    width: sw.min(dw),
                    height: sh.min(dh),
                }
            }
            (TextureCopyLocation::Footprint { .. }, TextureCopyLocation::Footprint { .. }) => {
                debug_assert!(false, "copy_texture_region between two buffers");
                return;
            }
        };
        self.commands.push(command);
    }

    fn update_buffer(&mut self, dst: &Arc<SoftwareBuffer>, offset: u64, data: &[u32]) {
        self.state.require_outside_render_pass("update_buffer");
        debug_assert_eq!(dst.usage_state(), ResourceState::CopyDest);
        debug_assert!(offset % 4 == 0, "update_buffer offset must be 4-byte aligned");
        self.commands.push(Command::UpdateBuffer {
            dst: Arc::clone(dst),
            offset,
            data: data.to_vec(),
        });
    }

    fn write_timestamp(&mut self, query_heap: &Arc<SoftwareQueryHeap>, index: u32) {
        self.state.require_outside_render_pass("write_timestamp");
        self.commands.push(Command::WriteTimestamp {
            heap: Arc::clone(query_heap),
            index,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rhi::{BufferDesc, Format, ResourceUsage, TextureDesc};
    use std::time::Duration;

    fn list(list_type: CommandListType) -> SoftwareCommandList {
        SoftwareCommandList::new(list_type, DeviceShared::for_tests(Duration::ZERO))
    }

    #[test]
    fn test_barrier_updates_tracked_state_at_record_time() {
        let texture = Arc::new(SoftwareTexture::new(&TextureDesc::new_2d(
            2,
            2,
            Format::Rgba8Unorm,
            ResourceUsage::SHADER_RESOURCE,
        )));
        let mut list = list(CommandListType::Graphics);
        list.begin_recording(false).unwrap();
        list.resource_barrier(&[TransitionBarrier::texture(&texture, ResourceState::CopyDest)]);
        assert_eq!(texture.usage_state(), ResourceState::CopyDest);

        // 相同状态的屏障不产生命令
        let before = list.command_count();
        list.resource_barrier(&[TransitionBarrier::texture(&texture, ResourceState::CopyDest)]);
        assert_eq!(list.commands.len(), 1);
        assert!(list.command_count() > before);
    }

    #[test]
    fn test_prepare_and_complete_copy_restore_states() {
        let src = Arc::new(SoftwareBuffer::new(
            &BufferDesc::device_local(16, ResourceUsage::COPY_SRC).with_initial_state(ResourceState::ShaderResource),
        ));
        let dst = Arc::new(SoftwareBuffer::new(&BufferDesc::readback(16)));
        let mut list = list(CommandListType::Copy);
        list.begin_recording(false).unwrap();

        let states = list.prepare_copy(ResourceRef::Buffer(&dst), ResourceRef::Buffer(&src));
        assert_eq!(src.usage_state(), ResourceState::CopySource);
        assert_eq!(dst.usage_state(), ResourceState::CopyDest);

        list.copy_resource(ResourceRef::Buffer(&dst), ResourceRef::Buffer(&src));
        list.complete_copy(ResourceRef::Buffer(&dst), ResourceRef::Buffer(&src), states, None);
        assert_eq!(src.usage_state(), ResourceState::ShaderResource);
        assert_eq!(dst.usage_state(), ResourceState::CopyDest);
        list.end_recording().unwrap();
        assert!(list.sealed().is_some());
    }

    #[test]
    fn test_replay_uploads_texture_rows() {
        let device = DeviceShared::for_tests(Duration::ZERO);
        let texture = Arc::new(SoftwareTexture::new(
            &TextureDesc::new_2d(2, 2, Format::Rgba8Unorm, ResourceUsage::COPY_DST)
                .with_initial_state(ResourceState::CopyDest),
        ));
        let footprint = TextureFootprint::aligned(0, Format::Rgba8Unorm, 2, 2);
        let upload = Arc::new(SoftwareBuffer::new(&BufferDesc::upload(footprint.total_size())));
        upload.write(0, &[1; 8]).unwrap();
        upload.write(footprint.row_pitch as u64, &[2; 8]).unwrap();

        let mut list = SoftwareCommandList::new(CommandListType::Copy, Arc::clone(&device));
        list.begin_recording(false).unwrap();
        list.copy_texture_region(
            &TextureCopyLocation::texture(&texture),
            &TextureCopyLocation::Footprint { buffer: &upload, footprint },
        );
        list.end_recording().unwrap();
        list.sealed().unwrap().replay(&device);

        assert_eq!(texture.read_pixels(0, 0), [vec![1u8; 8], vec![2u8; 8]].concat());
        assert_eq!(device.stats.snapshot().copies, 1);
    }

    #[test]
    fn test_update_buffer_replay() {
        let device = DeviceShared::for_tests(Duration::ZERO);
        let buffer = Arc::new(SoftwareBuffer::new(&BufferDesc::readback(8)));
        let mut list = SoftwareCommandList::new(CommandListType::Compute, Arc::clone(&device));
        list.begin_recording(false).unwrap();
        list.update_buffer(&buffer, 4, &[0xdead_beef]);
        list.end_recording().unwrap();
        list.sealed().unwrap().replay(&device);

        let mut out = [0u8; 4];
        buffer.read(4, &mut out).unwrap();
        assert_eq!(u32::from_le_bytes(out), 0xdead_beef);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "only valid on a Graphics list")]
    fn test_draw_on_compute_list_asserts() {
        let mut list = list(CommandListType::Compute);
        list.begin_recording(false).unwrap();
        list.draw_instanced(3, 1, 0, 0);
    }
}
