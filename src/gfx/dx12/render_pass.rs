//! D3D12 渲染通道与帧缓冲
//!
//! D3D12 没有渲染通道对象，这里只保存描述；加载/存储语义由命令列表在
//! 通道开始时用清屏命令实现。帧缓冲在创建时把 RTV / DSV 写进描述符堆，
//! 并缓存对应的 CPU 句柄。

use std::sync::Arc;
use tracing::trace;
use windows::Win32::Graphics::Direct3D12::D3D12_CPU_DESCRIPTOR_HANDLE;

use crate::core::error::Result;
use crate::rhi::render_pass::attachment_extent;
use crate::rhi::{
    DescriptorHeapType, DescriptorId, RenderPassDesc, RhiDescriptorHeap, RhiFrameBuffer, RhiRenderPass,
};

use super::descriptor::Dx12DescriptorHeap;
use super::device::DeviceShared;
use super::resource::{write_depth_stencil, write_render_target, Dx12Texture};
use super::Dx12Backend;

/// D3D12 渲染通道
pub struct Dx12RenderPass {
    desc: RenderPassDesc,
}

impl Dx12RenderPass {
    pub(crate) fn new(desc: &RenderPassDesc) -> Self {
        Self { desc: desc.clone() }
    }
}

impl RhiRenderPass for Dx12RenderPass {
    fn desc(&self) -> &RenderPassDesc {
        &self.desc
    }
}

/// D3D12 帧缓冲
///
/// 描述符堆的 RTV / DSV 段被重建后，缓存的句柄失效，需要重新创建帧缓冲。
pub struct Dx12FrameBuffer {
    render_pass: Arc<Dx12RenderPass>,
    pub(crate) colors: Vec<Arc<Dx12Texture>>,
    pub(crate) depth: Option<Arc<Dx12Texture>>,
    rtv_ids: Vec<DescriptorId>,
    dsv_id: Option<DescriptorId>,
    pub(crate) rtv_handles: Vec<D3D12_CPU_DESCRIPTOR_HANDLE>,
    pub(crate) dsv_handle: Option<D3D12_CPU_DESCRIPTOR_HANDLE>,
    width: u32,
    height: u32,
}

unsafe impl Send for Dx12FrameBuffer {}
unsafe impl Sync for Dx12FrameBuffer {}

fn native_handle(heap: &Dx12DescriptorHeap, id: DescriptorId) -> D3D12_CPU_DESCRIPTOR_HANDLE {
    D3D12_CPU_DESCRIPTOR_HANDLE {
        ptr: heap.cpu_descriptor_handle(id).ptr,
    }
}

impl Dx12FrameBuffer {
    pub(crate) fn new(
        shared: &DeviceShared,
        heap: &mut Dx12DescriptorHeap,
        render_pass: &Arc<Dx12RenderPass>,
        colors: &[Arc<Dx12Texture>],
        depth: Option<&Arc<Dx12Texture>>,
    ) -> Result<Self> {
        let desc = render_pass.desc();
        let (width, height) = attachment_extent(desc, colors, depth)?;

        let mut rtv_ids = Vec::with_capacity(colors.len());
        let mut rtv_handles = Vec::with_capacity(colors.len());
        for (texture, attachment) in colors.iter().zip(desc.color_attachments.iter()) {
            let id = heap.allocate(DescriptorHeapType::Rtv)?;
            let handle = native_handle(heap, id);
            write_render_target(&shared.device, texture, attachment.format, handle);
            rtv_ids.push(id);
            rtv_handles.push(handle);
        }

        let mut dsv_id = None;
        let mut dsv_handle = None;
        if let (Some(texture), Some(attachment)) = (depth, desc.depth_attachment.as_ref()) {
            let id = heap.allocate(DescriptorHeapType::Dsv)?;
            let handle = native_handle(heap, id);
            write_depth_stencil(&shared.device, texture, attachment.format, handle);
            dsv_id = Some(id);
            dsv_handle = Some(handle);
        }

        trace!(
            render_pass = %desc.name,
            width,
            height,
            color_attachments = colors.len(),
            "D3D12 frame buffer created"
        );
        Ok(Self {
            render_pass: Arc::clone(render_pass),
            colors: colors.to_vec(),
            depth: depth.cloned(),
            rtv_ids,
            dsv_id,
            rtv_handles,
            dsv_handle,
            width,
            height,
        })
    }
}

impl RhiFrameBuffer<Dx12Backend> for Dx12FrameBuffer {
    fn render_pass(&self) -> &Arc<Dx12RenderPass> {
        &self.render_pass
    }

    fn color_attachments(&self) -> &[Arc<Dx12Texture>] {
        &self.colors
    }

    fn depth_attachment(&self) -> Option<&Arc<Dx12Texture>> {
        self.depth.as_ref()
    }

    fn render_target_ids(&self) -> &[DescriptorId] {
        &self.rtv_ids
    }

    fn depth_stencil_id(&self) -> Option<DescriptorId> {
        self.dsv_id
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }
}
