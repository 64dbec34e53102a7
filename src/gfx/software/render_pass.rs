use std::sync::Arc;

use crate::rhi::{DescriptorId, RenderPassDesc, RhiFrameBuffer, RhiRenderPass};

use super::resource::SoftwareTexture;
use super::SoftwareBackend;

/// 软件渲染通道，只保存描述
pub struct SoftwareRenderPass {
    pub(crate) desc: RenderPassDesc,
}

impl RhiRenderPass for SoftwareRenderPass {
    fn desc(&self) -> &RenderPassDesc {
        &self.desc
    }
}

/// 软件帧缓冲
pub struct SoftwareFrameBuffer {
    pub(crate) render_pass: Arc<SoftwareRenderPass>,
    pub(crate) colors: Vec<Arc<SoftwareTexture>>,
    pub(crate) depth: Option<Arc<SoftwareTexture>>,
    pub(crate) rtv_ids: Vec<DescriptorId>,
    pub(crate) dsv_id: Option<DescriptorId>,
    pub(crate) width: u32,
    pub(crate) height: u32,
}

impl RhiFrameBuffer<SoftwareBackend> for SoftwareFrameBuffer {
    fn render_pass(&self) -> &Arc<SoftwareRenderPass> {
        &self.render_pass
    }

    fn color_attachments(&self) -> &[Arc<SoftwareTexture>] {
        &self.colors
    }

    fn depth_attachment(&self) -> Option<&Arc<SoftwareTexture>> {
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
