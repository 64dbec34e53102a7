//! Vulkan 渲染通道与帧缓冲
//!
//! 每个渲染通道创建两个 `VkRenderPass`：一个按描述的加载方式，另一个用于
//! 继续上一次通道（全部附件 `LOAD`，初始布局为结束状态的布局）。
//! 两者只在加载方式和布局上不同，因此与同一个 `VkFramebuffer` 兼容。

use ash::vk;
use std::sync::Arc;

use crate::core::error::{GraphicsError, Result};
use crate::rhi::render_pass::attachment_extent;
use crate::rhi::{AttachmentDesc, DescriptorId, RenderPassDesc, RhiFrameBuffer, RhiRenderPass};

use super::conversion;
use super::device::DeviceShared;
use super::resource::VulkanTexture;
use super::{vk_error, VulkanBackend};

fn attachment_description(attachment: &AttachmentDesc, continued: bool) -> vk::AttachmentDescription {
    let load_op = conversion::load_op(attachment.load_op);
    let store_op = conversion::store_op(attachment.store_op);
    let (stencil_load_op, stencil_store_op) = if attachment.format.has_stencil() {
        (load_op, store_op)
    } else {
        (vk::AttachmentLoadOp::DONT_CARE, vk::AttachmentStoreOp::DONT_CARE)
    };
    let initial_state = if continued {
        attachment.final_state
    } else {
        attachment.initial_state
    };
    vk::AttachmentDescription {
        format: conversion::format_to_vk(attachment.format),
        samples: vk::SampleCountFlags::TYPE_1,
        load_op,
        store_op,
        stencil_load_op,
        stencil_store_op,
        initial_layout: conversion::state_info(initial_state).layout,
        final_layout: conversion::state_info(attachment.final_state).layout,
        ..Default::default()
    }
}

fn create_native_pass(shared: &DeviceShared, desc: &RenderPassDesc, continued: bool) -> Result<vk::RenderPass> {
    let attachments: Vec<vk::AttachmentDescription> = desc
        .color_attachments
        .iter()
        .chain(desc.depth_attachment.iter())
        .map(|a| attachment_description(a, continued))
        .collect();

    let color_refs: Vec<vk::AttachmentReference> = (0..desc.color_attachments.len() as u32)
        .map(|attachment| vk::AttachmentReference {
            attachment,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        })
        .collect();
    let depth_ref = vk::AttachmentReference {
        attachment: desc.color_attachments.len() as u32,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };
    let mut subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs);
    if desc.depth_attachment.is_some() {
        subpass = subpass.depth_stencil_attachment(&depth_ref);
    }

    let attachment_stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
    let attachment_writes =
        vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
    let dependencies = [
        vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: attachment_stages,
            dst_stage_mask: attachment_stages,
            src_access_mask: vk::AccessFlags::empty(),
            dst_access_mask: attachment_writes
                | vk::AccessFlags::COLOR_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
            ..Default::default()
        },
        vk::SubpassDependency {
            src_subpass: 0,
            dst_subpass: vk::SUBPASS_EXTERNAL,
            src_stage_mask: attachment_stages,
            dst_stage_mask: vk::PipelineStageFlags::ALL_COMMANDS,
            src_access_mask: attachment_writes,
            dst_access_mask: vk::AccessFlags::MEMORY_READ,
            ..Default::default()
        },
    ];

    let subpasses = [subpass];
    let create_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);
    unsafe { shared.device.create_render_pass(&create_info, None) }
        .map_err(vk_error(GraphicsError::ResourceCreation, "vkCreateRenderPass"))
}

/// Vulkan 渲染通道
pub struct VulkanRenderPass {
    shared: Arc<DeviceShared>,
    desc: RenderPassDesc,
    begin_pass: vk::RenderPass,
    continue_pass: vk::RenderPass,
}

impl VulkanRenderPass {
    pub(crate) fn new(shared: Arc<DeviceShared>, desc: &RenderPassDesc) -> Result<Self> {
        let begin_pass = create_native_pass(&shared, desc, false)?;
        let continue_pass = match create_native_pass(&shared, &desc.continued(), true) {
            Ok(pass) => pass,
            Err(e) => {
                unsafe { shared.device.destroy_render_pass(begin_pass, None) };
                return Err(e);
            }
        };
        Ok(Self {
            shared,
            desc: desc.clone(),
            begin_pass,
            continue_pass,
        })
    }

    pub fn raw(&self, continued: bool) -> vk::RenderPass {
        if continued {
            self.continue_pass
        } else {
            self.begin_pass
        }
    }
}

impl RhiRenderPass for VulkanRenderPass {
    fn desc(&self) -> &RenderPassDesc {
        &self.desc
    }
}

impl Drop for VulkanRenderPass {
    fn drop(&mut self) {
        unsafe {
            self.shared.device.destroy_render_pass(self.begin_pass, None);
            self.shared.device.destroy_render_pass(self.continue_pass, None);
        }
    }
}

/// Vulkan 帧缓冲
pub struct VulkanFrameBuffer {
    shared: Arc<DeviceShared>,
    render_pass: Arc<VulkanRenderPass>,
    pub(crate) colors: Vec<Arc<VulkanTexture>>,
    pub(crate) depth: Option<Arc<VulkanTexture>>,
    rtv_ids: Vec<DescriptorId>,
    dsv_id: Option<DescriptorId>,
    pub(crate) width: u32,
    pub(crate) height: u32,
    framebuffer: vk::Framebuffer,
}

impl VulkanFrameBuffer {
    pub(crate) fn new(
        shared: Arc<DeviceShared>,
        render_pass: &Arc<VulkanRenderPass>,
        colors: &[Arc<VulkanTexture>],
        depth: Option<&Arc<VulkanTexture>>,
        rtv_ids: Vec<DescriptorId>,
        dsv_id: Option<DescriptorId>,
    ) -> Result<Self> {
        let (width, height) = attachment_extent(&render_pass.desc, colors, depth)?;
        let views: Vec<vk::ImageView> = colors
            .iter()
            .chain(depth)
            .map(|texture| texture.default_view())
            .collect();
        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass.raw(false))
            .attachments(&views)
            .width(width)
            .height(height)
            .layers(1);
        let framebuffer = unsafe { shared.device.create_framebuffer(&create_info, None) }
            .map_err(vk_error(GraphicsError::ResourceCreation, "vkCreateFramebuffer"))?;

        Ok(Self {
            shared,
            render_pass: Arc::clone(render_pass),
            colors: colors.to_vec(),
            depth: depth.cloned(),
            rtv_ids,
            dsv_id,
            width,
            height,
            framebuffer,
        })
    }

    pub fn raw(&self) -> vk::Framebuffer {
        self.framebuffer
    }
}

impl RhiFrameBuffer<VulkanBackend> for VulkanFrameBuffer {
    fn render_pass(&self) -> &Arc<VulkanRenderPass> {
        &self.render_pass
    }

    fn color_attachments(&self) -> &[Arc<VulkanTexture>] {
        &self.colors
    }

    fn depth_attachment(&self) -> Option<&Arc<VulkanTexture>> {
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

impl Drop for VulkanFrameBuffer {
    fn drop(&mut self) {
        unsafe { self.shared.device.destroy_framebuffer(self.framebuffer, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rhi::{Format, ResourceState};

    #[test]
    fn test_continued_pass_starts_from_final_layout() {
        let desc = RenderPassDesc::swapchain(Format::Bgra8Unorm, Format::D24UnormS8Uint, [0.0; 4]);
        let continued = desc.continued();

        let color = attachment_description(&continued.color_attachments[0], true);
        assert_eq!(color.load_op, vk::AttachmentLoadOp::LOAD);
        assert_eq!(
            color.initial_layout,
            conversion::state_info(desc.color_attachments[0].final_state).layout
        );

        let depth = attachment_description(&desc.depth_attachment.unwrap(), false);
        assert_eq!(depth.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(depth.stencil_load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(
            depth.initial_layout,
            conversion::state_info(ResourceState::DepthWrite).layout
        );
    }

    #[test]
    fn test_color_only_attachment_ignores_stencil() {
        let desc = RenderPassDesc::swapchain(Format::Rgba16Float, Format::D32Float, [0.0; 4]);
        let color = attachment_description(&desc.color_attachments[0], false);
        assert_eq!(color.stencil_load_op, vk::AttachmentLoadOp::DONT_CARE);
        assert_eq!(color.format, vk::Format::R16G16B16A16_SFLOAT);
    }
}
