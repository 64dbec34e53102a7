//! 渲染通道与帧缓冲
//!
//! 渲染通道描述附件的格式和加载/存储语义；帧缓冲把一个渲染通道
//! 与具体的颜色 / 深度纹理及其 RTV/DSV 绑定起来。
//!
//! 附件在通道开始时必须处于 `initial_state`，通道内处于
//! `RenderTarget` / `DepthWrite`，通道结束后被跟踪状态设为 `final_state`。

use std::sync::Arc;

use super::descriptor::DescriptorId;
use super::resource::{ResourceState, RhiTexture};
use super::types::{ClearValue, Format};
use super::RhiBackend;
use crate::core::error::{GraphicsError, Result};

/// 附件加载方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOp {
    Load,
    Clear,
    DontCare,
}

/// 附件存储方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Store,
    DontCare,
}

/// 附件描述
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttachmentDesc {
    pub format: Format,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub initial_state: ResourceState,
    pub final_state: ResourceState,
    pub clear_value: ClearValue,
}

impl AttachmentDesc {
    /// 通道内附件所处的状态
    pub fn pass_state(&self) -> ResourceState {
        if self.format.is_depth() {
            ResourceState::DepthWrite
        } else {
            ResourceState::RenderTarget
        }
    }
}

/// 渲染通道描述
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPassDesc {
    pub name: String,
    pub color_attachments: Vec<AttachmentDesc>,
    pub depth_attachment: Option<AttachmentDesc>,
}

impl RenderPassDesc {
    /// 交换链使用的颜色 + 深度通道：两者都清屏，结束后保持可写状态
    pub fn swapchain(color_format: Format, depth_format: Format, clear_color: [f32; 4]) -> Self {
        Self {
            name: "SwapchainPass".to_string(),
            color_attachments: vec![AttachmentDesc {
                format: color_format,
                load_op: LoadOp::Clear,
                store_op: StoreOp::Store,
                initial_state: ResourceState::RenderTarget,
                final_state: ResourceState::RenderTarget,
                clear_value: ClearValue::Color(clear_color),
            }],
            depth_attachment: Some(AttachmentDesc {
                format: depth_format,
                load_op: LoadOp::Clear,
                store_op: StoreOp::Store,
                initial_state: ResourceState::DepthWrite,
                final_state: ResourceState::DepthWrite,
                clear_value: ClearValue::DEPTH_ONE,
            }),
        }
    }

    /// 继续上一次通道时使用的描述：全部附件改为 `Load`
    pub fn continued(&self) -> Self {
        let mut desc = self.clone();
        for attachment in desc
            .color_attachments
            .iter_mut()
            .chain(desc.depth_attachment.iter_mut())
        {
            attachment.load_op = LoadOp::Load;
        }
        desc
    }
}

/// 渲染通道
pub trait RhiRenderPass: Send + Sync {
    fn desc(&self) -> &RenderPassDesc;
}

/// 帧缓冲
pub trait RhiFrameBuffer<B: RhiBackend>: Send + Sync {
    fn render_pass(&self) -> &Arc<B::RenderPass>;

    fn color_attachments(&self) -> &[Arc<B::Texture>];

    fn depth_attachment(&self) -> Option<&Arc<B::Texture>>;

    /// 颜色附件的 RTV，与 `color_attachments` 一一对应
    fn render_target_ids(&self) -> &[DescriptorId];

    fn depth_stencil_id(&self) -> Option<DescriptorId>;

    fn width(&self) -> u32;

    fn height(&self) -> u32;
}

/// 检查附件与渲染通道一致、尺寸相同，返回帧缓冲尺寸
pub fn attachment_extent<T: RhiTexture>(
    desc: &RenderPassDesc,
    colors: &[Arc<T>],
    depth: Option<&Arc<T>>,
) -> Result<(u32, u32)> {
    if colors.len() != desc.color_attachments.len() || depth.is_some() != desc.depth_attachment.is_some() {
        return Err(GraphicsError::ResourceCreation(format!(
            "frame buffer attachments do not match render pass '{}'",
            desc.name
        ))
        .into());
    }
    let Some(first) = colors.first().or(depth) else {
        return Err(GraphicsError::ResourceCreation(format!(
            "render pass '{}' has no attachments",
            desc.name
        ))
        .into());
    };
    let extent = (first.width(), first.height());
    for texture in colors.iter().chain(depth) {
        if (texture.width(), texture.height()) != extent {
            return Err(GraphicsError::ResourceCreation(format!(
                "attachment '{}' is {}x{}, expected {}x{}",
                texture.desc().name,
                texture.width(),
                texture.height(),
                extent.0,
                extent.1
            ))
            .into());
        }
    }
    Ok(extent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swapchain_pass_states() {
        let desc = RenderPassDesc::swapchain(Format::Bgra8Unorm, Format::D32Float, [0.0; 4]);
        assert_eq!(desc.color_attachments[0].pass_state(), ResourceState::RenderTarget);
        assert_eq!(
            desc.depth_attachment.map(|d| d.pass_state()),
            Some(ResourceState::DepthWrite)
        );
    }

    #[test]
    fn test_continued_pass_loads() {
        let desc = RenderPassDesc::swapchain(Format::Rgba8Unorm, Format::D32Float, [1.0; 4]);
        let continued = desc.continued();
        assert!(continued.color_attachments.iter().all(|a| a.load_op == LoadOp::Load));
        assert_eq!(continued.depth_attachment.map(|d| d.load_op), Some(LoadOp::Load));
        assert_eq!(desc.color_attachments[0].load_op, LoadOp::Clear);
    }
}
