//! Vulkan 后端
//!
//! 基于 ash 的 RHI 实现。
//!
//! - Fence 是 timeline semaphore，队列上的 wait 挂到下一次提交
//! - 命令列表持有一组命令池轮流使用，池的回收由队列内部的提交 timeline 判断
//! - 着色器可见的描述符是一个 update-after-bind 的 bindless 描述符集，
//!   每种描述符类型对应一个数组绑定
//! - 交换链获取图像时在 CPU 上等待 VkFence，然后在 CPU 上 signal timeline；
//!   呈现前在 CPU 上等待渲染完成的值
//!
//! 原生设备句柄放在 [`device::DeviceShared`] 中，由所有子对象通过 `Arc` 持有，
//! 因此设备总是最后一个被销毁。

mod command_list;
mod conversion;
mod descriptor;
mod device;
mod render_pass;
mod resource;
mod swapchain;
mod sync;

pub use command_list::VulkanCommandList;
pub use descriptor::VulkanDescriptorHeap;
pub use device::{VulkanAdapter, VulkanDevice, VulkanInstance};
pub use render_pass::{VulkanFrameBuffer, VulkanRenderPass};
pub use resource::{VulkanBuffer, VulkanQueryHeap, VulkanResourceView, VulkanTexture};
pub use swapchain::VulkanSwapchain;
pub use sync::{VulkanCommandQueue, VulkanFence};

use ash::vk;
use tracing::error;

use crate::core::error::{DistRhiError, GraphicsError};
use crate::rhi::{GraphicsApi, RhiBackend};

/// Vulkan 后端标记类型
pub struct VulkanBackend;

impl RhiBackend for VulkanBackend {
    const API: GraphicsApi = GraphicsApi::Vulkan;

    type Instance = VulkanInstance;
    type Adapter = VulkanAdapter;
    type Device = VulkanDevice;
    type Fence = VulkanFence;
    type CommandQueue = VulkanCommandQueue;
    type CommandList = VulkanCommandList;
    type DescriptorHeap = VulkanDescriptorHeap;
    type Buffer = VulkanBuffer;
    type Texture = VulkanTexture;
    type ResourceView = VulkanResourceView;
    type RenderPass = VulkanRenderPass;
    type FrameBuffer = VulkanFrameBuffer;
    type Swapchain = VulkanSwapchain;
    type QueryHeap = VulkanQueryHeap;
}

/// 把 `vk::Result` 转成引擎错误
///
/// `VK_ERROR_DEVICE_LOST` 总是映射为 [`GraphicsError::DeviceLost`]，
/// 其余错误使用 `kind` 指定的变体。
pub(crate) fn vk_error(
    kind: fn(String) -> GraphicsError,
    what: &'static str,
) -> impl Fn(vk::Result) -> DistRhiError {
    move |result| {
        let message = format!("{}: {:?}", what, result);
        let err = if result == vk::Result::ERROR_DEVICE_LOST {
            GraphicsError::DeviceLost(message)
        } else {
            kind(message)
        };
        error!("{}", err);
        err.into()
    }
}
