//! 软件后端
//!
//! 不依赖任何 GPU 的参考实现：每个命令队列是一个工作线程，命令列表在
//! 队列线程上回放到 CPU 内存中的缓冲区和纹理。用于无窗口运行与测试。

mod command_list;
mod descriptor;
mod device;
mod render_pass;
mod resource;
mod swapchain;
mod sync;

pub use command_list::SoftwareCommandList;
pub use descriptor::{SoftwareDescriptor, SoftwareDescriptorHeap};
pub use device::{DeviceStatistics, DeviceStatsSnapshot, SoftwareAdapter, SoftwareDevice, SoftwareInstance};
pub use render_pass::{SoftwareFrameBuffer, SoftwareRenderPass};
pub use resource::{SoftwareBuffer, SoftwareQueryHeap, SoftwareResourceView, SoftwareTexture};
pub use swapchain::SoftwareSwapchain;
pub use sync::{SoftwareCommandQueue, SoftwareFence};

use crate::rhi::{GraphicsApi, RhiBackend};

/// 软件后端标记类型
pub struct SoftwareBackend;

impl RhiBackend for SoftwareBackend {
    const API: GraphicsApi = GraphicsApi::Software;

    type Instance = SoftwareInstance;
    type Adapter = SoftwareAdapter;
    type Device = SoftwareDevice;
    type Fence = SoftwareFence;
    type CommandQueue = SoftwareCommandQueue;
    type CommandList = SoftwareCommandList;
    type DescriptorHeap = SoftwareDescriptorHeap;
    type Buffer = SoftwareBuffer;
    type Texture = SoftwareTexture;
    type ResourceView = SoftwareResourceView;
    type RenderPass = SoftwareRenderPass;
    type FrameBuffer = SoftwareFrameBuffer;
    type Swapchain = SoftwareSwapchain;
    type QueryHeap = SoftwareQueryHeap;
}
