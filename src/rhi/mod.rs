//! RHI 抽象层
//!
//! 以关联类型的 trait 统一 Vulkan、DirectX 12 与软件后端。
//! 引擎对 [`RhiBackend`] 泛型化，后端在编译期单态化，运行时只在启动时选择一次。
//!
//! # 对象层级
//!
//! ```text
//! Instance → Adapter → Device ─┬─ CommandQueue (Graphics / Compute / Copy)
//!                              ├─ CommandList
//!                              ├─ Fence
//!                              ├─ DescriptorHeap → ResourceView
//!                              ├─ Buffer / Texture
//!                              ├─ RenderPass → FrameBuffer
//!                              ├─ Swapchain
//!                              └─ QueryHeap
//! ```

pub mod command_list;
pub mod descriptor;
pub mod device;
pub mod fence;
pub mod query;
pub mod queue;
pub mod render_pass;
pub mod resource;
pub mod swapchain;
pub mod types;

pub use command_list::{CommandListState, CopyStates, RhiCommandList};
pub use descriptor::{
    CpuDescriptorHandle, DescriptorHeapCore, DescriptorHeapStats, DescriptorHeapType,
    DescriptorId, DescriptorLimits, GpuDescriptorHandle, HeapResetMode, RhiDescriptorHeap,
};
pub use device::{AdapterInfo, InstanceDesc, RhiAdapter, RhiDevice, RhiInstance, WindowHandle};
pub use fence::{FenceValue, RhiFence};
pub use query::RhiQueryHeap;
pub use queue::{CalibrationTimestamp, RhiCommandQueue};
pub use render_pass::{AttachmentDesc, LoadOp, RenderPassDesc, RhiFrameBuffer, RhiRenderPass, StoreOp};
pub use resource::{
    BufferDesc, GpuResource, MemoryHeap, ResourceRef, ResourceState, ResourceStateCell,
    ResourceUsage, ResourceViewDesc, ResourceViewType, RhiBuffer, RhiResourceView, RhiTexture,
    SamplerDesc, TextureCopyLocation, TextureDesc, TextureFootprint, TransitionBarrier, ViewResource,
};
pub use swapchain::{BackBufferRing, RhiSwapchain, SwapchainDesc};
pub use types::{ClearValue, CommandListType, Format, GraphicsApi, ScissorRect, Viewport};

/// 图形后端
///
/// 每个关联类型对应一种 RHI 对象。
pub trait RhiBackend: Sized + Send + Sync + 'static {
    const API: GraphicsApi;

    type Instance: RhiInstance<Self>;
    type Adapter: RhiAdapter<Self>;
    type Device: RhiDevice<Self>;
    type Fence: RhiFence + 'static;
    type CommandQueue: RhiCommandQueue<Self> + 'static;
    type CommandList: RhiCommandList<Self> + 'static;
    type DescriptorHeap: RhiDescriptorHeap + 'static;
    type Buffer: RhiBuffer + 'static;
    type Texture: RhiTexture + 'static;
    type ResourceView: RhiResourceView<Self> + 'static;
    type RenderPass: RhiRenderPass + 'static;
    type FrameBuffer: RhiFrameBuffer<Self> + 'static;
    type Swapchain: RhiSwapchain<Self> + 'static;
    type QueryHeap: RhiQueryHeap + 'static;
}
