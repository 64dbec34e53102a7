//! DirectX 12 后端
//!
//! 基于 `windows` crate 的 RHI 实现，只在 Windows 上编译。
//!
//! - Fence 是原生 `ID3D12Fence`，CPU 等待通过 Win32 事件
//! - 每个队列另有一个内部 fence 作为提交计数，命令分配器据此复用
//! - CBV/SRV/UAV 共用一个着色器可见堆，按类型切成三段；
//!   Sampler、RTV、DSV 各自一个原生堆
//! - 交换链使用 flip 模型，图像下标由 DXGI 决定
//!
//! COM 接口指针本身不是 `Send`，但 D3D12 的设备、队列和资源都是自由线程的，
//! 因此各对象手动实现 `Send` / `Sync`。命令列表仍只在一个线程上录制。

mod command_list;
mod conversion;
mod descriptor;
mod device;
mod render_pass;
mod resource;
mod swapchain;
mod sync;

pub use command_list::Dx12CommandList;
pub use descriptor::Dx12DescriptorHeap;
pub use device::{Dx12Adapter, Dx12Device, Dx12Instance};
pub use render_pass::{Dx12FrameBuffer, Dx12RenderPass};
pub use resource::{Dx12Buffer, Dx12QueryHeap, Dx12ResourceView, Dx12Texture};
pub use swapchain::Dx12Swapchain;
pub use sync::{Dx12CommandQueue, Dx12Fence};

use tracing::error;
use windows::core::HSTRING;
use windows::Win32::Graphics::Direct3D12::ID3D12Object;
use windows::Win32::Graphics::Dxgi::{DXGI_ERROR_DEVICE_HUNG, DXGI_ERROR_DEVICE_REMOVED, DXGI_ERROR_DEVICE_RESET};

use crate::core::error::{DistRhiError, GraphicsError};
use crate::rhi::{GraphicsApi, RhiBackend};

/// DirectX 12 后端标记类型
pub struct Dx12Backend;

impl RhiBackend for Dx12Backend {
    const API: GraphicsApi = GraphicsApi::DirectX12;

    type Instance = Dx12Instance;
    type Adapter = Dx12Adapter;
    type Device = Dx12Device;
    type Fence = Dx12Fence;
    type CommandQueue = Dx12CommandQueue;
    type CommandList = Dx12CommandList;
    type DescriptorHeap = Dx12DescriptorHeap;
    type Buffer = Dx12Buffer;
    type Texture = Dx12Texture;
    type ResourceView = Dx12ResourceView;
    type RenderPass = Dx12RenderPass;
    type FrameBuffer = Dx12FrameBuffer;
    type Swapchain = Dx12Swapchain;
    type QueryHeap = Dx12QueryHeap;
}

/// 把 `windows::core::Error` 转成引擎错误
///
/// 设备移除 / 重置 / 挂起总是映射为 [`GraphicsError::DeviceLost`]。
pub(crate) fn hr_error(
    kind: fn(String) -> GraphicsError,
    what: &'static str,
) -> impl Fn(windows::core::Error) -> DistRhiError {
    move |e| {
        let code = e.code();
        let message = format!("{}: {} ({:?})", what, e.message(), code);
        let err = if code == DXGI_ERROR_DEVICE_REMOVED
            || code == DXGI_ERROR_DEVICE_RESET
            || code == DXGI_ERROR_DEVICE_HUNG
        {
            GraphicsError::DeviceLost(message)
        } else {
            kind(message)
        };
        error!("{}", err);
        err.into()
    }
}

/// 设置调试名称，PIX 与调试层输出中可见
pub(crate) fn set_debug_name(object: &ID3D12Object, name: &str) {
    if name.is_empty() {
        return;
    }
    // 调试名称失败不影响功能
    let _ = unsafe { object.SetName(&HSTRING::from(name)) };
}
