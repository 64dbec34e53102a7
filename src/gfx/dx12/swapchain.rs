//! DXGI 交换链
//!
//! 使用 `FLIP_DISCARD`，图像下标由 `GetCurrentBackBufferIndex` 决定。
//! 关闭垂直同步且系统支持时以 `ALLOW_TEARING` 呈现。

use std::sync::Arc;
use raw_window_handle::RawWindowHandle;
use tracing::{debug, error, info, warn};
use windows::core::Interface;
use windows::Win32::Foundation::HWND;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;

use crate::core::error::{GraphicsError, Result};
use crate::rhi::{
    BackBufferRing, GpuResource, ResourceUsage, RhiFence, RhiSwapchain, RhiTexture, SwapchainDesc, TextureDesc, WindowHandle,
};

use super::conversion;
use super::device::DeviceShared;
use super::resource::Dx12Texture;
use super::sync::{Dx12CommandQueue, Dx12Fence, SubmissionTimeline};
use super::{hr_error, Dx12Backend};

fn swapchain_error(what: &'static str) -> impl Fn(windows::core::Error) -> crate::core::error::DistRhiError {
    hr_error(GraphicsError::SwapchainError, what)
}

fn window_hwnd(window: &RawWindowHandle) -> Result<HWND> {
    match window {
        RawWindowHandle::Win32(handle) => Ok(HWND(handle.hwnd.get() as *mut core::ffi::c_void)),
        other => Err(GraphicsError::Unsupported(format!(
            "the DirectX 12 backend cannot present to {:?}",
            other
        ))
        .into()),
    }
}

/// 交换链创建与 `ResizeBuffers` 使用的标志
fn swapchain_flags(allow_tearing: bool) -> u32 {
    if allow_tearing {
        DXGI_SWAP_CHAIN_FLAG_ALLOW_TEARING.0 as u32
    } else {
        0
    }
}

/// 独占全屏下不允许 `ALLOW_TEARING`
fn present_flags(vsync: u32, allow_tearing: bool, full_screen: bool) -> DXGI_PRESENT {
    if vsync == 0 && allow_tearing && !full_screen {
        DXGI_PRESENT_ALLOW_TEARING
    } else {
        DXGI_PRESENT(0)
    }
}

/// DXGI 交换链
pub struct Dx12Swapchain {
    shared: Arc<DeviceShared>,
    swapchain: IDXGISwapChain3,
    /// 引擎图形队列；图像获取信号在它上面发出
    queue: ID3D12CommandQueue,
    timeline: Arc<SubmissionTimeline>,
    flags: u32,
    desc: SwapchainDesc,
    ring: BackBufferRing,
    back_buffers: Vec<Arc<Dx12Texture>>,
}

unsafe impl Send for Dx12Swapchain {}

impl Dx12Swapchain {
    pub(crate) fn new(
        shared: Arc<DeviceShared>,
        graphics_queue: &Dx12CommandQueue,
        window: &WindowHandle,
        desc: &SwapchainDesc,
    ) -> Result<Self> {
        if desc.frame_buffer_count < 2 {
            return Err(GraphicsError::SwapchainError(format!(
                "at least 2 back buffers required, got {}",
                desc.frame_buffer_count
            ))
            .into());
        }
        let hwnd = window_hwnd(&window.window)?;
        let flags = swapchain_flags(shared.allow_tearing);

        let native_desc = DXGI_SWAP_CHAIN_DESC1 {
            Width: desc.width,
            Height: desc.height,
            Format: conversion::format_to_dxgi(desc.format),
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            BufferCount: desc.frame_buffer_count,
            SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
            Flags: flags,
            ..Default::default()
        };
        let swapchain: IDXGISwapChain1 = unsafe {
            shared
                .factory
                .CreateSwapChainForHwnd(graphics_queue.raw(), hwnd, &native_desc, None, None)
        }
        .map_err(swapchain_error("CreateSwapChainForHwnd"))?;
        // 全屏切换由引擎负责，关掉 DXGI 的 Alt+Enter
        if let Err(e) = unsafe { shared.factory.MakeWindowAssociation(hwnd, DXGI_MWA_NO_ALT_ENTER) } {
            warn!("MakeWindowAssociation failed: {}", e.message());
        }
        let swapchain: IDXGISwapChain3 = swapchain
            .cast()
            .map_err(swapchain_error("IDXGISwapChain3 cast"))?;

        let mut result = Self {
            queue: graphics_queue.raw().clone(),
            timeline: Arc::clone(graphics_queue.timeline()),
            shared,
            swapchain,
            flags,
            desc: SwapchainDesc {
                hdr: false,
                full_screen: false,
                ..desc.clone()
            },
            ring: BackBufferRing::new(desc.frame_buffer_count),
            back_buffers: Vec::new(),
        };
        result.acquire_back_buffers()?;
        if desc.hdr {
            result.switch_hdr_mode(true)?;
        }
        if desc.full_screen {
            result.switch_full_screen_mode(true)?;
        }
        info!(
            width = result.desc.width,
            height = result.desc.height,
            images = result.back_buffers.len(),
            tearing = result.shared.allow_tearing,
            "DXGI swapchain created"
        );
        Ok(result)
    }

    pub fn raw(&self) -> &IDXGISwapChain3 {
        &self.swapchain
    }

    fn acquire_back_buffers(&mut self) -> Result<()> {
        let format = self.current_format();
        let mut back_buffers = Vec::with_capacity(self.desc.frame_buffer_count as usize);
        for i in 0..self.desc.frame_buffer_count {
            let resource: ID3D12Resource = unsafe { self.swapchain.GetBuffer(i) }
                .map_err(swapchain_error("IDXGISwapChain::GetBuffer"))?;
            let desc = TextureDesc::new_2d(
                self.desc.width,
                self.desc.height,
                format,
                ResourceUsage::RENDER_TARGET | ResourceUsage::COPY_DST | ResourceUsage::COPY_SRC,
            )
            .with_name(format!("BackBuffer{}", i));
            if let Ok(object) = resource.cast::<ID3D12Object>() {
                super::set_debug_name(&object, &desc.name);
            }
            back_buffers.push(Arc::new(Dx12Texture::from_swapchain(resource, &desc)));
        }
        self.back_buffers = back_buffers;
        self.ring.reset(self.desc.frame_buffer_count);
        Ok(())
    }

    /// 后备缓冲实际使用的格式；HDR 色彩空间不可用时回退到 SDR 格式
    fn current_format(&self) -> crate::rhi::Format {
        let hdr_active = self.desc.hdr && self.hdr_supported();
        if hdr_active {
            SwapchainDesc::HDR_FORMAT
        } else {
            self.desc.format
        }
    }

    fn hdr_supported(&self) -> bool {
        match unsafe { self.swapchain.CheckColorSpaceSupport(DXGI_COLOR_SPACE_RGB_FULL_G10_NONE_P709) } {
            Ok(support) => support & DXGI_SWAP_CHAIN_COLOR_SPACE_SUPPORT_FLAG_PRESENT.0 as u32 != 0,
            Err(_) => false,
        }
    }

    /// 按当前描述重建后备缓冲。调用前所有后备缓冲的引用都必须已释放。
    fn rebuild(&mut self) -> Result<()> {
        self.timeline.drain()?;
        if let Some(held) = self.back_buffers.iter().position(|t| Arc::strong_count(t) > 1) {
            warn!(
                back_buffer = held,
                "Back buffer is still referenced, ResizeBuffers is likely to fail"
            );
        }
        self.back_buffers.clear();

        let format = self.current_format();
        unsafe {
            self.swapchain.ResizeBuffers(
                self.desc.frame_buffer_count,
                self.desc.width,
                self.desc.height,
                conversion::format_to_dxgi(format),
                DXGI_SWAP_CHAIN_FLAG(self.flags as i32),
            )
        }
        .map_err(swapchain_error("IDXGISwapChain::ResizeBuffers"))?;

        let color_space = if format == SwapchainDesc::HDR_FORMAT {
            DXGI_COLOR_SPACE_RGB_FULL_G10_NONE_P709
        } else {
            DXGI_COLOR_SPACE_RGB_FULL_G22_NONE_P709
        };
        unsafe { self.swapchain.SetColorSpace1(color_space) }.map_err(swapchain_error("SetColorSpace1"))?;
        self.acquire_back_buffers()?;
        debug!(
            width = self.desc.width,
            height = self.desc.height,
            format = ?format,
            "DXGI swapchain buffers rebuilt"
        );
        Ok(())
    }
}

impl RhiSwapchain<Dx12Backend> for Dx12Swapchain {
    fn prepare_next_image(&mut self, fence: &Dx12Fence, signal_value: u64) -> Result<u32> {
        let index = unsafe { self.swapchain.GetCurrentBackBufferIndex() };
        fence.wait(self.ring.release_value(index))?;
        unsafe { self.queue.Signal(fence.raw(), signal_value) }
            .map_err(hr_error(GraphicsError::Synchronization, "ID3D12CommandQueue::Signal"))?;
        Ok(self.ring.acquire_at(index))
    }

    fn present(&mut self, fence: &Dx12Fence, wait_value: u64) -> Result<()> {
        fence.wait(wait_value)?;
        let flags = present_flags(self.desc.vsync, self.shared.allow_tearing, self.desc.full_screen);
        unsafe { self.swapchain.Present(self.desc.vsync, flags) }
            .ok()
            .map_err(swapchain_error("IDXGISwapChain::Present"))?;
        self.ring.mark_presented(wait_value);
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(GraphicsError::SwapchainError(format!("invalid extent {}x{}", width, height)).into());
        }
        self.desc.width = width;
        self.desc.height = height;
        self.rebuild()?;
        debug!(width, height, "DXGI swapchain resized");
        Ok(())
    }

    fn switch_full_screen_mode(&mut self, enable: bool) -> Result<()> {
        if self.desc.full_screen == enable {
            return Ok(());
        }
        self.timeline.drain()?;
        unsafe { self.swapchain.SetFullscreenState(enable, None::<&IDXGIOutput>) }
            .map_err(swapchain_error("IDXGISwapChain::SetFullscreenState"))?;
        self.desc.full_screen = enable;
        // 切换显示模式后 DXGI 要求重新调整缓冲
        self.rebuild()?;
        info!(full_screen = enable, "Full screen mode switched");
        Ok(())
    }

    fn switch_hdr_mode(&mut self, enable: bool) -> Result<()> {
        if self.desc.hdr == enable {
            return Ok(());
        }
        self.desc.hdr = enable;
        if enable && !self.hdr_supported() {
            warn!("HDR requested but the output cannot present scRGB, staying in SDR");
        }
        self.rebuild()?;
        info!(
            hdr = enable,
            format = ?self.back_buffers.first().map(|t| t.desc().format),
            "Swapchain color space changed"
        );
        Ok(())
    }

    fn current_image_index(&self) -> u32 {
        self.ring.current()
    }

    fn back_buffer(&self, index: u32) -> &Arc<Dx12Texture> {
        &self.back_buffers[index as usize]
    }

    fn desc(&self) -> &SwapchainDesc {
        &self.desc
    }

    fn image_count(&self) -> u32 {
        self.back_buffers.len() as u32
    }
}

impl Drop for Dx12Swapchain {
    fn drop(&mut self) {
        if let Err(e) = self.timeline.drain() {
            error!("Failed to drain the graphics queue before swapchain destruction: {}", e);
        }
        // 全屏状态下释放交换链会出错
        if self.desc.full_screen {
            let _ = unsafe { self.swapchain.SetFullscreenState(false, None::<&IDXGIOutput>) };
        }
        for texture in &self.back_buffers {
            if Arc::strong_count(texture) > 1 {
                warn!(name = texture.name(), "Back buffer outlives its swapchain");
            }
        }
        self.back_buffers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raw_window_handle::XlibWindowHandle;

    #[test]
    fn test_tearing_only_without_vsync_in_windowed_mode() {
        assert_eq!(present_flags(0, true, false), DXGI_PRESENT_ALLOW_TEARING);
        assert_eq!(present_flags(1, true, false), DXGI_PRESENT(0));
        assert_eq!(present_flags(0, false, false), DXGI_PRESENT(0));
        assert_eq!(present_flags(0, true, true), DXGI_PRESENT(0));
    }

    #[test]
    fn test_swapchain_flags() {
        assert_eq!(swapchain_flags(false), 0);
        assert_ne!(swapchain_flags(true), 0);
    }

    #[test]
    fn test_non_win32_window_is_rejected() {
        let handle = RawWindowHandle::Xlib(XlibWindowHandle::new(7));
        let err = window_hwnd(&handle).unwrap_err();
        assert!(err.to_string().contains("cannot present"));
    }
}
