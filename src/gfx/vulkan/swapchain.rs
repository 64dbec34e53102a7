//! Vulkan 交换链
//!
//! 获取图像时用一个二值 `VkFence` 在 CPU 上等待图像可用，然后通过图形队列
//! signal 引擎的 timeline。呈现前在 CPU 上等待渲染完成，因此 `vkQueuePresentKHR`
//! 不需要等待任何信号量。

use ash::vk;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::core::error::{GraphicsError, Result};
use crate::rhi::{
    BackBufferRing, CommandListType, ResourceUsage, RhiCommandQueue, RhiFence, RhiSwapchain,
    RhiTexture, SwapchainDesc, TextureDesc, WindowHandle,
};

use super::conversion;
use super::device::DeviceShared;
use super::resource::VulkanTexture;
use super::sync::{VulkanCommandQueue, VulkanFence};
use super::{vk_error, VulkanBackend};

fn swapchain_error(what: &'static str) -> impl Fn(vk::Result) -> crate::core::error::DistRhiError {
    vk_error(GraphicsError::SwapchainError, what)
}

fn swapchain_loader(shared: &DeviceShared) -> Result<&ash::khr::swapchain::Device> {
    shared
        .swapchain_loader
        .as_ref()
        .ok_or_else(|| GraphicsError::Unsupported("VK_KHR_swapchain is not available".to_string()).into())
}

/// 选择表面格式。HDR 需要实例打开了扩展色彩空间且表面支持 scRGB。
fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    desc: &SwapchainDesc,
    hdr_color_space: bool,
) -> Option<vk::SurfaceFormatKHR> {
    if desc.hdr && hdr_color_space {
        let hdr = formats.iter().find(|f| {
            f.format == conversion::format_to_vk(SwapchainDesc::HDR_FORMAT)
                && f.color_space == vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT
        });
        if let Some(format) = hdr {
            return Some(*format);
        }
    }
    let wanted = conversion::format_to_vk(desc.format);
    formats
        .iter()
        .find(|f| f.format == wanted && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        .or_else(|| formats.iter().find(|f| conversion::format_from_vk(f.format).is_some()))
        .copied()
}

/// 不等待垂直同步时优先 MAILBOX，其次 IMMEDIATE；FIFO 总是可用
fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: u32) -> vk::PresentModeKHR {
    if vsync == 0 {
        for preferred in [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE] {
            if modes.contains(&preferred) {
                return preferred;
            }
        }
    }
    vk::PresentModeKHR::FIFO
}

fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    vk::Extent2D {
        width: width.clamp(capabilities.min_image_extent.width, capabilities.max_image_extent.width),
        height: height.clamp(capabilities.min_image_extent.height, capabilities.max_image_extent.height),
    }
}

fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR, requested: u32) -> u32 {
    let max = if capabilities.max_image_count > 0 {
        capabilities.max_image_count
    } else {
        u32::MAX
    };
    requested.clamp(capabilities.min_image_count, max)
}

/// Vulkan 交换链
pub struct VulkanSwapchain {
    shared: Arc<DeviceShared>,
    /// 与引擎的图形队列共用同一个 `VkQueue`
    queue: VulkanCommandQueue,
    surface: vk::SurfaceKHR,
    swapchain: vk::SwapchainKHR,
    acquire_fence: vk::Fence,
    desc: SwapchainDesc,
    ring: BackBufferRing,
    back_buffers: Vec<Arc<VulkanTexture>>,
}

impl VulkanSwapchain {
    pub(crate) fn new(
        shared: Arc<DeviceShared>,
        graphics_queue: &VulkanCommandQueue,
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
        swapchain_loader(&shared)?;
        let queue = VulkanCommandQueue::new(Arc::clone(&shared), graphics_queue.queue_type())?;

        let instance = &shared.instance;
        let surface = unsafe {
            ash_window::create_surface(&instance.entry, &instance.instance, window.display, window.window, None)
        }
        .map_err(swapchain_error("vkCreateSurfaceKHR"))?;

        let family = shared.queue(CommandListType::Graphics).family;
        let supported = unsafe {
            instance
                .surface_loader
                .get_physical_device_surface_support(shared.physical_device, family, surface)
        };
        if !matches!(supported, Ok(true)) {
            unsafe { instance.surface_loader.destroy_surface(surface, None) };
            return Err(GraphicsError::Unsupported(format!(
                "queue family {} cannot present to this window",
                family
            ))
            .into());
        }

        let acquire_fence = match unsafe { shared.device.create_fence(&vk::FenceCreateInfo::default(), None) } {
            Ok(fence) => fence,
            Err(e) => {
                unsafe { instance.surface_loader.destroy_surface(surface, None) };
                return Err(swapchain_error("vkCreateFence")(e));
            }
        };

        let mut swapchain = Self {
            shared,
            queue,
            surface,
            swapchain: vk::SwapchainKHR::null(),
            acquire_fence,
            desc: desc.clone(),
            ring: BackBufferRing::new(desc.frame_buffer_count),
            back_buffers: Vec::new(),
        };
        swapchain.recreate()?;
        info!(
            width = swapchain.desc.width,
            height = swapchain.desc.height,
            images = swapchain.back_buffers.len(),
            format = ?swapchain.back_buffers.first().map(|t| t.desc().format),
            "Vulkan swapchain created"
        );
        Ok(swapchain)
    }

    /// 按当前描述重建交换链与后备缓冲。调用前 GPU 必须不再使用旧图像。
    fn recreate(&mut self) -> Result<()> {
        if self.desc.width == 0 || self.desc.height == 0 {
            return Err(GraphicsError::SwapchainError(format!(
                "invalid extent {}x{}",
                self.desc.width, self.desc.height
            ))
            .into());
        }
        unsafe { self.shared.device.device_wait_idle() }
            .map_err(vk_error(GraphicsError::Synchronization, "vkDeviceWaitIdle"))?;
        self.back_buffers.clear();

        let surface_loader = &self.shared.instance.surface_loader;
        let physical_device = self.shared.physical_device;
        let (capabilities, formats, modes) = unsafe {
            (
                surface_loader
                    .get_physical_device_surface_capabilities(physical_device, self.surface)
                    .map_err(swapchain_error("vkGetPhysicalDeviceSurfaceCapabilitiesKHR"))?,
                surface_loader
                    .get_physical_device_surface_formats(physical_device, self.surface)
                    .map_err(swapchain_error("vkGetPhysicalDeviceSurfaceFormatsKHR"))?,
                surface_loader
                    .get_physical_device_surface_present_modes(physical_device, self.surface)
                    .map_err(swapchain_error("vkGetPhysicalDeviceSurfacePresentModesKHR"))?,
            )
        };

        let surface_format = choose_surface_format(&formats, &self.desc, self.shared.instance.hdr_color_space)
            .ok_or_else(|| GraphicsError::SwapchainError("no usable surface format".to_string()))?;
        let Some(format) = conversion::format_from_vk(surface_format.format) else {
            return Err(GraphicsError::SwapchainError(format!("unsupported surface format {:?}", surface_format.format)).into());
        };
        if self.desc.hdr && format != SwapchainDesc::HDR_FORMAT {
            warn!(
                fallback = ?format,
                "HDR requested but the surface has no scRGB format, presenting in SDR"
            );
        }

        let extent = choose_extent(&capabilities, self.desc.width, self.desc.height);
        let present_mode = choose_present_mode(&modes, self.desc.vsync);
        let mut image_usage = vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST;
        if capabilities.supported_usage_flags.contains(vk::ImageUsageFlags::TRANSFER_SRC) {
            image_usage |= vk::ImageUsageFlags::TRANSFER_SRC;
        }

        let old_swapchain = self.swapchain;
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(choose_image_count(&capabilities, self.desc.frame_buffer_count))
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(image_usage)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let loader = swapchain_loader(&self.shared)?;
        let swapchain = unsafe { loader.create_swapchain(&create_info, None) }
            .map_err(swapchain_error("vkCreateSwapchainKHR"))?;
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { loader.destroy_swapchain(old_swapchain, None) };
        }
        self.swapchain = swapchain;

        let images = unsafe { loader.get_swapchain_images(swapchain) }
            .map_err(swapchain_error("vkGetSwapchainImagesKHR"))?;
        let mut back_buffers = Vec::with_capacity(images.len());
        for (i, image) in images.into_iter().enumerate() {
            let desc = TextureDesc::new_2d(
                extent.width,
                extent.height,
                format,
                ResourceUsage::RENDER_TARGET | ResourceUsage::COPY_DST | ResourceUsage::COPY_SRC,
            )
            .with_name(format!("BackBuffer{}", i));
            back_buffers.push(Arc::new(VulkanTexture::from_swapchain_image(
                Arc::clone(&self.shared),
                image,
                surface_format.format,
                &desc,
            )?));
        }

        self.desc.width = extent.width;
        self.desc.height = extent.height;
        self.ring.reset(back_buffers.len() as u32);
        self.back_buffers = back_buffers;
        debug!(
            width = extent.width,
            height = extent.height,
            images = self.back_buffers.len(),
            ?present_mode,
            color_space = ?surface_format.color_space,
            "Vulkan swapchain images ready"
        );
        Ok(())
    }

    fn acquire(&mut self) -> Result<u32> {
        let loader = swapchain_loader(&self.shared)?;
        let acquired = unsafe {
            loader.acquire_next_image(self.swapchain, u64::MAX, vk::Semaphore::null(), self.acquire_fence)
        };
        let (index, suboptimal) = match acquired {
            Ok(result) => result,
            // 重建由引擎负责，它还要同时重建帧缓冲
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                warn!("Swapchain out of date while acquiring");
                return Err(GraphicsError::SwapchainOutOfDate.into());
            }
            Err(e) => return Err(swapchain_error("vkAcquireNextImageKHR")(e)),
        };
        if suboptimal {
            debug!("Swapchain is suboptimal for the surface");
        }

        unsafe {
            self.shared
                .device
                .wait_for_fences(&[self.acquire_fence], true, u64::MAX)
                .map_err(swapchain_error("vkWaitForFences"))?;
            self.shared
                .device
                .reset_fences(&[self.acquire_fence])
                .map_err(swapchain_error("vkResetFences"))?;
        }
        Ok(index)
    }
}

impl RhiSwapchain<VulkanBackend> for VulkanSwapchain {
    fn prepare_next_image(&mut self, fence: &VulkanFence, signal_value: u64) -> Result<u32> {
        let index = self.acquire()?;
        fence.wait(self.ring.release_value(index))?;
        self.queue.signal(fence, signal_value)?;
        Ok(self.ring.acquire_at(index))
    }

    fn present(&mut self, fence: &VulkanFence, wait_value: u64) -> Result<()> {
        fence.wait(wait_value)?;

        let swapchains = [self.swapchain];
        let indices = [self.ring.current()];
        let present_info = vk::PresentInfoKHR::default()
            .swapchains(&swapchains)
            .image_indices(&indices);
        let result = {
            let loader = swapchain_loader(&self.shared)?;
            let queue = self.queue.raw_queue().lock();
            unsafe { loader.queue_present(*queue, &present_info) }
        };
        match result {
            Ok(false) => {}
            Ok(true) => debug!("Presented to a suboptimal swapchain"),
            // 下一次获取时报告
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => warn!("Swapchain out of date while presenting"),
            Err(e) => return Err(swapchain_error("vkQueuePresentKHR")(e)),
        }
        self.ring.mark_presented(wait_value);
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.desc.width = width;
        self.desc.height = height;
        self.recreate()?;
        debug!(width, height, "Vulkan swapchain resized");
        Ok(())
    }

    fn switch_full_screen_mode(&mut self, enable: bool) -> Result<()> {
        // 独占全屏需要扩展，窗口的显示模式由窗口层切换
        self.desc.full_screen = enable;
        info!(full_screen = enable, "Full screen mode recorded");
        Ok(())
    }

    fn switch_hdr_mode(&mut self, enable: bool) -> Result<()> {
        if self.desc.hdr == enable {
            return Ok(());
        }
        self.desc.hdr = enable;
        self.recreate()?;
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

    fn back_buffer(&self, index: u32) -> &Arc<VulkanTexture> {
        &self.back_buffers[index as usize]
    }

    fn desc(&self) -> &SwapchainDesc {
        &self.desc
    }

    fn image_count(&self) -> u32 {
        self.back_buffers.len() as u32
    }
}

impl Drop for VulkanSwapchain {
    fn drop(&mut self) {
        if let Err(e) = unsafe { self.shared.device.device_wait_idle() } {
            error!("vkDeviceWaitIdle failed before swapchain destruction: {:?}", e);
        }
        self.back_buffers.clear();
        unsafe {
            if let Some(loader) = &self.shared.swapchain_loader {
                loader.destroy_swapchain(self.swapchain, None);
            }
            self.shared
                .instance
                .surface_loader
                .destroy_surface(self.surface, None);
            self.shared.device.destroy_fence(self.acquire_fence, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rhi::Format;

    fn surface_format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    fn desc(hdr: bool) -> SwapchainDesc {
        SwapchainDesc {
            width: 8,
            height: 8,
            frame_buffer_count: 3,
            format: SwapchainDesc::SDR_FORMAT,
            vsync: 0,
            hdr,
            full_screen: false,
        }
    }

    #[test]
    fn test_hdr_falls_back_to_sdr_format() {
        let formats = [
            surface_format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            surface_format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = choose_surface_format(&formats, &desc(true), true).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_UNORM);

        let with_hdr = [
            formats[0],
            surface_format(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
        ];
        let chosen = choose_surface_format(&with_hdr, &desc(true), true).unwrap();
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT);
        // 实例没有打开扩展色彩空间时不选 scRGB
        let chosen = choose_surface_format(&with_hdr, &desc(true), false).unwrap();
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
        assert_eq!(conversion::format_from_vk(chosen.format), Some(Format::Rgba8Unorm));
    }

    #[test]
    fn test_present_mode_follows_vsync() {
        let all = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&all, 0), vk::PresentModeKHR::MAILBOX);
        assert_eq!(choose_present_mode(&all[..2], 0), vk::PresentModeKHR::IMMEDIATE);
        assert_eq!(choose_present_mode(&all, 1), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_extent_and_image_count_respect_surface_limits() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            current_extent: vk::Extent2D { width: u32::MAX, height: u32::MAX },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 1024, height: 768 },
            ..Default::default()
        };
        let extent = choose_extent(&capabilities, 4096, 100);
        assert_eq!((extent.width, extent.height), (1024, 100));
        assert_eq!(choose_image_count(&capabilities, 5), 3);
        assert_eq!(choose_image_count(&capabilities, 1), 2);
    }
}
