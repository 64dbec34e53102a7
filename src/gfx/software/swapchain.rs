//! 离屏交换链
//!
//! 后备缓冲是普通的软件纹理。`present` 只做记账，开启垂直同步时按
//! 模拟刷新率节流。

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::core::error::{GraphicsError, Result};
use crate::rhi::{
    BackBufferRing, ResourceState, ResourceUsage, RhiCommandQueue, RhiFence, RhiSwapchain,
    SwapchainDesc, TextureDesc,
};

use super::device::DeviceShared;
use super::resource::SoftwareTexture;
use super::sync::{SoftwareCommandQueue, SoftwareFence};
use super::SoftwareBackend;

pub struct SoftwareSwapchain {
    queue: SoftwareCommandQueue,
    device: Arc<DeviceShared>,
    desc: SwapchainDesc,
    ring: BackBufferRing,
    back_buffers: Vec<Arc<SoftwareTexture>>,
    last_present: Option<Instant>,
    /// 模拟的表面尺寸；与交换链不一致时获取返回过期
    surface_extent: Option<(u32, u32)>,
}

impl SoftwareSwapchain {
    pub(crate) fn new(queue: SoftwareCommandQueue, device: Arc<DeviceShared>, desc: &SwapchainDesc) -> Result<Self> {
        if desc.frame_buffer_count < 2 {
            return Err(GraphicsError::SwapchainError(format!(
                "at least 2 back buffers required, got {}",
                desc.frame_buffer_count
            ))
            .into());
        }
        let mut swapchain = Self {
            queue,
            device,
            desc: desc.clone(),
            ring: BackBufferRing::new(desc.frame_buffer_count),
            back_buffers: Vec::new(),
            last_present: None,
            surface_extent: None,
        };
        swapchain.create_back_buffers()?;
        info!(
            width = desc.width,
            height = desc.height,
            images = desc.frame_buffer_count,
            format = ?swapchain.desc.back_buffer_format(),
            "Software swapchain created"
        );
        Ok(swapchain)
    }

    fn create_back_buffers(&mut self) -> Result<()> {
        if self.desc.width == 0 || self.desc.height == 0 {
            return Err(GraphicsError::SwapchainError(format!(
                "invalid extent {}x{}",
                self.desc.width, self.desc.height
            ))
            .into());
        }
        let format = self.desc.back_buffer_format();
        self.back_buffers = (0..self.desc.frame_buffer_count)
            .map(|i| {
                let desc = TextureDesc::new_2d(
                    self.desc.width,
                    self.desc.height,
                    format,
                    ResourceUsage::RENDER_TARGET | ResourceUsage::COPY_DST | ResourceUsage::COPY_SRC,
                )
                .with_initial_state(ResourceState::Present)
                .with_name(format!("BackBuffer{}", i));
                Arc::new(SoftwareTexture::new(&desc))
            })
            .collect();
        self.ring.reset(self.desc.frame_buffer_count);
        Ok(())
    }

    /// 模拟窗口在应用处理事件之前改变了尺寸
    ///
    /// 之后的 `prepare_next_image` 返回 [`GraphicsError::SwapchainOutOfDate`]，
    /// 直到交换链按新尺寸重建。
    pub fn resize_surface(&mut self, width: u32, height: u32) {
        self.surface_extent = Some((width, height));
    }

    fn is_out_of_date(&self) -> bool {
        self.surface_extent
            .is_some_and(|extent| extent != (self.desc.width, self.desc.height))
    }

    /// 垂直同步：两次呈现间隔至少 `vsync / refresh_rate`
    fn pace(&mut self) {
        if self.desc.vsync > 0 {
            let interval = Duration::from_secs_f64(self.desc.vsync as f64 / self.device.refresh_rate_hz as f64);
            if let Some(last) = self.last_present {
                let elapsed = last.elapsed();
                if elapsed < interval {
                    std::thread::sleep(interval - elapsed);
                }
            }
        }
        self.last_present = Some(Instant::now());
    }
}

impl RhiSwapchain<SoftwareBackend> for SoftwareSwapchain {
    fn prepare_next_image(&mut self, fence: &SoftwareFence, signal_value: u64) -> Result<u32> {
        if self.is_out_of_date() {
            return Err(GraphicsError::SwapchainOutOfDate.into());
        }
        let index = self.ring.acquire();
        fence.wait(self.ring.release_value(index))?;
        self.queue.signal(fence, signal_value)?;
        Ok(index)
    }

    fn present(&mut self, fence: &SoftwareFence, wait_value: u64) -> Result<()> {
        fence.wait(wait_value)?;
        self.pace();
        self.ring.mark_presented(wait_value);
        self.device.stats.record_present();
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        // 表面尺寸优先，与 Vulkan 的 currentExtent 一致
        let (width, height) = self.surface_extent.unwrap_or((width, height));
        self.desc.width = width;
        self.desc.height = height;
        self.create_back_buffers()?;
        debug!(width, height, "Software swapchain resized");
        Ok(())
    }

    fn switch_full_screen_mode(&mut self, enable: bool) -> Result<()> {
        // 离屏交换链没有显示模式，只记录状态
        self.desc.full_screen = enable;
        Ok(())
    }

    fn switch_hdr_mode(&mut self, enable: bool) -> Result<()> {
        if self.desc.hdr == enable {
            return Ok(());
        }
        self.desc.hdr = enable;
        self.create_back_buffers()?;
        info!(hdr = enable, format = ?self.desc.back_buffer_format(), "Swapchain color space changed");
        Ok(())
    }

    fn current_image_index(&self) -> u32 {
        self.ring.current()
    }

    fn back_buffer(&self, index: u32) -> &Arc<SoftwareTexture> {
        &self.back_buffers[index as usize]
    }

    fn desc(&self) -> &SwapchainDesc {
        &self.desc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rhi::{CommandListType, Format, GpuResource, RhiTexture};

    fn swapchain(count: u32, vsync: u32) -> (SoftwareSwapchain, SoftwareFence) {
        let device = DeviceShared::for_tests(Duration::ZERO);
        let queue = SoftwareCommandQueue::new(CommandListType::Graphics, Arc::clone(&device)).unwrap();
        let desc = SwapchainDesc {
            width: 4,
            height: 4,
            frame_buffer_count: count,
            format: SwapchainDesc::SDR_FORMAT,
            vsync,
            hdr: false,
            full_screen: false,
        };
        (SoftwareSwapchain::new(queue, device, &desc).unwrap(), SoftwareFence::new(0))
    }

    #[test]
    fn test_images_cycle_in_order() {
        let (mut swapchain, fence) = swapchain(3, 0);
        let mut value = 0;
        let mut order = Vec::new();
        for _ in 0..6 {
            value += 1;
            order.push(swapchain.prepare_next_image(&fence, value).unwrap());
            value += 1;
            fence.signal(value).unwrap();
            swapchain.present(&fence, value).unwrap();
        }
        assert_eq!(order, vec![0, 1, 2, 0, 1, 2]);
        assert_eq!(swapchain.back_buffer(0).usage_state(), ResourceState::Present);
    }

    #[test]
    fn test_hdr_switch_recreates_back_buffers() {
        let (mut swapchain, _fence) = swapchain(2, 0);
        swapchain.switch_hdr_mode(true).unwrap();
        assert_eq!(swapchain.back_buffer(1).format(), Format::Rgba16Float);
        swapchain.resize(8, 2).unwrap();
        assert_eq!(swapchain.back_buffer(0).width(), 8);
        assert_eq!(swapchain.current_image_index(), 0);
    }

    #[test]
    fn test_vsync_paces_presents() {
        let (mut swapchain, fence) = swapchain(2, 1);
        let start = Instant::now();
        for value in 1..=3 {
            fence.signal(value).unwrap();
            swapchain.present(&fence, value).unwrap();
        }
        // 60Hz 下三次呈现至少间隔两个刷新周期
        assert!(start.elapsed() >= Duration::from_millis(33));
    }

    #[test]
    fn test_rejects_single_buffer() {
        let device = DeviceShared::for_tests(Duration::ZERO);
        let queue = SoftwareCommandQueue::new(CommandListType::Graphics, Arc::clone(&device)).unwrap();
        let desc = SwapchainDesc {
            width: 4,
            height: 4,
            frame_buffer_count: 1,
            format: SwapchainDesc::SDR_FORMAT,
            vsync: 0,
            hdr: false,
            full_screen: false,
        };
        assert!(SoftwareSwapchain::new(queue, device, &desc).is_err());
    }
}
