//! 交换链
//!
//! ```text
//! Idle --prepare_next_image--> ImageAcquired --present--> Idle
//! ```
//!
//! `prepare_next_image` 等待图像被释放后在图形队列上 signal 给定值；
//! `present` 等待 fence 达到给定值再呈现。图像下标在下一次获取时推进。

use std::sync::Arc;

use super::types::Format;
use super::RhiBackend;
use crate::core::error::Result;

/// 交换链描述
#[derive(Debug, Clone, PartialEq)]
pub struct SwapchainDesc {
    pub width: u32,
    pub height: u32,
    pub frame_buffer_count: u32,
    /// SDR 格式，HDR 打开时替换为 [`SwapchainDesc::HDR_FORMAT`]
    pub format: Format,
    /// 呈现间隔，0 表示不等待垂直同步
    pub vsync: u32,
    pub hdr: bool,
    pub full_screen: bool,
}

impl SwapchainDesc {
    pub const SDR_FORMAT: Format = Format::Bgra8Unorm;
    pub const HDR_FORMAT: Format = Format::Rgba16Float;

    /// 当前实际使用的后备缓冲格式
    pub fn back_buffer_format(&self) -> Format {
        if self.hdr {
            Self::HDR_FORMAT
        } else {
            self.format
        }
    }
}

/// 交换链
pub trait RhiSwapchain<B: RhiBackend>: Send {
    /// 获取下一张图像：等待其空闲，然后在图形队列上 signal `signal_value`
    fn prepare_next_image(&mut self, fence: &B::Fence, signal_value: u64) -> Result<u32>;

    /// 等待 fence 达到 `wait_value` 后呈现当前图像
    fn present(&mut self, fence: &B::Fence, wait_value: u64) -> Result<()>;

    /// 重建后备缓冲，调用前 GPU 必须已空闲
    fn resize(&mut self, width: u32, height: u32) -> Result<()>;

    fn switch_full_screen_mode(&mut self, enable: bool) -> Result<()>;

    fn switch_hdr_mode(&mut self, enable: bool) -> Result<()>;

    fn current_image_index(&self) -> u32;

    fn back_buffer(&self, index: u32) -> &Arc<B::Texture>;

    fn desc(&self) -> &SwapchainDesc;

    fn image_count(&self) -> u32 {
        self.desc().frame_buffer_count
    }
}

/// 后备缓冲轮转记账
///
/// 记录当前图像下标，以及每张图像最近一次呈现时等待的 fence 值；
/// 再次获取该图像前必须等到这个值完成。
#[derive(Debug, Clone)]
pub struct BackBufferRing {
    current: u32,
    needs_advance: bool,
    release_values: Vec<u64>,
}

impl BackBufferRing {
    pub fn new(count: u32) -> Self {
        Self {
            current: 0,
            needs_advance: false,
            release_values: vec![0; count as usize],
        }
    }

    pub fn count(&self) -> u32 {
        self.release_values.len() as u32
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    /// 获取下一张图像的下标；上一张尚未呈现时返回同一下标
    pub fn acquire(&mut self) -> u32 {
        if self.needs_advance {
            self.current = (self.current + 1) % self.count();
            self.needs_advance = false;
        }
        self.current
    }

    /// 由原生交换链决定下标时使用（Vulkan 不保证轮转顺序）
    pub fn acquire_at(&mut self, index: u32) -> u32 {
        debug_assert!(index < self.count(), "back buffer index {} out of range", index);
        self.current = index;
        self.needs_advance = false;
        index
    }

    /// 该图像再次可用前需要完成的 fence 值
    pub fn release_value(&self, index: u32) -> u64 {
        self.release_values[index as usize]
    }

    /// 当前图像以 `fence_value` 呈现
    pub fn mark_presented(&mut self, fence_value: u64) {
        self.release_values[self.current as usize] = fence_value;
        self.needs_advance = true;
    }

    /// 重建后备缓冲后回到初始状态
    pub fn reset(&mut self, count: u32) {
        *self = Self::new(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_cycles_with_period() {
        let mut ring = BackBufferRing::new(3);
        let mut seq = Vec::new();
        for frame in 0..9u64 {
            seq.push(ring.acquire());
            ring.mark_presented(frame + 1);
        }
        assert_eq!(seq, vec![0, 1, 2, 0, 1, 2, 0, 1, 2]);
        assert_eq!(ring.release_value(2), 9);
    }

    #[test]
    fn test_acquire_is_stable_until_present() {
        let mut ring = BackBufferRing::new(2);
        assert_eq!(ring.acquire(), 0);
        assert_eq!(ring.acquire(), 0);
        ring.mark_presented(4);
        assert_eq!(ring.acquire(), 1);
        assert_eq!(ring.release_value(0), 4);

        ring.mark_presented(6);
        assert_eq!(ring.acquire_at(0), 0);
        assert_eq!(ring.release_value(1), 6);
        assert_eq!(ring.acquire(), 0);

        ring.reset(4);
        assert_eq!(ring.count(), 4);
        assert_eq!(ring.acquire(), 0);
        assert_eq!(ring.release_value(0), 0);
    }

    #[test]
    fn test_hdr_format() {
        let mut desc = SwapchainDesc {
            width: 4,
            height: 4,
            frame_buffer_count: 2,
            format: SwapchainDesc::SDR_FORMAT,
            vsync: 0,
            hdr: false,
            full_screen: false,
        };
        assert_eq!(desc.back_buffer_format(), Format::Bgra8Unorm);
        desc.hdr = true;
        assert_eq!(desc.back_buffer_format(), Format::Rgba16Float);
    }
}
