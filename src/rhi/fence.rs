//! GPU 同步机制模块
//!
//! Fence 是单调递增的 64 位计数器，GPU 队列与 CPU 都可以 signal 和等待。
//! 等待方观察到的值不会超过曾经 signal 过的最大值，等待也不会提前返回。
//!
//! # 使用场景
//!
//! 1. **帧同步**：CPU 等待 GPU 完成本帧才开始下一帧
//! 2. **多队列协作**：图形队列等待计算队列 signal 的值
//! 3. **交换链**：呈现前等待渲染完成，获取图像后 signal

use crate::core::error::Result;

/// Fence 值
///
/// CPU 侧维护的下一次 signal 的计数。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct FenceValue(u64);

impl FenceValue {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// 递增并返回新值
    pub fn increment(&mut self) -> u64 {
        self.0 += 1;
        self.0
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

/// Fence
///
/// 队列侧的 signal / wait 由 [`super::RhiCommandQueue`] 提供。
pub trait RhiFence: Send + Sync {
    /// CPU 直接 signal。小于当前值的 signal 被忽略。
    fn signal(&self, value: u64) -> Result<()>;

    /// 阻塞直到已完成值 ≥ `value`，已达到时立即返回
    fn wait(&self, value: u64) -> Result<()>;

    /// 非阻塞读取已完成值
    fn completed_value(&self) -> u64;

    fn is_completed(&self, value: u64) -> bool {
        self.completed_value() >= value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fence_value() {
        let mut fence = FenceValue::new(0);
        assert_eq!(fence.value(), 0);

        assert_eq!(fence.increment(), 1);
        assert_eq!(fence.value(), 1);

        let next = fence.next();
        assert_eq!(next.value(), 2);
        assert_eq!(fence.value(), 1);
    }

    #[test]
    fn test_fence_ordering() {
        assert!(FenceValue::new(1) < FenceValue::new(2));
        assert_eq!(FenceValue::new(1), FenceValue::default().next());
    }
}
