//! 命令队列
//!
//! 同一队列内按提交顺序执行；跨队列的顺序只由显式的 signal / wait 对保证。

use std::time::Duration;

use super::types::CommandListType;
use super::RhiBackend;
use crate::core::error::Result;

/// 成对采样的 GPU / CPU 时间戳
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CalibrationTimestamp {
    pub gpu_ticks: u64,
    /// GPU 时钟频率（ticks / 秒）
    pub gpu_frequency: u64,
    pub cpu_ticks: u64,
    /// CPU 时钟频率（ticks / 秒）
    pub cpu_frequency: u64,
}

impl CalibrationTimestamp {
    /// 从 `earlier` 到 `self` 在 GPU 时钟上经过的时间
    pub fn gpu_elapsed_since(&self, earlier: &CalibrationTimestamp) -> Duration {
        ticks_to_duration(self.gpu_ticks.saturating_sub(earlier.gpu_ticks), self.gpu_frequency)
    }

    /// 从 `earlier` 到 `self` 在 CPU 时钟上经过的时间
    pub fn cpu_elapsed_since(&self, earlier: &CalibrationTimestamp) -> Duration {
        ticks_to_duration(self.cpu_ticks.saturating_sub(earlier.cpu_ticks), self.cpu_frequency)
    }
}

/// tick 数换算为时长
pub fn ticks_to_duration(ticks: u64, frequency: u64) -> Duration {
    if frequency == 0 {
        return Duration::ZERO;
    }
    let secs = ticks / frequency;
    let rem = ticks % frequency;
    Duration::new(secs, ((rem as u128 * 1_000_000_000) / frequency as u128) as u32)
}

/// 命令队列
///
/// 所有方法都是异步的：提交后立即返回。
pub trait RhiCommandQueue<B: RhiBackend>: Send + Sync {
    fn queue_type(&self) -> CommandListType;

    /// 提交已结束录制的命令列表
    fn execute(&self, lists: &[&B::CommandList]) -> Result<()>;

    /// 在此前提交的所有工作之后 signal `value`
    fn signal(&self, fence: &B::Fence, value: u64) -> Result<()>;

    /// 之后提交到本队列的工作等待 fence 达到 `value`
    fn wait(&self, fence: &B::Fence, value: u64) -> Result<()>;

    fn calibration_timestamp(&self) -> Result<CalibrationTimestamp>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_to_duration() {
        assert_eq!(ticks_to_duration(1_500, 1_000), Duration::from_millis(1_500));
        assert_eq!(ticks_to_duration(10, 0), Duration::ZERO);
        assert_eq!(ticks_to_duration(3, 10_000_000), Duration::from_nanos(300));
    }

    #[test]
    fn test_elapsed() {
        let begin = CalibrationTimestamp {
            gpu_ticks: 100,
            gpu_frequency: 1_000_000,
            cpu_ticks: 5_000,
            cpu_frequency: 1_000_000_000,
        };
        let end = CalibrationTimestamp {
            gpu_ticks: 1_100,
            cpu_ticks: 2_005_000,
            ..begin
        };
        assert_eq!(end.gpu_elapsed_since(&begin), Duration::from_millis(1));
        assert_eq!(end.cpu_elapsed_since(&begin), Duration::from_millis(2));
        assert_eq!(begin.gpu_elapsed_since(&end), Duration::ZERO);
    }
}
