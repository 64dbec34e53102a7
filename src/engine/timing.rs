//! 帧计时统计
//!
//! 每帧结束时由校准时间戳（CPU / GPU 两个时钟域）与时间戳查询生成一条
//! [`FrameTiming`]，[`FrameStatistics`] 对其做滑动汇总。

use std::collections::VecDeque;
use std::time::Duration;

/// 滑动窗口长度（帧）
const HISTORY_LEN: usize = 120;

/// 单帧计时
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTiming {
    /// 帧序号，从 0 开始
    pub frame_number: u64,
    /// 该帧图形工作完成时的 fence 值
    pub fence_value: u64,
    /// begin_draw_frame 到 end_draw_frame 完成的 CPU 时间
    pub cpu_time: Duration,
    /// 同一区间在 GPU 时钟域上的时间
    pub gpu_time: Duration,
    /// 两个时间戳查询之间的 GPU 时间
    pub gpu_pass_time: Duration,
    /// 呈现的后备缓冲下标
    pub back_buffer_index: u32,
}

/// 帧统计
#[derive(Debug, Clone, Default)]
pub struct FrameStatistics {
    frame_count: u64,
    history: VecDeque<FrameTiming>,
    max_cpu_time: Duration,
    max_gpu_time: Duration,
}

impl FrameStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一帧
    pub fn record(&mut self, timing: FrameTiming) {
        self.frame_count += 1;
        self.max_cpu_time = self.max_cpu_time.max(timing.cpu_time);
        self.max_gpu_time = self.max_gpu_time.max(timing.gpu_time);
        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(timing);
    }

    /// 已完成的帧数
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn max_cpu_time(&self) -> Duration {
        self.max_cpu_time
    }

    pub fn max_gpu_time(&self) -> Duration {
        self.max_gpu_time
    }

    /// 窗口内平均 CPU 帧时间
    pub fn average_cpu_time(&self) -> Duration {
        self.average(|t| t.cpu_time)
    }

    /// 窗口内平均 GPU 帧时间
    pub fn average_gpu_time(&self) -> Duration {
        self.average(|t| t.gpu_time)
    }

    /// 由平均 CPU 帧时间推算的帧率
    pub fn fps(&self) -> f32 {
        let avg = self.average_cpu_time().as_secs_f32();
        if avg > 0.0 {
            1.0 / avg
        } else {
            0.0
        }
    }

    fn average(&self, field: impl Fn(&FrameTiming) -> Duration) -> Duration {
        if self.history.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.history.iter().map(field).sum();
        total / self.history.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timing(frame_number: u64, cpu_ms: u64, gpu_ms: u64) -> FrameTiming {
        FrameTiming {
            frame_number,
            fence_value: frame_number * 3,
            cpu_time: Duration::from_millis(cpu_ms),
            gpu_time: Duration::from_millis(gpu_ms),
            gpu_pass_time: Duration::ZERO,
            back_buffer_index: 0,
        }
    }

    #[test]
    fn test_average_and_max() {
        let mut stats = FrameStatistics::new();
        assert_eq!(stats.average_cpu_time(), Duration::ZERO);
        assert_eq!(stats.fps(), 0.0);

        stats.record(timing(0, 10, 4));
        stats.record(timing(1, 30, 8));
        assert_eq!(stats.frame_count(), 2);
        assert_eq!(stats.average_cpu_time(), Duration::from_millis(20));
        assert_eq!(stats.average_gpu_time(), Duration::from_millis(6));
        assert_eq!(stats.max_cpu_time(), Duration::from_millis(30));
        assert!((stats.fps() - 50.0).abs() < 0.01);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut stats = FrameStatistics::new();
        for i in 0..(HISTORY_LEN as u64 + 10) {
            stats.record(timing(i, if i < 10 { 100 } else { 1 }, 1));
        }
        // 最早的 10 帧已滑出窗口，最大值仍保留
        assert_eq!(stats.average_cpu_time(), Duration::from_millis(1));
        assert_eq!(stats.max_cpu_time(), Duration::from_millis(100));
        assert_eq!(stats.frame_count(), HISTORY_LEN as u64 + 10);
    }
}
