//! GPU 时间戳查询堆

use crate::core::error::Result;

/// 时间戳查询堆
///
/// 命令列表通过 `write_timestamp` 写入，结果在对应的 fence 完成后读取。
pub trait RhiQueryHeap: Send + Sync {
    /// 查询槽位数
    fn count(&self) -> u32;

    /// 读取 `[first, first + count)` 的时间戳（GPU ticks）
    fn read_timestamps(&self, first: u32, count: u32) -> Result<Vec<u64>>;

    /// 时间戳频率（ticks / 秒）
    fn timestamp_frequency(&self) -> u64;
}
