//! 描述符管理模块
//!
//! 每个描述符堆对象按类型（CBV/SRV/UAV/Sampler/RTV/DSV）划分为若干分区，
//! 每个分区是一个线性分配器：游标只增不减，直到堆被 `reset` 或 `resize`。
//!
//! 描述符 ID 带有代数（generation），分区被重置或重建后代数递增，
//! 之前发出的 ID 随之失效。句柄按 `基址 + 下标 * 步长` 计算。
//!
//! # Vulkan 对应关系
//!
//! - **CBV** → Uniform Buffer
//! - **SRV** → Sampled Image
//! - **UAV** → Storage Buffer / Storage Image
//! - **Sampler** → Sampler
//! - **RTV/DSV** → 无对应描述符，只做计数，供帧缓冲使用

use std::collections::HashMap;
use tracing::{debug, warn};

use crate::core::config::DescriptorConfig;
use crate::core::error::{GraphicsError, Result};

/// 描述符类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorHeapType {
    /// 常量缓冲视图
    Cbv,
    /// 着色资源视图
    Srv,
    /// 无序访问视图
    Uav,
    /// 采样器
    Sampler,
    /// 渲染目标视图
    Rtv,
    /// 深度模板视图
    Dsv,
}

impl DescriptorHeapType {
    pub const ALL: [DescriptorHeapType; 6] = [
        DescriptorHeapType::Cbv,
        DescriptorHeapType::Srv,
        DescriptorHeapType::Uav,
        DescriptorHeapType::Sampler,
        DescriptorHeapType::Rtv,
        DescriptorHeapType::Dsv,
    ];

    pub fn index(self) -> usize {
        match self {
            DescriptorHeapType::Cbv => 0,
            DescriptorHeapType::Srv => 1,
            DescriptorHeapType::Uav => 2,
            DescriptorHeapType::Sampler => 3,
            DescriptorHeapType::Rtv => 4,
            DescriptorHeapType::Dsv => 5,
        }
    }

    /// 描述符类型是否需要着色器可见
    pub fn is_shader_visible(self) -> bool {
        !matches!(self, DescriptorHeapType::Rtv | DescriptorHeapType::Dsv)
    }

    pub fn name(self) -> &'static str {
        match self {
            DescriptorHeapType::Cbv => "CBV",
            DescriptorHeapType::Srv => "SRV",
            DescriptorHeapType::Uav => "UAV",
            DescriptorHeapType::Sampler => "Sampler",
            DescriptorHeapType::Rtv => "RTV",
            DescriptorHeapType::Dsv => "DSV",
        }
    }
}

/// 描述符 ID
///
/// 在同一类型内唯一，直到该类型被重置或重建。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorId {
    pub heap_type: DescriptorHeapType,
    pub index: u32,
    pub generation: u32,
}

/// 描述符句柄（CPU 可见）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuDescriptorHandle {
    /// 句柄指针值
    pub ptr: usize,
    /// 描述符索引
    pub index: u32,
}

impl CpuDescriptorHandle {
    pub fn new(ptr: usize, index: u32) -> Self {
        Self { ptr, index }
    }

    /// 偏移句柄
    pub fn offset(&self, count: u32, increment_size: u32) -> Self {
        Self {
            ptr: self.ptr + count as usize * increment_size as usize,
            index: self.index + count,
        }
    }
}

/// 描述符句柄（GPU 可见）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuDescriptorHandle {
    pub ptr: u64,
    pub index: u32,
}

impl GpuDescriptorHandle {
    pub fn new(ptr: u64, index: u32) -> Self {
        Self { ptr, index }
    }

    pub fn offset(&self, count: u32, increment_size: u32) -> Self {
        Self {
            ptr: self.ptr + count as u64 * increment_size as u64,
            index: self.index + count,
        }
    }
}

/// 每种描述符的容量上限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DescriptorLimits {
    pub cbv: u32,
    pub srv: u32,
    pub uav: u32,
    pub sampler: u32,
    pub rtv: u32,
    pub dsv: u32,
}

impl DescriptorLimits {
    pub fn get(&self, heap_type: DescriptorHeapType) -> u32 {
        match heap_type {
            DescriptorHeapType::Cbv => self.cbv,
            DescriptorHeapType::Srv => self.srv,
            DescriptorHeapType::Uav => self.uav,
            DescriptorHeapType::Sampler => self.sampler,
            DescriptorHeapType::Rtv => self.rtv,
            DescriptorHeapType::Dsv => self.dsv,
        }
    }

    pub fn set(&mut self, heap_type: DescriptorHeapType, count: u32) {
        match heap_type {
            DescriptorHeapType::Cbv => self.cbv = count,
            DescriptorHeapType::Srv => self.srv = count,
            DescriptorHeapType::Uav => self.uav = count,
            DescriptorHeapType::Sampler => self.sampler = count,
            DescriptorHeapType::Rtv => self.rtv = count,
            DescriptorHeapType::Dsv => self.dsv = count,
        }
    }

    /// 只含 RTV/DSV 的渲染目标堆
    pub fn render_targets(config: &DescriptorConfig) -> Self {
        Self {
            rtv: config.rtv,
            dsv: config.dsv,
            ..Self::default()
        }
    }

    /// 只含着色器可见类型的堆
    pub fn shader_visible(config: &DescriptorConfig) -> Self {
        Self {
            cbv: config.cbv,
            srv: config.srv,
            uav: config.uav,
            sampler: config.sampler,
            ..Self::default()
        }
    }
}

/// 堆重置方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapResetMode {
    /// 只回退游标，原生存储和内容保留
    OffsetOnly,
    /// 清空并重建原生存储
    Recreate,
}

/// 描述符堆统计信息
#[derive(Debug, Clone)]
pub struct DescriptorHeapStats {
    pub heap_type: DescriptorHeapType,
    pub capacity: u32,
    pub used: u32,
    pub available: u32,
    /// 使用率 (0.0 - 1.0)
    pub usage_ratio: f32,
}

impl DescriptorHeapStats {
    pub fn new(heap_type: DescriptorHeapType, capacity: u32, used: u32) -> Self {
        let available = capacity.saturating_sub(used);
        let usage_ratio = if capacity > 0 {
            used as f32 / capacity as f32
        } else {
            0.0
        };

        Self {
            heap_type,
            capacity,
            used,
            available,
            usage_ratio,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Partition {
    max_count: u32,
    cursor: u32,
    generation: u32,
    cpu_base: usize,
    gpu_base: Option<u64>,
    stride: u32,
}

/// 与 API 无关的分区记账，由各后端的描述符堆内嵌
#[derive(Debug, Clone)]
pub struct DescriptorHeapCore {
    partitions: [Partition; 6],
}

impl DescriptorHeapCore {
    pub fn new(limits: &DescriptorLimits) -> Self {
        let mut partitions = [Partition::default(); 6];
        for heap_type in DescriptorHeapType::ALL {
            partitions[heap_type.index()].max_count = limits.get(heap_type);
        }
        Self { partitions }
    }

    /// 后端在创建或重建原生存储后调用，登记句柄基址与步长
    pub fn set_placement(
        &mut self,
        heap_type: DescriptorHeapType,
        cpu_base: usize,
        gpu_base: Option<u64>,
        stride: u32,
    ) {
        let p = &mut self.partitions[heap_type.index()];
        p.cpu_base = cpu_base;
        p.gpu_base = gpu_base;
        p.stride = stride;
    }

    pub fn capacity(&self, heap_type: DescriptorHeapType) -> u32 {
        self.partitions[heap_type.index()].max_count
    }

    pub fn allocated(&self, heap_type: DescriptorHeapType) -> u32 {
        self.partitions[heap_type.index()].cursor
    }

    pub fn generation(&self, heap_type: DescriptorHeapType) -> u32 {
        self.partitions[heap_type.index()].generation
    }

    /// 分配下一个槽位，超出容量时不修改任何已发出的 ID
    pub fn allocate(&mut self, heap_type: DescriptorHeapType) -> Result<DescriptorId> {
        let p = &mut self.partitions[heap_type.index()];
        if p.cursor >= p.max_count {
            warn!(
                heap_type = heap_type.name(),
                capacity = p.max_count,
                "Descriptor heap exhausted"
            );
            return Err(GraphicsError::DescriptorHeapExhausted {
                heap_type,
                capacity: p.max_count,
            }
            .into());
        }

        let id = DescriptorId {
            heap_type,
            index: p.cursor,
            generation: p.generation,
        };
        p.cursor += 1;
        Ok(id)
    }

    /// 修改容量，该类型已发出的 ID 全部失效
    pub fn set_capacity(&mut self, heap_type: DescriptorHeapType, count: u32) {
        let p = &mut self.partitions[heap_type.index()];
        p.max_count = count;
        p.cursor = 0;
        p.generation = p.generation.wrapping_add(1);
    }

    /// 回退游标并使该类型的 ID 失效
    pub fn invalidate(&mut self, heap_type: DescriptorHeapType) {
        let p = &mut self.partitions[heap_type.index()];
        p.cursor = 0;
        p.generation = p.generation.wrapping_add(1);
    }

    pub fn is_valid(&self, id: DescriptorId) -> bool {
        let p = &self.partitions[id.heap_type.index()];
        id.generation == p.generation && id.index < p.cursor
    }

    pub fn cpu_handle(&self, id: DescriptorId) -> CpuDescriptorHandle {
        let p = &self.partitions[id.heap_type.index()];
        debug_assert!(
            id.index < p.max_count,
            "{} descriptor index {} out of range {}",
            id.heap_type.name(),
            id.index,
            p.max_count
        );
        CpuDescriptorHandle::new(p.cpu_base, 0).offset(id.index, p.stride)
    }

    pub fn gpu_handle(&self, id: DescriptorId) -> Option<GpuDescriptorHandle> {
        let p = &self.partitions[id.heap_type.index()];
        debug_assert!(id.index < p.max_count);
        p.gpu_base
            .map(|base| GpuDescriptorHandle::new(base, 0).offset(id.index, p.stride))
    }

    pub fn stats(&self, heap_type: DescriptorHeapType) -> DescriptorHeapStats {
        let p = &self.partitions[heap_type.index()];
        DescriptorHeapStats::new(heap_type, p.max_count, p.cursor)
    }
}

/// 描述符堆
///
/// 后端只需实现原生存储的重建，分配和句柄计算由 [`DescriptorHeapCore`] 提供。
pub trait RhiDescriptorHeap: Send {
    fn core(&self) -> &DescriptorHeapCore;

    fn core_mut(&mut self) -> &mut DescriptorHeapCore;

    /// 按 core 中记录的容量重建该类型的原生存储并登记新基址
    fn recreate_storage(&mut self, heap_type: DescriptorHeapType) -> Result<()>;

    fn allocate(&mut self, heap_type: DescriptorHeapType) -> Result<DescriptorId> {
        self.core_mut().allocate(heap_type)
    }

    fn resize(&mut self, heap_type: DescriptorHeapType, count: u32) -> Result<()> {
        self.core_mut().set_capacity(heap_type, count);
        self.recreate_storage(heap_type)?;
        debug!(heap_type = heap_type.name(), count, "Descriptor heap resized");
        Ok(())
    }

    fn resize_all(&mut self, sizes: &HashMap<DescriptorHeapType, u32>) -> Result<()> {
        for heap_type in DescriptorHeapType::ALL {
            if let Some(&count) = sizes.get(&heap_type) {
                self.resize(heap_type, count)?;
            }
        }
        Ok(())
    }

    fn reset(&mut self, mode: HeapResetMode) -> Result<()> {
        for heap_type in DescriptorHeapType::ALL {
            if self.core().capacity(heap_type) == 0 {
                continue;
            }
            self.core_mut().invalidate(heap_type);
            if mode == HeapResetMode::Recreate {
                self.recreate_storage(heap_type)?;
            }
        }
        Ok(())
    }

    fn cpu_descriptor_handle(&self, id: DescriptorId) -> CpuDescriptorHandle {
        self.core().cpu_handle(id)
    }

    fn gpu_descriptor_handle(&self, id: DescriptorId) -> Option<GpuDescriptorHandle> {
        self.core().gpu_handle(id)
    }

    fn is_valid(&self, id: DescriptorId) -> bool {
        self.core().is_valid(id)
    }

    fn stats(&self, heap_type: DescriptorHeapType) -> DescriptorHeapStats {
        self.core().stats(heap_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(rtv: u32) -> DescriptorLimits {
        DescriptorLimits {
            rtv,
            srv: 16,
            ..DescriptorLimits::default()
        }
    }

    #[test]
    fn test_descriptor_type() {
        assert!(DescriptorHeapType::Srv.is_shader_visible());
        assert!(!DescriptorHeapType::Rtv.is_shader_visible());
        assert_eq!(DescriptorHeapType::Rtv.name(), "RTV");
        for (i, t) in DescriptorHeapType::ALL.iter().enumerate() {
            assert_eq!(t.index(), i);
        }
    }

    #[test]
    fn test_handle_offset() {
        let handle = CpuDescriptorHandle::new(1000, 0);
        let offset_handle = handle.offset(5, 32);
        assert_eq!(offset_handle.ptr, 1160);
        assert_eq!(offset_handle.index, 5);

        let gpu = GpuDescriptorHandle::new(2000, 0).offset(10, 32);
        assert_eq!(gpu.ptr, 2320);
    }

    #[test]
    fn test_allocation_bound() {
        let mut core = DescriptorHeapCore::new(&limits(4));
        let ids: Vec<_> = (0..4)
            .map(|_| core.allocate(DescriptorHeapType::Rtv).unwrap())
            .collect();

        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                assert_ne!(a, b);
            }
        }

        let err = core.allocate(DescriptorHeapType::Rtv).unwrap_err();
        assert!(err.is_descriptor_exhausted());
        assert!(ids.iter().all(|id| core.is_valid(*id)));
        assert_eq!(core.stats(DescriptorHeapType::Rtv).available, 0);
    }

    #[test]
    fn test_resize_invalidates_ids() {
        let mut core = DescriptorHeapCore::new(&limits(2));
        let old = core.allocate(DescriptorHeapType::Rtv).unwrap();
        let other = core.allocate(DescriptorHeapType::Srv).unwrap();

        core.set_capacity(DescriptorHeapType::Rtv, 8);
        assert!(!core.is_valid(old));
        assert!(core.is_valid(other));

        let new = core.allocate(DescriptorHeapType::Rtv).unwrap();
        assert_eq!(new.index, 0);
        assert_ne!(new, old);
        assert_eq!(core.capacity(DescriptorHeapType::Rtv), 8);
    }

    #[test]
    fn test_handles_follow_placement() {
        let mut core = DescriptorHeapCore::new(&limits(4));
        core.set_placement(DescriptorHeapType::Srv, 0x1000, Some(0x8000), 32);
        core.set_placement(DescriptorHeapType::Rtv, 0x2000, None, 64);

        let srv0 = core.allocate(DescriptorHeapType::Srv).unwrap();
        let srv1 = core.allocate(DescriptorHeapType::Srv).unwrap();
        let rtv0 = core.allocate(DescriptorHeapType::Rtv).unwrap();

        assert_eq!(core.cpu_handle(srv0).ptr, 0x1000);
        assert_eq!(core.cpu_handle(srv1).ptr, 0x1020);
        assert_eq!(core.gpu_handle(srv1).map(|h| h.ptr), Some(0x8020));
        assert_eq!(core.cpu_handle(rtv0).ptr, 0x2000);
        assert!(core.gpu_handle(rtv0).is_none());
    }

    #[test]
    fn test_heap_stats() {
        let stats = DescriptorHeapStats::new(DescriptorHeapType::Rtv, 100, 50);
        assert_eq!(stats.available, 50);
        assert_eq!(stats.usage_ratio, 0.5);
    }
}
