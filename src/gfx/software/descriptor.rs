//! 软件后端描述符堆
//!
//! 每个分区是一段 `Option<SoftwareDescriptor>`，句柄地址是虚构的，
//! 但遵循与 D3D12 相同的 `基址 + 下标 * 步长` 规则。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::core::error::Result;
use crate::rhi::{
    DescriptorHeapCore, DescriptorHeapType, DescriptorId, DescriptorLimits, Format,
    ResourceViewType, RhiDescriptorHeap, SamplerDesc,
};

use super::resource::{SoftwareBuffer, SoftwareTexture};

const HEAP_ADDRESS_BASE: usize = 0x1000_0000;
const HEAP_ADDRESS_SPAN: usize = 0x0100_0000;
const PARTITION_SPAN: usize = 0x0020_0000;
const DESCRIPTOR_STRIDE: u32 = 32;

static NEXT_HEAP_SERIAL: AtomicUsize = AtomicUsize::new(0);

/// 槽位中写入的描述符
pub enum SoftwareDescriptor {
    Buffer {
        buffer: Arc<SoftwareBuffer>,
        view_type: ResourceViewType,
    },
    Texture {
        texture: Arc<SoftwareTexture>,
        view_type: ResourceViewType,
        format: Format,
    },
    Sampler(SamplerDesc),
}

/// 软件描述符堆
pub struct SoftwareDescriptorHeap {
    core: DescriptorHeapCore,
    slots: [Vec<Option<SoftwareDescriptor>>; 6],
    serial: usize,
}

impl SoftwareDescriptorHeap {
    pub(crate) fn new(limits: &DescriptorLimits) -> Result<Self> {
        let mut heap = Self {
            core: DescriptorHeapCore::new(limits),
            slots: Default::default(),
            serial: NEXT_HEAP_SERIAL.fetch_add(1, Ordering::Relaxed),
        };
        for heap_type in DescriptorHeapType::ALL {
            heap.recreate_storage(heap_type)?;
        }
        Ok(heap)
    }

    pub(crate) fn write(&mut self, id: DescriptorId, descriptor: SoftwareDescriptor) {
        debug_assert!(self.core.is_valid(id), "writing through a stale descriptor id");
        if let Some(slot) = self.slots[id.heap_type.index()].get_mut(id.index as usize) {
            *slot = Some(descriptor);
        }
    }

    /// 读取槽位内容，ID 已失效时返回 `None`
    pub fn descriptor(&self, id: DescriptorId) -> Option<&SoftwareDescriptor> {
        if !self.core.is_valid(id) {
            return None;
        }
        self.slots[id.heap_type.index()]
            .get(id.index as usize)
            .and_then(Option::as_ref)
    }
}

impl RhiDescriptorHeap for SoftwareDescriptorHeap {
    fn core(&self) -> &DescriptorHeapCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut DescriptorHeapCore {
        &mut self.core
    }

    fn recreate_storage(&mut self, heap_type: DescriptorHeapType) -> Result<()> {
        let capacity = self.core.capacity(heap_type) as usize;
        let slots = &mut self.slots[heap_type.index()];
        slots.clear();
        slots.resize_with(capacity, || None);

        let cpu_base =
            HEAP_ADDRESS_BASE + self.serial * HEAP_ADDRESS_SPAN + heap_type.index() * PARTITION_SPAN;
        let gpu_base = heap_type.is_shader_visible().then_some(cpu_base as u64 | 1 << 48);
        self.core
            .set_placement(heap_type, cpu_base, gpu_base, DESCRIPTOR_STRIDE);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rhi::{RhiDescriptorHeap, HeapResetMode};

    fn limits() -> DescriptorLimits {
        DescriptorLimits {
            srv: 4,
            sampler: 2,
            rtv: 2,
            ..DescriptorLimits::default()
        }
    }

    #[test]
    fn test_handles_are_strided() {
        let mut heap = SoftwareDescriptorHeap::new(&limits()).unwrap();
        let a = heap.allocate(DescriptorHeapType::Srv).unwrap();
        let b = heap.allocate(DescriptorHeapType::Srv).unwrap();
        let delta = heap.cpu_descriptor_handle(b).ptr - heap.cpu_descriptor_handle(a).ptr;
        assert_eq!(delta, DESCRIPTOR_STRIDE as usize);
        assert!(heap.gpu_descriptor_handle(a).is_some());

        let rtv = heap.allocate(DescriptorHeapType::Rtv).unwrap();
        assert!(heap.gpu_descriptor_handle(rtv).is_none());
    }

    #[test]
    fn test_write_and_invalidate() {
        let mut heap = SoftwareDescriptorHeap::new(&limits()).unwrap();
        let id = heap.allocate(DescriptorHeapType::Sampler).unwrap();
        heap.write(id, SoftwareDescriptor::Sampler(SamplerDesc::default()));
        assert!(matches!(heap.descriptor(id), Some(SoftwareDescriptor::Sampler(_))));

        heap.reset(HeapResetMode::Recreate).unwrap();
        assert!(heap.descriptor(id).is_none());
        assert!(!heap.is_valid(id));
        assert_eq!(heap.stats(DescriptorHeapType::Sampler).used, 0);
    }

    #[test]
    fn test_resize_grows_partition() {
        let mut heap = SoftwareDescriptorHeap::new(&limits()).unwrap();
        heap.allocate(DescriptorHeapType::Rtv).unwrap();
        heap.allocate(DescriptorHeapType::Rtv).unwrap();
        assert!(heap.allocate(DescriptorHeapType::Rtv).is_err());

        heap.resize(DescriptorHeapType::Rtv, 3).unwrap();
        for _ in 0..3 {
            heap.allocate(DescriptorHeapType::Rtv).unwrap();
        }
        assert!(heap.allocate(DescriptorHeapType::Rtv).unwrap_err().is_descriptor_exhausted());
    }

    #[test]
    fn test_distinct_heaps_have_distinct_addresses() {
        let mut first = SoftwareDescriptorHeap::new(&limits()).unwrap();
        let mut second = SoftwareDescriptorHeap::new(&limits()).unwrap();
        let a = first.allocate(DescriptorHeapType::Srv).unwrap();
        let b = second.allocate(DescriptorHeapType::Srv).unwrap();
        assert_ne!(first.cpu_descriptor_handle(a), second.cpu_descriptor_handle(b));
    }
}
