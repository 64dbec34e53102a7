//! D3D12 描述符堆
//!
//! 一个 RHI 描述符堆对应四个原生堆：
//!
//! | 原生堆 | 内容 | 着色器可见 |
//! |--------|------|------------|
//! | CBV_SRV_UAV | 依次为 CBV、SRV、UAV 三段 | 是 |
//! | SAMPLER | 采样器 | 是 |
//! | RTV | 渲染目标 | 否 |
//! | DSV | 深度模板 | 否 |
//!
//! CBV / SRV / UAV 共用一个原生堆，重建其中任一段都会重建整个堆，
//! 另外两段仍然有效的描述符随后被写回。

use std::sync::Arc;
use tracing::{debug, trace};
use windows::Win32::Graphics::Direct3D12::*;

use crate::core::error::{GraphicsError, Result};
use crate::rhi::{DescriptorHeapCore, DescriptorHeapType, DescriptorLimits, RhiDescriptorHeap, RhiResourceView};

use super::conversion;
use super::device::DeviceShared;
use super::resource::{write_view_descriptor, Dx12ResourceView};
use super::hr_error;

/// 共用 CBV_SRV_UAV 原生堆的三段，按此顺序排列
const VIEW_SEGMENTS: [DescriptorHeapType; 3] = [DescriptorHeapType::Cbv, DescriptorHeapType::Srv, DescriptorHeapType::Uav];

/// 原生堆下标：0 = CBV_SRV_UAV，1 = Sampler，2 = RTV，3 = DSV
fn native_slot(heap_type: DescriptorHeapType) -> usize {
    match heap_type {
        DescriptorHeapType::Cbv | DescriptorHeapType::Srv | DescriptorHeapType::Uav => 0,
        DescriptorHeapType::Sampler => 1,
        DescriptorHeapType::Rtv => 2,
        DescriptorHeapType::Dsv => 3,
    }
}

/// 共用同一个原生堆的 RHI 描述符类型
fn slot_members(heap_type: DescriptorHeapType) -> &'static [DescriptorHeapType] {
    match heap_type {
        DescriptorHeapType::Cbv | DescriptorHeapType::Srv | DescriptorHeapType::Uav => &VIEW_SEGMENTS,
        DescriptorHeapType::Sampler => &[DescriptorHeapType::Sampler],
        DescriptorHeapType::Rtv => &[DescriptorHeapType::Rtv],
        DescriptorHeapType::Dsv => &[DescriptorHeapType::Dsv],
    }
}

/// 各段在原生堆中的起始下标
fn segment_offsets(core: &DescriptorHeapCore, members: &[DescriptorHeapType]) -> Vec<u32> {
    members
        .iter()
        .scan(0u32, |offset, heap_type| {
            let start = *offset;
            *offset += core.capacity(*heap_type);
            Some(start)
        })
        .collect()
}

struct NativeHeap {
    heap: ID3D12DescriptorHeap,
    stride: u32,
}

/// D3D12 描述符堆
pub struct Dx12DescriptorHeap {
    shared: Arc<DeviceShared>,
    core: DescriptorHeapCore,
    native: [Option<NativeHeap>; 4],
    /// 已写入的视图，重建共享的原生堆后据此写回其它段
    written: [Vec<Option<Arc<Dx12ResourceView>>>; 6],
}

unsafe impl Send for Dx12DescriptorHeap {}

impl Dx12DescriptorHeap {
    pub(crate) fn new(shared: Arc<DeviceShared>, limits: &DescriptorLimits) -> Result<Self> {
        let mut heap = Self {
            shared,
            core: DescriptorHeapCore::new(limits),
            native: Default::default(),
            written: Default::default(),
        };
        for heap_type in [
            DescriptorHeapType::Cbv,
            DescriptorHeapType::Sampler,
            DescriptorHeapType::Rtv,
            DescriptorHeapType::Dsv,
        ] {
            heap.rebuild_native(heap_type)?;
        }
        for heap_type in DescriptorHeapType::ALL {
            heap.reset_slots(heap_type);
        }
        Ok(heap)
    }

    /// CBV/SRV/UAV 原生堆，供调用方通过 `SetDescriptorHeaps` 绑定
    pub fn raw_view_heap(&self) -> Option<&ID3D12DescriptorHeap> {
        self.native[0].as_ref().map(|n| &n.heap)
    }

    pub fn raw_sampler_heap(&self) -> Option<&ID3D12DescriptorHeap> {
        self.native[1].as_ref().map(|n| &n.heap)
    }

    /// 把视图写入它的槽位
    pub(crate) fn write(&mut self, view: &Arc<Dx12ResourceView>) -> Result<()> {
        let id = view.descriptor_id();
        debug_assert!(self.core.is_valid(id), "writing through a stale descriptor id");
        self.write_native(view)?;
        if let Some(slot) = self.written[id.heap_type.index()].get_mut(id.index as usize) {
            *slot = Some(Arc::clone(view));
        }
        Ok(())
    }

    fn write_native(&self, view: &Dx12ResourceView) -> Result<()> {
        let id = view.descriptor_id();
        if self.native[native_slot(id.heap_type)].is_none() {
            return Err(GraphicsError::InvalidState(format!(
                "{} descriptor heap has no native storage",
                id.heap_type.name()
            ))
            .into());
        }
        let handle = D3D12_CPU_DESCRIPTOR_HANDLE {
            ptr: self.core.cpu_handle(id).ptr,
        };
        write_view_descriptor(&self.shared.device, view, handle)?;
        trace!(heap_type = id.heap_type.name(), index = id.index, "Descriptor written");
        Ok(())
    }

    fn reset_slots(&mut self, heap_type: DescriptorHeapType) {
        let capacity = self.core.capacity(heap_type) as usize;
        let slots = &mut self.written[heap_type.index()];
        slots.clear();
        slots.resize_with(capacity, || None);
    }

    /// 按当前容量重建 `heap_type` 所在的原生堆，并登记各段的新基址
    fn rebuild_native(&mut self, heap_type: DescriptorHeapType) -> Result<()> {
        let members = slot_members(heap_type);
        let offsets = segment_offsets(&self.core, members);
        let total: u32 = members.iter().map(|t| self.core.capacity(*t)).sum();
        let shader_visible = heap_type.is_shader_visible();
        let native_type = conversion::descriptor_heap_type(heap_type);

        // 原生堆大小不能为 0
        let desc = D3D12_DESCRIPTOR_HEAP_DESC {
            Type: native_type,
            NumDescriptors: total.max(1),
            Flags: if shader_visible {
                D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE
            } else {
                D3D12_DESCRIPTOR_HEAP_FLAG_NONE
            },
            NodeMask: 0,
        };
        let slot = native_slot(heap_type);
        // 旧堆先释放，调用方保证 GPU 已不再引用它
        self.native[slot] = None;
        let heap: ID3D12DescriptorHeap = unsafe { self.shared.device.CreateDescriptorHeap(&desc) }
            .map_err(hr_error(GraphicsError::ResourceCreation, "CreateDescriptorHeap"))?;
        let stride = unsafe { self.shared.device.GetDescriptorHandleIncrementSize(native_type) };
        let cpu_base = unsafe { heap.GetCPUDescriptorHandleForHeapStart() }.ptr;
        let gpu_base = shader_visible.then(|| unsafe { heap.GetGPUDescriptorHandleForHeapStart() }.ptr);

        for (member, offset) in members.iter().zip(offsets) {
            let skip = offset as u64 * stride as u64;
            self.core.set_placement(
                *member,
                cpu_base + skip as usize,
                gpu_base.map(|base| base + skip),
                stride,
            );
        }
        debug!(
            heap_type = members.iter().map(|t| t.name()).collect::<Vec<_>>().join("/"),
            total,
            shader_visible,
            "D3D12 descriptor heap created"
        );
        self.native[slot] = Some(NativeHeap { heap, stride });
        Ok(())
    }
}

impl RhiDescriptorHeap for Dx12DescriptorHeap {
    fn core(&self) -> &DescriptorHeapCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut DescriptorHeapCore {
        &mut self.core
    }

    fn recreate_storage(&mut self, heap_type: DescriptorHeapType) -> Result<()> {
        self.reset_slots(heap_type);
        self.rebuild_native(heap_type)?;

        // 共用原生堆的其它段仍然有效，写回新堆
        for other in slot_members(heap_type) {
            if *other == heap_type {
                continue;
            }
            for view in self.written[other.index()].iter().flatten() {
                if self.core.is_valid(view.descriptor_id()) {
                    self.write_native(view)?;
                }
            }
        }
        if let Some(native) = &self.native[native_slot(heap_type)] {
            trace!(heap_type = heap_type.name(), stride = native.stride, "Descriptor storage recreated");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_segments_share_one_native_heap() {
        let slots: Vec<usize> = DescriptorHeapType::ALL.iter().map(|t| native_slot(*t)).collect();
        assert_eq!(slots, vec![0, 0, 0, 1, 2, 3]);
        assert_eq!(slot_members(DescriptorHeapType::Uav), &VIEW_SEGMENTS);
        assert_eq!(slot_members(DescriptorHeapType::Dsv), &[DescriptorHeapType::Dsv]);
    }

    #[test]
    fn test_segments_are_laid_out_back_to_back() {
        let core = DescriptorHeapCore::new(&DescriptorLimits {
            cbv: 4,
            srv: 10,
            uav: 2,
            sampler: 8,
            ..DescriptorLimits::default()
        });
        assert_eq!(segment_offsets(&core, &VIEW_SEGMENTS), vec![0, 4, 14]);
        assert_eq!(segment_offsets(&core, slot_members(DescriptorHeapType::Sampler)), vec![0]);
    }
}
