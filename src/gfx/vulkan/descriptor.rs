//! Vulkan 描述符堆
//!
//! 着色器可见的四种类型放在同一个 bindless 描述符集中，每种资源形态一个数组绑定：
//!
//! | 绑定 | 内容 |
//! |------|------|
//! | 0 | CBV（uniform buffer） |
//! | 1 | SRV 纹理（sampled image） |
//! | 2 | SRV 缓冲区（storage buffer） |
//! | 3 | UAV 缓冲区（storage buffer） |
//! | 4 | UAV 纹理（storage image） |
//! | 5 | 采样器 |
//!
//! 描述符 ID 的下标就是数组元素下标。RTV / DSV 在 Vulkan 中没有对应对象，
//! 只做计数。

use ash::vk;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::core::error::{GraphicsError, Result};
use crate::rhi::{
    DescriptorHeapCore, DescriptorHeapType, DescriptorLimits, ResourceViewType, RhiDescriptorHeap,
    RhiResourceView,
};

use super::device::DeviceShared;
use super::resource::VulkanResourceView;
use super::vk_error;

const CBV_BINDING: u32 = 0;
const SRV_TEXTURE_BINDING: u32 = 1;
const SRV_BUFFER_BINDING: u32 = 2;
const UAV_BUFFER_BINDING: u32 = 3;
const UAV_TEXTURE_BINDING: u32 = 4;
const SAMPLER_BINDING: u32 = 5;

/// (绑定, 描述符类型, 容量来源)
const BINDINGS: [(u32, vk::DescriptorType, DescriptorHeapType); 6] = [
    (CBV_BINDING, vk::DescriptorType::UNIFORM_BUFFER, DescriptorHeapType::Cbv),
    (SRV_TEXTURE_BINDING, vk::DescriptorType::SAMPLED_IMAGE, DescriptorHeapType::Srv),
    (SRV_BUFFER_BINDING, vk::DescriptorType::STORAGE_BUFFER, DescriptorHeapType::Srv),
    (UAV_BUFFER_BINDING, vk::DescriptorType::STORAGE_BUFFER, DescriptorHeapType::Uav),
    (UAV_TEXTURE_BINDING, vk::DescriptorType::STORAGE_IMAGE, DescriptorHeapType::Uav),
    (SAMPLER_BINDING, vk::DescriptorType::SAMPLER, DescriptorHeapType::Sampler),
];

struct BindlessSet {
    layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    set: vk::DescriptorSet,
}

/// 一个视图在描述符集中的写入目标
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteTarget {
    Buffer(u32, vk::DescriptorType),
    Image(u32, vk::DescriptorType, vk::ImageLayout),
    Sampler,
    /// RTV / DSV
    CountOnly,
}

fn write_target(view: &VulkanResourceView) -> WriteTarget {
    let is_texture = view.texture().is_some();
    match view.view_type() {
        ResourceViewType::ConstantBuffer => WriteTarget::Buffer(CBV_BINDING, vk::DescriptorType::UNIFORM_BUFFER),
        ResourceViewType::ShaderResource if is_texture => WriteTarget::Image(
            SRV_TEXTURE_BINDING,
            vk::DescriptorType::SAMPLED_IMAGE,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ),
        ResourceViewType::ShaderResource => {
            WriteTarget::Buffer(SRV_BUFFER_BINDING, vk::DescriptorType::STORAGE_BUFFER)
        }
        ResourceViewType::UnorderedAccess if is_texture => WriteTarget::Image(
            UAV_TEXTURE_BINDING,
            vk::DescriptorType::STORAGE_IMAGE,
            vk::ImageLayout::GENERAL,
        ),
        ResourceViewType::UnorderedAccess => {
            WriteTarget::Buffer(UAV_BUFFER_BINDING, vk::DescriptorType::STORAGE_BUFFER)
        }
        ResourceViewType::Sampler => WriteTarget::Sampler,
        ResourceViewType::RenderTarget | ResourceViewType::DepthStencil => WriteTarget::CountOnly,
    }
}

/// Vulkan 描述符堆
pub struct VulkanDescriptorHeap {
    shared: Arc<DeviceShared>,
    core: DescriptorHeapCore,
    bindless: Option<BindlessSet>,
    /// 已写入的视图，重建描述符集后据此重写其它类型
    written: [Vec<Option<Arc<VulkanResourceView>>>; 6],
}

impl VulkanDescriptorHeap {
    pub(crate) fn new(shared: Arc<DeviceShared>, limits: &DescriptorLimits) -> Result<Self> {
        let mut heap = Self {
            shared,
            core: DescriptorHeapCore::new(limits),
            bindless: None,
            written: Default::default(),
        };
        heap.rebuild_set()?;
        for heap_type in DescriptorHeapType::ALL {
            heap.reset_slots(heap_type);
        }
        Ok(heap)
    }

    /// bindless 描述符集，供调用方绑定到自己的管线布局
    pub fn raw_set(&self) -> Option<vk::DescriptorSet> {
        self.bindless.as_ref().map(|b| b.set)
    }

    pub fn raw_layout(&self) -> Option<vk::DescriptorSetLayout> {
        self.bindless.as_ref().map(|b| b.layout)
    }

    /// 把视图写入它的槽位
    pub(crate) fn write(&mut self, view: &Arc<VulkanResourceView>) -> Result<()> {
        let id = view.descriptor_id();
        debug_assert!(self.core.is_valid(id), "writing through a stale descriptor id");
        self.write_native(view)?;
        if let Some(slot) = self.written[id.heap_type.index()].get_mut(id.index as usize) {
            *slot = Some(Arc::clone(view));
        }
        Ok(())
    }

    fn write_native(&self, view: &VulkanResourceView) -> Result<()> {
        let Some(bindless) = &self.bindless else {
            return Ok(());
        };
        let index = view.descriptor_id().index;
        let mismatch =
            || GraphicsError::InvalidState(format!("{:?} view has no native handle", view.view_type()));

        match write_target(view) {
            WriteTarget::CountOnly => {}
            WriteTarget::Buffer(binding, descriptor_type) => {
                let buffer = view.buffer().ok_or_else(mismatch)?;
                let info = [vk::DescriptorBufferInfo {
                    buffer: buffer.raw(),
                    offset: 0,
                    range: vk::WHOLE_SIZE,
                }];
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(bindless.set)
                    .dst_binding(binding)
                    .dst_array_element(index)
                    .descriptor_type(descriptor_type)
                    .buffer_info(&info);
                unsafe { self.shared.device.update_descriptor_sets(&[write], &[]) };
            }
            WriteTarget::Image(binding, descriptor_type, image_layout) => {
                let image_view = view.image_view().ok_or_else(mismatch)?;
                let info = [vk::DescriptorImageInfo {
                    sampler: vk::Sampler::null(),
                    image_view,
                    image_layout,
                }];
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(bindless.set)
                    .dst_binding(binding)
                    .dst_array_element(index)
                    .descriptor_type(descriptor_type)
                    .image_info(&info);
                unsafe { self.shared.device.update_descriptor_sets(&[write], &[]) };
            }
            WriteTarget::Sampler => {
                let sampler = view.sampler().ok_or_else(mismatch)?;
                let info = [vk::DescriptorImageInfo {
                    sampler,
                    image_view: vk::ImageView::null(),
                    image_layout: vk::ImageLayout::UNDEFINED,
                }];
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(bindless.set)
                    .dst_binding(SAMPLER_BINDING)
                    .dst_array_element(index)
                    .descriptor_type(vk::DescriptorType::SAMPLER)
                    .image_info(&info);
                unsafe { self.shared.device.update_descriptor_sets(&[write], &[]) };
            }
        }
        trace!(heap_type = view.descriptor_id().heap_type.name(), index, "Descriptor written");
        Ok(())
    }

    fn reset_slots(&mut self, heap_type: DescriptorHeapType) {
        let capacity = self.core.capacity(heap_type) as usize;
        let slots = &mut self.written[heap_type.index()];
        slots.clear();
        slots.resize_with(capacity, || None);
        self.core
            .set_placement(heap_type, 0, heap_type.is_shader_visible().then_some(0), 1);
    }

    fn destroy_set(&mut self) {
        if let Some(bindless) = self.bindless.take() {
            unsafe {
                self.shared.device.destroy_descriptor_pool(bindless.pool, None);
                self.shared
                    .device
                    .destroy_descriptor_set_layout(bindless.layout, None);
            }
        }
    }

    /// 按当前容量重建描述符集。旧集合不能再被任何未完成的命令引用。
    fn rebuild_set(&mut self) -> Result<()> {
        self.destroy_set();

        let update_after_bind = self.shared.update_after_bind;
        let counts: Vec<u32> = BINDINGS
            .iter()
            .map(|(_, _, heap_type)| self.core.capacity(*heap_type))
            .collect();

        let bindings: Vec<vk::DescriptorSetLayoutBinding> = BINDINGS
            .iter()
            .zip(counts.iter())
            .map(|((binding, descriptor_type, _), &count)| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(*binding)
                    .descriptor_type(*descriptor_type)
                    .descriptor_count(count)
                    .stage_flags(vk::ShaderStageFlags::ALL)
            })
            .collect();
        let binding_flags = if update_after_bind {
            vec![
                vk::DescriptorBindingFlags::PARTIALLY_BOUND | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND;
                bindings.len()
            ]
        } else {
            vec![vk::DescriptorBindingFlags::empty(); bindings.len()]
        };
        let mut flags_info =
            vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&binding_flags);
        let layout_flags = if update_after_bind {
            vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL
        } else {
            vk::DescriptorSetLayoutCreateFlags::empty()
        };
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default()
            .flags(layout_flags)
            .bindings(&bindings)
            .push_next(&mut flags_info);
        let layout = unsafe { self.shared.device.create_descriptor_set_layout(&layout_info, None) }
            .map_err(vk_error(GraphicsError::ResourceCreation, "vkCreateDescriptorSetLayout"))?;

        // 池大小不能为 0
        let pool_sizes: Vec<vk::DescriptorPoolSize> = BINDINGS
            .iter()
            .zip(counts.iter())
            .map(|((_, ty, _), &count)| vk::DescriptorPoolSize {
                ty: *ty,
                descriptor_count: count.max(1),
            })
            .collect();
        let pool_flags = if update_after_bind {
            vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND
        } else {
            vk::DescriptorPoolCreateFlags::empty()
        };
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .flags(pool_flags)
            .max_sets(1)
            .pool_sizes(&pool_sizes);
        let pool = match unsafe { self.shared.device.create_descriptor_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { self.shared.device.destroy_descriptor_set_layout(layout, None) };
                return Err(vk_error(GraphicsError::ResourceCreation, "vkCreateDescriptorPool")(e));
            }
        };

        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        let set = match unsafe { self.shared.device.allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => sets[0],
            Err(e) => {
                unsafe {
                    self.shared.device.destroy_descriptor_pool(pool, None);
                    self.shared.device.destroy_descriptor_set_layout(layout, None);
                }
                return Err(vk_error(GraphicsError::ResourceCreation, "vkAllocateDescriptorSets")(e));
            }
        };

        self.bindless = Some(BindlessSet { layout, pool, set });
        debug!(?counts, update_after_bind, "Bindless descriptor set created");
        Ok(())
    }
}

impl RhiDescriptorHeap for VulkanDescriptorHeap {
    fn core(&self) -> &DescriptorHeapCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut DescriptorHeapCore {
        &mut self.core
    }

    fn recreate_storage(&mut self, heap_type: DescriptorHeapType) -> Result<()> {
        self.reset_slots(heap_type);
        if !heap_type.is_shader_visible() {
            return Ok(());
        }

        self.rebuild_set()?;
        // 其它类型的描述符仍然有效，写回新集合
        for other in DescriptorHeapType::ALL {
            if other == heap_type || !other.is_shader_visible() {
                continue;
            }
            for view in self.written[other.index()].iter().flatten() {
                if self.core.is_valid(view.descriptor_id()) {
                    self.write_native(view)?;
                }
            }
        }
        Ok(())
    }
}

impl Drop for VulkanDescriptorHeap {
    fn drop(&mut self) {
        self.destroy_set();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bindings_are_dense_and_typed() {
        for (i, (binding, _, _)) in BINDINGS.iter().enumerate() {
            assert_eq!(*binding as usize, i);
        }
        let srv: Vec<_> = BINDINGS
            .iter()
            .filter(|(_, _, ty)| *ty == DescriptorHeapType::Srv)
            .map(|(_, descriptor_type, _)| *descriptor_type)
            .collect();
        assert_eq!(
            srv,
            vec![vk::DescriptorType::SAMPLED_IMAGE, vk::DescriptorType::STORAGE_BUFFER]
        );
        assert!(BINDINGS
            .iter()
            .all(|(_, _, ty)| ty.is_shader_visible()));
    }
}
