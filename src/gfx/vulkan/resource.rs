//! Vulkan 资源
//!
//! 缓冲区与纹理的内存由 gpu-allocator 子分配。交换链图像不持有内存，
//! 只持有一个默认图像视图。

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{error, trace};

use crate::core::error::{GraphicsError, Result};
use crate::rhi::{
    BufferDesc, DescriptorId, Format, GpuResource, MemoryHeap, ResourceState, ResourceStateCell,
    ResourceViewDesc, ResourceViewType, RhiBuffer, RhiQueryHeap, RhiResourceView, RhiTexture,
    TextureDesc, ViewResource,
};

use super::conversion;
use super::device::DeviceShared;
use super::{vk_error, VulkanBackend};

fn allocate(
    shared: &DeviceShared,
    name: &str,
    requirements: vk::MemoryRequirements,
    location: MemoryLocation,
    linear: bool,
) -> Result<Allocation> {
    let mut allocator = shared.allocator.lock();
    let allocator = allocator
        .as_mut()
        .ok_or_else(|| GraphicsError::DeviceLost("allocator already released".to_string()))?;
    let allocation = allocator
        .allocate(&AllocationCreateDesc {
            name: if name.is_empty() { "unnamed" } else { name },
            requirements,
            location,
            linear,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })
        .map_err(|e| GraphicsError::ResourceCreation(format!("allocating '{}': {}", name, e)))?;
    Ok(allocation)
}

fn free(shared: &DeviceShared, allocation: Allocation) {
    if let Some(allocator) = shared.allocator.lock().as_mut() {
        if let Err(e) = allocator.free(allocation) {
            error!("Failed to free GPU allocation: {}", e);
        }
    }
}

/// 多个队列族时以 CONCURRENT 模式创建，省去所有权转移屏障
fn sharing_mode(families: &[u32]) -> vk::SharingMode {
    if families.len() > 1 {
        vk::SharingMode::CONCURRENT
    } else {
        vk::SharingMode::EXCLUSIVE
    }
}

fn range_error(name: &str, offset: u64, len: usize, size: u64) -> crate::core::error::DistRhiError {
    GraphicsError::ResourceCreation(format!(
        "range {}+{} exceeds buffer '{}' of {} bytes",
        offset, len, name, size
    ))
    .into()
}

/// Vulkan 缓冲区
pub struct VulkanBuffer {
    shared: Arc<DeviceShared>,
    desc: BufferDesc,
    state: ResourceStateCell,
    buffer: vk::Buffer,
    allocation: Mutex<Option<Allocation>>,
}

impl VulkanBuffer {
    pub(crate) fn new(shared: Arc<DeviceShared>, desc: &BufferDesc) -> Result<Self> {
        let families = shared.unique_families();
        let create_info = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(conversion::buffer_usage(desc.usage))
            .sharing_mode(sharing_mode(&families))
            .queue_family_indices(&families);
        let buffer = unsafe { shared.device.create_buffer(&create_info, None) }
            .map_err(vk_error(GraphicsError::ResourceCreation, "vkCreateBuffer"))?;

        let requirements = unsafe { shared.device.get_buffer_memory_requirements(buffer) };
        let location = conversion::memory_location(desc.memory);
        let allocation = match allocate(&shared, &desc.name, requirements, location, true) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { shared.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };
        if let Err(e) = unsafe {
            shared
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        } {
            free(&shared, allocation);
            unsafe { shared.device.destroy_buffer(buffer, None) };
            return Err(vk_error(GraphicsError::ResourceCreation, "vkBindBufferMemory")(e));
        }

        trace!(name = %desc.name, size = desc.size, ?location, "Vulkan buffer created");
        Ok(Self {
            shared,
            desc: desc.clone(),
            state: ResourceStateCell::new(desc.initial_state),
            buffer,
            allocation: Mutex::new(Some(allocation)),
        })
    }

    pub fn raw(&self) -> vk::Buffer {
        self.buffer
    }

    fn check_range(&self, offset: u64, len: usize) -> Result<usize> {
        match offset.checked_add(len as u64) {
            Some(end) if end <= self.desc.size => Ok(offset as usize),
            _ => Err(range_error(&self.desc.name, offset, len, self.desc.size)),
        }
    }

    fn not_mapped(&self) -> crate::core::error::DistRhiError {
        GraphicsError::InvalidState(format!("buffer '{}' is not host visible", self.desc.name)).into()
    }
}

impl GpuResource for VulkanBuffer {
    fn name(&self) -> &str {
        &self.desc.name
    }

    fn usage_state(&self) -> ResourceState {
        self.state.get()
    }

    fn set_usage_state(&self, state: ResourceState) {
        self.state.set(state);
    }
}

impl RhiBuffer for VulkanBuffer {
    fn desc(&self) -> &BufferDesc {
        &self.desc
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        if self.desc.memory != MemoryHeap::Upload {
            return Err(GraphicsError::InvalidState(format!(
                "buffer '{}' is not CPU writable",
                self.desc.name
            ))
            .into());
        }
        let start = self.check_range(offset, data.len())?;
        let mut allocation = self.allocation.lock();
        let mapped = allocation
            .as_mut()
            .and_then(|a| a.mapped_slice_mut())
            .ok_or_else(|| self.not_mapped())?;
        mapped[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read(&self, offset: u64, out: &mut [u8]) -> Result<()> {
        if self.desc.memory == MemoryHeap::DeviceLocal {
            return Err(GraphicsError::InvalidState(format!(
                "buffer '{}' is not CPU readable",
                self.desc.name
            ))
            .into());
        }
        let start = self.check_range(offset, out.len())?;
        let allocation = self.allocation.lock();
        let mapped = allocation
            .as_ref()
            .and_then(|a| a.mapped_slice())
            .ok_or_else(|| self.not_mapped())?;
        out.copy_from_slice(&mapped[start..start + out.len()]);
        Ok(())
    }
}

impl Drop for VulkanBuffer {
    fn drop(&mut self) {
        unsafe { self.shared.device.destroy_buffer(self.buffer, None) };
        if let Some(allocation) = self.allocation.get_mut().take() {
            free(&self.shared, allocation);
        }
    }
}

fn create_image_view(
    shared: &DeviceShared,
    image: vk::Image,
    format: vk::Format,
    aspect_mask: vk::ImageAspectFlags,
    desc: &TextureDesc,
) -> Result<vk::ImageView> {
    let view_type = if desc.depth_or_array_layers > 1 {
        vk::ImageViewType::TYPE_2D_ARRAY
    } else {
        vk::ImageViewType::TYPE_2D
    };
    let create_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(view_type)
        .format(format)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: 0,
            level_count: desc.mip_levels,
            base_array_layer: 0,
            layer_count: desc.depth_or_array_layers,
        });
    unsafe { shared.device.create_image_view(&create_info, None) }
        .map_err(vk_error(GraphicsError::ResourceCreation, "vkCreateImageView"))
}

/// Vulkan 纹理
pub struct VulkanTexture {
    shared: Arc<DeviceShared>,
    desc: TextureDesc,
    state: ResourceStateCell,
    image: vk::Image,
    vk_format: vk::Format,
    aspect: vk::ImageAspectFlags,
    default_view: vk::ImageView,
    /// 交换链图像的内存归交换链所有
    allocation: Mutex<Option<Allocation>>,
    swapchain_image: bool,
}

impl VulkanTexture {
    pub(crate) fn new(shared: Arc<DeviceShared>, desc: &TextureDesc) -> Result<Self> {
        let vk_format = conversion::format_to_vk(desc.format);
        let families = shared.unique_families();
        // 拷贝两端总是打开，引擎的上传与回读都依赖它们
        let usage = conversion::image_usage(desc.usage)
            | vk::ImageUsageFlags::TRANSFER_SRC
            | vk::ImageUsageFlags::TRANSFER_DST;
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(vk_format)
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(desc.depth_or_array_layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(sharing_mode(&families))
            .queue_family_indices(&families)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { shared.device.create_image(&create_info, None) }
            .map_err(vk_error(GraphicsError::ResourceCreation, "vkCreateImage"))?;

        let requirements = unsafe { shared.device.get_image_memory_requirements(image) };
        let allocation = match allocate(&shared, &desc.name, requirements, MemoryLocation::GpuOnly, false) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { shared.device.destroy_image(image, None) };
                return Err(e);
            }
        };
        let aspect = conversion::aspect_mask(desc.format);
        let view = unsafe {
            shared
                .device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        }
        .map_err(vk_error(GraphicsError::ResourceCreation, "vkBindImageMemory"))
        .and_then(|_| create_image_view(&shared, image, vk_format, aspect, desc));
        let default_view = match view {
            Ok(view) => view,
            Err(e) => {
                free(&shared, allocation);
                unsafe { shared.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        trace!(name = %desc.name, width = desc.width, height = desc.height, format = ?desc.format, "Vulkan texture created");
        Ok(Self {
            shared,
            desc: desc.clone(),
            state: ResourceStateCell::new(desc.initial_state),
            image,
            vk_format,
            aspect,
            default_view,
            allocation: Mutex::new(Some(allocation)),
            swapchain_image: false,
        })
    }

    /// 包装交换链图像。其内容在获取时未定义，被跟踪状态从 `Present` 开始。
    pub(crate) fn from_swapchain_image(
        shared: Arc<DeviceShared>,
        image: vk::Image,
        vk_format: vk::Format,
        desc: &TextureDesc,
    ) -> Result<Self> {
        let aspect = vk::ImageAspectFlags::COLOR;
        let default_view = create_image_view(&shared, image, vk_format, aspect, desc)?;
        Ok(Self {
            shared,
            desc: desc.clone(),
            state: ResourceStateCell::new(ResourceState::Present),
            image,
            vk_format,
            aspect,
            default_view,
            allocation: Mutex::new(None),
            swapchain_image: true,
        })
    }

    /// 把新建图像从 UNDEFINED 转到初始状态对应的布局
    pub(crate) fn initialize_layout(&self) -> Result<()> {
        let target = conversion::state_info(self.desc.initial_state);
        let barrier = vk::ImageMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(target.access)
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(target.layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(self.full_range());
        self.shared.immediate_submit(|device, command_buffer| unsafe {
            device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        })
    }

    pub fn raw(&self) -> vk::Image {
        self.image
    }

    pub fn vk_format(&self) -> vk::Format {
        self.vk_format
    }

    pub(crate) fn default_view(&self) -> vk::ImageView {
        self.default_view
    }

    pub(crate) fn is_swapchain_image(&self) -> bool {
        self.swapchain_image
    }

    pub(crate) fn extent(&self) -> (u32, u32) {
        (self.desc.width, self.desc.height)
    }

    pub(crate) fn full_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect,
            base_mip_level: 0,
            level_count: vk::REMAINING_MIP_LEVELS,
            base_array_layer: 0,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
        }
    }

    /// 拷贝命令使用的子资源层。深度模板格式只拷贝深度。
    pub(crate) fn subresource_layers(&self, mip_level: u32, base_array_layer: u32, layer_count: u32) -> vk::ImageSubresourceLayers {
        let aspect_mask = if self.aspect.contains(vk::ImageAspectFlags::DEPTH) {
            vk::ImageAspectFlags::DEPTH
        } else {
            self.aspect
        };
        vk::ImageSubresourceLayers {
            aspect_mask,
            mip_level,
            base_array_layer,
            layer_count,
        }
    }
}

impl GpuResource for VulkanTexture {
    fn name(&self) -> &str {
        &self.desc.name
    }

    fn usage_state(&self) -> ResourceState {
        self.state.get()
    }

    fn set_usage_state(&self, state: ResourceState) {
        self.state.set(state);
    }
}

impl RhiTexture for VulkanTexture {
    fn desc(&self) -> &TextureDesc {
        &self.desc
    }
}

impl Drop for VulkanTexture {
    fn drop(&mut self) {
        unsafe { self.shared.device.destroy_image_view(self.default_view, None) };
        if self.swapchain_image {
            return;
        }
        unsafe { self.shared.device.destroy_image(self.image, None) };
        if let Some(allocation) = self.allocation.get_mut().take() {
            free(&self.shared, allocation);
        }
    }
}

/// Vulkan 资源视图
///
/// 纹理视图在格式与纹理一致时复用纹理的默认图像视图，否则自行创建。
/// 采样器视图持有一个 `VkSampler`。
pub struct VulkanResourceView {
    shared: Arc<DeviceShared>,
    desc: ResourceViewDesc,
    id: DescriptorId,
    buffer: Option<Arc<VulkanBuffer>>,
    texture: Option<Arc<VulkanTexture>>,
    owned_view: Option<vk::ImageView>,
    sampler: Option<vk::Sampler>,
}

impl VulkanResourceView {
    pub(crate) fn new(
        shared: Arc<DeviceShared>,
        id: DescriptorId,
        resource: ViewResource<'_, VulkanBackend>,
        desc: &ResourceViewDesc,
    ) -> Result<Self> {
        let mut view = Self {
            shared,
            desc: *desc,
            id,
            buffer: None,
            texture: None,
            owned_view: None,
            sampler: None,
        };

        match resource {
            ViewResource::Buffer(buffer) => view.buffer = Some(Arc::clone(buffer)),
            ViewResource::Texture(texture) => {
                let format = match desc.format {
                    Format::Unknown => texture.format(),
                    format => format,
                };
                // 采样深度模板纹理时只能选深度一个 aspect
                let sampled_depth_stencil = desc.view_type == ResourceViewType::ShaderResource && format.has_stencil();
                if format != texture.format() || sampled_depth_stencil {
                    let aspect = if format.is_depth() {
                        vk::ImageAspectFlags::DEPTH
                    } else {
                        conversion::aspect_mask(format)
                    };
                    view.owned_view = Some(create_image_view(
                        &view.shared,
                        texture.raw(),
                        conversion::format_to_vk(format),
                        aspect,
                        texture.desc(),
                    )?);
                }
                view.texture = Some(Arc::clone(texture));
            }
            ViewResource::None => {
                let sampler = desc.sampler.unwrap_or_default();
                let (filter, mipmap_mode) = conversion::filter(sampler.filter);
                let address_mode = conversion::address_mode(sampler.address_mode);
                let create_info = vk::SamplerCreateInfo::default()
                    .mag_filter(filter)
                    .min_filter(filter)
                    .mipmap_mode(mipmap_mode)
                    .address_mode_u(address_mode)
                    .address_mode_v(address_mode)
                    .address_mode_w(address_mode)
                    .max_lod(vk::LOD_CLAMP_NONE);
                view.sampler = Some(
                    unsafe { view.shared.device.create_sampler(&create_info, None) }
                        .map_err(vk_error(GraphicsError::ResourceCreation, "vkCreateSampler"))?,
                );
            }
        }
        Ok(view)
    }

    pub(crate) fn image_view(&self) -> Option<vk::ImageView> {
        self.owned_view
            .or_else(|| self.texture.as_ref().map(|texture| texture.default_view()))
    }

    pub(crate) fn sampler(&self) -> Option<vk::Sampler> {
        self.sampler
    }
}

impl RhiResourceView<VulkanBackend> for VulkanResourceView {
    fn view_type(&self) -> ResourceViewType {
        self.desc.view_type
    }

    fn descriptor_id(&self) -> DescriptorId {
        self.id
    }

    fn texture(&self) -> Option<&Arc<VulkanTexture>> {
        self.texture.as_ref()
    }

    fn buffer(&self) -> Option<&Arc<VulkanBuffer>> {
        self.buffer.as_ref()
    }
}

impl Drop for VulkanResourceView {
    fn drop(&mut self) {
        unsafe {
            if let Some(view) = self.owned_view.take() {
                self.shared.device.destroy_image_view(view, None);
            }
            if let Some(sampler) = self.sampler.take() {
                self.shared.device.destroy_sampler(sampler, None);
            }
        }
    }
}

/// 时间戳查询池
pub struct VulkanQueryHeap {
    shared: Arc<DeviceShared>,
    pool: vk::QueryPool,
    count: u32,
}

impl VulkanQueryHeap {
    pub(crate) fn new(shared: Arc<DeviceShared>, count: u32) -> Result<Self> {
        let create_info = vk::QueryPoolCreateInfo::default()
            .query_type(vk::QueryType::TIMESTAMP)
            .query_count(count);
        let pool = unsafe { shared.device.create_query_pool(&create_info, None) }
            .map_err(vk_error(GraphicsError::ResourceCreation, "vkCreateQueryPool"))?;
        Ok(Self { shared, pool, count })
    }

    pub(crate) fn raw(&self) -> vk::QueryPool {
        self.pool
    }
}

impl RhiQueryHeap for VulkanQueryHeap {
    fn count(&self) -> u32 {
        self.count
    }

    fn read_timestamps(&self, first: u32, count: u32) -> Result<Vec<u64>> {
        let end = first as usize + count as usize;
        if end > self.count as usize {
            return Err(GraphicsError::InvalidState(format!(
                "query range {}..{} exceeds heap of {}",
                first, end, self.count
            ))
            .into());
        }
        let mut data = vec![0u64; count as usize];
        unsafe {
            self.shared
                .device
                .get_query_pool_results(self.pool, first, &mut data, vk::QueryResultFlags::TYPE_64)
        }
        .map_err(vk_error(GraphicsError::InvalidState, "vkGetQueryPoolResults"))?;
        Ok(data)
    }

    fn timestamp_frequency(&self) -> u64 {
        self.shared.timestamp_frequency()
    }
}

impl Drop for VulkanQueryHeap {
    fn drop(&mut self) {
        unsafe { self.shared.device.destroy_query_pool(self.pool, None) };
    }
}
