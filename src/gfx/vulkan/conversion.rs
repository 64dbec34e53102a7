//! RHI 类型到 Vulkan 类型的转换

use ash::vk;

use crate::rhi::{
    ClearValue, Format, LoadOp, MemoryHeap, ResourceState, ResourceUsage, StoreOp,
};
use crate::rhi::resource::{AddressMode, Filter};
use gpu_allocator::MemoryLocation;

pub(crate) fn format_to_vk(format: Format) -> vk::Format {
    match format {
        Format::Unknown => vk::Format::UNDEFINED,
        Format::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        Format::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
        Format::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        Format::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        Format::Rgb10A2Unorm => vk::Format::A2B10G10R10_UNORM_PACK32,
        Format::R32Uint => vk::Format::R32_UINT,
        Format::R32Float => vk::Format::R32_SFLOAT,
        Format::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        Format::D32Float => vk::Format::D32_SFLOAT,
        Format::D24UnormS8Uint => vk::Format::D24_UNORM_S8_UINT,
    }
}

pub(crate) fn format_from_vk(format: vk::Format) -> Option<Format> {
    let format = match format {
        vk::Format::R8G8B8A8_UNORM => Format::Rgba8Unorm,
        vk::Format::R8G8B8A8_SRGB => Format::Rgba8Srgb,
        vk::Format::B8G8R8A8_UNORM => Format::Bgra8Unorm,
        vk::Format::R16G16B16A16_SFLOAT => Format::Rgba16Float,
        vk::Format::A2B10G10R10_UNORM_PACK32 => Format::Rgb10A2Unorm,
        vk::Format::R32_UINT => Format::R32Uint,
        vk::Format::R32_SFLOAT => Format::R32Float,
        vk::Format::R32G32B32A32_SFLOAT => Format::Rgba32Float,
        vk::Format::D32_SFLOAT => Format::D32Float,
        vk::Format::D24_UNORM_S8_UINT => Format::D24UnormS8Uint,
        _ => return None,
    };
    Some(format)
}

pub(crate) fn aspect_mask(format: Format) -> vk::ImageAspectFlags {
    if format.has_stencil() {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else if format.is_depth() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

pub(crate) fn memory_location(heap: MemoryHeap) -> MemoryLocation {
    match heap {
        MemoryHeap::DeviceLocal => MemoryLocation::GpuOnly,
        MemoryHeap::Upload => MemoryLocation::CpuToGpu,
        MemoryHeap::Readback => MemoryLocation::GpuToCpu,
    }
}

/// 缓冲区用途。拷贝两端总是打开，`update_buffer` 与读回都依赖它们。
pub(crate) fn buffer_usage(usage: ResourceUsage) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;
    if usage.contains(ResourceUsage::VERTEX) {
        flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(ResourceUsage::INDEX) {
        flags |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(ResourceUsage::CONSTANT) {
        flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.intersects(ResourceUsage::SHADER_RESOURCE | ResourceUsage::UNORDERED_ACCESS) {
        flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    flags
}

pub(crate) fn image_usage(usage: ResourceUsage) -> vk::ImageUsageFlags {
    let mut flags = vk::ImageUsageFlags::empty();
    if usage.contains(ResourceUsage::SHADER_RESOURCE) {
        flags |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(ResourceUsage::UNORDERED_ACCESS) {
        flags |= vk::ImageUsageFlags::STORAGE;
    }
    if usage.contains(ResourceUsage::RENDER_TARGET) {
        flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }
    if usage.contains(ResourceUsage::DEPTH_STENCIL) {
        flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
    }
    if usage.contains(ResourceUsage::COPY_SRC) {
        flags |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(ResourceUsage::COPY_DST) {
        flags |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    flags
}

/// 资源状态对应的图像布局、访问掩码与管线阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StateInfo {
    pub layout: vk::ImageLayout,
    pub access: vk::AccessFlags,
    pub stage: vk::PipelineStageFlags,
}

pub(crate) fn state_info(state: ResourceState) -> StateInfo {
    let (layout, access, stage) = match state {
        ResourceState::Common => (
            vk::ImageLayout::GENERAL,
            vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            vk::PipelineStageFlags::ALL_COMMANDS,
        ),
        ResourceState::VertexAndConstantBuffer => (
            vk::ImageLayout::GENERAL,
            vk::AccessFlags::VERTEX_ATTRIBUTE_READ | vk::AccessFlags::UNIFORM_READ,
            vk::PipelineStageFlags::VERTEX_INPUT
                | vk::PipelineStageFlags::VERTEX_SHADER
                | vk::PipelineStageFlags::FRAGMENT_SHADER
                | vk::PipelineStageFlags::COMPUTE_SHADER,
        ),
        ResourceState::IndexBuffer => (
            vk::ImageLayout::GENERAL,
            vk::AccessFlags::INDEX_READ,
            vk::PipelineStageFlags::VERTEX_INPUT,
        ),
        ResourceState::RenderTarget => (
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        ResourceState::UnorderedAccess => (
            vk::ImageLayout::GENERAL,
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
            vk::PipelineStageFlags::COMPUTE_SHADER | vk::PipelineStageFlags::FRAGMENT_SHADER,
        ),
        ResourceState::DepthWrite => (
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        ),
        ResourceState::DepthRead => (
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::FRAGMENT_SHADER,
        ),
        ResourceState::ShaderResource => (
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::VERTEX_SHADER
                | vk::PipelineStageFlags::FRAGMENT_SHADER
                | vk::PipelineStageFlags::COMPUTE_SHADER,
        ),
        ResourceState::CopyDest => (
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TRANSFER,
        ),
        ResourceState::CopySource => (
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::AccessFlags::TRANSFER_READ,
            vk::PipelineStageFlags::TRANSFER,
        ),
        ResourceState::Present => (
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        ),
        ResourceState::GenericRead => (
            vk::ImageLayout::GENERAL,
            vk::AccessFlags::MEMORY_READ,
            vk::PipelineStageFlags::ALL_COMMANDS,
        ),
    };
    StateInfo { layout, access, stage }
}

pub(crate) fn load_op(op: LoadOp) -> vk::AttachmentLoadOp {
    match op {
        LoadOp::Load => vk::AttachmentLoadOp::LOAD,
        LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
        LoadOp::DontCare => vk::AttachmentLoadOp::DONT_CARE,
    }
}

pub(crate) fn store_op(op: StoreOp) -> vk::AttachmentStoreOp {
    match op {
        StoreOp::Store => vk::AttachmentStoreOp::STORE,
        StoreOp::DontCare => vk::AttachmentStoreOp::DONT_CARE,
    }
}

pub(crate) fn clear_value(value: ClearValue) -> vk::ClearValue {
    match value {
        ClearValue::Color(float32) => vk::ClearValue {
            color: vk::ClearColorValue { float32 },
        },
        ClearValue::DepthStencil { depth, stencil } => vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth,
                stencil: stencil as u32,
            },
        },
    }
}

pub(crate) fn filter(filter: Filter) -> (vk::Filter, vk::SamplerMipmapMode) {
    match filter {
        Filter::Point => (vk::Filter::NEAREST, vk::SamplerMipmapMode::NEAREST),
        Filter::Linear => (vk::Filter::LINEAR, vk::SamplerMipmapMode::LINEAR),
    }
}

pub(crate) fn address_mode(mode: AddressMode) -> vk::SamplerAddressMode {
    match mode {
        AddressMode::Wrap => vk::SamplerAddressMode::REPEAT,
        AddressMode::Clamp => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        AddressMode::Mirror => vk::SamplerAddressMode::MIRRORED_REPEAT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_round_trip_for_known_formats() {
        for format in [Format::Bgra8Unorm, Format::Rgba16Float, Format::D24UnormS8Uint] {
            assert_eq!(format_from_vk(format_to_vk(format)), Some(format));
        }
        assert_eq!(format_from_vk(vk::Format::R8_UNORM), None);
    }

    #[test]
    fn test_copy_states_use_transfer_layouts() {
        assert_eq!(
            state_info(ResourceState::CopyDest).layout,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL
        );
        assert_eq!(
            state_info(ResourceState::CopySource).access,
            vk::AccessFlags::TRANSFER_READ
        );
        assert_eq!(
            state_info(ResourceState::Present).layout,
            vk::ImageLayout::PRESENT_SRC_KHR
        );
    }

    #[test]
    fn test_depth_aspect() {
        assert_eq!(aspect_mask(Format::D32Float), vk::ImageAspectFlags::DEPTH);
        assert!(aspect_mask(Format::D24UnormS8Uint).contains(vk::ImageAspectFlags::STENCIL));
        assert_eq!(aspect_mask(Format::Rgba8Unorm), vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn test_buffers_are_always_copyable() {
        let flags = buffer_usage(ResourceUsage::CONSTANT);
        assert!(flags.contains(vk::BufferUsageFlags::TRANSFER_DST));
        assert!(flags.contains(vk::BufferUsageFlags::UNIFORM_BUFFER));
        assert!(!flags.contains(vk::BufferUsageFlags::STORAGE_BUFFER));
    }
}
