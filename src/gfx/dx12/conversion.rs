//! RHI 类型到 D3D12 / DXGI 类型的转换

use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use crate::rhi::resource::{AddressMode, Filter};
use crate::rhi::{ClearValue, CommandListType, DescriptorHeapType, Format, MemoryHeap, ResourceState, ResourceUsage};

pub(crate) fn format_to_dxgi(format: Format) -> DXGI_FORMAT {
    match format {
        Format::Unknown => DXGI_FORMAT_UNKNOWN,
        Format::Rgba8Unorm => DXGI_FORMAT_R8G8B8A8_UNORM,
        Format::Rgba8Srgb => DXGI_FORMAT_R8G8B8A8_UNORM_SRGB,
        Format::Bgra8Unorm => DXGI_FORMAT_B8G8R8A8_UNORM,
        Format::Rgba16Float => DXGI_FORMAT_R16G16B16A16_FLOAT,
        Format::Rgb10A2Unorm => DXGI_FORMAT_R10G10B10A2_UNORM,
        Format::R32Uint => DXGI_FORMAT_R32_UINT,
        Format::R32Float => DXGI_FORMAT_R32_FLOAT,
        Format::Rgba32Float => DXGI_FORMAT_R32G32B32A32_FLOAT,
        Format::D32Float => DXGI_FORMAT_D32_FLOAT,
        Format::D24UnormS8Uint => DXGI_FORMAT_D24_UNORM_S8_UINT,
    }
}

/// 资源本身的格式。可被采样的深度纹理必须用 typeless 格式创建。
pub(crate) fn resource_format(format: Format, usage: ResourceUsage) -> DXGI_FORMAT {
    if !usage.contains(ResourceUsage::SHADER_RESOURCE) {
        return format_to_dxgi(format);
    }
    match format {
        Format::D32Float => DXGI_FORMAT_R32_TYPELESS,
        Format::D24UnormS8Uint => DXGI_FORMAT_R24G8_TYPELESS,
        other => format_to_dxgi(other),
    }
}

/// SRV 读取深度纹理时使用的格式
pub(crate) fn shader_read_format(format: Format) -> DXGI_FORMAT {
    match format {
        Format::D32Float => DXGI_FORMAT_R32_FLOAT,
        Format::D24UnormS8Uint => DXGI_FORMAT_R24_UNORM_X8_TYPELESS,
        other => format_to_dxgi(other),
    }
}

pub(crate) fn resource_state(state: ResourceState) -> D3D12_RESOURCE_STATES {
    match state {
        ResourceState::Common => D3D12_RESOURCE_STATE_COMMON,
        ResourceState::VertexAndConstantBuffer => D3D12_RESOURCE_STATE_VERTEX_AND_CONSTANT_BUFFER,
        ResourceState::IndexBuffer => D3D12_RESOURCE_STATE_INDEX_BUFFER,
        ResourceState::RenderTarget => D3D12_RESOURCE_STATE_RENDER_TARGET,
        ResourceState::UnorderedAccess => D3D12_RESOURCE_STATE_UNORDERED_ACCESS,
        ResourceState::DepthWrite => D3D12_RESOURCE_STATE_DEPTH_WRITE,
        ResourceState::DepthRead => D3D12_RESOURCE_STATE_DEPTH_READ,
        ResourceState::ShaderResource => {
            D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE | D3D12_RESOURCE_STATE_NON_PIXEL_SHADER_RESOURCE
        }
        ResourceState::CopyDest => D3D12_RESOURCE_STATE_COPY_DEST,
        ResourceState::CopySource => D3D12_RESOURCE_STATE_COPY_SOURCE,
        ResourceState::Present => D3D12_RESOURCE_STATE_PRESENT,
        ResourceState::GenericRead => D3D12_RESOURCE_STATE_GENERIC_READ,
    }
}

pub(crate) fn command_list_type(list_type: CommandListType) -> D3D12_COMMAND_LIST_TYPE {
    match list_type {
        CommandListType::Graphics => D3D12_COMMAND_LIST_TYPE_DIRECT,
        CommandListType::Compute => D3D12_COMMAND_LIST_TYPE_COMPUTE,
        CommandListType::Copy => D3D12_COMMAND_LIST_TYPE_COPY,
    }
}

/// CBV / SRV / UAV 共用同一种原生堆
pub(crate) fn descriptor_heap_type(heap_type: DescriptorHeapType) -> D3D12_DESCRIPTOR_HEAP_TYPE {
    match heap_type {
        DescriptorHeapType::Cbv | DescriptorHeapType::Srv | DescriptorHeapType::Uav => {
            D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV
        }
        DescriptorHeapType::Sampler => D3D12_DESCRIPTOR_HEAP_TYPE_SAMPLER,
        DescriptorHeapType::Rtv => D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
        DescriptorHeapType::Dsv => D3D12_DESCRIPTOR_HEAP_TYPE_DSV,
    }
}

pub(crate) fn heap_type(memory: MemoryHeap) -> D3D12_HEAP_TYPE {
    match memory {
        MemoryHeap::DeviceLocal => D3D12_HEAP_TYPE_DEFAULT,
        MemoryHeap::Upload => D3D12_HEAP_TYPE_UPLOAD,
        MemoryHeap::Readback => D3D12_HEAP_TYPE_READBACK,
    }
}

/// 上传堆和读回堆的资源只能处于固定状态
pub(crate) fn required_initial_state(memory: MemoryHeap) -> Option<ResourceState> {
    match memory {
        MemoryHeap::DeviceLocal => None,
        MemoryHeap::Upload => Some(ResourceState::GenericRead),
        MemoryHeap::Readback => Some(ResourceState::CopyDest),
    }
}

pub(crate) fn resource_flags(usage: ResourceUsage) -> D3D12_RESOURCE_FLAGS {
    let mut flags = D3D12_RESOURCE_FLAG_NONE;
    if usage.contains(ResourceUsage::RENDER_TARGET) {
        flags |= D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET;
    }
    if usage.contains(ResourceUsage::DEPTH_STENCIL) {
        flags |= D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL;
        if !usage.contains(ResourceUsage::SHADER_RESOURCE) {
            flags |= D3D12_RESOURCE_FLAG_DENY_SHADER_RESOURCE;
        }
    }
    if usage.contains(ResourceUsage::UNORDERED_ACCESS) {
        flags |= D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS;
    }
    flags
}

pub(crate) fn clear_value(format: Format, value: ClearValue) -> D3D12_CLEAR_VALUE {
    let anonymous = match value {
        ClearValue::Color(color) => D3D12_CLEAR_VALUE_0 { Color: color },
        ClearValue::DepthStencil { depth, stencil } => D3D12_CLEAR_VALUE_0 {
            DepthStencil: D3D12_DEPTH_STENCIL_VALUE {
                Depth: depth,
                Stencil: stencil,
            },
        },
    };
    D3D12_CLEAR_VALUE {
        Format: format_to_dxgi(format),
        Anonymous: anonymous,
    }
}

pub(crate) fn filter(filter: Filter) -> D3D12_FILTER {
    match filter {
        Filter::Point => D3D12_FILTER_MIN_MAG_MIP_POINT,
        Filter::Linear => D3D12_FILTER_MIN_MAG_MIP_LINEAR,
    }
}

pub(crate) fn address_mode(mode: AddressMode) -> D3D12_TEXTURE_ADDRESS_MODE {
    match mode {
        AddressMode::Wrap => D3D12_TEXTURE_ADDRESS_MODE_WRAP,
        AddressMode::Clamp => D3D12_TEXTURE_ADDRESS_MODE_CLAMP,
        AddressMode::Mirror => D3D12_TEXTURE_ADDRESS_MODE_MIRROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampled_depth_is_typeless() {
        let sampled = ResourceUsage::DEPTH_STENCIL | ResourceUsage::SHADER_RESOURCE;
        assert_eq!(resource_format(Format::D32Float, sampled), DXGI_FORMAT_R32_TYPELESS);
        assert_eq!(resource_format(Format::D32Float, ResourceUsage::DEPTH_STENCIL), DXGI_FORMAT_D32_FLOAT);
        assert_eq!(shader_read_format(Format::D24UnormS8Uint), DXGI_FORMAT_R24_UNORM_X8_TYPELESS);
        assert_eq!(resource_format(Format::Rgba8Unorm, sampled), DXGI_FORMAT_R8G8B8A8_UNORM);
    }

    #[test]
    fn test_depth_only_denies_shader_access() {
        let flags = resource_flags(ResourceUsage::DEPTH_STENCIL);
        assert_eq!(
            flags,
            D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL | D3D12_RESOURCE_FLAG_DENY_SHADER_RESOURCE
        );
        assert_eq!(resource_flags(ResourceUsage::COPY_SRC), D3D12_RESOURCE_FLAG_NONE);
    }

    #[test]
    fn test_view_heaps_share_native_type() {
        assert_eq!(
            descriptor_heap_type(DescriptorHeapType::Srv),
            descriptor_heap_type(DescriptorHeapType::Uav)
        );
        assert_eq!(descriptor_heap_type(DescriptorHeapType::Dsv), D3D12_DESCRIPTOR_HEAP_TYPE_DSV);
        assert_eq!(required_initial_state(MemoryHeap::Upload), Some(ResourceState::GenericRead));
    }
}
