//! D3D12 资源
//!
//! 缓冲区与纹理都是提交资源（committed resource）。上传堆与读回堆的缓冲区
//! 创建后常驻映射。视图本身不持有原生对象，描述符在写入描述符堆时创建。

use std::ffi::c_void;
use std::mem::ManuallyDrop;
use std::ptr::NonNull;
use std::sync::Arc;
use tracing::{trace, warn};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use crate::core::error::{GraphicsError, Result};
use crate::rhi::{
    BufferDesc, DescriptorId, Format, GpuResource, MemoryHeap, ResourceState, ResourceStateCell, ResourceUsage,
    ResourceViewDesc, ResourceViewType, RhiBuffer, RhiQueryHeap, RhiResourceView, RhiTexture, TextureDesc,
    ViewResource,
};

use super::conversion;
use super::device::DeviceShared;
use super::{hr_error, Dx12Backend};

/// 常量缓冲视图的大小必须是 256 的倍数
pub(crate) const CONSTANT_BUFFER_ALIGNMENT: u64 = D3D12_CONSTANT_BUFFER_DATA_PLACEMENT_ALIGNMENT as u64;

pub(crate) fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

/// 资源状态转换屏障
///
/// 屏障借用资源指针而不增加引用计数，资源必须活到屏障被录制之后。
pub(crate) fn transition_barrier(
    resource: &ID3D12Resource,
    before: D3D12_RESOURCE_STATES,
    after: D3D12_RESOURCE_STATES,
) -> D3D12_RESOURCE_BARRIER {
    D3D12_RESOURCE_BARRIER {
        Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
        Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
        Anonymous: D3D12_RESOURCE_BARRIER_0 {
            Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                pResource: unsafe { std::mem::transmute_copy(resource) },
                StateBefore: before,
                StateAfter: after,
                Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
            }),
        },
    }
}

/// UAV 写后读屏障
pub(crate) fn uav_barrier(resource: &ID3D12Resource) -> D3D12_RESOURCE_BARRIER {
    D3D12_RESOURCE_BARRIER {
        Type: D3D12_RESOURCE_BARRIER_TYPE_UAV,
        Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
        Anonymous: D3D12_RESOURCE_BARRIER_0 {
            UAV: ManuallyDrop::new(D3D12_RESOURCE_UAV_BARRIER {
                pResource: unsafe { std::mem::transmute_copy(resource) },
            }),
        },
    }
}

fn create_committed(
    device: &ID3D12Device,
    name: &str,
    heap: D3D12_HEAP_TYPE,
    desc: &D3D12_RESOURCE_DESC,
    state: D3D12_RESOURCE_STATES,
    clear: Option<&D3D12_CLEAR_VALUE>,
) -> Result<ID3D12Resource> {
    let mut resource: Option<ID3D12Resource> = None;
    unsafe {
        device.CreateCommittedResource(
            &D3D12_HEAP_PROPERTIES {
                Type: heap,
                ..Default::default()
            },
            D3D12_HEAP_FLAG_NONE,
            desc,
            state,
            clear.map(|c| c as *const D3D12_CLEAR_VALUE),
            &mut resource,
        )
    }
    .map_err(hr_error(GraphicsError::ResourceCreation, "CreateCommittedResource"))?;
    let resource = resource.ok_or_else(|| {
        GraphicsError::ResourceCreation(format!("CreateCommittedResource returned nothing for '{}'", name))
    })?;
    super::set_debug_name(&resource, name);
    Ok(resource)
}

fn range_error(name: &str, offset: u64, len: usize, size: u64) -> crate::core::error::DistRhiError {
    GraphicsError::ResourceCreation(format!(
        "range {}+{} exceeds buffer '{}' of {} bytes",
        offset, len, name, size
    ))
    .into()
}

/// D3D12 缓冲区
pub struct Dx12Buffer {
    desc: BufferDesc,
    state: ResourceStateCell,
    resource: ID3D12Resource,
    /// 原生资源宽度，常量缓冲区向上对齐
    width: u64,
    mapped: Option<NonNull<u8>>,
}

unsafe impl Send for Dx12Buffer {}
unsafe impl Sync for Dx12Buffer {}

impl Dx12Buffer {
    pub(crate) fn new(shared: &DeviceShared, desc: &BufferDesc) -> Result<Self> {
        let width = if desc.usage.contains(ResourceUsage::CONSTANT) {
            align_up(desc.size, CONSTANT_BUFFER_ALIGNMENT)
        } else {
            desc.size
        };

        // 上传堆与读回堆的资源状态固定，其余缓冲区总是以 COMMON 创建
        let (create_state, tracked_state) = match conversion::required_initial_state(desc.memory) {
            Some(required) => {
                if required != desc.initial_state {
                    warn!(
                        name = %desc.name,
                        requested = ?desc.initial_state,
                        actual = ?required,
                        "Heap dictates the initial buffer state"
                    );
                }
                (required, required)
            }
            None => (ResourceState::Common, desc.initial_state),
        };

        let resource_desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
            Alignment: 0,
            Width: width,
            Height: 1,
            DepthOrArraySize: 1,
            MipLevels: 1,
            Format: DXGI_FORMAT_UNKNOWN,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
            Flags: conversion::resource_flags(desc.usage & ResourceUsage::UNORDERED_ACCESS),
        };
        let resource = create_committed(
            &shared.device,
            &desc.name,
            conversion::heap_type(desc.memory),
            &resource_desc,
            conversion::resource_state(create_state),
            None,
        )?;

        let mapped = if desc.memory == MemoryHeap::DeviceLocal {
            None
        } else {
            let mut ptr: *mut c_void = std::ptr::null_mut();
            unsafe { resource.Map(0, None, Some(&mut ptr)) }
                .map_err(hr_error(GraphicsError::ResourceCreation, "ID3D12Resource::Map"))?;
            NonNull::new(ptr as *mut u8)
        };

        if create_state != tracked_state {
            let barrier = transition_barrier(
                &resource,
                conversion::resource_state(create_state),
                conversion::resource_state(tracked_state),
            );
            shared.immediate_submit(|list| unsafe { list.ResourceBarrier(&[barrier]) })?;
        }

        trace!(name = %desc.name, size = desc.size, memory = ?desc.memory, "D3D12 buffer created");
        Ok(Self {
            desc: desc.clone(),
            state: ResourceStateCell::new(tracked_state),
            resource,
            width,
            mapped,
        })
    }

    pub fn raw(&self) -> &ID3D12Resource {
        &self.resource
    }

    pub(crate) fn width(&self) -> u64 {
        self.width
    }

    fn check_range(&self, offset: u64, len: usize) -> Result<usize> {
        match offset.checked_add(len as u64) {
            Some(end) if end <= self.desc.size => Ok(offset as usize),
            _ => Err(range_error(&self.desc.name, offset, len, self.desc.size)),
        }
    }

    fn mapped(&self) -> Result<NonNull<u8>> {
        self.mapped.ok_or_else(|| {
            GraphicsError::InvalidState(format!("buffer '{}' is not host visible", self.desc.name)).into()
        })
    }
}

impl GpuResource for Dx12Buffer {
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

impl RhiBuffer for Dx12Buffer {
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
        let mapped = self.mapped()?;
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.as_ptr().add(start), data.len()) };
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
        let mapped = self.mapped()?;
        unsafe { std::ptr::copy_nonoverlapping(mapped.as_ptr().add(start), out.as_mut_ptr(), out.len()) };
        Ok(())
    }
}

impl Drop for Dx12Buffer {
    fn drop(&mut self) {
        if self.mapped.is_some() {
            unsafe { self.resource.Unmap(0, None) };
        }
    }
}

/// D3D12 纹理
pub struct Dx12Texture {
    desc: TextureDesc,
    state: ResourceStateCell,
    resource: ID3D12Resource,
}

unsafe impl Send for Dx12Texture {}
unsafe impl Sync for Dx12Texture {}

impl Dx12Texture {
    pub(crate) fn new(shared: &DeviceShared, desc: &TextureDesc) -> Result<Self> {
        let resource_desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
            Alignment: 0,
            Width: desc.width as u64,
            Height: desc.height,
            DepthOrArraySize: desc.depth_or_array_layers as u16,
            MipLevels: desc.mip_levels as u16,
            Format: conversion::resource_format(desc.format, desc.usage),
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
            Flags: conversion::resource_flags(desc.usage),
        };
        // 优化清屏值只对渲染目标和深度缓冲有效
        let attachment = desc
            .usage
            .intersects(ResourceUsage::RENDER_TARGET | ResourceUsage::DEPTH_STENCIL);
        let clear = desc
            .clear_value
            .filter(|_| attachment)
            .map(|value| conversion::clear_value(desc.format, value));

        let resource = create_committed(
            &shared.device,
            &desc.name,
            D3D12_HEAP_TYPE_DEFAULT,
            &resource_desc,
            conversion::resource_state(desc.initial_state),
            clear.as_ref(),
        )?;
        trace!(name = %desc.name, width = desc.width, height = desc.height, format = ?desc.format, "D3D12 texture created");
        Ok(Self {
            desc: desc.clone(),
            state: ResourceStateCell::new(desc.initial_state),
            resource,
        })
    }

    /// 包装交换链后备缓冲，被跟踪状态从 `Present` 开始
    pub(crate) fn from_swapchain(resource: ID3D12Resource, desc: &TextureDesc) -> Self {
        super::set_debug_name(&resource, &desc.name);
        Self {
            desc: desc.clone(),
            state: ResourceStateCell::new(ResourceState::Present),
            resource,
        }
    }

    pub fn raw(&self) -> &ID3D12Resource {
        &self.resource
    }
}

impl GpuResource for Dx12Texture {
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

impl RhiTexture for Dx12Texture {
    fn desc(&self) -> &TextureDesc {
        &self.desc
    }
}

/// D3D12 资源视图
pub struct Dx12ResourceView {
    desc: ResourceViewDesc,
    id: DescriptorId,
    buffer: Option<Arc<Dx12Buffer>>,
    texture: Option<Arc<Dx12Texture>>,
}

impl Dx12ResourceView {
    pub(crate) fn new(id: DescriptorId, resource: ViewResource<'_, Dx12Backend>, desc: &ResourceViewDesc) -> Self {
        let (buffer, texture) = match resource {
            ViewResource::Buffer(buffer) => (Some(Arc::clone(buffer)), None),
            ViewResource::Texture(texture) => (None, Some(Arc::clone(texture))),
            ViewResource::None => (None, None),
        };
        Self {
            desc: *desc,
            id,
            buffer,
            texture,
        }
    }

    /// 视图使用的格式，`Unknown` 时沿用纹理格式
    fn texture_format(&self, texture: &Dx12Texture) -> Format {
        match self.desc.format {
            Format::Unknown => texture.format(),
            format => format,
        }
    }
}

impl RhiResourceView<Dx12Backend> for Dx12ResourceView {
    fn view_type(&self) -> ResourceViewType {
        self.desc.view_type
    }

    fn descriptor_id(&self) -> DescriptorId {
        self.id
    }

    fn texture(&self) -> Option<&Arc<Dx12Texture>> {
        self.texture.as_ref()
    }

    fn buffer(&self) -> Option<&Arc<Dx12Buffer>> {
        self.buffer.as_ref()
    }
}

pub(crate) fn write_render_target(
    device: &ID3D12Device,
    texture: &Dx12Texture,
    format: Format,
    handle: D3D12_CPU_DESCRIPTOR_HANDLE,
) {
    let desc = D3D12_RENDER_TARGET_VIEW_DESC {
        Format: conversion::format_to_dxgi(format),
        ViewDimension: D3D12_RTV_DIMENSION_TEXTURE2D,
        Anonymous: D3D12_RENDER_TARGET_VIEW_DESC_0 {
            Texture2D: D3D12_TEX2D_RTV {
                MipSlice: 0,
                PlaneSlice: 0,
            },
        },
    };
    unsafe { device.CreateRenderTargetView(texture.raw(), Some(&desc), handle) };
}

pub(crate) fn write_depth_stencil(
    device: &ID3D12Device,
    texture: &Dx12Texture,
    format: Format,
    handle: D3D12_CPU_DESCRIPTOR_HANDLE,
) {
    let desc = D3D12_DEPTH_STENCIL_VIEW_DESC {
        Format: conversion::format_to_dxgi(format),
        ViewDimension: D3D12_DSV_DIMENSION_TEXTURE2D,
        Flags: D3D12_DSV_FLAG_NONE,
        Anonymous: D3D12_DEPTH_STENCIL_VIEW_DESC_0 {
            Texture2D: D3D12_TEX2D_DSV { MipSlice: 0 },
        },
    };
    unsafe { device.CreateDepthStencilView(texture.raw(), Some(&desc), handle) };
}

/// 原始缓冲区（ByteAddressBuffer）按 32 位元素寻址
fn raw_buffer_elements(buffer: &Dx12Buffer) -> u32 {
    (buffer.width() / 4) as u32
}

fn shader_resource_desc(view_format: Format, texture: &Dx12Texture) -> D3D12_SHADER_RESOURCE_VIEW_DESC {
    let texture_desc = texture.desc();
    let format = conversion::shader_read_format(view_format);
    if texture_desc.depth_or_array_layers > 1 {
        D3D12_SHADER_RESOURCE_VIEW_DESC {
            Format: format,
            ViewDimension: D3D12_SRV_DIMENSION_TEXTURE2DARRAY,
            Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
            Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture2DArray: D3D12_TEX2D_ARRAY_SRV {
                    MostDetailedMip: 0,
                    MipLevels: texture_desc.mip_levels,
                    FirstArraySlice: 0,
                    ArraySize: texture_desc.depth_or_array_layers,
                    PlaneSlice: 0,
                    ResourceMinLODClamp: 0.0,
                },
            },
        }
    } else {
        D3D12_SHADER_RESOURCE_VIEW_DESC {
            Format: format,
            ViewDimension: D3D12_SRV_DIMENSION_TEXTURE2D,
            Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
            Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture2D: D3D12_TEX2D_SRV {
                    MostDetailedMip: 0,
                    MipLevels: texture_desc.mip_levels,
                    PlaneSlice: 0,
                    ResourceMinLODClamp: 0.0,
                },
            },
        }
    }
}

/// 在 `handle` 处创建视图对应的描述符
pub(crate) fn write_view_descriptor(
    device: &ID3D12Device,
    view: &Dx12ResourceView,
    handle: D3D12_CPU_DESCRIPTOR_HANDLE,
) -> Result<()> {
    let missing = || GraphicsError::InvalidState(format!("{:?} view has no matching resource", view.view_type()));

    match (view.view_type(), &view.buffer, &view.texture) {
        (ResourceViewType::ConstantBuffer, Some(buffer), _) => {
            let desc = D3D12_CONSTANT_BUFFER_VIEW_DESC {
                BufferLocation: unsafe { buffer.raw().GetGPUVirtualAddress() },
                SizeInBytes: buffer.width() as u32,
            };
            unsafe { device.CreateConstantBufferView(Some(&desc), handle) };
        }
        (ResourceViewType::ShaderResource, Some(buffer), _) => {
            let desc = D3D12_SHADER_RESOURCE_VIEW_DESC {
                Format: DXGI_FORMAT_R32_TYPELESS,
                ViewDimension: D3D12_SRV_DIMENSION_BUFFER,
                Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
                Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                    Buffer: D3D12_BUFFER_SRV {
                        FirstElement: 0,
                        NumElements: raw_buffer_elements(buffer),
                        StructureByteStride: 0,
                        Flags: D3D12_BUFFER_SRV_FLAG_RAW,
                    },
                },
            };
            unsafe { device.CreateShaderResourceView(buffer.raw(), Some(&desc), handle) };
        }
        (ResourceViewType::ShaderResource, None, Some(texture)) => {
            let desc = shader_resource_desc(view.texture_format(texture), texture);
            unsafe { device.CreateShaderResourceView(texture.raw(), Some(&desc), handle) };
        }
        (ResourceViewType::UnorderedAccess, Some(buffer), _) => {
            let desc = D3D12_UNORDERED_ACCESS_VIEW_DESC {
                Format: DXGI_FORMAT_R32_TYPELESS,
                ViewDimension: D3D12_UAV_DIMENSION_BUFFER,
                Anonymous: D3D12_UNORDERED_ACCESS_VIEW_DESC_0 {
                    Buffer: D3D12_BUFFER_UAV {
                        FirstElement: 0,
                        NumElements: raw_buffer_elements(buffer),
                        StructureByteStride: 0,
                        CounterOffsetInBytes: 0,
                        Flags: D3D12_BUFFER_UAV_FLAG_RAW,
                    },
                },
            };
            unsafe { device.CreateUnorderedAccessView(buffer.raw(), None, Some(&desc), handle) };
        }
        (ResourceViewType::UnorderedAccess, None, Some(texture)) => {
            let desc = D3D12_UNORDERED_ACCESS_VIEW_DESC {
                Format: conversion::format_to_dxgi(view.texture_format(texture)),
                ViewDimension: D3D12_UAV_DIMENSION_TEXTURE2D,
                Anonymous: D3D12_UNORDERED_ACCESS_VIEW_DESC_0 {
                    Texture2D: D3D12_TEX2D_UAV {
                        MipSlice: 0,
                        PlaneSlice: 0,
                    },
                },
            };
            unsafe { device.CreateUnorderedAccessView(texture.raw(), None, Some(&desc), handle) };
        }
        (ResourceViewType::RenderTarget, _, Some(texture)) => {
            write_render_target(device, texture, view.texture_format(texture), handle);
        }
        (ResourceViewType::DepthStencil, _, Some(texture)) => {
            write_depth_stencil(device, texture, view.texture_format(texture), handle);
        }
        (ResourceViewType::Sampler, None, None) => {
            let sampler = view.desc.sampler.unwrap_or_default();
            let address = conversion::address_mode(sampler.address_mode);
            let desc = D3D12_SAMPLER_DESC {
                Filter: conversion::filter(sampler.filter),
                AddressU: address,
                AddressV: address,
                AddressW: address,
                MipLODBias: 0.0,
                MaxAnisotropy: 1,
                ComparisonFunc: D3D12_COMPARISON_FUNC_NEVER,
                BorderColor: [0.0; 4],
                MinLOD: 0.0,
                MaxLOD: D3D12_FLOAT32_MAX,
            };
            unsafe { device.CreateSampler(&desc, handle) };
        }
        _ => return Err(missing().into()),
    }
    Ok(())
}

/// 时间戳查询堆，结果解析到一个常驻映射的读回缓冲区
pub struct Dx12QueryHeap {
    heap: ID3D12QueryHeap,
    readback: ID3D12Resource,
    mapped: NonNull<u64>,
    count: u32,
    frequency: u64,
}

unsafe impl Send for Dx12QueryHeap {}
unsafe impl Sync for Dx12QueryHeap {}

impl Dx12QueryHeap {
    pub(crate) fn new(shared: &DeviceShared, count: u32) -> Result<Self> {
        let mut heap: Option<ID3D12QueryHeap> = None;
        unsafe {
            shared.device.CreateQueryHeap(
                &D3D12_QUERY_HEAP_DESC {
                    Type: D3D12_QUERY_HEAP_TYPE_TIMESTAMP,
                    Count: count.max(1),
                    NodeMask: 0,
                },
                &mut heap,
            )
        }
        .map_err(hr_error(GraphicsError::ResourceCreation, "CreateQueryHeap"))?;
        let heap = heap.ok_or_else(|| GraphicsError::ResourceCreation("CreateQueryHeap returned nothing".to_string()))?;

        let size = count.max(1) as u64 * std::mem::size_of::<u64>() as u64;
        let readback_desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
            Width: size,
            Height: 1,
            DepthOrArraySize: 1,
            MipLevels: 1,
            Format: DXGI_FORMAT_UNKNOWN,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
            ..Default::default()
        };
        let readback = create_committed(
            &shared.device,
            "TimestampReadback",
            D3D12_HEAP_TYPE_READBACK,
            &readback_desc,
            D3D12_RESOURCE_STATE_COPY_DEST,
            None,
        )?;
        let mut ptr: *mut c_void = std::ptr::null_mut();
        unsafe { readback.Map(0, None, Some(&mut ptr)) }
            .map_err(hr_error(GraphicsError::ResourceCreation, "ID3D12Resource::Map"))?;
        let mapped = NonNull::new(ptr as *mut u64)
            .ok_or_else(|| GraphicsError::ResourceCreation("timestamp readback mapped to null".to_string()))?;

        Ok(Self {
            heap,
            readback,
            mapped,
            count,
            frequency: shared.timestamp_frequency,
        })
    }

    pub(crate) fn raw(&self) -> &ID3D12QueryHeap {
        &self.heap
    }

    pub(crate) fn readback(&self) -> &ID3D12Resource {
        &self.readback
    }
}

impl RhiQueryHeap for Dx12QueryHeap {
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
            std::ptr::copy_nonoverlapping(self.mapped.as_ptr().add(first as usize), data.as_mut_ptr(), data.len())
        };
        Ok(data)
    }

    fn timestamp_frequency(&self) -> u64 {
        self.frequency
    }
}

impl Drop for Dx12QueryHeap {
    fn drop(&mut self) {
        unsafe { self.readback.Unmap(0, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_buffers_round_up() {
        assert_eq!(align_up(1, CONSTANT_BUFFER_ALIGNMENT), 256);
        assert_eq!(align_up(256, CONSTANT_BUFFER_ALIGNMENT), 256);
        assert_eq!(align_up(257, CONSTANT_BUFFER_ALIGNMENT), 512);
    }
}
