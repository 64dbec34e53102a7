//! GPU 资源模块
//!
//! 缓冲区、纹理与资源视图的描述信息，以及所有资源共享的使用状态跟踪。
//!
//! 资源状态转换是显式的：调用方通过命令列表的 `resource_barrier` 录制转换，
//! 被跟踪的状态在录制时（而不是 GPU 执行时）更新。

use bitflags::bitflags;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use super::descriptor::{DescriptorHeapType, DescriptorId};
use super::types::{ClearValue, Format};
use super::RhiBackend;
use crate::core::error::{GraphicsError, Result};

/// 纹理上传时行间距的对齐要求（字节）
pub const TEXTURE_DATA_PITCH_ALIGNMENT: u32 = 256;

/// 资源使用状态
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Common = 0,
    VertexAndConstantBuffer,
    IndexBuffer,
    RenderTarget,
    UnorderedAccess,
    DepthWrite,
    DepthRead,
    ShaderResource,
    CopyDest,
    CopySource,
    Present,
    GenericRead,
}

impl ResourceState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ResourceState::VertexAndConstantBuffer,
            2 => ResourceState::IndexBuffer,
            3 => ResourceState::RenderTarget,
            4 => ResourceState::UnorderedAccess,
            5 => ResourceState::DepthWrite,
            6 => ResourceState::DepthRead,
            7 => ResourceState::ShaderResource,
            8 => ResourceState::CopyDest,
            9 => ResourceState::CopySource,
            10 => ResourceState::Present,
            11 => ResourceState::GenericRead,
            _ => ResourceState::Common,
        }
    }

    /// 是否为写状态（写状态之间的转换同样需要屏障）
    pub fn is_write(self) -> bool {
        matches!(
            self,
            ResourceState::RenderTarget
                | ResourceState::UnorderedAccess
                | ResourceState::DepthWrite
                | ResourceState::CopyDest
        )
    }
}

/// 原子的资源状态单元，嵌入每个资源实现中
#[derive(Debug)]
pub struct ResourceStateCell(AtomicU8);

impl ResourceStateCell {
    pub fn new(state: ResourceState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> ResourceState {
        ResourceState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: ResourceState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

bitflags! {
    /// 资源用途
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceUsage: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        const CONSTANT = 1 << 2;
        const SHADER_RESOURCE = 1 << 3;
        const UNORDERED_ACCESS = 1 << 4;
        const RENDER_TARGET = 1 << 5;
        const DEPTH_STENCIL = 1 << 6;
        const COPY_SRC = 1 << 7;
        const COPY_DST = 1 << 8;
    }
}

/// 资源所在的内存堆
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryHeap {
    /// GPU 本地内存，CPU 不可访问
    DeviceLocal,
    /// CPU 写、GPU 读
    Upload,
    /// GPU 写、CPU 读
    Readback,
}

/// 缓冲区描述信息
#[derive(Debug, Clone)]
pub struct BufferDesc {
    /// 大小（字节）
    pub size: u64,
    pub usage: ResourceUsage,
    pub memory: MemoryHeap,
    pub initial_state: ResourceState,
    /// 调试名称
    pub name: String,
}

impl BufferDesc {
    /// GPU 本地缓冲区
    pub fn device_local(size: u64, usage: ResourceUsage) -> Self {
        Self {
            size,
            usage,
            memory: MemoryHeap::DeviceLocal,
            initial_state: ResourceState::Common,
            name: String::new(),
        }
    }

    /// 上传缓冲区，初始即处于拷贝源状态
    pub fn upload(size: u64) -> Self {
        Self {
            size,
            usage: ResourceUsage::COPY_SRC,
            memory: MemoryHeap::Upload,
            initial_state: ResourceState::GenericRead,
            name: String::new(),
        }
    }

    /// 读回缓冲区，初始即处于拷贝目标状态
    pub fn readback(size: u64) -> Self {
        Self {
            size,
            usage: ResourceUsage::COPY_DST,
            memory: MemoryHeap::Readback,
            initial_state: ResourceState::CopyDest,
            name: String::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_initial_state(mut self, state: ResourceState) -> Self {
        self.initial_state = state;
        self
    }
}

/// 纹理描述信息
#[derive(Debug, Clone)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    /// 数组层数
    pub depth_or_array_layers: u32,
    pub mip_levels: u32,
    pub format: Format,
    pub usage: ResourceUsage,
    pub initial_state: ResourceState,
    /// 优化清屏值（渲染目标 / 深度缓冲）
    pub clear_value: Option<ClearValue>,
    pub name: String,
}

impl TextureDesc {
    /// 单层单 mip 的 2D 纹理
    pub fn new_2d(width: u32, height: u32, format: Format, usage: ResourceUsage) -> Self {
        Self {
            width,
            height,
            depth_or_array_layers: 1,
            mip_levels: 1,
            format,
            usage,
            initial_state: ResourceState::Common,
            clear_value: None,
            name: String::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_initial_state(mut self, state: ResourceState) -> Self {
        self.initial_state = state;
        self
    }

    pub fn with_clear_value(mut self, clear: ClearValue) -> Self {
        self.clear_value = Some(clear);
        self
    }

    /// 指定 mip 的尺寸
    pub fn mip_extent(&self, mip_level: u32) -> (u32, u32) {
        (
            (self.width >> mip_level).max(1),
            (self.height >> mip_level).max(1),
        )
    }

    /// 子资源数量
    pub fn subresource_count(&self) -> u32 {
        self.mip_levels * self.depth_or_array_layers
    }

    /// 子资源下标，与 D3D12 的计算方式一致
    pub fn subresource_index(&self, mip_level: u32, array_layer: u32) -> u32 {
        mip_level + array_layer * self.mip_levels
    }
}

/// 所有 GPU 资源共享的接口
pub trait GpuResource: Send + Sync {
    /// 调试名称
    fn name(&self) -> &str;

    /// 当前被跟踪的使用状态
    fn usage_state(&self) -> ResourceState;

    /// 更新被跟踪的使用状态（只应由屏障录制调用）
    fn set_usage_state(&self, state: ResourceState);
}

/// 缓冲区
pub trait RhiBuffer: GpuResource {
    fn desc(&self) -> &BufferDesc;

    fn size(&self) -> u64 {
        self.desc().size
    }

    /// 写入 CPU 可见内存（仅 `MemoryHeap::Upload`）
    fn write(&self, offset: u64, data: &[u8]) -> Result<()>;

    /// 读取 CPU 可见内存（`Upload` 或 `Readback`）
    fn read(&self, offset: u64, out: &mut [u8]) -> Result<()>;
}

/// 纹理
pub trait RhiTexture: GpuResource {
    fn desc(&self) -> &TextureDesc;

    fn width(&self) -> u32 {
        self.desc().width
    }

    fn height(&self) -> u32 {
        self.desc().height
    }

    fn format(&self) -> Format {
        self.desc().format
    }
}

/// 对缓冲区或纹理的借用
pub enum ResourceRef<'a, B: RhiBackend> {
    Buffer(&'a Arc<B::Buffer>),
    Texture(&'a Arc<B::Texture>),
}

impl<'a, B: RhiBackend> Clone for ResourceRef<'a, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, B: RhiBackend> Copy for ResourceRef<'a, B> {}

impl<'a, B: RhiBackend> ResourceRef<'a, B> {
    pub fn as_gpu_resource(&self) -> &'a dyn GpuResource {
        match *self {
            ResourceRef::Buffer(buffer) => buffer.as_ref(),
            ResourceRef::Texture(texture) => texture.as_ref(),
        }
    }

    pub fn usage_state(&self) -> ResourceState {
        self.as_gpu_resource().usage_state()
    }

    pub fn name(&self) -> &'a str {
        self.as_gpu_resource().name()
    }
}

/// 资源状态转换屏障，转换前状态取自被跟踪状态
pub struct TransitionBarrier<'a, B: RhiBackend> {
    pub resource: ResourceRef<'a, B>,
    pub after: ResourceState,
}

impl<'a, B: RhiBackend> TransitionBarrier<'a, B> {
    pub fn buffer(buffer: &'a Arc<B::Buffer>, after: ResourceState) -> Self {
        Self {
            resource: ResourceRef::Buffer(buffer),
            after,
        }
    }

    pub fn texture(texture: &'a Arc<B::Texture>, after: ResourceState) -> Self {
        Self {
            resource: ResourceRef::Texture(texture),
            after,
        }
    }
}

/// 缓冲区中纹理数据的布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureFootprint {
    /// 在缓冲区中的起始偏移
    pub offset: u64,
    pub format: Format,
    pub width: u32,
    pub height: u32,
    /// 行间距（字节），按 [`TEXTURE_DATA_PITCH_ALIGNMENT`] 对齐
    pub row_pitch: u32,
}

impl TextureFootprint {
    /// 为 `width x height` 的纹理计算对齐后的布局
    pub fn aligned(offset: u64, format: Format, width: u32, height: u32) -> Self {
        let unaligned = width * format.bytes_per_pixel();
        let align = TEXTURE_DATA_PITCH_ALIGNMENT;
        Self {
            offset,
            format,
            width,
            height,
            row_pitch: unaligned.div_ceil(align) * align,
        }
    }

    /// 每行有效字节数
    pub fn row_bytes(&self) -> u32 {
        self.width * self.format.bytes_per_pixel()
    }

    /// 占用的缓冲区字节数
    pub fn total_size(&self) -> u64 {
        self.row_pitch as u64 * self.height.saturating_sub(1) as u64 + self.row_bytes() as u64
    }
}

/// 纹理拷贝的一端：纹理子资源，或缓冲区中的一段纹理数据
pub enum TextureCopyLocation<'a, B: RhiBackend> {
    Subresource {
        texture: &'a Arc<B::Texture>,
        mip_level: u32,
        array_layer: u32,
    },
    Footprint {
        buffer: &'a Arc<B::Buffer>,
        footprint: TextureFootprint,
    },
}

impl<'a, B: RhiBackend> TextureCopyLocation<'a, B> {
    pub fn texture(texture: &'a Arc<B::Texture>) -> Self {
        TextureCopyLocation::Subresource {
            texture,
            mip_level: 0,
            array_layer: 0,
        }
    }

    /// 该位置所描述区域的尺寸
    pub fn extent(&self) -> (u32, u32) {
        match self {
            TextureCopyLocation::Subresource { texture, mip_level, .. } => {
                texture.desc().mip_extent(*mip_level)
            }
            TextureCopyLocation::Footprint { footprint, .. } => (footprint.width, footprint.height),
        }
    }

    pub fn resource(&self) -> ResourceRef<'a, B> {
        match *self {
            TextureCopyLocation::Subresource { texture, .. } => ResourceRef::Texture(texture),
            TextureCopyLocation::Footprint { buffer, .. } => ResourceRef::Buffer(buffer),
        }
    }
}

/// 资源视图类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceViewType {
    ConstantBuffer,
    ShaderResource,
    UnorderedAccess,
    RenderTarget,
    DepthStencil,
    Sampler,
}

impl ResourceViewType {
    /// 视图占用的描述符类型
    pub fn heap_type(self) -> DescriptorHeapType {
        match self {
            ResourceViewType::ConstantBuffer => DescriptorHeapType::Cbv,
            ResourceViewType::ShaderResource => DescriptorHeapType::Srv,
            ResourceViewType::UnorderedAccess => DescriptorHeapType::Uav,
            ResourceViewType::RenderTarget => DescriptorHeapType::Rtv,
            ResourceViewType::DepthStencil => DescriptorHeapType::Dsv,
            ResourceViewType::Sampler => DescriptorHeapType::Sampler,
        }
    }
}

/// 采样过滤方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Point,
    Linear,
}

/// 纹理寻址方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    Wrap,
    Clamp,
    Mirror,
}

/// 采样器描述
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerDesc {
    pub filter: Filter,
    pub address_mode: AddressMode,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            filter: Filter::Linear,
            address_mode: AddressMode::Wrap,
        }
    }
}

/// 资源视图描述
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceViewDesc {
    pub view_type: ResourceViewType,
    /// `Format::Unknown` 表示沿用资源自身格式
    pub format: Format,
    /// 仅 `Sampler` 视图使用
    pub sampler: Option<SamplerDesc>,
}

impl ResourceViewDesc {
    pub fn new(view_type: ResourceViewType) -> Self {
        Self {
            view_type,
            format: Format::Unknown,
            sampler: None,
        }
    }

    pub fn shader_resource() -> Self {
        Self::new(ResourceViewType::ShaderResource)
    }

    pub fn sampler(desc: SamplerDesc) -> Self {
        Self {
            view_type: ResourceViewType::Sampler,
            format: Format::Unknown,
            sampler: Some(desc),
        }
    }
}

/// 创建视图时引用的资源
pub enum ViewResource<'a, B: RhiBackend> {
    Buffer(&'a Arc<B::Buffer>),
    Texture(&'a Arc<B::Texture>),
    /// 采样器不引用资源
    None,
}

fn view_mismatch(view_type: ResourceViewType, what: &str) -> crate::core::error::DistRhiError {
    GraphicsError::ResourceCreation(format!("{:?} view requires {}", view_type, what)).into()
}

/// 检查视图类型与所引用的资源是否匹配
pub fn check_view_resource<B: RhiBackend>(resource: &ViewResource<'_, B>, view_type: ResourceViewType) -> Result<()> {
    match (view_type, resource) {
        (ResourceViewType::Sampler, ViewResource::None) => Ok(()),
        (ResourceViewType::Sampler, _) => Err(view_mismatch(view_type, "no resource")),
        (_, ViewResource::None) => Err(view_mismatch(view_type, "a resource")),
        (ResourceViewType::RenderTarget | ResourceViewType::DepthStencil, ViewResource::Buffer(_)) => {
            Err(view_mismatch(view_type, "a texture"))
        }
        (_, ViewResource::Buffer(_)) => Ok(()),
        (_, ViewResource::Texture(texture)) => {
            let required = match view_type {
                ResourceViewType::RenderTarget => ResourceUsage::RENDER_TARGET,
                ResourceViewType::DepthStencil => ResourceUsage::DEPTH_STENCIL,
                ResourceViewType::UnorderedAccess => ResourceUsage::UNORDERED_ACCESS,
                ResourceViewType::ShaderResource => ResourceUsage::SHADER_RESOURCE,
                _ => ResourceUsage::empty(),
            };
            if texture.desc().usage.contains(required) {
                Ok(())
            } else {
                Err(view_mismatch(view_type, "a texture created with the matching usage"))
            }
        }
    }
}

/// 资源视图，持有所引用资源的强引用
pub trait RhiResourceView<B: RhiBackend>: Send + Sync {
    fn view_type(&self) -> ResourceViewType;

    /// 视图在描述符堆中的槽位
    fn descriptor_id(&self) -> DescriptorId;

    fn texture(&self) -> Option<&Arc<B::Texture>>;

    fn buffer(&self) -> Option<&Arc<B::Buffer>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_cell_round_trip() {
        let cell = ResourceStateCell::new(ResourceState::Common);
        for state in [
            ResourceState::VertexAndConstantBuffer,
            ResourceState::IndexBuffer,
            ResourceState::RenderTarget,
            ResourceState::UnorderedAccess,
            ResourceState::DepthWrite,
            ResourceState::DepthRead,
            ResourceState::ShaderResource,
            ResourceState::CopyDest,
            ResourceState::CopySource,
            ResourceState::Present,
            ResourceState::GenericRead,
            ResourceState::Common,
        ] {
            cell.set(state);
            assert_eq!(cell.get(), state);
        }
    }

    #[test]
    fn test_footprint_alignment() {
        let fp = TextureFootprint::aligned(0, Format::Rgba8Unorm, 3, 2);
        assert_eq!(fp.row_bytes(), 12);
        assert_eq!(fp.row_pitch, 256);
        assert_eq!(fp.total_size(), 256 + 12);

        let exact = TextureFootprint::aligned(0, Format::Rgba8Unorm, 64, 4);
        assert_eq!(exact.row_pitch, 256);
        assert_eq!(exact.total_size(), 256 * 4);
    }

    #[test]
    fn test_mip_extent() {
        let mut desc = TextureDesc::new_2d(256, 64, Format::Rgba8Unorm, ResourceUsage::SHADER_RESOURCE);
        desc.mip_levels = 9;
        assert_eq!(desc.mip_extent(0), (256, 64));
        assert_eq!(desc.mip_extent(3), (32, 8));
        assert_eq!(desc.mip_extent(8), (1, 1));
        assert_eq!(desc.subresource_index(2, 1), 11);
    }

    #[test]
    fn test_view_heap_types() {
        assert_eq!(ResourceViewType::ShaderResource.heap_type(), DescriptorHeapType::Srv);
        assert_eq!(ResourceViewType::DepthStencil.heap_type(), DescriptorHeapType::Dsv);
        assert_eq!(ResourceViewType::Sampler.heap_type(), DescriptorHeapType::Sampler);
    }
}
