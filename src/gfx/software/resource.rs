//! 软件后端资源
//!
//! 缓冲区与纹理都放在 CPU 内存中，由队列线程在回放命令时读写。

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::core::error::{GraphicsError, Result};
use crate::rhi::{
    BufferDesc, ClearValue, DescriptorId, Format, GpuResource, MemoryHeap, ResourceState,
    ResourceStateCell, ResourceViewDesc, ResourceViewType, RhiBuffer, RhiQueryHeap,
    RhiResourceView, RhiTexture, TextureDesc,
};

use super::SoftwareBackend;

/// CPU 内存中的缓冲区
pub struct SoftwareBuffer {
    desc: BufferDesc,
    state: ResourceStateCell,
    memory: RwLock<Vec<u8>>,
}

impl SoftwareBuffer {
    pub(crate) fn new(desc: &BufferDesc) -> Self {
        Self {
            desc: desc.clone(),
            state: ResourceStateCell::new(desc.initial_state),
            memory: RwLock::new(vec![0; desc.size as usize]),
        }
    }

    pub(crate) fn memory(&self) -> &RwLock<Vec<u8>> {
        &self.memory
    }

    fn check_range(&self, offset: u64, len: usize) -> Result<()> {
        let end = offset.checked_add(len as u64);
        match end {
            Some(end) if end <= self.desc.size => Ok(()),
            _ => Err(GraphicsError::ResourceCreation(format!(
                "range {}+{} exceeds buffer '{}' of {} bytes",
                offset, len, self.desc.name, self.desc.size
            ))
            .into()),
        }
    }
}

impl GpuResource for SoftwareBuffer {
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

impl RhiBuffer for SoftwareBuffer {
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
        self.check_range(offset, data.len())?;
        let start = offset as usize;
        self.memory.write()[start..start + data.len()].copy_from_slice(data);
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
        self.check_range(offset, out.len())?;
        let start = offset as usize;
        out.copy_from_slice(&self.memory.read()[start..start + out.len()]);
        Ok(())
    }
}

/// CPU 内存中的纹理，每个子资源一段紧密排列的像素
pub struct SoftwareTexture {
    desc: TextureDesc,
    state: ResourceStateCell,
    subresources: RwLock<Vec<Vec<u8>>>,
}

impl SoftwareTexture {
    pub(crate) fn new(desc: &TextureDesc) -> Self {
        let bpp = desc.format.bytes_per_pixel() as usize;
        let mut subresources = Vec::with_capacity(desc.subresource_count() as usize);
        for _layer in 0..desc.depth_or_array_layers {
            for mip in 0..desc.mip_levels {
                let (w, h) = desc.mip_extent(mip);
                subresources.push(vec![0; w as usize * h as usize * bpp]);
            }
        }
        Self {
            desc: desc.clone(),
            state: ResourceStateCell::new(desc.initial_state),
            subresources: RwLock::new(subresources),
        }
    }

    pub(crate) fn subresources(&self) -> &RwLock<Vec<Vec<u8>>> {
        &self.subresources
    }

    /// 读取一个子资源的全部像素（紧密排列）
    pub fn read_pixels(&self, mip_level: u32, array_layer: u32) -> Vec<u8> {
        let index = self.desc.subresource_index(mip_level, array_layer) as usize;
        self.subresources.read()[index].clone()
    }

    /// 读取 mip 0 上一个像素
    pub fn read_pixel(&self, x: u32, y: u32) -> Vec<u8> {
        let bpp = self.desc.format.bytes_per_pixel() as usize;
        let offset = (y as usize * self.desc.width as usize + x as usize) * bpp;
        self.subresources.read()[0][offset..offset + bpp].to_vec()
    }
}

impl GpuResource for SoftwareTexture {
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

impl RhiTexture for SoftwareTexture {
    fn desc(&self) -> &TextureDesc {
        &self.desc
    }
}

/// 资源视图
pub struct SoftwareResourceView {
    pub(crate) desc: ResourceViewDesc,
    pub(crate) id: DescriptorId,
    pub(crate) buffer: Option<Arc<SoftwareBuffer>>,
    pub(crate) texture: Option<Arc<SoftwareTexture>>,
}

impl std::fmt::Debug for SoftwareResourceView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareResourceView")
            .field("desc", &self.desc)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl SoftwareResourceView {
    pub fn format(&self) -> Format {
        match (&self.texture, self.desc.format) {
            (Some(texture), Format::Unknown) => texture.format(),
            (_, format) => format,
        }
    }
}

impl RhiResourceView<SoftwareBackend> for SoftwareResourceView {
    fn view_type(&self) -> ResourceViewType {
        self.desc.view_type
    }

    fn descriptor_id(&self) -> DescriptorId {
        self.id
    }

    fn texture(&self) -> Option<&Arc<SoftwareTexture>> {
        self.texture.as_ref()
    }

    fn buffer(&self) -> Option<&Arc<SoftwareBuffer>> {
        self.buffer.as_ref()
    }
}

/// 时间戳查询堆，单位为纳秒
pub struct SoftwareQueryHeap {
    values: Vec<AtomicU64>,
}

impl SoftwareQueryHeap {
    pub(crate) fn new(count: u32) -> Self {
        Self {
            values: (0..count).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub(crate) fn store(&self, index: u32, ticks: u64) {
        if let Some(slot) = self.values.get(index as usize) {
            slot.store(ticks, Ordering::Release);
        }
    }
}

impl RhiQueryHeap for SoftwareQueryHeap {
    fn count(&self) -> u32 {
        self.values.len() as u32
    }

    fn read_timestamps(&self, first: u32, count: u32) -> Result<Vec<u64>> {
        let end = first as usize + count as usize;
        if end > self.values.len() {
            return Err(GraphicsError::InvalidState(format!(
                "query range {}..{} exceeds heap of {}",
                first,
                end,
                self.values.len()
            ))
            .into());
        }
        Ok(self.values[first as usize..end]
            .iter()
            .map(|v| v.load(Ordering::Acquire))
            .collect())
    }

    fn timestamp_frequency(&self) -> u64 {
        1_000_000_000
    }
}

/// 把清屏值编码成一个像素的字节
pub(crate) fn encode_clear_value(format: Format, clear: ClearValue) -> Vec<u8> {
    let (color, depth, stencil) = match clear {
        ClearValue::Color(c) => (c, 1.0, 0),
        ClearValue::DepthStencil { depth, stencil } => ([0.0; 4], depth, stencil),
    };
    let unorm8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;

    match format {
        Format::Unknown => Vec::new(),
        Format::Rgba8Unorm => color.iter().map(|&c| unorm8(c)).collect(),
        Format::Rgba8Srgb => {
            let [r, g, b, a] = color;
            vec![
                unorm8(linear_to_srgb(r)),
                unorm8(linear_to_srgb(g)),
                unorm8(linear_to_srgb(b)),
                unorm8(a),
            ]
        }
        Format::Bgra8Unorm => vec![unorm8(color[2]), unorm8(color[1]), unorm8(color[0]), unorm8(color[3])],
        Format::Rgba16Float => color
            .iter()
            .flat_map(|&c| f32_to_f16(c).to_le_bytes())
            .collect(),
        Format::Rgb10A2Unorm => {
            let unorm = |v: f32, max: f32| (v.clamp(0.0, 1.0) * max).round() as u32;
            let packed = unorm(color[0], 1023.0)
                | unorm(color[1], 1023.0) << 10
                | unorm(color[2], 1023.0) << 20
                | unorm(color[3], 3.0) << 30;
            packed.to_le_bytes().to_vec()
        }
        Format::R32Uint => (color[0].max(0.0) as u32).to_le_bytes().to_vec(),
        Format::R32Float => color[0].to_le_bytes().to_vec(),
        Format::Rgba32Float => color.iter().flat_map(|c| c.to_le_bytes()).collect(),
        Format::D32Float => depth.to_le_bytes().to_vec(),
        Format::D24UnormS8Uint => {
            let d = (depth.clamp(0.0, 1.0) * 16_777_215.0).round() as u32;
            (d | (stencil as u32) << 24).to_le_bytes().to_vec()
        }
    }
}

fn linear_to_srgb(v: f32) -> f32 {
    let v = v.clamp(0.0, 1.0);
    if v <= 0.003_130_8 {
        v * 12.92
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    }
}

/// f32 → IEEE 754 半精度，向零截断尾数
fn f32_to_f16(value: f32) -> u16 {
    let bits = value.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exp = ((bits >> 23) & 0xff) as i32;
    let mant = bits & 0x7f_ffff;

    if exp == 0xff {
        return sign | 0x7c00 | if mant != 0 { 0x200 } else { 0 };
    }
    let e = exp - 127 + 15;
    if e >= 0x1f {
        return sign | 0x7c00;
    }
    if e <= 0 {
        if e < -10 {
            return sign;
        }
        let m = (mant | 0x80_0000) >> (14 - e);
        return sign | m as u16;
    }
    sign | ((e as u16) << 10) | (mant >> 13) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rhi::ResourceUsage;

    #[test]
    fn test_encode_clear_colors() {
        let red = ClearValue::Color([1.0, 0.0, 0.0, 1.0]);
        assert_eq!(encode_clear_value(Format::Rgba8Unorm, red), vec![255, 0, 0, 255]);
        assert_eq!(encode_clear_value(Format::Bgra8Unorm, red), vec![0, 0, 255, 255]);
        assert_eq!(
            encode_clear_value(Format::Rgba16Float, ClearValue::Color([1.0, 0.5, 0.0, -2.0])),
            [0x3c00u16, 0x3800, 0x0000, 0xc000]
                .iter()
                .flat_map(|v| v.to_le_bytes())
                .collect::<Vec<_>>()
        );
        assert_eq!(
            encode_clear_value(Format::D32Float, ClearValue::DEPTH_ONE),
            1.0f32.to_le_bytes().to_vec()
        );
    }

    #[test]
    fn test_f16_edge_cases() {
        assert_eq!(f32_to_f16(0.0), 0);
        assert_eq!(f32_to_f16(-0.0), 0x8000);
        assert_eq!(f32_to_f16(65504.0), 0x7bff);
        assert_eq!(f32_to_f16(1.0e6), 0x7c00);
        assert_eq!(f32_to_f16(f32::NAN) & 0x7c00, 0x7c00);
        // 最小的非规格化半精度数
        assert_eq!(f32_to_f16(5.960_464_5e-8), 0x0001);
    }

    #[test]
    fn test_upload_buffer_write_read() {
        let buffer = SoftwareBuffer::new(&BufferDesc::upload(8).with_name("upload"));
        buffer.write(4, &[1, 2, 3, 4]).unwrap();
        let mut out = [0u8; 4];
        buffer.read(4, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
        assert!(buffer.write(6, &[0; 4]).is_err());
    }

    #[test]
    fn test_device_local_buffer_is_not_mappable() {
        let buffer = SoftwareBuffer::new(&BufferDesc::device_local(16, ResourceUsage::VERTEX));
        assert!(buffer.write(0, &[0; 4]).is_err());
        assert!(buffer.read(0, &mut [0; 4]).is_err());
    }

    #[test]
    fn test_texture_subresource_layout() {
        let mut desc = TextureDesc::new_2d(8, 4, Format::Rgba8Unorm, ResourceUsage::SHADER_RESOURCE);
        desc.mip_levels = 3;
        let texture = SoftwareTexture::new(&desc);
        assert_eq!(texture.read_pixels(0, 0).len(), 8 * 4 * 4);
        assert_eq!(texture.read_pixels(2, 0).len(), 2 * 1 * 4);
    }
}
