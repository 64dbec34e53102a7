//! RHI 公共类型
//!
//! 命令列表类型、像素格式、视口裁剪与清屏值等各后端共享的值类型。

use std::fmt;

/// 图形 API 标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphicsApi {
    Software,
    Vulkan,
    DirectX12,
}

impl fmt::Display for GraphicsApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GraphicsApi::Software => "Software",
            GraphicsApi::Vulkan => "Vulkan",
            GraphicsApi::DirectX12 => "DirectX 12",
        };
        f.write_str(name)
    }
}

/// 命令列表 / 命令队列类型
///
/// 引擎中每种类型恰好一个队列和一个命令列表。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandListType {
    /// 图形（同时可执行计算与拷贝）
    Graphics,
    /// 异步计算
    Compute,
    /// 拷贝
    Copy,
}

impl CommandListType {
    pub const ALL: [CommandListType; 3] = [
        CommandListType::Graphics,
        CommandListType::Compute,
        CommandListType::Copy,
    ];

    /// 在 `[T; 3]` 形式的每类型数组中的下标
    pub fn index(self) -> usize {
        match self {
            CommandListType::Graphics => 0,
            CommandListType::Compute => 1,
            CommandListType::Copy => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CommandListType::Graphics => "Graphics",
            CommandListType::Compute => "Compute",
            CommandListType::Copy => "Copy",
        }
    }

    /// 该类型的列表能否录制 dispatch
    pub fn supports_compute(self) -> bool {
        !matches!(self, CommandListType::Copy)
    }
}

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Unknown,
    Rgba8Unorm,
    Rgba8Srgb,
    Bgra8Unorm,
    Rgba16Float,
    Rgb10A2Unorm,
    R32Uint,
    R32Float,
    Rgba32Float,
    D32Float,
    D24UnormS8Uint,
}

impl Format {
    /// 每像素字节数
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Format::Unknown => 0,
            Format::Rgba8Unorm
            | Format::Rgba8Srgb
            | Format::Bgra8Unorm
            | Format::Rgb10A2Unorm
            | Format::R32Uint
            | Format::R32Float
            | Format::D32Float
            | Format::D24UnormS8Uint => 4,
            Format::Rgba16Float => 8,
            Format::Rgba32Float => 16,
        }
    }

    pub fn is_depth(self) -> bool {
        matches!(self, Format::D32Float | Format::D24UnormS8Uint)
    }

    pub fn has_stencil(self) -> bool {
        matches!(self, Format::D24UnormS8Uint)
    }
}

/// 视口
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// 覆盖整个 `width x height` 区域的视口
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// 裁剪矩形（右、下为开区间）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl ScissorRect {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            left: 0,
            top: 0,
            right: width as i32,
            bottom: height as i32,
        }
    }

    pub fn width(&self) -> u32 {
        (self.right - self.left).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.bottom - self.top).max(0) as u32
    }
}

/// 清屏值
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u8 },
}

impl ClearValue {
    pub const BLACK: ClearValue = ClearValue::Color([0.0, 0.0, 0.0, 1.0]);
    pub const DEPTH_ONE: ClearValue = ClearValue::DepthStencil { depth: 1.0, stencil: 0 };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_sizes() {
        assert_eq!(Format::Rgba8Unorm.bytes_per_pixel(), 4);
        assert_eq!(Format::Rgba16Float.bytes_per_pixel(), 8);
        assert!(Format::D32Float.is_depth());
        assert!(!Format::D32Float.has_stencil());
        assert!(!Format::Bgra8Unorm.is_depth());
    }

    #[test]
    fn test_command_list_type_index() {
        for (i, ty) in CommandListType::ALL.iter().enumerate() {
            assert_eq!(ty.index(), i);
        }
        assert!(!CommandListType::Copy.supports_compute());
    }

    #[test]
    fn test_scissor_extent() {
        let rect = ScissorRect::full(640, 480);
        assert_eq!((rect.width(), rect.height()), (640, 480));
        let inverted = ScissorRect { left: 10, top: 10, right: 5, bottom: 5 };
        assert_eq!(inverted.width(), 0);
    }
}
