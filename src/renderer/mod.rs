//! 渲染器模块
//!
//! 应用程序通过 [`Renderer`] 驱动帧引擎，而不需要关心具体使用的是哪个后端。
//!
//! # 架构设计
//!
//! - `Renderer`：统一的渲染器接口，对外提供一致的 API
//! - `Backend`：内部枚举，每个变体是对某个后端单态化的 [`LowLevelGraphicsEngine`]
//! - 后端实现在 `gfx` 模块中，按 API 分类组织

use tracing::info;

use crate::core::config::{EngineConfig, GraphicsBackend};
use crate::core::error::{GraphicsError, Result};
use crate::engine::{FrameStatistics, FrameTiming, LowLevelGraphicsEngine};
#[cfg(all(windows, feature = "dx12"))]
use crate::gfx::dx12::Dx12Backend;
use crate::gfx::software::SoftwareBackend;
#[cfg(feature = "vulkan")]
use crate::gfx::vulkan::VulkanBackend;
use crate::rhi::{GraphicsApi, RhiBackend, WindowHandle};

/// 图形后端枚举
///
/// 后端在启动时选择一次，之后每个方法都是一次静态分发的 match。
enum Backend {
    Software(LowLevelGraphicsEngine<SoftwareBackend>),
    #[cfg(feature = "vulkan")]
    Vulkan(LowLevelGraphicsEngine<VulkanBackend>),
    #[cfg(all(windows, feature = "dx12"))]
    Dx12(LowLevelGraphicsEngine<Dx12Backend>),
}

macro_rules! with_engine {
    ($backend:expr, $engine:ident => $body:expr) => {
        match $backend {
            Backend::Software($engine) => $body,
            #[cfg(feature = "vulkan")]
            Backend::Vulkan($engine) => $body,
            #[cfg(all(windows, feature = "dx12"))]
            Backend::Dx12($engine) => $body,
        }
    };
}

pub struct Renderer {
    backend: Backend,
}

impl Renderer {
    /// 按 `config.graphics.backend` 启动对应的帧引擎
    ///
    /// 原生后端需要 `window`；所选后端未编译进来时返回 [`GraphicsError::Unsupported`]。
    pub fn new(config: &EngineConfig, window: Option<WindowHandle>) -> Result<Self> {
        let selected = config.graphics.backend;
        if !selected.is_compiled_in() {
            return Err(GraphicsError::Unsupported(format!(
                "{} backend is not available in this build",
                selected.name()
            ))
            .into());
        }

        info!(backend = selected.name(), "Initializing renderer");
        let backend = match selected {
            GraphicsBackend::Software => Backend::Software(LowLevelGraphicsEngine::start_up(config, window)?),
            #[cfg(feature = "vulkan")]
            GraphicsBackend::Vulkan => Backend::Vulkan(LowLevelGraphicsEngine::start_up(config, window)?),
            #[cfg(all(windows, feature = "dx12"))]
            GraphicsBackend::Dx12 => Backend::Dx12(LowLevelGraphicsEngine::start_up(config, window)?),
            #[allow(unreachable_patterns)]
            other => {
                return Err(GraphicsError::Unsupported(format!("{} backend", other.name())).into());
            }
        };

        Ok(Self { backend })
    }

    pub fn api(&self) -> GraphicsApi {
        match &self.backend {
            Backend::Software(_) => SoftwareBackend::API,
            #[cfg(feature = "vulkan")]
            Backend::Vulkan(_) => VulkanBackend::API,
            #[cfg(all(windows, feature = "dx12"))]
            Backend::Dx12(_) => Dx12Backend::API,
        }
    }

    /// 绘制一帧：清屏的交换链渲染通道，然后呈现
    pub fn draw_frame(&mut self) -> Result<FrameTiming> {
        with_engine!(&mut self.backend, engine => {
            engine.begin_draw_frame()?;
            engine.begin_swapchain_render_pass()?;
            engine.end_draw_frame()
        })
    }

    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        with_engine!(&mut self.backend, engine => engine.on_resize(width, height))
    }

    pub fn switch_hdr_mode(&mut self, enable: bool) -> Result<()> {
        with_engine!(&mut self.backend, engine => engine.switch_hdr_mode(enable))
    }

    pub fn switch_full_screen_mode(&mut self, enable: bool) -> Result<()> {
        with_engine!(&mut self.backend, engine => engine.switch_full_screen_mode(enable))
    }

    pub fn frame_statistics(&self) -> &FrameStatistics {
        with_engine!(&self.backend, engine => engine.frame_statistics())
    }

    pub fn shut_down(&mut self) -> Result<()> {
        with_engine!(&mut self.backend, engine => engine.shut_down())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.window.width = 32;
        config.window.height = 16;
        config
    }

    #[test]
    fn test_software_renderer_draws_frames() {
        let mut renderer = Renderer::new(&small_config(), None).unwrap();
        assert_eq!(renderer.api(), GraphicsApi::Software);

        for _ in 0..4 {
            renderer.draw_frame().unwrap();
        }
        renderer.resize(48, 24).unwrap();
        renderer.draw_frame().unwrap();

        assert_eq!(renderer.frame_statistics().frame_count(), 5);
        renderer.shut_down().unwrap();
        assert!(renderer.draw_frame().is_err());
    }

    #[test]
    #[cfg(not(feature = "vulkan"))]
    fn test_missing_backend_is_unsupported() {
        let mut config = small_config();
        config.graphics.backend = GraphicsBackend::Vulkan;
        let err = Renderer::new(&config, None).err().unwrap();
        assert!(matches!(
            err,
            crate::core::DistRhiError::Graphics(GraphicsError::Unsupported(_))
        ));
    }
}
