//! DistRHI - 多后端渲染硬件接口
//!
//! 在 Vulkan、DirectX 12 与一个 CPU 软件后端之上提供统一的 RHI，
//! 并在其上实现以 fence 驱动的帧引擎。
//!
//! # 模块结构
//!
//! - `core`：日志、配置、错误处理
//! - `rhi`：与 API 无关的 trait 和值类型
//! - `gfx`：各后端实现
//! - `engine`：低层图形引擎（帧协议、同步、重建）
//! - `assets`：纹理缓存与材质
//! - `renderer`：按配置选择后端的统一入口
//!
//! # 使用示例
//!
//! ```no_run
//! use dist_rhi::core::EngineConfig;
//! use dist_rhi::engine::LowLevelGraphicsEngine;
//! use dist_rhi::gfx::software::SoftwareBackend;
//!
//! let config = EngineConfig::default();
//! let mut engine = LowLevelGraphicsEngine::<SoftwareBackend>::start_up(&config, None)?;
//! engine.begin_draw_frame()?;
//! engine.begin_swapchain_render_pass()?;
//! let timing = engine.end_draw_frame()?;
//! println!("frame {} took {:?}", timing.frame_number, timing.cpu_time);
//! # Ok::<(), dist_rhi::core::DistRhiError>(())
//! ```

pub mod assets;
pub mod core;
pub mod engine;
pub mod gfx;
pub mod renderer;
pub mod rhi;
