//! DistRHI 演示程序
//!
//! 按配置选择后端并运行帧引擎。软件后端无窗口运行固定帧数并打印帧计时；
//! 原生后端打开一个 winit 窗口，窗口尺寸变化时重建交换链。
//!
//! # 使用方法
//!
//! ```bash
//! # 软件后端，渲染 120 帧
//! cargo run -- --software --frames 120
//!
//! # Vulkan 后端（需要 feature）
//! cargo run --features vulkan -- --vulkan
//!
//! # DirectX 12 后端（仅 Windows）
//! cargo run --features dx12 -- --dx12
//! ```

use anyhow::Context;
use tracing::{debug, error, info};
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, Event, KeyEvent, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::WindowBuilder;

use dist_rhi::core::config::GraphicsBackend;
use dist_rhi::core::{log, EngineConfig};
use dist_rhi::renderer::Renderer;
use dist_rhi::rhi::WindowHandle;

/// 应用程序入口点
///
/// # 初始化流程
///
/// 1. 加载引擎配置文件（config.toml），应用命令行参数覆盖
/// 2. 初始化日志系统
/// 3. 软件后端：无窗口渲染 `demo.frame_count` 帧
/// 4. 原生后端：创建窗口与渲染器，进入事件循环
fn main() -> anyhow::Result<()> {
    let mut config = EngineConfig::from_file_or_default("config.toml");
    config.apply_args(std::env::args().skip(1));
    config.validate().context("invalid configuration")?;

    let log_file = config.logging.file_output.then_some(config.logging.log_file.as_str());
    if let Err(e) = log::init_logger(config.logging.level, config.logging.file_output, log_file) {
        eprintln!("Failed to initialize logger: {}", e);
    }
    info!(version = env!("CARGO_PKG_VERSION"), "DistRHI starting");
    info!(
        backend = config.graphics.backend.name(),
        width = config.window.width,
        height = config.window.height,
        frame_buffer_count = config.graphics.frame_buffer_count,
        "Graphics configuration"
    );

    match config.graphics.backend {
        GraphicsBackend::Software => run_headless(&config),
        _ => run_windowed(config),
    }
}

fn run_headless(config: &EngineConfig) -> anyhow::Result<()> {
    let mut renderer = Renderer::new(config, None).context("failed to initialize renderer")?;

    for _ in 0..config.demo.frame_count {
        let timing = renderer.draw_frame()?;
        println!(
            "frame {:>4}  back buffer {}  fence {:>5}  cpu {:>8.3} ms  gpu {:>8.3} ms",
            timing.frame_number,
            timing.back_buffer_index,
            timing.fence_value,
            timing.cpu_time.as_secs_f64() * 1000.0,
            timing.gpu_time.as_secs_f64() * 1000.0,
        );
    }

    let stats = renderer.frame_statistics();
    println!(
        "{} frames, average cpu {:.3} ms, average gpu {:.3} ms, {:.1} fps",
        stats.frame_count(),
        stats.average_cpu_time().as_secs_f64() * 1000.0,
        stats.average_gpu_time().as_secs_f64() * 1000.0,
        stats.fps(),
    );
    renderer.shut_down()?;
    Ok(())
}

/// # 事件处理
///
/// - `CloseRequested`：关闭渲染器并退出
/// - `Resized`：通知渲染器重建交换链
/// - `F11` / `H`：切换全屏 / HDR
/// - `RedrawRequested`：绘制下一帧
fn run_windowed(config: EngineConfig) -> anyhow::Result<()> {
    let event_loop = EventLoop::new()?;
    let window = WindowBuilder::new()
        .with_title(config.window.title.clone())
        .with_inner_size(PhysicalSize::new(config.window.width, config.window.height))
        .with_resizable(config.window.resizable)
        .build(&event_loop)?;

    let handle = WindowHandle::from_window(&window)?;
    let mut renderer = Renderer::new(&config, Some(handle)).context("failed to initialize renderer")?;
    let mut hdr = config.graphics.hdr;
    let mut full_screen = config.graphics.full_screen;
    info!(api = %renderer.api(), "Entering main loop");

    event_loop.set_control_flow(ControlFlow::Poll);
    event_loop.run(move |event, elwt| match event {
        Event::WindowEvent { event, .. } => match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down...");
                elwt.exit();
            }
            WindowEvent::Resized(size) => {
                debug!(width = size.width, height = size.height, "Window resized");
                if let Err(e) = renderer.resize(size.width, size.height) {
                    error!("Resize failed: {}", e);
                    elwt.exit();
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => {
                let result = match code {
                    KeyCode::F11 => {
                        full_screen = !full_screen;
                        renderer.switch_full_screen_mode(full_screen)
                    }
                    KeyCode::KeyH => {
                        hdr = !hdr;
                        renderer.switch_hdr_mode(hdr)
                    }
                    _ => Ok(()),
                };
                if let Err(e) = result {
                    error!("Display mode switch failed: {}", e);
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = renderer.draw_frame() {
                    error!("Draw failed: {}", e);
                    elwt.exit();
                }
            }
            _ => {}
        },
        Event::AboutToWait => window.request_redraw(),
        Event::LoopExiting => {
            if let Err(e) = renderer.shut_down() {
                error!("Renderer shutdown failed: {}", e);
            }
        }
        _ => {}
    })?;
    Ok(())
}
