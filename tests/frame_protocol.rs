//! 帧协议集成测试
//!
//! 在软件后端上驱动完整的 LowLevelGraphicsEngine，检查 fence、后备缓冲轮转、
//! 跨队列顺序、重建与资源缓存的行为。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use dist_rhi::assets::{GpuResourceCache, Material, ResourceCacheProvider};
use dist_rhi::core::EngineConfig;
use dist_rhi::engine::LowLevelGraphicsEngine;
use dist_rhi::gfx::software::SoftwareBackend;
use dist_rhi::rhi::{
    BufferDesc, CommandListType, DescriptorHeapType, DescriptorLimits, Format, GpuResource, HeapResetMode,
    ResourceState, ResourceUsage, ResourceViewDesc, RhiBuffer, RhiCommandList, RhiCommandQueue,
    RhiDescriptorHeap, RhiDevice, RhiFence, RhiFrameBuffer, RhiResourceView, RhiSwapchain, RhiTexture,
    TextureDesc, TransitionBarrier, ViewResource,
};

type Engine = LowLevelGraphicsEngine<SoftwareBackend>;

fn config(frame_buffer_count: u32) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.window.width = 16;
    config.window.height = 16;
    config.graphics.frame_buffer_count = frame_buffer_count;
    config
}

fn draw(engine: &mut Engine) -> dist_rhi::engine::FrameTiming {
    engine.begin_draw_frame().unwrap();
    engine.begin_swapchain_render_pass().unwrap();
    engine.end_draw_frame().unwrap()
}

fn write_png(dir: &Path, name: &str, color: [u8; 4]) -> PathBuf {
    let path = dir.join(name);
    image::RgbaImage::from_pixel(4, 4, image::Rgba(color)).save(&path).unwrap();
    path
}

#[test]
fn fence_values_increase_monotonically() {
    let mut engine = Engine::start_up(&config(3), None).unwrap();
    let mut last = engine.fence_value();
    let mut last_completed = engine.fence().unwrap().completed_value();

    for _ in 0..10 {
        let timing = draw(&mut engine);
        assert!(timing.fence_value > last);
        assert!(engine.fence_value() > timing.fence_value);
        last = engine.fence_value();

        let completed = engine.fence().unwrap().completed_value();
        assert!(completed >= last_completed);
        assert!(completed >= timing.fence_value);
        last_completed = completed;
    }

    // 小于当前值的 CPU signal 被忽略
    let fence = engine.fence().unwrap();
    let before = fence.completed_value();
    fence.signal(1).unwrap();
    assert_eq!(fence.completed_value(), before);
}

#[test]
fn back_buffer_index_cycles_with_frame_buffer_count() {
    for count in [2u32, 3, 4] {
        let mut engine = Engine::start_up(&config(count), None).unwrap();
        let indices: Vec<u32> = (0..count * 3).map(|_| draw(&mut engine).back_buffer_index).collect();
        let expected: Vec<u32> = (0..count * 3).map(|i| i % count).collect();
        assert_eq!(indices, expected, "frame_buffer_count = {}", count);
    }
}

#[test]
fn descriptor_allocation_is_bounded() {
    let engine = Engine::start_up(&config(2), None).unwrap();
    let device = engine.device().unwrap();
    let mut heap = device
        .create_descriptor_heap(&DescriptorLimits {
            srv: 3,
            ..DescriptorLimits::default()
        })
        .unwrap();
    let texture = device
        .create_texture(&TextureDesc::new_2d(4, 4, Format::Rgba8Unorm, ResourceUsage::SHADER_RESOURCE))
        .unwrap();

    let views: Vec<_> = (0..3)
        .map(|_| {
            device
                .create_resource_view(&mut heap, ViewResource::Texture(&texture), &ResourceViewDesc::shader_resource())
                .unwrap()
        })
        .collect();
    let err = device
        .create_resource_view(&mut heap, ViewResource::Texture(&texture), &ResourceViewDesc::shader_resource())
        .err()
        .unwrap();
    assert!(err.is_descriptor_exhausted());

    let mut indices: Vec<u32> = views.iter().map(|v| v.descriptor_id().index).collect();
    indices.dedup();
    assert_eq!(indices.len(), 3);
    assert!(views.iter().all(|v| heap.is_valid(v.descriptor_id())));
    assert_eq!(heap.stats(DescriptorHeapType::Srv).available, 0);
}

#[test]
fn compute_results_are_visible_to_graphics_after_wait() {
    let mut config = config(2);
    config.software.submit_latency_us = 2_000;
    let mut engine = Engine::start_up(&config, None).unwrap();

    let (buffer, readback) = {
        let device = engine.device().unwrap();
        let buffer = device
            .create_buffer(
                &BufferDesc::device_local(16, ResourceUsage::COPY_DST | ResourceUsage::COPY_SRC)
                    .with_initial_state(ResourceState::CopyDest)
                    .with_name("ComputeOutput"),
            )
            .unwrap();
        let readback = device.create_buffer(&BufferDesc::readback(16)).unwrap();
        (buffer, readback)
    };

    engine.begin_draw_frame().unwrap();
    engine
        .command_list_mut(CommandListType::Compute)
        .unwrap()
        .update_buffer(&buffer, 0, &[7, 11, 13, 17]);
    let compute_done = engine.flush_gpu_commands(CommandListType::Compute, true).unwrap();

    engine
        .command_queue(CommandListType::Graphics)
        .unwrap()
        .wait(engine.fence().unwrap(), compute_done)
        .unwrap();
    {
        let list = engine.command_list_mut(CommandListType::Graphics).unwrap();
        list.resource_barrier(&[TransitionBarrier::buffer(&buffer, ResourceState::CopySource)]);
        list.copy_buffer_region(&readback, 0, &buffer, 0, 16);
    }
    let timing = engine.end_draw_frame().unwrap();
    assert!(timing.fence_value > compute_done);

    let mut bytes = [0u8; 16];
    readback.read(0, &mut bytes).unwrap();
    let values: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    assert_eq!(values, vec![7, 11, 13, 17]);
    assert_eq!(buffer.usage_state(), ResourceState::CopySource);
}

#[test]
fn resize_between_frames_rebuilds_targets() {
    let mut engine = Engine::start_up(&config(3), None).unwrap();
    draw(&mut engine);
    draw(&mut engine);

    engine.on_resize(40, 24).unwrap();
    assert_eq!(engine.current_frame_index(), 0);
    let swapchain = engine.swapchain().unwrap();
    assert_eq!((swapchain.desc().width, swapchain.desc().height), (40, 24));
    assert_eq!(swapchain.back_buffer(2).width(), 40);
    assert!(engine
        .frame_buffers()
        .iter()
        .all(|fb| fb.width() == 40 && fb.height() == 24));

    // 尺寸未变时不重建
    let base = engine.frame_base_value();
    engine.on_resize(40, 24).unwrap();
    assert_eq!(engine.frame_base_value(), base);

    let indices: Vec<u32> = (0..4).map(|_| draw(&mut engine).back_buffer_index).collect();
    assert_eq!(indices, vec![0, 1, 2, 0]);
}

#[test]
fn descriptor_heap_reset_and_resize_all() {
    let engine = Engine::start_up(&config(2), None).unwrap();
    let mut heap = engine
        .device()
        .unwrap()
        .create_descriptor_heap(&DescriptorLimits {
            cbv: 2,
            srv: 2,
            ..DescriptorLimits::default()
        })
        .unwrap();

    // OffsetOnly 只回卷游标
    let a = heap.allocate(DescriptorHeapType::Srv).unwrap();
    let cbv = heap.allocate(DescriptorHeapType::Cbv).unwrap();
    heap.reset(HeapResetMode::OffsetOnly).unwrap();
    assert!(!heap.is_valid(a));
    assert!(!heap.is_valid(cbv));
    let b = heap.allocate(DescriptorHeapType::Srv).unwrap();
    assert_eq!(b.index, 0);
    assert!(heap.is_valid(b));
    assert_eq!(heap.stats(DescriptorHeapType::Srv).used, 1);
    assert_eq!(heap.stats(DescriptorHeapType::Srv).capacity, 2);

    let rtv_capacity = heap.stats(DescriptorHeapType::Rtv).capacity;
    let sizes = HashMap::from([(DescriptorHeapType::Cbv, 5), (DescriptorHeapType::Srv, 4)]);
    heap.resize_all(&sizes).unwrap();
    assert_eq!(heap.stats(DescriptorHeapType::Cbv).capacity, 5);
    assert_eq!(heap.stats(DescriptorHeapType::Srv).capacity, 4);
    assert_eq!(heap.stats(DescriptorHeapType::Rtv).capacity, rtv_capacity);
    assert!(!heap.is_valid(b));

    let ids: Vec<_> = (0..5).map(|_| heap.allocate(DescriptorHeapType::Cbv).unwrap()).collect();
    assert_eq!(ids.last().map(|id| id.index), Some(4));
    assert!(heap.allocate(DescriptorHeapType::Cbv).unwrap_err().is_descriptor_exhausted());
}

#[test]
fn flush_without_reopening_then_end_frame() {
    let mut engine = Engine::start_up(&config(3), None).unwrap();
    let mut indices = Vec::new();
    for _ in 0..4 {
        engine.begin_draw_frame().unwrap();
        engine.begin_swapchain_render_pass().unwrap();
        let flushed = engine.flush_gpu_commands(CommandListType::Graphics, false).unwrap();
        assert!(!engine.command_list(CommandListType::Graphics).unwrap().is_recording());
        assert!(engine.begin_swapchain_render_pass().is_err());

        let timing = engine.end_draw_frame().unwrap();
        assert!(timing.fence_value > flushed);
        assert!(engine.fence().unwrap().completed_value() >= timing.fence_value);
        indices.push(timing.back_buffer_index);
    }
    assert_eq!(indices, vec![0, 1, 2, 0]);
}

#[test]
fn full_screen_switch_keeps_frames_running() {
    let mut engine = Engine::start_up(&config(3), None).unwrap();
    draw(&mut engine);

    let index = engine.current_frame_index();
    engine.switch_full_screen_mode(true).unwrap();
    assert!(engine.swapchain().unwrap().desc().full_screen);
    assert_eq!(engine.current_frame_index(), index);

    // 状态未变时不做任何事
    let value = engine.fence_value();
    engine.switch_full_screen_mode(true).unwrap();
    assert_eq!(engine.fence_value(), value);

    let indices: Vec<u32> = (0..3).map(|_| draw(&mut engine).back_buffer_index).collect();
    assert_eq!(indices, vec![1, 2, 0]);

    engine.switch_full_screen_mode(false).unwrap();
    assert!(!engine.swapchain().unwrap().desc().full_screen);
    draw(&mut engine);
}

#[test]
fn out_of_date_swapchain_rebuilds_frame_buffers() {
    let mut engine = Engine::start_up(&config(3), None).unwrap();
    draw(&mut engine);

    // 窗口先于 Resized 事件改变尺寸，帧末获取时发现交换链过期
    engine.swapchain_mut().unwrap().resize_surface(32, 8);
    draw(&mut engine);

    let swapchain = engine.swapchain().unwrap();
    assert_eq!((swapchain.desc().width, swapchain.desc().height), (32, 8));
    assert_eq!(swapchain.back_buffer(0).width(), 32);
    assert!(engine
        .frame_buffers()
        .iter()
        .all(|fb| fb.width() == 32 && fb.height() == 8));
    assert_eq!(engine.frame_buffers().len() as u32, swapchain.image_count());
    assert_eq!(engine.current_frame_index(), 0);

    // 随后的 Resized 事件不再重建
    let base = engine.frame_base_value();
    engine.on_resize(32, 8).unwrap();
    assert_eq!(engine.frame_base_value(), base);

    for _ in 0..3 {
        let timing = draw(&mut engine);
        assert_eq!(engine.frame_buffers()[timing.back_buffer_index as usize].width(), 32);
    }
}

#[test]
fn texture_cache_loads_each_path_once() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_png(dir.path(), "a.png", [0, 255, 0, 255]);
    let b = write_png(dir.path(), "b.png", [0, 0, 255, 255]);

    let mut engine = Engine::start_up(&config(2), None).unwrap();
    let mut cache = GpuResourceCache::<SoftwareBackend>::new();

    engine.begin_draw_frame().unwrap();
    let (first, second, other) = {
        let mut ctx = engine.resource_context().unwrap();
        let first = cache.load(&mut ctx, &a).unwrap();
        let second = cache.load(&mut ctx, &a).unwrap();
        let other = cache.load(&mut ctx, &b).unwrap();
        (first, second, other)
    };
    engine.end_draw_frame().unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert!(!Arc::ptr_eq(&first, &other));
    assert_eq!(cache.load_count(), 2);
    assert_eq!(cache.len(), 2);
}

#[test]
fn shared_cache_follows_material_lifetimes() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_png(dir.path(), "albedo.png", [9, 9, 9, 255]);

    let mut engine = Engine::start_up(&config(2), None).unwrap();
    let provider = ResourceCacheProvider::<SoftwareBackend>::new();
    let mut materials: Vec<_> = ["m0", "m1", "m2"]
        .into_iter()
        .map(|name| Material::new(&provider, name))
        .collect();

    engine.begin_draw_frame().unwrap();
    {
        let mut ctx = engine.resource_context().unwrap();
        for material in &mut materials {
            material.load_texture(&mut ctx, &path).unwrap();
        }
    }
    engine.end_draw_frame().unwrap();

    let cache = Rc::clone(materials[0].cache());
    assert_eq!(cache.cache_mut().load_count(), 1);
    drop(cache);

    materials.truncate(1);
    assert!(provider.is_alive());
    materials.clear();
    assert!(!provider.is_alive());
    assert_eq!(provider.created_count(), 1);
    assert_eq!(provider.destroyed_count(), 1);
}

#[test]
fn shut_down_twice_then_drop() {
    let mut engine = Engine::start_up(&config(2), None).unwrap();
    draw(&mut engine);
    engine.begin_draw_frame().unwrap();

    engine.shut_down().unwrap();
    engine.shut_down().unwrap();
    assert!(!engine.is_running());
    assert!(!engine.is_in_frame());
    assert!(engine.device().is_none());
    drop(engine);
}
