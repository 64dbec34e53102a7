//! GPU 资源缓存
//!
//! 按路径去重的纹理视图缓存。同一路径在一个缓存实例中只解码和上传一次，
//! 之后的 `load` 返回同一个 `Arc`。单线程使用，不加锁。

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::core::error::{AssetError, Result};
use crate::engine::ResourceContext;
use crate::rhi::{
    BufferDesc, Format, ResourceState, ResourceUsage, ResourceViewDesc, RhiBackend, RhiBuffer,
    RhiCommandList, RhiDevice, TextureCopyLocation, TextureDesc, TextureFootprint,
    TransitionBarrier, ViewResource,
};

/// 缓存键：`路径 + "_SRV"` 的 64 位哈希
pub fn cache_key(path: &Path) -> u64 {
    let mut hasher = DefaultHasher::new();
    format!("{}_SRV", path.display()).hash(&mut hasher);
    hasher.finish()
}

/// 纹理视图缓存
pub struct GpuResourceCache<B: RhiBackend> {
    views: HashMap<u64, Arc<B::ResourceView>>,
    load_count: usize,
}

impl<B: RhiBackend> Default for GpuResourceCache<B> {
    fn default() -> Self {
        Self {
            views: HashMap::new(),
            load_count: 0,
        }
    }
}

impl<B: RhiBackend> GpuResourceCache<B> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 加载纹理并返回其 SRV
    ///
    /// 未命中时解码为 RGBA8，经暂存缓冲录制到 `ctx` 的命令列表中上传，
    /// 纹理最终处于 `ShaderResource`。上传在本帧提交后才真正执行。
    pub fn load(&mut self, ctx: &mut ResourceContext<'_, B>, path: impl AsRef<Path>) -> Result<Arc<B::ResourceView>> {
        let path = path.as_ref();
        let key = cache_key(path);
        if let Some(view) = self.views.get(&key) {
            debug!(path = %path.display(), "Texture cache hit");
            return Ok(Arc::clone(view));
        }

        if !path.exists() {
            return Err(AssetError::FileNotFound(path.to_path_buf()).into());
        }
        let image = image::open(path)
            .map_err(|e| AssetError::DecodeError {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?
            .to_rgba8();
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(AssetError::InvalidDimensions {
                path: path.to_path_buf(),
                width,
                height,
            }
            .into());
        }

        let name = path.display().to_string();
        let texture = ctx.device.create_texture(
            &TextureDesc::new_2d(
                width,
                height,
                Format::Rgba8Unorm,
                ResourceUsage::SHADER_RESOURCE | ResourceUsage::COPY_DST,
            )
            .with_initial_state(ResourceState::CopyDest)
            .with_name(name.clone()),
        )?;

        // 视图先于上传命令创建：录制之后不再有可失败的步骤
        let view = ctx.device.create_resource_view(
            ctx.heap,
            ViewResource::Texture(&texture),
            &ResourceViewDesc::shader_resource(),
        )?;

        // 行间距按 256 字节对齐
        let footprint = TextureFootprint::aligned(0, Format::Rgba8Unorm, width, height);
        let mut staging_data = vec![0u8; footprint.total_size() as usize];
        let row_bytes = footprint.row_bytes() as usize;
        for (y, row) in image.as_raw().chunks_exact(row_bytes).enumerate() {
            let offset = y * footprint.row_pitch as usize;
            staging_data[offset..offset + row_bytes].copy_from_slice(row);
        }
        let staging = ctx
            .device
            .create_buffer(&BufferDesc::upload(staging_data.len() as u64).with_name(format!("{} (staging)", name)))?;
        staging.write(0, &staging_data)?;

        ctx.command_list.copy_texture_region(
            &TextureCopyLocation::texture(&texture),
            &TextureCopyLocation::Footprint {
                buffer: &staging,
                footprint,
            },
        );
        ctx.command_list
            .resource_barrier(&[TransitionBarrier::texture(&texture, ResourceState::ShaderResource)]);
        ctx.retire_staging(staging);

        self.views.insert(key, Arc::clone(&view));
        self.load_count += 1;
        info!(path = %path.display(), width, height, "Texture loaded");
        Ok(view)
    }

    /// 实际解码上传的次数
    pub fn load_count(&self) -> usize {
        self.load_count
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.views.contains_key(&cache_key(path.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EngineConfig;
    use crate::engine::LowLevelGraphicsEngine;
    use crate::gfx::software::SoftwareBackend;
    use crate::rhi::{GpuResource, RhiResourceView};

    fn write_png(dir: &Path, name: &str, color: [u8; 4]) -> std::path::PathBuf {
        let path = dir.join(name);
        image::RgbaImage::from_pixel(3, 2, image::Rgba(color)).save(&path).unwrap();
        path
    }

    #[test]
    fn test_cache_key_depends_on_path() {
        assert_eq!(cache_key(Path::new("a.png")), cache_key(Path::new("a.png")));
        assert_ne!(cache_key(Path::new("a.png")), cache_key(Path::new("b.png")));
    }

    #[test]
    fn test_load_uploads_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "red.png", [255, 0, 0, 255]);

        let mut config = EngineConfig::default();
        config.window.width = 8;
        config.window.height = 8;
        let mut engine = LowLevelGraphicsEngine::<SoftwareBackend>::start_up(&config, None).unwrap();
        let mut cache = GpuResourceCache::<SoftwareBackend>::new();

        engine.begin_draw_frame().unwrap();
        let view = {
            let mut ctx = engine.resource_context().unwrap();
            let view = cache.load(&mut ctx, &path).unwrap();
            assert_eq!(ctx.pending_staging(), 1);
            view
        };
        engine.end_draw_frame().unwrap();

        let texture = view.texture().unwrap();
        assert_eq!(texture.usage_state(), ResourceState::ShaderResource);
        assert_eq!(texture.read_pixel(2, 1), vec![255, 0, 0, 255]);
        assert!(cache.contains(&path));
        assert_eq!(cache.load_count(), 1);
    }

    #[test]
    fn test_missing_file_is_an_asset_error() {
        let mut engine = LowLevelGraphicsEngine::<SoftwareBackend>::start_up(&EngineConfig::default(), None).unwrap();
        let mut cache = GpuResourceCache::<SoftwareBackend>::new();
        engine.begin_draw_frame().unwrap();
        let mut ctx = engine.resource_context().unwrap();
        let err = cache.load(&mut ctx, "does/not/exist.png").unwrap_err();
        assert!(matches!(err, crate::core::DistRhiError::Asset(AssetError::FileNotFound(_))));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_exhausted_heap_records_no_upload() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_png(dir.path(), "a.png", [0, 255, 0, 255]);
        let b = write_png(dir.path(), "b.png", [0, 0, 255, 255]);

        let mut config = EngineConfig::default();
        config.descriptors.srv = 1;
        let mut engine = LowLevelGraphicsEngine::<SoftwareBackend>::start_up(&config, None).unwrap();
        let mut cache = GpuResourceCache::<SoftwareBackend>::new();

        engine.begin_draw_frame().unwrap();
        {
            let mut ctx = engine.resource_context().unwrap();
            cache.load(&mut ctx, &a).unwrap();
            let recorded = ctx.command_list.command_count();
            assert_eq!(ctx.pending_staging(), 1);

            let err = cache.load(&mut ctx, &b).unwrap_err();
            assert!(matches!(
                err,
                crate::core::DistRhiError::Graphics(crate::core::GraphicsError::DescriptorHeapExhausted { .. })
            ));
            assert_eq!(ctx.command_list.command_count(), recorded);
            assert_eq!(ctx.pending_staging(), 1);
        }
        engine.end_draw_frame().unwrap();
        assert_eq!(cache.len(), 1);
        assert!(!cache.contains(&b));
    }
}
