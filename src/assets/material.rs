//! 材质与共享纹理缓存
//!
//! 所有存活的材质共享一个 [`GpuResourceCache`]：第一个材质创建时建立缓存，
//! 最后一个材质释放时缓存随之销毁。共享关系通过显式传入的
//! [`ResourceCacheProvider`] 建立，提供者只持有弱引用。

use std::cell::{Cell, RefCell, RefMut};
use std::path::Path;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use tracing::debug;

use crate::core::error::Result;
use crate::engine::ResourceContext;
use crate::rhi::RhiBackend;

use super::resource_cache::GpuResourceCache;

/// 由材质共同持有的缓存
pub struct SharedResourceCache<B: RhiBackend> {
    cache: RefCell<GpuResourceCache<B>>,
    destroyed: Rc<Cell<usize>>,
}

impl<B: RhiBackend> SharedResourceCache<B> {
    pub fn cache_mut(&self) -> RefMut<'_, GpuResourceCache<B>> {
        self.cache.borrow_mut()
    }

    pub fn len(&self) -> usize {
        self.cache.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.borrow().is_empty()
    }
}

impl<B: RhiBackend> Drop for SharedResourceCache<B> {
    fn drop(&mut self) {
        self.destroyed.set(self.destroyed.get() + 1);
        debug!(textures = self.cache.get_mut().len(), "Shared texture cache released");
    }
}

/// 共享缓存的提供者
pub struct ResourceCacheProvider<B: RhiBackend> {
    current: RefCell<Weak<SharedResourceCache<B>>>,
    created: Cell<usize>,
    destroyed: Rc<Cell<usize>>,
}

impl<B: RhiBackend> Default for ResourceCacheProvider<B> {
    fn default() -> Self {
        Self {
            current: RefCell::new(Weak::new()),
            created: Cell::new(0),
            destroyed: Rc::new(Cell::new(0)),
        }
    }
}

impl<B: RhiBackend> ResourceCacheProvider<B> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 返回当前的共享缓存，不存在时新建
    pub fn acquire(&self) -> Rc<SharedResourceCache<B>> {
        if let Some(cache) = self.current.borrow().upgrade() {
            return cache;
        }
        let cache = Rc::new(SharedResourceCache {
            cache: RefCell::new(GpuResourceCache::new()),
            destroyed: Rc::clone(&self.destroyed),
        });
        *self.current.borrow_mut() = Rc::downgrade(&cache);
        self.created.set(self.created.get() + 1);
        debug!("Shared texture cache created");
        cache
    }

    /// 是否有存活的共享缓存
    pub fn is_alive(&self) -> bool {
        self.current.borrow().strong_count() > 0
    }

    /// 共享缓存被创建的次数
    pub fn created_count(&self) -> usize {
        self.created.get()
    }

    /// 共享缓存被销毁的次数
    pub fn destroyed_count(&self) -> usize {
        self.destroyed.get()
    }
}

/// 材质：一组纹理视图加上对共享缓存的引用
pub struct Material<B: RhiBackend> {
    name: String,
    cache: Rc<SharedResourceCache<B>>,
    textures: Vec<Arc<B::ResourceView>>,
}

impl<B: RhiBackend> Material<B> {
    pub fn new(provider: &ResourceCacheProvider<B>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cache: provider.acquire(),
            textures: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 通过共享缓存加载纹理并绑定到材质
    pub fn load_texture(
        &mut self,
        ctx: &mut ResourceContext<'_, B>,
        path: impl AsRef<Path>,
    ) -> Result<Arc<B::ResourceView>> {
        let view = self.cache.cache_mut().load(ctx, path)?;
        self.textures.push(Arc::clone(&view));
        Ok(view)
    }

    pub fn textures(&self) -> &[Arc<B::ResourceView>] {
        &self.textures
    }

    pub fn cache(&self) -> &Rc<SharedResourceCache<B>> {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::software::SoftwareBackend;

    #[test]
    fn test_cache_lives_as_long_as_materials() {
        let provider = ResourceCacheProvider::<SoftwareBackend>::new();
        assert!(!provider.is_alive());

        let a = Material::new(&provider, "a");
        let b = Material::new(&provider, "b");
        let c = Material::new(&provider, "c");
        assert_eq!(provider.created_count(), 1);
        assert!(Rc::ptr_eq(a.cache(), c.cache()));

        drop(a);
        drop(b);
        assert_eq!(provider.destroyed_count(), 0);
        assert!(provider.is_alive());

        drop(c);
        assert_eq!(provider.destroyed_count(), 1);
        assert!(!provider.is_alive());
    }

    #[test]
    fn test_cache_is_recreated_after_release() {
        let provider = ResourceCacheProvider::<SoftwareBackend>::new();
        drop(Material::new(&provider, "first"));
        let second = Material::new(&provider, "second");
        assert_eq!(provider.created_count(), 2);
        assert_eq!(provider.destroyed_count(), 1);
        assert!(second.cache().is_empty());
    }
}
