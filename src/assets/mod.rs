//! 纹理缓存与材质
//!
//! - `resource_cache`：按路径去重的纹理视图缓存
//! - `material`：材质及其共享缓存的生命周期管理

pub mod material;
pub mod resource_cache;

pub use material::{Material, ResourceCacheProvider, SharedResourceCache};
pub use resource_cache::{cache_key, GpuResourceCache};
