//! Two-tier cache for the ExamForge data layer.
//!
//! Values live in a byte-budgeted in-process memory tier backed by an
//! optional edge key-value tier. Keys are structured as
//! `{entityType}:{entityId}:{variant}` and indexed by every entity they
//! depend on, so invalidating an exam or a user never scans the whole cache.
//!
//! ```no_run
//! use examforge_cache::{CacheConfig, CacheKey, CacheManager, CacheOptions, EntityRef};
//!
//! # async fn demo() -> examforge_cache::Result<()> {
//! let cache = CacheManager::builder(CacheConfig::default()).build()?;
//! let key = CacheKey::new(EntityRef::new("exam", "aws-saa"), "summary");
//! cache.set(&key, &"cached".to_string(), CacheOptions::default()).await;
//! let value: Option<String> = cache.get(&key).await;
//! # Ok(())
//! # }
//! ```

pub mod cloudflare;
pub mod codec;
pub mod config;
pub mod error;
pub mod key;
pub mod kv;
pub mod manager;
mod memory;
pub mod stats;

pub use cloudflare::{CloudflareKvConfig, CloudflareKvStore};
pub use config::{CacheConfig, CacheConfigBuilder, CacheOptions};
pub use error::{CacheError, Result};
pub use key::{CacheKey, EntityRef};
pub use kv::{EdgeKvStore, InMemoryKvStore};
pub use manager::{CacheManager, CacheManagerBuilder, Generation};
pub use stats::CacheStats;
