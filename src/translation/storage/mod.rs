//! 存储模块
//!
//! 提供内容指纹、翻译缓存和持久化存储功能。

pub mod cache;
pub mod fingerprint;
pub mod store;

pub use cache::{CacheStats, TranslationCache};
pub use fingerprint::{Fingerprint, FingerprintScope};
pub use store::{CacheStore, MemoryStore, RedbStore, StoredEntry};
