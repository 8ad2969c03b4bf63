//! 翻译缓存模块
//!
//! 以内容指纹为键的翻译结果缓存：
//! - 超过 TTL 的条目视为不存在
//! - 超出容量时按插入顺序（FIFO）淘汰最早的条目
//! - 存储不可用时降级为未命中，不影响流水线

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::fingerprint::Fingerprint;
use super::store::{CacheStore, MemoryStore};
use crate::translation::config::CacheSettings;
use crate::translation::error::{helpers, TranslationResult};

// ============================================================================
// 核心类型
// ============================================================================

/// 缓存统计信息
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CacheStats {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub total_entries: usize,
    pub evictions: u64,
    pub expired: u64,
    pub errors: u64,
}

impl CacheStats {
    /// 计算缓存命中率
    pub fn hit_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.total_requests as f64
        }
    }
}

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// 翻译缓存
#[derive(Clone)]
pub struct TranslationCache {
    store: Arc<dyn CacheStore>,
    enabled: bool,
    ttl: Duration,
    max_entries: Option<usize>,
    stats: Arc<RwLock<CacheStats>>,
    // set 需要 读-写-淘汰 三步，整体串行化
    write_lock: Arc<Mutex<()>>,
    clock: Clock,
}

impl std::fmt::Debug for TranslationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslationCache")
            .field("store", &self.store.name())
            .field("enabled", &self.enabled)
            .field("ttl", &self.ttl)
            .field("max_entries", &self.max_entries)
            .finish()
    }
}

// ============================================================================
// 实现
// ============================================================================

impl TranslationCache {
    /// 使用内存存储创建缓存
    pub fn new(ttl: Duration, max_entries: Option<usize>) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), ttl, max_entries)
    }

    /// 使用指定存储创建缓存
    pub fn with_store(store: Arc<dyn CacheStore>, ttl: Duration, max_entries: Option<usize>) -> Self {
        Self {
            store,
            enabled: true,
            ttl,
            max_entries,
            stats: Arc::new(RwLock::new(CacheStats::default())),
            write_lock: Arc::new(Mutex::new(())),
            clock: Arc::new(Utc::now),
        }
    }

    /// 按配置创建缓存，`path` 存在时使用 redb 文件存储
    pub fn from_settings(settings: &CacheSettings) -> TranslationResult<Self> {
        let ttl = Duration::from_secs(settings.ttl_secs);
        let mut cache = match &settings.path {
            Some(path) => {
                let store = super::store::RedbStore::open(shellexpand::tilde(path).as_ref())?;
                Self::with_store(Arc::new(store), ttl, settings.max_entries)
            }
            None => Self::new(ttl, settings.max_entries),
        };
        cache.enabled = settings.enabled;
        Ok(cache)
    }

    /// 替换时间来源
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn is_expired(&self, created_at_ms: i64, now: DateTime<Utc>) -> bool {
        let age_ms = now.timestamp_millis().saturating_sub(created_at_ms);
        age_ms > self.ttl.as_millis() as i64
    }

    fn update_stats(&self, update: impl FnOnce(&mut CacheStats)) {
        let mut stats = match self.stats.write() {
            Ok(stats) => stats,
            Err(poisoned) => poisoned.into_inner(),
        };
        update(&mut stats);
    }

    /// 获取缓存条目，过期或存储不可用都返回 `None`
    pub fn get(&self, key: &Fingerprint) -> Option<String> {
        if !self.enabled {
            return None;
        }

        self.update_stats(|s| s.total_requests += 1);

        match self.store.get(key) {
            Ok(Some(entry)) if !self.is_expired(entry.created_at_ms, (self.clock)()) => {
                self.update_stats(|s| s.cache_hits += 1);
                metrics::counter!("page_translator_cache_hits_total").increment(1);
                tracing::debug!("缓存命中: {}", key);
                Some(entry.value)
            }
            Ok(Some(_)) => {
                // 过期条目直接删除
                if let Err(e) = self.store.remove(key) {
                    helpers::log_error(&e);
                }
                self.update_stats(|s| {
                    s.cache_misses += 1;
                    s.expired += 1;
                });
                metrics::counter!("page_translator_cache_misses_total").increment(1);
                None
            }
            Ok(None) => {
                self.update_stats(|s| s.cache_misses += 1);
                metrics::counter!("page_translator_cache_misses_total").increment(1);
                None
            }
            Err(e) => {
                tracing::warn!("缓存读取失败，按未命中处理: {}", e);
                self.update_stats(|s| {
                    s.cache_misses += 1;
                    s.errors += 1;
                });
                metrics::counter!("page_translator_cache_errors_total").increment(1);
                None
            }
        }
    }

    /// 写入缓存条目
    ///
    /// 相同的值重复写入不会改变条目；写入后超出容量时淘汰最早插入的条目。
    pub fn set(&self, key: &Fingerprint, value: &str) {
        if !self.enabled {
            return;
        }

        let _guard = match self.write_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let now = (self.clock)();

        match self.store.get(key) {
            Ok(Some(existing))
                if existing.value == value && !self.is_expired(existing.created_at_ms, now) =>
            {
                return;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("缓存写入前读取失败: {}", e);
            }
        }

        if let Err(e) = self.store.insert(key, value, now.timestamp_millis()) {
            tracing::warn!("缓存写入失败，忽略: {}", e);
            self.update_stats(|s| s.errors += 1);
            metrics::counter!("page_translator_cache_errors_total").increment(1);
            return;
        }

        self.enforce_limit();
    }

    fn enforce_limit(&self) {
        let Some(max_entries) = self.max_entries else {
            return;
        };

        loop {
            match self.store.len() {
                Ok(len) if len > max_entries => match self.store.pop_oldest() {
                    Ok(Some(evicted)) => {
                        tracing::debug!("淘汰缓存条目: {}", evicted);
                        self.update_stats(|s| s.evictions += 1);
                        metrics::counter!("page_translator_cache_evictions_total").increment(1);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!("缓存淘汰失败: {}", e);
                        break;
                    }
                },
                Ok(_) => break,
                Err(e) => {
                    tracing::warn!("读取缓存大小失败: {}", e);
                    break;
                }
            }
        }
    }

    /// 清空缓存
    pub fn clear(&self) {
        if let Err(e) = self.store.clear() {
            tracing::warn!("清空缓存失败: {}", e);
        }
    }

    /// 获取缓存大小
    pub fn size(&self) -> usize {
        self.store.len().unwrap_or(0)
    }

    /// 获取统计信息
    pub fn get_stats(&self) -> CacheStats {
        let mut result = match self.stats.read() {
            Ok(stats) => stats.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        result.total_entries = self.size();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    use chrono::TimeZone;

    use crate::translation::error::TranslationError;
    use crate::translation::storage::store::StoredEntry;

    fn fp(text: &str) -> Fingerprint {
        Fingerprint::compute(text, "en", "zh", "test")
    }

    fn manual_clock() -> (Arc<AtomicI64>, impl Fn() -> DateTime<Utc> + Send + Sync + 'static) {
        let now = Arc::new(AtomicI64::new(1_700_000_000_000));
        let handle = now.clone();
        let clock = move || {
            Utc.timestamp_millis_opt(handle.load(Ordering::SeqCst))
                .single()
                .unwrap_or_else(Utc::now)
        };
        (now, clock)
    }

    #[test]
    fn test_round_trip_within_ttl_then_expired() {
        let (now, clock) = manual_clock();
        let cache = TranslationCache::new(Duration::from_secs(60), None).with_clock(clock);

        cache.set(&fp("hello"), "你好");
        assert_eq!(cache.get(&fp("hello")).as_deref(), Some("你好"));

        now.fetch_add(61_000, Ordering::SeqCst);
        assert_eq!(cache.get(&fp("hello")), None);

        let stats = cache.get_stats();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.total_entries, 0);
    }

    #[test]
    fn test_fifo_eviction_when_full() {
        let cache = TranslationCache::new(Duration::from_secs(60), Some(2));
        cache.set(&fp("a"), "A");
        cache.set(&fp("b"), "B");
        // 读取不影响 FIFO 顺序
        assert!(cache.get(&fp("a")).is_some());
        cache.set(&fp("c"), "C");

        assert_eq!(cache.get(&fp("a")), None);
        assert_eq!(cache.get(&fp("b")).as_deref(), Some("B"));
        assert_eq!(cache.get(&fp("c")).as_deref(), Some("C"));
        assert_eq!(cache.get_stats().evictions, 1);
    }

    #[test]
    fn test_identical_set_keeps_original_position() {
        let cache = TranslationCache::new(Duration::from_secs(60), Some(2));
        cache.set(&fp("a"), "A");
        cache.set(&fp("b"), "B");
        cache.set(&fp("a"), "A");
        cache.set(&fp("c"), "C");

        // a 没有因为重复写入而移到末尾
        assert_eq!(cache.get(&fp("a")), None);
        assert!(cache.get(&fp("b")).is_some());
    }

    struct BrokenStore;

    impl CacheStore for BrokenStore {
        fn get(&self, _: &Fingerprint) -> TranslationResult<Option<StoredEntry>> {
            Err(TranslationError::CacheUnavailable("offline".into()))
        }
        fn insert(&self, _: &Fingerprint, _: &str, _: i64) -> TranslationResult<()> {
            Err(TranslationError::CacheUnavailable("offline".into()))
        }
        fn remove(&self, _: &Fingerprint) -> TranslationResult<bool> {
            Err(TranslationError::CacheUnavailable("offline".into()))
        }
        fn pop_oldest(&self) -> TranslationResult<Option<Fingerprint>> {
            Err(TranslationError::CacheUnavailable("offline".into()))
        }
        fn len(&self) -> TranslationResult<usize> {
            Err(TranslationError::CacheUnavailable("offline".into()))
        }
        fn clear(&self) -> TranslationResult<()> {
            Err(TranslationError::CacheUnavailable("offline".into()))
        }
        fn name(&self) -> &'static str {
            "broken"
        }
    }

    #[test]
    fn test_unavailable_store_degrades_to_miss() {
        let cache = TranslationCache::with_store(Arc::new(BrokenStore), Duration::from_secs(60), Some(10));
        cache.set(&fp("a"), "A");
        assert_eq!(cache.get(&fp("a")), None);
        assert_eq!(cache.get_stats().errors, 2);
    }

    #[test]
    fn test_disabled_cache_never_hits() {
        let settings = CacheSettings {
            enabled: false,
            ..CacheSettings::default()
        };
        let cache = TranslationCache::from_settings(&settings).unwrap();
        cache.set(&fp("a"), "A");
        assert_eq!(cache.get(&fp("a")), None);
    }
}
