//! 持久化缓存存储
//!
//! `CacheStore` 是缓存的底层键值接口。每条记录带创建时间与插入序号，
//! 序号决定 FIFO 淘汰顺序；是否过期由上层 `TranslationCache` 判断。
//!
//! - `MemoryStore`: 进程内存储（默认）
//! - `RedbStore`: 基于 redb 的文件存储，重启后仍然有效

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};

use super::fingerprint::Fingerprint;
use crate::translation::error::{TranslationError, TranslationResult};

// ============================================================================
// 存储接口
// ============================================================================

/// 存储中的一条记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub value: String,
    /// 创建时间（Unix 毫秒）
    pub created_at_ms: i64,
    /// 插入序号，越小越早
    pub seq: u64,
}

/// 缓存键值存储
///
/// 所有方法都可能因为存储不可用而失败，调用方应把失败当作未命中处理。
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &Fingerprint) -> TranslationResult<Option<StoredEntry>>;

    /// 写入或覆盖，覆盖时记录移到插入顺序末尾
    fn insert(&self, key: &Fingerprint, value: &str, created_at_ms: i64) -> TranslationResult<()>;

    fn remove(&self, key: &Fingerprint) -> TranslationResult<bool>;

    /// 移除插入最早的记录
    fn pop_oldest(&self) -> TranslationResult<Option<Fingerprint>>;

    fn len(&self) -> TranslationResult<usize>;

    fn clear(&self) -> TranslationResult<()>;

    /// 存储名称，用于日志
    fn name(&self) -> &'static str;
}

// ============================================================================
// 内存存储
// ============================================================================

#[derive(Debug, Default)]
struct MemoryInner {
    entries: HashMap<Fingerprint, StoredEntry>,
    order: BTreeMap<u64, Fingerprint>,
    next_seq: u64,
}

/// 进程内存储
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> TranslationResult<MutexGuard<'_, MemoryInner>> {
        self.inner
            .lock()
            .map_err(|_| TranslationError::CacheUnavailable("内存缓存锁已中毒".to_string()))
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &Fingerprint) -> TranslationResult<Option<StoredEntry>> {
        Ok(self.lock()?.entries.get(key).cloned())
    }

    fn insert(&self, key: &Fingerprint, value: &str, created_at_ms: i64) -> TranslationResult<()> {
        let mut inner = self.lock()?;
        let seq = inner.next_seq;
        inner.next_seq += 1;

        let entry = StoredEntry {
            value: value.to_string(),
            created_at_ms,
            seq,
        };
        if let Some(old) = inner.entries.insert(*key, entry) {
            inner.order.remove(&old.seq);
        }
        inner.order.insert(seq, *key);
        Ok(())
    }

    fn remove(&self, key: &Fingerprint) -> TranslationResult<bool> {
        let mut inner = self.lock()?;
        match inner.entries.remove(key) {
            Some(old) => {
                inner.order.remove(&old.seq);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn pop_oldest(&self) -> TranslationResult<Option<Fingerprint>> {
        let mut inner = self.lock()?;
        let Some((_, key)) = inner.order.pop_first() else {
            return Ok(None);
        };
        inner.entries.remove(&key);
        Ok(Some(key))
    }

    fn len(&self) -> TranslationResult<usize> {
        Ok(self.lock()?.entries.len())
    }

    fn clear(&self) -> TranslationResult<()> {
        let mut inner = self.lock()?;
        inner.entries.clear();
        inner.order.clear();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

// ============================================================================
// redb 存储
// ============================================================================

/// 指纹（十六进制）→ JSON 编码的 `StoredEntry`
const ENTRIES: TableDefinition<&str, &[u8]> = TableDefinition::new("translation_entries");
/// 插入序号 → 指纹（十六进制）
const ORDER: TableDefinition<u64, &str> = TableDefinition::new("translation_order");

fn storage_error<E: Into<redb::Error>>(error: E) -> TranslationError {
    TranslationError::from(error.into())
}

/// 基于 redb 的文件存储
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// 打开或创建数据库文件
    pub fn open<P: AsRef<Path>>(path: P) -> TranslationResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Database::create(path).map_err(storage_error)?;

        // 先建表，读事务才能打开
        let txn = db.begin_write().map_err(storage_error)?;
        {
            txn.open_table(ENTRIES).map_err(storage_error)?;
            txn.open_table(ORDER).map_err(storage_error)?;
        }
        txn.commit().map_err(storage_error)?;

        tracing::info!("打开持久化缓存: {}", path.display());
        Ok(Self { db })
    }

    fn decode(bytes: &[u8]) -> TranslationResult<StoredEntry> {
        serde_json::from_slice(bytes)
            .map_err(|e| TranslationError::CacheUnavailable(format!("缓存记录损坏: {}", e)))
    }
}

impl CacheStore for RedbStore {
    fn get(&self, key: &Fingerprint) -> TranslationResult<Option<StoredEntry>> {
        let txn = self.db.begin_read().map_err(storage_error)?;
        let table = txn.open_table(ENTRIES).map_err(storage_error)?;
        let hex = key.to_hex();

        match table.get(hex.as_str()).map_err(storage_error)? {
            Some(guard) => Ok(Some(Self::decode(guard.value())?)),
            None => Ok(None),
        }
    }

    fn insert(&self, key: &Fingerprint, value: &str, created_at_ms: i64) -> TranslationResult<()> {
        let hex = key.to_hex();
        let txn = self.db.begin_write().map_err(storage_error)?;
        {
            let mut entries = txn.open_table(ENTRIES).map_err(storage_error)?;
            let mut order = txn.open_table(ORDER).map_err(storage_error)?;

            let old_seq = match entries.get(hex.as_str()).map_err(storage_error)? {
                Some(guard) => Some(Self::decode(guard.value())?.seq),
                None => None,
            };
            if let Some(seq) = old_seq {
                order.remove(seq).map_err(storage_error)?;
            }

            let seq = match order.last().map_err(storage_error)? {
                Some((last, _)) => last.value() + 1,
                None => 0,
            };

            let record = serde_json::to_vec(&StoredEntry {
                value: value.to_string(),
                created_at_ms,
                seq,
            })?;
            entries
                .insert(hex.as_str(), record.as_slice())
                .map_err(storage_error)?;
            order.insert(seq, hex.as_str()).map_err(storage_error)?;
        }
        txn.commit().map_err(storage_error)?;
        Ok(())
    }

    fn remove(&self, key: &Fingerprint) -> TranslationResult<bool> {
        let hex = key.to_hex();
        let txn = self.db.begin_write().map_err(storage_error)?;
        let removed = {
            let mut entries = txn.open_table(ENTRIES).map_err(storage_error)?;
            let mut order = txn.open_table(ORDER).map_err(storage_error)?;

            let old_seq = match entries.remove(hex.as_str()).map_err(storage_error)? {
                Some(guard) => Some(Self::decode(guard.value())?.seq),
                None => None,
            };
            match old_seq {
                Some(seq) => {
                    order.remove(seq).map_err(storage_error)?;
                    true
                }
                None => false,
            }
        };
        txn.commit().map_err(storage_error)?;
        Ok(removed)
    }

    fn pop_oldest(&self) -> TranslationResult<Option<Fingerprint>> {
        let txn = self.db.begin_write().map_err(storage_error)?;
        let popped = {
            let mut entries = txn.open_table(ENTRIES).map_err(storage_error)?;
            let mut order = txn.open_table(ORDER).map_err(storage_error)?;

            let oldest = order
                .pop_first()
                .map_err(storage_error)?
                .map(|(_, hex)| hex.value().to_string());

            if let Some(hex) = &oldest {
                entries.remove(hex.as_str()).map_err(storage_error)?;
            }
            oldest
        };
        txn.commit().map_err(storage_error)?;
        Ok(popped.and_then(|hex| Fingerprint::from_hex(&hex)))
    }

    fn len(&self) -> TranslationResult<usize> {
        let txn = self.db.begin_read().map_err(storage_error)?;
        let table = txn.open_table(ENTRIES).map_err(storage_error)?;
        Ok(table.len().map_err(storage_error)? as usize)
    }

    fn clear(&self) -> TranslationResult<()> {
        let txn = self.db.begin_write().map_err(storage_error)?;
        txn.delete_table(ENTRIES).map_err(storage_error)?;
        txn.delete_table(ORDER).map_err(storage_error)?;
        {
            txn.open_table(ENTRIES).map_err(storage_error)?;
            txn.open_table(ORDER).map_err(storage_error)?;
        }
        txn.commit().map_err(storage_error)?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redb"
    }
}
