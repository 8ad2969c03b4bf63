//! 批次组装模块
//!
//! 把缓存未命中的翻译请求按到达顺序贪心地组装成批次，每个批次同时受
//! 条目数和字符总数两个上限约束。
//!
//! ## 组装规则
//!
//! - 加入下一条会超过 `max_items_per_batch`，或使字符总数超过
//!   `max_characters_per_batch` 时，先关闭当前批次再开始新批次
//! - 单条文本本身就超过字符上限时，单独成为一个批次（整条发送，不截断、不拆分）
//! - 达到任一上限时立即关闭批次；未满的批次在防抖窗口结束后关闭
//!
//! ## 去重
//!
//! 指纹相同的单元在进入组装器之前已经在 [`PendingRequests`] 中合并：
//! 只有第一次出现的指纹会作为 [`BatchItem`] 进入批次，后续单元登记为等待者，
//! 结果返回后所有等待者共享同一个结果。
//!
//! ## 使用示例
//!
//! ```rust
//! use page_translator::translation::pipeline::batch::{BatchAssembler, BatchItem, BatchLimits};
//! use page_translator::translation::storage::Fingerprint;
//!
//! let mut assembler = BatchAssembler::new(BatchLimits::new(4, 1000));
//! let items = (0..5)
//!     .map(|i| {
//!         let text = format!("Paragraph {}", i);
//!         BatchItem::new(Fingerprint::compute(&text, "auto", "zh", "demo"), text)
//!     })
//!     .collect();
//!
//! let batches = assembler.assemble(items);
//! assert_eq!(batches.iter().map(|b| b.len()).collect::<Vec<_>>(), vec![4, 1]);
//! ```

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use super::walker::TranslationUnit;
use crate::translation::config::BatchQueueConfig;
use crate::translation::storage::Fingerprint;

// ============================================================================
// 核心类型
// ============================================================================

/// 批次中的一条待翻译文本
///
/// 每个指纹在同一时间只对应一条 `BatchItem`。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    /// 内容指纹，结果按它回填等待者
    pub fingerprint: Fingerprint,
    /// 发送给翻译服务的原文
    pub text: String,
}

impl BatchItem {
    pub fn new(fingerprint: Fingerprint, text: String) -> Self {
        Self { fingerprint, text }
    }

    /// 字符数（按 Unicode 标量计）
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

/// 翻译批次
///
/// ## 不变量
///
/// `total_characters <= max_characters_per_batch` 且 `items.len() <= max_items_per_batch`；
/// 唯一的例外是只包含一条超长文本的单元素批次。
#[derive(Debug, Clone)]
pub struct Batch {
    /// 批次编号，按关闭顺序递增
    pub id: u64,
    /// 按到达顺序排列的条目
    pub items: Vec<BatchItem>,
    /// 所有条目的字符总数
    pub total_characters: usize,
    /// 批次关闭时间
    pub created_at: Instant,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 按顺序取出原文，供翻译服务使用
    pub fn texts(&self) -> Vec<String> {
        self.items.iter().map(|item| item.text.clone()).collect()
    }

    /// 是否为超长单条批次
    pub fn is_oversized_singleton(&self, limits: &BatchLimits) -> bool {
        self.items.len() == 1 && self.total_characters > limits.max_characters
    }

    /// 批次摘要，用于日志
    pub fn summary(&self) -> String {
        format!("批次 #{}: {} 条, {} 字符", self.id, self.items.len(), self.total_characters)
    }
}

/// 批次上限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_items: usize,
    pub max_characters: usize,
}

impl BatchLimits {
    /// 上限为 0 时按 1 处理
    pub fn new(max_items: usize, max_characters: usize) -> Self {
        Self {
            max_items: max_items.max(1),
            max_characters: max_characters.max(1),
        }
    }
}

impl From<&BatchQueueConfig> for BatchLimits {
    fn from(config: &BatchQueueConfig) -> Self {
        Self::new(config.max_items_per_batch, config.max_characters_per_batch)
    }
}

/// 组装统计
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchStats {
    /// 进入组装器的条目数
    pub input_items: usize,
    /// 产出的批次数
    pub output_batches: usize,
    /// 超长单条批次数
    pub oversized_singletons: usize,
    /// 因防抖窗口到期而关闭的批次数
    pub debounce_flushes: usize,
}

impl BatchStats {
    /// 平均每批条目数
    pub fn average_batch_size(&self) -> f32 {
        if self.output_batches == 0 {
            0.0
        } else {
            self.input_items as f32 / self.output_batches as f32
        }
    }
}

// ============================================================================
// 组装器
// ============================================================================

/// 批次组装器
///
/// 本身是同步的贪心状态机；[`run_assembler`] 在其外面加上防抖和取消。
#[derive(Debug)]
pub struct BatchAssembler {
    limits: BatchLimits,
    current: Vec<BatchItem>,
    current_chars: usize,
    next_id: u64,
    stats: BatchStats,
}

impl BatchAssembler {
    pub fn new(limits: BatchLimits) -> Self {
        Self {
            limits,
            current: Vec::new(),
            current_chars: 0,
            next_id: 0,
            stats: BatchStats::default(),
        }
    }

    pub fn limits(&self) -> &BatchLimits {
        &self.limits
    }

    /// 当前未关闭的条目数
    pub fn pending_len(&self) -> usize {
        self.current.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.current.is_empty()
    }

    pub fn stats(&self) -> &BatchStats {
        &self.stats
    }

    fn close(&mut self, items: Vec<BatchItem>, total_characters: usize) -> Batch {
        self.next_id += 1;
        self.stats.output_batches += 1;
        let batch = Batch {
            id: self.next_id,
            items,
            total_characters,
            created_at: Instant::now(),
        };
        tracing::debug!("关闭{}", batch.summary());
        batch
    }

    fn close_current(&mut self) -> Option<Batch> {
        if self.current.is_empty() {
            return None;
        }
        let items = std::mem::take(&mut self.current);
        let chars = std::mem::replace(&mut self.current_chars, 0);
        Some(self.close(items, chars))
    }

    /// 加入一条文本，返回因此关闭的批次（0 到 2 个）
    pub fn push(&mut self, item: BatchItem) -> Vec<Batch> {
        self.stats.input_items += 1;
        let chars = item.char_count();
        let mut closed = Vec::new();

        // 超长文本：先关闭当前批次，再单独成批
        if chars > self.limits.max_characters {
            closed.extend(self.close_current());
            self.stats.oversized_singletons += 1;
            tracing::debug!("文本超过单批字符上限 ({} > {})，单独成批", chars, self.limits.max_characters);
            closed.push(self.close(vec![item], chars));
            return closed;
        }

        if self.current.len() + 1 > self.limits.max_items
            || self.current_chars + chars > self.limits.max_characters
        {
            closed.extend(self.close_current());
        }

        self.current.push(item);
        self.current_chars += chars;

        // 达到任一上限立即关闭
        if self.current.len() >= self.limits.max_items || self.current_chars >= self.limits.max_characters {
            closed.extend(self.close_current());
        }

        closed
    }

    /// 关闭当前未满的批次
    pub fn flush(&mut self) -> Option<Batch> {
        self.close_current()
    }

    /// 一次性组装全部条目
    pub fn assemble(&mut self, items: Vec<BatchItem>) -> Vec<Batch> {
        let mut batches = Vec::new();
        for item in items {
            batches.extend(self.push(item));
        }
        batches.extend(self.flush());
        batches
    }
}

/// 异步组装循环
///
/// 从 `items` 读取条目并把批次发到 `batches`。未满的批次在最后一条到达后
/// `debounce` 时间内没有新条目时关闭。输入通道关闭后把剩余条目作为最后一批发出；
/// 取消时直接退出，未关闭的条目被丢弃。
pub async fn run_assembler(
    mut assembler: BatchAssembler,
    mut items: mpsc::UnboundedReceiver<BatchItem>,
    batches: mpsc::UnboundedSender<Batch>,
    debounce: Duration,
    token: CancellationToken,
) -> BatchStats {
    let mut deadline: Option<Instant> = None;

    loop {
        let wake_at = deadline.unwrap_or_else(Instant::now);

        tokio::select! {
            biased;

            _ = token.cancelled() => {
                if assembler.has_pending() {
                    tracing::debug!("取消组装，丢弃 {} 条未成批文本", assembler.pending_len());
                }
                break;
            }

            item = items.recv() => match item {
                Some(item) => {
                    for batch in assembler.push(item) {
                        if batches.send(batch).is_err() {
                            return assembler.stats.clone();
                        }
                    }
                    deadline = assembler.has_pending().then(|| Instant::now() + debounce);
                }
                None => {
                    if let Some(batch) = assembler.flush() {
                        let _ = batches.send(batch);
                    }
                    break;
                }
            },

            _ = sleep_until(wake_at), if deadline.is_some() => {
                deadline = None;
                if let Some(batch) = assembler.flush() {
                    assembler.stats.debounce_flushes += 1;
                    if batches.send(batch).is_err() {
                        break;
                    }
                }
            }
        }
    }

    assembler.stats.clone()
}

// ============================================================================
// 等待表
// ============================================================================

/// 一个指纹对应的未完成请求
#[derive(Debug, Clone)]
pub struct PendingRequest {
    /// 发送的原文
    pub text: String,
    /// 等待结果的单元，按登记顺序
    pub waiters: Vec<TranslationUnit>,
}

/// 未完成请求表（按指纹去重）
#[derive(Debug, Default)]
pub struct PendingRequests {
    entries: HashMap<Fingerprint, PendingRequest>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记等待者；该指纹第一次出现时返回 true，调用方需要为它提交一条 `BatchItem`
    pub fn register(&mut self, fingerprint: Fingerprint, unit: TranslationUnit) -> bool {
        match self.entries.get_mut(&fingerprint) {
            Some(pending) => {
                tracing::debug!("单元 #{} 与进行中的请求 {} 合并", unit.id, fingerprint);
                pending.waiters.push(unit);
                false
            }
            None => {
                self.entries.insert(
                    fingerprint,
                    PendingRequest {
                        text: unit.source_text.clone(),
                        waiters: vec![unit],
                    },
                );
                true
            }
        }
    }

    /// 取出指纹对应的请求及全部等待者
    pub fn resolve(&mut self, fingerprint: &Fingerprint) -> Option<PendingRequest> {
        self.entries.remove(fingerprint)
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.entries.contains_key(fingerprint)
    }

    /// 未完成的请求数
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 所有等待中的单元数
    pub fn waiter_count(&self) -> usize {
        self.entries.values().map(|p| p.waiters.len()).sum()
    }

    /// 取消时清空并取出全部等待者，它们不会收到任何结果
    pub fn drain_waiters(&mut self) -> Vec<TranslationUnit> {
        self.entries.drain().flat_map(|(_, pending)| pending.waiters).collect()
    }
}
