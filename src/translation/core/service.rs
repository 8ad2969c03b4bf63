//! 翻译流水线
//!
//! 把遍历、缓存查询、批次组装、请求队列和结果写回串成一条流水线。
//! 各阶段是同一个任务中协作调度的 future，挂起点只在令牌等待、
//! 防抖计时和翻译请求上：
//!
//! ```text
//! TreeWalker ──▶ 缓存查询 ──▶ PendingRequests ──▶ BatchAssembler
//!      ▲            │                                  │
//!      │            ▼ 命中                              ▼
//!  DomObserver   ResultApplier ◀──── 结果 ◀──── RequestQueue ──▶ TranslateProvider
//! ```
//!
//! ## 状态机
//!
//! `Idle → Walking → AwaitingResults → Settled`。遍历与等待结果是重叠进行的：
//! 遍历期间较早的批次已经在派发。任何状态下取消都会回到 `Idle`，
//! 停止遍历、丢弃未派发的批次，已写入的译文保持不变。
//!
//! ## 使用示例
//!
//! ```rust,no_run
//! use std::rc::Rc;
//! use page_translator::parsers::html_to_dom;
//! use page_translator::translation::{DeeplxProvider, TranslationConfig, TranslationPipeline};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TranslationConfig::default_with_lang("zh", None);
//! let provider = Rc::new(DeeplxProvider::from_config(&config)?);
//! let pipeline = TranslationPipeline::new(config, provider)?;
//!
//! let dom = html_to_dom(b"<p>Hello world</p>", "utf-8")?;
//! let report = pipeline.translate_document(&dom.document, Some("example.com")).await?;
//! println!("译文 {} 条, 失败 {} 条", report.units_translated, report.units_failed);
//! # Ok(())
//! # }
//! ```

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use futures::future::LocalBoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use markup5ever_rcdom::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::applier::{ApplyStatus, ResultApplier, UnitOutcome};
use super::limiter::TokenBucket;
use super::provider::{DeeplxProvider, TranslateProvider};
use super::queue::{request_queue, BatchOutcome, DispatchSettings, QueueStats, RequestQueue};
use crate::parsers::html::set_node_attr;
use crate::translation::config::TranslationConfig;
use crate::translation::error::{TranslationError, TranslationResult};
use crate::translation::pipeline::batch::{run_assembler, Batch, BatchAssembler, BatchItem, BatchLimits, PendingRequests};
use crate::translation::pipeline::observer::DomObserver;
use crate::translation::pipeline::walker::{
    TranslationUnit, TreeWalker, UnitId, UnitIdGenerator, WalkStats, WALKED_ATTR,
};
use crate::translation::storage::{CacheStats, FingerprintScope, TranslationCache};

// ============================================================================
// 状态与报告
// ============================================================================

/// 流水线状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PipelineState {
    /// 没有进行中的翻译
    #[default]
    Idle,
    /// 正在遍历，较早的批次同时在处理
    Walking,
    /// 遍历完成，仍有批次未返回
    AwaitingResults,
    /// 所有单元都已得到结果
    Settled,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Walking => "walking",
            PipelineState::AwaitingResults => "awaiting-results",
            PipelineState::Settled => "settled",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, PipelineState::Walking | PipelineState::AwaitingResults)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次运行的汇总
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    /// 遍历发现的单元数
    pub units_discovered: usize,
    /// 直接由缓存得到结果的单元数
    pub cache_hits: usize,
    /// 派发的批次数
    pub batches_dispatched: usize,
    /// 写入译文的单元数
    pub units_translated: usize,
    /// 写入错误提示的单元数
    pub units_failed: usize,
    /// 写回前节点已移除的单元数
    pub units_dropped: usize,
    /// 结束时的状态
    pub final_state: PipelineState,
    pub walk: WalkStats,
    pub queue: QueueStats,
    pub cache: CacheStats,
}

impl PipelineReport {
    pub fn summary(&self) -> String {
        format!(
            "单元 {} 个 (缓存命中 {}), 批次 {} 个, 译文 {} 条, 失败 {} 条, 丢弃 {} 条, 状态 {}",
            self.units_discovered,
            self.cache_hits,
            self.batches_dispatched,
            self.units_translated,
            self.units_failed,
            self.units_dropped,
            self.final_state
        )
    }
}

// ============================================================================
// 控制句柄
// ============================================================================

/// 流水线控制句柄，可在运行期间取消或重试
#[derive(Clone)]
pub struct PipelineHandle {
    state: Rc<Cell<PipelineState>>,
    running: Rc<Cell<bool>>,
    token: Rc<RefCell<CancellationToken>>,
    retry: Rc<RefCell<Option<mpsc::UnboundedSender<UnitId>>>>,
}

impl PipelineHandle {
    /// 取消当前运行，立即回到 `Idle`
    ///
    /// 没有运行时只重置状态，之后的运行不受影响。
    pub fn cancel(&self) {
        self.state.set(PipelineState::Idle);
        if !self.running.get() {
            tracing::debug!("没有正在进行的运行，仅重置状态");
            return;
        }

        let token = self.token.borrow().clone();
        token.cancel();
        tracing::info!("翻译流水线已取消");
    }

    /// 是否有 `translate_document` 或 `run` 正在进行
    pub fn is_running(&self) -> bool {
        self.running.get()
    }

    /// 重新提交失败的单元，仅在 `run` 运行期间有效
    pub fn retry(&self, unit_id: UnitId) -> bool {
        match self.retry.borrow().as_ref() {
            Some(sender) => sender.send(unit_id).is_ok(),
            None => false,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state.get()
    }
}

// ============================================================================
// 运行期共享状态
// ============================================================================

enum UnitSource {
    Walk { walker: TreeWalker, live: bool },
    Units(Vec<TranslationUnit>),
}

struct RunShared {
    scope: FingerprintScope,
    cache: TranslationCache,
    pending: RefCell<PendingRequests>,
    applier: Rc<RefCell<ResultApplier>>,
    report: RefCell<PipelineReport>,
    state: Rc<Cell<PipelineState>>,
    feeding: Cell<bool>,
    token: CancellationToken,
}

impl RunShared {
    /// 查缓存，未命中时登记等待并交给组装器
    fn submit(&self, unit: TranslationUnit, items: &mpsc::UnboundedSender<BatchItem>) {
        let fingerprint = self.scope.fingerprint(&unit.source_text);

        if let Some(cached) = self.cache.get(&fingerprint) {
            tracing::debug!("单元 #{} 命中缓存", unit.id);
            self.report.borrow_mut().cache_hits += 1;
            self.apply(&unit, &UnitOutcome::Translated(cached));
            return;
        }

        let text = unit.source_text.clone();
        let is_new = self.pending.borrow_mut().register(fingerprint, unit);
        if is_new && items.send(BatchItem::new(fingerprint, text)).is_err() {
            self.pending.borrow_mut().resolve(&fingerprint);
        }
    }

    fn retry(&self, unit_id: UnitId, items: &mpsc::UnboundedSender<BatchItem>) {
        let unit = self.applier.borrow_mut().take_failed(unit_id);
        match unit {
            Some(unit) => {
                tracing::info!("重试单元 #{}", unit_id);
                metrics::counter!("page_translator_unit_retries_total").increment(1);
                self.submit(unit, items);
            }
            None => tracing::debug!("单元 #{} 没有待重试的失败记录", unit_id),
        }
    }

    fn apply(&self, unit: &TranslationUnit, outcome: &UnitOutcome) {
        if self.token.is_cancelled() {
            return;
        }

        let status = self.applier.borrow_mut().apply(unit, outcome);
        let mut report = self.report.borrow_mut();
        match status {
            ApplyStatus::Applied => {
                report.units_translated += 1;
                metrics::counter!("page_translator_units_translated_total").increment(1);
            }
            ApplyStatus::Failed => {
                report.units_failed += 1;
                metrics::counter!("page_translator_units_failed_total").increment(1);
            }
            ApplyStatus::Detached => report.units_dropped += 1,
            ApplyStatus::AlreadyApplied | ApplyStatus::Stopped => {}
        }
    }

    /// 把批次结果按位置分发给各指纹的全部等待者
    fn resolve_batch(&self, items: Vec<BatchItem>, outcome: Option<BatchOutcome>) {
        match outcome {
            Some(BatchOutcome::Translated(translations)) => {
                for (item, translation) in items.into_iter().zip(translations) {
                    self.cache.set(&item.fingerprint, &translation);
                    let waiters = self.take_waiters(&item);
                    let outcome = UnitOutcome::Translated(translation);
                    for waiter in &waiters {
                        self.apply(waiter, &outcome);
                    }
                }
            }
            Some(BatchOutcome::Failed(error)) => {
                let outcome = UnitOutcome::Failed(error);
                for item in &items {
                    let waiters = self.take_waiters(item);
                    for waiter in &waiters {
                        self.apply(waiter, &outcome);
                    }
                }
            }
            None => {
                let dropped: Vec<TranslationUnit> = items.iter().flat_map(|item| self.take_waiters(item)).collect();
                tracing::debug!("批次已取消，{} 个单元不会得到结果", dropped.len());
                release_units(&dropped);
            }
        }
        self.update_state();
    }

    fn take_waiters(&self, item: &BatchItem) -> Vec<TranslationUnit> {
        let pending = self.pending.borrow_mut().resolve(&item.fingerprint);
        pending.map(|p| p.waiters).unwrap_or_default()
    }

    fn begin_walk(&self) {
        self.feeding.set(true);
        if !self.token.is_cancelled() {
            self.state.set(PipelineState::Walking);
        }
    }

    fn end_walk(&self) {
        self.feeding.set(false);
        self.update_state();
    }

    fn update_state(&self) {
        if self.token.is_cancelled() || self.feeding.get() {
            return;
        }
        let next = if self.pending.borrow().is_empty() {
            PipelineState::Settled
        } else {
            PipelineState::AwaitingResults
        };
        if self.state.get() != next {
            tracing::debug!("流水线状态: {} → {}", self.state.get(), next);
            self.state.set(next);
        }
    }
}

/// 去掉未得到结果的单元的遍历标记，下次翻译时重新处理
fn release_units(units: &[TranslationUnit]) {
    for unit in units {
        if let Some(node) = unit.node() {
            set_node_attr(&node, WALKED_ATTR, None);
        }
    }
}

async fn next_retry(retries: &mut Option<mpsc::UnboundedReceiver<UnitId>>) -> UnitId {
    if let Some(receiver) = retries.as_mut() {
        if let Some(id) = receiver.recv().await {
            return id;
        }
    }
    *retries = None;
    std::future::pending().await
}

/// 产出单元的阶段；结束时丢弃 `items`，组装器随之收尾
async fn feed(
    shared: &RunShared,
    source: UnitSource,
    items: mpsc::UnboundedSender<BatchItem>,
    mut retries: Option<mpsc::UnboundedReceiver<UnitId>>,
) -> WalkStats {
    let token = &shared.token;

    match source {
        UnitSource::Units(units) => {
            shared.begin_walk();
            for unit in units {
                if token.is_cancelled() {
                    break;
                }
                shared.submit(unit, &items);
            }
            shared.end_walk();
            WalkStats::default()
        }
        UnitSource::Walk { mut walker, live } => {
            'session: loop {
                shared.begin_walk();
                while let Some(unit) = walker.next_unit() {
                    shared.report.borrow_mut().units_discovered += 1;
                    shared.submit(unit, &items);

                    // 让组装器和队列在遍历期间推进
                    tokio::task::yield_now().await;
                    if token.is_cancelled() {
                        break 'session;
                    }
                }
                shared.end_walk();

                if !live {
                    break;
                }

                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    id = next_retry(&mut retries) => shared.retry(id, &items),
                    changed = walker.next_change() => {
                        if !changed {
                            tracing::debug!("文档变更通知已关闭");
                            break;
                        }
                    }
                }
            }

            walker.unsubscribe();
            walker.stats().clone()
        }
    }
}

type InFlight = LocalBoxFuture<'static, (Vec<BatchItem>, Option<BatchOutcome>)>;

/// 把组装好的批次依次提交到队列，并在结果返回时写回
async fn dispatch(shared: &RunShared, mut batches: mpsc::UnboundedReceiver<Batch>, queue: RequestQueue) {
    let mut in_flight: FuturesUnordered<InFlight> = FuturesUnordered::new();
    let mut open = true;

    while open || !in_flight.is_empty() {
        tokio::select! {
            batch = batches.recv(), if open => match batch {
                Some(batch) => {
                    let items = batch.items.clone();
                    let admission = queue.admit(batch);
                    in_flight.push(async move { (items, admission.wait().await) }.boxed_local());
                }
                None => open = false,
            },
            Some((items, outcome)) = in_flight.next(), if !in_flight.is_empty() => {
                shared.resolve_batch(items, outcome);
            }
        }
    }
}

// ============================================================================
// 流水线
// ============================================================================

struct DocumentSession {
    root: Handle,
    applier: Rc<RefCell<ResultApplier>>,
}

/// 翻译流水线
///
/// 令牌桶和缓存在多次运行之间共享；每篇文档有自己的写回器，
/// 失败记录保留到下一次重试。
pub struct TranslationPipeline<P: ?Sized> {
    config: TranslationConfig,
    provider: Rc<P>,
    limiter: Arc<TokenBucket>,
    cache: TranslationCache,
    ids: UnitIdGenerator,
    state: Rc<Cell<PipelineState>>,
    running: Rc<Cell<bool>>,
    token: Rc<RefCell<CancellationToken>>,
    retry: Rc<RefCell<Option<mpsc::UnboundedSender<UnitId>>>>,
    session: RefCell<Option<DocumentSession>>,
}

impl TranslationPipeline<DeeplxProvider> {
    /// 使用内置的 DeepLX 接口
    pub fn with_deeplx(config: TranslationConfig) -> TranslationResult<Self> {
        let provider = Rc::new(DeeplxProvider::from_config(&config)?);
        Self::new(config, provider)
    }
}

impl<P: TranslateProvider + ?Sized + 'static> TranslationPipeline<P> {
    pub fn new(config: TranslationConfig, provider: Rc<P>) -> TranslationResult<Self> {
        config.validate()?;
        let cache = TranslationCache::from_settings(&config.cache)?;
        let limiter = Arc::new(TokenBucket::from_config(&config.request_queue));

        tracing::info!(
            "创建翻译流水线: {} → {}, 模式 {}, 提供方 {}",
            config.source_lang,
            config.target_lang,
            config.translation_mode,
            provider.identity()
        );

        Ok(Self {
            config,
            provider,
            limiter,
            cache,
            ids: UnitIdGenerator::default(),
            state: Rc::new(Cell::new(PipelineState::Idle)),
            running: Rc::new(Cell::new(false)),
            token: Rc::new(RefCell::new(CancellationToken::new())),
            retry: Rc::new(RefCell::new(None)),
            session: RefCell::new(None),
        })
    }

    /// 替换缓存（例如多个流水线共享同一缓存）
    pub fn with_cache(mut self, cache: TranslationCache) -> Self {
        self.cache = cache;
        self
    }

    /// 替换令牌桶（例如多个流水线共享同一额度）
    pub fn with_limiter(mut self, limiter: Arc<TokenBucket>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn config(&self) -> &TranslationConfig {
        &self.config
    }

    pub fn cache(&self) -> &TranslationCache {
        &self.cache
    }

    pub fn limiter(&self) -> &Arc<TokenBucket> {
        &self.limiter
    }

    pub fn state(&self) -> PipelineState {
        self.state.get()
    }

    pub fn handle(&self) -> PipelineHandle {
        PipelineHandle {
            state: Rc::clone(&self.state),
            running: Rc::clone(&self.running),
            token: Rc::clone(&self.token),
            retry: Rc::clone(&self.retry),
        }
    }

    fn applier_for(&self, root: &Handle) -> Rc<RefCell<ResultApplier>> {
        let mut session = self.session.borrow_mut();
        match session.as_ref() {
            Some(existing) if Rc::ptr_eq(&existing.root, root) => Rc::clone(&existing.applier),
            _ => {
                let applier = Rc::new(RefCell::new(ResultApplier::from_config(root.clone(), &self.config)));
                *session = Some(DocumentSession {
                    root: root.clone(),
                    applier: Rc::clone(&applier),
                });
                applier
            }
        }
    }

    fn walker_for(&self, root: &Handle, hostname: Option<&str>) -> TranslationResult<TreeWalker> {
        Ok(TreeWalker::new(root.clone(), &self.config, hostname)?.with_ids(self.ids.clone()))
    }

    /// 翻译整篇文档，遍历完成且所有单元都有结果后返回
    pub async fn translate_document(&self, document: &Handle, hostname: Option<&str>) -> TranslationResult<PipelineReport> {
        if !self.config.enabled {
            tracing::info!("翻译已禁用");
            return Ok(self.idle_report());
        }

        let walker = self.walker_for(document, hostname)?;
        let applier = self.applier_for(document);
        Ok(self.drive(UnitSource::Walk { walker, live: false }, applier, None).await)
    }

    /// 持续翻译：处理完现有内容后继续响应文档变更和重试，直到取消
    pub async fn run(
        &self,
        document: &Handle,
        hostname: Option<&str>,
        observer: &DomObserver,
    ) -> TranslationResult<PipelineReport> {
        if !self.config.enabled {
            tracing::info!("翻译已禁用");
            return Ok(self.idle_report());
        }

        let mut walker = self.walker_for(document, hostname)?;
        walker.subscribe(observer);
        let applier = self.applier_for(document);

        let (retry_tx, retry_rx) = mpsc::unbounded_channel();
        *self.retry.borrow_mut() = Some(retry_tx);
        let report = self
            .drive(UnitSource::Walk { walker, live: true }, applier, Some(retry_rx))
            .await;
        *self.retry.borrow_mut() = None;

        Ok(report)
    }

    /// 重新提交上一篇文档中所有失败的单元
    pub async fn retry_failed(&self) -> TranslationResult<PipelineReport> {
        let applier = match self.session.borrow().as_ref() {
            Some(session) => Rc::clone(&session.applier),
            None => return Err(TranslationError::InvalidInput("没有可重试的文档".to_string())),
        };

        let units = applier.borrow_mut().take_all_failed();
        tracing::info!("重试 {} 个失败单元", units.len());
        Ok(self.drive(UnitSource::Units(units), applier, None).await)
    }

    /// 当前文档中失败单元的编号
    pub fn failed_units(&self) -> Vec<UnitId> {
        match self.session.borrow().as_ref() {
            Some(session) => session.applier.borrow().failed_ids(),
            None => Vec::new(),
        }
    }

    /// 关闭某个失败单元的错误提示
    pub fn dismiss(&self, unit_id: UnitId) -> bool {
        match self.session.borrow().as_ref() {
            Some(session) => session.applier.borrow_mut().dismiss(unit_id),
            None => false,
        }
    }

    /// 撤销当前文档中所有写入的内容
    pub fn restore_document(&self) -> usize {
        match self.session.borrow().as_ref() {
            Some(session) => session.applier.borrow_mut().restore_all(),
            None => 0,
        }
    }

    fn idle_report(&self) -> PipelineReport {
        PipelineReport {
            final_state: PipelineState::Idle,
            cache: self.cache.get_stats(),
            ..PipelineReport::default()
        }
    }

    async fn drive(
        &self,
        source: UnitSource,
        applier: Rc<RefCell<ResultApplier>>,
        retries: Option<mpsc::UnboundedReceiver<UnitId>>,
    ) -> PipelineReport {
        if self.running.get() {
            tracing::debug!("流水线已在运行，已处理的节点不会重复翻译");
        }
        let token = self.token.borrow().clone();
        let outer = self.running.replace(true);
        applier.borrow_mut().resume();

        let shared = RunShared {
            scope: FingerprintScope::new(&self.config.source_lang, &self.config.target_lang, &self.provider.identity()),
            cache: self.cache.clone(),
            pending: RefCell::new(PendingRequests::new()),
            applier: Rc::clone(&applier),
            report: RefCell::new(PipelineReport::default()),
            state: Rc::clone(&self.state),
            feeding: Cell::new(false),
            token: token.clone(),
        };

        let (item_tx, item_rx) = mpsc::unbounded_channel();
        let (batch_tx, batch_rx) = mpsc::unbounded_channel();
        let (queue, worker) = request_queue(
            Rc::clone(&self.provider),
            Arc::clone(&self.limiter),
            DispatchSettings::from_config(&self.config),
        );
        let assembler = BatchAssembler::new(BatchLimits::from(&self.config.batch_queue));

        let (walk, _, (), queue_stats) = tokio::join!(
            feed(&shared, source, item_tx, retries),
            run_assembler(assembler, item_rx, batch_tx, self.config.batch_debounce(), token.clone()),
            dispatch(&shared, batch_rx, queue),
            worker.run(token.clone()),
        );

        if token.is_cancelled() {
            let dropped = shared.pending.borrow_mut().drain_waiters();
            if !dropped.is_empty() {
                tracing::debug!("取消后 {} 个单元没有结果", dropped.len());
                release_units(&dropped);
            }
            applier.borrow_mut().stop();
            self.state.set(PipelineState::Idle);
            if !outer {
                self.reset_token();
            }
        } else {
            shared.update_state();
        }
        self.running.set(outer);

        let mut report = shared.report.into_inner();
        report.walk = walk;
        report.batches_dispatched = queue_stats.dispatched;
        report.queue = queue_stats;
        report.cache = self.cache.get_stats();
        report.final_state = self.state.get();

        tracing::info!("翻译完成: {}", report.summary());
        report
    }

    fn reset_token(&self) {
        *self.token.borrow_mut() = CancellationToken::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::html::html_to_dom;
    use async_trait::async_trait;

    struct Upper;

    #[async_trait(?Send)]
    impl TranslateProvider for Upper {
        fn identity(&self) -> String {
            "upper".to_string()
        }

        async fn translate(&self, texts: &[String], _: &str, _: &str) -> TranslationResult<Vec<String>> {
            Ok(texts.iter().map(|t| t.to_uppercase()).collect())
        }
    }

    #[test]
    fn test_state_names() {
        assert_eq!(PipelineState::AwaitingResults.to_string(), "awaiting-results");
        assert!(PipelineState::Walking.is_active());
        assert!(!PipelineState::Settled.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_shot_settles() {
        let pipeline = TranslationPipeline::new(TranslationConfig::default(), Rc::new(Upper)).unwrap();
        let dom = html_to_dom(b"<p>Hello world</p><p>Second line</p>", "utf-8").unwrap();

        let report = pipeline.translate_document(&dom.document, None).await.unwrap();
        assert_eq!(report.units_discovered, 2);
        assert_eq!(report.units_translated, 2);
        assert_eq!(report.final_state, PipelineState::Settled);
        assert_eq!(pipeline.state(), PipelineState::Settled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_is_noop() {
        let mut config = TranslationConfig::default();
        config.enabled = false;
        let pipeline = TranslationPipeline::new(config, Rc::new(Upper)).unwrap();
        let dom = html_to_dom(b"<p>Hello world</p>", "utf-8").unwrap();

        let report = pipeline.translate_document(&dom.document, None).await.unwrap();
        assert_eq!(report.units_discovered, 0);
        assert_eq!(report.final_state, PipelineState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_idle_does_not_block_next_run() {
        let pipeline = TranslationPipeline::new(TranslationConfig::default(), Rc::new(Upper)).unwrap();
        let handle = pipeline.handle();

        handle.cancel();
        assert!(!handle.is_running());
        let first = html_to_dom(b"<p>Hello world</p>", "utf-8").unwrap();
        let report = pipeline.translate_document(&first.document, None).await.unwrap();
        assert_eq!(report.units_translated, 1);
        assert_eq!(report.final_state, PipelineState::Settled);

        // 已完成后取消回到 Idle，再次触发照常翻译
        handle.cancel();
        assert_eq!(pipeline.state(), PipelineState::Idle);
        let second = html_to_dom(b"<p>Another page</p>", "utf-8").unwrap();
        let report = pipeline.translate_document(&second.document, None).await.unwrap();
        assert_eq!(report.units_translated, 1);
        assert_eq!(report.final_state, PipelineState::Settled);
    }
}
