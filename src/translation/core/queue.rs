//! 请求队列
//!
//! 批次按提交顺序排队，每派发一个批次从令牌桶取一个令牌。派发顺序严格等于
//! 提交顺序；已派发的批次并发执行，完成顺序不作保证。
//!
//! ## 失败与重试
//!
//! 翻译失败或返回数量不符时按 `base * 2^attempt` 退避重试，
//! 重试不再消耗令牌。次数用尽后以 [`BatchOutcome::Failed`] 结束。
//!
//! ## 取消
//!
//! 取消后尚未派发的批次直接丢弃，提交方的 [`Admission::wait`] 返回 `None`；
//! 正在进行的请求随工作循环一起放弃。

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use futures::future::LocalBoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::limiter::TokenBucket;
use super::provider::TranslateProvider;
use crate::translation::config::{RetrySettings, TranslationConfig};
use crate::translation::error::{TranslationError, TranslationResult};
use crate::translation::pipeline::batch::Batch;

/// 批次的最终结果
#[derive(Debug, Clone)]
pub enum BatchOutcome {
    /// 与批次条目一一对应的译文
    Translated(Vec<String>),
    /// 重试用尽后的错误
    Failed(TranslationError),
}

impl BatchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, BatchOutcome::Translated(_))
    }
}

/// 派发参数
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub source_lang: String,
    pub target_lang: String,
    pub retry: RetrySettings,
    pub timeout: Duration,
}

impl DispatchSettings {
    pub fn from_config(config: &TranslationConfig) -> Self {
        Self {
            source_lang: config.source_lang.clone(),
            target_lang: config.target_lang.clone(),
            retry: config.retry.clone(),
            timeout: config.request_timeout(),
        }
    }
}

/// 队列统计
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct QueueStats {
    pub admitted: usize,
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub retries: usize,
    pub dropped: usize,
}

struct QueuedBatch {
    batch: Batch,
    reply: oneshot::Sender<BatchOutcome>,
}

// ============================================================================
// 提交端
// ============================================================================

/// 队列提交句柄
#[derive(Clone)]
pub struct RequestQueue {
    sender: mpsc::UnboundedSender<QueuedBatch>,
    stats: Rc<RefCell<QueueStats>>,
}

impl RequestQueue {
    /// 提交批次，返回等待结果的句柄
    ///
    /// 提交在调用时立即完成，调用顺序即派发顺序。
    pub fn admit(&self, batch: Batch) -> Admission {
        let (reply, receiver) = oneshot::channel();
        let batch_id = batch.id;
        match self.sender.send(QueuedBatch { batch, reply }) {
            Ok(()) => self.stats.borrow_mut().admitted += 1,
            Err(_) => tracing::debug!("队列已关闭，批次 #{} 不会被派发", batch_id),
        }
        Admission { batch_id, receiver }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// 已提交批次的结果句柄
#[derive(Debug)]
pub struct Admission {
    pub batch_id: u64,
    receiver: oneshot::Receiver<BatchOutcome>,
}

impl Admission {
    /// 等待结果；批次因取消被丢弃时返回 `None`
    pub async fn wait(self) -> Option<BatchOutcome> {
        self.receiver.await.ok()
    }
}

// ============================================================================
// 工作循环
// ============================================================================

/// 队列工作循环，持有提供方和令牌桶
pub struct QueueWorker<P: ?Sized> {
    receiver: mpsc::UnboundedReceiver<QueuedBatch>,
    limiter: Arc<TokenBucket>,
    provider: Rc<P>,
    settings: Rc<DispatchSettings>,
    stats: Rc<RefCell<QueueStats>>,
}

/// 创建队列的提交端和工作端
pub fn request_queue<P: TranslateProvider + ?Sized + 'static>(
    provider: Rc<P>,
    limiter: Arc<TokenBucket>,
    settings: DispatchSettings,
) -> (RequestQueue, QueueWorker<P>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let stats = Rc::new(RefCell::new(QueueStats::default()));
    (
        RequestQueue {
            sender,
            stats: Rc::clone(&stats),
        },
        QueueWorker {
            receiver,
            limiter,
            provider,
            settings: Rc::new(settings),
            stats,
        },
    )
}

/// 取出队首批次并等到有令牌
///
/// 取消安全：未拿到令牌前被丢弃时，批次保留在 `head` 中。
async fn next_admitted(
    head: &mut Option<QueuedBatch>,
    receiver: &mut mpsc::UnboundedReceiver<QueuedBatch>,
    limiter: &TokenBucket,
) -> Option<QueuedBatch> {
    if head.is_none() {
        *head = Some(receiver.recv().await?);
    }
    limiter.acquire().await;
    head.take()
}

impl<P: TranslateProvider + ?Sized + 'static> QueueWorker<P> {
    /// 运行到所有提交端关闭且进行中的请求完成，或收到取消
    pub async fn run(mut self, token: CancellationToken) -> QueueStats {
        let mut head: Option<QueuedBatch> = None;
        let mut in_flight: FuturesUnordered<LocalBoxFuture<'static, ()>> = FuturesUnordered::new();
        let mut closed = false;

        loop {
            if closed && in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    let mut dropped = usize::from(head.take().is_some());
                    while self.receiver.try_recv().is_ok() {
                        dropped += 1;
                    }
                    if dropped > 0 || !in_flight.is_empty() {
                        tracing::info!("请求队列已取消: 丢弃 {} 个未派发批次, 放弃 {} 个进行中请求", dropped, in_flight.len());
                    }
                    self.stats.borrow_mut().dropped += dropped;
                    break;
                }

                Some(()) = in_flight.next(), if !in_flight.is_empty() => {}

                next = next_admitted(&mut head, &mut self.receiver, &self.limiter), if !closed => match next {
                    Some(queued) => in_flight.push(self.dispatch(queued)),
                    None => closed = true,
                },
            }
        }

        let stats = self.stats.borrow().clone();
        stats
    }

    fn dispatch(&self, queued: QueuedBatch) -> LocalBoxFuture<'static, ()> {
        let provider = Rc::clone(&self.provider);
        let settings = Rc::clone(&self.settings);
        let stats = Rc::clone(&self.stats);

        stats.borrow_mut().dispatched += 1;
        metrics::counter!("page_translator_batches_dispatched_total").increment(1);
        tracing::debug!("派发{}", queued.batch.summary());

        async move {
            let QueuedBatch { batch, reply } = queued;
            let started = Instant::now();
            let (outcome, retries) = translate_with_retry(provider.as_ref(), &batch, &settings).await;

            {
                let mut stats = stats.borrow_mut();
                stats.retries += retries;
                if outcome.is_success() {
                    stats.succeeded += 1;
                } else {
                    stats.failed += 1;
                }
            }
            tracing::debug!("批次 #{} 完成，用时 {:?}", batch.id, started.elapsed());

            if reply.send(outcome).is_err() {
                tracing::debug!("批次 #{} 的等待方已离开", batch.id);
            }
        }
        .boxed_local()
    }
}

async fn translate_once<P: TranslateProvider + ?Sized>(
    provider: &P,
    texts: &[String],
    settings: &DispatchSettings,
) -> TranslationResult<Vec<String>> {
    let translations = tokio::time::timeout(
        settings.timeout,
        provider.translate(texts, &settings.source_lang, &settings.target_lang),
    )
    .await??;

    if translations.len() != texts.len() {
        return Err(TranslationError::ProviderError(format!(
            "译文数量不匹配: 期望 {}，得到 {}",
            texts.len(),
            translations.len()
        )));
    }
    Ok(translations)
}

/// 带重试地翻译一个批次，返回结果和重试次数
pub async fn translate_with_retry<P: TranslateProvider + ?Sized>(
    provider: &P,
    batch: &Batch,
    settings: &DispatchSettings,
) -> (BatchOutcome, usize) {
    let texts = batch.texts();
    let max_attempts = settings.retry.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match translate_once(provider, &texts, settings).await {
            Ok(translations) => return (BatchOutcome::Translated(translations), attempt as usize),
            Err(e) => {
                attempt += 1;
                if attempt >= max_attempts || !e.is_retryable() {
                    tracing::error!("批次 #{} 翻译失败，已尝试 {} 次: {}", batch.id, attempt, e);
                    metrics::counter!("page_translator_batches_failed_total").increment(1);
                    return (BatchOutcome::Failed(e), (attempt - 1) as usize);
                }

                let delay = settings.retry.delay_for(attempt);
                tracing::warn!(
                    "批次 #{} 翻译失败，{}ms 后重试 (尝试 {}/{}): {}",
                    batch.id,
                    delay.as_millis(),
                    attempt + 1,
                    max_attempts,
                    e
                );
                metrics::counter!("page_translator_batch_retries_total").increment(1);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translation::pipeline::batch::{BatchAssembler, BatchItem, BatchLimits};
    use crate::translation::storage::Fingerprint;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// 回显大写，记录每次调用的时间和内容
    #[derive(Default)]
    struct RecordingProvider {
        calls: Mutex<Vec<(Instant, Vec<String>)>>,
        failures_left: Mutex<usize>,
    }

    #[async_trait(?Send)]
    impl TranslateProvider for RecordingProvider {
        fn identity(&self) -> String {
            "recording".to_string()
        }

        async fn translate(&self, texts: &[String], _: &str, _: &str) -> TranslationResult<Vec<String>> {
            self.calls.lock().unwrap().push((Instant::now(), texts.to_vec()));
            let mut failures = self.failures_left.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(TranslationError::ProviderError("boom".to_string()));
            }
            Ok(texts.iter().map(|t| t.to_uppercase()).collect())
        }
    }

    fn batches(texts: &[&str], max_items: usize) -> Vec<Batch> {
        let mut assembler = BatchAssembler::new(BatchLimits::new(max_items, 1000));
        assembler.assemble(
            texts
                .iter()
                .map(|t| BatchItem::new(Fingerprint::compute(t, "auto", "zh", "t"), t.to_string()))
                .collect(),
        )
    }

    fn settings() -> DispatchSettings {
        DispatchSettings {
            source_lang: "auto".to_string(),
            target_lang: "zh".to_string(),
            retry: RetrySettings {
                max_attempts: 3,
                base_delay_ms: 100,
            },
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_is_fifo_and_rate_limited() {
        let provider = Rc::new(RecordingProvider::default());
        let (queue, worker) = request_queue(Rc::clone(&provider), Arc::new(TokenBucket::new(1, 1.0)), settings());
        let token = CancellationToken::new();

        let start = Instant::now();
        let admissions: Vec<_> = batches(&["a", "b", "c"], 1).into_iter().map(|b| queue.admit(b)).collect();
        drop(queue);

        let (stats, outcomes) = tokio::join!(worker.run(token), async {
            let mut outcomes = Vec::new();
            for admission in admissions {
                outcomes.push(admission.wait().await);
            }
            outcomes
        });

        assert_eq!(stats.admitted, 3);
        assert_eq!(stats.dispatched, 3);
        assert!(outcomes.iter().all(|o| matches!(o, Some(BatchOutcome::Translated(_)))));

        let calls = provider.calls.lock().unwrap();
        let order: Vec<_> = calls.iter().map(|(_, texts)| texts[0].clone()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);

        let offsets: Vec<_> = calls.iter().map(|(at, _)| at.duration_since(start)).collect();
        assert!(offsets[0] < Duration::from_millis(50));
        assert!(offsets[1] >= Duration::from_millis(950) && offsets[1] <= Duration::from_millis(1100));
        assert!(offsets[2] >= Duration::from_millis(1950) && offsets[2] <= Duration::from_millis(2100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_success() {
        let provider = RecordingProvider::default();
        *provider.failures_left.lock().unwrap() = 2;
        let batch = batches(&["hello"], 4).remove(0);

        let (outcome, retries) = translate_with_retry(&provider, &batch, &settings()).await;
        assert!(matches!(outcome, BatchOutcome::Translated(ref t) if t == &vec!["HELLO".to_string()]));
        assert_eq!(retries, 2);
        assert_eq!(provider.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_fail() {
        let provider = RecordingProvider::default();
        *provider.failures_left.lock().unwrap() = 10;
        let batch = batches(&["hello"], 4).remove(0);

        let (outcome, _) = translate_with_retry(&provider, &batch, &settings()).await;
        assert!(matches!(outcome, BatchOutcome::Failed(TranslationError::ProviderError(_))));
        assert_eq!(provider.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_queued_batches() {
        let provider = Rc::new(RecordingProvider::default());
        let (queue, worker) = request_queue(Rc::clone(&provider), Arc::new(TokenBucket::new(1, 0.1)), settings());
        let token = CancellationToken::new();

        let admissions: Vec<_> = batches(&["a", "b", "c"], 1).into_iter().map(|b| queue.admit(b)).collect();

        let canceller = token.clone();
        let (stats, _) = tokio::join!(worker.run(token), async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        assert_eq!(stats.admitted, 3);
        assert_eq!(stats.dispatched, 1);
        assert_eq!(stats.dropped, 2);

        let mut results = Vec::new();
        for admission in admissions {
            results.push(admission.wait().await);
        }
        assert!(results[0].is_some());
        assert!(results[1].is_none());
        assert!(results[2].is_none());
        assert_eq!(provider.calls.lock().unwrap().len(), 1);
    }
}
