//! 令牌桶限流器
//!
//! 每派发一个批次消耗一个令牌（与字符数无关）。令牌按 `refill_rate`
//! 每秒连续累积，上限为 `capacity`，初始为满桶。
//!
//! 令牌的计算与扣减在同一把锁内完成，多个任务同时申请不会丢失更新。

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

use crate::translation::config::RequestQueueConfig;

/// 限流器状态快照
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateBudget {
    pub capacity: f64,
    pub refill_rate: f64,
    pub tokens_available: f64,
    pub last_refill_time: Instant,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// 令牌桶
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// 创建满桶；容量和速率为非正数时按最小值 1 个令牌、每秒 1 个处理
    pub fn new(capacity: usize, refill_rate: f64) -> Self {
        let capacity = capacity.max(1) as f64;
        let refill_rate = if refill_rate.is_finite() && refill_rate > 0.0 {
            refill_rate
        } else {
            1.0
        };

        Self {
            capacity,
            refill_rate,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn from_config(config: &RequestQueueConfig) -> Self {
        Self::new(config.capacity, config.rate)
    }

    fn lock(&self) -> MutexGuard<'_, BucketState> {
        // 状态只有两个数值，锁中毒后继续使用内部状态
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity);
        state.last_refill = now;
    }

    /// 尝试取一个令牌，失败时返回需要等待的时间
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut state = self.lock();
        self.refill(&mut state, Instant::now());

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - state.tokens;
            Err(Duration::from_secs_f64(missing / self.refill_rate))
        }
    }

    /// 等待直到取得一个令牌
    ///
    /// 取消安全：在返回之前被丢弃不会消耗令牌。
    pub async fn acquire(&self) {
        loop {
            match self.try_acquire() {
                Ok(()) => return,
                Err(wait) => {
                    tracing::trace!("令牌不足，等待 {:?}", wait);
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// 当前可用令牌数
    pub fn available(&self) -> f64 {
        let mut state = self.lock();
        self.refill(&mut state, Instant::now());
        state.tokens
    }

    pub fn budget(&self) -> RateBudget {
        let mut state = self.lock();
        self.refill(&mut state, Instant::now());
        RateBudget {
            capacity: self.capacity,
            refill_rate: self.refill_rate,
            tokens_available: state.tokens,
            last_refill_time: state.last_refill,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_starts_full_and_refills() {
        let bucket = TokenBucket::new(2, 1.0);
        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_ok());

        let wait = bucket.try_acquire().unwrap_err();
        assert!(wait <= Duration::from_secs(1));

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(bucket.try_acquire().is_err());

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(bucket.try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokens_never_exceed_capacity() {
        let bucket = TokenBucket::new(3, 10.0);
        tokio::time::advance(Duration::from_secs(60)).await;

        let budget = bucket.budget();
        assert!(budget.tokens_available <= budget.capacity);
        assert!(budget.tokens_available >= 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_refill() {
        let bucket = TokenBucket::new(1, 1.0);
        let start = Instant::now();

        bucket.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(10));

        bucket.acquire().await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(990), "elapsed {:?}", elapsed);
        assert!(elapsed <= Duration::from_millis(1100), "elapsed {:?}", elapsed);
    }

    #[test]
    fn test_invalid_parameters_clamped() {
        let bucket = TokenBucket::new(0, -5.0);
        let budget = bucket.budget();
        assert_eq!(budget.capacity, 1.0);
        assert_eq!(budget.refill_rate, 1.0);
    }
}
