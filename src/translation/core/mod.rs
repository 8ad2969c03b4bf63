//! 翻译系统核心模块
//!
//! 流水线的派发与写回部分：
//!
//! - **limiter**: 令牌桶限流，每个批次一个令牌
//! - **provider**: 翻译能力接口和 DeepLX 实现
//! - **queue**: 先进先出的请求队列，负责重试与取消
//! - **applier**: 把译文和错误提示写回文档
//! - **service**: 把各阶段串成流水线，维护状态机
//!
//! ## 模块依赖关系
//!
//! ```text
//! TranslationPipeline (service.rs)
//!     ├── TreeWalker (pipeline/walker.rs)
//!     ├── TranslationCache (storage/cache.rs)
//!     ├── BatchAssembler (pipeline/batch.rs)
//!     ├── RequestQueue (queue.rs)
//!     │       ├── TokenBucket (limiter.rs)
//!     │       └── TranslateProvider (provider.rs)
//!     └── ResultApplier (applier.rs)
//! ```

pub mod applier;
pub mod limiter;
pub mod provider;
pub mod queue;
pub mod service;

pub use applier::{ApplyStats, ApplyStatus, NodeStyleOptions, ResultApplier, UnitOutcome};
pub use limiter::{RateBudget, TokenBucket};
pub use provider::{DeeplxProvider, TranslateProvider};
pub use queue::{request_queue, Admission, BatchOutcome, DispatchSettings, QueueStats, QueueWorker, RequestQueue};
pub use service::{PipelineHandle, PipelineReport, PipelineState, TranslationPipeline};
