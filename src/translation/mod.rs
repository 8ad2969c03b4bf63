//! 翻译模块
//!
//! 在文档原位翻译网页内容：
//! - **config**: 配置管理
//! - **error**: 错误处理
//! - **pipeline**: 节点分类、文档遍历和批次组装
//! - **storage**: 内容指纹和翻译缓存
//! - **core**: 限流、请求队列、结果写回和流水线协调
//!
//! # 基本用法
//!
//! ```rust,no_run
//! use page_translator::parsers::html_to_dom;
//! use page_translator::translation::{TranslationConfig, TranslationPipeline};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TranslationConfig::default_with_lang("zh", None);
//! let pipeline = TranslationPipeline::with_deeplx(config)?;
//!
//! let dom = html_to_dom(b"<h1>Hello</h1>", "utf-8")?;
//! let report = pipeline.translate_document(&dom.document, None).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod pipeline;
pub mod storage;

pub use config::{constants, ConfigManager, TranslationConfig, TranslationMode};
pub use core::{
    DeeplxProvider, PipelineHandle, PipelineReport, PipelineState, ResultApplier, TokenBucket,
    TranslateProvider, TranslationPipeline, UnitOutcome,
};
pub use error::{ErrorCategory, ErrorSeverity, TranslationError, TranslationResult};
pub use pipeline::{DomObserver, NodeClass, NodeClassifier, TranslationUnit, TreeWalker, UnitId};
pub use storage::{Fingerprint, TranslationCache};
