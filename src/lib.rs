//! # Page Translator
//!
//! 在网页原位翻译文本：遍历文档、按大小组装批次、在限流下派发到翻译服务、
//! 按内容指纹缓存结果，并把译文写回原位置。
//!
//! ## 模块组织
//!
//! - `env` - 类型化的环境变量
//! - `parsers` - HTML 解析、DOM 操作和序列化
//! - `translation` - 翻译流水线

pub mod env;
pub mod parsers;
pub mod translation;

pub use parsers::{html_to_dom, serialize_document};
pub use translation::{TranslationConfig, TranslationError, TranslationPipeline, TranslationResult};
