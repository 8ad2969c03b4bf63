//! # 解析器模块
//!
//! HTML 文档解析、DOM 操作与序列化。翻译流水线把 `RcDom` 当作页面使用，
//! 所有读写都经过这里的函数。

pub mod html;

pub use html::{html_to_dom, serialize_document};
