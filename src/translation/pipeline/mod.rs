//! 翻译管道模块
//!
//! 从文档中找出可翻译的内容并组装成批次：
//! 分类（classifier）→ 遍历（walker）→ 过滤（filters）→ 组装批次（batch）。

pub mod batch;
pub mod classifier;
pub mod filters;
pub mod observer;
pub mod selector;
pub mod walker;

// 重新导出主要类型
pub use batch::{
    run_assembler, Batch, BatchAssembler, BatchItem, BatchLimits, BatchStats, PendingRequest, PendingRequests,
};
pub use classifier::{classify_tag, Display, NodeClass, NodeClassifier, STATE_ATTR};
pub use filters::{FilterReason, TextFilter};
pub use observer::{DomChange, DomObserver, DomSubscription};
pub use selector::SelectorList;
pub use walker::{
    clear_walk_markers, TranslationUnit, TreeWalker, UnitContext, UnitId, UnitIdGenerator, WalkStats, WALKED_ATTR,
};
