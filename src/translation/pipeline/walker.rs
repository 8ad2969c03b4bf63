//! 文档遍历器
//!
//! 深度优先遍历文档，按分类器结果生成翻译单元：
//!
//! - 块级元素内部还有块级后代时继续向下，否则整体作为一个单元
//! - 行内元素内部没有块级后代时整体作为一个单元
//! - 行内代码类容器整体作为单元，不再向下
//!
//! 已生成单元的元素会打上 `data-pt-walked` 标记，重复遍历不会再次产出。
//! 订阅文档变更后，新插入的子树会重新分类并继续产出单元。

use std::cell::Cell;
use std::rc::{Rc, Weak};

use markup5ever_rcdom::{Handle, Node, NodeData};

use super::classifier::{has_state_marker, Display, NodeClass, NodeClassifier};
use super::filters::{FilterReason, TextFilter};
use super::observer::{DomChange, DomObserver, DomSubscription};
use super::selector::SelectorList;
use crate::parsers::html::{
    create_element, flattened_text, get_node_attr, get_node_name, get_parent, is_attached, replace_children,
    set_node_attr, take_children,
};
use crate::translation::config::TranslationConfig;
use crate::translation::error::{TranslationError, TranslationResult};

/// 已处理标记
pub const WALKED_ATTR: &str = "data-pt-walked";

/// 包装散落文本的 `<span>` 上的标记
pub const TEXT_RUN_ATTR: &str = "data-pt-run";

// ============================================================================
// 翻译单元
// ============================================================================

/// 翻译单元编号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(pub u64);

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 共享的单元编号生成器
#[derive(Debug, Clone, Default)]
pub struct UnitIdGenerator {
    next: Rc<Cell<u64>>,
}

impl UnitIdGenerator {
    pub fn next_id(&self) -> UnitId {
        let id = self.next.get() + 1;
        self.next.set(id);
        UnitId(id)
    }
}

/// 单元所在位置的布局信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitContext {
    pub tag: String,
    pub class: NodeClass,
    pub display: Display,
    pub depth: usize,
    pub parent_tag: Option<String>,
}

/// 翻译单元
///
/// 只持有节点的弱引用，节点被移除后单元随之失效；写回前必须检查存活。
#[derive(Debug, Clone)]
pub struct TranslationUnit {
    pub id: UnitId,
    pub source_text: String,
    pub context: UnitContext,
    node: Weak<Node>,
}

impl TranslationUnit {
    pub fn new(id: UnitId, source_text: String, context: UnitContext, node: &Handle) -> Self {
        Self {
            id,
            source_text,
            context,
            node: Rc::downgrade(node),
        }
    }

    /// 节点仍然存在时返回
    pub fn node(&self) -> Option<Handle> {
        self.node.upgrade()
    }

    /// 节点仍挂在文档中时返回
    pub fn attached_node(&self, root: &Handle) -> Option<Handle> {
        self.node().filter(|node| is_attached(node, root))
    }

    pub fn char_count(&self) -> usize {
        self.source_text.chars().count()
    }
}

// ============================================================================
// 遍历器
// ============================================================================

/// 遍历统计
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WalkStats {
    pub nodes_visited: usize,
    pub subtrees_skipped: usize,
    pub already_processed: usize,
    pub filtered: usize,
    pub extraction_failures: usize,
    pub units_emitted: usize,
    pub text_runs_wrapped: usize,
    pub changes_received: usize,
}

/// 文档遍历器
pub struct TreeWalker {
    root: Handle,
    classifier: NodeClassifier,
    filter: TextFilter,
    ids: UnitIdGenerator,
    stack: Vec<(Handle, usize)>,
    subscription: Option<DomSubscription>,
    stats: WalkStats,
}

impl TreeWalker {
    /// 创建遍历器，`hostname` 用于选取站点选择器
    pub fn new(root: Handle, config: &TranslationConfig, hostname: Option<&str>) -> TranslationResult<Self> {
        let selectors = SelectorList::parse_all(&config.selectors_for_host(hostname))?;
        if !selectors.is_empty() {
            tracing::debug!("站点 {:?} 使用 {} 条跳过选择器", hostname, selectors.selectors.len());
        }

        Ok(Self::with_parts(
            root,
            NodeClassifier::new(selectors),
            TextFilter::from_config(config),
            UnitIdGenerator::default(),
        ))
    }

    pub fn with_parts(root: Handle, classifier: NodeClassifier, filter: TextFilter, ids: UnitIdGenerator) -> Self {
        let stack = vec![(root.clone(), 0)];
        Self {
            root,
            classifier,
            filter,
            ids,
            stack,
            subscription: None,
            stats: WalkStats::default(),
        }
    }

    /// 使用外部的编号生成器
    pub fn with_ids(mut self, ids: UnitIdGenerator) -> Self {
        self.ids = ids;
        self
    }

    /// 订阅文档变更
    pub fn subscribe(&mut self, observer: &DomObserver) {
        self.subscription = Some(observer.subscribe());
    }

    /// 退订，之后 `next_change` 立即返回 false
    pub fn unsubscribe(&mut self) {
        self.subscription = None;
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    /// 从根节点重新开始遍历，已标记的节点会被跳过
    pub fn restart(&mut self) {
        self.stack.clear();
        self.stack.push((self.root.clone(), 0));
    }

    /// 当前遍历是否已经完成
    pub fn is_exhausted(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn stats(&self) -> &WalkStats {
        &self.stats
    }

    pub fn root(&self) -> &Handle {
        &self.root
    }

    /// 等待下一次文档变更，并把新子树加入待遍历栈
    ///
    /// 没有订阅或通知器已释放时返回 false。
    pub async fn next_change(&mut self) -> bool {
        let Some(subscription) = self.subscription.as_mut() else {
            return false;
        };

        let Some(change) = subscription.recv().await else {
            self.subscription = None;
            return false;
        };

        let mut changes = vec![change];
        while let Some(change) = subscription.try_recv() {
            changes.push(change);
        }

        for change in changes {
            self.accept_change(change);
        }
        true
    }

    fn accept_change(&mut self, change: DomChange) {
        let DomChange::Inserted(node) = change;
        self.stats.changes_received += 1;

        // 文本节点的插入按其父元素处理
        let start = if matches!(node.data, NodeData::Element { .. }) {
            Some(node)
        } else {
            get_parent(&node)
        };
        let Some(start) = start else {
            return;
        };

        if !is_attached(&start, &self.root) {
            tracing::debug!("忽略已不在文档中的插入节点");
            return;
        }

        // 祖先中有跳过的子树或已处理的单元时，新内容不再单独处理
        let mut depth = 0;
        let mut current = get_parent(&start);
        while let Some(ancestor) = current {
            if get_node_name(&ancestor).is_some()
                && (self.classifier.classify(&ancestor) == NodeClass::SkipSubtree
                    || get_node_attr(&ancestor, WALKED_ATTR).is_some())
            {
                tracing::debug!("插入节点位于已跳过或已处理的子树中");
                return;
            }
            depth += 1;
            current = get_parent(&ancestor);
        }

        self.stack.push((start, depth));
    }

    /// 产出下一个翻译单元；当前待遍历栈耗尽时返回 `None`
    pub fn next_unit(&mut self) -> Option<TranslationUnit> {
        while let Some((node, depth)) = self.stack.pop() {
            if let Some(unit) = self.visit(&node, depth) {
                return Some(unit);
            }
        }
        None
    }

    fn push_children(&mut self, node: &Handle, depth: usize) {
        let children = node.children.borrow();
        // 逆序入栈，保持文档顺序出栈
        for child in children.iter().rev() {
            if matches!(child.data, NodeData::Element { .. }) {
                self.stack.push((child.clone(), depth + 1));
            }
        }
    }

    fn visit(&mut self, node: &Handle, depth: usize) -> Option<TranslationUnit> {
        if let NodeData::Document = node.data {
            self.push_children(node, depth);
            return None;
        }

        let tag = get_node_name(node)?.to_string();
        self.stats.nodes_visited += 1;

        if get_node_attr(node, WALKED_ATTR).is_some() || has_state_marker(node) {
            self.stats.already_processed += 1;
            return None;
        }

        let class = self.classifier.classify(node);
        match class {
            NodeClass::SkipSubtree => {
                self.stats.subtrees_skipped += 1;
                None
            }
            NodeClass::SkipSelfOnly => {
                self.wrap_loose_runs(node);
                self.push_children(node, depth);
                None
            }
            NodeClass::TranslateAsBlock | NodeClass::TranslateAsInline => {
                if self.has_block_descendant(node) {
                    self.wrap_loose_runs(node);
                    self.push_children(node, depth);
                    None
                } else {
                    self.emit(node, tag, class, depth)
                }
            }
            NodeClass::TranslateButDontDescend => self.emit(node, tag, class, depth),
        }
    }

    fn has_block_descendant(&self, node: &Handle) -> bool {
        let mut pending: Vec<Handle> = node.children.borrow().iter().cloned().collect();
        while let Some(child) = pending.pop() {
            if !matches!(child.data, NodeData::Element { .. }) {
                continue;
            }
            match self.classifier.classify(&child) {
                NodeClass::TranslateAsBlock => return true,
                NodeClass::SkipSubtree | NodeClass::TranslateButDontDescend => {}
                _ => pending.extend(child.children.borrow().iter().cloned()),
            }
        }
        false
    }

    /// 把容器中直接出现的文本连同相邻的行内元素包进 `<span>`
    ///
    /// 与块级子元素并列的文本或未知容器中的文本本身不是单元，包装后作为行内单元产出。
    /// 包装元素留在文档中，重复遍历时按已处理的行内元素跳过。
    fn wrap_loose_runs(&mut self, node: &Handle) {
        let members: Vec<(Handle, bool)> = {
            let children = node.children.borrow();
            if !children.iter().any(is_loose_text) {
                return;
            }
            children.iter().map(|child| (child.clone(), self.joins_run(child))).collect()
        };

        take_children(node);
        let mut children = Vec::with_capacity(members.len());
        let mut run = Vec::new();
        for (child, joins) in members {
            if joins {
                run.push(child);
            } else {
                self.close_run(&mut run, &mut children);
                children.push(child);
            }
        }
        self.close_run(&mut run, &mut children);
        replace_children(node, children);
    }

    fn joins_run(&self, node: &Handle) -> bool {
        match node.data {
            NodeData::Text { .. } => true,
            NodeData::Element { .. } => {
                get_node_attr(node, WALKED_ATTR).is_none()
                    && !has_state_marker(node)
                    && matches!(
                        self.classifier.classify(node),
                        NodeClass::TranslateAsInline | NodeClass::TranslateButDontDescend
                    )
                    && !self.has_block_descendant(node)
            }
            _ => false,
        }
    }

    fn close_run(&mut self, run: &mut Vec<Handle>, out: &mut Vec<Handle>) {
        if !run.iter().any(is_loose_text) {
            out.append(run);
            return;
        }

        let wrapper = create_element("span", &[(TEXT_RUN_ATTR, String::new())]);
        replace_children(&wrapper, std::mem::take(run));
        self.stats.text_runs_wrapped += 1;
        out.push(wrapper);
    }

    fn extract(&self, node: &Handle) -> TranslationResult<String> {
        if !is_attached(node, &self.root) {
            return Err(TranslationError::ExtractionFailure("节点已从文档中移除".to_string()));
        }

        let classifier = &self.classifier;
        flattened_text(node, &|element: &Handle| {
            classifier.is_skipped(element) || has_state_marker(element)
        })
    }

    fn emit(&mut self, node: &Handle, tag: String, class: NodeClass, depth: usize) -> Option<TranslationUnit> {
        let text = match self.extract(node) {
            Ok(text) => text,
            Err(e) => {
                self.stats.extraction_failures += 1;
                tracing::warn!("跳过 <{}>: {}", tag, e);
                return None;
            }
        };

        if let Some(reason) = self.filter.filter_reason(&text) {
            self.stats.filtered += 1;
            if reason != FilterReason::TooShort {
                tracing::trace!("过滤 <{}> ({:?}): {}", tag, reason, text);
            }
            return None;
        }

        let id = self.ids.next_id();
        set_node_attr(node, WALKED_ATTR, Some(id.to_string()));
        self.stats.units_emitted += 1;

        let context = UnitContext {
            parent_tag: get_parent(node).and_then(|p| get_node_name(&p).map(str::to_string)),
            display: class.display().unwrap_or(Display::Inline),
            class,
            tag,
            depth,
        };
        tracing::debug!("发现翻译单元 #{} <{}>: {} 字符", id, context.tag, text.chars().count());

        Some(TranslationUnit::new(id, text, context, node))
    }
}

impl Iterator for TreeWalker {
    type Item = TranslationUnit;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_unit()
    }
}

fn is_loose_text(node: &Handle) -> bool {
    match &node.data {
        NodeData::Text { contents } => !contents.borrow().trim().is_empty(),
        _ => false,
    }
}

/// 清除遍历标记，使整篇文档可以重新遍历
pub fn clear_walk_markers(root: &Handle) {
    let mut pending = vec![root.clone()];
    while let Some(node) = pending.pop() {
        set_node_attr(&node, WALKED_ATTR, None);
        pending.extend(node.children.borrow().iter().cloned());
    }
}
