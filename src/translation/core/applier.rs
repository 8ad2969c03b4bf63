//! 结果写回
//!
//! 把译文或错误提示插入文档，写入前检查节点是否仍在文档中。
//!
//! ## 写回方式
//!
//! | 模式 | 块级单元 | 行内单元 |
//! |---|---|---|
//! | `replace` | 原有子节点替换为译文包装节点，原内容保留以便恢复 | 同左 |
//! | `append-below` | 译文包装节点追加为最后一个子节点 | 译文包装节点插入为下一个兄弟节点 |
//! | `overlay` | 译文包装节点插入为第一个子节点 | 同左 |
//!
//! 插入的节点都带有 `notranslate` 类、`translate="no"` 和 `data-pt-state`，
//! 遍历器和页面上的其他翻译工具都不会再处理它们。
//! 分类得到的样式选项以 JSON 写入 `data-pt-style`。
//!
//! 失败时插入错误提示节点，带有错误详情和重试标记；失败单元保留在
//! 失败表中，供重试或忽略。

use std::collections::{BTreeMap, HashMap};

use markup5ever_rcdom::Handle;
use serde::Serialize;

use crate::parsers::html::{
    append_child, create_element, create_text, get_parent, insert_after, remove_from_parent,
    replace_children, take_children,
};
use crate::translation::config::{TranslationConfig, TranslationMode};
use crate::translation::error::TranslationError;
use crate::translation::pipeline::classifier::{Display, STATE_ATTR};
use crate::translation::pipeline::walker::{TranslationUnit, UnitId};

pub const TRANSLATION_CLASS: &str = "notranslate pt-translation";
pub const ERROR_CLASS: &str = "notranslate pt-error";
pub const UNIT_ATTR: &str = "data-pt-unit";
pub const STYLE_ATTR: &str = "data-pt-style";
pub const ERROR_ATTR: &str = "data-pt-error";
pub const RETRY_ATTR: &str = "data-pt-retry";

/// 单个翻译单元的结果
#[derive(Debug, Clone)]
pub enum UnitOutcome {
    Translated(String),
    Failed(TranslationError),
}

/// 写回结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyStatus {
    /// 译文已写入
    Applied,
    /// 错误提示已写入
    Failed,
    /// 节点已不在文档中，未写入
    Detached,
    /// 该单元已有译文
    AlreadyApplied,
    /// 写回已停止
    Stopped,
}

/// 写入 `data-pt-style` 的样式选项
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStyleOptions {
    pub display: Display,
    pub mode: TranslationMode,
    pub style: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ApplyStats {
    pub applied: usize,
    pub failed: usize,
    pub detached: usize,
    pub restored: usize,
    pub dismissed: usize,
}

#[derive(Debug)]
struct AppliedUnit {
    target: Handle,
    inserted: Handle,
    replaced: Option<Vec<Handle>>,
}

#[derive(Debug)]
struct FailedUnit {
    unit: TranslationUnit,
    indicator: Handle,
    error: TranslationError,
}

/// 结果写回器
#[derive(Debug)]
pub struct ResultApplier {
    root: Handle,
    mode: TranslationMode,
    node_style: String,
    applied: HashMap<UnitId, AppliedUnit>,
    failed: BTreeMap<UnitId, FailedUnit>,
    stopped: bool,
    stats: ApplyStats,
}

impl ResultApplier {
    pub fn new(root: Handle, mode: TranslationMode, node_style: impl Into<String>) -> Self {
        Self {
            root,
            mode,
            node_style: node_style.into(),
            applied: HashMap::new(),
            failed: BTreeMap::new(),
            stopped: false,
            stats: ApplyStats::default(),
        }
    }

    pub fn from_config(root: Handle, config: &TranslationConfig) -> Self {
        Self::new(root, config.translation_mode, config.node_style.clone())
    }

    pub fn mode(&self) -> TranslationMode {
        self.mode
    }

    pub fn stats(&self) -> &ApplyStats {
        &self.stats
    }

    /// 停止写回，之后的 `apply` 不再修改文档
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    /// 恢复写回（重新开始翻译时）
    pub fn resume(&mut self) {
        self.stopped = false;
    }

    pub fn is_applied(&self, id: UnitId) -> bool {
        self.applied.contains_key(&id)
    }

    /// 当前失败的单元编号
    pub fn failed_ids(&self) -> Vec<UnitId> {
        self.failed.keys().copied().collect()
    }

    /// 失败单元的错误
    pub fn failure(&self, id: UnitId) -> Option<&TranslationError> {
        self.failed.get(&id).map(|f| &f.error)
    }

    /// 写回一个单元的结果
    pub fn apply(&mut self, unit: &TranslationUnit, outcome: &UnitOutcome) -> ApplyStatus {
        if self.stopped {
            return ApplyStatus::Stopped;
        }
        if self.applied.contains_key(&unit.id) {
            return ApplyStatus::AlreadyApplied;
        }

        let Some(node) = unit.attached_node(&self.root) else {
            tracing::debug!("单元 #{} 的节点已移除，跳过写回", unit.id);
            self.stats.detached += 1;
            return ApplyStatus::Detached;
        };

        // 重试成功或再次失败时先去掉旧的提示
        if let Some(previous) = self.failed.remove(&unit.id) {
            remove_from_parent(&previous.indicator);
        }

        match outcome {
            UnitOutcome::Translated(text) => {
                self.insert_translation(unit, &node, text);
                self.stats.applied += 1;
                ApplyStatus::Applied
            }
            UnitOutcome::Failed(error) => {
                let indicator = self.error_indicator(unit, error);
                self.place(&node, &indicator, unit.context.display);
                self.failed.insert(
                    unit.id,
                    FailedUnit {
                        unit: unit.clone(),
                        indicator,
                        error: error.clone(),
                    },
                );
                self.stats.failed += 1;
                ApplyStatus::Failed
            }
        }
    }

    fn style_options(&self, display: Display) -> String {
        let options = NodeStyleOptions {
            display,
            mode: self.mode,
            style: self.node_style.clone(),
        };
        serde_json::to_string(&options).unwrap_or_default()
    }

    fn insert_translation(&mut self, unit: &TranslationUnit, node: &Handle, text: &str) {
        let display = unit.context.display;
        let content = match (self.mode, display) {
            (TranslationMode::AppendBelow, Display::Inline) => format!(" {}", text),
            _ => text.to_string(),
        };

        let wrapper = create_element(
            "span",
            &[
                ("class", TRANSLATION_CLASS.to_string()),
                ("translate", "no".to_string()),
                (STATE_ATTR, "translated".to_string()),
                (UNIT_ATTR, unit.id.to_string()),
                (STYLE_ATTR, self.style_options(display)),
            ],
        );
        append_child(&wrapper, &create_text(&content));

        let replaced = match self.mode {
            TranslationMode::Replace => {
                let original = take_children(node);
                append_child(node, &wrapper);
                Some(original)
            }
            TranslationMode::AppendBelow => {
                self.place(node, &wrapper, display);
                None
            }
            TranslationMode::Overlay => {
                let mut children = take_children(node);
                children.insert(0, wrapper.clone());
                replace_children(node, children);
                None
            }
        };

        tracing::debug!("单元 #{} 已写回 ({})", unit.id, self.mode);
        self.applied.insert(
            unit.id,
            AppliedUnit {
                target: node.clone(),
                inserted: wrapper,
                replaced,
            },
        );
    }

    /// 块级放在最后一个子节点，行内放在下一个兄弟节点
    fn place(&self, node: &Handle, inserted: &Handle, display: Display) {
        match display {
            Display::Block => append_child(node, inserted),
            Display::Inline => {
                if !insert_after(node, inserted) {
                    append_child(node, inserted);
                }
            }
        }
    }

    fn error_indicator(&self, unit: &TranslationUnit, error: &TranslationError) -> Handle {
        let detail = error.to_string();
        let indicator = create_element(
            "span",
            &[
                ("class", ERROR_CLASS.to_string()),
                ("translate", "no".to_string()),
                (STATE_ATTR, "error".to_string()),
                (UNIT_ATTR, unit.id.to_string()),
                (ERROR_ATTR, detail.clone()),
                (RETRY_ATTR, unit.id.to_string()),
                ("title", detail),
            ],
        );
        append_child(&indicator, &create_text(" ⚠"));
        indicator
    }

    /// 取出失败单元用于重试，同时移除错误提示
    pub fn take_failed(&mut self, id: UnitId) -> Option<TranslationUnit> {
        let failed = self.failed.remove(&id)?;
        remove_from_parent(&failed.indicator);
        Some(failed.unit)
    }

    /// 取出全部失败单元
    pub fn take_all_failed(&mut self) -> Vec<TranslationUnit> {
        let ids = self.failed_ids();
        ids.into_iter().filter_map(|id| self.take_failed(id)).collect()
    }

    /// 关闭错误提示，不再重试
    pub fn dismiss(&mut self, id: UnitId) -> bool {
        match self.failed.remove(&id) {
            Some(failed) => {
                remove_from_parent(&failed.indicator);
                self.stats.dismissed += 1;
                true
            }
            None => false,
        }
    }

    /// 撤销一个单元的译文，恢复原始内容
    pub fn restore(&mut self, id: UnitId) -> bool {
        let Some(applied) = self.applied.remove(&id) else {
            return false;
        };

        match applied.replaced {
            Some(original) => replace_children(&applied.target, original),
            None => {
                if get_parent(&applied.inserted).is_some() {
                    remove_from_parent(&applied.inserted);
                }
            }
        }
        self.stats.restored += 1;
        true
    }

    /// 撤销全部译文和错误提示
    pub fn restore_all(&mut self) -> usize {
        let ids: Vec<UnitId> = self.applied.keys().copied().collect();
        let restored = ids.into_iter().filter(|id| self.restore(*id)).count();

        for (_, failed) in std::mem::take(&mut self.failed) {
            remove_from_parent(&failed.indicator);
        }
        restored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::html::{find_nodes, get_node_attr, html_to_dom, serialize_document};
    use crate::translation::config::TranslationConfig;
    use crate::translation::pipeline::walker::TreeWalker;

    fn setup(html: &str, mode: TranslationMode) -> (markup5ever_rcdom::RcDom, Vec<TranslationUnit>, ResultApplier) {
        let dom = html_to_dom(html.as_bytes(), "utf-8").unwrap();
        let walker = TreeWalker::new(dom.document.clone(), &TranslationConfig::default(), None).unwrap();
        let units: Vec<_> = walker.collect();
        let applier = ResultApplier::new(dom.document.clone(), mode, "default");
        (dom, units, applier)
    }

    fn html(dom: &markup5ever_rcdom::RcDom) -> String {
        String::from_utf8(serialize_document(&dom.document, "utf-8").unwrap()).unwrap()
    }

    #[test]
    fn test_append_below_block_and_inline() {
        let (dom, units, mut applier) = setup("<p>Hello world</p><span>Click here</span>", TranslationMode::AppendBelow);
        assert_eq!(units.len(), 2);

        for unit in &units {
            let outcome = UnitOutcome::Translated(unit.source_text.to_uppercase());
            assert_eq!(applier.apply(unit, &outcome), ApplyStatus::Applied);
        }

        let p = find_nodes(&dom.document, &["p"]).remove(0);
        let inserted = p.children.borrow().last().cloned().unwrap();
        assert_eq!(get_node_attr(&inserted, STATE_ATTR).as_deref(), Some("translated"));
        assert_eq!(get_node_attr(&inserted, "translate").as_deref(), Some("no"));
        let style = get_node_attr(&inserted, STYLE_ATTR).unwrap();
        assert!(style.contains("\"display\":\"block\""));
        assert!(style.contains("\"mode\":\"append-below\""));

        let output = html(&dom);
        assert!(output.contains("Hello world<span"));
        assert!(output.contains("HELLO WORLD</span></p>"));
        assert!(output.contains("Click here</span><span"));
        assert!(output.contains("> CLICK HERE</span>"));
    }

    #[test]
    fn test_replace_and_restore() {
        let (dom, units, mut applier) = setup("<p>Hello <b>bold</b> world</p>", TranslationMode::Replace);
        applier.apply(&units[0], &UnitOutcome::Translated("你好世界".to_string()));

        let output = html(&dom);
        assert!(!output.contains("<b>bold</b>"));
        assert!(output.contains("你好世界"));

        assert!(applier.restore(units[0].id));
        assert!(html(&dom).contains("<p data-pt-walked=\"1\">Hello <b>bold</b> world</p>"));
        assert!(!applier.restore(units[0].id));
    }

    #[test]
    fn test_overlay_inserted_first() {
        let (dom, units, mut applier) = setup("<h2>Title</h2>", TranslationMode::Overlay);
        applier.apply(&units[0], &UnitOutcome::Translated("标题".to_string()));

        let h2 = find_nodes(&dom.document, &["h2"]).remove(0);
        let first = h2.children.borrow()[0].clone();
        assert_eq!(get_node_attr(&first, UNIT_ATTR), Some(units[0].id.to_string()));
        assert_eq!(h2.children.borrow().len(), 2);
    }

    #[test]
    fn test_failure_indicator_and_retry() {
        let (dom, units, mut applier) = setup("<p>Hello world</p>", TranslationMode::AppendBelow);
        let unit = &units[0];
        let error = TranslationError::ProviderError("service down".to_string());

        assert_eq!(applier.apply(unit, &UnitOutcome::Failed(error)), ApplyStatus::Failed);
        let output = html(&dom);
        assert!(output.contains("data-pt-state=\"error\""));
        assert!(output.contains("service down"));
        assert_eq!(applier.failed_ids(), vec![unit.id]);

        let retried = applier.take_failed(unit.id).unwrap();
        assert!(!html(&dom).contains("data-pt-state=\"error\""));

        assert_eq!(
            applier.apply(&retried, &UnitOutcome::Translated("你好".to_string())),
            ApplyStatus::Applied
        );
        assert!(applier.failed_ids().is_empty());
    }

    #[test]
    fn test_dismiss_removes_indicator() {
        let (dom, units, mut applier) = setup("<p>Hello world</p>", TranslationMode::AppendBelow);
        applier.apply(&units[0], &UnitOutcome::Failed(TranslationError::TimeoutError("slow".to_string())));

        assert!(applier.dismiss(units[0].id));
        assert!(!html(&dom).contains("pt-error"));
        assert_eq!(applier.stats().dismissed, 1);
    }

    #[test]
    fn test_detached_and_stopped() {
        let (dom, units, mut applier) = setup("<p>First one</p><p>Second one</p>", TranslationMode::AppendBelow);
        let second = find_nodes(&dom.document, &["p"]).remove(1);
        remove_from_parent(&second);

        let outcome = UnitOutcome::Translated("x".to_string());
        assert_eq!(applier.apply(&units[1], &outcome), ApplyStatus::Detached);
        assert_eq!(applier.apply(&units[0], &outcome), ApplyStatus::Applied);
        assert_eq!(applier.apply(&units[0], &outcome), ApplyStatus::AlreadyApplied);

        applier.stop();
        assert_eq!(applier.restore_all(), 1);
        assert_eq!(applier.apply(&units[0], &outcome), ApplyStatus::Stopped);
    }
}
