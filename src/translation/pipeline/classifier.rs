//! 节点分类器
//!
//! 根据标签名和属性决定节点如何参与遍历和翻译。判断按优先级进行：
//!
//! 1. 内容不可读取或修改的标签（脚本、样式、媒体、代码块等）及隐藏内容 → `SkipSubtree`
//! 2. 站点配置的“不进入”选择器 → `SkipSubtree`
//! 3. 块级标签 → `TranslateAsBlock`
//! 4. 必须保持行内的标签 → `TranslateAsInline`
//! 5. 行内代码类容器 → `TranslateButDontDescend`
//!
//! 其余元素（容器、未知标签）为 `SkipSelfOnly`：自身不成为翻译单元，但继续向下遍历。

use markup5ever_rcdom::{Handle, NodeData};

use super::selector::SelectorList;
use crate::parsers::html::{get_node_attr, get_parent};

/// 分类结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeClass {
    SkipSubtree,
    SkipSelfOnly,
    TranslateAsBlock,
    TranslateAsInline,
    TranslateButDontDescend,
}

impl NodeClass {
    /// 是否会生成翻译单元
    pub fn is_translatable(&self) -> bool {
        matches!(
            self,
            NodeClass::TranslateAsBlock | NodeClass::TranslateAsInline | NodeClass::TranslateButDontDescend
        )
    }

    /// 写回时使用的显示方式
    pub fn display(&self) -> Option<Display> {
        match self {
            NodeClass::TranslateAsBlock => Some(Display::Block),
            NodeClass::TranslateAsInline | NodeClass::TranslateButDontDescend => Some(Display::Inline),
            _ => None,
        }
    }
}

/// 翻译单元的显示方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Display {
    Block,
    Inline,
}

/// 永不读取或修改内容的标签
pub const SKIP_SUBTREE_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "head", "title", "meta", "link", "base", "svg",
    "math", "canvas", "video", "audio", "picture", "source", "track", "iframe", "frame",
    "frameset", "object", "embed", "applet", "map", "area", "img", "input", "textarea", "select",
    "br", "hr", "wbr", "pre", "xmp", "listing", "plaintext",
];

/// 块级标签
pub const BLOCK_TAGS: &[&str] = &[
    "h1", "h2", "h3", "h4", "h5", "h6", "p", "ul", "ol", "dl", "menu", "li", "dt", "dd",
    "blockquote", "figcaption", "caption", "td", "th", "summary", "legend", "address", "div",
    "section", "article", "aside", "header", "footer", "main", "nav", "details", "dialog",
    "figure", "fieldset", "center", "hgroup",
];

/// 必须保持行内的标签
pub const INLINE_TAGS: &[&str] = &[
    "a", "abbr", "b", "bdi", "bdo", "button", "cite", "del", "dfn", "em", "font", "i", "ins",
    "label", "mark", "option", "optgroup", "q", "s", "small", "span", "strong", "sub", "sup",
    "time", "u", "big",
];

/// 行内代码类容器
pub const CODE_LIKE_TAGS: &[&str] = &["code", "kbd", "samp", "var", "tt"];

/// 流水线写入的属性前缀，带这些属性的节点不再处理
pub const STATE_ATTR: &str = "data-pt-state";

/// 隐藏或显式声明不翻译的元素
pub fn is_hidden_or_opted_out(attrs: &[(&str, &str)]) -> bool {
    attrs.iter().any(|(name, value)| match *name {
        "hidden" => true,
        "aria-hidden" => value.trim().eq_ignore_ascii_case("true"),
        "translate" => value.trim().eq_ignore_ascii_case("no"),
        "class" => value.split_ascii_whitespace().any(|c| c == "notranslate"),
        "style" => hides_via_style(value),
        n => n == STATE_ATTR,
    })
}

fn hides_via_style(style: &str) -> bool {
    style.split(';').any(|declaration| {
        let Some((property, value)) = declaration.split_once(':') else {
            return false;
        };
        let value = value.replace("!important", "").trim().to_ascii_lowercase();
        match property.trim().to_ascii_lowercase().as_str() {
            "display" => value == "none",
            "visibility" => value == "hidden",
            _ => false,
        }
    })
}

/// 仅根据标签名和属性分类（不含站点选择器）
///
/// `inside_pre` 表示元素位于 `<pre>` 之内，此时代码类容器也整体跳过。
pub fn classify_tag(tag: &str, attrs: &[(&str, &str)], inside_pre: bool) -> NodeClass {
    let tag = tag.to_ascii_lowercase();
    let tag = tag.as_str();

    if SKIP_SUBTREE_TAGS.contains(&tag) || is_hidden_or_opted_out(attrs) {
        return NodeClass::SkipSubtree;
    }

    if CODE_LIKE_TAGS.contains(&tag) {
        return if inside_pre {
            NodeClass::SkipSubtree
        } else {
            NodeClass::TranslateButDontDescend
        };
    }

    if BLOCK_TAGS.contains(&tag) {
        return NodeClass::TranslateAsBlock;
    }

    if INLINE_TAGS.contains(&tag) {
        return NodeClass::TranslateAsInline;
    }

    NodeClass::SkipSelfOnly
}

/// 结合站点选择器的节点分类器
#[derive(Debug, Clone, Default)]
pub struct NodeClassifier {
    site_selectors: SelectorList,
}

impl NodeClassifier {
    pub fn new(site_selectors: SelectorList) -> Self {
        Self { site_selectors }
    }

    /// 对 DOM 节点分类，非元素节点返回 `SkipSelfOnly`
    pub fn classify(&self, node: &Handle) -> NodeClass {
        let NodeData::Element { name, attrs, .. } = &node.data else {
            return NodeClass::SkipSelfOnly;
        };

        let tag = name.local.as_ref();
        let class = {
            let attrs = attrs.borrow();
            let pairs: Vec<(&str, &str)> = attrs
                .iter()
                .map(|attr| (attr.name.local.as_ref(), attr.value.as_ref()))
                .collect();
            classify_tag(tag, &pairs, false)
        };

        if class == NodeClass::SkipSubtree {
            return class;
        }

        if !self.site_selectors.is_empty() && self.site_selectors.matches(node) {
            return NodeClass::SkipSubtree;
        }

        if class == NodeClass::TranslateButDontDescend && has_ancestor_tag(node, "pre") {
            return NodeClass::SkipSubtree;
        }

        class
    }

    /// 提取文本时需要整体忽略的元素
    pub fn is_skipped(&self, node: &Handle) -> bool {
        matches!(node.data, NodeData::Element { .. }) && self.classify(node) == NodeClass::SkipSubtree
    }
}

fn has_ancestor_tag(node: &Handle, tag: &str) -> bool {
    let mut current = get_parent(node);
    while let Some(parent) = current {
        if let NodeData::Element { name, .. } = &parent.data {
            if name.local.as_ref() == tag {
                return true;
            }
        }
        current = get_parent(&parent);
    }
    false
}

/// 节点是否已被流水线标记
pub fn has_state_marker(node: &Handle) -> bool {
    get_node_attr(node, STATE_ATTR).is_some()
}
