use std::cell::RefCell;
use std::rc::Rc;

use encoding_rs::Encoding;
use html5ever::interface::{Attribute, QualName};
use html5ever::parse_document;
use html5ever::tendril::{format_tendril, StrTendril, TendrilSink};
use html5ever::{namespace_url, ns, LocalName};
use markup5ever_rcdom::{Handle, Node, NodeData, RcDom};

use crate::translation::error::{TranslationError, TranslationResult};

/// 将 HTML 字节转换为 DOM
pub fn html_to_dom(data: &[u8], document_encoding: &str) -> TranslationResult<RcDom> {
    let s = match Encoding::for_label(document_encoding.as_bytes()) {
        Some(encoding) => encoding.decode(data).0.into_owned(),
        None => String::from_utf8_lossy(data).into_owned(),
    };

    parse_document(RcDom::default(), Default::default())
        .from_utf8()
        .read_from(&mut s.as_bytes())
        .map_err(|e| TranslationError::ParseError(format!("HTML解析失败: {}", e)))
}

/// 查找指定路径的DOM节点
pub fn find_nodes(node: &Handle, node_names: &[&str]) -> Vec<Handle> {
    let mut found_nodes = Vec::new();
    let Some((node_name, rest)) = node_names.split_first() else {
        return found_nodes;
    };

    // 路径上的下一段只在当前节点匹配时才推进
    let remaining = if get_node_name(node) == Some(*node_name) {
        if rest.is_empty() {
            found_nodes.push(node.clone());
            node_names
        } else {
            rest
        }
    } else {
        node_names
    };

    for child_node in node.children.borrow().iter() {
        found_nodes.append(&mut find_nodes(child_node, remaining));
    }

    found_nodes
}

/// 读取文档声明的字符集
pub fn get_charset(node: &Handle) -> Option<String> {
    for meta_node in find_nodes(node, &["html", "head", "meta"]).iter() {
        if let Some(charset) = get_node_attr(meta_node, "charset") {
            return Some(charset);
        }

        if get_node_attr(meta_node, "http-equiv")
            .unwrap_or_default()
            .eq_ignore_ascii_case("content-type")
        {
            if let Some(content) = get_node_attr(meta_node, "content") {
                let charset = content.split(';').find_map(|part| {
                    let (key, value) = part.split_once('=')?;
                    key.trim()
                        .eq_ignore_ascii_case("charset")
                        .then(|| value.trim().trim_matches('"').to_string())
                });
                if charset.is_some() {
                    return charset;
                }
            }
        }
    }

    None
}

/// 获取节点属性值
pub fn get_node_attr(node: &Handle, attr_name: &str) -> Option<String> {
    match &node.data {
        NodeData::Element { attrs, .. } => attrs
            .borrow()
            .iter()
            .find(|attr| &*attr.name.local == attr_name)
            .map(|attr| attr.value.to_string()),
        _ => None,
    }
}

/// 节点 class 属性中是否包含指定类名
pub fn has_class(node: &Handle, class_name: &str) -> bool {
    get_node_attr(node, "class")
        .map(|classes| classes.split_ascii_whitespace().any(|c| c == class_name))
        .unwrap_or(false)
}

/// 获取节点名称
pub fn get_node_name(node: &Handle) -> Option<&'_ str> {
    match &node.data {
        NodeData::Element { name, .. } => Some(name.local.as_ref()),
        _ => None,
    }
}

/// 获取父节点（不清空父指针）
pub fn get_parent(child: &Handle) -> Option<Handle> {
    let weak = child.parent.take();
    let parent = weak.as_ref().and_then(|node| node.upgrade());
    child.parent.set(weak);
    parent
}

/// 节点是否仍挂在 `root` 之下
pub fn is_attached(node: &Handle, root: &Handle) -> bool {
    let mut current = node.clone();
    loop {
        if Rc::ptr_eq(&current, root) {
            return true;
        }

        let Some(parent) = get_parent(&current) else {
            return false;
        };

        // 父指针存在但已不在父节点的子列表中，说明已被移除
        let listed = match parent.children.try_borrow() {
            Ok(children) => children.iter().any(|c| Rc::ptr_eq(c, &current)),
            Err(_) => false,
        };
        if !listed {
            return false;
        }

        current = parent;
    }
}

/// 设置节点属性，`None` 表示删除
pub fn set_node_attr(node: &Handle, attr_name: &str, attr_value: Option<String>) {
    if let NodeData::Element { attrs, .. } = &node.data {
        let mut attrs_mut = attrs.borrow_mut();

        match attr_value {
            Some(value) => {
                if let Some(existing) = attrs_mut
                    .iter_mut()
                    .find(|attr| &*attr.name.local == attr_name)
                {
                    existing.value.clear();
                    existing.value.push_slice(value.as_str());
                } else {
                    attrs_mut.push(Attribute {
                        name: QualName::new(None, ns!(), LocalName::from(attr_name)),
                        value: format_tendril!("{}", value),
                    });
                }
            }
            None => attrs_mut.retain(|attr| &*attr.name.local != attr_name),
        }
    }
}

/// 创建 HTML 元素节点
pub fn create_element(tag: &str, attrs: &[(&str, String)]) -> Handle {
    let attrs = attrs
        .iter()
        .map(|(name, value)| Attribute {
            name: QualName::new(None, ns!(), LocalName::from(*name)),
            value: format_tendril!("{}", value),
        })
        .collect();

    Node::new(NodeData::Element {
        name: QualName::new(None, ns!(html), LocalName::from(tag)),
        attrs: RefCell::new(attrs),
        template_contents: RefCell::new(None),
        mathml_annotation_xml_integration_point: false,
    })
}

/// 创建文本节点
pub fn create_text(text: &str) -> Handle {
    Node::new(NodeData::Text {
        contents: RefCell::new(StrTendril::from_slice(text)),
    })
}

fn adopt(parent: &Handle, child: &Handle) {
    child.parent.set(Some(Rc::downgrade(parent)));
}

/// 追加子节点
pub fn append_child(parent: &Handle, child: &Handle) {
    remove_from_parent(child);
    adopt(parent, child);
    parent.children.borrow_mut().push(child.clone());
}

/// 在 `reference` 之后插入兄弟节点，`reference` 无父节点时返回 false
pub fn insert_after(reference: &Handle, new_node: &Handle) -> bool {
    let Some(parent) = get_parent(reference) else {
        return false;
    };

    remove_from_parent(new_node);
    let mut children = parent.children.borrow_mut();
    let Some(index) = children.iter().position(|c| Rc::ptr_eq(c, reference)) else {
        return false;
    };

    adopt(&parent, new_node);
    children.insert(index + 1, new_node.clone());
    true
}

/// 从父节点中移除，返回是否确实移除了
pub fn remove_from_parent(node: &Handle) -> bool {
    let Some(parent) = get_parent(node) else {
        return false;
    };

    node.parent.set(None);
    let mut children = parent.children.borrow_mut();
    let before = children.len();
    children.retain(|c| !Rc::ptr_eq(c, node));
    before != children.len()
}

/// 取出全部子节点
pub fn take_children(parent: &Handle) -> Vec<Handle> {
    let children = std::mem::take(&mut *parent.children.borrow_mut());
    for child in &children {
        child.parent.set(None);
    }
    children
}

/// 用给定节点替换全部子节点
pub fn replace_children(parent: &Handle, children: Vec<Handle>) {
    take_children(parent);
    for child in &children {
        remove_from_parent(child);
        adopt(parent, child);
    }
    *parent.children.borrow_mut() = children;
}

/// 折叠后的文本内容
///
/// `skip` 返回 true 的元素连同子树一起忽略。节点在读取过程中被借用或移除时
/// 返回 `ExtractionFailure`。
pub fn flattened_text<F>(node: &Handle, skip: &F) -> TranslationResult<String>
where
    F: Fn(&Handle) -> bool,
{
    let mut raw = String::new();
    collect_text(node, skip, &mut raw)?;
    Ok(collapse_whitespace(&raw))
}

fn collect_text<F>(node: &Handle, skip: &F, out: &mut String) -> TranslationResult<()>
where
    F: Fn(&Handle) -> bool,
{
    match &node.data {
        NodeData::Text { contents } => {
            let contents = contents.try_borrow().map_err(|_| {
                TranslationError::ExtractionFailure("文本节点正在被修改".to_string())
            })?;
            out.push_str(&contents);
        }
        NodeData::Element { name, .. } => {
            // 换行和分隔线本身不含文本，但会分开两侧的词
            if matches!(&*name.local, "br" | "hr") {
                out.push(' ');
                return Ok(());
            }

            if skip(node) {
                return Ok(());
            }

            let children = node.children.try_borrow().map_err(|_| {
                TranslationError::ExtractionFailure(format!("<{}> 的子节点正在被修改", &*name.local))
            })?;
            for child in children.iter() {
                collect_text(child, skip, out)?;
            }
        }
        _ => {}
    }

    Ok(())
}

/// 将连续空白压缩为单个空格并去掉首尾空白
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(dom: &RcDom) -> Handle {
        find_nodes(&dom.document, &["html", "body"])
            .into_iter()
            .next()
            .unwrap()
    }

    #[test]
    fn test_parent_lookup_keeps_link() {
        let dom = html_to_dom(b"<p>hi</p>", "utf-8").unwrap();
        let p = find_nodes(&dom.document, &["p"]).remove(0);

        let first = get_parent(&p).unwrap();
        let second = get_parent(&p).unwrap();
        assert!(Rc::ptr_eq(&first, &second));
        assert!(is_attached(&p, &dom.document));
    }

    #[test]
    fn test_insert_and_remove() {
        let dom = html_to_dom(b"<p>one</p><p>two</p>", "utf-8").unwrap();
        let body = body(&dom);
        let first = find_nodes(&body, &["p"]).remove(0);

        let span = create_element("span", &[("class", "x".to_string())]);
        append_child(&span, &create_text("new"));
        assert!(insert_after(&first, &span));
        assert_eq!(body.children.borrow().len(), 3);
        assert!(is_attached(&span, &dom.document));

        assert!(remove_from_parent(&span));
        assert!(!is_attached(&span, &dom.document));
        assert!(!remove_from_parent(&span));
    }

    #[test]
    fn test_flattened_text_skips_and_collapses() {
        let dom = html_to_dom(
            b"<div>Hello <b>big</b>\n  <i hidden>secret</i> world</div>",
            "utf-8",
        )
        .unwrap();
        let div = find_nodes(&dom.document, &["div"]).remove(0);

        let text = flattened_text(&div, &|n: &Handle| get_node_attr(n, "hidden").is_some()).unwrap();
        assert_eq!(text, "Hello big world");
    }

    #[test]
    fn test_flattened_text_breaks_are_separators() {
        let dom = html_to_dom(b"<p>first<br>second<br/>third</p>", "utf-8").unwrap();
        let p = find_nodes(&dom.document, &["p"]).remove(0);

        // 跳过规则覆盖全部元素时换行仍然分词
        let text = flattened_text(&p, &|_: &Handle| true).unwrap();
        assert_eq!(text, "first second third");
    }

    #[test]
    fn test_set_and_clear_attr() {
        let dom = html_to_dom(b"<p class=\"a notranslate\">x</p>", "utf-8").unwrap();
        let p = find_nodes(&dom.document, &["p"]).remove(0);

        assert!(has_class(&p, "notranslate"));
        set_node_attr(&p, "data-x", Some("1".to_string()));
        assert_eq!(get_node_attr(&p, "data-x").as_deref(), Some("1"));
        set_node_attr(&p, "data-x", None);
        assert_eq!(get_node_attr(&p, "data-x"), None);
    }

    #[test]
    fn test_charset_from_meta() {
        let dom = html_to_dom(
            b"<html><head><meta http-equiv=\"Content-Type\" content=\"text/html; charset=gbk\"></head></html>",
            "utf-8",
        )
        .unwrap();
        assert_eq!(get_charset(&dom.document).as_deref(), Some("gbk"));
    }
}
