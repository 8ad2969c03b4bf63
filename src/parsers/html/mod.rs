//! HTML解析和处理模块
//!
//! - `dom`: 基础DOM操作（解析、属性、插入移除、存活检查、文本提取）
//! - `serializer`: 序列化功能

pub mod dom;
pub mod serializer;

pub use dom::{
    append_child, collapse_whitespace, create_element, create_text, find_nodes, flattened_text,
    get_charset, get_node_attr, get_node_name, get_parent, has_class, html_to_dom, insert_after,
    is_attached, remove_from_parent, replace_children, set_node_attr, take_children,
};
pub use serializer::serialize_document;
