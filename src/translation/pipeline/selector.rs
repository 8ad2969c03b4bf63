//! 站点选择器
//!
//! 解析并匹配按主机名配置的“不进入”选择器。支持的语法：
//! 类型选择器、`*`、`#id`、`.class`、`[attr]`、`[attr=value]`、`[attr~=value]`、
//! 后代组合符（空白）以及逗号分隔的选择器列表。

use cssparser::{ParseError, Parser, ParserInput, Token};
use markup5ever_rcdom::Handle;

use crate::parsers::html::{get_node_attr, get_node_name, get_parent, has_class};
use crate::translation::error::{TranslationError, TranslationResult};

/// 属性匹配方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrMatch {
    Exists,
    Equals(String),
    Includes(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrSelector {
    pub name: String,
    pub matcher: AttrMatch,
}

/// 复合选择器，如 `div.note[data-x]`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Compound {
    pub tag: Option<String>,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub attrs: Vec<AttrSelector>,
    universal: bool,
}

impl Compound {
    fn is_empty(&self) -> bool {
        !self.universal
            && self.tag.is_none()
            && self.id.is_none()
            && self.classes.is_empty()
            && self.attrs.is_empty()
    }

    fn matches(&self, node: &Handle) -> bool {
        let Some(name) = get_node_name(node) else {
            return false;
        };

        if let Some(tag) = &self.tag {
            if !name.eq_ignore_ascii_case(tag) {
                return false;
            }
        }

        if let Some(id) = &self.id {
            if get_node_attr(node, "id").as_deref() != Some(id.as_str()) {
                return false;
            }
        }

        if !self.classes.iter().all(|class| has_class(node, class)) {
            return false;
        }

        self.attrs.iter().all(|attr| {
            let value = get_node_attr(node, &attr.name);
            match (&attr.matcher, value) {
                (_, None) => false,
                (AttrMatch::Exists, Some(_)) => true,
                (AttrMatch::Equals(expected), Some(value)) => &value == expected,
                (AttrMatch::Includes(expected), Some(value)) => {
                    value.split_ascii_whitespace().any(|word| word == expected)
                }
            }
        })
    }
}

/// 由后代组合符连接的复合选择器序列，最后一个是匹配主体
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplexSelector {
    pub parts: Vec<Compound>,
}

impl ComplexSelector {
    fn matches(&self, node: &Handle) -> bool {
        let Some((subject, ancestors)) = self.parts.split_last() else {
            return false;
        };

        if !subject.matches(node) {
            return false;
        }

        // 只有后代组合符，从右向左贪心匹配即可
        let mut remaining = ancestors.iter().rev().peekable();
        let mut current = get_parent(node);
        while let Some(compound) = remaining.peek() {
            let Some(ancestor) = current else {
                return false;
            };
            if compound.matches(&ancestor) {
                remaining.next();
            }
            current = get_parent(&ancestor);
        }

        true
    }
}

/// 逗号分隔的选择器列表
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectorList {
    pub selectors: Vec<ComplexSelector>,
}

impl SelectorList {
    /// 解析一条选择器文本
    pub fn parse(source: &str) -> TranslationResult<Self> {
        let invalid = |detail: String| {
            TranslationError::ConfigError(format!("无效的选择器 '{}': {}", source, detail))
        };

        let mut input = ParserInput::new(source);
        let mut parser = Parser::new(&mut input);

        let mut selectors = Vec::new();
        let mut parts: Vec<Compound> = Vec::new();
        let mut current = Compound::default();

        loop {
            let token = match parser.next_including_whitespace() {
                Ok(token) => token.clone(),
                Err(_) => break,
            };

            match token {
                Token::WhiteSpace(_) => {
                    if !current.is_empty() {
                        parts.push(std::mem::take(&mut current));
                    }
                }
                Token::Ident(name) => {
                    if !current.is_empty() {
                        return Err(invalid(format!("类型选择器 '{}' 必须位于开头", name)));
                    }
                    current.tag = Some(name.to_ascii_lowercase());
                }
                Token::Delim('*') => {
                    if !current.is_empty() {
                        return Err(invalid("'*' 必须位于开头".to_string()));
                    }
                    current.universal = true;
                }
                Token::IDHash(id) => current.id = Some(id.to_string()),
                Token::Delim('.') => match parser.next_including_whitespace() {
                    Ok(Token::Ident(class)) => current.classes.push(class.to_string()),
                    _ => return Err(invalid("'.' 后缺少类名".to_string())),
                },
                Token::SquareBracketBlock => {
                    let attr = parser
                        .parse_nested_block(parse_attribute)
                        .map_err(|e| invalid(format!("{:?}", e.kind)))?;
                    current.attrs.push(attr);
                }
                Token::Comma => {
                    if !current.is_empty() {
                        parts.push(std::mem::take(&mut current));
                    }
                    if parts.is_empty() {
                        return Err(invalid("逗号前缺少选择器".to_string()));
                    }
                    selectors.push(ComplexSelector {
                        parts: std::mem::take(&mut parts),
                    });
                }
                other => return Err(invalid(format!("不支持的语法 {:?}", other))),
            }
        }

        if !current.is_empty() {
            parts.push(current);
        }
        if !parts.is_empty() {
            selectors.push(ComplexSelector { parts });
        }
        if selectors.is_empty() {
            return Err(invalid("选择器为空".to_string()));
        }

        Ok(Self { selectors })
    }

    /// 解析多条选择器并合并
    pub fn parse_all<S: AsRef<str>>(sources: &[S]) -> TranslationResult<Self> {
        let mut list = Self::default();
        for source in sources {
            list.selectors.extend(Self::parse(source.as_ref())?.selectors);
        }
        Ok(list)
    }

    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }

    /// 是否有任一选择器匹配该元素
    pub fn matches(&self, node: &Handle) -> bool {
        self.selectors.iter().any(|selector| selector.matches(node))
    }
}

fn parse_attribute<'i>(parser: &mut Parser<'i, '_>) -> Result<AttrSelector, ParseError<'i, ()>> {
    let name = parser.expect_ident()?.to_ascii_lowercase();

    if parser.is_exhausted() {
        return Ok(AttrSelector {
            name,
            matcher: AttrMatch::Exists,
        });
    }

    let location = parser.current_source_location();
    let include = match parser.next()? {
        Token::Delim('=') => false,
        Token::IncludeMatch => true,
        other => return Err(location.new_unexpected_token_error(other.clone())),
    };

    let value = parser.expect_ident_or_string()?.to_string();
    parser.expect_exhausted()?;

    Ok(AttrSelector {
        name,
        matcher: if include {
            AttrMatch::Includes(value)
        } else {
            AttrMatch::Equals(value)
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::html::{find_nodes, html_to_dom};

    #[test]
    fn test_parse_compound_and_list() {
        let list = SelectorList::parse("div.note#top[data-x], nav .menu").unwrap();
        assert_eq!(list.selectors.len(), 2);

        let first = &list.selectors[0].parts[0];
        assert_eq!(first.tag.as_deref(), Some("div"));
        assert_eq!(first.id.as_deref(), Some("top"));
        assert_eq!(first.classes, vec!["note"]);
        assert_eq!(first.attrs[0].matcher, AttrMatch::Exists);

        assert_eq!(list.selectors[1].parts.len(), 2);
    }

    #[test]
    fn test_invalid_selectors() {
        assert!(SelectorList::parse("").is_err());
        assert!(SelectorList::parse("div > p").is_err());
        assert!(SelectorList::parse(".").is_err());
        assert!(SelectorList::parse(", p").is_err());
    }

    #[test]
    fn test_matching() {
        let dom = html_to_dom(
            b"<nav><ul class=\"menu main\"><li id=\"x\" data-role=\"tab item\">A</li></ul></nav><p class=\"menu\">B</p>",
            "utf-8",
        )
        .unwrap();
        let li = find_nodes(&dom.document, &["li"]).remove(0);
        let p = find_nodes(&dom.document, &["p"]).remove(0);

        let descendant = SelectorList::parse("nav li").unwrap();
        assert!(descendant.matches(&li));
        assert!(!descendant.matches(&p));

        assert!(SelectorList::parse("[data-role~=tab]").unwrap().matches(&li));
        assert!(!SelectorList::parse("[data-role=tab]").unwrap().matches(&li));
        assert!(SelectorList::parse("#x").unwrap().matches(&li));
        assert!(SelectorList::parse("*").unwrap().matches(&p));
        assert!(SelectorList::parse("nav .menu li").unwrap().matches(&li));
        assert!(!SelectorList::parse("nav .menu").unwrap().matches(&p));
    }
}
