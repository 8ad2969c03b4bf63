//! 文本过滤器模块
//!
//! 判断提取出的文本是否值得发给翻译服务：长度/词数阈值之外，
//! 纯数字符号、URL、邮箱以及已经是目标语言文字的文本都会被跳过。

use std::sync::OnceLock;

use regex::Regex;

use crate::translation::config::{constants, TranslationConfig};

/// 跳过原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterReason {
    TooShort,
    TooFewWords,
    NoLetters,
    Url,
    Email,
    AlreadyTargetScript,
}

/// 目标语言使用的文字
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TargetScript {
    Han,
    Japanese,
    Hangul,
    Other,
}

impl TargetScript {
    fn for_lang(lang: &str) -> Self {
        match lang.split('-').next().unwrap_or_default() {
            "zh" => TargetScript::Han,
            "ja" => TargetScript::Japanese,
            "ko" => TargetScript::Hangul,
            _ => TargetScript::Other,
        }
    }

    fn contains(&self, c: char) -> bool {
        match self {
            TargetScript::Han => is_han(c),
            TargetScript::Japanese => {
                is_han(c) || ('\u{3040}'..='\u{309f}').contains(&c) || ('\u{30a0}'..='\u{30ff}').contains(&c)
            }
            TargetScript::Hangul => ('\u{ac00}'..='\u{d7af}').contains(&c),
            TargetScript::Other => false,
        }
    }
}

fn is_han(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c) || ('\u{3400}'..='\u{4dbf}').contains(&c)
}

fn is_cjk(c: char) -> bool {
    TargetScript::Japanese.contains(c) || TargetScript::Hangul.contains(c)
}

fn url_regex() -> Option<&'static Regex> {
    static URL: OnceLock<Option<Regex>> = OnceLock::new();
    URL.get_or_init(|| Regex::new(r"^(?:(?:https?|ftp)://|www\.)\S+$").ok())
        .as_ref()
}

fn email_regex() -> Option<&'static Regex> {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL
        .get_or_init(|| Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").ok())
        .as_ref()
}

/// 文本过滤器
#[derive(Debug, Clone)]
pub struct TextFilter {
    min_characters: usize,
    min_words: usize,
    target_script: TargetScript,
}

impl TextFilter {
    pub fn new(min_characters: usize, min_words: usize, target_lang: &str) -> Self {
        Self {
            min_characters,
            min_words,
            target_script: TargetScript::for_lang(target_lang),
        }
    }

    pub fn from_config(config: &TranslationConfig) -> Self {
        Self::new(
            config.min_characters_per_node,
            config.min_words_per_node,
            &config.target_lang,
        )
    }

    /// 判断文本是否需要翻译
    pub fn should_translate(&self, text: &str) -> bool {
        self.filter_reason(text).is_none()
    }

    /// 返回跳过原因，需要翻译时为 `None`
    pub fn filter_reason(&self, text: &str) -> Option<FilterReason> {
        let trimmed = text.trim();

        if trimmed.chars().count() < self.min_characters.max(1) {
            return Some(FilterReason::TooShort);
        }

        if !trimmed.chars().any(|c| c.is_alphabetic()) {
            return Some(FilterReason::NoLetters);
        }

        if word_count(trimmed) < self.min_words {
            return Some(FilterReason::TooFewWords);
        }

        if url_regex().is_some_and(|re| re.is_match(trimmed)) {
            return Some(FilterReason::Url);
        }

        if trimmed.len() <= 100 && email_regex().is_some_and(|re| re.is_match(trimmed)) {
            return Some(FilterReason::Email);
        }

        if self.is_already_target_script(trimmed) {
            return Some(FilterReason::AlreadyTargetScript);
        }

        None
    }

    /// 检查是否已经是目标语言文字
    pub fn is_already_target_script(&self, text: &str) -> bool {
        if self.target_script == TargetScript::Other {
            return false;
        }

        let letters: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();
        if letters.is_empty() {
            return false;
        }

        let in_script = letters.iter().filter(|&&c| self.target_script.contains(c)).count();
        in_script as f32 / letters.len() as f32 > constants::CJK_CHAR_THRESHOLD
    }
}

/// 词数，CJK 字符每个算一个词
pub fn word_count(text: &str) -> usize {
    text.split_whitespace()
        .map(|token| {
            let cjk = token.chars().filter(|&c| is_cjk(c)).count();
            let has_other = token.chars().any(|c| c.is_alphanumeric() && !is_cjk(c));
            cjk + usize::from(has_other)
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_filter() -> TextFilter {
        TextFilter::new(2, 1, "zh")
    }

    #[test]
    fn test_should_translate_basic_cases() {
        let filter = create_test_filter();
        assert!(filter.should_translate("Hello world"));
        assert!(filter.should_translate("Go"));
        assert_eq!(filter.filter_reason("a"), Some(FilterReason::TooShort));
        assert_eq!(filter.filter_reason("   "), Some(FilterReason::TooShort));
    }

    #[test]
    fn test_numbers_and_symbols() {
        let filter = create_test_filter();
        assert_eq!(filter.filter_reason("12,345.00"), Some(FilterReason::NoLetters));
        assert_eq!(filter.filter_reason("-- | --"), Some(FilterReason::NoLetters));
    }

    #[test]
    fn test_urls_and_emails() {
        let filter = create_test_filter();
        assert_eq!(filter.filter_reason("https://example.com/a?b=c"), Some(FilterReason::Url));
        assert_eq!(filter.filter_reason("www.example.com"), Some(FilterReason::Url));
        assert_eq!(filter.filter_reason("user@example.com"), Some(FilterReason::Email));
        assert!(filter.should_translate("Visit https://example.com today"));
    }

    #[test]
    fn test_target_script_detection() {
        let zh = create_test_filter();
        assert_eq!(zh.filter_reason("这是中文文本"), Some(FilterReason::AlreadyTargetScript));
        assert!(zh.should_translate("This is English with 一点 中文"));

        let de = TextFilter::new(2, 1, "de");
        assert!(de.should_translate("这是中文文本"));
    }

    #[test]
    fn test_min_words() {
        let filter = TextFilter::new(2, 3, "zh");
        assert_eq!(filter.filter_reason("Hello world"), Some(FilterReason::TooFewWords));
        assert!(filter.should_translate("Hello big world"));
        assert_eq!(word_count("日本語 text"), 4);
    }
}
