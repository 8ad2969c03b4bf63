//! 翻译能力接口
//!
//! 流水线只依赖 [`TranslateProvider`]：输入按顺序排列的原文，输出同样顺序的译文。
//! 内置的 [`DeeplxProvider`] 对接 DeepLX 兼容的 HTTP 接口，一个批次一次请求。
//!
//! ## 索引标记
//!
//! 批次内的文本以空行分隔合并为一段，并在每条前加 `[i]` 标记，
//! 返回结果按标记还原顺序。任一索引缺失视为响应格式错误。

use std::collections::HashMap;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::translation::config::TranslationConfig;
use crate::translation::error::{TranslationError, TranslationResult};

/// 批次内条目的分隔符
pub const SEGMENT_SEPARATOR: &str = "\n\n";

/// 外部翻译能力
#[async_trait(?Send)]
pub trait TranslateProvider {
    /// 影响翻译结果的提供方配置标识，参与指纹计算
    fn identity(&self) -> String;

    /// 翻译一个批次，输出必须与输入一一对应且顺序一致
    async fn translate(&self, texts: &[String], source_lang: &str, target_lang: &str)
        -> TranslationResult<Vec<String>>;
}

// ============================================================================
// DeepLX
// ============================================================================

#[derive(Debug, Serialize)]
struct DeeplxRequest<'a> {
    text: &'a str,
    source_lang: &'a str,
    target_lang: &'a str,
}

#[derive(Debug, Deserialize)]
struct DeeplxResponse {
    code: Option<i64>,
    data: Option<String>,
    message: Option<String>,
}

/// DeepLX 兼容接口
#[derive(Debug, Clone)]
pub struct DeeplxProvider {
    client: reqwest::Client,
    api_url: String,
}

impl DeeplxProvider {
    pub fn new(api_url: impl Into<String>, timeout: std::time::Duration) -> TranslationResult<Self> {
        let api_url = api_url.into();
        url::Url::parse(&api_url)
            .map_err(|e| TranslationError::ConfigError(format!("无效的 API 地址 '{}': {}", api_url, e)))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TranslationError::ConfigError(format!("创建 HTTP 客户端失败: {}", e)))?;

        Ok(Self { client, api_url })
    }

    pub fn from_config(config: &TranslationConfig) -> TranslationResult<Self> {
        Self::new(config.api_url.clone(), config.request_timeout())
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }
}

#[async_trait(?Send)]
impl TranslateProvider for DeeplxProvider {
    fn identity(&self) -> String {
        format!("deeplx:{}", self.api_url)
    }

    async fn translate(
        &self,
        texts: &[String],
        source_lang: &str,
        target_lang: &str,
    ) -> TranslationResult<Vec<String>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let combined = add_index_markers(texts);
        let request = DeeplxRequest {
            text: &combined,
            source_lang: &deeplx_lang(source_lang),
            target_lang: &deeplx_lang(target_lang),
        };

        let response = self.client.post(&self.api_url).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TranslationError::ProviderError(format!("HTTP {}", status)));
        }

        let body: DeeplxResponse = response
            .json()
            .await
            .map_err(|e| TranslationError::ProviderError(format!("响应解析失败: {}", e)))?;

        if let Some(code) = body.code.filter(|code| *code != 200) {
            return Err(TranslationError::ProviderError(format!(
                "接口返回 {}: {}",
                code,
                body.message.unwrap_or_default()
            )));
        }

        let data = body
            .data
            .ok_or_else(|| TranslationError::ProviderError("响应缺少 data 字段".to_string()))?;

        parse_indexed_response(&data, texts.len())
    }
}

/// DeepLX 使用大写语言代码，`auto` 保持不变
fn deeplx_lang(code: &str) -> String {
    if code.eq_ignore_ascii_case("auto") {
        "auto".to_string()
    } else {
        code.to_ascii_uppercase()
    }
}

/// 为每条文本加上 `[i]` 前缀并以空行合并
pub fn add_index_markers(texts: &[String]) -> String {
    texts
        .iter()
        .enumerate()
        .map(|(i, text)| format!("[{}]{}", i, text))
        .collect::<Vec<_>>()
        .join(SEGMENT_SEPARATOR)
}

fn index_regex() -> Option<&'static Regex> {
    static INDEX: OnceLock<Option<Regex>> = OnceLock::new();
    INDEX.get_or_init(|| Regex::new(r"(?s)^\[(\d+)\]\s*(.*)$").ok()).as_ref()
}

/// 按索引标记还原结果顺序
///
/// 某条译文本身含有空行时，后续不带标记的段落并入前一条。
pub fn parse_indexed_response(response: &str, expected: usize) -> TranslationResult<Vec<String>> {
    let regex = index_regex().ok_or_else(|| TranslationError::InternalError("索引正则编译失败".to_string()))?;

    let mut results: HashMap<usize, String> = HashMap::new();
    let mut last: Option<usize> = None;

    for part in response.split(SEGMENT_SEPARATOR) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        let parsed = regex
            .captures(part)
            .and_then(|caps| Some((caps.get(1)?.as_str().parse::<usize>().ok()?, caps.get(2)?.as_str())));

        match (parsed, last) {
            (Some((index, text)), _) if index < expected => {
                results.insert(index, text.trim().to_string());
                last = Some(index);
            }
            (None, Some(index)) => {
                if let Some(existing) = results.get_mut(&index) {
                    existing.push_str(SEGMENT_SEPARATOR);
                    existing.push_str(part);
                }
            }
            _ => tracing::debug!("忽略无法对应的响应片段: {}", part),
        }
    }

    (0..expected)
        .map(|i| {
            results
                .remove(&i)
                .ok_or_else(|| TranslationError::ProviderError(format!("响应缺少第 {} 条译文", i)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markers_and_parse() {
        let texts = vec!["Hello".to_string(), "World".to_string()];
        let combined = add_index_markers(&texts);
        assert_eq!(combined, "[0]Hello\n\n[1]World");

        let parsed = parse_indexed_response("[1] 世界\n\n[0]你好", 2).unwrap();
        assert_eq!(parsed, vec!["你好", "世界"]);
    }

    #[test]
    fn test_missing_index_is_provider_error() {
        let result = parse_indexed_response("[0]你好", 2);
        assert!(matches!(result, Err(TranslationError::ProviderError(_))));
    }

    #[test]
    fn test_unmarked_paragraph_joins_previous() {
        let parsed = parse_indexed_response("[0]第一段\n\n续写\n\n[1]第二段", 2).unwrap();
        assert_eq!(parsed[0], "第一段\n\n续写");
        assert_eq!(parsed[1], "第二段");
    }

    #[test]
    fn test_single_newline_inside_segment() {
        let parsed = parse_indexed_response("[0]first line\nsecond line\n\n[1]ok", 2).unwrap();
        assert_eq!(parsed, vec!["first line\nsecond line", "ok"]);
    }

    #[test]
    fn test_invalid_url_rejected() {
        let result = DeeplxProvider::new("not a url", std::time::Duration::from_secs(1));
        assert!(matches!(result, Err(TranslationError::ConfigError(_))));
    }

    #[test]
    fn test_lang_codes() {
        assert_eq!(deeplx_lang("auto"), "auto");
        assert_eq!(deeplx_lang("zh"), "ZH");
    }
}
