// 集成测试公共模块
//
// 提供测试配置、HTML 样例、模拟翻译服务和断言辅助

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use markup5ever_rcdom::{Handle, RcDom};
use tokio::time::Instant;

use page_translator::parsers::html::{find_nodes, flattened_text, get_node_attr};
use page_translator::parsers::{html_to_dom, serialize_document};
use page_translator::translation::pipeline::STATE_ATTR;
use page_translator::translation::{TranslateProvider, TranslationConfig, TranslationError, TranslationResult};

/// 测试配置构建器
pub struct TestConfigBuilder {
    config: TranslationConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: TranslationConfig::default_with_lang("zh", Some("http://localhost:1188/translate")),
        }
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.config.batch_queue.max_items_per_batch = max_items;
        self
    }

    pub fn with_max_characters(mut self, max_characters: usize) -> Self {
        self.config.batch_queue.max_characters_per_batch = max_characters;
        self
    }

    pub fn with_rate_limit(mut self, capacity: usize, rate: f64) -> Self {
        self.config.request_queue.capacity = capacity;
        self.config.request_queue.rate = rate;
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, base_delay_ms: u64) -> Self {
        self.config.retry.max_attempts = max_attempts;
        self.config.retry.base_delay_ms = base_delay_ms;
        self
    }

    pub fn with_cache_path(mut self, path: &str) -> Self {
        self.config.cache.path = Some(path.to_string());
        self
    }

    pub fn with_site_rule(mut self, host: &str, selectors: &[&str]) -> Self {
        self.config.dont_walk_into.push(page_translator::translation::config::SiteRule {
            host: host.to_string(),
            selectors: selectors.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    pub fn build(self) -> TranslationConfig {
        self.config
    }
}

// ============================================================================
// 模拟翻译服务
// ============================================================================

/// 一次翻译请求的记录
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub texts: Vec<String>,
    pub at: Instant,
}

/// 把文本转成大写的翻译服务，可配置前几次调用失败
pub struct UppercaseProvider {
    calls: Mutex<Vec<RecordedCall>>,
    failures_left: Mutex<usize>,
    delay: Duration,
}

impl UppercaseProvider {
    pub fn new() -> Self {
        Self::failing_first(0)
    }

    /// 前 `failures` 次调用返回服务错误
    pub fn failing_first(failures: usize) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failures_left: Mutex::new(failures),
            delay: Duration::ZERO,
        }
    }

    /// 每次调用先等待 `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// 所有请求中发送过的文本，按发送顺序
    pub fn sent_texts(&self) -> Vec<String> {
        self.calls().into_iter().flat_map(|call| call.texts).collect()
    }

    /// 每次请求的条目数
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.calls().iter().map(|call| call.texts.len()).collect()
    }
}

#[async_trait(?Send)]
impl TranslateProvider for UppercaseProvider {
    fn identity(&self) -> String {
        "uppercase".to_string()
    }

    async fn translate(&self, texts: &[String], _source: &str, _target: &str) -> TranslationResult<Vec<String>> {
        self.calls.lock().unwrap().push(RecordedCall {
            texts: texts.to_vec(),
            at: Instant::now(),
        });

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        {
            let mut failures_left = self.failures_left.lock().unwrap();
            if *failures_left > 0 {
                *failures_left -= 1;
                return Err(TranslationError::ProviderError("模拟服务不可用".to_string()));
            }
        }

        Ok(texts.iter().map(|t| t.to_uppercase()).collect())
    }
}

/// 返回条目数不匹配的翻译服务
pub struct ShortResponseProvider;

#[async_trait(?Send)]
impl TranslateProvider for ShortResponseProvider {
    fn identity(&self) -> String {
        "short".to_string()
    }

    async fn translate(&self, texts: &[String], _source: &str, _target: &str) -> TranslationResult<Vec<String>> {
        Ok(texts.iter().skip(1).cloned().collect())
    }
}

// ============================================================================
// HTML 辅助
// ============================================================================

/// HTML测试辅助工具
pub struct HtmlTestHelper;

impl HtmlTestHelper {
    pub fn parse(html: &str) -> RcDom {
        html_to_dom(html.as_bytes(), "utf-8").unwrap()
    }

    pub fn serialize(document: &Handle) -> String {
        String::from_utf8(serialize_document(document, "utf-8").unwrap()).unwrap()
    }

    /// 五个段落的页面
    pub fn five_paragraphs() -> &'static str {
        r#"<!DOCTYPE html>
<html>
<head><title>Paragraphs</title></head>
<body>
  <p>First paragraph here</p>
  <p>Second paragraph here</p>
  <p>Third paragraph here</p>
  <p>Fourth paragraph here</p>
  <p>Fifth paragraph here</p>
</body>
</html>"#
    }

    /// 含脚本、样式、代码块和 notranslate 内容的页面
    pub fn mixed_page() -> &'static str {
        r#"<!DOCTYPE html>
<html>
<head>
  <title>Mixed</title>
  <style>body { color: red; }</style>
  <script>var hidden = "script text";</script>
</head>
<body>
  <h1>Visible heading</h1>
  <p class="notranslate">Brand name stays</p>
  <div translate="no"><p>Opted out block</p></div>
  <pre>let code = 1;</pre>
  <textarea>Typed input text</textarea>
  <p>Normal <a href="/x">linked</a> content</p>
  <nav class="site-nav"><p>Navigation item</p></nav>
</body>
</html>"#
    }

    /// 带有 `data-pt-state` 的译文节点的文本
    pub fn translated_texts(document: &Handle) -> Vec<String> {
        Self::spans_with_state(document, "translated")
            .iter()
            .map(|span| flattened_text(span, &|_| false).unwrap())
            .collect()
    }

    pub fn spans_with_state(document: &Handle, state: &str) -> Vec<Handle> {
        find_nodes(document, &["span"])
            .into_iter()
            .filter(|span| get_node_attr(span, STATE_ATTR).as_deref() == Some(state))
            .collect()
    }

    /// 段落节点，按文档顺序
    pub fn paragraphs(document: &Handle) -> Vec<Handle> {
        find_nodes(document, &["p"])
    }

    /// 节点的直接子元素中是否有译文
    pub fn has_translation_child(node: &Handle) -> bool {
        node.children
            .borrow()
            .iter()
            .any(|child| get_node_attr(child, STATE_ATTR).as_deref() == Some("translated"))
    }
}

/// 请求时间相对起点的偏移（毫秒）
pub fn offsets_ms(calls: &[RecordedCall], start: Instant) -> Vec<u128> {
    calls.iter().map(|call| call.at.duration_since(start).as_millis()).collect()
}
