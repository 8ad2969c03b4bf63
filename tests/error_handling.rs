//! 错误处理集成测试
//!
//! 测试配置校验、服务错误、节点移除等情况下流水线的表现

#[allow(dead_code)]
mod common {
    include!("common/mod.rs");
}

use std::rc::Rc;
use std::time::Duration;

use common::{HtmlTestHelper, ShortResponseProvider, TestConfigBuilder, UppercaseProvider};
use page_translator::parsers::html::remove_from_parent;
use page_translator::translation::core::provider::parse_indexed_response;
use page_translator::translation::{
    ErrorCategory, PipelineState, TranslationConfig, TranslationError, TranslationPipeline,
};

#[test]
fn test_invalid_config_is_rejected() {
    let mut config = TranslationConfig::default();
    config.batch_queue.max_items_per_batch = 0;
    let result = TranslationPipeline::new(config, Rc::new(UppercaseProvider::new()));
    assert!(matches!(result, Err(TranslationError::ConfigError(_))));

    let config = TestConfigBuilder::new().with_rate_limit(1, 0.0).build();
    assert!(matches!(config.validate(), Err(TranslationError::ConfigError(_))));

    let config = TestConfigBuilder::new().with_retry(0, 100).build();
    assert!(matches!(config.validate(), Err(TranslationError::ConfigError(_))));

    println!("✅ 配置校验测试通过");
}

#[tokio::test]
async fn test_unsupported_site_selector_fails_before_walking() {
    let config = TestConfigBuilder::new()
        .with_site_rule("example.com", &["div > p"])
        .build();
    let provider = Rc::new(UppercaseProvider::new());
    let pipeline = TranslationPipeline::new(config, Rc::clone(&provider)).unwrap();
    let dom = HtmlTestHelper::parse("<div><p>Never walked</p></div>");

    let result = pipeline.translate_document(&dom.document, Some("example.com")).await;
    let error = result.unwrap_err();
    assert_eq!(error.category(), ErrorCategory::Configuration);
    assert!(!error.is_retryable());
    assert_eq!(provider.call_count(), 0);
    assert_eq!(pipeline.state(), PipelineState::Idle);

    // 规则只对匹配的主机生效
    let report = pipeline.translate_document(&dom.document, Some("other.org")).await.unwrap();
    assert_eq!(report.units_translated, 1);

    println!("✅ 不支持的选择器测试通过");
}

#[tokio::test(start_paused = true)]
async fn test_mismatched_response_marks_every_unit() {
    let config = TestConfigBuilder::new().with_retry(2, 100).build();
    let pipeline = TranslationPipeline::new(config, Rc::new(ShortResponseProvider)).unwrap();
    let dom = HtmlTestHelper::parse("<p>First short one</p><p>Second short one</p>");

    let report = pipeline.translate_document(&dom.document, None).await.unwrap();

    assert_eq!(report.units_failed, 2);
    assert_eq!(report.units_translated, 0);
    assert_eq!(report.queue.failed, 1);
    assert_eq!(report.queue.retries, 1);
    assert_eq!(HtmlTestHelper::spans_with_state(&dom.document, "error").len(), 2);
    assert_eq!(pipeline.cache().size(), 0);

    println!("✅ 结果条目数不匹配测试通过");
}

#[tokio::test(start_paused = true)]
async fn test_removed_node_result_is_dropped() {
    let config = TestConfigBuilder::new().build();
    let provider = Rc::new(UppercaseProvider::new().with_delay(Duration::from_secs(1)));
    let pipeline = TranslationPipeline::new(config, Rc::clone(&provider)).unwrap();
    let dom = HtmlTestHelper::parse("<p>Stays in the page</p><p>Removed before result</p>");
    let doomed = HtmlTestHelper::paragraphs(&dom.document).remove(1);

    let (report, ()) = tokio::join!(pipeline.translate_document(&dom.document, None), async {
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(remove_from_parent(&doomed));
    });
    let report = report.unwrap();

    assert_eq!(report.units_discovered, 2);
    assert_eq!(report.units_translated, 1);
    assert_eq!(report.units_dropped, 1);
    assert_eq!(report.final_state, PipelineState::Settled);
    assert!(!HtmlTestHelper::has_translation_child(&doomed));
    assert_eq!(HtmlTestHelper::translated_texts(&dom.document), vec!["STAYS IN THE PAGE"]);

    println!("✅ 节点移除后丢弃结果测试通过");
}

#[tokio::test]
async fn test_retry_without_document_is_invalid_input() {
    let pipeline = TranslationPipeline::new(TranslationConfig::default(), Rc::new(UppercaseProvider::new())).unwrap();
    let result = pipeline.retry_failed().await;
    assert!(matches!(result, Err(TranslationError::InvalidInput(_))));
    assert!(pipeline.failed_units().is_empty());
    assert_eq!(pipeline.restore_document(), 0);

    println!("✅ 无文档重试测试通过");
}

#[test]
fn test_malformed_provider_response() {
    let result = parse_indexed_response("no markers at all", 2);
    let error = result.unwrap_err();
    assert_eq!(error.category(), ErrorCategory::Provider);
    assert!(error.is_retryable());

    let parsed = parse_indexed_response("[0] 一\n\n[1] 二", 2).unwrap();
    assert_eq!(parsed, vec!["一", "二"]);

    println!("✅ 响应格式错误测试通过");
}

#[test]
fn test_error_context_and_categories() {
    let error = TranslationError::TimeoutError("请求超时".to_string()).with_context("批次 #3");
    assert!(matches!(error, TranslationError::TimeoutError(_)));
    assert!(error.to_string().contains("批次 #3"));
    assert!(error.is_retryable());
    assert_eq!(error.category(), ErrorCategory::Timeout);

    let error = TranslationError::ExtractionFailure("节点已移除".to_string());
    assert!(!error.is_retryable());
    assert_eq!(error.category(), ErrorCategory::Dom);

    println!("✅ 错误分类测试通过");
}
