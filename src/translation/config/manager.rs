//! 配置管理器
//!
//! 提供统一的配置接口，支持文件配置、环境变量和默认值

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use config::{Config, File};
use serde::{Deserialize, Serialize};

use super::constants;
use crate::translation::error::{TranslationError, TranslationResult};

/// 译文写回方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TranslationMode {
    /// 用译文替换原文（原文保留以便恢复）
    Replace,
    /// 在原文之后追加译文
    #[default]
    AppendBelow,
    /// 在原文内部叠加译文层
    Overlay,
}

impl TranslationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranslationMode::Replace => "replace",
            TranslationMode::AppendBelow => "append-below",
            TranslationMode::Overlay => "overlay",
        }
    }
}

impl fmt::Display for TranslationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TranslationMode {
    type Err = TranslationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "replace" => Ok(TranslationMode::Replace),
            "append-below" | "append_below" | "append" => Ok(TranslationMode::AppendBelow),
            "overlay" => Ok(TranslationMode::Overlay),
            other => Err(TranslationError::ConfigError(format!(
                "未知的翻译模式 '{}'，可选: replace, append-below, overlay",
                other
            ))),
        }
    }
}

/// 令牌桶参数
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RequestQueueConfig {
    /// 桶容量（突发上限）
    pub capacity: usize,
    /// 每秒补充的令牌数
    pub rate: f64,
}

impl Default for RequestQueueConfig {
    fn default() -> Self {
        Self {
            capacity: constants::DEFAULT_REQUEST_CAPACITY,
            rate: constants::DEFAULT_REQUEST_RATE,
        }
    }
}

/// 批次边界
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchQueueConfig {
    pub max_characters_per_batch: usize,
    pub max_items_per_batch: usize,
    pub debounce_ms: u64,
}

impl Default for BatchQueueConfig {
    fn default() -> Self {
        Self {
            max_characters_per_batch: constants::DEFAULT_MAX_CHARACTERS_PER_BATCH,
            max_items_per_batch: constants::DEFAULT_MAX_ITEMS_PER_BATCH,
            debounce_ms: constants::DEFAULT_BATCH_DEBOUNCE.as_millis() as u64,
        }
    }
}

/// 按主机名配置的“不进入”选择器
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SiteRule {
    pub host: String,
    pub selectors: Vec<String>,
}

impl SiteRule {
    /// 主机名完全相同或是其子域名
    pub fn matches_host(&self, hostname: &str) -> bool {
        let host = self.host.trim().to_lowercase();
        let hostname = hostname.trim().to_lowercase();
        !host.is_empty()
            && (hostname == host
                || hostname
                    .strip_suffix(host.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.')))
    }
}

/// 缓存策略
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub max_entries: Option<usize>,
    /// 设置后使用 redb 持久化存储
    pub path: Option<String>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: constants::DEFAULT_CACHE_TTL.as_secs(),
            max_entries: Some(constants::DEFAULT_CACHE_MAX_ENTRIES),
            path: None,
        }
    }
}

/// 重试策略
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: constants::DEFAULT_MAX_RETRY_ATTEMPTS,
            base_delay_ms: constants::DEFAULT_RETRY_BASE_DELAY.as_millis() as u64,
        }
    }
}

impl RetrySettings {
    /// 第 `attempt` 次失败后的退避时间（从 0 开始）
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.min(16));
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

/// 解析后的翻译配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TranslationConfig {
    // 基础配置
    pub enabled: bool,
    pub source_lang: String,
    pub target_lang: String,
    pub api_url: String,
    pub request_timeout_secs: u64,

    // 队列与批次
    pub request_queue: RequestQueueConfig,
    pub batch_queue: BatchQueueConfig,

    // 遍历阈值
    pub min_characters_per_node: usize,
    pub min_words_per_node: usize,

    // 写回
    pub translation_mode: TranslationMode,
    pub node_style: String,

    pub dont_walk_into: Vec<SiteRule>,

    pub cache: CacheSettings,
    pub retry: RetrySettings,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            source_lang: "auto".to_string(),
            target_lang: "zh".to_string(),
            api_url: constants::DEFAULT_API_URL.to_string(),
            request_timeout_secs: constants::DEFAULT_REQUEST_TIMEOUT.as_secs(),

            request_queue: RequestQueueConfig::default(),
            batch_queue: BatchQueueConfig::default(),

            min_characters_per_node: constants::DEFAULT_MIN_CHARACTERS_PER_NODE,
            min_words_per_node: constants::DEFAULT_MIN_WORDS_PER_NODE,

            translation_mode: TranslationMode::default(),
            node_style: constants::DEFAULT_NODE_STYLE.to_string(),

            dont_walk_into: Vec::new(),

            cache: CacheSettings::default(),
            retry: RetrySettings::default(),
        }
    }
}

impl TranslationConfig {
    /// 创建带指定语言的默认配置
    pub fn default_with_lang(target_lang: &str, api_url: Option<&str>) -> Self {
        let mut config = Self::default();
        config.target_lang = target_lang.to_string();
        if let Some(url) = api_url {
            config.api_url = url.to_string();
        }
        config
    }

    /// 验证配置
    pub fn validate(&self) -> TranslationResult<()> {
        if self.target_lang.trim().is_empty() {
            return Err(TranslationError::ConfigError("目标语言不能为空".to_string()));
        }

        if self.batch_queue.max_items_per_batch == 0 {
            return Err(TranslationError::ConfigError("每批最大条目数不能为0".to_string()));
        }

        if self.batch_queue.max_characters_per_batch == 0 {
            return Err(TranslationError::ConfigError("每批最大字符数不能为0".to_string()));
        }

        if self.request_queue.capacity == 0 {
            return Err(TranslationError::ConfigError("令牌桶容量不能为0".to_string()));
        }

        if !(self.request_queue.rate > 0.0) || !self.request_queue.rate.is_finite() {
            return Err(TranslationError::ConfigError("请求速率必须大于0".to_string()));
        }

        if self.retry.max_attempts == 0 {
            return Err(TranslationError::ConfigError("重试次数至少为1".to_string()));
        }

        if self.cache.enabled && self.cache.max_entries == Some(0) {
            return Err(TranslationError::ConfigError(
                "启用缓存时缓存大小不能为0".to_string(),
            ));
        }

        if self.dont_walk_into.iter().any(|rule| rule.host.trim().is_empty()) {
            return Err(TranslationError::ConfigError(
                "dont_walk_into 规则缺少主机名".to_string(),
            ));
        }

        Ok(())
    }

    /// 应用环境变量覆盖，只处理显式设置的变量
    pub fn apply_env_overrides(&mut self) {
        use crate::env::{cache, translation, EnvVar};

        fn take<T>(name: &str, value: Option<crate::env::EnvResult<T>>) -> Option<T> {
            match value? {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!("忽略无效的环境变量 {}: {}", name, e.message);
                    None
                }
            }
        }

        // 翻译相关环境变量
        if let Some(enabled) = take(translation::Enabled::NAME, translation::Enabled::get_set()) {
            self.enabled = enabled;
        }

        if let Some(lang) = take(translation::TargetLang::NAME, translation::TargetLang::get_set()) {
            self.target_lang = lang;
        }

        if let Some(lang) = take(translation::SourceLang::NAME, translation::SourceLang::get_set()) {
            self.source_lang = lang;
        }

        if let Some(api_url) = take(translation::ApiUrl::NAME, translation::ApiUrl::get_set()) {
            tracing::info!("环境变量覆盖 API URL: {}", api_url);
            self.api_url = api_url;
        }

        if let Some(rate) = take(translation::RequestRate::NAME, translation::RequestRate::get_set()) {
            self.request_queue.rate = rate;
        }

        if let Some(capacity) = take(
            translation::RequestCapacity::NAME,
            translation::RequestCapacity::get_set(),
        ) {
            self.request_queue.capacity = capacity;
        }

        if let Some(max_chars) = take(
            translation::MaxCharactersPerBatch::NAME,
            translation::MaxCharactersPerBatch::get_set(),
        ) {
            self.batch_queue.max_characters_per_batch = max_chars;
        }

        if let Some(max_items) = take(
            translation::MaxItemsPerBatch::NAME,
            translation::MaxItemsPerBatch::get_set(),
        ) {
            self.batch_queue.max_items_per_batch = max_items;
        }

        // 缓存相关环境变量
        if let Some(enabled) = take(cache::Enabled::NAME, cache::Enabled::get_set()) {
            self.cache.enabled = enabled;
        }

        if let Some(max_entries) = take(cache::MaxEntries::NAME, cache::MaxEntries::get_set()) {
            self.cache.max_entries = Some(max_entries);
        }

        if let Some(ttl) = take(cache::Ttl::NAME, cache::Ttl::get_set()) {
            self.cache.ttl_secs = ttl.as_secs();
        }

        if let Some(path) = take(cache::Path::NAME, cache::Path::get_set()) {
            self.cache.path = Some(path);
        }
    }

    /// 当前主机名对应的“不进入”选择器
    pub fn selectors_for_host(&self, hostname: Option<&str>) -> Vec<String> {
        let Some(hostname) = hostname else {
            return Vec::new();
        };

        self.dont_walk_into
            .iter()
            .filter(|rule| rule.matches_host(hostname))
            .flat_map(|rule| rule.selectors.iter().cloned())
            .collect()
    }

    /// 参与指纹计算的服务标识
    pub fn provider_identity(&self) -> String {
        format!("deeplx:{}", self.api_url)
    }

    pub fn batch_debounce(&self) -> Duration {
        Duration::from_millis(self.batch_queue.debounce_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// 配置管理器
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: TranslationConfig,
    config_path: Option<String>,
}

impl ConfigManager {
    /// 搜索默认路径创建配置管理器
    pub fn new() -> TranslationResult<Self> {
        Self::load_dotenv();

        let config_path = constants::CONFIG_PATHS
            .iter()
            .map(|path| shellexpand::tilde(path).into_owned())
            .find(|path| Path::new(path).exists());

        Self::build(config_path)
    }

    /// 从指定文件创建配置管理器
    pub fn from_file(path: &str) -> TranslationResult<Self> {
        Self::load_dotenv();

        let expanded = shellexpand::tilde(path).into_owned();
        if !Path::new(&expanded).exists() {
            return Err(TranslationError::ConfigError(format!(
                "配置文件不存在: {}",
                expanded
            )));
        }

        Self::build(Some(expanded))
    }

    fn build(config_path: Option<String>) -> TranslationResult<Self> {
        let mut config = match &config_path {
            Some(path) => {
                tracing::info!("加载配置文件: {}", path);
                Self::load_from_file(path)?
            }
            None => {
                tracing::info!("未找到配置文件，使用默认配置");
                TranslationConfig::default()
            }
        };

        config.apply_env_overrides();
        config.validate()?;

        tracing::debug!(
            "加载的配置 - 目标语言: {}, 模式: {}, API URL: {}",
            config.target_lang,
            config.translation_mode,
            config.api_url
        );

        Ok(Self {
            config,
            config_path,
        })
    }

    /// 获取配置
    pub fn get_config(&self) -> &TranslationConfig {
        &self.config
    }

    /// 实际加载的配置文件
    pub fn config_path(&self) -> Option<&str> {
        self.config_path.as_deref()
    }

    pub fn into_config(self) -> TranslationConfig {
        self.config
    }

    /// 以当前配置为基础，替换语言和 API 地址
    pub fn create_simple_config(&self, target_lang: &str, api_url: Option<&str>) -> TranslationConfig {
        let mut config = self.config.clone();
        config.target_lang = target_lang.to_string();
        if let Some(url) = api_url {
            config.api_url = url.to_string();
        }
        config
    }

    /// 从指定文件加载配置（格式由扩展名决定）
    fn load_from_file(path: &str) -> TranslationResult<TranslationConfig> {
        let settings = Config::builder()
            .add_source(File::with_name(path))
            .build()
            .map_err(|e| TranslationError::ConfigError(format!("构建配置失败: {}", e)))?;

        settings
            .try_deserialize()
            .map_err(|e| TranslationError::ConfigError(format!("反序列化配置失败: {}", e)))
    }

    /// 加载 .env 文件
    fn load_dotenv() {
        for env_file in constants::ENV_FILES {
            if Path::new(env_file).exists() {
                match dotenv::from_filename(env_file) {
                    Ok(_) => {
                        tracing::info!("已加载环境变量文件: {}", env_file);
                        break;
                    }
                    Err(e) => tracing::warn!("加载环境变量文件 {} 失败: {}", env_file, e),
                }
            }
        }
    }

    /// 生成示例配置文件
    pub fn generate_example_config(path: &str) -> TranslationResult<()> {
        let mut config = TranslationConfig::default();
        config.dont_walk_into.push(SiteRule {
            host: "example.com".to_string(),
            selectors: vec![".comments".to_string(), "nav .menu".to_string()],
        });

        let content = toml::to_string_pretty(&config)?;
        std::fs::write(shellexpand::tilde(path).as_ref(), content)
            .map_err(|e| TranslationError::ConfigError(format!("写入配置文件失败: {}", e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TranslationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch_queue.max_items_per_batch, 4);
        assert_eq!(config.translation_mode, TranslationMode::AppendBelow);
    }

    #[test]
    fn test_validation_rejects_zero_bounds() {
        let mut config = TranslationConfig::default();
        config.batch_queue.max_items_per_batch = 0;
        assert!(config.validate().is_err());

        let mut config = TranslationConfig::default();
        config.request_queue.rate = 0.0;
        assert!(config.validate().is_err());

        let mut config = TranslationConfig::default();
        config.cache.max_entries = Some(0);
        assert!(config.validate().is_err());
        config.cache.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_site_rule_host_matching() {
        let rule = SiteRule {
            host: "example.com".to_string(),
            selectors: vec![".ad".to_string()],
        };
        assert!(rule.matches_host("example.com"));
        assert!(rule.matches_host("News.Example.com"));
        assert!(!rule.matches_host("notexample.com"));

        let mut config = TranslationConfig::default();
        config.dont_walk_into.push(rule);
        assert_eq!(config.selectors_for_host(Some("www.example.com")), vec![".ad"]);
        assert!(config.selectors_for_host(None).is_empty());
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("Replace".parse::<TranslationMode>().unwrap(), TranslationMode::Replace);
        assert_eq!(
            "append-below".parse::<TranslationMode>().unwrap(),
            TranslationMode::AppendBelow
        );
        assert!("sideways".parse::<TranslationMode>().is_err());
    }

    #[test]
    fn test_retry_backoff_doubles() {
        let retry = RetrySettings {
            max_attempts: 3,
            base_delay_ms: 500,
        };
        assert_eq!(retry.delay_for(0), Duration::from_millis(500));
        assert_eq!(retry.delay_for(2), Duration::from_millis(2000));
    }

    #[test]
    fn test_example_config_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("example.toml");
        let path = path.to_str().unwrap();

        ConfigManager::generate_example_config(path).unwrap();
        let loaded = ConfigManager::load_from_file(path).unwrap();

        assert_eq!(loaded.dont_walk_into.len(), 1);
        assert_eq!(loaded.dont_walk_into[0].host, "example.com");
        assert_eq!(loaded.batch_queue.max_characters_per_batch, 1000);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(
            &path,
            "target_lang = \"ja\"\ntranslation_mode = \"overlay\"\n[batch_queue]\nmax_items_per_batch = 8\n",
        )
        .unwrap();

        let loaded = ConfigManager::load_from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(loaded.target_lang, "ja");
        assert_eq!(loaded.translation_mode, TranslationMode::Overlay);
        assert_eq!(loaded.batch_queue.max_items_per_batch, 8);
        assert_eq!(loaded.batch_queue.max_characters_per_batch, 1000);
        assert_eq!(loaded.request_queue.capacity, 60);
    }
}
