//! 翻译配置管理模块
//!
//! 提供解析后的配置对象，支持环境变量、配置文件和默认值

pub mod manager;

// 重新导出主要类型
pub use manager::{
    BatchQueueConfig, CacheSettings, ConfigManager, RequestQueueConfig, RetrySettings, SiteRule,
    TranslationConfig, TranslationMode,
};

/// 配置常量
pub mod constants {
    use std::time::Duration;

    // 请求队列（令牌桶）
    pub const DEFAULT_REQUEST_CAPACITY: usize = 60;
    pub const DEFAULT_REQUEST_RATE: f64 = 8.0;

    // 批次处理相关
    pub const DEFAULT_MAX_CHARACTERS_PER_BATCH: usize = 1000;
    pub const DEFAULT_MAX_ITEMS_PER_BATCH: usize = 4;
    pub const DEFAULT_BATCH_DEBOUNCE: Duration = Duration::from_millis(100);

    // 文本过滤相关
    pub const DEFAULT_MIN_CHARACTERS_PER_NODE: usize = 2;
    pub const DEFAULT_MIN_WORDS_PER_NODE: usize = 1;
    pub const CJK_CHAR_THRESHOLD: f32 = 0.5;

    // 默认API设置
    pub const DEFAULT_API_URL: &str = "http://localhost:1188/translate";
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    // 重试
    pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 3;
    pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

    // 缓存设置
    pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600); // 1小时
    pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 1000;

    /// 写回时使用的节点样式标记
    pub const DEFAULT_NODE_STYLE: &str = "default";

    // 配置文件搜索路径
    pub const CONFIG_PATHS: &[&str] = &[
        "page-translator.toml",
        "translation-config.toml",
        ".page-translator.toml",
        "~/.config/page-translator/config.toml",
        "/etc/page-translator/config.toml",
    ];

    /// 按顺序尝试的环境变量文件
    pub const ENV_FILES: &[&str] = &[".env.local", ".env.development", ".env.production", ".env"];
}

/// 便利函数
pub fn config_file_exists() -> bool {
    constants::CONFIG_PATHS
        .iter()
        .any(|path| std::path::Path::new(shellexpand::tilde(path).as_ref()).exists())
}

/// 加载配置，失败时回退到默认配置
pub fn load_translation_config(target_lang: &str, api_url: Option<&str>) -> TranslationConfig {
    match ConfigManager::new() {
        Ok(manager) => manager.create_simple_config(target_lang, api_url),
        Err(e) => {
            tracing::warn!("创建配置管理器失败，使用默认配置: {}", e);
            TranslationConfig::default_with_lang(target_lang, api_url)
        }
    }
}
