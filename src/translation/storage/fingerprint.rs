//! 内容指纹
//!
//! 由 `(原文, 源语言, 目标语言, 服务标识)` 计算的 blake3 哈希，
//! 既是缓存键，也是同批次去重的依据。

use std::fmt;

/// 翻译请求的内容指纹
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(blake3::Hash);

impl Fingerprint {
    /// 计算指纹
    pub fn compute(text: &str, source_lang: &str, target_lang: &str, provider_identity: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        // 每段带长度前缀，避免 "a|b" 与 "a" + "|b" 碰撞
        for part in [text, source_lang, target_lang, provider_identity] {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        Self(hasher.finalize())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    /// 十六进制形式，用作持久化存储的键
    pub fn to_hex(&self) -> String {
        self.0.to_hex().to_string()
    }

    pub fn from_hex(hex: &str) -> Option<Self> {
        blake3::Hash::from_hex(hex).ok().map(Self)
    }
}

impl From<[u8; 32]> for Fingerprint {
    fn from(bytes: [u8; 32]) -> Self {
        Self(blake3::Hash::from(bytes))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // 日志里只显示前 12 位
        f.write_str(&self.0.to_hex()[..12])
    }
}

/// 绑定语言对与服务标识的指纹计算器
#[derive(Debug, Clone)]
pub struct FingerprintScope {
    source_lang: String,
    target_lang: String,
    provider_identity: String,
}

impl FingerprintScope {
    pub fn new(source_lang: &str, target_lang: &str, provider_identity: &str) -> Self {
        Self {
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
            provider_identity: provider_identity.to_string(),
        }
    }

    pub fn fingerprint(&self, text: &str) -> Fingerprint {
        Fingerprint::compute(text, &self.source_lang, &self.target_lang, &self.provider_identity)
    }

    pub fn source_lang(&self) -> &str {
        &self.source_lang
    }

    pub fn target_lang(&self) -> &str {
        &self.target_lang
    }
}
