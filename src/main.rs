//! 命令行入口
//!
//! 读取 HTML 文件（或标准输入），翻译整篇文档后输出带译文的 HTML。

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;

use clap::Parser;
use encoding_rs::Encoding;
use tracing::level_filters::LevelFilter;

use page_translator::env::{core as env_core, generate_env_docs, EnvVar};
use page_translator::parsers::html::get_charset;
use page_translator::parsers::{html_to_dom, serialize_document};
use page_translator::translation::{ConfigManager, TranslationError, TranslationMode, TranslationPipeline, TranslationResult};

/// In-place web page translator.
#[derive(Parser, Debug)]
#[command(name = "page-translator")]
#[command(about = "Translate an HTML document in place through a DeepLX-compatible endpoint")]
#[command(version)]
struct Cli {
    /// HTML file to translate, or "-" to read from stdin
    input: Option<String>,

    /// Write the translated document here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Target language code
    #[arg(short, long)]
    target: Option<String>,

    /// Source language code ("auto" to detect)
    #[arg(short, long)]
    source: Option<String>,

    /// Translation endpoint
    #[arg(long)]
    api_url: Option<String>,

    /// Original page URL, used to pick per-site skip selectors
    #[arg(short, long)]
    url: Option<String>,

    /// Write-back mode: replace, append-below or overlay
    #[arg(short, long)]
    mode: Option<TranslationMode>,

    /// Configuration file (TOML or JSON)
    #[arg(short, long)]
    config: Option<String>,

    /// Persist the translation cache in this file
    #[arg(long)]
    cache_path: Option<String>,

    /// Force the document charset instead of the declared one
    #[arg(short, long)]
    encoding: Option<String>,

    /// Write an example configuration file and exit
    #[arg(long, value_name = "FILE")]
    write_example_config: Option<String>,

    /// Print the supported environment variables and exit
    #[arg(long)]
    env_docs: bool,
}

fn init_logging() {
    let level = env_core::LogLevel::get().unwrap_or_else(|e| {
        eprintln!("Warning: {}", e);
        "info".to_string()
    });
    let level = LevelFilter::from_str(&level).unwrap_or(LevelFilter::INFO);

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_ansi(!env_core::NoColor::get_or_default(false))
        .with_writer(std::io::stderr)
        .init();
}

fn read_input(input: &str) -> TranslationResult<Vec<u8>> {
    let mut data = Vec::new();
    if input == "-" {
        std::io::stdin().read_to_end(&mut data)?;
    } else {
        data = std::fs::read(input)
            .map_err(|e| TranslationError::IoError(format!("无法读取 {}: {}", input, e)))?;
    }
    Ok(data)
}

fn resolve_encoding(forced: Option<&str>, declared: Option<String>) -> String {
    let candidate = forced.map(str::to_string).or(declared);
    match candidate {
        Some(label) if Encoding::for_label(label.trim().as_bytes()).is_some() => label.trim().to_string(),
        Some(label) => {
            tracing::warn!("未知的字符集 '{}'，按 utf-8 处理", label);
            "utf-8".to_string()
        }
        None => "utf-8".to_string(),
    }
}

async fn run(cli: Cli) -> TranslationResult<()> {
    if cli.env_docs {
        std::io::stdout().write_all(generate_env_docs().as_bytes())?;
        return Ok(());
    }

    if let Some(path) = &cli.write_example_config {
        ConfigManager::generate_example_config(path)?;
        eprintln!("示例配置已写入 {}", path);
        if cli.input.is_none() {
            return Ok(());
        }
    }

    let input = cli
        .input
        .as_deref()
        .ok_or_else(|| TranslationError::InvalidInput("缺少输入文件".to_string()))?;

    let manager = match &cli.config {
        Some(path) => ConfigManager::from_file(path)?,
        None => ConfigManager::new()?,
    };
    let mut config = manager.into_config();
    if let Some(target) = cli.target {
        config.target_lang = target;
    }
    if let Some(source) = cli.source {
        config.source_lang = source;
    }
    if let Some(api_url) = cli.api_url {
        config.api_url = api_url;
    }
    if let Some(mode) = cli.mode {
        config.translation_mode = mode;
    }
    if let Some(cache_path) = cli.cache_path {
        config.cache.path = Some(cache_path);
    }
    config.validate()?;

    let hostname = match &cli.url {
        Some(page_url) => {
            let parsed = url::Url::parse(page_url)
                .map_err(|e| TranslationError::InvalidInput(format!("无效的页面地址 '{}': {}", page_url, e)))?;
            parsed.host_str().map(str::to_string)
        }
        None => None,
    };

    let data = read_input(input)?;
    let mut dom = html_to_dom(&data, "utf-8")?;
    let encoding = resolve_encoding(cli.encoding.as_deref(), get_charset(&dom.document));
    if !encoding.eq_ignore_ascii_case("utf-8") {
        tracing::debug!("按 {} 重新解析文档", encoding);
        dom = html_to_dom(&data, &encoding)?;
    }

    let pipeline = TranslationPipeline::with_deeplx(config)?;
    let report = pipeline.translate_document(&dom.document, hostname.as_deref()).await?;
    if report.units_failed > 0 {
        tracing::warn!("{} 个单元翻译失败，已在文档中标记", report.units_failed);
    }

    let output = serialize_document(&dom.document, &encoding)?;
    match &cli.output {
        Some(path) => std::fs::write(path, output)?,
        None => std::io::stdout().write_all(&output)?,
    }

    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
