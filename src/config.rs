//! Configuration parsing and validation.
//!
//! DocFusion is configured with a TOML file. Every section and field has
//! a default, so an empty file (or no file at all) describes a working
//! setup: hashing embedder, hybrid retrieval, no reranking, data under
//! `./data`.
//!
//! ```toml
//! [storage]
//! data_dir = "./data"
//!
//! [retrieval]
//! hybrid_alpha = 0.6
//! sparse = "hybrid"        # or "dense-only"
//! default_top_k = 7
//! uid_policy = "content"   # or "generation"
//!
//! [chunking]
//! max_chars = 1200
//! overlap_sentences = 1
//!
//! [embedding]
//! provider = "hash"        # hash | openai | ollama | local
//! dims = 384
//!
//! [rerank]
//! provider = "none"        # none | embedding | local
//!
//! [server]
//! bind = "127.0.0.1:4000"
//!
//! [logging]
//! format = "plain"         # or "json"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use docfusion_core::chunk::ChunkOptions;
use docfusion_core::SparseMode;

/// Path used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "./config/docfusion.toml";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub retrieval: RetrievalConfig,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub rerank: RerankConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// Root for the registry, index snapshots, and stored source documents.
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
        }
    }
}

/// How a document's content uid is derived.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum UidPolicy {
    /// SHA-256 over filename and file bytes. Re-ingesting identical bytes
    /// reuses the existing snapshot.
    #[default]
    Content,
    /// Filename, size, mtime, and a random nonce. Every ingest is a new
    /// generation.
    Generation,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SparseSetting {
    #[default]
    Hybrid,
    DenseOnly,
}

impl From<SparseSetting> for SparseMode {
    fn from(s: SparseSetting) -> Self {
        match s {
            SparseSetting::Hybrid => SparseMode::Hybrid,
            SparseSetting::DenseOnly => SparseMode::DenseOnly,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub hybrid_alpha: f64,
    pub sparse: SparseSetting,
    pub default_top_k: usize,
    pub uid_policy: UidPolicy,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            hybrid_alpha: docfusion_core::fusion::DEFAULT_ALPHA,
            sparse: SparseSetting::Hybrid,
            default_top_k: 7,
            uid_policy: UidPolicy::Content,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_sentences: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        let opts = ChunkOptions::default();
        Self {
            max_chars: opts.max_chars,
            overlap_sentences: opts.overlap_sentences,
        }
    }
}

impl ChunkingConfig {
    pub fn options(&self) -> ChunkOptions {
        ChunkOptions {
            max_chars: self.max_chars,
            overlap_sentences: self.overlap_sentences,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: Option<String>,
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    pub url: Option<String>,
    pub batch_size: usize,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "hash".to_string(),
            model: None,
            dims: Some(384),
            url: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RerankConfig {
    pub provider: String,
    pub model: Option<String>,
    pub batch_size: usize,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            provider: "none".to_string(),
            model: None,
            batch_size: 32,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:4000".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

/// Which files `docfusion ingest <dir>` picks up.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IngestConfig {
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            include_globs: vec![
                "**/*.pdf".to_string(),
                "**/*.txt".to_string(),
                "**/*.md".to_string(),
            ],
            exclude_globs: Vec::new(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.retrieval.hybrid_alpha) {
            anyhow::bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
        }
        if self.retrieval.default_top_k < 1 {
            anyhow::bail!("retrieval.default_top_k must be >= 1");
        }
        if self.chunking.max_chars == 0 {
            anyhow::bail!("chunking.max_chars must be > 0");
        }

        match self.embedding.provider.as_str() {
            "hash" | "local" => {}
            "openai" | "ollama" => {
                if self.embedding.model.is_none() {
                    anyhow::bail!(
                        "embedding.model must be specified when provider is '{}'",
                        self.embedding.provider
                    );
                }
            }
            other => anyhow::bail!(
                "Unknown embedding provider: '{}'. Must be hash, openai, ollama, or local.",
                other
            ),
        }
        if self.embedding.dims == Some(0) {
            anyhow::bail!("embedding.dims must be > 0");
        }
        if self.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be > 0");
        }

        match self.rerank.provider.as_str() {
            "none" | "embedding" | "local" => {}
            other => anyhow::bail!(
                "Unknown rerank provider: '{}'. Must be none, embedding, or local.",
                other
            ),
        }

        Ok(())
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

/// Read and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Load `path` if it exists; fall back to defaults only when the caller
/// did not name a file explicitly.
pub fn load_or_default(path: &Path, explicit: bool) -> Result<Config> {
    if !explicit && !path.exists() {
        return Ok(Config::default());
    }
    load_config(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.retrieval.hybrid_alpha, 0.6);
        assert_eq!(config.retrieval.uid_policy, UidPolicy::Content);
        assert_eq!(config.chunking.max_chars, 1200);
        assert_eq!(config.server.bind, "127.0.0.1:4000");
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.embedding.provider, "hash");
        assert_eq!(config.retrieval.default_top_k, 7);
        assert_eq!(config.storage.data_dir, PathBuf::from("./data"));
    }

    #[test]
    fn test_partial_sections() {
        let config = parse_config(
            r#"
            [retrieval]
            sparse = "dense-only"
            uid_policy = "generation"

            [logging]
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(SparseMode::from(config.retrieval.sparse), SparseMode::DenseOnly);
        assert_eq!(config.retrieval.uid_policy, UidPolicy::Generation);
        assert_eq!(config.retrieval.hybrid_alpha, 0.6);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_rejects_out_of_range_alpha() {
        let err = parse_config("[retrieval]\nhybrid_alpha = 1.5\n").unwrap_err();
        assert!(err.to_string().contains("hybrid_alpha"));
    }

    #[test]
    fn test_rejects_unknown_providers() {
        assert!(parse_config("[embedding]\nprovider = \"magic\"\n").is_err());
        assert!(parse_config("[rerank]\nprovider = \"magic\"\n").is_err());
        assert!(parse_config("[embedding]\nprovider = \"openai\"\n").is_err());
    }

    #[test]
    fn test_missing_default_path_falls_back() {
        let missing = Path::new("/definitely/not/here.toml");
        assert!(load_or_default(missing, false).is_ok());
        assert!(load_or_default(missing, true).is_err());
    }
}
