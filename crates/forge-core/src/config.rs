//! Configuration for NovelForge projects.
//!
//! A project is configured by a single `novelforge.yaml` at its root:
//!
//! ```yaml
//! novel:
//!   title: 青云志
//!   genre: 玄幻
//!   targetChapters: 120
//! knowledge:
//!   referenceDir: references
//!   chunkSize: 1000
//!   chunkOverlap: 200
//! models:
//!   content:
//!     primary: { provider: gemini, modelId: gemini-2.5-flash }
//! ```
//!
//! Every section is optional. A missing file yields [`ForgeConfig::default`].

use std::fs;
use std::path::{Path, PathBuf};

use forge_model::{EmbeddingConfig, ModelEndpoint, ProviderKind};
use serde::{Deserialize, Serialize};

use crate::errors::ForgeError;

// ============================================================================
// Constants
// ============================================================================

/// Project configuration filename.
pub const CONFIG_FILENAME: &str = "novelforge.yaml";

/// Environment variable overriding the configuration path.
pub const CONFIG_ENV_VAR: &str = "NOVELFORGE_CONFIG";

/// Default chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Default chunk overlap in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Default number of retrieval results.
pub const DEFAULT_TOP_K: usize = 5;

/// Default retries per model.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay between retries in seconds.
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 10;

/// Base URL of the OpenAI-compatible provider used for fallbacks and retrieval models.
pub const SILICONFLOW_BASE_URL: &str = "https://api.siliconflow.cn/v1";

// ============================================================================
// ForgeConfig
// ============================================================================

/// Complete project configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForgeConfig {
    /// What is being written.
    #[serde(default)]
    pub novel: NovelConfig,

    /// Reference knowledge base.
    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    /// Retry and context budgets.
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Model endpoints per role.
    #[serde(default)]
    pub models: ModelsConfig,

    /// Consistency checks.
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Where project state and chapters are written.
    #[serde(default)]
    pub output: OutputConfig,
}

impl ForgeConfig {
    /// Load the configuration for a project.
    ///
    /// `explicit` (from `--config` or `NOVELFORGE_CONFIG`) wins over
    /// `<root>/novelforge.yaml`. Relative paths are resolved against `root`.
    pub fn load_for_project(root: &Path, explicit: Option<&Path>) -> Result<Self, ForgeError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => Self::config_path_for_project(root),
        };
        let mut config = Self::from_path(&path)?;
        config.resolve_paths(root);
        Ok(config)
    }

    /// Load a configuration file.
    ///
    /// If the file does not exist, returns a default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ForgeError::InvalidConfig`] if the file exists but cannot be
    /// read or parsed, or if validation fails.
    pub fn from_path(path: &Path) -> Result<Self, ForgeError> {
        if !path.exists() {
            tracing::debug!("Config not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| {
            ForgeError::invalid_config(
                format!("failed to read {}: {}", path.display(), e),
                "Check the file permissions",
            )
        })?;

        let config: Self = serde_yaml::from_str(&content).map_err(|e| {
            ForgeError::invalid_config(
                format!("failed to parse {}: {}", path.display(), e),
                "Run `novelforge init --force` to regenerate a valid file",
            )
        })?;

        // Validate configuration and log warnings
        let warnings = config.validate()?;
        for warning in warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok(config)
    }

    /// Default config path for a project root.
    pub fn config_path_for_project(root: &Path) -> PathBuf {
        root.join(CONFIG_FILENAME)
    }

    /// Render the configuration as YAML.
    pub fn to_yaml(&self) -> Result<String, ForgeError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Make every relative path absolute against `root`.
    pub fn resolve_paths(&mut self, root: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = root.join(&*p);
            }
        };
        self.knowledge.reference_files.iter_mut().for_each(resolve);
        if let Some(dir) = self.knowledge.reference_dir.as_mut() {
            resolve(dir);
        }
        resolve(&mut self.knowledge.cache_dir);
        resolve(&mut self.output.dir);
    }

    /// Validate the configuration.
    ///
    /// Returns non-fatal warnings; settings that would make every run fail are errors.
    pub fn validate(&self) -> Result<Vec<String>, ForgeError> {
        let mut warnings = Vec::new();
        warnings.extend(self.knowledge.validate()?);
        warnings.extend(self.generation.validate()?);
        warnings.extend(self.validation.validate()?);

        if self.novel.target_chapters == 0 {
            return Err(ForgeError::invalid_config(
                "novel.targetChapters cannot be 0",
                "Set targetChapters to the number of chapters to write",
            ));
        }

        if self.knowledge.rerank && self.models.reranker.is_none() {
            warnings.push(
                "knowledge.rerank is enabled but models.reranker is not set; results stay in similarity order"
                    .to_string(),
            );
        }

        for (role, profile) in [("outline", &self.models.outline), ("content", &self.models.content)] {
            if profile.fallback_enabled && profile.fallback.is_none() {
                warnings.push(format!(
                    "models.{}.fallbackEnabled is true but no fallback is configured",
                    role
                ));
            }
        }

        Ok(warnings)
    }
}

// ============================================================================
// NovelConfig
// ============================================================================

/// Description of the novel being written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NovelConfig {
    /// Working title.
    #[serde(default)]
    pub title: String,

    /// Genre (e.g., 玄幻, 都市).
    #[serde(default)]
    pub genre: String,

    /// Central theme.
    #[serde(default)]
    pub theme: String,

    /// Writing style.
    #[serde(default)]
    pub style: String,

    /// Total number of chapters.
    #[serde(default = "default_target_chapters")]
    pub target_chapters: u32,

    /// Approximate characters per chapter.
    #[serde(default = "default_chapter_length")]
    pub chapter_length: u32,
}

fn default_target_chapters() -> u32 {
    100
}

fn default_chapter_length() -> u32 {
    2500
}

impl Default for NovelConfig {
    fn default() -> Self {
        Self {
            title: String::new(),
            genre: String::new(),
            theme: String::new(),
            style: String::new(),
            target_chapters: default_target_chapters(),
            chapter_length: default_chapter_length(),
        }
    }
}

// ============================================================================
// KnowledgeConfig
// ============================================================================

/// Reference knowledge base settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeConfig {
    /// Individual reference files. Each must exist.
    #[serde(default)]
    pub reference_files: Vec<PathBuf>,

    /// Directory whose `.txt` files are all references.
    #[serde(default)]
    pub reference_dir: Option<PathBuf>,

    /// Chunk size in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Characters shared by neighbouring chunks.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Root directory for knowledge base caches.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Results per query.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Rerank candidates with `models.reranker`.
    #[serde(default)]
    pub rerank: bool,

    /// Candidates fetched per requested result when reranking.
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,

    /// Chunks per embedding request.
    #[serde(default = "default_embedding_batch_size")]
    pub embedding_batch_size: usize,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("data/cache")
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_candidate_multiplier() -> usize {
    3
}

fn default_embedding_batch_size() -> usize {
    forge_model::config::DEFAULT_EMBEDDING_BATCH_SIZE
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            reference_files: Vec::new(),
            reference_dir: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            cache_dir: default_cache_dir(),
            top_k: DEFAULT_TOP_K,
            rerank: false,
            candidate_multiplier: default_candidate_multiplier(),
            embedding_batch_size: default_embedding_batch_size(),
        }
    }
}

impl KnowledgeConfig {
    /// Whether any reference source is configured.
    pub fn has_references(&self) -> bool {
        !self.reference_files.is_empty() || self.reference_dir.is_some()
    }

    /// Validate chunking and retrieval settings.
    pub fn validate(&self) -> Result<Vec<String>, ForgeError> {
        let mut warnings = Vec::new();

        if self.chunk_size == 0 || self.chunk_overlap == 0 {
            return Err(ForgeError::invalid_config(
                format!(
                    "knowledge.chunkSize ({}) and knowledge.chunkOverlap ({}) must both be > 0",
                    self.chunk_size, self.chunk_overlap
                ),
                "Use chunkSize: 1000 and chunkOverlap: 200",
            ));
        }

        if self.chunk_overlap >= self.chunk_size {
            return Err(ForgeError::invalid_config(
                format!(
                    "knowledge.chunkOverlap ({}) must be smaller than knowledge.chunkSize ({})",
                    self.chunk_overlap, self.chunk_size
                ),
                "Lower chunkOverlap or raise chunkSize",
            ));
        }

        if self.embedding_batch_size == 0 {
            return Err(ForgeError::invalid_config(
                "knowledge.embeddingBatchSize cannot be 0",
                "Set embeddingBatchSize to at least 1 (recommended: 16-64)",
            ));
        }

        if self.top_k == 0 {
            warnings.push("knowledge.topK is 0; retrieval will return nothing".to_string());
        }

        if self.candidate_multiplier == 0 {
            warnings.push("knowledge.candidateMultiplier is 0; treated as 1".to_string());
        }

        Ok(warnings)
    }
}

// ============================================================================
// GenerationConfig
// ============================================================================

/// How retry delays grow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// Same delay before every retry.
    #[default]
    Fixed,
    /// Delay doubles per retry up to `maxBackoffSecs`.
    Exponential,
}

/// Retry and context budgets for generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    /// Attempts per model and per chapter validation loop.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay between attempts in seconds.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Delay growth.
    #[serde(default)]
    pub backoff: BackoffKind,

    /// Upper bound for exponential delays in seconds.
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,

    /// Characters of prior text/summaries given as context.
    #[serde(default = "default_context_length")]
    pub context_length: usize,

    /// Chapters per outline request.
    #[serde(default = "default_outline_batch_size")]
    pub outline_batch_size: u32,

    /// Characters of a chapter sent to the summariser.
    #[serde(default = "default_summary_input_chars")]
    pub summary_input_chars: usize,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_retry_delay_secs() -> u64 {
    DEFAULT_RETRY_DELAY_SECS
}

fn default_max_backoff_secs() -> u64 {
    300
}

fn default_context_length() -> usize {
    2000
}

fn default_outline_batch_size() -> u32 {
    50
}

fn default_summary_input_chars() -> usize {
    4000
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_secs: DEFAULT_RETRY_DELAY_SECS,
            backoff: BackoffKind::Fixed,
            max_backoff_secs: default_max_backoff_secs(),
            context_length: default_context_length(),
            outline_batch_size: default_outline_batch_size(),
            summary_input_chars: default_summary_input_chars(),
        }
    }
}

impl GenerationConfig {
    /// Validate retry settings.
    pub fn validate(&self) -> Result<Vec<String>, ForgeError> {
        let mut warnings = Vec::new();

        if self.max_retries == 0 {
            return Err(ForgeError::invalid_config(
                "generation.maxRetries cannot be 0",
                "Set maxRetries to at least 1 (recommended: 3)",
            ));
        }

        if self.outline_batch_size == 0 {
            return Err(ForgeError::invalid_config(
                "generation.outlineBatchSize cannot be 0",
                "Set outlineBatchSize to at least 1 (recommended: 20-50)",
            ));
        }

        if self.max_retries > 10 {
            warnings.push(format!(
                "generation.maxRetries={} is very high; a failing model will stall the run",
                self.max_retries
            ));
        }

        if self.backoff == BackoffKind::Exponential && self.max_backoff_secs < self.retry_delay_secs {
            warnings.push(format!(
                "generation.maxBackoffSecs ({}) is below retryDelaySecs ({}); every delay is capped",
                self.max_backoff_secs, self.retry_delay_secs
            ));
        }

        Ok(warnings)
    }
}

// ============================================================================
// ModelsConfig
// ============================================================================

/// Override of the global retry settings for one role.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryOverride {
    /// Attempts per model.
    #[serde(default)]
    pub max_retries: Option<u32>,

    /// Delay between attempts in seconds.
    #[serde(default)]
    pub retry_delay_secs: Option<u64>,
}

/// Models bound to one generation role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleModelConfig {
    /// Model tried first.
    pub primary: ModelEndpoint,

    /// Model used once the primary is exhausted.
    #[serde(default)]
    pub fallback: Option<ModelEndpoint>,

    /// Whether the fallback may be used.
    #[serde(default = "default_true")]
    pub fallback_enabled: bool,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Token limit per response.
    #[serde(default)]
    pub max_tokens: Option<u32>,

    /// Per-role retry override.
    #[serde(default)]
    pub retry: Option<RetryOverride>,
}

fn default_true() -> bool {
    true
}

fn default_temperature() -> f32 {
    0.7
}

impl RoleModelConfig {
    /// Default outline models: Gemini Pro with a Qwen fallback.
    pub fn default_outline() -> Self {
        Self {
            primary: ModelEndpoint::new(ProviderKind::Gemini, "gemini-2.5-pro").with_timeout_secs(120),
            fallback: Some(
                ModelEndpoint::new(ProviderKind::OpenAi, "Qwen/Qwen3-235B-A22B-Thinking-2507")
                    .with_base_url(SILICONFLOW_BASE_URL)
                    .with_timeout_secs(180),
            ),
            fallback_enabled: true,
            temperature: 1.0,
            max_tokens: None,
            retry: None,
        }
    }

    /// Default content models: Gemini Flash with a Kimi fallback.
    pub fn default_content() -> Self {
        Self {
            primary: ModelEndpoint::new(ProviderKind::Gemini, "gemini-2.5-flash").with_timeout_secs(180),
            fallback: Some(
                ModelEndpoint::new(ProviderKind::OpenAi, "moonshotai/Kimi-K2-Instruct")
                    .with_base_url(SILICONFLOW_BASE_URL)
                    .with_timeout_secs(180),
            ),
            fallback_enabled: true,
            temperature: 0.7,
            max_tokens: None,
            retry: None,
        }
    }

    /// The fallback endpoint, if configured and enabled.
    pub fn active_fallback(&self) -> Option<&ModelEndpoint> {
        if self.fallback_enabled {
            self.fallback.as_ref()
        } else {
            None
        }
    }
}

/// Model endpoints per role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelsConfig {
    /// Outline generation.
    #[serde(default = "RoleModelConfig::default_outline")]
    pub outline: RoleModelConfig,

    /// Chapter content, summaries and reviews.
    #[serde(default = "RoleModelConfig::default_content")]
    pub content: RoleModelConfig,

    /// Embedding model for the knowledge base.
    #[serde(default = "default_embedding")]
    pub embedding: EmbeddingConfig,

    /// Optional reranker.
    #[serde(default)]
    pub reranker: Option<ModelEndpoint>,
}

fn default_embedding() -> EmbeddingConfig {
    EmbeddingConfig::new(
        ModelEndpoint::new(ProviderKind::OpenAi, "Qwen/Qwen3-Embedding-0.6B")
            .with_base_url(SILICONFLOW_BASE_URL),
    )
    .with_dimension(1024)
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            outline: RoleModelConfig::default_outline(),
            content: RoleModelConfig::default_content(),
            embedding: default_embedding(),
            reranker: None,
        }
    }
}

// ============================================================================
// ValidationConfig
// ============================================================================

/// Consistency check toggles and thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationConfig {
    /// Check content against the outline.
    #[serde(default = "default_true")]
    pub logic: bool,

    /// Check content against the prior summary.
    #[serde(default = "default_true")]
    pub continuity: bool,

    /// Detect near-duplicate paragraphs.
    #[serde(default = "default_true")]
    pub duplicates: bool,

    /// Minimum reviewer score (0-100).
    #[serde(default = "default_min_score")]
    pub min_score: u32,

    /// Prior chapters compared for duplicates.
    #[serde(default = "default_duplicate_window")]
    pub duplicate_window: u32,

    /// Paragraphs shorter than this are ignored by duplicate detection.
    #[serde(default = "default_min_paragraph_length")]
    pub min_paragraph_length: usize,

    /// Similarity at or above which two paragraphs are duplicates.
    #[serde(default = "default_duplicate_similarity")]
    pub duplicate_similarity: f64,
}

fn default_min_score() -> u32 {
    75
}

fn default_duplicate_window() -> u32 {
    3
}

fn default_min_paragraph_length() -> usize {
    50
}

fn default_duplicate_similarity() -> f64 {
    0.8
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            logic: true,
            continuity: true,
            duplicates: true,
            min_score: default_min_score(),
            duplicate_window: default_duplicate_window(),
            min_paragraph_length: default_min_paragraph_length(),
            duplicate_similarity: default_duplicate_similarity(),
        }
    }
}

impl ValidationConfig {
    /// All checks disabled.
    pub fn disabled() -> Self {
        Self {
            logic: false,
            continuity: false,
            duplicates: false,
            ..Self::default()
        }
    }

    /// Validate thresholds.
    pub fn validate(&self) -> Result<Vec<String>, ForgeError> {
        let mut warnings = Vec::new();

        if !(0.0..=1.0).contains(&self.duplicate_similarity) {
            return Err(ForgeError::invalid_config(
                format!(
                    "validation.duplicateSimilarity ({}) must be between 0 and 1",
                    self.duplicate_similarity
                ),
                "Use a value such as 0.8",
            ));
        }

        if self.min_paragraph_length == 0 {
            return Err(ForgeError::invalid_config(
                "validation.minParagraphLength must be at least 1",
                "Use a value such as 50",
            ));
        }

        if self.min_score > 100 {
            warnings.push(format!(
                "validation.minScore={} is above 100; every reviewed chapter will fail",
                self.min_score
            ));
        }

        Ok(warnings)
    }
}

// ============================================================================
// OutputConfig
// ============================================================================

/// Output locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputConfig {
    /// Directory for chapters and project state.
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data/output")
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ForgeConfig::from_path(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config, ForgeConfig::default());
        assert_eq!(config.knowledge.chunk_size, 1000);
        assert_eq!(config.knowledge.chunk_overlap, 200);
        assert_eq!(config.generation.max_retries, 3);
        assert_eq!(config.models.outline.primary.model_id, "gemini-2.5-pro");
    }

    #[test]
    fn test_partial_yaml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        fs::write(
            &path,
            r#"
novel:
  title: 青云志
  targetChapters: 12
knowledge:
  referenceDir: refs
  chunkSize: 500
  chunkOverlap: 100
generation:
  backoff: exponential
models:
  content:
    primary:
      provider: openai
      modelId: deepseek-ai/DeepSeek-V3.1
    fallbackEnabled: false
"#,
        )
        .unwrap();

        let config = ForgeConfig::load_for_project(dir.path(), None).unwrap();
        assert_eq!(config.novel.title, "青云志");
        assert_eq!(config.novel.target_chapters, 12);
        assert_eq!(config.knowledge.chunk_size, 500);
        assert_eq!(config.knowledge.reference_dir, Some(dir.path().join("refs")));
        assert_eq!(config.output.dir, dir.path().join("data/output"));
        assert_eq!(config.generation.backoff, BackoffKind::Exponential);
        assert_eq!(config.models.content.primary.provider, ProviderKind::OpenAi);
        assert!(config.models.content.active_fallback().is_none());
        assert_eq!(config.models.outline, RoleModelConfig::default_outline());
    }

    #[test]
    fn test_invalid_chunking_rejected() {
        let mut config = ForgeConfig::default();
        config.knowledge.chunk_overlap = 1000;
        assert!(matches!(
            config.validate(),
            Err(ForgeError::InvalidConfig { .. })
        ));

        config.knowledge.chunk_overlap = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_paragraph_length_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        fs::write(&path, "validation:\n  minParagraphLength: 0\n").unwrap();
        match ForgeConfig::from_path(&path).and_then(|c| c.validate()) {
            Err(ForgeError::InvalidConfig { message, .. }) => {
                assert!(message.contains("minParagraphLength"));
            }
            other => panic!("unexpected {other:?}"),
        }

        let mut config = ForgeConfig::default();
        config.validation.min_paragraph_length = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        fs::write(&path, "novel: [unclosed").unwrap();
        assert!(matches!(
            ForgeConfig::from_path(&path),
            Err(ForgeError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_rerank_without_reranker_warns() {
        let mut config = ForgeConfig::default();
        config.knowledge.rerank = true;
        let warnings = config.validate().unwrap();
        assert!(warnings.iter().any(|w| w.contains("rerank")));
    }

    #[test]
    fn test_yaml_roundtrip_of_defaults() {
        let yaml = ForgeConfig::default().to_yaml().unwrap();
        let parsed: ForgeConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, ForgeConfig::default());
    }
}
