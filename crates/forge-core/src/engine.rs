//! ForgeEngine – entry point for all NovelForge operations.
//!
//! The [`ForgeEngine`] resolves a project directory, loads its configuration
//! and wires the knowledge base, model gateway and project store together for
//! each command.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{ForgeConfig, CONFIG_FILENAME};
use crate::errors::ForgeError;
use crate::gateway::ModelGateway;
use crate::knowledge::{BuildResult, Corpus, KnowledgeBase, ScoredChunk};
use crate::orchestrator::{project_status, GenerationOrchestrator, ProjectStatus, RunReport};
use crate::store::{FileProjectStore, ProjectStore};

/// Default directory for reference texts created by `init`.
pub const REFERENCES_DIR: &str = "references";

// ============================================================================
// InitResult
// ============================================================================

/// Outcome of [`ForgeEngine::init_project`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitResult {
    /// Written configuration file.
    pub config_path: PathBuf,
    /// Whether an existing file was replaced.
    pub overwritten: bool,
    /// Directories created.
    pub created_dirs: Vec<PathBuf>,
}

// ============================================================================
// ForgeEngine
// ============================================================================

/// The main engine for NovelForge operations.
///
/// # Example
///
/// ```ignore
/// use forge_core::ForgeEngine;
/// use std::path::Path;
///
/// let mut engine = ForgeEngine::open(Path::new("."), None)?;
/// let report = engine.auto(None)?;
/// println!("{} chapters written", report.succeeded.len());
/// ```
#[derive(Debug)]
pub struct ForgeEngine {
    root: PathBuf,
    config: ForgeConfig,
    store: Arc<FileProjectStore>,
}

impl ForgeEngine {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Open the project at `root`.
    ///
    /// `config_path` overrides `<root>/novelforge.yaml`.
    ///
    /// # Errors
    ///
    /// Returns [`ForgeError::InvalidConfig`] if the configuration is invalid.
    pub fn open(root: &Path, config_path: Option<&Path>) -> Result<Self, ForgeError> {
        let config = ForgeConfig::load_for_project(root, config_path)?;
        Ok(Self::with_config(root, config))
    }

    /// Create an engine from an already loaded configuration.
    pub fn with_config(root: &Path, config: ForgeConfig) -> Self {
        let store = Arc::new(FileProjectStore::new(config.output.dir.clone()));
        debug!(root = %root.display(), output = %config.output.dir.display(), "Engine opened");
        Self {
            root: root.to_path_buf(),
            config,
            store,
        }
    }

    /// Write a default configuration and create the project directories.
    ///
    /// # Errors
    ///
    /// Returns [`ForgeError::InvalidArgument`] if a configuration exists and
    /// `force` is not set.
    pub fn init_project(root: &Path, force: bool) -> Result<InitResult, ForgeError> {
        let config_path = root.join(CONFIG_FILENAME);
        let overwritten = config_path.exists();
        if overwritten && !force {
            return Err(ForgeError::InvalidArgument(format!(
                "{} already exists (use --force to overwrite)",
                config_path.display()
            )));
        }

        let mut defaults = ForgeConfig::default();
        defaults.knowledge.reference_dir = Some(PathBuf::from(REFERENCES_DIR));
        fs::create_dir_all(root)?;
        forge_db::write_atomic(&config_path, defaults.to_yaml()?.as_bytes())?;

        let mut created_dirs = Vec::new();
        for dir in [
            root.join(REFERENCES_DIR),
            root.join(&defaults.knowledge.cache_dir),
            root.join(&defaults.output.dir),
        ] {
            if !dir.exists() {
                fs::create_dir_all(&dir)?;
                created_dirs.push(dir);
            }
        }

        info!(config = %config_path.display(), "Initialized project");
        Ok(InitResult {
            config_path,
            overwritten,
            created_dirs,
        })
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Project root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Active configuration.
    pub fn config(&self) -> &ForgeConfig {
        &self.config
    }

    /// Project store.
    pub fn store(&self) -> &FileProjectStore {
        &self.store
    }

    // -------------------------------------------------------------------------
    // Knowledge base
    // -------------------------------------------------------------------------

    /// Load the configured reference corpus, if any references are configured.
    ///
    /// # Errors
    ///
    /// [`ForgeError::ReferenceMissing`] when a configured file does not exist.
    pub fn load_corpus(&self) -> Result<Option<Corpus>, ForgeError> {
        if !self.config.knowledge.has_references() {
            return Ok(None);
        }
        Corpus::load(&self.config.knowledge).map(Some)
    }

    /// Build (or load from cache) the knowledge base.
    ///
    /// # Errors
    ///
    /// [`ForgeError::EmptyCorpus`] when no references are configured or the
    /// configured ones hold no text.
    pub fn kb_build(&self, force: bool) -> Result<BuildResult, ForgeError> {
        let corpus = self
            .load_corpus()?
            .filter(|corpus| !corpus.is_empty())
            .ok_or(ForgeError::EmptyCorpus)?;
        let mut kb = KnowledgeBase::from_config(&self.config)?;
        kb.build(&corpus, force)
    }

    /// Query the knowledge base.
    ///
    /// With references configured the cache is validated against them first,
    /// so a changed corpus or embedding model triggers a rebuild.
    pub fn kb_query(&self, text: &str, top_k: Option<usize>) -> Result<Vec<ScoredChunk>, ForgeError> {
        let mut kb = KnowledgeBase::from_config(&self.config)?;
        match self.load_corpus()? {
            Some(corpus) => {
                kb.build(&corpus, false)?;
            }
            None => {
                if !kb.open_cached()? {
                    return Err(ForgeError::EmptyCorpus);
                }
            }
        }
        let k = top_k.unwrap_or_else(|| kb.default_top_k());
        kb.query(text, k)
    }

    /// Remove the knowledge base cache. Returns whether one existed.
    pub fn kb_invalidate(&self) -> Result<bool, ForgeError> {
        KnowledgeBase::from_config(&self.config)?.invalidate()
    }

    // -------------------------------------------------------------------------
    // Generation
    // -------------------------------------------------------------------------

    /// Orchestrator wired to the configured models and knowledge base.
    pub fn orchestrator(&self) -> Result<GenerationOrchestrator, ForgeError> {
        self.store.ensure_layout()?;
        let gateway = ModelGateway::from_config(&self.config)?;
        let store: Arc<dyn ProjectStore> = self.store.clone();
        let mut orchestrator = GenerationOrchestrator::new(self.config.clone(), store, gateway);

        match self.load_corpus()? {
            Some(corpus) if !corpus.is_empty() => {
                let kb = KnowledgeBase::from_config(&self.config)?;
                orchestrator = orchestrator.with_knowledge(kb, Some(corpus));
            }
            Some(_) => warn!("Reference corpus is empty, generating without references"),
            None => {}
        }
        Ok(orchestrator)
    }

    /// Outline chapters `start..=end`.
    pub fn outline(&self, start: u32, end: u32, extra: Option<&str>, force: bool) -> Result<RunReport, ForgeError> {
        self.orchestrator()?.outline(start, end, extra, force)
    }

    /// Generate content; see [`GenerationOrchestrator::content`].
    pub fn content(
        &self,
        start_chapter: Option<u32>,
        target_chapter: Option<u32>,
        extra: Option<&str>,
    ) -> Result<RunReport, ForgeError> {
        self.orchestrator()?.content(start_chapter, target_chapter, extra)
    }

    /// Re-derive chapter summaries.
    pub fn finalize(&self, chapters: &[u32]) -> Result<RunReport, ForgeError> {
        self.orchestrator()?.finalize(chapters)
    }

    /// Outline what is missing, then write every remaining chapter.
    pub fn auto(&self, extra: Option<&str>) -> Result<RunReport, ForgeError> {
        self.orchestrator()?.auto(extra)
    }

    /// Project status. Needs no model credentials.
    pub fn status(&self) -> Result<ProjectStatus, ForgeError> {
        project_status(self.store.as_ref(), self.config.novel.target_chapters)
    }
}
