//! Reference knowledge base: chunk, embed, index and retrieve reference text.
//!
//! A [`KnowledgeBase`] owns a [`Chunker`], an [`EmbeddingGateway`] and a
//! forge-db vector index. Builds are cached on disk per embedding model and
//! chunking settings; the cache is reused only while the corpus hash,
//! vector dimension and chunking all match.
//!
//! ## Dimension faults
//!
//! When the embedding model starts producing vectors of another size (for
//! example after a model swap), [`KnowledgeBase::query`] rebuilds the index
//! from the corpus it last built from and retries once. Without a retained
//! corpus the query fails with [`ForgeError::StaleIndex`].

mod cache;
mod corpus;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use forge_db::vector::{
    create_vector_index, load_descriptor, open_vector_index, write_descriptor, IndexDescriptor,
    VectorIndexBackend, VectorInsert, VectorMetric,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::chunker::{Chunk, Chunker};
use crate::config::{ForgeConfig, KnowledgeConfig};
use crate::db_adapter::IntoForgeDbResult;
use crate::embedding::{EmbeddingGateway, SkippedChunk};
use crate::errors::ForgeError;
use crate::model_adapter::ModelEmbeddingBackend;
use crate::reranker::{create_reranker_backend, RerankerBackend};
use crate::vector_index::{check_index_compatibility, IndexCompatibility, IndexExpectation};

pub use cache::{cache_dir_for, cache_fingerprint, CACHE_DIR_PREFIX, CHUNKS_FILENAME};
pub use corpus::{Corpus, Document, REFERENCE_EXTENSION};

// ============================================================================
// Result types
// ============================================================================

/// Outcome of [`KnowledgeBase::build`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildResult {
    /// The persisted cache was loaded without re-embedding.
    pub cache_hit: bool,
    /// Chunks in the index.
    pub chunk_count: usize,
    /// Chunks that could not be embedded.
    pub skipped: Vec<SkippedChunk>,
    /// Vector dimension of the index.
    pub dimension: usize,
    /// SHA-256 of the corpus.
    pub content_hash: String,
    /// Cache directory.
    pub cache_dir: PathBuf,
}

/// A retrieved chunk with its similarity score.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredChunk {
    /// The chunk.
    pub chunk: Chunk,
    /// Similarity between query and chunk vectors.
    pub score: f32,
    /// Reranker score, when a reranker ordered the results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
}

/// A loaded index with its chunk records.
struct ActiveIndex {
    descriptor: IndexDescriptor,
    chunks: HashMap<usize, Chunk>,
    index: Arc<dyn VectorIndexBackend>,
}

// ============================================================================
// KnowledgeBase
// ============================================================================

/// Queryable semantic index over a reference corpus.
pub struct KnowledgeBase {
    gateway: EmbeddingGateway,
    reranker: Option<Arc<dyn RerankerBackend>>,
    chunker: Chunker,
    top_k: usize,
    candidate_multiplier: usize,
    cache_dir: PathBuf,
    active: Option<ActiveIndex>,
    corpus: Option<Corpus>,
    rebuilds: usize,
}

impl std::fmt::Debug for KnowledgeBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeBase")
            .field("model", &self.gateway.model_id())
            .field("chunker", &self.chunker)
            .field("cache_dir", &self.cache_dir)
            .field("loaded", &self.active.is_some())
            .field("rebuilds", &self.rebuilds)
            .finish_non_exhaustive()
    }
}

impl KnowledgeBase {
    /// Create a knowledge base. Nothing is read or built until [`build`](Self::build)
    /// or [`open_cached`](Self::open_cached).
    ///
    /// # Errors
    ///
    /// Invalid chunking parameters.
    pub fn new(
        gateway: EmbeddingGateway,
        reranker: Option<Arc<dyn RerankerBackend>>,
        config: &KnowledgeConfig,
    ) -> Result<Self, ForgeError> {
        let chunker = Chunker::new(config.chunk_size, config.chunk_overlap)?;
        let fingerprint =
            cache_fingerprint(gateway.model_id(), config.chunk_size, config.chunk_overlap);
        let cache_dir = cache_dir_for(&config.cache_dir, &fingerprint);

        Ok(Self {
            gateway,
            reranker,
            chunker,
            top_k: config.top_k,
            candidate_multiplier: config.candidate_multiplier.max(1),
            cache_dir,
            active: None,
            corpus: None,
            rebuilds: 0,
        })
    }

    /// Create a knowledge base with the configured embedding model and reranker.
    pub fn from_config(config: &ForgeConfig) -> Result<Self, ForgeError> {
        let backend = ModelEmbeddingBackend::from_config(&config.models.embedding)?;
        let gateway = EmbeddingGateway::new(Arc::new(backend), config.knowledge.embedding_batch_size);
        let reranker = create_reranker_backend(config)?;
        Self::new(gateway, reranker, &config.knowledge)
    }

    /// Cache directory of this configuration.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Default result count for queries.
    pub fn default_top_k(&self) -> usize {
        self.top_k
    }

    /// Number of automatic rebuilds performed after dimension faults.
    pub fn rebuild_count(&self) -> usize {
        self.rebuilds
    }

    /// Whether an index is loaded.
    pub fn is_loaded(&self) -> bool {
        self.active.is_some()
    }

    /// Descriptor of the loaded index.
    pub fn descriptor(&self) -> Option<&IndexDescriptor> {
        self.active.as_ref().map(|a| &a.descriptor)
    }

    /// Build the index for `corpus`, or load it from cache.
    ///
    /// The corpus is retained for automatic rebuilds.
    ///
    /// # Errors
    ///
    /// - [`ForgeError::EmptyCorpus`] when the corpus has no text.
    /// - [`ForgeError::Build`] when no chunk could be embedded.
    pub fn build(&mut self, corpus: &Corpus, force_rebuild: bool) -> Result<BuildResult, ForgeError> {
        if corpus.is_empty() {
            return Err(ForgeError::EmptyCorpus);
        }
        self.corpus = Some(corpus.clone());

        let content_hash = corpus.content_hash();
        let dimension = self.gateway.dimension()?;

        if !force_rebuild {
            let expected = IndexExpectation {
                source_content_hash: Some(&content_hash),
                dimension,
                chunk_size: self.chunker.chunk_size(),
                chunk_overlap: self.chunker.chunk_overlap(),
            };
            match check_index_compatibility(&self.cache_dir, &expected) {
                IndexCompatibility::Compatible => match self.load_active() {
                    Ok(active) => {
                        let chunk_count = active.chunks.len();
                        info!(
                            chunks = chunk_count,
                            dir = %self.cache_dir.display(),
                            "Knowledge base cache hit"
                        );
                        self.active = Some(active);
                        return Ok(BuildResult {
                            cache_hit: true,
                            chunk_count,
                            skipped: Vec::new(),
                            dimension,
                            content_hash,
                            cache_dir: self.cache_dir.clone(),
                        });
                    }
                    Err(e) => warn!(error = %e, "Cached knowledge base unreadable, rebuilding"),
                },
                other => info!(reason = %other.describe(), "Rebuilding knowledge base"),
            }
        } else {
            info!("Forced knowledge base rebuild");
        }

        self.rebuild_from(corpus, content_hash, dimension)
    }

    /// Load the persisted index without a corpus.
    ///
    /// Returns `false` when nothing is cached. Since no corpus is retained, a
    /// later dimension fault surfaces as [`ForgeError::StaleIndex`].
    pub fn open_cached(&mut self) -> Result<bool, ForgeError> {
        match load_descriptor(&self.cache_dir).into_forge_result()? {
            Some(_) => {
                self.active = Some(self.load_active()?);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drop the persisted cache and the loaded index.
    ///
    /// Returns whether a cache existed. The retained corpus is kept, so the
    /// next query rebuilds from it.
    pub fn invalidate(&mut self) -> Result<bool, ForgeError> {
        self.active = None;
        let removed = cache::remove_cache(&self.cache_dir)?;
        info!(removed, dir = %self.cache_dir.display(), "Invalidated knowledge base cache");
        Ok(removed)
    }

    /// Retrieve up to `top_k` chunks relevant to `text`.
    ///
    /// Results are ordered by descending score, ties by chunk sequence. With
    /// a reranker, `top_k × candidate_multiplier` candidates are reranked
    /// before truncation; reranker failures fall back to similarity order.
    ///
    /// # Errors
    ///
    /// - [`ForgeError::StaleIndex`] when no index is loaded and no corpus is
    ///   retained, or a dimension fault cannot be repaired.
    /// - [`ForgeError::Retrieval`] when the query cannot be embedded.
    pub fn query(&mut self, text: &str, top_k: usize) -> Result<Vec<ScoredChunk>, ForgeError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        if self.active.is_none() {
            match self.corpus.clone() {
                Some(corpus) => {
                    self.build(&corpus, false)?;
                }
                None => {
                    return Err(ForgeError::StaleIndex {
                        reason: "knowledge base has not been built".to_string(),
                    })
                }
            }
        }

        let vector = self.gateway.embed_query(text)?;
        let indexed_dimension = self.active.as_ref().map(|a| a.descriptor.dimension).unwrap_or(0);

        if vector.len() != indexed_dimension {
            let fault = IndexCompatibility::DimensionMismatch {
                stored: indexed_dimension,
                expected: vector.len(),
            };
            let Some(corpus) = self.corpus.clone() else {
                return Err(ForgeError::StaleIndex {
                    reason: fault.describe(),
                });
            };

            warn!(reason = %fault.describe(), "Dimension fault, rebuilding knowledge base");
            self.rebuilds += 1;
            self.rebuild_from(&corpus, corpus.content_hash(), vector.len())?;
        }

        self.search(text, &vector, top_k)
    }

    fn search(&self, text: &str, vector: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>, ForgeError> {
        let active = self.active.as_ref().ok_or_else(|| ForgeError::StaleIndex {
            reason: "knowledge base has not been built".to_string(),
        })?;

        let limit = if self.reranker.is_some() {
            top_k.saturating_mul(self.candidate_multiplier)
        } else {
            top_k
        };

        let hits = active.index.query(vector, limit).into_forge_result()?;
        let mut results: Vec<ScoredChunk> = hits
            .into_iter()
            .filter_map(|hit| {
                let chunk = active.chunks.get(&(hit.id.0 as usize));
                if chunk.is_none() {
                    warn!(id = hit.id.0, "Vector without chunk record, ignoring");
                }
                chunk.map(|c| ScoredChunk {
                    chunk: c.clone(),
                    score: hit.score,
                    rerank_score: None,
                })
            })
            .collect();

        if let Some(reranker) = &self.reranker {
            if results.len() > 1 {
                results = rerank(reranker.as_ref(), text, results);
            }
        }

        results.truncate(top_k);
        debug!(query = text, returned = results.len(), "Knowledge base query");
        Ok(results)
    }

    fn rebuild_from(
        &mut self,
        corpus: &Corpus,
        content_hash: String,
        dimension: usize,
    ) -> Result<BuildResult, ForgeError> {
        let chunks = self.chunker.split_all(corpus.as_pairs());
        if chunks.is_empty() {
            return Err(ForgeError::EmptyCorpus);
        }
        info!(
            documents = corpus.len(),
            chunks = chunks.len(),
            dimension,
            model = self.gateway.model_id(),
            "Building knowledge base"
        );

        let embedded = self.gateway.embed_chunks(&chunks, dimension);
        if embedded.vectors.is_empty() {
            return Err(ForgeError::build(format!(
                "none of {} chunks could be embedded with `{}`",
                chunks.len(),
                self.gateway.model_id()
            )));
        }

        self.active = None;
        cache::remove_cache(&self.cache_dir)?;
        std::fs::create_dir_all(&self.cache_dir)
            .map_err(|e| ForgeError::kb_cache_io(&self.cache_dir, e.to_string()))?;

        let index = create_vector_index(&self.cache_dir, dimension, VectorMetric::Cosine);
        let inserts: Vec<VectorInsert> = embedded
            .vectors
            .into_iter()
            .map(|(seq, v)| VectorInsert::new(seq, v))
            .collect();
        index.upsert(&inserts).into_forge_result()?;
        index.flush().into_forge_result()?;

        let skipped_ids: std::collections::HashSet<usize> =
            embedded.skipped.iter().map(|s| s.sequence_index).collect();
        let kept: Vec<Chunk> = chunks
            .into_iter()
            .filter(|c| !skipped_ids.contains(&c.sequence_index))
            .collect();
        cache::write_chunks(&self.cache_dir, &kept)?;

        let descriptor = IndexDescriptor::new(dimension, content_hash.clone())
            .with_model(self.gateway.model_id())
            .with_chunking(self.chunker.chunk_size(), self.chunker.chunk_overlap())
            .with_chunk_count(kept.len())
            .with_metric(VectorMetric::Cosine);
        write_descriptor(&self.cache_dir, &descriptor).into_forge_result()?;

        if !embedded.skipped.is_empty() {
            warn!(skipped = embedded.skipped.len(), "Some chunks were not embedded");
        }
        info!(chunks = kept.len(), dir = %self.cache_dir.display(), "Knowledge base built");

        let chunk_count = kept.len();
        self.active = Some(ActiveIndex {
            descriptor,
            chunks: kept.into_iter().map(|c| (c.sequence_index, c)).collect(),
            index,
        });

        Ok(BuildResult {
            cache_hit: false,
            chunk_count,
            skipped: embedded.skipped,
            dimension,
            content_hash,
            cache_dir: self.cache_dir.clone(),
        })
    }

    fn load_active(&self) -> Result<ActiveIndex, ForgeError> {
        let descriptor = load_descriptor(&self.cache_dir)
            .into_forge_result()?
            .ok_or_else(|| ForgeError::kb_cache_io(&self.cache_dir, "descriptor missing"))?;
        let index = open_vector_index(&self.cache_dir).into_forge_result()?;
        if index.dimension() != descriptor.dimension {
            return Err(ForgeError::KbCacheParse {
                path: self.cache_dir.clone(),
                message: format!(
                    "vectors have dimension {}, descriptor says {}",
                    index.dimension(),
                    descriptor.dimension
                ),
            });
        }
        let chunks = cache::load_chunks(&self.cache_dir)?;
        debug!(chunks = chunks.len(), "Loaded knowledge base cache");

        Ok(ActiveIndex {
            descriptor,
            chunks: chunks.into_iter().map(|c| (c.sequence_index, c)).collect(),
            index,
        })
    }
}

fn rerank(reranker: &dyn RerankerBackend, query: &str, candidates: Vec<ScoredChunk>) -> Vec<ScoredChunk> {
    let documents: Vec<String> = candidates.iter().map(|c| c.chunk.text.clone()).collect();
    match reranker.rerank(query, &documents) {
        Ok(order) => {
            let mut slots: Vec<Option<ScoredChunk>> = candidates.into_iter().map(Some).collect();
            let mut reranked = Vec::with_capacity(slots.len());
            for (idx, score) in order {
                if let Some(mut item) = slots.get_mut(idx).and_then(Option::take) {
                    item.rerank_score = Some(score);
                    reranked.push(item);
                }
            }
            // Candidates the reranker did not mention keep similarity order at the end.
            reranked.extend(slots.into_iter().flatten());
            reranked
        }
        Err(e) => {
            warn!(model = reranker.model_id(), error = %e, "Reranker failed, keeping similarity order");
            candidates
        }
    }
}
