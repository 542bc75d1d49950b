//! Deterministic test doubles shared by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use forge_model::{GenerationModel, GenerationParams, ModelError, ModelResult, ProviderKind};

use crate::embedding::EmbeddingBackend;
use crate::errors::ForgeError;
use crate::gateway::Sleeper;
use crate::reranker::RerankerBackend;

// ============================================================================
// HashEmbedder
// ============================================================================

/// Bag-of-characters embedding: each character hashes into a bucket.
///
/// Texts sharing characters get similar vectors, which is enough for
/// retrieval tests to rank by relevance.
#[derive(Debug)]
pub struct HashEmbedder {
    dimension: AtomicUsize,
    batch_calls: AtomicUsize,
    fail_marker: Option<char>,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: AtomicUsize::new(dimension),
            batch_calls: AtomicUsize::new(0),
            fail_marker: None,
        }
    }

    /// Fail any batch containing `marker`.
    pub fn failing_on(mut self, marker: &str) -> Self {
        self.fail_marker = marker.chars().next();
        self
    }

    /// Simulate swapping in a model with another output size.
    pub fn set_dimension(&self, dimension: usize) {
        self.dimension.store(dimension, Ordering::SeqCst);
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    pub fn vector_for(text: &str, dimension: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; dimension];
        for c in text.chars().filter(|c| !c.is_whitespace()) {
            let bucket = (c as u32 as usize).wrapping_mul(2654435761) % dimension;
            v[bucket] += 1.0;
        }
        v
    }
}

impl EmbeddingBackend for HashEmbedder {
    fn model_id(&self) -> &str {
        "hash-embedder"
    }

    fn dimension(&self) -> Result<usize, ForgeError> {
        Ok(self.dimension.load(Ordering::SeqCst))
    }

    fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ForgeError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(marker) = self.fail_marker {
            if inputs.iter().any(|t| t.contains(marker)) {
                return Err(ForgeError::Retrieval {
                    model_id: "hash-embedder".into(),
                    reason: "scripted failure".into(),
                });
            }
        }
        let dimension = self.dimension.load(Ordering::SeqCst);
        Ok(inputs.iter().map(|t| Self::vector_for(t, dimension)).collect())
    }
}

// ============================================================================
// LengthReranker
// ============================================================================

/// Reranker that prefers the longest document, or fails on demand.
#[derive(Debug, Default)]
pub struct LengthReranker {
    pub fail: bool,
}

impl RerankerBackend for LengthReranker {
    fn model_id(&self) -> &str {
        "length-reranker"
    }

    fn rerank(&self, _query: &str, documents: &[String]) -> Result<Vec<(usize, f32)>, ForgeError> {
        if self.fail {
            return Err(ForgeError::Retrieval {
                model_id: "length-reranker".into(),
                reason: "offline".into(),
            });
        }
        let mut scored: Vec<(usize, f32)> = documents
            .iter()
            .enumerate()
            .map(|(i, d)| (i, d.chars().count() as f32))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap().then(a.0.cmp(&b.0)));
        Ok(scored)
    }
}

// ============================================================================
// ScriptedModel
// ============================================================================

/// Generation model answering from a script, then from a fallback closure.
#[derive(Debug, Clone)]
pub struct ScriptedModel {
    id: String,
    script: Arc<Mutex<VecDeque<ModelResult<String>>>>,
    prompts: Arc<Mutex<Vec<String>>>,
    responder: Option<fn(&str) -> String>,
}

impl ScriptedModel {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            script: Arc::new(Mutex::new(VecDeque::new())),
            prompts: Arc::new(Mutex::new(Vec::new())),
            responder: None,
        }
    }

    /// Answer every unscripted call with `f(prompt)`.
    pub fn responding(mut self, f: fn(&str) -> String) -> Self {
        self.responder = Some(f);
        self
    }

    pub fn push_ok(&self, text: &str) -> &Self {
        self.script.lock().unwrap().push_back(Ok(text.to_string()));
        self
    }

    pub fn push_err(&self, err: ModelError) -> &Self {
        self.script.lock().unwrap().push_back(Err(err));
        self
    }

    pub fn push_timeouts(&self, n: usize) -> &Self {
        for _ in 0..n {
            self.push_err(ModelError::Timeout {
                model_id: self.id.clone(),
                message: "timed out".into(),
            });
        }
        self
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl GenerationModel for ScriptedModel {
    fn generate(&self, prompt: &str, _params: &GenerationParams) -> ModelResult<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            return next;
        }
        match self.responder {
            Some(f) => Ok(f(prompt)),
            None => Err(ModelError::Connection {
                model_id: self.id.clone(),
                message: "script exhausted".into(),
            }),
        }
    }

    fn model_id(&self) -> &str {
        &self.id
    }

    fn provider(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }
}

// ============================================================================
// RecordingSleeper
// ============================================================================

/// Sleeper that records requested delays instead of sleeping.
#[derive(Debug, Default, Clone)]
pub struct RecordingSleeper {
    pub delays: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn recorded(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
    }
}
