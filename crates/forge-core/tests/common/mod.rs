//! Shared doubles for forge-core integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use forge_core::{
    EmbeddingBackend, ForgeError, GenerationRole, ModelGateway, ModelProfile, RetryPolicy, Sleeper,
};
use forge_model::{GenerationModel, GenerationParams, ModelError, ModelResult, ProviderKind};

/// Bag-of-characters embedder whose output size can be changed mid-test.
#[derive(Debug)]
pub struct HashEmbedder {
    dimension: AtomicUsize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Arc<Self> {
        Arc::new(Self {
            dimension: AtomicUsize::new(dimension),
        })
    }

    pub fn set_dimension(&self, dimension: usize) {
        self.dimension.store(dimension, Ordering::SeqCst);
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
        let dimension = self.dimension.load(Ordering::SeqCst);
        Ok(inputs
            .iter()
            .map(|text| {
                let mut v = vec![0.0f32; dimension];
                for c in text.chars().filter(|c| !c.is_whitespace()) {
                    v[(c as usize).wrapping_mul(2654435761) % dimension] += 1.0;
                }
                v
            })
            .collect())
    }
}

/// Generation model answering every prompt with a function.
#[derive(Debug)]
pub struct FnModel {
    id: String,
    respond: Option<fn(&str) -> String>,
    calls: AtomicUsize,
}

impl FnModel {
    pub fn new(id: &str, respond: fn(&str) -> String) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            respond: Some(respond),
            calls: AtomicUsize::new(0),
        })
    }

    /// Model whose every call times out.
    pub fn unreachable(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            respond: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl GenerationModel for FnModel {
    fn generate(&self, prompt: &str, _params: &GenerationParams) -> ModelResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.respond {
            Some(f) => Ok(f(prompt)),
            None => Err(ModelError::Timeout {
                model_id: self.id.clone(),
                message: "timed out".to_string(),
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

#[derive(Debug)]
pub struct NoSleep;

impl Sleeper for NoSleep {
    fn sleep(&self, _duration: Duration) {}
}

/// Answers outline prompts with one JSON object per requested chapter.
pub fn outliner(prompt: &str) -> String {
    let re = regex::Regex::new(r"从第(\d+)章开始的(\d+)章").unwrap();
    let caps = re.captures(prompt).unwrap();
    let first: u32 = caps[1].parse().unwrap();
    let count: u32 = caps[2].parse().unwrap();
    let items: Vec<String> = (first..first + count)
        .map(|n| {
            format!(
                r#"{{"title": "第{n}回", "key_points": ["修炼突破"], "characters": ["林风"], "settings": ["青云宗"], "conflicts": ["心魔"]}}"#
            )
        })
        .collect();
    format!("以下是大纲：\n```json\n[{}]\n```", items.join(",\n"))
}

static DRAFTS: AtomicUsize = AtomicUsize::new(0);

/// Answers chapter prompts with a short chapter and summary prompts with a summary.
pub fn writer(prompt: &str) -> String {
    if prompt.starts_with("请为以下章节内容生成") {
        return "本章讲述了林风闭关修炼。".to_string();
    }
    let title = prompt.lines().find_map(|l| l.strip_prefix("标题：")).unwrap_or("无题");
    let draft = DRAFTS.fetch_add(1, Ordering::SeqCst);
    format!("{title}：林风在青云宗后山闭关，终于突破瓶颈。（第{draft}稿）")
}

/// Gateway with the given outline and content models and no retry delay.
pub fn gateway(outline: Arc<FnModel>, content: Arc<FnModel>, fallback: Option<Arc<FnModel>>) -> ModelGateway {
    let policy = RetryPolicy::fixed(2, Duration::from_secs(1));
    let mut content_profile =
        ModelProfile::new(GenerationRole::Content, content, policy, GenerationParams::default());
    if let Some(fallback) = fallback {
        content_profile = content_profile.with_fallback(fallback);
    }
    ModelGateway::new(Arc::new(NoSleep))
        .with_profile(ModelProfile::new(
            GenerationRole::Outline,
            outline,
            policy,
            GenerationParams::default(),
        ))
        .with_profile(content_profile)
}

/// Write `chars` characters of `sentence` repeated into `dir/name`.
pub fn write_reference(dir: &Path, name: &str, sentence: &str, chars: usize) -> usize {
    let text: String = sentence.chars().cycle().take(chars).collect();
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join(name), &text).unwrap();
    chars
}
