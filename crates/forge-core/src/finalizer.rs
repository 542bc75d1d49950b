//! Chapter summaries.

use tracing::debug;

use crate::errors::ForgeError;
use crate::gateway::{GenerationRole, ModelGateway};
use crate::prompts::{self, head_chars};

/// Boilerplate openings removed from summaries. Longer phrases come first so
/// that `本章主要讲述了` is not cut after `本章`.
const BOILERPLATE_PREFIXES: &[&str] = &[
    "这一章节主要",
    "本章主要讲述",
    "本章主要描述",
    "本章主要叙述",
    "本章主要介绍",
    "这一章节",
    "本章讲述",
    "本章描述",
    "本章叙述",
    "本章介绍",
    "这一章",
    "本章",
];

/// Strip leading boilerplate such as `本章讲述了` from a summary.
pub fn clean_summary(summary: &str) -> String {
    let mut text = summary.trim();
    if let Some(rest) = BOILERPLATE_PREFIXES.iter().find_map(|p| text.strip_prefix(p)) {
        text = rest;
        text = text.strip_prefix('了').unwrap_or(text);
        text = text.trim_start_matches(['：', ':', '，', ',', ' ']);
    }
    text.trim().to_string()
}

/// Derives chapter summaries with the content model.
#[derive(Debug, Clone)]
pub struct Finalizer {
    input_chars: usize,
}

impl Finalizer {
    /// Summarise the first `input_chars` characters of each chapter.
    pub fn new(input_chars: usize) -> Self {
        Self { input_chars }
    }

    /// Generate a cleaned summary for `content`.
    ///
    /// # Errors
    ///
    /// [`ForgeError::Generation`] when the content models are exhausted, or
    /// [`ForgeError::InvalidArgument`] when the cleaned summary is empty.
    pub fn summarize(&self, gateway: &ModelGateway, chapter: u32, content: &str) -> Result<String, ForgeError> {
        let excerpt = head_chars(content, self.input_chars);
        let raw = gateway.generate(GenerationRole::Content, &prompts::summary_prompt(&excerpt))?;
        let summary = clean_summary(&raw);
        if summary.is_empty() {
            return Err(ForgeError::InvalidArgument(format!(
                "summary of chapter {} is empty after cleaning",
                chapter
            )));
        }
        debug!(chapter, chars = summary.chars().count(), "Summary generated");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{ModelProfile, RetryPolicy};
    use crate::test_support::{RecordingSleeper, ScriptedModel};
    use forge_model::GenerationParams;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_clean_summary_prefixes() {
        assert_eq!(clean_summary("本章讲述了林风拜师。"), "林风拜师。");
        assert_eq!(clean_summary("本章主要讲述了林风拜师。"), "林风拜师。");
        assert_eq!(clean_summary("  这一章节主要：林风突破。"), "林风突破。");
        assert_eq!(clean_summary("这一章林风突破。"), "林风突破。");
        assert_eq!(clean_summary("林风突破。"), "林风突破。");
    }

    #[test]
    fn test_summarize_uses_truncated_content() {
        let model = ScriptedModel::new("writer");
        model.push_ok("本章讲述了林风拜入青云宗。");
        let gateway = ModelGateway::new(Arc::new(RecordingSleeper::default())).with_profile(ModelProfile::new(
            GenerationRole::Content,
            Arc::new(model.clone()),
            RetryPolicy::fixed(1, Duration::ZERO),
            GenerationParams::default(),
        ));
        let content = format!("{}{}", "甲".repeat(10), "乙".repeat(10));
        let summary = Finalizer::new(10).summarize(&gateway, 1, &content).unwrap();
        assert_eq!(summary, "林风拜入青云宗。");
        let prompt = &model.prompts()[0];
        assert!(prompt.contains(&"甲".repeat(10)));
        assert!(!prompt.contains('乙'));
    }

    #[test]
    fn test_boilerplate_only_summary_is_rejected() {
        let model = ScriptedModel::new("writer");
        model.push_ok("本章");
        let gateway = ModelGateway::new(Arc::new(RecordingSleeper::default())).with_profile(ModelProfile::new(
            GenerationRole::Content,
            Arc::new(model),
            RetryPolicy::fixed(1, Duration::ZERO),
            GenerationParams::default(),
        ));
        assert!(Finalizer::new(100).summarize(&gateway, 3, "内容").is_err());
    }
}
