//! Prompt assembly for outline, chapter, summary and review calls.
//!
//! Wording lives here so the orchestrator and validator only deal with
//! structured inputs.

use crate::config::NovelConfig;
use crate::knowledge::ScoredChunk;
use crate::outline::OutlineEntry;

/// Marker a reviewer writes when the chapter must be revised.
pub const REVISION_MARKER: &str = "需要修改";

const NO_PRIOR_CONTEXT: &str = "（这是第一章，无前文）";

// ============================================================================
// Context package
// ============================================================================

/// Neighbouring material for one chapter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChapterContext {
    /// Summary of the previous chapter.
    pub prev_summary: Option<String>,
    /// Tail of the previous chapter, used when no summary exists.
    pub prev_excerpt: Option<String>,
    /// Outline of the next chapter.
    pub next_outline: Option<OutlineEntry>,
    /// Head of the next chapter, used when no next outline exists.
    pub next_excerpt: Option<String>,
}

impl ChapterContext {
    /// Build the package from raw neighbours, truncating excerpts to `max_chars`.
    pub fn assemble(
        prev_summary: Option<String>,
        prev_content: Option<&str>,
        next_outline: Option<OutlineEntry>,
        next_content: Option<&str>,
        max_chars: usize,
    ) -> Self {
        let prev_excerpt = match &prev_summary {
            Some(_) => None,
            None => prev_content.map(|c| tail_chars(c, max_chars)),
        };
        let next_excerpt = match &next_outline {
            Some(_) => None,
            None => next_content.map(|c| head_chars(c, max_chars)),
        };
        Self {
            prev_summary,
            prev_excerpt,
            next_outline,
            next_excerpt,
        }
    }

    /// Render as prompt text.
    pub fn render(&self) -> String {
        let mut parts = Vec::new();
        match (&self.prev_summary, &self.prev_excerpt) {
            (Some(summary), _) => parts.push(format!("前文摘要：\n{}", summary)),
            (None, Some(excerpt)) => parts.push(format!("前一章结尾部分：\n...{}", excerpt)),
            (None, None) => parts.push(NO_PRIOR_CONTEXT.to_string()),
        }
        match (&self.next_outline, &self.next_excerpt) {
            (Some(next), _) => parts.push(format!(
                "下一章大纲：\n第{}章 {}\n关键剧情点：{}",
                next.chapter_number,
                next.title,
                next.key_points.join("，")
            )),
            (None, Some(excerpt)) => parts.push(format!("下一章开头部分：\n{}...", excerpt)),
            (None, None) => {}
        }
        parts.join("\n\n")
    }
}

/// Last `n` characters of `text`.
pub fn tail_chars(text: &str, n: usize) -> String {
    let count = text.chars().count();
    text.chars().skip(count.saturating_sub(n)).collect()
}

/// First `n` characters of `text`.
pub fn head_chars(text: &str, n: usize) -> String {
    text.chars().take(n).collect()
}

// ============================================================================
// References
// ============================================================================

/// Retrieved reference text split into plot, character and setting thirds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceSections {
    /// First third.
    pub plot: Vec<String>,
    /// Second third.
    pub character: Vec<String>,
    /// Remainder.
    pub setting: Vec<String>,
}

impl ReferenceSections {
    /// Split results in rank order.
    pub fn from_results(results: &[ScoredChunk]) -> Self {
        let texts: Vec<String> = results.iter().map(|r| r.chunk.text.clone()).collect();
        let total = texts.len();
        let plot_end = total.div_ceil(3);
        let char_end = (total * 2).div_ceil(3);
        Self {
            plot: texts[..plot_end].to_vec(),
            character: texts[plot_end..char_end].to_vec(),
            setting: texts[char_end..].to_vec(),
        }
    }

    /// True when nothing was retrieved.
    pub fn is_empty(&self) -> bool {
        self.plot.is_empty() && self.character.is_empty() && self.setting.is_empty()
    }
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "（无）".to_string()
    } else {
        items.join("\n")
    }
}

fn outline_block(entry: &OutlineEntry) -> String {
    format!(
        "章节号：{}\n标题：{}\n关键剧情点：{}\n涉及角色：{}\n场景设定：{}\n核心冲突：{}",
        entry.chapter_number,
        entry.title,
        entry.key_points.join("，"),
        entry.characters.join("，"),
        entry.settings.join("，"),
        entry.conflicts.join("，"),
    )
}

// ============================================================================
// Prompts
// ============================================================================

/// Prompt for a batch of outline entries.
pub fn outline_prompt(
    novel: &NovelConfig,
    first_chapter: u32,
    count: usize,
    context: &str,
    extra: Option<&str>,
) -> String {
    let mut prompt = format!(
        "请为一部{genre}小说《{title}》生成从第{first}章开始的{count}章详细大纲。\n主题：{theme}\n写作风格：{style}\n\n\
         [现有上下文]\n{context}\n\n\
         [要求]\n\
         1. 每章包含 chapter_number、title、key_points、characters、settings、conflicts 字段，后四项为字符串列表。\n\
         2. 情节与已有大纲自然衔接，人物发展合理。\n\
         3. 仅返回一个包含{count}个对象的 JSON 数组，以 '[' 开始，以 ']' 结束。\n",
        genre = novel.genre,
        title = novel.title,
        first = first_chapter,
        count = count,
        theme = novel.theme,
        style = novel.style,
        context = if context.trim().is_empty() { "（无）" } else { context },
    );
    if let Some(extra) = extra.filter(|e| !e.trim().is_empty()) {
        prompt.push_str(&format!("\n[额外要求]\n{}\n", extra));
    }
    prompt
}

/// Inputs of a chapter prompt.
#[derive(Debug, Clone, Copy)]
pub struct ChapterPrompt<'a> {
    /// Novel settings.
    pub novel: &'a NovelConfig,
    /// Outline of the chapter.
    pub entry: &'a OutlineEntry,
    /// Retrieved references.
    pub references: &'a ReferenceSections,
    /// Neighbouring chapters.
    pub context: &'a ChapterContext,
    /// Corrective guidance from the previous attempt.
    pub guidance: Option<&'a str>,
    /// Caller-supplied extra instructions.
    pub extra: Option<&'a str>,
}

impl ChapterPrompt<'_> {
    /// Render the prompt.
    pub fn render(&self) -> String {
        let mut prompt = format!(
            "请根据以下章节大纲和参考信息，创作小说章节正文。\n\n\
             [章节大纲]\n{outline}\n\n\
             [参考信息]\n情节参考：\n{plot}\n\n角色参考：\n{character}\n\n场景参考：\n{setting}\n\n\
             [写作风格]\n{style}\n\n\
             [格式要求]\n1. 仅返回章节正文，不使用小标题和 markdown。\n2. 正文约{length}字。\n",
            outline = outline_block(self.entry),
            plot = join_or_none(&self.references.plot),
            character = join_or_none(&self.references.character),
            setting = join_or_none(&self.references.setting),
            style = self.novel.style,
            length = self.novel.chapter_length,
        );
        if let Some(extra) = self.extra.filter(|e| !e.trim().is_empty()) {
            prompt.push_str(&format!("\n[额外要求]\n{}\n", extra));
        }
        prompt.push_str(&format!("\n[上下文信息]\n{}\n", self.context.render()));
        if let Some(guidance) = self.guidance.filter(|g| !g.trim().is_empty()) {
            prompt.push_str(&format!("\n[修改意见]\n上一版本未通过检查，请避免以下问题：\n{}\n", guidance));
        }
        prompt.push_str(
            "\n[连贯性要求]\n开头承接上一章结尾，结尾为下一章埋下伏笔，人物言行前后一致。\n",
        );
        prompt
    }
}

/// Prompt for a chapter summary.
pub fn summary_prompt(content_excerpt: &str) -> String {
    format!(
        "请为以下章节内容生成一个200字以内的摘要：\n\
         1. 直接描述主要情节发展，不要使用\"本章讲述了\"等描述性文字\n\
         2. 突出关键人物的重要行动\n\
         3. 使用第三人称，语言简洁\n\n\
         章节内容：\n{}",
        content_excerpt
    )
}

const REVIEW_FORMAT: &str = "===== 输出格式 =====\n\
     [总体评分]: <0-100>\n\
     [问题列表]:\n1. <问题描述>\n\
     [修改必要性]: <\"需要修改\"或\"无需修改\">\n";

/// Prompt scoring a chapter against its outline.
pub fn logic_review_prompt(entry: &OutlineEntry, content: &str) -> String {
    format!(
        "请检查以下章节内容的逻辑严密性，以及是否覆盖了大纲中的关键剧情点。\n\n\
         [章节大纲]\n{}\n\n[章节内容]\n{}\n\n{}",
        outline_block(entry),
        content,
        REVIEW_FORMAT
    )
}

/// Prompt checking a chapter against earlier summaries.
pub fn continuity_review_prompt(
    entry: &OutlineEntry,
    content: &str,
    prev_summary: &str,
    history: &str,
) -> String {
    format!(
        "请检查以下章节与前文是否连贯，人物状态、地点与时间线是否与前文矛盾。\n\n\
         [前文摘要]\n{}\n\n[上一章摘要]\n{}\n\n[当前章节大纲]\n{}\n\n[待检查章节内容]\n{}\n\n{}",
        if history.trim().is_empty() { "（无前文摘要）" } else { history },
        prev_summary,
        outline_block(entry),
        content,
        REVIEW_FORMAT
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::Chunk;

    fn scored(text: &str) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                id: format!("a.txt#{}", text),
                source_file: "a.txt".into(),
                text: text.into(),
                sequence_index: 0,
                char_offset: 0,
            },
            score: 1.0,
            rerank_score: None,
        }
    }

    #[test]
    fn test_references_split_into_thirds() {
        let results: Vec<ScoredChunk> = ["一", "二", "三", "四", "五"].iter().map(|t| scored(t)).collect();
        let refs = ReferenceSections::from_results(&results);
        assert_eq!(refs.plot, vec!["一", "二"]);
        assert_eq!(refs.character, vec!["三", "四"]);
        assert_eq!(refs.setting, vec!["五"]);
        assert!(ReferenceSections::from_results(&[]).is_empty());
    }

    #[test]
    fn test_context_prefers_summary_over_excerpt() {
        let ctx = ChapterContext::assemble(Some("林风拜师".into()), Some("很长的正文"), None, None, 3);
        assert!(ctx.prev_excerpt.is_none());
        assert!(ctx.render().starts_with("前文摘要：\n林风拜师"));

        let ctx = ChapterContext::assemble(None, Some("甲乙丙丁戊"), None, Some("子丑寅卯"), 3);
        assert_eq!(ctx.prev_excerpt.as_deref(), Some("丙丁戊"));
        assert_eq!(ctx.next_excerpt.as_deref(), Some("子丑寅"));
        assert!(ctx.render().contains("前一章结尾部分：\n...丙丁戊"));
    }

    #[test]
    fn test_first_chapter_context() {
        let ctx = ChapterContext::assemble(None, None, Some(OutlineEntry::new(2, "次章")), None, 100);
        let text = ctx.render();
        assert!(text.contains(NO_PRIOR_CONTEXT));
        assert!(text.contains("第2章 次章"));
    }

    #[test]
    fn test_chapter_prompt_includes_guidance_and_extra() {
        let novel = NovelConfig::default();
        let entry = OutlineEntry::new(1, "开端");
        let refs = ReferenceSections::default();
        let ctx = ChapterContext::default();
        let prompt = ChapterPrompt {
            novel: &novel,
            entry: &entry,
            references: &refs,
            context: &ctx,
            guidance: Some("缺少角色：林风"),
            extra: Some("多写对话"),
        }
        .render();
        assert!(prompt.contains("标题：开端"));
        assert!(prompt.contains("[修改意见]"));
        assert!(prompt.contains("缺少角色：林风"));
        assert!(prompt.contains("多写对话"));
    }

    #[test]
    fn test_outline_prompt_mentions_range() {
        let novel = NovelConfig::default();
        let prompt = outline_prompt(&novel, 51, 50, "", None);
        assert!(prompt.contains("第51章开始的50章"));
        assert!(prompt.contains("（无）"));
    }
}
