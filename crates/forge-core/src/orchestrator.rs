//! Resumable per-chapter generation pipeline.
//!
//! Each chapter moves through
//! `NeedsOutline → NeedsContent → NeedsValidation → NeedsFinalization → Done`.
//! Persisted state decides where a chapter resumes:
//!
//! | outline | content | summary | state |
//! |---------|---------|---------|-------|
//! | no      | -       | -       | `NeedsOutline` |
//! | yes     | no      | -       | `NeedsContent` |
//! | yes     | yes     | no      | `NeedsFinalization` |
//! | yes     | yes     | yes     | `Done` |
//!
//! Content is only written once it validates, so `NeedsValidation` exists
//! only inside a run. `ProgressState::current_chapter` advances past a
//! chapter only after it is `Done`; a failed chapter pins it and the run
//! moves on to the next chapter.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ForgeConfig;
use crate::errors::ForgeError;
use crate::finalizer::Finalizer;
use crate::gateway::{GenerationRole, ModelGateway};
use crate::knowledge::{Corpus, KnowledgeBase, ScoredChunk};
use crate::outline::{parse_outline_response, OutlineBook, OutlineEntry};
use crate::prompts::{self, tail_chars, ChapterContext, ChapterPrompt, ReferenceSections};
use crate::store::{ProgressState, ProjectStore};
use crate::validator::{ConsistencyValidator, ValidationInput};

/// Existing outline entries shown to the outline model.
const OUTLINE_CONTEXT_ENTRIES: usize = 3;

// ============================================================================
// State and reports
// ============================================================================

/// Where a chapter stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChapterState {
    /// No outline entry.
    NeedsOutline,
    /// Outline present, no content.
    NeedsContent,
    /// Content generated but not yet validated.
    NeedsValidation,
    /// Content present, no summary.
    NeedsFinalization,
    /// Committed.
    Done,
    /// Last attempt failed; retried on the next run.
    Failed,
}

impl fmt::Display for ChapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NeedsOutline => "needs outline",
            Self::NeedsContent => "needs content",
            Self::NeedsValidation => "needs validation",
            Self::NeedsFinalization => "needs finalization",
            Self::Done => "done",
            Self::Failed => "failed",
        })
    }
}

/// A chapter that failed during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterFailure {
    /// Chapter number.
    pub chapter: u32,
    /// Error kind, see [`ForgeError::kind`].
    pub kind: String,
    /// Human-readable reason.
    pub reason: String,
}

impl ChapterFailure {
    fn new(chapter: u32, error: &ForgeError) -> Self {
        Self {
            chapter,
            kind: error.kind().to_string(),
            reason: error.to_string(),
        }
    }
}

/// Result of one command run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    /// Unique id of the run.
    pub run_id: Uuid,
    /// Command that produced the report.
    pub command: String,
    /// Chapters completed by this run.
    pub succeeded: Vec<u32>,
    /// Chapters that failed.
    pub failed: Vec<ChapterFailure>,
    /// Chapters left untouched because they were already done.
    pub skipped: Vec<u32>,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// End time.
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    fn start(command: &str) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            command: command.to_string(),
            succeeded: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    fn fail(&mut self, chapter: u32, error: &ForgeError) {
        self.failed.push(ChapterFailure::new(chapter, error));
    }

    fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        info!(
            run_id = %self.run_id,
            command = %self.command,
            succeeded = self.succeeded.len(),
            failed = self.failed.len(),
            skipped = self.skipped.len(),
            "Run finished"
        );
        self
    }

    /// True when no chapter failed.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// State of one chapter in [`ProjectStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterStatus {
    /// Chapter number.
    pub chapter: u32,
    /// Outline title, if outlined.
    pub title: Option<String>,
    /// Resolved state.
    pub state: ChapterState,
    /// Failure reason from the last run.
    pub failure: Option<String>,
}

/// Overview of a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStatus {
    /// Persisted progress.
    pub progress: ProgressState,
    /// Chapters with an outline entry.
    pub outlined: usize,
    /// Chapters committed.
    pub done: usize,
    /// Per-chapter state for `1..=target_chapters`.
    pub chapters: Vec<ChapterStatus>,
}

// ============================================================================
// Project view
// ============================================================================

/// Snapshot of persisted state used to resolve chapter states.
struct ProjectView {
    outline: OutlineBook,
    summaries: BTreeMap<u32, String>,
    written: BTreeSet<u32>,
}

impl ProjectView {
    fn load(store: &dyn ProjectStore) -> Result<Self, ForgeError> {
        Ok(Self {
            outline: store.load_outline()?,
            summaries: store.load_summaries()?,
            written: store.chapter_numbers()?.into_iter().collect(),
        })
    }

    fn state(&self, chapter: u32) -> ChapterState {
        if !self.outline.contains(chapter) {
            ChapterState::NeedsOutline
        } else if !self.written.contains(&chapter) {
            ChapterState::NeedsContent
        } else if !self.summaries.contains_key(&chapter) {
            ChapterState::NeedsFinalization
        } else {
            ChapterState::Done
        }
    }

    /// Summaries of chapters before `chapter`, newest last, truncated to `max_chars`.
    fn summary_history(&self, chapter: u32, max_chars: usize) -> String {
        let joined = self
            .summaries
            .range(..chapter)
            .map(|(n, s)| format!("第{}章：{}", n, s))
            .collect::<Vec<_>>()
            .join("\n");
        tail_chars(&joined, max_chars)
    }
}

/// Split `chapters` into runs of consecutive numbers of at most `size` chapters.
fn outline_batches(chapters: &[u32], size: u32) -> Vec<(u32, usize)> {
    let size = size.max(1) as usize;
    let mut batches: Vec<(u32, usize)> = Vec::new();
    for &chapter in chapters {
        if let Some((first, count)) = batches.last_mut() {
            if *first + *count as u32 == chapter && *count < size {
                *count += 1;
                continue;
            }
        }
        batches.push((chapter, 1));
    }
    batches
}

/// Resolve the state of chapters `1..=target_chapters` from persisted state.
pub fn project_status(store: &dyn ProjectStore, target_chapters: u32) -> Result<ProjectStatus, ForgeError> {
    let mut progress = store
        .load_progress()?
        .unwrap_or_else(|| ProgressState::new(target_chapters));
    progress.target_chapters = target_chapters;
    let view = ProjectView::load(store)?;

    let chapters: Vec<ChapterStatus> = (1..=target_chapters)
        .map(|chapter| {
            let mut state = view.state(chapter);
            let failure = progress.failed_chapters.get(&chapter).cloned();
            if failure.is_some() && state != ChapterState::Done {
                state = ChapterState::Failed;
            }
            ChapterStatus {
                chapter,
                title: view.outline.get(chapter).map(|e| e.title.clone()),
                state,
                failure,
            }
        })
        .collect();

    Ok(ProjectStatus {
        outlined: view.outline.len(),
        done: chapters.iter().filter(|c| c.state == ChapterState::Done).count(),
        progress,
        chapters,
    })
}

// ============================================================================
// GenerationOrchestrator
// ============================================================================

struct KnowledgeSource {
    kb: KnowledgeBase,
    corpus: Option<Corpus>,
    ready: bool,
}

/// Drives outline, content and finalization across chapters.
pub struct GenerationOrchestrator {
    config: ForgeConfig,
    store: Arc<dyn ProjectStore>,
    gateway: ModelGateway,
    validator: ConsistencyValidator,
    finalizer: Finalizer,
    knowledge: Option<KnowledgeSource>,
}

impl fmt::Debug for GenerationOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationOrchestrator")
            .field("store", &self.store)
            .field("knowledge", &self.knowledge.as_ref().map(|k| &k.kb))
            .finish_non_exhaustive()
    }
}

impl GenerationOrchestrator {
    /// Create an orchestrator without a knowledge base.
    ///
    /// The validator reviews with the gateway's review role when it has one.
    pub fn new(config: ForgeConfig, store: Arc<dyn ProjectStore>, gateway: ModelGateway) -> Self {
        let validator = ConsistencyValidator::new(config.validation.clone()).with_reviewer(gateway.clone());
        let finalizer = Finalizer::new(config.generation.summary_input_chars);
        Self {
            config,
            store,
            gateway,
            validator,
            finalizer,
            knowledge: None,
        }
    }

    /// Retrieve references from `kb`, built from `corpus` on first use.
    ///
    /// Without a corpus the cached index is opened instead.
    pub fn with_knowledge(mut self, kb: KnowledgeBase, corpus: Option<Corpus>) -> Self {
        self.knowledge = Some(KnowledgeSource {
            kb,
            corpus,
            ready: false,
        });
        self
    }

    /// Replace the validator.
    pub fn with_validator(mut self, validator: ConsistencyValidator) -> Self {
        self.validator = validator;
        self
    }

    /// The project store.
    pub fn store(&self) -> &Arc<dyn ProjectStore> {
        &self.store
    }

    /// The knowledge base, if any.
    pub fn knowledge_base(&self) -> Option<&KnowledgeBase> {
        self.knowledge.as_ref().map(|k| &k.kb)
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Generate outline entries for `start..=end`.
    ///
    /// Chapters that are already `Done` keep their entries unless `force`.
    pub fn outline(
        &mut self,
        start: u32,
        end: u32,
        extra: Option<&str>,
        force: bool,
    ) -> Result<RunReport, ForgeError> {
        if start == 0 || end < start {
            return Err(ForgeError::InvalidArgument(format!(
                "invalid chapter range {}..={}",
                start, end
            )));
        }
        let mut report = self.begin("outline")?;
        self.prepare_knowledge()?;

        let view = ProjectView::load(self.store.as_ref())?;
        let mut wanted = Vec::new();
        for chapter in start..=end {
            if !force && view.state(chapter) == ChapterState::Done {
                debug!(chapter, "Chapter done, keeping its outline");
                report.skipped.push(chapter);
            } else {
                wanted.push(chapter);
            }
        }

        let failures = self.generate_outlines(&wanted, extra, &mut report.succeeded)?;
        report.failed.extend(failures);
        Ok(report.finish())
    }

    /// Generate chapter content.
    ///
    /// With `target_chapter`, only that chapter is regenerated and progress
    /// moves only if it was the current chapter. Otherwise chapters
    /// `current_chapter..=target_chapters` are processed, starting at
    /// `start_chapter` when given.
    pub fn content(
        &mut self,
        start_chapter: Option<u32>,
        target_chapter: Option<u32>,
        extra: Option<&str>,
    ) -> Result<RunReport, ForgeError> {
        let mut report = self.begin("content")?;
        self.prepare_knowledge()?;
        let mut progress = self.load_progress()?;

        if let Some(chapter) = target_chapter {
            if chapter == 0 {
                return Err(ForgeError::InvalidArgument("chapter numbers start at 1".to_string()));
            }
            self.regenerate(chapter, extra, &mut progress, &mut report)?;
            return Ok(report.finish());
        }

        if let Some(start) = start_chapter {
            if start == 0 {
                return Err(ForgeError::InvalidArgument("chapter numbers start at 1".to_string()));
            }
            if start > progress.target_chapters + 1 {
                return Err(ForgeError::InvalidArgument(format!(
                    "start chapter {} is beyond the {} planned chapters",
                    start, progress.target_chapters
                )));
            }
            info!(from = progress.current_chapter, to = start, "Moving current chapter");
            progress.current_chapter = start;
            self.save_progress(&mut progress)?;
        }

        self.run_chapters(&mut progress, extra, &mut report)?;
        Ok(report.finish())
    }

    /// Re-derive the summaries of existing chapters.
    pub fn finalize(&mut self, chapters: &[u32]) -> Result<RunReport, ForgeError> {
        let mut report = self.begin("finalize")?;
        let mut progress = self.load_progress()?;

        for &chapter in chapters {
            let result = match self.store.load_chapter(chapter)? {
                Some(content) => self.finalize_chapter(chapter, &content),
                None => Err(ForgeError::ChapterMissing { chapter }),
            };
            match result {
                Ok(()) => {
                    report.succeeded.push(chapter);
                    progress.failed_chapters.remove(&chapter);
                    if progress.current_chapter == chapter {
                        self.advance(&mut progress)?;
                    }
                    self.save_progress(&mut progress)?;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(chapter, error = %e, "Finalization failed");
                    report.fail(chapter, &e);
                }
            }
        }
        Ok(report.finish())
    }

    /// Outline every chapter that lacks one, then generate content.
    pub fn auto(&mut self, extra: Option<&str>) -> Result<RunReport, ForgeError> {
        let mut report = self.begin("auto")?;
        self.prepare_knowledge()?;
        self.fill_missing_outlines(1, self.config.novel.target_chapters, extra)?;
        let mut progress = self.load_progress()?;
        self.run_chapters(&mut progress, extra, &mut report)?;
        Ok(report.finish())
    }

    /// Resolved state of every planned chapter.
    pub fn status(&self) -> Result<ProjectStatus, ForgeError> {
        project_status(self.store.as_ref(), self.config.novel.target_chapters)
    }

    /// Resolved state of one chapter.
    pub fn chapter_state(&self, chapter: u32) -> Result<ChapterState, ForgeError> {
        Ok(ProjectView::load(self.store.as_ref())?.state(chapter))
    }

    // ------------------------------------------------------------------------
    // Run plumbing
    // ------------------------------------------------------------------------

    fn begin(&self, command: &str) -> Result<RunReport, ForgeError> {
        let report = RunReport::start(command);
        info!(run_id = %report.run_id, command, "Run started");
        self.store.write_config_snapshot(&self.config)?;
        Ok(report)
    }

    fn load_progress(&self) -> Result<ProgressState, ForgeError> {
        let mut progress = self
            .store
            .load_progress()?
            .unwrap_or_else(|| ProgressState::new(self.config.novel.target_chapters));
        progress.target_chapters = self.config.novel.target_chapters;
        Ok(progress)
    }

    fn save_progress(&self, progress: &mut ProgressState) -> Result<(), ForgeError> {
        progress.updated_at = Some(Utc::now());
        self.store.save_progress(progress)
    }

    /// Move `current_chapter` past every committed chapter.
    fn advance(&self, progress: &mut ProgressState) -> Result<(), ForgeError> {
        let view = ProjectView::load(self.store.as_ref())?;
        let before = progress.current_chapter;
        while progress.current_chapter <= progress.target_chapters
            && view.state(progress.current_chapter) == ChapterState::Done
        {
            progress.current_chapter += 1;
        }
        if progress.current_chapter != before {
            info!(from = before, to = progress.current_chapter, "Progress advanced");
        }
        Ok(())
    }

    fn sync_outline_mark(&self, progress: &mut ProgressState) -> Result<(), ForgeError> {
        progress.last_outline_chapter = self.store.load_outline()?.last_chapter().unwrap_or(0);
        Ok(())
    }

    fn prepare_knowledge(&mut self) -> Result<(), ForgeError> {
        let Some(source) = self.knowledge.as_mut() else {
            return Ok(());
        };
        if source.ready {
            return Ok(());
        }
        match &source.corpus {
            Some(corpus) => {
                let built = source.kb.build(corpus, false)?;
                info!(
                    chunks = built.chunk_count,
                    cache_hit = built.cache_hit,
                    "Knowledge base ready"
                );
            }
            None => {
                if !source.kb.open_cached()? {
                    warn!("No knowledge base cache and no references; generating without retrieval");
                }
            }
        }
        source.ready = true;
        Ok(())
    }

    fn retrieve(&mut self, query: &str) -> Result<Vec<ScoredChunk>, ForgeError> {
        match self.knowledge.as_mut() {
            Some(source) if source.corpus.is_some() || source.kb.is_loaded() => {
                let top_k = source.kb.default_top_k();
                source.kb.query(query, top_k)
            }
            _ => Ok(Vec::new()),
        }
    }

    // ------------------------------------------------------------------------
    // Outline generation
    // ------------------------------------------------------------------------

    /// Generate entries for `chapters`, recording successes in `generated`.
    ///
    /// Returns the chapters whose batch failed. Fatal errors abort.
    fn generate_outlines(
        &mut self,
        chapters: &[u32],
        extra: Option<&str>,
        generated: &mut Vec<u32>,
    ) -> Result<Vec<ChapterFailure>, ForgeError> {
        let mut failures = Vec::new();
        for (first, count) in outline_batches(chapters, self.config.generation.outline_batch_size) {
            match self.generate_outline_batch(first, count, extra) {
                Ok(entries) => generated.extend(entries),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(first, count, error = %e, "Outline batch failed");
                    failures.extend((first..first + count as u32).map(|c| ChapterFailure::new(c, &e)));
                }
            }
        }
        Ok(failures)
    }

    fn generate_outline_batch(
        &mut self,
        first: u32,
        count: usize,
        extra: Option<&str>,
    ) -> Result<Vec<u32>, ForgeError> {
        let mut outline = self.store.load_outline()?;
        let previous: Vec<OutlineEntry> = outline
            .preceding(first, OUTLINE_CONTEXT_ENTRIES)
            .into_iter()
            .cloned()
            .collect();

        let mut context: Vec<String> = previous
            .iter()
            .map(|e| format!("第{}章 {}：{}", e.chapter_number, e.title, e.key_points.join("，")))
            .collect();
        for entry in &previous {
            for hit in self.retrieve(&entry.title)? {
                context.push(format!("参考：{}", hit.chunk.text));
            }
        }

        let prompt = prompts::outline_prompt(&self.config.novel, first, count, &context.join("\n"), extra);
        let attempts = self.config.generation.max_retries.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            let response = self.gateway.generate(GenerationRole::Outline, &prompt)?;
            match parse_outline_response(&response, first, count) {
                Ok(entries) => {
                    let numbers: Vec<u32> = entries.iter().map(|e| e.chapter_number).collect();
                    for entry in entries {
                        outline.insert(entry);
                    }
                    self.store.save_outline(&outline)?;

                    let mut progress = self.load_progress()?;
                    progress.last_outline_chapter = outline.last_chapter().unwrap_or(0);
                    self.save_progress(&mut progress)?;
                    info!(first, count, "Outline batch saved");
                    return Ok(numbers);
                }
                Err(e) => {
                    warn!(first, attempt, error = %e, "Outline response rejected");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| ForgeError::OutlineParse {
            message: "no outline response".to_string(),
        }))
    }

    /// Outline the chapters in `range` that lack an entry.
    fn fill_missing_outlines(&mut self, start: u32, end: u32, extra: Option<&str>) -> Result<(), ForgeError> {
        if start > end {
            return Ok(());
        }
        let missing = self.store.load_outline()?.missing_in(start, end);
        if missing.is_empty() {
            return Ok(());
        }
        info!(chapters = missing.len(), "Generating missing outlines");
        let mut generated = Vec::new();
        for failure in self.generate_outlines(&missing, extra, &mut generated)? {
            debug!(chapter = failure.chapter, reason = %failure.reason, "Outline still missing");
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Chapter processing
    // ------------------------------------------------------------------------

    fn run_chapters(
        &mut self,
        progress: &mut ProgressState,
        extra: Option<&str>,
        report: &mut RunReport,
    ) -> Result<(), ForgeError> {
        let target = progress.target_chapters;
        self.fill_missing_outlines(progress.current_chapter, target, extra)?;
        self.sync_outline_mark(progress)?;

        for chapter in progress.current_chapter..=target {
            let state = ProjectView::load(self.store.as_ref())?.state(chapter);
            let result = match state {
                ChapterState::Done => {
                    report.skipped.push(chapter);
                    self.advance_if_current(chapter, progress)?;
                    continue;
                }
                ChapterState::NeedsOutline => Err(ForgeError::OutlineMissing { chapter }),
                ChapterState::NeedsFinalization => self.resume_finalization(chapter),
                _ => self.process_chapter(chapter, extra),
            };
            self.record(chapter, result, progress, report)?;
        }
        Ok(())
    }

    fn regenerate(
        &mut self,
        chapter: u32,
        extra: Option<&str>,
        progress: &mut ProgressState,
        report: &mut RunReport,
    ) -> Result<(), ForgeError> {
        info!(chapter, "Regenerating chapter");
        self.fill_missing_outlines(chapter, chapter, None)?;
        self.sync_outline_mark(progress)?;
        let result = if self.store.load_outline()?.contains(chapter) {
            self.process_chapter(chapter, extra)
        } else {
            Err(ForgeError::OutlineMissing { chapter })
        };
        self.record(chapter, result, progress, report)
    }

    fn record(
        &mut self,
        chapter: u32,
        result: Result<(), ForgeError>,
        progress: &mut ProgressState,
        report: &mut RunReport,
    ) -> Result<(), ForgeError> {
        match result {
            Ok(()) => {
                info!(chapter, "Chapter committed");
                report.succeeded.push(chapter);
                progress.failed_chapters.remove(&chapter);
                self.advance_if_current(chapter, progress)
            }
            Err(e) if e.is_fatal() => {
                self.save_progress(progress)?;
                Err(e)
            }
            Err(e) => {
                warn!(chapter, error = %e, "Chapter failed");
                report.fail(chapter, &e);
                progress.failed_chapters.insert(chapter, e.to_string());
                self.save_progress(progress)
            }
        }
    }

    fn advance_if_current(&mut self, chapter: u32, progress: &mut ProgressState) -> Result<(), ForgeError> {
        if progress.current_chapter == chapter {
            self.advance(progress)?;
        }
        self.save_progress(progress)
    }

    fn resume_finalization(&self, chapter: u32) -> Result<(), ForgeError> {
        info!(chapter, "Resuming finalization");
        let content = self
            .store
            .load_chapter(chapter)?
            .ok_or(ForgeError::ChapterMissing { chapter })?;
        self.finalize_chapter(chapter, &content)
    }

    /// Generate, validate and commit one chapter.
    fn process_chapter(&mut self, chapter: u32, extra: Option<&str>) -> Result<(), ForgeError> {
        let view = ProjectView::load(self.store.as_ref())?;
        let entry = view
            .outline
            .get(chapter)
            .cloned()
            .ok_or(ForgeError::OutlineMissing { chapter })?;
        let context_length = self.config.generation.context_length;

        let prev = chapter.checked_sub(1).filter(|n| *n >= 1);
        let prev_summary = prev.and_then(|n| view.summaries.get(&n).cloned());
        let prev_content = match (prev, &prev_summary) {
            (Some(n), None) => self.store.load_chapter(n)?,
            _ => None,
        };
        let next_outline = view.outline.get(chapter + 1).cloned();
        let next_content = self.store.load_chapter(chapter + 1)?;
        let context = ChapterContext::assemble(
            prev_summary.clone(),
            prev_content.as_deref(),
            next_outline,
            next_content.as_deref(),
            context_length,
        );

        let hits = self.retrieve(&entry.retrieval_query())?;
        let references = ReferenceSections::from_results(&hits);

        let window = self.config.validation.duplicate_window;
        let mut previous_chapters = Vec::new();
        for n in chapter.saturating_sub(window).max(1)..chapter {
            if let Some(text) = self.store.load_chapter(n)? {
                previous_chapters.push((n, text));
            }
        }
        let history = view.summary_history(chapter, context_length);

        let max_attempts = self.config.generation.max_retries.max(1);
        let mut guidance: Option<String> = None;
        let mut violations = Vec::new();

        for attempt in 1..=max_attempts {
            let prompt = ChapterPrompt {
                novel: &self.config.novel,
                entry: &entry,
                references: &references,
                context: &context,
                guidance: guidance.as_deref(),
                extra,
            }
            .render();

            debug!(chapter, attempt, "Generating chapter content");
            let content = self.gateway.generate(GenerationRole::Content, &prompt)?;

            let report = self.validator.check(&ValidationInput {
                entry: &entry,
                content: &content,
                prev_summary: prev_summary.as_deref(),
                summary_history: &history,
                previous_chapters: &previous_chapters,
                next_chapter: next_content.as_deref().map(|c| (chapter + 1, c)),
            });

            if report.passed() {
                return self.commit_chapter(chapter, &entry.title, &content);
            }

            warn!(
                chapter,
                attempt,
                violations = report.violations.len(),
                "Chapter failed validation, regenerating"
            );
            guidance = Some(report.guidance());
            violations = report.messages();
        }

        Err(ForgeError::ValidationExceeded {
            chapter,
            attempts: max_attempts,
            violations,
        })
    }

    /// Persist validated content with a fresh summary.
    ///
    /// Nothing is written until the summary exists, so a failed summary leaves
    /// the previous commit untouched. The old summary is dropped before the
    /// new text lands: an interruption in between reads as
    /// `NeedsFinalization` and never pairs new text with a stale summary.
    fn commit_chapter(&self, chapter: u32, title: &str, content: &str) -> Result<(), ForgeError> {
        let summary = self.finalizer.summarize(&self.gateway, chapter, content)?;
        self.store.invalidate_summary(chapter)?;
        self.store.save_chapter(chapter, title, content)?;
        self.store.save_summary(chapter, &summary)?;
        info!(chapter, "Chapter finalized");
        Ok(())
    }

    fn finalize_chapter(&self, chapter: u32, content: &str) -> Result<(), ForgeError> {
        let summary = self.finalizer.summarize(&self.gateway, chapter, content)?;
        self.store.save_summary(chapter, &summary)?;
        info!(chapter, "Chapter finalized");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KnowledgeConfig;
    use crate::embedding::EmbeddingGateway;
    use crate::gateway::{ModelProfile, RetryPolicy};
    use crate::knowledge::Document;
    use crate::store::MemoryProjectStore;
    use crate::test_support::{HashEmbedder, RecordingSleeper, ScriptedModel};
    use forge_model::GenerationParams;
    use regex::Regex;
    use std::time::Duration;
    use tempfile::TempDir;

    fn outliner(prompt: &str) -> String {
        let re = Regex::new(r"从第(\d+)章开始的(\d+)章").unwrap();
        let caps = re.captures(prompt).unwrap();
        let first: u32 = caps[1].parse().unwrap();
        let count: u32 = caps[2].parse().unwrap();
        let items: Vec<String> = (first..first + count)
            .map(|n| format!(r#"{{"title": "第{}回", "key_points": ["修炼"], "characters": ["林风"]}}"#, n))
            .collect();
        format!("```json\n[{}]\n```", items.join(","))
    }

    fn writer(prompt: &str) -> String {
        if prompt.starts_with("请为以下章节内容生成") {
            return "林风继续修炼。".to_string();
        }
        let title = prompt.lines().find_map(|l| l.strip_prefix("标题：")).unwrap_or("无题");
        format!("{}：林风在山中修炼。", title)
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::fixed(2, Duration::ZERO)
    }

    fn gateway_with(content: ModelProfile, sleeper: &RecordingSleeper) -> ModelGateway {
        let outline = ScriptedModel::new("outliner").responding(outliner);
        ModelGateway::new(Arc::new(sleeper.clone()))
            .with_profile(ModelProfile::new(
                GenerationRole::Outline,
                Arc::new(outline),
                policy(),
                GenerationParams::default(),
            ))
            .with_profile(content)
    }

    fn content_profile(model: &ScriptedModel) -> ModelProfile {
        ModelProfile::new(GenerationRole::Content, Arc::new(model.clone()), policy(), GenerationParams::default())
    }

    fn config(target: u32) -> ForgeConfig {
        let mut config = ForgeConfig::default();
        config.novel.target_chapters = target;
        config.generation.outline_batch_size = 2;
        config.generation.max_retries = 2;
        config
    }

    fn orchestrator(store: &MemoryProjectStore, target: u32, model: &ScriptedModel) -> GenerationOrchestrator {
        let gateway = gateway_with(content_profile(model), &RecordingSleeper::default());
        GenerationOrchestrator::new(config(target), Arc::new(store.clone()), gateway)
    }

    fn preset_outline(store: &MemoryProjectStore, entries: Vec<OutlineEntry>) {
        let mut book = OutlineBook::new();
        for entry in entries {
            book.insert(entry);
        }
        store.save_outline(&book).unwrap();
    }

    fn entry(n: u32, characters: &[&str]) -> OutlineEntry {
        let mut e = OutlineEntry::new(n, format!("第{}回", n));
        e.characters = characters.iter().map(|c| c.to_string()).collect();
        e
    }

    #[test]
    fn test_outline_batches() {
        assert_eq!(outline_batches(&[1, 2, 3, 5, 6, 7, 8], 3), vec![(1, 3), (5, 3), (8, 1)]);
        assert!(outline_batches(&[], 3).is_empty());
    }

    #[test]
    fn test_auto_completes_every_chapter() {
        let store = MemoryProjectStore::new();
        let writer_model = ScriptedModel::new("writer").responding(writer);
        let mut orch = orchestrator(&store, 5, &writer_model);

        let report = orch.auto(None).unwrap();
        assert_eq!(report.succeeded, vec![1, 2, 3, 4, 5]);
        assert!(report.is_success());
        assert_eq!(store.snapshot_count(), 1);

        let progress = store.load_progress().unwrap().unwrap();
        assert_eq!(progress.current_chapter, 6);
        assert_eq!(progress.last_outline_chapter, 5);
        assert_eq!(store.load_summaries().unwrap().len(), 5);
        assert_eq!(store.chapter_title(3).as_deref(), Some("第3回"));

        let status = orch.status().unwrap();
        assert_eq!(status.done, 5);
        assert!(status.chapters.iter().all(|c| c.state == ChapterState::Done));
    }

    #[test]
    fn test_second_run_touches_only_uncommitted_chapters() {
        let store = MemoryProjectStore::new();
        let writer_model = ScriptedModel::new("writer").responding(writer);
        orchestrator(&store, 3, &writer_model).auto(None).unwrap();
        assert_eq!(store.chapter_writes(), vec![1, 2, 3]);
        let chapter_two = store.load_chapter(2).unwrap();

        let report = orchestrator(&store, 5, &writer_model).content(None, None, None).unwrap();
        assert_eq!(report.succeeded, vec![4, 5]);
        assert_eq!(store.chapter_writes(), vec![1, 2, 3, 4, 5]);
        assert_eq!(store.load_chapter(2).unwrap(), chapter_two);
        assert_eq!(store.load_progress().unwrap().unwrap().current_chapter, 6);
    }

    #[test]
    fn test_target_chapter_regenerates_only_that_chapter() {
        let store = MemoryProjectStore::new();
        let writer_model = ScriptedModel::new("writer").responding(writer);
        orchestrator(&store, 6, &writer_model).auto(None).unwrap();
        let writes_before = store.chapter_writes().len();

        writer_model.push_ok("重写的第五章：林风下山。");
        let report = orchestrator(&store, 6, &writer_model)
            .content(None, Some(5), None)
            .unwrap();

        assert_eq!(report.succeeded, vec![5]);
        assert_eq!(store.chapter_writes()[writes_before..], [5]);
        assert_eq!(store.load_chapter(5).unwrap().as_deref(), Some("重写的第五章：林风下山。"));
        assert_eq!(store.load_progress().unwrap().unwrap().current_chapter, 7);
    }

    #[test]
    fn test_failed_summary_keeps_previous_commit() {
        let store = MemoryProjectStore::new();
        let writer_model = ScriptedModel::new("writer").responding(writer);
        orchestrator(&store, 3, &writer_model).auto(None).unwrap();
        let chapter_two = store.load_chapter(2).unwrap();
        let summary_two = store.load_summaries().unwrap().get(&2).cloned();
        assert!(summary_two.is_some());

        writer_model.push_ok("重写的第二章：林风下山。").push_timeouts(2);
        let mut orch = orchestrator(&store, 3, &writer_model);
        let report = orch.content(None, Some(2), None).unwrap();

        assert!(report.succeeded.is_empty());
        assert_eq!(report.failed[0].chapter, 2);
        assert_eq!(report.failed[0].kind, "generation");
        assert_eq!(store.load_chapter(2).unwrap(), chapter_two);
        assert_eq!(store.load_summaries().unwrap().get(&2).cloned(), summary_two);
        assert_eq!(orch.chapter_state(2).unwrap(), ChapterState::Done);
        assert_eq!(store.load_progress().unwrap().unwrap().current_chapter, 4);
    }

    #[test]
    fn test_start_chapter_processes_from_that_chapter() {
        let store = MemoryProjectStore::new();
        preset_outline(&store, (1..=5).map(|n| entry(n, &["林风"])).collect());
        store.save_chapter(1, "第1回", "林风拜师。").unwrap();
        store.save_summary(1, "林风拜师。").unwrap();
        let writer_model = ScriptedModel::new("writer").responding(writer);
        let mut orch = orchestrator(&store, 5, &writer_model);

        let report = orch.content(Some(3), None, None).unwrap();
        assert_eq!(report.succeeded, vec![3, 4, 5]);
        assert_eq!(store.chapter_writes(), vec![1, 3, 4, 5]);
        assert_eq!(store.load_chapter(1).unwrap().as_deref(), Some("林风拜师。"));
        assert!(store.load_chapter(2).unwrap().is_none());
        assert_eq!(orch.chapter_state(2).unwrap(), ChapterState::NeedsContent);
        assert_eq!(store.load_progress().unwrap().unwrap().current_chapter, 6);

        assert!(matches!(
            orch.content(Some(7), None, None),
            Err(ForgeError::InvalidArgument(_))
        ));
        assert_eq!(store.load_progress().unwrap().unwrap().current_chapter, 6);
        assert!(orch.content(Some(6), None, None).unwrap().succeeded.is_empty());
    }

    #[test]
    fn test_validation_exceeded_fails_chapter_and_continues() {
        let store = MemoryProjectStore::new();
        preset_outline(&store, vec![entry(1, &["林风"]), entry(2, &["苏瑶"]), entry(3, &["林风"])]);
        let writer_model = ScriptedModel::new("writer").responding(writer);

        let mut orch = orchestrator(&store, 3, &writer_model);
        let report = orch.content(None, None, None).unwrap();

        assert_eq!(report.succeeded, vec![1, 3]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].chapter, 2);
        assert_eq!(report.failed[0].kind, "validation_exceeded");
        assert!(store.load_chapter(2).unwrap().is_none());

        let progress = store.load_progress().unwrap().unwrap();
        assert_eq!(progress.current_chapter, 2);
        assert!(progress.failed_chapters.contains_key(&2));

        let retried = writer_model
            .prompts()
            .into_iter()
            .any(|p| p.contains("[修改意见]") && p.contains("苏瑶"));
        assert!(retried, "second attempt carries the validator's findings");
        assert_eq!(orch.chapter_state(2).unwrap(), ChapterState::NeedsContent);
        assert_eq!(orch.status().unwrap().chapters[1].state, ChapterState::Failed);
    }

    #[test]
    fn test_fallback_writes_when_primary_is_down() {
        let store = MemoryProjectStore::new();
        preset_outline(&store, vec![entry(1, &["林风"])]);
        let primary = ScriptedModel::new("primary");
        let fallback = ScriptedModel::new("fallback").responding(writer);
        let sleeper = RecordingSleeper::default();
        let profile = content_profile(&primary).with_fallback(Arc::new(fallback.clone()));
        let gateway = gateway_with(profile, &sleeper);

        let report = GenerationOrchestrator::new(config(1), Arc::new(store.clone()), gateway)
            .content(None, None, None)
            .unwrap();

        assert_eq!(report.succeeded, vec![1]);
        assert_eq!(primary.calls(), 4);
        assert_eq!(fallback.calls(), 2);
        assert_eq!(sleeper.recorded().len(), 2);
    }

    #[test]
    fn test_exhausted_models_fail_chapters_without_aborting() {
        let store = MemoryProjectStore::new();
        preset_outline(&store, vec![entry(1, &[]), entry(2, &[])]);
        let broken = ScriptedModel::new("broken");

        let report = orchestrator(&store, 2, &broken).content(None, None, None).unwrap();
        assert!(report.succeeded.is_empty());
        let kinds: Vec<&str> = report.failed.iter().map(|f| f.kind.as_str()).collect();
        assert_eq!(kinds, vec!["generation", "generation"]);
        assert_eq!(store.load_progress().unwrap().unwrap().current_chapter, 1);
    }

    #[test]
    fn test_outline_keeps_done_chapters_unless_forced() {
        let store = MemoryProjectStore::new();
        let writer_model = ScriptedModel::new("writer").responding(writer);
        orchestrator(&store, 2, &writer_model).auto(None).unwrap();

        let mut orch = orchestrator(&store, 2, &writer_model);
        let report = orch.outline(1, 3, None, false).unwrap();
        assert_eq!(report.skipped, vec![1, 2]);
        assert_eq!(report.succeeded, vec![3]);

        let report = orch.outline(1, 3, None, true).unwrap();
        assert_eq!(report.succeeded, vec![1, 2, 3]);
        assert!(orch.outline(3, 1, None, false).is_err());
    }

    #[test]
    fn test_pending_finalization_resumes_without_rewriting() {
        let store = MemoryProjectStore::new();
        preset_outline(&store, vec![entry(1, &["林风"])]);
        store.save_chapter(1, "第1回", "林风拜师。").unwrap();
        let writer_model = ScriptedModel::new("writer").responding(writer);

        let report = orchestrator(&store, 1, &writer_model).content(None, None, None).unwrap();
        assert_eq!(report.succeeded, vec![1]);
        assert_eq!(store.chapter_writes(), vec![1]);
        assert_eq!(store.load_summaries().unwrap().get(&1).map(String::as_str), Some("林风继续修炼。"));
    }

    #[test]
    fn test_finalize_reports_missing_chapter() {
        let store = MemoryProjectStore::new();
        let writer_model = ScriptedModel::new("writer").responding(writer);
        let report = orchestrator(&store, 3, &writer_model).finalize(&[2]).unwrap();
        assert_eq!(report.failed[0].kind, "chapter_missing");
    }

    #[test]
    fn test_references_reach_the_chapter_prompt() {
        let dir = TempDir::new().unwrap();
        let store = MemoryProjectStore::new();
        preset_outline(&store, vec![entry(1, &["林风"])]);
        let writer_model = ScriptedModel::new("writer").responding(writer);

        let knowledge = KnowledgeConfig {
            chunk_size: 20,
            chunk_overlap: 5,
            cache_dir: dir.path().join("cache"),
            top_k: 2,
            ..Default::default()
        };
        let gateway = EmbeddingGateway::new(Arc::new(HashEmbedder::new(16)), 4);
        let kb = KnowledgeBase::new(gateway, None, &knowledge).unwrap();
        let corpus = Corpus::new(vec![Document::new("realms.txt", "炼气境界筑基境界金丹境界元婴境界化神境界")]);

        let mut orch = orchestrator(&store, 1, &writer_model).with_knowledge(kb, Some(corpus));
        orch.content(None, None, None).unwrap();

        assert!(orch.knowledge_base().unwrap().is_loaded());
        assert!(writer_model.prompts()[0].contains("境界"));
    }
}
