//! Consistency checks for generated chapters.
//!
//! [`ConsistencyValidator::check`] runs three independent checks and returns a
//! [`ValidationReport`]. It never edits content and never fails: a reviewer
//! outage marks the affected check as skipped.

use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use unicode_segmentation::UnicodeSegmentation;

use crate::config::ValidationConfig;
use crate::gateway::{GenerationRole, ModelGateway};
use crate::outline::OutlineEntry;
use crate::prompts::{self, REVISION_MARKER};

// ============================================================================
// Report types
// ============================================================================

/// Which check produced a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationKind {
    /// Content contradicts or misses the outline.
    Logic,
    /// Content contradicts earlier chapters.
    Continuity,
    /// Near-duplicate paragraphs.
    Duplicate,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Logic => "logic",
            Self::Continuity => "continuity",
            Self::Duplicate => "duplicate",
        })
    }
}

/// One problem found in a chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    /// Check that found it.
    pub kind: ViolationKind,
    /// Where in the chapter, as a hint for the writer.
    pub location: String,
    /// What is wrong and how to correct it.
    pub suggestion: String,
}

impl Violation {
    fn new(kind: ViolationKind, location: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self {
            kind,
            location: location.into(),
            suggestion: suggestion.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.location, self.suggestion)
    }
}

/// A check that could not run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedCheck {
    /// The check.
    pub kind: ViolationKind,
    /// Why it was skipped.
    pub reason: String,
}

/// Outcome of validating one chapter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    /// Problems found.
    pub violations: Vec<Violation>,
    /// Checks that did not run.
    pub skipped: Vec<SkippedCheck>,
}

impl ValidationReport {
    /// True when no violation was found.
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Violations rendered as corrective guidance for the next attempt.
    pub fn guidance(&self) -> String {
        self.violations
            .iter()
            .enumerate()
            .map(|(i, v)| format!("{}. {}（{}）", i + 1, v.suggestion, v.location))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Violations as display strings.
    pub fn messages(&self) -> Vec<String> {
        self.violations.iter().map(ToString::to_string).collect()
    }

    fn skip(&mut self, kind: ViolationKind, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(check = %kind, reason = %reason, "Consistency check skipped");
        self.skipped.push(SkippedCheck { kind, reason });
    }
}

// ============================================================================
// Input
// ============================================================================

/// Everything a check may look at.
#[derive(Debug, Clone, Copy)]
pub struct ValidationInput<'a> {
    /// Outline of the chapter.
    pub entry: &'a OutlineEntry,
    /// Candidate content.
    pub content: &'a str,
    /// Summary of the previous chapter.
    pub prev_summary: Option<&'a str>,
    /// Recent summary history, already truncated.
    pub summary_history: &'a str,
    /// Text of recent earlier chapters as `(chapter, content)`.
    pub previous_chapters: &'a [(u32, String)],
    /// Text of the next chapter, when it already exists.
    pub next_chapter: Option<(u32, &'a str)>,
}

// ============================================================================
// Reviewer output
// ============================================================================

/// Parsed reviewer response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewVerdict {
    /// Overall score, when present.
    pub score: Option<u32>,
    /// Numbered issues.
    pub issues: Vec<String>,
    /// Whether the reviewer asked for a revision.
    pub needs_revision: bool,
}

fn score_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[总体评分\]\s*[:：]\s*(\d+)").expect("valid regex"))
}

fn issue_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*\d+\s*[.、．)]\s*(.+)$").expect("valid regex"))
}

/// Parse a reviewer response. Returns `None` when it has neither a score
/// nor a revision verdict.
pub fn parse_review(text: &str) -> Option<ReviewVerdict> {
    let score = score_regex()
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok());

    let verdict_line = text.lines().find(|l| l.contains("[修改必要性]"));
    let needs_revision = match verdict_line {
        Some(line) => line.contains(REVISION_MARKER) && !line.contains("不需要修改"),
        None => text.contains(REVISION_MARKER),
    };

    if score.is_none() && verdict_line.is_none() && !needs_revision {
        return None;
    }

    let issues = text
        .lines()
        .filter_map(|l| issue_regex().captures(l))
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty() && s != "无")
        .collect();

    Some(ReviewVerdict {
        score,
        issues,
        needs_revision,
    })
}

// ============================================================================
// Duplicate detection
// ============================================================================

fn trigrams(text: &str) -> HashSet<String> {
    let graphemes: Vec<&str> = text.graphemes(true).filter(|g| !g.trim().is_empty()).collect();
    if graphemes.len() < 3 {
        return std::iter::once(graphemes.concat()).collect();
    }
    graphemes.windows(3).map(|w| w.concat()).collect()
}

struct Paragraph {
    index: usize,
    shingles: HashSet<String>,
}

fn long_paragraphs(text: &str, min_len: usize) -> Vec<Paragraph> {
    text.lines()
        .map(str::trim)
        .enumerate()
        .filter(|(_, p)| !p.is_empty() && p.chars().count() >= min_len)
        .map(|(i, p)| Paragraph {
            index: i + 1,
            shingles: trigrams(p),
        })
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

// ============================================================================
// ConsistencyValidator
// ============================================================================

/// Runs logic, continuity and duplicate checks.
#[derive(Debug, Clone)]
pub struct ConsistencyValidator {
    config: ValidationConfig,
    reviewer: Option<ModelGateway>,
}

impl ConsistencyValidator {
    /// Validator with deterministic checks only.
    pub fn new(config: ValidationConfig) -> Self {
        Self { config, reviewer: None }
    }

    /// Attach a gateway whose review role scores chapters.
    pub fn with_reviewer(mut self, gateway: ModelGateway) -> Self {
        if gateway.has_role(GenerationRole::Review) {
            self.reviewer = Some(gateway);
        }
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Whether a reviewer model is attached.
    pub fn has_reviewer(&self) -> bool {
        self.reviewer.is_some()
    }

    /// Validate one candidate chapter.
    pub fn check(&self, input: &ValidationInput<'_>) -> ValidationReport {
        let mut report = ValidationReport::default();
        if self.config.logic {
            self.check_logic(input, &mut report);
        }
        if self.config.continuity {
            self.check_continuity(input, &mut report);
        }
        if self.config.duplicates {
            self.check_duplicates(input, &mut report);
        }
        debug!(
            chapter = input.entry.chapter_number,
            violations = report.violations.len(),
            skipped = report.skipped.len(),
            "Validation finished"
        );
        report
    }

    fn check_logic(&self, input: &ValidationInput<'_>, report: &mut ValidationReport) {
        for character in &input.entry.characters {
            if !character.trim().is_empty() && !input.content.contains(character.as_str()) {
                report.violations.push(Violation::new(
                    ViolationKind::Logic,
                    "全文",
                    format!("大纲中的角色「{}」没有出现，请让其参与本章情节", character),
                ));
            }
        }

        if let Some(gateway) = &self.reviewer {
            let prompt = prompts::logic_review_prompt(input.entry, input.content);
            self.review(gateway, ViolationKind::Logic, &prompt, report);
        }
    }

    fn check_continuity(&self, input: &ValidationInput<'_>, report: &mut ValidationReport) {
        let Some(prev_summary) = input.prev_summary else {
            return;
        };
        let Some(gateway) = &self.reviewer else {
            report.skip(ViolationKind::Continuity, "no reviewer model configured");
            return;
        };
        let prompt =
            prompts::continuity_review_prompt(input.entry, input.content, prev_summary, input.summary_history);
        self.review(gateway, ViolationKind::Continuity, &prompt, report);
    }

    fn review(&self, gateway: &ModelGateway, kind: ViolationKind, prompt: &str, report: &mut ValidationReport) {
        let response = match gateway.generate(GenerationRole::Review, prompt) {
            Ok(text) => text,
            Err(e) => {
                report.skip(kind, format!("reviewer unavailable: {}", e));
                return;
            }
        };
        let Some(verdict) = parse_review(&response) else {
            report.skip(kind, "reviewer response has no score or verdict");
            return;
        };

        let low_score = verdict.score.is_some_and(|s| s < self.config.min_score);
        if !low_score && !verdict.needs_revision {
            return;
        }

        let location = match verdict.score {
            Some(score) => format!("评分 {}", score),
            None => "审阅意见".to_string(),
        };
        if verdict.issues.is_empty() {
            report.violations.push(Violation::new(
                kind,
                location,
                format!("审阅未通过（最低分 {}），请修订以满足要求", self.config.min_score),
            ));
        } else {
            for issue in verdict.issues {
                report.violations.push(Violation::new(kind, location.clone(), issue));
            }
        }
    }

    fn check_duplicates(&self, input: &ValidationInput<'_>, report: &mut ValidationReport) {
        let min_len = self.config.min_paragraph_length;
        let threshold = self.config.duplicate_similarity;
        let own = long_paragraphs(input.content, min_len);

        for (i, a) in own.iter().enumerate() {
            if let Some(b) = own[i + 1..]
                .iter()
                .find(|b| jaccard(&a.shingles, &b.shingles) >= threshold)
            {
                report.violations.push(Violation::new(
                    ViolationKind::Duplicate,
                    format!("第{}段", b.index),
                    format!("与本章第{}段内容重复，请改写或删除", a.index),
                ));
            }
        }

        let window = self.config.duplicate_window as usize;
        let skip = input.previous_chapters.len().saturating_sub(window);
        let mut others: Vec<(u32, &str)> = input.previous_chapters[skip..]
            .iter()
            .map(|(n, c)| (*n, c.as_str()))
            .collect();
        others.extend(input.next_chapter);

        for (chapter, text) in others {
            let theirs = long_paragraphs(text, min_len);
            for a in &own {
                if let Some(b) = theirs.iter().find(|b| jaccard(&a.shingles, &b.shingles) >= threshold) {
                    report.violations.push(Violation::new(
                        ViolationKind::Duplicate,
                        format!("第{}段", a.index),
                        format!("与第{}章第{}段内容重复，请改写", chapter, b.index),
                    ));
                }
            }
        }
    }
}
