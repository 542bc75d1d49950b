//! Project state persistence.
//!
//! The orchestrator reads and writes all cross-run state through the
//! [`ProjectStore`] trait:
//!
//! ```text
//! <output dir>/
//!   outline.json           chapter number -> OutlineEntry
//!   summary.json           "chapter number" -> summary text
//!   progress.json          ProgressState
//!   config_snapshot.json   configuration of the latest run
//!   第{n}章_{title}.txt     chapter text
//! ```
//!
//! [`FileProjectStore`] writes every file through a temporary sibling and a
//! rename. [`MemoryProjectStore`] keeps everything in memory for tests.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ForgeConfig;
use crate::errors::ForgeError;
use crate::outline::OutlineBook;

/// Outline filename.
pub const OUTLINE_FILENAME: &str = "outline.json";

/// Summary filename.
pub const SUMMARY_FILENAME: &str = "summary.json";

/// Progress filename.
pub const PROGRESS_FILENAME: &str = "progress.json";

/// Configuration snapshot filename.
pub const CONFIG_SNAPSHOT_FILENAME: &str = "config_snapshot.json";

/// File stem used when a title sanitizes to nothing.
pub const UNTITLED_CHAPTER: &str = "untitled_chapter";

// ============================================================================
// Records
// ============================================================================

/// Resumption state of a novel project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressState {
    /// Next chapter that is not committed (1-based).
    pub current_chapter: u32,
    /// Planned chapter count.
    pub target_chapters: u32,
    /// Highest chapter with an outline entry.
    #[serde(default)]
    pub last_outline_chapter: u32,
    /// Chapters that failed in the latest runs, with the reason.
    #[serde(default)]
    pub failed_chapters: BTreeMap<u32, String>,
    /// Last write time.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProgressState {
    /// Fresh progress for a novel of `target_chapters` chapters.
    pub fn new(target_chapters: u32) -> Self {
        Self {
            current_chapter: 1,
            target_chapters,
            last_outline_chapter: 0,
            failed_chapters: BTreeMap::new(),
            updated_at: None,
        }
    }
}

/// A generated chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterRecord {
    /// 1-based chapter number.
    pub chapter_number: u32,
    /// Title from the outline.
    pub title: String,
    /// Chapter text.
    pub content: String,
    /// Summary derived during finalization.
    pub summary: Option<String>,
    /// Whether the chapter is committed.
    pub finalized: bool,
}

// ============================================================================
// ProjectStore trait
// ============================================================================

/// Repository for outline, summaries, progress and chapter text.
pub trait ProjectStore: Send + Sync + fmt::Debug {
    /// Load the outline; empty when none exists.
    fn load_outline(&self) -> Result<OutlineBook, ForgeError>;

    /// Replace the outline.
    fn save_outline(&self, outline: &OutlineBook) -> Result<(), ForgeError>;

    /// Load all summaries.
    fn load_summaries(&self) -> Result<BTreeMap<u32, String>, ForgeError>;

    /// Set the summary of one chapter.
    fn save_summary(&self, chapter: u32, summary: &str) -> Result<(), ForgeError>;

    /// Drop the summary of one chapter.
    fn invalidate_summary(&self, chapter: u32) -> Result<(), ForgeError>;

    /// Load progress; `None` when the project has not started.
    fn load_progress(&self) -> Result<Option<ProgressState>, ForgeError>;

    /// Persist progress.
    fn save_progress(&self, progress: &ProgressState) -> Result<(), ForgeError>;

    /// Chapter text, if generated.
    fn load_chapter(&self, chapter: u32) -> Result<Option<String>, ForgeError>;

    /// Write chapter text, replacing any previous version.
    fn save_chapter(&self, chapter: u32, title: &str, content: &str) -> Result<(), ForgeError>;

    /// Chapters with text, ascending.
    fn chapter_numbers(&self) -> Result<Vec<u32>, ForgeError>;

    /// Record the configuration of a run.
    fn write_config_snapshot(&self, config: &ForgeConfig) -> Result<(), ForgeError>;

    /// Assemble the full record of a generated chapter.
    fn chapter_record(&self, chapter: u32) -> Result<Option<ChapterRecord>, ForgeError> {
        let Some(content) = self.load_chapter(chapter)? else {
            return Ok(None);
        };
        let title = self
            .load_outline()?
            .get(chapter)
            .map(|e| e.title.clone())
            .unwrap_or_else(|| crate::outline::OutlineEntry::default_title(chapter));
        let summary = self.load_summaries()?.remove(&chapter);
        Ok(Some(ChapterRecord {
            chapter_number: chapter,
            title,
            finalized: summary.is_some(),
            summary,
            content,
        }))
    }
}

/// Remove characters that are invalid in file names.
pub fn sanitize_title(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .filter(|c| !matches!(c, '\\' | '/' | '*' | '?' | ':' | '"' | '<' | '>' | '|'))
        .collect();
    let trimmed = cleaned.trim_matches(|c: char| c == '.' || c.is_whitespace());
    if trimmed.is_empty() {
        UNTITLED_CHAPTER.to_string()
    } else {
        trimmed.to_string()
    }
}

/// File name of a chapter.
pub fn chapter_file_name(chapter: u32, title: &str) -> String {
    format!("第{}章_{}.txt", chapter, sanitize_title(title))
}

fn chapter_prefix(chapter: u32) -> String {
    format!("第{}章_", chapter)
}

/// Chapter number encoded in a chapter file name.
fn parse_chapter_file_name(name: &str) -> Option<u32> {
    let rest = name.strip_prefix('第')?;
    let (number, tail) = rest.split_once("章_")?;
    if !tail.ends_with(".txt") {
        return None;
    }
    number.parse().ok()
}

// ============================================================================
// FileProjectStore
// ============================================================================

/// Store backed by files in one directory.
#[derive(Debug, Clone)]
pub struct FileProjectStore {
    dir: PathBuf,
}

impl FileProjectStore {
    /// Store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the directory.
    pub fn ensure_layout(&self) -> Result<(), ForgeError> {
        fs::create_dir_all(&self.dir).map_err(|e| ForgeError::store_io(&self.dir, e.to_string()))
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn read_optional(&self, path: &Path) -> Result<Option<String>, ForgeError> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ForgeError::store_io(path, e.to_string())),
        }
    }

    fn write(&self, path: &Path, bytes: &[u8]) -> Result<(), ForgeError> {
        forge_db::write_atomic(path, bytes).map_err(|e| ForgeError::store_io(path, e.to_string()))?;
        debug!("Wrote {:?}", path);
        Ok(())
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), ForgeError> {
        let json = serde_json::to_string_pretty(value)?;
        self.write(path, json.as_bytes())
    }

    fn chapter_files(&self, chapter: u32) -> Result<Vec<PathBuf>, ForgeError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ForgeError::store_io(&self.dir, e.to_string())),
        };
        let prefix = chapter_prefix(chapter);
        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(".txt"))
            })
            .collect();
        files.sort();
        Ok(files)
    }
}

impl ProjectStore for FileProjectStore {
    fn load_outline(&self) -> Result<OutlineBook, ForgeError> {
        let path = self.path(OUTLINE_FILENAME);
        match self.read_optional(&path)? {
            Some(text) if !text.trim().is_empty() => {
                OutlineBook::from_json(&text).map_err(|msg| ForgeError::corrupt_state(&path, msg))
            }
            _ => Ok(OutlineBook::new()),
        }
    }

    fn save_outline(&self, outline: &OutlineBook) -> Result<(), ForgeError> {
        let path = self.path(OUTLINE_FILENAME);
        self.write(&path, outline.to_json()?.as_bytes())
    }

    fn load_summaries(&self) -> Result<BTreeMap<u32, String>, ForgeError> {
        let path = self.path(SUMMARY_FILENAME);
        match self.read_optional(&path)? {
            Some(text) if !text.trim().is_empty() => {
                let raw: BTreeMap<String, String> = serde_json::from_str(&text)
                    .map_err(|e| ForgeError::corrupt_state(&path, e.to_string()))?;
                raw.into_iter()
                    .map(|(k, v)| {
                        k.trim()
                            .parse::<u32>()
                            .map(|n| (n, v))
                            .map_err(|_| ForgeError::corrupt_state(&path, format!("invalid chapter key `{}`", k)))
                    })
                    .collect()
            }
            _ => Ok(BTreeMap::new()),
        }
    }

    fn save_summary(&self, chapter: u32, summary: &str) -> Result<(), ForgeError> {
        let mut summaries = self.load_summaries()?;
        summaries.insert(chapter, summary.to_string());
        self.write_json(&self.path(SUMMARY_FILENAME), &summaries)
    }

    fn invalidate_summary(&self, chapter: u32) -> Result<(), ForgeError> {
        let mut summaries = self.load_summaries()?;
        if summaries.remove(&chapter).is_some() {
            self.write_json(&self.path(SUMMARY_FILENAME), &summaries)?;
        }
        Ok(())
    }

    fn load_progress(&self) -> Result<Option<ProgressState>, ForgeError> {
        let path = self.path(PROGRESS_FILENAME);
        match self.read_optional(&path)? {
            Some(text) => {
                let mut progress: ProgressState = serde_json::from_str(&text)
                    .map_err(|e| ForgeError::corrupt_state(&path, e.to_string()))?;
                progress.current_chapter = progress.current_chapter.max(1);
                Ok(Some(progress))
            }
            None => Ok(None),
        }
    }

    fn save_progress(&self, progress: &ProgressState) -> Result<(), ForgeError> {
        self.write_json(&self.path(PROGRESS_FILENAME), progress)
    }

    fn load_chapter(&self, chapter: u32) -> Result<Option<String>, ForgeError> {
        match self.chapter_files(chapter)?.last() {
            Some(path) => self.read_optional(path),
            None => Ok(None),
        }
    }

    fn save_chapter(&self, chapter: u32, title: &str, content: &str) -> Result<(), ForgeError> {
        let target = self.path(&chapter_file_name(chapter, title));
        let previous = self.chapter_files(chapter)?;
        self.write(&target, content.as_bytes())?;
        for old in previous.into_iter().filter(|p| *p != target) {
            fs::remove_file(&old).map_err(|e| ForgeError::store_io(&old, e.to_string()))?;
            debug!("Removed previous chapter file {:?}", old);
        }
        info!(chapter, file = %target.display(), "Saved chapter");
        Ok(())
    }

    fn chapter_numbers(&self) -> Result<Vec<u32>, ForgeError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ForgeError::store_io(&self.dir, e.to_string())),
        };
        let mut numbers: Vec<u32> = entries
            .filter_map(Result::ok)
            .filter_map(|e| e.file_name().to_str().and_then(parse_chapter_file_name))
            .collect();
        numbers.sort_unstable();
        numbers.dedup();
        Ok(numbers)
    }

    fn write_config_snapshot(&self, config: &ForgeConfig) -> Result<(), ForgeError> {
        self.write_json(&self.path(CONFIG_SNAPSHOT_FILENAME), config)
    }
}

// ============================================================================
// MemoryProjectStore
// ============================================================================

#[derive(Debug, Default)]
struct MemoryState {
    outline: OutlineBook,
    summaries: BTreeMap<u32, String>,
    progress: Option<ProgressState>,
    chapters: BTreeMap<u32, (String, String)>,
    chapter_writes: Vec<u32>,
    snapshots: usize,
}

/// In-memory store. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryProjectStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryProjectStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, ForgeError> {
        self.state
            .lock()
            .map_err(|_| ForgeError::Other(anyhow::anyhow!("memory store lock poisoned")))
    }

    /// Chapter numbers in write order, one per `save_chapter` call.
    pub fn chapter_writes(&self) -> Vec<u32> {
        self.lock().map(|s| s.chapter_writes.clone()).unwrap_or_default()
    }

    /// Title the chapter was saved under.
    pub fn chapter_title(&self, chapter: u32) -> Option<String> {
        self.lock()
            .ok()
            .and_then(|s| s.chapters.get(&chapter).map(|(t, _)| t.clone()))
    }

    /// Number of configuration snapshots written.
    pub fn snapshot_count(&self) -> usize {
        self.lock().map(|s| s.snapshots).unwrap_or(0)
    }
}

impl ProjectStore for MemoryProjectStore {
    fn load_outline(&self) -> Result<OutlineBook, ForgeError> {
        Ok(self.lock()?.outline.clone())
    }

    fn save_outline(&self, outline: &OutlineBook) -> Result<(), ForgeError> {
        self.lock()?.outline = outline.clone();
        Ok(())
    }

    fn load_summaries(&self) -> Result<BTreeMap<u32, String>, ForgeError> {
        Ok(self.lock()?.summaries.clone())
    }

    fn save_summary(&self, chapter: u32, summary: &str) -> Result<(), ForgeError> {
        self.lock()?.summaries.insert(chapter, summary.to_string());
        Ok(())
    }

    fn invalidate_summary(&self, chapter: u32) -> Result<(), ForgeError> {
        self.lock()?.summaries.remove(&chapter);
        Ok(())
    }

    fn load_progress(&self) -> Result<Option<ProgressState>, ForgeError> {
        Ok(self.lock()?.progress.clone())
    }

    fn save_progress(&self, progress: &ProgressState) -> Result<(), ForgeError> {
        self.lock()?.progress = Some(progress.clone());
        Ok(())
    }

    fn load_chapter(&self, chapter: u32) -> Result<Option<String>, ForgeError> {
        Ok(self.lock()?.chapters.get(&chapter).map(|(_, c)| c.clone()))
    }

    fn save_chapter(&self, chapter: u32, title: &str, content: &str) -> Result<(), ForgeError> {
        let mut state = self.lock()?;
        state
            .chapters
            .insert(chapter, (title.to_string(), content.to_string()));
        state.chapter_writes.push(chapter);
        Ok(())
    }

    fn chapter_numbers(&self) -> Result<Vec<u32>, ForgeError> {
        Ok(self.lock()?.chapters.keys().copied().collect())
    }

    fn write_config_snapshot(&self, _config: &ForgeConfig) -> Result<(), ForgeError> {
        self.lock()?.snapshots += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outline::OutlineEntry;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_title() {
        assert_eq!(sanitize_title("初入/宗门?"), "初入宗门");
        assert_eq!(sanitize_title(" ..风起.. "), "风起");
        assert_eq!(sanitize_title("<>|"), UNTITLED_CHAPTER);
        assert_eq!(chapter_file_name(3, "a:b"), "第3章_ab.txt");
    }

    #[test]
    fn test_parse_chapter_file_name() {
        assert_eq!(parse_chapter_file_name("第12章_风起.txt"), Some(12));
        assert_eq!(parse_chapter_file_name("第x章_风起.txt"), None);
        assert_eq!(parse_chapter_file_name("outline.json"), None);
    }

    #[test]
    fn test_missing_files_yield_defaults() {
        let dir = TempDir::new().unwrap();
        let store = FileProjectStore::new(dir.path().join("out"));
        assert!(store.load_outline().unwrap().is_empty());
        assert!(store.load_summaries().unwrap().is_empty());
        assert!(store.load_progress().unwrap().is_none());
        assert!(store.load_chapter(1).unwrap().is_none());
        assert!(store.chapter_numbers().unwrap().is_empty());
    }

    #[test]
    fn test_rewrite_replaces_old_chapter_file() {
        let dir = TempDir::new().unwrap();
        let store = FileProjectStore::new(dir.path());
        store.save_chapter(1, "旧标题", "旧内容").unwrap();
        store.save_chapter(10, "第十章", "十").unwrap();
        store.save_chapter(1, "新标题", "新内容").unwrap();

        assert!(!dir.path().join("第1章_旧标题.txt").exists());
        assert!(dir.path().join("第1章_新标题.txt").exists());
        assert_eq!(store.load_chapter(1).unwrap().as_deref(), Some("新内容"));
        assert_eq!(store.load_chapter(10).unwrap().as_deref(), Some("十"));
        assert_eq!(store.chapter_numbers().unwrap(), vec![1, 10]);
    }

    #[test]
    fn test_summaries_use_string_keys() {
        let dir = TempDir::new().unwrap();
        let store = FileProjectStore::new(dir.path());
        store.save_summary(2, "第二章摘要").unwrap();
        store.save_summary(1, "第一章摘要").unwrap();

        let raw = fs::read_to_string(dir.path().join(SUMMARY_FILENAME)).unwrap();
        assert!(raw.contains("\"1\": \"第一章摘要\""));

        store.invalidate_summary(2).unwrap();
        let summaries = store.load_summaries().unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[&1], "第一章摘要");
    }

    #[test]
    fn test_progress_round_trip_snake_case() {
        let dir = TempDir::new().unwrap();
        let store = FileProjectStore::new(dir.path());
        let mut progress = ProgressState::new(100);
        progress.current_chapter = 7;
        progress.failed_chapters.insert(6, "validation".into());
        store.save_progress(&progress).unwrap();

        let raw = fs::read_to_string(dir.path().join(PROGRESS_FILENAME)).unwrap();
        assert!(raw.contains("\"current_chapter\": 7"));
        assert_eq!(store.load_progress().unwrap().unwrap(), progress);
    }

    #[test]
    fn test_corrupt_progress_names_the_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(PROGRESS_FILENAME), "{ broken").unwrap();
        let store = FileProjectStore::new(dir.path());
        match store.load_progress() {
            Err(ForgeError::CorruptState { path, .. }) => {
                assert!(path.ends_with(PROGRESS_FILENAME))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_outline_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FileProjectStore::new(dir.path());
        let mut book = OutlineBook::new();
        book.insert(OutlineEntry::new(1, "开端"));
        store.save_outline(&book).unwrap();
        assert_eq!(store.load_outline().unwrap(), book);
    }

    #[test]
    fn test_memory_store_shares_state_between_clones() {
        let store = MemoryProjectStore::new();
        let handle = store.clone();
        store.save_chapter(2, "二", "内容").unwrap();
        assert_eq!(handle.chapter_writes(), vec![2]);
        assert_eq!(handle.load_chapter(2).unwrap().as_deref(), Some("内容"));
        assert_eq!(handle.chapter_title(2).as_deref(), Some("二"));
    }

    #[test]
    fn test_chapter_record_reflects_finalization() {
        let store = MemoryProjectStore::new();
        let mut book = OutlineBook::new();
        book.insert(OutlineEntry::new(1, "拜师"));
        store.save_outline(&book).unwrap();
        assert!(store.chapter_record(1).unwrap().is_none());

        store.save_chapter(1, "拜师", "正文").unwrap();
        let record = store.chapter_record(1).unwrap().unwrap();
        assert_eq!(record.title, "拜师");
        assert!(!record.finalized);

        store.save_summary(1, "林风拜师").unwrap();
        let record = store.chapter_record(1).unwrap().unwrap();
        assert!(record.finalized);
        assert_eq!(record.summary.as_deref(), Some("林风拜师"));
    }
}
