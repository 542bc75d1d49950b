//! Chapter outlines: the entry type, the ordered outline book, and parsing of
//! outline model responses.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ForgeError;

/// Planned structure of one chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineEntry {
    /// 1-based chapter number.
    pub chapter_number: u32,
    /// Chapter title.
    pub title: String,
    /// Plot points the chapter must cover.
    #[serde(default)]
    pub key_points: Vec<String>,
    /// Characters appearing in the chapter.
    #[serde(default)]
    pub characters: Vec<String>,
    /// Locations and scene settings.
    #[serde(default)]
    pub settings: Vec<String>,
    /// Main conflicts.
    #[serde(default)]
    pub conflicts: Vec<String>,
}

impl OutlineEntry {
    /// Entry with only a title.
    pub fn new(chapter_number: u32, title: impl Into<String>) -> Self {
        Self {
            chapter_number,
            title: title.into(),
            key_points: Vec::new(),
            characters: Vec::new(),
            settings: Vec::new(),
            conflicts: Vec::new(),
        }
    }

    /// Title used when the model leaves it out.
    pub fn default_title(chapter_number: u32) -> String {
        format!("第{}章", chapter_number)
    }

    /// Text used to query the knowledge base for this chapter.
    pub fn retrieval_query(&self) -> String {
        let mut parts = vec![self.title.clone()];
        parts.extend(self.key_points.iter().cloned());
        parts.extend(self.characters.iter().cloned());
        parts.join(" ")
    }
}

// ============================================================================
// OutlineBook
// ============================================================================

/// All outline entries of a novel, ordered by chapter number.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutlineBook {
    entries: BTreeMap<u32, OutlineEntry>,
}

impl OutlineBook {
    /// Empty book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `outline.json`.
    ///
    /// Accepts the mapping written by [`to_json`](Self::to_json) as well as a
    /// plain array of entries, optionally wrapped as `{"chapters": [...]}`.
    pub fn from_json(text: &str) -> Result<Self, String> {
        let value: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
        let list = match &value {
            Value::Array(items) => Some(items.clone()),
            Value::Object(map) => match map.get("chapters") {
                Some(Value::Array(items)) => Some(items.clone()),
                _ => None,
            },
            _ => return Err("expected a JSON object or array".to_string()),
        };

        match list {
            Some(items) => {
                let mut book = Self::new();
                for item in items {
                    let entry: OutlineEntry =
                        serde_json::from_value(item).map_err(|e| e.to_string())?;
                    book.insert(entry);
                }
                Ok(book)
            }
            None => {
                let entries: BTreeMap<u32, OutlineEntry> =
                    serde_json::from_value(value).map_err(|e| e.to_string())?;
                for (key, entry) in &entries {
                    if *key != entry.chapter_number {
                        return Err(format!(
                            "key {} holds chapter_number {}",
                            key, entry.chapter_number
                        ));
                    }
                }
                Ok(Self { entries })
            }
        }
    }

    /// Serialize as a chapter-number mapping.
    pub fn to_json(&self) -> Result<String, ForgeError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Entry for `chapter`.
    pub fn get(&self, chapter: u32) -> Option<&OutlineEntry> {
        self.entries.get(&chapter)
    }

    /// Whether `chapter` has an entry.
    pub fn contains(&self, chapter: u32) -> bool {
        self.entries.contains_key(&chapter)
    }

    /// Insert or replace an entry.
    pub fn insert(&mut self, entry: OutlineEntry) -> Option<OutlineEntry> {
        self.entries.insert(entry.chapter_number, entry)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in chapter order.
    pub fn entries(&self) -> impl Iterator<Item = &OutlineEntry> {
        self.entries.values()
    }

    /// Highest chapter with an entry.
    pub fn last_chapter(&self) -> Option<u32> {
        self.entries.keys().next_back().copied()
    }

    /// Up to `n` entries immediately preceding `chapter`, in chapter order.
    pub fn preceding(&self, chapter: u32, n: usize) -> Vec<&OutlineEntry> {
        let mut before: Vec<&OutlineEntry> = self
            .entries
            .range(..chapter)
            .rev()
            .take(n)
            .map(|(_, e)| e)
            .collect();
        before.reverse();
        before
    }

    /// Chapters in `start..=end` without an entry.
    pub fn missing_in(&self, start: u32, end: u32) -> Vec<u32> {
        (start..=end).filter(|c| !self.contains(*c)).collect()
    }
}

// ============================================================================
// Response parsing
// ============================================================================

/// Parse an outline model response for chapters `first_chapter..first_chapter+count`.
///
/// The response must contain a JSON array with exactly `count` objects. Code
/// fences and prose around the array are ignored. Chapter numbers are
/// assigned by position; missing titles default to `第{n}章`.
pub fn parse_outline_response(
    response: &str,
    first_chapter: u32,
    count: usize,
) -> Result<Vec<OutlineEntry>, ForgeError> {
    let items = extract_array(response)?;
    if items.len() != count {
        return Err(ForgeError::OutlineParse {
            message: format!("expected {} chapters, got {}", count, items.len()),
        });
    }

    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let chapter_number = first_chapter + i as u32;
            let obj = item.as_object().ok_or_else(|| ForgeError::OutlineParse {
                message: format!("chapter {} is not a JSON object", chapter_number),
            })?;
            let title = obj
                .get("title")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| OutlineEntry::default_title(chapter_number));

            Ok(OutlineEntry {
                chapter_number,
                title,
                key_points: string_list(obj.get("key_points")),
                characters: string_list(obj.get("characters")),
                settings: string_list(obj.get("settings")),
                conflicts: string_list(obj.get("conflicts")),
            })
        })
        .collect()
}

fn extract_array(response: &str) -> Result<Vec<Value>, ForgeError> {
    let start = response.find('[');
    let end = response.rfind(']');
    let slice = match (start, end) {
        (Some(s), Some(e)) if s < e => &response[s..=e],
        _ => {
            return Err(ForgeError::OutlineParse {
                message: "response contains no JSON array".to_string(),
            })
        }
    };

    match serde_json::from_str::<Value>(slice) {
        Ok(Value::Array(items)) => Ok(items),
        Ok(_) => Err(ForgeError::OutlineParse {
            message: "response is not a JSON array".to_string(),
        }),
        Err(e) => Err(ForgeError::OutlineParse {
            message: format!("invalid JSON: {}", e),
        }),
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}
