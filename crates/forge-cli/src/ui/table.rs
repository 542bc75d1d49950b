//! Table rendering for CLI output using comfy-table.
//!
//! | Command | Table Function |
//! |---------|----------------|
//! | `novelforge status` | `render_chapters_table()` |
//! | `novelforge kb query` | `render_results_table()` |
//! | generation commands | `render_failures_table()` |

use comfy_table::presets::NOTHING;
use comfy_table::{Cell, CellAlignment, ColumnConstraint, Table, Width};
use forge_core::{ChapterFailure, ChapterStatus, ScoredChunk};

use super::color::terminal_width;
use super::format::{single_line, truncate_str};

/// Render the per-chapter table for `novelforge status`.
///
/// # Example Output
///
/// ```text
/// CH   TITLE          STATE                NOTE
///  1   初入青云        done
///  2   闭关            failed               Chapter 2 failed validation...
///  3   -              needs outline
/// ```
pub fn render_chapters_table(chapters: &[ChapterStatus]) -> String {
    if chapters.is_empty() {
        return String::new();
    }

    let mut table = Table::new();
    table.load_preset(NOTHING);

    table.set_header(vec![
        Cell::new("CH").set_alignment(CellAlignment::Right),
        Cell::new("TITLE"),
        Cell::new("STATE"),
        Cell::new("NOTE"),
    ]);

    table.set_constraints(vec![
        ColumnConstraint::LowerBoundary(Width::Fixed(4)),  // CH
        ColumnConstraint::LowerBoundary(Width::Fixed(12)), // TITLE
        ColumnConstraint::LowerBoundary(Width::Fixed(18)), // STATE
        ColumnConstraint::LowerBoundary(Width::Fixed(4)),  // NOTE
    ]);

    for chapter in chapters {
        let title = chapter
            .title
            .as_deref()
            .map(|t| truncate_str(t, 16))
            .unwrap_or_else(|| "-".to_string());
        let note = chapter
            .failure
            .as_deref()
            .map(|f| truncate_str(&single_line(f), 48))
            .unwrap_or_default();

        table.add_row(vec![
            Cell::new(chapter.chapter).set_alignment(CellAlignment::Right),
            Cell::new(title),
            Cell::new(chapter.state),
            Cell::new(note),
        ]);
    }

    table.trim_fmt().to_string()
}

/// Render retrieval results for `novelforge kb query`.
///
/// The text column is cut to what fits the terminal.
///
/// # Example Output
///
/// ```text
///  #   SCORE   SOURCE            TEXT
///  1   0.912   cultivation.txt   修炼体系分为炼气筑基金丹...
/// ```
pub fn render_results_table(results: &[ScoredChunk]) -> String {
    if results.is_empty() {
        return String::new();
    }

    let mut table = Table::new();
    table.load_preset(NOTHING);

    table.set_header(vec![
        Cell::new("#").set_alignment(CellAlignment::Right),
        Cell::new("SCORE").set_alignment(CellAlignment::Right),
        Cell::new("SOURCE"),
        Cell::new("TEXT"),
    ]);

    // CJK characters render two columns wide.
    let text_chars = (terminal_width().saturating_sub(40) / 2).clamp(10, 60);

    for (rank, result) in results.iter().enumerate() {
        let score = result.rerank_score.unwrap_or(result.score);
        table.add_row(vec![
            Cell::new(rank + 1).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.3}", score)).set_alignment(CellAlignment::Right),
            Cell::new(truncate_str(&result.chunk.source_file, 24)),
            Cell::new(truncate_str(&single_line(&result.chunk.text), text_chars)),
        ]);
    }

    table.trim_fmt().to_string()
}

/// Render the failed chapters of a run.
pub fn render_failures_table(failures: &[ChapterFailure]) -> String {
    if failures.is_empty() {
        return String::new();
    }

    let mut table = Table::new();
    table.load_preset(NOTHING);

    table.set_header(vec![
        Cell::new("CH").set_alignment(CellAlignment::Right),
        Cell::new("KIND"),
        Cell::new("REASON"),
    ]);

    for failure in failures {
        table.add_row(vec![
            Cell::new(failure.chapter).set_alignment(CellAlignment::Right),
            Cell::new(&failure.kind),
            Cell::new(truncate_str(&single_line(&failure.reason), 72)),
        ]);
    }

    table.trim_fmt().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_core::{ChapterState, Chunk};

    fn chapters() -> Vec<ChapterStatus> {
        vec![
            ChapterStatus {
                chapter: 1,
                title: Some("初入青云".to_string()),
                state: ChapterState::Done,
                failure: None,
            },
            ChapterStatus {
                chapter: 2,
                title: Some("闭关".to_string()),
                state: ChapterState::Failed,
                failure: Some("Chapter 2 failed validation after 3 attempts".to_string()),
            },
            ChapterStatus {
                chapter: 3,
                title: None,
                state: ChapterState::NeedsOutline,
                failure: None,
            },
        ]
    }

    #[test]
    fn test_chapters_table_structure() {
        let output = render_chapters_table(&chapters());
        assert!(output.contains("CH"));
        assert!(output.contains("STATE"));
        assert!(output.contains("初入青云"));
        assert!(output.contains("needs outline"));
        assert!(output.contains("failed validation"));
    }

    #[test]
    fn test_results_table() {
        let results = vec![ScoredChunk {
            chunk: Chunk {
                id: "cultivation.txt#0".to_string(),
                source_file: "cultivation.txt".to_string(),
                text: "修炼体系\n分为九重".to_string(),
                sequence_index: 0,
                char_offset: 0,
            },
            score: 0.9123,
            rerank_score: None,
        }];
        let output = render_results_table(&results);
        assert!(output.contains("cultivation.txt"));
        assert!(output.contains("0.912"));
        assert!(output.contains("修炼体系 分为九重"));
    }

    #[test]
    fn test_failures_table() {
        let output = render_failures_table(&[ChapterFailure {
            chapter: 4,
            kind: "generation".to_string(),
            reason: "primary timed out".to_string(),
        }]);
        assert!(output.contains("generation"));
        assert!(output.contains("primary timed out"));
    }

    #[test]
    fn test_empty_tables() {
        assert!(render_chapters_table(&[]).is_empty());
        assert!(render_results_table(&[]).is_empty());
        assert!(render_failures_table(&[]).is_empty());
    }
}
