//! # CLI UI Module
//!
//! Consistent styling and formatting for `novelforge` output.
//!
//! Output is scannable (`[ok]` / `[err]` prefixes), works without colors
//! (respects `NO_COLOR`) and is scriptable through `--json`.
//!
//! ## Module Structure
//!
//! - `color`: Color mode detection and terminal capability checks
//! - `style`: Message types, prefixes, and styling functions
//! - `format`: Utility formatters (durations, time, truncation)
//! - `table`: Table rendering with comfy-table
//! - `progress`: Spinners for long operations

pub mod color;
pub mod format;
pub mod progress;
pub mod style;
pub mod table;

pub use color::ColorMode;
pub use progress::{Progress, ProgressMode};
pub use style::{MessageType, Style};
