//! CLI definition and command dispatch for NovelForge.
//!
//! This module defines the command-line interface using `clap` and provides
//! the `run()` function that dispatches commands to the engine.
//!
//! ## Configuration Precedence
//!
//! 1. `--config` flag
//! 2. `NOVELFORGE_CONFIG` environment variable
//! 3. `<project>/novelforge.yaml`
//! 4. Built-in defaults

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::ui::{format, table, ColorMode, MessageType, Progress, ProgressMode, Style};

use forge_core::{ForgeEngine, ForgeError, RunReport, CONFIG_ENV_VAR};

// ============================================================================
// CLI Definition
// ============================================================================

/// Version string including git commit hash
const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")");

/// NovelForge – reference-grounded, resumable novel generation
#[derive(Parser, Debug)]
#[command(name = "novelforge")]
#[command(author, version = VERSION, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, env = "NOVELFORGE_VERBOSE")]
    pub verbose: bool,

    /// Suppress progress and informational messages
    #[arg(short, long, global = true, env = "NOVELFORGE_QUIET")]
    pub quiet: bool,

    /// Path to configuration file (default: <project>/novelforge.yaml)
    #[arg(long, global = true, env = CONFIG_ENV_VAR)]
    pub config: Option<PathBuf>,

    /// Project directory
    #[arg(short, long, global = true, env = "NOVELFORGE_PROJECT", default_value = ".")]
    pub project: PathBuf,

    /// Color output mode: always, never, or auto (default: auto)
    #[arg(long, global = true, env = "NOVELFORGE_COLOR", default_value = "auto")]
    pub color: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write a default novelforge.yaml and create the project directories
    #[command(after_help = r#"EXAMPLES:
    # Initialize a project in the current directory
    novelforge init

    # Typical first-time workflow
    novelforge init && cp ~/notes/*.txt references/ && novelforge kb build
"#)]
    Init {
        /// Overwrite an existing novelforge.yaml
        #[arg(long)]
        force: bool,
    },

    /// Generate chapter outlines for a range of chapters
    #[command(after_help = r#"EXAMPLES:
    # Outline the first 50 chapters
    novelforge outline --start 1 --end 50

    # Re-outline chapters that are already written
    novelforge outline --start 10 --end 12 --force --prompt "加强反派的动机"
"#)]
    Outline {
        /// First chapter to outline
        #[arg(long)]
        start: u32,

        /// Last chapter to outline (inclusive)
        #[arg(long)]
        end: u32,

        /// Extra instructions appended to the outline prompt
        #[arg(long)]
        prompt: Option<String>,

        /// Replace outlines of chapters that are already done
        #[arg(long)]
        force: bool,

        /// Output the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write chapter content from the outline
    #[command(after_help = r#"EXAMPLES:
    # Continue from the saved progress
    novelforge content

    # Start (or restart) from chapter 12
    novelforge content --start-chapter 12

    # Regenerate only chapter 5
    novelforge content --target-chapter 5 --prompt "多写一些打斗细节"
"#)]
    Content {
        /// Chapter to start from instead of the saved progress
        #[arg(long, conflicts_with = "target_chapter")]
        start_chapter: Option<u32>,

        /// Regenerate exactly this chapter
        #[arg(long)]
        target_chapter: Option<u32>,

        /// Extra instructions appended to the chapter prompt
        #[arg(long)]
        prompt: Option<String>,

        /// Output the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Re-derive summaries for written chapters
    Finalize {
        /// Chapters to finalize
        #[arg(required = true)]
        chapters: Vec<u32>,

        /// Output the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Outline whatever is missing, then write every remaining chapter
    Auto {
        /// Extra instructions appended to every prompt
        #[arg(long)]
        prompt: Option<String>,

        /// Output the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage the reference knowledge base
    Kb {
        #[command(subcommand)]
        action: KbCommand,
    },

    /// Show progress, outline coverage and per-chapter state
    #[command(after_help = r#"EXAMPLES:
    # Show current status
    novelforge status

    # Pipe to jq for specific fields
    novelforge status --json | jq '.progress.current_chapter'
"#)]
    Status {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

/// Knowledge base subcommands
#[derive(Subcommand, Debug)]
pub enum KbCommand {
    /// Build the knowledge base, or load it from cache when unchanged
    Build {
        /// Rebuild even if a valid cache exists
        #[arg(long)]
        force: bool,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Retrieve the reference chunks most similar to a query
    Query {
        /// Query text
        text: String,

        /// Number of results (default: knowledge.topK)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Delete the knowledge base cache
    Invalidate,
}

// ============================================================================
// Entry point
// ============================================================================

/// Run the CLI application.
///
/// Returns `ExitCode::SUCCESS` on success, or `ExitCode::FAILURE` on error
/// and when any chapter of a generation run failed.
pub fn run() -> ExitCode {
    let cli = Cli::parse();

    // Warnings always; debug with --verbose. RUST_LOG overrides both.
    let log_level = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "forge_core={0},forge_model={0},forge_db={0},forge_cli={0}",
            log_level
        ))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let color_mode = ColorMode::parse(&cli.color).unwrap_or_default();
    let style = Style::new(color_mode);

    let result = dispatch(&cli, &style);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", render_error(&style, &e));
            ExitCode::FAILURE
        }
    }
}

fn dispatch(cli: &Cli, style: &Style) -> anyhow::Result<()> {
    if let Command::Init { force } = &cli.command {
        return handle_init(style, &cli.project, *force);
    }

    let engine = ForgeEngine::open(&cli.project, cli.config.as_deref())
        .with_context(|| format!("Failed to open project at {}", cli.project.display()))?;

    match &cli.command {
        Command::Init { .. } => Ok(()),
        Command::Outline {
            start,
            end,
            prompt,
            force,
            json,
        } => {
            let mode = ProgressMode::detect(cli.quiet, *json);
            let progress = Progress::spinner(&format!("Outlining chapters {}-{}...", start, end), mode);
            let report = engine.outline(*start, *end, prompt.as_deref(), *force);
            progress.finish_clear();
            print_report(style, mode, &report?, *json)
        }
        Command::Content {
            start_chapter,
            target_chapter,
            prompt,
            json,
        } => {
            let mode = ProgressMode::detect(cli.quiet, *json);
            let label = match target_chapter {
                Some(n) => format!("Regenerating chapter {}...", n),
                None => "Writing chapters...".to_string(),
            };
            let progress = Progress::spinner(&label, mode);
            let report = engine.content(*start_chapter, *target_chapter, prompt.as_deref());
            progress.finish_clear();
            print_report(style, mode, &report?, *json)
        }
        Command::Finalize { chapters, json } => {
            let mode = ProgressMode::detect(cli.quiet, *json);
            let progress = Progress::spinner("Summarizing chapters...", mode);
            let report = engine.finalize(chapters);
            progress.finish_clear();
            print_report(style, mode, &report?, *json)
        }
        Command::Auto { prompt, json } => {
            let mode = ProgressMode::detect(cli.quiet, *json);
            let progress = Progress::spinner("Generating novel...", mode);
            let report = engine.auto(prompt.as_deref());
            progress.finish_clear();
            print_report(style, mode, &report?, *json)
        }
        Command::Kb { action } => handle_kb(style, &engine, action, cli.quiet),
        Command::Status { json } => handle_status(style, &engine, *json),
    }
}

/// Format an error for stderr, with the hint of configuration errors.
fn render_error(style: &Style, error: &anyhow::Error) -> String {
    match error.downcast_ref::<ForgeError>() {
        Some(ForgeError::InvalidConfig { message, hint }) => {
            style.error_with_context("Invalid configuration", Some(message.as_str()), Some(hint.as_str()))
        }
        Some(ForgeError::StaleIndex { .. }) | Some(ForgeError::EmptyCorpus) => style.error_with_context(
            &error.to_string(),
            None,
            Some("Put .txt files under references/ and run `novelforge kb build`"),
        ),
        Some(e) if e.is_fatal() => style.error_with_context("Run aborted", Some(&e.to_string()), None),
        _ => style.message(MessageType::Err, &format!("{:#}", error)),
    }
}

// ============================================================================
// Command handlers
// ============================================================================

fn handle_init(style: &Style, project: &Path, force: bool) -> anyhow::Result<()> {
    let result = ForgeEngine::init_project(project, force)?;

    let verb = if result.overwritten { "Reinitialized" } else { "Initialized" };
    println!(
        "{}",
        style.message(
            MessageType::Ok,
            &format!("{} NovelForge project at {}", verb, project.display())
        )
    );
    println!(
        "{}",
        style.message_detail("Config", &style.file_path(&result.config_path.display().to_string()))
    );
    for dir in &result.created_dirs {
        println!(
            "{}",
            style.message_detail("Created", &style.file_path(&dir.display().to_string()))
        );
    }

    println!();
    println!("{}", style.message(MessageType::Hint, "Next steps:"));
    println!("  1. Add reference texts: references/*.txt");
    println!("  2. Set the novel and model sections in novelforge.yaml");
    println!("  3. Build the knowledge base: novelforge kb build");
    println!("  4. Generate:                 novelforge auto");
    Ok(())
}

fn handle_kb(style: &Style, engine: &ForgeEngine, action: &KbCommand, quiet: bool) -> anyhow::Result<()> {
    match action {
        KbCommand::Build { force, json } => {
            let mode = ProgressMode::detect(quiet, *json);
            let progress = Progress::spinner("Building knowledge base...", mode);
            let result = engine.kb_build(*force);
            progress.finish_clear();
            let result = result?;

            if *json {
                println!("{}", serde_json::to_string_pretty(&result)?);
                return Ok(());
            }

            let headline = if result.cache_hit {
                format!("Knowledge base loaded from cache ({} chunks)", result.chunk_count)
            } else {
                format!("Knowledge base built ({} chunks)", result.chunk_count)
            };
            println!("{}", style.message(MessageType::Ok, &headline));
            println!("{}", style.message_detail("Dimension", &result.dimension.to_string()));
            println!(
                "{}",
                style.message_detail("Cache", &style.file_path(&result.cache_dir.display().to_string()))
            );
            for skipped in &result.skipped {
                println!(
                    "{}",
                    style.message(
                        MessageType::Skip,
                        &format!("{}: {}", skipped.chunk_id, skipped.reason)
                    )
                );
            }
            Ok(())
        }
        KbCommand::Query { text, top_k, json } => {
            if text.trim().is_empty() {
                bail!("Query text cannot be empty");
            }
            let mode = ProgressMode::detect(quiet, *json);
            let progress = Progress::spinner("Searching references...", mode);
            let results = engine.kb_query(text, *top_k);
            progress.finish_clear();
            let results = results?;

            if *json {
                println!("{}", serde_json::to_string_pretty(&results)?);
                return Ok(());
            }

            if results.is_empty() {
                println!("{}", style.message(MessageType::Info, "No matching references"));
                return Ok(());
            }
            println!("{}", table::render_results_table(&results));
            Ok(())
        }
        KbCommand::Invalidate => {
            if engine.kb_invalidate()? {
                println!("{}", style.message(MessageType::Ok, "Knowledge base cache removed"));
            } else {
                println!("{}", style.message(MessageType::Info, "No knowledge base cache to remove"));
            }
            Ok(())
        }
    }
}

fn handle_status(style: &Style, engine: &ForgeEngine, json: bool) -> anyhow::Result<()> {
    let status = engine.status()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let progress = &status.progress;
    let title = &engine.config().novel.title;
    println!("{}", style.section(if title.is_empty() { "NOVEL" } else { title.as_str() }));
    println!(
        "{}",
        style.key_value(
            "Progress",
            &format!("{}/{} chapters done", status.done, progress.target_chapters)
        )
    );
    println!("{}", style.key_value("Next chapter", &progress.current_chapter.to_string()));
    println!(
        "{}",
        style.key_value(
            "Outlined",
            &format!("{} (through chapter {})", status.outlined, progress.last_outline_chapter)
        )
    );
    if let Some(updated) = progress.updated_at {
        println!("{}", style.key_value("Updated", &format::format_relative_time(updated)));
    }
    if !progress.failed_chapters.is_empty() {
        let failed: Vec<u32> = progress.failed_chapters.keys().copied().collect();
        println!(
            "{}",
            style.message(
                MessageType::Warn,
                &format!("Failed chapters: {}", format::chapter_ranges(&failed))
            )
        );
    }

    println!();
    println!("{}", table::render_chapters_table(&status.chapters));
    Ok(())
}

/// Print a generation run report. Fails when any chapter failed.
fn print_report(style: &Style, mode: ProgressMode, report: &RunReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else if mode.is_verbose() {
        let elapsed = format::format_elapsed(report.started_at, report.finished_at);
        if !report.succeeded.is_empty() {
            println!(
                "{}",
                style.message(
                    MessageType::Ok,
                    &format!(
                        "{}: chapters {} ({})",
                        report.command,
                        format::chapter_ranges(&report.succeeded),
                        elapsed
                    )
                )
            );
        } else if report.failed.is_empty() {
            println!(
                "{}",
                style.message(MessageType::Info, &format!("{}: nothing to do", report.command))
            );
        }
        if !report.skipped.is_empty() {
            println!(
                "{}",
                style.message(
                    MessageType::Skip,
                    &format!("already done: {}", format::chapter_ranges(&report.skipped))
                )
            );
        }
        if !report.failed.is_empty() {
            println!();
            println!("{}", table::render_failures_table(&report.failed));
        }
    }

    if !report.is_success() {
        bail!(
            "{} chapter(s) failed in run {}; rerun `novelforge content` to retry them",
            report.failed.len(),
            report.run_id
        );
    }
    Ok(())
}
