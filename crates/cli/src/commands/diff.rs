//! Offline comparison of local files
//!
//! Runs the same engines the server uses, without talking to a server.

use anyhow::{Context, Result};
use clap::Subcommand;
use std::path::{Path, PathBuf};
use viewtrace_common::text::normalize_whitespace;
use viewtrace_diff::VisualDiffEngine;

use crate::commands::compare::print_text_comparison;
use crate::output::{print_fields, print_json, print_success, severity_label, OutputFormat};

#[derive(Subcommand)]
pub enum DiffCommands {
    /// Compare two screenshots
    Images {
        /// Current image
        current: PathBuf,

        /// Image to compare against
        previous: PathBuf,

        /// Write the diff overlay PNG here
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Compare two text files word by word
    Text {
        /// Earlier text
        before: PathBuf,

        /// Later text
        after: PathBuf,
    },
}

pub async fn execute(cmd: DiffCommands, format: OutputFormat) -> Result<()> {
    match cmd {
        DiffCommands::Images {
            current,
            previous,
            out,
        } => images(&current, &previous, out.as_deref(), format).await,
        DiffCommands::Text { before, after } => text(&before, &after, format).await,
    }
}

async fn read(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))
}

async fn images(
    current: &Path,
    previous: &Path,
    out: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let (a, b) = tokio::try_join!(read(current), read(previous))?;
    let result = tokio::task::spawn_blocking(move || VisualDiffEngine::default().compare(&a, &b))
        .await??;

    if let Some(out) = out {
        tokio::fs::write(out, &result.diff_image)
            .await
            .with_context(|| format!("failed to write {}", out.display()))?;
    }

    match format {
        OutputFormat::Json => print_json(&result),
        OutputFormat::Table => {
            print_fields(&[
                ("Changed", if result.has_changes() { "yes" } else { "no" }.to_string()),
                ("Change score", format!("{:.2}%", result.change_score)),
                ("Severity", severity_label(result.severity)),
                (
                    "Pixels",
                    format!("{} of {}", result.changed_pixels, result.total_pixels),
                ),
                ("Dimensions", format!("{}x{}", result.width, result.height)),
            ]);
            if let Some(out) = out {
                print_success(&format!("Diff overlay written to {}", out.display()));
            }
        }
    }
    Ok(())
}

async fn text(before: &Path, after: &Path, format: OutputFormat) -> Result<()> {
    let (a, b) = tokio::try_join!(read(before), read(after))?;
    let a = normalize_whitespace(&String::from_utf8_lossy(&a));
    let b = normalize_whitespace(&String::from_utf8_lossy(&b));
    let result = viewtrace_diff::compare_texts(&a, &b);

    match format {
        OutputFormat::Json => print_json(&result),
        OutputFormat::Table => print_text_comparison(&result),
    }
    Ok(())
}
