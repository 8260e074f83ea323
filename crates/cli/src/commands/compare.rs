//! Server-side comparison of two observations

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use viewtrace_diff::{SpanKind, TextComparison};

use crate::client::{ApiClient, Comparison, TextReport, VisualReport};
use crate::output::{format_elapsed, print_fields, print_json, severity_label, OutputFormat};

#[derive(Args)]
pub struct CompareArgs {
    /// The newer observation
    pub id: String,

    /// The observation to compare against
    pub with: String,

    /// Compare extracted text instead of screenshots
    #[arg(long)]
    pub text: bool,
}

pub async fn execute(args: CompareArgs, client: &ApiClient, format: OutputFormat) -> Result<()> {
    if args.text {
        let report = client.compare_text(&args.id, &args.with).await?;
        match format {
            OutputFormat::Json => print_json(&report),
            OutputFormat::Table => print_text_report(&report),
        }
    } else {
        let report = client.compare_visual(&args.id, &args.with).await?;
        match format {
            OutputFormat::Json => print_json(&report),
            OutputFormat::Table => print_visual_report(&report),
        }
    }
    Ok(())
}

fn header<T>(report: &Comparison<T>, time_diff: i64) {
    println!(
        "{} {} → {} ({} apart)",
        "Comparing".bold(),
        report.previous.id.dimmed(),
        report.current.id,
        format_elapsed(time_diff)
    );
}

fn print_visual_report(report: &Comparison<VisualReport>) {
    let c = &report.comparison;
    header(report, c.time_diff);
    print_fields(&[
        ("Changed", if c.has_changes { "yes" } else { "no" }.to_string()),
        ("Change score", format!("{:.2}%", c.change_score)),
        ("Severity", severity_label(c.change_severity)),
        ("Pixels", format!("{} of {}", c.num_diff_pixels, c.total_pixels)),
        ("Days apart", c.days_diff.to_string()),
        (
            "Diff image",
            c.diff_image_url.clone().unwrap_or_else(|| "-".to_string()),
        ),
    ]);
}

fn print_text_report(report: &Comparison<TextReport>) {
    let c = &report.comparison;
    header(report, c.time_diff);
    print_text_comparison(&c.result);
}

/// Summary table followed by the inline change list.
pub fn print_text_comparison(result: &TextComparison) {
    print_fields(&[
        ("Changed", if result.has_changes { "yes" } else { "no" }.to_string()),
        ("Change score", format!("{:.2}%", result.change_score)),
        ("Severity", severity_label(result.change_severity)),
        ("Words added", result.statistics.added_words.to_string()),
        ("Words removed", result.statistics.removed_words.to_string()),
    ]);
    if result.has_changes {
        println!("{}", render_spans(result));
    }
}

fn render_spans(result: &TextComparison) -> String {
    result
        .changes
        .iter()
        .map(|span| match span.kind {
            SpanKind::Added => format!("[+{}]", span.value).green().to_string(),
            SpanKind::Removed => format!("[-{}]", span.value).red().strikethrough().to_string(),
            SpanKind::Unchanged => span.value.clone(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}
