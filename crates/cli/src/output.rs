//! Output formatting for CLI

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use viewtrace_common::ObservationStatus;
use viewtrace_diff::Severity;

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

fn table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Print a single item
pub fn print_item<T: Serialize + TableDisplay>(item: &T, format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            let mut table = table();
            table.set_header(T::headers());
            table.add_row(item.row());
            println!("{table}");
        }
        OutputFormat::Json => print_json(item),
    }
}

/// Print a list of items
pub fn print_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                println!("No items found.");
                return;
            }
            let mut table = table();
            table.set_header(T::headers());
            for item in items {
                table.add_row(item.row());
            }
            println!("{table}");
        }
        OutputFormat::Json => print_json(items),
    }
}

/// Key/value pairs as a two-column table
pub fn print_fields(fields: &[(&str, String)]) {
    let mut table = table();
    for (key, value) in fields {
        table.add_row(vec![key.to_string(), value.clone()]);
    }
    println!("{table}");
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

/// Print success message
pub fn print_success(message: &str) {
    println!("✅ {}", message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("❌ {}", message);
}

/// Print warning message
pub fn print_warning(message: &str) {
    println!("⚠️  {}", message);
}

/// Print info message
pub fn print_info(message: &str) {
    println!("ℹ️  {}", message);
}

pub fn status_label(status: ObservationStatus) -> String {
    let text = status.as_str();
    match status {
        ObservationStatus::Completed => text.green().to_string(),
        ObservationStatus::Failed => text.red().to_string(),
        ObservationStatus::Running => text.yellow().to_string(),
        ObservationStatus::Pending => text.blue().to_string(),
        ObservationStatus::Cancelled => text.dimmed().to_string(),
    }
}

pub fn severity_label(severity: Severity) -> String {
    let text = severity.to_string();
    match severity {
        Severity::None => text.normal().to_string(),
        Severity::Low => text.green().to_string(),
        Severity::Medium => text.yellow().to_string(),
        Severity::High => text.red().bold().to_string(),
    }
}

/// Human-readable span such as `3d 4h` or `12m`.
pub fn format_elapsed(millis: i64) -> String {
    let sign = if millis < 0 { "-" } else { "" };
    let secs = millis.unsigned_abs() / 1000;
    let (days, hours, minutes) = (secs / 86_400, (secs % 86_400) / 3600, (secs % 3600) / 60);
    let body = if days > 0 {
        format!("{}d {}h", days, hours)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m", minutes)
    } else {
        format!("{}s", secs)
    };
    format!("{}{}", sign, body)
}
