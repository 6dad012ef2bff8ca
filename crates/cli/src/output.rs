//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print rows as a table, or `data` as JSON
pub fn print_rows<R: Tabled, D: Serialize + ?Sized>(
    rows: Vec<R>,
    data: &D,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Table => {
            if rows.is_empty() {
                println!("{}", "No items found".yellow());
                return Ok(());
            }
            let table = Table::new(rows).with(Style::rounded()).to_string();
            println!("{}", table);
        }
        OutputFormat::Json => print_json(data)?,
    }
    Ok(())
}

pub fn print_json<D: Serialize + ?Sized>(data: &D) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(data)?);
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: i64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    let b = bytes.max(0) as f64;
    if b >= GB {
        format!("{:.2}Gi", b / GB)
    } else if b >= MB {
        format!("{:.2}Mi", b / MB)
    } else if b >= KB {
        format!("{:.2}Ki", b / KB)
    } else {
        format!("{}B", bytes.max(0))
    }
}

/// Shorten a container id to the familiar 12 characters
pub fn short_id(id: &str) -> String {
    if id.contains('/') {
        id.to_string()
    } else {
        id.chars().take(12).collect()
    }
}

/// Truncate text for table cells
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}

/// Color status based on value
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "running" | "succeeded" | "healthy" | "ok" => status.green().to_string(),
        "created" | "pending" | "paused" | "restarting" | "degraded" => {
            status.yellow().to_string()
        }
        "exited" | "dead" | "failed" | "removing" | "error" | "unhealthy" => {
            status.red().to_string()
        }
        _ => status.to_string(),
    }
}
