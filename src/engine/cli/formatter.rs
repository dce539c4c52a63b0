//! CLI Output Formatting Module
//! Colorized terminal output for the update client

use colored::Colorize;

pub struct CliFormatter;

impl CliFormatter {
    pub fn success(message: &str) {
        println!("{} {}", "✓".green().bold(), message);
    }

    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red().bold(), message);
    }

    /// Recovery instructions after a failed rollback
    pub fn fatal(message: &str) {
        eprintln!("{} {}", "‼".red().bold(), message.red().bold());
    }

    pub fn info(message: &str) {
        println!("{} {}", "ℹ".blue().bold(), message);
    }

    pub fn kv(key: &str, value: &str) {
        println!("  {}: {}", key.bright_white().bold(), value);
    }
}

/// Format file size in human-readable format
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}
