//! Output formatting utilities

use console::{style, Style};

/// Print a success message
pub fn success(message: &str) {
    println!("{} {}", style("✓").green().bold(), message);
}

/// Print an error message
pub fn error(message: &str) {
    eprintln!("{} {}", style("✗").red().bold(), message);
}

/// Print a warning message
pub fn warning(message: &str) {
    eprintln!("{} {}", style("!").yellow().bold(), message);
}

/// Print an info message
pub fn info(message: &str) {
    println!("{} {}", style("→").blue(), message);
}

/// Create a styled key-value line
pub fn key_value(key: &str, value: &str) -> String {
    format!("     {}: {}", style(key).dim(), value)
}

/// Style for task ids
pub fn task_style() -> Style {
    Style::new().bold()
}

/// Style for paths
pub fn path_style() -> Style {
    Style::new().cyan()
}

/// `1 task`, `2 tasks`
pub fn plural(count: usize, noun: &str) -> String {
    format!("{} {}{}", count, noun, if count == 1 { "" } else { "s" })
}
