//! Output formatting utilities for the CLI

use colored::Colorize;

/// Width of the run banner rules
const RULE_WIDTH: usize = 40;

/// Print success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print warning message
pub fn warning(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print a block of `key: value` lines between two rules
pub fn banner(lines: &[(&str, String)]) {
    let rule = "=".repeat(RULE_WIDTH);
    println!("{}", rule);
    for (key, value) in lines {
        println!("{} {}", format!("{}:", key).bold(), value);
    }
    println!("{}", rule);
}
