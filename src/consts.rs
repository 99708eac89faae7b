//! Project-wide constants.

use std::path::PathBuf;

pub const AUTHOR: &str = env!("CARGO_PKG_AUTHORS");
pub const HOMEPAGE: &str = env!("CARGO_PKG_HOMEPAGE");
pub const REPO: &str = env!("CARGO_PKG_REPOSITORY");

pub const DEFAULT_MAX_TASKS: usize = 5;
pub const DEFAULT_MAX_TASKS_PER_PROXY: usize = 5;
pub const DEFAULT_MIN_ACCOUNT_AGE_DAYS: i64 = 30;
pub const DEFAULT_MIN_FOLLOWERS: u64 = 3;
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default database path: `~/.flock/flock.db`.
/// Single DB for account records and config.
pub fn default_db_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".flock")
        .join("flock.db")
}

/// Format a number with comma separators (e.g. 1,234,567).
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i).is_multiple_of(3) {
            result.push(',');
        }
        result.push(c);
    }
    result
}
