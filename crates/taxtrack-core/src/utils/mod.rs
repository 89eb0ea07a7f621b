//! Utility functions for display formatting.

pub mod format;

// Re-export commonly used functions at module level
pub use format::{
    days_until, format_currency, format_date, format_deadline, format_percent, parse_date,
    truncate_string,
};
