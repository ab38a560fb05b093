//! Utility functions for currency and date formatting.

pub mod currency;
pub mod format;

// Re-export commonly used functions at module level
pub use currency::{format_amount, format_signed, symbol};
pub use format::{format_date, month_label, month_name, truncate_string};
