//! Reliability patterns for queue interactions
//!
//! This module provides:
//! - [`RetryPolicy`] - Exponential backoff with an optional attempt ceiling

mod retry;

pub use retry::{RetryPolicy, DEFAULT_MAX_INTERVAL, DEFAULT_REPORT_RETRIES};
