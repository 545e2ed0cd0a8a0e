//! Input validation for component options.
//!
//! Every public constructor funnels its numeric options through these
//! checks so range errors read the same across components.

use crate::constants::timeouts::{MAX_TIMEOUT, MIN_TIMEOUT};
use crate::errors::{Error, Result};
use std::time::Duration;

/// Validates that a count option is a positive integer.
pub fn validate_positive(value: u64, name: &str) -> Result<()> {
    if value == 0 {
        return Err(Error::Validation(format!(
            "{name} must be a positive integer"
        )));
    }
    Ok(())
}

/// Validates a timeout against the crate-wide default range.
pub fn validate_timeout(value: Duration, name: &str) -> Result<()> {
    validate_timeout_in(value, name, MIN_TIMEOUT, MAX_TIMEOUT)
}

/// Validates a timeout against an explicit `[min, max]` range.
pub fn validate_timeout_in(
    value: Duration,
    name: &str,
    min: Duration,
    max: Duration,
) -> Result<()> {
    if value < min {
        return Err(Error::Validation(format!(
            "{name} must be at least {}ms",
            min.as_millis()
        )));
    }
    if value > max {
        return Err(Error::Validation(format!(
            "{name} must not exceed {}ms",
            max.as_millis()
        )));
    }
    Ok(())
}

/// Validates that `larger` strictly exceeds `smaller`, for paired limits
/// like `max_total_size` / `max_entry_size`.
pub fn validate_ordered(
    larger: usize,
    larger_name: &str,
    smaller: usize,
    smaller_name: &str,
) -> Result<()> {
    if larger <= smaller {
        return Err(Error::Validation(format!(
            "{larger_name} must be greater than {smaller_name}"
        )));
    }
    Ok(())
}
