//! # Log Entries
//!
//! The formatted record handed to the buffer, plus the closed context
//! value tree. The allowed context value types (string, number, boolean,
//! timestamp, error record, nested map) are encoded in [`ContextValue`]
//! itself, so nulls, arrays and exotic types are unrepresentable rather
//! than checked at runtime. Cyclic contexts cannot be constructed in an
//! owned tree; the depth and size bounds below are still enforced.

use crate::constants::logger::{MAX_CONTEXT_BYTES, MAX_CONTEXT_DEPTH, MAX_MESSAGE_LENGTH};
use crate::errors::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    pub const ALL: [LogLevel; 5] = [
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warn,
        LogLevel::Error,
        LogLevel::Fatal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
        }
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            "FATAL" => Ok(LogLevel::Fatal),
            other => Err(Error::Validation(format!("Invalid log level: {other}"))),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One context value. The closed set of variants is the validation rule
/// for value types.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ContextValue {
    String(String),
    Number(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    /// A captured error, stored by message.
    Error { error: String },
    Map(LogContext),
}

impl ContextValue {
    /// Capture an error value by its display form.
    pub fn from_error(err: &dyn std::error::Error) -> Self {
        ContextValue::Error {
            error: err.to_string(),
        }
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        ContextValue::String(value.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        ContextValue::String(value)
    }
}

impl From<f64> for ContextValue {
    fn from(value: f64) -> Self {
        ContextValue::Number(value)
    }
}

impl From<i64> for ContextValue {
    fn from(value: i64) -> Self {
        ContextValue::Number(value as f64)
    }
}

impl From<u32> for ContextValue {
    fn from(value: u32) -> Self {
        ContextValue::Number(f64::from(value))
    }
}

impl From<bool> for ContextValue {
    fn from(value: bool) -> Self {
        ContextValue::Bool(value)
    }
}

impl From<DateTime<Utc>> for ContextValue {
    fn from(value: DateTime<Utc>) -> Self {
        ContextValue::Timestamp(value)
    }
}

impl From<LogContext> for ContextValue {
    fn from(value: LogContext) -> Self {
        ContextValue::Map(value)
    }
}

/// Structured context attached to a log entry. Insertion order is not
/// semantic; keys serialize sorted.
pub type LogContext = BTreeMap<String, ContextValue>;

/// Validates a message against the length bound.
pub fn validate_message(message: &str) -> Result<()> {
    if message.chars().count() > MAX_MESSAGE_LENGTH {
        return Err(Error::Validation(format!(
            "Message too long (max {MAX_MESSAGE_LENGTH} characters)"
        )));
    }
    Ok(())
}

/// Validates context nesting depth and serialized size.
pub fn validate_context(context: &LogContext) -> Result<()> {
    for value in context.values() {
        validate_value_depth(value, 0)?;
    }

    let serialized = serde_json::to_vec(context)?;
    if serialized.len() > MAX_CONTEXT_BYTES {
        return Err(Error::Validation(
            "Context size exceeds maximum allowed size".to_string(),
        ));
    }
    Ok(())
}

fn validate_value_depth(value: &ContextValue, depth: usize) -> Result<()> {
    if let ContextValue::Map(map) = value {
        if depth + 1 > MAX_CONTEXT_DEPTH {
            return Err(Error::Validation("Context object too deep".to_string()));
        }
        for nested in map.values() {
            validate_value_depth(nested, depth + 1)?;
        }
    }
    Ok(())
}

/// A formatted log entry. Immutable once formatted; owned by the buffer
/// until flushed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub context: LogContext,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    /// Format an entry, stamping it with the current wall-clock time.
    pub fn new(level: LogLevel, message: impl Into<String>, context: LogContext) -> Self {
        Self {
            level,
            message: message.into(),
            context,
            timestamp: Utc::now(),
        }
    }

    /// Serialized byte size used for buffer accounting.
    pub fn serialized_size(&self) -> usize {
        serde_json::to_vec(self).map(|bytes| bytes.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `nested(1)` is a map containing one map; depth grows from there.
    fn nested(levels: usize) -> ContextValue {
        let mut value = ContextValue::Map(LogContext::new());
        for _ in 1..levels {
            let mut map = LogContext::new();
            map.insert("inner".to_string(), value);
            value = ContextValue::Map(map);
        }
        value
    }

    #[test]
    fn parses_the_five_levels_and_rejects_others() {
        for level in LogLevel::ALL {
            assert_eq!(level.as_str().parse::<LogLevel>().unwrap(), level);
        }
        let err = "BOGUS".parse::<LogLevel>().unwrap_err();
        assert_eq!(err.to_string(), "Validation error: Invalid log level: BOGUS");
        // Levels are uppercase on the wire.
        assert!("info".parse::<LogLevel>().is_err());
    }

    #[test]
    fn depth_ten_passes_depth_eleven_fails() {
        let mut ok = LogContext::new();
        ok.insert("root".to_string(), nested(10));
        assert!(validate_context(&ok).is_ok());

        let mut too_deep = LogContext::new();
        too_deep.insert("root".to_string(), nested(11));
        let err = validate_context(&too_deep).unwrap_err();
        assert!(err.to_string().contains("too deep"));
    }

    #[test]
    fn oversized_context_is_rejected() {
        let mut context = LogContext::new();
        context.insert(
            "blob".to_string(),
            ContextValue::String("x".repeat(MAX_CONTEXT_BYTES + 1)),
        );
        let err = validate_context(&context).unwrap_err();
        assert!(err.to_string().contains("Context size"));
    }

    #[test]
    fn message_length_bound() {
        assert!(validate_message(&"m".repeat(MAX_MESSAGE_LENGTH)).is_ok());
        assert!(validate_message(&"m".repeat(MAX_MESSAGE_LENGTH + 1)).is_err());
    }

    #[test]
    fn entry_size_tracks_serialized_form() {
        let mut context = LogContext::new();
        context.insert("user_id".to_string(), ContextValue::from("u-123"));
        let entry = LogEntry::new(LogLevel::Info, "logged in", context);
        let size = entry.serialized_size();
        assert_eq!(size, serde_json::to_vec(&entry).unwrap().len());
        assert!(size > 0);
    }

    #[test]
    fn context_values_serialize_naturally() {
        let mut context = LogContext::new();
        context.insert("count".to_string(), ContextValue::from(3i64));
        context.insert("enabled".to_string(), ContextValue::from(true));
        context.insert("name".to_string(), ContextValue::from("batch"));
        let json = serde_json::to_value(&context).unwrap();
        assert_eq!(json["count"], 3.0);
        assert_eq!(json["enabled"], true);
        assert_eq!(json["name"], "batch");
    }
}
