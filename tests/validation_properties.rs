//! Property tests for the validation boundaries that guard the logging
//! pipeline.

use proptest::prelude::*;
use resilog::logger::entry::{validate_context, validate_message, ContextValue, LogContext};
use resilog::LogLevel;

fn nested(levels: usize) -> ContextValue {
    let mut value = ContextValue::Map(LogContext::new());
    for _ in 1..levels {
        let mut map = LogContext::new();
        map.insert("inner".to_string(), value);
        value = ContextValue::Map(map);
    }
    value
}

proptest! {
    #[test]
    fn context_depth_boundary_is_exact(levels in 1usize..=20) {
        let mut context = LogContext::new();
        context.insert("root".to_string(), nested(levels));
        let result = validate_context(&context);
        prop_assert_eq!(result.is_ok(), levels <= 10);
    }

    #[test]
    fn message_length_boundary_is_exact(len in 9_990usize..=10_010) {
        let message = "m".repeat(len);
        prop_assert_eq!(validate_message(&message).is_ok(), len <= 10_000);
    }

    #[test]
    fn flat_contexts_of_any_width_validate(width in 0usize..50) {
        let mut context = LogContext::new();
        for i in 0..width {
            context.insert(format!("key_{i}"), ContextValue::from(i as i64));
        }
        prop_assert!(validate_context(&context).is_ok());
    }

    #[test]
    fn only_known_level_names_parse(name in "[A-Z]{1,8}") {
        let parsed = name.parse::<LogLevel>();
        let known = matches!(name.as_str(), "DEBUG" | "INFO" | "WARN" | "ERROR" | "FATAL");
        prop_assert_eq!(parsed.is_ok(), known);
    }
}
