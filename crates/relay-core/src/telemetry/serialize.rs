//! Size-capped, never-failing snapshots of log arguments.
//!
//! Whatever the host passes to a log call, turning it into a snapshot must not
//! fail, panic, or hold an unbounded amount of memory.

use serde::Serialize;
use serde_json::{json, Value};

/// Arguments kept per log entry.
pub const MAX_SNAPSHOT_ARGS: usize = 5;

/// Character budget for one structured argument.
pub const SERIALIZE_BUDGET_CHARS: usize = 5000;

/// Stored in place of a value that could not be serialized.
pub const UNSERIALIZABLE_MARKER: &str = "[Unserializable]";

/// Prefix of the marker appended to over-budget values.
pub const TRUNCATED_MARKER: &str = "[Truncated";

/// One argument of a captured log call, already reduced to a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum CapturedArg {
    /// A primitive or structured value.
    Value(Value),
    /// An error reduced to name, message and its `source()` chain.
    Error {
        name: String,
        message: String,
        stack: Option<String>,
    },
    /// A host UI event reduced to its type and target kind.
    Event {
        event_type: String,
        target: Option<String>,
    },
}

impl CapturedArg {
    /// Snapshot any serializable value within the character budget.
    ///
    /// Numbers, booleans and null pass through unchanged; strings are held to
    /// the same budget as structured values. Structured values that fail to
    /// serialize become [`UNSERIALIZABLE_MARKER`]; values over budget become a
    /// string prefix followed by a `[Truncated: N chars]` marker.
    pub fn value<T: Serialize + ?Sized>(value: &T) -> Self {
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(_) => return CapturedArg::Value(Value::String(UNSERIALIZABLE_MARKER.into())),
        };

        if let Value::String(text) = value {
            return CapturedArg::text(text);
        }
        if is_primitive(&value) {
            return CapturedArg::Value(value);
        }

        let encoded = match serde_json::to_string(&value) {
            Ok(encoded) => encoded,
            Err(_) => return CapturedArg::Value(Value::String(UNSERIALIZABLE_MARKER.into())),
        };

        match truncate(&encoded) {
            Some(truncated) => CapturedArg::Value(Value::String(truncated)),
            None => CapturedArg::Value(value),
        }
    }

    /// Plain text argument, truncated like any other over-budget value.
    pub fn text(text: impl Into<String>) -> Self {
        CapturedArg::Value(Value::String(cap_text(text.into())))
    }

    /// Snapshot an error as `{name, message, stack}`.
    ///
    /// `name` is the error's type name; `stack` lists the `source()` chain.
    pub fn error<E: std::error::Error + ?Sized>(err: &E) -> Self {
        let mut causes = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            causes.push(format!("caused by: {cause}"));
            if causes.len() >= 16 {
                break;
            }
            source = cause.source();
        }

        CapturedArg::Error {
            name: short_type_name(std::any::type_name::<E>()),
            message: err.to_string(),
            stack: (!causes.is_empty()).then(|| causes.join("\n")),
        }
    }

    /// Snapshot a host UI event as `{type, targetConstructorName}`.
    pub fn event(event_type: impl Into<String>, target: Option<&str>) -> Self {
        CapturedArg::Event {
            event_type: event_type.into(),
            target: target.map(str::to_string),
        }
    }

    /// The JSON stored in [`LogEntry::args_snapshot`](super::LogEntry).
    pub fn into_snapshot(self) -> Value {
        match self {
            CapturedArg::Value(value) => value,
            CapturedArg::Error {
                name,
                message,
                stack,
            } => json!({ "name": name, "message": message, "stack": stack }),
            CapturedArg::Event { event_type, target } => {
                json!({ "type": event_type, "targetConstructorName": target })
            }
        }
    }

    /// Human-readable form, used to build the entry message.
    pub fn display(&self) -> String {
        match self {
            CapturedArg::Value(Value::String(s)) => s.clone(),
            CapturedArg::Value(value) => value.to_string(),
            CapturedArg::Error { name, message, .. } => format!("{name}: {message}"),
            CapturedArg::Event { event_type, .. } => format!("[event {event_type}]"),
        }
    }
}

/// Hold `text` to [`SERIALIZE_BUDGET_CHARS`], marking what was cut.
pub fn cap_text(text: String) -> String {
    truncate(&text).unwrap_or(text)
}

/// Keep at most [`MAX_SNAPSHOT_ARGS`] arguments and reduce them to JSON.
pub fn snapshot_args(args: impl IntoIterator<Item = CapturedArg>) -> Vec<Value> {
    args.into_iter()
        .take(MAX_SNAPSHOT_ARGS)
        .map(CapturedArg::into_snapshot)
        .collect()
}

/// `None` when `text` fits the budget, else its prefix plus the marker.
fn truncate(text: &str) -> Option<String> {
    let total_chars = text.chars().count();
    if total_chars <= SERIALIZE_BUDGET_CHARS {
        return None;
    }
    let prefix: String = text.chars().take(SERIALIZE_BUDGET_CHARS).collect();
    Some(format!("{prefix}...{TRUNCATED_MARKER}: {total_chars} chars]"))
}

fn is_primitive(value: &Value) -> bool {
    matches!(
        value,
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_)
    )
}

/// `my_crate::net::FetchError` -> `FetchError`; trait objects become `Error`.
fn short_type_name(full: &str) -> String {
    if full.starts_with("dyn ") {
        return "Error".to_string();
    }
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fmt;

    #[derive(Debug)]
    struct OuterError(InnerError);

    #[derive(Debug)]
    struct InnerError;

    impl fmt::Display for OuterError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "checkout failed")
        }
    }

    impl fmt::Display for InnerError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "card declined")
        }
    }

    impl std::error::Error for InnerError {}

    impl std::error::Error for OuterError {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.0)
        }
    }

    struct Exploding;

    impl Serialize for Exploding {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("refuses to serialize"))
        }
    }

    #[test]
    fn test_primitives_pass_through() {
        assert_eq!(CapturedArg::value(&42).into_snapshot(), json!(42));
        assert_eq!(CapturedArg::value("hello").into_snapshot(), json!("hello"));
        assert_eq!(CapturedArg::value(&true).into_snapshot(), json!(true));
        assert_eq!(CapturedArg::value(&()).into_snapshot(), Value::Null);
    }

    #[test]
    fn test_structured_value_within_budget() {
        let mut cart = HashMap::new();
        cart.insert("items", 3);
        assert_eq!(CapturedArg::value(&cart).into_snapshot(), json!({ "items": 3 }));
    }

    #[test]
    fn test_oversized_value_is_truncated() {
        let big: Vec<String> = (0..2000).map(|i| format!("item-{i}")).collect();
        let snapshot = CapturedArg::value(&big).into_snapshot();

        let text = snapshot.as_str().expect("truncated values become strings");
        assert!(text.contains(TRUNCATED_MARKER));
        assert!(text.chars().count() < SERIALIZE_BUDGET_CHARS + 64);
    }

    #[test]
    fn test_long_strings_are_truncated() {
        let line = "x".repeat(SERIALIZE_BUDGET_CHARS * 4);

        for snapshot in [
            CapturedArg::value(line.as_str()).into_snapshot(),
            CapturedArg::text(line.clone()).into_snapshot(),
        ] {
            let text = snapshot.as_str().unwrap();
            assert!(text.ends_with(&format!("{TRUNCATED_MARKER}: 20000 chars]")));
            assert!(text.chars().count() < SERIALIZE_BUDGET_CHARS + 64);
        }

        let short = "x".repeat(SERIALIZE_BUDGET_CHARS);
        assert_eq!(CapturedArg::text(short.clone()).into_snapshot(), json!(short));
    }

    #[test]
    fn test_failing_serialize_uses_marker() {
        assert_eq!(
            CapturedArg::value(&Exploding).into_snapshot(),
            json!(UNSERIALIZABLE_MARKER)
        );

        // Non-string map keys are rejected by serde_json.
        let mut bad_keys = HashMap::new();
        bad_keys.insert(vec![1u8], "value");
        assert_eq!(
            CapturedArg::value(&bad_keys).into_snapshot(),
            json!(UNSERIALIZABLE_MARKER)
        );
    }

    #[test]
    fn test_error_snapshot_has_chain() {
        let err = OuterError(InnerError);
        let snapshot = CapturedArg::error(&err).into_snapshot();

        assert_eq!(snapshot["name"], "OuterError");
        assert_eq!(snapshot["message"], "checkout failed");
        assert_eq!(snapshot["stack"], "caused by: card declined");
    }

    #[test]
    fn test_dyn_error_name() {
        let err: Box<dyn std::error::Error> = Box::new(InnerError);
        let snapshot = CapturedArg::error(err.as_ref()).into_snapshot();
        assert_eq!(snapshot["name"], "Error");
        assert_eq!(snapshot["message"], "card declined");
        assert!(snapshot["stack"].is_null());
    }

    #[test]
    fn test_event_snapshot() {
        let snapshot = CapturedArg::event("click", Some("HTMLButtonElement")).into_snapshot();
        assert_eq!(
            snapshot,
            json!({ "type": "click", "targetConstructorName": "HTMLButtonElement" })
        );
    }

    #[test]
    fn test_snapshot_args_caps_count() {
        let args = (0..9).map(|i| CapturedArg::value(&i));
        let snapshot = snapshot_args(args);
        assert_eq!(snapshot, vec![json!(0), json!(1), json!(2), json!(3), json!(4)]);
    }
}
