//! Argument Validation
//!
//! Turns the raw argument text a model emits into [`ValidatedArgs`] for one
//! tool. Parsing and checking are separate steps: [`ParsedPayload`] records
//! whether the text was structured data at all, [`validate`] then checks it
//! field by field against the tool's [`ArgumentSchema`].
//!
//! Nothing is coerced: `"5"` is not an integer and neither is `5.0`. The
//! only widening is integer → number.

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{ChatError, Result};
use crate::schema::{ArgumentSchema, ParamType, ParameterSchema, UnknownFieldPolicy, value_kind};

/// Outcome of parsing a raw argument payload
#[derive(Clone, Debug, PartialEq)]
pub enum ParsedPayload {
    /// A JSON object
    Parsed(Map<String, Value>),
    /// Anything else, with the reason
    Malformed(String),
}

impl ParsedPayload {
    /// Parse raw payload text. Blank text counts as an empty object.
    pub fn parse(raw: &str) -> Self {
        if raw.trim().is_empty() {
            return Self::Parsed(Map::new());
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Self::Parsed(map),
            Ok(other) => Self::Malformed(format!(
                "expected a JSON object, got {}",
                value_kind(&other)
            )),
            Err(e) => Self::Malformed(e.to_string()),
        }
    }
}

/// A resolved argument
#[derive(Clone, Debug, PartialEq)]
pub enum ArgValue {
    /// Supplied by the model, or filled from the declared default
    Value(Value),
    /// Explicit `null` for an optional parameter
    Null,
    /// Optional parameter the model left out and that has no default
    Absent,
}

/// Arguments that passed validation, in declaration order
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValidatedArgs {
    values: IndexMap<String, ArgValue>,
}

impl ValidatedArgs {
    /// Resolved argument for `name`; `None` if the schema doesn't declare it
    pub fn arg(&self, name: &str) -> Option<&ArgValue> {
        self.values.get(name)
    }

    /// Concrete value for `name`, if one was supplied or defaulted
    pub fn get(&self, name: &str) -> Option<&Value> {
        match self.values.get(name)? {
            ArgValue::Value(v) => Some(v),
            ArgValue::Null | ArgValue::Absent => None,
        }
    }

    pub fn is_absent(&self, name: &str) -> bool {
        matches!(self.values.get(name), Some(ArgValue::Absent) | None)
    }

    pub fn is_null(&self, name: &str) -> bool {
        matches!(self.values.get(name), Some(ArgValue::Null))
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }

    pub fn f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::as_f64)
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    /// Parameter names in declaration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Present arguments as a JSON object (absent ones omitted)
    pub fn to_value(&self) -> Value {
        let map: Map<String, Value> = self
            .values
            .iter()
            .filter_map(|(k, v)| match v {
                ArgValue::Value(v) => Some((k.clone(), v.clone())),
                ArgValue::Null => Some((k.clone(), Value::Null)),
                ArgValue::Absent => None,
            })
            .collect();
        Value::Object(map)
    }

    /// Deserialize into a typed argument struct
    ///
    /// # Errors
    ///
    /// Returns `Json` if the struct doesn't line up with the arguments.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.to_value())?)
    }
}

impl Serialize for ValidatedArgs {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

fn check_type(param: &ParameterSchema, value: &Value) -> Result<()> {
    if let ParamType::Array(Some(items)) = &param.param_type {
        let Some(values) = value.as_array() else {
            return Err(ChatError::violation(
                &param.name,
                param.expected(),
                format!("got {}", value_kind(value)),
            ));
        };
        if let Some((idx, bad)) = values.iter().enumerate().find(|(_, v)| !items.matches(v)) {
            return Err(ChatError::violation(
                format!("{}[{idx}]", param.name),
                items.to_string(),
                format!("got {}", value_kind(bad)),
            ));
        }
        return Ok(());
    }

    if !param.param_type.matches(value) {
        return Err(ChatError::violation(
            &param.name,
            param.expected(),
            format!("got {}", value_kind(value)),
        ));
    }
    Ok(())
}

fn resolve(param: &ParameterSchema, supplied: Option<Value>) -> Result<ArgValue> {
    match supplied {
        None if param.required => Err(ChatError::violation(
            &param.name,
            param.expected(),
            "missing required field",
        )),
        None => Ok(param
            .default
            .clone()
            .map_or(ArgValue::Absent, ArgValue::Value)),
        Some(Value::Null) if param.required => Err(ChatError::violation(
            &param.name,
            param.expected(),
            "got null for a required field",
        )),
        Some(Value::Null) => Ok(ArgValue::Null),
        Some(value) => {
            check_type(param, &value)?;
            if !param.allows(&value) {
                return Err(ChatError::violation(
                    &param.name,
                    param.expected(),
                    format!("got {value}"),
                ));
            }
            Ok(ArgValue::Value(value))
        }
    }
}

/// Check an already-parsed payload against `schema`.
///
/// # Errors
///
/// `MalformedPayload` for a [`ParsedPayload::Malformed`] input, otherwise
/// `SchemaViolation` for the first field that doesn't fit.
pub fn validate_parsed(schema: &ArgumentSchema, payload: ParsedPayload) -> Result<ValidatedArgs> {
    let mut fields = match payload {
        ParsedPayload::Parsed(map) => map,
        ParsedPayload::Malformed(reason) => return Err(ChatError::MalformedPayload(reason)),
    };

    let mut values = IndexMap::with_capacity(schema.parameters().len());
    for param in schema.parameters() {
        let resolved = resolve(param, fields.remove(&param.name))?;
        values.insert(param.name.clone(), resolved);
    }

    if schema.unknown_fields() == UnknownFieldPolicy::Reject {
        // Report the lexically smallest name so the error doesn't depend on map order.
        if let Some(extra) = fields.keys().min() {
            return Err(ChatError::violation(
                extra,
                "no such parameter",
                "field is not declared by the tool",
            ));
        }
    } else if !fields.is_empty() {
        let ignored: Vec<&String> = fields.keys().collect();
        tracing::debug!(?ignored, "Ignoring undeclared arguments");
    }

    Ok(ValidatedArgs { values })
}

/// Parse `raw` and check it against `schema`.
///
/// # Errors
///
/// See [`validate_parsed`].
pub fn validate(schema: &ArgumentSchema, raw: &str) -> Result<ValidatedArgs> {
    validate_parsed(schema, ParsedPayload::parse(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn time_schema() -> ArgumentSchema {
        ArgumentSchema::builder()
            .param(ParameterSchema::string("tz").optional())
            .param(ParameterSchema::string("format").with_default("iso").one_of(["iso", "unix"]))
            .build()
            .unwrap()
    }

    fn field_of(err: ChatError) -> String {
        match err {
            ChatError::SchemaViolation { field, .. } => field,
            other => panic!("expected schema violation, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_outcomes() {
        assert_eq!(ParsedPayload::parse("  "), ParsedPayload::Parsed(Map::new()));
        assert!(matches!(ParsedPayload::parse("{\"tz\": \"UTC\"}"), ParsedPayload::Parsed(_)));
        assert!(matches!(ParsedPayload::parse("{tz: UTC"), ParsedPayload::Malformed(_)));
        assert!(matches!(ParsedPayload::parse("[1, 2]"), ParsedPayload::Malformed(_)));
    }

    #[test]
    fn test_malformed_payload() {
        let err = validate(&time_schema(), "{\"tz\": ").unwrap_err();
        assert!(matches!(err, ChatError::MalformedPayload(_)));
    }

    #[test]
    fn test_empty_payload_uses_defaults_and_absent() {
        let args = validate(&time_schema(), "{}").unwrap();
        assert!(args.is_absent("tz"));
        assert!(!args.is_null("tz"));
        assert_eq!(args.str("format"), Some("iso"));
    }

    #[test]
    fn test_explicit_null_is_distinct_from_absent() {
        let args = validate(&time_schema(), r#"{"tz": null}"#).unwrap();
        assert!(args.is_null("tz"));
        assert!(!args.is_absent("tz"));
        assert_eq!(args.get("tz"), None);
    }

    #[test]
    fn test_missing_required_field_names_field() {
        let schema = ArgumentSchema::builder()
            .param(ParameterSchema::string("expression"))
            .build()
            .unwrap();
        let err = validate(&schema, "{}").unwrap_err();
        assert_eq!(field_of(err), "expression");
    }

    #[test]
    fn test_numeric_string_is_not_coerced() {
        let schema = ArgumentSchema::builder()
            .param(ParameterSchema::integer("count"))
            .build()
            .unwrap();

        let err = validate(&schema, r#"{"count": "5"}"#).unwrap_err();
        match err {
            ChatError::SchemaViolation { field, expected, problem } => {
                assert_eq!(field, "count");
                assert_eq!(expected, "integer");
                assert_eq!(problem, "got string");
            }
            other => panic!("unexpected {other:?}"),
        }

        assert!(validate(&schema, r#"{"count": 5.0}"#).is_err());
        let err = validate(&schema, r#"{"count": 18446744073709551615}"#).unwrap_err();
        assert!(matches!(
            err,
            ChatError::SchemaViolation { ref problem, .. } if problem == "got integer out of range"
        ));
        assert_eq!(validate(&schema, r#"{"count": 5}"#).unwrap().i64("count"), Some(5));
    }

    #[test]
    fn test_enumeration_enforced() {
        let err = validate(&time_schema(), r#"{"format": "rfc2822"}"#).unwrap_err();
        assert_eq!(field_of(err), "format");
    }

    #[test]
    fn test_array_item_violation_is_indexed() {
        let schema = ArgumentSchema::builder()
            .param(ParameterSchema::array("tags", ParamType::String))
            .build()
            .unwrap();
        let err = validate(&schema, r#"{"tags": ["a", "b", 3]}"#).unwrap_err();
        assert_eq!(field_of(err), "tags[2]");
    }

    #[test]
    fn test_unknown_fields_rejected_by_default() {
        let err = validate(&time_schema(), r#"{"tz": "UTC", "locale": "en"}"#).unwrap_err();
        assert_eq!(field_of(err), "locale");
    }

    #[test]
    fn test_unknown_field_report_is_stable() {
        let err = validate(&time_schema(), r#"{"zone": "UTC", "locale": "en", "mode": 1}"#)
            .unwrap_err();
        assert_eq!(field_of(err), "locale");
    }

    #[test]
    fn test_unknown_fields_ignored_when_declared() {
        let schema = ArgumentSchema::builder()
            .param(ParameterSchema::string("tz").optional())
            .unknown_fields(UnknownFieldPolicy::Ignore)
            .build()
            .unwrap();
        let args = validate(&schema, r#"{"tz": "UTC", "locale": "en"}"#).unwrap();
        assert_eq!(args.str("tz"), Some("UTC"));
        assert_eq!(args.names().collect::<Vec<_>>(), vec!["tz"]);
        assert_eq!(args.to_value(), json!({"tz": "UTC"}));
    }

    #[test]
    fn test_deserialize_into_struct() {
        #[derive(Deserialize)]
        struct TimeArgs {
            tz: Option<String>,
            format: String,
        }

        let args = validate(&time_schema(), r#"{"tz": "Asia/Tokyo"}"#).unwrap();
        let typed: TimeArgs = args.deserialize().unwrap();
        assert_eq!(typed.tz.as_deref(), Some("Asia/Tokyo"));
        assert_eq!(typed.format, "iso");
    }
}
