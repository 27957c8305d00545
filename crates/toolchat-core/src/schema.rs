//! Argument Schemas
//!
//! Describes the arguments a tool accepts. Schemas are assembled once with
//! [`ArgumentSchemaBuilder`], checked for internal consistency, and never
//! change after that.
//!
//! ```rust,ignore
//! let schema = ArgumentSchema::builder()
//!     .param(ParameterSchema::string("tz").optional().describe("IANA timezone"))
//!     .build()?;
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{ChatError, Result};

/// Primitive type of a parameter
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    /// Array, optionally constraining its items
    Array(Option<Box<ParamType>>),
    Object,
}

impl ParamType {
    /// JSON Schema type keyword
    pub const fn keyword(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array(_) => "array",
            Self::Object => "object",
        }
    }

    /// Exact-type check. The only widening allowed is integer → number.
    /// Integers must fit in an `i64`.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array(items) => match (value.as_array(), items) {
                (Some(values), Some(item_type)) => values.iter().all(|v| item_type.matches(v)),
                (Some(_), None) => true,
                (None, _) => false,
            },
        }
    }

    fn to_json_schema(&self) -> Value {
        match self {
            Self::Array(Some(items)) => json!({ "type": "array", "items": items.to_json_schema() }),
            other => json!({ "type": other.keyword() }),
        }
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Array(Some(items)) => write!(f, "array of {items}"),
            other => f.write_str(other.keyword()),
        }
    }
}

/// Short name of a JSON value's type, for error messages
pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(n) if !n.is_i64() => "integer out of range",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Parameter definition
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Parameter name
    pub name: String,

    /// Declared type
    #[serde(rename = "type")]
    pub param_type: ParamType,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Whether this parameter is required
    #[serde(default)]
    pub required: bool,

    /// Default value if not provided
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Enum of allowed values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
}

impl ParameterSchema {
    /// Required parameter of the given type
    pub fn new(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: String::new(),
            required: true,
            default: None,
            enum_values: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::String)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Integer)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Number)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Boolean)
    }

    pub fn object(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Object)
    }

    /// Array whose items must all be `items`
    pub fn array(name: impl Into<String>, items: ParamType) -> Self {
        Self::new(name, ParamType::Array(Some(Box::new(items))))
    }

    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub const fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Default used when the argument is absent; implies optional
    #[must_use]
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.required = false;
        self.default = Some(default.into());
        self
    }

    #[must_use]
    pub fn one_of<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.enum_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Human-readable description of what is accepted
    pub fn expected(&self) -> String {
        match &self.enum_values {
            Some(values) => {
                let allowed: Vec<String> = values.iter().map(Value::to_string).collect();
                format!("{} (one of {})", self.param_type, allowed.join(", "))
            }
            None => self.param_type.to_string(),
        }
    }

    pub(crate) fn allows(&self, value: &Value) -> bool {
        self.enum_values
            .as_ref()
            .is_none_or(|values| values.contains(value))
    }

    fn to_json_schema(&self) -> Value {
        let mut schema = self.param_type.to_json_schema();
        if let Some(obj) = schema.as_object_mut() {
            if !self.description.is_empty() {
                obj.insert("description".into(), json!(self.description));
            }
            if let Some(values) = &self.enum_values {
                obj.insert("enum".into(), Value::Array(values.clone()));
            }
            if let Some(default) = &self.default {
                obj.insert("default".into(), default.clone());
            }
        }
        schema
    }

    fn check(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ChatError::InvalidSchema("parameter name is empty".into()));
        }
        if let Some(values) = &self.enum_values {
            if values.is_empty() {
                return Err(ChatError::InvalidSchema(format!(
                    "`{}` declares an empty enumeration",
                    self.name
                )));
            }
            if let Some(bad) = values.iter().find(|v| !self.param_type.matches(v)) {
                return Err(ChatError::InvalidSchema(format!(
                    "`{}` enumeration value {bad} is not {}",
                    self.name, self.param_type
                )));
            }
        }
        if let Some(default) = &self.default {
            if !self.param_type.matches(default) {
                return Err(ChatError::InvalidSchema(format!(
                    "`{}` default {default} is not {}",
                    self.name, self.param_type
                )));
            }
            if !self.allows(default) {
                return Err(ChatError::InvalidSchema(format!(
                    "`{}` default {default} is outside its enumeration",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// What to do with payload fields the schema doesn't declare
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownFieldPolicy {
    /// Fail validation, naming the field
    #[default]
    Reject,
    /// Drop the field silently
    Ignore,
}

/// Complete argument schema for one tool
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ArgumentSchema {
    parameters: Vec<ParameterSchema>,
    unknown_fields: UnknownFieldPolicy,
}

impl ArgumentSchema {
    pub fn builder() -> ArgumentSchemaBuilder {
        ArgumentSchemaBuilder::default()
    }

    /// Schema for a tool that takes no arguments
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parameters in declaration order
    pub fn parameters(&self) -> &[ParameterSchema] {
        &self.parameters
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterSchema> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub const fn unknown_fields(&self) -> UnknownFieldPolicy {
        self.unknown_fields
    }

    /// JSON Schema object advertised to the model
    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .parameters
            .iter()
            .map(|p| (p.name.clone(), p.to_json_schema()))
            .collect();
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": self.unknown_fields == UnknownFieldPolicy::Ignore,
        })
    }
}

/// Builder for [`ArgumentSchema`]
#[derive(Debug, Default)]
pub struct ArgumentSchemaBuilder {
    parameters: Vec<ParameterSchema>,
    unknown_fields: UnknownFieldPolicy,
}

impl ArgumentSchemaBuilder {
    #[must_use]
    pub fn param(mut self, parameter: ParameterSchema) -> Self {
        self.parameters.push(parameter);
        self
    }

    #[must_use]
    pub const fn unknown_fields(mut self, policy: UnknownFieldPolicy) -> Self {
        self.unknown_fields = policy;
        self
    }

    /// Check the parameters and freeze the schema.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSchema` for duplicate names, defaults of the wrong type
    /// or outside the enumeration, and enumeration values of the wrong type.
    pub fn build(self) -> Result<ArgumentSchema> {
        let mut seen = HashSet::new();
        for parameter in &self.parameters {
            if !seen.insert(parameter.name.as_str()) {
                return Err(ChatError::InvalidSchema(format!(
                    "parameter `{}` declared twice",
                    parameter.name
                )));
            }
            parameter.check()?;
        }

        Ok(ArgumentSchema {
            parameters: self.parameters,
            unknown_fields: self.unknown_fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_and_render() {
        let schema = ArgumentSchema::builder()
            .param(ParameterSchema::string("tz").optional().describe("IANA timezone"))
            .param(ParameterSchema::string("format").with_default("iso").one_of(["iso", "unix"]))
            .param(ParameterSchema::integer("count"))
            .build()
            .unwrap();

        let rendered = schema.to_json_schema();
        assert_eq!(rendered["type"], "object");
        assert_eq!(rendered["properties"]["tz"]["description"], "IANA timezone");
        assert_eq!(rendered["properties"]["format"]["enum"], json!(["iso", "unix"]));
        assert_eq!(rendered["required"], json!(["count"]));
        assert_eq!(rendered["additionalProperties"], json!(false));
    }

    #[test]
    fn test_duplicate_parameter_rejected() {
        let result = ArgumentSchema::builder()
            .param(ParameterSchema::string("tz"))
            .param(ParameterSchema::integer("tz"))
            .build();
        assert!(matches!(result, Err(ChatError::InvalidSchema(_))));
    }

    #[test]
    fn test_default_must_match_type_and_enum() {
        let wrong_type = ArgumentSchema::builder()
            .param(ParameterSchema::integer("n").with_default("five"))
            .build();
        assert!(wrong_type.is_err());

        let outside_enum = ArgumentSchema::builder()
            .param(ParameterSchema::string("unit").with_default("kelvin").one_of(["c", "f"]))
            .build();
        assert!(outside_enum.is_err());
    }

    #[test]
    fn test_integer_is_a_number_but_not_the_reverse() {
        assert!(ParamType::Number.matches(&json!(3)));
        assert!(!ParamType::Integer.matches(&json!(3.5)));
        assert!(!ParamType::Number.matches(&json!("3")));
    }

    #[test]
    fn test_integer_must_fit_i64() {
        assert!(ParamType::Integer.matches(&json!(i64::MAX)));
        assert!(ParamType::Integer.matches(&json!(i64::MIN)));
        assert!(!ParamType::Integer.matches(&json!(u64::MAX)));
        assert!(ParamType::Number.matches(&json!(u64::MAX)));
        assert_eq!(value_kind(&json!(u64::MAX)), "integer out of range");
    }

    #[test]
    fn test_array_item_types() {
        let tags = ParamType::Array(Some(Box::new(ParamType::String)));
        assert!(tags.matches(&json!(["a", "b"])));
        assert!(!tags.matches(&json!(["a", 1])));
        assert_eq!(tags.to_string(), "array of string");
    }
}
