//! Built-in Tools
//!
//! `what_time` and `calculate`, registered on demand with
//! [`register_builtins`].

use anyhow::{anyhow, bail};
use chrono::Utc;
use chrono_tz::Tz;
use serde_json::Value;

use crate::error::Result;
use crate::schema::{ArgumentSchema, ParameterSchema};
use crate::tool::{ToolRegistry, sync_handler};
use crate::validate::ValidatedArgs;

/// Register every built-in tool on `registry`
///
/// # Errors
///
/// Returns `DuplicateTool` if one of the names is already taken.
pub fn register_builtins(registry: &ToolRegistry) -> Result<()> {
    register_what_time(registry)?;
    register_calculate(registry)
}

/// Register `what_time`
///
/// # Errors
///
/// Returns `DuplicateTool` if the name is already taken.
pub fn register_what_time(registry: &ToolRegistry) -> Result<()> {
    let schema = ArgumentSchema::builder()
        .param(
            ParameterSchema::string("tz")
                .describe("IANA time zone, e.g. 'Asia/Tokyo'. Defaults to UTC.")
                .optional(),
        )
        .param(
            ParameterSchema::string("format")
                .describe("Output format")
                .with_default("iso")
                .one_of(["iso", "human", "unix"]),
        )
        .build()?;

    registry.register(
        "what_time",
        "Get the current date and time",
        schema,
        sync_handler(what_time),
    )
}

fn what_time(args: ValidatedArgs) -> anyhow::Result<Value> {
    let zone = args.str("tz").unwrap_or("UTC");
    let tz: Tz = zone
        .parse()
        .map_err(|_| anyhow!("unknown time zone `{zone}`"))?;
    let now = Utc::now().with_timezone(&tz);

    let output = match args.str("format").unwrap_or("iso") {
        "unix" => now.timestamp().to_string(),
        "human" => now.format("%A, %B %d, %Y at %H:%M:%S %Z").to_string(),
        _ => now.to_rfc3339(),
    };
    Ok(Value::String(output))
}

/// Register `calculate`
///
/// # Errors
///
/// Returns `DuplicateTool` if the name is already taken.
pub fn register_calculate(registry: &ToolRegistry) -> Result<()> {
    let schema = ArgumentSchema::builder()
        .param(
            ParameterSchema::string("expression")
                .describe("Arithmetic expression, e.g. '(2 + 3) * 4'"),
        )
        .build()?;

    registry.register(
        "calculate",
        "Evaluate an arithmetic expression",
        schema,
        sync_handler(|args| {
            let expr = args.str("expression").unwrap_or_default();
            let value = evaluate(expr)?;
            Ok(Value::String(format!("{expr} = {}", format_number(value))))
        }),
    )
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

/// Longest expression `calculate` accepts, in characters
pub const MAX_EXPRESSION_LEN: usize = 1024;

/// Deepest nesting of parentheses, signs and `^` chains
pub const MAX_NESTING: usize = 64;

/// Evaluate `+ - * / % ^` with parentheses and unary minus.
///
/// `^` binds tightest and is right-associative. Input longer than
/// [`MAX_EXPRESSION_LEN`] or nested deeper than [`MAX_NESTING`] is an error.
pub fn evaluate(expr: &str) -> anyhow::Result<f64> {
    if expr.chars().count() > MAX_EXPRESSION_LEN {
        bail!("expression longer than {MAX_EXPRESSION_LEN} characters");
    }
    let mut parser = Parser {
        chars: expr.chars().filter(|c| !c.is_whitespace()).collect(),
        pos: 0,
        depth: 0,
    };
    if parser.chars.is_empty() {
        bail!("empty expression");
    }
    let value = parser.expr()?;
    if let Some(c) = parser.peek() {
        bail!("unexpected `{c}` at position {}", parser.pos);
    }
    if !value.is_finite() {
        bail!("result is not a finite number");
    }
    Ok(value)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Run `f` one nesting level deeper
    fn nested<F>(&mut self, f: F) -> anyhow::Result<f64>
    where
        F: FnOnce(&mut Self) -> anyhow::Result<f64>,
    {
        if self.depth >= MAX_NESTING {
            bail!("expression nested too deeply");
        }
        self.depth += 1;
        let value = f(self);
        self.depth -= 1;
        value
    }

    fn expr(&mut self) -> anyhow::Result<f64> {
        let mut value = self.term()?;
        loop {
            if self.eat('+') {
                value += self.term()?;
            } else if self.eat('-') {
                value -= self.term()?;
            } else {
                return Ok(value);
            }
        }
    }

    fn term(&mut self) -> anyhow::Result<f64> {
        let mut value = self.power()?;
        loop {
            let op = match self.peek() {
                Some(op @ ('*' | '/' | '%')) => op,
                _ => return Ok(value),
            };
            self.pos += 1;
            let rhs = self.power()?;
            if op != '*' && rhs == 0.0 {
                bail!("division by zero");
            }
            value = match op {
                '*' => value * rhs,
                '/' => value / rhs,
                _ => value % rhs,
            };
        }
    }

    fn power(&mut self) -> anyhow::Result<f64> {
        let base = self.unary()?;
        if self.eat('^') {
            let exponent = self.nested(Self::power)?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn unary(&mut self) -> anyhow::Result<f64> {
        if self.eat('-') {
            return Ok(-self.nested(Self::unary)?);
        }
        if self.eat('+') {
            return self.nested(Self::unary);
        }
        self.primary()
    }

    fn primary(&mut self) -> anyhow::Result<f64> {
        if self.eat('(') {
            let value = self.nested(Self::expr)?;
            if !self.eat(')') {
                bail!("missing `)`");
            }
            return Ok(value);
        }

        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || c == '.')
        {
            self.pos += 1;
        }
        if start == self.pos {
            return match self.peek() {
                Some(c) => Err(anyhow!("unexpected `{c}` at position {start}")),
                None => Err(anyhow!("expression ends early")),
            };
        }

        let literal: String = self.chars[start..self.pos].iter().collect();
        literal
            .parse()
            .map_err(|_| anyhow!("bad number `{literal}`"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{Dispatcher, FailureKind};
    use crate::message::ToolCallRequest;

    #[test]
    fn test_evaluate() {
        assert!((evaluate("2 + 2").unwrap() - 4.0).abs() < f64::EPSILON);
        assert!((evaluate("10 * 5").unwrap() - 50.0).abs() < f64::EPSILON);
        assert!((evaluate("(2 + 3) * 4").unwrap() - 20.0).abs() < f64::EPSILON);
        assert!((evaluate("2 + 3 * 4").unwrap() - 14.0).abs() < f64::EPSILON);
        assert!((evaluate("10 - 4 - 3").unwrap() - 3.0).abs() < f64::EPSILON);
        assert!((evaluate("2 ^ 3 ^ 2").unwrap() - 512.0).abs() < f64::EPSILON);
        assert!((evaluate("-3 + 5").unwrap() - 2.0).abs() < f64::EPSILON);
        assert!((evaluate("7 % 4").unwrap() - 3.0).abs() < f64::EPSILON);
        assert!((evaluate("1.5 * 2").unwrap() - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_evaluate_errors() {
        assert!(evaluate("1 / 0").is_err());
        assert!(evaluate("").is_err());
        assert!(evaluate("(1 + 2").is_err());
        assert!(evaluate("2 +").is_err());
        assert!(evaluate("2 $ 3").is_err());
        assert!(evaluate("1.2.3").is_err());
    }

    #[test]
    fn test_nesting_and_length_limits() {
        let shallow = format!("{}1{}", "(".repeat(MAX_NESTING - 1), ")".repeat(MAX_NESTING - 1));
        assert!((evaluate(&shallow).unwrap() - 1.0).abs() < f64::EPSILON);
        assert!((evaluate("--3").unwrap() - 3.0).abs() < f64::EPSILON);

        let deep = format!("{}1{}", "(".repeat(MAX_NESTING + 1), ")".repeat(MAX_NESTING + 1));
        assert!(evaluate(&deep).unwrap_err().to_string().contains("nested too deeply"));

        let signs = format!("{}1", "-".repeat(MAX_NESTING + 1));
        assert!(evaluate(&signs).is_err());

        let long = vec!["1"; MAX_EXPRESSION_LEN].join("+");
        assert!(evaluate(&long).unwrap_err().to_string().contains("longer than"));
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(4.0), "4");
        assert_eq!(format_number(2.5), "2.5");
    }

    #[tokio::test]
    async fn test_builtins_through_dispatcher() {
        let registry = ToolRegistry::new();
        register_builtins(&registry).unwrap();
        assert_eq!(registry.names(), vec!["what_time", "calculate"]);
        let dispatcher = Dispatcher::new();

        let sum = dispatcher
            .execute(&registry, &ToolCallRequest::new("calculate", r#"{"expression": "2 + 2"}"#))
            .await;
        assert_eq!(sum.to_content(), "2 + 2 = 4");

        let now = dispatcher
            .execute(&registry, &ToolCallRequest::new("what_time", r#"{"tz": "Asia/Tokyo"}"#))
            .await;
        let text = now.to_content();
        assert!(chrono::DateTime::parse_from_rfc3339(&text).is_ok());
        assert!(text.ends_with("+09:00"));

        let unix = dispatcher
            .execute(&registry, &ToolCallRequest::new("what_time", r#"{"format": "unix"}"#))
            .await;
        assert!(unix.to_content().parse::<i64>().is_ok());
    }

    #[tokio::test]
    async fn test_unknown_zone_is_tool_error() {
        let registry = ToolRegistry::new();
        register_what_time(&registry).unwrap();

        let result = Dispatcher::new()
            .execute(&registry, &ToolCallRequest::new("what_time", r#"{"tz": "Mars/Olympus"}"#))
            .await;
        let failure = result.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::ToolExecution);
        assert!(failure.message.contains("Mars/Olympus"));
    }

    #[tokio::test]
    async fn test_runaway_expression_is_tool_error() {
        let registry = ToolRegistry::new();
        register_calculate(&registry).unwrap();
        let dispatcher = Dispatcher::new();

        for expr in [
            format!("{}1{}", "(".repeat(200_000), ")".repeat(200_000)),
            format!("{}1", "-".repeat(200_000)),
            format!("{}1", "(".repeat(500)),
        ] {
            let payload = serde_json::json!({ "expression": expr }).to_string();
            let result = dispatcher
                .execute(&registry, &ToolCallRequest::new("calculate", payload))
                .await;
            assert_eq!(result.failure().unwrap().kind, FailureKind::ToolExecution);
        }
    }

    #[tokio::test]
    async fn test_bad_format_is_schema_violation() {
        let registry = ToolRegistry::new();
        register_what_time(&registry).unwrap();

        let result = Dispatcher::new()
            .execute(&registry, &ToolCallRequest::new("what_time", r#"{"format": "roman"}"#))
            .await;
        assert_eq!(result.failure().unwrap().kind, FailureKind::SchemaViolation);
    }
}
