//! # Requirement Expressions
//!
//! Task templates declare resource requirements as JSON values. Strings may
//! embed expressions that are expanded innermost-first:
//!
//! - `$steering(name)`: a dataset steering parameter
//! - `$(name)`: a steering parameter, or one of `job`, `dataset`, `task`,
//!   `jobs_submitted`
//! - `$eval(expr)`: integer/float arithmetic with `+ - * /` and parentheses
//!
//! A string that expands to a number becomes a number. A `gpu` list is
//! replaced by its length.

use crate::error::{Result, SchedulerError};
use crate::models::Requirements;
use serde_json::{Map, Number, Value};

const RESOURCE_KEYS: &[&str] = &["cpu", "gpu", "memory", "disk"];
const MAX_EXPANSIONS: usize = 64;

/// Values visible to requirement expressions for one task
#[derive(Debug, Clone, Copy)]
pub struct RequirementContext<'a> {
    pub parameters: &'a Map<String, Value>,
    pub job_index: u64,
    pub dataset: u64,
    pub task_name: &'a str,
    pub jobs_submitted: u64,
}

impl RequirementContext<'_> {
    fn steering(&self, name: &str) -> Option<String> {
        self.parameters.get(name).map(value_to_text)
    }

    fn variable(&self, name: &str) -> Option<String> {
        self.steering(name).or_else(|| match name {
            "job" => Some(self.job_index.to_string()),
            "dataset" => Some(self.dataset.to_string()),
            "task" => Some(self.task_name.to_string()),
            "jobs_submitted" => Some(self.jobs_submitted.to_string()),
            _ => None,
        })
    }
}

/// Evaluate and normalize a template's requirement map
pub fn parse_requirements(
    raw: &Map<String, Value>,
    context: &RequirementContext<'_>,
) -> Result<Requirements> {
    let mut requirements = Requirements::new();
    for (name, value) in raw {
        let mut value = evaluate_value(name, value, context)?;

        if name == "gpu" {
            if let Value::Array(items) = &value {
                value = Value::from(items.len());
            }
        }

        if RESOURCE_KEYS.contains(&name.as_str()) {
            validate_resource(name, &value)?;
        }

        requirements.insert(name.clone(), value);
    }
    Ok(requirements)
}

fn evaluate_value(name: &str, value: &Value, context: &RequirementContext<'_>) -> Result<Value> {
    match value {
        Value::String(text) => {
            let expanded = expand(text, context)
                .map_err(|reason| SchedulerError::invalid_requirement(name, reason))?;
            Ok(text_to_value(&expanded))
        }
        Value::Array(items) => items
            .iter()
            .map(|item| evaluate_value(name, item, context))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        other => Ok(other.clone()),
    }
}

fn validate_resource(name: &str, value: &Value) -> Result<()> {
    match value {
        Value::Null => Ok(()),
        Value::Number(n) => match n.as_f64() {
            Some(v) if v >= 0.0 => Ok(()),
            _ => Err(SchedulerError::invalid_requirement(
                name,
                format!("must not be negative, got {n}"),
            )),
        },
        other => Err(SchedulerError::invalid_requirement(
            name,
            format!("expected a number, got {other}"),
        )),
    }
}

#[derive(Debug, Clone, Copy)]
enum Call {
    Steering,
    Variable,
    Eval,
}

/// Rightmost `$...(` call in `text`: (start of `$`, kind, index of `(`)
fn find_last_call(text: &str) -> Option<(usize, Call, usize)> {
    text.rmatch_indices('$').find_map(|(i, _)| {
        let rest = &text[i..];
        if rest.starts_with("$steering(") {
            Some((i, Call::Steering, i + "$steering".len()))
        } else if rest.starts_with("$eval(") {
            Some((i, Call::Eval, i + "$eval".len()))
        } else if rest.starts_with("$(") {
            Some((i, Call::Variable, i + 1))
        } else {
            None
        }
    })
}

fn matching_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (offset, c) in text[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + offset);
                }
            }
            _ => {}
        }
    }
    None
}

fn expand(input: &str, context: &RequirementContext<'_>) -> std::result::Result<String, String> {
    let mut text = input.to_string();
    for _ in 0..MAX_EXPANSIONS {
        let Some((start, call, open)) = find_last_call(&text) else {
            return Ok(text);
        };
        let close =
            matching_paren(&text, open).ok_or_else(|| format!("unbalanced parentheses in {input:?}"))?;
        let argument = text[open + 1..close].trim();

        let replacement = match call {
            Call::Steering => context
                .steering(argument)
                .ok_or_else(|| format!("unknown steering parameter {argument:?}"))?,
            Call::Variable => context
                .variable(argument)
                .ok_or_else(|| format!("unknown variable {argument:?}"))?,
            Call::Eval => format_number(evaluate_arithmetic(argument)?),
        };
        text.replace_range(start..=close, &replacement);
    }
    Err(format!("too many nested expressions in {input:?}"))
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn text_to_value(text: &str) -> Value {
    let trimmed = text.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::from(i);
    }
    if let Some(n) = trimmed.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(n);
    }
    Value::String(text.to_string())
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// Recursive-descent evaluation of `+ - * /` with parentheses and unary minus
pub fn evaluate_arithmetic(expression: &str) -> std::result::Result<f64, String> {
    let mut parser = Arithmetic {
        chars: expression.chars().filter(|c| !c.is_whitespace()).collect(),
        pos: 0,
    };
    let value = parser.expression()?;
    if parser.pos != parser.chars.len() {
        return Err(format!("unexpected input in {expression:?}"));
    }
    if !value.is_finite() {
        return Err(format!("{expression:?} is not a finite number"));
    }
    Ok(value)
}

struct Arithmetic {
    chars: Vec<char>,
    pos: usize,
}

impl Arithmetic {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn expression(&mut self) -> std::result::Result<f64, String> {
        let mut value = self.term()?;
        while let Some(op @ ('+' | '-')) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == '+' { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self) -> std::result::Result<f64, String> {
        let mut value = self.factor()?;
        while let Some(op @ ('*' | '/')) = self.peek() {
            self.pos += 1;
            let rhs = self.factor()?;
            if op == '*' {
                value *= rhs;
            } else {
                if rhs == 0.0 {
                    return Err("division by zero".to_string());
                }
                value /= rhs;
            }
        }
        Ok(value)
    }

    fn factor(&mut self) -> std::result::Result<f64, String> {
        match self.peek() {
            Some('-') => {
                self.pos += 1;
                Ok(-self.factor()?)
            }
            Some('(') => {
                self.pos += 1;
                let value = self.expression()?;
                if self.peek() != Some(')') {
                    return Err("missing closing parenthesis".to_string());
                }
                self.pos += 1;
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => {
                let start = self.pos;
                while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == '.') {
                    self.pos += 1;
                }
                let literal: String = self.chars[start..self.pos].iter().collect();
                literal
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number {literal:?}"))
            }
            Some(c) => Err(format!("unexpected character {c:?}")),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params() -> Map<String, Value> {
        json!({"cores": 4, "mem_gb": "2.5", "gpus": ["a", "b"]})
            .as_object()
            .cloned()
            .unwrap()
    }

    fn context(parameters: &Map<String, Value>) -> RequirementContext<'_> {
        RequirementContext {
            parameters,
            job_index: 7,
            dataset: 20001,
            task_name: "reco",
            jobs_submitted: 100,
        }
    }

    fn raw(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_expressions_expand_to_numbers() {
        let parameters = params();
        let requirements = parse_requirements(
            &raw(json!({
                "cpu": "$steering(cores)",
                "memory": "$eval($(mem_gb) * 2)",
                "disk": "$eval(($(job) + 3) * 10)",
                "site": "site-$(dataset)-$(task)"
            })),
            &context(&parameters),
        )
        .unwrap();

        assert_eq!(requirements["cpu"], json!(4));
        assert_eq!(requirements["memory"], json!(5));
        assert_eq!(requirements["disk"], json!(100));
        assert_eq!(requirements["site"], json!("site-20001-reco"));
    }

    #[test]
    fn test_gpu_list_becomes_count() {
        let parameters = params();
        let requirements =
            parse_requirements(&raw(json!({"gpu": ["cuda0", "cuda1", "cuda2"]})), &context(&parameters))
                .unwrap();
        assert_eq!(requirements["gpu"], json!(3));
    }

    #[test]
    fn test_negative_and_non_numeric_resources_rejected() {
        let parameters = params();
        let negative = parse_requirements(&raw(json!({"cpu": -1})), &context(&parameters));
        assert!(matches!(
            negative,
            Err(SchedulerError::InvalidRequirement { .. })
        ));

        let word = parse_requirements(&raw(json!({"memory": "lots"})), &context(&parameters));
        assert!(word.is_err());
    }

    #[test]
    fn test_unknown_names_rejected() {
        let parameters = params();
        let result = parse_requirements(&raw(json!({"cpu": "$steering(nope)"})), &context(&parameters));
        assert!(matches!(
            result,
            Err(SchedulerError::InvalidRequirement { name, .. }) if name == "cpu"
        ));
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(evaluate_arithmetic("1 + 2 * 3"), Ok(7.0));
        assert_eq!(evaluate_arithmetic("(1 + 2) * 3"), Ok(9.0));
        assert_eq!(evaluate_arithmetic("-4 / 2"), Ok(-2.0));
        assert!(evaluate_arithmetic("1 / 0").is_err());
        assert!(evaluate_arithmetic("2 +").is_err());
        assert!(evaluate_arithmetic("(2").is_err());
    }
}
