//! Intent classification results and model-output decoding.

use quarry_common::{QuarryError, Result};
use serde_json::{Map, Value};

/// Literal marker for "this sub-task was not requested".
pub const NOT_APPLICABLE: &str = "N/A";

pub const GREETING_MESSAGE: &str = "greeting_message";
pub const USE_DATABASE: &str = "use_database";
pub const NL_TO_SQL_QUESTION: &str = "nl_to_sql_question";
pub const NL_TO_PYTHON_QUESTION: &str = "nl_to_python_question";

/// A sub-question that may be the `N/A` marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubQuestion {
    Requested(String),
    NotRequested,
}

impl SubQuestion {
    fn from_field(value: Option<&Value>) -> Self {
        match value.and_then(Value::as_str).map(str::trim) {
            Some(q) if !q.is_empty() && q != NOT_APPLICABLE => Self::Requested(q.to_string()),
            _ => Self::NotRequested,
        }
    }

    pub fn as_requested(&self) -> Option<&str> {
        match self {
            Self::Requested(q) => Some(q),
            Self::NotRequested => None,
        }
    }

    /// The question text, or `N/A`.
    pub fn as_arg(&self) -> &str {
        self.as_requested().unwrap_or(NOT_APPLICABLE)
    }
}

/// The four shapes the intent sub-agent may answer with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Greeting { message: String },
    UseDatabase { database: String },
    OutOfScope,
    Question { sql: SubQuestion, python: SubQuestion },
}

impl Intent {
    /// Classify a decoded intent object. Recognized keys are checked in
    /// priority order; an object with none of them is out of scope.
    pub fn from_object(object: &Map<String, Value>) -> Self {
        if let Some(message) = object.get(GREETING_MESSAGE).and_then(Value::as_str) {
            return Self::Greeting {
                message: message.to_string(),
            };
        }
        if let Some(database) = object.get(USE_DATABASE) {
            return Self::UseDatabase {
                database: crate::state::value_to_text(database),
            };
        }
        if object.contains_key(NL_TO_SQL_QUESTION) || object.contains_key(NL_TO_PYTHON_QUESTION) {
            return Self::Question {
                sql: SubQuestion::from_field(object.get(NL_TO_SQL_QUESTION)),
                python: SubQuestion::from_field(object.get(NL_TO_PYTHON_QUESTION)),
            };
        }
        Self::OutOfScope
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        value
            .as_object()
            .map(Self::from_object)
            .ok_or_else(|| QuarryError::Intent(format!("intent output is not an object: {value}")))
    }
}

/// Decode the JSON object in a model reply.
///
/// Tolerates markdown code fences and prose around the object. Fails when
/// no complete object is present or it is not valid JSON.
pub fn extract_json_from_model_output(text: &str) -> Result<Map<String, Value>> {
    let unfenced = strip_code_fence(text);
    let candidate = extract_json_object(unfenced)
        .ok_or_else(|| QuarryError::Intent(format!(
            "no JSON object in model output: {}",
            text.chars().take(200).collect::<String>()
        )))?;

    match serde_json::from_str::<Value>(candidate)? {
        Value::Object(map) => Ok(map),
        other => Err(QuarryError::Intent(format!("expected an object, got {other}"))),
    }
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag line, e.g. ```json
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Slice out the first balanced `{...}`, ignoring braces inside strings.
fn extract_json_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
