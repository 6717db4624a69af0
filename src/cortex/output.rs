//! HS-022: Decode AI function results by return shape.

use super::functions::{AiFunction, ReturnShape};
use crate::platform::{Column, QueryResult};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// Decoded result of an AI invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AiOutput {
    Text {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        language: Option<String>,
    },
    Score {
        value: f64,
    },
    Flag {
        value: bool,
    },
    Labels {
        labels: Vec<String>,
    },
    Chunks {
        chunks: Vec<String>,
    },
    Vector {
        values: Vec<f64>,
    },
    Structured {
        value: Value,
    },
    Hits {
        hits: Vec<Value>,
    },
}

/// Sign of a sentiment score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Positive,
    Neutral,
    Negative,
}

impl AiOutput {
    /// Polarity of a score result; `None` for other shapes.
    pub fn polarity(&self) -> Option<Polarity> {
        match self {
            Self::Score { value } if *value > 0.0 => Some(Polarity::Positive),
            Self::Score { value } if *value < 0.0 => Some(Polarity::Negative),
            Self::Score { .. } => Some(Polarity::Neutral),
            _ => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn language(&self) -> Option<&str> {
        match self {
            Self::Text { language, .. } => language.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for AiOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text {
                text,
                language: Some(lang),
            } => write!(f, "[{}] {}", lang, text),
            Self::Text { text, .. } => write!(f, "{}", text),
            Self::Score { value } => write!(f, "{:.4}", value),
            Self::Flag { value } => write!(f, "{}", value),
            Self::Labels { labels } => write!(f, "{}", labels.join(", ")),
            Self::Chunks { chunks } => {
                for (i, chunk) in chunks.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "[{}] {}", i + 1, chunk)?;
                }
                Ok(())
            }
            Self::Vector { values } => {
                let head: Vec<String> = values.iter().take(4).map(|v| format!("{:.4}", v)).collect();
                let more = if values.len() > 4 { ", ..." } else { "" };
                write!(f, "vector[{}] [{}{}]", values.len(), head.join(", "), more)
            }
            Self::Structured { value } => {
                let pretty = serde_json::to_string_pretty(value).map_err(|_| fmt::Error)?;
                write!(f, "{}", pretty)
            }
            Self::Hits { hits } => {
                for (i, hit) in hits.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}. {}", i + 1, hit)?;
                }
                Ok(())
            }
        }
    }
}

/// Decode the `RESULT` cell of an invocation.
///
/// `args` are the bound arguments; translate tags its text with `to`.
/// Text results are unquoted only when the column is semi-structured.
pub fn decode(
    function: AiFunction,
    args: &IndexMap<String, Value>,
    result: &QueryResult,
) -> Result<AiOutput, String> {
    let raw = result
        .first_value()
        .ok_or_else(|| format!("{} returned NULL", function))?;
    let variant = result.columns.first().is_some_and(Column::is_semi_structured);
    let text = || if variant { unquote(raw) } else { raw.to_string() };
    match function.returns() {
        ReturnShape::Text => Ok(AiOutput::Text {
            text: text(),
            language: None,
        }),
        ReturnShape::TaggedText => Ok(AiOutput::Text {
            text: text(),
            language: args.get("to").and_then(Value::as_str).map(str::to_string),
        }),
        ReturnShape::Score => raw
            .trim()
            .parse::<f64>()
            .map(|value| AiOutput::Score { value })
            .map_err(|e| format!("{} returned a non-numeric score '{}': {}", function, raw, e)),
        ReturnShape::Flag => match raw.trim().to_lowercase().as_str() {
            "true" | "1" => Ok(AiOutput::Flag { value: true }),
            "false" | "0" => Ok(AiOutput::Flag { value: false }),
            other => Err(format!("{} returned a non-boolean '{}'", function, other)),
        },
        ReturnShape::Labels => decode_labels(function, &parse_json(function, raw)?),
        ReturnShape::Chunks => {
            let chunks = string_array(&parse_json(function, raw)?)
                .ok_or_else(|| format!("{} did not return an array of text", function))?;
            Ok(AiOutput::Chunks { chunks })
        }
        ReturnShape::Vector => {
            let value = parse_json(function, raw)?;
            let values = value
                .as_array()
                .and_then(|items| items.iter().map(Value::as_f64).collect::<Option<Vec<_>>>())
                .ok_or_else(|| format!("{} did not return a numeric vector", function))?;
            Ok(AiOutput::Vector { values })
        }
        ReturnShape::Structured => decode_structured(function, parse_json(function, raw)?),
        ReturnShape::Hits => {
            let value = parse_json(function, raw)?;
            let hits = value
                .get("results")
                .and_then(Value::as_array)
                .cloned()
                .ok_or_else(|| format!("{} response has no 'results' array", function))?;
            Ok(AiOutput::Hits { hits })
        }
    }
}

fn parse_json(function: AiFunction, raw: &str) -> Result<Value, String> {
    serde_json::from_str(raw).map_err(|e| format!("{} returned invalid JSON: {}", function, e))
}

/// Strip one layer of JSON string quoting.
fn unquote(raw: &str) -> String {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::String(s)) => s,
        _ => raw.to_string(),
    }
}

fn string_array(value: &Value) -> Option<Vec<String>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect()
}

/// `{"labels": [...]}`, `{"label": "..."}` or a bare array.
fn decode_labels(function: AiFunction, value: &Value) -> Result<AiOutput, String> {
    let labels = if let Some(labels) = value.get("labels").and_then(string_array) {
        labels
    } else if let Some(label) = value.get("label").and_then(Value::as_str) {
        vec![label.to_string()]
    } else if let Some(labels) = string_array(value) {
        labels
    } else {
        return Err(format!("{} returned no labels: {}", function, value));
    };
    Ok(AiOutput::Labels { labels })
}

/// A bare object, or `{"structured_output":[{"raw_message": ...}]}`.
fn decode_structured(function: AiFunction, value: Value) -> Result<AiOutput, String> {
    let inner = value
        .get("structured_output")
        .and_then(Value::as_array)
        .and_then(|items| items.first())
        .and_then(|first| first.get("raw_message"))
        .cloned();
    match inner {
        Some(Value::String(s)) => serde_json::from_str(&s)
            .map(|value| AiOutput::Structured { value })
            .map_err(|e| format!("{} raw_message is not JSON: {}", function, e)),
        Some(value) => Ok(AiOutput::Structured { value }),
        None if value.is_object() || value.is_array() => Ok(AiOutput::Structured { value }),
        None => Err(format!("{} did not return an object: {}", function, value)),
    }
}
