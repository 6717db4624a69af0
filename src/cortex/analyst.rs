//! HS-023: Natural-language questions answered against a staged semantic model.
//!
//! The analyst endpoint takes a single user message plus the stage path of a
//! semantic model YAML and answers with interpretation text, an optional SQL
//! statement and follow-up suggestions. Running that SQL is the caller's job.

use crate::catalog::ObjectRef;
use crate::platform::QueryResult;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;

/// One question for the analyst.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalystRequest {
    pub question: String,
    /// Stage holding the semantic model
    pub stage: ObjectRef,
    /// Path of the model file inside the stage
    pub file: String,
}

impl AnalystRequest {
    /// `@DB.SCHEMA.STAGE/path/model.yaml`
    pub fn semantic_model_file(&self) -> String {
        format!("@{}/{}", self.stage.name, self.file)
    }

    /// Request body for the message endpoint.
    pub fn body(&self) -> Value {
        json!({
            "messages": [{
                "role": "user",
                "content": [{ "type": "text", "text": self.question }],
            }],
            "semantic_model_file": self.semantic_model_file(),
        })
    }
}

/// The analyst's answer, plus the rows its SQL produced when it was run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalystAnswer {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<QueryResult>,
}

impl AnalystAnswer {
    /// Text-only answer.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }
}

impl fmt::Display for AnalystAnswer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)?;
        if let Some(sql) = &self.sql {
            write!(f, "\n\nSQL:\n{}", sql)?;
        }
        if let Some(result) = &self.result {
            write!(f, "\n\n{}", result)?;
        }
        if !self.suggestions.is_empty() {
            write!(f, "\n\nTry asking:")?;
            for s in &self.suggestions {
                write!(f, "\n- {}", s)?;
            }
        }
        Ok(())
    }
}

/// Fold `message.content[]` into an answer.
///
/// Content items are `text`, `sql` (with `statement`) or `suggestions`;
/// unknown item types are ignored.
pub fn parse_response(value: &Value) -> Result<AnalystAnswer, String> {
    let content = value
        .pointer("/message/content")
        .and_then(Value::as_array)
        .ok_or_else(|| "analyst response has no message.content".to_string())?;

    let mut texts = Vec::new();
    let mut answer = AnalystAnswer::default();
    for item in content {
        match item.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(t) = item.get("text").and_then(Value::as_str) {
                    texts.push(t.to_string());
                }
            }
            Some("sql") => {
                let statement = item
                    .get("statement")
                    .and_then(Value::as_str)
                    .ok_or_else(|| "analyst sql item has no statement".to_string())?;
                answer.sql = Some(statement.trim().trim_end_matches(';').to_string());
            }
            Some("suggestions") => {
                if let Some(items) = item.get("suggestions").and_then(Value::as_array) {
                    answer
                        .suggestions
                        .extend(items.iter().filter_map(Value::as_str).map(str::to_string));
                }
            }
            _ => {}
        }
    }
    answer.text = texts.join("\n\n");
    Ok(answer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ObjectKind;

    fn request() -> AnalystRequest {
        AnalystRequest {
            question: "月別の売上推移は？".to_string(),
            stage: ObjectRef::new(ObjectKind::Stage, "SNOWRETAIL_DB.SNOWRETAIL_SCHEMA.SEMANTIC_MODEL_STAGE"),
            file: "sales_analysis_model.yaml".to_string(),
        }
    }

    #[test]
    fn test_hs023_request_body() {
        let body = request().body();
        assert_eq!(
            body["semantic_model_file"],
            json!("@SNOWRETAIL_DB.SNOWRETAIL_SCHEMA.SEMANTIC_MODEL_STAGE/sales_analysis_model.yaml")
        );
        assert_eq!(body["messages"][0]["role"], json!("user"));
        assert_eq!(body["messages"][0]["content"][0]["text"], json!("月別の売上推移は？"));
    }

    #[test]
    fn test_hs023_parse_text_and_sql() {
        let value = json!({
            "message": {
                "role": "analyst",
                "content": [
                    { "type": "text", "text": "This is our interpretation of your question." },
                    { "type": "sql", "statement": "SELECT MONTH, SUM(AMOUNT) FROM SALES GROUP BY 1;" }
                ]
            },
            "request_id": "abc"
        });
        let answer = parse_response(&value).unwrap();
        assert_eq!(answer.text, "This is our interpretation of your question.");
        assert_eq!(answer.sql.as_deref(), Some("SELECT MONTH, SUM(AMOUNT) FROM SALES GROUP BY 1"));
        assert!(answer.suggestions.is_empty());
    }

    #[test]
    fn test_hs023_parse_suggestions_only() {
        let value = json!({
            "message": { "content": [
                { "type": "text", "text": "The question is ambiguous." },
                { "type": "suggestions", "suggestions": ["Sales by month?", "Sales by store?"] }
            ]}
        });
        let answer = parse_response(&value).unwrap();
        assert_eq!(answer.sql, None);
        assert_eq!(answer.suggestions.len(), 2);
        assert!(answer.to_string().contains("Try asking:\n- Sales by month?"));
    }

    #[test]
    fn test_hs023_parse_errors() {
        assert!(parse_response(&json!({"message": {}})).is_err());
        let bad_sql = json!({"message": {"content": [{"type": "sql"}]}});
        assert!(parse_response(&bad_sql).unwrap_err().contains("no statement"));
    }

    #[test]
    fn test_hs023_display_with_result() {
        let mut answer = AnalystAnswer::text("Monthly sales.").with_sql("SELECT 1");
        answer.result = Some(QueryResult::scalar("TOTAL", Some("42".to_string())));
        let out = answer.to_string();
        assert!(out.starts_with("Monthly sales.\n\nSQL:\nSELECT 1\n\nTOTAL"));
        assert!(out.ends_with("(1 row)"));
    }
}
