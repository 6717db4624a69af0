//! Platform abstraction: the remote SQL and AI surface the runner talks to.
//!
//! The [`Platform`] trait is the single seam between the runner and the
//! outside world: [`rest::RestPlatform`] speaks the statements REST API,
//! [`memory::MemoryPlatform`] keeps an in-memory catalog for tests and
//! `--simulate` runs. The active session is passed explicitly to every call.

pub mod memory;
pub mod rest;

use crate::catalog::{ObjectKind, ObjectRef};
use crate::core::types::Session;
use crate::cortex::{AiFunction, AnalystAnswer, AnalystRequest};
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Failure taxonomy surfaced by the platform. Messages are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("authorization error: {0}")]
    Authorization(String),

    #[error("object not found: {0}")]
    ObjectNotFound(String),

    #[error("malformed argument: {0}")]
    MalformedArgument(String),

    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl PlatformError {
    /// Map an HTTP status and platform message onto the taxonomy.
    pub fn classify(status: u16, message: &str) -> Self {
        let lower = message.to_lowercase();
        let message = message.to_string();
        if status == 401 || status == 403 || lower.contains("insufficient privileges") {
            Self::Authorization(message)
        } else if lower.contains("does not exist") {
            Self::ObjectNotFound(message)
        } else if status == 429
            || status == 503
            || lower.contains("no active warehouse")
            || (lower.contains("warehouse") && lower.contains("suspended"))
        {
            Self::ResourceUnavailable(message)
        } else if (400..500).contains(&status) {
            Self::MalformedArgument(message)
        } else {
            Self::Protocol(format!("HTTP {}: {}", status, message))
        }
    }
}

/// Remote platform capability.
pub trait Platform {
    /// Short backend name for log lines.
    fn name(&self) -> &str;

    /// Execute one statement in the given session.
    fn execute(
        &mut self,
        session: &Session,
        statement: &Statement,
    ) -> Result<QueryResult, PlatformError>;

    /// Qualified names of every object of a kind visible to the session.
    fn list_objects(
        &mut self,
        session: &Session,
        kind: ObjectKind,
    ) -> Result<Vec<String>, PlatformError>;

    /// Ask a question against a staged semantic model. The returned SQL is
    /// not executed.
    fn analyst(
        &mut self,
        session: &Session,
        request: &AnalystRequest,
    ) -> Result<AnalystAnswer, PlatformError>;
}

// ============================================================================
// Statements
// ============================================================================

/// SQL API bind type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BindKind {
    Text,
    Fixed,
}

/// A positional `?` binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Binding {
    #[serde(rename = "type")]
    pub kind: BindKind,
    pub value: String,
}

impl Binding {
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            kind: BindKind::Text,
            value: value.into(),
        }
    }

    pub fn fixed(value: i64) -> Self {
        Self {
            kind: BindKind::Fixed,
            value: value.to_string(),
        }
    }
}

/// An AI invocation, kept alongside its SQL for backends that do not parse SQL.
#[derive(Debug, Clone, PartialEq)]
pub struct AiCall {
    pub function: AiFunction,
    pub args: IndexMap<String, serde_json::Value>,
}

/// What a statement does to the catalog.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Create or replace an object; `requires` must already exist.
    Upsert {
        object: ObjectRef,
        requires: Vec<ObjectRef>,
    },
    /// Drop an object if it exists.
    Drop(ObjectRef),
    /// Copy files from a repository mirror into a stage.
    CopyFiles { from: ObjectRef, into: ObjectRef },
    /// Invoke an AI function.
    Invoke {
        call: AiCall,
        requires: Vec<ObjectRef>,
    },
    /// Anything else: user SQL and read-only queries.
    Opaque,
}

/// One statement to send to the platform.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub bindings: Vec<Binding>,
    pub effect: Effect,
}

impl Statement {
    pub fn new(sql: impl Into<String>, effect: Effect) -> Self {
        Self {
            sql: sql.into(),
            bindings: Vec::new(),
            effect,
        }
    }

    pub fn with_bindings(mut self, bindings: Vec<Binding>) -> Self {
        self.bindings = bindings;
        self
    }

    /// False for DDL on databases, schemas and integrations, which must not
    /// run inside a namespace that may not exist yet.
    pub fn uses_namespace(&self) -> bool {
        match &self.effect {
            Effect::Upsert { object, .. } | Effect::Drop(object) => {
                object.kind.scope() == crate::catalog::Scope::Schema
            }
            _ => true,
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// Column descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

impl Column {
    pub fn new(name: &str, type_name: &str) -> Self {
        Self {
            name: name.to_string(),
            type_name: type_name.to_string(),
        }
    }

    /// VARIANT, OBJECT and ARRAY cells arrive as JSON text.
    pub fn is_semi_structured(&self) -> bool {
        matches!(
            self.type_name.to_uppercase().as_str(),
            "VARIANT" | "OBJECT" | "ARRAY"
        )
    }
}

/// Tabular statement result. Cells are nullable text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl QueryResult {
    /// One TEXT column, one row.
    pub fn scalar(column: &str, value: Option<String>) -> Self {
        Self::typed_scalar(column, "TEXT", value)
    }

    /// One column of `type_name`, one row.
    pub fn typed_scalar(column: &str, type_name: &str, value: Option<String>) -> Self {
        Self {
            columns: vec![Column::new(column, type_name)],
            rows: vec![vec![value]],
        }
    }

    /// Status row returned by DDL statements.
    pub fn status(message: impl Into<String>) -> Self {
        Self::scalar("status", Some(message.into()))
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// First cell of the first row.
    pub fn first_value(&self) -> Option<&str> {
        self.rows.first()?.first()?.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl fmt::Display for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.name.chars().count()).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                let len = cell.as_deref().unwrap_or("NULL").chars().count();
                if let Some(w) = widths.get_mut(i) {
                    *w = (*w).max(len);
                }
            }
        }

        let header: Vec<String> = self
            .columns
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:<w$}", c.name, w = *w))
            .collect();
        writeln!(f, "{}", header.join(" | ").trim_end())?;
        let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        writeln!(f, "{}", rule.join("-+-"))?;

        for row in &self.rows {
            let cells: Vec<String> = row
                .iter()
                .zip(&widths)
                .map(|(c, w)| format!("{:<w$}", c.as_deref().unwrap_or("NULL"), w = *w))
                .collect();
            writeln!(f, "{}", cells.join(" | ").trim_end())?;
        }
        write!(f, "({} row{})", self.rows.len(), if self.rows.len() == 1 { "" } else { "s" })
    }
}
