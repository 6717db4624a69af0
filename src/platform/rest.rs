//! Statements REST API client.
//!
//! `POST /api/v2/statements` submits one statement with its session and
//! positional bindings. A 202 carries a statement handle that is polled with
//! `GET /api/v2/statements/{handle}` until the result is ready. Large results
//! arrive in partitions fetched with `?partition=N`.
//!
//! Analyst questions go to `POST /api/v2/cortex/analyst/message` and are
//! answered synchronously.

use super::{Platform, PlatformError, QueryResult, Statement, Column, Effect};
use crate::catalog::{ObjectKind, Scope};
use crate::core::types::{Connection, Session, TokenType};
use crate::cortex::analyst::{self, AnalystAnswer, AnalystRequest};
use reqwest::blocking::{Client, RequestBuilder};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, trace};

const TOKEN_TYPE_HEADER: &str = "X-Snowflake-Authorization-Token-Type";
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Blocking REST client bound to one account.
pub struct RestPlatform {
    client: Client,
    base_url: String,
    token: String,
    token_type: TokenType,
    timeout_secs: u64,
}

impl RestPlatform {
    /// Build a client from the connection block; the token comes from `token_env`.
    pub fn from_connection(conn: &Connection) -> Result<Self, String> {
        let token = std::env::var(&conn.token_env).map_err(|_| {
            format!(
                "environment variable {} is not set (needed to authenticate to {})",
                conn.token_env, conn.account
            )
        })?;
        Self::new(conn, token)
    }

    pub fn new(conn: &Connection, token: String) -> Result<Self, String> {
        let client = Client::builder()
            .user_agent(format!("handson/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(conn.timeout_secs))
            .build()
            .map_err(|e| format!("cannot create HTTP client: {}", e))?;
        Ok(Self {
            client,
            base_url: base_url(conn),
            token,
            token_type: conn.token_type,
            timeout_secs: conn.timeout_secs,
        })
    }

    fn statements_url(&self) -> String {
        format!("{}/api/v2/statements", self.base_url)
    }

    fn analyst_url(&self) -> String {
        format!("{}/api/v2/cortex/analyst/message", self.base_url)
    }

    fn status_url(&self, handle: &str) -> String {
        format!("{}/api/v2/statements/{}", self.base_url, handle)
    }

    fn send(&self, request: RequestBuilder) -> Result<(u16, String), PlatformError> {
        let response = request
            .bearer_auth(&self.token)
            .header(TOKEN_TYPE_HEADER, self.token_type.header_value())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .map_err(|e| PlatformError::Network(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|e| PlatformError::Network(e.to_string()))?;
        Ok((status, body))
    }

    fn fetch_partitions(&self, page: ResultPage) -> Result<QueryResult, PlatformError> {
        let ResultPage {
            handle,
            mut result,
            partitions,
        } = page;
        let Some(handle) = handle else {
            return Ok(result);
        };
        for partition in 1..partitions {
            trace!(handle = %handle, partition, "fetching result partition");
            let (status, body) = self.send(
                self.client
                    .get(self.status_url(&handle))
                    .query(&[("partition", partition)]),
            )?;
            if status != 200 {
                return Err(error_from_body(status, &body));
            }
            let value: Value = serde_json::from_str(&body)
                .map_err(|e| PlatformError::Protocol(format!("invalid partition JSON: {}", e)))?;
            result.rows.extend(parse_rows(&value)?);
        }
        Ok(result)
    }
}

impl Platform for RestPlatform {
    fn name(&self) -> &str {
        "rest"
    }

    fn execute(
        &mut self,
        session: &Session,
        statement: &Statement,
    ) -> Result<QueryResult, PlatformError> {
        let body = statement_body(session, statement, self.timeout_secs);
        debug!(sql = %statement.sql, binds = statement.bindings.len(), "submitting statement");

        let (status, text) = self.send(self.client.post(self.statements_url()).json(&body))?;
        let mut outcome = interpret_response(status, &text)?;
        loop {
            match outcome {
                Outcome::Done(page) => return self.fetch_partitions(page),
                Outcome::Pending(handle) => {
                    trace!(handle = %handle, "statement still running");
                    std::thread::sleep(POLL_INTERVAL);
                    let (status, text) = self.send(self.client.get(self.status_url(&handle)))?;
                    outcome = interpret_response(status, &text)?;
                }
            }
        }
    }

    fn list_objects(
        &mut self,
        session: &Session,
        kind: ObjectKind,
    ) -> Result<Vec<String>, PlatformError> {
        // SHOW ... IN ACCOUNT works even when the session namespace is gone
        let account_session = Session {
            database: None,
            schema: None,
            ..session.clone()
        };
        let statement = Statement::new(show_sql(kind), Effect::Opaque);
        let result = self.execute(&account_session, &statement)?;
        qualified_names(kind, &result)
    }

    fn analyst(
        &mut self,
        _session: &Session,
        request: &AnalystRequest,
    ) -> Result<AnalystAnswer, PlatformError> {
        debug!(model = %request.semantic_model_file(), "asking analyst");
        let (status, text) = self.send(self.client.post(self.analyst_url()).json(&request.body()))?;
        interpret_analyst(status, &text)
    }
}

/// Interpret one HTTP response from the analyst endpoint.
pub fn interpret_analyst(status: u16, body: &str) -> Result<AnalystAnswer, PlatformError> {
    if status != 200 {
        return Err(error_from_body(status, body));
    }
    let value: Value = serde_json::from_str(body)
        .map_err(|e| PlatformError::Protocol(format!("invalid analyst JSON: {}", e)))?;
    analyst::parse_response(&value).map_err(PlatformError::Protocol)
}

/// `https://<account>.snowflakecomputing.com` unless `host` overrides it.
pub fn base_url(conn: &Connection) -> String {
    match &conn.host {
        Some(host) if host.starts_with("http://") || host.starts_with("https://") => {
            host.trim_end_matches('/').to_string()
        }
        Some(host) => format!("https://{}", host.trim_end_matches('/')),
        None => format!(
            "https://{}.snowflakecomputing.com",
            conn.account.to_lowercase()
        ),
    }
}

/// Request body for one statement.
pub fn statement_body(session: &Session, statement: &Statement, timeout_secs: u64) -> Value {
    let mut body = Map::new();
    body.insert("statement".to_string(), json!(statement.sql));
    body.insert("timeout".to_string(), json!(timeout_secs));
    let mut context = vec![("role", &session.role), ("warehouse", &session.warehouse)];
    if statement.uses_namespace() {
        context.push(("database", &session.database));
        context.push(("schema", &session.schema));
    }
    for (key, value) in context {
        if let Some(v) = value {
            body.insert(key.to_string(), json!(v));
        }
    }
    if !statement.bindings.is_empty() {
        let bindings: Map<String, Value> = statement
            .bindings
            .iter()
            .enumerate()
            .map(|(i, b)| (format!("{}", i + 1), json!(b)))
            .collect();
        body.insert("bindings".to_string(), Value::Object(bindings));
    }
    Value::Object(body)
}

/// A finished first page of results.
#[derive(Debug)]
pub struct ResultPage {
    pub handle: Option<String>,
    pub result: QueryResult,
    pub partitions: usize,
}

#[derive(Debug)]
pub enum Outcome {
    Done(ResultPage),
    Pending(String),
}

/// Interpret one HTTP response from the statements endpoint.
pub fn interpret_response(status: u16, body: &str) -> Result<Outcome, PlatformError> {
    match status {
        200 => {
            let value: Value = serde_json::from_str(body)
                .map_err(|e| PlatformError::Protocol(format!("invalid result JSON: {}", e)))?;
            parse_result(&value).map(Outcome::Done)
        }
        202 => {
            let value: Value = serde_json::from_str(body)
                .map_err(|e| PlatformError::Protocol(format!("invalid status JSON: {}", e)))?;
            value
                .get("statementHandle")
                .and_then(Value::as_str)
                .map(|h| Outcome::Pending(h.to_string()))
                .ok_or_else(|| PlatformError::Protocol("202 response without statementHandle".to_string()))
        }
        _ => Err(error_from_body(status, body)),
    }
}

/// Take the platform's message verbatim when the body carries one.
pub fn error_from_body(status: u16, body: &str) -> PlatformError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string());
    PlatformError::classify(status, &message)
}

/// Parse `resultSetMetaData` and the first `data` page.
pub fn parse_result(value: &Value) -> Result<ResultPage, PlatformError> {
    let meta = value
        .get("resultSetMetaData")
        .ok_or_else(|| PlatformError::Protocol("response has no resultSetMetaData".to_string()))?;
    let columns = meta
        .get("rowType")
        .and_then(Value::as_array)
        .ok_or_else(|| PlatformError::Protocol("resultSetMetaData has no rowType".to_string()))?
        .iter()
        .map(|col| Column {
            name: col.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
            type_name: col
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("text")
                .to_uppercase(),
        })
        .collect();
    let partitions = meta
        .get("partitionInfo")
        .and_then(Value::as_array)
        .map(|p| p.len())
        .unwrap_or(1);

    Ok(ResultPage {
        handle: value
            .get("statementHandle")
            .and_then(Value::as_str)
            .map(str::to_string),
        result: QueryResult {
            columns,
            rows: parse_rows(value)?,
        },
        partitions,
    })
}

/// `data`: array of rows, each an array of nullable strings.
pub fn parse_rows(value: &Value) -> Result<Vec<Vec<Option<String>>>, PlatformError> {
    let Some(data) = value.get("data") else {
        return Ok(Vec::new());
    };
    let rows = data
        .as_array()
        .ok_or_else(|| PlatformError::Protocol("'data' is not an array".to_string()))?;
    rows.iter()
        .map(|row| {
            row.as_array()
                .map(|cells| {
                    cells
                        .iter()
                        .map(|cell| match cell {
                            Value::Null => None,
                            Value::String(s) => Some(s.clone()),
                            other => Some(other.to_string()),
                        })
                        .collect()
                })
                .ok_or_else(|| PlatformError::Protocol("result row is not an array".to_string()))
        })
        .collect()
}

/// Listing statement for a kind.
pub fn show_sql(kind: ObjectKind) -> String {
    match kind.scope() {
        Scope::Account => format!("SHOW {}", kind.show_keyword()),
        _ => format!("SHOW {} IN ACCOUNT", kind.show_keyword()),
    }
}

/// Build qualified names from a SHOW result (`name`, `database_name`, `schema_name`).
pub fn qualified_names(kind: ObjectKind, result: &QueryResult) -> Result<Vec<String>, PlatformError> {
    let col = |name: &str| {
        result
            .column_index(name)
            .ok_or_else(|| PlatformError::Protocol(format!("SHOW {} result has no '{}' column", kind.show_keyword(), name)))
    };
    let name_idx = col("name")?;
    let parents = match kind.scope() {
        Scope::Account => vec![],
        Scope::Database => vec![col("database_name")?],
        Scope::Schema => vec![col("database_name")?, col("schema_name")?],
    };

    let cell = |row: &[Option<String>], idx: usize| row.get(idx).cloned().flatten().unwrap_or_default();
    Ok(result
        .rows
        .iter()
        .map(|row| {
            let mut parts: Vec<String> = parents.iter().map(|i| cell(row, *i)).collect();
            parts.push(cell(row, name_idx));
            parts.join(".")
        })
        .collect())
}
