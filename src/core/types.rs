//! HS-001: Pipeline configuration, lock state, plan and provenance types.
//!
//! Defines the YAML schema for `handson.yaml`: connection, function catalog
//! selection, steps and policy. All types derive Serialize/Deserialize for
//! YAML roundtripping.

use crate::catalog::{ObjectKind, ObjectRef};
use crate::cortex::{AiFunction, AiOutput, AnalystAnswer, CatalogVersion};
use crate::platform::QueryResult;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// Top-level handson.yaml
// ============================================================================

/// Root configuration: the ordered pipeline to run against one platform account.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PipelineConfig {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Pipeline name, also keys the state directory
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Global parameters (templatable)
    #[serde(default)]
    #[schemars(with = "HashMap<String, serde_json::Value>")]
    pub params: HashMap<String, serde_yaml_ng::Value>,

    /// Platform connection and active session
    pub connection: Connection,

    /// AI function catalog selection
    #[serde(default)]
    pub functions: FunctionsConfig,

    /// Step declarations (order-preserving)
    pub steps: IndexMap<String, Step>,

    /// Execution policy
    #[serde(default)]
    pub policy: Policy,
}

// ============================================================================
// Connection / session
// ============================================================================

/// Connection settings. Role, warehouse and namespace form the session that is
/// passed explicitly to every platform call.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Connection {
    /// Account identifier (org-account)
    pub account: String,

    /// Base URL override (default: https://{account}.snowflakecomputing.com)
    #[serde(default)]
    pub host: Option<String>,

    /// Login user (informational, the token carries identity)
    #[serde(default)]
    pub user: Option<String>,

    /// Active role
    #[serde(default)]
    pub role: Option<String>,

    /// Active compute warehouse
    #[serde(default)]
    pub warehouse: Option<String>,

    /// Active database
    #[serde(default)]
    pub database: Option<String>,

    /// Active schema
    #[serde(default)]
    pub schema: Option<String>,

    /// Environment variable holding the bearer token
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Token flavour sent in the token-type header
    #[serde(default)]
    pub token_type: TokenType,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_token_env() -> String {
    "SNOWFLAKE_TOKEN".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

/// Authentication token type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    #[default]
    ProgrammaticAccessToken,
    Oauth,
    KeypairJwt,
}

impl TokenType {
    /// Value of the token-type request header.
    pub fn header_value(self) -> &'static str {
        match self {
            Self::ProgrammaticAccessToken => "PROGRAMMATIC_ACCESS_TOKEN",
            Self::Oauth => "OAUTH",
            Self::KeypairJwt => "KEYPAIR_JWT",
        }
    }
}

/// Resolved session state threaded through every platform call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub account: String,
    pub role: Option<String>,
    pub warehouse: Option<String>,
    pub database: Option<String>,
    pub schema: Option<String>,
}

impl Session {
    /// `DATABASE.SCHEMA` when both are set.
    pub fn namespace(&self) -> Option<String> {
        match (&self.database, &self.schema) {
            (Some(db), Some(schema)) => Some(format!("{}.{}", db, schema)),
            _ => None,
        }
    }
}

// ============================================================================
// Function catalog selection
// ============================================================================

/// Which AI function catalog version to render invocations against.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct FunctionsConfig {
    /// Catalog version
    #[serde(default)]
    pub catalog: CatalogVersion,

    /// Per-function SQL name overrides
    #[serde(default)]
    pub overrides: IndexMap<AiFunction, String>,
}

// ============================================================================
// Steps
// ============================================================================

/// A single pipeline step.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Step {
    /// Step type
    #[serde(rename = "type")]
    pub step_type: StepType,

    /// present (default) or absent
    #[serde(default)]
    pub state: Option<String>,

    /// Steps that must run first
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Object comment
    #[serde(default)]
    pub comment: Option<String>,

    // -- Catalog object fields --
    /// Object name (simple or qualified)
    #[serde(default)]
    pub name: Option<String>,

    // -- Stage fields --
    /// Server-side encryption type (e.g. SNOWFLAKE_SSE)
    #[serde(default)]
    pub encryption: Option<String>,

    /// Enable the stage directory table
    #[serde(default)]
    pub directory: Option<bool>,

    // -- API integration fields --
    /// Allowed URL prefixes
    #[serde(default)]
    pub allowed_prefixes: Vec<String>,

    /// Integration enabled flag
    #[serde(default)]
    pub enabled: Option<bool>,

    // -- Git repository fields --
    /// HTTPS origin of the remote repository
    #[serde(default)]
    pub origin: Option<String>,

    /// API integration used by the repository
    #[serde(default)]
    pub api_integration: Option<String>,

    // -- Copy / web app fields --
    /// Source repository mirror
    #[serde(default)]
    pub repository: Option<String>,

    /// Repository branch
    #[serde(default)]
    pub branch: Option<String>,

    /// Path within the repository branch
    #[serde(default)]
    pub path: Option<String>,

    /// Target stage for copies (optionally `STAGE/sub/path`)
    #[serde(default)]
    pub into: Option<String>,

    /// Stage holding web app sources
    #[serde(default)]
    pub stage: Option<String>,

    /// Web app entry point file
    #[serde(default)]
    pub main_file: Option<String>,

    /// Web app title
    #[serde(default)]
    pub title: Option<String>,

    // -- Table fields --
    /// Column name -> type
    #[serde(default)]
    pub columns: IndexMap<String, String>,

    // -- Search service fields --
    /// Indexed text column
    #[serde(default)]
    pub on: Option<String>,

    /// Filterable attribute columns
    #[serde(default)]
    pub attributes: Vec<String>,

    /// Warehouse override
    #[serde(default)]
    pub warehouse: Option<String>,

    /// Staleness bound (e.g. "1 day")
    #[serde(default)]
    pub target_lag: Option<String>,

    /// Embedding model
    #[serde(default)]
    pub embedding_model: Option<String>,

    /// Source query
    #[serde(default)]
    pub source: Option<String>,

    // -- SQL fields --
    /// Statement text
    #[serde(default)]
    pub sql: Option<String>,

    // -- AI function fields --
    /// AI function name
    #[serde(default)]
    pub function: Option<String>,

    /// Named arguments
    #[serde(default)]
    #[schemars(with = "IndexMap<String, serde_json::Value>")]
    pub args: IndexMap<String, serde_yaml_ng::Value>,

    // -- Analyst fields --
    /// Semantic model file as `STAGE/path/model.yaml`
    #[serde(default)]
    pub semantic_model: Option<String>,

    /// Natural-language question
    #[serde(default)]
    pub question: Option<String>,
}

impl Step {
    /// A bare step of the given type; every optional field unset.
    pub fn new(step_type: StepType) -> Self {
        Self {
            step_type,
            state: None,
            depends_on: vec![],
            comment: None,
            name: None,
            encryption: None,
            directory: None,
            allowed_prefixes: vec![],
            enabled: None,
            origin: None,
            api_integration: None,
            repository: None,
            branch: None,
            path: None,
            into: None,
            stage: None,
            main_file: None,
            title: None,
            columns: IndexMap::new(),
            on: None,
            attributes: vec![],
            warehouse: None,
            target_lag: None,
            embedding_model: None,
            source: None,
            sql: None,
            function: None,
            args: IndexMap::new(),
            semantic_model: None,
            question: None,
        }
    }

    /// Builder-style name setter, handy for tests and generated configs.
    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// True when `state: absent`.
    pub fn is_absent(&self) -> bool {
        self.state.as_deref() == Some("absent")
    }
}

/// Step type enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Database,
    Schema,
    Stage,
    ApiIntegration,
    GitRepository,
    Table,
    SearchService,
    Streamlit,
    CopyFiles,
    Sql,
    Query,
    AiFunction,
    Analyst,
}

impl StepType {
    /// Catalog object kind created by this step, if any.
    pub fn object_kind(self) -> Option<ObjectKind> {
        match self {
            Self::Database => Some(ObjectKind::Database),
            Self::Schema => Some(ObjectKind::Schema),
            Self::Stage => Some(ObjectKind::Stage),
            Self::ApiIntegration => Some(ObjectKind::ApiIntegration),
            Self::GitRepository => Some(ObjectKind::GitRepository),
            Self::Table => Some(ObjectKind::Table),
            Self::SearchService => Some(ObjectKind::SearchService),
            Self::Streamlit => Some(ObjectKind::Streamlit),
            Self::CopyFiles | Self::Sql | Self::Query | Self::AiFunction | Self::Analyst => None,
        }
    }

    /// Provisioning steps are hash-tracked in the lock; the rest always run.
    pub fn is_provisioning(self) -> bool {
        !self.produces_output()
    }

    /// Steps whose result is reported and can feed `{{steps.<id>.output}}`.
    pub fn produces_output(self) -> bool {
        matches!(self, Self::Query | Self::AiFunction | Self::Analyst)
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Database => "database",
            Self::Schema => "schema",
            Self::Stage => "stage",
            Self::ApiIntegration => "api_integration",
            Self::GitRepository => "git_repository",
            Self::Table => "table",
            Self::SearchService => "search_service",
            Self::Streamlit => "streamlit",
            Self::CopyFiles => "copy_files",
            Self::Sql => "sql",
            Self::Query => "query",
            Self::AiFunction => "ai_function",
            Self::Analyst => "analyst",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// Policy
// ============================================================================

/// Execution policy.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Policy {
    /// Persist the lock after every run
    #[serde(default = "default_true")]
    pub lock_file: bool,

    /// Append provenance events to events.jsonl
    #[serde(default = "default_true")]
    pub events: bool,

    /// Drop objects whose step was removed from the file
    #[serde(default = "default_true")]
    pub prune: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            lock_file: true,
            events: true,
            prune: true,
        }
    }
}

fn default_true() -> bool {
    true
}

// ============================================================================
// State / Lock file
// ============================================================================

/// Per-pipeline state lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateLock {
    /// Schema version
    pub schema: String,

    /// Pipeline name
    pub pipeline: String,

    /// Platform account the pipeline ran against
    pub account: String,

    /// When the lock was generated
    pub generated_at: String,

    /// Generator version
    pub generator: String,

    /// BLAKE3 version
    pub blake3_version: String,

    /// Per-step state
    pub steps: IndexMap<String, StepLock>,
}

/// Per-step lock entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepLock {
    /// Step type
    #[serde(rename = "type")]
    pub step_type: StepType,

    /// Convergence status
    pub status: StepStatus,

    /// Qualified catalog object name, for object-creating steps
    #[serde(default)]
    pub object: Option<String>,

    /// When the step was last applied
    #[serde(default)]
    pub applied_at: Option<String>,

    /// Duration of last apply in seconds
    #[serde(default)]
    pub duration_seconds: Option<f64>,

    /// BLAKE3 hash of the resolved desired state
    pub hash: String,
}

/// Step convergence status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Converged,
    Failed,
    Drifted,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Converged => write!(f, "CONVERGED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Drifted => write!(f, "DRIFTED"),
        }
    }
}

// ============================================================================
// Plan
// ============================================================================

/// Action to take on a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanAction {
    Create,
    Replace,
    Run,
    Destroy,
    NoOp,
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Replace => write!(f, "REPLACE"),
            Self::Run => write!(f, "RUN"),
            Self::Destroy => write!(f, "DESTROY"),
            Self::NoOp => write!(f, "NO-OP"),
        }
    }
}

/// A single planned change.
#[derive(Debug, Clone)]
pub struct PlannedChange {
    /// Step ID
    pub step_id: String,

    /// Step type
    pub step_type: StepType,

    /// Action to take
    pub action: PlanAction,

    /// Qualified object name, when the step owns one
    pub object: Option<String>,

    /// Object the lock recorded under a different name; dropped before the
    /// replacement is created
    pub previous: Option<ObjectRef>,

    /// Human-readable description
    pub description: String,
}

/// Full execution plan.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// Pipeline name
    pub name: String,

    /// Planned changes in execution order
    pub changes: Vec<PlannedChange>,

    /// Topological execution order (step IDs)
    pub execution_order: Vec<String>,

    /// Summary counts
    pub to_create: u32,
    pub to_replace: u32,
    pub to_run: u32,
    pub to_destroy: u32,
    pub unchanged: u32,
}

// ============================================================================
// Provenance events
// ============================================================================

/// Provenance event for the JSONL event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProvenanceEvent {
    RunStarted {
        pipeline: String,
        handson_version: String,
    },
    StepStarted {
        pipeline: String,
        step: String,
        action: String,
    },
    StepConverged {
        pipeline: String,
        step: String,
        duration_seconds: f64,
        hash: String,
    },
    StepFailed {
        pipeline: String,
        step: String,
        error: String,
    },
    RunCompleted {
        pipeline: String,
        steps_converged: u32,
        steps_unchanged: u32,
        steps_failed: u32,
        total_seconds: f64,
    },
    DriftDetected {
        pipeline: String,
        step: String,
        object: String,
        detail: String,
    },
}

/// One line of the event log: when, which run, what.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: DateTime<Utc>,
    pub run: String,
    #[serde(flatten)]
    pub event: ProvenanceEvent,
}

// ============================================================================
// Run result
// ============================================================================

/// Value produced by an invoking step.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StepValue {
    Ai(AiOutput),
    Table(QueryResult),
    Analyst(AnalystAnswer),
}

impl StepValue {
    /// Plain text substituted for `{{steps.<id>.output}}`.
    ///
    /// Search hits become one `FIELD: value` block per hit, so they read as
    /// retrieved context in a prompt.
    pub fn context_text(&self) -> String {
        match self {
            Self::Ai(AiOutput::Text { text, .. }) => text.clone(),
            Self::Ai(AiOutput::Hits { hits }) => hits
                .iter()
                .map(hit_context)
                .collect::<Vec<_>>()
                .join("\n\n"),
            Self::Ai(other) => other.to_string(),
            Self::Table(table) => table.to_string(),
            Self::Analyst(answer) => match &answer.result {
                Some(table) => table.to_string(),
                None => answer.text.clone(),
            },
        }
    }
}

fn hit_context(hit: &serde_json::Value) -> String {
    let Some(fields) = hit.as_object() else {
        return hit.to_string();
    };
    fields
        .iter()
        .map(|(k, v)| match v.as_str() {
            Some(s) => format!("{}: {}", k, s),
            None => format!("{}: {}", k, v),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

impl fmt::Display for StepValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ai(out) => write!(f, "{}", out),
            Self::Table(table) => write!(f, "{}", table),
            Self::Analyst(answer) => write!(f, "{}", answer),
        }
    }
}

/// Output of one invoking step.
#[derive(Debug, Clone, Serialize)]
pub struct StepOutput {
    pub step_id: String,
    pub value: StepValue,
}

/// Result of one pipeline run.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub pipeline: String,
    pub steps_converged: u32,
    pub steps_unchanged: u32,
    pub steps_failed: u32,
    pub outputs: Vec<StepOutput>,
    /// `step-id: message` of the failure that aborted the run
    pub failure: Option<String>,
    pub total_duration: std::time::Duration,
}

// ============================================================================
// Value helpers
// ============================================================================

/// Convert a serde_yaml_ng::Value to a string for template resolution.
pub fn yaml_value_to_string(val: &serde_yaml_ng::Value) -> String {
    match val {
        serde_yaml_ng::Value::String(s) => s.clone(),
        serde_yaml_ng::Value::Number(n) => n.to_string(),
        serde_yaml_ng::Value::Bool(b) => b.to_string(),
        serde_yaml_ng::Value::Null => String::new(),
        other => format!("{:?}", other),
    }
}

/// Convert a YAML value to JSON for argument binding.
pub fn yaml_to_json(val: &serde_yaml_ng::Value) -> Result<serde_json::Value, String> {
    serde_json::to_value(val).map_err(|e| format!("cannot convert argument to JSON: {}", e))
}

// ============================================================================
// Tests
// ============================================================================
