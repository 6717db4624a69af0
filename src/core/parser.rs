//! HS-002: YAML parsing and validation.
//!
//! Parses handson.yaml and validates structural constraints:
//! - Version must be "1.0", name and account non-empty
//! - depends_on references must exist
//! - Required fields and identifier rules per step type
//! - AI function arguments must match the function signature
//! - `{{steps.<id>.output}}` must name an earlier output-producing step
//!
//! Validation collects every error instead of stopping at the first one.

use super::resolver::{output_references, resolve_session, resolve_step_templates, step_object};
use super::types::*;
use crate::catalog::repository::origin_allowed;
use crate::catalog::{qualify, split_stage_path, ObjectKind};
use crate::cortex::functions::bind_args;
use crate::cortex::{AiFunction, FunctionCatalog};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::path::Path;

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a handson.yaml file from disk.
pub fn parse_config_file(path: &Path) -> Result<PipelineConfig, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_config(&content)
}

/// Parse a handson.yaml from a string.
pub fn parse_config(yaml: &str) -> Result<PipelineConfig, String> {
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

/// Validate a parsed config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &PipelineConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut push = |message: String| errors.push(ValidationError { message });

    if config.version != "1.0" {
        push(format!("version must be \"1.0\", got \"{}\"", config.version));
    }
    if config.name.trim().is_empty() {
        push("name must not be empty".to_string());
    }
    if config.connection.account.trim().is_empty() {
        push("connection.account must not be empty".to_string());
    }

    for (id, step) in &config.steps {
        for dep in &step.depends_on {
            if dep == id {
                push(format!("step '{}' depends on itself", id));
            } else if !config.steps.contains_key(dep) {
                push(format!("step '{}' depends on unknown step '{}'", id, dep));
            }
        }
    }

    let session = match resolve_session(&config.connection, &config.params) {
        Ok(s) => s,
        Err(e) => {
            push(format!("connection: {}", e));
            return errors;
        }
    };

    let mut resolved: IndexMap<&str, Step> = IndexMap::new();
    for (id, step) in &config.steps {
        match resolve_step_templates(step, &config.params, &session) {
            Ok(s) => {
                resolved.insert(id.as_str(), s);
            }
            Err(e) => push(format!("step '{}': {}", id, e)),
        }
    }

    let catalog = FunctionCatalog::from_config(&config.functions);
    let mut owners: HashMap<String, &str> = HashMap::new();
    for (id, step) in &resolved {
        for message in validate_step(step, &resolved, &session, &catalog) {
            push(format!("step '{}' ({}): {}", id, step.step_type, message));
        }
        for message in validate_output_refs(id, step, &resolved) {
            push(format!("step '{}' ({}): {}", id, step.step_type, message));
        }
        if let Ok(Some(object)) = step_object(step, &session) {
            let key = object.to_string();
            if let Some(first) = owners.insert(key.clone(), *id) {
                push(format!("steps '{}' and '{}' both declare {}", first, id, key));
            }
        }
    }

    errors
}

fn require<'a>(errors: &mut Vec<String>, field: &str, value: &'a Option<String>) -> Option<&'a str> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Some(v),
        _ => {
            errors.push(format!("missing '{}'", field));
            None
        }
    }
}

/// Per-type checks on one resolved step.
fn validate_step(
    step: &Step,
    steps: &IndexMap<&str, Step>,
    session: &Session,
    catalog: &FunctionCatalog,
) -> Vec<String> {
    let mut errors = Vec::new();

    if let Some(state) = step.state.as_deref() {
        if state != "present" && state != "absent" {
            errors.push(format!("state must be present or absent, got '{}'", state));
        }
        if state == "absent" && !step.step_type.is_provisioning() {
            errors.push("state: absent only applies to provisioning steps".to_string());
        }
    }

    if let Some(kind) = step.step_type.object_kind() {
        if let Some(name) = require(&mut errors, "name", &step.name) {
            if let Err(e) = qualify(kind, name, session) {
                errors.push(e);
            }
        }
    }

    match step.step_type {
        StepType::Table if step.columns.is_empty() => {
            errors.push("table has no columns".to_string());
        }
        StepType::ApiIntegration => {
            if step.allowed_prefixes.is_empty() {
                errors.push("missing 'allowed_prefixes'".to_string());
            }
            for prefix in &step.allowed_prefixes {
                if !prefix.starts_with("https://") {
                    errors.push(format!("allowed prefix '{}' must start with https://", prefix));
                }
            }
        }
        StepType::GitRepository => {
            let origin = require(&mut errors, "origin", &step.origin);
            let integration = require(&mut errors, "api_integration", &step.api_integration);
            if let Some(origin) = origin {
                if !origin.starts_with("https://") {
                    errors.push(format!("origin '{}' must be an https URL", origin));
                }
                if let Some(prefixes) = integration.and_then(|i| declared_prefixes(i, steps, session)) {
                    if !origin_allowed(origin, prefixes) {
                        errors.push(format!(
                            "origin '{}' is not under any allowed prefix of integration '{}'",
                            origin,
                            integration.unwrap_or_default()
                        ));
                    }
                }
            }
        }
        StepType::CopyFiles => {
            if let Some(repo) = require(&mut errors, "repository", &step.repository) {
                if let Err(e) = qualify(ObjectKind::GitRepository, repo, session) {
                    errors.push(e);
                }
            }
            if let Some(into) = require(&mut errors, "into", &step.into) {
                if let Err(e) = qualify(ObjectKind::Stage, split_stage_path(into).0, session) {
                    errors.push(e);
                }
            }
        }
        StepType::SearchService => {
            require(&mut errors, "on", &step.on);
            require(&mut errors, "source", &step.source);
            if step.warehouse.is_none() && session.warehouse.is_none() {
                errors.push("needs a warehouse (step or connection)".to_string());
            }
        }
        StepType::Streamlit => {
            require(&mut errors, "main_file", &step.main_file);
            match (&step.repository, &step.stage) {
                (None, None) => errors.push("needs 'repository' or 'stage'".to_string()),
                (Some(_), Some(_)) => {
                    errors.push("'repository' and 'stage' are mutually exclusive".to_string())
                }
                _ => {}
            }
        }
        StepType::Sql | StepType::Query => {
            require(&mut errors, "sql", &step.sql);
        }
        StepType::AiFunction => {
            if let Some(name) = require(&mut errors, "function", &step.function) {
                match name.parse::<AiFunction>() {
                    Ok(function) => errors.extend(validate_ai_args(function, step, catalog)),
                    Err(e) => errors.push(e),
                }
            }
        }
        StepType::Analyst => {
            if let Some(model) = require(&mut errors, "semantic_model", &step.semantic_model) {
                match split_stage_path(model) {
                    (stage, Some(file)) => {
                        if let Err(e) = qualify(ObjectKind::Stage, stage, session) {
                            errors.push(e);
                        }
                        if !file.ends_with(".yaml") && !file.ends_with(".yml") {
                            errors.push(format!("semantic model '{}' is not a YAML file", file));
                        }
                    }
                    (_, None) => errors.push(format!(
                        "semantic_model '{}' must be STAGE/path/model.yaml",
                        model
                    )),
                }
            }
            require(&mut errors, "question", &step.question);
        }
        _ => {}
    }

    errors
}

/// `{{steps.<id>.output}}` may only feed, and come from, steps that produce output.
fn validate_output_refs(id: &str, step: &Step, steps: &IndexMap<&str, Step>) -> Vec<String> {
    let sources = output_references(step);
    let mut errors = Vec::new();
    if !sources.is_empty() && !step.step_type.produces_output() {
        errors.push("step outputs can only be used by query, ai_function and analyst steps".to_string());
    }
    for source in sources {
        match steps.get(source.as_str()) {
            _ if source == id => errors.push("uses its own output".to_string()),
            None => errors.push(format!("uses the output of unknown step '{}'", source)),
            Some(s) if !s.step_type.produces_output() => {
                errors.push(format!("step '{}' ({}) has no output", source, s.step_type))
            }
            Some(_) => {}
        }
    }
    errors
}

/// Allowed prefixes of an integration declared in the same file.
fn declared_prefixes<'a>(
    integration: &str,
    steps: &'a IndexMap<&str, Step>,
    session: &Session,
) -> Option<&'a [String]> {
    let wanted = qualify(ObjectKind::ApiIntegration, integration, session).ok()?;
    steps
        .values()
        .filter(|s| s.step_type == StepType::ApiIntegration && !s.is_absent())
        .find(|s| {
            s.name
                .as_deref()
                .and_then(|n| qualify(ObjectKind::ApiIntegration, n, session).ok())
                .as_deref()
                == Some(wanted.as_str())
        })
        .map(|s| s.allowed_prefixes.as_slice())
}

fn validate_ai_args(function: AiFunction, step: &Step, catalog: &FunctionCatalog) -> Vec<String> {
    let mut errors = Vec::new();
    if let Err(e) = catalog.resolve(function) {
        errors.push(e);
    }
    let mut args = IndexMap::new();
    for (k, v) in &step.args {
        match yaml_to_json(v) {
            Ok(json) => {
                args.insert(k.clone(), json);
            }
            Err(e) => errors.push(format!("argument '{}': {}", k, e)),
        }
    }
    if let Err(e) = bind_args(function, &args) {
        errors.push(e);
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
version: "1.0"
name: test
connection:
  account: myorg-lab
  warehouse: COMPUTE_WH
  database: SNOWRETAIL_DB
  schema: SNOWRETAIL_SCHEMA
"#;

    fn with_steps(steps: &str) -> PipelineConfig {
        parse_config(&format!("{}steps:\n{}", BASE, steps)).unwrap()
    }

    fn messages(config: &PipelineConfig) -> Vec<String> {
        validate_config(config).into_iter().map(|e| e.message).collect()
    }

    #[test]
    fn test_hs002_parse_valid() {
        let config = with_steps(
            r#"
  db:
    type: database
    name: SNOWRETAIL_DB
  sentiment:
    type: ai_function
    function: sentiment
    args: { text: "I love this jacket" }
"#,
        );
        assert_eq!(config.name, "test");
        let errors = messages(&config);
        assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
    }

    #[test]
    fn test_hs002_bad_version_and_empty_account() {
        let yaml = r#"
version: "2.0"
name: test
connection: { account: "" }
steps: {}
"#;
        let errors = messages(&parse_config(yaml).unwrap());
        assert!(errors.iter().any(|e| e.contains("version")));
        assert!(errors.iter().any(|e| e.contains("connection.account")));
    }

    #[test]
    fn test_hs002_unknown_and_self_dependency() {
        let config = with_steps(
            r#"
  a: { type: sql, sql: "SELECT 1", depends_on: [ghost, a] }
"#,
        );
        let errors = messages(&config);
        assert!(errors.iter().any(|e| e.contains("unknown step 'ghost'")));
        assert!(errors.iter().any(|e| e.contains("depends on itself")));
    }

    #[test]
    fn test_hs002_reports_every_error() {
        let config = with_steps(
            r#"
  t: { type: table, name: reviews }
  s: { type: stage }
  q: { type: query }
"#,
        );
        let errors = messages(&config);
        assert_eq!(errors.len(), 3, "{:?}", errors);
        assert!(errors[0].contains("table has no columns"));
        assert!(errors[1].contains("missing 'name'"));
        assert!(errors[2].contains("missing 'sql'"));
    }

    #[test]
    fn test_hs002_invalid_identifier() {
        let config = with_steps("  s: { type: stage, name: \"my-stage\" }\n");
        let errors = messages(&config);
        assert!(errors[0].contains("invalid identifier 'my-stage'"));
    }

    #[test]
    fn test_hs002_origin_must_match_integration() {
        let config = with_steps(
            r#"
  api:
    type: api_integration
    name: git_api
    allowed_prefixes: ["https://github.com/snowflakejp/"]
  repo:
    type: git_repository
    name: retail_repo
    api_integration: git_api
    origin: https://gitlab.com/someone/else.git
"#,
        );
        let errors = messages(&config);
        assert!(errors.iter().any(|e| e.contains("not under any allowed prefix")));
    }

    #[test]
    fn test_hs002_prefix_must_be_https() {
        let config = with_steps(
            "  api: { type: api_integration, name: git_api, allowed_prefixes: [\"http://x/\"] }\n",
        );
        assert!(messages(&config)[0].contains("must start with https://"));
    }

    #[test]
    fn test_hs002_ai_args_checked() {
        let config = with_steps(
            r#"
  t:
    type: ai_function
    function: translate
    args: { text: こんにちは, lang: en }
"#,
        );
        let errors = messages(&config);
        assert!(errors.iter().any(|e| e.contains("no argument 'lang'")));
    }

    #[test]
    fn test_hs002_unknown_function() {
        let config = with_steps("  t: { type: ai_function, function: paraphrase }\n");
        assert!(messages(&config)[0].contains("unknown AI function 'paraphrase'"));
    }

    #[test]
    fn test_hs002_function_missing_from_catalog() {
        let yaml = format!(
            "{}functions: {{ catalog: cortex }}\nsteps:\n  f: {{ type: ai_function, function: filter, args: {{ predicate: \"is it about sizing?\" }} }}\n",
            BASE
        );
        let errors = messages(&parse_config(&yaml).unwrap());
        assert!(errors[0].contains("not available in catalog 'cortex'"));
    }

    #[test]
    fn test_hs002_unknown_template() {
        let config = with_steps("  d: { type: database, name: \"{{params.db}}\" }\n");
        assert!(messages(&config)[0].contains("unknown param: db"));
    }

    #[test]
    fn test_hs002_duplicate_object() {
        let config = with_steps(
            r#"
  a: { type: stage, name: file }
  b: { type: stage, name: FILE }
"#,
        );
        assert!(messages(&config)[0].contains("both declare stage SNOWRETAIL_DB.SNOWRETAIL_SCHEMA.FILE"));
    }

    #[test]
    fn test_hs002_streamlit_source() {
        let config = with_steps("  app: { type: streamlit, name: app, main_file: app.py }\n");
        assert!(messages(&config)[0].contains("needs 'repository' or 'stage'"));
    }

    #[test]
    fn test_hs002_analyst_fields() {
        let config = with_steps(
            r#"
  ok:
    type: analyst
    semantic_model: semantic_model_stage/sales_analysis_model.yaml
    question: 月別の売上推移は？
  no_file:
    type: analyst
    semantic_model: semantic_model_stage
  wrong_ext:
    type: analyst
    semantic_model: semantic_model_stage/model.json
    question: sales?
"#,
        );
        let errors = messages(&config);
        assert_eq!(errors.len(), 3, "{:?}", errors);
        assert!(errors[0].contains("'no_file'") && errors[0].contains("STAGE/path/model.yaml"));
        assert!(errors[1].contains("'no_file'") && errors[1].contains("missing 'question'"));
        assert!(errors[2].contains("'model.json' is not a YAML file"));
    }

    #[test]
    fn test_hs002_output_references_checked() {
        let config = with_steps(
            r#"
  db: { type: database, name: SNOWRETAIL_DB }
  search:
    type: ai_function
    function: search
    args: { service: review_search, query: returns, columns: [CONTENT] }
  answer:
    type: ai_function
    function: complete
    args: { prompt: "Context: {{steps.search.output}}" }
  from_db:
    type: query
    sql: "SELECT '{{steps.db.output}}'"
  into_sql:
    type: sql
    sql: "INSERT INTO T VALUES ('{{steps.search.output}}')"
  itself:
    type: query
    sql: "SELECT '{{steps.itself.output}}'"
"#,
        );
        let errors = messages(&config);
        assert_eq!(errors.len(), 3, "{:?}", errors);
        assert!(errors[0].contains("step 'db' (database) has no output"));
        assert!(errors[1].contains("'into_sql'") && errors[1].contains("can only be used by"));
        assert!(errors[2].contains("'itself'") && errors[2].contains("its own output"));
    }

    #[test]
    fn test_hs002_parse_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("handson.yaml");
        std::fs::write(&path, format!("{}steps: {{}}\n", BASE)).unwrap();
        let config = parse_config_file(&path).unwrap();
        assert_eq!(config.name, "test");
    }

    #[test]
    fn test_hs002_parse_invalid_yaml() {
        assert!(parse_config("not: [valid: yaml: {{").is_err());
    }
}
