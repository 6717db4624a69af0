//! HS-021: Versioned AI function catalog and invocation rendering.
//!
//! A catalog version maps each [`AiFunction`] onto a platform SQL function.
//! Per-function overrides replace the SQL name without touching argument
//! shapes, so a deployment can pin a custom UDF or a newer builtin.

use super::functions::{bind_args, AiFunction, ParamShape};
use crate::core::types::FunctionsConfig;
use crate::platform::Binding;
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Named function catalog version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CatalogVersion {
    /// Current `AI_*` functions
    #[default]
    Ai,
    /// Legacy `SNOWFLAKE.CORTEX.*` functions
    Cortex,
}

impl CatalogVersion {
    /// Builtin SQL function for `function`, if this version provides one.
    pub fn sql_function(self, function: AiFunction) -> Option<&'static str> {
        use AiFunction::*;
        let shared = match function {
            Translate => Some("SNOWFLAKE.CORTEX.TRANSLATE"),
            Sentiment => Some("SNOWFLAKE.CORTEX.SENTIMENT"),
            EntitySentiment => Some("SNOWFLAKE.CORTEX.ENTITY_SENTIMENT"),
            SplitText => Some("SNOWFLAKE.CORTEX.SPLIT_TEXT_RECURSIVE_CHARACTER"),
            Search => Some("SNOWFLAKE.CORTEX.SEARCH_PREVIEW"),
            _ => None,
        };
        if shared.is_some() {
            return shared;
        }
        match (self, function) {
            (Self::Cortex, Embed) => Some("SNOWFLAKE.CORTEX.EMBED_TEXT_1024"),
            (Self::Cortex, Classify) => Some("SNOWFLAKE.CORTEX.CLASSIFY_TEXT"),
            (Self::Cortex, Summarize) => Some("SNOWFLAKE.CORTEX.SUMMARIZE"),
            (Self::Cortex, Complete | CompleteStructured) => Some("SNOWFLAKE.CORTEX.COMPLETE"),
            (Self::Cortex, Filter | Aggregate | Similarity) => None,
            (Self::Ai, Embed) => Some("AI_EMBED"),
            (Self::Ai, Classify) => Some("AI_CLASSIFY"),
            (Self::Ai, Filter) => Some("AI_FILTER"),
            (Self::Ai, Aggregate) => Some("AI_AGG"),
            (Self::Ai, Summarize) => Some("AI_SUMMARIZE_AGG"),
            (Self::Ai, Similarity) => Some("AI_SIMILARITY"),
            (Self::Ai, Complete | CompleteStructured) => Some("AI_COMPLETE"),
            _ => None,
        }
    }
}

impl fmt::Display for CatalogVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ai => write!(f, "ai"),
            Self::Cortex => write!(f, "cortex"),
        }
    }
}

impl std::str::FromStr for CatalogVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ai" => Ok(Self::Ai),
            "cortex" => Ok(Self::Cortex),
            other => Err(format!("unknown function catalog '{}' (expected ai or cortex)", other)),
        }
    }
}

/// Rendered `SELECT <call> AS RESULT` with its binds.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub function: AiFunction,
    pub sql: String,
    pub bindings: Vec<Binding>,
    /// Arguments after default filling, by parameter name
    pub args: IndexMap<String, Value>,
}

/// A catalog version plus overrides.
#[derive(Debug, Clone, Default)]
pub struct FunctionCatalog {
    version: CatalogVersion,
    overrides: IndexMap<AiFunction, String>,
}

impl FunctionCatalog {
    pub fn new(version: CatalogVersion) -> Self {
        Self {
            version,
            overrides: IndexMap::new(),
        }
    }

    pub fn from_config(config: &FunctionsConfig) -> Self {
        Self {
            version: config.catalog,
            overrides: config.overrides.clone(),
        }
    }

    pub fn with_override(mut self, function: AiFunction, sql_name: &str) -> Self {
        self.overrides.insert(function, sql_name.to_string());
        self
    }

    pub fn version(&self) -> CatalogVersion {
        self.version
    }

    /// SQL function name, override first.
    pub fn resolve(&self, function: AiFunction) -> Result<String, String> {
        if let Some(name) = self.overrides.get(&function) {
            return Ok(name.clone());
        }
        self.version
            .sql_function(function)
            .map(str::to_string)
            .ok_or_else(|| {
                format!(
                    "function '{}' is not available in catalog '{}'",
                    function, self.version
                )
            })
    }

    /// Render the invocation statement for named arguments.
    pub fn invocation(
        &self,
        function: AiFunction,
        args: &IndexMap<String, Value>,
    ) -> Result<Invocation, String> {
        let sql_name = self.resolve(function)?;
        let bound = bind_args(function, args)?;
        let named: IndexMap<String, Value> = bound
            .iter()
            .map(|(p, v)| (p.name.to_string(), v.clone()))
            .collect();

        let (call, bindings) = match function {
            AiFunction::Search => search_call(&sql_name, &named)?,
            AiFunction::CompleteStructured => self.structured_call(&sql_name, &named)?,
            _ => {
                let mut placeholders = Vec::with_capacity(bound.len());
                let mut bindings = Vec::with_capacity(bound.len());
                for (param, value) in &bound {
                    let (placeholder, binding) = bind_value(param.shape, value)?;
                    placeholders.push(placeholder);
                    bindings.push(binding);
                }
                (format!("{}({})", sql_name, placeholders.join(", ")), bindings)
            }
        };

        Ok(Invocation {
            function,
            sql: format!("SELECT {} AS RESULT", call),
            bindings,
            args: named,
        })
    }

    fn structured_call(
        &self,
        sql_name: &str,
        args: &IndexMap<String, Value>,
    ) -> Result<(String, Vec<Binding>), String> {
        let model = text_arg(args, "model")?;
        let prompt = text_arg(args, "prompt")?;
        let schema = args
            .get("schema")
            .ok_or("complete_structured requires argument 'schema'")?;
        let format = response_format(schema);
        let bindings = vec![
            Binding::text(model),
            Binding::text(prompt),
            Binding::text(format.to_string()),
        ];
        let call = match self.version {
            CatalogVersion::Ai => format!(
                "{}(model => ?, prompt => ?, response_format => PARSE_JSON(?))",
                sql_name
            ),
            CatalogVersion::Cortex => format!(
                "{}(?, ARRAY_CONSTRUCT(OBJECT_CONSTRUCT('role', 'user', 'content', ?)), \
                 OBJECT_CONSTRUCT('response_format', PARSE_JSON(?)))",
                sql_name
            ),
        };
        Ok((call, bindings))
    }
}

/// Placeholder and binding for one argument.
fn bind_value(shape: ParamShape, value: &Value) -> Result<(&'static str, Binding), String> {
    match (shape, value) {
        (ParamShape::Text, Value::String(s)) => Ok(("?", Binding::text(s.as_str()))),
        (ParamShape::Integer, Value::Number(n)) => n
            .as_i64()
            .map(|n| ("?", Binding::fixed(n)))
            .ok_or_else(|| format!("integer argument out of range: {}", n)),
        (ParamShape::Array | ParamShape::Object, v) => Ok(("PARSE_JSON(?)", Binding::text(v.to_string()))),
        (shape, v) => Err(format!("cannot bind {} as {}", v, shape)),
    }
}

fn text_arg(args: &IndexMap<String, Value>, name: &str) -> Result<String, String> {
    args.get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| format!("missing text argument '{}'", name))
}

/// Search takes the service name and one JSON request document.
fn search_call(
    sql_name: &str,
    args: &IndexMap<String, Value>,
) -> Result<(String, Vec<Binding>), String> {
    let service = text_arg(args, "service")?;
    let mut request = json!({
        "query": args.get("query").cloned().unwrap_or(Value::Null),
        "columns": args.get("columns").cloned().unwrap_or_else(|| json!([])),
        "limit": args.get("limit").cloned().unwrap_or_else(|| json!(3)),
    });
    if let (Some(filter), Some(obj)) = (args.get("filter"), request.as_object_mut()) {
        obj.insert("filter".to_string(), filter.clone());
    }
    Ok((
        format!("{}(?, ?)", sql_name),
        vec![Binding::text(service), Binding::text(request.to_string())],
    ))
}

/// Wrap a bare JSON schema as `{"type":"json","schema":...}`.
fn response_format(schema: &Value) -> Value {
    let already_wrapped = schema.get("type").and_then(Value::as_str) == Some("json")
        && schema.get("schema").is_some();
    if already_wrapped {
        schema.clone()
    } else {
        json!({ "type": "json", "schema": schema })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::BindKind;

    fn args(pairs: &[(&str, Value)]) -> IndexMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_hs021_every_function_in_ai_catalog() {
        let catalog = FunctionCatalog::new(CatalogVersion::Ai);
        for f in AiFunction::ALL {
            assert!(catalog.resolve(f).is_ok(), "{} missing", f);
        }
    }

    #[test]
    fn test_hs021_cortex_missing_functions() {
        let catalog = FunctionCatalog::new(CatalogVersion::Cortex);
        let err = catalog.resolve(AiFunction::Filter).unwrap_err();
        assert_eq!(err, "function 'filter' is not available in catalog 'cortex'");
        assert!(catalog.resolve(AiFunction::Aggregate).is_err());
        assert!(catalog.resolve(AiFunction::Similarity).is_err());
        assert_eq!(
            catalog.resolve(AiFunction::Classify).unwrap(),
            "SNOWFLAKE.CORTEX.CLASSIFY_TEXT"
        );
    }

    #[test]
    fn test_hs021_override_wins() {
        let catalog = FunctionCatalog::new(CatalogVersion::Cortex)
            .with_override(AiFunction::Filter, "MY_DB.PUBLIC.MY_FILTER");
        assert_eq!(catalog.resolve(AiFunction::Filter).unwrap(), "MY_DB.PUBLIC.MY_FILTER");
    }

    #[test]
    fn test_hs021_translate_invocation() {
        let inv = FunctionCatalog::default()
            .invocation(
                AiFunction::Translate,
                &args(&[("text", json!("こんにちは")), ("to", json!("en"))]),
            )
            .unwrap();
        assert_eq!(
            inv.sql,
            "SELECT SNOWFLAKE.CORTEX.TRANSLATE(?, ?, ?) AS RESULT"
        );
        let values: Vec<&str> = inv.bindings.iter().map(|b| b.value.as_str()).collect();
        assert_eq!(values, vec!["こんにちは", "", "en"]);
        assert_eq!(inv.args["from"], json!(""));
    }

    #[test]
    fn test_hs021_split_text_binds_integers() {
        let inv = FunctionCatalog::default()
            .invocation(AiFunction::SplitText, &args(&[("text", json!("long review"))]))
            .unwrap();
        assert_eq!(inv.bindings[2].kind, BindKind::Fixed);
        assert_eq!(inv.bindings[2].value, "300");
        assert_eq!(inv.bindings[3].value, "30");
    }

    #[test]
    fn test_hs021_classify_parses_array() {
        let inv = FunctionCatalog::default()
            .invocation(
                AiFunction::Classify,
                &args(&[
                    ("text", json!("the jacket ripped")),
                    ("categories", json!(["complaint", "praise"])),
                ]),
            )
            .unwrap();
        assert_eq!(inv.sql, "SELECT AI_CLASSIFY(?, PARSE_JSON(?)) AS RESULT");
        assert_eq!(inv.bindings[1].value, r#"["complaint","praise"]"#);
    }

    #[test]
    fn test_hs021_search_request_document() {
        let inv = FunctionCatalog::default()
            .invocation(
                AiFunction::Search,
                &args(&[
                    ("service", json!("DB.SCH.REVIEW_SEARCH")),
                    ("query", json!("sizing issues")),
                    ("columns", json!(["REVIEW_TEXT", "PRODUCT"])),
                ]),
            )
            .unwrap();
        assert_eq!(
            inv.sql,
            "SELECT SNOWFLAKE.CORTEX.SEARCH_PREVIEW(?, ?) AS RESULT"
        );
        assert_eq!(inv.bindings[0].value, "DB.SCH.REVIEW_SEARCH");
        let request: Value = serde_json::from_str(&inv.bindings[1].value).unwrap();
        assert_eq!(request["limit"], json!(3));
        assert_eq!(request["query"], json!("sizing issues"));
        assert!(request.get("filter").is_none());
    }

    #[test]
    fn test_hs021_structured_completion_per_version() {
        let a = args(&[
            ("prompt", json!("extract the product")),
            ("schema", json!({"type": "object", "properties": {"product": {"type": "string"}}})),
        ]);
        let ai = FunctionCatalog::new(CatalogVersion::Ai)
            .invocation(AiFunction::CompleteStructured, &a)
            .unwrap();
        assert!(ai.sql.contains("AI_COMPLETE(model => ?, prompt => ?, response_format => PARSE_JSON(?))"));
        let format: Value = serde_json::from_str(&ai.bindings[2].value).unwrap();
        assert_eq!(format["type"], json!("json"));
        assert_eq!(format["schema"]["type"], json!("object"));

        let cortex = FunctionCatalog::new(CatalogVersion::Cortex)
            .invocation(AiFunction::CompleteStructured, &a)
            .unwrap();
        assert!(cortex.sql.starts_with("SELECT SNOWFLAKE.CORTEX.COMPLETE(?, ARRAY_CONSTRUCT("));
        assert_eq!(cortex.bindings[0].value, "claude-3-5-sonnet");
    }

    #[test]
    fn test_hs021_catalog_version_from_str() {
        assert_eq!("Cortex".parse::<CatalogVersion>().unwrap(), CatalogVersion::Cortex);
        assert!("v2".parse::<CatalogVersion>().is_err());
        assert_eq!(CatalogVersion::default(), CatalogVersion::Ai);
    }
}
