//! In-memory platform: a catalog of object names plus fixed-value AI stubs.
//!
//! Interprets each statement's [`Effect`] rather than its SQL. Upserts need
//! their parent and every referenced object to exist; replacing or dropping a
//! database or schema removes everything inside it.

use super::{AiCall, Effect, Platform, PlatformError, QueryResult, Statement};
use crate::catalog::{ObjectKind, ObjectRef};
use crate::core::types::Session;
use crate::cortex::{AiFunction, AnalystAnswer, AnalystRequest, ReturnShape};
use indexmap::{IndexMap, IndexSet};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::debug;

/// Stub answering one AI function: bound arguments in, raw `RESULT` cell out.
pub type Responder = Box<dyn Fn(&IndexMap<String, Value>) -> Option<String>>;

/// Stub answering analyst questions.
pub type AnalystResponder = Box<dyn Fn(&str) -> AnalystAnswer>;

#[derive(Default)]
pub struct MemoryPlatform {
    objects: IndexSet<ObjectRef>,
    responders: HashMap<AiFunction, Responder>,
    analyst: Option<AnalystResponder>,
    questions: Vec<String>,
    queries: HashMap<String, QueryResult>,
    failures: Vec<(String, PlatformError)>,
    copies: Vec<(ObjectRef, ObjectRef)>,
    executed: Vec<String>,
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stub for one function.
    pub fn register<F>(&mut self, function: AiFunction, responder: F)
    where
        F: Fn(&IndexMap<String, Value>) -> Option<String> + 'static,
    {
        self.responders.insert(function, Box::new(responder));
    }

    /// Stub that always answers `value`.
    pub fn register_fixed(&mut self, function: AiFunction, value: &str) {
        let value = value.to_string();
        self.register(function, move |_| Some(value.clone()));
    }

    /// Replace the analyst stub.
    pub fn register_analyst<F>(&mut self, responder: F)
    where
        F: Fn(&str) -> AnalystAnswer + 'static,
    {
        self.analyst = Some(Box::new(responder));
    }

    /// Canned result for an exact SQL text.
    pub fn register_query(&mut self, sql: &str, result: QueryResult) {
        self.queries.insert(sql.trim().to_string(), result);
    }

    /// Fail every statement whose SQL contains `fragment`.
    pub fn fail_when(&mut self, fragment: &str, error: PlatformError) {
        self.failures.push((fragment.to_string(), error));
    }

    /// Seed an object without going through a statement.
    pub fn insert(&mut self, object: ObjectRef) {
        self.objects.insert(object);
    }

    pub fn contains(&self, object: &ObjectRef) -> bool {
        self.objects.contains(object)
    }

    /// All objects, in creation order.
    pub fn objects(&self) -> impl Iterator<Item = &ObjectRef> {
        self.objects.iter()
    }

    /// SQL of every statement accepted so far.
    pub fn executed(&self) -> &[String] {
        &self.executed
    }

    /// Questions put to the analyst so far.
    pub fn questions(&self) -> &[String] {
        &self.questions
    }

    /// Repository-to-stage copies performed so far.
    pub fn copies(&self) -> &[(ObjectRef, ObjectRef)] {
        &self.copies
    }

    fn require(&self, object: &ObjectRef) -> Result<(), PlatformError> {
        if self.objects.contains(object) {
            Ok(())
        } else {
            Err(not_found(object))
        }
    }

    fn remove_tree(&mut self, root: &ObjectRef, keep_root: bool) {
        let prefix = format!("{}.", root.name);
        let contains_children = matches!(root.kind, ObjectKind::Database | ObjectKind::Schema);
        self.objects.retain(|o| {
            let is_root = o == root;
            let is_child = contains_children
                && o.kind.scope() != crate::catalog::Scope::Account
                && o.name.starts_with(&prefix);
            (is_root && keep_root) || !(is_root || is_child)
        });
    }

    fn upsert(&mut self, object: &ObjectRef, requires: &[ObjectRef]) -> Result<QueryResult, PlatformError> {
        if let Some(parent) = object.parent() {
            self.require(&parent)?;
        }
        for r in requires {
            self.require(r)?;
        }
        if self.objects.contains(object) {
            self.remove_tree(object, true);
        } else {
            self.objects.insert(object.clone());
        }
        Ok(QueryResult::status(format!(
            "{} {} successfully created.",
            title_case(&object.kind.to_string()),
            object.name.rsplit('.').next().unwrap_or(&object.name)
        )))
    }

    fn invoke(
        &self,
        session: &Session,
        call: &AiCall,
        requires: &[ObjectRef],
    ) -> Result<QueryResult, PlatformError> {
        if session.warehouse.is_none() {
            return Err(PlatformError::ResourceUnavailable(
                "No active warehouse selected in the current session.  Select an active warehouse with the 'use warehouse' command.".to_string(),
            ));
        }
        for r in requires {
            self.require(r)?;
        }
        let raw = match self.responders.get(&call.function) {
            Some(responder) => responder(&call.args),
            None => default_response(call),
        };
        Ok(QueryResult::typed_scalar("RESULT", result_type(call.function), raw))
    }
}

impl Platform for MemoryPlatform {
    fn name(&self) -> &str {
        "memory"
    }

    fn execute(
        &mut self,
        session: &Session,
        statement: &Statement,
    ) -> Result<QueryResult, PlatformError> {
        if let Some((_, err)) = self
            .failures
            .iter()
            .find(|(fragment, _)| statement.sql.contains(fragment.as_str()))
        {
            return Err(err.clone());
        }

        let result = match &statement.effect {
            Effect::Upsert { object, requires } => self.upsert(object, requires)?,
            Effect::Drop(object) => {
                self.remove_tree(object, false);
                QueryResult::status(format!("{} successfully dropped.", object.name))
            }
            Effect::CopyFiles { from, into } => {
                self.require(from)?;
                self.require(into)?;
                self.copies.push((from.clone(), into.clone()));
                QueryResult::status("Copied files.")
            }
            Effect::Invoke { call, requires } => self.invoke(session, call, requires)?,
            Effect::Opaque => self
                .queries
                .get(statement.sql.trim())
                .cloned()
                .unwrap_or_else(|| QueryResult::status("Statement executed successfully.")),
        };
        debug!(sql = %statement.sql, "memory platform accepted statement");
        self.executed.push(statement.sql.clone());
        Ok(result)
    }

    fn list_objects(
        &mut self,
        _session: &Session,
        kind: ObjectKind,
    ) -> Result<Vec<String>, PlatformError> {
        Ok(self
            .objects
            .iter()
            .filter(|o| o.kind == kind)
            .map(|o| o.name.clone())
            .collect())
    }

    fn analyst(
        &mut self,
        _session: &Session,
        request: &AnalystRequest,
    ) -> Result<AnalystAnswer, PlatformError> {
        self.require(&request.stage)?;
        let answer = match &self.analyst {
            Some(responder) => responder(&request.question),
            None => AnalystAnswer::text(format!("Interpreted as: {}", request.question)),
        };
        debug!(model = %request.semantic_model_file(), "memory platform answered question");
        self.questions.push(request.question.clone());
        Ok(answer)
    }
}

fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn not_found(object: &ObjectRef) -> PlatformError {
    PlatformError::ObjectNotFound(format!(
        "SQL compilation error: {} '{}' does not exist or not authorized.",
        title_case(&object.kind.to_string()),
        object.name
    ))
}

/// Column type the platform reports for a function's result.
fn result_type(function: AiFunction) -> &'static str {
    match function.returns() {
        ReturnShape::Text | ReturnShape::TaggedText => "TEXT",
        ReturnShape::Score => "REAL",
        ReturnShape::Flag => "BOOLEAN",
        ReturnShape::Vector => "VECTOR",
        ReturnShape::Labels | ReturnShape::Chunks | ReturnShape::Structured | ReturnShape::Hits => {
            "VARIANT"
        }
    }
}

fn text<'a>(args: &'a IndexMap<String, Value>, name: &str) -> &'a str {
    args.get(name).and_then(Value::as_str).unwrap_or_default()
}

/// Fixed answers used when no stub is registered.
fn default_response(call: &AiCall) -> Option<String> {
    let args = &call.args;
    let raw = match call.function {
        AiFunction::Translate
        | AiFunction::Summarize
        | AiFunction::Aggregate => text(args, "text").to_string(),
        AiFunction::Sentiment => "0".to_string(),
        AiFunction::Similarity => {
            let same = text(args, "left") == text(args, "right");
            String::from(if same { "1" } else { "0" })
        }
        AiFunction::Filter => "true".to_string(),
        AiFunction::SplitText => json!([text(args, "text")]).to_string(),
        AiFunction::Embed => json!(vec![0.0; 1024]).to_string(),
        AiFunction::Classify => {
            let first = args
                .get("categories")
                .and_then(Value::as_array)
                .and_then(|c| c.first())
                .cloned()
                .unwrap_or(Value::Null);
            json!({ "labels": [first] }).to_string()
        }
        AiFunction::EntitySentiment => json!({ "categories": [] }).to_string(),
        AiFunction::Complete => "OK".to_string(),
        AiFunction::CompleteStructured => "{}".to_string(),
        AiFunction::Search => json!({ "results": [] }).to_string(),
    };
    Some(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session {
            account: "acct".to_string(),
            role: Some("ACCOUNTADMIN".to_string()),
            warehouse: Some("COMPUTE_WH".to_string()),
            database: Some("DB".to_string()),
            schema: Some("SCH".to_string()),
        }
    }

    fn upsert(kind: ObjectKind, name: &str) -> Statement {
        Statement::new(
            format!("CREATE OR REPLACE {} {}", kind.sql_keyword(), name),
            Effect::Upsert {
                object: ObjectRef::new(kind, name),
                requires: vec![],
            },
        )
    }

    fn invoke(function: AiFunction, args: &[(&str, Value)]) -> Statement {
        Statement::new(
            format!("SELECT {}(?) AS RESULT", function),
            Effect::Invoke {
                call: AiCall {
                    function,
                    args: args.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
                },
                requires: vec![],
            },
        )
    }

    #[test]
    fn test_hs042_parent_must_exist() {
        let mut p = MemoryPlatform::new();
        let s = session();
        let err = p
            .execute(&s, &upsert(ObjectKind::Stage, "DB.SCH.FILE"))
            .unwrap_err();
        assert!(matches!(err, PlatformError::ObjectNotFound(_)));
        assert!(err.to_string().contains("Schema 'DB.SCH' does not exist"));

        p.execute(&s, &upsert(ObjectKind::Database, "DB")).unwrap();
        p.execute(&s, &upsert(ObjectKind::Schema, "DB.SCH")).unwrap();
        p.execute(&s, &upsert(ObjectKind::Stage, "DB.SCH.FILE")).unwrap();
        assert_eq!(p.list_objects(&s, ObjectKind::Stage).unwrap(), vec!["DB.SCH.FILE"]);
    }

    #[test]
    fn test_hs042_requires_must_exist() {
        let mut p = MemoryPlatform::new();
        let s = session();
        p.insert(ObjectRef::new(ObjectKind::Database, "DB"));
        p.insert(ObjectRef::new(ObjectKind::Schema, "DB.SCH"));
        let stmt = Statement::new(
            "CREATE OR REPLACE GIT REPOSITORY DB.SCH.REPO",
            Effect::Upsert {
                object: ObjectRef::new(ObjectKind::GitRepository, "DB.SCH.REPO"),
                requires: vec![ObjectRef::new(ObjectKind::ApiIntegration, "GIT_API")],
            },
        );
        let err = p.execute(&s, &stmt).unwrap_err();
        assert!(err.to_string().contains("Api integration 'GIT_API'"));
    }

    #[test]
    fn test_hs042_replace_database_cascades() {
        let mut p = MemoryPlatform::new();
        let s = session();
        for (kind, name) in [
            (ObjectKind::Database, "DB"),
            (ObjectKind::Schema, "DB.SCH"),
            (ObjectKind::Table, "DB.SCH.T"),
            (ObjectKind::ApiIntegration, "GIT_API"),
        ] {
            p.execute(&s, &upsert(kind, name)).unwrap();
        }
        p.execute(&s, &upsert(ObjectKind::Database, "DB")).unwrap();
        let names: Vec<&str> = p.objects().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["DB", "GIT_API"]);
    }

    #[test]
    fn test_hs042_drop_cascades_and_is_idempotent() {
        let mut p = MemoryPlatform::new();
        let s = session();
        p.execute(&s, &upsert(ObjectKind::Database, "DB")).unwrap();
        p.execute(&s, &upsert(ObjectKind::Schema, "DB.SCH")).unwrap();
        let drop = Statement::new(
            "DROP DATABASE IF EXISTS DB",
            Effect::Drop(ObjectRef::new(ObjectKind::Database, "DB")),
        );
        p.execute(&s, &drop).unwrap();
        assert_eq!(p.objects().count(), 0);
        p.execute(&s, &drop).unwrap();
    }

    #[test]
    fn test_hs042_copy_files_requires_both() {
        let mut p = MemoryPlatform::new();
        let s = session();
        let copy = Statement::new(
            "COPY FILES INTO @DB.SCH.FILE FROM @DB.SCH.REPO/branches/main/data/",
            Effect::CopyFiles {
                from: ObjectRef::new(ObjectKind::GitRepository, "DB.SCH.REPO"),
                into: ObjectRef::new(ObjectKind::Stage, "DB.SCH.FILE"),
            },
        );
        assert!(p.execute(&s, &copy).is_err());
        p.insert(ObjectRef::new(ObjectKind::GitRepository, "DB.SCH.REPO"));
        p.insert(ObjectRef::new(ObjectKind::Stage, "DB.SCH.FILE"));
        p.execute(&s, &copy).unwrap();
        assert_eq!(p.copies().len(), 1);
    }

    #[test]
    fn test_hs042_registered_stub() {
        let mut p = MemoryPlatform::new();
        p.register_fixed(AiFunction::Sentiment, "0.9");
        let r = p
            .execute(&session(), &invoke(AiFunction::Sentiment, &[("text", json!("love it"))]))
            .unwrap();
        assert_eq!(r.first_value(), Some("0.9"));
    }

    #[test]
    fn test_hs042_default_stubs() {
        let mut p = MemoryPlatform::new();
        let r = p
            .execute(
                &session(),
                &invoke(
                    AiFunction::Classify,
                    &[("text", json!("x")), ("categories", json!(["a", "b"]))],
                ),
            )
            .unwrap();
        assert_eq!(r.first_value(), Some(r#"{"labels":["a"]}"#));
        assert_eq!(r.columns[0].type_name, "VARIANT");

        let r = p
            .execute(&session(), &invoke(AiFunction::Summarize, &[("text", json!("\"x\""))]))
            .unwrap();
        assert_eq!(r.columns[0].type_name, "TEXT");
    }

    #[test]
    fn test_hs042_invoke_needs_warehouse() {
        let mut p = MemoryPlatform::new();
        let mut s = session();
        s.warehouse = None;
        let err = p
            .execute(&s, &invoke(AiFunction::Sentiment, &[("text", json!("x"))]))
            .unwrap_err();
        assert!(matches!(err, PlatformError::ResourceUnavailable(_)));
    }

    #[test]
    fn test_hs042_failure_injection() {
        let mut p = MemoryPlatform::new();
        p.fail_when(
            "CREATE OR REPLACE DATABASE",
            PlatformError::Authorization("Insufficient privileges".to_string()),
        );
        let err = p
            .execute(&session(), &upsert(ObjectKind::Database, "DB"))
            .unwrap_err();
        assert!(matches!(err, PlatformError::Authorization(_)));
        assert!(p.executed().is_empty());
    }

    #[test]
    fn test_hs042_analyst_needs_model_stage() {
        let mut p = MemoryPlatform::new();
        let stage = ObjectRef::new(ObjectKind::Stage, "DB.SCH.SEMANTIC_MODEL_STAGE");
        let request = AnalystRequest {
            question: "sales by month?".to_string(),
            stage: stage.clone(),
            file: "model.yaml".to_string(),
        };
        let err = p.analyst(&session(), &request).unwrap_err();
        assert!(err.to_string().contains("SEMANTIC_MODEL_STAGE"));

        p.insert(stage);
        let answer = p.analyst(&session(), &request).unwrap();
        assert_eq!(answer.text, "Interpreted as: sales by month?");
        assert_eq!(answer.sql, None);

        p.register_analyst(|q| AnalystAnswer::text(q.to_uppercase()).with_sql("SELECT 1"));
        let answer = p.analyst(&session(), &request).unwrap();
        assert_eq!(answer.sql.as_deref(), Some("SELECT 1"));
        assert_eq!(p.questions().len(), 2);
        assert!(p.executed().is_empty());
    }

    #[test]
    fn test_hs042_canned_query() {
        let mut p = MemoryPlatform::new();
        p.register_query("SELECT 1", QueryResult::scalar("1", Some("1".to_string())));
        let r = p
            .execute(&session(), &Statement::new(" SELECT 1 ", Effect::Opaque))
            .unwrap();
        assert_eq!(r.first_value(), Some("1"));
    }
}
