//! Catalog object handlers: render create-or-replace SQL per object kind.
//!
//! Each handler produces:
//! 1. A "create" statement with replace-if-exists semantics
//! 2. The shared `DROP ... IF EXISTS` statement via [`drop_sql`]
//!
//! Names passed to handlers are already qualified by [`qualify`].

pub mod app;
pub mod database;
pub mod repository;
pub mod search;
pub mod stage;
pub mod table;

use crate::core::types::Session;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*$").expect("identifier regex"));

/// Kinds of platform catalog objects the pipeline can own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Database,
    Schema,
    Stage,
    ApiIntegration,
    GitRepository,
    Table,
    SearchService,
    Streamlit,
}

/// Where in the hierarchy an object lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Account,
    Database,
    Schema,
}

impl ObjectKind {
    pub fn scope(self) -> Scope {
        match self {
            Self::Database | Self::ApiIntegration => Scope::Account,
            Self::Schema => Scope::Database,
            _ => Scope::Schema,
        }
    }

    /// Keyword used in CREATE/DROP statements.
    pub fn sql_keyword(self) -> &'static str {
        match self {
            Self::Database => "DATABASE",
            Self::Schema => "SCHEMA",
            Self::Stage => "STAGE",
            Self::ApiIntegration => "API INTEGRATION",
            Self::GitRepository => "GIT REPOSITORY",
            Self::Table => "TABLE",
            Self::SearchService => "CORTEX SEARCH SERVICE",
            Self::Streamlit => "STREAMLIT",
        }
    }

    /// Plural keyword used in SHOW statements.
    pub fn show_keyword(self) -> &'static str {
        match self {
            Self::Database => "DATABASES",
            Self::Schema => "SCHEMAS",
            Self::Stage => "STAGES",
            Self::ApiIntegration => "API INTEGRATIONS",
            Self::GitRepository => "GIT REPOSITORIES",
            Self::Table => "TABLES",
            Self::SearchService => "CORTEX SEARCH SERVICES",
            Self::Streamlit => "STREAMLITS",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql_keyword().to_lowercase())
    }
}

/// A qualified reference to a catalog object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub kind: ObjectKind,
    pub name: String,
}

impl ObjectRef {
    pub fn new(kind: ObjectKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    /// The object this one lives in (schema → database, scoped → schema).
    pub fn parent(&self) -> Option<ObjectRef> {
        let (head, _) = self.name.rsplit_once('.')?;
        match self.kind.scope() {
            Scope::Account => None,
            Scope::Database => Some(ObjectRef::new(ObjectKind::Database, head)),
            Scope::Schema => Some(ObjectRef::new(ObjectKind::Schema, head)),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.name)
    }
}

/// Validate one identifier part and normalize it to upper case.
pub fn normalize_identifier(part: &str) -> Result<String, String> {
    if IDENTIFIER.is_match(part) {
        Ok(part.to_uppercase())
    } else {
        Err(format!("invalid identifier '{}'", part))
    }
}

/// Validate a dotted name and normalize every part.
pub fn normalize_name(raw: &str) -> Result<String, String> {
    let parts: Result<Vec<String>, String> =
        raw.split('.').map(|p| normalize_identifier(p.trim())).collect();
    Ok(parts?.join("."))
}

/// Qualify a raw object name against the session namespace.
pub fn qualify(kind: ObjectKind, raw: &str, session: &Session) -> Result<String, String> {
    let name = normalize_name(raw)?;
    let depth = name.split('.').count();

    let database = || {
        session
            .database
            .as_deref()
            .ok_or_else(|| format!("{} '{}' needs an active database", kind, raw))
            .and_then(normalize_name)
    };
    let schema = || {
        session
            .schema
            .as_deref()
            .ok_or_else(|| format!("{} '{}' needs an active schema", kind, raw))
            .and_then(normalize_name)
    };

    match (kind.scope(), depth) {
        (Scope::Account, 1) => Ok(name),
        (Scope::Database, 1) => Ok(format!("{}.{}", database()?, name)),
        (Scope::Database, 2) => Ok(name),
        (Scope::Schema, 1) => Ok(format!("{}.{}.{}", database()?, schema()?, name)),
        (Scope::Schema, 2) => Ok(format!("{}.{}", database()?, name)),
        (Scope::Schema, 3) => Ok(name),
        _ => Err(format!("{} name '{}' has too many parts", kind, raw)),
    }
}

/// Split `STAGE/sub/path` into the stage name and optional sub-path.
pub fn split_stage_path(raw: &str) -> (&str, Option<&str>) {
    let trimmed = raw.trim_start_matches('@');
    match trimmed.split_once('/') {
        Some((name, rest)) if !rest.trim_matches('/').is_empty() => {
            (name, Some(rest.trim_matches('/')))
        }
        Some((name, _)) => (name, None),
        None => (trimmed, None),
    }
}

/// Render a single-quoted SQL string literal.
pub fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "''"))
}

/// Append `COMMENT = '...'` when a comment is set.
pub fn comment_clause(comment: Option<&str>) -> String {
    comment
        .map(|c| format!(" COMMENT = {}", quote_literal(c)))
        .unwrap_or_default()
}

/// Drop statement shared by every kind.
pub fn drop_sql(object: &ObjectRef) -> String {
    format!("DROP {} IF EXISTS {}", object.kind.sql_keyword(), object.name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session {
            account: "acct".to_string(),
            role: None,
            warehouse: Some("COMPUTE_WH".to_string()),
            database: Some("snowretail_db".to_string()),
            schema: Some("snowretail_schema".to_string()),
        }
    }

    #[test]
    fn test_catalog_normalize_identifier() {
        assert_eq!(normalize_identifier("file").unwrap(), "FILE");
        assert_eq!(normalize_identifier("_x$1").unwrap(), "_X$1");
        assert!(normalize_identifier("1abc").is_err());
        assert!(normalize_identifier("a-b").is_err());
        assert!(normalize_identifier("").is_err());
    }

    #[test]
    fn test_catalog_qualify_schema_scoped() {
        let s = session();
        assert_eq!(
            qualify(ObjectKind::Stage, "file", &s).unwrap(),
            "SNOWRETAIL_DB.SNOWRETAIL_SCHEMA.FILE"
        );
        assert_eq!(
            qualify(ObjectKind::Stage, "other.file", &s).unwrap(),
            "SNOWRETAIL_DB.OTHER.FILE"
        );
        assert_eq!(qualify(ObjectKind::Stage, "a.b.c", &s).unwrap(), "A.B.C");
        assert!(qualify(ObjectKind::Stage, "a.b.c.d", &s).is_err());
    }

    #[test]
    fn test_catalog_qualify_account_and_database_scoped() {
        let s = session();
        assert_eq!(qualify(ObjectKind::Database, "db", &s).unwrap(), "DB");
        assert!(qualify(ObjectKind::Database, "a.b", &s).is_err());
        assert_eq!(
            qualify(ObjectKind::Schema, "raw", &s).unwrap(),
            "SNOWRETAIL_DB.RAW"
        );
        assert_eq!(qualify(ObjectKind::Schema, "x.raw", &s).unwrap(), "X.RAW");
    }

    #[test]
    fn test_catalog_qualify_needs_namespace() {
        let s = Session {
            account: "acct".to_string(),
            ..Default::default()
        };
        let err = qualify(ObjectKind::Table, "t", &s).unwrap_err();
        assert!(err.contains("active database"));
    }

    #[test]
    fn test_catalog_object_parent() {
        let stage = ObjectRef::new(ObjectKind::Stage, "DB.SCH.FILE");
        assert_eq!(
            stage.parent(),
            Some(ObjectRef::new(ObjectKind::Schema, "DB.SCH"))
        );
        let schema = ObjectRef::new(ObjectKind::Schema, "DB.SCH");
        assert_eq!(
            schema.parent(),
            Some(ObjectRef::new(ObjectKind::Database, "DB"))
        );
        assert_eq!(ObjectRef::new(ObjectKind::Database, "DB").parent(), None);
    }

    #[test]
    fn test_catalog_split_stage_path() {
        assert_eq!(split_stage_path("@FILE"), ("FILE", None));
        assert_eq!(split_stage_path("FILE/data/"), ("FILE", Some("data")));
        assert_eq!(split_stage_path("FILE/"), ("FILE", None));
    }

    #[test]
    fn test_catalog_quote_literal() {
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(quote_literal("plain"), "'plain'");
    }

    #[test]
    fn test_catalog_drop_sql() {
        let obj = ObjectRef::new(ObjectKind::SearchService, "DB.SCH.SVC");
        assert_eq!(
            drop_sql(&obj),
            "DROP CORTEX SEARCH SERVICE IF EXISTS DB.SCH.SVC"
        );
    }

    #[test]
    fn test_catalog_kind_display() {
        assert_eq!(ObjectKind::GitRepository.to_string(), "git repository");
        assert_eq!(ObjectKind::Stage.show_keyword(), "STAGES");
    }
}
