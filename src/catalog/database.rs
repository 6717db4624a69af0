//! HS-007: Database and schema handlers.

use super::comment_clause;

/// Create-or-replace a database.
pub fn create_database_sql(name: &str, comment: Option<&str>) -> String {
    format!("CREATE OR REPLACE DATABASE {}{}", name, comment_clause(comment))
}

/// Create-or-replace a schema (`DB.SCHEMA`).
pub fn create_schema_sql(name: &str, comment: Option<&str>) -> String {
    format!("CREATE OR REPLACE SCHEMA {}{}", name, comment_clause(comment))
}
