//! HS-010: Table handler.

use super::{comment_clause, normalize_identifier};
use indexmap::IndexMap;

/// Create-or-replace a table from `column -> type` pairs.
pub fn create_table_sql(
    name: &str,
    columns: &IndexMap<String, String>,
    comment: Option<&str>,
) -> Result<String, String> {
    if columns.is_empty() {
        return Err(format!("table {} has no columns", name));
    }
    let mut defs = Vec::with_capacity(columns.len());
    for (column, column_type) in columns {
        let column = normalize_identifier(column)?;
        if column_type.contains(';') {
            return Err(format!("column {} has an invalid type '{}'", column, column_type));
        }
        defs.push(format!("{} {}", column, column_type.trim()));
    }
    Ok(format!(
        "CREATE OR REPLACE TABLE {} ({}){}",
        name,
        defs.join(", "),
        comment_clause(comment)
    ))
}
