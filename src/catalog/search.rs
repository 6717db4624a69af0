//! HS-011: Cortex search service handler.

use super::{normalize_identifier, quote_literal};

/// Desired definition of a search service.
#[derive(Debug, Clone)]
pub struct SearchServiceDef<'a> {
    pub name: &'a str,
    pub on: &'a str,
    pub attributes: &'a [String],
    pub warehouse: &'a str,
    pub target_lag: &'a str,
    pub embedding_model: Option<&'a str>,
    pub source: &'a str,
}

/// Create-or-replace a search service over a text column.
pub fn create_search_service_sql(def: &SearchServiceDef) -> Result<String, String> {
    let mut sql = format!(
        "CREATE OR REPLACE CORTEX SEARCH SERVICE {} ON {}",
        def.name,
        normalize_identifier(def.on)?
    );
    if !def.attributes.is_empty() {
        let attrs: Result<Vec<String>, String> =
            def.attributes.iter().map(|a| normalize_identifier(a)).collect();
        sql.push_str(&format!(" ATTRIBUTES {}", attrs?.join(", ")));
    }
    sql.push_str(&format!(
        " WAREHOUSE = {} TARGET_LAG = {}",
        def.warehouse,
        quote_literal(def.target_lag)
    ));
    if let Some(model) = def.embedding_model {
        sql.push_str(&format!(" EMBEDDING_MODEL = {}", quote_literal(model)));
    }
    sql.push_str(&format!(" AS {}", def.source.trim().trim_end_matches(';')));
    Ok(sql)
}
