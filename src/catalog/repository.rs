//! HS-009: API integration and git repository mirror handlers.

use super::{comment_clause, quote_literal};

/// Create-or-replace a git HTTPS API integration.
pub fn create_api_integration_sql(name: &str, allowed_prefixes: &[String], enabled: bool) -> String {
    let prefixes = allowed_prefixes
        .iter()
        .map(|p| quote_literal(p))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "CREATE OR REPLACE API INTEGRATION {} API_PROVIDER = git_https_api API_ALLOWED_PREFIXES = ({}) ENABLED = {}",
        name,
        prefixes,
        if enabled { "TRUE" } else { "FALSE" }
    )
}

/// Create-or-replace a read-only repository mirror.
pub fn create_git_repository_sql(
    name: &str,
    api_integration: &str,
    origin: &str,
    comment: Option<&str>,
) -> String {
    format!(
        "CREATE OR REPLACE GIT REPOSITORY {} API_INTEGRATION = {} ORIGIN = {}{}",
        name,
        api_integration,
        quote_literal(origin),
        comment_clause(comment)
    )
}

/// True when `origin` falls under one of the integration's allowed prefixes.
pub fn origin_allowed(origin: &str, allowed_prefixes: &[String]) -> bool {
    allowed_prefixes.iter().any(|p| origin.starts_with(p.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hs009_api_integration() {
        let sql = create_api_integration_sql(
            "GIT_API_INTEGRATION",
            &["https://github.com/snowflakejp/".to_string()],
            true,
        );
        assert_eq!(
            sql,
            "CREATE OR REPLACE API INTEGRATION GIT_API_INTEGRATION API_PROVIDER = git_https_api \
             API_ALLOWED_PREFIXES = ('https://github.com/snowflakejp/') ENABLED = TRUE"
        );
    }

    #[test]
    fn test_hs009_git_repository() {
        let sql = create_git_repository_sql(
            "DB.S.GIT_INTEGRATION_FOR_HANDSON",
            "GIT_API_INTEGRATION",
            "https://github.com/snowflakejp/handson.git",
            None,
        );
        assert!(sql.starts_with("CREATE OR REPLACE GIT REPOSITORY DB.S.GIT_INTEGRATION_FOR_HANDSON"));
        assert!(sql.contains("API_INTEGRATION = GIT_API_INTEGRATION"));
        assert!(sql.ends_with("ORIGIN = 'https://github.com/snowflakejp/handson.git'"));
    }

    #[test]
    fn test_hs009_origin_allowed() {
        let prefixes = vec!["https://github.com/snowflakejp/".to_string()];
        assert!(origin_allowed("https://github.com/snowflakejp/x.git", &prefixes));
        assert!(!origin_allowed("https://github.com/other/x.git", &prefixes));
        assert!(!origin_allowed("https://github.com/x.git", &[]));
    }
}
