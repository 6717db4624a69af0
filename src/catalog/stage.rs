//! HS-008: Stage handler and repository-to-stage file copies.

use super::{comment_clause, quote_literal};

/// Create-or-replace an internal stage.
pub fn create_stage_sql(
    name: &str,
    encryption: Option<&str>,
    directory: Option<bool>,
    comment: Option<&str>,
) -> String {
    let mut sql = format!("CREATE OR REPLACE STAGE {}", name);
    if let Some(enc) = encryption {
        sql.push_str(&format!(
            " ENCRYPTION = (TYPE = {})",
            quote_literal(&enc.to_uppercase())
        ));
    }
    if let Some(enabled) = directory {
        sql.push_str(&format!(
            " DIRECTORY = (ENABLE = {})",
            if enabled { "TRUE" } else { "FALSE" }
        ));
    }
    sql.push_str(&comment_clause(comment));
    sql
}

/// Location inside a repository mirror: `@REPO/branches/<branch>/<path>`.
pub fn repository_location(repository: &str, branch: &str, path: Option<&str>) -> String {
    let mut loc = format!("@{}/branches/{}/", repository, branch);
    if let Some(p) = path.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
        loc.push_str(p);
        loc.push('/');
    }
    loc
}

/// Copy every file under a repository path into a stage.
pub fn copy_files_sql(
    stage: &str,
    stage_path: Option<&str>,
    repository: &str,
    branch: &str,
    path: Option<&str>,
) -> String {
    let mut target = format!("@{}", stage);
    if let Some(sub) = stage_path {
        target.push('/');
        target.push_str(sub);
        target.push('/');
    }
    format!(
        "COPY FILES INTO {} FROM {}",
        target,
        repository_location(repository, branch, path)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hs008_plain_stage() {
        assert_eq!(
            create_stage_sql("DB.S.FILE", None, None, None),
            "CREATE OR REPLACE STAGE DB.S.FILE"
        );
    }

    #[test]
    fn test_hs008_stage_with_encryption_and_directory() {
        let sql = create_stage_sql("DB.S.FILE", Some("snowflake_sse"), Some(true), None);
        assert_eq!(
            sql,
            "CREATE OR REPLACE STAGE DB.S.FILE ENCRYPTION = (TYPE = 'SNOWFLAKE_SSE') DIRECTORY = (ENABLE = TRUE)"
        );
    }

    #[test]
    fn test_hs008_repository_location() {
        assert_eq!(
            repository_location("DB.S.REPO", "main", Some("/handson/data/")),
            "@DB.S.REPO/branches/main/handson/data/"
        );
        assert_eq!(
            repository_location("DB.S.REPO", "main", None),
            "@DB.S.REPO/branches/main/"
        );
    }

    #[test]
    fn test_hs008_copy_files() {
        let sql = copy_files_sql("DB.S.FILE", Some("data"), "DB.S.REPO", "main", Some("handson/data"));
        assert_eq!(
            sql,
            "COPY FILES INTO @DB.S.FILE/data/ FROM @DB.S.REPO/branches/main/handson/data/"
        );
    }
}
