//! HS-006: Streamlit web app handler.

use super::{comment_clause, quote_literal};

/// Where the app's sources live.
#[derive(Debug, Clone, Copy)]
pub enum AppSource<'a> {
    Repository {
        name: &'a str,
        branch: &'a str,
        path: Option<&'a str>,
    },
    Stage {
        name: &'a str,
        path: Option<&'a str>,
    },
}

/// Create-or-replace a versioned web app bound to a warehouse.
pub fn create_streamlit_sql(
    name: &str,
    source: AppSource,
    main_file: &str,
    warehouse: Option<&str>,
    title: Option<&str>,
    comment: Option<&str>,
) -> String {
    let from = match source {
        AppSource::Repository { name, branch, path } => {
            super::stage::repository_location(name, branch, path)
        }
        AppSource::Stage { name, path } => {
            let mut loc = format!("@{}/", name);
            if let Some(p) = path.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
                loc.push_str(p);
                loc.push('/');
            }
            loc
        }
    };
    let mut sql = format!(
        "CREATE OR REPLACE STREAMLIT {} FROM {} MAIN_FILE = {}",
        name,
        quote_literal(&from),
        quote_literal(main_file.trim_start_matches('/'))
    );
    if let Some(wh) = warehouse {
        sql.push_str(&format!(" QUERY_WAREHOUSE = {}", wh));
    }
    if let Some(t) = title {
        sql.push_str(&format!(" TITLE = {}", quote_literal(t)));
    }
    sql.push_str(&comment_clause(comment));
    sql
}
