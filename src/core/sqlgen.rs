//! HS-005: Statement generation: dispatch resolved steps to catalog handlers.
//!
//! Every step becomes exactly one [`Statement`]: its SQL, positional binds
//! and the catalog effect it has. Names are qualified against the session.

use super::resolver::{step_object, step_requirements};
use super::types::{yaml_to_json, Session, Step, StepType};
use crate::catalog::app::{create_streamlit_sql, AppSource};
use crate::catalog::database::{create_database_sql, create_schema_sql};
use crate::catalog::repository::{create_api_integration_sql, create_git_repository_sql};
use crate::catalog::search::{create_search_service_sql, SearchServiceDef};
use crate::catalog::stage::{copy_files_sql, create_stage_sql};
use crate::catalog::table::create_table_sql;
use crate::catalog::{drop_sql, qualify, split_stage_path, ObjectKind, ObjectRef};
use crate::cortex::{AiFunction, AnalystRequest, FunctionCatalog};
use crate::platform::{AiCall, Effect, Statement};
use indexmap::IndexMap;

const DEFAULT_BRANCH: &str = "main";
const DEFAULT_TARGET_LAG: &str = "1 day";

fn field<'a>(step: &'a Step, name: &str, value: &'a Option<String>) -> Result<&'a str, String> {
    value
        .as_deref()
        .ok_or_else(|| format!("{} step has no {}", step.step_type, name))
}

/// Generate the statement that converges or runs a step.
pub fn step_statement(
    step: &Step,
    session: &Session,
    catalog: &FunctionCatalog,
) -> Result<Statement, String> {
    if let Some(object) = step_object(step, session)? {
        return object_statement(step, object, session);
    }

    match step.step_type {
        StepType::CopyFiles => {
            let repo = qualify(
                ObjectKind::GitRepository,
                field(step, "repository", &step.repository)?,
                session,
            )?;
            let (stage, sub) = split_stage_path(field(step, "into", &step.into)?);
            let stage = qualify(ObjectKind::Stage, stage, session)?;
            let sql = copy_files_sql(
                &stage,
                sub,
                &repo,
                step.branch.as_deref().unwrap_or(DEFAULT_BRANCH),
                step.path.as_deref(),
            );
            Ok(Statement::new(
                sql,
                Effect::CopyFiles {
                    from: ObjectRef::new(ObjectKind::GitRepository, repo),
                    into: ObjectRef::new(ObjectKind::Stage, stage),
                },
            ))
        }
        StepType::Sql | StepType::Query => {
            let sql = field(step, "sql", &step.sql)?;
            Ok(Statement::new(sql.trim().trim_end_matches(';'), Effect::Opaque))
        }
        StepType::AiFunction => invocation_statement(step, session, catalog),
        other => Err(format!("no statement generator for {} steps", other)),
    }
}

fn object_statement(step: &Step, object: ObjectRef, session: &Session) -> Result<Statement, String> {
    if step.is_absent() {
        return Ok(destroy_statement(&object));
    }

    let name = object.name.as_str();
    let comment = step.comment.as_deref();
    let sql = match step.step_type {
        StepType::Database => create_database_sql(name, comment),
        StepType::Schema => create_schema_sql(name, comment),
        StepType::Stage => create_stage_sql(
            name,
            step.encryption.as_deref(),
            step.directory,
            comment,
        ),
        StepType::ApiIntegration => create_api_integration_sql(
            name,
            &step.allowed_prefixes,
            step.enabled.unwrap_or(true),
        ),
        StepType::GitRepository => {
            let integration = qualify(
                ObjectKind::ApiIntegration,
                field(step, "api_integration", &step.api_integration)?,
                session,
            )?;
            create_git_repository_sql(
                name,
                &integration,
                field(step, "origin", &step.origin)?,
                comment,
            )
        }
        StepType::Table => create_table_sql(name, &step.columns, comment)?,
        StepType::SearchService => {
            let warehouse = step
                .warehouse
                .as_deref()
                .or(session.warehouse.as_deref())
                .ok_or_else(|| format!("search service {} needs a warehouse", name))?;
            create_search_service_sql(&SearchServiceDef {
                name,
                on: field(step, "on", &step.on)?,
                attributes: &step.attributes,
                warehouse,
                target_lag: step.target_lag.as_deref().unwrap_or(DEFAULT_TARGET_LAG),
                embedding_model: step.embedding_model.as_deref(),
                source: field(step, "source", &step.source)?,
            })?
        }
        StepType::Streamlit => {
            let repo;
            let stage;
            let source = match (&step.repository, &step.stage) {
                (Some(r), _) => {
                    repo = qualify(ObjectKind::GitRepository, r, session)?;
                    AppSource::Repository {
                        name: &repo,
                        branch: step.branch.as_deref().unwrap_or(DEFAULT_BRANCH),
                        path: step.path.as_deref(),
                    }
                }
                (None, Some(s)) => {
                    let (stage_name, sub) = split_stage_path(s);
                    stage = qualify(ObjectKind::Stage, stage_name, session)?;
                    AppSource::Stage {
                        name: &stage,
                        path: sub.or(step.path.as_deref()),
                    }
                }
                (None, None) => return Err(format!("streamlit {} needs a repository or stage", name)),
            };
            create_streamlit_sql(
                name,
                source,
                field(step, "main_file", &step.main_file)?,
                step.warehouse.as_deref().or(session.warehouse.as_deref()),
                step.title.as_deref(),
                comment,
            )
        }
        other => return Err(format!("{} steps do not own a catalog object", other)),
    };

    Ok(Statement::new(
        sql,
        Effect::Upsert {
            requires: step_requirements(step, session),
            object,
        },
    ))
}

fn invocation_statement(
    step: &Step,
    session: &Session,
    catalog: &FunctionCatalog,
) -> Result<Statement, String> {
    let function: AiFunction = field(step, "function", &step.function)?.parse()?;

    let mut args = IndexMap::new();
    for (k, v) in &step.args {
        args.insert(k.clone(), yaml_to_json(v)?);
    }
    if function == AiFunction::Search {
        if let Some(service) = args.get("service").and_then(|v| v.as_str()) {
            let qualified = qualify(ObjectKind::SearchService, service, session)?;
            args.insert("service".to_string(), serde_json::Value::String(qualified));
        }
    }

    let invocation = catalog.invocation(function, &args)?;
    Ok(Statement {
        sql: invocation.sql,
        bindings: invocation.bindings,
        effect: Effect::Invoke {
            call: AiCall {
                function,
                args: invocation.args,
            },
            requires: step_requirements(step, session),
        },
    })
}

/// Build the analyst request for an `analyst` step.
pub fn analyst_request(step: &Step, session: &Session) -> Result<AnalystRequest, String> {
    let model = field(step, "semantic_model", &step.semantic_model)?;
    let (stage, file) = split_stage_path(model);
    let file = file.ok_or_else(|| format!("semantic model '{}' names no file", model))?;
    Ok(AnalystRequest {
        question: field(step, "question", &step.question)?.to_string(),
        stage: ObjectRef::new(ObjectKind::Stage, qualify(ObjectKind::Stage, stage, session)?),
        file: file.to_string(),
    })
}

/// `DROP ... IF EXISTS` for an object recorded in the lock.
pub fn destroy_statement(object: &ObjectRef) -> Statement {
    Statement::new(drop_sql(object), Effect::Drop(object.clone()))
}
