//! HS-003: Template resolution, object references and dependency ordering.
//!
//! Resolves `{{params.key}}` and `{{session.field}}` templates in every string
//! field of a step. `{{steps.<id>.output}}` is left in place at plan time and
//! filled in by the executor once the referenced step has produced a value.
//! Builds a DAG from explicit `depends_on` edges, output references and the
//! implicit edges implied by object references, and computes a topological
//! order using Kahn's algorithm with declaration-order tie-breaking.

use super::types::*;
use crate::catalog::{qualify, split_stage_path, ObjectKind, ObjectRef};
use crate::cortex::AiFunction;
use indexmap::IndexMap;
use regex::Regex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::LazyLock;

static STEP_OUTPUT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*steps\.([A-Za-z0-9_-]+)\.output\s*\}\}").expect("step output regex")
});

/// Resolve all template variables in a string.
///
/// `session` is `None` while the connection block itself is being resolved.
pub fn resolve_template(
    template: &str,
    params: &HashMap<String, serde_yaml_ng::Value>,
    session: Option<&Session>,
) -> Result<String, String> {
    let mut result = template.to_string();
    let mut start = 0;

    while let Some(open) = result[start..].find("{{") {
        let open = start + open;
        let close = result[open..]
            .find("}}")
            .ok_or_else(|| format!("unclosed template at position {}", open))?;
        let close = open + close + 2;
        let key = result[open + 2..close - 2].trim();

        let value = if let Some(param_key) = key.strip_prefix("params.") {
            params
                .get(param_key)
                .map(yaml_value_to_string)
                .ok_or_else(|| format!("unknown param: {}", param_key))?
        } else if let Some(field) = key.strip_prefix("session.") {
            let session = session
                .ok_or_else(|| format!("{{{{{}}}}} cannot be used inside connection", key))?;
            let value = match field {
                "account" => Some(session.account.clone()),
                "role" => session.role.clone(),
                "warehouse" => session.warehouse.clone(),
                "database" => session.database.clone(),
                "schema" => session.schema.clone(),
                _ => return Err(format!("unknown session field: {}", field)),
            };
            value.ok_or_else(|| format!("session {} is not set", field))?
        } else if key.starts_with("steps.") {
            start = close;
            continue;
        } else {
            return Err(format!("unknown template variable: {}", key));
        };

        result.replace_range(open..close, &value);
        start = open + value.len();
    }

    Ok(result)
}

fn resolve_opt(
    value: &Option<String>,
    params: &HashMap<String, serde_yaml_ng::Value>,
    session: Option<&Session>,
) -> Result<Option<String>, String> {
    value
        .as_deref()
        .map(|v| resolve_template(v, params, session))
        .transpose()
}

/// Resolve the connection block into the session threaded through every call.
pub fn resolve_session(
    conn: &Connection,
    params: &HashMap<String, serde_yaml_ng::Value>,
) -> Result<Session, String> {
    Ok(Session {
        account: resolve_template(&conn.account, params, None)?,
        role: resolve_opt(&conn.role, params, None)?,
        warehouse: resolve_opt(&conn.warehouse, params, None)?,
        database: resolve_opt(&conn.database, params, None)?,
        schema: resolve_opt(&conn.schema, params, None)?,
    })
}

fn resolve_yaml(
    value: &serde_yaml_ng::Value,
    params: &HashMap<String, serde_yaml_ng::Value>,
    session: &Session,
) -> Result<serde_yaml_ng::Value, String> {
    use serde_yaml_ng::Value;
    Ok(match value {
        Value::String(s) => Value::String(resolve_template(s, params, Some(session))?),
        Value::Sequence(items) => Value::Sequence(
            items
                .iter()
                .map(|v| resolve_yaml(v, params, session))
                .collect::<Result<_, _>>()?,
        ),
        Value::Mapping(map) => {
            let mut out = serde_yaml_ng::Mapping::new();
            for (k, v) in map {
                out.insert(k.clone(), resolve_yaml(v, params, session)?);
            }
            Value::Mapping(out)
        }
        other => other.clone(),
    })
}

/// Resolve all templates in a step's string fields.
pub fn resolve_step_templates(
    step: &Step,
    params: &HashMap<String, serde_yaml_ng::Value>,
    session: &Session,
) -> Result<Step, String> {
    let s = Some(session);
    let mut resolved = step.clone();

    for field in [
        &mut resolved.name,
        &mut resolved.comment,
        &mut resolved.encryption,
        &mut resolved.origin,
        &mut resolved.api_integration,
        &mut resolved.repository,
        &mut resolved.branch,
        &mut resolved.path,
        &mut resolved.into,
        &mut resolved.stage,
        &mut resolved.main_file,
        &mut resolved.title,
        &mut resolved.on,
        &mut resolved.warehouse,
        &mut resolved.target_lag,
        &mut resolved.embedding_model,
        &mut resolved.source,
        &mut resolved.sql,
        &mut resolved.function,
        &mut resolved.semantic_model,
        &mut resolved.question,
    ] {
        *field = resolve_opt(field, params, s)?;
    }

    for prefix in resolved.allowed_prefixes.iter_mut() {
        *prefix = resolve_template(prefix, params, s)?;
    }
    for attr in resolved.attributes.iter_mut() {
        *attr = resolve_template(attr, params, s)?;
    }
    for ty in resolved.columns.values_mut() {
        *ty = resolve_template(ty, params, s)?;
    }
    for value in resolved.args.values_mut() {
        *value = resolve_yaml(value, params, session)?;
    }

    Ok(resolved)
}

/// Resolve every step of a config.
pub fn resolve_steps(
    config: &PipelineConfig,
    session: &Session,
) -> Result<IndexMap<String, Step>, String> {
    config
        .steps
        .iter()
        .map(|(id, step)| {
            resolve_step_templates(step, &config.params, session)
                .map(|s| (id.clone(), s))
                .map_err(|e| format!("step '{}': {}", id, e))
        })
        .collect()
}

fn yaml_strings<'a>(value: &'a serde_yaml_ng::Value, out: &mut Vec<&'a str>) {
    use serde_yaml_ng::Value;
    match value {
        Value::String(s) => out.push(s),
        Value::Sequence(items) => items.iter().for_each(|v| yaml_strings(v, out)),
        Value::Mapping(map) => map.values().for_each(|v| yaml_strings(v, out)),
        _ => {}
    }
}

/// Step ids named by `{{steps.<id>.output}}` in a step's sql, question or args.
pub fn output_references(step: &Step) -> Vec<String> {
    let mut texts: Vec<&str> = [&step.sql, &step.question]
        .into_iter()
        .filter_map(|f| f.as_deref())
        .collect();
    step.args.values().for_each(|v| yaml_strings(v, &mut texts));

    let mut ids: Vec<String> = Vec::new();
    for text in texts {
        for cap in STEP_OUTPUT.captures_iter(text) {
            let id = cap[1].to_string();
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    ids
}

fn fill_outputs(text: &str, outputs: &IndexMap<String, String>) -> Result<String, String> {
    let mut missing = None;
    let filled = STEP_OUTPUT.replace_all(text, |cap: &regex::Captures| {
        match outputs.get(&cap[1]) {
            Some(v) => v.clone(),
            None => {
                missing.get_or_insert_with(|| cap[1].to_string());
                String::new()
            }
        }
    });
    match missing {
        Some(id) => Err(format!("output of step '{}' is not available", id)),
        None => Ok(filled.into_owned()),
    }
}

fn fill_yaml(
    value: &serde_yaml_ng::Value,
    outputs: &IndexMap<String, String>,
) -> Result<serde_yaml_ng::Value, String> {
    use serde_yaml_ng::Value;
    Ok(match value {
        Value::String(s) => Value::String(fill_outputs(s, outputs)?),
        Value::Sequence(items) => Value::Sequence(
            items
                .iter()
                .map(|v| fill_yaml(v, outputs))
                .collect::<Result<_, _>>()?,
        ),
        Value::Mapping(map) => {
            let mut out = serde_yaml_ng::Mapping::new();
            for (k, v) in map {
                out.insert(k.clone(), fill_yaml(v, outputs)?);
            }
            Value::Mapping(out)
        }
        other => other.clone(),
    })
}

/// Replace `{{steps.<id>.output}}` with the text each step produced this run.
pub fn substitute_outputs(step: &Step, outputs: &IndexMap<String, String>) -> Result<Step, String> {
    let mut filled = step.clone();
    for field in [&mut filled.sql, &mut filled.question] {
        if let Some(text) = field.as_deref() {
            *field = Some(fill_outputs(text, outputs)?);
        }
    }
    for value in filled.args.values_mut() {
        *value = fill_yaml(value, outputs)?;
    }
    Ok(filled)
}

/// The catalog object a step owns, qualified against the session.
pub fn step_object(step: &Step, session: &Session) -> Result<Option<ObjectRef>, String> {
    let Some(kind) = step.step_type.object_kind() else {
        return Ok(None);
    };
    let name = step
        .name
        .as_deref()
        .ok_or_else(|| format!("{} step has no name", step.step_type))?;
    Ok(Some(ObjectRef::new(kind, qualify(kind, name, session)?)))
}

/// Objects a step needs to exist before it runs, excluding its own parents.
pub fn step_requirements(step: &Step, session: &Session) -> Vec<ObjectRef> {
    let refer = |kind: ObjectKind, raw: &Option<String>| {
        raw.as_deref()
            .and_then(|r| qualify(kind, r, session).ok())
            .map(|name| ObjectRef::new(kind, name))
    };
    let stage_ref = |raw: &Option<String>| {
        raw.as_deref()
            .map(|r| split_stage_path(r).0)
            .and_then(|r| qualify(ObjectKind::Stage, r, session).ok())
            .map(|name| ObjectRef::new(ObjectKind::Stage, name))
    };

    match step.step_type {
        StepType::GitRepository => refer(ObjectKind::ApiIntegration, &step.api_integration)
            .into_iter()
            .collect(),
        StepType::CopyFiles => [
            refer(ObjectKind::GitRepository, &step.repository),
            stage_ref(&step.into),
        ]
        .into_iter()
        .flatten()
        .collect(),
        StepType::Streamlit => [
            refer(ObjectKind::GitRepository, &step.repository),
            stage_ref(&step.stage),
        ]
        .into_iter()
        .flatten()
        .collect(),
        StepType::AiFunction => {
            let is_search = step
                .function
                .as_deref()
                .and_then(|f| f.parse::<AiFunction>().ok())
                == Some(AiFunction::Search);
            let service = step
                .args
                .get("service")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            if is_search {
                refer(ObjectKind::SearchService, &service).into_iter().collect()
            } else {
                vec![]
            }
        }
        StepType::Analyst => stage_ref(&step.semantic_model).into_iter().collect(),
        _ => vec![],
    }
}

/// Everything a step references: requirements plus the ancestors of its object.
pub fn step_references(step: &Step, session: &Session) -> Vec<ObjectRef> {
    let mut refs = step_requirements(step, session);
    if let Ok(Some(object)) = step_object(step, session) {
        let mut parent = object.parent();
        while let Some(p) = parent {
            parent = p.parent();
            refs.push(p);
        }
    }
    refs
}

/// Build a topological execution order from explicit and implicit dependencies.
/// Uses Kahn's algorithm; among ready steps the earliest declared runs first.
pub fn build_execution_order(
    steps: &IndexMap<String, Step>,
    session: &Session,
) -> Result<Vec<String>, String> {
    let declared: HashMap<ObjectRef, usize> = steps
        .values()
        .enumerate()
        .filter_map(|(i, step)| step_object(step, session).ok().flatten().map(|o| (o, i)))
        .collect();

    let mut in_degree = vec![0usize; steps.len()];
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];
    let mut edges: HashSet<(usize, usize)> = HashSet::new();

    for (i, (id, step)) in steps.iter().enumerate() {
        let mut deps = Vec::new();
        for dep in &step.depends_on {
            let j = steps
                .get_index_of(dep)
                .ok_or_else(|| format!("step '{}' depends on unknown '{}'", id, dep))?;
            deps.push(j);
        }
        for source in output_references(step) {
            let j = steps.get_index_of(&source).ok_or_else(|| {
                format!("step '{}' uses the output of unknown step '{}'", id, source)
            })?;
            deps.push(j);
        }
        deps.extend(
            step_references(step, session)
                .iter()
                .filter_map(|r| declared.get(r).copied()),
        );
        for j in deps {
            if j != i && edges.insert((j, i)) {
                adjacency[j].push(i);
                in_degree[i] += 1;
            }
        }
    }

    let mut ready: BTreeSet<usize> = (0..steps.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(steps.len());
    while let Some(current) = ready.pop_first() {
        order.push(current);
        for &next in &adjacency[current] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.insert(next);
            }
        }
    }

    let ids: Vec<&String> = steps.keys().collect();
    if order.len() != steps.len() {
        let placed: HashSet<usize> = order.iter().copied().collect();
        let cycle_members: Vec<&str> = (0..steps.len())
            .filter(|i| !placed.contains(i))
            .map(|i| ids[i].as_str())
            .collect();
        return Err(format!(
            "dependency cycle detected involving: {}",
            cycle_members.join(", ")
        ));
    }

    Ok(order.into_iter().map(|i| ids[i].clone()).collect())
}
