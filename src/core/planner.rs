//! HS-004: Plan generation: diff resolved steps against the lock.

use super::resolver::step_object;
use super::types::*;
use crate::catalog::ObjectRef;
use crate::tripwire::hasher;
use indexmap::IndexMap;

/// Generate an execution plan by comparing resolved steps to lock state.
///
/// `steps` must already have templates resolved. With `prune`, lock entries
/// whose step is gone are destroyed last, newest first.
pub fn plan(
    name: &str,
    steps: &IndexMap<String, Step>,
    execution_order: &[String],
    lock: Option<&StateLock>,
    session: &Session,
    prune: bool,
) -> Result<ExecutionPlan, String> {
    let mut changes = Vec::new();

    for step_id in execution_order {
        let Some(step) = steps.get(step_id) else {
            continue;
        };
        let entry = lock.and_then(|l| l.steps.get(step_id));
        let action = determine_action(step, entry, session)?;
        let declared = step_object(step, session)?;
        let recorded = entry.and_then(recorded_object);
        let object = match (action, &declared) {
            (PlanAction::Destroy, _) | (_, None) => entry.and_then(|e| e.object.clone()),
            (_, Some(o)) => Some(o.name.clone()),
        };
        let previous = match action {
            PlanAction::Create | PlanAction::Replace => {
                recorded.filter(|r| declared.as_ref() != Some(r))
            }
            _ => None,
        };
        changes.push(PlannedChange {
            step_id: step_id.clone(),
            step_type: step.step_type,
            action,
            description: describe_action(
                step_id,
                step,
                object.as_deref(),
                action,
                entry,
                previous.as_ref(),
            ),
            object,
            previous,
        });
    }

    if prune {
        if let Some(lock) = lock {
            for (step_id, entry) in lock.steps.iter().rev() {
                if steps.contains_key(step_id) {
                    continue;
                }
                changes.push(PlannedChange {
                    step_id: step_id.clone(),
                    step_type: entry.step_type,
                    action: PlanAction::Destroy,
                    description: match &entry.object {
                        Some(o) => format!("{}: drop {} {} (step removed)", step_id, entry.step_type, o),
                        None => format!("{}: forget (step removed)", step_id),
                    },
                    object: entry.object.clone(),
                    previous: None,
                });
            }
        }
    }

    let count = |a: PlanAction| changes.iter().filter(|c| c.action == a).count() as u32;
    Ok(ExecutionPlan {
        name: name.to_string(),
        to_create: count(PlanAction::Create),
        to_replace: count(PlanAction::Replace),
        to_run: count(PlanAction::Run),
        to_destroy: count(PlanAction::Destroy),
        unchanged: count(PlanAction::NoOp),
        changes,
        execution_order: execution_order.to_vec(),
    })
}

/// Determine what action to take for one resolved step.
fn determine_action(
    step: &Step,
    entry: Option<&StepLock>,
    session: &Session,
) -> Result<PlanAction, String> {
    if !step.step_type.is_provisioning() {
        return Ok(PlanAction::Run);
    }

    if step.is_absent() {
        return Ok(if entry.is_some() {
            PlanAction::Destroy
        } else {
            PlanAction::NoOp
        });
    }

    let Some(entry) = entry else {
        return Ok(PlanAction::Create);
    };
    if entry.status == StepStatus::Converged && entry.hash == hash_desired_state(step, session)? {
        return Ok(PlanAction::NoOp);
    }
    Ok(PlanAction::Replace)
}

/// The catalog object a lock entry says exists.
fn recorded_object(entry: &StepLock) -> Option<ObjectRef> {
    let kind = entry.step_type.object_kind()?;
    entry.object.as_ref().map(|name| ObjectRef::new(kind, name.clone()))
}

/// Hash of the resolved step plus the namespace it lands in.
pub fn hash_desired_state(step: &Step, session: &Session) -> Result<String, String> {
    hasher::hash_canonical(&serde_json::json!({
        "step": step,
        "namespace": session.namespace(),
    }))
}

/// Generate a human-readable description of a planned action.
fn describe_action(
    step_id: &str,
    step: &Step,
    object: Option<&str>,
    action: PlanAction,
    entry: Option<&StepLock>,
    previous: Option<&ObjectRef>,
) -> String {
    let target = || match (step.step_type, object) {
        (_, Some(o)) => format!("{} {}", step.step_type, o),
        (StepType::CopyFiles, None) => format!(
            "copy {} -> {}",
            step.repository.as_deref().unwrap_or("?"),
            step.into.as_deref().unwrap_or("?")
        ),
        _ => step.step_type.to_string(),
    };

    match action {
        PlanAction::Create => format!("{}: create {}", step_id, target()),
        PlanAction::Replace => {
            let reason = match (previous, entry.map(|e| e.status)) {
                (Some(old), _) => format!("was {}", old),
                (None, Some(StepStatus::Failed)) => "previous run failed".to_string(),
                (None, Some(StepStatus::Drifted)) => "drifted".to_string(),
                _ => "desired state changed".to_string(),
            };
            format!("{}: replace {} ({})", step_id, target(), reason)
        }
        PlanAction::Run => match step.step_type {
            StepType::AiFunction => format!(
                "{}: invoke {}",
                step_id,
                step.function.as_deref().unwrap_or("?")
            ),
            StepType::Analyst => format!(
                "{}: ask {}",
                step_id,
                step.semantic_model.as_deref().unwrap_or("?")
            ),
            _ => format!("{}: run query", step_id),
        },
        PlanAction::Destroy => format!("{}: drop {}", step_id, target()),
        PlanAction::NoOp => format!("{}: no changes", step_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session {
            account: "myorg-lab".to_string(),
            role: None,
            warehouse: Some("COMPUTE_WH".to_string()),
            database: Some("SNOWRETAIL_DB".to_string()),
            schema: Some("SNOWRETAIL_SCHEMA".to_string()),
        }
    }

    fn steps() -> IndexMap<String, Step> {
        serde_yaml_ng::from_str(
            r#"
db:
  type: database
  name: snowretail_db
stage:
  type: stage
  name: file
  directory: true
sentiment:
  type: ai_function
  function: sentiment
  args: { text: great }
"#,
        )
        .unwrap()
    }

    fn order() -> Vec<String> {
        vec!["db".to_string(), "stage".to_string(), "sentiment".to_string()]
    }

    fn converged_lock(steps: &IndexMap<String, Step>) -> StateLock {
        let mut lock = StateLock::new("retail", "myorg-lab");
        for (id, step) in steps {
            if !step.step_type.is_provisioning() {
                continue;
            }
            lock.steps.insert(
                id.clone(),
                StepLock {
                    step_type: step.step_type,
                    status: StepStatus::Converged,
                    object: step_object(step, &session()).unwrap().map(|o| o.name),
                    applied_at: None,
                    duration_seconds: None,
                    hash: hash_desired_state(step, &session()).unwrap(),
                },
            );
        }
        lock
    }

    #[test]
    fn test_hs004_plan_all_create() {
        let p = plan("retail", &steps(), &order(), None, &session(), true).unwrap();
        assert_eq!(p.to_create, 2);
        assert_eq!(p.to_run, 1);
        assert_eq!(p.unchanged, 0);
        assert_eq!(p.changes[1].object.as_deref(), Some("SNOWRETAIL_DB.SNOWRETAIL_SCHEMA.FILE"));
        assert_eq!(
            p.changes[1].description,
            "stage: create stage SNOWRETAIL_DB.SNOWRETAIL_SCHEMA.FILE"
        );
    }

    #[test]
    fn test_hs004_plan_all_unchanged() {
        let s = steps();
        let lock = converged_lock(&s);
        let p = plan("retail", &s, &order(), Some(&lock), &session(), true).unwrap();
        assert_eq!(p.unchanged, 2);
        assert_eq!(p.to_run, 1);
        assert_eq!(p.to_create + p.to_replace + p.to_destroy, 0);
    }

    #[test]
    fn test_hs004_replace_on_hash_change() {
        let mut s = steps();
        let lock = converged_lock(&s);
        s["stage"].directory = Some(false);
        let p = plan("retail", &s, &order(), Some(&lock), &session(), true).unwrap();
        assert_eq!(p.to_replace, 1);
        assert!(p.changes[1].description.ends_with("(desired state changed)"));
    }

    #[test]
    fn test_hs004_namespace_change_drops_old_object() {
        let s = steps();
        let lock = converged_lock(&s);
        let mut other = session();
        other.schema = Some("OTHER".to_string());
        let p = plan("retail", &s, &order(), Some(&lock), &other, true).unwrap();
        assert_eq!(p.to_replace, 2);

        // The database keeps its name; the stage moves to the new schema.
        assert_eq!(p.changes[0].previous, None);
        assert_eq!(p.changes[1].object.as_deref(), Some("SNOWRETAIL_DB.OTHER.FILE"));
        assert_eq!(
            p.changes[1].previous,
            Some(ObjectRef::new(
                crate::catalog::ObjectKind::Stage,
                "SNOWRETAIL_DB.SNOWRETAIL_SCHEMA.FILE"
            ))
        );
        assert_eq!(
            p.changes[1].description,
            "stage: replace stage SNOWRETAIL_DB.OTHER.FILE (was stage SNOWRETAIL_DB.SNOWRETAIL_SCHEMA.FILE)"
        );
    }

    #[test]
    fn test_hs004_rename_drops_old_object() {
        let mut s = steps();
        let lock = converged_lock(&s);
        s["stage"].name = Some("file2".to_string());
        let p = plan("retail", &s, &order(), Some(&lock), &session(), true).unwrap();
        assert_eq!(p.changes[1].action, PlanAction::Replace);
        assert_eq!(
            p.changes[1].previous.as_ref().map(|o| o.name.as_str()),
            Some("SNOWRETAIL_DB.SNOWRETAIL_SCHEMA.FILE")
        );

        // Same name, different settings: replaced in place.
        let mut s = steps();
        s["stage"].directory = Some(false);
        let p = plan("retail", &s, &order(), Some(&lock), &session(), true).unwrap();
        assert_eq!(p.changes[1].previous, None);
    }

    #[test]
    fn test_hs004_type_change_drops_old_kind() {
        let mut s = steps();
        let lock = converged_lock(&s);
        s["stage"] = Step::new(StepType::Table).named("file");
        s["stage"].columns.insert("ID".to_string(), "NUMBER".to_string());
        let p = plan("retail", &s, &order(), Some(&lock), &session(), true).unwrap();
        let old = p.changes[1].previous.as_ref().unwrap();
        assert_eq!(old.kind, crate::catalog::ObjectKind::Stage);
        assert_eq!(old.name, "SNOWRETAIL_DB.SNOWRETAIL_SCHEMA.FILE");
    }

    #[test]
    fn test_hs004_failed_step_gets_retried() {
        let s = steps();
        let mut lock = converged_lock(&s);
        lock.steps["stage"].status = StepStatus::Failed;
        let p = plan("retail", &s, &order(), Some(&lock), &session(), true).unwrap();
        assert_eq!(p.changes[1].action, PlanAction::Replace);
        assert!(p.changes[1].description.contains("previous run failed"));
    }

    #[test]
    fn test_hs004_drifted_step_replaced() {
        let s = steps();
        let mut lock = converged_lock(&s);
        lock.steps["db"].status = StepStatus::Drifted;
        let p = plan("retail", &s, &order(), Some(&lock), &session(), true).unwrap();
        assert_eq!(p.changes[0].action, PlanAction::Replace);
    }

    #[test]
    fn test_hs004_absent_step() {
        let mut s = steps();
        s["stage"].state = Some("absent".to_string());
        let p = plan("retail", &s, &order(), None, &session(), true).unwrap();
        assert_eq!(p.changes[1].action, PlanAction::NoOp);

        let lock = converged_lock(&steps());
        let p = plan("retail", &s, &order(), Some(&lock), &session(), true).unwrap();
        assert_eq!(p.changes[1].action, PlanAction::Destroy);
        assert_eq!(p.changes[1].previous, None);
        assert_eq!(p.to_destroy, 1);
    }

    #[test]
    fn test_hs004_prune_removed_steps_in_reverse() {
        let full = steps();
        let mut lock = converged_lock(&full);
        lock.steps.insert(
            "repo".to_string(),
            StepLock {
                step_type: StepType::GitRepository,
                status: StepStatus::Converged,
                object: Some("SNOWRETAIL_DB.SNOWRETAIL_SCHEMA.REPO".to_string()),
                applied_at: None,
                duration_seconds: None,
                hash: "blake3:xxx".to_string(),
            },
        );
        let mut s = full.clone();
        s.shift_remove("stage");
        let order = vec!["db".to_string(), "sentiment".to_string()];

        let p = plan("retail", &s, &order, Some(&lock), &session(), true).unwrap();
        let pruned: Vec<&str> = p
            .changes
            .iter()
            .filter(|c| c.action == PlanAction::Destroy)
            .map(|c| c.step_id.as_str())
            .collect();
        assert_eq!(pruned, vec!["repo", "stage"]);

        let p = plan("retail", &s, &order, Some(&lock), &session(), false).unwrap();
        assert_eq!(p.to_destroy, 0);
    }

    #[test]
    fn test_hs004_hash_deterministic() {
        let s = steps();
        let h1 = hash_desired_state(&s["stage"], &session()).unwrap();
        let h2 = hash_desired_state(&s["stage"], &session()).unwrap();
        assert_eq!(h1, h2);
        assert!(h1.starts_with("blake3:"));
        assert_ne!(h1, hash_desired_state(&s["db"], &session()).unwrap());
    }

    #[test]
    fn test_hs004_describe_invoke() {
        let p = plan("retail", &steps(), &order(), None, &session(), true).unwrap();
        assert_eq!(p.changes[2].description, "sentiment: invoke sentiment");
    }
}
