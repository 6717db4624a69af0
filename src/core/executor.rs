//! HS-012: Executor: orchestration loop for apply.
//!
//! parse → validate → resolve → order → plan → for each step:
//! sqlgen → platform → hash → state → events
//!
//! Execution is strictly sequential and stops at the first failure. Outputs
//! of earlier steps are substituted into later ones as the run goes.

use super::parser;
use super::planner;
use super::resolver;
use super::sqlgen;
use super::state;
use super::types::*;
use crate::catalog::ObjectRef;
use crate::cortex::{decode, AnalystAnswer, FunctionCatalog};
use crate::platform::{Effect, Platform, QueryResult, Statement};
use crate::tripwire::eventlog::RunLog;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Configuration for an apply run.
pub struct ApplyConfig<'a> {
    pub config: &'a PipelineConfig,
    pub platform: &'a mut dyn Platform,
    pub state_dir: &'a Path,
    pub force: bool,
    pub dry_run: bool,
    pub step_filter: Option<&'a str>,
}

/// Everything computed before the first statement runs.
#[derive(Debug)]
pub struct Prepared {
    pub session: Session,
    pub steps: IndexMap<String, Step>,
    pub plan: ExecutionPlan,
    pub lock: Option<StateLock>,
}

/// Validate, resolve, order and plan a pipeline against its lock.
pub fn prepare(config: &PipelineConfig, state_dir: &Path) -> Result<Prepared, String> {
    let errors = parser::validate_config(config);
    if !errors.is_empty() {
        let lines: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        return Err(format!(
            "{} validation error(s):\n  {}",
            errors.len(),
            lines.join("\n  ")
        ));
    }

    let session = resolver::resolve_session(&config.connection, &config.params)?;
    let steps = resolver::resolve_steps(config, &session)?;
    let order = resolver::build_execution_order(&steps, &session)?;
    let lock = state::load_lock(state_dir, &config.name)?;
    let plan = planner::plan(
        &config.name,
        &steps,
        &order,
        lock.as_ref(),
        &session,
        config.policy.prune,
    )?;

    Ok(Prepared {
        session,
        steps,
        plan,
        lock,
    })
}

/// Execute the apply loop.
pub fn apply(cfg: ApplyConfig) -> Result<RunResult, String> {
    let start = Instant::now();
    let prepared = prepare(cfg.config, cfg.state_dir)?;

    if cfg.dry_run {
        return Ok(RunResult {
            pipeline: cfg.config.name.clone(),
            steps_converged: 0,
            steps_unchanged: prepared.plan.unchanged,
            steps_failed: 0,
            outputs: vec![],
            failure: None,
            total_duration: start.elapsed(),
        });
    }

    let Prepared {
        session,
        steps,
        plan,
        lock,
    } = prepared;
    let catalog = FunctionCatalog::from_config(&cfg.config.functions);
    let policy = &cfg.config.policy;
    let log = RunLog::open(cfg.state_dir, &cfg.config.name, policy.events);

    let mut lock = lock.unwrap_or_else(|| StateLock::new(&cfg.config.name, &session.account));
    let mut ctx = RecordCtx {
        lock: &mut lock,
        log: &log,
        pipeline: &cfg.config.name,
    };

    ctx.log(ProvenanceEvent::RunStarted {
        pipeline: cfg.config.name.clone(),
        handson_version: env!("CARGO_PKG_VERSION").to_string(),
    });
    info!(pipeline = %cfg.config.name, platform = cfg.platform.name(), run_id = %log.run_id(), "run started");

    let mut run = RunState::default();

    for change in &plan.changes {
        if let Some(filter) = cfg.step_filter {
            if change.step_id != filter {
                continue;
            }
        }

        let step = steps.get(&change.step_id);
        if change.action == PlanAction::NoOp && !cfg.force && !run.invalidated(step, &session) {
            run.unchanged += 1;
            continue;
        }

        let exec = Exec {
            platform: &mut *cfg.platform,
            session: &session,
            catalog: &catalog,
        };
        match apply_change(exec, change, step, &run, &mut ctx) {
            Ok(outcome) => {
                run.converged += 1;
                if change.action != PlanAction::Destroy && change.step_type.is_provisioning() {
                    run.applied.insert(change.step_id.clone());
                }
                run.replaced.extend(outcome.upserted);
                run.dropped.extend(outcome.dropped);
                if let Some(value) = outcome.output {
                    run.context.insert(change.step_id.clone(), value.context_text());
                    run.outputs.push(StepOutput {
                        step_id: change.step_id.clone(),
                        value,
                    });
                }
            }
            Err(message) => {
                run.failed += 1;
                warn!(step = %change.step_id, error = %message, "stopping after failure");
                run.failure = Some(format!("{}: {}", change.step_id, message));
                break;
            }
        }
    }

    ctx.lock.touch();
    if policy.lock_file {
        state::save_lock(cfg.state_dir, ctx.lock)?;
    }

    ctx.log(ProvenanceEvent::RunCompleted {
        pipeline: cfg.config.name.clone(),
        steps_converged: run.converged,
        steps_unchanged: run.unchanged,
        steps_failed: run.failed,
        total_seconds: start.elapsed().as_secs_f64(),
    });

    Ok(RunResult {
        pipeline: cfg.config.name.clone(),
        steps_converged: run.converged,
        steps_unchanged: run.unchanged,
        steps_failed: run.failed,
        outputs: run.outputs,
        failure: run.failure,
        total_duration: start.elapsed(),
    })
}

#[derive(Default)]
struct RunState {
    converged: u32,
    unchanged: u32,
    failed: u32,
    outputs: Vec<StepOutput>,
    failure: Option<String>,
    /// Objects upserted this run; replacing one empties it on the platform.
    replaced: HashSet<ObjectRef>,
    /// Objects dropped this run, children included.
    dropped: HashSet<ObjectRef>,
    /// Provisioning steps that ran this run.
    applied: HashSet<String>,
    /// Text of each output, for `{{steps.<id>.output}}`.
    context: IndexMap<String, String>,
}

impl RunState {
    /// True when something this step lives in, uses or explicitly depends on
    /// was re-applied earlier in the run, so its own NO-OP no longer holds.
    fn invalidated(&self, step: Option<&Step>, session: &Session) -> bool {
        step.is_some_and(|s| {
            !s.is_absent()
                && (s.depends_on.iter().any(|d| self.applied.contains(d))
                    || resolver::step_references(s, session)
                        .iter()
                        .any(|r| self.replaced.contains(r)))
        })
    }

    /// True when the object or one of its ancestors is already gone.
    fn already_dropped(&self, object: &ObjectRef) -> bool {
        let mut current = Some(object.clone());
        while let Some(o) = current {
            if self.dropped.contains(&o) {
                return true;
            }
            current = o.parent();
        }
        false
    }
}

/// What a step runs against.
struct Exec<'a> {
    platform: &'a mut dyn Platform,
    session: &'a Session,
    catalog: &'a FunctionCatalog,
}

/// Shared context for recording step outcomes.
struct RecordCtx<'a> {
    lock: &'a mut StateLock,
    log: &'a RunLog,
    pipeline: &'a str,
}

impl RecordCtx<'_> {
    fn log(&self, event: ProvenanceEvent) {
        if let Err(e) = self.log.record(event) {
            warn!(error = %e, "cannot append provenance event");
        }
    }
}

/// What a successful step left behind.
struct Outcome {
    upserted: Option<ObjectRef>,
    dropped: Vec<ObjectRef>,
    output: Option<StepValue>,
}

/// Apply a single planned change. `Err` carries the message that aborts the run.
fn apply_change(
    exec: Exec,
    change: &PlannedChange,
    step: Option<&Step>,
    run: &RunState,
    ctx: &mut RecordCtx,
) -> Result<Outcome, String> {
    ctx.log(ProvenanceEvent::StepStarted {
        pipeline: ctx.pipeline.to_string(),
        step: change.step_id.clone(),
        action: change.action.to_string(),
    });
    info!(step = %change.step_id, action = %change.action, "{}", change.description);

    let session = exec.session;
    let step_start = Instant::now();
    let mut dropped = Vec::new();

    // A renamed or moved object leaves its old name behind; drop it first.
    if let Some(previous) = change.previous.as_ref().filter(|p| !run.already_dropped(p)) {
        info!(step = %change.step_id, object = %previous, "dropping previous object");
        if let Err(e) = exec.platform.execute(session, &sqlgen::destroy_statement(previous)) {
            let duration = step_start.elapsed().as_secs_f64();
            return Err(record_failure(ctx, change, Some(previous.name.clone()), duration, &e.to_string()));
        }
        dropped.push(previous.clone());
    }

    let executed = run_step(exec, change, step, run);
    let duration = step_start.elapsed().as_secs_f64();
    let (statement, output) = match executed {
        Ok(r) => r,
        Err(e) => return Err(record_failure(ctx, change, change.object.clone(), duration, &e)),
    };

    let hash = match step {
        Some(s) if change.action != PlanAction::Destroy => planner::hash_desired_state(s, session)?,
        _ => String::new(),
    };
    record_success(ctx, change, duration, &hash);

    let mut upserted = None;
    match statement.map(|s| s.effect) {
        Some(Effect::Upsert { object, .. }) => upserted = Some(object),
        Some(Effect::Drop(object)) => dropped.push(object),
        _ => {}
    }
    Ok(Outcome {
        upserted,
        dropped,
        output,
    })
}
/// Generate and execute one step. Returns the statement that ran, if any,
/// and the step's output.
fn run_step(
    exec: Exec,
    change: &PlannedChange,
    step: Option<&Step>,
    run: &RunState,
) -> Result<(Option<Statement>, Option<StepValue>), String> {
    let step = match (change.action, step) {
        (PlanAction::Destroy, _) => {
            let Some(target) = destroy_target(change).filter(|o| !run.already_dropped(o)) else {
                return Ok((None, None));
            };
            let statement = sqlgen::destroy_statement(&target);
            exec.platform
                .execute(exec.session, &statement)
                .map_err(|e| e.to_string())?;
            return Ok((Some(statement), None));
        }
        (_, Some(step)) => step,
        (_, None) => return Ok((None, None)),
    };

    let step = if change.action == PlanAction::Run {
        resolver::substitute_outputs(step, &run.context)?
    } else {
        step.clone()
    };

    if step.step_type == StepType::Analyst {
        let answer = ask_analyst(exec.platform, exec.session, &step)?;
        return Ok((None, Some(StepValue::Analyst(answer))));
    }

    let statement = sqlgen::step_statement(&step, exec.session, exec.catalog)?;
    let result = exec
        .platform
        .execute(exec.session, &statement)
        .map_err(|e| e.to_string())?;
    let output = decode_output(change, &statement, result)?;
    Ok((Some(statement), output))
}

/// Ask the analyst, then run the SQL it proposes.
pub fn ask_analyst(
    platform: &mut dyn Platform,
    session: &Session,
    step: &Step,
) -> Result<AnalystAnswer, String> {
    let request = sqlgen::analyst_request(step, session)?;
    let mut answer = platform
        .analyst(session, &request)
        .map_err(|e| e.to_string())?;
    if let Some(sql) = &answer.sql {
        debug!(sql = %sql, "running analyst SQL");
        let result = platform
            .execute(session, &Statement::new(sql.clone(), Effect::Opaque))
            .map_err(|e| format!("analyst SQL failed: {}", e))?;
        answer.result = Some(result);
    }
    Ok(answer)
}

/// The object a DESTROY drops, if the step owned one.
fn destroy_target(change: &PlannedChange) -> Option<ObjectRef> {
    let kind = change.step_type.object_kind()?;
    change.object.as_ref().map(|name| ObjectRef::new(kind, name.clone()))
}

/// Turn an invoking step's raw result into its output value.
fn decode_output(
    change: &PlannedChange,
    statement: &Statement,
    result: QueryResult,
) -> Result<Option<StepValue>, String> {
    if change.action != PlanAction::Run {
        return Ok(None);
    }
    match &statement.effect {
        Effect::Invoke { call, .. } => {
            let out = decode(call.function, &call.args, &result)?;
            Ok(Some(StepValue::Ai(out)))
        }
        _ => Ok(Some(StepValue::Table(result))),
    }
}

/// Record a successful step into the lock and event log.
fn record_success(ctx: &mut RecordCtx, change: &PlannedChange, duration: f64, hash: &str) {
    match change.action {
        PlanAction::Destroy => {
            ctx.lock.forget(&change.step_id);
        }
        _ if change.step_type.is_provisioning() => {
            ctx.lock.converge(
                &change.step_id,
                change.step_type,
                change.object.clone(),
                hash,
                duration,
            );
        }
        _ => {}
    }

    ctx.log(ProvenanceEvent::StepConverged {
        pipeline: ctx.pipeline.to_string(),
        step: change.step_id.clone(),
        duration_seconds: duration,
        hash: hash.to_string(),
    });
}

/// Record a step failure into the lock and event log. Returns the message.
///
/// `object` is what the lock should remember the step owning, so the next
/// run retries against it.
fn record_failure(
    ctx: &mut RecordCtx,
    change: &PlannedChange,
    object: Option<String>,
    duration: f64,
    error: &str,
) -> String {
    if change.step_type.is_provisioning() {
        ctx.lock.fail(&change.step_id, change.step_type, object, duration);
    }

    ctx.log(ProvenanceEvent::StepFailed {
        pipeline: ctx.pipeline.to_string(),
        step: change.step_id.clone(),
        error: error.to_string(),
    });

    error.to_string()
}
