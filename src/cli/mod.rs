//! HS-017: CLI subcommands (init, validate, plan, apply, drift, status, call,
//! ask, functions, schema, completions).

use crate::core::{executor, parser, resolver, sqlgen, state, types};
use crate::cortex::{decode, AiFunction, CatalogVersion, FunctionCatalog, ParamShape};
use crate::platform::memory::MemoryPlatform;
use crate::platform::rest::RestPlatform;
use crate::platform::{Effect, Platform};
use crate::tripwire::{drift, eventlog};
use crate::tripwire::eventlog::RunLog;
use clap::{CommandFactory, Parser, Subcommand};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

/// Subdirectory of the state dir that holds `--simulate` runs.
const SIMULATION_DIR: &str = ".simulate";

/// The tutorial pipeline written by `handson init`.
pub const STARTER_PIPELINE: &str = r#"version: "1.0"
name: snow-retail-handson
description: "Snow Retail hands-on: provision the lab, then try the AI functions"

params:
  database: SNOWRETAIL_DB
  schema: SNOWRETAIL_SCHEMA
  repo_origin: https://github.com/snow-retail/handson.git
  embedding_model: multilingual-e5-large
  completion_model: claude-3-5-sonnet

connection:
  account: myorg-myaccount
  role: ACCOUNTADMIN
  warehouse: COMPUTE_WH
  database: "{{params.database}}"
  schema: "{{params.schema}}"
  token_env: SNOWFLAKE_TOKEN

functions:
  catalog: ai

steps:
  database:
    type: database
    name: "{{params.database}}"
    comment: Snow Retail hands-on

  schema:
    type: schema
    name: "{{params.schema}}"

  stage:
    type: stage
    name: FILE
    encryption: SNOWFLAKE_SSE
    directory: true

  semantic-stage:
    type: stage
    name: SEMANTIC_MODEL_STAGE
    encryption: SNOWFLAKE_SSE
    directory: true

  api-integration:
    type: api_integration
    name: GIT_API_INTEGRATION
    allowed_prefixes: ["https://github.com/snow-retail/"]

  git-repository:
    type: git_repository
    name: SNOW_RETAIL_REPO
    api_integration: GIT_API_INTEGRATION
    origin: "{{params.repo_origin}}"

  copy-reviews:
    type: copy_files
    repository: SNOW_RETAIL_REPO
    branch: main
    path: data
    into: FILE/data

  copy-semantic-model:
    type: copy_files
    repository: SNOW_RETAIL_REPO
    branch: main
    path: semantic_model
    into: SEMANTIC_MODEL_STAGE

  reviews-table:
    type: table
    name: CUSTOMER_REVIEWS
    columns:
      REVIEW_ID: VARCHAR(20)
      PRODUCT_ID: VARCHAR(10)
      CUSTOMER_ID: VARCHAR(10)
      RATING: NUMBER(2,1)
      REVIEW_TEXT: TEXT
      REVIEW_DATE: TIMESTAMP_NTZ
      PURCHASE_CHANNEL: VARCHAR(20)
      HELPFUL_VOTES: NUMBER(5)

  load-reviews:
    type: sql
    depends_on: [copy-reviews, reviews-table]
    sql: >-
      COPY INTO CUSTOMER_REVIEWS FROM @FILE/data/
      FILE_FORMAT = (TYPE = CSV SKIP_HEADER = 1 FIELD_OPTIONALLY_ENCLOSED_BY = '"')
      PATTERN = '.*customer_reviews.*[.]csv'

  documents-table:
    type: table
    name: SNOW_RETAIL_DOCUMENTS
    columns:
      DOCUMENT_ID: VARCHAR
      TITLE: VARCHAR
      CONTENT: VARCHAR
      DOCUMENT_TYPE: VARCHAR
      DEPARTMENT: VARCHAR

  load-documents:
    type: sql
    depends_on: [copy-reviews, documents-table]
    sql: >-
      COPY INTO SNOW_RETAIL_DOCUMENTS FROM @FILE/data/
      FILE_FORMAT = (TYPE = CSV SKIP_HEADER = 1 FIELD_OPTIONALLY_ENCLOSED_BY = '"')
      PATTERN = '.*snow_retail_documents.*[.]csv'

  analysis-table:
    type: table
    name: CUSTOMER_ANALYSIS
    columns:
      ANALYSIS_ID: NUMBER AUTOINCREMENT
      REVIEW_ID: VARCHAR(20)
      PRODUCT_ID: VARCHAR(10)
      CUSTOMER_ID: VARCHAR(10)
      RATING: NUMBER(2,1)
      REVIEW_TEXT: TEXT
      REVIEW_DATE: TIMESTAMP_NTZ
      PURCHASE_CHANNEL: VARCHAR(20)
      HELPFUL_VOTES: NUMBER(5)
      CHUNKED_TEXT: TEXT
      EMBEDDING: VECTOR(FLOAT, 1024)
      SENTIMENT_SCORE: FLOAT
      UPDATED_AT: TIMESTAMP_NTZ DEFAULT CURRENT_TIMESTAMP()

  prepare-analysis:
    type: sql
    depends_on: [load-reviews, analysis-table]
    sql: >-
      INSERT INTO CUSTOMER_ANALYSIS (REVIEW_ID, PRODUCT_ID, CUSTOMER_ID, RATING,
      REVIEW_TEXT, REVIEW_DATE, PURCHASE_CHANNEL, HELPFUL_VOTES,
      CHUNKED_TEXT, EMBEDDING, SENTIMENT_SCORE)
      SELECT r.REVIEW_ID, r.PRODUCT_ID, r.CUSTOMER_ID, r.RATING,
      r.REVIEW_TEXT, r.REVIEW_DATE, r.PURCHASE_CHANNEL, r.HELPFUL_VOTES,
      c.value::TEXT,
      SNOWFLAKE.CORTEX.EMBED_TEXT_1024('{{params.embedding_model}}', c.value::TEXT),
      SNOWFLAKE.CORTEX.SENTIMENT(SNOWFLAKE.CORTEX.TRANSLATE(r.REVIEW_TEXT, '', 'en'))
      FROM (SELECT cr.* FROM CUSTOMER_REVIEWS cr
      LEFT JOIN CUSTOMER_ANALYSIS a ON cr.REVIEW_ID = a.REVIEW_ID
      WHERE a.REVIEW_ID IS NULL) r,
      LATERAL FLATTEN(input => SNOWFLAKE.CORTEX.SPLIT_TEXT_RECURSIVE_CHARACTER(r.REVIEW_TEXT, 'none', 300, 30)) c

  search-service:
    type: search_service
    name: SNOW_RETAIL_SEARCH_SERVICE
    depends_on: [load-documents]
    on: CONTENT
    attributes: [TITLE, DOCUMENT_TYPE, DEPARTMENT]
    target_lag: 1 day
    embedding_model: "{{params.embedding_model}}"
    source: >-
      SELECT DOCUMENT_ID, TITLE, CONTENT, DOCUMENT_TYPE, DEPARTMENT
      FROM SNOW_RETAIL_DOCUMENTS

  streamlit-app:
    type: streamlit
    name: SNOWRETAIL_APP
    repository: SNOW_RETAIL_REPO
    path: handson/mvp
    main_file: mainpage.py
    title: Snow Retail Analytics

  recent-reviews:
    type: query
    depends_on: [load-reviews]
    sql: SELECT REVIEW_ID, RATING, REVIEW_TEXT FROM CUSTOMER_REVIEWS ORDER BY REVIEW_DATE DESC LIMIT 5

  sentiment-by-product:
    type: query
    depends_on: [prepare-analysis]
    sql: >-
      SELECT PRODUCT_ID, ROUND(AVG(SENTIMENT_SCORE), 3) AS AVG_SENTIMENT, COUNT(DISTINCT REVIEW_ID) AS REVIEWS
      FROM CUSTOMER_ANALYSIS GROUP BY PRODUCT_ID ORDER BY AVG_SENTIMENT LIMIT 5

  translate-greeting:
    type: ai_function
    function: translate
    args: { text: こんにちは, from: ja, to: en }

  review-sentiment:
    type: ai_function
    function: sentiment
    args: { text: "The down jacket is warm and light. I wear it every day." }

  review-category:
    type: ai_function
    function: classify
    args:
      text: "The zipper broke after one week."
      categories: [quality, sizing, delivery, price]

  policy-search:
    type: ai_function
    function: search
    args:
      service: SNOW_RETAIL_SEARCH_SERVICE
      query: return policy for outerwear
      columns: [TITLE, CONTENT]
      limit: 3

  policy-answer:
    type: ai_function
    function: complete
    args:
      model: "{{params.completion_model}}"
      prompt: |-
        Answer the customer's question using only the documents below.

        Documents:
        {{steps.policy-search.output}}

        Question: Can I return a jacket I already wore?

  sales-question:
    type: analyst
    depends_on: [copy-semantic-model]
    semantic_model: SEMANTIC_MODEL_STAGE/sales_analysis_model.yaml
    question: What were total sales by month?

policy:
  lock_file: true
  events: true
  prune: true
"#;

/// Top-level command line.
#[derive(Parser, Debug)]
#[command(
    name = "handson",
    version,
    about = "Declarative provisioning and AI-function pipelines for data-platform hands-on labs"
)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new hands-on project
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate handson.yaml without connecting to the platform
    Validate {
        /// Path to handson.yaml
        #[arg(short, long, default_value = "handson.yaml")]
        file: PathBuf,
    },

    /// Show execution plan (diff desired vs lock)
    Plan {
        /// Path to handson.yaml
        #[arg(short, long, default_value = "handson.yaml")]
        file: PathBuf,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Run the pipeline
    Apply {
        /// Path to handson.yaml
        #[arg(short, long, default_value = "handson.yaml")]
        file: PathBuf,

        /// Run a single step
        #[arg(short, long)]
        step: Option<String>,

        /// Re-apply unchanged steps
        #[arg(long)]
        force: bool,

        /// Show what would be executed without running
        #[arg(long)]
        dry_run: bool,

        /// Run against the in-memory platform
        #[arg(long)]
        simulate: bool,

        /// Print step outputs as JSON
        #[arg(long)]
        json: bool,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Detect objects removed behind the pipeline's back
    Drift {
        /// Path to handson.yaml
        #[arg(short, long, default_value = "handson.yaml")]
        file: PathBuf,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Exit non-zero on any drift (for CI/cron)
        #[arg(long)]
        tripwire: bool,

        /// Check against the in-memory platform
        #[arg(long)]
        simulate: bool,
    },

    /// Show current state from lock files
    Status {
        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Target specific pipeline
        #[arg(short, long)]
        pipeline: Option<String>,

        /// Also show the last N provenance events
        #[arg(long, default_value_t = 0)]
        events: usize,
    },

    /// Invoke one AI function ad hoc
    Call {
        /// Function name (e.g. sentiment, translate)
        function: String,

        /// Argument as key=value (repeatable)
        #[arg(short, long = "arg", value_name = "KEY=VALUE")]
        args: Vec<String>,

        /// Path to handson.yaml (connection and catalog)
        #[arg(short, long, default_value = "handson.yaml")]
        file: PathBuf,

        /// Answer from the in-memory platform
        #[arg(long)]
        simulate: bool,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Ask a question against a staged semantic model
    Ask {
        /// Natural-language question
        question: String,

        /// Semantic model as STAGE/path/model.yaml
        #[arg(short, long)]
        model: String,

        /// Path to handson.yaml (connection)
        #[arg(short, long, default_value = "handson.yaml")]
        file: PathBuf,

        /// Answer from the in-memory platform
        #[arg(long)]
        simulate: bool,

        /// Print the answer as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the AI function catalog
    Functions {
        /// Catalog version (ai or cortex)
        #[arg(long, default_value = "ai")]
        catalog: CatalogVersion,
    },

    /// Print the JSON Schema of handson.yaml
    Schema,

    /// Generate shell completions
    Completions {
        /// Target shell
        shell: clap_complete::Shell,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Plan { file, state_dir } => cmd_plan(&file, &state_dir),
        Commands::Apply {
            file,
            step,
            force,
            dry_run,
            simulate,
            json,
            state_dir,
        } => cmd_apply(
            &file,
            &state_dir,
            ApplyFlags {
                step: step.as_deref(),
                force,
                dry_run,
                simulate,
                json,
            },
        ),
        Commands::Drift {
            file,
            state_dir,
            tripwire,
            simulate,
        } => cmd_drift(&file, &state_dir, tripwire, simulate),
        Commands::Status {
            state_dir,
            pipeline,
            events,
        } => cmd_status(&state_dir, pipeline.as_deref(), events),
        Commands::Call {
            function,
            args,
            file,
            simulate,
            json,
        } => cmd_call(&file, &function, &args, simulate, json),
        Commands::Ask {
            question,
            model,
            file,
            simulate,
            json,
        } => cmd_ask(&file, &question, &model, simulate, json),
        Commands::Functions { catalog } => cmd_functions(catalog),
        Commands::Schema => cmd_schema(),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "handson", &mut std::io::stdout());
            Ok(())
        }
    }
}

/// Build the platform a command talks to.
fn connect(config: &types::PipelineConfig, simulate: bool) -> Result<Box<dyn Platform>, String> {
    if simulate {
        return Ok(Box::new(MemoryPlatform::new()));
    }
    let session = resolver::resolve_session(&config.connection, &config.params)?;
    let mut connection = config.connection.clone();
    connection.account = session.account;
    Ok(Box::new(RestPlatform::from_connection(&connection)?))
}

fn cmd_init(path: &Path) -> Result<(), String> {
    let config_path = path.join("handson.yaml");
    if config_path.exists() {
        return Err(format!("{} already exists", config_path.display()));
    }

    let state_dir = path.join("state");
    std::fs::create_dir_all(&state_dir).map_err(|e| format!("cannot create state dir: {}", e))?;

    std::fs::write(&config_path, STARTER_PIPELINE)
        .map_err(|e| format!("cannot write {}: {}", config_path.display(), e))?;

    println!("Initialized hands-on project at {}", path.display());
    println!("  Created: {}", config_path.display());
    println!("  Created: {}/", state_dir.display());
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let config = parser::parse_config_file(file)?;
    let errors = parser::validate_config(&config);

    if errors.is_empty() {
        let provisioning = config
            .steps
            .values()
            .filter(|s| s.step_type.is_provisioning())
            .count();
        println!(
            "OK: {} ({} steps, {} provisioning, catalog {})",
            config.name,
            config.steps.len(),
            provisioning,
            config.functions.catalog
        );
        Ok(())
    } else {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        Err(format!("{} validation error(s)", errors.len()))
    }
}

fn cmd_plan(file: &Path, state_dir: &Path) -> Result<(), String> {
    let config = parser::parse_config_file(file)?;
    let prepared = executor::prepare(&config, state_dir)?;
    print_plan(&prepared.plan);
    Ok(())
}

/// Display a plan to stdout.
fn print_plan(plan: &types::ExecutionPlan) {
    println!("Planning: {} ({} steps)", plan.name, plan.changes.len());
    println!();

    for change in &plan.changes {
        let symbol = match change.action {
            types::PlanAction::Create => "+",
            types::PlanAction::Replace => "~",
            types::PlanAction::Run => ">",
            types::PlanAction::Destroy => "-",
            types::PlanAction::NoOp => " ",
        };
        println!("  {} {}", symbol, change.description);
    }

    println!();
    println!(
        "Plan: {} to create, {} to replace, {} to run, {} to destroy, {} unchanged.",
        plan.to_create, plan.to_replace, plan.to_run, plan.to_destroy, plan.unchanged
    );
}

struct ApplyFlags<'a> {
    step: Option<&'a str>,
    force: bool,
    dry_run: bool,
    simulate: bool,
    json: bool,
}

fn cmd_apply(file: &Path, state_dir: &Path, flags: ApplyFlags) -> Result<(), String> {
    let config = parser::parse_config_file(file)?;

    if flags.dry_run {
        let prepared = executor::prepare(&config, state_dir)?;
        print_plan(&prepared.plan);
        println!("Dry run: no statements executed.");
        return Ok(());
    }

    let state_dir = if flags.simulate {
        simulation_state(state_dir)?
    } else {
        state_dir.to_path_buf()
    };
    let mut platform = connect(&config, flags.simulate)?;
    let result = executor::apply(executor::ApplyConfig {
        config: &config,
        platform: platform.as_mut(),
        state_dir: &state_dir,
        force: flags.force,
        dry_run: false,
        step_filter: flags.step,
    })?;

    print_outputs(&result.outputs, flags.json)?;

    println!();
    if let Some(failure) = result.failure {
        println!(
            "Run stopped: {} converged, {} unchanged, {} FAILED",
            result.steps_converged, result.steps_unchanged, result.steps_failed
        );
        return Err(failure);
    }

    println!(
        "Run complete: {} converged, {} unchanged ({:.1}s).",
        result.steps_converged,
        result.steps_unchanged,
        result.total_duration.as_secs_f64()
    );
    Ok(())
}

/// State for a simulated apply. The in-memory platform starts empty, so
/// its lock does too; the real lock and event log are never touched.
fn simulation_state(state_dir: &Path) -> Result<PathBuf, String> {
    let dir = state_dir.join(SIMULATION_DIR);
    match std::fs::remove_dir_all(&dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(format!("cannot reset {}: {}", dir.display(), e)),
    }
    Ok(dir)
}

fn print_outputs(outputs: &[types::StepOutput], json: bool) -> Result<(), String> {
    if json {
        let text = serde_json::to_string_pretty(outputs)
            .map_err(|e| format!("cannot serialize outputs: {}", e))?;
        println!("{}", text);
        return Ok(());
    }
    for output in outputs {
        println!("{}:", output.step_id);
        for line in output.value.to_string().lines() {
            println!("  {}", line);
        }
    }
    Ok(())
}

fn cmd_drift(file: &Path, state_dir: &Path, tripwire_mode: bool, simulate: bool) -> Result<(), String> {
    let config = parser::parse_config_file(file)?;
    let Some(mut lock) = state::load_lock(state_dir, &config.name)? else {
        println!("No state found for {}. Run `handson apply` first.", config.name);
        return Ok(());
    };

    let session = resolver::resolve_session(&config.connection, &config.params)?;
    let mut platform = connect(&config, simulate)?;

    println!("Checking {} ({} steps)...", config.name, lock.steps.len());
    let findings = drift::detect_drift(&lock, platform.as_mut(), &session).map_err(|e| e.to_string())?;

    if findings.is_empty() {
        println!("No drift detected.");
        return Ok(());
    }

    // A simulated check compares against an empty platform; report only.
    let log = RunLog::open(state_dir, &config.name, config.policy.events && !simulate);
    for f in &findings {
        println!("  DRIFTED: {} ({})", f.step_id, f.detail);
        log.record(types::ProvenanceEvent::DriftDetected {
            pipeline: config.name.clone(),
            step: f.step_id.clone(),
            object: f.object.clone(),
            detail: f.detail.clone(),
        })?;
    }
    if simulate {
        println!();
        println!("Simulated check: lock and event log left unchanged.");
    } else {
        drift::mark_drifted(&mut lock, &findings);
        if config.policy.lock_file {
            state::save_lock(state_dir, &lock)?;
        }
    }

    println!();
    println!("Drift detected: {} step(s); the next apply replaces them.", findings.len());
    if tripwire_mode {
        return Err(format!("{} drift finding(s)", findings.len()));
    }
    Ok(())
}

fn cmd_status(state_dir: &Path, pipeline_filter: Option<&str>, events: usize) -> Result<(), String> {
    if !state_dir.exists() {
        println!("No state found. Run `handson apply` first.");
        return Ok(());
    }
    let entries = std::fs::read_dir(state_dir)
        .map_err(|e| format!("cannot read state dir {}: {}", state_dir.display(), e))?;

    let mut found = false;

    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        if let Some(filter) = pipeline_filter {
            if name != filter {
                continue;
            }
        }

        if !entry.path().is_dir() {
            continue;
        }

        if let Some(lock) = state::load_lock(state_dir, &name)? {
            found = true;
            println!("Pipeline: {} ({})", lock.pipeline, lock.account);
            println!("  Generated: {}", lock.generated_at);
            println!("  Generator: {}", lock.generator);
            println!("  Steps: {}", lock.steps.len());

            for (id, sl) in &lock.steps {
                let duration = sl
                    .duration_seconds
                    .map(|d| format!(" ({:.2}s)", d))
                    .unwrap_or_default();
                let object = sl.object.as_deref().map(|o| format!(" {}", o)).unwrap_or_default();
                println!("    {}: {} [{}]{}{}", id, sl.status, sl.step_type, object, duration);
            }

            if events > 0 {
                let recent = eventlog::read_events(state_dir, &name, events)?;
                println!("  Recent runs:");
                for summary in eventlog::summarize_runs(&recent) {
                    println!("    {}", summary.headline());
                }
                println!("  Recent events:");
                for e in &recent {
                    let line = serde_json::to_string(&e.event)
                        .map_err(|err| format!("cannot serialize event: {}", err))?;
                    println!("    {} {} {}", e.ts.to_rfc3339(), e.run, line);
                }
            }
            println!();
        }
    }

    if !found {
        println!("No state found. Run `handson apply` first.");
    }

    Ok(())
}

/// Parse `key=value` pairs. Non-text parameters accept JSON values.
fn parse_call_args(
    function: AiFunction,
    pairs: &[String],
) -> Result<IndexMap<String, serde_yaml_ng::Value>, String> {
    let mut args = IndexMap::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| format!("argument '{}' is not KEY=VALUE", pair))?;
        let shape = function
            .params()
            .iter()
            .find(|p| p.name == key)
            .map(|p| p.shape);
        let value = match shape {
            Some(ParamShape::Text) | None => serde_yaml_ng::Value::String(raw.to_string()),
            Some(_) => serde_json::from_str::<serde_json::Value>(raw)
                .map_err(|e| format!("argument '{}' must be JSON: {}", key, e))
                .and_then(|v| {
                    serde_yaml_ng::to_value(v).map_err(|e| format!("argument '{}': {}", key, e))
                })?,
        };
        args.insert(key.to_string(), value);
    }
    Ok(args)
}

fn cmd_call(
    file: &Path,
    function: &str,
    pairs: &[String],
    simulate: bool,
    json: bool,
) -> Result<(), String> {
    let config = parser::parse_config_file(file)?;
    let function: AiFunction = function.parse()?;
    let session = resolver::resolve_session(&config.connection, &config.params)?;
    let catalog = FunctionCatalog::from_config(&config.functions);

    let mut step = types::Step::new(types::StepType::AiFunction);
    step.function = Some(function.name().to_string());
    step.args = parse_call_args(function, pairs)?;

    let statement = sqlgen::step_statement(&step, &session, &catalog)?;
    let Effect::Invoke { call, .. } = &statement.effect else {
        return Err(format!("{} did not render an invocation", function));
    };

    let mut platform = connect(&config, simulate)?;
    let result = platform
        .execute(&session, &statement)
        .map_err(|e| e.to_string())?;
    let output = decode(call.function, &call.args, &result)?;

    if json {
        let text = serde_json::to_string_pretty(&output)
            .map_err(|e| format!("cannot serialize result: {}", e))?;
        println!("{}", text);
    } else {
        println!("{}", output);
    }
    Ok(())
}

fn cmd_ask(file: &Path, question: &str, model: &str, simulate: bool, json: bool) -> Result<(), String> {
    let config = parser::parse_config_file(file)?;
    let session = resolver::resolve_session(&config.connection, &config.params)?;

    let mut step = types::Step::new(types::StepType::Analyst);
    step.semantic_model = Some(model.to_string());
    step.question = Some(question.to_string());
    let request = sqlgen::analyst_request(&step, &session)?;

    let mut platform: Box<dyn Platform> = if simulate {
        // Assume the model is already staged.
        let mut memory = MemoryPlatform::new();
        memory.insert(request.stage.clone());
        Box::new(memory)
    } else {
        connect(&config, false)?
    };
    let answer = executor::ask_analyst(platform.as_mut(), &session, &step)?;

    if json {
        let text = serde_json::to_string_pretty(&answer)
            .map_err(|e| format!("cannot serialize answer: {}", e))?;
        println!("{}", text);
    } else {
        println!("{}", answer);
    }
    Ok(())
}

fn cmd_functions(version: CatalogVersion) -> Result<(), String> {
    let catalog = FunctionCatalog::new(version);
    println!("Function catalog: {}", version);
    println!();
    for f in AiFunction::ALL {
        let sql = catalog.resolve(f).unwrap_or_else(|_| "(not available)".to_string());
        println!("  {:<20} {:<48} -> {}", f.name(), sql, f.returns());
        println!("  {:<20} {}", "", f.signature());
    }
    Ok(())
}

fn cmd_schema() -> Result<(), String> {
    let schema = schemars::schema_for!(types::PipelineConfig);
    let text = serde_json::to_string_pretty(&schema)
        .map_err(|e| format!("cannot serialize schema: {}", e))?;
    println!("{}", text);
    Ok(())
}
