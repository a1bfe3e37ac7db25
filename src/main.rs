use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use ingest_dispatch::{ChannelDispatcher, StepRegistry};
use ingest_handler::{HandlerRegistry, InputDescriptor};
use ingest_orchestrator::{
  ChannelNotifier, ExecutionEvent, Orchestrator, OrchestratorConfig, Submission,
};
use ingest_store::{
  CompletionStore, ExecutionStatus, ExecutionStore, IdEncodings, SqliteStore, Stores,
  TaskResultStore,
};
use ingest_worker::{WorkerConfig, WorkerRunner, register_builtin_steps};

/// Ingest - run multi-step import pipelines
#[derive(Parser)]
#[command(name = "ingest")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.ingest)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Database URL (default: sqlite://<data-dir>/ingest.db)
  #[arg(long, global = true)]
  database_url: Option<String>,

  /// Path to a JSON configuration file
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  /// Emit logs as JSON
  #[arg(long, global = true)]
  log_json: bool,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// List registered handlers and their actions
  Handlers,

  /// Import a file and wait until the execution settles
  ///
  /// Extra input parameters may be piped as a JSON object on stdin.
  Submit {
    /// Path to the file to import
    file: PathBuf,

    /// Action to run
    #[arg(long, default_value = "import")]
    action: String,

    /// Layer to import; repeat for several layers
    #[arg(long = "layer")]
    layers: Vec<String>,

    /// Submitting user
    #[arg(long)]
    user: Option<String>,

    /// Existing resource the action applies to
    #[arg(long)]
    resource: Option<String>,
  },

  /// Show an execution with its completions and task results
  Status {
    /// Execution identifier
    execution_id: String,
  },

  /// Re-run fan-in reconciliation for an execution
  Reconcile {
    /// Execution identifier
    execution_id: String,

    /// Diagnostic message to evaluate with
    #[arg(long)]
    log: Option<String>,
  },
}

/// Contents of the `--config` file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
  orchestrator: OrchestratorConfig,
  worker: WorkerConfig,
  database_url: Option<String>,
}

struct Settings {
  orchestrator: OrchestratorConfig,
  worker: WorkerConfig,
  database_url: String,
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  init_logging(cli.log_json);

  let Some(command) = cli.command else {
    println!("ingest - use --help to see available commands");
    return Ok(());
  };

  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async {
    match command {
      Commands::Handlers => list_handlers(),
      Commands::Submit {
        file,
        action,
        layers,
        user,
        resource,
      } => {
        let settings = load_settings(cli.data_dir, cli.database_url, cli.config).await?;
        submit(&settings, file, action, layers, user, resource).await
      }
      Commands::Status { execution_id } => {
        let settings = load_settings(cli.data_dir, cli.database_url, cli.config).await?;
        status(&settings, &execution_id).await
      }
      Commands::Reconcile { execution_id, log } => {
        let settings = load_settings(cli.data_dir, cli.database_url, cli.config).await?;
        reconcile(&settings, &execution_id, log.as_deref()).await
      }
    }
  })
}

fn init_logging(json: bool) {
  let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  let registry = tracing_subscriber::registry().with(env_filter);
  if json {
    registry
      .with(fmt::layer().json().with_writer(io::stderr))
      .init();
  } else {
    registry
      .with(fmt::layer().with_target(false).with_writer(io::stderr))
      .init();
  }
}

async fn load_settings(
  data_dir: Option<PathBuf>,
  database_url: Option<String>,
  config: Option<PathBuf>,
) -> Result<Settings> {
  let file_config = match config {
    Some(path) => {
      let content = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
      serde_json::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?
    }
    None => FileConfig::default(),
  };

  let database_url = match database_url.or(file_config.database_url) {
    Some(url) => url,
    None => {
      let data_dir = match data_dir {
        Some(dir) => dir,
        None => dirs::home_dir()
          .context("could not determine home directory")?
          .join(".ingest"),
      };
      tokio::fs::create_dir_all(&data_dir)
        .await
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;
      default_database_url(&data_dir)
    }
  };

  Ok(Settings {
    orchestrator: file_config.orchestrator,
    worker: file_config.worker,
    database_url,
  })
}

fn default_database_url(data_dir: &Path) -> String {
  format!("sqlite://{}", data_dir.join("ingest.db").display())
}

/// The orchestrator wired to a SQLite store, a channel dispatcher and a
/// local worker pool.
struct Pipeline {
  store: SqliteStore,
  orchestrator: Arc<Orchestrator<ChannelNotifier>>,
  runner: WorkerRunner<ChannelNotifier>,
  events: mpsc::UnboundedReceiver<ExecutionEvent>,
}

async fn build_pipeline(settings: &Settings) -> Result<Pipeline> {
  let store = SqliteStore::connect(&settings.database_url)
    .await
    .with_context(|| format!("failed to open database: {}", settings.database_url))?;
  let shared = Arc::new(store.clone());

  let mut steps = StepRegistry::new();
  register_builtin_steps(&mut steps);
  let steps = Arc::new(steps);

  let (dispatcher, receiver) = ChannelDispatcher::new(steps.clone(), shared.clone());
  let (sender, events) = mpsc::unbounded_channel();
  let orchestrator = Arc::new(Orchestrator::with_notifier(
    settings.orchestrator.clone(),
    Stores::shared(shared),
    Arc::new(HandlerRegistry::with_builtin()),
    Arc::new(dispatcher),
    ChannelNotifier::new(sender),
  ));
  let runner = WorkerRunner::new(settings.worker.clone(), receiver, steps, orchestrator.clone());

  Ok(Pipeline {
    store,
    orchestrator,
    runner,
    events,
  })
}

fn list_handlers() -> Result<()> {
  let registry = HandlerRegistry::with_builtin();
  for id in registry.supported_types() {
    let handler = registry.load(id)?;
    println!("{id}\t{}", handler.actions().join(", "));
  }
  Ok(())
}

async fn submit(
  settings: &Settings,
  file: PathBuf,
  action: String,
  layers: Vec<String>,
  user: Option<String>,
  resource: Option<String>,
) -> Result<()> {
  let params = read_params_from_stdin()?;
  let Pipeline {
    store,
    orchestrator,
    runner,
    mut events,
  } = build_pipeline(settings).await?;

  let cancel = CancellationToken::new();
  let worker = tokio::spawn(runner.start(cancel.clone()));

  let mut submission = Submission::new(InputDescriptor::from_file(file), action);
  submission.params = params;
  submission.user = user;
  submission.resource = resource;
  if !layers.is_empty() {
    submission = submission.with_param("layers", layers);
  }

  let execution_id = orchestrator
    .submit(submission)
    .await
    .context("failed to submit import")?;
  eprintln!("Submitted execution: {execution_id}");

  while let Some(event) = events.recv().await {
    if event.is_terminal() && event.execution_id() == execution_id {
      break;
    }
  }

  cancel.cancel();
  worker.await?.context("worker pool failed")?;

  let execution = store.get_execution(&execution_id).await?;
  println!("{}", serde_json::to_string_pretty(&execution)?);

  if execution.status == ExecutionStatus::Failed {
    bail!(
      "execution {} failed: {}",
      execution_id,
      execution.log.unwrap_or_default()
    );
  }
  Ok(())
}

async fn status(settings: &Settings, execution_id: &str) -> Result<()> {
  let store = SqliteStore::connect(&settings.database_url)
    .await
    .with_context(|| format!("failed to open database: {}", settings.database_url))?;

  let execution = store
    .get_execution(execution_id)
    .await
    .with_context(|| format!("execution '{execution_id}' not found"))?;
  let completions = store.list_completions(execution_id).await?;
  let tasks = store
    .task_results_for(&IdEncodings::new(execution_id))
    .await?;

  let output = serde_json::json!({
    "execution": execution,
    "completions": completions,
    "tasks": tasks,
  });
  println!("{}", serde_json::to_string_pretty(&output)?);
  Ok(())
}

async fn reconcile(settings: &Settings, execution_id: &str, log: Option<&str>) -> Result<()> {
  let pipeline = build_pipeline(settings).await?;
  let execution = pipeline.orchestrator.get_execution(execution_id).await?;

  let verdict = pipeline
    .orchestrator
    .evaluate_progress(execution_id, log, execution.source.as_deref())
    .await
    .context("reconciliation failed")?;

  let execution = pipeline.store.get_execution(execution_id).await?;
  eprintln!("Verdict: {verdict:?}");
  println!("{}", serde_json::to_string_pretty(&execution)?);
  Ok(())
}

fn read_params_from_stdin() -> Result<serde_json::Map<String, serde_json::Value>> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    return Ok(serde_json::Map::new());
  }

  let mut input = String::new();
  io::stdin()
    .read_to_string(&mut input)
    .context("failed to read parameters from stdin")?;

  if input.trim().is_empty() {
    return Ok(serde_json::Map::new());
  }
  match serde_json::from_str(&input).context("failed to parse parameters JSON from stdin")? {
    serde_json::Value::Object(params) => Ok(params),
    other => bail!("stdin parameters must be a JSON object, got {other}"),
  }
}
