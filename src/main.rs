use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use transcriber_artifact::{FsStore, Store as ArtifactStore};
use transcriber_config::WorkflowDef;
use transcriber_engine::{ExecutionEngine, WorkflowRunner};
use transcriber_store::{SqliteStore, Store};
use transcriber_trigger::ArtifactArrived;
use transcriber_workflow::{StageRegistry, WorkflowDefinition};

/// Transcriber - durable media transcription workflows
#[derive(Parser)]
#[command(name = "transcriber")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.transcriber)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Log level used when RUST_LOG is not set
  #[arg(long, global = true, default_value = "info")]
  log_level: String,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Start a workflow for one artifact event read from stdin and run it to completion
  Run {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,
  },

  /// Read newline-delimited artifact events from stdin until EOF
  Serve {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,
  },

  /// Resume every running execution of a workflow
  Resume {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,
  },

  /// Print the stored record of an execution
  Status { execution_id: String },

  /// List executions of a workflow, newest first
  List { workflow_id: String },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_target(false)
    .with_writer(io::stderr)
    .init();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".transcriber"),
  };

  let Some(command) = cli.command else {
    println!("transcriber - use --help to see available commands");
    return Ok(());
  };

  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async {
    match command {
      Commands::Run { workflow_file } => run(&workflow_file, &data_dir).await,
      Commands::Serve { workflow_file } => serve(&workflow_file, &data_dir).await,
      Commands::Resume { workflow_file } => resume(&workflow_file, &data_dir).await,
      Commands::Status { execution_id } => status(&execution_id, &data_dir).await,
      Commands::List { workflow_id } => list(&workflow_id, &data_dir).await,
    }
  })
}

async fn run(workflow_file: &Path, data_dir: &Path) -> Result<()> {
  let engine = open_engine(workflow_file, data_dir).await?;
  let event = read_event_from_stdin()?;

  let outcome = engine
    .start_trigger(event)
    .await
    .context("failed to start execution")?;
  let execution_id = outcome.execution().execution_id.clone();
  if outcome.is_duplicate() {
    eprintln!("Duplicate trigger for execution: {}", execution_id);
  } else {
    eprintln!("Started execution: {}", execution_id);
  }

  let cancel = shutdown_on_ctrl_c();
  let execution = engine
    .run(&execution_id, &cancel)
    .await
    .context("execution did not finish")?;

  println!("{}", serde_json::to_string_pretty(&execution)?);
  Ok(())
}

async fn serve(workflow_file: &Path, data_dir: &Path) -> Result<()> {
  let engine = open_engine(workflow_file, data_dir).await?;
  let runner = WorkflowRunner::new(engine);
  let sender = runner.sender();

  let cancel = shutdown_on_ctrl_c();
  let handle = tokio::spawn(runner.start(cancel.clone()));

  let mut lines = BufReader::new(tokio::io::stdin()).lines();
  loop {
    let line = tokio::select! {
      _ = cancel.cancelled() => break,
      line = lines.next_line() => line.context("failed to read stdin")?,
    };
    let Some(line) = line else { break };
    if line.trim().is_empty() {
      continue;
    }

    match ArtifactArrived::from_json(&line) {
      Ok(event) => {
        if sender.send(event).await.is_err() {
          break;
        }
      }
      Err(e) => warn!(error = %e, "event_rejected"),
    }
  }
  drop(sender);

  handle.await?.context("runner stopped with an error")?;
  info!("runner_stopped");
  Ok(())
}

async fn resume(workflow_file: &Path, data_dir: &Path) -> Result<()> {
  let engine = open_engine(workflow_file, data_dir).await?;
  let cancel = shutdown_on_ctrl_c();

  let executions = engine
    .resume_pending(&cancel)
    .await
    .context("failed to resume executions")?;

  eprintln!("Resumed executions: {}", executions.len());
  println!("{}", serde_json::to_string_pretty(&executions)?);
  Ok(())
}

async fn status(execution_id: &str, data_dir: &Path) -> Result<()> {
  let store = open_store(data_dir).await?;
  let Some(execution) = store.find_execution(execution_id).await? else {
    bail!("execution '{}' not found", execution_id);
  };

  println!("{}", serde_json::to_string_pretty(&execution)?);
  Ok(())
}

async fn list(workflow_id: &str, data_dir: &Path) -> Result<()> {
  let store = open_store(data_dir).await?;
  let executions = store.list_executions(workflow_id).await?;

  println!("{}", serde_json::to_string_pretty(&executions)?);
  Ok(())
}

async fn open_store(data_dir: &Path) -> Result<Arc<dyn Store>> {
  tokio::fs::create_dir_all(data_dir)
    .await
    .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

  let store = SqliteStore::open(&data_dir.join("executions.db"))
    .await
    .context("failed to open execution store")?;
  Ok(Arc::new(store))
}

async fn open_engine(workflow_file: &Path, data_dir: &Path) -> Result<Arc<ExecutionEngine>> {
  let store = open_store(data_dir).await?;
  let artifacts: Arc<dyn ArtifactStore> = Arc::new(FsStore::new(data_dir.join("artifacts")));
  let workflow = load_workflow(workflow_file, artifacts)?;

  eprintln!("Loaded workflow: {} ({} stages)", workflow.name, workflow.len());
  Ok(Arc::new(ExecutionEngine::new(Arc::new(workflow), store)))
}

fn load_workflow(
  workflow_file: &Path,
  artifacts: Arc<dyn ArtifactStore>,
) -> Result<WorkflowDefinition> {
  let def = WorkflowDef::from_file(workflow_file)
    .with_context(|| format!("failed to load workflow file: {}", workflow_file.display()))?;

  let mut registry = StageRegistry::new();
  transcriber_stages::register_builtin(&mut registry, artifacts);

  registry
    .resolve(def)
    .with_context(|| format!("failed to resolve workflow: {}", workflow_file.display()))
}

fn shutdown_on_ctrl_c() -> CancellationToken {
  let cancel = CancellationToken::new();
  let token = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      info!("shutdown_requested");
      token.cancel();
    }
  });
  cancel
}

fn read_event_from_stdin() -> Result<ArtifactArrived> {
  if io::stdin().is_terminal() {
    bail!("expected an artifact event on stdin");
  }

  let mut input = String::new();
  io::stdin()
    .read_to_string(&mut input)
    .context("failed to read event from stdin")?;

  ArtifactArrived::from_json(input.trim()).context("failed to parse artifact event from stdin")
}
