use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ingest_dispatch::{
  ChannelDispatcher, Step, StepContext, StepError, StepInvocation, StepOutcome, StepRegistry,
};
use ingest_handler::steps::{IMPORT_RESOURCE, PUBLISH_RESOURCE};
use ingest_handler::{HandlerRegistry, InputDescriptor};
use ingest_orchestrator::{
  ChannelNotifier, ExecutionEvent, Orchestrator, OrchestratorConfig, OrchestratorError,
  PARTIAL_FAILURE_PREFIX, Submission,
};
use ingest_store::{
  CompletionStore, ExecutionStatus, ExecutionStore, IdEncodings, MemoryStore, Stores,
  TaskResultStore, TaskState,
};
use ingest_worker::{StepWorker, WorkerConfig, WorkerError, WorkerRunner, register_builtin_steps};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Fails for one named unit, passes for everything else.
struct FailForUnit(&'static str);

#[async_trait]
impl Step for FailForUnit {
  async fn run(&self, ctx: &StepContext) -> Result<StepOutcome, StepError> {
    match &ctx.invocation.unit {
      Some(unit) if unit.name == self.0 => Err(StepError::new("invalid geometry")),
      _ => Ok(StepOutcome::Continue),
    }
  }
}

struct AlwaysFail;

#[async_trait]
impl Step for AlwaysFail {
  async fn run(&self, _ctx: &StepContext) -> Result<StepOutcome, StepError> {
    Err(StepError::new("cannot open datasource"))
  }
}

struct Pipeline {
  orchestrator: Arc<Orchestrator<ChannelNotifier>>,
  store: Arc<MemoryStore>,
  events: mpsc::UnboundedReceiver<ExecutionEvent>,
  cancel: CancellationToken,
  handle: JoinHandle<Result<(), WorkerError>>,
}

fn builtin_steps() -> StepRegistry {
  let mut steps = StepRegistry::new();
  register_builtin_steps(&mut steps);
  steps
}

fn pipeline(steps: StepRegistry) -> Pipeline {
  let store = Arc::new(MemoryStore::new());
  let steps = Arc::new(steps);
  let (dispatcher, receiver) = ChannelDispatcher::new(steps.clone(), store.clone());
  let (sender, events) = mpsc::unbounded_channel();

  let orchestrator = Arc::new(Orchestrator::with_notifier(
    OrchestratorConfig::default(),
    Stores::shared(store.clone()),
    Arc::new(HandlerRegistry::with_builtin()),
    Arc::new(dispatcher),
    ChannelNotifier::new(sender),
  ));

  let runner = WorkerRunner::new(WorkerConfig::default(), receiver, steps, orchestrator.clone());
  let cancel = CancellationToken::new();
  let handle = tokio::spawn(runner.start(cancel.clone()));

  Pipeline {
    orchestrator,
    store,
    events,
    cancel,
    handle,
  }
}

impl Pipeline {
  async fn submit(&self, file: &str, layers: serde_json::Value) -> String {
    let submission =
      Submission::new(InputDescriptor::from_file(file), "import").with_param("layers", layers);
    self.orchestrator.submit(submission).await.unwrap()
  }

  async fn wait_terminal(&mut self, execution_id: &str) -> ExecutionEvent {
    let events = &mut self.events;
    tokio::time::timeout(Duration::from_secs(5), async {
      while let Some(event) = events.recv().await {
        if event.is_terminal() && event.execution_id() == execution_id {
          return event;
        }
      }
      panic!("event channel closed");
    })
    .await
    .expect("execution did not settle in time")
  }

  async fn shutdown(self) {
    self.cancel.cancel();
    self.handle.await.unwrap().unwrap();
  }
}

#[tokio::test]
async fn test_multi_layer_import_finishes() {
  let mut p = pipeline(builtin_steps());
  let id = p.submit("/data/hydro.gpkg", json!(["roads", "rivers"])).await;

  let event = p.wait_terminal(&id).await;
  assert!(matches!(event, ExecutionEvent::Finished { .. }));

  let execution = p.store.get_execution(&id).await.unwrap();
  assert_eq!(execution.status, ExecutionStatus::Finished);
  assert!(execution.finished.is_some());
  assert_eq!(p.store.count_completions(&id).await.unwrap(), 2);

  let results = p.store.task_results_for(&IdEncodings::new(&id)).await.unwrap();
  // import_resource once, then publish and create per layer
  assert_eq!(results.len(), 5);
  assert!(results.iter().all(|r| r.status == TaskState::Success));

  p.shutdown().await;
}

#[tokio::test]
async fn test_failed_layer_partially_fails() {
  let mut steps = builtin_steps();
  steps.register(PUBLISH_RESOURCE, Arc::new(FailForUnit("rivers")));
  let mut p = pipeline(steps);
  let id = p.submit("/data/hydro.gpkg", json!(["roads", "rivers"])).await;

  let event = p.wait_terminal(&id).await;
  assert!(matches!(event, ExecutionEvent::Failed { partial: true, .. }));

  let execution = p.store.get_execution(&id).await.unwrap();
  assert_eq!(execution.status, ExecutionStatus::Failed);
  let log = execution.log.unwrap();
  assert!(log.starts_with(PARTIAL_FAILURE_PREFIX));
  assert!(log.contains("rivers: invalid geometry"));
  assert_eq!(p.store.count_completions(&id).await.unwrap(), 1);

  p.shutdown().await;
}

#[tokio::test]
async fn test_only_layer_failing_fails_execution() {
  let mut steps = builtin_steps();
  steps.register(PUBLISH_RESOURCE, Arc::new(FailForUnit("roads")));
  let mut p = pipeline(steps);
  let id = p.submit("/data/roads.gpkg", json!(["roads"])).await;

  let event = p.wait_terminal(&id).await;
  assert!(matches!(event, ExecutionEvent::Failed { partial: false, .. }));

  let execution = p.store.get_execution(&id).await.unwrap();
  assert_eq!(execution.log.as_deref(), Some("roads: invalid geometry"));
  assert_eq!(execution.step.as_deref(), Some(PUBLISH_RESOURCE));

  p.shutdown().await;
}

#[tokio::test]
async fn test_execution_wide_failure_fails_execution() {
  let mut steps = builtin_steps();
  steps.register(IMPORT_RESOURCE, Arc::new(AlwaysFail));
  let mut p = pipeline(steps);
  let id = p.submit("/data/hydro.gpkg", json!(["roads", "rivers"])).await;

  let event = p.wait_terminal(&id).await;
  assert!(matches!(event, ExecutionEvent::Failed { partial: false, .. }));

  let execution = p.store.get_execution(&id).await.unwrap();
  assert_eq!(execution.status, ExecutionStatus::Failed);
  assert_eq!(execution.log.as_deref(), Some("cannot open datasource"));

  let results = p.store.task_results_for(&IdEncodings::new(&id)).await.unwrap();
  assert_eq!(results.len(), 1);
  assert_eq!(results[0].status, TaskState::Failure);

  p.shutdown().await;
}

#[tokio::test]
async fn test_mixed_layer_list_is_rejected_on_submit() {
  let p = pipeline(builtin_steps());
  let submission = Submission::new(InputDescriptor::from_file("/data/hydro.gpkg"), "import")
    .with_param("layers", json!(["roads", { "title": "rivers" }]));

  let err = p.orchestrator.submit(submission).await.unwrap_err();
  assert!(matches!(err, OrchestratorError::UnnamedLayer { index: 1 }));

  p.shutdown().await;
}

#[tokio::test]
async fn test_unnamed_stored_layer_fails_execution() {
  let mut p = pipeline(builtin_steps());
  let mut input_params = serde_json::Map::new();
  input_params.insert("layers".to_string(), json!(["roads", { "title": "rivers" }]));
  input_params.insert("total_layers".to_string(), json!(2));
  let id = p
    .orchestrator
    .create_execution(ingest_store::NewExecution {
      func_name: "start_import".to_string(),
      step: Some("start_import".to_string()),
      action: "import".to_string(),
      source: Some("gpkg".to_string()),
      input_params,
      ..Default::default()
    })
    .await
    .unwrap();
  p.orchestrator
    .advance(&id, "import", "gpkg", None, None)
    .await
    .unwrap();

  let event = p.wait_terminal(&id).await;
  assert!(matches!(event, ExecutionEvent::Failed { partial: false, .. }));

  let execution = p.store.get_execution(&id).await.unwrap();
  assert_eq!(execution.status, ExecutionStatus::Failed);
  assert_eq!(execution.log.as_deref(), Some("layer 1 has no name"));
  assert_eq!(p.store.count_completions(&id).await.unwrap(), 0);

  p.shutdown().await;
}

#[tokio::test]
async fn test_unknown_step_fails_execution() {
  let store = Arc::new(MemoryStore::new());
  let steps = Arc::new(StepRegistry::new());
  let (dispatcher, _receiver) = ChannelDispatcher::new(steps.clone(), store.clone());
  let orchestrator = Arc::new(Orchestrator::new(
    OrchestratorConfig::default(),
    Stores::shared(store.clone()),
    Arc::new(HandlerRegistry::with_builtin()),
    Arc::new(dispatcher),
  ));
  let id = orchestrator
    .create_execution(ingest_store::NewExecution {
      func_name: "start_import".to_string(),
      step: Some("start_import".to_string()),
      action: "import".to_string(),
      ..Default::default()
    })
    .await
    .unwrap();

  let worker = StepWorker::new(steps, orchestrator);
  let err = worker
    .process(StepInvocation::new("reproject", id.clone(), "gpkg", "import", None))
    .await
    .unwrap_err();
  assert!(matches!(err, WorkerError::UnknownStep { step } if step == "reproject"));

  let execution = store.get_execution(&id).await.unwrap();
  assert_eq!(execution.status, ExecutionStatus::Failed);
}

#[tokio::test]
async fn test_runner_stops_on_cancel() {
  let p = pipeline(builtin_steps());
  tokio::time::sleep(Duration::from_millis(10)).await;
  p.shutdown().await;
}
