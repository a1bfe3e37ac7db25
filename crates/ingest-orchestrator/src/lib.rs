//! Ingest Orchestrator
//!
//! Drives import executions through the step sequence of their handler and
//! reconciles fan-out units into a single terminal status.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Orchestrator                          │
//! │  - submit / create_execution                                │
//! │  - advance: next step or reconciliation                     │
//! │  - evaluate_progress: fan-in over stored results            │
//! └─────────────────────────────────────────────────────────────┘
//!          │                    │                     │
//!          ▼                    ▼                     ▼
//!   HandlerRegistry        Dispatcher              Stores
//!   (step sequences)   (queues next step)   (executions, results,
//!                                            completions, legacy)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let orchestrator = Orchestrator::new(config, stores, handlers, dispatcher);
//! let execution_id = orchestrator
//!   .submit(Submission::new(InputDescriptor::from_file("roads.gpkg"), "import"))
//!   .await?;
//! ```

mod config;
mod error;
mod events;
mod orchestrator;
mod progress;

pub use config::OrchestratorConfig;
pub use error::OrchestratorError;
pub use events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier};
pub use orchestrator::{
  LAYERS_PARAM, Orchestrator, PARTIAL_FAILURE_PREFIX, Submission, layer_name,
};
pub use progress::{ProgressSnapshot, Verdict, evaluate, total_units};
