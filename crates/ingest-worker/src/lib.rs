//! Ingest Worker
//!
//! Executes dispatched steps. The [`WorkerRunner`] drains the dispatch
//! channel; each invocation is handled by a [`StepWorker`], which runs the
//! registered [`Step`](ingest_dispatch::Step), settles the task result and
//! calls back into the orchestrator to advance or reconcile.

mod config;
mod error;
mod runner;
pub mod steps;

pub use config::WorkerConfig;
pub use error::WorkerError;
pub use runner::{StepWorker, WorkerRunner};
pub use steps::{FanOutStep, PassThroughStep, RecordCompletionStep, register_builtin_steps};
