//! Ingest Dispatch
//!
//! The transport between the orchestrator and the workers: typed
//! [`StepInvocation`]s, the [`Step`] trait implemented by workers, the
//! process-wide [`StepRegistry`], and the [`Dispatcher`] trait with an
//! in-process channel implementation.

mod channel;
mod error;
mod invocation;
mod registry;
mod step;

pub use channel::{ChannelDispatcher, Dispatcher};
pub use error::{DispatchError, StepError};
pub use invocation::{StepInvocation, UnitContext};
pub use registry::StepRegistry;
pub use step::{Step, StepContext, StepOutcome};
