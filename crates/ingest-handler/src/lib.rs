//! Ingest Handlers
//!
//! A [`Handler`] describes how one class of input is imported: whether it
//! can process a given [`InputDescriptor`], which ordered steps run for each
//! action, and what to do once an execution is complete. The
//! [`HandlerRegistry`] maps stable identifiers to handler factories.

mod descriptor;
mod error;
mod geojson;
mod gpkg;
mod handler;
mod registry;
pub mod steps;

pub use descriptor::InputDescriptor;
pub use error::{HandlerError, RegistryError};
pub use geojson::GeoJsonHandler;
pub use gpkg::GeoPackageHandler;
pub use handler::{Handler, StepSequence};
pub use registry::{HandlerFactory, HandlerRegistry};
