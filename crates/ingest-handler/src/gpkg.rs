use async_trait::async_trait;
use tracing::info;

use crate::descriptor::InputDescriptor;
use crate::error::HandlerError;
use crate::handler::{Handler, StepSequence};
use crate::steps::{ACTION_COPY, ACTION_IMPORT, vector_sequence};

/// Handler for GeoPackage files. One file may hold several layers, each
/// imported as its own fan-out unit.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeoPackageHandler;

impl GeoPackageHandler {
  pub const ID: &'static str = "gpkg";
}

#[async_trait]
impl Handler for GeoPackageHandler {
  fn id(&self) -> &str {
    Self::ID
  }

  fn can_handle(&self, descriptor: &InputDescriptor) -> bool {
    descriptor.extension().as_deref() == Some("gpkg")
  }

  fn step_sequence(&self, action: &str) -> Option<StepSequence> {
    vector_sequence(action)
  }

  fn actions(&self) -> Vec<&'static str> {
    vec![ACTION_IMPORT, ACTION_COPY]
  }

  async fn on_execution_complete(&self, execution_id: &str) -> Result<(), HandlerError> {
    info!(execution_id = %execution_id, handler = Self::ID, "geopackage import complete");
    Ok(())
  }
}
