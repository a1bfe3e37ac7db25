use async_trait::async_trait;

use crate::descriptor::InputDescriptor;
use crate::handler::{Handler, StepSequence};
use crate::steps::{ACTION_COPY, ACTION_IMPORT, vector_sequence};

/// Handler for GeoJSON documents. A document always maps to a single layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeoJsonHandler;

impl GeoJsonHandler {
  pub const ID: &'static str = "geojson";
}

#[async_trait]
impl Handler for GeoJsonHandler {
  fn id(&self) -> &str {
    Self::ID
  }

  fn can_handle(&self, descriptor: &InputDescriptor) -> bool {
    matches!(descriptor.extension().as_deref(), Some("geojson" | "json"))
  }

  fn step_sequence(&self, action: &str) -> Option<StepSequence> {
    vector_sequence(action)
  }

  fn actions(&self) -> Vec<&'static str> {
    vec![ACTION_IMPORT, ACTION_COPY]
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_claims_json_extensions() {
    assert!(GeoJsonHandler.can_handle(&InputDescriptor::from_file("rivers.geojson")));
    assert!(GeoJsonHandler.can_handle(&InputDescriptor::from_file("rivers.JSON")));
    assert!(!GeoJsonHandler.can_handle(&InputDescriptor::from_file("rivers.gpkg")));
  }
}
