use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::descriptor::InputDescriptor;
use crate::error::{HandlerError, RegistryError};
use crate::geojson::GeoJsonHandler;
use crate::gpkg::GeoPackageHandler;
use crate::handler::Handler;

/// Builds a handler instance.
pub type HandlerFactory =
  Arc<dyn Fn() -> Result<Arc<dyn Handler>, HandlerError> + Send + Sync>;

struct Registration {
  id: String,
  factory: HandlerFactory,
}

/// Maps stable handler identifiers to factories.
///
/// Populated once at process start, then shared read-only. Resolution
/// order is registration order.
#[derive(Default)]
pub struct HandlerRegistry {
  registrations: Vec<Registration>,
}

impl HandlerRegistry {
  /// An empty registry.
  pub fn new() -> Self {
    Self::default()
  }

  /// A registry with the bundled GeoPackage and GeoJSON handlers.
  pub fn with_builtin() -> Self {
    let mut registry = Self::new();
    // Identifiers are distinct constants, registration cannot collide.
    let _ = registry.register_instance(Arc::new(GeoPackageHandler));
    let _ = registry.register_instance(Arc::new(GeoJsonHandler));
    registry
  }

  /// Register a factory under `id`.
  pub fn register<F>(&mut self, id: impl Into<String>, factory: F) -> Result<(), RegistryError>
  where
    F: Fn() -> Result<Arc<dyn Handler>, HandlerError> + Send + Sync + 'static,
  {
    let id = id.into();
    if self.registrations.iter().any(|r| r.id == id) {
      return Err(RegistryError::AlreadyRegistered { id });
    }
    debug!(handler = %id, "registering handler");
    self.registrations.push(Registration {
      id,
      factory: Arc::new(factory),
    });
    Ok(())
  }

  /// Register a ready-made handler under its own identifier.
  pub fn register_instance(&mut self, handler: Arc<dyn Handler>) -> Result<(), RegistryError> {
    let id = handler.id().to_string();
    self.register(id, move || Ok(handler.clone()))
  }

  /// The first handler, in registration order, that claims `descriptor`.
  ///
  /// Handlers whose factory fails are skipped.
  pub fn resolve(&self, descriptor: &InputDescriptor) -> Option<Arc<dyn Handler>> {
    self.registrations.iter().find_map(|registration| {
      match (registration.factory)() {
        Ok(handler) if handler.can_handle(descriptor) => Some(handler),
        Ok(_) => None,
        Err(e) => {
          warn!(handler = %registration.id, error = %e, "skipping handler that failed to load");
          None
        }
      }
    })
  }

  /// Build the handler registered as `id`.
  pub fn load(&self, id: &str) -> Result<Arc<dyn Handler>, RegistryError> {
    let registration = self
      .registrations
      .iter()
      .find(|r| r.id == id)
      .ok_or_else(|| RegistryError::HandlerNotFound { id: id.to_string() })?;

    (registration.factory)().map_err(|source| RegistryError::HandlerLoad {
      id: id.to_string(),
      source,
    })
  }

  /// Registered identifiers in registration order.
  pub fn supported_types(&self) -> Vec<&str> {
    self.registrations.iter().map(|r| r.id.as_str()).collect()
  }
}

impl fmt::Debug for HandlerRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("HandlerRegistry")
      .field("handlers", &self.supported_types())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::handler::StepSequence;

  /// Claims everything, used to check registration order.
  struct CatchAll;

  #[async_trait::async_trait]
  impl Handler for CatchAll {
    fn id(&self) -> &str {
      "catch-all"
    }

    fn can_handle(&self, _descriptor: &InputDescriptor) -> bool {
      true
    }

    fn step_sequence(&self, _action: &str) -> Option<StepSequence> {
      Some(StepSequence::new(["only"]))
    }

    fn actions(&self) -> Vec<&'static str> {
      vec!["import"]
    }
  }

  #[test]
  fn test_resolve_by_extension() {
    let registry = HandlerRegistry::with_builtin();
    let handler = registry
      .resolve(&InputDescriptor::from_file("/data/parcels.gpkg"))
      .unwrap();
    assert_eq!(handler.id(), GeoPackageHandler::ID);

    let handler = registry
      .resolve(&InputDescriptor::from_file("/data/parcels.geojson"))
      .unwrap();
    assert_eq!(handler.id(), GeoJsonHandler::ID);
  }

  #[test]
  fn test_resolve_unknown_returns_none() {
    let registry = HandlerRegistry::with_builtin();
    assert!(registry.resolve(&InputDescriptor::from_file("/data/scan.tiff")).is_none());
  }

  #[test]
  fn test_resolve_uses_registration_order() {
    let mut registry = HandlerRegistry::new();
    registry.register_instance(Arc::new(CatchAll)).unwrap();
    registry.register_instance(Arc::new(GeoPackageHandler)).unwrap();

    let handler = registry
      .resolve(&InputDescriptor::from_file("/data/parcels.gpkg"))
      .unwrap();
    assert_eq!(handler.id(), "catch-all");
  }

  #[test]
  fn test_load_unknown_handler() {
    let registry = HandlerRegistry::with_builtin();
    let err = registry.load("shapefile").err().unwrap();
    assert!(matches!(err, RegistryError::HandlerNotFound { id } if id == "shapefile"));
  }

  #[test]
  fn test_load_failing_factory() {
    let mut registry = HandlerRegistry::new();
    registry
      .register("broken", || Err(HandlerError::new("missing driver")))
      .unwrap();

    let err = registry.load("broken").err().unwrap();
    assert!(matches!(err, RegistryError::HandlerLoad { .. }));
    assert_eq!(err.to_string(), "failed to load handler broken: missing driver");
    assert!(registry.resolve(&InputDescriptor::from_file("x.gpkg")).is_none());
  }

  #[test]
  fn test_duplicate_registration_rejected() {
    let mut registry = HandlerRegistry::with_builtin();
    let err = registry
      .register_instance(Arc::new(GeoPackageHandler))
      .unwrap_err();
    assert!(matches!(err, RegistryError::AlreadyRegistered { .. }));
    assert_eq!(registry.supported_types(), vec!["gpkg", "geojson"]);
  }
}
