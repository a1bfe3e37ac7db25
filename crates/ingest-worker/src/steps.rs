//! Built-in steps for the bundled vector handlers.
//!
//! These only move executions through their pipeline; the actual data work
//! belongs to the handlers' own steps when they are registered instead.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use ingest_dispatch::{Step, StepContext, StepError, StepOutcome, StepRegistry, UnitContext};
use ingest_handler::steps::{
  COPY_DATA_TABLE, COPY_DYNAMIC_MODEL, COPY_RESOURCE, CREATE_RESOURCE, IMPORT_RESOURCE,
  PUBLISH_RESOURCE,
};
use ingest_orchestrator::{LAYERS_PARAM, layer_name};
use ingest_store::{Execution, IdEncodings, SubResourceCompletion};
use tracing::{debug, info};

/// Succeeds without doing anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughStep;

#[async_trait]
impl Step for PassThroughStep {
  async fn run(&self, ctx: &StepContext) -> Result<StepOutcome, StepError> {
    debug!(
      step = %ctx.invocation.step,
      unit = ?ctx.invocation.unit.as_ref().map(|u| &u.name),
      "pass-through step"
    );
    Ok(StepOutcome::Continue)
  }
}

/// Splits an execution into one unit per layer.
///
/// Layers come from the `layers` input parameter (names, or objects with a
/// `name`). Without it the execution is a single unit named after the base
/// file, or after the resource being copied.
#[derive(Debug, Clone, Copy, Default)]
pub struct FanOutStep;

impl FanOutStep {
  /// The units of `execution`. Fails on a `layers` entry with no name, since
  /// it still counts towards the expected total.
  pub fn units(execution: &Execution) -> Result<Vec<UnitContext>, StepError> {
    let suffix = IdEncodings::new(&execution.exec_id).normalized().to_string();
    Ok(
      layer_names(execution)?
        .into_iter()
        .map(|name| {
          let alternate = format!("{name}_{suffix}");
          UnitContext::new(name, alternate)
        })
        .collect(),
    )
  }
}

fn layer_names(execution: &Execution) -> Result<Vec<String>, StepError> {
  if let Some(serde_json::Value::Array(layers)) = execution.input_param(LAYERS_PARAM) {
    return layers
      .iter()
      .enumerate()
      .map(|(index, layer)| {
        layer_name(layer)
          .map(str::to_string)
          .ok_or_else(|| StepError::new(format!("layer {index} has no name")))
      })
      .collect();
  }

  let from_file = execution
    .input_param("base_file")
    .and_then(|f| f.as_str())
    .and_then(|f| Path::new(f).file_stem())
    .and_then(|stem| stem.to_str())
    .map(str::to_string);
  Ok(
    from_file
      .or_else(|| execution.resource.clone())
      .into_iter()
      .collect(),
  )
}

#[async_trait]
impl Step for FanOutStep {
  async fn run(&self, ctx: &StepContext) -> Result<StepOutcome, StepError> {
    let units = Self::units(&ctx.execution)?;
    if units.is_empty() {
      return Err(StepError::new("no layers found in the input"));
    }
    info!(
      execution_id = %ctx.execution.exec_id,
      units = units.len(),
      "fanning out"
    );
    Ok(StepOutcome::FanOut(units))
  }
}

/// Records the invocation's unit as completed.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordCompletionStep;

#[async_trait]
impl Step for RecordCompletionStep {
  async fn run(&self, ctx: &StepContext) -> Result<StepOutcome, StepError> {
    let unit = ctx.invocation.unit.as_ref().ok_or_else(|| {
      StepError::new(format!(
        "step '{}' must run for a single layer",
        ctx.invocation.step
      ))
    })?;

    let completion = SubResourceCompletion::new(
      ctx.invocation.execution_id.clone(),
      unit.alternate.clone(),
      Some(ctx.invocation.handler_id.clone()),
    );
    ctx.stores.completions.record_completion(&completion).await?;
    info!(
      execution_id = %ctx.invocation.execution_id,
      resource = %unit.alternate,
      "unit completed"
    );
    Ok(StepOutcome::Continue)
  }
}

/// Register the steps dispatched by the bundled handlers' sequences.
///
/// The first step of each sequence is where executions are created and is
/// never dispatched, so it has no implementation here.
pub fn register_builtin_steps(registry: &mut StepRegistry) -> &mut StepRegistry {
  let pass = Arc::new(PassThroughStep);
  let fan_out = Arc::new(FanOutStep);
  let complete = Arc::new(RecordCompletionStep);

  registry
    .register(IMPORT_RESOURCE, fan_out.clone())
    .register(PUBLISH_RESOURCE, pass.clone())
    .register(CREATE_RESOURCE, complete.clone())
    .register(COPY_DYNAMIC_MODEL, fan_out)
    .register(COPY_DATA_TABLE, pass)
    .register(COPY_RESOURCE, complete)
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Utc;
  use ingest_handler::{GeoPackageHandler, Handler};
  use ingest_store::NewExecution;
  use serde_json::json;

  fn execution(params: serde_json::Value, resource: Option<&str>) -> Execution {
    let serde_json::Value::Object(input_params) = params else {
      panic!("params must be an object");
    };
    NewExecution {
      func_name: "start_import".to_string(),
      action: "import".to_string(),
      resource: resource.map(str::to_string),
      input_params,
      ..NewExecution::default()
    }
    .into_execution(Utc::now())
  }

  #[test]
  fn test_units_from_layer_list() {
    let exec = execution(json!({ "layers": ["roads", { "name": "rivers" }] }), None);
    let units = FanOutStep::units(&exec).unwrap();
    let names: Vec<_> = units.iter().map(|u| u.name.as_str()).collect();
    assert_eq!(names, ["roads", "rivers"]);

    let suffix = exec.exec_id.replace('-', "_");
    assert_eq!(units[0].alternate, format!("roads_{suffix}"));
  }

  #[test]
  fn test_unnamed_layer_is_rejected() {
    let exec = execution(json!({ "layers": ["roads", { "title": "rivers" }, 7] }), None);
    let err = FanOutStep::units(&exec).unwrap_err();
    assert_eq!(err.message, "layer 1 has no name");
  }

  #[test]
  fn test_single_unit_from_base_file() {
    let exec = execution(json!({ "base_file": "/data/Parcels.gpkg" }), None);
    let units = FanOutStep::units(&exec).unwrap();
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].name, "Parcels");
  }

  #[test]
  fn test_single_unit_from_resource() {
    let exec = execution(json!({}), Some("dataset_42"));
    assert_eq!(FanOutStep::units(&exec).unwrap()[0].name, "dataset_42");
    assert!(FanOutStep::units(&execution(json!({}), None)).unwrap().is_empty());
  }

  #[test]
  fn test_builtin_steps_cover_dispatched_steps() {
    let mut registry = StepRegistry::new();
    register_builtin_steps(&mut registry);
    for sequence in ["import", "copy"]
      .into_iter()
      .filter_map(|action| GeoPackageHandler.step_sequence(action))
    {
      for step in sequence.remaining_from(1) {
        assert!(registry.contains(step), "missing step {step}");
      }
    }
  }
}
