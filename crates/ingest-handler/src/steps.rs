//! Step identifiers and the sequences shared by the bundled vector handlers.

use crate::handler::StepSequence;

pub const ACTION_IMPORT: &str = "import";
pub const ACTION_COPY: &str = "copy";

pub const START_IMPORT: &str = "start_import";
pub const IMPORT_RESOURCE: &str = "import_resource";
pub const PUBLISH_RESOURCE: &str = "publish_resource";
pub const CREATE_RESOURCE: &str = "create_resource";

pub const START_COPY: &str = "start_copy";
pub const COPY_DYNAMIC_MODEL: &str = "copy_dynamic_model";
pub const COPY_DATA_TABLE: &str = "copy_data_table";
pub const COPY_RESOURCE: &str = "copy_resource";

/// Import and copy pipelines for file-based vector formats.
pub(crate) fn vector_sequence(action: &str) -> Option<StepSequence> {
  match action {
    ACTION_IMPORT => Some(StepSequence::new([
      START_IMPORT,
      IMPORT_RESOURCE,
      PUBLISH_RESOURCE,
      CREATE_RESOURCE,
    ])),
    ACTION_COPY => Some(StepSequence::new([
      START_COPY,
      COPY_DYNAMIC_MODEL,
      COPY_DATA_TABLE,
      PUBLISH_RESOURCE,
      COPY_RESOURCE,
    ])),
    _ => None,
  }
}
