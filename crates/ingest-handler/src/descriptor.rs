use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// What a caller submits for import: the main file, any sidecar files, and
/// free-form parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputDescriptor {
  pub base_file: Option<PathBuf>,
  #[serde(default)]
  pub files: BTreeMap<String, PathBuf>,
  #[serde(default)]
  pub params: serde_json::Map<String, serde_json::Value>,
}

impl InputDescriptor {
  pub fn from_file(path: impl Into<PathBuf>) -> Self {
    Self {
      base_file: Some(path.into()),
      ..Self::default()
    }
  }

  pub fn with_file(mut self, key: impl Into<String>, path: impl Into<PathBuf>) -> Self {
    self.files.insert(key.into(), path.into());
    self
  }

  pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
    self.params.insert(key.into(), value.into());
    self
  }

  /// Lowercased extension of the base file.
  pub fn extension(&self) -> Option<String> {
    self
      .base_file
      .as_deref()
      .and_then(Path::extension)
      .and_then(|ext| ext.to_str())
      .map(str::to_ascii_lowercase)
  }

  /// The descriptor as job parameters: `base_file`, every sidecar file
  /// and the free-form params.
  pub fn to_params(&self) -> serde_json::Map<String, serde_json::Value> {
    let mut params = self.params.clone();
    if let Some(base) = &self.base_file {
      params.insert("base_file".to_string(), base.display().to_string().into());
    }
    for (key, path) in &self.files {
      params.insert(key.clone(), path.display().to_string().into());
    }
    params
  }
}
