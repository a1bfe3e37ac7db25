//! Execution identifier encodings.
//!
//! Step arguments are serialized by different call sites, so the same
//! execution id can show up as `0b5f…-…` or as `0b5f…_…`, in either case.
//! Task results are matched against both forms.

/// The two textual forms an execution id is searched under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdEncodings {
  raw: String,
  normalized: String,
}

impl IdEncodings {
  pub fn new(execution_id: &str) -> Self {
    Self {
      raw: execution_id.to_string(),
      normalized: execution_id.replace('-', "_").to_lowercase(),
    }
  }

  /// The identifier as it was given.
  pub fn raw(&self) -> &str {
    &self.raw
  }

  /// Lowercase with hyphens replaced by underscores.
  pub fn normalized(&self) -> &str {
    &self.normalized
  }

  /// Case-insensitive containment test against either encoding.
  pub fn matches(&self, text: &str) -> bool {
    let haystack = text.to_lowercase();
    haystack.contains(&self.raw.to_lowercase()) || haystack.contains(&self.normalized)
  }
}
