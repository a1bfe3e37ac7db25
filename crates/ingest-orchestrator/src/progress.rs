//! Fan-in evaluation.
//!
//! Pure decision logic: given what the stores report about an execution,
//! decide whether it is still running or has reached a terminal state.

use ingest_store::{TaskResult, TaskState};

/// What the stores currently report for one execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
  /// Number of fan-out units the execution expects.
  pub expected: u64,
  /// Number of units that recorded a completion.
  pub actual: u64,
  /// Task results that have not settled yet.
  pub in_flight: usize,
  /// Task results that settled as failures.
  pub failures: usize,
  /// Result text of every failed task, in store order.
  pub failure_reasons: Vec<String>,
}

impl ProgressSnapshot {
  pub fn from_results(expected: u64, actual: u64, results: &[TaskResult]) -> Self {
    let mut snapshot = Self {
      expected,
      actual,
      ..Self::default()
    };
    for result in results {
      if !result.status.is_ready() {
        snapshot.in_flight += 1;
      } else if result.status == TaskState::Failure {
        snapshot.failures += 1;
        snapshot
          .failure_reasons
          .push(result.result.clone().unwrap_or_else(|| result.task_name.clone()));
      }
    }
    snapshot
  }

  /// Every expected unit has completed.
  pub fn is_last(&self) -> bool {
    self.actual >= self.expected
  }

  /// Every expected unit has either completed or failed.
  ///
  /// A failed unit never records a completion, so it counts as reported
  /// through its failed task.
  pub fn all_reported(&self) -> bool {
    self.actual + self.failures as u64 >= self.expected
  }

  /// The diagnostic if one was given, otherwise the failed tasks' results.
  pub fn reason(&self, diagnostic: Option<&str>) -> Option<String> {
    match diagnostic {
      Some(diagnostic) => Some(diagnostic.to_string()),
      None if self.failure_reasons.is_empty() => None,
      None => Some(self.failure_reasons.join("; ")),
    }
  }
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
  /// Some task is still pending. Nothing changes.
  InFlight,
  /// Everything settled but more units are expected. Nothing changes.
  Waiting,
  /// Some units completed and some failed.
  PartiallyFailed,
  /// The execution failed.
  Failed,
  /// Every unit completed.
  Finished,
  /// The execution was already terminal.
  Settled,
}

impl Verdict {
  /// Whether the verdict writes a terminal status.
  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      Verdict::PartiallyFailed | Verdict::Failed | Verdict::Finished
    )
  }
}

/// Decide the next state of a non-terminal execution.
///
/// `error_marker` is only looked for in `diagnostic` once every unit has
/// completed.
pub fn evaluate(snapshot: &ProgressSnapshot, diagnostic: Option<&str>, error_marker: &str) -> Verdict {
  if snapshot.in_flight > 0 {
    return Verdict::InFlight;
  }

  if snapshot.failures > 0 {
    return if snapshot.actual > 0 {
      Verdict::PartiallyFailed
    } else if snapshot.all_reported() {
      Verdict::Failed
    } else {
      Verdict::Waiting
    };
  }

  if !snapshot.is_last() {
    return Verdict::Waiting;
  }

  match diagnostic {
    Some(diagnostic) if !error_marker.is_empty() && diagnostic.contains(error_marker) => {
      Verdict::Failed
    }
    _ => Verdict::Finished,
  }
}

/// Read the expected unit count. Accepts whole numbers, including `2.0`,
/// and numeric strings; anything else counts as zero.
pub fn total_units(params: &serde_json::Value, key: &str) -> u64 {
  match params.get(key) {
    Some(serde_json::Value::Number(n)) => n
      .as_u64()
      .or_else(|| {
        n.as_f64()
          .filter(|f| *f >= 0.0 && f.fract() == 0.0 && *f <= u64::MAX as f64)
          .map(|f| f as u64)
      })
      .unwrap_or(0),
    Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(0),
    _ => 0,
  }
}
