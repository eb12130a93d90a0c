//! Error types for the reconciliation engine.

use thiserror::Error;

/// Phase of a reconciliation pass, attached to errors for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
  Policy,
  Role,
  Publish,
  Function,
  EventSources,
  Status,
  Destroy,
}

impl std::fmt::Display for Phase {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      Phase::Policy => "policy",
      Phase::Role => "role",
      Phase::Publish => "publish",
      Phase::Function => "function",
      Phase::EventSources => "event sources",
      Phase::Status => "status",
      Phase::Destroy => "destroy",
    };
    write!(f, "{}", name)
  }
}

/// Transport-level error surfaced by the backend stores.
///
/// Stores never interpret these beyond classification; the reconcilers
/// translate them into [`ReconcileError`] with the failing phase attached.
#[derive(Debug, Error)]
pub enum BackendError {
  /// The backend could not be reached or timed out. Safe to retry.
  #[error("backend unavailable: {0}")]
  Unavailable(String),

  /// The backend rejected the request as invalid. Never retried.
  #[error("request rejected: {0}")]
  Rejected(String),

  /// The named resource does not exist.
  ///
  /// Probes map this to `ResourceDescriptor::Absent` instead of returning it;
  /// it only surfaces from mutation calls against missing resources.
  #[error("not found: {0}")]
  NotFound(String),

  /// Any other service-side failure.
  #[error("backend error: {0}")]
  Api(String),
}

impl BackendError {
  /// Whether a bounded retry is worthwhile.
  pub fn is_transient(&self) -> bool {
    matches!(self, BackendError::Unavailable(_))
  }
}

/// Failure taxonomy of a reconciliation pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
  /// Transport/auth failure that survived the bounded retry.
  #[error("backend unavailable during {phase}: {message}")]
  BackendUnavailable { phase: Phase, message: String },

  /// The desired state references a managed policy that does not exist.
  /// Managed policies are never created by this system.
  #[error("managed policy '{0}' does not exist")]
  MissingManagedPolicy(String),

  /// A referenced resource this system is not permitted to create is absent.
  #[error("missing dependency: {0}")]
  MissingDependency(String),

  /// The backend rejected the request as invalid. Retrying an invalid
  /// request never succeeds, so the pass aborts.
  #[error("invalid configuration for {resource}: {message}")]
  InvalidConfiguration { resource: String, message: String },

  /// The backend reported a content digest that does not match the artifact.
  /// The upload must be redone from scratch on a re-run.
  #[error("uploaded artifact is corrupt: expected digest {expected}, backend reported {actual}")]
  CorruptUpload { expected: String, actual: String },

  /// Any other non-transient backend failure.
  #[error("{phase} failed: {message}")]
  Backend { phase: Phase, message: String },

  /// Cancellation was observed between resource operations.
  #[error("interrupted before {phase}")]
  Interrupted { phase: Phase },
}

impl ReconcileError {
  /// Translate a transport-level error into the pass taxonomy, attaching the
  /// phase it occurred in.
  pub(crate) fn from_backend(phase: Phase, err: BackendError) -> Self {
    match err {
      BackendError::Unavailable(message) => ReconcileError::BackendUnavailable { phase, message },
      BackendError::Rejected(message) => ReconcileError::InvalidConfiguration {
        resource: phase.to_string(),
        message,
      },
      BackendError::NotFound(message) => ReconcileError::MissingDependency(message),
      BackendError::Api(message) => ReconcileError::Backend { phase, message },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn transient_classification() {
    assert!(BackendError::Unavailable("timeout".into()).is_transient());
    assert!(!BackendError::Rejected("bad memory size".into()).is_transient());
    assert!(!BackendError::NotFound("no such role".into()).is_transient());
    assert!(!BackendError::Api("internal".into()).is_transient());
  }

  #[test]
  fn backend_translation_keeps_phase() {
    let err = ReconcileError::from_backend(Phase::Function, BackendError::Unavailable("503".into()));
    assert!(matches!(
      err,
      ReconcileError::BackendUnavailable {
        phase: Phase::Function,
        ..
      }
    ));

    let err = ReconcileError::from_backend(Phase::Function, BackendError::Rejected("memory".into()));
    assert!(matches!(err, ReconcileError::InvalidConfiguration { .. }));
  }
}
