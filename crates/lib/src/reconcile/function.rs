//! Function reconciliation.
//!
//! Creates the function when absent; when present, converges configuration
//! and code independently. Configuration drift is detected field by field but
//! applied in one combined update call, never one call per field. Code drift
//! is decided purely on the backend's reported content digest.

use tracing::{debug, info, warn};

use crate::artifact::CodeArtifact;
use crate::backend::{attr, CodeSource, ResourceRecord};
use crate::config::FunctionSpec;
use crate::error::{BackendError, Phase, ReconcileError};
use crate::reconcile::{Outcome, PassContext};
use crate::util::retry::with_retry;

/// One configuration field whose observed value differs from the desired spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDrift {
  pub field: &'static str,
  pub current: String,
  pub desired: String,
}

/// Field-by-field comparison of the desired spec against an observed record.
///
/// `role_arn` is `None` when the role does not exist yet (dry-run planning
/// against a partially absent backend); the role field then always counts as
/// drifted.
pub(crate) fn config_drift(
  spec: &FunctionSpec,
  role_arn: Option<&str>,
  current: &ResourceRecord,
) -> Vec<FieldDrift> {
  let mut drift = Vec::new();
  let mut check = |field: &'static str, desired: String| {
    let observed = current.attr(field).unwrap_or_default();
    if observed != desired {
      drift.push(FieldDrift {
        field,
        current: observed.to_string(),
        desired,
      });
    }
  };

  check(attr::HANDLER, spec.handler.clone());
  check(attr::RUNTIME, spec.runtime.clone());
  check(attr::MEMORY_MB, spec.memory_mb.to_string());
  check(attr::TIMEOUT_SECS, spec.timeout_secs.to_string());
  check(attr::DESCRIPTION, spec.description.clone());
  match role_arn {
    Some(arn) => check(attr::ROLE, arn.to_string()),
    None => drift.push(FieldDrift {
      field: attr::ROLE,
      current: current.attr(attr::ROLE).unwrap_or_default().to_string(),
      desired: "(role created this pass)".to_string(),
    }),
  }
  drift
}

/// Whether the observed code digest matches the artifact.
pub(crate) fn code_matches(current: &ResourceRecord, digest_base64: &str) -> bool {
  current.attr(attr::CODE_SHA256) == Some(digest_base64)
}

fn translate(name: &str, err: BackendError) -> ReconcileError {
  // Attach the function name to validation rejections; everything else keeps
  // the generic phase mapping.
  match err {
    BackendError::Rejected(message) => ReconcileError::InvalidConfiguration {
      resource: format!("function/{}", name),
      message,
    },
    other => ReconcileError::from_backend(Phase::Function, other),
  }
}

/// Converge the function resource with the desired spec and published code.
pub async fn reconcile_function(
  ctx: &PassContext<'_>,
  role_arn: &str,
  code: &CodeSource,
  artifact: &CodeArtifact,
) -> Result<Outcome, ReconcileError> {
  let spec = &ctx.desired.function;
  let store = &ctx.backend.functions;

  let descriptor = with_retry(&ctx.retry, "get_function", || store.get_function(&spec.name))
    .await
    .map_err(|e| ReconcileError::from_backend(Phase::Function, e))?;

  match descriptor.record() {
    None => {
      info!(function = %spec.name, runtime = %spec.runtime, "creating function");
      let record = with_retry(&ctx.retry, "create_function", || {
        store.create_function(spec, role_arn, code)
      })
      .await
      .map_err(|e| translate(&spec.name, e))?;

      if let Some(reported) = record.attr(attr::CODE_SHA256) {
        let expected = artifact.digest_base64();
        if reported != expected {
          return Err(ReconcileError::CorruptUpload {
            expected,
            actual: reported.to_string(),
          });
        }
      }

      for permission in &spec.permissions {
        // Permission statements are additive; a failure here leaves the
        // function deployed and is reported, not fatal.
        if let Err(err) = with_retry(&ctx.retry, "add_permission", || {
          store.add_permission(&spec.name, permission)
        })
        .await
        {
          warn!(
            function = %spec.name,
            statement = %permission.statement_id,
            error = %err,
            "failed to add invocation permission"
          );
        }
      }

      Ok(Outcome::Created)
    }
    Some(record) => {
      let mut changed = false;

      let drift = config_drift(spec, Some(role_arn), record);
      if drift.is_empty() {
        debug!(function = %spec.name, "configuration matches");
      } else {
        info!(
          function = %spec.name,
          fields = ?drift.iter().map(|d| d.field).collect::<Vec<_>>(),
          "updating function configuration"
        );
        with_retry(&ctx.retry, "update_configuration", || {
          store.update_configuration(spec, role_arn)
        })
        .await
        .map_err(|e| translate(&spec.name, e))?;
        changed = true;
      }

      let expected = artifact.digest_base64();
      if code_matches(record, &expected) {
        debug!(function = %spec.name, "code digest matches");
      } else {
        info!(function = %spec.name, digest = %artifact.digest_hex(), "updating function code");
        let reported = with_retry(&ctx.retry, "update_code", || store.update_code(&spec.name, code))
          .await
          .map_err(|e| translate(&spec.name, e))?;
        if reported != expected {
          return Err(ReconcileError::CorruptUpload {
            expected,
            actual: reported,
          });
        }
        changed = true;
      }

      Ok(if changed { Outcome::Updated } else { Outcome::Unchanged })
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn spec() -> FunctionSpec {
    FunctionSpec {
      name: "orders".into(),
      description: "order intake".into(),
      handler: "app.handler".into(),
      runtime: "python3.12".into(),
      memory_mb: 256,
      timeout_secs: 30,
      source: "src".into(),
      permissions: vec![],
      event_sources: vec![],
    }
  }

  fn matching_record() -> ResourceRecord {
    ResourceRecord::new("arn:aws:lambda:local:000000000000:function:orders")
      .with_attr(attr::HANDLER, "app.handler")
      .with_attr(attr::RUNTIME, "python3.12")
      .with_attr(attr::MEMORY_MB, "256")
      .with_attr(attr::TIMEOUT_SECS, "30")
      .with_attr(attr::DESCRIPTION, "order intake")
      .with_attr(attr::ROLE, "arn:role")
      .with_attr(attr::CODE_SHA256, "digest")
  }

  #[test]
  fn no_drift_when_everything_matches() {
    let drift = config_drift(&spec(), Some("arn:role"), &matching_record());
    assert!(drift.is_empty());
    assert!(code_matches(&matching_record(), "digest"));
  }

  #[test]
  fn each_field_is_compared() {
    let record = matching_record()
      .with_attr(attr::MEMORY_MB, "128")
      .with_attr(attr::DESCRIPTION, "old text");
    let drift = config_drift(&spec(), Some("arn:role"), &record);
    let fields: Vec<_> = drift.iter().map(|d| d.field).collect();
    assert_eq!(fields, vec![attr::MEMORY_MB, attr::DESCRIPTION]);
    assert_eq!(drift[0].current, "128");
    assert_eq!(drift[0].desired, "256");
  }

  #[test]
  fn role_change_is_drift() {
    let drift = config_drift(&spec(), Some("arn:other-role"), &matching_record());
    assert_eq!(drift.len(), 1);
    assert_eq!(drift[0].field, attr::ROLE);
  }

  #[test]
  fn pending_role_always_counts_as_drift() {
    let drift = config_drift(&spec(), None, &matching_record());
    assert!(drift.iter().any(|d| d.field == attr::ROLE));
  }

  #[test]
  fn code_digest_mismatch_detected() {
    assert!(!code_matches(&matching_record(), "other-digest"));
  }
}
