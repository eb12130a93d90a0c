//! Policy and role reconciliation.
//!
//! Managed policies are only ever referenced, never created; custom policies
//! are created on absence and versioned on drift (never overwritten in
//! place). Roles referenced by name must already exist; the default execution
//! role is created with a trust document scoped to the execution
//! environment's assume-role principal. Attachment is a set-membership
//! operation and is safe to repeat.

use tracing::{debug, info};

use crate::config::{PolicySpec, RoleSpec};
use crate::error::{Phase, ReconcileError};
use crate::reconcile::{Outcome, PassContext};
use crate::util::retry::with_retry;

/// Trust document allowing the serverless execution environment to assume
/// the default role.
pub const TRUST_DOCUMENT: &str = r#"{
    "Version": "2012-10-17",
    "Statement": [{
        "Effect": "Allow",
        "Principal": {"Service": ["lambda.amazonaws.com"]},
        "Action": ["sts:AssumeRole"]
    }]
}"#;

/// Resolved policy after reconciliation. `arn` is `None` when the desired
/// state declares no policy.
#[derive(Debug, Clone)]
pub struct PolicyResolution {
  pub arn: Option<String>,
  pub outcome: Outcome,
}

/// Resolved role after reconciliation.
#[derive(Debug, Clone)]
pub struct RoleResolution {
  pub arn: String,
  pub outcome: Outcome,
}

/// Structural comparison of two policy documents. Whitespace and key order
/// never count as drift; non-JSON documents fall back to exact comparison.
pub(crate) fn documents_match(current: &str, desired: &str) -> bool {
  match (
    serde_json::from_str::<serde_json::Value>(current),
    serde_json::from_str::<serde_json::Value>(desired),
  ) {
    (Ok(current), Ok(desired)) => current == desired,
    _ => current == desired,
  }
}

/// Ensure the desired policy exists and its document is current.
pub async fn ensure_policy(ctx: &PassContext<'_>) -> Result<PolicyResolution, ReconcileError> {
  let Some(spec) = &ctx.desired.policy else {
    debug!("no policy declared");
    return Ok(PolicyResolution {
      arn: None,
      outcome: Outcome::Unchanged,
    });
  };

  let store = &ctx.backend.policies;
  let descriptor = with_retry(&ctx.retry, "get_policy", || store.get_policy(spec.name()))
    .await
    .map_err(|e| ReconcileError::from_backend(Phase::Policy, e))?;

  match spec {
    PolicySpec::Managed { name } => match descriptor.record() {
      None => Err(ReconcileError::MissingManagedPolicy(name.clone())),
      Some(record) => {
        debug!(policy = %name, arn = %record.identity, "managed policy resolved");
        Ok(PolicyResolution {
          arn: Some(record.identity.clone()),
          outcome: Outcome::Unchanged,
        })
      }
    },
    PolicySpec::Custom { name, document } => match descriptor.record() {
      None => {
        info!(policy = %name, "creating policy");
        let record = with_retry(&ctx.retry, "create_policy", || store.create_policy(name, document))
          .await
          .map_err(|e| ReconcileError::from_backend(Phase::Policy, e))?;
        Ok(PolicyResolution {
          arn: Some(record.identity),
          outcome: Outcome::Created,
        })
      }
      Some(record) => {
        let arn = record.identity.clone();
        let current = with_retry(&ctx.retry, "policy_document", || store.policy_document(&arn))
          .await
          .map_err(|e| ReconcileError::from_backend(Phase::Policy, e))?;
        if documents_match(&current, document) {
          debug!(policy = %name, "policy document unchanged");
          Ok(PolicyResolution {
            arn: Some(arn),
            outcome: Outcome::Unchanged,
          })
        } else {
          info!(policy = %name, "policy document drifted, creating new version");
          with_retry(&ctx.retry, "create_policy_version", || {
            store.create_policy_version(&arn, document)
          })
          .await
          .map_err(|e| ReconcileError::from_backend(Phase::Policy, e))?;
          Ok(PolicyResolution {
            arn: Some(arn),
            outcome: Outcome::Updated,
          })
        }
      }
    },
  }
}

/// Ensure the execution role exists and has the policy attached.
///
/// An existing role's configuration is left untouched; only the attachment
/// set is converged.
pub async fn ensure_role(
  ctx: &PassContext<'_>,
  policy_arn: Option<&str>,
) -> Result<RoleResolution, ReconcileError> {
  let store = &ctx.backend.roles;
  let name = ctx.desired.role_name();

  let descriptor = with_retry(&ctx.retry, "get_role", || store.get_role(name))
    .await
    .map_err(|e| ReconcileError::from_backend(Phase::Role, e))?;

  let (arn, mut outcome) = match (descriptor.record(), &ctx.desired.role) {
    (Some(record), _) => {
      debug!(role = %name, arn = %record.identity, "role exists");
      (record.identity.clone(), Outcome::Unchanged)
    }
    (None, RoleSpec::Existing { name }) => {
      return Err(ReconcileError::MissingDependency(format!(
        "role '{}' does not exist",
        name
      )));
    }
    (None, RoleSpec::Default) => {
      info!(role = %name, "creating execution role");
      let record = with_retry(&ctx.retry, "create_role", || store.create_role(name, TRUST_DOCUMENT))
        .await
        .map_err(|e| ReconcileError::from_backend(Phase::Role, e))?;
      (record.identity, Outcome::Created)
    }
  };

  if let Some(policy_arn) = policy_arn {
    let attached = with_retry(&ctx.retry, "attached_policies", || store.attached_policies(name))
      .await
      .map_err(|e| ReconcileError::from_backend(Phase::Role, e))?;
    if attached.iter().any(|a| a == policy_arn) {
      debug!(role = %name, policy = %policy_arn, "policy already attached");
    } else {
      info!(role = %name, policy = %policy_arn, "attaching policy");
      with_retry(&ctx.retry, "attach_policy", || store.attach_policy(name, policy_arn))
        .await
        .map_err(|e| ReconcileError::from_backend(Phase::Role, e))?;
      if outcome == Outcome::Unchanged {
        outcome = Outcome::Updated;
      }
    }
  }

  Ok(RoleResolution { arn, outcome })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn document_comparison_is_structural() {
    let a = r#"{"Version": "2012-10-17", "Statement": []}"#;
    let b = "{\"Statement\":[],\n  \"Version\":\"2012-10-17\"}";
    assert!(documents_match(a, b));

    let c = r#"{"Version": "2012-10-17", "Statement": [{"Effect": "Allow"}]}"#;
    assert!(!documents_match(a, c));
  }

  #[test]
  fn non_json_documents_compare_exactly() {
    assert!(documents_match("same", "same"));
    assert!(!documents_match("same", "other"));
  }

  #[test]
  fn trust_document_names_the_assume_role_principal() {
    let value: serde_json::Value = serde_json::from_str(TRUST_DOCUMENT).unwrap();
    assert_eq!(value["Statement"][0]["Principal"]["Service"][0], "lambda.amazonaws.com");
  }
}
