//! Teardown in reverse dependency order.
//!
//! Destroys event-source bindings, the function, its log group, then — only
//! for resources this system creates — the default role (after detaching
//! policies) and the custom policy. Referenced managed policies and existing
//! roles are never deleted. Absent resources report `Unchanged`, so destroy
//! is idempotent; individual failures are recorded and teardown continues
//! (fail-forward, re-run to finish).

use serde::Serialize;
use tracing::{info, warn};

use crate::config::{PolicySpec, RoleSpec};
use crate::error::{BackendError, Phase, ReconcileError};
use crate::reconcile::{BindingOutcome, Outcome, PassContext};
use crate::util::retry::with_retry;

/// Result of one teardown pass.
#[derive(Debug, Clone, Serialize)]
pub struct DestroyReport {
  pub bindings: Vec<BindingOutcome>,
  pub function: Outcome,
  pub log_group: Outcome,
  pub role: Outcome,
  pub policy: Outcome,
}

impl DestroyReport {
  pub fn is_success(&self) -> bool {
    !self.function.is_failed()
      && !self.log_group.is_failed()
      && !self.role.is_failed()
      && !self.policy.is_failed()
      && !self.bindings.iter().any(|b| b.outcome.is_failed())
  }

  /// Number of resources actually deleted.
  pub fn deleted_count(&self) -> usize {
    [&self.function, &self.log_group, &self.role, &self.policy]
      .into_iter()
      .filter(|o| **o == Outcome::Deleted)
      .count()
      + self
        .bindings
        .iter()
        .filter(|b| b.outcome == Outcome::Deleted)
        .count()
  }
}

fn deletion_outcome(result: Result<(), BackendError>, what: &str) -> Outcome {
  match result {
    Ok(()) => Outcome::Deleted,
    Err(BackendError::NotFound(_)) => Outcome::Unchanged,
    Err(err) => {
      warn!(resource = what, error = %err, "failed to delete");
      Outcome::Failed { cause: err.to_string() }
    }
  }
}

/// Tear down everything this desired state deployed.
pub async fn destroy(ctx: &PassContext<'_>) -> Result<DestroyReport, ReconcileError> {
  let desired = ctx.desired;
  let function_name = &desired.function.name;
  info!(project = %desired.identity.project, function = %function_name, "starting teardown");

  // Bindings first; they reference the function.
  ctx.checkpoint(Phase::Destroy)?;
  let current = with_retry(&ctx.retry, "list_bindings", || {
    ctx.backend.event_sources.list_bindings(function_name)
  })
  .await
  .map_err(|e| ReconcileError::from_backend(Phase::Destroy, e))?;
  let mut bindings = Vec::with_capacity(current.len());
  for binding in current {
    let result = with_retry(&ctx.retry, "delete_binding", || {
      ctx.backend.event_sources.delete_binding(&binding.id)
    })
    .await;
    bindings.push(BindingOutcome {
      source_arn: binding.source_arn.clone(),
      outcome: deletion_outcome(result, &binding.source_arn),
    });
  }

  ctx.checkpoint(Phase::Destroy)?;
  let function = match with_retry(&ctx.retry, "get_function", || {
    ctx.backend.functions.get_function(function_name)
  })
  .await
  {
    Ok(descriptor) if descriptor.is_absent() => Outcome::Unchanged,
    Ok(_) => {
      info!(function = %function_name, "deleting function");
      deletion_outcome(
        with_retry(&ctx.retry, "delete_function", || {
          ctx.backend.functions.delete_function(function_name)
        })
        .await,
        function_name,
      )
    }
    Err(e) => return Err(ReconcileError::from_backend(Phase::Destroy, e)),
  };

  ctx.checkpoint(Phase::Destroy)?;
  let group = desired.log_group();
  let log_group = deletion_outcome(
    with_retry(&ctx.retry, "delete_group", || ctx.backend.logs.delete_group(&group)).await,
    &group,
  );

  // Only the default role is owned by this system.
  ctx.checkpoint(Phase::Destroy)?;
  let role = match &desired.role {
    RoleSpec::Existing { .. } => Outcome::Unchanged,
    RoleSpec::Default => {
      let name = desired.role_name();
      match with_retry(&ctx.retry, "get_role", || ctx.backend.roles.get_role(name)).await {
        Ok(descriptor) if descriptor.is_absent() => Outcome::Unchanged,
        Ok(_) => {
          let attached = with_retry(&ctx.retry, "attached_policies", || {
            ctx.backend.roles.attached_policies(name)
          })
          .await
          .unwrap_or_default();
          for policy_arn in attached {
            if let Err(err) = with_retry(&ctx.retry, "detach_policy", || {
              ctx.backend.roles.detach_policy(name, &policy_arn)
            })
            .await
            {
              warn!(role = %name, policy = %policy_arn, error = %err, "failed to detach policy");
            }
          }
          info!(role = %name, "deleting execution role");
          deletion_outcome(
            with_retry(&ctx.retry, "delete_role", || ctx.backend.roles.delete_role(name)).await,
            name,
          )
        }
        Err(e) => return Err(ReconcileError::from_backend(Phase::Destroy, e)),
      }
    }
  };

  // Only custom policies are owned by this system.
  ctx.checkpoint(Phase::Destroy)?;
  let policy = match &desired.policy {
    None | Some(PolicySpec::Managed { .. }) => Outcome::Unchanged,
    Some(PolicySpec::Custom { name, .. }) => {
      match with_retry(&ctx.retry, "get_policy", || ctx.backend.policies.get_policy(name)).await {
        Ok(descriptor) => match descriptor.record() {
          None => Outcome::Unchanged,
          Some(record) => {
            let arn = record.identity.clone();
            info!(policy = %name, "deleting policy");
            deletion_outcome(
              with_retry(&ctx.retry, "delete_policy", || ctx.backend.policies.delete_policy(&arn)).await,
              name,
            )
          }
        },
        Err(e) => return Err(ReconcileError::from_backend(Phase::Destroy, e)),
      }
    }
  };

  let report = DestroyReport {
    bindings,
    function,
    log_group,
    role,
    policy,
  };
  info!(deleted = report.deleted_count(), success = report.is_success(), "teardown complete");
  Ok(report)
}
