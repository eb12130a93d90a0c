//! Reconciliation driver and pass-level types.
//!
//! One pass converges the resources in a fixed dependency order:
//!
//! 1. Policy (ensure the managed reference resolves, or the custom policy
//!    exists at the desired document version)
//! 2. Role (ensure it exists and has the policy attached)
//! 3. Publish (upload the artifact directly or to staging)
//! 4. Function (create, or converge configuration and code)
//! 5. Event sources (set difference, fail-forward per binding)
//!
//! Phases 1-4 are fatal on error; phase 5 runs every binding to completion
//! and reports per-binding outcomes. Nothing is rolled back — convergence is
//! achieved by re-running.

pub mod destroy;
pub mod events;
pub mod function;
pub mod plan;
pub mod policy;
pub mod publish;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tracing::info;

use crate::artifact::CodeArtifact;
use crate::backend::Backend;
use crate::config::DesiredState;
use crate::error::{Phase, ReconcileError};
use crate::util::retry::RetryPolicy;

pub use destroy::{destroy, DestroyReport};
pub use plan::{plan, PlanEntry, PlanReport, PlannedChange};
pub use publish::Published;

/// Cancellation flag shared between the driver and the caller.
///
/// Observed between resource operations only; an in-flight backend call is
/// always allowed to complete.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
  pub fn new() -> Self {
    CancelFlag::default()
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

/// Context threaded through one reconciliation pass.
///
/// Carries everything a reconciler needs explicitly; there is no process-wide
/// configuration state.
pub struct PassContext<'a> {
  pub desired: &'a DesiredState,
  pub backend: &'a Backend,
  pub retry: RetryPolicy,
  pub cancel: CancelFlag,
}

impl<'a> PassContext<'a> {
  pub fn new(desired: &'a DesiredState, backend: &'a Backend) -> Self {
    PassContext {
      desired,
      backend,
      retry: RetryPolicy::default(),
      cancel: CancelFlag::new(),
    }
  }

  /// Fail with `Interrupted` if cancellation was requested, naming the phase
  /// that would have run next.
  pub fn checkpoint(&self, phase: Phase) -> Result<(), ReconcileError> {
    if self.cancel.is_cancelled() {
      Err(ReconcileError::Interrupted { phase })
    } else {
      Ok(())
    }
  }
}

/// Per-resource outcome of one pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
  Created,
  Updated,
  Unchanged,
  Deleted,
  Failed { cause: String },
}

impl Outcome {
  pub fn is_failed(&self) -> bool {
    matches!(self, Outcome::Failed { .. })
  }
}

impl std::fmt::Display for Outcome {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Outcome::Created => write!(f, "created"),
      Outcome::Updated => write!(f, "updated"),
      Outcome::Unchanged => write!(f, "unchanged"),
      Outcome::Deleted => write!(f, "deleted"),
      Outcome::Failed { cause } => write!(f, "failed: {}", cause),
    }
  }
}

/// Outcome of one event-source binding operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindingOutcome {
  pub source_arn: String,
  pub outcome: Outcome,
}

/// Result of one full reconciliation pass.
#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
  pub policy: Outcome,
  pub role: Outcome,
  pub published: Published,
  /// `None` when the pass stopped after staging (stage-only publishing).
  pub function: Option<Outcome>,
  pub bindings: Vec<BindingOutcome>,
}

impl PassReport {
  /// True when every individual binding succeeded. The fatal phases cannot
  /// produce a report at all when they fail.
  pub fn is_success(&self) -> bool {
    !self.bindings.iter().any(|b| b.outcome.is_failed())
  }

  pub fn failed_bindings(&self) -> Vec<&BindingOutcome> {
    self.bindings.iter().filter(|b| b.outcome.is_failed()).collect()
  }

  /// True when the pass found nothing to change.
  pub fn is_converged_noop(&self) -> bool {
    self.policy == Outcome::Unchanged
      && self.role == Outcome::Unchanged
      && self.function == Some(Outcome::Unchanged)
      && self.bindings.iter().all(|b| b.outcome == Outcome::Unchanged)
  }
}

/// Run one full reconciliation pass.
///
/// Aborts on the first fatal error from the policy, role, publish or function
/// phases; event-source bindings always run to completion with per-binding
/// outcomes. Cancellation is honored between phases.
pub async fn converge(ctx: &PassContext<'_>, artifact: &CodeArtifact) -> Result<PassReport, ReconcileError> {
  info!(
    project = %ctx.desired.identity.project,
    function = %ctx.desired.function.name,
    artifact_digest = %artifact.digest_hex(),
    "starting reconciliation pass"
  );

  ctx.checkpoint(Phase::Policy)?;
  let policy = policy::ensure_policy(ctx).await?;

  ctx.checkpoint(Phase::Role)?;
  let role = policy::ensure_role(ctx, policy.arn.as_deref()).await?;

  ctx.checkpoint(Phase::Publish)?;
  let (code, published) = publish::publish(ctx, artifact).await?;

  let (function, bindings) = match code {
    None => {
      info!("artifact staged; function left untouched");
      (None, Vec::new())
    }
    Some(code) => {
      ctx.checkpoint(Phase::Function)?;
      let function = function::reconcile_function(ctx, &role.arn, &code, artifact).await?;

      ctx.checkpoint(Phase::EventSources)?;
      let bindings = events::reconcile_event_sources(ctx).await?;
      (Some(function), bindings)
    }
  };

  let report = PassReport {
    policy: policy.outcome,
    role: role.outcome,
    published,
    function,
    bindings,
  };
  info!(
    policy = %report.policy,
    role = %report.role,
    function = %report.function.as_ref().map(ToString::to_string).unwrap_or_else(|| "skipped".into()),
    bindings = report.bindings.len(),
    failed_bindings = report.failed_bindings().len(),
    "reconciliation pass complete"
  );
  Ok(report)
}
