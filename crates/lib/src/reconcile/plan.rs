//! Dry-run planner.
//!
//! Probes every resource and reports the operation a pass would perform,
//! without mutating anything. The planner reuses the reconcilers' decision
//! functions (document comparison, field drift, binding set diff), so a plan
//! cannot disagree with the apply that follows it. Fatal resolution errors
//! (missing managed policy, missing referenced role) surface exactly as they
//! would during an apply.

use serde::Serialize;
use tracing::debug;

use crate::artifact::CodeArtifact;
use crate::config::{PolicySpec, RoleSpec};
use crate::error::{Phase, ReconcileError};
use crate::reconcile::events::diff_bindings;
use crate::reconcile::function::{code_matches, config_drift};
use crate::reconcile::policy::documents_match;
use crate::reconcile::PassContext;
use crate::util::retry::with_retry;

/// A planned operation on one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannedChange {
  Create,
  Replace,
  Delete,
  NoOp,
}

impl PlannedChange {
  pub fn is_noop(&self) -> bool {
    matches!(self, PlannedChange::NoOp)
  }
}

/// One line of the plan.
#[derive(Debug, Clone, Serialize)]
pub struct PlanEntry {
  pub resource: String,
  pub change: PlannedChange,
  pub detail: Option<String>,
}

impl PlanEntry {
  fn new(resource: impl Into<String>, change: PlannedChange) -> Self {
    PlanEntry {
      resource: resource.into(),
      change,
      detail: None,
    }
  }

  fn with_detail(mut self, detail: impl Into<String>) -> Self {
    self.detail = Some(detail.into());
    self
  }
}

/// The full dry-run report.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlanReport {
  pub entries: Vec<PlanEntry>,
}

impl PlanReport {
  pub fn has_changes(&self) -> bool {
    self.entries.iter().any(|e| !e.change.is_noop())
  }

  pub fn change_count(&self) -> usize {
    self.entries.iter().filter(|e| !e.change.is_noop()).count()
  }

  pub fn changes(&self) -> impl Iterator<Item = &PlanEntry> {
    self.entries.iter().filter(|e| !e.change.is_noop())
  }
}

/// Compute the plan for one pass. Read-only.
pub async fn plan(ctx: &PassContext<'_>, artifact: &CodeArtifact) -> Result<PlanReport, ReconcileError> {
  let mut report = PlanReport::default();
  let desired = ctx.desired;

  // Policy
  let mut policy_arn: Option<String> = None;
  let mut policy_pending = false;
  if let Some(spec) = &desired.policy {
    let descriptor = with_retry(&ctx.retry, "get_policy", || {
      ctx.backend.policies.get_policy(spec.name())
    })
    .await
    .map_err(|e| ReconcileError::from_backend(Phase::Policy, e))?;

    let resource = format!("policy/{}", spec.name());
    match (spec, descriptor.record()) {
      (PolicySpec::Managed { name }, None) => {
        return Err(ReconcileError::MissingManagedPolicy(name.clone()));
      }
      (PolicySpec::Managed { .. }, Some(record)) => {
        policy_arn = Some(record.identity.clone());
        report
          .entries
          .push(PlanEntry::new(resource, PlannedChange::NoOp).with_detail("managed"));
      }
      (PolicySpec::Custom { .. }, None) => {
        policy_pending = true;
        report.entries.push(PlanEntry::new(resource, PlannedChange::Create));
      }
      (PolicySpec::Custom { document, .. }, Some(record)) => {
        policy_arn = Some(record.identity.clone());
        let current = with_retry(&ctx.retry, "policy_document", || {
          ctx.backend.policies.policy_document(&record.identity)
        })
        .await
        .map_err(|e| ReconcileError::from_backend(Phase::Policy, e))?;
        if documents_match(&current, document) {
          report.entries.push(PlanEntry::new(resource, PlannedChange::NoOp));
        } else {
          report
            .entries
            .push(PlanEntry::new(resource, PlannedChange::Replace).with_detail("new document version"));
        }
      }
    }
  }

  // Role
  let role_name = desired.role_name();
  let role_descriptor = with_retry(&ctx.retry, "get_role", || ctx.backend.roles.get_role(role_name))
    .await
    .map_err(|e| ReconcileError::from_backend(Phase::Role, e))?;
  let role_resource = format!("role/{}", role_name);
  let role_arn: Option<String> = match (role_descriptor.record(), &desired.role) {
    (Some(record), _) => {
      report.entries.push(PlanEntry::new(role_resource.as_str(), PlannedChange::NoOp));
      Some(record.identity.clone())
    }
    (None, RoleSpec::Existing { name }) => {
      return Err(ReconcileError::MissingDependency(format!(
        "role '{}' does not exist",
        name
      )));
    }
    (None, RoleSpec::Default) => {
      report
        .entries
        .push(PlanEntry::new(role_resource.as_str(), PlannedChange::Create).with_detail("default execution role"));
      None
    }
  };

  // Attachment
  if desired.policy.is_some() {
    let resource = format!("{} attachment", role_resource);
    match (&role_arn, &policy_arn) {
      (Some(_), Some(policy_arn)) => {
        let attached = with_retry(&ctx.retry, "attached_policies", || {
          ctx.backend.roles.attached_policies(role_name)
        })
        .await
        .map_err(|e| ReconcileError::from_backend(Phase::Role, e))?;
        if attached.iter().any(|a| a == policy_arn) {
          report.entries.push(PlanEntry::new(resource, PlannedChange::NoOp));
        } else {
          report.entries.push(PlanEntry::new(resource, PlannedChange::Create));
        }
      }
      _ => {
        let detail = if policy_pending {
          "after policy creation"
        } else {
          "after role creation"
        };
        report
          .entries
          .push(PlanEntry::new(resource, PlannedChange::Create).with_detail(detail));
      }
    }
  }

  // Function configuration and code
  let spec = &desired.function;
  let descriptor = with_retry(&ctx.retry, "get_function", || {
    ctx.backend.functions.get_function(&spec.name)
  })
  .await
  .map_err(|e| ReconcileError::from_backend(Phase::Function, e))?;
  let function_resource = format!("function/{}", spec.name);
  match descriptor.record() {
    None => {
      report.entries.push(
        PlanEntry::new(function_resource.as_str(), PlannedChange::Create)
          .with_detail(format!("{} {}", spec.runtime, spec.handler)),
      );
    }
    Some(record) => {
      let drift = config_drift(spec, role_arn.as_deref(), record);
      if drift.is_empty() {
        report
          .entries
          .push(PlanEntry::new(format!("{} configuration", function_resource), PlannedChange::NoOp));
      } else {
        let fields: Vec<&str> = drift.iter().map(|d| d.field).collect();
        report.entries.push(
          PlanEntry::new(format!("{} configuration", function_resource), PlannedChange::Replace)
            .with_detail(fields.join(", ")),
        );
      }

      if code_matches(record, &artifact.digest_base64()) {
        report
          .entries
          .push(PlanEntry::new(format!("{} code", function_resource), PlannedChange::NoOp));
      } else {
        report.entries.push(
          PlanEntry::new(format!("{} code", function_resource), PlannedChange::Replace)
            .with_detail(format!("digest {}", artifact.digest_hex())),
        );
      }
    }
  }

  // Event-source bindings
  let current = with_retry(&ctx.retry, "list_bindings", || {
    ctx.backend.event_sources.list_bindings(&spec.name)
  })
  .await
  .map_err(|e| ReconcileError::from_backend(Phase::EventSources, e))?;
  let diff = diff_bindings(&spec.event_sources, &current);
  for binding in &diff.unchanged {
    report
      .entries
      .push(PlanEntry::new(format!("binding/{}", binding.source_arn), PlannedChange::NoOp));
  }
  for added in &diff.to_add {
    report.entries.push(
      PlanEntry::new(format!("binding/{}", added.source_arn), PlannedChange::Create)
        .with_detail(format!("batch {} from {}", added.batch_size, added.starting_position)),
    );
  }
  for binding in &diff.to_remove {
    report
      .entries
      .push(PlanEntry::new(format!("binding/{}", binding.source_arn), PlannedChange::Delete));
  }

  debug!(entries = report.entries.len(), changes = report.change_count(), "plan computed");
  Ok(report)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn report_counts_changes() {
    let report = PlanReport {
      entries: vec![
        PlanEntry::new("role/orders", PlannedChange::NoOp),
        PlanEntry::new("function/orders", PlannedChange::Create),
        PlanEntry::new("binding/arn:a", PlannedChange::Delete),
      ],
    };
    assert!(report.has_changes());
    assert_eq!(report.change_count(), 2);
    assert_eq!(report.changes().count(), 2);
  }

  #[test]
  fn empty_report_has_no_changes() {
    let report = PlanReport::default();
    assert!(!report.has_changes());
    assert_eq!(report.change_count(), 0);
  }
}
