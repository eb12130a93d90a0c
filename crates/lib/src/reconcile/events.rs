//! Event-source binding reconciliation.
//!
//! The desired and observed binding sets are diffed by source identifier plus
//! configuration; a binding whose configuration changed appears on both sides
//! of the diff (delete-then-add), never as an in-place update. Additions and
//! removals are independent and run through a bounded concurrent pool;
//! individual failures are recorded per binding and never abort the pass, and
//! nothing already applied is rolled back.

use futures::StreamExt;
use tracing::{info, warn};

use crate::backend::EventSourceBinding;
use crate::config::EventSourceSpec;
use crate::consts::BINDING_POOL_WIDTH;
use crate::error::{Phase, ReconcileError};
use crate::reconcile::{BindingOutcome, Outcome, PassContext};
use crate::util::retry::with_retry;

/// Set difference between desired and observed bindings.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BindingDiff {
  pub to_add: Vec<EventSourceSpec>,
  pub to_remove: Vec<EventSourceBinding>,
  pub unchanged: Vec<EventSourceBinding>,
}

impl BindingDiff {
  pub fn is_empty(&self) -> bool {
    self.to_add.is_empty() && self.to_remove.is_empty()
  }
}

/// Compute the binding set difference.
pub(crate) fn diff_bindings(desired: &[EventSourceSpec], current: &[EventSourceBinding]) -> BindingDiff {
  let mut diff = BindingDiff::default();

  for spec in desired {
    if !current.iter().any(|binding| binding.matches(spec)) {
      diff.to_add.push(spec.clone());
    }
  }
  for binding in current {
    if desired.iter().any(|spec| binding.matches(spec)) {
      diff.unchanged.push(binding.clone());
    } else {
      diff.to_remove.push(binding.clone());
    }
  }

  diff
}

enum BindingOp {
  Add(EventSourceSpec),
  Remove(EventSourceBinding),
}

/// Converge the function's binding set. Only the initial listing can fail the
/// phase; every binding operation reports its own outcome.
pub async fn reconcile_event_sources(ctx: &PassContext<'_>) -> Result<Vec<BindingOutcome>, ReconcileError> {
  let function = &ctx.desired.function.name;
  let store = &ctx.backend.event_sources;

  let current = with_retry(&ctx.retry, "list_bindings", || store.list_bindings(function))
    .await
    .map_err(|e| ReconcileError::from_backend(Phase::EventSources, e))?;

  let diff = diff_bindings(&ctx.desired.function.event_sources, &current);
  info!(
    add = diff.to_add.len(),
    remove = diff.to_remove.len(),
    unchanged = diff.unchanged.len(),
    "reconciling event-source bindings"
  );

  let mut outcomes: Vec<BindingOutcome> = diff
    .unchanged
    .iter()
    .map(|binding| BindingOutcome {
      source_arn: binding.source_arn.clone(),
      outcome: Outcome::Unchanged,
    })
    .collect();

  let ops: Vec<BindingOp> = diff
    .to_add
    .into_iter()
    .map(BindingOp::Add)
    .chain(diff.to_remove.into_iter().map(BindingOp::Remove))
    .collect();

  let applied = futures::stream::iter(ops.into_iter().map(|op| {
    let store = store.clone();
    let retry = ctx.retry;
    let function = function.clone();
    async move {
      match op {
        BindingOp::Add(spec) => {
          match with_retry(&retry, "create_binding", || store.create_binding(&function, &spec)).await {
            Ok(_) => BindingOutcome {
              source_arn: spec.source_arn,
              outcome: Outcome::Created,
            },
            Err(err) => {
              warn!(source = %spec.source_arn, error = %err, "failed to add binding");
              BindingOutcome {
                source_arn: spec.source_arn,
                outcome: Outcome::Failed { cause: err.to_string() },
              }
            }
          }
        }
        BindingOp::Remove(binding) => {
          match with_retry(&retry, "delete_binding", || store.delete_binding(&binding.id)).await {
            Ok(_) => BindingOutcome {
              source_arn: binding.source_arn,
              outcome: Outcome::Deleted,
            },
            Err(err) => {
              warn!(source = %binding.source_arn, error = %err, "failed to remove binding");
              BindingOutcome {
                source_arn: binding.source_arn,
                outcome: Outcome::Failed { cause: err.to_string() },
              }
            }
          }
        }
      }
    }
  }))
  .buffer_unordered(BINDING_POOL_WIDTH)
  .collect::<Vec<_>>()
  .await;

  outcomes.extend(applied);
  Ok(outcomes)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::StartingPosition;

  fn spec(arn: &str) -> EventSourceSpec {
    EventSourceSpec {
      source_arn: arn.into(),
      batch_size: 100,
      starting_position: StartingPosition::TrimHorizon,
    }
  }

  fn binding(id: &str, arn: &str) -> EventSourceBinding {
    EventSourceBinding {
      id: id.into(),
      source_arn: arn.into(),
      batch_size: 100,
      starting_position: StartingPosition::TrimHorizon,
    }
  }

  #[test]
  fn set_difference_adds_and_removes() {
    // current = {A, B}, desired = {B, C}
    let current = vec![binding("esm-1", "arn:a"), binding("esm-2", "arn:b")];
    let desired = vec![spec("arn:b"), spec("arn:c")];

    let diff = diff_bindings(&desired, &current);
    assert_eq!(diff.to_add.len(), 1);
    assert_eq!(diff.to_add[0].source_arn, "arn:c");
    assert_eq!(diff.to_remove.len(), 1);
    assert_eq!(diff.to_remove[0].source_arn, "arn:a");
    assert_eq!(diff.unchanged.len(), 1);
    assert_eq!(diff.unchanged[0].source_arn, "arn:b");
  }

  #[test]
  fn changed_configuration_is_delete_then_add() {
    let current = vec![binding("esm-1", "arn:a")];
    let mut changed = spec("arn:a");
    changed.batch_size = 50;

    let diff = diff_bindings(&[changed], &current);
    assert_eq!(diff.to_add.len(), 1);
    assert_eq!(diff.to_remove.len(), 1);
    assert!(diff.unchanged.is_empty());
  }

  #[test]
  fn converged_sets_are_empty_diffs() {
    let current = vec![binding("esm-1", "arn:a")];
    let diff = diff_bindings(&[spec("arn:a")], &current);
    assert!(diff.is_empty());
    assert_eq!(diff.unchanged.len(), 1);

    let diff = diff_bindings(&[], &[]);
    assert!(diff.is_empty());
  }
}
