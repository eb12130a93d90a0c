//! Read-only status snapshot and log tailing.
//!
//! Both are safe to call at any time: absent resources are represented in the
//! snapshot, never omitted, and tailing a function that has produced no logs
//! yields an empty sequence.

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::debug;

use crate::backend::{EventSourceBinding, LogRecord, ResourceDescriptor};
use crate::consts::LOG_WINDOW_MINUTES;
use crate::error::{BackendError, Phase, ReconcileError};
use crate::reconcile::PassContext;
use crate::util::retry::with_retry;

/// Fresh probe of every resource the desired state references.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
  /// `Absent` both when the policy does not exist and when none is declared.
  pub policy: ResourceDescriptor,
  pub role: ResourceDescriptor,
  pub function: ResourceDescriptor,
  pub event_sources: Vec<EventSourceBinding>,
}

/// Probe current state. Read-only; never mutates the backend.
pub async fn status(ctx: &PassContext<'_>) -> Result<StatusSnapshot, ReconcileError> {
  let desired = ctx.desired;

  let policy = match &desired.policy {
    None => ResourceDescriptor::Absent,
    Some(spec) => with_retry(&ctx.retry, "get_policy", || {
      ctx.backend.policies.get_policy(spec.name())
    })
    .await
    .map_err(|e| ReconcileError::from_backend(Phase::Status, e))?,
  };

  let role = with_retry(&ctx.retry, "get_role", || {
    ctx.backend.roles.get_role(desired.role_name())
  })
  .await
  .map_err(|e| ReconcileError::from_backend(Phase::Status, e))?;

  let function = with_retry(&ctx.retry, "get_function", || {
    ctx.backend.functions.get_function(&desired.function.name)
  })
  .await
  .map_err(|e| ReconcileError::from_backend(Phase::Status, e))?;

  let event_sources = match with_retry(&ctx.retry, "list_bindings", || {
    ctx.backend.event_sources.list_bindings(&desired.function.name)
  })
  .await
  {
    Ok(bindings) => bindings,
    Err(BackendError::NotFound(_)) => Vec::new(),
    Err(e) => return Err(ReconcileError::from_backend(Phase::Status, e)),
  };

  Ok(StatusSnapshot {
    policy,
    role,
    function,
    event_sources,
  })
}

/// Fetch one bounded window of execution-log records, ascending by timestamp.
///
/// Each call re-fetches from the backend; there is no cursor to resume.
pub async fn tail_logs(ctx: &PassContext<'_>) -> Result<Vec<LogRecord>, ReconcileError> {
  let group = ctx.desired.log_group();
  let start = Utc::now() - Duration::minutes(LOG_WINDOW_MINUTES);
  debug!(group = %group, start = %start, "fetching log records");

  let mut records = match with_retry(&ctx.retry, "fetch_records", || {
    ctx.backend.logs.fetch_records(&group, start)
  })
  .await
  {
    Ok(records) => records,
    Err(BackendError::NotFound(_)) => Vec::new(),
    Err(e) => return Err(ReconcileError::from_backend(Phase::Status, e)),
  };

  records.sort_by_key(|record| record.timestamp);
  Ok(records)
}
