//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use nimbus_lib::artifact::CodeArtifact;
use nimbus_lib::config::{
  DesiredState, EventSourceSpec, FunctionSpec, Identity, RoleSpec, StartingPosition,
};

/// Minimal desired state: project "orders", default role, no policy, direct
/// upload, no event sources. Tests mutate the public fields as needed.
pub fn base_state() -> DesiredState {
  DesiredState {
    identity: Identity {
      project: "orders".into(),
      region: None,
      profile: None,
    },
    policy: None,
    role: RoleSpec::Default,
    function: FunctionSpec {
      name: "orders".into(),
      description: "order intake".into(),
      handler: "app.handler".into(),
      runtime: "python3.12".into(),
      memory_mb: 128,
      timeout_secs: 3,
      source: "src".into(),
      permissions: vec![],
      event_sources: vec![],
    },
    publishing: None,
  }
}

pub fn artifact(payload: &[u8]) -> CodeArtifact {
  CodeArtifact::from_bytes(payload.to_vec())
}

pub fn event_source(arn: &str) -> EventSourceSpec {
  EventSourceSpec {
    source_arn: arn.into(),
    batch_size: 100,
    starting_position: StartingPosition::TrimHorizon,
  }
}

/// Count operations whose log line starts with the given call name.
pub fn count_ops(ops: &[String], call: &str) -> usize {
  ops.iter().filter(|op| op.starts_with(call)).count()
}

/// Index of the first operation starting with the given call name.
pub fn op_index(ops: &[String], call: &str) -> Option<usize> {
  ops.iter().position(|op| op.starts_with(call))
}
