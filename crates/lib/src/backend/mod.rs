//! Cloud backend boundary.
//!
//! The engine only talks to the outside world through the capability traits
//! in this module: [`PolicyStore`], [`RoleStore`], [`FunctionStore`] and
//! [`EventSourceStore`] for the reconciled resources, plus the two narrow
//! collaborators [`ObjectStore`] (artifact staging) and [`LogStore`] (log
//! retrieval). Each trait is implemented once against AWS ([`aws`]) and once
//! in memory ([`memory`]) so every engine property can be tested without a
//! live backend.
//!
//! Stores report absence through [`ResourceDescriptor::Absent`] on probes;
//! absence is a normal outcome there, not an error. Mutation calls against a
//! missing resource surface [`BackendError::NotFound`].

pub mod aws;
pub mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{EventSourceSpec, FunctionSpec, PermissionSpec, StartingPosition};
use crate::error::BackendError;

/// Field keys used in [`ResourceRecord`] attribute maps.
pub mod attr {
  pub const HANDLER: &str = "handler";
  pub const RUNTIME: &str = "runtime";
  pub const MEMORY_MB: &str = "memory_mb";
  pub const TIMEOUT_SECS: &str = "timeout_secs";
  pub const DESCRIPTION: &str = "description";
  pub const ROLE: &str = "role";
  pub const CODE_SHA256: &str = "code_sha256";
  pub const DEFAULT_VERSION: &str = "default_version";
  pub const STATE: &str = "state";
}

/// Current state of one remote resource: its provider-assigned identity plus
/// a flat field→value mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceRecord {
  pub identity: String,
  pub attributes: BTreeMap<String, String>,
}

impl ResourceRecord {
  pub fn new(identity: impl Into<String>) -> Self {
    ResourceRecord {
      identity: identity.into(),
      attributes: BTreeMap::new(),
    }
  }

  pub fn with_attr(mut self, key: &str, value: impl Into<String>) -> Self {
    self.attributes.insert(key.to_string(), value.into());
    self
  }

  pub fn attr(&self, key: &str) -> Option<&str> {
    self.attributes.get(key).map(String::as_str)
  }
}

/// Result of probing one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ResourceDescriptor {
  Absent,
  Present(ResourceRecord),
}

impl ResourceDescriptor {
  pub fn is_absent(&self) -> bool {
    matches!(self, ResourceDescriptor::Absent)
  }

  pub fn record(&self) -> Option<&ResourceRecord> {
    match self {
      ResourceDescriptor::Absent => None,
      ResourceDescriptor::Present(record) => Some(record),
    }
  }
}

/// One event-source mapping as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventSourceBinding {
  /// Provider-assigned mapping identifier, used for deletion.
  pub id: String,
  pub source_arn: String,
  pub batch_size: i32,
  pub starting_position: StartingPosition,
}

impl EventSourceBinding {
  /// Bindings are equal to a desired spec only when the source identifier
  /// and the full configuration match.
  pub fn matches(&self, spec: &EventSourceSpec) -> bool {
    self.source_arn == spec.source_arn
      && self.batch_size == spec.batch_size
      && self.starting_position == spec.starting_position
  }
}

/// Where the function backend should read code from.
#[derive(Debug, Clone)]
pub enum CodeSource {
  Inline(Vec<u8>),
  Staged { bucket: String, key: String },
}

/// One execution-log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogRecord {
  pub timestamp: DateTime<Utc>,
  pub message: String,
}

#[async_trait]
pub trait PolicyStore: Send + Sync {
  /// Probe a policy by name.
  async fn get_policy(&self, name: &str) -> Result<ResourceDescriptor, BackendError>;

  /// Fetch the default-version document of a policy.
  async fn policy_document(&self, arn: &str) -> Result<String, BackendError>;

  async fn create_policy(&self, name: &str, document: &str) -> Result<ResourceRecord, BackendError>;

  /// Add a new default version; policies are versioned, never overwritten.
  async fn create_policy_version(&self, arn: &str, document: &str) -> Result<(), BackendError>;

  async fn delete_policy(&self, arn: &str) -> Result<(), BackendError>;
}

#[async_trait]
pub trait RoleStore: Send + Sync {
  /// Probe a role by name.
  async fn get_role(&self, name: &str) -> Result<ResourceDescriptor, BackendError>;

  async fn create_role(&self, name: &str, trust_document: &str) -> Result<ResourceRecord, BackendError>;

  /// ARNs of the policies currently attached to the role.
  async fn attached_policies(&self, role: &str) -> Result<Vec<String>, BackendError>;

  async fn attach_policy(&self, role: &str, policy_arn: &str) -> Result<(), BackendError>;

  async fn detach_policy(&self, role: &str, policy_arn: &str) -> Result<(), BackendError>;

  async fn delete_role(&self, name: &str) -> Result<(), BackendError>;
}

#[async_trait]
pub trait FunctionStore: Send + Sync {
  /// Probe a function by name.
  async fn get_function(&self, name: &str) -> Result<ResourceDescriptor, BackendError>;

  async fn create_function(
    &self,
    spec: &FunctionSpec,
    role_arn: &str,
    code: &CodeSource,
  ) -> Result<ResourceRecord, BackendError>;

  /// Apply the full desired configuration in one call.
  async fn update_configuration(&self, spec: &FunctionSpec, role_arn: &str) -> Result<(), BackendError>;

  /// Replace the deployed code; returns the backend's reported code digest
  /// (base64 SHA-256).
  async fn update_code(&self, name: &str, code: &CodeSource) -> Result<String, BackendError>;

  async fn add_permission(&self, name: &str, permission: &PermissionSpec) -> Result<(), BackendError>;

  async fn delete_function(&self, name: &str) -> Result<(), BackendError>;
}

#[async_trait]
pub trait EventSourceStore: Send + Sync {
  /// All bindings currently attached to the function. An unknown function
  /// has no bindings.
  async fn list_bindings(&self, function: &str) -> Result<Vec<EventSourceBinding>, BackendError>;

  async fn create_binding(
    &self,
    function: &str,
    spec: &EventSourceSpec,
  ) -> Result<EventSourceBinding, BackendError>;

  async fn delete_binding(&self, id: &str) -> Result<(), BackendError>;
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
  /// Upload an object; returns the content digest the backend reports
  /// (base64 SHA-256), if it reports one.
  async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<Option<String>, BackendError>;
}

#[async_trait]
pub trait LogStore: Send + Sync {
  /// Fetch log records at or after `start`. No ordering guarantee; callers sort.
  async fn fetch_records(&self, group: &str, start: DateTime<Utc>) -> Result<Vec<LogRecord>, BackendError>;

  async fn delete_group(&self, group: &str) -> Result<(), BackendError>;
}

/// Bundle of capability handles for one cloud backend.
#[derive(Clone)]
pub struct Backend {
  pub policies: Arc<dyn PolicyStore>,
  pub roles: Arc<dyn RoleStore>,
  pub functions: Arc<dyn FunctionStore>,
  pub event_sources: Arc<dyn EventSourceStore>,
  pub objects: Arc<dyn ObjectStore>,
  pub logs: Arc<dyn LogStore>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn record_attrs_round_trip() {
    let record = ResourceRecord::new("arn:aws:lambda:local:000000000000:function:orders")
      .with_attr(attr::HANDLER, "app.handler")
      .with_attr(attr::MEMORY_MB, "128");
    assert_eq!(record.attr(attr::HANDLER), Some("app.handler"));
    assert_eq!(record.attr(attr::RUNTIME), None);

    let descriptor = ResourceDescriptor::Present(record);
    assert!(!descriptor.is_absent());
    assert!(descriptor.record().is_some());
    assert!(ResourceDescriptor::Absent.record().is_none());
  }

  #[test]
  fn binding_equality_covers_configuration() {
    let binding = EventSourceBinding {
      id: "esm-1".into(),
      source_arn: "arn:aws:kinesis:us-east-1:000000000000:stream/orders".into(),
      batch_size: 100,
      starting_position: StartingPosition::TrimHorizon,
    };
    let mut spec = EventSourceSpec {
      source_arn: binding.source_arn.clone(),
      batch_size: 100,
      starting_position: StartingPosition::TrimHorizon,
    };
    assert!(binding.matches(&spec));

    spec.batch_size = 50;
    assert!(!binding.matches(&spec));

    spec.batch_size = 100;
    spec.starting_position = StartingPosition::Latest;
    assert!(!binding.matches(&spec));
  }
}
