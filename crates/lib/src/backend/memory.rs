//! In-memory implementation of the backend capability traits.
//!
//! Backs every engine-level test: it records each mutating call in order (so
//! tests can assert idempotence and operation ordering), validates function
//! memory the way the real backend does, and supports targeted failure
//! injection for partial-failure and corrupt-upload scenarios.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::backend::{
  attr, Backend, CodeSource, EventSourceBinding, EventSourceStore, FunctionStore, LogRecord, LogStore,
  ObjectStore, PolicyStore, ResourceDescriptor, ResourceRecord, RoleStore,
};
use crate::config::{EventSourceSpec, FunctionSpec, PermissionSpec, StartingPosition};
use crate::error::BackendError;

const ACCOUNT: &str = "000000000000";
const MEMORY_FLOOR_MB: i32 = 128;
const MEMORY_CEILING_MB: i32 = 10240;

#[derive(Debug, Clone)]
struct MemoryPolicy {
  arn: String,
  /// Document versions, last one is the default.
  documents: Vec<String>,
}

#[derive(Debug, Clone)]
struct MemoryRole {
  arn: String,
  trust_document: String,
  attached: BTreeSet<String>,
}

#[derive(Debug, Clone)]
struct MemoryFunction {
  arn: String,
  handler: String,
  runtime: String,
  memory_mb: i32,
  timeout_secs: i32,
  description: String,
  role: String,
  code_sha256: String,
  permissions: Vec<PermissionSpec>,
}

#[derive(Debug, Clone)]
struct MemoryBinding {
  function: String,
  source_arn: String,
  batch_size: i32,
  starting_position: StartingPosition,
}

#[derive(Debug, Default)]
struct MemoryState {
  policies: BTreeMap<String, MemoryPolicy>,
  roles: BTreeMap<String, MemoryRole>,
  functions: BTreeMap<String, MemoryFunction>,
  bindings: BTreeMap<String, MemoryBinding>,
  objects: BTreeMap<String, Vec<u8>>,
  logs: BTreeMap<String, Vec<LogRecord>>,
  operations: Vec<String>,
  next_binding: u64,
  failing_sources: BTreeSet<String>,
  corrupt_uploads: bool,
}

/// Shared-state in-memory backend. Cloning shares the state.
#[derive(Clone, Default)]
pub struct MemoryBackend {
  state: Arc<Mutex<MemoryState>>,
}

fn sha256_base64(bytes: &[u8]) -> String {
  BASE64.encode(Sha256::digest(bytes))
}

impl MemoryBackend {
  pub fn new() -> Self {
    MemoryBackend::default()
  }

  /// Bundle this backend's capability handles for the engine.
  pub fn backend(&self) -> Backend {
    Backend {
      policies: Arc::new(self.clone()),
      roles: Arc::new(self.clone()),
      functions: Arc::new(self.clone()),
      event_sources: Arc::new(self.clone()),
      objects: Arc::new(self.clone()),
      logs: Arc::new(self.clone()),
    }
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
    self.state.lock().expect("poisoned backend state")
  }

  /// Mutating calls issued so far, in order.
  pub fn operations(&self) -> Vec<String> {
    self.lock().operations.clone()
  }

  pub fn mutation_count(&self) -> usize {
    self.lock().operations.len()
  }

  /// Seed a managed policy the engine may reference but never creates.
  pub fn seed_managed_policy(&self, name: &str) -> String {
    let arn = format!("arn:aws:iam::{}:policy/{}", ACCOUNT, name);
    self.lock().policies.insert(
      name.to_string(),
      MemoryPolicy {
        arn: arn.clone(),
        documents: vec!["{}".to_string()],
      },
    );
    arn
  }

  /// Seed a pre-existing role, as when the config references a shared one.
  pub fn seed_role(&self, name: &str) -> String {
    let arn = format!("arn:aws:iam::{}:role/{}", ACCOUNT, name);
    self.lock().roles.insert(
      name.to_string(),
      MemoryRole {
        arn: arn.clone(),
        trust_document: "{}".to_string(),
        attached: BTreeSet::new(),
      },
    );
    arn
  }

  pub fn push_log(&self, group: &str, timestamp: DateTime<Utc>, message: &str) {
    self.lock().logs.entry(group.to_string()).or_default().push(LogRecord {
      timestamp,
      message: message.to_string(),
    });
  }

  /// All binding create/delete calls for this source fail until cleared.
  pub fn fail_bindings_for(&self, source_arn: &str) {
    self.lock().failing_sources.insert(source_arn.to_string());
  }

  /// Make every upload report a bogus content digest.
  pub fn corrupt_uploads(&self, corrupt: bool) {
    self.lock().corrupt_uploads = corrupt;
  }

  pub fn policy_version_count(&self, name: &str) -> usize {
    self.lock().policies.get(name).map_or(0, |p| p.documents.len())
  }

  pub fn attached_policy_arns(&self, role: &str) -> Vec<String> {
    self
      .lock()
      .roles
      .get(role)
      .map(|r| r.attached.iter().cloned().collect())
      .unwrap_or_default()
  }

  pub fn function_code_sha(&self, name: &str) -> Option<String> {
    self.lock().functions.get(name).map(|f| f.code_sha256.clone())
  }

  pub fn permission_statements(&self, name: &str) -> Vec<String> {
    self
      .lock()
      .functions
      .get(name)
      .map(|f| f.permissions.iter().map(|p| p.statement_id.clone()).collect())
      .unwrap_or_default()
  }

  pub fn role_trust_document(&self, name: &str) -> Option<String> {
    self.lock().roles.get(name).map(|r| r.trust_document.clone())
  }

  pub fn binding_sources(&self) -> Vec<String> {
    self.lock().bindings.values().map(|b| b.source_arn.clone()).collect()
  }

  pub fn stored_object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
    self.lock().objects.get(&format!("{}/{}", bucket, key)).cloned()
  }
}

impl MemoryState {
  fn record(&mut self, op: impl Into<String>) {
    self.operations.push(op.into());
  }

  fn resolve_code(&self, code: &CodeSource) -> Result<String, BackendError> {
    match code {
      CodeSource::Inline(bytes) => Ok(sha256_base64(bytes)),
      CodeSource::Staged { bucket, key } => {
        let object_key = format!("{}/{}", bucket, key);
        self
          .objects
          .get(&object_key)
          .map(|bytes| sha256_base64(bytes))
          .ok_or_else(|| BackendError::NotFound(format!("no staged object at {}", object_key)))
      }
    }
  }
}

#[async_trait]
impl PolicyStore for MemoryBackend {
  async fn get_policy(&self, name: &str) -> Result<ResourceDescriptor, BackendError> {
    let state = self.lock();
    Ok(match state.policies.get(name) {
      None => ResourceDescriptor::Absent,
      Some(policy) => ResourceDescriptor::Present(
        ResourceRecord::new(policy.arn.clone())
          .with_attr(attr::DEFAULT_VERSION, format!("v{}", policy.documents.len())),
      ),
    })
  }

  async fn policy_document(&self, arn: &str) -> Result<String, BackendError> {
    let state = self.lock();
    state
      .policies
      .values()
      .find(|p| p.arn == arn)
      .and_then(|p| p.documents.last().cloned())
      .ok_or_else(|| BackendError::NotFound(format!("policy {}", arn)))
  }

  async fn create_policy(&self, name: &str, document: &str) -> Result<ResourceRecord, BackendError> {
    let mut state = self.lock();
    state.record(format!("create_policy {}", name));
    let arn = format!("arn:aws:iam::{}:policy/{}", ACCOUNT, name);
    state.policies.insert(
      name.to_string(),
      MemoryPolicy {
        arn: arn.clone(),
        documents: vec![document.to_string()],
      },
    );
    Ok(ResourceRecord::new(arn).with_attr(attr::DEFAULT_VERSION, "v1"))
  }

  async fn create_policy_version(&self, arn: &str, document: &str) -> Result<(), BackendError> {
    let mut state = self.lock();
    state.record(format!("create_policy_version {}", arn));
    let policy = state
      .policies
      .values_mut()
      .find(|p| p.arn == arn)
      .ok_or_else(|| BackendError::NotFound(format!("policy {}", arn)))?;
    policy.documents.push(document.to_string());
    Ok(())
  }

  async fn delete_policy(&self, arn: &str) -> Result<(), BackendError> {
    let mut state = self.lock();
    state.record(format!("delete_policy {}", arn));
    let name = state
      .policies
      .iter()
      .find(|(_, p)| p.arn == arn)
      .map(|(name, _)| name.clone())
      .ok_or_else(|| BackendError::NotFound(format!("policy {}", arn)))?;
    state.policies.remove(&name);
    Ok(())
  }
}

#[async_trait]
impl RoleStore for MemoryBackend {
  async fn get_role(&self, name: &str) -> Result<ResourceDescriptor, BackendError> {
    let state = self.lock();
    Ok(match state.roles.get(name) {
      None => ResourceDescriptor::Absent,
      Some(role) => ResourceDescriptor::Present(ResourceRecord::new(role.arn.clone())),
    })
  }

  async fn create_role(&self, name: &str, trust_document: &str) -> Result<ResourceRecord, BackendError> {
    let mut state = self.lock();
    state.record(format!("create_role {}", name));
    let arn = format!("arn:aws:iam::{}:role/{}", ACCOUNT, name);
    state.roles.insert(
      name.to_string(),
      MemoryRole {
        arn: arn.clone(),
        trust_document: trust_document.to_string(),
        attached: BTreeSet::new(),
      },
    );
    Ok(ResourceRecord::new(arn))
  }

  async fn attached_policies(&self, role: &str) -> Result<Vec<String>, BackendError> {
    let state = self.lock();
    state
      .roles
      .get(role)
      .map(|r| r.attached.iter().cloned().collect())
      .ok_or_else(|| BackendError::NotFound(format!("role {}", role)))
  }

  async fn attach_policy(&self, role: &str, policy_arn: &str) -> Result<(), BackendError> {
    let mut state = self.lock();
    state.record(format!("attach_policy {} {}", role, policy_arn));
    let role = state
      .roles
      .get_mut(role)
      .ok_or_else(|| BackendError::NotFound(format!("role {}", role)))?;
    role.attached.insert(policy_arn.to_string());
    Ok(())
  }

  async fn detach_policy(&self, role: &str, policy_arn: &str) -> Result<(), BackendError> {
    let mut state = self.lock();
    state.record(format!("detach_policy {} {}", role, policy_arn));
    let role = state
      .roles
      .get_mut(role)
      .ok_or_else(|| BackendError::NotFound(format!("role {}", role)))?;
    role.attached.remove(policy_arn);
    Ok(())
  }

  async fn delete_role(&self, name: &str) -> Result<(), BackendError> {
    let mut state = self.lock();
    state.record(format!("delete_role {}", name));
    state
      .roles
      .remove(name)
      .map(|_| ())
      .ok_or_else(|| BackendError::NotFound(format!("role {}", name)))
  }
}

#[async_trait]
impl FunctionStore for MemoryBackend {
  async fn get_function(&self, name: &str) -> Result<ResourceDescriptor, BackendError> {
    let state = self.lock();
    Ok(match state.functions.get(name) {
      None => ResourceDescriptor::Absent,
      Some(function) => ResourceDescriptor::Present(
        ResourceRecord::new(function.arn.clone())
          .with_attr(attr::HANDLER, function.handler.clone())
          .with_attr(attr::RUNTIME, function.runtime.clone())
          .with_attr(attr::MEMORY_MB, function.memory_mb.to_string())
          .with_attr(attr::TIMEOUT_SECS, function.timeout_secs.to_string())
          .with_attr(attr::DESCRIPTION, function.description.clone())
          .with_attr(attr::ROLE, function.role.clone())
          .with_attr(attr::CODE_SHA256, function.code_sha256.clone())
          .with_attr(attr::STATE, "Active"),
      ),
    })
  }

  async fn create_function(
    &self,
    spec: &FunctionSpec,
    role_arn: &str,
    code: &CodeSource,
  ) -> Result<ResourceRecord, BackendError> {
    let mut state = self.lock();
    state.record(format!("create_function {}", spec.name));
    if state.functions.contains_key(&spec.name) {
      return Err(BackendError::Api(format!("function {} already exists", spec.name)));
    }
    if !(MEMORY_FLOOR_MB..=MEMORY_CEILING_MB).contains(&spec.memory_mb) {
      return Err(BackendError::Rejected(format!(
        "memory size {} out of range [{}, {}]",
        spec.memory_mb, MEMORY_FLOOR_MB, MEMORY_CEILING_MB
      )));
    }
    let code_sha256 = state.resolve_code(code)?;
    let arn = format!("arn:aws:lambda:local:{}:function:{}", ACCOUNT, spec.name);
    state.functions.insert(
      spec.name.clone(),
      MemoryFunction {
        arn: arn.clone(),
        handler: spec.handler.clone(),
        runtime: spec.runtime.clone(),
        memory_mb: spec.memory_mb,
        timeout_secs: spec.timeout_secs,
        description: spec.description.clone(),
        role: role_arn.to_string(),
        code_sha256: code_sha256.clone(),
        permissions: Vec::new(),
      },
    );
    let reported = if state.corrupt_uploads {
      "corrupt".to_string()
    } else {
      code_sha256
    };
    Ok(ResourceRecord::new(arn).with_attr(attr::CODE_SHA256, reported))
  }

  async fn update_configuration(&self, spec: &FunctionSpec, role_arn: &str) -> Result<(), BackendError> {
    let mut state = self.lock();
    state.record(format!("update_configuration {}", spec.name));
    if !(MEMORY_FLOOR_MB..=MEMORY_CEILING_MB).contains(&spec.memory_mb) {
      return Err(BackendError::Rejected(format!(
        "memory size {} out of range [{}, {}]",
        spec.memory_mb, MEMORY_FLOOR_MB, MEMORY_CEILING_MB
      )));
    }
    let function = state
      .functions
      .get_mut(&spec.name)
      .ok_or_else(|| BackendError::NotFound(format!("function {}", spec.name)))?;
    function.handler = spec.handler.clone();
    function.runtime = spec.runtime.clone();
    function.memory_mb = spec.memory_mb;
    function.timeout_secs = spec.timeout_secs;
    function.description = spec.description.clone();
    function.role = role_arn.to_string();
    Ok(())
  }

  async fn update_code(&self, name: &str, code: &CodeSource) -> Result<String, BackendError> {
    let mut state = self.lock();
    state.record(format!("update_code {}", name));
    let code_sha256 = state.resolve_code(code)?;
    let function = state
      .functions
      .get_mut(name)
      .ok_or_else(|| BackendError::NotFound(format!("function {}", name)))?;
    function.code_sha256 = code_sha256.clone();
    if state.corrupt_uploads {
      Ok("corrupt".to_string())
    } else {
      Ok(code_sha256)
    }
  }

  async fn add_permission(&self, name: &str, permission: &PermissionSpec) -> Result<(), BackendError> {
    let mut state = self.lock();
    state.record(format!("add_permission {} {}", name, permission.statement_id));
    let function = state
      .functions
      .get_mut(name)
      .ok_or_else(|| BackendError::NotFound(format!("function {}", name)))?;
    function.permissions.push(permission.clone());
    Ok(())
  }

  async fn delete_function(&self, name: &str) -> Result<(), BackendError> {
    let mut state = self.lock();
    state.record(format!("delete_function {}", name));
    state
      .functions
      .remove(name)
      .map(|_| ())
      .ok_or_else(|| BackendError::NotFound(format!("function {}", name)))
  }
}

#[async_trait]
impl EventSourceStore for MemoryBackend {
  async fn list_bindings(&self, function: &str) -> Result<Vec<EventSourceBinding>, BackendError> {
    let state = self.lock();
    Ok(
      state
        .bindings
        .iter()
        .filter(|(_, binding)| binding.function == function)
        .map(|(id, binding)| EventSourceBinding {
          id: id.clone(),
          source_arn: binding.source_arn.clone(),
          batch_size: binding.batch_size,
          starting_position: binding.starting_position,
        })
        .collect(),
    )
  }

  async fn create_binding(
    &self,
    function: &str,
    spec: &EventSourceSpec,
  ) -> Result<EventSourceBinding, BackendError> {
    let mut state = self.lock();
    state.record(format!("create_binding {}", spec.source_arn));
    if state.failing_sources.contains(&spec.source_arn) {
      return Err(BackendError::Api(format!("injected failure for {}", spec.source_arn)));
    }
    state.next_binding += 1;
    let id = format!("esm-{}", state.next_binding);
    state.bindings.insert(
      id.clone(),
      MemoryBinding {
        function: function.to_string(),
        source_arn: spec.source_arn.clone(),
        batch_size: spec.batch_size,
        starting_position: spec.starting_position,
      },
    );
    Ok(EventSourceBinding {
      id,
      source_arn: spec.source_arn.clone(),
      batch_size: spec.batch_size,
      starting_position: spec.starting_position,
    })
  }

  async fn delete_binding(&self, id: &str) -> Result<(), BackendError> {
    let mut state = self.lock();
    state.record(format!("delete_binding {}", id));
    let source = state
      .bindings
      .get(id)
      .map(|b| b.source_arn.clone())
      .ok_or_else(|| BackendError::NotFound(format!("binding {}", id)))?;
    if state.failing_sources.contains(&source) {
      return Err(BackendError::Api(format!("injected failure for {}", source)));
    }
    state.bindings.remove(id);
    Ok(())
  }
}

#[async_trait]
impl ObjectStore for MemoryBackend {
  async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<Option<String>, BackendError> {
    let mut state = self.lock();
    state.record(format!("put_object {}/{}", bucket, key));
    let digest = sha256_base64(&body);
    state.objects.insert(format!("{}/{}", bucket, key), body);
    if state.corrupt_uploads {
      Ok(Some("corrupt".to_string()))
    } else {
      Ok(Some(digest))
    }
  }
}

#[async_trait]
impl LogStore for MemoryBackend {
  async fn fetch_records(&self, group: &str, start: DateTime<Utc>) -> Result<Vec<LogRecord>, BackendError> {
    let state = self.lock();
    Ok(
      state
        .logs
        .get(group)
        .map(|records| {
          records
            .iter()
            .filter(|record| record.timestamp >= start)
            .cloned()
            .collect()
        })
        .unwrap_or_default(),
    )
  }

  async fn delete_group(&self, group: &str) -> Result<(), BackendError> {
    let mut state = self.lock();
    state.record(format!("delete_group {}", group));
    state
      .logs
      .remove(group)
      .map(|_| ())
      .ok_or_else(|| BackendError::NotFound(format!("log group {}", group)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn spec(name: &str) -> FunctionSpec {
    FunctionSpec {
      name: name.to_string(),
      description: String::new(),
      handler: "app.handler".into(),
      runtime: "python3.12".into(),
      memory_mb: 128,
      timeout_secs: 3,
      source: "src".into(),
      permissions: vec![],
      event_sources: vec![],
    }
  }

  #[tokio::test]
  async fn probes_report_absent_without_error() {
    let backend = MemoryBackend::new();
    assert!(backend.get_policy("nope").await.unwrap().is_absent());
    assert!(backend.get_role("nope").await.unwrap().is_absent());
    assert!(backend.get_function("nope").await.unwrap().is_absent());
    assert!(backend.list_bindings("nope").await.unwrap().is_empty());
    assert_eq!(backend.mutation_count(), 0);
  }

  #[tokio::test]
  async fn function_lifecycle_tracks_code_digest() {
    let backend = MemoryBackend::new();
    let code = CodeSource::Inline(b"v1".to_vec());
    let record = backend.create_function(&spec("orders"), "arn:role", &code).await.unwrap();
    assert_eq!(record.attr(attr::CODE_SHA256), Some(sha256_base64(b"v1").as_str()));

    let reported = backend
      .update_code("orders", &CodeSource::Inline(b"v2".to_vec()))
      .await
      .unwrap();
    assert_eq!(reported, sha256_base64(b"v2"));
    assert_eq!(backend.function_code_sha("orders"), Some(sha256_base64(b"v2")));
  }

  #[tokio::test]
  async fn staged_code_resolves_through_object_store() {
    let backend = MemoryBackend::new();
    backend.put_object("artifacts", "orders.zip", b"zipped".to_vec()).await.unwrap();

    let code = CodeSource::Staged {
      bucket: "artifacts".into(),
      key: "orders.zip".into(),
    };
    let record = backend.create_function(&spec("orders"), "arn:role", &code).await.unwrap();
    assert_eq!(record.attr(attr::CODE_SHA256), Some(sha256_base64(b"zipped").as_str()));

    let missing = CodeSource::Staged {
      bucket: "artifacts".into(),
      key: "missing.zip".into(),
    };
    let err = backend.update_code("orders", &missing).await.unwrap_err();
    assert!(matches!(err, BackendError::NotFound(_)));
  }

  #[tokio::test]
  async fn memory_bounds_are_validated() {
    let backend = MemoryBackend::new();
    let mut tiny = spec("orders");
    tiny.memory_mb = 64;
    let err = backend
      .create_function(&tiny, "arn:role", &CodeSource::Inline(b"v1".to_vec()))
      .await
      .unwrap_err();
    assert!(matches!(err, BackendError::Rejected(_)));
  }

  #[tokio::test]
  async fn binding_failure_injection() {
    let backend = MemoryBackend::new();
    backend.fail_bindings_for("arn:bad");
    let err = backend
      .create_binding(
        "orders",
        &EventSourceSpec {
          source_arn: "arn:bad".into(),
          batch_size: 100,
          starting_position: StartingPosition::TrimHorizon,
        },
      )
      .await
      .unwrap_err();
    assert!(matches!(err, BackendError::Api(_)));
    assert!(backend.binding_sources().is_empty());
  }
}
