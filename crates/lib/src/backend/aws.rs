//! AWS implementation of the backend capability traits.
//!
//! One thin adapter per store, all sharing a single credential/config
//! resolution. SDK-level retries are disabled so the engine's own bounded
//! retry policy is the only one in play, and every call carries the operation
//! timeout configured at construction.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_lambda::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::{EventSourcePosition, FunctionCode, Runtime};
use aws_sdk_s3::primitives::ByteStream;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::backend::{
  attr, Backend, CodeSource, EventSourceBinding, EventSourceStore, FunctionStore, LogRecord, LogStore,
  ObjectStore, PolicyStore, ResourceDescriptor, ResourceRecord, RoleStore,
};
use crate::config::{EventSourceSpec, FunctionSpec, PermissionSpec, StartingPosition};
use crate::error::BackendError;

const OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum policy versions the backend keeps; the oldest non-default version
/// is pruned before a new one is created.
const MAX_POLICY_VERSIONS: usize = 5;

/// All store adapters over one resolved AWS configuration.
pub struct AwsBackend {
  iam: aws_sdk_iam::Client,
  lambda: aws_sdk_lambda::Client,
  s3: aws_sdk_s3::Client,
  logs: aws_sdk_cloudwatchlogs::Client,
}

impl AwsBackend {
  /// Resolve credentials and construct the service clients. Region and
  /// profile override the ambient environment when given.
  pub async fn connect(region: Option<String>, profile: Option<String>) -> Self {
    let mut loader = aws_config::defaults(BehaviorVersion::latest())
      .retry_config(RetryConfig::disabled())
      .timeout_config(
        TimeoutConfig::builder()
          .operation_timeout(OPERATION_TIMEOUT)
          .build(),
      );
    if let Some(region) = region {
      loader = loader.region(Region::new(region));
    }
    if let Some(profile) = profile {
      loader = loader.profile_name(profile);
    }
    let config = loader.load().await;
    AwsBackend {
      iam: aws_sdk_iam::Client::new(&config),
      lambda: aws_sdk_lambda::Client::new(&config),
      s3: aws_sdk_s3::Client::new(&config),
      logs: aws_sdk_cloudwatchlogs::Client::new(&config),
    }
  }

  /// Bundle this backend's capability handles for the engine.
  pub fn into_backend(self) -> Backend {
    let shared = Arc::new(self);
    Backend {
      policies: shared.clone(),
      roles: shared.clone(),
      functions: shared.clone(),
      event_sources: shared.clone(),
      objects: shared.clone(),
      logs: shared,
    }
  }
}

/// Map an SDK error onto the transport-level taxonomy.
fn classify<E>(err: SdkError<E>) -> BackendError
where
  E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
  if matches!(
    err,
    SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_)
  ) {
    return BackendError::Unavailable(err.to_string());
  }

  let code = err.code().unwrap_or_default().to_string();
  let message = err
    .message()
    .map(str::to_string)
    .unwrap_or_else(|| err.to_string());
  match code.as_str() {
    "ResourceNotFoundException" | "NoSuchEntity" | "NoSuchEntityException" | "NoSuchKey" | "NoSuchBucket" => {
      BackendError::NotFound(message)
    }
    "ValidationError"
    | "ValidationException"
    | "InvalidParameterValueException"
    | "InvalidRequestContentException"
    | "InvalidParameterCombination"
    | "MalformedPolicyDocument"
    | "MalformedPolicyDocumentException" => BackendError::Rejected(message),
    "ThrottlingException"
    | "TooManyRequestsException"
    | "RequestTimeout"
    | "ServiceException"
    | "ServiceFailure"
    | "ServiceUnavailable"
    | "ServiceUnavailableException" => BackendError::Unavailable(message),
    _ if code.is_empty() => BackendError::Api(message),
    _ => BackendError::Api(format!("{}: {}", code, message)),
  }
}

/// Like [`classify`], but folds "not found" into `Absent` for probes.
fn absent_on_not_found(err: BackendError) -> Result<ResourceDescriptor, BackendError> {
  match err {
    BackendError::NotFound(_) => Ok(ResourceDescriptor::Absent),
    other => Err(other),
  }
}

fn position_from(position: Option<&EventSourcePosition>, fallback: StartingPosition) -> StartingPosition {
  match position.map(|p| p.as_str()) {
    Some("LATEST") => StartingPosition::Latest,
    Some("TRIM_HORIZON") => StartingPosition::TrimHorizon,
    _ => fallback,
  }
}

#[async_trait]
impl PolicyStore for AwsBackend {
  async fn get_policy(&self, name: &str) -> Result<ResourceDescriptor, BackendError> {
    // IAM keys policies by ARN; resolving a bare name means walking the list.
    let mut marker: Option<String> = None;
    loop {
      let mut request = self.iam.list_policies();
      if let Some(marker) = &marker {
        request = request.marker(marker);
      }
      let page = request.send().await.map_err(classify)?;
      for policy in page.policies() {
        if policy.policy_name() == Some(name) {
          let arn = policy.arn().unwrap_or_default().to_string();
          let mut record = ResourceRecord::new(arn);
          if let Some(version) = policy.default_version_id() {
            record = record.with_attr(attr::DEFAULT_VERSION, version);
          }
          return Ok(ResourceDescriptor::Present(record));
        }
      }
      if page.is_truncated() {
        marker = page.marker().map(str::to_string);
      } else {
        return Ok(ResourceDescriptor::Absent);
      }
    }
  }

  async fn policy_document(&self, arn: &str) -> Result<String, BackendError> {
    let policy = self
      .iam
      .get_policy()
      .policy_arn(arn)
      .send()
      .await
      .map_err(classify)?;
    let version_id = policy
      .policy()
      .and_then(|p| p.default_version_id())
      .unwrap_or("v1")
      .to_string();
    let version = self
      .iam
      .get_policy_version()
      .policy_arn(arn)
      .version_id(version_id)
      .send()
      .await
      .map_err(classify)?;
    let raw = version
      .policy_version()
      .and_then(|v| v.document())
      .unwrap_or_default();
    // IAM returns the document URL-encoded.
    Ok(percent_decode_str(raw).decode_utf8_lossy().into_owned())
  }

  async fn create_policy(&self, name: &str, document: &str) -> Result<ResourceRecord, BackendError> {
    let out = self
      .iam
      .create_policy()
      .policy_name(name)
      .policy_document(document)
      .send()
      .await
      .map_err(classify)?;
    let arn = out
      .policy()
      .and_then(|p| p.arn())
      .ok_or_else(|| BackendError::Api("create_policy returned no ARN".into()))?;
    Ok(ResourceRecord::new(arn).with_attr(attr::DEFAULT_VERSION, "v1"))
  }

  async fn create_policy_version(&self, arn: &str, document: &str) -> Result<(), BackendError> {
    let versions = self
      .iam
      .list_policy_versions()
      .policy_arn(arn)
      .send()
      .await
      .map_err(classify)?;
    if versions.versions().len() >= MAX_POLICY_VERSIONS {
      if let Some(oldest) = versions
        .versions()
        .iter()
        .rev()
        .find(|v| !v.is_default_version())
        .and_then(|v| v.version_id())
      {
        debug!(policy = %arn, version = %oldest, "pruning oldest policy version");
        self
          .iam
          .delete_policy_version()
          .policy_arn(arn)
          .version_id(oldest)
          .send()
          .await
          .map_err(classify)?;
      }
    }

    self
      .iam
      .create_policy_version()
      .policy_arn(arn)
      .policy_document(document)
      .set_as_default(true)
      .send()
      .await
      .map_err(classify)?;
    Ok(())
  }

  async fn delete_policy(&self, arn: &str) -> Result<(), BackendError> {
    // Non-default versions must go first.
    let versions = self
      .iam
      .list_policy_versions()
      .policy_arn(arn)
      .send()
      .await
      .map_err(classify)?;
    for version in versions.versions() {
      if !version.is_default_version() {
        if let Some(version_id) = version.version_id() {
          self
            .iam
            .delete_policy_version()
            .policy_arn(arn)
            .version_id(version_id)
            .send()
            .await
            .map_err(classify)?;
        }
      }
    }
    self
      .iam
      .delete_policy()
      .policy_arn(arn)
      .send()
      .await
      .map_err(classify)?;
    Ok(())
  }
}

#[async_trait]
impl RoleStore for AwsBackend {
  async fn get_role(&self, name: &str) -> Result<ResourceDescriptor, BackendError> {
    match self.iam.get_role().role_name(name).send().await {
      Ok(out) => {
        let arn = out
          .role()
          .map(|role| role.arn().to_string())
          .ok_or_else(|| BackendError::Api("get_role returned no role".into()))?;
        Ok(ResourceDescriptor::Present(ResourceRecord::new(arn)))
      }
      Err(err) => absent_on_not_found(classify(err)),
    }
  }

  async fn create_role(&self, name: &str, trust_document: &str) -> Result<ResourceRecord, BackendError> {
    let out = self
      .iam
      .create_role()
      .path("/nimbus/")
      .role_name(name)
      .assume_role_policy_document(trust_document)
      .send()
      .await
      .map_err(classify)?;
    let arn = out
      .role()
      .map(|role| role.arn().to_string())
      .ok_or_else(|| BackendError::Api("create_role returned no role".into()))?;
    Ok(ResourceRecord::new(arn))
  }

  async fn attached_policies(&self, role: &str) -> Result<Vec<String>, BackendError> {
    let out = self
      .iam
      .list_attached_role_policies()
      .role_name(role)
      .send()
      .await
      .map_err(classify)?;
    Ok(
      out
        .attached_policies()
        .iter()
        .filter_map(|attached| attached.policy_arn().map(str::to_string))
        .collect(),
    )
  }

  async fn attach_policy(&self, role: &str, policy_arn: &str) -> Result<(), BackendError> {
    self
      .iam
      .attach_role_policy()
      .role_name(role)
      .policy_arn(policy_arn)
      .send()
      .await
      .map_err(classify)?;
    Ok(())
  }

  async fn detach_policy(&self, role: &str, policy_arn: &str) -> Result<(), BackendError> {
    self
      .iam
      .detach_role_policy()
      .role_name(role)
      .policy_arn(policy_arn)
      .send()
      .await
      .map_err(classify)?;
    Ok(())
  }

  async fn delete_role(&self, name: &str) -> Result<(), BackendError> {
    self
      .iam
      .delete_role()
      .role_name(name)
      .send()
      .await
      .map_err(classify)?;
    Ok(())
  }
}

fn function_code(code: &CodeSource) -> FunctionCode {
  match code {
    CodeSource::Inline(bytes) => FunctionCode::builder().zip_file(Blob::new(bytes.clone())).build(),
    CodeSource::Staged { bucket, key } => FunctionCode::builder().s3_bucket(bucket).s3_key(key).build(),
  }
}

#[async_trait]
impl FunctionStore for AwsBackend {
  async fn get_function(&self, name: &str) -> Result<ResourceDescriptor, BackendError> {
    let out = match self.lambda.get_function().function_name(name).send().await {
      Ok(out) => out,
      Err(err) => return absent_on_not_found(classify(err)),
    };
    let config = out
      .configuration()
      .ok_or_else(|| BackendError::Api("get_function returned no configuration".into()))?;
    let mut record = ResourceRecord::new(config.function_arn().unwrap_or_default());
    if let Some(handler) = config.handler() {
      record = record.with_attr(attr::HANDLER, handler);
    }
    if let Some(runtime) = config.runtime() {
      record = record.with_attr(attr::RUNTIME, runtime.as_str());
    }
    if let Some(memory) = config.memory_size() {
      record = record.with_attr(attr::MEMORY_MB, memory.to_string());
    }
    if let Some(timeout) = config.timeout() {
      record = record.with_attr(attr::TIMEOUT_SECS, timeout.to_string());
    }
    record = record.with_attr(attr::DESCRIPTION, config.description().unwrap_or_default());
    if let Some(role) = config.role() {
      record = record.with_attr(attr::ROLE, role);
    }
    if let Some(sha) = config.code_sha256() {
      record = record.with_attr(attr::CODE_SHA256, sha);
    }
    if let Some(state) = config.state() {
      record = record.with_attr(attr::STATE, state.as_str());
    }
    Ok(ResourceDescriptor::Present(record))
  }

  async fn create_function(
    &self,
    spec: &FunctionSpec,
    role_arn: &str,
    code: &CodeSource,
  ) -> Result<ResourceRecord, BackendError> {
    let out = self
      .lambda
      .create_function()
      .function_name(&spec.name)
      .runtime(Runtime::from(spec.runtime.as_str()))
      .role(role_arn)
      .handler(&spec.handler)
      .description(&spec.description)
      .timeout(spec.timeout_secs)
      .memory_size(spec.memory_mb)
      .code(function_code(code))
      .send()
      .await
      .map_err(classify)?;
    let mut record = ResourceRecord::new(out.function_arn().unwrap_or_default());
    if let Some(sha) = out.code_sha256() {
      record = record.with_attr(attr::CODE_SHA256, sha);
    }
    Ok(record)
  }

  async fn update_configuration(&self, spec: &FunctionSpec, role_arn: &str) -> Result<(), BackendError> {
    self
      .lambda
      .update_function_configuration()
      .function_name(&spec.name)
      .runtime(Runtime::from(spec.runtime.as_str()))
      .role(role_arn)
      .handler(&spec.handler)
      .description(&spec.description)
      .timeout(spec.timeout_secs)
      .memory_size(spec.memory_mb)
      .send()
      .await
      .map_err(classify)?;
    Ok(())
  }

  async fn update_code(&self, name: &str, code: &CodeSource) -> Result<String, BackendError> {
    let mut request = self.lambda.update_function_code().function_name(name);
    request = match code {
      CodeSource::Inline(bytes) => request.zip_file(Blob::new(bytes.clone())),
      CodeSource::Staged { bucket, key } => request.s3_bucket(bucket).s3_key(key),
    };
    let out = request.send().await.map_err(classify)?;
    Ok(out.code_sha256().unwrap_or_default().to_string())
  }

  async fn add_permission(&self, name: &str, permission: &PermissionSpec) -> Result<(), BackendError> {
    self
      .lambda
      .add_permission()
      .function_name(name)
      .statement_id(&permission.statement_id)
      .action(&permission.action)
      .principal(&permission.principal)
      .set_source_arn(permission.source_arn.clone())
      .set_source_account(permission.source_account.clone())
      .send()
      .await
      .map_err(classify)?;
    Ok(())
  }

  async fn delete_function(&self, name: &str) -> Result<(), BackendError> {
    self
      .lambda
      .delete_function()
      .function_name(name)
      .send()
      .await
      .map_err(classify)?;
    Ok(())
  }
}

#[async_trait]
impl EventSourceStore for AwsBackend {
  async fn list_bindings(&self, function: &str) -> Result<Vec<EventSourceBinding>, BackendError> {
    let mut bindings = Vec::new();
    let mut marker: Option<String> = None;
    loop {
      let mut request = self.lambda.list_event_source_mappings().function_name(function);
      if let Some(marker) = &marker {
        request = request.marker(marker);
      }
      let page = match request.send().await {
        Ok(page) => page,
        // An unknown function has no bindings.
        Err(err) => match classify(err) {
          BackendError::NotFound(_) => return Ok(Vec::new()),
          other => return Err(other),
        },
      };
      for mapping in page.event_source_mappings() {
        bindings.push(EventSourceBinding {
          id: mapping.uuid().unwrap_or_default().to_string(),
          source_arn: mapping.event_source_arn().unwrap_or_default().to_string(),
          batch_size: mapping.batch_size().unwrap_or_default(),
          starting_position: position_from(mapping.starting_position(), StartingPosition::TrimHorizon),
        });
      }
      match page.next_marker() {
        Some(next) => marker = Some(next.to_string()),
        None => return Ok(bindings),
      }
    }
  }

  async fn create_binding(
    &self,
    function: &str,
    spec: &EventSourceSpec,
  ) -> Result<EventSourceBinding, BackendError> {
    let out = self
      .lambda
      .create_event_source_mapping()
      .function_name(function)
      .event_source_arn(&spec.source_arn)
      .batch_size(spec.batch_size)
      .starting_position(EventSourcePosition::from(spec.starting_position.as_str()))
      .send()
      .await
      .map_err(classify)?;
    Ok(EventSourceBinding {
      id: out.uuid().unwrap_or_default().to_string(),
      source_arn: out
        .event_source_arn()
        .unwrap_or(spec.source_arn.as_str())
        .to_string(),
      batch_size: out.batch_size().unwrap_or(spec.batch_size),
      starting_position: position_from(out.starting_position(), spec.starting_position),
    })
  }

  async fn delete_binding(&self, id: &str) -> Result<(), BackendError> {
    self
      .lambda
      .delete_event_source_mapping()
      .uuid(id)
      .send()
      .await
      .map_err(classify)?;
    Ok(())
  }
}

#[async_trait]
impl ObjectStore for AwsBackend {
  async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<Option<String>, BackendError> {
    let checksum = BASE64.encode(Sha256::digest(&body));
    let out = self
      .s3
      .put_object()
      .bucket(bucket)
      .key(key)
      .content_type("application/zip")
      .checksum_sha256(checksum)
      .body(ByteStream::from(body))
      .send()
      .await
      .map_err(classify)?;
    Ok(out.checksum_sha256().map(str::to_string))
  }
}

#[async_trait]
impl LogStore for AwsBackend {
  async fn fetch_records(&self, group: &str, start: DateTime<Utc>) -> Result<Vec<LogRecord>, BackendError> {
    let mut records = Vec::new();
    let mut token: Option<String> = None;
    loop {
      let mut request = self
        .logs
        .filter_log_events()
        .log_group_name(group)
        .start_time(start.timestamp_millis());
      if let Some(token) = &token {
        request = request.next_token(token);
      }
      let page = request.send().await.map_err(classify)?;
      for event in page.events() {
        let Some(millis) = event.timestamp() else {
          continue;
        };
        let Some(timestamp) = DateTime::from_timestamp_millis(millis) else {
          continue;
        };
        records.push(LogRecord {
          timestamp,
          message: event.message().unwrap_or_default().trim_end().to_string(),
        });
      }
      match page.next_token() {
        Some(next) => token = Some(next.to_string()),
        None => return Ok(records),
      }
    }
  }

  async fn delete_group(&self, group: &str) -> Result<(), BackendError> {
    self
      .logs
      .delete_log_group()
      .log_group_name(group)
      .send()
      .await
      .map_err(classify)?;
    Ok(())
  }
}
