//! Desired-state model and YAML loader.
//!
//! The desired state is a single YAML document describing one function and
//! its direct dependents. Loading resolves defaults, reads the custom policy
//! document from disk, and validates the result; the reconcilers only ever
//! see the resolved [`DesiredState`], never the raw file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::{DEFAULT_BATCH_SIZE, DEFAULT_MEMORY_MB, DEFAULT_TIMEOUT_SECS, LOG_GROUP_PREFIX};

/// Errors that can occur while loading a config file.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("config file not found: {0}")]
  NotFound(PathBuf),

  #[error("failed to read {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse config: {0}")]
  Parse(#[from] serde_yaml::Error),

  #[error("invalid config: {0}")]
  Invalid(String),
}

/// Project identity and backend selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
  pub project: String,
  pub region: Option<String>,
  pub profile: Option<String>,
}

/// Desired policy: a managed policy reused by name, or a custom one owned by
/// this project with an inline document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicySpec {
  Managed { name: String },
  Custom { name: String, document: String },
}

impl PolicySpec {
  pub fn name(&self) -> &str {
    match self {
      PolicySpec::Managed { name } | PolicySpec::Custom { name, .. } => name,
    }
  }
}

/// Desired role: an existing role referenced by name, or a default execution
/// role created (and owned) by this project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleSpec {
  Existing { name: String },
  Default,
}

/// Where a stream-backed binding starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StartingPosition {
  #[default]
  TrimHorizon,
  Latest,
}

impl StartingPosition {
  pub fn as_str(&self) -> &'static str {
    match self {
      StartingPosition::TrimHorizon => "TRIM_HORIZON",
      StartingPosition::Latest => "LATEST",
    }
  }
}

impl std::fmt::Display for StartingPosition {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// One desired event-source binding.
///
/// Equality covers the source identifier and the full configuration; a
/// binding whose configuration changed is treated as a different binding
/// (removed and re-added), never updated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventSourceSpec {
  pub source_arn: String,
  pub batch_size: i32,
  pub starting_position: StartingPosition,
}

/// One invocation permission statement applied after function creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionSpec {
  pub statement_id: String,
  pub action: String,
  pub principal: String,
  pub source_arn: Option<String>,
  pub source_account: Option<String>,
}

/// Desired function configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSpec {
  pub name: String,
  pub description: String,
  pub handler: String,
  pub runtime: String,
  pub memory_mb: i32,
  pub timeout_secs: i32,
  /// Source directory or prebuilt archive, resolved relative to the config file.
  pub source: PathBuf,
  pub permissions: Vec<PermissionSpec>,
  pub event_sources: Vec<EventSourceSpec>,
}

/// Optional object-storage staging location for the packaged artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingSpec {
  pub bucket: String,
  pub key: String,
  /// Stop after the upload; leave the function untouched.
  pub stage_only: bool,
}

/// The full desired state for one reconciliation pass. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredState {
  pub identity: Identity,
  pub policy: Option<PolicySpec>,
  pub role: RoleSpec,
  pub function: FunctionSpec,
  pub publishing: Option<StagingSpec>,
}

impl DesiredState {
  /// Load and validate a config file.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    if !path.exists() {
      return Err(ConfigError::NotFound(path.to_path_buf()));
    }
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    let raw: RawConfig = serde_yaml::from_str(&text)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    resolve(raw, base)
  }

  /// Name of the execution role this state resolves to.
  pub fn role_name(&self) -> &str {
    match &self.role {
      RoleSpec::Existing { name } => name,
      RoleSpec::Default => &self.identity.project,
    }
  }

  /// Log group the execution environment writes this function's logs to.
  pub fn log_group(&self) -> String {
    format!("{}{}", LOG_GROUP_PREFIX, self.function.name)
  }
}

// Raw serde mirror of the on-disk document. Kept private so validation and
// defaulting cannot be bypassed.

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
  name: String,
  region: Option<String>,
  profile: Option<String>,
  #[serde(default)]
  iam: RawIam,
  function: RawFunction,
  publishing: Option<RawPublishing>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawIam {
  policy: Option<RawPolicy>,
  role: Option<RawRole>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPolicy {
  name: String,
  /// Path to a JSON policy document, relative to the config file. Absence
  /// marks the policy as a managed reference.
  document: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRole {
  name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFunction {
  name: Option<String>,
  description: Option<String>,
  handler: String,
  runtime: String,
  memory_mb: Option<i32>,
  timeout_secs: Option<i32>,
  source: Option<PathBuf>,
  #[serde(default)]
  permissions: Vec<RawPermission>,
  #[serde(default)]
  event_sources: Vec<RawEventSource>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPermission {
  statement_id: String,
  action: String,
  principal: String,
  source_arn: Option<String>,
  source_account: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEventSource {
  source_arn: String,
  batch_size: Option<i32>,
  starting_position: Option<StartingPosition>,
}

fn resolve(raw: RawConfig, base: &Path) -> Result<DesiredState, ConfigError> {
  if raw.name.trim().is_empty() {
    return Err(ConfigError::Invalid("project name must not be empty".into()));
  }
  if raw.function.handler.trim().is_empty() {
    return Err(ConfigError::Invalid("function handler is required".into()));
  }
  if raw.function.runtime.trim().is_empty() {
    return Err(ConfigError::Invalid("function runtime is required".into()));
  }

  let memory_mb = raw.function.memory_mb.unwrap_or(DEFAULT_MEMORY_MB);
  if memory_mb <= 0 {
    return Err(ConfigError::Invalid(format!(
      "function memory_mb must be positive, got {}",
      memory_mb
    )));
  }
  let timeout_secs = raw.function.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
  if timeout_secs <= 0 {
    return Err(ConfigError::Invalid(format!(
      "function timeout_secs must be positive, got {}",
      timeout_secs
    )));
  }

  let policy = match raw.iam.policy {
    None => None,
    Some(p) => {
      if p.name.trim().is_empty() {
        return Err(ConfigError::Invalid("policy name must not be empty".into()));
      }
      match p.document {
        None => Some(PolicySpec::Managed { name: p.name }),
        Some(doc_path) => {
          let doc_path = base.join(doc_path);
          let document = fs::read_to_string(&doc_path).map_err(|source| ConfigError::Io {
            path: doc_path,
            source,
          })?;
          serde_json::from_str::<serde_json::Value>(&document).map_err(|e| {
            ConfigError::Invalid(format!("policy document is not valid JSON: {}", e))
          })?;
          Some(PolicySpec::Custom {
            name: p.name,
            document,
          })
        }
      }
    }
  };

  let role = match raw.iam.role.and_then(|r| r.name) {
    Some(name) => RoleSpec::Existing { name },
    None => RoleSpec::Default,
  };

  let function_name = raw.function.name.unwrap_or_else(|| raw.name.clone());

  let mut event_sources = Vec::with_capacity(raw.function.event_sources.len());
  for source in raw.function.event_sources {
    if event_sources
      .iter()
      .any(|existing: &EventSourceSpec| existing.source_arn == source.source_arn)
    {
      return Err(ConfigError::Invalid(format!(
        "duplicate event source: {}",
        source.source_arn
      )));
    }
    event_sources.push(EventSourceSpec {
      source_arn: source.source_arn,
      batch_size: source.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
      starting_position: source.starting_position.unwrap_or_default(),
    });
  }

  let permissions = raw
    .function
    .permissions
    .into_iter()
    .map(|p| PermissionSpec {
      statement_id: p.statement_id,
      action: p.action,
      principal: p.principal,
      source_arn: p.source_arn,
      source_account: p.source_account,
    })
    .collect();

  let publishing = raw.publishing.map(|p| StagingSpec {
    key: p.key.unwrap_or_else(|| format!("{}.zip", function_name)),
    bucket: p.bucket,
    stage_only: p.stage_only,
  });

  Ok(DesiredState {
    identity: Identity {
      project: raw.name,
      region: raw.region,
      profile: raw.profile,
    },
    policy,
    role,
    function: FunctionSpec {
      name: function_name,
      description: raw.function.description.unwrap_or_default(),
      handler: raw.function.handler,
      runtime: raw.function.runtime,
      memory_mb,
      timeout_secs,
      source: base.join(raw.function.source.unwrap_or_else(|| PathBuf::from("src"))),
      permissions,
      event_sources,
    },
    publishing,
  })
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPublishing {
  bucket: String,
  key: Option<String>,
  #[serde(default)]
  stage_only: bool,
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use tempfile::tempdir;

  fn write_config(dir: &Path, text: &str) -> PathBuf {
    let path = dir.join("nimbus.yml");
    fs::write(&path, text).unwrap();
    path
  }

  const MINIMAL: &str = r#"
name: orders
function:
  handler: app.handler
  runtime: python3.12
"#;

  #[test]
  fn minimal_config_resolves_defaults() {
    let temp = tempdir().unwrap();
    let path = write_config(temp.path(), MINIMAL);

    let state = DesiredState::load(&path).unwrap();
    assert_eq!(state.identity.project, "orders");
    assert_eq!(state.function.name, "orders");
    assert_eq!(state.function.memory_mb, DEFAULT_MEMORY_MB);
    assert_eq!(state.function.timeout_secs, DEFAULT_TIMEOUT_SECS);
    assert_eq!(state.function.source, temp.path().join("src"));
    assert_eq!(state.role, RoleSpec::Default);
    assert_eq!(state.role_name(), "orders");
    assert!(state.policy.is_none());
    assert!(state.publishing.is_none());
    assert_eq!(state.log_group(), "/aws/lambda/orders");
  }

  #[test]
  fn missing_file_is_not_found() {
    let result = DesiredState::load(Path::new("/nonexistent/nimbus.yml"));
    assert!(matches!(result, Err(ConfigError::NotFound(_))));
  }

  #[test]
  fn handler_is_required() {
    let temp = tempdir().unwrap();
    let path = write_config(
      temp.path(),
      r#"
name: orders
function:
  handler: ""
  runtime: python3.12
"#,
    );
    let err = DesiredState::load(&path).unwrap_err();
    assert!(err.to_string().contains("handler"));
  }

  #[test]
  fn managed_policy_reference() {
    let temp = tempdir().unwrap();
    let path = write_config(
      temp.path(),
      r#"
name: orders
iam:
  policy:
    name: AWSLambdaKinesisExecutionRole
function:
  handler: app.handler
  runtime: python3.12
"#,
    );
    let state = DesiredState::load(&path).unwrap();
    assert_eq!(
      state.policy,
      Some(PolicySpec::Managed {
        name: "AWSLambdaKinesisExecutionRole".into()
      })
    );
  }

  #[test]
  fn custom_policy_reads_document_relative_to_config() {
    let temp = tempdir().unwrap();
    fs::write(
      temp.path().join("policy.json"),
      r#"{"Version": "2012-10-17", "Statement": []}"#,
    )
    .unwrap();
    let path = write_config(
      temp.path(),
      r#"
name: orders
iam:
  policy:
    name: orders-access
    document: policy.json
function:
  handler: app.handler
  runtime: python3.12
"#,
    );
    let state = DesiredState::load(&path).unwrap();
    match state.policy {
      Some(PolicySpec::Custom { name, document }) => {
        assert_eq!(name, "orders-access");
        assert!(document.contains("2012-10-17"));
      }
      other => panic!("expected custom policy, got {:?}", other),
    }
  }

  #[test]
  fn invalid_policy_document_rejected() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("policy.json"), "not json").unwrap();
    let path = write_config(
      temp.path(),
      r#"
name: orders
iam:
  policy:
    name: orders-access
    document: policy.json
function:
  handler: app.handler
  runtime: python3.12
"#,
    );
    let err = DesiredState::load(&path).unwrap_err();
    assert!(err.to_string().contains("not valid JSON"));
  }

  #[test]
  fn event_sources_resolve_and_reject_duplicates() {
    let temp = tempdir().unwrap();
    let path = write_config(
      temp.path(),
      r#"
name: orders
function:
  handler: app.handler
  runtime: python3.12
  event_sources:
    - source_arn: arn:aws:kinesis:us-east-1:000000000000:stream/orders
      batch_size: 50
      starting_position: LATEST
    - source_arn: arn:aws:dynamodb:us-east-1:000000000000:table/orders/stream/1
"#,
    );
    let state = DesiredState::load(&path).unwrap();
    assert_eq!(state.function.event_sources.len(), 2);
    assert_eq!(state.function.event_sources[0].batch_size, 50);
    assert_eq!(
      state.function.event_sources[0].starting_position,
      StartingPosition::Latest
    );
    assert_eq!(state.function.event_sources[1].batch_size, DEFAULT_BATCH_SIZE);
    assert_eq!(
      state.function.event_sources[1].starting_position,
      StartingPosition::TrimHorizon
    );

    let dup = write_config(
      temp.path(),
      r#"
name: orders
function:
  handler: app.handler
  runtime: python3.12
  event_sources:
    - source_arn: arn:aws:kinesis:us-east-1:000000000000:stream/orders
    - source_arn: arn:aws:kinesis:us-east-1:000000000000:stream/orders
"#,
    );
    let err = DesiredState::load(&dup).unwrap_err();
    assert!(err.to_string().contains("duplicate event source"));
  }

  #[test]
  fn publishing_key_defaults_to_function_archive() {
    let temp = tempdir().unwrap();
    let path = write_config(
      temp.path(),
      r#"
name: orders
function:
  handler: app.handler
  runtime: python3.12
publishing:
  bucket: artifacts
"#,
    );
    let state = DesiredState::load(&path).unwrap();
    let staging = state.publishing.unwrap();
    assert_eq!(staging.bucket, "artifacts");
    assert_eq!(staging.key, "orders.zip");
    assert!(!staging.stage_only);
  }

  #[test]
  fn explicit_role_reference() {
    let temp = tempdir().unwrap();
    let path = write_config(
      temp.path(),
      r#"
name: orders
iam:
  role:
    name: shared-exec
function:
  handler: app.handler
  runtime: python3.12
"#,
    );
    let state = DesiredState::load(&path).unwrap();
    assert_eq!(
      state.role,
      RoleSpec::Existing {
        name: "shared-exec".into()
      }
    );
    assert_eq!(state.role_name(), "shared-exec");
  }
}
