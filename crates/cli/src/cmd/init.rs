//! Implementation of the `nimbus init` command.
//!
//! Writes a commented starter config and a source stub. Refuses to overwrite
//! anything that already exists.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};

use nimbus_lib::consts::DEFAULT_CONFIG_FILE;

use crate::cmd::load_state;
use crate::output::print_success;

const CONFIG_TEMPLATE: &str = r#"name: {name}

# Uncomment to pin the backend region/profile instead of using the ambient
# environment.
# region: us-east-1
# profile: default

iam:
  # A policy to attach to the execution role. Give it a `document` path to
  # manage a custom policy, or just a `name` to reuse a managed one.
  # policy:
  #   name: {name}-access
  #   document: policy.json

  # Reference an existing role by name; omit to create a default execution
  # role named after the project.
  # role:
  #   name: shared-exec

function:
  handler: app.handler
  runtime: python3.12
  memory_mb: 128
  timeout_secs: 3
  source: src

  # event_sources:
  #   - source_arn: arn:aws:kinesis:us-east-1:123456789012:stream/{name}
  #     batch_size: 100
  #     starting_position: TRIM_HORIZON

# Stage the packaged artifact in object storage instead of uploading inline.
# publishing:
#   bucket: my-artifact-bucket
#   key: {name}.zip
"#;

const HANDLER_TEMPLATE: &str = r#"def handler(event, context):
    return {"status": "ok"}
"#;

pub fn cmd_init(dir: &Path) -> Result<()> {
  let config_path = dir.join(DEFAULT_CONFIG_FILE);
  if config_path.exists() {
    bail!("refusing to overwrite existing {}", config_path.display());
  }

  let name = dir
    .canonicalize()
    .ok()
    .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
    .unwrap_or_else(|| "my-function".to_string());

  fs::create_dir_all(dir.join("src"))
    .with_context(|| format!("failed to create {}", dir.join("src").display()))?;
  fs::write(&config_path, CONFIG_TEMPLATE.replace("{name}", &name))
    .with_context(|| format!("failed to write {}", config_path.display()))?;

  let handler_path = dir.join("src").join("app.py");
  if !handler_path.exists() {
    fs::write(&handler_path, HANDLER_TEMPLATE)
      .with_context(|| format!("failed to write {}", handler_path.display()))?;
  }

  // The template must load cleanly with the defaults it ships.
  load_state(&config_path)?;

  print_success(&format!("scaffolded {} in {}", name, dir.display()));
  println!();
  println!("Next steps:");
  println!("  1. Edit {} to describe the function", config_path.display());
  println!("  2. Run 'nimbus plan' to preview the deployment");
  println!("  3. Run 'nimbus deploy'");

  Ok(())
}
