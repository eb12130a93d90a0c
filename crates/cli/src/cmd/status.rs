//! Implementation of the `nimbus status` command.
//!
//! Read-only: probes the policy, role, function and bindings and prints one
//! snapshot. Absent resources are shown, not omitted.

use std::path::Path;

use anyhow::{Context, Result};

use nimbus_lib::backend::{attr, ResourceDescriptor};
use nimbus_lib::reconcile::PassContext;
use nimbus_lib::status::status;

use crate::cmd::{connect, load_state};
use crate::output::{print_json, print_stat, truncate_hash, OutputFormat};

pub fn cmd_status(config: &Path, output: OutputFormat) -> Result<()> {
  let desired = load_state(config)?;

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let snapshot = rt
    .block_on(async {
      let backend = connect(&desired).await;
      let ctx = PassContext::new(&desired, &backend);
      status(&ctx).await
    })
    .context("Status failed")?;

  if output.is_json() {
    return print_json(&snapshot);
  }

  println!("{}", desired.identity.project);
  print_stat("Policy", &describe(&snapshot.policy));
  print_stat("Role", &describe(&snapshot.role));
  print_stat("Function", &describe_function(&snapshot.function));
  if snapshot.event_sources.is_empty() {
    print_stat("Event sources", "none");
  } else {
    for binding in &snapshot.event_sources {
      print_stat(
        "Event source",
        &format!(
          "{} (batch {} from {})",
          binding.source_arn, binding.batch_size, binding.starting_position
        ),
      );
    }
  }

  Ok(())
}

fn describe(descriptor: &ResourceDescriptor) -> String {
  match descriptor.record() {
    None => "absent".to_string(),
    Some(record) => record.identity.clone(),
  }
}

fn describe_function(descriptor: &ResourceDescriptor) -> String {
  let Some(record) = descriptor.record() else {
    return "absent".to_string();
  };
  let runtime = record.attr(attr::RUNTIME).unwrap_or("?");
  let handler = record.attr(attr::HANDLER).unwrap_or("?");
  let memory = record.attr(attr::MEMORY_MB).unwrap_or("?");
  let timeout = record.attr(attr::TIMEOUT_SECS).unwrap_or("?");
  let sha = record.attr(attr::CODE_SHA256).unwrap_or_default();
  format!(
    "{} {} ({} MB, {} s, code {})",
    runtime,
    handler,
    memory,
    timeout,
    truncate_hash(sha)
  )
}
