//! Implementation of the `nimbus deploy` command.
//!
//! Packages the configured source, then runs one full reconciliation pass:
//! policy, role, artifact, function, event-source bindings. Ctrl-C is honored
//! between resource operations; an in-flight operation always completes.

use std::path::Path;
use std::time::Instant;

use anyhow::{bail, Context, Result};

use nimbus_lib::artifact::CodeArtifact;
use nimbus_lib::reconcile::{converge, PassContext};

use crate::cmd::{connect, load_state};
use crate::output::{format_bytes, format_duration, print_info, print_stat, print_warning, truncate_hash};

pub fn cmd_deploy(config: &Path, stage_only: bool) -> Result<()> {
  let mut desired = load_state(config)?;
  if stage_only {
    match desired.publishing.as_mut() {
      Some(staging) => staging.stage_only = true,
      None => bail!("--stage-only requires a publishing section in the config"),
    }
  }

  let started = Instant::now();
  print_info(&format!("packaging {}", desired.function.source.display()));
  let artifact =
    CodeArtifact::from_source(&desired.function.source).context("failed to package code artifact")?;
  print_stat(
    "Artifact",
    &format!(
      "{} (sha256 {})",
      format_bytes(artifact.size()),
      truncate_hash(artifact.digest_hex())
    ),
  );

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let report = rt
    .block_on(async {
      let backend = connect(&desired).await;
      let ctx = PassContext::new(&desired, &backend);

      let cancel = ctx.cancel.clone();
      tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
          cancel.cancel();
        }
      });

      converge(&ctx, &artifact).await
    })
    .context("Deploy failed")?;

  println!();
  println!("Deploy complete!");
  print_stat("Policy", &report.policy.to_string());
  print_stat("Role", &report.role.to_string());
  match &report.function {
    Some(outcome) => print_stat("Function", &outcome.to_string()),
    None => print_stat("Function", "skipped (stage-only)"),
  }
  for binding in &report.bindings {
    print_stat(&format!("Binding {}", binding.source_arn), &binding.outcome.to_string());
  }
  print_stat("Elapsed", &format_duration(started.elapsed()));

  if !report.is_success() {
    println!();
    for failed in report.failed_bindings() {
      print_warning(&format!("binding {}: {}", failed.source_arn, failed.outcome));
    }
    bail!(
      "{} event-source binding(s) failed; re-run deploy to converge",
      report.failed_bindings().len()
    );
  }

  Ok(())
}
