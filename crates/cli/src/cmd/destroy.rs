//! Implementation of the `nimbus destroy` command.
//!
//! Tears down bindings, function, log group, and the default role and custom
//! policy if this config owns them. Referenced resources are left alone.
//! Idempotent: re-running after a partial failure finishes the teardown.

use std::path::Path;

use anyhow::{bail, Context, Result};

use nimbus_lib::reconcile::{destroy, PassContext};

use crate::cmd::{connect, load_state};
use crate::output::{print_stat, print_warning};

pub fn cmd_destroy(config: &Path) -> Result<()> {
  let desired = load_state(config)?;

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

      destroy(&ctx).await
    })
    .context("Destroy failed")?;

  println!();
  if report.deleted_count() == 0 && report.is_success() {
    println!("Nothing to destroy.");
    return Ok(());
  }

  println!("Destroy complete!");
  for binding in &report.bindings {
    print_stat(&format!("Binding {}", binding.source_arn), &binding.outcome.to_string());
  }
  print_stat("Function", &report.function.to_string());
  print_stat("Log group", &report.log_group.to_string());
  print_stat("Role", &report.role.to_string());
  print_stat("Policy", &report.policy.to_string());

  if !report.is_success() {
    println!();
    print_warning("some resources could not be deleted; re-run destroy to finish");
    bail!("teardown incomplete");
  }

  Ok(())
}
