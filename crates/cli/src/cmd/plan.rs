//! Implementation of the `nimbus plan` command.
//!
//! Packages the source (the code digest is part of the decision), probes
//! every resource and prints what a deploy would do. Nothing is mutated.

use std::path::Path;

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Stream};

use nimbus_lib::artifact::CodeArtifact;
use nimbus_lib::reconcile::{plan, PassContext, PlanEntry, PlannedChange};

use crate::cmd::{connect, load_state};
use crate::output::{print_info, symbols};

pub fn cmd_plan(config: &Path) -> Result<()> {
  let desired = load_state(config)?;

  let artifact =
    CodeArtifact::from_source(&desired.function.source).context("failed to package code artifact")?;

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let report = rt
    .block_on(async {
      let backend = connect(&desired).await;
      let ctx = PassContext::new(&desired, &backend);
      plan(&ctx, &artifact).await
    })
    .context("Plan failed")?;

  if !report.has_changes() {
    print_info("No changes. Deployment is converged.");
    return Ok(());
  }

  println!();
  for entry in &report.entries {
    print_entry(entry);
  }
  println!();
  print_info(&format!("Would apply {} change(s)", report.change_count()));

  Ok(())
}

fn print_entry(entry: &PlanEntry) {
  let symbol = match entry.change {
    PlannedChange::Create => format!("{}", symbols::ADD.if_supports_color(Stream::Stdout, |s| s.green())),
    PlannedChange::Replace => format!("{}", symbols::MODIFY.if_supports_color(Stream::Stdout, |s| s.yellow())),
    PlannedChange::Delete => format!("{}", symbols::REMOVE.if_supports_color(Stream::Stdout, |s| s.red())),
    PlannedChange::NoOp => " ".to_string(),
  };
  match &entry.detail {
    Some(detail) => println!(
      "  {} {} {}",
      symbol,
      entry.resource,
      format!("({})", detail).if_supports_color(Stream::Stdout, |s| s.dimmed())
    ),
    None => println!("  {} {}", symbol, entry.resource),
  }
}
