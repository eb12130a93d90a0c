//! Implementation of the `nimbus tail` command.
//!
//! Fetches one bounded window of execution-log records, oldest first. Each
//! invocation re-fetches; there is no cursor to resume.

use std::path::Path;

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Stream};

use nimbus_lib::consts::LOG_WINDOW_MINUTES;
use nimbus_lib::reconcile::PassContext;
use nimbus_lib::status::tail_logs;

use crate::cmd::{connect, load_state};
use crate::output::print_info;

pub fn cmd_tail(config: &Path) -> Result<()> {
  let desired = load_state(config)?;

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let records = rt
    .block_on(async {
      let backend = connect(&desired).await;
      let ctx = PassContext::new(&desired, &backend);
      tail_logs(&ctx).await
    })
    .context("Tail failed")?;

  if records.is_empty() {
    print_info(&format!(
      "no log records for {} in the last {} minutes",
      desired.function.name, LOG_WINDOW_MINUTES
    ));
    return Ok(());
  }

  for record in records {
    println!(
      "{} {}",
      record
        .timestamp
        .format("%Y-%m-%d %H:%M:%S%.3f")
        .if_supports_color(Stream::Stdout, |s| s.dimmed()),
      record.message
    );
  }

  Ok(())
}
