mod deploy;
mod destroy;
mod init;
mod plan;
mod status;
mod tail;

pub use deploy::cmd_deploy;
pub use destroy::cmd_destroy;
pub use init::cmd_init;
pub use plan::cmd_plan;
pub use status::cmd_status;
pub use tail::cmd_tail;

use std::path::Path;

use anyhow::{Context, Result};

use nimbus_lib::backend::aws::AwsBackend;
use nimbus_lib::backend::Backend;
use nimbus_lib::config::DesiredState;

pub(crate) fn load_state(config: &Path) -> Result<DesiredState> {
  DesiredState::load(config).with_context(|| format!("failed to load {}", config.display()))
}

pub(crate) async fn connect(state: &DesiredState) -> Backend {
  AwsBackend::connect(state.identity.region.clone(), state.identity.profile.clone())
    .await
    .into_backend()
}
