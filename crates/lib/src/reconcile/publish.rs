//! Artifact publishing.
//!
//! With no staging location configured the artifact travels inline with the
//! function create/update call. With staging configured it is uploaded first
//! and the function reconciler is pointed at the staged object; the
//! stage-only flag stops the pass after the upload (build/publish-without-
//! deploy workflows).

use serde::Serialize;
use tracing::info;

use crate::artifact::CodeArtifact;
use crate::backend::CodeSource;
use crate::error::{Phase, ReconcileError};
use crate::reconcile::PassContext;
use crate::util::retry::with_retry;

/// How the artifact was published this pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Published {
  /// Travels inline with the function call.
  Direct,
  /// Uploaded to staging; the function pulls from there.
  Staged,
  /// Uploaded to staging and the pass stops there.
  StagedOnly,
}

/// Publish the artifact. Returns the code source for the function reconciler,
/// or `None` when the stage-only flag terminated the pass after upload.
pub async fn publish(
  ctx: &PassContext<'_>,
  artifact: &CodeArtifact,
) -> Result<(Option<CodeSource>, Published), ReconcileError> {
  let Some(staging) = &ctx.desired.publishing else {
    return Ok((
      Some(CodeSource::Inline(artifact.bytes().to_vec())),
      Published::Direct,
    ));
  };

  info!(
    bucket = %staging.bucket,
    key = %staging.key,
    size = artifact.size(),
    "uploading artifact to staging"
  );
  let reported = with_retry(&ctx.retry, "put_object", || {
    ctx
      .backend
      .objects
      .put_object(&staging.bucket, &staging.key, artifact.bytes().to_vec())
  })
  .await
  .map_err(|e| ReconcileError::from_backend(Phase::Publish, e))?;

  // Only verifiable when the backend echoes a content digest.
  if let Some(reported) = reported {
    let expected = artifact.digest_base64();
    if reported != expected {
      return Err(ReconcileError::CorruptUpload {
        expected,
        actual: reported,
      });
    }
  }

  if staging.stage_only {
    Ok((None, Published::StagedOnly))
  } else {
    Ok((
      Some(CodeSource::Staged {
        bucket: staging.bucket.clone(),
        key: staging.key.clone(),
      }),
      Published::Staged,
    ))
  }
}
