//! Content-addressed packaging of the function code.
//!
//! A [`CodeArtifact`] is an opaque blob plus its SHA-256 digest. The digest is
//! the artifact's identity: the engine never compares filenames or timestamps,
//! only digests. Packaging is deterministic (sorted entries, fixed archive
//! timestamps) so an unchanged source tree produces an unchanged digest.

use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha2::{Digest, Sha256};
use thiserror::Error;
use walkdir::WalkDir;
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

/// Errors that can occur while packaging an artifact.
#[derive(Debug, Error)]
pub enum PackageError {
  #[error("source path not found: {0}")]
  NotFound(PathBuf),

  #[error("failed to read {path}: {message}")]
  Read { path: PathBuf, message: String },

  #[error("failed to build archive: {0}")]
  Archive(#[from] zip::result::ZipError),
}

/// A packaged code artifact: bytes plus content digest.
///
/// Never mutated after creation; a change in code is a new artifact with a
/// new digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeArtifact {
  bytes: Vec<u8>,
  digest: String,
}

impl CodeArtifact {
  /// Wrap raw archive bytes, computing their digest.
  pub fn from_bytes(bytes: Vec<u8>) -> Self {
    let digest = hex::encode(Sha256::digest(&bytes));
    CodeArtifact { bytes, digest }
  }

  /// Wrap a prebuilt archive file.
  pub fn from_file(path: &Path) -> Result<Self, PackageError> {
    let bytes = fs::read(path).map_err(|e| PackageError::Read {
      path: path.to_path_buf(),
      message: e.to_string(),
    })?;
    Ok(CodeArtifact::from_bytes(bytes))
  }

  /// Package a source directory into a deflate archive.
  ///
  /// Entries are archived relative to `path` with fixed timestamps, so the
  /// digest depends only on file paths and contents.
  pub fn from_dir(path: &Path) -> Result<Self, PackageError> {
    let options = SimpleFileOptions::default()
      .compression_method(CompressionMethod::Deflated)
      .last_modified_time(zip::DateTime::default())
      .unix_permissions(0o644);

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for entry in WalkDir::new(path).sort_by_file_name() {
      let entry = entry.map_err(|e| PackageError::Read {
        path: path.to_path_buf(),
        message: e.to_string(),
      })?;
      let rel = entry
        .path()
        .strip_prefix(path)
        .unwrap_or(entry.path())
        .to_string_lossy()
        .replace('\\', "/");
      if rel.is_empty() {
        continue;
      }
      if entry.file_type().is_dir() {
        writer.add_directory(rel, options)?;
      } else if entry.file_type().is_file() {
        writer.start_file(rel, options)?;
        let mut file = fs::File::open(entry.path()).map_err(|e| PackageError::Read {
          path: entry.path().to_path_buf(),
          message: e.to_string(),
        })?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).map_err(|e| PackageError::Read {
          path: entry.path().to_path_buf(),
          message: e.to_string(),
        })?;
        writer.write_all(&contents).map_err(|e| PackageError::Read {
          path: entry.path().to_path_buf(),
          message: e.to_string(),
        })?;
      }
    }
    let cursor = writer.finish()?;
    Ok(CodeArtifact::from_bytes(cursor.into_inner()))
  }

  /// Package a source path: a directory is archived, anything else is taken
  /// as a prebuilt archive.
  pub fn from_source(path: &Path) -> Result<Self, PackageError> {
    if !path.exists() {
      return Err(PackageError::NotFound(path.to_path_buf()));
    }
    if path.is_dir() {
      CodeArtifact::from_dir(path)
    } else {
      CodeArtifact::from_file(path)
    }
  }

  pub fn bytes(&self) -> &[u8] {
    &self.bytes
  }

  pub fn size(&self) -> u64 {
    self.bytes.len() as u64
  }

  /// Hex-encoded SHA-256 digest; the artifact's identity.
  pub fn digest_hex(&self) -> &str {
    &self.digest
  }

  /// Base64-encoded SHA-256 digest, the form the function backend reports.
  pub fn digest_base64(&self) -> String {
    let raw = hex::decode(&self.digest).unwrap_or_default();
    BASE64.encode(raw)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  #[test]
  fn digest_is_stable_for_bytes() {
    let a = CodeArtifact::from_bytes(b"payload".to_vec());
    let b = CodeArtifact::from_bytes(b"payload".to_vec());
    assert_eq!(a.digest_hex(), b.digest_hex());
    assert_eq!(a.digest_hex().len(), 64);
    assert_eq!(a.digest_base64().len(), 44);
  }

  #[test]
  fn digest_changes_with_one_byte() {
    let a = CodeArtifact::from_bytes(b"payload".to_vec());
    let b = CodeArtifact::from_bytes(b"paylosd".to_vec());
    assert_ne!(a.digest_hex(), b.digest_hex());
  }

  #[test]
  fn dir_packaging_is_deterministic() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("app.py"), "def handler(event, context): pass").unwrap();
    fs::create_dir(temp.path().join("vendor")).unwrap();
    fs::write(temp.path().join("vendor/util.py"), "x = 1").unwrap();

    let a = CodeArtifact::from_dir(temp.path()).unwrap();
    let b = CodeArtifact::from_dir(temp.path()).unwrap();
    assert_eq!(a.digest_hex(), b.digest_hex());
    assert!(a.size() > 0);
  }

  #[test]
  fn dir_packaging_tracks_content() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("app.py"), "original").unwrap();
    let a = CodeArtifact::from_dir(temp.path()).unwrap();

    fs::write(temp.path().join("app.py"), "modified").unwrap();
    let b = CodeArtifact::from_dir(temp.path()).unwrap();
    assert_ne!(a.digest_hex(), b.digest_hex());
  }

  #[test]
  fn from_source_dispatches_on_kind() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("app.py"), "pass").unwrap();

    let from_dir = CodeArtifact::from_source(temp.path()).unwrap();
    assert!(!from_dir.bytes().is_empty());

    let archive = temp.path().join("prebuilt.zip");
    fs::write(&archive, from_dir.bytes()).unwrap();
    let from_file = CodeArtifact::from_source(&archive).unwrap();
    assert_eq!(from_file.digest_hex(), from_dir.digest_hex());

    let missing = CodeArtifact::from_source(&temp.path().join("nope"));
    assert!(matches!(missing, Err(PackageError::NotFound(_))));
  }
}
