//! Upstream source preparation.
//!
//! Ensures a local checkout of the upstream project exists on the pinned
//! release branch, discards any local drift, and applies the local patch
//! set. The checkout moves through three states:
//!
//! - `Absent`: no directory — clone the pinned branch
//! - `WrongBranch`: directory on another branch — delete, then clone
//! - `Ready`: directory already on the pinned branch — proceed
//!
//! Whatever the starting state, the checkout is hard-reset and cleaned
//! before patches are applied, so a re-run always starts from pristine
//! upstream sources.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info};

use crate::layout::Layout;
use crate::options::BuildOptions;

/// Upstream repository cloned into the working root.
pub const UPSTREAM_URL: &str = "https://github.com/microsoft/onnxruntime.git";

/// Errors raised while preparing the source checkout. All are fatal.
#[derive(Debug, Error)]
pub enum SourceError {
  #[error("failed to spawn git: {0}")]
  Spawn(#[source] std::io::Error),

  #[error("git {args} failed with exit code {code:?}: {stderr}")]
  GitFailed {
    args: String,
    code: Option<i32>,
    stderr: String,
  },

  #[error("failed to apply patch '{patch}': {stderr}")]
  PatchFailed { patch: PathBuf, stderr: String },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// Observed state of the checkout directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutState {
  Absent,
  WrongBranch(String),
  Ready,
}

/// Classify a checkout from its observed current branch.
pub fn classify(current_branch: Option<&str>, wanted_branch: &str) -> CheckoutState {
  match current_branch {
    None => CheckoutState::Absent,
    Some(branch) if branch == wanted_branch => CheckoutState::Ready,
    Some(branch) => CheckoutState::WrongBranch(branch.to_string()),
  }
}

/// Ensure the checkout is on `rel-<version>`, pristine, and patched.
pub async fn prepare(layout: &Layout, options: &BuildOptions) -> Result<(), SourceError> {
  let branch = options.release_branch();
  let source_dir = layout.source_dir();

  let observed = if source_dir.is_dir() {
    Some(current_branch(&source_dir).await?)
  } else {
    None
  };

  match classify(observed.as_deref(), &branch) {
    CheckoutState::Ready => {
      debug!(branch = %branch, "checkout already on release branch");
    }
    CheckoutState::WrongBranch(found) => {
      info!(found = %found, wanted = %branch, "checkout on wrong branch, recloning");
      fs::remove_dir_all(&source_dir).await?;
      clone_repo(&source_dir, &branch).await?;
    }
    CheckoutState::Absent => {
      clone_repo(&source_dir, &branch).await?;
    }
  }

  // Discard local modifications, whatever their origin.
  git(&["reset", "--hard", "HEAD"], &source_dir).await?;
  git(&["clean", "-dfx"], &source_dir).await?;

  apply_patches(layout, &source_dir).await
}

async fn clone_repo(dest: &Path, branch: &str) -> Result<(), SourceError> {
  info!(url = UPSTREAM_URL, branch = %branch, "cloning upstream");

  let dest_arg = dest.to_string_lossy();
  let args = [
    "clone",
    "--branch",
    branch,
    "--depth",
    "1",
    "--single-branch",
    "--recursive",
    UPSTREAM_URL,
    dest_arg.as_ref(),
  ];

  let output = Command::new("git")
    .args(args)
    .output()
    .await
    .map_err(SourceError::Spawn)?;

  if !output.status.success() {
    return Err(SourceError::GitFailed {
      args: args.join(" "),
      code: output.status.code(),
      stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    });
  }
  Ok(())
}

/// Run git in the checkout and return trimmed stdout.
async fn git(args: &[&str], cwd: &Path) -> Result<String, SourceError> {
  debug!(args = %args.join(" "), "running git");

  let output = Command::new("git")
    .args(args)
    .current_dir(cwd)
    .output()
    .await
    .map_err(SourceError::Spawn)?;

  if !output.status.success() {
    return Err(SourceError::GitFailed {
      args: args.join(" "),
      code: output.status.code(),
      stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    });
  }

  Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

async fn current_branch(source_dir: &Path) -> Result<String, SourceError> {
  git(&["rev-parse", "--abbrev-ref", "HEAD"], source_dir).await
}

/// Apply every patch under the patch directory, in sorted filename order.
///
/// Whitespace differences are ignored so patches survive upstream
/// line-ending drift. The patch set is mandatory and ordered; the first
/// failure aborts the run.
async fn apply_patches(layout: &Layout, source_dir: &Path) -> Result<(), SourceError> {
  let patches = sorted_patches(&layout.patch_dir())?;
  if patches.is_empty() {
    debug!("no patches to apply");
    return Ok(());
  }

  for patch in patches {
    info!(patch = %patch.display(), "applying patch");

    let patch_arg = patch.to_string_lossy();
    let output = Command::new("git")
      .args(["apply", "--ignore-whitespace", patch_arg.as_ref()])
      .current_dir(source_dir)
      .output()
      .await
      .map_err(SourceError::Spawn)?;

    if !output.status.success() {
      return Err(SourceError::PatchFailed {
        patch,
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
      });
    }
  }
  Ok(())
}

/// List patch files in sorted filename order. A missing patch directory
/// means an empty patch set.
fn sorted_patches(patch_dir: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
  if !patch_dir.is_dir() {
    return Ok(Vec::new());
  }

  let mut patches: Vec<PathBuf> = std::fs::read_dir(patch_dir)?
    .filter_map(|entry| entry.ok())
    .map(|entry| entry.path())
    .filter(|path| path.is_file())
    .collect();
  patches.sort();
  Ok(patches)
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn classify_missing_directory_as_absent() {
    assert_eq!(classify(None, "rel-1.20.0"), CheckoutState::Absent);
  }

  #[test]
  fn classify_matching_branch_as_ready() {
    assert_eq!(classify(Some("rel-1.20.0"), "rel-1.20.0"), CheckoutState::Ready);
  }

  #[test]
  fn classify_other_branch_as_wrong() {
    assert_eq!(
      classify(Some("rel-1.19.2"), "rel-1.20.0"),
      CheckoutState::WrongBranch("rel-1.19.2".to_string())
    );
  }

  #[test]
  fn patches_listed_in_sorted_order() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path();
    std::fs::write(dir.join("0002-fix-build.patch"), "").unwrap();
    std::fs::write(dir.join("0001-version.patch"), "").unwrap();
    std::fs::write(dir.join("0010-late.patch"), "").unwrap();

    let names: Vec<String> = sorted_patches(dir)
      .unwrap()
      .into_iter()
      .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
      .collect();

    assert_eq!(names, vec!["0001-version.patch", "0002-fix-build.patch", "0010-late.patch"]);
  }

  #[test]
  fn missing_patch_dir_is_empty_set() {
    let temp = TempDir::new().unwrap();
    let missing = temp.path().join("nope");
    assert!(sorted_patches(&missing).unwrap().is_empty());
  }

  #[test]
  fn subdirectories_are_not_patches() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path();
    std::fs::create_dir(dir.join("disabled")).unwrap();
    std::fs::write(dir.join("0001-only.patch"), "").unwrap();

    assert_eq!(sorted_patches(dir).unwrap().len(), 1);
  }
}
