//! Filesystem layout of a build working root.
//!
//! All paths the pipeline touches are derived from a single root directory
//! so tests can point the whole pipeline at a temp directory.

use std::path::{Path, PathBuf};

/// Paths of everything the pipeline reads or writes, relative to one root.
#[derive(Debug, Clone)]
pub struct Layout {
  root: PathBuf,
}

impl Layout {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// The upstream checkout.
  pub fn source_dir(&self) -> PathBuf {
    self.root.join("onnxruntime")
  }

  /// Local patches, applied in sorted filename order.
  pub fn patch_dir(&self) -> PathBuf {
    self.root.join("src").join("patches").join("all")
  }

  /// CMake source tree handed to configure. The static build uses a local
  /// aggregation tree that links everything into one archive.
  pub fn cmake_source_dir(&self, static_link: bool) -> PathBuf {
    if static_link {
      self.root.join("cmake").join("static")
    } else {
      self.source_dir().join("cmake")
    }
  }

  /// The build tool's working tree.
  pub fn build_dir(&self) -> PathBuf {
    self.root.join("build")
  }

  /// Install prefix for the finished artifact.
  pub fn install_dir(&self) -> PathBuf {
    self.root.join("artifact").join("onnxruntime")
  }

  pub fn cudnn_dir(&self) -> PathBuf {
    self.root.join("cudnn")
  }

  pub fn tensorrt_dir(&self) -> PathBuf {
    self.root.join("tensorrt")
  }

  pub fn tensorrt_rtx_dir(&self) -> PathBuf {
    self.root.join("tensorrt-rtx")
  }

  /// A local cross-compilation toolchain file.
  pub fn toolchain_file(&self, name: &str) -> PathBuf {
    self.root.join("toolchains").join(name)
  }
}
