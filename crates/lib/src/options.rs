//! Build options and their dependency validation.
//!
//! `BuildOptions` is constructed once from CLI arguments and never mutated.
//! Validation runs before any filesystem or network side effect so that
//! contradictory option sets fail fast.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

/// Target CPU architecture for the produced library.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetArch {
  #[default]
  X86_64,
  Aarch64,
}

impl TargetArch {
  pub const fn as_str(&self) -> &'static str {
    match self {
      TargetArch::X86_64 => "x86_64",
      TargetArch::Aarch64 => "aarch64",
    }
  }
}

impl fmt::Display for TargetArch {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

impl FromStr for TargetArch {
  type Err = ValidationError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "x86_64" => Ok(TargetArch::X86_64),
      "aarch64" => Ok(TargetArch::Aarch64),
      other => Err(ValidationError::UnknownArch(other.to_string())),
    }
  }
}

/// Errors raised by option validation, before any side effect.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
  #[error("unknown architecture '{0}' (expected x86_64 or aarch64)")]
  UnknownArch(String),

  #[error("--{flag} requires --{requires}")]
  MissingDependency {
    flag: &'static str,
    requires: &'static str,
  },

  #[error("--iphoneos and --iphonesimulator are mutually exclusive")]
  ConflictingIosTargets,
}

/// The full set of parsed build options. Immutable after construction.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildOptions {
  /// Upstream release version, e.g. "1.20.0". The checkout is pinned to
  /// branch `rel-<version>`.
  pub version: String,
  pub arch: TargetArch,

  pub training: bool,
  /// Build a static library instead of a shared one.
  pub static_link: bool,
  pub cuda: bool,
  pub trt: bool,
  pub nvrtx: bool,
  pub directml: bool,
  pub coreml: bool,
  pub dnnl: bool,
  pub xnnpack: bool,
  pub webgpu: bool,
  pub openvino: bool,
  pub nnapi: bool,
  pub ninja: bool,
  pub iphoneos: bool,
  pub iphonesimulator: bool,
  pub android: bool,
}

impl BuildOptions {
  /// The upstream release branch this option set pins the checkout to.
  pub fn release_branch(&self) -> String {
    format!("rel-{}", self.version)
  }

  /// True when any iOS target was requested.
  pub fn ios(&self) -> bool {
    self.iphoneos || self.iphonesimulator
  }

  /// Check declared dependencies between options.
  ///
  /// The TensorRT-class providers ride on the CUDA toolkit and cannot be
  /// enabled without it.
  pub fn validate(&self) -> Result<(), ValidationError> {
    if self.trt && !self.cuda {
      return Err(ValidationError::MissingDependency {
        flag: "trt",
        requires: "cuda",
      });
    }
    if self.nvrtx && !self.cuda {
      return Err(ValidationError::MissingDependency {
        flag: "nvrtx",
        requires: "cuda",
      });
    }
    if self.iphoneos && self.iphonesimulator {
      return Err(ValidationError::ConflictingIosTargets);
    }
    Ok(())
  }
}
