//! Host platform detection.

use std::fmt;

use serde::Serialize;

/// Host operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
  Linux,
  Darwin,
  Windows,
}

impl Os {
  /// Detect the current operating system at compile time.
  #[cfg(target_os = "linux")]
  pub const fn current() -> Self {
    Os::Linux
  }

  #[cfg(target_os = "macos")]
  pub const fn current() -> Self {
    Os::Darwin
  }

  #[cfg(target_os = "windows")]
  pub const fn current() -> Self {
    Os::Windows
  }

  pub const fn as_str(&self) -> &'static str {
    match self {
      Os::Linux => "linux",
      Os::Darwin => "darwin",
      Os::Windows => "windows",
    }
  }
}

impl fmt::Display for Os {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// Host CPU architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HostArch {
  X86_64,
  Aarch64,
}

impl HostArch {
  /// Detect the current architecture at compile time.
  #[cfg(target_arch = "x86_64")]
  pub const fn current() -> Self {
    HostArch::X86_64
  }

  #[cfg(target_arch = "aarch64")]
  pub const fn current() -> Self {
    HostArch::Aarch64
  }

  pub const fn as_str(&self) -> &'static str {
    match self {
      HostArch::X86_64 => "x86_64",
      HostArch::Aarch64 => "aarch64",
    }
  }
}

impl fmt::Display for HostArch {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// Detected host facts, fixed for the duration of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlatformFacts {
  pub os: Os,
  pub arch: HostArch,
}

impl PlatformFacts {
  pub const fn new(os: Os, arch: HostArch) -> Self {
    Self { os, arch }
  }

  /// Detect the current host at compile time.
  pub const fn current() -> Self {
    Self {
      os: Os::current(),
      arch: HostArch::current(),
    }
  }

  pub fn is_linux(&self) -> bool {
    self.os == Os::Linux
  }

  pub fn is_darwin(&self) -> bool {
    self.os == Os::Darwin
  }

  pub fn is_windows(&self) -> bool {
    self.os == Os::Windows
  }
}

impl fmt::Display for PlatformFacts {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}-{}", self.arch, self.os)
  }
}
