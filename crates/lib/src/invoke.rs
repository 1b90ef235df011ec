//! External build tool invocation.
//!
//! Three ordered cmake calls: configure, build, install. Output streams
//! straight to the terminal; any non-zero exit aborts the pipeline with no
//! retry and no partial-state cleanup.

use std::fmt;

use thiserror::Error;
use tokio::process::Command;
use tracing::info;

use crate::flags::FlagSet;
use crate::layout::Layout;
use crate::options::BuildOptions;
use crate::toolchain::ToolchainConfig;

/// The three pipeline-terminating build steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
  Configure,
  Build,
  Install,
}

impl BuildPhase {
  pub const fn as_str(&self) -> &'static str {
    match self {
      BuildPhase::Configure => "configure",
      BuildPhase::Build => "build",
      BuildPhase::Install => "install",
    }
  }
}

impl fmt::Display for BuildPhase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// Errors raised by the external build tool. All are fatal.
#[derive(Debug, Error)]
pub enum InvokeError {
  #[error("failed to spawn cmake: {0}")]
  Spawn(#[source] std::io::Error),

  #[error("cmake {phase} failed with exit code {code:?}")]
  PhaseFailed { phase: BuildPhase, code: Option<i32> },
}

/// Detected logical CPU count, bounding the build tool's worker pool.
pub fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}

/// Run the configure step with the assembled flags and environment.
pub async fn configure(
  layout: &Layout,
  options: &BuildOptions,
  toolchain: &ToolchainConfig,
  flags: &FlagSet,
) -> Result<(), InvokeError> {
  let args = configure_args(layout, options, flags);
  run_cmake(BuildPhase::Configure, &args, &toolchain.env).await
}

/// Run the build step, parallelism bounded by the logical CPU count.
pub async fn build(layout: &Layout) -> Result<(), InvokeError> {
  let args = build_args(layout, num_cpus());
  run_cmake(BuildPhase::Build, &args, &[]).await
}

/// Run the install step.
pub async fn install(layout: &Layout) -> Result<(), InvokeError> {
  let args = install_args(layout);
  run_cmake(BuildPhase::Install, &args, &[]).await
}

fn configure_args(layout: &Layout, options: &BuildOptions, flags: &FlagSet) -> Vec<String> {
  let mut args = vec![
    "-S".to_string(),
    layout.cmake_source_dir(options.static_link).display().to_string(),
    "-B".to_string(),
    layout.build_dir().display().to_string(),
    format!("-DCMAKE_INSTALL_PREFIX={}", layout.install_dir().display()),
  ];
  args.extend(flags.as_slice().iter().cloned());
  args
}

fn build_args(layout: &Layout, parallelism: usize) -> Vec<String> {
  vec![
    "--build".to_string(),
    layout.build_dir().display().to_string(),
    "--config".to_string(),
    "Release".to_string(),
    "--parallel".to_string(),
    parallelism.to_string(),
  ]
}

fn install_args(layout: &Layout) -> Vec<String> {
  vec![
    "--install".to_string(),
    layout.build_dir().display().to_string(),
    "--config".to_string(),
    "Release".to_string(),
  ]
}

/// Run cmake with inherited stdio, environment overrides applied on top of
/// the process environment.
async fn run_cmake(phase: BuildPhase, args: &[String], env: &[(String, String)]) -> Result<(), InvokeError> {
  info!(phase = %phase, "running cmake");

  let mut command = Command::new("cmake");
  command.args(args);
  for (name, value) in env {
    command.env(name, value);
  }

  let status = command.status().await.map_err(InvokeError::Spawn)?;

  if !status.success() {
    return Err(InvokeError::PhaseFailed {
      phase,
      code: status.code(),
    });
  }
  Ok(())
}
