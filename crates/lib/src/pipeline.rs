//! Pipeline orchestration.
//!
//! Drives the stages strictly in order: source preparation, toolchain
//! resolution, flag assembly, SDK staging, then configure/build/install.
//! There are no feedback loops and no retries; the first fatal error
//! aborts the run. The CUDA cross-environment patch is the single
//! non-fatal stage.

use thiserror::Error;
use tracing::{debug, info};

use crate::flags::{self, FlagSet};
use crate::invoke;
use crate::layout::Layout;
use crate::options::{BuildOptions, TargetArch, ValidationError};
use crate::platform::{HostArch, Os, PlatformFacts};
use crate::sdk::{self, Sdk};
use crate::source;
use crate::toolchain::{self, ToolchainConfig};

/// Any fatal pipeline error, tagged by the stage that raised it.
#[derive(Debug, Error)]
pub enum PipelineError {
  #[error("invalid options: {0}")]
  Validation(#[from] ValidationError),

  #[error("source preparation failed: {0}")]
  Source(#[from] source::SourceError),

  #[error("toolchain resolution failed: {0}")]
  Toolchain(#[from] toolchain::ToolchainError),

  #[error("SDK staging failed: {0}")]
  Sdk(#[from] sdk::SdkError),

  #[error("build failed: {0}")]
  Invoke(#[from] invoke::InvokeError),
}

/// A fully resolved build, ready to hand to cmake. Produced without side
/// effects beyond environment reads and PATH probes, so the CLI can print
/// it as a dry-run plan.
#[derive(Debug)]
pub struct ResolvedBuild {
  pub toolchain: ToolchainConfig,
  pub flags: FlagSet,
  pub sdks: Vec<Sdk>,
}

/// Resolve the toolchain and assemble the flag set for these options.
pub fn resolve(options: &BuildOptions, facts: &PlatformFacts, layout: &Layout) -> Result<ResolvedBuild, PipelineError> {
  options.validate()?;

  let toolchain = toolchain::resolve(facts, options, layout)?;
  let flags = flags::assemble(options, facts, &toolchain, layout);

  let mut sdks = Vec::new();
  if options.cuda {
    sdks.push(Sdk::Cudnn);
  }
  if options.trt {
    sdks.push(Sdk::TensorRt);
  }
  if options.nvrtx {
    sdks.push(Sdk::TensorRtRtx);
  }

  Ok(ResolvedBuild { toolchain, flags, sdks })
}

/// Run the whole pipeline for the given options.
pub async fn run(options: &BuildOptions, facts: &PlatformFacts, layout: &Layout) -> Result<(), PipelineError> {
  options.validate()?;

  info!(version = %options.version, arch = %options.arch, "preparing source");
  source::prepare(layout, options).await?;

  let resolved = resolve(options, facts, layout)?;
  debug!(flags = resolved.flags.len(), "assembled configure flags");

  // Best-effort CUDA environment repair for cross builds; failures here
  // surface later as compile/link errors, not now.
  if cross_cuda(options, facts) {
    toolchain::patch_cuda_cross_env().await;
  }

  for sdk in &resolved.sdks {
    sdk::ensure(*sdk, layout, facts.os, options.arch).await?;
  }

  invoke::configure(layout, options, &resolved.toolchain, &resolved.flags).await?;
  invoke::build(layout).await?;
  invoke::install(layout).await?;

  info!(artifact = %layout.install_dir().display(), "build complete");
  Ok(())
}

fn cross_cuda(options: &BuildOptions, facts: &PlatformFacts) -> bool {
  options.cuda && facts.os == Os::Linux && options.arch == TargetArch::Aarch64 && facts.arch != HostArch::Aarch64
}

#[cfg(test)]
mod tests {
  use super::*;

  fn options(version: &str) -> BuildOptions {
    BuildOptions {
      version: version.to_string(),
      ..Default::default()
    }
  }

  #[test]
  fn resolve_rejects_invalid_options_before_side_effects() {
    let layout = Layout::new("/work");
    let facts = PlatformFacts::new(Os::Linux, HostArch::X86_64);
    let opts = BuildOptions {
      trt: true,
      ..options("1.20.0")
    };

    let err = resolve(&opts, &facts, &layout).unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));
  }

  #[test]
  fn resolve_lists_sdks_for_enabled_providers() {
    let layout = Layout::new("/work");
    let facts = PlatformFacts::new(Os::Linux, HostArch::X86_64);
    let opts = BuildOptions {
      cuda: true,
      trt: true,
      ..options("1.20.0")
    };

    let resolved = resolve(&opts, &facts, &layout).unwrap();
    assert_eq!(resolved.sdks, vec![Sdk::Cudnn, Sdk::TensorRt]);
  }

  #[test]
  fn resolve_without_providers_stages_nothing() {
    let layout = Layout::new("/work");
    let facts = PlatformFacts::new(Os::Linux, HostArch::X86_64);

    let resolved = resolve(&options("1.20.0"), &facts, &layout).unwrap();
    assert!(resolved.sdks.is_empty());
    assert!(!resolved.flags.is_empty());
  }

  #[test]
  fn cross_cuda_only_for_linux_aarch64_cross() {
    let opts = BuildOptions {
      cuda: true,
      arch: TargetArch::Aarch64,
      ..options("1.20.0")
    };
    assert!(cross_cuda(&opts, &PlatformFacts::new(Os::Linux, HostArch::X86_64)));
    assert!(!cross_cuda(&opts, &PlatformFacts::new(Os::Linux, HostArch::Aarch64)));
    assert!(!cross_cuda(&opts, &PlatformFacts::new(Os::Windows, HostArch::X86_64)));

    let native = options("1.20.0");
    assert!(!cross_cuda(&native, &PlatformFacts::new(Os::Linux, HostArch::X86_64)));
  }
}
