//! Implementation of the `ortbuild build` command.

use std::time::Instant;

use anyhow::Result;
use ortbuild_lib::{pipeline, platform::PlatformFacts};

use crate::BuildArgs;
use crate::output;

/// Run the full pipeline: prepare the checkout, resolve the toolchain,
/// stage SDKs, then configure, build, and install.
pub async fn cmd_build(args: &BuildArgs) -> Result<()> {
  let started = Instant::now();

  let options = args.to_options();
  // Contradictory option sets must fail before anything touches disk.
  options.validate()?;

  let layout = args.layout()?;
  let facts = PlatformFacts::current();
  tracing::debug!(root = %layout.root().display(), "working root");

  output::print_info(&format!(
    "building ONNX Runtime {} for {} on {}",
    options.version, options.arch, facts
  ));

  pipeline::run(&options, &facts, &layout).await?;

  output::print_success(&format!(
    "installed to {} in {}",
    layout.install_dir().display(),
    output::format_duration(started.elapsed())
  ));
  Ok(())
}
