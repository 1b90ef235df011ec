//! Implementation of the `ortbuild info` command.

use anyhow::Result;
use ortbuild_lib::invoke::num_cpus;
use ortbuild_lib::platform::PlatformFacts;

use crate::output;

/// Print detected host platform facts.
pub fn cmd_info() -> Result<()> {
  let facts = PlatformFacts::current();

  println!("ortbuild v{}", env!("CARGO_PKG_VERSION"));
  output::print_stat("platform", &facts.to_string());
  output::print_stat("os", facts.os.as_str());
  output::print_stat("arch", facts.arch.as_str());
  output::print_stat("cpus", &num_cpus().to_string());
  Ok(())
}
