//! Implementation of the `ortbuild plan` command.
//!
//! Resolves the toolchain and assembles the flag set without performing
//! any side effect, then prints what `build` would do: environment
//! overrides, the ordered flag list, and pending SDK fetches.

use anyhow::Result;
use ortbuild_lib::pipeline;
use ortbuild_lib::platform::PlatformFacts;
use serde::Serialize;

use crate::BuildArgs;
use crate::output::{self, OutputFormat};

#[derive(Serialize)]
struct SdkFetch {
  sdk: &'static str,
  url: &'static str,
  dest: String,
}

#[derive(Serialize)]
struct PlanReport {
  version: String,
  arch: &'static str,
  host: PlatformFacts,
  env: Vec<(String, String)>,
  flags: Vec<String>,
  sdk_fetches: Vec<SdkFetch>,
}

pub fn cmd_plan(args: &BuildArgs, format: OutputFormat) -> Result<()> {
  let options = args.to_options();
  options.validate()?;

  let layout = args.layout()?;
  let facts = PlatformFacts::current();

  let resolved = pipeline::resolve(&options, &facts, &layout)?;

  let mut sdk_fetches = Vec::new();
  for sdk in &resolved.sdks {
    sdk_fetches.push(SdkFetch {
      sdk: sdk.name(),
      url: sdk.url(facts.os, options.arch)?,
      dest: sdk.dest(&layout).display().to_string(),
    });
  }

  let report = PlanReport {
    version: options.version.clone(),
    arch: options.arch.as_str(),
    host: facts,
    env: resolved.toolchain.env.clone(),
    flags: resolved.flags.as_slice().to_vec(),
    sdk_fetches,
  };

  if format.is_json() {
    return output::print_json(&report);
  }

  output::print_info(&format!(
    "plan for ONNX Runtime {} ({} on {})",
    report.version, report.arch, report.host
  ));

  if !report.env.is_empty() {
    println!("environment overrides:");
    for (name, value) in &report.env {
      output::print_stat(name, value);
    }
  }

  println!("configure flags:");
  for flag in &report.flags {
    println!("  {flag}");
  }

  if !report.sdk_fetches.is_empty() {
    println!("SDK fetches:");
    for fetch in &report.sdk_fetches {
      output::print_stat(fetch.sdk, &format!("{} -> {}", fetch.url, fetch.dest));
    }
  }

  Ok(())
}
