//! ortbuild - build ONNX Runtime from source with pinned patches and SDKs.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use ortbuild_lib::layout::Layout;
use ortbuild_lib::options::{BuildOptions, TargetArch};
use tracing_subscriber::EnvFilter;

mod cmd;
mod output;

use output::OutputFormat;

/// Configure and drive a native ONNX Runtime build.
#[derive(Parser)]
#[command(name = "ortbuild")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Run the full pipeline: prepare source, stage SDKs, configure, build, install
  Build(BuildArgs),

  /// Show the resolved environment, flags, and SDK fetches without building
  Plan {
    #[command(flatten)]
    args: BuildArgs,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
  },

  /// Show detected host platform facts
  Info,
}

/// Options shared by `build` and `plan`.
#[derive(Args)]
pub struct BuildArgs {
  /// Upstream release version; the checkout is pinned to branch rel-<VERSION>
  version: String,

  /// Target architecture
  #[arg(long, default_value = "x86_64")]
  arch: TargetArch,

  /// Working root (defaults to the current directory)
  #[arg(long)]
  root: Option<PathBuf>,

  /// Enable training support
  #[arg(long)]
  training: bool,

  /// Build a static library instead of a shared one
  #[arg(long = "static")]
  static_link: bool,

  /// Enable the CUDA execution provider
  #[arg(long)]
  cuda: bool,

  /// Enable the TensorRT execution provider (requires --cuda)
  #[arg(long)]
  trt: bool,

  /// Enable the TensorRT-RTX execution provider (requires --cuda)
  #[arg(long)]
  nvrtx: bool,

  /// Enable the DirectML execution provider
  #[arg(long)]
  directml: bool,

  /// Enable the CoreML execution provider
  #[arg(long)]
  coreml: bool,

  /// Enable the DNNL execution provider
  #[arg(long)]
  dnnl: bool,

  /// Enable the XNNPACK execution provider
  #[arg(long)]
  xnnpack: bool,

  /// Enable the WebGPU execution provider
  #[arg(long)]
  webgpu: bool,

  /// Enable the OpenVINO execution provider
  #[arg(long)]
  openvino: bool,

  /// Enable the NNAPI execution provider
  #[arg(long)]
  nnapi: bool,

  /// Generate for Ninja instead of the platform default
  #[arg(long)]
  ninja: bool,

  /// Target iOS devices (macOS host only)
  #[arg(long)]
  iphoneos: bool,

  /// Target the iOS simulator (macOS host only)
  #[arg(long)]
  iphonesimulator: bool,

  /// Target Android (Linux host only)
  #[arg(long)]
  android: bool,
}

impl BuildArgs {
  fn to_options(&self) -> BuildOptions {
    BuildOptions {
      version: self.version.clone(),
      arch: self.arch,
      training: self.training,
      static_link: self.static_link,
      cuda: self.cuda,
      trt: self.trt,
      nvrtx: self.nvrtx,
      directml: self.directml,
      coreml: self.coreml,
      dnnl: self.dnnl,
      xnnpack: self.xnnpack,
      webgpu: self.webgpu,
      openvino: self.openvino,
      nnapi: self.nnapi,
      ninja: self.ninja,
      iphoneos: self.iphoneos,
      iphonesimulator: self.iphonesimulator,
      android: self.android,
    }
  }

  fn layout(&self) -> Result<Layout> {
    let root = match &self.root {
      Some(root) => root.clone(),
      None => std::env::current_dir()?,
    };
    Ok(Layout::new(root))
  }
}

#[tokio::main]
async fn main() {
  let cli = Cli::parse();

  let filter = if cli.verbose {
    EnvFilter::new("debug")
  } else {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
  };
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let result = match cli.command {
    Commands::Build(args) => cmd::cmd_build(&args).await,
    Commands::Plan { args, format } => cmd::cmd_plan(&args, format),
    Commands::Info => cmd::cmd_info(),
  };

  if let Err(e) = result {
    output::print_error(&format!("{e:#}"));
    std::process::exit(1);
  }
}
