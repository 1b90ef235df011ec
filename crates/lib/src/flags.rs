//! Deterministic CMake flag assembly.
//!
//! Pure string computation from already-resolved inputs. The output order
//! is part of the contract: later flags override earlier ones in CMake, so
//! the assembled sequence must be byte-identical across runs.
//!
//! Features with fixed flag strings live in a lookup table; emissions that
//! depend on paths or the target architecture follow as ordered blocks.

use serde::Serialize;

use crate::layout::Layout;
use crate::options::{BuildOptions, TargetArch};
use crate::platform::{Os, PlatformFacts};
use crate::toolchain::ToolchainConfig;

/// GPU compute capabilities per target architecture.
const CUDA_ARCHS_X86_64: &str = "75;80;90";
const CUDA_ARCHS_AARCH64: &str = "80;87;90";

/// Ordered, append-only sequence of CMake arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlagSet {
  flags: Vec<String>,
}

impl FlagSet {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&mut self, flag: impl Into<String>) {
    self.flags.push(flag.into());
  }

  /// Append a `-D<key>=<value>` cache define.
  pub fn define(&mut self, key: &str, value: impl AsRef<str>) {
    self.flags.push(format!("-D{}={}", key, value.as_ref()));
  }

  pub fn as_slice(&self) -> &[String] {
    &self.flags
  }

  pub fn contains(&self, flag: &str) -> bool {
    self.flags.iter().any(|f| f == flag)
  }

  pub fn is_empty(&self) -> bool {
    self.flags.is_empty()
  }

  pub fn len(&self) -> usize {
    self.flags.len()
  }

  pub fn into_vec(self) -> Vec<String> {
    self.flags
  }
}

impl<'a> IntoIterator for &'a FlagSet {
  type Item = &'a String;
  type IntoIter = std::slice::Iter<'a, String>;

  fn into_iter(self) -> Self::IntoIter {
    self.flags.iter()
  }
}

/// A feature toggle mapped to its fixed flag strings.
struct FeatureRule {
  enabled: fn(&BuildOptions) -> bool,
  flags: &'static [&'static str],
}

/// Feature → flag table for every toggle whose emission is a fixed string
/// list. Path- and architecture-dependent emissions follow in `assemble`.
static FEATURE_RULES: &[FeatureRule] = &[
  FeatureRule {
    enabled: |o| o.training,
    flags: &["-Donnxruntime_ENABLE_TRAINING=ON"],
  },
  FeatureRule {
    enabled: |o| o.directml,
    flags: &["-Donnxruntime_USE_DML=ON"],
  },
  FeatureRule {
    enabled: |o| o.coreml,
    flags: &["-Donnxruntime_USE_COREML=ON"],
  },
  FeatureRule {
    enabled: |o| o.dnnl,
    flags: &["-Donnxruntime_USE_DNNL=ON"],
  },
  FeatureRule {
    enabled: |o| o.xnnpack,
    flags: &["-Donnxruntime_USE_XNNPACK=ON"],
  },
  FeatureRule {
    enabled: |o| o.webgpu,
    flags: &[
      "-Donnxruntime_USE_WEBGPU=ON",
      "-Donnxruntime_USE_EXTERNAL_DAWN=OFF",
      "-Donnxruntime_BUILD_DAWN_MONOLITHIC_LIBRARY=ON",
      "-Donnxruntime_ENABLE_DAWN_BACKEND_VULKAN=ON",
    ],
  },
  FeatureRule {
    enabled: |o| o.openvino,
    flags: &["-Donnxruntime_USE_OPENVINO=ON"],
  },
  FeatureRule {
    enabled: |o| o.nnapi,
    flags: &["-Donnxruntime_USE_NNAPI_BUILTIN=ON"],
  },
];

/// Assemble the complete ordered flag list for the configure invocation.
pub fn assemble(
  options: &BuildOptions,
  facts: &PlatformFacts,
  toolchain: &ToolchainConfig,
  layout: &Layout,
) -> FlagSet {
  let mut flags = FlagSet::new();

  for early in &toolchain.early_flags {
    flags.push(early.clone());
  }

  flags.define("CMAKE_BUILD_TYPE", "Release");
  flags.define("onnxruntime_BUILD_UNIT_TESTS", "OFF");

  for rule in FEATURE_RULES {
    if (rule.enabled)(options) {
      for flag in rule.flags {
        flags.push(*flag);
      }
    }
  }

  if options.cuda {
    flags.push("-Donnxruntime_USE_CUDA=ON");
    flags.push("-Donnxruntime_NVCC_THREADS=1");
    flags.define("onnxruntime_CUDNN_HOME", layout.cudnn_dir().to_string_lossy());
    let archs = match options.arch {
      TargetArch::X86_64 => CUDA_ARCHS_X86_64,
      TargetArch::Aarch64 => CUDA_ARCHS_AARCH64,
    };
    flags.define("CMAKE_CUDA_ARCHITECTURES", archs);
  }

  if options.trt {
    flags.push("-Donnxruntime_USE_TENSORRT=ON");
    flags.push("-Donnxruntime_USE_TENSORRT_BUILTIN_PARSER=ON");
    flags.define("onnxruntime_TENSORRT_HOME", layout.tensorrt_dir().to_string_lossy());
  }

  if options.nvrtx {
    flags.push("-Donnxruntime_USE_NV_TENSORRT_RTX=ON");
    flags.define("onnxruntime_TENSORRT_RTX_HOME", layout.tensorrt_rtx_dir().to_string_lossy());
  }

  // KleidiAI kernels only exist for aarch64.
  match options.arch {
    TargetArch::Aarch64 => flags.push("-Donnxruntime_USE_KLEIDIAI=ON"),
    TargetArch::X86_64 => flags.push("-Donnxruntime_USE_KLEIDIAI=OFF"),
  }

  if options.static_link {
    flags.push("-Donnxruntime_BUILD_SHARED_LIB=OFF");
    flags.push("-DCMAKE_POSITION_INDEPENDENT_CODE=ON");
    if facts.os == Os::Windows {
      flags.push("-Donnxruntime_USE_MSVC_STATIC_RUNTIME=ON");
    }
  } else {
    flags.push("-Donnxruntime_BUILD_SHARED_LIB=ON");
    if facts.os == Os::Windows {
      flags.push("-DCMAKE_MSVC_RUNTIME_LIBRARY=MultiThreadedDLL");
      flags.push("-Donnxruntime_USE_MSVC_STATIC_RUNTIME=OFF");
    }
  }

  if let Some(joined) = joined(&toolchain.compiler_flags) {
    flags.define("CMAKE_C_FLAGS", &joined);
    flags.define("CMAKE_CXX_FLAGS", &joined);
  }
  if let Some(joined) = joined(&toolchain.cuda_flags) {
    flags.define("CMAKE_CUDA_FLAGS", &joined);
  }

  flags
}

/// Join raw compiler flags with single spaces; `None` when empty so the
/// define is omitted entirely.
fn joined(flags: &[String]) -> Option<String> {
  if flags.is_empty() { None } else { Some(flags.join(" ")) }
}
