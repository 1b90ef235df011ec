//! Compiler and environment policy.
//!
//! `resolve` maps (host facts, build options) to environment overrides and
//! the early CMake flags: generator choice, cross toolchain files, and the
//! CUDA host compiler. It reads the process environment and probes PATH but
//! performs no writes.
//!
//! `patch_cuda_cross_env` is the one side-effecting exception: for aarch64
//! cross builds with CUDA it fills in the missing sbsa subtree of the local
//! CUDA installation. Every failure on that path is a warning, never an
//! abort; the build is allowed to proceed and fail later at link time.

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::layout::Layout;
use crate::options::{BuildOptions, TargetArch};
use crate::platform::{HostArch, Os, PlatformFacts};
use crate::sdk;

/// Compilers forced on native Linux builds. CUDA 12 rejects newer GCC
/// majors, so the whole build pins the newest supported one.
const NATIVE_CC: &str = "gcc-12";
const NATIVE_CXX: &str = "g++-12";
const CUDA_HOST_CXX: &str = "g++-12";

/// Cross g++ candidates, probed in priority order.
const CROSS_GXX_CANDIDATES: &[&str] = &[
  "aarch64-linux-gnu-g++-11",
  "aarch64-linux-gnu-g++-12",
  "aarch64-linux-gnu-g++",
];
const CROSS_GXX_FALLBACK: &str = "aarch64-linux-gnu-g++";

const CROSS_TOOLCHAIN_FILE: &str = "aarch64-linux-gnu.cmake";
const CROSS_TOOLCHAIN_FILE_GCC12: &str = "aarch64-linux-gnu-gcc12.cmake";

/// CUDA runtime redist used to patch the sbsa lib directory of an x86_64
/// CUDA installation when cross-compiling.
const CUDA_CUDART_SBSA_URL: &str =
  "https://developer.download.nvidia.com/compute/cuda/redist/cuda_cudart/linux-sbsa/cuda_cudart-linux-sbsa-12.4.127-archive.tar.xz";

const VS_GENERATOR: &str = "Visual Studio 17 2022";

/// Fatal toolchain resolution errors. Probe misses are not errors; they
/// degrade to warnings and a best-guess default.
#[derive(Debug, Error)]
pub enum ToolchainError {
  #[error("{target} builds require a {requires} host")]
  UnsupportedHost {
    target: &'static str,
    requires: &'static str,
  },

  #[error("environment variable {var} must be set for {context} builds")]
  MissingEnv {
    var: &'static str,
    context: &'static str,
  },

  #[error("cross toolchain file not found: {0}")]
  MissingToolchainFile(PathBuf),
}

/// Resolved environment and early-flag configuration.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolchainConfig {
  /// Environment overrides applied on top of the inherited environment,
  /// in insertion order.
  pub env: Vec<(String, String)>,
  /// Flags that must precede the feature flags (generator, platform
  /// switch, toolchain file, CUDA host compiler).
  pub early_flags: Vec<String>,
  /// Raw C/C++ compiler flags, joined later by the assembler.
  pub compiler_flags: Vec<String>,
  /// Raw nvcc flags, joined later by the assembler.
  pub cuda_flags: Vec<String>,
}

impl ToolchainConfig {
  fn set_env(&mut self, name: &str, value: impl Into<String>) {
    self.env.push((name.to_string(), value.into()));
  }

  fn flag(&mut self, flag: impl Into<String>) {
    self.early_flags.push(flag.into());
  }
}

/// Resolve toolchain configuration, probing PATH for cross compilers.
pub fn resolve(facts: &PlatformFacts, options: &BuildOptions, layout: &Layout) -> Result<ToolchainConfig, ToolchainError> {
  resolve_with(facts, options, layout, binary_on_path)
}

/// Like [`resolve`], with an injectable existence predicate for the
/// compiler probe.
pub fn resolve_with(
  facts: &PlatformFacts,
  options: &BuildOptions,
  layout: &Layout,
  exists: impl Fn(&str) -> bool,
) -> Result<ToolchainConfig, ToolchainError> {
  let mut config = ToolchainConfig::default();

  if options.ninja && !facts.is_windows() {
    config.flag("-GNinja");
  }

  if options.ios() {
    resolve_ios(facts, options, layout, &mut config)?;
  } else if options.android {
    resolve_android(facts, &mut config)?;
  } else {
    match facts.os {
      Os::Windows => resolve_windows(facts, options, &mut config),
      Os::Linux => resolve_linux(facts, options, layout, &mut config, exists)?,
      Os::Darwin => {}
    }
  }

  Ok(config)
}

fn resolve_ios(
  facts: &PlatformFacts,
  options: &BuildOptions,
  layout: &Layout,
  config: &mut ToolchainConfig,
) -> Result<(), ToolchainError> {
  if !facts.is_darwin() {
    return Err(ToolchainError::UnsupportedHost {
      target: "iOS",
      requires: "macOS",
    });
  }
  if std::env::var("IPHONEOS_DEPLOYMENT_TARGET").is_err() {
    return Err(ToolchainError::MissingEnv {
      var: "IPHONEOS_DEPLOYMENT_TARGET",
      context: "iOS",
    });
  }

  let toolchain = layout
    .source_dir()
    .join("cmake")
    .join("onnxruntime_ios.toolchain.cmake");
  config.flag(format!("-DCMAKE_TOOLCHAIN_FILE={}", toolchain.display()));
  config.flag("-DCMAKE_SYSTEM_NAME=iOS");

  let sysroot = if options.iphonesimulator { "iphonesimulator" } else { "iphoneos" };
  config.flag(format!("-DCMAKE_OSX_SYSROOT={sysroot}"));
  Ok(())
}

fn resolve_android(facts: &PlatformFacts, config: &mut ToolchainConfig) -> Result<(), ToolchainError> {
  if !facts.is_linux() {
    return Err(ToolchainError::UnsupportedHost {
      target: "Android",
      requires: "Linux",
    });
  }

  let ndk_home = std::env::var("ANDROID_NDK_HOME").map_err(|_| ToolchainError::MissingEnv {
    var: "ANDROID_NDK_HOME",
    context: "Android",
  })?;
  if std::env::var("ANDROID_HOME").is_err() {
    return Err(ToolchainError::MissingEnv {
      var: "ANDROID_HOME",
      context: "Android",
    });
  }
  let api_level = std::env::var("ANDROID_API").unwrap_or_else(|_| "24".to_string());

  let toolchain = Path::new(&ndk_home)
    .join("build")
    .join("cmake")
    .join("android.toolchain.cmake");
  config.flag(format!("-DCMAKE_TOOLCHAIN_FILE={}", toolchain.display()));
  config.flag("-DANDROID_ABI=arm64-v8a");
  config.flag(format!("-DANDROID_PLATFORM=android-{api_level}"));
  Ok(())
}

fn resolve_windows(facts: &PlatformFacts, options: &BuildOptions, config: &mut ToolchainConfig) {
  config.flag("-G");
  config.flag(VS_GENERATOR);

  // IDE project files default to the host platform; cross targets need
  // the explicit platform switch.
  match (facts.arch, options.arch) {
    (HostArch::X86_64, TargetArch::Aarch64) => {
      config.flag("-A");
      config.flag("ARM64");
    }
    (HostArch::Aarch64, TargetArch::X86_64) => {
      config.flag("-A");
      config.flag("x64");
    }
    _ => {}
  }
}

fn resolve_linux(
  facts: &PlatformFacts,
  options: &BuildOptions,
  layout: &Layout,
  config: &mut ToolchainConfig,
  exists: impl Fn(&str) -> bool,
) -> Result<(), ToolchainError> {
  let cross = options.arch == TargetArch::Aarch64 && facts.arch != HostArch::Aarch64;

  if !cross {
    config.set_env("CC", NATIVE_CC);
    config.set_env("CXX", NATIVE_CXX);
    if options.cuda {
      config.set_env("CUDAHOSTCXX", CUDA_HOST_CXX);
    }
    return Ok(());
  }

  if options.cuda {
    let compiler = match first_candidate(CROSS_GXX_CANDIDATES, &exists) {
      Some(found) => {
        debug!(compiler = found, "cross g++ found on PATH");
        found
      }
      None => {
        warn!(
          fallback = CROSS_GXX_FALLBACK,
          "no cross g++ candidate found on PATH, proceeding with best guess"
        );
        CROSS_GXX_FALLBACK
      }
    };

    // GCC 12 needs the alternate toolchain file and nvcc's compiler
    // version check relaxed.
    let toolchain_name = if compiler.ends_with("-12") {
      config.cuda_flags.push("-allow-unsupported-compiler".to_string());
      CROSS_TOOLCHAIN_FILE_GCC12
    } else {
      CROSS_TOOLCHAIN_FILE
    };

    config.flag(format!(
      "-DCMAKE_TOOLCHAIN_FILE={}",
      layout.toolchain_file(toolchain_name).display()
    ));
    config.flag(format!("-DCMAKE_CUDA_HOST_COMPILER={compiler}"));
    config.compiler_flags.push("-Wno-psabi".to_string());
  } else {
    let toolchain = layout.toolchain_file(CROSS_TOOLCHAIN_FILE);
    if !toolchain.is_file() {
      return Err(ToolchainError::MissingToolchainFile(toolchain));
    }
    config.flag(format!("-DCMAKE_TOOLCHAIN_FILE={}", toolchain.display()));
    config.compiler_flags.push("-Wno-psabi".to_string());
  }

  Ok(())
}

/// First candidate accepted by the existence predicate, in list order.
fn first_candidate<'a>(candidates: &[&'a str], exists: impl Fn(&str) -> bool) -> Option<&'a str> {
  candidates.iter().copied().find(|candidate| exists(candidate))
}

/// Whether an executable with this name exists on PATH.
fn binary_on_path(name: &str) -> bool {
  let Some(path) = std::env::var_os("PATH") else {
    return false;
  };
  std::env::split_paths(&path).any(|dir| dir.join(name).is_file())
}

/// Root of the local CUDA installation.
fn cuda_home() -> PathBuf {
  std::env::var("CUDA_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| PathBuf::from("/usr/local/cuda"))
}

/// Fill in the missing sbsa subtree of the local CUDA installation for
/// aarch64 cross builds.
///
/// Two independent, idempotent steps: symlink the target include directory
/// to the host one if absent, and download the sbsa CUDA runtime into the
/// target lib directory if absent. Failures are logged and swallowed.
pub async fn patch_cuda_cross_env() {
  let sbsa = cuda_home().join("targets").join("sbsa-linux");

  let include = sbsa.join("include");
  if include.exists() {
    debug!(path = %include.display(), "sbsa include already present");
  } else if let Err(e) = link_host_include(&sbsa, &include).await {
    warn!(error = %e, "could not link sbsa include directory");
  }

  let lib = sbsa.join("lib");
  if lib.exists() {
    debug!(path = %lib.display(), "sbsa lib already present");
  } else if let Err(e) = fetch_sbsa_runtime(&sbsa, &lib).await {
    warn!(error = %e, "could not install sbsa CUDA runtime");
  }
}

#[cfg(unix)]
async fn link_host_include(sbsa: &Path, include: &Path) -> std::io::Result<()> {
  let host_include = cuda_home().join("targets").join("x86_64-linux").join("include");
  tokio::fs::create_dir_all(sbsa).await?;
  tokio::fs::symlink(&host_include, include).await?;
  info!(from = %include.display(), to = %host_include.display(), "linked sbsa include directory");
  Ok(())
}

#[cfg(not(unix))]
async fn link_host_include(_sbsa: &Path, _include: &Path) -> std::io::Result<()> {
  Err(std::io::Error::other("sbsa include link is only supported on unix hosts"))
}

async fn fetch_sbsa_runtime(sbsa: &Path, lib: &Path) -> Result<(), sdk::SdkError> {
  tokio::fs::create_dir_all(sbsa).await.map_err(sdk::SdkError::Io)?;

  // Stage next to the final location so the rename stays on one filesystem.
  let staging = tempfile::tempdir_in(sbsa).map_err(sdk::SdkError::Io)?;
  sdk::fetch_archive(CUDA_CUDART_SBSA_URL, staging.path()).await?;

  tokio::fs::rename(staging.path().join("lib"), lib)
    .await
    .map_err(sdk::SdkError::Io)?;
  info!(path = %lib.display(), "installed sbsa CUDA runtime");
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;
  use tempfile::TempDir;

  fn linux_x86() -> PlatformFacts {
    PlatformFacts::new(Os::Linux, HostArch::X86_64)
  }

  fn options(version: &str) -> BuildOptions {
    BuildOptions {
      version: version.to_string(),
      ..Default::default()
    }
  }

  #[test]
  fn first_candidate_takes_priority_order() {
    let found = first_candidate(&["g++-11", "g++-12", "g++"], |name| name != "g++-11");
    assert_eq!(found, Some("g++-12"));
  }

  #[test]
  fn first_candidate_none_when_all_missing() {
    assert_eq!(first_candidate(&["a", "b"], |_| false), None);
  }

  #[test]
  fn native_linux_forces_compilers() {
    let layout = Layout::new("/work");
    let config = resolve_with(&linux_x86(), &options("1.20.0"), &layout, |_| false).unwrap();

    assert!(config.env.contains(&("CC".to_string(), "gcc-12".to_string())));
    assert!(config.env.contains(&("CXX".to_string(), "g++-12".to_string())));
    assert!(!config.env.iter().any(|(k, _)| k == "CUDAHOSTCXX"));
  }

  #[test]
  fn native_linux_cuda_adds_host_compiler() {
    let layout = Layout::new("/work");
    let opts = BuildOptions {
      cuda: true,
      ..options("1.20.0")
    };
    let config = resolve_with(&linux_x86(), &opts, &layout, |_| false).unwrap();

    assert!(config.env.contains(&("CUDAHOSTCXX".to_string(), "g++-12".to_string())));
  }

  #[test]
  fn cross_cuda_probes_candidates_in_order() {
    let layout = Layout::new("/work");
    let opts = BuildOptions {
      cuda: true,
      arch: TargetArch::Aarch64,
      ..options("1.20.0")
    };
    let config = resolve_with(&linux_x86(), &opts, &layout, |name| name == "aarch64-linux-gnu-g++-11").unwrap();

    assert!(
      config
        .early_flags
        .contains(&"-DCMAKE_CUDA_HOST_COMPILER=aarch64-linux-gnu-g++-11".to_string())
    );
    assert!(
      config
        .early_flags
        .contains(&format!("-DCMAKE_TOOLCHAIN_FILE={}", "/work/toolchains/aarch64-linux-gnu.cmake"))
    );
    assert!(config.cuda_flags.is_empty());
  }

  #[test]
  fn cross_cuda_gcc12_switches_toolchain_file() {
    let layout = Layout::new("/work");
    let opts = BuildOptions {
      cuda: true,
      arch: TargetArch::Aarch64,
      ..options("1.20.0")
    };
    let config = resolve_with(&linux_x86(), &opts, &layout, |name| name == "aarch64-linux-gnu-g++-12").unwrap();

    assert!(config.early_flags.contains(&format!(
      "-DCMAKE_TOOLCHAIN_FILE={}",
      "/work/toolchains/aarch64-linux-gnu-gcc12.cmake"
    )));
    assert_eq!(config.cuda_flags, vec!["-allow-unsupported-compiler"]);
  }

  #[test]
  fn cross_cuda_falls_back_when_nothing_found() {
    let layout = Layout::new("/work");
    let opts = BuildOptions {
      cuda: true,
      arch: TargetArch::Aarch64,
      ..options("1.20.0")
    };
    let config = resolve_with(&linux_x86(), &opts, &layout, |_| false).unwrap();

    assert!(
      config
        .early_flags
        .contains(&"-DCMAKE_CUDA_HOST_COMPILER=aarch64-linux-gnu-g++".to_string())
    );
  }

  #[test]
  fn cross_without_cuda_requires_local_toolchain_file() {
    let temp = TempDir::new().unwrap();
    let layout = Layout::new(temp.path());
    let opts = BuildOptions {
      arch: TargetArch::Aarch64,
      ..options("1.20.0")
    };

    let err = resolve_with(&linux_x86(), &opts, &layout, |_| false).unwrap_err();
    assert!(matches!(err, ToolchainError::MissingToolchainFile(_)));

    std::fs::create_dir_all(temp.path().join("toolchains")).unwrap();
    std::fs::write(temp.path().join("toolchains").join("aarch64-linux-gnu.cmake"), "").unwrap();

    let config = resolve_with(&linux_x86(), &opts, &layout, |_| false).unwrap();
    assert!(config.early_flags.iter().any(|f| f.starts_with("-DCMAKE_TOOLCHAIN_FILE=")));
    assert!(config.env.is_empty());
  }

  #[test]
  fn windows_selects_generator_and_platform_switch() {
    let layout = Layout::new("/work");
    let facts = PlatformFacts::new(Os::Windows, HostArch::X86_64);
    let opts = BuildOptions {
      arch: TargetArch::Aarch64,
      ..options("1.20.0")
    };
    let config = resolve_with(&facts, &opts, &layout, |_| false).unwrap();

    assert_eq!(config.early_flags, vec!["-G", "Visual Studio 17 2022", "-A", "ARM64"]);
  }

  #[test]
  fn windows_native_target_has_no_platform_switch() {
    let layout = Layout::new("/work");
    let facts = PlatformFacts::new(Os::Windows, HostArch::X86_64);
    let config = resolve_with(&facts, &options("1.20.0"), &layout, |_| false).unwrap();

    assert_eq!(config.early_flags, vec!["-G", "Visual Studio 17 2022"]);
  }

  #[test]
  #[serial]
  fn android_requires_ndk_and_sdk_env() {
    let layout = Layout::new("/work");
    let opts = BuildOptions {
      android: true,
      ..options("1.20.0")
    };

    temp_env::with_vars_unset(["ANDROID_NDK_HOME", "ANDROID_HOME"], || {
      let err = resolve_with(&linux_x86(), &opts, &layout, |_| false).unwrap_err();
      assert!(matches!(
        err,
        ToolchainError::MissingEnv {
          var: "ANDROID_NDK_HOME",
          ..
        }
      ));
    });
  }

  #[test]
  #[serial]
  fn android_emits_abi_platform_and_toolchain() {
    let layout = Layout::new("/work");
    let opts = BuildOptions {
      android: true,
      ..options("1.20.0")
    };

    temp_env::with_vars(
      [
        ("ANDROID_NDK_HOME", Some("/opt/ndk")),
        ("ANDROID_HOME", Some("/opt/sdk")),
        ("ANDROID_API", Some("30")),
      ],
      || {
        let config = resolve_with(&linux_x86(), &opts, &layout, |_| false).unwrap();
        assert!(config.early_flags.contains(&"-DANDROID_ABI=arm64-v8a".to_string()));
        assert!(config.early_flags.contains(&"-DANDROID_PLATFORM=android-30".to_string()));
        assert!(
          config
            .early_flags
            .iter()
            .any(|f| f.ends_with("build/cmake/android.toolchain.cmake"))
        );
        // No native compiler override on Android.
        assert!(config.env.is_empty());
      },
    );
  }

  #[test]
  #[serial]
  fn android_on_darwin_is_rejected() {
    let layout = Layout::new("/work");
    let facts = PlatformFacts::new(Os::Darwin, HostArch::Aarch64);
    let opts = BuildOptions {
      android: true,
      ..options("1.20.0")
    };

    let err = resolve_with(&facts, &opts, &layout, |_| false).unwrap_err();
    assert!(matches!(err, ToolchainError::UnsupportedHost { target: "Android", .. }));
  }

  #[test]
  #[serial]
  fn ios_requires_deployment_target() {
    let layout = Layout::new("/work");
    let facts = PlatformFacts::new(Os::Darwin, HostArch::Aarch64);
    let opts = BuildOptions {
      iphoneos: true,
      ..options("1.20.0")
    };

    temp_env::with_var_unset("IPHONEOS_DEPLOYMENT_TARGET", || {
      let err = resolve_with(&facts, &opts, &layout, |_| false).unwrap_err();
      assert!(matches!(
        err,
        ToolchainError::MissingEnv {
          var: "IPHONEOS_DEPLOYMENT_TARGET",
          ..
        }
      ));
    });

    temp_env::with_var("IPHONEOS_DEPLOYMENT_TARGET", Some("16.0"), || {
      let config = resolve_with(&facts, &opts, &layout, |_| false).unwrap();
      assert!(config.early_flags.contains(&"-DCMAKE_OSX_SYSROOT=iphoneos".to_string()));
    });
  }

  #[test]
  #[serial]
  fn simulator_picks_simulator_sysroot() {
    let layout = Layout::new("/work");
    let facts = PlatformFacts::new(Os::Darwin, HostArch::Aarch64);
    let opts = BuildOptions {
      iphonesimulator: true,
      ..options("1.20.0")
    };

    temp_env::with_var("IPHONEOS_DEPLOYMENT_TARGET", Some("16.0"), || {
      let config = resolve_with(&facts, &opts, &layout, |_| false).unwrap();
      assert!(
        config
          .early_flags
          .contains(&"-DCMAKE_OSX_SYSROOT=iphonesimulator".to_string())
      );
    });
  }

  #[test]
  fn ninja_generator_on_non_windows() {
    let layout = Layout::new("/work");
    let opts = BuildOptions {
      ninja: true,
      ..options("1.20.0")
    };
    let config = resolve_with(&linux_x86(), &opts, &layout, |_| false).unwrap();
    assert_eq!(config.early_flags.first().map(String::as_str), Some("-GNinja"));
  }
}
