//! Auxiliary SDK download and extraction.
//!
//! cuDNN, TensorRT and TensorRT-RTX ship as large vendor archives with a
//! single top-level directory. Each is extracted into a fixed destination
//! with that first path component stripped, so the SDK root is flat.
//!
//! Re-runs are idempotent: a non-empty destination is left alone, an empty
//! one is removed and refetched. Fetch and extraction failures are fatal
//! with no retry.

use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use thiserror::Error;
use tracing::{debug, info};
use xz2::read::XzDecoder;

use crate::layout::Layout;
use crate::options::TargetArch;
use crate::platform::Os;

const CUDNN_URL_LINUX_X86_64: &str =
  "https://developer.download.nvidia.com/compute/cudnn/redist/cudnn/linux-x86_64/cudnn-linux-x86_64-9.2.1.18_cuda12-archive.tar.xz";
const CUDNN_URL_LINUX_AARCH64: &str =
  "https://developer.download.nvidia.com/compute/cudnn/redist/cudnn/linux-sbsa/cudnn-linux-sbsa-9.2.1.18_cuda12-archive.tar.xz";
const CUDNN_URL_WINDOWS_X86_64: &str =
  "https://developer.download.nvidia.com/compute/cudnn/redist/cudnn/windows-x86_64/cudnn-windows-x86_64-9.2.1.18_cuda12-archive.zip";

const TENSORRT_URL_LINUX: &str =
  "https://developer.nvidia.com/downloads/compute/machine-learning/tensorrt/10.4.0/tars/TensorRT-10.4.0.26.Linux.x86_64-gnu.cuda-12.6.tar.gz";
const TENSORRT_URL_WINDOWS: &str =
  "https://developer.nvidia.com/downloads/compute/machine-learning/tensorrt/10.4.0/zips/TensorRT-10.4.0.26.Windows.win10.x86_64.cuda-12.6.zip";

const TENSORRT_RTX_URL_LINUX: &str =
  "https://developer.nvidia.com/downloads/trt/rtx_sdk/secure/1.0/TensorRT-RTX-1.0.0.21.Linux.x86_64-gnu.cuda-12.9.tar.gz";
const TENSORRT_RTX_URL_WINDOWS: &str =
  "https://developer.nvidia.com/downloads/trt/rtx_sdk/secure/1.0/TensorRT-RTX-1.0.0.21.Windows.win10.x86_64.cuda-12.9.zip";

/// Errors raised while fetching or extracting an SDK. All are fatal.
#[derive(Debug, Error)]
pub enum SdkError {
  #[error("no {sdk} archive exists for {os}/{arch}")]
  UnsupportedPlatform {
    sdk: &'static str,
    os: &'static str,
    arch: &'static str,
  },

  #[error("fetch failed for {url}: {message}")]
  FetchFailed { url: String, message: String },

  #[error("unsupported archive format: {0}")]
  UnsupportedArchive(String),

  #[error("failed to extract archive: {0}")]
  Extract(String),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// The auxiliary SDKs the pipeline knows how to stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sdk {
  Cudnn,
  TensorRt,
  TensorRtRtx,
}

impl Sdk {
  pub const fn name(&self) -> &'static str {
    match self {
      Sdk::Cudnn => "cuDNN",
      Sdk::TensorRt => "TensorRT",
      Sdk::TensorRtRtx => "TensorRT-RTX",
    }
  }

  pub fn dest(&self, layout: &Layout) -> PathBuf {
    match self {
      Sdk::Cudnn => layout.cudnn_dir(),
      Sdk::TensorRt => layout.tensorrt_dir(),
      Sdk::TensorRtRtx => layout.tensorrt_rtx_dir(),
    }
  }

  /// The pinned archive URL for this SDK on the given platform. cuDNN is
  /// selected by platform and architecture; the TensorRT archives only by
  /// platform.
  pub fn url(&self, os: Os, arch: TargetArch) -> Result<&'static str, SdkError> {
    let url = match (self, os, arch) {
      (Sdk::Cudnn, Os::Linux, TargetArch::X86_64) => Some(CUDNN_URL_LINUX_X86_64),
      (Sdk::Cudnn, Os::Linux, TargetArch::Aarch64) => Some(CUDNN_URL_LINUX_AARCH64),
      (Sdk::Cudnn, Os::Windows, TargetArch::X86_64) => Some(CUDNN_URL_WINDOWS_X86_64),
      (Sdk::TensorRt, Os::Linux, _) => Some(TENSORRT_URL_LINUX),
      (Sdk::TensorRt, Os::Windows, _) => Some(TENSORRT_URL_WINDOWS),
      (Sdk::TensorRtRtx, Os::Linux, _) => Some(TENSORRT_RTX_URL_LINUX),
      (Sdk::TensorRtRtx, Os::Windows, _) => Some(TENSORRT_RTX_URL_WINDOWS),
      _ => None,
    };
    url.ok_or(SdkError::UnsupportedPlatform {
      sdk: self.name(),
      os: os.as_str(),
      arch: arch.as_str(),
    })
  }
}

/// Outcome of an [`ensure`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
  /// Destination was already populated; nothing was fetched.
  Skipped,
  /// Archive was downloaded and extracted.
  Fetched,
}

/// Make sure the SDK is staged in its destination directory.
pub async fn ensure(sdk: Sdk, layout: &Layout, os: Os, arch: TargetArch) -> Result<EnsureOutcome, SdkError> {
  let dest = sdk.dest(layout);

  if dest.is_dir() {
    if !dir_is_empty(&dest)? {
      info!(sdk = sdk.name(), path = %dest.display(), "already staged, skipping fetch");
      return Ok(EnsureOutcome::Skipped);
    }
    debug!(sdk = sdk.name(), path = %dest.display(), "destination empty, refetching");
    tokio::fs::remove_dir_all(&dest).await?;
  }

  let url = sdk.url(os, arch)?;
  fetch_archive(url, &dest).await?;
  info!(sdk = sdk.name(), path = %dest.display(), "staged");
  Ok(EnsureOutcome::Fetched)
}

/// Download an archive and extract it into `dest`, stripping the first
/// path component.
pub(crate) async fn fetch_archive(url: &str, dest: &Path) -> Result<(), SdkError> {
  info!(url = %url, "fetching archive");

  let response = reqwest::get(url).await.map_err(|e| SdkError::FetchFailed {
    url: url.to_string(),
    message: e.to_string(),
  })?;

  if !response.status().is_success() {
    return Err(SdkError::FetchFailed {
      url: url.to_string(),
      message: format!("HTTP {}", response.status()),
    });
  }

  let bytes = response.bytes().await.map_err(|e| SdkError::FetchFailed {
    url: url.to_string(),
    message: e.to_string(),
  })?;
  debug!(size = bytes.len(), "download complete");

  // Spool to disk; the zip reader needs a seekable file.
  let spool_dir = tempfile::tempdir()?;
  let spool_path = spool_dir.path().join(archive_filename(url));
  let mut spool = File::create(&spool_path)?;
  spool.write_all(&bytes)?;
  spool.flush()?;
  drop(spool);

  extract_archive(&spool_path, dest)
}

/// Extract a local archive into `dest`, stripping the first path
/// component. Format is chosen by file extension.
pub(crate) fn extract_archive(archive_path: &Path, dest: &Path) -> Result<(), SdkError> {
  let name = archive_path.to_string_lossy();
  std::fs::create_dir_all(dest)?;

  if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
    let file = File::open(archive_path)?;
    unpack_tar(GzDecoder::new(BufReader::new(file)), dest)
  } else if name.ends_with(".tar.xz") {
    let file = File::open(archive_path)?;
    unpack_tar(XzDecoder::new(BufReader::new(file)), dest)
  } else if name.ends_with(".zip") {
    unpack_zip(archive_path, dest)
  } else {
    Err(SdkError::UnsupportedArchive(name.into_owned()))
  }
}

fn unpack_tar<R: Read>(reader: R, dest: &Path) -> Result<(), SdkError> {
  let mut archive = Archive::new(reader);

  for entry in archive.entries()? {
    let mut entry = entry?;
    let path = entry.path()?;

    // Drop the archive's top-level directory.
    let stripped: PathBuf = path.components().skip(1).collect();
    if stripped.as_os_str().is_empty() {
      continue;
    }

    let dest_path = dest.join(&stripped);
    if let Some(parent) = dest_path.parent() {
      std::fs::create_dir_all(parent)?;
    }
    entry.unpack(&dest_path)?;
  }

  Ok(())
}

fn unpack_zip(archive_path: &Path, dest: &Path) -> Result<(), SdkError> {
  let file = File::open(archive_path)?;
  let mut archive = zip::ZipArchive::new(BufReader::new(file)).map_err(|e| SdkError::Extract(e.to_string()))?;

  for i in 0..archive.len() {
    let mut entry = archive.by_index(i).map_err(|e| SdkError::Extract(e.to_string()))?;

    let Some(path) = entry.enclosed_name() else {
      return Err(SdkError::Extract(format!("unsafe zip entry name: {}", entry.name())));
    };

    let stripped: PathBuf = path.components().skip(1).collect();
    if stripped.as_os_str().is_empty() {
      continue;
    }

    let dest_path = dest.join(&stripped);
    if entry.is_dir() {
      std::fs::create_dir_all(&dest_path)?;
    } else {
      if let Some(parent) = dest_path.parent() {
        std::fs::create_dir_all(parent)?;
      }
      let mut outfile = File::create(&dest_path)?;
      std::io::copy(&mut entry, &mut outfile)?;
    }
  }

  Ok(())
}

fn dir_is_empty(path: &Path) -> Result<bool, std::io::Error> {
  Ok(std::fs::read_dir(path)?.next().is_none())
}

/// Last path segment of the URL, so the spool file keeps the extension
/// the extractor dispatches on.
fn archive_filename(url: &str) -> String {
  url
    .rsplit('/')
    .next()
    .filter(|name| !name.is_empty())
    .unwrap_or("archive")
    .to_string()
}

#[cfg(test)]
mod tests {
  use super::*;
  use flate2::Compression;
  use flate2::write::GzEncoder;
  use tempfile::TempDir;

  #[test]
  fn cudnn_url_varies_by_platform_and_arch() {
    let linux_x86 = Sdk::Cudnn.url(Os::Linux, TargetArch::X86_64).unwrap();
    let linux_arm = Sdk::Cudnn.url(Os::Linux, TargetArch::Aarch64).unwrap();
    let windows = Sdk::Cudnn.url(Os::Windows, TargetArch::X86_64).unwrap();

    assert!(linux_x86.contains("linux-x86_64"));
    assert!(linux_arm.contains("linux-sbsa"));
    assert!(windows.ends_with(".zip"));
    assert_ne!(linux_x86, linux_arm);
  }

  #[test]
  fn cudnn_windows_aarch64_is_unsupported() {
    let err = Sdk::Cudnn.url(Os::Windows, TargetArch::Aarch64).unwrap_err();
    assert!(matches!(err, SdkError::UnsupportedPlatform { sdk: "cuDNN", .. }));
  }

  #[test]
  fn tensorrt_url_depends_on_platform_only() {
    let x86 = Sdk::TensorRt.url(Os::Linux, TargetArch::X86_64).unwrap();
    let arm = Sdk::TensorRt.url(Os::Linux, TargetArch::Aarch64).unwrap();
    assert_eq!(x86, arm);
  }

  #[test]
  fn no_sdk_archives_on_darwin() {
    for sdk in [Sdk::Cudnn, Sdk::TensorRt, Sdk::TensorRtRtx] {
      assert!(sdk.url(Os::Darwin, TargetArch::X86_64).is_err());
    }
  }

  #[tokio::test]
  async fn ensure_skips_populated_destination() {
    let temp = TempDir::new().unwrap();
    let layout = Layout::new(temp.path());
    let dest = layout.cudnn_dir();
    std::fs::create_dir_all(dest.join("include")).unwrap();
    std::fs::write(dest.join("include").join("cudnn.h"), "// header").unwrap();

    // No network access may happen here; a populated directory short-circuits.
    let outcome = ensure(Sdk::Cudnn, &layout, Os::Linux, TargetArch::X86_64).await.unwrap();
    assert_eq!(outcome, EnsureOutcome::Skipped);
  }

  #[test]
  fn archive_filename_from_url() {
    assert_eq!(
      archive_filename("https://example.com/downloads/TensorRT-10.4.0.26.tar.gz"),
      "TensorRT-10.4.0.26.tar.gz"
    );
    assert_eq!(archive_filename("https://example.com/"), "archive");
  }

  fn build_tar_gz(entries: &[(&str, &str)]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (path, content) in entries {
      let mut header = tar::Header::new_gnu();
      header.set_size(content.len() as u64);
      header.set_mode(0o644);
      header.set_cksum();
      builder.append_data(&mut header, *path, content.as_bytes()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
  }

  #[test]
  fn extraction_strips_first_component() {
    let temp = TempDir::new().unwrap();
    let archive_path = temp.path().join("cudnn-linux-x86_64-9.2.1.18_cuda12-archive.tar.gz");
    let data = build_tar_gz(&[
      ("cudnn-linux-x86_64-9.2.1.18_cuda12-archive/include/cudnn.h", "// cudnn"),
      ("cudnn-linux-x86_64-9.2.1.18_cuda12-archive/lib/libcudnn.so", "elf"),
    ]);
    std::fs::write(&archive_path, data).unwrap();

    let dest = temp.path().join("cudnn");
    extract_archive(&archive_path, &dest).unwrap();

    assert!(dest.join("include").join("cudnn.h").is_file());
    assert!(dest.join("lib").join("libcudnn.so").is_file());
    assert!(!dest.join("cudnn-linux-x86_64-9.2.1.18_cuda12-archive").exists());
  }

  #[test]
  fn unknown_archive_format_is_rejected() {
    let temp = TempDir::new().unwrap();
    let archive_path = temp.path().join("sdk.rar");
    std::fs::write(&archive_path, b"not an archive").unwrap();

    let err = extract_archive(&archive_path, &temp.path().join("out")).unwrap_err();
    assert!(matches!(err, SdkError::UnsupportedArchive(_)));
  }

  #[test]
  fn empty_dir_detection() {
    let temp = TempDir::new().unwrap();
    assert!(dir_is_empty(temp.path()).unwrap());
    std::fs::write(temp.path().join("marker"), "").unwrap();
    assert!(!dir_is_empty(temp.path()).unwrap());
  }
}
