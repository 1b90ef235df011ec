//! ortbuild-lib: pipeline logic for building ONNX Runtime from source.
//!
//! The build is a single linear pipeline:
//! - `options`: parsed build options and their dependency validation
//! - `source`: pinned upstream checkout, reset and patch application
//! - `toolchain`: compiler/environment policy per host and target
//! - `flags`: deterministic CMake flag assembly
//! - `sdk`: idempotent download of auxiliary SDKs (cuDNN, TensorRT)
//! - `invoke`: the configure/build/install invocations
//!
//! `pipeline::run` drives the stages in order; nothing loops back.

pub mod flags;
pub mod invoke;
pub mod layout;
pub mod options;
pub mod pipeline;
pub mod platform;
pub mod sdk;
pub mod source;
pub mod toolchain;
