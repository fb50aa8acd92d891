// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! A parser for GPU crash dumps.
//!
//! GPU crash dumps are produced by the driver's crash dump subsystem when a
//! device is lost. They are laid out like minidumps: a header, a directory of
//! streams, and the stream payloads. This crate reads that container and decodes
//! each stream into plain Rust types.
//!
//! # Example
//!
//! ```no_run
//! use gpu_dump::{DumpDecoder, GpuDump};
//!
//! let dump = GpuDump::read_path("app-1234-0.dump")?;
//! match dump.device_info() {
//!     Ok(info) => println!("device status: {:?}", info.status),
//!     Err(e) => println!("no device info: {e}"),
//! }
//! # Ok::<(), gpu_dump::Error>(())
//! ```

pub use gpu_crash_common::format;
pub use gpu_crash_common::ids::{DebugInfoId, ShaderHash};

mod decoder;
mod dump;

pub use decoder::*;
pub use dump::*;
