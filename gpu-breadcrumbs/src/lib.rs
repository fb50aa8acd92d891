//! GPU-written breadcrumbs for command lists.
//!
//! An [`InstrumentedCommandStream`] wraps a native command list and brackets
//! every command that can fault or hang the GPU with two GPU-executed writes
//! into a [`BreadcrumbBuffer`]. After a device removal the buffer tells which
//! commands finished (`OK`), which one was in flight (`NG`), and which were
//! never reached.
//!
//! Live streams register with a [`LiveStreamRegistry`] so that a crash handler
//! can print all of their histories at once.
//!
//! # Example
//!
//! ```
//! use gpu_breadcrumbs::software::SoftwareDevice;
//! use gpu_breadcrumbs::{CommandListType, InstrumentedCommandStream, LiveStreamRegistry};
//! use std::sync::Arc;
//!
//! let device = SoftwareDevice::new();
//! let registry = Arc::new(LiveStreamRegistry::new());
//! let mut stream =
//!     InstrumentedCommandStream::new(&device, CommandListType::Direct, registry.clone()).unwrap();
//! stream.dispatch(8, 8, 1);
//! stream.close().unwrap();
//! device.execute(stream.recorder()).unwrap();
//!
//! let mut report = Vec::new();
//! assert_eq!(registry.print_all(&mut report).unwrap(), 1);
//! assert!(String::from_utf8(report).unwrap().contains("DISPATCH"));
//! ```

mod buffer;
mod marker;
mod recorder;
mod registry;
pub mod software;
mod stream;

pub use buffer::*;
pub use marker::*;
pub use recorder::*;
pub use registry::*;
pub use stream::*;

pub use gpu_crash_common::ops::OperationTag;
