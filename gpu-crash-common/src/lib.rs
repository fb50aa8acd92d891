//! This crate defines [structs for the on-disk GPU dump format](format/index.html), the
//! [operation and allocation tables](ops/index.html) shared by the breadcrumb recorder
//! and the device-removed reporter, [shader identifiers](ids/index.html), and
//! [status codes](errors/index.html) reported by graphics drivers.
//!
//! You probably don't want to use this crate directly, the `gpu-dump` crate provides
//! the actual functionality of reading GPU dumps using the structs defined in this crate.

pub mod errors;
pub mod format;
pub mod ids;
pub mod ops;
pub mod utils;
