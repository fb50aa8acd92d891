//! The packed marker word written by the GPU.

use gpu_crash_common::ops::{operation_name, OperationTag};
use std::fmt;

/// A breadcrumb marker: `{ operation tag: bits 0..16, entered: bit 16, exited: bit 17 }`.
///
/// The same slot is written twice per instrumented command: once with the
/// entered bit before it, and once with both bits after it. A zero word was
/// never reached by the GPU.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct Marker(pub u32);

/// What a marker says about the command it brackets.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum MarkerStatus {
    /// The GPU finished the command.
    Completed,
    /// The GPU started the command but never finished it.
    InFlight,
    /// The GPU never reached the command.
    NotReached,
}

impl MarkerStatus {
    /// The status column of a breadcrumb report.
    pub fn label(self) -> &'static str {
        match self {
            MarkerStatus::Completed => "OK",
            MarkerStatus::InFlight => "NG",
            MarkerStatus::NotReached => "",
        }
    }
}

impl Marker {
    pub const TAG_MASK: u32 = 0xffff;
    pub const ENTERED: u32 = 1 << 16;
    pub const EXITED: u32 = 1 << 17;

    /// The marker written before `tag`'s command.
    pub fn entered(tag: OperationTag) -> Marker {
        Marker((tag.raw() & Marker::TAG_MASK) | Marker::ENTERED)
    }

    /// The marker written after `tag`'s command.
    pub fn exited(tag: OperationTag) -> Marker {
        Marker((tag.raw() & Marker::TAG_MASK) | Marker::ENTERED | Marker::EXITED)
    }

    pub fn tag_raw(self) -> u32 {
        self.0 & Marker::TAG_MASK
    }

    pub fn is_entered(self) -> bool {
        self.0 & Marker::ENTERED != 0
    }

    pub fn is_exited(self) -> bool {
        self.0 & Marker::EXITED != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn status(self) -> MarkerStatus {
        if self.is_exited() {
            MarkerStatus::Completed
        } else if self.is_entered() {
            MarkerStatus::InFlight
        } else {
            MarkerStatus::NotReached
        }
    }

    /// The operation name, or `UNKNOWN` for tags outside the table.
    pub fn name(self) -> &'static str {
        operation_name(self.tag_raw())
    }
}

impl fmt::Debug for Marker {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Marker")
            .field("tag", &self.name())
            .field("entered", &self.is_entered())
            .field("exited", &self.is_exited())
            .finish()
    }
}
