//! Reporting the runtime's own diagnostics after a device removal.
//!
//! When the device is removed, the graphics runtime can hand back its own
//! auto-breadcrumbs (one node per command list it saw in flight) and, for page
//! faults, the allocations around the faulting address. These come in several
//! interface versions that carry progressively more detail; the reporter opens
//! the newest one the device supports.

use std::io::{self, Write};
use std::sync::Mutex;

use gpu_crash_common::errors::StatusCode;
use gpu_crash_common::ops::{allocation_type_name, operation_name};
use tracing::{debug, info, warn};

/// Versions of the device-removed diagnostics interface.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum DredVersion {
    V1_0,
    /// Adds object addresses of command lists, queues and allocations.
    V1_1,
    /// Adds breadcrumb context strings, resource metadata and the device state.
    V1_2,
}

impl DredVersion {
    /// The order versions are tried in.
    pub const NEGOTIATION_ORDER: [DredVersion; 3] =
        [DredVersion::V1_2, DredVersion::V1_1, DredVersion::V1_0];

    pub fn carries_addresses(self) -> bool {
        self >= DredVersion::V1_1
    }

    pub fn carries_details(self) -> bool {
        self >= DredVersion::V1_2
    }

    pub fn label(self) -> &'static str {
        match self {
            DredVersion::V1_0 => "1.0",
            DredVersion::V1_1 => "1.1",
            DredVersion::V1_2 => "1.2",
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum DeviceState {
    Unknown,
    Hung,
    Fault,
    PageFault,
}

/// How far the GPU got through a command list.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum NodeProgress {
    Completed,
    NotStarted,
    NotCompleted,
}

impl NodeProgress {
    pub fn label(self) -> &'static str {
        match self {
            NodeProgress::Completed => "Completed",
            NodeProgress::NotStarted => "Not Started",
            NodeProgress::NotCompleted => "Not Completed",
        }
    }
}

/// The runtime's breadcrumbs for one command list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BreadcrumbNode {
    pub command_list_name: Option<String>,
    pub command_queue_name: Option<String>,
    pub command_list: Option<u64>,
    pub command_queue: Option<u64>,
    /// How many operations of `history` the GPU completed.
    pub last_breadcrumb_value: u32,
    /// Raw operation tags, in recording order.
    pub history: Vec<u32>,
    /// Strings attached to entries of `history`, by index.
    pub contexts: Vec<(u32, String)>,
}

impl BreadcrumbNode {
    pub fn progress(&self) -> NodeProgress {
        let last = self.last_breadcrumb_value;
        if last == 0 {
            NodeProgress::NotStarted
        } else if self.history.len() as u64 == u64::from(last) {
            NodeProgress::Completed
        } else {
            NodeProgress::NotCompleted
        }
    }

    /// `OK`, `NG` or blank for the history entry at `index`.
    pub fn entry_status(&self, index: u32) -> &'static str {
        match index.cmp(&self.last_breadcrumb_value) {
            std::cmp::Ordering::Less => "OK",
            std::cmp::Ordering::Equal => "NG",
            std::cmp::Ordering::Greater => "",
        }
    }

    fn context(&self, index: u32) -> Option<&str> {
        self.contexts
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, s)| s.as_str())
    }
}

/// Description of the resource behind an allocation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceMetadata {
    pub width: u64,
    pub height: u32,
    pub depth_or_array_size: u16,
    pub mip_levels: u16,
    pub format: u32,
    pub heap_flags: u32,
}

/// An allocation near a faulting address.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AllocationNode {
    pub object_name: Option<String>,
    /// A raw allocation type value.
    pub allocation_type: u32,
    pub object: Option<u64>,
    pub resource: Option<ResourceMetadata>,
}

pub type NodeIter<'a, T> = Box<dyn Iterator<Item = T> + 'a>;

/// The page fault part of a diagnostics snapshot.
pub struct DredPageFault<'a> {
    pub faulting_va: u64,
    pub existing: NodeIter<'a, AllocationNode>,
    pub recently_freed: NodeIter<'a, AllocationNode>,
}

/// An opened diagnostics interface of a removed device.
pub trait DredSnapshot {
    fn version(&self) -> DredVersion;

    /// The command list nodes. The sequence can only be walked once.
    fn breadcrumbs(&self) -> Result<NodeIter<'_, BreadcrumbNode>, StatusCode>;

    fn page_fault(&self) -> Result<DredPageFault<'_>, StatusCode>;

    fn device_state(&self) -> Option<DeviceState> {
        None
    }
}

/// A device that can open its device-removed diagnostics.
pub trait DiagnosticDevice {
    fn open_diagnostics(
        &self,
        version: DredVersion,
    ) -> Result<Box<dyn DredSnapshot + '_>, StatusCode>;
}

/// Prints device-removed diagnostics.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeviceRemovedReporter;

impl DeviceRemovedReporter {
    /// Open the newest diagnostics version `device` supports.
    pub fn negotiate(device: &dyn DiagnosticDevice) -> Option<Box<dyn DredSnapshot + '_>> {
        for version in DredVersion::NEGOTIATION_ORDER {
            match device.open_diagnostics(version) {
                Ok(snapshot) => {
                    info!("opened device removed diagnostics {}", version.label());
                    return Some(snapshot);
                }
                Err(status) => {
                    debug!(
                        "device removed diagnostics {} unavailable: {}",
                        version.label(),
                        status
                    );
                }
            }
        }
        None
    }

    /// Print the device's diagnostics for a removal with `status`.
    ///
    /// Returns the version that was opened, if any.
    pub fn report<W: Write + ?Sized>(
        w: &mut W,
        status: StatusCode,
        device: &dyn DiagnosticDevice,
    ) -> io::Result<Option<DredVersion>> {
        warn!("device removed: {} {}", status, status.message());
        writeln!(w, "Device removed: {status}")?;
        writeln!(w, "  {}", status.message())?;

        let Some(snapshot) = Self::negotiate(device) else {
            writeln!(w, "Device removed extended data is not available")?;
            return Ok(None);
        };
        let version = snapshot.version();
        writeln!(w, "Device removed extended data (version {})", version.label())?;
        if version.carries_details() {
            if let Some(state) = snapshot.device_state() {
                writeln!(w, "Device state: {state:?}")?;
            }
        }
        writeln!(w)?;

        Self::print_breadcrumbs(w, snapshot.as_ref(), version)?;
        writeln!(w)?;
        Self::print_page_fault(w, snapshot.as_ref(), version)?;
        Ok(Some(version))
    }

    fn print_breadcrumbs<W: Write + ?Sized>(
        w: &mut W,
        snapshot: &dyn DredSnapshot,
        version: DredVersion,
    ) -> io::Result<()> {
        let nodes = match snapshot.breadcrumbs() {
            Ok(nodes) => nodes,
            Err(status) => {
                warn!("breadcrumbs unavailable: {}", status);
                return writeln!(w, "Breadcrumbs: unavailable ({status})");
            }
        };
        writeln!(w, "Breadcrumbs:")?;
        let mut count = 0;
        for node in nodes {
            count += 1;
            write!(
                w,
                "  Command list {}",
                node.command_list_name.as_deref().unwrap_or("(unnamed)")
            )?;
            if version.carries_addresses() {
                if let Some(address) = node.command_list {
                    write!(w, " ({address:#x})")?;
                }
            }
            write!(
                w,
                " on queue {}",
                node.command_queue_name.as_deref().unwrap_or("(unnamed)")
            )?;
            if version.carries_addresses() {
                if let Some(address) = node.command_queue {
                    write!(w, " ({address:#x})")?;
                }
            }
            writeln!(
                w,
                ": {} ({}/{})",
                node.progress().label(),
                node.last_breadcrumb_value,
                node.history.len()
            )?;

            for (index, &op) in node.history.iter().enumerate() {
                let index = index as u32;
                let line = format!(
                    "    {:>5}: {:<48} {}",
                    index,
                    operation_name(op),
                    node.entry_status(index)
                );
                write!(w, "{}", line.trim_end())?;
                if version.carries_details() {
                    if let Some(context) = node.context(index) {
                        write!(w, " [{context}]")?;
                    }
                }
                writeln!(w)?;
            }
        }
        if count == 0 {
            writeln!(w, "  (none)")?;
        }
        Ok(())
    }

    fn print_page_fault<W: Write + ?Sized>(
        w: &mut W,
        snapshot: &dyn DredSnapshot,
        version: DredVersion,
    ) -> io::Result<()> {
        let fault = match snapshot.page_fault() {
            Ok(fault) => fault,
            Err(status) => {
                debug!("page fault data unavailable: {}", status);
                return writeln!(w, "Page fault: unavailable ({status})");
            }
        };
        writeln!(w, "Page fault at {:#018x}", fault.faulting_va)?;
        writeln!(w, "  Existing allocations:")?;
        Self::print_allocations(w, fault.existing, version)?;
        writeln!(w, "  Recently freed allocations:")?;
        Self::print_allocations(w, fault.recently_freed, version)
    }

    fn print_allocations<W: Write + ?Sized>(
        w: &mut W,
        nodes: NodeIter<'_, AllocationNode>,
        version: DredVersion,
    ) -> io::Result<()> {
        let mut count = 0;
        for node in nodes {
            count += 1;
            write!(
                w,
                "    {} {}",
                node.object_name.as_deref().unwrap_or("(unnamed)"),
                allocation_type_name(node.allocation_type)
            )?;
            if version.carries_addresses() {
                if let Some(address) = node.object {
                    write!(w, " ({address:#x})")?;
                }
            }
            if version.carries_details() {
                if let Some(ref resource) = node.resource {
                    write!(
                        w,
                        " {}x{}x{}, {} mips, format {}, heap flags {:#x}",
                        resource.width,
                        resource.height,
                        resource.depth_or_array_size,
                        resource.mip_levels,
                        resource.format,
                        resource.heap_flags
                    )?;
                }
            }
            writeln!(w)?;
        }
        if count == 0 {
            writeln!(w, "    (none)")?;
        }
        Ok(())
    }
}

/// Diagnostics captured ahead of time, for devices without a live runtime
/// behind them.
///
/// Only the versions in `supported` open; every attempt is recorded.
#[derive(Debug, Default)]
pub struct RecordedDiagnostics {
    pub supported: Vec<DredVersion>,
    pub breadcrumbs: Vec<BreadcrumbNode>,
    pub faulting_va: Option<u64>,
    pub existing: Vec<AllocationNode>,
    pub recently_freed: Vec<AllocationNode>,
    pub device_state: Option<DeviceState>,
    attempts: Mutex<Vec<DredVersion>>,
}

impl RecordedDiagnostics {
    pub fn new(supported: &[DredVersion]) -> RecordedDiagnostics {
        RecordedDiagnostics {
            supported: supported.to_vec(),
            ..RecordedDiagnostics::default()
        }
    }

    /// The versions `open_diagnostics` was asked for, in order.
    pub fn attempts(&self) -> Vec<DredVersion> {
        self.attempts
            .lock()
            .map(|attempts| attempts.clone())
            .unwrap_or_default()
    }
}

struct RecordedSnapshot<'a> {
    version: DredVersion,
    diagnostics: &'a RecordedDiagnostics,
}

impl DredSnapshot for RecordedSnapshot<'_> {
    fn version(&self) -> DredVersion {
        self.version
    }

    fn breadcrumbs(&self) -> Result<NodeIter<'_, BreadcrumbNode>, StatusCode> {
        Ok(Box::new(self.diagnostics.breadcrumbs.iter().cloned()))
    }

    fn page_fault(&self) -> Result<DredPageFault<'_>, StatusCode> {
        let faulting_va = self.diagnostics.faulting_va.ok_or(StatusCode::NO_INTERFACE)?;
        Ok(DredPageFault {
            faulting_va,
            existing: Box::new(self.diagnostics.existing.iter().cloned()),
            recently_freed: Box::new(self.diagnostics.recently_freed.iter().cloned()),
        })
    }

    fn device_state(&self) -> Option<DeviceState> {
        self.diagnostics.device_state
    }
}

impl DiagnosticDevice for RecordedDiagnostics {
    fn open_diagnostics(
        &self,
        version: DredVersion,
    ) -> Result<Box<dyn DredSnapshot + '_>, StatusCode> {
        if let Ok(mut attempts) = self.attempts.lock() {
            attempts.push(version);
        }
        if !self.supported.contains(&version) {
            return Err(StatusCode::NO_INTERFACE);
        }
        Ok(Box::new(RecordedSnapshot {
            version,
            diagnostics: self,
        }))
    }
}
