//! Produces human-readable reports of GPU crashes and device removals.
//!
//! There are three sources of information about a dead GPU, and this crate
//! reports on all of them:
//!
//! * a vendor crash-dump service, which hands over a [GPU dump][gpu_dump] that
//!   a [`CrashDumpTracker`] persists and decodes into a [`CrashReport`],
//! * the runtime's own device-removed diagnostics, printed by the
//!   [`DeviceRemovedReporter`],
//! * the application's own breadcrumbs, kept by the streams registered in the
//!   process-wide [`LiveStreamRegistry`].
//!
//! The free functions at the top level manage a single process-wide tracker
//! and are what an application normally calls.
//!
//! # Example
//!
//! ```
//! use gpu_crash_processor::*;
//! use std::sync::Arc;
//!
//! let out = std::env::temp_dir().join("gpu-crash-processor-doc");
//! let service = Arc::new(LocalCrashDumpService::new());
//! assert!(init_crash_tracker(TrackerConfig::new(&out), service.clone()));
//!
//! let mut report = Vec::new();
//! report_custom_breadcrumbs_to(&mut report, StatusCode::DEVICE_HUNG).unwrap();
//! term_crash_tracker();
//! ```

use std::io::{self, Write};
use std::sync::atomic::AtomicU32;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use gpu_breadcrumbs::LiveStreamRegistry;
use tracing::{error, warn};

mod device_removed;
mod report;
mod resolver;
mod service;
mod tracker;

pub use crate::device_removed::*;
pub use crate::report::*;
pub use crate::resolver::*;
pub use crate::service::*;
pub use crate::tracker::*;

pub use gpu_crash_common::errors::StatusCode;

static TRACKER: Mutex<Option<CrashDumpTracker>> = Mutex::new(None);

/// Dump numbering, shared by every tracker the facade creates.
static DUMP_COUNT: OnceLock<Arc<AtomicU32>> = OnceLock::new();

fn tracker() -> MutexGuard<'static, Option<CrashDumpTracker>> {
    TRACKER.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Start collecting crash dumps from `service`. Returns false if registration failed.
///
/// A tracker that is already running is terminated first.
pub fn init_crash_tracker(config: TrackerConfig, service: Arc<dyn CrashDumpService>) -> bool {
    let mut slot = tracker();
    if let Some(mut old) = slot.take() {
        warn!("crash tracker already initialized, replacing it");
        old.term();
    }
    let dump_count = DUMP_COUNT.get_or_init(Arc::default).clone();
    let mut new = CrashDumpTracker::with_dump_counter(service, dump_count);
    match new.init(config) {
        Ok(()) => {
            *slot = Some(new);
            true
        }
        Err(e) => {
            error!("{}", e);
            false
        }
    }
}

/// Stop collecting crash dumps. Does nothing if no tracker is running.
pub fn term_crash_tracker() {
    if let Some(mut old) = tracker().take() {
        old.term();
    }
}

/// Associate `label` with an event marker token in the running tracker.
pub fn register_marker(token: u64, label: impl Into<String>) {
    match tracker().as_ref() {
        Some(tracker) => tracker.register_marker(token, label),
        None => warn!("no crash tracker running, marker {:#x} not registered", token),
    }
}

/// Print the breadcrumbs of every live instrumented stream to stderr.
pub fn report_custom_breadcrumbs(status: StatusCode) {
    if let Err(e) = report_custom_breadcrumbs_to(&mut io::stderr(), status) {
        error!("failed to print breadcrumbs: {}", e);
    }
}

/// Print the breadcrumbs of every live instrumented stream to `w`.
///
/// Returns how many streams were printed.
pub fn report_custom_breadcrumbs_to<W: Write + ?Sized>(
    w: &mut W,
    status: StatusCode,
) -> io::Result<usize> {
    writeln!(w, "Breadcrumbs for {status}:")?;
    let printed = LiveStreamRegistry::global().print_all(w)?;
    if printed == 0 {
        writeln!(w, "  no live command lists")?;
    }
    Ok(printed)
}

/// Report a device removal to stderr.
///
/// See [`report_device_removed_to`].
pub fn report_device_removed(status: StatusCode, device: &dyn DiagnosticDevice) {
    if let Err(e) = report_device_removed_to(&mut io::stderr(), status, device) {
        error!("failed to print device removed report: {}", e);
    }
}

/// Report a device removal to `w`: the device's own diagnostics, then the
/// breadcrumbs of every live stream. If a tracker is running, this then waits
/// for its service to finish the crash dump.
pub fn report_device_removed_to<W: Write + ?Sized>(
    w: &mut W,
    status: StatusCode,
    device: &dyn DiagnosticDevice,
) -> io::Result<()> {
    DeviceRemovedReporter::report(w, status, device)?;
    writeln!(w)?;
    report_custom_breadcrumbs_to(w, status)?;
    w.flush()?;

    // Poll without holding the tracker lock.
    let waiting = tracker()
        .as_ref()
        .and_then(|tracker| Some((tracker.registered_service()?, tracker.dump_timeout())));
    if let Some((service, timeout)) = waiting {
        let status = crate::tracker::wait_for_service(&*service, timeout);
        if status != CrashDumpStatus::Finished {
            warn!("crash dump did not finish: {:?}", status);
        }
    }
    Ok(())
}
