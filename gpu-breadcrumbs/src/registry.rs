//! The set of command streams that are alive, for reporting after a GPU fault.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use tracing::debug;

use crate::buffer::BreadcrumbBuffer;
use crate::recorder::CommandListType;

/// Identifies a registered stream.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct StreamId(pub u64);

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

impl StreamId {
    pub(crate) fn next() -> StreamId {
        StreamId(NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A registered stream's history.
#[derive(Debug)]
pub struct StreamRecord {
    pub id: StreamId,
    pub list_type: CommandListType,
    pub buffer: Arc<BreadcrumbBuffer>,
}

/// A mutex-guarded map of live stream histories.
///
/// Streams add themselves on construction and remove themselves on drop, and
/// both take the same lock as [`LiveStreamRegistry::print_all`], so a report
/// only ever sees whole streams.
#[derive(Debug, Default)]
pub struct LiveStreamRegistry {
    streams: Mutex<BTreeMap<StreamId, Arc<StreamRecord>>>,
}

static GLOBAL: OnceLock<Arc<LiveStreamRegistry>> = OnceLock::new();

impl LiveStreamRegistry {
    pub fn new() -> LiveStreamRegistry {
        LiveStreamRegistry::default()
    }

    /// The process-wide registry.
    pub fn global() -> Arc<LiveStreamRegistry> {
        GLOBAL
            .get_or_init(|| Arc::new(LiveStreamRegistry::new()))
            .clone()
    }

    // A panic while printing must not disable reporting for the rest of the process.
    fn lock(&self) -> MutexGuard<'_, BTreeMap<StreamId, Arc<StreamRecord>>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, record: StreamRecord) {
        debug!("registry: adding stream {:?}", record.id);
        self.lock().insert(record.id, Arc::new(record));
    }

    /// Returns false if `id` was not registered.
    pub fn remove(&self, id: StreamId) -> bool {
        debug!("registry: removing stream {:?}", id);
        self.lock().remove(&id).is_some()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Print the history of every live stream and return how many were printed.
    pub fn print_all<T: Write + ?Sized>(&self, w: &mut T) -> io::Result<usize> {
        let streams = self.lock();
        for record in streams.values() {
            writeln!(
                w,
                "Command list {} ({:?}):",
                record.id.0, record.list_type
            )?;
            record.buffer.print(w)?;
        }
        Ok(streams.len())
    }
}
