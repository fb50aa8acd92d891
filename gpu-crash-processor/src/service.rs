//! The interface to a vendor crash-dump subsystem.
//!
//! A driver-side crash-dump service watches the GPU and, when it dies, hands the
//! application a dump buffer. While doing so it asks for a description of the
//! application, for the shader debug info blobs it saw, and for the text behind
//! event marker tokens. [`CrashDumpService`] is that subsystem and
//! [`CrashDumpHandler`] is the application's side of it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use gpu_crash_common::format::DescriptionKey;
use thiserror::Error;
use tracing::debug;

/// Progress of a crash dump through the service.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum CrashDumpStatus {
    NotStarted,
    CollectingData,
    InvokingCallback,
    Finished,
    Failed,
    Unknown,
}

impl CrashDumpStatus {
    /// Finished or failed; nothing further will happen to this dump.
    pub fn is_done(self) -> bool {
        matches!(self, CrashDumpStatus::Finished | CrashDumpStatus::Failed)
    }
}

/// Key/value pairs describing the application, collected into a dump.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CrashDumpDescription {
    entries: Vec<(u32, String)>,
}

impl CrashDumpDescription {
    pub fn new() -> CrashDumpDescription {
        CrashDumpDescription::default()
    }

    /// Add an entry. Keys are [`DescriptionKey`] values or anything above
    /// [`DescriptionKey::UserDefined`].
    pub fn add(&mut self, key: u32, value: impl Into<String>) {
        self.entries.push((key, value.into()));
    }

    pub fn add_key(&mut self, key: DescriptionKey, value: impl Into<String>) {
        self.add(key as u32, value);
    }

    /// The last value added for `key`.
    pub fn get(&self, key: u32) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn entries(&self) -> &[(u32, String)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The application's side of a crash-dump service.
///
/// Callbacks may be invoked from a thread owned by the service.
pub trait CrashDumpHandler: Send + Sync {
    /// A complete dump is available.
    fn on_crash_dump(&self, dump: &[u8]);

    /// A shader debug info blob is available.
    fn on_shader_debug_info(&self, debug_info: &[u8]);

    /// The service is collecting a dump and wants to know about the application.
    fn on_crash_dump_description(&self, description: &mut CrashDumpDescription);

    /// The text the application associated with an event marker token.
    fn on_resolve_marker(&self, token: u64) -> Option<String>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("crash dump service is already enabled")]
    AlreadyEnabled,
    #[error("crash dump service is not available: {0}")]
    Unavailable(String),
}

/// A vendor crash-dump subsystem.
pub trait CrashDumpService: Send + Sync {
    /// Start watching for GPU crashes, reporting them to `handler`.
    fn enable(&self, handler: Arc<dyn CrashDumpHandler>) -> Result<(), ServiceError>;

    /// Stop watching. Disabling a service that is not enabled does nothing.
    fn disable(&self);

    /// The status of the most recent dump.
    fn status(&self) -> CrashDumpStatus;
}

#[derive(Default)]
struct LocalState {
    handler: Option<Arc<dyn CrashDumpHandler>>,
    status: Option<CrashDumpStatus>,
    failure: Option<String>,
    statuses: VecDeque<CrashDumpStatus>,
}

/// An in-process crash-dump service.
///
/// Nothing watches a GPU here: [`LocalCrashDumpService::deliver`] plays the
/// part of the driver, running the handler's callbacks in the order a real
/// service would.
#[derive(Default)]
pub struct LocalCrashDumpService {
    state: Mutex<LocalState>,
}

impl LocalCrashDumpService {
    pub fn new() -> LocalCrashDumpService {
        LocalCrashDumpService::default()
    }

    /// A service whose `enable` always fails with `reason`.
    pub fn unavailable(reason: &str) -> LocalCrashDumpService {
        let service = LocalCrashDumpService::new();
        service.lock().failure = Some(reason.to_owned());
        service
    }

    fn lock(&self) -> MutexGuard<'_, LocalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a handler is registered.
    pub fn is_enabled(&self) -> bool {
        self.lock().handler.is_some()
    }

    /// Statuses to report from the next calls to `status`, before the real one.
    pub fn queue_statuses(&self, statuses: impl IntoIterator<Item = CrashDumpStatus>) {
        self.lock().statuses.extend(statuses);
    }

    fn set_status(&self, status: CrashDumpStatus) {
        self.lock().status = Some(status);
    }

    /// Collect a dump: ask for a description, hand over the debug info blobs
    /// and then the dump itself. Returns false if no handler is registered.
    ///
    /// The handler is called without the service's lock held.
    pub fn deliver(&self, dump: &[u8], debug_infos: &[&[u8]]) -> bool {
        let Some(handler) = self.lock().handler.clone() else {
            debug!("local crash dump service: no handler, dropping dump");
            return false;
        };
        self.set_status(CrashDumpStatus::CollectingData);
        let mut description = CrashDumpDescription::new();
        handler.on_crash_dump_description(&mut description);
        debug!(
            "local crash dump service: {} description entries",
            description.entries().len()
        );

        self.set_status(CrashDumpStatus::InvokingCallback);
        for debug_info in debug_infos {
            handler.on_shader_debug_info(debug_info);
        }
        handler.on_crash_dump(dump);
        self.set_status(CrashDumpStatus::Finished);
        true
    }

    /// Ask the registered handler for the text behind a marker token.
    pub fn resolve_marker(&self, token: u64) -> Option<String> {
        let handler = self.lock().handler.clone()?;
        handler.on_resolve_marker(token)
    }
}

impl CrashDumpService for LocalCrashDumpService {
    fn enable(&self, handler: Arc<dyn CrashDumpHandler>) -> Result<(), ServiceError> {
        let mut state = self.lock();
        if let Some(ref reason) = state.failure {
            return Err(ServiceError::Unavailable(reason.clone()));
        }
        if state.handler.is_some() {
            return Err(ServiceError::AlreadyEnabled);
        }
        state.handler = Some(handler);
        state.status = Some(CrashDumpStatus::NotStarted);
        Ok(())
    }

    fn disable(&self) {
        let mut state = self.lock();
        state.handler = None;
        state.status = None;
    }

    fn status(&self) -> CrashDumpStatus {
        let mut state = self.lock();
        if let Some(queued) = state.statuses.pop_front() {
            return queued;
        }
        state.status.unwrap_or(CrashDumpStatus::Unknown)
    }
}
