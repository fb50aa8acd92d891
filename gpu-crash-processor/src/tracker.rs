//! Collecting GPU crash dumps and everything needed to read them later.
//!
//! A [`CrashDumpTracker`] registers with a [`CrashDumpService`]. When the GPU
//! crashes, the service hands it a dump, which it writes to the output
//! directory together with a JSON rendering, copies of the active shaders'
//! binaries and symbols, and any shader debug info the service supplied. It
//! then prints a human-readable report.

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use gpu_crash_common::format::DescriptionKey;
use gpu_crash_common::ids::DebugInfoId;
use gpu_crash_common::utils::basename;
use gpu_dump::GpuDump;
use shader_symbols::{debug_info_id, ShaderRecord, SymbolDatabase, SymbolRecord};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::report::CrashReport;
use crate::resolver::ShaderResolver;
use crate::service::{
    CrashDumpDescription, CrashDumpHandler, CrashDumpService, CrashDumpStatus, ServiceError,
};

/// Where shader binaries of active shaders are copied, under the output directory.
pub const SHADER_BINARY_DIR: &str = "shader_bin";
/// Where symbol files of active shaders are copied, under the output directory.
pub const SHADER_SYMBOL_DIR: &str = "shader_pdb";
/// Where shader debug info blobs are written, under the output directory.
pub const DEBUG_INFO_DIR: &str = "nvdbg";

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Everything the tracker needs to know, set up with builder-style methods.
///
/// ```
/// use gpu_crash_processor::TrackerConfig;
///
/// let config = TrackerConfig::new("crashes")
///     .shader_dir("shaders")
///     .symbol_dir("shaders/pdb")
///     .app_name("viewer")
///     .app_version("1.2.0")
///     .user_entry(0, "scene: atrium");
/// assert_eq!(config.app_name, "viewer");
/// ```
pub struct TrackerConfig {
    pub output_dir: PathBuf,
    pub shader_dirs: Vec<PathBuf>,
    pub symbol_dirs: Vec<PathBuf>,
    pub app_name: String,
    pub app_version: String,
    /// Free-form description entries, keyed by offset from [`DescriptionKey::UserDefined`].
    pub user_entries: Vec<(u32, String)>,
    /// How long to wait for the service to finish a dump after a device removal.
    pub dump_timeout: Duration,
    report_sink: Option<Box<dyn Write + Send>>,
}

impl TrackerConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> TrackerConfig {
        TrackerConfig {
            output_dir: output_dir.into(),
            shader_dirs: Vec::new(),
            symbol_dirs: Vec::new(),
            app_name: "gpu-app".to_owned(),
            app_version: "0.0.0".to_owned(),
            user_entries: Vec::new(),
            dump_timeout: Duration::from_secs(5),
            report_sink: None,
        }
    }

    pub fn shader_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shader_dirs.push(dir.into());
        self
    }

    pub fn shader_dirs<I, P>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.shader_dirs.extend(dirs.into_iter().map(Into::into));
        self
    }

    pub fn symbol_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.symbol_dirs.push(dir.into());
        self
    }

    pub fn symbol_dirs<I, P>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.symbol_dirs.extend(dirs.into_iter().map(Into::into));
        self
    }

    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    pub fn app_version(mut self, version: impl Into<String>) -> Self {
        self.app_version = version.into();
        self
    }

    /// Add a description entry with key `DescriptionKey::UserDefined + offset`.
    pub fn user_entry(mut self, offset: u32, value: impl Into<String>) -> Self {
        self.user_entries.push((offset, value.into()));
        self
    }

    pub fn dump_timeout(mut self, timeout: Duration) -> Self {
        self.dump_timeout = timeout;
        self
    }

    /// Where crash reports are printed. Defaults to stderr.
    pub fn report_sink(mut self, sink: impl Write + Send + 'static) -> Self {
        self.report_sink = Some(Box::new(sink));
        self
    }
}

impl fmt::Debug for TrackerConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TrackerConfig")
            .field("output_dir", &self.output_dir)
            .field("shader_dirs", &self.shader_dirs)
            .field("symbol_dirs", &self.symbol_dirs)
            .field("app_name", &self.app_name)
            .field("app_version", &self.app_version)
            .field("user_entries", &self.user_entries)
            .field("dump_timeout", &self.dump_timeout)
            .field("report_sink", &self.report_sink.is_some())
            .finish()
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum TrackerState {
    Uninitialized,
    Registered,
    Terminated,
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("failed to register with the crash dump service: {0}")]
    Registration(#[from] ServiceError),
    #[error("tracker cannot be initialized in state {0:?}")]
    InvalidState(TrackerState),
}

/// A failure to produce one of the artifacts of a crash dump.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to create {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to decode crash dump: {0}")]
    Decode(#[from] gpu_dump::Error),
    #[error("failed to serialize crash report: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to print crash report: {0}")]
    Report(io::Error),
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn create_dir(path: &Path) -> Result<(), ArtifactError> {
    fs::create_dir_all(path).map_err(|source| ArtifactError::CreateDir {
        path: path.to_owned(),
        source,
    })
}

fn write_file(path: &Path, contents: &[u8]) -> Result<(), ArtifactError> {
    fs::write(path, contents).map_err(|source| ArtifactError::Write {
        path: path.to_owned(),
        source,
    })?;
    debug!("wrote {} ({} bytes)", path.display(), contents.len());
    Ok(())
}

/// Create `{app}-{pid}-{n}.dump` with the next free `n` and write `dump` to it.
///
/// Names that already exist are skipped, so an earlier dump is never replaced.
fn write_new_dump(
    output_dir: &Path,
    app_name: &str,
    counter: &AtomicU32,
    dump: &[u8],
) -> Result<String, ArtifactError> {
    loop {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        let base_name = format!("{}-{}-{}.dump", app_name, std::process::id(), n);
        let path = output_dir.join(&base_name);
        let write_error = |source| ArtifactError::Write {
            path: path.clone(),
            source,
        };
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                info!("writing GPU crash dump to {}", path.display());
                file.write_all(dump).map_err(write_error)?;
                return Ok(base_name);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!("{} already exists, trying the next name", path.display());
            }
            Err(e) => return Err(write_error(e)),
        }
    }
}

fn log_failure(result: Result<(), ArtifactError>) {
    if let Err(e) = result {
        error!("{}", e);
    }
}

/// Run a callback body, keeping panics on this side of the service.
fn contain<R>(callback: &str, f: impl FnOnce() -> R) -> Option<R> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => Some(result),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_owned());
            error!("{} callback panicked: {}", callback, message);
            None
        }
    }
}

/// Lookups backed by the tracker's state at the time of a dump.
struct TrackerResolver<'a> {
    symbols: &'a SymbolDatabase,
    debug_infos: &'a HashMap<DebugInfoId, Vec<u8>>,
    markers: &'a HashMap<u64, String>,
}

impl ShaderResolver for TrackerResolver<'_> {
    fn find_binary(&self, hash: gpu_crash_common::ids::ShaderHash) -> Option<&ShaderRecord> {
        self.symbols.find_binary(hash)
    }

    fn find_symbols(&self, debug_name: &str) -> Option<&SymbolRecord> {
        self.symbols.find_pdb(debug_name)
    }

    fn has_debug_info(&self, id: DebugInfoId) -> bool {
        self.debug_infos.contains_key(&id)
    }

    fn resolve_marker(&self, token: u64) -> Option<String> {
        self.markers.get(&token).cloned()
    }
}

struct TrackerHandler {
    output_dir: PathBuf,
    app_name: String,
    app_version: String,
    user_entries: Vec<(u32, String)>,
    symbols: Mutex<Arc<SymbolDatabase>>,
    debug_infos: Mutex<HashMap<DebugInfoId, Vec<u8>>>,
    markers: Arc<Mutex<HashMap<u64, String>>>,
    dump_count: Arc<AtomicU32>,
    dump_lock: Mutex<()>,
    report_sink: Mutex<Box<dyn Write + Send>>,
}

impl TrackerHandler {
    fn clear(&self) {
        *lock(&self.symbols) = Arc::new(SymbolDatabase::default());
        lock(&self.debug_infos).clear();
    }

    fn write_crash_dump(&self, dump: &[u8]) {
        let _guard = lock(&self.dump_lock);

        let bin_dir = self.output_dir.join(SHADER_BINARY_DIR);
        let pdb_dir = self.output_dir.join(SHADER_SYMBOL_DIR);
        for dir in [&bin_dir, &pdb_dir, &self.output_dir.join(DEBUG_INFO_DIR)] {
            log_failure(create_dir(dir));
        }

        let base_name = match write_new_dump(&self.output_dir, &self.app_name, &self.dump_count, dump) {
            Ok(base_name) => base_name,
            Err(e) => {
                log_failure(Err(e));
                return;
            }
        };

        let gpu_dump = match GpuDump::read(dump) {
            Ok(gpu_dump) => gpu_dump,
            Err(e) => {
                log_failure(Err(e.into()));
                return;
            }
        };
        let symbols = lock(&self.symbols).clone();
        let report = {
            let debug_infos = lock(&self.debug_infos);
            let markers = lock(&self.markers);
            let resolver = TrackerResolver {
                symbols: &symbols,
                debug_infos: &debug_infos,
                markers: &markers,
            };
            CrashReport::decode(&gpu_dump, &resolver)
        };

        match serde_json::to_vec_pretty(&report.to_json()) {
            Ok(json) => {
                let json_path = self.output_dir.join(format!("{base_name}.json"));
                log_failure(write_file(&json_path, &json));
            }
            Err(e) => log_failure(Err(e.into())),
        }

        for shader in report.active_shaders.iter().flatten() {
            let hash = shader.shader.hash;
            let Some(binary) = symbols.find_binary(hash) else {
                warn!("no binary for active shader {}", hash);
                continue;
            };
            log_failure(write_file(
                &bin_dir.join(format!("{hash}.bin")),
                &binary.bytes,
            ));
            let Some(ref debug_name) = binary.debug_name else {
                continue;
            };
            match symbols.find_pdb(debug_name) {
                Some(pdb) => log_failure(write_file(
                    &pdb_dir.join(basename(&pdb.debug_name)),
                    &pdb.bytes,
                )),
                None => warn!("no symbols {} for active shader {}", debug_name, hash),
            }
        }

        let mut sink = lock(&self.report_sink);
        if let Err(e) = report.print(&mut **sink).and_then(|_| sink.flush()) {
            log_failure(Err(ArtifactError::Report(e)));
        }
    }

    fn write_debug_info(&self, debug_info: &[u8]) {
        let id = debug_info_id(debug_info);
        debug!("received shader debug info {}", id);
        lock(&self.debug_infos).insert(id, debug_info.to_vec());

        let dir = self.output_dir.join(DEBUG_INFO_DIR);
        log_failure(
            create_dir(&dir)
                .and_then(|_| write_file(&dir.join(format!("shader-{id}.dbg")), debug_info)),
        );
    }
}

impl CrashDumpHandler for TrackerHandler {
    fn on_crash_dump(&self, dump: &[u8]) {
        contain("crash dump", || self.write_crash_dump(dump));
    }

    fn on_shader_debug_info(&self, debug_info: &[u8]) {
        contain("shader debug info", || self.write_debug_info(debug_info));
    }

    fn on_crash_dump_description(&self, description: &mut CrashDumpDescription) {
        contain("crash dump description", || {
            description.add_key(DescriptionKey::ApplicationName, self.app_name.as_str());
            description.add_key(DescriptionKey::ApplicationVersion, self.app_version.as_str());
            for (offset, value) in &self.user_entries {
                description.add(
                    (DescriptionKey::UserDefined as u32).saturating_add(*offset),
                    value.as_str(),
                );
            }
        });
    }

    fn on_resolve_marker(&self, token: u64) -> Option<String> {
        contain("resolve marker", || lock(&self.markers).get(&token).cloned()).flatten()
    }
}

/// Collects crash dumps from a [`CrashDumpService`].
pub struct CrashDumpTracker {
    service: Arc<dyn CrashDumpService>,
    state: TrackerState,
    handler: Option<Arc<TrackerHandler>>,
    markers: Arc<Mutex<HashMap<u64, String>>>,
    dump_count: Arc<AtomicU32>,
    dump_timeout: Duration,
}

impl CrashDumpTracker {
    pub fn new(service: Arc<dyn CrashDumpService>) -> CrashDumpTracker {
        CrashDumpTracker::with_dump_counter(service, Arc::default())
    }

    /// Like [`CrashDumpTracker::new`], but numbering dumps from `dump_count`,
    /// which may be shared with earlier and later trackers.
    pub fn with_dump_counter(
        service: Arc<dyn CrashDumpService>,
        dump_count: Arc<AtomicU32>,
    ) -> CrashDumpTracker {
        CrashDumpTracker {
            service,
            state: TrackerState::Uninitialized,
            handler: None,
            markers: Arc::default(),
            dump_count,
            dump_timeout: Duration::from_secs(5),
        }
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    /// The timeout from the configuration the tracker was initialized with.
    pub fn dump_timeout(&self) -> Duration {
        self.dump_timeout
    }

    /// Index the shader and symbol directories and register with the service.
    pub fn init(&mut self, config: TrackerConfig) -> Result<(), TrackerError> {
        if self.state != TrackerState::Uninitialized {
            return Err(TrackerError::InvalidState(self.state));
        }
        let symbols = SymbolDatabase::new(&config.shader_dirs, &config.symbol_dirs);
        info!(
            "crash tracker indexed {} shader binaries and {} symbol files",
            symbols.binary_count(),
            symbols.symbol_count()
        );
        let report_sink = config
            .report_sink
            .unwrap_or_else(|| Box::new(io::stderr()));
        let handler = Arc::new(TrackerHandler {
            output_dir: config.output_dir,
            app_name: config.app_name,
            app_version: config.app_version,
            user_entries: config.user_entries,
            symbols: Mutex::new(Arc::new(symbols)),
            debug_infos: Mutex::default(),
            markers: self.markers.clone(),
            dump_count: self.dump_count.clone(),
            dump_lock: Mutex::new(()),
            report_sink: Mutex::new(report_sink),
        });
        self.service.enable(handler.clone())?;
        self.dump_timeout = config.dump_timeout;
        self.handler = Some(handler);
        self.state = TrackerState::Registered;
        Ok(())
    }

    /// Unregister from the service and drop the indexed shaders and debug info.
    pub fn term(&mut self) {
        if self.state == TrackerState::Terminated {
            return;
        }
        if self.state == TrackerState::Registered {
            self.service.disable();
        }
        if let Some(handler) = self.handler.take() {
            handler.clear();
        }
        self.state = TrackerState::Terminated;
        debug!("crash tracker terminated");
    }

    /// Associate `label` with an event marker token, for use in reports.
    pub fn register_marker(&self, token: u64, label: impl Into<String>) {
        lock(&self.markers).insert(token, label.into());
    }

    /// The service to poll for a crash dump, if the tracker is registered.
    pub(crate) fn registered_service(&self) -> Option<Arc<dyn CrashDumpService>> {
        (self.state == TrackerState::Registered).then(|| self.service.clone())
    }

    /// Wait until the service has finished or failed a dump, or `timeout` passes.
    pub fn wait_for_crash_dump(&self, timeout: Duration) -> CrashDumpStatus {
        match self.registered_service() {
            Some(service) => wait_for_service(&*service, timeout),
            None => {
                debug!("not waiting for a crash dump: tracker is {:?}", self.state);
                CrashDumpStatus::Unknown
            }
        }
    }
}

/// Poll `service` until its dump is finished or failed, or `timeout` passes.
pub(crate) fn wait_for_service(service: &dyn CrashDumpService, timeout: Duration) -> CrashDumpStatus {
    let deadline = Instant::now() + timeout;
    loop {
        let status = service.status();
        if status.is_done() {
            debug!("crash dump {:?}", status);
            return status;
        }
        let now = Instant::now();
        if now >= deadline {
            warn!(
                "timed out after {:?} waiting for crash dump, status {:?}",
                timeout, status
            );
            return status;
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

impl Drop for CrashDumpTracker {
    fn drop(&mut self) {
        self.term();
    }
}
