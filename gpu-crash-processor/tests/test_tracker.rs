use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gpu_crash_processor::*;
use gpu_dump::format::DescriptionKey;
use shader_symbols::{debug_info_id, shader_hash};

mod common;

use common::{PanickingSink, SharedSink};

struct Fixture {
    out: tempfile::TempDir,
    shaders: tempfile::TempDir,
    symbols: tempfile::TempDir,
    binary: Vec<u8>,
}

impl Fixture {
    fn new() -> Fixture {
        let fixture = Fixture {
            out: tempfile::tempdir().unwrap(),
            shaders: tempfile::tempdir().unwrap(),
            symbols: tempfile::tempdir().unwrap(),
            binary: common::dxbc_with_debug_name("lighting.pdb", &[9, 9, 9, 9]),
        };
        common::write(&fixture.shaders.path().join("lighting.cso"), &fixture.binary);
        common::write(&fixture.symbols.path().join("lighting.pdb"), b"pdb contents");
        fixture
    }

    fn config(&self) -> TrackerConfig {
        TrackerConfig::new(self.out.path())
            .shader_dir(self.shaders.path())
            .symbol_dir(self.symbols.path())
            .app_name("viewer")
            .app_version("1.2.0")
            .user_entry(3, "scene: atrium")
    }

    fn dump_path(&self, n: u32) -> std::path::PathBuf {
        self.out
            .path()
            .join(format!("viewer-{}-{}.dump", std::process::id(), n))
    }
}

fn read(path: &Path) -> Vec<u8> {
    std::fs::read(path).unwrap_or_else(|e| panic!("{}: {}", path.display(), e))
}

#[test]
fn test_dump_artifacts() {
    let fixture = Fixture::new();
    let service = Arc::new(LocalCrashDumpService::new());
    let sink = SharedSink::default();
    let mut tracker = CrashDumpTracker::new(service.clone());
    tracker
        .init(fixture.config().report_sink(sink.clone()))
        .unwrap();
    assert_eq!(tracker.state(), TrackerState::Registered);
    assert!(service.is_enabled());
    tracker.register_marker(0x42, "ShadowPass");

    let debug_info = b"shader debug info".to_vec();
    let id = debug_info_id(&debug_info);
    let hash = shader_hash(&fixture.binary);
    let dump = common::crash_dump(hash.0, id.0, 0x42);
    assert!(service.deliver(&dump, &[&debug_info]));

    let out = fixture.out.path();
    assert_eq!(read(&fixture.dump_path(0)), dump);
    assert_eq!(
        read(&out.join("nvdbg").join(format!("shader-{id}.dbg"))),
        debug_info
    );
    assert_eq!(
        read(&out.join("shader_bin").join(format!("{hash}.bin"))),
        fixture.binary
    );
    assert_eq!(
        read(&out.join("shader_pdb").join("lighting.pdb")),
        b"pdb contents"
    );
    // Only the shader that was found is copied.
    assert_eq!(std::fs::read_dir(out.join("shader_bin")).unwrap().count(), 1);

    let json_path = out.join(format!("viewer-{}-0.dump.json", std::process::id()));
    let json: serde_json::Value = serde_json::from_slice(&read(&json_path)).unwrap();
    assert_eq!(json["base_info"]["pid"], 4321);
    assert_eq!(json["active_shaders"][0]["has_debug_info"], true);
    assert_eq!(json["active_shaders"][0]["debug_name"], "lighting.pdb");
    assert_eq!(json["event_markers"][1]["text"], "ShadowPass");

    let report = sink.contents();
    assert!(report.contains("GPU crash dump"));
    assert!(report.contains("\"ShadowPass\""));
    assert!(report.contains("debug name: lighting.pdb"));
    assert!(!report.contains("(not received)"));

    assert!(service.deliver(&dump, &[]));
    assert_eq!(read(&fixture.dump_path(1)), dump);
    assert_eq!(service.status(), CrashDumpStatus::Finished);
}

#[test]
fn test_later_tracker_keeps_earlier_dumps() {
    let fixture = Fixture::new();
    for contents in [&b"first crash"[..], &b"second crash"[..]] {
        let service = Arc::new(LocalCrashDumpService::new());
        let mut tracker = CrashDumpTracker::new(service.clone());
        tracker.init(fixture.config().report_sink(std::io::sink())).unwrap();
        assert!(service.deliver(contents, &[]));
        tracker.term();
    }
    assert_eq!(read(&fixture.dump_path(0)), b"first crash");
    assert_eq!(read(&fixture.dump_path(1)), b"second crash");
    assert!(!fixture.dump_path(2).exists());
}

#[test]
fn test_shared_dump_counter() {
    let fixture = Fixture::new();
    let counter = Arc::new(AtomicU32::new(7));
    let service = Arc::new(LocalCrashDumpService::new());
    let mut tracker = CrashDumpTracker::with_dump_counter(service.clone(), counter.clone());
    tracker.init(fixture.config().report_sink(std::io::sink())).unwrap();
    assert!(service.deliver(b"crash", &[]));
    assert!(fixture.dump_path(7).exists());
    assert_eq!(counter.load(Ordering::SeqCst), 8);
}

#[test]
fn test_undecodable_dump_is_still_written() {
    let fixture = Fixture::new();
    let service = Arc::new(LocalCrashDumpService::new());
    let sink = SharedSink::default();
    let mut tracker = CrashDumpTracker::new(service.clone());
    tracker.init(fixture.config().report_sink(sink.clone())).unwrap();

    assert!(service.deliver(b"not a dump", &[]));
    assert_eq!(read(&fixture.dump_path(0)), b"not a dump");
    assert!(!fixture
        .out
        .path()
        .join(format!("viewer-{}-0.dump.json", std::process::id()))
        .exists());
    assert!(sink.contents().is_empty());
}

#[test]
fn test_panicking_sink_is_contained() {
    let fixture = Fixture::new();
    let service = Arc::new(LocalCrashDumpService::new());
    let mut tracker = CrashDumpTracker::new(service.clone());
    tracker.init(fixture.config().report_sink(PanickingSink)).unwrap();

    let dump = common::crash_dump(1, 0, 0);
    assert!(service.deliver(&dump, &[]));
    assert!(fixture.dump_path(0).exists());

    // The handler keeps working after a panic.
    assert!(service.deliver(&dump, &[]));
    assert!(fixture.dump_path(1).exists());
}

/// A service that hands its handler back to the test.
#[derive(Default)]
struct CapturingService {
    handler: Mutex<Option<Arc<dyn CrashDumpHandler>>>,
}

impl CrashDumpService for CapturingService {
    fn enable(&self, handler: Arc<dyn CrashDumpHandler>) -> Result<(), ServiceError> {
        *self.handler.lock().unwrap() = Some(handler);
        Ok(())
    }

    fn disable(&self) {
        *self.handler.lock().unwrap() = None;
    }

    fn status(&self) -> CrashDumpStatus {
        CrashDumpStatus::NotStarted
    }
}

#[test]
fn test_description_and_markers() {
    let fixture = Fixture::new();
    let service = Arc::new(CapturingService::default());
    let mut tracker = CrashDumpTracker::new(service.clone());
    tracker.init(fixture.config()).unwrap();
    tracker.register_marker(7, "Tonemap");

    let handler = service.handler.lock().unwrap().clone().unwrap();
    let mut description = CrashDumpDescription::new();
    handler.on_crash_dump_description(&mut description);
    assert_eq!(
        description.get(DescriptionKey::ApplicationName as u32),
        Some("viewer")
    );
    assert_eq!(
        description.get(DescriptionKey::ApplicationVersion as u32),
        Some("1.2.0")
    );
    assert_eq!(
        description.get(DescriptionKey::UserDefined as u32 + 3),
        Some("scene: atrium")
    );

    assert_eq!(handler.on_resolve_marker(7).as_deref(), Some("Tonemap"));
    assert_eq!(handler.on_resolve_marker(8), None);

    tracker.term();
    assert!(service.handler.lock().unwrap().is_none());
}

#[test]
fn test_term_is_idempotent() {
    let fixture = Fixture::new();
    let service = Arc::new(LocalCrashDumpService::new());
    let mut tracker = CrashDumpTracker::new(service.clone());
    tracker.term();
    assert_eq!(tracker.state(), TrackerState::Terminated);

    let mut tracker = CrashDumpTracker::new(service.clone());
    tracker.init(fixture.config()).unwrap();
    tracker.term();
    tracker.term();
    assert_eq!(tracker.state(), TrackerState::Terminated);
    assert!(!service.is_enabled());
    assert!(matches!(
        tracker.init(fixture.config()),
        Err(TrackerError::InvalidState(TrackerState::Terminated))
    ));
    assert!(!service.deliver(b"dump", &[]));
}

#[test]
fn test_registration_failure() {
    let fixture = Fixture::new();
    let service = Arc::new(LocalCrashDumpService::unavailable("no driver"));
    let mut tracker = CrashDumpTracker::new(service);
    assert!(matches!(
        tracker.init(fixture.config()),
        Err(TrackerError::Registration(ServiceError::Unavailable(_)))
    ));
    assert_eq!(tracker.state(), TrackerState::Uninitialized);
}

#[test]
fn test_wait_for_crash_dump() {
    let fixture = Fixture::new();
    let service = Arc::new(LocalCrashDumpService::new());
    let mut tracker = CrashDumpTracker::new(service.clone());
    assert_eq!(
        tracker.wait_for_crash_dump(Duration::from_millis(10)),
        CrashDumpStatus::Unknown
    );
    tracker.init(fixture.config()).unwrap();

    service.queue_statuses([
        CrashDumpStatus::CollectingData,
        CrashDumpStatus::InvokingCallback,
        CrashDumpStatus::Finished,
    ]);
    assert_eq!(
        tracker.wait_for_crash_dump(Duration::from_secs(10)),
        CrashDumpStatus::Finished
    );

    // Nothing ever happens, so this times out.
    assert_eq!(
        tracker.wait_for_crash_dump(Duration::from_millis(120)),
        CrashDumpStatus::NotStarted
    );
}
