use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use gpu_breadcrumbs::software::SoftwareDevice;
use gpu_breadcrumbs::{CommandListType, InstrumentedCommandStream, LiveStreamRegistry, OperationTag};
use gpu_crash_processor::*;

// Everything here shares the process-wide tracker and registry, so it is one test.
#[test]
fn test_process_wide_reporting() {
    let out = tempfile::tempdir().unwrap();

    assert!(!init_crash_tracker(
        TrackerConfig::new(out.path()),
        Arc::new(LocalCrashDumpService::unavailable("no driver")),
    ));

    let service = Arc::new(LocalCrashDumpService::new());
    assert!(init_crash_tracker(
        TrackerConfig::new(out.path()).dump_timeout(Duration::from_millis(100)),
        service.clone(),
    ));
    register_marker(5, "Bloom");
    assert_eq!(service.resolve_marker(5).as_deref(), Some("Bloom"));

    // A command that was entered but never exited is the one in flight.
    let device = SoftwareDevice::new();
    let mut stream = InstrumentedCommandStream::new(
        &device,
        CommandListType::Direct,
        LiveStreamRegistry::global(),
    )
    .unwrap();
    stream.dispatch(1, 1, 1);
    stream.push(OperationTag::DrawInstanced);
    stream.close().unwrap();
    device.execute(stream.recorder()).unwrap();

    let mut text = Vec::new();
    let printed = report_custom_breadcrumbs_to(&mut text, StatusCode::DEVICE_HUNG).unwrap();
    assert_eq!(printed, 1);
    let text = String::from_utf8(text).unwrap();
    assert!(text.starts_with("Breadcrumbs for 0x887a0006 (DXGI_ERROR_DEVICE_HUNG):"));
    let ng: Vec<_> = text.lines().filter(|l| l.ends_with(" NG")).collect();
    assert_eq!(ng.len(), 1);
    assert!(ng[0].contains("DRAWINSTANCED"));

    let diagnostics = RecordedDiagnostics::new(&[DredVersion::V1_0]);
    let mut text = Vec::new();
    report_device_removed_to(&mut text, StatusCode::DEVICE_REMOVED, &diagnostics).unwrap();
    let text = String::from_utf8(text).unwrap();
    assert!(text.contains("DXGI_ERROR_DEVICE_REMOVED"));
    assert!(text.contains("extended data (version 1.0)"));
    assert!(text.contains("DRAWINSTANCED"));

    term_crash_tracker();
    assert!(!service.is_enabled());
    term_crash_tracker();

    // Waiting for a dump doesn't keep other callers out of the tracker.
    let service = Arc::new(LocalCrashDumpService::new());
    assert!(init_crash_tracker(
        TrackerConfig::new(out.path()).dump_timeout(Duration::from_secs(2)),
        service.clone(),
    ));
    let reporter = thread::spawn(|| {
        let diagnostics = RecordedDiagnostics::new(&[DredVersion::V1_0]);
        let mut text = Vec::new();
        report_device_removed_to(&mut text, StatusCode::DEVICE_HUNG, &diagnostics).unwrap();
    });
    thread::sleep(Duration::from_millis(200));
    let start = Instant::now();
    register_marker(9, "Late");
    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(!reporter.is_finished());
    assert_eq!(service.resolve_marker(9).as_deref(), Some("Late"));
    reporter.join().unwrap();
    term_crash_tracker();

    // Dump numbers keep counting across trackers.
    let first_dir = tempfile::tempdir().unwrap();
    let second_dir = tempfile::tempdir().unwrap();
    let dump_path = |dir: &Path, n: u32| dir.join(format!("gpu-app-{}-{}.dump", std::process::id(), n));
    for (dir, contents) in [(&first_dir, &b"first crash"[..]), (&second_dir, &b"second crash"[..])] {
        let service = Arc::new(LocalCrashDumpService::new());
        assert!(init_crash_tracker(
            TrackerConfig::new(dir.path()).report_sink(std::io::sink()),
            service.clone(),
        ));
        assert!(service.deliver(contents, &[]));
        term_crash_tracker();
    }
    assert_eq!(std::fs::read(dump_path(first_dir.path(), 0)).unwrap(), b"first crash");
    assert_eq!(std::fs::read(dump_path(second_dir.path(), 1)).unwrap(), b"second crash");
    assert!(!dump_path(second_dir.path(), 0).exists());

    drop(stream);
    let mut text = Vec::new();
    assert_eq!(
        report_custom_breadcrumbs_to(&mut text, StatusCode::DEVICE_HUNG).unwrap(),
        0
    );
    assert!(String::from_utf8(text).unwrap().contains("no live command lists"));
}
