use gpu_breadcrumbs::software::{SoftwareCommand, SoftwareDevice};
use gpu_breadcrumbs::*;
use std::sync::Arc;

fn new_stream(
    device: &SoftwareDevice,
    registry: &Arc<LiveStreamRegistry>,
) -> InstrumentedCommandStream<software::SoftwareCommandList> {
    InstrumentedCommandStream::new(device, CommandListType::Direct, registry.clone()).unwrap()
}

fn report(registry: &LiveStreamRegistry) -> (usize, String) {
    let mut out = Vec::new();
    let count = registry.print_all(&mut out).unwrap();
    (count, String::from_utf8(out).unwrap())
}

fn statuses(history: &GenerationHistory) -> Vec<MarkerStatus> {
    history.slots.iter().map(|slot| slot.status()).collect()
}

#[test]
fn test_matched_commands_are_ok() {
    let device = SoftwareDevice::new();
    let registry = Arc::new(LiveStreamRegistry::new());
    let mut stream = new_stream(&device, &registry);
    stream.begin_event(0, b"frame");
    stream.draw_instanced(3, 1, 0, 0);
    stream.draw_indexed_instanced(36, 4, 0, 0, 0);
    stream.dispatch(16, 16, 1);
    stream.copy_resource(ResourceId(1), ResourceId(2));
    stream.end_event();
    stream.close().unwrap();
    device.execute(stream.recorder()).unwrap();

    let history = stream.buffer().history();
    assert_eq!(history.len(), 1);
    assert!(history[0].finished);
    assert_eq!(history[0].slots.len(), 6);
    assert!(statuses(&history[0])
        .iter()
        .all(|status| *status == MarkerStatus::Completed));

    let (count, text) = report(&registry);
    assert_eq!(count, 1);
    let slot_lines: Vec<_> = text.lines().filter(|l| l.starts_with("    ")).collect();
    assert_eq!(slot_lines.len(), 6);
    assert!(slot_lines.iter().all(|l| l.ends_with(" OK")));
    assert!(slot_lines[2].contains("DRAWINDEXEDINSTANCED"));
}

#[test]
fn test_fault_leaves_one_in_flight_command() {
    let device = SoftwareDevice::new();
    let registry = Arc::new(LiveStreamRegistry::new());
    let mut stream = new_stream(&device, &registry);
    stream.draw_instanced(3, 1, 0, 0);
    stream.dispatch(1, 1, 1);
    stream.copy_resource(ResourceId(1), ResourceId(2));
    stream.resource_barrier(&[ResourceBarrier::UnorderedAccess { resource: None }]);
    stream.close().unwrap();

    device.fault_on(2);
    assert!(device.execute(stream.recorder()).is_err());

    let history = stream.buffer().history();
    assert_eq!(
        statuses(&history[0]),
        vec![
            MarkerStatus::Completed,
            MarkerStatus::InFlight,
            MarkerStatus::NotReached,
            MarkerStatus::NotReached,
        ]
    );
    // Unreached slots are still named from what was recorded.
    assert_eq!(history[0].slots[2].name(), "COPYRESOURCE");

    let (_, text) = report(&registry);
    let ng: Vec<_> = text.lines().filter(|l| l.ends_with(" NG")).collect();
    assert_eq!(ng.len(), 1);
    assert!(ng[0].contains("DISPATCH"));
    let blank: Vec<_> = text
        .lines()
        .filter(|l| l.starts_with("    ") && !l.ends_with(" OK") && !l.ends_with(" NG"))
        .collect();
    assert_eq!(blank.len(), 2);
}

#[test]
fn test_push_without_pop() {
    let device = SoftwareDevice::new();
    let registry = Arc::new(LiveStreamRegistry::new());
    let mut stream = new_stream(&device, &registry);
    stream.push(OperationTag::DrawInstanced);
    stream.recorder_mut().draw_instanced(3, 1, 0, 0);
    stream.finish();
    stream.close().unwrap();
    device.execute(stream.recorder()).unwrap();

    let (count, text) = report(&registry);
    assert_eq!(count, 1);
    let ng: Vec<_> = text.lines().filter(|l| l.ends_with(" NG")).collect();
    assert_eq!(ng.len(), 1);
    assert!(ng[0].contains("DRAWINSTANCED"));
}

#[test]
fn test_reset_starts_an_empty_generation() {
    let device = SoftwareDevice::new();
    let registry = Arc::new(LiveStreamRegistry::new());
    let mut stream = new_stream(&device, &registry);
    stream.dispatch(1, 1, 1);
    stream.close().unwrap();
    device.execute(stream.recorder()).unwrap();

    stream.reset().unwrap();
    assert_eq!(stream.submission(), 1);
    let history = stream.buffer().history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].relative, 1);
    assert_eq!(history[0].slots.len(), 1);
    let newest = &history[1];
    assert_eq!(newest.relative, 0);
    assert_eq!(newest.submission, 1);
    assert!(!newest.finished);
    assert!(newest.slots.is_empty());

    let mut out = Vec::new();
    stream.print(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("Submission 0 (#1) [recording]: 0 markers"));
}

#[test]
fn test_generations_wrap() {
    let device = SoftwareDevice::new();
    let registry = Arc::new(LiveStreamRegistry::new());
    let config = BreadcrumbConfig::default().with_generations(2).with_capacity(8);
    let mut stream =
        InstrumentedCommandStream::with_config(&device, CommandListType::Compute, registry, config)
            .unwrap();
    for _ in 0..3 {
        stream.dispatch(1, 1, 1);
        stream.close().unwrap();
        device.execute(stream.recorder()).unwrap();
        stream.reset().unwrap();
    }
    stream.copy_resource(ResourceId(3), ResourceId(4));
    stream.close().unwrap();

    let history = stream.buffer().history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].submission, 2);
    assert_eq!(history[0].slots[0].name(), "DISPATCH");
    assert_eq!(history[1].submission, 3);
    // Recorded but not executed yet.
    assert_eq!(statuses(&history[1]), vec![MarkerStatus::NotReached]);
}

#[test]
fn test_stream_without_generations_is_rejected() {
    let device = SoftwareDevice::new();
    let registry = Arc::new(LiveStreamRegistry::new());
    let config = BreadcrumbConfig {
        generations: 0,
        capacity: 8,
    };
    let result =
        InstrumentedCommandStream::with_config(&device, CommandListType::Direct, registry.clone(), config);
    assert!(matches!(result, Err(RecorderError::InvalidConfig(_))));
    assert!(registry.is_empty());
}

#[test]
fn test_overflow_still_forwards_commands() {
    let device = SoftwareDevice::new();
    let registry = Arc::new(LiveStreamRegistry::new());
    let config = BreadcrumbConfig::default().with_capacity(2);
    let mut stream =
        InstrumentedCommandStream::with_config(&device, CommandListType::Direct, registry, config)
            .unwrap();
    for _ in 0..3 {
        stream.dispatch(1, 1, 1);
    }
    stream.close().unwrap();
    device.execute(stream.recorder()).unwrap();

    let work = stream
        .recorder()
        .commands()
        .iter()
        .filter(|c| matches!(c, SoftwareCommand::Work(_)))
        .count();
    assert_eq!(work, 3);
    let history = stream.buffer().history();
    assert_eq!(history[0].slots.len(), 2);
}

#[test]
fn test_state_setting_is_not_instrumented() {
    let device = SoftwareDevice::new();
    let registry = Arc::new(LiveStreamRegistry::new());
    let mut stream = new_stream(&device, &registry);
    stream.set_pipeline_state(PipelineId(1));
    stream.set_primitive_topology(PrimitiveTopology::TriangleList);
    stream.set_viewports(&[Viewport {
        top_left_x: 0.0,
        top_left_y: 0.0,
        width: 640.0,
        height: 480.0,
        min_depth: 0.0,
        max_depth: 1.0,
    }]);
    stream.set_scissor_rects(&[Rect {
        left: 0,
        top: 0,
        right: 640,
        bottom: 480,
    }]);
    stream.set_vertex_buffers(0, &[]);
    stream.set_index_buffer(None);
    stream.set_descriptor_heaps(&[DescriptorHeapId(7)]);
    stream.begin_query(QueryHeapId(1), QueryType::Timestamp, 0);
    stream.end_query(QueryHeapId(1), QueryType::Timestamp, 0);

    assert!(stream
        .recorder()
        .commands()
        .iter()
        .all(|c| matches!(c, SoftwareCommand::State(_))));
    assert!(stream.buffer().history()[0].slots.is_empty());

    stream.resolve_query_data(QueryHeapId(1), QueryType::Timestamp, 0, 2, ResourceId(9), 0);
    assert_eq!(stream.buffer().history()[0].slots[0].name(), "RESOLVEQUERYDATA");
}

#[test]
fn test_bundle_commands_run_inside_the_parent() {
    let device = SoftwareDevice::new();
    let registry = Arc::new(LiveStreamRegistry::new());
    let mut bundle =
        InstrumentedCommandStream::new(&device, CommandListType::Bundle, registry.clone()).unwrap();
    bundle.draw_instanced(3, 1, 0, 0);
    bundle.close().unwrap();

    let mut stream = new_stream(&device, &registry);
    stream.execute_bundle(&bundle);
    stream.close().unwrap();
    assert!(device.execute(bundle.recorder()).is_err());
    device.execute(stream.recorder()).unwrap();

    let parent = stream.buffer().history();
    assert_eq!(parent[0].slots[0].name(), "EXECUTEBUNDLE");
    assert_eq!(parent[0].slots[0].status(), MarkerStatus::Completed);
    let nested = bundle.buffer().history();
    assert_eq!(nested[0].slots[0].status(), MarkerStatus::Completed);
    assert_eq!(registry.len(), 2);
}

#[test]
fn test_drop_unregisters() {
    let device = SoftwareDevice::new();
    let registry = Arc::new(LiveStreamRegistry::new());
    let a = new_stream(&device, &registry);
    let b = new_stream(&device, &registry);
    assert_eq!(registry.len(), 2);
    drop(a);
    assert_eq!(registry.len(), 1);
    assert!(!registry.remove(StreamId(u64::MAX)));
    drop(b);
    assert!(registry.is_empty());
    assert_eq!(report(&registry).0, 0);
}

#[test]
fn test_concurrent_drop_while_printing() {
    const N: usize = 16;
    const M: usize = 6;
    let device = SoftwareDevice::new();
    let registry = Arc::new(LiveStreamRegistry::new());

    let mut streams: Vec<_> = (0..N)
        .map(|_| {
            let mut stream = new_stream(&device, &registry);
            stream.draw_instanced(3, 1, 0, 0);
            stream.close().unwrap();
            device.execute(stream.recorder()).unwrap();
            stream
        })
        .collect();
    let dropped: Vec<_> = streams.drain(..M).collect();

    std::thread::scope(|scope| {
        let printer = scope.spawn(|| {
            for _ in 0..50 {
                let (count, text) = report(&registry);
                assert!(count >= N - M && count <= N);
                assert_eq!(text.matches("Command list").count(), count);
            }
        });
        for stream in dropped {
            scope.spawn(move || drop(stream));
        }
        printer.join().unwrap();
    });

    assert_eq!(registry.len(), N - M);
    assert_eq!(report(&registry).0, N - M);
}

#[test]
fn test_global_registry_is_shared() {
    assert!(Arc::ptr_eq(
        &LiveStreamRegistry::global(),
        &LiveStreamRegistry::global()
    ));
}
