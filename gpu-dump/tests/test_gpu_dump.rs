// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

use gpu_dump::format::{self as md, ContextStatus, ContextType, GraphicsApi, ResourceFlags};
use gpu_dump::*;
use gpu_dump_synth::*;
use std::io::Write;
use std::time::{Duration, SystemTime};
use test_assembler::*;

fn read_synth_dump<'a>(dump: SynthGpuDump) -> Result<GpuDump<'a, Vec<u8>>, Error> {
    GpuDump::read(dump.finish().unwrap())
}

#[test]
fn test_empty_dump() {
    let dump = read_synth_dump(SynthGpuDump::new()).unwrap();
    assert!(dump.stream_types().is_empty());
    assert_eq!(dump.base_info().unwrap_err(), Error::StreamNotFound);
    assert_eq!(dump.page_fault_info().unwrap_err(), Error::StreamNotFound);
}

#[test]
fn test_bad_signature() {
    let mut contents = SynthGpuDump::new().finish().unwrap();
    contents[0] = b'M';
    assert_eq!(GpuDump::read(contents).unwrap_err(), Error::HeaderMismatch);
}

#[test]
fn test_bad_version() {
    let mut contents = SynthGpuDump::new().finish().unwrap();
    contents[4] = 7;
    assert_eq!(GpuDump::read(contents).unwrap_err(), Error::VersionMismatch);
}

#[test]
fn test_truncated_directory() {
    let list = ListStream::new(
        md::GPUDUMP_STREAM_TYPE::ActiveShaderListStream as u32,
        Endian::Little,
    )
    .add(Shader::new(1, 0, md::ShaderType::Compute, false, 0, Endian::Little));
    let mut contents = SynthGpuDump::with_endian(Endian::Little)
        .add_stream(list)
        .finish()
        .unwrap();
    contents.truncate(contents.len() - 4);
    assert_eq!(GpuDump::read(contents).unwrap_err(), Error::MissingDirectory);
}

#[test]
fn test_time() {
    let dump = read_synth_dump(SynthGpuDump::new().time_date_stamp(1_700_000_000)).unwrap();
    assert_eq!(
        DumpDecoder::time(&dump),
        Some(SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000))
    );

    let dump = read_synth_dump(SynthGpuDump::new().time_date_stamp(0)).unwrap();
    assert_eq!(DumpDecoder::time(&dump), None);
}

#[test]
fn test_base_and_device_info() {
    let dump = SynthGpuDump::with_endian(Endian::Little)
        .add_stream(BaseInfo::new(GraphicsApi::D3D12, 4321, Endian::Little))
        .add_stream(DeviceInfo::new(
            md::DeviceStatus::PageFault as u32,
            false,
            true,
            Endian::Little,
        ));
    let dump = read_synth_dump(dump).unwrap();

    let base = dump.base_info().unwrap();
    assert_eq!(base.graphics_api, GraphicsApi::D3D12);
    assert_eq!(base.pid, 4321);

    let device = dump.device_info().unwrap();
    assert_eq!(device.status, md::DeviceStatus::PageFault);
    assert!(!device.adapter_reset);
    assert!(device.engine_reset);
}

#[test]
fn test_unknown_device_status() {
    let dump = SynthGpuDump::with_endian(Endian::Little).add_stream(DeviceInfo::new(
        0x1234,
        false,
        false,
        Endian::Little,
    ));
    let dump = read_synth_dump(dump).unwrap();
    assert_eq!(dump.device_info().unwrap().status, md::DeviceStatus::Unknown);
}

#[test]
fn test_system_and_gpu_info() {
    let os = DumpUtf8String::new("Windows 10.0.22631", Endian::Little);
    let adapter = DumpUtf8String::new("Example GPU 4090", Endian::Little);
    let generation = DumpUtf8String::new("AD102", Endian::Little);
    let gpus = ListStream::new(
        md::GPUDUMP_STREAM_TYPE::GpuInfoListStream as u32,
        Endian::Little,
    )
    .add(GpuInfo::new(Some(&adapter), Some(&generation), 0x1_0000_beef, Endian::Little))
    .add(GpuInfo::new(None, None, 7, Endian::Little));
    let dump = SynthGpuDump::with_endian(Endian::Little)
        .add_stream(SystemInfo::new(Some(&os), 551, 61, Endian::Little))
        .add_stream(gpus)
        .add(os)
        .add(adapter)
        .add(generation);
    let dump = read_synth_dump(dump).unwrap();

    let system = dump.system_info().unwrap();
    assert_eq!(system.os_version.as_deref(), Some("Windows 10.0.22631"));
    assert_eq!((system.driver_major, system.driver_minor), (551, 61));

    let gpus = dump.gpu_info().unwrap().gpus;
    assert_eq!(gpus.len(), 2);
    assert_eq!(gpus[0].adapter_name.as_deref(), Some("Example GPU 4090"));
    assert_eq!(gpus[0].generation_name.as_deref(), Some("AD102"));
    assert_eq!(gpus[0].adapter_luid, 0x1_0000_beef);
    assert_eq!(gpus[1].adapter_name, None);
    assert_eq!(gpus[1].adapter_luid, 7);
}

#[test]
fn test_page_fault() {
    let name = DumpUtf8String::new("ShadowMap", Endian::Little);
    let fault = PageFault::new(
        0x7fff_0000_1000,
        md::PageFaultType::AddressTranslationError,
        md::MemoryAccessType::Read,
        3,
        9,
        Endian::Little,
    )
    .add_resource(Resource::new(
        0x7fff_0000_0000,
        0x10000,
        (1024, 1024, 1),
        1,
        40,
        ResourceFlags::STATIC_TEXTURE_HEAP | ResourceFlags::WAS_DESTROYED,
        Some(&name),
        Endian::Little,
    ))
    .add_resource(Resource::new(
        0x7fff_1000_0000,
        256,
        (256, 1, 1),
        1,
        0,
        ResourceFlags::BUFFER_HEAP,
        None,
        Endian::Little,
    ));
    let dump = SynthGpuDump::with_endian(Endian::Little)
        .add_stream(fault)
        .add(name);
    let dump = read_synth_dump(dump).unwrap();

    let fault = dump.page_fault_info().unwrap();
    assert_eq!(fault.faulting_gpu_va, 0x7fff_0000_1000);
    assert_eq!(fault.fault_type, md::PageFaultType::AddressTranslationError);
    assert_eq!(fault.access_type, md::MemoryAccessType::Read);
    assert_eq!((fault.engine, fault.client), (3, 9));
    assert_eq!(fault.resources.len(), 2);
    assert_eq!(fault.resources[0].debug_name.as_deref(), Some("ShadowMap"));
    assert_eq!(
        (fault.resources[0].width, fault.resources[0].height),
        (1024, 1024)
    );
    assert!(fault.resources[0].flags.contains(ResourceFlags::WAS_DESTROYED));
    assert_eq!(fault.resources[1].debug_name, None);
    assert_eq!(fault.resources[1].flags, ResourceFlags::BUFFER_HEAP);
}

#[test]
fn test_page_fault_resource_count_too_large() {
    let mut section = Section::with_endian(Endian::Little)
        .D64(0x1000)
        .D32(0)
        .D32(0)
        .D32(0)
        .D32(0)
        .D32(5);
    // Only room for one resource.
    section = section.append_repeated(0, 44);
    let stream = SimpleStream {
        stream_type: md::GPUDUMP_STREAM_TYPE::PageFaultInfoStream as u32,
        section,
    };
    let dump = read_synth_dump(SynthGpuDump::with_endian(Endian::Little).add_stream(stream)).unwrap();
    assert!(matches!(
        dump.page_fault_info().unwrap_err(),
        Error::StreamSizeMismatch { .. }
    ));
}

#[test]
fn test_active_shaders() {
    let shaders = ListStream::new(
        md::GPUDUMP_STREAM_TYPE::ActiveShaderListStream as u32,
        Endian::Little,
    )
    .add(Shader::new(
        0x1122_3344_5566_7788,
        2,
        md::ShaderType::Fragment,
        false,
        0xaaaa_0000_0000_0001_bbbb_0000_0000_0002,
        Endian::Little,
    ))
    .add(Shader::new(0x99, 0, md::ShaderType::Compute, true, 0, Endian::Little));
    let dump = read_synth_dump(SynthGpuDump::with_endian(Endian::Little).add_stream(shaders)).unwrap();

    let shaders = dump.active_shaders().unwrap().shaders;
    assert_eq!(shaders.len(), 2);
    assert_eq!(shaders[0].hash, ShaderHash(0x1122_3344_5566_7788));
    assert_eq!(shaders[0].shader_type, md::ShaderType::Fragment);
    assert_eq!(
        shaders[0].debug_info_id,
        Some(DebugInfoId::from_parts(0xaaaa_0000_0000_0001, 0xbbbb_0000_0000_0002))
    );
    assert!(shaders[1].is_internal);
    assert_eq!(shaders[1].debug_info_id, None);
}

#[test]
fn test_event_markers() {
    let data = Section::with_endian(Endian::Little).append_bytes(b"ShadowPass\0");
    let markers = ListStream::new(
        md::GPUDUMP_STREAM_TYPE::EventMarkerListStream as u32,
        Endian::Little,
    )
    .add(EventMarker::new(
        0x10,
        ContextStatus::Executing,
        ContextType::CommandList,
        0,
        Some(&data),
        Endian::Little,
    ))
    .add(EventMarker::new(
        0x20,
        ContextStatus::Finished,
        ContextType::CommandQueue,
        0xfeed,
        None,
        Endian::Little,
    ));
    let dump = SynthGpuDump::with_endian(Endian::Little)
        .add_stream(markers)
        .add(data);
    let dump = read_synth_dump(dump).unwrap();

    let markers = dump.event_markers().unwrap().markers;
    assert_eq!(markers.len(), 2);
    assert_eq!(markers[0].context_status, ContextStatus::Executing);
    assert_eq!(markers[0].data_str(), Some("ShadowPass"));
    assert_eq!(markers[1].context_type, ContextType::CommandQueue);
    assert_eq!(markers[1].payload, 0xfeed);
    assert_eq!(markers[1].data, None);
}

#[test]
fn test_event_marker_data_out_of_bounds() {
    let data = Section::with_endian(Endian::Little).append_bytes(b"Bloom\0");
    let bad = Section::with_endian(Endian::Little)
        .D64(0x10)
        .D32(ContextStatus::Executing as u32)
        .D32(ContextType::CommandList as u32)
        .D64(0x42)
        .D32(16)
        .D32(0xffff_0000);
    let markers = ListStream::new(
        md::GPUDUMP_STREAM_TYPE::EventMarkerListStream as u32,
        Endian::Little,
    )
    .add(bad)
    .add(Section::from(EventMarker::new(
        0x20,
        ContextStatus::Finished,
        ContextType::CommandQueue,
        0,
        Some(&data),
        Endian::Little,
    )));
    let dump = SynthGpuDump::with_endian(Endian::Little)
        .add_stream(markers)
        .add(data);
    let dump = read_synth_dump(dump).unwrap();

    // The damaged marker loses its data; the rest of the section survives.
    let markers = dump.event_markers().unwrap().markers;
    assert_eq!(markers.len(), 2);
    assert_eq!(markers[0].payload, 0x42);
    assert_eq!(markers[0].data, None);
    assert_eq!(markers[1].data_str(), Some("Bloom"));
}

#[test]
fn test_description() {
    let name = DumpUtf8String::new("Renderer", Endian::Little);
    let custom = DumpUtf8String::new("nightly", Endian::Little);
    let entries = ListStream::new(
        md::GPUDUMP_STREAM_TYPE::DescriptionStream as u32,
        Endian::Little,
    )
    .add(DescriptionEntry::new(
        md::DescriptionKey::ApplicationName as u32,
        &name,
        Endian::Little,
    ))
    .add(DescriptionEntry::new(
        md::DescriptionKey::UserDefined as u32 + 1,
        &custom,
        Endian::Little,
    ));
    let dump = SynthGpuDump::with_endian(Endian::Little)
        .add_stream(entries)
        .add(name)
        .add(custom);
    let dump = read_synth_dump(dump).unwrap();

    let description = dump.description().unwrap();
    assert_eq!(
        description.get(md::DescriptionKey::ApplicationName),
        Some("Renderer")
    );
    assert_eq!(description.get(md::DescriptionKey::ApplicationVersion), None);
    assert_eq!(description.entries[1].key, 0x10001);
    assert_eq!(description.entries[1].value, "nightly");
}

#[test]
fn test_duplicate_streams_use_the_last() {
    let dump = SynthGpuDump::with_endian(Endian::Little)
        .add_stream(BaseInfo::new(GraphicsApi::D3D11, 1, Endian::Little))
        .add_stream(BaseInfo::new(GraphicsApi::Vulkan, 2, Endian::Little));
    let dump = read_synth_dump(dump).unwrap();
    assert_eq!(dump.base_info().unwrap().pid, 2);
    assert_eq!(dump.stream_types(), vec![md::GPUDUMP_STREAM_TYPE::BaseInfoStream as u32]);
}

#[test]
fn test_read_path() {
    let contents = SynthGpuDump::with_endian(Endian::Little)
        .add_stream(BaseInfo::new(GraphicsApi::Vulkan, 77, Endian::Little))
        .finish()
        .unwrap();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&contents).unwrap();
    file.flush().unwrap();

    let dump = GpuDump::read_path(file.path()).unwrap();
    assert_eq!(dump.base_info().unwrap().graphics_api, GraphicsApi::Vulkan);
    assert_eq!(
        GpuDump::read_path("/nonexistent/gpu.dump").unwrap_err(),
        Error::FileNotFound
    );
}
