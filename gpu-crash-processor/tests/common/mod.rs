#![allow(dead_code)]

use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use gpu_dump::format::{self as md, ContextStatus, ContextType, GraphicsApi, ResourceFlags};
use gpu_dump_synth::*;
use test_assembler::*;

/// A minimal DXBC container whose `ILDN` chunk names `debug_name`.
pub fn dxbc_with_debug_name(debug_name: &str, code: &[u8]) -> Vec<u8> {
    let mut ildn = Vec::new();
    ildn.extend_from_slice(&0u16.to_le_bytes());
    ildn.extend_from_slice(&(debug_name.len() as u16).to_le_bytes());
    ildn.extend_from_slice(debug_name.as_bytes());
    ildn.push(0);
    while ildn.len() % 4 != 0 {
        ildn.push(0);
    }
    let chunks: [(&[u8; 4], &[u8]); 2] = [(b"ILDN", ildn.as_slice()), (b"DXIL", code)];

    let table_len = 32 + chunks.len() * 4;
    let mut body = Vec::new();
    let mut offsets = Vec::new();
    for (fourcc, payload) in chunks {
        offsets.push((table_len + body.len()) as u32);
        body.extend_from_slice(&fourcc[..]);
        body.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        body.extend_from_slice(payload);
    }
    let mut out = Vec::new();
    out.extend_from_slice(b"DXBC");
    out.extend_from_slice(&[0u8; 16]);
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&((table_len + body.len()) as u32).to_le_bytes());
    out.extend_from_slice(&(chunks.len() as u32).to_le_bytes());
    for offset in offsets {
        out.extend_from_slice(&offset.to_le_bytes());
    }
    out.extend_from_slice(&body);
    out
}

pub fn write(path: &Path, contents: &[u8]) {
    std::fs::write(path, contents).unwrap();
}

/// A page fault dump with two active shaders and two event markers.
///
/// `known_shader` and `debug_info` identify the first shader; the second is
/// never found. The first marker carries its own text, the second only the
/// token `marker_token`.
pub fn crash_dump(known_shader: u64, debug_info: u128, marker_token: u64) -> Vec<u8> {
    let e = Endian::Little;
    let os = DumpUtf8String::new("Windows 10.0.22631", e);
    let adapter = DumpUtf8String::new("Example GPU", e);
    let resource_name = DumpUtf8String::new("ShadowMap", e);
    let app = DumpUtf8String::new("viewer", e);
    let marker_text = Section::with_endian(e).append_bytes(b"GBuffer\0");

    let gpus = ListStream::new(md::GPUDUMP_STREAM_TYPE::GpuInfoListStream as u32, e)
        .add(GpuInfo::new(Some(&adapter), None, 0x1234, e));
    let fault = PageFault::new(
        0x7fff_0000_1000,
        md::PageFaultType::AddressTranslationError,
        md::MemoryAccessType::Read,
        1,
        2,
        e,
    )
    .add_resource(Resource::new(
        0x7fff_0000_0000,
        0x10000,
        (1024, 1024, 1),
        1,
        40,
        ResourceFlags::STATIC_TEXTURE_HEAP | ResourceFlags::WAS_DESTROYED,
        Some(&resource_name),
        e,
    ));
    let shaders = ListStream::new(md::GPUDUMP_STREAM_TYPE::ActiveShaderListStream as u32, e)
        .add(Shader::new(known_shader, 1, md::ShaderType::Fragment, false, debug_info, e))
        .add(Shader::new(0xdead_beef, 2, md::ShaderType::Compute, false, 0, e));
    let markers = ListStream::new(md::GPUDUMP_STREAM_TYPE::EventMarkerListStream as u32, e)
        .add(EventMarker::new(
            0x10,
            ContextStatus::Executing,
            ContextType::CommandList,
            0,
            Some(&marker_text),
            e,
        ))
        .add(EventMarker::new(
            0x20,
            ContextStatus::Executing,
            ContextType::CommandQueue,
            marker_token,
            None,
            e,
        ));
    let description = ListStream::new(md::GPUDUMP_STREAM_TYPE::DescriptionStream as u32, e)
        .add(DescriptionEntry::new(
            md::DescriptionKey::ApplicationName as u32,
            &app,
            e,
        ));

    SynthGpuDump::with_endian(e)
        .time_date_stamp(1_700_000_000)
        .add_stream(BaseInfo::new(GraphicsApi::D3D12, 4321, e))
        .add_stream(DeviceInfo::new(md::DeviceStatus::PageFault as u32, false, true, e))
        .add_stream(SystemInfo::new(Some(&os), 551, 61, e))
        .add_stream(gpus)
        .add_stream(fault)
        .add_stream(shaders)
        .add_stream(markers)
        .add_stream(description)
        .add(os)
        .add(adapter)
        .add(resource_name)
        .add(app)
        .add(marker_text)
        .finish()
        .unwrap()
}

/// A report sink that can be read back after being handed to a tracker.
#[derive(Clone, Default)]
pub struct SharedSink(pub Arc<Mutex<Vec<u8>>>);

impl SharedSink {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A report sink that panics when written to.
pub struct PanickingSink;

impl Write for PanickingSink {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        panic!("report sink exploded");
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
