// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

use memmap2::Mmap;
use num_traits::FromPrimitive;
use scroll::ctx::{SizeWith, TryFromCtx};
use scroll::{Pread, LE};
use std::collections::HashMap;
use std::fs::File;
use std::marker::PhantomData;
use std::mem;
use std::ops::Deref;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::warn;

use gpu_crash_common::format::{self as md, GPUDUMP_STREAM_TYPE};
pub use gpu_crash_common::format::{
    ContextStatus, ContextType, DescriptionKey, DeviceStatus, GraphicsApi, MemoryAccessType,
    PageFaultType, ResourceFlags, ShaderType,
};
use gpu_crash_common::ids::{DebugInfoId, ShaderHash};

/// An index into the contents of a GPU dump.
///
/// The `GpuDump` struct represents the parsed header and stream directory
/// contained at the start of a GPU dump. It can be instantiated by calling
/// [`GpuDump::read`] or [`GpuDump::read_path`].
///
/// Streams are only parsed when they are requested with [`GpuDump::get_stream`],
/// so a damaged or missing stream never prevents reading the others.
#[derive(Debug)]
pub struct GpuDump<'a, T>
where
    T: Deref<Target = [u8]> + 'a,
{
    data: T,
    /// The raw header from the file.
    pub header: md::GPUDUMP_HEADER,
    streams: HashMap<u32, (u32, md::GPUDUMP_DIRECTORY)>,
    _phantom: PhantomData<&'a [u8]>,
}

/// Errors encountered while reading a `GpuDump`.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("File not found")]
    FileNotFound,
    #[error("I/O error")]
    IoError,
    #[error("Missing GPU dump header (empty dump?)")]
    MissingHeader,
    #[error("Header mismatch")]
    HeaderMismatch,
    #[error("GPU dump version mismatch")]
    VersionMismatch,
    #[error("Missing stream directory (heavily truncated dump?)")]
    MissingDirectory,
    #[error("Error reading stream")]
    StreamReadFailure,
    #[error("Stream size mismatch: expected {expected} bytes, found {actual} bytes")]
    StreamSizeMismatch { expected: usize, actual: usize },
    #[error("Stream not found")]
    StreamNotFound,
    #[error("Data error")]
    DataError,
}

impl Error {
    /// Returns just the name of the error, as a more human-friendly version of
    /// an error-code for error logging.
    pub fn name(&self) -> &'static str {
        match self {
            Error::FileNotFound => "FileNotFound",
            Error::IoError => "IoError",
            Error::MissingHeader => "MissingHeader",
            Error::HeaderMismatch => "HeaderMismatch",
            Error::VersionMismatch => "VersionMismatch",
            Error::MissingDirectory => "MissingDirectory",
            Error::StreamReadFailure => "StreamReadFailure",
            Error::StreamSizeMismatch { .. } => "StreamSizeMismatch",
            Error::StreamNotFound => "StreamNotFound",
            Error::DataError => "DataError",
        }
    }
}

/// The fundamental unit of data in a `GpuDump`.
pub trait GpuDumpStream: Sized {
    /// The stream type constant used in the `md::GPUDUMP_DIRECTORY` entry.
    const STREAM_TYPE: u32;

    /// Read this `GpuDumpStream` type from `bytes`.
    ///
    /// * `bytes` is the contents of this specific stream.
    /// * `all` refers to the full contents of the dump, for reading strings and
    ///   other out-of-line data referred to by RVA.
    fn read(bytes: &[u8], all: &[u8]) -> Result<Self, Error>;
}

/// Basic information about the crashing process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GpuDumpBaseInfo {
    pub graphics_api: GraphicsApi,
    pub pid: u32,
}

/// The state of the device when the dump was captured.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GpuDumpDeviceInfo {
    pub status: DeviceStatus,
    pub adapter_reset: bool,
    pub engine_reset: bool,
}

/// The operating system and display driver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GpuDumpSystemInfo {
    pub os_version: Option<String>,
    pub driver_major: u32,
    pub driver_minor: u32,
}

/// One GPU in the system.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GpuDumpGpuInfo {
    pub adapter_name: Option<String>,
    pub generation_name: Option<String>,
    pub adapter_luid: u64,
}

/// All GPUs in the system.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GpuDumpGpuInfoList {
    pub gpus: Vec<GpuDumpGpuInfo>,
}

/// A resource mapped at (or recently at) the faulting address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GpuDumpResource {
    pub gpu_va: u64,
    pub size: u64,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_levels: u32,
    /// The DXGI format of the resource.
    pub format: u32,
    pub flags: ResourceFlags,
    pub debug_name: Option<String>,
}

/// A GPU page fault and the resources implicated in it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GpuDumpPageFaultInfo {
    pub faulting_gpu_va: u64,
    pub fault_type: PageFaultType,
    pub access_type: MemoryAccessType,
    pub engine: u32,
    pub client: u32,
    pub resources: Vec<GpuDumpResource>,
}

/// A shader that was executing when the dump was captured.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GpuDumpShader {
    pub hash: ShaderHash,
    pub instance: u64,
    pub shader_type: ShaderType,
    /// Driver-internal shaders have no application binary.
    pub is_internal: bool,
    pub debug_info_id: Option<DebugInfoId>,
}

/// All shaders that were executing when the dump was captured.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GpuDumpActiveShaderList {
    pub shaders: Vec<GpuDumpShader>,
}

/// The last event marker reached by one context.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GpuDumpEventMarker {
    pub context_id: u64,
    pub context_status: ContextStatus,
    pub context_type: ContextType,
    /// The application-supplied token of the marker.
    pub payload: u64,
    /// The marker data, if the marker carried any.
    pub data: Option<Vec<u8>>,
}

impl GpuDumpEventMarker {
    /// The marker data as text, if it is valid UTF-8.
    ///
    /// Trailing NULs are stripped since markers are usually C strings.
    pub fn data_str(&self) -> Option<&str> {
        self.data
            .as_deref()
            .and_then(|data| std::str::from_utf8(data).ok())
            .map(|s| s.trim_end_matches('\0'))
    }
}

/// The last event markers of every context.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GpuDumpEventMarkerList {
    pub markers: Vec<GpuDumpEventMarker>,
}

/// One application-supplied crash description entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GpuDumpDescriptionEntry {
    pub key: u32,
    pub value: String,
}

/// The application-supplied crash description.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GpuDumpDescription {
    pub entries: Vec<GpuDumpDescriptionEntry>,
}

impl GpuDumpDescription {
    /// Get the value of a well-known key.
    pub fn get(&self, key: DescriptionKey) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.key == key as u32)
            .map(|entry| entry.value.as_str())
    }
}

//======================================================
// Implementations

/// Produce a slice of `bytes` corresponding to the offset and size in `loc`, or an
/// `Error` if the data is not fully contained within `bytes`.
fn location_slice<'a>(
    bytes: &'a [u8],
    loc: &md::GPUDUMP_LOCATION_DESCRIPTOR,
) -> Result<&'a [u8], Error> {
    let start = loc.rva as usize;
    start
        .checked_add(loc.data_size as usize)
        .and_then(|end| bytes.get(start..end))
        .ok_or(Error::StreamReadFailure)
}

/// Read a u32 length-prefixed UTF-8 string from `bytes` at `rva`.
///
/// An RVA of 0 means "no string".
fn read_string_utf8(rva: md::RVA, bytes: &[u8]) -> Option<String> {
    if rva == 0 {
        return None;
    }
    let mut offset = rva as usize;
    let length: u32 = bytes.gread_with(&mut offset, LE).ok()?;
    let end = offset.checked_add(length as usize)?;
    let slice = bytes.get(offset..end)?;
    match std::str::from_utf8(slice) {
        Ok(s) => Some(s.to_owned()),
        Err(_) => {
            warn!("string at {:#x} is not valid UTF-8", rva);
            None
        }
    }
}

/// Check that `count` entries of `size` bytes (plus a `header_size` prefix) fit in `bytes`.
fn ensure_count_in_bound(
    bytes: &[u8],
    count: usize,
    size: usize,
    header_size: usize,
) -> Result<usize, Error> {
    let expected = count
        .checked_mul(size)
        .and_then(|v| v.checked_add(header_size))
        .ok_or(Error::StreamReadFailure)?;
    if expected > bytes.len() {
        return Err(Error::StreamSizeMismatch {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(expected)
}

/// Read a `u32` count followed by that many `T` entries, starting at `offset`.
fn read_list<'a, T>(offset: &mut usize, bytes: &'a [u8]) -> Result<Vec<T>, Error>
where
    T: TryFromCtx<'a, scroll::Endian, [u8], Error = scroll::Error>,
    T: SizeWith<scroll::Endian>,
{
    let start = *offset;
    let count: u32 = bytes
        .gread_with(offset, LE)
        .or(Err(Error::StreamReadFailure))?;
    let entry_size = <T>::size_with(&LE);
    let expected = ensure_count_in_bound(
        &bytes[start..],
        count as usize,
        entry_size,
        mem::size_of::<u32>(),
    )?;
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let raw: T = bytes
            .gread_with(offset, LE)
            .or(Err(Error::StreamReadFailure))?;
        entries.push(raw);
    }
    debug_assert_eq!(*offset, start + expected);
    Ok(entries)
}

/// Read a list stream that must consist of exactly the list, optionally followed
/// by 4 bytes of padding.
fn read_stream_list<'a, T>(bytes: &'a [u8]) -> Result<Vec<T>, Error>
where
    T: TryFromCtx<'a, scroll::Endian, [u8], Error = scroll::Error>,
    T: SizeWith<scroll::Endian>,
{
    let mut offset = 0;
    let entries = read_list(&mut offset, bytes)?;
    match bytes.len() - offset {
        0 | 4 => Ok(entries),
        _ => Err(Error::StreamSizeMismatch {
            expected: offset,
            actual: bytes.len(),
        }),
    }
}

/// Convert a raw enum value, logging values this implementation doesn't know.
fn enum_or<E: FromPrimitive + std::fmt::Debug>(raw: u32, what: &str, fallback: E) -> E {
    E::from_u32(raw).unwrap_or_else(|| {
        warn!("unknown {} value {:#x}, using {:?}", what, raw, fallback);
        fallback
    })
}

impl GpuDumpStream for GpuDumpBaseInfo {
    const STREAM_TYPE: u32 = GPUDUMP_STREAM_TYPE::BaseInfoStream as u32;

    fn read(bytes: &[u8], _all: &[u8]) -> Result<Self, Error> {
        let raw: md::GPUDUMP_BASE_INFO = bytes
            .pread_with(0, LE)
            .or(Err(Error::StreamReadFailure))?;
        Ok(GpuDumpBaseInfo {
            graphics_api: enum_or(raw.graphics_api, "graphics api", GraphicsApi::Unknown),
            pid: raw.pid,
        })
    }
}

impl GpuDumpStream for GpuDumpDeviceInfo {
    const STREAM_TYPE: u32 = GPUDUMP_STREAM_TYPE::DeviceInfoStream as u32;

    fn read(bytes: &[u8], _all: &[u8]) -> Result<Self, Error> {
        let raw: md::GPUDUMP_DEVICE_INFO = bytes
            .pread_with(0, LE)
            .or(Err(Error::StreamReadFailure))?;
        Ok(GpuDumpDeviceInfo {
            status: enum_or(raw.status, "device status", DeviceStatus::Unknown),
            adapter_reset: raw.adapter_reset != 0,
            engine_reset: raw.engine_reset != 0,
        })
    }
}

impl GpuDumpStream for GpuDumpSystemInfo {
    const STREAM_TYPE: u32 = GPUDUMP_STREAM_TYPE::SystemInfoStream as u32;

    fn read(bytes: &[u8], all: &[u8]) -> Result<Self, Error> {
        let raw: md::GPUDUMP_SYSTEM_INFO = bytes
            .pread_with(0, LE)
            .or(Err(Error::StreamReadFailure))?;
        Ok(GpuDumpSystemInfo {
            os_version: read_string_utf8(raw.os_version_rva, all),
            driver_major: raw.driver_major,
            driver_minor: raw.driver_minor,
        })
    }
}

impl GpuDumpStream for GpuDumpGpuInfoList {
    const STREAM_TYPE: u32 = GPUDUMP_STREAM_TYPE::GpuInfoListStream as u32;

    fn read(bytes: &[u8], all: &[u8]) -> Result<Self, Error> {
        let raw_gpus: Vec<md::GPUDUMP_GPU_INFO> = read_stream_list(bytes)?;
        let gpus = raw_gpus
            .into_iter()
            .map(|raw| GpuDumpGpuInfo {
                adapter_name: read_string_utf8(raw.adapter_name_rva, all),
                generation_name: read_string_utf8(raw.generation_name_rva, all),
                adapter_luid: raw.adapter_luid,
            })
            .collect();
        Ok(GpuDumpGpuInfoList { gpus })
    }
}

impl GpuDumpStream for GpuDumpPageFaultInfo {
    const STREAM_TYPE: u32 = GPUDUMP_STREAM_TYPE::PageFaultInfoStream as u32;

    fn read(bytes: &[u8], all: &[u8]) -> Result<Self, Error> {
        let mut offset = 0;
        let raw: md::GPUDUMP_PAGE_FAULT_INFO = bytes
            .gread_with(&mut offset, LE)
            .or(Err(Error::StreamReadFailure))?;
        ensure_count_in_bound(
            bytes,
            raw.resource_count as usize,
            <md::GPUDUMP_RESOURCE_INFO>::size_with(&LE),
            offset,
        )?;
        let mut resources = Vec::with_capacity(raw.resource_count as usize);
        for _ in 0..raw.resource_count {
            let resource: md::GPUDUMP_RESOURCE_INFO = bytes
                .gread_with(&mut offset, LE)
                .or(Err(Error::StreamReadFailure))?;
            resources.push(GpuDumpResource {
                gpu_va: resource.gpu_va,
                size: resource.size,
                width: resource.width,
                height: resource.height,
                depth: resource.depth,
                mip_levels: resource.mip_levels,
                format: resource.format,
                flags: ResourceFlags::from_bits_truncate(resource.flags),
                debug_name: read_string_utf8(resource.debug_name_rva, all),
            });
        }
        Ok(GpuDumpPageFaultInfo {
            faulting_gpu_va: raw.faulting_gpu_va,
            fault_type: enum_or(raw.fault_type, "page fault type", PageFaultType::Unknown),
            access_type: enum_or(raw.access_type, "access type", MemoryAccessType::Unknown),
            engine: raw.engine,
            client: raw.client,
            resources,
        })
    }
}

impl GpuDumpStream for GpuDumpActiveShaderList {
    const STREAM_TYPE: u32 = GPUDUMP_STREAM_TYPE::ActiveShaderListStream as u32;

    fn read(bytes: &[u8], _all: &[u8]) -> Result<Self, Error> {
        let raw_shaders: Vec<md::GPUDUMP_SHADER_INFO> = read_stream_list(bytes)?;
        let shaders = raw_shaders
            .into_iter()
            .map(|raw| {
                let debug_info_id =
                    DebugInfoId::from_parts(raw.debug_info_id_hi, raw.debug_info_id_lo);
                GpuDumpShader {
                    hash: ShaderHash(raw.shader_hash),
                    instance: raw.shader_instance,
                    shader_type: enum_or(raw.shader_type, "shader type", ShaderType::Unknown),
                    is_internal: raw.is_internal != 0,
                    debug_info_id: (!debug_info_id.is_none()).then_some(debug_info_id),
                }
            })
            .collect();
        Ok(GpuDumpActiveShaderList { shaders })
    }
}

impl GpuDumpStream for GpuDumpEventMarkerList {
    const STREAM_TYPE: u32 = GPUDUMP_STREAM_TYPE::EventMarkerListStream as u32;

    fn read(bytes: &[u8], all: &[u8]) -> Result<Self, Error> {
        let raw_markers: Vec<md::GPUDUMP_MARKER_INFO> = read_stream_list(bytes)?;
        let mut markers = Vec::with_capacity(raw_markers.len());
        for raw in raw_markers {
            let data = if raw.data_size == 0 {
                None
            } else {
                let loc = md::GPUDUMP_LOCATION_DESCRIPTOR {
                    data_size: raw.data_size,
                    rva: raw.data_rva,
                };
                match location_slice(all, &loc) {
                    Ok(data) => Some(data.to_vec()),
                    Err(_) => {
                        warn!(
                            "event marker data for context {:#x} is out of bounds ({} bytes at {:#x})",
                            raw.context_id, raw.data_size, raw.data_rva
                        );
                        None
                    }
                }
            };
            markers.push(GpuDumpEventMarker {
                context_id: raw.context_id,
                context_status: enum_or(raw.context_status, "context status", ContextStatus::Invalid),
                context_type: enum_or(raw.context_type, "context type", ContextType::Invalid),
                payload: raw.payload,
                data,
            });
        }
        Ok(GpuDumpEventMarkerList { markers })
    }
}

impl GpuDumpStream for GpuDumpDescription {
    const STREAM_TYPE: u32 = GPUDUMP_STREAM_TYPE::DescriptionStream as u32;

    fn read(bytes: &[u8], all: &[u8]) -> Result<Self, Error> {
        let raw_entries: Vec<md::GPUDUMP_DESCRIPTION_ENTRY> = read_stream_list(bytes)?;
        let entries = raw_entries
            .into_iter()
            .filter_map(|raw| {
                let value = read_string_utf8(raw.value_rva, all)?;
                Some(GpuDumpDescriptionEntry {
                    key: raw.key,
                    value,
                })
            })
            .collect();
        Ok(GpuDumpDescription { entries })
    }
}

impl<'a> GpuDump<'a, Mmap> {
    /// Read a `GpuDump` from a `Path` to a file on disk.
    pub fn read_path<P>(path: P) -> Result<GpuDump<'a, Mmap>, Error>
    where
        P: AsRef<Path>,
    {
        let f = File::open(path).or(Err(Error::FileNotFound))?;
        let mmap = unsafe { Mmap::map(&f).or(Err(Error::IoError))? };
        GpuDump::read(mmap)
    }
}

impl<'a, T> GpuDump<'a, T>
where
    T: Deref<Target = [u8]> + 'a,
{
    /// Read a `GpuDump` from the provided `data`.
    ///
    /// Typically this will be a `Vec<u8>` or `&[u8]` with the full contents of the dump,
    /// but you can also use something like `memmap2::Mmap`.
    pub fn read(data: T) -> Result<GpuDump<'a, T>, Error> {
        let mut offset = 0;
        let header: md::GPUDUMP_HEADER = data
            .gread_with(&mut offset, LE)
            .or(Err(Error::MissingHeader))?;
        if header.signature != md::GPUDUMP_SIGNATURE {
            return Err(Error::HeaderMismatch);
        }
        if header.version != md::GPUDUMP_VERSION {
            return Err(Error::VersionMismatch);
        }

        offset = header.stream_directory_rva as usize;
        ensure_count_in_bound(
            data.get(offset..).ok_or(Error::MissingDirectory)?,
            header.stream_count as usize,
            <md::GPUDUMP_DIRECTORY>::size_with(&LE),
            0,
        )
        .or(Err(Error::MissingDirectory))?;

        let mut streams = HashMap::with_capacity(header.stream_count as usize);
        for i in 0..header.stream_count {
            let dir: md::GPUDUMP_DIRECTORY = data
                .gread_with(&mut offset, LE)
                .or(Err(Error::MissingDirectory))?;
            if let Some((old_idx, _)) = streams.insert(dir.stream_type, (i, dir.clone())) {
                warn!(
                    "GPU dump contains multiple streams of type {} ({:?}) at indices {} and {} (using {})",
                    dir.stream_type,
                    GPUDUMP_STREAM_TYPE::from_u32(dir.stream_type),
                    old_idx,
                    i,
                    i,
                );
            }
        }

        Ok(GpuDump {
            data,
            header,
            streams,
            _phantom: PhantomData,
        })
    }

    /// Read and parse the specified [`GpuDumpStream`] `S` from the dump, if it exists.
    ///
    /// Older drivers omit newer streams, so callers should treat
    /// [`Error::StreamNotFound`] as "this section is unavailable" rather than as a
    /// fatal error.
    pub fn get_stream<S>(&self) -> Result<S, Error>
    where
        S: GpuDumpStream,
    {
        let bytes = self.get_raw_stream(S::STREAM_TYPE)?;
        S::read(bytes, self.data.deref())
    }

    /// Get a stream of raw data from the dump.
    pub fn get_raw_stream(&self, stream_type: u32) -> Result<&[u8], Error> {
        match self.streams.get(&stream_type) {
            None => Err(Error::StreamNotFound),
            Some((_, dir)) => location_slice(self.data.deref(), &dir.location),
        }
    }

    /// The stream types present in this dump, in directory order.
    pub fn stream_types(&self) -> Vec<u32> {
        let mut types: Vec<_> = self.streams.iter().map(|(ty, (idx, _))| (*idx, *ty)).collect();
        types.sort_unstable();
        types.into_iter().map(|(_, ty)| ty).collect()
    }

    /// When the dump was captured.
    pub fn time(&self) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(self.header.time_date_stamp as u64)
    }

    /// The raw bytes of the whole dump.
    pub fn bytes(&self) -> &[u8] {
        self.data.deref()
    }
}
