//! GPU dump structure definitions.
//!
//! A GPU dump is laid out like a minidump: a fixed header, a directory of
//! `(stream type, location)` entries, and the stream payloads. All values are
//! little-endian. Variable-length lists are stored as a `u32` count followed by
//! the fixed-size entries, and strings are stored out-of-line as a `u32` byte
//! length followed by UTF-8 bytes.
#![allow(non_camel_case_types)]
#![allow(clippy::upper_case_acronyms)]

use bitflags::bitflags;
use enum_primitive_derive::Primitive;
use scroll::{Pread, SizeWith};

/// An offset from the start of the GPU dump.
pub type RVA = u32;

/// The 4-byte magic number at the start of a GPU dump.
///
/// In little endian this spells 'GPUD'.
pub const GPUDUMP_SIGNATURE: u32 = 0x44555047;

/// The version of the GPU dump format.
pub const GPUDUMP_VERSION: u32 = 1;

/// The header at the start of a GPU dump.
#[derive(Clone, Debug, Pread, SizeWith)]
pub struct GPUDUMP_HEADER {
    /// This should be [`GPUDUMP_SIGNATURE`].
    pub signature: u32,
    /// This should be [`GPUDUMP_VERSION`].
    pub version: u32,
    /// The number of streams contained in the stream directory.
    pub stream_count: u32,
    /// The offset to the stream directory within the dump. The stream directory
    /// is an array containing `stream_count` [`GPUDUMP_DIRECTORY`] entries.
    pub stream_directory_rva: RVA,
    /// When the dump was captured, in `time_t` format.
    pub time_date_stamp: u32,
}

/// A location within a GPU dump comprised of an offset and a size.
#[derive(Copy, Default, Clone, Debug, Pread, SizeWith)]
pub struct GPUDUMP_LOCATION_DESCRIPTOR {
    /// The size of this data.
    pub data_size: u32,
    /// The offset to this data within the dump.
    pub rva: RVA,
}

/// Information about a data stream contained in a GPU dump.
#[derive(Clone, Debug, Pread, SizeWith)]
pub struct GPUDUMP_DIRECTORY {
    /// One of the values in [`GPUDUMP_STREAM_TYPE`] for known stream types.
    pub stream_type: u32,
    /// The location of the stream contents within the dump.
    pub location: GPUDUMP_LOCATION_DESCRIPTOR,
}

/// The types of known GPU dump data streams.
///
/// Dumps written by older drivers omit the newer streams entirely, so every
/// stream other than the header is optional.
#[repr(u32)]
#[derive(Copy, Clone, PartialEq, Eq, Debug, Primitive)]
pub enum GPUDUMP_STREAM_TYPE {
    /// An unused stream directory entry
    UnusedStream = 0,
    /// See [`GPUDUMP_BASE_INFO`].
    BaseInfoStream = 1,
    /// See [`GPUDUMP_DEVICE_INFO`].
    DeviceInfoStream = 2,
    /// See [`GPUDUMP_SYSTEM_INFO`].
    SystemInfoStream = 3,
    /// A list of [`GPUDUMP_GPU_INFO`].
    GpuInfoListStream = 4,
    /// A [`GPUDUMP_PAGE_FAULT_INFO`] followed by its [`GPUDUMP_RESOURCE_INFO`] entries.
    PageFaultInfoStream = 5,
    /// A list of [`GPUDUMP_SHADER_INFO`].
    ActiveShaderListStream = 6,
    /// A list of [`GPUDUMP_MARKER_INFO`].
    EventMarkerListStream = 7,
    /// A list of [`GPUDUMP_DESCRIPTION_ENTRY`].
    DescriptionStream = 8,
}

/// The graphics API the crashing process was using.
#[repr(u32)]
#[derive(Copy, Clone, PartialEq, Eq, Debug, Primitive)]
pub enum GraphicsApi {
    Unknown = 0,
    D3D11 = 1,
    D3D12 = 2,
    Vulkan = 3,
}

/// Basic information about the crashing process.
#[derive(Clone, Debug, Default, Pread, SizeWith)]
pub struct GPUDUMP_BASE_INFO {
    /// A [`GraphicsApi`] value.
    pub graphics_api: u32,
    /// The process id of the crashing process.
    pub pid: u32,
}

/// The status of the device at the time the dump was captured.
#[repr(u32)]
#[derive(Copy, Clone, PartialEq, Eq, Debug, Primitive)]
pub enum DeviceStatus {
    Active = 0,
    Timeout = 1,
    OutOfMemory = 2,
    PageFault = 3,
    Stopped = 4,
    Reset = 5,
    Unknown = 6,
    DmaFault = 7,
}

/// Information about the device at the time of the crash.
#[derive(Clone, Debug, Default, Pread, SizeWith)]
pub struct GPUDUMP_DEVICE_INFO {
    /// A [`DeviceStatus`] value.
    pub status: u32,
    /// Nonzero if the adapter was reset.
    pub adapter_reset: u32,
    /// Nonzero if a GPU engine was reset.
    pub engine_reset: u32,
}

/// Information about the operating system and display driver.
#[derive(Clone, Debug, Default, Pread, SizeWith)]
pub struct GPUDUMP_SYSTEM_INFO {
    /// An offset to a length-prefixed UTF-8 string describing the OS version.
    pub os_version_rva: RVA,
    pub driver_major: u32,
    pub driver_minor: u32,
}

/// Information about one GPU in the system.
#[derive(Clone, Debug, Default, Pread, SizeWith)]
pub struct GPUDUMP_GPU_INFO {
    /// An offset to a length-prefixed UTF-8 string with the adapter name.
    pub adapter_name_rva: RVA,
    /// An offset to a length-prefixed UTF-8 string with the architecture generation name.
    pub generation_name_rva: RVA,
    /// The locally unique identifier of the adapter.
    pub adapter_luid: u64,
}

/// Why the GPU page fault happened.
#[repr(u32)]
#[derive(Copy, Clone, PartialEq, Eq, Debug, Primitive)]
pub enum PageFaultType {
    Unknown = 0,
    AddressTranslationError = 1,
    IllegalAccess = 2,
}

/// The kind of memory access that faulted.
#[repr(u32)]
#[derive(Copy, Clone, PartialEq, Eq, Debug, Primitive)]
pub enum MemoryAccessType {
    Unknown = 0,
    Read = 1,
    Write = 2,
    Atomic = 3,
}

/// Information about a GPU page fault.
///
/// This is immediately followed by `resource_count` [`GPUDUMP_RESOURCE_INFO`] entries
/// describing the resources that were mapped at (or recently at) the faulting address.
#[derive(Clone, Debug, Default, Pread, SizeWith)]
pub struct GPUDUMP_PAGE_FAULT_INFO {
    /// The GPU virtual address that caused the fault.
    pub faulting_gpu_va: u64,
    /// A [`PageFaultType`] value.
    pub fault_type: u32,
    /// A [`MemoryAccessType`] value.
    pub access_type: u32,
    /// The hardware engine that faulted.
    pub engine: u32,
    /// The hardware client that faulted.
    pub client: u32,
    pub resource_count: u32,
}

bitflags! {
    /// Heap classification flags for a resource implicated in a page fault.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct ResourceFlags: u32 {
        const BUFFER_HEAP = 1 << 0;
        const STATIC_TEXTURE_HEAP = 1 << 1;
        const RTV_DSV_HEAP = 1 << 2;
        const PLACED_RESOURCE = 1 << 3;
        const WAS_DESTROYED = 1 << 4;
    }
}

/// A resource implicated in a GPU page fault.
#[derive(Clone, Debug, Default, Pread, SizeWith)]
pub struct GPUDUMP_RESOURCE_INFO {
    pub gpu_va: u64,
    pub size: u64,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_levels: u32,
    /// The DXGI format of the resource.
    pub format: u32,
    /// [`ResourceFlags`] bits.
    pub flags: u32,
    /// An offset to a length-prefixed UTF-8 string with the debug name, or 0.
    pub debug_name_rva: RVA,
}

/// The pipeline stage a shader runs in.
#[repr(u32)]
#[derive(Copy, Clone, PartialEq, Eq, Debug, Primitive)]
pub enum ShaderType {
    Unknown = 0,
    Vertex = 1,
    TessellationControl = 2,
    TessellationEvaluation = 3,
    Geometry = 4,
    Fragment = 5,
    Compute = 6,
    RayTracing = 7,
    Mesh = 8,
    Task = 9,
}

/// A shader that was executing on the GPU when the dump was captured.
#[derive(Clone, Debug, Default, Pread, SizeWith)]
pub struct GPUDUMP_SHADER_INFO {
    /// The content hash of the shader binary.
    pub shader_hash: u64,
    /// An identifier of the shader instance (pipeline-specific).
    pub shader_instance: u64,
    /// A [`ShaderType`] value.
    pub shader_type: u32,
    /// Nonzero for driver-internal shaders, which have no binary.
    pub is_internal: u32,
    /// High half of the shader debug info identifier, or 0.
    pub debug_info_id_hi: u64,
    /// Low half of the shader debug info identifier, or 0.
    pub debug_info_id_lo: u64,
}

/// The execution state of the context that owned an event marker.
#[repr(u32)]
#[derive(Copy, Clone, PartialEq, Eq, Debug, Primitive)]
pub enum ContextStatus {
    NotStarted = 0,
    Executing = 1,
    Finished = 2,
    Invalid = 3,
}

/// The kind of context that owned an event marker.
#[repr(u32)]
#[derive(Copy, Clone, PartialEq, Eq, Debug, Primitive)]
pub enum ContextType {
    Invalid = 0,
    Immediate = 1,
    CommandList = 2,
    Bundle = 3,
    CommandQueue = 4,
}

/// The last event marker reached by a context.
#[derive(Clone, Debug, Default, Pread, SizeWith)]
pub struct GPUDUMP_MARKER_INFO {
    pub context_id: u64,
    /// A [`ContextStatus`] value.
    pub context_status: u32,
    /// A [`ContextType`] value.
    pub context_type: u32,
    /// The opaque application-supplied token for the marker.
    ///
    /// When `data_size` is 0 the marker carries no data of its own and must be resolved
    /// by the application from this token.
    pub payload: u64,
    pub data_size: u32,
    /// An offset to `data_size` bytes of marker data, or 0.
    pub data_rva: RVA,
}

/// Keys of the application-supplied crash description entries.
#[repr(u32)]
#[derive(Copy, Clone, PartialEq, Eq, Debug, Primitive)]
pub enum DescriptionKey {
    ApplicationName = 1,
    ApplicationVersion = 2,
    /// The first key available to applications for free-form entries.
    UserDefined = 0x10000,
}

/// One application-supplied crash description entry.
#[derive(Clone, Debug, Default, Pread, SizeWith)]
pub struct GPUDUMP_DESCRIPTION_ENTRY {
    /// A [`DescriptionKey`] value, or a value above [`DescriptionKey::UserDefined`].
    pub key: u32,
    /// An offset to a length-prefixed UTF-8 string.
    pub value_rva: RVA,
}
