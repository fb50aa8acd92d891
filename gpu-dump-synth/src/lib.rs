// Copyright 2016 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! Synthetic GPU crash dumps for testing
//!
//! Basic usage is to create a [SynthGpuDump][], use its methods to build up the binary,
//! and then `finish()` to write the binary to a buffer. Then you can either write
//! that to disk as an actual dump file or feed it directly to the gpu-dump or
//! gpu-crash-processor crates.
//!
//! Strings and marker data are stored out-of-line. Entries that refer to them
//! take a reference and cite its location, and the caller is responsible for
//! adding the referenced section to the dump with [`SynthGpuDump::add`].

// Some test_assembler types do not have Debug, so be a bit more lenient here.
#![allow(missing_debug_implementations)]

use gpu_crash_common::format as md;
use scroll::ctx::SizeWith;
use scroll::LE;
use std::marker::PhantomData;
use test_assembler::*;

/// A writer of synthetic GPU dumps.
pub struct SynthGpuDump {
    /// The `Section` containing the dump contents.
    section: Section,
    /// The capture time, for the header.
    time_date_stamp: Label,
    /// The number of streams.
    stream_count: u32,
    /// The number of streams, as a label for the header.
    stream_count_label: Label,
    /// The directory's file offset, for the header.
    stream_directory_rva: Label,
    /// The contents of the stream directory.
    stream_directory: Section,
}

/// A block of data contained in a GPU dump.
pub trait DumpSection {
    /// A label representing this `DumpSection`'s offset in bytes from the start of the dump.
    fn file_offset(&self) -> Label;

    /// A label representing this `DumpSection`'s size in bytes within the dump.
    fn file_size(&self) -> Label;
}

/// A GPU dump stream.
pub trait Stream: DumpSection + Into<Section> {
    /// The stream type, used in the stream directory.
    fn stream_type(&self) -> u32;
    /// Append a `GPUDUMP_DIRECTORY` referring to this stream to `section`.
    fn cite_stream_in(&self, section: Section) -> Section {
        section
            .D32(self.stream_type())
            .D32(self.file_size())
            .D32(self.file_offset())
    }
}

impl SynthGpuDump {
    /// Create a `SynthGpuDump` with default endianness.
    pub fn new() -> SynthGpuDump {
        SynthGpuDump::with_endian(DEFAULT_ENDIAN)
    }

    /// Create a `SynthGpuDump` with `endian` endianness.
    pub fn with_endian(endian: Endian) -> SynthGpuDump {
        let time_date_stamp = Label::new();
        let stream_count_label = Label::new();
        let stream_directory_rva = Label::new();
        let section = Section::with_endian(endian)
            .D32(md::GPUDUMP_SIGNATURE)
            .D32(md::GPUDUMP_VERSION)
            .D32(&stream_count_label)
            .D32(&stream_directory_rva)
            .D32(&time_date_stamp);
        section.start().set_const(0);
        assert_eq!(
            section.size(),
            <md::GPUDUMP_HEADER>::size_with(&LE) as u64
        );

        SynthGpuDump {
            section,
            time_date_stamp,
            stream_count: 0,
            stream_count_label,
            stream_directory_rva,
            stream_directory: Section::with_endian(endian),
        }
    }

    /// Set the capture time in the header, in seconds since the epoch.
    pub fn time_date_stamp(self, time: u32) -> SynthGpuDump {
        self.time_date_stamp.set_const(time as u64);
        self
    }

    /// Append `section` to `self`, setting its location appropriately.
    #[allow(clippy::should_implement_trait)]
    pub fn add<T>(mut self, section: T) -> SynthGpuDump
    where
        T: DumpSection + Into<Section>,
    {
        let offset = section.file_offset();
        self.section = self.section.mark(&offset).append_section(section);
        self
    }

    /// Append `stream` to `self`, setting its location appropriately and adding it to the stream directory.
    pub fn add_stream<T: Stream>(mut self, stream: T) -> SynthGpuDump {
        self.stream_directory = stream.cite_stream_in(self.stream_directory);
        self.stream_count += 1;
        self.add(stream)
    }

    /// Finish generating the dump and return the contents.
    pub fn finish(self) -> Option<Vec<u8>> {
        let SynthGpuDump {
            section,
            time_date_stamp,
            stream_count,
            stream_count_label,
            stream_directory_rva,
            stream_directory,
        } = self;
        if time_date_stamp.value().is_none() {
            // arbitrary
            time_date_stamp.set_const(1262805309);
        }
        stream_count_label.set_const(stream_count as u64);
        section
            .mark(&stream_directory_rva)
            .append_section(stream_directory)
            .get_contents()
    }
}

impl Default for SynthGpuDump {
    fn default() -> Self {
        Self::new()
    }
}

impl DumpSection for Section {
    fn file_offset(&self) -> Label {
        self.start()
    }

    fn file_size(&self) -> Label {
        self.final_size()
    }
}

macro_rules! impl_dumpsection {
    ( $x:ty ) => {
        impl DumpSection for $x {
            fn file_offset(&self) -> Label {
                self.section.file_offset()
            }
            fn file_size(&self) -> Label {
                self.section.file_size()
            }
        }
    };
}

macro_rules! impl_into_section {
    ( $x:ty ) => {
        impl From<$x> for Section {
            fn from(item: $x) -> Self {
                item.section
            }
        }
    };
}

/// Cite an optional string by offset, or write a zero RVA.
fn cite_string(section: Section, string: Option<&DumpUtf8String>) -> Section {
    match string {
        Some(s) => section.D32(s.file_offset()),
        None => section.D32(0),
    }
}

/// A stream of arbitrary data.
pub struct SimpleStream {
    /// The stream type.
    pub stream_type: u32,
    /// The stream's contents.
    pub section: Section,
}

impl_into_section!(SimpleStream);
impl_dumpsection!(SimpleStream);

impl Stream for SimpleStream {
    fn stream_type(&self) -> u32 {
        self.stream_type
    }
}

/// A stream containing a `u32` count followed by fixed-size entries.
pub struct ListStream<T: DumpSection + Into<Section>> {
    /// The stream type.
    stream_type: u32,
    /// The stream's contents.
    section: Section,
    /// The number of entries.
    count: u32,
    /// The number of entries, as a `Label`.
    count_label: Label,
    _type: PhantomData<T>,
}

impl<T: DumpSection + Into<Section>> ListStream<T> {
    pub fn new<S: Into<u32>>(stream_type: S, endian: Endian) -> Self {
        let count_label = Label::new();
        ListStream {
            stream_type: stream_type.into(),
            section: Section::with_endian(endian).D32(&count_label),
            count: 0,
            count_label,
            _type: PhantomData,
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn add(mut self, entry: T) -> Self {
        self.count += 1;
        let offset = entry.file_offset();
        self.section = self.section.mark(&offset).append_section(entry);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl<T: DumpSection + Into<Section>> From<ListStream<T>> for Section {
    fn from(stream: ListStream<T>) -> Self {
        stream.count_label.set_const(stream.count as u64);
        stream.section
    }
}

impl<T: DumpSection + Into<Section>> DumpSection for ListStream<T> {
    fn file_offset(&self) -> Label {
        self.section.file_offset()
    }

    fn file_size(&self) -> Label {
        self.section.file_size()
    }
}

impl<T: DumpSection + Into<Section>> Stream for ListStream<T> {
    fn stream_type(&self) -> u32 {
        self.stream_type
    }
}

/// A UTF-8 string preceded by a 4-byte length.
pub struct DumpUtf8String {
    section: Section,
}

impl DumpUtf8String {
    pub fn new(s: &str, endian: Endian) -> Self {
        let section = Section::with_endian(endian)
            .D32(s.len() as u32)
            .append_bytes(s.as_bytes());
        Self { section }
    }
}

impl_into_section!(DumpUtf8String);
impl_dumpsection!(DumpUtf8String);

/// A `GPUDUMP_BASE_INFO` stream.
pub struct BaseInfo {
    section: Section,
}

impl BaseInfo {
    pub fn new(graphics_api: md::GraphicsApi, pid: u32, endian: Endian) -> BaseInfo {
        let section = Section::with_endian(endian)
            .D32(graphics_api as u32)
            .D32(pid);
        BaseInfo { section }
    }
}

impl_into_section!(BaseInfo);
impl_dumpsection!(BaseInfo);

impl Stream for BaseInfo {
    fn stream_type(&self) -> u32 {
        md::GPUDUMP_STREAM_TYPE::BaseInfoStream as u32
    }
}

/// A `GPUDUMP_DEVICE_INFO` stream.
pub struct DeviceInfo {
    section: Section,
}

impl DeviceInfo {
    pub fn new(status: u32, adapter_reset: bool, engine_reset: bool, endian: Endian) -> DeviceInfo {
        let section = Section::with_endian(endian)
            .D32(status)
            .D32(adapter_reset as u32)
            .D32(engine_reset as u32);
        DeviceInfo { section }
    }
}

impl_into_section!(DeviceInfo);
impl_dumpsection!(DeviceInfo);

impl Stream for DeviceInfo {
    fn stream_type(&self) -> u32 {
        md::GPUDUMP_STREAM_TYPE::DeviceInfoStream as u32
    }
}

/// A `GPUDUMP_SYSTEM_INFO` stream.
pub struct SystemInfo {
    section: Section,
}

impl SystemInfo {
    pub fn new(
        os_version: Option<&DumpUtf8String>,
        driver_major: u32,
        driver_minor: u32,
        endian: Endian,
    ) -> SystemInfo {
        let section = cite_string(Section::with_endian(endian), os_version)
            .D32(driver_major)
            .D32(driver_minor);
        SystemInfo { section }
    }
}

impl_into_section!(SystemInfo);
impl_dumpsection!(SystemInfo);

impl Stream for SystemInfo {
    fn stream_type(&self) -> u32 {
        md::GPUDUMP_STREAM_TYPE::SystemInfoStream as u32
    }
}

/// A `GPUDUMP_GPU_INFO` list entry.
pub struct GpuInfo {
    section: Section,
}

impl GpuInfo {
    pub fn new(
        adapter_name: Option<&DumpUtf8String>,
        generation_name: Option<&DumpUtf8String>,
        adapter_luid: u64,
        endian: Endian,
    ) -> GpuInfo {
        let section = Section::with_endian(endian);
        let section = cite_string(section, adapter_name);
        let section = cite_string(section, generation_name).D64(adapter_luid);
        GpuInfo { section }
    }
}

impl_into_section!(GpuInfo);
impl_dumpsection!(GpuInfo);

/// A `GPUDUMP_RESOURCE_INFO` entry of a [`PageFault`].
pub struct Resource {
    section: Section,
}

impl Resource {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gpu_va: u64,
        size: u64,
        (width, height, depth): (u32, u32, u32),
        mip_levels: u32,
        format: u32,
        flags: md::ResourceFlags,
        debug_name: Option<&DumpUtf8String>,
        endian: Endian,
    ) -> Resource {
        let section = Section::with_endian(endian)
            .D64(gpu_va)
            .D64(size)
            .D32(width)
            .D32(height)
            .D32(depth)
            .D32(mip_levels)
            .D32(format)
            .D32(flags.bits());
        let section = cite_string(section, debug_name);
        Resource { section }
    }
}

impl_into_section!(Resource);
impl_dumpsection!(Resource);

/// A `GPUDUMP_PAGE_FAULT_INFO` stream and its resources.
pub struct PageFault {
    section: Section,
    resource_count: u32,
    resource_count_label: Label,
}

impl PageFault {
    pub fn new(
        faulting_gpu_va: u64,
        fault_type: md::PageFaultType,
        access_type: md::MemoryAccessType,
        engine: u32,
        client: u32,
        endian: Endian,
    ) -> PageFault {
        let resource_count_label = Label::new();
        let section = Section::with_endian(endian)
            .D64(faulting_gpu_va)
            .D32(fault_type as u32)
            .D32(access_type as u32)
            .D32(engine)
            .D32(client)
            .D32(&resource_count_label);
        PageFault {
            section,
            resource_count: 0,
            resource_count_label,
        }
    }

    pub fn add_resource(mut self, resource: Resource) -> PageFault {
        self.resource_count += 1;
        self.section = self.section.append_section(resource);
        self
    }
}

impl From<PageFault> for Section {
    fn from(fault: PageFault) -> Self {
        fault
            .resource_count_label
            .set_const(fault.resource_count as u64);
        fault.section
    }
}

impl_dumpsection!(PageFault);

impl Stream for PageFault {
    fn stream_type(&self) -> u32 {
        md::GPUDUMP_STREAM_TYPE::PageFaultInfoStream as u32
    }
}

/// A `GPUDUMP_SHADER_INFO` list entry.
pub struct Shader {
    section: Section,
}

impl Shader {
    pub fn new(
        shader_hash: u64,
        shader_instance: u64,
        shader_type: md::ShaderType,
        is_internal: bool,
        debug_info_id: u128,
        endian: Endian,
    ) -> Shader {
        let section = Section::with_endian(endian)
            .D64(shader_hash)
            .D64(shader_instance)
            .D32(shader_type as u32)
            .D32(is_internal as u32)
            .D64((debug_info_id >> 64) as u64)
            .D64(debug_info_id as u64);
        Shader { section }
    }
}

impl_into_section!(Shader);
impl_dumpsection!(Shader);

/// A `GPUDUMP_MARKER_INFO` list entry.
pub struct EventMarker {
    section: Section,
}

impl EventMarker {
    /// `data` must also be added to the dump if present.
    pub fn new(
        context_id: u64,
        context_status: md::ContextStatus,
        context_type: md::ContextType,
        payload: u64,
        data: Option<&Section>,
        endian: Endian,
    ) -> EventMarker {
        let section = Section::with_endian(endian)
            .D64(context_id)
            .D32(context_status as u32)
            .D32(context_type as u32)
            .D64(payload);
        let section = match data {
            Some(data) => section.D32(data.file_size()).D32(data.file_offset()),
            None => section.D32(0).D32(0),
        };
        EventMarker { section }
    }
}

impl_into_section!(EventMarker);
impl_dumpsection!(EventMarker);

/// A `GPUDUMP_DESCRIPTION_ENTRY` list entry.
pub struct DescriptionEntry {
    section: Section,
}

impl DescriptionEntry {
    pub fn new(key: u32, value: &DumpUtf8String, endian: Endian) -> DescriptionEntry {
        let section = Section::with_endian(endian)
            .D32(key)
            .D32(value.file_offset());
        DescriptionEntry { section }
    }
}

impl_into_section!(DescriptionEntry);
impl_dumpsection!(DescriptionEntry);

#[test]
fn test_dump_header() {
    let dump = SynthGpuDump::with_endian(Endian::Little).time_date_stamp(0x5152_5354);
    assert_eq!(
        dump.finish().unwrap(),
        vec![
            0x47, 0x50, 0x55, 0x44, // signature
            0x01, 0x00, 0x00, 0x00, // version
            0x00, 0x00, 0x00, 0x00, // stream count
            0x14, 0x00, 0x00, 0x00, // directory RVA
            0x54, 0x53, 0x52, 0x51, // time_date_stamp
        ]
    );
}

#[test]
fn test_list_stream() {
    let dump = SynthGpuDump::with_endian(Endian::Little).time_date_stamp(0);
    let list = ListStream::new(md::GPUDUMP_STREAM_TYPE::ActiveShaderListStream as u32, Endian::Little)
        .add(Shader::new(0xabcd, 1, md::ShaderType::Fragment, false, 0, Endian::Little));
    assert!(!list.is_empty());
    let contents = dump.add_stream(list).finish().unwrap();
    // header + count + one 40-byte entry + one directory entry
    assert_eq!(contents.len(), 20 + 4 + 40 + 12);
    assert_eq!(&contents[8..12], &[1, 0, 0, 0]);
}
