// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

use std::ops::Deref;
use std::time::SystemTime;

use crate::dump::*;

/// Section-by-section access to a decoded GPU crash dump.
///
/// Every section is independently fallible: a dump written by an older driver
/// may lack any of them, and a report should still be produced from whatever
/// is present. The default implementations report every section as missing, so
/// an implementation only needs to provide the sections it actually has.
pub trait DumpDecoder {
    /// When the dump was captured, if known.
    fn time(&self) -> Option<SystemTime> {
        None
    }

    fn base_info(&self) -> Result<GpuDumpBaseInfo, Error> {
        Err(Error::StreamNotFound)
    }

    fn device_info(&self) -> Result<GpuDumpDeviceInfo, Error> {
        Err(Error::StreamNotFound)
    }

    fn system_info(&self) -> Result<GpuDumpSystemInfo, Error> {
        Err(Error::StreamNotFound)
    }

    fn gpu_info(&self) -> Result<GpuDumpGpuInfoList, Error> {
        Err(Error::StreamNotFound)
    }

    fn page_fault_info(&self) -> Result<GpuDumpPageFaultInfo, Error> {
        Err(Error::StreamNotFound)
    }

    fn active_shaders(&self) -> Result<GpuDumpActiveShaderList, Error> {
        Err(Error::StreamNotFound)
    }

    fn event_markers(&self) -> Result<GpuDumpEventMarkerList, Error> {
        Err(Error::StreamNotFound)
    }

    fn description(&self) -> Result<GpuDumpDescription, Error> {
        Err(Error::StreamNotFound)
    }
}

impl<'a, T> DumpDecoder for GpuDump<'a, T>
where
    T: Deref<Target = [u8]> + 'a,
{
    fn time(&self) -> Option<SystemTime> {
        (self.header.time_date_stamp != 0).then(|| GpuDump::time(self))
    }

    fn base_info(&self) -> Result<GpuDumpBaseInfo, Error> {
        self.get_stream()
    }

    fn device_info(&self) -> Result<GpuDumpDeviceInfo, Error> {
        self.get_stream()
    }

    fn system_info(&self) -> Result<GpuDumpSystemInfo, Error> {
        self.get_stream()
    }

    fn gpu_info(&self) -> Result<GpuDumpGpuInfoList, Error> {
        self.get_stream()
    }

    fn page_fault_info(&self) -> Result<GpuDumpPageFaultInfo, Error> {
        self.get_stream()
    }

    fn active_shaders(&self) -> Result<GpuDumpActiveShaderList, Error> {
        self.get_stream()
    }

    fn event_markers(&self) -> Result<GpuDumpEventMarkerList, Error> {
        self.get_stream()
    }

    fn description(&self) -> Result<GpuDumpDescription, Error> {
        self.get_stream()
    }
}
