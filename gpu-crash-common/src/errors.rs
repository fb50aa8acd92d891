//! Status codes reported by graphics runtimes and drivers.
#![allow(non_camel_case_types)]
#![allow(clippy::upper_case_acronyms)]

use enum_primitive_derive::Primitive;
use num_traits::FromPrimitive;
use std::fmt;

/// Well-known failure codes returned by presentation and device APIs.
#[repr(u32)]
#[derive(Copy, Clone, PartialEq, Eq, Debug, Primitive)]
pub enum KnownStatus {
    S_OK = 0,
    E_NOTIMPL = 0x8000_4001u32,
    E_NOINTERFACE = 0x8000_4002u32,
    E_FAIL = 0x8000_4005u32,
    E_OUTOFMEMORY = 0x8007_000eu32,
    E_INVALIDARG = 0x8007_0057u32,
    DXGI_ERROR_INVALID_CALL = 0x887a_0001u32,
    DXGI_ERROR_NOT_FOUND = 0x887a_0002u32,
    DXGI_ERROR_DEVICE_REMOVED = 0x887a_0005u32,
    DXGI_ERROR_DEVICE_HUNG = 0x887a_0006u32,
    DXGI_ERROR_DEVICE_RESET = 0x887a_0007u32,
    DXGI_ERROR_WAS_STILL_DRAWING = 0x887a_000au32,
    DXGI_ERROR_DRIVER_INTERNAL_ERROR = 0x887a_0020u32,
    DXGI_ERROR_NOT_CURRENTLY_AVAILABLE = 0x887a_0022u32,
    DXGI_ERROR_ACCESS_LOST = 0x887a_0026u32,
    D3D12_ERROR_ADAPTER_NOT_FOUND = 0x887e_0001u32,
    D3D12_ERROR_DRIVER_VERSION_MISMATCH = 0x887e_0002u32,
}

impl KnownStatus {
    /// The system message for this status.
    pub fn message(self) -> &'static str {
        match self {
            KnownStatus::S_OK => "The operation completed successfully.",
            KnownStatus::E_NOTIMPL => "Not implemented.",
            KnownStatus::E_NOINTERFACE => "No such interface supported.",
            KnownStatus::E_FAIL => "Unspecified error.",
            KnownStatus::E_OUTOFMEMORY => "Not enough memory resources are available to complete this operation.",
            KnownStatus::E_INVALIDARG => "The parameter is incorrect.",
            KnownStatus::DXGI_ERROR_INVALID_CALL => "The application made a call that is invalid. Either the parameters of the call or the state of some object was incorrect.",
            KnownStatus::DXGI_ERROR_NOT_FOUND => "The object was not found.",
            KnownStatus::DXGI_ERROR_DEVICE_REMOVED => "The GPU device instance has been suspended. Use GetDeviceRemovedReason to determine the appropriate action.",
            KnownStatus::DXGI_ERROR_DEVICE_HUNG => "The GPU will not respond to more commands, most likely because of an invalid command passed by the calling application.",
            KnownStatus::DXGI_ERROR_DEVICE_RESET => "The GPU will not respond to more commands, most likely because some other application submitted invalid commands.",
            KnownStatus::DXGI_ERROR_WAS_STILL_DRAWING => "The GPU was busy at the moment when the call was made, and the call was neither executed nor scheduled.",
            KnownStatus::DXGI_ERROR_DRIVER_INTERNAL_ERROR => "An internal issue prevented the driver from carrying out the specified operation.",
            KnownStatus::DXGI_ERROR_NOT_CURRENTLY_AVAILABLE => "The requested functionality is not supported by the device or the driver.",
            KnownStatus::DXGI_ERROR_ACCESS_LOST => "The desktop duplication interface is invalid.",
            KnownStatus::D3D12_ERROR_ADAPTER_NOT_FOUND => "The specified cached PSO was created on a different adapter and cannot be reused on the current adapter.",
            KnownStatus::D3D12_ERROR_DRIVER_VERSION_MISMATCH => "The specified cached PSO was created on a different driver version and cannot be reused on the current adapter.",
        }
    }
}

/// A raw status code, as returned by a device or presentation call.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct StatusCode(pub u32);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(KnownStatus::S_OK as u32);
    pub const NO_INTERFACE: StatusCode = StatusCode(KnownStatus::E_NOINTERFACE as u32);
    pub const DEVICE_REMOVED: StatusCode = StatusCode(KnownStatus::DXGI_ERROR_DEVICE_REMOVED as u32);
    pub const DEVICE_HUNG: StatusCode = StatusCode(KnownStatus::DXGI_ERROR_DEVICE_HUNG as u32);

    /// Failure codes have the severity bit set.
    pub fn is_failure(self) -> bool {
        self.0 & 0x8000_0000 != 0
    }

    pub fn known(self) -> Option<KnownStatus> {
        KnownStatus::from_u32(self.0)
    }

    /// The symbolic name of this status, if it is a known one.
    pub fn name(self) -> Option<String> {
        self.known().map(|known| format!("{known:?}"))
    }

    /// The human-readable system message for this status.
    pub fn message(self) -> &'static str {
        self.known()
            .map_or("Unknown status code.", KnownStatus::message)
    }
}

impl From<u32> for StatusCode {
    fn from(v: u32) -> Self {
        StatusCode(v)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.known() {
            Some(known) => write!(f, "{:#010x} ({known:?})", self.0),
            None => write!(f, "{:#010x}", self.0),
        }
    }
}
