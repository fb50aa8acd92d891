//! Identifiers correlating crash-time data with on-disk shader files.
use std::fmt;

/// The content hash of a compiled shader binary.
///
/// Dumps reference active shaders by this hash, and the shader database keys
/// binaries by it.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct ShaderHash(pub u64);

impl fmt::Display for ShaderHash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// The identifier of a shader debug info blob handed to the application by the
/// crash dump subsystem.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct DebugInfoId(pub u128);

impl DebugInfoId {
    pub fn from_parts(hi: u64, lo: u64) -> DebugInfoId {
        DebugInfoId(((hi as u128) << 64) | lo as u128)
    }

    pub fn hi(self) -> u64 {
        (self.0 >> 64) as u64
    }

    pub fn lo(self) -> u64 {
        self.0 as u64
    }

    /// The all-zero identifier means "no debug info".
    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for DebugInfoId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:016x}-{:016x}", self.hi(), self.lo())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_debug_info_id_parts() {
        let id = DebugInfoId::from_parts(0x0123_4567_89ab_cdef, 0xfedc_ba98_7654_3210);
        assert_eq!(id.hi(), 0x0123_4567_89ab_cdef);
        assert_eq!(id.lo(), 0xfedc_ba98_7654_3210);
        assert_eq!(id.to_string(), "0123456789abcdef-fedcba9876543210");
        assert!(!id.is_none());
        assert!(DebugInfoId::default().is_none());
        assert_eq!(ShaderHash(0xabc).to_string(), "0000000000000abc");
    }
}
