//! Just enough of the DXBC container format to find a shader's debug name.
//!
//! A DXBC container is a 32-byte header (magic, checksum, reserved word, total
//! size, chunk count) followed by a table of chunk offsets. Each chunk starts
//! with a fourcc and a payload size. The `ILDN` chunk holds the name of the
//! symbol file the compiler emitted for the shader.

use scroll::{Pread, LE};
use tracing::trace;

use crate::SymbolError;

const DXBC_MAGIC: &[u8; 4] = b"DXBC";
const DXBC_HEADER_LEN: usize = 4 + 16 + 4 + 4 + 4;
const ILDN: &[u8; 4] = b"ILDN";
const MAX_CHUNK_COUNT: u32 = 4096;

/// Returns true if `bytes` starts like a DXBC container.
pub fn is_dxbc(bytes: &[u8]) -> bool {
    bytes.get(..4) == Some(&DXBC_MAGIC[..])
}

/// Extract the debug name from the `ILDN` chunk of a DXBC container.
///
/// Returns `Ok(None)` if `bytes` is not a DXBC container or has no `ILDN` chunk.
/// All offsets are validated, so malformed containers produce an error rather
/// than a panic.
pub fn debug_name(bytes: &[u8]) -> Result<Option<String>, SymbolError> {
    if !is_dxbc(bytes) {
        return Ok(None);
    }
    let malformed = |reason: &str| SymbolError::MalformedContainer(reason.to_owned());

    let total_size: u32 = bytes
        .pread_with(24, LE)
        .map_err(|_| malformed("truncated header"))?;
    let chunk_count: u32 = bytes
        .pread_with(28, LE)
        .map_err(|_| malformed("truncated header"))?;
    if chunk_count > MAX_CHUNK_COUNT {
        return Err(malformed("too many chunks"));
    }
    let bytes = bytes
        .get(..total_size as usize)
        .filter(|b| b.len() >= DXBC_HEADER_LEN)
        .ok_or_else(|| malformed("total size out of bounds"))?;

    for i in 0..chunk_count as usize {
        let chunk_offset: u32 = bytes
            .pread_with(DXBC_HEADER_LEN + i * 4, LE)
            .map_err(|_| malformed("chunk offset table out of bounds"))?;
        let mut offset = chunk_offset as usize;
        let fourcc = bytes
            .get(offset..offset + 4)
            .ok_or_else(|| malformed("chunk header out of bounds"))?;
        offset += 4;
        let size: u32 = bytes
            .gread_with(&mut offset, LE)
            .map_err(|_| malformed("chunk header out of bounds"))?;
        let data = offset
            .checked_add(size as usize)
            .and_then(|end| bytes.get(offset..end))
            .ok_or_else(|| malformed("chunk data out of bounds"))?;
        trace!(
            "dxbc chunk {} at {:#x}, {} bytes",
            String::from_utf8_lossy(fourcc),
            chunk_offset,
            size
        );
        if fourcc == ILDN {
            return parse_ildn(data).map(Some);
        }
    }
    Ok(None)
}

/// The `ILDN` payload is a u16 flags word, a u16 name length, and the name
/// (NUL-terminated and padded to 4 bytes).
fn parse_ildn(data: &[u8]) -> Result<String, SymbolError> {
    let length: u16 = data
        .pread_with(2, LE)
        .map_err(|_| SymbolError::MalformedContainer("truncated ILDN chunk".to_owned()))?;
    let name = data
        .get(4..4 + length as usize)
        .ok_or_else(|| SymbolError::MalformedContainer("ILDN name out of bounds".to_owned()))?;
    let name = std::str::from_utf8(name)
        .map_err(|_| SymbolError::MalformedContainer("ILDN name is not UTF-8".to_owned()))?;
    Ok(name.trim_end_matches('\0').to_owned())
}

/// Build a DXBC container from `(fourcc, payload)` chunks.
#[cfg(test)]
pub(crate) fn build_container(chunks: &[(&[u8; 4], Vec<u8>)]) -> Vec<u8> {
    let table_len = DXBC_HEADER_LEN + chunks.len() * 4;
    let mut body = Vec::new();
    let mut offsets = Vec::new();
    for (fourcc, payload) in chunks {
        offsets.push((table_len + body.len()) as u32);
        body.extend_from_slice(&fourcc[..]);
        body.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        body.extend_from_slice(payload);
    }
    let total = (table_len + body.len()) as u32;
    let mut out = Vec::new();
    out.extend_from_slice(DXBC_MAGIC);
    out.extend_from_slice(&[0u8; 16]);
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&total.to_le_bytes());
    out.extend_from_slice(&(chunks.len() as u32).to_le_bytes());
    for offset in offsets {
        out.extend_from_slice(&offset.to_le_bytes());
    }
    out.extend_from_slice(&body);
    out
}

#[cfg(test)]
pub(crate) fn ildn_payload(name: &str) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&0u16.to_le_bytes());
    payload.extend_from_slice(&(name.len() as u16).to_le_bytes());
    payload.extend_from_slice(name.as_bytes());
    payload.push(0);
    while payload.len() % 4 != 0 {
        payload.push(0);
    }
    payload
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_debug_name() {
        let container = build_container(&[
            (b"RDEF", vec![0; 12]),
            (b"ILDN", ildn_payload("3f2a9c1e.pdb")),
            (b"DXIL", vec![1, 2, 3, 4]),
        ]);
        assert_eq!(
            debug_name(&container).unwrap().as_deref(),
            Some("3f2a9c1e.pdb")
        );
    }

    #[test]
    fn test_no_ildn() {
        let container = build_container(&[(b"SHEX", vec![0; 8])]);
        assert_eq!(debug_name(&container).unwrap(), None);
        assert_eq!(debug_name(b"not a shader").unwrap(), None);
    }

    #[test]
    fn test_malformed() {
        let mut container = build_container(&[(b"ILDN", ildn_payload("a.pdb"))]);
        // Point the only chunk past the end of the container.
        container[32..36].copy_from_slice(&0xffffu32.to_le_bytes());
        assert!(debug_name(&container).is_err());

        let mut truncated = build_container(&[(b"ILDN", ildn_payload("a.pdb"))]);
        truncated.truncate(30);
        assert!(debug_name(&truncated).is_err());
    }
}
