//! Binary-slice readers and string codecs shared by the cell decoders,
//! the hive reader, the serializer, and the `.reg` pipeline.

use crate::error::{HiveError, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use encoding_rs::UTF_16LE;
use std::io::Cursor;

/// Offset where hive bins start, i.e. the size of the base block.
pub const HBIN_START_OFFSET: u32 = 0x1000;

/// Windows FILETIME ticks (100ns units) between 1601-01-01 and the Unix
/// epoch.
const FILETIME_UNIX_DIFF_SECS: i64 = 11_644_473_600;

/// Reads a u32 from `data` at `offset`, little-endian.
pub fn read_u32_le(data: &[u8], offset: usize) -> Result<u32> {
    if offset + 4 > data.len() {
        return Err(HiveError::TruncatedData {
            offset: offset as u32,
            expected: 4,
            actual: data.len().saturating_sub(offset),
        });
    }
    let mut cursor = Cursor::new(&data[offset..offset + 4]);
    Ok(cursor.read_u32::<LittleEndian>()?)
}

/// Reads a u16 from `data` at `offset`, little-endian.
pub fn read_u16_le(data: &[u8], offset: usize) -> Result<u16> {
    if offset + 2 > data.len() {
        return Err(HiveError::TruncatedData {
            offset: offset as u32,
            expected: 2,
            actual: data.len().saturating_sub(offset),
        });
    }
    let mut cursor = Cursor::new(&data[offset..offset + 2]);
    Ok(cursor.read_u16::<LittleEndian>()?)
}

/// Reads an i32 from `data` at `offset`, little-endian.
pub fn read_i32_le(data: &[u8], offset: usize) -> Result<i32> {
    if offset + 4 > data.len() {
        return Err(HiveError::TruncatedData {
            offset: offset as u32,
            expected: 4,
            actual: data.len().saturating_sub(offset),
        });
    }
    let mut cursor = Cursor::new(&data[offset..offset + 4]);
    Ok(cursor.read_i32::<LittleEndian>()?)
}

/// Reads a 64-bit Windows FILETIME stored as two little-endian u32 halves.
pub fn read_filetime_le(data: &[u8], low_offset: usize) -> Result<u64> {
    let low = read_u32_le(data, low_offset)?;
    let high = read_u32_le(data, low_offset + 4)?;
    Ok(u64::from(low) | (u64::from(high) << 32))
}

/// Splits a FILETIME into the little-endian bytes written to a cell.
pub fn filetime_to_le_bytes(filetime: u64) -> [u8; 8] {
    filetime.to_le_bytes()
}

/// Converts a Windows FILETIME (100ns ticks since 1601-01-01) to a Unix
/// `(seconds, nanoseconds)` pair, saturating rather than panicking on
/// out-of-range input.
pub fn filetime_to_unix(filetime: u64) -> (i64, u32) {
    let seconds = (filetime / 10_000_000) as i64 - FILETIME_UNIX_DIFF_SECS;
    let nanos = ((filetime % 10_000_000) * 100) as u32;
    (seconds, nanos)
}

/// Converts a Unix `(seconds, nanoseconds)` pair back to a Windows
/// FILETIME. Inverse of [`filetime_to_unix`].
pub fn unix_to_filetime(seconds: i64, nanos: u32) -> u64 {
    let total_seconds = seconds + FILETIME_UNIX_DIFF_SECS;
    (total_seconds as u64) * 10_000_000 + (nanos / 100) as u64
}

/// Decodes a legacy one-byte-per-character name. The reference C hive
/// library treats this as plain ASCII; real-world hives carry non-ASCII
/// bytes in "compressed" names, so this crate follows spec guidance and
/// maps through Windows-1252 instead of truncating or replacing those
/// bytes with U+FFFD.
pub fn decode_windows1252(data: &[u8]) -> String {
    let (decoded, _had_errors) = encoding_rs::WINDOWS_1252.decode_without_bom_handling(data);
    decoded.into_owned()
}

/// Encodes a string as Windows-1252, used only where a test or the `.reg`
/// pipeline needs to round-trip a compressed name; every character
/// outside the code page is replaced with `?` rather than silently
/// dropped.
pub fn encode_windows1252(s: &str) -> Vec<u8> {
    let (encoded, _encoding, _had_errors) = encoding_rs::WINDOWS_1252.encode(s);
    encoded.into_owned()
}

/// Decodes a UTF-16LE byte slice, trimming a single trailing NUL pair if
/// present (registry strings are usually, but not always, NUL-terminated
/// on disk; the declared length already excludes padding in most cells,
/// so this only trims when the data genuinely ends in `00 00`).
pub fn decode_utf16le(data: &[u8], offset: u32) -> Result<String> {
    if data.is_empty() {
        return Ok(String::new());
    }
    if data.len() % 2 != 0 {
        return Err(HiveError::InvalidUtf16 { offset });
    }
    let (decoded, _encoding, had_errors) = UTF_16LE.decode(data);
    if had_errors {
        return Err(HiveError::InvalidUtf16 { offset });
    }
    Ok(trim_trailing_nul(&decoded).to_string())
}

fn trim_trailing_nul(s: &str) -> &str {
    s.strip_suffix('\0').unwrap_or(s)
}

/// Encodes `s` as UTF-16LE into a single pre-sized buffer (no
/// per-character `encode_utf16` calls on the hot path), optionally
/// appending a NUL terminator pair.
pub fn encode_utf16le(s: &str, null_terminate: bool) -> Vec<u8> {
    let unit_count = s.encode_utf16().count();
    let mut out = Vec::with_capacity(unit_count * 2 + if null_terminate { 2 } else { 0 });
    for unit in s.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    if null_terminate {
        out.extend_from_slice(&[0, 0]);
    }
    out
}

/// Reads a legacy one-byte string, trimming any trailing NUL.
pub fn read_ascii_string(data: &[u8]) -> String {
    let trimmed = match data.iter().position(|&b| b == 0) {
        Some(pos) if data[pos..].iter().all(|&b| b == 0) => &data[..pos],
        _ => data,
    };
    decode_windows1252(trimmed)
}

/// Reads a fixed-length, space-padded or NUL-padded ASCII field (used for
/// the base block's embedded file name).
pub fn read_fixed_ascii(data: &[u8], len: usize) -> String {
    data.iter()
        .take(len)
        .map(|&b| if b == 0 { ' ' } else { b as char })
        .collect::<String>()
        .trim()
        .to_string()
}

/// XORs the first 127 little-endian DWORDs of the base block (bytes
/// `0x000..0x1FC`), matching the on-disk checksum algorithm.
pub fn calculate_checksum(data: &[u8]) -> u32 {
    let mut checksum: u32 = 0;
    for i in (0..0x1FC).step_by(4) {
        if i + 4 <= data.len() {
            if let Ok(dword) = read_u32_le(data, i) {
                checksum ^= dword;
            }
        }
    }
    checksum
}

/// Converts a cell offset (relative to the first hbin) to an absolute
/// offset into the full hive buffer.
#[inline]
pub fn cell_offset_to_absolute(cell_offset: u32) -> Result<u32> {
    cell_offset
        .checked_add(HBIN_START_OFFSET)
        .ok_or_else(|| HiveError::InvalidOffset {
            offset: cell_offset,
            buffer_size: 0,
        })
}

/// Converts an absolute hive offset back to a cell offset.
#[inline]
pub fn absolute_to_cell_offset(absolute_offset: u32) -> Result<u32> {
    if absolute_offset < HBIN_START_OFFSET {
        return Err(HiveError::corrupt(format!(
            "absolute offset {absolute_offset:#x} is before the first hbin"
        )));
    }
    Ok(absolute_offset - HBIN_START_OFFSET)
}

/// ASCII case-insensitive equality, used for every name comparison in the
/// crate (key/value lookup, `.reg` path matching, child sort order).
pub fn ascii_eq_ignore_case(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_u32_roundtrip() {
        let data = [0x01, 0x02, 0x03, 0x04];
        assert_eq!(read_u32_le(&data, 0).unwrap(), 0x0403_0201);
    }

    #[test]
    fn windows1252_roundtrip_for_latin1_range() {
        let bytes = b"\xe4\xf6\xfc\xdf"; // "äöüß" in Windows-1252/Latin-1
        let decoded = decode_windows1252(bytes);
        assert_eq!(decoded, "äöüß");
        assert_eq!(encode_windows1252(&decoded), bytes);
    }

    #[test]
    fn utf16_roundtrip_with_trailing_nul() {
        let encoded = encode_utf16le("hello", true);
        let decoded = decode_utf16le(&encoded, 0).unwrap();
        assert_eq!(decoded, "hello");
    }

    #[test]
    fn utf16_odd_length_is_rejected() {
        let bad = vec![0x41, 0x00, 0x42];
        assert!(decode_utf16le(&bad, 0).is_err());
    }

    #[test]
    fn filetime_roundtrip() {
        let (secs, nanos) = (1_700_000_000i64, 123_400_000u32);
        let ft = unix_to_filetime(secs, nanos);
        let (secs2, nanos2) = filetime_to_unix(ft);
        assert_eq!(secs2, secs);
        // sub-100ns precision is lost, matching FILETIME's own granularity
        assert_eq!(nanos2 / 100, nanos / 100);
    }

    #[test]
    fn offset_conversion_roundtrips() {
        assert_eq!(cell_offset_to_absolute(0x20).unwrap(), 0x1020);
        assert_eq!(absolute_to_cell_offset(0x1020).unwrap(), 0x20);
        assert!(absolute_to_cell_offset(0x10).is_err());
    }

    #[test]
    fn ascii_string_trims_trailing_nul_only() {
        assert_eq!(read_ascii_string(b"Hello\0\0"), "Hello");
        assert_eq!(read_ascii_string(b"Hel\0lo"), "Hel\0lo");
    }
}
