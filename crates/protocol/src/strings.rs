//! String descriptor encoding
//!
//! A string descriptor is `bLength`, `bDescriptorType` (0x03), then
//! UTF-16LE code units. Descriptor index 0 instead carries the array of
//! LANGIDs the device supports.

use crate::error::{ProtocolError, Result};
use crate::util::DESC_TYPE_STRING;
use byteorder::{ByteOrder, LittleEndian};

/// Header size of every string descriptor
pub const STRING_DESC_HEADER: usize = 2;

/// Largest string descriptor a device may return
pub const MAX_STRING_DESC_LEN: usize = 255;

/// US English, the LANGID most devices report first
pub const LANGID_EN_US: u16 = 0x0409;

/// Validate the header and return the payload bytes `[2 .. bLength]`
fn payload(raw: &[u8]) -> Result<&[u8]> {
    if raw.len() < STRING_DESC_HEADER {
        return Err(ProtocolError::BufferTooSmall {
            needed: STRING_DESC_HEADER,
            available: raw.len(),
        });
    }
    if raw[1] != DESC_TYPE_STRING {
        return Err(ProtocolError::UnexpectedDescriptorType {
            expected: DESC_TYPE_STRING,
            actual: raw[1],
        });
    }
    let declared = raw[0] as usize;
    if declared < STRING_DESC_HEADER || declared > raw.len() {
        return Err(ProtocolError::MalformedDescriptor {
            declared,
            available: raw.len(),
        });
    }
    Ok(&raw[STRING_DESC_HEADER..declared])
}

/// Decode the LANGID array of string descriptor 0
pub fn decode_langids(raw: &[u8]) -> Result<Vec<u16>> {
    let body = payload(raw)?;
    // A trailing odd byte is ignored
    Ok(body.chunks_exact(2).map(LittleEndian::read_u16).collect())
}

/// Decode a UTF-16LE string descriptor
///
/// # Example
///
/// ```
/// use protocol::decode_string_descriptor;
///
/// let raw = [8, 0x03, b'U', 0, b'S', 0, b'B', 0];
/// assert_eq!(decode_string_descriptor(&raw).unwrap(), "USB");
/// ```
pub fn decode_string_descriptor(raw: &[u8]) -> Result<String> {
    let body = payload(raw)?;
    let units: Vec<u16> = body.chunks_exact(2).map(LittleEndian::read_u16).collect();
    String::from_utf16(&units).map_err(|_| ProtocolError::InvalidUtf16)
}

/// Encode text as a string descriptor, truncating to 255 bytes
pub fn encode_string_descriptor(text: &str) -> Vec<u8> {
    let units: Vec<u16> = text.encode_utf16().collect();
    let max_units = (MAX_STRING_DESC_LEN - STRING_DESC_HEADER) / 2;
    let units = &units[..units.len().min(max_units)];

    let mut out = vec![0u8; STRING_DESC_HEADER + units.len() * 2];
    out[0] = out.len() as u8;
    out[1] = DESC_TYPE_STRING;
    LittleEndian::write_u16_into(units, &mut out[STRING_DESC_HEADER..]);
    out
}

/// Encode a LANGID table as string descriptor 0
pub fn encode_langids(langids: &[u16]) -> Vec<u8> {
    let max = (MAX_STRING_DESC_LEN - STRING_DESC_HEADER) / 2;
    let langids = &langids[..langids.len().min(max)];

    let mut out = vec![0u8; STRING_DESC_HEADER + langids.len() * 2];
    out[0] = out.len() as u8;
    out[1] = DESC_TYPE_STRING;
    LittleEndian::write_u16_into(langids, &mut out[STRING_DESC_HEADER..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_decode_langids() {
        let raw = [6, 0x03, 0x09, 0x04, 0x07, 0x04];
        assert_eq!(decode_langids(&raw).unwrap(), vec![0x0409, 0x0407]);
    }

    #[test]
    fn test_decode_respects_length_byte() {
        // Trailing bytes past bLength belong to nothing
        let raw = [4, 0x03, b'O', 0, b'K', 0];
        assert_eq!(decode_string_descriptor(&raw).unwrap(), "O");
    }

    #[test]
    fn test_rejects_wrong_type() {
        let raw = [4, 0x02, b'O', 0];
        assert!(matches!(
            decode_string_descriptor(&raw),
            Err(ProtocolError::UnexpectedDescriptorType { .. })
        ));
    }

    #[test]
    fn test_rejects_truncated() {
        assert!(matches!(
            decode_string_descriptor(&[0x03]),
            Err(ProtocolError::BufferTooSmall { .. })
        ));
        assert!(matches!(
            decode_string_descriptor(&[10, 0x03, b'a', 0]),
            Err(ProtocolError::MalformedDescriptor { .. })
        ));
    }

    #[test]
    fn test_encode_truncates_long_text() {
        let long = "x".repeat(300);
        let raw = encode_string_descriptor(&long);
        assert!(raw.len() <= MAX_STRING_DESC_LEN);
        assert_eq!(raw[0] as usize, raw.len());
    }

    proptest! {
        #[test]
        fn prop_short_strings_survive(text in "[a-zA-Z0-9 äöü€]{0,60}") {
            let raw = encode_string_descriptor(&text);
            prop_assert_eq!(decode_string_descriptor(&raw).unwrap(), text);
        }
    }
}
