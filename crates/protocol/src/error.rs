//! Protocol error types

use thiserror::Error;

/// Errors raised while interpreting raw descriptor bytes and field values
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// A field held a value outside its defined range
    #[error("Invalid {field} value: {value:#04x}")]
    InvalidValue { field: &'static str, value: u8 },

    /// Buffer too small for operation
    #[error("Buffer too small: needed {needed}, got {available}")]
    BufferTooSmall { needed: usize, available: usize },

    /// `bDescriptorType` did not match what the caller asked for
    #[error("Unexpected descriptor type {actual:#04x} (expected {expected:#04x})")]
    UnexpectedDescriptorType { expected: u8, actual: u8 },

    /// `bLength` disagrees with the bytes actually present
    #[error("Malformed descriptor: bLength {declared}, {available} bytes available")]
    MalformedDescriptor { declared: usize, available: usize },

    /// String descriptor payload was not valid UTF-16
    #[error("String descriptor is not valid UTF-16")]
    InvalidUtf16,
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::InvalidValue {
            field: "recipient",
            value: 7,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("recipient"));
        assert!(msg.contains("0x07"));
    }

    #[test]
    fn test_malformed_descriptor_error() {
        let err = ProtocolError::MalformedDescriptor {
            declared: 10,
            available: 4,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("bLength 10"));
    }
}
