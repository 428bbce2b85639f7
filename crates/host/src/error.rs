//! Host error types
//!
//! Every failure the core reports is a [`UsbError`]. Backend failures are
//! normalized into [`UsbError::Transport`] carrying the backend's own
//! numeric code; the remaining variants are raised by the core itself.

use std::fmt;
use thiserror::Error;

/// Normalized kind of a backend-reported I/O failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    Io,
    InvalidParam,
    Access,
    NoDevice,
    NotFound,
    Busy,
    Timeout,
    Overflow,
    /// Endpoint stalled
    Pipe,
    Interrupted,
    NoMemory,
    NotSupported,
    /// Device answered a control request with fewer bytes than required
    ShortReply,
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TransportErrorKind::Io => "input/output error",
            TransportErrorKind::InvalidParam => "invalid parameter",
            TransportErrorKind::Access => "access denied",
            TransportErrorKind::NoDevice => "no such device",
            TransportErrorKind::NotFound => "entity not found",
            TransportErrorKind::Busy => "resource busy",
            TransportErrorKind::Timeout => "operation timed out",
            TransportErrorKind::Overflow => "overflow",
            TransportErrorKind::Pipe => "pipe error",
            TransportErrorKind::Interrupted => "system call interrupted",
            TransportErrorKind::NoMemory => "insufficient memory",
            TransportErrorKind::NotSupported => "operation not supported",
            TransportErrorKind::ShortReply => "short reply",
            TransportErrorKind::Other => "other error",
        };
        f.write_str(text)
    }
}

/// Which level of the descriptor tree an out-of-range index addressed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    Configuration,
    Interface,
    AlternateSetting,
    Endpoint,
}

impl fmt::Display for DescriptorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DescriptorKind::Configuration => "configuration",
            DescriptorKind::Interface => "interface",
            DescriptorKind::AlternateSetting => "alternate setting",
            DescriptorKind::Endpoint => "endpoint",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsbError {
    /// Backend I/O failure with the backend-specific code, if any
    #[error("USB transport error: {kind}{}", code.map(|c| format!(" (code {c})")).unwrap_or_default())]
    Transport {
        kind: TransportErrorKind,
        code: Option<i32>,
    },

    #[error("Invalid {descriptor} index: {index}")]
    InvalidDescriptorIndex {
        descriptor: DescriptorKind,
        index: u8,
    },

    #[error("Invalid configuration value: {0}")]
    InvalidConfiguration(u8),

    #[error("Invalid interface {number} (alternate setting {alternate:?})")]
    InvalidInterface { number: u8, alternate: Option<u8> },

    #[error("Configuration not set")]
    ConfigurationNotSet,

    #[error("Invalid endpoint address {0:#04x}")]
    InvalidEndpoint(u8),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Operation not supported by backend: {0}")]
    NotSupported(&'static str),

    #[error("No backend available")]
    NoBackendAvailable,
}

impl UsbError {
    pub fn transport(kind: TransportErrorKind, code: Option<i32>) -> Self {
        UsbError::Transport { kind, code }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, UsbError::Transport { .. })
    }

    pub fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            UsbError::Transport { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Backend-specific numeric code, when the backend supplied one
    pub fn code(&self) -> Option<i32> {
        match self {
            UsbError::Transport { code, .. } => *code,
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.transport_kind() == Some(TransportErrorKind::Timeout)
    }
}

pub type Result<T> = std::result::Result<T, UsbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_display() {
        let err = UsbError::transport(TransportErrorKind::Timeout, Some(-7));
        let msg = err.to_string();
        assert!(msg.contains("timed out"));
        assert!(msg.contains("code -7"));

        let err = UsbError::transport(TransportErrorKind::ShortReply, None);
        assert!(!err.to_string().contains("code"));
    }

    #[test]
    fn test_classification() {
        let err = UsbError::transport(TransportErrorKind::Pipe, Some(-9));
        assert!(err.is_transport());
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::Pipe));
        assert_eq!(err.code(), Some(-9));

        let err = UsbError::InvalidEndpoint(0x81);
        assert!(!err.is_transport());
        assert_eq!(err.code(), None);
        assert!(err.to_string().contains("0x81"));
    }
}
