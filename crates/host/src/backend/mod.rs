//! Backend capability interface
//!
//! A backend is the native transport the core drives: it enumerates
//! devices, answers descriptor queries by logical index, manages handles
//! and moves data. The core only ever talks to a backend through the
//! [`Backend`] trait, holding it as `Arc<dyn Backend>`.
//!
//! Devices and open handles are opaque ids issued by the backend. They
//! are plain `Copy` values; the backend owns the native objects behind
//! them.

pub mod loopback;

#[cfg(feature = "libusb1")]
pub mod libusb1;

use crate::error::{Result, UsbError};
use protocol::{ConfigurationDescriptor, DeviceDescriptor, EndpointDescriptor, InterfaceDescriptor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Backend-issued device identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u64);

/// Backend-issued open handle identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub u64);

/// Data stage of a transfer: bytes to send, or the number of bytes to read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload<'a> {
    Out(&'a [u8]),
    In(usize),
}

/// Outcome of a transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transferred {
    /// Bytes written by an OUT transfer
    Written(usize),
    /// Data returned by an IN transfer
    Read(Vec<u8>),
}

impl Transferred {
    pub fn written(&self) -> Option<usize> {
        match self {
            Transferred::Written(n) => Some(*n),
            Transferred::Read(_) => None,
        }
    }

    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Transferred::Read(data) => Some(data),
            Transferred::Written(_) => None,
        }
    }

    pub(crate) fn into_written(self) -> Result<usize> {
        match self {
            Transferred::Written(n) => Ok(n),
            Transferred::Read(_) => Err(UsbError::InvalidArgument(
                "backend returned data for an OUT transfer".into(),
            )),
        }
    }

    pub(crate) fn into_data(self) -> Result<Vec<u8>> {
        match self {
            Transferred::Read(data) => Ok(data),
            Transferred::Written(_) => Err(UsbError::InvalidArgument(
                "backend returned a byte count for an IN transfer".into(),
            )),
        }
    }
}

/// Operations the core consumes from a native transport
///
/// Descriptor queries take logical indices (position among siblings), not
/// protocol values such as `bConfigurationValue`. A query past the
/// parent's declared count fails with [`UsbError::InvalidDescriptorIndex`].
///
/// Every other failure is reported as [`UsbError::Transport`] with the
/// backend's own numeric code. Optional capabilities default to
/// [`UsbError::NotSupported`].
pub trait Backend: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    fn enumerate_devices(&self) -> Result<Vec<DeviceId>>;

    fn get_device_descriptor(&self, dev: DeviceId) -> Result<DeviceDescriptor>;

    fn get_configuration_descriptor(
        &self,
        dev: DeviceId,
        config: u8,
    ) -> Result<ConfigurationDescriptor>;

    fn get_interface_descriptor(
        &self,
        dev: DeviceId,
        intf: u8,
        alt: u8,
        config: u8,
    ) -> Result<InterfaceDescriptor>;

    fn get_endpoint_descriptor(
        &self,
        dev: DeviceId,
        ep: u8,
        intf: u8,
        alt: u8,
        config: u8,
    ) -> Result<EndpointDescriptor>;

    fn open_device(&self, dev: DeviceId) -> Result<HandleId>;

    fn close_device(&self, handle: HandleId) -> Result<()>;

    /// Select a configuration by `bConfigurationValue` (0 unconfigures)
    fn set_configuration(&self, handle: HandleId, value: u8) -> Result<()>;

    /// Read back the active `bConfigurationValue` (0 when unconfigured)
    fn get_configuration(&self, _handle: HandleId) -> Result<u8> {
        Err(UsbError::NotSupported("get_configuration"))
    }

    fn claim_interface(&self, handle: HandleId, number: u8) -> Result<()>;

    fn release_interface(&self, handle: HandleId, number: u8) -> Result<()>;

    fn set_interface_altsetting(&self, handle: HandleId, number: u8, alt: u8) -> Result<()>;

    fn bulk_transfer(
        &self,
        handle: HandleId,
        ep: u8,
        intf: u8,
        payload: Payload<'_>,
        timeout: Duration,
    ) -> Result<Transferred>;

    fn interrupt_transfer(
        &self,
        handle: HandleId,
        ep: u8,
        intf: u8,
        payload: Payload<'_>,
        timeout: Duration,
    ) -> Result<Transferred>;

    fn isochronous_transfer(
        &self,
        _handle: HandleId,
        _ep: u8,
        _intf: u8,
        _payload: Payload<'_>,
        _timeout: Duration,
    ) -> Result<Transferred> {
        Err(UsbError::NotSupported("isochronous_transfer"))
    }

    #[allow(clippy::too_many_arguments)]
    fn ctrl_transfer(
        &self,
        handle: HandleId,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        payload: Payload<'_>,
        timeout: Duration,
    ) -> Result<Transferred>;

    fn reset_device(&self, handle: HandleId) -> Result<()>;

    fn is_kernel_driver_active(&self, _handle: HandleId, _intf: u8) -> Result<bool> {
        Err(UsbError::NotSupported("is_kernel_driver_active"))
    }

    fn detach_kernel_driver(&self, _handle: HandleId, _intf: u8) -> Result<()> {
        Err(UsbError::NotSupported("detach_kernel_driver"))
    }

    fn attach_kernel_driver(&self, _handle: HandleId, _intf: u8) -> Result<()> {
        Err(UsbError::NotSupported("attach_kernel_driver"))
    }

    fn clear_halt(&self, _handle: HandleId, _ep: u8) -> Result<()> {
        Err(UsbError::NotSupported("clear_halt"))
    }
}

/// Known native backends, in default probe order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Libusb1,
    OpenUsb,
    Libusb0,
}

impl BackendKind {
    /// Probe order used when nothing else is configured
    pub const PRIORITY: [BackendKind; 3] =
        [BackendKind::Libusb1, BackendKind::OpenUsb, BackendKind::Libusb0];

    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Libusb1 => "libusb1",
            BackendKind::OpenUsb => "openusb",
            BackendKind::Libusb0 => "libusb0",
        }
    }

    /// Try to initialize this backend
    pub fn probe(self) -> Result<Arc<dyn Backend>> {
        match self {
            #[cfg(feature = "libusb1")]
            BackendKind::Libusb1 => {
                let backend = libusb1::Libusb1Backend::new()?;
                Ok(Arc::new(backend))
            }
            #[cfg(not(feature = "libusb1"))]
            BackendKind::Libusb1 => Err(UsbError::NotSupported("libusb1 support not compiled in")),
            // No binding for these ABIs is linked into this build
            BackendKind::OpenUsb => Err(UsbError::NotSupported("openusb library not available")),
            BackendKind::Libusb0 => Err(UsbError::NotSupported("libusb0 library not available")),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = UsbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "libusb1" | "libusb-1.0" => Ok(BackendKind::Libusb1),
            "openusb" => Ok(BackendKind::OpenUsb),
            "libusb0" | "libusb-0.1" => Ok(BackendKind::Libusb0),
            other => Err(UsbError::InvalidArgument(format!(
                "unknown backend '{}'",
                other
            ))),
        }
    }
}

/// Select the first backend in `order` that initializes
pub fn select_backend(order: &[BackendKind]) -> Result<Arc<dyn Backend>> {
    for kind in order {
        match kind.probe() {
            Ok(backend) => {
                info!("Using backend: {}", kind);
                return Ok(backend);
            }
            Err(e) => debug!("Backend {} unavailable: {}", kind, e),
        }
    }
    Err(UsbError::NoBackendAvailable)
}

/// Select a backend using the default priority order
pub fn default_backend() -> Result<Arc<dyn Backend>> {
    select_backend(&BackendKind::PRIORITY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("libusb1".parse::<BackendKind>().unwrap(), BackendKind::Libusb1);
        assert_eq!("OpenUSB".parse::<BackendKind>().unwrap(), BackendKind::OpenUsb);
        assert_eq!("libusb-0.1".parse::<BackendKind>().unwrap(), BackendKind::Libusb0);
        assert!("winusb".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_unlinked_backends_unavailable() {
        assert!(matches!(
            BackendKind::OpenUsb.probe(),
            Err(UsbError::NotSupported(_))
        ));
        assert!(matches!(
            select_backend(&[BackendKind::Libusb0, BackendKind::OpenUsb]),
            Err(UsbError::NoBackendAvailable)
        ));
    }

    #[test]
    fn test_select_backend_empty_order() {
        assert!(matches!(select_backend(&[]), Err(UsbError::NoBackendAvailable)));
    }

    #[test]
    fn test_transferred_accessors() {
        assert_eq!(Transferred::Written(3).written(), Some(3));
        assert_eq!(Transferred::Written(3).data(), None);
        assert_eq!(Transferred::Read(vec![1, 2]).data(), Some(&[1u8, 2][..]));
        assert!(Transferred::Read(vec![]).into_written().is_err());
    }
}
