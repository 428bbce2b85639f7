//! Device facade
//!
//! A [`Device`] wraps one backend device id. The device descriptor is read
//! once, at construction; everything else (handle, claims, caches) lives
//! in the device's resource manager and is acquired lazily.
//!
//! # Example
//!
//! ```
//! use host::backend::loopback::{LoopbackBackend, LoopbackDevice};
//! use host::find;
//! use std::sync::Arc;
//!
//! let backend = Arc::new(LoopbackBackend::new(vec![LoopbackDevice::bulk_loopback(0x04d8, 0xfa2e)]));
//! let dev = find().backend(backend).vendor_id(0x04d8).first().unwrap().unwrap();
//!
//! dev.set_configuration(None).unwrap();
//! assert_eq!(dev.write(0x01, b"hello", None, None).unwrap(), 5);
//! assert_eq!(dev.read(0x81, 5, None, None).unwrap(), b"hello");
//! ```

use crate::backend::{Backend, DeviceId, HandleId, Payload, Transferred};
use crate::descriptors::Configuration;
use crate::error::{DescriptorKind, Result, UsbError};
use crate::resources::{InterfaceTarget, ResourceManager, ResourceState};
use protocol::{DeviceDescriptor, Direction, TransferType, ctrl_direction};
use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// Timeout used when a transfer does not name one
pub const DEFAULT_TIMEOUT_MS: u32 = 1000;

/// Data stage argument of [`Device::ctrl_transfer`]
///
/// For host-to-device requests this is the payload. For device-to-host
/// requests it is the number of bytes to read; a byte buffer there asks
/// for as many bytes as the buffer holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlData<'a> {
    None,
    Bytes(Cow<'a, [u8]>),
    Length(usize),
}

impl From<usize> for ControlData<'_> {
    fn from(length: usize) -> Self {
        ControlData::Length(length)
    }
}

impl<'a> From<&'a [u8]> for ControlData<'a> {
    fn from(data: &'a [u8]) -> Self {
        ControlData::Bytes(Cow::Borrowed(data))
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for ControlData<'a> {
    fn from(data: &'a [u8; N]) -> Self {
        ControlData::Bytes(Cow::Borrowed(data.as_slice()))
    }
}

impl<'a> From<&'a Vec<u8>> for ControlData<'a> {
    fn from(data: &'a Vec<u8>) -> Self {
        ControlData::Bytes(Cow::Borrowed(data.as_slice()))
    }
}

impl From<Vec<u8>> for ControlData<'_> {
    fn from(data: Vec<u8>) -> Self {
        ControlData::Bytes(Cow::Owned(data))
    }
}

impl<'a> From<&'a str> for ControlData<'a> {
    fn from(text: &'a str) -> Self {
        ControlData::Bytes(Cow::Borrowed(text.as_bytes()))
    }
}

impl From<()> for ControlData<'_> {
    fn from(_: ()) -> Self {
        ControlData::None
    }
}

/// A USB device seen through one backend
pub struct Device {
    backend: Arc<dyn Backend>,
    id: DeviceId,
    descriptor: DeviceDescriptor,
    resources: Mutex<ResourceManager>,
    default_timeout: AtomicU32,
}

impl Device {
    /// Wrap a backend device id, reading its device descriptor
    pub fn new(backend: Arc<dyn Backend>, id: DeviceId) -> Result<Self> {
        let descriptor = backend.get_device_descriptor(id)?;
        let resources =
            ResourceManager::new(Arc::clone(&backend), id, descriptor.num_configurations);
        Ok(Self {
            backend,
            id,
            descriptor,
            resources: Mutex::new(resources),
            default_timeout: AtomicU32::new(DEFAULT_TIMEOUT_MS),
        })
    }

    fn resources(&self) -> MutexGuard<'_, ResourceManager> {
        self.resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn vendor_id(&self) -> u16 {
        self.descriptor.vendor_id
    }

    pub fn product_id(&self) -> u16 {
        self.descriptor.product_id
    }

    pub fn bus(&self) -> Option<u8> {
        self.descriptor.bus
    }

    pub fn address(&self) -> Option<u8> {
        self.descriptor.address
    }

    pub fn port_number(&self) -> Option<u8> {
        self.descriptor.port_number
    }

    pub fn num_configurations(&self) -> u8 {
        self.descriptor.num_configurations
    }

    /// Default transfer timeout in milliseconds
    pub fn default_timeout(&self) -> u32 {
        self.default_timeout.load(Ordering::Relaxed)
    }

    /// Set the default transfer timeout in milliseconds
    ///
    /// Negative values are rejected and leave the current value in place.
    pub fn set_default_timeout(&self, timeout_ms: i64) -> Result<()> {
        let timeout = u32::try_from(timeout_ms).map_err(|_| {
            UsbError::InvalidArgument(format!("invalid timeout: {} ms", timeout_ms))
        })?;
        self.default_timeout.store(timeout, Ordering::Relaxed);
        Ok(())
    }

    fn timeout(&self, timeout: Option<u32>) -> Duration {
        Duration::from_millis(timeout.unwrap_or_else(|| self.default_timeout()) as u64)
    }

    /// Configurations in descriptor order, queried fresh on each call
    pub fn configurations(&self) -> ConfigurationIter<'_> {
        ConfigurationIter {
            device: self,
            next: 0,
        }
    }

    /// Configuration by logical index
    pub fn configuration(&self, index: u8) -> Result<Configuration<'_>> {
        if index >= self.descriptor.num_configurations {
            return Err(UsbError::InvalidDescriptorIndex {
                descriptor: DescriptorKind::Configuration,
                index,
            });
        }
        let descriptor = self.backend.get_configuration_descriptor(self.id, index)?;
        Ok(Configuration::new(self, index, descriptor))
    }

    /// Activate a configuration by `bConfigurationValue`
    ///
    /// `None` picks the first configuration, `Some(0)` unconfigures.
    pub fn set_configuration(&self, value: Option<u8>) -> Result<()> {
        self.resources().set_configuration(value)
    }

    pub fn get_active_configuration(&self) -> Result<Configuration<'_>> {
        let (index, descriptor) = self.resources().get_active_configuration()?;
        Ok(Configuration::new(self, index, descriptor))
    }

    /// Select an alternate setting of an interface
    ///
    /// Either argument may be omitted: the interface defaults to the first
    /// one of the active configuration, the alternate to the one currently
    /// tracked for it.
    pub fn set_interface_altsetting(&self, interface: Option<u8>, alternate: Option<u8>) -> Result<()> {
        self.resources()
            .set_interface_altsetting(interface.into(), alternate)
    }

    /// Claim an interface explicitly
    ///
    /// Transfers claim on demand, so this is only needed to take the
    /// interface before the first transfer. Explicit claims nest: the
    /// interface is given back once every claim has been released, or on
    /// [`dispose`](Self::dispose).
    pub fn claim_interface(&self, interface: Option<u8>) -> Result<()> {
        self.resources().claim_interface(interface.into())
    }

    /// Release one explicit claim; unclaimed interfaces are left alone
    pub fn release_interface(&self, interface: Option<u8>) -> Result<()> {
        self.resources().release_interface(interface.into())
    }

    /// Reset the device
    ///
    /// Claimed interfaces are released and the handle closed; they are not
    /// claimed again afterwards.
    pub fn reset(&self) -> Result<()> {
        let mut resources = self.resources();
        let handle = resources.open()?;
        resources.dispose(false)?;
        debug!("Resetting {:?}", self.id);
        self.backend.reset_device(handle)?;
        resources.dispose(true)
    }

    pub(crate) fn transfer(
        &self,
        endpoint: u8,
        payload: Payload<'_>,
        interface: InterfaceTarget<'_>,
        timeout: Option<u32>,
    ) -> Result<Transferred> {
        let (handle, number, kind) = {
            let mut resources = self.resources();
            let intf = resources.get_interface(interface)?;
            let kind = resources.get_endpoint_type(endpoint, &intf)?;
            resources.ensure_claimed(InterfaceTarget::Resolved(&intf))?;
            (
                resources.open()?,
                intf.descriptor.interface_number,
                kind,
            )
        };
        let timeout = self.timeout(timeout);

        match kind {
            TransferType::Bulk => {
                self.backend
                    .bulk_transfer(handle, endpoint, number, payload, timeout)
            }
            TransferType::Interrupt => {
                self.backend
                    .interrupt_transfer(handle, endpoint, number, payload, timeout)
            }
            TransferType::Isochronous => {
                self.backend
                    .isochronous_transfer(handle, endpoint, number, payload, timeout)
            }
            TransferType::Control => Err(UsbError::InvalidArgument(format!(
                "endpoint {:#04x} is a control endpoint",
                endpoint
            ))),
        }
    }

    /// Write `data` to an endpoint, returning the number of bytes written
    ///
    /// The interface defaults to the first one of the active configuration
    /// and is claimed if needed.
    pub fn write(
        &self,
        endpoint: u8,
        data: &[u8],
        interface: Option<u8>,
        timeout: Option<u32>,
    ) -> Result<usize> {
        self.transfer(endpoint, Payload::Out(data), interface.into(), timeout)?
            .into_written()
    }

    /// Read up to `length` bytes from an endpoint
    pub fn read(
        &self,
        endpoint: u8,
        length: usize,
        interface: Option<u8>,
        timeout: Option<u32>,
    ) -> Result<Vec<u8>> {
        self.transfer(endpoint, Payload::In(length), interface.into(), timeout)?
            .into_data()
    }

    /// Issue a control transfer on endpoint 0
    ///
    /// Bit 7 of `request_type` picks the direction. OUT requests return
    /// [`Transferred::Written`], IN requests [`Transferred::Read`]. No
    /// interface is claimed.
    pub fn ctrl_transfer<'d>(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: impl Into<ControlData<'d>>,
        timeout: Option<u32>,
    ) -> Result<Transferred> {
        let data = data.into();
        let payload = match (ctrl_direction(request_type), &data) {
            (Direction::Out, ControlData::None) => Payload::Out(&[]),
            (Direction::Out, ControlData::Bytes(bytes)) => Payload::Out(bytes.as_ref()),
            (Direction::Out, ControlData::Length(_)) => {
                return Err(UsbError::InvalidArgument(
                    "host-to-device control transfer needs a payload, not a length".into(),
                ));
            }
            (Direction::In, ControlData::None) => Payload::In(0),
            (Direction::In, ControlData::Length(n)) => Payload::In(*n),
            (Direction::In, ControlData::Bytes(bytes)) => Payload::In(bytes.len()),
        };

        let handle = self.resources().open()?;
        self.backend.ctrl_transfer(
            handle,
            request_type,
            request,
            value,
            index,
            payload,
            self.timeout(timeout),
        )
    }

    /// Open handle and the `bInterfaceNumber` of an interface of the active
    /// configuration
    fn kernel_driver_target(&self, interface: u8) -> Result<(HandleId, u8)> {
        let mut resources = self.resources();
        let number = resources
            .get_interface(InterfaceTarget::Number(interface))?
            .descriptor
            .interface_number;
        Ok((resources.open()?, number))
    }

    pub fn is_kernel_driver_active(&self, interface: u8) -> Result<bool> {
        let (handle, number) = self.kernel_driver_target(interface)?;
        self.backend.is_kernel_driver_active(handle, number)
    }

    pub fn detach_kernel_driver(&self, interface: u8) -> Result<()> {
        let (handle, number) = self.kernel_driver_target(interface)?;
        self.backend.detach_kernel_driver(handle, number)
    }

    pub fn attach_kernel_driver(&self, interface: u8) -> Result<()> {
        let (handle, number) = self.kernel_driver_target(interface)?;
        self.backend.attach_kernel_driver(handle, number)
    }

    /// Clear a halt/stall condition on an endpoint
    pub fn clear_halt(&self, endpoint: u8) -> Result<()> {
        let handle = self.resources().open()?;
        self.backend.clear_halt(handle, endpoint)
    }

    /// Release all claims, close the handle and drop cached state
    ///
    /// Every release and the close are attempted even if one fails; the
    /// first error is returned. The device stays usable and re-acquires
    /// resources on demand.
    pub fn dispose(&self) -> Result<()> {
        self.resources().dispose(true)
    }

    pub fn is_open(&self) -> bool {
        self.resources().state().handle_open
    }

    /// Claimed `bInterfaceNumber` values, ascending
    pub fn claimed_interfaces(&self) -> Vec<u8> {
        self.resources().state().claimed_interfaces
    }

    pub fn resource_state(&self) -> ResourceState {
        self.resources().state()
    }

    /// LANGIDs the device supports
    pub fn langids(&self) -> Result<Vec<u16>> {
        crate::util::get_langids(self)
    }

    pub fn manufacturer(&self) -> Result<Option<String>> {
        crate::util::get_string(self, self.descriptor.manufacturer_index, None)
    }

    pub fn product(&self) -> Result<Option<String>> {
        crate::util::get_string(self, self.descriptor.product_index, None)
    }

    pub fn serial_number(&self) -> Result<Option<String>> {
        crate::util::get_string(self, self.descriptor.serial_number_index, None)
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        let resources = self
            .resources
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = resources.dispose(true) {
            warn!("Failed to dispose {:?} on drop: {}", self.id, e);
        }
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("backend", &self.backend.name())
            .field("vendor_id", &format_args!("{:#06x}", self.descriptor.vendor_id))
            .field("product_id", &format_args!("{:#06x}", self.descriptor.product_id))
            .field("default_timeout", &self.default_timeout())
            .finish()
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.descriptor.bus, self.descriptor.address) {
            (Some(bus), Some(address)) => write!(f, "Bus {:03} Device {:03}: ", bus, address)?,
            _ => write!(f, "Device {}: ", self.id.0)?,
        }
        write!(
            f,
            "ID {:04x}:{:04x}",
            self.descriptor.vendor_id, self.descriptor.product_id
        )
    }
}

/// Iterator over a device's configurations
pub struct ConfigurationIter<'a> {
    device: &'a Device,
    next: u8,
}

impl<'a> Iterator for ConfigurationIter<'a> {
    type Item = Result<Configuration<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.device.num_configurations() {
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some(self.device.configuration(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::loopback::{LoopbackBackend, LoopbackDevice};

    fn device() -> (Arc<LoopbackBackend>, Device) {
        let backend = Arc::new(LoopbackBackend::new(vec![LoopbackDevice::bulk_loopback(
            0x04d8, 0xfa2e,
        )]));
        let dev = Device::new(backend.clone(), DeviceId(0)).unwrap();
        (backend, dev)
    }

    #[test]
    fn test_construction_reads_descriptor_only() {
        let (backend, dev) = device();
        assert_eq!(dev.vendor_id(), 0x04d8);
        assert_eq!(backend.calls("get_device_descriptor"), 1);
        assert_eq!(backend.calls("open_device"), 0);
        assert!(!dev.is_open());
    }

    #[test]
    fn test_control_data_conversions() {
        assert_eq!(ControlData::from(4usize), ControlData::Length(4));
        assert_eq!(
            ControlData::from("ab"),
            ControlData::Bytes(Cow::Borrowed(&b"ab"[..]))
        );
        assert_eq!(ControlData::from(()), ControlData::None);
        assert_eq!(
            ControlData::from(&[1u8, 2]),
            ControlData::Bytes(Cow::Borrowed(&[1u8, 2][..]))
        );
    }

    #[test]
    fn test_out_request_with_length_rejected() {
        let (backend, dev) = device();
        let err = dev.ctrl_transfer(0x40, 1, 0, 0, 3usize, None).unwrap_err();
        assert!(matches!(err, UsbError::InvalidArgument(_)));
        assert_eq!(backend.calls("ctrl_transfer"), 0);
    }

    #[test]
    fn test_in_request_without_data_reads_nothing() {
        let (_backend, dev) = device();
        let read = dev.ctrl_transfer(0xC0, 1, 0, 0, (), None).unwrap();
        assert_eq!(read, Transferred::Read(vec![]));
    }

    #[test]
    fn test_drop_disposes() {
        let (backend, dev) = device();
        dev.claim_interface(Some(0)).unwrap();
        drop(dev);
        assert_eq!(backend.calls("release_interface"), 1);
        assert_eq!(backend.open_handles(), 0);
    }

    #[test]
    fn test_display() {
        let (_backend, dev) = device();
        assert_eq!(dev.to_string(), "Bus 001 Device 001: ID 04d8:fa2e");
    }
}
