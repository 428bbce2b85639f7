//! libusb-1.0 backend built on rusb
//!
//! Devices are identified by their (bus, address, port) position; the
//! same position keeps the same [`DeviceId`] across enumerations. Open
//! handles live in a table keyed by [`HandleId`]. Transfers lock only
//! their own handle, never the table, so a blocking transfer on one device
//! does not stall the others. A handle closes once it is removed from the
//! table and no transfer still holds it.

use super::{Backend, DeviceId, HandleId, Payload, Transferred};
use crate::error::{DescriptorKind, Result, TransportErrorKind, UsbError};
use protocol::util::{CONFIG_ATTR_REMOTE_WAKEUP, CONFIG_ATTR_SELF_POWERED};
use protocol::{
    ConfigurationDescriptor, DeviceDescriptor, EndpointDescriptor, InterfaceDescriptor,
    util::{DESC_TYPE_CONFIG, DESC_TYPE_DEVICE, DESC_TYPE_ENDPOINT, DESC_TYPE_INTERFACE},
};
use rusb::{Context, Device, DeviceHandle, UsbContext};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

/// Known devices, keyed both ways
#[derive(Default)]
struct Registry {
    /// (bus, address, port) -> id
    positions: HashMap<(u8, u8, u8), DeviceId>,
    /// Devices seen by the last enumeration
    devices: HashMap<DeviceId, Device<Context>>,
    next_id: u64,
}

/// Open handles, each behind its own lock
///
/// The table lock is held only to look a handle up, never across a call
/// on the handle itself.
struct HandleTable<H> {
    handles: Mutex<HashMap<HandleId, Arc<Mutex<H>>>>,
}

impl<H> HandleTable<H> {
    fn new() -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
        }
    }

    fn insert(&self, id: HandleId, handle: H) {
        lock(&self.handles).insert(id, Arc::new(Mutex::new(handle)));
    }

    fn remove(&self, id: HandleId) -> bool {
        lock(&self.handles).remove(&id).is_some()
    }

    fn get(&self, id: HandleId) -> Option<Arc<Mutex<H>>> {
        lock(&self.handles).get(&id).cloned()
    }

    fn len(&self) -> usize {
        lock(&self.handles).len()
    }
}

pub struct Libusb1Backend {
    context: Context,
    registry: Mutex<Registry>,
    handles: HandleTable<DeviceHandle<Context>>,
    next_handle: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Libusb1Backend {
    /// Initialize a libusb context
    pub fn new() -> Result<Self> {
        let context = Context::new().map_err(map_rusb_error)?;
        debug!("libusb context initialized");
        Ok(Self {
            context,
            registry: Mutex::new(Registry::default()),
            handles: HandleTable::new(),
            next_handle: AtomicU64::new(1),
        })
    }

    fn with_device<T>(
        &self,
        dev: DeviceId,
        f: impl FnOnce(&Device<Context>) -> Result<T>,
    ) -> Result<T> {
        let registry = lock(&self.registry);
        let device = registry
            .devices
            .get(&dev)
            .ok_or(UsbError::transport(TransportErrorKind::NoDevice, Some(-4)))?;
        f(device)
    }

    fn with_handle<T>(
        &self,
        handle: HandleId,
        f: impl FnOnce(&mut DeviceHandle<Context>) -> rusb::Result<T>,
    ) -> Result<T> {
        let shared = self
            .handles
            .get(handle)
            .ok_or(UsbError::transport(TransportErrorKind::InvalidParam, Some(-2)))?;
        let mut h = lock(&shared);
        f(&mut h).map_err(map_rusb_error)
    }

    fn config_descriptor(device: &Device<Context>, config: u8) -> Result<rusb::ConfigDescriptor> {
        let num = device
            .device_descriptor()
            .map_err(map_rusb_error)?
            .num_configurations();
        if config >= num {
            return Err(UsbError::InvalidDescriptorIndex {
                descriptor: DescriptorKind::Configuration,
                index: config,
            });
        }
        device.config_descriptor(config).map_err(map_rusb_error)
    }

    fn transfer(
        &self,
        handle: HandleId,
        ep: u8,
        payload: Payload<'_>,
        timeout: Duration,
        interrupt: bool,
    ) -> Result<Transferred> {
        self.with_handle(handle, |h| match payload {
            Payload::Out(data) => {
                let n = if interrupt {
                    h.write_interrupt(ep, data, timeout)?
                } else {
                    h.write_bulk(ep, data, timeout)?
                };
                Ok(Transferred::Written(n))
            }
            Payload::In(len) => {
                let mut buf = vec![0u8; len];
                let n = if interrupt {
                    h.read_interrupt(ep, &mut buf, timeout)?
                } else {
                    h.read_bulk(ep, &mut buf, timeout)?
                };
                buf.truncate(n);
                Ok(Transferred::Read(buf))
            }
        })
    }
}

/// Rebuild a BCD release number from rusb's decoded version
fn version_to_bcd(version: rusb::Version) -> u16 {
    let major = version.major() as u16;
    ((major / 10) << 12)
        | ((major % 10) << 8)
        | ((version.minor() as u16 & 0x0F) << 4)
        | (version.sub_minor() as u16 & 0x0F)
}

fn endpoint_attributes(ep: &rusb::EndpointDescriptor) -> u8 {
    let transfer = match ep.transfer_type() {
        rusb::TransferType::Control => 0,
        rusb::TransferType::Isochronous => 1,
        rusb::TransferType::Bulk => 2,
        rusb::TransferType::Interrupt => 3,
    };
    let sync = match ep.sync_type() {
        rusb::SyncType::NoSync => 0,
        rusb::SyncType::Asynchronous => 1,
        rusb::SyncType::Adaptive => 2,
        rusb::SyncType::Synchronous => 3,
    };
    let usage = match ep.usage_type() {
        rusb::UsageType::Data => 0,
        rusb::UsageType::Feedback => 1,
        rusb::UsageType::FeedbackData => 2,
        rusb::UsageType::Reserved => 3,
    };
    transfer | (sync << 2) | (usage << 4)
}

fn out_of_range(descriptor: DescriptorKind, index: u8) -> UsbError {
    UsbError::InvalidDescriptorIndex { descriptor, index }
}

impl Backend for Libusb1Backend {
    fn name(&self) -> &'static str {
        "libusb1"
    }

    fn enumerate_devices(&self) -> Result<Vec<DeviceId>> {
        let list = self.context.devices().map_err(map_rusb_error)?;
        let mut registry = lock(&self.registry);
        registry.devices.clear();

        let mut ids = Vec::new();
        for device in list.iter() {
            let key = (device.bus_number(), device.address(), device.port_number());
            let id = match registry.positions.get(&key) {
                Some(id) => *id,
                None => {
                    registry.next_id += 1;
                    let id = DeviceId(registry.next_id);
                    registry.positions.insert(key, id);
                    id
                }
            };
            registry.devices.insert(id, device);
            ids.push(id);
        }

        debug!("Enumerated {} devices", ids.len());
        Ok(ids)
    }

    fn get_device_descriptor(&self, dev: DeviceId) -> Result<DeviceDescriptor> {
        self.with_device(dev, |device| {
            let d = device.device_descriptor().map_err(map_rusb_error)?;
            Ok(DeviceDescriptor {
                length: 18,
                descriptor_type: DESC_TYPE_DEVICE,
                usb_version: version_to_bcd(d.usb_version()),
                device_class: d.class_code(),
                device_subclass: d.sub_class_code(),
                device_protocol: d.protocol_code(),
                max_packet_size_0: d.max_packet_size(),
                vendor_id: d.vendor_id(),
                product_id: d.product_id(),
                device_version: version_to_bcd(d.device_version()),
                manufacturer_index: d.manufacturer_string_index().unwrap_or(0),
                product_index: d.product_string_index().unwrap_or(0),
                serial_number_index: d.serial_number_string_index().unwrap_or(0),
                num_configurations: d.num_configurations(),
                bus: Some(device.bus_number()),
                address: Some(device.address()),
                port_number: Some(device.port_number()),
            })
        })
    }

    fn get_configuration_descriptor(
        &self,
        dev: DeviceId,
        config: u8,
    ) -> Result<ConfigurationDescriptor> {
        self.with_device(dev, |device| {
            let c = Self::config_descriptor(device, config)?;

            let mut attributes = 0x80;
            if c.self_powered() {
                attributes |= CONFIG_ATTR_SELF_POWERED;
            }
            if c.remote_wakeup() {
                attributes |= CONFIG_ATTR_REMOTE_WAKEUP;
            }

            // Class-specific descriptors are not counted
            let total_length = c.interfaces().fold(9u16, |acc, intf| {
                intf.descriptors().fold(acc, |acc, alt| {
                    acc + 9 + 7 * alt.num_endpoints() as u16
                })
            });

            Ok(ConfigurationDescriptor {
                length: 9,
                descriptor_type: DESC_TYPE_CONFIG,
                total_length,
                num_interfaces: c.num_interfaces(),
                configuration_value: c.number(),
                string_index: c.description_string_index().unwrap_or(0),
                attributes,
                // rusb reports milliamperes in 2 mA units
                max_power: (c.max_power() / 2).min(u8::MAX as u16) as u8,
            })
        })
    }

    fn get_interface_descriptor(
        &self,
        dev: DeviceId,
        intf: u8,
        alt: u8,
        config: u8,
    ) -> Result<InterfaceDescriptor> {
        self.with_device(dev, |device| {
            let c = Self::config_descriptor(device, config)?;
            let interface = c
                .interfaces()
                .nth(intf as usize)
                .ok_or(out_of_range(DescriptorKind::Interface, intf))?;
            let d = interface
                .descriptors()
                .nth(alt as usize)
                .ok_or(out_of_range(DescriptorKind::AlternateSetting, alt))?;

            Ok(InterfaceDescriptor {
                length: 9,
                descriptor_type: DESC_TYPE_INTERFACE,
                interface_number: d.interface_number(),
                alternate_setting: d.setting_number(),
                num_endpoints: d.num_endpoints(),
                interface_class: d.class_code(),
                interface_subclass: d.sub_class_code(),
                interface_protocol: d.protocol_code(),
                string_index: d.description_string_index().unwrap_or(0),
            })
        })
    }

    fn get_endpoint_descriptor(
        &self,
        dev: DeviceId,
        ep: u8,
        intf: u8,
        alt: u8,
        config: u8,
    ) -> Result<EndpointDescriptor> {
        self.with_device(dev, |device| {
            let c = Self::config_descriptor(device, config)?;
            let interface = c
                .interfaces()
                .nth(intf as usize)
                .ok_or(out_of_range(DescriptorKind::Interface, intf))?;
            let alt_desc = interface
                .descriptors()
                .nth(alt as usize)
                .ok_or(out_of_range(DescriptorKind::AlternateSetting, alt))?;
            let e = alt_desc
                .endpoint_descriptors()
                .nth(ep as usize)
                .ok_or(out_of_range(DescriptorKind::Endpoint, ep))?;

            Ok(EndpointDescriptor {
                length: 7,
                descriptor_type: DESC_TYPE_ENDPOINT,
                endpoint_address: e.address(),
                attributes: endpoint_attributes(&e),
                max_packet_size: e.max_packet_size(),
                interval: e.interval(),
                refresh: 0,
                synch_address: 0,
            })
        })
    }

    fn open_device(&self, dev: DeviceId) -> Result<HandleId> {
        let handle = self.with_device(dev, |device| device.open().map_err(map_rusb_error))?;
        let id = HandleId(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.handles.insert(id, handle);
        debug!("Opened {:?} as {:?}", dev, id);
        Ok(id)
    }

    fn close_device(&self, handle: HandleId) -> Result<()> {
        // Dropping the last reference to the rusb handle closes it
        if self.handles.remove(handle) {
            debug!("Closed {:?}", handle);
            Ok(())
        } else {
            Err(UsbError::transport(TransportErrorKind::InvalidParam, Some(-2)))
        }
    }

    fn set_configuration(&self, handle: HandleId, value: u8) -> Result<()> {
        self.with_handle(handle, |h| h.set_active_configuration(value))
    }

    fn get_configuration(&self, handle: HandleId) -> Result<u8> {
        self.with_handle(handle, |h| h.active_configuration())
    }

    fn claim_interface(&self, handle: HandleId, number: u8) -> Result<()> {
        self.with_handle(handle, |h| h.claim_interface(number))
    }

    fn release_interface(&self, handle: HandleId, number: u8) -> Result<()> {
        self.with_handle(handle, |h| h.release_interface(number))
    }

    fn set_interface_altsetting(&self, handle: HandleId, number: u8, alt: u8) -> Result<()> {
        self.with_handle(handle, |h| h.set_alternate_setting(number, alt))
    }

    fn bulk_transfer(
        &self,
        handle: HandleId,
        ep: u8,
        _intf: u8,
        payload: Payload<'_>,
        timeout: Duration,
    ) -> Result<Transferred> {
        self.transfer(handle, ep, payload, timeout, false)
    }

    fn interrupt_transfer(
        &self,
        handle: HandleId,
        ep: u8,
        _intf: u8,
        payload: Payload<'_>,
        timeout: Duration,
    ) -> Result<Transferred> {
        self.transfer(handle, ep, payload, timeout, true)
    }

    fn ctrl_transfer(
        &self,
        handle: HandleId,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        payload: Payload<'_>,
        timeout: Duration,
    ) -> Result<Transferred> {
        self.with_handle(handle, |h| match payload {
            Payload::Out(data) => {
                let n = h.write_control(request_type, request, value, index, data, timeout)?;
                Ok(Transferred::Written(n))
            }
            Payload::In(len) => {
                let mut buf = vec![0u8; len];
                let n = h.read_control(request_type, request, value, index, &mut buf, timeout)?;
                buf.truncate(n);
                Ok(Transferred::Read(buf))
            }
        })
    }

    fn reset_device(&self, handle: HandleId) -> Result<()> {
        self.with_handle(handle, |h| h.reset())
    }

    fn is_kernel_driver_active(&self, handle: HandleId, intf: u8) -> Result<bool> {
        self.with_handle(handle, |h| h.kernel_driver_active(intf))
    }

    fn detach_kernel_driver(&self, handle: HandleId, intf: u8) -> Result<()> {
        self.with_handle(handle, |h| h.detach_kernel_driver(intf))
    }

    fn attach_kernel_driver(&self, handle: HandleId, intf: u8) -> Result<()> {
        self.with_handle(handle, |h| h.attach_kernel_driver(intf))
    }

    fn clear_halt(&self, handle: HandleId, ep: u8) -> Result<()> {
        self.with_handle(handle, |h| h.clear_halt(ep))
    }
}

impl Drop for Libusb1Backend {
    fn drop(&mut self) {
        let open = self.handles.len();
        if open > 0 {
            warn!("Dropping libusb backend with {} open handles", open);
        }
    }
}

/// Map a rusb error to a transport error carrying the libusb code
pub fn map_rusb_error(err: rusb::Error) -> UsbError {
    let (kind, code) = match err {
        rusb::Error::Io => (TransportErrorKind::Io, -1),
        rusb::Error::InvalidParam => (TransportErrorKind::InvalidParam, -2),
        rusb::Error::Access => (TransportErrorKind::Access, -3),
        rusb::Error::NoDevice => (TransportErrorKind::NoDevice, -4),
        rusb::Error::NotFound => (TransportErrorKind::NotFound, -5),
        rusb::Error::Busy => (TransportErrorKind::Busy, -6),
        rusb::Error::Timeout => (TransportErrorKind::Timeout, -7),
        rusb::Error::Overflow => (TransportErrorKind::Overflow, -8),
        rusb::Error::Pipe => (TransportErrorKind::Pipe, -9),
        rusb::Error::Interrupted => (TransportErrorKind::Interrupted, -10),
        rusb::Error::NoMem => (TransportErrorKind::NoMemory, -11),
        rusb::Error::NotSupported => (TransportErrorKind::NotSupported, -12),
        _ => (TransportErrorKind::Other, -99),
    };
    UsbError::transport(kind, Some(code))
}
