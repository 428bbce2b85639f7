//! Device discovery
//!
//! [`find`] starts a [`Finder`]: a set of exact-match field filters, an
//! optional predicate and an optional backend. Devices are wrapped one at
//! a time as the backend enumerates them, so [`Finder::first`] stops at
//! the first hit without constructing the rest.
//!
//! # Example
//!
//! ```
//! use host::backend::loopback::{LoopbackBackend, LoopbackDevice};
//! use host::find;
//! use std::sync::Arc;
//!
//! let backend = Arc::new(LoopbackBackend::new(vec![
//!     LoopbackDevice::bulk_loopback(0x04d8, 0xfa2e),
//!     LoopbackDevice::bulk_loopback(0x1d6b, 0x0002),
//! ]));
//!
//! let all = find().backend(backend.clone()).all().unwrap();
//! assert_eq!(all.len(), 2);
//!
//! let none = find().backend(backend).vendor_id(0xdead).first().unwrap();
//! assert!(none.is_none());
//! ```

use crate::backend::{Backend, BackendKind, DeviceId, select_backend};
use crate::config::HostConfig;
use crate::device::Device;
use crate::error::Result;
use protocol::DeviceDescriptor;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Device attribute a filter compares against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceField {
    UsbVersion,
    DeviceClass,
    DeviceSubclass,
    DeviceProtocol,
    MaxPacketSize0,
    VendorId,
    ProductId,
    DeviceVersion,
    ManufacturerIndex,
    ProductIndex,
    SerialNumberIndex,
    NumConfigurations,
    Bus,
    Address,
    PortNumber,
}

impl DeviceField {
    /// Value of this field on `descriptor`; `None` when the backend does
    /// not know it (bus topology)
    pub fn value(self, descriptor: &DeviceDescriptor) -> Option<u32> {
        let d = descriptor;
        let value = match self {
            DeviceField::UsbVersion => d.usb_version as u32,
            DeviceField::DeviceClass => d.device_class as u32,
            DeviceField::DeviceSubclass => d.device_subclass as u32,
            DeviceField::DeviceProtocol => d.device_protocol as u32,
            DeviceField::MaxPacketSize0 => d.max_packet_size_0 as u32,
            DeviceField::VendorId => d.vendor_id as u32,
            DeviceField::ProductId => d.product_id as u32,
            DeviceField::DeviceVersion => d.device_version as u32,
            DeviceField::ManufacturerIndex => d.manufacturer_index as u32,
            DeviceField::ProductIndex => d.product_index as u32,
            DeviceField::SerialNumberIndex => d.serial_number_index as u32,
            DeviceField::NumConfigurations => d.num_configurations as u32,
            DeviceField::Bus => return d.bus.map(u32::from),
            DeviceField::Address => return d.address.map(u32::from),
            DeviceField::PortNumber => return d.port_number.map(u32::from),
        };
        Some(value)
    }
}

type MatchFn = Box<dyn Fn(&Device) -> bool>;

/// Builder for a device search; see [`find`]
pub struct Finder {
    backend: Option<Arc<dyn Backend>>,
    order: Vec<BackendKind>,
    filters: Vec<(DeviceField, u32)>,
    custom_match: Option<MatchFn>,
    default_timeout: Option<u32>,
}

/// Start a device search
pub fn find() -> Finder {
    Finder::new()
}

impl Default for Finder {
    fn default() -> Self {
        Self::new()
    }
}

impl Finder {
    pub fn new() -> Self {
        Self {
            backend: None,
            order: BackendKind::PRIORITY.to_vec(),
            filters: Vec::new(),
            custom_match: None,
            default_timeout: None,
        }
    }

    /// Search this backend instead of probing for one
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Probe order used when no backend was given
    pub fn backend_order(mut self, order: impl IntoIterator<Item = BackendKind>) -> Self {
        self.order = order.into_iter().collect();
        self
    }

    /// Apply the backend order and default timeout from a host config
    pub fn with_config(mut self, config: &HostConfig) -> Self {
        self.order = config.backend_kinds();
        self.default_timeout = Some(config.transfer.default_timeout_ms);
        self
    }

    /// Require `field` to equal `value` exactly
    pub fn field(mut self, field: DeviceField, value: u32) -> Self {
        self.filters.push((field, value));
        self
    }

    pub fn vendor_id(self, vendor_id: u16) -> Self {
        self.field(DeviceField::VendorId, vendor_id as u32)
    }

    pub fn product_id(self, product_id: u16) -> Self {
        self.field(DeviceField::ProductId, product_id as u32)
    }

    pub fn device_class(self, class: u8) -> Self {
        self.field(DeviceField::DeviceClass, class as u32)
    }

    pub fn bus(self, bus: u8) -> Self {
        self.field(DeviceField::Bus, bus as u32)
    }

    pub fn address(self, address: u8) -> Self {
        self.field(DeviceField::Address, address as u32)
    }

    /// Keep only devices for which `predicate` returns true
    pub fn custom_match(mut self, predicate: impl Fn(&Device) -> bool + 'static) -> Self {
        self.custom_match = Some(Box::new(predicate));
        self
    }

    /// Lazily yield matching devices in enumeration order
    pub fn iter(self) -> Result<Matches> {
        let backend = match self.backend {
            Some(backend) => backend,
            None => select_backend(&self.order)?,
        };
        let ids = backend.enumerate_devices()?;
        debug!("Searching {} devices on {}", ids.len(), backend.name());
        Ok(Matches {
            backend,
            ids: ids.into_iter(),
            filters: self.filters,
            custom_match: self.custom_match,
            default_timeout: self.default_timeout,
        })
    }

    /// First matching device, if any
    pub fn first(self) -> Result<Option<Device>> {
        self.iter()?.next().transpose()
    }

    /// Every matching device, in enumeration order
    pub fn all(self) -> Result<Vec<Device>> {
        self.iter()?.collect()
    }
}

impl fmt::Debug for Finder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Finder")
            .field("backend", &self.backend.as_ref().map(|b| b.name()))
            .field("order", &self.order)
            .field("filters", &self.filters)
            .field("custom_match", &self.custom_match.is_some())
            .finish()
    }
}

/// Lazy sequence of matching devices; see [`Finder::iter`]
pub struct Matches {
    backend: Arc<dyn Backend>,
    ids: std::vec::IntoIter<DeviceId>,
    filters: Vec<(DeviceField, u32)>,
    custom_match: Option<MatchFn>,
    default_timeout: Option<u32>,
}

fn accepts(
    filters: &[(DeviceField, u32)],
    custom_match: Option<&MatchFn>,
    device: &Device,
) -> bool {
    let descriptor = device.descriptor();
    filters
        .iter()
        .all(|(field, value)| field.value(descriptor) == Some(*value))
        && custom_match.is_none_or(|f| f(device))
}

impl Iterator for Matches {
    type Item = Result<Device>;

    fn next(&mut self) -> Option<Self::Item> {
        for id in self.ids.by_ref() {
            let device = match Device::new(Arc::clone(&self.backend), id) {
                Ok(device) => device,
                Err(e) => return Some(Err(e)),
            };
            if !accepts(&self.filters, self.custom_match.as_ref(), &device) {
                continue;
            }
            if let Some(timeout) = self.default_timeout {
                if let Err(e) = device.set_default_timeout(timeout as i64) {
                    return Some(Err(e));
                }
            }
            return Some(Ok(device));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::loopback::{LoopbackBackend, LoopbackDevice};

    #[test]
    fn test_field_values() {
        let d = DeviceDescriptor {
            vendor_id: 0x04d8,
            bus: None,
            ..Default::default()
        };
        assert_eq!(DeviceField::VendorId.value(&d), Some(0x04d8));
        assert_eq!(DeviceField::Bus.value(&d), None);
    }

    #[test]
    fn test_unknown_bus_never_matches() {
        let mut dev = LoopbackDevice::bulk_loopback(1, 2);
        dev.descriptor.bus = None;
        let backend = Arc::new(LoopbackBackend::new(vec![dev]));
        let found = find().backend(backend).bus(1).first().unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_first_is_lazy() {
        let backend = Arc::new(LoopbackBackend::new(vec![
            LoopbackDevice::bulk_loopback(1, 1),
            LoopbackDevice::bulk_loopback(1, 2),
            LoopbackDevice::bulk_loopback(1, 3),
        ]));
        let dev = find().backend(backend.clone()).vendor_id(1).first().unwrap();
        assert_eq!(dev.unwrap().product_id(), 1);
        assert_eq!(backend.calls("get_device_descriptor"), 1);
    }
}
