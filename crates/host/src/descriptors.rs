//! Descriptor views
//!
//! [`Configuration`], [`Interface`] and [`Endpoint`] are built on demand by
//! querying the backend, addressed by logical index. Each borrows the
//! [`Device`] it came from, so it can issue transfers or re-resolve state,
//! but never owns it.

use crate::backend::{Backend, DeviceId, Payload};
use crate::device::Device;
use crate::error::{DescriptorKind, Result, UsbError};
use crate::resources::InterfaceTarget;
use protocol::lookup::{interface_class_name, transfer_type_name};
use protocol::{
    ConfigurationDescriptor, Direction, EndpointDescriptor, InterfaceDescriptor, TransferType,
};
use std::fmt;

/// Position of one alternate setting in the descriptor tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct InterfaceRef {
    /// Logical configuration index
    pub config: u8,
    /// Logical interface index
    pub index: u8,
    /// Logical alternate-setting index
    pub alt_index: u8,
    pub descriptor: InterfaceDescriptor,
}

/// Walks every (interface, alternate) pair of one configuration
///
/// The number of alternates per interface is not declared anywhere, so
/// alternates are probed until the backend reports the index out of range.
pub(crate) struct InterfaceWalk<'b> {
    backend: &'b dyn Backend,
    dev: DeviceId,
    config: u8,
    num_interfaces: u8,
    intf: u8,
    alt: u8,
    done: bool,
}

impl<'b> InterfaceWalk<'b> {
    pub fn new(backend: &'b dyn Backend, dev: DeviceId, config: u8, num_interfaces: u8) -> Self {
        Self {
            backend,
            dev,
            config,
            num_interfaces,
            intf: 0,
            alt: 0,
            done: false,
        }
    }

    fn next_interface(&mut self) {
        self.intf = self.intf.saturating_add(1);
        self.alt = 0;
        if self.intf == u8::MAX {
            self.done = true;
        }
    }
}

impl Iterator for InterfaceWalk<'_> {
    type Item = Result<InterfaceRef>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done || self.intf >= self.num_interfaces {
                return None;
            }
            match self
                .backend
                .get_interface_descriptor(self.dev, self.intf, self.alt, self.config)
            {
                Ok(descriptor) => {
                    let found = InterfaceRef {
                        config: self.config,
                        index: self.intf,
                        alt_index: self.alt,
                        descriptor,
                    };
                    match self.alt.checked_add(1) {
                        Some(alt) => self.alt = alt,
                        None => self.next_interface(),
                    }
                    return Some(Ok(found));
                }
                Err(UsbError::InvalidDescriptorIndex { .. }) if self.alt > 0 => {
                    self.next_interface();
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// One configuration of a device
#[derive(Debug, Clone)]
pub struct Configuration<'a> {
    device: &'a Device,
    index: u8,
    descriptor: ConfigurationDescriptor,
}

impl<'a> Configuration<'a> {
    pub(crate) fn new(device: &'a Device, index: u8, descriptor: ConfigurationDescriptor) -> Self {
        Self {
            device,
            index,
            descriptor,
        }
    }

    /// Logical index among the device's configurations
    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn descriptor(&self) -> &ConfigurationDescriptor {
        &self.descriptor
    }

    /// `bConfigurationValue`
    pub fn value(&self) -> u8 {
        self.descriptor.configuration_value
    }

    pub fn num_interfaces(&self) -> u8 {
        self.descriptor.num_interfaces
    }

    pub fn device(&self) -> &'a Device {
        self.device
    }

    /// Make this the device's active configuration
    pub fn set(&self) -> Result<()> {
        self.device.set_configuration(Some(self.value()))
    }

    /// Every interface and alternate setting, in descriptor order
    pub fn interfaces(&self) -> InterfaceIter<'a> {
        InterfaceIter {
            device: self.device,
            walk: InterfaceWalk::new(
                self.device.backend().as_ref(),
                self.device.id(),
                self.index,
                self.descriptor.num_interfaces,
            ),
        }
    }

    /// Interface by logical interface and alternate-setting index
    pub fn interface(&self, index: u8, alternate: u8) -> Result<Interface<'a>> {
        if index >= self.descriptor.num_interfaces {
            return Err(UsbError::InvalidDescriptorIndex {
                descriptor: DescriptorKind::Interface,
                index,
            });
        }
        let descriptor = self.device.backend().get_interface_descriptor(
            self.device.id(),
            index,
            alternate,
            self.index,
        )?;
        Ok(Interface::new(
            self.device,
            InterfaceRef {
                config: self.index,
                index,
                alt_index: alternate,
                descriptor,
            },
        ))
    }
}

impl fmt::Display for Configuration<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.descriptor;
        let superspeed = self.device.descriptor().is_superspeed();
        write!(
            f,
            "CONFIGURATION {}: {} mA, {} interface(s){}{}",
            d.configuration_value,
            d.max_power_ma(superspeed),
            d.num_interfaces,
            if d.self_powered() { ", self powered" } else { "" },
            if d.remote_wakeup() { ", remote wakeup" } else { "" },
        )
    }
}

/// Iterator over a configuration's interfaces
pub struct InterfaceIter<'a> {
    device: &'a Device,
    walk: InterfaceWalk<'a>,
}

impl<'a> Iterator for InterfaceIter<'a> {
    type Item = Result<Interface<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        let device = self.device;
        self.walk
            .next()
            .map(|found| found.map(|r| Interface::new(device, r)))
    }
}

/// One alternate setting of one interface
#[derive(Debug, Clone)]
pub struct Interface<'a> {
    device: &'a Device,
    location: InterfaceRef,
}

impl<'a> Interface<'a> {
    pub(crate) fn new(device: &'a Device, location: InterfaceRef) -> Self {
        Self { device, location }
    }

    pub fn descriptor(&self) -> &InterfaceDescriptor {
        &self.location.descriptor
    }

    /// `bInterfaceNumber`
    pub fn number(&self) -> u8 {
        self.location.descriptor.interface_number
    }

    /// `bAlternateSetting`
    pub fn alternate_setting(&self) -> u8 {
        self.location.descriptor.alternate_setting
    }

    /// Logical interface index
    pub fn index(&self) -> u8 {
        self.location.index
    }

    /// Logical alternate-setting index
    pub fn alternate_index(&self) -> u8 {
        self.location.alt_index
    }

    pub fn configuration_index(&self) -> u8 {
        self.location.config
    }

    pub fn num_endpoints(&self) -> u8 {
        self.location.descriptor.num_endpoints
    }

    pub fn device(&self) -> &'a Device {
        self.device
    }

    /// Select this alternate setting (claims the interface)
    pub fn set_altsetting(&self) -> Result<()> {
        self.device
            .set_interface_altsetting(Some(self.number()), Some(self.alternate_setting()))
    }

    pub fn endpoints(&self) -> EndpointIter<'a> {
        EndpointIter {
            device: self.device,
            location: self.location.clone(),
            next: 0,
        }
    }

    /// Endpoint by logical index within this alternate setting
    pub fn endpoint(&self, index: u8) -> Result<Endpoint<'a>> {
        load_endpoint(self.device, &self.location, index)
    }
}

fn load_endpoint<'a>(device: &'a Device, location: &InterfaceRef, index: u8) -> Result<Endpoint<'a>> {
    if index >= location.descriptor.num_endpoints {
        return Err(UsbError::InvalidDescriptorIndex {
            descriptor: DescriptorKind::Endpoint,
            index,
        });
    }
    let descriptor = device.backend().get_endpoint_descriptor(
        device.id(),
        index,
        location.index,
        location.alt_index,
        location.config,
    )?;
    Ok(Endpoint {
        device,
        interface: location.clone(),
        index,
        descriptor,
    })
}

impl fmt::Display for Interface<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = self.descriptor();
        write!(
            f,
            "INTERFACE {}, alternate {}: {} ({} endpoint(s))",
            d.interface_number,
            d.alternate_setting,
            interface_class_name(d.interface_class),
            d.num_endpoints,
        )
    }
}

/// Iterator over an interface's endpoints
pub struct EndpointIter<'a> {
    device: &'a Device,
    location: InterfaceRef,
    next: u8,
}

impl<'a> Iterator for EndpointIter<'a> {
    type Item = Result<Endpoint<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.location.descriptor.num_endpoints {
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some(load_endpoint(self.device, &self.location, index))
    }
}

/// One endpoint of an alternate setting
#[derive(Debug, Clone)]
pub struct Endpoint<'a> {
    device: &'a Device,
    interface: InterfaceRef,
    index: u8,
    descriptor: EndpointDescriptor,
}

impl<'a> Endpoint<'a> {
    pub fn descriptor(&self) -> &EndpointDescriptor {
        &self.descriptor
    }

    /// `bEndpointAddress`
    pub fn address(&self) -> u8 {
        self.descriptor.endpoint_address
    }

    pub fn direction(&self) -> Direction {
        self.descriptor.direction()
    }

    pub fn transfer_type(&self) -> TransferType {
        self.descriptor.transfer_type()
    }

    /// Logical index within the alternate setting
    pub fn index(&self) -> u8 {
        self.index
    }

    /// `bInterfaceNumber` of the owning interface
    pub fn interface_number(&self) -> u8 {
        self.interface.descriptor.interface_number
    }

    pub fn device(&self) -> &'a Device {
        self.device
    }

    /// Write to this endpoint, returning the number of bytes written
    pub fn write(&self, data: &[u8], timeout: Option<u32>) -> Result<usize> {
        self.device
            .transfer(
                self.address(),
                Payload::Out(data),
                InterfaceTarget::Resolved(&self.interface),
                timeout,
            )?
            .into_written()
    }

    /// Read up to `length` bytes from this endpoint
    pub fn read(&self, length: usize, timeout: Option<u32>) -> Result<Vec<u8>> {
        self.device
            .transfer(
                self.address(),
                Payload::In(length),
                InterfaceTarget::Resolved(&self.interface),
                timeout,
            )?
            .into_data()
    }

    pub fn clear_halt(&self) -> Result<()> {
        self.device.clear_halt(self.address())
    }
}

impl fmt::Display for Endpoint<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.descriptor;
        write!(
            f,
            "ENDPOINT {:#04x}: {} {}, max packet {}, interval {}",
            d.endpoint_address,
            transfer_type_name(d.attributes),
            if d.direction().is_in() { "IN" } else { "OUT" },
            d.max_packet_size,
            d.interval,
        )
    }
}
