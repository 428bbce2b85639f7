//! USB descriptor and control-request type definitions
//!
//! This module defines the plain descriptor values a backend reports for a
//! device, and the small enums that name the bit fields of endpoint
//! addresses, endpoint attributes and control request types.
//!
//! Field names follow the USB specification with the Hungarian prefix
//! dropped (`bConfigurationValue` becomes `configuration_value`,
//! `idVendor` becomes `vendor_id`, and so on).

use crate::error::ProtocolError;
use crate::util::{
    CONFIG_ATTR_REMOTE_WAKEUP, CONFIG_ATTR_SELF_POWERED, DESC_TYPE_CONFIG, DESC_TYPE_DEVICE,
    DESC_TYPE_ENDPOINT, DESC_TYPE_INTERFACE, MAX_POWER_UNITS_USB_SUPERSPEED, MAX_POWER_UNITS_USB2,
    endpoint_direction, endpoint_type,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Transfer direction
///
/// Encoded in bit 7 of an endpoint address and of `bmRequestType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Direction {
    /// Host to device
    Out = 0x00,
    /// Device to host
    In = 0x80,
}

impl Direction {
    pub fn is_in(self) -> bool {
        self == Direction::In
    }
}

/// Endpoint transfer type, bits 0..1 of `bmAttributes`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransferType {
    Control = 0,
    Isochronous = 1,
    Bulk = 2,
    Interrupt = 3,
}

impl TryFrom<u8> for TransferType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TransferType::Control),
            1 => Ok(TransferType::Isochronous),
            2 => Ok(TransferType::Bulk),
            3 => Ok(TransferType::Interrupt),
            other => Err(ProtocolError::InvalidValue {
                field: "transfer type",
                value: other,
            }),
        }
    }
}

impl fmt::Display for TransferType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(crate::lookup::transfer_type_name(*self as u8))
    }
}

/// Control request type, bits 5..6 of `bmRequestType`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RequestType {
    Standard = 0,
    Class = 1,
    Vendor = 2,
    Reserved = 3,
}

impl TryFrom<u8> for RequestType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RequestType::Standard),
            1 => Ok(RequestType::Class),
            2 => Ok(RequestType::Vendor),
            3 => Ok(RequestType::Reserved),
            other => Err(ProtocolError::InvalidValue {
                field: "request type",
                value: other,
            }),
        }
    }
}

/// Control request recipient, bits 0..1 of `bmRequestType`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Recipient {
    Device = 0,
    Interface = 1,
    Endpoint = 2,
    Other = 3,
}

impl TryFrom<u8> for Recipient {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Recipient::Device),
            1 => Ok(Recipient::Interface),
            2 => Ok(Recipient::Endpoint),
            3 => Ok(Recipient::Other),
            other => Err(ProtocolError::InvalidValue {
                field: "recipient",
                value: other,
            }),
        }
    }
}

/// Standard device descriptor
///
/// `bus`, `address` and `port_number` are not part of the USB descriptor;
/// backends that know the device topology fill them in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    /// `bcdUSB`
    pub usb_version: u16,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    /// `bMaxPacketSize0`
    pub max_packet_size_0: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    /// `bcdDevice`
    pub device_version: u16,
    pub manufacturer_index: u8,
    pub product_index: u8,
    pub serial_number_index: u8,
    pub num_configurations: u8,
    #[serde(default)]
    pub bus: Option<u8>,
    #[serde(default)]
    pub address: Option<u8>,
    #[serde(default)]
    pub port_number: Option<u8>,
}

impl Default for DeviceDescriptor {
    fn default() -> Self {
        Self {
            length: 18,
            descriptor_type: DESC_TYPE_DEVICE,
            usb_version: 0x0200,
            device_class: 0,
            device_subclass: 0,
            device_protocol: 0,
            max_packet_size_0: 64,
            vendor_id: 0,
            product_id: 0,
            device_version: 0x0100,
            manufacturer_index: 0,
            product_index: 0,
            serial_number_index: 0,
            num_configurations: 0,
            bus: None,
            address: None,
            port_number: None,
        }
    }
}

impl DeviceDescriptor {
    /// True for SuperSpeed devices (`bcdUSB` >= 3.0)
    pub fn is_superspeed(&self) -> bool {
        self.usb_version >= 0x0300
    }
}

/// Standard configuration descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub total_length: u16,
    pub num_interfaces: u8,
    /// `bConfigurationValue`, the protocol identity of the configuration
    pub configuration_value: u8,
    /// `iConfiguration`
    pub string_index: u8,
    /// `bmAttributes`
    pub attributes: u8,
    /// `bMaxPower`, in units of 2 mA (USB 2.0) or 8 mA (SuperSpeed)
    pub max_power: u8,
}

impl Default for ConfigurationDescriptor {
    fn default() -> Self {
        Self {
            length: 9,
            descriptor_type: DESC_TYPE_CONFIG,
            total_length: 0,
            num_interfaces: 0,
            configuration_value: 1,
            string_index: 0,
            attributes: 0x80,
            max_power: 50,
        }
    }
}

impl ConfigurationDescriptor {
    pub fn self_powered(&self) -> bool {
        self.attributes & CONFIG_ATTR_SELF_POWERED != 0
    }

    pub fn remote_wakeup(&self) -> bool {
        self.attributes & CONFIG_ATTR_REMOTE_WAKEUP != 0
    }

    /// Maximum power draw in milliamperes
    pub fn max_power_ma(&self, superspeed: bool) -> u16 {
        let unit = if superspeed {
            MAX_POWER_UNITS_USB_SUPERSPEED
        } else {
            MAX_POWER_UNITS_USB2
        };
        self.max_power as u16 * unit
    }
}

/// Standard interface descriptor (one alternate setting of an interface)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    /// `bInterfaceNumber`, stable across alternate settings
    pub interface_number: u8,
    /// `bAlternateSetting`
    pub alternate_setting: u8,
    pub num_endpoints: u8,
    pub interface_class: u8,
    pub interface_subclass: u8,
    pub interface_protocol: u8,
    /// `iInterface`
    pub string_index: u8,
}

impl Default for InterfaceDescriptor {
    fn default() -> Self {
        Self {
            length: 9,
            descriptor_type: DESC_TYPE_INTERFACE,
            interface_number: 0,
            alternate_setting: 0,
            num_endpoints: 0,
            interface_class: 0,
            interface_subclass: 0,
            interface_protocol: 0,
            string_index: 0,
        }
    }
}

/// Standard endpoint descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    /// `bEndpointAddress`: direction in bit 7, number in bits 0..3
    pub endpoint_address: u8,
    /// `bmAttributes`: transfer type in bits 0..1
    pub attributes: u8,
    pub max_packet_size: u16,
    pub interval: u8,
    /// `bRefresh`, audio class endpoints only
    #[serde(default)]
    pub refresh: u8,
    /// `bSynchAddress`, audio class endpoints only
    #[serde(default)]
    pub synch_address: u8,
}

impl Default for EndpointDescriptor {
    fn default() -> Self {
        Self {
            length: 7,
            descriptor_type: DESC_TYPE_ENDPOINT,
            endpoint_address: 0,
            attributes: TransferType::Bulk as u8,
            max_packet_size: 64,
            interval: 0,
            refresh: 0,
            synch_address: 0,
        }
    }
}

impl EndpointDescriptor {
    pub fn transfer_type(&self) -> TransferType {
        endpoint_type(self.attributes)
    }

    pub fn direction(&self) -> Direction {
        endpoint_direction(self.endpoint_address)
    }

    /// Endpoint number without the direction bit
    pub fn number(&self) -> u8 {
        crate::util::endpoint_address(self.endpoint_address)
    }
}
