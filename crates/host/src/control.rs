//! Standard USB requests
//!
//! Helpers for the chapter 9 requests every device answers, issued through
//! [`Device::ctrl_transfer`] with the device's default timeout.

use crate::device::Device;
use crate::error::{Result, TransportErrorKind, UsbError};
use protocol::util::{
    ENDPOINT_HALT, REQ_CLEAR_FEATURE, REQ_GET_CONFIGURATION, REQ_GET_DESCRIPTOR, REQ_GET_INTERFACE,
    REQ_GET_STATUS, REQ_SET_DESCRIPTOR, REQ_SET_FEATURE,
};
use protocol::{Direction, Recipient, RequestType, build_request_type};

/// What a standard request addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Device,
    /// By `bInterfaceNumber`
    Interface(u8),
    /// By `bEndpointAddress`
    Endpoint(u8),
}

impl Target {
    pub fn recipient(self) -> Recipient {
        match self {
            Target::Device => Recipient::Device,
            Target::Interface(_) => Recipient::Interface,
            Target::Endpoint(_) => Recipient::Endpoint,
        }
    }

    /// `wIndex` of a request sent to this target
    pub fn index(self) -> u16 {
        match self {
            Target::Device => 0,
            Target::Interface(number) => number as u16,
            Target::Endpoint(address) => address as u16,
        }
    }
}

fn standard(direction: Direction, recipient: Recipient) -> u8 {
    build_request_type(direction, RequestType::Standard, recipient)
}

/// Read exactly `length` bytes of a standard IN request
fn read_exact(
    dev: &Device,
    recipient: Recipient,
    request: u8,
    value: u16,
    index: u16,
    length: usize,
) -> Result<Vec<u8>> {
    let data = dev
        .ctrl_transfer(
            standard(Direction::In, recipient),
            request,
            value,
            index,
            length,
            None,
        )?
        .into_data()?;
    if data.len() < length {
        return Err(UsbError::transport(TransportErrorKind::ShortReply, None));
    }
    Ok(data)
}

/// GET_STATUS: the 16-bit status word of `target`
pub fn get_status(dev: &Device, target: Target) -> Result<u16> {
    let data = read_exact(
        dev,
        target.recipient(),
        REQ_GET_STATUS,
        0,
        target.index(),
        2,
    )?;
    Ok(u16::from_le_bytes([data[0], data[1]]))
}

/// CLEAR_FEATURE
///
/// Clearing `ENDPOINT_HALT` on an endpoint goes through the backend's
/// clear-halt operation, which also resets the host side data toggle.
pub fn clear_feature(dev: &Device, feature: u16, target: Target) -> Result<()> {
    if let (ENDPOINT_HALT, Target::Endpoint(address)) = (feature, target) {
        return dev.clear_halt(address);
    }
    dev.ctrl_transfer(
        standard(Direction::Out, target.recipient()),
        REQ_CLEAR_FEATURE,
        feature,
        target.index(),
        (),
        None,
    )?;
    Ok(())
}

/// SET_FEATURE
pub fn set_feature(dev: &Device, feature: u16, target: Target) -> Result<()> {
    dev.ctrl_transfer(
        standard(Direction::Out, target.recipient()),
        REQ_SET_FEATURE,
        feature,
        target.index(),
        (),
        None,
    )?;
    Ok(())
}

/// GET_DESCRIPTOR: up to `size` bytes of descriptor `desc_type`/`desc_index`
///
/// `w_index` is the LANGID for string descriptors and 0 otherwise.
pub fn get_descriptor(
    dev: &Device,
    size: usize,
    desc_type: u8,
    desc_index: u8,
    w_index: u16,
) -> Result<Vec<u8>> {
    dev.ctrl_transfer(
        standard(Direction::In, Recipient::Device),
        REQ_GET_DESCRIPTOR,
        desc_index as u16 | ((desc_type as u16) << 8),
        w_index,
        size,
        None,
    )?
    .into_data()
}

/// SET_DESCRIPTOR
pub fn set_descriptor(
    dev: &Device,
    desc: &[u8],
    desc_type: u8,
    desc_index: u8,
    w_index: u16,
) -> Result<()> {
    dev.ctrl_transfer(
        standard(Direction::Out, Recipient::Device),
        REQ_SET_DESCRIPTOR,
        desc_index as u16 | ((desc_type as u16) << 8),
        w_index,
        desc,
        None,
    )?;
    Ok(())
}

/// GET_CONFIGURATION, always asked of the device
pub fn get_configuration(dev: &Device) -> Result<u8> {
    let data = read_exact(dev, Recipient::Device, REQ_GET_CONFIGURATION, 0, 0, 1)?;
    Ok(data[0])
}

/// SET_CONFIGURATION, tracked like [`Device::set_configuration`]
pub fn set_configuration(dev: &Device, value: u8) -> Result<()> {
    dev.set_configuration(Some(value))
}

/// GET_INTERFACE: the alternate setting the device reports for an interface
pub fn get_interface(dev: &Device, interface: u8) -> Result<u8> {
    let data = read_exact(
        dev,
        Recipient::Interface,
        REQ_GET_INTERFACE,
        0,
        interface as u16,
        1,
    )?;
    Ok(data[0])
}

/// SET_INTERFACE, tracked like [`Device::set_interface_altsetting`]
pub fn set_interface(dev: &Device, interface: u8, alternate: u8) -> Result<()> {
    dev.set_interface_altsetting(Some(interface), Some(alternate))
}
