//! Bit-layout helpers and standard USB constants
//!
//! Endpoint direction lives in bit 7 of `bEndpointAddress`, the transfer
//! type in bits 0..1 of an endpoint's `bmAttributes`. A control setup
//! packet's `bmRequestType` packs direction (bit 7), type (bits 5..6) and
//! recipient (bits 0..1).

use crate::types::{Direction, Recipient, RequestType, TransferType};

// Descriptor types
pub const DESC_TYPE_DEVICE: u8 = 0x01;
pub const DESC_TYPE_CONFIG: u8 = 0x02;
pub const DESC_TYPE_STRING: u8 = 0x03;
pub const DESC_TYPE_INTERFACE: u8 = 0x04;
pub const DESC_TYPE_ENDPOINT: u8 = 0x05;

// Standard requests
pub const REQ_GET_STATUS: u8 = 0x00;
pub const REQ_CLEAR_FEATURE: u8 = 0x01;
pub const REQ_SET_FEATURE: u8 = 0x03;
pub const REQ_SET_ADDRESS: u8 = 0x05;
pub const REQ_GET_DESCRIPTOR: u8 = 0x06;
pub const REQ_SET_DESCRIPTOR: u8 = 0x07;
pub const REQ_GET_CONFIGURATION: u8 = 0x08;
pub const REQ_SET_CONFIGURATION: u8 = 0x09;
pub const REQ_GET_INTERFACE: u8 = 0x0A;
pub const REQ_SET_INTERFACE: u8 = 0x0B;
pub const REQ_SYNCH_FRAME: u8 = 0x0C;

// Feature selectors
pub const ENDPOINT_HALT: u16 = 0;
pub const FUNCTION_SUSPEND: u16 = 0;
pub const DEVICE_REMOTE_WAKEUP: u16 = 1;
pub const U1_ENABLE: u16 = 48;
pub const U2_ENABLE: u16 = 49;
pub const LTM_ENABLE: u16 = 50;

// bMaxPower units in mA
pub const MAX_POWER_UNITS_USB2: u16 = 2;
pub const MAX_POWER_UNITS_USB_SUPERSPEED: u16 = 8;

pub const CONFIG_ATTR_SELF_POWERED: u8 = 0x40;
pub const CONFIG_ATTR_REMOTE_WAKEUP: u8 = 0x20;

const ENDPOINT_ADDR_MASK: u8 = 0x0F;
const ENDPOINT_DIR_MASK: u8 = 0x80;
const ENDPOINT_TYPE_MASK: u8 = 0x03;
const CTRL_DIR_MASK: u8 = 0x80;
const CTRL_TYPE_MASK: u8 = 0x60;
const CTRL_RECIPIENT_MASK: u8 = 0x03;

/// Endpoint number, with the direction bit stripped
pub fn endpoint_address(address: u8) -> u8 {
    address & ENDPOINT_ADDR_MASK
}

/// Direction encoded in an endpoint address
pub fn endpoint_direction(address: u8) -> Direction {
    if address & ENDPOINT_DIR_MASK != 0 {
        Direction::In
    } else {
        Direction::Out
    }
}

/// Transfer type encoded in an endpoint's `bmAttributes`
pub fn endpoint_type(attributes: u8) -> TransferType {
    match attributes & ENDPOINT_TYPE_MASK {
        0 => TransferType::Control,
        1 => TransferType::Isochronous,
        2 => TransferType::Bulk,
        _ => TransferType::Interrupt,
    }
}

/// Data stage direction of a control request
pub fn ctrl_direction(request_type: u8) -> Direction {
    if request_type & CTRL_DIR_MASK != 0 {
        Direction::In
    } else {
        Direction::Out
    }
}

/// Request type (standard, class, vendor) of a control request
pub fn ctrl_type(request_type: u8) -> RequestType {
    match (request_type & CTRL_TYPE_MASK) >> 5 {
        0 => RequestType::Standard,
        1 => RequestType::Class,
        2 => RequestType::Vendor,
        _ => RequestType::Reserved,
    }
}

/// Recipient of a control request
pub fn ctrl_recipient(request_type: u8) -> Recipient {
    match request_type & CTRL_RECIPIENT_MASK {
        0 => Recipient::Device,
        1 => Recipient::Interface,
        2 => Recipient::Endpoint,
        _ => Recipient::Other,
    }
}

/// Build a `bmRequestType` value
///
/// # Example
///
/// ```
/// use protocol::{Direction, Recipient, RequestType, build_request_type};
///
/// let bm = build_request_type(Direction::In, RequestType::Vendor, Recipient::Device);
/// assert_eq!(bm, 0xC0);
/// ```
pub fn build_request_type(direction: Direction, kind: RequestType, recipient: Recipient) -> u8 {
    (recipient as u8) | ((kind as u8) << 5) | (direction as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_endpoint_helpers() {
        assert_eq!(endpoint_address(0x81), 1);
        assert_eq!(endpoint_direction(0x81), Direction::In);
        assert_eq!(endpoint_direction(0x02), Direction::Out);
        assert_eq!(endpoint_type(0x02), TransferType::Bulk);
        assert_eq!(endpoint_type(0x0D), TransferType::Isochronous);
    }

    #[test]
    fn test_build_request_type() {
        assert_eq!(
            build_request_type(Direction::Out, RequestType::Vendor, Recipient::Device),
            0x40
        );
        assert_eq!(
            build_request_type(Direction::In, RequestType::Standard, Recipient::Interface),
            0x81
        );
        assert_eq!(
            build_request_type(Direction::Out, RequestType::Class, Recipient::Endpoint),
            0x22
        );
    }

    #[test]
    fn test_ctrl_direction() {
        assert_eq!(ctrl_direction(0xC0), Direction::In);
        assert_eq!(ctrl_direction(0x40), Direction::Out);
    }

    proptest! {
        #[test]
        fn prop_request_type_fields_recover(bm in any::<u8>()) {
            // Bits 2..4 are reserved and dropped by the rebuild
            let rebuilt = build_request_type(ctrl_direction(bm), ctrl_type(bm), ctrl_recipient(bm));
            prop_assert_eq!(rebuilt, bm & 0xE3);
        }

        #[test]
        fn prop_endpoint_number_fits_nibble(addr in any::<u8>()) {
            prop_assert!(endpoint_address(addr) <= 0x0F);
            prop_assert_eq!(endpoint_direction(addr).is_in(), addr >= 0x80);
        }

        #[test]
        fn prop_endpoint_type_ignores_upper_bits(attr in any::<u8>()) {
            prop_assert_eq!(endpoint_type(attr), endpoint_type(attr & 0x03));
        }
    }
}
