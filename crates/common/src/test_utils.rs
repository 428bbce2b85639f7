//! Descriptor fixtures for tests
//!
//! Builders for the descriptor values a backend reports, so tests across
//! crates describe devices the same way.
//!
//! # Example
//!
//! ```
//! use common::test_utils::create_mock_device_descriptor;
//!
//! let desc = create_mock_device_descriptor(0x04d8, 0xfa2e);
//! assert_eq!(desc.vendor_id, 0x04d8);
//! assert_eq!(desc.num_configurations, 1);
//! ```

use protocol::{
    ConfigurationDescriptor, DeviceDescriptor, EndpointDescriptor, InterfaceDescriptor,
    TransferType,
};
use std::sync::atomic::{AtomicU8, Ordering};

static NEXT_ADDRESS: AtomicU8 = AtomicU8::new(1);

/// Hand out a device address in 1..=127, wrapping around
pub fn next_test_address() -> u8 {
    (NEXT_ADDRESS.fetch_add(1, Ordering::Relaxed) % 127) + 1
}

/// Create a device descriptor with one configuration on bus 1
pub fn create_mock_device_descriptor(vendor_id: u16, product_id: u16) -> DeviceDescriptor {
    DeviceDescriptor {
        vendor_id,
        product_id,
        num_configurations: 1,
        manufacturer_index: 1,
        product_index: 2,
        serial_number_index: 3,
        bus: Some(1),
        address: Some(next_test_address()),
        port_number: Some(1),
        ..Default::default()
    }
}

/// Create a device descriptor with a specific device class
pub fn create_mock_device_descriptor_with_class(
    vendor_id: u16,
    product_id: u16,
    class: u8,
    subclass: u8,
    protocol: u8,
) -> DeviceDescriptor {
    DeviceDescriptor {
        device_class: class,
        device_subclass: subclass,
        device_protocol: protocol,
        ..create_mock_device_descriptor(vendor_id, product_id)
    }
}

/// Create a bus-powered configuration descriptor
pub fn create_mock_config_descriptor(value: u8, num_interfaces: u8) -> ConfigurationDescriptor {
    ConfigurationDescriptor {
        configuration_value: value,
        num_interfaces,
        total_length: 9 + num_interfaces as u16 * 9,
        ..Default::default()
    }
}

/// Create a vendor-specific interface descriptor
pub fn create_mock_interface_descriptor(
    number: u8,
    alternate: u8,
    num_endpoints: u8,
) -> InterfaceDescriptor {
    InterfaceDescriptor {
        interface_number: number,
        alternate_setting: alternate,
        num_endpoints,
        interface_class: 0xFF,
        ..Default::default()
    }
}

fn endpoint(
    address: u8,
    transfer_type: TransferType,
    max_packet: u16,
    interval: u8,
) -> EndpointDescriptor {
    EndpointDescriptor {
        endpoint_address: address,
        attributes: transfer_type as u8,
        max_packet_size: max_packet,
        interval,
        ..Default::default()
    }
}

/// Create a full-speed bulk endpoint (64 byte packets)
pub fn create_mock_bulk_endpoint(address: u8) -> EndpointDescriptor {
    endpoint(address, TransferType::Bulk, 64, 0)
}

/// Create an interrupt endpoint polled every `interval` frames
pub fn create_mock_interrupt_endpoint(address: u8, interval: u8) -> EndpointDescriptor {
    endpoint(address, TransferType::Interrupt, 8, interval)
}

/// Create an isochronous endpoint
pub fn create_mock_iso_endpoint(address: u8) -> EndpointDescriptor {
    endpoint(address, TransferType::Isochronous, 1023, 1)
}

/// Create a recognizable payload of `size` bytes (0, 1, 2, ... wrapping)
pub fn create_mock_bulk_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 256) as u8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::Direction;

    #[test]
    fn test_create_mock_device_descriptor() {
        let desc = create_mock_device_descriptor(0x1234, 0x5678);
        assert_eq!(desc.vendor_id, 0x1234);
        assert_eq!(desc.product_id, 0x5678);
        assert_eq!(desc.bus, Some(1));
        let addr = desc.address.unwrap();
        assert!((1..=127).contains(&addr));
    }

    #[test]
    fn test_create_mock_device_descriptor_with_class() {
        let desc = create_mock_device_descriptor_with_class(0x1, 0x2, 0x09, 0, 1);
        assert_eq!(desc.device_class, 0x09);
        assert_eq!(desc.device_protocol, 1);
    }

    #[test]
    fn test_create_mock_endpoints() {
        let ep = create_mock_bulk_endpoint(0x81);
        assert_eq!(ep.transfer_type(), TransferType::Bulk);
        assert_eq!(ep.direction(), Direction::In);

        let ep = create_mock_interrupt_endpoint(0x82, 10);
        assert_eq!(ep.transfer_type(), TransferType::Interrupt);
        assert_eq!(ep.interval, 10);

        assert_eq!(
            create_mock_iso_endpoint(0x03).transfer_type(),
            TransferType::Isochronous
        );
    }

    #[test]
    fn test_create_mock_bulk_data() {
        let data = create_mock_bulk_data(300);
        assert_eq!(data.len(), 300);
        assert_eq!(data[0], 0);
        assert_eq!(data[255], 255);
        assert_eq!(data[256], 0);
    }
}
