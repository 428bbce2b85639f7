//! Standard request and utility helper tests
//!
//! Run with: `cargo test -p host --test control_tests`

use common::test_utils::{
    create_mock_bulk_endpoint, create_mock_config_descriptor, create_mock_device_descriptor,
    create_mock_interface_descriptor,
};
use host::backend::loopback::{LoopbackBackend, LoopbackConfiguration, LoopbackDevice};
use host::control::{self, Target};
use host::util;
use host::{Device, DeviceId, TransportErrorKind, UsbError};
use protocol::TransferType;
use protocol::util::{DESC_TYPE_STRING, ENDPOINT_HALT};
use std::sync::Arc;

fn bulk_device() -> (Arc<LoopbackBackend>, Device) {
    let backend = Arc::new(LoopbackBackend::new(vec![LoopbackDevice::bulk_loopback(
        0x04d8, 0xfa2e,
    )]));
    let dev = Device::new(backend.clone(), DeviceId(0)).unwrap();
    (backend, dev)
}

fn two_interface_device() -> (Arc<LoopbackBackend>, Device) {
    let spec = LoopbackDevice::new(create_mock_device_descriptor(0x1234, 0x0020))
        .with_configuration(
            LoopbackConfiguration::new(create_mock_config_descriptor(1, 2))
                .with_interface(
                    create_mock_interface_descriptor(0, 0, 1),
                    vec![create_mock_bulk_endpoint(0x81)],
                )
                .with_interface(create_mock_interface_descriptor(1, 0, 0), vec![])
                .with_interface(
                    create_mock_interface_descriptor(1, 1, 1),
                    vec![create_mock_bulk_endpoint(0x02)],
                ),
        )
        .with_strings(["Maker"]);
    let backend = Arc::new(LoopbackBackend::new(vec![spec]));
    let dev = Device::new(backend.clone(), DeviceId(0)).unwrap();
    (backend, dev)
}

// ============================================================================
// Standard Request Tests
// ============================================================================

mod standard_requests {
    use super::*;

    #[test]
    fn test_halt_set_and_clear() {
        let (backend, dev) = bulk_device();
        let ep = Target::Endpoint(0x81);

        assert_eq!(control::get_status(&dev, ep).unwrap(), 0);

        control::set_feature(&dev, ENDPOINT_HALT, ep).unwrap();
        assert!(backend.is_halted(DeviceId(0), 0x81));
        assert_eq!(control::get_status(&dev, ep).unwrap(), 1);

        control::clear_feature(&dev, ENDPOINT_HALT, ep).unwrap();
        assert!(!backend.is_halted(DeviceId(0), 0x81));
        assert_eq!(backend.calls("clear_halt"), 1);
    }

    #[test]
    fn test_halted_endpoint_stalls() {
        let (_backend, dev) = bulk_device();
        dev.write(0x01, b"x", None, None).unwrap();
        control::set_feature(&dev, ENDPOINT_HALT, Target::Endpoint(0x81)).unwrap();

        let err = dev.read(0x81, 1, None, None).unwrap_err();
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::Pipe));

        dev.clear_halt(0x81).unwrap();
        assert_eq!(dev.read(0x81, 1, None, None).unwrap(), b"x");
    }

    #[test]
    fn test_device_status() {
        let (_backend, dev) = bulk_device();
        assert_eq!(control::get_status(&dev, Target::Device).unwrap(), 0);
    }

    #[test]
    fn test_get_configuration_asks_device() {
        let (backend, dev) = bulk_device();
        assert_eq!(control::get_configuration(&dev).unwrap(), 1);
        assert_eq!(control::get_configuration(&dev).unwrap(), 1);
        assert_eq!(backend.calls("ctrl_transfer"), 2);
    }

    #[test]
    fn test_set_configuration_delegates() {
        let (backend, dev) = bulk_device();
        control::set_configuration(&dev, 0).unwrap();
        assert_eq!(backend.active_configuration(DeviceId(0)), Some(0));
        assert_eq!(control::get_configuration(&dev).unwrap(), 0);

        assert_eq!(
            control::set_configuration(&dev, 5).unwrap_err(),
            UsbError::InvalidConfiguration(5)
        );
    }

    #[test]
    fn test_interface_requests() {
        let (_backend, dev) = two_interface_device();
        assert_eq!(control::get_interface(&dev, 1).unwrap(), 0);

        control::set_interface(&dev, 1, 1).unwrap();
        assert_eq!(control::get_interface(&dev, 1).unwrap(), 1);
        assert_eq!(dev.write(0x02, b"ok", Some(1), None).unwrap(), 2);
    }

    #[test]
    fn test_get_string_descriptor_raw() {
        let (_backend, dev) = two_interface_device();
        let raw = control::get_descriptor(&dev, 255, DESC_TYPE_STRING, 1, 0x0409).unwrap();
        assert_eq!(raw[0] as usize, raw.len());
        assert_eq!(raw[1], DESC_TYPE_STRING);
        assert_eq!(&raw[2..4], &[b'M', 0]);
    }

    #[test]
    fn test_unanswered_descriptor_stalls() {
        let (_backend, dev) = bulk_device();
        // Only string descriptors are served over control
        let err = control::get_descriptor(&dev, 18, 0x01, 0, 0).unwrap_err();
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::Pipe));
        assert!(control::set_descriptor(&dev, &[4, 3, 0, 0], DESC_TYPE_STRING, 1, 0).is_err());
    }

    #[test]
    fn test_transport_error_propagates() {
        let (backend, dev) = bulk_device();
        backend.fail_on("ctrl_transfer", TransportErrorKind::Overflow);
        let err = control::get_status(&dev, Target::Device).unwrap_err();
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::Overflow));
    }
}

// ============================================================================
// Utility Tests
// ============================================================================

mod utilities {
    use super::*;

    #[test]
    fn test_find_descriptor_in_tree() {
        let (_backend, dev) = two_interface_device();
        let cfg = util::find_descriptor(dev.configurations(), |c| c.value() == 1)
            .unwrap()
            .unwrap();

        let alt = util::find_descriptor(cfg.interfaces(), |i| {
            i.number() == 1 && i.alternate_setting() == 1
        })
        .unwrap()
        .unwrap();
        assert_eq!(alt.index(), 1);
        assert_eq!(alt.alternate_index(), 1);

        let missing = util::find_descriptor(cfg.interfaces(), |i| i.number() == 9).unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_find_all_descriptors() {
        let (_backend, dev) = two_interface_device();
        let cfg = dev.configuration(0).unwrap();
        let alternates = util::find_all_descriptors(cfg.interfaces(), |i| i.number() == 1).unwrap();
        assert_eq!(alternates.len(), 2);

        let intf = cfg.interface(0, 0).unwrap();
        let bulk = util::find_all_descriptors(intf.endpoints(), |e| {
            e.transfer_type() == TransferType::Bulk
        })
        .unwrap();
        assert_eq!(bulk.len(), 1);
    }

    #[test]
    fn test_claim_release_helpers() {
        let (backend, dev) = two_interface_device();
        util::claim_interface(&dev, 1).unwrap();
        assert_eq!(backend.claimed_interfaces(DeviceId(0)), vec![1]);
        util::release_interface(&dev, 1).unwrap();
        assert!(backend.claimed_interfaces(DeviceId(0)).is_empty());
    }

    #[test]
    fn test_dispose_resources() {
        let (backend, dev) = two_interface_device();
        util::claim_interface(&dev, 0).unwrap();
        util::dispose_resources(&dev).unwrap();
        assert_eq!(backend.open_handles(), 0);

        // Resources come back on demand
        util::claim_interface(&dev, 0).unwrap();
        assert_eq!(backend.open_handles(), 1);
    }

    #[test]
    fn test_get_string() {
        let (_backend, dev) = two_interface_device();
        assert_eq!(util::get_langids(&dev).unwrap(), vec![0x0409]);
        assert_eq!(util::get_string(&dev, 1, None).unwrap().as_deref(), Some("Maker"));
        assert_eq!(
            util::get_string(&dev, 1, Some(0x0409)).unwrap().as_deref(),
            Some("Maker")
        );
        assert_eq!(util::get_string(&dev, 0, None).unwrap(), None);
    }

    #[test]
    fn test_get_string_with_explicit_langid() {
        let (backend, dev) = two_interface_device();
        assert_eq!(
            util::get_string(&dev, 1, Some(0x0409)).unwrap().as_deref(),
            Some("Maker")
        );
        // The LANGID table is only read when no langid is given
        assert_eq!(backend.calls("ctrl_transfer"), 1);

        util::get_string(&dev, 1, None).unwrap();
        assert_eq!(backend.calls("ctrl_transfer"), 3);
    }

    #[test]
    fn test_get_string_without_langids() {
        let spec = LoopbackDevice::bulk_loopback(1, 2)
            .with_strings(["Maker"])
            .with_langid_table(vec![2, DESC_TYPE_STRING]);
        let backend = Arc::new(LoopbackBackend::new(vec![spec]));
        let dev = Device::new(backend, DeviceId(0)).unwrap();

        assert!(util::get_langids(&dev).unwrap().is_empty());
        assert!(matches!(
            util::get_string(&dev, 1, None),
            Err(UsbError::NotSupported(_))
        ));
        // An explicit langid does not depend on the table
        assert_eq!(
            util::get_string(&dev, 1, Some(0x0409)).unwrap().as_deref(),
            Some("Maker")
        );
    }

    #[test]
    fn test_malformed_langid_table() {
        // Configuration descriptor type where a string descriptor belongs
        let spec = LoopbackDevice::bulk_loopback(1, 2).with_langid_table(vec![4, 0x02, 0x09, 0x04]);
        let backend = Arc::new(LoopbackBackend::new(vec![spec]));
        let dev = Device::new(backend, DeviceId(0)).unwrap();

        assert!(matches!(
            util::get_langids(&dev),
            Err(UsbError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_get_string_missing_index() {
        let (_backend, dev) = two_interface_device();
        let err = util::get_string(&dev, 4, None).unwrap_err();
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::Pipe));
    }
}
