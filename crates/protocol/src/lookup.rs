//! Human readable names for descriptor codes

use crate::util::{
    DESC_TYPE_CONFIG, DESC_TYPE_DEVICE, DESC_TYPE_ENDPOINT, DESC_TYPE_INTERFACE, DESC_TYPE_STRING,
};

pub fn descriptor_type_name(descriptor_type: u8) -> &'static str {
    match descriptor_type {
        DESC_TYPE_DEVICE => "Device",
        DESC_TYPE_CONFIG => "Configuration",
        DESC_TYPE_STRING => "String",
        DESC_TYPE_INTERFACE => "Interface",
        DESC_TYPE_ENDPOINT => "Endpoint",
        0x06 => "Device Qualifier",
        0x07 => "Other Speed Configuration",
        0x08 => "Interface Power",
        0x0B => "Interface Association",
        0x0F => "BOS",
        0x10 => "Device Capability",
        0x21 => "HID",
        0x24 => "Class-specific Interface",
        0x25 => "Class-specific Endpoint",
        0x30 => "SuperSpeed Endpoint Companion",
        _ => "Unknown",
    }
}

/// Device class name (`bDeviceClass`)
///
/// Class 0 at device level means "defined per interface".
pub fn device_class_name(class: u8) -> &'static str {
    match class {
        0x00 => "Specified at interface descriptor",
        0x02 => "Communications and CDC Control",
        0x09 => "Hub",
        0x0F => "Personal Healthcare",
        0x10 => "Audio/Video Devices",
        0x11 => "Billboard Device",
        0xDC => "Diagnostic Device",
        0xEF => "Miscellaneous",
        0xFF => "Vendor Specific",
        _ => "Unknown",
    }
}

/// Interface class name (`bInterfaceClass`)
pub fn interface_class_name(class: u8) -> &'static str {
    match class {
        0x01 => "Audio",
        0x02 => "Communications and CDC Control",
        0x03 => "Human Interface Device",
        0x05 => "Physical",
        0x06 => "Image",
        0x07 => "Printer",
        0x08 => "Mass Storage",
        0x0A => "CDC Data",
        0x0B => "Smart Card",
        0x0D => "Content Security",
        0x0E => "Video",
        0x0F => "Personal Healthcare",
        0x10 => "Audio/Video Devices",
        0x12 => "USB Type-C Bridge",
        0xDC => "Diagnostic Device",
        0xE0 => "Wireless Controller",
        0xEF => "Miscellaneous",
        0xFE => "Application Specific",
        0xFF => "Vendor Specific",
        _ => "Unknown",
    }
}

pub fn transfer_type_name(transfer_type: u8) -> &'static str {
    match transfer_type & 0x03 {
        0 => "Control",
        1 => "Isochronous",
        2 => "Bulk",
        _ => "Interrupt",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_names() {
        assert_eq!(descriptor_type_name(0x05), "Endpoint");
        assert_eq!(device_class_name(0x09), "Hub");
        assert_eq!(interface_class_name(0x08), "Mass Storage");
        assert_eq!(transfer_type_name(3), "Interrupt");
    }

    #[test]
    fn test_unknown_names() {
        assert_eq!(descriptor_type_name(0x99), "Unknown");
        assert_eq!(interface_class_name(0x42), "Unknown");
    }
}
