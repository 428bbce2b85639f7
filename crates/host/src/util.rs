//! Convenience operations over devices and descriptor views

use crate::control::get_descriptor;
use crate::device::Device;
use crate::error::{Result, UsbError};
use protocol::strings::MAX_STRING_DESC_LEN;
use protocol::util::DESC_TYPE_STRING;
use protocol::{ProtocolError, decode_langids, decode_string_descriptor};

/// First item of a descriptor iterator satisfying `predicate`
///
/// # Example
///
/// ```
/// use host::backend::loopback::{LoopbackBackend, LoopbackDevice};
/// use host::util::find_descriptor;
/// use host::find;
/// use std::sync::Arc;
///
/// let backend = Arc::new(LoopbackBackend::new(vec![LoopbackDevice::bulk_loopback(1, 2)]));
/// let dev = find().backend(backend).first().unwrap().unwrap();
/// let cfg = find_descriptor(dev.configurations(), |c| c.value() == 1).unwrap();
/// assert!(cfg.is_some());
/// ```
pub fn find_descriptor<T>(
    iter: impl IntoIterator<Item = Result<T>>,
    mut predicate: impl FnMut(&T) -> bool,
) -> Result<Option<T>> {
    for item in iter {
        let item = item?;
        if predicate(&item) {
            return Ok(Some(item));
        }
    }
    Ok(None)
}

/// Every item of a descriptor iterator satisfying `predicate`
pub fn find_all_descriptors<T>(
    iter: impl IntoIterator<Item = Result<T>>,
    mut predicate: impl FnMut(&T) -> bool,
) -> Result<Vec<T>> {
    let mut found = Vec::new();
    for item in iter {
        let item = item?;
        if predicate(&item) {
            found.push(item);
        }
    }
    Ok(found)
}

/// Claim an interface by `bInterfaceNumber`
pub fn claim_interface(dev: &Device, interface: u8) -> Result<()> {
    dev.claim_interface(Some(interface))
}

/// Release an interface by `bInterfaceNumber`
pub fn release_interface(dev: &Device, interface: u8) -> Result<()> {
    dev.release_interface(Some(interface))
}

/// Free every resource a device holds; it re-acquires them on demand
pub fn dispose_resources(dev: &Device) -> Result<()> {
    dev.dispose()
}

fn malformed(e: ProtocolError) -> UsbError {
    UsbError::InvalidArgument(format!("malformed string descriptor: {}", e))
}

/// LANGIDs from string descriptor 0
///
/// A reply too short to hold one LANGID, or with an odd `bLength`, yields an
/// empty list. A reply that is not a string descriptor is an error.
pub fn get_langids(dev: &Device) -> Result<Vec<u16>> {
    let raw = get_descriptor(dev, MAX_STRING_DESC_LEN, DESC_TYPE_STRING, 0, 0)?;
    if raw.len() < 4 || raw[0] < 4 || raw[0] & 1 != 0 {
        return Ok(Vec::new());
    }
    decode_langids(&raw).map_err(malformed)
}

/// Read string descriptor `index`
///
/// Index 0 means "no string" and yields `None`. Without a `langid` the
/// first one the device reports is used; a given `langid` is sent as is.
pub fn get_string(dev: &Device, index: u8, langid: Option<u16>) -> Result<Option<String>> {
    if index == 0 {
        return Ok(None);
    }

    let langid = match langid {
        Some(id) => id,
        None => *get_langids(dev)?
            .first()
            .ok_or(UsbError::NotSupported("device reports no LANGIDs"))?,
    };

    let raw = get_descriptor(dev, MAX_STRING_DESC_LEN, DESC_TYPE_STRING, index, langid)?;
    decode_string_descriptor(&raw).map(Some).map_err(malformed)
}
