//! USB wire-level definitions for usb-host
//!
//! This crate holds everything about USB that does not need a device:
//! descriptor value types, the bit layouts of endpoint addresses and
//! `bmRequestType`, standard request codes, string descriptor decoding and
//! name tables for display.
//!
//! # Example
//!
//! ```
//! use protocol::{EndpointDescriptor, TransferType, Direction};
//!
//! let ep = EndpointDescriptor {
//!     endpoint_address: 0x81,
//!     attributes: 0x02,
//!     ..Default::default()
//! };
//! assert_eq!(ep.direction(), Direction::In);
//! assert_eq!(ep.transfer_type(), TransferType::Bulk);
//! ```

pub mod error;
pub mod lookup;
pub mod strings;
pub mod types;
pub mod util;

pub use error::{ProtocolError, Result};
pub use strings::{
    LANGID_EN_US, decode_langids, decode_string_descriptor, encode_langids,
    encode_string_descriptor,
};
pub use types::{
    ConfigurationDescriptor, DeviceDescriptor, Direction, EndpointDescriptor, InterfaceDescriptor,
    Recipient, RequestType, TransferType,
};
pub use util::{
    build_request_type, ctrl_direction, ctrl_recipient, ctrl_type, endpoint_address,
    endpoint_direction, endpoint_type,
};
