//! USB host access for usb-host
//!
//! Find devices, walk their descriptor trees and move data, with interface
//! claims, handle lifetime and alternate settings managed behind each
//! [`Device`]. The native library doing the work is a pluggable
//! [`backend::Backend`]; libusb 1.0 through `rusb` is the default and
//! [`backend::loopback`] provides an in-memory device for tests.
//!
//! # Example
//!
//! ```
//! use host::backend::loopback::{LoopbackBackend, LoopbackDevice};
//! use host::find;
//! use std::sync::Arc;
//!
//! let backend = Arc::new(LoopbackBackend::new(vec![LoopbackDevice::bulk_loopback(
//!     0x04d8, 0xfa2e,
//! )]));
//!
//! let dev = find()
//!     .backend(backend)
//!     .vendor_id(0x04d8)
//!     .product_id(0xfa2e)
//!     .first()
//!     .unwrap()
//!     .expect("device not found");
//!
//! dev.set_configuration(None).unwrap();
//! assert_eq!(dev.write(0x01, b"hello", None, None).unwrap(), 5);
//! assert_eq!(dev.read(0x81, 5, None, None).unwrap(), b"hello");
//! ```

pub mod backend;
pub mod config;
pub mod control;
pub mod descriptors;
pub mod device;
pub mod error;
pub mod find;
pub(crate) mod resources;
pub mod util;

pub use backend::{Backend, BackendKind, DeviceId, HandleId, Payload, Transferred};
pub use config::HostConfig;
pub use descriptors::{Configuration, Endpoint, Interface};
pub use device::{ControlData, DEFAULT_TIMEOUT_MS, Device};
pub use error::{DescriptorKind, Result, TransportErrorKind, UsbError};
pub use find::{DeviceField, Finder, find};
pub use resources::ResourceState;
