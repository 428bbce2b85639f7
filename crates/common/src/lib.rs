//! Common utilities for usb-host
//!
//! Shared by the host library and the command line tool: the ambient error
//! type, tracing setup, and descriptor fixtures for tests.

pub mod error;
pub mod logging;
pub mod test_utils;

pub use error::{Error, Result};
pub use logging::{LOG_LEVELS, is_valid_level, setup_logging};
