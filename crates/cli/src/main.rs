//! usb-probe
//!
//! Inspect USB devices from the command line: list what is attached, dump
//! descriptor trees and issue single control transfers.

mod commands;
mod parse;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use common::setup_logging;
use host::HostConfig;
use parse::{HexBytes, parse_u8, parse_u16};
use std::path::PathBuf;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "usb-probe")]
#[command(author, version, about = "Inspect USB devices and issue control transfers")]
#[command(long_about = "
Inspect USB devices through the usb-host library.

EXAMPLES:
    # List every device
    usb-probe list

    # List devices of one vendor as JSON
    usb-probe list --vid 0x04d8 --json

    # Dump the descriptor tree of a device
    usb-probe show --vid 0x04d8 --pid 0xfa2e

    # Vendor IN request reading 4 bytes
    usb-probe ctrl --vid 0x04d8 --pid 0xfa2e --request-type 0xC0 --request 1 --length 4

CONFIGURATION:
    The host configuration is read from, in order:
    1. Path specified with --config
    2. ~/.config/usb-host/host.toml
    3. /etc/usb-host/host.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Default transfer timeout in milliseconds
    #[arg(short, long, value_name = "MS", global = true)]
    timeout: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List attached devices
    List {
        #[command(flatten)]
        filter: DeviceFilter,

        /// Only devices of this class
        #[arg(long, value_name = "CLASS", value_parser = parse_u8)]
        class: Option<u8>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Print the descriptor tree of a device
    Show {
        #[command(flatten)]
        filter: DeviceFilter,
    },
    /// Issue one control transfer
    Ctrl {
        #[command(flatten)]
        filter: DeviceFilter,

        #[command(flatten)]
        request: ControlRequest,
    },
}

#[derive(ClapArgs, Debug, Clone, Default)]
pub struct DeviceFilter {
    /// Vendor id (e.g. 0x04d8)
    #[arg(long, value_name = "VID", value_parser = parse_u16)]
    pub vid: Option<u16>,

    /// Product id (e.g. 0xfa2e)
    #[arg(long, value_name = "PID", value_parser = parse_u16)]
    pub pid: Option<u16>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ControlRequest {
    /// bmRequestType; bit 7 set reads from the device
    #[arg(long, value_name = "TYPE", value_parser = parse_u8)]
    pub request_type: u8,

    /// bRequest
    #[arg(long, value_name = "REQUEST", value_parser = parse_u8)]
    pub request: u8,

    /// wValue
    #[arg(long, default_value = "0", value_parser = parse_u16)]
    pub value: u16,

    /// wIndex
    #[arg(long, default_value = "0", value_parser = parse_u16)]
    pub index: u16,

    /// Bytes to read (device-to-host requests)
    #[arg(long, conflicts_with = "data")]
    pub length: Option<usize>,

    /// Payload as hex (host-to-device requests)
    #[arg(long, value_name = "HEX", value_parser = HexBytes::parse)]
    pub data: Option<HexBytes>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = if let Some(ref path) = args.config {
        HostConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        HostConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    setup_logging(&log_level).context("Failed to setup logging")?;
    debug!("usb-probe v{}", env!("CARGO_PKG_VERSION"));

    if let Some(timeout) = args.timeout {
        config.transfer.default_timeout_ms = timeout;
    }

    match args.command {
        Command::List {
            filter,
            class,
            json,
        } => commands::list(&config, &filter, class, json),
        Command::Show { filter } => commands::show(&config, &filter),
        Command::Ctrl { filter, request } => commands::ctrl(&config, &filter, &request),
    }
}
