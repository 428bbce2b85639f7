//! Subcommand implementations

use crate::parse::hex_string;
use crate::{ControlRequest, DeviceFilter};
use anyhow::{Context, Result, anyhow};
use host::{ControlData, Device, Finder, HostConfig, Transferred, find};
use protocol::lookup::{descriptor_type_name, device_class_name};
use serde::Serialize;
use tracing::warn;

/// One line of `usb-probe list`
#[derive(Debug, Serialize)]
pub struct DeviceSummary {
    pub bus: Option<u8>,
    pub address: Option<u8>,
    pub vendor_id: String,
    pub product_id: String,
    pub class: u8,
    pub class_name: &'static str,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
}

impl DeviceSummary {
    /// Strings are best effort: without access rights they stay empty
    pub fn from_device(dev: &Device) -> Self {
        let d = dev.descriptor();
        let string = |value: host::Result<Option<String>>| value.ok().flatten();
        Self {
            bus: d.bus,
            address: d.address,
            vendor_id: format!("{:04x}", d.vendor_id),
            product_id: format!("{:04x}", d.product_id),
            class: d.device_class,
            class_name: device_class_name(d.device_class),
            manufacturer: string(dev.manufacturer()),
            product: string(dev.product()),
            serial_number: string(dev.serial_number()),
        }
    }
}

fn finder(config: &HostConfig, filter: &DeviceFilter) -> Finder {
    let mut finder = find().with_config(config);
    if let Some(vid) = filter.vid {
        finder = finder.vendor_id(vid);
    }
    if let Some(pid) = filter.pid {
        finder = finder.product_id(pid);
    }
    finder
}

fn find_one(config: &HostConfig, filter: &DeviceFilter) -> Result<Device> {
    if filter.vid.is_none() && filter.pid.is_none() {
        return Err(anyhow!("Select a device with --vid and/or --pid"));
    }
    finder(config, filter)
        .first()
        .context("Device search failed")?
        .ok_or_else(|| anyhow!("No matching device found"))
}

pub fn list(
    config: &HostConfig,
    filter: &DeviceFilter,
    class: Option<u8>,
    json: bool,
) -> Result<()> {
    let mut finder = finder(config, filter);
    if let Some(class) = class {
        finder = finder.device_class(class);
    }
    let devices = finder.all().context("Device search failed")?;
    let summaries: Vec<DeviceSummary> = devices.iter().map(DeviceSummary::from_device).collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    if summaries.is_empty() {
        println!("No USB devices found.");
        return Ok(());
    }

    println!("Found {} USB device(s):\n", summaries.len());
    for (dev, summary) in devices.iter().zip(&summaries) {
        println!(
            "  {} - {} {}",
            dev,
            summary
                .manufacturer
                .as_deref()
                .unwrap_or("Unknown Manufacturer"),
            summary.product.as_deref().unwrap_or("Unknown Product")
        );
        println!("      Class: {} ({:#04x})", summary.class_name, summary.class);
        if let Some(serial) = &summary.serial_number {
            println!("      Serial: {}", serial);
        }
    }
    Ok(())
}

pub fn show(config: &HostConfig, filter: &DeviceFilter) -> Result<()> {
    let dev = find_one(config, filter)?;
    let d = dev.descriptor();

    println!("{}", dev);
    println!(
        "{}: USB {:x}.{:02x}, class {} ({:#04x}), max packet {}",
        descriptor_type_name(d.descriptor_type),
        d.usb_version >> 8,
        d.usb_version & 0xFF,
        device_class_name(d.device_class),
        d.device_class,
        d.max_packet_size_0
    );
    if let Ok(Some(product)) = dev.product() {
        println!("  Product: {}", product);
    }

    for cfg in dev.configurations() {
        let cfg = cfg?;
        println!("  {}", cfg);
        for intf in cfg.interfaces() {
            let intf = intf?;
            println!("    {}", intf);
            for ep in intf.endpoints() {
                println!("      {}", ep?);
            }
        }
    }

    if let Err(e) = dev.dispose() {
        warn!("Failed to release {}: {}", dev, e);
    }
    Ok(())
}

pub fn ctrl(config: &HostConfig, filter: &DeviceFilter, request: &ControlRequest) -> Result<()> {
    let dev = find_one(config, filter)?;

    let data = match (&request.data, request.length) {
        (Some(bytes), _) => ControlData::from(bytes.0.as_slice()),
        (None, Some(length)) => ControlData::Length(length),
        (None, None) => ControlData::None,
    };

    let result = dev
        .ctrl_transfer(
            request.request_type,
            request.request,
            request.value,
            request.index,
            data,
            None,
        )
        .with_context(|| format!("Control transfer to {} failed", dev))?;

    match result {
        Transferred::Written(n) => println!("Wrote {} byte(s)", n),
        Transferred::Read(bytes) => {
            println!("Read {} byte(s)", bytes.len());
            if !bytes.is_empty() {
                println!("  {}", hex_string(&bytes));
            }
        }
    }
    Ok(())
}
