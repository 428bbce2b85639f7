//! In-memory loopback backend
//!
//! Devices are described with plain descriptor values. Every OUT endpoint
//! is connected to the IN endpoint with the same number: bytes written to
//! `0x01` can be read back from `0x81`. Vendor control OUT requests store
//! their data stage; vendor control IN requests return it, zero padded or
//! truncated to the requested length.
//!
//! The backend behaves like a strict native backend: transfers need a
//! claimed interface, an interface cannot be claimed twice on one handle,
//! and unknown handles are rejected. Each call is counted by operation
//! name so tests can assert exactly what the core issued.
//!
//! # Example
//!
//! ```
//! use host::backend::loopback::{LoopbackBackend, LoopbackDevice};
//! use host::backend::Backend;
//!
//! let backend = LoopbackBackend::new(vec![LoopbackDevice::bulk_loopback(0x04d8, 0xfa2e)]);
//! let ids = backend.enumerate_devices().unwrap();
//! assert_eq!(ids.len(), 1);
//! assert_eq!(backend.calls("enumerate_devices"), 1);
//! ```

use super::{Backend, DeviceId, HandleId, Payload, Transferred};
use crate::error::{DescriptorKind, Result, TransportErrorKind, UsbError};
use protocol::util::{
    DESC_TYPE_STRING, ENDPOINT_HALT, REQ_CLEAR_FEATURE, REQ_GET_CONFIGURATION,
    REQ_GET_DESCRIPTOR, REQ_GET_INTERFACE, REQ_GET_STATUS, REQ_SET_FEATURE,
};
use protocol::{
    ConfigurationDescriptor, DeviceDescriptor, Direction, EndpointDescriptor,
    InterfaceDescriptor, LANGID_EN_US, Recipient, RequestType, TransferType, ctrl_direction,
    ctrl_recipient, ctrl_type, encode_langids, encode_string_descriptor, endpoint_direction,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

// libusb error codes, reused so loopback failures look native
const ERR_INVALID_PARAM: i32 = -2;
const ERR_NO_DEVICE: i32 = -4;
const ERR_NOT_FOUND: i32 = -5;
const ERR_BUSY: i32 = -6;
const ERR_TIMEOUT: i32 = -7;
const ERR_PIPE: i32 = -9;

fn native(kind: TransportErrorKind, code: i32) -> UsbError {
    UsbError::transport(kind, Some(code))
}

/// One alternate setting: its descriptor and endpoints
#[derive(Debug, Clone)]
pub struct LoopbackAltSetting {
    pub descriptor: InterfaceDescriptor,
    pub endpoints: Vec<EndpointDescriptor>,
}

/// One configuration; `interfaces[i]` holds the alternates of interface `i`
#[derive(Debug, Clone)]
pub struct LoopbackConfiguration {
    pub descriptor: ConfigurationDescriptor,
    pub interfaces: Vec<Vec<LoopbackAltSetting>>,
}

impl LoopbackConfiguration {
    pub fn new(descriptor: ConfigurationDescriptor) -> Self {
        let mut config = Self {
            descriptor,
            interfaces: Vec::new(),
        };
        config.descriptor.num_interfaces = 0;
        config
    }

    /// Add an interface descriptor with its endpoints
    ///
    /// A descriptor whose `interface_number` was already added becomes an
    /// alternate setting of that interface. Counts in the descriptors are
    /// kept consistent with what was added.
    pub fn with_interface(
        mut self,
        mut descriptor: InterfaceDescriptor,
        endpoints: Vec<EndpointDescriptor>,
    ) -> Self {
        descriptor.num_endpoints = endpoints.len() as u8;
        let alt = LoopbackAltSetting {
            descriptor,
            endpoints,
        };
        let number = alt.descriptor.interface_number;
        match self
            .interfaces
            .iter_mut()
            .find(|alts| alts[0].descriptor.interface_number == number)
        {
            Some(alts) => alts.push(alt),
            None => self.interfaces.push(vec![alt]),
        }
        self.descriptor.num_interfaces = self.interfaces.len() as u8;
        self.descriptor.total_length = self.interfaces.iter().flatten().fold(9, |acc, alt| {
            acc + 9 + 7 * alt.endpoints.len() as u16
        });
        self
    }
}

/// A simulated device
#[derive(Debug, Clone)]
pub struct LoopbackDevice {
    pub descriptor: DeviceDescriptor,
    pub configurations: Vec<LoopbackConfiguration>,
    /// String descriptors 1.., in order
    pub strings: Vec<String>,
    /// Raw reply to string descriptor 0; `None` serves a US English table
    pub langid_table: Option<Vec<u8>>,
    /// Value reported by GET_CONFIGURATION before any SET_CONFIGURATION
    pub initial_configuration: u8,
    /// Whether the backend supports reading back the active configuration
    pub reports_configuration: bool,
    /// Interfaces bound to a kernel driver
    pub kernel_drivers: HashSet<u8>,
}

impl LoopbackDevice {
    pub fn new(descriptor: DeviceDescriptor) -> Self {
        let mut device = Self {
            descriptor,
            configurations: Vec::new(),
            strings: Vec::new(),
            langid_table: None,
            initial_configuration: 0,
            reports_configuration: true,
            kernel_drivers: HashSet::new(),
        };
        device.descriptor.num_configurations = 0;
        device
    }

    /// Add a configuration; the first one added is initially active
    pub fn with_configuration(mut self, config: LoopbackConfiguration) -> Self {
        if self.configurations.is_empty() {
            self.initial_configuration = config.descriptor.configuration_value;
        }
        self.configurations.push(config);
        self.descriptor.num_configurations = self.configurations.len() as u8;
        self
    }

    pub fn with_strings<S: Into<String>>(mut self, strings: impl IntoIterator<Item = S>) -> Self {
        self.strings = strings.into_iter().map(Into::into).collect();
        self
    }

    /// Answer string descriptor 0 with `raw` instead of a US English table
    pub fn with_langid_table(mut self, raw: Vec<u8>) -> Self {
        self.langid_table = Some(raw);
        self
    }

    /// Start unconfigured (GET_CONFIGURATION reports 0)
    pub fn unconfigured(mut self) -> Self {
        self.initial_configuration = 0;
        self
    }

    /// Behave like a backend without configuration read-back
    pub fn without_configuration_readback(mut self) -> Self {
        self.reports_configuration = false;
        self
    }

    pub fn with_kernel_driver(mut self, interface: u8) -> Self {
        self.kernel_drivers.insert(interface);
        self
    }

    /// Vendor-specific device with one configuration (value 1) and one
    /// interface carrying bulk endpoints 0x01 OUT and 0x81 IN
    pub fn bulk_loopback(vendor_id: u16, product_id: u16) -> Self {
        let descriptor = DeviceDescriptor {
            vendor_id,
            product_id,
            manufacturer_index: 1,
            product_index: 2,
            serial_number_index: 3,
            bus: Some(1),
            address: Some(1),
            port_number: Some(1),
            ..Default::default()
        };
        let config = LoopbackConfiguration::new(ConfigurationDescriptor::default()).with_interface(
            InterfaceDescriptor {
                interface_class: 0xFF,
                ..Default::default()
            },
            vec![
                EndpointDescriptor {
                    endpoint_address: 0x01,
                    ..Default::default()
                },
                EndpointDescriptor {
                    endpoint_address: 0x81,
                    ..Default::default()
                },
            ],
        );
        Self::new(descriptor)
            .with_configuration(config)
            .with_strings(["usb-host", "Loopback", "0001"])
    }

    fn configuration_by_value(&self, value: u8) -> Option<&LoopbackConfiguration> {
        self.configurations
            .iter()
            .find(|c| c.descriptor.configuration_value == value)
    }
}

struct OpenHandle {
    dev: DeviceId,
    claimed: HashSet<u8>,
    /// bInterfaceNumber -> bAlternateSetting
    alternates: HashMap<u8, u8>,
}

struct DeviceState {
    spec: LoopbackDevice,
    active_configuration: u8,
    /// Endpoint number -> queued bytes
    pipes: HashMap<u8, VecDeque<u8>>,
    control_buffer: Vec<u8>,
    halted: HashSet<u8>,
    kernel_drivers: HashSet<u8>,
}

impl DeviceState {
    fn active(&self) -> Option<&LoopbackConfiguration> {
        self.spec.configuration_by_value(self.active_configuration)
    }
}

#[derive(Default)]
struct State {
    devices: Vec<DeviceState>,
    handles: HashMap<HandleId, OpenHandle>,
    next_handle: u64,
    calls: HashMap<&'static str, usize>,
    failures: HashMap<&'static str, TransportErrorKind>,
    last_timeout: Option<Duration>,
}

impl State {
    fn device(&self, dev: DeviceId) -> Result<&DeviceState> {
        self.devices
            .get(dev.0 as usize)
            .ok_or(native(TransportErrorKind::NoDevice, ERR_NO_DEVICE))
    }

    fn handle(&self, handle: HandleId) -> Result<&OpenHandle> {
        self.handles
            .get(&handle)
            .ok_or(native(TransportErrorKind::InvalidParam, ERR_INVALID_PARAM))
    }

    fn handle_mut(&mut self, handle: HandleId) -> Result<&mut OpenHandle> {
        self.handles
            .get_mut(&handle)
            .ok_or(native(TransportErrorKind::InvalidParam, ERR_INVALID_PARAM))
    }

    fn alternates(
        &self,
        dev: DeviceId,
        intf: u8,
        config: u8,
    ) -> Result<&Vec<LoopbackAltSetting>> {
        let cfg = self
            .device(dev)?
            .spec
            .configurations
            .get(config as usize)
            .ok_or(UsbError::InvalidDescriptorIndex {
                descriptor: DescriptorKind::Configuration,
                index: config,
            })?;
        cfg.interfaces
            .get(intf as usize)
            .ok_or(UsbError::InvalidDescriptorIndex {
                descriptor: DescriptorKind::Interface,
                index: intf,
            })
    }

    fn alt_setting(
        &self,
        dev: DeviceId,
        intf: u8,
        alt: u8,
        config: u8,
    ) -> Result<&LoopbackAltSetting> {
        self.alternates(dev, intf, config)?
            .get(alt as usize)
            .ok_or(UsbError::InvalidDescriptorIndex {
                descriptor: DescriptorKind::AlternateSetting,
                index: alt,
            })
    }
}

/// In-memory backend; see the module docs
pub struct LoopbackBackend {
    state: Mutex<State>,
}

impl LoopbackBackend {
    /// Create a backend exposing `devices`; `DeviceId(n)` is `devices[n]`
    pub fn new(devices: Vec<LoopbackDevice>) -> Self {
        let devices = devices
            .into_iter()
            .map(|spec| DeviceState {
                active_configuration: spec.initial_configuration,
                kernel_drivers: spec.kernel_drivers.clone(),
                spec,
                pipes: HashMap::new(),
                control_buffer: Vec::new(),
                halted: HashSet::new(),
            })
            .collect();
        Self {
            state: Mutex::new(State {
                devices,
                next_handle: 1,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Count the call and apply any injected failure
    fn enter(&self, op: &'static str) -> Result<MutexGuard<'_, State>> {
        let mut state = self.lock();
        *state.calls.entry(op).or_default() += 1;
        if let Some(kind) = state.failures.get(op) {
            return Err(UsbError::transport(*kind, None));
        }
        Ok(state)
    }

    /// Number of times `op` (a [`Backend`] method name) was called
    pub fn calls(&self, op: &str) -> usize {
        self.lock().calls.get(op).copied().unwrap_or(0)
    }

    pub fn reset_calls(&self) {
        self.lock().calls.clear();
    }

    /// Make every later call to `op` fail with `kind`
    pub fn fail_on(&self, op: &'static str, kind: TransportErrorKind) {
        self.lock().failures.insert(op, kind);
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    pub fn open_handles(&self) -> usize {
        self.lock().handles.len()
    }

    /// Interfaces currently claimed on any handle of `dev`, sorted
    pub fn claimed_interfaces(&self, dev: DeviceId) -> Vec<u8> {
        let state = self.lock();
        let mut claimed: Vec<u8> = state
            .handles
            .values()
            .filter(|h| h.dev == dev)
            .flat_map(|h| h.claimed.iter().copied())
            .collect();
        claimed.sort_unstable();
        claimed
    }

    /// Active `bConfigurationValue` as the device sees it
    pub fn active_configuration(&self, dev: DeviceId) -> Option<u8> {
        self.lock()
            .devices
            .get(dev.0 as usize)
            .map(|d| d.active_configuration)
    }

    /// Timeout passed to the most recent transfer of any kind
    pub fn last_timeout(&self) -> Option<Duration> {
        self.lock().last_timeout
    }

    pub fn is_halted(&self, dev: DeviceId, ep: u8) -> bool {
        self.lock()
            .devices
            .get(dev.0 as usize)
            .is_some_and(|d| d.halted.contains(&ep))
    }

    #[allow(clippy::too_many_arguments)]
    fn data_transfer(
        &self,
        op: &'static str,
        handle: HandleId,
        ep: u8,
        intf: u8,
        payload: Payload<'_>,
        expected: TransferType,
        timeout: Duration,
    ) -> Result<Transferred> {
        let mut state = self.enter(op)?;
        state.last_timeout = Some(timeout);
        let open = state.handle(handle)?;
        let dev = open.dev;
        if !open.claimed.contains(&intf) {
            return Err(native(TransportErrorKind::NotFound, ERR_NOT_FOUND));
        }
        let alt_value = open.alternates.get(&intf).copied().unwrap_or(0);

        let device = state.device(dev)?;
        let endpoint = device
            .active()
            .and_then(|cfg| {
                cfg.interfaces
                    .iter()
                    .flatten()
                    .find(|a| {
                        a.descriptor.interface_number == intf
                            && a.descriptor.alternate_setting == alt_value
                    })
            })
            .and_then(|alt| alt.endpoints.iter().find(|e| e.endpoint_address == ep))
            .ok_or(native(TransportErrorKind::NotFound, ERR_NOT_FOUND))?;

        if endpoint.transfer_type() != expected {
            return Err(native(TransportErrorKind::InvalidParam, ERR_INVALID_PARAM));
        }
        if device.halted.contains(&ep) {
            return Err(native(TransportErrorKind::Pipe, ERR_PIPE));
        }

        let number = protocol::endpoint_address(ep);
        let index = dev.0 as usize;
        match (payload, endpoint_direction(ep)) {
            (Payload::Out(data), Direction::Out) => {
                state.devices[index]
                    .pipes
                    .entry(number)
                    .or_default()
                    .extend(data.iter().copied());
                Ok(Transferred::Written(data.len()))
            }
            (Payload::In(len), Direction::In) => {
                let pipe = state.devices[index].pipes.entry(number).or_default();
                if pipe.is_empty() && len > 0 {
                    return Err(native(TransportErrorKind::Timeout, ERR_TIMEOUT));
                }
                let take = len.min(pipe.len());
                Ok(Transferred::Read(pipe.drain(..take).collect()))
            }
            _ => Err(native(TransportErrorKind::InvalidParam, ERR_INVALID_PARAM)),
        }
    }

    fn standard_in(
        state: &State,
        dev: DeviceId,
        open: &OpenHandle,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
    ) -> Result<Vec<u8>> {
        let device = state.device(dev)?;
        match request {
            REQ_GET_STATUS => {
                let halted = ctrl_recipient(request_type) == Recipient::Endpoint
                    && device.halted.contains(&(index as u8));
                Ok(vec![halted as u8, 0])
            }
            REQ_GET_DESCRIPTOR if (value >> 8) as u8 == DESC_TYPE_STRING => {
                let string_index = (value & 0xFF) as usize;
                if string_index == 0 {
                    return Ok(device
                        .spec
                        .langid_table
                        .clone()
                        .unwrap_or_else(|| encode_langids(&[LANGID_EN_US])));
                }
                device
                    .spec
                    .strings
                    .get(string_index - 1)
                    .map(|s| encode_string_descriptor(s))
                    .ok_or(native(TransportErrorKind::Pipe, ERR_PIPE))
            }
            REQ_GET_CONFIGURATION => Ok(vec![device.active_configuration]),
            REQ_GET_INTERFACE => Ok(vec![
                open.alternates.get(&(index as u8)).copied().unwrap_or(0),
            ]),
            _ => Err(native(TransportErrorKind::Pipe, ERR_PIPE)),
        }
    }
}

impl Backend for LoopbackBackend {
    fn name(&self) -> &'static str {
        "loopback"
    }

    fn enumerate_devices(&self) -> Result<Vec<DeviceId>> {
        let state = self.enter("enumerate_devices")?;
        Ok((0..state.devices.len() as u64).map(DeviceId).collect())
    }

    fn get_device_descriptor(&self, dev: DeviceId) -> Result<DeviceDescriptor> {
        let state = self.enter("get_device_descriptor")?;
        Ok(state.device(dev)?.spec.descriptor.clone())
    }

    fn get_configuration_descriptor(
        &self,
        dev: DeviceId,
        config: u8,
    ) -> Result<ConfigurationDescriptor> {
        let state = self.enter("get_configuration_descriptor")?;
        state
            .device(dev)?
            .spec
            .configurations
            .get(config as usize)
            .map(|c| c.descriptor.clone())
            .ok_or(UsbError::InvalidDescriptorIndex {
                descriptor: DescriptorKind::Configuration,
                index: config,
            })
    }

    fn get_interface_descriptor(
        &self,
        dev: DeviceId,
        intf: u8,
        alt: u8,
        config: u8,
    ) -> Result<InterfaceDescriptor> {
        let state = self.enter("get_interface_descriptor")?;
        Ok(state.alt_setting(dev, intf, alt, config)?.descriptor.clone())
    }

    fn get_endpoint_descriptor(
        &self,
        dev: DeviceId,
        ep: u8,
        intf: u8,
        alt: u8,
        config: u8,
    ) -> Result<EndpointDescriptor> {
        let state = self.enter("get_endpoint_descriptor")?;
        state
            .alt_setting(dev, intf, alt, config)?
            .endpoints
            .get(ep as usize)
            .cloned()
            .ok_or(UsbError::InvalidDescriptorIndex {
                descriptor: DescriptorKind::Endpoint,
                index: ep,
            })
    }

    fn open_device(&self, dev: DeviceId) -> Result<HandleId> {
        let mut state = self.enter("open_device")?;
        state.device(dev)?;
        let id = HandleId(state.next_handle);
        state.next_handle += 1;
        state.handles.insert(
            id,
            OpenHandle {
                dev,
                claimed: HashSet::new(),
                alternates: HashMap::new(),
            },
        );
        debug!("loopback: opened {:?} as {:?}", dev, id);
        Ok(id)
    }

    fn close_device(&self, handle: HandleId) -> Result<()> {
        let mut state = self.enter("close_device")?;
        state
            .handles
            .remove(&handle)
            .map(|_| ())
            .ok_or(native(TransportErrorKind::InvalidParam, ERR_INVALID_PARAM))
    }

    fn set_configuration(&self, handle: HandleId, value: u8) -> Result<()> {
        let mut state = self.enter("set_configuration")?;
        let dev = state.handle(handle)?.dev;
        let device = state.device(dev)?;
        if value != 0 && device.spec.configuration_by_value(value).is_none() {
            return Err(native(TransportErrorKind::NotFound, ERR_NOT_FOUND));
        }
        state.devices[dev.0 as usize].active_configuration = value;
        state.handle_mut(handle)?.alternates.clear();
        Ok(())
    }

    fn get_configuration(&self, handle: HandleId) -> Result<u8> {
        let state = self.enter("get_configuration")?;
        let device = state.device(state.handle(handle)?.dev)?;
        if !device.spec.reports_configuration {
            return Err(UsbError::NotSupported("get_configuration"));
        }
        Ok(device.active_configuration)
    }

    fn claim_interface(&self, handle: HandleId, number: u8) -> Result<()> {
        let mut state = self.enter("claim_interface")?;
        let open = state.handle_mut(handle)?;
        if !open.claimed.insert(number) {
            return Err(native(TransportErrorKind::Busy, ERR_BUSY));
        }
        Ok(())
    }

    fn release_interface(&self, handle: HandleId, number: u8) -> Result<()> {
        let mut state = self.enter("release_interface")?;
        let open = state.handle_mut(handle)?;
        if !open.claimed.remove(&number) {
            return Err(native(TransportErrorKind::NotFound, ERR_NOT_FOUND));
        }
        open.alternates.remove(&number);
        Ok(())
    }

    fn set_interface_altsetting(&self, handle: HandleId, number: u8, alt: u8) -> Result<()> {
        let mut state = self.enter("set_interface_altsetting")?;
        let open = state.handle(handle)?;
        if !open.claimed.contains(&number) {
            return Err(native(TransportErrorKind::NotFound, ERR_NOT_FOUND));
        }
        let exists = state.device(open.dev)?.active().is_some_and(|cfg| {
            cfg.interfaces.iter().flatten().any(|a| {
                a.descriptor.interface_number == number && a.descriptor.alternate_setting == alt
            })
        });
        if !exists {
            return Err(native(TransportErrorKind::NotFound, ERR_NOT_FOUND));
        }
        state.handle_mut(handle)?.alternates.insert(number, alt);
        Ok(())
    }

    fn bulk_transfer(
        &self,
        handle: HandleId,
        ep: u8,
        intf: u8,
        payload: Payload<'_>,
        timeout: Duration,
    ) -> Result<Transferred> {
        self.data_transfer(
            "bulk_transfer",
            handle,
            ep,
            intf,
            payload,
            TransferType::Bulk,
            timeout,
        )
    }

    fn interrupt_transfer(
        &self,
        handle: HandleId,
        ep: u8,
        intf: u8,
        payload: Payload<'_>,
        timeout: Duration,
    ) -> Result<Transferred> {
        self.data_transfer(
            "interrupt_transfer",
            handle,
            ep,
            intf,
            payload,
            TransferType::Interrupt,
            timeout,
        )
    }

    fn isochronous_transfer(
        &self,
        handle: HandleId,
        ep: u8,
        intf: u8,
        payload: Payload<'_>,
        timeout: Duration,
    ) -> Result<Transferred> {
        self.data_transfer(
            "isochronous_transfer",
            handle,
            ep,
            intf,
            payload,
            TransferType::Isochronous,
            timeout,
        )
    }

    fn ctrl_transfer(
        &self,
        handle: HandleId,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        payload: Payload<'_>,
        timeout: Duration,
    ) -> Result<Transferred> {
        let mut state = self.enter("ctrl_transfer")?;
        state.last_timeout = Some(timeout);
        let open = state.handle(handle)?;
        let dev = open.dev;
        let slot = dev.0 as usize;

        match (ctrl_direction(request_type), payload) {
            (Direction::In, Payload::In(len)) => {
                let mut data = match ctrl_type(request_type) {
                    RequestType::Standard => Self::standard_in(
                        &state,
                        dev,
                        open,
                        request_type,
                        request,
                        value,
                        index,
                    )?,
                    RequestType::Vendor => {
                        let mut data = state.device(dev)?.control_buffer.clone();
                        data.resize(len, 0);
                        data
                    }
                    _ => return Err(native(TransportErrorKind::Pipe, ERR_PIPE)),
                };
                data.truncate(len);
                Ok(Transferred::Read(data))
            }
            (Direction::Out, Payload::Out(data)) => {
                match (ctrl_type(request_type), request) {
                    (RequestType::Vendor, _) => {
                        state.devices[slot].control_buffer = data.to_vec();
                    }
                    (RequestType::Standard, REQ_SET_FEATURE | REQ_CLEAR_FEATURE) => {
                        if ctrl_recipient(request_type) == Recipient::Endpoint
                            && value == ENDPOINT_HALT
                        {
                            let halted = &mut state.devices[slot].halted;
                            if request == REQ_SET_FEATURE {
                                halted.insert(index as u8);
                            } else {
                                halted.remove(&(index as u8));
                            }
                        }
                    }
                    _ => return Err(native(TransportErrorKind::Pipe, ERR_PIPE)),
                }
                Ok(Transferred::Written(data.len()))
            }
            _ => Err(native(TransportErrorKind::InvalidParam, ERR_INVALID_PARAM)),
        }
    }

    fn reset_device(&self, handle: HandleId) -> Result<()> {
        let mut state = self.enter("reset_device")?;
        let slot = state.handle(handle)?.dev.0 as usize;
        let device = &mut state.devices[slot];
        device.pipes.clear();
        device.control_buffer.clear();
        device.halted.clear();
        Ok(())
    }

    fn is_kernel_driver_active(&self, handle: HandleId, intf: u8) -> Result<bool> {
        let state = self.enter("is_kernel_driver_active")?;
        let device = state.device(state.handle(handle)?.dev)?;
        Ok(device.kernel_drivers.contains(&intf))
    }

    fn detach_kernel_driver(&self, handle: HandleId, intf: u8) -> Result<()> {
        let mut state = self.enter("detach_kernel_driver")?;
        let slot = state.handle(handle)?.dev.0 as usize;
        if !state.devices[slot].kernel_drivers.remove(&intf) {
            return Err(native(TransportErrorKind::NotFound, ERR_NOT_FOUND));
        }
        Ok(())
    }

    fn attach_kernel_driver(&self, handle: HandleId, intf: u8) -> Result<()> {
        let mut state = self.enter("attach_kernel_driver")?;
        let slot = state.handle(handle)?.dev.0 as usize;
        if !state.devices[slot].kernel_drivers.insert(intf) {
            return Err(native(TransportErrorKind::Busy, ERR_BUSY));
        }
        Ok(())
    }

    fn clear_halt(&self, handle: HandleId, ep: u8) -> Result<()> {
        let mut state = self.enter("clear_halt")?;
        let slot = state.handle(handle)?.dev.0 as usize;
        state.devices[slot].halted.remove(&ep);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> LoopbackBackend {
        LoopbackBackend::new(vec![LoopbackDevice::bulk_loopback(0x1234, 0x5678)])
    }

    const TIMEOUT: Duration = Duration::from_millis(100);

    #[test]
    fn test_descriptor_counts_follow_builder() {
        let dev = LoopbackDevice::bulk_loopback(1, 2);
        assert_eq!(dev.descriptor.num_configurations, 1);
        let cfg = &dev.configurations[0].descriptor;
        assert_eq!(cfg.num_interfaces, 1);
        assert_eq!(cfg.total_length, 9 + 9 + 14);
    }

    #[test]
    fn test_alternate_grouping() {
        let cfg = LoopbackConfiguration::new(ConfigurationDescriptor::default())
            .with_interface(InterfaceDescriptor::default(), vec![])
            .with_interface(
                InterfaceDescriptor {
                    alternate_setting: 1,
                    ..Default::default()
                },
                vec![EndpointDescriptor::default()],
            );
        assert_eq!(cfg.interfaces.len(), 1);
        assert_eq!(cfg.interfaces[0].len(), 2);
        assert_eq!(cfg.interfaces[0][1].descriptor.num_endpoints, 1);
    }

    #[test]
    fn test_descriptor_index_out_of_range() {
        let b = backend();
        let err = b.get_interface_descriptor(DeviceId(0), 0, 1, 0).unwrap_err();
        assert!(matches!(
            err,
            UsbError::InvalidDescriptorIndex {
                descriptor: DescriptorKind::AlternateSetting,
                index: 1
            }
        ));
        assert!(b.get_configuration_descriptor(DeviceId(0), 1).is_err());
    }

    #[test]
    fn test_transfer_requires_claim() {
        let b = backend();
        let h = b.open_device(DeviceId(0)).unwrap();
        let err = b
            .bulk_transfer(h, 0x01, 0, Payload::Out(&[1, 2]), TIMEOUT)
            .unwrap_err();
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::NotFound));

        b.claim_interface(h, 0).unwrap();
        let n = b
            .bulk_transfer(h, 0x01, 0, Payload::Out(&[1, 2]), TIMEOUT)
            .unwrap();
        assert_eq!(n, Transferred::Written(2));
        let data = b.bulk_transfer(h, 0x81, 0, Payload::In(8), TIMEOUT).unwrap();
        assert_eq!(data, Transferred::Read(vec![1, 2]));
    }

    #[test]
    fn test_empty_pipe_times_out() {
        let b = backend();
        let h = b.open_device(DeviceId(0)).unwrap();
        b.claim_interface(h, 0).unwrap();
        let err = b
            .bulk_transfer(h, 0x81, 0, Payload::In(4), TIMEOUT)
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_double_claim_rejected() {
        let b = backend();
        let h = b.open_device(DeviceId(0)).unwrap();
        b.claim_interface(h, 0).unwrap();
        let err = b.claim_interface(h, 0).unwrap_err();
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::Busy));
        assert_eq!(b.calls("claim_interface"), 2);
    }

    #[test]
    fn test_vendor_control_echo() {
        let b = backend();
        let h = b.open_device(DeviceId(0)).unwrap();
        b.ctrl_transfer(h, 0x40, 1, 0, 0, Payload::Out(&[7, 8]), TIMEOUT)
            .unwrap();
        let read = b
            .ctrl_transfer(h, 0xC0, 2, 0, 0, Payload::In(4), TIMEOUT)
            .unwrap();
        assert_eq!(read, Transferred::Read(vec![7, 8, 0, 0]));
    }

    #[test]
    fn test_string_descriptors() {
        let b = backend();
        let h = b.open_device(DeviceId(0)).unwrap();
        let langids = b
            .ctrl_transfer(h, 0x80, REQ_GET_DESCRIPTOR, 0x0300, 0, Payload::In(255), TIMEOUT)
            .unwrap();
        assert_eq!(langids, Transferred::Read(vec![4, 3, 0x09, 0x04]));

        let product = b
            .ctrl_transfer(h, 0x80, REQ_GET_DESCRIPTOR, 0x0302, 0x0409, Payload::In(255), TIMEOUT)
            .unwrap();
        let text = protocol::decode_string_descriptor(product.data().unwrap()).unwrap();
        assert_eq!(text, "Loopback");

        let err = b
            .ctrl_transfer(h, 0x80, REQ_GET_DESCRIPTOR, 0x0309, 0x0409, Payload::In(255), TIMEOUT)
            .unwrap_err();
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::Pipe));
    }

    #[test]
    fn test_failure_injection() {
        let b = backend();
        b.fail_on("open_device", TransportErrorKind::Access);
        assert!(b.open_device(DeviceId(0)).unwrap_err().is_transport());
        b.clear_failures();
        assert!(b.open_device(DeviceId(0)).is_ok());
        assert_eq!(b.calls("open_device"), 2);
    }

    #[test]
    fn test_unknown_handle() {
        let b = backend();
        assert!(b.close_device(HandleId(42)).is_err());
    }
}
