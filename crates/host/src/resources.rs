//! Per-device resource manager
//!
//! Tracks everything a device holds on the backend: the open handle, the
//! claimed interfaces, the active configuration and the per-configuration
//! caches used to route transfers. Exactly one manager exists per
//! [`Device`](crate::Device) and it is never shared.
//!
//! Invariants:
//! - the handle is open whenever any interface is claimed
//! - an interface number is claimed on the backend at most once
//! - explicit claims nest: the backend release happens when the last
//!   explicit claim is released, or on dispose
//! - changing configuration drops the alternate-setting and endpoint-type
//!   caches but keeps the handle open

use crate::backend::{Backend, DeviceId, HandleId};
use crate::descriptors::{InterfaceRef, InterfaceWalk};
use crate::error::{Result, UsbError};
use protocol::{ConfigurationDescriptor, TransferType};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

/// How an operation names the interface it works on
#[derive(Debug, Clone, Copy)]
pub(crate) enum InterfaceTarget<'r> {
    /// Resolve a default (see each operation)
    Default,
    /// `bInterfaceNumber`
    Number(u8),
    /// An interface already located in the descriptor tree
    Resolved(&'r InterfaceRef),
}

impl From<Option<u8>> for InterfaceTarget<'_> {
    fn from(number: Option<u8>) -> Self {
        number.map_or(InterfaceTarget::Default, InterfaceTarget::Number)
    }
}

/// Snapshot of a manager's bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResourceState {
    pub handle_open: bool,
    /// Logical index of the cached active configuration
    pub active_configuration: Option<u8>,
    /// Claimed `bInterfaceNumber` values, ascending
    pub claimed_interfaces: Vec<u8>,
    /// (`bInterfaceNumber`, `bAlternateSetting`) pairs, ascending
    pub alternate_settings: Vec<(u8, u8)>,
    pub cached_endpoint_types: usize,
}

impl ResourceState {
    /// True when nothing is held and nothing is cached
    pub fn is_clear(&self) -> bool {
        *self == ResourceState::default()
    }
}

pub(crate) struct ResourceManager {
    backend: Arc<dyn Backend>,
    dev: DeviceId,
    num_configurations: u8,
    handle: Option<HandleId>,
    active_config: Option<u8>,
    /// bInterfaceNumber -> claim depth
    claimed: BTreeMap<u8, usize>,
    /// bInterfaceNumber -> bAlternateSetting
    alternates: HashMap<u8, u8>,
    /// (bEndpointAddress, bInterfaceNumber, bAlternateSetting) -> type
    endpoint_types: HashMap<(u8, u8, u8), TransferType>,
}

impl ResourceManager {
    pub fn new(backend: Arc<dyn Backend>, dev: DeviceId, num_configurations: u8) -> Self {
        Self {
            backend,
            dev,
            num_configurations,
            handle: None,
            active_config: None,
            claimed: BTreeMap::new(),
            alternates: HashMap::new(),
            endpoint_types: HashMap::new(),
        }
    }

    pub fn state(&self) -> ResourceState {
        let mut alternate_settings: Vec<(u8, u8)> =
            self.alternates.iter().map(|(n, a)| (*n, *a)).collect();
        alternate_settings.sort_unstable();
        ResourceState {
            handle_open: self.handle.is_some(),
            active_configuration: self.active_config,
            claimed_interfaces: self.claimed.keys().copied().collect(),
            alternate_settings,
            cached_endpoint_types: self.endpoint_types.len(),
        }
    }

    /// Open the handle if needed and return it
    pub fn open(&mut self) -> Result<HandleId> {
        if let Some(handle) = self.handle {
            return Ok(handle);
        }
        let handle = self.backend.open_device(self.dev)?;
        debug!("Opened {:?} ({:?})", self.dev, handle);
        self.handle = Some(handle);
        Ok(handle)
    }

    /// Close the handle if open
    pub fn close(&mut self) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            // Claims die with the handle
            self.claimed.clear();
            self.backend.close_device(handle)?;
            debug!("Closed {:?} ({:?})", self.dev, handle);
        }
        Ok(())
    }

    fn configuration_by_value(&self, value: u8) -> Result<Option<(u8, ConfigurationDescriptor)>> {
        for index in 0..self.num_configurations {
            let descriptor = self.backend.get_configuration_descriptor(self.dev, index)?;
            if descriptor.configuration_value == value {
                return Ok(Some((index, descriptor)));
            }
        }
        Ok(None)
    }

    /// Activate a configuration by `bConfigurationValue`
    ///
    /// `None` selects the first configuration; `Some(0)` unconfigures the
    /// device.
    pub fn set_configuration(&mut self, value: Option<u8>) -> Result<()> {
        let (index, value) = match value {
            None => {
                let first = self.backend.get_configuration_descriptor(self.dev, 0)?;
                (Some(0), first.configuration_value)
            }
            Some(0) => (None, 0),
            Some(v) => match self.configuration_by_value(v)? {
                Some((index, _)) => (Some(index), v),
                None => return Err(UsbError::InvalidConfiguration(v)),
            },
        };

        let handle = self.open()?;
        debug!("Setting configuration {} on {:?}", value, self.dev);
        self.backend.set_configuration(handle, value)?;

        self.active_config = index;
        self.alternates.clear();
        self.endpoint_types.clear();
        Ok(())
    }

    /// Active configuration as (logical index, descriptor)
    pub fn get_active_configuration(&mut self) -> Result<(u8, ConfigurationDescriptor)> {
        if let Some(index) = self.active_config {
            let descriptor = self.backend.get_configuration_descriptor(self.dev, index)?;
            return Ok((index, descriptor));
        }

        let handle = self.open()?;
        let value = self.backend.get_configuration(handle)?;
        if value == 0 {
            return Err(UsbError::ConfigurationNotSet);
        }
        let (index, descriptor) = self
            .configuration_by_value(value)?
            .ok_or(UsbError::ConfigurationNotSet)?;
        debug!("Active configuration of {:?} is {}", self.dev, value);
        self.active_config = Some(index);
        Ok((index, descriptor))
    }

    /// Interface currently considered active for `target`
    ///
    /// `Default` names the first interface of the active configuration. A
    /// number resolves to the cached alternate setting; without one, to the
    /// first alternate found for that number, which is not necessarily the
    /// alternate the device is using.
    pub fn get_interface(&mut self, target: InterfaceTarget<'_>) -> Result<InterfaceRef> {
        let (config, descriptor) = self.get_active_configuration()?;
        let number = match target {
            InterfaceTarget::Resolved(found) => return Ok(found.clone()),
            InterfaceTarget::Number(n) => n,
            InterfaceTarget::Default => {
                self.backend
                    .get_interface_descriptor(self.dev, 0, 0, config)?
                    .interface_number
            }
        };
        let wanted_alt = self.alternates.get(&number).copied();

        let walk = InterfaceWalk::new(
            self.backend.as_ref(),
            self.dev,
            config,
            descriptor.num_interfaces,
        );
        for found in walk {
            let found = found?;
            if found.descriptor.interface_number == number
                && wanted_alt.is_none_or(|alt| found.descriptor.alternate_setting == alt)
            {
                return Ok(found);
            }
        }

        Err(UsbError::InvalidInterface {
            number,
            alternate: wanted_alt,
        })
    }

    /// `bInterfaceNumber` named by `target`
    ///
    /// `Default` means interface 0 of the first configuration.
    fn interface_number(&self, target: InterfaceTarget<'_>) -> Result<u8> {
        match target {
            InterfaceTarget::Resolved(found) => Ok(found.descriptor.interface_number),
            InterfaceTarget::Number(n) => Ok(n),
            InterfaceTarget::Default => Ok(self
                .backend
                .get_interface_descriptor(self.dev, 0, 0, 0)?
                .interface_number),
        }
    }

    /// Claim on the backend unless already claimed
    fn acquire(&mut self, number: u8) -> Result<&mut usize> {
        let handle = self.open()?;
        if !self.claimed.contains_key(&number) {
            self.backend.claim_interface(handle, number)?;
            debug!("Claimed interface {} on {:?}", number, self.dev);
        }
        Ok(self.claimed.entry(number).or_insert(0))
    }

    /// Claim an interface explicitly
    ///
    /// Only the first claim reaches the backend; each further claim must be
    /// matched by a release before the interface is given back.
    pub fn claim_interface(&mut self, target: InterfaceTarget<'_>) -> Result<()> {
        let number = self.interface_number(target)?;
        *self.acquire(number)? += 1;
        Ok(())
    }

    /// Make sure an interface is claimed without adding a claim level
    pub fn ensure_claimed(&mut self, target: InterfaceTarget<'_>) -> Result<()> {
        let number = self.interface_number(target)?;
        let depth = self.acquire(number)?;
        *depth = (*depth).max(1);
        Ok(())
    }

    /// Drop one claim level, releasing on the backend with the last one
    ///
    /// Releasing an interface that is not claimed does nothing.
    pub fn release_interface(&mut self, target: InterfaceTarget<'_>) -> Result<()> {
        let number = self.interface_number(target)?;
        let Some(depth) = self.claimed.get_mut(&number) else {
            return Ok(());
        };
        if *depth > 1 {
            *depth -= 1;
            return Ok(());
        }
        let handle = self.open()?;
        self.backend.release_interface(handle, number)?;
        debug!("Released interface {} on {:?}", number, self.dev);
        self.claimed.remove(&number);
        Ok(())
    }

    /// Select an alternate setting, claiming the interface first
    ///
    /// A missing alternate defaults to the one `get_interface` resolves.
    pub fn set_interface_altsetting(
        &mut self,
        target: InterfaceTarget<'_>,
        alternate: Option<u8>,
    ) -> Result<()> {
        let current = self.get_interface(target)?;
        let number = current.descriptor.interface_number;
        let alt = alternate.unwrap_or(current.descriptor.alternate_setting);

        if alt != current.descriptor.alternate_setting {
            let num_interfaces = self
                .backend
                .get_configuration_descriptor(self.dev, current.config)?
                .num_interfaces;
            let mut walk = InterfaceWalk::new(
                self.backend.as_ref(),
                self.dev,
                current.config,
                num_interfaces,
            );
            let exists = walk.try_fold(false, |hit, found| {
                found.map(|f| {
                    hit || (f.descriptor.interface_number == number
                        && f.descriptor.alternate_setting == alt)
                })
            })?;
            if !exists {
                return Err(UsbError::InvalidInterface {
                    number,
                    alternate: Some(alt),
                });
            }
        }

        self.ensure_claimed(InterfaceTarget::Number(number))?;
        let handle = self.open()?;
        debug!(
            "Setting interface {} alternate {} on {:?}",
            number, alt, self.dev
        );
        self.backend.set_interface_altsetting(handle, number, alt)?;
        self.alternates.insert(number, alt);
        Ok(())
    }

    /// Transfer type of `address` on `interface`, cached per alternate
    pub fn get_endpoint_type(&mut self, address: u8, interface: &InterfaceRef) -> Result<TransferType> {
        let key = (
            address,
            interface.descriptor.interface_number,
            interface.descriptor.alternate_setting,
        );
        if let Some(kind) = self.endpoint_types.get(&key) {
            return Ok(*kind);
        }

        for index in 0..interface.descriptor.num_endpoints {
            let endpoint = self.backend.get_endpoint_descriptor(
                self.dev,
                index,
                interface.index,
                interface.alt_index,
                interface.config,
            )?;
            if endpoint.endpoint_address == address {
                let kind = endpoint.transfer_type();
                self.endpoint_types.insert(key, kind);
                return Ok(kind);
            }
        }
        Err(UsbError::InvalidEndpoint(address))
    }

    /// Release every claimed interface, continuing past failures
    ///
    /// Returns the first error encountered.
    pub fn release_all_interfaces(&mut self) -> Result<()> {
        let claimed = std::mem::take(&mut self.claimed);
        let Some(handle) = self.handle else {
            return Ok(());
        };

        let mut first_error = None;
        for number in claimed.into_keys() {
            match self.backend.release_interface(handle, number) {
                Ok(()) => debug!("Released interface {} on {:?}", number, self.dev),
                Err(e) => {
                    warn!("Failed to release interface {} on {:?}: {}", number, self.dev, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Release everything, optionally close the handle, and drop all caches
    ///
    /// Safe to call repeatedly and on a manager that never opened anything.
    pub fn dispose(&mut self, close_handle: bool) -> Result<()> {
        let mut result = self.release_all_interfaces();
        if close_handle {
            if let Err(e) = self.close() {
                warn!("Failed to close {:?}: {}", self.dev, e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        self.endpoint_types.clear();
        self.alternates.clear();
        self.active_config = None;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::loopback::{LoopbackBackend, LoopbackDevice};
    use crate::error::TransportErrorKind;

    fn manager() -> (Arc<LoopbackBackend>, ResourceManager) {
        let backend = Arc::new(LoopbackBackend::new(vec![LoopbackDevice::bulk_loopback(
            0x1234, 0x5678,
        )]));
        let rm = ResourceManager::new(backend.clone(), DeviceId(0), 1);
        (backend, rm)
    }

    #[test]
    fn test_open_is_idempotent() {
        let (backend, mut rm) = manager();
        let first = rm.open().unwrap();
        let second = rm.open().unwrap();
        assert_eq!(first, second);
        assert_eq!(backend.calls("open_device"), 1);
    }

    #[test]
    fn test_close_without_open() {
        let (backend, mut rm) = manager();
        rm.close().unwrap();
        rm.close().unwrap();
        assert_eq!(backend.calls("close_device"), 0);
    }

    #[test]
    fn test_close_drops_claims() {
        let (_backend, mut rm) = manager();
        rm.claim_interface(InterfaceTarget::Number(0)).unwrap();
        rm.close().unwrap();
        let state = rm.state();
        assert!(!state.handle_open);
        assert!(state.claimed_interfaces.is_empty());
    }

    #[test]
    fn test_claims_nest() {
        let (backend, mut rm) = manager();
        rm.claim_interface(InterfaceTarget::Number(0)).unwrap();
        rm.claim_interface(InterfaceTarget::Number(0)).unwrap();
        assert_eq!(backend.calls("claim_interface"), 1);

        rm.release_interface(InterfaceTarget::Number(0)).unwrap();
        assert_eq!(rm.state().claimed_interfaces, vec![0]);
        assert_eq!(backend.calls("release_interface"), 0);

        rm.release_interface(InterfaceTarget::Number(0)).unwrap();
        assert!(rm.state().claimed_interfaces.is_empty());
        assert_eq!(backend.calls("release_interface"), 1);
    }

    #[test]
    fn test_implicit_claim_adds_no_level() {
        let (backend, mut rm) = manager();
        rm.ensure_claimed(InterfaceTarget::Number(0)).unwrap();
        rm.ensure_claimed(InterfaceTarget::Number(0)).unwrap();
        rm.release_interface(InterfaceTarget::Number(0)).unwrap();
        assert_eq!(backend.calls("claim_interface"), 1);
        assert_eq!(backend.calls("release_interface"), 1);
    }

    #[test]
    fn test_default_claim_uses_first_interface() {
        let (backend, mut rm) = manager();
        rm.claim_interface(InterfaceTarget::Default).unwrap();
        assert_eq!(rm.state().claimed_interfaces, vec![0]);
        assert_eq!(backend.claimed_interfaces(DeviceId(0)), vec![0]);
    }

    #[test]
    fn test_set_configuration_unknown_value() {
        let (backend, mut rm) = manager();
        let err = rm.set_configuration(Some(7)).unwrap_err();
        assert_eq!(err, UsbError::InvalidConfiguration(7));
        assert_eq!(backend.calls("set_configuration"), 0);
    }

    #[test]
    fn test_unconfigure() {
        let (backend, mut rm) = manager();
        rm.set_configuration(Some(0)).unwrap();
        assert_eq!(backend.active_configuration(DeviceId(0)), Some(0));
        assert_eq!(rm.state().active_configuration, None);
        assert_eq!(
            rm.get_active_configuration().unwrap_err(),
            UsbError::ConfigurationNotSet
        );
    }

    #[test]
    fn test_active_configuration_from_backend() {
        let (backend, mut rm) = manager();
        let (index, descriptor) = rm.get_active_configuration().unwrap();
        assert_eq!(index, 0);
        assert_eq!(descriptor.configuration_value, 1);
        rm.get_active_configuration().unwrap();
        assert_eq!(backend.calls("get_configuration"), 1);
    }

    #[test]
    fn test_unknown_interface_number() {
        let (_backend, mut rm) = manager();
        let err = rm.get_interface(InterfaceTarget::Number(4)).unwrap_err();
        assert_eq!(
            err,
            UsbError::InvalidInterface {
                number: 4,
                alternate: None
            }
        );
    }

    #[test]
    fn test_endpoint_type_cached() {
        let (backend, mut rm) = manager();
        let intf = rm.get_interface(InterfaceTarget::Default).unwrap();
        assert_eq!(rm.get_endpoint_type(0x81, &intf).unwrap(), TransferType::Bulk);
        let queries = backend.calls("get_endpoint_descriptor");
        assert_eq!(rm.get_endpoint_type(0x81, &intf).unwrap(), TransferType::Bulk);
        assert_eq!(backend.calls("get_endpoint_descriptor"), queries);
        assert_eq!(rm.state().cached_endpoint_types, 1);
    }

    #[test]
    fn test_unknown_endpoint() {
        let (_backend, mut rm) = manager();
        let intf = rm.get_interface(InterfaceTarget::Default).unwrap();
        assert_eq!(
            rm.get_endpoint_type(0x82, &intf).unwrap_err(),
            UsbError::InvalidEndpoint(0x82)
        );
    }

    #[test]
    fn test_invalid_alternate_rejected() {
        let (backend, mut rm) = manager();
        let err = rm
            .set_interface_altsetting(InterfaceTarget::Number(0), Some(3))
            .unwrap_err();
        assert_eq!(
            err,
            UsbError::InvalidInterface {
                number: 0,
                alternate: Some(3)
            }
        );
        assert_eq!(backend.calls("set_interface_altsetting"), 0);
    }

    #[test]
    fn test_dispose_continues_past_release_failure() {
        let (backend, mut rm) = manager();
        rm.claim_interface(InterfaceTarget::Number(0)).unwrap();
        backend.fail_on("release_interface", TransportErrorKind::NoDevice);

        let err = rm.dispose(true).unwrap_err();
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::NoDevice));
        assert_eq!(backend.calls("close_device"), 1);
        assert!(rm.state().is_clear());
    }

    #[test]
    fn test_dispose_keeps_handle_when_asked() {
        let (backend, mut rm) = manager();
        rm.claim_interface(InterfaceTarget::Number(0)).unwrap();
        rm.dispose(false).unwrap();
        let state = rm.state();
        assert!(state.handle_open);
        assert!(state.claimed_interfaces.is_empty());
        assert_eq!(backend.calls("close_device"), 0);
    }
}
