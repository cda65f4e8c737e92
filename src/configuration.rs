//! The capability interface implemented by protocol extensions and the
//! per-configuration assembly and endpoint-binding logic.
//!
//! A `ConfigurationItem` is one pluggable device class: it contributes
//! interface/endpoint/class descriptor bytes, binds hardware endpoints while
//! its configuration is active, and optionally answers class requests and
//! alternate-setting queries for the interfaces it owns. Items are owned by
//! the application's composition root; the engine only borrows them.

use core::cell::Cell;

use crate::bos::BosCapability;
use crate::descriptors::{
    ConfigurationAttributes, ConfigurationDescriptor, Descriptor, SetupData,
};
use crate::endpoint_pool::EndpointAllocator;
use crate::errorcode::ErrorCode;

/// Assembly buffer size for a full configuration descriptor.
pub const CONFIG_BUFLEN: usize = 256;

/// Proof that a class-request hook is being driven by the control engine.
///
/// Only `DeviceCore` can construct one, so items cannot invoke each other's
/// request hooks directly.
pub struct ControlToken(pub(crate) ());

/// An item's answer to a class request: at most one of a buffer the device
/// should read host data into, or data the device should write to the host.
#[derive(Copy, Clone, Default)]
pub struct ClassReply<'a> {
    /// Receive the request's data phase into this buffer, then hand it to
    /// `class_data_out`.
    pub read_buffer: Option<&'a [Cell<u8>]>,
    /// Send this data back to the host.
    pub write_data: Option<&'a [u8]>,
    /// Call `class_data_in_complete` once `write_data` has gone out and the
    /// status stage finished.
    pub notify_complete: bool,
}

/// One protocol extension's contribution to a configuration.
pub trait ConfigurationItem<'a> {
    /// Number of interfaces this item occupies, contiguously from the
    /// `first_interface` number it is given. Must be at least 1.
    fn interface_count(&self) -> u8;

    /// Whether the item's descriptors include an interface association
    /// descriptor grouping its interfaces.
    fn uses_iad(&self) -> bool {
        false
    }

    /// Byte length of everything `write_descriptors` emits.
    fn descriptor_size(&self) -> usize;

    /// Emit the item's interface/class/endpoint descriptor blocks, numbering
    /// its interfaces upward from `first_interface`.
    fn write_descriptors(&self, first_interface: u8, buf: &[Cell<u8>]) -> usize;

    /// Claim hardware endpoints for the active configuration.
    fn bind_endpoints(
        &'a self,
        _pool: &dyn EndpointAllocator<'a>,
        _first_interface: u8,
    ) -> Result<(), ErrorCode> {
        Ok(())
    }

    /// Return endpoints claimed by `bind_endpoints`.
    fn release_endpoints(&'a self, _pool: &dyn EndpointAllocator<'a>) {}

    /// Whether the item currently owns the endpoint with this wire address.
    fn owns_endpoint(&self, _address: u8) -> bool {
        false
    }

    /// Patch the serialized 18-byte device descriptor. Only consulted for a
    /// single-item, single-interface, non-IAD configuration.
    fn override_device_descriptor(&self, _buf: &[Cell<u8>]) -> Result<(), ErrorCode> {
        Err(ErrorCode::NoSupport)
    }

    /// GET_INTERFACE: report the active alternate setting of one of this
    /// item's interfaces (relative to its first interface).
    fn interface_alt(&self, _interface: u8) -> Result<u8, ErrorCode> {
        Err(ErrorCode::NoSupport)
    }

    /// SET_INTERFACE: select an alternate setting.
    fn set_interface_alt(&self, _interface: u8, _alternate: u8) -> Result<(), ErrorCode> {
        Err(ErrorCode::NoSupport)
    }

    /// Serve a class-specific GET_DESCRIPTOR (HID report descriptors and the
    /// like) into `buf`, returning the length written.
    fn class_descriptor(
        &self,
        _descriptor_type: u8,
        _index: u8,
        _buf: &[Cell<u8>],
    ) -> Result<usize, ErrorCode> {
        Err(ErrorCode::Inval)
    }

    /// Handle a class request addressed to one of this item's interfaces or
    /// endpoints.
    fn class_request(
        &'a self,
        _setup: &SetupData,
        _token: &ControlToken,
    ) -> Result<ClassReply<'a>, ErrorCode> {
        Err(ErrorCode::NoSupport)
    }

    /// Data-phase completion for a class control write: `len` bytes from the
    /// host are in `buf` (the buffer the item supplied in its reply).
    fn class_data_out(&'a self, _request_code: u8, _buf: &[Cell<u8>], _len: usize, _token: &ControlToken) {
    }

    /// The data and status phases of a class control read finished; only
    /// called when the reply set `notify_complete`.
    fn class_data_in_complete(&'a self, _request_code: u8, _token: &ControlToken) {}

    /// A BOS device capability contributed by this item, if any. The
    /// composition root registers it with the `BosManager`.
    fn bos_capability(&'a self) -> Option<&'a dyn BosCapability> {
        None
    }
}

/// Owns the per-configuration item lists, detects composite-device status,
/// assembles the full configuration descriptor, switches the active
/// configuration and binds/releases its endpoints.
pub struct ConfigurationManager<'a> {
    /// One item list per configuration index, in interface order.
    configs: &'a [&'a [&'a dyn ConfigurationItem<'a>]],
    pool: &'a dyn EndpointAllocator<'a>,
    self_powered: bool,
    remote_wakeup: bool,
    /// In 2 mA units.
    max_power: u8,
    /// 0-based active configuration index.
    current: Cell<usize>,
    bound: Cell<bool>,
    buffer: [Cell<u8>; CONFIG_BUFLEN],
}

impl<'a> ConfigurationManager<'a> {
    pub fn new(
        configs: &'a [&'a [&'a dyn ConfigurationItem<'a>]],
        pool: &'a dyn EndpointAllocator<'a>,
        self_powered: bool,
        remote_wakeup: bool,
        max_power: u8,
    ) -> Self {
        assert!(!configs.is_empty(), "at least one configuration is required");
        for items in configs {
            for item in items.iter() {
                // A zero-interface item would alias the next item's
                // interface-number range; reject the configuration outright
                // instead of resolving lookups by first match.
                assert!(item.interface_count() >= 1, "item declares no interfaces");
            }
        }
        ConfigurationManager {
            configs,
            pool,
            self_powered,
            remote_wakeup,
            max_power,
            current: Cell::new(0),
            bound: Cell::new(false),
            buffer: [0u8; CONFIG_BUFLEN].map(Cell::new),
        }
    }

    pub fn num_configurations(&self) -> u8 {
        self.configs.len() as u8
    }

    /// The 1-based value of the active configuration, as reported to
    /// GET_CONFIGURATION.
    pub fn current_config(&self) -> u8 {
        self.current.get() as u8 + 1
    }

    fn items(&self) -> &'a [&'a dyn ConfigurationItem<'a>] {
        self.configs[self.current.get()]
    }

    /// A device is composite when its active configuration carries more than
    /// one item, any item spans several interfaces, or any item groups
    /// interfaces with an association descriptor.
    pub fn is_composite(&self) -> bool {
        let items = self.items();
        items.len() > 1
            || items
                .iter()
                .any(|item| item.interface_count() > 1 || item.uses_iad())
    }

    /// GET_STATUS(device) payload: bit 0 self-powered, bit 1 remote wakeup.
    pub fn device_status(&self) -> u16 {
        (self.self_powered as u16) | ((self.remote_wakeup as u16) << 1)
    }

    /// Activate configuration `value` (1-based): release the old
    /// configuration's endpoints, update the index, bind the new ones.
    pub fn switch_config(&'a self, value: u8) -> Result<(), ErrorCode> {
        if value == 0 || value as usize > self.configs.len() {
            return Err(ErrorCode::NoDevice);
        }
        self.unbind_endpoints();
        self.current.set(value as usize - 1);
        self.bind_endpoints()
    }

    /// Bind every active item's endpoints, in registration order, handing
    /// each its first interface number. A second call while bound is a
    /// no-op.
    pub fn bind_endpoints(&'a self) -> Result<(), ErrorCode> {
        if self.bound.get() {
            return Ok(());
        }
        let mut first_interface = 0;
        for item in self.items() {
            item.bind_endpoints(self.pool, first_interface)?;
            first_interface += item.interface_count();
        }
        self.bound.set(true);
        Ok(())
    }

    /// Release every active item's endpoints. A second call while unbound is
    /// a no-op.
    pub fn unbind_endpoints(&'a self) {
        if !self.bound.get() {
            return;
        }
        for item in self.items() {
            item.release_endpoints(self.pool);
        }
        self.bound.set(false);
    }

    /// The assembly buffer `generate` fills.
    pub fn buffer(&self) -> &[Cell<u8>] {
        &self.buffer
    }

    /// Assemble the active configuration's full descriptor.
    pub fn generate(&self) -> Result<usize, ErrorCode> {
        self.generate_for(self.current.get())
    }

    /// Assemble the descriptor of configuration `index` (0-based descriptor
    /// index, as hosts request them) without changing the active
    /// configuration.
    pub fn generate_for(&self, index: usize) -> Result<usize, ErrorCode> {
        let items = *self.configs.get(index).ok_or(ErrorCode::NoDevice)?;

        let related: usize = items.iter().map(|item| item.descriptor_size()).sum();
        if 9 + related > self.buffer.len() {
            return Err(ErrorCode::Size);
        }
        let num_interfaces: u8 = items.iter().map(|item| item.interface_count()).sum();

        let header = ConfigurationDescriptor {
            num_interfaces,
            configuration_value: index as u8 + 1,
            string_index: 0,
            attributes: ConfigurationAttributes::new(self.self_powered, self.remote_wakeup),
            max_power: self.max_power,
            related_descriptor_length: related,
        };
        let mut len = header.write_to(&self.buffer);

        let mut first_interface = 0;
        for item in items {
            len += item.write_descriptors(first_interface, &self.buffer[len..]);
            first_interface += item.interface_count();
        }
        debug_assert_eq!(len, 9 + related);
        Ok(len)
    }

    /// Let the single item of a non-composite configuration patch the
    /// serialized device descriptor. Composite configurations cannot
    /// override it.
    pub fn override_device_descriptor(&self, buf: &[Cell<u8>]) -> Result<(), ErrorCode> {
        if self.is_composite() {
            return Err(ErrorCode::NoSupport);
        }
        self.items()[0].override_device_descriptor(buf)
    }

    /// Resolve an interface number to the active item owning it plus that
    /// item's first interface number.
    pub fn find_by_interface(
        &self,
        interface: u8,
    ) -> Result<(&'a dyn ConfigurationItem<'a>, u8), ErrorCode> {
        let mut first_interface = 0;
        for item in self.items() {
            let next = first_interface + item.interface_count();
            if interface < next {
                return Ok((*item, first_interface));
            }
            first_interface = next;
        }
        Err(ErrorCode::NoDevice)
    }

    /// Resolve an endpoint wire address to the active item owning it.
    pub fn find_by_endpoint(
        &self,
        address: u8,
    ) -> Result<&'a dyn ConfigurationItem<'a>, ErrorCode> {
        self.items()
            .iter()
            .find(|item| item.owns_endpoint(address))
            .copied()
            .ok_or(ErrorCode::NoDevice)
    }
}
