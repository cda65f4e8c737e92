//! Binary Object Store descriptor aggregation and vendor-request routing.
//!
//! Protocol extensions contribute self-describing device-capability blocks
//! (platform capabilities, USB 2.0 extension, ...). The manager concatenates
//! them into one BOS descriptor, injecting a default USB 2.0 extension block
//! when no contributor supplies one, and chains vendor control requests
//! across the registered capabilities first-match-wins.

use core::cell::Cell;

use crate::descriptors::{put_u16, DescriptorType, SetupData};
use crate::errorcode::ErrorCode;
use crate::utilities::cells::OptionalCell;

pub const MAX_CAPABILITIES: usize = 8;
pub const BOS_BUFLEN: usize = 128;

/// bDevCapabilityType of the USB 2.0 extension capability.
const USB2_EXTENSION: u8 = 0x02;

/// A reply to a vendor request: data the device should write to the host,
/// if any.
#[derive(Copy, Clone, Default)]
pub struct VendorReply<'a> {
    pub write_data: Option<&'a [u8]>,
}

/// A device capability contributed to the BOS descriptor.
pub trait BosCapability {
    /// The complete, length-prefixed capability block
    /// (`[bLength, bDescriptorType=0x10, bDevCapabilityType, ...]`).
    fn capability_bytes(&self) -> &[u8];

    /// Offer a vendor control request to this capability.
    ///
    /// `Err(NoSupport)` means "not mine, try the next capability"; any other
    /// error aborts the chain.
    fn vendor_request(&self, setup: &SetupData) -> Result<VendorReply<'_>, ErrorCode> {
        let _ = setup;
        Err(ErrorCode::NoSupport)
    }
}

pub struct BosManager<'a> {
    capabilities: [OptionalCell<&'a dyn BosCapability>; MAX_CAPABILITIES],
    buffer: [Cell<u8>; BOS_BUFLEN],
}

impl<'a> BosManager<'a> {
    pub fn new() -> Self {
        BosManager {
            capabilities: core::array::from_fn(|_| OptionalCell::empty()),
            buffer: [0u8; BOS_BUFLEN].map(Cell::new),
        }
    }

    /// Register a capability. Overflowing the table is an integration bug.
    pub fn add_capability(&self, capability: &'a dyn BosCapability) {
        let slot = self
            .capabilities
            .iter()
            .find(|c| c.is_none())
            .expect("BOS capability table full");
        slot.set(capability);
    }

    /// The assembly buffer the engine copies the built descriptor out of.
    pub fn buffer(&self) -> &[Cell<u8>] {
        &self.buffer
    }

    /// Assemble the BOS descriptor into the buffer and return its length:
    /// the 5-byte header, then every capability block in registration order,
    /// then a synthetic USB 2.0 extension block if no contributor supplied
    /// one.
    pub fn build_descriptor(&self) -> usize {
        let mut total = 5;
        let mut count: u8 = 0;
        let mut have_usb2_extension = false;

        for cap in self.registered() {
            let block = cap.capability_bytes();
            assert!(block.len() >= 3, "malformed capability block");
            if block[1] == DescriptorType::DeviceCapability as u8 && block[2] == USB2_EXTENSION {
                have_usb2_extension = true;
            }
            total += block.len();
            count += 1;
        }
        if !have_usb2_extension {
            total += 7;
            count += 1;
        }
        assert!(total <= self.buffer.len(), "BOS descriptor too long");

        self.buffer[0].set(5);
        self.buffer[1].set(DescriptorType::Bos as u8);
        put_u16(&self.buffer[2..4], total as u16);
        self.buffer[4].set(count);

        let mut offset = 5;
        for cap in self.registered() {
            for byte in cap.capability_bytes() {
                self.buffer[offset].set(*byte);
                offset += 1;
            }
        }
        if !have_usb2_extension {
            // USB 2.0 extension with no attribute bits set.
            for byte in [7, DescriptorType::DeviceCapability as u8, USB2_EXTENSION, 0, 0, 0, 0] {
                self.buffer[offset].set(byte);
                offset += 1;
            }
        }

        total
    }

    /// Offer a vendor request to each capability in registration order; the
    /// first handler that accepts it wins. `Err(NoDevice)` when every
    /// capability declined.
    pub fn dispatch_vendor_request(
        &self,
        setup: &SetupData,
    ) -> Result<VendorReply<'a>, ErrorCode> {
        for cap in self.registered() {
            match cap.vendor_request(setup) {
                Ok(reply) => return Ok(reply),
                Err(ErrorCode::NoSupport) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(ErrorCode::NoDevice)
    }

    fn registered(&self) -> impl Iterator<Item = &'a dyn BosCapability> + '_ {
        self.capabilities.iter().filter_map(|c| c.extract())
    }
}

impl Default for BosManager<'_> {
    fn default() -> Self {
        Self::new()
    }
}
