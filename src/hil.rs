//! Contracts between the engine and the USB peripheral driver.
//!
//! The peripheral driver owns the hardware endpoint objects and implements
//! [`UsbEndpoint`] for each direction of each endpoint it exposes, plus
//! [`UsbController`] for the device-level hooks. The engine borrows endpoint
//! handles through the pool and never outlives the driver.

use crate::errorcode::ErrorCode;
use crate::utilities::cells::VolatileCell;

/// Endpoint transfer types, encoded as in descriptor `bmAttributes`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransferType {
    Control = 0,
    Isochronous,
    Bulk,
    Interrupt,
}

/// Direction of a transfer, from the host's point of view.
///
/// Encoded in bit 7 of both `bmRequestType` and endpoint wire addresses:
/// 0 is OUT (host to device), 1 is IN (device to host).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransferDirection {
    HostToDevice = 0,
    DeviceToHost = 1,
}

/// The direction(s) a pool slot's hardware endpoint can serve.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EndpointDirection {
    Out,
    In,
    /// The endpoint pair supports allocation in either direction.
    InOut,
}

impl EndpointDirection {
    pub fn serves(&self, direction: TransferDirection) -> bool {
        match self {
            EndpointDirection::Out => direction == TransferDirection::HostToDevice,
            EndpointDirection::In => direction == TransferDirection::DeviceToHost,
            EndpointDirection::InOut => true,
        }
    }
}

/// Coarse transfer state of an endpoint, as reported by the hardware driver.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    /// A transfer has been issued and its completion callback has not fired.
    Busy,
    Stalled,
}

/// One direction of one hardware endpoint.
///
/// Handles are owned by the peripheral driver for the lifetime of the device;
/// the engine and device classes only ever borrow them. A transfer issued
/// here completes by the driver invoking the engine's matching completion
/// entry point, typically from interrupt context.
pub trait UsbEndpoint {
    /// Hardware endpoint number, 0..=15.
    fn number(&self) -> u8;

    fn direction(&self) -> TransferDirection;

    /// Configure transfer type and packet size. Called during endpoint
    /// binding, not per transfer.
    fn configure(&self, transfer_type: TransferType, max_packet_size: u16)
        -> Result<(), ErrorCode>;

    /// The endpoint's packet buffer. Volatile: the controller DMAs into and
    /// out of this memory.
    fn buffer(&self) -> &[VolatileCell<u8>];

    fn max_packet_size(&self) -> u16;

    /// Start a transfer: send `len` bytes from the buffer (IN endpoints) or
    /// arm reception of up to `len` bytes into it (OUT endpoints).
    fn transfer(&self, len: usize) -> Result<(), ErrorCode>;

    /// Send (IN) or accept (OUT) a zero-length packet.
    fn transfer_zlp(&self) -> Result<(), ErrorCode>;

    fn transfer_state(&self) -> TransferState;

    fn stall(&self);

    fn clear_stall(&self);

    fn is_stalled(&self) -> bool {
        self.transfer_state() == TransferState::Stalled
    }
}

/// Device-level hooks implemented by the peripheral driver.
pub trait UsbController {
    /// Commit a device address assigned by SET_ADDRESS.
    ///
    /// The engine calls this only after the status stage of the request has
    /// completed on the wire; the device must keep answering at the old
    /// address until then.
    fn set_address(&self, addr: u16);

    /// SET_FEATURE(DEVICE_REMOTE_WAKEUP) was received.
    fn enable_remote_wakeup(&self) {}

    /// CLEAR_FEATURE(DEVICE_REMOTE_WAKEUP) was received.
    fn disable_remote_wakeup(&self) {}
}

/// Compose a wire endpoint address from a number and direction.
pub fn endpoint_address(number: u8, direction: TransferDirection) -> u8 {
    (number & 0xf) | ((direction as u8) << 7)
}

/// Split a wire endpoint address into its direction and number.
pub fn decode_endpoint_address(address: u8) -> (TransferDirection, u8) {
    let direction = if address & 0x80 != 0 {
        TransferDirection::DeviceToHost
    } else {
        TransferDirection::HostToDevice
    };
    (direction, address & 0xf)
}
