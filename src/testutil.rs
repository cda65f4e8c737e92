//! Host-side test doubles: a scriptable endpoint, a recording controller,
//! and a configurable configuration item.

use core::cell::{Cell, RefCell};

use vcell::VolatileCell;

use crate::configuration::{ClassReply, ConfigurationItem, ControlToken};
use crate::descriptors::{Descriptor, InterfaceDescriptor, SetupData};
use crate::endpoint_pool::EndpointAllocator;
use crate::errorcode::ErrorCode;
use crate::hil::{
    endpoint_address, TransferDirection, TransferState, TransferType, UsbController, UsbEndpoint,
};

/// What a `FakeEndpoint` was asked to do, in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EpEvent {
    /// An IN transfer was issued; the bytes are a snapshot of the packet
    /// buffer at that moment.
    In(Vec<u8>),
    /// An OUT endpoint was armed to receive up to this many bytes.
    OutArmed(usize),
    Zlp,
}

/// A software endpoint that records every transfer instead of touching
/// hardware.
pub struct FakeEndpoint {
    number: u8,
    direction: TransferDirection,
    buffer: Vec<VolatileCell<u8>>,
    mps: u16,
    stalled: Cell<bool>,
    pub configured: Cell<Option<(TransferType, u16)>>,
    pub events: RefCell<Vec<EpEvent>>,
}

impl FakeEndpoint {
    pub fn new(number: u8, direction: TransferDirection) -> Self {
        FakeEndpoint {
            number,
            direction,
            buffer: (0..64).map(|_| VolatileCell::new(0)).collect(),
            mps: 64,
            stalled: Cell::new(false),
            configured: Cell::new(None),
            events: RefCell::new(Vec::new()),
        }
    }

    /// Drain and return everything recorded so far.
    pub fn take_events(&self) -> Vec<EpEvent> {
        self.events.borrow_mut().drain(..).collect()
    }

    /// Place host data in the packet buffer, as the controller would after
    /// an OUT packet arrives.
    pub fn host_write(&self, data: &[u8]) {
        for (cell, byte) in self.buffer.iter().zip(data) {
            cell.set(*byte);
        }
    }
}

impl UsbEndpoint for FakeEndpoint {
    fn number(&self) -> u8 {
        self.number
    }

    fn direction(&self) -> TransferDirection {
        self.direction
    }

    fn configure(
        &self,
        transfer_type: TransferType,
        max_packet_size: u16,
    ) -> Result<(), ErrorCode> {
        self.configured.set(Some((transfer_type, max_packet_size)));
        Ok(())
    }

    fn buffer(&self) -> &[VolatileCell<u8>] {
        &self.buffer
    }

    fn max_packet_size(&self) -> u16 {
        self.mps
    }

    fn transfer(&self, len: usize) -> Result<(), ErrorCode> {
        let event = match self.direction {
            TransferDirection::DeviceToHost => {
                EpEvent::In(self.buffer[..len].iter().map(|c| c.get()).collect())
            }
            TransferDirection::HostToDevice => EpEvent::OutArmed(len),
        };
        self.events.borrow_mut().push(event);
        Ok(())
    }

    fn transfer_zlp(&self) -> Result<(), ErrorCode> {
        self.events.borrow_mut().push(EpEvent::Zlp);
        Ok(())
    }

    fn transfer_state(&self) -> TransferState {
        if self.stalled.get() {
            TransferState::Stalled
        } else {
            TransferState::Idle
        }
    }

    fn stall(&self) {
        self.stalled.set(true);
    }

    fn clear_stall(&self) {
        self.stalled.set(false);
    }
}

/// Records the device-level hooks the engine invokes.
pub struct FakeController {
    pub addresses: RefCell<Vec<u16>>,
    pub remote_wakeup: Cell<bool>,
}

impl FakeController {
    pub fn new() -> Self {
        FakeController {
            addresses: RefCell::new(Vec::new()),
            remote_wakeup: Cell::new(false),
        }
    }
}

impl UsbController for FakeController {
    fn set_address(&self, addr: u16) {
        self.addresses.borrow_mut().push(addr);
    }

    fn enable_remote_wakeup(&self) {
        self.remote_wakeup.set(true);
    }

    fn disable_remote_wakeup(&self) {
        self.remote_wakeup.set(false);
    }
}

/// A configuration item whose every behavior is set by the test.
///
/// Fields are public; tests fill in what they need before sharing the item
/// and inspect the recording fields afterwards.
pub struct TestItem<'a> {
    pub interfaces: u8,
    pub iad: bool,
    /// Endpoints to claim on bind, as (direction, preferred number) pairs.
    pub wants: Vec<(TransferDirection, Option<u8>)>,
    pub claimed: RefCell<Vec<&'a dyn UsbEndpoint>>,
    /// Endpoint wire addresses reported as owned even without claiming.
    pub owned: Vec<u8>,
    pub supports_alt: bool,
    pub alt: Cell<u8>,
    pub class_desc: Option<Vec<u8>>,
    pub device_patch: Option<(usize, u8)>,
    /// Reply to class requests, unless `class_err` is set.
    pub reply_write: Option<Vec<u8>>,
    pub read_buf: Option<Vec<Cell<u8>>>,
    pub notify: bool,
    pub class_err: Option<ErrorCode>,
    // Recordings.
    pub first_interfaces: RefCell<Vec<u8>>,
    pub bind_calls: Cell<usize>,
    pub release_calls: Cell<usize>,
    pub class_requests: RefCell<Vec<u8>>,
    pub data_out: RefCell<Vec<(u8, Vec<u8>)>>,
    pub completions: RefCell<Vec<u8>>,
}

impl TestItem<'_> {
    pub fn with_interfaces(interfaces: u8) -> Self {
        TestItem {
            interfaces,
            iad: false,
            wants: Vec::new(),
            claimed: RefCell::new(Vec::new()),
            owned: Vec::new(),
            supports_alt: false,
            alt: Cell::new(0),
            class_desc: None,
            device_patch: None,
            reply_write: None,
            read_buf: None,
            notify: false,
            class_err: None,
            first_interfaces: RefCell::new(Vec::new()),
            bind_calls: Cell::new(0),
            release_calls: Cell::new(0),
            class_requests: RefCell::new(Vec::new()),
            data_out: RefCell::new(Vec::new()),
            completions: RefCell::new(Vec::new()),
        }
    }
}

impl<'a> ConfigurationItem<'a> for TestItem<'a> {
    fn interface_count(&self) -> u8 {
        self.interfaces
    }

    fn uses_iad(&self) -> bool {
        self.iad
    }

    fn descriptor_size(&self) -> usize {
        9 * self.interfaces as usize
    }

    fn write_descriptors(&self, first_interface: u8, buf: &[Cell<u8>]) -> usize {
        self.first_interfaces.borrow_mut().push(first_interface);
        let mut len = 0;
        for i in 0..self.interfaces {
            let d = InterfaceDescriptor {
                interface_number: first_interface + i,
                ..InterfaceDescriptor::default()
            };
            len += d.write_to(&buf[len..]);
        }
        len
    }

    fn bind_endpoints(
        &'a self,
        pool: &dyn EndpointAllocator<'a>,
        _first_interface: u8,
    ) -> Result<(), ErrorCode> {
        self.bind_calls.set(self.bind_calls.get() + 1);
        for (direction, number) in &self.wants {
            let ep = pool.get(*direction, *number)?;
            ep.configure(TransferType::Bulk, ep.max_packet_size())?;
            self.claimed.borrow_mut().push(ep);
        }
        Ok(())
    }

    fn release_endpoints(&'a self, pool: &dyn EndpointAllocator<'a>) {
        self.release_calls.set(self.release_calls.get() + 1);
        for ep in self.claimed.borrow_mut().drain(..) {
            let _ = pool.release(ep);
        }
    }

    fn owns_endpoint(&self, address: u8) -> bool {
        self.owned.contains(&address)
            || self
                .claimed
                .borrow()
                .iter()
                .any(|ep| endpoint_address(ep.number(), ep.direction()) == address)
    }

    fn override_device_descriptor(&self, buf: &[Cell<u8>]) -> Result<(), ErrorCode> {
        match self.device_patch {
            Some((offset, value)) => {
                buf[offset].set(value);
                Ok(())
            }
            None => Err(ErrorCode::NoSupport),
        }
    }

    fn interface_alt(&self, _interface: u8) -> Result<u8, ErrorCode> {
        if self.supports_alt {
            Ok(self.alt.get())
        } else {
            Err(ErrorCode::NoSupport)
        }
    }

    fn set_interface_alt(&self, _interface: u8, alternate: u8) -> Result<(), ErrorCode> {
        if self.supports_alt {
            self.alt.set(alternate);
            Ok(())
        } else {
            Err(ErrorCode::NoSupport)
        }
    }

    fn class_descriptor(
        &self,
        _descriptor_type: u8,
        _index: u8,
        buf: &[Cell<u8>],
    ) -> Result<usize, ErrorCode> {
        match &self.class_desc {
            Some(bytes) => {
                for (cell, byte) in buf.iter().zip(bytes) {
                    cell.set(*byte);
                }
                Ok(bytes.len())
            }
            None => Err(ErrorCode::Inval),
        }
    }

    fn class_request(
        &'a self,
        setup: &SetupData,
        _token: &ControlToken,
    ) -> Result<ClassReply<'a>, ErrorCode> {
        self.class_requests.borrow_mut().push(setup.request_code);
        if let Some(err) = self.class_err {
            return Err(err);
        }
        Ok(ClassReply {
            read_buffer: self.read_buf.as_deref(),
            write_data: self.reply_write.as_deref(),
            notify_complete: self.notify,
        })
    }

    fn class_data_out(&'a self, request_code: u8, buf: &[Cell<u8>], len: usize, _token: &ControlToken) {
        let bytes = buf[..len].iter().map(|c| c.get()).collect();
        self.data_out.borrow_mut().push((request_code, bytes));
    }

    fn class_data_in_complete(&'a self, request_code: u8, _token: &ControlToken) {
        self.completions.borrow_mut().push(request_code);
    }
}
