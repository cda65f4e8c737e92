//! The endpoint-0 control-transfer engine.
//!
//! `DeviceCore` owns the SETUP/DATA/STATUS state machine: it parses SETUP
//! packets, serves the standard request set from the descriptor components,
//! routes class requests to the owning configuration item, and chunks
//! multi-packet data stages through the EP0 packet buffers. The peripheral
//! driver feeds it three events: a SETUP packet arrived, an EP0-IN transfer
//! completed, an EP0-OUT transfer completed.
//!
//! Error recovery is uniform: any request the device cannot serve stalls
//! both EP0 directions, and the next SETUP packet clears the stalls and
//! starts fresh.

use core::cell::Cell;

use crate::bos::BosManager;
use crate::configuration::{ConfigurationItem, ConfigurationManager, ControlToken};
use crate::descriptors::{
    Descriptor, DescriptorType, DeviceDescriptor, FeatureSelector, Recipient, RequestType,
    SetupData, StandardRequest,
};
use crate::endpoint_pool::EndpointAllocator;
use crate::errorcode::ErrorCode;
use crate::hil::{TransferDirection, UsbController};
use crate::strings::DescriptorStrings;
use crate::utilities::cells::OptionalCell;

/// EP0 staging buffer size; bounds every control-transfer data stage.
pub const EP0_BUFLEN: usize = 256;

/// Where an EP0 direction is in the current control transfer. SETUP is the
/// event that starts a transfer, not a resting state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum CtrlState {
    Unknown,
    /// IN data stage in progress, more packets queued.
    DataIn,
    /// The terminal zero-length packet of an IN data stage is in flight.
    Zlp,
    /// Device-side status ZLP in flight; side effects commit on completion.
    StatusIn,
    /// OUT data stage in progress.
    DataOut,
    /// Armed to accept the host's status ZLP.
    StatusOut,
}

/// How vendor-typed control requests are routed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VendorPolicy {
    /// Stall every vendor request.
    NotSupported,
    /// Offer device-to-host vendor requests to the registered BOS
    /// capabilities (Microsoft OS 2.0 style descriptor retrieval).
    BosDispatch,
}

/// A class request whose data or status stage is still outstanding.
#[derive(Copy, Clone)]
struct PendingClass<'a> {
    item: &'a dyn ConfigurationItem<'a>,
    request_code: u8,
    notify: bool,
}

/// An OUT data stage in progress, accumulating into the item's buffer.
#[derive(Copy, Clone)]
struct PendingRead<'a> {
    buf: &'a [Cell<u8>],
    expected: usize,
}

pub struct DeviceCore<'a, U: UsbController> {
    pool: &'a dyn EndpointAllocator<'a>,
    config: &'a ConfigurationManager<'a>,
    strings: &'a DescriptorStrings<'a>,
    bos: &'a BosManager<'a>,
    controller: &'a U,
    device_descriptor: DeviceDescriptor,
    vendor_policy: VendorPolicy,
    /// Data stages are staged here and copied to the endpoint packet buffer
    /// one max-packet at a time.
    buffer: [Cell<u8>; EP0_BUFLEN],
    in_state: Cell<CtrlState>,
    out_state: Cell<CtrlState>,
    write_start: Cell<usize>,
    write_end: Cell<usize>,
    write_zlp: Cell<bool>,
    /// SET_ADDRESS value awaiting its status stage.
    pending_address: OptionalCell<u16>,
    pending_class: OptionalCell<PendingClass<'a>>,
    pending_read: OptionalCell<PendingRead<'a>>,
    read_received: Cell<usize>,
}

impl<'a, U: UsbController> DeviceCore<'a, U> {
    pub fn new(
        pool: &'a dyn EndpointAllocator<'a>,
        config: &'a ConfigurationManager<'a>,
        strings: &'a DescriptorStrings<'a>,
        bos: &'a BosManager<'a>,
        controller: &'a U,
        device_descriptor: DeviceDescriptor,
        vendor_policy: VendorPolicy,
    ) -> Self {
        device_descriptor.validate();
        DeviceCore {
            pool,
            config,
            strings,
            bos,
            controller,
            device_descriptor,
            vendor_policy,
            buffer: [0u8; EP0_BUFLEN].map(Cell::new),
            in_state: Cell::new(CtrlState::Unknown),
            out_state: Cell::new(CtrlState::Unknown),
            write_start: Cell::new(0),
            write_end: Cell::new(0),
            write_zlp: Cell::new(false),
            pending_address: OptionalCell::empty(),
            pending_class: OptionalCell::empty(),
            pending_read: OptionalCell::empty(),
            read_received: Cell::new(0),
        }
    }

    /// A bus reset puts EP0 back in its ground state. The active
    /// configuration is left alone; the host re-enumerates explicitly.
    pub fn on_bus_reset(&self) {
        self.pool.ep0_in().clear_stall();
        self.pool.ep0_out().clear_stall();
        self.reset_control_state();
    }

    /// A SETUP packet arrived. Any transfer still in progress is abandoned;
    /// SETUP always wins.
    pub fn on_setup_packet(&self, setup: &SetupData) {
        let ep_in = self.pool.ep0_in();
        let ep_out = self.pool.ep0_out();
        if ep_in.is_stalled() {
            ep_in.clear_stall();
        }
        if ep_out.is_stalled() {
            ep_out.clear_stall();
        }
        self.reset_control_state();

        let result = match setup.request_type.request_type() {
            RequestType::Standard => self.handle_standard_request(setup),
            RequestType::Class => self.handle_class_request(setup),
            RequestType::Vendor => self.handle_vendor_request(setup),
            RequestType::Reserved => Err(ErrorCode::NoSupport),
        };
        if let Err(err) = result {
            log::warn!(
                "stalling control request {:?} code {:#04x}: {:?}",
                setup.request_type,
                setup.request_code,
                err
            );
            self.stall_both();
        }
    }

    /// An EP0-IN transfer finished: continue the data stage, or commit the
    /// side effects that were waiting on the status stage.
    pub fn on_ep0_in_complete(&self) {
        let result = match self.in_state.get() {
            CtrlState::DataIn => self.continue_write(),
            CtrlState::Zlp => self.arm_status_out(),
            CtrlState::StatusIn => {
                self.in_state.set(CtrlState::Unknown);
                self.pending_address
                    .take()
                    .map(|addr| self.controller.set_address(addr));
                Ok(())
            }
            _ => Ok(()),
        };
        if result.is_err() {
            self.stall_both();
        }
    }

    /// An EP0-OUT transfer finished with `packet_bytes` of payload:
    /// accumulate an OUT data stage, or close out a control read's status
    /// stage.
    pub fn on_ep0_out_complete(&self, packet_bytes: usize) {
        match self.out_state.get() {
            CtrlState::StatusOut => {
                self.out_state.set(CtrlState::Unknown);
                self.pending_class.take().map(|pending| {
                    if pending.notify {
                        pending
                            .item
                            .class_data_in_complete(pending.request_code, &ControlToken(()));
                    }
                });
            }
            CtrlState::DataOut => {
                if self.continue_read(packet_bytes).is_err() {
                    self.stall_both();
                }
            }
            _ => {}
        }
    }

    fn reset_control_state(&self) {
        self.in_state.set(CtrlState::Unknown);
        self.out_state.set(CtrlState::Unknown);
        self.write_start.set(0);
        self.write_end.set(0);
        self.write_zlp.set(false);
        self.pending_address.clear();
        self.pending_class.clear();
        self.pending_read.clear();
        self.read_received.set(0);
    }

    fn stall_both(&self) {
        self.pool.ep0_in().stall();
        self.pool.ep0_out().stall();
        self.reset_control_state();
    }

    fn handle_standard_request(&self, setup: &SetupData) -> Result<(), ErrorCode> {
        let request = setup.get_standard_request().ok_or(ErrorCode::NoSupport)?;
        match request {
            StandardRequest::GetDescriptor {
                descriptor_type,
                descriptor_index,
                lang_id,
                requested_length,
            } => self.handle_get_descriptor(
                descriptor_type,
                descriptor_index,
                lang_id,
                requested_length,
            ),
            StandardRequest::SetAddress { device_address } => {
                // Committed from the status-stage completion; replying at
                // the new address before the host ACKs would lose the reply.
                self.pending_address.set(device_address);
                self.send_status_in()
            }
            StandardRequest::SetConfiguration {
                configuration_value,
            } => {
                if configuration_value == 0 {
                    // Returning to the unconfigured state is not supported.
                    return Err(ErrorCode::NoSupport);
                }
                self.config.switch_config(configuration_value)?;
                log::debug!("configuration {} active", configuration_value);
                self.send_status_in()
            }
            StandardRequest::GetConfiguration => {
                self.buffer[0].set(self.config.current_config());
                self.start_write(1, setup.length)
            }
            StandardRequest::GetStatus { recipient_index } => {
                self.handle_get_status(setup.request_type.recipient(), recipient_index, setup.length)
            }
            StandardRequest::ClearFeature {
                feature,
                recipient_index,
            } => self.handle_feature(false, feature, setup.request_type.recipient(), recipient_index),
            StandardRequest::SetFeature {
                feature,
                recipient_index,
                ..
            } => self.handle_feature(true, feature, setup.request_type.recipient(), recipient_index),
            StandardRequest::GetInterface { interface } => {
                let (item, first_interface) = self.config.find_by_interface(interface as u8)?;
                let alt = item.interface_alt(interface as u8 - first_interface)?;
                self.buffer[0].set(alt);
                self.start_write(1, setup.length)
            }
            StandardRequest::SetInterface {
                interface,
                alternate_setting,
            } => {
                let (item, first_interface) = self.config.find_by_interface(interface as u8)?;
                item.set_interface_alt(interface as u8 - first_interface, alternate_setting)?;
                self.send_status_in()
            }
            StandardRequest::SetDescriptor { .. } | StandardRequest::SynchFrame { .. } => {
                Err(ErrorCode::NoSupport)
            }
        }
    }

    fn handle_get_descriptor(
        &self,
        descriptor_type: u8,
        descriptor_index: u8,
        lang_id: u16,
        requested_length: u16,
    ) -> Result<(), ErrorCode> {
        match DescriptorType::from_byte(descriptor_type) {
            Some(DescriptorType::Device) => {
                // Serialized fresh each time so an item's override never
                // contaminates the base descriptor.
                let len = self.device_descriptor.write_to(&self.buffer);
                match self.config.override_device_descriptor(&self.buffer[..len]) {
                    Ok(()) | Err(ErrorCode::NoSupport) => {}
                    Err(err) => return Err(err),
                }
                self.start_write(len, requested_length)
            }
            Some(DescriptorType::Configuration) => {
                let len = self.config.generate_for(descriptor_index as usize)?;
                self.stage(self.config.buffer(), len)?;
                self.start_write(len, requested_length)
            }
            Some(DescriptorType::String) => {
                let len = if descriptor_index == 0 {
                    self.strings.lang_id_data()
                } else {
                    self.strings.generate_string(descriptor_index, lang_id)?
                };
                self.stage(self.strings.buffer(), len)?;
                self.start_write(len, requested_length)
            }
            Some(DescriptorType::Bos) => {
                let len = self.bos.build_descriptor();
                self.stage(self.bos.buffer(), len)?;
                self.start_write(len, requested_length)
            }
            // Class-specific types (HID, report, CS interface, unknown
            // codes) belong to whichever item owns the target interface.
            None
            | Some(DescriptorType::Hid)
            | Some(DescriptorType::Report)
            | Some(DescriptorType::CsInterface) => {
                let (item, _) = self.config.find_by_interface(lang_id as u8)?;
                let len = item.class_descriptor(descriptor_type, descriptor_index, &self.buffer)?;
                self.start_write(len, requested_length)
            }
            Some(_) => Err(ErrorCode::NoSupport),
        }
    }

    fn handle_get_status(
        &self,
        recipient: Recipient,
        index: u16,
        requested_length: u16,
    ) -> Result<(), ErrorCode> {
        let status: u16 = match recipient {
            Recipient::Device => self.config.device_status(),
            Recipient::Interface => {
                self.config.find_by_interface(index as u8)?;
                0
            }
            Recipient::Endpoint => {
                let ep = self.pool.find_by_address(index as u8)?;
                ep.is_stalled() as u16
            }
            _ => return Err(ErrorCode::Inval),
        };
        self.buffer[0].set(status as u8);
        self.buffer[1].set((status >> 8) as u8);
        self.start_write(2, requested_length)
    }

    fn handle_feature(
        &self,
        set: bool,
        feature: FeatureSelector,
        recipient: Recipient,
        index: u16,
    ) -> Result<(), ErrorCode> {
        match (feature, recipient) {
            (FeatureSelector::EndpointHalt, Recipient::Endpoint) => {
                let ep = self.pool.find_by_address(index as u8)?;
                if set {
                    ep.stall();
                } else {
                    ep.clear_stall();
                }
                self.send_status_in()
            }
            (FeatureSelector::DeviceRemoteWakeup, Recipient::Device) => {
                if set {
                    self.controller.enable_remote_wakeup();
                } else {
                    self.controller.disable_remote_wakeup();
                }
                self.send_status_in()
            }
            _ => Err(ErrorCode::Inval),
        }
    }

    fn handle_class_request(&self, setup: &SetupData) -> Result<(), ErrorCode> {
        let item = match setup.request_type.recipient() {
            Recipient::Interface => self.config.find_by_interface(setup.index as u8)?.0,
            Recipient::Endpoint => self.config.find_by_endpoint(setup.index as u8)?,
            _ => return Err(ErrorCode::NoSupport),
        };
        let reply = item.class_request(setup, &ControlToken(()))?;

        match (reply.read_buffer, reply.write_data) {
            (Some(_), Some(_)) => Err(ErrorCode::Inval),
            (None, Some(data)) => {
                self.stage_bytes(data)?;
                if reply.notify_complete {
                    self.pending_class.set(PendingClass {
                        item,
                        request_code: setup.request_code,
                        notify: true,
                    });
                }
                self.start_write(data.len(), setup.length)
            }
            (Some(buf), None) => {
                if setup.length == 0 {
                    return Err(ErrorCode::Inval);
                }
                let expected = (setup.length as usize).min(buf.len());
                self.pending_read.set(PendingRead { buf, expected });
                self.read_received.set(0);
                self.pending_class.set(PendingClass {
                    item,
                    request_code: setup.request_code,
                    notify: false,
                });
                let ep = self.pool.ep0_out();
                let mps = ep.max_packet_size() as usize;
                ep.transfer(expected.min(mps))?;
                self.out_state.set(CtrlState::DataOut);
                Ok(())
            }
            (None, None) => self.send_status_in(),
        }
    }

    fn handle_vendor_request(&self, setup: &SetupData) -> Result<(), ErrorCode> {
        match self.vendor_policy {
            VendorPolicy::NotSupported => Err(ErrorCode::NoSupport),
            VendorPolicy::BosDispatch => {
                if setup.request_type.transfer_direction() != TransferDirection::DeviceToHost {
                    return Err(ErrorCode::NoSupport);
                }
                match setup.request_type.recipient() {
                    Recipient::Device | Recipient::Interface => {}
                    _ => return Err(ErrorCode::NoSupport),
                }
                let reply = self.bos.dispatch_vendor_request(setup)?;
                let data = reply.write_data.ok_or(ErrorCode::NoSupport)?;
                self.stage_bytes(data)?;
                self.start_write(data.len(), setup.length)
            }
        }
    }

    /// Copy `len` bytes out of a component's generation buffer into the EP0
    /// staging buffer.
    fn stage(&self, source: &[Cell<u8>], len: usize) -> Result<(), ErrorCode> {
        if len > self.buffer.len() {
            return Err(ErrorCode::Size);
        }
        for i in 0..len {
            self.buffer[i].set(source[i].get());
        }
        Ok(())
    }

    fn stage_bytes(&self, data: &[u8]) -> Result<(), ErrorCode> {
        if data.len() > self.buffer.len() {
            return Err(ErrorCode::Size);
        }
        for (cell, byte) in self.buffer.iter().zip(data) {
            cell.set(*byte);
        }
        Ok(())
    }

    /// Begin an IN data stage of `len` staged bytes, capped to what the
    /// host asked for. A zero-length stage is a protocol violation.
    fn start_write(&self, len: usize, requested_length: u16) -> Result<(), ErrorCode> {
        let len = len.min(requested_length as usize);
        if len == 0 {
            return Err(ErrorCode::Inval);
        }
        let mps = self.pool.ep0_in().max_packet_size() as usize;
        self.write_start.set(0);
        self.write_end.set(len);
        // A stage that is an exact multiple of the packet size needs a
        // zero-length packet so the host sees the end of it.
        self.write_zlp.set(len % mps == 0);
        self.send_in_chunk()
    }

    fn send_in_chunk(&self) -> Result<(), ErrorCode> {
        let ep = self.pool.ep0_in();
        let mps = ep.max_packet_size() as usize;
        let start = self.write_start.get();
        let chunk = (self.write_end.get() - start).min(mps);
        let packet = ep.buffer();
        for i in 0..chunk {
            packet[i].set(self.buffer[start + i].get());
        }
        ep.transfer(chunk)?;
        self.write_start.set(start + chunk);
        self.in_state.set(CtrlState::DataIn);
        Ok(())
    }

    fn continue_write(&self) -> Result<(), ErrorCode> {
        if self.write_start.get() < self.write_end.get() {
            self.send_in_chunk()
        } else if self.write_zlp.get() {
            self.write_zlp.set(false);
            self.pool.ep0_in().transfer_zlp()?;
            self.in_state.set(CtrlState::Zlp);
            Ok(())
        } else {
            self.arm_status_out()
        }
    }

    fn continue_read(&self, packet_bytes: usize) -> Result<(), ErrorCode> {
        let read = self.pending_read.extract().ok_or(ErrorCode::Fail)?;
        let pending = self.pending_class.extract().ok_or(ErrorCode::Fail)?;
        let ep = self.pool.ep0_out();
        let mps = ep.max_packet_size() as usize;

        let received = self.read_received.get();
        let n = packet_bytes.min(read.buf.len() - received);
        let packet = ep.buffer();
        for i in 0..n {
            read.buf[received + i].set(packet[i].get());
        }
        let received = received + n;
        self.read_received.set(received);

        // A short packet or the full expected count ends the data stage.
        if received >= read.expected || packet_bytes < mps {
            pending
                .item
                .class_data_out(pending.request_code, read.buf, received, &ControlToken(()));
            self.pending_read.clear();
            self.pending_class.clear();
            self.out_state.set(CtrlState::Unknown);
            self.send_status_in()
        } else {
            let remaining = read.expected - received;
            ep.transfer(remaining.min(mps))
        }
    }

    fn send_status_in(&self) -> Result<(), ErrorCode> {
        self.pool.ep0_in().transfer_zlp()?;
        self.in_state.set(CtrlState::StatusIn);
        Ok(())
    }

    fn arm_status_out(&self) -> Result<(), ErrorCode> {
        self.in_state.set(CtrlState::Unknown);
        self.pool.ep0_out().transfer_zlp()?;
        self.out_state.set(CtrlState::StatusOut);
        Ok(())
    }
}
