//! Device-side engine of a USB 2.0 peripheral stack.
//!
//! This crate owns the control-transfer (endpoint 0) protocol state machine,
//! the assembly of device/configuration/string/BOS descriptors, and the
//! allocation of hardware endpoint resources to pluggable device classes.
//!
//! The hardware itself is an external collaborator: the peripheral driver
//! implements [`hil::UsbEndpoint`] for each endpoint direction it exposes and
//! [`hil::UsbController`] for the device-address commit hook, and delivers
//! SETUP packets and transfer-complete events to [`device::DeviceCore`].
//! Device classes (serial, HID, audio, vendor probes) implement
//! [`configuration::ConfigurationItem`] and never touch endpoint 0 directly.
//!
//! Everything here is single-threaded and reactive: the engine only advances
//! inside the event entry points, never blocks, and issues at most one
//! outgoing transfer per event. The peripheral driver must serialize event
//! delivery, which every USB device controller does in its normal operating
//! mode.

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

pub mod bos;
pub mod configuration;
pub mod descriptors;
pub mod device;
pub mod endpoint_pool;
pub mod errorcode;
pub mod hil;
pub mod strings;
pub mod utilities;

#[cfg(test)]
mod testutil;

pub use errorcode::ErrorCode;
