//! Fixed-capacity registry of borrowed hardware endpoint handles.
//!
//! The peripheral driver owns the endpoint objects; the pool lends them to
//! configuration items while a configuration is bound and takes them back
//! when it is torn down. Allocation only happens at bind/unbind time, never
//! per transfer. The two endpoint-0 handles live outside the normal slots
//! and are never lent out.

use core::cell::Cell;

use crate::errorcode::ErrorCode;
use crate::hil::{decode_endpoint_address, EndpointDirection, TransferDirection, UsbEndpoint};

/// One allocatable endpoint handle and the direction(s) it can serve.
pub struct PoolEntry<'a> {
    pub endpoint: &'a dyn UsbEndpoint,
    pub direction: EndpointDirection,
}

struct Slot<'a> {
    endpoint: &'a dyn UsbEndpoint,
    direction: EndpointDirection,
    claimed: Cell<bool>,
}

/// Object-safe allocation view of the pool, handed to configuration items
/// through their bind/release hooks so the item trait does not carry the
/// pool's size parameter.
pub trait EndpointAllocator<'a> {
    /// Lend out an unclaimed handle serving `direction`, constrained to a
    /// specific endpoint number when `number` is given. `Err(NoDevice)` on
    /// exhaustion; never fatal.
    fn get(
        &self,
        direction: TransferDirection,
        number: Option<u8>,
    ) -> Result<&'a dyn UsbEndpoint, ErrorCode>;

    /// Return a previously lent handle.
    fn release(&self, endpoint: &dyn UsbEndpoint) -> Result<(), ErrorCode>;

    /// Resolve a wire endpoint address (IN bit 7 + number) to a claimed
    /// handle or one of the EP0 pair.
    fn find_by_address(&self, address: u8) -> Result<&'a dyn UsbEndpoint, ErrorCode>;

    fn ep0_in(&self) -> &'a dyn UsbEndpoint;

    fn ep0_out(&self) -> &'a dyn UsbEndpoint;
}

pub struct EndpointPool<'a, const N: usize> {
    slots: [Slot<'a>; N],
    ep0_in: Cell<&'a dyn UsbEndpoint>,
    ep0_out: Cell<&'a dyn UsbEndpoint>,
}

impl<'a, const N: usize> EndpointPool<'a, N> {
    pub fn new(
        entries: [PoolEntry<'a>; N],
        ep0_in: &'a dyn UsbEndpoint,
        ep0_out: &'a dyn UsbEndpoint,
    ) -> Self {
        EndpointPool {
            slots: entries.map(|e| Slot {
                endpoint: e.endpoint,
                direction: e.direction,
                claimed: Cell::new(false),
            }),
            ep0_in: Cell::new(ep0_in),
            ep0_out: Cell::new(ep0_out),
        }
    }

    /// Replace the EP0 IN handle (e.g. after a controller re-init).
    pub fn set_ep0_in(&self, endpoint: &'a dyn UsbEndpoint) {
        self.ep0_in.set(endpoint);
    }

    /// Replace the EP0 OUT handle.
    pub fn set_ep0_out(&self, endpoint: &'a dyn UsbEndpoint) {
        self.ep0_out.set(endpoint);
    }

    fn matches(slot: &Slot<'a>, endpoint: &dyn UsbEndpoint) -> bool {
        slot.endpoint.number() == endpoint.number()
            && slot.endpoint.direction() == endpoint.direction()
    }
}

impl<'a, const N: usize> EndpointAllocator<'a> for EndpointPool<'a, N> {
    fn get(
        &self,
        direction: TransferDirection,
        number: Option<u8>,
    ) -> Result<&'a dyn UsbEndpoint, ErrorCode> {
        for slot in self.slots.iter() {
            if slot.claimed.get() {
                continue;
            }
            if !slot.direction.serves(direction) {
                continue;
            }
            if let Some(n) = number {
                if slot.endpoint.number() != n {
                    continue;
                }
            }
            slot.claimed.set(true);
            return Ok(slot.endpoint);
        }
        Err(ErrorCode::NoDevice)
    }

    fn release(&self, endpoint: &dyn UsbEndpoint) -> Result<(), ErrorCode> {
        for slot in self.slots.iter() {
            if slot.claimed.get() && Self::matches(slot, endpoint) {
                slot.claimed.set(false);
                return Ok(());
            }
        }
        Err(ErrorCode::NoDevice)
    }

    fn find_by_address(&self, address: u8) -> Result<&'a dyn UsbEndpoint, ErrorCode> {
        let (direction, number) = decode_endpoint_address(address);
        if number == 0 {
            return Ok(match direction {
                TransferDirection::DeviceToHost => self.ep0_in.get(),
                TransferDirection::HostToDevice => self.ep0_out.get(),
            });
        }
        for slot in self.slots.iter() {
            if slot.claimed.get()
                && slot.endpoint.number() == number
                && slot.endpoint.direction() == direction
            {
                return Ok(slot.endpoint);
            }
        }
        Err(ErrorCode::NoDevice)
    }

    fn ep0_in(&self) -> &'a dyn UsbEndpoint {
        self.ep0_in.get()
    }

    fn ep0_out(&self) -> &'a dyn UsbEndpoint {
        self.ep0_out.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hil::endpoint_address;
    use crate::testutil::FakeEndpoint;

    fn pool_fixture<'a>(
        eps: &'a [FakeEndpoint; 4],
        ep0_in: &'a FakeEndpoint,
        ep0_out: &'a FakeEndpoint,
    ) -> EndpointPool<'a, 4> {
        EndpointPool::new(
            [
                PoolEntry {
                    endpoint: &eps[0],
                    direction: EndpointDirection::In,
                },
                PoolEntry {
                    endpoint: &eps[1],
                    direction: EndpointDirection::Out,
                },
                PoolEntry {
                    endpoint: &eps[2],
                    direction: EndpointDirection::InOut,
                },
                PoolEntry {
                    endpoint: &eps[3],
                    direction: EndpointDirection::In,
                },
            ],
            ep0_in,
            ep0_out,
        )
    }

    fn endpoints() -> [FakeEndpoint; 4] {
        [
            FakeEndpoint::new(1, TransferDirection::DeviceToHost),
            FakeEndpoint::new(1, TransferDirection::HostToDevice),
            FakeEndpoint::new(2, TransferDirection::DeviceToHost),
            FakeEndpoint::new(3, TransferDirection::DeviceToHost),
        ]
    }

    fn ep0_pair() -> (FakeEndpoint, FakeEndpoint) {
        (
            FakeEndpoint::new(0, TransferDirection::DeviceToHost),
            FakeEndpoint::new(0, TransferDirection::HostToDevice),
        )
    }

    #[test]
    fn get_then_release_then_get_succeeds() {
        let eps = endpoints();
        let (ep0_in, ep0_out) = ep0_pair();
        let pool = pool_fixture(&eps, &ep0_in, &ep0_out);

        let ep = pool.get(TransferDirection::DeviceToHost, Some(1)).unwrap();
        assert_eq!(ep.number(), 1);
        pool.release(ep).unwrap();
        let again = pool.get(TransferDirection::DeviceToHost, Some(1)).unwrap();
        assert_eq!(again.number(), 1);
    }

    #[test]
    fn claimed_slot_is_not_lent_twice() {
        let eps = endpoints();
        let (ep0_in, ep0_out) = ep0_pair();
        let pool = pool_fixture(&eps, &ep0_in, &ep0_out);

        pool.get(TransferDirection::DeviceToHost, Some(1)).unwrap();
        assert_eq!(
            pool.get(TransferDirection::DeviceToHost, Some(1)).err().unwrap(),
            ErrorCode::NoDevice
        );
    }

    #[test]
    fn auto_number_skips_mismatched_direction() {
        let eps = endpoints();
        let (ep0_in, ep0_out) = ep0_pair();
        let pool = pool_fixture(&eps, &ep0_in, &ep0_out);

        // First IN slot is number 1; OUT request must land on slot 1 (ep 1
        // OUT) even though the IN slot precedes it.
        let ep = pool.get(TransferDirection::HostToDevice, None).unwrap();
        assert_eq!(ep.number(), 1);
        assert_eq!(ep.direction(), TransferDirection::HostToDevice);
    }

    #[test]
    fn in_out_slot_serves_either_direction() {
        let eps = endpoints();
        let (ep0_in, ep0_out) = ep0_pair();
        let pool = pool_fixture(&eps, &ep0_in, &ep0_out);

        let ep = pool.get(TransferDirection::HostToDevice, Some(2)).unwrap();
        assert_eq!(ep.number(), 2);
    }

    #[test]
    fn release_of_unclaimed_handle_is_not_found() {
        let eps = endpoints();
        let (ep0_in, ep0_out) = ep0_pair();
        let pool = pool_fixture(&eps, &ep0_in, &ep0_out);

        assert_eq!(pool.release(&eps[0]).unwrap_err(), ErrorCode::NoDevice);
    }

    #[test]
    fn find_by_address_decodes_direction_bit() {
        let eps = endpoints();
        let (ep0_in, ep0_out) = ep0_pair();
        let pool = pool_fixture(&eps, &ep0_in, &ep0_out);

        pool.get(TransferDirection::DeviceToHost, Some(1)).unwrap();
        let ep = pool.find_by_address(0x81).unwrap();
        assert_eq!(ep.number(), 1);
        assert_eq!(ep.direction(), TransferDirection::DeviceToHost);
        // Unbound endpoints do not resolve.
        assert_eq!(pool.find_by_address(0x01).err().unwrap(), ErrorCode::NoDevice);
    }

    #[test]
    fn find_by_address_resolves_ep0() {
        let eps = endpoints();
        let (ep0_in, ep0_out) = ep0_pair();
        let pool = pool_fixture(&eps, &ep0_in, &ep0_out);

        let found = pool
            .find_by_address(endpoint_address(0, TransferDirection::DeviceToHost))
            .unwrap();
        assert_eq!(found.number(), 0);
        assert_eq!(found.direction(), TransferDirection::DeviceToHost);
    }
}
