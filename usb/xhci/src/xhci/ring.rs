use std::mem;

use common::dma::{Dma, DmaPool};
use log::trace;

use super::trb::Trb;
use crate::error::{Result, XhciError};

/// Rings are allocated 64-byte aligned and must not cross a 64 KiB boundary. See XHCI Table 6-1
pub const RING_ALIGN: usize = 64;
pub const RING_BOUNDARY: usize = 0x1_0000;

/// A producer ring: the command ring or one endpoint's transfer ring.
///
/// The last slot permanently holds a Link TRB pointing back at slot 0 with Toggle Cycle set, so
/// the usable capacity is one less than the number of slots. There is no check that the
/// controller has consumed a slot before it is overwritten.
pub struct Ring {
    trbs: Dma<[Trb]>,
    i: usize,
    cycle: bool,
}

impl Ring {
    pub fn new(pool: &DmaPool, len: usize) -> Result<Ring> {
        if len < 2 {
            return Err(XhciError::Config(format!("ring of {} slots has no room past the link TRB", len)));
        }

        // SAFETY: an all-zero TRB is a valid, not yet produced, record.
        let mut trbs = unsafe { Dma::<[Trb]>::zeroed_unsized(pool, len, RING_ALIGN, RING_BOUNDARY)? };

        // The link keeps cycle 0 until the first wrap, so the controller stops in front of it.
        let link = Trb::link(trbs.physical() as u64, true);
        trbs[len - 1].write_from(&link, false);

        Ok(Ring {
            trbs,
            i: 0,
            cycle: true,
        })
    }

    /// Base address, as programmed into CRCR or an endpoint context.
    pub fn physical(&self) -> u64 {
        self.trbs.physical() as u64
    }

    pub fn len(&self) -> usize {
        self.trbs.len()
    }

    pub fn cycle(&self) -> bool {
        self.cycle
    }

    /// Enqueue pointer with the producer cycle state in bit 0.
    pub fn register(&self) -> u64 {
        self.trb_phys_ptr(self.i) | u64::from(self.cycle)
    }

    pub fn trb_phys_ptr(&self, index: usize) -> u64 {
        self.physical() + (index * mem::size_of::<Trb>()) as u64
    }

    /// Maps a TRB address reported by an event back to the record in this ring.
    pub fn phys_addr_to_entry(&self, phys: u64) -> Option<&Trb> {
        let offset = phys.checked_sub(self.physical())? as usize;
        if offset % mem::size_of::<Trb>() != 0 {
            return None;
        }
        self.trbs.get(offset / mem::size_of::<Trb>())
    }

    /// Writes `trb` at the enqueue position with the current cycle state and returns its address.
    ///
    /// Landing on the link slot hands the link to the controller with the current cycle, toggles
    /// the cycle if the link asks for it and wraps to slot 0.
    pub fn push(&mut self, trb: Trb) -> u64 {
        let index = self.i;
        self.trbs[index].write_from(&trb, self.cycle);
        let address = self.trb_phys_ptr(index);
        trace!("push {} at {:#x}", trb, address);

        self.i += 1;
        let link_index = self.trbs.len() - 1;
        if self.i == link_index {
            let link = &mut self.trbs[link_index];
            link.set_cycle(self.cycle);
            if link.link_toggle() {
                self.cycle = !self.cycle;
            }
            self.i = 0;
        }

        address
    }
}
