use std::mem;

use common::dma::{Dma, DmaPool};
use common::io::{Io, Mmio};

use super::ring::{RING_ALIGN, RING_BOUNDARY};
use super::runtime::Interrupter;
use super::trb::Trb;
use crate::error::{Result, XhciError};

/// One Event Ring Segment Table entry. See XHCI 6.5
#[repr(C)]
pub struct EventRingSte {
    pub address_low: Mmio<u32>,
    pub address_high: Mmio<u32>,
    pub size: Mmio<u16>,
    _rsvd: Mmio<u16>,
    _rsvd2: Mmio<u32>,
}

/// The primary event ring: a single segment the controller produces into and software consumes.
///
/// A record is new when its cycle bit equals the consumer cycle state. The segment has no link
/// TRB; the end is taken from the segment table entry.
pub struct EventRing {
    ste: Dma<[EventRingSte]>,
    trbs: Dma<[Trb]>,
    dequeue: usize,
    cycle: bool,
}

impl EventRing {
    pub fn new(pool: &DmaPool, len: u16) -> Result<EventRing> {
        if len == 0 {
            return Err(XhciError::Config("empty event ring segment".to_string()));
        }

        // SAFETY: zeroed segment table entries and TRBs are valid.
        let mut ring = unsafe {
            EventRing {
                ste: Dma::zeroed_unsized(pool, 1, RING_ALIGN, 0)?,
                trbs: Dma::zeroed_unsized(pool, usize::from(len), RING_ALIGN, RING_BOUNDARY)?,
                dequeue: 0,
                cycle: true,
            }
        };

        let address = ring.trbs.physical() as u64;
        ring.ste[0].address_low.write(address as u32);
        ring.ste[0].address_high.write((address >> 32) as u32);
        ring.ste[0].size.write(len);

        Ok(ring)
    }

    pub fn erstba(&self) -> u64 {
        self.ste.physical() as u64
    }

    /// Address of the record at the dequeue cursor.
    pub fn erdp(&self) -> u64 {
        self.trbs.physical() as u64 + (self.dequeue * mem::size_of::<Trb>()) as u64
    }

    /// Points interrupter `int` at this ring. ERSTSZ, ERDP and ERSTBA are written in that order,
    /// since writing ERSTBA makes the controller start using the segment. See XHCI 4.9.4
    pub fn initialize(&self, int: &mut Interrupter) {
        int.erstsz.write(1);
        int.set_erdp(self.erdp());
        int.set_erstba(self.erstba());
    }

    pub fn has_front(&self) -> bool {
        self.trbs[self.dequeue].cycle() == self.cycle
    }

    pub fn front(&self) -> Option<&Trb> {
        if self.has_front() {
            Some(&self.trbs[self.dequeue])
        } else {
            None
        }
    }

    /// Consumes the front record and publishes the new dequeue pointer to the controller. The
    /// write also clears Event Handler Busy.
    pub fn pop(&mut self, int: &mut Interrupter) {
        self.dequeue += 1;
        let segment_len = usize::from(self.ste[0].size.read());
        if self.dequeue >= segment_len {
            self.dequeue = 0;
            self.cycle = !self.cycle;
        }
        int.set_erdp(self.erdp());
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::xhci::runtime::ERDP_EHB;
    use crate::xhci::trb::TrbType;

    fn interrupter() -> Box<Interrupter> {
        // SAFETY: an interrupter register set is plain 32-bit registers.
        Box::new(unsafe { mem::zeroed() })
    }

    fn produce(ring: &mut EventRing, index: usize, cycle: bool) {
        let event = Trb::new(0, 1 << 24, (TrbType::PortStatusChange as u32) << 10);
        ring.trbs[index].write_from(&event, cycle);
    }

    #[test]
    fn cycle_gating() {
        let pool = DmaPool::from_heap(0x2_0000);
        let mut ring = EventRing::new(&pool, 4).unwrap();
        let mut int = interrupter();
        ring.initialize(&mut int);

        assert_eq!(int.erstsz.read(), 1);
        assert_eq!(int.erdp(), ring.trbs.physical() as u64);
        assert!(!ring.has_front());
        assert!(ring.front().is_none());

        produce(&mut ring, 0, true);
        assert!(ring.has_front());
        assert_eq!(ring.front().unwrap().kind(), Some(TrbType::PortStatusChange));

        // The controller sets EHB while software handles the event; publishing ERDP clears it.
        int.erdp_low.write(int.erdp_low.read() | ERDP_EHB);
        ring.pop(&mut int);
        assert!(!ring.has_front());
        assert_eq!(int.erdp() & !0xF, ring.trbs.physical() as u64 + 16);
        assert_ne!(int.erdp_low.read() & ERDP_EHB, 0, "EHB written back as one");
    }

    #[test]
    fn empty_segment() {
        let pool = DmaPool::from_heap(0x2_0000);
        assert!(matches!(EventRing::new(&pool, 0), Err(XhciError::Config(_))));
    }

    #[test]
    fn wraps_at_segment_end() {
        let pool = DmaPool::from_heap(0x2_0000);
        let mut ring = EventRing::new(&pool, 2).unwrap();
        let mut int = interrupter();
        ring.initialize(&mut int);

        produce(&mut ring, 0, true);
        produce(&mut ring, 1, true);
        ring.pop(&mut int);
        ring.pop(&mut int);

        // Second lap: the stale records still carry cycle 1.
        assert!(!ring.has_front());
        assert_eq!(int.erdp(), ring.trbs.physical() as u64);
        produce(&mut ring, 0, false);
        assert!(ring.has_front());
    }
}
