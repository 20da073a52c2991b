use common::io::{Io, Mmio};

/// One interrupter register set. See XHCI 5.5.2
#[repr(C)]
pub struct Interrupter {
    pub iman: Mmio<u32>,
    pub imod: Mmio<u32>,
    pub erstsz: Mmio<u32>,
    _rsvd: Mmio<u32>,
    pub erstba_low: Mmio<u32>,
    pub erstba_high: Mmio<u32>,
    pub erdp_low: Mmio<u32>,
    pub erdp_high: Mmio<u32>,
}

pub const IMAN_IP: u32 = 1 << 0;
pub const IMAN_IE: u32 = 1 << 1;

/// Event Handler Busy, write-one-to-clear.
pub const ERDP_EHB: u32 = 1 << 3;
/// Bits of ERDP that are not part of the dequeue pointer.
pub const ERDP_FLAGS_MASK: u32 = 0xF;

impl Interrupter {
    pub fn set_erstba(&mut self, address: u64) {
        self.erstba_low.write(address as u32);
        self.erstba_high.write((address >> 32) as u32);
    }

    pub fn erdp(&self) -> u64 {
        u64::from(self.erdp_low.read()) | (u64::from(self.erdp_high.read()) << 32)
    }

    /// Publishes a new dequeue pointer.
    ///
    /// The flag bits are written back as read, so a set EHB is written as one and cleared.
    pub fn set_erdp(&mut self, address: u64) {
        let flags = self.erdp_low.read() & ERDP_FLAGS_MASK;
        self.erdp_low
            .write((address as u32 & !ERDP_FLAGS_MASK) | flags);
        self.erdp_high.write((address >> 32) as u32);
    }
}

#[repr(C)]
pub struct RuntimeRegs {
    pub mfindex: Mmio<u32>,
    _rsvd: [Mmio<u32>; 7],
    pub ints: [Interrupter; 1024],
}
