use common::io::{Mmio, ReadOnly};

/// The memory-mapped Capability Registers of the xHC.
///
/// These read-only registers describe the limits of the controller implementation and where the
/// other register blocks live relative to the MMIO base.
///
/// See XHCI Section 5.3. Table 5-9 lists the offsets.
#[repr(C)]
pub struct CapabilityRegs {
    /// CAPLENGTH: offset of the Operational Registers from the MMIO base. See XHCI 5.3.1
    pub len: ReadOnly<Mmio<u8>>,
    _rsvd: ReadOnly<Mmio<u8>>,
    /// HCIVERSION: interface version number in binary-coded decimal. See XHCI 5.3.2
    pub hci_ver: ReadOnly<Mmio<u16>>,
    /// HCSPARAMS1. See XHCI 5.3.3
    ///
    /// - Bits 0-7: number of device slots (MaxSlots)
    /// - Bits 8-18: number of interrupters (MaxIntrs)
    /// - Bits 24-31: number of root hub ports (MaxPorts)
    pub hcs_params1: ReadOnly<Mmio<u32>>,
    /// HCSPARAMS2. See XHCI 5.3.4
    ///
    /// - Bits 4-7: ERST Max, the event ring segment table holds at most 2^ERSTMax entries
    /// - Bits 21-25: high five bits of Max Scratchpad Buffers
    /// - Bit 26: Scratchpad Restore (SPR)
    /// - Bits 27-31: low five bits of Max Scratchpad Buffers
    pub hcs_params2: ReadOnly<Mmio<u32>>,
    /// HCSPARAMS3: U1/U2 device exit latencies. See XHCI 5.3.5
    pub hcs_params3: ReadOnly<Mmio<u32>>,
    /// HCCPARAMS1. See XHCI 5.3.6
    ///
    /// - Bit 0: 64-bit Addressing Capability (AC64)
    /// - Bit 2: Context Size (CSZ), set when contexts are 64 bytes instead of 32
    /// - Bits 16-31: xHCI Extended Capabilities Pointer, in dwords
    pub hcc_params1: ReadOnly<Mmio<u32>>,
    /// DBOFF: offset of the Doorbell Array, bits 2-31. See XHCI 5.3.7
    pub db_offset: ReadOnly<Mmio<u32>>,
    /// RTSOFF: offset of the Runtime Registers, bits 5-31. See XHCI 5.3.8
    pub rts_offset: ReadOnly<Mmio<u32>>,
    /// HCCPARAMS2. See XHCI 5.3.9
    pub hcc_params2: ReadOnly<Mmio<u32>>,
}

pub const HCC_PARAMS1_AC64_BIT: u32 = 1 << 0;
pub const HCC_PARAMS1_CSZ_BIT: u32 = 1 << 2;

pub const HCS_PARAMS1_MAX_SLOTS_MASK: u32 = 0x0000_00FF;
pub const HCS_PARAMS1_MAX_PORTS_MASK: u32 = 0xFF00_0000;
pub const HCS_PARAMS1_MAX_PORTS_SHIFT: u8 = 24;

pub const HCS_PARAMS2_MAX_SCRATCHPAD_BUFS_HI_MASK: u32 = 0x03E0_0000;
pub const HCS_PARAMS2_MAX_SCRATCHPAD_BUFS_HI_SHIFT: u8 = 21;
pub const HCS_PARAMS2_MAX_SCRATCHPAD_BUFS_LO_MASK: u32 = 0xF800_0000;
pub const HCS_PARAMS2_MAX_SCRATCHPAD_BUFS_LO_SHIFT: u8 = 27;

/// Mask applied to DBOFF; the low two bits are reserved.
pub const DB_OFFSET_MASK: u32 = 0xFFFF_FFFC;
/// Mask applied to RTSOFF; the low five bits are reserved.
pub const RTS_OFFSET_MASK: u32 = 0xFFFF_FFE0;

impl CapabilityRegs {
    pub fn ac64(&self) -> bool {
        self.hcc_params1.readf(HCC_PARAMS1_AC64_BIT)
    }

    pub fn csz(&self) -> bool {
        self.hcc_params1.readf(HCC_PARAMS1_CSZ_BIT)
    }

    pub fn max_ports(&self) -> u8 {
        ((self.hcs_params1.read() & HCS_PARAMS1_MAX_PORTS_MASK) >> HCS_PARAMS1_MAX_PORTS_SHIFT)
            as u8
    }

    pub fn max_slots(&self) -> u8 {
        (self.hcs_params1.read() & HCS_PARAMS1_MAX_SLOTS_MASK) as u8
    }

    pub fn max_scratchpad_bufs(&self) -> u16 {
        let params = self.hcs_params2.read();
        let lo = (params & HCS_PARAMS2_MAX_SCRATCHPAD_BUFS_LO_MASK)
            >> HCS_PARAMS2_MAX_SCRATCHPAD_BUFS_LO_SHIFT;
        let hi = (params & HCS_PARAMS2_MAX_SCRATCHPAD_BUFS_HI_MASK)
            >> HCS_PARAMS2_MAX_SCRATCHPAD_BUFS_HI_SHIFT;
        (lo | (hi << 5)) as u16
    }

    pub fn db_offset(&self) -> usize {
        (self.db_offset.read() & DB_OFFSET_MASK) as usize
    }

    pub fn rts_offset(&self) -> usize {
        (self.rts_offset.read() & RTS_OFFSET_MASK) as usize
    }
}
