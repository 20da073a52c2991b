use common::io::{Io, Mmio};

/// The Host Controller Operational Registers. See XHCI 5.4
#[repr(C)]
pub struct OperationalRegs {
    pub usb_cmd: Mmio<u32>,
    pub usb_sts: Mmio<u32>,
    pub page_size: Mmio<u32>,
    _rsvd: [Mmio<u32>; 2],
    pub dn_ctrl: Mmio<u32>,
    pub crcr_low: Mmio<u32>,
    pub crcr_high: Mmio<u32>,
    _rsvd2: [Mmio<u32>; 4],
    pub dcbaap_low: Mmio<u32>,
    pub dcbaap_high: Mmio<u32>,
    pub config: Mmio<u32>,
}

pub const USB_CMD_RS: u32 = 1 << 0;
pub const USB_CMD_HCRST: u32 = 1 << 1;
pub const USB_CMD_INTE: u32 = 1 << 2;

pub const USB_STS_HCH: u32 = 1 << 0;
pub const USB_STS_EINT: u32 = 1 << 3;
pub const USB_STS_CNR: u32 = 1 << 11;

pub const OP_CONFIG_MAX_SLOTS_EN_MASK: u32 = 0xFF;

/// Offset of the first port register set from the start of the operational block.
pub const PORT_REGS_OFFSET: usize = 0x400;

impl OperationalRegs {
    pub fn halted(&self) -> bool {
        self.usb_sts.readf(USB_STS_HCH)
    }

    pub fn not_ready(&self) -> bool {
        self.usb_sts.readf(USB_STS_CNR)
    }

    pub fn set_max_slots_enabled(&mut self, slots: u8) {
        let config = self.config.read() & !OP_CONFIG_MAX_SLOTS_EN_MASK;
        self.config.write(config | u32::from(slots));
    }

    /// Programs CRCR with the ring base and its initial cycle state in bit 0.
    pub fn set_crcr(&mut self, value: u64) {
        self.crcr_low.write(value as u32);
        self.crcr_high.write((value >> 32) as u32);
    }

    pub fn set_dcbaap(&mut self, address: u64) {
        self.dcbaap_low.write(address as u32);
        self.dcbaap_high.write((address >> 32) as u32);
    }
}
