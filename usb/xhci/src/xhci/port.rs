use bitflags::bitflags;
use common::io::{Io, Mmio};
use log::trace;

use crate::error::{Result, XhciError};

// RO - read-only
// ROS - read-only sticky
// RW - read/write
// RWS - read/write sticky
// RW1CS - read/write-1-to-clear sticky
// RW1S - read/write-1-to-set
// Sticky register values may preserve values through chip hardware reset

bitflags! {
    pub struct PortFlags: u32 {
        const CCS = 1 << 0; // ROS
        const PED = 1 << 1; // RW1CS
        const RSVD_2 = 1 << 2; // RsvdZ
        const OCA = 1 << 3; // RO
        const PR =  1 << 4; // RW1S
        const PLS_0 = 1 << 5; // RWS
        const PLS_1 = 1 << 6; // RWS
        const PLS_2 = 1 << 7; // RWS
        const PLS_3 = 1 << 8; // RWS
        const PP =  1 << 9; // RWS
        const SPEED_0 =  1 << 10; // ROS
        const SPEED_1 =  1 << 11; // ROS
        const SPEED_2 =  1 << 12; // ROS
        const SPEED_3 =  1 << 13; // ROS
        const PIC_AMB = 1 << 14; // RWS
        const PIC_GRN = 1 << 15; // RWS
        const LWS = 1 << 16; // RW
        const CSC = 1 << 17; // RW1CS
        const PEC = 1 << 18; // RW1CS
        const WRC = 1 << 19; // RW1CS
        const OCC = 1 << 20; // RW1CS
        const PRC = 1 << 21; // RW1CS
        const PLC = 1 << 22; // RW1CS
        const CEC = 1 << 23; // RW1CS
        const CAS = 1 << 24; // RO
        const WCE = 1 << 25; // RWS
        const WDE = 1 << 26; // RWS
        const WOE = 1 << 27; // RWS
        const RSVD_28 = 1 << 28; // RsvdZ
        const RSVD_29 = 1 << 29; // RsvdZ
        const DR =  1 << 30; // RO
        const WPR = 1 << 31; // RW1S
    }
}

impl PortFlags {
    /// Every status-change bit. Each is cleared by writing one to it.
    pub const CHANGES: PortFlags = PortFlags::from_bits_truncate(
        PortFlags::CSC.bits
            | PortFlags::PEC.bits
            | PortFlags::WRC.bits
            | PortFlags::OCC.bits
            | PortFlags::PRC.bits
            | PortFlags::PLC.bits
            | PortFlags::CEC.bits,
    );

    /// The bits a PORTSC write must echo back unchanged.
    ///
    /// RO(S) and RW(S) bits are preserved. RW1S and RW1CS bits are not: writing them back as read
    /// would start a reset or acknowledge a change nobody has looked at yet.
    pub const PRESERVED: PortFlags = PortFlags::from_bits_truncate(
        PortFlags::CCS.bits
            | PortFlags::OCA.bits
            | PortFlags::PLS_0.bits
            | PortFlags::PLS_1.bits
            | PortFlags::PLS_2.bits
            | PortFlags::PLS_3.bits
            | PortFlags::PP.bits
            | PortFlags::SPEED_0.bits
            | PortFlags::SPEED_1.bits
            | PortFlags::SPEED_2.bits
            | PortFlags::SPEED_3.bits
            | PortFlags::PIC_AMB.bits
            | PortFlags::PIC_GRN.bits
            | PortFlags::WCE.bits
            | PortFlags::WDE.bits
            | PortFlags::WOE.bits
            | PortFlags::DR.bits,
    );
}

const PORTSC_SPEED_MASK: u32 = 0x0000_3C00;
const PORTSC_SPEED_SHIFT: u8 = 10;
const PORTSC_PLS_MASK: u32 = 0x0000_01E0;
const PORTSC_PLS_SHIFT: u8 = 5;

/// Protocol speed IDs as assigned by the default Protocol Speed ID mapping. See XHCI 7.2.2.1.1
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PortSpeed {
    Full = 1,
    Low = 2,
    High = 3,
    Super = 4,
    SuperPlus = 5,
}

impl PortSpeed {
    pub fn from_psiv(psiv: u8) -> Option<Self> {
        Some(match psiv {
            1 => PortSpeed::Full,
            2 => PortSpeed::Low,
            3 => PortSpeed::High,
            4 => PortSpeed::Super,
            5 => PortSpeed::SuperPlus,
            _ => return None,
        })
    }

    /// The control endpoint packet size to assume before the device descriptor has been read.
    pub fn default_control_packet_size(self) -> u16 {
        match self {
            PortSpeed::Low | PortSpeed::Full => 8,
            PortSpeed::High => 64,
            PortSpeed::Super | PortSpeed::SuperPlus => 512,
        }
    }

    pub fn is_full_or_low(self) -> bool {
        matches!(self, PortSpeed::Full | PortSpeed::Low)
    }
}

/// The register set of one root hub port. See XHCI 5.4.8
#[repr(C)]
pub struct Port {
    // This has write one to clear fields, do not expose it, handle writes carefully!
    portsc: Mmio<u32>,
    pub portpmsc: Mmio<u32>,
    pub portli: Mmio<u32>,
    pub porthlpmc: Mmio<u32>,
}

impl Port {
    pub fn read(&self) -> u32 {
        self.portsc.read()
    }

    pub fn flags(&self) -> PortFlags {
        PortFlags::from_bits_truncate(self.read())
    }

    /// The current value restricted to the bits a write must preserve.
    pub fn flags_preserved(&self) -> PortFlags {
        self.flags() & PortFlags::PRESERVED
    }

    pub fn is_connected(&self) -> bool {
        self.flags().contains(PortFlags::CCS)
    }

    pub fn is_enabled(&self) -> bool {
        self.flags().contains(PortFlags::PED)
    }

    pub fn is_connect_status_changed(&self) -> bool {
        self.flags().contains(PortFlags::CSC)
    }

    pub fn is_port_reset_changed(&self) -> bool {
        self.flags().contains(PortFlags::PRC)
    }

    pub fn link_state(&self) -> u8 {
        ((self.read() & PORTSC_PLS_MASK) >> PORTSC_PLS_SHIFT) as u8
    }

    /// The raw Protocol Speed ID value.
    pub fn speed_id(&self) -> u8 {
        ((self.read() & PORTSC_SPEED_MASK) >> PORTSC_SPEED_SHIFT) as u8
    }

    pub fn speed(&self) -> Option<PortSpeed> {
        PortSpeed::from_psiv(self.speed_id())
    }

    /// Acknowledges the change bits in `changes` and leaves every other change bit pending.
    pub fn clear_changes(&mut self, changes: PortFlags) {
        let changes = changes & PortFlags::CHANGES;
        if changes.is_empty() {
            return;
        }
        self.portsc.write((self.flags_preserved() | changes).bits());
    }

    pub fn clear_csc(&mut self) {
        self.clear_changes(PortFlags::CSC);
    }

    pub fn clear_prc(&mut self) {
        self.clear_changes(PortFlags::PRC);
    }

    pub fn set_pr(&mut self) {
        self.portsc
            .write((self.flags_preserved() | PortFlags::PR).bits());
    }

    /// Sets PR on a connected port. The controller drops PR again once it has signalled the
    /// reset, and reports completion with PRC through a Port Status Change event.
    ///
    /// A port without a device attached is left untouched.
    pub fn start_reset(&mut self) -> Result<()> {
        if !self.is_connected() {
            return Err(XhciError::PortNotConnected);
        }

        self.set_pr();
        trace!("port reset started, PORTSC now {:#010x}", self.read());
        Ok(())
    }
}
