use std::fmt;

use common::io::{Io, Mmio};

use crate::usb::Setup;

#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TrbType {
    Reserved,
    /* Transfer */
    Normal,
    SetupStage,
    DataStage,
    StatusStage,
    Isoch,
    Link,
    EventData,
    NoOp,
    /* Command */
    EnableSlot,
    DisableSlot,
    AddressDevice,
    ConfigureEndpoint,
    EvaluateContext,
    ResetEndpoint,
    StopEndpoint,
    SetTrDequeuePointer,
    ResetDevice,
    ForceEvent,
    NegotiateBandwidth,
    SetLatencyToleranceValue,
    GetPortBandwidth,
    ForceHeader,
    NoOpCmd,
    /* Events */
    Transfer = 32,
    CommandCompletion,
    PortStatusChange,
    BandwidthRequest,
    Doorbell,
    HostController,
    DeviceNotification,
    MfindexWrap,
}

impl TrbType {
    pub fn from_u8(value: u8) -> Option<Self> {
        use TrbType::*;

        Some(match value {
            0 => Reserved,
            1 => Normal,
            2 => SetupStage,
            3 => DataStage,
            4 => StatusStage,
            5 => Isoch,
            6 => Link,
            7 => EventData,
            8 => NoOp,
            9 => EnableSlot,
            10 => DisableSlot,
            11 => AddressDevice,
            12 => ConfigureEndpoint,
            13 => EvaluateContext,
            14 => ResetEndpoint,
            15 => StopEndpoint,
            16 => SetTrDequeuePointer,
            17 => ResetDevice,
            18 => ForceEvent,
            19 => NegotiateBandwidth,
            20 => SetLatencyToleranceValue,
            21 => GetPortBandwidth,
            22 => ForceHeader,
            23 => NoOpCmd,
            32 => Transfer,
            33 => CommandCompletion,
            34 => PortStatusChange,
            35 => BandwidthRequest,
            36 => Doorbell,
            37 => HostController,
            38 => DeviceNotification,
            39 => MfindexWrap,
            _ => return None,
        })
    }
}

/// Completion codes this driver looks at. See XHCI 6.4.5 for the full table.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TrbCompletionCode {
    Invalid = 0x00,
    Success = 0x01,
    DataBuffer = 0x02,
    BabbleDetected = 0x03,
    UsbTransaction = 0x04,
    Trb = 0x05,
    Stall = 0x06,
    Resource = 0x07,
    Bandwidth = 0x08,
    NoSlotsAvailable = 0x09,
    SlotNotEnabled = 0x0B,
    EndpointNotEnabled = 0x0C,
    ShortPacket = 0x0D,
    RingUnderrun = 0x0E,
    RingOverrun = 0x0F,
    VfEventRingFull = 0x10,
    Parameter = 0x11,
    ContextState = 0x13,
    EventRingFull = 0x15,
    IncompatibleDevice = 0x16,
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransferKind {
    NoData,
    Reserved,
    Out,
    In,
}

/// A Transfer Request Block: the 16-byte record shared by every ring. See XHCI 4.11 and 6.4
#[repr(C, align(16))]
pub struct Trb {
    pub data_low: Mmio<u32>,
    pub data_high: Mmio<u32>,
    pub status: Mmio<u32>,
    pub control: Mmio<u32>,
}

impl Clone for Trb {
    fn clone(&self) -> Self {
        Self::new(self.read_data(), self.status.read(), self.control.read())
    }
}

pub const TRB_CONTROL_CYCLE_BIT: u32 = 1 << 0;
pub const TRB_CONTROL_TOGGLE_CYCLE_BIT: u32 = 1 << 1;
pub const TRB_CONTROL_ISP_BIT: u32 = 1 << 2;
pub const TRB_CONTROL_IOC_BIT: u32 = 1 << 5;
pub const TRB_CONTROL_IDT_BIT: u32 = 1 << 6;

pub const TRB_STATUS_COMPLETION_CODE_SHIFT: u8 = 24;
pub const TRB_STATUS_TRANSFER_LENGTH_MASK: u32 = 0x00FF_FFFF;

pub const TRB_CONTROL_TRB_TYPE_SHIFT: u8 = 10;
pub const TRB_CONTROL_TRB_TYPE_MASK: u32 = 0x0000_FC00;

pub const TRB_CONTROL_ENDPOINT_ID_MASK: u32 = 0x001F_0000;
pub const TRB_CONTROL_ENDPOINT_ID_SHIFT: u8 = 16;

pub const TRB_CONTROL_SLOT_ID_SHIFT: u8 = 24;

/// Transfer Type field of a Setup Stage TRB.
pub const TRB_CONTROL_TRT_SHIFT: u8 = 16;
/// Direction bit of Data and Status Stage TRBs.
pub const TRB_CONTROL_DIR_IN_BIT: u32 = 1 << 16;

pub const TRB_PORT_ID_SHIFT: u8 = 24;

fn type_bits(ty: TrbType) -> u32 {
    (ty as u32) << TRB_CONTROL_TRB_TYPE_SHIFT
}

fn slot_bits(slot_id: u8) -> u32 {
    u32::from(slot_id) << TRB_CONTROL_SLOT_ID_SHIFT
}

impl Trb {
    /// Builds a record in ordinary memory. The cycle bit is left clear; rings stamp it when the
    /// record is pushed.
    pub fn new(data: u64, status: u32, control: u32) -> Self {
        Self {
            data_low: Mmio::new(data as u32),
            data_high: Mmio::new((data >> 32) as u32),
            status: Mmio::new(status),
            control: Mmio::new(control & !TRB_CONTROL_CYCLE_BIT),
        }
    }

    /// Copies `src` into this slot with the given cycle bit.
    ///
    /// The control word, which carries the cycle bit, is written last and after a release fence:
    /// the controller may start reading the record as soon as the cycle bit matches.
    pub fn write_from(&mut self, src: &Trb, cycle: bool) {
        self.data_low.write(src.data_low.read());
        self.data_high.write(src.data_high.read());
        self.status.write(src.status.read());
        std::sync::atomic::fence(std::sync::atomic::Ordering::Release);
        let control = src.control.read() & !TRB_CONTROL_CYCLE_BIT;
        self.control.write(control | u32::from(cycle));
    }

    pub fn read_data(&self) -> u64 {
        (self.data_low.read() as u64) | ((self.data_high.read() as u64) << 32)
    }

    pub fn cycle(&self) -> bool {
        self.control.readf(TRB_CONTROL_CYCLE_BIT)
    }

    pub fn set_cycle(&mut self, cycle: bool) {
        self.control.writef(TRB_CONTROL_CYCLE_BIT, cycle);
    }

    pub fn trb_type(&self) -> u8 {
        ((self.control.read() & TRB_CONTROL_TRB_TYPE_MASK) >> TRB_CONTROL_TRB_TYPE_SHIFT) as u8
    }

    pub fn kind(&self) -> Option<TrbType> {
        TrbType::from_u8(self.trb_type())
    }

    pub fn is_type(&self, ty: TrbType) -> bool {
        self.trb_type() == ty as u8
    }

    pub fn ioc(&self) -> bool {
        self.control.readf(TRB_CONTROL_IOC_BIT)
    }

    pub fn link_toggle(&self) -> bool {
        self.control.readf(TRB_CONTROL_TOGGLE_CYCLE_BIT)
    }

    /// Slot ID of a command or event record.
    pub fn slot_id(&self) -> u8 {
        (self.control.read() >> TRB_CONTROL_SLOT_ID_SHIFT) as u8
    }

    /* Events */

    pub fn completion_code(&self) -> u8 {
        (self.status.read() >> TRB_STATUS_COMPLETION_CODE_SHIFT) as u8
    }

    pub fn is_success(&self) -> bool {
        self.completion_code() == TrbCompletionCode::Success as u8
    }

    fn has_completion_trb_pointer(&self) -> bool {
        let code = self.completion_code();
        code != TrbCompletionCode::RingUnderrun as u8
            && code != TrbCompletionCode::RingOverrun as u8
            && code != TrbCompletionCode::VfEventRingFull as u8
    }

    /// Address of the command record a Command Completion Event reports on.
    pub fn completion_trb_pointer(&self) -> Option<u64> {
        debug_assert_eq!(self.trb_type(), TrbType::CommandCompletion as u8);

        if self.has_completion_trb_pointer() {
            Some(self.read_data())
        } else {
            None
        }
    }

    /// Address of the transfer record a Transfer Event reports on.
    pub fn transfer_event_trb_pointer(&self) -> Option<u64> {
        debug_assert_eq!(self.trb_type(), TrbType::Transfer as u8);

        if self.has_completion_trb_pointer() {
            Some(self.read_data())
        } else {
            None
        }
    }

    pub fn port_status_change_port_id(&self) -> u8 {
        debug_assert_eq!(self.trb_type(), TrbType::PortStatusChange as u8);
        (self.read_data() >> TRB_PORT_ID_SHIFT) as u8
    }

    /// Returns the number of bytes that should have been transmitted, but weren't.
    pub fn transfer_length(&self) -> u32 {
        self.status.read() & TRB_STATUS_TRANSFER_LENGTH_MASK
    }

    /// Device Context Index of the endpoint a Transfer Event reports on.
    pub fn endpoint_id(&self) -> u8 {
        ((self.control.read() & TRB_CONTROL_ENDPOINT_ID_MASK) >> TRB_CONTROL_ENDPOINT_ID_SHIFT)
            as u8
    }

    /* Commands */

    pub fn link(address: u64, toggle: bool) -> Self {
        Self::new(
            address,
            0,
            type_bits(TrbType::Link) | (u32::from(toggle) << 1),
        )
    }

    pub fn no_op_cmd() -> Self {
        Self::new(0, 0, type_bits(TrbType::NoOpCmd))
    }

    pub fn enable_slot(slot_type: u8) -> Self {
        Self::new(
            0,
            0,
            ((u32::from(slot_type) & 0x1F) << 16) | type_bits(TrbType::EnableSlot),
        )
    }

    pub fn disable_slot(slot_id: u8) -> Self {
        Self::new(0, 0, slot_bits(slot_id) | type_bits(TrbType::DisableSlot))
    }

    pub fn address_device(slot_id: u8, input_ctx_ptr: u64, bsr: bool) -> Self {
        debug_assert_eq!(input_ctx_ptr & 0xF, 0, "unaligned input context ptr");
        Self::new(
            input_ctx_ptr,
            0,
            slot_bits(slot_id) | type_bits(TrbType::AddressDevice) | (u32::from(bsr) << 9),
        )
    }

    pub fn configure_endpoint(slot_id: u8, input_ctx_ptr: u64) -> Self {
        debug_assert_eq!(input_ctx_ptr & 0xF, 0, "unaligned input context ptr");
        Self::new(
            input_ctx_ptr,
            0,
            slot_bits(slot_id) | type_bits(TrbType::ConfigureEndpoint),
        )
    }

    pub fn evaluate_context(slot_id: u8, input_ctx_ptr: u64) -> Self {
        debug_assert_eq!(input_ctx_ptr & 0xF, 0, "unaligned input context ptr");
        Self::new(
            input_ctx_ptr,
            0,
            slot_bits(slot_id) | type_bits(TrbType::EvaluateContext),
        )
    }

    /* Transfers */

    /// A Setup Stage record carrying the request as immediate data.
    pub fn setup(setup: Setup, transfer: TransferKind) -> Self {
        Self::new(
            setup.to_u64(),
            8,
            ((transfer as u32) << TRB_CONTROL_TRT_SHIFT)
                | type_bits(TrbType::SetupStage)
                | TRB_CONTROL_IDT_BIT,
        )
    }

    /// Decodes the request carried by a Setup Stage record.
    pub fn setup_packet(&self) -> Setup {
        Setup::from_u64(self.read_data())
    }

    pub fn data(buffer: u64, length: u16, input: bool, ioc: bool) -> Self {
        Self::new(
            buffer,
            u32::from(length),
            (u32::from(input) << 16) | type_bits(TrbType::DataStage) | (u32::from(ioc) << 5),
        )
    }

    /// Data buffer address of a Data Stage or Normal record.
    pub fn buffer(&self) -> u64 {
        self.read_data()
    }

    /// Requested length of a Data Stage or Normal record.
    pub fn buffer_length(&self) -> u32 {
        self.status.read() & 0x1_FFFF
    }

    pub fn status(input: bool, ioc: bool) -> Self {
        Self::new(
            0,
            0,
            (u32::from(input) << 16) | type_bits(TrbType::StatusStage) | (u32::from(ioc) << 5),
        )
    }

    /// A Normal record for interrupt and bulk endpoints, with Interrupt on Short Packet and
    /// Interrupt On Completion set.
    pub fn normal(buffer: u64, len: u32) -> Self {
        Self::new(
            buffer,
            len & 0x1_FFFF,
            TRB_CONTROL_ISP_BIT | TRB_CONTROL_IOC_BIT | type_bits(TrbType::Normal),
        )
    }
}

impl fmt::Debug for Trb {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Trb {{ data: {:>016X}, status: {:>08X}, control: {:>08X} }}",
            self.read_data(),
            self.status.read(),
            self.control.read()
        )
    }
}

impl fmt::Display for Trb {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind() {
            Some(kind) => write!(f, "{:?}", kind)?,
            None => write!(f, "Type{}", self.trb_type())?,
        }
        write!(
            f,
            "({:>016X}, {:>08X}, {:>08X})",
            self.read_data(),
            self.status.read(),
            self.control.read()
        )
    }
}
