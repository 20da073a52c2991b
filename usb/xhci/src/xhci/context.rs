//! Device, slot, endpoint and input contexts. See XHCI 6.2
//!
//! Only 32-byte contexts are modelled. Every field is reached through a mask/shift pair so the
//! field widths live in one place.
use common::dma::{Dma, DmaPool};
use common::io::{Io, Mmio};

use crate::error::Result;

/// Contexts are 64-byte aligned and, being small, must stay within one page.
pub const CONTEXT_ALIGN: usize = 64;
pub const CONTEXT_BOUNDARY: usize = 4096;

fn get_field(reg: &Mmio<u32>, mask: u32, shift: u8) -> u32 {
    (reg.read() & mask) >> shift
}

fn set_field(reg: &mut Mmio<u32>, mask: u32, shift: u8, value: u32) {
    reg.write((reg.read() & !mask) | ((value << shift) & mask));
}

#[repr(C)]
pub struct SlotContext {
    pub a: Mmio<u32>,
    pub b: Mmio<u32>,
    pub c: Mmio<u32>,
    pub d: Mmio<u32>,
    _rsvd: [Mmio<u32>; 4],
}

pub const SLOT_CONTEXT_ROUTE_STRING_MASK: u32 = 0x000F_FFFF;
pub const SLOT_CONTEXT_ROUTE_STRING_SHIFT: u8 = 0;
pub const SLOT_CONTEXT_SPEED_MASK: u32 = 0x00F0_0000;
pub const SLOT_CONTEXT_SPEED_SHIFT: u8 = 20;
pub const SLOT_CONTEXT_CONTEXT_ENTRIES_MASK: u32 = 0xF800_0000;
pub const SLOT_CONTEXT_CONTEXT_ENTRIES_SHIFT: u8 = 27;

pub const SLOT_CONTEXT_ROOT_HUB_PORT_MASK: u32 = 0x00FF_0000;
pub const SLOT_CONTEXT_ROOT_HUB_PORT_SHIFT: u8 = 16;

pub const SLOT_CONTEXT_INTERRUPTER_TARGET_MASK: u32 = 0xFFC0_0000;
pub const SLOT_CONTEXT_INTERRUPTER_TARGET_SHIFT: u8 = 22;

pub const SLOT_CONTEXT_ADDRESS_MASK: u32 = 0x0000_00FF;
pub const SLOT_CONTEXT_ADDRESS_SHIFT: u8 = 0;
pub const SLOT_CONTEXT_STATE_MASK: u32 = 0xF800_0000;
pub const SLOT_CONTEXT_STATE_SHIFT: u8 = 27;

#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SlotState {
    EnabledOrDisabled = 0,
    Default = 1,
    Addressed = 2,
    Configured = 3,
}

impl SlotContext {
    pub fn route_string(&self) -> u32 {
        get_field(&self.a, SLOT_CONTEXT_ROUTE_STRING_MASK, SLOT_CONTEXT_ROUTE_STRING_SHIFT)
    }
    pub fn set_route_string(&mut self, route: u32) {
        set_field(&mut self.a, SLOT_CONTEXT_ROUTE_STRING_MASK, SLOT_CONTEXT_ROUTE_STRING_SHIFT, route);
    }

    pub fn speed(&self) -> u8 {
        get_field(&self.a, SLOT_CONTEXT_SPEED_MASK, SLOT_CONTEXT_SPEED_SHIFT) as u8
    }
    pub fn set_speed(&mut self, speed: u8) {
        set_field(&mut self.a, SLOT_CONTEXT_SPEED_MASK, SLOT_CONTEXT_SPEED_SHIFT, speed.into());
    }

    /// Index of the last valid endpoint context.
    pub fn context_entries(&self) -> u8 {
        get_field(&self.a, SLOT_CONTEXT_CONTEXT_ENTRIES_MASK, SLOT_CONTEXT_CONTEXT_ENTRIES_SHIFT) as u8
    }
    pub fn set_context_entries(&mut self, entries: u8) {
        set_field(
            &mut self.a,
            SLOT_CONTEXT_CONTEXT_ENTRIES_MASK,
            SLOT_CONTEXT_CONTEXT_ENTRIES_SHIFT,
            entries.into(),
        );
    }

    pub fn root_hub_port(&self) -> u8 {
        get_field(&self.b, SLOT_CONTEXT_ROOT_HUB_PORT_MASK, SLOT_CONTEXT_ROOT_HUB_PORT_SHIFT) as u8
    }
    pub fn set_root_hub_port(&mut self, port: u8) {
        set_field(&mut self.b, SLOT_CONTEXT_ROOT_HUB_PORT_MASK, SLOT_CONTEXT_ROOT_HUB_PORT_SHIFT, port.into());
    }

    pub fn set_interrupter_target(&mut self, target: u16) {
        set_field(
            &mut self.c,
            SLOT_CONTEXT_INTERRUPTER_TARGET_MASK,
            SLOT_CONTEXT_INTERRUPTER_TARGET_SHIFT,
            target.into(),
        );
    }

    pub fn usb_device_address(&self) -> u8 {
        get_field(&self.d, SLOT_CONTEXT_ADDRESS_MASK, SLOT_CONTEXT_ADDRESS_SHIFT) as u8
    }

    pub fn state(&self) -> u8 {
        get_field(&self.d, SLOT_CONTEXT_STATE_MASK, SLOT_CONTEXT_STATE_SHIFT) as u8
    }

    /// Copies every dword of `other` into this context.
    pub fn copy_from(&mut self, other: &SlotContext) {
        self.a.write(other.a.read());
        self.b.write(other.b.read());
        self.c.write(other.c.read());
        self.d.write(other.d.read());
    }
}

#[repr(C)]
pub struct EndpointContext {
    pub a: Mmio<u32>,
    pub b: Mmio<u32>,
    pub trl: Mmio<u32>,
    pub trh: Mmio<u32>,
    pub c: Mmio<u32>,
    _rsvd: [Mmio<u32>; 3],
}

pub const ENDPOINT_CONTEXT_STATUS_MASK: u32 = 0x0000_0007;
pub const ENDPOINT_CONTEXT_STATUS_SHIFT: u8 = 0;
pub const ENDPOINT_CONTEXT_MULT_MASK: u32 = 0x0000_0300;
pub const ENDPOINT_CONTEXT_MULT_SHIFT: u8 = 8;
pub const ENDPOINT_CONTEXT_MAX_PSTREAMS_MASK: u32 = 0x0000_7C00;
pub const ENDPOINT_CONTEXT_MAX_PSTREAMS_SHIFT: u8 = 10;
pub const ENDPOINT_CONTEXT_INTERVAL_MASK: u32 = 0x00FF_0000;
pub const ENDPOINT_CONTEXT_INTERVAL_SHIFT: u8 = 16;
pub const ENDPOINT_CONTEXT_MAX_ESIT_PAYLOAD_HI_MASK: u32 = 0xFF00_0000;
pub const ENDPOINT_CONTEXT_MAX_ESIT_PAYLOAD_HI_SHIFT: u8 = 24;

pub const ENDPOINT_CONTEXT_ERROR_COUNT_MASK: u32 = 0x0000_0006;
pub const ENDPOINT_CONTEXT_ERROR_COUNT_SHIFT: u8 = 1;
pub const ENDPOINT_CONTEXT_EP_TYPE_MASK: u32 = 0x0000_0038;
pub const ENDPOINT_CONTEXT_EP_TYPE_SHIFT: u8 = 3;
pub const ENDPOINT_CONTEXT_MAX_BURST_MASK: u32 = 0x0000_FF00;
pub const ENDPOINT_CONTEXT_MAX_BURST_SHIFT: u8 = 8;
pub const ENDPOINT_CONTEXT_MAX_PACKET_SIZE_MASK: u32 = 0xFFFF_0000;
pub const ENDPOINT_CONTEXT_MAX_PACKET_SIZE_SHIFT: u8 = 16;

/// Dequeue Cycle State, bit 0 of the TR Dequeue Pointer dword.
pub const ENDPOINT_CONTEXT_DCS_BIT: u32 = 1 << 0;
/// The TR Dequeue Pointer keeps bits 63:4; the low four bits are implied zero.
pub const ENDPOINT_CONTEXT_TR_DEQUEUE_MASK: u64 = !0xF;

pub const ENDPOINT_CONTEXT_AVG_TRB_LEN_MASK: u32 = 0x0000_FFFF;
pub const ENDPOINT_CONTEXT_AVG_TRB_LEN_SHIFT: u8 = 0;
pub const ENDPOINT_CONTEXT_MAX_ESIT_PAYLOAD_LO_MASK: u32 = 0xFFFF_0000;
pub const ENDPOINT_CONTEXT_MAX_ESIT_PAYLOAD_LO_SHIFT: u8 = 16;

/// Endpoint Type field values. See XHCI Table 6-9
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EndpointType {
    NotValid = 0,
    IsochOut = 1,
    BulkOut = 2,
    InterruptOut = 3,
    Control = 4,
    IsochIn = 5,
    BulkIn = 6,
    InterruptIn = 7,
}

impl EndpointContext {
    pub fn state(&self) -> u8 {
        get_field(&self.a, ENDPOINT_CONTEXT_STATUS_MASK, ENDPOINT_CONTEXT_STATUS_SHIFT) as u8
    }

    pub fn interval(&self) -> u8 {
        get_field(&self.a, ENDPOINT_CONTEXT_INTERVAL_MASK, ENDPOINT_CONTEXT_INTERVAL_SHIFT) as u8
    }
    pub fn set_interval(&mut self, interval: u8) {
        set_field(&mut self.a, ENDPOINT_CONTEXT_INTERVAL_MASK, ENDPOINT_CONTEXT_INTERVAL_SHIFT, interval.into());
    }

    pub fn set_mult(&mut self, mult: u8) {
        set_field(&mut self.a, ENDPOINT_CONTEXT_MULT_MASK, ENDPOINT_CONTEXT_MULT_SHIFT, mult.into());
    }

    pub fn set_max_primary_streams(&mut self, streams: u8) {
        set_field(
            &mut self.a,
            ENDPOINT_CONTEXT_MAX_PSTREAMS_MASK,
            ENDPOINT_CONTEXT_MAX_PSTREAMS_SHIFT,
            streams.into(),
        );
    }

    pub fn set_error_count(&mut self, count: u8) {
        set_field(&mut self.b, ENDPOINT_CONTEXT_ERROR_COUNT_MASK, ENDPOINT_CONTEXT_ERROR_COUNT_SHIFT, count.into());
    }

    pub fn ep_type(&self) -> u8 {
        get_field(&self.b, ENDPOINT_CONTEXT_EP_TYPE_MASK, ENDPOINT_CONTEXT_EP_TYPE_SHIFT) as u8
    }
    pub fn set_ep_type(&mut self, ty: EndpointType) {
        set_field(&mut self.b, ENDPOINT_CONTEXT_EP_TYPE_MASK, ENDPOINT_CONTEXT_EP_TYPE_SHIFT, ty as u32);
    }

    pub fn set_max_burst(&mut self, burst: u8) {
        set_field(&mut self.b, ENDPOINT_CONTEXT_MAX_BURST_MASK, ENDPOINT_CONTEXT_MAX_BURST_SHIFT, burst.into());
    }

    pub fn max_packet_size(&self) -> u16 {
        get_field(&self.b, ENDPOINT_CONTEXT_MAX_PACKET_SIZE_MASK, ENDPOINT_CONTEXT_MAX_PACKET_SIZE_SHIFT) as u16
    }
    pub fn set_max_packet_size(&mut self, size: u16) {
        set_field(
            &mut self.b,
            ENDPOINT_CONTEXT_MAX_PACKET_SIZE_MASK,
            ENDPOINT_CONTEXT_MAX_PACKET_SIZE_SHIFT,
            size.into(),
        );
    }

    /// The TR Dequeue Pointer with its implied low bits restored to zero.
    pub fn tr_dequeue_pointer(&self) -> u64 {
        let raw = u64::from(self.trl.read()) | (u64::from(self.trh.read()) << 32);
        raw & ENDPOINT_CONTEXT_TR_DEQUEUE_MASK
    }

    pub fn dequeue_cycle_state(&self) -> bool {
        self.trl.readf(ENDPOINT_CONTEXT_DCS_BIT)
    }

    pub fn set_tr_dequeue_pointer(&mut self, address: u64, cycle: bool) {
        let address = address & ENDPOINT_CONTEXT_TR_DEQUEUE_MASK;
        self.trl.write(address as u32 | u32::from(cycle));
        self.trh.write((address >> 32) as u32);
    }

    pub fn average_trb_length(&self) -> u16 {
        get_field(&self.c, ENDPOINT_CONTEXT_AVG_TRB_LEN_MASK, ENDPOINT_CONTEXT_AVG_TRB_LEN_SHIFT) as u16
    }
    pub fn set_average_trb_length(&mut self, len: u16) {
        set_field(&mut self.c, ENDPOINT_CONTEXT_AVG_TRB_LEN_MASK, ENDPOINT_CONTEXT_AVG_TRB_LEN_SHIFT, len.into());
    }

    /// Max ESIT Payload is split over two fields: the low 16 bits in dword 4, the high 8 in
    /// dword 0.
    pub fn set_max_esit_payload(&mut self, payload: u32) {
        set_field(
            &mut self.c,
            ENDPOINT_CONTEXT_MAX_ESIT_PAYLOAD_LO_MASK,
            ENDPOINT_CONTEXT_MAX_ESIT_PAYLOAD_LO_SHIFT,
            payload & 0xFFFF,
        );
        set_field(
            &mut self.a,
            ENDPOINT_CONTEXT_MAX_ESIT_PAYLOAD_HI_MASK,
            ENDPOINT_CONTEXT_MAX_ESIT_PAYLOAD_HI_SHIFT,
            (payload >> 16) & 0xFF,
        );
    }

    pub fn clear(&mut self) {
        self.a.write(0);
        self.b.write(0);
        self.trl.write(0);
        self.trh.write(0);
        self.c.write(0);
    }
}

/// The output context the controller maintains for one slot.
#[repr(C)]
pub struct DeviceContext {
    pub slot: SlotContext,
    /// Indexed by Device Context Index minus one.
    pub endpoints: [EndpointContext; 31],
}

impl DeviceContext {
    pub fn endpoint(&self, dci: u8) -> &EndpointContext {
        &self.endpoints[usize::from(dci) - 1]
    }
}

/// Input Control Context: which contexts a command drops and adds. See XHCI 6.2.5.1
#[repr(C)]
pub struct InputControlContext {
    pub drop_flags: Mmio<u32>,
    pub add_flags: Mmio<u32>,
    _rsvd: [Mmio<u32>; 5],
    pub control: Mmio<u32>,
}

#[repr(C)]
pub struct InputContext {
    pub control: InputControlContext,
    pub device: DeviceContext,
}

impl InputContext {
    /// Clears the drop, add and control fields of the input control context. The slot and
    /// endpoint contexts keep their contents.
    pub fn reset_control(&mut self) {
        self.control.drop_flags.write(0);
        self.control.add_flags.write(0);
        self.control.control.write(0);
    }

    /// Marks context `dci` (0 being the slot context) to be added or evaluated.
    pub fn add_context(&mut self, dci: u8) {
        let flags = self.control.add_flags.read();
        self.control.add_flags.write(flags | (1 << dci));
    }

    pub fn add_flags(&self) -> u32 {
        self.control.add_flags.read()
    }

    pub fn slot(&mut self) -> &mut SlotContext {
        &mut self.device.slot
    }

    pub fn endpoint(&mut self, dci: u8) -> &mut EndpointContext {
        &mut self.device.endpoints[usize::from(dci) - 1]
    }
}

/// Scratchpad Buffer Array and the pages it points at, published in context array entry 0.
pub struct ScratchpadBufferArray {
    pub entries: Dma<[Mmio<u64>]>,
    pub pages: Vec<usize>,
}

impl ScratchpadBufferArray {
    pub fn new(pool: &DmaPool, count: u16, page_size: usize) -> Result<Self> {
        // SAFETY: zeroed pointers are valid `Mmio<u64>` values.
        let mut entries =
            unsafe { Dma::<[Mmio<u64>]>::zeroed_unsized(pool, usize::from(count), CONTEXT_ALIGN, page_size)? };
        let mut pages = Vec::with_capacity(usize::from(count));
        for entry in entries.iter_mut() {
            let page = pool.alloc(page_size, page_size, page_size)?;
            entry.write(page as u64);
            pages.push(page);
        }
        Ok(Self { entries, pages })
    }

    pub fn register(&self) -> u64 {
        self.entries.physical() as u64
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::mem;

    #[test]
    fn context_size() {
        assert_eq!(mem::size_of::<SlotContext>(), 32);
        assert_eq!(mem::size_of::<EndpointContext>(), 32);
        assert_eq!(mem::size_of::<InputControlContext>(), 32);
        assert_eq!(mem::size_of::<DeviceContext>(), 1024);
        assert_eq!(mem::size_of::<InputContext>(), 1056);
    }

    #[test]
    fn slot_fields() {
        let mut slot: SlotContext = unsafe { mem::zeroed() };
        slot.set_speed(3);
        slot.set_context_entries(1);
        slot.set_route_string(0);
        slot.set_root_hub_port(7);
        assert_eq!(slot.a.read(), (1 << 27) | (3 << 20));
        assert_eq!(slot.b.read(), 7 << 16);
        assert_eq!(slot.speed(), 3);
        assert_eq!(slot.context_entries(), 1);
        assert_eq!(slot.root_hub_port(), 7);

        // Writing a field leaves its neighbours alone.
        slot.set_context_entries(31);
        assert_eq!(slot.speed(), 3);
        assert_eq!(slot.context_entries(), 31);
    }

    #[test]
    fn endpoint_fields() {
        let mut ep: EndpointContext = unsafe { mem::zeroed() };
        ep.set_ep_type(EndpointType::Control);
        ep.set_max_packet_size(64);
        ep.set_error_count(3);
        ep.set_tr_dequeue_pointer(0x1_2345_6780, true);
        ep.set_average_trb_length(8);
        ep.set_interval(7);

        assert_eq!(ep.b.read(), (64 << 16) | (4 << 3) | (3 << 1));
        assert_eq!(ep.trl.read(), 0x2345_6781);
        assert_eq!(ep.trh.read(), 0x1);
        assert_eq!(ep.tr_dequeue_pointer(), 0x1_2345_6780);
        assert!(ep.dequeue_cycle_state());
        assert_eq!(ep.interval(), 7);
        assert_eq!(ep.a.read(), 7 << 16);
        assert_eq!(ep.c.read(), 8);

        ep.set_max_esit_payload(0x01_0040);
        assert_eq!(ep.c.read(), (0x0040 << 16) | 8);
        assert_eq!(ep.a.read() >> 24, 0x01);
    }
}
