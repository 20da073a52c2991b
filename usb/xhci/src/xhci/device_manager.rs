use std::sync::Arc;

use common::dma::{Dma, DmaPool};
use common::io::{Io, Mmio};
use crossbeam_channel::Sender;
use log::{debug, info};

use super::context::{ScratchpadBufferArray, CONTEXT_ALIGN};
use super::device::Device;
use super::doorbell::DeviceDoorbell;
use super::port::PortSpeed;
use crate::class::KeyEvent;
use crate::error::{Result, XhciError};

/// The slot table: the Device Context Base Address Array the controller reads, and the device
/// objects behind it. Entry `n` of both belongs to slot `n`; entry 0 of the array points at
/// the scratchpad buffers, if any.
pub struct DeviceManager {
    dcbaa: Dma<[Mmio<u64>]>,
    devices: Vec<Option<Device>>,
    scratchpad: Option<ScratchpadBufferArray>,
    pool: Arc<DmaPool>,
    transfer_ring_len: usize,
    keyboard_events: Sender<KeyEvent>,
}

impl DeviceManager {
    pub fn new(
        pool: Arc<DmaPool>,
        max_slots: u8,
        transfer_ring_len: usize,
        keyboard_events: Sender<KeyEvent>,
    ) -> Result<Self> {
        let entries = usize::from(max_slots) + 1;
        // SAFETY: a null pointer marks an unused slot.
        let dcbaa = unsafe { Dma::<[Mmio<u64>]>::zeroed_unsized(&pool, entries, CONTEXT_ALIGN, 4096)? };
        let devices = (0..entries).map(|_| None).collect();

        Ok(Self {
            dcbaa,
            devices,
            scratchpad: None,
            pool,
            transfer_ring_len,
            keyboard_events,
        })
    }

    /// DCBAAP value.
    pub fn dcbaap(&self) -> u64 {
        self.dcbaa.physical() as u64
    }

    pub fn max_slots(&self) -> u8 {
        (self.devices.len() - 1) as u8
    }

    pub fn set_scratchpad(&mut self, scratchpad: ScratchpadBufferArray) {
        self.dcbaa[0].write(scratchpad.register());
        self.scratchpad = Some(scratchpad);
    }

    /// Builds the device for a slot the controller just enabled and publishes its output
    /// context.
    pub fn alloc_device(
        &mut self,
        slot: u8,
        port: u8,
        speed: PortSpeed,
        doorbell: DeviceDoorbell,
    ) -> Result<&mut Device> {
        let index = usize::from(slot);
        if index == 0 || index >= self.devices.len() {
            return Err(XhciError::InvalidSlotId(slot));
        }
        if self.devices[index].is_some() {
            return Err(XhciError::SlotOccupied(slot));
        }

        let device = Device::new(
            Arc::clone(&self.pool),
            slot,
            port,
            speed,
            doorbell,
            self.transfer_ring_len,
            self.keyboard_events.clone(),
        )?;
        self.dcbaa[index].write(device.output_context_phys());
        info!("port {}: slot {} allocated ({:?} speed)", port, slot, speed);

        Ok(self.devices[index].insert(device))
    }

    pub fn find_by_slot(&self, slot: u8) -> Option<&Device> {
        self.devices.get(usize::from(slot))?.as_ref()
    }

    pub fn find_by_slot_mut(&mut self, slot: u8) -> Option<&mut Device> {
        self.devices.get_mut(usize::from(slot))?.as_mut()
    }

    pub fn find_by_port(&self, port: u8) -> Option<&Device> {
        self.devices.iter().flatten().find(|device| device.port() == port)
    }

    pub fn find_by_port_mut(&mut self, port: u8) -> Option<&mut Device> {
        self.devices.iter_mut().flatten().find(|device| device.port() == port)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter().flatten()
    }

    /// Forgets the device in `slot`. Its memory stays with the pool, which never frees.
    pub fn disable_slot(&mut self, slot: u8) -> Result<Device> {
        let index = usize::from(slot);
        if index == 0 || index >= self.devices.len() {
            return Err(XhciError::InvalidSlotId(slot));
        }
        let device = self.devices[index].take().ok_or(XhciError::NoSuchSlot(slot))?;
        self.dcbaa[index].write(0);
        debug!("slot {} disabled", slot);
        Ok(device)
    }
}
