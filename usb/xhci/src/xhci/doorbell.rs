use std::sync::{Arc, Mutex};

use common::io::{Io, Mmio};

use super::lock;

#[repr(C)]
pub struct Doorbell(Mmio<u32>);

impl Doorbell {
    pub fn read(&self) -> u32 {
        self.0.read()
    }

    pub fn write(&mut self, data: u32) {
        self.0.write(data);
    }
}

/// The doorbell array, shared between the controller and every device it owns.
pub type Doorbells = Arc<Mutex<&'static mut [Doorbell]>>;

/// The doorbell of one slot. Devices ring it with the DCI of the endpoint whose transfer ring
/// gained records.
pub struct DeviceDoorbell {
    dbs: Doorbells,
    slot: u8,
}

impl DeviceDoorbell {
    pub fn new(dbs: Doorbells, slot: u8) -> Self {
        Self { dbs, slot }
    }

    pub fn ring(&self, target: u8) {
        lock(&*self.dbs)[usize::from(self.slot)].write(u32::from(target));
    }
}
