//! Event dispatch: what runs when the controller raises its interrupt.
//!
//! Every handler correlates the event with software state and returns without waiting on the
//! hardware. Events that match nothing are logged and dropped; after a disconnect that is the
//! common case, not an error.
use std::sync::Arc;

use common::io::Io;
use log::{debug, error, trace, warn};

use super::device::{InitPhase, Progress};
use super::doorbell::DeviceDoorbell;
use super::operational::USB_STS_EINT;
use super::port::PortFlags;
use super::runtime::IMAN_IP;
use super::trb::{Trb, TrbType};
use super::{lock, Xhci};
use crate::error::{Result, XhciError};

impl Xhci {
    /// Handles the event at the front of the event ring, if there is one. The event is consumed
    /// whatever its handler made of it.
    pub fn process_event(&self) -> bool {
        let mut event_ring = lock(&self.primary_event_ring);
        let event = match event_ring.front() {
            Some(event) => event.clone(),
            None => return false,
        };
        trace!("EVENT {}", event);

        match event.kind() {
            Some(TrbType::CommandCompletion) => self.handle_command_completion(&event),
            Some(TrbType::PortStatusChange) => self.handle_port_status_change(&event),
            Some(TrbType::Transfer) => self.handle_transfer_event(&event),
            _ => warn!("unhandled event type {}: {:?}", event.trb_type(), event),
        }

        let mut run = lock(&self.run);
        event_ring.pop(&mut run.ints[0]);
        true
    }

    /// The interrupt entry point: acknowledges the interrupt and drains the event ring. Returns
    /// the number of events handled.
    pub fn process_events(&self) -> usize {
        {
            let mut run = lock(&self.run);
            let iman = run.ints[0].iman.read();
            run.ints[0].iman.write(iman | IMAN_IP);
        }
        lock(&self.op).usb_sts.write(USB_STS_EINT);

        let mut count = 0;
        while self.process_event() {
            count += 1;
        }
        count
    }

    fn handle_command_completion(&self, event: &Trb) {
        let ptr = match event.completion_trb_pointer() {
            Some(ptr) => ptr,
            None => {
                warn!("command completion without a command pointer: {}", event);
                return;
            }
        };
        let command = match lock(&self.cmd).phys_addr_to_entry(ptr) {
            Some(command) => command.clone(),
            None => {
                warn!("completion for {:#x}, which is not on the command ring", ptr);
                return;
            }
        };

        let success = event.is_success();
        if success {
            debug!("{:?} completed, slot {}", command.kind(), event.slot_id());
        } else {
            error!(
                "{:?} for slot {} failed with completion code {}",
                command.kind(),
                command.slot_id(),
                event.completion_code()
            );
        }

        match command.kind() {
            Some(TrbType::EnableSlot) => self.on_slot_enabled(event.slot_id(), success),
            Some(TrbType::AddressDevice)
            | Some(TrbType::EvaluateContext)
            | Some(TrbType::ConfigureEndpoint)
            | Some(TrbType::DisableSlot) => self.post_for_slot(command.slot_id(), success),
            Some(TrbType::NoOpCmd) => trace!("no-op command completed"),
            _ => warn!("completion for unexpected command {:?}", command),
        }
    }

    /// Allocates the device for a freshly enabled slot. The slot belongs to the port being
    /// enumerated, as only the enumerator enables slots.
    fn on_slot_enabled(&self, slot: u8, success: bool) {
        let port = match self.front_port() {
            Some(port) => port,
            None => {
                warn!("slot {} enabled while no port is being enumerated", slot);
                return;
            }
        };
        if !success {
            self.post(false);
            return;
        }

        match self.alloc_device(slot, port) {
            Ok(()) => self.post(true),
            Err(err) => {
                error!("port {}: {}", port, err);
                self.post(false);
            }
        }
    }

    fn alloc_device(&self, slot: u8, port: u8) -> Result<()> {
        let speed = {
            let ports = lock(&self.ports);
            let root = ports
                .get(usize::from(port).wrapping_sub(1))
                .ok_or(XhciError::InvalidPort(port))?;
            root.speed().ok_or(XhciError::UnknownSpeed(root.speed_id()))?
        };

        let doorbell = DeviceDoorbell::new(Arc::clone(&self.dbs), slot);
        lock(&self.devices).alloc_device(slot, port, speed, doorbell)?;
        Ok(())
    }

    /// Posts a command outcome if the command was for the device being enumerated.
    fn post_for_slot(&self, slot: u8, success: bool) {
        let port = lock(&self.devices).find_by_slot(slot).map(|device| device.port());
        match port {
            Some(port) if self.front_port() == Some(port) => self.post(success),
            _ => debug!("dropping completion for slot {}, which is not being enumerated", slot),
        }
    }

    fn handle_port_status_change(&self, event: &Trb) {
        let port_id = event.port_status_change_port_id();
        let front = self.front_port();

        let (reset_outcome, connect_changed) = {
            let mut ports = lock(&self.ports);
            let port = match ports.get_mut(usize::from(port_id).wrapping_sub(1)) {
                Some(port) => port,
                None => {
                    warn!("status change for nonexistent port {}", port_id);
                    return;
                }
            };

            let flags = port.flags();
            debug!("port {} status change: {:?}", port_id, flags);

            let mut reset_outcome = None;
            if flags.contains(PortFlags::PRC) {
                port.clear_prc();
                if front == Some(port_id) {
                    reset_outcome = Some(flags.contains(PortFlags::CCS | PortFlags::PED));
                }
            }

            let connect_changed = flags.contains(PortFlags::CSC);
            if connect_changed {
                port.clear_csc();
            }

            let others = flags & (PortFlags::CHANGES - PortFlags::CSC - PortFlags::PRC);
            port.clear_changes(others);

            (reset_outcome, connect_changed)
        };

        if let Some(success) = reset_outcome {
            self.post(success);
        }
        if connect_changed {
            self.queue_port(port_id);
        }
    }

    fn handle_transfer_event(&self, event: &Trb) {
        let slot = event.slot_id();
        let front = self.front_port();

        let (port, initializing, result) = {
            let mut devices = lock(&self.devices);
            let device = match devices.find_by_slot_mut(slot) {
                Some(device) => device,
                None => {
                    debug!("transfer event for empty slot {}", slot);
                    return;
                }
            };
            let initializing = device.phase() != InitPhase::Initialized;
            (device.port(), initializing, device.on_transfer_event(event))
        };

        let in_progress = front == Some(port);
        match result {
            Ok(Progress::PhaseComplete) if in_progress => self.post(true),
            Ok(Progress::PhaseComplete) => debug!("slot {}: phase complete, but not being enumerated", slot),
            Ok(Progress::Pending) | Ok(Progress::Ignored) => (),
            Err(err) if initializing && in_progress => {
                warn!("port {} slot {}: {}", port, slot, err);
                self.post(false);
            }
            Err(err) => warn!("slot {}: {}", slot, err),
        }
    }
}
