//! The xHCI host controller.
//!
//! [Xhci] owns the register blocks, the command ring, the primary event ring and the slot
//! table. It is shared as an `Arc` between three parties:
//!
//! - whoever receives the controller interrupt, which calls [Xhci::process_events],
//! - the [DeviceEnumerator], which walks queued ports through enumeration one at a time,
//! - consumers of class driver output such as [Xhci::keyboard_events].
//!
//! The event handlers never wait for the hardware. They correlate an event with the command,
//! port or device it belongs to and either advance the device themselves or post a
//! [Message::HardwareEvent] to the enumerator.
//!
//! Each resource has its own lock. A thread holding the device table or the command ring may
//! take the doorbells; no other lock is taken while another is held, except that event
//! dispatch holds the event ring throughout.
use std::collections::VecDeque;
use std::slice;
use std::sync::{Arc, Mutex, MutexGuard};
use std::{cmp, mem};

use common::dma::DmaPool;
use common::io::Io;
use common::timeout::Timeout;
use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, info, trace};

use crate::class::KeyEvent;
use crate::config::XhciConfig;
use crate::error::{Result, XhciError};

use self::capability::CapabilityRegs;
use self::context::ScratchpadBufferArray;
use self::device::Device;
use self::device_manager::DeviceManager;
use self::doorbell::{Doorbell, Doorbells};
use self::event::EventRing;
use self::operational::{OperationalRegs, PORT_REGS_OFFSET, USB_CMD_HCRST, USB_CMD_INTE, USB_CMD_RS};
use self::port::{Port, PortFlags};
use self::ring::Ring;
use self::runtime::{RuntimeRegs, IMAN_IE, IMAN_IP};
use self::trb::Trb;

pub use self::device_enumerator::DeviceEnumerator;

pub mod capability;
pub mod context;
pub mod device;
pub mod device_enumerator;
pub mod device_manager;
pub mod doorbell;
pub mod event;
pub mod irq_reactor;
pub mod operational;
pub mod port;
pub mod ring;
pub mod runtime;
pub mod setup_map;
pub mod trb;

/// What the event handlers tell the enumerator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Message {
    /// A port joined the enumeration queue.
    PortQueued(u8),
    /// The step the enumerator is waiting on finished.
    HardwareEvent { success: bool },
}

/// Locks `mutex`, carrying on with the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|err| err.into_inner())
}

pub struct Xhci {
    cap: &'static CapabilityRegs,
    op: Mutex<&'static mut OperationalRegs>,
    ports: Mutex<&'static mut [Port]>,
    dbs: Doorbells,
    run: Mutex<&'static mut RuntimeRegs>,

    cmd: Mutex<Ring>,
    primary_event_ring: Mutex<EventRing>,
    devices: Mutex<DeviceManager>,

    /// Root ports waiting for enumeration; the front one is in progress.
    port_queue: Mutex<VecDeque<u8>>,
    message_sender: Sender<Message>,
    message_receiver: Receiver<Message>,
    keyboard_events: Receiver<KeyEvent>,

    pool: Arc<DmaPool>,
    config: XhciConfig,
    max_slots: u8,
}

impl Xhci {
    /// Maps the register blocks of the controller at `address` and allocates the command ring,
    /// the event ring and the slot table from `pool`. The controller itself is not touched
    /// until [Xhci::initialize].
    ///
    /// # Safety
    /// `address` must be the controller's MMIO base, mapped for the rest of the program, and
    /// nothing else may access it.
    pub unsafe fn new(address: usize, pool: Arc<DmaPool>, config: XhciConfig) -> Result<Xhci> {
        config.validate()?;

        let cap = &*(address as *const CapabilityRegs);
        debug!("CAP REGS BASE {:X}", address);

        if cap.csz() {
            error!("controller uses 64-byte contexts, which are not supported");
            return Err(XhciError::Unsupported("64-byte contexts"));
        }

        let op_base = address + usize::from(cap.len.read());
        let op = &mut *(op_base as *mut OperationalRegs);
        debug!("OP REGS BASE {:X}", op_base);

        let max_ports = cap.max_ports();
        let ports = slice::from_raw_parts_mut(
            (op_base + PORT_REGS_OFFSET) as *mut Port,
            usize::from(max_ports),
        );

        let db_base = address + cap.db_offset();
        let dbs: &'static mut [Doorbell] =
            slice::from_raw_parts_mut(db_base as *mut Doorbell, usize::from(cap.max_slots()) + 1);
        debug!("DOORBELL REGS BASE {:X}", db_base);

        let run_base = address + cap.rts_offset();
        let run = &mut *(run_base as *mut RuntimeRegs);
        debug!("RUNTIME REGS BASE {:X}", run_base);

        let max_slots = cmp::min(cap.max_slots(), config.max_slots);
        let (message_sender, message_receiver) = crossbeam_channel::unbounded();
        let (keyboard_sender, keyboard_events) = crossbeam_channel::unbounded();

        let cmd = Ring::new(&pool, config.command_ring_len)?;
        let primary_event_ring = EventRing::new(&pool, config.event_ring_len)?;
        let devices = DeviceManager::new(
            Arc::clone(&pool),
            max_slots,
            config.transfer_ring_len,
            keyboard_sender,
        )?;

        Ok(Xhci {
            cap,
            op: Mutex::new(op),
            ports: Mutex::new(ports),
            dbs: Arc::new(Mutex::new(dbs)),
            run: Mutex::new(run),
            cmd: Mutex::new(cmd),
            primary_event_ring: Mutex::new(primary_event_ring),
            devices: Mutex::new(devices),
            port_queue: Mutex::new(VecDeque::new()),
            message_sender,
            message_receiver,
            keyboard_events,
            pool,
            config,
            max_slots,
        })
    }

    /// Resets the controller and points it at the slot table, the command ring and the event
    /// ring. See XHCI 4.2
    pub fn initialize(&self) -> Result<()> {
        info!(
            "xHCI version {:x}: {} slots ({} enabled), {} ports, 64-bit {}",
            self.cap.hci_ver.read(),
            self.cap.max_slots(),
            self.max_slots,
            self.cap.max_ports(),
            self.cap.ac64()
        );

        let page_size = {
            let mut op = lock(&self.op);

            if !op.halted() {
                debug!("Halting controller");
                op.usb_cmd.writef(USB_CMD_RS, false);
                let timeout = Timeout::from_secs(1);
                while !op.halted() {
                    timeout.run().map_err(|()| XhciError::Timeout("controller halt"))?;
                }
            }

            debug!("Resetting controller");
            op.usb_cmd.writef(USB_CMD_HCRST, true);
            let timeout = Timeout::from_secs(1);
            while op.usb_cmd.readf(USB_CMD_HCRST) || op.not_ready() {
                timeout.run().map_err(|()| XhciError::Timeout("controller reset"))?;
            }

            op.set_max_slots_enabled(self.max_slots);

            // Bit n set means pages of 2^(n + 12) bytes.
            match op.page_size.read() & 0xFFFF {
                0 => 4096,
                bits => 1usize << (bits.trailing_zeros() + 12),
            }
        };

        let dcbaap = {
            let mut devices = lock(&self.devices);
            let scratchpad_bufs = self.cap.max_scratchpad_bufs();
            if scratchpad_bufs > 0 {
                debug!("{} scratchpad buffers of {} bytes", scratchpad_bufs, page_size);
                devices.set_scratchpad(ScratchpadBufferArray::new(&self.pool, scratchpad_bufs, page_size)?);
            }
            devices.dcbaap()
        };
        let crcr = lock(&self.cmd).register();

        {
            let mut op = lock(&self.op);
            op.set_dcbaap(dcbaap);
            op.set_crcr(crcr);
            debug!("DCBAAP {:X} CRCR {:X}", dcbaap, crcr);
        }

        {
            let event_ring = lock(&self.primary_event_ring);
            let mut run = lock(&self.run);
            let int = &mut run.ints[0];
            event_ring.initialize(int);
            int.imod.write(u32::from(self.config.interrupt_moderation));
            // IP is write-one-to-clear, so this also drops anything pending.
            int.iman.write(IMAN_IE | IMAN_IP);
        }

        lock(&self.op).usb_cmd.writef(USB_CMD_INTE, true);
        Ok(())
    }

    /// Sets Run/Stop and waits for the controller to leave the halted state.
    pub fn run(&self) -> Result<()> {
        let mut op = lock(&self.op);
        op.usb_cmd.writef(USB_CMD_RS, true);
        let timeout = Timeout::from_secs(1);
        while op.halted() {
            timeout.run().map_err(|()| XhciError::Timeout("controller start"))?;
        }
        info!("controller running");
        Ok(())
    }

    pub fn max_ports(&self) -> u8 {
        lock(&self.ports).len() as u8
    }

    pub fn max_slots(&self) -> u8 {
        self.max_slots
    }

    /// Queues every root port that already has a device connected, as a connect status change
    /// would. Returns how many were queued.
    pub fn poll_ports(&self) -> usize {
        let connected: Vec<u8> = lock(&self.ports)
            .iter()
            .enumerate()
            .filter(|(_, port)| port.is_connected())
            .map(|(i, _)| (i + 1) as u8)
            .collect();

        connected.iter().filter(|&&port| self.queue_port(port)).count()
    }

    /* Enumeration queue */

    /// Adds `port` to the enumeration queue unless it is already waiting. A port that is being
    /// enumerated right now is queued again, so that a change seen meanwhile is looked at.
    pub fn queue_port(&self, port: u8) -> bool {
        let queued = {
            let mut queue = lock(&self.port_queue);
            if queue.iter().skip(1).any(|&queued| queued == port) {
                false
            } else {
                queue.push_back(port);
                true
            }
        };
        if queued {
            debug!("port {} queued for enumeration", port);
            let _ = self.message_sender.send(Message::PortQueued(port));
        }
        queued
    }

    /// The enumeration queue, front first.
    pub fn queued_ports(&self) -> Vec<u8> {
        lock(&self.port_queue).iter().copied().collect()
    }

    /// The port being enumerated.
    pub fn front_port(&self) -> Option<u8> {
        lock(&self.port_queue).front().copied()
    }

    /// Drops `port` from the front of the queue once the enumerator is done with it.
    pub fn finish_port(&self, port: u8) {
        let mut queue = lock(&self.port_queue);
        if queue.front() == Some(&port) {
            queue.pop_front();
        }
    }

    pub fn messages(&self) -> Receiver<Message> {
        self.message_receiver.clone()
    }

    pub(crate) fn post(&self, success: bool) {
        trace!("posting outcome {}", success);
        let _ = self.message_sender.send(Message::HardwareEvent { success });
    }

    pub fn keyboard_events(&self) -> Receiver<KeyEvent> {
        self.keyboard_events.clone()
    }

    /* Ports */

    pub fn port_flags(&self, port: u8) -> Result<PortFlags> {
        let ports = lock(&self.ports);
        let index = usize::from(port).wrapping_sub(1);
        ports.get(index).map(Port::flags).ok_or(XhciError::InvalidPort(port))
    }

    /// Resets a connected port and waits for the controller to drop PR again. The ports lock is
    /// only taken per register access, since event dispatch needs it meanwhile.
    pub fn reset_port(&self, port: u8) -> Result<()> {
        let index = usize::from(port).wrapping_sub(1);
        lock(&self.ports)
            .get_mut(index)
            .ok_or(XhciError::InvalidPort(port))?
            .start_reset()?;

        let timeout = Timeout::from_secs(1);
        while self.port_flags(port)?.contains(PortFlags::PR) {
            timeout.run().map_err(|()| XhciError::Timeout("port reset"))?;
        }
        Ok(())
    }

    /* Commands */

    fn issue_command(&self, trb: Trb) -> u64 {
        let mut cmd = lock(&self.cmd);
        let address = cmd.push(trb);
        lock(&*self.dbs)[0].write(0);
        address
    }

    pub fn enable_slot(&self) {
        self.issue_command(Trb::enable_slot(0));
    }

    pub fn address_device(&self, slot: u8) -> Result<()> {
        let input = lock(&self.devices)
            .find_by_slot(slot)
            .ok_or(XhciError::NoSuchSlot(slot))?
            .input_context_phys();
        self.issue_command(Trb::address_device(slot, input, false));
        Ok(())
    }

    /// Tells the controller the default pipe's real packet size with Evaluate Context.
    pub fn reconfigure_default_pipe(&self, slot: u8) -> Result<()> {
        let input = lock(&self.devices)
            .find_by_slot_mut(slot)
            .ok_or(XhciError::NoSuchSlot(slot))?
            .prepare_evaluate_context();
        self.issue_command(Trb::evaluate_context(slot, input));
        Ok(())
    }

    /// Adds the endpoints the class drivers use, one transfer ring each.
    pub fn configure_endpoints(&self, slot: u8) -> Result<()> {
        let input = lock(&self.devices)
            .find_by_slot_mut(slot)
            .ok_or(XhciError::NoSuchSlot(slot))?
            .prepare_configure_endpoints()?;
        self.issue_command(Trb::configure_endpoint(slot, input));
        Ok(())
    }

    pub fn disable_slot(&self, slot: u8) {
        self.issue_command(Trb::disable_slot(slot));
    }

    /* Devices */

    fn with_device_mut<R>(&self, slot: u8, f: impl FnOnce(&mut Device) -> Result<R>) -> Result<R> {
        let mut devices = lock(&self.devices);
        let device = devices.find_by_slot_mut(slot).ok_or(XhciError::NoSuchSlot(slot))?;
        f(device)
    }

    pub fn probe_device(&self, slot: u8) -> Result<()> {
        self.with_device_mut(slot, Device::probe)
    }

    pub fn start_enumeration(&self, slot: u8) -> Result<()> {
        self.with_device_mut(slot, Device::start_enumeration)
    }

    pub fn on_endpoints_configured(&self, slot: u8) -> Result<()> {
        self.with_device_mut(slot, Device::on_endpoints_configured)
    }

    /// Removes the device in `slot` from the slot table.
    pub fn release_slot(&self, slot: u8) -> Result<()> {
        let device = lock(&self.devices).disable_slot(slot)?;
        info!("port {}: device in slot {} removed", device.port(), slot);
        mem::drop(device);
        Ok(())
    }

    pub fn slot_for_port(&self, port: u8) -> Option<u8> {
        lock(&self.devices).find_by_port(port).map(Device::slot)
    }

    pub fn with_device_by_port<R>(&self, port: u8, f: impl FnOnce(&Device) -> R) -> Option<R> {
        lock(&self.devices).find_by_port(port).map(f)
    }

    pub fn with_device_by_slot<R>(&self, slot: u8, f: impl FnOnce(&Device) -> R) -> Option<R> {
        lock(&self.devices).find_by_slot(slot).map(f)
    }
}
