//! A software xHCI controller with HID boot keyboards on its root ports.
//!
//! The register block lives in leaked heap memory. Two threads play the hardware:
//!
//! - the register thread services USBCMD and PORTSC writes. It never calls into the driver,
//!   because the driver busy-waits on these registers.
//! - the controller thread consumes the command and transfer rings, posts events and then runs
//!   the driver's interrupt handler, as an interrupt would.
//!
//! Everything the driver hands over is read back in its raw layout, so the tests check the
//! wire format and not just the driver's own accessors.
#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::ptr;
use std::sync::atomic::{fence, AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use common::dma::DmaPool;
use xhci_core::{DeviceEnumerator, Xhci, XhciConfig};

const MMIO_LEN: usize = 0x1_0000;
const DMA_LEN: usize = 0x10_0000;

pub const MAX_SLOTS: u8 = 8;
pub const MAX_PORTS: u8 = 4;

const CAP_LEN: usize = 0x20;
const DB_OFFSET: usize = 0x2000;
const RT_OFFSET: usize = 0x3000;

const OP_USBCMD: usize = CAP_LEN;
const OP_USBSTS: usize = CAP_LEN + 0x04;
const OP_PAGESIZE: usize = CAP_LEN + 0x08;
const OP_CRCR: usize = CAP_LEN + 0x18;
const OP_DCBAAP: usize = CAP_LEN + 0x30;
const OP_PORTS: usize = CAP_LEN + 0x400;
const INT0: usize = RT_OFFSET + 0x20;

const USBCMD_RS: u32 = 1 << 0;
const USBCMD_HCRST: u32 = 1 << 1;
const USBSTS_HCH: u32 = 1 << 0;

const PORTSC_CCS: u32 = 1 << 0;
const PORTSC_PED: u32 = 1 << 1;
const PORTSC_PR: u32 = 1 << 4;
const PORTSC_PP: u32 = 1 << 9;
const PORTSC_FULL_SPEED: u32 = 1 << 10;
const PORTSC_CSC: u32 = 1 << 17;
const PORTSC_PRC: u32 = 1 << 21;
const PORTSC_CHANGES: u32 = 0x7F << 17;
/// A reserved bit the simulator keeps set. The driver never writes it back, so every driver
/// write is visible even when it stores the value already there.
const PORTSC_SENTINEL: u32 = 1 << 29;

const TRB_NORMAL: u8 = 1;
const TRB_SETUP: u8 = 2;
const TRB_DATA: u8 = 3;
const TRB_STATUS: u8 = 4;
const TRB_LINK: u8 = 6;
pub const TRB_ENABLE_SLOT: u8 = 9;
pub const TRB_DISABLE_SLOT: u8 = 10;
pub const TRB_ADDRESS_DEVICE: u8 = 11;
pub const TRB_CONFIGURE_ENDPOINT: u8 = 12;
pub const TRB_EVALUATE_CONTEXT: u8 = 13;
const TRB_TRANSFER_EVENT: u32 = 32;
const TRB_COMMAND_COMPLETION: u32 = 33;
const TRB_PORT_STATUS_CHANGE: u32 = 34;

const CC_SUCCESS: u32 = 1;
const CC_TRB_ERROR: u32 = 5;
const CC_STALL: u32 = 6;
const CC_NO_SLOTS: u32 = 9;
const CC_SHORT_PACKET: u32 = 13;

pub const DEVICE_DESCRIPTOR: [u8; 18] = [
    18, 1, 0x00, 0x02, 0, 0, 0, 64, 0x6D, 0x04, 0x1C, 0xC3, 0x00, 0x01, 1, 2, 0, 1,
];

pub const CONFIG_DESCRIPTOR: [u8; 34] = [
    // configuration 1, one interface
    9, 2, 34, 0, 1, 1, 0, 0xA0, 50,
    // interface 0: HID, boot subclass, keyboard protocol
    9, 4, 0, 0, 1, 3, 1, 1, 0,
    // HID 1.11 with one report descriptor
    9, 0x21, 0x11, 0x01, 0, 1, 0x22, 63, 0,
    // endpoint 1 IN, interrupt, 8 bytes every 10 frames
    7, 5, 0x81, 3, 8, 0, 10,
];

/// Something the driver made the hardware do.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Record {
    Reset(u8),
    /// A command by TRB type, with the slot it was for (or was given, for Enable Slot).
    Command(u8, u8),
}

/// An endpoint added by Configure Endpoint, as read from the input context.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EndpointRecord {
    pub slot: u8,
    pub dci: u8,
    pub ep_type: u8,
    pub interval: u8,
    pub max_packet_size: u16,
}

#[derive(Clone, Debug)]
pub struct Options {
    /// Root ports with a keyboard plugged in.
    pub connected: Vec<u8>,
    /// Post a connect change for those ports once the controller runs.
    pub announce: bool,
    pub scratchpad_bufs: u32,
    /// Ports that keep PR set for [SLOW_RESET] before finishing a reset.
    pub slow_reset: Vec<u8>,
    /// Ports whose device is refused by Address Device.
    pub failing_address: Vec<u8>,
}

impl Options {
    pub fn keyboards(ports: &[u8]) -> Self {
        Options {
            connected: ports.to_vec(),
            announce: true,
            scratchpad_bufs: 0,
            slow_reset: Vec::new(),
            failing_address: Vec::new(),
        }
    }
}

pub const SLOW_RESET: Duration = Duration::from_millis(400);

#[derive(Default)]
struct Shared {
    stop: AtomicBool,
    log: Mutex<Vec<Record>>,
    endpoints: Mutex<Vec<EndpointRecord>>,
    control_mps: Mutex<BTreeMap<u8, u16>>,
    /// Root port of each addressed slot, from its slot context.
    root_ports: Mutex<BTreeMap<u8, u8>>,
    reports: Mutex<VecDeque<[u8; 8]>>,
    /// Ports whose status changed, for the controller thread to announce.
    port_events: Mutex<VecDeque<u8>>,
    /// Plug (true) or unplug (false) requests for the register thread.
    port_requests: Mutex<VecDeque<(u8, bool)>>,
    /// Raw events for the controller thread to post as they are.
    raw_events: Mutex<VecDeque<(u64, u32, u32)>>,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|err| err.into_inner())
}

fn reg(address: usize) -> &'static AtomicU32 {
    unsafe { &*(address as *const AtomicU32) }
}

fn read64(address: u64) -> u64 {
    let low = reg(address as usize).load(Ordering::Acquire);
    let high = reg(address as usize + 4).load(Ordering::Acquire);
    u64::from(low) | (u64::from(high) << 32)
}

pub fn setup_logging() {
    static LOGGING: Once = Once::new();
    LOGGING.call_once(|| common::logger::setup_logging("usb", "xhci-test", log::LevelFilter::Debug));
}

/// Polls `condition` until it holds or five seconds pass.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}

pub struct Simulator {
    hci: Arc<Xhci>,
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
}

impl Simulator {
    /// Brings up the register block, initializes a driver on it and starts the controller.
    pub fn start(options: Options) -> Simulator {
        setup_logging();

        let words = vec![0u64; MMIO_LEN / 8].into_boxed_slice();
        let base = Box::leak(words).as_mut_ptr() as usize;
        unsafe {
            ptr::write_volatile(base as *mut u8, CAP_LEN as u8);
            ptr::write_volatile((base + 2) as *mut u16, 0x0110);
        }
        reg(base + 0x04).store(u32::from(MAX_SLOTS) | (1 << 8) | (u32::from(MAX_PORTS) << 24), Ordering::Release);
        reg(base + 0x08).store((options.scratchpad_bufs & 0x1F) << 27, Ordering::Release);
        reg(base + 0x10).store(1, Ordering::Release);
        reg(base + 0x14).store(DB_OFFSET as u32, Ordering::Release);
        reg(base + 0x18).store(RT_OFFSET as u32, Ordering::Release);
        reg(base + OP_USBSTS).store(USBSTS_HCH, Ordering::Release);
        reg(base + OP_PAGESIZE).store(1, Ordering::Release);

        let mut portsc = [PORTSC_PP; MAX_PORTS as usize];
        for &port in &options.connected {
            let mut value = PORTSC_PP | PORTSC_CCS | PORTSC_FULL_SPEED;
            if options.announce {
                value |= PORTSC_CSC;
            }
            portsc[usize::from(port - 1)] = value;
        }

        let shared = Arc::new(Shared::default());
        let mut threads = Vec::new();
        {
            let shared = Arc::clone(&shared);
            let slow_reset = options.slow_reset.clone();
            threads.push(thread::spawn(move || registers(base, &shared, portsc, &slow_reset)));
        }

        let pool = Arc::new(DmaPool::from_heap(DMA_LEN));
        let hci = unsafe { Xhci::new(base, pool, XhciConfig::default()) }.expect("driver setup");
        hci.initialize().expect("controller initialization");
        let hci = Arc::new(hci);

        {
            let shared = Arc::clone(&shared);
            let hci = Arc::clone(&hci);
            let announce: Vec<u8> = if options.announce { options.connected.clone() } else { Vec::new() };
            let failing_address = options.failing_address.clone();
            threads.push(thread::spawn(move || {
                Controller::start(base, hci, shared, announce, failing_address).run()
            }));
        }

        hci.run().expect("controller start");
        Simulator { hci, shared, threads }
    }

    pub fn hci(&self) -> Arc<Xhci> {
        Arc::clone(&self.hci)
    }

    /// Starts a device enumerator. It blocks for good once the queue is empty, so the thread
    /// is left behind when the test ends.
    pub fn enumerate(&self) {
        let hci = self.hci();
        thread::spawn(move || DeviceEnumerator::new(hci).run());
    }

    pub fn log(&self) -> Vec<Record> {
        lock(&self.shared.log).clone()
    }

    pub fn endpoints(&self) -> Vec<EndpointRecord> {
        lock(&self.shared.endpoints).clone()
    }

    pub fn root_port(&self, slot: u8) -> Option<u8> {
        lock(&self.shared.root_ports).get(&slot).copied()
    }

    pub fn control_packet_size(&self, slot: u8) -> Option<u16> {
        lock(&self.shared.control_mps).get(&slot).copied()
    }

    /// Queues a boot report for the next interrupt IN transfer.
    pub fn press(&self, report: [u8; 8]) {
        lock(&self.shared.reports).push_back(report);
    }

    pub fn unplug(&self, port: u8) {
        lock(&self.shared.port_requests).push_back((port, false));
    }

    pub fn plug(&self, port: u8) {
        lock(&self.shared.port_requests).push_back((port, true));
    }

    /// Posts a command completion for an address that never held a command, and a transfer
    /// event for a slot that was never enabled.
    pub fn post_unmatched_events(&self) {
        let mut events = lock(&self.shared.raw_events);
        events.push_back((0xDEAD_0000, CC_SUCCESS << 24, TRB_COMMAND_COMPLETION << 10));
        events.push_back((
            0xDEAD_0010,
            CC_SUCCESS << 24,
            (TRB_TRANSFER_EVENT << 10) | (1 << 16) | (u32::from(MAX_SLOTS) << 24),
        ));
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }
}

/* Register thread */

fn publish(base: usize, index: usize, value: u32) {
    reg(base + OP_PORTS + index * 0x10).store(value | PORTSC_SENTINEL, Ordering::Release);
}

/// Records a finished reset and has the controller thread announce it.
fn reset_done(shared: &Shared, port: u8) {
    lock(&shared.log).push(Record::Reset(port));
    lock(&shared.port_events).push_back(port);
}

fn registers(base: usize, shared: &Shared, mut portsc: [u32; MAX_PORTS as usize], slow_reset: &[u8]) {
    for (index, &value) in portsc.iter().enumerate() {
        publish(base, index, value);
    }
    let mut resetting: [Option<Instant>; MAX_PORTS as usize] = [None; MAX_PORTS as usize];

    while !shared.stop.load(Ordering::Acquire) {
        let usbcmd = reg(base + OP_USBCMD);
        let cmd = usbcmd.load(Ordering::Acquire);
        if cmd & USBCMD_HCRST != 0 {
            let _ = usbcmd.compare_exchange(cmd, cmd & !USBCMD_HCRST, Ordering::AcqRel, Ordering::Acquire);
        }
        let status = if cmd & USBCMD_RS != 0 { 0 } else { USBSTS_HCH };
        reg(base + OP_USBSTS).store(status, Ordering::Release);

        let requests: Vec<(u8, bool)> = lock(&shared.port_requests).drain(..).collect();
        for (port, plugged) in requests {
            let index = usize::from(port - 1);
            portsc[index] = if plugged {
                portsc[index] | PORTSC_CCS | PORTSC_FULL_SPEED | PORTSC_CSC
            } else {
                (portsc[index] & !(PORTSC_CCS | PORTSC_PED | PORTSC_FULL_SPEED)) | PORTSC_CSC
            };
            publish(base, index, portsc[index]);
            lock(&shared.port_events).push_back(port);
        }

        for index in 0..portsc.len() {
            let cell = reg(base + OP_PORTS + index * 0x10);
            let written = cell.load(Ordering::Acquire);
            if written & PORTSC_SENTINEL != 0 {
                continue;
            }

            let port = index as u8 + 1;
            let mut value = portsc[index] & !(written & (PORTSC_CHANGES | PORTSC_PED));
            let mut reset = false;
            if written & PORTSC_PR != 0 && value & PORTSC_CCS != 0 && resetting[index].is_none() {
                if slow_reset.contains(&port) {
                    value |= PORTSC_PR;
                    resetting[index] = Some(Instant::now() + SLOW_RESET);
                } else {
                    value |= PORTSC_PED | PORTSC_PRC;
                    reset = true;
                }
            }
            portsc[index] = value;

            if cell
                .compare_exchange(written, value | PORTSC_SENTINEL, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
                && reset
            {
                reset_done(shared, port);
            }
        }

        for index in 0..portsc.len() {
            match resetting[index] {
                Some(deadline) if Instant::now() >= deadline => (),
                _ => continue,
            }
            let value = (portsc[index] & !PORTSC_PR) | PORTSC_PED | PORTSC_PRC;
            let cell = reg(base + OP_PORTS + index * 0x10);
            let current = cell.load(Ordering::Acquire);
            // A driver write still pending is handled first, on the next pass.
            if current & PORTSC_SENTINEL == 0
                || cell
                    .compare_exchange(current, value | PORTSC_SENTINEL, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
            {
                continue;
            }
            portsc[index] = value;
            resetting[index] = None;
            reset_done(shared, index as u8 + 1);
        }

        thread::sleep(Duration::from_micros(50));
    }
}

/* Controller thread */

/// Root Hub Port Number from the slot context of an input context.
fn root_port(input: u64) -> u8 {
    (reg(input as usize + 0x24).load(Ordering::Acquire) >> 16) as u8
}

#[derive(Clone, Copy, Debug)]
struct RawTrb {
    address: u64,
    data: u64,
    status: u32,
    control: u32,
}

impl RawTrb {
    fn kind(&self) -> u8 {
        ((self.control >> 10) & 0x3F) as u8
    }

    fn ioc(&self) -> bool {
        self.control & (1 << 5) != 0
    }

    fn slot(&self) -> u8 {
        (self.control >> 24) as u8
    }

    fn length(&self) -> u32 {
        self.status & 0x1_FFFF
    }
}

/// The controller's view of a producer ring.
struct Consumer {
    address: u64,
    cycle: bool,
}

impl Consumer {
    fn peek(&mut self) -> Option<RawTrb> {
        loop {
            let control = reg(self.address as usize + 12).load(Ordering::Acquire);
            if (control & 1 != 0) != self.cycle {
                return None;
            }
            fence(Ordering::Acquire);
            let trb = RawTrb {
                address: self.address,
                data: read64(self.address),
                status: reg(self.address as usize + 8).load(Ordering::Acquire),
                control,
            };
            if trb.kind() != TRB_LINK {
                return Some(trb);
            }
            self.address = trb.data & !0xF;
            if control & (1 << 1) != 0 {
                self.cycle = !self.cycle;
            }
        }
    }

    fn advance(&mut self) {
        self.address += 16;
    }
}

struct Producer {
    base: u64,
    len: u64,
    index: u64,
    cycle: bool,
}

impl Producer {
    fn push(&mut self, data: u64, status: u32, control: u32) {
        let address = (self.base + self.index * 16) as usize;
        reg(address).store(data as u32, Ordering::Relaxed);
        reg(address + 4).store((data >> 32) as u32, Ordering::Relaxed);
        reg(address + 8).store(status, Ordering::Relaxed);
        fence(Ordering::Release);
        reg(address + 12).store(control | u32::from(self.cycle), Ordering::Release);

        self.index += 1;
        if self.index == self.len {
            self.index = 0;
            self.cycle = !self.cycle;
        }
    }
}

struct SlotState {
    rings: BTreeMap<u8, Consumer>,
    setup: Option<u64>,
}

enum Step {
    Next,
    Stall,
}

struct Controller {
    hci: Arc<Xhci>,
    shared: Arc<Shared>,
    command: Consumer,
    events: Producer,
    slots: BTreeMap<u8, SlotState>,
    failing_address: Vec<u8>,
}

impl Controller {
    fn start(
        base: usize,
        hci: Arc<Xhci>,
        shared: Arc<Shared>,
        announce: Vec<u8>,
        failing_address: Vec<u8>,
    ) -> Controller {
        while reg(base + OP_USBCMD).load(Ordering::Acquire) & USBCMD_RS == 0 {
            thread::yield_now();
        }

        let crcr = read64((base + OP_CRCR) as u64);
        let erstba = read64((base + INT0 + 0x10) as u64);
        let segment = read64(erstba);
        let segment_len = reg(erstba as usize + 8).load(Ordering::Acquire) & 0xFFFF;
        assert_ne!(read64((base + OP_DCBAAP) as u64), 0, "DCBAAP programmed");

        lock(&shared.port_events).extend(announce);

        Controller {
            hci,
            shared,
            command: Consumer {
                address: crcr & !0x3F,
                cycle: crcr & 1 != 0,
            },
            events: Producer {
                base: segment,
                len: u64::from(segment_len),
                index: 0,
                cycle: true,
            },
            slots: BTreeMap::new(),
            failing_address,
        }
    }

    fn run(mut self) {
        while !self.shared.stop.load(Ordering::Acquire) {
            let mut busy = false;

            let ports: Vec<u8> = lock(&self.shared.port_events).drain(..).collect();
            for port in ports {
                self.post(u64::from(port) << 24, CC_SUCCESS << 24, TRB_PORT_STATUS_CHANGE << 10);
                busy = true;
            }

            let raw: Vec<(u64, u32, u32)> = lock(&self.shared.raw_events).drain(..).collect();
            for (data, status, control) in raw {
                self.post(data, status, control);
                busy = true;
            }

            while let Some(trb) = self.command.peek() {
                self.command.advance();
                self.execute_command(trb);
                busy = true;
            }

            let keys: Vec<(u8, u8)> = self
                .slots
                .iter()
                .flat_map(|(&slot, state)| state.rings.keys().map(move |&dci| (slot, dci)))
                .collect();
            for (slot, dci) in keys {
                busy |= self.service_ring(slot, dci);
            }

            if !busy {
                thread::sleep(Duration::from_micros(100));
            }
        }
    }

    /// Writes an event and runs the interrupt handler.
    fn post(&mut self, data: u64, status: u32, control: u32) {
        self.events.push(data, status, control);
        self.hci.process_events();
    }

    fn complete(&mut self, command: &RawTrb, code: u32, slot: u8) {
        self.post(
            command.address,
            code << 24,
            (TRB_COMMAND_COMPLETION << 10) | (u32::from(slot) << 24),
        );
    }

    fn execute_command(&mut self, trb: RawTrb) {
        let slot = trb.slot();
        let kind = trb.kind();
        let input = trb.data & !0xF;

        let code = match kind {
            TRB_ENABLE_SLOT => {
                match (1..=MAX_SLOTS).find(|slot| !self.slots.contains_key(slot)) {
                    Some(slot) => {
                        self.slots.insert(
                            slot,
                            SlotState {
                                rings: BTreeMap::new(),
                                setup: None,
                            },
                        );
                        lock(&self.shared.log).push(Record::Command(kind, slot));
                        self.complete(&trb, CC_SUCCESS, slot);
                    }
                    None => self.complete(&trb, CC_NO_SLOTS, 0),
                }
                return;
            }
            TRB_ADDRESS_DEVICE => match self.slots.get_mut(&slot) {
                Some(_) if self.failing_address.contains(&root_port(input)) => CC_TRB_ERROR,
                Some(state) => {
                    lock(&self.shared.root_ports).insert(slot, root_port(input));
                    let ep0 = input as usize + 0x40;
                    let dequeue = read64(ep0 as u64 + 8);
                    state.rings.insert(
                        1,
                        Consumer {
                            address: dequeue & !0xF,
                            cycle: dequeue & 1 != 0,
                        },
                    );
                    CC_SUCCESS
                }
                None => CC_TRB_ERROR,
            },
            TRB_EVALUATE_CONTEXT => {
                let ep0 = input as usize + 0x40;
                let mps = (reg(ep0 + 4).load(Ordering::Acquire) >> 16) as u16;
                lock(&self.shared.control_mps).insert(slot, mps);
                CC_SUCCESS
            }
            TRB_CONFIGURE_ENDPOINT => match self.slots.get_mut(&slot) {
                Some(state) => {
                    let add_flags = reg(input as usize + 4).load(Ordering::Acquire);
                    for dci in 2..32u8 {
                        if add_flags & (1 << dci) == 0 {
                            continue;
                        }
                        let ctx = input as usize + 0x20 + 0x20 * usize::from(dci);
                        let a = reg(ctx).load(Ordering::Acquire);
                        let b = reg(ctx + 4).load(Ordering::Acquire);
                        let dequeue = read64(ctx as u64 + 8);
                        state.rings.insert(
                            dci,
                            Consumer {
                                address: dequeue & !0xF,
                                cycle: dequeue & 1 != 0,
                            },
                        );
                        lock(&self.shared.endpoints).push(EndpointRecord {
                            slot,
                            dci,
                            ep_type: ((b >> 3) & 0x7) as u8,
                            interval: (a >> 16) as u8,
                            max_packet_size: (b >> 16) as u16,
                        });
                    }
                    CC_SUCCESS
                }
                None => CC_TRB_ERROR,
            },
            TRB_DISABLE_SLOT => match self.slots.remove(&slot) {
                Some(_) => CC_SUCCESS,
                None => CC_TRB_ERROR,
            },
            _ => CC_TRB_ERROR,
        };

        lock(&self.shared.log).push(Record::Command(kind, slot));
        self.complete(&trb, code, slot);
    }

    /// Runs the records queued on one transfer ring. Returns whether any were consumed.
    fn service_ring(&mut self, slot: u8, dci: u8) -> bool {
        let mut consumed = false;
        loop {
            let trb = match self
                .slots
                .get_mut(&slot)
                .and_then(|state| state.rings.get_mut(&dci))
                .and_then(Consumer::peek)
            {
                Some(trb) => trb,
                None => return consumed,
            };

            let event = match self.transfer(slot, dci, &trb) {
                Some(event) => event,
                // Waiting for data.
                None => return consumed,
            };
            if let Some(ring) = self.slots.get_mut(&slot).and_then(|state| state.rings.get_mut(&dci)) {
                ring.advance();
            }
            consumed = true;

            if let Some((code, residual)) = event {
                let control = (TRB_TRANSFER_EVENT << 10) | (u32::from(dci) << 16) | (u32::from(slot) << 24);
                self.post(trb.address, (code << 24) | residual, control);
            }
        }
    }

    /// Carries out one transfer record. `None` leaves it on the ring; `Some(None)` consumes it
    /// silently; `Some(Some(..))` consumes it and reports a completion code and residual.
    fn transfer(&mut self, slot: u8, dci: u8, trb: &RawTrb) -> Option<Option<(u32, u32)>> {
        let state = self.slots.get_mut(&slot)?;
        let report = |trb: &RawTrb, code: u32, residual: u32| {
            if trb.ioc() || code != CC_SUCCESS {
                Some((code, residual))
            } else {
                None
            }
        };

        Some(match trb.kind() {
            TRB_SETUP => {
                state.setup = Some(trb.data);
                None
            }
            TRB_DATA if trb.control & (1 << 16) != 0 => {
                let response = state.setup.and_then(respond);
                match response {
                    Some(bytes) => {
                        let len = (trb.length() as usize).min(bytes.len());
                        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), trb.data as *mut u8, len) };
                        let residual = trb.length() - len as u32;
                        let code = if residual > 0 { CC_SHORT_PACKET } else { CC_SUCCESS };
                        report(trb, code, residual)
                    }
                    None => report(trb, CC_STALL, trb.length()),
                }
            }
            TRB_DATA | TRB_STATUS => report(trb, CC_SUCCESS, 0),
            TRB_NORMAL if dci % 2 == 1 => {
                let data = lock(&self.shared.reports).pop_front()?;
                let len = (trb.length() as usize).min(data.len());
                unsafe { ptr::copy_nonoverlapping(data.as_ptr(), trb.data as *mut u8, len) };
                report(trb, CC_SUCCESS, trb.length() - len as u32)
            }
            _ => report(trb, CC_SUCCESS, 0),
        })
    }
}

/// The keyboard's answer to an IN request.
fn respond(setup: u64) -> Option<Vec<u8>> {
    let request = (setup >> 8) as u8;
    let descriptor = (setup >> 24) as u8;
    match (request, descriptor) {
        (0x06, 1) => Some(DEVICE_DESCRIPTOR.to_vec()),
        (0x06, 2) => Some(CONFIG_DESCRIPTOR.to_vec()),
        _ => None,
    }
}
