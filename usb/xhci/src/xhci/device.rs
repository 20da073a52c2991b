use std::cmp;
use std::collections::BTreeMap;
use std::slice;
use std::sync::Arc;

use common::dma::{Dma, DmaPool};
use crossbeam_channel::Sender;
use log::{debug, info, trace, warn};
use smallvec::SmallVec;

use super::context::{DeviceContext, EndpointType, InputContext, CONTEXT_ALIGN, CONTEXT_BOUNDARY};
use super::doorbell::DeviceDoorbell;
use super::port::PortSpeed;
use super::ring::Ring;
use super::setup_map::SetupStageMap;
use super::trb::{TransferKind, Trb, TrbCompletionCode};
use crate::class::{ClassDriver, DriverContext, KeyEvent, TransferRequest};
use crate::config::DRIVERS_CONFIG;
use crate::error::{Result, XhciError};
use crate::usb::setup::{REQUEST_GET_DESCRIPTOR, REQUEST_SET_CONFIGURATION};
use crate::usb::{
    parse_descriptor, AnyDescriptor, ConfigDescriptor, DescriptorIter, DescriptorKind, DeviceDescriptor,
    DeviceDescriptor8Byte, EndpointDescriptor, EndpointId, EndpointTy, InterfaceDescriptor, Recipient, Setup,
};

/// Size of the buffer descriptors are read into, and so the longest configuration descriptor
/// chain that can be parsed.
pub const DESCRIPTOR_BUFFER_LEN: usize = 1024;

/// CErr for every non-isochronous endpoint: retry three times before halting.
const ENDPOINT_ERROR_COUNT: u8 = 3;

/// Where a device is in enumeration. Each phase names the control transfer being waited for.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum InitPhase {
    /// The first eight bytes of the device descriptor, for the default pipe's packet size.
    Probe = 0,
    DeviceDescriptor = 1,
    ConfigDescriptor = 2,
    SetConfiguration = 3,
    /// Control completions now belong to the class drivers.
    Initialized = 4,
}

/// The outcome of feeding a Transfer Event to a device.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Progress {
    /// The next transfer of the current phase is on its way.
    Pending,
    /// The orchestrator may take its next step.
    PhaseComplete,
    /// The event did not concern enumeration.
    Ignored,
}

/// One endpoint the device will get a transfer ring for.
#[derive(Clone, Copy, Debug)]
pub struct EndpointConfig {
    pub interface: u8,
    pub id: EndpointId,
    pub ty: EndpointTy,
    pub max_packet_size: u16,
    pub additional_transactions: u8,
    /// bInterval exactly as the descriptor states it.
    pub interval: u8,
}

impl EndpointConfig {
    pub fn from_descriptor(interface: u8, desc: &EndpointDescriptor) -> Self {
        Self {
            interface,
            id: desc.id(),
            ty: desc.ty(),
            max_packet_size: desc.packet_size(),
            additional_transactions: desc.additional_transactions(),
            interval: desc.interval,
        }
    }

    pub fn dci(&self) -> u8 {
        self.id.dci()
    }

    pub fn ep_type(&self) -> EndpointType {
        match (self.ty, self.id.is_in()) {
            (EndpointTy::Ctrl, _) => EndpointType::Control,
            (EndpointTy::Isoch, false) => EndpointType::IsochOut,
            (EndpointTy::Bulk, false) => EndpointType::BulkOut,
            (EndpointTy::Interrupt, false) => EndpointType::InterruptOut,
            (EndpointTy::Isoch, true) => EndpointType::IsochIn,
            (EndpointTy::Bulk, true) => EndpointType::BulkIn,
            (EndpointTy::Interrupt, true) => EndpointType::InterruptIn,
        }
    }

    fn is_periodic(&self) -> bool {
        matches!(self.ty, EndpointTy::Interrupt | EndpointTy::Isoch)
    }

    /// Max Burst Size. Only high-speed periodic endpoints encode extra transactions per
    /// microframe in wMaxPacketSize; SuperSpeed would need the companion descriptor.
    pub fn max_burst(&self, speed: PortSpeed) -> u8 {
        if speed == PortSpeed::High && self.is_periodic() {
            self.additional_transactions
        } else {
            0
        }
    }

    pub fn max_esit_payload(&self, speed: PortSpeed) -> u32 {
        if self.is_periodic() {
            u32::from(self.max_packet_size) * (u32::from(self.max_burst(speed)) + 1)
        } else {
            0
        }
    }

    pub fn average_trb_length(&self) -> u16 {
        match self.ty {
            EndpointTy::Ctrl => 8,
            EndpointTy::Interrupt => 1024,
            EndpointTy::Bulk | EndpointTy::Isoch => 3072,
        }
    }
}

/// Converts bInterval into the endpoint context Interval field, which is the exponent of a
/// period of 2^Interval * 125 us. See XHCI 6.2.3.6
///
/// Full- and low-speed interrupt endpoints state their period in frames, isochronous ones as
/// 2^(bInterval - 1) frames, and everything from high speed up as 2^(bInterval - 1)
/// microframes.
pub fn xhci_interval(ty: EndpointTy, speed: PortSpeed, b_interval: u8) -> u8 {
    match ty {
        EndpointTy::Ctrl | EndpointTy::Bulk => 0,
        EndpointTy::Interrupt if speed.is_full_or_low() => {
            let frames = u32::from(b_interval.max(1));
            // ceil(log2(frames)), then eight microframes per frame. Capped at 128 ms.
            cmp::min((32 - (frames - 1).leading_zeros()) as u8 + 3, 10)
        }
        EndpointTy::Isoch if speed.is_full_or_low() => cmp::min(b_interval.clamp(1, 16) + 2, 15),
        EndpointTy::Interrupt | EndpointTy::Isoch => b_interval.clamp(1, 16) - 1,
    }
}

fn completed(event: &Trb) -> bool {
    let code = event.completion_code();
    code == TrbCompletionCode::Success as u8 || code == TrbCompletionCode::ShortPacket as u8
}

/// A device occupying one slot: its contexts, its transfer rings and its enumeration state.
pub struct Device {
    slot: u8,
    port: u8,
    speed: PortSpeed,
    doorbell: DeviceDoorbell,
    pool: Arc<DmaPool>,
    keyboard_events: Sender<KeyEvent>,

    input: Dma<InputContext>,
    output: Dma<DeviceContext>,
    /// Transfer rings keyed by Device Context Index.
    rings: BTreeMap<u8, Ring>,
    transfer_ring_len: usize,
    setup_map: SetupStageMap,
    buffer: Dma<[u8]>,

    phase: InitPhase,
    max_packet_size: u16,
    device_desc: Option<DeviceDescriptor>,
    config_desc: Option<ConfigDescriptor>,
    interfaces: Vec<InterfaceDescriptor>,
    drivers: BTreeMap<u8, ClassDriver>,
    /// Interface owning each non-default endpoint, by DCI.
    endpoint_owners: BTreeMap<u8, u8>,
    endpoint_configs: SmallVec<[EndpointConfig; 4]>,
}

impl Device {
    pub fn new(
        pool: Arc<DmaPool>,
        slot: u8,
        port: u8,
        speed: PortSpeed,
        doorbell: DeviceDoorbell,
        transfer_ring_len: usize,
        keyboard_events: Sender<KeyEvent>,
    ) -> Result<Self> {
        // SAFETY: all-zero contexts are valid, and what the controller expects to be handed.
        let (input, output, buffer) = unsafe {
            (
                Dma::<InputContext>::zeroed(&pool, CONTEXT_ALIGN, CONTEXT_BOUNDARY)?,
                Dma::<DeviceContext>::zeroed(&pool, CONTEXT_ALIGN, CONTEXT_BOUNDARY)?,
                Dma::<[u8]>::zeroed_unsized(&pool, DESCRIPTOR_BUFFER_LEN, 64, 4096)?,
            )
        };
        let ring = Ring::new(&pool, transfer_ring_len)?;

        let mut device = Device {
            slot,
            port,
            speed,
            doorbell,
            pool,
            keyboard_events,
            input,
            output,
            rings: BTreeMap::new(),
            transfer_ring_len,
            setup_map: SetupStageMap::new(),
            buffer,
            phase: InitPhase::Probe,
            max_packet_size: speed.default_control_packet_size(),
            device_desc: None,
            config_desc: None,
            interfaces: Vec::new(),
            drivers: BTreeMap::new(),
            endpoint_owners: BTreeMap::new(),
            endpoint_configs: SmallVec::new(),
        };
        device.prepare_address(&ring);
        device.rings.insert(EndpointId::DEFAULT_CONTROL.dci(), ring);
        Ok(device)
    }

    /// Fills the input context for Address Device: the slot context and the default pipe.
    fn prepare_address(&mut self, ring: &Ring) {
        let input = &mut *self.input;
        input.reset_control();
        input.add_context(0);
        input.add_context(1);

        let slot = input.slot();
        slot.set_route_string(0);
        slot.set_speed(self.speed as u8);
        slot.set_context_entries(1);
        slot.set_root_hub_port(self.port);

        let ep0 = input.endpoint(1);
        ep0.clear();
        ep0.set_ep_type(EndpointType::Control);
        ep0.set_error_count(ENDPOINT_ERROR_COUNT);
        ep0.set_max_packet_size(self.max_packet_size);
        ep0.set_tr_dequeue_pointer(ring.physical(), ring.cycle());
        ep0.set_average_trb_length(8);
    }

    pub fn slot(&self) -> u8 {
        self.slot
    }

    pub fn port(&self) -> u8 {
        self.port
    }

    pub fn speed(&self) -> PortSpeed {
        self.speed
    }

    pub fn phase(&self) -> InitPhase {
        self.phase
    }

    pub fn max_packet_size(&self) -> u16 {
        self.max_packet_size
    }

    pub fn device_descriptor(&self) -> Option<&DeviceDescriptor> {
        self.device_desc.as_ref()
    }

    pub fn config_descriptor(&self) -> Option<&ConfigDescriptor> {
        self.config_desc.as_ref()
    }

    pub fn interfaces(&self) -> &[InterfaceDescriptor] {
        &self.interfaces
    }

    pub fn drivers(&self) -> &BTreeMap<u8, ClassDriver> {
        &self.drivers
    }

    pub fn endpoint_configs(&self) -> &[EndpointConfig] {
        &self.endpoint_configs
    }

    pub fn transfer_ring(&self, dci: u8) -> Option<&Ring> {
        self.rings.get(&dci)
    }

    pub fn input_context_phys(&self) -> u64 {
        self.input.physical() as u64
    }

    pub fn output_context_phys(&self) -> u64 {
        self.output.physical() as u64
    }

    pub fn output_context(&self) -> &DeviceContext {
        &self.output
    }

    /// Input context for Evaluate Context: the default pipe with the packet size the probe
    /// learned.
    pub fn prepare_evaluate_context(&mut self) -> u64 {
        let max_packet_size = self.max_packet_size;
        let input = &mut *self.input;
        input.reset_control();
        input.add_context(1);
        input.endpoint(1).set_max_packet_size(max_packet_size);
        self.input_context_phys()
    }

    /// Input context for Configure Endpoint, with a fresh transfer ring for every endpoint in the
    /// endpoint table.
    pub fn prepare_configure_endpoints(&mut self) -> Result<u64> {
        let speed = self.speed;
        let input = &mut *self.input;
        input.reset_control();
        input.add_context(0);

        let mut max_dci = 1;
        for config in self.endpoint_configs.iter() {
            let dci = config.dci();
            let ring = Ring::new(&self.pool, self.transfer_ring_len)?;

            let ep = input.endpoint(dci);
            ep.clear();
            ep.set_ep_type(config.ep_type());
            ep.set_error_count(if config.ty == EndpointTy::Isoch { 0 } else { ENDPOINT_ERROR_COUNT });
            ep.set_max_packet_size(config.max_packet_size);
            ep.set_max_burst(config.max_burst(speed));
            ep.set_interval(xhci_interval(config.ty, speed, config.interval));
            ep.set_tr_dequeue_pointer(ring.physical(), ring.cycle());
            ep.set_average_trb_length(config.average_trb_length());
            ep.set_max_esit_payload(config.max_esit_payload(speed));

            input.add_context(dci);
            self.rings.insert(dci, ring);
            max_dci = cmp::max(max_dci, dci);
        }
        input.slot().set_context_entries(max_dci);

        debug!(
            "slot {}: configuring {} endpoints, context entries {}",
            self.slot,
            self.endpoint_configs.len(),
            max_dci
        );
        Ok(self.input_context_phys())
    }

    /* Transfers */

    pub fn control_in(&mut self, endpoint: EndpointId, setup: Setup, buffer: usize) -> Result<u64> {
        if self.setup_map.is_full() {
            return Err(XhciError::SetupStageMapFull);
        }
        let dci = endpoint.dci();
        let ring = self.rings.get_mut(&dci).ok_or(XhciError::NoTransferRing(dci))?;

        ring.push(Trb::setup(setup, TransferKind::In));
        let key = ring.push(Trb::data(buffer as u64, setup.length, true, true));
        ring.push(Trb::status(false, false));

        self.setup_map.put(key, setup)?;
        self.doorbell.ring(dci);
        Ok(key)
    }

    pub fn control_out(
        &mut self,
        endpoint: EndpointId,
        setup: Setup,
        data: Option<(usize, u16)>,
    ) -> Result<u64> {
        if self.setup_map.is_full() {
            return Err(XhciError::SetupStageMapFull);
        }
        let dci = endpoint.dci();
        let ring = self.rings.get_mut(&dci).ok_or(XhciError::NoTransferRing(dci))?;

        let key = match data {
            None => {
                ring.push(Trb::setup(setup, TransferKind::NoData));
                ring.push(Trb::status(true, true))
            }
            Some((buffer, len)) => {
                ring.push(Trb::setup(setup, TransferKind::Out));
                ring.push(Trb::data(buffer as u64, len, false, false));
                ring.push(Trb::status(true, true))
            }
        };

        self.setup_map.put(key, setup)?;
        self.doorbell.ring(dci);
        Ok(key)
    }

    pub fn interrupt_in(&mut self, endpoint: EndpointId, buffer: usize, len: u16) -> Result<u64> {
        debug_assert!(endpoint.is_in());
        self.normal_transfer(endpoint, buffer, len)
    }

    pub fn interrupt_out(&mut self, endpoint: EndpointId, buffer: usize, len: u16) -> Result<u64> {
        debug_assert!(!endpoint.is_in());
        self.normal_transfer(endpoint, buffer, len)
    }

    fn normal_transfer(&mut self, endpoint: EndpointId, buffer: usize, len: u16) -> Result<u64> {
        let dci = endpoint.dci();
        let ring = self.rings.get_mut(&dci).ok_or(XhciError::NoTransferRing(dci))?;
        let key = ring.push(Trb::normal(buffer as u64, u32::from(len)));
        self.doorbell.ring(dci);
        Ok(key)
    }

    fn execute(&mut self, request: TransferRequest) -> Result<()> {
        trace!("slot {}: {:?}", self.slot, request);
        match request {
            TransferRequest::ControlIn { setup, buffer } => {
                self.control_in(EndpointId::DEFAULT_CONTROL, setup, buffer)?
            }
            TransferRequest::ControlOut { setup, data } => {
                self.control_out(EndpointId::DEFAULT_CONTROL, setup, data)?
            }
            TransferRequest::InterruptIn {
                endpoint,
                buffer,
                len,
            } => self.interrupt_in(endpoint, buffer, len)?,
            TransferRequest::InterruptOut {
                endpoint,
                buffer,
                len,
            } => self.interrupt_out(endpoint, buffer, len)?,
        };
        Ok(())
    }

    /* Enumeration */

    fn request_descriptor(&mut self, kind: DescriptorKind, len: u16) -> Result<()> {
        let buffer = self.buffer.physical();
        self.control_in(
            EndpointId::DEFAULT_CONTROL,
            Setup::get_descriptor(kind, 0, 0, len),
            buffer,
        )?;
        Ok(())
    }

    /// Phase 0: reads the device descriptor prefix holding bMaxPacketSize0.
    pub fn probe(&mut self) -> Result<()> {
        self.phase = InitPhase::Probe;
        self.request_descriptor(DescriptorKind::Device, 8)
    }

    /// Starts the descriptor-driven part of enumeration, which runs from one Transfer Event to
    /// the next until the configuration is set.
    pub fn start_enumeration(&mut self) -> Result<()> {
        self.phase = InitPhase::DeviceDescriptor;
        self.request_descriptor(DescriptorKind::Device, 18)
    }

    /// Feeds a Transfer Event for one of this device's rings.
    pub fn on_transfer_event(&mut self, event: &Trb) -> Result<Progress> {
        let dci = event.endpoint_id();
        let ptr = match event.transfer_event_trb_pointer() {
            Some(ptr) => ptr,
            None => {
                warn!("slot {}: transfer event without a TRB pointer: {}", self.slot, event);
                return Ok(Progress::Ignored);
            }
        };

        if dci == EndpointId::DEFAULT_CONTROL.dci() {
            self.on_control_event(event, ptr)
        } else {
            self.on_endpoint_event(event, dci, ptr)
        }
    }

    fn on_control_event(&mut self, event: &Trb, ptr: u64) -> Result<Progress> {
        let setup = match self.setup_map.delete(ptr) {
            Some(setup) => setup,
            None => {
                debug!("slot {}: no control transfer ends at {:#x}", self.slot, ptr);
                return Ok(Progress::Ignored);
            }
        };

        if !completed(event) {
            warn!(
                "slot {}: request {:#04x} failed with completion code {}",
                self.slot,
                setup.request,
                event.completion_code()
            );
            return Err(XhciError::TransferFailed(event.completion_code()));
        }

        let data = if setup.is_in() {
            self.transferred(EndpointId::DEFAULT_CONTROL.dci(), event, ptr)
        } else {
            Vec::new()
        };
        self.on_control_completed(EndpointId::DEFAULT_CONTROL, setup, &data)
    }

    fn on_endpoint_event(&mut self, event: &Trb, dci: u8, ptr: u64) -> Result<Progress> {
        if !completed(event) {
            return Err(XhciError::TransferFailed(event.completion_code()));
        }

        let interface = match self.endpoint_owners.get(&dci) {
            Some(&interface) => interface,
            None => {
                warn!("slot {}: transfer event for unowned endpoint {}", self.slot, dci);
                return Ok(Progress::Ignored);
            }
        };

        let data = self.transferred(dci, event, ptr);
        let request = match self.drivers.get_mut(&interface) {
            Some(driver) => driver.on_interrupt_completed(EndpointId::from_dci(dci), &data),
            None => None,
        };
        if let Some(request) = request {
            self.execute(request)?;
        }
        Ok(Progress::Ignored)
    }

    /// Copies out what the controller wrote for the data record at `ptr`.
    fn transferred(&self, dci: u8, event: &Trb, ptr: u64) -> Vec<u8> {
        let record = match self.rings.get(&dci).and_then(|ring| ring.phys_addr_to_entry(ptr)) {
            Some(record) => record,
            None => return Vec::new(),
        };
        let len = record.buffer_length().saturating_sub(event.transfer_length()) as usize;
        if len == 0 {
            return Vec::new();
        }
        // SAFETY: the record was pushed by this device with a buffer of at least its requested
        // length, and pool memory stays mapped for the lifetime of the process.
        unsafe { slice::from_raw_parts(record.buffer() as *const u8, len) }.to_vec()
    }

    /// Advances enumeration after a control transfer on the default pipe completed. Once the
    /// device is initialized the completion is handed to the interface's class driver.
    pub fn on_control_completed(&mut self, endpoint: EndpointId, setup: Setup, data: &[u8]) -> Result<Progress> {
        let expected = match self.phase {
            InitPhase::Initialized => return self.route_to_driver(endpoint, setup, data),
            InitPhase::SetConfiguration => REQUEST_SET_CONFIGURATION,
            _ => REQUEST_GET_DESCRIPTOR,
        };
        if setup.request != expected {
            return Err(XhciError::UnexpectedCompletion {
                phase: self.phase as u8,
                request: setup.request,
            });
        }

        match self.phase {
            InitPhase::Probe => {
                let desc: DeviceDescriptor8Byte = parse_descriptor(data, DescriptorKind::Device)
                    .ok_or(XhciError::InvalidDescriptor("device descriptor prefix"))?;
                self.max_packet_size = desc.max_packet_size();
                debug!("slot {}: default pipe packet size {}", self.slot, self.max_packet_size);
                Ok(Progress::PhaseComplete)
            }
            InitPhase::DeviceDescriptor => {
                let desc: DeviceDescriptor = parse_descriptor(data, DescriptorKind::Device)
                    .ok_or(XhciError::InvalidDescriptor("device descriptor"))?;
                let (vendor, product, configurations) = (desc.vendor, desc.product, desc.configurations);
                info!(
                    "port {} slot {}: device {:04x}:{:04x} with {} configuration(s)",
                    self.port, self.slot, vendor, product, configurations
                );
                if configurations == 0 {
                    return Err(XhciError::InvalidDescriptor("device has no configuration"));
                }
                self.device_desc = Some(desc);

                self.phase = InitPhase::ConfigDescriptor;
                self.request_descriptor(DescriptorKind::Configuration, DESCRIPTOR_BUFFER_LEN as u16)?;
                Ok(Progress::Pending)
            }
            InitPhase::ConfigDescriptor => {
                let value = self.parse_configuration(data)?;

                self.phase = InitPhase::SetConfiguration;
                self.control_out(EndpointId::DEFAULT_CONTROL, Setup::set_configuration(value), None)?;
                Ok(Progress::Pending)
            }
            InitPhase::SetConfiguration => {
                self.phase = InitPhase::Initialized;
                debug!("slot {}: configuration set", self.slot);
                Ok(Progress::PhaseComplete)
            }
            InitPhase::Initialized => Ok(Progress::Ignored),
        }
    }

    fn route_to_driver(&mut self, endpoint: EndpointId, setup: Setup, data: &[u8]) -> Result<Progress> {
        let interface = match setup.recipient() {
            Some(Recipient::Interface) => Some(setup.index as u8),
            Some(Recipient::Endpoint) => {
                let dci = EndpointId::from_address(setup.index as u8).dci();
                self.endpoint_owners.get(&dci).copied()
            }
            _ => None,
        };

        let request = match interface.and_then(|interface| self.drivers.get_mut(&interface)) {
            Some(driver) => driver.on_control_completed(endpoint, setup, data),
            None => {
                debug!("slot {}: request {:#04x} completed with no driver", self.slot, setup.request);
                None
            }
        };
        if let Some(request) = request {
            self.execute(request)?;
        }
        Ok(Progress::Ignored)
    }

    /// Walks the configuration descriptor chain, attaches class drivers and builds the endpoint
    /// table. Returns bConfigurationValue.
    fn parse_configuration(&mut self, data: &[u8]) -> Result<u8> {
        let config = match AnyDescriptor::parse(data) {
            Some((AnyDescriptor::Config(config), _)) => config,
            _ => return Err(XhciError::InvalidDescriptor("configuration descriptor")),
        };
        let total = cmp::min(usize::from(config.total_length), data.len());

        let mut interfaces = Vec::new();
        let mut endpoints: Vec<(u8, u8, EndpointDescriptor)> = Vec::new();
        let mut current: Option<InterfaceDescriptor> = None;

        for desc in DescriptorIter::new(&data[..total]).skip(1) {
            match desc {
                AnyDescriptor::Interface(interface) => {
                    interfaces.push(interface);
                    current = Some(interface);
                }
                AnyDescriptor::Endpoint(endpoint) => match current {
                    Some(interface) => {
                        endpoints.push((interface.number, interface.alternate_setting, endpoint))
                    }
                    None => warn!("slot {}: endpoint descriptor outside an interface", self.slot),
                },
                AnyDescriptor::Hid(_) => trace!("slot {}: HID descriptor", self.slot),
                AnyDescriptor::Config(_) => warn!("slot {}: nested configuration descriptor", self.slot),
                AnyDescriptor::Unknown(kind) => trace!("slot {}: skipping descriptor type {}", self.slot, kind),
            }
        }

        let ctx = DriverContext {
            pool: &self.pool,
            keyboard_events: &self.keyboard_events,
        };
        for interface in interfaces.iter().filter(|interface| interface.alternate_setting == 0) {
            let (class, sub_class, protocol) = interface.class_triple();
            let driver_config = match DRIVERS_CONFIG.lookup(interface.class_triple()) {
                Some(driver_config) => driver_config,
                None => {
                    debug!(
                        "slot {}: no driver for interface {} class {}.{} proto {}",
                        self.slot, interface.number, class, sub_class, protocol
                    );
                    continue;
                }
            };

            let interface_endpoints: Vec<EndpointDescriptor> = endpoints
                .iter()
                .filter(|(number, alternate, _)| *number == interface.number && *alternate == 0)
                .map(|(_, _, endpoint)| *endpoint)
                .collect();

            match ClassDriver::new(driver_config.kind, interface, &interface_endpoints, &ctx) {
                Ok(driver) => {
                    info!(
                        "port {} slot {}: loading \"{}\" for interface {}",
                        self.port, self.slot, driver_config.name, interface.number
                    );
                    for endpoint in interface_endpoints.iter() {
                        let config = EndpointConfig::from_descriptor(interface.number, endpoint);
                        self.endpoint_owners.insert(config.dci(), interface.number);
                        self.endpoint_configs.push(config);
                    }
                    self.drivers.insert(interface.number, driver);
                }
                Err(err) => warn!(
                    "slot {}: driver \"{}\" rejected interface {}: {}",
                    self.slot, driver_config.name, interface.number, err
                ),
            }
        }

        self.interfaces = interfaces;
        self.config_desc = Some(config);
        Ok(config.configuration_value)
    }

    /// Starts every class driver once the controller has accepted the endpoint table.
    pub fn on_endpoints_configured(&mut self) -> Result<()> {
        let requests: SmallVec<[TransferRequest; 4]> =
            self.drivers.values_mut().filter_map(|driver| driver.run()).collect();
        for request in requests {
            self.execute(request)?;
        }
        Ok(())
    }
}
