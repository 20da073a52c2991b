//! Interface class drivers.
//!
//! A class driver consumes one configured interface. It never touches a ring itself: each
//! callback may hand back a [TransferRequest] which the owning device executes on its behalf.
use common::dma::DmaPool;
use crossbeam_channel::Sender;
use serde::Deserialize;

use crate::error::Result;
use crate::usb::{EndpointDescriptor, EndpointId, InterfaceDescriptor, Setup};

pub use self::keyboard::{HidKeyboardDriver, KeyEvent};

mod keyboard;

/// The drivers known to the class-driver table.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ClassDriverKind {
    HidKeyboard,
}

/// A transfer a class driver wants issued. Buffers are physical addresses of DMA memory the
/// driver owns.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransferRequest {
    ControlIn {
        setup: Setup,
        buffer: usize,
    },
    ControlOut {
        setup: Setup,
        data: Option<(usize, u16)>,
    },
    InterruptIn {
        endpoint: EndpointId,
        buffer: usize,
        len: u16,
    },
    InterruptOut {
        endpoint: EndpointId,
        buffer: usize,
        len: u16,
    },
}

/// What a driver may need while it is being set up.
pub struct DriverContext<'a> {
    pub pool: &'a DmaPool,
    pub keyboard_events: &'a Sender<KeyEvent>,
}

pub enum ClassDriver {
    HidKeyboard(HidKeyboardDriver),
}

impl ClassDriver {
    pub fn new(
        kind: ClassDriverKind,
        interface: &InterfaceDescriptor,
        endpoints: &[EndpointDescriptor],
        ctx: &DriverContext,
    ) -> Result<Self> {
        match kind {
            ClassDriverKind::HidKeyboard => Ok(ClassDriver::HidKeyboard(HidKeyboardDriver::new(
                interface.number,
                endpoints,
                ctx.pool,
                ctx.keyboard_events.clone(),
            )?)),
        }
    }

    pub fn kind(&self) -> ClassDriverKind {
        match self {
            ClassDriver::HidKeyboard(_) => ClassDriverKind::HidKeyboard,
        }
    }

    pub fn interface(&self) -> u8 {
        match self {
            ClassDriver::HidKeyboard(driver) => driver.interface(),
        }
    }

    /// Called once, after the controller has configured the interface's endpoints.
    pub fn run(&mut self) -> Option<TransferRequest> {
        match self {
            ClassDriver::HidKeyboard(driver) => driver.run(),
        }
    }

    pub fn on_control_completed(
        &mut self,
        endpoint: EndpointId,
        setup: Setup,
        data: &[u8],
    ) -> Option<TransferRequest> {
        match self {
            ClassDriver::HidKeyboard(driver) => driver.on_control_completed(endpoint, setup, data),
        }
    }

    pub fn on_interrupt_completed(
        &mut self,
        endpoint: EndpointId,
        data: &[u8],
    ) -> Option<TransferRequest> {
        match self {
            ClassDriver::HidKeyboard(driver) => driver.on_interrupt_completed(endpoint, data),
        }
    }
}
