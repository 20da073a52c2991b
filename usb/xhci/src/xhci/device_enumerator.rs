use std::sync::Arc;

use crossbeam_channel::Receiver;
use log::{debug, error, info, warn};

use crate::error::{Result, XhciError};
use crate::xhci::{Message, Xhci};

/// Walks queued root ports through attach or detach, one port at a time.
///
/// Each step issues exactly one command or transfer and then blocks until an event handler
/// posts its outcome. A port joining the queue meanwhile only wakes an idle enumerator; it is
/// looked at once the current port is done. A failed step abandons the port.
pub struct DeviceEnumerator {
    hci: Arc<Xhci>,
    messages: Receiver<Message>,
}

impl DeviceEnumerator {
    pub fn new(hci: Arc<Xhci>) -> Self {
        let messages = hci.messages();
        DeviceEnumerator { hci, messages }
    }

    pub fn run(&mut self) {
        loop {
            debug!("Start Device Enumerator Loop");
            match self.enumerate_next() {
                Ok((port, Ok(()))) => debug!("port {} handled", port),
                Ok((port, Err(err))) => warn!("port {}: abandoned: {}", port, err),
                Err(err) => {
                    error!("device enumerator stopping: {}", err);
                    return;
                }
            }
        }
    }

    /// Blocks until a port is queued, then attaches or detaches its device depending on whether
    /// the port is connected. Returns the port with the outcome.
    pub fn enumerate_next(&mut self) -> Result<(u8, Result<()>)> {
        let port = loop {
            if let Some(port) = self.hci.front_port() {
                break port;
            }
            self.messages.recv().map_err(|_| XhciError::Disconnected)?;
        };

        // Outcomes nobody waited for belong to an earlier port.
        while let Ok(message) = self.messages.try_recv() {
            debug!("discarding stale {:?}", message);
        }

        let result = match self.hci.port_flags(port) {
            Ok(flags) if flags.contains(super::port::PortFlags::CCS) => self.attach(port),
            Ok(_) => self.detach(port),
            Err(err) => Err(err),
        };
        self.hci.finish_port(port);
        Ok((port, result))
    }

    /// Waits for the outcome of the step in flight.
    fn wait(&self, step: &'static str) -> Result<()> {
        loop {
            match self.messages.recv() {
                Ok(Message::HardwareEvent { success: true }) => {
                    debug!("{} done", step);
                    return Ok(());
                }
                Ok(Message::HardwareEvent { success: false }) => return Err(XhciError::StepFailed(step)),
                Ok(Message::PortQueued(port)) => debug!("port {} queued during {}", port, step),
                Err(_) => return Err(XhciError::Disconnected),
            }
        }
    }

    fn attach(&self, port: u8) -> Result<()> {
        if self.hci.slot_for_port(port).is_some() {
            return Err(XhciError::AlreadyAttached(port));
        }

        info!("port {}: device connected, resetting", port);
        self.hci.reset_port(port)?;
        self.wait("port reset")?;

        self.hci.enable_slot();
        self.wait("enable slot")?;
        let slot = self.hci.slot_for_port(port).ok_or(XhciError::NoDeviceOnPort(port))?;

        self.hci.address_device(slot)?;
        self.wait("address device")?;

        self.hci.probe_device(slot)?;
        self.wait("packet size probe")?;

        self.hci.reconfigure_default_pipe(slot)?;
        self.wait("evaluate context")?;

        self.hci.start_enumeration(slot)?;
        self.wait("descriptor enumeration")?;

        self.hci.configure_endpoints(slot)?;
        self.wait("configure endpoints")?;

        self.hci.on_endpoints_configured(slot)?;
        info!("port {}: device in slot {} attached", port, slot);
        Ok(())
    }

    fn detach(&self, port: u8) -> Result<()> {
        let slot = self.hci.slot_for_port(port).ok_or(XhciError::NoDeviceOnPort(port))?;
        info!("port {}: device disconnected, disabling slot {}", port, slot);

        self.hci.disable_slot(slot);
        let result = self.wait("disable slot");
        self.hci.release_slot(slot)?;
        result
    }
}
