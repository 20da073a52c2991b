use common::dma::{Dma, DmaPool};
use crossbeam_channel::Sender;
use log::{debug, trace, warn};

use super::TransferRequest;
use crate::error::{Result, XhciError};
use crate::usb::{EndpointDescriptor, EndpointId, EndpointTy, Setup};
use crate::usb::setup::REQUEST_HID_SET_PROTOCOL;

/// Length of a boot protocol keyboard input report. See HID Appendix B.1
pub const BOOT_REPORT_LEN: usize = 8;

const BOOT_PROTOCOL: u16 = 0;
/// Usage reported in every key slot when too many keys are down.
const USAGE_ERROR_ROLL_OVER: u8 = 0x01;
/// Usage of the left control key; the eight modifier bits map onto 0xE0 to 0xE7.
const USAGE_LEFT_CONTROL: u8 = 0xE0;

/// A key going down or up, identified by its usage on the HID Keyboard/Keypad page.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct KeyEvent {
    pub usage: u8,
    pub pressed: bool,
}

/// Driver for a keyboard speaking the HID boot protocol.
pub struct HidKeyboardDriver {
    interface: u8,
    endpoint: EndpointId,
    report: Dma<[u8; BOOT_REPORT_LEN]>,
    last_report: [u8; BOOT_REPORT_LEN],
    events: Sender<KeyEvent>,
}

impl HidKeyboardDriver {
    pub fn new(
        interface: u8,
        endpoints: &[EndpointDescriptor],
        pool: &DmaPool,
        events: Sender<KeyEvent>,
    ) -> Result<Self> {
        let endpoint = endpoints
            .iter()
            .find(|desc| desc.ty() == EndpointTy::Interrupt && desc.id().is_in())
            .map(|desc| desc.id())
            .ok_or(XhciError::InvalidDescriptor("keyboard without an interrupt IN endpoint"))?;

        Ok(Self {
            interface,
            endpoint,
            report: Dma::new(pool, [0; BOOT_REPORT_LEN], 64, 4096)?,
            last_report: [0; BOOT_REPORT_LEN],
            events,
        })
    }

    pub fn interface(&self) -> u8 {
        self.interface
    }

    pub fn run(&mut self) -> Option<TransferRequest> {
        debug!("keyboard on interface {} selecting the boot protocol", self.interface);
        Some(TransferRequest::ControlOut {
            setup: Setup::set_protocol(self.interface, BOOT_PROTOCOL),
            data: None,
        })
    }

    pub fn on_control_completed(
        &mut self,
        _endpoint: EndpointId,
        setup: Setup,
        _data: &[u8],
    ) -> Option<TransferRequest> {
        if setup.request == REQUEST_HID_SET_PROTOCOL {
            Some(self.poll())
        } else {
            None
        }
    }

    pub fn on_interrupt_completed(
        &mut self,
        endpoint: EndpointId,
        data: &[u8],
    ) -> Option<TransferRequest> {
        if endpoint != self.endpoint {
            warn!("keyboard got a completion for foreign endpoint {:#x}", endpoint.address());
            return None;
        }

        if data.len() < BOOT_REPORT_LEN {
            debug!("short keyboard report of {} bytes", data.len());
        } else {
            let mut report = [0; BOOT_REPORT_LEN];
            report.copy_from_slice(&data[..BOOT_REPORT_LEN]);
            for event in diff_reports(&self.last_report, &report) {
                trace!("{:?}", event);
                // Nobody listening is not an error.
                let _ = self.events.send(event);
            }
            if !is_roll_over(&report) {
                self.last_report = report;
            }
        }

        Some(self.poll())
    }

    fn poll(&self) -> TransferRequest {
        TransferRequest::InterruptIn {
            endpoint: self.endpoint,
            buffer: self.report.physical(),
            len: BOOT_REPORT_LEN as u16,
        }
    }
}

fn is_roll_over(report: &[u8; BOOT_REPORT_LEN]) -> bool {
    report[2..].iter().any(|&usage| usage == USAGE_ERROR_ROLL_OVER)
}

/// Computes the key transitions between two boot reports: modifiers, then released keys, then
/// pressed keys.
///
/// A report signalling roll over carries no key state and produces nothing.
pub fn diff_reports(
    previous: &[u8; BOOT_REPORT_LEN],
    current: &[u8; BOOT_REPORT_LEN],
) -> Vec<KeyEvent> {
    let mut events = Vec::new();
    if is_roll_over(current) {
        return events;
    }

    let changed = previous[0] ^ current[0];
    for bit in 0..8 {
        if changed & (1 << bit) != 0 {
            events.push(KeyEvent {
                usage: USAGE_LEFT_CONTROL + bit,
                pressed: current[0] & (1 << bit) != 0,
            });
        }
    }

    let old_keys = &previous[2..];
    let new_keys = &current[2..];
    for &usage in old_keys.iter().filter(|&&usage| usage != 0) {
        if !new_keys.contains(&usage) {
            events.push(KeyEvent { usage, pressed: false });
        }
    }
    for &usage in new_keys.iter().filter(|&&usage| usage != 0) {
        if !old_keys.contains(&usage) {
            events.push(KeyEvent { usage, pressed: true });
        }
    }

    events
}

#[cfg(test)]
mod test {
    use super::*;

    fn endpoint(address: u8, attributes: u8) -> EndpointDescriptor {
        EndpointDescriptor {
            length: 7,
            kind: 5,
            address,
            attributes,
            max_packet_size: 8,
            interval: 10,
        }
    }

    #[test]
    fn diff() {
        let idle = [0; 8];
        let a = [0, 0, 0x04, 0, 0, 0, 0, 0];
        let shift_a_b = [0x02, 0, 0x04, 0x05, 0, 0, 0, 0];
        let b = [0, 0, 0x05, 0, 0, 0, 0, 0];

        assert_eq!(diff_reports(&idle, &a), vec![KeyEvent { usage: 0x04, pressed: true }]);
        assert_eq!(
            diff_reports(&a, &shift_a_b),
            vec![
                KeyEvent { usage: 0xE1, pressed: true },
                KeyEvent { usage: 0x05, pressed: true },
            ]
        );
        assert_eq!(
            diff_reports(&shift_a_b, &b),
            vec![
                KeyEvent { usage: 0xE1, pressed: false },
                KeyEvent { usage: 0x04, pressed: false },
            ]
        );
        assert!(diff_reports(&b, &b).is_empty());
    }

    #[test]
    fn roll_over_keeps_state() {
        let pool = DmaPool::from_heap(0x1000);
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut driver = HidKeyboardDriver::new(0, &[endpoint(0x81, 3)], &pool, tx).unwrap();
        let ep = EndpointId::from_address(0x81);

        driver.on_interrupt_completed(ep, &[0, 0, 0x04, 0, 0, 0, 0, 0]);
        driver.on_interrupt_completed(ep, &[0, 0, 1, 1, 1, 1, 1, 1]);
        driver.on_interrupt_completed(ep, &[0, 0, 0x04, 0, 0, 0, 0, 0]);

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events, vec![KeyEvent { usage: 0x04, pressed: true }]);
    }

    #[test]
    fn set_protocol_then_poll() {
        let pool = DmaPool::from_heap(0x1000);
        let (tx, _rx) = crossbeam_channel::unbounded();
        assert!(HidKeyboardDriver::new(0, &[endpoint(0x01, 3)], &pool, tx.clone()).is_err());

        let mut driver = HidKeyboardDriver::new(2, &[endpoint(0x82, 3)], &pool, tx).unwrap();
        let setup = match driver.run() {
            Some(TransferRequest::ControlOut { setup, data: None }) => setup,
            other => panic!("unexpected request {:?}", other),
        };
        assert_eq!(setup.request, REQUEST_HID_SET_PROTOCOL);
        assert_eq!(setup.index, 2);

        match driver.on_control_completed(EndpointId::DEFAULT_CONTROL, setup, &[]) {
            Some(TransferRequest::InterruptIn { endpoint, len, .. }) => {
                assert_eq!(endpoint.address(), 0x82);
                assert_eq!(len, 8);
            }
            other => panic!("unexpected request {:?}", other),
        }
    }
}
