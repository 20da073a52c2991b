//! Core of an eXtensible Host Controller Interface (XHCI) driver.
//!
//! The crate brings a controller out of reset, watches its root ports and walks every connected
//! device through enumeration: port reset, slot allocation, addressing, descriptor reads,
//! configuration and endpoint setup. Interfaces with a matching entry in the embedded driver
//! table get a class driver; the HID boot keyboard is the one that ships.
//!
//! Work is split between the interrupt side ([Xhci::process_events]), which reacts to events
//! without blocking, and the [DeviceEnumerator], which blocks on each step of one port at a time.
//!
//! Section references follow these documents:
//!
//! - XHCI - [eXtensible Host Controller Interface for Universal Serial Bus (xHCI) Requirements Specification](https://www.intel.com/content/dam/www/public/us/en/documents/technical-specifications/extensible-host-controler-interface-usb-xhci.pdf)
//! - USB2 - [Universal Serial Bus Specification](https://www.usb.org/document-library/usb-20-specification)
//! - HID  - [Device Class Definition for HID 1.11](https://www.usb.org/document-library/device-class-definition-hid-111)
//!
pub extern crate plain;

pub mod class;
pub mod config;
pub mod error;
pub mod usb;
pub mod xhci;

pub use crate::class::KeyEvent;
pub use crate::config::XhciConfig;
pub use crate::error::{Result, XhciError};
pub use crate::xhci::{DeviceEnumerator, Message, Xhci};
