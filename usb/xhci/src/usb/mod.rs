//! USB wire structures.
//!
//! Requests and descriptors as defined by chapter 9 of the
//! [Universal Serial Bus Specification](https://www.usb.org/document-library/usb-20-specification)
//! (USB2), plus the HID class descriptor from the Device Class Definition for HID 1.11 (HID).
use std::mem;

use plain::Plain;

pub use self::config::ConfigDescriptor;
pub use self::device::{DeviceDescriptor, DeviceDescriptor8Byte};
pub use self::endpoint::{EndpointDescriptor, EndpointId, EndpointTy, HidDescriptor};
pub use self::interface::InterfaceDescriptor;
pub use self::setup::{Recipient, Setup};

/// Descriptor type codes, the second byte of every descriptor. See USB2 Table 9-5
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum DescriptorKind {
    Device = 1,
    Configuration = 2,
    String = 3,
    Interface = 4,
    Endpoint = 5,
    DeviceQualifier = 6,
    OtherSpeedConfiguration = 7,
    InterfacePower = 8,
    /// The class-specific HID descriptor. See HID 7.1
    Hid = 33,
}

/// One entry of a configuration descriptor chain.
#[derive(Clone, Copy, Debug)]
pub enum AnyDescriptor {
    Config(ConfigDescriptor),
    Interface(InterfaceDescriptor),
    Endpoint(EndpointDescriptor),
    Hid(HidDescriptor),
    /// Any other type, kept only so it can be skipped.
    Unknown(u8),
}

/// Reads a `T` from the front of `bytes`, zero-filling whatever a short descriptor leaves out.
fn read_descriptor<T: Plain + Copy + Default>(bytes: &[u8]) -> T {
    let size = mem::size_of::<T>();
    let mut padded = [0u8; 64];
    let len = bytes.len().min(size).min(padded.len());
    padded[..len].copy_from_slice(&bytes[..len]);
    plain::from_bytes::<T>(&padded[..size]).map_or_else(|_| T::default(), |value| *value)
}

/// Reads a standalone descriptor, checking its type byte and that the device sent all of it.
pub fn parse_descriptor<T: Plain + Copy + Default>(bytes: &[u8], kind: DescriptorKind) -> Option<T> {
    if bytes.len() < mem::size_of::<T>() || bytes.get(1) != Some(&(kind as u8)) {
        return None;
    }
    Some(read_descriptor(bytes))
}

impl AnyDescriptor {
    /// Parses the entry at the front of `bytes`, returning it with its length.
    ///
    /// Returns `None` once the chain is exhausted or an entry claims more bytes than remain.
    pub fn parse(bytes: &[u8]) -> Option<(Self, usize)> {
        if bytes.len() < 2 {
            return None;
        }

        let len = usize::from(bytes[0]);
        let kind = bytes[1];

        if len < 2 || bytes.len() < len {
            return None;
        }
        let entry = &bytes[..len];

        Some((
            match kind {
                2 => Self::Config(read_descriptor(entry)),
                4 => Self::Interface(read_descriptor(entry)),
                5 => Self::Endpoint(read_descriptor(entry)),
                33 => Self::Hid(read_descriptor(entry)),
                other => Self::Unknown(other),
            },
            len,
        ))
    }
}

/// Walks a self-describing descriptor chain.
pub struct DescriptorIter<'a> {
    bytes: &'a [u8],
}

impl<'a> DescriptorIter<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }
}

impl Iterator for DescriptorIter<'_> {
    type Item = AnyDescriptor;

    fn next(&mut self) -> Option<AnyDescriptor> {
        let (descriptor, len) = AnyDescriptor::parse(self.bytes)?;
        self.bytes = &self.bytes[len..];
        Some(descriptor)
    }
}

pub(crate) mod config;
pub(crate) mod device;
pub(crate) mod endpoint;
pub(crate) mod interface;
pub(crate) mod setup;
