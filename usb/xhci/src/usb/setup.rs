use super::DescriptorKind;

pub const REQUEST_GET_STATUS: u8 = 0x00;
pub const REQUEST_GET_DESCRIPTOR: u8 = 0x06;
pub const REQUEST_SET_CONFIGURATION: u8 = 0x09;
/// HID class request selecting the boot or report protocol. See HID 7.2.6
pub const REQUEST_HID_SET_PROTOCOL: u8 = 0x0B;

/// bmRequestType bit 7: data flows from the device to the host.
pub const REQUEST_TYPE_DIR_IN: u8 = 0b1000_0000;
pub const REQUEST_TYPE_CLASS: u8 = 0b0010_0000;
pub const REQUEST_TYPE_RECIPIENT_MASK: u8 = 0b0001_1111;

#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Recipient {
    Device = 0,
    Interface = 1,
    Endpoint = 2,
    Other = 3,
}

/// The 8-byte SETUP packet that opens every control transfer. See USB2 9.3
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Setup {
    pub kind: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl Setup {
    pub fn get_status() -> Self {
        Self {
            kind: REQUEST_TYPE_DIR_IN,
            request: REQUEST_GET_STATUS,
            value: 0,
            index: 0,
            length: 2,
        }
    }

    pub fn get_descriptor(kind: DescriptorKind, index: u8, language: u16, length: u16) -> Self {
        Self {
            kind: REQUEST_TYPE_DIR_IN,
            request: REQUEST_GET_DESCRIPTOR,
            value: ((kind as u16) << 8) | (index as u16),
            index: language,
            length,
        }
    }

    pub fn set_configuration(value: u8) -> Self {
        Self {
            kind: 0b0000_0000,
            request: REQUEST_SET_CONFIGURATION,
            value: u16::from(value),
            index: 0,
            length: 0,
        }
    }

    /// SET_PROTOCOL for a HID interface; protocol 0 selects the boot protocol.
    pub fn set_protocol(interface: u8, protocol: u16) -> Self {
        Self {
            kind: REQUEST_TYPE_CLASS | Recipient::Interface as u8,
            request: REQUEST_HID_SET_PROTOCOL,
            value: protocol,
            index: u16::from(interface),
            length: 0,
        }
    }

    pub fn is_in(&self) -> bool {
        self.kind & REQUEST_TYPE_DIR_IN != 0
    }

    pub fn recipient(&self) -> Option<Recipient> {
        Some(match self.kind & REQUEST_TYPE_RECIPIENT_MASK {
            0 => Recipient::Device,
            1 => Recipient::Interface,
            2 => Recipient::Endpoint,
            3 => Recipient::Other,
            _ => return None,
        })
    }

    /// The descriptor type a GET_DESCRIPTOR request asks for.
    pub fn descriptor_type(&self) -> u8 {
        (self.value >> 8) as u8
    }

    /// The packet as it appears on the wire, little endian, for use as immediate data.
    pub fn to_u64(self) -> u64 {
        u64::from(self.kind)
            | (u64::from(self.request) << 8)
            | (u64::from(self.value) << 16)
            | (u64::from(self.index) << 32)
            | (u64::from(self.length) << 48)
    }

    pub fn from_u64(raw: u64) -> Self {
        Self {
            kind: raw as u8,
            request: (raw >> 8) as u8,
            value: (raw >> 16) as u16,
            index: (raw >> 32) as u16,
            length: (raw >> 48) as u16,
        }
    }
}
