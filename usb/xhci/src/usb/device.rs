/// The standard device descriptor. See USB2 9.6.1
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default)]
pub struct DeviceDescriptor {
    pub length: u8,
    pub kind: u8,
    pub usb: u16,
    pub class: u8,
    pub sub_class: u8,
    pub protocol: u8,
    pub packet_size: u8,
    pub vendor: u16,
    pub product: u16,
    pub release: u16,
    pub manufacturer_str: u8,
    pub product_str: u8,
    pub serial_str: u8,
    pub configurations: u8,
}

unsafe impl plain::Plain for DeviceDescriptor {}

/// The first eight bytes of the device descriptor: enough to learn the default control
/// endpoint's max packet size before the pipe is configured with it.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default)]
pub struct DeviceDescriptor8Byte {
    pub length: u8,
    pub kind: u8,
    pub usb: u16,
    pub class: u8,
    pub sub_class: u8,
    pub protocol: u8,
    pub packet_size: u8,
}

unsafe impl plain::Plain for DeviceDescriptor8Byte {}

fn max_packet_size(usb: u16, packet_size: u8) -> u16 {
    // USB 3.x encodes bMaxPacketSize0 as an exponent.
    if (usb >> 8) >= 3 {
        1u16.checked_shl(u32::from(packet_size)).unwrap_or(512)
    } else {
        u16::from(packet_size)
    }
}

impl DeviceDescriptor {
    pub fn major_usb_vers(&self) -> u8 {
        (self.usb >> 8) as u8
    }

    pub fn max_packet_size(&self) -> u16 {
        max_packet_size(self.usb, self.packet_size)
    }
}

impl DeviceDescriptor8Byte {
    pub fn max_packet_size(&self) -> u16 {
        max_packet_size(self.usb, self.packet_size)
    }
}
