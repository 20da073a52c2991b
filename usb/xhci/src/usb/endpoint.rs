use plain::Plain;

/// The descriptor for a USB Endpoint.
///
/// Each endpoint of an interface has its own descriptor, which the host uses to work out the
/// bandwidth the endpoint needs. It only ever arrives as part of the configuration descriptor
/// chain.
///
/// See USB2 9.6.6
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default)]
pub struct EndpointDescriptor {
    pub length: u8,
    pub kind: u8,
    pub address: u8,
    pub attributes: u8,
    pub max_packet_size: u16,
    pub interval: u8,
}

unsafe impl Plain for EndpointDescriptor {}

/// Mask that is ANDed to the [EndpointDescriptor].attributes buffer to get the endpoint type.
pub const ENDP_ATTR_TY_MASK: u8 = 0x3;

pub const ENDP_ADDR_DIR_IN: u8 = 0x80;
pub const ENDP_ADDR_NUMBER_MASK: u8 = 0x0F;

/// wMaxPacketSize bits 0-10 hold the packet size, bits 11-12 the additional transactions per
/// microframe for high-speed periodic endpoints.
pub const ENDP_MAX_PACKET_SIZE_MASK: u16 = 0x07FF;
pub const ENDP_ADDITIONAL_TRANSACTIONS_SHIFT: u8 = 11;

#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum EndpointTy {
    Ctrl = 0,
    Isoch = 1,
    Bulk = 2,
    Interrupt = 3,
}

impl EndpointDescriptor {
    pub fn ty(&self) -> EndpointTy {
        match self.attributes & ENDP_ATTR_TY_MASK {
            0 => EndpointTy::Ctrl,
            1 => EndpointTy::Isoch,
            2 => EndpointTy::Bulk,
            _ => EndpointTy::Interrupt,
        }
    }

    pub fn id(&self) -> EndpointId {
        EndpointId::from_address(self.address)
    }

    pub fn packet_size(&self) -> u16 {
        self.max_packet_size & ENDP_MAX_PACKET_SIZE_MASK
    }

    pub fn additional_transactions(&self) -> u8 {
        ((self.max_packet_size >> ENDP_ADDITIONAL_TRANSACTIONS_SHIFT) & 0b11) as u8
    }
}

/// An endpoint address: number plus direction.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct EndpointId {
    address: u8,
}

impl EndpointId {
    pub const DEFAULT_CONTROL: EndpointId = EndpointId { address: 0 };

    pub fn from_address(address: u8) -> Self {
        Self {
            address: address & (ENDP_ADDR_DIR_IN | ENDP_ADDR_NUMBER_MASK),
        }
    }

    /// Looks up the endpoint that owns Device Context Index `dci`.
    pub fn from_dci(dci: u8) -> Self {
        let number = dci / 2;
        let dir_in = dci % 2 == 1 && number != 0;
        Self::from_address(number | if dir_in { ENDP_ADDR_DIR_IN } else { 0 })
    }

    pub fn number(self) -> u8 {
        self.address & ENDP_ADDR_NUMBER_MASK
    }

    pub fn is_in(self) -> bool {
        self.address & ENDP_ADDR_DIR_IN != 0
    }

    pub fn address(self) -> u8 {
        self.address
    }

    /// Device Context Index: 1 for the default control endpoint, otherwise twice the endpoint
    /// number plus one for IN. See XHCI 4.5.1
    pub fn dci(self) -> u8 {
        if self.number() == 0 {
            1
        } else {
            self.number() * 2 + u8::from(self.is_in())
        }
    }
}

/// The HID class descriptor that follows a HID interface descriptor. See HID 6.2.1
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default)]
pub struct HidDescriptor {
    pub length: u8,
    pub kind: u8,
    pub hid_spec_release: u16,
    pub country_code: u8,
    pub num_descriptors: u8,
    pub report_desc_ty: u8,
    pub report_desc_len: u16,
}

unsafe impl Plain for HidDescriptor {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn device_context_index() {
        assert_eq!(EndpointId::DEFAULT_CONTROL.dci(), 1);
        assert_eq!(EndpointId::from_address(0x81).dci(), 3);
        assert_eq!(EndpointId::from_address(0x02).dci(), 4);
        assert_eq!(EndpointId::from_dci(3), EndpointId::from_address(0x81));
        assert_eq!(EndpointId::from_dci(1), EndpointId::DEFAULT_CONTROL);
        assert_eq!(EndpointId::from_dci(4).address(), 0x02);
    }
}
