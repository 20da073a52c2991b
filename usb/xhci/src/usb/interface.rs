use plain::Plain;

/// See USB2 9.6.5
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default)]
pub struct InterfaceDescriptor {
    pub length: u8,
    pub kind: u8,
    pub number: u8,
    pub alternate_setting: u8,
    pub endpoints: u8,
    pub class: u8,
    pub sub_class: u8,
    pub protocol: u8,
    pub interface_str: u8,
}

unsafe impl Plain for InterfaceDescriptor {}

impl InterfaceDescriptor {
    /// The (class, subclass, protocol) triple class drivers are matched on.
    pub fn class_triple(&self) -> (u8, u8, u8) {
        (self.class, self.sub_class, self.protocol)
    }
}
