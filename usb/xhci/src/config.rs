use lazy_static::lazy_static;
use serde::Deserialize;

use crate::class::ClassDriverKind;
use crate::error::{Result, XhciError};

/// Controller tunables.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct XhciConfig {
    /// Slots in the command ring, the link TRB included.
    pub command_ring_len: usize,
    /// Slots in each transfer ring, the link TRB included.
    pub transfer_ring_len: usize,
    /// Records in the single event ring segment.
    pub event_ring_len: u16,
    /// Interrupt moderation interval in 250 ns units.
    pub interrupt_moderation: u16,
    /// Upper bound for MaxSlotsEn; the controller's own MaxSlots wins if it is lower.
    pub max_slots: u8,
}

impl Default for XhciConfig {
    fn default() -> Self {
        Self {
            command_ring_len: 32,
            transfer_ring_len: 32,
            event_ring_len: 64,
            interrupt_moderation: 4000,
            max_slots: 8,
        }
    }
}

impl XhciConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: XhciConfig = toml::from_str(s).map_err(|err| XhciError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the ring sizes. Event ring segments hold 16 to 4096 records, see XHCI Table 6-40
    pub fn validate(&self) -> Result<()> {
        if self.command_ring_len < 2 || self.transfer_ring_len < 2 {
            return Err(XhciError::Config(format!("ring lengths too small: {:?}", self)));
        }
        if !(16..=4096).contains(&self.event_ring_len) {
            return Err(XhciError::Config(format!(
                "event ring length {} outside 16..=4096",
                self.event_ring_len
            )));
        }
        if self.max_slots == 0 {
            return Err(XhciError::Config("max_slots is zero".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct DriverConfig {
    pub name: String,
    pub kind: ClassDriverKind,
    pub class: u8,
    // Negative values (and values above 255) match anything.
    pub subclass: i16,
    pub protocol: i16,
}

impl DriverConfig {
    fn subclass(&self) -> Option<u8> {
        u8::try_from(self.subclass).ok()
    }

    fn protocol(&self) -> Option<u8> {
        u8::try_from(self.protocol).ok()
    }

    pub fn matches(&self, (class, sub_class, protocol): (u8, u8, u8)) -> bool {
        self.class == class
            && self.subclass().map_or(true, |subclass| subclass == sub_class)
            && self.protocol().map_or(true, |proto| proto == protocol)
    }
}

#[derive(Debug, Deserialize)]
pub struct DriversConfig {
    pub drivers: Vec<DriverConfig>,
}

impl DriversConfig {
    pub fn lookup(&self, triple: (u8, u8, u8)) -> Option<&DriverConfig> {
        self.drivers.iter().find(|driver| driver.matches(triple))
    }
}

lazy_static! {
    pub static ref DRIVERS_CONFIG: DriversConfig = {
        const TOML: &str = include_str!("../drivers.toml");

        toml::from_str::<DriversConfig>(TOML).expect("Failed to parse internally embedded config file")
    };
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn embedded_table() {
        let keyboard = DRIVERS_CONFIG.lookup((3, 1, 1)).unwrap();
        assert_eq!(keyboard.kind, ClassDriverKind::HidKeyboard);

        // Boot mouse and report-protocol HID stay without a driver.
        assert!(DRIVERS_CONFIG.lookup((3, 1, 2)).is_none());
        assert!(DRIVERS_CONFIG.lookup((3, 0, 0)).is_none());
        assert!(DRIVERS_CONFIG.lookup((8, 6, 80)).is_none());
    }

    #[test]
    fn wildcard_fields() {
        let config: DriversConfig = toml::from_str(
            r#"
            [[drivers]]
            name = "any HID keyboard"
            kind = "hid-keyboard"
            class = 3
            subclass = -1
            protocol = 1
            "#,
        )
        .unwrap();
        assert!(config.lookup((3, 0, 1)).is_some());
        assert!(config.lookup((3, 1, 1)).is_some());
        assert!(config.lookup((3, 1, 2)).is_none());
    }

    #[test]
    fn controller_config() {
        assert_eq!(XhciConfig::from_toml_str("").unwrap(), XhciConfig::default());

        let config = XhciConfig::from_toml_str("transfer_ring_len = 64\nmax_slots = 2").unwrap();
        assert_eq!(config.transfer_ring_len, 64);
        assert_eq!(config.max_slots, 2);
        assert_eq!(config.command_ring_len, 32);

        assert!(matches!(
            XhciConfig::from_toml_str("command_ring_len = 1"),
            Err(XhciError::Config(_))
        ));
        assert!(XhciConfig::from_toml_str("max_slots = \"many\"").is_err());
    }

    #[test]
    fn validate_literals() {
        assert!(XhciConfig::default().validate().is_ok());

        let short_transfer = XhciConfig {
            transfer_ring_len: 1,
            ..XhciConfig::default()
        };
        assert!(matches!(short_transfer.validate(), Err(XhciError::Config(_))));

        let no_events = XhciConfig {
            event_ring_len: 0,
            ..XhciConfig::default()
        };
        assert!(matches!(no_events.validate(), Err(XhciError::Config(_))));

        let huge_events = XhciConfig {
            event_ring_len: 4097,
            ..XhciConfig::default()
        };
        assert!(huge_events.validate().is_err());

        let no_slots = XhciConfig {
            max_slots: 0,
            ..XhciConfig::default()
        };
        assert!(no_slots.validate().is_err());
    }
}
