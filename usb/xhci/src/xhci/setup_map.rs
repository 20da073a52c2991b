use crate::error::{Result, XhciError};
use crate::usb::Setup;

pub const SETUP_STAGE_MAP_CAPACITY: usize = 32;

/// Remembers which request started each control transfer in flight.
///
/// A Transfer Event only names the record that raised it, which for a control transfer is the
/// last stage. Entries are keyed by the address of that record and hold the request carried by
/// the Setup Stage.
pub struct SetupStageMap {
    entries: [Option<(u64, Setup)>; SETUP_STAGE_MAP_CAPACITY],
}

impl SetupStageMap {
    pub fn new() -> Self {
        Self {
            entries: [None; SETUP_STAGE_MAP_CAPACITY],
        }
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.entries.iter().all(Option::is_some)
    }

    /// Records `setup` under `key`. A second entry for the same key replaces the first, since the
    /// ring has wrapped and the old transfer is long gone.
    pub fn put(&mut self, key: u64, setup: Setup) -> Result<()> {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|entry| matches!(entry, Some((k, _)) if *k == key))
        {
            *entry = Some((key, setup));
            return Ok(());
        }

        match self.entries.iter_mut().find(|entry| entry.is_none()) {
            Some(entry) => {
                *entry = Some((key, setup));
                Ok(())
            }
            None => Err(XhciError::SetupStageMapFull),
        }
    }

    pub fn get(&self, key: u64) -> Option<Setup> {
        self.entries.iter().find_map(|entry| match entry {
            Some((k, setup)) if *k == key => Some(*setup),
            _ => None,
        })
    }

    pub fn delete(&mut self, key: u64) -> Option<Setup> {
        let entry = self
            .entries
            .iter_mut()
            .find(|entry| matches!(entry, Some((k, _)) if *k == key))?;
        entry.take().map(|(_, setup)| setup)
    }
}

impl Default for SetupStageMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::usb::DescriptorKind;

    #[test]
    fn put_get_delete() {
        let mut map = SetupStageMap::new();
        let setup = Setup::get_descriptor(DescriptorKind::Device, 0, 0, 18);

        map.put(0x1000, setup).unwrap();
        assert_eq!(map.get(0x1000), Some(setup));
        assert_eq!(map.get(0x1010), None);

        assert_eq!(map.delete(0x1000), Some(setup));
        assert_eq!(map.get(0x1000), None);
        assert_eq!(map.delete(0x1000), None);
        assert!(map.is_empty());
    }

    #[test]
    fn full_map_rejects() {
        let mut map = SetupStageMap::new();
        for i in 0..SETUP_STAGE_MAP_CAPACITY as u64 {
            map.put(i * 16, Setup::set_configuration(1)).unwrap();
        }
        assert!(map.is_full());
        assert_eq!(
            map.put(0xFFF0, Setup::get_status()),
            Err(XhciError::SetupStageMapFull)
        );
        // Nothing was evicted.
        assert_eq!(map.get(0), Some(Setup::set_configuration(1)));

        // Reusing a key is not an insertion.
        map.put(0, Setup::get_status()).unwrap();
        assert_eq!(map.get(0), Some(Setup::get_status()));

        map.delete(16);
        map.put(0xFFF0, Setup::get_status()).unwrap();
        assert_eq!(map.len(), SETUP_STAGE_MAP_CAPACITY);
    }
}
