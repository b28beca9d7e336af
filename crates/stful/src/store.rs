//! Registered devices and their tables.

use rustc_hash::FxHashMap;

use crate::{DevId, DeviceConfig, MAX_PIPES, Result, StatefulTable, StfulError, TableHandle};

/// Tables keyed by `(device, handle)`.
#[derive(Debug, Default)]
pub struct TableStore {
    devices: FxHashMap<DevId, DeviceConfig>,
    tables: FxHashMap<(DevId, TableHandle), StatefulTable>,
}

impl TableStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    ///
    /// Fails if the device is already registered or has an invalid pipe
    /// count.
    pub fn add_device(&mut self, config: DeviceConfig) -> Result<()> {
        if config.num_pipes == 0 || config.num_pipes > MAX_PIPES {
            return Err(StfulError::invalid(format!(
                "device {} has {} pipes; expected 1..={MAX_PIPES}",
                config.dev_id, config.num_pipes
            )));
        }
        if self.devices.contains_key(&config.dev_id) {
            return Err(StfulError::invalid(format!(
                "device {} already registered",
                config.dev_id
            )));
        }
        self.devices.insert(config.dev_id, config);
        Ok(())
    }

    pub(crate) fn remove_device(&mut self, dev: DevId) -> Option<DeviceConfig> {
        self.devices.remove(&dev)
    }

    /// # Errors
    ///
    /// Returns `UnknownDevice` if the device is not registered.
    pub fn device(&self, dev: DevId) -> Result<DeviceConfig> {
        self.devices
            .get(&dev)
            .copied()
            .ok_or(StfulError::UnknownDevice(dev))
    }

    #[must_use]
    pub fn contains(&self, dev: DevId, handle: TableHandle) -> bool {
        self.tables.contains_key(&(dev, handle))
    }

    pub(crate) fn insert(&mut self, table: StatefulTable) -> Result<()> {
        let key = (table.dev(), table.handle());
        if self.tables.contains_key(&key) {
            return Err(StfulError::TableExists {
                dev: key.0,
                handle: key.1,
            });
        }
        self.tables.insert(key, table);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `TableNotFound` if no such table exists.
    pub fn get(&self, dev: DevId, handle: TableHandle) -> Result<&StatefulTable> {
        self.tables
            .get(&(dev, handle))
            .ok_or(StfulError::TableNotFound { dev, handle })
    }

    pub(crate) fn get_mut(&mut self, dev: DevId, handle: TableHandle) -> Result<&mut StatefulTable> {
        self.tables
            .get_mut(&(dev, handle))
            .ok_or(StfulError::TableNotFound { dev, handle })
    }

    pub(crate) fn remove(&mut self, dev: DevId, handle: TableHandle) -> Result<StatefulTable> {
        self.tables
            .remove(&(dev, handle))
            .ok_or(StfulError::TableNotFound { dev, handle })
    }

    /// Handles of the tables on `dev`, ascending.
    #[must_use]
    pub fn handles(&self, dev: DevId) -> Vec<TableHandle> {
        let mut handles: Vec<TableHandle> = self
            .tables
            .keys()
            .filter(|(d, _)| *d == dev)
            .map(|&(_, h)| h)
            .collect();
        handles.sort_unstable();
        handles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChipFamily;

    #[test]
    fn test_device_registration() {
        let mut store = TableStore::new();
        store
            .add_device(DeviceConfig::new(1, ChipFamily::Tofino2, 4))
            .unwrap();
        assert!(store.add_device(DeviceConfig::new(1, ChipFamily::Tofino, 2)).is_err());
        assert!(store.add_device(DeviceConfig::new(2, ChipFamily::Tofino, 0)).is_err());
        assert!(store.add_device(DeviceConfig::new(3, ChipFamily::Tofino, 33)).is_err());
        assert_eq!(store.device(1).unwrap().num_pipes, 4);
        assert!(matches!(store.device(9), Err(StfulError::UnknownDevice(9))));
    }

    #[test]
    fn test_missing_table() {
        let store = TableStore::new();
        assert!(matches!(
            store.get(0, TableHandle(5)),
            Err(StfulError::TableNotFound { dev: 0, .. })
        ));
        assert!(store.handles(0).is_empty());
    }
}
