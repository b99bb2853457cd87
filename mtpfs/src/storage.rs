//! Storage discovery and selection.

use libmtp::{MtpDevice, StorageInfo};
use tracing::{debug, info};

use crate::error::SelectError;
use crate::filter::{FilterPattern, filter};

/// One storage of the device, as selected for mounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageArea {
    pub id: u32,
    pub info: StorageInfo,
}

impl StorageArea {
    pub fn description(&self) -> &str {
        &self.info.storage_description
    }

    pub fn removable(&self) -> bool {
        self.info.is_removable()
    }

    pub fn read_only(&self) -> bool {
        self.info.is_read_only()
    }

    pub fn capacity(&self) -> u64 {
        self.info.max_capacity
    }

    pub fn free(&self) -> u64 {
        self.info.free_space_in_bytes
    }
}

/// Storages whose description matches `pattern`. Flat storages (neither
/// hierarchical nor DCF) are skipped. Never returns an empty set.
pub fn select_storages(
    device: &mut dyn MtpDevice,
    pattern: &FilterPattern,
) -> Result<Vec<StorageArea>, SelectError> {
    let ids = device
        .storage_ids()
        .map_err(SelectError::EnumerationFailed)?;

    let mut usable = Vec::with_capacity(ids.len());
    for id in ids {
        let info = device
            .storage_info(id)
            .map_err(SelectError::EnumerationFailed)?;
        if !info.is_hierarchical() && !info.is_dcf() {
            debug!(
                "skipping storage {id:#010x} \"{}\": filesystem type {:#06x}",
                info.storage_description, info.filesystem_type
            );
            continue;
        }
        usable.push(StorageArea { id, info });
    }

    let available: Vec<String> = usable.iter().map(|s| s.description().to_string()).collect();
    let selected = filter(usable, pattern, StorageArea::description);
    if selected.is_empty() {
        return Err(SelectError::NoStorageMatched {
            pattern: pattern.as_str().to_string(),
            available,
        });
    }
    for s in &selected {
        info!(
            "selected storage {:#010x} \"{}\"{}",
            s.id,
            s.description(),
            if s.removable() { " (removable)" } else { "" }
        );
    }
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use libmtp::codes::filesystem_type;
    use libmtp::mock::MockDevice;

    const INTERNAL: u32 = 0x0001_0001;
    const SD: u32 = 0x0002_0001;
    const FLAT: u32 = 0x0003_0001;

    fn phone() -> MockDevice {
        let mut flat = MockDevice::storage("Flat Storage", false);
        flat.filesystem_type = filesystem_type::GENERIC_FLAT;
        MockDevice::new("Mock Phone")
            .with_storage(INTERNAL, MockDevice::storage("Internal Storage", false))
            .with_storage(SD, MockDevice::storage("SD Card", true))
            .with_storage(FLAT, flat)
    }

    #[test]
    fn internal_pattern_selects_one() {
        let mut dev = phone();
        let picked = select_storages(&mut dev, &FilterPattern::new("Internal").unwrap()).unwrap();
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].id, INTERNAL);
        assert!(!picked[0].removable());
    }

    #[test]
    fn empty_pattern_selects_all_usable() {
        let mut dev = phone();
        let picked = select_storages(&mut dev, &FilterPattern::default()).unwrap();
        let ids: Vec<u32> = picked.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![INTERNAL, SD]);
    }

    #[test]
    fn no_match_is_an_error() {
        let mut dev = phone();
        let err = select_storages(&mut dev, &FilterPattern::new("USB").unwrap()).unwrap_err();
        match err {
            SelectError::NoStorageMatched { available, .. } => {
                assert_eq!(available, vec!["Internal Storage", "SD Card"])
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn enumeration_failure() {
        let mut dev = phone().failing_storage_ids();
        assert!(matches!(
            select_storages(&mut dev, &FilterPattern::default()),
            Err(SelectError::EnumerationFailed(_))
        ));
    }
}
