//! Advertisement data model.

use std::collections::HashMap;

use smallvec::SmallVec;
use uuid::Uuid;

/// The payload of a single advertising packet, or of an advertising packet
/// merged with its scan response.
///
/// The OSes surface different subsets of the advertising PDU; fields a
/// platform does not report are left at their empty/`None` values.
#[derive(Debug, Clone, Default)]
pub struct AdvertisementData {
    /// The local name of the device, from the advertisement or scan response.
    pub local_name: Option<String>,
    /// Advertised GATT service UUIDs.
    pub services: SmallVec<[Uuid; 1]>,
    /// Manufacturer-specific data, keyed by Bluetooth SIG company identifier.
    pub manufacturer_data: HashMap<u16, SmallVec<[u8; 16]>>,
    /// Service-specific data, keyed by service UUID.
    pub service_data: HashMap<Uuid, SmallVec<[u8; 16]>>,
    /// Transmit power level in dBm, when the advertisement includes it.
    pub tx_power_level: Option<i16>,
    /// Whether the peripheral accepts connections.
    pub is_connectable: bool,
}

impl AdvertisementData {
    /// Merges a newer advertisement for the same device into `self`.
    ///
    /// Newer non-empty scalar fields overwrite older values; service UUIDs
    /// are set-unioned; the `manufacturer_data` and `service_data` maps are
    /// union-merged with the newer entry winning per key. Entries only
    /// present in the older advertisement are retained, so the merged record
    /// accumulates everything seen for the device within one scan session.
    pub fn merge(&mut self, newer: &AdvertisementData) {
        if newer.local_name.is_some() {
            self.local_name.clone_from(&newer.local_name);
        }
        for uuid in &newer.services {
            if !self.services.contains(uuid) {
                self.services.push(*uuid);
            }
        }
        for (company_id, data) in &newer.manufacturer_data {
            self.manufacturer_data.insert(*company_id, data.clone());
        }
        for (uuid, data) in &newer.service_data {
            self.service_data.insert(*uuid, data.clone());
        }
        if newer.tx_power_level.is_some() {
            self.tx_power_level = newer.tx_power_level;
        }
        self.is_connectable |= newer.is_connectable;
    }

    /// Whether the advertisement names any service in `uuids`.
    pub(crate) fn advertises_any_service(&self, uuids: &[Uuid]) -> bool {
        self.services.iter().any(|x| uuids.contains(x))
    }
}

#[cfg(test)]
mod tests {
    use smallvec::smallvec;

    use super::*;
    use crate::btuuid::bluetooth_uuid_from_u16;

    fn adv() -> AdvertisementData {
        AdvertisementData {
            local_name: Some("thermometer".to_string()),
            services: smallvec![bluetooth_uuid_from_u16(0x1809)],
            manufacturer_data: HashMap::from([(0x004c, SmallVec::from_slice(&[0x10, 0x05]))]),
            service_data: HashMap::from([(bluetooth_uuid_from_u16(0x1809), SmallVec::from_slice(&[1]))]),
            tx_power_level: Some(-4),
            is_connectable: true,
        }
    }

    #[test]
    fn merge_unions_maps_and_services() {
        let mut merged = adv();
        let newer = AdvertisementData {
            local_name: None,
            services: smallvec![bluetooth_uuid_from_u16(0x180f)],
            manufacturer_data: HashMap::new(),
            service_data: HashMap::from([(bluetooth_uuid_from_u16(0x180f), SmallVec::from_slice(&[0x64]))]),
            tx_power_level: None,
            is_connectable: false,
        };
        merged.merge(&newer);

        assert_eq!(merged.local_name.as_deref(), Some("thermometer"));
        assert_eq!(merged.services.len(), 2);
        assert_eq!(merged.manufacturer_data[&0x004c].as_slice(), &[0x10, 0x05]);
        assert_eq!(merged.service_data.len(), 2);
        assert_eq!(merged.tx_power_level, Some(-4));
        assert!(merged.is_connectable);
    }

    #[test]
    fn merge_newer_entries_win_per_key() {
        let mut merged = adv();
        let newer = AdvertisementData {
            service_data: HashMap::from([(bluetooth_uuid_from_u16(0x1809), SmallVec::from_slice(&[9, 9]))]),
            ..Default::default()
        };
        merged.merge(&newer);
        assert_eq!(merged.service_data[&bluetooth_uuid_from_u16(0x1809)].as_slice(), &[9, 9]);
    }

    #[test]
    fn merge_does_not_duplicate_services() {
        let mut merged = adv();
        merged.merge(&adv());
        assert_eq!(merged.services.len(), 1);
    }
}
