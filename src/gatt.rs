//! The immutable attribute model built after service discovery.
//!
//! A [`ServiceCollection`] is constructed once per successful connection and
//! never mutated afterwards. All nodes are owned by the collection; the
//! [`Service`], [`Characteristic`] and [`Descriptor`] values handed to users
//! are cheap snapshots that carry their attribute handle as the lookup key.
//! Handles are unique within one connection but not across connections: a
//! characteristic object kept across a reconnect is rejected as stale when
//! passed back to the client.

use std::collections::BTreeMap;
use std::fmt;

use uuid::Uuid;

use crate::backend::RawService;
use crate::error::ErrorKind;
use crate::{btuuid, CharacteristicProperties, Error, Result};

/// ATT_MTU minus the opcode and attribute handle octets of a Write Command.
const ATT_WRITE_OVERHEAD: u16 = 3;

/// A GATT descriptor attached to a characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub(crate) handle: u16,
    pub(crate) uuid: Uuid,
    pub(crate) characteristic_handle: u16,
}

impl Descriptor {
    /// The [`Uuid`] identifying the type of this GATT descriptor
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// The attribute handle of this descriptor, unique within the connection.
    pub fn handle(&self) -> u16 {
        self.handle
    }

    /// The handle of the characteristic this descriptor belongs to.
    pub fn characteristic_handle(&self) -> u16 {
        self.characteristic_handle
    }

    /// A human-readable description of this descriptor's UUID, if it is a
    /// well-known assigned number.
    pub fn description(&self) -> Option<String> {
        btuuid::description(self.uuid)
    }
}

/// A GATT characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Characteristic {
    pub(crate) handle: u16,
    pub(crate) uuid: Uuid,
    pub(crate) service_handle: u16,
    pub(crate) properties: CharacteristicProperties,
    pub(crate) descriptors: Vec<Descriptor>,
    pub(crate) max_write_len: u16,
    pub(crate) generation: u64,
}

impl Characteristic {
    /// The [`Uuid`] identifying the type of this GATT characteristic
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// The attribute handle of this characteristic's value, unique within the
    /// connection.
    pub fn handle(&self) -> u16 {
        self.handle
    }

    /// The handle of the service containing this characteristic.
    pub fn service_handle(&self) -> u16 {
        self.service_handle
    }

    /// The properties of this GATT characteristic, indicating which
    /// operations may be performed on it.
    pub fn properties(&self) -> CharacteristicProperties {
        self.properties
    }

    /// The descriptors discovered for this characteristic.
    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }

    /// The maximum number of octets that fit in a single write without
    /// response on this connection (the negotiated MTU minus the ATT opcode
    /// and handle overhead).
    pub fn max_write_without_response_size(&self) -> usize {
        self.max_write_len as usize
    }

    /// A human-readable description of this characteristic's UUID, if it is a
    /// well-known assigned number.
    pub fn description(&self) -> Option<String> {
        btuuid::description(self.uuid)
    }
}

impl fmt::Display for Characteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.description() {
            Some(desc) => write!(f, "{} (handle {}): {}", self.uuid, self.handle, desc),
            None => write!(f, "{} (handle {})", self.uuid, self.handle),
        }
    }
}

/// A GATT service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub(crate) handle: u16,
    pub(crate) uuid: Uuid,
    pub(crate) primary: bool,
    pub(crate) characteristics: Vec<Characteristic>,
}

impl Service {
    /// The [`Uuid`] identifying the type of this GATT service
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// The attribute handle of this service, unique within the connection.
    pub fn handle(&self) -> u16 {
        self.handle
    }

    /// Whether this is a primary service of the device.
    pub fn is_primary(&self) -> bool {
        self.primary
    }

    /// The characteristics of this service, in discovery order.
    pub fn characteristics(&self) -> &[Characteristic] {
        &self.characteristics
    }

    /// A human-readable description of this service's UUID, if it is a
    /// well-known assigned number.
    pub fn description(&self) -> Option<String> {
        btuuid::description(self.uuid)
    }
}

/// Identifies a characteristic in a client operation: by UUID, by attribute
/// handle, or by a [`Characteristic`] object from the current connection.
///
/// UUID lookup fails with [`ErrorKind::Ambiguous`] when the peripheral has
/// more than one characteristic with that UUID; disambiguate by handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharSpec {
    Uuid(Uuid),
    Handle(u16),
    Char(CharRef),
}

/// A reference to a characteristic object obtained from a
/// [`ServiceCollection`]. Remembers which connection produced it so stale
/// references are detected after a reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharRef {
    pub(crate) handle: u16,
    pub(crate) generation: u64,
}

impl From<Uuid> for CharSpec {
    fn from(uuid: Uuid) -> Self {
        CharSpec::Uuid(uuid)
    }
}

impl From<u16> for CharSpec {
    fn from(handle: u16) -> Self {
        CharSpec::Handle(handle)
    }
}

impl From<&Characteristic> for CharSpec {
    fn from(characteristic: &Characteristic) -> Self {
        CharSpec::Char(CharRef {
            handle: characteristic.handle,
            generation: characteristic.generation,
        })
    }
}

/// Identifies a service: by UUID or by attribute handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceSpec {
    Uuid(Uuid),
    Handle(u16),
}

impl From<Uuid> for ServiceSpec {
    fn from(uuid: Uuid) -> Self {
        ServiceSpec::Uuid(uuid)
    }
}

impl From<u16> for ServiceSpec {
    fn from(handle: u16) -> Self {
        ServiceSpec::Handle(handle)
    }
}

impl From<&Service> for ServiceSpec {
    fn from(service: &Service) -> Self {
        ServiceSpec::Handle(service.handle)
    }
}

/// The attribute database of one connected peripheral.
#[derive(Debug, Clone)]
pub struct ServiceCollection {
    generation: u64,
    mtu: u16,
    services: Vec<Service>,
    service_index: BTreeMap<u16, usize>,
    char_index: BTreeMap<u16, (usize, usize)>,
    desc_index: BTreeMap<u16, (usize, usize, usize)>,
}

impl ServiceCollection {
    pub(crate) fn build(raw: Vec<RawService>, mtu: u16, generation: u64) -> Result<Self> {
        let max_write_len = mtu.saturating_sub(ATT_WRITE_OVERHEAD);
        let mut services = Vec::with_capacity(raw.len());
        let mut service_index = BTreeMap::new();
        let mut char_index = BTreeMap::new();
        let mut desc_index = BTreeMap::new();
        let mut seen = std::collections::BTreeSet::new();

        let mut check_unique = |handle: u16| {
            if seen.insert(handle) {
                Ok(())
            } else {
                Err(Error::message(
                    ErrorKind::Internal,
                    format!("backend reported duplicate attribute handle {handle}"),
                ))
            }
        };

        for (si, raw_service) in raw.into_iter().enumerate() {
            check_unique(raw_service.handle)?;
            let mut characteristics = Vec::with_capacity(raw_service.characteristics.len());
            for (ci, raw_char) in raw_service.characteristics.into_iter().enumerate() {
                check_unique(raw_char.handle)?;
                let mut descriptors = Vec::with_capacity(raw_char.descriptors.len());
                for (di, raw_desc) in raw_char.descriptors.into_iter().enumerate() {
                    check_unique(raw_desc.handle)?;
                    desc_index.insert(raw_desc.handle, (si, ci, di));
                    descriptors.push(Descriptor {
                        handle: raw_desc.handle,
                        uuid: raw_desc.uuid,
                        characteristic_handle: raw_char.handle,
                    });
                }
                char_index.insert(raw_char.handle, (si, ci));
                characteristics.push(Characteristic {
                    handle: raw_char.handle,
                    uuid: raw_char.uuid,
                    service_handle: raw_service.handle,
                    properties: raw_char.properties,
                    descriptors,
                    max_write_len,
                    generation,
                });
            }
            service_index.insert(raw_service.handle, si);
            services.push(Service {
                handle: raw_service.handle,
                uuid: raw_service.uuid,
                primary: raw_service.primary,
                characteristics,
            });
        }

        Ok(ServiceCollection {
            generation,
            mtu,
            services,
            service_index,
            char_index,
            desc_index,
        })
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// The negotiated ATT MTU of the connection this collection was
    /// discovered on.
    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    /// All services of the peripheral, in discovery order.
    pub fn services(&self) -> &[Service] {
        &self.services
    }

    /// Iterates over every characteristic of every service.
    pub fn characteristics(&self) -> impl Iterator<Item = &Characteristic> {
        self.services.iter().flat_map(|s| s.characteristics.iter())
    }

    /// Get a service by UUID or handle.
    ///
    /// UUID lookup fails with [`ErrorKind::Ambiguous`] when the peripheral
    /// exposes more than one service with the UUID.
    pub fn get_service(&self, spec: impl Into<ServiceSpec>) -> Result<&Service> {
        match spec.into() {
            ServiceSpec::Handle(handle) => self
                .service_index
                .get(&handle)
                .map(|&si| &self.services[si])
                .ok_or_else(|| Error::message(ErrorKind::NotFound, format!("no service with handle {handle}"))),
            ServiceSpec::Uuid(uuid) => {
                let mut matches = self.services.iter().filter(|s| s.uuid == uuid);
                match (matches.next(), matches.next()) {
                    (Some(service), None) => Ok(service),
                    (Some(_), Some(_)) => Err(Error::message(
                        ErrorKind::Ambiguous,
                        format!("multiple services with UUID {uuid}; look up by handle instead"),
                    )),
                    (None, _) => Err(Error::message(ErrorKind::NotFound, format!("no service with UUID {uuid}"))),
                }
            }
        }
    }

    /// Get a characteristic by UUID, handle, or object.
    ///
    /// UUID lookup fails with [`ErrorKind::Ambiguous`] when the peripheral
    /// exposes more than one characteristic with the UUID; a characteristic
    /// object from a previous connection fails with a stale-handle error.
    pub fn get_characteristic(&self, spec: impl Into<CharSpec>) -> Result<&Characteristic> {
        match spec.into() {
            CharSpec::Handle(handle) => self.characteristic_by_handle(handle),
            CharSpec::Char(char_ref) => {
                if char_ref.generation != self.generation {
                    return Err(Error::message(
                        ErrorKind::InvalidParameter,
                        "stale characteristic: the attribute database was rebuilt since this object was obtained",
                    ));
                }
                self.characteristic_by_handle(char_ref.handle)
            }
            CharSpec::Uuid(uuid) => {
                let mut matches = self.characteristics().filter(|c| c.uuid == uuid);
                match (matches.next(), matches.next()) {
                    (Some(characteristic), None) => Ok(characteristic),
                    (Some(_), Some(_)) => Err(Error::message(
                        ErrorKind::Ambiguous,
                        format!("multiple characteristics with UUID {uuid}; look up by handle instead"),
                    )),
                    (None, _) => Err(Error::message(
                        ErrorKind::NotFound,
                        format!("no characteristic with UUID {uuid}"),
                    )),
                }
            }
        }
    }

    /// Get a descriptor by its attribute handle.
    pub fn get_descriptor(&self, handle: u16) -> Result<&Descriptor> {
        self.desc_index
            .get(&handle)
            .map(|&(si, ci, di)| &self.services[si].characteristics[ci].descriptors[di])
            .ok_or_else(|| Error::message(ErrorKind::NotFound, format!("no descriptor with handle {handle}")))
    }

    fn characteristic_by_handle(&self, handle: u16) -> Result<&Characteristic> {
        self.char_index
            .get(&handle)
            .map(|&(si, ci)| &self.services[si].characteristics[ci])
            .ok_or_else(|| Error::message(ErrorKind::NotFound, format!("no characteristic with handle {handle}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{RawCharacteristic, RawDescriptor, RawService};
    use crate::btuuid::bluetooth_uuid_from_u16;

    fn raw_tree() -> Vec<RawService> {
        vec![
            RawService {
                handle: 1,
                uuid: bluetooth_uuid_from_u16(0x1800),
                primary: true,
                characteristics: vec![RawCharacteristic {
                    handle: 3,
                    uuid: bluetooth_uuid_from_u16(0x2a00),
                    properties: CharacteristicProperties::from_bits(0x02),
                    descriptors: vec![],
                }],
            },
            RawService {
                handle: 10,
                uuid: bluetooth_uuid_from_u16(0x180d),
                primary: true,
                characteristics: vec![
                    RawCharacteristic {
                        handle: 12,
                        uuid: bluetooth_uuid_from_u16(0x2a37),
                        properties: CharacteristicProperties::from_bits(0x10),
                        descriptors: vec![RawDescriptor {
                            handle: 13,
                            uuid: bluetooth_uuid_from_u16(0x2902),
                        }],
                    },
                    RawCharacteristic {
                        handle: 25,
                        uuid: bluetooth_uuid_from_u16(0x2a37),
                        properties: CharacteristicProperties::from_bits(0x02),
                        descriptors: vec![],
                    },
                ],
            },
        ]
    }

    #[test]
    fn services_in_discovery_order() {
        let collection = ServiceCollection::build(raw_tree(), 23, 1).unwrap();
        let uuids: Vec<_> = collection.services().iter().map(|s| s.uuid()).collect();
        assert_eq!(
            uuids,
            vec![bluetooth_uuid_from_u16(0x1800), bluetooth_uuid_from_u16(0x180d)]
        );
    }

    #[test]
    fn lookup_by_handle_is_exact() {
        let collection = ServiceCollection::build(raw_tree(), 23, 1).unwrap();
        assert_eq!(collection.get_characteristic(12u16).unwrap().handle(), 12);
        assert_eq!(collection.get_characteristic(25u16).unwrap().handle(), 25);
        assert_eq!(
            collection.get_characteristic(99u16).unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn ambiguous_uuid_lookup_fails() {
        let collection = ServiceCollection::build(raw_tree(), 23, 1).unwrap();
        let err = collection
            .get_characteristic(bluetooth_uuid_from_u16(0x2a37))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Ambiguous);

        // A unique UUID resolves.
        let device_name = collection
            .get_characteristic(bluetooth_uuid_from_u16(0x2a00))
            .unwrap();
        assert_eq!(device_name.handle(), 3);
    }

    #[test]
    fn stale_object_is_rejected() {
        let old = ServiceCollection::build(raw_tree(), 23, 1).unwrap();
        let characteristic = old.get_characteristic(12u16).unwrap().clone();

        let rebuilt = ServiceCollection::build(raw_tree(), 23, 2).unwrap();
        let err = rebuilt.get_characteristic(&characteristic).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);

        // Same-generation objects resolve.
        let characteristic = rebuilt.get_characteristic(12u16).unwrap().clone();
        assert!(rebuilt.get_characteristic(&characteristic).is_ok());
    }

    #[test]
    fn duplicate_handles_are_a_backend_bug() {
        let mut raw = raw_tree();
        raw[1].characteristics[1].handle = 12;
        let err = ServiceCollection::build(raw, 23, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn max_write_len_tracks_mtu() {
        let collection = ServiceCollection::build(raw_tree(), 247, 1).unwrap();
        let characteristic = collection.get_characteristic(3u16).unwrap();
        assert_eq!(characteristic.max_write_without_response_size(), 244);
    }

    #[test]
    fn descriptor_lookup() {
        let collection = ServiceCollection::build(raw_tree(), 23, 1).unwrap();
        let descriptor = collection.get_descriptor(13).unwrap();
        assert_eq!(descriptor.characteristic_handle(), 12);
        assert_eq!(
            descriptor.description().as_deref(),
            Some("Client Characteristic Configuration")
        );
        assert_eq!(collection.get_descriptor(99).unwrap_err().kind(), ErrorKind::NotFound);
    }
}
