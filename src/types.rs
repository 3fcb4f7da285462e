//! Common identity and property types shared by every backend.

use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::error::ErrorKind;
use crate::{Error, Result};

/// A 48-bit Bluetooth device address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address([u8; 6]);

impl Address {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Address(bytes)
    }

    /// The address octets in transmission order (most significant first).
    pub const fn into_bytes(self) -> [u8; 6] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for byte in bytes.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| Error::message(ErrorKind::InvalidParameter, format!("invalid Bluetooth address {s:?}")))?;
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| Error::message(ErrorKind::InvalidParameter, format!("invalid Bluetooth address {s:?}")))?;
        }
        if parts.next().is_some() {
            return Err(Error::message(
                ErrorKind::InvalidParameter,
                format!("invalid Bluetooth address {s:?}"),
            ));
        }
        Ok(Address(bytes))
    }
}

impl From<[u8; 6]> for Address {
    fn from(bytes: [u8; 6]) -> Self {
        Address(bytes)
    }
}

/// The kind of a 48-bit Bluetooth device address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AddressType {
    #[default]
    Public,
    Random,
}

/// A platform-specific device identity.
///
/// On Linux and Windows this is the device's Bluetooth address together with
/// its address type. On Apple platforms the OS hides the address and assigns
/// a UUID that is stable only on the local host; the two renderings are not
/// interchangeable across machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeviceId {
    /// A public or random 48-bit Bluetooth device address.
    Address { address: Address, kind: AddressType },
    /// A host-local identifier assigned by the OS (Apple platforms).
    Uuid(Uuid),
}

impl DeviceId {
    pub fn from_address(address: Address) -> Self {
        DeviceId::Address {
            address,
            kind: AddressType::Public,
        }
    }

    /// The device address, when the platform exposes one.
    pub fn address(&self) -> Option<Address> {
        match self {
            DeviceId::Address { address, .. } => Some(*address),
            DeviceId::Uuid(_) => None,
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceId::Address { address, .. } => address.fmt(f),
            DeviceId::Uuid(uuid) => uuid.fmt(f),
        }
    }
}

impl FromStr for DeviceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Ok(address) = s.parse::<Address>() {
            return Ok(DeviceId::from_address(address));
        }
        Uuid::parse_str(s).map(DeviceId::Uuid).map_err(|_| {
            Error::message(
                ErrorKind::InvalidParameter,
                format!("{s:?} is neither a Bluetooth address nor a device UUID"),
            )
        })
    }
}

impl From<Address> for DeviceId {
    fn from(address: Address) -> Self {
        DeviceId::from_address(address)
    }
}

impl From<Uuid> for DeviceId {
    fn from(uuid: Uuid) -> Self {
        DeviceId::Uuid(uuid)
    }
}

/// The properties of a GATT characteristic, indicating which operations may
/// be performed on it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CharacteristicProperties {
    pub broadcast: bool,
    pub read: bool,
    pub write_without_response: bool,
    pub write: bool,
    pub notify: bool,
    pub indicate: bool,
    pub authenticated_signed_writes: bool,
    pub extended_properties: bool,
}

impl CharacteristicProperties {
    /// Decodes the GATT characteristic properties bit field.
    pub const fn from_bits(bits: u8) -> Self {
        CharacteristicProperties {
            broadcast: bits & 0x01 != 0,
            read: bits & 0x02 != 0,
            write_without_response: bits & 0x04 != 0,
            write: bits & 0x08 != 0,
            notify: bits & 0x10 != 0,
            indicate: bits & 0x20 != 0,
            authenticated_signed_writes: bits & 0x40 != 0,
            extended_properties: bits & 0x80 != 0,
        }
    }

    pub const fn bits(&self) -> u8 {
        (self.broadcast as u8)
            | (self.read as u8) << 1
            | (self.write_without_response as u8) << 2
            | (self.write as u8) << 3
            | (self.notify as u8) << 4
            | (self.indicate as u8) << 5
            | (self.authenticated_signed_writes as u8) << 6
            | (self.extended_properties as u8) << 7
    }

    /// The names of the set properties, using the conventional GATT
    /// spellings (`read`, `write-without-response`, `indicate`, …).
    pub fn names(&self) -> Vec<&'static str> {
        [
            (self.broadcast, "broadcast"),
            (self.read, "read"),
            (self.write_without_response, "write-without-response"),
            (self.write, "write"),
            (self.notify, "notify"),
            (self.indicate, "indicate"),
            (self.authenticated_signed_writes, "authenticated-signed-writes"),
            (self.extended_properties, "extended-properties"),
        ]
        .into_iter()
        .filter_map(|(set, name)| set.then_some(name))
        .collect()
    }
}

impl fmt::Display for CharacteristicProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.names().join(","))
    }
}

/// The connection lifecycle phase of a [`Client`][crate::Client].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Whether a scan requests scan responses from advertising peripherals.
///
/// Passive scanning is honored only on backends whose OS API implements it;
/// elsewhere the scan proceeds actively and an advisory message is logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ScanningMode {
    #[default]
    Active,
    Passive,
}

/// How a characteristic write is carried on the ATT layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteKind {
    /// The operation completes when the peripheral acknowledges the write.
    WithResponse,
    /// The operation completes when the OS has queued the write.
    WithoutResponse,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_roundtrip() {
        let addr: Address = "24:71:89:CC:09:05".parse().unwrap();
        assert_eq!(addr.into_bytes(), [0x24, 0x71, 0x89, 0xCC, 0x09, 0x05]);
        assert_eq!(addr.to_string(), "24:71:89:CC:09:05");
    }

    #[test]
    fn address_rejects_malformed() {
        assert!("24:71:89:CC:09".parse::<Address>().is_err());
        assert!("24:71:89:CC:09:05:33".parse::<Address>().is_err());
        assert!("xx:71:89:CC:09:05".parse::<Address>().is_err());
    }

    #[test]
    fn device_id_parses_both_renderings() {
        let id: DeviceId = "AA:BB:CC:DD:EE:FF".parse().unwrap();
        assert!(matches!(id, DeviceId::Address { .. }));

        let id: DeviceId = "f3b7d61c-8a30-4a62-8b62-bd0d9d1012ab".parse().unwrap();
        assert!(matches!(id, DeviceId::Uuid(_)));
        assert_eq!(id.address(), None);
    }

    #[test]
    fn properties_bits_roundtrip() {
        let props = CharacteristicProperties::from_bits(0x3a);
        assert!(props.read && props.write && props.notify && props.indicate);
        assert!(!props.broadcast && !props.write_without_response);
        assert_eq!(props.bits(), 0x3a);
    }

    #[test]
    fn property_names_use_gatt_spellings() {
        let props = CharacteristicProperties::from_bits(0x16);
        assert_eq!(props.names(), vec!["read", "write-without-response", "notify"]);
        assert_eq!(props.to_string(), "read,write-without-response,notify");
        assert_eq!(CharacteristicProperties::default().to_string(), "");
    }
}
