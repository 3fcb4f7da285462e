//! Bluetooth UUID handling: 16/32-bit expansion, parsing, and the
//! assigned-numbers registry.
//!
//! Bluetooth SIG [assigned numbers](https://www.bluetooth.com/specifications/assigned-numbers/)
//! define short 16-bit and 32-bit UUID aliases that expand to full 128-bit
//! UUIDs against the Bluetooth Base UUID. All UUID comparison in this crate
//! is by the expanded 128-bit value; the textual form a UUID arrived in is
//! irrelevant.

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use uuid::Uuid;

use crate::error::ErrorKind;
use crate::{Error, Result};

/// This is the Bluetooth Base UUID. It is used with 16-bit and 32-bit UUIDs
/// [defined](https://www.bluetooth.com/specifications/assigned-numbers/) by the Bluetooth SIG.
pub const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

/// Const function to create a 16-bit Bluetooth UUID
pub const fn bluetooth_uuid_from_u16(uuid: u16) -> Uuid {
    Uuid::from_u128(((uuid as u128) << 96) | BLUETOOTH_BASE_UUID)
}

/// Const function to create a 32-bit Bluetooth UUID
pub const fn bluetooth_uuid_from_u32(uuid: u32) -> Uuid {
    Uuid::from_u128(((uuid as u128) << 96) | BLUETOOTH_BASE_UUID)
}

/// Parses a UUID in any of the three textual forms accepted by this crate.
///
/// - 4 hex digits: a 16-bit alias, expanded against the base UUID
/// - 8 hex digits: a 32-bit alias, expanded against the base UUID
/// - the full 128-bit form, parsed case-insensitively
///
/// The canonical rendering of the result is the lowercase hyphenated 128-bit
/// form produced by [`Uuid`]'s `Display` implementation.
pub fn parse_uuid(s: &str) -> Result<Uuid> {
    match s.len() {
        4 => u16::from_str_radix(s, 16)
            .map(bluetooth_uuid_from_u16)
            .map_err(|_| invalid_uuid(s)),
        8 => u32::from_str_radix(s, 16)
            .map(bluetooth_uuid_from_u32)
            .map_err(|_| invalid_uuid(s)),
        _ => Uuid::parse_str(s).map_err(|_| invalid_uuid(s)),
    }
}

fn invalid_uuid(s: &str) -> Error {
    Error::message(ErrorKind::InvalidParameter, format!("invalid UUID {s:?}"))
}

/// Extension trait for [uuid::Uuid] with helper methods for dealing with Bluetooth 16-bit and 32-bit UUIDs
pub trait BluetoothUuidExt: private::Sealed {
    /// Creates a 16-bit Bluetooth UUID
    fn from_u16(uuid: u16) -> Self;

    /// Creates a 32-bit Bluetooth UUID
    fn from_u32(uuid: u32) -> Self;

    /// Creates a UUID from `bytes`
    ///
    /// # Panics
    ///
    /// Panics if `bytes.len()` is not one of 2, 4, or 16
    fn from_bluetooth_bytes(bytes: &[u8]) -> Self;

    /// Returns `true` if self is a valid 16-bit Bluetooth UUID
    fn is_u16_uuid(&self) -> bool;

    /// Returns `true` if self is a valid 32-bit Bluetooth UUID
    fn is_u32_uuid(&self) -> bool;

    /// Tries to convert self into a 16-bit Bluetooth UUID
    fn try_to_u16(&self) -> Option<u16>;

    /// Tries to convert self into a 32-bit Bluetooth UUID
    fn try_to_u32(&self) -> Option<u32>;

    /// Returns a slice of octets representing the UUID. If the UUID is a valid 16- or 32-bit Bluetooth UUID, the
    /// returned slice will be 2 or 4 octets long, respectively. Otherwise the slice will be 16-octets in length.
    fn as_bluetooth_bytes(&self) -> &[u8];
}

impl BluetoothUuidExt for Uuid {
    fn from_u16(uuid: u16) -> Self {
        bluetooth_uuid_from_u16(uuid)
    }

    fn from_u32(uuid: u32) -> Self {
        bluetooth_uuid_from_u32(uuid)
    }

    fn from_bluetooth_bytes(bytes: &[u8]) -> Self {
        bytes
            .try_into()
            .map(|x| Self::from_u16(u16::from_be_bytes(x)))
            .or_else(|_| bytes.try_into().map(|x| Self::from_u32(u32::from_be_bytes(x))))
            .or_else(|_| bytes.try_into().map(Self::from_bytes))
            .expect("invalid slice length for bluetooth UUID")
    }

    fn is_u16_uuid(&self) -> bool {
        let u = self.as_u128();
        (u & ((1 << 96) - 1)) == BLUETOOTH_BASE_UUID && (((u >> 96) as u32) & 0xffff0000) == 0
    }

    fn is_u32_uuid(&self) -> bool {
        let u = self.as_u128();
        (u & ((1 << 96) - 1)) == BLUETOOTH_BASE_UUID
    }

    fn try_to_u16(&self) -> Option<u16> {
        let u = self.as_u128();
        self.is_u16_uuid().then(|| (u >> 96) as u16)
    }

    fn try_to_u32(&self) -> Option<u32> {
        let u = self.as_u128();
        self.is_u32_uuid().then(|| (u >> 96) as u32)
    }

    fn as_bluetooth_bytes(&self) -> &[u8] {
        let bytes = self.as_bytes();
        if self.is_u16_uuid() {
            &bytes[2..4]
        } else if self.is_u32_uuid() {
            &bytes[0..4]
        } else {
            &bytes[..]
        }
    }
}

mod private {
    use uuid::Uuid;

    pub trait Sealed {}

    impl Sealed for Uuid {}
}

/// Returns a human-readable description of a well-known UUID.
///
/// Covers the assigned-numbers tables compiled into this crate (GATT
/// services, characteristics, and descriptors) plus any names registered at
/// runtime with [`register_uuids`].
pub fn description(uuid: Uuid) -> Option<String> {
    if let Some(name) = registry().read().unwrap().get(&uuid) {
        return Some(name.clone());
    }
    assigned_name(uuid).map(str::to_string)
}

/// Registers additional UUID descriptions, e.g. for vendor-specific services.
///
/// Entries registered here take precedence over the built-in assigned-numbers
/// tables and are visible process-wide.
pub fn register_uuids<I>(entries: I)
where
    I: IntoIterator<Item = (Uuid, String)>,
{
    let mut registry = registry().write().unwrap();
    for (uuid, name) in entries {
        registry.insert(uuid, name);
    }
}

fn registry() -> &'static RwLock<HashMap<Uuid, String>> {
    static REGISTRY: OnceLock<RwLock<HashMap<Uuid, String>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Returns the name of the company assigned `company_id`, as used in
/// advertisement manufacturer data.
pub fn company_name(company_id: u16) -> Option<&'static str> {
    COMPANIES
        .binary_search_by_key(&company_id, |(id, _)| *id)
        .ok()
        .map(|i| COMPANIES[i].1)
}

fn assigned_name(uuid: Uuid) -> Option<&'static str> {
    let short = uuid.try_to_u16()?;
    let table: &[(u16, &str)] = match short >> 8 {
        0x18 => SERVICE_NAMES,
        0x27 => UNIT_NAMES,
        0x28 => DECLARATION_NAMES,
        0x29 => DESCRIPTOR_NAMES,
        0x2a | 0x2b => CHARACTERISTIC_NAMES,
        _ => return None,
    };
    table
        .binary_search_by_key(&short, |(id, _)| *id)
        .ok()
        .map(|i| table[i].1)
}

/// Bluetooth GATT Service 16-bit UUIDs
pub mod services {
    #![allow(missing_docs)]

    use uuid::Uuid;

    use super::bluetooth_uuid_from_u16;

    pub const GENERIC_ACCESS: Uuid = bluetooth_uuid_from_u16(0x1800);
    pub const GENERIC_ATTRIBUTE: Uuid = bluetooth_uuid_from_u16(0x1801);
    pub const IMMEDIATE_ALERT: Uuid = bluetooth_uuid_from_u16(0x1802);
    pub const LINK_LOSS: Uuid = bluetooth_uuid_from_u16(0x1803);
    pub const TX_POWER: Uuid = bluetooth_uuid_from_u16(0x1804);
    pub const CURRENT_TIME: Uuid = bluetooth_uuid_from_u16(0x1805);
    pub const REFERENCE_TIME_UPDATE: Uuid = bluetooth_uuid_from_u16(0x1806);
    pub const NEXT_DST_CHANGE: Uuid = bluetooth_uuid_from_u16(0x1807);
    pub const GLUCOSE: Uuid = bluetooth_uuid_from_u16(0x1808);
    pub const HEALTH_THERMOMETER: Uuid = bluetooth_uuid_from_u16(0x1809);
    pub const DEVICE_INFORMATION: Uuid = bluetooth_uuid_from_u16(0x180a);
    pub const HEART_RATE: Uuid = bluetooth_uuid_from_u16(0x180d);
    pub const PHONE_ALERT_STATUS: Uuid = bluetooth_uuid_from_u16(0x180e);
    pub const BATTERY: Uuid = bluetooth_uuid_from_u16(0x180f);
    pub const BLOOD_PRESSURE: Uuid = bluetooth_uuid_from_u16(0x1810);
    pub const ALERT_NOTIFICATION: Uuid = bluetooth_uuid_from_u16(0x1811);
    pub const HUMAN_INTERFACE_DEVICE: Uuid = bluetooth_uuid_from_u16(0x1812);
    pub const SCAN_PARAMETERS: Uuid = bluetooth_uuid_from_u16(0x1813);
    pub const RUNNING_SPEED_AND_CADENCE: Uuid = bluetooth_uuid_from_u16(0x1814);
    pub const AUTOMATION_IO: Uuid = bluetooth_uuid_from_u16(0x1815);
    pub const CYCLING_SPEED_AND_CADENCE: Uuid = bluetooth_uuid_from_u16(0x1816);
    pub const CYCLING_POWER: Uuid = bluetooth_uuid_from_u16(0x1818);
    pub const LOCATION_AND_NAVIGATION: Uuid = bluetooth_uuid_from_u16(0x1819);
    pub const ENVIRONMENTAL_SENSING: Uuid = bluetooth_uuid_from_u16(0x181a);
    pub const BODY_COMPOSITION: Uuid = bluetooth_uuid_from_u16(0x181b);
    pub const USER_DATA: Uuid = bluetooth_uuid_from_u16(0x181c);
    pub const WEIGHT_SCALE: Uuid = bluetooth_uuid_from_u16(0x181d);
    pub const BOND_MANAGEMENT: Uuid = bluetooth_uuid_from_u16(0x181e);
    pub const CONTINUOUS_GLUCOSE_MONITORING: Uuid = bluetooth_uuid_from_u16(0x181f);
    pub const INTERNET_PROTOCOL_SUPPORT: Uuid = bluetooth_uuid_from_u16(0x1820);
    pub const INDOOR_POSITIONING: Uuid = bluetooth_uuid_from_u16(0x1821);
    pub const PULSE_OXIMETER: Uuid = bluetooth_uuid_from_u16(0x1822);
    pub const HTTP_PROXY: Uuid = bluetooth_uuid_from_u16(0x1823);
    pub const TRANSPORT_DISCOVERY: Uuid = bluetooth_uuid_from_u16(0x1824);
    pub const OBJECT_TRANSFER: Uuid = bluetooth_uuid_from_u16(0x1825);
    pub const FITNESS_MACHINE: Uuid = bluetooth_uuid_from_u16(0x1826);
    pub const MESH_PROVISIONING: Uuid = bluetooth_uuid_from_u16(0x1827);
    pub const MESH_PROXY: Uuid = bluetooth_uuid_from_u16(0x1828);
    pub const RECONNECTION_CONFIGURATION: Uuid = bluetooth_uuid_from_u16(0x1829);
    pub const INSULIN_DELIVERY: Uuid = bluetooth_uuid_from_u16(0x183a);
    pub const BINARY_SENSOR: Uuid = bluetooth_uuid_from_u16(0x183b);
    pub const EMERGENCY_CONFIGURATION: Uuid = bluetooth_uuid_from_u16(0x183c);
    pub const PHYSICAL_ACTIVITY_MONITOR: Uuid = bluetooth_uuid_from_u16(0x183e);
    pub const AUDIO_INPUT_CONTROL: Uuid = bluetooth_uuid_from_u16(0x1843);
    pub const VOLUME_CONTROL: Uuid = bluetooth_uuid_from_u16(0x1844);
    pub const VOLUME_OFFSET_CONTROL: Uuid = bluetooth_uuid_from_u16(0x1845);
    pub const COORDINATED_SET_IDENTIFICATION: Uuid = bluetooth_uuid_from_u16(0x1846);
    pub const DEVICE_TIME: Uuid = bluetooth_uuid_from_u16(0x1847);
    pub const MEDIA_CONTROL: Uuid = bluetooth_uuid_from_u16(0x1848);
    pub const GENERIC_MEDIA_CONTROL: Uuid = bluetooth_uuid_from_u16(0x1849);
    pub const TELEPHONE_BEARER: Uuid = bluetooth_uuid_from_u16(0x184b);
    pub const GENERIC_TELEPHONE_BEARER: Uuid = bluetooth_uuid_from_u16(0x184c);
    pub const MICROPHONE_CONTROL: Uuid = bluetooth_uuid_from_u16(0x184d);
    pub const AUDIO_STREAM_CONTROL: Uuid = bluetooth_uuid_from_u16(0x184e);
    pub const BROADCAST_AUDIO_SCAN: Uuid = bluetooth_uuid_from_u16(0x184f);
    pub const PUBLISHED_AUDIO_CAPABILITIES: Uuid = bluetooth_uuid_from_u16(0x1850);
    pub const BASIC_AUDIO_ANNOUNCEMENT: Uuid = bluetooth_uuid_from_u16(0x1851);
    pub const BROADCAST_AUDIO_ANNOUNCEMENT: Uuid = bluetooth_uuid_from_u16(0x1852);
    pub const COMMON_AUDIO: Uuid = bluetooth_uuid_from_u16(0x1853);
    pub const HEARING_ACCESS: Uuid = bluetooth_uuid_from_u16(0x1854);
    pub const TELEPHONY_AND_MEDIA_AUDIO: Uuid = bluetooth_uuid_from_u16(0x1855);
    pub const PUBLIC_BROADCAST_ANNOUNCEMENT: Uuid = bluetooth_uuid_from_u16(0x1856);
    pub const ELECTRONIC_SHELF_LABEL: Uuid = bluetooth_uuid_from_u16(0x1857);
}

/// Bluetooth GATT Characteristic 16-bit UUIDs
pub mod characteristics {
    #![allow(missing_docs)]

    use uuid::Uuid;

    use super::bluetooth_uuid_from_u16;

    pub const DEVICE_NAME: Uuid = bluetooth_uuid_from_u16(0x2a00);
    pub const APPEARANCE: Uuid = bluetooth_uuid_from_u16(0x2a01);
    pub const PERIPHERAL_PRIVACY_FLAG: Uuid = bluetooth_uuid_from_u16(0x2a02);
    pub const RECONNECTION_ADDRESS: Uuid = bluetooth_uuid_from_u16(0x2a03);
    pub const PERIPHERAL_PREFERRED_CONNECTION_PARAMETERS: Uuid = bluetooth_uuid_from_u16(0x2a04);
    pub const SERVICE_CHANGED: Uuid = bluetooth_uuid_from_u16(0x2a05);
    pub const ALERT_LEVEL: Uuid = bluetooth_uuid_from_u16(0x2a06);
    pub const TX_POWER_LEVEL: Uuid = bluetooth_uuid_from_u16(0x2a07);
    pub const GLUCOSE_MEASUREMENT: Uuid = bluetooth_uuid_from_u16(0x2a18);
    pub const BATTERY_LEVEL: Uuid = bluetooth_uuid_from_u16(0x2a19);
    pub const TEMPERATURE_MEASUREMENT: Uuid = bluetooth_uuid_from_u16(0x2a1c);
    pub const SYSTEM_ID: Uuid = bluetooth_uuid_from_u16(0x2a23);
    pub const MODEL_NUMBER_STRING: Uuid = bluetooth_uuid_from_u16(0x2a24);
    pub const SERIAL_NUMBER_STRING: Uuid = bluetooth_uuid_from_u16(0x2a25);
    pub const FIRMWARE_REVISION_STRING: Uuid = bluetooth_uuid_from_u16(0x2a26);
    pub const HARDWARE_REVISION_STRING: Uuid = bluetooth_uuid_from_u16(0x2a27);
    pub const SOFTWARE_REVISION_STRING: Uuid = bluetooth_uuid_from_u16(0x2a28);
    pub const MANUFACTURER_NAME_STRING: Uuid = bluetooth_uuid_from_u16(0x2a29);
    pub const REGULATORY_CERTIFICATION_DATA_LIST: Uuid = bluetooth_uuid_from_u16(0x2a2a);
    pub const CURRENT_TIME: Uuid = bluetooth_uuid_from_u16(0x2a2b);
    pub const MAGNETIC_DECLINATION: Uuid = bluetooth_uuid_from_u16(0x2a2c);
    pub const SCAN_REFRESH: Uuid = bluetooth_uuid_from_u16(0x2a31);
    pub const BOOT_KEYBOARD_OUTPUT_REPORT: Uuid = bluetooth_uuid_from_u16(0x2a32);
    pub const HEART_RATE_MEASUREMENT: Uuid = bluetooth_uuid_from_u16(0x2a37);
    pub const BODY_SENSOR_LOCATION: Uuid = bluetooth_uuid_from_u16(0x2a38);
    pub const HEART_RATE_CONTROL_POINT: Uuid = bluetooth_uuid_from_u16(0x2a39);
    pub const ALERT_STATUS: Uuid = bluetooth_uuid_from_u16(0x2a3f);
    pub const RINGER_CONTROL_POINT: Uuid = bluetooth_uuid_from_u16(0x2a40);
    pub const RINGER_SETTING: Uuid = bluetooth_uuid_from_u16(0x2a41);
    pub const SCAN_INTERVAL_WINDOW: Uuid = bluetooth_uuid_from_u16(0x2a4f);
    pub const PNP_ID: Uuid = bluetooth_uuid_from_u16(0x2a50);
    pub const RSC_MEASUREMENT: Uuid = bluetooth_uuid_from_u16(0x2a53);
    pub const SC_CONTROL_POINT: Uuid = bluetooth_uuid_from_u16(0x2a55);
    pub const CSC_MEASUREMENT: Uuid = bluetooth_uuid_from_u16(0x2a5b);
    pub const CYCLING_POWER_MEASUREMENT: Uuid = bluetooth_uuid_from_u16(0x2a63);
    pub const LOCATION_AND_SPEED: Uuid = bluetooth_uuid_from_u16(0x2a67);
    pub const ELEVATION: Uuid = bluetooth_uuid_from_u16(0x2a6c);
    pub const PRESSURE: Uuid = bluetooth_uuid_from_u16(0x2a6d);
    pub const TEMPERATURE: Uuid = bluetooth_uuid_from_u16(0x2a6e);
    pub const HUMIDITY: Uuid = bluetooth_uuid_from_u16(0x2a6f);
    pub const BAROMETRIC_PRESSURE_TREND: Uuid = bluetooth_uuid_from_u16(0x2aa3);
    pub const BOND_MANAGEMENT_CONTROL_POINT: Uuid = bluetooth_uuid_from_u16(0x2aa4);
    pub const CENTRAL_ADDRESS_RESOLUTION: Uuid = bluetooth_uuid_from_u16(0x2aa6);
    pub const CGM_MEASUREMENT: Uuid = bluetooth_uuid_from_u16(0x2aa7);
    pub const OBJECT_NAME: Uuid = bluetooth_uuid_from_u16(0x2abe);
    pub const MESH_PROVISIONING_DATA_IN: Uuid = bluetooth_uuid_from_u16(0x2adb);
    pub const MESH_PROVISIONING_DATA_OUT: Uuid = bluetooth_uuid_from_u16(0x2adc);
    pub const MESH_PROXY_DATA_IN: Uuid = bluetooth_uuid_from_u16(0x2add);
    pub const MESH_PROXY_DATA_OUT: Uuid = bluetooth_uuid_from_u16(0x2ade);
    pub const CLIENT_SUPPORTED_FEATURES: Uuid = bluetooth_uuid_from_u16(0x2b29);
    pub const DATABASE_HASH: Uuid = bluetooth_uuid_from_u16(0x2b2a);
    pub const SERVER_SUPPORTED_FEATURES: Uuid = bluetooth_uuid_from_u16(0x2b3a);
}

/// Bluetooth GATT Descriptor 16-bit UUIDs
pub mod descriptors {
    #![allow(missing_docs)]

    use uuid::Uuid;

    use super::bluetooth_uuid_from_u16;

    pub const CHARACTERISTIC_EXTENDED_PROPERTIES: Uuid = bluetooth_uuid_from_u16(0x2900);
    pub const CHARACTERISTIC_USER_DESCRIPTION: Uuid = bluetooth_uuid_from_u16(0x2901);
    pub const CLIENT_CHARACTERISTIC_CONFIGURATION: Uuid = bluetooth_uuid_from_u16(0x2902);
    pub const SERVER_CHARACTERISTIC_CONFIGURATION: Uuid = bluetooth_uuid_from_u16(0x2903);
    pub const CHARACTERISTIC_PRESENTATION_FORMAT: Uuid = bluetooth_uuid_from_u16(0x2904);
    pub const CHARACTERISTIC_AGGREGATE_FORMAT: Uuid = bluetooth_uuid_from_u16(0x2905);
    pub const VALID_RANGE: Uuid = bluetooth_uuid_from_u16(0x2906);
    pub const EXTERNAL_REPORT_REFERENCE: Uuid = bluetooth_uuid_from_u16(0x2907);
    pub const REPORT_REFERENCE: Uuid = bluetooth_uuid_from_u16(0x2908);
    pub const NUMBER_OF_DIGITALS: Uuid = bluetooth_uuid_from_u16(0x2909);
    pub const VALUE_TRIGGER_SETTING: Uuid = bluetooth_uuid_from_u16(0x290a);
    pub const ENVIRONMENTAL_SENSING_CONFIGURATION: Uuid = bluetooth_uuid_from_u16(0x290b);
    pub const ENVIRONMENTAL_SENSING_MEASUREMENT: Uuid = bluetooth_uuid_from_u16(0x290c);
    pub const ENVIRONMENTAL_SENSING_TRIGGER_SETTING: Uuid = bluetooth_uuid_from_u16(0x290d);
    pub const TIME_TRIGGER_SETTING: Uuid = bluetooth_uuid_from_u16(0x290e);
}

// Name tables are sorted by 16-bit alias for binary search.

static SERVICE_NAMES: &[(u16, &str)] = &[
    (0x1800, "Generic Access"),
    (0x1801, "Generic Attribute"),
    (0x1802, "Immediate Alert"),
    (0x1803, "Link Loss"),
    (0x1804, "Tx Power"),
    (0x1805, "Current Time Service"),
    (0x1806, "Reference Time Update Service"),
    (0x1807, "Next DST Change Service"),
    (0x1808, "Glucose"),
    (0x1809, "Health Thermometer"),
    (0x180a, "Device Information"),
    (0x180d, "Heart Rate"),
    (0x180e, "Phone Alert Status Service"),
    (0x180f, "Battery Service"),
    (0x1810, "Blood Pressure"),
    (0x1811, "Alert Notification Service"),
    (0x1812, "Human Interface Device"),
    (0x1813, "Scan Parameters"),
    (0x1814, "Running Speed and Cadence"),
    (0x1815, "Automation IO"),
    (0x1816, "Cycling Speed and Cadence"),
    (0x1818, "Cycling Power"),
    (0x1819, "Location and Navigation"),
    (0x181a, "Environmental Sensing"),
    (0x181b, "Body Composition"),
    (0x181c, "User Data"),
    (0x181d, "Weight Scale"),
    (0x181e, "Bond Management"),
    (0x181f, "Continuous Glucose Monitoring"),
    (0x1820, "Internet Protocol Support"),
    (0x1821, "Indoor Positioning"),
    (0x1822, "Pulse Oximeter"),
    (0x1823, "HTTP Proxy"),
    (0x1824, "Transport Discovery"),
    (0x1825, "Object Transfer"),
    (0x1826, "Fitness Machine"),
    (0x1827, "Mesh Provisioning"),
    (0x1828, "Mesh Proxy"),
    (0x1829, "Reconnection Configuration"),
    (0x183a, "Insulin Delivery"),
    (0x183b, "Binary Sensor"),
    (0x183c, "Emergency Configuration"),
    (0x183e, "Physical Activity Monitor"),
    (0x1843, "Audio Input Control"),
    (0x1844, "Volume Control"),
    (0x1845, "Volume Offset Control"),
    (0x1846, "Coordinated Set Identification"),
    (0x1847, "Device Time"),
    (0x1848, "Media Control"),
    (0x1849, "Generic Media Control"),
    (0x184b, "Telephone Bearer"),
    (0x184c, "Generic Telephone Bearer"),
    (0x184d, "Microphone Control"),
    (0x184e, "Audio Stream Control"),
    (0x184f, "Broadcast Audio Scan"),
    (0x1850, "Published Audio Capabilities"),
    (0x1851, "Basic Audio Announcement"),
    (0x1852, "Broadcast Audio Announcement"),
    (0x1853, "Common Audio"),
    (0x1854, "Hearing Access"),
    (0x1855, "Telephony and Media Audio"),
    (0x1856, "Public Broadcast Announcement"),
    (0x1857, "Electronic Shelf Label"),
];

static DECLARATION_NAMES: &[(u16, &str)] = &[
    (0x2800, "Primary Service"),
    (0x2801, "Secondary Service"),
    (0x2802, "Include"),
    (0x2803, "Characteristic"),
];

static DESCRIPTOR_NAMES: &[(u16, &str)] = &[
    (0x2900, "Characteristic Extended Properties"),
    (0x2901, "Characteristic User Description"),
    (0x2902, "Client Characteristic Configuration"),
    (0x2903, "Server Characteristic Configuration"),
    (0x2904, "Characteristic Presentation Format"),
    (0x2905, "Characteristic Aggregate Format"),
    (0x2906, "Valid Range"),
    (0x2907, "External Report Reference"),
    (0x2908, "Report Reference"),
    (0x2909, "Number of Digitals"),
    (0x290a, "Value Trigger Setting"),
    (0x290b, "Environmental Sensing Configuration"),
    (0x290c, "Environmental Sensing Measurement"),
    (0x290d, "Environmental Sensing Trigger Setting"),
    (0x290e, "Time Trigger Setting"),
];

static CHARACTERISTIC_NAMES: &[(u16, &str)] = &[
    (0x2a00, "Device Name"),
    (0x2a01, "Appearance"),
    (0x2a02, "Peripheral Privacy Flag"),
    (0x2a03, "Reconnection Address"),
    (0x2a04, "Peripheral Preferred Connection Parameters"),
    (0x2a05, "Service Changed"),
    (0x2a06, "Alert Level"),
    (0x2a07, "Tx Power Level"),
    (0x2a08, "Date Time"),
    (0x2a09, "Day of Week"),
    (0x2a0a, "Day Date Time"),
    (0x2a0c, "Exact Time 256"),
    (0x2a0d, "DST Offset"),
    (0x2a0e, "Time Zone"),
    (0x2a0f, "Local Time Information"),
    (0x2a11, "Time with DST"),
    (0x2a12, "Time Accuracy"),
    (0x2a13, "Time Source"),
    (0x2a14, "Reference Time Information"),
    (0x2a16, "Time Update Control Point"),
    (0x2a17, "Time Update State"),
    (0x2a18, "Glucose Measurement"),
    (0x2a19, "Battery Level"),
    (0x2a1c, "Temperature Measurement"),
    (0x2a1d, "Temperature Type"),
    (0x2a1e, "Intermediate Temperature"),
    (0x2a21, "Measurement Interval"),
    (0x2a22, "Boot Keyboard Input Report"),
    (0x2a23, "System ID"),
    (0x2a24, "Model Number String"),
    (0x2a25, "Serial Number String"),
    (0x2a26, "Firmware Revision String"),
    (0x2a27, "Hardware Revision String"),
    (0x2a28, "Software Revision String"),
    (0x2a29, "Manufacturer Name String"),
    (0x2a2a, "IEEE 11073-20601 Regulatory Certification Data List"),
    (0x2a2b, "Current Time"),
    (0x2a2c, "Magnetic Declination"),
    (0x2a31, "Scan Refresh"),
    (0x2a32, "Boot Keyboard Output Report"),
    (0x2a33, "Boot Mouse Input Report"),
    (0x2a34, "Glucose Measurement Context"),
    (0x2a35, "Blood Pressure Measurement"),
    (0x2a36, "Intermediate Cuff Pressure"),
    (0x2a37, "Heart Rate Measurement"),
    (0x2a38, "Body Sensor Location"),
    (0x2a39, "Heart Rate Control Point"),
    (0x2a3f, "Alert Status"),
    (0x2a40, "Ringer Control Point"),
    (0x2a41, "Ringer Setting"),
    (0x2a42, "Alert Category ID Bit Mask"),
    (0x2a43, "Alert Category ID"),
    (0x2a44, "Alert Notification Control Point"),
    (0x2a45, "Unread Alert Status"),
    (0x2a46, "New Alert"),
    (0x2a47, "Supported New Alert Category"),
    (0x2a48, "Supported Unread Alert Category"),
    (0x2a49, "Blood Pressure Feature"),
    (0x2a4a, "HID Information"),
    (0x2a4b, "Report Map"),
    (0x2a4c, "HID Control Point"),
    (0x2a4d, "Report"),
    (0x2a4e, "Protocol Mode"),
    (0x2a4f, "Scan Interval Window"),
    (0x2a50, "PnP ID"),
    (0x2a51, "Glucose Feature"),
    (0x2a52, "Record Access Control Point"),
    (0x2a53, "RSC Measurement"),
    (0x2a54, "RSC Feature"),
    (0x2a55, "SC Control Point"),
    (0x2a5b, "CSC Measurement"),
    (0x2a5c, "CSC Feature"),
    (0x2a5d, "Sensor Location"),
    (0x2a5e, "PLX Spot-Check Measurement"),
    (0x2a5f, "PLX Continuous Measurement"),
    (0x2a60, "PLX Features"),
    (0x2a63, "Cycling Power Measurement"),
    (0x2a64, "Cycling Power Vector"),
    (0x2a65, "Cycling Power Feature"),
    (0x2a66, "Cycling Power Control Point"),
    (0x2a67, "Location and Speed"),
    (0x2a68, "Navigation"),
    (0x2a69, "Position Quality"),
    (0x2a6a, "LN Feature"),
    (0x2a6b, "LN Control Point"),
    (0x2a6c, "Elevation"),
    (0x2a6d, "Pressure"),
    (0x2a6e, "Temperature"),
    (0x2a6f, "Humidity"),
    (0x2a70, "True Wind Speed"),
    (0x2a71, "True Wind Direction"),
    (0x2a72, "Apparent Wind Speed"),
    (0x2a73, "Apparent Wind Direction"),
    (0x2a74, "Gust Factor"),
    (0x2a75, "Pollen Concentration"),
    (0x2a76, "UV Index"),
    (0x2a77, "Irradiance"),
    (0x2a78, "Rainfall"),
    (0x2a79, "Wind Chill"),
    (0x2a7a, "Heat Index"),
    (0x2a7b, "Dew Point"),
    (0x2a7d, "Descriptor Value Changed"),
    (0x2a7e, "Aerobic Heart Rate Lower Limit"),
    (0x2a7f, "Aerobic Threshold"),
    (0x2a80, "Age"),
    (0x2a81, "Anaerobic Heart Rate Lower Limit"),
    (0x2a82, "Anaerobic Heart Rate Upper Limit"),
    (0x2a83, "Anaerobic Threshold"),
    (0x2a84, "Aerobic Heart Rate Upper Limit"),
    (0x2a85, "Date of Birth"),
    (0x2a86, "Date of Threshold Assessment"),
    (0x2a87, "Email Address"),
    (0x2a88, "Fat Burn Heart Rate Lower Limit"),
    (0x2a89, "Fat Burn Heart Rate Upper Limit"),
    (0x2a8a, "First Name"),
    (0x2a8b, "Five Zone Heart Rate Limits"),
    (0x2a8c, "Gender"),
    (0x2a8d, "Heart Rate Max"),
    (0x2a8e, "Height"),
    (0x2a8f, "Hip Circumference"),
    (0x2a90, "Last Name"),
    (0x2a91, "Maximum Recommended Heart Rate"),
    (0x2a92, "Resting Heart Rate"),
    (0x2a93, "Sport Type for Aerobic and Anaerobic Thresholds"),
    (0x2a94, "Three Zone Heart Rate Limits"),
    (0x2a95, "Two Zone Heart Rate Limits"),
    (0x2a96, "VO2 Max"),
    (0x2a97, "Waist Circumference"),
    (0x2a98, "Weight"),
    (0x2a99, "Database Change Increment"),
    (0x2a9a, "User Index"),
    (0x2a9b, "Body Composition Feature"),
    (0x2a9c, "Body Composition Measurement"),
    (0x2a9d, "Weight Measurement"),
    (0x2a9e, "Weight Scale Feature"),
    (0x2a9f, "User Control Point"),
    (0x2aa0, "Magnetic Flux Density - 2D"),
    (0x2aa1, "Magnetic Flux Density - 3D"),
    (0x2aa2, "Language"),
    (0x2aa3, "Barometric Pressure Trend"),
    (0x2aa4, "Bond Management Control Point"),
    (0x2aa5, "Bond Management Feature"),
    (0x2aa6, "Central Address Resolution"),
    (0x2aa7, "CGM Measurement"),
    (0x2aa8, "CGM Feature"),
    (0x2aa9, "CGM Status"),
    (0x2aaa, "CGM Session Start Time"),
    (0x2aab, "CGM Session Run Time"),
    (0x2aac, "CGM Specific Ops Control Point"),
    (0x2aad, "Indoor Positioning Configuration"),
    (0x2aae, "Latitude"),
    (0x2aaf, "Longitude"),
    (0x2ab0, "Local North Coordinate"),
    (0x2ab1, "Local East Coordinate"),
    (0x2ab2, "Floor Number"),
    (0x2ab3, "Altitude"),
    (0x2ab4, "Uncertainty"),
    (0x2ab5, "Location Name"),
    (0x2ab6, "URI"),
    (0x2ab7, "HTTP Headers"),
    (0x2ab8, "HTTP Status Code"),
    (0x2ab9, "HTTP Entity Body"),
    (0x2aba, "HTTP Control Point"),
    (0x2abb, "HTTPS Security"),
    (0x2abc, "TDS Control Point"),
    (0x2abd, "OTS Feature"),
    (0x2abe, "Object Name"),
    (0x2abf, "Object Type"),
    (0x2ac0, "Object Size"),
    (0x2ac1, "Object First-Created"),
    (0x2ac2, "Object Last-Modified"),
    (0x2ac3, "Object ID"),
    (0x2ac4, "Object Properties"),
    (0x2ac5, "Object Action Control Point"),
    (0x2ac6, "Object List Control Point"),
    (0x2ac7, "Object List Filter"),
    (0x2ac8, "Object Changed"),
    (0x2adb, "Mesh Provisioning Data In"),
    (0x2adc, "Mesh Provisioning Data Out"),
    (0x2add, "Mesh Proxy Data In"),
    (0x2ade, "Mesh Proxy Data Out"),
    (0x2b29, "Client Supported Features"),
    (0x2b2a, "Database Hash"),
    (0x2b3a, "Server Supported Features"),
];

static UNIT_NAMES: &[(u16, &str)] = &[
    (0x2700, "unitless"),
    (0x2701, "length (metre)"),
    (0x2702, "mass (kilogram)"),
    (0x2703, "time (second)"),
    (0x2704, "electric current (ampere)"),
    (0x2705, "thermodynamic temperature (kelvin)"),
    (0x2727, "electric resistance (ohm)"),
    (0x272f, "Celsius temperature (degree Celsius)"),
];

static COMPANIES: &[(u16, &str)] = &[
    (0x0000, "Ericsson Technology Licensing"),
    (0x0001, "Nokia Mobile Phones"),
    (0x0002, "Intel Corp."),
    (0x0003, "IBM Corp."),
    (0x0004, "Toshiba Corp."),
    (0x0005, "3Com"),
    (0x0006, "Microsoft"),
    (0x0007, "Lucent"),
    (0x0008, "Motorola"),
    (0x0009, "Infineon Technologies AG"),
    (0x000a, "Cambridge Silicon Radio"),
    (0x000b, "Silicon Wave"),
    (0x000c, "Digianswer A/S"),
    (0x000d, "Texas Instruments Inc."),
    (0x000f, "Broadcom Corporation"),
    (0x0010, "Mitel Semiconductor"),
    (0x0011, "Widcomm, Inc."),
    (0x0013, "Atmel Corporation"),
    (0x0014, "Mitsubishi Electric Corporation"),
    (0x0015, "RTX Telecom A/S"),
    (0x0019, "Rohde & Schwarz GmbH & Co. KG"),
    (0x001d, "Qualcomm"),
    (0x0022, "NEC Corporation"),
    (0x0025, "NXP Semiconductors"),
    (0x0029, "Hitachi Ltd"),
    (0x002a, "Symbol Technologies, Inc."),
    (0x0030, "ST Microelectronics"),
    (0x0036, "Renesas Technology Corp."),
    (0x004c, "Apple, Inc."),
    (0x0056, "Sony Ericsson Mobile Communications"),
    (0x0057, "Harman International Industries, Inc."),
    (0x0059, "Nordic Semiconductor ASA"),
    (0x0065, "Hewlett-Packard Company"),
    (0x006b, "Polar Electro Oy"),
    (0x0075, "Samsung Electronics Co. Ltd."),
    (0x0078, "Nike, Inc."),
    (0x0087, "Garmin International, Inc."),
    (0x008a, "Jawbone"),
    (0x00c4, "LG Electronics"),
    (0x00d2, "Dialog Semiconductor B.V."),
    (0x00e0, "Google"),
    (0x0117, "Fitbit, Inc."),
    (0x0131, "Cypress Semiconductor"),
    (0x0157, "Anhui Huami Information Technology Co., Ltd."),
    (0x015d, "Estimote, Inc."),
    (0x0171, "Amazon Fulfillment Service"),
    (0x01da, "Logitech International SA"),
    (0x02e5, "Espressif Incorporated"),
    (0x038f, "Xiaomi Inc."),
    (0x0499, "Ruuvi Innovations Ltd."),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_form_is_fixed_point() {
        let uuid = parse_uuid("00002a24-0000-1000-8000-00805f9b34fb").unwrap();
        assert_eq!(parse_uuid(&uuid.to_string()).unwrap(), uuid);
    }

    #[test]
    fn sixteen_bit_expansion() {
        let uuid = parse_uuid("2a24").unwrap();
        assert_eq!(uuid.to_string(), "00002a24-0000-1000-8000-00805f9b34fb");
        assert_eq!(uuid, characteristics::MODEL_NUMBER_STRING);
        assert_eq!(uuid.try_to_u16(), Some(0x2a24));
    }

    #[test]
    fn thirty_two_bit_expansion() {
        let uuid = parse_uuid("12345678").unwrap();
        assert_eq!(uuid.to_string(), "12345678-0000-1000-8000-00805f9b34fb");
        assert_eq!(uuid.try_to_u16(), None);
        assert_eq!(uuid.try_to_u32(), Some(0x12345678));
    }

    #[test]
    fn parsing_is_case_insensitive() {
        let lower = parse_uuid("6e400001-b5a3-f393-e0a9-e50e24dcca9e").unwrap();
        let upper = parse_uuid("6E400001-B5A3-F393-E0A9-E50E24DCCA9E").unwrap();
        assert_eq!(lower, upper);
    }

    #[test]
    fn rejects_malformed() {
        assert!(parse_uuid("180").is_err());
        assert!(parse_uuid("xyzw").is_err());
        assert!(parse_uuid("not-a-uuid").is_err());
    }

    #[test]
    fn bluetooth_bytes() {
        assert_eq!(services::HEART_RATE.as_bluetooth_bytes(), &[0x18, 0x0d]);
        let full = Uuid::parse_str("6e400001-b5a3-f393-e0a9-e50e24dcca9e").unwrap();
        assert_eq!(full.as_bluetooth_bytes().len(), 16);
    }

    #[test]
    fn assigned_number_descriptions() {
        assert_eq!(description(services::BATTERY).as_deref(), Some("Battery Service"));
        assert_eq!(description(characteristics::DEVICE_NAME).as_deref(), Some("Device Name"));
        assert_eq!(
            description(descriptors::CLIENT_CHARACTERISTIC_CONFIGURATION).as_deref(),
            Some("Client Characteristic Configuration")
        );
        assert_eq!(
            description(Uuid::parse_str("6e400001-b5a3-f393-e0a9-e50e24dcca9e").unwrap()),
            None
        );
    }

    #[test]
    fn registered_descriptions_take_precedence() {
        let uuid = Uuid::parse_str("6e400002-b5a3-f393-e0a9-e50e24dcca9e").unwrap();
        register_uuids([(uuid, "Nordic UART RX".to_string())]);
        assert_eq!(description(uuid).as_deref(), Some("Nordic UART RX"));
    }

    #[test]
    fn company_names() {
        assert_eq!(company_name(0x004c), Some("Apple, Inc."));
        assert_eq!(company_name(0x0059), Some("Nordic Semiconductor ASA"));
        assert_eq!(company_name(0xfffe), None);
    }
}
