//! Devices discovered while scanning.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::backend::Backend;
use crate::{AdvertisementData, DeviceId};

/// A peripheral seen while scanning.
///
/// Snapshots of the scanner's per-device record: the advertisement carries
/// everything merged for the device so far within the current scan session.
/// Pass a `DiscoveredDevice` to [`Client::new`][crate::Client::new] to
/// connect to it.
#[derive(Clone)]
pub struct DiscoveredDevice {
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) id: DeviceId,
    pub(crate) os_name: Option<String>,
    pub(crate) advertisement: AdvertisementData,
    pub(crate) rssi: i16,
    pub(crate) first_seen: Instant,
    pub(crate) last_seen: Instant,
}

impl DiscoveredDevice {
    /// The platform identity of this device.
    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// The device name: the advertised local name when one was received,
    /// otherwise the name the OS has on record for the device.
    pub fn local_name(&self) -> Option<&str> {
        self.advertisement
            .local_name
            .as_deref()
            .or(self.os_name.as_deref())
    }

    /// All advertisement data merged for this device in the current scan
    /// session.
    pub fn advertisement(&self) -> &AdvertisementData {
        &self.advertisement
    }

    /// The signal strength of the most recent advertisement, in dBm.
    pub fn rssi(&self) -> i16 {
        self.rssi
    }

    /// When the first advertisement for this device arrived.
    pub fn first_seen(&self) -> Instant {
        self.first_seen
    }

    /// When the most recent advertisement for this device arrived.
    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }
}

impl fmt::Debug for DiscoveredDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveredDevice")
            .field("id", &self.id)
            .field("local_name", &self.local_name())
            .field("rssi", &self.rssi)
            .finish()
    }
}

impl fmt::Display for DiscoveredDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.local_name().unwrap_or("(Unknown)"))
    }
}
