//! The contract between the platform-neutral core and the per-OS adapters.
//!
//! Every OS backend implements [`Backend`] (scanning, connecting) and
//! [`Connection`] (GATT traffic on one established link). The scanner and
//! client cores are written exclusively against these traits; the mock
//! backend implements them in-process for hardware-free testing.
//!
//! Backends marshal native callbacks into the event channels handed to
//! `scan_start` and `connect`. They never invoke user code, never merge
//! advertisements (the scanner core owns that), never cache discovered
//! services across connections unless `use_cached` asks for it, and never
//! retry transport errors silently — with two documented exceptions handled
//! inside the BlueZ and WinRT adapters: transient `InProgress` responses and
//! "object closed"/connection-abort races during connection establishment.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{AdvertisementData, CharacteristicProperties, DeviceId, Result, ScanningMode, WriteKind};

/// Scan parameters passed through to the OS.
///
/// Backends whose OS API cannot filter by service UUID may deliver unfiltered
/// events; the scanner core re-applies the filter in-process.
#[derive(Debug, Clone, Default)]
pub struct ScanFilter {
    pub service_uuids: Vec<Uuid>,
    pub mode: ScanningMode,
    /// Ask the OS to deliver repeated advertisements carrying identical data
    /// (BlueZ discovery-filter passthrough; advisory elsewhere).
    pub duplicate_data: bool,
}

/// A single advertisement event as reported by the OS, pre-merge.
#[derive(Debug, Clone)]
pub struct ScanEvent {
    pub id: DeviceId,
    /// OS-assigned device name, when it differs from the advertised name.
    pub os_name: Option<String>,
    pub advertisement: AdvertisementData,
    pub rssi: i16,
}

/// Events emitted by a [`Connection`] after it has been established.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A notification or indication carrying a new characteristic value.
    Notification { handle: u16, value: Vec<u8> },
    /// The link dropped, whether peripheral-initiated or requested locally.
    /// Emitted exactly once per connection.
    Disconnected,
}

/// Which peripheral-initiated value push mechanism a subscription uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    Notify,
    Indicate,
}

/// Per-connection options forwarded from [`ClientConfig`][crate::ClientConfig].
#[derive(Clone, Default)]
pub struct ConnectOptions {
    /// Accept the OS's cached attribute table without re-resolving services.
    pub use_cached_services: bool,
    /// Distinguishes notification payloads from read responses on backends
    /// whose OS conflates the two into a single value-update event
    /// (CoreBluetooth). Ignored elsewhere.
    pub notification_discriminator: Option<NotificationDiscriminator>,
}

/// Predicate deciding whether a conflated value-update event is a
/// notification (`true`) or the completion of an outstanding read (`false`).
pub type NotificationDiscriminator = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("use_cached_services", &self.use_cached_services)
            .field(
                "notification_discriminator",
                &self.notification_discriminator.as_ref().map(|_| ".."),
            )
            .finish()
    }
}

/// A GATT descriptor as reported by service discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDescriptor {
    pub handle: u16,
    pub uuid: Uuid,
}

/// A GATT characteristic as reported by service discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCharacteristic {
    pub handle: u16,
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
    pub descriptors: Vec<RawDescriptor>,
}

/// A GATT service as reported by service discovery.
///
/// Handles are unique within one connection. On platforms that do not expose
/// ATT handles (CoreBluetooth) the backend synthesizes them in discovery
/// order; they remain valid lookup keys for the lifetime of the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawService {
    pub handle: u16,
    pub uuid: Uuid,
    pub primary: bool,
    pub characteristics: Vec<RawCharacteristic>,
}

/// One OS adapter: scanning plus connection establishment.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Starts scanning, delivering every advertisement event to `events`.
    ///
    /// The backend owns the sender until [`scan_stop`][Backend::scan_stop];
    /// dropping it signals the end of the event stream.
    async fn scan_start(&self, filter: ScanFilter, events: mpsc::UnboundedSender<ScanEvent>) -> Result<()>;

    /// Stops an active scan. Must succeed when no scan is active.
    async fn scan_stop(&self) -> Result<()>;

    /// Establishes a connection to the peripheral identified by `id`.
    ///
    /// `events` receives notifications and the final `Disconnected` event;
    /// both are sent from the backend's own tasks, never from OS callback
    /// threads holding OS locks. `timeout` bounds the OS-level connection
    /// attempt where the OS accepts one.
    async fn connect(
        &self,
        id: &DeviceId,
        timeout: Duration,
        events: mpsc::UnboundedSender<ConnectionEvent>,
        options: &ConnectOptions,
    ) -> Result<Box<dyn Connection>>;

    /// A short name for the backend, used in log messages.
    fn kind(&self) -> &'static str;
}

/// GATT operations on one established connection to one peripheral.
///
/// All methods are raw pass-throughs: property checks, UUID resolution,
/// request serialization, and size limits are enforced by the client core
/// before a handle reaches the backend.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Resolves the peripheral's attribute database.
    ///
    /// With `use_cached` the backend may return the OS's cached table without
    /// a fresh resolution; the cache can be stale if the peripheral changed
    /// its database since it was last seen.
    async fn discover_services(&self, use_cached: bool) -> Result<Vec<RawService>>;

    async fn read(&self, handle: u16) -> Result<Vec<u8>>;

    async fn write(&self, handle: u16, value: &[u8], kind: WriteKind) -> Result<()>;

    async fn read_descriptor(&self, handle: u16) -> Result<Vec<u8>>;

    async fn write_descriptor(&self, handle: u16, value: &[u8]) -> Result<()>;

    /// Enables value pushes for the characteristic at `handle`. Values arrive
    /// as [`ConnectionEvent::Notification`] on the connection event channel.
    async fn subscribe(&self, handle: u16, kind: SubscriptionKind) -> Result<()>;

    async fn unsubscribe(&self, handle: u16) -> Result<()>;

    /// The negotiated ATT MTU for this connection.
    async fn mtu(&self) -> Result<u16>;

    async fn pair(&self) -> Result<()>;

    async fn unpair(&self) -> Result<()>;

    /// Closes the link. The backend still emits `Disconnected` on the event
    /// channel; callers wait for that event to observe full teardown.
    async fn disconnect(&self) -> Result<()>;

    /// How long an orderly disconnect may take before the client gives up.
    fn disconnect_timeout(&self) -> Duration {
        Duration::from_secs(10)
    }
}
