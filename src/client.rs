//! The GATT client: connection lifecycle and attribute I/O for one
//! peripheral.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::backend::{Backend, ConnectOptions, Connection, ConnectionEvent, NotificationDiscriminator, SubscriptionKind};
use crate::error::ErrorKind;
use crate::gatt::{CharSpec, Characteristic, ServiceCollection};
use crate::scanner::{ScanConfig, Scanner};
use crate::util::{defer, event_log};
use crate::{btuuid, ConnectionState, DeviceId, DiscoveredDevice, Error, Result, WriteKind};

/// The ATT MTU every connection starts from before negotiation.
const ATT_DEFAULT_MTU: u16 = 23;

/// How long to scan when resolving a raw identity passed to
/// [`Client::from_id`].
const RESOLVE_SCAN_TIMEOUT: Duration = Duration::from_secs(10);

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Receives `(characteristic, value)` for every notification or indication
/// on a subscribed characteristic. Invoked on the client's own task, never
/// on an OS callback thread.
pub type NotifyCallback = Box<dyn FnMut(&Characteristic, &[u8]) + Send + 'static>;

/// Invoked exactly once per connection when the client transitions into
/// `Disconnected`, whatever the cause.
pub type DisconnectedCallback = Box<dyn FnMut() + Send + 'static>;

/// Configuration for a [`Client`].
#[derive(Clone)]
pub struct ClientConfig {
    connect_timeout: Duration,
    operation_timeout: Option<Duration>,
    disconnect_timeout: Option<Duration>,
    use_cached_services: bool,
    notification_discriminator: Option<NotificationDiscriminator>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            operation_timeout: None,
            disconnect_timeout: None,
            use_cached_services: false,
            notification_discriminator: None,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        ClientConfig::default()
    }

    /// Bounds the connection attempt, including service discovery.
    /// Defaults to 10 seconds.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Applies `timeout` to every GATT operation. By default operations do
    /// not time out: once connected, the peripheral is trusted to respond.
    ///
    /// Individual awaits may also be wrapped in `tokio::time::timeout`; all
    /// operations are cancel-safe in the sense of §cancellation — the OS
    /// request may still take effect after the future is dropped.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    /// Overrides how long an orderly disconnect may take. The default comes
    /// from the backend (120 seconds on Windows, 10 seconds elsewhere).
    pub fn with_disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.disconnect_timeout = Some(timeout);
        self
    }

    /// Accept the OS's cached attribute table on connect instead of
    /// re-resolving services.
    ///
    /// This is advisory and dangerous: the cache may be stale if the
    /// peripheral's attribute database changed since the OS last saw it, and
    /// handle-based operations will then address the wrong attributes.
    pub fn dangerous_use_bleak_cache(mut self, use_cached: bool) -> Self {
        self.use_cached_services = use_cached;
        self
    }

    /// Distinguishes notification payloads from read responses on platforms
    /// whose OS conflates both into a single value-update event
    /// (CoreBluetooth). The predicate returns `true` for payloads that are
    /// notifications.
    ///
    /// Without a discriminator, a value update that arrives while a read is
    /// outstanding on the same characteristic completes the read; this is
    /// platform-dependent behavior on CoreBluetooth only. Other backends
    /// ignore the option.
    pub fn with_notification_discriminator(
        mut self,
        discriminator: impl Fn(&[u8]) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.notification_discriminator = Some(Arc::new(discriminator));
        self
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("connect_timeout", &self.connect_timeout)
            .field("operation_timeout", &self.operation_timeout)
            .field("disconnect_timeout", &self.disconnect_timeout)
            .field("use_cached_services", &self.use_cached_services)
            .finish()
    }
}

/// State shared between the client and its connection event pump.
struct Inner {
    state: Mutex<State>,
    subscriptions: Mutex<HashMap<u16, SubscriptionEntry>>,
    disconnected_callback: Mutex<Option<DisconnectedCallback>>,
    generation: AtomicU64,
}

struct State {
    phase: ConnectionState,
    link: Option<Link>,
}

type SubscriptionEntry = Arc<Mutex<NotifyCallback>>;

/// Everything tied to one established connection.
#[derive(Clone)]
struct Link {
    conn: Arc<dyn Connection>,
    services: Arc<ServiceCollection>,
    mtu: u16,
    /// Flips to `false` when the connection is torn down.
    alive: watch::Receiver<bool>,
    /// Per-characteristic-handle locks serializing requests so a second
    /// operation never interleaves with an outstanding request/response
    /// exchange on the same characteristic.
    char_locks: Arc<Mutex<HashMap<u16, Arc<tokio::sync::Mutex<()>>>>>,
}

impl Link {
    fn char_lock(&self, handle: u16) -> Arc<tokio::sync::Mutex<()>> {
        self.char_locks
            .lock()
            .unwrap()
            .entry(handle)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

/// A GATT client for a single peripheral.
///
/// One client owns at most one OS-level connection. A disconnected client —
/// whether the user called [`disconnect`][Client::disconnect] or the
/// peripheral dropped the link — can be reconnected with
/// [`connect`][Client::connect]; attribute objects from the previous
/// connection are then stale and rejected.
pub struct Client {
    backend: Arc<dyn Backend>,
    id: DeviceId,
    config: ClientConfig,
    inner: Arc<Inner>,
}

impl Client {
    /// Creates a client for a device found while scanning.
    pub fn new(device: &DiscoveredDevice) -> Self {
        Self::with_config(device, ClientConfig::default())
    }

    /// Creates a client for a device found while scanning, with explicit
    /// configuration.
    pub fn with_config(device: &DiscoveredDevice, config: ClientConfig) -> Self {
        Self::from_parts(device.backend.clone(), device.id(), config)
    }

    /// Creates a client from a raw identity, scanning (bounded to 10
    /// seconds) to locate the device.
    ///
    /// On Apple platforms this scan is mandatory: the OS only hands out
    /// peripheral objects for devices it has seen advertise.
    pub async fn from_id(id: DeviceId, config: ClientConfig) -> Result<Self> {
        let backend = crate::platform_backend().await?;
        Self::from_id_with_backend(backend, id, config).await
    }

    /// Creates a client from a textual identity: a Bluetooth address
    /// (`24:71:89:CC:09:05`) or, on Apple platforms, the host-local device
    /// UUID. Scans to locate the device like [`Client::from_id`].
    pub async fn from_address(address: &str, config: ClientConfig) -> Result<Self> {
        Self::from_id(address.parse()?, config).await
    }

    /// Like [`Client::from_id`], but on an explicit backend, e.g. the
    /// [mock backend][crate::mock] in tests.
    pub async fn from_id_with_backend(backend: Arc<dyn Backend>, id: DeviceId, config: ClientConfig) -> Result<Self> {
        let mut scanner = Scanner::with_backend(backend.clone(), ScanConfig::new());
        match scanner.find_device_by_id(id, RESOLVE_SCAN_TIMEOUT).await? {
            Some(_) => Ok(Self::from_parts(backend, id, config)),
            None => Err(Error::message(
                ErrorKind::DeviceNotFound,
                format!("device {id} was not seen advertising"),
            )),
        }
    }

    fn from_parts(backend: Arc<dyn Backend>, id: DeviceId, config: ClientConfig) -> Self {
        Client {
            backend,
            id,
            config,
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    phase: ConnectionState::Disconnected,
                    link: None,
                }),
                subscriptions: Mutex::new(HashMap::new()),
                disconnected_callback: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// The identity of the peripheral this client talks to.
    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// The current phase of the connection state machine.
    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().unwrap().phase
    }

    /// Whether the client currently holds an established connection.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Sets (or clears) the callback fired exactly once per connection when
    /// the client becomes disconnected, whatever the cause.
    pub fn set_disconnected_callback(&self, callback: Option<impl FnMut() + Send + 'static>) {
        *self.inner.disconnected_callback.lock().unwrap() =
            callback.map(|callback| Box::new(callback) as DisconnectedCallback);
    }

    /// Connects to the peripheral and resolves its attribute database.
    ///
    /// The client is `Connected` — and GATT operations become available —
    /// only after all primary services, their characteristics, and their
    /// descriptors have been resolved. The whole sequence is bounded by the
    /// configured connect timeout.
    pub async fn connect(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock().unwrap();
            match state.phase {
                ConnectionState::Disconnected => state.phase = ConnectionState::Connecting,
                _ => {
                    return Err(Error::message(
                        ErrorKind::InvalidParameter,
                        "connect() requires a disconnected client",
                    ))
                }
            }
        }
        let rollback = defer(|| {
            let mut state = self.inner.state.lock().unwrap();
            if state.phase == ConnectionState::Connecting {
                state.phase = ConnectionState::Disconnected;
            }
        });

        let options = ConnectOptions {
            use_cached_services: self.config.use_cached_services,
            notification_discriminator: self.config.notification_discriminator.clone(),
        };
        let (tx, rx) = mpsc::unbounded_channel();

        debug!(id = %self.id, backend = self.backend.kind(), "connecting");
        let conn = tokio::time::timeout(
            self.config.connect_timeout,
            self.backend.connect(&self.id, self.config.connect_timeout, tx, &options),
        )
        .await
        .map_err(|_| Error::message(ErrorKind::Timeout, format!("connecting to {} timed out", self.id)))??;
        let conn: Arc<dyn Connection> = Arc::from(conn);

        let resolved = async {
            let raw = conn.discover_services(self.config.use_cached_services).await?;
            let mtu = match conn.mtu().await {
                Ok(mtu) => mtu,
                Err(err) => {
                    warn!(id = %self.id, %err, "MTU query failed, assuming ATT default");
                    ATT_DEFAULT_MTU
                }
            };
            let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
            let services = Arc::new(ServiceCollection::build(raw, mtu, generation)?);
            Ok::<_, Error>((services, mtu))
        }
        .await;

        let (services, mtu) = match resolved {
            Ok(resolved) => resolved,
            Err(err) => {
                let _ = conn.disconnect().await;
                return Err(err);
            }
        };

        let (alive_tx, alive_rx) = watch::channel(true);
        tokio::spawn(pump(rx, self.inner.clone(), services.clone(), alive_tx));

        let raced = {
            let mut state = self.inner.state.lock().unwrap();
            if state.phase != ConnectionState::Connecting {
                // disconnect() raced the tail of the connection attempt
                state.phase = ConnectionState::Disconnected;
                true
            } else {
                state.phase = ConnectionState::Connected;
                state.link = Some(Link {
                    conn: conn.clone(),
                    services,
                    mtu,
                    alive: alive_rx,
                    char_locks: Arc::new(Mutex::new(HashMap::new())),
                });
                false
            }
        };
        if raced {
            let _ = conn.disconnect().await;
            rollback.defuse();
            return Err(Error::message(ErrorKind::Cancelled, "connection attempt was cancelled"));
        }
        rollback.defuse();
        debug!(id = %self.id, mtu, "connected");
        Ok(())
    }

    /// Disconnects from the peripheral.
    ///
    /// Idempotent: succeeds immediately when already disconnected. Completes
    /// once the link is fully torn down (and the disconnect callback has
    /// fired), bounded by the backend's disconnect timeout.
    pub async fn disconnect(&self) -> Result<()> {
        let link = {
            let mut state = self.inner.state.lock().unwrap();
            if state.phase == ConnectionState::Disconnected {
                return Ok(());
            }
            state.phase = ConnectionState::Disconnecting;
            state.link.clone()
        };
        let Some(link) = link else {
            // A connection attempt is in flight; it observes the phase
            // change and abandons the connection itself.
            return Ok(());
        };

        let timeout = self
            .config
            .disconnect_timeout
            .unwrap_or_else(|| link.conn.disconnect_timeout());
        let mut alive = link.alive.clone();
        tokio::time::timeout(timeout, async {
            link.conn.disconnect().await?;
            let _ = alive.wait_for(|alive| !alive).await;
            Ok::<_, Error>(())
        })
        .await
        .map_err(|_| Error::message(ErrorKind::Timeout, format!("disconnecting from {} timed out", self.id)))?
    }

    /// The attribute database resolved for the current connection.
    pub fn services(&self) -> Result<Arc<ServiceCollection>> {
        Ok(self.link()?.services)
    }

    /// The negotiated ATT MTU of the current connection.
    pub fn mtu_size(&self) -> Result<u16> {
        Ok(self.link()?.mtu)
    }

    /// Reads the value of a characteristic.
    pub async fn read_gatt_char(&self, spec: impl Into<CharSpec>) -> Result<Vec<u8>> {
        let link = self.link()?;
        let characteristic = link.services.get_characteristic(spec)?.clone();
        if !characteristic.properties().read {
            return Err(Error::message(
                ErrorKind::NotSupported,
                format!("characteristic {} does not support reading", characteristic.uuid()),
            ));
        }

        let serialize = link.char_lock(characteristic.handle());
        let _serialized = serialize.lock().await;
        event_log!(id = %self.id, handle = characteristic.handle(), "read");
        self.guarded(&link, link.conn.read(characteristic.handle())).await
    }

    /// Writes the value of a characteristic.
    ///
    /// When the characteristic supports both write modes, `response` selects
    /// between them. When it supports only one, that one is used and a
    /// warning is logged if the caller asked for the other. Writes without
    /// response larger than [`max_write_without_response_size`]
    /// [Characteristic::max_write_without_response_size] fail with
    /// [`ErrorKind::DataTooLong`]; writes with response of any length are
    /// fragmented by the OS.
    pub async fn write_gatt_char(&self, spec: impl Into<CharSpec>, data: &[u8], response: bool) -> Result<()> {
        let link = self.link()?;
        let characteristic = link.services.get_characteristic(spec)?.clone();
        let props = characteristic.properties();

        let kind = match (response, props.write, props.write_without_response) {
            (true, true, _) => WriteKind::WithResponse,
            (false, _, true) => WriteKind::WithoutResponse,
            (true, false, true) => {
                warn!(
                    characteristic = %characteristic.uuid(),
                    "write with response requested, but only write without response is supported"
                );
                WriteKind::WithoutResponse
            }
            (false, true, false) => {
                warn!(
                    characteristic = %characteristic.uuid(),
                    "write without response requested, but only write with response is supported"
                );
                WriteKind::WithResponse
            }
            (_, false, false) => {
                return Err(Error::message(
                    ErrorKind::NotSupported,
                    format!("characteristic {} does not support writing", characteristic.uuid()),
                ))
            }
        };

        if kind == WriteKind::WithoutResponse && data.len() > characteristic.max_write_without_response_size() {
            return Err(Error::message(
                ErrorKind::DataTooLong,
                format!(
                    "{} bytes exceed the {}-byte limit for writes without response",
                    data.len(),
                    characteristic.max_write_without_response_size()
                ),
            ));
        }

        let serialize = link.char_lock(characteristic.handle());
        let _serialized = serialize.lock().await;
        event_log!(id = %self.id, handle = characteristic.handle(), len = data.len(), ?kind, "write");
        self.guarded(&link, link.conn.write(characteristic.handle(), data, kind)).await
    }

    /// Subscribes to value pushes from a characteristic.
    ///
    /// Notification is used when the characteristic supports it; for
    /// indicate-only characteristics, indication is selected transparently.
    /// At most one subscription may be active per characteristic.
    pub async fn start_notify(
        &self,
        spec: impl Into<CharSpec>,
        callback: impl FnMut(&Characteristic, &[u8]) + Send + 'static,
    ) -> Result<()> {
        let link = self.link()?;
        let characteristic = link.services.get_characteristic(spec)?.clone();
        let props = characteristic.properties();
        let kind = if props.notify {
            SubscriptionKind::Notify
        } else if props.indicate {
            SubscriptionKind::Indicate
        } else {
            return Err(Error::message(
                ErrorKind::NotSupported,
                format!(
                    "characteristic {} supports neither notifications nor indications",
                    characteristic.uuid()
                ),
            ));
        };

        let handle = characteristic.handle();
        {
            let mut subscriptions = self.inner.subscriptions.lock().unwrap();
            if subscriptions.contains_key(&handle) {
                return Err(Error::message(
                    ErrorKind::InvalidParameter,
                    format!("notifications are already enabled on characteristic {}", characteristic.uuid()),
                ));
            }
            // Registered before the OS subscription so the first value push
            // cannot slip through; removed again if the subscription fails.
            subscriptions.insert(handle, Arc::new(Mutex::new(Box::new(callback) as NotifyCallback)));
        }
        let unregister = defer(|| {
            self.inner.subscriptions.lock().unwrap().remove(&handle);
        });

        let serialize = link.char_lock(handle);
        let _serialized = serialize.lock().await;
        event_log!(id = %self.id, handle, ?kind, "subscribe");
        self.guarded(&link, link.conn.subscribe(handle, kind)).await?;
        unregister.defuse();
        Ok(())
    }

    /// Tears down the subscription on a characteristic.
    ///
    /// After this method returns, the callback passed to
    /// [`start_notify`][Client::start_notify] is not invoked again.
    pub async fn stop_notify(&self, spec: impl Into<CharSpec>) -> Result<()> {
        let link = self.link()?;
        let characteristic = link.services.get_characteristic(spec)?.clone();
        let handle = characteristic.handle();

        if self.inner.subscriptions.lock().unwrap().remove(&handle).is_none() {
            return Err(Error::message(
                ErrorKind::NotSubscribed,
                format!("notifications are not enabled on characteristic {}", characteristic.uuid()),
            ));
        }

        let serialize = link.char_lock(handle);
        let _serialized = serialize.lock().await;
        event_log!(id = %self.id, handle, "unsubscribe");
        self.guarded(&link, link.conn.unsubscribe(handle)).await
    }

    /// Reads the value of a descriptor by its attribute handle.
    pub async fn read_gatt_descriptor(&self, handle: u16) -> Result<Vec<u8>> {
        let link = self.link()?;
        let descriptor = link.services.get_descriptor(handle)?.clone();

        let serialize = link.char_lock(descriptor.characteristic_handle());
        let _serialized = serialize.lock().await;
        event_log!(id = %self.id, handle, "read descriptor");
        self.guarded(&link, link.conn.read_descriptor(handle)).await
    }

    /// Writes the value of a descriptor by its attribute handle.
    ///
    /// Writing the Client Characteristic Configuration Descriptor directly
    /// is rejected: subscription state is managed exclusively through
    /// [`start_notify`][Client::start_notify] and
    /// [`stop_notify`][Client::stop_notify], and a raw CCCD write would
    /// desynchronize it.
    pub async fn write_gatt_descriptor(&self, handle: u16, data: &[u8]) -> Result<()> {
        let link = self.link()?;
        let descriptor = link.services.get_descriptor(handle)?.clone();
        if descriptor.uuid() == btuuid::descriptors::CLIENT_CHARACTERISTIC_CONFIGURATION {
            return Err(Error::message(
                ErrorKind::NotSupported,
                "writing the CCCD directly is not supported; use start_notify/stop_notify",
            ));
        }

        let serialize = link.char_lock(descriptor.characteristic_handle());
        let _serialized = serialize.lock().await;
        event_log!(id = %self.id, handle, len = data.len(), "write descriptor");
        self.guarded(&link, link.conn.write_descriptor(handle, data)).await
    }

    /// Requests pairing with the peripheral.
    ///
    /// Key generation and storage are the OS's concern; this call only
    /// initiates the procedure. Not supported on Apple platforms, where the
    /// OS pairs on demand when a protected characteristic is accessed.
    pub async fn pair(&self) -> Result<()> {
        let link = self.link()?;
        self.guarded(&link, link.conn.pair()).await
    }

    /// Removes the OS's pairing record for the peripheral.
    ///
    /// Not supported on Apple platforms.
    pub async fn unpair(&self) -> Result<()> {
        let link = self.link()?;
        self.guarded(&link, link.conn.unpair()).await
    }

    fn link(&self) -> Result<Link> {
        let state = self.inner.state.lock().unwrap();
        match (state.phase, &state.link) {
            (ConnectionState::Connected, Some(link)) => Ok(link.clone()),
            _ => Err(ErrorKind::NotConnected.into()),
        }
    }

    /// Runs one backend operation, racing it against link teardown and the
    /// configured operation timeout. A disconnect — peripheral-initiated or
    /// local — completes the operation with `NotConnected`.
    async fn guarded<T>(&self, link: &Link, op: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        let mut alive = link.alive.clone();
        let teardown = async move {
            // Resolves when the link is torn down; a dropped sender means
            // the pump is gone, which tears down as well.
            let _ = alive.wait_for(|alive| !alive).await;
        };
        let op = async {
            match self.config.operation_timeout {
                Some(timeout) => tokio::time::timeout(timeout, op)
                    .await
                    .unwrap_or_else(|_| Err(Error::message(ErrorKind::Timeout, "GATT operation timed out"))),
                None => op.await,
            }
        };
        tokio::select! {
            result = op => result,
            _ = teardown => Err(Error::message(ErrorKind::NotConnected, "the connection was lost")),
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.inner.subscriptions.lock().unwrap().clear();
        let link = self.inner.state.lock().unwrap().link.take();
        if let Some(link) = link {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = link.conn.disconnect().await;
                });
            }
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("backend", &self.backend.kind())
            .field("state", &self.state())
            .finish()
    }
}

/// Drains connection events: notifications go to the matching subscription
/// callback, `Disconnected` (or the backend dropping the channel) finalizes
/// the connection. Runs on its own task so user callbacks never execute on
/// an OS callback thread.
async fn pump(
    mut rx: mpsc::UnboundedReceiver<ConnectionEvent>,
    inner: Arc<Inner>,
    services: Arc<ServiceCollection>,
    alive_tx: watch::Sender<bool>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            ConnectionEvent::Notification { handle, value } => {
                let entry = inner.subscriptions.lock().unwrap().get(&handle).cloned();
                if let Some(entry) = entry {
                    if let Ok(characteristic) = services.get_characteristic(handle) {
                        event_log!(handle, len = value.len(), "notification");
                        let mut callback = entry.lock().unwrap();
                        (*callback)(characteristic, &value);
                    }
                }
            }
            ConnectionEvent::Disconnected => break,
        }
    }

    // Runs once per connection: the phase check keeps the user callback at
    // exactly one invocation even if teardown races a local disconnect.
    let fire = {
        let mut state = inner.state.lock().unwrap();
        let fire = matches!(
            state.phase,
            ConnectionState::Connected | ConnectionState::Disconnecting
        );
        state.phase = ConnectionState::Disconnected;
        state.link = None;
        fire
    };
    inner.subscriptions.lock().unwrap().clear();
    let _ = alive_tx.send(false);
    if fire {
        debug!("disconnected");
        if let Some(callback) = inner.disconnected_callback.lock().unwrap().as_mut() {
            callback();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_match_the_documented_contract() {
        let config = ClientConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert!(config.operation_timeout.is_none());
        assert!(config.disconnect_timeout.is_none());
        assert!(!config.use_cached_services);
        assert!(config.notification_discriminator.is_none());
    }

    #[test]
    fn config_builders_compose() {
        let config = ClientConfig::new()
            .with_connect_timeout(Duration::from_secs(30))
            .with_operation_timeout(Duration::from_secs(5))
            .dangerous_use_bleak_cache(true)
            .with_notification_discriminator(|payload| payload.len() == 4);
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.operation_timeout, Some(Duration::from_secs(5)));
        assert!(config.use_cached_services);
        assert!(config.notification_discriminator.as_ref().is_some_and(|d| d(&[0; 4])));
    }
}
