//! Scanning for advertising peripherals.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_core::Stream;
use futures_util::StreamExt;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::{Backend, ScanEvent, ScanFilter};
use crate::error::ErrorKind;
use crate::util::{defer, event_log};
use crate::{AdvertisementData, DeviceId, DiscoveredDevice, Result, ScanningMode};

/// Invoked for every advertisement event before de-duplication, with the
/// device's merged record and the just-received advertisement.
pub type DetectionCallback = Box<dyn FnMut(&DiscoveredDevice, &AdvertisementData) + Send + 'static>;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Configuration for a [`Scanner`].
#[derive(Default)]
pub struct ScanConfig {
    service_uuids: Vec<Uuid>,
    mode: ScanningMode,
    detection_callback: Option<DetectionCallback>,
    duplicate_data: bool,
}

impl ScanConfig {
    pub fn new() -> Self {
        ScanConfig::default()
    }

    /// Only report devices advertising at least one of `uuids`.
    ///
    /// Passed through to the OS filter where the platform supports one and
    /// applied in-process otherwise.
    ///
    /// # Platform specific
    ///
    /// On macOS 12.0–12.2 scanning silently reports nothing unless at least
    /// one service UUID is given; the CoreBluetooth backend rejects an empty
    /// filter on those versions.
    pub fn with_service_uuids(mut self, uuids: impl IntoIterator<Item = Uuid>) -> Self {
        self.service_uuids = uuids.into_iter().collect();
        self
    }

    /// Whether to scan actively (requesting scan responses, the default) or
    /// passively. Backends without OS-level passive scanning treat the
    /// request as active and log an advisory message.
    pub fn with_scanning_mode(mut self, mode: ScanningMode) -> Self {
        self.mode = mode;
        self
    }

    /// Invoke `callback` for every advertisement event, before merging.
    pub fn with_detection_callback(
        mut self,
        callback: impl FnMut(&DiscoveredDevice, &AdvertisementData) + Send + 'static,
    ) -> Self {
        self.detection_callback = Some(Box::new(callback));
        self
    }

    /// Ask the OS to deliver repeated advertisements with unchanged payloads
    /// (BlueZ discovery-filter passthrough; advisory on other platforms).
    pub fn with_duplicate_data(mut self, duplicate_data: bool) -> Self {
        self.duplicate_data = duplicate_data;
        self
    }
}

impl std::fmt::Debug for ScanConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanConfig")
            .field("service_uuids", &self.service_uuids)
            .field("mode", &self.mode)
            .field("detection_callback", &self.detection_callback.as_ref().map(|_| ".."))
            .field("duplicate_data", &self.duplicate_data)
            .finish()
    }
}

struct Shared {
    devices: Mutex<HashMap<DeviceId, DiscoveredDevice>>,
    events: broadcast::Sender<(DiscoveredDevice, AdvertisementData)>,
    detection: Mutex<Option<DetectionCallback>>,
    running: AtomicBool,
}

/// Scans for advertising peripherals and maintains a merged record per
/// device.
///
/// A scanner is restartable: `start` after `stop` begins a fresh scan
/// session with an empty device table. Dropping a running scanner stops the
/// scan.
pub struct Scanner {
    backend: Arc<dyn Backend>,
    service_uuids: Vec<Uuid>,
    mode: ScanningMode,
    duplicate_data: bool,
    shared: Arc<Shared>,
    pump: Option<tokio::task::JoinHandle<()>>,
}

impl Scanner {
    /// Creates a scanner bound to the default adapter of this platform.
    pub async fn new(config: ScanConfig) -> Result<Self> {
        Ok(Self::with_backend(crate::platform_backend().await?, config))
    }

    /// Creates a scanner on an explicit backend, e.g. the
    /// [mock backend][crate::mock] in tests.
    pub fn with_backend(backend: Arc<dyn Backend>, config: ScanConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Scanner {
            backend,
            service_uuids: config.service_uuids,
            mode: config.mode,
            duplicate_data: config.duplicate_data,
            shared: Arc::new(Shared {
                devices: Mutex::new(HashMap::new()),
                events,
                detection: Mutex::new(config.detection_callback),
                running: AtomicBool::new(false),
            }),
            pump: None,
        }
    }

    /// Starts scanning.
    ///
    /// Fails with [`ErrorKind::AlreadyScanning`] if this scanner is already
    /// running. Starting discards the device table of the previous session.
    pub async fn start(&mut self) -> Result<()> {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return Err(ErrorKind::AlreadyScanning.into());
        }
        let reset = defer(|| self.shared.running.store(false, Ordering::Release));

        self.shared.devices.lock().unwrap().clear();

        let filter = ScanFilter {
            service_uuids: self.service_uuids.clone(),
            mode: self.mode,
            duplicate_data: self.duplicate_data,
        };
        let (tx, rx) = mpsc::unbounded_channel();
        self.backend.scan_start(filter, tx).await?;
        reset.defuse();

        debug!(backend = self.backend.kind(), "scan started");
        self.pump = Some(tokio::spawn(pump(
            rx,
            self.shared.clone(),
            self.backend.clone(),
            self.service_uuids.clone(),
        )));
        Ok(())
    }

    /// Stops scanning. Succeeds when no scan is running.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        self.pump.take();
        self.backend.scan_stop().await?;
        debug!(backend = self.backend.kind(), "scan stopped");
        Ok(())
    }

    /// Scans for `timeout` and returns every device discovered.
    pub async fn discover(&mut self, timeout: Duration) -> Result<Vec<DiscoveredDevice>> {
        self.start().await?;
        tokio::time::sleep(timeout).await;
        self.stop().await?;
        Ok(self.discovered_devices())
    }

    /// The devices discovered so far in the current (or most recent) scan
    /// session.
    pub fn discovered_devices(&self) -> Vec<DiscoveredDevice> {
        self.shared.devices.lock().unwrap().values().cloned().collect()
    }

    /// Scans until `predicate` matches a device, then stops.
    ///
    /// The predicate sees the device's merged record and the just-received
    /// advertisement. Returns `None` when `timeout` elapses without a match.
    /// The scan is stopped before returning, including when the returned
    /// future is dropped at an await point.
    pub async fn find_device_by<F>(&mut self, mut predicate: F, timeout: Duration) -> Result<Option<DiscoveredDevice>>
    where
        F: FnMut(&DiscoveredDevice, &AdvertisementData) -> bool + Send,
    {
        let mut events = self.shared.events.subscribe();
        self.start().await?;

        let guard = defer({
            let backend = self.backend.clone();
            let shared = self.shared.clone();
            move || {
                if shared.running.swap(false, Ordering::AcqRel) {
                    if let Ok(handle) = tokio::runtime::Handle::try_current() {
                        handle.spawn(async move {
                            let _ = backend.scan_stop().await;
                        });
                    }
                }
            }
        });

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let found = loop {
            tokio::select! {
                _ = &mut deadline => break None,
                event = events.recv() => match event {
                    Ok((device, advertisement)) => {
                        if predicate(&device, &advertisement) {
                            break Some(device);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "advertisement events dropped while matching");
                    }
                    Err(broadcast::error::RecvError::Closed) => break None,
                },
            }
        };

        guard.defuse();
        self.stop().await?;
        Ok(found)
    }

    /// Scans until a device with the given local name appears.
    pub async fn find_device_by_name(&mut self, name: &str, timeout: Duration) -> Result<Option<DiscoveredDevice>> {
        self.find_device_by(|device, _| device.local_name() == Some(name), timeout)
            .await
    }

    /// Scans until the device with the given identity appears.
    ///
    /// `id` accepts a Bluetooth address (`AA:BB:CC:DD:EE:FF`) or, on Apple
    /// platforms, the host-local device UUID.
    pub async fn find_device_by_id(&mut self, id: DeviceId, timeout: Duration) -> Result<Option<DiscoveredDevice>> {
        self.find_device_by(move |device, _| device.id() == id, timeout).await
    }

    /// Scans until the device with the given textual identity appears.
    pub async fn find_device_by_address(&mut self, address: &str, timeout: Duration) -> Result<Option<DiscoveredDevice>> {
        self.find_device_by_id(address.parse()?, timeout).await
    }

    /// A stream of `(device, advertisement)` pairs, one per advertisement
    /// event: the device's merged record and the advertisement that
    /// triggered the event.
    ///
    /// Slow consumers lose the oldest pending events.
    pub fn advertisements(&self) -> impl Stream<Item = (DiscoveredDevice, AdvertisementData)> + Send + Unpin {
        BroadcastStream::new(self.shared.events.subscribe()).filter_map(|event| std::future::ready(event.ok()))
    }
}

impl Drop for Scanner {
    fn drop(&mut self) {
        if self.shared.running.swap(false, Ordering::AcqRel) {
            let backend = self.backend.clone();
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = backend.scan_stop().await;
                });
            }
        }
    }
}

impl std::fmt::Debug for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("backend", &self.backend.kind())
            .field("running", &self.shared.running.load(Ordering::Acquire))
            .finish()
    }
}

/// Drains backend scan events: merges records, invokes the detection
/// callback, publishes to the advertisement stream. Runs on its own task so
/// user callbacks never execute on an OS callback thread.
async fn pump(
    mut rx: mpsc::UnboundedReceiver<ScanEvent>,
    shared: Arc<Shared>,
    backend: Arc<dyn Backend>,
    service_uuids: Vec<Uuid>,
) {
    while let Some(event) = rx.recv().await {
        event_log!(id = %event.id, rssi = event.rssi, "advertisement event");

        let snapshot = {
            let mut devices = shared.devices.lock().unwrap();
            // Events surviving the OS filter may still miss the requested
            // UUIDs (scan responses, platforms without OS filtering); keep
            // them only for devices that already matched.
            if !service_uuids.is_empty()
                && !event.advertisement.advertises_any_service(&service_uuids)
                && !devices.contains_key(&event.id)
            {
                continue;
            }

            let now = Instant::now();
            let device = devices.entry(event.id).or_insert_with(|| DiscoveredDevice {
                backend: backend.clone(),
                id: event.id,
                os_name: None,
                advertisement: AdvertisementData::default(),
                rssi: event.rssi,
                first_seen: now,
                last_seen: now,
            });
            device.advertisement.merge(&event.advertisement);
            if event.os_name.is_some() {
                device.os_name.clone_from(&event.os_name);
            }
            device.rssi = event.rssi;
            device.last_seen = now;
            device.clone()
        };

        if let Some(callback) = shared.detection.lock().unwrap().as_mut() {
            callback(&snapshot, &event.advertisement);
        }
        let _ = shared.events.send((snapshot, event.advertisement));
    }
}
