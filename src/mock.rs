//! An in-process backend for testing without Bluetooth hardware.
//!
//! [`MockBackend`] implements the same [`Backend`]/[`Connection`] contract
//! as the OS adapters against scripted in-memory peripherals, so scanner and
//! client behavior — advertisement merging, the connection state machine,
//! notification delivery, disconnect handling — can be exercised end-to-end
//! in ordinary tests. Downstream crates can use it the same way to test
//! their own BLE logic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::trace;
use uuid::Uuid;

use crate::backend::{
    Backend, ConnectOptions, Connection, ConnectionEvent, RawCharacteristic, RawDescriptor, RawService, ScanEvent,
    ScanFilter, SubscriptionKind,
};
use crate::error::{AttError, AttErrorCode, ErrorKind};
use crate::{AdvertisementData, CharacteristicProperties, DeviceId, Error, Result, WriteKind};

/// An in-process [`Backend`] serving scripted [`MockPeripheral`]s.
#[derive(Default)]
pub struct MockBackend {
    peripherals: Mutex<Vec<Arc<MockPeripheral>>>,
    scan: Mutex<Option<ScanState>>,
}

struct ScanState {
    tx: mpsc::UnboundedSender<ScanEvent>,
    drain: tokio::task::JoinHandle<()>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(MockBackend::default())
    }

    /// Registers a peripheral with this backend.
    pub fn add_peripheral(&self, peripheral: Arc<MockPeripheral>) {
        self.peripherals.lock().unwrap().push(peripheral);
    }

    /// Injects a live advertisement event while a scan is running. Returns
    /// `false` when no scan is active.
    pub fn advertise(&self, id: DeviceId, advertisement: AdvertisementData, rssi: i16) -> bool {
        let scan = self.scan.lock().unwrap();
        match scan.as_ref() {
            Some(state) => state
                .tx
                .send(ScanEvent {
                    id,
                    os_name: None,
                    advertisement,
                    rssi,
                })
                .is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn scan_start(&self, _filter: ScanFilter, events: mpsc::UnboundedSender<ScanEvent>) -> Result<()> {
        let mut scan = self.scan.lock().unwrap();
        if scan.is_some() {
            return Err(ErrorKind::AlreadyScanning.into());
        }

        let scripted: Vec<ScanEvent> = self
            .peripherals
            .lock()
            .unwrap()
            .iter()
            .flat_map(|peripheral| {
                let script = std::mem::take(&mut *peripheral.adv_script.lock().unwrap());
                let id = peripheral.id;
                let os_name = peripheral.os_name.clone();
                script.into_iter().map(move |(advertisement, rssi)| ScanEvent {
                    id,
                    os_name: os_name.clone(),
                    advertisement,
                    rssi,
                })
            })
            .collect();

        let tx = events.clone();
        let drain = tokio::spawn(async move {
            for event in scripted {
                // A real radio never delivers two packets at the same
                // instant; keep the arrival points distinct.
                tokio::time::sleep(Duration::from_millis(1)).await;
                if events.send(event).is_err() {
                    break;
                }
            }
        });

        *scan = Some(ScanState { tx, drain });
        Ok(())
    }

    async fn scan_stop(&self) -> Result<()> {
        if let Some(state) = self.scan.lock().unwrap().take() {
            state.drain.abort();
        }
        Ok(())
    }

    async fn connect(
        &self,
        id: &DeviceId,
        _timeout: Duration,
        events: mpsc::UnboundedSender<ConnectionEvent>,
        _options: &ConnectOptions,
    ) -> Result<Box<dyn Connection>> {
        let peripheral = self
            .peripherals
            .lock()
            .unwrap()
            .iter()
            .find(|peripheral| peripheral.id == *id)
            .cloned()
            .ok_or_else(|| Error::message(ErrorKind::DeviceNotFound, format!("no mock peripheral {id}")))?;

        peripheral.delay().await;
        if peripheral.refuse_connections.load(Ordering::Acquire) {
            return Err(Error::message(ErrorKind::ConnectionFailed, "mock peripheral refused the connection"));
        }

        let link_id = peripheral.next_link_id.fetch_add(1, Ordering::AcqRel);
        let mut link = peripheral.link.lock().unwrap();
        if link.is_some() {
            return Err(Error::message(ErrorKind::ConnectionFailed, "mock peripheral is already connected"));
        }
        *link = Some(LinkState {
            id: link_id,
            events,
            subscriptions: HashMap::new(),
        });
        drop(link);

        trace!(%id, "mock connection established");
        Ok(Box::new(MockConnection { peripheral, link_id }))
    }

    fn kind(&self) -> &'static str {
        "mock"
    }
}

struct LinkState {
    id: u64,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    subscriptions: HashMap<u16, SubscriptionKind>,
}

/// A scripted in-memory peripheral: an advertisement script plus a GATT
/// database with stored attribute values.
pub struct MockPeripheral {
    id: DeviceId,
    os_name: Option<String>,
    services: Vec<RawService>,
    char_props: HashMap<u16, CharacteristicProperties>,
    descriptor_handles: Vec<u16>,
    mtu: u16,
    latency: Duration,
    adv_script: Mutex<Vec<(AdvertisementData, i16)>>,
    values: Mutex<HashMap<u16, Vec<u8>>>,
    link: Mutex<Option<LinkState>>,
    next_link_id: std::sync::atomic::AtomicU64,
    refuse_connections: std::sync::atomic::AtomicBool,
    ops_in_flight: AtomicUsize,
    max_ops_in_flight: AtomicUsize,
}

impl MockPeripheral {
    pub fn builder(id: DeviceId) -> MockPeripheralBuilder {
        MockPeripheralBuilder {
            id,
            os_name: None,
            services: Vec::new(),
            values: HashMap::new(),
            adv_script: Vec::new(),
            mtu: 23,
            latency: Duration::ZERO,
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Whether a client currently holds a connection to this peripheral.
    pub fn is_connected(&self) -> bool {
        self.link.lock().unwrap().is_some()
    }

    /// Pushes a notification/indication for `handle`. Returns `false` when
    /// no client is connected and subscribed to the characteristic.
    pub fn notify(&self, handle: u16, value: &[u8]) -> bool {
        let link = self.link.lock().unwrap();
        match link.as_ref() {
            Some(link) if link.subscriptions.contains_key(&handle) => link
                .events
                .send(ConnectionEvent::Notification {
                    handle,
                    value: value.to_vec(),
                })
                .is_ok(),
            _ => false,
        }
    }

    /// Simulates a peripheral-initiated link drop.
    pub fn drop_link(&self) {
        if let Some(link) = self.link.lock().unwrap().take() {
            let _ = link.events.send(ConnectionEvent::Disconnected);
        }
    }

    /// Drops the link only if it still belongs to the given connection, so
    /// a stale connection object cannot tear down its successor.
    fn drop_link_for(&self, link_id: u64) {
        let mut link = self.link.lock().unwrap();
        if link.as_ref().is_some_and(|state| state.id == link_id) {
            if let Some(state) = link.take() {
                let _ = state.events.send(ConnectionEvent::Disconnected);
            }
        }
    }

    /// Make subsequent connection attempts fail.
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse_connections.store(refuse, Ordering::Release);
    }

    /// The subscription mode active on `handle`, if any.
    pub fn subscription_kind(&self, handle: u16) -> Option<SubscriptionKind> {
        self.link
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|link| link.subscriptions.get(&handle).copied())
    }

    /// The stored value of the attribute at `handle`.
    pub fn value(&self, handle: u16) -> Option<Vec<u8>> {
        self.values.lock().unwrap().get(&handle).cloned()
    }

    /// Replaces the stored value of the attribute at `handle` without
    /// notifying.
    pub fn set_value(&self, handle: u16, value: &[u8]) {
        self.values.lock().unwrap().insert(handle, value.to_vec());
    }

    /// The largest number of GATT operations this peripheral has seen in
    /// flight at once. With a nonzero latency this observes whether the
    /// client serializes per-characteristic requests.
    pub fn max_ops_in_flight(&self) -> usize {
        self.max_ops_in_flight.load(Ordering::Acquire)
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn require_link(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ErrorKind::NotConnected.into())
        }
    }

    fn props(&self, handle: u16) -> Result<CharacteristicProperties> {
        self.char_props
            .get(&handle)
            .copied()
            .ok_or_else(|| AttError::Known(AttErrorCode::InvalidHandle).into())
    }
}

/// Builds a [`MockPeripheral`]. Attributes are declared in tree order:
/// `service`, then its `characteristic`s, then each characteristic's
/// `descriptor`s.
pub struct MockPeripheralBuilder {
    id: DeviceId,
    os_name: Option<String>,
    services: Vec<RawService>,
    values: HashMap<u16, Vec<u8>>,
    adv_script: Vec<(AdvertisementData, i16)>,
    mtu: u16,
    latency: Duration,
}

impl MockPeripheralBuilder {
    /// The name the OS has on record for the device, independent of any
    /// advertised local name.
    pub fn os_name(mut self, name: &str) -> Self {
        self.os_name = Some(name.to_string());
        self
    }

    pub fn mtu(mut self, mtu: u16) -> Self {
        self.mtu = mtu;
        self
    }

    /// Adds artificial latency to connection establishment and every GATT
    /// operation.
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Appends an advertisement to the script replayed when a scan starts.
    pub fn advertisement(mut self, advertisement: AdvertisementData, rssi: i16) -> Self {
        self.adv_script.push((advertisement, rssi));
        self
    }

    /// Starts a new primary service.
    pub fn service(mut self, handle: u16, uuid: Uuid) -> Self {
        self.services.push(RawService {
            handle,
            uuid,
            primary: true,
            characteristics: Vec::new(),
        });
        self
    }

    /// Adds a characteristic to the most recently declared service.
    ///
    /// # Panics
    ///
    /// Panics when no service has been declared.
    pub fn characteristic(mut self, handle: u16, uuid: Uuid, properties: CharacteristicProperties) -> Self {
        self.services
            .last_mut()
            .expect("characteristic declared before any service")
            .characteristics
            .push(RawCharacteristic {
                handle,
                uuid,
                properties,
                descriptors: Vec::new(),
            });
        self
    }

    /// Adds a descriptor to the most recently declared characteristic.
    ///
    /// # Panics
    ///
    /// Panics when no characteristic has been declared.
    pub fn descriptor(mut self, handle: u16, uuid: Uuid) -> Self {
        self.services
            .last_mut()
            .and_then(|service| service.characteristics.last_mut())
            .expect("descriptor declared before any characteristic")
            .descriptors
            .push(RawDescriptor { handle, uuid });
        self
    }

    /// Sets the initial stored value of an attribute.
    pub fn value(mut self, handle: u16, value: &[u8]) -> Self {
        self.values.insert(handle, value.to_vec());
        self
    }

    pub fn build(self) -> Arc<MockPeripheral> {
        let mut char_props = HashMap::new();
        let mut descriptor_handles = Vec::new();
        for service in &self.services {
            for characteristic in &service.characteristics {
                char_props.insert(characteristic.handle, characteristic.properties);
                for descriptor in &characteristic.descriptors {
                    descriptor_handles.push(descriptor.handle);
                }
            }
        }

        Arc::new(MockPeripheral {
            id: self.id,
            os_name: self.os_name,
            services: self.services,
            char_props,
            descriptor_handles,
            mtu: self.mtu,
            latency: self.latency,
            adv_script: Mutex::new(self.adv_script),
            values: Mutex::new(self.values),
            link: Mutex::new(None),
            next_link_id: std::sync::atomic::AtomicU64::new(0),
            refuse_connections: std::sync::atomic::AtomicBool::new(false),
            ops_in_flight: AtomicUsize::new(0),
            max_ops_in_flight: AtomicUsize::new(0),
        })
    }
}

struct MockConnection {
    peripheral: Arc<MockPeripheral>,
    link_id: u64,
}

impl MockConnection {
    /// Tracks operation overlap and applies the scripted latency.
    async fn operation(&self) -> OpGuard<'_> {
        let in_flight = self.peripheral.ops_in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peripheral.max_ops_in_flight.fetch_max(in_flight, Ordering::AcqRel);
        self.peripheral.delay().await;
        OpGuard {
            peripheral: &self.peripheral,
        }
    }
}

struct OpGuard<'a> {
    peripheral: &'a MockPeripheral,
}

impl Drop for OpGuard<'_> {
    fn drop(&mut self) {
        self.peripheral.ops_in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn discover_services(&self, _use_cached: bool) -> Result<Vec<RawService>> {
        self.peripheral.require_link()?;
        Ok(self.peripheral.services.clone())
    }

    async fn read(&self, handle: u16) -> Result<Vec<u8>> {
        let _op = self.operation().await;
        self.peripheral.require_link()?;
        if !self.peripheral.props(handle)?.read {
            return Err(AttError::Known(AttErrorCode::ReadNotPermitted).into());
        }
        Ok(self.peripheral.value(handle).unwrap_or_default())
    }

    async fn write(&self, handle: u16, value: &[u8], kind: WriteKind) -> Result<()> {
        let _op = self.operation().await;
        self.peripheral.require_link()?;
        let props = self.peripheral.props(handle)?;
        let permitted = match kind {
            WriteKind::WithResponse => props.write,
            WriteKind::WithoutResponse => props.write_without_response,
        };
        if !permitted {
            return Err(AttError::Known(AttErrorCode::WriteNotPermitted).into());
        }
        self.peripheral.set_value(handle, value);
        Ok(())
    }

    async fn read_descriptor(&self, handle: u16) -> Result<Vec<u8>> {
        let _op = self.operation().await;
        self.peripheral.require_link()?;
        if !self.peripheral.descriptor_handles.contains(&handle) {
            return Err(AttError::Known(AttErrorCode::InvalidHandle).into());
        }
        Ok(self.peripheral.value(handle).unwrap_or_default())
    }

    async fn write_descriptor(&self, handle: u16, value: &[u8]) -> Result<()> {
        let _op = self.operation().await;
        self.peripheral.require_link()?;
        if !self.peripheral.descriptor_handles.contains(&handle) {
            return Err(AttError::Known(AttErrorCode::InvalidHandle).into());
        }
        self.peripheral.set_value(handle, value);
        Ok(())
    }

    async fn subscribe(&self, handle: u16, kind: SubscriptionKind) -> Result<()> {
        let _op = self.operation().await;
        let props = self.peripheral.props(handle)?;
        let supported = match kind {
            SubscriptionKind::Notify => props.notify,
            SubscriptionKind::Indicate => props.indicate,
        };
        if !supported {
            return Err(AttError::Known(AttErrorCode::CccdImproperlyConfigured).into());
        }
        let mut link = self.peripheral.link.lock().unwrap();
        match link.as_mut() {
            Some(link) => {
                link.subscriptions.insert(handle, kind);
                Ok(())
            }
            None => Err(ErrorKind::NotConnected.into()),
        }
    }

    async fn unsubscribe(&self, handle: u16) -> Result<()> {
        let _op = self.operation().await;
        let mut link = self.peripheral.link.lock().unwrap();
        match link.as_mut() {
            Some(link) => {
                link.subscriptions.remove(&handle);
                Ok(())
            }
            None => Err(ErrorKind::NotConnected.into()),
        }
    }

    async fn mtu(&self) -> Result<u16> {
        self.peripheral.require_link()?;
        Ok(self.peripheral.mtu)
    }

    async fn pair(&self) -> Result<()> {
        self.peripheral.require_link()
    }

    async fn unpair(&self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.peripheral.drop_link_for(self.link_id);
        Ok(())
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.peripheral.drop_link_for(self.link_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btuuid::bluetooth_uuid_from_u16;

    fn peripheral() -> Arc<MockPeripheral> {
        MockPeripheral::builder("AA:BB:CC:DD:EE:FF".parse().unwrap())
            .service(1, bluetooth_uuid_from_u16(0x180f))
            .characteristic(3, bluetooth_uuid_from_u16(0x2a19), CharacteristicProperties::from_bits(0x02))
            .value(3, &[0x64])
            .build()
    }

    #[tokio::test]
    async fn reads_enforce_the_property_mask() {
        let backend = MockBackend::new();
        let peripheral = peripheral();
        backend.add_peripheral(peripheral.clone());

        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = backend
            .connect(&peripheral.id(), Duration::from_secs(1), tx, &ConnectOptions::default())
            .await
            .unwrap();

        assert_eq!(conn.read(3).await.unwrap(), vec![0x64]);
        let err = conn.write(3, &[0], WriteKind::WithResponse).await.unwrap_err();
        assert_eq!(
            err.att_code(),
            Some(AttError::Known(AttErrorCode::WriteNotPermitted))
        );
        let err = conn.read(99).await.unwrap_err();
        assert_eq!(err.att_code(), Some(AttError::Known(AttErrorCode::InvalidHandle)));
    }

    #[tokio::test]
    async fn stale_connections_cannot_tear_down_their_successor() {
        let backend = MockBackend::new();
        let peripheral = peripheral();
        backend.add_peripheral(peripheral.clone());

        let (tx, _rx) = mpsc::unbounded_channel();
        let first = backend
            .connect(&peripheral.id(), Duration::from_secs(1), tx, &ConnectOptions::default())
            .await
            .unwrap();
        peripheral.drop_link();

        let (tx, _rx) = mpsc::unbounded_channel();
        let _second = backend
            .connect(&peripheral.id(), Duration::from_secs(1), tx, &ConnectOptions::default())
            .await
            .unwrap();

        // The first connection is long gone; dropping it must not touch the
        // link the second connection holds.
        drop(first);
        assert!(peripheral.is_connected());
    }
}
