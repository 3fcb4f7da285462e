//! The Linux backend, speaking to the BlueZ daemon through `bluer`.

mod connection;
mod error;
mod session;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use smallvec::SmallVec;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::backend::{Backend, ConnectOptions, Connection, ConnectionEvent, ScanEvent, ScanFilter};
use crate::error::ErrorKind;
use crate::util::event_log;
use crate::{Address, AddressType, AdvertisementData, DeviceId, Error, Result, ScanningMode};

use self::connection::BluezConnection;

const CONNECT_ATTEMPTS: u32 = 3;

pub(crate) struct BluezBackend {
    adapter: bluer::Adapter,
    scan: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl BluezBackend {
    pub(crate) async fn new() -> Result<Arc<Self>> {
        let session = session::shared().await?;
        let adapter = session.default_adapter().await?;
        Ok(Arc::new(BluezBackend {
            adapter,
            scan: Mutex::new(None),
        }))
    }
}

#[async_trait]
impl Backend for BluezBackend {
    async fn scan_start(&self, filter: ScanFilter, events: mpsc::UnboundedSender<ScanEvent>) -> Result<()> {
        if self.scan.lock().unwrap().is_some() {
            return Err(ErrorKind::AlreadyScanning.into());
        }
        if filter.mode == ScanningMode::Passive {
            warn!("passive scanning is not supported by the BlueZ discovery API; scanning actively");
        }

        let mut discovery_filter = bluer::DiscoveryFilter::default();
        discovery_filter.uuids = filter.service_uuids.iter().copied().collect();
        discovery_filter.duplicate_data = filter.duplicate_data;
        discovery_filter.transport = bluer::DiscoveryTransport::Le;
        self.adapter.set_discovery_filter(discovery_filter).await?;

        // `discover_devices_with_changes` re-emits a device whenever its
        // advertised properties change, which is what turns BlueZ's
        // object-tree view back into per-advertisement events.
        let discovery = self.adapter.discover_devices_with_changes().await?;
        let adapter = self.adapter.clone();
        let task = tokio::spawn(async move {
            let mut discovery = Box::pin(discovery);
            while let Some(event) = discovery.next().await {
                if let bluer::AdapterEvent::DeviceAdded(addr) = event {
                    match scan_event(&adapter, addr).await {
                        Ok(Some(event)) => {
                            if events.send(event).is_err() {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(err) => event_log!(%err, %addr, "reading advertised properties failed"),
                    }
                }
            }
        });

        *self.scan.lock().unwrap() = Some(task);
        Ok(())
    }

    async fn scan_stop(&self) -> Result<()> {
        if let Some(task) = self.scan.lock().unwrap().take() {
            // Dropping the discovery stream ends the BlueZ discovery session.
            task.abort();
        }
        Ok(())
    }

    async fn connect(
        &self,
        id: &DeviceId,
        timeout: Duration,
        events: mpsc::UnboundedSender<ConnectionEvent>,
        _options: &ConnectOptions,
    ) -> Result<Box<dyn Connection>> {
        let DeviceId::Address { address, .. } = id else {
            return Err(Error::message(
                ErrorKind::InvalidParameter,
                "BlueZ identifies devices by Bluetooth address",
            ));
        };
        let device = Arc::new(self.adapter.device(bluer::Address(address.into_bytes()))?);

        if !device.is_connected().await? {
            connect_with_retries(&device, timeout).await?;
        }
        wait_services_resolved(&device).await?;

        let connection = BluezConnection::establish(self.adapter.clone(), device, events).await?;
        Ok(Box::new(connection))
    }

    fn kind(&self) -> &'static str {
        "bluez"
    }
}

async fn connect_with_retries(device: &bluer::Device, timeout: Duration) -> Result<()> {
    for attempt in 1..=CONNECT_ATTEMPTS {
        let result = tokio::time::timeout(timeout, device.connect())
            .await
            .map_err(|_| Error::message(ErrorKind::Timeout, "the connection attempt timed out"))?;
        match result {
            Ok(()) => return Ok(()),
            Err(err) if attempt < CONNECT_ATTEMPTS && error::is_transient_connect_error(&err) => {
                // Kernel race where bluetoothd aborts its own attempt;
                // trying again right away usually succeeds.
                debug!(%err, attempt, "transient connection failure, retrying");
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            Err(err) => return Err(err.into()),
        }
    }
    unreachable!()
}

async fn wait_services_resolved(device: &bluer::Device) -> Result<()> {
    if device.is_services_resolved().await? {
        return Ok(());
    }
    let mut events = device.events().await?;
    // The property may have flipped while we subscribed.
    if device.is_services_resolved().await? {
        return Ok(());
    }
    while let Some(event) = events.next().await {
        match event {
            bluer::DeviceEvent::PropertyChanged(bluer::DeviceProperty::ServicesResolved(true)) => return Ok(()),
            bluer::DeviceEvent::PropertyChanged(bluer::DeviceProperty::Connected(false)) => {
                return Err(Error::message(
                    ErrorKind::ConnectionFailed,
                    "the device disconnected during service resolution",
                ));
            }
            _ => {}
        }
    }
    Err(Error::message(
        ErrorKind::ConnectionFailed,
        "the device was removed during service resolution",
    ))
}

/// Reads the advertised properties of a (re-)discovered device and shapes
/// them into a [`ScanEvent`]. Devices without an RSSI reading are cache
/// entries, not live advertisers, and are skipped.
async fn scan_event(adapter: &bluer::Adapter, addr: bluer::Address) -> bluer::Result<Option<ScanEvent>> {
    let device = adapter.device(addr)?;
    if device.is_connected().await.unwrap_or(false) {
        return Ok(None);
    }
    let Some(rssi) = device.rssi().await? else {
        return Ok(None);
    };

    let advertisement = advertisement_data(&device).await;
    let os_name = device.alias().await.ok().filter(|alias| !alias.is_empty());
    let kind = match device.address_type().await {
        Ok(bluer::AddressType::LeRandom) => AddressType::Random,
        _ => AddressType::Public,
    };

    Ok(Some(ScanEvent {
        id: DeviceId::Address {
            address: Address::new(addr.0),
            kind,
        },
        os_name,
        advertisement,
        rssi,
    }))
}

async fn advertisement_data(device: &bluer::Device) -> AdvertisementData {
    let local_name = device.name().await.unwrap_or_default().filter(|name| !name.is_empty());

    let manufacturer_data = device
        .manufacturer_data()
        .await
        .unwrap_or_default()
        .unwrap_or_default()
        .into_iter()
        .map(|(company_id, data)| (company_id, SmallVec::from_vec(data)))
        .collect();

    let service_data = device
        .service_data()
        .await
        .unwrap_or_default()
        .unwrap_or_default()
        .into_iter()
        .map(|(uuid, data)| (uuid, SmallVec::from_vec(data)))
        .collect();

    let services = device
        .uuids()
        .await
        .unwrap_or_default()
        .map_or(SmallVec::new(), |uuids| uuids.into_iter().collect());

    let tx_power_level = device.tx_power().await.unwrap_or_default();

    AdvertisementData {
        local_name,
        services,
        manufacturer_data,
        service_data,
        tx_power_level,
        // BlueZ only materializes Device1 objects for connectable devices.
        is_connectable: true,
    }
}
