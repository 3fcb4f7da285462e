//! GATT traffic on one established BlueZ connection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bluer::gatt::remote::CharacteristicWriteRequest;
use bluer::gatt::WriteOp;
use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tracing::trace;

use crate::backend::{Connection, ConnectionEvent, RawCharacteristic, RawDescriptor, RawService, SubscriptionKind};
use crate::error::ErrorKind;
use crate::{CharacteristicProperties, Error, Result, WriteKind};

const ATT_DEFAULT_MTU: u16 = 23;
const IN_PROGRESS_ATTEMPTS: u32 = 5;

pub(super) struct BluezConnection {
    adapter: bluer::Adapter,
    device: Arc<bluer::Device>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    characteristics: Mutex<HashMap<u16, bluer::gatt::remote::Characteristic>>,
    descriptors: Mutex<HashMap<u16, bluer::gatt::remote::Descriptor>>,
    notify_tasks: Mutex<HashMap<u16, tokio::task::JoinHandle<()>>>,
    monitor: tokio::task::JoinHandle<()>,
}

impl BluezConnection {
    pub(super) async fn establish(
        adapter: bluer::Adapter,
        device: Arc<bluer::Device>,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Result<Self> {
        let monitor = tokio::spawn({
            let device = device.clone();
            let events = events.clone();
            async move {
                let Ok(mut device_events) = device.events().await else {
                    let _ = events.send(ConnectionEvent::Disconnected);
                    return;
                };
                // The link may have dropped before the subscription landed.
                if !device.is_connected().await.unwrap_or(false) {
                    let _ = events.send(ConnectionEvent::Disconnected);
                    return;
                }
                while let Some(event) = device_events.next().await {
                    if let bluer::DeviceEvent::PropertyChanged(bluer::DeviceProperty::Connected(false)) = event {
                        break;
                    }
                }
                // Stream end means the device object left the bus; either
                // way the link is gone.
                let _ = events.send(ConnectionEvent::Disconnected);
            }
        });

        Ok(BluezConnection {
            adapter,
            device,
            events,
            characteristics: Mutex::new(HashMap::new()),
            descriptors: Mutex::new(HashMap::new()),
            notify_tasks: Mutex::new(HashMap::new()),
            monitor,
        })
    }

    fn characteristic(&self, handle: u16) -> Result<bluer::gatt::remote::Characteristic> {
        self.characteristics
            .lock()
            .unwrap()
            .get(&handle)
            .cloned()
            .ok_or_else(|| Error::message(ErrorKind::NotFound, format!("no characteristic with handle {handle}")))
    }

    fn descriptor(&self, handle: u16) -> Result<bluer::gatt::remote::Descriptor> {
        self.descriptors
            .lock()
            .unwrap()
            .get(&handle)
            .cloned()
            .ok_or_else(|| Error::message(ErrorKind::NotFound, format!("no descriptor with handle {handle}")))
    }
}

/// Retries a GATT request while bluetoothd reports `InProgress`, with
/// bounded exponential backoff. BlueZ serializes at the GATT layer and
/// rejects rather than queues concurrent requests from one client.
async fn with_in_progress_retry<T, F, Fut>(mut op: F) -> bluer::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bluer::Result<T>>,
{
    let mut delay = Duration::from_millis(20);
    for attempt in 1.. {
        match op().await {
            Err(err) if matches!(err.kind, bluer::ErrorKind::InProgress) && attempt < IN_PROGRESS_ATTEMPTS => {
                trace!(attempt, "GATT request in progress, backing off");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            result => return result,
        }
    }
    unreachable!()
}

#[async_trait]
impl Connection for BluezConnection {
    async fn discover_services(&self, use_cached: bool) -> Result<Vec<RawService>> {
        // bluetoothd resolves the attribute database itself and keeps it
        // under /var/lib/bluetooth; `use_cached` adds nothing here.
        let _ = use_cached;

        let mut characteristics = HashMap::new();
        let mut descriptors = HashMap::new();
        let mut raw_services = Vec::new();

        for service in self.device.services().await? {
            let mut raw_characteristics = Vec::new();
            for characteristic in service.characteristics().await? {
                let mut raw_descriptors = Vec::new();
                for descriptor in characteristic.descriptors().await? {
                    raw_descriptors.push(RawDescriptor {
                        handle: descriptor.id(),
                        uuid: descriptor.uuid().await?,
                    });
                    descriptors.insert(descriptor.id(), descriptor);
                }
                raw_characteristics.push(RawCharacteristic {
                    handle: characteristic.id(),
                    uuid: characteristic.uuid().await?,
                    properties: properties_from_flags(characteristic.flags().await?),
                    descriptors: raw_descriptors,
                });
                characteristics.insert(characteristic.id(), characteristic);
            }
            raw_services.push(RawService {
                handle: service.id(),
                uuid: service.uuid().await?,
                primary: service.primary().await?,
                characteristics: raw_characteristics,
            });
        }

        *self.characteristics.lock().unwrap() = characteristics;
        *self.descriptors.lock().unwrap() = descriptors;
        Ok(raw_services)
    }

    async fn read(&self, handle: u16) -> Result<Vec<u8>> {
        let characteristic = self.characteristic(handle)?;
        with_in_progress_retry(|| characteristic.read()).await.map_err(Into::into)
    }

    async fn write(&self, handle: u16, value: &[u8], kind: WriteKind) -> Result<()> {
        let characteristic = self.characteristic(handle)?;
        match kind {
            WriteKind::WithResponse => with_in_progress_retry(|| characteristic.write(value))
                .await
                .map_err(Into::into),
            WriteKind::WithoutResponse => {
                let request = CharacteristicWriteRequest {
                    op_type: WriteOp::Command,
                    ..Default::default()
                };
                with_in_progress_retry(|| characteristic.write_ext(value, &request))
                    .await
                    .map_err(Into::into)
            }
        }
    }

    async fn read_descriptor(&self, handle: u16) -> Result<Vec<u8>> {
        let descriptor = self.descriptor(handle)?;
        with_in_progress_retry(|| descriptor.read()).await.map_err(Into::into)
    }

    async fn write_descriptor(&self, handle: u16, value: &[u8]) -> Result<()> {
        let descriptor = self.descriptor(handle)?;
        with_in_progress_retry(|| descriptor.write(value))
            .await
            .map_err(Into::into)
    }

    async fn subscribe(&self, handle: u16, kind: SubscriptionKind) -> Result<()> {
        if kind == SubscriptionKind::Indicate {
            trace!(handle, "bluetoothd picks notify or indicate itself on StartNotify");
        }
        let characteristic = self.characteristic(handle)?;
        let events = self.events.clone();
        let (ready_tx, ready_rx) = oneshot::channel();

        // The notification stream borrows the characteristic, so both live
        // on the pump task.
        let task = tokio::spawn(async move {
            match with_in_progress_retry(|| characteristic.notify()).await {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    let mut stream = Box::pin(stream);
                    while let Some(value) = stream.next().await {
                        if events.send(ConnectionEvent::Notification { handle, value }).is_err() {
                            break;
                        }
                    }
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                }
            }
        });

        let ready = ready_rx
            .await
            .map_err(|_| Error::message(ErrorKind::Internal, "notification pump exited unexpectedly"))?;
        match ready {
            Ok(()) => {
                if let Some(previous) = self.notify_tasks.lock().unwrap().insert(handle, task) {
                    previous.abort();
                }
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn unsubscribe(&self, handle: u16) -> Result<()> {
        // Dropping the notification stream ends the BlueZ notify session.
        if let Some(task) = self.notify_tasks.lock().unwrap().remove(&handle) {
            task.abort();
        }
        Ok(())
    }

    async fn mtu(&self) -> Result<u16> {
        // The D-Bus GATT API does not surface the negotiated ATT MTU (it is
        // only observable on acquired write/notify file descriptors), so
        // writes without response are bounded by the ATT default.
        Ok(ATT_DEFAULT_MTU)
    }

    async fn pair(&self) -> Result<()> {
        if self.device.is_paired().await? {
            return Ok(());
        }
        self.device
            .pair()
            .await
            .map_err(|err| Error::new(ErrorKind::PairingFailed, Some(Box::new(err)), String::new()))
    }

    async fn unpair(&self) -> Result<()> {
        let address = self.device.address();
        if self.device.is_connected().await.unwrap_or(false) {
            let _ = self.device.disconnect().await;
        }
        self.adapter.remove_device(address).await.map_err(Into::into)
    }

    async fn disconnect(&self) -> Result<()> {
        self.device.disconnect().await.map_err(Into::into)
    }
}

impl Drop for BluezConnection {
    fn drop(&mut self) {
        self.monitor.abort();
        for (_, task) in self.notify_tasks.lock().unwrap().drain() {
            task.abort();
        }
    }
}

fn properties_from_flags(flags: bluer::gatt::CharacteristicFlags) -> CharacteristicProperties {
    CharacteristicProperties {
        broadcast: flags.broadcast,
        read: flags.read,
        write_without_response: flags.write_without_response,
        write: flags.write,
        notify: flags.notify,
        indicate: flags.indicate,
        authenticated_signed_writes: flags.authenticated_signed_writes,
        extended_properties: flags.extended_properties,
    }
}
