//! GATT traffic on one established CoreBluetooth connection.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use objc2::runtime::ProtocolObject;
use objc2_core_bluetooth::{
    CBCentralManager, CBCharacteristic, CBCharacteristicProperties, CBCharacteristicWriteType, CBDescriptor,
    CBPeripheral, CBService,
};
use objc2_foundation::NSData;
use tokio::sync::{mpsc, oneshot};
use tracing::{trace, warn};

use crate::backend::{
    Connection, ConnectionEvent, NotificationDiscriminator, RawCharacteristic, RawDescriptor, RawService,
    SubscriptionKind,
};
use crate::error::ErrorKind;
use crate::{CharacteristicProperties, Error, Result, WriteKind};

use super::delegates::{CentralEvent, PeripheralDelegate, PeripheralEvent};
use super::confined::Confined;
use super::error::from_nserror;
use super::{uuid_from_cbuuid, descriptor_value};

pub(super) struct CbConnection {
    central: Confined<CBCentralManager>,
    peripheral: Confined<CBPeripheral>,
    delegate: Confined<PeripheralDelegate>,
    shared: Arc<Shared>,
    monitor: tokio::task::JoinHandle<()>,
    router: tokio::task::JoinHandle<()>,
}

/// State shared with the value router task.
struct Shared {
    events: mpsc::UnboundedSender<ConnectionEvent>,
    discriminator: Option<NotificationDiscriminator>,
    char_handles: Mutex<HashMap<Confined<CBCharacteristic>, u16>>,
    desc_handles: Mutex<HashMap<Confined<CBDescriptor>, u16>>,
    characteristics: Mutex<HashMap<u16, Confined<CBCharacteristic>>>,
    descriptors: Mutex<HashMap<u16, Confined<CBDescriptor>>>,
    subscribed: Mutex<HashSet<u16>>,
    pending: Mutex<Pending>,
}

#[derive(Default)]
struct Pending {
    char_reads: HashMap<u16, oneshot::Sender<Result<Vec<u8>>>>,
    char_writes: HashMap<u16, oneshot::Sender<Result<()>>>,
    desc_reads: HashMap<u16, oneshot::Sender<Result<Vec<u8>>>>,
    desc_writes: HashMap<u16, oneshot::Sender<Result<()>>>,
    notify_state: HashMap<u16, oneshot::Sender<Result<()>>>,
}

impl CbConnection {
    pub(super) fn establish(
        central: Confined<CBCentralManager>,
        mut central_events: async_broadcast::Receiver<CentralEvent>,
        peripheral: Confined<CBPeripheral>,
        events: mpsc::UnboundedSender<ConnectionEvent>,
        discriminator: Option<NotificationDiscriminator>,
    ) -> Result<Self> {
        let delegate = PeripheralDelegate::new();
        let mut peripheral_events = delegate.subscribe();
        let delegate = unsafe { Confined::hold(delegate) };
        {
            let peripheral = peripheral.clone();
            let delegate = delegate.clone();
            super::confined::on_queue(move || unsafe {
                peripheral
                    .get()
                    .setDelegate(Some(ProtocolObject::from_ref(delegate.get())));
            });
        }

        let shared = Arc::new(Shared {
            events: events.clone(),
            discriminator,
            char_handles: Mutex::new(HashMap::new()),
            desc_handles: Mutex::new(HashMap::new()),
            characteristics: Mutex::new(HashMap::new()),
            descriptors: Mutex::new(HashMap::new()),
            subscribed: Mutex::new(HashSet::new()),
            pending: Mutex::new(Pending::default()),
        });

        let monitor = tokio::spawn({
            let peripheral = peripheral.clone();
            async move {
                loop {
                    match central_events.recv().await {
                        Ok(CentralEvent::Disconnect {
                            peripheral: disconnected,
                            ..
                        }) if disconnected == peripheral => break,
                        Ok(_) | Err(async_broadcast::RecvError::Overflowed(_)) => {}
                        Err(async_broadcast::RecvError::Closed) => break,
                    }
                }
                let _ = events.send(ConnectionEvent::Disconnected);
            }
        });

        let router = tokio::spawn({
            let shared = shared.clone();
            async move {
                loop {
                    match peripheral_events.recv().await {
                        Ok(event) => shared.route(event),
                        Err(async_broadcast::RecvError::Overflowed(missed)) => {
                            warn!(missed, "peripheral events dropped");
                        }
                        Err(async_broadcast::RecvError::Closed) => break,
                    }
                }
            }
        });

        Ok(CbConnection {
            central,
            peripheral,
            delegate,
            shared,
            monitor,
            router,
        })
    }

    fn characteristic(&self, handle: u16) -> Result<Confined<CBCharacteristic>> {
        self.shared
            .characteristics
            .lock()
            .unwrap()
            .get(&handle)
            .cloned()
            .ok_or_else(|| Error::message(ErrorKind::NotFound, format!("no characteristic with handle {handle}")))
    }

    fn descriptor(&self, handle: u16) -> Result<Confined<CBDescriptor>> {
        self.shared
            .descriptors
            .lock()
            .unwrap()
            .get(&handle)
            .cloned()
            .ok_or_else(|| Error::message(ErrorKind::NotFound, format!("no descriptor with handle {handle}")))
    }

    async fn await_peripheral_event<F, T>(&self, mut events: async_broadcast::Receiver<PeripheralEvent>, mut matcher: F) -> Result<T>
    where
        F: FnMut(PeripheralEvent) -> Option<Result<T>> + Send,
        T: Send,
    {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(result) = matcher(event) {
                        return result;
                    }
                }
                Err(async_broadcast::RecvError::Overflowed(_)) => {}
                Err(async_broadcast::RecvError::Closed) => {
                    return Err(Error::message(ErrorKind::Internal, "peripheral event channel closed"))
                }
            }
        }
    }
}

impl Shared {
    /// Routes delegate events to pending operations and subscriptions.
    ///
    /// CoreBluetooth conflates read responses and notifications into one
    /// value-update callback. A value update for a subscribed characteristic
    /// with a read outstanding is resolved by the user's discriminator
    /// predicate; without one, the read wins and the value completes it.
    fn route(&self, event: PeripheralEvent) {
        match event {
            PeripheralEvent::CharacteristicValueUpdate {
                characteristic,
                value,
                error,
            } => {
                let Some(handle) = self.char_handles.lock().unwrap().get(&characteristic).copied() else {
                    return;
                };
                let subscribed = self.subscribed.lock().unwrap().contains(&handle);
                let mut pending = self.pending.lock().unwrap();

                if pending.char_reads.contains_key(&handle) {
                    let is_notification = subscribed
                        && error.is_none()
                        && self
                            .discriminator
                            .as_ref()
                            .is_some_and(|discriminator| discriminator(&value));
                    if !is_notification {
                        if let Some(waiter) = pending.char_reads.remove(&handle) {
                            let _ = waiter.send(match error {
                                Some(error) => Err(from_nserror(error)),
                                None => Ok(value),
                            });
                        }
                        return;
                    }
                }
                drop(pending);

                if subscribed && error.is_none() {
                    let _ = self.events.send(ConnectionEvent::Notification { handle, value });
                }
            }
            PeripheralEvent::CharacteristicValueWrite { characteristic, error } => {
                let Some(handle) = self.char_handles.lock().unwrap().get(&characteristic).copied() else {
                    return;
                };
                if let Some(waiter) = self.pending.lock().unwrap().char_writes.remove(&handle) {
                    let _ = waiter.send(result_from_error(error));
                }
            }
            PeripheralEvent::NotificationStateUpdate { characteristic, error } => {
                let Some(handle) = self.char_handles.lock().unwrap().get(&characteristic).copied() else {
                    return;
                };
                if let Some(waiter) = self.pending.lock().unwrap().notify_state.remove(&handle) {
                    let _ = waiter.send(result_from_error(error));
                }
            }
            PeripheralEvent::DescriptorValueUpdate {
                descriptor,
                value,
                error,
            } => {
                let Some(handle) = self.desc_handles.lock().unwrap().get(&descriptor).copied() else {
                    return;
                };
                if let Some(waiter) = self.pending.lock().unwrap().desc_reads.remove(&handle) {
                    let _ = waiter.send(match error {
                        Some(error) => Err(from_nserror(error)),
                        None => Ok(value),
                    });
                }
            }
            PeripheralEvent::DescriptorValueWrite { descriptor, error } => {
                let Some(handle) = self.desc_handles.lock().unwrap().get(&descriptor).copied() else {
                    return;
                };
                if let Some(waiter) = self.pending.lock().unwrap().desc_writes.remove(&handle) {
                    let _ = waiter.send(result_from_error(error));
                }
            }
            _ => {}
        }
    }
}

fn result_from_error(error: Option<objc2::rc::Retained<objc2_foundation::NSError>>) -> Result<()> {
    match error {
        Some(error) => Err(from_nserror(error)),
        None => Ok(()),
    }
}

#[async_trait]
impl Connection for CbConnection {
    async fn discover_services(&self, use_cached: bool) -> Result<Vec<RawService>> {
        // CoreBluetooth always serves discovery from its own cache when it
        // considers it fresh; `use_cached` adds nothing here.
        let _ = use_cached;

        let events = self.delegate.with(|delegate| delegate.subscribe());
        {
            let peripheral = self.peripheral.clone();
            peripheral.clone().with(move |cb_peripheral| unsafe {
                cb_peripheral.discoverServices(None);
                let _ = peripheral;
            });
        }
        self.await_peripheral_event(events, |event| match event {
            PeripheralEvent::DiscoveredServices { error } => Some(result_from_error(error)),
            _ => None,
        })
        .await?;

        let services: Vec<Confined<CBService>> = self.peripheral.with(|peripheral| unsafe {
            peripheral
                .services()
                .map(|services| services.iter().map(|service| Confined::hold(service)).collect())
                .unwrap_or_default()
        });

        // ATT handles are not exposed; synthesize them in discovery order.
        // They are unique per connection, which is all the core requires.
        let mut next_handle: u16 = 1;
        let mut raw_services = Vec::with_capacity(services.len());
        let mut char_handles = HashMap::new();
        let mut desc_handles = HashMap::new();
        let mut characteristics_by_handle = HashMap::new();
        let mut descriptors_by_handle = HashMap::new();

        for service in services {
            let events = self.delegate.with(|delegate| delegate.subscribe());
            {
                let peripheral = self.peripheral.clone();
                let service = service.clone();
                peripheral.clone().with(move |cb_peripheral| unsafe {
                    cb_peripheral.discoverCharacteristics_forService(None, service.get());
                    let _ = peripheral;
                });
            }
            let target = service.clone();
            self.await_peripheral_event(events, move |event| match event {
                PeripheralEvent::DiscoveredCharacteristics { service, error } if service == target => {
                    Some(result_from_error(error))
                }
                _ => None,
            })
            .await?;

            let (service_uuid, primary, characteristics) = service.with(|cb_service| unsafe {
                let characteristics: Vec<Confined<CBCharacteristic>> = cb_service
                    .characteristics()
                    .map(|list| list.iter().map(|c| Confined::hold(c)).collect())
                    .unwrap_or_default();
                (uuid_from_cbuuid(&cb_service.UUID()), cb_service.isPrimary(), characteristics)
            });

            let service_handle = next_handle;
            next_handle += 1;

            let mut raw_characteristics = Vec::with_capacity(characteristics.len());
            for characteristic in characteristics {
                let events = self.delegate.with(|delegate| delegate.subscribe());
                {
                    let peripheral = self.peripheral.clone();
                    let characteristic = characteristic.clone();
                    peripheral.clone().with(move |cb_peripheral| unsafe {
                        cb_peripheral.discoverDescriptorsForCharacteristic(characteristic.get());
                        let _ = peripheral;
                    });
                }
                let target = characteristic.clone();
                self.await_peripheral_event(events, move |event| match event {
                    PeripheralEvent::DiscoveredDescriptors { characteristic, error } if characteristic == target => {
                        Some(result_from_error(error))
                    }
                    _ => None,
                })
                .await?;

                let (char_uuid, properties, descriptors) = characteristic.with(|cb_characteristic| unsafe {
                    let descriptors: Vec<Confined<CBDescriptor>> = cb_characteristic
                        .descriptors()
                        .map(|list| list.iter().map(|d| Confined::hold(d)).collect())
                        .unwrap_or_default();
                    (
                        uuid_from_cbuuid(&cb_characteristic.UUID()),
                        properties_from_cb(cb_characteristic.properties()),
                        descriptors,
                    )
                });

                let char_handle = next_handle;
                next_handle += 1;

                let mut raw_descriptors = Vec::with_capacity(descriptors.len());
                for descriptor in descriptors {
                    let desc_uuid = descriptor.with(|cb_descriptor| unsafe { uuid_from_cbuuid(&cb_descriptor.UUID()) });
                    let desc_handle = next_handle;
                    next_handle += 1;
                    raw_descriptors.push(RawDescriptor {
                        handle: desc_handle,
                        uuid: desc_uuid,
                    });
                    desc_handles.insert(descriptor.clone(), desc_handle);
                    descriptors_by_handle.insert(desc_handle, descriptor);
                }

                raw_characteristics.push(RawCharacteristic {
                    handle: char_handle,
                    uuid: char_uuid,
                    properties,
                    descriptors: raw_descriptors,
                });
                char_handles.insert(characteristic.clone(), char_handle);
                characteristics_by_handle.insert(char_handle, characteristic);
            }

            raw_services.push(RawService {
                handle: service_handle,
                uuid: service_uuid,
                primary,
                characteristics: raw_characteristics,
            });
        }

        *self.shared.char_handles.lock().unwrap() = char_handles;
        *self.shared.desc_handles.lock().unwrap() = desc_handles;
        *self.shared.characteristics.lock().unwrap() = characteristics_by_handle;
        *self.shared.descriptors.lock().unwrap() = descriptors_by_handle;
        Ok(raw_services)
    }

    async fn read(&self, handle: u16) -> Result<Vec<u8>> {
        let characteristic = self.characteristic(handle)?;
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().unwrap().char_reads.insert(handle, tx);

        {
            let peripheral = self.peripheral.clone();
            let characteristic = characteristic.clone();
            peripheral.clone().with(move |cb_peripheral| unsafe {
                cb_peripheral.readValueForCharacteristic(characteristic.get());
                let _ = peripheral;
            });
        }

        rx.await
            .map_err(|_| Error::message(ErrorKind::NotConnected, "the connection was lost"))?
    }

    async fn write(&self, handle: u16, value: &[u8], kind: WriteKind) -> Result<()> {
        let characteristic = self.characteristic(handle)?;
        match kind {
            WriteKind::WithResponse => {
                let (tx, rx) = oneshot::channel();
                self.shared.pending.lock().unwrap().char_writes.insert(handle, tx);
                {
                    let peripheral = self.peripheral.clone();
                    let characteristic = characteristic.clone();
                    peripheral.clone().with(move |cb_peripheral| unsafe {
                        cb_peripheral.writeValue_forCharacteristic_type(
                            &NSData::with_bytes(value),
                            characteristic.get(),
                            CBCharacteristicWriteType::WithResponse,
                        );
                        let _ = peripheral;
                    });
                }
                rx.await
                    .map_err(|_| Error::message(ErrorKind::NotConnected, "the connection was lost"))?
            }
            WriteKind::WithoutResponse => {
                // Completion means "queued by the OS"; CoreBluetooth applies
                // its own backpressure through canSendWriteWithoutResponse.
                let peripheral = self.peripheral.clone();
                let characteristic = characteristic.clone();
                peripheral.clone().with(move |cb_peripheral| unsafe {
                    cb_peripheral.writeValue_forCharacteristic_type(
                        &NSData::with_bytes(value),
                        characteristic.get(),
                        CBCharacteristicWriteType::WithoutResponse,
                    );
                    let _ = peripheral;
                });
                Ok(())
            }
        }
    }

    async fn read_descriptor(&self, handle: u16) -> Result<Vec<u8>> {
        let descriptor = self.descriptor(handle)?;
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().unwrap().desc_reads.insert(handle, tx);

        {
            let peripheral = self.peripheral.clone();
            let descriptor = descriptor.clone();
            peripheral.clone().with(move |cb_peripheral| unsafe {
                cb_peripheral.readValueForDescriptor(descriptor.get());
                let _ = peripheral;
            });
        }

        rx.await
            .map_err(|_| Error::message(ErrorKind::NotConnected, "the connection was lost"))?
    }

    async fn write_descriptor(&self, handle: u16, value: &[u8]) -> Result<()> {
        let descriptor = self.descriptor(handle)?;
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().unwrap().desc_writes.insert(handle, tx);

        {
            let peripheral = self.peripheral.clone();
            let descriptor = descriptor.clone();
            peripheral.clone().with(move |cb_peripheral| unsafe {
                cb_peripheral.writeValue_forDescriptor(&NSData::with_bytes(value), descriptor.get());
                let _ = peripheral;
            });
        }

        rx.await
            .map_err(|_| Error::message(ErrorKind::NotConnected, "the connection was lost"))?
    }

    async fn subscribe(&self, handle: u16, kind: SubscriptionKind) -> Result<()> {
        if kind == SubscriptionKind::Indicate {
            trace!(handle, "CoreBluetooth picks notify or indicate itself");
        }
        let characteristic = self.characteristic(handle)?;
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().unwrap().notify_state.insert(handle, tx);

        {
            let peripheral = self.peripheral.clone();
            let characteristic = characteristic.clone();
            peripheral.clone().with(move |cb_peripheral| unsafe {
                cb_peripheral.setNotifyValue_forCharacteristic(true, characteristic.get());
                let _ = peripheral;
            });
        }

        rx.await
            .map_err(|_| Error::message(ErrorKind::NotConnected, "the connection was lost"))??;
        self.shared.subscribed.lock().unwrap().insert(handle);
        Ok(())
    }

    async fn unsubscribe(&self, handle: u16) -> Result<()> {
        let characteristic = self.characteristic(handle)?;
        self.shared.subscribed.lock().unwrap().remove(&handle);

        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().unwrap().notify_state.insert(handle, tx);
        {
            let peripheral = self.peripheral.clone();
            let characteristic = characteristic.clone();
            peripheral.clone().with(move |cb_peripheral| unsafe {
                cb_peripheral.setNotifyValue_forCharacteristic(false, characteristic.get());
                let _ = peripheral;
            });
        }

        rx.await
            .map_err(|_| Error::message(ErrorKind::NotConnected, "the connection was lost"))?
    }

    async fn mtu(&self) -> Result<u16> {
        // maximumWriteValueLengthForType already subtracts the ATT write
        // overhead; add it back to report the plain MTU.
        let max_write = self.peripheral.with(|peripheral| unsafe {
            peripheral.maximumWriteValueLengthForType(CBCharacteristicWriteType::WithoutResponse)
        });
        Ok(max_write.min(u16::MAX as usize - 3) as u16 + 3)
    }

    async fn pair(&self) -> Result<()> {
        Err(Error::message(
            ErrorKind::NotSupported,
            "CoreBluetooth pairs on demand when a protected characteristic is accessed",
        ))
    }

    async fn unpair(&self) -> Result<()> {
        Err(Error::message(
            ErrorKind::NotSupported,
            "unpairing is only available from the system Bluetooth settings on Apple platforms",
        ))
    }

    async fn disconnect(&self) -> Result<()> {
        let peripheral = self.peripheral.clone();
        self.central.with(move |central| unsafe {
            central.cancelPeripheralConnection(peripheral.get());
        });
        Ok(())
    }
}

impl Drop for CbConnection {
    fn drop(&mut self) {
        self.monitor.abort();
        self.router.abort();
        self.peripheral.with(|peripheral| unsafe {
            peripheral.setDelegate(None);
        });
    }
}

fn properties_from_cb(properties: CBCharacteristicProperties) -> CharacteristicProperties {
    CharacteristicProperties::from_bits(properties.0 as u8)
}
