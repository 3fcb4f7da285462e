//! The macOS/iOS backend on CoreBluetooth.

mod confined;
mod connection;
mod delegates;
mod error;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use objc2::rc::Retained;
use objc2::runtime::ProtocolObject;
use objc2_core_bluetooth::{
    CBAdvertisementDataIsConnectable, CBAdvertisementDataLocalNameKey, CBAdvertisementDataManufacturerDataKey,
    CBAdvertisementDataOverflowServiceUUIDsKey, CBAdvertisementDataServiceDataKey, CBAdvertisementDataServiceUUIDsKey,
    CBAdvertisementDataTxPowerLevelKey, CBCentralManager, CBDescriptor, CBManagerState, CBPeripheral, CBUUID,
};
use objc2_foundation::{NSArray, NSData, NSDictionary, NSNumber, NSProcessInfo, NSString, NSUUID};
use smallvec::SmallVec;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::{Backend, ConnectOptions, Connection, ConnectionEvent, ScanEvent, ScanFilter};
use crate::btuuid::BluetoothUuidExt;
use crate::error::ErrorKind;
use crate::{AdvertisementData, DeviceId, Error, Result, ScanningMode};

use self::connection::CbConnection;
use self::delegates::{CentralDelegate, CentralEvent};
use self::confined::Confined;

const POWER_ON_WAIT: Duration = Duration::from_secs(5);

pub(crate) struct CoreBluetoothBackend {
    central: Confined<CBCentralManager>,
    delegate: Confined<CentralDelegate>,
    scan: Mutex<Option<tokio::task::JoinHandle<()>>>,
    /// Peripherals seen while scanning, retained so `connect` can resolve a
    /// [`DeviceId::Uuid`] back to its `CBPeripheral`.
    peripherals: Arc<Mutex<HashMap<Uuid, Confined<CBPeripheral>>>>,
}

impl CoreBluetoothBackend {
    pub(crate) async fn new() -> Result<Arc<Self>> {
        let (central, delegate) = {
            let delegate = CentralDelegate::new();
            let central = unsafe {
                let proto = ProtocolObject::from_ref(&*delegate);
                CBCentralManager::initWithDelegate_queue(CBCentralManager::alloc(), Some(proto), Some(confined::queue()))
            };
            unsafe { (Confined::hold(central), Confined::hold(delegate)) }
        };
        Ok(Arc::new(CoreBluetoothBackend {
            central,
            delegate,
            scan: Mutex::new(None),
            peripherals: Arc::new(Mutex::new(HashMap::new())),
        }))
    }

    fn state(&self) -> CBManagerState {
        self.central.with(|central| unsafe { central.state() })
    }

    /// Waits for the central manager to report a definitive power state.
    /// The state is unknown until the first delegate callback arrives.
    async fn ensure_powered(&self) -> Result<()> {
        let mut events = self.delegate.with(|delegate| delegate.subscribe());
        if self.state() == CBManagerState::PoweredOn {
            return Ok(());
        }
        tokio::time::timeout(POWER_ON_WAIT, async {
            loop {
                match events.recv().await {
                    Ok(CentralEvent::StateChanged) => match self.state() {
                        CBManagerState::PoweredOn => return Ok(()),
                        CBManagerState::PoweredOff => return Err(Error::from(ErrorKind::AdapterUnavailable)),
                        CBManagerState::Unauthorized => return Err(ErrorKind::NotAuthorized.into()),
                        CBManagerState::Unsupported => return Err(ErrorKind::NotSupported.into()),
                        _ => {}
                    },
                    Ok(_) => {}
                    Err(async_broadcast::RecvError::Overflowed(_)) => {}
                    Err(async_broadcast::RecvError::Closed) => {
                        return Err(Error::message(ErrorKind::Internal, "central event channel closed"))
                    }
                }
            }
        })
        .await
        .map_err(|_| Error::message(ErrorKind::AdapterUnavailable, "Bluetooth did not power on"))?
    }

    fn retrieve_peripheral(&self, uuid: Uuid) -> Option<Confined<CBPeripheral>> {
        self.central.with(|central| unsafe {
            let identifiers = NSArray::from_retained_slice(&[NSUUID::from_bytes(uuid.into_bytes())]);
            let peripherals = central.retrievePeripheralsWithIdentifiers(&identifiers);
            peripherals.firstObject().map(|peripheral| Confined::hold(peripheral))
        })
    }
}

#[async_trait]
impl Backend for CoreBluetoothBackend {
    async fn scan_start(&self, filter: ScanFilter, events: mpsc::UnboundedSender<ScanEvent>) -> Result<()> {
        if self.scan.lock().unwrap().is_some() {
            return Err(ErrorKind::AlreadyScanning.into());
        }
        self.ensure_powered().await?;

        if filter.mode == ScanningMode::Passive {
            warn!("passive scanning is not supported by CoreBluetooth; scanning actively");
        }
        if filter.service_uuids.is_empty() && silently_drops_unfiltered_scans() {
            return Err(Error::message(
                ErrorKind::InvalidParameter,
                "macOS 12.0-12.2 reports nothing without a service UUID filter; provide service_uuids",
            ));
        }

        let mut central_events = self.delegate.with(|delegate| delegate.subscribe());
        let peripherals = self.peripherals.clone();
        let task = tokio::spawn(async move {
            loop {
                match central_events.recv().await {
                    Ok(CentralEvent::Discovered {
                        peripheral,
                        advertisement,
                        rssi,
                    }) => {
                        let (uuid, os_name) = peripheral.with(|peripheral| unsafe {
                            (
                                uuid_from_nsuuid(&peripheral.identifier()),
                                peripheral.name().map(|name| name.to_string()),
                            )
                        });
                        peripherals.lock().unwrap().insert(uuid, peripheral);
                        if events
                            .send(ScanEvent {
                                id: DeviceId::Uuid(uuid),
                                os_name,
                                advertisement,
                                rssi,
                            })
                            .is_err()
                        {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(async_broadcast::RecvError::Overflowed(missed)) => {
                        warn!(missed, "advertisement events dropped");
                    }
                    Err(async_broadcast::RecvError::Closed) => break,
                }
            }
        });

        // The CBUUID array is built inside the queue hop: Retained
        // Objective-C values cannot cross threads on their own.
        let service_uuids = filter.service_uuids.clone();
        self.central.with(move |central| unsafe {
            let services = (!service_uuids.is_empty()).then(|| {
                let uuids: Vec<Retained<CBUUID>> =
                    service_uuids.iter().map(|uuid| cbuuid_from_uuid(*uuid)).collect();
                NSArray::from_retained_slice(&uuids)
            });
            central.scanForPeripheralsWithServices_options(services.as_deref(), None);
        });

        debug!("scanning for peripherals");
        *self.scan.lock().unwrap() = Some(task);
        Ok(())
    }

    async fn scan_stop(&self) -> Result<()> {
        if let Some(task) = self.scan.lock().unwrap().take() {
            self.central.with(|central| unsafe { central.stopScan() });
            task.abort();
        }
        Ok(())
    }

    async fn connect(
        &self,
        id: &DeviceId,
        timeout: Duration,
        events: mpsc::UnboundedSender<ConnectionEvent>,
        options: &ConnectOptions,
    ) -> Result<Box<dyn Connection>> {
        let DeviceId::Uuid(uuid) = id else {
            return Err(Error::message(
                ErrorKind::InvalidParameter,
                "CoreBluetooth identifies devices by their host-local UUID",
            ));
        };
        self.ensure_powered().await?;

        let peripheral = self
            .peripherals
            .lock()
            .unwrap()
            .get(uuid)
            .cloned()
            .or_else(|| self.retrieve_peripheral(*uuid))
            .ok_or_else(|| Error::message(ErrorKind::DeviceNotFound, format!("unknown peripheral {uuid}")))?;

        let mut central_events = self.delegate.with(|delegate| delegate.subscribe());
        {
            let peripheral = peripheral.clone();
            self.central.with(move |central| unsafe {
                central.connectPeripheral_options(peripheral.get(), None);
            });
        }

        let connected = tokio::time::timeout(timeout, async {
            loop {
                match central_events.recv().await {
                    Ok(CentralEvent::Connect { peripheral: connected }) if connected == peripheral => return Ok(()),
                    Ok(CentralEvent::ConnectFailed {
                        peripheral: failed,
                        error,
                    }) if failed == peripheral => {
                        return Err(error
                            .map(error::from_nserror)
                            .unwrap_or_else(|| ErrorKind::ConnectionFailed.into()));
                    }
                    Ok(_) => {}
                    Err(async_broadcast::RecvError::Overflowed(_)) => {}
                    Err(async_broadcast::RecvError::Closed) => {
                        return Err(Error::message(ErrorKind::Internal, "central event channel closed"))
                    }
                }
            }
        })
        .await;
        match connected {
            Ok(result) => result?,
            Err(_) => {
                let peripheral = peripheral.clone();
                self.central.with(move |central| unsafe {
                    central.cancelPeripheralConnection(peripheral.get());
                });
                return Err(Error::message(ErrorKind::Timeout, "the connection attempt timed out"));
            }
        }

        let connection = CbConnection::establish(
            self.central.clone(),
            self.delegate.with(|delegate| delegate.subscribe()),
            peripheral,
            events,
            options.notification_discriminator.clone(),
        )?;
        Ok(Box::new(connection))
    }

    fn kind(&self) -> &'static str {
        "corebluetooth"
    }
}

/// macOS 12.0 through 12.2 silently report no advertisements when scanning
/// without a service UUID filter.
fn silently_drops_unfiltered_scans() -> bool {
    #[cfg(target_os = "macos")]
    {
        let version = NSProcessInfo::processInfo().operatingSystemVersion();
        version.majorVersion == 12 && version.minorVersion <= 2
    }
    #[cfg(not(target_os = "macos"))]
    {
        false
    }
}

pub(super) fn uuid_from_nsuuid(nsuuid: &NSUUID) -> Uuid {
    Uuid::from_bytes(nsuuid.as_bytes())
}

pub(super) fn uuid_from_cbuuid(cbuuid: &CBUUID) -> Uuid {
    unsafe { Uuid::from_bluetooth_bytes(cbuuid.data().as_bytes_unchecked()) }
}

pub(super) fn cbuuid_from_uuid(uuid: Uuid) -> Retained<CBUUID> {
    unsafe { CBUUID::UUIDWithData(&NSData::with_bytes(uuid.as_bluetooth_bytes())) }
}

fn advertisement_from_nsdictionary(adv_data: &NSDictionary<NSString>) -> AdvertisementData {
    let is_connectable = adv_data
        .objectForKey(unsafe { CBAdvertisementDataIsConnectable })
        .is_some_and(|val| val.downcast_ref::<NSNumber>().map(|b| b.as_bool()).unwrap_or(false));

    let local_name = adv_data
        .objectForKey(unsafe { CBAdvertisementDataLocalNameKey })
        .and_then(|val| val.downcast_ref::<NSString>().map(|s| s.to_string()));

    // CoreBluetooth surfaces a single manufacturer data blob; the leading
    // two octets are the company identifier.
    let manufacturer_data = adv_data
        .objectForKey(unsafe { CBAdvertisementDataManufacturerDataKey })
        .and_then(|val| val.downcast_ref::<NSData>().map(|v| v.to_vec()))
        .and_then(|val| {
            (val.len() >= 2).then(|| {
                (
                    u16::from_le_bytes(val[0..2].try_into().unwrap()),
                    SmallVec::from_slice(&val[2..]),
                )
            })
        })
        .into_iter()
        .collect();

    let tx_power_level: Option<i16> = adv_data
        .objectForKey(unsafe { CBAdvertisementDataTxPowerLevelKey })
        .and_then(|val| val.downcast_ref::<NSNumber>().map(|val| val.shortValue()));

    let service_data = if let Some(val) = adv_data.objectForKey(unsafe { CBAdvertisementDataServiceDataKey }) {
        unsafe {
            if let Some(val) = val.downcast_ref::<NSDictionary>() {
                let mut res = HashMap::with_capacity(val.count());
                for k in val.allKeys() {
                    if let Some(key) = k.downcast_ref::<CBUUID>() {
                        if let Some(val) = val
                            .objectForKey_unchecked(&k)
                            .and_then(|val| val.downcast_ref::<NSData>())
                        {
                            res.insert(uuid_from_cbuuid(key), SmallVec::from_slice(val.as_bytes_unchecked()));
                        }
                    }
                }
                res
            } else {
                HashMap::new()
            }
        }
    } else {
        HashMap::new()
    };

    let services = adv_data
        .objectForKey(unsafe { CBAdvertisementDataServiceUUIDsKey })
        .into_iter()
        .chain(adv_data.objectForKey(unsafe { CBAdvertisementDataOverflowServiceUUIDsKey }))
        .flat_map(|x| x.downcast::<NSArray>())
        .flatten()
        .flat_map(|obj| obj.downcast::<CBUUID>())
        .map(|uuid| uuid_from_cbuuid(&uuid))
        .collect();

    AdvertisementData {
        local_name,
        services,
        manufacturer_data,
        service_data,
        tx_power_level,
        is_connectable,
    }
}

fn descriptor_value(descriptor: &CBDescriptor) -> Vec<u8> {
    // Descriptor values surface as NSData, NSString, or NSNumber depending
    // on the descriptor type.
    unsafe {
        match descriptor.value() {
            Some(value) => {
                if let Some(data) = value.downcast_ref::<NSData>() {
                    data.as_bytes_unchecked().to_vec()
                } else if let Some(string) = value.downcast_ref::<NSString>() {
                    string.to_string().into_bytes()
                } else if let Some(number) = value.downcast_ref::<NSNumber>() {
                    number.unsignedShortValue().to_le_bytes().to_vec()
                } else {
                    Vec::new()
                }
            }
            None => Vec::new(),
        }
    }
}
