//! The Windows backend, built on the WinRT Bluetooth APIs.

mod connection;
mod error;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use smallvec::SmallVec;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;
use windows::Devices::Bluetooth::Advertisement::{
    BluetoothLEAdvertisementDataSection, BluetoothLEAdvertisementReceivedEventArgs, BluetoothLEAdvertisementWatcher,
    BluetoothLEAdvertisementWatcherStoppedEventArgs, BluetoothLEScanningMode,
};
use windows::Devices::Bluetooth::BluetoothAddressType;
use windows::Foundation::Collections::IVector;
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::DataReader;

use crate::backend::{Backend, ConnectOptions, Connection, ConnectionEvent, ScanEvent, ScanFilter};
use crate::btuuid::BluetoothUuidExt;
use crate::error::ErrorKind;
use crate::util::event_log;
use crate::{Address, AddressType, AdvertisementData, DeviceId, Error, Result, ScanningMode};

use self::connection::WinrtConnection;

pub(crate) struct WinrtBackend {
    scan: Mutex<Option<ScanState>>,
}

struct ScanState {
    watcher: BluetoothLEAdvertisementWatcher,
    received_token: i64,
    stopped_token: i64,
}

impl WinrtBackend {
    pub(crate) async fn new() -> Result<Arc<Self>> {
        Ok(Arc::new(WinrtBackend {
            scan: Mutex::new(None),
        }))
    }
}

#[async_trait]
impl Backend for WinrtBackend {
    async fn scan_start(&self, filter: ScanFilter, events: mpsc::UnboundedSender<ScanEvent>) -> Result<()> {
        let mut scan = self.scan.lock().unwrap();
        if scan.is_some() {
            return Err(ErrorKind::AlreadyScanning.into());
        }

        let watcher = BluetoothLEAdvertisementWatcher::new()?;
        watcher.SetScanningMode(match filter.mode {
            ScanningMode::Active => BluetoothLEScanningMode::Active,
            ScanningMode::Passive => BluetoothLEScanningMode::Passive,
        })?;

        // Service filtering is applied in-process by the scanner core: the
        // watcher's advertisement filter drops scan responses that repeat
        // the filtered UUID, losing their local names.
        let received_token = watcher.Received(&TypedEventHandler::new(
            move |_watcher, event_args: &Option<BluetoothLEAdvertisementReceivedEventArgs>| {
                let event_args = event_args
                    .as_ref()
                    .expect("BluetoothLEAdvertisementReceivedEventArgs was null in Received handler");
                match scan_event(event_args) {
                    Ok(event) => {
                        let _ = events.send(event);
                    }
                    Err(err) => event_log!(%err, "discarding malformed advertisement"),
                }
                Ok(())
            },
        ))?;
        let stopped_token = watcher.Stopped(&TypedEventHandler::new(
            move |_watcher, event_args: &Option<BluetoothLEAdvertisementWatcherStoppedEventArgs>| {
                if let Some(event_args) = event_args {
                    if let Ok(error) = event_args.Error() {
                        warn!(?error, "advertisement watcher stopped");
                    }
                }
                Ok(())
            },
        ))?;

        watcher.Start()?;
        debug!("advertisement watcher started");
        *scan = Some(ScanState {
            watcher,
            received_token,
            stopped_token,
        });
        Ok(())
    }

    async fn scan_stop(&self) -> Result<()> {
        if let Some(state) = self.scan.lock().unwrap().take() {
            let _ = state.watcher.RemoveReceived(state.received_token);
            let _ = state.watcher.RemoveStopped(state.stopped_token);
            state.watcher.Stop()?;
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
        let DeviceId::Address { address, kind } = id else {
            return Err(Error::message(
                ErrorKind::InvalidParameter,
                "Windows identifies devices by Bluetooth address",
            ));
        };
        let connection = WinrtConnection::establish(*address, *kind, timeout, events).await?;
        Ok(Box::new(connection))
    }

    fn kind(&self) -> &'static str {
        "winrt"
    }
}

fn scan_event(event_args: &BluetoothLEAdvertisementReceivedEventArgs) -> windows::core::Result<ScanEvent> {
    let raw_address = event_args.BluetoothAddress()?;
    let kind = match event_args.BluetoothAddressType()? {
        BluetoothAddressType::Random => AddressType::Random,
        _ => AddressType::Public,
    };
    let rssi = event_args.RawSignalStrengthInDBm()?;

    Ok(ScanEvent {
        id: DeviceId::Address {
            address: address_from_u64(raw_address),
            kind,
        },
        os_name: None,
        advertisement: advertisement_data(event_args),
        rssi,
    })
}

pub(crate) fn address_from_u64(address: u64) -> Address {
    let bytes = address.to_be_bytes();
    Address::new([bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7]])
}

pub(crate) fn address_to_u64(address: Address) -> u64 {
    let bytes = address.into_bytes();
    u64::from_be_bytes([0, 0, bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5]])
}

fn advertisement_data(event_args: &BluetoothLEAdvertisementReceivedEventArgs) -> AdvertisementData {
    let is_connectable = event_args.IsConnectable().unwrap_or(false);
    let tx_power_level = event_args
        .TransmitPowerLevelInDBm()
        .ok()
        .and_then(|power| power.Value().ok())
        .map(i16::from);

    let mut data = AdvertisementData {
        local_name: None,
        services: SmallVec::new(),
        manufacturer_data: HashMap::new(),
        service_data: HashMap::new(),
        tx_power_level,
        is_connectable,
    };

    let Ok(advertisement) = event_args.Advertisement() else {
        return data;
    };

    data.local_name = advertisement
        .LocalName()
        .ok()
        .and_then(|name| (!name.is_empty()).then(|| name.to_string_lossy()));

    if let Ok(manufacturer_data) = advertisement.ManufacturerData() {
        for entry in manufacturer_data {
            let Ok(company_id) = entry.CompanyId() else { continue };
            let Ok(buffer) = entry.Data() else { continue };
            if let Ok(value) = read_buffer(&buffer) {
                data.manufacturer_data.insert(company_id, value);
            }
        }
    }

    if let Ok(services) = advertisement.ServiceUuids() {
        data.services = services
            .into_iter()
            .map(|uuid| Uuid::from_u128(uuid.to_u128()))
            .collect();
    }

    if let Ok(data_sections) = advertisement.DataSections() {
        if let Ok(service_data) = to_service_data(&data_sections) {
            data.service_data = service_data;
        }
    }

    data
}

fn read_buffer(buffer: &windows::Storage::Streams::IBuffer) -> windows::core::Result<SmallVec<[u8; 16]>> {
    let mut value = SmallVec::from_elem(0, buffer.Length()? as usize);
    let reader = DataReader::FromBuffer(buffer)?;
    reader.ReadBytes(value.as_mut_slice())?;
    Ok(value)
}

#[derive(Debug, Clone, Copy)]
enum UuidKind {
    U16,
    U32,
    U128,
}

fn read_uuid(reader: &DataReader, kind: UuidKind) -> windows::core::Result<Uuid> {
    Ok(match kind {
        UuidKind::U16 => Uuid::from_u16(reader.ReadUInt16()?),
        UuidKind::U32 => Uuid::from_u32(reader.ReadUInt32()?),
        UuidKind::U128 => {
            let mut uuid = [0u8; 16];
            reader.ReadBytes(&mut uuid)?;
            Uuid::from_bytes(uuid)
        }
    })
}

fn to_service_data(
    data_sections: &IVector<BluetoothLEAdvertisementDataSection>,
) -> windows::core::Result<HashMap<Uuid, SmallVec<[u8; 16]>>> {
    let mut service_data = HashMap::new();

    for data in data_sections {
        let kind = match data.DataType()? {
            0x16 => Some(UuidKind::U16),
            0x20 => Some(UuidKind::U32),
            0x21 => Some(UuidKind::U128),
            _ => None,
        };

        if let Some(kind) = kind {
            let buf = data.Data()?;
            let reader = DataReader::FromBuffer(&buf)?;
            if let Ok(uuid) = read_uuid(&reader, kind) {
                let len = reader.UnconsumedBufferLength()? as usize;
                let mut value = SmallVec::from_elem(0, len);
                reader.ReadBytes(value.as_mut_slice())?;
                service_data.insert(uuid, value);
            }
        }
    }

    Ok(service_data)
}
