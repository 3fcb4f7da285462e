//! GATT traffic on one established WinRT connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic, GattClientCharacteristicConfigurationDescriptorValue, GattCommunicationStatus,
    GattDescriptor, GattSession, GattValueChangedEventArgs, GattWriteOption,
};
use windows::Devices::Bluetooth::{
    BluetoothAddressType, BluetoothCacheMode, BluetoothConnectionStatus, BluetoothLEDevice,
};
use windows::Devices::Enumeration::DevicePairingResultStatus;
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::{DataReader, DataWriter};

use crate::backend::{Connection, ConnectionEvent, RawCharacteristic, RawDescriptor, RawService, SubscriptionKind};
use crate::error::ErrorKind;
use crate::{AddressType, CharacteristicProperties, Error, Result, WriteKind};

use super::error::{check_communication_status, is_object_closed};

/// Windows tears connections down lazily; an orderly disconnect can take up
/// to two minutes to be observable.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(120);

const CONNECT_ATTEMPTS: u32 = 2;

pub(super) struct WinrtConnection {
    device: BluetoothLEDevice,
    session: GattSession,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    characteristics: Mutex<HashMap<u16, GattCharacteristic>>,
    descriptors: Mutex<HashMap<u16, GattDescriptor>>,
    value_changed_tokens: Mutex<HashMap<u16, i64>>,
    status_token: i64,
    disconnected_sent: Arc<AtomicBool>,
}

impl WinrtConnection {
    pub(super) async fn establish(
        address: crate::Address,
        kind: AddressType,
        _timeout: Duration,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Result<Self> {
        let raw_address = super::address_to_u64(address);
        let address_type = match kind {
            AddressType::Public => BluetoothAddressType::Public,
            AddressType::Random => BluetoothAddressType::Random,
        };

        // The device object occasionally comes back already closed when the
        // OS is tearing down a previous session for the same address.
        let mut attempt = 1;
        let device = loop {
            match BluetoothLEDevice::FromBluetoothAddressWithBluetoothAddressTypeAsync(raw_address, address_type)?.await
            {
                Ok(device) => break device,
                Err(err) if attempt < CONNECT_ATTEMPTS && is_object_closed(&err) => {
                    debug!(%err, attempt, "device object closed during connection, retrying");
                    attempt += 1;
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                Err(err) => return Err(err.into()),
            }
        };

        let session = GattSession::FromDeviceIdAsync(&device.BluetoothDeviceId()?)?.await?;
        session.SetMaintainConnection(true)?;

        let disconnected_sent = Arc::new(AtomicBool::new(false));
        let status_token = device.ConnectionStatusChanged(&TypedEventHandler::new({
            let events = events.clone();
            let disconnected_sent = disconnected_sent.clone();
            move |device: &Option<BluetoothLEDevice>, _| {
                if let Some(device) = device.as_ref() {
                    if device.ConnectionStatus() == Ok(BluetoothConnectionStatus::Disconnected)
                        && !disconnected_sent.swap(true, Ordering::AcqRel)
                    {
                        let _ = events.send(ConnectionEvent::Disconnected);
                    }
                }
                Ok(())
            }
        }))?;

        Ok(WinrtConnection {
            device,
            session,
            events,
            characteristics: Mutex::new(HashMap::new()),
            descriptors: Mutex::new(HashMap::new()),
            value_changed_tokens: Mutex::new(HashMap::new()),
            status_token,
            disconnected_sent,
        })
    }

    fn characteristic(&self, handle: u16) -> Result<GattCharacteristic> {
        self.characteristics
            .lock()
            .unwrap()
            .get(&handle)
            .cloned()
            .ok_or_else(|| Error::message(ErrorKind::NotFound, format!("no characteristic with handle {handle}")))
    }

    fn descriptor(&self, handle: u16) -> Result<GattDescriptor> {
        self.descriptors
            .lock()
            .unwrap()
            .get(&handle)
            .cloned()
            .ok_or_else(|| Error::message(ErrorKind::NotFound, format!("no descriptor with handle {handle}")))
    }

    async fn write_cccd(
        &self,
        characteristic: &GattCharacteristic,
        value: GattClientCharacteristicConfigurationDescriptorValue,
    ) -> Result<()> {
        let result = characteristic
            .WriteClientCharacteristicConfigurationDescriptorWithResultAsync(value)?
            .await?;
        check_communication_status(result.Status()?, result.ProtocolError().ok(), "writing the CCCD")
    }
}

#[async_trait]
impl Connection for WinrtConnection {
    async fn discover_services(&self, use_cached: bool) -> Result<Vec<RawService>> {
        let cache_mode = if use_cached {
            BluetoothCacheMode::Cached
        } else {
            BluetoothCacheMode::Uncached
        };

        let mut characteristics = HashMap::new();
        let mut descriptors = HashMap::new();
        let mut raw_services = Vec::new();

        let services = self.device.GetGattServicesWithCacheModeAsync(cache_mode)?.await?;
        check_communication_status(services.Status()?, services.ProtocolError().ok(), "discovering services")?;

        for service in services.Services()? {
            let service_handle = service.AttributeHandle()?;
            let service_uuid = uuid::Uuid::from_u128(service.Uuid()?.to_u128());

            let mut raw_characteristics = Vec::new();
            let chars = service.GetCharacteristicsWithCacheModeAsync(cache_mode)?.await?;
            check_communication_status(chars.Status()?, chars.ProtocolError().ok(), "discovering characteristics")?;

            for characteristic in chars.Characteristics()? {
                let char_handle = characteristic.AttributeHandle()?;
                let char_uuid = uuid::Uuid::from_u128(characteristic.Uuid()?.to_u128());
                let properties = CharacteristicProperties::from_bits(characteristic.CharacteristicProperties()?.0 as u8);

                let mut raw_descriptors = Vec::new();
                let descs = characteristic.GetDescriptorsWithCacheModeAsync(cache_mode)?.await?;
                check_communication_status(descs.Status()?, descs.ProtocolError().ok(), "discovering descriptors")?;
                for descriptor in descs.Descriptors()? {
                    let descriptor_handle = descriptor.AttributeHandle()?;
                    raw_descriptors.push(RawDescriptor {
                        handle: descriptor_handle,
                        uuid: uuid::Uuid::from_u128(descriptor.Uuid()?.to_u128()),
                    });
                    descriptors.insert(descriptor_handle, descriptor);
                }

                raw_characteristics.push(RawCharacteristic {
                    handle: char_handle,
                    uuid: char_uuid,
                    properties,
                    descriptors: raw_descriptors,
                });
                characteristics.insert(char_handle, characteristic);
            }

            raw_services.push(RawService {
                handle: service_handle,
                uuid: service_uuid,
                primary: true,
                characteristics: raw_characteristics,
            });
        }

        *self.characteristics.lock().unwrap() = characteristics;
        *self.descriptors.lock().unwrap() = descriptors;
        Ok(raw_services)
    }

    async fn read(&self, handle: u16) -> Result<Vec<u8>> {
        let characteristic = self.characteristic(handle)?;
        let result = characteristic
            .ReadValueWithCacheModeAsync(BluetoothCacheMode::Uncached)?
            .await?;
        check_communication_status(result.Status()?, result.ProtocolError().ok(), "reading a characteristic")?;

        let buffer = result.Value()?;
        let mut value = vec![0u8; buffer.Length()? as usize];
        let reader = DataReader::FromBuffer(&buffer)?;
        reader.ReadBytes(value.as_mut_slice())?;
        Ok(value)
    }

    async fn write(&self, handle: u16, value: &[u8], kind: WriteKind) -> Result<()> {
        let characteristic = self.characteristic(handle)?;
        let option = match kind {
            WriteKind::WithResponse => GattWriteOption::WriteWithResponse,
            WriteKind::WithoutResponse => GattWriteOption::WriteWithoutResponse,
        };

        let writer = DataWriter::new()?;
        writer.WriteBytes(value)?;
        let buffer = writer.DetachBuffer()?;

        let result = characteristic
            .WriteValueWithResultAndOptionAsync(&buffer, option)?
            .await?;
        check_communication_status(result.Status()?, result.ProtocolError().ok(), "writing a characteristic")
    }

    async fn read_descriptor(&self, handle: u16) -> Result<Vec<u8>> {
        let descriptor = self.descriptor(handle)?;
        let result = descriptor.ReadValueWithCacheModeAsync(BluetoothCacheMode::Uncached)?.await?;
        check_communication_status(result.Status()?, result.ProtocolError().ok(), "reading a descriptor")?;

        let buffer = result.Value()?;
        let mut value = vec![0u8; buffer.Length()? as usize];
        let reader = DataReader::FromBuffer(&buffer)?;
        reader.ReadBytes(value.as_mut_slice())?;
        Ok(value)
    }

    async fn write_descriptor(&self, handle: u16, value: &[u8]) -> Result<()> {
        let descriptor = self.descriptor(handle)?;
        let writer = DataWriter::new()?;
        writer.WriteBytes(value)?;
        let buffer = writer.DetachBuffer()?;

        let result = descriptor.WriteValueWithResultAsync(&buffer)?.await?;
        check_communication_status(result.Status()?, result.ProtocolError().ok(), "writing a descriptor")
    }

    async fn subscribe(&self, handle: u16, kind: SubscriptionKind) -> Result<()> {
        let characteristic = self.characteristic(handle)?;
        let cccd_value = match kind {
            SubscriptionKind::Notify => GattClientCharacteristicConfigurationDescriptorValue::Notify,
            SubscriptionKind::Indicate => GattClientCharacteristicConfigurationDescriptorValue::Indicate,
        };

        let events = self.events.clone();
        let token = characteristic.ValueChanged(&TypedEventHandler::new(
            move |_characteristic, event_args: &Option<GattValueChangedEventArgs>| {
                let Some(event_args) = event_args.as_ref() else {
                    return Ok(());
                };
                let buffer = event_args.CharacteristicValue()?;
                let mut value = vec![0u8; buffer.Length()? as usize];
                let reader = DataReader::FromBuffer(&buffer)?;
                reader.ReadBytes(value.as_mut_slice())?;
                let _ = events.send(ConnectionEvent::Notification { handle, value });
                Ok(())
            },
        ))?;

        if let Err(err) = self.write_cccd(&characteristic, cccd_value).await {
            let _ = characteristic.RemoveValueChanged(token);
            return Err(err);
        }
        if let Some(previous) = self.value_changed_tokens.lock().unwrap().insert(handle, token) {
            let _ = characteristic.RemoveValueChanged(previous);
        }
        Ok(())
    }

    async fn unsubscribe(&self, handle: u16) -> Result<()> {
        let characteristic = self.characteristic(handle)?;
        self.write_cccd(&characteristic, GattClientCharacteristicConfigurationDescriptorValue::None)
            .await?;
        if let Some(token) = self.value_changed_tokens.lock().unwrap().remove(&handle) {
            let _ = characteristic.RemoveValueChanged(token);
        }
        Ok(())
    }

    async fn mtu(&self) -> Result<u16> {
        Ok(self.session.MaxPduSize()?)
    }

    async fn pair(&self) -> Result<()> {
        let pairing = self.device.DeviceInformation()?.Pairing()?;
        if pairing.IsPaired()? {
            return Ok(());
        }
        let result = pairing.PairAsync()?.await?;
        match result.Status()? {
            DevicePairingResultStatus::Paired | DevicePairingResultStatus::AlreadyPaired => Ok(()),
            status => Err(Error::message(
                ErrorKind::PairingFailed,
                format!("pairing failed with status {status:?}"),
            )),
        }
    }

    async fn unpair(&self) -> Result<()> {
        let pairing = self.device.DeviceInformation()?.Pairing()?;
        let result = pairing.UnpairAsync()?.await?;
        debug!(status = ?result.Status()?, "unpair finished");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        // Windows manages connections per-object: closing the session and
        // the device releases our reference, and the OS drops the physical
        // link once nothing else holds it.
        let _ = self.session.Close();
        let _ = self.device.Close();
        if !self.disconnected_sent.swap(true, Ordering::AcqRel) {
            let _ = self.events.send(ConnectionEvent::Disconnected);
        }
        Ok(())
    }

    fn disconnect_timeout(&self) -> Duration {
        DISCONNECT_TIMEOUT
    }
}

impl Drop for WinrtConnection {
    fn drop(&mut self) {
        let _ = self.device.RemoveConnectionStatusChanged(self.status_token);
        let tokens = std::mem::take(&mut *self.value_changed_tokens.lock().unwrap());
        let characteristics = self.characteristics.lock().unwrap();
        for (handle, token) in tokens {
            if let Some(characteristic) = characteristics.get(&handle) {
                if let Err(err) = characteristic.RemoveValueChanged(token) {
                    warn!(%err, handle, "removing ValueChanged handler failed");
                }
            }
        }
        let _ = self.session.Close();
        let _ = self.device.Close();
    }
}
