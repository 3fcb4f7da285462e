//! Compile-time checks that the public API surface has the expected shapes
//! and that every public future is `Send`.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bleak::backend::Backend;
use bleak::*;

fn assert_send<T: Send>(t: T) -> T {
    t
}

async fn check_scanner_apis(mut scanner: Scanner) -> Result<DiscoveredDevice> {
    let _: Result<()> = assert_send(scanner.start()).await;
    let _: Result<()> = assert_send(scanner.stop()).await;

    let devices: Result<Vec<DiscoveredDevice>> = assert_send(scanner.discover(Duration::from_secs(1))).await;
    let _: Vec<DiscoveredDevice> = scanner.discovered_devices();

    let _: Result<Option<DiscoveredDevice>> =
        assert_send(scanner.find_device_by(|_, advertisement| advertisement.is_connectable, Duration::from_secs(1)))
            .await;
    let _: Result<Option<DiscoveredDevice>> =
        assert_send(scanner.find_device_by_name("name", Duration::from_secs(1))).await;
    let _: Result<Option<DiscoveredDevice>> =
        assert_send(scanner.find_device_by_address("AA:BB:CC:DD:EE:FF", Duration::from_secs(1))).await;

    let mut advertisements = assert_send(scanner.advertisements());
    let _: Option<(DiscoveredDevice, AdvertisementData)> =
        assert_send(futures_util::StreamExt::next(&mut advertisements)).await;

    Ok(devices?.into_iter().next().unwrap())
}

async fn check_device_apis(device: &DiscoveredDevice) {
    let _: DeviceId = device.id();
    let _: Option<&str> = device.local_name();
    let _: &AdvertisementData = device.advertisement();
    let _: i16 = device.rssi();
}

async fn check_client_apis(client: Client) -> Result<()> {
    let _: DeviceId = client.id();
    let _: ConnectionState = client.state();
    let _: bool = client.is_connected();
    client.set_disconnected_callback(Some(|| {}));

    let _: Result<()> = assert_send(client.connect()).await;
    let _: Result<u16> = client.mtu_size();
    let services: Arc<ServiceCollection> = client.services()?;

    let characteristic: &Characteristic = services.get_characteristic(btuuid::characteristics::BATTERY_LEVEL)?;
    let _: CharacteristicProperties = characteristic.properties();
    let _: usize = characteristic.max_write_without_response_size();
    let _: &[Descriptor] = characteristic.descriptors();
    let handle: u16 = characteristic.handle();

    // Characteristics are addressable by UUID, handle, or object.
    let _: Vec<u8> = assert_send(client.read_gatt_char(btuuid::characteristics::BATTERY_LEVEL)).await?;
    let _: Vec<u8> = assert_send(client.read_gatt_char(handle)).await?;
    let _: Vec<u8> = assert_send(client.read_gatt_char(characteristic)).await?;

    let _: Result<()> = assert_send(client.write_gatt_char(handle, &[0x00], true)).await;
    let _: Result<()> = assert_send(client.start_notify(handle, |_, _| {})).await;
    let _: Result<()> = assert_send(client.stop_notify(handle)).await;
    let _: Result<Vec<u8>> = assert_send(client.read_gatt_descriptor(1)).await;
    let _: Result<()> = assert_send(client.write_gatt_descriptor(1, &[0x00])).await;
    let _: Result<()> = assert_send(client.pair()).await;
    let _: Result<()> = assert_send(client.unpair()).await;
    let _: Result<()> = assert_send(client.disconnect()).await;
    Ok(())
}

async fn check_construction() -> Result<()> {
    let scanner: Scanner = Scanner::new(ScanConfig::new()).await?;
    let device = check_scanner_apis(scanner).await?;
    check_device_apis(&device).await;

    let config = ClientConfig::new()
        .with_connect_timeout(Duration::from_secs(10))
        .with_operation_timeout(Duration::from_secs(5))
        .dangerous_use_bleak_cache(false)
        .with_notification_discriminator(|payload| payload.len() == 4);

    check_client_apis(Client::with_config(&device, config.clone())).await?;
    check_client_apis(Client::from_address("24:71:89:CC:09:05", config.clone()).await?).await?;

    let backend: Arc<dyn Backend> = bleak::mock::MockBackend::new();
    let _ = Client::from_id_with_backend(backend, device.id(), config).await?;
    Ok(())
}

#[test]
fn uuid_helpers_are_usable() {
    let uuid: Uuid = btuuid::bluetooth_uuid_from_u16(0x180f);
    assert!(uuid.is_u16_uuid());
    assert_eq!(btuuid::parse_uuid("180f").unwrap(), uuid);
    assert_eq!(btuuid::description(uuid).as_deref(), Some("Battery Service"));
}
