//! Client behavior against the in-process mock backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bleak::backend::{Backend, SubscriptionKind};
use bleak::mock::{MockBackend, MockPeripheral, MockPeripheralBuilder};
use bleak::{
    btuuid, AdvertisementData, CharacteristicProperties, Client, ClientConfig, ConnectionState, DeviceId,
    DiscoveredDevice, ErrorKind, ScanConfig, Scanner,
};

const ADDRESS: &str = "24:71:89:CC:09:05";

const READ: CharacteristicProperties = CharacteristicProperties::from_bits(0x02);
const WRITE: CharacteristicProperties = CharacteristicProperties::from_bits(0x08);
const READ_WRITE_BOTH: CharacteristicProperties = CharacteristicProperties::from_bits(0x0e);
const NOTIFY: CharacteristicProperties = CharacteristicProperties::from_bits(0x10);
const INDICATE: CharacteristicProperties = CharacteristicProperties::from_bits(0x20);

fn device_id() -> DeviceId {
    ADDRESS.parse().unwrap()
}

/// A peripheral with a device-information service and a heart-rate-shaped
/// service used by most tests:
///
/// handle 1: Device Information service
///   handle 3: Model Number String (read), "CC2650 SensorTag"
///     handle 4: Characteristic User Description descriptor
/// handle 10: Heart Rate service
///   handle 12: Heart Rate Measurement (notify)
///     handle 13: CCCD
///   handle 25: second Heart Rate Measurement (read)
///   handle 30: control point (read/write/write-without-response)
fn peripheral_builder() -> MockPeripheralBuilder {
    MockPeripheral::builder(device_id())
        .advertisement(
            AdvertisementData {
                local_name: Some("CC2650 SensorTag".to_string()),
                is_connectable: true,
                ..Default::default()
            },
            -52,
        )
        .service(1, btuuid::services::DEVICE_INFORMATION)
        .characteristic(3, btuuid::characteristics::MODEL_NUMBER_STRING, READ)
        .descriptor(4, btuuid::descriptors::CHARACTERISTIC_USER_DESCRIPTION)
        .value(3, b"CC2650 SensorTag")
        .value(4, b"Model Number")
        .service(10, btuuid::services::HEART_RATE)
        .characteristic(12, btuuid::characteristics::HEART_RATE_MEASUREMENT, NOTIFY)
        .descriptor(13, btuuid::descriptors::CLIENT_CHARACTERISTIC_CONFIGURATION)
        .characteristic(25, btuuid::characteristics::HEART_RATE_MEASUREMENT, READ)
        .characteristic(30, btuuid::characteristics::HEART_RATE_CONTROL_POINT, READ_WRITE_BOTH)
}

async fn discover_device(backend: &Arc<MockBackend>) -> DiscoveredDevice {
    let mut scanner = Scanner::with_backend(backend.clone() as Arc<dyn Backend>, ScanConfig::new());
    scanner
        .find_device_by_id(device_id(), Duration::from_secs(1))
        .await
        .unwrap()
        .expect("mock peripheral should advertise")
}

async fn connected_client(peripheral: Arc<MockPeripheral>) -> Client {
    let backend = MockBackend::new();
    backend.add_peripheral(peripheral);
    let device = discover_device(&backend).await;
    let client = Client::new(&device);
    client.connect().await.unwrap();
    client
}

async fn eventually(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let step = Duration::from_millis(5);
    let mut waited = Duration::ZERO;
    while waited < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(step).await;
        waited += step;
    }
    condition()
}

#[tokio::test]
async fn connect_discovers_services_and_reads_by_uuid() {
    let client = connected_client(peripheral_builder().build()).await;
    assert!(client.is_connected());
    assert_eq!(client.state(), ConnectionState::Connected);

    let services = client.services().unwrap();
    assert_eq!(services.services().len(), 2);
    let device_information = services.get_service(btuuid::services::DEVICE_INFORMATION).unwrap();
    assert!(device_information.is_primary());
    assert_eq!(device_information.characteristics().len(), 1);

    let value = client
        .read_gatt_char(btuuid::characteristics::MODEL_NUMBER_STRING)
        .await
        .unwrap();
    assert_eq!(value, b"CC2650 SensorTag");

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn operations_require_a_connection() {
    let backend = MockBackend::new();
    backend.add_peripheral(peripheral_builder().build());
    let device = discover_device(&backend).await;
    let client = Client::new(&device);

    let err = client.read_gatt_char(3u16).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotConnected);
    assert_eq!(client.mtu_size().unwrap_err().kind(), ErrorKind::NotConnected);
    assert!(client.services().is_err());
}

#[tokio::test]
async fn connect_is_rejected_while_connected() {
    let client = connected_client(peripheral_builder().build()).await;
    let err = client.connect().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn failed_connect_returns_to_disconnected() {
    let peripheral = peripheral_builder().build();
    peripheral.refuse_connections(true);
    let backend = MockBackend::new();
    backend.add_peripheral(peripheral.clone());
    let device = discover_device(&backend).await;

    let client = Client::new(&device);
    let err = client.connect().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectionFailed);
    assert_eq!(client.state(), ConnectionState::Disconnected);

    // The same client can connect once the peripheral accepts again.
    peripheral.refuse_connections(false);
    client.connect().await.unwrap();
    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn disconnect_is_idempotent_and_fires_callback_once() {
    let client = connected_client(peripheral_builder().build()).await;

    let fired = Arc::new(AtomicUsize::new(0));
    client.set_disconnected_callback(Some({
        let fired = fired.clone();
        move || {
            fired.fetch_add(1, Ordering::AcqRel);
        }
    }));

    client.disconnect().await.unwrap();
    client.disconnect().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(fired.load(Ordering::Acquire), 1);
}

#[tokio::test]
async fn ambiguous_uuid_requires_handle_disambiguation() {
    let client = connected_client(peripheral_builder().build()).await;

    let err = client
        .read_gatt_char(btuuid::characteristics::HEART_RATE_MEASUREMENT)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Ambiguous);

    // Lookup by handle is exact; handle 25 is the readable twin.
    let value = client.read_gatt_char(25u16).await.unwrap();
    assert_eq!(value, Vec::<u8>::new());

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn peripheral_drop_cancels_inflight_read_and_fires_callback_once() {
    let peripheral = peripheral_builder().latency(Duration::from_millis(100)).build();
    let backend = MockBackend::new();
    backend.add_peripheral(peripheral.clone());
    let device = discover_device(&backend).await;
    let client = Arc::new(Client::new(&device));
    client.connect().await.unwrap();

    let fired = Arc::new(AtomicUsize::new(0));
    client.set_disconnected_callback(Some({
        let fired = fired.clone();
        move || {
            fired.fetch_add(1, Ordering::AcqRel);
        }
    }));

    let reader = tokio::spawn({
        let client = client.clone();
        async move { client.read_gatt_char(3u16).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    peripheral.drop_link();

    let err = reader.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotConnected);

    assert!(eventually(Duration::from_secs(1), || fired.load(Ordering::Acquire) == 1).await);
    assert_eq!(client.state(), ConnectionState::Disconnected);

    // Still disconnected for subsequent operations, until reconnected.
    let err = client.read_gatt_char(3u16).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotConnected);
    client.connect().await.unwrap();
    assert_eq!(client.read_gatt_char(3u16).await.unwrap(), b"CC2650 SensorTag");
    assert_eq!(fired.load(Ordering::Acquire), 1);
    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn attribute_objects_go_stale_across_reconnects() {
    let client = connected_client(peripheral_builder().build()).await;

    let characteristic = client
        .services()
        .unwrap()
        .get_characteristic(btuuid::characteristics::MODEL_NUMBER_STRING)
        .unwrap()
        .clone();
    assert_eq!(client.read_gatt_char(&characteristic).await.unwrap(), b"CC2650 SensorTag");

    client.disconnect().await.unwrap();
    client.connect().await.unwrap();

    let err = client.read_gatt_char(&characteristic).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidParameter);

    let fresh = client
        .services()
        .unwrap()
        .get_characteristic(btuuid::characteristics::MODEL_NUMBER_STRING)
        .unwrap()
        .clone();
    assert_eq!(client.read_gatt_char(&fresh).await.unwrap(), b"CC2650 SensorTag");
    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn notifications_arrive_in_order_on_the_client_task() {
    let peripheral = peripheral_builder().build();
    let client = connected_client(peripheral.clone()).await;

    let received = Arc::new(Mutex::new(Vec::new()));
    client
        .start_notify(12u16, {
            let received = received.clone();
            move |characteristic, value| {
                assert_eq!(characteristic.uuid(), btuuid::characteristics::HEART_RATE_MEASUREMENT);
                received.lock().unwrap().push(value.to_vec());
            }
        })
        .await
        .unwrap();
    assert_eq!(peripheral.subscription_kind(12), Some(SubscriptionKind::Notify));

    for counter in 1u32..=3 {
        assert!(peripheral.notify(12, &counter.to_le_bytes()));
    }

    assert!(eventually(Duration::from_secs(1), || received.lock().unwrap().len() == 3).await);
    assert_eq!(
        *received.lock().unwrap(),
        vec![vec![1, 0, 0, 0], vec![2, 0, 0, 0], vec![3, 0, 0, 0]]
    );

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn no_delivery_after_stop_notify() {
    let peripheral = peripheral_builder().build();
    let client = connected_client(peripheral.clone()).await;

    let received = Arc::new(Mutex::new(Vec::new()));
    client
        .start_notify(12u16, {
            let received = received.clone();
            move |_, value| received.lock().unwrap().push(value.to_vec())
        })
        .await
        .unwrap();

    assert!(peripheral.notify(12, &[1]));
    assert!(eventually(Duration::from_secs(1), || received.lock().unwrap().len() == 1).await);

    client.stop_notify(12u16).await.unwrap();
    // The peripheral no longer has a subscriber; nothing may be delivered.
    assert!(!peripheral.notify(12, &[2]));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(received.lock().unwrap().len(), 1);

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn subscription_bookkeeping_is_exclusive_per_characteristic() {
    let client = connected_client(peripheral_builder().build()).await;

    client.start_notify(12u16, |_, _| {}).await.unwrap();
    let err = client.start_notify(12u16, |_, _| {}).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidParameter);

    client.stop_notify(12u16).await.unwrap();
    let err = client.stop_notify(12u16).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotSubscribed);

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn indicate_only_characteristics_subscribe_transparently() {
    let peripheral = MockPeripheral::builder(device_id())
        .advertisement(AdvertisementData::default(), -40)
        .service(1, btuuid::services::CURRENT_TIME)
        .characteristic(3, btuuid::characteristics::CURRENT_TIME, INDICATE)
        .build();
    let client = connected_client(peripheral.clone()).await;

    client.start_notify(3u16, |_, _| {}).await.unwrap();
    assert_eq!(peripheral.subscription_kind(3), Some(SubscriptionKind::Indicate));

    // A characteristic without notify or indicate is rejected up front.
    let err = client
        .start_notify(btuuid::characteristics::MODEL_NUMBER_STRING, |_, _| {})
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn notify_unsupported_is_rejected() {
    let client = connected_client(peripheral_builder().build()).await;
    let err = client.start_notify(3u16, |_, _| {}).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotSupported);
    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn write_size_enforcement_only_applies_without_response() {
    let client = connected_client(peripheral_builder().mtu(23).build()).await;

    let limit = client
        .services()
        .unwrap()
        .get_characteristic(30u16)
        .unwrap()
        .max_write_without_response_size();
    assert_eq!(limit, 20);
    assert_eq!(client.mtu_size().unwrap(), 23);

    // 20 bytes fit without response; 21 do not; with response the OS
    // fragments and any length goes.
    client.write_gatt_char(30u16, &[0xaa; 20], false).await.unwrap();
    let err = client.write_gatt_char(30u16, &[0xaa; 21], false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DataTooLong);
    client.write_gatt_char(30u16, &[0xaa; 21], true).await.unwrap();

    // Zero-byte writes succeed.
    client.write_gatt_char(30u16, &[], false).await.unwrap();

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn write_then_read_roundtrips() {
    let client = connected_client(peripheral_builder().build()).await;
    client.write_gatt_char(30u16, b"\x01\x02\x03", true).await.unwrap();
    assert_eq!(client.read_gatt_char(30u16).await.unwrap(), b"\x01\x02\x03");
    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn property_mismatches_are_typed_errors() {
    let peripheral = MockPeripheral::builder(device_id())
        .advertisement(AdvertisementData::default(), -40)
        .service(1, btuuid::services::HUMAN_INTERFACE_DEVICE)
        .characteristic(3, btuuid::characteristics::PNP_ID, READ)
        .characteristic(5, btuuid::characteristics::SC_CONTROL_POINT, WRITE)
        .build();
    let client = connected_client(peripheral).await;

    let err = client.write_gatt_char(3u16, &[0], true).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotSupported);
    let err = client.read_gatt_char(5u16).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotSupported);

    // Write-without-response falls back to write-with-response (with a
    // warning) when only the latter is supported.
    client.write_gatt_char(5u16, &[1], false).await.unwrap();

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn descriptor_io_and_cccd_protection() {
    let client = connected_client(peripheral_builder().build()).await;

    assert_eq!(client.read_gatt_descriptor(4).await.unwrap(), b"Model Number");
    client.write_gatt_descriptor(4, b"renamed").await.unwrap();
    assert_eq!(client.read_gatt_descriptor(4).await.unwrap(), b"renamed");

    // The CCCD is managed through start_notify/stop_notify exclusively.
    let err = client.write_gatt_descriptor(13, &[1, 0]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotSupported);

    let err = client.read_gatt_descriptor(99).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn requests_on_one_characteristic_never_interleave() {
    let peripheral = peripheral_builder().latency(Duration::from_millis(20)).build();
    let client = Arc::new(connected_client(peripheral.clone()).await);

    let first = tokio::spawn({
        let client = client.clone();
        async move { client.read_gatt_char(3u16).await }
    });
    let second = tokio::spawn({
        let client = client.clone();
        async move { client.read_gatt_char(3u16).await }
    });
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    assert_eq!(peripheral.max_ops_in_flight(), 1);
    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn pairing_is_delegated_to_the_backend() {
    let client = connected_client(peripheral_builder().build()).await;
    client.pair().await.unwrap();
    client.unpair().await.unwrap();
    client.disconnect().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn resolving_a_silent_device_fails_with_device_not_found() {
    let backend = MockBackend::new();
    let err = Client::from_id_with_backend(backend as Arc<dyn Backend>, device_id(), ClientConfig::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeviceNotFound);
}

#[tokio::test]
async fn operation_timeout_applies_per_operation() {
    let peripheral = peripheral_builder().latency(Duration::from_millis(200)).build();
    let backend = MockBackend::new();
    backend.add_peripheral(peripheral);
    let device = discover_device(&backend).await;

    let client = Client::with_config(
        &device,
        ClientConfig::new().with_operation_timeout(Duration::from_millis(50)),
    );
    client.connect().await.unwrap();

    let err = client.read_gatt_char(3u16).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);

    client.disconnect().await.unwrap();
}
