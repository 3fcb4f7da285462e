//! Scanner behavior against the in-process mock backend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use smallvec::{smallvec, SmallVec};

use bleak::backend::Backend;
use bleak::mock::{MockBackend, MockPeripheral};
use bleak::{btuuid, AdvertisementData, DeviceId, ErrorKind, ScanConfig, Scanner, Uuid};

fn address_id(address: &str) -> DeviceId {
    address.parse().unwrap()
}

fn named_advertisement(name: &str) -> AdvertisementData {
    AdvertisementData {
        local_name: Some(name.to_string()),
        is_connectable: true,
        ..Default::default()
    }
}

fn scanner(backend: &Arc<MockBackend>) -> Scanner {
    Scanner::with_backend(backend.clone() as Arc<dyn Backend>, ScanConfig::new())
}

#[tokio::test]
async fn discover_returns_advertising_devices() {
    let backend = MockBackend::new();
    backend.add_peripheral(
        MockPeripheral::builder(address_id("24:71:89:CC:09:05"))
            .advertisement(named_advertisement("CC2650 SensorTag"), -52)
            .build(),
    );

    let mut scanner = scanner(&backend);
    let devices = scanner.discover(Duration::from_millis(100)).await.unwrap();

    assert_eq!(devices.len(), 1);
    let device = &devices[0];
    assert_eq!(device.id(), address_id("24:71:89:CC:09:05"));
    assert_eq!(device.local_name(), Some("CC2650 SensorTag"));
    assert_eq!(device.rssi(), -52);
    assert!(device.last_seen() >= device.first_seen());
}

#[tokio::test]
async fn advertisements_merge_within_a_session() {
    let first = AdvertisementData {
        manufacturer_data: HashMap::from([(0x004c_u16, SmallVec::from_slice(&[0x10, 0x05, 0x0b]))]),
        ..Default::default()
    };
    let second = AdvertisementData {
        services: smallvec![btuuid::services::HEART_RATE],
        ..Default::default()
    };

    let backend = MockBackend::new();
    backend.add_peripheral(
        MockPeripheral::builder(address_id("AA:BB:CC:DD:EE:FF"))
            .advertisement(first, -40)
            .advertisement(second, -45)
            .build(),
    );

    let mut scanner = scanner(&backend);
    let devices = scanner.discover(Duration::from_millis(100)).await.unwrap();

    assert_eq!(devices.len(), 1);
    let advertisement = devices[0].advertisement();
    assert_eq!(advertisement.manufacturer_data[&0x004c].as_slice(), &[0x10, 0x05, 0x0b]);
    assert!(advertisement.services.contains(&btuuid::services::HEART_RATE));
    assert_eq!(devices[0].rssi(), -45);
}

#[tokio::test]
async fn service_data_union_is_last_write_wins_per_key() {
    let uuid = btuuid::services::BATTERY;
    let other = btuuid::services::HEART_RATE;
    let event = |key: Uuid, value: &[u8]| AdvertisementData {
        service_data: HashMap::from([(key, SmallVec::from_slice(value))]),
        ..Default::default()
    };

    let backend = MockBackend::new();
    backend.add_peripheral(
        MockPeripheral::builder(address_id("AA:BB:CC:DD:EE:FF"))
            .advertisement(event(uuid, &[1]), -40)
            .advertisement(event(other, &[7, 7]), -40)
            .advertisement(event(uuid, &[2]), -40)
            .build(),
    );

    let mut scanner = scanner(&backend);
    let devices = scanner.discover(Duration::from_millis(100)).await.unwrap();

    let service_data = &devices[0].advertisement().service_data;
    assert_eq!(service_data.len(), 2);
    assert_eq!(service_data[&uuid].as_slice(), &[2]);
    assert_eq!(service_data[&other].as_slice(), &[7, 7]);
}

#[tokio::test]
async fn detection_callback_sees_every_raw_advertisement() {
    let first = AdvertisementData {
        manufacturer_data: HashMap::from([(0x0059_u16, SmallVec::from_slice(&[1]))]),
        ..Default::default()
    };
    let second = named_advertisement("ruuvi");

    let backend = MockBackend::new();
    backend.add_peripheral(
        MockPeripheral::builder(address_id("AA:BB:CC:DD:EE:FF"))
            .advertisement(first, -40)
            .advertisement(second, -45)
            .build(),
    );

    let seen = Arc::new(Mutex::new(Vec::new()));
    let config = ScanConfig::new().with_detection_callback({
        let seen = seen.clone();
        move |_device, advertisement| seen.lock().unwrap().push(advertisement.clone())
    });

    let mut scanner = Scanner::with_backend(backend.clone() as Arc<dyn Backend>, config);
    scanner.discover(Duration::from_millis(100)).await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    // The callback receives the advertisement as it arrived, not the merged
    // record: the second event has no manufacturer data.
    assert!(seen[0].manufacturer_data.contains_key(&0x0059));
    assert!(seen[1].manufacturer_data.is_empty());
    assert_eq!(seen[1].local_name.as_deref(), Some("ruuvi"));
}

#[tokio::test]
async fn service_uuid_filter_applies_in_process() {
    let wanted = AdvertisementData {
        services: smallvec![btuuid::services::HEART_RATE],
        ..Default::default()
    };

    let backend = MockBackend::new();
    backend.add_peripheral(
        MockPeripheral::builder(address_id("11:11:11:11:11:11"))
            .advertisement(wanted, -40)
            .build(),
    );
    backend.add_peripheral(
        MockPeripheral::builder(address_id("22:22:22:22:22:22"))
            .advertisement(named_advertisement("other"), -40)
            .build(),
    );

    let config = ScanConfig::new().with_service_uuids([btuuid::services::HEART_RATE]);
    let mut scanner = Scanner::with_backend(backend.clone() as Arc<dyn Backend>, config);
    let devices = scanner.discover(Duration::from_millis(100)).await.unwrap();

    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].id(), address_id("11:11:11:11:11:11"));
}

#[tokio::test]
async fn double_start_fails_and_stop_is_idempotent() {
    let backend = MockBackend::new();
    let mut scanner = scanner(&backend);

    scanner.start().await.unwrap();
    let err = scanner.start().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyScanning);

    scanner.stop().await.unwrap();
    scanner.stop().await.unwrap();

    // A stopped scanner is restartable.
    scanner.start().await.unwrap();
    scanner.stop().await.unwrap();
}

#[tokio::test]
async fn find_device_by_matches_device_and_advertisement() {
    let backend = MockBackend::new();
    backend.add_peripheral(
        MockPeripheral::builder(address_id("24:71:89:CC:09:05"))
            .advertisement(named_advertisement("CC2650 SensorTag"), -52)
            .build(),
    );

    let mut scanner = scanner(&backend);
    let device = scanner
        .find_device_by_name("CC2650 SensorTag", Duration::from_secs(1))
        .await
        .unwrap()
        .expect("device should be found");
    assert_eq!(device.id(), address_id("24:71:89:CC:09:05"));

    // The scan was stopped: the backend accepts a fresh one.
    scanner.start().await.unwrap();
    scanner.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn find_device_by_times_out_to_none_and_stops_the_scan() {
    let backend = MockBackend::new();
    backend.add_peripheral(
        MockPeripheral::builder(address_id("11:11:11:11:11:11"))
            .advertisement(named_advertisement("nearby"), -40)
            .build(),
    );

    let mut scanner = scanner(&backend);
    let found = scanner
        .find_device_by(|_, _| false, Duration::from_secs(5))
        .await
        .unwrap();
    assert!(found.is_none());

    // No scan left running afterwards.
    scanner.start().await.unwrap();
    scanner.stop().await.unwrap();
}

#[tokio::test]
async fn dropping_a_running_scanner_stops_the_scan() {
    let backend = MockBackend::new();
    {
        let mut scanner = scanner(&backend);
        scanner.start().await.unwrap();
    }
    // Cleanup runs on a spawned task; give it a moment to land.
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The backend accepts a fresh scan, so the dropped one was stopped.
    let mut scanner = scanner(&backend);
    scanner.start().await.unwrap();
    scanner.stop().await.unwrap();
}

#[tokio::test]
async fn advertisement_stream_delivers_merged_devices() {
    let backend = MockBackend::new();
    backend.add_peripheral(
        MockPeripheral::builder(address_id("AA:BB:CC:DD:EE:FF"))
            .advertisement(named_advertisement("streamed"), -63)
            .build(),
    );

    let mut scanner = scanner(&backend);
    let mut advertisements = scanner.advertisements();
    scanner.start().await.unwrap();

    let (device, advertisement) = tokio::time::timeout(Duration::from_secs(1), advertisements.next())
        .await
        .expect("stream should yield an advertisement")
        .expect("stream should stay open while scanning");
    assert_eq!(device.local_name(), Some("streamed"));
    assert_eq!(advertisement.local_name.as_deref(), Some("streamed"));
    assert_eq!(device.rssi(), -63);

    scanner.stop().await.unwrap();
}

#[tokio::test]
async fn live_injected_advertisements_reach_the_stream() {
    let backend = MockBackend::new();
    let mut scanner = scanner(&backend);
    let mut advertisements = scanner.advertisements();
    scanner.start().await.unwrap();

    assert!(backend.advertise(address_id("33:33:33:33:33:33"), named_advertisement("late"), -70));

    let (device, _) = tokio::time::timeout(Duration::from_secs(1), advertisements.next())
        .await
        .expect("stream should yield the injected advertisement")
        .unwrap();
    assert_eq!(device.id(), address_id("33:33:33:33:33:33"));

    scanner.stop().await.unwrap();
    assert!(!backend.advertise(address_id("33:33:33:33:33:33"), named_advertisement("late"), -70));
}
