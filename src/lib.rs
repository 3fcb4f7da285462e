//! A cross-platform Bluetooth Low Energy central / GATT client library.
//!
//! `bleak` scans for advertising peripherals, connects to one, resolves its
//! attribute database, and performs read/write/subscribe operations over
//! GATT — with the same semantics on BlueZ (Linux), WinRT (Windows), and
//! CoreBluetooth (macOS/iOS). The OS stacks differ wildly in shape (a D-Bus
//! object tree, a COM-like event model, an Objective-C delegate on a
//! dispatch queue); this crate hides those differences behind two types:
//!
//! - [`Scanner`] — start/stop scanning, merged per-device advertisement
//!   records, async advertisement stream, predicate-based device search.
//! - [`Client`] — the connection state machine and GATT I/O for a single
//!   peripheral.
//!
//! All public operations are `async` and cancel-safe: dropping a future
//! aborts the wait, though a request already handed to the OS may still take
//! effect. Native callbacks are marshalled onto the client's own tasks; user
//! callbacks never run on an OS callback thread.
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use bleak::{btuuid, Client, ScanConfig, Scanner};
//!
//! # async fn example() -> bleak::Result<()> {
//! let mut scanner = Scanner::new(ScanConfig::new()).await?;
//! let devices = scanner.discover(Duration::from_secs(5)).await?;
//! let device = devices.first().expect("no devices found");
//!
//! let client = Client::new(device);
//! client.connect().await?;
//! let model = client
//!     .read_gatt_char(btuuid::characteristics::MODEL_NUMBER_STRING)
//!     .await?;
//! println!("model: {}", String::from_utf8_lossy(&model));
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Environment variables
//!
//! - `BLEAK_LOGGING=1` — log per-event scan and GATT traffic at `debug`
//!   level instead of `trace` on all backends.
//! - `BLEAK_DBUS_AUTH_UID=<uid>` — the UID to present when authenticating
//!   with the host D-Bus from inside a user namespace (BlueZ backend only).
//!
//! ## Testing without hardware
//!
//! The [`mock`] module provides an in-process backend with scripted
//! peripherals; [`Scanner::with_backend`] runs the full scanner/client stack
//! against it.

pub mod backend;
pub mod btuuid;
pub mod mock;

mod advertisement;
mod client;
mod device;
mod error;
mod gatt;
mod scanner;
mod types;
mod util;

#[cfg(target_os = "linux")]
mod bluez;
#[cfg(any(target_os = "macos", target_os = "ios"))]
mod corebluetooth;
#[cfg(target_os = "windows")]
mod winrt;

pub use advertisement::AdvertisementData;
pub use btuuid::BluetoothUuidExt;
pub use client::{Client, ClientConfig, DisconnectedCallback, NotifyCallback};
pub use device::DiscoveredDevice;
pub use error::{AttError, AttErrorCode, Error, ErrorKind};
pub use gatt::{CharRef, CharSpec, Characteristic, Descriptor, Service, ServiceCollection, ServiceSpec};
pub use scanner::{DetectionCallback, ScanConfig, Scanner};
pub use types::{Address, AddressType, CharacteristicProperties, ConnectionState, DeviceId, ScanningMode, WriteKind};

pub use smallvec;
pub use uuid::Uuid;

/// The result type used by all public operations.
pub type Result<T, E = Error> = core::result::Result<T, E>;

use std::sync::Arc;

/// Creates the backend for the build target's OS Bluetooth stack.
///
/// Targets without a backend get a `NotSupported` error at runtime rather
/// than a build failure, so the scanner, client, and mock backend remain
/// usable everywhere.
pub(crate) async fn platform_backend() -> Result<Arc<dyn backend::Backend>> {
    #[cfg(target_os = "linux")]
    {
        let backend = bluez::BluezBackend::new().await?;
        Ok(backend as Arc<dyn backend::Backend>)
    }
    #[cfg(target_os = "windows")]
    {
        let backend = winrt::WinrtBackend::new().await?;
        Ok(backend as Arc<dyn backend::Backend>)
    }
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    {
        let backend = corebluetooth::CoreBluetoothBackend::new().await?;
        Ok(backend as Arc<dyn backend::Backend>)
    }
    #[cfg(not(any(
        target_os = "linux",
        target_os = "windows",
        target_os = "macos",
        target_os = "ios"
    )))]
    {
        Err(Error::message(
            ErrorKind::NotSupported,
            "no Bluetooth backend for this target OS",
        ))
    }
}
