//! Delegate classes translating CoreBluetooth callbacks into channel events.

use objc2::rc::Retained;
use objc2::{define_class, msg_send, AnyThread, DefinedClass};
use objc2_core_bluetooth::{
    CBCentralManager, CBCentralManagerDelegate, CBCharacteristic, CBDescriptor, CBPeripheral, CBPeripheralDelegate,
    CBService,
};
use objc2_foundation::{NSDictionary, NSError, NSNumber, NSObject, NSObjectProtocol, NSString};

use super::confined::Confined;
use crate::AdvertisementData;

#[derive(Clone)]
pub(super) enum CentralEvent {
    StateChanged,
    Discovered {
        peripheral: Confined<CBPeripheral>,
        advertisement: AdvertisementData,
        rssi: i16,
    },
    Connect {
        peripheral: Confined<CBPeripheral>,
    },
    ConnectFailed {
        peripheral: Confined<CBPeripheral>,
        error: Option<Retained<NSError>>,
    },
    Disconnect {
        peripheral: Confined<CBPeripheral>,
        error: Option<Retained<NSError>>,
    },
}

impl std::fmt::Debug for CentralEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StateChanged => write!(f, "StateChanged"),
            Self::Discovered { rssi, .. } => f.debug_struct("Discovered").field("rssi", rssi).finish(),
            Self::Connect { .. } => write!(f, "Connect"),
            Self::ConnectFailed { error, .. } => f.debug_struct("ConnectFailed").field("error", error).finish(),
            Self::Disconnect { error, .. } => f.debug_struct("Disconnect").field("error", error).finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub(super) enum PeripheralEvent {
    DiscoveredServices {
        error: Option<Retained<NSError>>,
    },
    DiscoveredCharacteristics {
        service: Confined<CBService>,
        error: Option<Retained<NSError>>,
    },
    DiscoveredDescriptors {
        characteristic: Confined<CBCharacteristic>,
        error: Option<Retained<NSError>>,
    },
    CharacteristicValueUpdate {
        characteristic: Confined<CBCharacteristic>,
        value: Vec<u8>,
        error: Option<Retained<NSError>>,
    },
    CharacteristicValueWrite {
        characteristic: Confined<CBCharacteristic>,
        error: Option<Retained<NSError>>,
    },
    NotificationStateUpdate {
        characteristic: Confined<CBCharacteristic>,
        error: Option<Retained<NSError>>,
    },
    DescriptorValueUpdate {
        descriptor: Confined<CBDescriptor>,
        value: Vec<u8>,
        error: Option<Retained<NSError>>,
    },
    DescriptorValueWrite {
        descriptor: Confined<CBDescriptor>,
        error: Option<Retained<NSError>>,
    },
}

pub(super) struct CentralDelegateIvars {
    sender: async_broadcast::Sender<CentralEvent>,
    _receiver: async_broadcast::InactiveReceiver<CentralEvent>,
}

define_class!(
    #[unsafe(super(NSObject))]
    #[ivars = CentralDelegateIvars]
    pub(super) struct CentralDelegate;

    unsafe impl NSObjectProtocol for CentralDelegate {}

    unsafe impl CBCentralManagerDelegate for CentralDelegate {
        #[unsafe(method(centralManagerDidUpdateState:))]
        fn did_update_state(&self, _central: &CBCentralManager) {
            let _ = self.ivars().sender.try_broadcast(CentralEvent::StateChanged);
        }

        #[unsafe(method(centralManager:didDiscoverPeripheral:advertisementData:RSSI:))]
        fn did_discover_peripheral(
            &self,
            _central: &CBCentralManager,
            peripheral: &CBPeripheral,
            adv_data: &NSDictionary<NSString>,
            rssi: &NSNumber,
        ) {
            let event = CentralEvent::Discovered {
                peripheral: unsafe { Confined::retain(peripheral) },
                advertisement: super::advertisement_from_nsdictionary(adv_data),
                rssi: rssi.shortValue(),
            };
            let _ = self.ivars().sender.try_broadcast(event);
        }

        #[unsafe(method(centralManager:didConnectPeripheral:))]
        fn did_connect_peripheral(&self, _central: &CBCentralManager, peripheral: &CBPeripheral) {
            let event = CentralEvent::Connect {
                peripheral: unsafe { Confined::retain(peripheral) },
            };
            let _ = self.ivars().sender.try_broadcast(event);
        }

        #[unsafe(method(centralManager:didFailToConnectPeripheral:error:))]
        fn did_fail_to_connect(&self, _central: &CBCentralManager, peripheral: &CBPeripheral, error: Option<&NSError>) {
            let event = CentralEvent::ConnectFailed {
                peripheral: unsafe { Confined::retain(peripheral) },
                error: error.map(|e| e.retain()),
            };
            let _ = self.ivars().sender.try_broadcast(event);
        }

        #[unsafe(method(centralManager:didDisconnectPeripheral:error:))]
        fn did_disconnect_peripheral(
            &self,
            _central: &CBCentralManager,
            peripheral: &CBPeripheral,
            error: Option<&NSError>,
        ) {
            let event = CentralEvent::Disconnect {
                peripheral: unsafe { Confined::retain(peripheral) },
                error: error.map(|e| e.retain()),
            };
            let _ = self.ivars().sender.try_broadcast(event);
        }
    }
);

impl CentralDelegate {
    pub(super) fn new() -> Retained<Self> {
        let (mut sender, receiver) = async_broadcast::broadcast::<CentralEvent>(64);
        sender.set_overflow(true);
        let ivars = CentralDelegateIvars {
            sender,
            _receiver: receiver.deactivate(),
        };
        let this = CentralDelegate::alloc().set_ivars(ivars);
        unsafe { msg_send![super(this), init] }
    }

    pub(super) fn subscribe(&self) -> async_broadcast::Receiver<CentralEvent> {
        self.ivars().sender.new_receiver()
    }
}

pub(super) struct PeripheralDelegateIvars {
    sender: async_broadcast::Sender<PeripheralEvent>,
    _receiver: async_broadcast::InactiveReceiver<PeripheralEvent>,
}

define_class!(
    #[unsafe(super(NSObject))]
    #[ivars = PeripheralDelegateIvars]
    pub(super) struct PeripheralDelegate;

    unsafe impl NSObjectProtocol for PeripheralDelegate {}

    unsafe impl CBPeripheralDelegate for PeripheralDelegate {
        #[unsafe(method(peripheral:didDiscoverServices:))]
        fn did_discover_services(&self, _peripheral: &CBPeripheral, error: Option<&NSError>) {
            let _ = self.ivars().sender.try_broadcast(PeripheralEvent::DiscoveredServices {
                error: error.map(|e| e.retain()),
            });
        }

        #[unsafe(method(peripheral:didDiscoverCharacteristicsForService:error:))]
        fn did_discover_characteristics_for_service(
            &self,
            _peripheral: &CBPeripheral,
            service: &CBService,
            error: Option<&NSError>,
        ) {
            let _ = self
                .ivars()
                .sender
                .try_broadcast(PeripheralEvent::DiscoveredCharacteristics {
                    service: unsafe { Confined::retain(service) },
                    error: error.map(|e| e.retain()),
                });
        }

        #[unsafe(method(peripheral:didDiscoverDescriptorsForCharacteristic:error:))]
        fn did_discover_descriptors_for_characteristic(
            &self,
            _peripheral: &CBPeripheral,
            characteristic: &CBCharacteristic,
            error: Option<&NSError>,
        ) {
            let _ = self
                .ivars()
                .sender
                .try_broadcast(PeripheralEvent::DiscoveredDescriptors {
                    characteristic: unsafe { Confined::retain(characteristic) },
                    error: error.map(|e| e.retain()),
                });
        }

        #[unsafe(method(peripheral:didUpdateValueForCharacteristic:error:))]
        fn did_update_value_for_characteristic(
            &self,
            _peripheral: &CBPeripheral,
            characteristic: &CBCharacteristic,
            error: Option<&NSError>,
        ) {
            unsafe {
                let value = characteristic
                    .value()
                    .map(|data| data.as_bytes_unchecked().to_vec())
                    .unwrap_or_default();
                let _ = self
                    .ivars()
                    .sender
                    .try_broadcast(PeripheralEvent::CharacteristicValueUpdate {
                        characteristic: Confined::retain(characteristic),
                        value,
                        error: error.map(|e| e.retain()),
                    });
            }
        }

        #[unsafe(method(peripheral:didWriteValueForCharacteristic:error:))]
        fn did_write_value_for_characteristic(
            &self,
            _peripheral: &CBPeripheral,
            characteristic: &CBCharacteristic,
            error: Option<&NSError>,
        ) {
            let _ = self
                .ivars()
                .sender
                .try_broadcast(PeripheralEvent::CharacteristicValueWrite {
                    characteristic: unsafe { Confined::retain(characteristic) },
                    error: error.map(|e| e.retain()),
                });
        }

        #[unsafe(method(peripheral:didUpdateNotificationStateForCharacteristic:error:))]
        fn did_update_notification_state(
            &self,
            _peripheral: &CBPeripheral,
            characteristic: &CBCharacteristic,
            error: Option<&NSError>,
        ) {
            let _ = self
                .ivars()
                .sender
                .try_broadcast(PeripheralEvent::NotificationStateUpdate {
                    characteristic: unsafe { Confined::retain(characteristic) },
                    error: error.map(|e| e.retain()),
                });
        }

        #[unsafe(method(peripheral:didUpdateValueForDescriptor:error:))]
        fn did_update_value_for_descriptor(
            &self,
            _peripheral: &CBPeripheral,
            descriptor: &CBDescriptor,
            error: Option<&NSError>,
        ) {
            let _ = self
                .ivars()
                .sender
                .try_broadcast(PeripheralEvent::DescriptorValueUpdate {
                    descriptor: unsafe { Confined::retain(descriptor) },
                    value: super::descriptor_value(descriptor),
                    error: error.map(|e| e.retain()),
                });
        }

        #[unsafe(method(peripheral:didWriteValueForDescriptor:error:))]
        fn did_write_value_for_descriptor(
            &self,
            _peripheral: &CBPeripheral,
            descriptor: &CBDescriptor,
            error: Option<&NSError>,
        ) {
            let _ = self
                .ivars()
                .sender
                .try_broadcast(PeripheralEvent::DescriptorValueWrite {
                    descriptor: unsafe { Confined::retain(descriptor) },
                    error: error.map(|e| e.retain()),
                });
        }
    }
);

impl PeripheralDelegate {
    pub(super) fn new() -> Retained<Self> {
        let (mut sender, receiver) = async_broadcast::broadcast::<PeripheralEvent>(64);
        sender.set_overflow(true);
        let ivars = PeripheralDelegateIvars {
            sender,
            _receiver: receiver.deactivate(),
        };
        let this = PeripheralDelegate::alloc().set_ivars(ivars);
        unsafe { msg_send![super(this), init] }
    }

    pub(super) fn subscribe(&self) -> async_broadcast::Receiver<PeripheralEvent> {
        self.ivars().sender.new_receiver()
    }
}
