use windows::core::HRESULT;
use windows::Devices::Bluetooth::GenericAttributeProfile::GattCommunicationStatus;
use windows::Foundation::IReference;

use crate::error::{AttError, ErrorKind};
use crate::Error;

/// `RO_E_CLOSED`: the underlying WinRT object has been closed.
const RO_E_CLOSED: HRESULT = HRESULT(0x80000013u32 as i32);
const E_ACCESSDENIED: HRESULT = HRESULT(0x80070005u32 as i32);

impl From<windows::core::Error> for Error {
    fn from(err: windows::core::Error) -> Self {
        let kind = match err.code() {
            RO_E_CLOSED => ErrorKind::NotConnected,
            E_ACCESSDENIED => ErrorKind::NotAuthorized,
            _ => ErrorKind::Other,
        };
        Error::new(kind, Some(Box::new(err)), String::new())
    }
}

pub(super) fn is_object_closed(err: &windows::core::Error) -> bool {
    err.code() == RO_E_CLOSED
}

/// Turns a non-success `GattCommunicationStatus` into the matching error.
pub(super) fn check_communication_status(
    status: GattCommunicationStatus,
    protocol_error: Option<IReference<u8>>,
    context: &str,
) -> crate::Result<()> {
    match status {
        GattCommunicationStatus::Success => Ok(()),
        GattCommunicationStatus::ProtocolError => {
            let code = protocol_error.and_then(|code| code.Value().ok()).unwrap_or(0);
            Err(Error::new(
                ErrorKind::Protocol(AttError::from(code)),
                None,
                context.to_string(),
            ))
        }
        GattCommunicationStatus::AccessDenied => Err(Error::message(ErrorKind::NotAuthorized, context.to_string())),
        GattCommunicationStatus::Unreachable => Err(Error::message(ErrorKind::NotConnected, context.to_string())),
        _ => Err(Error::message(ErrorKind::Other, context.to_string())),
    }
}
