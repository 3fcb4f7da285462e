use objc2::rc::Retained;
use objc2_core_bluetooth::{CBATTErrorDomain, CBErrorDomain};
use objc2_foundation::NSError;

use crate::error::{AttError, ErrorKind};
use crate::Error;

// CBError codes, CoreBluetooth.framework/CBError.h
const CB_ERROR_NOT_CONNECTED: isize = 6;
const CB_ERROR_CONNECTION_TIMEOUT: isize = 10;
const CB_ERROR_PERIPHERAL_DISCONNECTED: isize = 7;
const CB_ERROR_CONNECTION_FAILED: isize = 14;
const CB_ERROR_OPERATION_NOT_SUPPORTED: isize = 13;

pub(super) fn from_nserror(error: Retained<NSError>) -> Error {
    let kind = kind_from_nserror(&error);
    Error::new(kind, Some(Box::new(NSErrorSource(error))), String::new())
}

fn kind_from_nserror(error: &NSError) -> ErrorKind {
    let domain = error.domain();
    let code = error.code();
    unsafe {
        if domain.isEqualToString(CBATTErrorDomain) {
            return ErrorKind::Protocol(AttError::from(code as u8));
        }
        if domain.isEqualToString(CBErrorDomain) {
            return match code {
                CB_ERROR_NOT_CONNECTED | CB_ERROR_PERIPHERAL_DISCONNECTED => ErrorKind::NotConnected,
                CB_ERROR_CONNECTION_TIMEOUT => ErrorKind::Timeout,
                CB_ERROR_CONNECTION_FAILED => ErrorKind::ConnectionFailed,
                CB_ERROR_OPERATION_NOT_SUPPORTED => ErrorKind::NotSupported,
                _ => ErrorKind::Other,
            };
        }
    }
    ErrorKind::Other
}

/// Wraps an `NSError` as an error source. `NSError` is immutable and
/// thread-safe.
struct NSErrorSource(Retained<NSError>);

unsafe impl Send for NSErrorSource {}
unsafe impl Sync for NSErrorSource {}

impl std::fmt::Debug for NSErrorSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl std::fmt::Display for NSErrorSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.localizedDescription())
    }
}

impl std::error::Error for NSErrorSource {}
