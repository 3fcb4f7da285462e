#![allow(unused)] // used depending on the target.

use std::mem::ManuallyDrop;
use std::sync::OnceLock;

/// Runs a closure when dropped, unless it has been defused.
///
/// Used to guarantee cleanup (stopping a scan, rolling back a connection
/// state transition) when a future is dropped at an await point.
pub struct ScopeGuard<F: FnOnce()> {
    dropfn: ManuallyDrop<F>,
}

impl<F: FnOnce()> ScopeGuard<F> {
    /// Discards the guard without running its closure.
    pub fn defuse(mut self) {
        unsafe { ManuallyDrop::drop(&mut self.dropfn) }
        std::mem::forget(self)
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        // SAFETY: `dropfn` is `ManuallyDrop`, so the compiler will not drop it again.
        let dropfn = unsafe { ManuallyDrop::take(&mut self.dropfn) };
        dropfn();
    }
}

pub fn defer<F: FnOnce()>(dropfn: F) -> ScopeGuard<F> {
    ScopeGuard {
        dropfn: ManuallyDrop::new(dropfn),
    }
}

/// Whether `BLEAK_LOGGING=1` was set in the environment.
///
/// When enabled, per-event scan and GATT traffic is logged at `debug` level
/// instead of `trace` on every backend.
pub fn verbose_logging() -> bool {
    static VERBOSE: OnceLock<bool> = OnceLock::new();
    *VERBOSE.get_or_init(|| {
        std::env::var("BLEAK_LOGGING")
            .map(|v| !v.is_empty() && v != "0")
            .unwrap_or(false)
    })
}

/// Log `args` at debug level when [`verbose_logging`] is enabled, at trace
/// level otherwise.
macro_rules! event_log {
    ($($arg:tt)*) => {
        if crate::util::verbose_logging() {
            tracing::debug!($($arg)*);
        } else {
            tracing::trace!($($arg)*);
        }
    };
}

pub(crate) use event_log;
