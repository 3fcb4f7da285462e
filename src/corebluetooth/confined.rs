//! Pinning CoreBluetooth objects to a single serial queue.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

use dispatch2::{DispatchQueue, DispatchQueueAttr, DispatchRetained};
use objc2::rc::Retained;
use objc2::Message;

/// The serial queue the central manager is created with. Every delegate
/// callback and every call into a CoreBluetooth object happens here.
pub(super) fn queue() -> &'static DispatchQueue {
    static QUEUE: OnceLock<DispatchRetained<DispatchQueue>> = OnceLock::new();
    QUEUE.get_or_init(|| DispatchQueue::new("bleak-corebluetooth", DispatchQueueAttr::SERIAL))
}

/// Runs `f` on the CoreBluetooth queue, blocking the calling thread until it
/// returns.
pub(super) fn on_queue<R: Send>(f: impl FnOnce() -> R + Send) -> R {
    let mut result = None;
    queue().exec_sync(|| result = Some(f()));
    result.expect("exec_sync returned without running the closure")
}

/// A CoreBluetooth object pinned to [`queue()`].
///
/// CoreBluetooth types are neither `Send` nor `Sync`. Holding one behind
/// `Confined` is sound because every call into the object goes through
/// [`Confined::with`], which hops onto the one serial queue the object lives
/// on. The only things other threads do directly are reference counting and
/// pointer comparison, both of which are thread-safe in Objective-C.
pub(super) struct Confined<T> {
    object: Retained<T>,
}

unsafe impl<T> Send for Confined<T> {}
unsafe impl<T> Sync for Confined<T> {}

impl<T: Message> Confined<T> {
    /// Takes ownership of an object reference and pins it to the queue.
    ///
    /// # Safety
    ///
    /// `object` must belong to [`queue()`]: its delegate callbacks arrive
    /// there, and no other thread may call into it afterwards except through
    /// [`Confined::with`].
    pub unsafe fn hold(object: Retained<T>) -> Self {
        Confined { object }
    }

    /// Retains `object` and pins the new reference to the queue.
    ///
    /// # Safety
    ///
    /// As for [`Confined::hold`].
    pub unsafe fn retain(object: &T) -> Self {
        Confined {
            object: object.retain(),
        }
    }

    /// Runs `f` with the object on its queue, blocking until it returns.
    pub fn with<R: Send>(&self, f: impl FnOnce(&T) -> R + Send) -> R {
        on_queue(|| f(&self.object))
    }

    /// # Safety
    ///
    /// Must only be called from the context of [`queue()`], i.e. inside a
    /// [`Confined::with`] closure or a delegate callback.
    pub unsafe fn get(&self) -> &T {
        &self.object
    }
}

impl<T: Message> Clone for Confined<T> {
    fn clone(&self) -> Self {
        Confined {
            object: self.object.clone(),
        }
    }
}

// CoreBluetooth hands back the same object on every callback concerning a
// given peripheral, service, or characteristic, and NSObject equality for
// these types is identity, so comparing and hashing the pointer needs no
// queue hop.
impl<T> PartialEq for Confined<T> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(Retained::as_ptr(&self.object), Retained::as_ptr(&other.object))
    }
}

impl<T> Eq for Confined<T> {}

impl<T> Hash for Confined<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Retained::as_ptr(&self.object) as usize).hash(state);
    }
}

impl<T> fmt::Debug for Confined<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Confined({:p})", Retained::as_ptr(&self.object))
    }
}
