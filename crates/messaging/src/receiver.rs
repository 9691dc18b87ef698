use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

/// Non-owning reference to a message receiver.
///
/// Two handles are the same receiver when they point at the same allocation.
#[derive(Clone)]
pub struct ReceiverHandle {
    inner: Weak<dyn Any + Send + Sync>,
}

impl ReceiverHandle {
    pub fn new<T: Any + Send + Sync>(receiver: &Arc<T>) -> Self {
        Self::from_weak(Arc::downgrade(receiver))
    }

    pub fn from_weak<T: Any + Send + Sync>(receiver: Weak<T>) -> Self {
        let inner: Weak<dyn Any + Send + Sync> = receiver;
        Self { inner }
    }

    /// A handle that never upgrades.
    pub fn dangling() -> Self {
        Self::from_weak(Weak::<()>::new())
    }

    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }

    pub fn upgrade(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.inner.upgrade()
    }

    pub fn is_same(&self, other: &ReceiverHandle) -> bool {
        self.address() == other.address()
    }

    /// Whether this handle points at `receiver`.
    pub fn refers_to<T: Any + Send + Sync>(&self, receiver: &Arc<T>) -> bool {
        self.address() == Arc::as_ptr(receiver) as *const ()
    }

    pub(crate) fn address(&self) -> *const () {
        self.inner.as_ptr() as *const ()
    }
}

impl fmt::Debug for ReceiverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceiverHandle")
            .field("address", &self.address())
            .field("alive", &self.is_alive())
            .finish()
    }
}
