use std::any::TypeId;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use stone_core::StoneError;
use tracing::{debug, warn};

use crate::message::{Message, MessageIdentifier};
use crate::receiver::ReceiverHandle;

/// Delivers a message to one receiver.
pub trait MessageEmitter: Send + Sync {
    fn emit_message(&self, receiver: &ReceiverHandle, message: &dyn Message);
}

// ── Callables ───────────────────────────────────────────────────────

trait Callable: Send + Sync {
    fn observer_address(&self) -> *const ();

    fn is_alive(&self) -> bool;

    /// Returns `Ok(false)` when the observer is gone.
    fn apply(&self, message: &dyn Message) -> Result<bool, StoneError>;
}

struct MemberCallable<O, M, F> {
    observer: Weak<O>,
    handler: F,
    _message: PhantomData<fn(&M)>,
}

impl<O, M, F> Callable for MemberCallable<O, M, F>
where
    O: Send + Sync + 'static,
    M: Message,
    F: Fn(&O, &M) -> Result<(), StoneError> + Send + Sync + 'static,
{
    fn observer_address(&self) -> *const () {
        self.observer.as_ptr() as *const ()
    }

    fn is_alive(&self) -> bool {
        self.observer.strong_count() > 0
    }

    fn apply(&self, message: &dyn Message) -> Result<bool, StoneError> {
        let Some(observer) = self.observer.upgrade() else {
            return Ok(false);
        };
        let typed = message.as_any().downcast_ref::<M>().ok_or_else(|| {
            StoneError::Internal(format!(
                "message {:?} routed to a handler expecting {}",
                message.identifier(),
                std::any::type_name::<M>()
            ))
        })?;
        (self.handler)(&observer, typed)?;
        Ok(true)
    }
}

// ── Observable ──────────────────────────────────────────────────────

/// Registry of message handlers keyed by message type.
///
/// Dispatch works on a snapshot of the registered handlers, so a handler
/// may emit messages or register new handlers on the same observable.
#[derive(Default)]
pub struct Observable {
    callables: RwLock<HashMap<TypeId, Vec<Arc<dyn Callable>>>>,
}

impl Observable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for messages of type `M`, bound to `observer`.
    ///
    /// Only a weak reference to the observer is kept.
    pub fn register<O, M, F>(&self, observer: &Arc<O>, handler: F)
    where
        O: Send + Sync + 'static,
        M: Message,
        F: Fn(&O, &M) -> Result<(), StoneError> + Send + Sync + 'static,
    {
        let callable: Arc<dyn Callable> = Arc::new(MemberCallable::<O, M, F> {
            observer: Arc::downgrade(observer),
            handler,
            _message: PhantomData,
        });
        let mut callables = self.callables.write();
        let entry = callables.entry(TypeId::of::<M>()).or_default();
        entry.retain(|c| c.is_alive());
        entry.push(callable);
        debug!(message = ?MessageIdentifier::of::<M>(), "registered callable");
    }

    /// Number of live handlers for message type `M`.
    pub fn handler_count<M: Message>(&self) -> usize {
        self.callables
            .read()
            .get(&TypeId::of::<M>())
            .map(|list| list.iter().filter(|c| c.is_alive()).count())
            .unwrap_or(0)
    }

    /// Deliver `message` to the handlers bound to `receiver` only.
    pub fn emit_message(&self, receiver: &ReceiverHandle, message: &dyn Message) {
        let target = receiver.address();
        self.dispatch(message, |c| c.observer_address() == target);
    }

    /// Deliver `message` to every live handler registered for its type.
    pub fn broadcast_message(&self, message: &dyn Message) {
        self.dispatch(message, |_| true);
    }

    fn dispatch(&self, message: &dyn Message, accept: impl Fn(&dyn Callable) -> bool) {
        let key = message.identifier().type_id();
        let snapshot: Vec<Arc<dyn Callable>> = match self.callables.read().get(&key) {
            Some(list) => list.iter().filter(|c| accept(c.as_ref())).cloned().collect(),
            None => return,
        };

        for callable in snapshot {
            match callable.apply(message) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(message = ?message.identifier(), "skipping dead observer");
                }
                Err(e) => {
                    warn!(message = ?message.identifier(), error = %e, "message handler failed");
                }
            }
        }
    }
}

impl MessageEmitter for Observable {
    fn emit_message(&self, receiver: &ReceiverHandle, message: &dyn Message) {
        Observable::emit_message(self, receiver, message);
    }
}
