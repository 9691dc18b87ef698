use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Unique tag of a message type.
///
/// Equality and hashing only look at the [`TypeId`]; the name is kept for logs.
#[derive(Clone, Copy)]
pub struct MessageIdentifier {
    type_id: TypeId,
    name: &'static str,
}

impl MessageIdentifier {
    pub fn of<M: Message>() -> Self {
        Self {
            type_id: TypeId::of::<M>(),
            name: std::any::type_name::<M>(),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for MessageIdentifier {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for MessageIdentifier {}

impl Hash for MessageIdentifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for MessageIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A value that can travel through an [`crate::Observable`].
///
/// Implement it with [`impl_message!`](crate::impl_message).
pub trait Message: Any + Send + Sync {
    fn identifier(&self) -> MessageIdentifier;

    fn as_any(&self) -> &dyn Any;
}

/// Implement [`Message`] for one or more types.
#[macro_export]
macro_rules! impl_message {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::Message for $ty {
                fn identifier(&self) -> $crate::MessageIdentifier {
                    $crate::MessageIdentifier::of::<$ty>()
                }

                fn as_any(&self) -> &dyn ::std::any::Any {
                    self
                }
            }
        )+
    };
}
