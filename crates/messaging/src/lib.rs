//! Typed publish/subscribe fabric.
//!
//! Observers register handlers on an [`Observable`] through a weak
//! reference to themselves, so a dropped observer silently stops
//! receiving messages. Messages are dispatched on their [`MessageIdentifier`],
//! which is derived from the concrete Rust type.

pub mod message;
pub mod observable;
pub mod receiver;

pub use message::{Message, MessageIdentifier};
pub use observable::{MessageEmitter, Observable};
pub use receiver::ReceiverHandle;
