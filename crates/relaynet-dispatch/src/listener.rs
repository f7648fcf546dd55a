//! Declarative handler tables for objects that listen to several kinds.

use std::sync::Arc;

use relaynet_protocol::{Message, MessageKind, MessageType};

use crate::dispatcher::{RawHandler, typed};
use crate::{Delivery, HandlerResult};

/// The callbacks one listener contributes, collected before binding.
#[derive(Default)]
pub struct HandlerTable {
    entries: Vec<(MessageType, RawHandler)>,
}

impl HandlerTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Adds a callback for messages of kind `T`.
    pub fn on<T, F>(&mut self, handler: F) -> &mut Self
    where
        T: MessageKind,
        F: Fn(&T, &Delivery) -> HandlerResult + Send + Sync + 'static,
    {
        self.entries.push((T::TYPE, typed(handler)));
        self
    }

    /// Adds an untyped callback for `message_type`.
    pub fn on_raw<F>(&mut self, message_type: MessageType, handler: F) -> &mut Self
    where
        F: Fn(&dyn Message, &Delivery) -> HandlerResult + Send + Sync + 'static,
    {
        self.entries.push((message_type, Arc::new(handler)));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn into_entries(self) -> Vec<(MessageType, RawHandler)> {
        self.entries
    }
}

/// An object that reacts to several message kinds.
///
/// Instead of discovering handler methods at runtime, a listener lists
/// them explicitly:
///
/// ```
/// use std::sync::Arc;
/// use relaynet_dispatch::{HandlerTable, Listener, MessageDispatcher};
/// use relaynet_protocol::AssignId;
///
/// struct Greeter;
///
/// impl Listener for Greeter {
///     fn bindings(self: Arc<Self>, table: &mut HandlerTable) {
///         table.on::<AssignId, _>(move |msg, _| {
///             println!("assigned {}", msg.player_id);
///             Ok(())
///         });
///     }
/// }
///
/// let dispatcher = MessageDispatcher::new();
/// let greeter = Arc::new(Greeter);
/// dispatcher.bind(&greeter).unwrap();
/// assert!(dispatcher.unbind(&greeter));
/// ```
///
/// Closures may capture `self`; the dispatcher drops them on unbind.
pub trait Listener: Send + Sync + 'static {
    fn bindings(self: Arc<Self>, table: &mut HandlerTable);
}
