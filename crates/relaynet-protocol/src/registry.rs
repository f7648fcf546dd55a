//! Type id to message factory mapping.

use std::collections::HashMap;

use crate::{AssignId, Message, MessageKind, MessageType, ProtocolError, RelayMessage, RpcMessage};

type Factory = fn() -> Box<dyn Message>;

fn make<T: MessageKind>() -> Box<dyn Message> {
    Box::new(T::default())
}

/// Builds empty message instances from type ids, so incoming frames can be
/// decoded into the right concrete type.
///
/// Built once at startup and then shared read-only (typically in an `Arc`).
#[derive(Debug, Clone, Default)]
pub struct MessageRegistry {
    factories: HashMap<MessageType, (Factory, &'static str)>,
}

impl MessageRegistry {
    /// An empty registry. Most callers want [`with_builtins`](Self::with_builtins).
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry that knows the handshake, relay and RPC kinds.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.insert::<AssignId>();
        registry.insert::<RelayMessage>();
        registry.insert::<RpcMessage>();
        registry
    }

    fn insert<T: MessageKind>(&mut self) {
        self.factories
            .insert(T::TYPE, (make::<T> as Factory, std::any::type_name::<T>()));
    }

    /// Registers a message kind.
    ///
    /// # Errors
    /// Returns [`ProtocolError::DuplicateType`] if another kind already
    /// owns `T::TYPE`.
    pub fn register<T: MessageKind>(&mut self) -> Result<(), ProtocolError> {
        if let Some((_, existing)) = self.factories.get(&T::TYPE) {
            return Err(ProtocolError::DuplicateType {
                message_type: T::TYPE,
                existing: *existing,
            });
        }
        if T::TYPE < MessageType::FIRST_USER {
            tracing::warn!(
                message_type = %T::TYPE,
                kind = std::any::type_name::<T>(),
                "registering a message kind in the reserved id range"
            );
        }
        self.insert::<T>();
        Ok(())
    }

    /// A fresh, empty instance of the kind registered for `message_type`.
    pub fn create(&self, message_type: MessageType) -> Option<Box<dyn Message>> {
        self.factories.get(&message_type).map(|(factory, _)| factory())
    }

    pub fn contains(&self, message_type: MessageType) -> bool {
        self.factories.contains_key(&message_type)
    }

    /// Rust type name of the kind registered for `message_type`.
    pub fn name(&self, message_type: MessageType) -> Option<&'static str> {
        self.factories.get(&message_type).map(|(_, name)| *name)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
