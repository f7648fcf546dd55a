//! The message dispatcher: type id to an ordered list of callbacks.
//!
//! # Concurrency note
//!
//! The registration tables sit behind one `parking_lot::Mutex`, but the
//! lock is never held while a handler runs. `dispatch` snapshots the
//! handlers for a message, releases the lock, and then calls them one by
//! one, so a handler may register, unregister, bind or unbind (itself
//! included) without deadlocking or disturbing the current dispatch.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use parking_lot::Mutex;
use relaynet_protocol::{Message, MessageKind, MessageType, PeerId, Side};

use crate::{DispatchError, HandlerTable, Listener};

/// Where a dispatched message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    /// The verified sender. On a server-side connection this is the
    /// connection's own identity, whatever the wire bytes claimed.
    pub from: PeerId,
    /// Which persona received the message.
    pub side: Side,
}

impl Delivery {
    pub fn new(from: PeerId, side: Side) -> Self {
        Self { from, side }
    }
}

/// Error type handlers may return. It is logged, never propagated.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// What every handler returns.
pub type HandlerResult = Result<(), HandlerError>;

pub(crate) type RawHandler =
    Arc<dyn Fn(&dyn Message, &Delivery) -> HandlerResult + Send + Sync>;

/// Identifies one registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}

/// Wraps a typed callback so it can sit in an untyped list.
pub(crate) fn typed<T, F>(handler: F) -> RawHandler
where
    T: MessageKind,
    F: Fn(&T, &Delivery) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(move |msg: &dyn Message, delivery: &Delivery| {
        match msg.downcast_ref::<T>() {
            Some(msg) => handler(msg, delivery),
            None => Err(format!(
                "handler for {} received a {:?}",
                std::any::type_name::<T>(),
                msg.message_type()
            )
            .into()),
        }
    })
}

/// Address of the listener's allocation; stable while the dispatcher holds
/// a clone of the `Arc`.
type OwnerKey = usize;

fn owner_key<L>(listener: &Arc<L>) -> OwnerKey {
    Arc::as_ptr(listener) as *const () as usize
}

struct Binding {
    /// Keeps the listener alive, and its address unique, while bound.
    _owner: Arc<dyn Any + Send + Sync>,
    handlers: Vec<HandlerId>,
}

#[derive(Default)]
struct Tables {
    next_id: u64,
    by_type: HashMap<MessageType, Vec<(HandlerId, RawHandler)>>,
    index: HashMap<HandlerId, MessageType>,
    bindings: HashMap<OwnerKey, Binding>,
}

impl Tables {
    fn insert(&mut self, message_type: MessageType, handler: RawHandler) -> HandlerId {
        self.next_id += 1;
        let id = HandlerId(self.next_id);
        self.by_type
            .entry(message_type)
            .or_default()
            .push((id, handler));
        self.index.insert(id, message_type);
        id
    }

    fn remove(&mut self, id: HandlerId) -> bool {
        let Some(message_type) = self.index.remove(&id) else {
            return false;
        };
        if let Some(list) = self.by_type.get_mut(&message_type) {
            list.retain(|(h, _)| *h != id);
            if list.is_empty() {
                self.by_type.remove(&message_type);
            }
        }
        true
    }
}

/// Routes decoded messages to the callbacks registered for their type.
///
/// For one message, callbacks run most-recently-registered first. A
/// callback that fails (returns `Err` or panics) is logged and the
/// remaining callbacks still run.
#[derive(Default)]
pub struct MessageDispatcher {
    tables: Mutex<Tables>,
}

impl MessageDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback for messages of kind `T`.
    pub fn register<T, F>(&self, handler: F) -> HandlerId
    where
        T: MessageKind,
        F: Fn(&T, &Delivery) -> HandlerResult + Send + Sync + 'static,
    {
        self.insert(T::TYPE, typed(handler))
    }

    /// Registers an untyped callback for `message_type`.
    pub fn register_raw<F>(&self, message_type: MessageType, handler: F) -> HandlerId
    where
        F: Fn(&dyn Message, &Delivery) -> HandlerResult + Send + Sync + 'static,
    {
        self.insert(message_type, Arc::new(handler))
    }

    fn insert(&self, message_type: MessageType, handler: RawHandler) -> HandlerId {
        let id = self.tables.lock().insert(message_type, handler);
        tracing::trace!(%id, %message_type, "handler registered");
        id
    }

    /// Removes one callback. Returns `false` if it was not registered.
    ///
    /// Safe to call from inside a handler; a callback removed mid-dispatch
    /// is not invoked for the rest of that dispatch.
    pub fn unregister(&self, id: HandlerId) -> bool {
        let mut tables = self.tables.lock();
        // Handlers owned by a binding are removed with the binding.
        for binding in tables.bindings.values_mut() {
            binding.handlers.retain(|h| *h != id);
        }
        tables.remove(id)
    }

    /// Registers every callback `listener` declares, as one unit.
    ///
    /// The dispatcher keeps a clone of the `Arc` until [`unbind`](Self::unbind).
    ///
    /// # Errors
    /// Returns [`DispatchError::AlreadyBound`] if this exact listener is
    /// already bound.
    pub fn bind<L: Listener>(&self, listener: &Arc<L>) -> Result<usize, DispatchError> {
        let key = owner_key(listener);
        if self.tables.lock().bindings.contains_key(&key) {
            return Err(DispatchError::AlreadyBound(std::any::type_name::<L>()));
        }

        // Listener code runs without the lock held.
        let mut table = HandlerTable::new();
        Arc::clone(listener).bindings(&mut table);

        let mut tables = self.tables.lock();
        if tables.bindings.contains_key(&key) {
            return Err(DispatchError::AlreadyBound(std::any::type_name::<L>()));
        }
        let handlers: Vec<HandlerId> = table
            .into_entries()
            .into_iter()
            .map(|(message_type, handler)| tables.insert(message_type, handler))
            .collect();
        let count = handlers.len();
        let owner: Arc<dyn Any + Send + Sync> = Arc::clone(listener) as Arc<dyn Any + Send + Sync>;
        tables.bindings.insert(
            key,
            Binding {
                _owner: owner,
                handlers,
            },
        );
        tracing::debug!(
            listener = std::any::type_name::<L>(),
            handlers = count,
            "listener bound"
        );
        Ok(count)
    }

    /// Removes every callback `listener` registered through
    /// [`bind`](Self::bind). Returns `false` if it was not bound.
    pub fn unbind<L: Listener>(&self, listener: &Arc<L>) -> bool {
        let binding = {
            let mut tables = self.tables.lock();
            let Some(binding) = tables.bindings.remove(&owner_key(listener)) else {
                return false;
            };
            for id in &binding.handlers {
                tables.remove(*id);
            }
            binding
        };
        tracing::debug!(
            listener = std::any::type_name::<L>(),
            handlers = binding.handlers.len(),
            "listener unbound"
        );
        // Dropped here, outside the lock: this may run the listener's Drop.
        drop(binding);
        true
    }

    pub fn is_bound<L: Listener>(&self, listener: &Arc<L>) -> bool {
        self.tables.lock().bindings.contains_key(&owner_key(listener))
    }

    /// Number of callbacks currently registered for `message_type`.
    pub fn handler_count(&self, message_type: MessageType) -> usize {
        self.tables
            .lock()
            .by_type
            .get(&message_type)
            .map_or(0, Vec::len)
    }

    /// Delivers `msg` to every callback registered for its type.
    /// Returns how many callbacks ran to completion without error.
    pub fn dispatch(&self, msg: &dyn Message, delivery: &Delivery) -> usize {
        let message_type = msg.message_type();
        let snapshot: Vec<(HandlerId, RawHandler)> = {
            let tables = self.tables.lock();
            match tables.by_type.get(&message_type) {
                Some(list) => list.iter().rev().cloned().collect(),
                None => Vec::new(),
            }
        };

        if snapshot.is_empty() {
            tracing::debug!(%message_type, from = %delivery.from, "no handler for message");
            return 0;
        }

        let mut succeeded = 0;
        for (id, handler) in snapshot {
            if !self.tables.lock().index.contains_key(&id) {
                continue;
            }
            match std::panic::catch_unwind(AssertUnwindSafe(|| handler(msg, delivery))) {
                Ok(Ok(())) => succeeded += 1,
                Ok(Err(e)) => {
                    tracing::warn!(%id, %message_type, error = %e, "handler failed");
                }
                Err(panic) => {
                    tracing::warn!(
                        %id,
                        %message_type,
                        panic = panic_message(panic.as_ref()),
                        "handler panicked"
                    );
                }
            }
        }
        succeeded
    }
}

impl fmt::Debug for MessageDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = self.tables.lock();
        f.debug_struct("MessageDispatcher")
            .field("handlers", &tables.index.len())
            .field("bindings", &tables.bindings.len())
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}
