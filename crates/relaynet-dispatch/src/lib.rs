//! Handler dispatch for relaynet.
//!
//! Decoded messages are routed to callbacks by their numeric type id:
//!
//! ```text
//! Connection ──(message, Delivery)──→ MessageDispatcher ──→ callbacks
//! ```
//!
//! Callbacks are registered one at a time ([`MessageDispatcher::register`])
//! or as a batch owned by a [`Listener`] ([`MessageDispatcher::bind`]), so
//! a listener's teardown cannot leave stray registrations behind.

mod dispatcher;
mod error;
mod listener;

pub use dispatcher::{Delivery, HandlerError, HandlerId, HandlerResult, MessageDispatcher};
pub use error::DispatchError;
pub use listener::{HandlerTable, Listener};
