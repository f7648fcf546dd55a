//! State shared by every transport implementation: the outbound queue,
//! the shutdown signal, and the closed flag.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};

use crate::{TransportError, TransportId};

/// Counter for generating unique transport IDs.
static NEXT_TRANSPORT_ID: AtomicU64 = AtomicU64::new(1);

/// How long a closing socket transport keeps writing what was queued
/// before it drops the rest.
pub(crate) const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Where [`TransportCore::send`] puts outbound chunks.
pub(crate) enum Outbound {
    /// Socket transports. A full queue means the peer stopped reading.
    Bounded(mpsc::Sender<Bytes>),
    /// In-process delivery, which never waits on a network peer.
    Unbounded(mpsc::UnboundedSender<Bytes>),
}

pub(crate) struct TransportCore {
    id: TransportId,
    outbound: Outbound,
    shutdown: watch::Sender<bool>,
    closed: AtomicBool,
}

impl TransportCore {
    /// Creates the core around an outbound queue. The returned receiver
    /// observes the shutdown signal; clone it for every loop that needs it.
    pub(crate) fn new(outbound: Outbound) -> (Self, watch::Receiver<bool>) {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let core = Self {
            id: TransportId::new(
                NEXT_TRANSPORT_ID.fetch_add(1, Ordering::Relaxed),
            ),
            outbound,
            shutdown,
            closed: AtomicBool::new(false),
        };
        (core, shutdown_rx)
    }

    pub(crate) fn id(&self) -> TransportId {
        self.id
    }

    pub(crate) fn send(&self, data: Bytes) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        match &self.outbound {
            Outbound::Unbounded(tx) => tx.send(data).map_err(|_| TransportError::Closed),
            Outbound::Bounded(tx) => match tx.try_send(data) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => {
                    let capacity = tx.max_capacity();
                    tracing::warn!(id = %self.id, capacity, "send queue full, closing transport");
                    self.close();
                    Err(TransportError::QueueFull { capacity })
                }
                Err(TrySendError::Closed(_)) => Err(TransportError::Closed),
            },
        }
    }

    /// Marks the transport closed and signals its loops. Returns `true`
    /// only for the call that actually performed the close.
    pub(crate) fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.shutdown.send_replace(true);
        tracing::debug!(id = %self.id, "transport closing");
        true
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Resolves once the shutdown signal has been raised (or its sender is gone).
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
