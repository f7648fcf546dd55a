//! Error types for the dispatch layer.

/// Errors that can occur when managing handler registrations.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The listener is already bound; unbind it before binding again.
    #[error("listener {0} is already bound")]
    AlreadyBound(&'static str),
}
