//! Error types for the session layer.

/// Errors surfaced by the coordinator's public handle.
///
/// Operation failures never appear here — those end in eject directives.
/// This covers only the mechanics of talking to the coordinator task.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The coordinator task has stopped; no further commands can be
    /// delivered.
    #[error("coordinator has shut down")]
    Closed,
}
