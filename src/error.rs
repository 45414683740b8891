use thiserror::Error;

/// Failure modes for [`crate::AuthCore::start_client`].
///
/// This is the one entry point the distilled spec calls out as fallible
/// ("Allocation failure on `start_client`"): the host is expected to
/// disconnect the offending client with an explanatory reason rather than
/// treat it as a connection-level error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StartClientError {
    /// No non-closing connection exists to carry the request.
    #[error("no active authorization connection available")]
    NoActiveConnection,
    /// The client already has a pending request; starting a second one
    /// would violate the one-request-per-client invariant.
    #[error("client already has a pending authorization request")]
    AlreadyPending,
}
