//! Crate-wide error and result types
//!
//! Every fallible boundary-crossing operation in this crate returns a
//! tagged-variant result rather than panicking. [`DiagClientError`] is the
//! top level error type returned by conversations and the client façade;
//! [`FrameError`] covers codec-level decode failures and is convertible
//! into it.

use crate::doip::frame::FrameError;

/// Result alias used throughout the public API
pub type DiagClientResult<T> = Result<T, DiagClientError>;

#[derive(Debug)]
/// Top level error produced by the diagnostic client
pub enum DiagClientError {
    /// The configuration file was missing a required key, or a value failed
    /// validation (e.g. `P2StarClientMax < P2ClientMax`)
    InvalidConfig(String),
    /// TCP connect to the remote DoIP server failed (refused, unreachable, or
    /// no route)
    ConnectionFailed(std::io::Error),
    /// Routing activation was refused by the server with the given response
    /// code (see ISO 13400-2 Table 19)
    RoutingActivationFailed(u8),
    /// No routing activation response arrived within the activation timeout
    ActivationTimeout,
    /// `SendDiagnosticRequest` was called while the conversation was not
    /// `Active` (i.e. not routing-activated)
    NotActivated,
    /// A parameter passed to a public function was invalid (e.g. an empty
    /// UDS payload)
    InvalidParameter,
    /// Writing the encoded frame to the socket failed
    TransmitFailed(std::io::Error),
    /// No diagnostic message acknowledgement arrived within P2_client_max
    AckTimeout,
    /// The server sent a DoIP diagnostic message negative acknowledgement
    NegativeAck(u8),
    /// No final (non-pending) diagnostic response arrived within
    /// P2*_client_max
    ResponseTimeout,
    /// The underlying socket was closed by the peer, or a frame failed to
    /// decode and the channel was torn down
    SocketError(String),
    /// A conversation with this name does not exist in the configuration
    UnknownConversation(String),
    /// `ConnectToDiagServer` called on an already-connected conversation
    AlreadyConnected,
    /// No transport available to service the request (channel creation
    /// failed)
    NoTransport,
    /// A second `SendDiagnosticRequest` arrived while one was already in
    /// flight on the same channel; the channel serializes requests so this
    /// is rejected rather than interleaved
    RequestInFlight,
    /// A malformed DoIP frame was received or was about to be sent
    Frame(FrameError),
}

impl std::fmt::Display for DiagClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiagClientError::InvalidConfig(reason) => write!(f, "invalid configuration: {reason}"),
            DiagClientError::ConnectionFailed(e) => write!(f, "TCP connect failed: {e}"),
            DiagClientError::RoutingActivationFailed(code) => {
                write!(f, "routing activation refused, response code 0x{code:02X}")
            }
            DiagClientError::ActivationTimeout => {
                write!(f, "timed out waiting for routing activation response")
            }
            DiagClientError::NotActivated => {
                write!(f, "conversation is not routing-activated")
            }
            DiagClientError::InvalidParameter => write!(f, "invalid parameter"),
            DiagClientError::TransmitFailed(e) => write!(f, "socket write failed: {e}"),
            DiagClientError::AckTimeout => write!(f, "timed out waiting for diagnostic message ack"),
            DiagClientError::NegativeAck(code) => {
                write!(f, "diagnostic message negative ack, code 0x{code:02X}")
            }
            DiagClientError::ResponseTimeout => {
                write!(f, "timed out waiting for diagnostic response")
            }
            DiagClientError::SocketError(reason) => write!(f, "socket error: {reason}"),
            DiagClientError::UnknownConversation(name) => {
                write!(f, "no conversation named '{name}' in configuration")
            }
            DiagClientError::AlreadyConnected => write!(f, "conversation is already connected"),
            DiagClientError::NoTransport => write!(f, "no transport available"),
            DiagClientError::RequestInFlight => {
                write!(f, "another diagnostic request is already in flight on this channel")
            }
            DiagClientError::Frame(e) => write!(f, "frame error: {e}"),
        }
    }
}

impl std::error::Error for DiagClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DiagClientError::ConnectionFailed(e) | DiagClientError::TransmitFailed(e) => Some(e),
            DiagClientError::Frame(e) => Some(e),
            _ => None,
        }
    }
}

impl From<FrameError> for DiagClientError {
    fn from(e: FrameError) -> Self {
        Self::Frame(e)
    }
}

#[derive(Debug, thiserror::Error)]
/// Error produced while loading a [`crate::config::ClientConfig`] from disk
pub enum ConfigError {
    /// The file could not be opened or read
    #[error("could not read config file {path}: {source}")]
    Io {
        /// Path that was attempted
        path: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },
    /// The file's contents were not valid JSON
    #[error("malformed JSON in config file: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The JSON parsed, but was missing a required key or failed validation
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
