//! Error taxonomy shared by pod discovery, tunneling and the device client.

use thiserror::Error;

/// Boxed error produced by an injected collaborator (pod lister, forwarder).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by [`locate`](crate::locate), [`open`](crate::open) and
/// [`DeviceClient`](crate::DeviceClient).
///
/// Every error is terminal for the invocation that produced it: nothing in
/// this crate retries or falls back to another pod.
#[derive(Debug, Error)]
pub enum Error {
    /// A caller-supplied argument was empty or otherwise unusable.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A configuration value could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The listing returned no pods at all.
    #[error("no pods found in namespace {namespace} matching {selector}")]
    NotFound {
        /// Namespace that was searched.
        namespace: String,
        /// Canonical label selector that was applied.
        selector: String,
    },

    /// Pods exist but none of them reports the `Ready` condition as `True`.
    #[error("none of {candidates} pods in namespace {namespace} matching {selector} is ready")]
    NoReadyInstance {
        /// Namespace that was searched.
        namespace: String,
        /// Canonical label selector that was applied.
        selector: String,
        /// Number of pods returned by the listing.
        candidates: usize,
    },

    /// A cluster API query or RPC connection failed.
    #[error("{context}: {source}")]
    Transport {
        /// The step that failed, with its identifying arguments.
        context: String,
        /// Underlying failure.
        #[source]
        source: BoxError,
    },

    /// The tunnel was constructed but could not be activated.
    #[error("failed to forward {namespace}/{pod}:{port}: {source}")]
    ForwardFailed {
        /// Namespace of the target pod.
        namespace: String,
        /// Name of the target pod.
        pod: String,
        /// Remote port on the pod.
        port: u16,
        /// Underlying failure.
        #[source]
        source: BoxError,
    },

    /// The RPC succeeded but its payload was structurally impossible.
    #[error("unexpected response: {0}")]
    InvariantViolation(&'static str),

    /// The RPC itself failed; the status is passed through verbatim.
    #[error(transparent)]
    Rpc(#[from] tonic::Status),
}

/// Fieldless view of [`Error`] for callers that branch on the failure class.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// See [`Error::InvalidArgument`].
    InvalidArgument,
    /// See [`Error::Config`].
    Config,
    /// See [`Error::NotFound`].
    NotFound,
    /// See [`Error::NoReadyInstance`].
    NoReadyInstance,
    /// See [`Error::Transport`].
    TransportFailure,
    /// See [`Error::ForwardFailed`].
    ForwardFailed,
    /// See [`Error::InvariantViolation`].
    InvariantViolation,
    /// See [`Error::Rpc`].
    Rpc,
}

impl Error {
    /// Returns the failure class of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Config(_) => ErrorKind::Config,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::NoReadyInstance { .. } => ErrorKind::NoReadyInstance,
            Self::Transport { .. } => ErrorKind::TransportFailure,
            Self::ForwardFailed { .. } => ErrorKind::ForwardFailed,
            Self::InvariantViolation(_) => ErrorKind::InvariantViolation,
            Self::Rpc(_) => ErrorKind::Rpc,
        }
    }

    pub(crate) fn transport(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Transport {
            context: context.into(),
            source: source.into(),
        }
    }
}
