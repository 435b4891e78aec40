// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types shared by every cairn crate.

use std::fmt::{self, Display, Formatter};

use recoverable::{Recovery, RecoveryInfo};

/// Broad classification of a failure.
///
/// The kind decides how a failure is handled: configuration mistakes surface
/// immediately, transport failures are the only ones worth retrying, and protocol
/// failures mean the other side sent something this client does not understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The client was wired up incorrectly, e.g. a second write endpoint or a duplicate subscription.
    Configuration,
    /// The connection to the store failed, dropped or timed out.
    Transport,
    /// The store replied with something that does not match the expected shape.
    Protocol,
    /// The store no longer knows a procedure that was installed earlier.
    ProcedureMissing,
    /// A value could not be encoded or decoded.
    Codec,
}

impl ErrorKind {
    /// Returns a stable lowercase label for logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Transport => "transport",
            Self::Protocol => "protocol",
            Self::ProcedureMissing => "procedure_missing",
            Self::Codec => "codec",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error from a cairn operation.
///
/// This is an opaque error that carries an [`ErrorKind`] and, usually, the underlying
/// cause. Use [`std::error::Error::source()`] to walk the chain.
///
/// # Example
///
/// ```
/// use cairn_store::{Error, ErrorKind};
///
/// let error = Error::configuration("write endpoint already set");
/// assert_eq!(error.kind(), ErrorKind::Configuration);
/// ```
#[ohno::error]
#[display("cairn {kind} error")]
pub struct Error {
    kind: ErrorKind,
}

impl Error {
    /// Creates a configuration error.
    pub fn configuration(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(ErrorKind::Configuration, cause)
    }

    /// Creates a transport error.
    pub fn transport(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(ErrorKind::Transport, cause)
    }

    /// Creates a protocol error.
    pub fn protocol(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(ErrorKind::Protocol, cause)
    }

    /// Creates an error for a procedure the store no longer knows about.
    pub fn procedure_missing(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(ErrorKind::ProcedureMissing, cause)
    }

    /// Creates a codec error.
    pub fn codec(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(ErrorKind::Codec, cause)
    }

    /// Returns the kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns `true` if this error is of the given kind.
    #[must_use]
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

impl Recovery for Error {
    fn recovery(&self) -> RecoveryInfo {
        match self.kind {
            ErrorKind::Transport => RecoveryInfo::retry(),
            _ => RecoveryInfo::never(),
        }
    }
}

/// A specialized [`Result`] type for cairn operations.
pub type Result<T> = std::result::Result<T, Error>;
