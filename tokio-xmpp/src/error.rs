//! Error taxonomies.
//!
//! Per the design, there are several *disjoint* error domains rather than
//! one all-encompassing error enum: [`FramedConnectionError`] (transport
//! framing), [`CertVerificationError`] (TLS), [`AuthError`] (SASL/legacy
//! auth), [`PorterError`] and [`ConnectorError`] (connection bring-up).

use std::error::Error as StdError;
use std::fmt;
use std::io;

/// Errors from the [`crate::xmlstream::FramedXmlConnection`].
#[derive(Debug)]
pub enum FramedConnectionError {
    /// The peer disconnected mid-frame.
    Eos,
    /// The peer sent a clean stream close.
    Closed,
    /// The byte stream was closed unconditionally via `force_close`.
    ForciblyClosed,
    /// An operation requires the stream to be open but it is not.
    NotOpen,
    /// An operation requires the stream not to be closed, but it is.
    IsClosed,
    /// An operation requires the stream not to be open, but it already is.
    IsOpen,
    /// A second send (or recv) was attempted while one was already pending.
    Pending,
    /// Underlying I/O error.
    Io(io::Error),
    /// Malformed XML / stanza content.
    Parse(String),
}

impl fmt::Display for FramedConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Eos => write!(f, "peer disconnected mid-frame"),
            Self::Closed => write!(f, "stream closed by peer"),
            Self::ForciblyClosed => write!(f, "forcibly closed"),
            Self::NotOpen => write!(f, "stream is not open"),
            Self::IsClosed => write!(f, "stream is closed"),
            Self::IsOpen => write!(f, "stream is already open"),
            Self::Pending => write!(f, "an operation of this kind is already pending"),
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Parse(e) => write!(f, "parse error: {}", e),
        }
    }
}

impl StdError for FramedConnectionError {}

impl From<io::Error> for FramedConnectionError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// TLS certificate verification outcomes, mapped to a flat taxonomy
/// independent of the underlying TLS implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertVerificationError {
    /// The certificate's identity does not match the expected peer name.
    NameMismatch,
    /// The certificate chain has been revoked.
    Revoked,
    /// The certificate is not yet valid.
    NotActive,
    /// The certificate has expired.
    Expired,
    /// The signer of the certificate is unknown.
    SignerUnknown,
    /// The signer is known but not authorised to sign for this identity.
    SignerUnauthorised,
    /// The certificate uses an insecure algorithm or key size.
    Insecure,
    /// The certificate is structurally invalid.
    Invalid,
    /// The chain looks like it could be a denial-of-service attempt
    /// (e.g. pathologically deep or recursive).
    MaybeDos,
    /// An internal error occurred while verifying.
    InternalError,
    /// An error occurred that does not map to any other variant.
    UnknownError,
}

impl fmt::Display for CertVerificationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::NameMismatch => "certificate name mismatch",
            Self::Revoked => "certificate revoked",
            Self::NotActive => "certificate not yet active",
            Self::Expired => "certificate expired",
            Self::SignerUnknown => "certificate signer unknown",
            Self::SignerUnauthorised => "certificate signer unauthorised",
            Self::Insecure => "certificate insecure",
            Self::Invalid => "certificate invalid",
            Self::MaybeDos => "certificate chain looks like a denial-of-service attempt",
            Self::InternalError => "internal error verifying certificate",
            Self::UnknownError => "unknown certificate verification error",
        };
        write!(f, "{}", s)
    }
}

impl StdError for CertVerificationError {}

/// Authentication errors (§7), common to both the SASL driver and the
/// legacy `jabber:iq:auth` driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Generic authentication failure.
    Failure,
    /// The connection was reset during authentication.
    Connreset,
    /// A `<stream:error/>` was received during authentication.
    Stream,
    /// The server rejected the requested resource.
    Resource,
    /// No mechanism offered by the peer is supported/permitted.
    NotSupported,
    /// The server rejected the credentials.
    NotAuthorized,
    /// The requested resource is already bound elsewhere.
    ResourceConflict,
    /// No credentials were supplied.
    NoCredentials,
    /// The peer violated the wire protocol for the auth exchange.
    InvalidReply,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Failure => "authentication failure",
            Self::Connreset => "connection reset during authentication",
            Self::Stream => "stream error during authentication",
            Self::Resource => "resource error during authentication",
            Self::NotSupported => "no supported/permitted mechanism offered",
            Self::NotAuthorized => "not authorized",
            Self::ResourceConflict => "resource conflict",
            Self::NoCredentials => "no credentials supplied",
            Self::InvalidReply => "invalid reply from peer",
        };
        write!(f, "{}", s)
    }
}

impl StdError for AuthError {}

/// Errors raised by the [`crate::porter::Porter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PorterError {
    /// The porter has not been started yet.
    NotStarted,
    /// The porter is closing; no further sends are accepted.
    Closing,
    /// The porter is closed.
    Closed,
    /// The stanza passed to an IQ-specific operation is not an IQ.
    NotIq,
    /// The porter was forcibly closed.
    ForciblyClosed,
}

impl fmt::Display for PorterError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::NotStarted => "porter has not been started",
            Self::Closing => "porter is closing",
            Self::Closed => "porter is closed",
            Self::NotIq => "stanza is not an IQ",
            Self::ForciblyClosed => "porter was forcibly closed",
        };
        write!(f, "{}", s)
    }
}

impl StdError for PorterError {}

/// Errors raised while bringing up a connection (§4.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorError {
    /// Unexpected internal condition.
    Unknown,
    /// A connect operation is already in progress.
    InProgress,
    /// The supplied JID could not be parsed.
    BadJid,
    /// The server does not speak XMPP 1.0 (no `<stream:features/>`).
    NonXmppV1Server,
    /// The `<stream:features/>` stanza was malformed.
    BadFeatures,
    /// TLS could not be negotiated but was required.
    TlsUnavailable,
    /// The peer refused STARTTLS.
    TlsRefused,
    /// The TLS handshake itself failed.
    TlsSessionFailed(CertVerificationError),
    /// Resource binding is not offered by the server.
    BindUnavailable,
    /// Resource binding failed for an unspecified reason.
    BindFailed,
    /// Resource binding request was malformed.
    BindInvalid,
    /// Resource binding was denied.
    BindDenied,
    /// The requested resource conflicts with one already bound.
    BindConflict,
    /// The server rejected the bind request.
    BindRejected,
    /// Session establishment failed.
    SessionFailed,
    /// Session establishment was denied.
    SessionDenied,
    /// Session establishment conflicted with existing state.
    SessionConflict,
    /// The server rejected the session request.
    SessionRejected,
    /// The server redirected the client to another host
    /// (`<see-other-host/>`); carries the raw `host[:port]` target.
    SeeOtherHost(String),
    /// The operation required more security than is available.
    Insecure,
    /// In-band registration failed.
    RegistrationFailed,
    /// In-band registration is not available.
    RegistrationUnavailable,
    /// In-band registration is not supported by this client.
    RegistrationUnsupported,
    /// In-band registration fields were empty/missing.
    RegistrationEmpty,
    /// The account already exists.
    RegistrationConflict,
    /// The server rejected the registration.
    RegistrationRejected,
    /// Unregistration (account deletion) failed.
    UnregisterFailed,
    /// Unregistration was denied.
    UnregisterDenied,
    /// Transport-level I/O error.
    Io(io::Error),
    /// Authentication-domain error encountered during bring-up.
    Auth(AuthError),
}

impl fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown connector error"),
            Self::InProgress => write!(f, "a connect operation is already in progress"),
            Self::BadJid => write!(f, "invalid JID"),
            Self::NonXmppV1Server => write!(f, "server does not speak XMPP 1.0"),
            Self::BadFeatures => write!(f, "malformed stream features"),
            Self::TlsUnavailable => write!(f, "TLS unavailable"),
            Self::TlsRefused => write!(f, "TLS refused by peer"),
            Self::TlsSessionFailed(e) => write!(f, "TLS handshake failed: {}", e),
            Self::BindUnavailable => write!(f, "resource binding unavailable"),
            Self::BindFailed => write!(f, "resource binding failed"),
            Self::BindInvalid => write!(f, "resource binding request invalid"),
            Self::BindDenied => write!(f, "resource binding denied"),
            Self::BindConflict => write!(f, "resource binding conflict"),
            Self::BindRejected => write!(f, "resource binding rejected"),
            Self::SessionFailed => write!(f, "session establishment failed"),
            Self::SessionDenied => write!(f, "session establishment denied"),
            Self::SessionConflict => write!(f, "session establishment conflict"),
            Self::SessionRejected => write!(f, "session establishment rejected"),
            Self::SeeOtherHost(target) => write!(f, "redirected to other host: {}", target),
            Self::Insecure => write!(f, "insufficient security for requested operation"),
            Self::RegistrationFailed => write!(f, "registration failed"),
            Self::RegistrationUnavailable => write!(f, "registration unavailable"),
            Self::RegistrationUnsupported => write!(f, "registration unsupported"),
            Self::RegistrationEmpty => write!(f, "registration fields empty"),
            Self::RegistrationConflict => write!(f, "registration conflict"),
            Self::RegistrationRejected => write!(f, "registration rejected"),
            Self::UnregisterFailed => write!(f, "unregistration failed"),
            Self::UnregisterDenied => write!(f, "unregistration denied"),
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Auth(e) => write!(f, "authentication error: {}", e),
        }
    }
}

impl StdError for ConnectorError {}

impl From<io::Error> for ConnectorError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<AuthError> for ConnectorError {
    fn from(e: AuthError) -> Self {
        Self::Auth(e)
    }
}

impl From<FramedConnectionError> for ConnectorError {
    fn from(e: FramedConnectionError) -> Self {
        match e {
            FramedConnectionError::Io(e) => Self::Io(e),
            FramedConnectionError::Eos | FramedConnectionError::Closed => {
                Self::Io(io::Error::new(io::ErrorKind::UnexpectedEof, e.to_string()))
            }
            other => Self::Io(io::Error::new(io::ErrorKind::Other, other.to_string())),
        }
    }
}
