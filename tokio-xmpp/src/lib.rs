//! Asynchronous XMPP (RFC 6120/6121) connection and session core.
//!
//! This crate covers exactly the hardest part of an XMPP client: opening a
//! TCP connection, negotiating TLS (STARTTLS or legacy SSL-on-connect),
//! authenticating (SASL or the legacy `jabber:iq:auth`), binding a
//! resource, optionally establishing an RFC 3921 session, and then
//! multiplexing stanzas over the live stream through a porter that
//! dispatches to priority-ordered handlers and tracks outstanding IQ
//! request/response correlations.
//!
//! High-level XEP features (PubSub, roster, presence, service discovery,
//! ...) are not implemented here; this crate stops at the porter and
//! session façade. A generic XML parser/writer is likewise out of scope:
//! [`xml`] carries only the minimal element tree and stream framing this
//! crate's own stanza handling needs.
//!
//! A typical connection:
//!
//! ```no_run
//! use tokio_xmpp::connector::{connect, ConnectorConfig};
//! use tokio_xmpp::session::Session;
//! use tokio_xmpp::tls::VerificationLevel;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConnectorConfig {
//!     jid: "juliet@example.com".parse()?,
//!     password: "r0m30myr0m30".to_string(),
//!     resource: None,
//!     xmpp_server: None,
//!     xmpp_port: None,
//!     old_ssl: false,
//!     legacy: false,
//!     tls_required: true,
//!     plaintext_auth_allowed: false,
//!     encrypted_plain_auth_ok: true,
//!     tls_verification: VerificationLevel::Strict,
//!     establish_session: false,
//! };
//! let connected = connect(&config).await?;
//! let session = Session::new(connected);
//! let porter = session.get_porter();
//! # let _ = porter;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod connector;
pub mod error;
pub mod legacy_auth;
pub mod porter;
pub mod session;
pub mod stanza;
pub mod tls;
pub mod xml;
pub mod xmlstream;

pub use error::{AuthError, CertVerificationError, ConnectorError, FramedConnectionError, PorterError};
pub use porter::Porter;
pub use session::Session;
pub use stanza::Stanza;
