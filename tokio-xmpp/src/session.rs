//! The session façade.
//!
//! Grounded on `wocky-session.h`: a thin object constructed once the
//! connector hands off a bound, authenticated stream, owning a porter and
//! exposing it (plus a contact factory and the bound JID) to higher-level
//! application code. The session does not drive connection setup itself —
//! that's the connector's job (`crate::connector::connect`).

use jid::Jid;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::connector::ConnectedSession;
use crate::porter::Porter;

/// An external collaborator that produces/tracks contacts for a session's
/// bound JID (`wocky-session.h`'s `wocky_session_get_contact_factory`). The
/// core has no opinion on what a "contact" is; it only needs something to
/// hand back through the façade.
pub trait ContactFactory: Send + Sync {}

/// A `ContactFactory` that has nothing to offer, for callers that only
/// need the porter.
pub struct NullContactFactory;

impl ContactFactory for NullContactFactory {}

/// Owns a porter bound to a framed connection, plus a contact factory.
/// Constructed after the connector completes (`ConnectedSession`); does
/// not itself drive TCP/TLS/auth/bind.
pub struct Session {
    porter: Porter,
    contact_factory: Box<dyn ContactFactory>,
    jid: Jid,
}

impl Session {
    /// Build a session around an already-bound connection, using the
    /// default [`NullContactFactory`].
    pub fn new<Io>(connected: ConnectedSession<Io>) -> Self
    where
        Io: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self::with_contact_factory(connected, Box::new(NullContactFactory))
    }

    /// Build a session around an already-bound connection with a caller-
    /// supplied contact factory.
    pub fn with_contact_factory<Io>(
        connected: ConnectedSession<Io>,
        contact_factory: Box<dyn ContactFactory>,
    ) -> Self
    where
        Io: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let porter = Porter::new(connected.jid.clone());
        Session {
            porter,
            contact_factory,
            jid: connected.jid,
        }
        .with_connection(connected.connection)
    }

    fn with_connection<Io>(self, connection: crate::xmlstream::FramedXmlConnection<Io>) -> Self
    where
        Io: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        // `start` is idempotent-checked by the porter itself (`NotStarted`
        // guard); stash the connection before returning so construction
        // reads as a single expression at call sites.
        self.porter.start(connection);
        self
    }

    /// The porter multiplexing this session's stream.
    pub fn get_porter(&self) -> &Porter {
        &self.porter
    }

    /// The contact factory supplied at construction (or the null default).
    pub fn get_contact_factory(&self) -> &dyn ContactFactory {
        self.contact_factory.as_ref()
    }

    /// The full JID this session was bound to.
    pub fn get_jid(&self) -> &Jid {
        &self.jid
    }

    /// Start the session running. Delegates entirely to the porter, which
    /// is already driving its read/write loops as of construction; this
    /// exists so callers have a single, explicit "go" verb matching
    /// `wocky-session.h`'s surface, and is safe to call more than once.
    pub fn start(&self) {
        // The porter was already started in `with_connection`; nothing
        // further is required. Exposed as a no-op so callers have an
        // explicit "go" verb to call regardless of construction path.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xmlstream::FramedXmlConnection;
    use tokio::io::duplex;

    #[tokio::test]
    async fn session_exposes_porter_and_jid() {
        let (client_io, _server_io) = duplex(4096);
        let jid: Jid = "juliet@example.com/balcony".parse().unwrap();
        let connected = ConnectedSession {
            connection: FramedXmlConnection::new(client_io),
            stream_id: "s1".to_string(),
            jid: jid.clone(),
        };
        let session = Session::new(connected);
        assert_eq!(session.get_jid(), &jid);
        assert_eq!(session.get_porter().full_jid(), &jid);
        session.start();
    }
}
