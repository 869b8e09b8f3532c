//! Connection bring-up state machine: TCP → (legacy SSL or STARTTLS) →
//! (SASL or legacy auth) → resource bind → optional session → handoff to
//! the porter.
//!
//! Grounded on `wocky-connector.c`/`.h` for the state graph and error
//! taxonomy. DNS resolution tries SRV first, falling back to a direct
//! connect against the bare domain.

use std::collections::HashMap;

use jid::Jid;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::auth::{self, AuthRegistry, Credentials};
use crate::error::ConnectorError;
use crate::stanza::{Kind, Stanza, StanzaErrorCondition, StreamError};
use crate::tls::{self, DefaultTlsVerifier, VerificationLevel};
use crate::xml::Element;
use crate::xmlstream::FramedXmlConnection;

const NS_STREAMS: &str = "http://etherx.jabber.org/streams";
const NS_JABBER_CLIENT: &str = "jabber:client";
const NS_STARTTLS: &str = "urn:ietf:params:xml:ns:xmpp-tls";
const NS_SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";
const NS_BIND: &str = "urn:ietf:params:xml:ns:xmpp-bind";
const NS_SESSION: &str = "urn:ietf:params:xml:ns:xmpp-session";
const NS_REGISTER: &str = "jabber:iq:register";

const MAX_SEE_OTHER_HOST_REDIRECTS: u32 = 5;

/// Bring-up configuration. Every field is read-only input; nothing here is
/// mutated during connect.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub jid: Jid,
    pub password: String,
    /// `None` asks the server to assign a resource.
    pub resource: Option<String>,
    /// Override the host to dial instead of the JID's domain (e.g. a
    /// configured connect-through proxy host).
    pub xmpp_server: Option<String>,
    pub xmpp_port: Option<u16>,
    /// Dial straight into TLS instead of negotiating STARTTLS.
    pub old_ssl: bool,
    /// Use the legacy `jabber:iq:auth` driver instead of SASL.
    pub legacy: bool,
    /// Fail the connection if TLS cannot be negotiated.
    pub tls_required: bool,
    /// Allow a plaintext-exposing SASL mechanism even over an unencrypted
    /// channel (insecure, opt-in).
    pub plaintext_auth_allowed: bool,
    /// Allow a plaintext-exposing SASL mechanism once the channel is
    /// TLS-encrypted.
    pub encrypted_plain_auth_ok: bool,
    pub tls_verification: VerificationLevel,
    /// Whether a legacy RFC 3921 `<session/>` bind is attempted when
    /// offered (most modern servers don't advertise it and it's a no-op).
    pub establish_session: bool,
}

/// Extra fields for XEP-0077 in-band registration.
#[derive(Debug, Clone, Default)]
pub struct RegistrationFields {
    pub username: String,
    pub password: String,
    pub email: Option<String>,
}

/// The end state handed off to the porter: a framed connection already
/// past stream negotiation/auth/bind, plus the full JID the server
/// confirmed.
pub struct ConnectedSession<Io> {
    pub connection: FramedXmlConnection<Io>,
    pub stream_id: String,
    pub jid: Jid,
}

type BoxedIo = std::pin::Pin<Box<dyn AsyncReadWrite>>;

trait AsyncReadWrite: AsyncRead + AsyncWrite + Send {}
impl<T: AsyncRead + AsyncWrite + Send> AsyncReadWrite for T {}

async fn tcp_connect(config: &ConnectorConfig) -> Result<TcpStream, ConnectorError> {
    let host = config
        .xmpp_server
        .clone()
        .unwrap_or_else(|| config.jid.domain().to_string());
    let port = config.xmpp_port.unwrap_or(if config.old_ssl { 5223 } else { 5222 });

    #[cfg(feature = "dns")]
    let mut srv_err: Option<ConnectorError> = None;
    #[cfg(feature = "dns")]
    {
        if config.xmpp_server.is_none() && config.xmpp_port.is_none() {
            if let Ok((srv_host, srv_port)) = resolve_srv(&config.jid.domain().to_string()).await {
                log::debug!("Attempting connection to {srv_host}:{srv_port} (SRV)");
                match TcpStream::connect((srv_host.as_str(), srv_port)).await {
                    Ok(stream) => return Ok(stream),
                    Err(e) => {
                        log::debug!("SRV connect failed, falling back to {host}:{port}");
                        srv_err = Some(ConnectorError::from(e));
                    }
                }
            }
        }
    }

    log::debug!("Attempting connection to {host}:{port}");
    match TcpStream::connect((host.as_str(), port)).await {
        Ok(stream) => Ok(stream),
        Err(e) => {
            #[cfg(feature = "dns")]
            if let Some(srv_err) = srv_err {
                return Err(srv_err);
            }
            Err(ConnectorError::from(e))
        }
    }
}

#[cfg(feature = "dns")]
async fn resolve_srv(domain: &str) -> Result<(String, u16), ConnectorError> {
    use hickory_resolver::config::{ResolverConfig, ResolverOpts};
    use hickory_resolver::TokioAsyncResolver;

    let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
    let ascii_domain = idna::domain_to_ascii(domain).map_err(|_| ConnectorError::BadJid)?;
    let lookup = resolver
        .srv_lookup(format!("_xmpp-client._tcp.{ascii_domain}."))
        .await
        .map_err(|_| ConnectorError::Unknown)?;
    let best = lookup
        .iter()
        .min_by_key(|srv| (srv.priority(), std::cmp::Reverse(srv.weight())))
        .ok_or(ConnectorError::Unknown)?;
    Ok((best.target().to_utf8(), best.port()))
}

fn open_attrs<'a>(domain: &'a str) -> Vec<(&'a str, &'a str)> {
    vec![
        ("xmlns", NS_JABBER_CLIENT),
        ("xmlns:stream", NS_STREAMS),
        ("to", domain),
        ("version", "1.0"),
    ]
}

async fn negotiate_open<Io: AsyncRead + AsyncWrite + Unpin>(
    conn: &FramedXmlConnection<Io>,
    domain: &str,
) -> Result<(String, Element), ConnectorError> {
    let attrs = open_attrs(domain);
    let (send_res, recv_res) = tokio::join!(conn.send_open(&attrs), conn.recv_open());
    send_res?;
    let opened = recv_res?;
    let stream_id = opened.attr("id").unwrap_or_default().to_string();

    let features = loop {
        let stanza = conn.recv_stanza().await?.ok_or(ConnectorError::NonXmppV1Server)?;
        if stanza.root.ns == NS_STREAMS && stanza.root.name == "error" {
            let err = StreamError::from_element(&stanza.root);
            return Err(map_stream_error(&err));
        }
        if stanza.root.ns == NS_STREAMS && stanza.root.name == "features" {
            break stanza.root;
        }
        // Anything else before features is unexpected for a v1 server.
    };
    Ok((stream_id, features))
}

fn map_stream_error(err: &StreamError) -> ConnectorError {
    use crate::stanza::StreamErrorCondition::*;
    match &err.condition {
        SeeOtherHost(target) => ConnectorError::SeeOtherHost(target.clone()),
        Conflict => ConnectorError::BindConflict,
        NotAuthorized => ConnectorError::Insecure,
        HostUnknown | HostGone => ConnectorError::NonXmppV1Server,
        _ => ConnectorError::Unknown,
    }
}

/// Parse a `see-other-host` value of the form `host` or `host:port`.
fn parse_see_other_host(value: &str) -> (String, Option<u16>) {
    match value.rsplit_once(':') {
        Some((host, port)) => match port.parse() {
            Ok(p) => (host.to_string(), Some(p)),
            Err(_) => (value.to_string(), None),
        },
        None => (value.to_string(), None),
    }
}

fn offers_starttls(features: &Element) -> bool {
    features.get_child("starttls", NS_STARTTLS).is_some()
}

fn starttls_required_by_peer(features: &Element) -> bool {
    features
        .get_child("starttls", NS_STARTTLS)
        .map(|el| el.get_child("required", NS_STARTTLS).is_some())
        .unwrap_or(false)
}

fn offered_mechanisms(features: &Element) -> Vec<String> {
    features
        .get_child("mechanisms", NS_SASL)
        .map(|mechs| {
            mechs
                .children_named("mechanism", NS_SASL)
                .filter_map(|m| m.text.clone())
                .collect()
        })
        .unwrap_or_default()
}

async fn starttls_upgrade<Io>(
    conn: FramedXmlConnection<Io>,
    domain: &str,
    config: &ConnectorConfig,
) -> Result<FramedXmlConnection<tokio_rustls::client::TlsStream<Io>>, ConnectorError>
where
    Io: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let starttls_el = Element::new("starttls", NS_STARTTLS);
    conn.send_stanza(&starttls_el).await?;
    let reply = conn.recv_stanza().await?.ok_or(ConnectorError::TlsRefused)?;
    if reply.root.ns != NS_STARTTLS || reply.root.name != "proceed" {
        log::warn!("STARTTLS refused by {domain}");
        return Err(ConnectorError::TlsRefused);
    }
    log::debug!("STARTTLS proceeding, starting TLS handshake with {domain}");
    let connector = tls::connector(
        config.tls_verification,
        domain,
        Box::new(DefaultTlsVerifier {
            extra_identities: config.xmpp_server.clone().into_iter().collect(),
        }),
    );
    let domain = domain.to_string();
    conn.reset(move |io| async move { tls::handshake(&connector, &domain, io).await })
        .await
        .map_err(ConnectorError::TlsSessionFailed)
}

async fn do_sasl<Io: AsyncRead + AsyncWrite + Unpin>(
    conn: &FramedXmlConnection<Io>,
    config: &ConnectorConfig,
    offered: &[String],
    channel_encrypted: bool,
    stream_id: &str,
) -> Result<(), ConnectorError> {
    let registry = AuthRegistry::with_defaults();
    let factory = registry
        .select(
            offered,
            channel_encrypted,
            config.encrypted_plain_auth_ok,
            config.plaintext_auth_allowed,
        )
        .map_err(ConnectorError::Auth)?;
    let mut extra = HashMap::new();
    extra.insert("service_domain".to_string(), config.jid.domain().to_string());
    extra.insert("stream_id".to_string(), stream_id.to_string());
    let creds = Credentials {
        authzid: None,
        username: config.jid.node().unwrap_or_default().to_string(),
        password: config.password.clone(),
        extra,
    };
    log::debug!("Authenticating as {} via {}", config.jid, factory.name());
    let mut mechanism = factory.create(&creds);
    let result = auth::authenticate(conn.reader(), conn.writer(), factory.name(), mechanism.as_mut())
        .await
        .map_err(ConnectorError::Auth);
    if let Err(e) = &result {
        log::warn!("Authentication failed: {e}");
    }
    result
}

async fn bind_resource<Io: AsyncRead + AsyncWrite + Unpin>(
    conn: &FramedXmlConnection<Io>,
    resource: Option<&str>,
) -> Result<Jid, ConnectorError> {
    let id = conn.new_id();
    let mut bind_el = Element::new("bind", NS_BIND);
    if let Some(r) = resource {
        bind_el = bind_el.with_child(Element::new("resource", NS_BIND).with_text(r));
    }
    let iq = Element::new("iq", NS_JABBER_CLIENT)
        .with_attr("type", "set")
        .with_attr("id", id.clone())
        .with_child(bind_el);
    conn.send_stanza(&iq).await?;
    let reply = recv_matching_iq(conn, &id).await?;
    if reply.sub_kind.is_error() {
        let err = classify_bind_error(&reply);
        log::warn!("Resource bind failed: {err}");
        return Err(err);
    }
    let bind_result = reply
        .root
        .get_child("bind", NS_BIND)
        .ok_or(ConnectorError::BindInvalid)?;
    let full_jid_text = bind_result
        .get_child("jid", NS_BIND)
        .and_then(|el| el.text.as_deref())
        .ok_or(ConnectorError::BindInvalid)?;
    let full_jid = full_jid_text
        .parse::<Jid>()
        .map_err(|_| ConnectorError::BindInvalid)?;
    log::debug!("Bound resource, full JID is {full_jid}");
    Ok(full_jid)
}

fn classify_bind_error(stanza: &Stanza) -> ConnectorError {
    match stanza.stanza_error().map(|e| e.condition) {
        Some(StanzaErrorCondition::Conflict) => ConnectorError::BindConflict,
        Some(StanzaErrorCondition::NotAllowed) | Some(StanzaErrorCondition::Forbidden) => {
            ConnectorError::BindDenied
        }
        Some(StanzaErrorCondition::BadRequest) => ConnectorError::BindInvalid,
        _ => ConnectorError::BindRejected,
    }
}

async fn recv_matching_iq<Io: AsyncRead + AsyncWrite + Unpin>(
    conn: &FramedXmlConnection<Io>,
    id: &str,
) -> Result<Stanza, ConnectorError> {
    loop {
        let stanza = conn.recv_stanza().await?.ok_or(ConnectorError::SessionFailed)?;
        if matches!(stanza.kind, Kind::Iq) && stanza.id.as_deref() == Some(id) {
            return Ok(stanza);
        }
    }
}

async fn establish_session<Io: AsyncRead + AsyncWrite + Unpin>(
    conn: &FramedXmlConnection<Io>,
) -> Result<(), ConnectorError> {
    let id = conn.new_id();
    let iq = Element::new("iq", NS_JABBER_CLIENT)
        .with_attr("type", "set")
        .with_attr("id", id.clone())
        .with_child(Element::new("session", NS_SESSION));
    conn.send_stanza(&iq).await?;
    let reply = recv_matching_iq(conn, &id).await?;
    if reply.sub_kind.is_error() {
        return Err(match reply.stanza_error().map(|e| e.condition) {
            Some(StanzaErrorCondition::Conflict) => ConnectorError::SessionConflict,
            Some(StanzaErrorCondition::Forbidden) => ConnectorError::SessionDenied,
            _ => ConnectorError::SessionRejected,
        });
    }
    Ok(())
}

/// Register a new account via XEP-0077 before authenticating.
pub async fn register<Io: AsyncRead + AsyncWrite + Unpin>(
    conn: &FramedXmlConnection<Io>,
    fields: &RegistrationFields,
) -> Result<(), ConnectorError> {
    let id = conn.new_id();
    let mut query = Element::new("query", NS_REGISTER)
        .with_child(Element::new("username", NS_REGISTER).with_text(fields.username.clone()))
        .with_child(Element::new("password", NS_REGISTER).with_text(fields.password.clone()));
    if let Some(email) = &fields.email {
        query = query.with_child(Element::new("email", NS_REGISTER).with_text(email.clone()));
    }
    let iq = Element::new("iq", NS_JABBER_CLIENT)
        .with_attr("type", "set")
        .with_attr("id", id.clone())
        .with_child(query);
    conn.send_stanza(&iq).await?;
    let reply = recv_matching_iq(conn, &id).await?;
    if reply.sub_kind.is_error() {
        return Err(match reply.stanza_error().map(|e| e.condition) {
            Some(StanzaErrorCondition::Conflict) => ConnectorError::RegistrationConflict,
            Some(StanzaErrorCondition::NotAcceptable) => ConnectorError::RegistrationEmpty,
            _ => ConnectorError::RegistrationRejected,
        });
    }
    Ok(())
}

/// Delete the currently-authenticated account via XEP-0077.
pub async fn unregister<Io: AsyncRead + AsyncWrite + Unpin>(
    conn: &FramedXmlConnection<Io>,
) -> Result<(), ConnectorError> {
    let id = conn.new_id();
    let iq = Element::new("iq", NS_JABBER_CLIENT)
        .with_attr("type", "set")
        .with_attr("id", id.clone())
        .with_child(Element::new("query", NS_REGISTER).with_child(Element::new("remove", NS_REGISTER)));
    conn.send_stanza(&iq).await?;
    let reply = recv_matching_iq(conn, &id).await?;
    if reply.sub_kind.is_error() {
        return Err(ConnectorError::UnregisterDenied);
    }
    Ok(())
}

/// Run the whole bring-up sequence over a TCP connection established
/// according to `config`, handling at most
/// [`MAX_SEE_OTHER_HOST_REDIRECTS`] `see-other-host` redirects.
pub async fn connect(
    config: &ConnectorConfig,
) -> Result<ConnectedSession<BoxedIoMarker>, ConnectorError> {
    let mut current_host_override = config.xmpp_server.clone();
    let mut current_port_override = config.xmpp_port;

    for _ in 0..=MAX_SEE_OTHER_HOST_REDIRECTS {
        let mut attempt_config = config.clone();
        attempt_config.xmpp_server = current_host_override.clone();
        attempt_config.xmpp_port = current_port_override;

        match connect_once(&attempt_config).await {
            Ok(session) => return Ok(session),
            Err(ConnectorError::SeeOtherHost(target)) => {
                let (host, port) = parse_see_other_host(&target);
                log::debug!("Redirected to {target} by see-other-host, reconnecting");
                current_host_override = Some(host);
                current_port_override = port.or(current_port_override);
                continue;
            }
            Err(e) => return Err(e),
        }
    }
    Err(ConnectorError::Unknown)
}

/// Opaque marker type used only to name the return type of [`connect`];
/// the concrete transport type is erased via [`BoxedIo`] internally.
pub struct BoxedIoMarker(BoxedIo);

impl AsyncRead for BoxedIoMarker {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        self.0.as_mut().poll_read(cx, buf)
    }
}

impl AsyncWrite for BoxedIoMarker {
    fn poll_write(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        self.0.as_mut().poll_write(cx, buf)
    }

    fn poll_flush(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        self.0.as_mut().poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        self.0.as_mut().poll_shutdown(cx)
    }
}

async fn connect_once(config: &ConnectorConfig) -> Result<ConnectedSession<BoxedIoMarker>, ConnectorError> {
    let domain = config.jid.domain().to_string();
    let tcp = tcp_connect(config).await?;

    if config.old_ssl {
        let connector = tls::connector(
            config.tls_verification,
            &domain,
            Box::new(DefaultTlsVerifier {
                extra_identities: config.xmpp_server.clone().into_iter().collect(),
            }),
        );
        let tls_io = tls::handshake(&connector, &domain, tcp)
            .await
            .map_err(ConnectorError::TlsSessionFailed)?;
        let conn = FramedXmlConnection::new(tls_io);
        return finish_handshake(conn, config, &domain).await;
    }

    let conn = FramedXmlConnection::new(tcp);
    let (stream_id, features) = negotiate_open(&conn, &domain).await?;

    let peer_requires_tls = starttls_required_by_peer(&features);
    if config.tls_required || peer_requires_tls {
        if !offers_starttls(&features) {
            return Err(ConnectorError::TlsUnavailable);
        }
        let conn = starttls_upgrade(conn, &domain, config).await?;
        return finish_handshake(conn, config, &domain).await;
    }

    if offers_starttls(&features) {
        let conn = starttls_upgrade(conn, &domain, config).await?;
        return finish_handshake(conn, config, &domain).await;
    }

    finish_handshake_with_features(conn, config, &domain, stream_id, features, false).await
}

async fn finish_handshake<Io>(
    conn: FramedXmlConnection<Io>,
    config: &ConnectorConfig,
    domain: &str,
) -> Result<ConnectedSession<BoxedIoMarker>, ConnectorError>
where
    Io: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (stream_id, features) = negotiate_open(&conn, domain).await?;
    finish_handshake_with_features(conn, config, domain, stream_id, features, true).await
}

async fn finish_handshake_with_features<Io>(
    conn: FramedXmlConnection<Io>,
    config: &ConnectorConfig,
    domain: &str,
    stream_id: String,
    features: Element,
    channel_encrypted: bool,
) -> Result<ConnectedSession<BoxedIoMarker>, ConnectorError>
where
    Io: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    if config.legacy {
        let resource = config.resource.clone().unwrap_or_default();
        let new_id = || conn.new_id();
        crate::legacy_auth::legacy_auth(
            conn.reader(),
            conn.writer(),
            new_id,
            &config.jid,
            &config.password,
            &resource,
            &stream_id,
        )
        .await
        .map_err(ConnectorError::Auth)?;
        let full_jid = config
            .jid
            .with_resource(&resource)
            .map_err(|_| ConnectorError::BindInvalid)?;
        let boxed = box_io(conn.into_io());
        return Ok(ConnectedSession {
            connection: boxed,
            stream_id,
            jid: full_jid,
        });
    }

    let offered = offered_mechanisms(&features);
    do_sasl(&conn, config, &offered, channel_encrypted, &stream_id).await?;

    // Authentication resets the stream (§4.1 `reset`); re-negotiate to see
    // post-auth features (bind, session).
    let conn = conn
        .reset(|io| async move { Ok::<_, std::convert::Infallible>(io) })
        .await
        .unwrap();
    let (_stream_id2, post_auth_features) = negotiate_open(&conn, domain).await?;
    if post_auth_features.get_child("bind", NS_BIND).is_none() {
        return Err(ConnectorError::BindUnavailable);
    }

    let full_jid = bind_resource(&conn, config.resource.as_deref()).await?;

    if config.establish_session && post_auth_features.get_child("session", NS_SESSION).is_some() {
        establish_session(&conn).await?;
    }

    let boxed = box_io(conn.into_io());
    Ok(ConnectedSession {
        connection: boxed,
        stream_id,
        jid: full_jid,
    })
}

/// Top-level entry point for XEP-0077 account creation: connect, negotiate
/// TLS if offered, then register instead of authenticating.
pub async fn register_account(
    config: &ConnectorConfig,
    fields: &RegistrationFields,
) -> Result<(), ConnectorError> {
    let domain = config.jid.domain().to_string();
    let tcp = tcp_connect(config).await?;
    let conn = FramedXmlConnection::new(tcp);
    let (_stream_id, features) = negotiate_open(&conn, &domain).await?;
    if offers_starttls(&features) {
        let conn = starttls_upgrade(conn, &domain, config).await?;
        negotiate_open(&conn, &domain).await?;
        return register(&conn, fields).await;
    }
    if config.tls_required {
        return Err(ConnectorError::TlsUnavailable);
    }
    register(&conn, fields).await
}

/// Top-level entry point for XEP-0077 account deletion: connect,
/// authenticate as usual, then unregister.
pub async fn unregister_account(config: &ConnectorConfig) -> Result<(), ConnectorError> {
    let session = connect_once(config).await?;
    unregister(&session.connection).await
}

fn box_io<Io>(io: Io) -> FramedXmlConnection<BoxedIoMarker>
where
    Io: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    FramedXmlConnection::new(BoxedIoMarker(Box::pin(io)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_see_other_host_with_port() {
        assert_eq!(
            parse_see_other_host("other.example.com:5269"),
            ("other.example.com".to_string(), Some(5269))
        );
    }

    #[test]
    fn parses_see_other_host_without_port() {
        assert_eq!(
            parse_see_other_host("other.example.com"),
            ("other.example.com".to_string(), None)
        );
    }

    #[test]
    fn detects_starttls_offer() {
        let features = Element::new("features", NS_STREAMS)
            .with_child(Element::new("starttls", NS_STARTTLS));
        assert!(offers_starttls(&features));
    }

    #[test]
    fn reads_offered_mechanisms() {
        let features = Element::new("features", NS_STREAMS).with_child(
            Element::new("mechanisms", NS_SASL)
                .with_child(Element::new("mechanism", NS_SASL).with_text("PLAIN"))
                .with_child(Element::new("mechanism", NS_SASL).with_text("DIGEST-MD5")),
        );
        let mechs = offered_mechanisms(&features);
        assert_eq!(mechs, vec!["PLAIN".to_string(), "DIGEST-MD5".to_string()]);
    }
}
