//! The legacy `jabber:iq:auth` driver (XEP-0078).
//!
//! Grounded on `wocky-jabber-auth.c`/`.h`: a two-round IQ exchange — first
//! discover which fields the server wants (plaintext `password` vs.
//! `digest`), then submit them — used as a fallback when SASL is
//! unavailable or the connector is configured for `legacy` auth.

use jid::Jid;

use crate::auth::mechanisms::jabber_auth_digest;
use crate::error::AuthError;
use crate::stanza::{Stanza, StanzaErrorCondition};
use crate::xml::Element;
use crate::xmlstream::{FramedXmlReader, FramedXmlWriter};

const NS_JABBER_AUTH: &str = "jabber:iq:auth";
const NS_JABBER_CLIENT: &str = "jabber:client";

async fn send_and_await<R, W>(
    reader: &FramedXmlReader<R>,
    writer: &FramedXmlWriter<W>,
    iq: Element,
    expected_id: &str,
) -> Result<Stanza, AuthError>
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    writer
        .send_stanza(&iq)
        .await
        .map_err(|_| AuthError::Connreset)?;
    loop {
        let stanza = reader
            .recv_stanza()
            .await
            .map_err(|_| AuthError::Connreset)?
            .ok_or(AuthError::Connreset)?;
        if stanza.is_iq() && stanza.id.as_deref() == Some(expected_id) {
            return Ok(stanza);
        }
        // Anything else arriving mid-handshake is out of scope for this
        // driver; the connector hasn't handed control to the porter yet.
    }
}

fn map_iq_error(stanza: &Stanza) -> AuthError {
    match stanza.stanza_error() {
        Some(err) => match err.condition {
            StanzaErrorCondition::NotAuthorized | StanzaErrorCondition::Forbidden => {
                AuthError::NotAuthorized
            }
            StanzaErrorCondition::Conflict => AuthError::ResourceConflict,
            StanzaErrorCondition::NotAcceptable | StanzaErrorCondition::BadRequest => {
                AuthError::InvalidReply
            }
            _ => AuthError::Failure,
        },
        None => AuthError::Failure,
    }
}

/// Run the full legacy auth exchange: discover fields, then authenticate.
pub async fn legacy_auth<R, W>(
    reader: &FramedXmlReader<R>,
    writer: &FramedXmlWriter<W>,
    new_id: impl Fn() -> String,
    jid: &Jid,
    password: &str,
    resource: &str,
    stream_id: &str,
) -> Result<(), AuthError>
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    let username = jid.node().ok_or(AuthError::NoCredentials)?;

    let discover_id = new_id();
    let discover = Element::new("iq", NS_JABBER_CLIENT)
        .with_attr("type", "get")
        .with_attr("id", discover_id.clone())
        .with_child(
            Element::new("query", NS_JABBER_AUTH)
                .with_child(Element::new("username", NS_JABBER_AUTH).with_text(username)),
        );
    let discover_result = send_and_await(reader, writer, discover, &discover_id).await?;
    if discover_result.sub_kind.is_error() {
        return Err(map_iq_error(&discover_result));
    }
    let query = discover_result
        .root
        .get_child("query", NS_JABBER_AUTH)
        .ok_or(AuthError::InvalidReply)?;
    let wants_digest = query.get_child("digest", NS_JABBER_AUTH).is_some();
    log::debug!(
        "Legacy auth for {username}: server wants {}",
        if wants_digest { "digest" } else { "plaintext password" }
    );

    let mut query_el = Element::new("query", NS_JABBER_AUTH)
        .with_child(Element::new("username", NS_JABBER_AUTH).with_text(username))
        .with_child(Element::new("resource", NS_JABBER_AUTH).with_text(resource));
    if wants_digest {
        let digest = jabber_auth_digest(stream_id, password);
        query_el = query_el.with_child(Element::new("digest", NS_JABBER_AUTH).with_text(digest));
    } else {
        query_el =
            query_el.with_child(Element::new("password", NS_JABBER_AUTH).with_text(password));
    }

    let submit_id = new_id();
    let submit = Element::new("iq", NS_JABBER_CLIENT)
        .with_attr("type", "set")
        .with_attr("id", submit_id.clone())
        .with_child(query_el);
    let submit_result = send_and_await(reader, writer, submit, &submit_id).await?;
    if submit_result.sub_kind.is_error() {
        let err = map_iq_error(&submit_result);
        log::warn!("Legacy auth rejected: {err}");
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xmlstream::FramedXmlConnection;
    use tokio::io::duplex;

    async fn open_pair() -> (FramedXmlConnection<tokio::io::DuplexStream>, FramedXmlConnection<tokio::io::DuplexStream>) {
        let (a, b) = duplex(8192);
        let client = FramedXmlConnection::new(a);
        let server = FramedXmlConnection::new(b);
        let attrs = [("xmlns", "jabber:client")];
        let _ = tokio::join!(client.send_open(&attrs), server.recv_open());
        let _ = tokio::join!(server.send_open(&attrs), client.recv_open());
        (client, server)
    }

    #[tokio::test]
    async fn successful_plaintext_round_trip() {
        let (client, server) = open_pair().await;
        let jid: Jid = "juliet@example.com".parse().unwrap();

        let server_task = tokio::spawn(async move {
            let discover = server.recv_stanza().await.unwrap().unwrap();
            let result = Element::new("iq", NS_JABBER_CLIENT)
                .with_attr("type", "result")
                .with_attr("id", discover.id.clone().unwrap())
                .with_child(
                    Element::new("query", NS_JABBER_AUTH)
                        .with_child(Element::new("password", NS_JABBER_AUTH))
                        .with_child(Element::new("resource", NS_JABBER_AUTH)),
                );
            server.send_stanza(&result).await.unwrap();

            let submit = server.recv_stanza().await.unwrap().unwrap();
            let query = submit.root.get_child("query", NS_JABBER_AUTH).unwrap();
            let pw = query.get_child("password", NS_JABBER_AUTH).unwrap();
            assert_eq!(pw.text.as_deref(), Some("r0m30"));
            let ok = Element::new("iq", NS_JABBER_CLIENT)
                .with_attr("type", "result")
                .with_attr("id", submit.id.clone().unwrap());
            server.send_stanza(&ok).await.unwrap();
        });

        let counter = std::cell::Cell::new(0u32);
        let new_id = move || {
            counter.set(counter.get() + 1);
            format!("legacy{}", counter.get())
        };
        let (reader, writer) = client.split();
        legacy_auth(&reader, &writer, new_id, &jid, "r0m30", "balcony", "s1d")
            .await
            .unwrap();
        server_task.await.unwrap();
    }
}
