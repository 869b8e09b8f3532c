//! Integration tests exercising the porter end to end over a paired
//! in-memory duplex stream, covering IQ correlation, priority dispatch,
//! and forced close.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use jid::Jid;
use tokio::io::duplex;
use tokio_xmpp::error::PorterError;
use tokio_xmpp::porter::{HandlerPriority, HandlerScope, Porter};
use tokio_xmpp::stanza::NS_STREAMS;
use tokio_xmpp::xml::Element;
use tokio_xmpp::xmlstream::FramedXmlConnection;

async fn open_pair() -> (FramedXmlConnection<tokio::io::DuplexStream>, FramedXmlConnection<tokio::io::DuplexStream>) {
    let (client_io, server_io) = duplex(8192);
    let client_conn = FramedXmlConnection::new(client_io);
    let server_conn = FramedXmlConnection::new(server_io);
    let attrs = [("xmlns", "jabber:client")];
    let _ = tokio::join!(client_conn.send_open(&attrs), server_conn.recv_open());
    let _ = tokio::join!(server_conn.send_open(&attrs), client_conn.recv_open());
    (client_conn, server_conn)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

/// Scenario C — IQ correlation: a reply matching a pending `send_iq`
/// completes that call and is never offered to the handler table.
#[tokio::test]
async fn scenario_c_iq_correlation_bypasses_handlers() {
    let (client_conn, server_conn) = open_pair().await;
    let full_jid: Jid = "juliet@example.com/balcony".parse().unwrap();
    let porter = Porter::new(full_jid);

    let handler_hits = Arc::new(Mutex::new(0usize));
    let handler_hits2 = handler_hits.clone();
    porter.register_handler(HandlerPriority::Normal, HandlerScope::FromAnyone, None, move |_| {
        *handler_hits2.lock().unwrap() += 1;
        true
    });
    porter.start(client_conn);

    let server_task = tokio::spawn(async move {
        let request = server_conn.recv_stanza().await.unwrap().unwrap();
        let id = request.id.clone().unwrap();
        let reply = Element::new("iq", "jabber:client")
            .with_attr("type", "result")
            .with_attr("id", id)
            .with_attr("from", "room@conference.example.com/occupant")
            .with_child(Element::new("query", "urn:example:dummy"));
        server_conn.send_stanza(&reply).await.unwrap();
        server_conn
    });

    let iq = Element::new("iq", "jabber:client")
        .with_attr("type", "get")
        .with_attr("id", "x1")
        .with_attr("to", "room@conference.example.com")
        .with_child(Element::new("query", "urn:example:dummy"));
    let reply = porter.send_iq(iq).await.unwrap();
    assert_eq!(reply.id.as_deref(), Some("x1"));
    assert_eq!(*handler_hits.lock().unwrap(), 0, "IQ reply must not reach the handler table");

    server_task.await.unwrap();
}

/// Scenario E — priority dispatch: a higher-priority, more specific
/// handler runs first; a decline falls through to the next handler in
/// registration order.
#[tokio::test]
async fn scenario_e_priority_dispatch_falls_through_on_decline() {
    let (client_conn, server_conn) = open_pair().await;
    let full_jid: Jid = "juliet@example.com/balcony".parse().unwrap();
    let porter = Porter::new(full_jid);

    let claims = Arc::new(Mutex::new(Vec::new()));

    let claims_hi = claims.clone();
    let pattern_hi = Element::new("message", "jabber:client")
        .with_child(Element::new("body", "jabber:client").with_text("please sign out"));
    porter.register_handler(HandlerPriority::Normal, HandlerScope::FromAnyone, Some(pattern_hi), move |_| {
        claims_hi.lock().unwrap().push("hi");
        false
    });

    let claims_lo = claims.clone();
    let pattern_lo = Element::new("message", "jabber:client").with_child(Element::new("body", "jabber:client"));
    porter.register_handler(HandlerPriority::Normal, HandlerScope::FromAnyone, Some(pattern_lo), move |_| {
        claims_lo.lock().unwrap().push("lo");
        true
    });

    porter.start(client_conn);

    let sign_out = Element::new("message", "jabber:client")
        .with_attr("type", "chat")
        .with_child(Element::new("body", "jabber:client").with_text("please sign out"));
    server_conn.send_stanza(&sign_out).await.unwrap();
    settle().await;
    assert_eq!(claims.lock().unwrap().as_slice(), ["hi", "lo"]);

    claims.lock().unwrap().clear();
    let hello = Element::new("message", "jabber:client")
        .with_attr("type", "chat")
        .with_child(Element::new("body", "jabber:client").with_text("hello"));
    server_conn.send_stanza(&hello).await.unwrap();
    settle().await;
    assert_eq!(claims.lock().unwrap().as_slice(), ["lo"]);
}

/// Scenario F — force close: a pending `send_iq` completes with
/// `ForciblyClosed` once the transport is force-closed without a reply.
#[tokio::test]
async fn scenario_f_force_close_fails_pending_iq() {
    let (client_conn, server_conn) = open_pair().await;
    let full_jid: Jid = "juliet@example.com/balcony".parse().unwrap();
    let porter = Porter::new(full_jid);
    porter.start(client_conn);

    let porter2 = porter.clone();
    let iq = Element::new("iq", "jabber:client")
        .with_attr("type", "get")
        .with_attr("id", "x2")
        .with_attr("to", "example.com");
    let pending = tokio::spawn(async move { porter2.send_iq(iq).await });

    // Server never replies; drop its side to simulate a stalled peer.
    drop(server_conn);
    settle().await;
    porter.force_close();

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(PorterError::ForciblyClosed)));
}

/// A fatal `<stream:error/>` transitions the porter to closed and fails any
/// IQ that was still waiting on a reply.
#[tokio::test]
async fn stream_error_closes_and_fails_pending_iq() {
    let (client_conn, server_conn) = open_pair().await;
    let full_jid: Jid = "juliet@example.com/balcony".parse().unwrap();
    let porter = Porter::new(full_jid);
    porter.start(client_conn);

    let porter2 = porter.clone();
    let iq = Element::new("iq", "jabber:client")
        .with_attr("type", "get")
        .with_attr("id", "x3")
        .with_attr("to", "example.com");
    let pending = tokio::spawn(async move { porter2.send_iq(iq).await });

    let stream_error = Element::new("error", NS_STREAMS)
        .with_child(Element::new("system-shutdown", "urn:ietf:params:xml:ns:xmpp-streams"));
    server_conn.send_stanza(&stream_error).await.unwrap();
    settle().await;

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(PorterError::ForciblyClosed)));
    assert!(matches!(porter.send(Element::new("message", "jabber:client")), Err(PorterError::Closed)));
}

/// An IQ `get`/`set` that no handler claims is answered with
/// `service-unavailable`, not `feature-not-implemented`.
#[tokio::test]
async fn unclaimed_iq_gets_service_unavailable() {
    let (client_conn, server_conn) = open_pair().await;
    let full_jid: Jid = "juliet@example.com/balcony".parse().unwrap();
    let porter = Porter::new(full_jid);
    porter.start(client_conn);

    let request = Element::new("iq", "jabber:client")
        .with_attr("type", "get")
        .with_attr("id", "x4")
        .with_child(Element::new("query", "urn:example:unhandled"));
    server_conn.send_stanza(&request).await.unwrap();

    let reply = server_conn.recv_stanza().await.unwrap().unwrap();
    assert_eq!(reply.root.attr("type"), Some("error"));
    let error_el = reply.root.get_child("error", "jabber:client").unwrap();
    assert!(error_el
        .get_child("service-unavailable", "urn:ietf:params:xml:ns:xmpp-stanzas")
        .is_some());
}

/// A clean peer close also fails any IQ still waiting on a reply, instead
/// of leaving the caller's `send_iq` hanging forever.
#[tokio::test]
async fn clean_remote_close_fails_pending_iq() {
    let (client_conn, server_conn) = open_pair().await;
    let full_jid: Jid = "juliet@example.com/balcony".parse().unwrap();
    let porter = Porter::new(full_jid);
    porter.start(client_conn);

    let porter2 = porter.clone();
    let iq = Element::new("iq", "jabber:client")
        .with_attr("type", "get")
        .with_attr("id", "x5")
        .with_attr("to", "example.com");
    let pending = tokio::spawn(async move { porter2.send_iq(iq).await });

    settle().await;
    server_conn.send_close().await.unwrap();

    let result = pending.await.unwrap();
    assert!(result.is_err());
}
