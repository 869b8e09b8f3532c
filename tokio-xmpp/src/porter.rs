//! The stanza porter: priority-ordered handler dispatch,
//! pending-IQ correlation, a FIFO send queue over the one-in-flight
//! transport, and the close lifecycle.
//!
//! Grounded on `wocky-porter.c`/`.h`: handler priority constants
//! (`WOCKY_PORTER_HANDLER_PRIORITY_MIN/NORMAL/MAX`), the boolean
//! handled/declined callback contract, and the error enum
//! (`WOCKY_PORTER_ERROR_*`, here [`PorterError`]).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use jid::Jid;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::error::PorterError;
use crate::stanza::{Kind, Stanza, StreamError, NS_STANZAS, NS_STREAMS};
use crate::xml::Element;
use crate::xmlstream::{FramedXmlConnection, FramedXmlReader, FramedXmlWriter};

/// Dispatch priority for a registered handler. Ties within the same
/// priority are broken by registration order (earlier wins), exactly as
/// `wocky-porter.c`'s `HandlerPriority`/`NORMAL = G_MAXUINT / 2` scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HandlerPriority {
    Min,
    Normal,
    Max,
}

/// Which senders a handler is willing to receive stanzas from.
#[derive(Debug, Clone)]
pub enum HandlerScope {
    FromAnyone,
    From(Jid),
}

impl HandlerScope {
    fn matches(&self, from: Option<&Jid>) -> bool {
        match self {
            HandlerScope::FromAnyone => true,
            HandlerScope::From(expected) => match from {
                Some(actual) => jid_matches(expected, actual),
                None => false,
            },
        }
    }
}

/// Whether `actual` is an acceptable match for `expected`, allowing a bare
/// JID to match a full JID extending it and vice versa (§4.6 aliasing
/// rule, also used for pending-IQ correlation).
fn jid_matches(expected: &Jid, actual: &Jid) -> bool {
    expected == actual || expected.extended_by(actual) || actual.extended_by(expected)
}

/// Returned by a handler: `true` means "handled, stop dispatching";
/// `false` means "declined, try the next handler" (`wocky-porter.c`'s
/// gboolean return).
pub type HandlerResult = bool;

type HandlerFn = Box<dyn Fn(&Stanza) -> HandlerResult + Send + Sync>;

struct HandlerEntry {
    id: u64,
    priority: HandlerPriority,
    order: u64,
    scope: HandlerScope,
    pattern: Option<Element>,
    callback: HandlerFn,
}

/// Opaque handle returned by [`Porter::register_handler`], passed back to
/// [`Porter::unregister_handler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerId(u64);

/// Events a caller can subscribe to without going through the handler
/// table (§4.6's observable events).
#[derive(Debug, Clone)]
pub enum PorterEvent {
    /// Local close initiated.
    Closing,
    /// The peer closed its half of the stream.
    RemoteClosed,
    /// The peer sent a `<stream:error/>`.
    RemoteError { condition: String, text: Option<String> },
    /// A stanza is about to be written to the wire, or `None` for a
    /// whitespace keepalive ping (`sending`, §4.6).
    Sending(Option<Box<Stanza>>),
}

/// One entry in the porter's FIFO send queue: either a stanza to frame and
/// write, or a bare whitespace ping.
enum SendItem {
    Stanza(Element),
    WhitespacePing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    NotStarted,
    Open,
    Closing,
    AwaitingPeerClose,
    Closed,
}

struct PendingIq {
    expected_remote: Option<Jid>,
    sender: oneshot::Sender<Stanza>,
}

struct Inner {
    handlers: StdMutex<Vec<HandlerEntry>>,
    next_handler_id: AtomicU64,
    next_registration_order: AtomicU64,
    pending_iqs: StdMutex<HashMap<String, PendingIq>>,
    state: StdMutex<State>,
    events: broadcast::Sender<PorterEvent>,
    send_tx: StdMutex<Option<mpsc::UnboundedSender<SendItem>>>,
    full_jid: Jid,
}

/// Drop every outstanding `send_iq` sender, waking each blocked caller with
/// an error (the oneshot `Receiver`'s `.await` resolves to `Err`).
fn fail_pending_iqs(inner: &Inner) {
    inner.pending_iqs.lock().unwrap().clear();
}

/// A cheaply-cloneable handle to a started (or not-yet-started) porter.
#[derive(Clone)]
pub struct Porter {
    inner: Arc<Inner>,
}

impl Porter {
    /// Create a porter in the `NotStarted` state. Handlers may be
    /// registered before [`start`](Self::start) is called; sends and IQs
    /// require the porter to be started.
    pub fn new(full_jid: Jid) -> Self {
        let (events, _rx) = broadcast::channel(64);
        Porter {
            inner: Arc::new(Inner {
                handlers: StdMutex::new(Vec::new()),
                next_handler_id: AtomicU64::new(1),
                next_registration_order: AtomicU64::new(1),
                pending_iqs: StdMutex::new(HashMap::new()),
                state: StdMutex::new(State::NotStarted),
                events,
                send_tx: StdMutex::new(None),
                full_jid,
            }),
        }
    }

    pub fn full_jid(&self) -> &Jid {
        &self.inner.full_jid
    }

    pub fn bare_jid(&self) -> Jid {
        self.inner.full_jid.to_bare()
    }

    /// Subscribe to observable events.
    pub fn events(&self) -> broadcast::Receiver<PorterEvent> {
        self.inner.events.subscribe()
    }

    /// Register a handler. `pattern`, if given, must be a superset-matched
    /// (`Element::matches_pattern`) subtree of the incoming stanza.
    pub fn register_handler(
        &self,
        priority: HandlerPriority,
        scope: HandlerScope,
        pattern: Option<Element>,
        callback: impl Fn(&Stanza) -> HandlerResult + Send + Sync + 'static,
    ) -> HandlerId {
        let id = self.inner.next_handler_id.fetch_add(1, Ordering::Relaxed);
        let order = self
            .inner
            .next_registration_order
            .fetch_add(1, Ordering::Relaxed);
        let entry = HandlerEntry {
            id,
            priority,
            order,
            scope,
            pattern,
            callback: Box::new(callback),
        };
        let mut handlers = self.inner.handlers.lock().unwrap();
        handlers.push(entry);
        handlers.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.order.cmp(&b.order)));
        HandlerId(id)
    }

    pub fn unregister_handler(&self, id: HandlerId) {
        self.inner.handlers.lock().unwrap().retain(|h| h.id != id.0);
    }

    fn state(&self) -> State {
        *self.inner.state.lock().unwrap()
    }

    /// Start driving a connection: spawns a read loop (dispatch) and a
    /// write loop (drain the send queue), and flips the porter to `Open`.
    pub fn start<Io>(&self, connection: FramedXmlConnection<Io>)
    where
        Io: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        {
            let mut state = self.inner.state.lock().unwrap();
            if *state != State::NotStarted {
                return;
            }
            *state = State::Open;
        }
        let (reader, writer) = connection.split();
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.send_tx.lock().unwrap() = Some(tx);

        tokio::spawn(write_loop(writer.clone(), rx, self.inner.clone()));
        tokio::spawn(read_loop(reader, writer, self.clone()));
    }

    /// Queue a stanza for sending (§4.6's FIFO send queue).
    pub fn send(&self, stanza: Element) -> Result<(), PorterError> {
        self.enqueue(SendItem::Stanza(stanza))
    }

    /// Queue a whitespace keepalive ping (§4.6), going through the same
    /// FIFO send queue as stanzas so it can't jump ahead of or behind one.
    pub fn send_whitespace_ping(&self) -> Result<(), PorterError> {
        self.enqueue(SendItem::WhitespacePing)
    }

    fn enqueue(&self, item: SendItem) -> Result<(), PorterError> {
        match self.state() {
            State::NotStarted => return Err(PorterError::NotStarted),
            State::Closing | State::AwaitingPeerClose => return Err(PorterError::Closing),
            State::Closed => return Err(PorterError::Closed),
            State::Open => (),
        }
        let guard = self.inner.send_tx.lock().unwrap();
        let tx = guard.as_ref().ok_or(PorterError::NotStarted)?;
        tx.send(item).map_err(|_| PorterError::Closed)
    }

    /// Mint a locally-unique id for a new outgoing IQ or other stanza.
    pub fn new_id(&self) -> String {
        let n = self.inner.next_registration_order.fetch_add(1, Ordering::Relaxed);
        format!("porter-{n}")
    }

    /// Send an IQ (assigning an id if it has none) and wait for the
    /// correlated `result`/`error` reply.
    pub async fn send_iq(&self, mut iq: Element) -> Result<Stanza, PorterError> {
        if iq.name != "iq" {
            return Err(PorterError::NotIq);
        }
        let id = match iq.attr("id") {
            Some(id) => id.to_string(),
            None => {
                let id = self.new_id();
                iq.set_attr("id", id.clone());
                id
            }
        };
        let expected_remote = iq.attr("to").and_then(|s| s.parse::<Jid>().ok());
        let (tx, rx) = oneshot::channel();
        self.inner
            .pending_iqs
            .lock()
            .unwrap()
            .insert(id.clone(), PendingIq { expected_remote, sender: tx });
        if let Err(e) = self.send(iq) {
            self.inner.pending_iqs.lock().unwrap().remove(&id);
            return Err(e);
        }
        rx.await.map_err(|_| PorterError::ForciblyClosed)
    }

    /// Reply `result` to an incoming IQ.
    pub fn acknowledge_iq(&self, incoming: &Stanza, payload: Vec<Element>) -> Result<(), PorterError> {
        let mut reply = Element::new("iq", incoming.root.ns.clone()).with_attr("type", "result");
        if let Some(id) = &incoming.id {
            reply.set_attr("id", id.clone());
        }
        if let Some(from) = &incoming.from {
            reply.set_attr("to", from.to_string());
        }
        for child in payload {
            reply.children.push(child);
        }
        self.send(reply)
    }

    /// Reply `error` to an incoming IQ.
    pub fn send_iq_error(
        &self,
        incoming: &Stanza,
        condition: &str,
        error_type: &str,
        text: Option<&str>,
    ) -> Result<(), PorterError> {
        let mut error_el = Element::new("error", incoming.root.ns.clone())
            .with_attr("type", error_type)
            .with_child(Element::new(condition, NS_STANZAS));
        if let Some(text) = text {
            error_el
                .children
                .push(Element::new("text", NS_STANZAS).with_text(text));
        }
        let mut reply = Element::new("iq", incoming.root.ns.clone())
            .with_attr("type", "error")
            .with_child(error_el);
        if let Some(id) = &incoming.id {
            reply.set_attr("id", id.clone());
        }
        if let Some(from) = &incoming.from {
            reply.set_attr("to", from.to_string());
        }
        self.send(reply)
    }

    /// Begin an orderly close: send the closing tag and wait for the
    /// peer's own close (observed by the read loop).
    pub async fn close(&self) -> Result<(), PorterError> {
        {
            let mut state = self.inner.state.lock().unwrap();
            match *state {
                State::NotStarted => return Err(PorterError::NotStarted),
                State::Closing | State::AwaitingPeerClose => return Err(PorterError::Closing),
                State::Closed => return Err(PorterError::Closed),
                State::Open => *state = State::Closing,
            }
        }
        log::debug!("Closing porter for {}", self.inner.full_jid);
        let _ = self.inner.events.send(PorterEvent::Closing);
        // Dropping the only sender makes the write loop's `rx.recv()`
        // return `None` once the queue drains, at which point it issues
        // `send_close` itself.
        *self.inner.send_tx.lock().unwrap() = None;
        {
            let mut state = self.inner.state.lock().unwrap();
            if *state == State::Closing {
                *state = State::AwaitingPeerClose;
            }
        }
        Ok(())
    }

    /// Force-close from any state, abandoning any pending IQs.
    pub fn force_close(&self) {
        *self.inner.state.lock().unwrap() = State::Closed;
        *self.inner.send_tx.lock().unwrap() = None;
        fail_pending_iqs(&self.inner);
    }
}

async fn write_loop<W: AsyncWrite + Unpin>(
    writer: FramedXmlWriter<W>,
    mut rx: mpsc::UnboundedReceiver<SendItem>,
    inner: Arc<Inner>,
) {
    while let Some(item) = rx.recv().await {
        match item {
            SendItem::Stanza(el) => {
                if let Ok(stanza) = Stanza::from_element(el.clone()) {
                    let _ = inner
                        .events
                        .send(PorterEvent::Sending(Some(Box::new(stanza))));
                }
                if writer.send_stanza(&el).await.is_err() {
                    break;
                }
            }
            SendItem::WhitespacePing => {
                let _ = inner.events.send(PorterEvent::Sending(None));
                if writer.send_whitespace_ping().await.is_err() {
                    break;
                }
            }
        }
    }
    let _ = writer.send_close().await;
}

async fn read_loop<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    reader: FramedXmlReader<R>,
    writer: FramedXmlWriter<W>,
    porter: Porter,
) {
    loop {
        match reader.recv_stanza().await {
            Ok(Some(stanza)) => {
                if handle_stream_error(&porter, &stanza) {
                    continue;
                }
                if correlate_iq_reply(&porter, &stanza) {
                    continue;
                }
                dispatch_to_handlers(&porter, &stanza);
            }
            Ok(None) => {
                log::debug!("Peer closed the stream");
                let _ = porter.inner.events.send(PorterEvent::RemoteClosed);
                let was_closing = {
                    let mut state = porter.inner.state.lock().unwrap();
                    let was = *state == State::AwaitingPeerClose || *state == State::Closing;
                    *state = State::Closed;
                    was
                };
                fail_pending_iqs(&porter.inner);
                if !was_closing {
                    let _ = writer.send_close().await;
                }
                break;
            }
            Err(e) => {
                log::warn!("Read loop failing: {e}");
                *porter.inner.state.lock().unwrap() = State::Closed;
                fail_pending_iqs(&porter.inner);
                break;
            }
        }
    }
}

fn handle_stream_error(porter: &Porter, stanza: &Stanza) -> bool {
    if stanza.root.name != "error" || stanza.root.ns != NS_STREAMS {
        return false;
    }
    let err = StreamError::from_element(&stanza.root);
    let condition_name = format!("{:?}", err.condition);
    let text = err.text.clone().or(Some(err.description()));
    log::warn!("Received stream error: {condition_name}");
    *porter.inner.state.lock().unwrap() = State::Closed;
    fail_pending_iqs(&porter.inner);
    let _ = porter.inner.events.send(PorterEvent::RemoteError {
        condition: condition_name,
        text,
    });
    true
}

fn correlate_iq_reply(porter: &Porter, stanza: &Stanza) -> bool {
    if !matches!(stanza.kind, Kind::Iq) {
        return false;
    }
    if !matches!(
        stanza.sub_kind,
        crate::stanza::SubKind::Result | crate::stanza::SubKind::IqError
    ) {
        return false;
    }
    let Some(id) = &stanza.id else { return false };
    let pending = {
        let mut table = porter.inner.pending_iqs.lock().unwrap();
        table.remove(id)
    };
    let Some(pending) = pending else { return false };
    let remote_ok = match &pending.expected_remote {
        None => true,
        Some(expected) => match &stanza.from {
            Some(actual) => jid_matches(expected, actual),
            None => true,
        },
    };
    if !remote_ok {
        // Put it back; this reply wasn't from who we sent the request to.
        porter.inner.pending_iqs.lock().unwrap().insert(id.clone(), pending);
        return false;
    }
    let _ = pending.sender.send(stanza.clone());
    true
}

fn dispatch_to_handlers(porter: &Porter, stanza: &Stanza) {
    let handlers = porter.inner.handlers.lock().unwrap();
    for entry in handlers.iter() {
        if !entry.scope.matches(stanza.from.as_ref()) {
            continue;
        }
        if let Some(pattern) = &entry.pattern {
            if !stanza.root.matches_pattern(pattern) {
                continue;
            }
        }
        if (entry.callback)(stanza) {
            return;
        }
    }
    if matches!(stanza.kind, Kind::Iq)
        && matches!(
            stanza.sub_kind,
            crate::stanza::SubKind::Get | crate::stanza::SubKind::Set
        )
    {
        log::trace!("No handler claimed IQ {:?}, replying service-unavailable", stanza.id);
        let _ = porter.send_iq_error(stanza, "service-unavailable", "cancel", None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn iq_stanza(id: &str, from: &str) -> Stanza {
        let root = Element::new("iq", "jabber:client")
            .with_attr("type", "result")
            .with_attr("id", id)
            .with_attr("from", from);
        Stanza::from_element(root).unwrap()
    }

    #[test]
    fn handler_priority_orders_max_first() {
        assert!(HandlerPriority::Max > HandlerPriority::Normal);
        assert!(HandlerPriority::Normal > HandlerPriority::Min);
    }

    #[test]
    fn bare_jid_matches_full() {
        let bare: Jid = "juliet@example.com".parse().unwrap();
        let full: Jid = "juliet@example.com/balcony".parse().unwrap();
        assert!(jid_matches(&bare, &full));
        assert!(jid_matches(&full, &bare));
    }

    #[tokio::test]
    async fn full_round_trip_dispatch_and_close() {
        let (client_io, server_io) = duplex(8192);
        let client_conn = FramedXmlConnection::new(client_io);
        let server_conn = FramedXmlConnection::new(server_io);
        let attrs = [("xmlns", "jabber:client")];
        let _ = tokio::join!(client_conn.send_open(&attrs), server_conn.recv_open());
        let _ = tokio::join!(server_conn.send_open(&attrs), client_conn.recv_open());

        let full_jid: Jid = "juliet@example.com/balcony".parse().unwrap();
        let porter = Porter::new(full_jid);
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen2 = seen.clone();
        porter.register_handler(
            HandlerPriority::Normal,
            HandlerScope::FromAnyone,
            None,
            move |stanza| {
                seen2.lock().unwrap().push(stanza.root.name.clone());
                true
            },
        );
        porter.start(client_conn);

        let message = Element::new("message", "jabber:client").with_attr("from", "a@b");
        server_conn.send_stanza(&message).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(seen.lock().unwrap().as_slice(), ["message"]);

        server_conn.send_close().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}
