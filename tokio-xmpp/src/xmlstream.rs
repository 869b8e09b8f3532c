//! The framed XML connection: the lowest layer, wrapping a byte stream
//! with stream-open/stanza/stream-close framing and a
//! one-send/one-recv-in-flight contract.
//!
//! Grounded on `wocky-xmpp-connection.c`'s method surface (`send_open`,
//! `recv_open`, `send_stanza`, `recv_stanza`, `send_close`, `force_close`,
//! `send_whitespace_ping`, `reset`, `new_id`): explicit named async
//! operations rather than a `Stream`/`Sink` pair, since `recv_stanza` and
//! `send_stanza` need independent, concurrently-driven halves for a
//! porter to own a read loop and a write queue at once. This module does
//! its own split into [`FramedXmlReader`]/[`FramedXmlWriter`] to get that.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use rand::Rng;
use tokio::io::{split, AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;

use crate::error::FramedConnectionError;
use crate::stanza::Stanza;
use crate::xml::{write_element, write_start_tag, BodyEvent, Element, XmlParseError, XmlReader};

fn map_parse_err(e: XmlParseError) -> FramedConnectionError {
    if e.0.starts_with("eof") {
        FramedConnectionError::Eos
    } else {
        FramedConnectionError::Parse(e.0)
    }
}

struct ReaderState<R> {
    reader: XmlReader<R>,
    opened: bool,
    closed: bool,
}

struct WriterState<W> {
    io: W,
    opened: bool,
    closed: bool,
}

/// Shared id generator: a per-connection random prefix plus a monotonic
/// counter, so ids stay unique across a `reset()` (§4.1) without needing
/// any coordination with the peer.
struct IdGen {
    prefix: String,
    counter: AtomicU64,
}

impl IdGen {
    fn new() -> Self {
        let prefix: u32 = rand::thread_rng().gen();
        IdGen {
            prefix: format!("{prefix:08x}"),
            counter: AtomicU64::new(0),
        }
    }

    fn next(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", self.prefix, n)
    }
}

/// One half of a framed XML connection, for reading.
pub struct FramedXmlReader<R> {
    state: Arc<Mutex<ReaderState<R>>>,
    forcibly_closed: Arc<AtomicBool>,
    ids: Arc<IdGen>,
}

/// One half of a framed XML connection, for writing.
pub struct FramedXmlWriter<W> {
    state: Arc<Mutex<WriterState<W>>>,
    forcibly_closed: Arc<AtomicBool>,
    ids: Arc<IdGen>,
}

/// An unsplit framed XML connection. Use [`FramedXmlConnection::split`] to
/// get independent read/write halves for concurrent use (the porter's read
/// loop vs. its send queue); the unsplit form is convenient for the
/// strictly sequential handshake the connector drives.
pub struct FramedXmlConnection<Io> {
    reader: FramedXmlReader<ReadHalf<Io>>,
    writer: FramedXmlWriter<WriteHalf<Io>>,
}

impl<Io: AsyncRead + AsyncWrite + Unpin> FramedXmlConnection<Io> {
    /// Wrap a connected byte stream. Neither direction has sent/received an
    /// opening tag yet.
    pub fn new(io: Io) -> Self {
        let (read_half, write_half) = split(io);
        let forcibly_closed = Arc::new(AtomicBool::new(false));
        let ids = Arc::new(IdGen::new());
        let reader = FramedXmlReader {
            state: Arc::new(Mutex::new(ReaderState {
                reader: XmlReader::new(read_half),
                opened: false,
                closed: false,
            })),
            forcibly_closed: forcibly_closed.clone(),
            ids: ids.clone(),
        };
        let writer = FramedXmlWriter {
            state: Arc::new(Mutex::new(WriterState {
                io: write_half,
                opened: false,
                closed: false,
            })),
            forcibly_closed,
            ids,
        };
        FramedXmlConnection { reader, writer }
    }

    /// Split into independent read/write halves sharing the forcible-close
    /// flag and id generator.
    pub fn split(self) -> (FramedXmlReader<ReadHalf<Io>>, FramedXmlWriter<WriteHalf<Io>>) {
        (self.reader, self.writer)
    }

    /// Borrow the read half without consuming the connection.
    pub fn reader(&self) -> &FramedXmlReader<ReadHalf<Io>> {
        &self.reader
    }

    /// Borrow the write half without consuming the connection.
    pub fn writer(&self) -> &FramedXmlWriter<WriteHalf<Io>> {
        &self.writer
    }

    pub async fn send_open(&self, attrs: &[(&str, &str)]) -> Result<(), FramedConnectionError> {
        self.writer.send_open(attrs).await
    }

    pub async fn recv_open(&self) -> Result<Element, FramedConnectionError> {
        self.reader.recv_open().await
    }

    pub async fn send_stanza(&self, el: &Element) -> Result<(), FramedConnectionError> {
        self.writer.send_stanza(el).await
    }

    pub async fn recv_stanza(&self) -> Result<Option<Stanza>, FramedConnectionError> {
        self.reader.recv_stanza().await
    }

    pub async fn send_close(&self) -> Result<(), FramedConnectionError> {
        self.writer.send_close().await
    }

    pub async fn send_whitespace_ping(&self) -> Result<(), FramedConnectionError> {
        self.writer.send_whitespace_ping().await
    }

    pub async fn force_close(&self) {
        self.writer.force_close().await;
        self.reader.force_close().await;
    }

    /// Mint a locally-unique id, e.g. for an outgoing IQ (§4.6). Distinct
    /// from the server-assigned stream id surfaced by `recv_open` (§9's
    /// two-identifier open question).
    pub fn new_id(&self) -> String {
        self.writer.ids.next()
    }

    /// Tear down the framing and hand back the raw byte stream, e.g. to
    /// wrap it in TLS after a successful STARTTLS negotiation and start a
    /// fresh [`FramedXmlConnection`] over it (`reset`, §4.1). Panics if
    /// this connection has already been [`split`](Self::split) (the
    /// halves are no longer uniquely owned).
    pub fn into_io(self) -> Io {
        let read_half = Arc::try_unwrap(self.reader.state)
            .unwrap_or_else(|_| panic!("into_io called on a split connection"))
            .into_inner()
            .reader
            .into_inner();
        let write_half = Arc::try_unwrap(self.writer.state)
            .unwrap_or_else(|_| panic!("into_io called on a split connection"))
            .into_inner()
            .io;
        tokio::io::unsplit(read_half, write_half)
    }

    /// Re-frame this connection over a new byte stream produced from the
    /// old one, e.g. wrapping the socket in TLS after a successful
    /// STARTTLS negotiation (`reset`, §4.1). Unlike building a fresh
    /// [`FramedXmlConnection::new`] from [`into_io`](Self::into_io)'s
    /// output, the id generator carries over so ids stay unique across
    /// the reset instead of restarting from a new random prefix. Panics
    /// under the same conditions as `into_io`.
    pub async fn reset<Io2, F, Fut, E>(self, transform: F) -> Result<FramedXmlConnection<Io2>, E>
    where
        Io2: AsyncRead + AsyncWrite + Unpin,
        F: FnOnce(Io) -> Fut,
        Fut: std::future::Future<Output = Result<Io2, E>>,
    {
        let ids = self.reader.ids.clone();
        let raw_io = self.into_io();
        let new_io = transform(raw_io).await?;
        let (read_half, write_half) = split(new_io);
        let forcibly_closed = Arc::new(AtomicBool::new(false));
        let reader = FramedXmlReader {
            state: Arc::new(Mutex::new(ReaderState {
                reader: XmlReader::new(read_half),
                opened: false,
                closed: false,
            })),
            forcibly_closed: forcibly_closed.clone(),
            ids: ids.clone(),
        };
        let writer = FramedXmlWriter {
            state: Arc::new(Mutex::new(WriterState {
                io: write_half,
                opened: false,
                closed: false,
            })),
            forcibly_closed,
            ids,
        };
        Ok(FramedXmlConnection { reader, writer })
    }
}

impl<R> Clone for FramedXmlReader<R> {
    fn clone(&self) -> Self {
        FramedXmlReader {
            state: self.state.clone(),
            forcibly_closed: self.forcibly_closed.clone(),
            ids: self.ids.clone(),
        }
    }
}

impl<W> Clone for FramedXmlWriter<W> {
    fn clone(&self) -> Self {
        FramedXmlWriter {
            state: self.state.clone(),
            forcibly_closed: self.forcibly_closed.clone(),
            ids: self.ids.clone(),
        }
    }
}

impl<W: AsyncWrite + Unpin> FramedXmlWriter<W> {
    pub async fn send_open(&self, attrs: &[(&str, &str)]) -> Result<(), FramedConnectionError> {
        let mut guard = self
            .state
            .try_lock()
            .map_err(|_| FramedConnectionError::Pending)?;
        if self.forcibly_closed.load(Ordering::SeqCst) {
            return Err(FramedConnectionError::ForciblyClosed);
        }
        if guard.opened {
            return Err(FramedConnectionError::IsOpen);
        }
        if guard.closed {
            return Err(FramedConnectionError::IsClosed);
        }
        let tag = write_start_tag("stream:stream", attrs);
        guard.io.write_all(tag.as_bytes()).await?;
        guard.io.flush().await?;
        guard.opened = true;
        Ok(())
    }

    pub async fn send_stanza(&self, el: &Element) -> Result<(), FramedConnectionError> {
        let mut guard = self
            .state
            .try_lock()
            .map_err(|_| FramedConnectionError::Pending)?;
        if self.forcibly_closed.load(Ordering::SeqCst) {
            return Err(FramedConnectionError::ForciblyClosed);
        }
        if !guard.opened {
            return Err(FramedConnectionError::NotOpen);
        }
        if guard.closed {
            return Err(FramedConnectionError::IsClosed);
        }
        let bytes = write_element(el);
        guard.io.write_all(bytes.as_bytes()).await?;
        guard.io.flush().await?;
        Ok(())
    }

    pub async fn send_close(&self) -> Result<(), FramedConnectionError> {
        let mut guard = self
            .state
            .try_lock()
            .map_err(|_| FramedConnectionError::Pending)?;
        if self.forcibly_closed.load(Ordering::SeqCst) {
            return Err(FramedConnectionError::ForciblyClosed);
        }
        if !guard.opened {
            return Err(FramedConnectionError::NotOpen);
        }
        if guard.closed {
            return Err(FramedConnectionError::IsClosed);
        }
        guard.io.write_all(b"</stream:stream>").await?;
        guard.io.flush().await?;
        guard.closed = true;
        Ok(())
    }

    pub async fn send_whitespace_ping(&self) -> Result<(), FramedConnectionError> {
        let mut guard = self
            .state
            .try_lock()
            .map_err(|_| FramedConnectionError::Pending)?;
        if self.forcibly_closed.load(Ordering::SeqCst) {
            return Err(FramedConnectionError::ForciblyClosed);
        }
        if !guard.opened {
            return Err(FramedConnectionError::NotOpen);
        }
        if guard.closed {
            return Err(FramedConnectionError::IsClosed);
        }
        guard.io.write_all(b" ").await?;
        guard.io.flush().await?;
        Ok(())
    }

    pub async fn force_close(&self) {
        self.forcibly_closed.store(true, Ordering::SeqCst);
        if let Ok(mut guard) = self.state.try_lock() {
            let _ = guard.io.shutdown().await;
            guard.closed = true;
        }
    }
}

impl<R: AsyncRead + Unpin> FramedXmlReader<R> {
    pub async fn recv_open(&self) -> Result<Element, FramedConnectionError> {
        let mut guard = self
            .state
            .try_lock()
            .map_err(|_| FramedConnectionError::Pending)?;
        if self.forcibly_closed.load(Ordering::SeqCst) {
            return Err(FramedConnectionError::ForciblyClosed);
        }
        if guard.opened {
            return Err(FramedConnectionError::IsOpen);
        }
        let el = guard.reader.read_open().await.map_err(map_parse_err)?;
        guard.opened = true;
        Ok(el)
    }

    pub async fn recv_stanza(&self) -> Result<Option<Stanza>, FramedConnectionError> {
        let mut guard = self
            .state
            .try_lock()
            .map_err(|_| FramedConnectionError::Pending)?;
        if self.forcibly_closed.load(Ordering::SeqCst) {
            return Err(FramedConnectionError::ForciblyClosed);
        }
        if !guard.opened {
            return Err(FramedConnectionError::NotOpen);
        }
        if guard.closed {
            return Err(FramedConnectionError::Closed);
        }
        match guard.reader.read_body().await.map_err(map_parse_err)? {
            BodyEvent::Stanza(el) => {
                let stanza = Stanza::from_element(el)
                    .map_err(|e| FramedConnectionError::Parse(e.0))?;
                Ok(Some(stanza))
            }
            BodyEvent::StreamClosed => {
                guard.closed = true;
                Ok(None)
            }
        }
    }

    pub async fn force_close(&self) {
        self.forcibly_closed.store(true, Ordering::SeqCst);
        if let Ok(mut guard) = self.state.try_lock() {
            guard.closed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn open_send_recv_close_round_trip() {
        let (client_io, server_io) = duplex(8192);
        let client = FramedXmlConnection::new(client_io);
        let server = FramedXmlConnection::new(server_io);

        let client_attrs = [
            ("xmlns", "jabber:client"),
            ("xmlns:stream", "http://etherx.jabber.org/streams"),
            ("to", "example.com"),
            ("version", "1.0"),
        ];
        let (client_open, server_open) =
            tokio::join!(client.send_open(&client_attrs), server.recv_open());
        client_open.unwrap();
        let opened = server_open.unwrap();
        assert_eq!(opened.name, "stream");
        assert_eq!(opened.attr("to"), Some("example.com"));

        let server_attrs = [
            ("xmlns", "jabber:client"),
            ("xmlns:stream", "http://etherx.jabber.org/streams"),
            ("id", "abc123"),
            ("version", "1.0"),
        ];
        let (server_open2, client_open2) =
            tokio::join!(server.send_open(&server_attrs), client.recv_open());
        server_open2.unwrap();
        let opened2 = client_open2.unwrap();
        assert_eq!(opened2.attr("id"), Some("abc123"));

        let stanza = Element::new("message", "jabber:client")
            .with_attr("to", "a@b")
            .with_child(Element::new("body", "jabber:client").with_text("hi"));
        let (send_res, recv_res) =
            tokio::join!(client.send_stanza(&stanza), server.recv_stanza());
        send_res.unwrap();
        let recvd = recv_res.unwrap().unwrap();
        assert_eq!(recvd.root.name, "message");

        client.send_close().await.unwrap();
        match server.recv_stanza().await.unwrap() {
            None => (),
            Some(_) => panic!("expected stream close"),
        }
    }

    #[tokio::test]
    async fn send_stanza_before_open_is_not_open() {
        let (client_io, _server_io) = duplex(1024);
        let client = FramedXmlConnection::new(client_io);
        let stanza = Element::new("iq", "jabber:client");
        let err = client.send_stanza(&stanza).await.unwrap_err();
        assert!(matches!(err, FramedConnectionError::NotOpen));
    }

    #[tokio::test]
    async fn force_close_short_circuits_future_ops() {
        let (client_io, _server_io) = duplex(1024);
        let client = FramedXmlConnection::new(client_io);
        client.force_close().await;
        let err = client
            .send_open(&[("xmlns", "jabber:client")])
            .await
            .unwrap_err();
        assert!(matches!(err, FramedConnectionError::ForciblyClosed));
    }

    #[test]
    fn new_id_is_unique() {
        let ids = IdGen::new();
        let a = ids.next();
        let b = ids.next();
        assert_ne!(a, b);
    }
}
