//! A minimal XML element tree plus a streaming reader/writer sized for XMPP
//! stream framing.
//!
//! This is not a general-purpose XML parser: one stream-level opening tag,
//! a sequence of complete top-level child elements ("stanzas"), and a
//! closing tag. No DTDs, comments, processing instructions or CDATA
//! sections.

use std::collections::HashMap;
use std::fmt;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// An XML element: a name resolved to a namespace, an attribute list,
/// optional text content and child elements.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    /// Local name, e.g. `"iq"`.
    pub name: String,
    /// Namespace URI resolved at parse time (never a prefix).
    pub ns: String,
    /// Attributes in the order they appeared on the wire.
    pub attrs: Vec<(String, String)>,
    /// Text content, if the element is not empty and has no element
    /// children carrying it (mixed content collapses child element text
    /// into that child, as is customary for the stanzas this crate cares
    /// about).
    pub text: Option<String>,
    /// Child elements, in document order.
    pub children: Vec<Element>,
}

impl Element {
    /// Build a bare element with name and namespace, no attributes/text/children.
    pub fn new(name: impl Into<String>, ns: impl Into<String>) -> Self {
        Element {
            name: name.into(),
            ns: ns.into(),
            attrs: Vec::new(),
            text: None,
            children: Vec::new(),
        }
    }

    /// Builder-style attribute setter.
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    /// Builder-style text setter.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Builder-style child appender.
    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    /// Set (or replace) an attribute.
    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if let Some(existing) = self.attrs.iter_mut().find(|(k, _)| *k == key) {
            existing.1 = value;
        } else {
            self.attrs.push((key, value));
        }
    }

    /// Look up an attribute by exact name.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// First child matching `(name, ns)`.
    pub fn get_child(&self, name: &str, ns: &str) -> Option<&Element> {
        self.children
            .iter()
            .find(|c| c.name == name && c.ns == ns)
    }

    /// All children matching `(name, ns)`.
    pub fn children_named<'a>(
        &'a self,
        name: &'a str,
        ns: &'a str,
    ) -> impl Iterator<Item = &'a Element> {
        self.children
            .iter()
            .filter(move |c| c.name == name && c.ns == ns)
    }

    /// The "superset match" relation used by porter handler patterns:
    /// every element in `pattern` must have a
    /// corresponding child in `self` with the same `(name, ns)`, whose
    /// attributes are all present and equal here, and whose text (if any)
    /// is equal, recursively. Extra attributes/children on `self` are
    /// allowed.
    pub fn matches_pattern(&self, pattern: &Element) -> bool {
        if self.name != pattern.name || self.ns != pattern.ns {
            return false;
        }
        for (key, value) in &pattern.attrs {
            match self.attr(key) {
                Some(v) if v == value => (),
                _ => return false,
            }
        }
        if let Some(text) = &pattern.text {
            if self.text.as_deref() != Some(text.as_str()) {
                return false;
            }
        }
        for pat_child in &pattern.children {
            let matched = self
                .children
                .iter()
                .any(|c| c.matches_pattern(pat_child));
            if !matched {
                return false;
            }
        }
        true
    }
}

/// Error produced while tokenising/parsing the wire format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlParseError(pub String);

impl fmt::Display for XmlParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "XML parse error: {}", self.0)
    }
}

impl std::error::Error for XmlParseError {}

fn unescape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '&' {
            out.push(c);
            continue;
        }
        let mut entity = String::new();
        let mut closed = false;
        for c2 in chars.by_ref() {
            if c2 == ';' {
                closed = true;
                break;
            }
            entity.push(c2);
        }
        if !closed {
            out.push('&');
            out.push_str(&entity);
            continue;
        }
        match entity.as_str() {
            "amp" => out.push('&'),
            "lt" => out.push('<'),
            "gt" => out.push('>'),
            "quot" => out.push('"'),
            "apos" => out.push('\''),
            other if other.starts_with('#') => {
                let code = if let Some(hex) = other.strip_prefix("#x") {
                    u32::from_str_radix(hex, 16).ok()
                } else {
                    other[1..].parse::<u32>().ok()
                };
                if let Some(ch) = code.and_then(char::from_u32) {
                    out.push(ch);
                }
            }
            _ => {
                out.push('&');
                out.push_str(&entity);
                out.push(';');
            }
        }
    }
    out
}

/// Escape text for use between tags.
pub fn escape_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escape text for use inside a double-quoted attribute value.
pub fn escape_attr(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[derive(Debug, Clone, Default)]
struct NsScope {
    default_ns: Option<String>,
    prefixes: HashMap<String, String>,
}

/// A parsed start tag, prior to namespace resolution of its children.
struct RawTag {
    prefix: Option<String>,
    local: String,
    attrs: Vec<(Option<String>, String, String)>, // (prefix, local, value)
    self_closing: bool,
}

fn split_qname(qname: &str) -> (Option<&str>, &str) {
    match qname.split_once(':') {
        Some((p, l)) => (Some(p), l),
        None => (None, qname),
    }
}

fn parse_tag_body(body: &str) -> Result<RawTag, XmlParseError> {
    let body = body.trim();
    let (body, self_closing) = if let Some(stripped) = body.strip_suffix('/') {
        (stripped.trim_end(), true)
    } else {
        (body, false)
    };
    let mut chars = body.char_indices().peekable();
    let name_end = chars
        .clone()
        .find(|(_, c)| c.is_whitespace())
        .map(|(i, _)| i)
        .unwrap_or(body.len());
    let name = &body[..name_end];
    if name.is_empty() {
        return Err(XmlParseError("empty tag name".into()));
    }
    let (prefix, local) = split_qname(name);
    let mut attrs = Vec::new();
    let rest = body[name_end..].trim_start();
    let mut rest = rest;
    while !rest.is_empty() {
        let eq = rest
            .find('=')
            .ok_or_else(|| XmlParseError("attribute missing '='".into()))?;
        let attr_name = rest[..eq].trim();
        if attr_name.is_empty() {
            return Err(XmlParseError("empty attribute name".into()));
        }
        let after_eq = rest[eq + 1..].trim_start();
        let quote = after_eq
            .chars()
            .next()
            .ok_or_else(|| XmlParseError("attribute missing value".into()))?;
        if quote != '"' && quote != '\'' {
            return Err(XmlParseError("attribute value must be quoted".into()));
        }
        let value_start = 1;
        let value_end = after_eq[value_start..]
            .find(quote)
            .ok_or_else(|| XmlParseError("unterminated attribute value".into()))?;
        let raw_value = &after_eq[value_start..value_start + value_end];
        let (aprefix, alocal) = split_qname(attr_name);
        attrs.push((aprefix.map(String::from), alocal.to_string(), unescape(raw_value)));
        rest = after_eq[value_start + value_end + 1..].trim_start();
    }
    Ok(RawTag {
        prefix: prefix.map(String::from),
        local: local.to_string(),
        attrs,
        self_closing,
    })
}

fn resolve_scope(parent: &NsScope, tag: &RawTag) -> (NsScope, String) {
    let mut scope = parent.clone();
    for (prefix, local, value) in &tag.attrs {
        match (prefix.as_deref(), local.as_str()) {
            (None, "xmlns") => scope.default_ns = Some(value.clone()),
            (Some("xmlns"), p) => {
                scope.prefixes.insert(p.to_string(), value.clone());
            }
            _ => (),
        }
    }
    let ns = match &tag.prefix {
        Some(p) => scope
            .prefixes
            .get(p)
            .cloned()
            .unwrap_or_default(),
        None => scope.default_ns.clone().unwrap_or_default(),
    };
    (scope, ns)
}

/// Streaming reader over an [`AsyncRead`], producing [`Element`]s one stream
/// header and one top-level stanza at a time.
pub struct XmlReader<R> {
    io: R,
    buf: Vec<u8>,
    pos: usize,
    scopes: Vec<NsScope>,
    root_name: Option<(Option<String>, String)>,
}

/// Outcome of reading the next thing from the stream body.
pub enum BodyEvent {
    /// A complete top-level stanza.
    Stanza(Element),
    /// The closing tag matching the stream root was seen.
    StreamClosed,
}

impl<R: AsyncRead + Unpin> XmlReader<R> {
    /// Wrap an [`AsyncRead`] for reading.
    pub fn new(io: R) -> Self {
        XmlReader {
            io,
            buf: Vec::new(),
            pos: 0,
            scopes: vec![NsScope::default()],
            root_name: None,
        }
    }

    async fn fill(&mut self) -> Result<usize, XmlParseError> {
        let mut tmp = [0u8; 4096];
        let n = self
            .io
            .read(&mut tmp)
            .await
            .map_err(|e| XmlParseError(format!("io error: {e}")))?;
        self.buf.extend_from_slice(&tmp[..n]);
        Ok(n)
    }

    /// Consumed-but-unparsed remainder as UTF-8 text, from `self.pos`.
    fn remaining(&self) -> Result<&str, XmlParseError> {
        std::str::from_utf8(&self.buf[self.pos..])
            .map_err(|e| XmlParseError(format!("invalid utf-8: {e}")))
    }

    /// Read until the next complete `<...>` token is available, returning
    /// its byte range within `self.buf` (start inclusive of `<`, end
    /// exclusive, past `>`).
    async fn next_tag_range(&mut self) -> Result<Option<(usize, usize, bool)>, XmlParseError> {
        loop {
            let text = self.remaining()?;
            if let Some(lt) = text.find('<') {
                let after_lt = &text[lt + 1..];
                let closing = after_lt.starts_with('/');
                if let Some(gt) = find_unquoted_gt(after_lt) {
                    let start = self.pos + lt;
                    let end = self.pos + lt + 1 + gt + 1;
                    return Ok(Some((start, end, closing)));
                }
            }
            if self.fill().await? == 0 {
                if text.trim().is_empty() {
                    return Ok(None);
                }
                return Err(XmlParseError("eof mid-tag".into()));
            }
        }
    }

    /// Parse the stream-opening tag (`<stream:stream ...>`), not
    /// self-closing, and establish the root namespace scope.
    pub async fn read_open(&mut self) -> Result<Element, XmlParseError> {
        let (start, end, closing) = self
            .next_tag_range()
            .await?
            .ok_or_else(|| XmlParseError("eof before stream open".into()))?;
        if closing {
            return Err(XmlParseError("unexpected closing tag at stream start".into()));
        }
        let body = std::str::from_utf8(&self.buf[start + 1..end - 1])
            .map_err(|e| XmlParseError(format!("invalid utf-8: {e}")))?
            .to_string();
        self.pos = end;
        let tag = parse_tag_body(&body)?;
        let (scope, ns) = resolve_scope(&self.scopes[0], &tag);
        self.scopes = vec![scope];
        self.root_name = Some((tag.prefix.clone(), tag.local.clone()));
        let mut el = Element::new(tag.local, ns);
        for (prefix, local, value) in &tag.attrs {
            let key = match prefix {
                Some(p) => format!("{p}:{local}"),
                None => local.clone(),
            };
            el.set_attr(key, value.clone());
        }
        Ok(el)
    }

    /// Hand back the wrapped I/O object, e.g. to rebuild a fresh reader
    /// against the same transport after a SASL/TLS stream reset.
    pub fn into_inner(self) -> R {
        self.io
    }

    /// Read the next thing in the stream body: either a complete stanza or
    /// the stream's own closing tag.
    pub async fn read_body(&mut self) -> Result<BodyEvent, XmlParseError> {
        loop {
            let (start, end, closing) = match self.next_tag_range().await? {
                Some(v) => v,
                None => return Err(XmlParseError("eof reading stream body".into())),
            };
            if closing {
                // Must be the stream root's own end tag at this level.
                self.pos = end;
                return Ok(BodyEvent::StreamClosed);
            }
            self.pos = start; // rewind; read_element consumes from start
            let el = self.read_element().await?;
            return Ok(BodyEvent::Stanza(el));
        }
    }

    /// Read one complete element subtree starting at `self.pos` (which must
    /// point at a `<` beginning a start tag, not a closing tag).
    fn read_element<'a>(
        &'a mut self,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Element, XmlParseError>> + 'a>>
    {
        Box::pin(async move {
            let (start, end, closing) = self
                .next_tag_range()
                .await?
                .ok_or_else(|| XmlParseError("eof reading element".into()))?;
            if closing {
                return Err(XmlParseError("unexpected closing tag".into()));
            }
            let body = std::str::from_utf8(&self.buf[start + 1..end - 1])
                .map_err(|e| XmlParseError(format!("invalid utf-8: {e}")))?
                .to_string();
            self.pos = end;
            let tag = parse_tag_body(&body)?;
            let parent_scope = self.scopes.last().cloned().unwrap_or_default();
            let (scope, ns) = resolve_scope(&parent_scope, &tag);
            let mut el = Element::new(tag.local.clone(), ns);
            for (prefix, local, value) in &tag.attrs {
                if prefix.as_deref() == Some("xmlns") || (prefix.is_none() && local == "xmlns") {
                    continue;
                }
                let key = match prefix {
                    Some(p) => format!("{p}:{local}"),
                    None => local.clone(),
                };
                el.set_attr(key, value.clone());
            }
            if tag.self_closing {
                return Ok(el);
            }
            self.scopes.push(scope);
            let end_local = tag.local.clone();
            let end_prefix = tag.prefix.clone();
            let mut text_buf = String::new();
            loop {
                // Read any text up to the next '<'.
                loop {
                    let remaining = self.remaining()?;
                    if let Some(lt) = remaining.find('<') {
                        text_buf.push_str(&remaining[..lt]);
                        self.pos += lt;
                        break;
                    } else {
                        text_buf.push_str(remaining);
                        self.pos = self.buf.len();
                        if self.fill().await? == 0 {
                            return Err(XmlParseError("eof inside element".into()));
                        }
                    }
                }
                let (tstart, tend, is_close) = self
                    .next_tag_range()
                    .await?
                    .ok_or_else(|| XmlParseError("eof inside element".into()))?;
                if is_close {
                    let body = std::str::from_utf8(&self.buf[tstart + 2..tend - 1])
                        .map_err(|e| XmlParseError(format!("invalid utf-8: {e}")))?;
                    let (p, l) = split_qname(body.trim());
                    if p != end_prefix.as_deref() || l != end_local {
                        return Err(XmlParseError(format!(
                            "mismatched end tag: expected {:?}:{}, got {:?}:{}",
                            end_prefix, end_local, p, l
                        )));
                    }
                    self.pos = tend;
                    self.scopes.pop();
                    break;
                } else {
                    self.pos = tstart;
                    let child = self.read_element().await?;
                    el.children.push(child);
                }
            }
            let trimmed = unescape(&text_buf);
            if !trimmed.is_empty() {
                el.text = Some(trimmed);
            }
            Ok(el)
        })
    }
}

fn find_unquoted_gt(s: &str) -> Option<usize> {
    let mut in_quote: Option<char> = None;
    for (i, c) in s.char_indices() {
        match in_quote {
            Some(q) => {
                if c == q {
                    in_quote = None;
                }
            }
            None => {
                if c == '"' || c == '\'' {
                    in_quote = Some(c);
                } else if c == '>' {
                    return Some(i);
                }
            }
        }
    }
    None
}

/// Serialise a start tag (stream header) with explicit attribute list, used
/// since the stream root is written once and never revisited as an
/// [`Element`].
pub fn write_start_tag(name: &str, attrs: &[(&str, &str)]) -> String {
    let mut out = format!("<{name}");
    for (k, v) in attrs {
        out.push_str(&format!(" {k}=\"{}\"", escape_attr(v)));
    }
    out.push('>');
    out
}

/// Serialise a complete element subtree.
pub fn write_element(el: &Element) -> String {
    let mut out = String::new();
    write_element_into(el, &mut out);
    out
}

fn write_element_into(el: &Element, out: &mut String) {
    out.push('<');
    out.push_str(&el.name);
    for (k, v) in &el.attrs {
        out.push_str(&format!(" {k}=\"{}\"", escape_attr(v)));
    }
    if el.text.is_none() && el.children.is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');
    if let Some(text) = &el.text {
        out.push_str(&escape_text(text));
    }
    for child in &el.children {
        write_element_into(child, out);
    }
    out.push_str("</");
    out.push_str(&el.name);
    out.push('>');
}

/// Write helper over an [`AsyncWrite`].
pub async fn write_bytes<W: AsyncWrite + Unpin>(io: &mut W, s: &str) -> std::io::Result<()> {
    io.write_all(s.as_bytes()).await?;
    io.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn reads_open_and_one_stanza() {
        let (mut client, server) = duplex(4096);
        let wire = "<stream:stream xmlns='jabber:client' xmlns:stream='http://etherx.jabber.org/streams' to='example.com' version='1.0'><message to='a@b'><body>hi</body></message></stream:stream>";
        client.write_all(wire.as_bytes()).await.unwrap();
        drop(client);

        let mut reader = XmlReader::new(server);
        let open = reader.read_open().await.unwrap();
        assert_eq!(open.name, "stream");
        assert_eq!(open.attr("to"), Some("example.com"));

        match reader.read_body().await.unwrap() {
            BodyEvent::Stanza(el) => {
                assert_eq!(el.name, "message");
                assert_eq!(el.ns, "jabber:client");
                let body = el.get_child("body", "jabber:client").unwrap();
                assert_eq!(body.text.as_deref(), Some("hi"));
            }
            BodyEvent::StreamClosed => panic!("expected a stanza"),
        }

        match reader.read_body().await.unwrap() {
            BodyEvent::StreamClosed => (),
            BodyEvent::Stanza(_) => panic!("expected stream close"),
        }
    }

    #[test]
    fn superset_match() {
        let pattern = Element::new("message", "jabber:client").with_child(
            Element::new("body", "jabber:client").with_text("please sign out"),
        );
        let matching = Element::new("message", "jabber:client")
            .with_attr("from", "a@b")
            .with_child(Element::new("body", "jabber:client").with_text("please sign out"));
        let not_matching = Element::new("message", "jabber:client")
            .with_child(Element::new("body", "jabber:client").with_text("hello"));
        assert!(matching.matches_pattern(&pattern));
        assert!(!not_matching.matches_pattern(&pattern));
    }

    #[test]
    fn escape_round_trip() {
        let s = "a & b < c > d \" e ' f";
        let escaped = escape_attr(s);
        assert_eq!(unescape(&escaped), s);
    }
}
