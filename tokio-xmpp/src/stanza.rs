//! Stanza data model: typed root, stanza errors, stream errors.
//!
//! Grounded on `wocky-stanza.h`'s `WockyStanzaType`/`WockyStanzaSubType`
//! pair and on `wocky-xmpp-connection.c`'s handling of `<stream:error/>`.

use jid::Jid;

use crate::xml::Element;

pub const NS_JABBER_CLIENT: &str = "jabber:client";
pub const NS_STREAMS: &str = "http://etherx.jabber.org/streams";
pub const NS_STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";
pub const NS_STREAM_ERRORS: &str = "urn:ietf:params:xml:ns:xmpp-streams";

/// The three root element kinds a stanza stream body carries, plus
/// anything else (stream features, SASL elements, etc.) as `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Message,
    Presence,
    Iq,
    Other,
}

/// The `type='...'` attribute, typed per root kind. `None` stands for the
/// attribute being absent, which for `message`/`presence` has its own
/// default meaning (normal message, available presence).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubKind {
    // message
    Normal,
    Chat,
    Groupchat,
    Headline,
    MessageError,
    // presence
    Available,
    Unavailable,
    Subscribe,
    Subscribed,
    Unsubscribe,
    Unsubscribed,
    Probe,
    PresenceError,
    // iq
    Get,
    Set,
    Result,
    IqError,
    /// Any other/unknown value, preserved verbatim.
    Unknown,
}

impl Kind {
    fn from_name(name: &str, ns: &str) -> Kind {
        if ns != NS_JABBER_CLIENT && !ns.is_empty() {
            return Kind::Other;
        }
        match name {
            "message" => Kind::Message,
            "presence" => Kind::Presence,
            "iq" => Kind::Iq,
            _ => Kind::Other,
        }
    }
}

impl SubKind {
    fn from_type_attr(kind: Kind, type_attr: Option<&str>) -> SubKind {
        match (kind, type_attr) {
            (Kind::Message, None) => SubKind::Normal,
            (Kind::Message, Some("normal")) => SubKind::Normal,
            (Kind::Message, Some("chat")) => SubKind::Chat,
            (Kind::Message, Some("groupchat")) => SubKind::Groupchat,
            (Kind::Message, Some("headline")) => SubKind::Headline,
            (Kind::Message, Some("error")) => SubKind::MessageError,

            (Kind::Presence, None) => SubKind::Available,
            (Kind::Presence, Some("unavailable")) => SubKind::Unavailable,
            (Kind::Presence, Some("subscribe")) => SubKind::Subscribe,
            (Kind::Presence, Some("subscribed")) => SubKind::Subscribed,
            (Kind::Presence, Some("unsubscribe")) => SubKind::Unsubscribe,
            (Kind::Presence, Some("unsubscribed")) => SubKind::Unsubscribed,
            (Kind::Presence, Some("probe")) => SubKind::Probe,
            (Kind::Presence, Some("error")) => SubKind::PresenceError,

            (Kind::Iq, Some("get")) => SubKind::Get,
            (Kind::Iq, Some("set")) => SubKind::Set,
            (Kind::Iq, Some("result")) => SubKind::Result,
            (Kind::Iq, Some("error")) => SubKind::IqError,

            _ => SubKind::Unknown,
        }
    }

    /// Whether this sub-kind denotes an error response, for either message,
    /// presence or iq roots.
    pub fn is_error(self) -> bool {
        matches!(self, SubKind::MessageError | SubKind::PresenceError | SubKind::IqError)
    }
}

/// A parsed stanza: its root element plus the typed view spec §3 defines
/// over it.
#[derive(Debug, Clone)]
pub struct Stanza {
    pub kind: Kind,
    pub sub_kind: SubKind,
    pub id: Option<String>,
    pub from: Option<Jid>,
    pub to: Option<Jid>,
    pub root: Element,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StanzaJidParseError(pub String);

impl Stanza {
    /// Build a typed view over a parsed root element. JIDs that fail to
    /// parse are reported rather than silently dropped, since `from`/`to`
    /// correctness matters for porter correlation (§4.6).
    pub fn from_element(root: Element) -> Result<Stanza, StanzaJidParseError> {
        let kind = Kind::from_name(&root.name, &root.ns);
        let type_attr = root.attr("type");
        let sub_kind = SubKind::from_type_attr(kind, type_attr);
        let id = root.attr("id").map(String::from);
        let from = root
            .attr("from")
            .map(|s| s.parse::<Jid>().map_err(|e| StanzaJidParseError(e.to_string())))
            .transpose()?;
        let to = root
            .attr("to")
            .map(|s| s.parse::<Jid>().map_err(|e| StanzaJidParseError(e.to_string())))
            .transpose()?;
        Ok(Stanza {
            kind,
            sub_kind,
            id,
            from,
            to,
            root,
        })
    }

    /// Whether this stanza is an IQ (any sub-kind).
    pub fn is_iq(&self) -> bool {
        matches!(self.kind, Kind::Iq)
    }

    /// The `<error/>` child, if present.
    pub fn error_element(&self) -> Option<&Element> {
        self.root.get_child("error", self.root.ns.as_str())
    }

    /// Extract a [`StanzaError`] from this stanza's `<error/>` child, if
    /// `sub_kind` indicates an error and one is present.
    pub fn stanza_error(&self) -> Option<StanzaError> {
        if !self.sub_kind.is_error() {
            return None;
        }
        let err_el = self.error_element()?;
        Some(StanzaError::from_element(err_el))
    }
}

/// The defined-condition taxonomy of `urn:ietf:params:xml:ns:xmpp-stanzas`
/// (RFC 6120 §8.3.3), plus a catch-all for unrecognised conditions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StanzaErrorCondition {
    BadRequest,
    Conflict,
    FeatureNotImplemented,
    Forbidden,
    Gone,
    InternalServerError,
    ItemNotFound,
    JidMalformed,
    NotAcceptable,
    NotAllowed,
    NotAuthorized,
    PolicyViolation,
    RecipientUnavailable,
    Redirect,
    RegistrationRequired,
    RemoteServerNotFound,
    RemoteServerTimeout,
    ResourceConstraint,
    ServiceUnavailable,
    SubscriptionRequired,
    UndefinedCondition,
    UnexpectedRequest,
    Unknown(String),
}

impl StanzaErrorCondition {
    fn from_local_name(name: &str) -> StanzaErrorCondition {
        use StanzaErrorCondition::*;
        match name {
            "bad-request" => BadRequest,
            "conflict" => Conflict,
            "feature-not-implemented" => FeatureNotImplemented,
            "forbidden" => Forbidden,
            "gone" => Gone,
            "internal-server-error" => InternalServerError,
            "item-not-found" => ItemNotFound,
            "jid-malformed" => JidMalformed,
            "not-acceptable" => NotAcceptable,
            "not-allowed" => NotAllowed,
            "not-authorized" => NotAuthorized,
            "policy-violation" => PolicyViolation,
            "recipient-unavailable" => RecipientUnavailable,
            "redirect" => Redirect,
            "registration-required" => RegistrationRequired,
            "remote-server-not-found" => RemoteServerNotFound,
            "remote-server-timeout" => RemoteServerTimeout,
            "resource-constraint" => ResourceConstraint,
            "service-unavailable" => ServiceUnavailable,
            "subscription-required" => SubscriptionRequired,
            "undefined-condition" => UndefinedCondition,
            "unexpected-request" => UnexpectedRequest,
            other => Unknown(other.to_string()),
        }
    }
}

/// A stanza-level `<error/>`: type attribute, defined condition, optional
/// human-readable text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StanzaError {
    pub error_type: Option<String>,
    pub condition: StanzaErrorCondition,
    pub text: Option<String>,
}

impl StanzaError {
    fn from_element(el: &Element) -> StanzaError {
        let error_type = el.attr("type").map(String::from);
        let condition = el
            .children
            .iter()
            .find(|c| c.ns == NS_STANZAS && c.name != "text")
            .map(|c| StanzaErrorCondition::from_local_name(&c.name))
            .unwrap_or(StanzaErrorCondition::UndefinedCondition);
        let text = el
            .children
            .iter()
            .find(|c| c.ns == NS_STANZAS && c.name == "text")
            .and_then(|c| c.text.clone());
        StanzaError {
            error_type,
            condition,
            text,
        }
    }
}

/// The defined-condition taxonomy for `<stream:error/>` (RFC 6120 §4.9.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamErrorCondition {
    BadFormat,
    BadNamespacePrefix,
    Conflict,
    ConnectionTimeout,
    HostGone,
    HostUnknown,
    ImproperAddressing,
    InternalServerError,
    InvalidFrom,
    InvalidNamespace,
    InvalidXml,
    NotAuthorized,
    NotWellFormed,
    PolicyViolation,
    RemoteConnectionFailed,
    Reset,
    ResourceConstraint,
    RestrictedXml,
    SeeOtherHost(String),
    SystemShutdown,
    UndefinedCondition,
    UnsupportedEncoding,
    UnsupportedFeature,
    UnsupportedStanzaType,
    UnsupportedVersion,
    Unknown(String),
}

/// A parsed `<stream:error/>`, with the see-other-host target extracted
/// when present and a condition name → human text mapping for callers
/// that only want to log or surface a reason string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamError {
    pub condition: StreamErrorCondition,
    pub text: Option<String>,
}

impl StreamError {
    pub fn from_element(el: &Element) -> StreamError {
        let text = el
            .children
            .iter()
            .find(|c| c.ns == NS_STREAM_ERRORS && c.name == "text")
            .and_then(|c| c.text.clone());
        let condition_el = el
            .children
            .iter()
            .find(|c| c.ns == NS_STREAM_ERRORS && c.name != "text");
        let condition = match condition_el {
            Some(c) if c.name == "see-other-host" => {
                StreamErrorCondition::SeeOtherHost(c.text.clone().unwrap_or_default())
            }
            Some(c) => condition_from_local_name(&c.name),
            None => StreamErrorCondition::UndefinedCondition,
        };
        StreamError { condition, text }
    }

    /// A human-readable description, preferring the server-supplied
    /// `<text/>` but always falling back to the condition's canonical
    /// description.
    pub fn description(&self) -> String {
        if let Some(text) = &self.text {
            return text.clone();
        }
        condition_description(&self.condition)
    }
}

fn condition_from_local_name(name: &str) -> StreamErrorCondition {
    use StreamErrorCondition::*;
    match name {
        "bad-format" => BadFormat,
        "bad-namespace-prefix" => BadNamespacePrefix,
        "conflict" => Conflict,
        "connection-timeout" => ConnectionTimeout,
        "host-gone" => HostGone,
        "host-unknown" => HostUnknown,
        "improper-addressing" => ImproperAddressing,
        "internal-server-error" => InternalServerError,
        "invalid-from" => InvalidFrom,
        "invalid-namespace" => InvalidNamespace,
        "invalid-xml" => InvalidXml,
        "not-authorized" => NotAuthorized,
        "not-well-formed" => NotWellFormed,
        "policy-violation" => PolicyViolation,
        "remote-connection-failed" => RemoteConnectionFailed,
        "reset" => Reset,
        "resource-constraint" => ResourceConstraint,
        "restricted-xml" => RestrictedXml,
        "system-shutdown" => SystemShutdown,
        "undefined-condition" => UndefinedCondition,
        "unsupported-encoding" => UnsupportedEncoding,
        "unsupported-feature" => UnsupportedFeature,
        "unsupported-stanza-type" => UnsupportedStanzaType,
        "unsupported-version" => UnsupportedVersion,
        other => Unknown(other.to_string()),
    }
}

fn condition_description(condition: &StreamErrorCondition) -> String {
    use StreamErrorCondition::*;
    match condition {
        BadFormat => "the entity sent XML that cannot be processed",
        BadNamespacePrefix => "the entity sent a namespace prefix not understood",
        Conflict => "the server closed the stream because a new connection replaced it",
        ConnectionTimeout => "the entity sent no traffic for too long",
        HostGone => "the target host is no longer hosted by the server",
        HostUnknown => "the target host is not known to the server",
        ImproperAddressing => "a stanza lacked a 'to' or 'from' attribute where required",
        InternalServerError => "the server experienced a misconfiguration or internal failure",
        InvalidFrom => "the JID or hostname in a 'from' attribute does not match the stream",
        InvalidNamespace => "the stream or stanza namespace is not valid",
        InvalidXml => "the entity sent invalid XML over the stream",
        NotAuthorized => "the entity attempted to send data before authenticating",
        NotWellFormed => "the entity sent XML that is not well-formed",
        PolicyViolation => "the entity violated a server policy",
        RemoteConnectionFailed => "the server could not connect to a required remote entity",
        Reset => "the server is closing the stream for reconnection",
        ResourceConstraint => "the server lacks resources to service the stream",
        RestrictedXml => "the entity sent restricted XML features",
        SeeOtherHost(_) => "the server is redirecting the client to another host",
        SystemShutdown => "the server is being shut down",
        UndefinedCondition => "the server closed the stream for an unspecified reason",
        UnsupportedEncoding => "the stream used an encoding not supported by the server",
        UnsupportedFeature => "the server does not support the feature requested",
        UnsupportedStanzaType => "the entity sent a stanza type not supported by the server",
        UnsupportedVersion => "the 'version' attribute is unsupported",
        Unknown(name) => return format!("unrecognised stream error condition '{name}'"),
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn el(name: &str, ns: &str) -> Element {
        Element::new(name, ns)
    }

    #[test]
    fn classifies_iq_get() {
        let root = el("iq", NS_JABBER_CLIENT)
            .with_attr("type", "get")
            .with_attr("id", "abc123")
            .with_attr("to", "example.com");
        let stanza = Stanza::from_element(root).unwrap();
        assert_eq!(stanza.kind, Kind::Iq);
        assert_eq!(stanza.sub_kind, SubKind::Get);
        assert_eq!(stanza.id.as_deref(), Some("abc123"));
        assert!(stanza.to.is_some());
    }

    #[test]
    fn message_without_type_is_normal() {
        let root = el("message", NS_JABBER_CLIENT);
        let stanza = Stanza::from_element(root).unwrap();
        assert_eq!(stanza.sub_kind, SubKind::Normal);
    }

    #[test]
    fn extracts_stanza_error() {
        let error_el = el("error", NS_JABBER_CLIENT)
            .with_attr("type", "cancel")
            .with_child(el("item-not-found", NS_STANZAS))
            .with_child(el("text", NS_STANZAS).with_text("no such user"));
        let root = el("iq", NS_JABBER_CLIENT)
            .with_attr("type", "error")
            .with_child(error_el);
        let stanza = Stanza::from_element(root).unwrap();
        let err = stanza.stanza_error().unwrap();
        assert_eq!(err.condition, StanzaErrorCondition::ItemNotFound);
        assert_eq!(err.text.as_deref(), Some("no such user"));
    }

    #[test]
    fn extracts_see_other_host() {
        let root = el("error", NS_STREAMS)
            .with_child(el("see-other-host", NS_STREAM_ERRORS).with_text("other.example.com:5222"));
        let err = StreamError::from_element(&root);
        assert_eq!(
            err.condition,
            StreamErrorCondition::SeeOtherHost("other.example.com:5222".to_string())
        );
    }

    #[test]
    fn unknown_condition_falls_back() {
        let root = el("error", NS_STREAMS).with_child(el("made-up-condition", NS_STREAM_ERRORS));
        let err = StreamError::from_element(&root);
        assert!(err.description().contains("made-up-condition"));
    }
}
