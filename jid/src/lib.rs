//! A crate which provides a [`Jid`] struct for Jabber IDs (JIDs), the
//! addresses used throughout XMPP ([RFC 6120 §3](https://tools.ietf.org/html/rfc6120#section-3)).
//!
//! A JID is of the form `[node@]domain[/resource]`. `domain` is mandatory,
//! `node` and `resource` are optional. Comparison and hashing are
//! case-insensitive for `node` and `domain`, but case-sensitive for
//! `resource`, matching the semantics the rest of this library relies on for
//! correlating stanzas with their originator.

#![deny(unsafe_code, missing_docs)]

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Characters which may never appear in the node (localpart) of a JID, per
/// [RFC 6122 Appendix A](https://tools.ietf.org/html/rfc6122#appendix-A).
const FORBIDDEN_NODE_CHARS: &[char] = &['"', '&', '\'', '/', ':', '<', '>', '@'];

/// Errors which may occur while parsing or constructing a [`Jid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The domain part was empty. Every JID must carry a non-empty domain.
    NoDomain,
    /// A `@` separator was present but the node before it was empty.
    EmptyNode,
    /// A `/` separator was present but the resource after it was empty.
    EmptyResource,
    /// The node part contained a character forbidden by
    /// [RFC 6122 Appendix A](https://tools.ietf.org/html/rfc6122#appendix-A).
    InvalidNodeChar,
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::NoDomain => write!(fmt, "JID must have a domain"),
            Error::EmptyNode => write!(fmt, "JID node is empty despite the presence of '@'"),
            Error::EmptyResource => {
                write!(fmt, "JID resource is empty despite the presence of '/'")
            }
            Error::InvalidNodeChar => write!(fmt, "JID node contains a forbidden character"),
        }
    }
}

impl std::error::Error for Error {}

/// A Jabber ID, `[node@]domain[/resource]`.
///
/// A JID with no resource is called a "bare" JID; one with a resource is
/// called a "full" JID. Two JIDs are equal if their `node` and `domain`
/// match case-insensitively and their `resource` (if any) matches
/// case-sensitively.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
pub struct Jid {
    node: Option<String>,
    domain: String,
    resource: Option<String>,
}

impl Jid {
    /// Build a [`Jid`] from its constituent parts, validating the node.
    pub fn from_parts(
        node: Option<&str>,
        domain: &str,
        resource: Option<&str>,
    ) -> Result<Jid, Error> {
        if domain.is_empty() {
            return Err(Error::NoDomain);
        }
        let node = match node {
            Some(n) => {
                if n.is_empty() {
                    return Err(Error::EmptyNode);
                }
                if n.contains(FORBIDDEN_NODE_CHARS) {
                    return Err(Error::InvalidNodeChar);
                }
                Some(n.to_string())
            }
            None => None,
        };
        let resource = match resource {
            Some(r) => {
                if r.is_empty() {
                    return Err(Error::EmptyResource);
                }
                Some(r.to_string())
            }
            None => None,
        };
        Ok(Jid {
            node,
            domain: domain.to_string(),
            resource,
        })
    }

    /// Parse a JID from its string form `[node@]domain[/resource]`.
    pub fn parse(s: &str) -> Result<Jid, Error> {
        // The resource separator is the *first* '/', everything after it
        // (including further slashes) belongs to the resource.
        let (rest, resource) = match s.find('/') {
            Some(idx) => (&s[..idx], Some(&s[idx + 1..])),
            None => (s, None),
        };
        // The node separator is the *last* '@' before the resource
        // separator, since node-local parts never contain '@' themselves
        // but we still want to fail loudly rather than silently truncate.
        let (node, domain) = match rest.find('@') {
            Some(idx) => (Some(&rest[..idx]), &rest[idx + 1..]),
            None => (None, rest),
        };
        Jid::from_parts(node, domain, resource)
    }

    /// The node (localpart), if any.
    pub fn node(&self) -> Option<&str> {
        self.node.as_deref()
    }

    /// The domain. Never empty.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The resource, if any.
    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    /// True if this JID has no resource.
    pub fn is_bare(&self) -> bool {
        self.resource.is_none()
    }

    /// True if this JID has a resource.
    pub fn is_full(&self) -> bool {
        self.resource.is_some()
    }

    /// Return the bare form of this JID, dropping any resource.
    pub fn to_bare(&self) -> Jid {
        Jid {
            node: self.node.clone(),
            domain: self.domain.clone(),
            resource: None,
        }
    }

    /// Return a new JID with `resource` attached (or replaced).
    pub fn with_resource(&self, resource: &str) -> Result<Jid, Error> {
        Jid::from_parts(self.node.as_deref(), &self.domain, Some(resource))
    }

    /// True if `full` is a full JID whose bare part equals `self` (which must
    /// itself be bare). Used by the porter and handler filters to match a
    /// bare JID against any of its resources (see the superset rules used
    /// for pending-IQ and `from`-filter matching).
    pub fn extended_by(&self, full: &Jid) -> bool {
        self.is_bare() && full.is_full() && self.bare_eq(full)
    }

    fn bare_eq(&self, other: &Jid) -> bool {
        self.node.as_ref().map(|n| n.to_lowercase()) == other.node.as_ref().map(|n| n.to_lowercase())
            && self.domain.to_lowercase() == other.domain.to_lowercase()
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        if let Some(node) = &self.node {
            write!(fmt, "{}@", node)?;
        }
        write!(fmt, "{}", self.domain)?;
        if let Some(resource) = &self.resource {
            write!(fmt, "/{}", resource)?;
        }
        Ok(())
    }
}

impl FromStr for Jid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Jid, Error> {
        Jid::parse(s)
    }
}

impl TryFrom<String> for Jid {
    type Error = Error;

    fn try_from(s: String) -> Result<Jid, Error> {
        Jid::parse(&s)
    }
}

impl From<Jid> for String {
    fn from(jid: Jid) -> String {
        jid.to_string()
    }
}

impl PartialEq for Jid {
    fn eq(&self, other: &Self) -> bool {
        self.bare_eq(other) && self.resource == other.resource
    }
}

impl Eq for Jid {}

impl Hash for Jid {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.node.as_ref().map(|n| n.to_lowercase()).hash(state);
        self.domain.to_lowercase().hash(state);
        self.resource.hash(state);
    }
}

impl PartialOrd for Jid {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Jid {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_string().to_lowercase().cmp(&other.to_string().to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_jid() {
        let jid = Jid::parse("juliet@example.com/Balcony").unwrap();
        assert_eq!(jid.node(), Some("juliet"));
        assert_eq!(jid.domain(), "example.com");
        assert_eq!(jid.resource(), Some("Balcony"));
        assert!(jid.is_full());
    }

    #[test]
    fn parses_bare_jid() {
        let jid = Jid::parse("juliet@example.com").unwrap();
        assert_eq!(jid.resource(), None);
        assert!(jid.is_bare());
    }

    #[test]
    fn parses_domain_only() {
        let jid = Jid::parse("example.com").unwrap();
        assert_eq!(jid.node(), None);
        assert_eq!(jid.domain(), "example.com");
        assert_eq!(jid.resource(), None);
    }

    #[test]
    fn rejects_node_only() {
        assert_eq!(Jid::parse("x@"), Err(Error::NoDomain));
    }

    #[test]
    fn rejects_resource_only() {
        assert_eq!(Jid::parse("/x"), Err(Error::NoDomain));
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(Jid::parse(""), Err(Error::NoDomain));
    }

    #[test]
    fn rejects_forbidden_node_char() {
        assert_eq!(
            Jid::from_parts(Some("ju:liet"), "example.com", None),
            Err(Error::InvalidNodeChar)
        );
    }

    #[test]
    fn round_trip() {
        let s = "Romeo@Example.COM/Orchard";
        let jid = Jid::parse(s).unwrap();
        assert_eq!(jid.node(), Some("Romeo"));
        assert_eq!(jid.domain(), "Example.COM");
        assert_eq!(jid.resource(), Some("Orchard"));
        assert_eq!(jid.to_string(), s);
    }

    #[test]
    fn equality_is_case_insensitive_except_resource() {
        let a = Jid::parse("Juliet@Example.COM/Balcony").unwrap();
        let b = Jid::parse("juliet@example.com/Balcony").unwrap();
        assert_eq!(a, b);

        let c = Jid::parse("juliet@example.com/balcony").unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn bare_extended_by_full() {
        let bare = Jid::parse("room@conference.example.com").unwrap();
        let full = Jid::parse("room@conference.example.com/occupant").unwrap();
        assert!(bare.extended_by(&full));
        assert!(!full.extended_by(&bare));
    }
}
