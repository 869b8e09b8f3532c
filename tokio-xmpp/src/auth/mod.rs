//! SASL mechanism registry and driver.
//!
//! Grounded on `wocky-sasl-auth.c`'s mechanism list and negotiation order:
//! read a `<challenge/>`, hand it to the mechanism, send back a
//! `<response/>`, repeat until `<success/>`/`<failure/>`.

pub mod mechanisms;

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::AuthError;
use crate::xml::Element;
use crate::xmlstream::{FramedXmlReader, FramedXmlWriter};

const NS_SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";

/// Credentials and ambient context handed to a [`MechanismFactory`] when
/// instantiating a [`Mechanism`]. `extra` carries mechanism-specific
/// context the generic registry doesn't otherwise know about (e.g. the
/// stream id a digest mechanism needs).
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub authzid: Option<String>,
    pub username: String,
    pub password: String,
    pub extra: HashMap<String, String>,
}

/// One step of a SASL exchange. Implementations hold whatever
/// per-exchange state they need (nonces, computed digests) between calls.
pub trait Mechanism: Send {
    /// The bytes to send as the `<auth/>` element's initial response, if
    /// any (some mechanisms, like DIGEST-MD5, send none and wait for the
    /// server's first challenge instead).
    fn initial_response(&mut self) -> Option<Vec<u8>>;

    /// Compute the response to a server challenge.
    fn response_to_challenge(&mut self, challenge: &[u8]) -> Result<Vec<u8>, AuthError>;

    /// Verify any additional data carried on `<success/>` (e.g.
    /// DIGEST-MD5's `rspauth`). Mechanisms with nothing to check succeed
    /// unconditionally.
    fn success_final_check(&mut self, additional_data: Option<&[u8]>) -> Result<(), AuthError>;
}

/// Describes a mechanism the registry can offer, without yet committing to
/// a particular exchange's state.
pub trait MechanismFactory: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this mechanism transmits the password (or an equivalent) in
    /// a form recoverable by a passive eavesdropper — `PLAIN`-like
    /// mechanisms must answer `true`; challenge/response mechanisms like
    /// `DIGEST-MD5` answer `false`.
    fn exposes_plaintext(&self) -> bool;

    fn create(&self, credentials: &Credentials) -> Box<dyn Mechanism>;
}

/// The set of mechanisms this library can drive, plus the selection
/// algorithm of §4.3: prefer the strongest mechanism both sides support,
/// gating plaintext-exposing mechanisms on channel security.
pub struct AuthRegistry {
    factories: Vec<Box<dyn MechanismFactory>>,
}

impl Default for AuthRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl AuthRegistry {
    /// An empty registry, for callers that want to hand-pick mechanisms.
    pub fn empty() -> Self {
        AuthRegistry {
            factories: Vec::new(),
        }
    }

    /// DIGEST-MD5, X-WOCKY-JABBER-DIGEST, PLAIN, X-WOCKY-JABBER-PASSWORD,
    /// X-TEST, registered strongest-first so [`AuthRegistry::select`] can
    /// stop at the first supported match.
    pub fn with_defaults() -> Self {
        let mut reg = Self::empty();
        reg.register(Box::new(mechanisms::DigestMd5Factory));
        reg.register(Box::new(mechanisms::XWockyJabberDigestFactory));
        reg.register(Box::new(mechanisms::PlainFactory));
        reg.register(Box::new(mechanisms::XWockyJabberPasswordFactory));
        reg.register(Box::new(mechanisms::XTestFactory));
        reg
    }

    pub fn register(&mut self, factory: Box<dyn MechanismFactory>) {
        self.factories.push(factory);
    }

    /// Pick the strongest mechanism offered by the peer that this registry
    /// also supports, subject to the plaintext-exposure gate:
    /// plaintext-exposing mechanisms are only eligible when
    /// `channel_is_encrypted && encrypted_plain_auth_ok`, or unconditionally
    /// when `plaintext_auth_allowed` (the caller's explicit insecure
    /// override).
    pub fn select(
        &self,
        offered: &[String],
        channel_is_encrypted: bool,
        encrypted_plain_auth_ok: bool,
        plaintext_auth_allowed: bool,
    ) -> Result<&dyn MechanismFactory, AuthError> {
        let plaintext_eligible =
            plaintext_auth_allowed || (channel_is_encrypted && encrypted_plain_auth_ok);
        for factory in &self.factories {
            if factory.exposes_plaintext() && !plaintext_eligible {
                continue;
            }
            if offered.iter().any(|name| name == factory.name()) {
                return Ok(factory.as_ref());
            }
        }
        Err(AuthError::NotSupported)
    }
}

fn b64_decode(text: &str) -> Result<Vec<u8>, AuthError> {
    if text == "=" {
        return Ok(Vec::new());
    }
    BASE64.decode(text).map_err(|_| AuthError::InvalidReply)
}

fn b64_encode(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        "=".to_string()
    } else {
        BASE64.encode(bytes)
    }
}

/// Drive a full SASL exchange over a framed connection's halves: send
/// `<auth/>`, pump `<challenge/>`/`<response/>` pairs, and interpret the
/// terminal `<success/>` or `<failure/>`.
///
/// `mechanism_name` must be one the peer actually offered; callers get that
/// from [`AuthRegistry::select`].
pub async fn authenticate<R, W>(
    reader: &FramedXmlReader<R>,
    writer: &FramedXmlWriter<W>,
    mechanism_name: &str,
    mechanism: &mut dyn Mechanism,
) -> Result<(), AuthError>
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut auth_el = Element::new("auth", NS_SASL).with_attr("mechanism", mechanism_name);
    if let Some(initial) = mechanism.initial_response() {
        auth_el = auth_el.with_text(b64_encode(&initial));
    }
    writer
        .send_stanza(&auth_el)
        .await
        .map_err(|_| AuthError::Connreset)?;

    loop {
        let stanza = reader
            .recv_stanza()
            .await
            .map_err(|_| AuthError::Connreset)?
            .ok_or(AuthError::Connreset)?;
        let root = &stanza.root;
        if root.ns != NS_SASL {
            return Err(AuthError::InvalidReply);
        }
        match root.name.as_str() {
            "challenge" => {
                log::trace!("Received SASL challenge ({} mechanism)", mechanism_name);
                let challenge = b64_decode(root.text.as_deref().unwrap_or(""))?;
                let response = mechanism.response_to_challenge(&challenge)?;
                let response_el =
                    Element::new("response", NS_SASL).with_text(b64_encode(&response));
                writer
                    .send_stanza(&response_el)
                    .await
                    .map_err(|_| AuthError::Connreset)?;
            }
            "success" => {
                let additional = root
                    .text
                    .as_deref()
                    .map(b64_decode)
                    .transpose()?;
                return mechanism.success_final_check(additional.as_deref());
            }
            "failure" => {
                let err = classify_failure(root);
                log::warn!("SASL failure for {mechanism_name}: {err}");
                return Err(err);
            }
            _ => return Err(AuthError::InvalidReply),
        }
    }
}

fn classify_failure(el: &Element) -> AuthError {
    let condition = el
        .children
        .iter()
        .find(|c| c.ns == NS_SASL)
        .map(|c| c.name.as_str());
    match condition {
        Some("not-authorized") | Some("account-disabled") | Some("credentials-expired") => {
            AuthError::NotAuthorized
        }
        Some("invalid-mechanism") | Some("mechanism-too-weak") => AuthError::NotSupported,
        _ => AuthError::Failure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_prefers_strongest_over_clear_channel() {
        let reg = AuthRegistry::with_defaults();
        let offered = vec!["PLAIN".to_string(), "DIGEST-MD5".to_string()];
        let chosen = reg.select(&offered, false, false, false).unwrap();
        assert_eq!(chosen.name(), "DIGEST-MD5");
    }

    #[test]
    fn select_rejects_plain_over_clear_channel_by_default() {
        let reg = AuthRegistry::with_defaults();
        let offered = vec!["PLAIN".to_string()];
        let err = reg.select(&offered, false, false, false).unwrap_err();
        assert_eq!(err, AuthError::NotSupported);
    }

    #[test]
    fn select_allows_plain_when_explicitly_permitted() {
        let reg = AuthRegistry::with_defaults();
        let offered = vec!["PLAIN".to_string()];
        let chosen = reg.select(&offered, false, false, true).unwrap();
        assert_eq!(chosen.name(), "PLAIN");
    }

    #[test]
    fn select_allows_plain_over_encrypted_channel() {
        let reg = AuthRegistry::with_defaults();
        let offered = vec!["PLAIN".to_string()];
        let chosen = reg.select(&offered, true, true, false).unwrap();
        assert_eq!(chosen.name(), "PLAIN");
    }
}
