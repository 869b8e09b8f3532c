//! TLS layer: STARTTLS and legacy SSL-on-connect entry points, pluggable
//! verification levels, and a minimal peer certificate inspection helper.
//!
//! Grounded on `wocky-tls-handler.c`/`wocky-tls.c` (verification levels,
//! peer cert accessors), built on a `rustls::ClientConfig` with a
//! proceed/failure pump over the framed connection.

use std::sync::Arc;

use rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector;

use crate::error::CertVerificationError;

/// How strictly peer certificates are checked. Grounded on `wocky-tls.c`'s
/// three-way verification strictness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationLevel {
    /// Full chain + hostname validation; any ambiguity is a hard failure.
    Strict,
    /// Standard PKIX chain validation with hostname matching (the
    /// default).
    Normal,
    /// Run the same chain validation as `Normal`, but tolerate an unknown
    /// signer or a structurally invalid chain (logging a warning) and skip
    /// the hostname identity check — for self-signed test deployments.
    /// Revocation, expiry, and other internal-error outcomes still fail
    /// the handshake. Never use this in production.
    Lenient,
}

/// Minimal facts pulled out of a peer's leaf certificate, enough for a
/// [`TlsVerifier`] to make a decision without depending on `tokio-rustls`
/// internals directly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerCertificateInfo {
    pub subject_cn: Option<String>,
    pub san_dns_names: Vec<String>,
    /// The certificate's `notAfter` validity bound, as the raw ASN.1
    /// `UTCTime`/`GeneralizedTime` string (e.g. `"251231235959Z"`),
    /// letting a caller observe upcoming expiry independent of whether
    /// rustls itself rejected the handshake.
    pub not_after: Option<String>,
}

/// Pluggable identity check, run in addition to the chain validation rustls
/// itself performs. Lets a caller supply extra acceptable identities (e.g.
/// a configured `xmpp_server` override distinct from the JID domain).
pub trait TlsVerifier: Send + Sync {
    fn verify_identity(
        &self,
        expected: &str,
        cert: &PeerCertificateInfo,
    ) -> Result<(), CertVerificationError>;
}

/// Default identity check: exact match or single-label wildcard match
/// against SAN dNSNames, falling back to the subject CN, against both the
/// expected hostname and any extra identities supplied.
pub struct DefaultTlsVerifier {
    pub extra_identities: Vec<String>,
}

impl TlsVerifier for DefaultTlsVerifier {
    fn verify_identity(
        &self,
        expected: &str,
        cert: &PeerCertificateInfo,
    ) -> Result<(), CertVerificationError> {
        let mut candidates = vec![expected.to_string()];
        candidates.extend(self.extra_identities.iter().cloned());
        let names: Vec<&str> = cert
            .san_dns_names
            .iter()
            .map(String::as_str)
            .chain(cert.subject_cn.as_deref())
            .collect();
        for candidate in &candidates {
            if names.iter().any(|n| hostname_matches(n, candidate)) {
                return Ok(());
            }
        }
        Err(CertVerificationError::NameMismatch)
    }
}

/// Case-insensitive hostname match with a single leading `*` wildcard
/// label allowed in `pattern` (RFC 6125 §6.4.3, restricted to the common
/// "`*.example.com`" form — no partial-label or multi-wildcard matching).
pub fn hostname_matches(pattern: &str, host: &str) -> bool {
    let pattern = pattern.trim_end_matches('.').to_ascii_lowercase();
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    if let Some(rest) = pattern.strip_prefix("*.") {
        let mut host_labels = host.splitn(2, '.');
        let _first_label = host_labels.next();
        match host_labels.next() {
            Some(host_rest) => host_rest == rest,
            None => false,
        }
    } else {
        pattern == host
    }
}

/// Build the root certificate store: native OS trust anchors, falling
/// back to the bundled Mozilla set.
pub fn default_root_store() -> RootCertStore {
    let mut store = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs().certs;
    let (added, _ignored) = store.add_parsable_certificates(native);
    if added == 0 {
        store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }
    store
}

#[derive(Debug)]
struct XmppCertVerifier {
    level: VerificationLevel,
    inner: Arc<rustls::client::WebPkiServerVerifier>,
    extra: Box<dyn TlsVerifier>,
    expected_name: String,
    last_seen: std::sync::Mutex<Option<PeerCertificateInfo>>,
}

impl ServerCertVerifier for XmppCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let info = extract_peer_cert_info(end_entity);
        *self.last_seen.lock().unwrap() = Some(info.clone());

        if let Err(e) =
            self.inner
                .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            if self.level == VerificationLevel::Lenient {
                let classified = classify_rustls_error(&e);
                if matches!(
                    classified,
                    CertVerificationError::SignerUnknown | CertVerificationError::Invalid
                ) {
                    log::warn!(
                        "accepting TLS certificate despite {classified} (lenient mode): {:?}",
                        info
                    );
                    return Ok(ServerCertVerified::assertion());
                }
            }
            return Err(e);
        }
        if self.level == VerificationLevel::Lenient {
            return Ok(ServerCertVerified::assertion());
        }

        self.extra
            .verify_identity(&self.expected_name, &info)
            .map_err(|_| {
                rustls::Error::General(format!(
                    "peer certificate identity does not match {}",
                    self.expected_name
                ))
            })?;

        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Best-effort extraction of the subject CN and SAN dNSNames from a DER
/// leaf certificate. This is *not* a general X.509 parser: it walks the
/// encoded bytes looking for the two OIDs it cares about
/// (`id-at-commonName`, `id-ce-subjectAltName`) and the ASN.1 string/context
/// tags that follow them, which is sufficient for the identity check above.
pub fn extract_peer_cert_info(der: &CertificateDer<'_>) -> PeerCertificateInfo {
    const OID_CN: [u8; 3] = [0x55, 0x04, 0x03];
    const OID_SAN: [u8; 3] = [0x55, 0x1d, 0x11];

    let bytes = der.as_ref();
    let subject_cn = find_oid(bytes, &OID_CN).and_then(|idx| read_following_string(bytes, idx));
    let mut san_dns_names = Vec::new();
    if let Some(idx) = find_oid(bytes, &OID_SAN) {
        san_dns_names = read_san_dns_names(bytes, idx);
    }
    // Validity is a SEQUENCE of two Time values (notBefore, notAfter); the
    // second UTCTime/GeneralizedTime found in the certificate is notAfter.
    let not_after = read_all_time_strings(bytes).into_iter().nth(1);
    PeerCertificateInfo {
        subject_cn,
        san_dns_names,
        not_after,
    }
}

fn read_all_time_strings(bytes: &[u8]) -> Vec<String> {
    let mut times = Vec::new();
    let mut i = 0;
    while i + 1 < bytes.len() {
        let tag = bytes[i];
        if tag == 0x17 || tag == 0x18 {
            let len = bytes[i + 1] as usize;
            if i + 2 + len <= bytes.len() {
                if let Ok(s) = std::str::from_utf8(&bytes[i + 2..i + 2 + len]) {
                    if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit() || b == b'Z' || b == b'+' || b == b'-') {
                        times.push(s.to_string());
                        i += 2 + len;
                        continue;
                    }
                }
            }
        }
        i += 1;
    }
    times
}

fn find_oid(bytes: &[u8], oid: &[u8]) -> Option<usize> {
    bytes.windows(oid.len()).position(|w| w == oid)
}

fn read_following_string(bytes: &[u8], oid_idx: usize) -> Option<String> {
    let mut i = oid_idx + 3;
    // Skip up to a handful of bytes looking for a string tag
    // (UTF8String 0x0c, PrintableString 0x13, IA5String 0x16).
    while i + 2 < bytes.len() && i < oid_idx + 8 {
        let tag = bytes[i];
        if tag == 0x0c || tag == 0x13 || tag == 0x16 {
            let len = bytes[i + 1] as usize;
            if i + 2 + len <= bytes.len() {
                return std::str::from_utf8(&bytes[i + 2..i + 2 + len])
                    .ok()
                    .map(str::to_string);
            }
        }
        i += 1;
    }
    None
}

fn read_san_dns_names(bytes: &[u8], oid_idx: usize) -> Vec<String> {
    let mut names = Vec::new();
    // The SAN extension value is an OCTET STRING wrapping a SEQUENCE of
    // GeneralName; dNSName entries use context tag 0x82.
    let mut i = oid_idx + 3;
    let end = bytes.len();
    while i + 2 < end {
        if bytes[i] == 0x82 {
            let len = bytes[i + 1] as usize;
            if i + 2 + len <= end {
                if let Ok(s) = std::str::from_utf8(&bytes[i + 2..i + 2 + len]) {
                    if s.chars().all(|c| c.is_ascii_graphic() || c == '.') {
                        names.push(s.to_string());
                    }
                }
            }
            i += 2 + len;
        } else {
            i += 1;
        }
        // Bail out once we are clearly past the extension (heuristic: stop
        // after finding a name if the next bytes don't look like another
        // GeneralName).
        if !names.is_empty() && (i >= end || bytes.get(i) != Some(&0x82)) {
            break;
        }
    }
    names
}

/// Build a [`TlsConnector`] for the given verification level and identity
/// checker.
pub fn connector(
    level: VerificationLevel,
    expected_name: &str,
    extra: Box<dyn TlsVerifier>,
) -> TlsConnector {
    let roots = default_root_store();
    let webpki_verifier = rustls::client::WebPkiServerVerifier::builder(Arc::new(roots))
        .build()
        .expect("root store is non-empty");
    let verifier = XmppCertVerifier {
        level,
        inner: webpki_verifier,
        extra,
        expected_name: expected_name.to_string(),
        last_seen: std::sync::Mutex::new(None),
    };
    let mut config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    config.alpn_protocols = Vec::new();
    TlsConnector::from(Arc::new(config))
}

/// Perform the TLS handshake over an already-connected byte stream,
/// whether reached via STARTTLS (caller already negotiated `<starttls/>`)
/// or legacy SSL-on-connect (caller dials straight into it).
pub async fn handshake<Io: AsyncRead + AsyncWrite + Unpin + Send + 'static>(
    connector: &TlsConnector,
    domain: &str,
    io: Io,
) -> Result<tokio_rustls::client::TlsStream<Io>, CertVerificationError> {
    let server_name = ServerName::try_from(domain.to_string())
        .map_err(|_| CertVerificationError::Invalid)?;
    connector
        .connect(server_name, io)
        .await
        .map_err(|e| classify_io_error(&e))
}

fn classify_io_error(e: &std::io::Error) -> CertVerificationError {
    if let Some(inner) = e.get_ref() {
        if let Some(rustls_err) = inner.downcast_ref::<rustls::Error>() {
            return classify_rustls_error(rustls_err);
        }
    }
    CertVerificationError::UnknownError
}

fn classify_rustls_error(e: &rustls::Error) -> CertVerificationError {
    use rustls::CertificateError as CE;
    match e {
        rustls::Error::InvalidCertificate(CE::Expired) => CertVerificationError::Expired,
        rustls::Error::InvalidCertificate(CE::NotValidYet) => CertVerificationError::NotActive,
        rustls::Error::InvalidCertificate(CE::Revoked) => CertVerificationError::Revoked,
        rustls::Error::InvalidCertificate(CE::UnknownIssuer) => {
            CertVerificationError::SignerUnknown
        }
        rustls::Error::InvalidCertificate(CE::NotValidForName) => {
            CertVerificationError::NameMismatch
        }
        rustls::Error::InvalidCertificate(CE::BadSignature)
        | rustls::Error::InvalidCertificate(CE::BadEncoding) => CertVerificationError::Invalid,
        rustls::Error::InvalidCertificate(_) => CertVerificationError::Invalid,
        rustls::Error::General(msg) if msg.contains("does not match") => {
            CertVerificationError::NameMismatch
        }
        _ => CertVerificationError::UnknownError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_matches_single_label() {
        assert!(hostname_matches("*.example.com", "chat.example.com"));
        assert!(!hostname_matches("*.example.com", "a.chat.example.com"));
        assert!(!hostname_matches("*.example.com", "example.com"));
    }

    #[test]
    fn exact_match_is_case_insensitive() {
        assert!(hostname_matches("Example.COM", "example.com"));
    }

    #[test]
    fn default_verifier_checks_extra_identities() {
        let verifier = DefaultTlsVerifier {
            extra_identities: vec!["override.example.net".to_string()],
        };
        let cert = PeerCertificateInfo {
            subject_cn: None,
            san_dns_names: vec!["override.example.net".to_string()],
            not_after: None,
        };
        assert!(verifier.verify_identity("example.com", &cert).is_ok());
    }

    #[test]
    fn default_verifier_rejects_unrelated_name() {
        let verifier = DefaultTlsVerifier {
            extra_identities: vec![],
        };
        let cert = PeerCertificateInfo {
            subject_cn: Some("other.example.org".to_string()),
            san_dns_names: vec![],
            not_after: None,
        };
        assert_eq!(
            verifier.verify_identity("example.com", &cert).unwrap_err(),
            CertVerificationError::NameMismatch
        );
    }
}
