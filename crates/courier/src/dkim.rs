//! DKIM signing plugin (RFC 6376, `rsa-sha256`, relaxed/relaxed).

use crate::error::{Error, Result};
use crate::message::EmailMessage;
use crate::plugin::Plugin;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use courier_mime::Headers;
use rsa::RsaPrivateKey;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

const DEFAULT_HEADERS: [&str; 3] = ["From", "To", "Subject"];

/// Where the private key comes from.
#[derive(Clone, PartialEq, Eq)]
pub enum DkimKey {
    /// PEM text.
    Pem(String),
    /// PEM file, read each time a message is signed.
    File(PathBuf),
}

impl DkimKey {
    async fn load(&self) -> Result<String> {
        match self {
            Self::Pem(pem) => Ok(pem.clone()),
            Self::File(path) => tokio::fs::read_to_string(path).await.map_err(|e| {
                Error::Signing(format!("cannot read key {}: {e}", path.display()))
            }),
        }
    }
}

impl fmt::Debug for DkimKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pem(_) => f.write_str("Pem(****)"),
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
        }
    }
}

/// Produces a signature over canonicalized data.
pub trait DkimSigner: Send + Sync + fmt::Debug {
    /// Signs `data` with the PEM encoded private key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Signing`] if the key is unusable or signing fails.
    fn sign(&self, key_pem: &str, data: &[u8]) -> Result<Vec<u8>>;
}

/// RSASSA-PKCS1-v1_5 over SHA-256. Accepts PKCS#1 and PKCS#8 keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct RsaSha256Signer;

impl DkimSigner for RsaSha256Signer {
    fn sign(&self, key_pem: &str, data: &[u8]) -> Result<Vec<u8>> {
        let key = RsaPrivateKey::from_pkcs1_pem(key_pem)
            .or_else(|_| RsaPrivateKey::from_pkcs8_pem(key_pem))
            .map_err(|e| Error::Signing(format!("invalid RSA private key: {e}")))?;

        let signature = SigningKey::<Sha256>::new(key)
            .try_sign(data)
            .map_err(|e| Error::Signing(e.to_string()))?;
        Ok(signature.to_vec())
    }
}

/// Adds a `DKIM-Signature` header before the message is sent.
///
/// The message is stamped first so the transport serializes exactly the
/// bytes that were signed.
///
/// ```rust,ignore
/// use courier::{DkimKey, DkimSignature, Mailer};
///
/// let mailer = Mailer::builder(transport)
///     .plugin(DkimSignature::new("mail", DkimKey::File("/etc/dkim/mail.pem".into())))
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct DkimSignature {
    selector: String,
    domain: Option<String>,
    key: DkimKey,
    headers: Vec<String>,
    signer: Arc<dyn DkimSigner>,
}

impl DkimSignature {
    /// Signs with `selector` and `key`; the domain is taken from the sender.
    #[must_use]
    pub fn new(selector: impl Into<String>, key: DkimKey) -> Self {
        Self {
            selector: selector.into(),
            domain: None,
            key,
            headers: DEFAULT_HEADERS.iter().map(ToString::to_string).collect(),
            signer: Arc::new(RsaSha256Signer),
        }
    }

    /// Fixed signing domain (`d=`).
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Headers to sign, in order. Absent ones are skipped.
    #[must_use]
    pub fn with_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.headers = headers.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the signature algorithm.
    #[must_use]
    pub fn with_signer(mut self, signer: impl DkimSigner + 'static) -> Self {
        self.signer = Arc::new(signer);
        self
    }

    /// Builds the complete header value for `envelope`.
    fn signature_value(
        &self,
        domain: &str,
        key_pem: &str,
        envelope: &[u8],
        timestamp: i64,
    ) -> Result<String> {
        let (header_section, body) = split_envelope(envelope)?;

        let body_hash = STANDARD.encode(Sha256::digest(relaxed_body(body)));

        let parsed = Headers::parse(header_section)?;
        let mut signed_names = Vec::new();
        let mut data = String::new();
        for name in &self.headers {
            if let Some(value) = parsed.get_all(name).last() {
                data.push_str(&relaxed_header(name, value));
                data.push_str("\r\n");
                signed_names.push(name.as_str());
            }
        }

        let unsigned = format!(
            "v=1; a=rsa-sha256; c=relaxed/relaxed; d={domain}; s={}; t={timestamp}; h={}; bh={body_hash}; b=",
            self.selector,
            signed_names.join(":")
        );
        data.push_str(&relaxed_header("DKIM-Signature", &unsigned));

        let signature = self.signer.sign(key_pem, data.as_bytes())?;
        Ok(format!("{unsigned}{}", STANDARD.encode(signature)))
    }
}

#[async_trait]
impl Plugin for DkimSignature {
    async fn on_before_send(&self, message: &mut EmailMessage) -> Result<()> {
        message.stamp();

        let domain = match &self.domain {
            Some(domain) => domain.clone(),
            None => message
                .from_address
                .as_ref()
                .map(|from| from.domain().to_string())
                .ok_or_else(|| Error::Message("missing from address".into()))?,
        };

        let key_pem = self.key.load().await?;
        let envelope = message.to_envelope()?;
        let value = self.signature_value(
            &domain,
            &key_pem,
            &envelope,
            chrono::Utc::now().timestamp(),
        )?;

        message.headers.prepend("DKIM-Signature", value);
        debug!(%domain, selector = %self.selector, "Message signed");
        Ok(())
    }
}

fn split_envelope(envelope: &[u8]) -> Result<(&str, &[u8])> {
    let at = envelope
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or_else(|| Error::Message("envelope has no header terminator".into()))?;
    let headers = std::str::from_utf8(&envelope[..at + 2])
        .map_err(|e| Error::Message(format!("non UTF-8 header section: {e}")))?;
    Ok((headers, &envelope[at + 4..]))
}

/// `name:value` with the name lowercased and whitespace runs collapsed.
fn relaxed_header(name: &str, value: &str) -> String {
    let value = value.split_whitespace().collect::<Vec<_>>().join(" ");
    format!("{}:{value}", name.trim().to_ascii_lowercase())
}

/// Collapses whitespace runs, strips trailing whitespace on each line and
/// removes trailing empty lines. A non-empty result ends with CRLF.
fn relaxed_body(body: &[u8]) -> Vec<u8> {
    let mut lines: Vec<Vec<u8>> = body
        .split(|&b| b == b'\n')
        .map(|line| {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            let mut out = Vec::with_capacity(line.len());
            let mut in_space = false;
            for &b in line {
                if b == b' ' || b == b'\t' {
                    in_space = true;
                } else {
                    if in_space {
                        out.push(b' ');
                        in_space = false;
                    }
                    out.push(b);
                }
            }
            out
        })
        .collect();

    while lines.last().is_some_and(Vec::is_empty) {
        lines.pop();
    }

    let mut out = Vec::with_capacity(body.len());
    for line in lines {
        out.extend_from_slice(&line);
        out.extend_from_slice(b"\r\n");
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rsa::RsaPublicKey;
    use rsa::pkcs1v15::{Signature, VerifyingKey};
    use rsa::signature::Verifier;

    const PKCS1_KEY: &str = include_str!("../tests/fixtures/dkim_rsa_pkcs1.pem");
    const PKCS8_KEY: &str = include_str!("../tests/fixtures/dkim_rsa_pkcs8.pem");

    fn message() -> EmailMessage {
        EmailMessage::new()
            .from("Sender <sender@example.com>")
            .unwrap()
            .to("rcpt@example.org")
            .unwrap()
            .subject("Signed   mail")
            .text("Hello  world \r\n\r\n\r\n")
    }

    fn tag<'a>(value: &'a str, name: &str) -> &'a str {
        value
            .split(';')
            .map(str::trim)
            .find_map(|t| t.strip_prefix(name)?.strip_prefix('='))
            .unwrap()
    }

    #[test]
    fn body_canonicalization() {
        assert_eq!(relaxed_body(b"a  b \t\r\nc\r\n\r\n\r\n"), b"a b\r\nc\r\n");
        assert_eq!(relaxed_body(b"\r\n\r\n"), b"");
        assert_eq!(relaxed_body(b""), b"");
        assert_eq!(relaxed_body(b"x"), b"x\r\n");
    }

    #[test]
    fn header_canonicalization() {
        assert_eq!(relaxed_header("Subject", "  Hi \t there  "), "subject:Hi there");
    }

    #[test]
    fn both_key_formats_sign_identically() {
        let a = RsaSha256Signer.sign(PKCS1_KEY, b"data").unwrap();
        let b = RsaSha256Signer.sign(PKCS8_KEY, b"data").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn garbage_key_is_a_signing_error() {
        assert!(matches!(
            RsaSha256Signer.sign("not a key", b"data"),
            Err(Error::Signing(_))
        ));
    }

    #[tokio::test]
    async fn signature_verifies() {
        let plugin = DkimSignature::new("mail", DkimKey::Pem(PKCS1_KEY.into()));
        let mut message = message();
        plugin.on_before_send(&mut message).await.unwrap();

        assert_eq!(message.headers.iter().next().unwrap().0, "DKIM-Signature");
        let value = message.headers.get("DKIM-Signature").unwrap().to_string();
        assert_eq!(tag(&value, "d"), "example.com");
        assert_eq!(tag(&value, "s"), "mail");
        assert_eq!(tag(&value, "h"), "From:To:Subject");
        assert_eq!(tag(&value, "c"), "relaxed/relaxed");

        // Recompute the signed data from what a transport would send.
        let envelope = message.to_envelope().unwrap();
        let (header_section, body) = split_envelope(&envelope).unwrap();
        assert_eq!(
            tag(&value, "bh"),
            STANDARD.encode(Sha256::digest(relaxed_body(body)))
        );

        let parsed = Headers::parse(header_section).unwrap();
        let mut data = String::new();
        for name in ["From", "To", "Subject"] {
            data.push_str(&relaxed_header(name, parsed.get(name).unwrap()));
            data.push_str("\r\n");
        }
        let b = tag(&value, "b");
        let unsigned = value.strip_suffix(b).unwrap();
        data.push_str(&relaxed_header("DKIM-Signature", unsigned));

        let private = RsaPrivateKey::from_pkcs1_pem(PKCS1_KEY).unwrap();
        let verifying = VerifyingKey::<Sha256>::new(RsaPublicKey::from(&private));
        let signature = Signature::try_from(STANDARD.decode(b).unwrap().as_slice()).unwrap();
        verifying.verify(data.as_bytes(), &signature).unwrap();
    }

    #[tokio::test]
    async fn absent_headers_are_not_listed() {
        let plugin = DkimSignature::new("s1", DkimKey::Pem(PKCS8_KEY.into()))
            .with_domain("signer.example")
            .with_headers(["From", "Cc", "Subject"]);
        let mut message = message();
        plugin.on_before_send(&mut message).await.unwrap();

        let value = message.headers.get("DKIM-Signature").unwrap();
        assert_eq!(tag(value, "d"), "signer.example");
        assert_eq!(tag(value, "h"), "From:Subject");
    }

    #[tokio::test]
    async fn missing_sender_without_domain_fails() {
        let plugin = DkimSignature::new("s1", DkimKey::Pem(PKCS1_KEY.into()));
        let mut message = EmailMessage::new().to("rcpt@example.org").unwrap();
        assert!(matches!(
            plugin.on_before_send(&mut message).await,
            Err(Error::Message(_))
        ));
    }

    #[tokio::test]
    async fn key_file_is_read_when_signing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.pem");
        let plugin = DkimSignature::new("s1", DkimKey::File(path.clone()));

        let mut message = message();
        assert!(matches!(
            plugin.on_before_send(&mut message).await,
            Err(Error::Signing(_))
        ));

        std::fs::write(&path, PKCS1_KEY).unwrap();
        plugin.on_before_send(&mut message).await.unwrap();
        assert!(message.headers.contains("DKIM-Signature"));
    }

    #[test]
    fn pem_key_is_not_printed() {
        let debug = format!("{:?}", DkimKey::Pem(PKCS1_KEY.into()));
        assert_eq!(debug, "Pem(****)");
    }
}
