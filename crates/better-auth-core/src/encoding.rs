//! Encoding capability interfaces, plus the concrete, hash/crypto-agnostic
//! encoders the engine ships with by default.
//!
//! Unlike the crypto capabilities in [`crate::capabilities`], these encoders
//! don't embody a choice of cryptographic primitive (aside from depending on
//! a [`Hasher`](crate::capabilities::Hasher) through a generic parameter), so
//! concrete, production-usable implementations live here rather than behind
//! `test-utils`.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::time::SystemTime;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::capabilities::Hasher;
use crate::error::{Error, Result};

/// Formats and parses timestamps, and reports the current time.
///
/// Implementations must round-trip losslessly: `parse(format(t)) == t` for
/// any `t` obtainable from `now()`.
pub trait Timestamper: Send + Sync {
    /// The current time, per this timestamper's clock.
    fn now(&self) -> SystemTime;

    /// Render `when` in this timestamper's canonical string form.
    fn format(&self, when: SystemTime) -> String;

    /// Parse a string previously produced by [`Timestamper::format`].
    fn parse(&self, when: &str) -> Result<SystemTime>;
}

/// Encodes/decodes the compact access-token wire format (spec §4.2, §6):
/// a compressed, base64-url-safe-without-padding encoding of a JSON blob,
/// plus the ability to report how many leading bytes of a token string are
/// the signature prefix.
pub trait TokenEncoder: Send + Sync {
    /// Compress and encode `json` (a serialized JSON document) to a compact
    /// string.
    fn encode(&self, json: &str) -> Result<String>;

    /// Reverse of [`TokenEncoder::encode`].
    fn decode(&self, token: &str) -> Result<String>;

    /// How many leading bytes of `token` are the signature prefix, read from
    /// `token`'s own leading scheme-tag bytes (spec §4.2, §6). Self-describing
    /// per token, not a fixed property of whichever [`Verifier`](crate::capabilities::Verifier)
    /// a caller happens to have wired in — a deployment that verifies tokens
    /// signed under more than one scheme (e.g. mid key-migration) still
    /// decodes each one correctly.
    fn signature_length(&self, token: &str) -> Result<usize>;
}

/// Checks that an identity string is the expected hash-derived binding of
/// its keys (spec §3: `Identity = H(publicKey || rotationHash ||
/// recoveryHash)`). The core never parses identity strings beyond verbatim
/// comparison and this check (spec §1).
pub trait IdentityVerifier: Send + Sync {
    /// Verify that `identity == H(public_key || rotation_hash ||
    /// recovery_hash?)` under this verifier's hasher.
    fn verify(
        &self,
        identity: &str,
        public_key: &str,
        rotation_hash: &str,
        recovery_hash: Option<&str>,
    ) -> Result<()>;
}

/// RFC 3339 (with nanosecond precision) timestamp encoding.
#[derive(Debug, Default, Clone, Copy)]
pub struct Rfc3339NanoTimestamper;

impl Timestamper for Rfc3339NanoTimestamper {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn format(&self, when: SystemTime) -> String {
        let odt = time::OffsetDateTime::from(when);
        odt.format(&time::format_description::well_known::Rfc3339)
            .expect("system time is always representable as RFC 3339")
    }

    fn parse(&self, when: &str) -> Result<SystemTime> {
        let odt = time::OffsetDateTime::parse(
            when,
            &time::format_description::well_known::Rfc3339,
        )
        .map_err(|_| Error::InvalidMessage)?;
        Ok(SystemTime::from(odt))
    }
}

/// The default token codec: gzip compression followed by unpadded
/// URL-safe base64. Signature prefixes are split off by a two-character
/// scheme tag at the front of the token string; a deployment registers the
/// tag(s) its [`Signer`](crate::capabilities::Signer) produces, each mapped
/// to the total length (tag included) of a signature string under that
/// scheme.
#[derive(Debug, Clone, Default)]
pub struct CompactTokenEncoder {
    scheme_lengths: HashMap<String, usize>,
}

impl CompactTokenEncoder {
    /// Build an encoder recognizing the given scheme tags.
    pub fn new(scheme_lengths: impl IntoIterator<Item = (String, usize)>) -> Self {
        Self {
            scheme_lengths: scheme_lengths.into_iter().collect(),
        }
    }
}

impl TokenEncoder for CompactTokenEncoder {
    fn encode(&self, json: &str) -> Result<String> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
        encoder
            .write_all(json.as_bytes())
            .map_err(|_| Error::InvalidMessage)?;
        let compressed = encoder.finish().map_err(|_| Error::InvalidMessage)?;
        Ok(URL_SAFE_NO_PAD.encode(compressed))
    }

    fn decode(&self, token: &str) -> Result<String> {
        let compressed = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| Error::InvalidMessage)?;
        let mut decoder = flate2::read::GzDecoder::new(compressed.as_slice());
        let mut out = String::new();
        decoder
            .read_to_string(&mut out)
            .map_err(|_| Error::InvalidMessage)?;
        Ok(out)
    }

    fn signature_length(&self, token: &str) -> Result<usize> {
        let tag = token.get(0..2).ok_or(Error::TokenInvalid)?;
        self.scheme_lengths
            .get(tag)
            .copied()
            .ok_or(Error::TokenInvalid)
    }
}

/// Verifies the self-certifying identity binding
/// `identity == H(publicKey || rotationHash || recoveryHash?)`, generic
/// over any [`Hasher`] capability.
pub struct HashBindingIdentityVerifier<H: Hasher> {
    hasher: H,
}

impl<H: Hasher> HashBindingIdentityVerifier<H> {
    pub fn new(hasher: H) -> Self {
        Self { hasher }
    }
}

impl<H: Hasher> IdentityVerifier for HashBindingIdentityVerifier<H> {
    fn verify(
        &self,
        identity: &str,
        public_key: &str,
        rotation_hash: &str,
        recovery_hash: Option<&str>,
    ) -> Result<()> {
        let mut message = String::with_capacity(
            public_key.len() + rotation_hash.len()
                + recovery_hash.map_or(0, str::len),
        );
        message.push_str(public_key);
        message.push_str(rotation_hash);
        if let Some(recovery_hash) = recovery_hash {
            message.push_str(recovery_hash);
        }

        let expected = self.hasher.sum(message.as_bytes());
        if self.hasher.digests_equal(&expected, identity) {
            Ok(())
        } else {
            Err(Error::InvalidIdentity)
        }
    }
}
