//! Crypto capability interfaces the protocol engine consumes.
//!
//! The core never chooses a concrete signature scheme, hash function, or
//! nonce source (spec §1). It is generic over these capabilities so
//! production wiring can supply whatever primitives it likes (Ed25519,
//! secp256r1, BLAKE3, ...) while the engine and its tests depend only on
//! the interfaces below.

use async_trait::async_trait;

use crate::error::Result;

/// Produces signatures and exposes the corresponding public identity.
///
/// A [`Signer`] is a private key. Callers sign the bytes produced by
/// [`crate::message::ComposePayload`] or [`crate::token::AccessToken`]'s
/// canonical payload serialization.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Sign `message`, returning the opaque signature string.
    async fn sign(&self, message: &[u8]) -> Result<String>;

    /// The self-identifying public-key string for this signer (e.g. the
    /// scheme-prefixed encoding of the public key).
    fn public(&self) -> &str;

    /// The self-certifying identity string derived from this signer's
    /// public key (used as `serverIdentity`).
    fn identity(&self) -> &str;
}

/// Verifies signatures produced by some [`Signer`].
#[async_trait]
pub trait Verifier: Send + Sync {
    /// Verify `signature` over `message` under `public_key`.
    async fn verify(
        &self,
        signature: &str,
        public_key: &str,
        message: &[u8],
    ) -> Result<()>;
}

/// A self-identifying cryptographic digest function.
///
/// Implementations must be deterministic and their output strings must
/// compare equal case-insensitively to be considered equal (spec §6).
pub trait Hasher: Send + Sync {
    /// Digest `message`, returning a self-identifying digest string.
    fn sum(&self, message: &[u8]) -> String;

    /// Case-insensitive equality between two digest strings produced by
    /// this hasher (or another hasher using the same encoding).
    fn digests_equal(&self, a: &str, b: &str) -> bool {
        a.eq_ignore_ascii_case(b)
    }
}

/// Generates fresh, unpredictable 128-bit nonces.
pub trait Noncer: Send + Sync {
    /// Generate a fresh 128-bit nonce, encoded as an opaque string.
    fn generate_128(&self) -> String;
}
