//! Software-only crypto capabilities and in-memory store implementations.
//!
//! Used by this crate's own test suite and available to downstream
//! integration tests behind the `test-utils` feature. None of this is fit
//! for production: the stores hold everything in a `Mutex`-guarded
//! `HashMap` with no persistence, and the crypto capabilities exist only to
//! give the engine something real to call.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ring::rand::{SecureRandom, SystemRandom};
use ring::signature::{Ed25519KeyPair, KeyPair as _};

use crate::capabilities::{Hasher, Noncer, Signer, Verifier};
use crate::error::{Error, Result};
use crate::stores::{
    AccessVerificationKeyStore, AuthenticationKeyStore, AuthenticationNonceStore,
    Deadline, RecoveryHashStore, TimeLockStore,
};

// --- Crypto capabilities --- //

/// A software Ed25519 signer backed by `ring`, identified by a
/// caller-supplied identity string (the signer itself has no opinion on how
/// that identity is derived).
pub struct Ed25519Signer {
    key_pair: Ed25519KeyPair,
    public_hex: String,
    identity: String,
}

impl Ed25519Signer {
    /// Generate a fresh key pair.
    pub fn generate(rng: &SystemRandom, identity: impl Into<String>) -> Result<Self> {
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(rng).map_err(|_| {
            Error::Unavailable {
                context: "ed25519 key generation failed".to_string(),
            }
        })?;
        let key_pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).map_err(|_| {
            Error::Unavailable {
                context: "ed25519 key parsing failed".to_string(),
            }
        })?;
        let public_hex = hex::encode(key_pair.public_key().as_ref());
        Ok(Self {
            key_pair,
            public_hex,
            identity: identity.into(),
        })
    }
}

/// The two-character scheme tag [`Ed25519Signer`] prefixes onto every
/// signature, so a [`crate::encoding::TokenEncoder`] can read a token's
/// signature-prefix length from the token string itself rather than from
/// whichever [`Verifier`] happens to be wired in (spec §4.2, §6).
pub const ED25519_SIGNATURE_TAG: &str = "ED";

/// Total length (tag included) of a signature string produced by
/// [`Ed25519Signer`]: the two-character tag plus 128 hex characters.
pub const ED25519_SIGNATURE_LENGTH: usize = ED25519_SIGNATURE_TAG.len() + 128;

#[async_trait]
impl Signer for Ed25519Signer {
    async fn sign(&self, message: &[u8]) -> Result<String> {
        Ok(format!(
            "{ED25519_SIGNATURE_TAG}{}",
            hex::encode(self.key_pair.sign(message).as_ref())
        ))
    }

    fn public(&self) -> &str {
        &self.public_hex
    }

    fn identity(&self) -> &str {
        &self.identity
    }
}

/// A stateless Ed25519 verifier backed by `ring`. Signatures are a
/// two-character scheme tag followed by the hex-encoded signature bytes;
/// public keys are hex-encoded.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519Verifier;

#[async_trait]
impl Verifier for Ed25519Verifier {
    async fn verify(
        &self,
        signature: &str,
        public_key: &str,
        message: &[u8],
    ) -> Result<()> {
        let hex_signature = signature
            .strip_prefix(ED25519_SIGNATURE_TAG)
            .ok_or(Error::SignatureInvalid)?;
        let signature_bytes = hex::decode(hex_signature).map_err(|_| Error::SignatureInvalid)?;
        let public_key_bytes =
            hex::decode(public_key).map_err(|_| Error::SignatureInvalid)?;
        let unparsed =
            ring::signature::UnparsedPublicKey::new(&ring::signature::ED25519, public_key_bytes);
        unparsed
            .verify(message, &signature_bytes)
            .map_err(|_| Error::SignatureInvalid)
    }
}

/// A [`crate::encoding::CompactTokenEncoder`] that recognizes
/// [`Ed25519Signer`]'s scheme tag, for driving this crate's own tests and
/// downstream integration tests end-to-end.
pub fn ed25519_token_encoder() -> crate::encoding::CompactTokenEncoder {
    crate::encoding::CompactTokenEncoder::new([(
        ED25519_SIGNATURE_TAG.to_string(),
        ED25519_SIGNATURE_LENGTH,
    )])
}

/// A SHA-256 [`Hasher`] backed by `ring`, hex-encoded.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Hasher;

impl Hasher for Sha256Hasher {
    fn sum(&self, message: &[u8]) -> String {
        hex::encode(ring::digest::digest(&ring::digest::SHA256, message).as_ref())
    }
}

/// A [`Noncer`] drawing from the system CSPRNG via `ring`.
pub struct SystemRandomNoncer {
    rng: SystemRandom,
}

impl Default for SystemRandomNoncer {
    fn default() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }
}

impl Noncer for SystemRandomNoncer {
    fn generate_128(&self) -> String {
        let mut bytes = [0u8; 16];
        self.rng
            .fill(&mut bytes)
            .expect("system RNG is unavailable");
        hex::encode(bytes)
    }
}

// --- Stores --- //

struct DeviceRecord {
    public_key: String,
    rotation_hash: String,
}

/// An in-memory [`AuthenticationKeyStore`]. Rotation is a compare-and-swap
/// keyed on this store's own [`Hasher`], not on one threaded in per call,
/// since the hash function is part of a deployment's fixed configuration.
pub struct InMemoryAuthenticationKeyStore<H> {
    hasher: H,
    devices: Mutex<HashMap<(String, String), DeviceRecord>>,
}

impl<H: Hasher> InMemoryAuthenticationKeyStore<H> {
    pub fn new(hasher: H) -> Self {
        Self {
            hasher,
            devices: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl<H: Hasher> AuthenticationKeyStore for InMemoryAuthenticationKeyStore<H> {
    async fn register(
        &self,
        _deadline: Deadline,
        identity: &str,
        device: &str,
        public_key: &str,
        rotation_hash: &str,
        _existing_identity: bool,
    ) -> Result<()> {
        let mut devices = self.devices.lock().unwrap();
        let key = (identity.to_string(), device.to_string());
        if devices.contains_key(&key) {
            return Err(Error::AlreadyExists { what: "device" });
        }
        devices.insert(
            key,
            DeviceRecord {
                public_key: public_key.to_string(),
                rotation_hash: rotation_hash.to_string(),
            },
        );
        Ok(())
    }

    async fn rotate(
        &self,
        _deadline: Deadline,
        identity: &str,
        device: &str,
        new_public_key: &str,
        new_rotation_hash: &str,
    ) -> Result<()> {
        let mut devices = self.devices.lock().unwrap();
        let key = (identity.to_string(), device.to_string());
        let record = devices
            .get(&key)
            .ok_or(Error::NotFound { what: "device" })?;

        let presented = self.hasher.sum(new_public_key.as_bytes());
        if !self.hasher.digests_equal(&presented, &record.rotation_hash) {
            return Err(Error::HashMismatch);
        }

        devices.insert(
            key,
            DeviceRecord {
                public_key: new_public_key.to_string(),
                rotation_hash: new_rotation_hash.to_string(),
            },
        );
        Ok(())
    }

    async fn public(
        &self,
        _deadline: Deadline,
        identity: &str,
        device: &str,
    ) -> Result<String> {
        let devices = self.devices.lock().unwrap();
        devices
            .get(&(identity.to_string(), device.to_string()))
            .map(|record| record.public_key.clone())
            .ok_or(Error::NotFound { what: "device" })
    }

    async fn revoke_device(
        &self,
        _deadline: Deadline,
        identity: &str,
        device: &str,
    ) -> Result<()> {
        let mut devices = self.devices.lock().unwrap();
        devices
            .remove(&(identity.to_string(), device.to_string()))
            .map(|_| ())
            .ok_or(Error::NotFound { what: "device" })
    }

    async fn revoke_devices(&self, _deadline: Deadline, identity: &str) -> Result<()> {
        let mut devices = self.devices.lock().unwrap();
        devices.retain(|(known_identity, _), _| known_identity != identity);
        Ok(())
    }

    async fn delete_identity(&self, _deadline: Deadline, identity: &str) -> Result<()> {
        let mut devices = self.devices.lock().unwrap();
        devices.retain(|(known_identity, _), _| known_identity != identity);
        Ok(())
    }
}

/// An in-memory, TTL-enforcing [`AuthenticationNonceStore`]. A redeemed or
/// expired nonce is actually unusable: `verify` removes the entry on every
/// call, whether or not it succeeds, so a consumed challenge never leaves a
/// window where it could be redeemed again.
pub struct InMemoryAuthenticationNonceStore {
    noncer: Box<dyn Noncer + Send + Sync>,
    lifetime: Duration,
    challenges: Mutex<HashMap<String, (String, Instant)>>,
}

impl InMemoryAuthenticationNonceStore {
    pub fn new(noncer: Box<dyn Noncer + Send + Sync>, lifetime: Duration) -> Self {
        Self {
            noncer,
            lifetime,
            challenges: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl AuthenticationNonceStore for InMemoryAuthenticationNonceStore {
    async fn generate(&self, _deadline: Deadline, identity: &str) -> Result<String> {
        let nonce = self.noncer.generate_128();
        let deadline_at = Instant::now() + self.lifetime;
        self.challenges
            .lock()
            .unwrap()
            .insert(nonce.clone(), (identity.to_string(), deadline_at));
        Ok(nonce)
    }

    async fn verify(&self, _deadline: Deadline, nonce: &str) -> Result<String> {
        let entry = self.challenges.lock().unwrap().remove(nonce);
        match entry {
            Some((identity, deadline_at)) if Instant::now() < deadline_at => Ok(identity),
            Some(_) => Err(Error::ExpiredNonce),
            None => Err(Error::NotFound {
                what: "authentication nonce",
            }),
        }
    }
}

/// An in-memory [`RecoveryHashStore`].
#[derive(Default)]
pub struct InMemoryRecoveryHashStore {
    hashes: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl RecoveryHashStore for InMemoryRecoveryHashStore {
    async fn register(&self, _deadline: Deadline, identity: &str, hash: &str) -> Result<()> {
        let mut hashes = self.hashes.lock().unwrap();
        if hashes.contains_key(identity) {
            return Err(Error::AlreadyExists {
                what: "recovery hash",
            });
        }
        hashes.insert(identity.to_string(), hash.to_string());
        Ok(())
    }

    async fn rotate(
        &self,
        _deadline: Deadline,
        identity: &str,
        old_hash: &str,
        new_hash: &str,
    ) -> Result<()> {
        let mut hashes = self.hashes.lock().unwrap();
        let current = hashes.get(identity).ok_or(Error::NotFound {
            what: "recovery hash",
        })?;
        if !current.eq_ignore_ascii_case(old_hash) {
            return Err(Error::HashMismatch);
        }
        hashes.insert(identity.to_string(), new_hash.to_string());
        Ok(())
    }
}

/// An in-memory [`TimeLockStore`]: one fixed lifetime, shared by every
/// reserved value.
pub struct InMemoryTimeLockStore {
    lifetime: Duration,
    values: Mutex<HashMap<String, Instant>>,
}

impl InMemoryTimeLockStore {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            lifetime,
            values: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl TimeLockStore for InMemoryTimeLockStore {
    fn lifetime(&self) -> Duration {
        self.lifetime
    }

    async fn reserve(&self, _deadline: Deadline, value: &str) -> Result<()> {
        let mut values = self.values.lock().unwrap();
        let now = Instant::now();
        if let Some(valid_at) = values.get(value) {
            if now < *valid_at {
                return Err(Error::ReservedTooRecently);
            }
        }
        values.insert(value.to_string(), now + self.lifetime);
        Ok(())
    }
}

/// An in-memory [`AccessVerificationKeyStore`], keyed by `serverIdentity`.
#[derive(Default)]
pub struct InMemoryAccessVerificationKeyStore {
    keys: Mutex<HashMap<String, String>>,
}

impl InMemoryAccessVerificationKeyStore {
    pub fn insert(&self, server_identity: impl Into<String>, public_key: impl Into<String>) {
        self.keys
            .lock()
            .unwrap()
            .insert(server_identity.into(), public_key.into());
    }
}

#[async_trait]
impl AccessVerificationKeyStore for InMemoryAccessVerificationKeyStore {
    async fn get(&self, _deadline: Deadline, server_identity: &str) -> Result<String> {
        self.keys
            .lock()
            .unwrap()
            .get(server_identity)
            .cloned()
            .ok_or(Error::NotFound {
                what: "access verification key",
            })
    }
}
