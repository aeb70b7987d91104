//! Abstract storage contracts the protocol engine consumes.
//!
//! Concrete persistence is out of scope for this crate (spec §1); these
//! traits are the only contact the engine has with storage. Every method
//! takes a [`Deadline`] so callers can thread cancellation/timeout through
//! store calls (spec §5); implementations should honor it at their I/O
//! boundary, but the engine itself does not interpret a deadline expiring
//! as anything other than whatever error the store returns.
//!
//! Concrete, in-memory implementations used only for this crate's tests
//! live in [`crate::test_support`] behind the `test-utils` feature.

use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::Result;

/// An optional deadline for a store call. `None` means no deadline.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No deadline.
    pub fn none() -> Self {
        Self(None)
    }

    /// A deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self(Some(Instant::now() + timeout))
    }

    /// Whether this deadline has already passed.
    pub fn is_expired(&self) -> bool {
        matches!(self.0, Some(at) if Instant::now() >= at)
    }
}

/// Per-(identity, device) authentication key state and its hash-chain
/// rotation (spec §3, §4.5).
#[async_trait]
pub trait AuthenticationKeyStore: Send + Sync {
    /// Register a brand-new device slot. `existing_identity` distinguishes
    /// the first device of a freshly created identity (`false`) from a
    /// device registered onto an identity that already has other state,
    /// e.g. during `RecoverAccount`/`LinkDevice` (`true`) — stores that
    /// don't need the distinction may ignore it.
    async fn register(
        &self,
        deadline: Deadline,
        identity: &str,
        device: &str,
        public_key: &str,
        rotation_hash: &str,
        existing_identity: bool,
    ) -> Result<()>;

    /// Compare-and-swap rotation: succeeds iff `H(new_public_key) ==` the
    /// currently stored `rotation_hash` for `(identity, device)`.
    async fn rotate(
        &self,
        deadline: Deadline,
        identity: &str,
        device: &str,
        new_public_key: &str,
        new_rotation_hash: &str,
    ) -> Result<()>;

    /// The current public key for `(identity, device)`.
    async fn public(
        &self,
        deadline: Deadline,
        identity: &str,
        device: &str,
    ) -> Result<String>;

    /// Revoke a single device slot.
    async fn revoke_device(
        &self,
        deadline: Deadline,
        identity: &str,
        device: &str,
    ) -> Result<()>;

    /// Revoke every device slot for an identity (used by `RecoverAccount`).
    async fn revoke_devices(&self, deadline: Deadline, identity: &str) -> Result<()>;

    /// Remove every trace of an identity (used by `DeleteAccount`).
    async fn delete_identity(&self, deadline: Deadline, identity: &str) -> Result<()>;
}

/// The authentication challenge store: `nonce -> identity`, one-shot,
/// time-bound (spec §3, §4.5).
#[async_trait]
pub trait AuthenticationNonceStore: Send + Sync {
    /// Mint a fresh challenge nonce bound to `identity`.
    async fn generate(&self, deadline: Deadline, identity: &str) -> Result<String>;

    /// Atomically consume `nonce`, returning the identity it was bound to.
    /// Fails with `NotFound` if unknown, already consumed, or expired.
    async fn verify(&self, deadline: Deadline, nonce: &str) -> Result<String>;
}

/// The per-identity recovery-hash pre-commitment (spec §3).
#[async_trait]
pub trait RecoveryHashStore: Send + Sync {
    /// Register the initial recovery hash for a freshly created identity.
    async fn register(&self, deadline: Deadline, identity: &str, hash: &str) -> Result<()>;

    /// Compare-and-swap rotation: succeeds iff `old_hash` matches the
    /// currently stored hash, atomically replacing it with `new_hash`.
    async fn rotate(
        &self,
        deadline: Deadline,
        identity: &str,
        old_hash: &str,
        new_hash: &str,
    ) -> Result<()>;
}

/// An insert-if-absent-or-expired set with a fixed per-entry lifetime (spec
/// §3, GLOSSARY). Used for both the used-access-nonce store and the
/// one-shot access-key-rotation-hash lock.
#[async_trait]
pub trait TimeLockStore: Send + Sync {
    /// This store's fixed entry lifetime.
    fn lifetime(&self) -> Duration;

    /// Atomically reserve `value`. Fails with `ReservedTooRecently` if
    /// `value` is already reserved and its lock has not yet expired;
    /// exactly one of two concurrent reservations of the same value
    /// succeeds.
    async fn reserve(&self, deadline: Deadline, value: &str) -> Result<()>;
}

/// Looks up a server's access-token verification key by its `serverIdentity`
/// (spec §3, §4.4). Used by offline/sidecar verifiers that don't share
/// process memory with the issuing server.
#[async_trait]
pub trait AccessVerificationKeyStore: Send + Sync {
    /// The verification (public) key for the server identified by
    /// `server_identity`.
    async fn get(&self, deadline: Deadline, server_identity: &str) -> Result<String>;
}
