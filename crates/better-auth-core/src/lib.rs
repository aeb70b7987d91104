//! A passwordless, device-centric authentication protocol engine.
//!
//! Accounts have no password: an identity is a self-certifying string
//! binding a device's public key to two pre-committed hashes — one for the
//! device's own next key (so every authenticated operation both proves and
//! advances possession of the current private key) and one for a separate
//! recovery key. A short-lived, signed access token bridges the
//! infrequent, expensive authentication ceremony to the frequent,
//! stateless checks an application's own endpoints need to make on every
//! request.
//!
//! This crate implements the protocol engine and its surrounding contracts,
//! not a deployment: cryptographic primitives, persistence, and transport
//! are all abstract capabilities/stores the engine is generic over (see
//! [`capabilities`] and [`stores`]). The `test-utils` feature provides
//! concrete, software-only implementations of both, suitable for this
//! crate's own tests and for downstream integration tests — never for
//! production.

pub mod capabilities;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod message;
pub mod operations;
pub mod stores;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;
pub mod token;
pub mod verifier;

pub use engine::{AuthEngine, EngineConfig};
pub use error::{Error, Result};
pub use verifier::{AccessVerifier, VerifiedAccess};
