//! The error taxonomy for the protocol engine.
//!
//! Every fallible operation in this crate returns [`Error`]. Variants map
//! directly onto the abstract kinds from the protocol's error taxonomy:
//! validation, cryptographic, token, temporal, storage and protocol-level
//! failures. None of these are retried internally; callers decide.

use thiserror::Error;

/// All errors produced by the protocol engine, the access verifier, and the
/// store/capability contracts they depend on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // --- Validation --- //
    #[error("message is malformed or missing required fields")]
    InvalidMessage,

    #[error("identity does not bind to the presented public key and hashes")]
    InvalidIdentity,

    #[error("device does not bind to the presented public key")]
    InvalidDevice,

    #[error("pre-commit hash mismatch")]
    HashMismatch,

    // --- Cryptographic --- //
    #[error("signature verification failed")]
    SignatureInvalid,

    #[error("response nonce does not match request nonce")]
    IncorrectNonce,

    #[error("nonce has expired")]
    ExpiredNonce,

    #[error("nonce has already been used")]
    ReplayedNonce,

    // --- Token --- //
    #[error("access token has expired")]
    TokenExpired,

    #[error("access token is not yet valid")]
    TokenFromFuture,

    #[error("access token is malformed or fails verification")]
    TokenInvalid,

    // --- Temporal --- //
    #[error("request timestamp is too old")]
    StaleRequest,

    #[error("request timestamp is in the future")]
    FutureRequest,

    // --- Storage --- //
    #[error("{what} not found")]
    NotFound { what: &'static str },

    #[error("{what} already exists")]
    AlreadyExists { what: &'static str },

    #[error("value was reserved too recently")]
    ReservedTooRecently,

    #[error("storage is corrupt: {context}")]
    Corrupt { context: String },

    #[error("storage is unavailable: {context}")]
    Unavailable { context: String },

    // --- Protocol --- //
    #[error("mismatched identities between request and link container")]
    MismatchedIdentities,

    #[error("refresh window has expired")]
    RefreshExpired,
}

impl Error {
    /// A stable, wire-safe code for the `{code, message, context}` boundary
    /// object callers build around this error (spec §7). Never renamed
    /// across releases; new variants get new codes, old ones are never
    /// reused.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidMessage => "invalid_message",
            Self::InvalidIdentity => "invalid_identity",
            Self::InvalidDevice => "invalid_device",
            Self::HashMismatch => "hash_mismatch",
            Self::SignatureInvalid => "signature_invalid",
            Self::IncorrectNonce => "incorrect_nonce",
            Self::ExpiredNonce => "expired_nonce",
            Self::ReplayedNonce => "replayed_nonce",
            Self::TokenExpired => "token_expired",
            Self::TokenFromFuture => "token_from_future",
            Self::TokenInvalid => "token_invalid",
            Self::StaleRequest => "stale_request",
            Self::FutureRequest => "future_request",
            Self::NotFound { .. } => "not_found",
            Self::AlreadyExists { .. } => "already_exists",
            Self::ReservedTooRecently => "reserved_too_recently",
            Self::Corrupt { .. } => "corrupt",
            Self::Unavailable { .. } => "unavailable",
            Self::MismatchedIdentities => "mismatched_identities",
            Self::RefreshExpired => "refresh_expired",
        }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;
