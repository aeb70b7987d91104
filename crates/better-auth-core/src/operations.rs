//! Wire payload types for each server protocol operation (spec §4.3).
//!
//! Every `*Request` below is the `request: T` carried inside a
//! [`ClientRequest`](crate::message::ClientRequest); every `*Response` is the
//! `response: T` carried inside a [`ServerResponse`](crate::message::ServerResponse).
//! Field names use the wire's `camelCase` convention via `#[serde(rename)]`.

use serde::{Deserialize, Serialize};

use crate::message::Envelope;

/// The authentication key material common to most requests: the device
/// slot, identity, the device's current (post-rotation) public key, and its
/// next pre-commit hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticationKeyMaterial {
    pub device: String,
    pub identity: String,
    #[serde(rename = "publicKey")]
    pub public_key: String,
    #[serde(rename = "rotationHash")]
    pub rotation_hash: String,
}

// --- CreateAccount --- //

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccountAuthentication {
    pub device: String,
    pub identity: String,
    #[serde(rename = "publicKey")]
    pub public_key: String,
    #[serde(rename = "rotationHash")]
    pub rotation_hash: String,
    #[serde(rename = "recoveryHash")]
    pub recovery_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccountRequest {
    pub authentication: CreateAccountAuthentication,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateAccountResponse {}

// --- RotateAuthenticationKey --- //

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotateAuthenticationKeyRequest {
    pub authentication: AuthenticationKeyMaterial,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RotateAuthenticationKeyResponse {}

// --- LinkDevice --- //

/// The inner container carrying the *new* device's self-signed identity
/// claim, itself an independently signed message embedded in a
/// [`LinkDeviceRequest`] (spec §4.3).
pub type LinkContainer = Envelope<LinkContainerPayload>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkContainerPayload {
    pub authentication: AuthenticationKeyMaterial,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkDeviceRequest {
    pub authentication: AuthenticationKeyMaterial,
    pub link: LinkContainer,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkDeviceResponse {}

// --- UnlinkDevice --- //

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlinkDeviceLink {
    pub device: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlinkDeviceRequest {
    pub authentication: AuthenticationKeyMaterial,
    pub link: UnlinkDeviceLink,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnlinkDeviceResponse {}

// --- RecoverAccount --- //

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoverAccountAuthentication {
    pub device: String,
    pub identity: String,
    #[serde(rename = "publicKey")]
    pub public_key: String,
    #[serde(rename = "rotationHash")]
    pub rotation_hash: String,
    #[serde(rename = "recoveryKey")]
    pub recovery_key: String,
    #[serde(rename = "recoveryHash")]
    pub recovery_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoverAccountRequest {
    pub authentication: RecoverAccountAuthentication,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecoverAccountResponse {}

// --- DeleteAccount --- //

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteAccountRequest {
    pub authentication: AuthenticationKeyMaterial,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteAccountResponse {}

// --- StartAuthentication --- //

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartAuthenticationIdentity {
    pub identity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartAuthenticationRequest {
    pub authentication: StartAuthenticationIdentity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartAuthenticationResponseAuthentication {
    pub nonce: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartAuthenticationResponse {
    pub authentication: StartAuthenticationResponseAuthentication,
}

// --- FinishAuthentication --- //

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishAuthenticationAccess {
    #[serde(rename = "publicKey")]
    pub public_key: String,
    #[serde(rename = "rotationHash")]
    pub rotation_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishAuthenticationAuthentication {
    pub device: String,
    pub nonce: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishAuthenticationRequest {
    pub access: FinishAuthenticationAccess,
    pub authentication: FinishAuthenticationAuthentication,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishAuthenticationResponseAccess {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishAuthenticationResponse {
    pub access: FinishAuthenticationResponseAccess,
}

// --- RefreshAccessToken --- //

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshAccessTokenAccess {
    #[serde(rename = "publicKey")]
    pub public_key: String,
    #[serde(rename = "rotationHash")]
    pub rotation_hash: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshAccessTokenRequest {
    pub access: RefreshAccessTokenAccess,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshAccessTokenResponseAccess {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshAccessTokenResponse {
    pub access: RefreshAccessTokenResponseAccess,
}
