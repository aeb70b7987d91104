//! The message envelope: `{payload, signature?}`, and its two canonical
//! protocol payload shapes (spec §4.1).
//!
//! Every protocol message other than `StartAuthentication` (which carries no
//! secret and needs no signature) and the `LinkContainer` sub-message (signed
//! separately, see [`crate::engine`]) is signed. `ComposePayload` is a
//! deterministic JSON serialization of the `payload` field alone; signers
//! and verifiers must agree on it byte-for-byte, which `serde_json`'s
//! struct-field-order serialization gives us for free as long as the payload
//! type's field order never changes after it ships.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::capabilities::{Signer, Verifier};
use crate::error::{Error, Result};

/// The `access` sub-object of a [`ClientRequestPayload`]: just the client's
/// fresh nonce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientAccess {
    pub nonce: String,
}

/// The `access` sub-object of a [`ServerResponsePayload`]: the echoed nonce
/// plus the responding server's identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerAccess {
    pub nonce: String,
    #[serde(rename = "serverIdentity")]
    pub server_identity: String,
}

/// `payload = {access: {nonce}, request: T}` (spec §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRequestPayload<T> {
    pub access: ClientAccess,
    pub request: T,
}

/// `payload = {access: {nonce, serverIdentity}, response: T}` (spec §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerResponsePayload<T> {
    pub access: ServerAccess,
    pub response: T,
}

/// The generic message envelope: a JSON `payload` plus an optional opaque
/// `signature`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<P> {
    pub payload: P,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub signature: Option<String>,
}

/// A signed client request: `ClientRequest<T> = Envelope<ClientRequestPayload<T>>`.
pub type ClientRequest<T> = Envelope<ClientRequestPayload<T>>;

/// A signed server response: `ServerResponse<T> = Envelope<ServerResponsePayload<T>>`.
pub type ServerResponse<T> = Envelope<ServerResponsePayload<T>>;

impl<P> Envelope<P> {
    /// Wrap `payload` in an unsigned envelope.
    pub fn new(payload: P) -> Self {
        Self {
            payload,
            signature: None,
        }
    }

    /// Deterministically serialize the `payload` field alone. Signers and
    /// verifiers must see byte-identical output.
    pub fn compose_payload(&self) -> Result<String>
    where
        P: Serialize,
    {
        serde_json::to_string(&self.payload).map_err(|_| Error::InvalidMessage)
    }

    /// Sign this envelope's composed payload with `signer`, storing the
    /// resulting signature.
    pub async fn sign(&mut self, signer: &(dyn Signer)) -> Result<()>
    where
        P: Serialize,
    {
        let composed = self.compose_payload()?;
        let signature = signer.sign(composed.as_bytes()).await?;
        self.signature = Some(signature);
        Ok(())
    }

    /// Verify this envelope's signature under `public_key`. Fails if no
    /// signature is present or verification fails.
    pub async fn verify(
        &self,
        verifier: &(dyn Verifier),
        public_key: &str,
    ) -> Result<()>
    where
        P: Serialize,
    {
        let signature = self.signature.as_deref().ok_or(Error::SignatureInvalid)?;
        let composed = self.compose_payload()?;
        verifier
            .verify(signature, public_key, composed.as_bytes())
            .await
            .map_err(|_| Error::SignatureInvalid)
    }

    /// Emit the wire JSON `{"payload":…,"signature":"…"}`.
    pub fn serialize(&self) -> Result<String>
    where
        P: Serialize,
    {
        serde_json::to_string(self).map_err(|_| Error::InvalidMessage)
    }

    /// Parse a wire JSON envelope.
    pub fn parse(message: &str) -> Result<Self>
    where
        P: DeserializeOwned,
    {
        serde_json::from_str(message).map_err(|_| Error::InvalidMessage)
    }
}

impl<T> ClientRequest<T> {
    /// Build an unsigned client request envelope with a fresh `nonce`.
    pub fn new(request: T, nonce: impl Into<String>) -> Self {
        Envelope::new(ClientRequestPayload {
            access: ClientAccess {
                nonce: nonce.into(),
            },
            request,
        })
    }
}

impl<T> ServerResponse<T> {
    /// Build an unsigned server response envelope echoing `nonce` and
    /// stamping `server_identity`.
    pub fn new(
        response: T,
        server_identity: impl Into<String>,
        nonce: impl Into<String>,
    ) -> Self {
        Envelope::new(ServerResponsePayload {
            access: ServerAccess {
                nonce: nonce.into(),
                server_identity: server_identity.into(),
            },
            response,
        })
    }
}
