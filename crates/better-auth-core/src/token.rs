//! The access token and the application-facing access request that carries
//! it (spec §3, §4.2).

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::capabilities::{Signer, Verifier};
use crate::encoding::{Timestamper, TokenEncoder};
use crate::error::{Error, Result};
use crate::message::Envelope;

/// A short-lived, server-signed bearer credential (spec §3).
///
/// Immutable once signed. The signature itself is never part of the signed
/// payload (it's carried out-of-band, prefixed onto the compact wire
/// encoding), so it's excluded from (de)serialization of the payload body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken<T> {
    #[serde(rename = "serverIdentity")]
    pub server_identity: String,
    pub device: String,
    pub identity: String,
    #[serde(rename = "publicKey")]
    pub public_key: String,
    #[serde(rename = "rotationHash")]
    pub rotation_hash: String,
    #[serde(rename = "issuedAt")]
    pub issued_at: String,
    pub expiry: String,
    #[serde(rename = "refreshExpiry")]
    pub refresh_expiry: String,
    pub attributes: T,

    #[serde(skip)]
    pub signature: Option<String>,
}

impl<T: Serialize> AccessToken<T> {
    /// Deterministically serialize the token's signed payload (everything
    /// but the signature).
    pub fn compose_payload(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|_| Error::InvalidMessage)
    }

    /// Sign this token's composed payload, storing the signature.
    pub async fn sign(&mut self, signer: &(dyn Signer)) -> Result<()> {
        let composed = self.compose_payload()?;
        self.signature = Some(signer.sign(composed.as_bytes()).await?);
        Ok(())
    }

    /// Encode this signed token to its compact wire form: the raw signature
    /// string followed by the compressed, base64-encoded JSON body.
    pub fn serialize_token(
        &self,
        token_encoder: &(dyn TokenEncoder),
    ) -> Result<String> {
        let signature = self.signature.as_deref().ok_or(Error::TokenInvalid)?;
        let composed = self.compose_payload()?;
        let encoded = token_encoder.encode(&composed)?;
        Ok(format!("{signature}{encoded}"))
    }

    /// Verify this token's signature and validity window.
    ///
    /// 1. Verify the signature over the composed payload.
    /// 2. `FAIL TokenFromFuture` if `now < issuedAt`.
    /// 3. `FAIL TokenExpired` if `now > expiry`.
    pub async fn verify_token(
        &self,
        verifier: &(dyn Verifier),
        public_key: &str,
        timestamper: &(dyn Timestamper),
    ) -> Result<()> {
        let signature = self.signature.as_deref().ok_or(Error::TokenInvalid)?;
        let composed = self.compose_payload()?;
        verifier
            .verify(signature, public_key, composed.as_bytes())
            .await
            .map_err(|_| Error::TokenInvalid)?;

        let now = timestamper.now();
        let issued_at = timestamper.parse(&self.issued_at)?;
        let expiry = timestamper.parse(&self.expiry)?;

        if now < issued_at {
            return Err(Error::TokenFromFuture);
        }
        if now > expiry {
            return Err(Error::TokenExpired);
        }

        Ok(())
    }
}

impl<T: DeserializeOwned> AccessToken<T> {
    /// Decode a compact wire-form token string. The signature prefix length
    /// is self-describing: `token_encoder` reads it from `token`'s own
    /// leading bytes (spec §4.2, §6), so decoding never depends on which
    /// [`Verifier`] a caller happens to have wired in.
    pub fn parse(token: &str, token_encoder: &(dyn TokenEncoder)) -> Result<Self> {
        let signature_length = token_encoder.signature_length(token)?;
        if token.len() < signature_length {
            return Err(Error::TokenInvalid);
        }
        let (signature, rest) = token.split_at(signature_length);
        let decoded = token_encoder.decode(rest)?;
        let mut access_token: Self =
            serde_json::from_str(&decoded).map_err(|_| Error::TokenInvalid)?;
        access_token.signature = Some(signature.to_string());
        Ok(access_token)
    }
}

/// The `access` sub-object of an [`AccessRequest`]'s payload: a fresh nonce,
/// a fresh timestamp, and the embedded access token (spec §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRequestAccess {
    pub nonce: String,
    pub timestamp: String,
    pub token: String,
}

/// `payload = {access: {nonce, timestamp, token}, request: Req}` (spec §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRequestPayload<Req> {
    pub access: AccessRequestAccess,
    pub request: Req,
}

/// An application-layer request carrying a token, a fresh nonce, and a
/// fresh timestamp, signed by the token's access key (spec §4.1, GLOSSARY).
pub type AccessRequest<Req> = Envelope<AccessRequestPayload<Req>>;

impl<Req> AccessRequest<Req> {
    /// Build an unsigned access request, stamping the current time from
    /// `timestamper`.
    pub fn new(
        request: Req,
        token: impl Into<String>,
        nonce: impl Into<String>,
        timestamper: &(dyn Timestamper),
    ) -> Self {
        let timestamp = timestamper.format(timestamper.now());
        Envelope::new(AccessRequestPayload {
            access: AccessRequestAccess {
                nonce: nonce.into(),
                timestamp,
                token: token.into(),
            },
            request,
        })
    }
}
