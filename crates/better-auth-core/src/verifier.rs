//! The stateless access-request verifier (spec §4.4).
//!
//! Unlike [`crate::engine::AuthEngine`], an `AccessVerifier` never mints or
//! mutates long-term authentication state. It only has to answer one
//! question — is this application-layer request genuinely from whoever
//! holds `token`'s access key, recently, and not a replay — which makes it
//! safe to run as a separate, horizontally-scaled sidecar that doesn't share
//! process memory with the server issuing tokens, as long as it can reach
//! the same [`AccessVerificationKeyStore`] and nonce lock.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::instrument;

use crate::capabilities::Verifier;
use crate::encoding::{Timestamper, TokenEncoder};
use crate::error::{Error, Result};
use crate::message::Envelope;
use crate::stores::{AccessVerificationKeyStore, Deadline, TimeLockStore};
use crate::token::AccessRequest;

/// An access request that has passed every check in
/// [`AccessVerifier::verify`]: its token, and the request payload it
/// authenticated.
#[derive(Debug, Clone)]
pub struct VerifiedAccess<Attrs, Req> {
    pub identity: String,
    pub device: String,
    pub attributes: Attrs,
    pub request: Req,
}

/// Verifies [`AccessRequest`]s against access tokens issued by (possibly
/// many) servers, keyed by each token's `serverIdentity`.
pub struct AccessVerifier {
    verifier: Arc<dyn Verifier>,
    timestamper: Arc<dyn Timestamper>,
    token_encoder: Arc<dyn TokenEncoder>,
    verification_keys: Arc<dyn AccessVerificationKeyStore>,
    nonce_lock: Arc<dyn TimeLockStore>,
    window: Duration,
}

impl AccessVerifier {
    pub fn new(
        verifier: Arc<dyn Verifier>,
        timestamper: Arc<dyn Timestamper>,
        token_encoder: Arc<dyn TokenEncoder>,
        verification_keys: Arc<dyn AccessVerificationKeyStore>,
        nonce_lock: Arc<dyn TimeLockStore>,
        window: Duration,
    ) -> Self {
        Self {
            verifier,
            timestamper,
            token_encoder,
            verification_keys,
            nonce_lock,
            window,
        }
    }

    /// Verify a wire-encoded access request, in the exact order spec'd:
    ///
    /// 1. Parse the envelope and the embedded token.
    /// 2. Look up the issuing server's verification key by the token's
    ///    claimed `serverIdentity`.
    /// 3. Verify the token's own signature and validity window.
    /// 4. Verify the outer envelope's signature under the token's access
    ///    key.
    /// 5. Check the request's timestamp against the allowed clock-skew
    ///    window.
    /// 6. Reserve the request's nonce — last, so a request that fails any
    ///    earlier check never burns a nonce.
    #[instrument(skip_all)]
    pub async fn verify<Attrs, Req>(
        &self,
        message: &str,
    ) -> Result<VerifiedAccess<Attrs, Req>>
    where
        Attrs: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
        Req: Serialize + DeserializeOwned,
    {
        let envelope: AccessRequest<Req> = Envelope::parse(message)?;

        let token: crate::token::AccessToken<Attrs> = crate::token::AccessToken::parse(
            &envelope.payload.access.token,
            self.token_encoder.as_ref(),
        )?;

        let issuer_key = self
            .verification_keys
            .get(Deadline::none(), &token.server_identity)
            .await?;
        token
            .verify_token(self.verifier.as_ref(), &issuer_key, self.timestamper.as_ref())
            .await?;

        envelope
            .verify(self.verifier.as_ref(), &token.public_key)
            .await?;

        let now = self.timestamper.now();
        let request_time = self.timestamper.parse(&envelope.payload.access.timestamp)?;
        if request_time + self.window < now {
            return Err(Error::StaleRequest);
        }
        if request_time > now + self.window {
            return Err(Error::FutureRequest);
        }

        self.nonce_lock
            .reserve(Deadline::none(), &envelope.payload.access.nonce)
            .await
            .map_err(|err| match err {
                Error::ReservedTooRecently => Error::ReplayedNonce,
                other => other,
            })?;

        Ok(VerifiedAccess {
            identity: token.identity,
            device: token.device,
            attributes: token.attributes,
            request: envelope.payload.request,
        })
    }
}
