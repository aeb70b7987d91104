//! The server-side protocol engine: the nine authenticated operations that
//! mutate account state (spec §4.3, §4.5).
//!
//! `AuthEngine` owns no cross-store locks of its own; each store is
//! responsible for its own internal mutual exclusion, and correctness across
//! concurrent requests comes from the order operations perform their checks
//! and mutations in (spec §7). That order is preserved exactly as written
//! here: do not reorder a `reserve`/`rotate`/`register` call relative to the
//! signature and pre-commit checks that precede it without re-reading why.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::capabilities::{Hasher, Signer, Verifier};
use crate::encoding::{IdentityVerifier, Timestamper, TokenEncoder};
use crate::error::{Error, Result};
use crate::message::{ClientRequest, ServerResponse};
use crate::operations::{
    CreateAccountRequest, CreateAccountResponse, DeleteAccountRequest,
    DeleteAccountResponse, FinishAuthenticationRequest,
    FinishAuthenticationResponse, FinishAuthenticationResponseAccess,
    LinkDeviceRequest, LinkDeviceResponse, RecoverAccountRequest,
    RecoverAccountResponse, RefreshAccessTokenRequest,
    RefreshAccessTokenResponse, RefreshAccessTokenResponseAccess,
    RotateAuthenticationKeyRequest, RotateAuthenticationKeyResponse,
    StartAuthenticationRequest, StartAuthenticationResponse,
    StartAuthenticationResponseAuthentication, UnlinkDeviceRequest,
    UnlinkDeviceResponse,
};
use crate::stores::{
    AuthenticationKeyStore, AuthenticationNonceStore, Deadline,
    RecoveryHashStore, TimeLockStore,
};
use crate::token::AccessToken;

/// Durations governing token lifetimes and challenge windows (spec §4.3,
/// §7). Deserializable from a plain seconds-count so deployments can load it
/// from config alongside everything else.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How long a freshly issued access token remains valid for ordinary use.
    #[serde(with = "duration_secs", rename = "accessTokenLifetimeSecs")]
    pub access_token_lifetime: Duration,

    /// How long past a token's original issuance its lineage may still be
    /// refreshed: `refreshExpiry` is fixed at `FinishAuthentication` and
    /// carried unchanged through every later `RefreshAccessToken`, while
    /// `expiry` is renewed each time — so this bounds the total lifetime of
    /// a chain of refreshes, not how late a single already-expired token may
    /// still be refreshed (a token must still pass its own ordinary
    /// `expiry` check to be refreshed at all).
    #[serde(with = "duration_secs", rename = "accessTokenRefreshLifetimeSecs")]
    pub access_token_refresh_lifetime: Duration,

    /// Maximum clock skew tolerated between an access request's timestamp
    /// and the verifier's clock.
    #[serde(with = "duration_secs", rename = "accessWindowSecs")]
    pub access_window: Duration,

    /// How long an authentication challenge nonce remains redeemable.
    #[serde(with = "duration_secs", rename = "authenticationChallengeLifetimeSecs")]
    pub authentication_challenge_lifetime: Duration,
}

impl Default for EngineConfig {
    /// A 15 minute access token, a 12 hour refresh window, a 30 second
    /// clock-skew allowance, and a 1 minute authentication challenge.
    fn default() -> Self {
        Self {
            access_token_lifetime: Duration::from_secs(15 * 60),
            access_token_refresh_lifetime: Duration::from_secs(12 * 60 * 60),
            access_window: Duration::from_secs(30),
            authentication_challenge_lifetime: Duration::from_secs(60),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

/// The authenticated protocol server.
///
/// `Attrs` is the application-defined shape of an access token's extra
/// attributes (spec §3, GLOSSARY); it is carried opaquely across a refresh
/// and otherwise untouched by the engine.
///
/// Response envelopes and access tokens are signed under two distinct
/// identities (`response_signer` and `access_signer`): a verifier only ever
/// needs to resolve the latter, so splitting them lets the two keys be
/// rotated or scaled independently of one another.
pub struct AuthEngine<Attrs> {
    response_signer: Arc<dyn Signer>,
    access_signer: Arc<dyn Signer>,
    verifier: Arc<dyn Verifier>,
    hasher: Arc<dyn Hasher>,
    timestamper: Arc<dyn Timestamper>,
    token_encoder: Arc<dyn TokenEncoder>,
    identity_verifier: Arc<dyn IdentityVerifier>,
    authentication_keys: Arc<dyn AuthenticationKeyStore>,
    authentication_nonces: Arc<dyn AuthenticationNonceStore>,
    recovery_hashes: Arc<dyn RecoveryHashStore>,
    /// Guards every access token's pre-committed rotation hash against being
    /// consumed by more than one concurrent `RefreshAccessToken` call.
    refresh_lock: Arc<dyn TimeLockStore>,
    config: EngineConfig,
    _attrs: PhantomData<fn() -> Attrs>,
}

impl<Attrs> AuthEngine<Attrs>
where
    Attrs: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        response_signer: Arc<dyn Signer>,
        access_signer: Arc<dyn Signer>,
        verifier: Arc<dyn Verifier>,
        hasher: Arc<dyn Hasher>,
        timestamper: Arc<dyn Timestamper>,
        token_encoder: Arc<dyn TokenEncoder>,
        identity_verifier: Arc<dyn IdentityVerifier>,
        authentication_keys: Arc<dyn AuthenticationKeyStore>,
        authentication_nonces: Arc<dyn AuthenticationNonceStore>,
        recovery_hashes: Arc<dyn RecoveryHashStore>,
        refresh_lock: Arc<dyn TimeLockStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            response_signer,
            access_signer,
            verifier,
            hasher,
            timestamper,
            token_encoder,
            identity_verifier,
            authentication_keys,
            authentication_nonces,
            recovery_hashes,
            refresh_lock,
            config,
            _attrs: PhantomData,
        }
    }

    /// `Device == H(publicKey)` (spec §3, GLOSSARY).
    fn check_device_binding(&self, device: &str, public_key: &str) -> Result<()> {
        let expected = self.hasher.sum(public_key.as_bytes());
        if self.hasher.digests_equal(&expected, device) {
            Ok(())
        } else {
            Err(Error::InvalidDevice)
        }
    }

    async fn sign_response<T: Serialize>(
        &self,
        response: T,
        nonce: impl Into<String>,
    ) -> Result<ServerResponse<T>> {
        let mut envelope = ServerResponse::new(
            response,
            self.response_signer.identity(),
            nonce,
        );
        envelope.sign(self.response_signer.as_ref()).await?;
        Ok(envelope)
    }

    /// `CreateAccount`: register a brand-new identity's first device and its
    /// recovery pre-commitment (spec §4.3, §4.5).
    ///
    /// Order: verify the self-certifying identity binding, verify the
    /// device binding, verify the envelope is self-signed by the presented
    /// key, then register the recovery hash and only then the device key.
    /// A crash between the two registrations must leave the recovery hash
    /// written with no authenticatable device yet — not the reverse, which
    /// would leave an authenticatable account with no recovery hash ever
    /// written, permanently failing any later `RecoverAccount`.
    #[instrument(skip_all, fields(identity = %request.payload.request.authentication.identity))]
    pub async fn create_account(
        &self,
        request: ClientRequest<CreateAccountRequest>,
    ) -> Result<ServerResponse<CreateAccountResponse>> {
        let auth = &request.payload.request.authentication;

        self.identity_verifier.verify(
            &auth.identity,
            &auth.public_key,
            &auth.rotation_hash,
            Some(&auth.recovery_hash),
        )?;
        self.check_device_binding(&auth.device, &auth.public_key)?;
        request.verify(self.verifier.as_ref(), &auth.public_key).await?;

        self.recovery_hashes
            .register(Deadline::none(), &auth.identity, &auth.recovery_hash)
            .await?;
        self.authentication_keys
            .register(
                Deadline::none(),
                &auth.identity,
                &auth.device,
                &auth.public_key,
                &auth.rotation_hash,
                false,
            )
            .await?;

        debug!("account created");
        self.sign_response(
            CreateAccountResponse::default(),
            request.payload.access.nonce.clone(),
        )
        .await
    }

    /// `RotateAuthenticationKey`: advance a device's hash chain by one link
    /// (spec §4.3, §4.5).
    ///
    /// The envelope is signed by the *new* (post-rotation) key, not the
    /// current one: proof of possession of the current private key isn't
    /// what authorizes this request, the pre-commitment is. Whoever can sign
    /// with a key whose hash matches the previously published
    /// `rotationHash` has already proven they were trusted with it; the
    /// store's compare-and-swap enforces that bound, so there is nothing
    /// else to fetch first.
    #[instrument(skip_all, fields(identity = %request.payload.request.authentication.identity, device = %request.payload.request.authentication.device))]
    pub async fn rotate_authentication_key(
        &self,
        request: ClientRequest<RotateAuthenticationKeyRequest>,
    ) -> Result<ServerResponse<RotateAuthenticationKeyResponse>> {
        let auth = &request.payload.request.authentication;

        request
            .verify(self.verifier.as_ref(), &auth.public_key)
            .await?;

        self.authentication_keys
            .rotate(
                Deadline::none(),
                &auth.identity,
                &auth.device,
                &auth.public_key,
                &auth.rotation_hash,
            )
            .await?;

        debug!("authentication key rotated");
        self.sign_response(
            RotateAuthenticationKeyResponse::default(),
            request.payload.access.nonce.clone(),
        )
        .await
    }

    /// `LinkDevice`: an already-authenticated device vouches for a brand new
    /// device's self-signed identity claim (spec §4.3).
    ///
    /// Order: verify the outer envelope against the authorizing device's new
    /// (post-rotation) key, verify the embedded container is self-signed by
    /// the new device's own key and that it claims the same identity, then
    /// rotate the authorizing device forward and register the new device.
    #[instrument(skip_all, fields(identity = %request.payload.request.authentication.identity))]
    pub async fn link_device(
        &self,
        request: ClientRequest<LinkDeviceRequest>,
    ) -> Result<ServerResponse<LinkDeviceResponse>> {
        let auth = &request.payload.request.authentication;
        let link = &request.payload.request.link;
        let new_device = &link.payload.authentication;

        request
            .verify(self.verifier.as_ref(), &auth.public_key)
            .await?;

        link.verify(self.verifier.as_ref(), &new_device.public_key)
            .await?;
        if new_device.identity != auth.identity {
            return Err(Error::MismatchedIdentities);
        }

        self.authentication_keys
            .rotate(
                Deadline::none(),
                &auth.identity,
                &auth.device,
                &auth.public_key,
                &auth.rotation_hash,
            )
            .await?;
        self.authentication_keys
            .register(
                Deadline::none(),
                &new_device.identity,
                &new_device.device,
                &new_device.public_key,
                &new_device.rotation_hash,
                true,
            )
            .await?;

        debug!("device linked");
        self.sign_response(
            LinkDeviceResponse::default(),
            request.payload.access.nonce.clone(),
        )
        .await
    }

    /// `UnlinkDevice`: revoke one device slot on an identity (spec §4.3).
    ///
    /// Order: verify the envelope against the authorizing device's new key,
    /// rotate it forward, then revoke the named device. A device is allowed
    /// to unlink itself.
    #[instrument(skip_all, fields(identity = %request.payload.request.authentication.identity))]
    pub async fn unlink_device(
        &self,
        request: ClientRequest<UnlinkDeviceRequest>,
    ) -> Result<ServerResponse<UnlinkDeviceResponse>> {
        let auth = &request.payload.request.authentication;
        let target_device = &request.payload.request.link.device;

        request
            .verify(self.verifier.as_ref(), &auth.public_key)
            .await?;

        self.authentication_keys
            .rotate(
                Deadline::none(),
                &auth.identity,
                &auth.device,
                &auth.public_key,
                &auth.rotation_hash,
            )
            .await?;
        self.authentication_keys
            .revoke_device(Deadline::none(), &auth.identity, target_device)
            .await?;

        debug!(device = %target_device, "device unlinked");
        self.sign_response(
            UnlinkDeviceResponse::default(),
            request.payload.access.nonce.clone(),
        )
        .await
    }

    /// `RecoverAccount`: reset every device using the recovery key, rotating
    /// the recovery pre-commitment in the same step (spec §4.3, Open
    /// Questions).
    ///
    /// Order: verify the envelope is signed by the presented recovery key,
    /// atomically rotate the recovery hash (which alone checks
    /// `H(recoveryKey) == priorRecoveryHash`), then revoke every existing
    /// device and register the sole surviving one.
    #[instrument(skip_all, fields(identity = %request.payload.request.authentication.identity))]
    pub async fn recover_account(
        &self,
        request: ClientRequest<RecoverAccountRequest>,
    ) -> Result<ServerResponse<RecoverAccountResponse>> {
        let auth = &request.payload.request.authentication;

        request
            .verify(self.verifier.as_ref(), &auth.recovery_key)
            .await?;
        self.check_device_binding(&auth.device, &auth.public_key)?;

        let presented_recovery_hash = self.hasher.sum(auth.recovery_key.as_bytes());
        self.recovery_hashes
            .rotate(
                Deadline::none(),
                &auth.identity,
                &presented_recovery_hash,
                &auth.recovery_hash,
            )
            .await?;

        self.authentication_keys
            .revoke_devices(Deadline::none(), &auth.identity)
            .await?;
        self.authentication_keys
            .register(
                Deadline::none(),
                &auth.identity,
                &auth.device,
                &auth.public_key,
                &auth.rotation_hash,
                true,
            )
            .await?;

        debug!("account recovered");
        self.sign_response(
            RecoverAccountResponse::default(),
            request.payload.access.nonce.clone(),
        )
        .await
    }

    /// `DeleteAccount`: rotate the requesting device forward, then erase the
    /// identity entirely.
    #[instrument(skip_all, fields(identity = %request.payload.request.authentication.identity))]
    pub async fn delete_account(
        &self,
        request: ClientRequest<DeleteAccountRequest>,
    ) -> Result<ServerResponse<DeleteAccountResponse>> {
        let auth = &request.payload.request.authentication;

        request
            .verify(self.verifier.as_ref(), &auth.public_key)
            .await?;

        self.authentication_keys
            .rotate(
                Deadline::none(),
                &auth.identity,
                &auth.device,
                &auth.public_key,
                &auth.rotation_hash,
            )
            .await?;
        self.authentication_keys
            .delete_identity(Deadline::none(), &auth.identity)
            .await?;

        debug!("account deleted");
        self.sign_response(
            DeleteAccountResponse::default(),
            request.payload.access.nonce.clone(),
        )
        .await
    }

    /// `StartAuthentication`: mint a fresh challenge nonce for an identity.
    /// Carries no secret, so neither the request nor (per the reference
    /// deployment) its response requires a prior credential — only the
    /// response is signed, so the client can trust the nonce came from this
    /// server.
    #[instrument(skip_all, fields(identity = %request.payload.request.authentication.identity))]
    pub async fn start_authentication(
        &self,
        request: ClientRequest<StartAuthenticationRequest>,
    ) -> Result<ServerResponse<StartAuthenticationResponse>> {
        let identity = &request.payload.request.authentication.identity;
        let challenge = self
            .authentication_nonces
            .generate(Deadline::none(), identity)
            .await?;

        self.sign_response(
            StartAuthenticationResponse {
                authentication: StartAuthenticationResponseAuthentication {
                    nonce: challenge,
                },
            },
            request.payload.access.nonce.clone(),
        )
        .await
    }

    /// `FinishAuthentication`: redeem a challenge nonce for a fresh access
    /// token (spec §4.3, §4.5).
    ///
    /// `attributes` is supplied by the caller — whatever the application
    /// looks up for this identity (roles, scopes, plan tier, ...) — and
    /// embedded verbatim in the minted token.
    ///
    /// Order: consume the challenge nonce first (one-shot; a failed sign
    /// check below must not leave it redeemable), resolve the device's
    /// current public key under the nonce's bound identity, verify the
    /// envelope, then mint and sign the token.
    #[instrument(skip_all, fields(device = %request.payload.request.authentication.device))]
    pub async fn finish_authentication(
        &self,
        request: ClientRequest<FinishAuthenticationRequest>,
        attributes: Attrs,
    ) -> Result<ServerResponse<FinishAuthenticationResponse>> {
        let device = &request.payload.request.authentication.device;
        let nonce = &request.payload.request.authentication.nonce;
        let access = &request.payload.request.access;

        let identity = self
            .authentication_nonces
            .verify(Deadline::none(), nonce)
            .await?;
        let device_public_key = self
            .authentication_keys
            .public(Deadline::none(), &identity, device)
            .await?;
        request
            .verify(self.verifier.as_ref(), &device_public_key)
            .await?;

        let now = self.timestamper.now();
        let mut token = AccessToken {
            server_identity: self.access_signer.identity().to_string(),
            device: device.clone(),
            identity,
            public_key: access.public_key.clone(),
            rotation_hash: access.rotation_hash.clone(),
            issued_at: self.timestamper.format(now),
            expiry: self
                .timestamper
                .format(now + self.config.access_token_lifetime),
            refresh_expiry: self
                .timestamper
                .format(now + self.config.access_token_refresh_lifetime),
            attributes,
            signature: None,
        };
        token.sign(self.access_signer.as_ref()).await?;
        let serialized = token.serialize_token(self.token_encoder.as_ref())?;

        debug!("authentication finished, access token issued");
        self.sign_response(
            FinishAuthenticationResponse {
                access: FinishAuthenticationResponseAccess { token: serialized },
            },
            request.payload.access.nonce.clone(),
        )
        .await
    }

    /// `RefreshAccessToken`: exchange a still-valid token for its
    /// pre-committed successor (spec §4.3, §4.5, §7).
    ///
    /// Order: verify the outer envelope against the new (post-rotation)
    /// access key, parse the presented token and fully verify it against
    /// this server's own signing key — signature, `TokenFromFuture`, and
    /// `TokenExpired` are all checked here, exactly as any other token
    /// verification would be, so a refresh of an already-expired token is
    /// rejected the same way an application request against it would be —
    /// then check the rotation pre-commitment, then the refresh horizon
    /// (`now ≤ refreshExpiry`), and only once every check has passed,
    /// reserve the old token's rotation hash — one-shot, so a concurrent
    /// second refresh of the same token fails instead of forking the chain.
    /// The new token carries the old one's `refreshExpiry` unchanged; only
    /// `issuedAt`/`expiry`/`publicKey`/`rotationHash` are fresh.
    #[instrument(skip_all)]
    pub async fn refresh_access_token(
        &self,
        request: ClientRequest<RefreshAccessTokenRequest>,
    ) -> Result<ServerResponse<RefreshAccessTokenResponse>> {
        let access = &request.payload.request.access;

        request
            .verify(self.verifier.as_ref(), &access.public_key)
            .await?;

        let old_token: AccessToken<Attrs> =
            AccessToken::parse(&access.token, self.token_encoder.as_ref())?;
        old_token
            .verify_token(
                self.verifier.as_ref(),
                self.access_signer.public(),
                self.timestamper.as_ref(),
            )
            .await?;

        let expected_hash = self.hasher.sum(access.public_key.as_bytes());
        if !self
            .hasher
            .digests_equal(&expected_hash, &old_token.rotation_hash)
        {
            return Err(Error::HashMismatch);
        }

        let now = self.timestamper.now();
        let refresh_expiry = self.timestamper.parse(&old_token.refresh_expiry)?;
        if now > refresh_expiry {
            return Err(Error::RefreshExpired);
        }

        self.refresh_lock
            .reserve(Deadline::none(), &old_token.rotation_hash)
            .await?;

        let mut new_token = AccessToken {
            server_identity: old_token.server_identity.clone(),
            device: old_token.device.clone(),
            identity: old_token.identity.clone(),
            public_key: access.public_key.clone(),
            rotation_hash: access.rotation_hash.clone(),
            issued_at: self.timestamper.format(now),
            expiry: self
                .timestamper
                .format(now + self.config.access_token_lifetime),
            refresh_expiry: old_token.refresh_expiry.clone(),
            attributes: old_token.attributes.clone(),
            signature: None,
        };
        new_token.sign(self.access_signer.as_ref()).await?;
        let serialized = new_token.serialize_token(self.token_encoder.as_ref())?;

        debug!("access token refreshed");
        self.sign_response(
            RefreshAccessTokenResponse {
                access: RefreshAccessTokenResponseAccess { token: serialized },
            },
            request.payload.access.nonce.clone(),
        )
        .await
    }
}
