//! End-to-end protocol scenarios, driven entirely through wire-encoded
//! messages against an [`AuthEngine`] and a companion [`AccessVerifier`],
//! exactly as a real client/server pair would exchange them.

use std::sync::Arc;
use std::time::Duration;

use better_auth_core::encoding::{HashBindingIdentityVerifier, Rfc3339NanoTimestamper};
use better_auth_core::engine::EngineConfig;
use better_auth_core::error::Error;
use better_auth_core::message::{ClientRequest, Envelope};
use better_auth_core::operations::{
    AuthenticationKeyMaterial, CreateAccountAuthentication, CreateAccountRequest,
    DeleteAccountRequest, FinishAuthenticationAccess, FinishAuthenticationAuthentication,
    FinishAuthenticationRequest, LinkContainerPayload, LinkDeviceRequest,
    RecoverAccountAuthentication, RecoverAccountRequest, RefreshAccessTokenAccess,
    RefreshAccessTokenRequest, RotateAuthenticationKeyRequest, StartAuthenticationIdentity,
    StartAuthenticationRequest, UnlinkDeviceLink, UnlinkDeviceRequest,
};
use better_auth_core::test_support::{
    ed25519_token_encoder, Ed25519Signer, Ed25519Verifier, InMemoryAccessVerificationKeyStore,
    InMemoryAuthenticationKeyStore, InMemoryAuthenticationNonceStore, InMemoryRecoveryHashStore,
    InMemoryTimeLockStore, Sha256Hasher, SystemRandomNoncer,
};
use better_auth_core::token::AccessRequest;
use better_auth_core::{AccessVerifier, AuthEngine};
use ring::rand::SystemRandom;
use serde::{Deserialize, Serialize};

/// The application-defined shape carried inside every access token in these
/// scenarios.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Attributes {
    role: String,
}

/// The one application-layer request shape these scenarios send through the
/// access verifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Ping {
    message: String,
}

/// One link in a hash-chain: a key pair plus the hash of the key pair that
/// must follow it.
struct Link {
    signer: Ed25519Signer,
    rotation_hash: String,
}

/// Builds a chain of `count + 1` key pairs, each one's `rotation_hash` being
/// the hash of the next pair's public key, exactly as a client precomputes a
/// hash-chained device or access-key sequence before ever using the first
/// link. The last link's `rotation_hash` is a placeholder committing to
/// nothing real, since these test chains are never rotated past their final
/// link.
fn build_chain(rng: &SystemRandom, hasher: &Sha256Hasher, count: usize) -> Vec<Link> {
    let signers: Vec<Ed25519Signer> = (0..=count)
        .map(|i| Ed25519Signer::generate(rng, format!("chain-{i}")).unwrap())
        .collect();

    let rotation_hashes: Vec<String> = (0..signers.len())
        .map(|i| match signers.get(i + 1) {
            Some(next) => hasher.sum(next.public().as_bytes()),
            None => hasher.sum(b"terminal-unused-link"),
        })
        .collect();

    signers
        .into_iter()
        .zip(rotation_hashes)
        .map(|(signer, rotation_hash)| Link {
            signer,
            rotation_hash,
        })
        .collect()
}

struct Account {
    identity: String,
    device: String,
    device_chain: Vec<Link>,
    recovery_signer: Ed25519Signer,
    recovery_hash: String,
}

struct Harness {
    hasher: Sha256Hasher,
    verifier: Arc<Ed25519Verifier>,
    response_signer: Arc<Ed25519Signer>,
    access_signer: Arc<Ed25519Signer>,
    engine: AuthEngine<Attributes>,
    access_verifier: AccessVerifier,
    config: EngineConfig,
    rng: SystemRandom,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(EngineConfig {
            access_token_lifetime: Duration::from_secs(15 * 60),
            access_token_refresh_lifetime: Duration::from_secs(12 * 60 * 60),
            access_window: Duration::from_secs(30),
            authentication_challenge_lifetime: Duration::from_secs(60),
        })
    }

    fn with_config(config: EngineConfig) -> Self {
        let rng = SystemRandom::new();
        let hasher = Sha256Hasher;
        let verifier = Arc::new(Ed25519Verifier);

        let response_signer =
            Arc::new(Ed25519Signer::generate(&rng, "response-server").unwrap());
        let access_signer = Arc::new(Ed25519Signer::generate(&rng, "access-server").unwrap());

        let authentication_keys = Arc::new(InMemoryAuthenticationKeyStore::new(Sha256Hasher));
        let authentication_nonces = Arc::new(InMemoryAuthenticationNonceStore::new(
            Box::new(SystemRandomNoncer::default()),
            Duration::from_secs(60),
        ));
        let recovery_hashes = Arc::new(InMemoryRecoveryHashStore::default());
        let refresh_lock = Arc::new(InMemoryTimeLockStore::new(Duration::from_secs(
            12 * 60 * 60,
        )));

        let engine = AuthEngine::new(
            response_signer.clone(),
            access_signer.clone(),
            verifier.clone(),
            Arc::new(Sha256Hasher),
            Arc::new(Rfc3339NanoTimestamper),
            Arc::new(ed25519_token_encoder()),
            Arc::new(HashBindingIdentityVerifier::new(Sha256Hasher)),
            authentication_keys,
            authentication_nonces,
            recovery_hashes,
            refresh_lock,
            config,
        );

        let verification_keys = Arc::new(InMemoryAccessVerificationKeyStore::default());
        verification_keys.insert(access_signer.identity(), access_signer.public());
        let access_nonce_lock = Arc::new(InMemoryTimeLockStore::new(Duration::from_secs(30)));

        let access_verifier = AccessVerifier::new(
            verifier.clone(),
            Arc::new(Rfc3339NanoTimestamper),
            Arc::new(ed25519_token_encoder()),
            verification_keys,
            access_nonce_lock,
            config.access_window,
        );

        Self {
            hasher,
            verifier,
            response_signer,
            access_signer,
            engine,
            access_verifier,
            config,
            rng,
        }
    }

    fn device_of(&self, public_key: &str) -> String {
        self.hasher.sum(public_key.as_bytes())
    }

    fn identity_of(&self, public_key: &str, rotation_hash: &str, recovery_hash: &str) -> String {
        let mut message = String::new();
        message.push_str(public_key);
        message.push_str(rotation_hash);
        message.push_str(recovery_hash);
        self.hasher.sum(message.as_bytes())
    }

    /// Creates a brand-new account with a two-link device key chain and
    /// returns its identity material plus the chain for driving further
    /// operations.
    async fn create_account(&self) -> Account {
        let device_chain = build_chain(&self.rng, &self.hasher, 2);
        let recovery_signer = Ed25519Signer::generate(&self.rng, "recovery").unwrap();
        let recovery_hash = self.hasher.sum(recovery_signer.public().as_bytes());

        let device_public_key = device_chain[0].signer.public().to_string();
        let device_rotation_hash = device_chain[0].rotation_hash.clone();
        let identity =
            self.identity_of(&device_public_key, &device_rotation_hash, &recovery_hash);
        let device = self.device_of(&device_public_key);

        let create_request = CreateAccountRequest {
            authentication: CreateAccountAuthentication {
                device: device.clone(),
                identity: identity.clone(),
                public_key: device_public_key,
                rotation_hash: device_rotation_hash,
                recovery_hash: recovery_hash.clone(),
            },
        };
        let mut envelope = ClientRequest::new(create_request, "create-nonce");
        envelope.sign(&device_chain[0].signer).await.unwrap();
        let response = self.engine.create_account(envelope).await.unwrap();
        assert_eq!(response.payload.access.nonce, "create-nonce");
        assert_eq!(
            response.payload.access.server_identity,
            self.response_signer.identity()
        );
        response
            .verify(self.verifier.as_ref(), self.response_signer.public())
            .await
            .unwrap();

        Account {
            identity,
            device,
            device_chain,
            recovery_signer,
            recovery_hash,
        }
    }

    /// Rotates `account`'s device key from link `from` to link `from + 1`,
    /// signed by the new (post-rotation) key as the protocol requires.
    async fn rotate(&self, account: &Account, from: usize) {
        let next = &account.device_chain[from + 1];
        let request = RotateAuthenticationKeyRequest {
            authentication: AuthenticationKeyMaterial {
                device: account.device.clone(),
                identity: account.identity.clone(),
                public_key: next.signer.public().to_string(),
                rotation_hash: current_rotation_hash(account, from + 1),
            },
        };
        let mut envelope = ClientRequest::new(request, "rotate-nonce");
        envelope.sign(&next.signer).await.unwrap();
        self.engine
            .rotate_authentication_key(envelope)
            .await
            .unwrap();
    }

    /// Runs a full StartAuthentication/FinishAuthentication exchange for
    /// `account`'s device at chain position `device_link`, minting an access
    /// token bound to `access_chain[0]`.
    async fn authenticate(
        &self,
        account: &Account,
        device_link: usize,
        access_chain: &[Link],
        attributes: Attributes,
    ) -> String {
        let start_request = StartAuthenticationRequest {
            authentication: StartAuthenticationIdentity {
                identity: account.identity.clone(),
            },
        };
        let start_envelope = ClientRequest::new(start_request, "start-nonce");
        let start_response = self
            .engine
            .start_authentication(start_envelope)
            .await
            .unwrap();
        let challenge_nonce = start_response.payload.response.authentication.nonce;

        let finish_request = FinishAuthenticationRequest {
            access: FinishAuthenticationAccess {
                public_key: access_chain[0].signer.public().to_string(),
                rotation_hash: access_chain[0].rotation_hash.clone(),
            },
            authentication: FinishAuthenticationAuthentication {
                device: account.device.clone(),
                nonce: challenge_nonce,
            },
        };
        let mut envelope = ClientRequest::new(finish_request, "finish-nonce");
        envelope
            .sign(&account.device_chain[device_link].signer)
            .await
            .unwrap();
        let finish_response = self
            .engine
            .finish_authentication(envelope, attributes)
            .await
            .unwrap();
        finish_response.payload.response.access.token
    }

    async fn send_ping(&self, token: &str, signer: &Ed25519Signer, nonce: &str) -> String {
        let timestamper = Rfc3339NanoTimestamper;
        let ping = Ping {
            message: "hello".to_string(),
        };
        let mut access_request = AccessRequest::new(ping, token, nonce, &timestamper);
        access_request.sign(signer).await.unwrap();
        Envelope::serialize(&access_request).unwrap()
    }
}

/// `account.device_chain[index].rotation_hash`, lifted out of the borrow of
/// `account` above so the caller can build a request struct around it.
fn current_rotation_hash(account: &Account, index: usize) -> String {
    account.device_chain[index].rotation_hash.clone()
}

#[tokio::test]
async fn scenario_a_happy_path_through_refresh_and_application_request() {
    let h = Harness::new();
    let account = h.create_account().await;
    h.rotate(&account, 0).await;

    let access_chain = build_chain(&h.rng, &h.hasher, 1);
    let attributes = Attributes {
        role: "admin".to_string(),
    };
    let token = h
        .authenticate(&account, 1, &access_chain, attributes.clone())
        .await;

    let refresh_request = RefreshAccessTokenRequest {
        access: RefreshAccessTokenAccess {
            public_key: access_chain[1].signer.public().to_string(),
            rotation_hash: "terminal-unused-link".to_string(),
            token,
        },
    };
    let mut envelope = ClientRequest::new(refresh_request, "refresh-nonce");
    envelope.sign(&access_chain[1].signer).await.unwrap();
    let refresh_response = h.engine.refresh_access_token(envelope).await.unwrap();
    assert_eq!(refresh_response.payload.access.nonce, "refresh-nonce");
    let refreshed_token = refresh_response.payload.response.access.token;

    let wire = h
        .send_ping(&refreshed_token, &access_chain[1].signer, "app-nonce-1")
        .await;
    let verified = h
        .access_verifier
        .verify::<Attributes, Ping>(&wire)
        .await
        .unwrap();

    assert_eq!(verified.identity, account.identity);
    assert_eq!(verified.device, account.device);
    assert_eq!(verified.attributes, attributes);
    assert_eq!(verified.request.message, "hello");
}

#[tokio::test]
async fn scenario_b_access_replay_is_rejected() {
    let h = Harness::new();
    let account = h.create_account().await;

    let access_chain = build_chain(&h.rng, &h.hasher, 0);
    let attributes = Attributes {
        role: "member".to_string(),
    };
    let token = h
        .authenticate(&account, 0, &access_chain, attributes)
        .await;

    let wire = h
        .send_ping(&token, &access_chain[0].signer, "app-nonce-replay")
        .await;

    h.access_verifier
        .verify::<Attributes, Ping>(&wire)
        .await
        .unwrap();

    let replayed = h.access_verifier.verify::<Attributes, Ping>(&wire).await;
    assert_eq!(replayed.unwrap_err(), Error::ReplayedNonce);
}

#[tokio::test]
async fn scenario_c_rotation_violation_on_refresh_is_rejected() {
    let h = Harness::new();
    let account = h.create_account().await;

    let access_chain = build_chain(&h.rng, &h.hasher, 1);
    let attributes = Attributes {
        role: "member".to_string(),
    };
    let token = h
        .authenticate(&account, 0, &access_chain, attributes)
        .await;

    // Present an access key that was never pre-committed by this token.
    let impostor = Ed25519Signer::generate(&h.rng, "impostor-access").unwrap();
    let refresh_request = RefreshAccessTokenRequest {
        access: RefreshAccessTokenAccess {
            public_key: impostor.public().to_string(),
            rotation_hash: "terminal-unused-link".to_string(),
            token,
        },
    };
    let mut envelope = ClientRequest::new(refresh_request, "refresh-nonce");
    envelope.sign(&impostor).await.unwrap();

    let result = h.engine.refresh_access_token(envelope).await;
    assert_eq!(result.unwrap_err(), Error::HashMismatch);
}

#[tokio::test]
async fn scenario_d_double_refresh_of_the_same_token_is_rejected() {
    let h = Harness::new();
    let account = h.create_account().await;

    let access_chain = build_chain(&h.rng, &h.hasher, 1);
    let attributes = Attributes {
        role: "member".to_string(),
    };
    let token = h
        .authenticate(&account, 0, &access_chain, attributes)
        .await;

    let build_refresh = |token: String| RefreshAccessTokenRequest {
        access: RefreshAccessTokenAccess {
            public_key: access_chain[1].signer.public().to_string(),
            rotation_hash: "terminal-unused-link".to_string(),
            token,
        },
    };

    let mut first = ClientRequest::new(build_refresh(token.clone()), "refresh-nonce-1");
    first.sign(&access_chain[1].signer).await.unwrap();
    h.engine.refresh_access_token(first).await.unwrap();

    let mut second = ClientRequest::new(build_refresh(token), "refresh-nonce-2");
    second.sign(&access_chain[1].signer).await.unwrap();
    let result = h.engine.refresh_access_token(second).await;
    assert_eq!(result.unwrap_err(), Error::ReservedTooRecently);
}

#[tokio::test]
async fn refresh_of_an_expired_token_is_rejected_with_token_expired() {
    let h = Harness::with_config(EngineConfig {
        access_token_lifetime: Duration::from_millis(50),
        access_token_refresh_lifetime: Duration::from_secs(12 * 60 * 60),
        access_window: Duration::from_secs(30),
        authentication_challenge_lifetime: Duration::from_secs(60),
    });
    let account = h.create_account().await;

    let access_chain = build_chain(&h.rng, &h.hasher, 1);
    let attributes = Attributes {
        role: "member".to_string(),
    };
    let token = h
        .authenticate(&account, 0, &access_chain, attributes)
        .await;

    // `accessTokenLifetime` has now elapsed, but the refresh horizon (12h)
    // hasn't: the token is ordinarily expired, not refresh-expired.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let refresh_request = RefreshAccessTokenRequest {
        access: RefreshAccessTokenAccess {
            public_key: access_chain[1].signer.public().to_string(),
            rotation_hash: "terminal-unused-link".to_string(),
            token,
        },
    };
    let mut envelope = ClientRequest::new(refresh_request, "refresh-nonce");
    envelope.sign(&access_chain[1].signer).await.unwrap();

    let result = h.engine.refresh_access_token(envelope).await;
    assert_eq!(result.unwrap_err(), Error::TokenExpired);
}

#[tokio::test]
async fn refresh_past_the_refresh_horizon_of_an_already_refreshed_token_is_rejected() {
    // `refreshExpiry` is propagated unchanged across refreshes while `expiry`
    // is renewed each time, so a token can remain ordinarily unexpired yet
    // fall outside its original refresh horizon.
    let h = Harness::with_config(EngineConfig {
        access_token_lifetime: Duration::from_secs(2),
        access_token_refresh_lifetime: Duration::from_millis(400),
        access_window: Duration::from_secs(30),
        authentication_challenge_lifetime: Duration::from_secs(60),
    });
    let account = h.create_account().await;

    let access_chain = build_chain(&h.rng, &h.hasher, 2);
    let attributes = Attributes {
        role: "member".to_string(),
    };
    let token = h
        .authenticate(&account, 0, &access_chain, attributes)
        .await;

    let first_refresh = RefreshAccessTokenRequest {
        access: RefreshAccessTokenAccess {
            public_key: access_chain[1].signer.public().to_string(),
            rotation_hash: access_chain[1].rotation_hash.clone(),
            token,
        },
    };
    let mut envelope = ClientRequest::new(first_refresh, "refresh-nonce-1");
    envelope.sign(&access_chain[1].signer).await.unwrap();
    let refreshed = h
        .engine
        .refresh_access_token(envelope)
        .await
        .unwrap()
        .payload
        .response
        .access
        .token;

    // `refreshExpiry` (400ms from the original FinishAuthentication) has now
    // elapsed, but the just-renewed `expiry` (2s from this refresh) has not:
    // the token still verifies, so this must surface as RefreshExpired, not
    // TokenExpired.
    tokio::time::sleep(Duration::from_millis(600)).await;

    let second_refresh = RefreshAccessTokenRequest {
        access: RefreshAccessTokenAccess {
            public_key: access_chain[2].signer.public().to_string(),
            rotation_hash: "terminal-unused-link".to_string(),
            token: refreshed,
        },
    };
    let mut envelope = ClientRequest::new(second_refresh, "refresh-nonce-2");
    envelope.sign(&access_chain[2].signer).await.unwrap();

    let result = h.engine.refresh_access_token(envelope).await;
    assert_eq!(result.unwrap_err(), Error::RefreshExpired);
}

#[tokio::test]
async fn scenario_e_recovery_then_link_supersedes_the_original_device() {
    let h = Harness::new();
    let account = h.create_account().await;

    // Recover with a brand-new second device's key, pre-committing a fresh
    // recovery hash in the same step.
    let recovered_chain = build_chain(&h.rng, &h.hasher, 1);
    let next_recovery_signer = Ed25519Signer::generate(&h.rng, "recovery-2").unwrap();
    let next_recovery_hash = h.hasher.sum(next_recovery_signer.public().as_bytes());
    let recovered_public_key = recovered_chain[0].signer.public().to_string();
    let recovered_device = h.device_of(&recovered_public_key);

    let recover_request = RecoverAccountRequest {
        authentication: RecoverAccountAuthentication {
            device: recovered_device.clone(),
            identity: account.identity.clone(),
            public_key: recovered_public_key,
            rotation_hash: recovered_chain[0].rotation_hash.clone(),
            recovery_key: account.recovery_signer.public().to_string(),
            recovery_hash: next_recovery_hash,
        },
    };
    let mut envelope = ClientRequest::new(recover_request, "recover-nonce");
    envelope.sign(&account.recovery_signer).await.unwrap();
    h.engine.recover_account(envelope).await.unwrap();

    // Link a third device, authorized by the recovered device's current key.
    let linked_chain = build_chain(&h.rng, &h.hasher, 0);
    let linked_public_key = linked_chain[0].signer.public().to_string();
    let linked_device = h.device_of(&linked_public_key);
    let link_rotation_hash = h.hasher.sum(b"terminal-unused-link-target");

    let mut link_container = Envelope::new(LinkContainerPayload {
        authentication: AuthenticationKeyMaterial {
            device: linked_device.clone(),
            identity: account.identity.clone(),
            public_key: linked_public_key,
            rotation_hash: link_rotation_hash,
        },
    });
    link_container.sign(&linked_chain[0].signer).await.unwrap();

    let link_request = LinkDeviceRequest {
        authentication: AuthenticationKeyMaterial {
            device: recovered_device.clone(),
            identity: account.identity.clone(),
            public_key: recovered_chain[1].signer.public().to_string(),
            rotation_hash: h.hasher.sum(b"terminal-unused-link-source"),
        },
        link: link_container,
    };
    let mut envelope = ClientRequest::new(link_request, "link-nonce");
    envelope.sign(&recovered_chain[1].signer).await.unwrap();
    h.engine.link_device(envelope).await.unwrap();

    // The linked device can now authenticate.
    let access_chain = build_chain(&h.rng, &h.hasher, 0);
    let start_request = StartAuthenticationRequest {
        authentication: StartAuthenticationIdentity {
            identity: account.identity.clone(),
        },
    };
    let start_response = h
        .engine
        .start_authentication(ClientRequest::new(start_request, "start-nonce"))
        .await
        .unwrap();
    let nonce = start_response.payload.response.authentication.nonce;
    let finish_request = FinishAuthenticationRequest {
        access: FinishAuthenticationAccess {
            public_key: access_chain[0].signer.public().to_string(),
            rotation_hash: access_chain[0].rotation_hash.clone(),
        },
        authentication: FinishAuthenticationAuthentication {
            device: linked_device,
            nonce,
        },
    };
    let mut envelope = ClientRequest::new(finish_request, "finish-nonce");
    envelope.sign(&linked_chain[0].signer).await.unwrap();
    h.engine
        .finish_authentication(
            envelope,
            Attributes {
                role: "member".to_string(),
            },
        )
        .await
        .unwrap();

    // The original, pre-recovery device is gone.
    let unlink_request = UnlinkDeviceRequest {
        authentication: AuthenticationKeyMaterial {
            device: account.device.clone(),
            identity: account.identity.clone(),
            public_key: account.device_chain[1].signer.public().to_string(),
            rotation_hash: current_rotation_hash(&account, 2),
        },
        link: UnlinkDeviceLink {
            device: account.device.clone(),
        },
    };
    let mut envelope = ClientRequest::new(unlink_request, "unlink-nonce");
    envelope.sign(&account.device_chain[1].signer).await.unwrap();
    let result = h.engine.unlink_device(envelope).await;
    assert_eq!(result.unwrap_err(), Error::NotFound { what: "device" });
}

#[tokio::test]
async fn scenario_f_stale_application_request_is_rejected_without_consuming_its_nonce() {
    let h = Harness::new();
    let account = h.create_account().await;

    let access_chain = build_chain(&h.rng, &h.hasher, 0);
    let attributes = Attributes {
        role: "member".to_string(),
    };
    let token = h
        .authenticate(&account, 0, &access_chain, attributes)
        .await;

    let stale_timestamper = FixedTimestamper {
        offset: -(2 * h.config.access_window.as_secs() as i64),
    };
    let ping = Ping {
        message: "late".to_string(),
    };
    let mut access_request =
        AccessRequest::new(ping, token.clone(), "stale-nonce", &stale_timestamper);
    access_request.sign(&access_chain[0].signer).await.unwrap();
    let wire = Envelope::serialize(&access_request).unwrap();

    let result = h.access_verifier.verify::<Attributes, Ping>(&wire).await;
    assert_eq!(result.unwrap_err(), Error::StaleRequest);

    // The nonce must not have been reserved: the exact same nonce, this time
    // on-time, must still succeed.
    let timestamper = Rfc3339NanoTimestamper;
    let ping = Ping {
        message: "on time".to_string(),
    };
    let mut retry = AccessRequest::new(ping, token, "stale-nonce", &timestamper);
    retry.sign(&access_chain[0].signer).await.unwrap();
    let wire = Envelope::serialize(&retry).unwrap();

    let verified = h
        .access_verifier
        .verify::<Attributes, Ping>(&wire)
        .await
        .unwrap();
    assert_eq!(verified.request.message, "on time");
}

/// A [`better_auth_core::encoding::Timestamper`] that reports the real clock
/// shifted by a fixed offset, for constructing requests with a controlled
/// timestamp.
struct FixedTimestamper {
    offset: i64,
}

impl better_auth_core::encoding::Timestamper for FixedTimestamper {
    fn now(&self) -> std::time::SystemTime {
        Rfc3339NanoTimestamper.now()
    }

    fn format(&self, when: std::time::SystemTime) -> String {
        let shifted = if self.offset >= 0 {
            when + Duration::from_secs(self.offset as u64)
        } else {
            when - Duration::from_secs((-self.offset) as u64)
        };
        Rfc3339NanoTimestamper.format(shifted)
    }

    fn parse(&self, when: &str) -> better_auth_core::Result<std::time::SystemTime> {
        Rfc3339NanoTimestamper.parse(when)
    }
}

#[tokio::test]
async fn challenge_nonce_is_single_use() {
    let h = Harness::new();
    let account = h.create_account().await;

    let start_request = StartAuthenticationRequest {
        authentication: StartAuthenticationIdentity {
            identity: account.identity.clone(),
        },
    };
    let start_response = h
        .engine
        .start_authentication(ClientRequest::new(start_request, "start-nonce"))
        .await
        .unwrap();
    let challenge_nonce = start_response.payload.response.authentication.nonce;

    let access_chain = build_chain(&h.rng, &h.hasher, 0);
    let build_finish = |nonce: String| FinishAuthenticationRequest {
        access: FinishAuthenticationAccess {
            public_key: access_chain[0].signer.public().to_string(),
            rotation_hash: access_chain[0].rotation_hash.clone(),
        },
        authentication: FinishAuthenticationAuthentication {
            device: account.device.clone(),
            nonce,
        },
    };

    let mut first = ClientRequest::new(build_finish(challenge_nonce.clone()), "finish-1");
    first.sign(&account.device_chain[0].signer).await.unwrap();
    h.engine
        .finish_authentication(
            first,
            Attributes {
                role: "member".to_string(),
            },
        )
        .await
        .unwrap();

    let mut second = ClientRequest::new(build_finish(challenge_nonce), "finish-2");
    second.sign(&account.device_chain[0].signer).await.unwrap();
    let result = h
        .engine
        .finish_authentication(
            second,
            Attributes {
                role: "member".to_string(),
            },
        )
        .await;
    assert_eq!(
        result.unwrap_err(),
        Error::NotFound {
            what: "authentication nonce"
        }
    );
}

#[tokio::test]
async fn delete_account_removes_the_identity_entirely() {
    let h = Harness::new();
    let account = h.create_account().await;

    let delete_request = DeleteAccountRequest {
        authentication: AuthenticationKeyMaterial {
            device: account.device.clone(),
            identity: account.identity.clone(),
            public_key: account.device_chain[1].signer.public().to_string(),
            rotation_hash: current_rotation_hash(&account, 2),
        },
    };
    let mut envelope = ClientRequest::new(delete_request, "delete-nonce");
    envelope.sign(&account.device_chain[1].signer).await.unwrap();
    h.engine.delete_account(envelope).await.unwrap();

    let start_request = StartAuthenticationRequest {
        authentication: StartAuthenticationIdentity {
            identity: account.identity.clone(),
        },
    };
    let start_response = h
        .engine
        .start_authentication(ClientRequest::new(start_request, "start-nonce"))
        .await
        .unwrap();
    let nonce = start_response.payload.response.authentication.nonce;

    let access_chain = build_chain(&h.rng, &h.hasher, 0);
    let finish_request = FinishAuthenticationRequest {
        access: FinishAuthenticationAccess {
            public_key: access_chain[0].signer.public().to_string(),
            rotation_hash: access_chain[0].rotation_hash.clone(),
        },
        authentication: FinishAuthenticationAuthentication {
            device: account.device.clone(),
            nonce,
        },
    };
    let mut envelope = ClientRequest::new(finish_request, "finish-nonce");
    envelope.sign(&account.device_chain[0].signer).await.unwrap();
    let result = h
        .engine
        .finish_authentication(
            envelope,
            Attributes {
                role: "member".to_string(),
            },
        )
        .await;
    assert_eq!(result.unwrap_err(), Error::NotFound { what: "device" });
}
