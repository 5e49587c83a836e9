use super::*;
use crate::{
    backend::RetryPolicy,
    capability::{Ability, CapabilityTemplate},
    car::CarReader,
    delegation::Delegation,
    nonce::NonceError,
    time::testing::ManualClock,
    verifier::{
        AuthError,
        tests::{DOMAIN, noon, signed_message},
    },
};
use async_trait::async_trait;
use chrono::Duration;
use ethers::signers::{LocalWallet, Signer as _};
use futures::TryStreamExt;
use rstest::rstest;
use serde_json::{Value, json};
use std::{
    sync::{
        LazyLock,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration as StdDuration,
};

static ISSUER: LazyLock<Keypair> = LazyLock::new(Keypair::generate);

// Counts delegations created, optionally taking its time to create them.
struct FakeBackend {
    inner: LocalBackend,
    calls: Arc<AtomicUsize>,
    delay: Option<StdDuration>,
}

#[async_trait]
impl IssuingBackend for FakeBackend {
    fn agent_identity(&self) -> &Did {
        self.inner.agent_identity()
    }

    async fn create_delegation(
        &self,
        audience: Did,
        capabilities: Vec<Capability>,
        options: DelegationOptions,
    ) -> Result<Delegation, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.create_delegation(audience, capabilities, options).await
    }
}

struct Fixture {
    clock: Arc<ManualClock>,
    nonces: Arc<NonceRegistry>,
    store: Arc<MemoryNonceStore>,
    service: DelegationService,
    wallet: LocalWallet,
    calls: Arc<AtomicUsize>,
}

impl Fixture {
    fn new() -> Self {
        Self::with_config(IssuerConfig { domain: DOMAIN.into(), ..Default::default() }, None)
    }

    fn with_config(config: IssuerConfig, delay: Option<StdDuration>) -> Self {
        let calls = Arc::new(AtomicUsize::new(0));
        let backend = FakeBackend { inner: LocalBackend::new(&ISSUER), calls: calls.clone(), delay };
        let client = Arc::new(SigningClient::ready(Arc::new(backend)));
        Self::with_client(config, client, calls)
    }

    fn with_client(config: IssuerConfig, client: Arc<SigningClient>, calls: Arc<AtomicUsize>) -> Self {
        let clock = Arc::new(ManualClock::new(noon()));
        let store = Arc::new(MemoryNonceStore::default());
        let nonces = NonceRegistry::new(store.clone(), config.nonce_ttl(), clock.clone())
            .with_purge_interval(config.nonce_purge_interval());
        let nonces = Arc::new(nonces);
        let service = DelegationService::new(config, nonces.clone(), client, clock.clone());
        Self { clock, nonces, store, service, wallet: LocalWallet::new(&mut rand::thread_rng()), calls }
    }

    async fn signed_request(&self) -> Value {
        let nonce = self.service.nonce().await.expect("nonce failed");
        let (message, signature) = signed_message(&self.wallet, &nonce.value).await;
        json!({ "siwe": message, "signature": signature })
    }

    async fn body(&self, aud: &str) -> Vec<u8> {
        let mut request = self.signed_request().await;
        request["aud"] = aud.into();
        serde_json::to_vec(&request).unwrap()
    }

    fn subject(&self) -> Did {
        Did::from_chain_account(1, self.wallet.address().0)
    }
}

fn audience() -> Did {
    Did::ed25519_key([0xbb; 32])
}

async fn read(issued: IssuedDelegations) -> (Vec<Cid>, Vec<Delegation>) {
    let chunks: Vec<Bytes> = issued.stream().try_collect().await.expect("stream failed");
    let car = CarReader::read_all(&chunks.concat()).expect("invalid container");
    let delegations = car
        .roots
        .iter()
        .map(|root| Delegation::from_block(car.get(root).expect("root missing")).expect("invalid delegation"))
        .collect();
    (car.roots, delegations)
}

#[tokio::test]
async fn issues_storage_delegation() {
    let fixture = Fixture::new();
    let body = fixture.body(&audience().to_string()).await;

    let issued = fixture.service.issue("delegate", &body).await.expect("issue failed");
    let (roots, delegations) = read(issued).await;
    assert_eq!(roots.len(), 1);
    assert_eq!(fixture.calls.load(Ordering::SeqCst), 1);

    let delegation = &delegations[0];
    assert_eq!(delegation.issuer(), &ISSUER.to_did());
    assert_eq!(delegation.audience(), &audience());
    let abilities: Vec<_> = delegation.capabilities().iter().map(|c| c.can.to_string()).collect();
    assert_eq!(abilities, ["upload/add", "store/add"]);
    let subject = fixture.subject().to_string();
    assert!(delegation.capabilities().iter().all(|c| c.with == subject));
    assert_eq!(delegation.expires_at(), Some(noon() + Duration::seconds(86400)));
    assert_eq!(&delegation.cid().unwrap(), &roots[0]);
    delegation.verify_signature().expect("invalid signature");
}

#[tokio::test]
async fn audience_is_normalized() {
    let fixture = Fixture::new();
    let address = [0xab; 20];
    let body = fixture.body(&format!("did:ethr:0x{}", hex::encode(address))).await;

    let issued = fixture.service.issue("delegate", &body).await.expect("issue failed");
    let (_, delegations) = read(issued).await;
    assert_eq!(delegations[0].audience(), &Did::ethr(address));
    assert_eq!(delegations[0].audience().to_string(), Did::ethr(address).to_string());
}

#[tokio::test]
async fn replay_is_rejected() {
    let fixture = Fixture::new();
    let body = fixture.body(&audience().to_string()).await;
    fixture.service.issue("delegate", &body).await.expect("issue failed");

    let err = fixture.service.issue("delegate", &body).await.expect_err("replay accepted");
    assert!(matches!(err, IssueError::Authentication(AuthError::InvalidNonce(NonceError::AlreadyConsumed))));
    assert_eq!(err.status_code(), 401);
    assert_eq!(fixture.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_audience_never_signs() {
    let fixture = Fixture::new();
    let body = serde_json::to_vec(&fixture.signed_request().await).unwrap();

    let err = fixture.service.issue("delegate", &body).await.expect_err("issue succeeded");
    assert!(matches!(err, IssueError::MissingAudience));
    assert_eq!(err.status_code(), 400);
    assert!(err.to_response().message.contains("aud"));
    assert_eq!(fixture.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn expired_message_consumes_nonce() {
    let fixture = Fixture::new();
    // the signed message expires at the end of its first day
    fixture.clock.advance(Duration::days(2));
    let mut request = fixture.signed_request().await;
    let nonce = request["siwe"]["nonce"].as_str().expect("no nonce").to_string();
    request["aud"] = audience().to_string().into();

    let err = fixture.service.issue("delegate", &serde_json::to_vec(&request).unwrap()).await.expect_err("issued");
    assert!(matches!(err, IssueError::Authentication(AuthError::Expired)));
    assert_eq!(err.status_code(), 401);
    assert_eq!(fixture.nonces.consume(&nonce).await, Err(NonceError::AlreadyConsumed));
    assert_eq!(fixture.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn referral_never_expires() {
    let fixture = Fixture::new();
    let body = fixture.body(&audience().to_string()).await;

    let issued = fixture.service.issue("referral", &body).await.expect("issue failed");
    let (_, delegations) = read(issued).await;
    assert_eq!(delegations[0].expires_at(), None);
    assert_eq!(delegations[0].capabilities()[0].can.to_string(), "referral/claim");
}

#[tokio::test]
async fn one_delegation_per_capability_set() {
    let endpoint = EndpointProfile {
        name: "space".into(),
        ttl_secs: Some(60),
        delegations: vec![
            vec![CapabilityTemplate::on_subject(Ability::from(["space", "info"]))],
            vec![CapabilityTemplate { can: Ability::any(), with: "{subject}/files".into() }],
        ],
    };
    let config = IssuerConfig { domain: DOMAIN.into(), endpoints: vec![endpoint], ..Default::default() };
    let fixture = Fixture::with_config(config, None);
    let body = fixture.body(&audience().to_string()).await;

    let issued = fixture.service.issue("space", &body).await.expect("issue failed");
    assert_eq!(issued.roots.len(), 2);
    let (roots, delegations) = read(issued).await;
    assert_eq!(roots.len(), 2);
    assert_eq!(delegations[0].capabilities()[0].can.to_string(), "space/info");
    assert_eq!(delegations[1].capabilities()[0].with, format!("{}/files", fixture.subject()));
    assert_eq!(delegations[1].expires_at(), Some(noon() + Duration::seconds(60)));
}

#[tokio::test]
async fn message_as_text() {
    let fixture = Fixture::new();
    let mut request = fixture.signed_request().await;
    let message: SiweMessage = serde_json::from_value(request["siwe"].clone()).unwrap();
    request["siwe"] = message.to_string().into();
    request["aud"] = audience().to_string().into();

    let issued =
        fixture.service.issue("delegate", &serde_json::to_vec(&request).unwrap()).await.expect("issue failed");
    assert_eq!(issued.roots.len(), 1);
}

#[rstest]
#[case::not_json(b"{".to_vec(), 422)]
#[case::wrong_shape(br#"{"siwe": 1}"#.to_vec(), 422)]
#[case::no_siwe(br#"{"signature": "0x00", "aud": "did:web:example.com"}"#.to_vec(), 422)]
#[case::bad_text(br#"{"siwe": "hello", "signature": "0x00"}"#.to_vec(), 422)]
#[tokio::test]
async fn malformed_requests(#[case] body: Vec<u8>, #[case] status: u16) {
    let fixture = Fixture::new();
    let err = fixture.service.issue("delegate", &body).await.expect_err("issue succeeded");
    assert_eq!(err.status_code(), status, "{err}");
}

#[tokio::test]
async fn missing_signature() {
    let fixture = Fixture::new();
    let mut request = fixture.signed_request().await;
    request.as_object_mut().unwrap().remove("signature");
    let err = fixture.service.issue("delegate", &serde_json::to_vec(&request).unwrap()).await.unwrap_err();
    assert!(matches!(err, IssueError::MissingField("signature")));
    assert_eq!(err.status_code(), 422);
}

#[tokio::test]
async fn undecodable_signature() {
    let fixture = Fixture::new();
    let mut request = fixture.signed_request().await;
    request["signature"] = "not a signature!".into();
    let err = fixture.service.issue("delegate", &serde_json::to_vec(&request).unwrap()).await.unwrap_err();
    assert!(matches!(err, IssueError::MalformedMessage(_)));
    assert_eq!(err.status_code(), 422);
}

#[tokio::test]
async fn invalid_audience() {
    let fixture = Fixture::new();
    let body = fixture.body("did:nope").await;
    let err = fixture.service.issue("delegate", &body).await.expect_err("issue succeeded");
    assert!(matches!(err, IssueError::InvalidAudience(_)));
    assert_eq!(err.status_code(), 400);
    assert_eq!(fixture.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn wrong_domain() {
    let config = IssuerConfig { domain: "other.example.com".into(), ..Default::default() };
    let fixture = Fixture::with_config(config, None);
    let body = fixture.body(&audience().to_string()).await;
    let err = fixture.service.issue("delegate", &body).await.expect_err("issue succeeded");
    assert!(matches!(err, IssueError::Authentication(AuthError::DomainMismatch)));
    assert_eq!(err.status_code(), 401);
}

#[tokio::test]
async fn unknown_endpoint() {
    let fixture = Fixture::new();
    let body = fixture.body(&audience().to_string()).await;
    let err = fixture.service.issue("admin", &body).await.expect_err("issue succeeded");
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn expired_nonces_are_dropped() {
    let fixture = Fixture::new();
    for _ in 0..1000 {
        fixture.service.nonce().await.expect("nonce failed");
    }
    assert_eq!(fixture.store.len(), 1000);

    // past both the nonce time to live and the purge interval
    fixture.clock.advance(Duration::minutes(10));
    for _ in 0..10 {
        let body = fixture.body(&audience().to_string()).await;
        fixture.service.issue("delegate", &body).await.expect("issue failed");
    }
    assert_eq!(fixture.store.len(), 10);
}

#[tokio::test]
async fn purge_on_demand() {
    let fixture = Fixture::new();
    let body = fixture.body(&audience().to_string()).await;
    for _ in 0..5 {
        fixture.service.nonce().await.expect("nonce failed");
    }
    fixture.clock.advance(Duration::minutes(5));

    assert_eq!(fixture.service.purge_expired_nonces().await.expect("purge failed"), 6);
    assert!(fixture.store.is_empty());
    let err = fixture.service.issue("delegate", &body).await.expect_err("issue succeeded");
    assert!(matches!(err, IssueError::Authentication(AuthError::InvalidNonce(NonceError::NotFound))));
}

#[tokio::test]
async fn signing_unavailable() {
    let config = IssuerConfig { domain: DOMAIN.into(), ..Default::default() };
    let client = SigningClient::new(
        || async { Err::<Arc<dyn IssuingBackend>, _>(BackendError::Unavailable("no key".into())) },
        RetryPolicy { max_attempts: 2, initial_backoff: StdDuration::from_millis(1) },
    );
    let fixture = Fixture::with_client(config, Arc::new(client), Arc::new(AtomicUsize::new(0)));
    let body = fixture.body(&audience().to_string()).await;

    let err = fixture.service.issue("delegate", &body).await.expect_err("issue succeeded");
    assert!(matches!(err, IssueError::SigningUnavailable(_)));
    assert_eq!(err.status_code(), 503);
}

#[tokio::test(start_paused = true)]
async fn slow_backend_times_out() {
    let config = IssuerConfig { domain: DOMAIN.into(), request_timeout_secs: 1, ..Default::default() };
    let fixture = Fixture::with_config(config, Some(StdDuration::from_secs(60)));
    let body = fixture.body(&audience().to_string()).await;

    let err = fixture.service.issue("delegate", &body).await.expect_err("issue succeeded");
    assert!(matches!(err, IssueError::Timeout));
    assert_eq!(err.status_code(), 504);
}

#[tokio::test]
async fn from_config_signs_with_configured_key() {
    let config = IssuerConfig {
        signing_key: Some("0101010101010101010101010101010101010101010101010101010101010101".into()),
        ..Default::default()
    };
    let service = DelegationService::from_config(config).expect("invalid config");
    let backend = service.client.get().await.expect("init failed");
    let expected = Keypair::from_bytes(&[1; 32]).unwrap().to_did();
    assert_eq!(backend.agent_identity(), &expected);
    assert_eq!(service.nonce().await.expect("nonce failed").value.len(), 17);
}

#[test]
fn from_config_rejects_bad_key() {
    let config = IssuerConfig { signing_key: Some("0x1234".into()), ..Default::default() };
    let err = DelegationService::from_config(config).err().expect("invalid key accepted");
    assert!(matches!(err, ConfigError::SigningKey(_)));
}
