//! End-to-end scenarios: a full frontend + pipeline + re-injection round
//! trip against a mock downstream MTA.

mod support;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::broadcast;

use decency_common::{
    Signal,
    policy::{DispositionPolicy, SpamBehavior, SpamHandle, SpamPolicy, VirusHandle, VirusPolicy},
    session::MessageSession,
};
use decency_filter::{FilterModule, FilterSignal, PolicyScoringVerifier, contribute};
use decency_pipeline::{
    DispositionEngine, Notifier, PipelineEngine, ReinjectConfig, Reinjector,
};
use decency_smtp::{Frontend, FrontendConfig, Response, SmtpClient};
use decency_spool::{MemoryCache, QueueCache, QueueEntry, SpoolDirs};

use support::mock_server::{MOCK_QUEUE_ID, MockSmtpServer};

/// Test module: contributes a fixed delta through the policy gate.
#[derive(Debug)]
struct Scoring {
    name: String,
    delta: f64,
    policy: Arc<DispositionPolicy>,
    calls: std::sync::atomic::AtomicUsize,
}

impl Scoring {
    fn new(name: &str, delta: f64, policy: &Arc<DispositionPolicy>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            delta,
            policy: Arc::clone(policy),
            calls: std::sync::atomic::AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl FilterModule for Scoring {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, session: &mut MessageSession) -> Result<(), FilterSignal> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if self.delta == 0.0 {
            return Ok(());
        }
        contribute(
            session,
            &self.policy.spam,
            self.delta,
            format!("{}: {}", self.name, self.delta),
        )
    }
}

#[derive(Debug)]
struct VirusRaiser(String);

#[async_trait]
impl FilterModule for VirusRaiser {
    fn name(&self) -> &str {
        "virus-raiser"
    }

    async fn handle(&self, _session: &mut MessageSession) -> Result<(), FilterSignal> {
        Err(FilterSignal::Virus(self.0.clone()))
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    spool: Arc<SpoolDirs>,
    cache: QueueCache,
    ingress: std::net::SocketAddr,
    shutdown: broadcast::Sender<Signal>,
}

impl Harness {
    async fn start(
        policy: DispositionPolicy,
        modules: Vec<Arc<dyn FilterModule>>,
        reinject_target: String,
        verifier: Option<PolicyScoringVerifier>,
    ) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let spool = Arc::new(SpoolDirs::create(dir.path().join("spool")).expect("spool"));
        let cache = QueueCache::new(Arc::new(MemoryCache::new()));
        let policy = Arc::new(policy);

        let reinjector = Reinjector::new(&ReinjectConfig {
            target: reinject_target,
            helo: "filter.test".to_string(),
        });
        let notifier = Notifier::new(policy.notification.clone()).expect("notifier");
        let disposition = DispositionEngine::new(
            Arc::clone(&policy),
            Arc::clone(&spool),
            reinjector,
            notifier,
        );

        let engine = Arc::new(
            PipelineEngine::new(modules, policy, disposition, cache.clone())
                .with_verifier(verifier),
        );

        let config = FrontendConfig {
            socket: "127.0.0.1:0".parse().expect("socket"),
            banner: "filter.test".to_string(),
        };
        let frontend = Frontend::bind(&config, Arc::clone(&spool), engine)
            .await
            .expect("bind frontend");
        let ingress = frontend.local_addr().expect("ingress addr");

        let (shutdown, _) = broadcast::channel(4);
        let receiver = shutdown.subscribe();
        tokio::spawn(async move {
            let _ = frontend.serve(receiver).await;
        });

        Self {
            _dir: dir,
            spool,
            cache,
            ingress,
            shutdown,
        }
    }

    /// Submit one message through the ingress frontend; returns the reply
    /// to the DATA terminator.
    async fn send(&self, from: &str, to: &str, message: &[u8]) -> Response {
        let mut client = SmtpClient::connect(&self.ingress.to_string())
            .await
            .expect("connect ingress");

        assert!(client.read_response().await.expect("greeting").is_success());
        assert!(client.helo("mta.test").await.expect("helo").is_success());
        assert!(client.mail_from(from).await.expect("mail").is_success());
        assert!(client.rcpt_to(to).await.expect("rcpt").is_success());
        assert!(client.data().await.expect("data").is_data_go_ahead());

        let reply = client.send_data(message).await.expect("send data");
        let _ = client.quit().await;
        reply
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = self.shutdown.send(Signal::Shutdown);
    }
}

const INGRESS_MESSAGE: &[u8] = b"Received: from mta by filter with ESMTP id INGRESS1\r\n\
Subject: hello\r\n\
From: a@x.org\r\n\
To: b@y.net\r\n\
\r\n\
body line\r\n";

fn default_policy() -> DispositionPolicy {
    DispositionPolicy::default()
}

#[tokio::test]
async fn clean_mail_is_reinjected_untagged() {
    let mock = MockSmtpServer::start().await;
    let policy = Arc::new(default_policy());

    let filter = Scoring::new("neutral", 0.0, &policy);
    let harness = Harness::start(
        default_policy(),
        vec![filter.clone()],
        mock.addr().to_string(),
        None,
    )
    .await;

    let reply = harness.send("a@x.org", "b@y.net", INGRESS_MESSAGE).await;
    assert!(reply.is_success(), "got {reply:?}");

    mock.wait_for_messages(1, Duration::from_secs(5)).await;
    let delivered = mock.messages().await;
    assert_eq!(delivered[0].from, "a@x.org");
    assert_eq!(delivered[0].to, ["b@y.net"]);
    assert_eq!(delivered[0].header("X-Decency-Result"), None);
    assert!(delivered[0].data.contains("body line"));
    assert_eq!(filter.calls(), 1);
}

#[tokio::test]
async fn threshold_crossing_tags_and_reinjects() {
    let mock = MockSmtpServer::start().await;

    let policy = DispositionPolicy {
        spam: SpamPolicy {
            behavior: SpamBehavior::Scoring,
            threshold: -150.0,
            handle: SpamHandle::Tag,
            subject_prefix: Some("[SPAM]".to_string()),
        },
        ..default_policy()
    };
    let shared = Arc::new(policy.clone());

    let first = Scoring::new("first", -60.0, &shared);
    let second = Scoring::new("second", -100.0, &shared);

    let harness = Harness::start(
        policy,
        vec![first, second],
        mock.addr().to_string(),
        None,
    )
    .await;

    let reply = harness.send("a@x.org", "b@y.net", INGRESS_MESSAGE).await;
    assert!(reply.is_success(), "tagged spam is still accepted: {reply:?}");

    mock.wait_for_messages(1, Duration::from_secs(5)).await;
    let delivered = mock.messages().await;
    assert_eq!(delivered[0].header("X-Decency-Result").as_deref(), Some("SPAM"));
    assert_eq!(delivered[0].header("X-Decency-Score").as_deref(), Some("-160"));
    assert_eq!(delivered[0].header("Subject").as_deref(), Some("[SPAM] hello"));

    // The downstream queue-id became the successor entry, linked back to
    // the ingress queue-id.
    let successor: QueueEntry = harness
        .cache
        .get(&QueueEntry::key(MOCK_QUEUE_ID))
        .await
        .expect("cache read")
        .expect("successor entry");
    assert_eq!(successor.prev_id.as_deref(), Some("INGRESS1"));
}

#[tokio::test]
async fn strict_behavior_bounces_on_the_first_negative_score() {
    let mock = MockSmtpServer::start().await;

    let policy = DispositionPolicy {
        spam: SpamPolicy {
            behavior: SpamBehavior::Strict,
            handle: SpamHandle::Bounce,
            ..SpamPolicy::default()
        },
        ..default_policy()
    };
    let shared = Arc::new(policy.clone());

    let first = Scoring::new("first", -1.0, &shared);
    let second = Scoring::new("second", -100.0, &shared);

    let harness = Harness::start(
        policy,
        vec![first.clone(), second.clone()],
        mock.addr().to_string(),
        None,
    )
    .await;

    let reply = harness.send("a@x.org", "b@y.net", INGRESS_MESSAGE).await;
    assert!(reply.is_permanent_error(), "got {reply:?}");

    assert_eq!(first.calls(), 1);
    assert_eq!(second.calls(), 0);
    assert_eq!(mock.message_count().await, 0);
}

#[tokio::test]
async fn quarantined_viruses_never_reach_the_downstream() {
    let mock = MockSmtpServer::start().await;

    let policy = DispositionPolicy {
        virus: VirusPolicy {
            handle: VirusHandle::Quarantine,
        },
        ..default_policy()
    };

    let harness = Harness::start(
        policy,
        vec![Arc::new(VirusRaiser("Eicar-Test".to_string()))],
        mock.addr().to_string(),
        None,
    )
    .await;

    let reply = harness.send("a@x.org", "b@y.net", INGRESS_MESSAGE).await;
    assert!(reply.is_success(), "quarantine is silent: {reply:?}");
    assert_eq!(mock.message_count().await, 0);

    let quarantined: Vec<_> = std::fs::read_dir(harness.spool.quarantine())
        .expect("quarantine dir")
        .collect();
    assert_eq!(quarantined.len(), 1);
    let name = quarantined[0].as_ref().expect("entry").file_name();
    assert!(
        name.to_string_lossy()
            .contains("_FROM_a-at-x.org_TO_b-at-y.net-")
    );
}

#[tokio::test]
async fn reinjection_failure_rejects_and_keeps_a_recovery_copy() {
    // Bind-then-drop leaves a dead target port.
    let dead = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let target = dead.local_addr().expect("addr").to_string();
    drop(dead);

    let harness = Harness::start(default_policy(), vec![], target, None).await;

    let reply = harness.send("a@x.org", "b@y.net", INGRESS_MESSAGE).await;
    assert!(reply.is_permanent_error(), "got {reply:?}");
    assert!(reply.message().contains("re-injection failed"));

    assert_eq!(
        std::fs::read_dir(harness.spool.failure()).expect("failure dir").count(),
        1
    );
}

#[tokio::test]
async fn forged_scoring_headers_contribute_nothing() {
    use base64::Engine as _;

    let mock = MockSmtpServer::start().await;

    // A verifier whose key never signed anything in this test.
    let mut rng = rand::thread_rng();
    let private = rsa::RsaPrivateKey::new(&mut rng, 2048).expect("keygen");
    let pem = rsa::pkcs8::EncodePublicKey::to_public_key_pem(
        &private.to_public_key(),
        rsa::pkcs8::LineEnding::LF,
    )
    .expect("pem");
    let verifier = PolicyScoringVerifier::from_pem(&pem).expect("verifier");

    let policy = DispositionPolicy {
        noisy_headers: true,
        ..default_policy()
    };

    let harness = Harness::start(policy, vec![], mock.addr().to_string(), Some(verifier)).await;

    let forged_payload = base64::engine::general_purpose::STANDARD.encode(
        br#"{"queue_id":"INGRESS1","score":-500.0,"details":["forged"]}"#,
    );
    let message = format!(
        "Received: from mta by filter with ESMTP id INGRESS1\r\n\
         X-Decency-Scoring: {forged_payload}\r\n\
         X-Decency-Scoring-Signature: Zm9yZ2Vk\r\n\
         Subject: hello\r\n\
         \r\n\
         body\r\n"
    );

    let reply = harness.send("a@x.org", "b@y.net", message.as_bytes()).await;
    assert!(reply.is_success(), "got {reply:?}");

    mock.wait_for_messages(1, Duration::from_secs(5)).await;
    let delivered = mock.messages().await;

    // The forged score was dropped: the session stayed at zero.
    assert_eq!(delivered[0].header("X-Decency-Result").as_deref(), Some("GOOD"));
    assert_eq!(delivered[0].header("X-Decency-Score").as_deref(), Some("0"));
}
