//! End-to-end tests for subscription-core.
//!
//! Two exchanges, A and B, are wired together through an in-process
//! loopback: everything one side sends is queued and delivered to the other
//! by `pump`, which also answers share-base requests the way a host would.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use subscription_core::host::Result as TransportResult;
use subscription_core::{
    open_store, ChangeMessage, ChangesQuery, ChangesReply, Downloads, Exchange, FileSystem,
    InMemoryFs, MessageOutcome, PeerId, PeerLink, ShareBases, StoreBackend, Subscription,
    SubscriptionKey, WatermarkStore,
};
use tempfile::TempDir;

const PEER_A: i64 = 1001;
const PEER_B: i64 = 2002;

/// Something one node asked the host to deliver.
#[derive(Debug, Clone)]
enum Wire {
    Frame(Vec<u8>),
    ShareListRequest,
}

/// Shared queue of (from, to, wire) triples.
#[derive(Default)]
struct Mailbox(Mutex<VecDeque<(PeerId, PeerId, Wire)>>);

impl Mailbox {
    fn push(&self, from: PeerId, to: PeerId, wire: Wire) {
        self.0.lock().unwrap().push_back((from, to, wire));
    }

    fn pop(&self) -> Option<(PeerId, PeerId, Wire)> {
        self.0.lock().unwrap().pop_front()
    }
}

struct LoopbackLink {
    me: PeerId,
    mailbox: Arc<Mailbox>,
    frames_sent: Mutex<Vec<Vec<u8>>>,
}

#[async_trait]
impl PeerLink for LoopbackLink {
    async fn send(&self, peer: PeerId, data: Vec<u8>) -> TransportResult<()> {
        self.frames_sent.lock().unwrap().push(data.clone());
        self.mailbox.push(self.me, peer, Wire::Frame(data));
        Ok(())
    }

    async fn request_share_bases(&self, peer: PeerId) -> TransportResult<()> {
        self.mailbox.push(self.me, peer, Wire::ShareListRequest);
        Ok(())
    }

    async fn request_hashes(&self, _peer: PeerId, _share_index: u32, _path: &str) -> TransportResult<()> {
        Ok(())
    }
}

struct Shares(Vec<(String, Arc<InMemoryFs>)>);

impl ShareBases for Shares {
    fn resolve(&self, index: u32) -> Option<Arc<dyn FileSystem>> {
        self.0
            .get(index as usize)
            .map(|(_, fs)| fs.clone() as Arc<dyn FileSystem>)
    }

    fn names(&self) -> Vec<String> {
        self.0.iter().map(|(name, _)| name.clone()).collect()
    }
}

#[derive(Default)]
struct Scheduled(Mutex<Vec<(String, String)>>);

impl Downloads for Scheduled {
    fn schedule(&self, _peer: PeerId, destination: &str, remote_path: &str) {
        self.0
            .lock()
            .unwrap()
            .push((destination.to_string(), remote_path.to_string()));
    }
}

struct Node {
    id: PeerId,
    exchange: Exchange,
    shares: Arc<Shares>,
    link: Arc<LoopbackLink>,
    downloads: Arc<Scheduled>,
}

impl Node {
    fn new(
        id: i64,
        store: Arc<dyn WatermarkStore>,
        shares: Vec<(String, Arc<InMemoryFs>)>,
        mailbox: Arc<Mailbox>,
    ) -> Self {
        let id = PeerId::from(id);
        let shares = Arc::new(Shares(shares));
        let link = Arc::new(LoopbackLink {
            me: id,
            mailbox,
            frames_sent: Mutex::new(Vec::new()),
        });
        let downloads = Arc::new(Scheduled::default());
        let exchange = Exchange::new(store, link.clone(), shares.clone(), downloads.clone());
        Self {
            id,
            exchange,
            shares,
            link,
            downloads,
        }
    }

    fn sent_messages(&self) -> Vec<ChangeMessage> {
        self.link
            .frames_sent
            .lock()
            .unwrap()
            .iter()
            .map(|frame| ChangeMessage::decode(frame).unwrap().unwrap())
            .collect()
    }
}

/// Deliver queued traffic until both sides fall silent.
async fn pump(mailbox: &Mailbox, nodes: [&Node; 2]) {
    while let Some((from, to, wire)) = mailbox.pop() {
        let receiver = nodes.iter().find(|n| n.id == to).expect("unknown receiver");
        let sender = nodes.iter().find(|n| n.id == from).expect("unknown sender");
        match wire {
            Wire::Frame(data) => {
                // Failures are logged by the exchange and must not stop traffic.
                let _ = receiver.exchange.on_message(from, &data).await;
            }
            Wire::ShareListRequest => {
                sender
                    .exchange
                    .on_share_list(to, receiver.shares.names())
                    .await
                    .unwrap();
            }
        }
    }
}

struct Scenario {
    mailbox: Arc<Mailbox>,
    a: Node,
    b: Node,
    b_share: Arc<InMemoryFs>,
    // Dropped last so snapshot stores can save on drop.
    _dir: TempDir,
}

fn scenario(backend: StoreBackend, b_exports: &[&str]) -> Scenario {
    let dir = TempDir::new().unwrap();
    let mailbox = Arc::new(Mailbox::default());

    let store_a: Arc<dyn WatermarkStore> =
        Arc::from(open_store(backend, &dir.path().join("a.store")).unwrap());
    store_a
        .create(&Subscription::new(
            PeerId::from(PEER_B),
            "shareX",
            "docs/",
            "/home/a/in",
            1000,
        ))
        .unwrap();
    let store_b: Arc<dyn WatermarkStore> =
        Arc::from(open_store(backend, &dir.path().join("b.store")).unwrap());

    let b_share = Arc::new(InMemoryFs::new());
    b_share.add_dir("docs", 900);
    b_share.add_file("docs/report.pdf", 2000);
    b_share.add_file("docs/seen.txt", 800);

    let b_shares = b_exports
        .iter()
        .map(|name| (name.to_string(), b_share.clone()))
        .collect();

    let a = Node::new(PEER_A, store_a, Vec::new(), mailbox.clone());
    let b = Node::new(PEER_B, store_b, b_shares, mailbox.clone());
    Scenario {
        mailbox,
        a,
        b,
        b_share,
        _dir: dir,
    }
}

fn key() -> SubscriptionKey {
    SubscriptionKey::new(PeerId::from(PEER_B), "shareX", "docs/")
}

async fn full_exchange(backend: StoreBackend) {
    let s = scenario(backend, &["shareX"]);

    s.a.exchange.on_peer_connected(s.b.id).await.unwrap();
    pump(&s.mailbox, [&s.a, &s.b]).await;

    assert_eq!(
        s.a.sent_messages(),
        vec![ChangeMessage::Query(ChangesQuery::new(0, "docs/", 1000))]
    );
    assert_eq!(
        s.b.sent_messages(),
        vec![ChangeMessage::Reply(ChangesReply::new(
            0,
            "docs/",
            2000,
            vec!["report.pdf".into()]
        ))]
    );
    assert_eq!(
        *s.a.downloads.0.lock().unwrap(),
        vec![("/home/a/in".to_string(), "docs/report.pdf".to_string())]
    );
    let stored = s.a.exchange.store().find(&key()).unwrap().unwrap();
    assert_eq!(stored.watermark, 2000);
    assert_eq!(stored.local_destination, "/home/a/in");
}

#[tokio::test]
async fn test_full_exchange_sqlite() {
    full_exchange(StoreBackend::Sqlite).await;
}

#[tokio::test]
async fn test_full_exchange_snapshot() {
    full_exchange(StoreBackend::Snapshot).await;
}

async fn translation_failure(backend: StoreBackend) {
    let s = scenario(backend, &["music"]);

    s.a.exchange.on_peer_connected(s.b.id).await.unwrap();
    pump(&s.mailbox, [&s.a, &s.b]).await;

    assert!(s.a.sent_messages().is_empty());
    assert!(s.a.downloads.0.lock().unwrap().is_empty());
    assert_eq!(
        s.a.exchange.store().find(&key()).unwrap().unwrap().watermark,
        1000
    );
}

#[tokio::test]
async fn test_translation_failure_sqlite() {
    translation_failure(StoreBackend::Sqlite).await;
}

#[tokio::test]
async fn test_translation_failure_snapshot() {
    translation_failure(StoreBackend::Snapshot).await;
}

#[tokio::test]
async fn test_reconnect_picks_up_new_files_only() {
    let s = scenario(StoreBackend::Sqlite, &["shareX"]);

    s.a.exchange.on_peer_connected(s.b.id).await.unwrap();
    pump(&s.mailbox, [&s.a, &s.b]).await;
    s.a.exchange.on_peer_disconnected(s.b.id);

    s.b_share.add_file("docs/later.md", 3000);
    s.a.exchange.on_peer_connected(s.b.id).await.unwrap();
    pump(&s.mailbox, [&s.a, &s.b]).await;

    let messages = s.a.sent_messages();
    assert_eq!(
        messages.last(),
        Some(&ChangeMessage::Query(ChangesQuery::new(0, "docs/", 2000)))
    );
    let downloads = s.a.downloads.0.lock().unwrap().clone();
    assert_eq!(
        downloads.iter().map(|(_, path)| path.as_str()).collect::<Vec<_>>(),
        vec!["docs/report.pdf", "docs/later.md"]
    );
    assert_eq!(s.a.exchange.store().find(&key()).unwrap().unwrap().watermark, 3000);
}

#[tokio::test]
async fn test_repeated_query_is_idempotent() {
    let s = scenario(StoreBackend::Snapshot, &["shareX"]);

    for _ in 0..2 {
        let outcome = s
            .b
            .exchange
            .on_message(
                s.a.id,
                &ChangeMessage::from(ChangesQuery::new(0, "docs/", 1000)).encode(),
            )
            .await
            .unwrap();
        assert_eq!(outcome, MessageOutcome::Answered { changed: 1 });
    }

    let replies = s.b.sent_messages();
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0], replies[1]);
}
