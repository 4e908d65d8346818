//! End-to-end tests for subscription-daemon.
//!
//! Runs real WebSocket endpoints on localhost: handshakes, host message
//! routing, disconnects, and a full subscription exchange between two
//! daemons sharing native directories.

use std::sync::Arc;
use std::time::Duration;

use subscription_core::{open_store, PeerId, StoreBackend, SubscriptionKey, WatermarkStore};
use subscription_daemon::config::ShareConfig;
use subscription_daemon::{ConfiguredShares, Daemon, HostMessage, ServerEvent, WebSocketServer};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(300);

async fn listen() -> (TcpListener, String) {
    let listener = WebSocketServer::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    (listener, addr)
}

/// Dial `listener` from `client` and accept on `server`.
async fn connect_pair(
    client: &mut WebSocketServer,
    server: &mut WebSocketServer,
    listener: &TcpListener,
    addr: &str,
) {
    let accept = async {
        let (stream, peer_addr) = listener.accept().await.unwrap();
        server.accept_connection(stream, peer_addr).await;
    };
    let (dialed, ()) = tokio::join!(client.connect(addr), accept);
    dialed.unwrap();
}

async fn next_event(server: &mut WebSocketServer) -> ServerEvent {
    timeout(WAIT, server.poll_event())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

#[tokio::test]
async fn test_handshake_and_message_routing() {
    let (listener, addr) = listen().await;
    let mut a = WebSocketServer::new(PeerId::from(1));
    let mut b = WebSocketServer::new(PeerId::from(2));

    connect_pair(&mut b, &mut a, &listener, &addr).await;

    match next_event(&mut a).await {
        ServerEvent::PeerConnected { peer_id } => assert_eq!(peer_id, PeerId::from(2)),
        other => panic!("unexpected {:?}", other),
    }
    match next_event(&mut b).await {
        ServerEvent::PeerConnected { peer_id } => assert_eq!(peer_id, PeerId::from(1)),
        other => panic!("unexpected {:?}", other),
    }
    assert!(b.is_connected_to(&addr));
    assert_eq!(a.connected_peers(), vec![PeerId::from(2)]);

    b.send(PeerId::from(1), HostMessage::ShareListRequest).unwrap();
    match next_event(&mut a).await {
        ServerEvent::Message { peer_id, message } => {
            assert_eq!(peer_id, PeerId::from(2));
            assert_eq!(message, HostMessage::ShareListRequest);
        }
        other => panic!("unexpected {:?}", other),
    }

    a.send(
        PeerId::from(2),
        HostMessage::ShareList {
            names: vec!["music".into(), "shareX".into()],
        },
    )
    .unwrap();
    match next_event(&mut b).await {
        ServerEvent::Message { message, .. } => assert_eq!(
            message,
            HostMessage::ShareList {
                names: vec!["music".into(), "shareX".into()]
            }
        ),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_disconnect_reported() {
    let (listener, addr) = listen().await;
    let mut a = WebSocketServer::new(PeerId::from(1));
    let mut b = WebSocketServer::new(PeerId::from(2));

    connect_pair(&mut b, &mut a, &listener, &addr).await;
    next_event(&mut a).await;
    next_event(&mut b).await;

    drop(b);
    match next_event(&mut a).await {
        ServerEvent::PeerDisconnected { peer_id } => assert_eq!(peer_id, PeerId::from(2)),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(a.peer_count(), 0);
    assert!(a.send(PeerId::from(2), HostMessage::ShareListRequest).is_err());
}

#[tokio::test]
async fn test_self_connection_ignored() {
    let (listener, addr) = listen().await;
    let mut a = WebSocketServer::new(PeerId::from(1));
    let mut also_a = WebSocketServer::new(PeerId::from(1));

    connect_pair(&mut also_a, &mut a, &listener, &addr).await;
    assert!(timeout(QUIET, a.poll_event()).await.is_err());
    assert_eq!(a.peer_count(), 0);
}

/// Process events on one daemon until it has been quiet for a while.
async fn step(daemon: &mut Daemon) -> bool {
    match timeout(QUIET, daemon.server_mut().poll_event()).await {
        Ok(Some(event)) => {
            daemon.on_server_event(event).await;
            true
        }
        _ => false,
    }
}

async fn settle(a: &mut Daemon, b: &mut Daemon) {
    loop {
        let a_busy = step(a).await;
        let b_busy = step(b).await;
        if !a_busy && !b_busy {
            break;
        }
    }
}

fn open(dir: &TempDir, name: &str) -> Arc<dyn WatermarkStore> {
    Arc::from(open_store(StoreBackend::Sqlite, &dir.path().join(name)).unwrap())
}

#[tokio::test]
async fn test_subscription_exchange_between_daemons() {
    let dir = TempDir::new().unwrap();
    let share_root = dir.path().join("b-share");
    std::fs::create_dir_all(share_root.join("docs")).unwrap();
    std::fs::write(share_root.join("docs/report.pdf"), b"pdf").unwrap();

    let peer_a = PeerId::from(1001);
    let peer_b = PeerId::from(-2002);
    let (listener, addr) = listen().await;

    let mut a = Daemon::new(
        peer_a,
        open(&dir, "a.db"),
        Arc::new(ConfiguredShares::new(&[])),
        vec![addr.clone()],
    );
    let mut b = Daemon::new(
        peer_b,
        open(&dir, "b.db"),
        Arc::new(ConfiguredShares::new(&[ShareConfig {
            name: "shareX".into(),
            path: share_root,
        }])),
        Vec::new(),
    );

    let created = a
        .on_console_line(&format!("newfsub {} shareX docs/ \"/home/a/in\" 0", peer_b))
        .await
        .unwrap();
    assert!(created.starts_with("Created"), "{}", created);
    let duplicate = a
        .on_console_line(&format!("newfsub {} shareX docs/ /elsewhere", peer_b))
        .await
        .unwrap();
    assert!(duplicate.starts_with("Rejected"), "{}", duplicate);

    let accept = async {
        let (stream, peer_addr) = listener.accept().await.unwrap();
        b.server_mut().accept_connection(stream, peer_addr).await;
    };
    tokio::join!(a.redial(), accept);
    settle(&mut a, &mut b).await;

    let queued = a.downloads().drain();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].peer, peer_b);
    assert_eq!(queued[0].remote_path, "docs/report.pdf");
    assert_eq!(queued[0].destination, "/home/a/in");

    let key = SubscriptionKey::new(peer_b, "shareX", "docs/");
    let watermark = a.exchange().store().find(&key).unwrap().unwrap().watermark;
    assert!(watermark > 0);

    // Nothing changed, so a manual query schedules nothing new.
    let asked = a
        .on_console_line(&format!("times {} 0 docs/ {}", peer_b, watermark))
        .await
        .unwrap();
    assert!(asked.starts_with("Asked"), "{}", asked);
    settle(&mut a, &mut b).await;
    assert!(a.downloads().is_empty());

    let listing = a.on_console_line("getfsubs").await.unwrap();
    assert!(listing.contains("shareX"), "{}", listing);
}
