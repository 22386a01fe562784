//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use insure_reliability::clock::ManualClock;
use insure_reliability::config::ReliabilityConfig;
use insure_reliability::outbox::OutboxPublisher;
use insure_reliability::store::InMemoryStore;
use insure_reliability::topic::InMemoryTopic;
use insure_reliability::IdempotencyManager;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Start a programmable mock downstream service on an ephemeral port.
///
/// `f` receives the 1-based request number and returns the status and JSON
/// body to answer with. Returns the bound address and the hit counter.
pub async fn start_programmable_backend<F, Fut>(f: F) -> (SocketAddr, Arc<AtomicU32>)
where
    F: Fn(u32) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicU32::new(0));
    let f = Arc::new(f);

    let counter = hits.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::spawn(async move {
                read_request(&mut socket).await;

                let (status, body) = f(n).await;
                let status_text = match status {
                    200 => "200 OK",
                    400 => "400 Bad Request",
                    404 => "404 Not Found",
                    429 => "429 Too Many Requests",
                    500 => "500 Internal Server Error",
                    502 => "502 Bad Gateway",
                    503 => "503 Service Unavailable",
                    _ => "200 OK",
                };

                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_text,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
                tokio::time::sleep(Duration::from_millis(10)).await;
            });
        }
    });

    (addr, hits)
}

/// Consume the request head and body so closing the socket does not reset
/// the connection under the client.
async fn read_request(socket: &mut TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];

    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_ascii_lowercase();
    let content_length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < head_end + content_length {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

/// In-memory store, topic and clock wired into an outbox publisher and an
/// idempotency manager.
pub struct Harness {
    pub config: ReliabilityConfig,
    pub store: InMemoryStore,
    pub topic: InMemoryTopic,
    pub clock: ManualClock,
    pub publisher: Arc<OutboxPublisher>,
    pub idempotency: Arc<IdempotencyManager>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ReliabilityConfig::default())
    }

    pub fn with_config(config: ReliabilityConfig) -> Self {
        let store = InMemoryStore::new();
        let topic = InMemoryTopic::new();
        let clock = ManualClock::default();

        let publisher = Arc::new(OutboxPublisher::new(
            Arc::new(store.clone()),
            Arc::new(topic.clone()),
            Arc::new(clock.clone()),
            &config.service,
            &config.outbox,
            &config.timeouts,
        ));
        let idempotency = Arc::new(IdempotencyManager::new(
            Arc::new(store.clone()),
            Arc::new(clock.clone()),
            &config.service,
            &config.idempotency,
            &config.timeouts,
        ));

        Self {
            config,
            store,
            topic,
            clock,
            publisher,
            idempotency,
        }
    }
}
