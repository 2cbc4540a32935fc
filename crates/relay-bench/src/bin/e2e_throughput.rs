//! End-to-end throughput benchmark for Relay.
//!
//! Connects WebSocket clients to a running server, has each one broadcast
//! binary frames as fast as it can, and counts the messages delivered.

use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use relay_protocol::{codec, Frame};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:8443/ws";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let url = args
        .get(2)
        .cloned()
        .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());

    println!("Relay end-to-end throughput benchmark");
    println!("Server: {} (start it with `cargo run --release --bin relay`)", url);
    println!();

    run_broadcast_benchmark(num_clients, url).await;
}

async fn run_broadcast_benchmark(num_clients: usize, url: String) {
    println!("Broadcast benchmark: {} clients", num_clients);
    println!("  Warmup: {}s, Measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let delivered = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::new();

    for client in 0..num_clients {
        let delivered = Arc::clone(&delivered);
        let barrier = Arc::clone(&barrier);
        let url = url.clone();

        handles.push(tokio::spawn(async move {
            if let Err(e) = run_client(&url, delivered, barrier).await {
                eprintln!("Client {} error: {}", client, e);
            }
        }));
    }

    // Wait for all clients to connect
    barrier.wait().await;
    println!("All {} clients connected", num_clients);

    println!("Warming up for {}s...", WARMUP_SECS);
    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    delivered.store(0, Ordering::SeqCst);
    let start = Instant::now();

    println!("Measuring for {}s...", BENCH_SECS);
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let total = delivered.load(Ordering::SeqCst);
    let per_sec = total as f64 / elapsed.as_secs_f64();

    println!();
    println!("Results");
    println!("  Clients:          {:>10}", num_clients);
    println!("  Duration:         {:>10.2}s", elapsed.as_secs_f64());
    println!("  Delivered:        {:>10}", total);
    println!("  Throughput:       {:>10.0} msg/s", per_sec);
    println!(
        "  Per-client:       {:>10.0} msg/s",
        per_sec / num_clients as f64
    );

    for handle in handles {
        handle.abort();
    }
}

async fn run_client(
    url: &str,
    delivered: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (ws, _) = connect_async(url).await?;
    let (mut sender, mut receiver) = ws.split();

    // The server greets every connection with a text welcome frame.
    match receiver.next().await {
        Some(Ok(Message::Text(text))) => match codec::decode_text(&text)? {
            Frame::Welcome { .. } => {}
            other => return Err(format!("expected welcome, got {}", other.frame_type()).into()),
        },
        other => return Err(format!("expected welcome, got {:?}", other).into()),
    }

    barrier.wait().await;

    // Sending binary switches the connection to binary replies.
    let broadcast = codec::encode(&Frame::broadcast("x".repeat(64)))?;
    let broadcast = Message::Binary(broadcast.to_vec());

    let recv_task = tokio::spawn(async move {
        let mut buf = BytesMut::with_capacity(65536);

        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Binary(data)) => {
                    buf.extend_from_slice(&data);
                    while let Ok(Some(frame)) = codec::decode_from(&mut buf) {
                        if matches!(frame, Frame::Message(_)) {
                            delivered.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                Ok(Message::Text(text)) => {
                    if let Ok(Frame::Message(_)) = codec::decode_text(&text) {
                        delivered.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    loop {
        if sender.send(broadcast.clone()).await.is_err() {
            break;
        }
        tokio::task::yield_now().await;
    }

    recv_task.abort();
    Ok(())
}
