//! End-to-end tests: a real TCP listener on an ephemeral port with the
//! in-memory bus and blob store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use flux_blob::MemoryBlobStore;
use flux_bus::MemoryBus;
use flux_core::BusPort;
use flux_gateway::{metrics, start, GatewayConfig, GatewayHandle, SessionConfig};
use flux_telemetry::MetricsRecorder;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const TOPIC: &str = "flux_messages";

struct TestGateway {
    handle: GatewayHandle,
    bus: Arc<MemoryBus>,
    blob: Arc<MemoryBlobStore>,
    metrics: Arc<MetricsRecorder>,
}

fn test_config(grace: Duration) -> GatewayConfig {
    GatewayConfig {
        listen_addr: "127.0.0.1:0".into(),
        session: SessionConfig {
            poll_retry: Duration::from_millis(5),
            ..Default::default()
        },
        shutdown_grace: grace,
    }
}

async fn spawn_gateway_with(config: GatewayConfig, bus_capacity: usize) -> TestGateway {
    let bus = Arc::new(MemoryBus::new(bus_capacity));
    let blob = Arc::new(MemoryBlobStore::new());
    let metrics = Arc::new(MetricsRecorder::new());
    let handle = start(config, bus.clone(), blob.clone(), metrics.clone())
        .await
        .expect("gateway starts");
    TestGateway {
        handle,
        bus,
        blob,
        metrics,
    }
}

async fn spawn_gateway() -> TestGateway {
    spawn_gateway_with(test_config(Duration::from_secs(2)), 1024).await
}

async fn eventually(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for: {what}");
}

/// Connect and wait until the session's forwarder is subscribed.
async fn connect(gw: &TestGateway) -> TcpStream {
    let before = gw.bus.subscriber_count(TOPIC);
    let stream = TcpStream::connect(gw.handle.local_addr())
        .await
        .expect("connect");
    eventually("forwarder subscribed", || {
        gw.bus.subscriber_count(TOPIC) > before
    })
    .await;
    stream
}

async fn read_exact_timeout(stream: &mut TcpStream, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .expect("read timed out")
        .expect("read failed");
    buf
}

fn published(gw: &TestGateway) -> Vec<Bytes> {
    gw.bus.published_on(TOPIC)
}

// ── Relay ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn plain_line_is_published_exactly_once() {
    let gw = spawn_gateway().await;
    let mut client = connect(&gw).await;

    client.write_all(b"hello\n").await.unwrap();
    eventually("publish", || !published(&gw).is_empty()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(published(&gw), vec![Bytes::from_static(b"hello")]);
    assert_eq!(gw.metrics.counter_get(metrics::LINES_RELAYED, &[]), 1);
}

#[tokio::test]
async fn surrounding_whitespace_relays_identically() {
    let gw = spawn_gateway().await;
    let mut client = connect(&gw).await;

    client.write_all(b" hello \nhello\n\t\n").await.unwrap();
    eventually("two publishes", || published(&gw).len() == 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let lines = published(&gw);
    assert_eq!(lines.len(), 2, "blank line must not be published");
    assert_eq!(lines[0], lines[1]);
    assert_eq!(lines[0], Bytes::from_static(b"hello"));
}

#[tokio::test]
async fn embedded_command_prefix_is_relayed() {
    let gw = spawn_gateway().await;
    let mut client = connect(&gw).await;

    client.write_all(b"see UPLOAD:a.txt\n").await.unwrap();
    eventually("publish", || !published(&gw).is_empty()).await;

    assert_eq!(published(&gw), vec![Bytes::from_static(b"see UPLOAD:a.txt")]);
    assert!(gw.blob.is_empty());
}

#[tokio::test]
async fn bus_messages_fan_out_as_lines() {
    let gw = spawn_gateway().await;
    let mut alice = connect(&gw).await;
    let mut bob = connect(&gw).await;

    alice.write_all(b"from alice\n").await.unwrap();

    assert_eq!(read_exact_timeout(&mut bob, 11).await, b"from alice\n");
    assert_eq!(read_exact_timeout(&mut alice, 11).await, b"from alice\n");

    gw.bus
        .publish(TOPIC, Bytes::from_static(b"one"))
        .await
        .unwrap();
    gw.bus
        .publish(TOPIC, Bytes::from_static(b"two"))
        .await
        .unwrap();
    assert_eq!(read_exact_timeout(&mut bob, 8).await, b"one\ntwo\n");
}

#[tokio::test]
async fn publish_failure_does_not_end_session() {
    let gw = spawn_gateway().await;
    let mut client = connect(&gw).await;
    gw.bus.inject_publish_failures(1);

    client.write_all(b"first\nsecond\n").await.unwrap();
    eventually("second publish", || !published(&gw).is_empty()).await;

    assert_eq!(published(&gw), vec![Bytes::from_static(b"second")]);
    assert_eq!(
        gw.metrics
            .counter_get(metrics::RELAY_ERRORS, &[("kind", "network")]),
        1
    );
}

#[tokio::test]
async fn poll_errors_do_not_end_session() {
    let gw = spawn_gateway().await;
    gw.bus.inject_poll_failures(5);
    let mut client = connect(&gw).await;

    eventually("poll failures consumed", || gw.bus.pending_poll_failures() == 0).await;

    client.write_all(b"still alive\n").await.unwrap();
    eventually("publish", || !published(&gw).is_empty()).await;
    assert_eq!(published(&gw), vec![Bytes::from_static(b"still alive")]);

    // Forwarding resumed too: the echo of our own line comes back.
    assert_eq!(read_exact_timeout(&mut client, 12).await, b"still alive\n");
    assert!(gw.metrics.counter_get(metrics::POLL_ERRORS, &[("kind", "network")]) >= 4);
}

// ── Upload / download ───────────────────────────────────────────────────────

#[tokio::test]
async fn upload_stores_block() {
    let gw = spawn_gateway().await;
    let mut client = connect(&gw).await;

    client.write_all(b"UPLOAD:a.txt\nhi\n").await.unwrap();
    eventually("blob stored", || gw.blob.get("a.txt").is_some()).await;

    assert_eq!(gw.blob.get("a.txt").unwrap(), Bytes::from_static(b"hi"));
    assert!(published(&gw).is_empty());
}

#[tokio::test]
async fn upload_then_download_round_trips_and_reports_metric() {
    let gw = spawn_gateway().await;
    let mut client = connect(&gw).await;

    client
        .write_all(b"UPLOAD:a.txt\nhi\nDOWNLOAD:a.txt\n")
        .await
        .unwrap();

    assert_eq!(read_exact_timeout(&mut client, 2).await, b"hi");
    eventually("metric reported", || !gw.blob.reported_metrics().is_empty()).await;

    let reported = gw.blob.reported_metrics();
    assert_eq!(reported.len(), 1);
    assert!(reported[0] > 0.0);
    assert_eq!(
        gw.metrics
            .histogram_summary(metrics::DOWNLOAD_SPEED, &[])
            .count,
        1
    );
}

#[tokio::test]
async fn upload_then_download_preserves_raw_bytes() {
    let gw = spawn_gateway().await;
    let mut client = connect(&gw).await;

    let payloads: [&[u8]; 5] = [
        b" \x00\xff\r\tz ",
        b"  leading spaces",
        b"trailing whitespace\t ",
        b"\xc3\x28\xfe\xfd",
        b"\r",
    ];
    for (i, payload) in payloads.iter().enumerate() {
        let name = format!("raw-{i}.bin");
        let mut request = format!("UPLOAD:{name}\n").into_bytes();
        request.extend_from_slice(payload);
        request.extend_from_slice(format!("\nDOWNLOAD:{name}\n").as_bytes());
        client.write_all(&request).await.unwrap();

        let received = read_exact_timeout(&mut client, payload.len()).await;
        assert_eq!(&received[..], *payload, "payload {i} changed in transit");
        assert_eq!(gw.blob.get(&name).unwrap(), Bytes::copy_from_slice(payload));
    }
    eventually("every download reported", || {
        gw.blob.reported_metrics().len() == payloads.len()
    })
    .await;
}

#[tokio::test]
async fn unknown_download_keeps_session() {
    let gw = spawn_gateway().await;
    let mut client = connect(&gw).await;

    client
        .write_all(b"DOWNLOAD:missing.bin\nafter\n")
        .await
        .unwrap();
    eventually("publish", || !published(&gw).is_empty()).await;

    assert_eq!(published(&gw), vec![Bytes::from_static(b"after")]);
    assert!(gw.blob.reported_metrics().is_empty());
    assert_eq!(
        gw.metrics
            .counter_get(metrics::DOWNLOADS, &[("outcome", "error")]),
        1
    );
    // Only the forwarded echo arrives; the failed download wrote nothing.
    assert_eq!(read_exact_timeout(&mut client, 6).await, b"after\n");
}

#[tokio::test]
async fn store_failure_keeps_session() {
    let gw = spawn_gateway().await;
    let mut client = connect(&gw).await;
    gw.blob.inject_store_failures(1);

    client
        .write_all(b"UPLOAD:a\nfirst\nUPLOAD:a\nsecond\n")
        .await
        .unwrap();
    eventually("second upload stored", || gw.blob.get("a").is_some()).await;

    assert_eq!(gw.blob.get("a").unwrap(), Bytes::from_static(b"second"));
    assert_eq!(
        gw.metrics
            .counter_get(metrics::UPLOADS, &[("outcome", "error")]),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn download_is_contiguous_under_bus_traffic() {
    const SIZE: usize = 10_000;
    let gw = spawn_gateway_with(test_config(Duration::from_secs(2)), 4096).await;
    gw.blob.insert("big.bin", vec![b'#'; SIZE]);
    let mut client = connect(&gw).await;

    let stop = Arc::new(AtomicBool::new(false));
    let publisher = {
        let bus = gw.bus.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            let mut n = 0u64;
            while !stop.load(Ordering::Relaxed) {
                let _ = bus.publish(TOPIC, Bytes::from(format!("msg-{n}"))).await;
                n += 1;
                if n % 16 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        })
    };

    // Let the stream get going before asking for the blob.
    tokio::time::sleep(Duration::from_millis(20)).await;
    client.write_all(b"DOWNLOAD:big.bin\n").await.unwrap();

    let mut received = Vec::new();
    let mut chunk = vec![0u8; 8192];
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while received.iter().filter(|&&b| b == b'#').count() < SIZE {
        let n = tokio::time::timeout_at(deadline, client.read(&mut chunk))
            .await
            .expect("download did not arrive in time")
            .unwrap();
        assert!(n > 0, "connection closed early");
        received.extend_from_slice(&chunk[..n]);
    }
    stop.store(true, Ordering::Relaxed);
    publisher.await.unwrap();

    let start = received.iter().position(|&b| b == b'#').unwrap();
    assert!(
        received[start..start + SIZE].iter().all(|&b| b == b'#'),
        "download payload was interleaved with forwarded messages"
    );
    // Everything before the block is whole forwarded lines.
    let before = &received[..start];
    assert!(before.is_empty() || before.ends_with(b"\n"));
    for line in before.split(|&b| b == b'\n').filter(|l| !l.is_empty()) {
        assert!(line.starts_with(b"msg-"), "unexpected line: {line:?}");
    }
}

// ── Lifecycle ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn disconnect_unregisters_session() {
    let gw = spawn_gateway().await;
    let client = connect(&gw).await;
    eventually("session registered", || gw.handle.session_count() == 1).await;

    drop(client);
    eventually("session removed", || gw.handle.session_count() == 0).await;
    eventually("subscription released", || gw.bus.subscriber_count(TOPIC) == 0).await;
    eventually("close recorded", || {
        gw.metrics
            .counter_get(metrics::CONNECTIONS_CLOSED, &[("reason", "peer_closed")])
            == 1
    })
    .await;
    assert_eq!(gw.metrics.gauge_get(metrics::SESSIONS_ACTIVE, &[]), 0.0);
}

#[tokio::test]
async fn shutdown_stops_accepting_and_closes_idle_sessions() {
    let gw = spawn_gateway().await;
    let addr = gw.handle.local_addr();
    let mut client = connect(&gw).await;

    assert!(gw.handle.shutdown().await);

    let mut buf = [0u8; 1];
    let n = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
        .await
        .expect("session did not close")
        .unwrap_or(0);
    assert_eq!(n, 0);

    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn shutdown_grace_bounds_a_stalled_upload() {
    let gw = spawn_gateway_with(test_config(Duration::from_millis(100)), 1024).await;
    let mut client = connect(&gw).await;

    // The session is now waiting for the upload block, which never comes.
    client.write_all(b"UPLOAD:stalled\n").await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(!gw.handle.shutdown().await);
    drop(client);
}
