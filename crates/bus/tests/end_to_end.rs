//! End-to-end scenarios run against real sockets (TCP/UDP) rather than the
//! in-process transport the unit tests in `src/rpc.rs`/`src/pubsub.rs` lean
//! on. These mirror the literal scenarios named for the runtime's testable
//! properties: a TCP RPC happy path, UDP broadcast fan-out to several
//! subscribers, a connect timeout, framing reassembly over a real stream,
//! and mass teardown cancellation.

use std::sync::atomic::{AtomicI32, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bus::{PendingOutcome, RpcClient, RpcServer};
use reactor::config::Address;

fn encode_pair(a: i32, b: i32) -> Vec<u8> {
    let mut out = Vec::with_capacity(8);
    out.extend_from_slice(&a.to_be_bytes());
    out.extend_from_slice(&b.to_be_bytes());
    out
}

fn decode_i32(bytes: &[u8]) -> i32 {
    i32::from_be_bytes(bytes.try_into().unwrap())
}

/// Scenario 1: TCP RPC happy path. Server binds `tcp://127.0.0.1:<port>`,
/// registers `Add`; client connects and calls `Add(42, 58)`; expect `100`
/// well within the 500ms budget.
#[tokio::test]
async fn tcp_rpc_happy_path() {
    let addr = Address::parse("tcp://127.0.0.1:28551").unwrap();
    let server = RpcServer::bind(&addr).await.unwrap();
    server.on("Add", |params, reply| {
        let a = decode_i32(&params[..4]);
        let b = decode_i32(&params[4..]);
        reply.reply_ok((a + b).to_be_bytes().to_vec()).unwrap();
    });

    let client = RpcClient::connect(&addr, 1_000, 0).await.unwrap();
    let result = Arc::new(std::sync::Mutex::new(None));
    let result_cb = result.clone();
    let done = Arc::new(tokio::sync::Notify::new());
    let done_cb = done.clone();

    let started = Instant::now();
    client
        .call(
            "Add",
            encode_pair(42, 58),
            Arc::new(move |outcome| {
                *result_cb.lock().unwrap() = Some(outcome);
                done_cb.notify_one();
            }),
        )
        .unwrap();

    tokio::time::timeout(Duration::from_millis(500), done.notified()).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(500));

    match result.lock().unwrap().take().unwrap() {
        PendingOutcome::Response(bytes) => assert_eq!(decode_i32(&bytes), 100),
        other => panic!("unexpected outcome: {other:?}"),
    }

    client.close();
    server.close();
}

/// Scenario 2: UDP broadcast fan-out. A publisher binds one UDP socket;
/// three subscribers connect (each sending its registration sentinel) and
/// subscribe to `"PublishNews"`. Publishing once must reach every
/// subscriber's callback exactly once.
#[tokio::test]
async fn udp_broadcast_fan_out_to_three_subscribers() {
    let addr = Address::parse("udp://127.0.0.1:28552").unwrap();
    let publisher = bus::pubsub::Publisher::bind(&addr).await.unwrap();

    let mut subscribers = Vec::new();
    let mut counters = Vec::new();
    for _ in 0..3 {
        let subscriber = bus::pubsub::Subscriber::connect(&addr, 1_000).await.unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_cb = hits.clone();
        subscriber.subscribe(
            "PublishNews",
            Arc::new(move |payload| {
                assert!(!payload.is_empty());
                hits_cb.fetch_add(1, Ordering::SeqCst);
            }),
        );
        counters.push(hits);
        subscribers.push(subscriber);
    }

    // Give the server a moment to learn every subscriber's address from its
    // registration sentinel before the publish fans out.
    tokio::time::sleep(Duration::from_millis(100)).await;

    publisher.publish("PublishNews", b"{title:T,content:C}".to_vec()).unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    for hits in &counters {
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    for s in &subscribers {
        s.close();
    }
    publisher.close();
}

/// Scenario 4: connect timeout. `127.0.0.1:1` refuses instantly and never
/// exercises the watchdog; a TEST-NET-3 address with no route back
/// (`10.255.255.1`, RFC 5737-adjacent martian space) is silently dropped
/// instead, so the client with `timeout_ms=200` must hit the watchdog
/// itself and report `ErrorKind::Timeout`, not an immediate IO refusal.
#[tokio::test]
async fn connect_to_unreachable_address_resolves_within_budget() {
    let addr = Address::parse("tcp://10.255.255.1:1").unwrap();
    let started = Instant::now();
    let result = RpcClient::connect(&addr, 200, 0).await;
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(200), "elapsed {elapsed:?} fired before the watchdog");
    assert!(elapsed < Duration::from_millis(400), "elapsed {elapsed:?} exceeded the budget");
    assert_eq!(result.unwrap_err().kind(), reactor::error::ErrorKind::Timeout);
}

/// Scenario 5: framing reassembly. A TCP client writes several payloads
/// back-to-back; the server must hand its handler each payload whole, in
/// order, byte-identical to what was sent, regardless of how the kernel
/// happened to chunk the reads.
#[tokio::test]
async fn framing_reassembles_back_to_back_payloads_over_tcp() {
    let addr = Address::parse("tcp://127.0.0.1:28553").unwrap();
    let seen = Arc::new(std::sync::Mutex::new(Vec::<Vec<u8>>::new()));
    let seen_cb = seen.clone();
    let seq = Arc::new(AtomicU32::new(0));

    let server = RpcServer::bind(&addr).await.unwrap();
    server.on("Chunk", move |params, reply| {
        seen_cb.lock().unwrap().push(params);
        reply.reply_ok(seq.fetch_add(1, Ordering::SeqCst).to_be_bytes().to_vec()).unwrap();
    });

    let client = RpcClient::connect(&addr, 1_000, 0).await.unwrap();
    let payloads: Vec<Vec<u8>> = (0..8u8).map(|i| vec![i; 4096]).collect();
    let pending = Arc::new(AtomicUsize::new(payloads.len()));
    let done = Arc::new(tokio::sync::Notify::new());

    for payload in &payloads {
        let pending = pending.clone();
        let done = done.clone();
        client
            .call(
                "Chunk",
                payload.clone(),
                Arc::new(move |_outcome| {
                    if pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                        done.notify_one();
                    }
                }),
            )
            .unwrap();
    }

    tokio::time::timeout(Duration::from_millis(1_000), done.notified()).await.unwrap();

    let received = seen.lock().unwrap();
    assert_eq!(received.len(), 8);
    assert_eq!(*received, payloads);

    client.close();
    server.close();
}

/// Scenario 6: teardown cancellation. A client issues 100 requests against
/// a handler that never replies, then is closed before any response
/// arrives. Every one of the 100 callbacks must fire with `Cancelled`.
#[tokio::test]
async fn closing_client_cancels_all_outstanding_requests() {
    let addr = Address::parse("tcp://127.0.0.1:28554").unwrap();
    let server = RpcServer::bind(&addr).await.unwrap();
    server.on("Hang", |_params, _reply| {
        // Deliberately never replies: the token is simply dropped.
    });

    let client = RpcClient::connect(&addr, 1_000, 0).await.unwrap();
    let cancelled = Arc::new(AtomicUsize::new(0));
    for i in 0..100 {
        let cancelled = cancelled.clone();
        client
            .call(
                "Hang",
                i.to_be_bytes().to_vec(),
                Arc::new(move |outcome| {
                    if matches!(outcome, PendingOutcome::Cancelled) {
                        cancelled.fetch_add(1, Ordering::SeqCst);
                    }
                }),
            )
            .unwrap();
    }

    // Give every request a moment to actually hit the wire before tearing
    // down, so this exercises real in-flight cancellation rather than
    // calls that never left the client.
    tokio::time::sleep(Duration::from_millis(50)).await;

    client.close();
    assert_eq!(cancelled.load(Ordering::SeqCst), 100);
    server.close();
}

/// Scenario 3 (unknown method) over a real socket rather than INPROC,
/// rounding out `src/rpc.rs`'s in-process version of the same check.
#[tokio::test]
async fn unknown_method_over_tcp_reports_method_not_found() {
    let addr = Address::parse("tcp://127.0.0.1:28555").unwrap();
    let server = RpcServer::bind(&addr).await.unwrap();
    server.on("Echo", |params, reply| {
        reply.reply_ok(params).unwrap();
    });

    let client = RpcClient::connect(&addr, 1_000, 0).await.unwrap();
    let code = Arc::new(AtomicI32::new(0));
    let code_cb = code.clone();
    let done = Arc::new(tokio::sync::Notify::new());
    let done_cb = done.clone();
    client
        .call(
            "NonExistent",
            vec![],
            Arc::new(move |outcome| {
                if let PendingOutcome::Error { code, message } = outcome {
                    assert!(!message.is_empty());
                    code_cb.store(code, Ordering::SeqCst);
                }
                done_cb.notify_one();
            }),
        )
        .unwrap();

    tokio::time::timeout(Duration::from_millis(500), done.notified()).await.unwrap();
    assert_ne!(code.load(Ordering::SeqCst), 0);
    assert_eq!(client.stats().pending_len, 0);

    client.close();
    server.close();
}
