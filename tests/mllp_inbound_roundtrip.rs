//! End-to-end MLLP inbound test over a real loopback socket: a framed HL7
//! ADT message goes in, an MSH/MSA ACK comes back on the same connection,
//! and the envelope reaches the target host's queue.
//!
//! Covers SPEC_FULL.md §8 property 3 ("the number of ACKs written back
//! equals the number of fully-framed messages read, and each ACK's MSA-2
//! equals the inbound MSH-10") and the "happy path" scenario in §8.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hub_engine::adapter::mllp::{MllpInboundAdapter, MllpInboundConfig};
use hub_engine::domain::{AckMode, HostSettings, ItemConfig, ItemName, MessageEnvelope};
use hub_engine::host::{Host, MessageHandler};
use hub_engine::trace_store::memory::MemoryTraceStore;
use hub_engine::trace_store::{TraceStore, TraceWriter};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

const VT: u8 = 0x0B;
const FS: u8 = 0x1C;
const CR: u8 = 0x0D;

struct RecordingHandler {
    received: Arc<std::sync::Mutex<Vec<MessageEnvelope>>>,
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn on_message(&self, envelope: MessageEnvelope) -> Result<(), String> {
        self.received.lock().unwrap().push(envelope);
        Ok(())
    }
}

fn adt_message(control_id: &str) -> Vec<u8> {
    format!(
        "MSH|^~\\&|PAS|HOSP|EPR|HOSP|20260101010101||ADT^A01|{control_id}|P|2.4\rPID|1||12345\r"
    )
    .into_bytes()
}

fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 3);
    out.push(VT);
    out.extend_from_slice(payload);
    out.push(FS);
    out.push(CR);
    out
}

async fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
    let mut out = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte).await.expect("ack byte");
        match byte[0] {
            VT => {}
            FS => {
                stream.read_exact(&mut byte).await.expect("trailing CR");
                assert_eq!(byte[0], CR);
                return out;
            }
            b => out.push(b),
        }
    }
}

async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn immediate_ack_mode_returns_aa_with_matching_control_id() {
    let trace_store = MemoryTraceStore::new() as Arc<dyn TraceStore>;
    let trace_writer = TraceWriter::spawn(Arc::clone(&trace_store), 64);

    let received = Arc::new(std::sync::Mutex::new(Vec::new()));
    let handler = Arc::new(RecordingHandler {
        received: Arc::clone(&received),
    });
    let target = Host::new(
        ItemName::try_from("ADT-Router".to_string()).unwrap(),
        "proj",
        "process",
        HostSettings::default(),
        handler,
        Arc::clone(&trace_store),
    );
    target.start().await.unwrap();

    let port = free_port().await;
    let adapter = Arc::new(MllpInboundAdapter::new(
        MllpInboundConfig {
            bind_host: "127.0.0.1".to_string(),
            port,
            max_connections: 10,
            read_timeout: Duration::from_secs(5),
            ack_mode: AckMode::Immediate,
        },
        Arc::clone(&target),
        None,
        trace_store,
        trace_writer,
        "proj",
        "PAS-In",
    ));

    let cancel = CancellationToken::new();
    let serve_cancel = cancel.clone();
    let serve_adapter = Arc::clone(&adapter);
    let server = tokio::spawn(async move { serve_adapter.serve(serve_cancel).await });

    // Give the listener a moment to bind before dialing.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.expect("connect");
    stream.write_all(&frame(&adt_message("MSG1"))).await.unwrap();
    let ack = read_frame(&mut stream).await;
    let ack_text = String::from_utf8(ack).unwrap();

    assert!(ack_text.contains("MSA|AA|MSG1"), "ack was: {ack_text}");

    // The envelope must have reached the target host's worker.
    for _ in 0..50 {
        if !received.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(received.lock().unwrap().len(), 1);

    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(1), server).await;
    target.stop().await.unwrap();
}

#[tokio::test]
async fn malformed_frame_closes_connection_without_ack() {
    let trace_store = MemoryTraceStore::new() as Arc<dyn TraceStore>;
    let trace_writer = TraceWriter::spawn(Arc::clone(&trace_store), 64);

    let received = Arc::new(std::sync::Mutex::new(Vec::new()));
    let handler = Arc::new(RecordingHandler {
        received: Arc::clone(&received),
    });
    let target = Host::new(
        ItemName::try_from("ADT-Router".to_string()).unwrap(),
        "proj",
        "process",
        HostSettings::default(),
        handler,
        Arc::clone(&trace_store),
    );
    target.start().await.unwrap();

    let port = free_port().await;
    let adapter = Arc::new(MllpInboundAdapter::new(
        MllpInboundConfig {
            bind_host: "127.0.0.1".to_string(),
            port,
            max_connections: 10,
            read_timeout: Duration::from_millis(200),
            ack_mode: AckMode::Immediate,
        },
        Arc::clone(&target),
        None,
        trace_store,
        trace_writer,
        "proj",
        "PAS-In",
    ));

    let cancel = CancellationToken::new();
    let serve_cancel = cancel.clone();
    let serve_adapter = Arc::clone(&adapter);
    let server = tokio::spawn(async move { serve_adapter.serve(serve_cancel).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.expect("connect");
    // VT + payload, deliberately closed before FS/CR.
    stream.write_all(&[VT]).await.unwrap();
    stream.write_all(b"MSH|^~\\&|PAS").await.unwrap();
    drop(stream);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(received.lock().unwrap().is_empty());

    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(1), server).await;
    target.stop().await.unwrap();
}

/// Silences an unused-import warning under the `reqwest`-less matrix; keeps
/// the counter type imported for documentation of planned concurrent-clients
/// coverage without adding it in this pass.
#[allow(dead_code)]
fn _unused(_: AtomicUsize) {
    let _ = Ordering::Relaxed;
}

#[allow(dead_code)]
fn _item_config_is_constructible(_: ItemConfig) {}
