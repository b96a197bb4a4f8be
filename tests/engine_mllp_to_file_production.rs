//! Deploys a two-item production through `Engine::deploy` — an MLLP
//! inbound service wired by a `Connection` straight to a file-writing
//! operation — and drives it with a real TCP client, the way SPEC_FULL.md
//! §8's "service forwards to operation with no process in between" scenario
//! describes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use hub_engine::domain::{
    AckMode, AdapterSettings, AdapterType, Connection, ConnectionKind, HostSettings, ItemConfig, ItemKind,
};
use hub_engine::engine::snapshot::{ProductionSettings, ProductionSnapshot};
use hub_engine::engine::Engine;
use hub_engine::trace_store::memory::MemoryTraceStore;
use hub_engine::trace_store::TraceStore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const VT: u8 = 0x0B;
const FS: u8 = 0x1C;
const CR: u8 = 0x0D;

fn item_name(name: &str) -> hub_engine::domain::ItemName {
    hub_engine::domain::ItemName::try_from(name.to_string()).unwrap()
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
async fn mllp_service_forwards_directly_to_file_operation() {
    let out_dir = tempfile::tempdir().unwrap();
    let port = free_port().await;

    let store = MemoryTraceStore::new() as Arc<dyn TraceStore>;
    let engine = Engine::new(store, Duration::from_secs(300));

    let service = ItemConfig {
        name: item_name("PAS-In"),
        kind: ItemKind::Service,
        adapter_type: AdapterType::MllpInbound,
        adapter_settings: AdapterSettings::MllpInbound {
            port,
            host: "127.0.0.1".to_string(),
            max_connections: 10,
            read_timeout_secs: 5,
            ack_mode: AckMode::Immediate,
            bad_message_handler: None,
        },
        host_settings: HostSettings::default(),
        enabled: true,
        properties: HashMap::new(),
    };
    let operation = ItemConfig {
        name: item_name("Archive-Out"),
        kind: ItemKind::Operation,
        adapter_type: AdapterType::FileOutbound,
        adapter_settings: AdapterSettings::FileOutbound {
            directory: out_dir.path().to_string_lossy().to_string(),
            filename_pattern: "{message_id}.hl7".to_string(),
        },
        host_settings: HostSettings::default(),
        enabled: true,
        properties: HashMap::new(),
    };

    let snapshot = ProductionSnapshot {
        production: ProductionSettings {
            name: "clinic-a".to_string(),
            enabled: true,
            settings: HashMap::new(),
        },
        items: vec![service, operation],
        connections: vec![Connection {
            source_item: item_name("PAS-In"),
            target_item: item_name("Archive-Out"),
            kind: ConnectionKind::Standard,
        }],
        routing_rules: vec![],
    };

    engine.deploy("clinic-a", snapshot).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.expect("connect to mllp service");
    let payload = b"MSH|^~\\&|PAS|HOSP|EPR|HOSP|20260101010101||ADT^A01|MSG42|P|2.4\rPID|1||99\r".to_vec();
    stream.write_all(&frame(&payload)).await.unwrap();
    let ack = read_frame(&mut stream).await;
    assert!(String::from_utf8(ack).unwrap().contains("MSA|AA|MSG42"));

    let mut written = None;
    for _ in 0..50 {
        let mut entries = tokio::fs::read_dir(out_dir.path()).await.unwrap();
        if let Some(entry) = entries.next_entry().await.unwrap() {
            written = Some(entry.path());
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let written = written.expect("operation should have written one file");
    let contents = tokio::fs::read(written).await.unwrap();
    assert_eq!(contents, payload);

    engine.stop("clinic-a").await.unwrap();
    engine.shutdown();
}
