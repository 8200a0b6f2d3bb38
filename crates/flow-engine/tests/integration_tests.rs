//! 통합 테스트 -- 캡처부터 플로우 파일 내보내기까지의 흐름 검증

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use flowwatch_core::fs::RealFileSystem;
use flowwatch_core::pipeline::Pipeline;
use flowwatch_core::table::FlowTable;
use flowwatch_core::types::{PacketEvent, TcpFlag, TcpFlags};
use flowwatch_flow_engine::{
    CaptureController, CaptureInput, ChannelSource, EngineConfig, FLOW_COLUMNS, FlowTracker,
};

fn tcp_frame(src_port: u16, syn: bool, ack: bool, fin: bool, payload: &[u8]) -> Vec<u8> {
    let mut builder = etherparse::PacketBuilder::ethernet2([2, 0, 0, 0, 0, 1], [2, 0, 0, 0, 0, 2])
        .ipv4([192, 168, 1, 10], [10, 0, 0, 1], 64)
        .tcp(src_port, 443, 1, 65535);
    if syn {
        builder = builder.syn();
    }
    if ack {
        builder = builder.ack(1);
    }
    if fin {
        builder = builder.fin();
    }
    let mut out = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut out, payload).unwrap();
    out
}

fn config_in(dir: &std::path::Path) -> EngineConfig {
    EngineConfig {
        window: Duration::from_millis(25),
        output_dir: dir.join("flows"),
        processed_dir: Some(dir.join("processed")),
        ..EngineConfig::default()
    }
}

/// 프레임 주입 → 캡처 → 정지 → CSV 검증
#[tokio::test]
async fn test_capture_frames_to_flow_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("processed")).unwrap();
    std::fs::write(dir.path().join("processed/processed_stale.csv"), "a\n1\n").unwrap();

    let (source, tx) = ChannelSource::new();
    let mut controller = CaptureController::builder()
        .config(config_in(dir.path()))
        .source(source)
        .file_system(Arc::new(RealFileSystem))
        .build()
        .unwrap();

    controller.start().await.unwrap();

    let frames = [
        tcp_frame(40000, true, false, false, b""),
        tcp_frame(40000, false, true, false, &[0u8; 100]),
        tcp_frame(40000, false, true, true, b""),
        tcp_frame(40001, true, false, false, b""),
    ];
    for frame in &frames {
        tx.send(CaptureInput::Frame {
            data: Bytes::from(frame.clone()),
            timestamp: Utc::now(),
        })
        .unwrap();
    }

    let handle = controller.handle();
    for _ in 0..200 {
        if handle.snapshot().iter().map(|f| f.1.total_packets).sum::<u64>() == 4 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let path = controller.stop_capture().await.unwrap().unwrap();
    assert!(path.exists());
    assert!(!dir.path().join("processed/processed_stale.csv").exists());

    let table = FlowTable::parse(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let headers: Vec<&str> = table.headers().iter().map(String::as_str).collect();
    assert_eq!(headers, FLOW_COLUMNS);
    assert_eq!(table.len(), 2);

    let main = table
        .records()
        .find(|r| r.get("Src Port") == Some("40000"))
        .unwrap();
    assert_eq!(main.get("Total Packets"), Some("3"));
    assert_eq!(main.get("In Bytes"), Some(frames[0].len().to_string().as_str()));
    assert_eq!(
        main.get("Out Bytes"),
        Some((frames[1].len() + frames[2].len()).to_string().as_str())
    );
    assert_eq!(main.get("State Flags"), Some("SYN, ACK, FIN"));
    assert_eq!(main.get("Protocol"), Some("6"));
}

/// SYN 100B, ACK 200B, FIN 50B 세 패킷 연결
#[test]
fn test_three_packet_connection() {
    let tracker = FlowTracker::new();
    let base = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    for (i, (len, flag)) in [(100, TcpFlag::Syn), (200, TcpFlag::Ack), (50, TcpFlag::Fin)]
        .into_iter()
        .enumerate()
    {
        tracker.observe(&PacketEvent {
            src_ip: "192.168.1.10".parse().unwrap(),
            dst_ip: "10.0.0.1".parse().unwrap(),
            src_port: Some(40000),
            dst_port: Some(443),
            protocol: 6,
            tos: 0,
            length: len,
            flags: TcpFlags::from_flags(&[flag]),
            timestamp: base + chrono::Duration::seconds(i as i64),
        });
    }

    let flows = tracker.drain();
    assert_eq!(flows.len(), 1);
    let record = &flows[0].1;
    assert_eq!(record.in_bytes, 100);
    assert_eq!(record.out_bytes, 250);
    assert_eq!(record.total_packets, 3);
    assert_eq!(record.state_flags.to_string(), "SYN, ACK, FIN");
}

fn arb_event() -> impl Strategy<Value = PacketEvent> {
    (0u8..4, 0u8..4, prop::option::of(1u16..5), 0u64..2000, any::<u8>()).prop_map(
        |(src, dst, port, length, flag_bits)| {
            let flags = TcpFlag::ALL
                .iter()
                .enumerate()
                .filter(|(i, _)| flag_bits & (1 << i) != 0)
                .map(|(_, f)| *f)
                .collect::<Vec<_>>();
            PacketEvent {
                src_ip: format!("10.0.0.{src}").parse().unwrap(),
                dst_ip: format!("10.0.1.{dst}").parse().unwrap(),
                src_port: port,
                dst_port: Some(80),
                protocol: 6,
                tos: 0,
                length,
                flags: TcpFlags::from_flags(&flags),
                timestamp: Utc::now(),
            }
        },
    )
}

proptest! {
    #[test]
    fn tracker_totals_match_observed_packets(events in prop::collection::vec(arb_event(), 0..200)) {
        let tracker = FlowTracker::new();
        for event in &events {
            tracker.observe(event);
        }

        let flows = tracker.drain();
        let packets: u64 = flows.iter().map(|f| f.1.total_packets).sum();
        let bytes: u64 = flows.iter().map(|f| f.1.total_bytes()).sum();
        prop_assert_eq!(packets, events.len() as u64);
        prop_assert_eq!(bytes, events.iter().map(|e| e.length).sum::<u64>());

        for (_, record) in &flows {
            prop_assert_eq!(record.total_bytes(), record.in_bytes + record.out_bytes);
            prop_assert!(record.start_time.is_some());
        }
        prop_assert!(tracker.is_empty());
    }

    #[test]
    fn decode_arbitrary_bytes_does_not_panic(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = flowwatch_flow_engine::decode::decode_ethernet(&bytes, Utc::now());
    }
}
