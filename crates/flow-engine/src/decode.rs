//! 원시 프레임 디코딩 -- Ethernet/IP 프레임을 [`PacketEvent`]로 변환
//!
//! IP 계층이 없는 프레임(ARP 등)이나 잘린 프레임은 `None`을 반환하며
//! 호출자는 해당 프레임을 건너뜁니다.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use etherparse::{NetSlice, SlicedPacket, TransportSlice};

use flowwatch_core::types::{PacketEvent, TcpFlag, TcpFlags};

/// Ethernet II 프레임을 디코딩합니다.
pub fn decode_ethernet(raw: &[u8], timestamp: DateTime<Utc>) -> Option<PacketEvent> {
    let sliced = SlicedPacket::from_ethernet(raw).ok()?;
    from_sliced(&sliced, raw.len(), timestamp)
}

/// 링크 계층 없이 IP 패킷부터 시작하는 버퍼를 디코딩합니다.
pub fn decode_ip(raw: &[u8], timestamp: DateTime<Utc>) -> Option<PacketEvent> {
    let sliced = SlicedPacket::from_ip(raw).ok()?;
    from_sliced(&sliced, raw.len(), timestamp)
}

fn from_sliced(
    sliced: &SlicedPacket<'_>,
    frame_len: usize,
    timestamp: DateTime<Utc>,
) -> Option<PacketEvent> {
    let (src_ip, dst_ip, protocol, tos) = match &sliced.net {
        Some(NetSlice::Ipv4(ipv4)) => {
            let header = ipv4.header();
            let tos = (header.dcp().value() << 2) | header.ecn().value();
            (
                IpAddr::V4(header.source_addr()),
                IpAddr::V4(header.destination_addr()),
                header.protocol().0,
                tos,
            )
        }
        Some(NetSlice::Ipv6(ipv6)) => {
            let header = ipv6.header();
            (
                IpAddr::V6(header.source_addr()),
                IpAddr::V6(header.destination_addr()),
                header.next_header().0,
                header.traffic_class(),
            )
        }
        #[allow(unreachable_patterns)]
        _ => return None,
    };

    let (src_port, dst_port, flags) = match &sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => {
            let mut flags = TcpFlags::empty();
            if tcp.syn() {
                flags.insert(TcpFlag::Syn);
            }
            if tcp.ack() {
                flags.insert(TcpFlag::Ack);
            }
            if tcp.fin() {
                flags.insert(TcpFlag::Fin);
            }
            if tcp.rst() {
                flags.insert(TcpFlag::Rst);
            }
            (
                Some(tcp.source_port()),
                Some(tcp.destination_port()),
                flags,
            )
        }
        Some(TransportSlice::Udp(udp)) => (
            Some(udp.source_port()),
            Some(udp.destination_port()),
            TcpFlags::empty(),
        ),
        _ => (None, None, TcpFlags::empty()),
    };

    Some(PacketEvent {
        src_ip,
        dst_ip,
        src_port,
        dst_port,
        protocol,
        tos,
        length: frame_len as u64,
        flags,
        timestamp,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use etherparse::PacketBuilder;

    pub(crate) fn tcp_frame(syn: bool, ack: bool, payload: &[u8]) -> Vec<u8> {
        let mut builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [7, 8, 9, 10, 11, 12])
            .ipv4([192, 168, 1, 10], [10, 0, 0, 1], 64)
            .tcp(40000, 443, 1, 65535);
        if syn {
            builder = builder.syn();
        }
        if ack {
            builder = builder.ack(1);
        }
        let mut out = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut out, payload).unwrap();
        out
    }

    fn udp_frame() -> Vec<u8> {
        let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [7, 8, 9, 10, 11, 12])
            .ipv4([10, 0, 0, 5], [8, 8, 8, 8], 64)
            .udp(5353, 53);
        let payload = [0u8; 12];
        let mut out = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut out, &payload).unwrap();
        out
    }

    #[test]
    fn decodes_tcp_syn_frame() {
        let frame = tcp_frame(true, false, b"");
        let event = decode_ethernet(&frame, Utc::now()).unwrap();
        assert_eq!(event.src_ip, "192.168.1.10".parse::<IpAddr>().unwrap());
        assert_eq!(event.dst_ip, "10.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(event.src_port, Some(40000));
        assert_eq!(event.dst_port, Some(443));
        assert_eq!(event.protocol, 6);
        assert!(event.flags.contains(TcpFlag::Syn));
        assert!(!event.flags.contains(TcpFlag::Ack));
        assert_eq!(event.length, frame.len() as u64);
    }

    #[test]
    fn decodes_udp_frame_without_flags() {
        let event = decode_ethernet(&udp_frame(), Utc::now()).unwrap();
        assert_eq!(event.protocol, 17);
        assert_eq!(event.dst_port, Some(53));
        assert!(event.flags.is_empty());
    }

    #[test]
    fn truncated_frame_is_skipped() {
        let frame = tcp_frame(true, true, b"hello");
        assert!(decode_ethernet(&frame[..20], Utc::now()).is_none());
    }

    #[test]
    fn garbage_is_skipped() {
        assert!(decode_ethernet(&[0u8; 4], Utc::now()).is_none());
    }

    #[test]
    fn decode_ip_skips_link_layer() {
        let frame = tcp_frame(false, true, b"data");
        // Ethernet II 헤더는 14바이트
        let event = decode_ip(&frame[14..], Utc::now()).unwrap();
        assert!(event.flags.contains(TcpFlag::Ack));
        assert_eq!(event.length, (frame.len() - 14) as u64);
    }
}
