//! 도메인 타입 -- 캡처와 분류 양쪽에서 공유하는 공통 타입
//!
//! 패킷 이벤트, 연결 키, TCP 플래그 집합을 정의합니다.

use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 플로우 상태로 추적하는 TCP 플래그
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TcpFlag {
    Syn,
    Ack,
    Fin,
    Rst,
}

impl TcpFlag {
    /// 출력 순서대로 나열한 전체 플래그
    pub const ALL: [TcpFlag; 4] = [TcpFlag::Syn, TcpFlag::Ack, TcpFlag::Fin, TcpFlag::Rst];

    fn bit(self) -> u8 {
        match self {
            Self::Syn => 0b0001,
            Self::Ack => 0b0010,
            Self::Fin => 0b0100,
            Self::Rst => 0b1000,
        }
    }

    /// 플로우 파일에 기록되는 이름
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Syn => "SYN",
            Self::Ack => "ACK",
            Self::Fin => "FIN",
            Self::Rst => "RST",
        }
    }
}

impl fmt::Display for TcpFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// TCP 플래그 집합
///
/// 순서는 항상 SYN, ACK, FIN, RST로 고정되어 출력이 결정적입니다.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TcpFlags(u8);

impl TcpFlags {
    /// 빈 집합
    pub const fn empty() -> Self {
        Self(0)
    }

    /// 주어진 플래그들로 집합을 만듭니다.
    pub fn from_flags(flags: &[TcpFlag]) -> Self {
        let mut set = Self::empty();
        for flag in flags {
            set.insert(*flag);
        }
        set
    }

    pub fn insert(&mut self, flag: TcpFlag) {
        self.0 |= flag.bit();
    }

    pub fn contains(&self, flag: TcpFlag) -> bool {
        self.0 & flag.bit() != 0
    }

    /// 다른 집합의 플래그를 합칩니다.
    pub fn merge(&mut self, other: TcpFlags) {
        self.0 |= other.0;
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = TcpFlag> + '_ {
        TcpFlag::ALL.into_iter().filter(|f| self.contains(*f))
    }
}

impl fmt::Display for TcpFlags {
    /// `"SYN, ACK"` 형식
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for flag in self.iter() {
            if !first {
                f.write_str(", ")?;
            }
            f.write_str(flag.as_str())?;
            first = false;
        }
        Ok(())
    }
}

/// 캡처된 단일 패킷의 메타데이터
///
/// 캡처 프리미티브가 파싱하여 전달하며, 트래커에 반영된 뒤 버려집니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketEvent {
    /// 출발지 IP
    pub src_ip: IpAddr,
    /// 목적지 IP
    pub dst_ip: IpAddr,
    /// 출발지 포트 (TCP/UDP가 아니면 없음)
    pub src_port: Option<u16>,
    /// 목적지 포트 (TCP/UDP가 아니면 없음)
    pub dst_port: Option<u16>,
    /// IP 프로토콜 번호 (TCP=6, UDP=17 등)
    pub protocol: u8,
    /// Type-of-Service 바이트
    pub tos: u8,
    /// 프레임 길이 (바이트)
    pub length: u64,
    /// TCP 플래그
    pub flags: TcpFlags,
    /// 캡처 시각
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for PacketEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{} proto={} len={}",
            self.src_ip,
            PortDisplay(self.src_port),
            self.dst_ip,
            PortDisplay(self.dst_port),
            self.protocol,
            self.length,
        )
    }
}

/// 연결 식별 키
///
/// 와이어에서 관측된 그대로 사용합니다. `(A, B, ..)`와 `(B, A, ..)`는 서로 다른 키입니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionKey {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
    pub protocol: u8,
}

impl ConnectionKey {
    /// 패킷 이벤트에서 키를 추출합니다.
    pub fn from_event(event: &PacketEvent) -> Self {
        Self {
            src_ip: event.src_ip,
            dst_ip: event.dst_ip,
            src_port: event.src_port,
            dst_port: event.dst_port,
            protocol: event.protocol,
        }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{} proto={}",
            self.src_ip,
            PortDisplay(self.src_port),
            self.dst_ip,
            PortDisplay(self.dst_port),
            self.protocol,
        )
    }
}

struct PortDisplay(Option<u16>);

impl fmt::Display for PortDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(port) => write!(f, "{port}"),
            None => f.write_str("-"),
        }
    }
}
