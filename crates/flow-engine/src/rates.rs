//! 파생 지표 -- 플로우 레코드에서 계산하는 비율/속도 값
//!
//! 저장하지 않고 내보내기/대시보드 시점에 매번 계산합니다.

use std::fmt;

use chrono::Local;
use serde::{Serialize, Serializer};

use flowwatch_core::types::ConnectionKey;

use crate::tracker::FlowRecord;

/// 아웃바운드/인바운드 바이트 비율
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Ratio {
    /// 유한 값 (소수점 둘째 자리 반올림)
    Finite(f64),
    /// `in_bytes == 0`이고 `out_bytes > 0`
    Infinite,
}

impl Ratio {
    /// 바이트 수로부터 비율을 계산합니다.
    pub fn from_bytes(out_bytes: u64, in_bytes: u64) -> Self {
        match (out_bytes, in_bytes) {
            (0, 0) => Ratio::Finite(0.0),
            (_, 0) => Ratio::Infinite,
            (out, inb) => Ratio::Finite(round2(out as f64 / inb as f64)),
        }
    }

    /// 무한대 여부
    pub fn is_infinite(&self) -> bool {
        matches!(self, Ratio::Infinite)
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ratio::Finite(v) => write!(f, "{v:.2}"),
            Ratio::Infinite => f.write_str("inf"),
        }
    }
}

impl Serialize for Ratio {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// 레코드 하나의 파생 지표
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowRates {
    /// 지속 시간 (초)
    pub duration: f64,
    pub total_bytes: u64,
    pub bytes_per_sec: f64,
    pub bytes_per_pkt: f64,
    pub pkts_per_sec: f64,
    pub ratio_out_in: Ratio,
}

impl FlowRates {
    /// 레코드에서 지표를 계산합니다. `start_time`이 없으면 `None`입니다.
    pub fn compute(record: &FlowRecord) -> Option<Self> {
        let start = record.start_time?;
        let end = record.end_time.unwrap_or(start);
        let duration = (end - start)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        let total_bytes = record.total_bytes();
        let packets = record.total_packets;
        let per_sec = |n: u64| if duration > 0.0 { n as f64 / duration } else { 0.0 };

        Some(Self {
            duration,
            total_bytes,
            bytes_per_sec: per_sec(total_bytes),
            bytes_per_pkt: if packets > 0 {
                total_bytes as f64 / packets as f64
            } else {
                0.0
            },
            pkts_per_sec: per_sec(packets),
            ratio_out_in: Ratio::from_bytes(record.out_bytes, record.in_bytes),
        })
    }
}

/// 대시보드 표시용 플로우 행
///
/// 비율/속도 값은 소수점 둘째 자리 문자열입니다.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveFlow {
    pub src_ip: String,
    pub dst_ip: String,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
    pub protocol: u8,
    pub duration: String,
    pub out_bytes: u64,
    pub in_bytes: u64,
    pub tot_pkts: u64,
    pub tot_bytes: u64,
    pub bytes_per_sec: String,
    pub bytes_per_pkt: String,
    pub pkts_per_sec: String,
    pub ratio_out_in: String,
    pub state_flags: String,
    /// 마지막 패킷 시각 (로컬 시간 `%Y-%m-%d %H:%M:%S`)
    pub timestamp: String,
}

impl LiveFlow {
    /// 레코드를 표시용 행으로 변환합니다. `start_time`이 없으면 `None`입니다.
    pub fn from_record(key: &ConnectionKey, record: &FlowRecord) -> Option<Self> {
        let rates = FlowRates::compute(record)?;
        let timestamp = record
            .end_time
            .or(record.start_time)
            .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();

        Some(Self {
            src_ip: key.src_ip.to_string(),
            dst_ip: key.dst_ip.to_string(),
            src_port: key.src_port,
            dst_port: key.dst_port,
            protocol: key.protocol,
            duration: format!("{:.2}", rates.duration),
            out_bytes: record.out_bytes,
            in_bytes: record.in_bytes,
            tot_pkts: record.total_packets,
            tot_bytes: rates.total_bytes,
            bytes_per_sec: format!("{:.2}", rates.bytes_per_sec),
            bytes_per_pkt: format!("{:.2}", rates.bytes_per_pkt),
            pkts_per_sec: format!("{:.2}", rates.pkts_per_sec),
            ratio_out_in: rates.ratio_out_in.to_string(),
            state_flags: record.state_flags.to_string(),
            timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use flowwatch_core::types::{TcpFlag, TcpFlags};

    fn record(out_bytes: u64, in_bytes: u64, packets: u64, millis: i64) -> FlowRecord {
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        FlowRecord {
            start_time: Some(start),
            end_time: Some(start + chrono::Duration::milliseconds(millis)),
            out_bytes,
            in_bytes,
            total_packets: packets,
            state_flags: TcpFlags::from_flags(&[TcpFlag::Syn, TcpFlag::Ack]),
        }
    }

    #[test]
    fn ratio_edge_cases() {
        assert_eq!(Ratio::from_bytes(0, 0), Ratio::Finite(0.0));
        assert_eq!(Ratio::from_bytes(10, 0), Ratio::Infinite);
        assert_eq!(Ratio::from_bytes(250, 100), Ratio::Finite(2.5));
        assert_eq!(Ratio::from_bytes(1, 3), Ratio::Finite(0.33));
        assert_eq!(Ratio::Infinite.to_string(), "inf");
        assert_eq!(Ratio::Finite(2.5).to_string(), "2.50");
    }

    #[test]
    fn rates_over_two_seconds() {
        let rates = FlowRates::compute(&record(250, 100, 3, 2000)).unwrap();
        assert_eq!(rates.duration, 2.0);
        assert_eq!(rates.total_bytes, 350);
        assert_eq!(rates.bytes_per_sec, 175.0);
        assert!((rates.bytes_per_pkt - 116.666).abs() < 0.01);
        assert_eq!(rates.pkts_per_sec, 1.5);
    }

    #[test]
    fn zero_duration_gives_zero_rates() {
        let rates = FlowRates::compute(&record(0, 60, 1, 0)).unwrap();
        assert_eq!(rates.bytes_per_sec, 0.0);
        assert_eq!(rates.pkts_per_sec, 0.0);
        assert_eq!(rates.bytes_per_pkt, 60.0);
    }

    #[test]
    fn missing_start_time_has_no_rates() {
        assert!(FlowRates::compute(&FlowRecord::default()).is_none());
    }

    #[test]
    fn live_flow_formats_strings() {
        let key = ConnectionKey {
            src_ip: "192.168.1.10".parse().unwrap(),
            dst_ip: "10.0.0.1".parse().unwrap(),
            src_port: Some(40000),
            dst_port: None,
            protocol: 6,
        };
        let flow = LiveFlow::from_record(&key, &record(250, 100, 3, 2000)).unwrap();
        assert_eq!(flow.duration, "2.00");
        assert_eq!(flow.bytes_per_sec, "175.00");
        assert_eq!(flow.ratio_out_in, "2.50");
        assert_eq!(flow.state_flags, "SYN, ACK");
        assert_eq!(flow.dst_port, None);
        assert_eq!(flow.timestamp.len(), "2023-11-14 22:13:22".len());

        let json = serde_json::to_value(&flow).unwrap();
        assert_eq!(json["tot_bytes"], 350);
        assert_eq!(json["ratio_out_in"], "2.50");
    }
}
