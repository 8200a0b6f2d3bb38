//! 연결 단위 플로우 집계
//!
//! [`FlowTracker`]는 관찰된 패킷을 [`ConnectionKey`]별 [`FlowRecord`]로 누적합니다.
//! 키는 정규화하지 않으므로 `(A, B)`와 `(B, A)`는 서로 다른 플로우입니다.
//!
//! # 방향 규칙
//! 새 키의 첫 패킷은 `in_bytes`로, 같은 키의 이후 패킷은 모두 `out_bytes`로
//! 집계합니다. 분류 모델이 이 분포로 학습되어 있으므로 그대로 유지합니다.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use flowwatch_core::metrics as m;
use flowwatch_core::types::{ConnectionKey, PacketEvent, TcpFlags};

/// 하나의 연결에 대한 누적 통계
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlowRecord {
    /// 첫 패킷 캡처 시각
    pub start_time: Option<DateTime<Utc>>,
    /// 마지막 패킷 캡처 시각
    pub end_time: Option<DateTime<Utc>>,
    /// 두 번째 이후 패킷 바이트 합
    pub out_bytes: u64,
    /// 첫 패킷 바이트
    pub in_bytes: u64,
    /// 패킷 수
    pub total_packets: u64,
    /// 관찰된 TCP 플래그 합집합
    pub state_flags: TcpFlags,
}

impl FlowRecord {
    /// `out_bytes + in_bytes`
    pub fn total_bytes(&self) -> u64 {
        self.out_bytes.saturating_add(self.in_bytes)
    }
}

/// 연결 키별 플로우 레코드 테이블
///
/// 단일 `Mutex`로 보호되며 `observe`/`snapshot`/`drain`은 서로 배타적입니다.
/// 다른 스레드가 락을 잡은 채 패닉해도 내부 상태를 그대로 복구해 사용합니다.
#[derive(Debug, Default)]
pub struct FlowTracker {
    flows: Mutex<HashMap<ConnectionKey, FlowRecord>>,
}

impl FlowTracker {
    /// 빈 트래커를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionKey, FlowRecord>> {
        self.flows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 패킷 하나를 해당 연결의 레코드에 반영합니다.
    pub fn observe(&self, event: &PacketEvent) {
        let key = ConnectionKey::from_event(event);
        let mut flows = self.lock();

        let seen = flows.contains_key(&key);
        let record = flows.entry(key).or_default();
        if seen {
            record.out_bytes = record.out_bytes.saturating_add(event.length);
        } else {
            record.start_time = Some(event.timestamp);
            record.in_bytes = record.in_bytes.saturating_add(event.length);
        }
        record.end_time = Some(event.timestamp);
        record.total_packets += 1;
        record.state_flags.merge(event.flags);

        let active = flows.len();
        drop(flows);

        metrics::counter!(m::CAPTURE_PACKETS_TOTAL).increment(1);
        metrics::counter!(m::CAPTURE_BYTES_TOTAL).increment(event.length);
        metrics::gauge!(m::CAPTURE_ACTIVE_FLOWS).set(active as f64);
    }

    /// 현재 레코드의 복사본을 반환합니다. 내부 상태는 변경하지 않습니다.
    pub fn snapshot(&self) -> Vec<(ConnectionKey, FlowRecord)> {
        let flows = self.lock();
        let mut out: Vec<_> = flows.iter().map(|(k, r)| (*k, r.clone())).collect();
        drop(flows);
        out.sort_by(|a, b| a.1.start_time.cmp(&b.1.start_time).then(a.0.cmp(&b.0)));
        out
    }

    /// 모든 레코드를 꺼내고 테이블을 비웁니다.
    ///
    /// 첫 패킷 시각 순으로 정렬해 반환합니다.
    pub fn drain(&self) -> Vec<(ConnectionKey, FlowRecord)> {
        let taken = std::mem::take(&mut *self.lock());
        metrics::gauge!(m::CAPTURE_ACTIVE_FLOWS).set(0.0);

        let mut out: Vec<_> = taken.into_iter().collect();
        out.sort_by(|a, b| a.1.start_time.cmp(&b.1.start_time).then(a.0.cmp(&b.0)));
        out
    }

    /// 추적 중인 연결 수
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// 추적 중인 연결이 없는지 여부
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
