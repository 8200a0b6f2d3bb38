//! 파이프라인 trait -- 모듈 생명주기 정의
//!
//! 캡처 컨트롤러와 분류 파이프라인은 [`Pipeline`]을 구현하여
//! `flowwatch-daemon`에서 동일한 start/stop/health_check 흐름으로 관리됩니다.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::FlowwatchError;

/// 모듈 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// 정상
    Healthy,
    /// 동작하지만 성능 저하
    Degraded(String),
    /// 동작 불가
    Unhealthy(String),
}

impl HealthStatus {
    /// 정상 상태인지 확인합니다.
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// 동작 불가 상태인지 확인합니다.
    pub fn is_unhealthy(&self) -> bool {
        matches!(self, Self::Unhealthy(_))
    }
}

/// 장시간 실행되는 모듈의 생명주기 trait
pub trait Pipeline: Send {
    /// 모듈을 시작합니다.
    fn start(&mut self) -> impl Future<Output = Result<(), FlowwatchError>> + Send;

    /// 모듈을 정지합니다. 진행 중인 작업은 마무리됩니다.
    fn stop(&mut self) -> impl Future<Output = Result<(), FlowwatchError>> + Send;

    /// 현재 상태를 보고합니다.
    fn health_check(&self) -> impl Future<Output = HealthStatus> + Send;
}
