#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//! - [`source`]: 패킷 소스 trait, 채널 소스, libpcap 소스 (`pcap` feature)
//! - [`decode`]: Ethernet/IP 프레임 디코딩
//! - [`tracker`]: 연결 단위 플로우 집계
//! - [`rates`]: 파생 지표 및 대시보드 행
//! - [`sink`]: 플로우 파일 내보내기
//! - [`capture`]: CaptureController -- 캡처 생명주기, Pipeline trait 구현

pub mod capture;
pub mod config;
pub mod decode;
pub mod error;
pub mod rates;
pub mod sink;
pub mod source;
pub mod tracker;

// --- 주요 타입 re-export ---

// 컨트롤러
pub use capture::{CaptureController, CaptureControllerBuilder, CaptureHandle};

// 설정
pub use config::{CaptureTarget, EngineConfig};

// 에러
pub use error::FlowEngineError;

// 집계
pub use rates::{FlowRates, LiveFlow, Ratio};
pub use tracker::{FlowRecord, FlowTracker};

// 내보내기
pub use sink::{FLOW_COLUMNS, FlowSink};

// 소스
#[cfg(feature = "pcap")]
pub use source::PcapSource;
pub use source::{CaptureInput, CaptureSender, ChannelSource, PacketSource};
