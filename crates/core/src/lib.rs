//! Flowwatch 공통 크레이트
//!
//! 캡처 엔진, 분류 파이프라인, 데몬이 공유하는 에러, 설정, 도메인 타입,
//! 파이프라인 생명주기 trait, 파일시스템 추상화, 플로우 테이블 코덱을 제공합니다.

pub mod config;
pub mod error;
pub mod fs;
pub mod metrics;
pub mod pipeline;
pub mod table;
pub mod types;

// --- 주요 타입 re-export ---

// 에러
pub use error::{
    CaptureError, ClassificationError, ConfigError, FlowwatchError, PipelineError, SchemaError,
};

// 설정
pub use config::FlowwatchConfig;

// 파일시스템
pub use fs::{FileSystem, FsError, MemoryFileSystem, RealFileSystem};

// 파이프라인 trait
pub use pipeline::{HealthStatus, Pipeline};

// 플로우 테이블
pub use table::{FlowTable, Record};

// 도메인 타입
pub use types::{ConnectionKey, PacketEvent, TcpFlag, TcpFlags};
