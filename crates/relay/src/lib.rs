#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! - [`tailer`]: 파일 tail, 로테이션/truncation 감지, 커서 저장, 수집 루프
//! - [`validator`]: 라인 단위 JSON 객체 검증
//! - [`queue`]: Tailer와 분배 관리자 사이의 bounded 릴레이 큐
//! - [`distribution`]: broadcast / queue 모드 분배, 구독자 상태 머신, 싱크 (TCP, 파일, 채널)
//! - [`pipeline`]: 전체 파이프라인 오케스트레이션 (Pipeline trait 구현)
//! - [`config`]: 릴레이 설정 (core 설정 확장)
//! - [`record`]: 레코드, 커서, 로테이션 마커
//! - [`error`]: 도메인 에러 타입

pub mod config;
pub mod distribution;
pub mod error;
pub mod pipeline;
pub mod queue;
pub mod record;
pub mod tailer;
pub mod validator;

// --- 주요 타입 re-export ---

// 파이프라인
pub use pipeline::{RelayPipeline, RelayPipelineBuilder};

// 설정
pub use config::{DistributionMode, RelayConfig, RelayConfigBuilder, TailSchedule};

// 에러
pub use error::RelayError;

// 레코드
pub use record::{
    FileIdentity, LogRecord, RelayItem, RotationMarker, RotationReason, SharedRecord, TailCursor,
};

// 분배
pub use distribution::file::FileSink;
pub use distribution::sink::{ChannelSink, Delivery, DeliverySink, RecordEncoder};
pub use distribution::tcp::TcpSink;
pub use distribution::{
    DistributionEvent, DistributionHandle, DistributionManager, DistributionSettings,
    DistributionStats, SubscriberId,
};

// 큐
pub use queue::{QueueStats, RelayReceiver, RelaySender, relay_queue};

// 검증
pub use validator::{LineValidator, Validation};

// tail
pub use tailer::Tailer;
