//! 릴레이 파이프라인 설정
//!
//! [`RelayConfig`]는 core의 [`TailcastConfig`](tailcast_core::config::TailcastConfig)를
//! 기반으로 문자열 설정값을 타입(enum, `PathBuf`, `Duration`)으로 해석한
//! 릴레이 전용 설정을 제공합니다.
//!
//! # 사용 예시
//! ```ignore
//! use tailcast_core::config::TailcastConfig;
//! use tailcast_relay::config::RelayConfig;
//!
//! let core_config = TailcastConfig::default();
//! let config = RelayConfig::from_core(&core_config)?;
//! ```

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tailcast_core::config::TailcastConfig;

use crate::error::RelayError;

/// 구독자 분배 모드
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistributionMode {
    /// 모든 Active 구독자에게 복제 (pub/sub)
    #[default]
    Broadcast,
    /// 하나의 구독자에게만 전달 (work queue)
    Queue,
}

impl DistributionMode {
    /// 메트릭 레이블/로그용 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Broadcast => "broadcast",
            Self::Queue => "queue",
        }
    }
}

impl fmt::Display for DistributionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistributionMode {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "broadcast" => Ok(Self::Broadcast),
            "queue" => Ok(Self::Queue),
            other => Err(RelayError::Config {
                field: "distribution.mode".to_owned(),
                reason: format!("unknown mode '{other}' (expected broadcast or queue)"),
            }),
        }
    }
}

/// Tailer 기상(wake-up) 방식
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TailSchedule {
    /// OS 파일 변경 알림 + 폴링 fallback
    #[default]
    Notify,
    /// 고정 간격 폴링
    Poll,
}

impl TailSchedule {
    /// 로그용 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Notify => "notify",
            Self::Poll => "poll",
        }
    }
}

impl FromStr for TailSchedule {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "notify" => Ok(Self::Notify),
            "poll" => Ok(Self::Poll),
            other => Err(RelayError::Config {
                field: "source.schedule".to_owned(),
                reason: format!("unknown schedule '{other}' (expected notify or poll)"),
            }),
        }
    }
}

/// 릴레이 파이프라인 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// tail 대상 파일 경로
    pub source_path: PathBuf,
    /// 커서 파일에서 재개할지 여부 (false면 파일 끝에서 시작)
    pub resume_cursor: bool,
    /// 커서 파일 경로
    pub cursor_path: PathBuf,
    /// 기상 방식
    pub schedule: TailSchedule,
    /// 폴링 간격 (밀리초, notify 모드에서는 fallback tick)
    pub poll_interval_ms: u64,
    /// 파일이 없어진 뒤 치명적 에러로 판단하기까지의 시간 (초)
    pub missing_file_timeout_secs: u64,
    /// 최대 라인 길이 (바이트)
    pub max_line_length: usize,
    /// 한 사이클에 읽는 최대 바이트
    pub read_chunk_bytes: usize,
    /// 릴레이 큐 용량
    pub queue_capacity: usize,
    /// 분배 모드
    pub mode: DistributionMode,
    /// TCP 구독자 수신 주소 (빈 문자열이면 리스너 없음)
    pub listen_addr: String,
    /// 최대 동시 TCP 구독자 수
    pub max_subscribers: usize,
    /// 구독자별 backlog 용량
    pub per_subscriber_backlog: usize,
    /// 구독자 쓰기 타임아웃 (밀리초)
    pub subscriber_write_timeout_ms: u64,
    /// 느린 구독자 축출 유예 시간 (밀리초)
    pub eviction_grace_period_ms: u64,
    /// 종료 시 backlog flush 최대 시간 (초)
    pub drain_timeout_secs: u64,
    /// `ingest_timestamp` 필드 삽입 여부
    pub inject_ingest_timestamp: bool,
    /// 항상 연결된 파일 구독자 목록
    pub output_files: Vec<PathBuf>,

    // --- 확장 설정 (core에 없는 추가 필드) ---
    /// 일시적 I/O 에러 재시도 최대 지연 (밀리초)
    pub max_retry_backoff_ms: u64,
    /// 유효하지 않은 라인 로그 미리보기 길이 (문자)
    pub invalid_preview_chars: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            source_path: PathBuf::from("/var/log/suricata/eve.json"),
            resume_cursor: true,
            cursor_path: PathBuf::from("/var/lib/tailcast/eve.cursor.json"),
            schedule: TailSchedule::Notify,
            poll_interval_ms: 100,
            missing_file_timeout_secs: 60,
            max_line_length: 1024 * 1024,
            read_chunk_bytes: 1024 * 1024,
            queue_capacity: 10_000,
            mode: DistributionMode::Broadcast,
            listen_addr: "127.0.0.1:8765".to_owned(),
            max_subscribers: 64,
            per_subscriber_backlog: 1024,
            subscriber_write_timeout_ms: 2000,
            eviction_grace_period_ms: 5000,
            drain_timeout_secs: 5,
            inject_ingest_timestamp: false,
            output_files: Vec::new(),
            max_retry_backoff_ms: 5000,
            invalid_preview_chars: crate::validator::DEFAULT_PREVIEW_CHARS,
        }
    }
}

impl RelayConfig {
    /// core 설정에서 릴레이 설정을 생성합니다.
    ///
    /// 문자열 enum 필드를 해석하고, core 설정에 없는 확장 필드는 기본값을 사용합니다.
    pub fn from_core(core: &TailcastConfig) -> Result<Self, RelayError> {
        let config = Self {
            source_path: PathBuf::from(&core.source.path),
            resume_cursor: core.source.resume_cursor,
            cursor_path: PathBuf::from(&core.source.cursor_path),
            schedule: core.source.schedule.parse()?,
            poll_interval_ms: core.source.poll_interval_ms,
            missing_file_timeout_secs: core.source.missing_file_timeout_secs,
            max_line_length: core.source.max_line_length,
            read_chunk_bytes: core.source.read_chunk_bytes,
            queue_capacity: core.relay.queue_capacity,
            mode: core.distribution.mode.parse()?,
            listen_addr: core.distribution.listen_addr.clone(),
            max_subscribers: core.distribution.max_subscribers,
            per_subscriber_backlog: core.distribution.per_subscriber_backlog,
            subscriber_write_timeout_ms: core.distribution.subscriber_write_timeout_ms,
            eviction_grace_period_ms: core.distribution.eviction_grace_period_ms,
            drain_timeout_secs: core.distribution.drain_timeout_secs,
            inject_ingest_timestamp: core.distribution.inject_ingest_timestamp,
            output_files: core
                .distribution
                .output_files
                .iter()
                .map(PathBuf::from)
                .collect(),
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), RelayError> {
        const MAX_QUEUE_CAPACITY: usize = 10_000_000;
        const MAX_BACKLOG: usize = 1_000_000;

        if self.source_path.as_os_str().is_empty() {
            return Err(config_err("source.path", "must not be empty"));
        }
        if self.resume_cursor && self.cursor_path.as_os_str().is_empty() {
            return Err(config_err(
                "source.cursor_path",
                "must not be empty when resume_cursor is enabled",
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(config_err("source.poll_interval_ms", "must be greater than 0"));
        }
        if self.missing_file_timeout_secs == 0 {
            return Err(config_err(
                "source.missing_file_timeout_secs",
                "must be greater than 0",
            ));
        }
        if self.max_line_length == 0 {
            return Err(config_err("source.max_line_length", "must be greater than 0"));
        }
        if self.read_chunk_bytes == 0 {
            return Err(config_err("source.read_chunk_bytes", "must be greater than 0"));
        }
        if self.queue_capacity == 0 || self.queue_capacity > MAX_QUEUE_CAPACITY {
            return Err(config_err(
                "relay.queue_capacity",
                format!("must be 1-{MAX_QUEUE_CAPACITY}"),
            ));
        }
        if self.per_subscriber_backlog == 0 || self.per_subscriber_backlog > MAX_BACKLOG {
            return Err(config_err(
                "distribution.per_subscriber_backlog",
                format!("must be 1-{MAX_BACKLOG}"),
            ));
        }
        if self.subscriber_write_timeout_ms == 0 {
            return Err(config_err(
                "distribution.subscriber_write_timeout_ms",
                "must be greater than 0",
            ));
        }
        if self.eviction_grace_period_ms == 0 {
            return Err(config_err(
                "distribution.eviction_grace_period_ms",
                "must be greater than 0",
            ));
        }
        if !self.listen_addr.is_empty() {
            if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
                return Err(config_err(
                    "distribution.listen_addr",
                    format!("'{}' is not a valid socket address", self.listen_addr),
                ));
            }
            if self.max_subscribers == 0 {
                return Err(config_err(
                    "distribution.max_subscribers",
                    "must be greater than 0 when listen_addr is set",
                ));
            }
        }
        if self.max_retry_backoff_ms == 0 {
            return Err(config_err("max_retry_backoff_ms", "must be greater than 0"));
        }

        Ok(())
    }

    /// 폴링 간격
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// 파일 부재 허용 시간
    pub fn missing_file_timeout(&self) -> Duration {
        Duration::from_secs(self.missing_file_timeout_secs)
    }

    /// 구독자 쓰기 타임아웃
    pub fn subscriber_write_timeout(&self) -> Duration {
        Duration::from_millis(self.subscriber_write_timeout_ms)
    }

    /// 축출 유예 시간
    pub fn eviction_grace_period(&self) -> Duration {
        Duration::from_millis(self.eviction_grace_period_ms)
    }

    /// 종료 시 drain 제한 시간
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    /// 재시도 최대 지연
    pub fn max_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.max_retry_backoff_ms)
    }
}

fn config_err(field: &str, reason: impl Into<String>) -> RelayError {
    RelayError::Config {
        field: field.to_owned(),
        reason: reason.into(),
    }
}

/// 릴레이 설정 빌더
#[derive(Default)]
pub struct RelayConfigBuilder {
    config: RelayConfig,
}

impl RelayConfigBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// tail 대상 파일을 설정합니다.
    pub fn source_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.source_path = path.into();
        self
    }

    /// 커서 재개 여부를 설정합니다.
    pub fn resume_cursor(mut self, resume: bool) -> Self {
        self.config.resume_cursor = resume;
        self
    }

    /// 커서 파일 경로를 설정합니다.
    pub fn cursor_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.cursor_path = path.into();
        self
    }

    /// 기상 방식을 설정합니다.
    pub fn schedule(mut self, schedule: TailSchedule) -> Self {
        self.config.schedule = schedule;
        self
    }

    /// 폴링 간격(밀리초)을 설정합니다.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    /// 파일 부재 허용 시간(초)을 설정합니다.
    pub fn missing_file_timeout_secs(mut self, secs: u64) -> Self {
        self.config.missing_file_timeout_secs = secs;
        self
    }

    /// 최대 라인 길이를 설정합니다.
    pub fn max_line_length(mut self, len: usize) -> Self {
        self.config.max_line_length = len;
        self
    }

    /// 사이클당 읽기 크기를 설정합니다.
    pub fn read_chunk_bytes(mut self, bytes: usize) -> Self {
        self.config.read_chunk_bytes = bytes;
        self
    }

    /// 릴레이 큐 용량을 설정합니다.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// 분배 모드를 설정합니다.
    pub fn mode(mut self, mode: DistributionMode) -> Self {
        self.config.mode = mode;
        self
    }

    /// TCP 수신 주소를 설정합니다. 빈 문자열이면 리스너를 띄우지 않습니다.
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// 최대 TCP 구독자 수를 설정합니다.
    pub fn max_subscribers(mut self, max: usize) -> Self {
        self.config.max_subscribers = max;
        self
    }

    /// 구독자별 backlog 용량을 설정합니다.
    pub fn per_subscriber_backlog(mut self, backlog: usize) -> Self {
        self.config.per_subscriber_backlog = backlog;
        self
    }

    /// 구독자 쓰기 타임아웃(밀리초)을 설정합니다.
    pub fn subscriber_write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.subscriber_write_timeout_ms = ms;
        self
    }

    /// 축출 유예 시간(밀리초)을 설정합니다.
    pub fn eviction_grace_period_ms(mut self, ms: u64) -> Self {
        self.config.eviction_grace_period_ms = ms;
        self
    }

    /// drain 제한 시간(초)을 설정합니다.
    pub fn drain_timeout_secs(mut self, secs: u64) -> Self {
        self.config.drain_timeout_secs = secs;
        self
    }

    /// `ingest_timestamp` 삽입 여부를 설정합니다.
    pub fn inject_ingest_timestamp(mut self, inject: bool) -> Self {
        self.config.inject_ingest_timestamp = inject;
        self
    }

    /// 파일 구독자 목록을 설정합니다.
    pub fn output_files(mut self, files: Vec<PathBuf>) -> Self {
        self.config.output_files = files;
        self
    }

    /// 설정을 검증하고 `RelayConfig`를 생성합니다.
    pub fn build(self) -> Result<RelayConfig, RelayError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
