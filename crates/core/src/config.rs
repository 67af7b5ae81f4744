//! 설정 관리: tailcast.toml 파싱 및 런타임 설정
//!
//! [`TailcastConfig`]는 모든 컴포넌트의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선, 데몬에서 적용)
//! 2. 환경변수 (`TAILCAST_SOURCE_PATH=/var/log/suricata/eve.json` 형식)
//! 3. 설정 파일 (`tailcast.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), tailcast_core::error::TailcastError> {
//! use tailcast_core::config::TailcastConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = TailcastConfig::load("tailcast.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = TailcastConfig::parse("[relay]\nqueue_capacity = 512")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, TailcastError};

/// tailcast 통합 설정
///
/// `tailcast.toml` 파일의 최상위 구조를 나타냅니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TailcastConfig {
    /// 일반 설정 (로깅)
    #[serde(default)]
    pub general: GeneralConfig,
    /// 소스 파일 tail 설정
    #[serde(default)]
    pub source: SourceConfig,
    /// 릴레이 큐 설정
    #[serde(default)]
    pub relay: RelayQueueConfig,
    /// 구독자 분배 설정
    #[serde(default)]
    pub distribution: DistributionConfig,
    /// Prometheus 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl TailcastConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, TailcastError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음, 검증 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, TailcastError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TailcastError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                TailcastError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, TailcastError> {
        toml::from_str(toml_str).map_err(|e| {
            TailcastError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `TAILCAST_{SECTION}_{FIELD}`
    /// 예: `TAILCAST_DISTRIBUTION_MODE=queue`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "TAILCAST_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "TAILCAST_GENERAL_LOG_FORMAT");

        // Source
        override_string(&mut self.source.path, "TAILCAST_SOURCE_PATH");
        override_bool(
            &mut self.source.resume_cursor,
            "TAILCAST_SOURCE_RESUME_CURSOR",
        );
        override_string(&mut self.source.cursor_path, "TAILCAST_SOURCE_CURSOR_PATH");
        override_string(&mut self.source.schedule, "TAILCAST_SOURCE_SCHEDULE");
        override_u64(
            &mut self.source.poll_interval_ms,
            "TAILCAST_SOURCE_POLL_INTERVAL_MS",
        );
        override_u64(
            &mut self.source.missing_file_timeout_secs,
            "TAILCAST_SOURCE_MISSING_FILE_TIMEOUT_SECS",
        );
        override_usize(
            &mut self.source.max_line_length,
            "TAILCAST_SOURCE_MAX_LINE_LENGTH",
        );
        override_usize(
            &mut self.source.read_chunk_bytes,
            "TAILCAST_SOURCE_READ_CHUNK_BYTES",
        );

        // Relay queue
        override_usize(
            &mut self.relay.queue_capacity,
            "TAILCAST_RELAY_QUEUE_CAPACITY",
        );

        // Distribution
        override_string(&mut self.distribution.mode, "TAILCAST_DISTRIBUTION_MODE");
        override_string(
            &mut self.distribution.listen_addr,
            "TAILCAST_DISTRIBUTION_LISTEN_ADDR",
        );
        override_usize(
            &mut self.distribution.max_subscribers,
            "TAILCAST_DISTRIBUTION_MAX_SUBSCRIBERS",
        );
        override_usize(
            &mut self.distribution.per_subscriber_backlog,
            "TAILCAST_DISTRIBUTION_PER_SUBSCRIBER_BACKLOG",
        );
        override_u64(
            &mut self.distribution.subscriber_write_timeout_ms,
            "TAILCAST_DISTRIBUTION_SUBSCRIBER_WRITE_TIMEOUT_MS",
        );
        override_u64(
            &mut self.distribution.eviction_grace_period_ms,
            "TAILCAST_DISTRIBUTION_EVICTION_GRACE_PERIOD_MS",
        );
        override_u64(
            &mut self.distribution.drain_timeout_secs,
            "TAILCAST_DISTRIBUTION_DRAIN_TIMEOUT_SECS",
        );
        override_bool(
            &mut self.distribution.inject_ingest_timestamp,
            "TAILCAST_DISTRIBUTION_INJECT_INGEST_TIMESTAMP",
        );
        override_csv(
            &mut self.distribution.output_files,
            "TAILCAST_DISTRIBUTION_OUTPUT_FILES",
        );

        // Metrics
        override_bool(&mut self.metrics.enabled, "TAILCAST_METRICS_ENABLED");
        override_string(
            &mut self.metrics.listen_addr,
            "TAILCAST_METRICS_LISTEN_ADDR",
        );
        override_u16(&mut self.metrics.port, "TAILCAST_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), TailcastError> {
        const MAX_QUEUE_CAPACITY: usize = 10_000_000;
        const MAX_BACKLOG: usize = 1_000_000;
        const MAX_POLL_INTERVAL_MS: u64 = 60_000;

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        // source
        if self.source.path.is_empty() {
            return Err(invalid("source.path", "must not be empty"));
        }
        if self.source.resume_cursor && self.source.cursor_path.is_empty() {
            return Err(invalid(
                "source.cursor_path",
                "must not be empty when resume_cursor is enabled",
            ));
        }
        let valid_schedules = ["notify", "poll"];
        if !valid_schedules.contains(&self.source.schedule.as_str()) {
            return Err(invalid(
                "source.schedule",
                format!("must be one of: {}", valid_schedules.join(", ")),
            ));
        }
        if self.source.poll_interval_ms == 0 || self.source.poll_interval_ms > MAX_POLL_INTERVAL_MS
        {
            return Err(invalid(
                "source.poll_interval_ms",
                format!("must be 1-{MAX_POLL_INTERVAL_MS}"),
            ));
        }
        if self.source.missing_file_timeout_secs == 0 {
            return Err(invalid(
                "source.missing_file_timeout_secs",
                "must be greater than 0",
            ));
        }
        if self.source.max_line_length == 0 {
            return Err(invalid("source.max_line_length", "must be greater than 0"));
        }
        if self.source.read_chunk_bytes == 0 {
            return Err(invalid("source.read_chunk_bytes", "must be greater than 0"));
        }

        // relay
        if self.relay.queue_capacity == 0 || self.relay.queue_capacity > MAX_QUEUE_CAPACITY {
            return Err(invalid(
                "relay.queue_capacity",
                format!("must be 1-{MAX_QUEUE_CAPACITY}"),
            ));
        }

        // distribution
        let valid_modes = ["broadcast", "queue"];
        if !valid_modes.contains(&self.distribution.mode.as_str()) {
            return Err(invalid(
                "distribution.mode",
                format!("must be one of: {}", valid_modes.join(", ")),
            ));
        }
        if self.distribution.per_subscriber_backlog == 0
            || self.distribution.per_subscriber_backlog > MAX_BACKLOG
        {
            return Err(invalid(
                "distribution.per_subscriber_backlog",
                format!("must be 1-{MAX_BACKLOG}"),
            ));
        }
        if self.distribution.subscriber_write_timeout_ms == 0 {
            return Err(invalid(
                "distribution.subscriber_write_timeout_ms",
                "must be greater than 0",
            ));
        }
        if self.distribution.eviction_grace_period_ms == 0 {
            return Err(invalid(
                "distribution.eviction_grace_period_ms",
                "must be greater than 0",
            ));
        }
        if !self.distribution.listen_addr.is_empty() && self.distribution.max_subscribers == 0 {
            return Err(invalid(
                "distribution.max_subscribers",
                "must be greater than 0 when listen_addr is set",
            ));
        }
        if self.distribution.output_files.iter().any(String::is_empty) {
            return Err(invalid(
                "distribution.output_files",
                "entries must not be empty",
            ));
        }

        // metrics
        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(invalid("metrics.port", "must be greater than 0"));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> TailcastError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason: reason.into(),
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
        }
    }
}

/// 소스 파일 tail 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// tail 대상 파일 경로 (센서가 append하는 JSON lines 파일)
    pub path: String,
    /// 저장된 커서에서 재개할지 여부. false면 파일 끝에서 시작 (tail-only)
    pub resume_cursor: bool,
    /// 커서 저장 파일 경로
    pub cursor_path: String,
    /// 스케줄링 방식 (notify, poll)
    pub schedule: String,
    /// 폴링 주기 (밀리초). notify 모드에서는 보조 폴링 주기로 사용
    pub poll_interval_ms: u64,
    /// 파일이 사라진 뒤 치명적 에러로 판단하기까지의 대기 시간 (초)
    pub missing_file_timeout_secs: u64,
    /// 최대 라인 길이 (바이트)
    pub max_line_length: usize,
    /// 한 사이클에 읽을 최대 바이트 수
    pub read_chunk_bytes: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: "/var/log/suricata/eve.json".to_owned(),
            resume_cursor: true,
            cursor_path: "/var/lib/tailcast/eve.cursor.json".to_owned(),
            schedule: "notify".to_owned(),
            poll_interval_ms: 100,
            missing_file_timeout_secs: 60,
            max_line_length: 1024 * 1024, // 1MB
            read_chunk_bytes: 1024 * 1024,
        }
    }
}

/// 릴레이 큐 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayQueueConfig {
    /// 큐 최대 용량 (레코드 수)
    pub queue_capacity: usize,
}

impl Default for RelayQueueConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
        }
    }
}

/// 구독자 분배 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributionConfig {
    /// 분배 모드 (broadcast, queue)
    pub mode: String,
    /// TCP 구독자 수신 주소. 빈 문자열이면 리스너를 띄우지 않음
    pub listen_addr: String,
    /// 최대 동시 TCP 구독자 수
    pub max_subscribers: usize,
    /// 구독자별 송신 backlog 용량 (레코드 수)
    pub per_subscriber_backlog: usize,
    /// 구독자 쓰기 타임아웃 (밀리초)
    pub subscriber_write_timeout_ms: u64,
    /// 느린 구독자 축출 유예 시간 (밀리초)
    pub eviction_grace_period_ms: u64,
    /// 종료 시 backlog 드레인 최대 대기 시간 (초)
    pub drain_timeout_secs: u64,
    /// 출력 JSON에 `ingest_timestamp` 필드를 주입할지 여부
    pub inject_ingest_timestamp: bool,
    /// 항상 연결된 구독자로 붙는 로컬 출력 파일 목록
    pub output_files: Vec<String>,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            mode: "broadcast".to_owned(),
            listen_addr: "127.0.0.1:8765".to_owned(),
            max_subscribers: 64,
            per_subscriber_backlog: 1024,
            subscriber_write_timeout_ms: 2_000,
            eviction_grace_period_ms: 5_000,
            drain_timeout_secs: 5,
            inject_ingest_timestamp: false,
            output_files: Vec::new(),
        }
    }
}

/// Prometheus 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 바인드 주소
    pub listen_addr: String,
    /// 포트
    pub port: u16,
    /// 엔드포인트 경로 (현재 "/metrics"만 지원)
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9464,
            endpoint: "/metrics".to_owned(),
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    override_parsed(target, env_key, "bool");
}

fn override_usize(target: &mut usize, env_key: &str) {
    override_parsed(target, env_key, "usize");
}

fn override_u64(target: &mut u64, env_key: &str) {
    override_parsed(target, env_key, "u64");
}

fn override_u16(target: &mut u16, env_key: &str) {
    override_parsed(target, env_key, "u16");
}

fn override_parsed<T: std::str::FromStr>(target: &mut T, env_key: &str, type_name: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                expected = type_name,
                "failed to parse env var, ignoring"
            ),
        }
    }
}

fn override_csv(target: &mut Vec<String>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn default_config_has_sane_values() {
        let config = TailcastConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.source.schedule, "notify");
        assert!(config.source.resume_cursor);
        assert_eq!(config.relay.queue_capacity, 10_000);
        assert_eq!(config.distribution.mode, "broadcast");
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn default_config_passes_validation() {
        TailcastConfig::default().validate().unwrap();
    }

    #[test]
    fn from_str_empty_toml_uses_defaults() {
        let config = TailcastConfig::parse("").unwrap();
        assert_eq!(config.source.path, "/var/log/suricata/eve.json");
        assert_eq!(config.distribution.per_subscriber_backlog, 1024);
    }

    #[test]
    fn from_str_partial_toml_merges_with_defaults() {
        let toml = r#"
[source]
path = "/tmp/eve.json"
schedule = "poll"

[distribution]
mode = "queue"
"#;
        let config = TailcastConfig::parse(toml).unwrap();
        assert_eq!(config.source.path, "/tmp/eve.json");
        assert_eq!(config.source.schedule, "poll");
        // poll_interval_ms는 기본값 유지
        assert_eq!(config.source.poll_interval_ms, 100);
        assert_eq!(config.distribution.mode, "queue");
        assert_eq!(config.distribution.listen_addr, "127.0.0.1:8765");
    }

    #[test]
    fn from_str_invalid_toml_returns_error() {
        let err = TailcastConfig::parse("invalid = [[[toml").unwrap_err();
        assert!(matches!(
            err,
            TailcastError::Config(ConfigError::ParseFailed { .. })
        ));
    }

    #[test]
    fn validate_rejects_unknown_mode() {
        let mut config = TailcastConfig::default();
        config.distribution.mode = "multicast".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("distribution.mode"));
    }

    #[test]
    fn validate_rejects_unknown_schedule() {
        let mut config = TailcastConfig::default();
        config.source.schedule = "inotify".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("source.schedule"));
    }

    #[test]
    fn validate_rejects_zero_queue_capacity() {
        let mut config = TailcastConfig::default();
        config.relay.queue_capacity = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("queue_capacity"));
    }

    #[test]
    fn validate_rejects_zero_backlog() {
        let mut config = TailcastConfig::default();
        config.distribution.per_subscriber_backlog = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_requires_cursor_path_when_resuming() {
        let mut config = TailcastConfig::default();
        config.source.cursor_path = String::new();
        assert!(config.validate().is_err());

        config.source.resume_cursor = false;
        config.validate().unwrap();
    }

    #[test]
    fn validate_rejects_invalid_log_format() {
        let mut config = TailcastConfig::default();
        config.general.log_format = "xml".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("log_format"));
    }

    #[test]
    #[serial]
    fn env_override_string() {
        let mut val = "original".to_owned();
        // SAFETY: serial 테스트로 실행되므로 환경변수 조작이 다른 테스트와 겹치지 않습니다.
        unsafe { std::env::set_var("TEST_TAILCAST_STR", "overridden") };
        override_string(&mut val, "TEST_TAILCAST_STR");
        assert_eq!(val, "overridden");
        unsafe { std::env::remove_var("TEST_TAILCAST_STR") };
    }

    #[test]
    #[serial]
    fn env_override_bool_invalid_keeps_original() {
        let mut val = false;
        // SAFETY: serial 테스트로 실행되므로 환경변수 조작이 다른 테스트와 겹치지 않습니다.
        unsafe { std::env::set_var("TEST_TAILCAST_BOOL_BAD", "not-a-bool") };
        override_bool(&mut val, "TEST_TAILCAST_BOOL_BAD");
        assert!(!val);
        unsafe { std::env::remove_var("TEST_TAILCAST_BOOL_BAD") };
    }

    #[test]
    #[serial]
    fn env_override_csv_skips_empty_entries() {
        let mut val = vec!["a".to_owned()];
        // SAFETY: serial 테스트로 실행되므로 환경변수 조작이 다른 테스트와 겹치지 않습니다.
        unsafe { std::env::set_var("TEST_TAILCAST_CSV", "/tmp/a.json, ,/tmp/b.json") };
        override_csv(&mut val, "TEST_TAILCAST_CSV");
        assert_eq!(val, vec!["/tmp/a.json", "/tmp/b.json"]);
        unsafe { std::env::remove_var("TEST_TAILCAST_CSV") };
    }

    #[test]
    fn env_override_missing_var_keeps_original() {
        let mut val = 42u64;
        override_u64(&mut val, "TEST_TAILCAST_NONEXISTENT_12345");
        assert_eq!(val, 42);
    }

    #[test]
    fn config_serialize_roundtrip() {
        let config = TailcastConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed = TailcastConfig::parse(&toml_str).unwrap();
        assert_eq!(config.source.path, parsed.source.path);
        assert_eq!(
            config.distribution.eviction_grace_period_ms,
            parsed.distribution.eviction_grace_period_ms
        );
    }

    #[tokio::test]
    async fn from_file_not_found() {
        let err = TailcastConfig::from_file("/nonexistent/path/tailcast.toml")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TailcastError::Config(ConfigError::FileNotFound { .. })
        ));
    }
}
