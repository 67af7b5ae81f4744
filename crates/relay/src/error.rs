//! 릴레이 파이프라인 에러 타입
//!
//! [`RelayError`]는 릴레이 파이프라인 내부에서 발생하는 모든 에러를 표현합니다.
//! 각 에러는 [`RelayError::is_fatal`]로 분류되어, 호출자가 재시도할지
//! 파이프라인을 중단할지 명시적으로 결정합니다.
//! `From<RelayError> for TailcastError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.

use tailcast_core::error::{ConfigError, PipelineError, SourceError, TailcastError};

/// 릴레이 파이프라인 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// 소스 파일이 제한 시간 이상 존재하지 않음 (치명적)
    #[error("source file {path} missing for more than {waited_secs}s")]
    SourceGone {
        /// 소스 파일 경로
        path: String,
        /// 대기한 시간 (초)
        waited_secs: u64,
    },

    /// 소스 파일 읽기 중 일시적 I/O 에러 (재시도 대상)
    #[error("transient source io error on {path}: {source}")]
    SourceIo {
        /// 소스 파일 경로
        path: String,
        /// 원인 I/O 에러
        #[source]
        source: std::io::Error,
    },

    /// 커서 파일 읽기/쓰기 실패
    #[error("cursor store error: {path}: {reason}")]
    Cursor {
        /// 커서 파일 경로
        path: String,
        /// 실패 사유
        reason: String,
    },

    /// 파일 변경 감시 설정 실패
    #[error("watch error: {0}")]
    Watch(String),

    /// 구독자 싱크 에러 (연결 종료, 쓰기 실패 등)
    #[error("sink error: {subscriber}: {reason}")]
    Sink {
        /// 구독자 설명 (피어 주소, 파일 경로 등)
        subscriber: String,
        /// 에러 사유
        reason: String,
    },

    /// TCP 리스너 에러
    #[error("listener error: {0}")]
    Listener(String),

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 채널 통신 에러 (상대 태스크 종료)
    #[error("channel error: {0}")]
    Channel(String),

    /// 기타 I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// 파이프라인을 중단해야 하는 치명적 에러인지 확인합니다.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::SourceGone { .. } | Self::Config { .. } | Self::Listener(_)
        )
    }

    /// 백오프 후 재시도하면 되는 일시적 에러인지 확인합니다.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::SourceIo { .. } | Self::Cursor { .. })
    }
}

impl From<RelayError> for TailcastError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::SourceGone { path, waited_secs } => {
                TailcastError::Source(SourceError::Gone { path, waited_secs })
            }
            RelayError::Config { field, reason } => {
                TailcastError::Config(ConfigError::InvalidValue { field, reason })
            }
            other => TailcastError::Pipeline(PipelineError::InitFailed(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_gone_is_fatal_and_maps_to_source_error() {
        let err = RelayError::SourceGone {
            path: "/var/log/suricata/eve.json".to_owned(),
            waited_secs: 60,
        };
        assert!(err.is_fatal());
        assert!(!err.is_transient());

        let top: TailcastError = err.into();
        assert!(top.is_source());
    }

    #[test]
    fn source_io_is_transient() {
        let err = RelayError::SourceIo {
            path: "/tmp/eve.json".to_owned(),
            source: std::io::Error::other("EIO"),
        };
        assert!(err.is_transient());
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("eve.json"));
    }

    #[test]
    fn config_error_maps_to_config() {
        let err = RelayError::Config {
            field: "queue_capacity".to_owned(),
            reason: "must be greater than 0".to_owned(),
        };
        assert!(err.is_fatal());
        let top: TailcastError = err.into();
        assert!(top.is_config());
    }

    #[test]
    fn sink_error_is_neither_fatal_nor_transient() {
        let err = RelayError::Sink {
            subscriber: "tcp:127.0.0.1:50000".to_owned(),
            reason: "connection reset".to_owned(),
        };
        assert!(!err.is_fatal());
        assert!(!err.is_transient());
        let top: TailcastError = err.into();
        assert!(matches!(top, TailcastError::Pipeline(_)));
    }
}
