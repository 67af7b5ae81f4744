//! 에러 타입: 도메인별 에러 정의
//!
//! 운영자에게 보고되는 에러는 세 갈래로 나뉩니다.
//! - [`ConfigError`]: 잘못된 설정 (프로세스 종료 코드 2)
//! - [`SourceError`]: 소스 파일을 영구적으로 잃음 (프로세스 종료 코드 1)
//! - [`PipelineError`]: 생명주기/채널 에러

/// tailcast 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum TailcastError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 소스 파일 관련 치명적 에러
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// 파이프라인 처리 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TailcastError {
    /// 설정 에러인지 확인합니다.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// 소스 파일 에러인지 확인합니다.
    pub fn is_source(&self) -> bool {
        matches!(self, Self::Source(_))
    }
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 소스 파일 치명적 에러
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// 파일이 삭제된 뒤 제한 시간 내에 다시 생성되지 않음
    #[error("source file {path} missing for more than {waited_secs}s")]
    Gone { path: String, waited_secs: u64 },

    /// 파일을 열 수 없음 (권한 등, 재시도로 해결되지 않는 경우)
    #[error("source file {path} unreadable: {reason}")]
    Unreadable { path: String, reason: String },
}

/// 파이프라인 처리 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 이미 실행 중
    #[error("pipeline is already running")]
    AlreadyRunning,

    /// 실행 중이 아님
    #[error("pipeline is not running")]
    NotRunning,

    /// 채널 전송 실패
    #[error("channel send failed: {0}")]
    ChannelSend(String),

    /// 파이프라인 초기화 실패
    #[error("pipeline init failed: {0}")]
    InitFailed(String),
}
