//! 릴레이 데이터 모델
//!
//! - [`LogRecord`]: 검증을 통과한 한 줄의 로그. 생성 후 불변이며 `Arc`로 공유됩니다.
//! - [`TailCursor`]: 소스 파일에서 어디까지 소비했는지 나타내는 재개 위치
//! - [`RotationMarker`]: 로테이션/truncation으로 인한 불연속 지점 표시
//! - [`RelayItem`]: 릴레이 큐를 통과하는 단위 (레코드 또는 로테이션 마커)

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// 검증된 JSON 객체
pub type JsonObject = serde_json::Map<String, serde_json::Value>;

/// 검증된 로그 레코드
///
/// `sequence`는 Tailer가 부여하며 하위 단계의 유일한 순서 키입니다.
/// broadcast 모드에서는 여러 싱크가 같은 레코드를 동시에 읽습니다.
#[derive(Debug, Clone)]
pub struct LogRecord {
    /// 단조 증가 순번
    pub sequence: u64,
    /// 라인 시작 바이트 오프셋
    pub read_offset: u64,
    /// 라인 끝(개행 포함) 바이트 오프셋
    pub end_offset: u64,
    /// 원본 라인 바이트 (개행 제외)
    pub raw_bytes: Bytes,
    /// 파싱된 JSON 객체
    pub parsed: JsonObject,
    /// Tailer가 읽은 시각
    pub received_at: SystemTime,
}

impl LogRecord {
    /// 이벤트 유형 (`event_type` 필드, Suricata EVE 규약)을 반환합니다.
    pub fn event_type(&self) -> &str {
        self.parsed
            .get("event_type")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unknown")
    }
}

/// 공유 레코드 핸들
pub type SharedRecord = Arc<LogRecord>;

/// 파일 식별자 (device + inode)
///
/// 같은 경로에 새 파일이 생기면 식별자가 바뀌므로 로테이션 감지에 사용합니다.
/// inode 개념이 없는 플랫폼에서는 항상 기본값이며, truncation 감지만 동작합니다.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileIdentity {
    /// 디바이스 번호
    pub dev: u64,
    /// inode 번호
    pub ino: u64,
}

impl FileIdentity {
    /// 파일 메타데이터에서 식별자를 추출합니다.
    #[cfg(unix)]
    pub fn from_metadata(meta: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            dev: meta.dev(),
            ino: meta.ino(),
        }
    }

    /// 파일 메타데이터에서 식별자를 추출합니다.
    #[cfg(not(unix))]
    pub fn from_metadata(_meta: &std::fs::Metadata) -> Self {
        Self::default()
    }
}

impl fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dev, self.ino)
    }
}

/// tail 재개 위치
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TailCursor {
    /// 커서가 가리키는 파일
    pub file_identity: FileIdentity,
    /// 검증 + 큐 삽입까지 끝난 바이트 오프셋
    pub byte_offset: u64,
}

/// 로테이션 감지 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationReason {
    /// 경로에 다른 파일(inode)이 생김
    Replaced,
    /// 같은 파일이 현재 위치보다 작아짐
    Truncated,
}

impl RotationReason {
    /// 메트릭/로그 레이블용 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Replaced => "replaced",
            Self::Truncated => "truncated",
        }
    }
}

impl fmt::Display for RotationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 로테이션 불연속 표시
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationMarker {
    /// 감지 사유
    pub reason: RotationReason,
    /// 로테이션 직전 커서
    pub previous: TailCursor,
    /// 새 파일 기준 커서 (byte_offset = 0)
    pub current: TailCursor,
    /// 로테이션 이후 첫 레코드가 받을 순번
    pub next_sequence: u64,
    /// 로테이션 시 버려진 미완성 라인 바이트 수
    pub discarded_partial_bytes: usize,
}

/// 릴레이 큐를 통과하는 단위
#[derive(Debug, Clone)]
pub enum RelayItem {
    /// 검증된 레코드
    Record(SharedRecord),
    /// 로테이션 불연속 표시
    Rotated(RotationMarker),
}
