//! 커서 파일 저장소
//!
//! 재시작 시 이미 전달한 바이트를 다시 읽지 않고, 중단 동안 쓰인 바이트를
//! 건너뛰지도 않도록 커밋된 [`TailCursor`]와 다음 순번을 JSON 파일로 보관합니다.
//! 쓰기는 임시 파일 + rename으로 원자적으로 수행합니다.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::record::TailCursor;

/// 커서 파일 내용
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorState {
    /// 커밋된 커서
    pub cursor: TailCursor,
    /// 다음 레코드가 받을 순번
    pub next_sequence: u64,
    /// 마지막 저장 시각 (RFC 3339)
    #[serde(default)]
    pub updated_at: String,
}

impl CursorState {
    /// 현재 시각으로 상태를 생성합니다.
    pub fn new(cursor: TailCursor, next_sequence: u64) -> Self {
        Self {
            cursor,
            next_sequence,
            updated_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// 커서 파일 저장소
#[derive(Debug, Clone)]
pub struct CursorStore {
    path: PathBuf,
}

impl CursorStore {
    /// 저장소를 생성합니다. 파일은 첫 저장 때 만들어집니다.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// 커서 파일 경로
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 저장된 상태를 읽습니다. 파일이 없으면 `None`입니다.
    pub async fn load(&self) -> Result<Option<CursorState>, RelayError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.error(e.to_string())),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| self.error(format!("invalid cursor file: {e}")))
    }

    /// 상태를 원자적으로 저장합니다.
    pub async fn save(&self, state: &CursorState) -> Result<(), RelayError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.error(format!("failed to create directory: {e}")))?;
        }

        let json = serde_json::to_vec_pretty(state).map_err(|e| self.error(e.to_string()))?;
        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| self.error(format!("failed to write temp file: {e}")))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.error(format!("failed to replace cursor file: {e}")))?;

        tracing::trace!(
            path = %self.path.display(),
            offset = state.cursor.byte_offset,
            next_sequence = state.next_sequence,
            "cursor persisted"
        );
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn error(&self, reason: String) -> RelayError {
        RelayError::Cursor {
            path: self.path.display().to_string(),
            reason,
        }
    }
}
