//! 라인 검증기 -- 원시 라인이 구조화된 레코드인지 확인합니다.
//!
//! 스키마는 강제하지 않습니다. "파싱 가능한 JSON 객체"인지만 확인하며,
//! 유효하지 않은 라인은 카운트/로깅 후 드롭되어 큐 용량을 차지하지 않습니다.

use std::sync::atomic::{AtomicU64, Ordering};

use tailcast_core::metrics as m;

use crate::record::JsonObject;

/// 로그에 남길 미리보기 최대 문자 수
pub const DEFAULT_PREVIEW_CHARS: usize = 100;

/// 검증 결과
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    /// 유효한 JSON 객체
    Valid(JsonObject),
    /// 유효하지 않음
    Invalid(InvalidReason),
}

/// 검증 실패 사유
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidReason {
    /// UTF-8이 아님
    NotUtf8,
    /// JSON 문법 오류
    Malformed {
        /// 오류 위치 (1-based 컬럼)
        column: usize,
        /// 파서 메시지
        message: String,
    },
    /// JSON이지만 최상위가 객체가 아님
    NotAnObject {
        /// 실제 최상위 타입
        found: &'static str,
    },
    /// 최대 라인 길이 초과 (Tailer에서 잘린 라인)
    Oversized {
        /// 관측된 길이 (바이트)
        len: usize,
        /// 허용 최대 길이
        max: usize,
    },
}

impl std::fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotUtf8 => write!(f, "not valid utf-8"),
            Self::Malformed { column, message } => {
                write!(f, "malformed json at column {column}: {message}")
            }
            Self::NotAnObject { found } => write!(f, "top-level value is {found}, not an object"),
            Self::Oversized { len, max } => write!(f, "line of {len} bytes exceeds max {max}"),
        }
    }
}

/// 라인 검증기
///
/// 여러 태스크에서 공유할 수 있도록 카운터는 원자적으로 관리합니다.
#[derive(Debug)]
pub struct LineValidator {
    preview_chars: usize,
    valid_count: AtomicU64,
    invalid_count: AtomicU64,
}

impl LineValidator {
    /// 새 검증기를 생성합니다.
    pub fn new() -> Self {
        Self {
            preview_chars: DEFAULT_PREVIEW_CHARS,
            valid_count: AtomicU64::new(0),
            invalid_count: AtomicU64::new(0),
        }
    }

    /// 로그 미리보기 길이를 설정합니다.
    pub fn with_preview_chars(mut self, chars: usize) -> Self {
        self.preview_chars = chars;
        self
    }

    /// 원시 라인 바이트를 검증합니다.
    ///
    /// 유효하지 않은 라인은 이 함수 안에서 카운트되고 로깅됩니다.
    pub fn validate(&self, raw: &[u8]) -> Validation {
        let result = Self::check(raw);
        match &result {
            Validation::Valid(_) => {
                self.valid_count.fetch_add(1, Ordering::Relaxed);
            }
            Validation::Invalid(reason) => self.reject(raw, reason),
        }
        result
    }

    /// 잘린(oversized) 라인을 유효하지 않은 라인으로 기록합니다.
    pub fn reject_oversized(&self, prefix: &[u8], len: usize, max: usize) {
        self.reject(prefix, &InvalidReason::Oversized { len, max });
    }

    fn check(raw: &[u8]) -> Validation {
        let text = match std::str::from_utf8(raw) {
            Ok(t) => t,
            Err(_) => return Validation::Invalid(InvalidReason::NotUtf8),
        };

        match serde_json::from_str::<serde_json::Value>(text) {
            Ok(serde_json::Value::Object(map)) => Validation::Valid(map),
            Ok(other) => Validation::Invalid(InvalidReason::NotAnObject {
                found: json_type_name(&other),
            }),
            Err(e) => Validation::Invalid(InvalidReason::Malformed {
                column: e.column(),
                message: e.to_string(),
            }),
        }
    }

    fn reject(&self, raw: &[u8], reason: &InvalidReason) {
        self.invalid_count.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(m::VALIDATOR_INVALID_LINES_TOTAL).increment(1);
        tracing::warn!(
            reason = %reason,
            preview = %preview(raw, self.preview_chars),
            "skipping invalid line"
        );
    }

    /// 유효한 라인 수를 반환합니다.
    pub fn valid_count(&self) -> u64 {
        self.valid_count.load(Ordering::Relaxed)
    }

    /// 드롭된 유효하지 않은 라인 수를 반환합니다.
    pub fn invalid_count(&self) -> u64 {
        self.invalid_count.load(Ordering::Relaxed)
    }
}

impl Default for LineValidator {
    fn default() -> Self {
        Self::new()
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// 최대 `max_chars` 문자까지의 손실 허용 미리보기를 만듭니다.
pub fn preview(raw: &[u8], max_chars: usize) -> String {
    let text = String::from_utf8_lossy(raw);
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().nth(max_chars).is_some() {
        out.push_str("...");
    }
    out
}
