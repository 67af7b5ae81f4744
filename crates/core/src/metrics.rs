//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`
//! 매크로를 호출합니다. 레코더가 설치되지 않았다면 호출은 no-op입니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `tailcast_`
//! - 컴포넌트: `tailer_`, `validator_`, `queue_`, `distribution_`, `daemon_`
//! - 접미어: `_total` (counter), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! metrics::counter!(tailcast_core::metrics::TAILER_LINES_READ_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 분배 모드 레이블 키 (broadcast, queue)
pub const LABEL_MODE: &str = "mode";

/// 로테이션 사유 레이블 키 (replaced, truncated)
pub const LABEL_REASON: &str = "reason";

// ─── Tailer 메트릭 ────────────────────────────────────────────────

/// Tailer: 읽은 전체 라인 수 (counter)
pub const TAILER_LINES_READ_TOTAL: &str = "tailcast_tailer_lines_read_total";

/// Tailer: 읽은 바이트 수 (counter)
pub const TAILER_BYTES_READ_TOTAL: &str = "tailcast_tailer_bytes_read_total";

/// Tailer: 감지된 로테이션/truncation 수 (counter, label: reason)
pub const TAILER_ROTATIONS_TOTAL: &str = "tailcast_tailer_rotations_total";

/// Tailer: 재시도된 I/O 에러 수 (counter)
pub const TAILER_IO_RETRIES_TOTAL: &str = "tailcast_tailer_io_retries_total";

/// Tailer: 커밋된 커서 오프셋 (gauge)
pub const TAILER_CURSOR_OFFSET: &str = "tailcast_tailer_cursor_offset";

// ─── Validator 메트릭 ─────────────────────────────────────────────

/// Validator: 유효하지 않아 드롭된 라인 수 (counter)
pub const VALIDATOR_INVALID_LINES_TOTAL: &str = "tailcast_validator_invalid_lines_total";

// ─── Queue 메트릭 ─────────────────────────────────────────────────

/// Queue: 큐에 들어간 레코드 수 (counter)
pub const QUEUE_RECORDS_ENQUEUED_TOTAL: &str = "tailcast_queue_records_enqueued_total";

/// Queue: 현재 큐 깊이 (gauge)
pub const QUEUE_DEPTH: &str = "tailcast_queue_depth";

// ─── Distribution 메트릭 ──────────────────────────────────────────

/// Distribution: 현재 Active 구독자 수 (gauge)
pub const DISTRIBUTION_SUBSCRIBERS_ACTIVE: &str = "tailcast_distribution_subscribers_active";

/// Distribution: 구독자에게 전달 완료된 레코드 수 (counter)
pub const DISTRIBUTION_RECORDS_DELIVERED_TOTAL: &str =
    "tailcast_distribution_records_delivered_total";

/// Distribution: 수신자가 없어 발행만 된 레코드 수 (counter, broadcast)
pub const DISTRIBUTION_RECORDS_UNROUTED_TOTAL: &str =
    "tailcast_distribution_records_unrouted_total";

/// Distribution: 축출로 인해 특정 구독자에게서 드롭된 레코드 수 (counter)
pub const DISTRIBUTION_RECORDS_DROPPED_TOTAL: &str = "tailcast_distribution_records_dropped_total";

/// Distribution: 느린 구독자 축출 수 (counter, label: mode)
pub const DISTRIBUTION_EVICTIONS_TOTAL: &str = "tailcast_distribution_evictions_total";

/// Distribution: 큐 모드에서 재전달된 레코드 수 (counter)
pub const DISTRIBUTION_RECORDS_REQUEUED_TOTAL: &str =
    "tailcast_distribution_records_requeued_total";

// ─── Daemon 메트릭 ────────────────────────────────────────────────

/// Daemon: 프로세스 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "tailcast_daemon_uptime_seconds";

/// 모든 메트릭의 설명을 등록합니다.
///
/// 레코더 설치 직후 한 번 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge};

    // Tailer
    describe_counter!(
        TAILER_LINES_READ_TOTAL,
        "Total number of complete lines read from the source file"
    );
    describe_counter!(
        TAILER_BYTES_READ_TOTAL,
        "Total number of bytes read from the source file"
    );
    describe_counter!(
        TAILER_ROTATIONS_TOTAL,
        "Rotations or truncations detected on the source file"
    );
    describe_counter!(
        TAILER_IO_RETRIES_TOTAL,
        "Transient I/O errors retried by the tailer"
    );
    describe_gauge!(
        TAILER_CURSOR_OFFSET,
        "Committed byte offset of the tail cursor"
    );

    // Validator
    describe_counter!(
        VALIDATOR_INVALID_LINES_TOTAL,
        "Lines dropped because they are not a well-formed JSON object"
    );

    // Queue
    describe_counter!(
        QUEUE_RECORDS_ENQUEUED_TOTAL,
        "Records accepted into the bounded relay queue"
    );
    describe_gauge!(QUEUE_DEPTH, "Records currently waiting in the relay queue");

    // Distribution
    describe_gauge!(
        DISTRIBUTION_SUBSCRIBERS_ACTIVE,
        "Subscribers currently in the Active state"
    );
    describe_counter!(
        DISTRIBUTION_RECORDS_DELIVERED_TOTAL,
        "Records written to a subscriber sink"
    );
    describe_counter!(
        DISTRIBUTION_RECORDS_UNROUTED_TOTAL,
        "Broadcast records published while no subscriber was active"
    );
    describe_counter!(
        DISTRIBUTION_RECORDS_DROPPED_TOTAL,
        "Records dropped for a single subscriber on eviction"
    );
    describe_counter!(
        DISTRIBUTION_EVICTIONS_TOTAL,
        "Slow subscribers evicted after the grace period"
    );
    describe_counter!(
        DISTRIBUTION_RECORDS_REQUEUED_TOTAL,
        "Queue-mode records handed back by a closing subscriber"
    );

    // Daemon
    describe_gauge!(DAEMON_UPTIME_SECONDS, "Seconds since the daemon started");
}
