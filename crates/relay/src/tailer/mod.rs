//! Tailer -- 계속 늘어나는 파일을 따라가며 라인을 생산합니다.
//!
//! # 계약
//! [`Tailer::next`]는 다음 중 하나를 반환합니다.
//! - [`TailEvent::Line`]: 완전한 라인 하나
//! - [`TailEvent::Oversized`]: 최대 길이를 넘어 버려진 라인
//! - [`TailEvent::Rotated`]: 로테이션/truncation 불연속 표시
//! - [`TailEvent::WouldBlock`]: 지금은 읽을 것이 없음
//!
//! 일시적 I/O 에러는 `RelayError::SourceIo`, 파일이 제한 시간 이상 없으면
//! `RelayError::SourceGone`입니다.
//!
//! # 로테이션 감지
//! - 경로의 파일 식별자(device + inode) 변경: 기존 핸들을 끝까지 읽은 뒤 새 파일을 엽니다.
//! - 읽기 위치 > 파일 크기: truncation으로 보고 처음부터 다시 읽습니다.
//!
//! # 커서
//! 커서는 [`Tailer::commit`]으로만 전진합니다. 수집 루프는 라인을 검증하고
//! 큐에 넣은 다음에 커밋하므로, 저장된 커서 이전의 바이트는 모두 큐에 들어간 것입니다.

pub mod cursor;
pub mod lines;
pub mod schedule;

use std::collections::VecDeque;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::sync::CancellationToken;

use tailcast_core::metrics as m;

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::queue::RelaySender;
use crate::record::{
    FileIdentity, JsonObject, LogRecord, RelayItem, RotationMarker, RotationReason, TailCursor,
};
use crate::validator::{LineValidator, Validation};

use cursor::{CursorState, CursorStore};
use lines::{LineSplitter, Split};
use schedule::Wakeup;

/// 이 횟수만큼 커밋하면 읽을 것이 남아 있어도 커서를 저장합니다
const PERSIST_EVERY_COMMITS: u64 = 1000;

/// 일시적 에러 재시도 초기 지연
const INITIAL_RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// 파일에서 읽은 완전한 라인
#[derive(Debug, Clone)]
pub struct RawLine {
    /// 라인 바이트 (개행 제외)
    pub bytes: Bytes,
    /// 라인 시작 오프셋
    pub read_offset: u64,
    /// 개행 다음 오프셋
    pub end_offset: u64,
    /// 라인을 읽은 파일
    pub file_identity: FileIdentity,
    /// 읽은 시각
    pub received_at: SystemTime,
}

impl RawLine {
    /// 이 라인까지 소비했을 때의 커서
    pub fn cursor_after(&self) -> TailCursor {
        TailCursor {
            file_identity: self.file_identity,
            byte_offset: self.end_offset,
        }
    }
}

/// 최대 길이를 넘어 버려진 라인
#[derive(Debug, Clone)]
pub struct OversizedLine {
    /// 로그용 앞부분
    pub prefix: Bytes,
    /// 개행 제외 길이
    pub len: usize,
    /// 라인 시작 오프셋
    pub read_offset: u64,
    /// 개행 다음 오프셋
    pub end_offset: u64,
    /// 라인을 읽은 파일
    pub file_identity: FileIdentity,
}

impl OversizedLine {
    /// 이 라인까지 소비했을 때의 커서
    pub fn cursor_after(&self) -> TailCursor {
        TailCursor {
            file_identity: self.file_identity,
            byte_offset: self.end_offset,
        }
    }
}

/// `Tailer::next` 결과
#[derive(Debug)]
pub enum TailEvent {
    /// 완전한 라인
    Line(RawLine),
    /// 버려진 긴 라인
    Oversized(OversizedLine),
    /// 로테이션/truncation
    Rotated(RotationMarker),
    /// 읽을 것이 없음
    WouldBlock,
}

/// 시작 위치 결정 방식
#[derive(Debug, Clone, Copy)]
enum StartPosition {
    /// 저장된 커서에서 재개 (없으면 처음부터)
    Resume(Option<TailCursor>),
    /// 파일 끝에서 시작 (새로 추가되는 라인만)
    End,
    /// 처음부터
    Beginning,
}

/// 파일 tailer
pub struct Tailer {
    path: PathBuf,
    file: Option<File>,
    identity: FileIdentity,
    splitter: LineSplitter,
    ready: VecDeque<Split>,
    pending_marker: Option<RotationMarker>,
    start: StartPosition,
    read_buf: Vec<u8>,

    next_sequence: u64,
    committed: TailCursor,
    committed_next_sequence: u64,
    commits_since_persist: u64,
    dirty: bool,
    store: Option<CursorStore>,

    missing_since: Option<Instant>,
    missing_timeout: Duration,
}

impl Tailer {
    /// 설정에 따라 tailer를 엽니다.
    ///
    /// - `resume_cursor = true`: 커서 파일에서 재개합니다. 커서가 없으면 처음부터 읽습니다.
    /// - `resume_cursor = false`: 파일 끝에서 시작해 새로 추가되는 라인만 읽습니다.
    ///   파일이 아직 없으면 나중에 생성된 파일을 처음부터 읽습니다.
    ///
    /// 소스 파일이 아직 없으면 `missing_file_timeout` 동안 나타나기를 기다립니다.
    pub async fn open(config: &RelayConfig) -> Result<Self, RelayError> {
        let (store, start, next_sequence) = if config.resume_cursor {
            let store = CursorStore::new(&config.cursor_path);
            let saved = match store.load().await {
                Ok(saved) => saved,
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring unreadable cursor file, starting from the beginning");
                    None
                }
            };
            let next_sequence = saved.as_ref().map_or(0, |s| s.next_sequence);
            let cursor = saved.map(|s| s.cursor);
            (Some(store), StartPosition::Resume(cursor), next_sequence)
        } else {
            (None, StartPosition::End, 0)
        };

        let mut tailer = Self {
            path: config.source_path.clone(),
            file: None,
            identity: FileIdentity::default(),
            splitter: LineSplitter::new(config.max_line_length, 0),
            ready: VecDeque::new(),
            pending_marker: None,
            start,
            read_buf: vec![0; config.read_chunk_bytes.max(1)],
            next_sequence,
            committed: TailCursor::default(),
            committed_next_sequence: next_sequence,
            commits_since_persist: 0,
            dirty: false,
            store,
            missing_since: None,
            missing_timeout: config.missing_file_timeout(),
        };

        tailer.try_open().await?;
        Ok(tailer)
    }

    /// 다음 이벤트를 반환합니다.
    pub async fn next(&mut self) -> Result<TailEvent, RelayError> {
        loop {
            if let Some(marker) = self.pending_marker.take() {
                return Ok(TailEvent::Rotated(marker));
            }
            if let Some(split) = self.ready.pop_front() {
                return Ok(self.to_event(split));
            }
            if !self.read_cycle().await? {
                return Ok(TailEvent::WouldBlock);
            }
        }
    }

    fn to_event(&self, split: Split) -> TailEvent {
        metrics::counter!(m::TAILER_LINES_READ_TOTAL).increment(1);
        match split {
            Split::Line { bytes, start, end } => TailEvent::Line(RawLine {
                bytes,
                read_offset: start,
                end_offset: end,
                file_identity: self.identity,
                received_at: SystemTime::now(),
            }),
            Split::Oversized {
                start,
                end,
                len,
                prefix,
            } => TailEvent::Oversized(OversizedLine {
                prefix,
                len,
                read_offset: start,
                end_offset: end,
                file_identity: self.identity,
            }),
        }
    }

    /// 한 번 읽기를 시도합니다. 새 라인이나 마커가 생겼으면 `true`입니다.
    async fn read_cycle(&mut self) -> Result<bool, RelayError> {
        if self.file.is_none() {
            return self.try_open().await;
        }

        let n = match self.file.as_mut() {
            Some(file) => file
                .read(&mut self.read_buf)
                .await
                .map_err(|e| source_io(&self.path, e))?,
            None => 0,
        };

        if n > 0 {
            metrics::counter!(m::TAILER_BYTES_READ_TOTAL).increment(n as u64);
            let mut out = Vec::new();
            self.splitter.push(&self.read_buf[..n], &mut out);
            self.ready.extend(out);
            // 라인이 완성되지 않았어도 더 읽을 데이터가 있을 수 있습니다
            return Ok(true);
        }

        // 기존 핸들을 끝까지 읽었으므로 이제 로테이션을 확인합니다
        self.check_rotation().await
    }

    /// 소스 파일을 처음 엽니다. 이후의 재오픈은 로테이션 감지에서 처리합니다.
    async fn try_open(&mut self) -> Result<bool, RelayError> {
        let mut file = match File::open(&self.path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // 없는 파일의 끝은 0이므로 나중에 생성된 파일은 처음부터 읽습니다
                if matches!(self.start, StartPosition::End) {
                    self.start = StartPosition::Beginning;
                }
                self.note_missing()?;
                return Ok(false);
            }
            Err(e) => return Err(source_io(&self.path, e)),
        };
        self.missing_since = None;

        let meta = file
            .metadata()
            .await
            .map_err(|e| source_io(&self.path, e))?;
        let identity = FileIdentity::from_metadata(&meta);
        let size = meta.len();

        let (offset, marker_reason) = match std::mem::replace(&mut self.start, StartPosition::Beginning)
        {
            StartPosition::Resume(Some(saved)) if saved.file_identity != identity => {
                tracing::warn!(
                    path = %self.path.display(),
                    saved = %saved.file_identity,
                    current = %identity,
                    "cursor refers to a different file, starting at the beginning"
                );
                self.committed = saved;
                (0, Some(RotationReason::Replaced))
            }
            StartPosition::Resume(Some(saved)) if saved.byte_offset > size => {
                tracing::warn!(
                    path = %self.path.display(),
                    offset = saved.byte_offset,
                    size = size,
                    "file shrank since the cursor was saved, starting at the beginning"
                );
                self.committed = saved;
                (0, Some(RotationReason::Truncated))
            }
            StartPosition::Resume(Some(saved)) => (saved.byte_offset, None),
            StartPosition::Resume(None) | StartPosition::Beginning => (0, None),
            StartPosition::End => (size, None),
        };

        if offset > 0 {
            file.seek(SeekFrom::Start(offset))
                .await
                .map_err(|e| source_io(&self.path, e))?;
        }

        let previous = self.committed;
        self.file = Some(file);
        self.identity = identity;
        let discarded = self.splitter.reset(offset);
        let current = TailCursor {
            file_identity: identity,
            byte_offset: offset,
        };
        if marker_reason.is_none() {
            // 마커가 없으면 시작 위치가 곧 커밋 위치입니다
            self.committed = current;
            self.dirty = true;
        }

        tracing::info!(
            path = %self.path.display(),
            identity = %identity,
            offset = offset,
            next_sequence = self.next_sequence,
            "source file opened"
        );

        if let Some(reason) = marker_reason {
            self.emit_rotation(reason, previous, current, discarded);
        }
        Ok(true)
    }

    async fn check_rotation(&mut self) -> Result<bool, RelayError> {
        let meta = match tokio::fs::metadata(&self.path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // 파일이 이동/삭제되었고 아직 새 파일이 없습니다
                self.note_missing()?;
                return Ok(false);
            }
            Err(e) => return Err(source_io(&self.path, e)),
        };
        self.missing_since = None;

        let identity = FileIdentity::from_metadata(&meta);
        let read_pos = self.splitter.next_offset();
        let previous = TailCursor {
            file_identity: self.identity,
            byte_offset: read_pos,
        };

        if identity != self.identity {
            let mut file = File::open(&self.path)
                .await
                .map_err(|e| source_io(&self.path, e))?;
            let actual = file
                .metadata()
                .await
                .map(|m| FileIdentity::from_metadata(&m))
                .map_err(|e| source_io(&self.path, e))?;
            file.seek(SeekFrom::Start(0))
                .await
                .map_err(|e| source_io(&self.path, e))?;
            self.file = Some(file);
            self.identity = actual;
            let discarded = self.splitter.reset(0);
            let current = TailCursor {
                file_identity: actual,
                byte_offset: 0,
            };
            self.emit_rotation(RotationReason::Replaced, previous, current, discarded);
            return Ok(true);
        }

        if meta.len() < read_pos {
            if let Some(file) = self.file.as_mut() {
                file.seek(SeekFrom::Start(0))
                    .await
                    .map_err(|e| source_io(&self.path, e))?;
            }
            let discarded = self.splitter.reset(0);
            let current = TailCursor {
                file_identity: identity,
                byte_offset: 0,
            };
            self.emit_rotation(RotationReason::Truncated, previous, current, discarded);
            return Ok(true);
        }

        Ok(false)
    }

    fn emit_rotation(
        &mut self,
        reason: RotationReason,
        previous: TailCursor,
        current: TailCursor,
        discarded_partial_bytes: usize,
    ) {
        metrics::counter!(m::TAILER_ROTATIONS_TOTAL, m::LABEL_REASON => reason.as_str())
            .increment(1);
        tracing::info!(
            path = %self.path.display(),
            reason = %reason,
            previous_identity = %previous.file_identity,
            previous_offset = previous.byte_offset,
            current_identity = %current.file_identity,
            discarded_partial_bytes = discarded_partial_bytes,
            "source file rotated"
        );
        self.pending_marker = Some(RotationMarker {
            reason,
            previous,
            current,
            next_sequence: self.next_sequence,
            discarded_partial_bytes,
        });
    }

    fn note_missing(&mut self) -> Result<(), RelayError> {
        let since = *self.missing_since.get_or_insert_with(|| {
            tracing::warn!(path = %self.path.display(), "source file is missing, waiting for it to appear");
            Instant::now()
        });
        if since.elapsed() >= self.missing_timeout {
            return Err(RelayError::SourceGone {
                path: self.path.display().to_string(),
                waited_secs: self.missing_timeout.as_secs(),
            });
        }
        Ok(())
    }

    /// 검증된 라인에 순번을 부여해 레코드를 만듭니다.
    ///
    /// 유효한 라인에만 순번을 부여하므로 전달 스트림의 순번에는 빈틈이 없습니다.
    pub fn stamp(&mut self, line: RawLine, parsed: JsonObject) -> LogRecord {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        LogRecord {
            sequence,
            read_offset: line.read_offset,
            end_offset: line.end_offset,
            raw_bytes: line.bytes,
            parsed,
            received_at: line.received_at,
        }
    }

    /// 커서를 전진시킵니다.
    ///
    /// 해당 바이트가 검증되고 (유효하면) 큐에 들어간 뒤에만 호출해야 합니다.
    pub fn commit(&mut self, cursor: TailCursor) {
        self.committed = cursor;
        self.committed_next_sequence = self.next_sequence;
        self.commits_since_persist += 1;
        self.dirty = true;
        metrics::gauge!(m::TAILER_CURSOR_OFFSET).set(cursor.byte_offset as f64);
    }

    /// 커밋 이후 저장이 필요한지 확인합니다.
    pub fn should_persist(&self) -> bool {
        self.dirty && self.commits_since_persist >= PERSIST_EVERY_COMMITS
    }

    /// 커밋된 커서를 커서 파일에 저장합니다. 재개가 꺼져 있으면 아무것도 하지 않습니다.
    pub async fn persist(&mut self) -> Result<(), RelayError> {
        let Some(store) = self.store.as_ref() else {
            return Ok(());
        };
        if !self.dirty {
            return Ok(());
        }
        store
            .save(&CursorState::new(self.committed, self.committed_next_sequence))
            .await?;
        self.dirty = false;
        self.commits_since_persist = 0;
        Ok(())
    }

    /// 마지막으로 커밋된 커서
    pub fn committed(&self) -> TailCursor {
        self.committed
    }

    /// 다음 레코드가 받을 순번
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// 소스 파일 경로
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn source_io(path: &Path, source: std::io::Error) -> RelayError {
    RelayError::SourceIo {
        path: path.display().to_string(),
        source,
    }
}

/// 일시적 에러용 지수 백오프
#[derive(Debug)]
pub struct Backoff {
    current: Duration,
    max: Duration,
}

impl Backoff {
    /// 새 백오프를 생성합니다.
    pub fn new(max: Duration) -> Self {
        Self {
            current: INITIAL_RETRY_BACKOFF.min(max),
            max,
        }
    }

    /// 다음 대기 시간을 반환하고 지연을 두 배로 늘립니다.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    /// 성공 후 초기 지연으로 되돌립니다.
    pub fn reset(&mut self) {
        self.current = INITIAL_RETRY_BACKOFF.min(self.max);
    }
}

/// 수집 루프 구성 요소
pub struct IngestContext {
    /// 라인 검증기
    pub validator: Arc<LineValidator>,
    /// 릴레이 큐 송신 핸들
    pub sender: RelaySender,
    /// 기상 장치
    pub wakeup: Wakeup,
    /// 종료 토큰
    pub cancel: CancellationToken,
    /// 재시도 최대 지연
    pub max_backoff: Duration,
    /// 최대 라인 길이 (로그용)
    pub max_line_length: usize,
}

/// 수집 루프: tail → 검증 → 순번 부여 → 큐 삽입 → 커밋
///
/// 취소되면 현재 라인까지만 처리하고 커서를 저장한 뒤 `Ok(())`로 종료합니다.
/// 치명적 에러는 커서를 저장한 뒤 그대로 반환합니다.
pub async fn run_ingest(mut tailer: Tailer, ctx: IngestContext) -> Result<(), RelayError> {
    let IngestContext {
        validator,
        sender,
        mut wakeup,
        cancel,
        max_backoff,
        max_line_length,
    } = ctx;
    let mut backoff = Backoff::new(max_backoff);

    tracing::info!(
        path = %tailer.path().display(),
        schedule = wakeup.kind_name(),
        "ingest loop started"
    );

    let result = loop {
        if cancel.is_cancelled() {
            break Ok(());
        }

        let event = match tailer.next().await {
            Ok(event) => {
                backoff.reset();
                event
            }
            Err(e) if e.is_transient() => {
                let delay = backoff.next_delay();
                metrics::counter!(m::TAILER_IO_RETRIES_TOTAL).increment(1);
                tracing::warn!(
                    error = %e,
                    retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "transient source error, retrying"
                );
                tokio::select! {
                    _ = cancel.cancelled() => break Ok(()),
                    _ = tokio::time::sleep(delay) => continue,
                }
            }
            Err(e) => break Err(e),
        };

        match event {
            TailEvent::Line(raw) => {
                let cursor = raw.cursor_after();
                match validator.validate(&raw.bytes) {
                    Validation::Valid(parsed) => {
                        let record = tailer.stamp(raw, parsed);
                        tracing::debug!(
                            sequence = record.sequence,
                            event_type = record.event_type(),
                            offset = record.read_offset,
                            "record read"
                        );
                        let item = RelayItem::Record(Arc::new(record));
                        tokio::select! {
                            _ = cancel.cancelled() => break Ok(()),
                            sent = sender.enqueue(item) => {
                                if let Err(e) = sent {
                                    break Err(e);
                                }
                            }
                        }
                        tailer.commit(cursor);
                    }
                    Validation::Invalid(_) => tailer.commit(cursor),
                }
            }
            TailEvent::Oversized(line) => {
                validator.reject_oversized(&line.prefix, line.len, max_line_length);
                tailer.commit(line.cursor_after());
            }
            TailEvent::Rotated(marker) => {
                let current = marker.current;
                tokio::select! {
                    _ = cancel.cancelled() => break Ok(()),
                    sent = sender.enqueue(RelayItem::Rotated(marker)) => {
                        if let Err(e) = sent {
                            break Err(e);
                        }
                    }
                }
                tailer.commit(current);
            }
            TailEvent::WouldBlock => {
                persist_logged(&mut tailer).await;
                tokio::select! {
                    _ = cancel.cancelled() => break Ok(()),
                    _ = wakeup.wait() => {}
                }
                continue;
            }
        }

        if tailer.should_persist() {
            persist_logged(&mut tailer).await;
        }
    };

    persist_logged(&mut tailer).await;
    match &result {
        Ok(()) => tracing::info!(
            offset = tailer.committed().byte_offset,
            next_sequence = tailer.next_sequence(),
            "ingest loop stopped"
        ),
        Err(e) => tracing::error!(error = %e, "ingest loop failed"),
    }
    result
}

async fn persist_logged(tailer: &mut Tailer) {
    if let Err(e) = tailer.persist().await {
        metrics::counter!(m::TAILER_IO_RETRIES_TOTAL).increment(1);
        tracing::warn!(error = %e, "failed to persist cursor, will retry");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfigBuilder;
    use std::io::Write;

    fn config_for(dir: &Path, resume: bool) -> RelayConfig {
        RelayConfigBuilder::new()
            .source_path(dir.join("eve.json"))
            .cursor_path(dir.join("eve.cursor.json"))
            .resume_cursor(resume)
            .missing_file_timeout_secs(1)
            .max_line_length(64)
            .build()
            .unwrap()
    }

    fn append(path: &Path, data: &[u8]) {
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        f.write_all(data).unwrap();
    }

    async fn drain_lines(tailer: &mut Tailer) -> Vec<String> {
        let mut out = Vec::new();
        loop {
            match tailer.next().await.unwrap() {
                TailEvent::Line(l) => {
                    out.push(String::from_utf8_lossy(&l.bytes).into_owned());
                    tailer.commit(l.cursor_after());
                }
                TailEvent::Oversized(o) => tailer.commit(o.cursor_after()),
                TailEvent::Rotated(m) => {
                    out.push(format!("<rotated:{}>", m.reason));
                    tailer.commit(m.current);
                }
                TailEvent::WouldBlock => return out,
            }
        }
    }

    #[tokio::test]
    async fn reads_existing_lines_then_would_block() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config_for(dir.path(), true);
        append(&cfg.source_path, b"{\"a\":1}\n{\"b\":2}\n{\"c\"");

        let mut tailer = Tailer::open(&cfg).await.unwrap();
        assert_eq!(drain_lines(&mut tailer).await, vec!["{\"a\":1}", "{\"b\":2}"]);

        append(&cfg.source_path, b":3}\n");
        assert_eq!(drain_lines(&mut tailer).await, vec!["{\"c\":3}"]);
        assert_eq!(tailer.committed().byte_offset, 24);
    }

    #[tokio::test]
    async fn tail_only_starts_at_end() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config_for(dir.path(), false);
        append(&cfg.source_path, b"{\"old\":1}\n");

        let mut tailer = Tailer::open(&cfg).await.unwrap();
        assert!(drain_lines(&mut tailer).await.is_empty());

        append(&cfg.source_path, b"{\"new\":1}\n");
        assert_eq!(drain_lines(&mut tailer).await, vec!["{\"new\":1}"]);
    }

    #[tokio::test]
    async fn tail_only_reads_file_created_after_open_from_start() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config_for(dir.path(), false);

        let mut tailer = Tailer::open(&cfg).await.unwrap();
        assert!(matches!(tailer.next().await.unwrap(), TailEvent::WouldBlock));

        append(&cfg.source_path, b"{\"first\":1}\n{\"second\":2}\n");
        assert_eq!(
            drain_lines(&mut tailer).await,
            vec!["{\"first\":1}", "{\"second\":2}"]
        );
    }

    #[tokio::test]
    async fn stamp_assigns_consecutive_sequences() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config_for(dir.path(), true);
        append(&cfg.source_path, b"{\"a\":1}\n{\"b\":2}\n");

        let mut tailer = Tailer::open(&cfg).await.unwrap();
        let mut seqs = Vec::new();
        while let TailEvent::Line(raw) = tailer.next().await.unwrap() {
            let record = tailer.stamp(raw, JsonObject::new());
            seqs.push(record.sequence);
        }
        assert_eq!(seqs, vec![0, 1]);
        assert_eq!(tailer.next_sequence(), 2);
    }

    #[tokio::test]
    async fn truncation_emits_marker_and_rereads() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config_for(dir.path(), true);
        append(&cfg.source_path, b"{\"a\":1}\n{\"b\":2}\n");

        let mut tailer = Tailer::open(&cfg).await.unwrap();
        assert_eq!(drain_lines(&mut tailer).await.len(), 2);

        std::fs::write(&cfg.source_path, b"{\"c\":3}\n").unwrap();
        let lines = drain_lines(&mut tailer).await;
        assert_eq!(lines, vec!["<rotated:truncated>", "{\"c\":3}"]);
        assert_eq!(tailer.committed().byte_offset, 8);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn replacement_drains_old_file_first() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config_for(dir.path(), true);
        append(&cfg.source_path, b"{\"a\":1}\n");

        let mut tailer = Tailer::open(&cfg).await.unwrap();
        assert_eq!(drain_lines(&mut tailer).await, vec!["{\"a\":1}"]);

        // 이동 전에 쓰인 마지막 라인은 기존 핸들로 읽어야 합니다
        append(&cfg.source_path, b"{\"b\":2}\n");
        std::fs::rename(&cfg.source_path, dir.path().join("eve.json.1")).unwrap();
        append(&cfg.source_path, b"{\"c\":3}\n");

        let lines = drain_lines(&mut tailer).await;
        assert_eq!(lines, vec!["{\"b\":2}", "<rotated:replaced>", "{\"c\":3}"]);
    }

    #[tokio::test]
    async fn oversized_line_is_reported_and_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config_for(dir.path(), true);
        let long = format!("{{\"x\":\"{}\"}}\n", "y".repeat(100));
        append(&cfg.source_path, long.as_bytes());
        append(&cfg.source_path, b"{\"ok\":1}\n");

        let mut tailer = Tailer::open(&cfg).await.unwrap();
        match tailer.next().await.unwrap() {
            TailEvent::Oversized(o) => assert_eq!(o.len, long.len() - 1),
            other => panic!("expected oversized, got {other:?}"),
        }
        assert_eq!(drain_lines(&mut tailer).await, vec!["{\"ok\":1}"]);
    }

    #[tokio::test]
    async fn persist_and_resume_skip_committed_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config_for(dir.path(), true);
        append(&cfg.source_path, b"{\"a\":1}\n{\"b\":2}\n");

        {
            let mut tailer = Tailer::open(&cfg).await.unwrap();
            match tailer.next().await.unwrap() {
                TailEvent::Line(raw) => {
                    let cursor = raw.cursor_after();
                    tailer.stamp(raw, JsonObject::new());
                    tailer.commit(cursor);
                }
                other => panic!("unexpected {other:?}"),
            }
            tailer.persist().await.unwrap();
        }

        let mut resumed = Tailer::open(&cfg).await.unwrap();
        assert_eq!(resumed.next_sequence(), 1);
        assert_eq!(drain_lines(&mut resumed).await, vec!["{\"b\":2}"]);
    }

    #[tokio::test]
    async fn missing_file_becomes_fatal_after_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config_for(dir.path(), true);

        let mut tailer = Tailer::open(&cfg).await.unwrap();
        assert!(matches!(tailer.next().await.unwrap(), TailEvent::WouldBlock));

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let err = tailer.next().await.unwrap_err();
        assert!(matches!(err, RelayError::SourceGone { .. }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn file_appearing_late_is_read_from_start() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config_for(dir.path(), true);

        let mut tailer = Tailer::open(&cfg).await.unwrap();
        assert!(drain_lines(&mut tailer).await.is_empty());

        append(&cfg.source_path, b"{\"late\":1}\n");
        assert_eq!(drain_lines(&mut tailer).await, vec!["{\"late\":1}"]);
    }

    #[test]
    fn backoff_doubles_up_to_max() {
        let mut backoff = Backoff::new(Duration::from_millis(300));
        assert_eq!(backoff.next_delay(), Duration::from_millis(50));
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(300));
        assert_eq!(backoff.next_delay(), Duration::from_millis(300));
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(50));
    }
}
