//! 분배 관리자 -- 릴레이 큐의 레코드를 구독자에게 나눠 줍니다.
//!
//! # 모드
//! - **broadcast**: 모든 Active 구독자의 backlog에 복제합니다. backlog가 가득 차면
//!   구독자별 overflow(stash)에 잠시 보관합니다. stash마저 가득 차면 유예 시간이
//!   끝날 때까지 그 구독자에게만 새 레코드를 버리고(카운트), 유예 시간 안에 따라잡지
//!   못하면 그 구독자만 축출합니다. Active 구독자가 없으면 아무에게도 전달되지
//!   않습니다 (pub/sub, 재전송 없음).
//! - **영구 구독자** (`output_files`): 쓰기 타임아웃이나 포화로 축출되지 않습니다.
//!   따라잡지 못하는 동안 넘친 레코드만 버려집니다.
//! - **queue**: round-robin으로 정확히 한 구독자에게 넘깁니다. 받을 수 있는 구독자가
//!   없으면 레코드를 붙잡고 큐에서 더 꺼내지 않으므로 백프레셔가 Tailer까지 전달됩니다.
//!   종료되는 구독자의 미전송 레코드는 다시 큐잉되어 다른 구독자에게 전달됩니다.
//!
//! # 소유권
//! 구독자 집합은 분배 태스크만 소유합니다. 외부에서는 [`DistributionHandle`]을 통해
//! 명령 채널로만 접근합니다.

pub mod file;
pub mod sink;
pub mod subscriber;
pub mod tcp;

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tailcast_core::metrics as m;

use crate::config::{DistributionMode, RelayConfig};
use crate::error::RelayError;
use crate::queue::RelayReceiver;
use crate::record::{RelayItem, RotationMarker, SharedRecord};

use sink::DeliverySink;
use subscriber::{CloseReason, SubscriberState, WriterReport, run_writer};

pub use subscriber::SubscriberId;

/// 이벤트 채널 용량
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// 강제 종료 후 writer 보고를 기다리는 추가 시간
const CANCEL_GRACE: Duration = Duration::from_secs(1);

/// 분배 설정
#[derive(Debug, Clone)]
pub struct DistributionSettings {
    /// 분배 모드
    pub mode: DistributionMode,
    /// 구독자별 backlog 용량 (broadcast stash 용량도 같음)
    pub backlog: usize,
    /// 싱크 쓰기/handshake 타임아웃
    pub write_timeout: Duration,
    /// 느린 구독자 유예 시간
    pub grace_period: Duration,
    /// 종료 시 drain 제한 시간
    pub drain_timeout: Duration,
}

impl DistributionSettings {
    /// 릴레이 설정에서 분배 설정을 추출합니다.
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            mode: config.mode,
            backlog: config.per_subscriber_backlog,
            write_timeout: config.subscriber_write_timeout(),
            grace_period: config.eviction_grace_period(),
            drain_timeout: config.drain_timeout(),
        }
    }

    fn housekeeping_period(&self) -> Duration {
        (self.grace_period / 4).clamp(Duration::from_millis(5), Duration::from_millis(100))
    }
}

/// 분배 이벤트
#[derive(Debug, Clone)]
pub enum DistributionEvent {
    /// 구독자가 handshake를 마치고 Active가 됨
    Attached {
        /// 구독자
        id: SubscriberId,
        /// 싱크 설명
        sink: String,
    },
    /// 구독자가 종료되어 제거됨
    Detached {
        /// 구독자
        id: SubscriberId,
        /// 종료 사유
        reason: String,
    },
    /// 느린 구독자 축출
    Evicted {
        /// 구독자
        id: SubscriberId,
        /// 축출 사유
        reason: String,
        /// 이 구독자에게서 버려진 레코드 수
        dropped: usize,
    },
    /// 소스 파일 로테이션
    Rotated(RotationMarker),
}

/// 구독자 조회 결과
#[derive(Debug, Clone)]
pub struct SubscriberInfo {
    /// 구독자
    pub id: SubscriberId,
    /// 싱크 설명
    pub sink: String,
    /// 현재 상태
    pub state: SubscriberState,
    /// stash에 보관 중인 레코드 수
    pub stashed: usize,
    /// 축출되지 않는 영구 구독자 여부
    pub permanent: bool,
}

/// 분배 통계 스냅샷
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DistributionStats {
    /// Active 구독자 수
    pub active: usize,
    /// 관리 중인 구독자 수 (Closed 보고 전까지 포함)
    pub attached: usize,
    /// 수신자 없이 발행된 레코드 수
    pub unrouted: u64,
    /// 축출 횟수
    pub evictions: u64,
    /// 축출/종료로 버려진 레코드 수
    pub dropped: u64,
    /// 재큐잉된 레코드 수
    pub requeued: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    active: AtomicUsize,
    attached: AtomicUsize,
    unrouted: AtomicU64,
    evictions: AtomicU64,
    dropped: AtomicU64,
    requeued: AtomicU64,
}

enum Control {
    Attach {
        id: SubscriberId,
        sink: String,
        permanent: bool,
        backlog: mpsc::Sender<SharedRecord>,
        cancel: CancellationToken,
    },
    Detach {
        id: SubscriberId,
        done: oneshot::Sender<bool>,
    },
    Snapshot(oneshot::Sender<Vec<SubscriberInfo>>),
    Report(WriterReport),
}

/// 분배 관리자 핸들
///
/// 복제해서 여러 곳(TCP 리스너, 파이프라인)에서 사용할 수 있습니다.
#[derive(Clone)]
pub struct DistributionHandle {
    control: mpsc::UnboundedSender<Control>,
    events: broadcast::Sender<DistributionEvent>,
    writer_cancel: CancellationToken,
    settings: Arc<DistributionSettings>,
    stats: Arc<StatsCounters>,
}

impl DistributionHandle {
    /// 싱크를 구독자로 등록하고 writer 태스크를 시작합니다.
    ///
    /// 구독자는 Connecting 상태로 시작하며 handshake가 성공하면 Active가 됩니다.
    pub fn attach<S: DeliverySink>(&self, sink: S) -> Result<SubscriberId, RelayError> {
        self.attach_with(sink, false)
    }

    /// 축출되지 않는 영구 구독자로 등록합니다 (로컬 출력 파일).
    ///
    /// 쓰기 타임아웃이 나도 writer가 같은 레코드를 계속 재시도하며, broadcast에서
    /// 따라잡지 못하는 동안 넘친 레코드는 이 구독자에게만 버려집니다.
    pub fn attach_permanent<S: DeliverySink>(&self, sink: S) -> Result<SubscriberId, RelayError> {
        self.attach_with(sink, true)
    }

    fn attach_with<S: DeliverySink>(
        &self,
        sink: S,
        permanent: bool,
    ) -> Result<SubscriberId, RelayError> {
        let id = SubscriberId::new();
        let (backlog_tx, backlog_rx) = mpsc::channel(self.settings.backlog.max(1));
        let cancel = self.writer_cancel.child_token();

        self.control
            .send(Control::Attach {
                id,
                sink: sink.describe(),
                permanent,
                backlog: backlog_tx,
                cancel: cancel.clone(),
            })
            .map_err(|_| manager_gone())?;

        let control = self.control.clone();
        tokio::spawn(run_writer(
            id,
            sink,
            backlog_rx,
            self.settings.write_timeout,
            cancel,
            move |report| {
                let _ = control.send(Control::Report(report));
            },
        ));
        Ok(id)
    }

    /// 구독자를 즉시 종료합니다. 해당 구독자가 있었으면 `true`입니다.
    pub async fn detach(&self, id: SubscriberId) -> Result<bool, RelayError> {
        let (done, rx) = oneshot::channel();
        self.control
            .send(Control::Detach { id, done })
            .map_err(|_| manager_gone())?;
        rx.await.map_err(|_| manager_gone())
    }

    /// 현재 구독자 목록을 조회합니다.
    pub async fn subscribers(&self) -> Result<Vec<SubscriberInfo>, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.control
            .send(Control::Snapshot(tx))
            .map_err(|_| manager_gone())?;
        rx.await.map_err(|_| manager_gone())
    }

    /// 분배 이벤트를 구독합니다.
    pub fn subscribe_events(&self) -> broadcast::Receiver<DistributionEvent> {
        self.events.subscribe()
    }

    /// 통계 스냅샷
    pub fn stats(&self) -> DistributionStats {
        DistributionStats {
            active: self.stats.active.load(Ordering::Relaxed),
            attached: self.stats.attached.load(Ordering::Relaxed),
            unrouted: self.stats.unrouted.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
            requeued: self.stats.requeued.load(Ordering::Relaxed),
        }
    }

    /// 분배 모드
    pub fn mode(&self) -> DistributionMode {
        self.settings.mode
    }
}

fn manager_gone() -> RelayError {
    RelayError::Channel("distribution manager stopped".to_owned())
}

struct SubscriberEntry {
    id: SubscriberId,
    sink: String,
    permanent: bool,
    state: SubscriberState,
    backlog: Option<mpsc::Sender<SharedRecord>>,
    stash: VecDeque<SharedRecord>,
    saturated_since: Option<Instant>,
    /// 이번 포화 구간에서 stash가 가득 차 버린 레코드 수
    shed: usize,
    draining_since: Option<Instant>,
    cancel: CancellationToken,
}

impl SubscriberEntry {
    fn transition(&mut self, next: SubscriberState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        debug!(subscriber = %self.id, from = %self.state, to = %next, "subscriber state changed");
        self.state = next;
        true
    }

    /// stash를 backlog로 옮깁니다. stash가 비면 `true`입니다.
    fn flush_stash(&mut self) -> bool {
        let Some(backlog) = self.backlog.as_ref() else {
            return self.stash.is_empty();
        };
        while let Some(record) = self.stash.pop_front() {
            match backlog.try_send(record) {
                Ok(()) => {}
                Err(TrySendError::Full(record)) => {
                    self.stash.push_front(record);
                    return false;
                }
                Err(TrySendError::Closed(record)) => {
                    self.stash.push_front(record);
                    return false;
                }
            }
        }
        self.saturated_since = None;
        if self.shed > 0 {
            info!(subscriber = %self.id, sink = %self.sink, skipped = self.shed, "subscriber caught up");
            self.shed = 0;
        }
        true
    }

    fn grace_expired(&self, now: Instant, grace: Duration) -> bool {
        self.saturated_since
            .is_some_and(|since| now.saturating_duration_since(since) >= grace)
    }
}

/// 분배 관리자
pub struct DistributionManager {
    settings: Arc<DistributionSettings>,
    receiver: RelayReceiver,
    control_rx: mpsc::UnboundedReceiver<Control>,
    events: broadcast::Sender<DistributionEvent>,
    writer_cancel: CancellationToken,
    stats: Arc<StatsCounters>,
    subscribers: Vec<SubscriberEntry>,
    /// queue 모드에서 아직 넘기지 못한 레코드
    held: VecDeque<SharedRecord>,
    rr_next: usize,
}

impl DistributionManager {
    /// 관리자와 핸들을 생성합니다. `run`을 별도 태스크에서 실행해야 합니다.
    pub fn new(
        settings: DistributionSettings,
        receiver: RelayReceiver,
    ) -> (Self, DistributionHandle) {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let writer_cancel = CancellationToken::new();
        let settings = Arc::new(settings);
        let stats = Arc::new(StatsCounters::default());

        let handle = DistributionHandle {
            control: control_tx,
            events: events.clone(),
            writer_cancel: writer_cancel.clone(),
            settings: Arc::clone(&settings),
            stats: Arc::clone(&stats),
        };
        let manager = Self {
            settings,
            receiver,
            control_rx,
            events,
            writer_cancel,
            stats,
            subscribers: Vec::new(),
            held: VecDeque::new(),
            rr_next: 0,
        };
        (manager, handle)
    }

    /// 분배 루프를 실행합니다.
    ///
    /// 릴레이 큐의 송신 측이 모두 닫히고 큐가 비면 drain 단계로 넘어가
    /// 남은 레코드를 구독자에게 flush한 뒤 종료합니다.
    pub async fn run(mut self) {
        info!(mode = %self.settings.mode, "distribution manager started");

        let mut tick = tokio::time::interval(self.settings.housekeeping_period());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let ready = self.ready_for_next();
            tokio::select! {
                biased;
                Some(control) = self.control_rx.recv() => self.handle_control(control),
                _ = tick.tick() => self.housekeeping(),
                item = self.receiver.dequeue(), if ready => match item {
                    Some(item) => {
                        self.dispatch(item);
                        if self.has_parked_records() {
                            // writer 태스크가 backlog를 비울 기회를 줍니다
                            tokio::task::yield_now().await;
                        }
                    }
                    None => break,
                },
            }
        }

        self.shutdown().await;
    }

    fn ready_for_next(&self) -> bool {
        match self.settings.mode {
            DistributionMode::Broadcast => true,
            DistributionMode::Queue => self.held.is_empty(),
        }
    }

    fn dispatch(&mut self, item: RelayItem) {
        match item {
            RelayItem::Record(record) => match self.settings.mode {
                DistributionMode::Broadcast => self.broadcast(record),
                DistributionMode::Queue => {
                    self.held.push_back(record);
                    self.pump_held();
                }
            },
            RelayItem::Rotated(marker) => {
                info!(
                    reason = %marker.reason,
                    next_sequence = marker.next_sequence,
                    "source rotation passed through distribution"
                );
                self.publish(DistributionEvent::Rotated(marker));
            }
        }
    }

    fn broadcast(&mut self, record: SharedRecord) {
        let now = Instant::now();
        let capacity = self.settings.backlog;
        let grace = self.settings.grace_period;
        let mut routed = 0usize;
        let mut shed = 0usize;
        let mut overflowed = Vec::new();

        for entry in self
            .subscribers
            .iter_mut()
            .filter(|s| s.state == SubscriberState::Active)
        {
            routed += 1;
            if entry.stash.is_empty() || entry.flush_stash() {
                let Some(backlog) = entry.backlog.as_ref() else {
                    continue;
                };
                match backlog.try_send(SharedRecord::clone(&record)) {
                    Ok(()) => continue,
                    Err(TrySendError::Full(r)) => {
                        entry.stash.push_back(r);
                        entry.saturated_since.get_or_insert(now);
                    }
                    // writer가 이미 종료됨. Closed 보고가 곧 도착합니다
                    Err(TrySendError::Closed(_)) => {}
                }
            } else if entry.stash.len() < capacity {
                entry.stash.push_back(SharedRecord::clone(&record));
                entry.saturated_since.get_or_insert(now);
            } else if !entry.permanent && entry.grace_expired(now, grace) {
                overflowed.push(entry.id);
            } else {
                // 유예 시간 동안은 이 구독자에게만 새 레코드를 버립니다
                if entry.shed == 0 {
                    warn!(
                        subscriber = %entry.id,
                        sink = %entry.sink,
                        stashed = entry.stash.len(),
                        "subscriber overflow full, skipping records until it catches up"
                    );
                }
                entry.shed += 1;
                shed += 1;
            }
        }

        if shed > 0 {
            self.record_dropped(shed);
        }

        if routed == 0 {
            self.stats.unrouted.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(m::DISTRIBUTION_RECORDS_UNROUTED_TOTAL).increment(1);
            tracing::trace!(sequence = record.sequence, "no active subscriber, record unrouted");
        }

        for id in overflowed {
            // 넘친 레코드 자체도 이 구독자에게는 버려집니다
            self.evict(id, "backlog saturated beyond grace period", 1);
        }
    }

    fn pump_held(&mut self) {
        while let Some(record) = self.held.pop_front() {
            if let Err(record) = self.offer_round_robin(record) {
                self.held.push_front(record);
                break;
            }
        }
    }

    fn offer_round_robin(&mut self, record: SharedRecord) -> Result<(), SharedRecord> {
        let n = self.subscribers.len();
        let mut record = record;
        for i in 0..n {
            let idx = (self.rr_next + i) % n;
            let entry = &self.subscribers[idx];
            if entry.state != SubscriberState::Active {
                continue;
            }
            let Some(backlog) = entry.backlog.as_ref() else {
                continue;
            };
            match backlog.try_send(record) {
                Ok(()) => {
                    self.rr_next = (idx + 1) % n;
                    return Ok(());
                }
                Err(TrySendError::Full(r)) | Err(TrySendError::Closed(r)) => record = r,
            }
        }
        Err(record)
    }

    fn handle_control(&mut self, control: Control) {
        match control {
            Control::Attach {
                id,
                sink,
                permanent,
                backlog,
                cancel,
            } => {
                info!(subscriber = %id, sink = %sink, permanent, "subscriber connecting");
                self.subscribers.push(SubscriberEntry {
                    id,
                    sink,
                    permanent,
                    state: SubscriberState::Connecting,
                    backlog: Some(backlog),
                    stash: VecDeque::new(),
                    saturated_since: None,
                    shed: 0,
                    draining_since: None,
                    cancel,
                });
                self.update_gauges();
            }
            Control::Detach { id, done } => {
                let found = match self.position(id) {
                    Some(idx) => {
                        self.close_entry(idx, "detached");
                        true
                    }
                    None => false,
                };
                let _ = done.send(found);
            }
            Control::Snapshot(reply) => {
                let infos = self
                    .subscribers
                    .iter()
                    .map(|s| SubscriberInfo {
                        id: s.id,
                        sink: s.sink.clone(),
                        state: s.state,
                        stashed: s.stash.len(),
                        permanent: s.permanent,
                    })
                    .collect();
                let _ = reply.send(infos);
            }
            Control::Report(WriterReport::Ready(id)) => {
                let Some(idx) = self.position(id) else {
                    return;
                };
                let entry = &mut self.subscribers[idx];
                if entry.transition(SubscriberState::Active) {
                    info!(subscriber = %id, sink = %entry.sink, "subscriber active");
                    let event = DistributionEvent::Attached {
                        id,
                        sink: entry.sink.clone(),
                    };
                    self.update_gauges();
                    self.publish(event);
                    if self.settings.mode == DistributionMode::Queue {
                        self.pump_held();
                    }
                }
            }
            Control::Report(WriterReport::Stalled(id)) => {
                let Some(idx) = self.position(id) else {
                    return;
                };
                let entry = &self.subscribers[idx];
                if entry.state != SubscriberState::Active {
                    return;
                }
                if entry.permanent {
                    warn!(subscriber = %id, sink = %entry.sink, "permanent subscriber write timed out, retrying");
                } else {
                    self.evict(id, "write timeout", 0);
                }
            }
            Control::Report(WriterReport::Closed {
                id,
                reason,
                undelivered,
            }) => self.on_writer_closed(id, reason, undelivered),
        }
    }

    fn on_writer_closed(
        &mut self,
        id: SubscriberId,
        reason: CloseReason,
        undelivered: Vec<SharedRecord>,
    ) {
        let Some(idx) = self.position(id) else {
            return;
        };
        let mut entry = self.subscribers.remove(idx);
        if self.rr_next > idx {
            self.rr_next -= 1;
        }
        entry.state = SubscriberState::Closed;
        entry.cancel.cancel();

        match self.settings.mode {
            DistributionMode::Queue if !undelivered.is_empty() => {
                let count = undelivered.len();
                self.requeue(undelivered);
                self.stats
                    .requeued
                    .fetch_add(count as u64, Ordering::Relaxed);
                metrics::counter!(m::DISTRIBUTION_RECORDS_REQUEUED_TOTAL).increment(count as u64);
                info!(subscriber = %id, records = count, "requeued undelivered records");
            }
            _ => {
                let lost = undelivered.len() + entry.stash.len();
                if lost > 0 {
                    self.record_dropped(lost);
                    warn!(subscriber = %id, records = lost, "records dropped for closed subscriber");
                }
            }
        }

        info!(subscriber = %id, sink = %entry.sink, reason = %reason, "subscriber closed");
        self.update_gauges();
        self.publish(DistributionEvent::Detached {
            id,
            reason: reason.to_string(),
        });

        if self.settings.mode == DistributionMode::Queue {
            self.pump_held();
        }
    }

    /// 미전송 레코드를 순번 순으로 held 앞쪽에 합칩니다.
    fn requeue(&mut self, undelivered: Vec<SharedRecord>) {
        let mut merged: Vec<SharedRecord> = undelivered;
        merged.extend(self.held.drain(..));
        merged.sort_by_key(|r| r.sequence);
        merged.dedup_by_key(|r| r.sequence);
        self.held = merged.into();
    }

    /// Active 구독자를 Draining으로 전환합니다.
    fn evict(&mut self, id: SubscriberId, reason: &str, extra_dropped: usize) {
        let Some(idx) = self.position(id) else {
            return;
        };
        let mode = self.settings.mode;
        let entry = &mut self.subscribers[idx];
        if !entry.transition(SubscriberState::Draining) {
            return;
        }
        let discarded = entry.stash.len() + extra_dropped;
        let dropped = discarded + entry.shed;
        entry.stash.clear();
        entry.shed = 0;
        entry.saturated_since = None;
        entry.backlog = None;
        entry.draining_since = Some(Instant::now());

        warn!(
            subscriber = %id,
            sink = %entry.sink,
            reason = reason,
            dropped = dropped,
            mode = %mode,
            "evicting slow subscriber"
        );
        self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(m::DISTRIBUTION_EVICTIONS_TOTAL, m::LABEL_MODE => mode.as_str())
            .increment(1);
        // 유예 중에 버린 레코드는 이미 집계되었습니다
        if discarded > 0 {
            self.record_dropped(discarded);
        }
        self.update_gauges();
        self.publish(DistributionEvent::Evicted {
            id,
            reason: reason.to_owned(),
            dropped,
        });
    }

    /// 즉시 종료 (detach). writer의 Closed 보고가 오면 목록에서 제거됩니다.
    fn close_entry(&mut self, idx: usize, why: &str) {
        let entry = &mut self.subscribers[idx];
        if !entry.transition(SubscriberState::Closed) {
            return;
        }
        debug!(subscriber = %entry.id, reason = why, "closing subscriber");
        entry.backlog = None;
        entry.cancel.cancel();
        self.update_gauges();
    }

    fn housekeeping(&mut self) {
        let grace = self.settings.grace_period;
        let now = Instant::now();
        let mut expired = Vec::new();

        for entry in &mut self.subscribers {
            match entry.state {
                SubscriberState::Active => {
                    if !entry.stash.is_empty()
                        && !entry.flush_stash()
                        && !entry.permanent
                        && entry.grace_expired(now, grace)
                    {
                        expired.push(entry.id);
                    }
                }
                SubscriberState::Draining => {
                    let overdue = entry
                        .draining_since
                        .is_some_and(|since| since.elapsed() >= grace);
                    if overdue && entry.transition(SubscriberState::Closed) {
                        debug!(subscriber = %entry.id, "drain grace expired, cancelling writer");
                        entry.cancel.cancel();
                    }
                }
                SubscriberState::Connecting | SubscriberState::Closed => {}
            }
        }

        for id in expired {
            self.evict(id, "backlog saturated beyond grace period", 0);
        }

        if self.settings.mode == DistributionMode::Queue {
            self.pump_held();
        }
    }

    async fn shutdown(&mut self) {
        let deadline = Instant::now() + self.settings.drain_timeout;
        info!(
            held = self.held.len(),
            subscribers = self.subscribers.len(),
            "relay queue closed, draining subscribers"
        );

        let mut tick = tokio::time::interval(self.settings.housekeeping_period());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // 1. 붙잡고 있는 레코드를 backlog로 밀어 넣습니다
        while self.has_parked_records() && self.has_receivers() {
            tokio::select! {
                biased;
                Some(control) = self.control_rx.recv() => self.handle_control(control),
                _ = tick.tick() => self.housekeeping(),
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }

        // 2. backlog를 닫아 writer가 남은 레코드를 보내고 스스로 종료하게 합니다
        for entry in &mut self.subscribers {
            entry.transition(SubscriberState::Draining);
            entry.backlog = None;
        }
        self.update_gauges();
        while !self.subscribers.is_empty() {
            tokio::select! {
                Some(control) = self.control_rx.recv() => self.handle_control(control),
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }

        // 3. 제한 시간이 지나면 강제로 중단합니다
        if !self.subscribers.is_empty() {
            warn!(
                remaining = self.subscribers.len(),
                "drain timeout elapsed, cancelling subscriber writers"
            );
            self.writer_cancel.cancel();
            let hard_deadline = Instant::now() + self.settings.write_timeout + CANCEL_GRACE;
            while !self.subscribers.is_empty() {
                tokio::select! {
                    Some(control) = self.control_rx.recv() => self.handle_control(control),
                    _ = tokio::time::sleep_until(hard_deadline) => break,
                }
            }
        }
        self.writer_cancel.cancel();

        let leftover = self.held.len()
            + self
                .subscribers
                .iter()
                .map(|s| s.stash.len())
                .sum::<usize>();
        if leftover > 0 {
            self.record_dropped(leftover);
            warn!(records = leftover, "records left undelivered at shutdown");
        }
        info!("distribution manager stopped");
    }

    fn has_parked_records(&self) -> bool {
        !self.held.is_empty() || self.subscribers.iter().any(|s| !s.stash.is_empty())
    }

    fn has_receivers(&self) -> bool {
        self.subscribers.iter().any(|s| {
            matches!(
                s.state,
                SubscriberState::Connecting | SubscriberState::Active
            )
        })
    }

    fn position(&self, id: SubscriberId) -> Option<usize> {
        self.subscribers.iter().position(|s| s.id == id)
    }

    fn record_dropped(&self, count: usize) {
        self.stats
            .dropped
            .fetch_add(count as u64, Ordering::Relaxed);
        metrics::counter!(m::DISTRIBUTION_RECORDS_DROPPED_TOTAL).increment(count as u64);
    }

    fn update_gauges(&self) {
        let active = self
            .subscribers
            .iter()
            .filter(|s| s.state == SubscriberState::Active)
            .count();
        self.stats.active.store(active, Ordering::Relaxed);
        self.stats
            .attached
            .store(self.subscribers.len(), Ordering::Relaxed);
        metrics::gauge!(m::DISTRIBUTION_SUBSCRIBERS_ACTIVE).set(active as f64);
    }

    fn publish(&self, event: DistributionEvent) {
        // 수신자가 없어도 정상입니다
        let _ = self.events.send(event);
    }
}
