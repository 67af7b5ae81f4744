//! 구독자 상태 머신과 writer 태스크
//!
//! ```text
//! Connecting ──handshake──▶ Active ──saturation / write timeout──▶ Draining ──▶ Closed
//!      │                      │                                                  ▲
//!      └──────────────────────┴──────────── detach / disconnect ─────────────────┘
//! ```
//!
//! Closed는 종착 상태이며 다시 Active로 돌아가지 않습니다.

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use tailcast_core::metrics as m;

use super::sink::{Delivery, DeliverySink};
use crate::record::SharedRecord;

/// 구독자 식별자
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    /// 새 무작위 식별자
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 구독자 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    /// handshake 대기
    Connecting,
    /// 레코드 수신 중
    Active,
    /// 더 이상 공급하지 않고 남은 backlog만 비우는 중
    Draining,
    /// 종료
    Closed,
}

impl SubscriberState {
    /// 허용된 전이인지 확인합니다.
    pub fn can_transition_to(self, next: SubscriberState) -> bool {
        use SubscriberState::*;
        matches!(
            (self, next),
            (Connecting, Active)
                | (Active, Draining)
                | (Connecting, Closed)
                | (Active, Closed)
                | (Draining, Closed)
        )
    }

    /// 로그용 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Draining => "draining",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SubscriberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// writer 종료 사유
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// handshake 실패
    HandshakeFailed(String),
    /// 상대가 연결을 끊음
    Disconnected,
    /// 쓰기 실패
    SinkError(String),
    /// backlog를 모두 전송하고 정상 종료
    Drained,
    /// 관리자가 강제로 중단
    Cancelled,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HandshakeFailed(r) => write!(f, "handshake failed: {r}"),
            Self::Disconnected => f.write_str("disconnected"),
            Self::SinkError(r) => write!(f, "sink error: {r}"),
            Self::Drained => f.write_str("drained"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// writer가 관리자에게 보내는 보고
#[derive(Debug)]
pub enum WriterReport {
    /// handshake 성공
    Ready(SubscriberId),
    /// 쓰기 타임아웃 발생
    Stalled(SubscriberId),
    /// writer 종료. 전송하지 못한 레코드를 돌려줍니다.
    Closed {
        /// 구독자
        id: SubscriberId,
        /// 종료 사유
        reason: CloseReason,
        /// 미전송 레코드 (순번 순)
        undelivered: Vec<SharedRecord>,
    },
}

/// writer 태스크
///
/// backlog에서 레코드를 꺼내 싱크로 보냅니다. backlog 송신 측이 닫히면
/// 남은 레코드를 모두 보낸 뒤 종료하고, `cancel`이 발동되면 현재 전송 시도만
/// 끝내고 즉시 종료합니다.
pub(crate) async fn run_writer<S, F>(
    id: SubscriberId,
    mut sink: S,
    mut backlog: mpsc::Receiver<SharedRecord>,
    handshake_timeout: Duration,
    cancel: CancellationToken,
    report: F,
) where
    S: DeliverySink,
    F: Fn(WriterReport) + Send + Sync + 'static,
{
    let name = sink.describe();

    let handshake = tokio::select! {
        _ = cancel.cancelled() => Err("cancelled before handshake".to_owned()),
        r = tokio::time::timeout(handshake_timeout, sink.handshake()) => match r {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err("handshake timed out".to_owned()),
        },
    };
    if let Err(reason) = handshake {
        tracing::warn!(subscriber = %id, sink = %name, reason = %reason, "subscriber handshake failed");
        backlog.close();
        let undelivered = drain_backlog(&mut backlog);
        report(WriterReport::Closed {
            id,
            reason: CloseReason::HandshakeFailed(reason),
            undelivered,
        });
        return;
    }
    report(WriterReport::Ready(id));

    let mut in_flight: Option<SharedRecord> = None;
    let mut stalled_reported = false;

    let reason = loop {
        let record = match in_flight.take() {
            Some(r) => r,
            None => tokio::select! {
                biased;
                _ = cancel.cancelled() => break CloseReason::Cancelled,
                _ = sink.closed() => break CloseReason::Disconnected,
                next = backlog.recv() => match next {
                    Some(r) => r,
                    None => break CloseReason::Drained,
                },
            },
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                in_flight = Some(record);
                break CloseReason::Cancelled;
            }
            outcome = sink.send(&record) => outcome,
        };

        match outcome {
            Ok(Delivery::Sent) => {
                stalled_reported = false;
                metrics::counter!(m::DISTRIBUTION_RECORDS_DELIVERED_TOTAL).increment(1);
                tracing::debug!(
                    subscriber = %id,
                    sequence = record.sequence,
                    event_type = record.event_type(),
                    "record delivered"
                );
            }
            Ok(Delivery::WouldBlock) => {
                if !stalled_reported {
                    stalled_reported = true;
                    report(WriterReport::Stalled(id));
                }
                in_flight = Some(record);
            }
            Err(e) => {
                in_flight = Some(record);
                break CloseReason::SinkError(e.to_string());
            }
        }
    };

    backlog.close();
    let mut undelivered: Vec<SharedRecord> = in_flight.into_iter().collect();
    undelivered.extend(drain_backlog(&mut backlog));

    if !matches!(reason, CloseReason::Disconnected | CloseReason::SinkError(_)) {
        match tokio::time::timeout(handshake_timeout, sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(subscriber = %id, error = %e, "sink close failed"),
            Err(_) => tracing::debug!(subscriber = %id, "sink close timed out"),
        }
    }

    tracing::info!(
        subscriber = %id,
        sink = %name,
        reason = %reason,
        undelivered = undelivered.len(),
        "subscriber writer stopped"
    );
    report(WriterReport::Closed {
        id,
        reason,
        undelivered,
    });
}

fn drain_backlog(backlog: &mut mpsc::Receiver<SharedRecord>) -> Vec<SharedRecord> {
    let mut out = Vec::new();
    while let Ok(r) = backlog.try_recv() {
        out.push(r);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::sink::ChannelSink;
    use crate::record::{JsonObject, LogRecord};
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::SystemTime;

    fn record(seq: u64) -> SharedRecord {
        Arc::new(LogRecord {
            sequence: seq,
            read_offset: 0,
            end_offset: 0,
            raw_bytes: Bytes::from_static(b"{}"),
            parsed: JsonObject::new(),
            received_at: SystemTime::now(),
        })
    }

    fn reporter() -> (
        impl Fn(WriterReport) + Send + Sync + 'static,
        mpsc::UnboundedReceiver<WriterReport>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            move |r| {
                let _ = tx.send(r);
            },
            rx,
        )
    }

    #[test]
    fn closed_is_terminal() {
        use SubscriberState::*;
        for next in [Connecting, Active, Draining] {
            assert!(!Closed.can_transition_to(next));
        }
        assert!(!Draining.can_transition_to(Active));
        assert!(Connecting.can_transition_to(Active));
        assert!(Active.can_transition_to(Draining));
        assert!(Draining.can_transition_to(Closed));
    }

    #[tokio::test]
    async fn writer_delivers_then_drains_on_close() {
        let (sink, mut out) = ChannelSink::new("w", 16, Duration::from_millis(100));
        let (backlog_tx, backlog_rx) = mpsc::channel(8);
        let (report, mut reports) = reporter();
        let id = SubscriberId::new();

        let task = tokio::spawn(run_writer(
            id,
            sink,
            backlog_rx,
            Duration::from_secs(1),
            CancellationToken::new(),
            report,
        ));

        assert!(matches!(reports.recv().await, Some(WriterReport::Ready(r)) if r == id));
        for seq in 0..3 {
            backlog_tx.send(record(seq)).await.unwrap();
        }
        drop(backlog_tx);
        task.await.unwrap();

        for seq in 0..3 {
            assert_eq!(out.recv().await.unwrap().sequence, seq);
        }
        match reports.recv().await {
            Some(WriterReport::Closed {
                reason,
                undelivered,
                ..
            }) => {
                assert_eq!(reason, CloseReason::Drained);
                assert!(undelivered.is_empty());
            }
            other => panic!("unexpected report {other:?}"),
        }
    }

    #[tokio::test]
    async fn stalled_writer_reports_and_returns_backlog_on_cancel() {
        // 소비자가 읽지 않는 용량 1 채널
        let (sink, _out) = ChannelSink::new("slow", 1, Duration::from_millis(10));
        let (backlog_tx, backlog_rx) = mpsc::channel(8);
        let (report, mut reports) = reporter();
        let cancel = CancellationToken::new();
        let id = SubscriberId::new();

        let task = tokio::spawn(run_writer(
            id,
            sink,
            backlog_rx,
            Duration::from_secs(1),
            cancel.clone(),
            report,
        ));
        assert!(matches!(reports.recv().await, Some(WriterReport::Ready(_))));

        for seq in 0..4 {
            backlog_tx.send(record(seq)).await.unwrap();
        }
        assert!(matches!(reports.recv().await, Some(WriterReport::Stalled(r)) if r == id));

        cancel.cancel();
        task.await.unwrap();
        match reports.recv().await {
            Some(WriterReport::Closed {
                reason,
                undelivered,
                ..
            }) => {
                assert_eq!(reason, CloseReason::Cancelled);
                let seqs: Vec<u64> = undelivered.iter().map(|r| r.sequence).collect();
                assert_eq!(seqs, vec![1, 2, 3]);
            }
            other => panic!("unexpected report {other:?}"),
        }
    }

    #[tokio::test]
    async fn disconnect_is_detected_while_idle() {
        let (sink, out) = ChannelSink::new("gone", 4, Duration::from_millis(10));
        let (_backlog_tx, backlog_rx) = mpsc::channel(8);
        let (report, mut reports) = reporter();

        let task = tokio::spawn(run_writer(
            SubscriberId::new(),
            sink,
            backlog_rx,
            Duration::from_secs(1),
            CancellationToken::new(),
            report,
        ));
        assert!(matches!(reports.recv().await, Some(WriterReport::Ready(_))));
        drop(out);
        task.await.unwrap();
        assert!(matches!(
            reports.recv().await,
            Some(WriterReport::Closed {
                reason: CloseReason::Disconnected,
                ..
            })
        ));
    }
}
