//! 제한된 릴레이 큐
//!
//! Tailer(단일 생산자)와 분배 루프(단일 소비자) 사이의 고정 용량 FIFO입니다.
//! 가득 차면 `enqueue`가 대기하고, 비어 있으면 `dequeue`가 대기합니다.
//! 이 대기가 곧 백프레셔이며, 커서는 enqueue 성공 이후에만 전진하므로
//! 큐가 가득 찬 동안에는 커서 진행도 멈춥니다.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::sync::mpsc;

use tailcast_core::metrics as m;

use crate::error::RelayError;
use crate::record::RelayItem;

/// 큐 상태 공유 카운터
#[derive(Debug)]
struct QueueState {
    capacity: usize,
    depth: AtomicUsize,
    enqueued: AtomicU64,
}

/// 큐를 생성하고 송신/수신 핸들을 반환합니다.
pub fn relay_queue(capacity: usize) -> (RelaySender, RelayReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let state = Arc::new(QueueState {
        capacity: capacity.max(1),
        depth: AtomicUsize::new(0),
        enqueued: AtomicU64::new(0),
    });
    (
        RelaySender {
            tx,
            state: Arc::clone(&state),
        },
        RelayReceiver { rx, state },
    )
}

/// 큐 송신 핸들 (Tailer 전용)
#[derive(Debug)]
pub struct RelaySender {
    tx: mpsc::Sender<RelayItem>,
    state: Arc<QueueState>,
}

impl RelaySender {
    /// 항목을 큐에 넣습니다. 큐가 가득 차면 자리가 날 때까지 대기합니다.
    ///
    /// 소비자가 종료되었으면 `RelayError::Channel`을 반환합니다.
    /// 대기 중에 취소되면 아무것도 넣지 않으며 깊이 카운터도 그대로입니다.
    pub async fn enqueue(&self, item: RelayItem) -> Result<(), RelayError> {
        let permit = self
            .tx
            .reserve()
            .await
            .map_err(|_| RelayError::Channel("relay queue consumer closed".to_owned()))?;
        // 소비자가 먼저 꺼내도 음수가 되지 않도록 전송 전에 올립니다
        self.state.depth.fetch_add(1, Ordering::AcqRel);
        permit.send(item);
        self.on_enqueued();
        Ok(())
    }

    fn on_enqueued(&self) {
        self.state.enqueued.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(m::QUEUE_RECORDS_ENQUEUED_TOTAL).increment(1);
        metrics::gauge!(m::QUEUE_DEPTH).set(self.state.depth.load(Ordering::Acquire) as f64);
    }

    /// 큐 상태 조회 핸들을 만듭니다.
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            state: Arc::clone(&self.state),
        }
    }
}

/// 큐 수신 핸들 (분배 루프 전용)
#[derive(Debug)]
pub struct RelayReceiver {
    rx: mpsc::Receiver<RelayItem>,
    state: Arc<QueueState>,
}

impl RelayReceiver {
    /// 다음 항목을 꺼냅니다. 비어 있으면 대기합니다.
    ///
    /// 송신 핸들이 drop되고 큐가 비면 `None`을 반환합니다.
    pub async fn dequeue(&mut self) -> Option<RelayItem> {
        let item = self.rx.recv().await;
        if item.is_some() {
            self.on_dequeued();
        }
        item
    }

    fn on_dequeued(&self) {
        let depth = self.state.depth.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
        metrics::gauge!(m::QUEUE_DEPTH).set(depth as f64);
    }

    /// 큐 상태 조회 핸들을 만듭니다.
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            state: Arc::clone(&self.state),
        }
    }
}

/// 큐 상태 조회 핸들
///
/// 채널을 붙잡지 않으므로 종료 순서에 영향을 주지 않습니다.
#[derive(Debug, Clone)]
pub struct QueueStats {
    state: Arc<QueueState>,
}

impl QueueStats {
    /// 현재 큐 깊이 (대기 중인 송신 포함)
    pub fn depth(&self) -> usize {
        self.state.depth.load(Ordering::Acquire)
    }

    /// 큐 용량
    pub fn capacity(&self) -> usize {
        self.state.capacity
    }

    /// 지금까지 들어간 항목 수
    pub fn enqueued_total(&self) -> u64 {
        self.state.enqueued.load(Ordering::Relaxed)
    }

    /// 사용률 (0.0 ~ 1.0)
    pub fn utilization(&self) -> f64 {
        (self.depth().min(self.capacity()) as f64) / (self.capacity() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{RotationMarker, RotationReason, TailCursor};
    use std::time::Duration;

    fn marker(n: u64) -> RelayItem {
        RelayItem::Rotated(RotationMarker {
            reason: RotationReason::Truncated,
            previous: TailCursor::default(),
            current: TailCursor::default(),
            next_sequence: n,
            discarded_partial_bytes: 0,
        })
    }

    fn seq_of(item: &RelayItem) -> u64 {
        match item {
            RelayItem::Rotated(m) => m.next_sequence,
            RelayItem::Record(r) => r.sequence,
        }
    }

    #[tokio::test]
    async fn fifo_order_is_preserved() {
        let (tx, mut rx) = relay_queue(8);
        for i in 0..5 {
            tx.enqueue(marker(i)).await.unwrap();
        }
        for i in 0..5 {
            assert_eq!(seq_of(&rx.dequeue().await.unwrap()), i);
        }
    }

    #[tokio::test]
    async fn producer_blocks_after_exactly_capacity() {
        let (tx, _rx) = relay_queue(3);
        for i in 0..3 {
            tokio::time::timeout(Duration::from_millis(50), tx.enqueue(marker(i)))
                .await
                .expect("enqueue below capacity must not block")
                .unwrap();
        }
        let blocked = tokio::time::timeout(Duration::from_millis(50), tx.enqueue(marker(3))).await;
        assert!(blocked.is_err(), "enqueue beyond capacity must block");
        assert_eq!(tx.stats().depth(), 3);
    }

    #[tokio::test]
    async fn blocked_producer_resumes_after_dequeue() {
        let (tx, mut rx) = relay_queue(1);
        tx.enqueue(marker(0)).await.unwrap();

        let producer = tokio::spawn(async move {
            tx.enqueue(marker(1)).await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        assert_eq!(seq_of(&rx.dequeue().await.unwrap()), 0);
        producer.await.unwrap();
        assert_eq!(seq_of(&rx.dequeue().await.unwrap()), 1);
    }

    #[tokio::test]
    async fn dequeue_returns_none_after_sender_dropped() {
        let (tx, mut rx) = relay_queue(4);
        tx.enqueue(marker(7)).await.unwrap();
        drop(tx);
        assert!(rx.dequeue().await.is_some());
        assert!(rx.dequeue().await.is_none());
    }

    #[tokio::test]
    async fn enqueue_fails_when_consumer_gone() {
        let (tx, rx) = relay_queue(4);
        drop(rx);
        assert!(matches!(tx.enqueue(marker(0)).await, Err(RelayError::Channel(_))));
        assert_eq!(tx.stats().depth(), 0);
    }

    #[tokio::test]
    async fn stats_track_depth_and_utilization() {
        let (tx, mut rx) = relay_queue(4);
        let stats = rx.stats();
        tx.enqueue(marker(0)).await.unwrap();
        tx.enqueue(marker(1)).await.unwrap();
        assert_eq!(stats.depth(), 2);
        assert!((stats.utilization() - 0.5).abs() < f64::EPSILON);
        rx.dequeue().await.unwrap();
        assert_eq!(stats.depth(), 1);
        assert_eq!(stats.enqueued_total(), 2);
    }
}
