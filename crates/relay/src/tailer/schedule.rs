//! Tailer 기상 스케줄
//!
//! - `poll`: 고정 간격으로 깨어납니다.
//! - `notify`: 소스 파일이 있는 디렉토리를 OS 파일 알림으로 감시하고,
//!   알림이 유실되는 경우를 대비해 폴링 간격의 fallback tick도 함께 사용합니다.
//!
//! 어느 방식이든 깨어난 뒤 같은 `Tailer::next()`를 호출하므로
//! 생성되는 레코드 시퀀스는 동일합니다.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};

use crate::config::TailSchedule;
use crate::error::RelayError;

/// notify 모드에서 fallback tick 간격의 배수
const NOTIFY_FALLBACK_FACTOR: u32 = 10;

/// Tailer 기상 장치
pub struct Wakeup {
    kind: WakeupKind,
}

enum WakeupKind {
    Poll(Interval),
    Notify {
        rx: mpsc::Receiver<()>,
        fallback: Interval,
        // drop되면 감시가 해제되므로 보관만 합니다
        _watcher: RecommendedWatcher,
    },
}

impl Wakeup {
    /// 설정된 방식으로 기상 장치를 만듭니다.
    ///
    /// notify 감시를 설정할 수 없으면 폴링으로 대체합니다.
    pub fn for_schedule(schedule: TailSchedule, path: &Path, poll_interval: Duration) -> Self {
        match schedule {
            TailSchedule::Poll => Self::poll(poll_interval),
            TailSchedule::Notify => match Self::notify(path, poll_interval) {
                Ok(wakeup) => wakeup,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "file notifications unavailable, falling back to polling"
                    );
                    Self::poll(poll_interval)
                }
            },
        }
    }

    /// 고정 간격 폴링
    pub fn poll(interval: Duration) -> Self {
        Self {
            kind: WakeupKind::Poll(make_interval(interval)),
        }
    }

    /// 파일 변경 알림 기반 기상
    pub fn notify(path: &Path, poll_interval: Duration) -> Result<Self, RelayError> {
        let dir = watch_dir(path);
        let file_name = path.file_name().map(OsString::from);

        // 알림이 몰려도 한 번만 깨우면 되므로 용량 1이면 충분합니다
        let (tx, rx) = mpsc::channel(1);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let Ok(event) = res else {
                // 에러가 나도 깨워서 파일 상태를 직접 확인하게 합니다
                let _ = tx.try_send(());
                return;
            };
            if matches!(event.kind, EventKind::Access(_)) {
                return;
            }
            let relevant = event.paths.is_empty()
                || event
                    .paths
                    .iter()
                    .any(|p| p.file_name().map(OsString::from) == file_name);
            if relevant {
                let _ = tx.try_send(());
            }
        })
        .map_err(|e| RelayError::Watch(e.to_string()))?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| RelayError::Watch(format!("{}: {e}", dir.display())))?;

        tracing::debug!(dir = %dir.display(), "watching source directory");

        Ok(Self {
            kind: WakeupKind::Notify {
                rx,
                fallback: make_interval(poll_interval * NOTIFY_FALLBACK_FACTOR),
                _watcher: watcher,
            },
        })
    }

    /// 다음 기상 시점까지 대기합니다.
    pub async fn wait(&mut self) {
        match &mut self.kind {
            WakeupKind::Poll(interval) => {
                interval.tick().await;
            }
            WakeupKind::Notify { rx, fallback, .. } => {
                tokio::select! {
                    _ = rx.recv() => {}
                    _ = fallback.tick() => {}
                }
            }
        }
    }

    /// 현재 방식 이름
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            WakeupKind::Poll(_) => "poll",
            WakeupKind::Notify { .. } => "notify",
        }
    }
}

fn make_interval(period: Duration) -> Interval {
    let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

fn watch_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
