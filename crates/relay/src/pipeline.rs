//! 릴레이 파이프라인 -- tail / 검증 / 큐 / 분배의 전체 흐름을 관리합니다.
//!
//! [`RelayPipeline`]은 core의 [`Pipeline`](tailcast_core::pipeline::Pipeline) trait을 구현하여
//! `tailcast-daemon`에서 start / health_check / stop 생명주기로 관리됩니다.
//!
//! # 내부 아키텍처
//! ```text
//! Tailer -> LineValidator -> RelayQueue -> DistributionManager -> writer(구독자별) -> DeliverySink
//!                                                  ^
//!                                    TCP listener / output_files attach
//! ```
//!
//! # 종료 순서
//! 1. 리스너를 멈춰 새 구독자를 받지 않습니다.
//! 2. 수집 루프를 취소하고 커서가 저장될 때까지 기다립니다.
//! 3. 큐 송신 측이 닫히면 분배 관리자가 남은 레코드를 구독자에게 flush합니다.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tailcast_core::error::{PipelineError, TailcastError};
use tailcast_core::pipeline::{HealthStatus, Pipeline};

use crate::config::RelayConfig;
use crate::distribution::file::FileSink;
use crate::distribution::sink::RecordEncoder;
use crate::distribution::tcp::{self, ListenerSettings};
use crate::distribution::{
    DistributionHandle, DistributionManager, DistributionSettings, DistributionStats,
};
use crate::error::RelayError;
use crate::queue::{QueueStats, RelaySender, relay_queue};
use crate::tailer::schedule::Wakeup;
use crate::tailer::{IngestContext, Tailer, run_ingest};
use crate::validator::LineValidator;

/// 큐 사용률이 이 값을 넘으면 Degraded로 보고합니다
const DEGRADED_QUEUE_UTILIZATION: f64 = 0.9;

/// 분배 관리자 종료 대기 시 drain 제한 시간에 더하는 여유
const MANAGER_STOP_MARGIN: Duration = Duration::from_secs(2);

/// 파이프라인 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineState {
    /// 초기화됨, 아직 시작하지 않음
    Initialized,
    /// 실행 중
    Running,
    /// 정지됨
    Stopped,
}

/// 릴레이 파이프라인
///
/// # 사용 예시
/// ```ignore
/// use tailcast_relay::{RelayConfig, RelayPipelineBuilder};
/// use tailcast_core::pipeline::Pipeline;
///
/// let mut pipeline = RelayPipelineBuilder::new().config(config).build()?;
/// pipeline.start().await?;
/// // ...
/// pipeline.stop().await?;
/// ```
pub struct RelayPipeline {
    config: RelayConfig,
    state: PipelineState,
    /// start 전까지 보관, start 시 수집 루프로 넘어감
    sender: Option<RelaySender>,
    manager: Option<DistributionManager>,
    handle: DistributionHandle,
    validator: Arc<LineValidator>,
    queue_stats: QueueStats,
    ingest_cancel: CancellationToken,
    listener_cancel: CancellationToken,
    ingest_task: Option<JoinHandle<()>>,
    manager_task: Option<JoinHandle<()>>,
    listener_task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
    fatal_tx: mpsc::Sender<RelayError>,
    fatal_rx: mpsc::Receiver<RelayError>,
}

impl RelayPipeline {
    /// 현재 상태 이름
    pub fn state_name(&self) -> &str {
        match self.state {
            PipelineState::Initialized => "initialized",
            PipelineState::Running => "running",
            PipelineState::Stopped => "stopped",
        }
    }

    /// 파이프라인 설정
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// 분배 관리자 핸들. 임베딩 애플리케이션은 이 핸들로 싱크를 attach합니다.
    pub fn handle(&self) -> &DistributionHandle {
        &self.handle
    }

    /// 분배 통계
    pub fn distribution_stats(&self) -> DistributionStats {
        self.handle.stats()
    }

    /// 릴레이 큐 상태
    pub fn queue_stats(&self) -> &QueueStats {
        &self.queue_stats
    }

    /// 유효하다고 판정된 라인 수
    pub fn valid_lines(&self) -> u64 {
        self.validator.valid_count()
    }

    /// 버려진 라인 수
    pub fn invalid_lines(&self) -> u64 {
        self.validator.invalid_count()
    }

    /// 구독자 리스너가 실제로 바인드된 주소 (리스너가 없으면 `None`)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// 치명적 에러가 발생할 때까지 대기합니다.
    ///
    /// 수집 루프나 리스너가 복구할 수 없는 에러로 끝나면 그 에러를 반환합니다.
    /// 정상 종료 경로에서는 완료되지 않으므로 종료 시그널과 함께 `select!`에 사용합니다.
    pub async fn fatal_error(&mut self) -> RelayError {
        match self.fatal_rx.recv().await {
            Some(err) => err,
            None => std::future::pending().await,
        }
    }

    async fn launch(&mut self) -> Result<(), RelayError> {
        let Some(sender) = self.sender.take() else {
            return Err(RelayError::Channel(
                "relay pipeline cannot be restarted".to_owned(),
            ));
        };
        let Some(manager) = self.manager.take() else {
            return Err(RelayError::Channel(
                "relay pipeline cannot be restarted".to_owned(),
            ));
        };

        // 바인드 실패는 다른 태스크를 띄우기 전에 보고합니다
        let listener = if self.config.listen_addr.is_empty() {
            None
        } else {
            let listener = tcp::bind(&self.config.listen_addr).await?;
            self.local_addr = listener.local_addr().ok();
            Some(listener)
        };

        let tailer = Tailer::open(&self.config).await?;
        let wakeup = Wakeup::for_schedule(
            self.config.schedule,
            &self.config.source_path,
            self.config.poll_interval(),
        );

        self.manager_task = Some(tokio::spawn(manager.run()));

        let encoder = RecordEncoder::new(self.config.inject_ingest_timestamp);
        for path in &self.config.output_files {
            let sink = FileSink::new(path, encoder, self.config.subscriber_write_timeout());
            let id = self.handle.attach_permanent(sink)?;
            tracing::info!(path = %path.display(), subscriber = %id, "output file attached");
        }

        if let Some(listener) = listener {
            let settings = ListenerSettings {
                max_subscribers: self.config.max_subscribers,
                write_timeout: self.config.subscriber_write_timeout(),
                encoder,
            };
            let handle = self.handle.clone();
            let cancel = self.listener_cancel.clone();
            let fatal_tx = self.fatal_tx.clone();
            self.listener_task = Some(tokio::spawn(async move {
                if let Err(e) = tcp::run_listener(listener, handle, settings, cancel).await {
                    tracing::error!(error = %e, "subscriber listener failed");
                    let _ = fatal_tx.try_send(e);
                }
            }));
        }

        let ctx = IngestContext {
            validator: Arc::clone(&self.validator),
            sender,
            wakeup,
            cancel: self.ingest_cancel.clone(),
            max_backoff: self.config.max_retry_backoff(),
            max_line_length: self.config.max_line_length,
        };
        let fatal_tx = self.fatal_tx.clone();
        self.ingest_task = Some(tokio::spawn(async move {
            if let Err(e) = run_ingest(tailer, ctx).await {
                let _ = fatal_tx.try_send(e);
            }
        }));

        Ok(())
    }

    async fn shutdown_tasks(&mut self) {
        self.listener_cancel.cancel();
        self.ingest_cancel.cancel();

        if let Some(task) = self.ingest_task.take()
            && let Err(e) = task.await
        {
            tracing::warn!(error = %e, "ingest task panicked");
        }

        if let Some(task) = self.listener_task.take()
            && let Err(e) = task.await
        {
            tracing::warn!(error = %e, "listener task panicked");
        }

        // launch가 중간에 실패했으면 남은 송신 측을 닫습니다
        self.sender = None;

        if let Some(mut task) = self.manager_task.take() {
            let budget = self.config.drain_timeout()
                + self.config.subscriber_write_timeout()
                + MANAGER_STOP_MARGIN;
            match tokio::time::timeout(budget, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "distribution task panicked"),
                Err(_) => {
                    tracing::warn!(
                        budget_ms = u64::try_from(budget.as_millis()).unwrap_or(u64::MAX),
                        "distribution manager did not stop in time, aborting"
                    );
                    task.abort();
                }
            }
        }
    }
}

impl Pipeline for RelayPipeline {
    async fn start(&mut self) -> Result<(), TailcastError> {
        match self.state {
            PipelineState::Running => return Err(PipelineError::AlreadyRunning.into()),
            PipelineState::Stopped => {
                return Err(PipelineError::InitFailed(
                    "relay pipeline cannot be restarted".to_owned(),
                )
                .into());
            }
            PipelineState::Initialized => {}
        }

        tracing::info!(
            source = %self.config.source_path.display(),
            mode = %self.config.mode,
            schedule = self.config.schedule.as_str(),
            listen_addr = %self.config.listen_addr,
            output_files = self.config.output_files.len(),
            "starting relay pipeline"
        );

        if let Err(e) = self.launch().await {
            tracing::error!(error = %e, "relay pipeline failed to start");
            self.shutdown_tasks().await;
            self.state = PipelineState::Stopped;
            return Err(e.into());
        }

        self.state = PipelineState::Running;
        tracing::info!(
            listen_addr = ?self.local_addr,
            "relay pipeline started"
        );
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), TailcastError> {
        if self.state != PipelineState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        tracing::info!("stopping relay pipeline");
        self.shutdown_tasks().await;
        self.state = PipelineState::Stopped;

        let stats = self.handle.stats();
        tracing::info!(
            valid_lines = self.validator.valid_count(),
            invalid_lines = self.validator.invalid_count(),
            unrouted = stats.unrouted,
            evictions = stats.evictions,
            dropped = stats.dropped,
            "relay pipeline stopped"
        );
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            PipelineState::Running => {
                if self.ingest_task.as_ref().is_none_or(|t| t.is_finished()) {
                    return HealthStatus::Unhealthy("ingest loop stopped".to_owned());
                }
                if self.manager_task.as_ref().is_none_or(|t| t.is_finished()) {
                    return HealthStatus::Unhealthy("distribution manager stopped".to_owned());
                }
                let utilization = self.queue_stats.utilization();
                if utilization > DEGRADED_QUEUE_UTILIZATION {
                    HealthStatus::Degraded(format!(
                        "relay queue utilization high: {:.1}%",
                        utilization * 100.0
                    ))
                } else {
                    HealthStatus::Healthy
                }
            }
            PipelineState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            PipelineState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

/// 릴레이 파이프라인 빌더
///
/// 큐와 분배 관리자를 미리 만들어 두므로 `start` 전에도
/// [`RelayPipeline::handle`]로 싱크를 attach할 수 있습니다.
pub struct RelayPipelineBuilder {
    config: RelayConfig,
}

impl RelayPipelineBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: RelayConfig::default(),
        }
    }

    /// 파이프라인 설정을 지정합니다.
    pub fn config(mut self, config: RelayConfig) -> Self {
        self.config = config;
        self
    }

    /// 파이프라인을 빌드합니다.
    pub fn build(self) -> Result<RelayPipeline, RelayError> {
        self.config.validate()?;

        let (sender, receiver) = relay_queue(self.config.queue_capacity);
        let queue_stats = sender.stats();
        let (manager, handle) =
            DistributionManager::new(DistributionSettings::from_config(&self.config), receiver);
        let validator =
            Arc::new(LineValidator::new().with_preview_chars(self.config.invalid_preview_chars));
        let (fatal_tx, fatal_rx) = mpsc::channel(1);

        Ok(RelayPipeline {
            config: self.config,
            state: PipelineState::Initialized,
            sender: Some(sender),
            manager: Some(manager),
            handle,
            validator,
            queue_stats,
            ingest_cancel: CancellationToken::new(),
            listener_cancel: CancellationToken::new(),
            ingest_task: None,
            manager_task: None,
            listener_task: None,
            local_addr: None,
            fatal_tx,
            fatal_rx,
        })
    }
}

impl Default for RelayPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RelayConfigBuilder, TailSchedule};
    use crate::distribution::sink::ChannelSink;

    fn config_for(dir: &tempfile::TempDir) -> RelayConfig {
        RelayConfigBuilder::new()
            .source_path(dir.path().join("eve.json"))
            .cursor_path(dir.path().join("eve.cursor.json"))
            .schedule(TailSchedule::Poll)
            .poll_interval_ms(10)
            .listen_addr("")
            .drain_timeout_secs(1)
            .build()
            .unwrap()
    }

    #[test]
    fn builder_creates_initialized_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = RelayPipelineBuilder::new()
            .config(config_for(&dir))
            .build()
            .unwrap();
        assert_eq!(pipeline.state_name(), "initialized");
        assert!(pipeline.local_addr().is_none());
    }

    #[test]
    fn builder_with_invalid_config_fails() {
        let mut config = RelayConfig::default();
        config.queue_capacity = 0;
        assert!(RelayPipelineBuilder::new().config(config).build().is_err());
    }

    #[tokio::test]
    async fn pipeline_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("eve.json"), b"{\"a\":1}\n").unwrap();
        let mut pipeline = RelayPipelineBuilder::new()
            .config(config_for(&dir))
            .build()
            .unwrap();

        assert!(pipeline.health_check().await.is_unhealthy());
        pipeline.start().await.unwrap();
        assert_eq!(pipeline.state_name(), "running");
        assert!(pipeline.health_check().await.is_healthy());
        assert!(pipeline.start().await.is_err());

        pipeline.stop().await.unwrap();
        assert_eq!(pipeline.state_name(), "stopped");
        assert!(pipeline.stop().await.is_err());
        assert!(pipeline.start().await.is_err());
    }

    #[tokio::test]
    async fn records_reach_active_sink() {
        use crate::distribution::DistributionEvent;
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("eve.json");
        std::fs::write(&source, b"").unwrap();
        let mut pipeline = RelayPipelineBuilder::new()
            .config(config_for(&dir))
            .build()
            .unwrap();
        pipeline.start().await.unwrap();

        let mut events = pipeline.handle().subscribe_events();
        let (sink, mut rx) = ChannelSink::new("test", 16, Duration::from_secs(1));
        pipeline.handle().attach(sink).unwrap();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .unwrap()
                .unwrap();
            if matches!(event, DistributionEvent::Attached { .. }) {
                break;
            }
        }

        let mut file = std::fs::OpenOptions::new().append(true).open(&source).unwrap();
        file.write_all(b"{\"seq\":0}\nnot-json\n{\"seq\":1}\n").unwrap();

        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let second = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!((first.sequence, second.sequence), (0, 1));
        assert_eq!(&second.raw_bytes[..], br#"{"seq":1}"#);

        pipeline.stop().await.unwrap();
        assert_eq!(pipeline.valid_lines(), 2);
        assert_eq!(pipeline.invalid_lines(), 1);
    }

    #[tokio::test]
    async fn bind_failure_aborts_start() {
        let dir = tempfile::tempdir().unwrap();
        let occupied = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = config_for(&dir);
        config.listen_addr = occupied.local_addr().unwrap().to_string();

        let mut pipeline = RelayPipelineBuilder::new().config(config).build().unwrap();
        let err = pipeline.start().await.unwrap_err();
        assert!(!err.is_source());
        assert_eq!(pipeline.state_name(), "stopped");
    }

    #[tokio::test]
    async fn missing_source_is_reported_as_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_for(&dir);
        config.missing_file_timeout_secs = 1;

        let mut pipeline = RelayPipelineBuilder::new().config(config).build().unwrap();
        pipeline.start().await.unwrap();

        let err = tokio::time::timeout(Duration::from_secs(5), pipeline.fatal_error())
            .await
            .expect("missing source should become fatal");
        assert!(matches!(err, RelayError::SourceGone { .. }));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(pipeline.health_check().await.is_unhealthy());
        pipeline.stop().await.unwrap();
    }
}
