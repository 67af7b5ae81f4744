//! TCP 구독자
//!
//! 구독자는 `listen_addr`로 접속하여 개행 구분 JSON 스트림을 받습니다.
//! 연결마다 [`TcpSink`] 하나가 만들어져 분배 관리자에 attach됩니다.
//! 최대 동시 구독자 수는 세마포어로 제한합니다.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::DistributionHandle;
use super::sink::{Delivery, DeliverySink, RecordEncoder};
use crate::error::RelayError;
use crate::record::SharedRecord;

/// TCP 구독자 싱크
pub struct TcpSink {
    peer: SocketAddr,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    encoder: RecordEncoder,
    write_timeout: Duration,
    /// 아직 다 쓰지 못한 프레임과 쓴 바이트 수
    pending: Option<(Bytes, usize)>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl TcpSink {
    /// 연결된 스트림으로 싱크를 생성합니다.
    pub fn new(stream: TcpStream, encoder: RecordEncoder, write_timeout: Duration) -> Self {
        let peer = stream
            .peer_addr()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)));
        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %peer, error = %e, "failed to set TCP_NODELAY");
        }
        let (reader, writer) = stream.into_split();
        Self {
            peer,
            reader,
            writer,
            encoder,
            write_timeout,
            pending: None,
            _permit: None,
        }
    }

    fn with_permit(mut self, permit: OwnedSemaphorePermit) -> Self {
        self._permit = Some(permit);
        self
    }

    async fn flush_pending(&mut self) -> std::io::Result<()> {
        while let Some((frame, written)) = self.pending.as_mut() {
            let n = self.writer.write(&frame[*written..]).await?;
            if n == 0 {
                return Err(std::io::ErrorKind::WriteZero.into());
            }
            *written += n;
            if *written >= frame.len() {
                self.pending = None;
            }
        }
        Ok(())
    }
}

impl DeliverySink for TcpSink {
    fn describe(&self) -> String {
        format!("tcp:{}", self.peer)
    }

    async fn send(&mut self, record: &SharedRecord) -> Result<Delivery, RelayError> {
        if self.pending.is_none() {
            self.pending = Some((self.encoder.encode(record)?, 0));
        }
        match tokio::time::timeout(self.write_timeout, self.flush_pending()).await {
            Ok(Ok(())) => Ok(Delivery::Sent),
            Ok(Err(e)) => Err(RelayError::Sink {
                subscriber: self.describe(),
                reason: e.to_string(),
            }),
            Err(_) => Ok(Delivery::WouldBlock),
        }
    }

    async fn closed(&mut self) {
        // 구독자가 보내는 데이터는 버리고 EOF/에러만 감지합니다
        let mut buf = [0u8; 512];
        loop {
            match self.reader.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(_) => continue,
            }
        }
    }

    async fn close(&mut self) -> Result<(), RelayError> {
        self.writer.shutdown().await.map_err(|e| RelayError::Sink {
            subscriber: self.describe(),
            reason: e.to_string(),
        })
    }
}

/// 구독자 리스너를 바인드합니다. 실패는 치명적입니다.
pub async fn bind(addr: &str) -> Result<TcpListener, RelayError> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| RelayError::Listener(format!("failed to bind to {addr}: {e}")))
}

/// 리스너 설정
#[derive(Debug, Clone, Copy)]
pub struct ListenerSettings {
    /// 최대 동시 구독자 수
    pub max_subscribers: usize,
    /// 쓰기 타임아웃
    pub write_timeout: Duration,
    /// 프레임 인코더
    pub encoder: RecordEncoder,
}

/// 구독자 연결 수락 루프
///
/// 취소될 때까지 실행됩니다. 최대 구독자 수를 넘는 연결은 바로 닫습니다.
pub async fn run_listener(
    listener: TcpListener,
    handle: DistributionHandle,
    settings: ListenerSettings,
    cancel: CancellationToken,
) -> Result<(), RelayError> {
    let local = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_owned());
    info!(addr = %local, max_subscribers = settings.max_subscribers, "subscriber listener started");

    let semaphore = Arc::new(Semaphore::new(settings.max_subscribers));

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, addr) = match result {
                    Ok(pair) => pair,
                    Err(e) => {
                        // accept 에러는 대부분 일시적입니다 (EMFILE 등)
                        warn!(error = %e, "accept failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                };

                let permit = match Arc::clone(&semaphore).try_acquire_owned() {
                    Ok(p) => p,
                    Err(_) => {
                        warn!(peer = %addr, "max subscribers reached, rejecting connection");
                        drop(stream);
                        continue;
                    }
                };

                let sink = TcpSink::new(stream, settings.encoder, settings.write_timeout)
                    .with_permit(permit);
                match handle.attach(sink) {
                    Ok(id) => debug!(peer = %addr, subscriber = %id, "tcp subscriber accepted"),
                    Err(e) => {
                        warn!(peer = %addr, error = %e, "failed to attach tcp subscriber");
                    }
                }
            }
            _ = cancel.cancelled() => {
                info!(addr = %local, "subscriber listener stopped");
                break;
            }
        }
    }

    Ok(())
}
