//! 전달 싱크 -- 구독자 하나로 나가는 전송 어댑터
//!
//! [`DeliverySink::send`]는 레코드 하나를 제한 시간 안에 한 번 쓰려고 시도하고
//! 다음 중 하나를 반환합니다.
//! - `Ok(Delivery::Sent)`: 프레임 전체를 썼음
//! - `Ok(Delivery::WouldBlock)`: 제한 시간 안에 다 쓰지 못함. 같은 레코드로 다시 호출하면
//!   이미 쓴 부분 다음부터 이어서 씁니다.
//! - `Err(_)`: 연결 종료 등 복구 불가능한 실패
//!
//! 구현체: [`ChannelSink`] (프로세스 내부), `TcpSink`, `FileSink`

use std::future::Future;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, SecondsFormat, Utc};
use tokio::sync::mpsc;

use crate::error::RelayError;
use crate::record::{LogRecord, SharedRecord};

/// `ingest_timestamp` 필드 이름
pub const INGEST_TIMESTAMP_FIELD: &str = "ingest_timestamp";

/// 한 번의 전송 시도 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// 전부 전송됨
    Sent,
    /// 제한 시간 초과, 남은 부분은 다음 호출에서 이어서 전송
    WouldBlock,
}

/// 구독자 전송 어댑터
///
/// 구독자마다 하나씩 존재하며 writer 태스크가 단독으로 소유합니다.
pub trait DeliverySink: Send + 'static {
    /// 로그/이벤트용 설명 (예: `tcp:127.0.0.1:50512`)
    fn describe(&self) -> String;

    /// 전송 전 준비 단계. 성공하면 구독자가 Active가 됩니다.
    fn handshake(&mut self) -> impl Future<Output = Result<(), RelayError>> + Send {
        async { Ok(()) }
    }

    /// 레코드 하나를 전송합니다.
    fn send(
        &mut self,
        record: &SharedRecord,
    ) -> impl Future<Output = Result<Delivery, RelayError>> + Send;

    /// 상대가 연결을 끊으면 완료됩니다. 끊김을 감지할 수 없는 싱크는 완료되지 않습니다.
    fn closed(&mut self) -> impl Future<Output = ()> + Send {
        std::future::pending()
    }

    /// 싱크를 닫습니다.
    fn close(&mut self) -> impl Future<Output = Result<(), RelayError>> + Send;
}

/// 레코드를 개행으로 끝나는 JSON 프레임으로 직렬화합니다.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordEncoder {
    inject_ingest_timestamp: bool,
}

impl RecordEncoder {
    /// 인코더를 생성합니다.
    pub fn new(inject_ingest_timestamp: bool) -> Self {
        Self {
            inject_ingest_timestamp,
        }
    }

    /// 현재 시각 기준으로 프레임을 만듭니다.
    pub fn encode(&self, record: &LogRecord) -> Result<Bytes, RelayError> {
        self.encode_at(record, Utc::now())
    }

    /// 주어진 시각 기준으로 프레임을 만듭니다.
    ///
    /// 타임스탬프를 넣지 않으면 원본 라인 바이트를 그대로 사용합니다.
    pub fn encode_at(&self, record: &LogRecord, now: DateTime<Utc>) -> Result<Bytes, RelayError> {
        if !self.inject_ingest_timestamp {
            let mut buf = BytesMut::with_capacity(record.raw_bytes.len() + 1);
            buf.put_slice(&record.raw_bytes);
            buf.put_u8(b'\n');
            return Ok(buf.freeze());
        }

        let mut object = record.parsed.clone();
        object.insert(
            INGEST_TIMESTAMP_FIELD.to_owned(),
            serde_json::Value::String(now.to_rfc3339_opts(SecondsFormat::Micros, true)),
        );
        let mut buf = serde_json::to_vec(&object).map_err(|e| RelayError::Sink {
            subscriber: "encoder".to_owned(),
            reason: format!("failed to serialize record {}: {e}", record.sequence),
        })?;
        buf.push(b'\n');
        Ok(Bytes::from(buf))
    }
}

/// 프로세스 내부 소비자에게 레코드를 넘기는 싱크
///
/// 임베딩 애플리케이션과 테스트에서 사용합니다.
#[derive(Debug)]
pub struct ChannelSink {
    name: String,
    tx: mpsc::Sender<SharedRecord>,
    write_timeout: Duration,
}

impl ChannelSink {
    /// 채널 싱크와 수신 측을 생성합니다.
    pub fn new(
        name: impl Into<String>,
        capacity: usize,
        write_timeout: Duration,
    ) -> (Self, mpsc::Receiver<SharedRecord>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                name: name.into(),
                tx,
                write_timeout,
            },
            rx,
        )
    }
}

impl DeliverySink for ChannelSink {
    fn describe(&self) -> String {
        format!("channel:{}", self.name)
    }

    async fn send(&mut self, record: &SharedRecord) -> Result<Delivery, RelayError> {
        match tokio::time::timeout(self.write_timeout, self.tx.send(SharedRecord::clone(record)))
            .await
        {
            Ok(Ok(())) => Ok(Delivery::Sent),
            Ok(Err(_)) => Err(RelayError::Sink {
                subscriber: self.describe(),
                reason: "receiver dropped".to_owned(),
            }),
            Err(_) => Ok(Delivery::WouldBlock),
        }
    }

    async fn closed(&mut self) {
        self.tx.closed().await;
    }

    async fn close(&mut self) -> Result<(), RelayError> {
        Ok(())
    }
}
