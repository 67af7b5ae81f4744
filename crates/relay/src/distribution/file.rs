//! 파일 구독자
//!
//! 레코드를 로컬 파일 끝에 이어 씁니다. `distribution.output_files`에 지정된
//! 파일은 시작 시 항상 연결된 구독자로 attach됩니다.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::sink::{Delivery, DeliverySink, RecordEncoder};
use crate::error::RelayError;
use crate::record::SharedRecord;

/// 파일 append 싱크
pub struct FileSink {
    path: PathBuf,
    file: Option<File>,
    encoder: RecordEncoder,
    write_timeout: Duration,
    pending: Option<(Bytes, usize)>,
}

impl FileSink {
    /// 싱크를 생성합니다. 파일은 handshake에서 열립니다.
    pub fn new(path: impl Into<PathBuf>, encoder: RecordEncoder, write_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            file: None,
            encoder,
            write_timeout,
            pending: None,
        }
    }

    /// 출력 파일 경로
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sink_error(&self, reason: impl std::fmt::Display) -> RelayError {
        RelayError::Sink {
            subscriber: self.describe(),
            reason: reason.to_string(),
        }
    }

    async fn flush_pending(&mut self) -> std::io::Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Err(std::io::Error::other("file is not open"));
        };
        while let Some((frame, written)) = self.pending.as_mut() {
            let n = file.write(&frame[*written..]).await?;
            if n == 0 {
                return Err(std::io::ErrorKind::WriteZero.into());
            }
            *written += n;
            if *written >= frame.len() {
                self.pending = None;
            }
        }
        // tail -f 하는 소비자가 바로 볼 수 있도록 레코드마다 내보냅니다
        file.flush().await
    }
}

impl DeliverySink for FileSink {
    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }

    async fn handshake(&mut self) -> Result<(), RelayError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.sink_error(e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.sink_error(e))?;
        self.file = Some(file);
        Ok(())
    }

    async fn send(&mut self, record: &SharedRecord) -> Result<Delivery, RelayError> {
        if self.pending.is_none() {
            self.pending = Some((self.encoder.encode(record)?, 0));
        }
        match tokio::time::timeout(self.write_timeout, self.flush_pending()).await {
            Ok(Ok(())) => Ok(Delivery::Sent),
            Ok(Err(e)) => Err(self.sink_error(e)),
            Err(_) => Ok(Delivery::WouldBlock),
        }
    }

    async fn close(&mut self) -> Result<(), RelayError> {
        if let Some(mut file) = self.file.take() {
            file.flush().await.map_err(|e| self.sink_error(e))?;
            file.sync_all().await.map_err(|e| self.sink_error(e))?;
        }
        Ok(())
    }
}
