//! Streaming backup support.
//!
//! The backup body is copied chunk-by-chunk from the response stream into
//! the caller's sink; nothing is buffered beyond the chunk in flight.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Response;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{
    driver::{ConsumeError, ResponseConsumer},
    selector::Failure,
    RqliteError,
};

/// Backup payload format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BackupFormat {
    /// Binary database snapshot (a valid SQLite file).
    #[default]
    Binary,
    /// Textual SQL dump.
    Sql,
}

impl BackupFormat {
    /// Query string for the backup endpoint; empty selects binary.
    pub(crate) fn query(self) -> &'static str {
        match self {
            Self::Binary => "",
            Self::Sql => "fmt=sql",
        }
    }
}

/// Streams the response body into `writer`, returning the byte count.
///
/// A stream error before the first chunk reaches the sink is retryable on
/// another node; after that the sink is no longer pristine and the error
/// is surfaced directly.
pub(crate) struct StreamConsumer<'a, W> {
    writer: &'a mut W,
    total: u64,
}

impl<'a, W> StreamConsumer<'a, W> {
    pub(crate) fn new(writer: &'a mut W) -> Self {
        Self { writer, total: 0 }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> ResponseConsumer for StreamConsumer<'_, W> {
    type Output = u64;

    async fn consume(&mut self, response: Response) -> Result<u64, ConsumeError> {
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| {
                if self.total == 0 {
                    ConsumeError::Retry(Failure::Fetch(err.to_string()))
                } else {
                    ConsumeError::Fatal(RqliteError::Transport(format!(
                        "backup stream interrupted after {} bytes: {err}",
                        self.total
                    )))
                }
            })?;
            self.writer
                .write_all(&chunk)
                .await
                .map_err(|err| ConsumeError::Fatal(RqliteError::Io(err)))?;
            self.total += chunk.len() as u64;
        }
        self.writer
            .flush()
            .await
            .map_err(|err| ConsumeError::Fatal(RqliteError::Io(err)))?;
        Ok(self.total)
    }
}

#[cfg(test)]
mod tests {
    use super::BackupFormat;

    #[test]
    fn format_maps_to_query_string() {
        assert_eq!(BackupFormat::Binary.query(), "");
        assert_eq!(BackupFormat::Sql.query(), "fmt=sql");
        assert_eq!(BackupFormat::default(), BackupFormat::Binary);
    }
}
