#[derive(Debug, thiserror::Error)]
pub enum RqliteError {
    /// The caller's cancellation signal fired.
    #[error("operation canceled")]
    Canceled,
    /// Every host spent its attempt budget without producing a response.
    ///
    /// `log` tells the dispatcher whether the standard `hosts_exhausted`
    /// event should fire; custom selectors can preempt it by clearing it.
    #[error("cluster hosts exhausted")]
    HostsExhausted { log: bool },
    /// The server reported a SQL error for the operation at `index`.
    #[error("sql error at operation {index}: {message}")]
    Sql { index: usize, message: String },
    /// Top-level `error` field in an otherwise successful response.
    #[error("server error: {0}")]
    Server(String),
    /// Missing or malformed response fields. Not retryable.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The response stream broke after bytes already reached the caller's
    /// sink, so the attempt cannot be replayed on another node.
    #[error("transport error: {0}")]
    Transport(String),
    /// Invalid construction input: empty host list, unparsable host URL.
    #[error("configuration error: {0}")]
    Config(String),
    /// Local file I/O during backup-to-file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
