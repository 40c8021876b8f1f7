use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::{random::random_range, Result, RqliteError};

/// Sleeps for `1000 * 2^pass` ms plus up to 255 ms of jitter, or returns
/// early with `Canceled` when the token fires.
pub(crate) async fn backoff(pass: u32, cancel: &CancellationToken) -> Result<()> {
    let base = 1000u64.saturating_mul(1u64 << pass.min(16));
    let delay = Duration::from_millis(base + random_range(256) as u64);
    tokio::select! {
        _ = cancel.cancelled() => Err(RqliteError::Canceled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}
