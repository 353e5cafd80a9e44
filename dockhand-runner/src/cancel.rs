//! Cancellable engine calls

use dockhand_client::EngineError;
use std::future::Future;
use tokio_util::sync::CancellationToken;

use crate::error::{ExecutorError, Result};

/// Races an engine call against the job's cancellation token
///
/// The call's future is dropped when the token fires first.
pub async fn with_cancel<T, F>(cancel: &CancellationToken, call: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, EngineError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ExecutorError::Cancelled),
        result = call => result.map_err(ExecutorError::from),
    }
}
