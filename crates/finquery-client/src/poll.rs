use std::time::Duration;

use tokio_util::sync::CancellationToken;

use finquery_types::AnalysisStatusResponse;

use crate::error::{ClientError, Result};
use crate::http::AnalysisApi;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// Poll a session until it reaches a terminal status.
///
/// `on_update` fires unconditionally on every snapshot, changed or not;
/// callers decide idempotence. The delay is measured from the start of
/// the previous poll, not a fixed-rate clock, so back-to-back latency
/// accumulates. A transport failure rejects immediately — no retry.
/// There is no built-in upper bound; callers impose one through
/// `cancel`, which gates each iteration and the sleep between them.
pub async fn poll_session<F>(
    api: &dyn AnalysisApi,
    session_id: &str,
    interval: Duration,
    cancel: &CancellationToken,
    mut on_update: F,
) -> Result<AnalysisStatusResponse>
where
    F: FnMut(&AnalysisStatusResponse) + Send,
{
    loop {
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }

        let snapshot = api.get_status(session_id).await?;
        on_update(&snapshot);

        if snapshot.status.is_terminal() {
            tracing::debug!(
                session_id,
                status = %snapshot.status,
                "polling reached terminal status"
            );
            return Ok(snapshot);
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
