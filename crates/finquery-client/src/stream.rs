use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use finquery_types::{AnalysisSession, AnalysisStatus, SessionEvent};

use crate::error::Result;
use crate::http::{AnalysisApi, FrameStream, StreamQuery};
use crate::reducer::{apply_snapshot, reduce};
use crate::sse::{decode_frame, Decoded, RawFrame};

struct ActiveStream {
    cancel: CancellationToken,
    finished: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns the event-stream connection for one chat slot.
///
/// At most one connection is live at a time: `start` tears down any
/// previous connection before opening the new one, so a stale
/// connection's late events can never overwrite fresher state. Derived
/// state is a single [`AnalysisSession`] mutated only by the reducer on
/// the stream task.
pub struct StreamController {
    api: Arc<dyn AnalysisApi>,
    stall_timeout: Duration,
    slot: Mutex<Option<ActiveStream>>,
    state: Arc<Mutex<AnalysisSession>>,
    updates: broadcast::Sender<AnalysisSession>,
}

impl StreamController {
    pub fn new(api: Arc<dyn AnalysisApi>, stall_timeout: Duration) -> Self {
        let (updates, _) = broadcast::channel(256);
        Self {
            api,
            stall_timeout,
            slot: Mutex::new(None),
            state: Arc::new(Mutex::new(AnalysisSession::default())),
            updates,
        }
    }

    /// Snapshot of the current derived state.
    pub async fn state(&self) -> AnalysisSession {
        self.state.lock().await.clone()
    }

    /// Receive a full state snapshot after every applied event.
    pub fn subscribe(&self) -> broadcast::Receiver<AnalysisSession> {
        self.updates.subscribe()
    }

    /// Open a stream for a new query, superseding any active one.
    pub async fn start(&self, query: StreamQuery) -> Result<()> {
        self.cancel().await;

        {
            let mut state = self.state.lock().await;
            *state = AnalysisSession::new(query.session_id.clone());
        }

        let stream = self.api.open_event_stream(&query).await?;

        let cancel = CancellationToken::new();
        let finished = CancellationToken::new();
        let worker = StreamWorker {
            api: self.api.clone(),
            state: self.state.clone(),
            updates: self.updates.clone(),
            cancel: cancel.clone(),
            stall_timeout: self.stall_timeout,
        };
        let done = finished.clone();
        let task = tokio::spawn(async move {
            let _done_guard = done.drop_guard();
            worker.run(stream).await;
        });

        let mut slot = self.slot.lock().await;
        *slot = Some(ActiveStream {
            cancel,
            finished,
            task,
        });
        Ok(())
    }

    /// Close the active connection. Idempotent; a no-op when nothing is
    /// running. Events already in flight when this is called are
    /// discarded, not applied.
    pub async fn cancel(&self) {
        let active = { self.slot.lock().await.take() };
        if let Some(active) = active {
            active.cancel.cancel();
            let _ = active.task.await;
        }
    }

    /// Resolve once the active stream finishes (terminal status,
    /// failure, or cancellation) and return the final state.
    pub async fn wait(&self) -> AnalysisSession {
        let finished = {
            self.slot
                .lock()
                .await
                .as_ref()
                .map(|active| active.finished.clone())
        };
        if let Some(finished) = finished {
            finished.cancelled().await;
        }
        self.state().await
    }
}

struct StreamWorker {
    api: Arc<dyn AnalysisApi>,
    state: Arc<Mutex<AnalysisSession>>,
    updates: broadcast::Sender<AnalysisSession>,
    cancel: CancellationToken,
    stall_timeout: Duration,
}

impl StreamWorker {
    async fn run(&self, stream: FrameStream) {
        let mut stream = stream;
        let mut last_frame = Instant::now();
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!("stream cancelled; discarding in-flight events");
                    return;
                }
                _ = tick.tick() => {
                    if last_frame.elapsed() > self.stall_timeout {
                        self.fail("stream stalled: no frames received within stall timeout")
                            .await;
                        return;
                    }
                }
                maybe = stream.next() => {
                    let Some(next_frame) = maybe else {
                        // connection dropped without a terminal frame;
                        // partial thinking text is not resumable, so no
                        // mid-stream reconnect
                        if !self.state.lock().await.is_terminal() {
                            self.fail("connection closed before completion").await;
                        }
                        return;
                    };

                    match next_frame {
                        Ok(frame) => {
                            last_frame = Instant::now();
                            if !self.handle_frame(&frame).await {
                                return;
                            }
                        }
                        Err(e) => {
                            self.fail(&e.to_string()).await;
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Returns false when the connection should stop.
    async fn handle_frame(&self, frame: &RawFrame) -> bool {
        match decode_frame(frame) {
            Decoded::Unknown { name } => {
                tracing::warn!(event = %name, "dropping unrecognized stream frame");
                true
            }
            Decoded::Malformed { name, detail } => {
                tracing::warn!(event = %name, %detail, "dropping malformed stream frame");
                true
            }
            Decoded::Event(event) => {
                if self.cancel.is_cancelled() {
                    return false;
                }
                match event {
                    SessionEvent::AnalysisComplete => {
                        self.finish().await;
                        false
                    }
                    other => {
                        let terminal = {
                            let mut state = self.state.lock().await;
                            let (next, warnings) = reduce(&state, &other);
                            for warning in warnings {
                                tracing::warn!(?warning, event = other.name(), "reducer warning");
                            }
                            *state = next;
                            state.is_terminal()
                        };
                        self.publish().await;
                        !terminal
                    }
                }
            }
        }
    }

    /// Normal termination: pull the terminal snapshot so report fields
    /// are populated before completion is signalled. A session that
    /// cannot produce its final snapshot is an error, not a bare
    /// "completed" with no data.
    async fn finish(&self) {
        let session_id = self.state.lock().await.session_id.clone();
        let Some(session_id) = session_id else {
            self.fail("analysis completed but no session id was assigned; final results are unavailable")
                .await;
            return;
        };
        match self.api.get_status(&session_id).await {
            Ok(snapshot) => {
                {
                    let mut state = self.state.lock().await;
                    if !self.cancel.is_cancelled() {
                        *state = apply_snapshot(&state, &snapshot);
                    }
                }
                self.publish().await;
            }
            Err(e) => {
                self.fail(&format!(
                    "analysis completed but the final snapshot could not be retrieved: {}",
                    e
                ))
                .await;
            }
        }
    }

    async fn fail(&self, message: &str) {
        if self.cancel.is_cancelled() {
            return;
        }
        tracing::error!("analysis stream failed: {}", message);
        {
            let mut state = self.state.lock().await;
            if !state.status.is_terminal() {
                state.status = AnalysisStatus::Error;
                state.error_message = Some(message.to_string());
            }
        }
        self.publish().await;
    }

    async fn publish(&self) {
        let snapshot = self.state.lock().await.clone();
        let _ = self.updates.send(snapshot);
    }
}
