//! Scripted in-memory `AnalysisApi` for controller and polling tests.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use finquery_types::{
    AnalysisStatusResponse, CreateTaskRequest, CreateTaskResponse, SessionEvent,
};

use crate::error::{ClientError, Result};
use crate::http::{AnalysisApi, FrameStream, StreamQuery};
use crate::sse::RawFrame;

#[derive(Default)]
pub(crate) struct ScriptedApi {
    create_responses: Mutex<VecDeque<Result<CreateTaskResponse>>>,
    status_responses: Mutex<VecDeque<Result<AnalysisStatusResponse>>>,
    streams: Mutex<VecDeque<mpsc::UnboundedReceiver<Result<RawFrame>>>>,
    pub deleted: Mutex<Vec<String>>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn script_create(&self, response: Result<CreateTaskResponse>) {
        self.create_responses.lock().await.push_back(response);
    }

    pub async fn script_status(&self, response: Result<AnalysisStatusResponse>) {
        self.status_responses.lock().await.push_back(response);
    }

    /// Queue one stream for the next `open_event_stream` call and hand
    /// back the sender side for the test to feed.
    pub async fn script_stream(&self) -> mpsc::UnboundedSender<Result<RawFrame>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.streams.lock().await.push_back(rx);
        tx
    }
}

pub(crate) fn frame_for(event: &SessionEvent) -> RawFrame {
    RawFrame {
        event: Some(event.name().to_string()),
        data: serde_json::to_string(event).unwrap(),
    }
}

#[async_trait]
impl AnalysisApi for ScriptedApi {
    async fn create_task(&self, _request: &CreateTaskRequest) -> Result<CreateTaskResponse> {
        self.create_responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(ClientError::Network("create script exhausted".to_string())))
    }

    async fn get_status(&self, _session_id: &str) -> Result<AnalysisStatusResponse> {
        self.status_responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(ClientError::Network("status script exhausted".to_string())))
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.deleted.lock().await.push(session_id.to_string());
        Ok(())
    }

    async fn open_event_stream(&self, _query: &StreamQuery) -> Result<FrameStream> {
        let mut rx = self
            .streams
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| ClientError::Network("stream script exhausted".to_string()))?;
        Ok(Box::pin(async_stream::stream! {
            while let Some(item) = rx.recv().await {
                yield item;
            }
        }))
    }

    async fn health(&self) -> Result<bool> {
        Ok(true)
    }
}
