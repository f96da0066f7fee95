use std::pin::Pin;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::Client;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use finquery_types::{
    AnalysisModel, AnalysisStatusResponse, CreateTaskRequest, CreateTaskResponse,
};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::sse::{parse_sse_frame, RawFrame};

pub type FrameStream = Pin<Box<dyn Stream<Item = Result<RawFrame>> + Send>>;

/// Parameters for one streaming analysis query.
/// Backend API: GET /v2/stream/analysis?message&session_id&model&context
#[derive(Debug, Clone)]
pub struct StreamQuery {
    pub message: String,
    pub session_id: Option<String>,
    pub model: AnalysisModel,
    pub context: Option<String>,
}

impl StreamQuery {
    pub fn new(message: impl Into<String>, model: AnalysisModel) -> Self {
        Self {
            message: message.into(),
            session_id: None,
            model,
            context: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Query pairs for the stream endpoint; reqwest URL-encodes the
    /// values when the request is built.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("message", self.message.clone()),
            ("model", self.model.as_str().to_string()),
        ];
        if let Some(session_id) = &self.session_id {
            pairs.push(("session_id", session_id.clone()));
        }
        if let Some(context) = &self.context {
            pairs.push(("context", context.clone()));
        }
        pairs
    }
}

/// Transport capability for the analysis backend. Injected so tests
/// substitute a scripted fake without real network I/O.
#[async_trait]
pub trait AnalysisApi: Send + Sync {
    /// POST /api/analysis/create
    async fn create_task(&self, request: &CreateTaskRequest) -> Result<CreateTaskResponse>;

    /// GET /api/analysis/status/{session_id}
    async fn get_status(&self, session_id: &str) -> Result<AnalysisStatusResponse>;

    /// DELETE /api/analysis/{session_id}. Fire-and-forget cleanup:
    /// callers log failures instead of propagating them.
    async fn delete_session(&self, session_id: &str) -> Result<()>;

    /// Open the persistent SSE connection for one query. The stream
    /// yields raw frames until closed by either side.
    async fn open_event_stream(&self, query: &StreamQuery) -> Result<FrameStream>;

    /// GET /health
    async fn health(&self) -> Result<bool>;
}

/// Circuit breaker state for one-shot calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Refuses one-shot calls after repeated consecutive failures until a
/// cooldown elapses. Gates only; it never retries anything.
pub struct CircuitBreaker {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    max_failures: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(max_failures: u32, cooldown: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
            max_failures,
            cooldown,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn record_success(&mut self) {
        self.failure_count = 0;
        self.state = CircuitState::Closed;
    }

    pub fn record_failure(&mut self) {
        self.failure_count += 1;
        self.last_failure = Some(Instant::now());

        if self.failure_count >= self.max_failures {
            tracing::warn!(
                "circuit breaker opened after {} failures",
                self.failure_count
            );
            self.state = CircuitState::Open;
        }
    }

    pub fn can_execute(&mut self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if let Some(last_failure) = self.last_failure {
                    if last_failure.elapsed() >= self.cooldown {
                        tracing::info!("circuit breaker entering half-open state");
                        self.state = CircuitState::HalfOpen;
                        return true;
                    }
                }
                false
            }
        }
    }
}

fn build_http_client(timeout: Duration, bearer_token: Option<&str>) -> Client {
    let mut headers = HeaderMap::new();
    if let Some(token) = bearer_token {
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token)) {
            headers.insert(AUTHORIZATION, value);
        }
    }
    Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .expect("Failed to create HTTP client")
}

fn build_stream_client(bearer_token: Option<&str>) -> Client {
    let mut headers = HeaderMap::new();
    if let Some(token) = bearer_token {
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token)) {
            headers.insert(AUTHORIZATION, value);
        }
    }
    Client::builder()
        .default_headers(headers)
        .http1_only()
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .expect("Failed to create stream client")
}

/// Reqwest-backed implementation of [`AnalysisApi`].
pub struct HttpAnalysisApi {
    base_url: String,
    http_client: Client,
    /// No global timeout; SSE connections stay open for the whole task.
    stream_client: Client,
    circuit_breaker: Mutex<CircuitBreaker>,
}

impl HttpAnalysisApi {
    pub fn new(config: &ClientConfig) -> Self {
        let token = config.bearer_token.as_deref();
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http_client: build_http_client(config.operation_timeout(), token),
            stream_client: build_stream_client(token),
            circuit_breaker: Mutex::new(CircuitBreaker::new(
                config.max_failures,
                config.cooldown(),
            )),
        }
    }

    async fn check_circuit_breaker(&self) -> Result<()> {
        let mut breaker = self.circuit_breaker.lock().await;
        if breaker.can_execute() {
            Ok(())
        } else {
            Err(ClientError::CircuitOpen)
        }
    }

    async fn record_success(&self) {
        self.circuit_breaker.lock().await.record_success();
    }

    async fn record_failure(&self) {
        self.circuit_breaker.lock().await.record_failure();
    }

    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            self.record_success().await;
            response
                .json::<T>()
                .await
                .map_err(|e| ClientError::Decode(format!("invalid response body: {}", e)))
        } else {
            self.record_failure().await;
            let body = response.text().await.unwrap_or_default();
            Err(ClientError::Network(format!("{}: {}", status, body)))
        }
    }
}

#[async_trait]
impl AnalysisApi for HttpAnalysisApi {
    async fn create_task(&self, request: &CreateTaskRequest) -> Result<CreateTaskResponse> {
        self.check_circuit_breaker().await?;

        let url = format!("{}/api/analysis/create", self.base_url);
        tracing::debug!(model = %request.model, "creating analysis task at {}", url);

        let response = self
            .http_client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                // connection-level failure, not a backend rejection
                ClientError::Network(format!("failed to create task: {}", e))
            })?;

        self.handle_response(response).await
    }

    async fn get_status(&self, session_id: &str) -> Result<AnalysisStatusResponse> {
        self.check_circuit_breaker().await?;

        let url = format!("{}/api/analysis/status/{}", self.base_url, session_id);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| ClientError::Network(format!("failed to get status: {}", e)))?;

        self.handle_response(response).await
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.check_circuit_breaker().await?;

        let url = format!("{}/api/analysis/{}", self.base_url, session_id);

        let response = self
            .http_client
            .delete(&url)
            .send()
            .await
            .map_err(|e| ClientError::Network(format!("failed to delete session: {}", e)))?;

        if response.status().is_success() {
            self.record_success().await;
            Ok(())
        } else {
            self.record_failure().await;
            Err(ClientError::Network(format!(
                "failed to delete session: {}",
                response.status()
            )))
        }
    }

    async fn open_event_stream(&self, query: &StreamQuery) -> Result<FrameStream> {
        self.check_circuit_breaker().await?;

        let url = format!("{}/v2/stream/analysis", self.base_url);
        tracing::debug!(model = %query.model, "opening analysis stream at {}", url);

        let response = self
            .stream_client
            .get(&url)
            .query(&query.query_pairs())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| ClientError::Network(format!("failed to open stream: {}", e)))?;

        if !response.status().is_success() {
            self.record_failure().await;
            return Err(ClientError::Network(format!(
                "stream subscription failed: {}",
                response.status()
            )));
        }

        self.record_success().await;

        let stream = response.bytes_stream();

        Ok(Box::pin(async_stream::stream! {
            let mut buffer = String::new();

            futures::pin_mut!(stream);

            while let Some(chunk_result) = stream.next().await {
                match chunk_result {
                    Ok(chunk) => {
                        let text = String::from_utf8_lossy(&chunk);
                        if !text.trim().is_empty() {
                            tracing::trace!(
                                "sse raw chunk: {}",
                                text.replace('\n', "\\n").chars().take(300).collect::<String>()
                            );
                        }
                        buffer.push_str(&text);

                        while let Some(frame) = parse_sse_frame(&mut buffer) {
                            yield Ok(frame);
                        }
                    }
                    Err(e) => {
                        let message = e.to_string();
                        // "error decoding response body" is reqwest's usual face for a
                        // connection closed mid-chunk
                        if message.contains("error decoding response body") {
                            tracing::warn!("sse stream closed by server: {}", message);
                        } else {
                            tracing::error!("sse stream error: {}", e);
                        }
                        yield Err(ClientError::Stream(message));
                        break;
                    }
                }
            }
            tracing::debug!("sse stream ended");
        }))
    }

    async fn health(&self) -> Result<bool> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| ClientError::Network(format!("health check failed: {}", e)))?;
        Ok(response.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breaker_opens_after_max_failures_and_recovers() {
        let mut breaker = CircuitBreaker::new(2, Duration::ZERO);
        assert!(breaker.can_execute());

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        // zero cooldown: next check moves to half-open
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.can_execute());
    }

    #[test]
    fn breaker_blocks_while_cooling_down() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_secs(3600));
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_execute());
    }

    #[test]
    fn stream_query_pairs_include_optionals() {
        let query = StreamQuery::new("分析茅台", AnalysisModel::Prophet)
            .with_session("abc123")
            .with_context("previous turn");
        let pairs = query.query_pairs();
        assert!(pairs.contains(&("message", "分析茅台".to_string())));
        assert!(pairs.contains(&("model", "prophet".to_string())));
        assert!(pairs.contains(&("session_id", "abc123".to_string())));
        assert!(pairs.contains(&("context", "previous turn".to_string())));
    }

    #[test]
    fn stream_query_pairs_omit_absent_optionals() {
        let query = StreamQuery::new("hello", AnalysisModel::Dlinear);
        let pairs = query.query_pairs();
        assert_eq!(pairs.len(), 2);
    }
}
