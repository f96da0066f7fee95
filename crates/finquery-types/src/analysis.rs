use serde::{Deserialize, Serialize};

/// Backend-tracked lifecycle of one analysis task.
///
/// `Completed` and `Error` are terminal; `Error` is only reachable from
/// `Pending`/`Processing`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl AnalysisStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, AnalysisStatus::Completed | AnalysisStatus::Error)
    }
}

impl Default for AnalysisStatus {
    fn default() -> Self {
        AnalysisStatus::Pending
    }
}

impl std::fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AnalysisStatus::Pending => "pending",
            AnalysisStatus::Processing => "processing",
            AnalysisStatus::Completed => "completed",
            AnalysisStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Forecasting model selector. The backend validates this; the client
/// only serializes it onto the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisModel {
    Prophet,
    Xgboost,
    Randomforest,
    Dlinear,
}

impl AnalysisModel {
    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisModel::Prophet => "prophet",
            AnalysisModel::Xgboost => "xgboost",
            AnalysisModel::Randomforest => "randomforest",
            AnalysisModel::Dlinear => "dlinear",
        }
    }
}

impl std::fmt::Display for AnalysisModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AnalysisModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "prophet" => Ok(AnalysisModel::Prophet),
            "xgboost" => Ok(AnalysisModel::Xgboost),
            "randomforest" => Ok(AnalysisModel::Randomforest),
            "dlinear" => Ok(AnalysisModel::Dlinear),
            other => Err(format!(
                "unknown model '{}' (expected prophet|xgboost|randomforest|dlinear)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeSeriesPoint {
    pub date: String,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewsItem {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmotionSummary {
    pub score: f64,
    pub description: String,
}

/// Terminal snapshot payload. Populated all-or-nothing once the session
/// reaches `completed` or `error`; every field is nullable on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnalysisSessionData {
    #[serde(default)]
    pub time_series_original: Option<Vec<TimeSeriesPoint>>,
    #[serde(default)]
    pub time_series_full: Option<Vec<TimeSeriesPoint>>,
    #[serde(default)]
    pub news: Option<Vec<NewsItem>>,
    #[serde(default)]
    pub reports: Option<Vec<String>>,
    #[serde(default)]
    pub emotion: Option<EmotionSummary>,
    #[serde(default)]
    pub conclusion: Option<String>,
    #[serde(default)]
    pub conversational_response: Option<String>,
    #[serde(default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Task creation request.
/// Backend API: POST /api/analysis/create
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    pub message: String,
    pub model: AnalysisModel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskResponse {
    pub session_id: String,
    pub status: AnalysisStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<serde_json::Value>,
}

/// Status snapshot for one session.
/// Backend API: GET /api/analysis/status/{session_id}
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisStatusResponse {
    pub session_id: String,
    pub status: AnalysisStatus,
    #[serde(default)]
    pub steps: u32,
    #[serde(default)]
    pub data: AnalysisSessionData,
}

/// Reducer-owned view model for one analysis session. Mutated only by
/// the reducer on the single event/poll callback chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnalysisSession {
    pub session_id: Option<String>,
    pub status: AnalysisStatus,
    pub steps: u32,
    /// Authoritative cumulative reasoning text; replaced, never
    /// concatenated locally.
    pub thinking: String,
    pub thinking_complete: bool,
    /// Set at most once per session; first `intent_determined` wins.
    pub intent: Option<serde_json::Value>,
    pub step_message: Option<String>,
    /// Stream-level failure message, set outside of any snapshot.
    pub error_message: Option<String>,
    pub data: AnalysisSessionData,
}

impl AnalysisSession {
    pub fn new(session_id: Option<String>) -> Self {
        Self {
            session_id,
            ..Self::default()
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&AnalysisStatus::Processing).unwrap(),
            "\"processing\""
        );
        let parsed: AnalysisStatus = serde_json::from_str("\"completed\"").unwrap();
        assert_eq!(parsed, AnalysisStatus::Completed);
        assert!(parsed.is_terminal());
    }

    #[test]
    fn model_parses_from_str() {
        let model: AnalysisModel = "RandomForest".parse().unwrap();
        assert_eq!(model, AnalysisModel::Randomforest);
        assert!("lstm".parse::<AnalysisModel>().is_err());
    }

    #[test]
    fn status_response_tolerates_missing_data() {
        let raw = r#"{"session_id":"abc123","status":"pending"}"#;
        let parsed: AnalysisStatusResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.steps, 0);
        assert_eq!(parsed.data, AnalysisSessionData::default());
    }

    #[test]
    fn session_data_round_trips_nullable_fields() {
        let raw = r#"{"conclusion":"buy","time_series_full":[{"date":"2024-01-01","value":1712.5}],"news":null}"#;
        let parsed: AnalysisSessionData = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.conclusion.as_deref(), Some("buy"));
        assert!(parsed.news.is_none());
        assert_eq!(parsed.time_series_full.as_ref().unwrap().len(), 1);
    }
}
