use serde::{Deserialize, Serialize};

/// Decoded stream event for one analysis session.
///
/// The closed set of frames the backend pushes over the analysis event
/// stream. Unknown frame names are dropped by the decoder before this
/// type is constructed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Incremental reasoning text. `accumulated` is the server's
    /// authoritative running total; `chunk` is the delta.
    ThinkingChunk { chunk: String, accumulated: String },
    /// Reasoning phase finished; content is the final full text.
    ThinkingComplete { thinking_content: String },
    /// Backend classified the query (stock analysis vs. conversation).
    IntentDetermined { intent: serde_json::Value },
    /// Progress heartbeat.
    StepUpdate {
        step: u32,
        status: String,
        message: String,
    },
    /// Stream-level failure; terminal for this connection.
    Error { error: String },
    /// Normal termination marker. Carries no payload; the final
    /// snapshot is fetched separately.
    AnalysisComplete,
}

impl SessionEvent {
    /// Wire name of this event, as carried on the SSE `event:` line.
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::ThinkingChunk { .. } => "thinking_chunk",
            SessionEvent::ThinkingComplete { .. } => "thinking_complete",
            SessionEvent::IntentDetermined { .. } => "intent_determined",
            SessionEvent::StepUpdate { .. } => "step_update",
            SessionEvent::Error { .. } => "error",
            SessionEvent::AnalysisComplete => "analysis_complete",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionEvent::Error { .. } | SessionEvent::AnalysisComplete
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_update_round_trips() {
        let event = SessionEvent::StepUpdate {
            step: 3,
            status: "processing".to_string(),
            message: "fetching news".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: SessionEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn terminal_events_are_flagged() {
        assert!(SessionEvent::AnalysisComplete.is_terminal());
        assert!(SessionEvent::Error {
            error: "boom".to_string()
        }
        .is_terminal());
        assert!(!SessionEvent::ThinkingChunk {
            chunk: "a".to_string(),
            accumulated: "a".to_string()
        }
        .is_terminal());
    }
}
