use finquery_types::{AnalysisSession, AnalysisStatus, AnalysisStatusResponse, SessionEvent};

/// Non-fatal contract deviations observed while folding events.
/// Callers log these; they never abort the connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ReducerWarning {
    /// A second `intent_determined` on the same session. First wins.
    DuplicateIntent,
    /// An event arrived after the session reached a terminal status.
    EventAfterTerminal { event: String },
}

/// Pure fold of one decoded event into the session view model.
pub fn reduce(
    state: &AnalysisSession,
    event: &SessionEvent,
) -> (AnalysisSession, Vec<ReducerWarning>) {
    let mut next = state.clone();
    let mut warnings = Vec::new();

    if state.is_terminal() && !matches!(event, SessionEvent::AnalysisComplete) {
        warnings.push(ReducerWarning::EventAfterTerminal {
            event: event.name().to_string(),
        });
        return (next, warnings);
    }

    match event {
        SessionEvent::ThinkingChunk { accumulated, .. } => {
            // The server's running total is authoritative; replacing
            // rather than concatenating stays consistent even when a
            // chunk was dropped by the decoder.
            next.thinking = accumulated.clone();
            if next.status == AnalysisStatus::Pending {
                next.status = AnalysisStatus::Processing;
            }
        }
        SessionEvent::ThinkingComplete { thinking_content } => {
            next.thinking = thinking_content.clone();
            next.thinking_complete = true;
        }
        SessionEvent::IntentDetermined { intent } => {
            if next.intent.is_some() {
                warnings.push(ReducerWarning::DuplicateIntent);
            } else {
                next.intent = Some(intent.clone());
            }
        }
        SessionEvent::StepUpdate { step, message, .. } => {
            next.steps = next.steps.max(*step);
            next.step_message = Some(message.clone());
            if next.status == AnalysisStatus::Pending {
                next.status = AnalysisStatus::Processing;
            }
        }
        SessionEvent::Error { error } => {
            next.status = AnalysisStatus::Error;
            next.error_message = Some(error.clone());
        }
        SessionEvent::AnalysisComplete => {
            // Terminal data arrives via the final status snapshot; the
            // marker alone only moves the status forward.
            if !next.status.is_terminal() {
                next.status = AnalysisStatus::Completed;
            }
        }
    }

    (next, warnings)
}

/// Fold a full status snapshot (poll result or post-completion fetch)
/// into the view model. Report fields are replaced wholesale; terminal
/// states never regress.
pub fn apply_snapshot(state: &AnalysisSession, snapshot: &AnalysisStatusResponse) -> AnalysisSession {
    let mut next = state.clone();

    if next.session_id.is_none() {
        next.session_id = Some(snapshot.session_id.clone());
    }
    next.steps = next.steps.max(snapshot.steps);

    // status only moves forward: terminal never regresses, and an
    // out-of-date `pending` snapshot cannot undo `processing`
    let regresses = (next.status.is_terminal() && !snapshot.status.is_terminal())
        || (next.status == AnalysisStatus::Processing
            && snapshot.status == AnalysisStatus::Pending);
    if !regresses {
        next.status = snapshot.status;
    }

    if snapshot.status.is_terminal() {
        next.data = snapshot.data.clone();
        if let Some(message) = &snapshot.data.error_message {
            next.error_message = Some(message.clone());
        }
    }

    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use finquery_types::AnalysisSessionData;
    use serde_json::json;

    fn base_state() -> AnalysisSession {
        AnalysisSession::new(Some("abc123".to_string()))
    }

    fn chunk(accumulated: &str) -> SessionEvent {
        SessionEvent::ThinkingChunk {
            chunk: accumulated.chars().last().map(String::from).unwrap_or_default(),
            accumulated: accumulated.to_string(),
        }
    }

    #[test]
    fn thinking_is_replacement_not_accumulation() {
        let mut state = base_state();
        for accumulated in ["分", "分析", "分析茅", "分析茅台"] {
            let (next, warnings) = reduce(&state, &chunk(accumulated));
            assert!(warnings.is_empty());
            state = next;
        }
        assert_eq!(state.thinking, "分析茅台");
        assert_eq!(state.status, AnalysisStatus::Processing);
    }

    #[test]
    fn thinking_stays_consistent_when_a_chunk_is_dropped() {
        let state = base_state();
        let (state, _) = reduce(&state, &chunk("hel"));
        // chunk "lo " lost by the decoder; next accumulated still wins
        let (state, _) = reduce(&state, &chunk("hello world"));
        assert_eq!(state.thinking, "hello world");
    }

    #[test]
    fn thinking_complete_freezes_final_text() {
        let state = base_state();
        let (state, _) = reduce(&state, &chunk("partial"));
        let (state, _) = reduce(
            &state,
            &SessionEvent::ThinkingComplete {
                thinking_content: "the full reasoning".to_string(),
            },
        );
        assert_eq!(state.thinking, "the full reasoning");
        assert!(state.thinking_complete);
    }

    #[test]
    fn first_intent_wins_and_duplicate_warns() {
        let state = base_state();
        let (state, warnings) = reduce(
            &state,
            &SessionEvent::IntentDetermined {
                intent: json!({"kind": "stock_analysis"}),
            },
        );
        assert!(warnings.is_empty());
        let (state, warnings) = reduce(
            &state,
            &SessionEvent::IntentDetermined {
                intent: json!({"kind": "conversation"}),
            },
        );
        assert_eq!(warnings, vec![ReducerWarning::DuplicateIntent]);
        assert_eq!(state.intent, Some(json!({"kind": "stock_analysis"})));
    }

    #[test]
    fn steps_are_monotonically_non_decreasing() {
        let state = base_state();
        let (state, _) = reduce(
            &state,
            &SessionEvent::StepUpdate {
                step: 4,
                status: "processing".to_string(),
                message: "training model".to_string(),
            },
        );
        assert_eq!(state.steps, 4);
        let (state, _) = reduce(
            &state,
            &SessionEvent::StepUpdate {
                step: 2,
                status: "processing".to_string(),
                message: "late heartbeat".to_string(),
            },
        );
        assert_eq!(state.steps, 4);
        assert_eq!(state.step_message.as_deref(), Some("late heartbeat"));
    }

    #[test]
    fn error_event_is_terminal() {
        let state = base_state();
        let (state, _) = reduce(
            &state,
            &SessionEvent::Error {
                error: "model blew up".to_string(),
            },
        );
        assert_eq!(state.status, AnalysisStatus::Error);
        assert_eq!(state.error_message.as_deref(), Some("model blew up"));

        // events after a terminal status are discarded with a warning
        let (after, warnings) = reduce(
            &state,
            &SessionEvent::StepUpdate {
                step: 9,
                status: "processing".to_string(),
                message: "stale".to_string(),
            },
        );
        assert_eq!(after.steps, state.steps);
        assert!(matches!(
            warnings.as_slice(),
            [ReducerWarning::EventAfterTerminal { .. }]
        ));
    }

    #[test]
    fn terminal_snapshot_replaces_report_fields() {
        let state = base_state();
        let (state, _) = reduce(&state, &chunk("analysis in progress"));
        let snapshot = AnalysisStatusResponse {
            session_id: "abc123".to_string(),
            status: AnalysisStatus::Completed,
            steps: 7,
            data: AnalysisSessionData {
                conclusion: Some("hold".to_string()),
                ..AnalysisSessionData::default()
            },
        };
        let state = apply_snapshot(&state, &snapshot);
        assert_eq!(state.status, AnalysisStatus::Completed);
        assert_eq!(state.steps, 7);
        assert_eq!(state.data.conclusion.as_deref(), Some("hold"));
        // partial thinking text is preserved, never silently discarded
        assert_eq!(state.thinking, "analysis in progress");
    }

    #[test]
    fn non_terminal_snapshot_does_not_regress_terminal_state() {
        let state = base_state();
        let (state, _) = reduce(
            &state,
            &SessionEvent::Error {
                error: "boom".to_string(),
            },
        );
        let snapshot = AnalysisStatusResponse {
            session_id: "abc123".to_string(),
            status: AnalysisStatus::Processing,
            steps: 1,
            data: AnalysisSessionData::default(),
        };
        let state = apply_snapshot(&state, &snapshot);
        assert_eq!(state.status, AnalysisStatus::Error);
    }

    #[test]
    fn stale_pending_snapshot_does_not_regress_processing() {
        let state = base_state();
        let (state, _) = reduce(&state, &chunk("working"));
        assert_eq!(state.status, AnalysisStatus::Processing);

        let snapshot = AnalysisStatusResponse {
            session_id: "abc123".to_string(),
            status: AnalysisStatus::Pending,
            steps: 0,
            data: AnalysisSessionData::default(),
        };
        let state = apply_snapshot(&state, &snapshot);
        assert_eq!(state.status, AnalysisStatus::Processing);
    }

    #[test]
    fn snapshot_assigns_session_id_once() {
        let state = AnalysisSession::new(None);
        let snapshot = AnalysisStatusResponse {
            session_id: "fresh".to_string(),
            status: AnalysisStatus::Processing,
            steps: 1,
            data: AnalysisSessionData::default(),
        };
        let state = apply_snapshot(&state, &snapshot);
        assert_eq!(state.session_id.as_deref(), Some("fresh"));
    }
}
