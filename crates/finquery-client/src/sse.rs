use finquery_types::SessionEvent;
use serde_json::Value;

/// One named frame off the SSE wire, before decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    /// Value of the `event:` line, when present.
    pub event: Option<String>,
    /// Joined `data:` payload.
    pub data: String,
}

/// Outcome of decoding one raw frame. Neither `Unknown` nor
/// `Malformed` is fatal to the connection; both are logged and the
/// frame is dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Event(SessionEvent),
    Unknown { name: String },
    Malformed { name: String, detail: String },
}

const KNOWN_EVENTS: [&str; 6] = [
    "thinking_chunk",
    "thinking_complete",
    "intent_determined",
    "step_update",
    "error",
    "analysis_complete",
];

/// Extract the next complete frame from an SSE buffer, consuming it.
///
/// SSE format:
///   event: name\ndata: {json}\n\n
/// or just
///   data: {json}\n\n
///
/// Notes:
/// - The `data:` prefix may or may not include a space after the colon.
/// - An event may contain multiple `data:` lines; they must be
///   concatenated with '\n'.
/// - Some servers use \r\n line endings.
pub fn parse_sse_frame(buffer: &mut String) -> Option<RawFrame> {
    // Find the frame delimiter (\n\n or \r\n\r\n)
    let (end_idx, delim_len) = if let Some(i) = buffer.find("\r\n\r\n") {
        (i, 4)
    } else if let Some(i) = buffer.find("\n\n") {
        (i, 2)
    } else {
        return None;
    };

    let frame_str = buffer[..end_idx].to_string();
    *buffer = buffer[end_idx + delim_len..].to_string();

    let mut event_name: Option<String> = None;
    let mut data_lines: Vec<String> = Vec::new();
    for raw_line in frame_str.lines() {
        let line = raw_line.trim_end_matches('\r');
        if let Some(rest) = line.strip_prefix("event:") {
            event_name = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.trim_start().to_string());
        }
        // comment lines (":keep-alive") and id lines are ignored
    }

    if event_name.is_none() && data_lines.is_empty() {
        return None;
    }

    Some(RawFrame {
        event: event_name,
        data: data_lines.join("\n"),
    })
}

/// Decode a raw frame into a typed event.
///
/// The event name comes from the `event:` line, falling back to a
/// `type` field inside the payload. Unknown names and malformed
/// payloads are reported, not propagated as connection errors, so the
/// client stays tolerant of backend additions.
pub fn decode_frame(frame: &RawFrame) -> Decoded {
    let data = if frame.data.trim().is_empty() {
        "{}"
    } else {
        frame.data.as_str()
    };

    let value: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            return Decoded::Malformed {
                name: frame.event.clone().unwrap_or_default(),
                detail: format!("invalid JSON payload: {}", e),
            }
        }
    };

    let name = frame
        .event
        .clone()
        .or_else(|| value.get("type").and_then(Value::as_str).map(str::to_string));

    let Some(name) = name else {
        return Decoded::Malformed {
            name: String::new(),
            detail: "frame carries no event name".to_string(),
        };
    };

    if !KNOWN_EVENTS.contains(&name.as_str()) {
        return Decoded::Unknown { name };
    }

    let mut object = match value {
        Value::Object(map) => map,
        _ => {
            return Decoded::Malformed {
                name,
                detail: "payload is not a JSON object".to_string(),
            }
        }
    };
    object.insert("type".to_string(), Value::String(name.clone()));

    match serde_json::from_value::<SessionEvent>(Value::Object(object)) {
        Ok(event) => Decoded::Event(event),
        Err(e) => Decoded::Malformed {
            name,
            detail: e.to_string(),
        },
    }
}

/// Render an event back into SSE wire text. Used by tests and by
/// scripted fakes standing in for the backend.
pub fn encode_frame(event: &SessionEvent) -> String {
    let payload = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    format!("event: {}\ndata: {}\n\n", event.name(), payload)
}
