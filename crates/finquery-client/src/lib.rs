//! Client core for the finquery analysis backend.
//!
//! Creates analysis tasks over HTTP, consumes the long-lived SSE event
//! stream of incremental thinking/progress frames, folds everything
//! into a single [`finquery_types::AnalysisSession`] view model, and
//! offers a fixed-interval polling fallback with the same contract.

mod config;
mod error;
mod http;
mod poll;
mod reducer;
mod sse;
mod stream;
#[cfg(test)]
mod testing;

pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use http::{AnalysisApi, CircuitBreaker, CircuitState, FrameStream, HttpAnalysisApi, StreamQuery};
pub use poll::{poll_session, DEFAULT_POLL_INTERVAL};
pub use reducer::{apply_snapshot, reduce, ReducerWarning};
pub use sse::{decode_frame, encode_frame, parse_sse_frame, Decoded, RawFrame};
pub use stream::StreamController;
