//! Shared SSE -> [`LLMStream`] adapter.

use eventsource_stream::Eventsource;
use futures_util::{stream, StreamExt};
use reqwest::Response;

use crate::provider::{LLMError, LLMStream, Result};
use crate::types::StreamDelta;

fn to_stream_error(err: LLMError) -> LLMError {
    match err {
        LLMError::Stream(msg) => LLMError::Stream(msg),
        other => LLMError::Stream(other.to_string()),
    }
}

/// Convert an SSE HTTP [`Response`] into an [`LLMStream`].
///
/// `handler` receives the SSE event name and data payload for each event and
/// returns the deltas it carries (possibly none). A handler error is emitted
/// as an `LLMError::Stream` item.
pub fn llm_stream_from_sse<H>(response: Response, mut handler: H) -> LLMStream
where
    H: FnMut(&str, &str) -> Result<Vec<StreamDelta>> + Send + 'static,
{
    let stream = response
        .bytes_stream()
        .eventsource()
        .map(move |event| -> Vec<Result<StreamDelta>> {
            let event = match event {
                Ok(event) => event,
                Err(e) => return vec![Err(LLMError::Stream(e.to_string()))],
            };
            match handler(event.event.as_str(), event.data.as_str()) {
                Ok(deltas) => deltas.into_iter().map(Ok).collect(),
                Err(err) => vec![Err(to_stream_error(err))],
            }
        })
        .flat_map(stream::iter);

    Box::pin(stream)
}
