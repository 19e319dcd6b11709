//! Server-Sent Events line parser.
//!
//! Turns a chunked byte stream into a `Stream<Item = SseEvent>`. Events may
//! span several network chunks and a chunk may carry several events.

use std::pin::Pin;

use futures::Stream;
use tokio_stream::StreamExt;

/// A parsed SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

/// Parse a reqwest response body as an SSE stream.
pub fn parse_sse_stream(
    response: reqwest::Response,
) -> impl Stream<Item = anyhow::Result<SseEvent>> + Send {
    parse_sse_bytes(
        response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| anyhow::anyhow!("SSE stream error: {e}"))),
    )
}

/// Parse any stream of byte chunks as SSE.
pub fn parse_sse_bytes<S>(byte_stream: S) -> impl Stream<Item = anyhow::Result<SseEvent>> + Send
where
    S: Stream<Item = anyhow::Result<bytes::Bytes>> + Send + 'static,
{
    futures::stream::unfold(
        SseState {
            byte_stream: Box::pin(byte_stream),
            buffer: String::new(),
            current_event: None,
            current_data: Vec::new(),
            current_id: None,
        },
        |mut state| async move {
            loop {
                if let Some(newline_pos) = state.buffer.find('\n') {
                    let line: String = state.buffer.drain(..=newline_pos).collect();
                    let line = line.trim_end_matches(['\n', '\r']);

                    if line.is_empty() {
                        // Blank line dispatches the pending event
                        if let Some(event) = state.take_event() {
                            return Some((Ok(event), state));
                        }
                        continue;
                    }

                    if line.starts_with(':') {
                        continue;
                    }

                    if let Some(value) = line.strip_prefix("event:") {
                        state.current_event = Some(value.trim_start().to_string());
                    } else if let Some(value) = line.strip_prefix("data:") {
                        state.current_data.push(value.trim_start().to_string());
                    } else if let Some(value) = line.strip_prefix("id:") {
                        state.current_id = Some(value.trim_start().to_string());
                    }
                    continue;
                }

                match state.byte_stream.next().await {
                    Some(Ok(chunk)) => {
                        state.buffer.push_str(&String::from_utf8_lossy(&chunk));
                    }
                    Some(Err(e)) => {
                        return Some((Err(e), state));
                    }
                    None => {
                        // Flush a trailing event that was not followed by a blank line
                        if !state.buffer.is_empty() {
                            let rest = std::mem::take(&mut state.buffer);
                            if let Some(value) = rest.trim_end().strip_prefix("data:") {
                                state.current_data.push(value.trim_start().to_string());
                            }
                        }
                        let event = state.take_event();
                        return event.map(|event| (Ok(event), state));
                    }
                }
            }
        },
    )
}

struct SseState {
    byte_stream: Pin<Box<dyn Stream<Item = anyhow::Result<bytes::Bytes>> + Send>>,
    buffer: String,
    current_event: Option<String>,
    current_data: Vec<String>,
    current_id: Option<String>,
}

impl SseState {
    fn take_event(&mut self) -> Option<SseEvent> {
        if self.current_data.is_empty() {
            return None;
        }
        let event = SseEvent {
            event: self.current_event.take(),
            data: self.current_data.join("\n"),
            id: self.current_id.take(),
        };
        self.current_data.clear();
        Some(event)
    }
}
