//! Server-Sent Events (SSE) stream processing for streaming adapters.
//!
//! SSE format:
//! ```text
//! data: {"key": "value"}
//!
//! data: {"another": "event"}
//!
//! data: [DONE]
//! ```

use futures::stream::{self, Stream, StreamExt};

use crate::provider::ProviderError;

/// Extension trait for `reqwest::Response` to enable SSE streaming.
pub trait SseResponseExt {
    /// Convert the response into a stream of raw SSE data lines.
    ///
    /// Returns the content after `data: ` prefix for each SSE event.
    /// Stops when `[DONE]` marker is encountered or stream ends.
    fn sse(self) -> impl Stream<Item = Result<String, ProviderError>> + Send;
}

impl SseResponseExt for reqwest::Response {
    fn sse(self) -> impl Stream<Item = Result<String, ProviderError>> + Send {
        let byte_stream = self.bytes_stream();

        stream::unfold(
            (Box::pin(byte_stream), String::new(), false),
            |(mut byte_stream, mut buffer, mut stream_ended)| async move {
                loop {
                    if !stream_ended {
                        match byte_stream.next().await {
                            Some(Ok(chunk)) => {
                                if let Ok(s) = std::str::from_utf8(&chunk) {
                                    buffer.push_str(s);
                                }
                            }
                            Some(Err(e)) => {
                                return Some((
                                    Err(ProviderError::from(e)),
                                    (byte_stream, buffer, stream_ended),
                                ));
                            }
                            None => {
                                stream_ended = true;
                            }
                        }
                    }

                    while let Some(pos) = buffer.find('\n') {
                        let line = buffer[..pos].trim().to_string();
                        buffer.drain(..=pos);

                        if line.is_empty() {
                            continue;
                        }

                        if let Some(data) = parse_sse_line(&line) {
                            if is_done_marker(data) {
                                return None;
                            }

                            return Some((
                                Ok(data.to_string()),
                                (byte_stream, buffer, stream_ended),
                            ));
                        }
                    }

                    if stream_ended {
                        if !buffer.is_empty() {
                            let line = buffer.trim().to_string();
                            buffer.clear();
                            if !line.is_empty() {
                                if let Some(data) = parse_sse_line(&line) {
                                    if !is_done_marker(data) {
                                        return Some((
                                            Ok(data.to_string()),
                                            (byte_stream, buffer, stream_ended),
                                        ));
                                    }
                                }
                            }
                        }

                        return None;
                    }
                }
            },
        )
    }
}

/// Parse an SSE line to extract the data portion.
///
/// SSE lines are in the format: `data: <content>`
pub fn parse_sse_line(line: &str) -> Option<&str> {
    line.strip_prefix("data: ").map(|s| s.trim())
}

/// Check if an SSE data line indicates the stream is done.
pub fn is_done_marker(data: &str) -> bool {
    data == "[DONE]"
}
