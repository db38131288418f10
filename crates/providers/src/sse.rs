//! Server-sent event plumbing shared by every vendor.
//!
//! Network reads split lines (and UTF-8 sequences) arbitrarily, so bytes are
//! held until a newline completes a line. Each complete `data:` line is
//! parsed as JSON and handed to a vendor-specific delta extractor.

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::trace;
use typewire_core::provider::{ChunkReceiver, StreamChunk};
use typewire_core::{CallContext, Error, TransportError};

/// End-of-stream sentinel sent by OpenAI-compatible servers.
const DONE_SENTINEL: &str = "[DONE]";

/// Pulls the text delta out of one parsed SSE payload.
pub type DeltaExtractor = fn(&Value) -> Option<String>;

/// Accumulates raw bytes and yields complete lines.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes`, returning every line completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(decode_line(&line[..line.len() - 1]));
        }
        lines
    }

    /// Take whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(decode_line(&rest))
    }
}

fn decode_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches('\r')
        .to_string()
}

/// Parse one SSE line into its JSON payload.
///
/// Returns `None` for blank lines, comments, non-data fields, the end
/// sentinel, and payloads that fail to parse.
pub fn parse_data_line(line: &str) -> Option<Value> {
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() || data == DONE_SENTINEL {
        return None;
    }

    match serde_json::from_str(data) {
        Ok(value) => Some(value),
        Err(e) => {
            trace!(data = %data, error = %e, "Ignoring unparseable SSE chunk");
            None
        }
    }
}

/// Drive an SSE response body on a background task, forwarding deltas.
///
/// Cancellation ends the stream with `Error::Cancelled` and no further
/// deltas are sent.
pub fn spawn_reader(
    response: reqwest::Response,
    ctx: CallContext,
    extract: DeltaExtractor,
) -> ChunkReceiver {
    let (tx, rx) = mpsc::channel(64);

    tokio::spawn(async move {
        let mut byte_stream = response.bytes_stream();
        let mut buffer = SseLineBuffer::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => {
                    let _ = tx.send(Err(Error::Cancelled)).await;
                    return;
                }
                next = byte_stream.next() => next,
            };

            let bytes = match next {
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => {
                    let err = if e.is_timeout() {
                        TransportError::Timeout(e.to_string())
                    } else {
                        TransportError::StreamInterrupted(e.to_string())
                    };
                    let _ = tx.send(Err(err.into())).await;
                    return;
                }
                None => break,
            };

            for line in buffer.push(&bytes) {
                if !forward(&line, extract, &tx).await {
                    return;
                }
            }
        }

        if let Some(line) = buffer.finish() {
            if !forward(&line, extract, &tx).await {
                return;
            }
        }
        let _ = tx.send(Ok(StreamChunk::finished())).await;
    });

    rx
}

/// Send the delta carried by `line`, if any. Returns false once the receiver is gone.
async fn forward(
    line: &str,
    extract: DeltaExtractor,
    tx: &mpsc::Sender<typewire_core::Result<StreamChunk>>,
) -> bool {
    let Some(delta) = parse_data_line(line).as_ref().and_then(extract) else {
        return true;
    };
    if delta.is_empty() {
        return true;
    }
    tx.send(Ok(StreamChunk::delta(delta))).await.is_ok()
}

/// Collect a chunk stream into the full reply text.
pub async fn collect_text(mut rx: ChunkReceiver) -> typewire_core::Result<String> {
    let mut text = String::new();
    while let Some(chunk) = rx.recv().await {
        let chunk = chunk?;
        if let Some(content) = chunk.content {
            text.push_str(&content);
        }
        if chunk.done {
            break;
        }
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve;
    use axum::Router;
    use axum::body::{Body, Bytes};
    use axum::routing::get;
    use serde_json::json;

    fn text_field(value: &Value) -> Option<String> {
        value["text"].as_str().map(String::from)
    }

    #[test]
    fn partial_lines_are_held_back() {
        let mut buffer = SseLineBuffer::new();
        assert!(buffer.push(b"data: {\"te").is_empty());
        let lines = buffer.push(b"xt\":\"hi\"}\r\ndata: [DO");
        assert_eq!(lines, vec![r#"data: {"text":"hi"}"#.to_string()]);
        assert_eq!(buffer.push(b"NE]\n"), vec!["data: [DONE]".to_string()]);
        assert!(buffer.finish().is_none());
    }

    #[test]
    fn split_utf8_survives() {
        let mut buffer = SseLineBuffer::new();
        let encoded = "data: café\n".as_bytes();
        let split = encoded.len() - 2;
        assert!(buffer.push(&encoded[..split]).is_empty());
        assert_eq!(buffer.push(&encoded[split..]), vec!["data: café".to_string()]);
    }

    #[test]
    fn finish_returns_unterminated_tail() {
        let mut buffer = SseLineBuffer::new();
        buffer.push(b"data: {\"text\":\"tail\"}");
        assert_eq!(buffer.finish().as_deref(), Some(r#"data: {"text":"tail"}"#));
    }

    #[test]
    fn data_line_parsing() {
        assert_eq!(parse_data_line(r#"data: {"a":1}"#), Some(json!({"a": 1})));
        assert_eq!(parse_data_line(r#"data:{"a":1}"#), Some(json!({"a": 1})));
        assert!(parse_data_line("data: [DONE]").is_none());
        assert!(parse_data_line("event: content_block_delta").is_none());
        assert!(parse_data_line(": keep-alive").is_none());
        assert!(parse_data_line("data: {broken").is_none());
        assert!(parse_data_line("").is_none());
    }

    #[tokio::test]
    async fn reader_skips_bad_lines_and_finishes() {
        let parts: [&'static [u8]; 2] = [
            b"data: {\"text\":\"Hel\"}\n\ndata: {oops}\n",
            b"data: {\"text\":\"lo\"}\ndata: [DONE]\n",
        ];
        let app = Router::new().route(
            "/",
            get(move || async move {
                let chunks = parts.map(|p| Ok::<_, std::io::Error>(Bytes::from_static(p)));
                Body::from_stream(futures::stream::iter(chunks))
            }),
        );
        let url = serve(app).await;

        let response = reqwest::get(&url).await.unwrap();
        let rx = spawn_reader(response, CallContext::default(), text_field);
        assert_eq!(collect_text(rx).await.unwrap(), "Hello");
    }

    #[tokio::test]
    async fn reader_stops_on_cancel() {
        let app = Router::new().route(
            "/",
            get(|| async {
                let stream = futures::stream::unfold(0u32, |n| async move {
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                    let line = format!("data: {{\"text\":\"w{n} \"}}\n");
                    Some((Ok::<_, std::io::Error>(Bytes::from(line)), n + 1))
                });
                Body::from_stream(stream)
            }),
        );
        let url = serve(app).await;

        let ctx = CallContext::default();
        let response = reqwest::get(&url).await.unwrap();
        let mut rx = spawn_reader(response, ctx.clone(), text_field);

        let first = rx.recv().await.unwrap().unwrap();
        assert!(first.content.is_some());
        ctx.cancel.cancel();

        let mut saw_cancel = false;
        while let Some(item) = rx.recv().await {
            if let Err(e) = item {
                assert!(e.is_cancelled());
                saw_cancel = true;
                break;
            }
        }
        assert!(saw_cancel);
        assert!(rx.recv().await.is_none());
    }
}
