//! Server-sent events framing over a reqwest byte stream.

use std::fmt::Display;
use std::pin::Pin;

use futures_util::{Stream, StreamExt};

use crate::error::CoreError;

pub type DataStream = Pin<Box<dyn Stream<Item = Result<String, CoreError>> + Send>>;

/// Yield the payload of every `data:` event. Multi-line data fields are
/// joined with `\n`; the stream ends at `[DONE]` or when the body closes.
pub fn data_events(response: reqwest::Response) -> DataStream {
    event_stream(response.bytes_stream())
}

/// [`data_events`] over any byte chunk stream.
pub fn event_stream<S, B, E>(chunks: S) -> DataStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    Box::pin(async_stream::try_stream! {
        let mut chunks = Box::pin(chunks);
        let mut decoder = SseDecoder::default();

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| CoreError::Generation(format!("Stream read failed: {}", e)))?;
            for payload in decoder.push(chunk.as_ref()) {
                yield payload;
            }
            if decoder.is_done() {
                return;
            }
        }

        if let Some(payload) = decoder.finish() {
            yield payload;
        }
    })
}

/// Incremental `data:` event decoder. Bytes are buffered until a full line
/// arrives so multi-byte characters split across chunks decode intact.
#[derive(Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
    done: bool,
}

impl SseDecoder {
    /// Feed a chunk and return the payloads of the events it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }
        self.buffer.extend_from_slice(chunk);

        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&raw[..newline]);
            let line = line.trim_end_matches('\r');

            if line.is_empty() {
                if let Some(payload) = self.dispatch() {
                    events.push(payload);
                }
                if self.done {
                    break;
                }
            } else if let Some(rest) = line.strip_prefix("data:") {
                self.data.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
            }
        }
        events
    }

    /// Flush an event left open when the body closed.
    pub fn finish(&mut self) -> Option<String> {
        if self.done {
            return None;
        }
        if !self.buffer.is_empty() {
            let raw = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches('\r');
            if let Some(rest) = line.strip_prefix("data:") {
                self.data.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
            }
        }
        self.dispatch()
    }

    /// Whether `[DONE]` has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    fn dispatch(&mut self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        let payload = self.data.join("\n");
        self.data.clear();
        if payload == "[DONE]" {
            self.done = true;
            return None;
        }
        Some(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multibyte_char_split_across_chunks() {
        let body = "data: {\"t\":\"é\"}\n\n".as_bytes();
        let split = body.iter().position(|b| *b == 0xC3).unwrap() + 1;

        let mut decoder = SseDecoder::default();
        assert!(decoder.push(&body[..split]).is_empty());
        assert_eq!(decoder.push(&body[split..]), vec!["{\"t\":\"é\"}".to_string()]);
    }

    #[test]
    fn test_multi_line_data_and_done() {
        let mut decoder = SseDecoder::default();
        let events = decoder.push(b"data: one\r\ndata: two\r\n\r\n: ping\n\ndata: [DONE]\n\ndata: late\n\n");
        assert_eq!(events, vec!["one\ntwo".to_string()]);
        assert!(decoder.is_done());
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_finish_flushes_unterminated_event() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: tail").is_empty());
        assert_eq!(decoder.finish().as_deref(), Some("tail"));
    }

    #[tokio::test]
    async fn test_event_stream_over_chunks() {
        let chunks: Vec<Result<Vec<u8>, std::io::Error>> = vec![
            Ok(b"data: {\"a\":".to_vec()),
            Ok(b"1}\n\ndata: [DO".to_vec()),
            Ok(b"NE]\n\n".to_vec()),
            Ok(b"data: ignored\n\n".to_vec()),
        ];
        let payloads: Vec<String> = event_stream(futures_util::stream::iter(chunks))
            .map(|item| item.unwrap())
            .collect()
            .await;
        assert_eq!(payloads, vec!["{\"a\":1}".to_string()]);
    }
}
