//! NDJSON Fragment Decoder
//!
//! Turns a chunked response body into [`FragmentEvent`]s.
//!
//! [`NdjsonDecoder`] is the synchronous core: feed it byte chunks of any size
//! and pop events. [`FragmentStream`] wraps a byte stream around it and
//! exposes a pull-based, finite, non-restartable `next()`.

use std::collections::VecDeque;

use futures::{Stream, StreamExt};
use serde::Deserialize;
use thiserror::Error;

use crate::error::TransportError;

/// One decoded event from the response stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FragmentEvent {
    /// A piece of generated text (a delta, not cumulative)
    Text(String),
    /// The backend reported an error; the sequence ends here
    Error {
        /// Backend-provided error text
        message: String,
    },
    /// The backend signalled completion; the sequence ends here
    Done,
}

impl FragmentEvent {
    /// Whether this event ends the sequence
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Done)
    }
}

/// Failures that end a fragment sequence without an event
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The body ended with neither text nor a completion signal
    #[error("no response received")]
    NoResponse,

    /// Reading the body failed
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// One NDJSON line of a chat response
#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: Option<bool>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Incremental NDJSON decoder
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    /// Bytes of the current, not yet terminated line
    buffer: Vec<u8>,
    /// Decoded events waiting to be popped
    pending: VecDeque<FragmentEvent>,
    /// Whether any text fragment was decoded
    saw_text: bool,
    /// Whether a terminal event was decoded
    terminated: bool,
    /// Lines dropped because they did not parse
    malformed_lines: usize,
}

impl NdjsonDecoder {
    /// Create an empty decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes
    ///
    /// Complete lines are decoded immediately; a trailing partial line is
    /// kept until the rest arrives. Input after a terminal event is ignored.
    pub fn push(&mut self, chunk: &[u8]) {
        if self.terminated {
            return;
        }

        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            self.buffer.extend_from_slice(&rest[..pos]);
            rest = &rest[pos + 1..];

            let line = std::mem::take(&mut self.buffer);
            self.decode_line(&line);
            if self.terminated {
                return;
            }
        }
        self.buffer.extend_from_slice(rest);
    }

    /// Signal end of input
    ///
    /// A trailing unterminated line is decoded as a complete line.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::NoResponse`] if the input produced neither a
    /// text fragment nor a terminal event.
    pub fn finish(&mut self) -> Result<(), DecodeError> {
        if !self.terminated && !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.decode_line(&line);
        }

        if self.terminated || self.saw_text {
            Ok(())
        } else {
            Err(DecodeError::NoResponse)
        }
    }

    /// Pop the next decoded event
    pub fn next_event(&mut self) -> Option<FragmentEvent> {
        self.pending.pop_front()
    }

    /// Whether a terminal event has been decoded
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Number of lines dropped as malformed
    #[must_use]
    pub fn malformed_lines(&self) -> usize {
        self.malformed_lines
    }

    fn decode_line(&mut self, raw: &[u8]) {
        let Ok(line) = std::str::from_utf8(raw) else {
            self.malformed_lines += 1;
            tracing::warn!(bytes = raw.len(), "Skipping line that is not valid UTF-8");
            return;
        };

        let line = line.trim();
        if line.is_empty() {
            return;
        }

        let chunk: ChatChunk = match serde_json::from_str(line) {
            Ok(chunk) => chunk,
            Err(e) => {
                self.malformed_lines += 1;
                tracing::warn!(error = %e, line = %line, "Failed to parse chunk");
                return;
            }
        };

        if let Some(message) = chunk.error {
            self.pending.push_back(FragmentEvent::Error { message });
            self.terminate();
            return;
        }

        if let Some(text) = chunk.message.and_then(|m| m.content) {
            if !text.is_empty() {
                self.saw_text = true;
                self.pending.push_back(FragmentEvent::Text(text));
            }
        }

        if chunk.done.unwrap_or(false) {
            self.pending.push_back(FragmentEvent::Done);
            self.terminate();
        }
    }

    fn terminate(&mut self) {
        self.terminated = true;
        self.buffer.clear();
    }
}

/// Pull-based fragment sequence over a response body
///
/// Yields events in order until a terminal event, a failure, or the end of a
/// body that produced text. After that it only yields `None`.
pub struct FragmentStream<S> {
    bytes: Option<S>,
    decoder: NdjsonDecoder,
}

impl<S> FragmentStream<S>
where
    S: Stream<Item = Result<Vec<u8>, TransportError>> + Unpin,
{
    /// Wrap a byte stream
    pub fn new(bytes: S) -> Self {
        Self {
            bytes: Some(bytes),
            decoder: NdjsonDecoder::new(),
        }
    }

    /// Next event, or `None` once the sequence is over
    pub async fn next(&mut self) -> Option<Result<FragmentEvent, DecodeError>> {
        loop {
            if let Some(event) = self.decoder.next_event() {
                if self.decoder.is_terminated() && self.decoder.pending.is_empty() {
                    // Release the connection as soon as the sequence is over
                    self.bytes = None;
                }
                return Some(Ok(event));
            }

            if self.decoder.is_terminated() {
                self.bytes = None;
                return None;
            }

            let bytes = self.bytes.as_mut()?;
            match bytes.next().await {
                Some(Ok(chunk)) => self.decoder.push(&chunk),
                Some(Err(e)) => {
                    self.bytes = None;
                    return Some(Err(DecodeError::Transport(e)));
                }
                None => {
                    self.bytes = None;
                    if let Err(e) = self.decoder.finish() {
                        return Some(Err(e));
                    }
                }
            }
        }
    }

    /// Number of lines dropped as malformed so far
    #[must_use]
    pub fn malformed_lines(&self) -> usize {
        self.decoder.malformed_lines()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    const HELLO: &[u8] =
        b"{\"message\":{\"content\":\"Hel\"}}\n{\"message\":{\"content\":\"lo\"}}\n{\"done\":true}\n";

    fn decode_all(chunks: &[&[u8]]) -> (Vec<FragmentEvent>, Result<(), DecodeError>) {
        let mut decoder = NdjsonDecoder::new();
        for chunk in chunks {
            decoder.push(chunk);
        }
        let result = decoder.finish();
        let mut events = Vec::new();
        while let Some(event) = decoder.next_event() {
            events.push(event);
        }
        (events, result)
    }

    fn hello_events() -> Vec<FragmentEvent> {
        vec![
            FragmentEvent::Text("Hel".to_string()),
            FragmentEvent::Text("lo".to_string()),
            FragmentEvent::Done,
        ]
    }

    #[test]
    fn test_single_chunk() {
        let (events, result) = decode_all(&[HELLO]);
        assert_eq!(events, hello_events());
        assert!(result.is_ok());
    }

    #[test]
    fn test_byte_at_a_time_matches_single_chunk() {
        let chunks: Vec<&[u8]> = HELLO.chunks(1).collect();
        let (events, result) = decode_all(&chunks);
        assert_eq!(events, hello_events());
        assert!(result.is_ok());
    }

    #[test]
    fn test_every_split_point_matches_single_chunk() {
        for split in 0..=HELLO.len() {
            let (head, tail) = HELLO.split_at(split);
            let (events, _) = decode_all(&[head, tail]);
            assert_eq!(events, hello_events(), "split at {split}");
        }
    }

    #[test]
    fn test_multibyte_utf8_split_across_chunks() {
        let line = "{\"message\":{\"content\":\"héllo 👋\"}}\n{\"done\":true}\n".as_bytes();
        let chunks: Vec<&[u8]> = line.chunks(1).collect();
        let (events, _) = decode_all(&chunks);
        assert_eq!(
            events,
            vec![FragmentEvent::Text("héllo 👋".to_string()), FragmentEvent::Done]
        );
    }

    #[test]
    fn test_malformed_line_is_skipped() {
        let input = b"{\"message\":{\"content\":\"a\"}}\nnot json\n{\"message\":{\"content\":\"b\"}}\n{\"done\":true}\n";
        let mut decoder = NdjsonDecoder::new();
        decoder.push(input);
        assert_eq!(decoder.malformed_lines(), 1);

        let mut events = Vec::new();
        while let Some(event) = decoder.next_event() {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![
                FragmentEvent::Text("a".to_string()),
                FragmentEvent::Text("b".to_string()),
                FragmentEvent::Done,
            ]
        );
    }

    #[test]
    fn test_error_terminates() {
        let input = b"{\"message\":{\"content\":\"par\"}}\n{\"error\":\"out of memory\"}\n{\"message\":{\"content\":\"tial\"}}\n";
        let (events, result) = decode_all(&[input]);
        assert_eq!(
            events,
            vec![
                FragmentEvent::Text("par".to_string()),
                FragmentEvent::Error {
                    message: "out of memory".to_string()
                },
            ]
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_done_ignores_trailing_partial_line() {
        let (events, result) = decode_all(&[b"{\"done\":true}\n{\"message\":{\"con"]);
        assert_eq!(events, vec![FragmentEvent::Done]);
        assert!(result.is_ok());
    }

    #[test]
    fn test_content_and_done_on_one_line() {
        let (events, _) = decode_all(&[b"{\"message\":{\"content\":\"!\"},\"done\":true}\n"]);
        assert_eq!(
            events,
            vec![FragmentEvent::Text("!".to_string()), FragmentEvent::Done]
        );
    }

    #[test]
    fn test_empty_content_and_blank_lines_emit_nothing() {
        let (events, _) = decode_all(&[
            b"\n\r\n{\"message\":{\"role\":\"assistant\",\"content\":\"\"}}\r\n{\"done\":true}\r\n",
        ]);
        assert_eq!(events, vec![FragmentEvent::Done]);
    }

    #[test]
    fn test_no_response() {
        let (events, result) = decode_all(&[b"\n"]);
        assert!(events.is_empty());
        assert_eq!(result, Err(DecodeError::NoResponse));

        let (_, result) = decode_all(&[b"garbage\n{\"message\":{}}\n"]);
        assert_eq!(result, Err(DecodeError::NoResponse));
    }

    #[test]
    fn test_unterminated_final_line_is_decoded() {
        let (events, result) = decode_all(&[b"{\"message\":{\"content\":\"x\"}}\n{\"done\":true}"]);
        assert_eq!(
            events,
            vec![FragmentEvent::Text("x".to_string()), FragmentEvent::Done]
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_text_without_done_is_not_no_response() {
        let (events, result) = decode_all(&[b"{\"message\":{\"content\":\"x\"}}\n"]);
        assert_eq!(events, vec![FragmentEvent::Text("x".to_string())]);
        assert!(result.is_ok());
    }

    fn byte_stream(
        chunks: Vec<Result<Vec<u8>, TransportError>>,
    ) -> impl Stream<Item = Result<Vec<u8>, TransportError>> + Unpin {
        futures::stream::iter(chunks)
    }

    async fn collect(
        mut stream: FragmentStream<impl Stream<Item = Result<Vec<u8>, TransportError>> + Unpin>,
    ) -> Vec<Result<FragmentEvent, DecodeError>> {
        let mut out = Vec::new();
        while let Some(item) = stream.next().await {
            out.push(item);
        }
        // Non-restartable: stays exhausted
        assert!(stream.next().await.is_none());
        out
    }

    #[tokio::test]
    async fn test_stream_chunked() {
        let chunks = HELLO.chunks(3).map(|c| Ok(c.to_vec())).collect();
        let events = collect(FragmentStream::new(byte_stream(chunks))).await;
        assert_eq!(
            events,
            hello_events().into_iter().map(Ok).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_stream_stops_after_done() {
        let chunks = vec![
            Ok(b"{\"done\":true}\n".to_vec()),
            Err(TransportError::Stream("never read".to_string())),
        ];
        let events = collect(FragmentStream::new(byte_stream(chunks))).await;
        assert_eq!(events, vec![Ok(FragmentEvent::Done)]);
    }

    #[tokio::test]
    async fn test_stream_no_response() {
        let events = collect(FragmentStream::new(byte_stream(vec![]))).await;
        assert_eq!(events, vec![Err(DecodeError::NoResponse)]);
    }

    #[tokio::test]
    async fn test_stream_read_failure_after_text() {
        let chunks = vec![
            Ok(b"{\"message\":{\"content\":\"par\"}}\n".to_vec()),
            Err(TransportError::Stream("connection reset".to_string())),
        ];
        let events = collect(FragmentStream::new(byte_stream(chunks))).await;
        assert_eq!(
            events,
            vec![
                Ok(FragmentEvent::Text("par".to_string())),
                Err(DecodeError::Transport(TransportError::Stream(
                    "connection reset".to_string()
                ))),
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_end_after_text_finishes_quietly() {
        let chunks = vec![Ok(b"{\"message\":{\"content\":\"only\"}}".to_vec())];
        let events = collect(FragmentStream::new(byte_stream(chunks))).await;
        assert_eq!(events, vec![Ok(FragmentEvent::Text("only".to_string()))]);
    }
}
