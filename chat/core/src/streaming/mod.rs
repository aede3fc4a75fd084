//! Streaming Response Decoding
//!
//! The chat endpoint answers with newline-delimited JSON: one object per
//! line, each carrying an optional text delta, an optional `done` flag and an
//! optional `error`. This module reassembles those lines from arbitrarily
//! chunked bytes and turns them into a sequence of [`FragmentEvent`]s.
//!
//! ```text
//!  bytes ──► NdjsonDecoder ──► FragmentEvent::Text("Hel")
//!  (any       (line buffer,    FragmentEvent::Text("lo")
//!   chunking)  JSON per line)  FragmentEvent::Done
//! ```
//!
//! A line that fails to parse is logged and skipped. A body that ends with no
//! text and no completion signal is reported as [`DecodeError::NoResponse`].

mod decoder;

pub use decoder::{DecodeError, FragmentEvent, FragmentStream, NdjsonDecoder};
