//! Incremental `text/event-stream` decoding
//!
//! Only the `data:` field matters to this client; `event:`, `id:` and
//! `retry:` are accepted and ignored.

use bytes::BytesMut;

use crate::types::AppEvent;

/// Splits a byte stream into SSE messages and decodes their payloads
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: BytesMut,
    data: Vec<String>,
}

impl SseDecoder {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns the raw `data` payloads completed by it
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();

        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let raw = self.buf.split_to(pos + 1);
            let text = String::from_utf8_lossy(&raw[..pos]);
            let line = text.strip_suffix('\r').unwrap_or(&*text);

            if line.is_empty() {
                if !self.data.is_empty() {
                    out.push(self.data.join("\n"));
                    self.data.clear();
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
                None => (line, ""),
            };
            if field == "data" {
                self.data.push(value.to_string());
            }
        }

        out
    }

    /// Feed a chunk and decode each completed payload as an [`AppEvent`]
    ///
    /// Payloads that are not valid event JSON are skipped.
    pub fn feed_events(&mut self, chunk: &[u8]) -> Vec<AppEvent> {
        self.feed(chunk)
            .into_iter()
            .filter_map(|payload| match serde_json::from_str::<AppEvent>(&payload) {
                Ok(ev) => Some(ev),
                Err(e) => {
                    tracing::debug!("Skipping undecodable event payload: {}", e);
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_message() {
        let mut dec = SseDecoder::new();
        let out = dec.feed(b"data: {\"type\":\"x\",\"data\":1,\"ts\":5}\n\n");
        assert_eq!(out, vec![r#"{"type":"x","data":1,"ts":5}"#.to_string()]);
    }

    #[test]
    fn split_across_chunks_and_crlf() {
        let mut dec = SseDecoder::new();
        assert!(dec.feed(b"data: {\"type\":\"a\",").is_empty());
        assert!(dec.feed(b"\"ts\":1}\r\n").is_empty());
        let events = dec.feed_events(b"\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "a");
    }

    #[test]
    fn multiline_data_and_comments() {
        let mut dec = SseDecoder::new();
        let out = dec.feed(b": keepalive\nevent: tick\ndata: line1\ndata: line2\n\n");
        assert_eq!(out, vec!["line1\nline2".to_string()]);
    }

    #[test]
    fn invalid_payload_skipped() {
        let mut dec = SseDecoder::new();
        let events = dec.feed_events(b"data: not json\n\ndata: {\"type\":\"ok\"}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "ok");
    }

    #[test]
    fn blank_lines_without_data_dispatch_nothing() {
        let mut dec = SseDecoder::new();
        assert!(dec.feed(b"\n\n\nretry: 1000\n\n").is_empty());
    }
}
