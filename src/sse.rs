//! Server-Sent Events decoder.
//!
//! Accepts an incremental byte stream and emits a lazy sequence of
//! [`SseEvent`]s. This is hand-rolled rather than delegated to a streaming
//! crate because the exact line-folding and dispatch rules are themselves a
//! tested contract: feeding bytes one at a time must equal feeding the whole
//! buffer at once.

/// One decoded SSE frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
    pub retry: Option<u64>,
}

impl SseEvent {
    fn is_empty(&self) -> bool {
        self.event.is_none() && self.data.is_empty() && self.id.is_none() && self.retry.is_none()
    }
}

/// Incremental decoder. Feed bytes as they arrive; call [`Self::finish`] at
/// end-of-stream to flush any trailing pending event.
#[derive(Debug, Default)]
pub struct SseDecoder {
    line_buf: Vec<u8>,
    pending: SseEvent,
    have_data: bool,
    after_cr: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, returning every event dispatched as a result.
    /// `\n`, `\r\n`, and lone `\r` are all accepted line terminators; a `\r`
    /// dispatches immediately and a following `\n` is swallowed rather than
    /// treated as a second, blank line.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        let mut out = Vec::new();
        for &b in bytes {
            if b == b'\n' {
                if self.after_cr {
                    self.after_cr = false;
                    continue;
                }
                self.consume_line(&mut out);
            } else if b == b'\r' {
                self.consume_line(&mut out);
                self.after_cr = true;
            } else {
                self.after_cr = false;
                self.line_buf.push(b);
            }
        }
        out
    }

    fn consume_line(&mut self, out: &mut Vec<SseEvent>) {
        let line = std::mem::take(&mut self.line_buf);
        match std::str::from_utf8(&line) {
            Ok(text) => self.handle_line(text, out),
            Err(_) => { /* malformed UTF-8: discard this line only */ }
        }
    }

    fn handle_line(&mut self, line: &str, out: &mut Vec<SseEvent>) {
        if line.is_empty() {
            if self.have_data || self.pending.event.is_some() {
                let dispatched = std::mem::take(&mut self.pending);
                out.push(dispatched);
            }
            self.have_data = false;
            return;
        }

        if let Some(rest) = line.strip_prefix(':') {
            let _ = rest; // comment line, ignored
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };

        match field {
            "event" => self.pending.event = Some(value.to_string()),
            "data" => {
                if self.have_data {
                    self.pending.data.push('\n');
                }
                self.pending.data.push_str(value);
                self.have_data = true;
            }
            "id" => self.pending.id = Some(value.to_string()),
            "retry" => {
                if let Ok(ms) = value.parse() {
                    self.pending.retry = Some(ms);
                }
            }
            _ => { /* unknown field, ignored */ }
        }
    }

    /// Flush any non-empty pending event at end-of-stream.
    pub fn finish(mut self) -> Option<SseEvent> {
        if !self.line_buf.is_empty() {
            let mut out = Vec::new();
            self.consume_line(&mut out);
            if let Some(ev) = out.into_iter().next() {
                return Some(ev);
            }
        }
        if self.have_data || self.pending.event.is_some() {
            Some(self.pending)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_whole(input: &[u8]) -> Vec<SseEvent> {
        let mut dec = SseDecoder::new();
        let mut events = dec.feed(input);
        if let Some(tail) = dec.finish() {
            events.push(tail);
        }
        events
    }

    fn feed_byte_at_a_time(input: &[u8]) -> Vec<SseEvent> {
        let mut dec = SseDecoder::new();
        let mut events = Vec::new();
        for &b in input {
            events.extend(dec.feed(&[b]));
        }
        if let Some(tail) = dec.finish() {
            events.push(tail);
        }
        events
    }

    #[test]
    fn basic_event_dispatch() {
        let input = b"event: message\ndata: hello\n\n";
        let events = feed_whole(input);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("message"));
        assert_eq!(events[0].data, "hello");
    }

    #[test]
    fn multi_data_lines_join_with_newline() {
        let input = b"data: line1\ndata: line2\n\n";
        let events = feed_whole(input);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "line1\nline2");
    }

    #[test]
    fn comment_lines_are_ignored() {
        let input = b": this is a comment\ndata: hi\n\n";
        let events = feed_whole(input);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "hi");
    }

    #[test]
    fn crlf_and_lone_cr_tolerated() {
        let crlf = feed_whole(b"data: hi\r\n\r\n");
        assert_eq!(crlf.len(), 1);
        assert_eq!(crlf[0].data, "hi");

        let lone_cr = feed_whole(b"data: hi\r\r");
        assert_eq!(lone_cr.len(), 1);
        assert_eq!(lone_cr[0].data, "hi");
    }

    #[test]
    fn crlf_multi_field_frame_is_a_single_event() {
        let events = feed_whole(b"event: x\r\ndata: y\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("x"));
        assert_eq!(events[0].data, "y");

        assert_eq!(events, feed_byte_at_a_time(b"event: x\r\ndata: y\r\n\r\n"));
    }

    #[test]
    fn empty_line_with_no_data_is_discarded() {
        let input = b"\n\n\n";
        let events = feed_whole(input);
        assert!(events.is_empty());
    }

    #[test]
    fn end_of_stream_flushes_pending_event() {
        let input = b"data: trailing";
        let events = feed_whole(input);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "trailing");
    }

    #[test]
    fn byte_at_a_time_matches_whole_buffer() {
        let input = b"event: start\ndata: {\"a\":1}\n\ndata: [DONE]\n\n";
        assert_eq!(feed_whole(input), feed_byte_at_a_time(input));
    }

    #[test]
    fn field_colon_space_strips_exactly_one_space() {
        let input = b"data:  two spaces\n\n";
        let events = feed_whole(input);
        // only the single leading space after the colon is stripped
        assert_eq!(events[0].data, " two spaces");
    }

    #[test]
    fn malformed_utf8_line_discarded_stream_continues() {
        let mut dec = SseDecoder::new();
        let mut bytes = b"data: good\n".to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe]);
        bytes.extend_from_slice(b"\ndata: also-good\n\n");
        let events = dec.feed(&bytes);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "good\nalso-good");
    }
}
