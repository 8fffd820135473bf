//! Server-sent event decoder.
//!
//! Tolerant of the framing variance real upstreams and proxies introduce:
//! CRLF or bare LF line endings, comment lines (a line starting with `:`),
//! multiple `data:` lines joined with newlines, at most one stripped leading
//! space after the colon, and chunks that split a line or an event across
//! reads.

use crate::message::SseEvent;

#[derive(Default)]
pub struct SseDecoder {
    buffer: String,
    event_name: Option<String>,
    data_lines: Vec<String>,
    id: Option<String>,
    retry: Option<u64>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of text (callers decode bytes with `from_utf8_lossy`
    /// before calling this, matching how the upstream client reads the
    /// stream). Returns zero or more complete events extracted so far;
    /// anything not terminated by a line ending stays buffered for the next
    /// call.
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        let mut out = Vec::new();

        while let Some((line, consumed)) = next_line(&self.buffer) {
            self.buffer.drain(..consumed);
            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    out.push(event);
                }
            } else {
                self.process_field(&line);
            }
        }

        out
    }

    fn process_field(&mut self, line: &str) {
        if line.starts_with(':') {
            return; // comment line, ignored
        }

        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };

        match field {
            "event" => self.event_name = Some(value.to_string()),
            "data" => self.data_lines.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            "retry" => self.retry = value.parse().ok(),
            _ => {}
        }
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.event_name.is_none() && self.data_lines.is_empty() && self.id.is_none() {
            return None;
        }

        let event = SseEvent {
            name: self.event_name.take(),
            data: self.data_lines.join("\n"),
            id: self.id.take(),
            retry: self.retry.take(),
        };
        self.data_lines.clear();
        Some(event)
    }
}

/// Find the next complete line (tolerating `\n` and `\r\n`), returning the
/// line content and how many bytes to drain from the buffer including the
/// line ending.
fn next_line(buffer: &str) -> Option<(String, usize)> {
    let nl = buffer.find('\n')?;
    let (line, consumed) = if nl > 0 && buffer.as_bytes()[nl - 1] == b'\r' {
        (&buffer[..nl - 1], nl + 1)
    } else {
        (&buffer[..nl], nl + 1)
    };
    Some((line.to_string(), consumed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_event() {
        let mut d = SseDecoder::new();
        let events = d.feed("event: message_start\ndata: {\"a\":1}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name.as_deref(), Some("message_start"));
        assert_eq!(events[0].data, "{\"a\":1}");
    }

    #[test]
    fn tolerates_crlf() {
        let mut d = SseDecoder::new();
        let events = d.feed("event: ping\r\ndata: {}\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name.as_deref(), Some("ping"));
    }

    #[test]
    fn joins_multiple_data_lines() {
        let mut d = SseDecoder::new();
        let events = d.feed("data: line one\ndata: line two\n\n");
        assert_eq!(events[0].data, "line one\nline two");
    }

    #[test]
    fn skips_comment_lines() {
        let mut d = SseDecoder::new();
        let events = d.feed(": keep-alive\ndata: hi\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "hi");
    }

    #[test]
    fn strips_at_most_one_leading_space() {
        let mut d = SseDecoder::new();
        let events = d.feed("data:  two spaces\n\n");
        assert_eq!(events[0].data, " two spaces");
    }

    #[test]
    fn tolerates_split_buffers_across_reads() {
        let mut d = SseDecoder::new();
        assert!(d.feed("event: tex").is_empty());
        assert!(d.feed("t_delta\ndat").is_empty());
        let events = d.feed("a: hello\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name.as_deref(), Some("text_delta"));
        assert_eq!(events[0].data, "hello");
    }

    #[test]
    fn event_can_split_mid_event_across_chunks() {
        let mut d = SseDecoder::new();
        let mut all = d.feed("data: first\n\ndata: sec");
        all.extend(d.feed("ond\n\n"));
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].data, "first");
        assert_eq!(all[1].data, "second");
    }

    #[test]
    fn blank_input_produces_no_events() {
        let mut d = SseDecoder::new();
        assert!(d.feed("\n\n").is_empty());
    }
}
