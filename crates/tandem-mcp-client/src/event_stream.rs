//! Incremental server-sent-event framing.
//!
//! [`SseParser`] works a line at a time; [`SseDecoder`] sits in front of it and
//! splits raw byte chunks into lines, so a line split across chunks is still
//! seen whole.

use thiserror::Error;

/// Event type used when a frame carries no `event:` field.
pub const DEFAULT_EVENT_TYPE: &str = "message";

/// Longest line [`SseDecoder`] accepts unless configured otherwise.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024 * 1024;

/// A line grew past the decoder's limit before its terminator arrived.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("SSE line exceeds {limit} bytes")]
pub struct LineTooLong {
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event_type: String,
    pub data: String,
}

impl SseEvent {
    pub fn new(event_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            data: data.into(),
        }
    }
}

#[derive(Debug, Default)]
pub struct SseParser {
    event_type: Option<String>,
    data: Vec<String>,
    seen_field: bool,
    last_event_id: Option<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line without its terminator. Returns an event when the line
    /// is the blank line closing a frame that had at least one field.
    pub fn feed_line(&mut self, line: &str) -> Option<SseEvent> {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.is_empty() {
            return self.take_event();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        self.seen_field = true;
        match field {
            "event" => self.event_type = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.last_event_id = Some(value.to_string()),
            // retry and unknown fields
            _ => {}
        }
        None
    }

    /// Flush a frame left open at end of input.
    pub fn finish(&mut self) -> Option<SseEvent> {
        self.take_event()
    }

    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    fn take_event(&mut self) -> Option<SseEvent> {
        if !self.seen_field {
            return None;
        }
        self.seen_field = false;
        let event_type = self
            .event_type
            .take()
            .unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_string());
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent { event_type, data })
    }
}

/// Splits a byte stream into lines for an [`SseParser`].
#[derive(Debug)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    parser: SseParser,
    max_line_length: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_max_line_length(DEFAULT_MAX_LINE_LENGTH)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self {
            buffer: Vec::new(),
            parser: SseParser::new(),
            max_line_length,
        }
    }

    /// Decode `chunk`, returning every event it completes. Fails once a
    /// line, terminated or not, is longer than the limit; the buffered
    /// bytes are discarded and the stream should be abandoned.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>, LineTooLong> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|b| *b == b'\n') {
            if offset > self.max_line_length {
                return Err(self.overflow());
            }
            let end = start + offset;
            let line = String::from_utf8_lossy(&self.buffer[start..end]);
            if let Some(event) = self.parser.feed_line(&line) {
                events.push(event);
            }
            start = end + 1;
        }
        self.buffer.drain(..start);
        if self.buffer.len() > self.max_line_length {
            return Err(self.overflow());
        }
        Ok(events)
    }

    fn overflow(&mut self) -> LineTooLong {
        self.buffer.clear();
        LineTooLong {
            limit: self.max_line_length,
        }
    }

    /// End of input: the unterminated trailing line counts, then any open frame is flushed.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let rest = std::mem::take(&mut self.buffer);
        let trailing = if rest.is_empty() {
            None
        } else {
            self.parser.feed_line(&String::from_utf8_lossy(&rest))
        };
        trailing.or_else(|| self.parser.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(text: &str) -> Vec<SseEvent> {
        let mut parser = SseParser::new();
        let mut events: Vec<SseEvent> = text.lines().filter_map(|l| parser.feed_line(l)).collect();
        events.extend(parser.finish());
        events
    }

    #[test]
    fn test_endpoint_then_message() {
        let events = parse_all(
            "event: endpoint\ndata: http://h/message?sessionId=1\n\nevent: message\ndata: {\"a\":1}\n\n",
        );
        assert_eq!(
            events,
            vec![
                SseEvent::new("endpoint", "http://h/message?sessionId=1"),
                SseEvent::new("message", "{\"a\":1}"),
            ]
        );
    }

    #[test]
    fn test_multiline_data_and_last_event_wins() {
        let events = parse_all("event: first\nevent: second\ndata: a\ndata: b\n\n");
        assert_eq!(events, vec![SseEvent::new("second", "a\nb")]);
    }

    #[test]
    fn test_blank_lines_and_comments_do_not_emit() {
        let events = parse_all("\n\n: keepalive\n\n:another\n\n");
        assert!(events.is_empty());
    }

    #[test]
    fn test_unknown_fields_and_default_type() {
        let mut parser = SseParser::new();
        assert!(parser.feed_line("id: 7").is_none());
        assert!(parser.feed_line("retry: 1000").is_none());
        assert!(parser.feed_line("data:no-space").is_none());
        let event = parser.feed_line("").unwrap();
        assert_eq!(event, SseEvent::new(DEFAULT_EVENT_TYPE, "no-space"));
        assert_eq!(parser.last_event_id(), Some("7"));

        // a frame holding only an unknown field is still a frame
        assert!(parser.feed_line("x-custom: 1").is_none());
        assert_eq!(parser.feed_line(""), Some(SseEvent::new("message", "")));
    }

    #[test]
    fn test_unterminated_event_is_flushed() {
        let events = parse_all("event: message\ndata: tail");
        assert_eq!(events, vec![SseEvent::new("message", "tail")]);
    }

    #[test]
    fn test_decoder_handles_split_chunks_and_crlf() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: mess").unwrap().is_empty());
        assert!(decoder.feed(b"age\r\ndata: {\"id\"").unwrap().is_empty());
        let events = decoder.feed(b":1}\r\n\r\nda").unwrap();
        assert_eq!(events, vec![SseEvent::new("message", "{\"id\":1}")]);
        assert!(decoder.feed(b"ta: end").unwrap().is_empty());
        assert_eq!(decoder.finish(), Some(SseEvent::new("message", "end")));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_decoder_rejects_overlong_lines() {
        let mut decoder = SseDecoder::with_max_line_length(16);
        let events = decoder.feed(b"data: 0123456789\n\n").unwrap();
        assert_eq!(events, vec![SseEvent::new("message", "0123456789")]);

        // unterminated line that keeps growing
        assert!(decoder.feed(b"data: 01234").unwrap().is_empty());
        assert_eq!(
            decoder.feed(b"56789abcdef"),
            Err(LineTooLong { limit: 16 })
        );
        assert_eq!(decoder.finish(), None);

        // terminated line that arrives in one chunk
        let mut decoder = SseDecoder::with_max_line_length(16);
        let err = decoder.feed(b"data: 0123456789abcdef\n\n").unwrap_err();
        assert_eq!(err.to_string(), "SSE line exceeds 16 bytes");
    }
}
