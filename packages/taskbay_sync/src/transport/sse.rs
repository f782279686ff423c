//! Minimal SSE decoder for the fallback stream.
//!
//! Handles the subset the platform emits: `event:`/`data:` fields, comment
//! lines, CRLF tolerance, and blank-line dispatch. Multi-line `data:` is
//! joined with newlines per the SSE framing rules. `id:`/`retry:` fields
//! are ignored; the transport has its own retry policy.

/// A complete event as framed on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Value of the `event:` field, if any.
    pub name: Option<String>,
    /// Joined `data:` lines.
    pub data: String,
}

#[derive(Debug, Default)]
pub struct SseParser {
    buf: Vec<u8>,
    name: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a network chunk, get every event completed by it. Chunk
    /// boundaries carry no meaning; partial lines stay buffered.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(event) = self.feed_line(line) {
                events.push(event);
            }
        }
        events
    }

    fn feed_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            // Blank line terminates the event, if one accumulated.
            if self.name.is_none() && self.data.is_empty() {
                return None;
            }
            return Some(SseEvent {
                name: self.name.take(),
                data: std::mem::take(&mut self.data).join("\n"),
            });
        }
        if line.starts_with(':') {
            // Comment / keep-alive line.
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.name = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            // id, retry, anything nonstandard
            _ => {}
        }
        None
    }
}
