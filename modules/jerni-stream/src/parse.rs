//! Server-Sent-Events frame parser.
//!
//! Matches the paired server emitter byte for byte, which is NOT the
//! WHATWG algorithm:
//! - a message ends on two consecutive line terminators with nothing between
//! - `id`, `event`, `data` and `retry` reset after every message
//!
//! The parser keeps no state between calls. Everything after the last
//! finished message comes back as `leftover`; prepend it to the next chunk.

/// Event name used when a message carries no `event:` line.
pub const DEFAULT_EVENT: &str = "message";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: Option<String>,
    pub event: String,
    pub data: String,
    pub retry: Option<u64>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Parsed {
    pub messages: Vec<Message>,
    pub leftover: String,
}

#[derive(Default)]
struct Draft {
    id: Option<String>,
    event: Option<String>,
    data: Option<String>,
    retry: Option<u64>,
}

impl Draft {
    fn apply_line(&mut self, line: &str) {
        let (field, value) = match line.find(':') {
            Some(0) => return,
            Some(idx) => {
                let value = &line[idx + 1..];
                (&line[..idx], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };

        match field {
            "data" => match &mut self.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            },
            "id" => self.id = Some(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            "retry" => {
                if let Ok(ms) = value.trim().parse::<f64>() {
                    if ms.is_finite() && ms >= 0.0 {
                        self.retry = Some(ms.round() as u64);
                    }
                }
            }
            _ => {}
        }
    }

    /// Emit if `data` was set, then reset every field.
    fn finish(&mut self) -> Option<Message> {
        let draft = std::mem::take(self);
        let data = draft.data?;
        Some(Message {
            id: draft.id,
            event: draft.event.unwrap_or_else(|| DEFAULT_EVENT.to_string()),
            data,
            retry: draft.retry,
        })
    }
}

/// Split accumulated stream text into finished messages and unconsumed text.
pub fn parse(input: &str) -> Parsed {
    let bytes = input.as_bytes();
    let mut messages = Vec::new();
    let mut draft = Draft::default();

    let mut line_start = 0;
    let mut consumed = 0;
    let mut after_terminator = false;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if b != b'\r' && b != b'\n' {
            i += 1;
            continue;
        }

        let line = &input[line_start..i];
        if b == b'\r' && bytes.get(i + 1) == Some(&b'\n') {
            i += 1;
        }
        i += 1;

        if !line.is_empty() {
            draft.apply_line(line);
            after_terminator = true;
        } else if after_terminator {
            if let Some(message) = draft.finish() {
                messages.push(message);
            }
            consumed = i;
            after_terminator = false;
        } else {
            after_terminator = true;
        }
        line_start = i;
    }

    Parsed {
        messages,
        leftover: input[consumed..].to_string(),
    }
}
