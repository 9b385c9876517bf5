//! STOMP 1.2 frame codec.
//!
//! The update broker speaks STOMP over WebSocket text messages. A frame is
//!
//! ```text
//! COMMAND\n
//! header:value\n
//! ...\n
//! \n
//! body\0
//! ```
//!
//! Bare end-of-line sequences between frames are heartbeats and are
//! skipped by the decoder. Header values are escaped (`\\`, `\n`, `\r`,
//! `\c`) on every frame except `CONNECT` / `CONNECTED`.

use std::fmt;
use std::time::Duration;

use crate::error::Error;

// ── Command ──────────────────────────────────────────────────────────

/// STOMP frame command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    // Client frames
    Connect,
    Stomp,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Disconnect,
    // Server frames
    Connected,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Ack => "ACK",
            Self::Nack => "NACK",
            Self::Disconnect => "DISCONNECT",
            Self::Connected => "CONNECTED",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "ACK" => Self::Ack,
            "NACK" => Self::Nack,
            "DISCONNECT" => Self::Disconnect,
            "CONNECTED" => Self::Connected,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            _ => return None,
        })
    }

    /// CONNECT and CONNECTED frames carry raw header values.
    fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Frame ────────────────────────────────────────────────────────────

/// A single STOMP frame. Header order is preserved; on repeated headers
/// the first occurrence wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Builder-style header append.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Look up a header value.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Serialize to wire text, NUL terminator included.
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (k, v) in &self.headers {
            if escape {
                out.push_str(&escape_header(k));
                out.push(':');
                out.push_str(&escape_header(v));
            } else {
                out.push_str(k);
                out.push(':');
                out.push_str(v);
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Decode every frame in a WebSocket text message.
    ///
    /// Heartbeat EOLs are skipped; a message holding only heartbeats
    /// yields an empty vec.
    pub fn decode_all(text: &str) -> Result<Vec<Self>, Error> {
        let mut frames = Vec::new();
        let mut rest = skip_heartbeats(text);
        while !rest.is_empty() {
            let (frame, remaining) = decode_one(rest)?;
            frames.push(frame);
            rest = skip_heartbeats(remaining);
        }
        Ok(frames)
    }
}

// ── Decoding ─────────────────────────────────────────────────────────

fn skip_heartbeats(input: &str) -> &str {
    input.trim_start_matches(['\n', '\r'])
}

/// Split off one line, dropping the `\n` and an optional trailing `\r`.
fn take_line(input: &str) -> Option<(&str, &str)> {
    let idx = input.find('\n')?;
    let line = &input[..idx];
    Some((line.strip_suffix('\r').unwrap_or(line), &input[idx + 1..]))
}

fn decode_one(input: &str) -> Result<(Frame, &str), Error> {
    let (command_line, mut rest) =
        take_line(input).ok_or_else(|| Error::Protocol("truncated frame".into()))?;
    let command = Command::parse(command_line)
        .ok_or_else(|| Error::Protocol(format!("unknown command {command_line:?}")))?;

    let escape = command.escapes_headers();
    let mut headers = Vec::new();
    loop {
        let (line, remaining) =
            take_line(rest).ok_or_else(|| Error::Protocol("truncated header block".into()))?;
        rest = remaining;
        if line.is_empty() {
            break;
        }
        let (k, v) = line
            .split_once(':')
            .ok_or_else(|| Error::Protocol(format!("malformed header {line:?}")))?;
        if escape {
            headers.push((unescape_header(k)?, unescape_header(v)?));
        } else {
            headers.push((k.to_owned(), v.to_owned()));
        }
    }

    let mut frame = Frame {
        command,
        headers,
        body: String::new(),
    };

    let content_length = frame
        .get("content-length")
        .map(|v| {
            v.trim()
                .parse::<usize>()
                .map_err(|_| Error::Protocol(format!("invalid content-length {v:?}")))
        })
        .transpose()?;

    let remaining = if let Some(len) = content_length {
        if rest.len() <= len || !rest.is_char_boundary(len) {
            return Err(Error::Protocol("body shorter than content-length".into()));
        }
        let (body, tail) = rest.split_at(len);
        let tail = tail
            .strip_prefix('\0')
            .ok_or_else(|| Error::Protocol("missing NUL after body".into()))?;
        frame.body = body.to_owned();
        tail
    } else {
        let idx = rest
            .find('\0')
            .ok_or_else(|| Error::Protocol("unterminated frame".into()))?;
        frame.body = rest[..idx].to_owned();
        &rest[idx + 1..]
    };

    Ok((frame, remaining))
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(raw: &str) -> Result<String, Error> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(Error::Protocol(format!(
                    "undefined header escape \\{}",
                    other.map(String::from).unwrap_or_default()
                )));
            }
        }
    }
    Ok(out)
}

// ── Heartbeats ───────────────────────────────────────────────────────

/// Negotiate the client's outgoing heartbeat interval.
///
/// `client_send_ms` is what we offered in `CONNECT`; `server_header` is the
/// `heart-beat` header of `CONNECTED` (`"sx,sy"`). Returns `None` when
/// either side opted out.
pub fn negotiate_heartbeat(client_send_ms: u64, server_header: Option<&str>) -> Option<Duration> {
    let server_wants = server_header
        .and_then(|h| h.split_once(','))
        .and_then(|(_, sy)| sy.trim().parse::<u64>().ok())
        .unwrap_or(0);

    if client_send_ms == 0 || server_wants == 0 {
        None
    } else {
        Some(Duration::from_millis(client_send_ms.max(server_wants)))
    }
}

// ── Tests ────────────────────────────────────────────────────────────
