//! Wire codec for the GMPI rendezvous protocol
//!
//! Three fixed text grammars travel over the wire, one message per connection:
//!
//! ```text
//! init   (worker -> master)  <<<M:R:P:H:L:NU:PID::PORT>>>
//! map    (master -> worker)  [[[<P:H:L:NU>...|||<rank>...]]]
//! abort  (worker -> master)  <<<ABORT_M_ABORT>>>
//! ```
//!
//! The init message has a double colon before its last field. Existing workers
//! send it that way, so it is kept exactly as is.

use std::fmt::Write;

use thiserror::Error;

/// Default upper bound on an inbound payload (64KB)
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 65536;

const INIT_OPEN: &str = "<<<";
const INIT_CLOSE: &str = ">>>";
const ABORT_OPEN: &str = "<<<ABORT_";
const ABORT_CLOSE: &str = "_ABORT>>>";
const MAP_OPEN: &str = "[[[";
const MAP_SPLIT: &str = "|||";
const MAP_CLOSE: &str = "]]]";

/// Number of integer fields in an init message
const INIT_FIELDS: usize = 8;

/// Errors produced when a payload does not match its grammar
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Message too large: {len} bytes (max {max})")]
    TooLong { len: usize, max: usize },

    #[error("Message is not ASCII text")]
    NotText,

    #[error("Missing delimiter '{0}'")]
    MissingDelimiter(&'static str),

    #[error("Missing '::' separator before the last field")]
    MissingSeparator,

    #[error("Expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("Field {index} is not an unsigned 32-bit integer")]
    InvalidField { index: usize },

    #[error("Unexpected data after message terminator")]
    TrailingData,
}

/// A worker's init announcement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitMessage {
    pub magic: u32,
    pub rank: u32,
    pub port_board_id: u32,
    pub unique_high_id: u32,
    pub unique_low_id: u32,
    pub numa_node: u32,
    pub remote_pid: u32,
    pub remote_port: u32,
}

/// One rank's interconnect identity as it appears in the global map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MapEntry {
    pub port_board_id: u32,
    pub unique_high_id: u32,
    pub unique_low_id: u32,
    pub numa_node: u32,
}

/// A decoded map message, as a worker sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapMessage {
    pub global: Vec<MapEntry>,
    pub local: Vec<u32>,
}

/// Strip trailing NUL bytes and ASCII whitespace a C sender may append
fn trim_tail(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|b| *b != 0 && !b.is_ascii_whitespace())
        .map_or(0, |i| i + 1);
    &bytes[..end]
}

fn as_text(bytes: &[u8], max: usize) -> Result<&str, ParseError> {
    if bytes.len() > max {
        return Err(ParseError::TooLong { len: bytes.len(), max });
    }
    let bytes = trim_tail(bytes);
    if !bytes.is_ascii() {
        return Err(ParseError::NotText);
    }
    std::str::from_utf8(bytes).map_err(|_| ParseError::NotText)
}

/// Parse one decimal field; digits only, no sign, must fit in u32
fn parse_field(token: &str, index: usize) -> Result<u32, ParseError> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::InvalidField { index });
    }
    token.parse().map_err(|_| ParseError::InvalidField { index })
}

/// Slice out the text between `open` and `close`
///
/// The terminator must be the last thing in the (tail-trimmed) payload.
fn unwrap_frame<'a>(text: &'a str, open: &'static str, close: &'static str) -> Result<&'a str, ParseError> {
    let rest = text.strip_prefix(open).ok_or(ParseError::MissingDelimiter(open))?;
    let end = rest.find(close).ok_or(ParseError::MissingDelimiter(close))?;
    if end + close.len() != rest.len() {
        return Err(ParseError::TrailingData);
    }
    Ok(&rest[..end])
}

/// Parse an init message with the default size limit
pub fn parse_init(bytes: &[u8]) -> Result<InitMessage, ParseError> {
    parse_init_with_limit(bytes, DEFAULT_MAX_MESSAGE_LEN)
}

/// Parse `<<<M:R:P:H:L:NU:PID::PORT>>>`
pub fn parse_init_with_limit(bytes: &[u8], max: usize) -> Result<InitMessage, ParseError> {
    let text = as_text(bytes, max)?;
    let body = unwrap_frame(text, INIT_OPEN, INIT_CLOSE)?;

    let (head, last) = body.rsplit_once("::").ok_or_else(|| {
        let found = body.split(':').count();
        if found == INIT_FIELDS {
            ParseError::MissingSeparator
        } else {
            ParseError::FieldCount {
                expected: INIT_FIELDS,
                found,
            }
        }
    })?;

    let head: Vec<&str> = head.split(':').collect();
    if head.len() != INIT_FIELDS - 1 {
        return Err(ParseError::FieldCount {
            expected: INIT_FIELDS,
            found: head.len() + 1,
        });
    }

    let mut fields = [0u32; INIT_FIELDS];
    for (index, token) in head.iter().chain(std::iter::once(&last)).enumerate() {
        fields[index] = parse_field(token, index)?;
    }

    let [
        magic,
        rank,
        port_board_id,
        unique_high_id,
        unique_low_id,
        numa_node,
        remote_pid,
        remote_port,
    ] = fields;

    Ok(InitMessage {
        magic,
        rank,
        port_board_id,
        unique_high_id,
        unique_low_id,
        numa_node,
        remote_pid,
        remote_port,
    })
}

/// Parse an abort message with the default size limit
pub fn parse_abort(bytes: &[u8]) -> Result<u32, ParseError> {
    parse_abort_with_limit(bytes, DEFAULT_MAX_MESSAGE_LEN)
}

/// Parse `<<<ABORT_M_ABORT>>>` and return the magic
pub fn parse_abort_with_limit(bytes: &[u8], max: usize) -> Result<u32, ParseError> {
    let text = as_text(bytes, max)?;
    let body = unwrap_frame(text, ABORT_OPEN, ABORT_CLOSE)?;
    parse_field(body, 0)
}

/// Render an init message the way a worker sends it
pub fn format_init(msg: &InitMessage) -> String {
    format!(
        "<<<{}:{}:{}:{}:{}:{}:{}::{}>>>",
        msg.magic,
        msg.rank,
        msg.port_board_id,
        msg.unique_high_id,
        msg.unique_low_id,
        msg.numa_node,
        msg.remote_pid,
        msg.remote_port
    )
}

/// Render an abort message for `magic`
pub fn format_abort(magic: u32) -> String {
    format!("{ABORT_OPEN}{magic}{ABORT_CLOSE}")
}

/// `[[[` + `<P:H:L:NU>` per rank + `|||`
pub fn format_global_map(entries: &[MapEntry]) -> String {
    let mut out = String::from(MAP_OPEN);
    for e in entries {
        // Writing into a String cannot fail
        let _ = write!(
            out,
            "<{}:{}:{}:{}>",
            e.port_board_id, e.unique_high_id, e.unique_low_id, e.numa_node
        );
    }
    out.push_str(MAP_SPLIT);
    out
}

/// `<rank>` per rank, no separators
pub fn format_local_map(ranks: &[u32]) -> String {
    let mut out = String::new();
    for rank in ranks {
        let _ = write!(out, "<{rank}>");
    }
    out
}

/// Full message for one worker: global prefix, local suffix, terminator
pub fn compose_map_message(global: &str, local: &str) -> String {
    let mut out = String::with_capacity(global.len() + local.len() + MAP_CLOSE.len());
    out.push_str(global);
    out.push_str(local);
    out.push_str(MAP_CLOSE);
    out
}

/// Split `<a><b>...` into the inner texts
fn angle_items(mut text: &str) -> Result<Vec<&str>, ParseError> {
    let mut items = Vec::new();
    while !text.is_empty() {
        let rest = text.strip_prefix('<').ok_or(ParseError::MissingDelimiter("<"))?;
        let end = rest.find('>').ok_or(ParseError::MissingDelimiter(">"))?;
        items.push(&rest[..end]);
        text = &rest[end + 1..];
    }
    Ok(items)
}

impl MapMessage {
    /// Decode a map message received from the master
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        Self::parse_with_limit(bytes, usize::MAX)
    }

    pub fn parse_with_limit(bytes: &[u8], max: usize) -> Result<Self, ParseError> {
        let text = as_text(bytes, max)?;
        let body = unwrap_frame(text, MAP_OPEN, MAP_CLOSE)?;
        let (global_text, local_text) = body.split_once(MAP_SPLIT).ok_or(ParseError::MissingDelimiter(MAP_SPLIT))?;

        let mut global = Vec::new();
        for item in angle_items(global_text)? {
            let parts: Vec<&str> = item.split(':').collect();
            if parts.len() != 4 {
                return Err(ParseError::FieldCount {
                    expected: 4,
                    found: parts.len(),
                });
            }
            global.push(MapEntry {
                port_board_id: parse_field(parts[0], 0)?,
                unique_high_id: parse_field(parts[1], 1)?,
                unique_low_id: parse_field(parts[2], 2)?,
                numa_node: parse_field(parts[3], 3)?,
            });
        }

        let local = angle_items(local_text)?
            .into_iter()
            .map(|item| parse_field(item, 0))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { global, local })
    }
}
