//! Wire protocol
//!
//! Plain text, newline-delimited. The first line of a connection is the
//! auth line `a <user> <room>`; every later line is one application
//! message. Server to client writes are raw bytes and are not framed here.

use crate::error::AuthError;

/// Leading token of the auth line
pub const AUTH_TAG: &str = "a";

/// Parse an auth line into `(user, room)`
///
/// Exactly three single-space separated tokens, the first being `a`.
/// Surrounding whitespace is ignored.
pub fn parse_auth(line: &str) -> Result<(String, String), AuthError> {
    let line = line.trim();
    let tokens: Vec<&str> = line.split(' ').collect();

    match tokens.as_slice() {
        [tag, user, room] if *tag == AUTH_TAG && !user.is_empty() && !room.is_empty() => {
            Ok((user.to_string(), room.to_string()))
        }
        _ => Err(AuthError::Malformed(line.to_string())),
    }
}

/// Split one read chunk into discrete messages
///
/// The chunk is trimmed, then cut on `\n`; each piece is trimmed again.
/// Blank lines between messages are kept as empty messages, an all-blank
/// chunk yields nothing. A chunk without any newline is a single message.
pub fn split_messages(chunk: &str) -> impl Iterator<Item = &str> {
    let chunk = chunk.trim();
    (!chunk.is_empty())
        .then(|| chunk.split('\n').map(str::trim))
        .into_iter()
        .flatten()
}

/// Separate the first line of a chunk from whatever followed it
///
/// Leading blank lines are skipped. Returns `(first_line, rest)`; `rest`
/// is empty when the chunk holds a single line.
pub fn split_first_line(chunk: &str) -> (&str, &str) {
    let chunk = chunk.trim_start();
    match chunk.split_once('\n') {
        Some((first, rest)) => (first, rest),
        None => (chunk, ""),
    }
}

/// Decodes text read in fixed-size chunks
///
/// A multi-byte character cut by the end of a read is held back and
/// completed by the next one. Invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    carry: Vec<u8>,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.carry.extend_from_slice(bytes);
        let complete = complete_prefix_len(&self.carry);
        let tail = self.carry.split_off(complete);
        let text = String::from_utf8_lossy(&self.carry).into_owned();
        self.carry = tail;
        text
    }
}

/// Length of `bytes` minus a trailing incomplete UTF-8 sequence
fn complete_prefix_len(bytes: &[u8]) -> usize {
    let mut checked = 0;
    loop {
        match std::str::from_utf8(&bytes[checked..]) {
            Ok(_) => return bytes.len(),
            Err(e) => match e.error_len() {
                Some(invalid) => checked += e.valid_up_to() + invalid,
                None => return checked + e.valid_up_to(),
            },
        }
    }
}
