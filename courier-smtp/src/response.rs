//! SMTP reply parsing.
//!
//! A reply is one or more lines of the form `NNN-text` (continuation) or
//! `NNN text` (final line), all carrying the same status code. The parser
//! consumes complete lines from the front of a byte buffer and reports how
//! many bytes it used, so the caller can keep partial data for the next read.

use crate::error::{ClientError, Result};

/// A complete SMTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// The three-digit status code shared by every line.
    pub code: u16,
    /// The text of each line, in order, without code or separator.
    pub lines: Vec<String>,
}

impl Response {
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// All line texts joined with newlines.
    #[must_use]
    pub fn message(&self) -> String {
        self.lines.join("\n")
    }

    /// 2xx: the command succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code / 100 == 2
    }

    /// 3xx: the server expects more input (354 after DATA, 334 during AUTH).
    #[must_use]
    pub const fn is_intermediate(&self) -> bool {
        self.code / 100 == 3
    }

    /// 4xx: transient failure.
    #[must_use]
    pub const fn is_temporary_error(&self) -> bool {
        self.code / 100 == 4
    }

    /// 5xx: permanent failure.
    #[must_use]
    pub const fn is_permanent_error(&self) -> bool {
        self.code / 100 == 5
    }

    /// Whether an EHLO reply advertises the given extension keyword.
    #[must_use]
    pub fn advertises(&self, extension: &str) -> bool {
        let wanted = extension.to_uppercase();
        self.lines.iter().any(|line| line.to_uppercase().contains(&wanted))
    }

    /// Try to take one complete reply off the front of `buffer`.
    ///
    /// Returns the reply and the number of bytes consumed, or `None` when
    /// the buffer ends mid-reply. Blank lines between replies are skipped.
    pub fn parse(buffer: &[u8]) -> Result<Option<(Self, usize)>> {
        let text = std::str::from_utf8(buffer)?;

        let mut consumed = 0;
        let mut code: Option<u16> = None;
        let mut lines = Vec::new();
        let mut rest = text;

        loop {
            // Only complete (newline-terminated) lines are eaten.
            let Some(newline) = rest.find('\n') else {
                return Ok(None);
            };
            let raw = &rest[..newline];
            consumed += newline + 1;
            rest = &rest[newline + 1..];

            let line = raw.strip_suffix('\r').unwrap_or(raw);
            if line.is_empty() {
                continue;
            }

            let (line_code, is_final, message) = split_reply_line(line)?;

            match code {
                None => code = Some(line_code),
                Some(expected) if expected != line_code => {
                    return Err(ClientError::Parse(format!(
                        "status code changed mid-reply: {expected} then {line_code}"
                    )));
                }
                Some(_) => {}
            }
            lines.push(message.to_string());

            if is_final {
                return Ok(Some((Self::new(line_code, lines), consumed)));
            }
        }
    }
}

/// Decompose one reply line into `(code, is_final, text)`.
fn split_reply_line(line: &str) -> Result<(u16, bool, &str)> {
    let bytes = line.as_bytes();
    if bytes.len() < 3 || !bytes[..3].iter().all(u8::is_ascii_digit) {
        return Err(ClientError::Parse(format!(
            "reply line does not start with a status code: '{line}'"
        )));
    }
    // Three ASCII digits always parse.
    let code: u16 = line[..3].parse().map_err(|_| {
        ClientError::Parse(format!("invalid status code in '{line}'"))
    })?;

    match bytes.get(3) {
        None => Ok((code, true, "")),
        Some(b' ') => Ok((code, true, &line[4..])),
        Some(b'-') => Ok((code, false, &line[4..])),
        Some(other) => Err(ClientError::Parse(format!(
            "invalid separator {:?} after status code in '{line}'",
            char::from(*other)
        ))),
    }
}
