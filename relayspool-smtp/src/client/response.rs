//! SMTP reply parsing.

use super::error::{ClientError, Result};

/// A complete, possibly multi-line, SMTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    /// Text of every line, without the code and separator
    pub lines: Vec<String>,
}

impl Response {
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// All lines joined with a single space, for error reporting
    #[must_use]
    pub fn message(&self) -> String {
        self.lines.join(" ")
    }

    /// 2xx
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    /// 3xx, e.g. `354` after DATA or `334` during AUTH
    #[must_use]
    pub const fn is_intermediate(&self) -> bool {
        self.code >= 300 && self.code < 400
    }

    /// Whether an EHLO reply advertises `keyword` (case-insensitive).
    ///
    /// The first line is the server's greeting, not an extension.
    #[must_use]
    pub fn advertises(&self, keyword: &str) -> bool {
        self.lines.iter().skip(1).any(|line| {
            line.split_ascii_whitespace()
                .next()
                .is_some_and(|word| word.eq_ignore_ascii_case(keyword))
        })
    }

    /// Whether an EHLO reply lists `mechanism` in its AUTH extension
    #[must_use]
    pub fn supports_auth(&self, mechanism: &str) -> bool {
        self.lines.iter().skip(1).any(|line| {
            let mut words = line.split_ascii_whitespace();
            words
                .next()
                .is_some_and(|word| word.eq_ignore_ascii_case("AUTH"))
                && words.any(|word| word.eq_ignore_ascii_case(mechanism))
        })
    }

    /// Parse one reply from the front of `buffer`.
    ///
    /// Returns the reply and the number of bytes it occupied, or `None` when
    /// the buffer does not yet hold a complete reply.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Parse`] if a line is not a valid reply line, or
    /// if the lines of a multi-line reply disagree on the code.
    pub fn parse(buffer: &[u8]) -> Result<Option<(Self, usize)>> {
        let mut consumed = 0;
        let mut code = None;
        let mut lines = Vec::new();

        while let Some(end) = buffer[consumed..].iter().position(|&b| b == b'\n') {
            let raw = &buffer[consumed..consumed + end];
            consumed += end + 1;

            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            let line = String::from_utf8_lossy(raw);
            if line.is_empty() {
                continue;
            }

            let (line_code, last, text) = parse_line(&line)?;
            match code {
                None => code = Some(line_code),
                Some(expected) if expected != line_code => {
                    return Err(ClientError::Parse(format!(
                        "Status code mismatch in multi-line reply: expected {expected}, got {line_code}"
                    )));
                }
                Some(_) => {}
            }
            lines.push(text.to_string());

            if last {
                return Ok(code.map(|code| (Self::new(code, lines), consumed)));
            }
        }

        Ok(None)
    }
}

/// Split a reply line into its code, whether it is the final line, and text
fn parse_line(line: &str) -> Result<(u16, bool, &str)> {
    let code = line
        .get(..3)
        .and_then(|digits| digits.parse::<u16>().ok())
        .ok_or_else(|| ClientError::Parse(format!("Invalid reply line: '{line}'")))?;

    match line.as_bytes().get(3) {
        None => Ok((code, true, "")),
        Some(b' ') => Ok((code, true, &line[4..])),
        Some(b'-') => Ok((code, false, &line[4..])),
        Some(other) => Err(ClientError::Parse(format!(
            "Invalid separator character: '{}'",
            char::from(*other)
        ))),
    }
}
