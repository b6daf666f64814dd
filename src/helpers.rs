use regex::Regex;
use std::io::{self, BufRead};
use std::sync::LazyLock;

/// Substring that marks the first line of a new log record (`LOG:  ...`).
pub(crate) const ENTRY_MARKER: &str = ":  ";

static ENTRY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)duration: (\d+\.\d+) ms  statement: ([\s\S]*)\z").unwrap()
});
static COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/\*.+").unwrap());
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static PLACEHOLDER_LIST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\?(, \?)+").unwrap());

/// Helper function to detect the first line of a log record
pub(crate) fn is_entry_start(line: &str) -> bool {
    line.contains(ENTRY_MARKER)
}

/// Helper function to pull the duration and statement out of a log entry.
///
/// The statement runs from `statement: ` to the end of the entry, newlines included.
pub(crate) fn match_entry(entry: &str) -> Option<(f64, &str)> {
    let caps = ENTRY_RE.captures(entry)?;
    let duration = caps[1].parse().ok()?;
    let statement = caps.get(2).map_or("", |m| m.as_str());
    Some((duration, statement))
}

/// Removes a `/*` comment and the rest of the line it starts on.
pub(crate) fn strip_comments(statement: &str) -> String {
    COMMENT_RE.replace_all(statement, "").into_owned()
}

/// Trims both ends and collapses every whitespace run to a single space.
pub(crate) fn squish(text: &str) -> String {
    WHITESPACE_RE.replace_all(text.trim(), " ").into_owned()
}

/// Collapses `?, ?, ?` lists left behind by the normaliser into a single `?`.
pub(crate) fn collapse_placeholders(query: &str) -> String {
    PLACEHOLDER_LIST_RE.replace_all(query, "?").into_owned()
}

/// Lines of a reader with invalid UTF-8 replaced by U+FFFD.
///
/// Line terminators (`\n` or `\r\n`) are stripped, as with [`BufRead::lines`].
pub(crate) struct LossyLines<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: BufRead> LossyLines<R> {
    pub(crate) fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
        }
    }
}

impl<R: BufRead> Iterator for LossyLines<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => None,
            Ok(_) => {
                if self.buf.ends_with(b"\n") {
                    self.buf.pop();
                    if self.buf.ends_with(b"\r") {
                        self.buf.pop();
                    }
                }
                Some(Ok(String::from_utf8_lossy(&self.buf).into_owned()))
            }
            Err(err) => Some(Err(err)),
        }
    }
}
