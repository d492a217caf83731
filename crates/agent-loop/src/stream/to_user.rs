//! Incremental extraction of the `to_user` string from streaming tool arguments.
//!
//! The arguments of a tool call arrive as fragments of a JSON object. The value
//! of its `"to_user"` key is meant for the human and is surfaced while the rest
//! of the object is still being generated. [`ToUserScanner`] is fed the whole
//! accumulated argument text after every fragment and reports only what is new.
//!
//! Content is passed through raw: escape sequences such as `\"` or `\n` are
//! emitted exactly as they appear in the JSON text.

use agent_core::tools::TO_USER_FIELD;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    /// New characters of the value.
    Text(String),
    /// The closing quote of the value was seen.
    SegmentEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    /// Looking for the quoted key starting at byte `search_from`.
    Searching { search_from: usize },
    /// Inside the string value.
    InValue {
        emitted_to: usize,
        scan_from: usize,
        escaped: bool,
    },
    /// The value has been fully emitted.
    Closed,
    /// The key exists but its value is not a string.
    Absent,
}

#[derive(Debug, Clone)]
pub struct ToUserScanner {
    key: String,
    state: ScanState,
}

impl Default for ToUserScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl ToUserScanner {
    pub fn new() -> Self {
        Self {
            key: format!("\"{TO_USER_FIELD}\""),
            state: ScanState::Searching { search_from: 0 },
        }
    }

    /// True while the value's opening quote has been seen but not its closing one.
    pub fn is_mid_value(&self) -> bool {
        matches!(self.state, ScanState::InValue { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, ScanState::Closed)
    }

    /// Scan `buffer`, the full argument text accumulated so far.
    ///
    /// `buffer` must only ever grow between calls.
    pub fn feed(&mut self, buffer: &str) -> Vec<ScanEvent> {
        let mut events = Vec::new();

        if let ScanState::Searching { search_from } = self.state {
            self.state = self.search(buffer, search_from);
        }

        if let ScanState::InValue {
            emitted_to,
            scan_from,
            escaped,
        } = self.state
        {
            self.state = scan_value(buffer, emitted_to, scan_from, escaped, &mut events);
        }

        events
    }

    fn search(&self, buffer: &str, mut search_from: usize) -> ScanState {
        loop {
            let Some(offset) = buffer[search_from..].find(&self.key) else {
                // A key split across fragments may already have started.
                let keep = buffer.len().saturating_sub(self.key.len() - 1);
                return ScanState::Searching {
                    search_from: floor_char_boundary(buffer, keep.max(search_from)),
                };
            };

            let key_start = search_from + offset;
            let key_end = key_start + self.key.len();

            let Some(colon) = skip_whitespace(buffer, key_end) else {
                return ScanState::Searching {
                    search_from: key_start,
                };
            };
            if buffer.as_bytes()[colon] != b':' {
                // The text was a string value, not a key.
                search_from = key_end;
                continue;
            }

            let Some(value_start) = skip_whitespace(buffer, colon + 1) else {
                return ScanState::Searching {
                    search_from: key_start,
                };
            };
            if buffer.as_bytes()[value_start] != b'"' {
                log::debug!("{TO_USER_FIELD} value is not a string; nothing to display");
                return ScanState::Absent;
            }

            let content_start = value_start + 1;
            return ScanState::InValue {
                emitted_to: content_start,
                scan_from: content_start,
                escaped: false,
            };
        }
    }
}

fn scan_value(
    buffer: &str,
    emitted_to: usize,
    scan_from: usize,
    mut escaped: bool,
    events: &mut Vec<ScanEvent>,
) -> ScanState {
    let bytes = buffer.as_bytes();

    for (position, &byte) in bytes.iter().enumerate().skip(scan_from) {
        if escaped {
            escaped = false;
        } else if byte == b'\\' {
            escaped = true;
        } else if byte == b'"' {
            push_text(events, &buffer[emitted_to..position]);
            events.push(ScanEvent::SegmentEnd);
            return ScanState::Closed;
        }
    }

    push_text(events, &buffer[emitted_to..]);
    ScanState::InValue {
        emitted_to: buffer.len(),
        scan_from: buffer.len(),
        escaped,
    }
}

fn push_text(events: &mut Vec<ScanEvent>, text: &str) {
    if !text.is_empty() {
        events.push(ScanEvent::Text(text.to_string()));
    }
}

/// Index of the first non-whitespace byte at or after `from`, if any.
fn skip_whitespace(buffer: &str, from: usize) -> Option<usize> {
    buffer.as_bytes()[from..]
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map(|offset| from + offset)
}

fn floor_char_boundary(buffer: &str, mut index: usize) -> usize {
    while !buffer.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feed `fragments` one at a time, returning the concatenated text and segment ends.
    fn run(fragments: &[&str]) -> (String, usize, ToUserScanner) {
        let mut scanner = ToUserScanner::new();
        let mut buffer = String::new();
        let mut text = String::new();
        let mut ends = 0;
        for fragment in fragments {
            buffer.push_str(fragment);
            for event in scanner.feed(&buffer) {
                match event {
                    ScanEvent::Text(chunk) => text.push_str(&chunk),
                    ScanEvent::SegmentEnd => ends += 1,
                }
            }
        }
        (text, ends, scanner)
    }

    #[test]
    fn value_in_single_fragment() {
        let (text, ends, scanner) = run(&[r#"{"to_user":"Searching...","query":"weather"}"#]);
        assert_eq!(text, "Searching...");
        assert_eq!(ends, 1);
        assert!(scanner.is_closed());
    }

    #[test]
    fn key_split_across_fragments() {
        let (text, ends, _) = run(&[r#"{"to_"#, r#"user"#, r#"" : "#, r#""Hel"#, r#"lo"}"#]);
        assert_eq!(text, "Hello");
        assert_eq!(ends, 1);
    }

    #[test]
    fn only_new_tail_is_emitted() {
        let mut scanner = ToUserScanner::new();
        let mut buffer = String::from(r#"{"to_user":"ab"#);
        assert_eq!(scanner.feed(&buffer), vec![ScanEvent::Text("ab".into())]);

        buffer.push_str("cd");
        assert_eq!(scanner.feed(&buffer), vec![ScanEvent::Text("cd".into())]);

        buffer.push_str(r#"","x":1}"#);
        assert_eq!(scanner.feed(&buffer), vec![ScanEvent::SegmentEnd]);
        assert!(scanner.feed(&buffer).is_empty());
    }

    #[test]
    fn escaped_quote_does_not_terminate() {
        let (text, ends, _) = run(&[r#"{"to_user":"say \"hi"#, r#"\" now"}"#]);
        assert_eq!(text, r#"say \"hi\" now"#);
        assert_eq!(ends, 1);
    }

    #[test]
    fn escape_split_across_fragments() {
        let (text, ends, scanner) = run(&[r#"{"to_user":"a\"#, r#"""#, r#"b"#]);
        assert_eq!(text, r#"a\"b"#);
        assert_eq!(ends, 0);
        assert!(scanner.is_mid_value());
    }

    #[test]
    fn escaped_backslash_before_closing_quote() {
        let (text, ends, _) = run(&[r#"{"to_user":"C:\\"#, r#"","path":"x"}"#]);
        assert_eq!(text, r#"C:\\"#);
        assert_eq!(ends, 1);
    }

    #[test]
    fn key_absent_produces_nothing() {
        let (text, ends, scanner) = run(&[r#"{"query":"#, r#""weather"}"#]);
        assert!(text.is_empty());
        assert_eq!(ends, 0);
        assert!(!scanner.is_mid_value());
    }

    #[test]
    fn to_user_as_value_is_not_a_key() {
        let (text, _, _) = run(&[r#"{"mode":"to_user","to_user":"real"}"#]);
        assert_eq!(text, "real");
    }

    #[test]
    fn non_string_value_is_ignored() {
        let (text, ends, scanner) = run(&[r#"{"to_user": null, "q": "x"}"#]);
        assert!(text.is_empty());
        assert_eq!(ends, 0);
        assert!(!scanner.is_mid_value());
        assert!(!scanner.is_closed());
    }

    #[test]
    fn later_fields_are_not_rescanned() {
        let (text, ends, _) = run(&[
            r#"{"to_user":"first","#,
            r#""note":"{\"to_user\":\"second\"}"}"#,
        ]);
        assert_eq!(text, "first");
        assert_eq!(ends, 1);
    }

    #[test]
    fn multibyte_content_is_preserved() {
        let (text, _, _) = run(&[r#"{"to_us"#, r#"er":"héllo "#, "wörld", r#"🌍"}"#]);
        assert_eq!(text, "héllo wörld🌍");
    }

    #[test]
    fn multibyte_prefix_before_key() {
        let (text, _, _) = run(&[r#"{"é":"ü","to_"#, r#"user":"ok"}"#]);
        assert_eq!(text, "ok");
    }
}
