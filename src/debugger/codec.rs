//! Chunking of raw debugger output
//!
//! Bytes are decoded as Latin-1 with carriage returns dropped, then cut into
//! chunks the classifier can look at one at a time: complete lines, and the
//! bare prompt. ocamldebug does not end its prompt with a newline and the
//! next command's output follows it on the same line, so the prompt is split
//! off as soon as it appears at the start of a line.

use super::protocol::PROMPT;

/// Decode Latin-1 bytes, dropping `\r`
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes
        .iter()
        .filter(|&&b| b != b'\r')
        .map(|&b| char::from(b))
        .collect()
}

/// Incremental splitter of decoded output into classifier chunks
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: String,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every chunk completed by them
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.push_str(&decode_latin1(bytes));

        let mut chunks = Vec::new();
        loop {
            if self.pending.starts_with(PROMPT) {
                chunks.push(PROMPT.to_string());
                self.pending.drain(..PROMPT.len());
                continue;
            }
            match self.pending.find('\n') {
                Some(idx) => {
                    let rest = self.pending.split_off(idx + 1);
                    chunks.push(std::mem::replace(&mut self.pending, rest));
                }
                None => break,
            }
        }
        chunks
    }

    /// Take whatever partial line is buffered
    pub fn flush(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_latin1_strips_cr() {
        assert_eq!(decode_latin1(b"caf\xe9\r\n"), "caf\u{e9}\n");
    }

    #[test]
    fn test_complete_lines_and_prompt() {
        let mut splitter = LineSplitter::new();
        let chunks = splitter.push(b"Loading program... done.\nTime: 0\n(ocd) ");
        assert_eq!(
            chunks,
            vec!["Loading program... done.\n", "Time: 0\n", "(ocd) "]
        );
        assert!(!splitter.has_pending());
    }

    #[test]
    fn test_output_following_prompt_on_same_line() {
        let mut splitter = LineSplitter::new();
        let chunks = splitter.push(b"(ocd) Time: 12 - pc: 100 - module Foo\n(ocd) ");
        assert_eq!(
            chunks,
            vec!["(ocd) ", "Time: 12 - pc: 100 - module Foo\n", "(ocd) "]
        );
    }

    #[test]
    fn test_partial_input_is_held() {
        let mut splitter = LineSplitter::new();
        assert!(splitter.push(b"Breakpoint 1 at 10 : fi").is_empty());
        assert!(splitter.push(b"le a.ml, line 1, characters 1-2").is_empty());
        assert_eq!(
            splitter.push(b"\n(oc"),
            vec!["Breakpoint 1 at 10 : file a.ml, line 1, characters 1-2\n"]
        );
        assert_eq!(splitter.push(b"d) "), vec!["(ocd) "]);
    }

    #[test]
    fn test_flush_returns_partial_line() {
        let mut splitter = LineSplitter::new();
        splitter.push(b"Waiting for connection...");
        assert_eq!(splitter.flush().as_deref(), Some("Waiting for connection..."));
        assert_eq!(splitter.flush(), None);
    }
}
