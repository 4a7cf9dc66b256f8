//! Session transcript
//!
//! The text a user would see in a terminal running the debugger: visible
//! commands, their output and prompts. Lines are numbered from 0 and the
//! number of the line being written is what the time index keys on.

#[derive(Debug, Clone, Default)]
pub struct Transcript {
    lines: Vec<String>,
    /// The last line has no terminating newline yet
    open: bool,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append text, continuing the last line if it was not terminated
    pub fn append(&mut self, text: &str) {
        for piece in text.split_inclusive('\n') {
            let terminated = piece.ends_with('\n');
            let piece = piece.trim_end_matches('\n');
            match self.lines.last_mut() {
                Some(last) if self.open => last.push_str(piece),
                _ => self.lines.push(piece.to_string()),
            }
            self.open = !terminated;
        }
    }

    /// Number of the line currently being written
    pub fn current_line(&self) -> usize {
        if self.open || self.lines.is_empty() {
            self.lines.len().saturating_sub(1)
        } else {
            self.lines.len()
        }
    }

    /// Lines from `start` on, with their numbers
    pub fn since(&self, start: usize) -> Vec<(usize, String)> {
        self.lines
            .iter()
            .enumerate()
            .skip(start)
            .map(|(n, l)| (n, l.clone()))
            .collect()
    }

    /// The whole text
    pub fn text(&self) -> String {
        let mut text = self.lines.join("\n");
        if !self.open && !self.lines.is_empty() {
            text.push('\n');
        }
        text
    }
}
