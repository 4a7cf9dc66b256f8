//! Call stack from `backtrace` and `frame` results

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static FRAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^#([0-9]+) +Pc *: *((?:[0-9]+:)?[0-9]+) +(\S+) +char +([0-9]+) *$")
        .expect("must compile")
});

/// One frame of a backtrace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub number: u32,
    pub pc: String,
    pub module: String,
    /// Character position in the module's source
    pub position: usize,
}

/// Parse one frame line such as `#0  Pc : 4396  Foo char 120`
pub fn parse_frame(line: &str) -> Option<Frame> {
    let caps = FRAME_RE.captures(line.trim_end())?;
    Some(Frame {
        number: caps[1].parse().ok()?,
        pc: caps[2].to_string(),
        module: caps[3].to_string(),
        position: caps[4].parse().ok()?,
    })
}

/// Frames listed in the result of `backtrace`
pub fn parse_backtrace(result: &str) -> Vec<Frame> {
    result.lines().filter_map(parse_frame).collect()
}

/// Number of the selected frame from the result of `frame`, `up` or `down`
pub fn parse_current_frame(result: &str) -> Option<u32> {
    result.lines().filter_map(parse_frame).last().map(|f| f.number)
}

/// Whether `command` changes or reports the selected frame
pub fn is_frame_command(command: &str) -> bool {
    let word = command.split_whitespace().next().unwrap_or_default();
    word.starts_with("fr") || word.starts_with("do") || word == "up" || word == "u"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_backtrace() {
        let result = "Backtrace:\n#0  Pc : 4396  Foo char 120\n#1  Pc : 5120  Main char 45\n";
        assert_eq!(
            parse_backtrace(result),
            vec![
                Frame {
                    number: 0,
                    pc: "4396".to_string(),
                    module: "Foo".to_string(),
                    position: 120,
                },
                Frame {
                    number: 1,
                    pc: "5120".to_string(),
                    module: "Main".to_string(),
                    position: 45,
                },
            ]
        );
    }

    #[test]
    fn test_parse_frame_with_module_pc() {
        let frame = parse_frame("#2 Pc: 0:8420 Stdlib__List char 1033").unwrap();
        assert_eq!(frame.number, 2);
        assert_eq!(frame.pc, "0:8420");
        assert_eq!(frame.module, "Stdlib__List");
    }

    #[test]
    fn test_non_frame_lines_are_ignored() {
        assert!(parse_backtrace("No backtrace available.\n").is_empty());
        assert_eq!(parse_frame("#x Pc : 1 Foo char 2"), None);
    }

    #[test]
    fn test_parse_current_frame() {
        assert_eq!(parse_current_frame("#1  Pc : 5120  Main char 45\n"), Some(1));
        assert_eq!(parse_current_frame("Not in a frame\n"), None);
    }

    #[test]
    fn test_frame_commands() {
        assert!(is_frame_command("frame"));
        assert!(is_frame_command("frame 2"));
        assert!(is_frame_command("up"));
        assert!(is_frame_command("down"));
        assert!(!is_frame_command("finish"));
        assert!(!is_frame_command("backtrace"));
    }
}
