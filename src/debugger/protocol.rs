//! Output classification for the ocamldebug REPL
//!
//! ocamldebug has no framing: it prints human-oriented text, a `(ocd) `
//! prompt when it is ready for input, and (with `-emacs`) `\x1A\x1A`-prefixed
//! marker lines carrying the current source location. Several message shapes
//! overlap, so [`classify`] tries them in a fixed priority order and stops at
//! the first match:
//!
//! 1. breakpoint removed
//! 2. breakpoints hit
//! 3. breakpoint created
//! 4. stop location marker
//! 5. time report
//! 6. debuggee socket waiting
//! 7. halt marker
//! 8. routine chatter
//!
//! Prompt detection is independent of that order.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// The REPL prompt
pub const PROMPT: &str = "(ocd) ";

/// Prefix of the out-of-band lines printed in `-emacs` mode
pub const MARKER_PREFIX: &str = "\x1A\x1A";

static PROMPT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\(ocd\) *$\n?").expect("must compile"));

static REMOVED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^Removed breakpoint ([0-9]+) at ").expect("must compile")
});

static HIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^Breakpoints? *:((?: +[0-9]+)+)").expect("must compile"));

static CREATED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^Breakpoint ([0-9]+) at (?:[0-9]+:)?[0-9]+ *: *file ([^,]+), line ([0-9]+), characters ([0-9]+)-([0-9]+)",
    )
    .expect("must compile")
});

static STOP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\x1A\x1AM([^:\n]*):([^:\n]*):([^:\n]*):([^:\n]*)$").expect("must compile")
});

static TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^Time *: *([0-9]+)(?: - pc *: *([0-9:]+) - .*)?$").expect("must compile")
});

static SOCKET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Waiting for connection\.\.\.\(the socket is ([^)]*)\)").expect("must compile")
});

static HALT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\x1A\x1AH").expect("must compile"));

static NOISE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:Loading program\.\.\.(?: ?done\.)?|done\.|#[0-9]+ +Pc *: *[0-9:]+ .*|Position out of range\.?)$",
    )
    .expect("must compile")
});

/// Current source position reported by the debugger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopLocation {
    pub file: String,
    pub start: usize,
    pub end: usize,
    /// Execution is positioned after the range rather than before it
    pub after: bool,
}

/// Something the debugger said
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolEvent {
    /// The prompt was printed: the in-flight command is complete
    PromptReady,
    BreakpointRemoved {
        id: u32,
    },
    BreakpointsHit {
        ids: Vec<u32>,
    },
    BreakpointCreated {
        id: u32,
        file: String,
        line: u32,
        from_col: u32,
        to_col: u32,
    },
    StopAt(StopLocation),
    TimeReport {
        time: i64,
    },
    /// Manual loading mode is waiting for the debuggee on `socket`
    DebuggeeSocketWaiting {
        socket: String,
    },
    HaltOrExit,
    RoutineNoise,
}

impl ProtocolEvent {
    /// Events that never by themselves make a quiet command visible
    pub fn is_routine(&self) -> bool {
        matches!(
            self,
            ProtocolEvent::PromptReady
                | ProtocolEvent::RoutineNoise
                | ProtocolEvent::TimeReport { .. }
                | ProtocolEvent::StopAt(_)
                | ProtocolEvent::HaltOrExit
                | ProtocolEvent::DebuggeeSocketWaiting { .. }
        )
    }
}

/// Result of classifying one output chunk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    /// At most one event from the priority list
    pub event: Option<ProtocolEvent>,
    /// The chunk contained the prompt
    pub prompt_ready: bool,
    /// Chunk without prompt and marker lines; what a command "returned"
    pub text: String,
    /// Chunk without marker lines; what the transcript shows
    pub display: String,
}

impl Classification {
    /// Events in delivery order: the classified event, then `PromptReady`
    pub fn events(&self) -> Vec<ProtocolEvent> {
        let mut events: Vec<ProtocolEvent> = self.event.iter().cloned().collect();
        if self.prompt_ready {
            events.push(ProtocolEvent::PromptReady);
        }
        events
    }

    /// Whether this chunk makes a quiet command visible
    pub fn is_notable(&self) -> bool {
        let routine = self.event.as_ref().map(|e| e.is_routine()).unwrap_or(false);
        !routine && !self.text.trim().is_empty()
    }
}

/// Classify one decoded output chunk
///
/// `in_flight` is the text of the command currently awaiting completion; a
/// line repeating it verbatim counts as routine chatter.
pub fn classify(chunk: &str, in_flight: Option<&str>) -> Classification {
    let prompt_ready = PROMPT_RE.is_match(chunk);
    let body = PROMPT_RE.replace_all(chunk, "");

    let text = strip_markers(&body);
    let display = strip_markers(chunk);
    let event = match_event(&body, &text, in_flight);

    Classification {
        event,
        prompt_ready,
        text,
        display,
    }
}

fn match_event(body: &str, text: &str, in_flight: Option<&str>) -> Option<ProtocolEvent> {
    if let Some(caps) = REMOVED_RE.captures(body) {
        if let Ok(id) = caps[1].parse() {
            return Some(ProtocolEvent::BreakpointRemoved { id });
        }
    }

    if let Some(caps) = HIT_RE.captures(body) {
        let ids: Vec<u32> = caps[1]
            .split_whitespace()
            .filter_map(|s| s.parse().ok())
            .collect();
        if !ids.is_empty() {
            return Some(ProtocolEvent::BreakpointsHit { ids });
        }
    }

    if let Some(caps) = CREATED_RE.captures(body) {
        let parsed = (
            caps[1].parse(),
            caps[3].parse(),
            caps[4].parse(),
            caps[5].parse(),
        );
        if let (Ok(id), Ok(line), Ok(from_col), Ok(to_col)) = parsed {
            return Some(ProtocolEvent::BreakpointCreated {
                id,
                file: caps[2].trim().to_string(),
                line,
                from_col,
                to_col,
            });
        }
    }

    if let Some(caps) = STOP_RE.captures(body) {
        if let (Ok(start), Ok(end)) = (caps[2].parse(), caps[3].parse()) {
            return Some(ProtocolEvent::StopAt(StopLocation {
                file: caps[1].to_string(),
                start,
                end,
                after: &caps[4] == "after",
            }));
        }
    }

    if let Some(caps) = TIME_RE.captures(body) {
        if let Ok(time) = caps[1].parse() {
            return Some(ProtocolEvent::TimeReport { time });
        }
    }

    if let Some(caps) = SOCKET_RE.captures(body) {
        return Some(ProtocolEvent::DebuggeeSocketWaiting {
            socket: caps[1].to_string(),
        });
    }

    if HALT_RE.is_match(body) {
        return Some(ProtocolEvent::HaltOrExit);
    }

    if is_noise(text, in_flight) {
        return Some(ProtocolEvent::RoutineNoise);
    }

    None
}

/// Every non-blank line is known chatter (and there is at least one)
fn is_noise(text: &str, in_flight: Option<&str>) -> bool {
    let mut lines = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .peekable();
    if lines.peek().is_none() {
        return false;
    }
    lines.all(|line| NOISE_RE.is_match(line) || in_flight.map(|c| c.trim() == line).unwrap_or(false))
}

/// Drop `\x1A\x1A` marker lines, which are never shown
pub fn strip_markers(text: &str) -> String {
    if !text.contains(MARKER_PREFIX) {
        return text.to_string();
    }
    text.split_inclusive('\n')
        .filter(|line| !line.starts_with(MARKER_PREFIX))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breakpoint_created_then_prompt() {
        let c = classify(
            "Breakpoint 3 at 1024 : file foo.ml, line 12, characters 5-9\n(ocd) ",
            Some("break @ Foo 12 5"),
        );
        assert_eq!(
            c.events(),
            vec![
                ProtocolEvent::BreakpointCreated {
                    id: 3,
                    file: "foo.ml".to_string(),
                    line: 12,
                    from_col: 5,
                    to_col: 9,
                },
                ProtocolEvent::PromptReady,
            ]
        );
        assert_eq!(
            c.text,
            "Breakpoint 3 at 1024 : file foo.ml, line 12, characters 5-9\n"
        );
    }

    #[test]
    fn test_breakpoint_created_with_module_pc() {
        let c = classify(
            "Breakpoint 1 at 0:8352: file src/main.ml, line 3, characters 3-10\n",
            None,
        );
        assert!(matches!(
            c.event,
            Some(ProtocolEvent::BreakpointCreated { id: 1, ref file, line: 3, from_col: 3, to_col: 10 })
                if file == "src/main.ml"
        ));
        assert!(!c.prompt_ready);
    }

    #[test]
    fn test_stop_location_after() {
        let c = classify("\x1A\x1AM/src/x.ml:10:20:after\n", None);
        assert_eq!(
            c.event,
            Some(ProtocolEvent::StopAt(StopLocation {
                file: "/src/x.ml".to_string(),
                start: 10,
                end: 20,
                after: true,
            }))
        );
        assert!(c.display.is_empty());
        assert!(c.text.is_empty());
    }

    #[test]
    fn test_stop_location_before() {
        let c = classify("\x1A\x1AMlib/a.ml:0:7:before\n", None);
        assert!(matches!(c.event, Some(ProtocolEvent::StopAt(ref l)) if !l.after && l.end == 7));
    }

    #[test]
    fn test_stop_location_with_bad_numbers_is_not_a_stop() {
        let c = classify("\x1A\x1AM/src/x.ml:ten:20:after\n", None);
        assert_eq!(c.event, None);
    }

    #[test]
    fn test_halt_marker() {
        let c = classify("\x1A\x1AH\n", None);
        assert_eq!(c.event, Some(ProtocolEvent::HaltOrExit));
        assert!(c.display.is_empty());
    }

    #[test]
    fn test_removed_breakpoint() {
        let c = classify(
            "Removed breakpoint 2 at 4410 : file bar.ml, line 4, characters 1-12\n",
            Some("del 2"),
        );
        assert_eq!(c.event, Some(ProtocolEvent::BreakpointRemoved { id: 2 }));
    }

    #[test]
    fn test_breakpoints_hit() {
        assert_eq!(
            classify("Breakpoint : 1\n", None).event,
            Some(ProtocolEvent::BreakpointsHit { ids: vec![1] })
        );
        assert_eq!(
            classify("Breakpoints : 1 4 7\n", None).event,
            Some(ProtocolEvent::BreakpointsHit { ids: vec![1, 4, 7] })
        );
    }

    #[test]
    fn test_time_report() {
        assert_eq!(
            classify("Time: 12 - pc: 0:4396 - module Foo\n", Some("next")).event,
            Some(ProtocolEvent::TimeReport { time: 12 })
        );
        assert_eq!(
            classify("Time : 7\n", None).event,
            Some(ProtocolEvent::TimeReport { time: 7 })
        );
    }

    #[test]
    fn test_socket_waiting() {
        let c = classify(
            "Waiting for connection...(the socket is 127.0.0.1:10001)\n",
            Some("goto 0"),
        );
        assert_eq!(
            c.event,
            Some(ProtocolEvent::DebuggeeSocketWaiting {
                socket: "127.0.0.1:10001".to_string()
            })
        );
    }

    #[test]
    fn test_priority_removed_beats_created() {
        // Both shapes present: removal wins
        let c = classify(
            "Removed breakpoint 5 at 10 : file a.ml, line 1, characters 1-2\nBreakpoint 6 at 20 : file a.ml, line 2, characters 1-2\n",
            None,
        );
        assert_eq!(c.event, Some(ProtocolEvent::BreakpointRemoved { id: 5 }));
    }

    #[test]
    fn test_priority_hit_beats_stop_location() {
        let c = classify("Breakpoint : 2\n\x1A\x1AM/a.ml:1:2:before\n", None);
        assert_eq!(c.event, Some(ProtocolEvent::BreakpointsHit { ids: vec![2] }));
        assert_eq!(c.display, "Breakpoint : 2\n");
    }

    #[test]
    fn test_routine_noise() {
        assert_eq!(
            classify("Loading program... done.\n", None).event,
            Some(ProtocolEvent::RoutineNoise)
        );
        assert_eq!(
            classify("#0  Pc : 4396  Foo char 120\n", None).event,
            Some(ProtocolEvent::RoutineNoise)
        );
        assert_eq!(classify("done.\n", None).event, Some(ProtocolEvent::RoutineNoise));
    }

    #[test]
    fn test_echo_of_in_flight_command_is_noise() {
        assert_eq!(
            classify("set loadingmode manual\n", Some("set loadingmode manual")).event,
            Some(ProtocolEvent::RoutineNoise)
        );
    }

    #[test]
    fn test_unclassified_text() {
        let c = classify("Unbound identifier x\n(ocd) ", Some("print x"));
        assert_eq!(c.event, None);
        assert!(c.prompt_ready);
        assert!(c.is_notable());
        assert_eq!(c.display, "Unbound identifier x\n(ocd) ");
        assert_eq!(c.text, "Unbound identifier x\n");
    }

    #[test]
    fn test_prompt_only() {
        let c = classify("(ocd) ", Some("next"));
        assert_eq!(c.events(), vec![ProtocolEvent::PromptReady]);
        assert!(!c.is_notable());
        assert_eq!(c.display, "(ocd) ");
        assert!(c.text.is_empty());
    }

    #[test]
    fn test_prompt_with_trailing_spaces() {
        assert!(classify("(ocd)    ", None).prompt_ready);
        assert!(!classify("(ocd) print x\n", None).prompt_ready);
    }

    #[test]
    fn test_notable_rules() {
        assert!(!classify("Time: 3\n", None).is_notable());
        assert!(!classify("Loading program...\n", None).is_notable());
        assert!(classify("Breakpoint : 1\n", None).is_notable());
        assert!(!classify("\n", None).is_notable());
    }
}
