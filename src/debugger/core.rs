//! Protocol state of one debugger session
//!
//! [`SessionCore`] is the synchronous heart of a session: it feeds output
//! chunks through the classifier, routes them to the transcript according to
//! the in-flight command's visibility, keeps breakpoints, time index and
//! stop location current, and writes queued commands to a [`CommandSink`].
//! It owns no process and no task, so it is driven by the session actor and
//! by tests alike.

use std::path::Path;

use super::breakpoints::{self, Breakpoint, BreakpointStore};
use super::command::{Command, CommandKind, CommandOutcome, CommandQueue, CommandSink, Finished, Visibility};
use super::events::SessionEvent;
use super::protocol::{self, ProtocolEvent, StopLocation};
use super::stack::{self, Frame};
use super::time_index::TimeIndex;
use super::transcript::Transcript;
use crate::common::settings::{self, SharedSettings};
use crate::common::{Error, Result};

/// Commands that move execution
const MOTION_COMMANDS: &[&str] = &[
    "run", "reverse", "step", "backstep", "next", "previous", "finish", "start", "goto", "last",
];

/// What the controller must act on after feeding the core
#[derive(Debug, Default)]
pub struct Effects {
    pub events: Vec<SessionEvent>,
    /// The debugger waits for the debuggee on this socket
    pub start_debuggee: Option<String>,
    /// A write to the debugger failed: the process is gone
    pub debugger_lost: bool,
}

impl Effects {
    fn push(&mut self, event: SessionEvent) {
        self.events.push(event);
    }
}

/// Commands run right after the debugger starts
///
/// Manual loading mode makes the debugger wait for us to launch the
/// debuggee; `goto 0` then loads the program.
pub fn setup_commands(socket: Option<&str>, init_script: Option<&Path>) -> Vec<Command> {
    let mut commands = vec![Command::internal(
        "set loadingmode manual",
        Visibility::HideDebuggerOutput,
    )];
    if let Some(socket) = socket {
        commands.push(Command::internal(
            format!("set socket {}", socket),
            Visibility::HideDebuggerOutput,
        ));
    }
    commands.push(Command::internal("goto 0", Visibility::HideDebuggerOutput));
    if let Some(script) = init_script.filter(|p| p.is_file()) {
        commands.push(Command::internal(
            format!("source {}", script.display()),
            Visibility::HideDebuggerOutput,
        ));
    }
    commands
}

pub struct SessionCore {
    queue: CommandQueue,
    breakpoints: BreakpointStore,
    time: TimeIndex,
    transcript: Transcript,
    location: Option<StopLocation>,
    frames: Vec<Frame>,
    current_frame: Option<u32>,
    settings: SharedSettings,
    history_size: usize,
}

impl SessionCore {
    pub fn new(settings: SharedSettings, history_size: usize) -> Self {
        Self {
            queue: CommandQueue::new(),
            breakpoints: BreakpointStore::new(settings.clone()),
            time: TimeIndex::new(),
            transcript: Transcript::new(),
            location: None,
            frames: Vec::new(),
            current_frame: None,
            settings,
            history_size,
        }
    }

    pub fn breakpoints(&self) -> Vec<Breakpoint> {
        self.breakpoints.list()
    }

    pub fn breakpoint(&self, id: u32) -> Option<&Breakpoint> {
        self.breakpoints.get(id)
    }

    pub fn location(&self) -> Option<&StopLocation> {
        self.location.as_ref()
    }

    pub fn time_index(&self) -> &TimeIndex {
        &self.time
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn current_frame(&self) -> Option<u32> {
        self.current_frame
    }

    /// Texts of the queued commands, head first
    pub fn pending(&self) -> Vec<String> {
        self.queue.pending()
    }

    pub fn history(&self) -> Vec<String> {
        settings::lock(&self.settings).command_history()
    }

    pub fn show_all_commands(&self) -> bool {
        settings::lock(&self.settings).show_all_commands()
    }

    pub fn set_show_all_commands(&mut self, enabled: bool) -> Result<()> {
        settings::lock(&self.settings).set_show_all_commands(enabled)
    }

    /// Time recorded at or before transcript line `line`
    pub fn time_for_line(&self, line: usize) -> Result<i64> {
        self.time
            .at_or_before(line)
            .map(|(_, t)| t)
            .ok_or(Error::NoTimeRecorded(line))
    }

    /// Append a line of our own (not debugger output) to the transcript
    pub fn note(&mut self, message: &str) -> Effects {
        let mut fx = Effects::default();
        self.append(&format!("\n{}\n", message), &mut fx);
        fx
    }

    /// A fresh debugger process is up
    ///
    /// Resets all per-process state, seeds the queue with a placeholder that
    /// absorbs the banner and first prompt, queues `setup`, then the
    /// breakpoint replay.
    pub fn begin(&mut self, setup: Vec<Command>, sink: &mut dyn CommandSink) -> Effects {
        let mut fx = Effects::default();
        self.reset_process_state(&mut fx);

        self.queue.enqueue(Command::placeholder());
        self.drain(sink, &mut fx);
        for command in setup {
            self.push_command(command, sink, &mut fx);
        }

        fx.push(SessionEvent::Breakpoints {
            breakpoints: Vec::new(),
        });
        for command in self.breakpoints.begin_restore() {
            self.push_command(command, sink, &mut fx);
        }
        fx
    }

    /// The debugger process is gone
    pub fn end(&mut self) -> Effects {
        let mut fx = Effects::default();
        self.reset_process_state(&mut fx);
        fx
    }

    fn reset_process_state(&mut self, fx: &mut Effects) {
        let dropped = self.queue.clear();
        tracing::debug!(dropped = dropped.len(), "Discarding command queue");
        drop(dropped);

        self.time.clear();
        self.frames.clear();
        self.current_frame = None;
        if self.location.take().is_some() {
            fx.push(SessionEvent::Location { location: None });
        }
    }

    /// Queue a command
    ///
    /// An empty `Immediate` command repeats the most recent history entry.
    pub fn enqueue(&mut self, mut command: Command, sink: &mut dyn CommandSink) -> Effects {
        let mut fx = Effects::default();

        command.text = command
            .text
            .trim_end_matches(|c: char| c == '\n' || c == '\r')
            .to_string();
        if command.text.trim().is_empty() {
            let last = self.history().last().cloned();
            match last {
                Some(last) if command.visibility == Visibility::Immediate => command.text = last,
                _ => {
                    command.complete(Ok(CommandOutcome {
                        command: String::new(),
                        result: String::new(),
                    }));
                    return fx;
                }
            }
        }

        if command.kind == CommandKind::User && command.visibility.is_shown() {
            self.remember(&command.text);
        }

        self.push_command(command, sink, &mut fx);
        fx
    }

    fn push_command(&mut self, mut command: Command, sink: &mut dyn CommandSink, fx: &mut Effects) {
        if self.show_all_commands() && !command.visibility.is_shown() {
            command.visibility = Visibility::ShowAll;
        }
        tracing::trace!(command = %command.text, visibility = ?command.visibility, "Queued");

        for dropped in self.queue.enqueue(command) {
            if dropped.kind == CommandKind::Replay {
                self.breakpoints.replay_done();
            }
        }
        self.drain(sink, fx);
    }

    fn remember(&mut self, command: &str) {
        let mut store = settings::lock(&self.settings);
        let mut history = store.command_history();
        settings::push_history(&mut history, command, self.history_size);
        if let Err(e) = store.set_command_history(&history) {
            tracing::warn!(error = %e, "Could not persist command history");
        }
    }

    fn drain(&mut self, sink: &mut dyn CommandSink, fx: &mut Effects) {
        match self.queue.drain(sink) {
            Ok(Some(written)) => {
                tracing::trace!("ocd >>> {}", written.text);
                let word = written.text.split_whitespace().next().unwrap_or_default();
                if MOTION_COMMANDS.contains(&word) {
                    self.breakpoints.clear_hits();
                }
                if written.shown {
                    self.append(&format!("{}\n", written.text), fx);
                }
            }
            Ok(None) => {}
            Err(e) => {
                // dead process: drop everything until the next start
                tracing::debug!(error = %e, "Write to debugger failed");
                drop(self.queue.clear());
                self.breakpoints.clear();
                fx.push(SessionEvent::Breakpoints {
                    breakpoints: Vec::new(),
                });
                fx.debugger_lost = true;
            }
        }
    }

    fn append(&mut self, text: &str, fx: &mut Effects) {
        self.transcript.append(text);
        fx.push(SessionEvent::Transcript {
            text: text.to_string(),
        });
    }

    /// Feed one output chunk
    pub fn on_output(&mut self, chunk: &str, sink: &mut dyn CommandSink) -> Effects {
        let mut fx = Effects::default();
        tracing::trace!("ocd <<< {:?}", chunk);

        let in_flight = self.queue.in_flight().map(|c| c.text.clone());
        let classified = protocol::classify(chunk, in_flight.as_deref());

        let routing = self.queue.route(&classified);
        if let Some(echo) = routing.echo {
            self.append(&echo, &mut fx);
        }
        if let Some(display) = routing.display {
            self.append(&display, &mut fx);
        }

        if let Some(event) = classified.event {
            self.apply(event, in_flight.as_deref(), &mut fx);
        }

        if classified.prompt_ready {
            if let Some(finished) = self.queue.on_prompt_ready() {
                self.finish(finished, &mut fx);
            }
            self.drain(sink, &mut fx);
        }
        fx
    }

    fn apply(&mut self, event: ProtocolEvent, in_flight: Option<&str>, fx: &mut Effects) {
        match event {
            ProtocolEvent::BreakpointRemoved { id } => {
                self.breakpoints.on_removed(id);
                fx.push(SessionEvent::Breakpoints {
                    breakpoints: self.breakpoints.list(),
                });
            }
            ProtocolEvent::BreakpointsHit { ids } => {
                self.breakpoints.on_hit(&ids);
                fx.push(SessionEvent::BreakpointsHit { ids });
                fx.push(SessionEvent::Breakpoints {
                    breakpoints: self.breakpoints.list(),
                });
            }
            ProtocolEvent::BreakpointCreated {
                id,
                file,
                line,
                from_col,
                to_col,
            } => {
                let source = breakpoints::source_command_for(in_flight);
                self.breakpoints
                    .on_created(id, &file, line, from_col, to_col, source);
                fx.push(SessionEvent::Breakpoints {
                    breakpoints: self.breakpoints.list(),
                });
            }
            ProtocolEvent::StopAt(location) => {
                let line = self.transcript.current_line();
                if let Some(time) = self.time.stamp(line) {
                    tracing::trace!(line, time, "Stamped time");
                }
                self.location = Some(location.clone());
                fx.push(SessionEvent::Location {
                    location: Some(location),
                });
            }
            ProtocolEvent::TimeReport { time } => {
                self.time.set_current(time);
                fx.push(SessionEvent::Time { time });
            }
            ProtocolEvent::DebuggeeSocketWaiting { socket } => {
                tracing::debug!(socket = %socket, "Debugger waits for the debuggee");
                fx.start_debuggee = Some(socket);
            }
            ProtocolEvent::HaltOrExit => {
                self.location = None;
                fx.push(SessionEvent::Location { location: None });
            }
            ProtocolEvent::PromptReady | ProtocolEvent::RoutineNoise => {}
        }
    }

    fn finish(&mut self, mut finished: Finished, fx: &mut Effects) {
        let text = finished.command.text.clone();

        if finished.command.kind == CommandKind::Replay {
            self.breakpoints.replay_done();
        }
        if text == "backtrace" || text == "bt" {
            self.frames = stack::parse_backtrace(&finished.result);
        } else if stack::is_frame_command(&text) {
            self.current_frame = stack::parse_current_frame(&finished.result);
        }

        let outcome = CommandOutcome {
            command: text,
            result: std::mem::take(&mut finished.result),
        };
        if !outcome.command.is_empty() {
            fx.push(SessionEvent::CommandCompleted {
                command: outcome.command.clone(),
                result: outcome.result.clone(),
            });
        }
        finished.command.complete(Ok(outcome));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::settings::{shared, MemorySettings, PersistedState};
    use crate::debugger::time_index::UNKNOWN_TIME;
    use tokio::sync::oneshot;

    fn core_with(state: PersistedState) -> (SessionCore, SharedSettings) {
        let settings = shared(MemorySettings::with_state(state));
        (SessionCore::new(settings.clone(), 10), settings)
    }

    fn started(state: PersistedState) -> (SessionCore, SharedSettings, Vec<String>) {
        let (mut core, settings) = core_with(state);
        let mut sink = Vec::new();
        core.begin(Vec::new(), &mut sink);
        core.on_output("\tOCaml Debugger version 4.14.0\n", &mut sink);
        core.on_output("(ocd) ", &mut sink);
        (core, settings, sink)
    }

    fn transcript_texts(fx: &Effects) -> Vec<String> {
        fx.events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Transcript { text } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_setup_commands() {
        let texts: Vec<String> = setup_commands(Some("127.0.0.1:10001"), Some(Path::new("/nonexistent/init")))
            .into_iter()
            .map(|c| c.text.clone())
            .collect();
        assert_eq!(
            texts,
            vec!["set loadingmode manual", "set socket 127.0.0.1:10001", "goto 0"]
        );
    }

    #[test]
    fn test_setup_sources_existing_script() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("init");
        std::fs::write(&script, "").unwrap();
        let commands = setup_commands(None, Some(&script));
        assert_eq!(commands.last().unwrap().text, format!("source {}", script.display()));
        assert!(commands.iter().all(|c| !c.text.starts_with("set socket")));
    }

    #[test]
    fn test_setup_waits_for_first_prompt() {
        let (mut core, _settings) = core_with(PersistedState::default());
        let mut sink = Vec::new();
        core.begin(setup_commands(Some("127.0.0.1:10001"), None), &mut sink);
        assert!(sink.is_empty());

        core.on_output("(ocd) ", &mut sink);
        assert_eq!(sink, vec!["set loadingmode manual"]);
        core.on_output("(ocd) ", &mut sink);
        core.on_output("(ocd) ", &mut sink);
        assert_eq!(
            sink,
            vec!["set loadingmode manual", "set socket 127.0.0.1:10001", "goto 0"]
        );
    }

    #[test]
    fn test_breakpoint_scenario() {
        let (mut core, settings, mut sink) = started(PersistedState::default());
        core.enqueue(Command::new("break @ Foo # 120", Visibility::HideAll), &mut sink);

        let fx = core.on_output(
            "Breakpoint 3 at 1024 : file foo.ml, line 12, characters 5-9\n(ocd) ",
            &mut sink,
        );

        let bp = core.breakpoint(3).unwrap();
        assert_eq!(
            (bp.file.as_str(), bp.from_line, bp.from_column, bp.to_column),
            ("foo.ml", 12, 5, 9)
        );
        assert_eq!(bp.source_command, None);
        assert!(fx.events.iter().any(|e| matches!(e, SessionEvent::Breakpoints { breakpoints } if breakpoints.len() == 1)));
        assert!(fx.events.iter().any(|e| matches!(e, SessionEvent::CommandCompleted { command, .. } if command == "break @ Foo # 120")));
        assert_eq!(settings::lock(&settings).breakpoint_commands(), vec!["break @ Foo 12 5"]);
        assert!(core.pending().is_empty());
    }

    #[test]
    fn test_non_positional_break_keeps_its_command() {
        let (mut core, settings, mut sink) = started(PersistedState::default());
        core.enqueue(Command::new("break Foo.bar", Visibility::ShowAll), &mut sink);
        core.on_output(
            "Breakpoint 1 at 2000 : file foo.ml, line 3, characters 2-20\n(ocd) ",
            &mut sink,
        );
        assert_eq!(settings::lock(&settings).breakpoint_commands(), vec!["break Foo.bar"]);
    }

    #[test]
    fn test_stop_location_stamps_time() {
        let (mut core, _settings, mut sink) = started(PersistedState::default());
        core.enqueue(Command::new("next", Visibility::ShowAll), &mut sink);
        core.on_output("Time: 12 - pc: 4396 - module Foo\n", &mut sink);
        let fx = core.on_output("\x1A\x1AM/src/x.ml:10:20:after\n", &mut sink);

        assert_eq!(
            core.location(),
            Some(&StopLocation {
                file: "/src/x.ml".to_string(),
                start: 10,
                end: 20,
                after: true,
            })
        );
        assert!(transcript_texts(&fx).is_empty());
        let line = core.transcript().current_line();
        assert_eq!(core.time_index().get(line), Some(12));
        assert_eq!(core.time_for_line(line + 5).unwrap(), 12);
    }

    #[test]
    fn test_halt_clears_location() {
        let (mut core, _settings, mut sink) = started(PersistedState::default());
        core.on_output("\x1A\x1AMa.ml:1:2:before\n", &mut sink);
        assert!(core.location().is_some());
        let fx = core.on_output("\x1A\x1AH\n", &mut sink);
        assert!(core.location().is_none());
        assert!(fx.events.contains(&SessionEvent::Location { location: None }));
    }

    #[test]
    fn test_quiet_command_prompt_only_stays_out_of_transcript() {
        let (mut core, _settings, mut sink) = started(PersistedState::default());
        let before = core.transcript().text();

        let fx1 = core.enqueue(Command::new("next", Visibility::HideDebuggerOutput), &mut sink);
        let fx2 = core.on_output("(ocd) ", &mut sink);

        assert!(transcript_texts(&fx1).is_empty());
        assert!(transcript_texts(&fx2).is_empty());
        assert_eq!(core.transcript().text(), before);
    }

    #[test]
    fn test_quiet_command_shown_on_error() {
        let (mut core, _settings, mut sink) = started(PersistedState::default());
        core.enqueue(Command::new("print x", Visibility::HideDebuggerOutput), &mut sink);
        let fx = core.on_output("Unbound identifier x\n(ocd) ", &mut sink);

        assert_eq!(
            transcript_texts(&fx),
            vec!["print x\n", "Unbound identifier x\n(ocd) "]
        );
    }

    #[test]
    fn test_shown_command_is_echoed() {
        let (mut core, _settings, mut sink) = started(PersistedState::default());
        let fx = core.enqueue(Command::new("print x", Visibility::ShowAll), &mut sink);
        assert_eq!(transcript_texts(&fx), vec!["print x\n"]);
        assert_eq!(sink.last().map(String::as_str), Some("print x"));
    }

    #[test]
    fn test_restore_failure_keeps_persisted() {
        let (mut core, settings) = core_with(PersistedState {
            breakpoint_commands: vec!["break @ Foo 1 0".to_string(), "break @ Bar 2 0".to_string()],
            ..Default::default()
        });
        let mut sink = Vec::new();
        core.begin(Vec::new(), &mut sink);
        core.on_output("(ocd) ", &mut sink);
        assert_eq!(sink, vec!["break @ Foo 1 0"]);
        core.on_output("Can't find any event there.\n(ocd) ", &mut sink);
        core.on_output("Can't find any event there.\n(ocd) ", &mut sink);

        assert_eq!(sink, vec!["break @ Foo 1 0", "break @ Bar 2 0"]);
        assert!(core.breakpoints().is_empty());
        assert_eq!(settings::lock(&settings).breakpoint_commands().len(), 2);
    }

    #[test]
    fn test_immediate_during_restore_keeps_pending_replays() {
        let (mut core, settings) = core_with(PersistedState {
            breakpoint_commands: vec!["break @ Foo 1 0".to_string(), "break @ Bar 2 0".to_string()],
            ..Default::default()
        });
        let mut sink = Vec::new();
        core.begin(Vec::new(), &mut sink);
        core.on_output("(ocd) ", &mut sink);
        core.on_output(
            "Breakpoint 1 at 10 : file foo.ml, line 1, characters 0-5\n",
            &mut sink,
        );

        core.enqueue(Command::new("step", Visibility::Immediate), &mut sink);
        assert_eq!(core.pending(), vec!["step", "break @ Bar 2 0"]);
        assert_eq!(settings::lock(&settings).breakpoint_commands().len(), 2);

        core.on_output("(ocd) ", &mut sink);
        assert_eq!(sink, vec!["break @ Foo 1 0", "step", "break @ Bar 2 0"]);
        core.on_output(
            "Breakpoint 2 at 20 : file bar.ml, line 2, characters 0-5\n(ocd) ",
            &mut sink,
        );

        assert_eq!(core.breakpoints().len(), 2);
        assert_eq!(
            settings::lock(&settings).breakpoint_commands(),
            vec!["break @ Foo 1 0", "break @ Bar 2 0"]
        );
    }

    #[test]
    fn test_dead_debugger_during_restore_keeps_persisted() {
        struct Dead;
        impl CommandSink for Dead {
            fn write_line(&mut self, _line: &str) -> Result<()> {
                Err(Error::DebuggerNotRunning)
            }
        }
        let (mut core, settings) = core_with(PersistedState {
            breakpoint_commands: vec!["break @ Foo 1 0".to_string(), "break @ Bar 2 0".to_string()],
            ..Default::default()
        });
        let mut sink = Vec::new();
        core.begin(Vec::new(), &mut sink);
        core.on_output("(ocd) ", &mut sink);
        core.on_output(
            "Breakpoint 1 at 10 : file foo.ml, line 1, characters 0-5\n",
            &mut sink,
        );

        let fx = core.on_output("(ocd) ", &mut Dead);
        assert!(fx.debugger_lost);
        assert_eq!(settings::lock(&settings).breakpoint_commands().len(), 2);
    }

    #[test]
    fn test_restore_output_is_hidden() {
        let (mut core, _settings) = core_with(PersistedState {
            breakpoint_commands: vec!["break @ Foo 1 0".to_string()],
            ..Default::default()
        });
        let mut sink = Vec::new();
        core.begin(Vec::new(), &mut sink);
        core.on_output("(ocd) ", &mut sink);
        let fx = core.on_output(
            "Breakpoint 1 at 10 : file foo.ml, line 1, characters 0-5\n(ocd) ",
            &mut sink,
        );
        assert!(transcript_texts(&fx).is_empty());
        assert_eq!(core.breakpoints().len(), 1);
    }

    #[test]
    fn test_restart_clears_time_index() {
        let (mut core, _settings, mut sink) = started(PersistedState::default());
        core.on_output("Time: 30\n", &mut sink);
        core.on_output("\x1A\x1AMa.ml:1:2:after\n", &mut sink);
        assert!(!core.time_index().is_empty());

        core.end();
        core.begin(Vec::new(), &mut sink);
        assert!(core.time_index().is_empty());
        assert_eq!(core.time_index().current(), UNKNOWN_TIME);
        assert!(core.location().is_none());
    }

    #[test]
    fn test_immediate_preempts_queue() {
        let (mut core, _settings, mut sink) = started(PersistedState::default());
        core.enqueue(Command::new("run", Visibility::ShowAll), &mut sink);
        core.enqueue(Command::new("backtrace", Visibility::HideAll), &mut sink);
        core.enqueue(Command::new("step", Visibility::Immediate), &mut sink);

        assert_eq!(core.pending(), vec!["step"]);
        assert_eq!(sink.last().map(String::as_str), Some("step"));
    }

    #[tokio::test]
    async fn test_completion_carries_result() {
        let (mut core, _settings, mut sink) = started(PersistedState::default());
        let (tx, rx) = oneshot::channel();
        core.enqueue(
            Command::new("print x", Visibility::HideAll).with_completion(tx),
            &mut sink,
        );
        core.on_output("x: int = 3\n", &mut sink);
        core.on_output("(ocd) ", &mut sink);

        let outcome = rx.await.unwrap().unwrap();
        assert_eq!(outcome.command, "print x");
        assert_eq!(outcome.result, "x: int = 3\n");
    }

    #[test]
    fn test_history_and_repeat() {
        let (mut core, _settings, mut sink) = started(PersistedState::default());
        core.enqueue(Command::new("next", Visibility::Immediate), &mut sink);
        core.on_output("(ocd) ", &mut sink);
        core.enqueue(Command::new("", Visibility::Immediate), &mut sink);

        assert_eq!(sink.last().map(String::as_str), Some("next"));
        assert_eq!(core.history(), vec!["next"]);

        core.on_output("(ocd) ", &mut sink);
        core.enqueue(Command::new("backtrace", Visibility::HideAll), &mut sink);
        assert_eq!(core.history(), vec!["next"]);
    }

    #[test]
    fn test_show_all_upgrades_quiet_commands() {
        let (mut core, _settings, mut sink) = started(PersistedState {
            show_all_commands: true,
            ..Default::default()
        });
        let fx = core.enqueue(Command::new("backtrace", Visibility::HideAll), &mut sink);
        assert_eq!(transcript_texts(&fx), vec!["backtrace\n"]);
    }

    #[test]
    fn test_backtrace_result_is_parsed() {
        let (mut core, _settings, mut sink) = started(PersistedState::default());
        core.enqueue(Command::new("backtrace", Visibility::HideAll), &mut sink);
        core.enqueue(Command::new("frame", Visibility::HideAll), &mut sink);
        core.on_output("Backtrace:\n", &mut sink);
        core.on_output("#0  Pc : 4396  Foo char 120\n", &mut sink);
        core.on_output("#1  Pc : 5120  Main char 45\n", &mut sink);
        core.on_output("(ocd) ", &mut sink);
        core.on_output("#0  Pc : 4396  Foo char 120\n", &mut sink);
        core.on_output("(ocd) ", &mut sink);

        assert_eq!(core.frames().len(), 2);
        assert_eq!(core.current_frame(), Some(0));
    }

    #[test]
    fn test_dead_debugger_drops_queue() {
        struct Dead;
        impl CommandSink for Dead {
            fn write_line(&mut self, _line: &str) -> Result<()> {
                Err(Error::DebuggerNotRunning)
            }
        }
        let (mut core, _settings, _sink) = started(PersistedState::default());
        let fx = core.enqueue(Command::new("next", Visibility::ShowAll), &mut Dead);
        assert!(fx.debugger_lost);
        assert!(core.pending().is_empty());
    }

    #[test]
    fn test_socket_waiting_requests_debuggee() {
        let (mut core, _settings, mut sink) = started(PersistedState::default());
        let fx = core.on_output(
            "Waiting for connection...(the socket is 127.0.0.1:10001)\n",
            &mut sink,
        );
        assert_eq!(fx.start_debuggee.as_deref(), Some("127.0.0.1:10001"));
    }
}
