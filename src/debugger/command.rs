//! Debugger commands and the at-most-one-in-flight command queue
//!
//! ocamldebug reads one command line at a time and signals completion only by
//! printing its prompt. The queue writes the head command, waits for the
//! prompt, then moves on. Each command carries a visibility policy deciding
//! whether it and its output reach the transcript.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use super::protocol::Classification;
use crate::common::{Error, Result};

/// Whether a command and its output are shown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Typed at the live prompt: shown, and jumps the queue
    Immediate,
    /// Command and result both shown
    ShowAll,
    /// Shown only once the debugger says something beyond routine chatter
    HideDebuggerOutput,
    /// Never shown
    HideAll,
}

impl Visibility {
    pub fn is_shown(self) -> bool {
        matches!(self, Visibility::Immediate | Visibility::ShowAll)
    }
}

/// Who asked for a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    User,
    /// Session setup
    Internal,
    /// Breakpoint restore after a start
    Replay,
}

/// A finished command: its text and everything it printed before the prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub command: String,
    pub result: String,
}

/// Where a command's outcome is delivered
pub type Completion = oneshot::Sender<Result<CommandOutcome>>;

/// One line for the debugger
#[derive(Debug)]
pub struct Command {
    pub text: String,
    pub visibility: Visibility,
    pub kind: CommandKind,
    completion: Option<Completion>,
}

impl Command {
    fn with_kind(text: impl Into<String>, visibility: Visibility, kind: CommandKind) -> Self {
        Self {
            text: text.into(),
            visibility,
            kind,
            completion: None,
        }
    }

    pub fn new(text: impl Into<String>, visibility: Visibility) -> Self {
        Self::with_kind(text, visibility, CommandKind::User)
    }

    pub fn internal(text: impl Into<String>, visibility: Visibility) -> Self {
        Self::with_kind(text, visibility, CommandKind::Internal)
    }

    /// A breakpoint restore command, never shown
    pub fn replay(text: impl Into<String>) -> Self {
        Self::with_kind(text, Visibility::HideAll, CommandKind::Replay)
    }

    /// Placeholder that writes nothing and completes at the next prompt
    pub fn placeholder() -> Self {
        Self::internal(String::new(), Visibility::ShowAll)
    }

    pub fn with_completion(mut self, completion: Completion) -> Self {
        self.completion = Some(completion);
        self
    }

    /// Deliver the outcome to whoever is waiting, if anyone
    pub fn complete(&mut self, outcome: Result<CommandOutcome>) {
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(outcome);
        }
    }

    /// Fail the waiter with `CommandDiscarded`
    pub fn discard(&mut self) {
        let text = self.text.clone();
        self.complete(Err(Error::CommandDiscarded(text)));
    }
}

impl Drop for Command {
    fn drop(&mut self) {
        if self.completion.is_some() {
            self.discard();
        }
    }
}

/// Destination of command lines (the debugger's stdin)
pub trait CommandSink {
    /// Write `line` followed by a newline
    fn write_line(&mut self, line: &str) -> Result<()>;
}

/// What a chunk of output does to the transcript
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Routing {
    /// Command text to echo first (a quiet command just became visible)
    pub echo: Option<String>,
    /// Text to append
    pub display: Option<String>,
}

/// A command that was written to the sink, as seen by the caller
#[derive(Debug, PartialEq, Eq)]
pub struct Written {
    pub text: String,
    pub shown: bool,
}

/// A command whose prompt arrived
#[derive(Debug)]
pub struct Finished {
    pub command: Command,
    pub result: String,
    /// The command ended up in the transcript
    pub shown: bool,
}

#[derive(Debug)]
struct InFlight {
    command: Command,
    /// Quiet command promoted to visible by notable output
    revealed: bool,
    written: bool,
    result: String,
}

impl InFlight {
    fn new(command: Command) -> Self {
        Self {
            command,
            revealed: false,
            written: false,
            result: String::new(),
        }
    }

    fn shown(&self) -> bool {
        self.command.visibility.is_shown() || self.revealed
    }
}

/// Ordered commands; the head is in flight once written
#[derive(Debug, Default)]
pub struct CommandQueue {
    commands: VecDeque<InFlight>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// The head command once it has been written
    pub fn in_flight(&self) -> Option<&Command> {
        self.commands
            .front()
            .filter(|c| c.written)
            .map(|c| &c.command)
    }

    /// Texts of all queued commands, head first
    pub fn pending(&self) -> Vec<String> {
        self.commands.iter().map(|c| c.command.text.clone()).collect()
    }

    /// Add a command
    ///
    /// `Immediate` clears the queue, including the command in flight, and
    /// takes the head. Breakpoint replays not written yet stay queued behind
    /// it. Everything else goes to the tail. Returns the commands that were
    /// dropped.
    pub fn enqueue(&mut self, command: Command) -> Vec<Command> {
        let mut dropped = Vec::new();
        if command.visibility == Visibility::Immediate {
            let (kept, cleared): (VecDeque<InFlight>, VecDeque<InFlight>) = self
                .commands
                .drain(..)
                .partition(|c| c.command.kind == CommandKind::Replay && !c.written);
            dropped.extend(cleared.into_iter().map(|c| c.command));
            self.commands = kept;
            self.commands.push_front(InFlight::new(command));
        } else {
            self.commands.push_back(InFlight::new(command));
        }
        dropped
    }

    /// Drop every command
    pub fn clear(&mut self) -> Vec<Command> {
        self.commands.drain(..).map(|c| c.command).collect()
    }

    /// Write the head command if it is not in flight yet
    ///
    /// An empty head is marked in flight without writing anything; it
    /// completes at the next prompt.
    pub fn drain(&mut self, sink: &mut dyn CommandSink) -> Result<Option<Written>> {
        let Some(head) = self.commands.front_mut() else {
            return Ok(None);
        };
        if head.written {
            return Ok(None);
        }
        head.written = true;
        if head.command.text.is_empty() {
            return Ok(None);
        }

        sink.write_line(&head.command.text)?;
        Ok(Some(Written {
            text: head.command.text.clone(),
            shown: head.command.visibility.is_shown(),
        }))
    }

    /// Decide what a chunk of output shows, accumulating the command result
    pub fn route(&mut self, chunk: &Classification) -> Routing {
        let display = || Some(chunk.display.clone()).filter(|d| !d.is_empty());

        let Some(head) = self.commands.front_mut().filter(|c| c.written) else {
            return Routing {
                echo: None,
                display: display(),
            };
        };

        head.result.push_str(&chunk.text);

        match head.command.visibility {
            Visibility::Immediate | Visibility::ShowAll => Routing {
                echo: None,
                display: display(),
            },
            Visibility::HideAll => Routing::default(),
            Visibility::HideDebuggerOutput if head.revealed => Routing {
                echo: None,
                display: display(),
            },
            Visibility::HideDebuggerOutput if chunk.is_notable() => {
                head.revealed = true;
                Routing {
                    echo: Some(format!("{}\n", head.command.text)),
                    display: display(),
                }
            }
            Visibility::HideDebuggerOutput => Routing::default(),
        }
    }

    /// Pop the in-flight command at the prompt
    pub fn on_prompt_ready(&mut self) -> Option<Finished> {
        if !self.commands.front().map(|c| c.written).unwrap_or(false) {
            return None;
        }
        self.commands.pop_front().map(|c| {
            let shown = c.shown();
            Finished {
                command: c.command,
                result: c.result,
                shown,
            }
        })
    }
}

#[cfg(test)]
impl CommandSink for Vec<String> {
    fn write_line(&mut self, line: &str) -> Result<()> {
        self.push(line.to_string());
        Ok(())
    }
}
