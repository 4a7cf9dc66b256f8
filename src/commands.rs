//! CLI command definitions
//!
//! Defines the clap commands for the camldbg CLI.

use clap::{Subcommand, ValueEnum};

#[derive(Subcommand)]
pub enum Commands {
    /// Start ocamldebug on a command line
    ///
    /// Flags before the first executable go to the debugger, the executable
    /// is the program to debug and everything after it its arguments:
    /// `camldbg start -- -I _build ./prog.byte input.txt`
    Start {
        /// Debugger flags, program and program arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        args: Vec<String>,
    },

    /// Stop the debugger and the program
    Stop,

    /// Stop and start again with the same command line
    Restart,

    /// Get daemon/session status
    Status,

    /// Interrupt the running program (Ctrl-C)
    Interrupt,

    /// Send a raw command to ocamldebug
    Send {
        /// The command line, e.g. `print x`
        #[arg(required = true, allow_hyphen_values = true)]
        text: Vec<String>,

        /// Run before anything already queued
        #[arg(long, conflicts_with = "quiet")]
        immediate: bool,

        /// Only show output the debugger would not normally print
        #[arg(long)]
        quiet: bool,

        /// Return once queued instead of waiting for the result
        #[arg(long)]
        no_wait: bool,
    },

    /// Interactive ocamldebug prompt; an empty line repeats the last command
    Repl,

    /// Run until the next breakpoint or the end
    #[command(alias = "r")]
    Run,

    /// Run backward until the previous breakpoint or the start
    Reverse,

    /// Step into
    #[command(alias = "s")]
    Step,

    /// Step backward
    Backstep,

    /// Step over
    #[command(alias = "n")]
    Next,

    /// Step over, backward
    Previous,

    /// Run until the current function returns
    Finish,

    /// Select the caller's frame
    Up,

    /// Select the callee's frame
    Down,

    /// Select or show a stack frame
    Frame {
        /// Frame number (0 = innermost)
        number: Option<u32>,
    },

    /// Set a breakpoint at a source position
    #[command(name = "break", alias = "b")]
    Break {
        /// `file:line` or `file:line:column` (line 1-based, column 0-based)
        location: String,
    },

    /// Delete a breakpoint
    #[command(alias = "del")]
    Delete {
        /// Breakpoint number
        id: u32,
    },

    /// List breakpoints
    Breakpoints,

    /// Print the call stack
    #[command(alias = "bt")]
    Backtrace,

    /// Print the value of an expression
    #[command(alias = "p")]
    Print {
        #[arg(required = true)]
        expression: Vec<String>,
    },

    /// Print an expression, abbreviated
    Display {
        #[arg(required = true)]
        expression: Vec<String>,
    },

    /// Travel to an execution time
    Goto {
        /// Execution time (event count)
        #[arg(required_unless_present = "line", allow_negative_numbers = true)]
        time: Option<i64>,

        /// Travel to the time recorded at this transcript line instead
        #[arg(long, conflicts_with = "time")]
        line: Option<usize>,
    },

    /// Show the debugger transcript
    Transcript {
        /// First line to show
        #[arg(long, default_value = "0")]
        since: usize,
    },

    /// Show buffered session events
    Events {
        /// Only the last N events
        #[arg(long)]
        tail: Option<usize>,

        /// Clear the buffer afterwards
        #[arg(long)]
        clear: bool,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Show the command history
    History,

    /// Show or set whether all commands are echoed in the transcript
    Verbose {
        state: Option<Toggle>,
    },

    /// Write a line to the program's stdin (`^C` sends an interrupt)
    Input {
        #[arg(allow_hyphen_values = true)]
        text: Vec<String>,

        /// Do not append a newline
        #[arg(long, short = 'n')]
        no_newline: bool,
    },

    /// View daemon logs (for debugging)
    Logs {
        /// Number of lines to show (default: 50)
        #[arg(long, short = 'n', default_value = "50")]
        lines: usize,

        /// Follow log output (like tail -f)
        #[arg(long, short)]
        follow: bool,

        /// Clear the log file
        #[arg(long)]
        clear: bool,
    },

    /// Stop the daemon
    Shutdown,

    /// [Hidden] Run in daemon mode - spawned automatically
    #[command(hide = true)]
    Daemon,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

impl From<Toggle> for bool {
    fn from(toggle: Toggle) -> Self {
        toggle == Toggle::On
    }
}
