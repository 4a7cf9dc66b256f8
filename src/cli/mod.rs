//! CLI command handling
//!
//! Dispatches CLI commands to the daemon and formats output.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use colored::Colorize;
use tokio::io::AsyncBufReadExt;

use crate::commands::Commands;
use crate::common::{logging, Error, Result};
use crate::daemon::{Backtrace, Execution, StartReport, SessionStatus};
use crate::debugger::breakpoints::Breakpoint;
use crate::debugger::protocol::StopLocation;
use crate::debugger::{SessionEvent, Visibility};
use crate::ipc::protocol::{
    Command, EventsResult, SourcePosition, StatusResult, TranscriptResult,
};
use crate::ipc::DaemonClient;

/// Dispatch a CLI command
pub async fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Daemon => Err(Error::Internal(
            "daemon mode is handled before dispatch".to_string(),
        )),

        Commands::Start { args } => {
            let mut client = DaemonClient::connect_or_spawn().await?;

            let report: StartReport = client
                .request(Command::Start {
                    args,
                    cwd: std::env::current_dir().ok(),
                })
                .await?;

            print_start_report(&report);
            Ok(())
        }

        Commands::Stop => {
            let mut client = DaemonClient::connect().await?;
            client.send_command(Command::Stop).await?;
            println!("Session stopped");
            Ok(())
        }

        Commands::Restart => {
            let mut client = DaemonClient::connect().await?;
            let report: StartReport = client.request(Command::Restart).await?;
            print_start_report(&report);
            Ok(())
        }

        Commands::Status => {
            match DaemonClient::connect().await {
                Ok(mut client) => {
                    let status: StatusResult = client.request(Command::Status).await?;
                    println!("Daemon: running");
                    match status.session {
                        Some(session) => print_status(&session),
                        None => println!("Session: none"),
                    }
                }
                Err(Error::DaemonNotRunning) => {
                    println!("Daemon: not running");
                    println!("Session: none");
                }
                Err(e) => return Err(e),
            }
            Ok(())
        }

        Commands::Interrupt => {
            interrupt().await?;
            println!("Interrupt sent");
            Ok(())
        }

        Commands::Send {
            text,
            immediate,
            quiet,
            no_wait,
        } => {
            let text = text.join(" ");
            let visibility = if immediate {
                Visibility::Immediate
            } else if quiet {
                Visibility::HideDebuggerOutput
            } else {
                Visibility::ShowAll
            };

            let mut client = DaemonClient::connect().await?;
            if no_wait {
                client.send_command(Command::Send { text, visibility }).await?;
                println!("Queued");
            } else {
                let execution: Execution =
                    client.request(Command::Execute { text, visibility }).await?;
                print_execution(&execution);
            }
            Ok(())
        }

        Commands::Repl => repl().await,

        Commands::Run => motion("run").await,
        Commands::Reverse => motion("reverse").await,
        Commands::Step => motion("step").await,
        Commands::Backstep => motion("backstep").await,
        Commands::Next => motion("next").await,
        Commands::Previous => motion("previous").await,
        Commands::Finish => motion("finish").await,
        Commands::Up => motion("up").await,
        Commands::Down => motion("down").await,
        Commands::Frame { number } => match number {
            Some(number) => motion(&format!("frame {}", number)).await,
            None => motion("frame").await,
        },

        Commands::Break { location } => {
            let position = SourcePosition::parse(&location)?;
            let file = position.file.canonicalize().unwrap_or(position.file);

            let mut client = DaemonClient::connect().await?;
            let result = client
                .send_command(Command::BreakpointAdd {
                    file,
                    line: position.line,
                    column: position.column,
                })
                .await?;

            let execution: Execution = serde_json::from_value(result["execution"].clone())?;
            let breakpoints: Vec<Breakpoint> =
                serde_json::from_value(result["breakpoints"].clone())?;
            print_result(&execution.result);
            print_breakpoints(&breakpoints);
            Ok(())
        }

        Commands::Delete { id } => {
            let mut client = DaemonClient::connect().await?;
            let execution: Execution = client.request(Command::BreakpointRemove { id }).await?;
            print_result(&execution.result);
            println!("Breakpoint {} removed", id);
            Ok(())
        }

        Commands::Breakpoints => {
            let mut client = DaemonClient::connect().await?;
            let result = client.send_command(Command::BreakpointList).await?;
            let breakpoints: Vec<Breakpoint> =
                serde_json::from_value(result["breakpoints"].clone())?;
            print_breakpoints(&breakpoints);
            Ok(())
        }

        Commands::Backtrace => {
            let mut client = DaemonClient::connect().await?;
            let backtrace: Backtrace = client.request(Command::Backtrace).await?;
            print_backtrace(&backtrace);
            Ok(())
        }

        Commands::Print { expression } => motion(&format!("print {}", expression.join(" "))).await,
        Commands::Display { expression } => {
            motion(&format!("display {}", expression.join(" "))).await
        }

        Commands::Goto { time, line } => {
            let command = match (time, line) {
                (_, Some(line)) => Command::GotoLine { line },
                (Some(time), None) => Command::Goto { time },
                (None, None) => {
                    return Err(Error::Internal("goto needs a time or --line".to_string()))
                }
            };
            let mut client = DaemonClient::connect().await?;
            let execution: Execution = client.request(command).await?;
            print_execution(&execution);
            Ok(())
        }

        Commands::Transcript { since } => {
            let mut client = DaemonClient::connect().await?;
            let transcript: TranscriptResult = client.request(Command::Transcript { since }).await?;
            for (n, line) in &transcript.lines {
                println!("{} {}", format!("{:>5}", n).dimmed(), line);
            }
            Ok(())
        }

        Commands::Events { tail, clear, json } => {
            let mut client = DaemonClient::connect().await?;
            let result: EventsResult = client.request(Command::Events { tail, clear }).await?;

            if result.dropped > 0 && !json {
                println!("{}", format!("({} older events dropped)", result.dropped).dimmed());
            }
            for event in &result.events {
                if json {
                    println!("{}", serde_json::to_string(event)?);
                } else {
                    println!("{}", describe_event(event));
                }
            }
            Ok(())
        }

        Commands::History => {
            let mut client = DaemonClient::connect().await?;
            let result = client.send_command(Command::History).await?;
            let history: Vec<String> = serde_json::from_value(result["history"].clone())?;

            if history.is_empty() {
                println!("No commands in history");
            }
            for (n, command) in history.iter().enumerate() {
                println!("{:>4}  {}", n + 1, command);
            }
            Ok(())
        }

        Commands::Verbose { state } => {
            let mut client = DaemonClient::connect_or_spawn().await?;
            let result = client
                .send_command(Command::Verbose {
                    enabled: state.map(bool::from),
                })
                .await?;
            let enabled = result["show_all_commands"].as_bool().unwrap_or(false);
            println!("Show all commands: {}", if enabled { "on" } else { "off" });
            Ok(())
        }

        Commands::Input { text, no_newline } => {
            let text = debuggee_input(&text.join(" "), no_newline);
            let mut client = DaemonClient::connect().await?;
            client.send_command(Command::DebuggeeInput { text }).await?;
            Ok(())
        }

        Commands::Logs {
            lines,
            follow,
            clear,
        } => logs(lines, follow, clear).await,

        Commands::Shutdown => {
            match DaemonClient::connect().await {
                Ok(mut client) => {
                    client.send_command(Command::Shutdown).await?;
                    println!("Daemon stopped");
                }
                Err(Error::DaemonNotRunning) => println!("Daemon not running"),
                Err(e) => return Err(e),
            }
            Ok(())
        }
    }
}

/// Run a command that may move the program and print where it stopped
async fn motion(text: &str) -> Result<()> {
    let mut client = DaemonClient::connect().await?;
    let execution: Execution = client
        .request(Command::Execute {
            text: text.to_string(),
            visibility: Visibility::ShowAll,
        })
        .await?;
    print_execution(&execution);
    Ok(())
}

async fn interrupt() -> Result<()> {
    let mut client = DaemonClient::connect().await?;
    client.send_command(Command::Interrupt).await?;
    Ok(())
}

/// Text for the program's stdin; a lone `^C` is an interrupt character
fn debuggee_input(text: &str, no_newline: bool) -> String {
    if text == "^C" {
        return "\x03".to_string();
    }
    let mut text = text.to_string();
    if !no_newline {
        text.push('\n');
    }
    text
}

/// Interactive prompt over the daemon's session
///
/// Lines go to the debugger as if typed at its prompt; the transcript is
/// echoed as it grows. Ctrl-C interrupts the program instead of exiting.
async fn repl() -> Result<()> {
    let mut client = DaemonClient::connect().await?;
    let status: StatusResult = client.request(Command::Status).await?;
    if status.session.is_none() {
        return Err(Error::SessionNotActive);
    }

    // print from the line being written, so the current prompt shows
    let transcript: TranscriptResult = client.request(Command::Transcript { since: 0 }).await?;
    let mut cursor = match transcript.lines.last() {
        Some((n, _)) => (*n, 0),
        None => (0, 0),
    };
    flush_delta(&mut cursor, &transcript.lines);

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                interrupt().await?;
                continue;
            }
        };
        let Some(line) = line else {
            println!();
            break;
        };

        let outcome = {
            let execute = client.request::<Execution>(Command::Execute {
                text: line,
                visibility: Visibility::Immediate,
            });
            tokio::pin!(execute);
            loop {
                tokio::select! {
                    outcome = &mut execute => break outcome,
                    _ = tokio::signal::ctrl_c() => interrupt().await?,
                }
            }
        };
        match outcome {
            Ok(_) => {}
            Err(Error::SessionNotActive) => return Err(Error::SessionNotActive),
            Err(e) => eprintln!("{}", e.to_string().red()),
        }

        let transcript: TranscriptResult = client
            .request(Command::Transcript { since: cursor.0 })
            .await?;
        flush_delta(&mut cursor, &transcript.lines);
    }

    Ok(())
}

fn flush_delta(cursor: &mut (usize, usize), lines: &[(usize, String)]) {
    print!("{}", render_delta(cursor, lines));
    let _ = std::io::stdout().flush();
}

/// Transcript text not yet printed
///
/// `cursor` is the line being printed and how many bytes of it are out. A
/// line's newline is written once a later line shows up, since only then
/// is it known to be terminated.
fn render_delta(cursor: &mut (usize, usize), lines: &[(usize, String)]) -> String {
    let mut out = String::new();
    for (n, text) in lines {
        if *n < cursor.0 {
            continue;
        }
        if *n > cursor.0 {
            out.push('\n');
            *cursor = (*n, 0);
        }
        out.push_str(text.get(cursor.1..).unwrap_or(""));
        cursor.1 = text.len();
    }
    out
}

async fn logs(lines: usize, follow: bool, clear: bool) -> Result<()> {
    let Some(path) = logging::daemon_log_path() else {
        println!("No log directory available");
        return Ok(());
    };

    if clear {
        logging::truncate_daemon_log()?;
        println!("Cleared {}", path.display());
        return Ok(());
    }

    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !follow => {
            println!("No daemon log at {}", path.display());
            return Ok(());
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(Error::file_read(&path, &e)),
    };

    let all: Vec<&str> = content.lines().collect();
    for line in &all[all.len().saturating_sub(lines)..] {
        println!("{}", line);
    }

    if follow {
        follow_log(path, content.len() as u64).await?;
    }
    Ok(())
}

async fn follow_log(path: PathBuf, mut offset: u64) -> Result<()> {
    use std::io::{Read, Seek, SeekFrom};

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            _ = tokio::time::sleep(Duration::from_millis(250)) => {}
        }

        let Ok(mut file) = std::fs::File::open(&path) else {
            continue;
        };
        let len = file.metadata()?.len();
        if len < offset {
            // truncated by `logs --clear`
            offset = 0;
        }
        if len == offset {
            continue;
        }

        file.seek(SeekFrom::Start(offset))?;
        let mut chunk = String::new();
        file.read_to_string(&mut chunk)?;
        offset += chunk.len() as u64;
        print!("{}", chunk);
        std::io::stdout().flush()?;
    }
}

fn print_start_report(report: &StartReport) {
    let status = &report.status;
    match &status.command_line {
        Some(command_line) => println!("Started: {}", command_line),
        None => println!("Started"),
    }
    if let Some(target) = &status.target {
        println!("  Program: {}", target);
    }
    if let Some(port) = status.port {
        println!("  Socket: 127.0.0.1:{}", port);
    }
    println!("  State: {}", status.state);
    for warning in &report.warnings {
        println!("{} {}", "warning:".yellow().bold(), warning.yellow());
    }
}

fn print_status(status: &SessionStatus) {
    println!("Session: {}", status.state);
    if let Some(command_line) = &status.command_line {
        println!("Command line: {}", command_line);
    }
    if let Some(target) = &status.target {
        println!("Program: {}", target);
    }
    if let Some(pid) = status.debugger_pid {
        println!("Debugger pid: {}", pid);
    }
    if let Some(port) = status.port {
        println!("Socket port: {}", port);
    }
    if let Some(location) = &status.location {
        println!("Location: {}", describe_location(location));
    }
    println!("Time: {}", status.time);
    println!("Breakpoints: {}", status.breakpoints);
    if !status.pending.is_empty() {
        println!("Queued: {}", status.pending.join(", "));
    }
    println!(
        "Show all commands: {}",
        if status.show_all_commands { "on" } else { "off" }
    );
}

fn print_result(result: &str) {
    let result = result.trim_end();
    if !result.is_empty() {
        println!("{}", result);
    }
}

fn print_execution(execution: &Execution) {
    print_result(&execution.result);
    match &execution.location {
        Some(location) => println!(
            "{} {}  {}",
            "at".dimmed(),
            describe_location(location).cyan(),
            format!("(time {})", execution.time).dimmed()
        ),
        None => println!("{}", format!("(time {})", execution.time).dimmed()),
    }
}

fn print_breakpoints(breakpoints: &[Breakpoint]) {
    if breakpoints.is_empty() {
        println!("No breakpoints set");
        return;
    }

    println!("Breakpoints:");
    for bp in breakpoints {
        let marker = if bp.hit { "●".green() } else { "○".normal() };
        let location = format!(
            "{}:{}:{}",
            bp.file, bp.from_line, bp.from_column
        );
        match &bp.source_command {
            Some(command) => println!("  {} {} {} ({})", marker, bp.id.to_string().bold(), location, command),
            None => println!("  {} {} {}", marker, bp.id.to_string().bold(), location),
        }
    }
}

fn print_backtrace(backtrace: &Backtrace) {
    if backtrace.frames.is_empty() {
        println!("No stack");
        return;
    }

    for frame in &backtrace.frames {
        let marker = if Some(frame.number) == backtrace.current {
            "→"
        } else {
            " "
        };
        println!(
            "{} #{:<3} {} char {}  {}",
            marker,
            frame.number,
            frame.module.cyan(),
            frame.position,
            format!("pc {}", frame.pc).dimmed()
        );
    }
}

fn describe_location(location: &StopLocation) -> String {
    let position = if location.after {
        format!("after char {}", location.end)
    } else {
        format!("char {}", location.start)
    };
    format!("{} {}", location.file, position)
}

fn describe_event(event: &SessionEvent) -> String {
    match event {
        SessionEvent::StateChanged { state } => format!("state: {}", state),
        SessionEvent::Transcript { text } => format!("transcript: {:?}", text),
        SessionEvent::Location { location: Some(location) } => {
            format!("location: {}", describe_location(location))
        }
        SessionEvent::Location { location: None } => "location: none".to_string(),
        SessionEvent::Breakpoints { breakpoints } => {
            format!("breakpoints: {} set", breakpoints.len())
        }
        SessionEvent::BreakpointsHit { ids } => format!("hit: {:?}", ids),
        SessionEvent::Time { time } => format!("time: {}", time),
        SessionEvent::CommandCompleted { command, .. } => format!("completed: {}", command),
        SessionEvent::DebuggeeStarted { socket } => format!("program connected to {}", socket),
        SessionEvent::DebuggeeOutput { text } => format!("program: {:?}", text),
        SessionEvent::DebuggeeExited { code } => match code {
            Some(code) => format!("program exited with code {}", code),
            None => "program exited".to_string(),
        },
        SessionEvent::Warning { message } => format!("{} {}", "warning:".yellow(), message),
        SessionEvent::Notice { message } => format!("notice: {}", message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(lines: &[&str], from: usize) -> Vec<(usize, String)> {
        lines
            .iter()
            .enumerate()
            .map(|(i, l)| (from + i, l.to_string()))
            .collect()
    }

    #[test]
    fn test_render_delta_defers_newline_until_next_line() {
        let mut cursor = (0, 0);
        assert_eq!(render_delta(&mut cursor, &numbered(&["(ocd) "], 0)), "(ocd) ");
        assert_eq!(cursor, (0, 6));

        let out = render_delta(&mut cursor, &numbered(&["(ocd) next", "Time: 4", "(ocd) "], 0));
        assert_eq!(out, "next\nTime: 4\n(ocd) ");
        assert_eq!(cursor, (2, 6));
    }

    #[test]
    fn test_render_delta_ignores_lines_already_printed() {
        let mut cursor = (3, 2);
        let out = render_delta(&mut cursor, &numbered(&["old", "old", "old", "abcd"], 0));
        assert_eq!(out, "cd");
        assert_eq!(render_delta(&mut cursor, &numbered(&["abcd"], 3)), "");
    }

    #[test]
    fn test_debuggee_input() {
        assert_eq!(debuggee_input("42", false), "42\n");
        assert_eq!(debuggee_input("42", true), "42");
        assert_eq!(debuggee_input("^C", false), "\x03");
    }

    #[test]
    fn test_describe_location() {
        let location = StopLocation {
            file: "/src/foo.ml".to_string(),
            start: 10,
            end: 20,
            after: true,
        };
        assert_eq!(describe_location(&location), "/src/foo.ml after char 20");
    }
}
