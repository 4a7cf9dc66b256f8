//! Mock ocamldebug binary for integration testing
//!
//! Run with `-emacs` it plays the debugger: a banner, the `(ocd) ` prompt,
//! and canned answers in the shapes the real REPL prints, including the
//! manual loading handshake on `goto`. Printing a name starting with
//! `undefined` fails on stderr. Run without it, it plays the
//! debugged program: it connects to `CAML_DEBUG_SOCKET` and echoes stdin.

use std::collections::BTreeMap;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::{Duration, Instant};

const PROMPT: &str = "(ocd) ";
const SOURCE: &str = "main.ml";
const END_OF_TIME: i64 = 100;

fn main() -> io::Result<()> {
    if std::env::args().skip(1).any(|a| a == "-emacs") {
        debugger()
    } else {
        debuggee()
    }
}

fn debugger() -> io::Result<()> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    let mut state = MockState::default();
    write!(out, "\tOCaml Debugger version 5.1.0\n\n{}", PROMPT)?;
    out.flush()?;

    for line in stdin.lock().lines() {
        let line = line?;
        let reply = state.process_command(line.trim());
        match reply {
            Reply::Quit => break,
            Reply::Text(text) => write!(out, "{}{}", text, PROMPT)?,
            // errors go to stderr, like the real debugger's
            Reply::Error(text) => {
                let mut err = io::stderr();
                write!(err, "{}", text)?;
                err.flush()?;
                write!(out, "{}", PROMPT)?;
            }
        }
        out.flush()?;
    }
    Ok(())
}

enum Reply {
    Text(String),
    Error(String),
    Quit,
}

#[derive(Default)]
struct MockState {
    manual: bool,
    socket: Option<String>,
    /// Kept open for as long as the session lasts
    debuggee: Option<TcpStream>,
    time: i64,
    next_breakpoint: u32,
    breakpoints: BTreeMap<u32, usize>,
}

impl MockState {
    fn process_command(&mut self, line: &str) -> Reply {
        let mut words = line.split_whitespace();
        let verb = words.next().unwrap_or_default();
        let rest: Vec<&str> = words.collect();

        let text = match verb {
            "" => String::new(),
            "quit" | "q" => return Reply::Quit,
            "set" => self.set(&rest),
            "source" => String::new(),
            "goto" => match rest.first().and_then(|t| t.parse().ok()) {
                Some(time) => self.goto(time),
                None => "Syntax error.\n".to_string(),
            },
            "run" | "r" => self.run(),
            "reverse" => self.travel(0),
            "step" | "s" | "next" | "n" => self.travel(self.time + 1),
            "backstep" | "previous" => self.travel((self.time - 1).max(0)),
            "finish" => self.travel(self.time + 5),
            "break" | "b" => self.add_breakpoint(&rest),
            "delete" | "del" => self.remove_breakpoint(&rest),
            "backtrace" | "bt" => format!("Backtrace:\n{}#1 Pc: 0:2048 Main char 400\n", self.frame_line()),
            "frame" | "up" | "down" => format!("{}{}", self.frame_line(), self.marker()),
            "print" | "p" | "display" => match rest.join(" ") {
                expr if expr.starts_with("undefined") => {
                    return Reply::Error(format!("Unbound identifier {}\n", expr))
                }
                expr => format!("{}: int = 42\n", expr),
            },
            _ => "Syntax error.\n".to_string(),
        };
        Reply::Text(text)
    }

    fn set(&mut self, rest: &[&str]) -> String {
        match rest {
            ["loadingmode", "manual"] => self.manual = true,
            ["socket", socket] => self.socket = Some(socket.to_string()),
            _ => {}
        }
        String::new()
    }

    fn goto(&mut self, time: i64) -> String {
        let mut text = String::new();
        if self.debuggee.is_none() {
            match self.load() {
                Ok(loading) => text.push_str(&loading),
                Err(e) => return format!("Loading program... failed: {}\n", e),
            }
        }
        text.push_str(&self.travel(time));
        text
    }

    /// Manual loading: announce the socket, then wait for the program
    fn load(&mut self) -> io::Result<String> {
        let Some(socket) = self.socket.clone().filter(|_| self.manual) else {
            return Ok("Loading program... done.\n".to_string());
        };

        let listener = TcpListener::bind(&socket)?;
        let mut out = io::stdout();
        writeln!(out, "Loading program... Waiting for connection...(the socket is {})", socket)?;
        out.flush()?;

        listener.set_nonblocking(true)?;
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            match listener.accept() {
                Ok((stream, _)) => {
                    self.debuggee = Some(stream);
                    return Ok("done.\n".to_string());
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock && Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(20));
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn run(&mut self) -> String {
        let next_hit = self.breakpoints.keys().next().copied();
        match next_hit {
            Some(id) if self.time < END_OF_TIME - 10 => {
                self.time += 10;
                format!("{}Breakpoint: {}\n{}", self.time_line(), id, self.marker())
            }
            _ => {
                self.time = END_OF_TIME;
                format!("Time: {}\nProgram exit.\n\x1A\x1AH\n", self.time)
            }
        }
    }

    fn travel(&mut self, time: i64) -> String {
        self.time = time.min(END_OF_TIME);
        if self.time == 0 {
            return "Time: 0\nBeginning of program.\n\x1A\x1AH\n".to_string();
        }
        format!("{}{}", self.time_line(), self.marker())
    }

    /// `break @ Module # offset`
    fn add_breakpoint(&mut self, rest: &[&str]) -> String {
        let offset = match rest {
            ["@", _, "#", offset] => offset.parse().ok(),
            _ => None,
        };
        let Some(offset) = offset else {
            return "Syntax error.\n".to_string();
        };

        self.next_breakpoint += 1;
        let id = self.next_breakpoint;
        self.breakpoints.insert(id, offset);
        format!("Breakpoint {} at 0:{} : {}\n", id, 4096 + offset, describe(offset))
    }

    fn remove_breakpoint(&mut self, rest: &[&str]) -> String {
        let id: Option<u32> = rest.first().and_then(|id| id.parse().ok());
        match id.and_then(|id| self.breakpoints.remove(&id).map(|offset| (id, offset))) {
            Some((id, offset)) => format!(
                "Removed breakpoint {} at 0:{} : {}\n",
                id,
                4096 + offset,
                describe(offset)
            ),
            None => format!("No breakpoint number {}.\n", rest.join(" ")),
        }
    }

    fn position(&self) -> i64 {
        self.time * 10
    }

    fn time_line(&self) -> String {
        format!("Time: {} - pc: 0:{} - module Main\n", self.time, 4096 + self.position())
    }

    fn frame_line(&self) -> String {
        format!("#0 Pc: 0:{} Main char {}\n", 4096 + self.position(), self.position())
    }

    fn marker(&self) -> String {
        format!("\x1A\x1AM{}:{}:{}:before\n", SOURCE, self.position(), self.position() + 5)
    }
}

/// `file main.ml, line L, characters A-B` for a character offset
fn describe(offset: usize) -> String {
    format!(
        "file {}, line {}, characters {}-{}",
        SOURCE,
        offset / 10 + 1,
        offset % 10,
        offset % 10 + 5
    )
}

/// The debugged program: connect back, then echo stdin until the debugger goes away
fn debuggee() -> io::Result<()> {
    let socket = std::env::var("CAML_DEBUG_SOCKET")
        .map_err(|_| io::Error::new(io::ErrorKind::NotFound, "CAML_DEBUG_SOCKET not set"))?;
    let mut connection = TcpStream::connect(&socket)?;

    let mut out = io::stdout();
    writeln!(out, "debuggee connected to {}", socket)?;
    out.flush()?;

    std::thread::spawn(move || {
        let mut sink = [0u8; 256];
        while matches!(connection.read(&mut sink), Ok(n) if n > 0) {}
        std::process::exit(0);
    });

    for line in BufReader::new(io::stdin()).lines() {
        let line = line?;
        writeln!(out, "debuggee read: {}", line)?;
        out.flush()?;
    }
    Ok(())
}
