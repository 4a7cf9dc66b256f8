//! Breakpoint store and restore protocol
//!
//! Breakpoints live in the debugger process and die with it. The store
//! mirrors them from the debugger's own messages and persists, after every
//! change, the list of commands that recreate them. After each start the
//! list is replayed. A replay that recreates nothing leaves the persisted
//! list alone, so a moved source file or a changed debugger does not wipe
//! out the user's breakpoints.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::command::Command;
use crate::common::settings::{self, SharedSettings};
use crate::common::{Error, Result};

static STANDARD_BREAK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^break +@ +\S+ +(?:# +[0-9]+|[0-9]+ +[0-9]+)$").expect("must compile")
});

/// A breakpoint as reported by the debugger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub id: u32,
    pub file: String,
    pub from_line: u32,
    pub to_line: u32,
    pub from_column: u32,
    pub to_column: u32,
    /// Exact command that recreates this breakpoint, when it was not set by position
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_command: Option<String>,
    /// Reported as hit at the current stop
    #[serde(default)]
    pub hit: bool,
}

impl Breakpoint {
    /// Command that recreates this breakpoint in a fresh debugger
    pub fn replay_command(&self) -> String {
        match &self.source_command {
            Some(command) => command.clone(),
            None => break_at_position(
                &module_name(Path::new(&self.file)),
                self.from_line,
                self.from_column,
            ),
        }
    }
}

/// OCaml module name for a source file: base name, lowercased, first letter capitalized
pub fn module_name(file: &Path) -> String {
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let base = name.split('.').next().unwrap_or_default().to_lowercase();

    let mut chars = base.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// `break @ <Module> <line> <column>`
pub fn break_at_position(module: &str, line: u32, column: u32) -> String {
    format!("break @ {} {} {}", module, line, column)
}

/// `break @ <Module> # <offset>`
pub fn break_at_offset(module: &str, offset: usize) -> String {
    format!("break @ {} # {}", module, offset)
}

/// Character offset of `line` (1-based) and `column` (0-based) in `source`
pub fn offset_of(source: &[u8], line: u32, column: u32) -> Result<usize> {
    if line == 0 {
        return Err(Error::InvalidLocation("lines start at 1".to_string()));
    }

    let mut line_start = 0;
    for _ in 1..line {
        match source[line_start..].iter().position(|&b| b == b'\n') {
            Some(idx) => line_start += idx + 1,
            None => {
                return Err(Error::InvalidLocation(format!(
                    "line {} is past the end of the file",
                    line
                )))
            }
        }
    }

    let line_len = source[line_start..]
        .iter()
        .position(|&b| b == b'\n')
        .unwrap_or(source.len() - line_start);
    if column as usize > line_len {
        return Err(Error::InvalidLocation(format!(
            "column {} is past the end of line {} ({} characters)",
            column, line, line_len
        )));
    }

    Ok(line_start + column as usize)
}

/// `break` command for a source position, addressed by character offset
pub fn break_command_for(file: &Path, line: u32, column: u32) -> Result<String> {
    let source = std::fs::read(file).map_err(|e| Error::file_read(file, &e))?;
    let offset = offset_of(&source, line, column)?;
    let module = module_name(file);
    if module.is_empty() {
        return Err(Error::InvalidLocation(format!(
            "no module name for {}",
            file.display()
        )));
    }
    Ok(break_at_offset(&module, offset))
}

/// Whether the first word of `command` abbreviates `break`
pub fn is_break_command(command: &str) -> bool {
    command
        .split_whitespace()
        .next()
        .map(|word| "break".starts_with(word))
        .unwrap_or(false)
}

/// The command to remember for a breakpoint created while `in_flight` ran
///
/// Breakpoints set by position are recreated from their reported location;
/// any other form of `break` is kept verbatim.
pub fn source_command_for(in_flight: Option<&str>) -> Option<String> {
    let command = in_flight?.trim();
    if is_break_command(command) && !STANDARD_BREAK_RE.is_match(command) {
        Some(command.to_string())
    } else {
        None
    }
}

#[derive(Debug)]
struct Restore {
    remaining: usize,
    persisted: Vec<String>,
}

/// Live breakpoints of the current debugger process
pub struct BreakpointStore {
    breakpoints: BTreeMap<u32, Breakpoint>,
    settings: SharedSettings,
    restore: Option<Restore>,
}

impl BreakpointStore {
    pub fn new(settings: SharedSettings) -> Self {
        Self {
            breakpoints: BTreeMap::new(),
            settings,
            restore: None,
        }
    }

    pub fn list(&self) -> Vec<Breakpoint> {
        self.breakpoints.values().cloned().collect()
    }

    pub fn get(&self, id: u32) -> Option<&Breakpoint> {
        self.breakpoints.get(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty()
    }

    /// Forget all live breakpoints and any restore in progress; the
    /// persisted list is untouched
    pub fn clear(&mut self) {
        self.breakpoints.clear();
        self.restore = None;
    }

    /// Start restoring into a fresh debugger
    ///
    /// Clears the store and returns the persisted commands to replay, in
    /// their original order.
    pub fn begin_restore(&mut self) -> Vec<Command> {
        self.breakpoints.clear();
        let persisted = settings::lock(&self.settings).breakpoint_commands();
        tracing::debug!(count = persisted.len(), "Restoring breakpoints");

        let commands = persisted.iter().map(Command::replay).collect();
        self.restore = if persisted.is_empty() {
            None
        } else {
            Some(Restore {
                remaining: persisted.len(),
                persisted,
            })
        };
        commands
    }

    /// One replay command completed (or was dropped)
    pub fn replay_done(&mut self) {
        let Some(restore) = self.restore.as_mut() else {
            return;
        };
        restore.remaining = restore.remaining.saturating_sub(1);
        if restore.remaining > 0 {
            return;
        }

        let restore = self.restore.take();
        if self.breakpoints.is_empty() {
            if let Some(restore) = restore {
                // nothing came back; keep the old list for the next attempt
                tracing::debug!(
                    persisted = restore.persisted.len(),
                    "Breakpoint restore recreated nothing, keeping persisted list"
                );
            }
            return;
        }
        self.persist();
    }

    /// The debugger confirmed a new breakpoint
    pub fn on_created(
        &mut self,
        id: u32,
        file: &str,
        line: u32,
        from_column: u32,
        to_column: u32,
        source_command: Option<String>,
    ) {
        tracing::debug!(id, file, line, "Breakpoint created");
        self.breakpoints.insert(
            id,
            Breakpoint {
                id,
                file: file.to_string(),
                from_line: line,
                to_line: line,
                from_column,
                to_column,
                source_command,
                hit: false,
            },
        );
        self.persist();
    }

    /// The debugger removed a breakpoint; returns whether it was known
    pub fn on_removed(&mut self, id: u32) -> bool {
        let known = self.breakpoints.remove(&id).is_some();
        tracing::debug!(id, known, "Breakpoint removed");
        self.persist();
        known
    }

    /// Mark exactly `ids` as hit
    pub fn on_hit(&mut self, ids: &[u32]) {
        let hit: BTreeSet<u32> = ids.iter().copied().collect();
        for (id, bp) in self.breakpoints.iter_mut() {
            bp.hit = hit.contains(id);
        }
    }

    pub fn clear_hits(&mut self) {
        for bp in self.breakpoints.values_mut() {
            bp.hit = false;
        }
    }

    /// Commands recreating the live breakpoints, in id order
    pub fn replay_commands(&self) -> Vec<String> {
        self.breakpoints
            .values()
            .map(Breakpoint::replay_command)
            .collect()
    }

    fn persist(&self) {
        if self.restore.is_some() {
            return;
        }
        let commands = self.replay_commands();
        if let Err(e) = settings::lock(&self.settings).set_breakpoint_commands(&commands) {
            tracing::warn!(error = %e, "Could not persist breakpoints");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::settings::{shared, MemorySettings, PersistedState};
    use tempfile::tempdir;

    fn store_with(commands: &[&str]) -> (BreakpointStore, SharedSettings) {
        let settings = shared(MemorySettings::with_state(PersistedState {
            breakpoint_commands: commands.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        }));
        (BreakpointStore::new(settings.clone()), settings)
    }

    fn persisted(settings: &SharedSettings) -> Vec<String> {
        settings::lock(settings).breakpoint_commands()
    }

    #[test]
    fn test_module_name() {
        assert_eq!(module_name(Path::new("foo.ml")), "Foo");
        assert_eq!(module_name(Path::new("/src/lib/my_mod.ml")), "My_mod");
        assert_eq!(module_name(Path::new("Parser.pp.ml")), "Parser");
        assert_eq!(module_name(Path::new("")), "");
    }

    #[test]
    fn test_offset_of() {
        let source = b"let x = 1\nlet y = 2\n\nlet z = 3";
        assert_eq!(offset_of(source, 1, 0).unwrap(), 0);
        assert_eq!(offset_of(source, 1, 4).unwrap(), 4);
        assert_eq!(offset_of(source, 2, 4).unwrap(), 14);
        assert_eq!(offset_of(source, 3, 0).unwrap(), 20);
        assert_eq!(offset_of(source, 4, 8).unwrap(), 29);
        assert!(matches!(offset_of(source, 5, 0), Err(Error::InvalidLocation(_))));
        assert!(matches!(offset_of(source, 1, 40), Err(Error::InvalidLocation(_))));
        assert!(matches!(offset_of(source, 0, 0), Err(Error::InvalidLocation(_))));
    }

    #[test]
    fn test_break_command_for_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("main.ml");
        std::fs::write(&file, "let () =\n  print_endline \"hi\"\n").unwrap();
        assert_eq!(break_command_for(&file, 2, 2).unwrap(), "break @ Main # 11");
    }

    #[test]
    fn test_source_command_rule() {
        assert_eq!(source_command_for(Some("break @ Foo 12 5")), None);
        assert_eq!(source_command_for(Some("break @ Foo # 120")), None);
        assert_eq!(
            source_command_for(Some("break Foo.bar")),
            Some("break Foo.bar".to_string())
        );
        assert_eq!(source_command_for(Some("b 4410")), Some("b 4410".to_string()));
        assert_eq!(source_command_for(Some("print x")), None);
        assert_eq!(source_command_for(Some("backtrace")), None);
        assert_eq!(source_command_for(None), None);
    }

    #[test]
    fn test_created_then_removed_leaves_nothing() {
        let (mut store, settings) = store_with(&[]);
        store.on_created(3, "foo.ml", 12, 5, 9, None);
        assert_eq!(persisted(&settings), vec!["break @ Foo 12 5"]);

        assert!(store.on_removed(3));
        assert!(store.get(3).is_none());
        assert!(persisted(&settings).is_empty());
    }

    #[test]
    fn test_created_breakpoint_location() {
        let (mut store, _settings) = store_with(&[]);
        store.on_created(3, "foo.ml", 12, 5, 9, None);
        let bp = store.get(3).unwrap();
        assert_eq!(
            (bp.file.as_str(), bp.from_line, bp.to_line, bp.from_column, bp.to_column),
            ("foo.ml", 12, 12, 5, 9)
        );
    }

    #[test]
    fn test_source_command_is_persisted_verbatim() {
        let (mut store, settings) = store_with(&[]);
        store.on_created(1, "a.ml", 1, 0, 4, Some("break A.main".to_string()));
        store.on_created(2, "b.ml", 7, 2, 8, None);
        assert_eq!(persisted(&settings), vec!["break A.main", "break @ B 7 2"]);
    }

    #[test]
    fn test_failed_restore_keeps_persisted_list() {
        let (mut store, settings) = store_with(&["break @ Foo 1 0", "break @ Bar 2 0"]);
        let commands = store.begin_restore();
        assert_eq!(commands.len(), 2);
        assert!(store.restore.is_some());

        store.replay_done();
        store.replay_done();

        assert!(store.restore.is_none());
        assert!(store.is_empty());
        assert_eq!(persisted(&settings), vec!["break @ Foo 1 0", "break @ Bar 2 0"]);
    }

    #[test]
    fn test_partial_restore_rewrites_list() {
        let (mut store, settings) = store_with(&["break @ Foo 1 0", "break @ Gone 2 0"]);
        store.begin_restore();

        store.on_created(1, "foo.ml", 1, 0, 3, None);
        // still restoring: nothing rewritten yet
        assert_eq!(persisted(&settings).len(), 2);
        store.replay_done();
        store.replay_done();

        assert_eq!(persisted(&settings), vec!["break @ Foo 1 0"]);
    }

    #[test]
    fn test_restore_replays_in_order() {
        let (mut store, settings) = store_with(&["break A.f", "break @ B 3 1"]);
        // a live entry from an earlier process, not persisted mid-restore
        store.begin_restore();
        store.on_created(9, "stale.ml", 1, 0, 1, None);
        assert_eq!(persisted(&settings).len(), 2);

        let commands = store.begin_restore();
        let texts: Vec<&str> = commands.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["break A.f", "break @ B 3 1"]);
        assert!(store.is_empty());
    }

    #[test]
    fn test_restore_with_nothing_persisted() {
        let (mut store, _settings) = store_with(&[]);
        assert!(store.begin_restore().is_empty());
        assert!(store.restore.is_none());
    }

    #[test]
    fn test_clear_abandons_restore_without_persisting() {
        let (mut store, settings) = store_with(&["break @ Foo 1 0", "break @ Bar 2 0"]);
        store.begin_restore();
        store.on_created(1, "foo.ml", 1, 0, 3, None);

        store.clear();
        assert!(store.is_empty());
        assert!(store.restore.is_none());
        assert_eq!(persisted(&settings), vec!["break @ Foo 1 0", "break @ Bar 2 0"]);
    }

    #[test]
    fn test_hits() {
        let (mut store, _settings) = store_with(&[]);
        store.on_created(1, "a.ml", 1, 0, 1, None);
        store.on_created(2, "a.ml", 2, 0, 1, None);
        store.on_hit(&[2]);
        assert!(!store.get(1).unwrap().hit);
        assert!(store.get(2).unwrap().hit);
        store.clear_hits();
        assert!(!store.get(2).unwrap().hit);
    }
}
