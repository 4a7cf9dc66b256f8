//! Command-line splitting between debugger flags and the debugged program
//!
//! A command line such as `-I _build ./prog.byte --verbose input.txt` mixes
//! debugger flags and the target invocation without a separator. The first
//! token naming an existing, executable, non-directory file is the target;
//! everything before it goes to the debugger and everything after it to the
//! target.

use std::path::{Path, PathBuf};

/// Flag that makes the debugger emit `\x1A\x1A` location markers
pub const EMACS_FLAG: &str = "-emacs";

/// A classified command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Arguments {
    tokens: Vec<String>,
    debugger_args: Vec<String>,
    target: Option<PathBuf>,
    target_args: Vec<String>,
}

impl Arguments {
    /// Classify already-unescaped tokens
    pub fn classify(tokens: Vec<String>) -> Self {
        let split_at = tokens.iter().position(|t| is_executable_file(Path::new(t)));

        let (debugger_args, target, target_args) = match split_at {
            Some(idx) => {
                let path = Path::new(&tokens[idx]);
                let target = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
                (
                    tokens[..idx].to_vec(),
                    Some(target),
                    tokens[idx + 1..].to_vec(),
                )
            }
            None => (tokens.clone(), None, Vec::new()),
        };

        Self {
            tokens,
            debugger_args,
            target,
            target_args,
        }
    }

    /// Split a quoted command line and classify it
    pub fn parse(line: &str) -> Self {
        Self::classify(split(line))
    }

    /// Flags for the debugger (everything before the target)
    pub fn debugger_args(&self) -> &[String] {
        &self.debugger_args
    }

    /// Absolute path of the debugged program, if one was found
    pub fn target(&self) -> Option<&Path> {
        self.target.as_deref()
    }

    /// Arguments for the debugged program (everything after the target)
    pub fn target_args(&self) -> &[String] {
        &self.target_args
    }

    /// Argument vector for the debugger process:
    /// `[-emacs, extra..., debugger flags..., target, target args...]`
    pub fn launch_args(&self, extra: &[String], emacs: bool) -> Vec<String> {
        let mut args = Vec::with_capacity(
            extra.len() + self.debugger_args.len() + self.target_args.len() + 2,
        );
        if emacs && !self.debugger_args.iter().any(|a| a == EMACS_FLAG) {
            args.push(EMACS_FLAG.to_string());
        }
        args.extend(extra.iter().cloned());
        args.extend(self.debugger_args.iter().cloned());
        if let Some(target) = &self.target {
            args.push(target.to_string_lossy().into_owned());
            args.extend(self.target_args.iter().cloned());
        }
        args
    }

    /// Serialize the tokens back into one line
    pub fn to_command_line(&self) -> String {
        join(&self.tokens)
    }
}

/// Whether `path` is an existing, executable, non-directory file
#[cfg(unix)]
pub fn is_executable_file(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

#[cfg(windows)]
pub fn is_executable_file(path: &Path) -> bool {
    const EXTENSIONS: [&str; 4] = ["exe", "com", "bat", "cmd"];
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| EXTENSIONS.iter().any(|x| x.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
}

fn needs_quoting(token: &str) -> bool {
    token.is_empty() || token.chars().any(|c| c.is_whitespace() || c == '"' || c == '\\')
}

/// Join tokens into one line that [`split`] turns back into the same tokens
pub fn join(tokens: &[String]) -> String {
    tokens
        .iter()
        .map(|token| {
            if !needs_quoting(token) {
                return token.clone();
            }
            let mut quoted = String::with_capacity(token.len() + 2);
            quoted.push('"');
            for c in token.chars() {
                if c == '"' || c == '\\' {
                    quoted.push('\\');
                }
                quoted.push(c);
            }
            quoted.push('"');
            quoted
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split a line into tokens
///
/// Whitespace outside double quotes separates tokens, a backslash escapes the
/// next character, and `""` yields an empty token. An unterminated quote runs
/// to the end of the line.
pub fn split(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut in_quotes = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                in_token = true;
                // trailing backslash stays literal
                current.push(chars.next().unwrap_or('\\'));
            }
            '"' => {
                in_token = true;
                in_quotes = !in_quotes;
            }
            c if c.is_whitespace() && !in_quotes => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                in_token = true;
                current.push(c);
            }
        }
    }

    if in_token {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[cfg(unix)]
    fn make_executable(path: &Path) {
        use std::os::unix::fs::PermissionsExt;
        std::fs::write(path, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_first_executable_splits_the_line() {
        let dir = tempdir().unwrap();
        let prog = dir.path().join("prog.byte");
        make_executable(&prog);
        let prog_str = prog.to_string_lossy().into_owned();

        let args = Arguments::classify(vec![
            "-I".to_string(),
            "_build".to_string(),
            prog_str.clone(),
            "--verbose".to_string(),
            "input.txt".to_string(),
        ]);

        assert_eq!(args.debugger_args(), &strings(&["-I", "_build"])[..]);
        assert_eq!(
            args.target(),
            Some(std::fs::canonicalize(&prog).unwrap().as_path())
        );
        assert_eq!(args.target_args(), &strings(&["--verbose", "input.txt"])[..]);
    }

    #[cfg(unix)]
    #[test]
    fn test_only_first_executable_wins() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("first");
        let second = dir.path().join("second");
        make_executable(&first);
        make_executable(&second);

        let args = Arguments::classify(vec![
            first.to_string_lossy().into_owned(),
            second.to_string_lossy().into_owned(),
        ]);

        assert!(args.debugger_args().is_empty());
        assert_eq!(args.target().unwrap().file_name().unwrap(), "first");
        assert_eq!(args.target_args(), &[second.to_string_lossy().into_owned()][..]);
    }

    #[cfg(unix)]
    #[test]
    fn test_directories_and_plain_files_are_skipped() {
        let dir = tempdir().unwrap();
        let plain = dir.path().join("notes.txt");
        std::fs::write(&plain, "x").unwrap();

        let tokens = vec![
            dir.path().to_string_lossy().into_owned(),
            plain.to_string_lossy().into_owned(),
            "-debug".to_string(),
        ];
        let args = Arguments::classify(tokens.clone());

        assert_eq!(args.target(), None);
        assert_eq!(args.debugger_args(), &tokens[..]);
        assert!(args.target_args().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_launch_args_layout() {
        let dir = tempdir().unwrap();
        let prog = dir.path().join("prog");
        make_executable(&prog);

        let args = Arguments::classify(vec![
            "-I".to_string(),
            "lib".to_string(),
            prog.to_string_lossy().into_owned(),
            "arg".to_string(),
        ]);
        let launch = args.launch_args(&strings(&["-s", "/tmp/sock"]), true);
        let target = std::fs::canonicalize(&prog).unwrap().to_string_lossy().into_owned();

        assert_eq!(
            launch,
            strings(&["-emacs", "-s", "/tmp/sock", "-I", "lib", &target, "arg"])
        );
    }

    #[test]
    fn test_emacs_flag_not_duplicated() {
        let args = Arguments::classify(strings(&["-emacs", "-I", "lib"]));
        assert_eq!(args.launch_args(&[], true), strings(&["-emacs", "-I", "lib"]));
        assert_eq!(args.launch_args(&[], false), strings(&["-emacs", "-I", "lib"]));
    }

    #[test]
    fn test_split_quotes_and_escapes() {
        assert_eq!(
            split(r#"a "b c" d\ e "" "say \"hi\"" back\\slash"#),
            strings(&["a", "b c", "d e", "", "say \"hi\"", "back\\slash"])
        );
    }

    #[test]
    fn test_split_collapses_whitespace() {
        assert_eq!(split("  run \t  -x   "), strings(&["run", "-x"]));
        assert!(split("   ").is_empty());
    }

    #[test]
    fn test_join_then_split_preserves_tokens() {
        let cases = [
            strings(&["plain", "words"]),
            strings(&["", "empty", ""]),
            strings(&["with space", "tab\there"]),
            strings(&["say \"hi\"", "\""]),
            strings(&["C:\\path\\to", "trailing\\"]),
            strings(&["mixed \\\" both"]),
        ];
        for tokens in cases {
            assert_eq!(split(&join(&tokens)), tokens, "line: {}", join(&tokens));
        }
    }

    #[test]
    fn test_join_leaves_simple_tokens_bare() {
        assert_eq!(join(&strings(&["-I", "lib", "prog"])), "-I lib prog");
        assert_eq!(join(&strings(&[""])), "\"\"");
    }
}
