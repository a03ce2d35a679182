//! Command line tokenization.
//!
//! A body line of a test document is kept as raw text and split on demand into
//! an optional mode prefix, the command id and its arguments.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Leading tokens that select an invocation mode rather than name a command.
///
/// `$` runs the command from the shell, `p` runs a program from the kernel menu.
pub const MODE_PREFIXES: &[&str] = &["$", "p"];

/// A single command invocation as written in a test document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputLine {
    pub line: String,
}

/// The parts of an [`InputLine`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Invocation {
    /// Mode marker, only present when followed by a command id.
    pub prefix: Option<String>,
    /// Command id. Quotes and backslash escapes are kept as written.
    pub id: String,
    pub args: Vec<String>,
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<&str> = Vec::with_capacity(self.args.len() + 2);
        if let Some(prefix) = &self.prefix {
            parts.push(prefix);
        }
        if !self.id.is_empty() {
            parts.push(&self.id);
        }
        parts.extend(self.args.iter().map(String::as_str));
        write!(f, "{}", parts.join(" "))
    }
}

impl InputLine {
    pub fn new(line: impl Into<String>) -> Self {
        Self { line: line.into() }
    }

    /// Split the line into prefix, id and arguments.
    ///
    /// Tokens are separated by whitespace that is neither escaped with a
    /// backslash nor inside double quotes. Tokens are returned verbatim, so a
    /// quoted id keeps its quotes and an escaped space keeps its backslash.
    pub fn split_command(&self) -> Invocation {
        let mut tokens = tokenize(&self.line).into_iter();
        let mut first = tokens.next();

        let mut prefix = None;
        if let Some(token) = &first
            && MODE_PREFIXES.contains(&token.as_str())
            && tokens.len() > 0
        {
            prefix = first.take();
            first = tokens.next();
        }

        Invocation {
            prefix,
            id: first.unwrap_or_default(),
            args: tokens.collect(),
        }
    }

    /// The command id, without prefix or arguments.
    pub fn id(&self) -> String {
        self.split_command().id
    }

    /// Replace the whole argument tail, keeping prefix and id.
    ///
    /// The tail is always replaced as a unit; a `*` placeholder in the
    /// original line is dropped along with any other arguments.
    pub fn replace_args<S: AsRef<str>>(&mut self, new_args: &[S]) {
        let mut invocation = self.split_command();
        invocation.args = new_args.iter().map(|a| a.as_ref().to_string()).collect();
        self.line = invocation.to_string();
    }
}

impl From<&str> for InputLine {
    fn from(line: &str) -> Self {
        Self::new(line)
    }
}

fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                current.push(c);
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }

    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}
