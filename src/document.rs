//! Test documents.
//!
//! A document is optional YAML front matter between `---` lines followed by a
//! body with one command per line:
//!
//! ```text
//! ---
//! name: sync
//! commandoverrides:
//!   - name: sem1
//!     timeout: 30.0
//! ---
//! sem1
//! $ /testbin/add 70 200
//! ```

use crate::command::{Command, DocumentScope, ResolutionError};
use crate::environment::TestEnvironment;
use crate::input::InputLine;
use crate::render::{fresh_rng, seeded_rng};
use crate::schema::{CommandTemplate, FrontMatter};
use gray_matter::engine::Engine;
use gray_matter::{Matter, Pod};
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Delimiter line around front matter.
pub const FRONT_MATTER_DELIMITER: &str = "---";

/// Error parsing a test document.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid front matter: {0}")]
    FrontMatter(#[from] serde_yaml::Error),

    #[error("front matter is not terminated by `---`")]
    Unterminated,

    #[error("more than one override for `{0}`")]
    DuplicateOverride(String),

    #[error("{0} with an empty name")]
    EmptyName(&'static str),
}

/// A parsed test document.
#[derive(Debug, Clone, Serialize)]
pub struct Test {
    /// Name from the front matter, or the file stem when loaded from disk.
    pub name: String,
    pub front_matter: FrontMatter,
    /// Commands in body order. Not instantiated until [`Test::instantiate`].
    pub commands: Vec<Command>,
}

impl FromStr for Test {
    type Err = ParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let (yaml, body) = split_front_matter(text)?;
        let mut front_matter: FrontMatter = match yaml.as_deref() {
            Some(yaml) if !yaml.trim().is_empty() => serde_yaml::from_str(yaml)?,
            _ => FrontMatter::default(),
        };

        front_matter.templates = std::mem::take(&mut front_matter.templates)
            .into_iter()
            .map(CommandTemplate::with_default_output)
            .collect();
        if front_matter.templates.iter().any(|t| t.name.is_empty()) {
            return Err(ParseError::EmptyName("template"));
        }

        let mut overrides = HashMap::new();
        for over in &front_matter.command_overrides {
            if over.name.is_empty() {
                return Err(ParseError::EmptyName("command override"));
            }
            if overrides.insert(over.name.clone(), over.clone()).is_some() {
                return Err(ParseError::DuplicateOverride(over.name.clone()));
            }
        }

        let scope = Arc::new(DocumentScope {
            overrides,
            timeout: front_matter.timeout,
        });

        let commands = body
            .lines()
            .filter(|line| {
                let trimmed = line.trim_start();
                !trimmed.is_empty() && !trimmed.starts_with('#')
            })
            .map(|line| Command::with_scope(InputLine::new(line), scope.clone()))
            .collect();

        Ok(Test {
            name: front_matter.name.clone().unwrap_or_default(),
            front_matter,
            commands,
        })
    }
}

impl Test {
    /// The first command with the given id.
    pub fn command(&self, id: &str) -> Option<&Command> {
        self.commands.iter().find(|c| c.id() == id)
    }

    pub fn command_mut(&mut self, id: &str) -> Option<&mut Command> {
        self.commands.iter_mut().find(|c| c.id() == id)
    }

    /// The base environment extended with this document's templates.
    pub fn environment(&self, base: &TestEnvironment) -> TestEnvironment {
        let mut env = base.clone();
        for template in &self.front_matter.templates {
            env.register(template.clone());
        }
        env
    }

    /// Instantiate every command, each with a fresh random source.
    pub fn instantiate(&mut self, base: &TestEnvironment) -> Result<(), ResolutionError> {
        let env = self.environment(base);
        for command in &mut self.commands {
            command.instantiate_with(&env, &fresh_rng())?;
        }
        self.record(&env);
        Ok(())
    }

    /// Instantiate every command deterministically. Command `i` uses `seed + i`.
    pub fn instantiate_seeded(
        &mut self,
        base: &TestEnvironment,
        seed: u64,
    ) -> Result<(), ResolutionError> {
        let env = self.environment(base);
        for (i, command) in self.commands.iter_mut().enumerate() {
            command.instantiate_with(&env, &seeded_rng(seed.wrapping_add(i as u64)))?;
        }
        self.record(&env);
        Ok(())
    }

    fn record(&self, env: &TestEnvironment) {
        if !self.front_matter.persistence.record {
            debug!(test = %self.name, "persistence disabled by document");
            return;
        }
        for command in &self.commands {
            if let Err(e) = env.persistence.record_command(&self.name, command) {
                warn!(test = %self.name, line = %command.input.line, error = %e, "failed to record command");
            }
        }
    }
}

/// Front matter engine that hands the raw YAML back for serde to parse.
struct RawYaml;

impl Engine for RawYaml {
    fn parse(_: &str) -> Pod {
        Pod::Null
    }
}

/// Split a document into front matter (if any) and body.
///
/// Blank lines before the opening delimiter are ignored.
fn split_front_matter(text: &str) -> Result<(Option<String>, String), ParseError> {
    let leading: usize = text
        .split_inclusive('\n')
        .take_while(|line| line.trim().is_empty())
        .map(str::len)
        .sum();
    let rest = &text[leading..];

    let mut lines = rest.lines();
    if lines.next().map(str::trim_end) != Some(FRONT_MATTER_DELIMITER) {
        return Ok((None, text.to_string()));
    }
    if !lines.any(|line| line.trim_end() == FRONT_MATTER_DELIMITER) {
        return Err(ParseError::Unterminated);
    }

    let parsed = Matter::<RawYaml>::new().parse(rest);
    Ok((Some(parsed.matter), parsed.content))
}
