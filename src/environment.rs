//! The test environment: command template registry, fixtures and collaborators.

use crate::loader::{self, LoadError};
use crate::persistence::{DoNothingPersistence, Persistence};
use crate::render::{TemplateEngine, TeraEngine};
use crate::schema::CommandTemplate;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Default command timeout in seconds, used when neither an override nor the
/// document sets one.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: f32 = 10.0;

/// Directory under the fixtures root holding command template files.
pub const COMMANDS_DIR: &str = "commands";

/// Result of looking up a command id in the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateLookup<'a> {
    /// A registered template.
    Found(&'a CommandTemplate),
    /// Nothing registered; a template expecting `<id>: SUCCESS` stands in.
    DefaultSynthesized(CommandTemplate),
}

impl TemplateLookup<'_> {
    pub fn template(&self) -> &CommandTemplate {
        match self {
            TemplateLookup::Found(t) => t,
            TemplateLookup::DefaultSynthesized(t) => t,
        }
    }

    pub fn is_synthesized(&self) -> bool {
        matches!(self, TemplateLookup::DefaultSynthesized(_))
    }
}

/// Errors reading fixtures.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("no fixtures root configured, cannot read {}", .0.display())]
    NoRoot(PathBuf),

    #[error("failed to read fixture {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Everything a command needs to resolve against.
///
/// Cloning is cheap apart from the registry, which is copied so a test can
/// extend it without touching the base environment.
#[derive(Clone)]
pub struct TestEnvironment {
    /// Root of the fixtures tree.
    pub fixtures_root: Option<PathBuf>,
    /// Directory of the test documents being resolved.
    pub test_dir: Option<PathBuf>,
    /// Registered templates by command id.
    pub commands: HashMap<String, CommandTemplate>,
    pub persistence: Arc<dyn Persistence>,
    pub engine: Arc<dyn TemplateEngine>,
    pub default_timeout: f32,
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self {
            fixtures_root: None,
            test_dir: None,
            commands: HashMap::new(),
            persistence: Arc::new(DoNothingPersistence),
            engine: Arc::new(TeraEngine),
            default_timeout: DEFAULT_COMMAND_TIMEOUT_SECS,
        }
    }
}

impl fmt::Debug for TestEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.commands.keys().collect();
        names.sort();
        f.debug_struct("TestEnvironment")
            .field("fixtures_root", &self.fixtures_root)
            .field("test_dir", &self.test_dir)
            .field("commands", &names)
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

impl TestEnvironment {
    /// Create an environment rooted at a fixtures directory.
    ///
    /// Every template file under `<root>/commands/` is registered. The
    /// commands directory is optional; the root itself must exist.
    pub fn new(
        fixtures_root: impl Into<PathBuf>,
        persistence: Arc<dyn Persistence>,
    ) -> Result<Self, LoadError> {
        let root = fixtures_root.into();
        if !root.is_dir() {
            return Err(LoadError::MissingFixtures(root));
        }

        let mut env = Self {
            fixtures_root: Some(root.clone()),
            test_dir: Some(root.join("tests")),
            persistence,
            ..Self::default()
        };

        let commands_dir = root.join(COMMANDS_DIR);
        if commands_dir.is_dir() {
            for path in loader::find_template_files(&commands_dir)? {
                let file = loader::load_template_file(&path)?;
                debug!(path = %path.display(), count = file.templates.len(), "loaded command templates");
                for template in file.templates {
                    env.register(template);
                }
            }
        }

        Ok(env)
    }

    /// Use a different template engine.
    pub fn with_engine(mut self, engine: Arc<dyn TemplateEngine>) -> Self {
        self.engine = engine;
        self
    }

    /// Register a template, replacing any template with the same name.
    ///
    /// The template is stored as given: one registered without output lines
    /// expects no output. Returns the replaced template, if any.
    pub fn register(&mut self, template: CommandTemplate) -> Option<CommandTemplate> {
        let replaced = self.commands.insert(template.name.clone(), template);
        if let Some(old) = &replaced {
            debug!(name = %old.name, "replaced command template");
        }
        replaced
    }

    /// Look up the template for a command id, synthesizing a default one if
    /// nothing is registered.
    pub fn lookup(&self, id: &str) -> TemplateLookup<'_> {
        match self.commands.get(id) {
            Some(template) => TemplateLookup::Found(template),
            None => TemplateLookup::DefaultSynthesized(CommandTemplate::synthesized(id)),
        }
    }

    /// Look up a registered template, without falling back to a default.
    pub fn require(&self, id: &str) -> Result<&CommandTemplate, crate::command::ResolutionError> {
        self.commands
            .get(id)
            .ok_or_else(|| crate::command::ResolutionError::UnknownTemplate(id.to_string()))
    }

    /// Read a fixture file relative to the fixtures root.
    pub fn read_fixture(&self, path: &Path) -> Result<String, FixtureError> {
        let root = self
            .fixtures_root
            .as_ref()
            .ok_or_else(|| FixtureError::NoRoot(path.to_path_buf()))?;
        let full = root.join(path);
        std::fs::read_to_string(&full).map_err(|source| FixtureError::Io { path: full, source })
    }
}
