//! Resolution of declarative kernel test documents.
//!
//! A test document lists command invocations, optionally preceded by YAML
//! front matter with command templates and overrides. Parsing yields a
//! [`Test`]; instantiating its commands against a [`TestEnvironment`] fills in
//! each command's expected output and timeout for an executor to use.
//!
//! ```
//! use kerntest::{Test, TestEnvironment};
//!
//! let mut test: Test = "sem1\n".parse().unwrap();
//! test.instantiate(&TestEnvironment::default()).unwrap();
//! assert_eq!(test.commands[0].expected_output[0].text, "sem1: SUCCESS");
//! ```

pub mod command;
pub mod document;
pub mod environment;
pub mod input;
pub mod loader;
pub mod persistence;
pub mod render;
pub mod schema;

pub use command::{Command, ExpectedOutputLine, ResolutionError};
pub use document::{ParseError, Test};
pub use environment::{TemplateLookup, TestEnvironment};
pub use input::InputLine;
pub use loader::LoadError;
pub use persistence::{DoNothingPersistence, Persistence, SqlitePersistence};
pub use render::{RenderError, TemplateEngine, TeraEngine};
pub use schema::{CommandOverride, CommandTemplate, Flag, TemplOutputLine};
