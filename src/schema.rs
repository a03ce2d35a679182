//! Schema definitions for test documents and command template files.
//!
//! Test documents carry YAML front matter; template files hold a list of
//! command templates. Both are deserialized into these types.

use schemars::JsonSchema;
use schemars::r#gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Loosely typed boolean from a document.
///
/// Accepts YAML booleans as well as the strings `"true"` and `"false"`.
/// Any other string or value reads as `False`; an absent field is `Unset`,
/// which also behaves as false.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "FlagRepr", into = "String")]
pub enum Flag {
    #[default]
    Unset,
    True,
    False,
}

impl Flag {
    pub fn is_true(self) -> bool {
        self == Flag::True
    }

    pub fn is_unset(&self) -> bool {
        *self == Flag::Unset
    }
}

impl From<bool> for Flag {
    fn from(b: bool) -> Self {
        if b { Flag::True } else { Flag::False }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FlagRepr {
    Bool(bool),
    Text(String),
    Other(IgnoredAny),
}

impl From<FlagRepr> for Flag {
    fn from(repr: FlagRepr) -> Self {
        match repr {
            FlagRepr::Bool(b) => b.into(),
            FlagRepr::Text(s) => (s.trim() == "true").into(),
            FlagRepr::Other(_) => Flag::False,
        }
    }
}

impl JsonSchema for Flag {
    fn schema_name() -> String {
        "Flag".to_string()
    }

    fn json_schema(_: &mut SchemaGenerator) -> Schema {
        let mut schema = SchemaObject {
            instance_type: Some(vec![InstanceType::Boolean, InstanceType::String].into()),
            ..SchemaObject::default()
        };
        schema.metadata().description =
            Some("A boolean, or the string \"true\" or \"false\".".to_string());
        schema.into()
    }
}

impl From<Flag> for String {
    fn from(flag: Flag) -> String {
        if flag.is_true() { "true" } else { "false" }.to_string()
    }
}

/// Where an output line definition came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LineOrigin {
    /// Written in a document or registered in code.
    #[default]
    Declared,
    /// Generated for a template that declared no output.
    Synthesized,
}

/// One expected output line of a command template, before resolution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TemplOutputLine {
    /// Output text. May contain template expressions and expand to several lines.
    #[serde(default)]
    pub text: String,

    /// Whether a match on this line counts with full confidence (default: false).
    #[serde(default, skip_serializing_if = "Flag::is_unset")]
    pub trusted: Flag,

    /// Whether `text` names another command whose output is expected here.
    #[serde(default, skip_serializing_if = "Flag::is_unset")]
    pub external: Flag,

    /// Fixture file, relative to the fixtures root, whose contents replace `text`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixture: Option<PathBuf>,

    #[serde(skip)]
    #[schemars(skip)]
    pub origin: LineOrigin,
}

impl TemplOutputLine {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// The `<name>: SUCCESS` line expected from a command with no declared output.
    pub fn success(name: &str) -> Self {
        Self {
            text: format!("{name}: SUCCESS"),
            trusted: Flag::True,
            external: Flag::False,
            fixture: None,
            origin: LineOrigin::Synthesized,
        }
    }

    pub fn trusted(mut self, trusted: bool) -> Self {
        self.trusted = trusted.into();
        self
    }

    pub fn external(mut self, external: bool) -> Self {
        self.external = external.into();
        self
    }
}

/// A named, reusable definition of a command's input and expected output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CommandTemplate {
    /// Command id this template applies to.
    pub name: String,

    /// Input patterns. One is rendered when the command is invoked without arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub input: Vec<String>,

    /// Expected output lines.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output: Vec<TemplOutputLine>,
}

impl CommandTemplate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// The template used for a command id nobody registered.
    pub fn synthesized(name: &str) -> Self {
        Self {
            name: name.to_string(),
            input: Vec::new(),
            output: vec![TemplOutputLine::success(name)],
        }
    }

    /// Give a template loaded from a document its default output if it declared none.
    pub(crate) fn with_default_output(mut self) -> Self {
        if self.output.is_empty() {
            self.output.push(TemplOutputLine::success(&self.name));
        }
        self
    }
}

/// Per-document replacement of a template's output and/or timeout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CommandOverride {
    /// Command id this override applies to.
    pub name: String,

    /// Full replacement of the template's output lines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Vec<TemplOutputLine>>,

    /// Timeout in seconds for this command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f32>,
}

/// Persistence directives of a test document.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PersistenceDirective {
    /// Record resolved commands in the persistence store (default: true).
    #[serde(default = "default_record")]
    pub record: bool,
}

impl Default for PersistenceDirective {
    fn default() -> Self {
        Self { record: true }
    }
}

fn default_record() -> bool {
    true
}

/// Front matter of a test document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct FrontMatter {
    /// Test name. Defaults to the file stem when loaded from disk.
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Names of tests that must pass before this one.
    #[serde(default)]
    pub depends: Vec<String>,

    /// Default timeout in seconds for every command in the document.
    #[serde(default)]
    pub timeout: Option<f32>,

    /// Templates registered for this document only.
    #[serde(default)]
    pub templates: Vec<CommandTemplate>,

    /// Per-command overrides, at most one per name.
    #[serde(default, rename = "commandoverrides")]
    pub command_overrides: Vec<CommandOverride>,

    #[serde(default)]
    pub persistence: PersistenceDirective,
}

/// A file holding command templates.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CommandTemplateFile {
    #[serde(default)]
    pub templates: Vec<CommandTemplate>,
}

impl CommandTemplateFile {
    /// Parse a YAML template file, filling in default output where none is declared.
    pub fn from_yaml_str(text: &str) -> Result<Self, serde_yaml::Error> {
        let file: CommandTemplateFile = serde_yaml::from_str(text)?;
        Ok(file.with_default_output())
    }

    /// Parse a TOML template file, filling in default output where none is declared.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        let file: CommandTemplateFile = toml::from_str(text)?;
        Ok(file.with_default_output())
    }

    fn with_default_output(self) -> Self {
        Self {
            templates: self
                .templates
                .into_iter()
                .map(CommandTemplate::with_default_output)
                .collect(),
        }
    }
}

/// Generate the JSON Schema for test document front matter.
pub fn generate_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(FrontMatter)
}
