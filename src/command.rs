//! Command resolution.
//!
//! A [`Command`] starts as a raw body line of a test document. Instantiating it
//! against a [`TestEnvironment`] looks up its template and any document
//! override, expands input and output templates, and fills in the expected
//! output and timeout an executor needs.

use crate::environment::{FixtureError, TestEnvironment};
use crate::input::InputLine;
use crate::render::{Bindings, RenderError, SharedRng, fresh_rng, seeded_rng};
use crate::schema::{CommandOverride, LineOrigin, TemplOutputLine};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Suffix of the line a command prints when it completes.
pub const SUCCESS_SUFFIX: &str = ": SUCCESS";

/// Error resolving a single command.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("failed to render template for `{id}`: {source}")]
    Render {
        id: String,
        #[source]
        source: RenderError,
    },

    #[error("failed to resolve fixture for `{id}`: {source}")]
    Fixture {
        id: String,
        #[source]
        source: FixtureError,
    },

    /// External lines may only name commands whose own output is not external.
    #[error("external output `{name}` of `{id}` refers to another external output")]
    NestedExternal { id: String, name: String },

    #[error("no template registered for `{0}`")]
    UnknownTemplate(String),

    #[error("random source is poisoned")]
    RandomSource,
}

/// One resolved expected output line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedOutputLine {
    pub text: String,
    pub trusted: bool,
    /// Scoring key. The command id for default output, the referenced
    /// command for external output, empty otherwise.
    pub key_name: String,
}

/// Settings a test document applies to all of its commands.
#[derive(Debug, Clone, Default)]
pub struct DocumentScope {
    /// Overrides by command id.
    pub overrides: HashMap<String, CommandOverride>,
    /// Document-wide timeout in seconds.
    pub timeout: Option<f32>,
}

/// The outcome of resolving a command.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub input: InputLine,
    pub expected_output: Vec<ExpectedOutputLine>,
    pub timeout: f32,
}

/// An executable command of a test.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Command {
    pub input: InputLine,
    pub expected_output: Vec<ExpectedOutputLine>,
    /// Timeout in seconds. Zero until instantiated.
    pub timeout: f32,
    #[serde(skip)]
    scope: Arc<DocumentScope>,
}

impl Command {
    /// A command outside any document.
    pub fn new(input: InputLine) -> Self {
        Self::with_scope(input, Arc::default())
    }

    /// A command of a document with the given overrides and defaults.
    pub fn with_scope(input: InputLine, scope: Arc<DocumentScope>) -> Self {
        Self {
            input,
            expected_output: Vec::new(),
            timeout: 0.0,
            scope,
        }
    }

    /// The command id of the current input line.
    pub fn id(&self) -> String {
        self.input.id()
    }

    /// The document override for a command id, if any.
    pub fn override_for(&self, id: &str) -> Option<&CommandOverride> {
        self.scope.overrides.get(id)
    }

    /// Resolve with a fresh random source.
    pub fn instantiate(&mut self, env: &TestEnvironment) -> Result<(), ResolutionError> {
        self.instantiate_with(env, &fresh_rng())
    }

    /// Resolve deterministically from a seed.
    pub fn instantiate_seeded(
        &mut self,
        env: &TestEnvironment,
        seed: u64,
    ) -> Result<(), ResolutionError> {
        self.instantiate_with(env, &seeded_rng(seed))
    }

    /// Resolve and replace input, expected output and timeout.
    ///
    /// Nothing is changed if resolution fails.
    pub fn instantiate_with(
        &mut self,
        env: &TestEnvironment,
        rng: &SharedRng,
    ) -> Result<(), ResolutionError> {
        let resolved = self.resolve(env, rng)?;
        self.input = resolved.input;
        self.expected_output = resolved.expected_output;
        self.timeout = resolved.timeout;
        Ok(())
    }

    /// Resolve the current input line without modifying the command.
    pub fn resolve(
        &self,
        env: &TestEnvironment,
        rng: &SharedRng,
    ) -> Result<Resolved, ResolutionError> {
        let invocation = self.input.split_command();
        let id = invocation.id;
        let overridden = self.override_for(&id);
        let lookup = env.lookup(&id);
        let template = lookup.template();

        // Authored arguments win; patterns only fill in a bare command.
        let mut input = self.input.clone();
        let mut args = invocation.args;
        if !template.input.is_empty() && args.is_empty() {
            let pattern = choose(&template.input, rng)?;
            let rendered = env
                .engine
                .render(pattern, &Bindings::new(id.as_str(), Vec::new()), rng)
                .map_err(|source| ResolutionError::Render {
                    id: id.clone(),
                    source,
                })?;
            args = rendered.split_whitespace().map(String::from).collect();
            input.replace_args(&args);
        }

        let lines = match overridden.and_then(|o| o.output.as_deref()) {
            Some(lines) => lines,
            None => template.output.as_slice(),
        };

        let bindings = Bindings::new(id.as_str(), args);
        let mut expected_output = Vec::new();
        for line in lines {
            resolve_line(env, &id, line, &bindings, rng, &mut expected_output)?;
        }

        let timeout = overridden
            .and_then(|o| o.timeout)
            .or(self.scope.timeout)
            .unwrap_or(env.default_timeout);

        debug!(
            %id,
            lines = expected_output.len(),
            synthesized = lookup.is_synthesized(),
            overridden = overridden.is_some(),
            "resolved command"
        );

        Ok(Resolved {
            input,
            expected_output,
            timeout,
        })
    }
}

fn choose<'a>(patterns: &'a [String], rng: &SharedRng) -> Result<&'a str, ResolutionError> {
    if patterns.len() == 1 {
        return Ok(&patterns[0]);
    }
    let index = rng
        .lock()
        .map_err(|_| ResolutionError::RandomSource)?
        .random_range(0..patterns.len());
    Ok(&patterns[index])
}

fn line_text<'a>(
    env: &TestEnvironment,
    id: &str,
    line: &'a TemplOutputLine,
) -> Result<Cow<'a, str>, ResolutionError> {
    match &line.fixture {
        Some(path) => env
            .read_fixture(path)
            .map(Cow::Owned)
            .map_err(|source| ResolutionError::Fixture {
                id: id.to_string(),
                source,
            }),
        None => Ok(Cow::Borrowed(&line.text)),
    }
}

fn render_lines(
    env: &TestEnvironment,
    id: &str,
    text: &str,
    bindings: &Bindings,
    rng: &SharedRng,
) -> Result<Vec<String>, ResolutionError> {
    let rendered = env
        .engine
        .render(text, bindings, rng)
        .map_err(|source| ResolutionError::Render {
            id: id.to_string(),
            source,
        })?;
    Ok(rendered
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(String::from)
        .collect())
}

fn resolve_line(
    env: &TestEnvironment,
    id: &str,
    line: &TemplOutputLine,
    bindings: &Bindings,
    rng: &SharedRng,
    out: &mut Vec<ExpectedOutputLine>,
) -> Result<(), ResolutionError> {
    let trusted = line.trusted.is_true();
    let text = line_text(env, id, line)?;
    let rendered = render_lines(env, id, &text, bindings, rng)?;

    if !line.external.is_true() {
        let key_name = match line.origin {
            LineOrigin::Synthesized => id.to_string(),
            LineOrigin::Declared => String::new(),
        };
        out.extend(rendered.into_iter().map(|text| ExpectedOutputLine {
            text,
            trusted,
            key_name: key_name.clone(),
        }));
        return Ok(());
    }

    // Each rendered line names a command whose output is expected here.
    for name in rendered {
        let referenced = env.lookup(&name);
        let referenced_bindings = Bindings::new(name.as_str(), Vec::new());
        for ref_line in &referenced.template().output {
            if ref_line.external.is_true() {
                return Err(ResolutionError::NestedExternal {
                    id: id.to_string(),
                    name,
                });
            }
            let ref_text = line_text(env, &name, ref_line)?;
            for text in render_lines(env, &name, &ref_text, &referenced_bindings, rng)? {
                out.push(ExpectedOutputLine {
                    key_name: external_key_name(&text).to_string(),
                    text,
                    trusted,
                });
            }
        }
    }
    Ok(())
}

/// Scoring key of an external output line.
pub fn external_key_name(text: &str) -> &str {
    text.strip_suffix(SUCCESS_SUFFIX).unwrap_or(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::DEFAULT_COMMAND_TIMEOUT_SECS;
    use crate::schema::CommandTemplate;
    use std::path::PathBuf;

    const RANDOM_ARGS: &str = "{% set k = rand_int(min=2, max=10) %}{% set items = k | ranger %}{% for element in items %}{{ rand_string(min=5, max=10) }}\n{% endfor %}";

    fn command(line: &str) -> Command {
        Command::new(InputLine::new(line))
    }

    fn scoped(line: &str, overrides: Vec<CommandOverride>, timeout: Option<f32>) -> Command {
        let scope = DocumentScope {
            overrides: overrides.into_iter().map(|o| (o.name.clone(), o)).collect(),
            timeout,
        };
        Command::with_scope(InputLine::new(line), Arc::new(scope))
    }

    fn randinput_env() -> TestEnvironment {
        let mut env = TestEnvironment::default();
        let mut template = CommandTemplate::new("randinput");
        template.input.push(RANDOM_ARGS.to_string());
        env.register(template);
        env
    }

    #[test]
    fn unregistered_command_gets_default_output() {
        let env = TestEnvironment::default();
        for id in ["sem1", "/testbin/forktest", "km3"] {
            let mut cmd = command(id);
            cmd.instantiate(&env).unwrap();
            assert_eq!(
                cmd.expected_output,
                vec![ExpectedOutputLine {
                    text: format!("{id}: SUCCESS"),
                    trusted: true,
                    key_name: id.to_string(),
                }]
            );
            assert_eq!(cmd.timeout, DEFAULT_COMMAND_TIMEOUT_SECS);
        }
    }

    #[test]
    fn prefix_does_not_change_the_id() {
        let env = TestEnvironment::default();
        let mut cmd = command("p /testbin/forktest");
        cmd.instantiate(&env).unwrap();
        assert_eq!(cmd.expected_output[0].key_name, "/testbin/forktest");
        assert_eq!(cmd.input.line, "p /testbin/forktest");
    }

    #[test]
    fn input_pattern_generates_arguments() {
        let env = randinput_env();
        for seed in 0..25 {
            let mut cmd = command("randinput");
            cmd.instantiate_seeded(&env, seed).unwrap();
            let invocation = cmd.input.split_command();
            assert_eq!(invocation.id, "randinput");
            assert!((2..=10).contains(&invocation.args.len()), "{}", cmd.input.line);
            for arg in &invocation.args {
                assert!((5..=10).contains(&arg.len()), "{arg}");
            }
            assert!(cmd.expected_output.is_empty());
        }
    }

    #[test]
    fn changed_line_is_resolved_from_scratch() {
        let env = randinput_env();
        let mut cmd = command("randinput");
        cmd.instantiate(&env).unwrap();

        cmd.input.line = "randinput 1".to_string();
        cmd.instantiate(&env).unwrap();

        let invocation = cmd.input.split_command();
        assert_eq!(invocation.id, "randinput");
        assert_eq!(invocation.args, vec!["1"]);
        assert_eq!(cmd.input.line, "randinput 1");
        assert!(cmd.expected_output.is_empty());
    }

    #[test]
    fn reinstantiation_does_not_accumulate() {
        let env = TestEnvironment::default();
        let mut cmd = command("sem1");
        cmd.instantiate(&env).unwrap();
        cmd.instantiate(&env).unwrap();
        assert_eq!(cmd.expected_output.len(), 1);
    }

    #[test]
    fn seeded_resolution_is_deterministic() {
        let env = randinput_env();
        let mut a = command("randinput");
        let mut b = command("randinput");
        a.instantiate_seeded(&env, 99).unwrap();
        b.instantiate_seeded(&env, 99).unwrap();
        assert_eq!(a.input, b.input);
    }

    #[test]
    fn external_lines_take_key_from_referenced_output() {
        let mut env = TestEnvironment::default();
        let mut template = CommandTemplate::new("external");
        template.output = vec![
            TemplOutputLine::new("sem1").trusted(true).external(true),
            TemplOutputLine::new("lt1").trusted(true).external(true),
        ];
        env.register(template);

        let mut cmd = command("external");
        cmd.instantiate(&env).unwrap();

        assert_eq!(cmd.expected_output.len(), 2);
        assert_eq!(cmd.expected_output[0].text, "sem1: SUCCESS");
        assert!(cmd.expected_output[0].trusted);
        assert_eq!(cmd.expected_output[0].key_name, "sem1");
        assert_eq!(cmd.expected_output[1].text, "lt1: SUCCESS");
        assert!(cmd.expected_output[1].trusted);
        assert_eq!(cmd.expected_output[1].key_name, "lt1");
    }

    #[test]
    fn external_key_name_without_suffix() {
        assert_eq!(external_key_name("sem1: SUCCESS"), "sem1");
        assert_eq!(external_key_name("all done"), "all done");
    }

    #[test]
    fn nested_external_is_rejected() {
        let mut env = TestEnvironment::default();
        let mut inner = CommandTemplate::new("inner");
        inner.output = vec![TemplOutputLine::new("sem1").external(true)];
        let mut outer = CommandTemplate::new("outer");
        outer.output = vec![TemplOutputLine::new("inner").external(true)];
        env.register(inner);
        env.register(outer);

        let err = command("outer").resolve(&env, &seeded_rng(1)).unwrap_err();
        assert!(matches!(err, ResolutionError::NestedExternal { .. }), "{err}");
    }

    #[test]
    fn output_override_replaces_template() {
        let env = TestEnvironment::default();
        let over = CommandOverride {
            name: "sem1".to_string(),
            output: Some(vec![TemplOutputLine::new("Override SUCCESS")]),
            timeout: None,
        };
        let mut cmd = scoped("sem1", vec![over], None);
        cmd.instantiate(&env).unwrap();

        assert_eq!(cmd.expected_output.len(), 1);
        assert_eq!(cmd.expected_output[0].text, "Override SUCCESS");
        assert!(!cmd.expected_output[0].trusted);
        assert_eq!(cmd.expected_output[0].key_name, "");
    }

    #[test]
    fn timeout_only_override_keeps_output() {
        let env = TestEnvironment::default();
        let over = CommandOverride {
            name: "sem1".to_string(),
            output: None,
            timeout: Some(1000.0),
        };
        let mut cmd = scoped("sem1", vec![over], Some(5.0));
        cmd.instantiate(&env).unwrap();

        assert_eq!(cmd.expected_output[0].text, "sem1: SUCCESS");
        assert!(cmd.expected_output[0].trusted);
        assert_eq!(cmd.expected_output[0].key_name, "sem1");
        assert_eq!(cmd.timeout, 1000.0);
    }

    #[test]
    fn override_matches_id_not_line() {
        let env = TestEnvironment::default();
        let over = CommandOverride {
            name: "sem1".to_string(),
            output: None,
            timeout: Some(3.0),
        };
        let mut cmd = scoped("p sem1 4", vec![over], None);
        cmd.instantiate(&env).unwrap();
        assert_eq!(cmd.timeout, 3.0);
    }

    #[test]
    fn document_timeout_applies_without_override() {
        let env = TestEnvironment::default();
        let mut cmd = scoped("sem1", vec![], Some(42.0));
        cmd.instantiate(&env).unwrap();
        assert_eq!(cmd.timeout, 42.0);
    }

    #[test]
    fn render_failure_leaves_command_unchanged() {
        let mut env = TestEnvironment::default();
        let mut cmd = command("broken");
        cmd.instantiate(&env).unwrap();
        let before = cmd.expected_output.clone();

        let mut template = CommandTemplate::new("broken");
        template.output = vec![TemplOutputLine::new("{{ missing_fn(x=1) }}")];
        env.register(template);

        let err = cmd.instantiate(&env).unwrap_err();
        assert!(matches!(err, ResolutionError::Render { .. }), "{err}");
        assert_eq!(cmd.expected_output, before);
    }

    #[test]
    fn fixture_line_without_root_fails() {
        let mut env = TestEnvironment::default();
        let mut template = CommandTemplate::new("/testbin/palin");
        template.output = vec![TemplOutputLine {
            fixture: Some(PathBuf::from("palin.txt")),
            ..TemplOutputLine::default()
        }];
        env.register(template);

        let err = command("/testbin/palin").resolve(&env, &seeded_rng(1)).unwrap_err();
        assert!(
            matches!(
                err,
                ResolutionError::Fixture {
                    source: FixtureError::NoRoot(_),
                    ..
                }
            ),
            "{err}"
        );
    }

    #[test]
    fn multi_line_output_splits_into_lines() {
        let mut env = TestEnvironment::default();
        let mut template = CommandTemplate::new("/testbin/echo");
        template.output = vec![TemplOutputLine::new("{% for a in args %}{{ a }}\n{% endfor %}").trusted(true)];
        env.register(template);

        let mut cmd = command("/testbin/echo x y z");
        cmd.instantiate(&env).unwrap();
        let texts: Vec<_> = cmd.expected_output.iter().map(|o| o.text.as_str()).collect();
        assert_eq!(texts, vec!["x", "y", "z"]);
        assert!(cmd.expected_output.iter().all(|o| o.trusted && o.key_name.is_empty()));
    }
}
