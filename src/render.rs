//! Template expansion for input patterns and expected output text.
//!
//! Text is rendered with [Tera](https://keats.github.io/tera/). Besides Tera's
//! own variables, filters and loops, every render has access to:
//!
//! - `rand_int(min, max)`: random integer in `[min, max]`
//! - `rand_string(min, max)`: alphanumeric string with length in `[min, max]`
//! - `n | ranger`: the sequence `[0, n)`, for looping `n` times
//! - `n | factorial`
//! - `s | atoi`: parse a string argument as an integer
//!
//! and to the variables `id`, `args` and `argc` of the command being resolved.

use rand::distr::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tera::{Context, Tera, Value};
use thiserror::Error;
use tracing::trace;

/// Random source shared by the functions of one render pass.
pub type SharedRng = Arc<Mutex<StdRng>>;

/// A random source seeded from the operating system.
pub fn fresh_rng() -> SharedRng {
    Arc::new(Mutex::new(StdRng::from_os_rng()))
}

/// A deterministic random source.
pub fn seeded_rng(seed: u64) -> SharedRng {
    Arc::new(Mutex::new(StdRng::seed_from_u64(seed)))
}

/// Error produced while expanding a template.
#[derive(Debug, Error)]
pub enum RenderError {
    /// A function or filter that is not registered.
    #[error("unknown function or filter `{0}`")]
    Unknown(String),

    /// Syntax error, bad argument or failed evaluation.
    #[error("{0}")]
    Template(String),
}

impl From<tera::Error> for RenderError {
    fn from(err: tera::Error) -> Self {
        let mut messages = Vec::new();
        let mut current: Option<&(dyn std::error::Error + 'static)> = Some(&err);
        while let Some(e) = current {
            if let Some(tera_err) = e.downcast_ref::<tera::Error>() {
                match &tera_err.kind {
                    tera::ErrorKind::FunctionNotFound(name)
                    | tera::ErrorKind::FilterNotFound(name) => {
                        return RenderError::Unknown(name.clone());
                    }
                    _ => {}
                }
            }
            messages.push(e.to_string());
            current = e.source();
        }
        RenderError::Template(messages.join(": "))
    }
}

/// Values visible to a template while it renders.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Bindings {
    /// Command id.
    pub id: String,
    pub args: Vec<String>,
    /// Argument count including the command itself, as a C program sees it.
    pub argc: usize,
}

impl Bindings {
    pub fn new(id: impl Into<String>, args: Vec<String>) -> Self {
        let argc = args.len() + 1;
        Self {
            id: id.into(),
            args,
            argc,
        }
    }
}

/// Expands template text into concrete text.
pub trait TemplateEngine: Send + Sync {
    fn render(&self, text: &str, bindings: &Bindings, rng: &SharedRng)
    -> Result<String, RenderError>;
}

/// The default engine, backed by Tera.
#[derive(Debug, Clone, Copy, Default)]
pub struct TeraEngine;

impl TemplateEngine for TeraEngine {
    fn render(
        &self,
        text: &str,
        bindings: &Bindings,
        rng: &SharedRng,
    ) -> Result<String, RenderError> {
        if !has_template_syntax(text) {
            return Ok(text.to_string());
        }

        let mut tera = Tera::default();
        tera.autoescape_on(vec![]);
        tera.register_function("rand_int", RandInt { rng: rng.clone() });
        tera.register_function("rand_string", RandString { rng: rng.clone() });
        tera.register_filter("ranger", ranger);
        tera.register_filter("factorial", factorial);
        tera.register_filter("atoi", atoi);

        let mut context = Context::new();
        context.insert("id", &bindings.id);
        context.insert("args", &bindings.args);
        context.insert("argc", &bindings.argc);

        let rendered = tera.render_str(text, &context)?;
        trace!(template = text, %rendered, "rendered template");
        Ok(rendered)
    }
}

fn has_template_syntax(text: &str) -> bool {
    text.contains("{{") || text.contains("{%") || text.contains("{#")
}

fn int_arg(args: &HashMap<String, Value>, func: &str, name: &str) -> tera::Result<i64> {
    args.get(name)
        .and_then(Value::as_i64)
        .ok_or_else(|| tera::Error::msg(format!("{func}: missing integer argument `{name}`")))
}

fn lock(rng: &SharedRng) -> tera::Result<std::sync::MutexGuard<'_, StdRng>> {
    rng.lock()
        .map_err(|_| tera::Error::msg("random source is poisoned"))
}

struct RandInt {
    rng: SharedRng,
}

impl tera::Function for RandInt {
    fn call(&self, args: &HashMap<String, Value>) -> tera::Result<Value> {
        let min = int_arg(args, "rand_int", "min")?;
        let max = int_arg(args, "rand_int", "max")?;
        if min > max {
            return Err(tera::Error::msg(format!(
                "rand_int: min ({min}) is greater than max ({max})"
            )));
        }
        let value = lock(&self.rng)?.random_range(min..=max);
        Ok(Value::from(value))
    }
}

struct RandString {
    rng: SharedRng,
}

impl tera::Function for RandString {
    fn call(&self, args: &HashMap<String, Value>) -> tera::Result<Value> {
        let min = int_arg(args, "rand_string", "min")?;
        let max = int_arg(args, "rand_string", "max")?;
        if min < 0 || min > max {
            return Err(tera::Error::msg(format!(
                "rand_string: invalid length range [{min}, {max}]"
            )));
        }
        let mut rng = lock(&self.rng)?;
        let len = rng.random_range(min..=max) as usize;
        let s: String = (&mut *rng)
            .sample_iter(Alphanumeric)
            .take(len)
            .map(char::from)
            .collect();
        Ok(Value::from(s))
    }
}

fn ranger(value: &Value, _: &HashMap<String, Value>) -> tera::Result<Value> {
    let n = value
        .as_u64()
        .ok_or_else(|| tera::Error::msg(format!("ranger: expected a non-negative integer, got {value}")))?;
    Ok(Value::from((0..n).collect::<Vec<u64>>()))
}

fn factorial(value: &Value, _: &HashMap<String, Value>) -> tera::Result<Value> {
    let n = value
        .as_u64()
        .ok_or_else(|| tera::Error::msg(format!("factorial: expected a non-negative integer, got {value}")))?;
    let result = (1..=n)
        .try_fold(1u64, |acc, k| acc.checked_mul(k))
        .ok_or_else(|| tera::Error::msg(format!("factorial: {n}! overflows")))?;
    Ok(Value::from(result))
}

fn atoi(value: &Value, _: &HashMap<String, Value>) -> tera::Result<Value> {
    match value {
        Value::Number(_) => Ok(value.clone()),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|e| tera::Error::msg(format!("atoi: {s:?} is not an integer: {e}"))),
        other => Err(tera::Error::msg(format!("atoi: cannot convert {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RANDOM_ARGS: &str = "{% set k = rand_int(min=2, max=10) %}{% set items = k | ranger %}{% for element in items %}{{ rand_string(min=5, max=10) }}\n{% endfor %}";

    fn render(text: &str, args: &[&str]) -> Result<String, RenderError> {
        let bindings = Bindings::new("cmd", args.iter().map(|a| a.to_string()).collect());
        TeraEngine.render(text, &bindings, &seeded_rng(7))
    }

    #[test]
    fn plain_text_is_unchanged() {
        assert_eq!(render("sem1: SUCCESS", &[]).unwrap(), "sem1: SUCCESS");
    }

    #[test]
    fn binds_arguments() {
        let text = "{% set x = args.0 | atoi %}{% set y = args.1 | atoi %}{{ x + y }}";
        assert_eq!(render(text, &["70", "200"]).unwrap(), "270");
        assert_eq!(render("argc: {{ argc }} id: {{ id }}", &["a"]).unwrap(), "argc: 2 id: cmd");
    }

    #[test]
    fn computes_factorial() {
        assert_eq!(render("{{ args.0 | atoi | factorial }}", &["8"]).unwrap(), "40320");
        assert!(render("{% set n = 30 %}{{ n | factorial }}", &[]).is_err());
    }

    #[test]
    fn random_lines_stay_in_bounds() {
        for seed in 0..50 {
            let out = TeraEngine
                .render(RANDOM_ARGS, &Bindings::default(), &seeded_rng(seed))
                .unwrap();
            let lines: Vec<&str> = out.lines().collect();
            assert!((2..=10).contains(&lines.len()), "seed {seed}: {out:?}");
            for line in lines {
                assert!((5..=10).contains(&line.len()), "seed {seed}: {line:?}");
                assert!(line.chars().all(|c| c.is_ascii_alphanumeric()));
            }
        }
    }

    #[test]
    fn same_seed_same_output() {
        let a = TeraEngine.render(RANDOM_ARGS, &Bindings::default(), &seeded_rng(42));
        let b = TeraEngine.render(RANDOM_ARGS, &Bindings::default(), &seeded_rng(42));
        assert_eq!(a.unwrap(), b.unwrap());
    }

    #[test]
    fn ranger_loops_n_times() {
        let out = render("{% set n = 3 %}{% set items = n | ranger %}{% for i in items %}line {{ i }}\n{% endfor %}", &[]).unwrap();
        assert_eq!(out, "line 0\nline 1\nline 2\n");
    }

    #[test]
    fn unknown_function_is_reported() {
        let err = render("{{ no_such_fn(a=1) }}", &[]).unwrap_err();
        assert!(matches!(err, RenderError::Unknown(ref name) if name == "no_such_fn"), "{err}");
    }

    #[test]
    fn bad_arguments_are_reported() {
        let err = render("{{ rand_int(min=5) }}", &[]).unwrap_err();
        assert!(err.to_string().contains("max"), "{err}");
        let err = render("{{ rand_int(min=5, max=1) }}", &[]).unwrap_err();
        assert!(err.to_string().contains("greater than"), "{err}");
    }

    #[test]
    fn malformed_template_is_reported() {
        let err = render("{% for x in %}", &[]).unwrap_err();
        assert!(matches!(err, RenderError::Template(_)));
    }
}
