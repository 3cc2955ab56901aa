//! The `task` option a task script declares about itself
//!
//! ```text
//! option task = {name: "cpu", every: 1m, delay: 10s, concurrency: 2, retry: 3}
//! ```

use thiserror::Error;
use tsq_compile::{CompileError, Compiler, FunctionRegistry};
use tsq_ir::{Duration, Kind, Object, Record, Time, Value};
use tsq_registry::FatalError;

pub const TASK_OPTION: &str = "task";

pub const DEFAULT_CONCURRENCY: i64 = 1;
pub const DEFAULT_RETRY: i64 = 1;

#[derive(Debug, Error)]
pub enum OptionsError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("script does not set option task")]
    Missing,

    #[error("task option {field} should be of kind {expected}, but got {actual}")]
    Kind {
        field: &'static str,
        expected: Kind,
        actual: Kind,
    },

    #[error("task option name is required")]
    MissingName,

    #[error("cannot use both cron and every in one task")]
    EveryAndCron,

    #[error("invalid cron expression {0:?}")]
    Cron(String),

    #[error("task option {0} must be positive")]
    NotPositive(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskOptions {
    pub name: String,
    pub every: Option<Duration>,
    pub cron: Option<String>,
    pub delay: Option<Duration>,
    pub concurrency: i64,
    pub retry: i64,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            name: String::new(),
            every: None,
            cron: None,
            delay: None,
            concurrency: DEFAULT_CONCURRENCY,
            retry: DEFAULT_RETRY,
        }
    }
}

/// Declares the `task` option so scripts may read it back.
pub fn register_options(functions: &mut FunctionRegistry) -> Result<(), FatalError> {
    functions.register_option(TASK_OPTION, Value::Object(Object::Record(Record::new())))
}

impl TaskOptions {
    /// Evaluates `script` and reads its `task` option.
    pub fn from_script(compiler: &Compiler, script: &str, now: Time) -> Result<Self, OptionsError> {
        let itrp = compiler.eval(script, now)?;
        let record = match itrp.option(TASK_OPTION) {
            Some(Value::Object(o)) if !o.is_empty() => o.clone(),
            Some(Value::Object(_)) | None => return Err(OptionsError::Missing),
            Some(other) => {
                return Err(OptionsError::Kind {
                    field: TASK_OPTION,
                    expected: Kind::Object,
                    actual: other.kind(),
                })
            }
        };
        Self::from_object(&record)
    }

    pub fn from_object(o: &Object) -> Result<Self, OptionsError> {
        let mut opts = TaskOptions::default();

        opts.name = match field(o, "name", Kind::String)? {
            Some(v) if !v.str().is_empty() => v.str().to_string(),
            _ => return Err(OptionsError::MissingName),
        };
        opts.every = field(o, "every", Kind::Duration)?.map(|v| v.duration());
        opts.delay = field(o, "delay", Kind::Duration)?.map(|v| v.duration());
        opts.cron = field(o, "cron", Kind::String)?.map(|v| v.str().to_string());
        if let Some(c) = field(o, "concurrency", Kind::Int)? {
            opts.concurrency = c.int();
        }
        if let Some(r) = field(o, "retry", Kind::Int)? {
            opts.retry = r.int();
        }

        if opts.every.is_some() && opts.cron.is_some() {
            return Err(OptionsError::EveryAndCron);
        }
        if let Some(cron) = &opts.cron {
            validate_cron(cron)?;
        }
        if opts.every.map_or(false, |d| d.nanos() <= 0) {
            return Err(OptionsError::NotPositive("every"));
        }
        if opts.concurrency < 1 {
            return Err(OptionsError::NotPositive("concurrency"));
        }
        if opts.retry < 1 {
            return Err(OptionsError::NotPositive("retry"));
        }
        Ok(opts)
    }
}

fn field(o: &Object, name: &'static str, expected: Kind) -> Result<Option<Value>, OptionsError> {
    match o.get(name) {
        Some(v) if v.kind() == expected => Ok(Some(v)),
        Some(v) => Err(OptionsError::Kind {
            field: name,
            expected,
            actual: v.kind(),
        }),
        None => Ok(None),
    }
}

/// Five fields, optionally with a leading seconds field.
fn validate_cron(expr: &str) -> Result<(), OptionsError> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    let valid_char = |c: char| c.is_ascii_alphanumeric() || "*/,-?".contains(c);
    if !(5..=6).contains(&fields.len()) || !fields.iter().all(|f| f.chars().all(valid_char)) {
        return Err(OptionsError::Cron(expr.to_string()));
    }
    Ok(())
}
