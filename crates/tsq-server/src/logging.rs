//! Structured logging for tsqd
//!
//! Console output for development, JSON for production, daily rotated files in
//! `LOG_DIR`.

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const LOG_FILE: &str = "tsqd.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
    Compact,
}

impl LogFormat {
    pub fn from_env() -> Self {
        match std::env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            Ok("compact") => LogFormat::Compact,
            _ => LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    File,
    Both,
}

impl LogOutput {
    pub fn from_env() -> Self {
        match std::env::var("LOG_OUTPUT").as_deref() {
            Ok("file") => LogOutput::File,
            Ok("both") => LogOutput::Both,
            _ => LogOutput::Stdout,
        }
    }
}

fn stdout_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    match format {
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_thread_ids(true)
            .with_target(true)
            .boxed(),
        LogFormat::Json => fmt::layer().json().with_current_span(true).boxed(),
        LogFormat::Compact => fmt::layer().compact().boxed(),
    }
}

fn file_layer<S>(format: LogFormat, dir: &str) -> anyhow::Result<Box<dyn Layer<S> + Send + Sync>>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    std::fs::create_dir_all(dir)?;
    let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE);
    let layer = fmt::layer().with_writer(appender).with_ansi(false);
    Ok(match format {
        LogFormat::Json => layer.json().with_current_span(true).boxed(),
        _ => layer.boxed(),
    })
}

/// Installs the global subscriber.
///
/// Environment variables:
/// - `RUST_LOG`: filter directives, e.g. "info" or "tsq_task=debug"
/// - `LOG_FORMAT`: "pretty", "json", "compact"
/// - `LOG_OUTPUT`: "stdout", "file", "both"
/// - `LOG_DIR`: directory for log files (default: "./logs")
///
/// ```bash
/// RUST_LOG=info LOG_FORMAT=json LOG_OUTPUT=file LOG_DIR=/var/log/tsqd tsqd
/// ```
pub fn init() -> anyhow::Result<()> {
    let format = LogFormat::from_env();
    let output = LogOutput::from_env();
    let log_dir = std::env::var("LOG_DIR").unwrap_or_else(|_| "./logs".to_string());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))?
        .add_directive("tokio=warn".parse()?)
        .add_directive("runtime=warn".parse()?);

    let registry = tracing_subscriber::registry().with(env_filter);
    match output {
        LogOutput::Stdout => registry.with(stdout_layer(format)).try_init()?,
        LogOutput::File => registry.with(file_layer(format, &log_dir)?).try_init()?,
        LogOutput::Both => registry
            .with(stdout_layer(format))
            .with(file_layer(format, &log_dir)?)
            .try_init()?,
    }

    tracing::info!(format = ?format, output = ?output, "logging initialized");
    if matches!(output, LogOutput::File | LogOutput::Both) {
        tracing::debug!(dir = %log_dir, file = LOG_FILE, "writing log files");
    }
    Ok(())
}

/// Emits an event with an `event` name and debug-formatted fields.
///
/// ```ignore
/// log_event!(
///     level: tracing::Level::INFO,
///     event: "run_finished",
///     task_id: id,
///     outcome: "success"
/// );
/// ```
#[macro_export]
macro_rules! log_event {
    (level: $level:expr, event: $event:expr $(, $key:ident: $value:expr)* $(,)?) => {
        tracing::event!(
            $level,
            event = $event
            $(, $key = ?$value)*
        );
    };
}
