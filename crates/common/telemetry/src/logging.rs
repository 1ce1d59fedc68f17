// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Process-wide `tracing` setup.
//!
//! Layers, depending on [`LoggingOptions`]:
//!
//! - **stdout**: when `append_stdout` is set
//! - **file**: hourly rotated `<app>.*` files when `dir` is set
//! - **error file**: hourly rotated `<app>-err.*` files, `ERROR` only
//!
//! All writers are non-blocking; the returned [`WorkerGuard`]s flush them on
//! drop and must be kept alive for as long as the process logs.

use std::{env, io::IsTerminal};

use bon::Builder;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Deserializer, Serialize, de};
use smart_default::SmartDefault;
use snafu::{OptionExt, ResultExt, Snafu};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing::Subscriber;
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, filter, fmt::MakeWriter, layer::SubscriberExt,
    registry::LookupSpan, reload,
};

/// Deserializes a string, treating `""` as `T::default()`.
pub fn empty_string_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    let s = String::deserialize(deserializer)?;
    if s.is_empty() {
        Ok(T::default())
    } else {
        T::deserialize(de::value::StrDeserializer::new(&s)).map_err(|e: de::value::Error| {
            de::Error::custom(format!("invalid value, expect empty string, err: {e}"))
        })
    }
}

/// Used when neither `LoggingOptions::level` nor `RUST_LOG` is set.
const DEFAULT_LOG_TARGETS: &str = "info";

/// Handle for changing the level filter after initialization, see
/// [`set_log_level`].
pub static RELOAD_HANDLE: OnceCell<reload::Handle<filter::Targets, Registry>> = OnceCell::new();

static INITIALIZED: OnceCell<()> = OnceCell::new();

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum LoggingError {
    #[snafu(display("Failed to install log tracer"))]
    InstallLogTracer { source: tracing_log::log::SetLoggerError },

    #[snafu(display("Failed to create rolling file appender in {dir}"))]
    CreateAppender {
        dir:    String,
        source: tracing_appender::rolling::InitError,
    },

    #[snafu(display("Invalid log level filter {level:?}"))]
    ParseLevel {
        level:  String,
        source: filter::ParseError,
    },

    #[snafu(display("Failed to set global tracing subscriber"))]
    SetGlobalDefault {
        source: tracing::subscriber::SetGlobalDefaultError,
    },

    #[snafu(display("Logging has not been initialized"))]
    NotInitialized,

    #[snafu(display("Failed to reload log level filter"))]
    Reload { source: reload::Error },
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, SmartDefault, Builder)]
#[serde(default)]
pub struct LoggingOptions {
    /// Directory for rotated log files. Empty disables file logging.
    #[default = ""]
    #[builder(default)]
    pub dir: String,

    /// Level filter such as `"info"` or `"info,diskq_common_storage_queue=debug"`.
    /// Falls back to `RUST_LOG`, then to `"info"`.
    pub level: Option<String>,

    #[serde(default, deserialize_with = "empty_string_as_default")]
    #[builder(default)]
    pub log_format: LogFormat,

    /// Rotated files kept per log kind. 720 hourly files is 30 days.
    #[default = 720]
    #[builder(default = 720)]
    pub max_log_files: usize,

    #[default = true]
    #[builder(default = true)]
    pub append_stdout: bool,
}

#[derive(
    Clone, Debug, Copy, PartialEq, Eq, Serialize, Deserialize, Default, derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// One JSON object per event, with span context.
    #[display("json")]
    Json,
    /// Human-readable lines.
    #[default]
    #[display("text")]
    Text,
}

/// Logging for unit tests, configured through `UNITTEST_LOG_DIR` and
/// `UNITTEST_LOG_LEVEL`. Safe to call from every test; only the first call
/// does anything.
pub fn init_default_ut_logging() {
    static GUARDS: OnceCell<Vec<WorkerGuard>> = OnceCell::new();

    GUARDS.get_or_init(|| {
        let dir =
            env::var("UNITTEST_LOG_DIR").unwrap_or_else(|_| "/tmp/__unittest_logs".to_string());
        let level = env::var("UNITTEST_LOG_LEVEL")
            .unwrap_or_else(|_| "debug,diskq_common_storage_queue=debug".to_string());
        let opts = LoggingOptions {
            dir: dir.clone(),
            level: Some(level),
            ..Default::default()
        };

        match init_global_logging("unittest", &opts) {
            Ok(guards) => {
                tracing::info!("logs dir = {}", dir);
                guards
            }
            Err(e) => {
                eprintln!("unit test logging disabled: {e}");
                Vec::new()
            }
        }
    });
}

/// Installs the global subscriber described by `opts`.
///
/// Only the first successful call installs anything; later calls return no
/// guards.
pub fn init_global_logging(
    app_name: &str,
    opts: &LoggingOptions,
) -> Result<Vec<WorkerGuard>, LoggingError> {
    let mut guards = Vec::new();

    INITIALIZED.get_or_try_init(|| -> Result<(), LoggingError> {
        let level = opts
            .level
            .clone()
            .or_else(|| env::var(EnvFilter::DEFAULT_ENV).ok())
            .unwrap_or_else(|| DEFAULT_LOG_TARGETS.to_string());
        let targets = level
            .parse::<filter::Targets>()
            .context(ParseLevelSnafu { level: &level })?;

        let stdout_layer = if opts.append_stdout {
            let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
            guards.push(guard);
            Some(fmt_layer(
                writer,
                opts.log_format,
                std::io::stdout().is_terminal(),
            ))
        } else {
            None
        };

        let (file_layer, err_file_layer) = if opts.dir.is_empty() {
            (None, None)
        } else {
            let (writer, guard) =
                tracing_appender::non_blocking(rolling_appender(opts, app_name)?);
            guards.push(guard);
            let file_layer = fmt_layer(writer, opts.log_format, false);

            let (writer, guard) = tracing_appender::non_blocking(rolling_appender(
                opts,
                &format!("{app_name}-err"),
            )?);
            guards.push(guard);
            let err_layer = fmt_layer(writer, opts.log_format, false)
                .with_filter(filter::LevelFilter::ERROR)
                .boxed();

            (Some(file_layer), Some(err_layer))
        };

        let (dyn_filter, reload_handle) = reload::Layer::new(targets);
        let subscriber = Registry::default()
            .with(dyn_filter)
            .with(stdout_layer)
            .with(file_layer)
            .with(err_file_layer);

        LogTracer::init().context(InstallLogTracerSnafu)?;
        tracing::subscriber::set_global_default(subscriber).context(SetGlobalDefaultSnafu)?;
        let _ = RELOAD_HANDLE.set(reload_handle);
        Ok(())
    })?;

    Ok(guards)
}

/// Replaces the level filter of the running subscriber.
pub fn set_log_level(level: &str) -> Result<(), LoggingError> {
    let targets = level
        .parse::<filter::Targets>()
        .context(ParseLevelSnafu { level })?;
    RELOAD_HANDLE
        .get()
        .context(NotInitializedSnafu)?
        .reload(targets)
        .context(ReloadSnafu)
}

fn rolling_appender(opts: &LoggingOptions, prefix: &str) -> Result<RollingFileAppender, LoggingError> {
    RollingFileAppender::builder()
        .rotation(Rotation::HOURLY)
        .filename_prefix(prefix)
        .max_log_files(opts.max_log_files)
        .build(&opts.dir)
        .context(CreateAppenderSnafu { dir: &opts.dir })
}

fn fmt_layer<S, W>(writer: W, format: LogFormat, ansi: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Json => tracing_subscriber::fmt::Layer::new()
            .json()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_current_span(true)
            .with_span_list(true)
            .boxed(),
        LogFormat::Text => tracing_subscriber::fmt::Layer::new()
            .with_writer(writer)
            .with_ansi(ansi)
            .boxed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = LoggingOptions::default();
        assert!(opts.dir.is_empty());
        assert_eq!(opts.level, None);
        assert_eq!(opts.log_format, LogFormat::Text);
        assert_eq!(opts.max_log_files, 720);
        assert!(opts.append_stdout);
    }

    #[test]
    fn test_builder_matches_default() {
        assert_eq!(LoggingOptions::builder().build(), LoggingOptions::default());

        let opts = LoggingOptions::builder()
            .dir("/var/log/diskq".to_string())
            .level("debug".to_string())
            .log_format(LogFormat::Json)
            .append_stdout(false)
            .build();
        assert_eq!(opts.level.as_deref(), Some("debug"));
        assert_eq!(opts.log_format, LogFormat::Json);
        assert!(!opts.append_stdout);
    }

    #[test]
    fn test_deserialize_empty_format_as_default() {
        let opts: LoggingOptions =
            serde_json::from_str(r#"{"dir":"logs","log_format":""}"#).unwrap();
        assert_eq!(opts.log_format, LogFormat::Text);
        assert_eq!(opts.dir, "logs");
        assert_eq!(opts.max_log_files, 720);

        let opts: LoggingOptions = serde_json::from_str(r#"{"log_format":"json"}"#).unwrap();
        assert_eq!(opts.log_format, LogFormat::Json);
        assert_eq!(opts.log_format.to_string(), "json");
    }

    #[test]
    fn test_ut_logging_and_reload() {
        init_default_ut_logging();
        init_default_ut_logging();
        set_log_level("info").unwrap();
        assert!(matches!(
            set_log_level("not a level=="),
            Err(LoggingError::ParseLevel { .. })
        ));
    }
}
