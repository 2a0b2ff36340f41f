use std::env;

use anyhow::{Context, Result};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::fmt::{MakeWriter, fmt};
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{LogFormat, Logging};

fn get_rust_log(level: LevelFilter) -> &'static str {
    match level {
        LevelFilter::OFF => "",
        LevelFilter::ERROR => "ERROR",
        LevelFilter::WARN => "WARN",
        LevelFilter::INFO => "INFO",
        LevelFilter::DEBUG => {
            "INFO,\
             accumulator_cache=DEBUG"
        }
        LevelFilter::TRACE => {
            "INFO,\
             accumulator_cache=TRACE"
        }
    }
}

pub fn init_json_logging<W>(env_filter: &str, make_writer: W) -> Result<()>
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    fmt()
        .with_timer(UtcTime::rfc_3339())
        .with_target(true)
        .with_env_filter(env_filter)
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_span_list(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(make_writer)
        .finish()
        .try_init()
        .context("failed to install JSON logger")
}

/// Initializes logging for the accumulator cache.
///
/// This considers the `RUST_LOG` environment variable and defaults it to the level specified in the
/// configuration. Fails if a global logger was already installed.
pub fn init_logging(config: &Logging) -> Result<()> {
    let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| get_rust_log(config.level).to_string());

    let fmt_layer = {
        let layer = tracing_subscriber::fmt::layer()
            .with_timer(UtcTime::rfc_3339())
            .with_target(true);

        match (config.format, console::user_attended()) {
            (LogFormat::Auto, true) | (LogFormat::Pretty, _) => layer.pretty().boxed(),
            (LogFormat::Auto, false) | (LogFormat::Simplified, _) => {
                layer.compact().with_ansi(false).boxed()
            }
            (LogFormat::Json, _) => {
                return init_json_logging(&rust_log, std::io::stdout);
            }
        }
    }
    .with_filter(EnvFilter::new(&rust_log));

    tracing_subscriber::registry()
        .with(fmt_layer)
        .try_init()
        .context("failed to install logger")
}
