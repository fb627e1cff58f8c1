use std::fs::OpenOptions;

use anyhow::Context;
use regex::Regex;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{Layer, Registry};

use crate::common::config::LoggingConfigLoader;
use crate::common::get_logger_timer_rfc3339;

const LOG_TARGET_CORE: &str = "ctrld";
const DEFAULT_LOG_FILE: &str = "ctrld.log";

fn parse_level(level: Option<String>) -> Result<LevelFilter, anyhow::Error> {
    match level {
        Some(s) => s
            .parse()
            .with_context(|| format!("invalid log level: {}", s)),
        None => Ok(LevelFilter::OFF),
    }
}

fn parse_env_filter(default_level: LevelFilter) -> Result<EnvFilter, anyhow::Error> {
    let mut filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env()
        .with_context(|| "failed to create env filter")?;

    let pattern = Regex::new(&format!(r"(^|,){}\s*=", regex::escape(LOG_TARGET_CORE)))?;
    if !pattern.is_match(&filter.to_string()) {
        filter = filter.add_directive(format!("{}=info", LOG_TARGET_CORE).parse()?);
    }

    Ok(filter)
}

/// Installs the global subscriber: a console layer on stderr and an
/// optional append-only file layer, each with its own level.
pub fn init(config: impl LoggingConfigLoader) -> Result<(), anyhow::Error> {
    let file_config = config.get_file_logger_config();
    let file_level = parse_level(file_config.level)?;

    let mut file_layer = None;
    if file_level != LevelFilter::OFF {
        let dir = file_config.dir.as_deref().unwrap_or(".");
        let file = file_config.file.as_deref().unwrap_or(DEFAULT_LOG_FILE);
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create log dir: {}", dir))?;
        let path = std::path::Path::new(dir).join(file);
        let writer = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open log file: {}", path.display()))?;

        file_layer = Some(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(writer))
                .with_timer(get_logger_timer_rfc3339())
                .with_filter(parse_env_filter(file_level)?),
        );
    }

    let console_config = config.get_console_logger_config();
    let console_level = parse_level(console_config.level)?;
    let console_layer = tracing_subscriber::fmt::layer()
        .with_timer(get_logger_timer_rfc3339())
        .with_writer(std::io::stderr)
        .with_filter(parse_env_filter(console_level)?);

    Registry::default()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .with_context(|| "failed to install global logger")?;

    Ok(())
}
