//! Process-wide logging setup on top of `log4rs`.
//!
//! Three destinations:
//! - `app.log` for everything logged through the `log` facade,
//! - `pipeline.log` for the `querykit::pipeline` target (one line per executed pipeline),
//! - `dev6.log` for the developer-level `dev6!` target, only when enabled.

use log::LevelFilter;
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::append::rolling_file::policy::compound::{
    CompoundPolicy, roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger,
};
use log4rs::config::{Appender, Config, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::path::{Path, PathBuf};

/// Target used for the per-execution pipeline record.
pub const PIPELINE_TARGET: &str = "querykit::pipeline";
/// Target used by the `dev6!` macro.
pub const DEV6_TARGET: &str = "querykit::dev6";

const ENCODER_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} [{l}] {t} - {m}{n}";
const ROLL_SIZE_BYTES: u64 = 10 * 1024 * 1024;

type LogResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Initializes the logging system from a `log4rs` YAML file.
///
/// # Errors
/// Returns an error if the file cannot be read or parsed, or a logger is already installed.
pub fn init_path(path: &Path) -> LogResult<()> {
    log4rs::init_file(path, log4rs::config::Deserializers::default())?;
    Ok(())
}

/// Parses a level name; unknown names fall back to `info`.
#[must_use]
pub fn parse_level(level: Option<&str>) -> LevelFilter {
    match level.unwrap_or("info").to_ascii_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

fn rolling_appender(base: &Path, stem: &str, keep: u32) -> LogResult<RollingFileAppender> {
    let roller = FixedWindowRoller::builder()
        .build(&format!("{}", base.join(format!("{stem}.{{}}.log")).display()), keep)?;
    let policy = CompoundPolicy::new(Box::new(SizeTrigger::new(ROLL_SIZE_BYTES)), Box::new(roller));
    let appender = RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(ENCODER_PATTERN)))
        .build(base.join(format!("{stem}.log")), Box::new(policy))?;
    Ok(appender)
}

/// Builds the `log4rs` configuration without installing it.
///
/// # Errors
/// Returns an error if the directory cannot be created or an appender cannot open its file.
pub fn build_config(
    dir: Option<&Path>,
    level: Option<&str>,
    retention: Option<usize>,
    enable_dev6: bool,
) -> LogResult<Config> {
    let base = match dir {
        Some(d) => PathBuf::from(d),
        None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    };
    std::fs::create_dir_all(&base)?;
    let keep = u32::try_from(retention.unwrap_or(7)).unwrap_or(u32::MAX);
    let lvl = parse_level(level);

    let mut builder = Config::builder()
        .appender(Appender::builder().build("app", Box::new(rolling_appender(&base, "app", keep)?)))
        .appender(
            Appender::builder()
                .build("pipeline", Box::new(rolling_appender(&base, "pipeline", keep)?)),
        )
        .logger(Logger::builder().appender("pipeline").additive(false).build(PIPELINE_TARGET, lvl));

    if enable_dev6 {
        builder = builder
            .appender(Appender::builder().build("dev6", Box::new(rolling_appender(&base, "dev6", keep)?)))
            .logger(
                Logger::builder().appender("dev6").additive(false).build(DEV6_TARGET, LevelFilter::Trace),
            );
    } else {
        builder = builder.logger(Logger::builder().additive(false).build(DEV6_TARGET, LevelFilter::Off));
    }

    Ok(builder.build(Root::builder().appender("app").build(lvl))?)
}

/// Configure logging globally for the process.
/// - dir: base directory for logs; if None, current directory.
/// - level: off|error|warn|info|debug|trace
/// - retention: number of rolled files to keep (default 7)
///
/// A second call while a logger is installed keeps the first configuration.
///
/// # Errors
/// Returns an error if the configuration cannot be built.
pub fn configure_logging(dir: Option<&Path>, level: Option<&str>, retention: Option<usize>) -> LogResult<()> {
    configure_logging_with_dev(dir, level, retention, false)
}

/// Like [`configure_logging`], optionally persisting `dev6!` output to `dev6.log`.
///
/// # Errors
/// Returns an error if the configuration cannot be built.
pub fn configure_logging_with_dev(
    dir: Option<&Path>,
    level: Option<&str>,
    retention: Option<usize>,
    enable_dev6: bool,
) -> LogResult<()> {
    let config = build_config(dir, level, retention, enable_dev6)?;
    if log4rs::init_config(config).is_err() {
        log::debug!("logger already initialized; keeping existing configuration");
    }
    Ok(())
}

/// Configure logging from environment variables if present:
/// - QUERYKIT_LOG_DIR
/// - QUERYKIT_LOG_LEVEL
/// - QUERYKIT_LOG_RETENTION
/// - QUERYKIT_DEV6 (1/true/yes)
///
/// # Errors
/// Returns an error if the configuration cannot be built.
pub fn configure_from_env() -> LogResult<()> {
    let dir = std::env::var("QUERYKIT_LOG_DIR").ok().map(PathBuf::from);
    let level = std::env::var("QUERYKIT_LOG_LEVEL").ok();
    let retention = std::env::var("QUERYKIT_LOG_RETENTION").ok().and_then(|s| s.parse::<usize>().ok());
    let dev6_enabled = std::env::var("QUERYKIT_DEV6")
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);
    configure_logging_with_dev(dir.as_deref(), level.as_deref(), retention, dev6_enabled)
}
