use parking_lot::Mutex;
/// Debugging infrastructure for tab-recall
///
/// Controlled by the TAB_RECALL_DEBUG environment variable:
/// - 0 or unset: No debugging
/// - 1: Errors only
/// - 2: Info level (history mutations, routed events)
/// - 3: Debug level (queries, resolution steps)
/// - 4: Trace level (every queued operation)
///
/// All output goes to tab_recall_debug.log in the system temp directory.
/// `init_log_bridge` routes `log` records into the same file so library and
/// category output land side by side.
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};
use tab_recall_config::LogLevel;

/// Debug level configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DebugLevel {
    Off = 0,
    Error = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl DebugLevel {
    fn from_env() -> Self {
        match std::env::var("TAB_RECALL_DEBUG") {
            Ok(val) => match val.trim().parse::<u8>() {
                Ok(1) => DebugLevel::Error,
                Ok(2) => DebugLevel::Info,
                Ok(3) => DebugLevel::Debug,
                Ok(4) => DebugLevel::Trace,
                _ => DebugLevel::Off,
            },
            Err(_) => DebugLevel::Off,
        }
    }

    fn from_log_level(level: log::Level) -> Self {
        match level {
            log::Level::Error => DebugLevel::Error,
            log::Level::Warn | log::Level::Info => DebugLevel::Info,
            log::Level::Debug => DebugLevel::Debug,
            log::Level::Trace => DebugLevel::Trace,
        }
    }
}

/// Path of the debug log file
pub fn log_path() -> std::path::PathBuf {
    std::env::temp_dir().join("tab_recall_debug.log")
}

/// Global debug logger
struct DebugLogger {
    level: DebugLevel,
    file: Option<std::fs::File>,
}

impl DebugLogger {
    fn new() -> Self {
        let level = DebugLevel::from_env();
        let mut logger = DebugLogger { level, file: None };
        if level != DebugLevel::Off {
            logger.open_file();
        }
        logger
    }

    fn open_file(&mut self) {
        if self.file.is_some() {
            return;
        }
        // Silently skip file logging if the file can't be opened
        if let Ok(f) = OpenOptions::new()
            .write(true)
            .truncate(true)
            .create(true)
            .open(log_path())
        {
            self.file = Some(f);
            self.write_raw(&format!(
                "\n{}\ntab-recall debug session started at {} (level={:?})\n{}\n",
                "=".repeat(80),
                get_timestamp(),
                self.level,
                "=".repeat(80)
            ));
        }
    }

    fn write_raw(&mut self, msg: &str) {
        if let Some(ref mut file) = self.file {
            let _ = file.write_all(msg.as_bytes());
            let _ = file.flush();
        }
    }

    fn log(&mut self, level: DebugLevel, category: &str, msg: &str) {
        if level <= self.level {
            self.write_line(level, category, msg);
        }
    }

    fn write_line(&mut self, level: DebugLevel, category: &str, msg: &str) {
        let level_str = match level {
            DebugLevel::Error => "ERROR",
            DebugLevel::Info => "INFO ",
            DebugLevel::Debug => "DEBUG",
            DebugLevel::Trace => "TRACE",
            DebugLevel::Off => return,
        };
        self.write_raw(&format!(
            "[{}] [{}] [{}] {}\n",
            get_timestamp(),
            level_str,
            category,
            msg
        ));
    }
}

static LOGGER: OnceLock<Mutex<DebugLogger>> = OnceLock::new();

fn get_logger() -> &'static Mutex<DebugLogger> {
    LOGGER.get_or_init(|| Mutex::new(DebugLogger::new()))
}

fn get_timestamp() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}.{:06}", now.as_secs(), now.subsec_micros())
}

/// Check if debugging is enabled at given level
pub fn is_enabled(level: DebugLevel) -> bool {
    let logger = get_logger().lock();
    level <= logger.level
}

/// Log a message at specified level
pub fn log(level: DebugLevel, category: &str, msg: &str) {
    let mut logger = get_logger().lock();
    logger.log(level, category, msg);
}

/// Log formatted message
pub fn logf(level: DebugLevel, category: &str, args: fmt::Arguments) {
    if is_enabled(level) {
        log(level, category, &format!("{}", args));
    }
}

/// `log` facade backend that writes into the debug file
struct LogBridge {
    filter: log::LevelFilter,
    mirror_stderr: bool,
}

impl log::Log for LogBridge {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= self.filter
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let level = DebugLevel::from_log_level(record.level());
        let msg = format!("{}", record.args());
        // Bridged records are filtered by `self.filter`, not TAB_RECALL_DEBUG
        get_logger().lock().write_line(level, record.target(), &msg);
        if self.mirror_stderr {
            eprintln!("[{}] [{}] {}", record.level(), record.target(), msg);
        }
    }

    fn flush(&self) {}
}

/// Resolve the effective `log` filter.
///
/// Precedence: explicit CLI level, then `RUST_LOG`, then the config value.
pub fn effective_level(cli_level: Option<LogLevel>, config_level: LogLevel) -> LogLevel {
    if let Some(level) = cli_level {
        return level;
    }
    if let Ok(env) = std::env::var("RUST_LOG")
        && let Some(level) = LogLevel::from_name(&env)
    {
        return level;
    }
    config_level
}

/// Install the `log` bridge. Safe to call more than once; later calls only
/// adjust the max level.
///
/// When `RUST_LOG` is set, records are also mirrored to stderr.
pub fn init_log_bridge(level: LogLevel) {
    let filter = level.to_level_filter();
    if filter != log::LevelFilter::Off {
        get_logger().lock().open_file();
    }
    let bridge = LogBridge {
        filter,
        mirror_stderr: std::env::var_os("RUST_LOG").is_some(),
    };
    if log::set_boxed_logger(Box::new(bridge)).is_err() {
        log::debug!("log bridge already installed");
    }
    log::set_max_level(filter);
}

// Convenience macros for logging
#[macro_export]
macro_rules! debug_error {
    ($category:expr, $($arg:tt)*) => {
        $crate::debug::logf($crate::debug::DebugLevel::Error, $category, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! debug_info {
    ($category:expr, $($arg:tt)*) => {
        $crate::debug::logf($crate::debug::DebugLevel::Info, $category, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! debug_log {
    ($category:expr, $($arg:tt)*) => {
        $crate::debug::logf($crate::debug::DebugLevel::Debug, $category, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! debug_trace {
    ($category:expr, $($arg:tt)*) => {
        $crate::debug::logf($crate::debug::DebugLevel::Trace, $category, format_args!($($arg)*))
    };
}
