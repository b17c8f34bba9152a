use std::fs::{self, File};
use std::io::stderr;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex};

use chrono::Local;
use miette::{Context, IntoDiagnostic, miette};
use tracing::level_filters::LevelFilter;
use tracing::{Level, debug};
use tracing_appender::non_blocking;
use tracing_appender::non_blocking::NonBlocking;
use tracing_subscriber::reload;
use tracing_subscriber::{
    EnvFilter, Layer, fmt, layer::SubscriberExt, reload::Handle, util::SubscriberInitExt,
};

use crate::consts::APP_VERSION;

pub const LOG_DIR: &str = "/tmp/spsa_tune_logs";

pub trait LogHandle: Send + Sync {
    fn set_filter(&self, new_filter: EnvFilter) -> miette::Result<()>;
}

impl<S> LogHandle for Handle<EnvFilter, S>
where
    S: tracing::Subscriber + Send + Sync + 'static,
{
    fn set_filter(&self, new_filter: EnvFilter) -> miette::Result<()> {
        self.modify(|current| *current = new_filter)
            .into_diagnostic()
    }
}

pub struct LogHandles {
    console_handle: Mutex<Box<dyn LogHandle>>,
    file_handle: Mutex<Box<dyn LogHandle>>,
    log_file: Option<PathBuf>,
}

/// Opens `<LOG_DIR>/spsa_tune_<timestamp>.log`. Logging to a file is a
/// convenience, so a read-only `/tmp` only costs the file layer.
fn open_log_file() -> Option<(NonBlocking, PathBuf)> {
    let log_dir = Path::new(LOG_DIR);
    fs::create_dir_all(log_dir).ok()?;

    let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
    let path = log_dir.join(format!("spsa_tune_{timestamp}.log"));
    let file = File::create(&path).ok()?;

    let (writer, guard) = non_blocking(file);
    std::mem::forget(guard); // Keep the guard alive.
    Some((writer, path))
}

static LOG_HANDLES: LazyLock<LogHandles> = LazyLock::new(|| {
    #[cfg(feature = "dev-tools")]
    color_backtrace::install();

    // Console Layer with its own reloadable filter
    let console_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    let (console_filter, console_handle) = reload::Layer::new(console_filter);
    let console_layer = fmt::layer()
        .without_time()
        .with_writer(stderr)
        .with_filter(console_filter);

    // File Layer with its own reloadable filter (initially off)
    let file_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::OFF.into())
        .from_env_lossy();
    let (file_filter, file_handle) = reload::Layer::new(file_filter);

    let (file_layer, log_file) = match open_log_file() {
        Some((writer, path)) => {
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false) // No colors in file
                .with_filter(file_filter);
            (Some(layer), Some(path))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();

    LogHandles {
        console_handle: Mutex::new(Box::new(console_handle)),
        file_handle: Mutex::new(Box::new(file_handle)),
        log_file,
    }
});

pub fn set_log_level(level: Level) -> miette::Result<()> {
    let new_filter = EnvFilter::new(level.to_string());

    LOG_HANDLES
        .console_handle
        .lock()
        .map_err(|_| miette!("Console log handle poisoned"))?
        .set_filter(new_filter)
        .with_context(|| format!("Failed to modify log filter to level: {level}"))
}

/// Mirrors `debug` and above into the log file. Errors when no log file
/// could be opened at startup.
pub fn toggle_file_logging(enable: bool) -> miette::Result<()> {
    if LOG_HANDLES.log_file.is_none() {
        return Err(miette!("No log file available under {LOG_DIR}"));
    }
    let new_filter = if enable {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("off")
    };

    LOG_HANDLES
        .file_handle
        .lock()
        .map_err(|_| miette!("File log handle poisoned"))?
        .set_filter(new_filter)
        .context("Failed to modify log filter")
}

pub fn log_file() -> Option<&'static Path> {
    LOG_HANDLES.log_file.as_deref()
}

/// Initialize tracing and backtrace
pub fn init() {
    LazyLock::force(&LOG_HANDLES);
    debug!("spsa-tune {APP_VERSION}");
    #[cfg(feature = "parallel")]
    {
        debug!("Evaluating pairs on the rayon pool");
    }
    #[cfg(not(feature = "parallel"))]
    {
        debug!("Evaluating pairs sequentially");
    }
}
