use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Initialise logging. In debug mode the default level is `debug` and may be
/// overridden via the `RUST_LOG` environment variable, otherwise `info` is
/// forced.
///
/// When `log_file` is given, events are also written to that file through a
/// non-blocking appender. Calling this more than once is harmless; only the
/// first subscriber is installed.
pub fn init(debug: bool, log_file: Option<PathBuf>) {
    // With debug logging disabled we ignore `RUST_LOG` so a stray variable in
    // the user's environment cannot turn on verbose key logging.
    let level = if debug { "debug" } else { "info" };

    let filter = if debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    } else {
        EnvFilter::new(level)
    };

    let file_layer = log_file.and_then(|path| {
        let file_name = path.file_name()?.to_owned();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => Path::new(".").to_path_buf(),
        };
        if let Err(err) = std::fs::create_dir_all(&dir) {
            eprintln!("failed to create log directory {}: {err}", dir.display());
            return None;
        }
        let appender = tracing_appender::rolling::never(dir, file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        if FILE_GUARD.set(guard).is_err() {
            // a previous call already owns the log file
            return None;
        }
        Some(fmt::layer().with_ansi(false).with_writer(writer))
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init();
}
