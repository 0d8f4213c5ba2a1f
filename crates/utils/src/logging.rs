//! provides logging helpers

use std::path::Path;
use std::path::PathBuf;

use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::fmt::layer;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// When set, logs go to a daily rotated file at this path instead of stderr.
pub const LOG_PATH_ENV_VAR: &str = "DEV_PLUGIN_LOG_PATH";

const DEFAULT_LOG_PREFIX: &str = "k8s-dev-plugin.log";

pub type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

/// Builds the fmt layer shared by all binaries.
///
/// Returns the worker guard of the non-blocking file writer when logging to a
/// file; the guard must be held until the process exits or buffered lines are
/// lost.
pub fn get_fmt_layer<S>(log_path: Option<String>) -> (BoxedLayer<S>, Option<WorkerGuard>)
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let Some(log_path) = log_path.filter(|p| !p.is_empty()) else {
        return (stderr_layer(), None);
    };

    let log_path = PathBuf::from(log_path);
    let (dir, prefix) = split_log_path(&log_path);

    match RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(3)
        .build(dir)
    {
        Ok(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .boxed();
            (layer, Some(guard))
        }
        Err(e) => {
            eprintln!("failed to create log file at {log_path:?}, logging to stderr: {e}");
            (stderr_layer(), None)
        }
    }
}

fn stderr_layer<S>() -> BoxedLayer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .boxed()
}

fn split_log_path(path: &Path) -> (&Path, String) {
    if path.is_dir() {
        return (path, DEFAULT_LOG_PREFIX.to_string());
    }
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let prefix = path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| DEFAULT_LOG_PREFIX.to_string());
    (dir, prefix)
}
