use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

fn filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn init(log_level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(log_level))
        .with_target(false)
        .try_init();
}

/// Appends log output to `path` instead of stderr.
///
/// A daemonized process has its standard descriptors pointed at the null
/// device, so this is the only place its failures end up.
pub fn init_with_file(log_level: &str, path: &Path) -> io::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(log_level))
        .with_target(false)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .try_init();
    Ok(())
}
