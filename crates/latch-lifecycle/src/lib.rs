use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use latch_common::ProcessMode;
use tracing::debug;

static DAEMONIZED: AtomicBool = AtomicBool::new(false);

/// What the operator asked for on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchOptions {
    pub daemonize: bool,
    pub pid_file: Option<PathBuf>,
}

/// Daemonization is only ever explicit; there is no detection of a missing terminal.
pub fn determine_mode(requested_daemonize: bool) -> ProcessMode {
    if requested_daemonize {
        ProcessMode::Daemonized
    } else {
        ProcessMode::Interactive
    }
}

/// Detaches (if requested) and then writes the PID file (if requested).
///
/// Must run before any thread is spawned.
pub fn prepare(options: &LaunchOptions) -> Result<ProcessMode> {
    prepare_with(options, daemonize)
}

/// [`prepare`] with the detach step supplied by the caller.
pub fn prepare_with(
    options: &LaunchOptions,
    detach: impl FnOnce() -> Result<()>,
) -> Result<ProcessMode> {
    let mode = determine_mode(options.daemonize);
    if mode.is_daemonized() {
        detach()?;
    }
    // The PID supervisors care about is the detached one.
    if let Some(path) = &options.pid_file {
        write_pid_file(path)?;
    }
    Ok(mode)
}

/// Double-forks away from the controlling terminal and points stdin, stdout
/// and stderr at the null device. Only the final grandchild returns.
pub fn daemonize() -> Result<()> {
    claim_daemonization()?;
    detach()
}

fn claim_daemonization() -> Result<()> {
    if DAEMONIZED.swap(true, Ordering::SeqCst) {
        bail!("process has already been daemonized");
    }
    Ok(())
}

#[cfg(unix)]
fn detach() -> Result<()> {
    use nix::unistd::{ForkResult, fork, setsid};

    // SAFETY: called from `prepare` at startup while the process is still
    // single-threaded; the parent exits without touching shared state.
    match unsafe { fork() }.context("first fork failed")? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    setsid().context("failed to start a new session")?;

    // SAFETY: still single-threaded, see above. The session leader exits so
    // the grandchild can never reacquire a controlling terminal.
    match unsafe { fork() }.context("second fork failed")? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    redirect_stdio()
}

#[cfg(unix)]
fn redirect_stdio() -> Result<()> {
    use std::os::fd::AsRawFd;

    let null = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")
        .context("failed to open /dev/null")?;
    for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        // SAFETY: `null` is open for the duration of the call and dup2
        // atomically closes and replaces `target`.
        if unsafe { libc::dup2(null.as_raw_fd(), target) } < 0 {
            return Err(std::io::Error::last_os_error())
                .with_context(|| format!("failed to redirect fd {target} to /dev/null"));
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn detach() -> Result<()> {
    bail!("daemonization is not supported on this platform")
}

/// Writes the current PID as decimal text. The parent directory must exist.
pub fn write_pid_file(path: &Path) -> Result<()> {
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create PID file in {}", dir.display()))?;
    write!(tmp, "{}", std::process::id())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .with_context(|| format!("failed to write PID file {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o644))?;
    }

    debug!(path = %path.display(), pid = std::process::id(), "wrote PID file");
    Ok(())
}

/// Files created from here on are not accessible to others.
pub fn apply_umask() {
    #[cfg(unix)]
    {
        use nix::sys::stat::{Mode, umask};
        let _ = umask(Mode::from_bits_truncate(0o007));
    }
}

pub fn create_parent_dirs<'a>(paths: impl IntoIterator<Item = &'a Path>) -> Result<()> {
    for path in paths {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty())
            && !parent.is_dir()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
            debug!(dir = %parent.display(), "created directory");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn mode_follows_request_only() {
        assert_eq!(determine_mode(false), ProcessMode::Interactive);
        assert_eq!(determine_mode(true), ProcessMode::Daemonized);
    }

    #[test]
    fn second_daemonization_is_refused() {
        claim_daemonization().expect("first claim");
        let err = claim_daemonization().expect_err("second claim");
        assert!(err.to_string().contains("already"));
    }

    #[test]
    fn creates_missing_parents() {
        let dir = tempdir().expect("tempdir");
        let file = dir.path().join("a").join("b").join("known_hosts");
        create_parent_dirs([file.as_path()]).expect("create");
        assert!(dir.path().join("a").join("b").is_dir());
        assert!(!file.exists());
        // idempotent
        create_parent_dirs([file.as_path()]).expect("again");
    }
}
