use std::cell::Cell;

use anyhow::bail;
use latch_common::ProcessMode;
use latch_lifecycle::{LaunchOptions, prepare_with, write_pid_file};
use tempfile::tempdir;

#[test]
fn pid_file_holds_decimal_pid_only() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("latch.pid");
    write_pid_file(&path).expect("write");
    let raw = std::fs::read_to_string(&path).expect("read");
    assert_eq!(raw, std::process::id().to_string());
}

#[test]
fn pid_file_is_written_after_detaching() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("latch.pid");
    let options = LaunchOptions {
        daemonize: true,
        pid_file: Some(path.clone()),
    };

    let detached = Cell::new(false);
    let mode = prepare_with(&options, || {
        assert!(!path.exists(), "PID file written before detaching");
        detached.set(true);
        Ok(())
    })
    .expect("prepare");

    assert!(detached.get());
    assert_eq!(mode, ProcessMode::Daemonized);
    let raw = std::fs::read_to_string(&path).expect("read");
    assert_eq!(raw, std::process::id().to_string());
}

#[test]
fn interactive_launch_never_detaches() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("latch.pid");
    let options = LaunchOptions {
        daemonize: false,
        pid_file: Some(path.clone()),
    };

    let mode = prepare_with(&options, || bail!("must not detach")).expect("prepare");
    assert_eq!(mode, ProcessMode::Interactive);
    assert!(path.exists());
}

#[test]
fn failed_detach_writes_no_pid_file() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("latch.pid");
    let options = LaunchOptions {
        daemonize: true,
        pid_file: Some(path.clone()),
    };

    assert!(prepare_with(&options, || bail!("fork failed")).is_err());
    assert!(!path.exists());
}

#[test]
fn no_pid_file_unless_requested() {
    let options = LaunchOptions::default();
    let mode = prepare_with(&options, || Ok(())).expect("prepare");
    assert_eq!(mode, ProcessMode::Interactive);
}
