// Sidecar-file advisory lock with a bounded wait, guarding single-writer engines.
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use libc::{EACCES, EPERM};

use crate::core::error::{Error, ErrorKind};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum LockFailure {
    Busy,
    Permission,
    Io,
}

#[derive(Debug)]
pub(crate) struct OpenLock {
    file: File,
    path: PathBuf,
}

impl OpenLock {
    /// Polls for an exclusive lock on `path` until `timeout` elapses.
    pub(crate) fn acquire(path: impl AsRef<Path>, timeout: Duration) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|err| {
                Error::new(ErrorKind::OpenFailed)
                    .with_message("failed to open lock file")
                    .with_path(&path)
                    .with_source(err)
            })?;

        let deadline = Instant::now() + timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(Self { file, path }),
                Err(err) => {
                    let failure = classify(&err);
                    if failure == LockFailure::Busy && Instant::now() < deadline {
                        thread::sleep(POLL_INTERVAL);
                        continue;
                    }
                    return Err(lock_error(failure, &path, timeout, err));
                }
            }
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for OpenLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn classify(err: &io::Error) -> LockFailure {
    let errno = err.raw_os_error().unwrap_or_default();
    if errno == EACCES || errno == EPERM {
        return LockFailure::Permission;
    }
    if err.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
        return LockFailure::Busy;
    }
    match err.kind() {
        io::ErrorKind::WouldBlock => LockFailure::Busy,
        io::ErrorKind::PermissionDenied => LockFailure::Permission,
        _ => LockFailure::Io,
    }
}

fn lock_error(failure: LockFailure, path: &Path, timeout: Duration, err: io::Error) -> Error {
    let error = Error::new(ErrorKind::OpenFailed).with_path(path);
    let error = match failure {
        LockFailure::Busy => error
            .with_message(format!("store still locked after {timeout:?}"))
            .with_hint("Another process or handle has this store open; close it first."),
        LockFailure::Permission => error
            .with_message("permission denied while locking store")
            .with_hint("Check file permissions on the store directory."),
        LockFailure::Io => error.with_message("failed to lock store"),
    };
    error.with_source(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_lock_times_out_as_open_failed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.lock");
        let held = OpenLock::acquire(&path, Duration::from_millis(50)).expect("first lock");
        assert_eq!(held.path(), path.as_path());

        let started = Instant::now();
        let err = OpenLock::acquire(&path, Duration::from_millis(50)).expect_err("contended");
        assert_eq!(err.kind(), ErrorKind::OpenFailed);
        assert!(started.elapsed() >= Duration::from_millis(50));

        drop(held);
        OpenLock::acquire(&path, Duration::from_millis(50)).expect("lock after release");
    }

    #[test]
    fn lock_errors_classify_like_errno() {
        let err = io::Error::from_raw_os_error(libc::EAGAIN);
        assert_eq!(classify(&err), LockFailure::Busy);

        let err = io::Error::from_raw_os_error(libc::EWOULDBLOCK);
        assert_eq!(classify(&err), LockFailure::Busy);

        let err = io::Error::from_raw_os_error(libc::EACCES);
        assert_eq!(classify(&err), LockFailure::Permission);

        let err = io::Error::from_raw_os_error(libc::EPERM);
        assert_eq!(classify(&err), LockFailure::Permission);

        let err = io::Error::from_raw_os_error(libc::EBADF);
        assert_eq!(classify(&err), LockFailure::Io);
    }
}
