//! Machine-wide run lock and cross-process stop requests
//!
//! An exclusive run against a persistent store holds an exclusive lock on
//! `run.lock` in the state directory until it finishes, so two processes
//! sharing a state directory never run at once. The lock is released when
//! the file handle closes, including when the holder dies.
//!
//! A process that wants another process's run to stop writes
//! `stop.request` (`graceful` or `abort`). The running process reads it at
//! resource boundaries; the next run to take the lock clears it.

use crate::cancel::StopMode;
use crate::error::Result;
use std::fs::{self, File, OpenOptions, TryLockError};
use std::io;
use std::path::Path;

const LOCK_FILE: &str = "run.lock";
const STOP_FILE: &str = "stop.request";
const STOP_TMP_FILE: &str = "stop.request.tmp";

/// Exclusive hold on a state directory; released on drop
#[derive(Debug)]
pub(crate) struct RunLock {
    file: File,
}

impl RunLock {
    /// Take the lock if nobody holds it; `None` when it is held elsewhere
    pub(crate) fn try_acquire(dir: &Path) -> Result<Option<Self>> {
        let file = open_lock_file(dir)?;
        match file.try_lock() {
            Ok(()) => Ok(Some(Self { file })),
            Err(TryLockError::WouldBlock) => Ok(None),
            Err(TryLockError::Error(e)) => Err(e.into()),
        }
    }

    /// Wait until the lock is free, then take it
    pub(crate) fn acquire(dir: &Path) -> Result<Self> {
        let file = open_lock_file(dir)?;
        file.lock()?;
        Ok(Self { file })
    }

    /// Whether some run currently holds the lock
    pub(crate) fn is_held(dir: &Path) -> Result<bool> {
        Ok(Self::try_acquire(dir)?.is_none())
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            log::warn!("Failed to release run lock: {e}");
        }
    }
}

fn open_lock_file(dir: &Path) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(dir.join(LOCK_FILE))
}

/// Ask whoever holds the lock to stop; an abort is never downgraded
pub(crate) fn request_stop(dir: &Path, mode: StopMode) -> Result<()> {
    if mode == StopMode::Graceful && read_stop(dir)? == Some(StopMode::Abort) {
        return Ok(());
    }
    let word = match mode {
        StopMode::Graceful => "graceful",
        StopMode::Abort => "abort",
    };
    let tmp = dir.join(STOP_TMP_FILE);
    fs::write(&tmp, word)?;
    fs::rename(&tmp, dir.join(STOP_FILE))?;
    Ok(())
}

/// The stop request left for the current run, if any
pub(crate) fn read_stop(dir: &Path) -> Result<Option<StopMode>> {
    match fs::read_to_string(dir.join(STOP_FILE)) {
        Ok(word) if word.trim() == "abort" => Ok(Some(StopMode::Abort)),
        Ok(_) => Ok(Some(StopMode::Graceful)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn clear_stop(dir: &Path) -> Result<()> {
    match fs::remove_file(dir.join(STOP_FILE)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_is_exclusive_until_dropped() {
        let temp = TempDir::new().unwrap();
        assert!(!RunLock::is_held(temp.path()).unwrap());

        let held = RunLock::try_acquire(temp.path()).unwrap().unwrap();
        assert!(RunLock::is_held(temp.path()).unwrap());
        assert!(RunLock::try_acquire(temp.path()).unwrap().is_none());

        drop(held);
        assert!(!RunLock::is_held(temp.path()).unwrap());
        assert!(RunLock::try_acquire(temp.path()).unwrap().is_some());
    }

    #[test]
    fn test_blocking_acquire_waits_for_release() {
        let temp = TempDir::new().unwrap();
        let held = RunLock::try_acquire(temp.path()).unwrap().unwrap();

        std::thread::scope(|s| {
            let waiter = s.spawn(|| RunLock::acquire(temp.path()).map(drop));
            drop(held);
            waiter.join().unwrap().unwrap();
        });
    }

    #[test]
    fn test_stop_request_round_trip() {
        let temp = TempDir::new().unwrap();
        assert_eq!(read_stop(temp.path()).unwrap(), None);

        request_stop(temp.path(), StopMode::Graceful).unwrap();
        assert_eq!(read_stop(temp.path()).unwrap(), Some(StopMode::Graceful));

        request_stop(temp.path(), StopMode::Abort).unwrap();
        request_stop(temp.path(), StopMode::Graceful).unwrap();
        assert_eq!(read_stop(temp.path()).unwrap(), Some(StopMode::Abort));

        clear_stop(temp.path()).unwrap();
        clear_stop(temp.path()).unwrap();
        assert_eq!(read_stop(temp.path()).unwrap(), None);
    }
}
