//! Advisory lock on a sibling `.lock` file
//!
//! The lock file is created exclusively and holds the owner's process id as
//! plain text. A lock whose holder is gone, or which is older than the
//! staleness threshold, may be removed by the next acquirer.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Timed out after {waited:?} waiting for lock {path}")]
    Timeout { path: PathBuf, waited: Duration },

    #[error("Lock file I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Timing knobs for lock acquisition
#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub stale_after: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(100),
            stale_after: Duration::from_secs(5 * 60),
        }
    }
}

/// Answers whether a process id still refers to a running process
pub trait ProcessProbe: Send + Sync {
    /// `None` when liveness cannot be determined on this platform
    fn is_alive(&self, pid: u32) -> Option<bool>;
}

/// Probe backed by `/proc`; reports unknown where procfs is absent
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcfsProbe;

impl ProcessProbe for ProcfsProbe {
    fn is_alive(&self, pid: u32) -> Option<bool> {
        let proc_root = Path::new("/proc");
        if !proc_root.join("self").exists() {
            return None;
        }
        Some(proc_root.join(pid.to_string()).exists())
    }
}

/// Why an existing lock file was considered abandoned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    DeadHolder(u32),
    Expired(Duration),
}

/// Sibling lock path: `events.json` → `events.json.lock`
pub fn lock_path_for(document: &Path) -> PathBuf {
    let mut name = document
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "document".into());
    name.push(".lock");
    document.with_file_name(name)
}

/// A held lock; released on drop
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    file: Option<File>,
}

impl FileLock {
    pub fn acquire(path: impl Into<PathBuf>, options: LockOptions) -> Result<Self, LockError> {
        Self::acquire_with_probe(path, options, &ProcfsProbe)
    }

    pub fn acquire_with_probe(
        path: impl Into<PathBuf>,
        options: LockOptions,
        probe: &dyn ProcessProbe,
    ) -> Result<Self, LockError> {
        let path = path.into();
        let started = Instant::now();
        let deadline = started + options.timeout;
        let mut checked_stale = false;

        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    write!(file, "{}", std::process::id())
                        .and_then(|_| file.flush())
                        .map_err(|source| LockError::Io {
                            path: path.clone(),
                            source,
                        })?;
                    tracing::trace!(lock = %path.display(), "lock acquired");
                    return Ok(Self {
                        path,
                        file: Some(file),
                    });
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    if !checked_stale {
                        checked_stale = true;
                        if let Some(reason) = stale_reason(&path, options.stale_after, probe) {
                            match fs::remove_file(&path) {
                                Ok(()) => {
                                    tracing::warn!(
                                        lock = %path.display(),
                                        ?reason,
                                        "recovered stale lock"
                                    );
                                }
                                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                                Err(source) => {
                                    return Err(LockError::Io {
                                        path: path.clone(),
                                        source,
                                    })
                                }
                            }
                            continue;
                        }
                    }

                    let now = Instant::now();
                    if now >= deadline {
                        return Err(LockError::Timeout {
                            path,
                            waited: now - started,
                        });
                    }
                    std::thread::sleep(options.poll_interval.min(deadline - now));
                }
                Err(source) => return Err(LockError::Io { path, source }),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close and delete the lock file
    pub fn release(mut self) -> Result<(), LockError> {
        self.release_inner().map_err(|source| LockError::Io {
            path: self.path.clone(),
            source,
        })
    }

    fn release_inner(&mut self) -> io::Result<()> {
        if self.file.take().is_none() {
            return Ok(());
        }
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(err) = self.release_inner() {
            tracing::warn!(lock = %self.path.display(), error = %err, "failed to release lock");
        }
    }
}

/// Inspect an existing lock file; `None` means it is held by a live owner
pub fn stale_reason(
    path: &Path,
    stale_after: Duration,
    probe: &dyn ProcessProbe,
) -> Option<StaleReason> {
    let holder = fs::read_to_string(path)
        .ok()
        .and_then(|content| content.trim().parse::<u32>().ok());

    if let Some(pid) = holder {
        if probe.is_alive(pid) == Some(false) {
            return Some(StaleReason::DeadHolder(pid));
        }
    }

    let age = fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())?;
    if age > stale_after {
        return Some(StaleReason::Expired(age));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct FixedProbe(Option<bool>);

    impl ProcessProbe for FixedProbe {
        fn is_alive(&self, _pid: u32) -> Option<bool> {
            self.0
        }
    }

    fn quick() -> LockOptions {
        LockOptions {
            timeout: Duration::from_millis(300),
            poll_interval: Duration::from_millis(10),
            stale_after: Duration::from_secs(300),
        }
    }

    #[test]
    fn test_lock_path_is_sibling() {
        let path = lock_path_for(Path::new("/data/events.json"));
        assert_eq!(path, PathBuf::from("/data/events.json.lock"));
    }

    #[test]
    fn test_acquire_writes_pid_and_release_removes_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("doc.json.lock");

        let lock = FileLock::acquire(&path, quick()).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, std::process::id().to_string());

        lock.release().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_drop_releases_lock() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("doc.json.lock");
        {
            let _lock = FileLock::acquire(&path, quick()).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_live_holder_causes_timeout() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("doc.json.lock");
        fs::write(&path, "4242").unwrap();

        let err = FileLock::acquire_with_probe(&path, quick(), &FixedProbe(Some(true)))
            .unwrap_err();
        assert!(matches!(err, LockError::Timeout { .. }));
        assert!(path.exists());
    }

    #[test]
    fn test_dead_holder_is_recovered() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("doc.json.lock");
        fs::write(&path, "4242").unwrap();

        let lock = FileLock::acquire_with_probe(&path, quick(), &FixedProbe(Some(false))).unwrap();
        assert_eq!(
            fs::read_to_string(lock.path()).unwrap(),
            std::process::id().to_string()
        );
    }

    #[test]
    fn test_expired_lock_is_recovered_when_liveness_unknown() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("doc.json.lock");
        fs::write(&path, "not-a-pid").unwrap();

        let options = LockOptions {
            stale_after: Duration::from_millis(20),
            ..quick()
        };
        std::thread::sleep(Duration::from_millis(60));

        let lock = FileLock::acquire_with_probe(&path, options, &FixedProbe(None));
        assert!(lock.is_ok());
    }

    #[test]
    fn test_stale_reason_reports_dead_holder() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("doc.json.lock");
        fs::write(&path, "99").unwrap();

        let reason = stale_reason(&path, Duration::from_secs(60), &FixedProbe(Some(false)));
        assert_eq!(reason, Some(StaleReason::DeadHolder(99)));
        assert_eq!(
            stale_reason(&path, Duration::from_secs(60), &FixedProbe(Some(true))),
            None
        );
    }

    #[test]
    fn test_procfs_probe_sees_own_process() {
        if let Some(alive) = ProcfsProbe.is_alive(std::process::id()) {
            assert!(alive);
        }
    }
}
