//! Advisory run lock backed by a sentinel file.
//!
//! The sentinel's existence means "a sync run is in progress". Nothing beyond
//! file existence is coordinated, so this only guards runs on one host.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::Local;

use crate::error::{Error, Result};
use crate::io as fsio;

/// Parsed sentinel contents (`pid=<pid> started_at=<timestamp>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockInfo {
    pub pid: u32,
    pub started_at: String,
}

impl LockInfo {
    fn current() -> Self {
        Self {
            pid: std::process::id(),
            started_at: Local::now().to_rfc3339(),
        }
    }

    pub fn render(&self) -> String {
        format!("pid={} started_at={}", self.pid, self.started_at)
    }

    /// Returns `None` for sentinels not written by this tool.
    pub fn parse(text: &str) -> Option<Self> {
        let mut pid = None;
        let mut started_at = None;
        for field in text.split_whitespace() {
            if let Some(value) = field.strip_prefix("pid=") {
                pid = value.parse::<u32>().ok();
            } else if let Some(value) = field.strip_prefix("started_at=") {
                started_at = Some(value.to_string());
            }
        }
        Some(Self {
            pid: pid?,
            started_at: started_at?,
        })
    }

    pub fn is_holder_alive(&self) -> bool {
        is_pid_alive(self.pid)
    }
}

#[cfg(unix)]
fn is_pid_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs the existence and permission check only.
    let result = unsafe { libc::kill(pid, 0) };
    if result == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn is_pid_alive(_pid: u32) -> bool {
    true
}

pub struct LockManager {
    path: PathBuf,
    /// Sentinel text written by this manager, if it currently holds the lock.
    written: Mutex<Option<String>>,
}

impl LockManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            written: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn written(&self) -> MutexGuard<'_, Option<String>> {
        self.written
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take the lock. With `force`, an existing sentinel is overwritten.
    ///
    /// The returned guard releases the lock when dropped.
    pub fn acquire(&self, force: bool) -> Result<LockGuard<'_>> {
        let display = self.path.display().to_string();
        fsio::ensure_parent_dir(&self.path, "create lock directory")?;

        let content = LockInfo::current().render();

        if force {
            if let Ok(previous) = fs::read_to_string(&self.path) {
                crate::log_warn!("Overriding existing lock ({})", previous.trim());
            }
            fs::write(&self.path, &content)
                .map_err(|e| Error::lock_write_failed(display.clone(), e.to_string()))?;
        } else {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.path)
            {
                Ok(file) => self.fill_new_sentinel(file, &content)?,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    return Err(self.contention_error(display));
                }
                Err(e) => return Err(Error::lock_write_failed(display, e.to_string())),
            }
        }

        *self.written() = Some(content);
        crate::log_status!("lock", "Acquired {}", display);
        Ok(LockGuard { manager: self })
    }

    /// Write a freshly created sentinel. On failure the partial file is
    /// removed so it cannot block later runs.
    fn fill_new_sentinel(&self, mut file: impl Write, content: &str) -> Result<()> {
        file.write_all(content.as_bytes()).map_err(|e| {
            let _ = fs::remove_file(&self.path);
            Error::lock_write_failed(self.path.display().to_string(), e.to_string())
        })
    }

    fn contention_error(&self, display: String) -> Error {
        let holder = fs::read_to_string(&self.path)
            .map(|text| text.trim().to_string())
            .unwrap_or_default();

        let err = Error::lock_contention(display, holder.clone());
        match LockInfo::parse(&holder) {
            Some(info) if !info.is_holder_alive() => err.with_hint(format!(
                "Process {} is no longer running; the lock is probably stale",
                info.pid
            )),
            _ => err,
        }
    }

    /// Remove the sentinel if this manager wrote it. Never fails.
    ///
    /// A sentinel rewritten by another forced run is left in place.
    pub fn release(&self) {
        let Some(content) = self.written().take() else {
            return;
        };

        match fs::read_to_string(&self.path) {
            Ok(current) if current == content => {
                let _ = fs::remove_file(&self.path);
                crate::log_status!("lock", "Released {}", self.path.display());
            }
            _ => {}
        }
    }

    pub fn is_held(&self) -> bool {
        self.written().is_some()
    }
}

/// Holds the run lock; dropping it releases the sentinel.
pub struct LockGuard<'a> {
    manager: &'a LockManager,
}

impl LockGuard<'_> {
    pub fn path(&self) -> &Path {
        self.manager.path()
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.manager.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parse_reads_back_rendered_sentinel() {
        let info = LockInfo {
            pid: 4242,
            started_at: "2024-05-01T10:00:00+02:00".to_string(),
        };
        assert_eq!(LockInfo::parse(&info.render()), Some(info));
    }

    #[test]
    fn parse_rejects_foreign_text() {
        assert_eq!(LockInfo::parse("locked by deploy"), None);
        assert_eq!(LockInfo::parse("pid=abc started_at=now"), None);
    }

    #[test]
    fn current_process_is_alive() {
        assert!(is_pid_alive(std::process::id()));
    }

    #[test]
    fn acquire_creates_missing_parent_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scripts").join(".sync.lock");
        let manager = LockManager::new(&path);

        let guard = manager.acquire(false).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let info = LockInfo::parse(&text).unwrap();
        assert_eq!(info.pid, std::process::id());

        drop(guard);
        assert!(!path.exists());
    }

    struct BrokenWriter;

    impl Write for BrokenWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_sentinel_write_leaves_no_lock_behind() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".sync.lock");
        fs::write(&path, "").unwrap();

        let manager = LockManager::new(&path);
        let err = manager
            .fill_new_sentinel(BrokenWriter, "pid=1 started_at=x")
            .unwrap_err();
        assert_eq!(err.code.as_str(), "lock.write_failed");
        assert!(!path.exists());
        assert!(manager.acquire(false).is_ok());
    }

    #[test]
    fn release_without_acquire_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".sync.lock");
        fs::write(&path, "pid=1 started_at=x").unwrap();

        let manager = LockManager::new(&path);
        manager.release();
        manager.release();
        assert!(path.exists());
    }
}
