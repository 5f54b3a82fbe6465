//! Advisory file locking with retry and exponential backoff
//!
//! Guards the queue store's read-modify-write critical section across
//! processes. Locks are released when the [`FileLock`] guard is dropped.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
    time::Duration,
};

use fs2::FileExt;

use crate::{Error, Result};

const DEFAULT_MAX_RETRIES: u32 = 10;
const BASE_DELAY_MS: u64 = 10;
/// Backoff ceiling per attempt.
const MAX_DELAY_MS: u64 = 5000;

/// An exclusive advisory lock that releases automatically when dropped.
///
/// Lock files are never deleted, so two processes cannot race on creating them.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    lock_path: PathBuf,
}

impl FileLock {
    #[must_use]
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.lock_path.display(), error = %e, "Failed to release file lock");
        } else {
            tracing::trace!(path = %self.lock_path.display(), "Released file lock");
        }
    }
}

/// Retry schedule for [`acquire_lock`]: attempt `n` waits `base * 2^n`, capped.
#[derive(Debug, Clone)]
pub struct LockOptions {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: BASE_DELAY_MS,
            max_delay_ms: MAX_DELAY_MS,
        }
    }
}

impl LockOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub const fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    #[must_use]
    pub const fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    fn delay_for(&self, attempt: u32) -> u64 {
        let factor = 2_u64.checked_pow(attempt).unwrap_or(u64::MAX);
        self.base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }
}

/// Acquire an exclusive file lock, retrying with exponential backoff.
///
/// # Errors
///
/// Returns error if:
/// - Lock cannot be acquired after max retries (a transient `LockHeld`)
/// - The lock file cannot be created or opened
pub async fn acquire_lock(lock_path: impl AsRef<Path>, options: &LockOptions) -> Result<FileLock> {
    let lock_path = lock_path.as_ref();

    if let Some(parent) = lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::io_error(format!("Failed to create lock directory: {e}")))?;
    }

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)
        .map_err(|e| {
            Error::io_error(format!(
                "Failed to open lock file '{}': {e}",
                lock_path.display()
            ))
        })?;

    let mut attempt = 0;
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => {
                tracing::trace!(path = %lock_path.display(), "Acquired file lock");
                return Ok(FileLock {
                    file,
                    lock_path: lock_path.to_path_buf(),
                });
            }
            Err(e) if attempt >= options.max_retries => {
                tracing::warn!(
                    path = %lock_path.display(),
                    attempts = attempt + 1,
                    error = %e,
                    "Giving up on file lock"
                );
                return Err(Error::lock_held(
                    lock_path.display().to_string(),
                    "another process",
                ));
            }
            Err(_) => {
                let delay = options.delay_for(attempt);
                tracing::debug!(
                    path = %lock_path.display(),
                    attempt = attempt + 1,
                    delay_ms = delay,
                    "File lock busy, retrying"
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_creates_parent_dirs() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("queue.lock");

        let lock = acquire_lock(&path, &LockOptions::default()).await?;
        assert!(path.exists());
        assert_eq!(lock.lock_path(), path.as_path());
        Ok(())
    }

    #[tokio::test]
    async fn test_second_holder_times_out_while_first_holds() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("queue.lock");
        let quick = LockOptions::new()
            .with_max_retries(2)
            .with_base_delay_ms(1)
            .with_max_delay_ms(2);

        let first = acquire_lock(&path, &quick).await?;
        let second = acquire_lock(&path, &quick).await;
        assert!(matches!(second, Err(ref e) if e.is_transient()));

        drop(first);
        let third = acquire_lock(&path, &quick).await;
        assert!(third.is_ok());
        Ok(())
    }

    #[test]
    fn test_backoff_is_capped() {
        let options = LockOptions::new()
            .with_base_delay_ms(10)
            .with_max_delay_ms(100);
        assert_eq!(options.delay_for(0), 10);
        assert_eq!(options.delay_for(2), 40);
        assert_eq!(options.delay_for(10), 100);
        assert_eq!(options.delay_for(80), 100);
    }
}
