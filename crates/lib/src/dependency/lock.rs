//! Exclusive locks on artifact cache directories.
//!
//! Several processes commonly share one local repository. Each resolution
//! holds an advisory lock on `<dir>/.kiln.lock` of every cache directory it
//! may write to, waiting for other holders to finish.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::consts::LOCK_FILENAME;

/// Contents of a held lock file.
#[derive(Debug, Serialize, Deserialize)]
pub struct LockMetadata {
  pub version: u32,
  pub pid: u32,
  pub started_at_unix: u64,
  pub command: String,
  pub directory: PathBuf,
}

#[derive(Debug, Error)]
pub enum LockError {
  #[error("failed to create directory {path}: {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to open lock file {path}: {source}")]
  OpenFile {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write lock metadata to {path}: {source}")]
  WriteMetadata {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to lock {path}: {source}")]
  LockFailed {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Exclusive lock on a directory, released on drop.
#[derive(Debug)]
pub struct DirectoryLock {
  file: File,
  lock_path: PathBuf,
}

impl DirectoryLock {
  /// Lock `directory`, creating it if needed and waiting while another process holds it.
  pub fn acquire(directory: &Path, command: &str) -> Result<Self, LockError> {
    let lock_path = directory.join(LOCK_FILENAME);

    if !directory.exists() {
      std::fs::create_dir_all(directory).map_err(|source| LockError::CreateDir {
        path: directory.to_path_buf(),
        source,
      })?;
    }

    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&lock_path)
      .map_err(|source| LockError::OpenFile {
        path: lock_path.clone(),
        source,
      })?;

    match lock(&file, false) {
      Ok(()) => {}
      Err(err) if is_contended(&err) => {
        match read_holder(&lock_path) {
          Some(holder) => info!(
            path = %directory.display(),
            pid = holder.pid,
            command = %holder.command,
            "waiting for lock on {}",
            directory.display()
          ),
          None => info!(path = %directory.display(), "waiting for lock on {}", directory.display()),
        }
        lock(&file, true).map_err(|source| LockError::LockFailed {
          path: lock_path.clone(),
          source,
        })?;
      }
      Err(source) => {
        return Err(LockError::LockFailed {
          path: lock_path.clone(),
          source,
        });
      }
    }

    write_metadata(&file, command, directory).map_err(|source| LockError::WriteMetadata {
      path: lock_path.clone(),
      source,
    })?;
    debug!(path = %lock_path.display(), "lock acquired");

    Ok(DirectoryLock { file, lock_path })
  }

  /// Reads the metadata through the held handle.
  pub fn read_metadata(&self) -> io::Result<LockMetadata> {
    use std::io::{Seek, SeekFrom};

    let mut file = &self.file;
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).map_err(io::Error::other)
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }
}

/// Lock every directory, one after another in sorted order.
///
/// Duplicates are locked once. Locks are released when the returned vector
/// is dropped.
pub fn lock_directories(
  directories: impl IntoIterator<Item = PathBuf>,
  command: &str,
) -> Result<Vec<DirectoryLock>, LockError> {
  let mut directories: Vec<PathBuf> = directories.into_iter().collect();
  directories.sort();
  directories.dedup();

  let mut locks = Vec::with_capacity(directories.len());
  for directory in directories {
    locks.push(DirectoryLock::acquire(&directory, command)?);
  }
  Ok(locks)
}

fn write_metadata(file: &File, command: &str, directory: &Path) -> io::Result<()> {
  let metadata = LockMetadata {
    version: 1,
    pid: std::process::id(),
    started_at_unix: SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .unwrap_or_default()
      .as_secs(),
    command: command.to_string(),
    directory: directory.to_path_buf(),
  };

  file.set_len(0)?;
  let mut writer = io::BufWriter::new(file);
  serde_json::to_writer_pretty(&mut writer, &metadata).map_err(io::Error::other)?;
  writer.flush()
}

fn read_holder(lock_path: &Path) -> Option<LockMetadata> {
  let mut contents = String::new();
  File::open(lock_path).ok()?.read_to_string(&mut contents).ok()?;
  serde_json::from_str(&contents).ok()
}

#[cfg(unix)]
fn is_contended(err: &io::Error) -> bool {
  err.kind() == io::ErrorKind::WouldBlock
}

#[cfg(windows)]
fn is_contended(err: &io::Error) -> bool {
  use windows_sys::Win32::Foundation::ERROR_LOCK_VIOLATION;

  err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(ERROR_LOCK_VIOLATION as i32)
}

#[cfg(unix)]
fn lock(file: &File, blocking: bool) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  let operation = if blocking {
    FlockOperation::LockExclusive
  } else {
    FlockOperation::NonBlockingLockExclusive
  };

  flock(file.as_fd(), operation).map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(windows)]
fn lock(file: &File, blocking: bool) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::HANDLE;
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let handle = file.as_raw_handle() as HANDLE;
  let flags = if blocking {
    LOCKFILE_EXCLUSIVE_LOCK
  } else {
    LOCKFILE_FAIL_IMMEDIATELY | LOCKFILE_EXCLUSIVE_LOCK
  };

  // SAFETY: OVERLAPPED is a plain data struct that is valid when zero-initialized.
  // LockFileEx is safe to call with a valid file handle and zeroed OVERLAPPED.
  let result = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(handle, flags, 0, 1, 0, &mut overlapped)
  };

  if result == 0 {
    Err(io::Error::last_os_error())
  } else {
    Ok(())
  }
}
