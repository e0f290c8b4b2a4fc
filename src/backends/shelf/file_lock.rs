//! Exclusive lock files for single-process shelf access.
//!
//! The lock lives beside the shelf as `<shelf>.lock` and holds the owner's
//! process id, so a refused opener can say who has the shelf. The OS lock
//! goes away with the handle when the [`FileLock`] is dropped; the file
//! itself is left in place.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{Error as IoError, ErrorKind, Result as IoResult, Write};
use std::path::{Path, PathBuf};

/// Held lock on one shelf file.
#[derive(Debug)]
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    /// Lock-file path for `shelf`.
    #[must_use]
    pub fn path_for(shelf: &Path) -> PathBuf {
        let mut name = OsString::from(shelf.as_os_str());
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Takes the lock for `shelf`, failing at once if it is held.
    ///
    /// # Errors
    /// - `ErrorKind::WouldBlock` if another handle holds the lock; the
    ///   message names the holder's pid when it can be read
    /// - any error from creating or writing the lock file
    pub fn acquire(shelf: &Path) -> IoResult<Self> {
        let path = Self::path_for(shelf);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if !lock_exclusive(&file)? {
            let message = match holder(&path) {
                Some(pid) => format!("shelf is locked by process {pid}"),
                None => "shelf is locked by another handle".to_string(),
            };
            return Err(IoError::new(ErrorKind::WouldBlock, message));
        }

        file.set_len(0)?;
        write!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(Self { _file: file, path })
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Pid recorded by the current holder, if any.
fn holder(lock_path: &Path) -> Option<u32> {
    fs::read_to_string(lock_path).ok()?.trim().parse().ok()
}

/// Returns `Ok(false)` when someone else holds the lock.
#[cfg(unix)]
fn lock_exclusive(file: &File) -> IoResult<bool> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: the descriptor belongs to `file`, which outlives the call.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }
    let err = IoError::last_os_error();
    if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        Ok(false)
    } else {
        Err(err)
    }
}

#[cfg(windows)]
fn lock_exclusive(file: &File) -> IoResult<bool> {
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Foundation::{ERROR_LOCK_VIOLATION, HANDLE};
    use windows_sys::Win32::Storage::FileSystem::{
        LockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY,
    };
    use windows_sys::Win32::System::IO::OVERLAPPED;

    let handle = file.as_raw_handle() as HANDLE;
    // SAFETY: the handle belongs to `file`; OVERLAPPED is plain data.
    let ok = unsafe {
        let mut overlapped = std::mem::zeroed::<OVERLAPPED>();
        LockFileEx(
            handle,
            LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
            0,
            1,
            0,
            &mut overlapped,
        )
    };
    if ok != 0 {
        return Ok(true);
    }
    let err = IoError::last_os_error();
    if err.raw_os_error() == Some(ERROR_LOCK_VIOLATION as i32) {
        Ok(false)
    } else {
        Err(err)
    }
}

#[cfg(not(any(unix, windows)))]
fn lock_exclusive(_file: &File) -> IoResult<bool> {
    Err(IoError::new(
        ErrorKind::Unsupported,
        "shelf locking is not available on this platform",
    ))
}
