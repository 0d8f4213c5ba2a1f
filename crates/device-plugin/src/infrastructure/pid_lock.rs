use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Read;
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::path::PathBuf;

use tracing::info;

use crate::infrastructure::StartupError;

/// Exclusive advisory lock guaranteeing a single running instance.
///
/// The lock is held until the value is dropped. The file keeps the PID of
/// the holder for operators.
#[derive(Debug)]
pub struct PidLock {
    file: File,
    path: PathBuf,
}

impl PidLock {
    pub fn acquire(path: &Path) -> Result<Self, StartupError> {
        let lock_err = |source: io::Error| StartupError::LockFile {
            path: path.to_path_buf(),
            source,
        };

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false) // the current holder's pid must survive a failed attempt
            .open(path)
            .map_err(lock_err)?;

        // LOCK_NB: fail instead of waiting when another process holds it
        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if result != 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Err(StartupError::AlreadyRunning {
                    path: path.to_path_buf(),
                    holder: read_pid(&mut file),
                });
            }
            return Err(lock_err(err));
        }

        file.set_len(0).map_err(lock_err)?;
        write!(file, "{}", std::process::id()).map_err(lock_err)?;
        file.flush().map_err(lock_err)?;

        info!("Acquired instance lock {:?}", path);
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
        // the file stays: removing it would let a waiting process lock an
        // unlinked inode while a third one creates a fresh file
    }
}

fn read_pid(file: &mut File) -> Option<u32> {
    let mut content = String::new();
    file.read_to_string(&mut content).ok()?;
    content.trim().parse().ok()
}
