//! PID file for the managed service
//!
//! The launcher records the PID of the service it spawned so a later reset,
//! possibly from a different host process, can still terminate it.

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

/// Read the PID from the PID file
///
/// Returns `Ok(Some(pid))` if the file exists and contains a valid PID,
/// `Ok(None)` if the file doesn't exist, or an error if the file is malformed.
pub fn read_pid_file(path: &Path) -> io::Result<Option<u32>> {
    match fs::File::open(path) {
        Ok(mut file) => {
            let mut contents = String::new();
            file.read_to_string(&mut contents)?;
            let pid = contents
                .trim()
                .parse::<u32>()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            Ok(Some(pid))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Write a PID to the PID file, creating parent directories
pub fn write_pid_file(path: &Path, pid: u32) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = fs::File::create(path)?;
    writeln!(file, "{}", pid)?;
    Ok(())
}

/// Remove the PID file
///
/// Returns `Ok(())` even if the file doesn't exist.
pub fn remove_pid_file(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Read and remove the PID file, returning the PID only if that process is alive
///
/// A malformed file is removed and treated as absent.
pub fn take_live_pid(path: &Path) -> Option<u32> {
    let pid = match read_pid_file(path) {
        Ok(pid) => pid,
        Err(e) => {
            tracing::warn!("Ignoring unreadable PID file {:?}: {}", path, e);
            None
        }
    };

    if let Err(e) = remove_pid_file(path) {
        tracing::warn!("Failed to remove PID file {:?}: {}", path, e);
    }

    pid.filter(|pid| is_process_alive(*pid))
}

/// Check if a process with the given PID is still alive
///
/// On Unix, uses kill(pid, 0) to check if the process exists.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    // ESRCH means no such process; EPERM means it exists but belongs to someone else
    unsafe {
        let result = libc::kill(pid as libc::pid_t, 0);
        if result == 0 {
            return true;
        }
        let err = std::io::Error::last_os_error();
        err.raw_os_error() == Some(libc::EPERM)
    }
}

/// Check if a process with the given PID is still alive
///
/// On Windows, uses OpenProcess to check if the process exists.
#[cfg(windows)]
pub fn is_process_alive(pid: u32) -> bool {
    use std::ptr;
    use windows_sys::Win32::Foundation::{CloseHandle, INVALID_HANDLE_VALUE};
    use windows_sys::Win32::System::Threading::{OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION};

    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
        if handle == INVALID_HANDLE_VALUE || handle == ptr::null_mut() {
            return false;
        }
        CloseHandle(handle);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_nonexistent_pid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("service.pid");
        assert!(read_pid_file(&path).unwrap().is_none());
    }

    #[test]
    fn test_write_and_read_pid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("service.pid");

        write_pid_file(&path, 12345).unwrap();
        assert_eq!(read_pid_file(&path).unwrap(), Some(12345));
    }

    #[test]
    fn test_remove_nonexistent_pid_file() {
        let dir = TempDir::new().unwrap();
        remove_pid_file(&dir.path().join("missing.pid")).unwrap();
    }

    #[test]
    fn test_malformed_pid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("service.pid");
        fs::write(&path, "not-a-pid").unwrap();
        assert!(read_pid_file(&path).is_err());
        assert_eq!(take_live_pid(&path), None);
        assert!(!path.exists());
    }

    #[test]
    fn test_take_live_pid_for_current_process() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("service.pid");
        write_pid_file(&path, std::process::id()).unwrap();

        assert_eq!(take_live_pid(&path), Some(std::process::id()));
        assert!(!path.exists());
    }

    #[test]
    fn test_take_live_pid_drops_dead_process() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("service.pid");
        write_pid_file(&path, 999_999_999).unwrap();
        assert_eq!(take_live_pid(&path), None);
    }

    #[test]
    fn test_current_process_is_alive() {
        assert!(is_process_alive(std::process::id()));
    }
}
