//! Named-pipe creation for the launch handshake

use std::io;
use std::path::Path;

/// Create a FIFO at `path`, readable and writable only by the owner.
///
/// The path must not already exist; launchers create one fresh FIFO inside a
/// private temporary directory per launch.
#[cfg(unix)]
pub fn create(path: &Path) -> io::Result<()> {
    use std::os::unix::ffi::OsStrExt;

    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    // mkfifo(2) fails with EEXIST rather than truncating, which is what we
    // want: a stale path would mean two launches sharing a handshake.
    let result = unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) };
    if result != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn create(_path: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "FIFO handshake is only supported on Unix",
    ))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_fifo() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fifo");
        create(&path).unwrap();

        use std::os::unix::fs::FileTypeExt;
        let file_type = std::fs::metadata(&path).unwrap().file_type();
        assert!(file_type.is_fifo());
    }

    #[test]
    fn test_create_existing_path_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fifo");
        create(&path).unwrap();
        assert!(create(&path).is_err());
    }
}
