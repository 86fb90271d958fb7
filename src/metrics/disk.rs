//! Filesystem usage for the volume backing a path

use anyhow::Result;
use std::path::Path;

/// Bytes in use on the filesystem containing `path`
#[cfg(unix)]
pub fn used_bytes(path: &Path) -> Result<u64> {
    use anyhow::{bail, Context};
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .with_context(|| format!("Path contains a NUL byte: {}", path.display()))?;

    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    // SAFETY: c_path is NUL-terminated and stat is a valid out-pointer
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        bail!("statvfs failed for {}: {}", path.display(), err);
    }

    let used_blocks = (stat.f_blocks as u64).saturating_sub(stat.f_bfree as u64);
    Ok(used_blocks.saturating_mul(stat.f_frsize as u64))
}

#[cfg(not(unix))]
pub fn used_bytes(path: &Path) -> Result<u64> {
    anyhow::bail!(
        "disk usage sampling is not supported on this platform ({})",
        path.display()
    )
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_used_bytes_for_temp_dir() {
        let dir = tempfile::tempdir().unwrap();
        let used = used_bytes(dir.path()).unwrap();
        assert!(used > 0);
    }

    #[test]
    fn test_missing_path_is_error() {
        assert!(used_bytes(Path::new("/definitely/not/here/vecbench")).is_err());
    }
}
