//! Mount table helpers used when tearing down a container rootfs.

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

const MOUNTINFO: &str = "/proc/self/mountinfo";

/// Whether `path` is currently a mount point of this mount namespace.
///
/// Missing paths and an unreadable mount table both count as "not mounted".
pub fn is_mount_point(path: &Path) -> bool {
    let Ok(target) = std::fs::canonicalize(path) else {
        return false;
    };
    match std::fs::read_to_string(MOUNTINFO) {
        Ok(table) => mount_points(&table).any(|p| p == target),
        Err(e) => {
            tracing::debug!(error = %e, "Mount table unavailable");
            false
        }
    }
}

/// Mount points listed in a mountinfo table.
fn mount_points(table: &str) -> impl Iterator<Item = PathBuf> + '_ {
    table
        .lines()
        .filter_map(|line| line.split(' ').nth(4))
        .map(|field| PathBuf::from(unescape_octal(field)))
}

/// Decode the `\NNN` escapes mountinfo uses for space, tab, newline and backslash.
fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = std::str::from_utf8(&bytes[i + 1..i + 4]).unwrap_or("");
            if let Ok(value) = u8::from_str_radix(digits, 8) {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Unmount `path`.
pub fn unmount(path: &Path) -> io::Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let rc = unsafe { libc::umount2(c_path.as_ptr(), 0) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    tracing::debug!(path = %path.display(), "Unmounted");
    Ok(())
}
