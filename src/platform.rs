//! Platform-specific file operations the index saver and file sync tasks
//! need: setting the hidden attribute on the persisted index (§4.8, §6) and
//! emulating an atomic replace where the host OS has no single-call version
//! of it (§9 design note).
//!
//! Generalises the teacher's Windows delete-by-handle code (`src/winapi.rs`)
//! from "delete fast" into "hide" and "atomically replace".

use std::io;
use std::path::Path;

#[cfg(windows)]
use windows::core::PCWSTR;
#[cfg(windows)]
use windows::Win32::Storage::FileSystem::{
    GetFileAttributesW, MoveFileExW, SetFileAttributesW, FILE_ATTRIBUTE_HIDDEN,
    FILE_FLAGS_AND_ATTRIBUTES, INVALID_FILE_ATTRIBUTES, MOVE_FILE_REPLACE_EXISTING,
    MOVE_FILE_WRITE_THROUGH,
};

#[cfg(windows)]
fn path_to_wide(path: &Path) -> Vec<u16> {
    path.to_string_lossy()
        .encode_utf16()
        .chain(std::iter::once(0))
        .collect()
}

/// Sets the hidden attribute on `path` where the host OS has that concept.
/// A no-op that always succeeds on Unix-like systems, which have no such
/// attribute (dotfile-naming convention is a separate, name-based concern —
/// see [`crate::paths::is_hidden_name`]).
#[cfg(windows)]
pub fn hide_file(path: &Path) -> io::Result<()> {
    let wide = path_to_wide(path);
    let ok = unsafe { SetFileAttributesW(PCWSTR(wide.as_ptr()), FILE_ATTRIBUTE_HIDDEN) };
    ok.map_err(|e| io::Error::from_raw_os_error((e.code().0 & 0xFFFF) as i32))
}

#[cfg(not(windows))]
pub fn hide_file(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(windows)]
fn clear_hidden_if_set(path: &Path) -> io::Result<bool> {
    let wide = path_to_wide(path);
    let attrs = unsafe { GetFileAttributesW(PCWSTR(wide.as_ptr())) };
    if attrs == INVALID_FILE_ATTRIBUTES {
        return Ok(false);
    }
    let was_hidden = (attrs & FILE_ATTRIBUTE_HIDDEN.0) != 0;
    if was_hidden {
        let cleared = FILE_FLAGS_AND_ATTRIBUTES(attrs & !FILE_ATTRIBUTE_HIDDEN.0);
        unsafe { SetFileAttributesW(PCWSTR(wide.as_ptr()), cleared) }
            .map_err(|e| io::Error::from_raw_os_error((e.code().0 & 0xFFFF) as i32))?;
    }
    Ok(was_hidden)
}

/// Atomically replaces `dest` with `src`, reasserting the hidden attribute
/// across the replace where it applies.
///
/// On Unix this is a single `rename(2)`. On Windows, a hidden destination
/// can't be replaced directly (per the §9 design note): clear its hidden
/// attribute, `MoveFileExW` with replace-existing semantics, then restore
/// the attribute on the new file if the destination used to carry it.
#[cfg(windows)]
pub fn atomic_replace(src: &Path, dest: &Path) -> io::Result<()> {
    let was_hidden = clear_hidden_if_set(dest).unwrap_or(false);
    let wide_src = path_to_wide(src);
    let wide_dest = path_to_wide(dest);
    let result = unsafe {
        MoveFileExW(
            PCWSTR(wide_src.as_ptr()),
            PCWSTR(wide_dest.as_ptr()),
            MOVE_FILE_REPLACE_EXISTING | MOVE_FILE_WRITE_THROUGH,
        )
    };
    result.map_err(|e| io::Error::from_raw_os_error((e.code().0 & 0xFFFF) as i32))?;
    if was_hidden {
        let _ = hide_file(dest);
    }
    Ok(())
}

#[cfg(not(windows))]
pub fn atomic_replace(src: &Path, dest: &Path) -> io::Result<()> {
    std::fs::rename(src, dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn atomic_replace_moves_content_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.tmp");
        let dest = dir.path().join("dest.idx");
        fs::write(&src, b"hello").unwrap();
        fs::write(&dest, b"old").unwrap();
        atomic_replace(&src, &dest).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"hello");
        assert!(!src.exists());
    }

    #[test]
    fn hide_file_is_harmless_when_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("a.txt");
        fs::write(&f, b"x").unwrap();
        hide_file(&f).unwrap();
    }
}
