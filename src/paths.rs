//! Allowed-path rules (§6) consulted by [`crate::folder_task`]'s directory
//! listing and by the filesystem watcher adapter before a path ever reaches
//! [`crate::hint_builder`].

const RESERVED_BASENAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

const RESERVED_CHARACTERS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Whether `name` (a single path component, not a full path) may be synced.
///
/// Rejects Bajoo's own index files and the container encryption key
/// regardless of platform, then applies the Windows-class character and
/// reserved-basename rules unconditionally — the container is shared across
/// platforms, so a name one peer's OS would reject must never reach the
/// index on any peer (§6).
pub fn is_name_allowed(name: &str) -> bool {
    if name.starts_with(".bajoo") {
        return false;
    }
    if name == ".key" {
        return false;
    }
    if name.chars().any(|c| RESERVED_CHARACTERS.contains(&c) || (c as u32) < 0x20) {
        return false;
    }
    let base = name.split('.').next().unwrap_or(name);
    if RESERVED_BASENAMES.iter().any(|r| base.eq_ignore_ascii_case(r)) {
        return false;
    }
    true
}

/// Whether `name` looks like a hidden file by Unix convention (leading dot).
/// Windows hidden-attribute detection is a filesystem-metadata concern and is
/// handled by the caller via a stat, not by this name-only check.
pub fn is_hidden_name(name: &str) -> bool {
    name.starts_with('.') && name != "." && name != ".."
}

/// Full allowed-path check applied by [`crate::folder_task::FolderTask`] to
/// each entry it discovers: every component of a relative path must pass
/// [`is_name_allowed`], and (if `exclude_hidden_files` is set) must not be
/// hidden.
pub fn is_path_allowed(rel_path: &str, exclude_hidden_files: bool) -> bool {
    for component in rel_path.split('/').filter(|c| !c.is_empty()) {
        if !is_name_allowed(component) {
            return false;
        }
        if exclude_hidden_files && is_hidden_name(component) {
            return false;
        }
    }
    true
}
