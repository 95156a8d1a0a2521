//! Collision-free destination paths.
//!
//! `a.txt` is tried first, then `a(1).txt`, `a(2).txt`, ... until a name is
//! free. The lookup is read-only; the move itself must still refuse to
//! overwrite, because another process can claim the name between the lookup
//! and the move.

use std::path::{Path, PathBuf};

/// Returns `destination` if nothing exists there, otherwise the first free
/// `stem(n).ext` sibling.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use tidywatch::collision::resolve;
///
/// // With Data/doc.csv present this yields Data/doc(1).csv.
/// let free = resolve(Path::new("/watch/Data/doc.csv"));
/// ```
pub fn resolve(destination: &Path) -> PathBuf {
    if !occupied(destination) {
        return destination.to_path_buf();
    }

    (1u64..)
        .map(|n| candidate(destination, n))
        .find(|path| !occupied(path))
        .unwrap_or_else(|| destination.to_path_buf())
}

/// The `n`th suffixed alternative for `destination`.
pub fn candidate(destination: &Path, n: u64) -> PathBuf {
    let stem = destination
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let name = match destination.extension() {
        Some(ext) => format!("{}({}).{}", stem, n, ext.to_string_lossy()),
        None => format!("{}({})", stem, n),
    };
    destination.with_file_name(name)
}

/// Broken symlinks count as occupied.
fn occupied(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}
