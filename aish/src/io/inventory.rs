//! Working-directory file listing sent to the model as context.

use std::path::Path;

use walkdir::{DirEntry, WalkDir};

/// List up to `max_files` files under `root`, as `/`-joined paths relative to it.
///
/// Hidden files are skipped and hidden directories are not descended into.
/// Entries that cannot be read are skipped silently. Order follows file names
/// within each directory so the listing is stable between runs.
pub fn list_files(root: &Path, max_files: usize) -> Vec<String> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry))
        .filter_map(Result::ok)
        .filter(|entry| !entry.file_type().is_dir())
        .filter_map(|entry| relative_path(root, &entry))
        .take(max_files)
        .collect()
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with('.'))
}

fn relative_path(root: &Path, entry: &DirEntry) -> Option<String> {
    let rel = entry.path().strip_prefix(root).ok()?;
    let parts: Vec<_> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}
