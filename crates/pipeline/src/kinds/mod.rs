//! The resource kinds the engine ships with.

pub mod model;
pub mod shader;
pub mod texture;

use std::path::{Component, Path, PathBuf};

/// Cache key for a file-backed resource: the path with `.` and `..`
/// resolved lexically and forward slashes, so `a/./b.png` and
/// `a/c/../b.png` share one entry. The filesystem is not consulted.
pub(crate) fn path_key(path: &Path) -> Option<String> {
    let mut parts: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return None;
    }

    let normalized: PathBuf = parts.iter().collect();
    Some(normalized.to_string_lossy().replace('\\', "/"))
}
