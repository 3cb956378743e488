//! Path resolution and containment checks

use std::env;
use std::path::{Component, Path, PathBuf};

/// Resolve `candidate` and return it only if it lies strictly below `root`.
///
/// Both paths are made absolute and resolved (symlinks followed when the path
/// exists, `.`/`..` folded lexically otherwise) before being compared
/// component by component. A sibling such as `saved_qrcodes_evil` therefore
/// does not match a root of `saved_qrcodes`, and the root itself is rejected.
pub fn contained_file(root: &Path, candidate: &Path) -> Option<PathBuf> {
    let root = resolve(root)?;
    let candidate = resolve(candidate)?;

    if candidate != root && candidate.starts_with(&root) {
        Some(candidate)
    } else {
        None
    }
}

/// Make `path` absolute and resolve it as far as the filesystem allows.
pub fn resolve(path: &Path) -> Option<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().ok()?.join(path)
    };

    if let Ok(canonical) = absolute.canonicalize() {
        return Some(canonical);
    }

    // Canonicalize the deepest ancestor that exists and re-append the rest,
    // so symlinks anywhere along the existing prefix are followed.
    let normalized = normalize(&absolute)?;
    for ancestor in normalized.ancestors() {
        let Ok(canonical) = ancestor.canonicalize() else {
            continue;
        };
        let rest = normalized.strip_prefix(ancestor).ok()?;
        if rest.as_os_str().is_empty() {
            return Some(canonical);
        }
        return Some(canonical.join(rest));
    }
    Some(normalized)
}

// Fold `.` and `..` without touching the filesystem. Returns `None` when `..`
// would climb above the root.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::Normal(_) => {
                out.push(component.as_os_str())
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
        }
    }
    Some(out)
}
