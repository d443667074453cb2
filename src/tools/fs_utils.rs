use std::path::{Component, Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

/// Absolute path tokens inside a command string (unix and drive-letter
/// forms), excluding quoted remainders.
static ABS_PATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[A-Za-z]:\\[^\\\s"']+|/[^\s"']+"#).expect("abs path regex"));

/// Lexically normalize a path: resolve `.` and `..` components without
/// touching the filesystem, so guards work on paths that may not exist.
pub fn lexical_clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // Only pop real segments; a leading ".." on a relative
                // path is preserved.
                let popped = matches!(
                    out.components().next_back(),
                    Some(Component::Normal(_))
                );
                if popped {
                    out.pop();
                } else if !matches!(out.components().next_back(), Some(Component::RootDir)) {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Lexically absolutize against `base` (itself assumed absolute).
pub fn lexical_absolute(path: &str, base: &Path) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        lexical_clean(p)
    } else {
        lexical_clean(&base.join(p))
    }
}

/// True if `path` is a filesystem root (`/`, `C:\`, ...). A workspace
/// rooted there would grant access to the whole drive.
pub fn is_path_root(path: &Path) -> bool {
    let cleaned = lexical_clean(path);
    let mut components = cleaned.components();
    match components.next() {
        Some(Component::RootDir) => components.next().is_none(),
        Some(Component::Prefix(_)) => matches!(
            (components.next(), components.next()),
            (Some(Component::RootDir), None) | (None, None)
        ),
        _ => false,
    }
}

/// True if `path` does NOT resolve under `root`, computed via the
/// lexical relative path rather than a string prefix, so `/ws/../etc`
/// escapes and `/workspace2` does not match root `/workspace`.
pub fn escapes_root(root: &Path, path: &Path) -> bool {
    let root = lexical_clean(root);
    let path = lexical_clean(path);
    match path.strip_prefix(&root) {
        Ok(_) => false,
        Err(_) => true,
    }
}

/// Absolute path tokens appearing in a command string.
pub fn absolute_path_tokens(command: &str) -> Vec<&str> {
    ABS_PATH_RE.find_iter(command).map(|m| m.as_str()).collect()
}
