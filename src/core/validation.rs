//! Normalization for member names and filesystem paths
//!
//! Member names are store keys, so two spellings of the same file must map to
//! one key: separators become `/`, `.` and empty components are dropped.
//! Paths are resolved lexically because in-memory targets have nothing on
//! disk to canonicalize against.

use crate::error::{Result, TmcoError};
use std::path::{Component, Path, PathBuf};

/// Normalize a member filename into its store key
///
/// # Examples
///
/// ```
/// use tmco_rs::core::validation::normalize_member_name;
///
/// assert_eq!(normalize_member_name("./lib//a.js").unwrap(), "lib/a.js");
/// assert_eq!(normalize_member_name("lib\\b.js").unwrap(), "lib/b.js");
/// assert!(normalize_member_name("./").is_err());
/// ```
pub fn normalize_member_name(name: &str) -> Result<String> {
    let unified = name.replace('\\', "/");
    let absolute = unified.starts_with('/');

    let parts: Vec<&str> = unified
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect();

    if parts.is_empty() {
        return Err(TmcoError::InvalidPath(format!(
            "member name '{}' has no file component",
            name
        )));
    }

    let joined = parts.join("/");
    Ok(if absolute { format!("/{}", joined) } else { joined })
}

/// Resolve `path` against `cwd` and fold `.`/`..` components
pub fn resolve_path(cwd: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    };

    let mut resolved = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            other => resolved.push(other.as_os_str()),
        }
    }
    resolved
}

/// Name of `path` relative to `cwd`, or the resolved path if it lies outside
pub fn relative_name(cwd: &Path, path: &Path) -> String {
    let resolved = resolve_path(cwd, path);
    let base = resolve_path(cwd, Path::new(""));
    let name = resolved.strip_prefix(&base).unwrap_or(&resolved);
    name.to_string_lossy().replace('\\', "/")
}

/// Join a member name under `root`, refusing names that escape it
pub fn safe_join(root: &Path, member: &str) -> Result<PathBuf> {
    let relative = Path::new(member);
    let escapes = relative.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });

    if escapes || member.starts_with('/') {
        return Err(TmcoError::InvalidPath(format!(
            "member '{}' would be written outside {}",
            member,
            root.display()
        )));
    }

    Ok(root.join(relative))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_member_names() {
        assert_eq!(normalize_member_name("a.js").unwrap(), "a.js");
        assert_eq!(normalize_member_name("./a.js").unwrap(), "a.js");
        assert_eq!(normalize_member_name("dir/./sub//a.js").unwrap(), "dir/sub/a.js");
        assert_eq!(normalize_member_name("dir\\a.js").unwrap(), "dir/a.js");
        assert_eq!(normalize_member_name("/abs/a.js").unwrap(), "/abs/a.js");
        assert_eq!(normalize_member_name("../up.js").unwrap(), "../up.js");
    }

    #[test]
    fn test_normalize_rejects_empty() {
        assert!(normalize_member_name("").is_err());
        assert!(normalize_member_name("./.").is_err());
        assert!(normalize_member_name("//").is_err());
    }

    #[test]
    fn test_resolve_path() {
        let cwd = Path::new("/work/project");
        assert_eq!(
            resolve_path(cwd, Path::new("lib/../a.js")),
            PathBuf::from("/work/project/a.js")
        );
        assert_eq!(
            resolve_path(cwd, Path::new("/other/./b.js")),
            PathBuf::from("/other/b.js")
        );
    }

    #[test]
    fn test_relative_name() {
        let cwd = Path::new("/work/project");
        assert_eq!(relative_name(cwd, Path::new("lib/a.js.out")), "lib/a.js.out");
        assert_eq!(
            relative_name(cwd, Path::new("/work/project/b.js.out")),
            "b.js.out"
        );
        assert_eq!(relative_name(cwd, Path::new("/elsewhere/c.out")), "/elsewhere/c.out");
    }

    #[test]
    fn test_safe_join() {
        let root = Path::new("/out");
        assert_eq!(
            safe_join(root, "lib/a.js").unwrap(),
            PathBuf::from("/out/lib/a.js")
        );
        assert!(safe_join(root, "../escape.js").is_err());
        assert!(safe_join(root, "lib/../../escape.js").is_err());
        assert!(safe_join(root, "/etc/passwd").is_err());
    }
}
