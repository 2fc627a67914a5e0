//! Shared path manipulation utilities.

use std::env;
use std::path::{Component, Path, PathBuf};

/// Resolve a path to an absolute, normalized path.
///
/// If `fs::canonicalize` succeeds (path exists), it is used to resolve symlinks
/// and normalize components. If it fails (e.g. the watched directory has not
/// been created yet), the path is made absolute relative to CWD and `..`/`.`
/// components are resolved syntactically.
pub fn resolve_absolute_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
    };

    if let Ok(canonical) = std::fs::canonicalize(&absolute) {
        return canonical;
    }

    normalize_syntactic(&absolute)
}

fn normalize_syntactic(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                components.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
            }
        }
    }
    components.into_iter().collect()
}

/// Split a file name into (stem-insensitive) name and lowercase extension.
///
/// Dotfiles like `.bashrc` have no extension; `archive.tar.gz` reports `gz`.
#[must_use]
pub fn split_extension(file_name: &str) -> (String, String) {
    let path = Path::new(file_name);
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    (file_name.to_string(), ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_existing_path_canonically() {
        let cwd = env::current_dir().unwrap();
        let resolved = resolve_absolute_path(Path::new("."));
        assert_eq!(resolved, std::fs::canonicalize(&cwd).unwrap());
    }

    #[test]
    fn normalizes_nonexistent_path_syntactically() {
        let input = Path::new("/nonexistent/foo/../bar");
        assert!(std::fs::canonicalize(input).is_err());
        assert_eq!(resolve_absolute_path(input), Path::new("/nonexistent/bar"));
    }

    #[test]
    fn extension_is_lowercased() {
        let (name, ext) = split_extension("Report.PDF");
        assert_eq!(name, "Report.PDF");
        assert_eq!(ext, "pdf");
    }

    #[test]
    fn dotfile_has_no_extension() {
        let (_, ext) = split_extension(".bashrc");
        assert_eq!(ext, "");
    }

    #[test]
    fn multi_dot_name_reports_last_extension() {
        let (_, ext) = split_extension("archive.tar.gz");
        assert_eq!(ext, "gz");
    }
}
