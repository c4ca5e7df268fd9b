// Oasis Gate - Path Helpers
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Home-directory expansion, lexical normalization and the allowed-roots
// environment variable. No containment decisions are made here; those
// live in fs.rs against the realized filesystem.

use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

/// Platform path-list of allowed sandbox roots (':' on unix, ';' on windows)
pub const ROOTS_ENV: &str = "OASIS_ALLOWED_ROOTS";

static HOME_CACHE: OnceLock<Option<PathBuf>> = OnceLock::new();

/// User home directory, resolved once.
pub fn home_dir() -> Option<&'static Path> {
    HOME_CACHE.get_or_init(dirs::home_dir).as_deref()
}

/// Expand a leading `~` or `~/` into the home directory.
/// `~user` forms are left untouched.
pub fn expand_home(input: &str) -> PathBuf {
    let rest = if input == "~" {
        Some("")
    } else if let Some(rest) = input.strip_prefix("~/") {
        Some(rest)
    } else if cfg!(windows) {
        input.strip_prefix("~\\")
    } else {
        None
    };

    match (rest, home_dir()) {
        (Some(rest), Some(home)) if rest.is_empty() => home.to_path_buf(),
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(input),
    }
}

/// Resolve `.` and `..` without touching the filesystem.
/// `..` never climbs above the root or prefix.
pub fn normalize_lexical(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::ParentDir => {
                let at_root = matches!(
                    out.components().next_back(),
                    None | Some(Component::RootDir) | Some(Component::Prefix(_))
                );
                if !at_root {
                    out.pop();
                }
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}

/// Allowed roots from the environment, `None` when unset or empty.
pub fn roots_from_env() -> Option<Vec<String>> {
    let raw = std::env::var_os(ROOTS_ENV)?;
    let roots: Vec<String> = std::env::split_paths(&raw)
        .map(|p| p.to_string_lossy().to_string())
        .filter(|s| !s.trim().is_empty())
        .collect();
    if roots.is_empty() {
        None
    } else {
        Some(roots)
    }
}

/// The single implicit root used when nothing is configured:
/// home directory, falling back to the process working directory.
pub fn default_root() -> PathBuf {
    if let Some(home) = home_dir() {
        return home.to_path_buf();
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_dot_segments() {
        assert_eq!(normalize_lexical(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(normalize_lexical(Path::new("/../../etc")), PathBuf::from("/etc"));
        assert_eq!(normalize_lexical(Path::new("/a/b/")), PathBuf::from("/a/b"));
    }

    #[test]
    fn expands_home_prefix_only() {
        if let Some(home) = home_dir() {
            assert_eq!(expand_home("~"), home.to_path_buf());
            assert_eq!(expand_home("~/notes"), home.join("notes"));
        }
        assert_eq!(expand_home("~other/notes"), PathBuf::from("~other/notes"));
        assert_eq!(expand_home("/abs/~/x"), PathBuf::from("/abs/~/x"));
    }
}
