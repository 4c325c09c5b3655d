//! Finding result files under the search roots.
//!
//! Every regular file below each root is classified by
//! [`Format::detect_path`]; files no format claims are ignored. A file
//! reached through more than one root (or more than one spelling of a root)
//! is kept once, so overlapping roots are harmless. Results are sorted by
//! path.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::format::Format;

/// A discovered result file and the format that will read it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultFile {
    pub path: PathBuf,
    pub format: Format,
}

/// Walks `roots` and returns every file with a recognized result suffix.
///
/// Missing roots and unreadable directory entries are logged and skipped.
pub fn discover(roots: &[PathBuf]) -> Vec<ResultFile> {
    let mut files = Vec::new();
    let mut seen = HashSet::new();

    for root in roots {
        info!("Searching for result files under {}", root.display());
        if !root.exists() {
            warn!("Search root {} does not exist", root.display());
            continue;
        }

        for entry in WalkDir::new(root).follow_links(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(format) = Format::detect_path(entry.path()) {
                if !seen.insert(identity(entry.path())) {
                    debug!("Already found {}", entry.path().display());
                    continue;
                }
                files.push(ResultFile {
                    path: entry.into_path(),
                    format,
                });
            }
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));

    for file in &files {
        info!("Found {} results: {}", file.format, file.path.display());
    }
    files
}

/// Canonical form of `path`, or the path itself if it cannot be resolved.
fn identity(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Paths of the xUnit files among `files`.
pub fn xunit_paths(files: &[ResultFile]) -> Vec<PathBuf> {
    files
        .iter()
        .filter(|f| f.format == Format::XUnit)
        .map(|f| f.path.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(dir: &Path, rel: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }

    #[test]
    fn test_discovers_and_classifies() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a/testResults.xml");
        touch(dir.path(), "b/c/junit-results.xml");
        touch(dir.path(), "run.trx");
        touch(dir.path(), "d/test_results.yml");
        touch(dir.path(), "notes.xml");
        touch(dir.path(), "README.md");

        let files = discover(&[dir.path().to_path_buf()]);
        let found: Vec<_> = files
            .iter()
            .map(|f| {
                (
                    f.path.strip_prefix(dir.path()).unwrap().to_path_buf(),
                    f.format,
                )
            })
            .collect();

        assert_eq!(
            found,
            vec![
                (PathBuf::from("a/testResults.xml"), Format::XUnit),
                (PathBuf::from("b/c/junit-results.xml"), Format::JUnit),
                (PathBuf::from("d/test_results.yml"), Format::Yaml),
                (PathBuf::from("run.trx"), Format::Trx),
            ]
        );
        assert_eq!(xunit_paths(&files).len(), 1);
    }

    #[test]
    fn test_overlapping_roots_are_deduplicated() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "sub/testResults.xml");

        let files = discover(&[dir.path().to_path_buf(), dir.path().join("sub")]);
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_differently_spelled_roots_are_deduplicated() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "sub/a.trx");
        touch(dir.path(), "sub/testResults.xml");

        let files = discover(&[dir.path().join("sub"), dir.path().join("sub/../sub")]);
        assert_eq!(files.len(), 2);
        let names: Vec<_> = files
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.trx", "testResults.xml"]);
    }

    #[test]
    fn test_missing_root_is_skipped() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "x.trx");

        let files = discover(&[dir.path().join("missing"), dir.path().to_path_buf()]);
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_directory_with_result_suffix_is_ignored() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("weird.trx")).unwrap();
        assert!(discover(&[dir.path().to_path_buf()]).is_empty());
    }
}
