//! Host services handed to the nodes
//!
//! The graph editor owns the file layout; nodes only see file references
//! and ask the host to turn them into absolute paths.

use std::path::{Path, PathBuf};
use tracing::debug;

/// Maps logical file references to paths on disk
pub trait FileResolver {
    /// Selectable files, sorted, relative to the input directory
    fn list_files(&self) -> Vec<String>;

    /// Absolute path for a file reference such as `shoot/IMG_0001.CR2`
    fn resolve(&self, name: &str) -> PathBuf;
}

/// Input/output directory pair, as laid out by the host
#[derive(Debug, Clone)]
pub struct InputDirectory {
    input: PathBuf,
    output: Option<PathBuf>,
}

impl InputDirectory {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: None,
        }
    }

    /// Directory used for references annotated with ` [output]`
    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn input_dir(&self) -> &Path {
        &self.input
    }
}

impl FileResolver for InputDirectory {
    fn list_files(&self) -> Vec<String> {
        let mut files = Vec::new();
        collect_files(&self.input, &self.input, &mut files);
        files.sort();
        files
    }

    fn resolve(&self, name: &str) -> PathBuf {
        let (name, base) = if let Some(stripped) = name.strip_suffix(" [output]") {
            (stripped, self.output.as_deref().unwrap_or(&self.input))
        } else if let Some(stripped) = name.strip_suffix(" [input]") {
            (stripped, self.input.as_path())
        } else {
            (name, self.input.as_path())
        };

        let path = Path::new(name);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base.join(path)
        }
    }
}

fn collect_files(root: &Path, dir: &Path, files: &mut Vec<String>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Cannot list {}: {}", dir.display(), e);
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        // Symlinks are not followed, so a link back to an ancestor cannot loop
        let file_type = match entry.file_type() {
            Ok(file_type) => file_type,
            Err(e) => {
                debug!("Cannot stat {}: {}", path.display(), e);
                continue;
            }
        };

        if file_type.is_dir() {
            collect_files(root, &path, files);
        } else if file_type.is_symlink() && path.is_dir() {
            debug!("Skipping directory link {}", path.display());
        } else if let Ok(relative) = path.strip_prefix(root) {
            let parts: Vec<_> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            files.push(parts.join("/"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_list_files_recursive_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("shoot/day2")).unwrap();
        fs::write(dir.path().join("b.arw"), b"").unwrap();
        fs::write(dir.path().join("a.nef"), b"").unwrap();
        fs::write(dir.path().join("shoot/day2/c.cr2"), b"").unwrap();

        let resolver = InputDirectory::new(dir.path());
        assert_eq!(resolver.list_files(), vec!["a.nef", "b.arw", "shoot/day2/c.cr2"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_list_does_not_follow_directory_links() {
        use std::os::unix::fs::symlink;

        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("shoot")).unwrap();
        fs::write(dir.path().join("a.arw"), b"").unwrap();
        symlink(dir.path(), dir.path().join("loop")).unwrap();
        symlink(dir.path(), dir.path().join("shoot/back")).unwrap();
        symlink(dir.path().join("a.arw"), dir.path().join("shoot/linked.arw")).unwrap();

        let resolver = InputDirectory::new(dir.path());
        assert_eq!(resolver.list_files(), vec!["a.arw", "shoot/linked.arw"]);
    }

    #[test]
    fn test_list_missing_directory_is_empty() {
        let resolver = InputDirectory::new("/nonexistent/input");
        assert!(resolver.list_files().is_empty());
    }

    #[test]
    fn test_resolve_annotations() {
        let resolver = InputDirectory::new("/data/input").with_output("/data/output");
        assert_eq!(resolver.resolve("x.arw"), PathBuf::from("/data/input/x.arw"));
        assert_eq!(resolver.resolve("x.arw [input]"), PathBuf::from("/data/input/x.arw"));
        assert_eq!(resolver.resolve("sub/x.arw [output]"), PathBuf::from("/data/output/sub/x.arw"));
        assert_eq!(resolver.resolve("/abs/x.arw"), PathBuf::from("/abs/x.arw"));

        let no_output = InputDirectory::new("/data/input");
        assert_eq!(no_output.resolve("x.arw [output]"), PathBuf::from("/data/input/x.arw"));
    }
}
