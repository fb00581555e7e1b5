//! Read-only filesystem capability used by attach-from-file operations.
//!
//! Names are slash-separated and relative to the filesystem root, the same
//! way for every implementation.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};

/// Something attachments can be loaded from.
pub trait FileSystem {
    /// Opens `name` for reading.
    fn open(&self, name: &str) -> io::Result<Box<dyn Read + '_>>;
}

impl<F: FileSystem + ?Sized> FileSystem for &F {
    fn open(&self, name: &str) -> io::Result<Box<dyn Read + '_>> {
        (**self).open(name)
    }
}

/// Filesystem rooted at a directory on disk.
#[derive(Debug, Clone)]
pub struct DirFs {
    root: PathBuf,
}

impl DirFs {
    /// Creates a filesystem serving files below `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl FileSystem for DirFs {
    fn open(&self, name: &str) -> io::Result<Box<dyn Read + '_>> {
        if !is_valid_name(name) {
            return Err(invalid_name(name));
        }
        let mut path = self.root.clone();
        path.extend(name.split('/'));
        Ok(Box::new(File::open(path)?))
    }
}

/// In-memory filesystem, handy for tests and embedded assets.
#[derive(Debug, Clone, Default)]
pub struct MemoryFs {
    files: HashMap<String, Vec<u8>>,
}

impl MemoryFs {
    /// Creates an empty filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a file.
    pub fn insert(&mut self, name: impl Into<String>, contents: impl Into<Vec<u8>>) -> &mut Self {
        self.files.insert(name.into(), contents.into());
        self
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with_file(mut self, name: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        self.insert(name, contents);
        self
    }
}

impl FileSystem for MemoryFs {
    fn open(&self, name: &str) -> io::Result<Box<dyn Read + '_>> {
        if !is_valid_name(name) {
            return Err(invalid_name(name));
        }
        match self.files.get(name) {
            Some(contents) => Ok(Box::new(Cursor::new(contents.as_slice()))),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("open {}: file does not exist", name),
            )),
        }
    }
}

/// Final path element of a slash-separated name.
pub fn base_name(name: &str) -> &str {
    let trimmed = name.trim_end_matches('/');
    if trimmed.is_empty() {
        return if name.is_empty() { "." } else { "/" };
    }
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Unrooted, slash-separated, no `.`/`..`/empty elements; `"."` is the root.
fn is_valid_name(name: &str) -> bool {
    if name == "." {
        return true;
    }
    !name.is_empty()
        && name
            .split('/')
            .all(|elem| !elem.is_empty() && elem != "." && elem != ".." && !elem.contains('\\'))
}

fn invalid_name(name: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("open {}: invalid argument", name),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("report.pdf", "report.pdf")]
    #[case("docs/2024/report.pdf", "report.pdf")]
    #[case("images/", "images")]
    #[case("", ".")]
    #[case("/", "/")]
    fn test_base_name(#[case] name: &str, #[case] expected: &str) {
        assert_eq!(base_name(name), expected);
    }

    #[rstest]
    #[case("a.txt", true)]
    #[case("dir/a.txt", true)]
    #[case(".", true)]
    #[case("", false)]
    #[case("/etc/passwd", false)]
    #[case("../secret", false)]
    #[case("dir//a.txt", false)]
    #[case("dir/./a.txt", false)]
    #[case("dir/", false)]
    fn test_valid_names(#[case] name: &str, #[case] valid: bool) {
        assert_eq!(is_valid_name(name), valid);
    }

    #[test]
    fn test_dir_fs_open() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("img")).unwrap();
        std::fs::write(dir.path().join("img/logo.png"), b"\x89PNG").unwrap();

        let fs = DirFs::new(dir.path());
        let mut contents = Vec::new();
        fs.open("img/logo.png").unwrap().read_to_end(&mut contents).unwrap();
        assert_eq!(contents, b"\x89PNG");

        let err = fs.open("img/missing.png").err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);

        let err = fs.open("../escape.txt").err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_memory_fs_open() {
        let fs = MemoryFs::new().with_file("notes/todo.txt", "buy milk");

        let mut contents = String::new();
        fs.open("notes/todo.txt").unwrap().read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "buy milk");

        let err = fs.open("notes/other.txt").err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
