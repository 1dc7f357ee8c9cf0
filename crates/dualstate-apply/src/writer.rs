//! Working-tree writes with rollback.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Writable view of the working tree. Paths are relative to its root.
pub trait SourceWriter: Send + Sync {
    /// `None` when the file does not exist.
    fn read(&self, path: &str) -> io::Result<Option<String>>;
    fn write(&self, path: &str, contents: &str) -> io::Result<()>;
    fn remove(&self, path: &str) -> io::Result<()>;
}

#[derive(Debug, Clone)]
pub struct FsWriter {
    root: PathBuf,
}

impl FsWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl SourceWriter for FsWriter {
    fn read(&self, path: &str) -> io::Result<Option<String>> {
        match fs::read_to_string(self.root.join(path)) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write(&self, path: &str, contents: &str) -> io::Result<()> {
        let full = self.root.join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(full, contents)
    }

    fn remove(&self, path: &str) -> io::Result<()> {
        match fs::remove_file(self.root.join(path)) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

/// Files written so far in one apply, with what they held before.
pub(crate) struct WriteTransaction<'a> {
    writer: &'a dyn SourceWriter,
    written: Vec<(String, Option<String>)>,
}

impl<'a> WriteTransaction<'a> {
    pub(crate) fn new(writer: &'a dyn SourceWriter) -> Self {
        Self {
            writer,
            written: Vec::new(),
        }
    }

    pub(crate) fn write(&mut self, path: &str, original: Option<String>, contents: &str) -> io::Result<()> {
        self.writer.write(path, contents)?;
        self.written.push((path.to_string(), original));
        Ok(())
    }

    pub(crate) fn files(&self) -> Vec<String> {
        self.written.iter().map(|(p, _)| p.clone()).collect()
    }

    /// Restore every written file, newest first. Files that did not exist
    /// before are removed. Returns the paths that could not be restored.
    pub(crate) fn rollback(self) -> Vec<String> {
        let mut unrestored = Vec::new();
        for (path, original) in self.written.into_iter().rev() {
            let result = match &original {
                Some(text) => self.writer.write(&path, text),
                None => self.writer.remove(&path),
            };
            match result {
                Ok(()) => tracing::debug!(path = %path, "rolled back"),
                Err(e) => {
                    tracing::error!(path = %path, error = %e, "rollback failed");
                    unrestored.push(path);
                }
            }
        }
        unrestored
    }
}
