
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use dualstate_apply::{CommitError, FsWriter, SourceWriter, VersionControl};
use dualstate_core::error::IngestionError;
use dualstate_core::graph::InterfaceGraph;
use dualstate_core::ingest::{EdgeRecord, IngestionBatch, InterfaceRecord, InterfaceSource};
use dualstate_core::ledger::ChangeLedger;
use dualstate_core::sqlite::SqliteGraphStore;
use dualstate_core::types::{EdgeType, InterfaceKey, InterfaceKind, Span};
use dualstate_enforce::{Diagnostic, Overlay, StaticChecker};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Toy interface source for `.rs` files under `src/`: every line starting
/// with `fn` or `pub fn` is one function, and `name(` inside its body is a
/// call to the function of that name.
#[allow(dead_code)]
pub struct FnLineSource;

impl InterfaceSource for FnLineSource {
    fn scan(&self, root: &Path) -> Result<IngestionBatch, IngestionError> {
        let mut files = Vec::new();
        collect_rs_files(&root.join("src"), &mut files);
        files.sort();

        let mut interfaces = Vec::new();
        let mut bodies = Vec::new();
        for path in files {
            let Ok(text) = fs::read_to_string(&path) else {
                continue;
            };
            let rel = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            for (i, line) in text.lines().enumerate() {
                let Some(rest) = line.strip_prefix("pub fn ").or_else(|| line.strip_prefix("fn ")) else {
                    continue;
                };
                let name = rest.split(['(', '<']).next().unwrap_or_default();
                let (signature, body) = line.split_once('{').unwrap_or((line, ""));
                let key = InterfaceKey::new(rel.clone(), "", name);
                let mut record = InterfaceRecord::new(key.clone(), InterfaceKind::Function, signature.trim());
                let at = i as u32 + 1;
                record.span = Span::new(at, at);
                record.code = Some(line.to_string());
                interfaces.push(record);
                bodies.push((key, body.to_string()));
            }
        }

        let by_name: HashMap<&str, &InterfaceKey> =
            bodies.iter().map(|(k, _)| (k.name.as_str(), k)).collect();
        let mut edges = Vec::new();
        for (from, body) in &bodies {
            for callee in called_names(body) {
                if let Some(to) = by_name.get(callee).filter(|to| **to != from) {
                    let edge = EdgeRecord::new(from.clone(), (*to).clone(), EdgeType::Calls);
                    if !edges.contains(&edge) {
                        edges.push(edge);
                    }
                }
            }
        }

        Ok(IngestionBatch {
            interfaces,
            edges,
            ..Default::default()
        })
    }
}

fn collect_rs_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_rs_files(&path, out);
        } else if path.extension().is_some_and(|e| e == "rs") {
            out.push(path);
        }
    }
}

fn called_names(body: &str) -> Vec<&str> {
    body.match_indices('(')
        .filter_map(|(at, _)| {
            let head = &body[..at];
            let start = head
                .rfind(|c: char| !(c.is_alphanumeric() || c == '_'))
                .map_or(0, |i| i + 1);
            let name = &head[start..];
            (!name.is_empty()).then_some(name)
        })
        .collect()
}

/// Create a project directory from `(relative_path, content)` pairs.
///
/// Returns (TempDir, project_root). Hold the TempDir to keep the directory alive.
#[allow(dead_code)]
pub fn create_project(files: &[(&str, &str)]) -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let root = dir.path();

    for (path, content) in files {
        let full_path = root.join(path);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&full_path, content).unwrap();
    }

    let project_root = root.to_path_buf();
    (dir, project_root)
}

/// Create an in-memory SqliteGraphStore for testing.
#[allow(dead_code)]
pub fn in_memory_store() -> SqliteGraphStore {
    SqliteGraphStore::in_memory().expect("Failed to create in-memory SqliteGraphStore")
}

#[allow(dead_code)]
pub fn new_ledger() -> ChangeLedger {
    ChangeLedger::new(Box::new(in_memory_store()))
}

/// Graph service over `root`, ingested once with [`FnLineSource`].
#[allow(dead_code)]
pub fn ingest_project(root: &Path) -> InterfaceGraph {
    let graph = InterfaceGraph::new(Box::new(in_memory_store()));
    graph
        .ingest_from(&FnLineSource, root)
        .expect("project should ingest");
    graph
}

/// Route `tracing` output through the test harness. Filter with `RUST_LOG`.
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[allow(dead_code)]
pub fn key(file: &str, name: &str) -> InterfaceKey {
    InterfaceKey::new(file, "", name)
}

/// Reports an error on line 1 of every checked file containing `marker`.
#[allow(dead_code)]
pub struct MarkerChecker {
    pub marker: &'static str,
}

impl StaticChecker for MarkerChecker {
    fn check(&self, overlay: &Overlay, files: &[String]) -> Vec<Diagnostic> {
        files
            .iter()
            .filter(|f| {
                overlay
                    .read(f)
                    .ok()
                    .flatten()
                    .is_some_and(|text| text.contains(self.marker))
            })
            .map(|f| {
                Diagnostic::error("E0425", format!("cannot find value `{}`", self.marker)).at(f.clone(), 1)
            })
            .collect()
    }
}

/// Remembers commits instead of running git.
#[allow(dead_code)]
#[derive(Clone, Default)]
pub struct RecordingVcs {
    pub commits: Arc<Mutex<Vec<(Vec<String>, String)>>>,
}

impl VersionControl for RecordingVcs {
    fn commit(&self, files: &[String], message: &str) -> Result<String, CommitError> {
        let mut commits = self.commits.lock().unwrap();
        commits.push((files.to_vec(), message.to_string()));
        Ok(format!("{:040x}", commits.len()))
    }
}

/// Filesystem writer that refuses to write one path.
#[allow(dead_code)]
pub struct FailingWriter {
    pub inner: FsWriter,
    pub fail_on: String,
}

impl SourceWriter for FailingWriter {
    fn read(&self, path: &str) -> io::Result<Option<String>> {
        self.inner.read(path)
    }

    fn write(&self, path: &str, contents: &str) -> io::Result<()> {
        if path == self.fail_on {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        self.inner.write(path, contents)
    }

    fn remove(&self, path: &str) -> io::Result<()> {
        self.inner.remove(path)
    }
}
