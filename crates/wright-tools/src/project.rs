use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use wright_core::{Result, WrightError};

/// Directories never descended into when listing.
const SKIPPED_DIRS: &[&str] = &[".git", "target", "node_modules", ".venv", "__pycache__", "dist"];

/// Files that identify the kind of project.
const MANIFESTS: &[&str] = &[
    "Cargo.toml",
    "package.json",
    "pyproject.toml",
    "requirements.txt",
    "go.mod",
    "pom.xml",
    "build.gradle",
    "Gemfile",
    "composer.json",
    "docker-compose.yml",
    "Makefile",
];

/// One entry of a project listing.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FileEntry {
    /// Path relative to the project root, `/`-separated.
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
}

/// Content of a capped read.
#[derive(Debug, Clone, Serialize)]
pub struct FileContent {
    pub path: String,
    pub content: String,
    /// Whether the file was longer than the cap.
    pub truncated: bool,
    pub size: u64,
}

/// A view of one project directory. Every path is resolved inside the root;
/// absolute paths and `..` escapes are rejected.
#[derive(Debug, Clone)]
pub struct ProjectFs {
    root: PathBuf,
}

impl ProjectFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a project-relative path without touching the filesystem.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let mut resolved = PathBuf::new();
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !resolved.pop() {
                        return Err(escape_error(relative));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(WrightError::ToolExecution {
                        tool: "project".into(),
                        reason: format!("absolute paths are not allowed: {relative}"),
                    });
                }
            }
        }
        Ok(self.root.join(resolved))
    }

    /// Read at most `max_bytes` of a text file.
    pub async fn read_capped(&self, relative: &str, max_bytes: usize) -> Result<FileContent> {
        let path = self.resolve(relative)?;
        let bytes = tokio::fs::read(&path).await.map_err(|e| io_error(relative, e))?;
        let size = bytes.len() as u64;
        let truncated = bytes.len() > max_bytes;
        let slice = if truncated { &bytes[..max_bytes] } else { &bytes[..] };
        Ok(FileContent {
            path: relative.to_string(),
            content: String::from_utf8_lossy(slice).into_owned(),
            truncated,
            size,
        })
    }

    pub async fn write(&self, relative: &str, content: &str) -> Result<u64> {
        let path = self.resolve(relative)?;
        if path == self.root {
            return Err(escape_error(relative));
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(relative, e))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| io_error(relative, e))?;
        Ok(content.len() as u64)
    }

    pub async fn delete(&self, relative: &str) -> Result<()> {
        let path = self.resolve(relative)?;
        if path == self.root {
            return Err(WrightError::ToolExecution {
                tool: "project".into(),
                reason: "refusing to delete the project root".into(),
            });
        }
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| io_error(relative, e))?;
        if meta.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        }
        .map_err(|e| io_error(relative, e))
    }

    /// Walk `relative` breadth-first, returning at most `max_entries` entries
    /// sorted by path. Build and VCS directories are skipped.
    pub async fn list(&self, relative: &str, max_entries: usize, recursive: bool) -> Result<Vec<FileEntry>> {
        let start = self.resolve(relative)?;
        let mut entries = Vec::new();
        let mut queue = std::collections::VecDeque::from([start]);

        'walk: while let Some(dir) = queue.pop_front() {
            let mut reader = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| io_error(relative, e))?;
            while let Some(entry) = reader.next_entry().await.map_err(|e| io_error(relative, e))? {
                if entries.len() >= max_entries {
                    break 'walk;
                }
                let name = entry.file_name().to_string_lossy().to_string();
                let meta = match entry.metadata().await {
                    Ok(m) => m,
                    Err(_) => continue,
                };
                let full = entry.path();
                let rel = full
                    .strip_prefix(&self.root)
                    .unwrap_or(&full)
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if meta.is_dir() {
                    if SKIPPED_DIRS.contains(&name.as_str()) {
                        continue;
                    }
                    if recursive {
                        queue.push_back(full);
                    }
                }
                entries.push(FileEntry {
                    path: rel,
                    is_dir: meta.is_dir(),
                    size: if meta.is_dir() { 0 } else { meta.len() },
                });
            }
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    /// Manifest files present at the project root.
    pub async fn manifests(&self) -> Vec<String> {
        let mut found = Vec::new();
        for name in MANIFESTS {
            if tokio::fs::try_exists(self.root.join(name)).await.unwrap_or(false) {
                found.push(name.to_string());
            }
        }
        found
    }
}

fn escape_error(relative: &str) -> WrightError {
    WrightError::ToolExecution {
        tool: "project".into(),
        reason: format!("path escapes the project root: {relative}"),
    }
}

fn io_error(relative: &str, e: std::io::Error) -> WrightError {
    WrightError::ToolExecution {
        tool: "project".into(),
        reason: format!("{relative}: {e}"),
    }
}
