//! Markdown notes in a vault directory
//!
//! Notes are `*.md` files below the vault root, addressed by their
//! vault-relative, `/`-separated path. Dot-directories (`.obsidian`, `.git`,
//! `.trash`) are never listed.

use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::error::VaultError;

/// Basic facts about a note
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NoteMetadata {
    pub path: String,
    pub basename: String,
    pub size: u64,
}

/// A vault rooted at a directory
#[derive(Debug, Clone)]
pub struct Vault {
    root: PathBuf,
}

impl Vault {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Every note path, sorted
    pub fn list_notes(&self) -> Result<Vec<String>, VaultError> {
        let mut notes = Vec::new();
        self.collect_notes(&self.root, &mut notes)?;
        notes.sort();
        Ok(notes)
    }

    fn collect_notes(&self, dir: &Path, notes: &mut Vec<String>) -> Result<(), VaultError> {
        let entries = fs::read_dir(dir).map_err(|source| self.io_error(dir, source))?;
        for entry in entries {
            let entry = entry.map_err(|source| self.io_error(dir, source))?;
            let name = entry.file_name();
            if name.to_string_lossy().starts_with('.') {
                continue;
            }

            let path = entry.path();
            let file_type = entry
                .file_type()
                .map_err(|source| self.io_error(&path, source))?;
            if file_type.is_dir() {
                self.collect_notes(&path, notes)?;
            } else if file_type.is_file() && path.extension().is_some_and(|ext| ext == "md") {
                if let Some(relative) = self.relative(&path) {
                    notes.push(relative);
                }
            }
        }
        Ok(())
    }

    /// Notes whose path or basename contains `query` (case-sensitive)
    pub fn search(&self, query: &str) -> Result<Vec<String>, VaultError> {
        let notes = self.list_notes()?;
        Ok(notes
            .into_iter()
            .filter(|path| path.contains(query) || basename(path).contains(query))
            .collect())
    }

    /// Full contents of a note
    pub fn read_note(&self, path: &str) -> Result<String, VaultError> {
        let full = self.existing_file(path)?;
        fs::read_to_string(&full).map_err(|source| self.io_error(&full, source))
    }

    /// Replace the contents of an existing note
    pub fn write_note(&self, path: &str, contents: &str) -> Result<(), VaultError> {
        let full = self.existing_file(path)?;
        debug!(path, "Writing note");
        fs::write(&full, contents).map_err(|source| self.io_error(&full, source))
    }

    pub fn metadata(&self, path: &str) -> Result<NoteMetadata, VaultError> {
        let full = self.existing_file(path)?;
        let meta = fs::metadata(&full).map_err(|source| self.io_error(&full, source))?;
        let path = self.relative(&full).unwrap_or_else(|| path.to_string());
        Ok(NoteMetadata {
            basename: basename(&path).to_string(),
            path,
            size: meta.len(),
        })
    }

    /// Map a vault-relative path onto the filesystem
    ///
    /// Absolute paths and `..` components are rejected.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, VaultError> {
        let relative = Path::new(path);
        let mut resolved = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(VaultError::OutsideVault {
                        path: path.to_string(),
                    })
                }
            }
        }
        Ok(resolved)
    }

    fn existing_file(&self, path: &str) -> Result<PathBuf, VaultError> {
        let full = self.resolve(path)?;
        if !full.exists() {
            return Err(VaultError::NotFound {
                path: path.to_string(),
            });
        }
        if !full.is_file() {
            return Err(VaultError::NotAFile {
                path: path.to_string(),
            });
        }
        Ok(full)
    }

    fn relative(&self, full: &Path) -> Option<String> {
        let relative = full.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }

    fn io_error(&self, path: &Path, source: std::io::Error) -> VaultError {
        VaultError::Io {
            path: self
                .relative(path)
                .unwrap_or_else(|| path.display().to_string()),
            source,
        }
    }
}

/// File name without directory and without the `.md` extension
pub fn basename(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.strip_suffix(".md").unwrap_or(name)
}
