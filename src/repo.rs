//! On-disk cache of cloned repositories.
//!
//! One subdirectory per repository under a fixed root, named after the
//! final path segment of the remote URL. Mutating operations (clone,
//! delete) take the write lock; status and list take the read lock, so
//! reads never observe a half-written clone.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use git2::Repository;

use crate::errors::RepoError;

/// Status of one repository in the cache. Absence is a normal result, not
/// an error.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RepoStatus {
    pub is_cloned: bool,
    pub path: PathBuf,
}

pub struct RepoManager {
    root: PathBuf,
    lock: RwLock<()>,
}

/// Directory name for a remote URL: the final non-empty path segment with
/// any `.git` suffix stripped.
fn derive_repo_name(url: &str) -> Result<String, RepoError> {
    let name = url
        .trim_end_matches('/')
        .rsplit(['/', ':'])
        .next()
        .unwrap_or_default();
    let name = name.strip_suffix(".git").unwrap_or(name);
    if name.is_empty() || name == "." || name == ".." {
        return Err(RepoError::InvalidUrl {
            url: url.to_string(),
        });
    }
    Ok(name.to_string())
}

impl RepoManager {
    /// Open the cache at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, RepoError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|source| RepoError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self {
            root,
            lock: RwLock::new(()),
        })
    }

    /// Default cache root: `repos/` beside the running executable.
    pub fn default_root() -> Result<PathBuf, RepoError> {
        let exe = std::env::current_exe().map_err(|source| RepoError::Io {
            path: PathBuf::from("."),
            source,
        })?;
        let base = exe.parent().unwrap_or_else(|| Path::new("."));
        Ok(base.join("repos"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Clone `url` into the cache and return the local path. A failed
    /// clone removes the directory it created; a pre-existing directory is
    /// rejected up front so prior state is never deleted.
    pub fn clone_repo(&self, url: &str) -> Result<PathBuf, RepoError> {
        let name = derive_repo_name(url)?;
        let _guard = self.lock.write().expect("repo lock");

        let path = self.root.join(&name);
        if path.exists() {
            return Err(RepoError::AlreadyCloned { path });
        }

        tracing::info!(url, path = %path.display(), "cloning repository");
        match Repository::clone(url, &path) {
            Ok(_) => Ok(path),
            Err(source) => {
                if let Err(cleanup) = std::fs::remove_dir_all(&path) {
                    // Only worth noting if the clone got far enough to
                    // create the directory.
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(
                            path = %path.display(),
                            error = %cleanup,
                            "failed to clean up after failed clone"
                        );
                    }
                }
                Err(RepoError::Clone {
                    url: url.to_string(),
                    source,
                })
            }
        }
    }

    /// Whether `url` is already cloned, and where it would live either way.
    pub fn status(&self, url: &str) -> Result<RepoStatus, RepoError> {
        let name = derive_repo_name(url)?;
        let _guard = self.lock.read().expect("repo lock");

        let path = self.root.join(&name);
        match Repository::open(&path) {
            Ok(_) => Ok(RepoStatus {
                is_cloned: true,
                path,
            }),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(RepoStatus {
                is_cloned: false,
                path,
            }),
            Err(source) => Err(RepoError::Open { path, source }),
        }
    }

    /// Paths of every valid repository under the root. Directories that do
    /// not open as repositories are skipped.
    pub fn list(&self) -> Result<Vec<PathBuf>, RepoError> {
        let _guard = self.lock.read().expect("repo lock");

        let entries = std::fs::read_dir(&self.root).map_err(|source| RepoError::Io {
            path: self.root.clone(),
            source,
        })?;

        let mut repos = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| RepoError::Io {
                path: self.root.clone(),
                source,
            })?;
            let path = entry.path();
            if path.is_dir() && Repository::open(&path).is_ok() {
                repos.push(path);
            }
        }
        repos.sort();
        Ok(repos)
    }

    /// Recursively delete a cached repository. Fails if the path does not
    /// exist, and verifies the removal actually took.
    pub fn delete(&self, path: &Path) -> Result<(), RepoError> {
        let _guard = self.lock.write().expect("repo lock");

        if !path.exists() {
            return Err(RepoError::NotFound {
                path: path.to_path_buf(),
            });
        }

        tracing::info!(path = %path.display(), "deleting repository");
        std::fs::remove_dir_all(path).map_err(|source| RepoError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        if path.exists() {
            return Err(RepoError::DeleteIncomplete {
                path: path.to_path_buf(),
            });
        }
        Ok(())
    }
}
