//! Network namespaces the plugin under test operates in.
//!
//! The harness never touches namespace contents itself; it only creates one
//! before a session and removes it afterwards.

use nix::mount::{MntFlags, MsFlags, mount, umount2};
use nix::sched::{CloneFlags, unshare};
use nix::unistd::gettid;
use rand::Rng;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum NamespaceError {
    #[error("namespace {0:?} does not exist")]
    Missing(PathBuf),
    #[error("namespace I/O failed for {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{operation} failed for {path:?}: {source}")]
    Sys {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: nix::Error,
    },
    #[error("namespace setup thread panicked")]
    ThreadPanicked,
}

/// Opaque reference to a namespace; plugins receive `path` as `CNI_NETNS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceHandle {
    path: PathBuf,
}

impl NamespaceHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub trait NamespaceProvider {
    fn create(&mut self) -> Result<NamespaceHandle, NamespaceError>;
    fn destroy(&mut self, handle: NamespaceHandle) -> Result<(), NamespaceError>;
}

/// Creates a fresh network namespace pinned by a bind mount under `run_dir`.
///
/// Requires CAP_SYS_ADMIN.
#[derive(Debug, Clone)]
pub struct PinnedNamespaceProvider {
    run_dir: PathBuf,
}

impl PinnedNamespaceProvider {
    pub fn new(run_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_dir: run_dir.into(),
        }
    }

    fn pin_new_namespace(path: PathBuf) -> Result<(), NamespaceError> {
        // unshare() only moves the calling thread, so do it on a throwaway
        // thread and let the bind mount keep the namespace alive.
        thread::spawn(move || -> Result<(), NamespaceError> {
            unshare(CloneFlags::CLONE_NEWNET).map_err(|source| NamespaceError::Sys {
                operation: "unshare(CLONE_NEWNET)",
                path: path.clone(),
                source,
            })?;
            let ns_source = format!("/proc/self/task/{}/ns/net", gettid());
            mount(
                Some(ns_source.as_str()),
                path.as_path(),
                None::<&str>,
                MsFlags::MS_BIND,
                None::<&str>,
            )
            .map_err(|source| NamespaceError::Sys {
                operation: "bind mount",
                path,
                source,
            })
        })
        .join()
        .map_err(|_| NamespaceError::ThreadPanicked)?
    }
}

impl NamespaceProvider for PinnedNamespaceProvider {
    fn create(&mut self) -> Result<NamespaceHandle, NamespaceError> {
        fs::create_dir_all(&self.run_dir).map_err(|source| NamespaceError::Io {
            path: self.run_dir.clone(),
            source,
        })?;

        let name = format!("cnifuzz-{:08x}", rand::rng().random::<u32>());
        let path = self.run_dir.join(name);
        File::create(&path).map_err(|source| NamespaceError::Io {
            path: path.clone(),
            source,
        })?;

        if let Err(e) = Self::pin_new_namespace(path.clone()) {
            let _ = fs::remove_file(&path);
            return Err(e);
        }
        info!(netns = %path.display(), "created network namespace");
        Ok(NamespaceHandle::new(path))
    }

    fn destroy(&mut self, handle: NamespaceHandle) -> Result<(), NamespaceError> {
        let path = handle.path;
        umount2(path.as_path(), MntFlags::MNT_DETACH).map_err(|source| NamespaceError::Sys {
            operation: "unmount",
            path: path.clone(),
            source,
        })?;
        fs::remove_file(&path).map_err(|source| NamespaceError::Io {
            path: path.clone(),
            source,
        })?;
        info!(netns = %path.display(), "removed network namespace");
        Ok(())
    }
}

/// Reuses a namespace the operator created; it is left in place afterwards.
#[derive(Debug, Clone)]
pub struct ExistingNamespace {
    path: PathBuf,
}

impl ExistingNamespace {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl NamespaceProvider for ExistingNamespace {
    fn create(&mut self) -> Result<NamespaceHandle, NamespaceError> {
        if !self.path.exists() {
            return Err(NamespaceError::Missing(self.path.clone()));
        }
        debug!(netns = %self.path.display(), "reusing existing network namespace");
        Ok(NamespaceHandle::new(self.path.clone()))
    }

    fn destroy(&mut self, _handle: NamespaceHandle) -> Result<(), NamespaceError> {
        Ok(())
    }
}
