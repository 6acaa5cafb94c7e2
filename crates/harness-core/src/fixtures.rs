//! Isolated, disposable views of shared fixture files.
//!
//! Two strategies cover the two ways the subject mutates its inputs:
//!
//! - **Copy**: a byte-exact, fsynced copy under a unique name. Release
//!   deletes it. Used when the subject may rewrite the file in place.
//! - **Redirect**: a symlink at a stable path pointing at the real content.
//!   Used when the subject deletes or replaces its input mid-run. Release
//!   re-establishes the link, whatever the subject left behind.
//!
//! A `FixtureHandle` releases exactly once, either through `release()` or on
//! drop, so cleanup runs on every exit path including panics.

use harness_proto::{RunIdentifier, SetupError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Separator between the source stem and the run identifier in copy names.
pub const COPY_SEPARATOR: &str = "-isolated-";

/// Which isolation strategy a fixture uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Isolation {
    #[default]
    Copy,
    Redirect,
}

type ClaimSet = Arc<Mutex<HashSet<PathBuf>>>;

/// Hands out isolated fixtures inside one staging directory.
///
/// Cheap to clone; clones share the set of redirect paths currently held.
#[derive(Debug, Clone)]
pub struct FixtureIsolationManager {
    staging_dir: PathBuf,
    claims: ClaimSet,
}

impl FixtureIsolationManager {
    pub fn new(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            claims: Arc::default(),
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Acquires `source` with the given strategy.
    pub fn acquire(
        &self,
        source: &Path,
        prefix: &str,
        isolation: Isolation,
    ) -> Result<FixtureHandle, SetupError> {
        match isolation {
            Isolation::Copy => self.acquire_unique_copy(source, prefix),
            Isolation::Redirect => self.acquire_redirect(source, prefix),
        }
    }

    /// Copies `source` to `<staging>/<prefix><stem>-isolated-<id>[.<ext>]`.
    ///
    /// The copy is flushed to stable storage before the handle is returned.
    pub fn acquire_unique_copy(
        &self,
        source: &Path,
        prefix: &str,
    ) -> Result<FixtureHandle, SetupError> {
        ensure_regular_file(source)?;
        self.ensure_staging()?;

        let id = RunIdentifier::generate()?;
        let dest = self.staging_dir.join(isolated_name(source, prefix, &id));
        copy_exact(source, &dest)?;

        debug!(
            source = %source.display(),
            copy = %dest.display(),
            "Acquired isolated fixture copy"
        );

        Ok(FixtureHandle {
            path: dest,
            isolation: Isolation::Copy,
            release: Some(Release::DeleteCopy),
        })
    }

    /// Links `<staging>/<prefix><file name>` to the real content of `source`.
    ///
    /// The link path carries no run identifier: it is the stable reference
    /// the subject consumes, and the prefix is the caller's namespace. Two
    /// live redirects of the same path fail with `SetupError::FixtureBusy`.
    pub fn acquire_redirect(
        &self,
        source: &Path,
        prefix: &str,
    ) -> Result<FixtureHandle, SetupError> {
        let target = fs::canonicalize(source).map_err(|e| SetupError::fixture(source, e))?;
        let link_name = redirect_link_name(source, prefix).ok_or_else(|| {
            SetupError::fixture(
                source,
                io::Error::new(ErrorKind::InvalidInput, "fixture path has no file name"),
            )
        })?;
        self.ensure_staging()?;

        let link = self.staging_dir.join(link_name);
        let claim = Claim::take(&self.claims, &link)?;
        replace_with_link(&link, &target)?;

        debug!(
            link = %link.display(),
            target = %target.display(),
            "Acquired fixture redirect"
        );

        Ok(FixtureHandle {
            path: link,
            isolation: Isolation::Redirect,
            release: Some(Release::RestoreLink { target, claim }),
        })
    }

    fn ensure_staging(&self) -> Result<(), SetupError> {
        fs::create_dir_all(&self.staging_dir).map_err(|e| SetupError::fixture(&self.staging_dir, e))
    }
}

/// A fixture path owned by one scenario until released.
#[derive(Debug)]
pub struct FixtureHandle {
    path: PathBuf,
    isolation: Isolation,
    release: Option<Release>,
}

#[derive(Debug)]
enum Release {
    DeleteCopy,
    RestoreLink { target: PathBuf, claim: Claim },
}

impl FixtureHandle {
    /// Path to pass to the subject.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn isolation(&self) -> Isolation {
        self.isolation
    }

    /// Deletes the copy or restores the redirect.
    ///
    /// A copy that is already gone is not an error.
    pub fn release(mut self) -> Result<(), SetupError> {
        self.release_now()
    }

    fn release_now(&mut self) -> Result<(), SetupError> {
        match self.release.take() {
            None => Ok(()),
            Some(Release::DeleteCopy) => {
                debug!(path = %self.path.display(), "Deleting fixture copy");
                remove_if_present(&self.path)
            }
            Some(Release::RestoreLink { target, claim }) => {
                debug!(link = %self.path.display(), "Restoring fixture redirect");
                let restored = restore_link(&self.path, &target);
                drop(claim);
                restored
            }
        }
    }
}

impl Drop for FixtureHandle {
    fn drop(&mut self) {
        if let Err(e) = self.release_now() {
            warn!(path = %self.path.display(), error = %e, "Fixture release failed");
        }
    }
}

/// Holds a redirect path in the manager's claim set until dropped.
#[derive(Debug)]
struct Claim {
    claims: ClaimSet,
    path: PathBuf,
}

impl Claim {
    fn take(claims: &ClaimSet, path: &Path) -> Result<Self, SetupError> {
        let mut held = claims.lock().unwrap_or_else(PoisonError::into_inner);
        if !held.insert(path.to_path_buf()) {
            return Err(SetupError::FixtureBusy(path.to_path_buf()));
        }
        Ok(Self {
            claims: Arc::clone(claims),
            path: path.to_path_buf(),
        })
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.claims
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.path);
    }
}

/// File name of the link `acquire_redirect` places in the staging dir.
///
/// `None` when `source` has no file name.
pub fn redirect_link_name(source: &Path, prefix: &str) -> Option<String> {
    source
        .file_name()
        .map(|name| format!("{prefix}{}", name.to_string_lossy()))
}

fn isolated_name(source: &Path, prefix: &str, id: &RunIdentifier) -> String {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default();
    match source.extension() {
        Some(ext) => format!(
            "{prefix}{stem}{COPY_SEPARATOR}{id}.{}",
            ext.to_string_lossy()
        ),
        None => format!("{prefix}{stem}{COPY_SEPARATOR}{id}"),
    }
}

fn ensure_regular_file(source: &Path) -> Result<(), SetupError> {
    let meta = fs::metadata(source).map_err(|e| SetupError::fixture(source, e))?;
    if meta.is_file() {
        Ok(())
    } else {
        Err(SetupError::fixture(
            source,
            io::Error::new(ErrorKind::InvalidInput, "fixture is not a regular file"),
        ))
    }
}

fn copy_exact(source: &Path, dest: &Path) -> Result<(), SetupError> {
    let mut input = File::open(source).map_err(|e| SetupError::fixture(source, e))?;
    let mut output = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dest)
        .map_err(|e| SetupError::fixture(dest, e))?;

    // Never leave a half-written copy behind
    let partial = scopeguard::guard(dest.to_path_buf(), |path| {
        let _ = fs::remove_file(path);
    });

    io::copy(&mut input, &mut output).map_err(|e| SetupError::fixture(source, e))?;
    output.sync_all().map_err(|e| SetupError::fixture(dest, e))?;

    scopeguard::ScopeGuard::into_inner(partial);
    Ok(())
}

fn remove_if_present(path: &Path) -> Result<(), SetupError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SetupError::fixture(path, e)),
    }
}

/// Puts a link to `target` at `link`, removing whatever occupies it.
fn replace_with_link(link: &Path, target: &Path) -> Result<(), SetupError> {
    let cleared = match fs::symlink_metadata(link) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(link),
        Ok(_) => fs::remove_file(link),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    };
    cleared.map_err(|e| SetupError::fixture(link, e))?;
    symlink(target, link).map_err(|e| SetupError::fixture(link, e))
}

fn restore_link(link: &Path, target: &Path) -> Result<(), SetupError> {
    if fs::read_link(link).is_ok_and(|current| current.as_path() == target) {
        return Ok(());
    }
    replace_with_link(link, target)
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}
