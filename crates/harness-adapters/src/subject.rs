//! Location of the subject binary.

use harness_proto::SetupError;
use std::path::{Path, PathBuf};

/// Path to the externally built subject binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectBinary {
    path: PathBuf,
}

impl SubjectBinary {
    /// Where packaging drops the binary, relative to the working directory.
    pub const DEFAULT_RELATIVE_PATH: &'static str = "dist/captain";

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Resolves `location` against `root` unless it is already absolute.
    pub fn resolve(root: &Path, location: &Path) -> Self {
        if location.is_absolute() {
            Self::new(location)
        } else {
            Self::new(root.join(location))
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_present(&self) -> bool {
        self.path.is_file()
    }

    /// Fails with `SetupError::BinaryMissing` when the binary has not been built.
    pub fn ensure_present(&self) -> Result<(), SetupError> {
        if self.is_present() {
            Ok(())
        } else {
            Err(SetupError::BinaryMissing(self.path.clone()))
        }
    }
}
