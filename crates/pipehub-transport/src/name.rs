use std::fmt;
use std::path::PathBuf;

use crate::error::{Result, TransportError};

/// Name of an IPC rendezvous point.
///
/// A bare name such as `"example-pipe"` resolves to a platform endpoint:
/// - Windows: `\\.\pipe\example-pipe`
/// - Unix: `<temp dir>/example-pipe.sock`
///
/// Names that already look like a platform path (contain a path separator on
/// Unix, start with `\\` on Windows) are used verbatim.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PipeName {
    name: String,
}

impl PipeName {
    /// Create a pipe name, rejecting empty names and embedded NUL bytes.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() || name.contains('\0') {
            return Err(TransportError::InvalidName(name));
        }
        Ok(Self { name })
    }

    /// The name as given by the caller.
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Resolve the platform endpoint for this name.
    #[cfg(unix)]
    pub fn endpoint(&self) -> PathBuf {
        if self.name.contains('/') {
            PathBuf::from(&self.name)
        } else {
            std::env::temp_dir().join(format!("{}.sock", self.name))
        }
    }

    /// Resolve the platform endpoint for this name.
    #[cfg(windows)]
    pub fn endpoint(&self) -> PathBuf {
        if self.name.starts_with(r"\\") {
            PathBuf::from(&self.name)
        } else {
            PathBuf::from(format!(r"\\.\pipe\{}", self.name))
        }
    }
}

impl fmt::Debug for PipeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PipeName").field(&self.name).finish()
    }
}

impl fmt::Display for PipeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl std::str::FromStr for PipeName {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}
