//! Full-rewrite JSON snapshot files.
//!
//! Writes go to a temporary file in the same directory and are renamed
//! over the target, so readers never observe a half-written snapshot.
//! A missing or empty file reads back as `T::default()`.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::{AppError, Result};

/// One JSON snapshot file.
#[derive(Debug, Clone)]
pub struct JsonSnapshot {
    path: PathBuf,
}

impl JsonSnapshot {
    /// Bind a snapshot to `path`; nothing is read or written yet.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the snapshot file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and decode the snapshot.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file exists but cannot be read or
    /// does not contain valid JSON for `T`.
    pub fn load<T>(&self) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        match fs::read_to_string(&self.path) {
            Ok(raw) if raw.trim().is_empty() => Ok(T::default()),
            Ok(raw) => serde_json::from_str(&raw).map_err(|err| {
                AppError::Io(format!(
                    "corrupt snapshot {}: {err}",
                    self.path.display()
                ))
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(T::default()),
            Err(err) => Err(AppError::Io(format!(
                "cannot read snapshot {}: {err}",
                self.path.display()
            ))),
        }
    }

    /// Encode `value` and atomically replace the snapshot file.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the directory cannot be created or the
    /// temporary file cannot be written or renamed.
    pub fn save<T>(&self, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, value)?;
        tmp.write_all(b"\n")?;
        tmp.flush()?;
        tmp.persist(&self.path).map_err(|err| {
            AppError::Io(format!(
                "cannot replace snapshot {}: {}",
                self.path.display(),
                err.error
            ))
        })?;
        Ok(())
    }
}
