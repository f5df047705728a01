//! YAML document loading that tells "missing" apart from "corrupt".

use std::io::{self, Read};
use std::path::{Path, PathBuf};

use memo_odb::FileSystem;
use thiserror::Error;

use crate::lock::StageLock;
use crate::schema::{self, SchemaError};

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("'{}' does not exist", path.display())]
    Missing { path: PathBuf },

    #[error("unable to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("'{}' is corrupted: {message}", path.display())]
    Corrupt { path: PathBuf, message: String },

    #[error("'{}' is not a valid lockfile: {source}", path.display())]
    Invalid {
        path: PathBuf,
        #[source]
        source: SchemaError,
    },
}

impl LoadError {
    /// Corrupt or schema-invalid: the file exists but can't be used.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, LoadError::Corrupt { .. } | LoadError::Invalid { .. })
    }
}

/// Read and parse a YAML file.
pub fn load_yaml(fs: &dyn FileSystem, path: &Path) -> Result<serde_yaml::Value, LoadError> {
    let mut reader = fs.open(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            LoadError::Missing {
                path: path.to_path_buf(),
            }
        } else {
            LoadError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;

    let mut text = String::new();
    reader.read_to_string(&mut text).map_err(|source| {
        if source.kind() == io::ErrorKind::InvalidData {
            LoadError::Corrupt {
                path: path.to_path_buf(),
                message: "not valid UTF-8".to_string(),
            }
        } else {
            LoadError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;

    serde_yaml::from_str(&text).map_err(|e| LoadError::Corrupt {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Load and validate a single-stage lockfile.
pub fn load_lock(fs: &dyn FileSystem, path: &Path) -> Result<StageLock, LoadError> {
    let value = load_yaml(fs, path)?;
    schema::from_document(value).map_err(|source| LoadError::Invalid {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use memo_odb::{LocalFs, MemoryFs};
    use tempfile::tempdir;

    #[test]
    fn test_missing() {
        let dir = tempdir().unwrap();
        let err = load_lock(&LocalFs, &dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, LoadError::Missing { .. }));
        assert!(!err.is_corrupt());
    }

    #[test]
    fn test_corrupt_yaml() {
        let fs = MemoryFs::new();
        let path = Path::new("/runs/ab/abc/v");
        fs.put_file(&mut &b"cmd: [unclosed"[..], path).unwrap();
        let err = load_lock(&fs, path).unwrap_err();
        assert!(matches!(err, LoadError::Corrupt { .. }));
        assert!(err.is_corrupt());
    }

    #[test]
    fn test_binary_garbage_is_corrupt() {
        let fs = MemoryFs::new();
        let path = Path::new("/garbage");
        fs.put_file(&mut &[0xff, 0xfe, 0x00, 0x81][..], path).unwrap();
        assert!(load_lock(&fs, path).unwrap_err().is_corrupt());
    }

    #[test]
    fn test_schema_invalid() {
        let fs = MemoryFs::new();
        let path = Path::new("/entry");
        fs.put_file(&mut &b"cmd: ''\n"[..], path).unwrap();
        let err = load_lock(&fs, path).unwrap_err();
        assert!(matches!(
            err,
            LoadError::Invalid {
                source: SchemaError::EmptyCmd,
                ..
            }
        ));
    }

    #[test]
    fn test_valid() {
        let fs = MemoryFs::new();
        let path = Path::new("/entry");
        fs.put_file(&mut &b"cmd: echo\nouts:\n- path: out\n"[..], path)
            .unwrap();
        let lock = load_lock(&fs, path).unwrap();
        assert_eq!(lock.cmd, "echo");
        assert_eq!(lock.outs.len(), 1);
    }
}
