//! Lockfile schema validation.
//!
//! Structural checks (field names and types, hash format) come from serde;
//! [`validate`] adds the semantic rules serde cannot express.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::lock::{LockEntry, StageLock};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("malformed lockfile: {0}")]
    Structure(String),

    #[error("'cmd' must not be empty")]
    EmptyCmd,

    #[error("{section}: entry with an empty 'path'")]
    EmptyPath { section: &'static str },

    #[error("{section}: duplicate path '{path}'")]
    DuplicatePath {
        section: &'static str,
        path: String,
    },
}

/// Check a parsed lockfile.
pub fn validate(lock: &StageLock) -> Result<(), SchemaError> {
    if lock.cmd.trim().is_empty() {
        return Err(SchemaError::EmptyCmd);
    }
    validate_entries("deps", &lock.deps)?;
    validate_entries("outs", &lock.outs)?;
    Ok(())
}

fn validate_entries(section: &'static str, entries: &[LockEntry]) -> Result<(), SchemaError> {
    let mut seen = BTreeSet::new();
    for entry in entries {
        if entry.path.is_empty() {
            return Err(SchemaError::EmptyPath { section });
        }
        if !seen.insert(entry.path.as_str()) {
            return Err(SchemaError::DuplicatePath {
                section,
                path: entry.path.clone(),
            });
        }
    }
    Ok(())
}

/// Parse a YAML document into a validated lockfile.
pub fn from_document(value: serde_yaml::Value) -> Result<StageLock, SchemaError> {
    let lock: StageLock =
        serde_yaml::from_value(value).map_err(|e| SchemaError::Structure(e.to_string()))?;
    validate(&lock)?;
    Ok(lock)
}

#[cfg(test)]
mod tests {
    use super::*;
    use memo_odb::ObjectId;

    fn doc(yaml: &str) -> serde_yaml::Value {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_valid_document() {
        let hash = ObjectId::compute(b"x");
        let yaml = format!(
            "cmd: echo hi > out\ndeps:\n- path: in\n  hash: '{hash}'\n  size: 1\nouts:\n- path: out\n  hash: '{hash}'\n  size: 1\n"
        );
        let lock = from_document(doc(&yaml)).unwrap();
        assert_eq!(lock.deps[0].hash.as_ref(), Some(&hash));
    }

    #[test]
    fn test_structure_errors() {
        // Not a mapping
        assert!(matches!(
            from_document(doc("- a\n- b\n")),
            Err(SchemaError::Structure(_))
        ));
        // Missing cmd
        assert!(matches!(
            from_document(doc("deps: []\n")),
            Err(SchemaError::Structure(_))
        ));
        // Bad hash
        assert!(matches!(
            from_document(doc("cmd: x\nouts:\n- path: o\n  hash: nothex\n")),
            Err(SchemaError::Structure(_))
        ));
        // Wrong type
        assert!(matches!(
            from_document(doc("cmd: x\nouts:\n- path: o\n  size: big\n")),
            Err(SchemaError::Structure(_))
        ));
    }

    #[test]
    fn test_semantic_errors() {
        assert_eq!(
            from_document(doc("cmd: ''\n")),
            Err(SchemaError::EmptyCmd)
        );
        assert_eq!(
            from_document(doc("cmd: x\ndeps:\n- path: ''\n")),
            Err(SchemaError::EmptyPath { section: "deps" })
        );
        assert_eq!(
            from_document(doc("cmd: x\nouts:\n- path: a\n- path: a\n")),
            Err(SchemaError::DuplicatePath {
                section: "outs",
                path: "a".to_string()
            })
        );
    }
}
