//! Load/save of named profiles and donor templates.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::ProfileError;
use crate::schema::ProfileDocument;

/// Directory-backed store of named profile documents.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    dir: PathBuf,
}

impl ProfileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    pub fn save(&self, name: &str, document: &ProfileDocument) -> Result<PathBuf, ProfileError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(name);
        write_document(&path, document, false)?;
        Ok(path)
    }

    pub fn load(&self, name: &str) -> Result<ProfileDocument, ProfileError> {
        let path = self.path_for(name);
        if !path.exists() {
            return Err(ProfileError::NotFound {
                name: name.to_string(),
            });
        }
        load_document(&path)
    }

    pub fn list(&self) -> Result<Vec<String>, ProfileError> {
        let mut names = Vec::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(err) => return Err(err.into()),
        };
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Reads and schema-validates a document from an explicit path.
pub fn load_document(path: &Path) -> Result<ProfileDocument, ProfileError> {
    let text = fs::read_to_string(path)?;
    let document: ProfileDocument = serde_json::from_str(&text)?;
    document.validate()?;
    Ok(document)
}

/// Writes a document. `compact` strips null members, which is the readable
/// form for hand-edited donor templates.
pub fn write_document(
    path: &Path,
    document: &ProfileDocument,
    compact: bool,
) -> Result<(), ProfileError> {
    let mut value = serde_json::to_value(document)?;
    if compact {
        strip_nulls(&mut value);
    }
    let mut text = serde_json::to_string_pretty(&value)?;
    text.push('\n');
    fs::write(path, text)?;
    tracing::debug!(path = %path.display(), compact, "wrote profile document");
    Ok(())
}

fn strip_nulls(value: &mut Value) {
    if let Value::Object(map) = value {
        map.retain(|_, v| !v.is_null());
        for child in map.values_mut() {
            strip_nulls(child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::new(dir.path());
        let doc = ProfileDocument::blank();
        store.save("bench-nic", &doc).unwrap();
        let loaded = store.load("bench-nic").unwrap();
        assert_eq!(doc, loaded);
        assert_eq!(store.list().unwrap(), vec!["bench-nic".to_string()]);
    }

    #[test]
    fn loading_a_missing_name_reports_not_found() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::new(dir.path());
        let err = store.load("absent").unwrap_err();
        assert!(matches!(err, ProfileError::NotFound { .. }));
    }

    #[test]
    fn compact_output_has_no_null_members() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("template.json");
        write_document(&path, &ProfileDocument::blank(), true).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(!text.contains("null"), "compact template still has nulls:\n{text}");
    }

    #[test]
    fn malformed_json_is_a_json_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        let err = load_document(&path).unwrap_err();
        assert!(matches!(err, ProfileError::Json(_)));
    }
}
