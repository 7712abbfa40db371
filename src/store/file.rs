//! File-backed session store: one JSON document per session id.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::debug;

use crate::store::{SessionRecord, SessionStore, StoreError, StoreResult};

/// Stores each session as `{dir}/{id}.json`.
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> StoreResult<PathBuf> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
            && !id.starts_with('.');
        if !valid {
            return Err(StoreError::InvalidId(id.to_string()));
        }
        Ok(self.dir.join(format!("{id}.json")))
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self, id: &str) -> StoreResult<Option<SessionRecord>> {
        let path = self.path_for(id)?;
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        debug!("loaded session from {}", path.display());
        Ok(Some(serde_json::from_slice(&data)?))
    }

    fn save(&self, id: &str, record: &SessionRecord) -> StoreResult<()> {
        let path = self.path_for(id)?;
        fs::create_dir_all(&self.dir)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(record)?)?;
        fs::rename(&tmp, &path)?;
        debug!("saved session to {}", path.display());
        Ok(())
    }

    fn clear(&self, id: &str) -> StoreResult<()> {
        let path = self.path_for(id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Credentials, UserProfile};

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("wa-web-core-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = temp_dir();
        let store = FileSessionStore::new(&dir);
        assert_eq!(store.load("default").unwrap(), None);

        let user = UserProfile {
            id: "15551234567@s.whatsapp.net".into(),
            name: Some("Me".into()),
            status: None,
        };
        let record = SessionRecord::new(&Credentials::generate(), Some(user));
        store.save("default", &record).unwrap();
        assert!(dir.join("default.json").exists());
        assert_eq!(store.load("default").unwrap(), Some(record));

        store.clear("default").unwrap();
        assert_eq!(store.load("default").unwrap(), None);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_rejects_path_like_ids() {
        let store = FileSessionStore::new(temp_dir());
        assert_eq!(store.load("../escape"), Err(StoreError::InvalidId("../escape".into())));
        assert_eq!(store.load(""), Err(StoreError::InvalidId(String::new())));
        assert!(matches!(store.clear(".hidden"), Err(StoreError::InvalidId(_))));
    }

    #[test]
    fn test_corrupt_document_is_an_error() {
        let dir = temp_dir();
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("bad.json"), b"{not json").unwrap();
        let store = FileSessionStore::new(&dir);
        assert!(matches!(store.load("bad"), Err(StoreError::SerializationError(_))));
        let _ = fs::remove_dir_all(dir);
    }
}
