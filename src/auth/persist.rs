//! Session persistence between runs
//!
//! The session is stored as a JSON object under a fixed key, mirroring the
//! browser key-value storage the web client used.

use serde_json::{Map, Value};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::Session;
use crate::error::Result;

/// Key under which the session is stored
pub const SESSION_KEY: &str = "pethome.session";

/// A file holding at most one session
#[derive(Debug, Clone)]
pub struct SessionFile {
    path: PathBuf,
}

impl SessionFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored session. A missing file or key means no session; an
    /// unreadable entry is discarded.
    pub fn load(&self) -> Result<Option<Session>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let entry = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|mut value| value.get_mut(SESSION_KEY).map(Value::take));

        match entry.map(serde_json::from_value::<Session>) {
            Some(Ok(session)) => Ok(Some(session)),
            Some(Err(e)) => {
                log::warn!("Discarding unreadable session in {}: {}", self.path.display(), e);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    pub fn save(&self, session: &Session) -> Result<()> {
        let mut store = Map::new();
        store.insert(SESSION_KEY.to_string(), serde_json::to_value(session)?);
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_vec_pretty(&Value::Object(store))?)?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthUser;
    use serde_json::json;

    fn session() -> Session {
        Session::new(
            "at".to_string(),
            "rt".to_string(),
            AuthUser {
                id: "u1".to_string(),
                email: Some("ana@example.com".to_string()),
                phone: None,
                user_metadata: json!({}),
                created_at: None,
            },
            3600,
        )
    }

    #[test]
    fn save_load_clear() {
        let dir = tempfile::tempdir().unwrap();
        let file = SessionFile::new(dir.path().join("nested").join("session.json"));

        assert_eq!(file.load().unwrap(), None);
        file.save(&session()).unwrap();

        let stored: Value =
            serde_json::from_str(&fs::read_to_string(file.path()).unwrap()).unwrap();
        assert_eq!(stored[SESSION_KEY]["access_token"], "at");
        assert_eq!(file.load().unwrap(), Some(session()));

        file.clear().unwrap();
        assert_eq!(file.load().unwrap(), None);
        file.clear().unwrap();
    }

    #[test]
    fn garbage_reads_as_no_session() {
        let dir = tempfile::tempdir().unwrap();
        let file = SessionFile::new(dir.path().join("session.json"));
        fs::write(file.path(), "{\"pethome.session\": 42}").unwrap();
        assert_eq!(file.load().unwrap(), None);

        fs::write(file.path(), "not json").unwrap();
        assert_eq!(file.load().unwrap(), None);
    }
}
