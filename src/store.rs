//! Key/value snapshot storage, one JSON file per key

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::Result;

pub const CHANNELS_KEY: &str = "iptv_channels";
pub const FAVORITES_KEY: &str = "iptv_favorites";
pub const EPG_KEY: &str = "iptv_epg_data";
pub const PLAYLIST_INFO_KEY: &str = "iptv_playlist_info";

#[derive(Debug, Clone)]
pub struct JsonStore {
    dir: PathBuf,
}

impl Default for JsonStore {
    /// Store under the per-user config directory
    fn default() -> Self {
        Self::new(crate::config::config_dir().join("session"))
    }
}

impl JsonStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// Replace the value under `key`. The file is swapped in whole.
    pub fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(value)?)?;
        fs::rename(&tmp, &path)?;
        debug!("Stored {}", path.display());
        Ok(())
    }

    /// `Ok(None)` when nothing is stored under `key`
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match fs::read(self.path(key)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Removing a missing key is not an error
    pub fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_put_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path().join("store"));

        assert_eq!(store.get::<Vec<String>>(FAVORITES_KEY).unwrap(), None);

        store.put(FAVORITES_KEY, &vec!["a".to_string(), "b".to_string()]).unwrap();
        assert_eq!(
            store.get::<Vec<String>>(FAVORITES_KEY).unwrap(),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert!(store.dir().join("iptv_favorites.json").exists());

        store.remove(FAVORITES_KEY).unwrap();
        store.remove(FAVORITES_KEY).unwrap();
        assert_eq!(store.get::<Vec<String>>(FAVORITES_KEY).unwrap(), None);
    }

    #[test]
    fn test_corrupt_value_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());
        fs::write(dir.path().join("iptv_channels.json"), "[{").unwrap();
        assert!(matches!(
            store.get::<Vec<String>>(CHANNELS_KEY),
            Err(Error::Serialization(_))
        ));
    }
}
