//! Offline/replay document cache.
//!
//! One JSON file per fetch path, stored under `<cache_dir>/requests/`. The
//! file path is derived deterministically from the request URL: service root
//! stripped, reserved characters percent-decoded, `.json` appended. Replay
//! mode serves these files instead of the network; live mode writes them back
//! after each successful fetch.

use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct RequestCache {
    root: PathBuf,
}

impl RequestCache {
    pub fn new(cache_dir: &str) -> Self {
        Self {
            root: Path::new(cache_dir).join("requests"),
        }
    }

    /// Map a request URL to its cache file.
    pub fn path_for(&self, api_base: &str, url: &str) -> PathBuf {
        let relative = url
            .strip_prefix(api_base)
            .unwrap_or(url)
            .trim_matches('/')
            .replace("%23", "#");
        self.root.join(format!("{}.json", relative))
    }

    /// Return the cached document for the URL, if one was captured.
    pub fn load(&self, api_base: &str, url: &str) -> io::Result<Option<Value>> {
        let path = self.path_for(api_base, url);
        if !path.exists() {
            return Ok(None);
        }
        debug!(path = %path.display(), "serving cached response");
        let raw = fs::read_to_string(&path)?;
        let doc = serde_json::from_str(&raw)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Some(doc))
    }

    /// Persist a live response for future replay.
    pub fn store(&self, api_base: &str, url: &str, doc: &Value) -> io::Result<()> {
        let path = self.path_for(api_base, url);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, serde_json::to_string(doc)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const BASE: &str = "https://api.example.com/v1";

    #[test]
    fn test_path_strips_root_and_decodes_tag() {
        let cache = RequestCache::new("/tmp/wartrack-test");
        let path = cache.path_for(BASE, &format!("{}/clans/%238ULL0ULU/warlog", BASE));
        assert_eq!(
            path,
            PathBuf::from("/tmp/wartrack-test/requests/clans/#8ULL0ULU/warlog.json")
        );
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RequestCache::new(dir.path().to_str().unwrap());
        let url = format!("{}/clans/%23PPC/currentwar", BASE);

        assert!(cache.load(BASE, &url).unwrap().is_none());

        let doc = json!({"state": "inWar", "teamSize": 15});
        cache.store(BASE, &url, &doc).unwrap();
        assert_eq!(cache.load(BASE, &url).unwrap(), Some(doc));
    }
}
