//! Persistent font-metrics cache. Parsed metrics are stored as JSON under
//! a file named by the SHA-256 of the font program, so identical font
//! bytes never get re-parsed across documents.

use crate::error::QuireError;
use crate::metrics::FontMetrics;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

pub(crate) struct MetricsCache {
    dir: Option<PathBuf>,
}

impl MetricsCache {
    pub(crate) fn new(dir: Option<PathBuf>) -> Self {
        MetricsCache { dir }
    }

    fn entry_path(&self, font_data: &[u8]) -> Option<PathBuf> {
        let dir = self.dir.as_ref()?;
        let mut hasher = Sha256::new();
        hasher.update(font_data);
        let digest = hasher.finalize();
        let mut name = String::with_capacity(digest.len() * 2 + 5);
        for byte in digest {
            name.push_str(&format!("{:02x}", byte));
        }
        name.push_str(".json");
        Some(dir.join(name))
    }

    /// A missing or unreadable entry is a miss; corrupt JSON is a miss too.
    pub(crate) fn load(&self, font_data: &[u8]) -> Option<FontMetrics> {
        let path = self.entry_path(font_data)?;
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("metrics cache read failed for {}: {}", path.display(), err);
                }
                return None;
            }
        };
        match serde_json::from_str(&text) {
            Ok(metrics) => Some(metrics),
            Err(err) => {
                log::warn!("corrupt metrics cache entry {}: {}", path.display(), err);
                None
            }
        }
    }

    /// Permission problems writing the cache are not the caller's concern;
    /// anything else points at a broken filesystem and is fatal.
    pub(crate) fn store(&self, font_data: &[u8], metrics: &FontMetrics) -> Result<(), QuireError> {
        let Some(path) = self.entry_path(font_data) else {
            return Ok(());
        };
        let text = serde_json::to_string(metrics)
            .map_err(|err| QuireError::Font(format!("metrics not serializable: {}", err)))?;
        match write_entry(&path, &text) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
                log::warn!("metrics cache not writable at {}", path.display());
                Ok(())
            }
            Err(err) => Err(QuireError::Io(err)),
        }
    }
}

fn write_entry(path: &Path, text: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_cache_dir(tag: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("quire_{tag}_{}_{}", std::process::id(), nanos))
    }

    fn sample_metrics() -> FontMetrics {
        FontMetrics {
            base_name: "Cached".to_string(),
            widths: vec![500; 224],
            char_widths: Default::default(),
            glyph_ids: Default::default(),
            ascent: 750,
            descent: -250,
            cap_height: 700,
            italic_angle: 0,
            stem_v: 80,
            bbox: (0, -250, 1000, 900),
            missing_width: 500,
            default_width: 500,
            is_fixed_pitch: false,
            symbolic: false,
        }
    }

    #[test]
    fn store_then_load_hits() {
        let dir = temp_cache_dir("hit");
        let cache = MetricsCache::new(Some(dir.clone()));
        let font = b"not a real font, just identity bytes";
        assert!(cache.load(font).is_none());
        cache.store(font, &sample_metrics()).unwrap();
        let loaded = cache.load(font).expect("cache hit");
        assert_eq!(loaded.base_name, "Cached");
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn corrupt_entry_is_a_miss() {
        let dir = temp_cache_dir("corrupt");
        let cache = MetricsCache::new(Some(dir.clone()));
        let font = b"font bytes";
        cache.store(font, &sample_metrics()).unwrap();
        let entry = fs::read_dir(&dir).unwrap().next().unwrap().unwrap().path();
        fs::write(&entry, "{ not json").unwrap();
        assert!(cache.load(font).is_none());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn disabled_cache_is_inert() {
        let cache = MetricsCache::new(None);
        assert!(cache.load(b"x").is_none());
        cache.store(b"x", &sample_metrics()).unwrap();
    }
}
