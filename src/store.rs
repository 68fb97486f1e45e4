// ADSMITH Artifact Store & Critique Cache
// Copyright (c) 2026 AdSmith Collective | ADSMITH
//
// Content-addressed on-disk store for every intermediate asset. All writes
// are atomic (temp-then-rename); readers only ever receive a path. The
// critique cache memoises image judgements so a re-evaluated candidate
// never costs a second critic call.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use walkdir::WalkDir;

/// Cached critic verdicts survive this long.
pub const CRITIQUE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Image,
    Audio,
    Clip,
    Frame,
    Final,
}

impl ArtifactKind {
    pub fn subdir(&self) -> &'static str {
        match self {
            ArtifactKind::Image => "images",
            ArtifactKind::Audio => "audio",
            ArtifactKind::Clip => "clips",
            ArtifactKind::Frame => "frames",
            ArtifactKind::Final => "output",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::Image => "png",
            ArtifactKind::Audio => "m4a",
            ArtifactKind::Clip => "mp4",
            ArtifactKind::Frame => "jpg",
            ArtifactKind::Final => "mp4",
        }
    }
}

/// Stable hash over everything that determines an artifact.
pub fn fingerprint(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]); // field separator, prevents boundary collisions
    }
    format!("{:x}", hasher.finalize())
}

pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// One project's directory tree plus a fingerprint -> path index.
pub struct ArtifactStore {
    root: PathBuf,
    index: Mutex<HashMap<String, PathBuf>>,
}

impl ArtifactStore {
    /// Open (or create) the store rooted at `projects/{id}/`.
    pub fn open(projects_root: &Path, project_id: &str) -> Result<Self> {
        let root = projects_root.join(project_id);
        for kind in [
            ArtifactKind::Image,
            ArtifactKind::Audio,
            ArtifactKind::Clip,
            ArtifactKind::Frame,
            ArtifactKind::Final,
        ] {
            fs::create_dir_all(root.join(kind.subdir()))?;
        }

        // Rebuild the index from filenames: `<label>.<fp16>.<ext>`.
        let mut index = HashMap::new();
        for entry in WalkDir::new(&root)
            .max_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            if let Some(fp) = fingerprint_from_name(entry.path()) {
                index.insert(fp, entry.path().to_path_buf());
            }
        }
        if !index.is_empty() {
            info!("[STORE] Re-indexed {} artifacts from disk", index.len());
        }

        Ok(Self {
            root,
            index: Mutex::new(index),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, kind: ArtifactKind) -> PathBuf {
        self.root.join(kind.subdir())
    }

    /// Look up a previously stored artifact by fingerprint. A hit means no
    /// provider call is needed for this asset.
    pub fn lookup(&self, fp: &str) -> Option<PathBuf> {
        let index = self.index.lock().unwrap();
        index.get(fp).filter(|p| p.exists()).cloned()
    }

    /// Atomically persist bytes under a content-addressed name.
    pub fn put(
        &self,
        kind: ArtifactKind,
        label: &str,
        fp: &str,
        bytes: &[u8],
    ) -> Result<PathBuf> {
        let short = &fp[..fp.len().min(16)];
        let name = format!("{}.{}.{}", label, short, kind.extension());
        let path = self.dir(kind).join(&name);
        let tmp = self.dir(kind).join(format!(".{}.tmp", name));
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        self.index
            .lock()
            .unwrap()
            .insert(fp.to_string(), path.clone());
        Ok(path)
    }

    /// Delete every intermediate after a successful final assembly. The
    /// `output/` directory is kept.
    pub fn purge_intermediates(&self) -> Result<usize> {
        let mut removed = 0usize;
        for kind in [
            ArtifactKind::Image,
            ArtifactKind::Audio,
            ArtifactKind::Clip,
            ArtifactKind::Frame,
        ] {
            let dir = self.dir(kind);
            for entry in WalkDir::new(&dir)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
            {
                if fs::remove_file(entry.path()).is_ok() {
                    removed += 1;
                }
            }
        }
        self.index.lock().unwrap().retain(|_, p| p.exists());
        info!("[STORE] Purged {} intermediate artifacts", removed);
        Ok(removed)
    }
}

/// Parse `<label>.<fp16>.<ext>` back into its fingerprint prefix.
fn fingerprint_from_name(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    if name.starts_with('.') {
        return None; // leftover temp file
    }
    let mut parts = name.rsplitn(3, '.');
    let _ext = parts.next()?;
    let fp = parts.next()?;
    let _label = parts.next()?;
    if fp.len() == 16 && fp.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(fp.to_string())
    } else {
        None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CritiqueVerdict {
    /// 1..=10 per the critic rubric.
    pub score: u8,
    pub rationale: String,
    pub accept: bool,
}

struct CachedVerdict {
    verdict: CritiqueVerdict,
    stored_at: Instant,
}

/// Memoises image-quality judgements keyed by candidate-image fingerprint.
/// Guarded by a process-wide lock; get/set are idempotent.
pub struct CritiqueCache {
    entries: Mutex<HashMap<String, CachedVerdict>>,
    ttl: Duration,
}

impl CritiqueCache {
    pub fn new() -> Self {
        Self::with_ttl(CRITIQUE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn get(&self, image_fp: &str) -> Option<CritiqueVerdict> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(image_fp) {
            Some(cached) if cached.stored_at.elapsed() < self.ttl => {
                Some(cached.verdict.clone())
            }
            Some(_) => {
                entries.remove(image_fp);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, image_fp: &str, verdict: CritiqueVerdict) {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() > 4096 {
            warn!("[CRITIC] Cache over 4096 entries, clearing expired");
            let ttl = self.ttl;
            entries.retain(|_, v| v.stored_at.elapsed() < ttl);
        }
        entries.insert(
            image_fp.to_string(),
            CachedVerdict {
                verdict,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CritiqueCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable_and_separated() {
        let a = fingerprint(&["prompt", "42"]);
        let b = fingerprint(&["prompt", "42"]);
        assert_eq!(a, b);
        // "prompt4" + "2" must not collide with "prompt" + "42"
        assert_ne!(fingerprint(&["prompt4", "2"]), a);
    }

    #[test]
    fn test_put_lookup_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(tmp.path(), "p1").unwrap();
        let fp = fingerprint(&["scene 1", "seed 42"]);
        let path = store
            .put(ArtifactKind::Image, "scene_01", &fp, b"png-bytes")
            .unwrap();
        assert!(path.exists());
        assert_eq!(store.lookup(&fp), Some(path));
    }

    #[test]
    fn test_reindex_from_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let fp = fingerprint(&["x"]);
        {
            let store = ArtifactStore::open(tmp.path(), "p1").unwrap();
            store.put(ArtifactKind::Clip, "scene_02", &fp, b"clip").unwrap();
        }
        // A fresh store over the same directory finds the artifact again.
        let store = ArtifactStore::open(tmp.path(), "p1").unwrap();
        assert!(store.lookup(&fp).is_some());
    }

    #[test]
    fn test_purge_keeps_output() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(tmp.path(), "p1").unwrap();
        let fp1 = fingerprint(&["a"]);
        let fp2 = fingerprint(&["b"]);
        store.put(ArtifactKind::Image, "scene_01", &fp1, b"i").unwrap();
        let final_path = store.put(ArtifactKind::Final, "final", &fp2, b"f").unwrap();
        let removed = store.purge_intermediates().unwrap();
        assert_eq!(removed, 1);
        assert!(final_path.exists());
    }

    #[test]
    fn test_critique_cache_hit_and_ttl() {
        let cache = CritiqueCache::with_ttl(Duration::from_millis(20));
        let verdict = CritiqueVerdict {
            score: 8,
            rationale: "sharp, on-brief".into(),
            accept: true,
        };
        cache.put("fp1", verdict.clone());
        assert_eq!(cache.get("fp1"), Some(verdict));
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.get("fp1"), None, "expired entries must miss");
    }
}
