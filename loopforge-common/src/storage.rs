//! Storage layer
//!
//! Deterministic on-disk layout for everything LoopForge produces, keyed by
//! session id:
//!
//! ```text
//! storage/
//! ├── uploads/{session_id}/        original uploaded files
//! ├── stems/{session_id}/          separated stems ({role}.wav)
//! ├── slices/{session_id}/{bank}/  exported slices (slice_0000.wav)
//! ├── exports/{session_id}/        final exports
//! └── cache/{hh}/                  temp files, sharded by key prefix
//! ```

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{Error, Result};

const BUCKETS: &[&str] = &["uploads", "stems", "slices", "exports", "cache"];

/// Audio extensions probed when looking up a session's original upload.
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "m4a", "ogg", "aiff"];

/// File metadata returned by [`Storage::file_info`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct FileInfo {
    pub path: String,
    pub size: u64,
    pub modified: Option<chrono::DateTime<chrono::Utc>>,
}

/// Content-addressed file storage rooted at a single directory.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    /// Open (and create) the storage tree at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for bucket in BUCKETS {
            fs::create_dir_all(root.join(bucket))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Save an uploaded file, streaming it to disk in chunks while hashing.
    ///
    /// Returns the destination path and the SHA-256 of the content.
    pub fn save_upload(
        &self,
        session_id: Uuid,
        filename: &str,
        mut reader: impl Read,
    ) -> Result<(PathBuf, String)> {
        let session_dir = self.root.join("uploads").join(session_id.to_string());
        fs::create_dir_all(&session_dir)?;

        let safe_filename = sanitize_filename(filename);
        let file_path = session_dir.join(safe_filename);

        let mut hasher = Sha256::new();
        let mut file = fs::File::create(&file_path)?;
        let mut buf = [0u8; 8192];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            file.write_all(&buf[..n])?;
        }
        file.flush()?;

        let content_hash = format!("{:x}", hasher.finalize());
        Ok((file_path, content_hash))
    }

    /// Save a separated stem as `stems/{session}/{role}.wav`.
    ///
    /// Moves when possible, falls back to a copy for cross-device sources.
    pub fn save_stem(&self, session_id: Uuid, stem_name: &str, source: &Path) -> Result<PathBuf> {
        if !source.exists() {
            return Err(Error::NotFound(format!(
                "stem source missing: {}",
                source.display()
            )));
        }

        let session_dir = self.root.join("stems").join(session_id.to_string());
        fs::create_dir_all(&session_dir)?;

        let dest = session_dir.join(format!("{}.wav", sanitize_filename(stem_name)));
        if source == dest {
            return Ok(dest);
        }
        if fs::rename(source, &dest).is_err() {
            fs::copy(source, &dest)?;
        }
        Ok(dest)
    }

    /// Save an exported slice as `slices/{session}/{bank}/slice_{index:04}.wav`.
    ///
    /// Always copies; the source may be shared with other exports.
    pub fn save_slice(
        &self,
        session_id: Uuid,
        slice_bank_id: Uuid,
        slice_index: usize,
        source: &Path,
    ) -> Result<PathBuf> {
        if !source.exists() {
            return Err(Error::NotFound(format!(
                "slice source missing: {}",
                source.display()
            )));
        }

        let bank_dir = self
            .root
            .join("slices")
            .join(session_id.to_string())
            .join(slice_bank_id.to_string());
        fs::create_dir_all(&bank_dir)?;

        let dest = bank_dir.join(format!("slice_{:04}.wav", slice_index));
        fs::copy(source, &dest)?;
        Ok(dest)
    }

    /// Save a final export under `exports/{session}/`.
    pub fn save_export(&self, session_id: Uuid, filename: &str, source: &Path) -> Result<PathBuf> {
        let session_dir = self.root.join("exports").join(session_id.to_string());
        fs::create_dir_all(&session_dir)?;

        let dest = session_dir.join(sanitize_filename(filename));
        fs::copy(source, &dest)?;
        Ok(dest)
    }

    /// Cache slot for a key, sharded by the first two characters.
    pub fn cache_path(&self, cache_key: &str, extension: &str) -> Result<PathBuf> {
        let key = sanitize_filename(cache_key);
        let shard = &key[..key.len().min(2)];
        let cache_dir = self.root.join("cache").join(shard);
        fs::create_dir_all(&cache_dir)?;
        Ok(cache_dir.join(format!("{}{}", key, extension)))
    }

    /// All stems for a session as a stem-name → path map.
    pub fn stems(&self, session_id: Uuid) -> Vec<(String, PathBuf)> {
        let stem_dir = self.root.join("stems").join(session_id.to_string());
        let mut stems = Vec::new();
        let Ok(entries) = fs::read_dir(&stem_dir) else {
            return stems;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "wav") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    stems.push((stem.to_string(), path.clone()));
                }
            }
        }
        stems.sort();
        stems
    }

    /// The original upload for a session, if any audio file is present.
    pub fn upload(&self, session_id: Uuid) -> Option<PathBuf> {
        let upload_dir = self.root.join("uploads").join(session_id.to_string());
        let entries = fs::read_dir(&upload_dir).ok()?;
        let mut candidates: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|ext| AUDIO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            })
            .collect();
        candidates.sort();
        candidates.into_iter().next()
    }

    /// Size/mtime metadata for a stored file.
    pub fn file_info(&self, path: &Path) -> Result<FileInfo> {
        let meta = fs::metadata(path)
            .map_err(|_| Error::NotFound(format!("file missing: {}", path.display())))?;
        let modified = meta.modified().ok().map(chrono::DateTime::from);
        Ok(FileInfo {
            path: path.display().to_string(),
            size: meta.len(),
            modified,
        })
    }

    /// Delete every file belonging to a session. Idempotent.
    pub fn delete_session(&self, session_id: Uuid) -> Result<()> {
        for bucket in &["uploads", "stems", "slices", "exports"] {
            let session_dir = self.root.join(bucket).join(session_id.to_string());
            if session_dir.exists() {
                fs::remove_dir_all(&session_dir)?;
            }
        }
        Ok(())
    }

    /// Remove cache entries older than `max_age`.
    pub fn cleanup_cache(&self, max_age: Duration) -> Result<usize> {
        let cache_dir = self.root.join("cache");
        let cutoff = SystemTime::now() - max_age;
        let mut removed = 0;

        let Ok(shards) = fs::read_dir(&cache_dir) else {
            return Ok(0);
        };
        for shard in shards.flatten() {
            if !shard.path().is_dir() {
                continue;
            }
            for entry in fs::read_dir(shard.path())?.flatten() {
                let path = entry.path();
                let Ok(meta) = entry.metadata() else { continue };
                if meta.modified().map(|m| m < cutoff).unwrap_or(false) {
                    if path.is_dir() {
                        fs::remove_dir_all(&path)?;
                    } else {
                        fs::remove_file(&path)?;
                    }
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

/// Remove potentially dangerous characters from a filename.
///
/// Total: never fails. Keeps `[A-Za-z0-9._-]`, escapes a leading dot, and maps
/// an empty result to `unnamed`.
pub fn sanitize_filename(filename: &str) -> String {
    let mut result: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if result.starts_with('.') {
        result.replace_range(..1, "_");
    }
    if result.is_empty() {
        result = "unnamed".to_string();
    }
    result
}

/// Compute the SHA-256 of a file on disk.
pub fn compute_hash(path: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut file = fs::File::open(path)?;
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn storage() -> (tempfile::TempDir, Storage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().join("storage")).unwrap();
        (dir, storage)
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("my track.mp3"), "my_track.mp3");
        assert_eq!(sanitize_filename("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_filename(".hidden"), "_hidden");
        assert_eq!(sanitize_filename(""), "unnamed");
        assert_eq!(sanitize_filename("ok-name_1.wav"), "ok-name_1.wav");
    }

    #[test]
    fn test_save_upload_streams_and_hashes() {
        let (_dir, storage) = storage();
        let session_id = Uuid::new_v4();
        let content = b"loopforge test payload";

        let (path, hash) = storage
            .save_upload(session_id, "track one.wav", Cursor::new(content))
            .unwrap();

        assert!(path.ends_with("track_one.wav"));
        assert_eq!(fs::read(&path).unwrap(), content);
        // Hash must match an independent pass over the written file
        assert_eq!(hash, compute_hash(&path).unwrap());
        assert_eq!(hash.len(), 64);
    }

    #[test]
    fn test_save_stem_moves_then_lists() {
        let (dir, storage) = storage();
        let session_id = Uuid::new_v4();
        let src = dir.path().join("drums_tmp.wav");
        fs::write(&src, b"pcm").unwrap();

        let dest = storage.save_stem(session_id, "drums", &src).unwrap();
        assert!(dest.ends_with("drums.wav"));
        assert!(!src.exists());

        let stems = storage.stems(session_id);
        assert_eq!(stems.len(), 1);
        assert_eq!(stems[0].0, "drums");
    }

    #[test]
    fn test_save_stem_missing_source_is_not_found() {
        let (dir, storage) = storage();
        let err = storage
            .save_stem(Uuid::new_v4(), "bass", &dir.path().join("nope.wav"))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_cache_path_sharding() {
        let (_dir, storage) = storage();
        let path = storage.cache_path("abcdef123456", ".wav").unwrap();
        assert!(path.to_string_lossy().contains("/cache/ab/"));
        assert!(path.ends_with("abcdef123456.wav"));
    }

    #[test]
    fn test_delete_session_is_idempotent() {
        let (_dir, storage) = storage();
        let session_id = Uuid::new_v4();
        storage
            .save_upload(session_id, "a.wav", Cursor::new(b"x".as_slice()))
            .unwrap();

        storage.delete_session(session_id).unwrap();
        assert!(storage.upload(session_id).is_none());
        // Second delete is a no-op
        storage.delete_session(session_id).unwrap();
    }

    #[test]
    fn test_upload_lookup_prefers_audio_extensions() {
        let (_dir, storage) = storage();
        let session_id = Uuid::new_v4();
        storage
            .save_upload(session_id, "notes.txt", Cursor::new(b"n".as_slice()))
            .unwrap();
        storage
            .save_upload(session_id, "take.flac", Cursor::new(b"f".as_slice()))
            .unwrap();

        let found = storage.upload(session_id).unwrap();
        assert!(found.ends_with("take.flac"));
    }
}
