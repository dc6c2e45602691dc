//! Cache snapshot persistence
//!
//! A snapshot lets a restarted service answer from the last known cache
//! before the first full rebuild finishes. It is never authoritative: any
//! problem reading it means a cold start.
//!
//! # Format
//!
//! ```text
//! {"format":"sos-cache-snapshot","format_version":1,"checksum":"<sha256 hex>","saved_at":"...","payload_len":N}\n
//! <ContentCache as JSON, N bytes>
//! ```
//!
//! The header is read first, so an unknown format or version is rejected
//! without touching the payload. The checksum covers the payload bytes.
//!
//! # Example
//!
//! ```rust,no_run
//! use sos_cache::snapshot::{FileSnapshotStore, SnapshotStore};
//! use sos_cache::ContentCache;
//!
//! let store = FileSnapshotStore::new("/var/lib/sos/cache.snapshot");
//! store.save(&ContentCache::default()).unwrap();
//! let restored = store.load().unwrap();
//! assert!(restored.is_some());
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::cache::ContentCache;
use crate::error::{CacheError, Result};

/// Format tag written into every snapshot header
pub const SNAPSHOT_FORMAT: &str = "sos-cache-snapshot";

/// Current snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

/// First line of a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub format: String,
    pub format_version: u32,
    /// SHA-256 of the payload, hex encoded
    pub checksum: String,
    pub saved_at: DateTime<Utc>,
    pub payload_len: usize,
}

/// Serialize a cache into snapshot bytes
pub fn encode(cache: &ContentCache) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(cache)?;
    let header = SnapshotHeader {
        format: SNAPSHOT_FORMAT.to_string(),
        format_version: SNAPSHOT_VERSION,
        checksum: checksum(&payload),
        saved_at: Utc::now(),
        payload_len: payload.len(),
    };
    let mut bytes = serde_json::to_vec(&header)?;
    bytes.push(b'\n');
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

/// Parse and verify snapshot bytes
pub fn decode(bytes: &[u8]) -> Result<(SnapshotHeader, ContentCache)> {
    let split = bytes
        .iter()
        .position(|b| *b == b'\n')
        .ok_or_else(|| CacheError::SnapshotCorrupt {
            reason: "missing header line".to_string(),
        })?;
    let header: SnapshotHeader =
        serde_json::from_slice(&bytes[..split]).map_err(|e| CacheError::SnapshotCorrupt {
            reason: format!("unreadable header: {}", e),
        })?;

    if header.format != SNAPSHOT_FORMAT || header.format_version != SNAPSHOT_VERSION {
        return Err(CacheError::SnapshotVersionMismatch {
            format: header.format,
            found: header.format_version,
            expected: SNAPSHOT_VERSION,
        });
    }

    let payload = &bytes[split + 1..];
    if payload.len() != header.payload_len {
        return Err(CacheError::SnapshotCorrupt {
            reason: format!("payload is {} bytes, header says {}", payload.len(), header.payload_len),
        });
    }
    if checksum(payload) != header.checksum {
        return Err(CacheError::SnapshotCorrupt {
            reason: "checksum mismatch".to_string(),
        });
    }

    let cache = serde_json::from_slice(payload).map_err(|e| CacheError::SnapshotCorrupt {
        reason: format!("unreadable payload: {}", e),
    })?;
    Ok((header, cache))
}

fn checksum(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// Where the controller keeps its snapshot
///
/// All methods take `&self`; implementations use interior mutability.
pub trait SnapshotStore: Send + Sync {
    /// Read the stored cache, `Ok(None)` if there is none
    fn load(&self) -> Result<Option<ContentCache>>;

    /// Replace the stored cache
    fn save(&self, cache: &ContentCache) -> Result<()>;

    /// Remove the stored cache; removing nothing is not an error
    fn discard(&self) -> Result<()>;

    /// Get store name (for logging/debugging)
    fn name(&self) -> &'static str;
}

/// Snapshot kept in a single file
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read header and cache, failing if the file does not exist
    pub fn read(&self) -> Result<(SnapshotHeader, ContentCache)> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CacheError::SnapshotMissing {
                    path: self.path.display().to_string(),
                })
            }
            Err(e) => {
                return Err(CacheError::IoError {
                    message: format!("Failed to read snapshot {}: {}", self.path.display(), e),
                })
            }
        };
        decode(&bytes)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".{}.tmp", uuid::Uuid::new_v4()));
        self.path.with_file_name(name)
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self) -> Result<Option<ContentCache>> {
        match self.read() {
            Ok((header, cache)) => {
                debug!(
                    path = %self.path.display(),
                    saved_at = %header.saved_at,
                    bytes = header.payload_len,
                    "Loaded cache snapshot"
                );
                Ok(Some(cache))
            }
            Err(CacheError::SnapshotMissing { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn save(&self, cache: &ContentCache) -> Result<()> {
        let bytes = encode(cache)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| CacheError::IoError {
                message: format!("Failed to create snapshot directory: {}", e),
            })?;
        }
        // rename is atomic on the same filesystem
        let temp = self.temp_path();
        let written = std::fs::write(&temp, &bytes)
            .map_err(|e| format!("Failed to write {}: {}", temp.display(), e))
            .and_then(|()| {
                std::fs::rename(&temp, &self.path)
                    .map_err(|e| format!("Failed to move snapshot into place: {}", e))
            });
        if let Err(message) = written {
            let _ = std::fs::remove_file(&temp);
            return Err(CacheError::IoError { message });
        }
        debug!(path = %self.path.display(), bytes = bytes.len(), "Saved cache snapshot");
        Ok(())
    }

    fn discard(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::IoError {
                message: format!("Failed to remove snapshot {}: {}", self.path.display(), e),
            }),
        }
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

/// Snapshot held in memory, encoded exactly like the file format
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    bytes: Mutex<Option<Vec<u8>>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw snapshot bytes, if any were saved
    pub fn bytes(&self) -> Option<Vec<u8>> {
        self.bytes.lock().clone()
    }

    /// Replace the stored bytes verbatim
    pub fn set_bytes(&self, bytes: Vec<u8>) {
        *self.bytes.lock() = Some(bytes);
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn load(&self) -> Result<Option<ContentCache>> {
        match self.bytes.lock().as_deref() {
            Some(bytes) => decode(bytes).map(|(_, cache)| Some(cache)),
            None => Ok(None),
        }
    }

    fn save(&self, cache: &ContentCache) -> Result<()> {
        let bytes = encode(cache)?;
        *self.bytes.lock() = Some(bytes);
        Ok(())
    }

    fn discard(&self) -> Result<()> {
        self.bytes.lock().take();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "in-memory"
    }
}

/// Store that keeps nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSnapshotStore;

impl SnapshotStore for NullSnapshotStore {
    fn load(&self) -> Result<Option<ContentCache>> {
        Ok(None)
    }

    fn save(&self, _cache: &ContentCache) -> Result<()> {
        Ok(())
    }

    fn discard(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "null"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ids;
    use crate::model::{Envelope, TimePeriod};
    use crate::update::fixtures::at;

    fn temp_store() -> FileSnapshotStore {
        let path = std::env::temp_dir()
            .join(format!("sos-cache-test-{}", uuid::Uuid::new_v4()))
            .join("cache.snapshot");
        FileSnapshotStore::new(path)
    }

    fn populated() -> ContentCache {
        let mut cache = ContentCache::default();
        cache.add_procedure("P1");
        cache.add_procedure_for_offering("O1", "P1");
        cache.add_offering_for_procedure("P1", "O1");
        cache.add_feature_of_interest("F1");
        cache.add_feature_of_interest_for_offering("O1", "F1");
        cache.update_envelope_for_offering("O1", &Envelope::new(1.0, 2.0, 3.0, 4.0));
        cache.update_phenomenon_time_for_offering("O1", &TimePeriod::new(at(1), at(2)));
        cache.recalculate_global_envelope();
        cache.recalculate_phenomenon_time();
        cache
    }

    #[test]
    fn test_file_round_trip() {
        let store = temp_store();
        for cache in [ContentCache::default(), populated()] {
            store.save(&cache).unwrap();
            let loaded = store.load().unwrap().unwrap();
            assert_eq!(loaded, cache);
        }
        let dir = store.path().parent().unwrap();
        assert_eq!(std::fs::read_dir(dir).unwrap().count(), 1);
        store.discard().unwrap();
    }

    #[test]
    fn test_failed_rename_leaves_no_temp_file() {
        let store = temp_store();
        // a non-empty directory where the snapshot should go
        std::fs::create_dir_all(store.path().join("occupied")).unwrap();

        let err = store.save(&populated()).unwrap_err();
        assert_eq!(err.error_code(), "IO_ERROR");

        let dir = store.path().parent().unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .filter(|name| name.to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "leftover temp files: {:?}", leftovers);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_missing_file_is_none() {
        let store = temp_store();
        assert!(store.load().unwrap().is_none());
        let err = store.read().unwrap_err();
        assert_eq!(err.error_code(), "SNAPSHOT_MISSING");
        store.discard().unwrap();
    }

    #[test]
    fn test_discard_removes_file() {
        let store = temp_store();
        store.save(&populated()).unwrap();
        assert!(store.path().exists());
        store.discard().unwrap();
        assert!(!store.path().exists());
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let mut bytes = encode(&populated()).unwrap();
        let last = bytes.len() - 2;
        bytes[last] = if bytes[last] == b'1' { b'2' } else { b'1' };
        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err, CacheError::SnapshotCorrupt { .. }));
    }

    #[test]
    fn test_truncated_snapshot_is_rejected() {
        let bytes = encode(&populated()).unwrap();
        let err = decode(&bytes[..bytes.len() - 10]).unwrap_err();
        assert!(err.to_string().contains("header says"));
        assert!(decode(b"not a snapshot").is_err());
    }

    #[test]
    fn test_newer_version_is_rejected() {
        let bytes = encode(&ContentCache::default()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let newer = text.replacen("\"format_version\":1", "\"format_version\":2", 1);
        let err = decode(newer.as_bytes()).unwrap_err();
        match err {
            CacheError::SnapshotVersionMismatch { found, expected, .. } => {
                assert_eq!(found, 2);
                assert_eq!(expected, SNAPSHOT_VERSION);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_in_memory_store() {
        let store = InMemorySnapshotStore::new();
        assert!(store.load().unwrap().is_none());
        store.save(&populated()).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.offerings(), ids(&["O1"]));
        store.discard().unwrap();
        assert!(store.bytes().is_none());

        store.set_bytes(b"garbage\n{}".to_vec());
        assert!(store.load().is_err());
    }

    mod roundtrip {
        use chrono::TimeZone;
        use proptest::prelude::*;

        use super::*;

        fn coordinate() -> impl Strategy<Value = f64> {
            prop::num::f64::NORMAL | prop::num::f64::SUBNORMAL | prop::num::f64::ZERO
        }

        fn instant() -> impl Strategy<Value = DateTime<Utc>> {
            (-2_000_000_000i64..4_000_000_000i64, 0u32..1_000_000_000u32)
                .prop_map(|(secs, nanos)| Utc.timestamp_opt(secs, nanos).unwrap())
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(512))]

            /// Decoding yields bit-identical coordinates and instants
            #[test]
            fn prop_snapshot_preserves_envelopes_and_times(
                corners in (coordinate(), coordinate(), coordinate(), coordinate()),
                phenomenon in (instant(), instant()),
                result in instant(),
            ) {
                let (x1, y1, x2, y2) = corners;
                let mut cache = ContentCache::default();
                cache.add_procedure("P1");
                cache.add_procedure_for_offering("O1", "P1");
                cache.add_offering_for_procedure("P1", "O1");
                cache.update_envelope_for_offering("O1", &Envelope::new(x1, y1, x2, y2));
                cache.update_phenomenon_time_for_offering("O1", &TimePeriod::new(phenomenon.0, phenomenon.1));
                cache.update_result_time_for_offering("O1", &TimePeriod::instant(result));
                cache.recalculate_global_envelope();
                cache.recalculate_phenomenon_time();
                cache.recalculate_result_time();

                let (_, decoded) = decode(&encode(&cache).unwrap()).unwrap();
                let before = cache.envelope_for_offering("O1").unwrap().envelope;
                let after = decoded.envelope_for_offering("O1").unwrap().envelope;
                prop_assert_eq!(
                    [before.min_x, before.min_y, before.max_x, before.max_y].map(f64::to_bits),
                    [after.min_x, after.min_y, after.max_x, after.max_y].map(f64::to_bits)
                );
                prop_assert_eq!(decoded.global_envelope(), cache.global_envelope());
                prop_assert_eq!(decoded.phenomenon_time_for_offering("O1"), cache.phenomenon_time_for_offering("O1"));
                prop_assert_eq!(decoded.global_result_time(), cache.global_result_time());
                prop_assert_eq!(decoded, cache);
            }
        }
    }
}
