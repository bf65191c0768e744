//! Checkpoints of the published index for later evaluation.
//!
//! A checkpoint is keyed by `(trial, iteration)` and holds the committed
//! projection, the current projection, the database codes and the cost
//! counters at that point. Entries are write-once.
//!
//! # File Layout
//!
//! ```text
//! <root>/
//! ├── trial00/
//! │   ├── iter000003.ckpt
//! │   └── iter000007.ckpt
//! └── trial01/
//!     └── ...
//! ```
//!
//! Each file is `CHECKPOINT_MAGIC` (4B), `FORMAT_VERSION` (u32 LE), then a
//! postcard-encoded [`Checkpoint`]. Files are written to a uniquely named
//! temporary file, synced, then linked into place without replacing an
//! existing entry, so a reader never sees a torn checkpoint.
//!
//! When `feature = "persistence"` is disabled, [`FileCheckpointStore`] exists
//! but construction returns `PersistenceError::NotSupported`.

use crate::error::{OnlineError, Result};
use crate::index::PublishedIndex;
use crate::matrix::Matrix;
use crate::projection::Projection;
use crate::stats::CostStats;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

/// Magic bytes for checkpoint files.
pub const CHECKPOINT_MAGIC: [u8; 4] = *b"OHCK";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Errors that can occur during checkpoint persistence.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// I/O error (file operations, disk I/O)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Format error (invalid magic bytes, version mismatch)
    #[error("format error: {0}")]
    Format(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Checkpoint key already written
    #[error("checkpoint for trial {trial} iteration {iteration} already exists")]
    AlreadyExists { trial: usize, iteration: usize },

    /// Operation not supported
    #[error("operation not supported: {0}")]
    NotSupported(String),
}

/// Result type for persistence operations.
pub type PersistenceResult<T> = std::result::Result<T, PersistenceError>;

/// Snapshot of a run at one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub trial: usize,
    pub iteration: usize,
    /// Learner's projection at this iteration (may be ahead of the index).
    pub current: Projection,
    /// Published codes with the projection they were computed from.
    pub index: PublishedIndex,
    /// Costs accumulated up to and including this iteration.
    pub stats: CostStats,
}

impl Checkpoint {
    pub fn committed(&self) -> &Projection {
        self.index.committed()
    }

    /// Whether the stored codes equal `sign(features · committed)`.
    pub fn is_consistent_with(&self, features: &Matrix) -> Result<bool> {
        self.index.is_consistent_with(features)
    }

    /// Check that the current and committed projections share one shape.
    pub fn validate(&self) -> Result<()> {
        let committed = self.committed();
        if self.current.dim() != committed.dim() {
            return Err(OnlineError::DimensionMismatch {
                expected: committed.dim(),
                actual: self.current.dim(),
            });
        }
        if self.current.bits() != committed.bits() {
            return Err(OnlineError::DimensionMismatch {
                expected: committed.bits(),
                actual: self.current.bits(),
            });
        }
        Ok(())
    }
}

/// Write-once storage for checkpoints.
pub trait CheckpointStore: Send + Sync {
    /// Persist a checkpoint. Returns only once the write is durable.
    fn write(&self, checkpoint: &Checkpoint) -> PersistenceResult<()>;

    /// Read a checkpoint back, `None` if it was never written.
    fn read(&self, trial: usize, iteration: usize) -> PersistenceResult<Option<Checkpoint>>;

    fn contains(&self, trial: usize, iteration: usize) -> bool;
}

/// In-process checkpoint store.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    entries: Mutex<BTreeMap<(usize, usize), Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Stored keys in `(trial, iteration)` order.
    pub fn keys(&self) -> Vec<(usize, usize)> {
        self.entries.lock().keys().copied().collect()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn write(&self, checkpoint: &Checkpoint) -> PersistenceResult<()> {
        let key = (checkpoint.trial, checkpoint.iteration);
        let mut entries = self.entries.lock();
        if entries.contains_key(&key) {
            return Err(PersistenceError::AlreadyExists {
                trial: key.0,
                iteration: key.1,
            });
        }
        entries.insert(key, checkpoint.clone());
        Ok(())
    }

    fn read(&self, trial: usize, iteration: usize) -> PersistenceResult<Option<Checkpoint>> {
        Ok(self.entries.lock().get(&(trial, iteration)).cloned())
    }

    fn contains(&self, trial: usize, iteration: usize) -> bool {
        self.entries.lock().contains_key(&(trial, iteration))
    }
}

/// One file per checkpoint under a root directory.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    /// Relative path of a checkpoint file.
    pub fn relative_path(trial: usize, iteration: usize) -> PathBuf {
        PathBuf::from(format!("trial{trial:02}")).join(format!("iter{iteration:06}.ckpt"))
    }

    pub fn path_for(&self, trial: usize, iteration: usize) -> PathBuf {
        self.root.join(Self::relative_path(trial, iteration))
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }
}

#[cfg(not(feature = "persistence"))]
impl FileCheckpointStore {
    pub fn new(_root: impl Into<PathBuf>) -> PersistenceResult<Self> {
        Err(disabled())
    }
}

#[cfg(not(feature = "persistence"))]
fn disabled() -> PersistenceError {
    PersistenceError::NotSupported("persistence feature disabled".to_string())
}

#[cfg(not(feature = "persistence"))]
impl CheckpointStore for FileCheckpointStore {
    fn write(&self, _checkpoint: &Checkpoint) -> PersistenceResult<()> {
        Err(disabled())
    }

    fn read(&self, _trial: usize, _iteration: usize) -> PersistenceResult<Option<Checkpoint>> {
        Err(disabled())
    }

    fn contains(&self, _trial: usize, _iteration: usize) -> bool {
        false
    }
}

#[cfg(feature = "persistence")]
mod enabled {
    use super::*;
    use std::fs;
    use std::io::{ErrorKind, Write};
    use std::path::Path;

    impl From<postcard::Error> for PersistenceError {
        fn from(e: postcard::Error) -> Self {
            Self::Serialization(format!("postcard error: {e}"))
        }
    }

    impl FileCheckpointStore {
        /// Open (creating if needed) a checkpoint directory.
        pub fn new(root: impl Into<PathBuf>) -> PersistenceResult<Self> {
            let root = root.into();
            fs::create_dir_all(&root)?;
            Ok(Self { root })
        }
    }

    pub(super) fn encode(checkpoint: &Checkpoint) -> PersistenceResult<Vec<u8>> {
        let body = postcard::to_allocvec(checkpoint)?;
        let mut bytes = Vec::with_capacity(8 + body.len());
        bytes.extend_from_slice(&CHECKPOINT_MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    pub(super) fn decode(bytes: &[u8]) -> PersistenceResult<Checkpoint> {
        if bytes.len() < 8 {
            return Err(PersistenceError::Format(format!(
                "checkpoint too short: {} bytes",
                bytes.len()
            )));
        }
        if bytes[..4] != CHECKPOINT_MAGIC {
            return Err(PersistenceError::Format("bad checkpoint magic".into()));
        }
        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if version != FORMAT_VERSION {
            return Err(PersistenceError::Format(format!(
                "unsupported checkpoint version {version} (expected {FORMAT_VERSION})"
            )));
        }
        let checkpoint: Checkpoint = postcard::from_bytes(&bytes[8..])
            .map_err(|e| PersistenceError::Deserialization(e.to_string()))?;
        checkpoint
            .validate()
            .map_err(|e| PersistenceError::Deserialization(e.to_string()))?;
        Ok(checkpoint)
    }

    /// Atomically create `path` holding `bytes`, failing if it already exists.
    ///
    /// The bytes go to a uniquely named sibling first; the temporary is
    /// removed on every error path.
    pub(super) fn write_new(
        path: &Path,
        bytes: &[u8],
        trial: usize,
        iteration: usize,
    ) -> PersistenceResult<()> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".iter")
            .suffix(".ckpt.tmp")
            .tempfile_in(parent)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist_noclobber(path).map_err(|e| {
            if e.error.kind() == ErrorKind::AlreadyExists {
                PersistenceError::AlreadyExists { trial, iteration }
            } else {
                PersistenceError::Io(e.error)
            }
        })?;
        Ok(())
    }

    impl CheckpointStore for FileCheckpointStore {
        fn write(&self, checkpoint: &Checkpoint) -> PersistenceResult<()> {
            let path = self.path_for(checkpoint.trial, checkpoint.iteration);
            if path.exists() {
                return Err(PersistenceError::AlreadyExists {
                    trial: checkpoint.trial,
                    iteration: checkpoint.iteration,
                });
            }
            let bytes = encode(checkpoint)?;
            write_new(&path, &bytes, checkpoint.trial, checkpoint.iteration)
        }

        fn read(&self, trial: usize, iteration: usize) -> PersistenceResult<Option<Checkpoint>> {
            match fs::read(self.path_for(trial, iteration)) {
                Ok(bytes) => decode(&bytes).map(Some),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(PersistenceError::Io(e)),
            }
        }

        fn contains(&self, trial: usize, iteration: usize) -> bool {
            self.path_for(trial, iteration).exists()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint(trial: usize, iteration: usize) -> Checkpoint {
        let features = Matrix::from_rows(vec![vec![1.0, -1.0], vec![0.5, 2.0]]).unwrap();
        let w = Projection::gaussian(2, 3, 1).unwrap();
        Checkpoint {
            trial,
            iteration,
            current: Projection::gaussian(2, 3, 2).unwrap(),
            index: PublishedIndex::build(&features, w).unwrap(),
            stats: CostStats::new(vec![iteration]),
        }
    }

    #[test]
    fn test_memory_store_write_once() {
        let store = MemoryCheckpointStore::new();
        store.write(&checkpoint(0, 3)).unwrap();
        assert!(store.contains(0, 3));
        assert!(matches!(
            store.write(&checkpoint(0, 3)),
            Err(PersistenceError::AlreadyExists {
                trial: 0,
                iteration: 3
            })
        ));
        assert_eq!(store.read(0, 3).unwrap(), Some(checkpoint(0, 3)));
        assert_eq!(store.read(1, 3).unwrap(), None);
        assert_eq!(store.keys(), vec![(0, 3)]);
    }

    #[test]
    fn test_relative_path() {
        assert_eq!(
            FileCheckpointStore::relative_path(2, 35),
            PathBuf::from("trial02").join("iter000035.ckpt")
        );
    }

    #[cfg(feature = "persistence")]
    #[test]
    fn test_decode_rejects_bad_header() {
        let mut bytes = enabled::encode(&checkpoint(0, 1)).unwrap();
        assert_eq!(enabled::decode(&bytes).unwrap(), checkpoint(0, 1));
        bytes[0] = b'X';
        assert!(matches!(enabled::decode(&bytes), Err(PersistenceError::Format(_))));
        assert!(matches!(enabled::decode(&[1, 2]), Err(PersistenceError::Format(_))));
    }

    #[cfg(feature = "persistence")]
    #[test]
    fn test_decode_rejects_damaged_shape() {
        let mut bytes = enabled::encode(&checkpoint(0, 1)).unwrap();
        // header, trial, iteration, then the row count of `current`
        assert_eq!(bytes[10], 3);
        bytes[10] = 4;
        assert!(matches!(
            enabled::decode(&bytes),
            Err(PersistenceError::Deserialization(_))
        ));
    }

    #[cfg(feature = "persistence")]
    #[test]
    fn test_decode_rejects_mismatched_projections() {
        let mut ckpt = checkpoint(0, 1);
        ckpt.current = Projection::gaussian(2, 4, 2).unwrap();
        let bytes = enabled::encode(&ckpt).unwrap();
        assert!(matches!(
            enabled::decode(&bytes),
            Err(PersistenceError::Deserialization(_))
        ));
        assert!(checkpoint(0, 1).validate().is_ok());
    }

    #[cfg(feature = "persistence")]
    fn leftover_temps(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.to_string_lossy().ends_with(".tmp"))
            .collect()
    }

    #[cfg(feature = "persistence")]
    #[test]
    fn test_write_new_never_replaces() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("trial00").join("iter000001.ckpt");
        enabled::write_new(&path, b"first", 0, 1).unwrap();

        // skips the store's existence check, so only the final link refuses
        assert!(matches!(
            enabled::write_new(&path, b"second", 0, 1),
            Err(PersistenceError::AlreadyExists {
                trial: 0,
                iteration: 1
            })
        ));
        assert_eq!(std::fs::read(&path).unwrap(), b"first");
        assert!(leftover_temps(path.parent().unwrap()).is_empty());
    }

    #[cfg(feature = "persistence")]
    #[test]
    fn test_concurrent_writers_one_wins() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("trial00").join("iter000002.ckpt");
        let payloads: Vec<Vec<u8>> = (0..8u8).map(|i| vec![i; 64]).collect();

        let target = path.as_path();
        let results: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = payloads
                .iter()
                .map(|bytes| s.spawn(move || enabled::write_new(target, bytes, 0, 2)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, PersistenceError::AlreadyExists { .. })));
        let winner = results.iter().position(|r| r.is_ok()).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), payloads[winner]);
        assert!(leftover_temps(path.parent().unwrap()).is_empty());
    }

    #[cfg(feature = "persistence")]
    #[test]
    fn test_file_store_write_read() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();
        store.write(&checkpoint(1, 7)).unwrap();
        assert!(store.path_for(1, 7).exists());
        assert!(leftover_temps(&dir.path().join("trial01")).is_empty());
        assert_eq!(store.read(1, 7).unwrap(), Some(checkpoint(1, 7)));
        assert!(store.write(&checkpoint(1, 7)).is_err());
        assert_eq!(store.read(1, 8).unwrap(), None);
    }
}
