//! Per-generation persistence of the elite's parameters.
//!
//! Each completed generation stores exactly one [`Checkpoint`], keyed by its
//! generation index. Training can later resume from any stored generation.

use std::{
    fs::{self, File},
    io::{self, BufReader, BufWriter, Write as _},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use marbler_policy::tensor::ParameterSet;
use serde::{Deserialize, Serialize};

/// The winning parameters of one generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub generation: u32,
    pub saved_at: DateTime<Utc>,
    /// Fitness the elite reached in this generation.
    pub fitness: f32,
    pub parameters: ParameterSet,
}

impl Checkpoint {
    #[must_use]
    pub fn new(generation: u32, fitness: f32, parameters: ParameterSet) -> Self {
        Self {
            generation,
            saved_at: Utc::now(),
            fitness,
            parameters,
        }
    }
}

#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum CheckpointError {
    #[display("no checkpoint for generation {generation} at {}", path.display())]
    NotFound { generation: u32, path: PathBuf },
    #[display("I/O error on checkpoint {}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[display("failed to parse checkpoint {}", path.display())]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[display("failed to write checkpoint {}", path.display())]
    Encode {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[display("checkpoint {} holds generation {found}, expected {expected}", path.display())]
    GenerationMismatch {
        path: PathBuf,
        expected: u32,
        found: u32,
    },
}

impl CheckpointError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Storage of checkpoints keyed by generation.
pub trait CheckpointStore: Send + Sync {
    fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;

    /// Loads the checkpoint of `generation`, failing with
    /// [`CheckpointError::NotFound`] if none was saved.
    fn load(&self, generation: u32) -> Result<Checkpoint, CheckpointError>;

    fn exists(&self, generation: u32) -> bool;

    /// Highest stored generation, if any.
    fn latest(&self) -> Result<Option<u32>, CheckpointError>;
}

/// Stores each checkpoint as pretty-printed JSON in one directory.
#[derive(Debug, Clone)]
pub struct DirectoryCheckpointStore {
    dir: PathBuf,
}

const FILE_PREFIX: &str = "generation-";
const FILE_SUFFIX: &str = ".json";

impl DirectoryCheckpointStore {
    /// Opens (and creates if needed) a checkpoint directory.
    pub fn open<P>(dir: P) -> Result<Self, CheckpointError>
    where
        P: Into<PathBuf>,
    {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| CheckpointError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn path_for(&self, generation: u32) -> PathBuf {
        self.dir.join(format!("{FILE_PREFIX}{generation:05}{FILE_SUFFIX}"))
    }
}

fn parse_generation(file_name: &str) -> Option<u32> {
    file_name
        .strip_prefix(FILE_PREFIX)?
        .strip_suffix(FILE_SUFFIX)?
        .parse()
        .ok()
}

impl CheckpointStore for DirectoryCheckpointStore {
    fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let path = self.path_for(checkpoint.generation);
        let tmp_path = path.with_extension("json.tmp");
        let io_error = |source| CheckpointError::Io {
            path: tmp_path.clone(),
            source,
        };

        let file = File::create(&tmp_path).map_err(io_error)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, checkpoint).map_err(|source| {
            CheckpointError::Encode {
                path: tmp_path.clone(),
                source,
            }
        })?;
        writeln!(writer).map_err(io_error)?;
        writer
            .into_inner()
            .map_err(io::IntoInnerError::into_error)
            .and_then(|file| file.sync_all())
            .map_err(io_error)?;
        fs::rename(&tmp_path, &path).map_err(|source| CheckpointError::Io {
            path: path.clone(),
            source,
        })?;

        tracing::info!(
            generation = checkpoint.generation,
            fitness = checkpoint.fitness,
            path = %path.display(),
            "checkpoint saved"
        );
        Ok(())
    }

    fn load(&self, generation: u32) -> Result<Checkpoint, CheckpointError> {
        let path = self.path_for(generation);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CheckpointError::NotFound { generation, path });
            }
            Err(source) => return Err(CheckpointError::Io { path, source }),
        };
        let checkpoint: Checkpoint = serde_json::from_reader(BufReader::new(file))
            .map_err(|source| CheckpointError::Decode {
                path: path.clone(),
                source,
            })?;
        if checkpoint.generation != generation {
            return Err(CheckpointError::GenerationMismatch {
                path,
                expected: generation,
                found: checkpoint.generation,
            });
        }
        Ok(checkpoint)
    }

    fn exists(&self, generation: u32) -> bool {
        self.path_for(generation).is_file()
    }

    fn latest(&self) -> Result<Option<u32>, CheckpointError> {
        let io_error = |source| CheckpointError::Io {
            path: self.dir.clone(),
            source,
        };
        let mut latest = None;
        for entry in fs::read_dir(&self.dir).map_err(io_error)? {
            let entry = entry.map_err(io_error)?;
            if let Some(generation) = entry.file_name().to_str().and_then(parse_generation) {
                latest = latest.max(Some(generation));
            }
        }
        Ok(latest)
    }
}

#[cfg(test)]
mod tests {
    use marbler_policy::model::MlpSpec;
    use rand::SeedableRng as _;
    use rand_pcg::Pcg32;

    use super::*;

    fn checkpoint(generation: u32) -> Checkpoint {
        let params = MlpSpec::default().init(&mut Pcg32::seed_from_u64(generation.into()));
        Checkpoint::new(generation, 0.5, params)
    }

    #[test]
    fn test_save_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryCheckpointStore::open(dir.path()).unwrap();
        for generation in [0, 3, 12] {
            let saved = checkpoint(generation);
            store.save(&saved).unwrap();
            let loaded = store.load(generation).unwrap();
            assert_eq!(loaded, saved);
        }
    }

    #[test]
    fn test_missing_generation_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryCheckpointStore::open(dir.path()).unwrap();
        store.save(&checkpoint(1)).unwrap();
        assert!(store.exists(1));
        assert!(!store.exists(7));
        let err = store.load(7).unwrap_err();
        assert!(err.is_not_found(), "{err}");
    }

    #[test]
    fn test_save_overwrites_same_generation() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryCheckpointStore::open(dir.path()).unwrap();
        store.save(&checkpoint(2)).unwrap();
        let mut newer = checkpoint(2);
        newer.fitness = 0.9;
        store.save(&newer).unwrap();
        assert!((store.load(2).unwrap().fitness - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_latest_ignores_unrelated_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryCheckpointStore::open(dir.path().join("nested")).unwrap();
        assert_eq!(store.latest().unwrap(), None);

        store.save(&checkpoint(4)).unwrap();
        store.save(&checkpoint(11)).unwrap();
        fs::write(store.dir().join("notes.txt"), "x").unwrap();
        fs::write(store.dir().join("generation-abc.json"), "{}").unwrap();
        assert_eq!(store.latest().unwrap(), Some(11));
    }

    #[test]
    fn test_corrupt_checkpoint_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryCheckpointStore::open(dir.path()).unwrap();
        fs::write(store.path_for(5), "{ not json").unwrap();
        assert!(matches!(store.load(5), Err(CheckpointError::Decode { .. })));

        fs::write(
            store.path_for(6),
            r#"{"generation":6,"saved_at":"2025-01-01T00:00:00Z","fitness":0.5,
                "parameters":{"fc1.weight":{"shape":[4294967296,4294967296],"values":[]}}}"#,
        )
        .unwrap();
        assert!(matches!(store.load(6), Err(CheckpointError::Decode { .. })));
    }
}
