//! Append-only backup store.
//!
//! A backup is a JSON payload file under the backups directory plus an
//! entry in the state store index. Publishing writes the payload to a
//! temp file in the same directory, fsyncs it, renames it into place
//! without overwriting, and only then registers it. A backup that is not
//! in the index does not exist to readers.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use rollguard_core::{Backup, BackupContents, epoch_millis, is_valid_backup_name};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{StateError, StateResult};
use crate::store::StateStore;

/// Metadata key holding the payload's SHA-256.
pub const CHECKSUM_KEY: &str = "sha256";

/// Metadata key recording why a backup was taken.
pub const PURPOSE_KEY: &str = "purpose";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupPurpose {
    /// Operator-requested; also any backup without a purpose.
    Manual,
    /// Taken just before a rollout touched the cluster.
    PreDeploy,
    /// Safety copy taken before a rollback wrote anything.
    PreRollback,
}

impl BackupPurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::PreDeploy => "pre-deploy",
            Self::PreRollback => "pre-rollback",
        }
    }

    pub fn of(backup: &Backup) -> Self {
        match backup.metadata.get(PURPOSE_KEY).map(String::as_str) {
            Some("pre-deploy") => Self::PreDeploy,
            Some("pre-rollback") => Self::PreRollback,
            _ => Self::Manual,
        }
    }

    /// Metadata carrying this purpose, ready for [`BackupStore::create`].
    pub fn metadata(self) -> BTreeMap<String, String> {
        BTreeMap::from([(PURPOSE_KEY.to_string(), self.as_str().to_string())])
    }
}

#[derive(Clone)]
pub struct BackupStore {
    dir: PathBuf,
    state: StateStore,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StateError + '_ {
    move |source| StateError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// A fresh, time-ordered backup name: `{prefix}-{uuid}`.
pub fn generate_name(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::now_v7().simple())
}

impl BackupStore {
    pub fn new(dir: impl Into<PathBuf>, state: StateStore) -> Self {
        Self {
            dir: dir.into(),
            state,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the backups directory and confirm it accepts writes.
    pub fn check_writable(&self) -> StateResult<()> {
        std::fs::create_dir_all(&self.dir).map_err(io_err(&self.dir))?;
        let probe = tempfile::NamedTempFile::new_in(&self.dir).map_err(io_err(&self.dir))?;
        drop(probe);
        Ok(())
    }

    /// Publish a new backup under `name`.
    ///
    /// `metadata` is merged with the generated keys (`sha256`,
    /// `namespace`, `components`, `database_version`).
    pub fn create(
        &self,
        name: &str,
        contents: &BackupContents,
        metadata: BTreeMap<String, String>,
    ) -> StateResult<Backup> {
        if !is_valid_backup_name(name) {
            return Err(StateError::InvalidBackupName(name.to_string()));
        }
        if self.state.get_backup(name)?.is_some() {
            return Err(StateError::BackupExists(name.to_string()));
        }

        let payload = serde_json::to_vec_pretty(contents)
            .map_err(|e| StateError::Serialize(e.to_string()))?;
        let checksum = hex::encode(Sha256::digest(&payload));

        std::fs::create_dir_all(&self.dir).map_err(io_err(&self.dir))?;
        let path = self.dir.join(format!("{name}.json"));

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir).map_err(io_err(&self.dir))?;
        tmp.write_all(&payload).map_err(io_err(tmp.path()))?;
        tmp.as_file().sync_all().map_err(io_err(&path))?;
        tmp.persist_noclobber(&path).map_err(|e| {
            if e.error.kind() == std::io::ErrorKind::AlreadyExists {
                StateError::BackupExists(name.to_string())
            } else {
                StateError::Io {
                    path: path.clone(),
                    source: e.error,
                }
            }
        })?;
        debug!(backup = %name, path = %path.display(), "backup payload published");

        let mut metadata = metadata;
        metadata.insert(CHECKSUM_KEY.to_string(), checksum);
        metadata.insert("namespace".to_string(), contents.namespace.clone());
        let components: Vec<&str> = contents.objects.keys().map(|c| c.as_str()).collect();
        metadata.insert("components".to_string(), components.join(","));
        if let Some(version) = contents.database_version {
            metadata.insert("database_version".to_string(), version.to_string());
        }

        let backup = Backup {
            id: name.to_string(),
            path,
            created_at: epoch_millis(),
            metadata,
        };
        if let Err(e) = self.state.insert_backup(&backup) {
            // Lost a race for the name; leave the winner's payload alone.
            if !matches!(e, StateError::BackupExists(_)) {
                let _ = std::fs::remove_file(&backup.path);
            }
            return Err(e);
        }
        info!(backup = %name, objects = contents.objects.values().map(Vec::len).sum::<usize>(), "backup created");
        Ok(backup)
    }

    pub fn get(&self, name: &str) -> StateResult<Backup> {
        self.state
            .get_backup(name)?
            .ok_or_else(|| StateError::NotFound(format!("backup {name}")))
    }

    pub fn exists(&self, name: &str) -> StateResult<bool> {
        Ok(self.state.get_backup(name)?.is_some())
    }

    /// Read a backup's payload, verifying its checksum.
    pub fn load(&self, name: &str) -> StateResult<(Backup, BackupContents)> {
        let backup = self.get(name)?;
        let payload = std::fs::read(&backup.path).map_err(io_err(&backup.path))?;
        if let Some(expected) = backup.metadata.get(CHECKSUM_KEY) {
            let actual = hex::encode(Sha256::digest(&payload));
            if &actual != expected {
                return Err(StateError::Checksum {
                    name: name.to_string(),
                });
            }
        }
        let contents: BackupContents = serde_json::from_slice(&payload)
            .map_err(|e| StateError::Deserialize(e.to_string()))?;
        Ok((backup, contents))
    }

    /// All backups, newest first.
    pub fn list(&self) -> StateResult<Vec<Backup>> {
        self.state.list_backups()
    }

    /// The state `previous` returns to: the newest pre-deploy backup, or
    /// failing that the newest backup that is not a rollback's safety copy.
    pub fn baseline(&self) -> StateResult<Option<Backup>> {
        let backups = self.list()?;
        let pre_deploy = backups
            .iter()
            .find(|b| BackupPurpose::of(b) == BackupPurpose::PreDeploy);
        let fallback = || {
            backups
                .iter()
                .find(|b| BackupPurpose::of(b) != BackupPurpose::PreRollback)
        };
        Ok(pre_deploy.or_else(fallback).cloned())
    }
}
