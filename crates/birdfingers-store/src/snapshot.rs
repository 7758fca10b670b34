use std::cmp::Reverse;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use birdfingers_core::{EnvironmentCapture, Error, PackageSet, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::fs_utils::remove_file_if_exists;
use crate::DataLayout;

const MAX_SAFE_NAME_LEN: usize = 60;
const MAX_ID_ATTEMPTS: usize = 1000;
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub comment: String,
    pub created_utc: String,
    pub count: usize,
    /// File name of the paired pin-text payload.
    pub requirements: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub python: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSnapshot {
    pub meta: SnapshotMeta,
    pub payload_path: PathBuf,
    pub payload: String,
}

impl StoredSnapshot {
    pub fn package_set(&self) -> PackageSet {
        PackageSet::parse(&self.payload)
    }
}

/// Snapshots persisted as `<id>.txt` (pin text) plus `<id>.json` (metadata).
///
/// A metadata record only counts when its payload exists next to it.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    layout: DataLayout,
}

impl SnapshotStore {
    pub fn new(layout: DataLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    pub fn save(
        &self,
        capture: &dyn EnvironmentCapture,
        name: &str,
        comment: &str,
    ) -> Result<SnapshotMeta> {
        let payload = capture.freeze()?;
        self.save_payload(name, comment, &payload, capture.interpreter(), Utc::now())
    }

    pub fn save_payload(
        &self,
        name: &str,
        comment: &str,
        payload: &str,
        python: Option<String>,
        created: DateTime<Utc>,
    ) -> Result<SnapshotMeta> {
        self.layout.ensure_base_dirs()?;

        let created_utc = created.format(TIMESTAMP_FORMAT).to_string();
        let base = format!("{}_{}", safe_snapshot_name(name), created_utc);
        let (id, payload_path) = self.claim_payload(&base, payload)?;

        let meta = SnapshotMeta {
            id: id.clone(),
            name: name.to_string(),
            comment: comment.to_string(),
            created_utc,
            count: PackageSet::parse(payload).len(),
            requirements: format!("{id}.txt"),
            python,
        };

        let meta_path = self.layout.snapshot_meta_path(&id);
        let content = serde_json::to_string_pretty(&meta).map_err(|err| Error::Payload {
            path: meta_path.clone(),
            reason: err.to_string(),
        })?;
        if let Err(err) = fs::write(&meta_path, content) {
            if let Err(cleanup) = remove_file_if_exists(&payload_path) {
                tracing::warn!(
                    path = %payload_path.display(),
                    "failed to remove orphaned snapshot payload: {cleanup}"
                );
            }
            return Err(Error::storage(meta_path, err));
        }

        tracing::info!(id = %meta.id, count = meta.count, "saved snapshot");
        Ok(meta)
    }

    /// Creates the payload file under the first free id, starting at `base`.
    fn claim_payload(&self, base: &str, payload: &str) -> Result<(String, PathBuf)> {
        let digest = payload_digest(payload);
        for attempt in 0..MAX_ID_ATTEMPTS {
            let id = match attempt {
                0 => base.to_string(),
                1 => format!("{base}_{digest}"),
                n => format!("{base}_{digest}-{n}"),
            };
            if self.layout.snapshot_meta_path(&id).exists() {
                continue;
            }

            let path = self.layout.snapshot_payload_path(&id);
            let mut file = match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(file) => file,
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(Error::storage(path, err)),
            };

            if let Err(err) = file.write_all(payload.as_bytes()).and_then(|_| file.flush()) {
                drop(file);
                if let Err(cleanup) = remove_file_if_exists(&path) {
                    tracing::warn!(
                        path = %path.display(),
                        "failed to remove partial snapshot payload: {cleanup}"
                    );
                }
                return Err(Error::storage(path, err));
            }
            return Ok((id, path));
        }

        Err(Error::InvalidInput(format!(
            "no free snapshot id for '{base}' after {MAX_ID_ATTEMPTS} attempts"
        )))
    }

    /// Newest first. Unreadable or orphaned metadata records are skipped.
    pub fn list(&self) -> Result<Vec<SnapshotMeta>> {
        let dir = self.layout.snapshots_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(Error::storage(dir, err)),
        };

        let mut metas = Vec::new();
        for entry in entries {
            let Ok(entry) = entry else {
                continue;
            };
            let path = entry.path();
            if path.extension().and_then(|v| v.to_str()) != Some("json") {
                continue;
            }

            let meta = match read_meta(&path) {
                Ok(meta) => meta,
                Err(err) => {
                    tracing::debug!("skipping snapshot record: {err}");
                    continue;
                }
            };
            let Some(stem) = path.file_stem().and_then(|v| v.to_str()) else {
                continue;
            };
            if !self.layout.snapshot_payload_path(stem).is_file() {
                tracing::debug!(
                    path = %path.display(),
                    "skipping snapshot record without payload"
                );
                continue;
            }
            metas.push(meta);
        }

        metas.sort_by_cached_key(|meta| {
            Reverse((meta.created_utc.clone(), claim_sequence(meta), meta.id.clone()))
        });
        Ok(metas)
    }

    /// Whether either half of snapshot `id` is on disk.
    pub fn has_records(&self, id: &str) -> bool {
        is_valid_snapshot_id(id)
            && (self.layout.snapshot_meta_path(id).exists()
                || self.layout.snapshot_payload_path(id).exists())
    }

    /// `None` when either half of the snapshot is missing.
    pub fn get(&self, id: &str) -> Result<Option<StoredSnapshot>> {
        if !is_valid_snapshot_id(id) {
            return Ok(None);
        }

        let meta_path = self.layout.snapshot_meta_path(id);
        let payload_path = self.layout.snapshot_payload_path(id);
        if !(meta_path.is_file() && payload_path.is_file()) {
            return Ok(None);
        }

        let meta = read_meta(&meta_path)?;
        let payload = match fs::read_to_string(&payload_path) {
            Ok(payload) => payload,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(Error::storage(payload_path, err)),
        };

        Ok(Some(StoredSnapshot {
            meta,
            payload_path,
            payload,
        }))
    }

    pub fn require(&self, id: &str) -> Result<StoredSnapshot> {
        self.get(id)?
            .ok_or_else(|| Error::not_found("snapshot", id))
    }

    /// Removes both records, attempting each even if the other fails.
    /// Returns `false` when any removal failed.
    pub fn delete(&self, id: &str) -> bool {
        if !is_valid_snapshot_id(id) {
            return false;
        }

        let mut ok = true;
        for path in [
            self.layout.snapshot_meta_path(id),
            self.layout.snapshot_payload_path(id),
        ] {
            if let Err(err) = remove_file_if_exists(&path) {
                tracing::warn!(path = %path.display(), "failed to remove snapshot record: {err}");
                ok = false;
            }
        }

        if ok {
            tracing::info!(id, "deleted snapshot");
        }
        ok
    }
}

fn read_meta(path: &std::path::Path) -> Result<SnapshotMeta> {
    let content = fs::read_to_string(path).map_err(|err| Error::storage(path, err))?;
    serde_json::from_str(&content).map_err(|err| Error::Payload {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })
}

/// Position of `meta.id` among ids claimed for the same name and second:
/// 0 for the bare base, 1 for `_<digest>`, `n` for `_<digest>-n`.
fn claim_sequence(meta: &SnapshotMeta) -> usize {
    let base = format!("{}_{}", safe_snapshot_name(&meta.name), meta.created_utc);
    let Some(suffix) = meta.id.strip_prefix(&base) else {
        return 0;
    };
    if suffix.is_empty() {
        return 0;
    }
    match suffix.rsplit_once('-') {
        Some((_, n)) => n.parse().unwrap_or(0),
        None => 1,
    }
}

fn payload_digest(payload: &str) -> String {
    let digest = Sha256::digest(payload.as_bytes());
    hex::encode(&digest[..4])
}

fn is_id_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-')
}

/// Filesystem-safe form of a display name: runs of other characters become
/// one `_`, capped at 60 characters, `snapshot` when nothing is left.
pub fn safe_snapshot_name(name: &str) -> String {
    let mut out = String::new();
    let mut in_run = false;
    for ch in name.trim().chars() {
        if is_id_char(ch) {
            out.push(ch);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }

    let out = out.chars().take(MAX_SAFE_NAME_LEN).collect::<String>();
    if out.is_empty() {
        return "snapshot".to_string();
    }
    out
}

pub fn is_valid_snapshot_id(id: &str) -> bool {
    !id.is_empty() && id != "." && id != ".." && id.chars().all(is_id_char)
}
