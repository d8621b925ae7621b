//! Flat-file tier for large payloads.
//!
//! One file per payload, named `<fingerprint_hash>.json`, holding the raw
//! response body. Writes go to a temp file that is renamed into place, so a
//! reader never sees a partial file.
//!
//! A put renames its file before the index row commits. The orphan sweep
//! therefore leaves every file younger than [`SWEEP_GRACE`] alone, referenced
//! or not.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use super::hash::is_valid_hash;
use crate::Error;

const PAYLOAD_EXT: &str = "json";
const TMP_EXT: &str = "tmp";

/// Files younger than this may belong to an in-flight write.
pub const SWEEP_GRACE: Duration = Duration::from_secs(60);

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Outcome of an orphan sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub removed_files: u64,
    pub removed_bytes: u64,
}

/// Directory-backed payload store.
#[derive(Debug, Clone)]
pub struct PayloadStore {
    dir: PathBuf,
}

impl PayloadStore {
    /// Open (and create if needed) the payload directory.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, Error> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name used for a fingerprint's payload.
    pub fn file_name(hash: &str) -> String {
        format!("{hash}.{PAYLOAD_EXT}")
    }

    fn resolve(&self, name: &str) -> Result<PathBuf, Error> {
        let valid = name
            .strip_suffix(&format!(".{PAYLOAD_EXT}"))
            .is_some_and(is_valid_hash);
        if !valid {
            return Err(Error::Storage(format!("invalid payload file name: {name}")));
        }
        Ok(self.dir.join(name))
    }

    /// Write `body` for `hash` and return the stored file name.
    pub async fn write(&self, hash: &str, body: &str) -> Result<String, Error> {
        let name = Self::file_name(hash);
        let target = self.resolve(&name)?;
        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = self.dir.join(format!("{name}.{}-{seq}.{TMP_EXT}", std::process::id()));

        if let Err(e) = tokio::fs::write(&tmp, body.as_bytes()).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        tracing::debug!(file = %name, bytes = body.len(), "Wrote payload file");
        Ok(name)
    }

    pub async fn read(&self, name: &str) -> Result<String, Error> {
        let path = self.resolve(name)?;
        Ok(tokio::fs::read_to_string(path).await?)
    }

    /// Remove a payload file. Returns false if it was already gone.
    pub async fn remove(&self, name: &str) -> Result<bool, Error> {
        let path = self.resolve(name)?;
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Payload files on disk with their sizes.
    pub async fn list(&self) -> Result<Vec<(String, u64)>, Error> {
        let mut files = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.dir).await?;
        while let Some(item) = dir.next_entry().await? {
            let name = item.file_name().to_string_lossy().into_owned();
            if self.resolve(&name).is_ok() {
                let meta = item.metadata().await?;
                files.push((name, meta.len()));
            }
        }
        Ok(files)
    }

    /// Delete payload files the index does not reference, plus abandoned temp
    /// files. Anything modified within [`SWEEP_GRACE`] is kept.
    pub async fn sweep(&self, referenced: &HashSet<String>) -> Result<SweepReport, Error> {
        let mut report = SweepReport::default();
        let mut dir = tokio::fs::read_dir(&self.dir).await?;
        let now = SystemTime::now();

        while let Some(item) = dir.next_entry().await? {
            let name = item.file_name().to_string_lossy().into_owned();
            let meta = item.metadata().await?;
            if !meta.is_file() {
                continue;
            }

            let age = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();
            if age < SWEEP_GRACE {
                continue;
            }

            let orphan = name.ends_with(&format!(".{TMP_EXT}"))
                || (self.resolve(&name).is_ok() && !referenced.contains(&name));

            if orphan {
                match tokio::fs::remove_file(item.path()).await {
                    Ok(()) => {
                        report.removed_files += 1;
                        report.removed_bytes += meta.len();
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        if report.removed_files > 0 {
            tracing::info!(
                removed_files = report.removed_files,
                removed_bytes = report.removed_bytes,
                "Swept orphaned payload files"
            );
        }
        Ok(report)
    }
}
