use std::fmt;
use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Duration, OffsetDateTime};
use tokio::fs;

const SNAPSHOT_EXTENSION: &str = "json";
const SNAPSHOT_TMP_EXTENSION: &str = "json.tmp";

/// Fixed-width so that filename order is chronological order.
const STAMP_FORMAT: &[FormatItem<'static>] = format_description!(
    "[year]-[month]-[day]T[hour]-[minute]-[second]-[subsecond digits:9]Z"
);

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum BackupCategory {
    Note,
    DeletedNote,
    Calendar,
}

/// Decides whether a routine write also lands in the journal.
pub trait BackupSampler: fmt::Debug + Send + Sync {
    fn should_sample(&self) -> bool;
}

#[derive(Debug, Clone, Copy)]
pub struct RandomSampler {
    rate: f64,
}

impl RandomSampler {
    pub fn new(rate: f64) -> Self {
        Self {
            rate: rate.clamp(0.0, 1.0),
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }
}

impl BackupSampler for RandomSampler {
    fn should_sample(&self) -> bool {
        rand::random::<f64>() < self.rate
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysSample;

impl BackupSampler for AlwaysSample {
    fn should_sample(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NeverSample;

impl BackupSampler for NeverSample {
    fn should_sample(&self) -> bool {
        false
    }
}

/// Rolling directory of timestamped JSON snapshots, pruned per category.
#[derive(Debug, Clone)]
pub struct BackupJournal {
    dir: PathBuf,
    retention: usize,
}

impl BackupJournal {
    pub fn new(dir: PathBuf, retention: usize) -> Self {
        Self {
            dir,
            retention: retention.max(1),
        }
    }

    /// Writes `payload` as a new snapshot and prunes the category down to the
    /// retention limit. Returns the snapshot path.
    pub async fn record<T>(&self, category: BackupCategory, payload: &T) -> Result<PathBuf>
    where
        T: Serialize + ?Sized,
    {
        let json = serde_json::to_vec_pretty(payload).context("serialising backup snapshot")?;
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("ensuring backup dir {}", self.dir.display()))?;

        let final_path = self.next_snapshot_path(category).await?;
        let tmp_path = final_path.with_extension(SNAPSHOT_TMP_EXTENSION);
        fs::write(&tmp_path, &json)
            .await
            .with_context(|| format!("writing temporary snapshot {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &final_path)
            .await
            .with_context(|| format!("persisting snapshot {}", final_path.display()))?;

        let pruned = self.prune(category).await?;
        tracing::debug!(
            %category,
            path = %final_path.display(),
            pruned,
            "recorded backup snapshot"
        );
        Ok(final_path)
    }

    /// Snapshot paths of one category, newest first.
    pub async fn list(&self, category: BackupCategory) -> Result<Vec<PathBuf>> {
        let mut names = self.snapshot_names(category).await?;
        names.sort();
        names.reverse();
        Ok(names.into_iter().map(|name| self.dir.join(name)).collect())
    }

    async fn prune(&self, category: BackupCategory) -> Result<usize> {
        let snapshots = self.list(category).await?;
        let mut removed = 0;
        for stale in snapshots.iter().skip(self.retention) {
            match fs::remove_file(stale).await {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("removing old snapshot {}", stale.display()))
                }
            }
        }
        Ok(removed)
    }

    async fn snapshot_names(&self, category: BackupCategory) -> Result<Vec<String>> {
        let prefix = format!("{category}-");
        let suffix = format!(".{SNAPSHOT_EXTENSION}");
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("reading backup dir {}", self.dir.display()))
            }
        };

        let mut names = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .with_context(|| format!("listing backup dir {}", self.dir.display()))?
        {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with(&prefix) && name.ends_with(&suffix) {
                names.push(name);
            }
        }
        Ok(names)
    }

    async fn next_snapshot_path(&self, category: BackupCategory) -> Result<PathBuf> {
        let mut stamp = OffsetDateTime::now_utc();
        loop {
            let name = format!(
                "{category}-{}.{SNAPSHOT_EXTENSION}",
                stamp.format(STAMP_FORMAT).context("formatting backup stamp")?
            );
            let path = self.dir.join(name);
            let taken = fs::try_exists(&path)
                .await
                .with_context(|| format!("probing snapshot {}", path.display()))?;
            if !taken {
                return Ok(path);
            }
            stamp += Duration::nanoseconds(1);
        }
    }
}
