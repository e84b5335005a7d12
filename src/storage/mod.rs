use std::cmp::Ordering;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::fs;

use crate::config::{AppConfig, ConfigPaths, ImportOptions, StorageOptions};
use crate::journaling::{BackupCategory, BackupJournal, BackupSampler, RandomSampler};

mod error;
mod events;
mod keys;
mod schema;

pub use error::{Reply, StoreError, StoreResult};
pub use events::ImportSummary;
pub use keys::{derive_key, has_forbidden_chars, record_file_name};
pub use schema::{
    is_valid_event, sanitize_events, validate_folder_name, CalendarEvent, Note, NoteDraft,
    Recurrence, GENERAL_FOLDER, MAX_FOLDER_NAME_CHARS,
};

use schema::folder_exists;

const MIB: u64 = 1024 * 1024;

/// Locations, limits, and backup policy for one [`Store`].
#[derive(Debug, Clone)]
pub struct StoreContext {
    pub notes_dir: PathBuf,
    pub folders_file: PathBuf,
    pub calendar_file: PathBuf,
    pub backup_dir: PathBuf,
    pub max_note_bytes: u64,
    pub max_import_bytes: u64,
    pub backup_retention: usize,
    pub sampler: Arc<dyn BackupSampler>,
}

impl StoreContext {
    /// Standard layout under `root` with default limits.
    pub fn new(root: &Path) -> Self {
        Self::from_config(&ConfigPaths::rooted_at(root), &AppConfig::default())
    }

    pub fn from_config(paths: &ConfigPaths, config: &AppConfig) -> Self {
        let StorageOptions {
            backup_sample_rate,
            backup_retention,
            max_note_bytes,
        } = config.storage;
        let ImportOptions { max_file_bytes } = config.import;
        Self {
            notes_dir: paths.notes_dir.clone(),
            folders_file: paths.folders_file.clone(),
            calendar_file: paths.calendar_file.clone(),
            backup_dir: paths.backup_dir.clone(),
            max_note_bytes,
            max_import_bytes: max_file_bytes,
            backup_retention,
            sampler: Arc::new(RandomSampler::new(backup_sample_rate)),
        }
    }

    pub fn with_sampler(mut self, sampler: impl BackupSampler + 'static) -> Self {
        self.sampler = Arc::new(sampler);
        self
    }
}

/// File-backed store for notes, the folder registry, and the event
/// collection. Cheap to clone; clones share the same context.
#[derive(Debug, Clone)]
pub struct Store {
    ctx: Arc<StoreContext>,
    journal: BackupJournal,
}

impl Store {
    pub async fn open(ctx: StoreContext) -> StoreResult<Self> {
        for dir in [&ctx.notes_dir, &ctx.backup_dir] {
            fs::create_dir_all(dir)
                .await
                .map_err(|err| StoreError::io(format!("creating {}", dir.display()), err))?;
        }
        let journal = BackupJournal::new(ctx.backup_dir.clone(), ctx.backup_retention);
        Ok(Self {
            ctx: Arc::new(ctx),
            journal,
        })
    }

    pub fn context(&self) -> &StoreContext {
        &self.ctx
    }

    pub fn journal(&self) -> &BackupJournal {
        &self.journal
    }

    pub fn note_path(&self, title: &str) -> PathBuf {
        self.ctx.notes_dir.join(record_file_name(title))
    }

    /// Writes a note under its derived key and returns the file path.
    pub async fn save_note(&self, draft: NoteDraft) -> StoreResult<PathBuf> {
        logged("save note", self.save_note_inner(draft).await)
    }

    async fn save_note_inner(&self, draft: NoteDraft) -> StoreResult<PathBuf> {
        let title = draft.title.trim();
        if title.is_empty() {
            return Err(StoreError::validation("note title cannot be empty"));
        }

        let now = now_timestamp();
        let note = Note {
            title: title.to_string(),
            content: draft.content.unwrap_or_default(),
            folder: draft
                .folder
                .filter(|folder| !folder.is_empty())
                .unwrap_or_else(|| GENERAL_FOLDER.to_string()),
            created: draft
                .created
                .filter(|created| !created.is_empty())
                .unwrap_or_else(|| now.clone()),
            last_modified: now,
            extra: Map::new(),
        };

        let size = serde_json::to_vec(&note)
            .map_err(|err| StoreError::parse("serialising note", err))?
            .len() as u64;
        if size > self.ctx.max_note_bytes {
            return Err(StoreError::validation(format!(
                "note content too large (max {})",
                human_size(self.ctx.max_note_bytes)
            )));
        }

        let path = self.note_path(title);
        write_json(&path, &note).await?;
        tracing::debug!(title, path = %path.display(), "saved note");
        self.backup_sampled(BackupCategory::Note, &note).await;
        Ok(path)
    }

    /// Removes a note after snapshotting it to the journal.
    pub async fn delete_note(&self, title: &str) -> StoreResult<()> {
        logged("delete note", self.delete_note_inner(title).await)
    }

    async fn delete_note_inner(&self, title: &str) -> StoreResult<()> {
        if title.trim().is_empty() {
            return Err(StoreError::validation("invalid note title"));
        }
        let path = self.note_path(title);
        if !path_exists(&path).await? {
            return Err(StoreError::not_found(format!("note '{title}'")));
        }

        let snapshot: Value = read_json(&path).await?;
        self.backup_now(BackupCategory::DeletedNote, &snapshot).await;

        fs::remove_file(&path)
            .await
            .map_err(|err| StoreError::io(format!("removing {}", path.display()), err))?;
        tracing::debug!(title, "deleted note");
        Ok(())
    }

    /// Reassigns a note to `folder` and returns the rewritten record.
    pub async fn move_note(&self, title: &str, folder: &str) -> StoreResult<Note> {
        logged("move note", self.move_note_inner(title, folder).await)
    }

    async fn move_note_inner(&self, title: &str, folder: &str) -> StoreResult<Note> {
        if title.trim().is_empty() {
            return Err(StoreError::validation("invalid note title"));
        }
        if folder.trim().is_empty() {
            return Err(StoreError::validation("invalid target folder"));
        }
        let path = self.note_path(title);
        if !path_exists(&path).await? {
            return Err(StoreError::not_found(format!("note '{title}'")));
        }

        let mut note: Note = read_json(&path).await?;
        note.folder = folder.to_string();
        note.last_modified = now_timestamp();
        write_json(&path, &note).await?;
        Ok(note)
    }

    /// Every readable note, newest `lastModified` first. Unreadable files are
    /// logged and skipped.
    pub async fn list_notes(&self) -> Vec<Note> {
        let files = match self.note_files().await {
            Ok(files) => files,
            Err(err) => {
                tracing::error!(%err, "listing notes failed");
                return Vec::new();
            }
        };

        let mut notes = Vec::with_capacity(files.len());
        for path in files {
            match read_json::<Note>(&path).await {
                Ok(note) => notes.push(with_listing_defaults(note)),
                Err(err) => {
                    tracing::warn!(%err, "skipping unreadable note {}", path.display());
                }
            }
        }

        notes.sort_by(|a, b| compare_recency(&b.last_modified, &a.last_modified));
        notes
    }

    /// The folder registry, always containing [`GENERAL_FOLDER`].
    pub async fn get_folders(&self) -> Vec<String> {
        match self.load_folders().await {
            Ok(Some(mut folders)) => {
                if !folders.iter().any(|folder| folder == GENERAL_FOLDER) {
                    folders.insert(0, GENERAL_FOLDER.to_string());
                    if let Err(err) = write_json(&self.ctx.folders_file, &folders).await {
                        tracing::warn!(%err, "failed to persist restored General folder");
                    }
                }
                folders
            }
            Ok(None) => {
                tracing::warn!("folder registry is not an array, using defaults");
                default_folders()
            }
            Err(err) => {
                tracing::error!(%err, "loading folders failed");
                default_folders()
            }
        }
    }

    pub async fn add_folder(&self, name: &str) -> StoreResult<Vec<String>> {
        logged("add folder", self.add_folder_inner(name).await)
    }

    async fn add_folder_inner(&self, name: &str) -> StoreResult<Vec<String>> {
        let name = validate_folder_name(name)?;
        let mut folders = self.load_folders().await?.unwrap_or_else(default_folders);
        if folder_exists(&folders, &name) {
            return Err(StoreError::validation("folder already exists"));
        }
        folders.push(name);
        write_json(&self.ctx.folders_file, &folders).await?;
        Ok(folders)
    }

    /// Drops a folder, moving its notes to [`GENERAL_FOLDER`] first.
    pub async fn delete_folder(&self, name: &str) -> StoreResult<Vec<String>> {
        logged("delete folder", self.delete_folder_inner(name).await)
    }

    async fn delete_folder_inner(&self, name: &str) -> StoreResult<Vec<String>> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::validation("invalid folder name"));
        }
        if name == GENERAL_FOLDER {
            return Err(StoreError::validation("cannot delete the General folder"));
        }
        let mut folders = self
            .load_folders()
            .await?
            .ok_or_else(|| StoreError::not_found("folder registry"))?;
        if !folders.iter().any(|folder| folder == name) {
            return Err(StoreError::not_found(format!("folder '{name}'")));
        }

        let moved = self.reassign_notes(name, GENERAL_FOLDER).await?;
        folders.retain(|folder| folder != name);
        write_json(&self.ctx.folders_file, &folders).await?;
        tracing::info!(folder = name, moved, "deleted folder");
        Ok(folders)
    }

    /// Renames a folder in place and rewrites the notes that point at it.
    pub async fn rename_folder(&self, old: &str, new: &str) -> StoreResult<Vec<String>> {
        logged("rename folder", self.rename_folder_inner(old, new).await)
    }

    async fn rename_folder_inner(&self, old: &str, new: &str) -> StoreResult<Vec<String>> {
        let old = old.trim();
        if old.is_empty() {
            return Err(StoreError::validation("invalid old folder name"));
        }
        if new.trim().is_empty() {
            return Err(StoreError::validation("invalid new folder name"));
        }
        if old == GENERAL_FOLDER {
            return Err(StoreError::validation("cannot rename the General folder"));
        }
        if old == new.trim() {
            return Err(StoreError::validation(
                "new folder name is the same as the old one",
            ));
        }
        let new = validate_folder_name(new)?;

        let mut folders = self.load_folders().await?.unwrap_or_else(default_folders);
        if folder_exists(&folders, &new) {
            return Err(StoreError::validation("folder already exists"));
        }
        let Some(slot) = folders.iter_mut().find(|folder| folder.as_str() == old) else {
            return Err(StoreError::not_found(format!("folder '{old}'")));
        };
        *slot = new.clone();
        write_json(&self.ctx.folders_file, &folders).await?;

        let moved = self.reassign_notes(old, &new).await?;
        tracing::info!(from = old, to = %new, moved, "renamed folder");
        Ok(folders)
    }

    /// Points every note in folder `from` at folder `to`.
    ///
    /// Only the `folder` and `lastModified` keys of each record are touched,
    /// so fields of any shape survive. Notes are rewritten one at a time; a
    /// note that cannot be read or written is logged and left as it was, so
    /// a failure part way through leaves the cascade partially applied.
    async fn reassign_notes(&self, from: &str, to: &str) -> StoreResult<usize> {
        let mut moved = 0;
        for path in self.note_files().await? {
            let mut record = match read_json::<Value>(&path).await {
                Ok(Value::Object(record)) => record,
                Ok(_) => {
                    tracing::warn!(
                        "skipping non-object note {} during folder update",
                        path.display()
                    );
                    continue;
                }
                Err(err) => {
                    tracing::warn!(%err, "skipping note {} during folder update", path.display());
                    continue;
                }
            };
            if record_folder(&record) != from {
                continue;
            }
            record.insert("folder".into(), Value::String(to.to_string()));
            record.insert("lastModified".into(), Value::String(now_timestamp()));
            match write_json(&path, &record).await {
                Ok(()) => moved += 1,
                Err(err) => {
                    tracing::warn!(%err, "failed to update note {}", path.display());
                }
            }
        }
        Ok(moved)
    }

    /// `Ok(None)` when the registry exists but is not an array.
    async fn load_folders(&self) -> StoreResult<Option<Vec<String>>> {
        let path = &self.ctx.folders_file;
        if !path_exists(path).await? {
            let seeded = default_folders();
            write_json(path, &seeded).await?;
            return Ok(Some(seeded));
        }
        let Value::Array(entries) = read_json::<Value>(path).await? else {
            return Ok(None);
        };
        let total = entries.len();
        let folders: Vec<String> = entries
            .into_iter()
            .filter_map(|entry| match entry {
                Value::String(name) => Some(name),
                _ => None,
            })
            .collect();
        if folders.len() < total {
            tracing::warn!(
                dropped = total - folders.len(),
                "ignoring non-string folder entries"
            );
        }
        Ok(Some(folders))
    }

    async fn note_files(&self) -> StoreResult<Vec<PathBuf>> {
        let dir = &self.ctx.notes_dir;
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::io(format!("reading {}", dir.display()), err)),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| StoreError::io(format!("reading {}", dir.display()), err))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some(keys::RECORD_EXTENSION) {
                files.push(path);
            }
        }
        Ok(files)
    }

    async fn backup_sampled<T: Serialize + ?Sized>(&self, category: BackupCategory, payload: &T) {
        if self.ctx.sampler.should_sample() {
            self.backup_now(category, payload).await;
        }
    }

    /// Backup failures never fail the operation that triggered them.
    async fn backup_now<T: Serialize + ?Sized>(&self, category: BackupCategory, payload: &T) {
        if let Err(err) = self.journal.record(category, payload).await {
            tracing::warn!(?err, %category, "backup failed");
        }
    }
}

fn logged<T>(operation: &str, result: StoreResult<T>) -> StoreResult<T> {
    match &result {
        Err(err @ (StoreError::Validation(_) | StoreError::NotFound(_))) => {
            tracing::warn!(%err, "{operation} rejected");
        }
        Err(err) => tracing::error!(%err, "{operation} failed"),
        Ok(_) => {}
    }
    result
}

pub(crate) fn human_size(bytes: u64) -> String {
    if bytes >= MIB && bytes % MIB == 0 {
        format!("{}MB", bytes / MIB)
    } else {
        format!("{bytes} bytes")
    }
}

/// Folder of a raw note record; a missing, empty, or non-string folder
/// means [`GENERAL_FOLDER`].
fn record_folder(record: &Map<String, Value>) -> &str {
    record
        .get("folder")
        .and_then(Value::as_str)
        .filter(|folder| !folder.is_empty())
        .unwrap_or(GENERAL_FOLDER)
}

fn default_folders() -> Vec<String> {
    vec![GENERAL_FOLDER.to_string()]
}

fn with_listing_defaults(mut note: Note) -> Note {
    if note.folder.is_empty() {
        note.folder = GENERAL_FOLDER.to_string();
    }
    if note.created.is_empty() {
        note.created = if note.last_modified.is_empty() {
            now_timestamp()
        } else {
            note.last_modified.clone()
        };
    }
    note
}

/// Orders RFC 3339 stamps chronologically; unparseable stamps sort oldest.
fn compare_recency(a: &str, b: &str) -> Ordering {
    let parse = |stamp: &str| OffsetDateTime::parse(stamp, &Rfc3339).ok();
    parse(a).cmp(&parse(b))
}

pub(crate) fn now_timestamp() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}

async fn path_exists(path: &Path) -> StoreResult<bool> {
    fs::try_exists(path)
        .await
        .map_err(|err| StoreError::io(format!("checking {}", path.display()), err))
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> StoreResult<T> {
    let raw = fs::read(path)
        .await
        .map_err(|err| StoreError::io(format!("reading {}", path.display()), err))?;
    serde_json::from_slice(&raw)
        .map_err(|err| StoreError::parse(format!("parsing {}", path.display()), err))
}

/// Pretty-prints `value` to a sibling temp file, then renames it over `path`.
async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> StoreResult<()> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|err| StoreError::parse(format!("serialising {}", path.display()), err))?;
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .await
        .map_err(|err| StoreError::io(format!("creating {}", parent.display()), err))?;

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("record");
    let tmp_path = parent.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4().simple()));
    fs::write(&tmp_path, &json)
        .await
        .map_err(|err| StoreError::io(format!("writing {}", tmp_path.display()), err))?;
    if let Err(err) = fs::rename(&tmp_path, path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(StoreError::io(format!("replacing {}", path.display()), err));
    }
    Ok(())
}
