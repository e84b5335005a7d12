use std::fmt::Write as _;
use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;
use serde_json::Value;

use crate::storage::{
    CalendarEvent, ImportSummary, Note, NoteDraft, Reply, Store, StoreResult,
};

#[derive(Args, Debug, Clone)]
pub struct NoteArgs {
    #[command(subcommand)]
    pub command: NoteCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum NoteCommand {
    /// Create or overwrite a note
    Save(NoteSaveArgs),
    /// Delete a note (a backup is written first)
    Delete(NoteTitleArgs),
    /// Move a note to another folder
    Move(NoteMoveArgs),
    /// List notes, most recently modified first
    List(NoteListArgs),
}

#[derive(Args, Debug, Clone)]
pub struct NoteSaveArgs {
    /// Note title; determines the storage key
    pub title: String,
    /// Note body. If omitted, reads from stdin.
    #[arg(long)]
    pub content: Option<String>,
    /// Folder to file the note under
    #[arg(long)]
    pub folder: Option<String>,
    /// Creation timestamp to keep when overwriting an existing note
    #[arg(long)]
    pub created: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct NoteTitleArgs {
    pub title: String,
}

#[derive(Args, Debug, Clone)]
pub struct NoteMoveArgs {
    pub title: String,
    /// Target folder
    pub folder: String,
}

#[derive(Args, Debug, Clone)]
pub struct NoteListArgs {
    /// Only show notes in this folder
    #[arg(long)]
    pub folder: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct FolderArgs {
    #[command(subcommand)]
    pub command: FolderCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum FolderCommand {
    /// Print the folder registry
    List,
    /// Register a new folder
    Add(FolderNameArgs),
    /// Delete a folder, moving its notes to General
    Delete(FolderNameArgs),
    /// Rename a folder and every note filed under it
    Rename(FolderRenameArgs),
}

#[derive(Args, Debug, Clone)]
pub struct FolderNameArgs {
    pub name: String,
}

#[derive(Args, Debug, Clone)]
pub struct FolderRenameArgs {
    pub from: String,
    pub to: String,
}

#[derive(Args, Debug, Clone)]
pub struct CalendarArgs {
    #[command(subcommand)]
    pub command: CalendarCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CalendarCommand {
    /// Print stored events
    List,
    /// Replace stored events with a JSON array
    Save(CalendarSaveArgs),
    /// Replace stored events with those parsed from an .ics file
    Import(CalendarImportArgs),
}

#[derive(Args, Debug, Clone)]
pub struct CalendarSaveArgs {
    /// JSON file holding the event array. If omitted, reads from stdin.
    #[arg(long)]
    pub file: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct CalendarImportArgs {
    pub path: PathBuf,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SavedNote {
    file_path: PathBuf,
}

#[derive(Debug, Serialize)]
struct Acknowledged {}

#[derive(Debug, Serialize)]
struct MovedNote {
    note: Note,
}

#[derive(Debug, Serialize)]
struct NoteList {
    notes: Vec<Note>,
}

#[derive(Debug, Serialize)]
struct FolderList {
    folders: Vec<String>,
}

#[derive(Debug, Serialize)]
struct EventList {
    events: Vec<CalendarEvent>,
}

#[derive(Debug, Serialize)]
struct SavedEvents {
    saved: usize,
}

pub async fn handle_note_command(store: &Store, args: NoteArgs, json: bool) -> Result<String> {
    match args.command {
        NoteCommand::Save(args) => note_save(store, args, json).await,
        NoteCommand::Delete(args) => {
            let result = store.delete_note(&args.title).await;
            render(result.map(|()| Acknowledged {}), json, |_| {
                format!("Deleted note \"{}\"\n", args.title)
            })
        }
        NoteCommand::Move(args) => {
            let result = store.move_note(&args.title, &args.folder).await;
            render(result.map(|note| MovedNote { note }), json, |moved| {
                format!("Moved \"{}\" to {}\n", moved.note.title, moved.note.folder)
            })
        }
        NoteCommand::List(args) => {
            let mut notes = store.list_notes().await;
            if let Some(folder) = &args.folder {
                notes.retain(|note| note.is_in_folder(folder));
            }
            render(Ok(NoteList { notes }), json, |list| {
                format_note_list(&list.notes)
            })
        }
    }
}

async fn note_save(store: &Store, args: NoteSaveArgs, json: bool) -> Result<String> {
    let content = match args.content {
        Some(content) => content,
        None => read_stdin()?.unwrap_or_default(),
    };
    let mut draft = NoteDraft::new(args.title).with_content(content);
    if let Some(folder) = args.folder {
        draft = draft.in_folder(folder);
    }
    if let Some(created) = args.created {
        draft = draft.created_at(created);
    }

    let result = store.save_note(draft).await;
    render(result.map(|file_path| SavedNote { file_path }), json, |saved| {
        format!("Saved note to {}\n", saved.file_path.display())
    })
}

pub async fn handle_folder_command(
    store: &Store,
    args: FolderArgs,
    json: bool,
) -> Result<String> {
    let result = match args.command {
        FolderCommand::List => Ok(store.get_folders().await),
        FolderCommand::Add(args) => store.add_folder(&args.name).await,
        FolderCommand::Delete(args) => store.delete_folder(&args.name).await,
        FolderCommand::Rename(args) => store.rename_folder(&args.from, &args.to).await,
    };
    render(result.map(|folders| FolderList { folders }), json, |list| {
        let mut out = String::new();
        for folder in &list.folders {
            let _ = writeln!(&mut out, "{folder}");
        }
        out
    })
}

pub async fn handle_calendar_command(
    store: &Store,
    args: CalendarArgs,
    json: bool,
) -> Result<String> {
    match args.command {
        CalendarCommand::List => {
            let events = store.get_events().await;
            render(Ok(EventList { events }), json, |list| {
                format_event_list(&list.events)
            })
        }
        CalendarCommand::Save(args) => {
            let raw = match &args.file {
                Some(path) => std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?,
                None => read_stdin()?.unwrap_or_default(),
            };
            let payload: Value = serde_json::from_str(&raw).context("parsing event JSON")?;
            let result = store.save_events(payload).await;
            render(result.map(|saved| SavedEvents { saved }), json, |saved| {
                format!("Saved {} events\n", saved.saved)
            })
        }
        CalendarCommand::Import(args) => {
            let result = store.import_calendar_file(&args.path).await;
            render(result, json, |summary: &ImportSummary| {
                format!(
                    "Imported {} events from {}\n",
                    summary.imported_count,
                    args.path.display()
                )
            })
        }
    }
}

/// JSON mode always yields the envelope, failures included. Text mode turns
/// a store error into a command error.
fn render<T: Serialize>(
    result: StoreResult<T>,
    json: bool,
    text: impl FnOnce(&T) -> String,
) -> Result<String> {
    if json {
        let reply = Reply::from(result);
        let mut out = serde_json::to_string_pretty(&reply).context("serializing reply")?;
        out.push('\n');
        return Ok(out);
    }
    let data = result?;
    Ok(text(&data))
}

fn format_note_list(notes: &[Note]) -> String {
    if notes.is_empty() {
        return "No notes found.\n".to_string();
    }
    let mut out = String::new();
    for note in notes {
        let _ = writeln!(&mut out, "{}  [{}]", note.title, note.folder);
        let _ = writeln!(&mut out, "    modified {}", note.last_modified);
    }
    out
}

fn format_event_list(events: &[CalendarEvent]) -> String {
    if events.is_empty() {
        return "No events.\n".to_string();
    }
    let mut out = String::new();
    for event in events {
        let when = match (&event.end, event.all_day) {
            (Some(end), _) => format!("{} -> {end}", event.start),
            (None, true) => format!("{} (all day)", event.start),
            (None, false) => event.start.clone(),
        };
        let _ = writeln!(&mut out, "{when}  {}", event.title);
    }
    out
}

fn read_stdin() -> Result<Option<String>> {
    if atty::is(atty::Stream::Stdin) {
        return Ok(None);
    }
    let mut buf = String::new();
    io::stdin()
        .read_to_string(&mut buf)
        .context("reading stdin")?;
    Ok(Some(buf))
}
