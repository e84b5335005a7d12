use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{ConfigLoader, CONFIG_ENV, DATA_ENV};
use crate::storage::{Store, StoreContext};

pub mod commands;

use self::commands::{CalendarArgs, FolderArgs, NoteArgs};

#[derive(Parser, Debug)]
#[command(
    name = "notedesk",
    version,
    about = "Notes, folders, and a calendar kept as plain JSON files"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Override the config file location (takes precedence over NOTEDESK_CONFIG)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the data directory (takes precedence over NOTEDESK_DATA)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Print the JSON reply envelope instead of text
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Save, delete, move, or list notes
    Note(NoteArgs),
    /// Manage the folder registry
    Folder(FolderArgs),
    /// Manage calendar events and import .ics files
    Calendar(CalendarArgs),
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        env::set_var(CONFIG_ENV, path);
    }
    if let Some(path) = &cli.data_dir {
        env::set_var(DATA_ENV, path);
    }

    init_tracing(&cli.log_level)
        .with_context(|| format!("initialising logging at level {}", cli.log_level))?;
    let loader = ConfigLoader::discover()?;
    let config = loader.load_or_init()?;
    let ctx = StoreContext::from_config(loader.paths(), &config);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("starting async runtime")?;
    let output = runtime.block_on(async move {
        let store = Store::open(ctx).await.context("opening data directory")?;
        dispatch(&store, cli.command, cli.json).await
    })?;
    print!("{output}");
    Ok(())
}

async fn dispatch(store: &Store, command: Commands, json: bool) -> Result<String> {
    match command {
        Commands::Note(args) => commands::handle_note_command(store, args, json).await,
        Commands::Folder(args) => commands::handle_folder_command(store, args, json).await,
        Commands::Calendar(args) => commands::handle_calendar_command(store, args, json).await,
    }
}

fn init_tracing(level: &str) -> Result<()> {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));
        fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|err| anyhow::anyhow!("{err}"))
    })
    .map(|_| ())
}
