// spotify-snapshot - versioned backups of a Spotify library
// Default run writes the snapshot into the test repo; --prod-run targets the real one

use anyhow::{Context, Result};
use clap::Parser;
use spotify_snapshot::backup::{self, BackupOptions, Selection};
use spotify_snapshot::config::{self, Config};
use spotify_snapshot::snapshot::table;
use spotify_snapshot::spotify::CredentialStore;
use spotify_snapshot::{logging, schedule};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "spotify-snapshot", version)]
#[command(about = "Back up your Spotify library to a git repository as sorted TSV files")]
struct Args {
    /// Write to the configured backup directory instead of the test repo
    #[arg(short = 'p', long)]
    prod_run: bool,

    /// Write the files but do not commit them
    #[arg(short = 'n', long)]
    no_commit: bool,

    /// Back up everything (the default when no --backup-* flag is given)
    #[arg(long)]
    backup_all: bool,

    #[arg(long)]
    backup_liked_songs: bool,

    #[arg(long)]
    backup_saved_albums: bool,

    #[arg(long)]
    backup_playlists: bool,

    /// Push the snapshot repo to the configured remote after committing
    #[arg(long)]
    push: bool,

    /// Do not ask before pushing
    #[arg(short = 'y', long)]
    yes: bool,

    /// Print a snapshot TSV file as a table and exit
    #[arg(long, value_name = "FILE")]
    pretty_print: Option<PathBuf>,

    /// Open the config file in $VISUAL / $EDITOR
    #[arg(long)]
    edit_config: bool,

    /// Schedule periodic production runs with cron
    #[arg(long)]
    install: bool,

    /// Remove the scheduled run
    #[arg(long)]
    uninstall: bool,

    /// Store Spotify API credentials in the system keyring
    #[arg(long)]
    set_credentials: bool,

    /// Remove stored Spotify API credentials
    #[arg(long)]
    clear_credentials: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    human_panic::setup_panic!();

    let args = Args::parse();
    let _log_guard = logging::init(args.verbose).context("Failed to set up logging")?;

    let result = dispatch(args).await;
    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}

async fn dispatch(args: Args) -> Result<()> {
    if let Some(path) = &args.pretty_print {
        return table::pretty_print(path)
            .with_context(|| format!("Failed to read {}", path.display()));
    }

    if args.edit_config {
        config::edit_config()?;
        return Ok(());
    }

    if args.set_credentials {
        CredentialStore::new().prompt_and_store()?;
        println!("✓ Spotify API credentials stored");
        return Ok(());
    }

    if args.clear_credentials {
        if CredentialStore::new().remove()? {
            println!("✓ Spotify API credentials removed");
        } else {
            info!("No stored credentials found");
        }
        return Ok(());
    }

    if args.install {
        let config = Config::load()?;
        schedule::install(&config)?;
        return Ok(());
    }

    if args.uninstall {
        if schedule::uninstall()? {
            println!("✓ Scheduled run removed");
        }
        return Ok(());
    }

    let config = Config::load()?;
    let options = BackupOptions {
        prod_run: args.prod_run,
        selection: Selection::from_flags(
            args.backup_all,
            args.backup_liked_songs,
            args.backup_saved_albums,
            args.backup_playlists,
        ),
        commit: !args.no_commit,
        push: args.push,
        auto_confirm: args.yes,
    };

    backup::run(&config, &options).await
}
