use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tapeshelf::db::models::{FileId, LibraryTrack, TrackId};
use tapeshelf::db::snapshot::CatalogSnapshot;

#[derive(Parser)]
#[command(name = "tapeshelf", version, about = "Music library catalog")]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan directories for audio files and reconcile them with the catalog
    Scan {
        /// Directories to scan (defaults to config file music_dirs)
        paths: Vec<PathBuf>,

        /// Leave files that vanished from disk active
        #[arg(long)]
        keep_missing: bool,
    },

    /// Remove a file from the library (its history is kept)
    Remove {
        /// File id
        file_id: FileId,

        /// Reason recorded on the tombstone
        #[arg(short, long)]
        comment: Option<String>,
    },

    /// List files that share identical content
    Dupes,

    /// Delete artists and albums nothing refers to
    Gc,

    /// List active tracks with their album and artists
    Tracks,

    /// Show the ordered credits of a track
    Credits {
        /// Track id
        track_id: TrackId,
    },

    /// Write the whole catalog to a JSON snapshot
    Export {
        /// Output file
        out: PathBuf,
    },

    /// Load a JSON snapshot into an empty catalog
    Import {
        /// Snapshot file
        input: PathBuf,
    },

    /// Show library statistics
    Stats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = tapeshelf::config::AppConfig::load();

    // Resolve database path: CLI > config > XDG default
    let db_path = config.resolve_db_path(cli.db_path);
    log::info!("Database: {}", db_path.display());

    let db = tapeshelf::db::Database::open_with_timeout(&db_path, config.busy_timeout())
        .context("Failed to open database")?;

    match cli.command {
        Commands::Scan {
            paths,
            keep_missing,
        } => {
            // Resolve scan paths: CLI args > config music_dirs
            let roots = if !paths.is_empty() {
                paths
            } else if !config.music_dirs.is_empty() {
                config.music_dirs.clone()
            } else {
                anyhow::bail!(
                    "No directories to scan. Pass paths as arguments or set music_dirs in config."
                );
            };

            let mut opts = tapeshelf::scanner::ScanOptions::from_config(&config);
            if keep_missing {
                opts.tombstone_missing = false;
            }
            let result =
                tapeshelf::scanner::scan(&db, &roots, &opts).context("Scan failed")?;
            println!(
                "Scan complete: {} found, {} unchanged, {} new ({} tracks), {} moved, \
                 {} modified, {} removed, {} errors",
                result.discovered,
                result.unchanged,
                result.new,
                result.tracks,
                result.moved,
                result.modified,
                result.tombstoned,
                result.errors
            );
        }

        Commands::Remove { file_id, comment } => {
            let file = db.get_file(file_id).context("Failed to look up file")?;
            let deletion = db
                .soft_delete(file_id, comment.as_deref())
                .with_context(|| format!("Failed to remove {}", file.path))?;
            println!("Removed {} (deletion {})", file.path, deletion);
        }

        Commands::Dupes => {
            let groups = db.duplicate_hashes().context("Failed to find duplicates")?;
            if groups.is_empty() {
                println!("No duplicate content found.");
            }
            for group in &groups {
                println!("{}", hex::encode(&group.hash));
                for id in &group.files {
                    let file = db.get_file(*id)?;
                    let state = if file.is_active() { "" } else { "  [removed]" };
                    println!("  {}  {}{}", id, file.path, state);
                }
            }
        }

        Commands::Gc => {
            let report = db.gc_orphans().context("Garbage collection failed")?;
            println!(
                "Removed {} orphan artist(s) and {} orphan album(s)",
                report.artists, report.albums
            );
        }

        Commands::Tracks => {
            let tracks = db.library_tracks().context("Failed to list tracks")?;
            print_track_table(&tracks);
        }

        Commands::Credits { track_id } => {
            let track = db.get_track(track_id).context("Failed to look up track")?;
            let credits = db.credits_for(track_id)?;
            println!("{}", track.info.title.as_deref().unwrap_or("(untitled)"));
            if credits.is_empty() {
                println!("  (no credits)");
            }
            for c in &credits {
                println!("  {:>6.2}  {:<12} {}", c.ord, c.role, c.artist_name);
            }
        }

        Commands::Export { out } => {
            let snapshot = db.export_snapshot().context("Failed to read catalog")?;
            let json = snapshot.to_json()?;
            std::fs::write(&out, json)
                .with_context(|| format!("Failed to write {}", out.display()))?;
            println!(
                "Exported {} files, {} tracks, {} artists, {} albums to {}",
                snapshot.files.len(),
                snapshot.tracks.len(),
                snapshot.artists.len(),
                snapshot.albums.len(),
                out.display()
            );
        }

        Commands::Import { input } => {
            let json = std::fs::read_to_string(&input)
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let snapshot = CatalogSnapshot::from_json(&json)
                .with_context(|| format!("{} is not a catalog snapshot", input.display()))?;
            db.import_snapshot(&snapshot)
                .context("Failed to import snapshot")?;
            println!(
                "Imported {} files and {} tracks",
                snapshot.files.len(),
                snapshot.tracks.len()
            );
        }

        Commands::Stats => {
            let stats = db.stats().context("Failed to get stats")?;
            println!("Library Statistics");
            println!("==================");
            println!("Active files:     {}", stats.active_files);
            println!("Removed files:    {}", stats.tombstoned_files);
            println!("Tracks:           {}", stats.tracks);
            println!("Artists:          {}", stats.artists);
            println!("Albums:           {}", stats.albums);
            println!("Credits:          {}", stats.credits);
            println!("Duplicate hashes: {}", stats.duplicate_hashes);
            println!();

            if !stats.formats.is_empty() {
                println!("Formats:");
                for (fmt, count) in &stats.formats {
                    println!("  {:<8} {}", fmt, count);
                }
            }
        }
    }

    Ok(())
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() > width {
        let cut: String = s.chars().take(width.saturating_sub(3)).collect();
        format!("{cut}...")
    } else {
        s.to_string()
    }
}

/// Print active tracks: title, artists, album and position in the file.
fn print_track_table(tracks: &[LibraryTrack]) {
    println!(
        "{:<30} {:<25} {:<25} {:>5} {:>8}",
        "Title", "Artists", "Album", "Year", "Start"
    );
    println!("{}", "-".repeat(97));

    for t in tracks {
        let title = t.track.info.title.as_deref().unwrap_or("(untitled)");
        let artists = t
            .credits
            .iter()
            .map(|c| c.artist_name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let start = t
            .track
            .span
            .start()
            .map(|s| format!("{}:{:02}", (s / 60.0) as u64, (s % 60.0) as u64))
            .unwrap_or_default();
        println!(
            "{:<30} {:<25} {:<25} {:>5} {:>8}",
            truncate(title, 30),
            truncate(&artists, 25),
            truncate(t.album_title.as_deref().unwrap_or(""), 25),
            t.album_year.map(|y| y.to_string()).unwrap_or_default(),
            start,
        );
    }

    println!();
    println!("{} track(s)", tracks.len());
}
