use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use musiclib::download::{self, ExternalDownloader};
use musiclib::files::expand_inputs;
use musiclib::listing;
use musiclib::settings::Settings;
use musiclib::staging;
use musiclib::tags::LoftyTags;
use musiclib::url::{self, UrlFormat};
use musiclib::Catalog;

/// Music library organizer
#[derive(Parser)]
#[command(version)]
struct Cli {
    /// Database file. Defaults to the `database` setting (library.db)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Configuration file. Defaults to ~/.config/musiclib/config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log more (-v for progress, -vv for every file)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the library database
    Init {
        /// Erase the library if it exists
        #[arg(short, long, action = ArgAction::SetTrue)]
        force: bool,
    },
    /// Add songs to the library
    #[command(visible_alias = "+")]
    Add {
        /// Do not check duplicates (they will be silently ignored)
        #[arg(long = "no-warn-duplicates", action = ArgAction::SetFalse)]
        warn_duplicates: bool,
        /// Music files, or directories to search for music files
        #[arg(value_name = "MUSIC-FILE", required = true)]
        music_files: Vec<PathBuf>,
    },
    /// List all songs in the library
    #[command(visible_alias = "ls")]
    List {
        /// Output as JSON
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
        /// Compact output. Only significant with --json
        #[arg(long, action = ArgAction::SetTrue)]
        compact: bool,
    },
    /// Remove songs from the library (the files on disk are kept)
    #[command(visible_aliases = ["rm", "del"])]
    Remove {
        /// Do not warn about songs that are not in the library
        #[arg(long = "no-warn-missing", action = ArgAction::SetFalse)]
        warn_missing: bool,
        #[arg(value_name = "MUSIC-FILE", required = true)]
        music_files: Vec<PathBuf>,
    },
    /// Manage download URLs
    Url {
        #[command(subcommand)]
        command: UrlCommands,
    },
}

#[derive(Subcommand)]
enum UrlCommands {
    /// Print the URL list
    Get {
        #[arg(short, long, value_enum, default_value_t = UrlFormat::YoutubeDl)]
        format: UrlFormat,
        /// Write the list to this file instead of standard output
        dest: Option<PathBuf>,
    },
    /// Set URLs from a list produced by `template`
    Set {
        /// Read the list from this file instead of standard input
        source: Option<PathBuf>,
    },
    /// Write a template of URLs to be filled and passed to `set`
    #[command(visible_alias = "tpl")]
    Template {
        dest: Option<PathBuf>,
    },
    /// Download all URLs and apply the metadata
    #[command(visible_alias = "dl")]
    Download,
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        _ => LevelFilter::DEBUG,
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(false),
        )
        .with(
            EnvFilter::builder()
                .with_default_directive(default_level.into())
                .with_env_var("MUSICLIB_LOG")
                .from_env_lossy(),
        )
        .init();
}

fn is_std_stream(path: Option<&Path>) -> bool {
    path.is_none_or(|p| p == Path::new("-"))
}

fn open_output(dest: Option<&Path>) -> Result<Box<dyn Write>> {
    match dest {
        Some(path) if !is_std_stream(dest) => {
            let file = File::create(path)
                .with_context(|| format!("cannot create {}", path.display()))?;
            Ok(Box::new(BufWriter::new(file)))
        }
        _ => Ok(Box::new(io::stdout().lock())),
    }
}

fn open_input(source: Option<&Path>) -> Result<Box<dyn BufRead>> {
    match source {
        Some(path) if !is_std_stream(source) => {
            let file = File::open(path)
                .with_context(|| format!("cannot open {}", path.display()))?;
            Ok(Box::new(BufReader::new(file)))
        }
        _ => Ok(Box::new(io::stdin().lock())),
    }
}

fn open_library(db_path: &Path) -> Result<Catalog> {
    let catalog = Catalog::open(db_path)
        .with_context(|| format!("cannot open {}", db_path.display()))?;
    catalog.ensure_initialized()?;
    Ok(catalog)
}

fn init_library(db_path: &Path, force: bool) -> Result<()> {
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("cannot create {}", parent.display()))?;
    }
    let mut catalog = Catalog::open(db_path)
        .with_context(|| format!("cannot open {}", db_path.display()))?;
    catalog.initialize(force)?;
    println!("{}", format!("Initialized library at {}", db_path.display()).green());
    Ok(())
}

fn add_tracks(db_path: &Path, music_files: &[PathBuf], warn_duplicates: bool) -> Result<()> {
    let mut catalog = open_library(db_path)?;
    let report = staging::add(&mut catalog, &LoftyTags, expand_inputs(music_files), warn_duplicates)?;
    println!("{}", format!("Added {} of {} tracks", report.changed, report.staged).green());
    if !report.conflicts.is_empty() {
        println!("{}", format!("{} already in the library", report.conflicts.len()).yellow());
    }
    Ok(())
}

fn remove_tracks(db_path: &Path, music_files: &[PathBuf], warn_missing: bool) -> Result<()> {
    let mut catalog = open_library(db_path)?;
    let report = staging::remove(&mut catalog, &LoftyTags, expand_inputs(music_files), warn_missing)?;
    println!("{}", format!("Removed {} of {} tracks", report.changed, report.staged).green());
    if !report.conflicts.is_empty() {
        println!("{}", format!("{} not in the library", report.conflicts.len()).yellow());
    }
    Ok(())
}

fn list_tracks(db_path: &Path, json: bool, compact: bool) -> Result<()> {
    let catalog = open_library(db_path)?;
    let songs = listing::do_list(&catalog)?;
    let mut out = io::stdout().lock();
    if json {
        writeln!(out, "{}", listing::to_json(&songs.tracks, compact)?)?;
    } else {
        listing::write_table(&songs, &mut out)?;
    }
    Ok(())
}

fn url_command(db_path: &Path, command: UrlCommands, settings: &Settings) -> Result<()> {
    match command {
        UrlCommands::Get { format, dest } => {
            let catalog = open_library(db_path)?;
            let mut out = open_output(dest.as_deref())?;
            url::get(&catalog, format, &mut out)?;
            out.flush()?;
        }
        UrlCommands::Set { source } => {
            let mut catalog = open_library(db_path)?;
            let mut input = open_input(source.as_deref())?;
            let report = url::set_from_file(&mut catalog, &mut input)?;
            println!("{}", format!("Updated {} tracks", report.applied).green());
            if !report.unmatched.is_empty() {
                println!(
                    "{}",
                    format!("{} lines did not match any track", report.unmatched.len()).yellow()
                );
            }
        }
        UrlCommands::Template { dest } => {
            let catalog = open_library(db_path)?;
            let mut out = open_output(dest.as_deref())?;
            url::template(&catalog, &mut out)?;
            out.flush()?;
        }
        UrlCommands::Download => {
            let fetcher = ExternalDownloader::new(&settings.downloader);
            let catalog = open_library(db_path)?;
            let pb = ProgressBar::new(0);
            pb.set_style(
                ProgressStyle::with_template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                    .progress_chars("##-"),
            );
            let files = download::download_all(&catalog, &fetcher, &LoftyTags, &pb, &mut io::stdout())?;
            println!("{}", format!("Downloaded {} tracks", files.len()).green());
        }
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load(cli.config.as_deref()).context("failed to load configuration")?;
    let db_path = cli.database.unwrap_or_else(|| settings.database_path());

    match cli.command {
        Commands::Init { force } => init_library(&db_path, force),
        Commands::Add {
            warn_duplicates,
            music_files,
        } => add_tracks(&db_path, &music_files, warn_duplicates),
        Commands::List { json, compact } => list_tracks(&db_path, json, compact),
        Commands::Remove {
            warn_missing,
            music_files,
        } => remove_tracks(&db_path, &music_files, warn_missing),
        Commands::Url { command } => url_command(&db_path, command, &settings),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => match err.downcast_ref::<musiclib::Error>() {
            Some(e) if e.is_usage_error() => {
                eprintln!("{} {}", "error:".red().bold(), e);
                ExitCode::from(2)
            }
            _ => {
                eprintln!("{} {:?}", "error:".red().bold(), err);
                ExitCode::FAILURE
            }
        },
    }
}
