//! Console player for VGM/VGZ/XGM containers.
//!
//! `play` drives a file or a folder tree through the playback core with
//! real-time pacing; `info` prints a container's header and metadata.
mod rig;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::Table;

use chipdrive::player::{LoopLimit, NextAction, Player, PlayerConfig, RepeatMode};
use chipdrive::source::SourceOptions;
use chipdrive::{ChipSlots, FsStorage, open_track};

use rig::{ConsoleBus, ConsoleDisplay, SoftAttenuator};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RepeatArg {
    All,
    One,
    Folder,
}

impl From<RepeatArg> for RepeatMode {
    fn from(value: RepeatArg) -> Self {
        match value {
            RepeatArg::All => RepeatMode::All,
            RepeatArg::One => RepeatMode::One,
            RepeatArg::Folder => RepeatMode::Folder,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play a file, or a folder tree continuously (Ctrl-C to stop)
    Play {
        /// Track file or folder
        #[arg(value_name = "PATH")]
        path: PathBuf,

        /// Loop passes before the fade-out starts; 0 = loop forever
        #[arg(long, default_value_t = 2)]
        loops: u32,

        /// Fade-out duration in seconds; 0 disables fading
        #[arg(long, default_value_t = 8)]
        fade_secs: u64,

        /// What to play after a track ends
        #[arg(long, value_enum, default_value_t = RepeatArg::All)]
        repeat: RepeatArg,

        /// Run without real-time pacing (as fast as possible)
        #[arg(long)]
        no_throttle: bool,

        /// Print every register write
        #[arg(long)]
        verbose: bool,
    },
    /// Show a container's header fields and metadata
    Info {
        /// Track file
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

#[derive(Parser, Debug)]
#[command(
    name = "chipdrive",
    version = env!("CARGO_PKG_VERSION"),
    about = env!("CARGO_PKG_DESCRIPTION"),
)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let result = match args.command {
        Commands::Play {
            path,
            loops,
            fade_secs,
            repeat,
            no_throttle,
            verbose,
        } => play(&path, loops, fade_secs, repeat.into(), no_throttle, verbose),
        Commands::Info { file } => info(&file),
    };

    if let Err(e) = result {
        eprintln!("{:#}", e);
        std::process::exit(1);
    }
}

/// True for the file extensions the player handles.
fn is_track(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| {
            s.eq_ignore_ascii_case("vgm")
                || s.eq_ignore_ascii_case("vgz")
                || s.eq_ignore_ascii_case("xgm")
        })
        .unwrap_or(false)
}

/// Track files in `dir`, sorted by name.
fn tracks_in(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read folder: {}", dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_track(p))
        .collect();
    files.sort();
    Ok(files)
}

/// Folders to play: subfolders of `root` that contain tracks, or `root`
/// itself when its tracks sit at the top level.
fn folders_in(root: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(root)
        .with_context(|| format!("failed to read folder: {}", root.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir() && tracks_in(p).map(|t| !t.is_empty()).unwrap_or(false))
        .collect();
    dirs.sort();
    if dirs.is_empty() && !tracks_in(root)?.is_empty() {
        dirs.push(root.to_path_buf());
    }
    Ok(dirs)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn play(
    path: &Path,
    loops: u32,
    fade_secs: u64,
    repeat: RepeatMode,
    no_throttle: bool,
    verbose: bool,
) -> Result<()> {
    let fade = (fade_secs != 0).then(|| Duration::from_secs(fade_secs));
    let config = PlayerConfig {
        loop_limit: if loops == 0 {
            LoopLimit::Infinite
        } else {
            LoopLimit::Count(loops)
        },
        fade_enabled: fade.is_some(),
        repeat,
        throttle: !no_throttle,
        ..PlayerConfig::default()
    };

    let mut player = Player::new(
        config,
        Box::new(ConsoleBus::new(verbose)),
        Box::new(SoftAttenuator::new(fade)),
        Box::new(ConsoleDisplay),
    );

    if path.is_file() {
        let storage =
            FsStorage::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        player
            .load(Box::new(storage), &file_name_of(path), 1, 1)
            .with_context(|| format!("failed to load {}", path.display()))?;
        player.play_to_end();
        return Ok(());
    }

    let folders = folders_in(path)?;
    if folders.is_empty() {
        bail!("no playable files under {}", path.display());
    }

    let mut folder = 0usize;
    let mut index = 0usize;
    loop {
        let tracks = tracks_in(&folders[folder])?;
        if tracks.is_empty() {
            // The folder was emptied since the scan; move on.
            folder = (folder + 1) % folders.len();
            index = 0;
            continue;
        }
        if index >= tracks.len() {
            index = 0;
        }
        let track_path = &tracks[index];

        // A track that fails to load is skipped, not fatal.
        let loaded = FsStorage::open(track_path)
            .map_err(anyhow::Error::from)
            .and_then(|storage| {
                player
                    .load(
                        Box::new(storage),
                        &file_name_of(track_path),
                        index as u32 + 1,
                        tracks.len() as u32,
                    )
                    .map_err(anyhow::Error::from)
            });
        match loaded {
            Ok(()) => {
                player.play_to_end();
            }
            Err(e) => eprintln!("skipping {}: {:#}", track_path.display(), e),
        }

        match player.next_action(index + 1 == tracks.len()) {
            NextAction::Replay => {}
            NextAction::NextTrack => index = (index + 1) % tracks.len(),
            NextAction::NextFolder => {
                folder = (folder + 1) % folders.len();
                index = 0;
            }
        }
    }
}

fn info(path: &Path) -> Result<()> {
    let storage =
        FsStorage::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let slots = ChipSlots::default();
    let (track, src) = open_track(
        Box::new(storage),
        &SourceOptions::default(),
        &slots,
        &file_name_of(path),
    )
    .with_context(|| format!("failed to parse {}", path.display()))?;
    drop(src);

    let mut table = Table::new();
    table.set_header(vec!["Field", "Value"]);
    table.add_row(vec!["Format".to_string(), track.format.label().to_string()]);
    table.add_row(vec!["Version".to_string(), format!("0x{:X}", track.version)]);
    table.add_row(vec![
        "Size".to_string(),
        match track.decompressed_size {
            Some(d) => format!("{} ({} inflated)", track.raw_size, d),
            None => track.raw_size.to_string(),
        },
    ]);
    table.add_row(vec![
        "Data start".to_string(),
        format!("0x{:X}", track.data_start),
    ]);
    table.add_row(vec![
        "Loop offset".to_string(),
        format!("0x{:X}", track.loop_offset),
    ]);
    for label in track.clock_labels(&slots) {
        table.add_row(vec!["Chip".to_string(), label]);
    }
    table.add_row(vec!["Track".to_string(), track.meta.track_en.clone()]);
    if track.meta.track_jp != track.meta.track_en {
        table.add_row(vec!["Track (JP)".to_string(), track.meta.track_jp.clone()]);
    }
    table.add_row(vec!["Game".to_string(), track.meta.game_en.clone()]);
    table.add_row(vec!["System".to_string(), track.meta.system_en.clone()]);
    table.add_row(vec!["Author".to_string(), track.meta.author_en.clone()]);
    table.add_row(vec!["Date".to_string(), track.meta.date.clone()]);
    println!("{table}");
    Ok(())
}
