//! # Remora BitTorrent Downloader
//!
//! A command-line downloader for single-file torrents over HTTP trackers.
//!
//! ## Usage
//!
//! ```bash
//! remora <torrent-path-or-url> [output-path]
//! ```
//!
//! The torrent argument may be a local `.torrent` file or an HTTP(S) URL
//! to fetch one from. The output path defaults to the name embedded in the
//! torrent; an explicitly empty output path streams the file to standard
//! output.
//!
//! ## Architecture
//!
//! - **Main thread**: parses arguments, loads the torrent, announces to
//!   the tracker and assembles pieces into the output file
//! - **Worker threads**: one per discovered peer, each speaking the peer
//!   wire protocol over its own TCP connection
//! - **Channels**: a shared work queue of piece jobs and a result stream
//!   of verified pieces

#[macro_use]
extern crate log;

mod bencode;
mod bitfield;
mod client;
mod download;
mod handshake;
mod message;
mod peer;
mod piece;
mod torrent;
mod tracker;
mod worker;

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use anyhow::{anyhow, Result};
use clap::error::ErrorKind;
use clap::{ArgAction, Parser};

use download::Downloader;
use torrent::Metainfo;

#[derive(Parser, Debug)]
#[command(
    version,
    disable_version_flag = true,
    about = "A command-line BitTorrent downloader for single-file torrents."
)]
struct Args {
    /// Path or HTTP(S) URL of the .torrent file
    torrent: String,

    /// Output path (defaults to the name in the torrent; "" writes to standard output)
    output: Option<String>,

    /// Print version information
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    version: Option<bool>,
}

/// Strips path separators from a torrent-supplied filename so a hostile
/// `name` field cannot escape the working directory.
fn sanitize_filename(filename: &str) -> String {
    let safe_name = filename.replace(['/', '\\'], "_");

    if safe_name.trim().is_empty() {
        "download".to_string()
    } else {
        safe_name
    }
}

fn write_output(path: &str, data: &[u8]) -> Result<()> {
    if path.is_empty() {
        io::stdout().write_all(data)?;
        return Ok(());
    }

    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|e| anyhow!("could not create directory {:?}: {}", parent, e))?;
        }
    }

    let mut file =
        File::create(path).map_err(|e| anyhow!("could not create output file {}: {}", path, e))?;
    file.write_all(data)
        .map_err(|e| anyhow!("could not write to {}: {}", path, e))?;

    Ok(())
}

fn run(args: Args) -> Result<()> {
    let metainfo = Metainfo::open(&args.torrent)?;

    // An explicit output path is taken as-is; only the torrent-supplied
    // default name gets sanitized.
    let output_path = match args.output {
        Some(path) => path,
        None => sanitize_filename(metainfo.name()),
    };

    let downloader = Downloader::new(metainfo)?;
    let data = downloader.run()?;

    write_output(&output_path, &data)?;
    if output_path.is_empty() {
        info!("wrote {} bytes to standard output", data.len());
    } else {
        println!("Saved in \"{}\".", output_path);
    }

    Ok(())
}

fn main() {
    // Initialize logger
    pretty_env_logger::init_timed();

    // clap exits with code 2 on bad arguments; keep help and version on
    // stdout with status 0 and everything else on stderr with status 1.
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            print!("{}", e);
            std::process::exit(0);
        }
        Err(e) => {
            eprint!("{}", e);
            std::process::exit(1);
        }
    };

    if let Err(error) = run(args) {
        eprintln!("Error: {}", error);
        std::process::exit(1);
    }

    std::process::exit(0);
}
